//! Command-line interface parsing for codeforce
//!
//! Handles subcommand and flag parsing with clap and turns the cache-related
//! flags into a `CacheConfig`.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use thiserror::Error;

use crate::cache::CacheConfig;
use crate::gitlab::DEFAULT_BASE_URL;

/// Error types for CLI argument validation
#[derive(Debug, Error)]
pub enum CliError {
    /// An id that cannot be used as a GitLab path segment
    #[error("Invalid id: '{0}'. Expected a numeric id or a group/project path")]
    InvalidId(String),

    /// The cache must be able to hold at least one entry
    #[error("--max-entries must be at least 1")]
    InvalidMaxEntries,
}

/// codeforce - GitLab contribution metrics with a persistent response cache
#[derive(Parser, Debug)]
#[command(name = "codeforce")]
#[command(about = "GitLab contribution metrics backed by a local response cache")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Ignore cached responses and fetch everything again
    #[arg(long, global = true)]
    pub refresh: bool,

    /// GitLab API root
    #[arg(long, env = "GITLAB_BASE_URL", default_value = DEFAULT_BASE_URL, global = true)]
    pub base_url: String,

    /// Personal access token, sent as PRIVATE-TOKEN
    #[arg(long, env = "GITLAB_PAT", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// Directory holding the cache snapshot (defaults to the user data directory)
    #[arg(long, env = "CACHE_DIR", value_name = "DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Seconds a cached response stays valid
    #[arg(long, default_value_t = 3600, value_name = "SECS", global = true)]
    pub ttl_secs: u64,

    /// Maximum number of cached responses kept in memory
    #[arg(long, default_value_t = 500, value_name = "N", global = true)]
    pub max_entries: usize,

    /// Log cache and request activity to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Metrics for a user's own activity
    User {
        /// GitLab user id
        #[arg(value_parser = parse_id_arg)]
        id: String,
    },
    /// Metrics for a project and its contributors
    Project {
        /// Numeric project id or group/project path
        #[arg(value_parser = parse_id_arg)]
        id: String,
    },
    /// Projects the token's user is a member of
    Projects,
}

/// Parses a user or project id argument.
///
/// Ids end up in request paths, so only characters that are valid in GitLab
/// ids and namespaced paths are accepted.
///
/// # Arguments
/// * `s` - The id string from CLI
///
/// # Returns
/// * `Ok(String)` with surrounding whitespace removed
/// * `Err(CliError::InvalidId)` if the string is empty or has other characters
pub fn parse_id_arg(s: &str) -> Result<String, CliError> {
    let id = s.trim();
    let valid = !id.is_empty()
        && !id.starts_with('/')
        && !id.ends_with('/')
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '/'));

    if valid {
        Ok(id.to_string())
    } else {
        Err(CliError::InvalidId(s.to_string()))
    }
}

/// Builds the cache configuration from parsed CLI arguments.
///
/// # Returns
/// * `Ok(CacheConfig)` with the CLI overrides applied to the defaults
/// * `Err(CliError)` if a value is out of range
pub fn cache_config_from_cli(cli: &Cli) -> Result<CacheConfig, CliError> {
    if cli.max_entries == 0 {
        return Err(CliError::InvalidMaxEntries);
    }

    let defaults = match &cli.cache_dir {
        Some(dir) => CacheConfig::with_dir(dir),
        None => CacheConfig::default(),
    };

    Ok(CacheConfig {
        ttl: Duration::from_secs(cli.ttl_secs),
        max_entries: cli.max_entries,
        ..defaults
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::SNAPSHOT_FILE_NAME;

    #[test]
    fn test_parse_id_arg_numeric() {
        assert_eq!(parse_id_arg("42").unwrap(), "42");
        assert_eq!(parse_id_arg(" 42 ").unwrap(), "42");
    }

    #[test]
    fn test_parse_id_arg_project_path() {
        assert_eq!(parse_id_arg("group/sub-group/my_project.rs").unwrap(), "group/sub-group/my_project.rs");
    }

    #[test]
    fn test_parse_id_arg_invalid() {
        for input in ["", "   ", "1?private=true", "a b", "/group", "group/", "1#x"] {
            let result = parse_id_arg(input);
            assert!(result.is_err(), "{:?} should be rejected", input);
        }
        let err = parse_id_arg("a b").unwrap_err();
        assert!(err.to_string().contains("Invalid id"));
    }

    #[test]
    fn test_cli_parse_user() {
        let cli = Cli::parse_from(["codeforce", "user", "42"]);
        assert_eq!(cli.command, Command::User { id: "42".to_string() });
        assert!(!cli.refresh);
        assert!(!cli.verbose);
    }

    #[test]
    fn test_cli_global_flags_after_subcommand() {
        let cli = Cli::parse_from([
            "codeforce",
            "project",
            "group/app",
            "--refresh",
            "--base-url",
            "https://gitlab.example.com/api/v4",
            "--ttl-secs",
            "60",
        ]);
        assert_eq!(cli.command, Command::Project { id: "group/app".to_string() });
        assert!(cli.refresh);
        assert_eq!(cli.base_url, "https://gitlab.example.com/api/v4");
        assert_eq!(cli.ttl_secs, 60);
    }

    #[test]
    fn test_cli_rejects_invalid_id() {
        assert!(Cli::try_parse_from(["codeforce", "user", "1?x=y"]).is_err());
    }

    #[test]
    fn test_cache_config_from_cli_with_dir() {
        let cli = Cli::parse_from([
            "codeforce",
            "projects",
            "--cache-dir",
            "/tmp/codeforce-test",
            "--max-entries",
            "10",
            "--ttl-secs",
            "5",
        ]);
        let config = cache_config_from_cli(&cli).unwrap();

        assert_eq!(config.path, PathBuf::from("/tmp/codeforce-test").join(SNAPSHOT_FILE_NAME));
        assert_eq!(config.max_entries, 10);
        assert_eq!(config.ttl, Duration::from_secs(5));
        assert_eq!(config.max_snapshot_bytes, CacheConfig::default().max_snapshot_bytes);
    }

    #[test]
    fn test_cache_config_from_cli_rejects_zero_entries() {
        let cli = Cli::parse_from(["codeforce", "projects", "--max-entries", "0"]);
        assert!(matches!(cache_config_from_cli(&cli), Err(CliError::InvalidMaxEntries)));
    }
}
