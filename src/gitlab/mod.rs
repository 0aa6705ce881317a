//! GitLab REST API access
//!
//! This module contains the cached, pagination-aware client and the response
//! types the metrics layer reads. Types only declare the fields we use; GitLab
//! sends many more and they are ignored.

pub mod client;
mod endpoints;
mod flight;
pub mod pagination;

pub use client::{FetchError, GitLabClient, DEFAULT_BASE_URL, PER_PAGE};
pub use endpoints::{MergeRequestScope, MergeRequestState};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A user as embedded in merge requests and commits
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
}

/// Line statistics for a merge request diff
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffStats {
    pub additions: i64,
    pub deletions: i64,
    #[serde(default)]
    pub total: i64,
}

/// Note attached to a comment event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventNote {
    #[serde(default)]
    pub system: bool,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub project_id: Option<u64>,
}

/// Push details attached to a push event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PushData {
    #[serde(default)]
    pub commit_count: u64,
}

/// Project summary embedded in some events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventProject {
    pub id: u64,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
}

/// A user or project activity event
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub action_name: String,
    #[serde(default)]
    pub target_type: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub note: Option<EventNote>,
    #[serde(default)]
    pub push_data: Option<PushData>,
    #[serde(default)]
    pub target_iid: Option<u64>,
    #[serde(default)]
    pub project_id: Option<u64>,
    #[serde(default)]
    pub project: Option<EventProject>,
    #[serde(default)]
    pub author_id: Option<u64>,
}

impl Event {
    /// Whether this event has the given action on the given target type
    pub fn is(&self, action: &str, target_type: &str) -> bool {
        self.action_name == action && self.target_type.as_deref() == Some(target_type)
    }

    /// A non-system comment on a merge request
    pub fn is_review_comment(&self) -> bool {
        self.is("commented on", "MergeRequest") && self.note.as_ref().is_some_and(|n| !n.system)
    }

    /// An approval of a merge request
    pub fn is_approval(&self) -> bool {
        self.is("approved", "MergeRequest")
    }
}

/// A merge request, as listed or fetched individually
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeRequest {
    pub id: u64,
    pub iid: u64,
    pub project_id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub state: String,
    #[serde(default)]
    pub author: Option<UserRef>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub merged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub web_url: String,
    /// Present on single merge requests fetched with `compute_metrics=true`
    #[serde(default)]
    pub diff_stats: Option<DiffStats>,
    /// GitLab reports this as a string such as `"42"` or `"1000+"`
    #[serde(default)]
    pub changes_count: Option<String>,
}

/// Line statistics for a commit
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitStats {
    pub additions: i64,
    pub deletions: i64,
    #[serde(default)]
    pub total: i64,
}

/// A repository commit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Commit {
    pub id: String,
    #[serde(default)]
    pub short_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub author_name: String,
    #[serde(default)]
    pub author_email: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub stats: Option<CommitStats>,
    #[serde(default)]
    pub author: Option<UserRef>,
}

/// A project member
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Member {
    pub id: u64,
    pub username: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub web_url: Option<String>,
}

/// A project summary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub path_with_namespace: Option<String>,
    #[serde(default)]
    pub web_url: String,
}
