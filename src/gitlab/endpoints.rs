//! GitLab API endpoint functions
//!
//! Builds the base query for each listing the metrics need. Base queries carry
//! filters but never paging parameters, so they double as cache keys.

use url::form_urlencoded;

use super::client::{FetchError, GitLabClient};
use super::{Commit, Event, Member, MergeRequest, Project};

/// Merge request state filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeRequestState {
    Opened,
    Merged,
    Closed,
    Locked,
    #[default]
    All,
}

impl MergeRequestState {
    /// Query value, or `None` when no filter applies
    fn as_query(&self) -> Option<&'static str> {
        match self {
            MergeRequestState::Opened => Some("opened"),
            MergeRequestState::Merged => Some("merged"),
            MergeRequestState::Closed => Some("closed"),
            MergeRequestState::Locked => Some("locked"),
            MergeRequestState::All => None,
        }
    }
}

/// Merge request scope filter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeRequestScope {
    #[default]
    All,
    CreatedByMe,
    AssignedToMe,
}

impl MergeRequestScope {
    fn as_query(&self) -> Option<&'static str> {
        match self {
            MergeRequestScope::All => None,
            MergeRequestScope::CreatedByMe => Some("created_by_me"),
            MergeRequestScope::AssignedToMe => Some("assigned_to_me"),
        }
    }
}

/// Joins a path with percent-encoded filters, omitting the `?` when there are none
fn query(path: &str, params: &[(&str, Option<&str>)]) -> String {
    let filters: Vec<(&str, &str)> = params
        .iter()
        .filter_map(|(key, value)| value.map(|value| (*key, value)))
        .collect();

    if filters.is_empty() {
        return path.to_string();
    }

    let encoded = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(filters)
        .finish();
    format!("{}?{}", path, encoded)
}

/// GitLab accepts `group/project` paths as ids only when the slash is encoded
fn encode_project_id(project_id: &str) -> String {
    project_id.replace('/', "%2F")
}

impl GitLabClient {
    /// Projects the authenticated user is a member of
    pub async fn list_projects(&self, refresh: bool) -> Result<Vec<Project>, FetchError> {
        self.fetch_all("/projects?membership=true", refresh).await
    }

    /// Events performed by a user
    pub async fn user_events(&self, user_id: &str, refresh: bool) -> Result<Vec<Event>, FetchError> {
        self.fetch_all(&format!("/users/{}/events", user_id), refresh)
            .await
    }

    /// Events within a project
    pub async fn project_events(
        &self,
        project_id: &str,
        refresh: bool,
    ) -> Result<Vec<Event>, FetchError> {
        self.fetch_all(
            &format!("/projects/{}/events", encode_project_id(project_id)),
            refresh,
        )
        .await
    }

    /// Merge requests authored by a user
    pub async fn user_merge_requests(
        &self,
        user_id: &str,
        state: MergeRequestState,
        refresh: bool,
    ) -> Result<Vec<MergeRequest>, FetchError> {
        let base = query(
            "/merge_requests",
            &[("author_id", Some(user_id)), ("state", state.as_query())],
        );
        self.fetch_all(&base, refresh).await
    }

    /// Active projects a user can access
    pub async fn user_projects(
        &self,
        user_id: &str,
        refresh: bool,
    ) -> Result<Vec<Project>, FetchError> {
        self.fetch_all(
            &format!("/users/{}/projects?archived=false&min_access_level=10", user_id),
            refresh,
        )
        .await
    }

    /// Commits belonging to a merge request
    pub async fn merge_request_commits(
        &self,
        project_id: &str,
        merge_request_iid: u64,
        refresh: bool,
    ) -> Result<Vec<Commit>, FetchError> {
        self.fetch_all(
            &format!(
                "/projects/{}/merge_requests/{}/commits",
                encode_project_id(project_id),
                merge_request_iid
            ),
            refresh,
        )
        .await
    }

    /// A single merge request including `diff_stats`
    pub async fn merge_request_details(
        &self,
        project_id: &str,
        merge_request_iid: u64,
        refresh: bool,
    ) -> Result<MergeRequest, FetchError> {
        self.fetch_one(
            &format!(
                "/projects/{}/merge_requests/{}?compute_metrics=true",
                encode_project_id(project_id),
                merge_request_iid
            ),
            refresh,
        )
        .await
    }

    /// Merge requests of a project
    pub async fn project_merge_requests(
        &self,
        project_id: &str,
        state: MergeRequestState,
        scope: MergeRequestScope,
        refresh: bool,
    ) -> Result<Vec<MergeRequest>, FetchError> {
        let base = query(
            &format!("/projects/{}/merge_requests", encode_project_id(project_id)),
            &[("state", state.as_query()), ("scope", scope.as_query())],
        );
        self.fetch_all(&base, refresh).await
    }

    /// Repository commits with line statistics, optionally bounded by ISO 8601 dates
    pub async fn project_commits(
        &self,
        project_id: &str,
        since: Option<&str>,
        until: Option<&str>,
        refresh: bool,
    ) -> Result<Vec<Commit>, FetchError> {
        let base = query(
            &format!(
                "/projects/{}/repository/commits",
                encode_project_id(project_id)
            ),
            &[("with_stats", Some("true")), ("since", since), ("until", until)],
        );
        self.fetch_all(&base, refresh).await
    }

    /// Direct and inherited members of a project
    pub async fn project_members(
        &self,
        project_id: &str,
        refresh: bool,
    ) -> Result<Vec<Member>, FetchError> {
        self.fetch_all(
            &format!("/projects/{}/members/all", encode_project_id(project_id)),
            refresh,
        )
        .await
    }
}
