//! Contribution metrics derived from GitLab activity
//!
//! Combines cached listings from the GitLab client into per-user and per-project
//! summaries: commits, merge requests, code reviews, issues and line deltas.

use std::collections::{HashMap, HashSet};

use futures::stream::{self, StreamExt};
use serde::Serialize;
use tracing::warn;

use crate::gitlab::{
    Commit, DiffStats, Event, FetchError, GitLabClient, Member, MergeRequest, MergeRequestScope,
    MergeRequestState, UserRef,
};

/// Merge request detail lookups in flight at once
const DETAIL_CONCURRENCY: usize = 8;

/// Metrics for a single user
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserMetrics {
    pub commits: u64,
    pub merge_requests_opened: usize,
    pub merge_requests_merged: usize,
    pub code_reviews: u64,
    pub issues_opened: u64,
    pub issues_closed: u64,
    pub lines_added: i64,
    pub lines_deleted: i64,
    pub lines_net: i64,
    pub contributed_projects: Vec<ContributedProject>,
}

/// A project a user has been active in
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContributedProject {
    pub id: String,
    pub name: String,
    pub web_url: String,
}

/// Metrics for a single project
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectMetrics {
    pub project_id: String,
    pub total_lines_added: i64,
    pub total_lines_deleted: i64,
    pub total_lines_net: i64,
    pub active_merge_requests: Vec<MergeRequestSummary>,
    pub merged_merge_requests: Vec<MergeRequestSummary>,
    pub contributors: Vec<Contributor>,
}

/// Merge request as listed in project metrics
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MergeRequestSummary {
    pub id: u64,
    pub iid: u64,
    pub title: String,
    pub author: Option<UserRef>,
    pub state: String,
    #[serde(rename = "created_at")]
    pub created_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "updated_at")]
    pub updated_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "web_url")]
    pub web_url: String,
    /// Total lines changed, when GitLab reports it
    pub size: Option<i64>,
    pub lines_added: Option<i64>,
    pub lines_deleted: Option<i64>,
}

impl From<&MergeRequest> for MergeRequestSummary {
    fn from(mr: &MergeRequest) -> Self {
        let (size, lines_added, lines_deleted) = match mr.diff_stats {
            Some(DiffStats {
                additions,
                deletions,
                total,
            }) => (Some(total), Some(additions), Some(deletions)),
            None => (mr.changes_count.as_deref().and_then(leading_number), None, None),
        };

        Self {
            id: mr.id,
            iid: mr.iid,
            title: mr.title.clone(),
            author: mr.author.clone(),
            state: mr.state.clone(),
            created_at: mr.created_at,
            updated_at: mr.updated_at,
            web_url: mr.web_url.clone(),
            size,
            lines_added,
            lines_deleted,
        }
    }
}

/// Per-person activity within a project
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Contributor {
    pub id: Option<u64>,
    pub name: String,
    #[serde(rename = "avatar_url")]
    pub avatar_url: Option<String>,
    #[serde(rename = "web_url")]
    pub web_url: Option<String>,
    pub commits: u64,
    pub merge_requests_created: u64,
    pub code_reviews: u64,
    pub issues_opened: u64,
    pub issues_closed: u64,
}

/// Counts taken from a user's event stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EventTally {
    pub commits: u64,
    pub code_reviews: u64,
    pub issues_opened: u64,
    pub issues_closed: u64,
}

impl EventTally {
    pub fn from_events(events: &[Event]) -> Self {
        let mut tally = Self::default();
        for event in events {
            if event.action_name == "pushed to" {
                tally.commits += event.push_data.as_ref().map_or(0, |push| push.commit_count);
            }
            if event.is_review_comment() || event.is_approval() {
                tally.code_reviews += 1;
            }
            if event.is("opened", "Issue") {
                tally.issues_opened += 1;
            }
            if event.is("closed", "Issue") {
                tally.issues_closed += 1;
            }
        }
        tally
    }
}

/// Projects referenced by events, in order of first appearance
pub fn contributed_projects(events: &[Event]) -> Vec<ContributedProject> {
    let mut seen = HashSet::new();
    let mut projects = Vec::new();

    for event in events {
        let (id, name, web_url) = match (&event.project, event.project_id) {
            (Some(project), _) => (project.id, project.name.clone(), project.web_url.clone()),
            (None, Some(id)) => (id, None, None),
            (None, None) => continue,
        };
        if !seen.insert(id) {
            continue;
        }
        projects.push(ContributedProject {
            id: id.to_string(),
            name: name.unwrap_or_else(|| format!("Project {}", id)),
            web_url: web_url.unwrap_or_default(),
        });
    }

    projects
}

/// Parses the leading digits of GitLab's `changes_count`, e.g. `"1000+"`
fn leading_number(text: &str) -> Option<i64> {
    let digits: String = text
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Contributors keyed by user id, or by email when no id is known
struct ContributorBook<'a> {
    members: HashMap<u64, &'a Member>,
    index: HashMap<String, usize>,
    contributors: Vec<Contributor>,
}

impl<'a> ContributorBook<'a> {
    fn new(members: &'a [Member]) -> Self {
        Self {
            members: members.iter().map(|member| (member.id, member)).collect(),
            index: HashMap::new(),
            contributors: Vec::new(),
        }
    }

    fn member(&self, user_id: Option<u64>) -> Option<&'a Member> {
        user_id.and_then(|id| self.members.get(&id).copied())
    }

    fn entry(&mut self, user_id: Option<u64>, email: &str, name: &str) -> &mut Contributor {
        let key = user_id.map_or_else(|| email.to_string(), |id| id.to_string());
        let position = match self.index.get(&key) {
            Some(&position) => position,
            None => {
                let member = self.member(user_id);
                self.contributors.push(Contributor {
                    id: user_id,
                    name: (if name.is_empty() { email } else { name }).to_string(),
                    avatar_url: member.and_then(|m| m.avatar_url.clone()),
                    web_url: member.and_then(|m| m.web_url.clone()),
                    commits: 0,
                    merge_requests_created: 0,
                    code_reviews: 0,
                    issues_opened: 0,
                    issues_closed: 0,
                });
                self.index.insert(key, self.contributors.len() - 1);
                self.contributors.len() - 1
            }
        };
        &mut self.contributors[position]
    }

    fn into_contributors(self) -> Vec<Contributor> {
        self.contributors
    }
}

/// Whether an event concerns the project; path-style ids cannot be compared
fn event_in_project(event: &Event, project_id: &str) -> bool {
    let Ok(wanted) = project_id.parse::<u64>() else {
        return true;
    };
    event.project_id == Some(wanted)
        || event.note.as_ref().and_then(|note| note.project_id) == Some(wanted)
}

/// Assembles project metrics from already-fetched listings
pub fn build_project_metrics(
    project_id: &str,
    events: &[Event],
    commits: &[Commit],
    opened: &[MergeRequest],
    merged: &[MergeRequest],
    members: &[Member],
) -> ProjectMetrics {
    let (total_lines_added, total_lines_deleted) = commits
        .iter()
        .filter_map(|commit| commit.stats)
        .fold((0, 0), |(added, deleted), stats| {
            (added + stats.additions, deleted + stats.deletions)
        });

    let mut book = ContributorBook::new(members);

    for commit in commits {
        let user_id = commit.author.as_ref().map(|author| author.id);
        book.entry(user_id, &commit.author_email, &commit.author_name).commits += 1;
    }

    for mr in opened.iter().chain(merged) {
        if let Some(author) = &mr.author {
            book.entry(Some(author.id), "", &author.username)
                .merge_requests_created += 1;
        }
    }

    for event in events {
        let Some(author_id) = event.author_id else {
            continue;
        };
        let name = book
            .member(Some(author_id))
            .map_or_else(|| format!("User {}", author_id), |m| m.username.clone());
        let contributor = book.entry(Some(author_id), "", &name);

        if event.is_review_comment() && event_in_project(event, project_id) {
            contributor.code_reviews += 1;
        }
        if event.is_approval() {
            contributor.code_reviews += 1;
        }
        if event.is("opened", "Issue") {
            contributor.issues_opened += 1;
        }
        if event.is("closed", "Issue") {
            contributor.issues_closed += 1;
        }
    }

    ProjectMetrics {
        project_id: project_id.to_string(),
        total_lines_added,
        total_lines_deleted,
        total_lines_net: total_lines_added - total_lines_deleted,
        active_merge_requests: opened.iter().map(MergeRequestSummary::from).collect(),
        merged_merge_requests: merged.iter().map(MergeRequestSummary::from).collect(),
        contributors: book.into_contributors(),
    }
}

/// Computes metrics on top of the cached GitLab client
#[derive(Clone)]
pub struct MetricsService {
    client: GitLabClient,
}

impl MetricsService {
    pub fn new(client: GitLabClient) -> Self {
        Self { client }
    }

    /// Metrics for a user's own activity
    ///
    /// # Arguments
    /// * `user_id` - GitLab user id
    /// * `refresh` - Bypass cached responses
    ///
    /// # Returns
    /// * `Ok(UserMetrics)` - Aggregated metrics
    /// * `Err(FetchError)` - If a listing cannot be fetched; individual merge
    ///   request details that fail are logged and left out of the line counts
    pub async fn user_metrics(
        &self,
        user_id: &str,
        refresh: bool,
    ) -> Result<UserMetrics, FetchError> {
        let (events, opened, merged) = futures::try_join!(
            self.client.user_events(user_id, refresh),
            self.client
                .user_merge_requests(user_id, MergeRequestState::Opened, refresh),
            self.client
                .user_merge_requests(user_id, MergeRequestState::Merged, refresh),
        )?;

        let tally = EventTally::from_events(&events);
        let (lines_added, lines_deleted) = self.merged_line_stats(&merged, refresh).await;

        Ok(UserMetrics {
            commits: tally.commits,
            merge_requests_opened: opened.len(),
            merge_requests_merged: merged.len(),
            code_reviews: tally.code_reviews,
            issues_opened: tally.issues_opened,
            issues_closed: tally.issues_closed,
            lines_added,
            lines_deleted,
            lines_net: lines_added - lines_deleted,
            contributed_projects: contributed_projects(&events),
        })
    }

    /// Metrics for a project and its contributors
    ///
    /// # Arguments
    /// * `project_id` - Numeric id or `group/project` path
    /// * `refresh` - Bypass cached responses
    pub async fn project_metrics(
        &self,
        project_id: &str,
        refresh: bool,
    ) -> Result<ProjectMetrics, FetchError> {
        let (events, commits, opened, merged, members) = futures::try_join!(
            self.client.project_events(project_id, refresh),
            self.client.project_commits(project_id, None, None, refresh),
            self.client.project_merge_requests(
                project_id,
                MergeRequestState::Opened,
                MergeRequestScope::All,
                refresh
            ),
            self.client.project_merge_requests(
                project_id,
                MergeRequestState::Merged,
                MergeRequestScope::All,
                refresh
            ),
            self.client.project_members(project_id, refresh),
        )?;

        Ok(build_project_metrics(
            project_id, &events, &commits, &opened, &merged, &members,
        ))
    }

    /// Sums `diff_stats` over merged merge requests, skipping failed lookups
    async fn merged_line_stats(&self, merged: &[MergeRequest], refresh: bool) -> (i64, i64) {
        let stats: Vec<Option<DiffStats>> = stream::iter(merged)
            .map(|mr| async move {
                let project_id = mr.project_id.to_string();
                match self
                    .client
                    .merge_request_details(&project_id, mr.iid, refresh)
                    .await
                {
                    Ok(details) => details.diff_stats,
                    Err(err) => {
                        warn!(
                            project_id = mr.project_id,
                            iid = mr.iid,
                            error = %err,
                            "skipping merge request details"
                        );
                        None
                    }
                }
            })
            .buffer_unordered(DETAIL_CONCURRENCY)
            .collect()
            .await;

        stats
            .into_iter()
            .flatten()
            .fold((0, 0), |(added, deleted), stats| {
                (added + stats.additions, deleted + stats.deletions)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{Cache, CacheConfig};
    use serde_json::{json, Value};
    use tempfile::TempDir;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn events(value: Value) -> Vec<Event> {
        serde_json::from_value(value).expect("Valid events")
    }

    fn merge_requests(value: Value) -> Vec<MergeRequest> {
        serde_json::from_value(value).expect("Valid merge requests")
    }

    fn create_test_service(server: &MockServer) -> (MetricsService, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let cache = Cache::open(CacheConfig::with_dir(temp_dir.path()));
        let client = GitLabClient::new(&server.uri(), None, cache).unwrap();
        (MetricsService::new(client), temp_dir)
    }

    async fn mount_json(server: &MockServer, route: &str, body: Value) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(server)
            .await;
    }

    fn user_events() -> Value {
        json!([
            { "action_name": "pushed to", "push_data": { "commit_count": 5 }, "project_id": 1 },
            { "action_name": "opened", "target_type": "Issue", "project_id": 1 },
            { "action_name": "closed", "target_type": "Issue", "project_id": 1 },
            { "action_name": "commented on", "target_type": "MergeRequest", "note": { "system": false }, "project_id": 1 },
            { "action_name": "commented on", "target_type": "MergeRequest", "note": { "system": true }, "project_id": 1 },
            { "action_name": "approved", "target_type": "MergeRequest", "project_id": 1 },
            { "action_name": "pushed to", "push_data": { "commit_count": 3 }, "project_id": 2 }
        ])
    }

    async fn mount_user_merge_requests(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/merge_requests"))
            .and(query_param("state", "opened"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 1, "iid": 1, "project_id": 1 },
                { "id": 2, "iid": 2, "project_id": 1 }
            ])))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/merge_requests"))
            .and(query_param("state", "merged"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "id": 3, "iid": 3, "project_id": 2 }
            ])))
            .mount(server)
            .await;
    }

    #[test]
    fn test_event_tally() {
        let tally = EventTally::from_events(&events(user_events()));
        assert_eq!(
            tally,
            EventTally {
                commits: 8,
                code_reviews: 2,
                issues_opened: 1,
                issues_closed: 1,
            }
        );
    }

    #[test]
    fn test_event_tally_empty() {
        assert_eq!(EventTally::from_events(&[]), EventTally::default());
    }

    #[test]
    fn test_contributed_projects_dedupes_in_order() {
        let projects = contributed_projects(&events(json!([
            { "action_name": "pushed to", "project_id": 2 },
            { "action_name": "opened", "project": { "id": 1, "name": "Alpha", "web_url": "https://g/alpha" } },
            { "action_name": "closed", "project_id": 2 },
            { "action_name": "joined" }
        ])));

        assert_eq!(
            projects,
            vec![
                ContributedProject {
                    id: "2".to_string(),
                    name: "Project 2".to_string(),
                    web_url: String::new(),
                },
                ContributedProject {
                    id: "1".to_string(),
                    name: "Alpha".to_string(),
                    web_url: "https://g/alpha".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_leading_number() {
        assert_eq!(leading_number("42"), Some(42));
        assert_eq!(leading_number("1000+"), Some(1000));
        assert_eq!(leading_number("n/a"), None);
    }

    #[test]
    fn test_merge_request_summary_prefers_diff_stats() {
        let mrs = merge_requests(json!([
            { "id": 1, "iid": 1, "project_id": 1, "diff_stats": { "additions": 10, "deletions": 4, "total": 14 }, "changes_count": "99" },
            { "id": 2, "iid": 2, "project_id": 1, "changes_count": "7" },
            { "id": 3, "iid": 3, "project_id": 1 }
        ]));
        let summaries: Vec<MergeRequestSummary> = mrs.iter().map(MergeRequestSummary::from).collect();

        assert_eq!((summaries[0].size, summaries[0].lines_added, summaries[0].lines_deleted), (Some(14), Some(10), Some(4)));
        assert_eq!((summaries[1].size, summaries[1].lines_added), (Some(7), None));
        assert_eq!(summaries[2].size, None);
    }

    #[test]
    fn test_build_project_metrics() {
        let members: Vec<Member> = serde_json::from_value(json!([
            { "id": 10, "username": "ada", "avatar_url": "https://g/ada.png", "web_url": "https://g/ada" },
            { "id": 11, "username": "bob" }
        ]))
        .unwrap();
        let commits: Vec<Commit> = serde_json::from_value(json!([
            { "id": "a", "author_name": "Ada", "author_email": "ada@example.com", "stats": { "additions": 10, "deletions": 2, "total": 12 } },
            { "id": "b", "author_name": "Ada", "author_email": "ada@example.com", "stats": { "additions": 5, "deletions": 5, "total": 10 } },
            { "id": "c", "author_name": "", "author_email": "ghost@example.com" }
        ]))
        .unwrap();
        let opened = merge_requests(json!([
            { "id": 1, "iid": 1, "project_id": 5, "author": { "id": 10, "username": "ada" } }
        ]));
        let merged = merge_requests(json!([
            { "id": 2, "iid": 2, "project_id": 5, "author": { "id": 11, "username": "bob" }, "diff_stats": { "additions": 3, "deletions": 1, "total": 4 } }
        ]));
        let project_events = events(json!([
            { "action_name": "commented on", "target_type": "MergeRequest", "note": { "system": false }, "project_id": 5, "author_id": 11 },
            { "action_name": "commented on", "target_type": "MergeRequest", "note": { "system": false }, "project_id": 6, "author_id": 11 },
            { "action_name": "approved", "target_type": "MergeRequest", "project_id": 5, "author_id": 10 },
            { "action_name": "opened", "target_type": "Issue", "project_id": 5, "author_id": 12 },
            { "action_name": "closed", "target_type": "Issue", "project_id": 5 }
        ]));

        let metrics = build_project_metrics("5", &project_events, &commits, &opened, &merged, &members);

        assert_eq!(metrics.total_lines_added, 15);
        assert_eq!(metrics.total_lines_deleted, 7);
        assert_eq!(metrics.total_lines_net, 8);
        assert_eq!(metrics.active_merge_requests.len(), 1);
        assert_eq!(metrics.merged_merge_requests[0].lines_added, Some(3));

        let names: Vec<&str> = metrics.contributors.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Ada", "ghost@example.com", "ada", "bob", "User 12"]);

        let by_email = &metrics.contributors[0];
        assert_eq!(by_email.id, None);
        assert_eq!(by_email.commits, 2);

        let ada = &metrics.contributors[2];
        assert_eq!(ada.id, Some(10));
        assert_eq!(ada.merge_requests_created, 1);
        assert_eq!(ada.code_reviews, 1);
        assert_eq!(ada.avatar_url.as_deref(), Some("https://g/ada.png"));

        let bob = &metrics.contributors[3];
        assert_eq!(bob.code_reviews, 1, "Comments from other projects are not counted");
        assert_eq!(bob.merge_requests_created, 1);

        assert_eq!(metrics.contributors[4].issues_opened, 1);
    }

    #[test]
    fn test_project_metrics_serialize_like_the_api() {
        let metrics = build_project_metrics("5", &[], &[], &[], &[], &[]);
        let value = serde_json::to_value(&metrics).unwrap();

        assert_eq!(value["projectId"], "5");
        assert_eq!(value["totalLinesNet"], 0);
        assert!(value["activeMergeRequests"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_user_metrics() {
        let server = MockServer::start().await;
        mount_json(&server, "/users/42/events", user_events()).await;
        mount_user_merge_requests(&server).await;
        Mock::given(method("GET"))
            .and(path("/projects/2/merge_requests/3"))
            .and(query_param("compute_metrics", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": 3, "iid": 3, "project_id": 2,
                "diff_stats": { "additions": 100, "deletions": 50, "total": 150 }
            })))
            .expect(1)
            .mount(&server)
            .await;
        let (service, _temp_dir) = create_test_service(&server);

        let metrics = service.user_metrics("42", false).await.unwrap();

        assert_eq!(metrics.commits, 8);
        assert_eq!(metrics.issues_opened, 1);
        assert_eq!(metrics.issues_closed, 1);
        assert_eq!(metrics.code_reviews, 2);
        assert_eq!(metrics.merge_requests_opened, 2);
        assert_eq!(metrics.merge_requests_merged, 1);
        assert_eq!(metrics.lines_added, 100);
        assert_eq!(metrics.lines_deleted, 50);
        assert_eq!(metrics.lines_net, 50);
        assert_eq!(metrics.contributed_projects.len(), 2);
    }

    #[tokio::test]
    async fn test_user_metrics_skips_failed_merge_request_details() {
        let server = MockServer::start().await;
        mount_json(&server, "/users/42/events", json!([])).await;
        mount_user_merge_requests(&server).await;
        Mock::given(method("GET"))
            .and(path("/projects/2/merge_requests/3"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let (service, _temp_dir) = create_test_service(&server);

        let metrics = service.user_metrics("42", false).await.unwrap();

        assert_eq!(metrics.lines_added, 0);
        assert_eq!(metrics.lines_net, 0);
        assert_eq!(metrics.merge_requests_merged, 1);
    }

    #[tokio::test]
    async fn test_user_metrics_surfaces_listing_failures() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/users/42/events"))
            .respond_with(ResponseTemplate::new(401))
            .mount(&server)
            .await;
        mount_user_merge_requests(&server).await;
        let (service, _temp_dir) = create_test_service(&server);

        let result = service.user_metrics("42", false).await;

        assert!(matches!(result, Err(FetchError::Status { .. })));
    }

    #[tokio::test]
    async fn test_project_metrics_reuses_cache() {
        let server = MockServer::start().await;
        mount_json(&server, "/projects/5/events", json!([])).await;
        mount_json(&server, "/projects/5/repository/commits", json!([
            { "id": "a", "author_name": "Ada", "author_email": "ada@example.com", "stats": { "additions": 2, "deletions": 1, "total": 3 } }
        ]))
        .await;
        mount_json(&server, "/projects/5/merge_requests", json!([])).await;
        mount_json(&server, "/projects/5/members/all", json!([])).await;
        let (service, _temp_dir) = create_test_service(&server);

        let first = service.project_metrics("5", false).await.unwrap();
        let requests_after_first = server.received_requests().await.unwrap().len();
        let second = service.project_metrics("5", false).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.total_lines_net, 1);
        assert_eq!(requests_after_first, 5);
        assert_eq!(server.received_requests().await.unwrap().len(), 5);
    }
}
