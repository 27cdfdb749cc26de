use async_trait::async_trait;
use chrono::{Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use jiggl::database::Database;
use jiggl::dates::DateRange;
use jiggl::issue_key::IssueKeyParser;
use jiggl::models::*;
use jiggl::repository::TimeEntryRepository;
use jiggl::report::{build_detailed, rows_from_linked};
use jiggl::source::{FetchError, IssueSource, TimeEntrySource};
use jiggl::sync::{entry_from_payload, SyncJob};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

struct FakeToggl {
    entries: Vec<TogglEntry>,
    timezone: Tz,
}

#[async_trait]
impl TimeEntrySource for FakeToggl {
    async fn fetch_time_entries(&self, range: &DateRange, _group: Option<i64>) -> Result<Vec<TogglEntry>, FetchError> {
        Ok(self
            .entries
            .iter()
            .filter(|entry| {
                entry.start >= range.start_utc(self.timezone) && entry.start < range.end_utc(self.timezone)
            })
            .cloned()
            .collect())
    }

    async fn fetch_summary(&self, _range: &DateRange, _group: Option<i64>) -> Result<TogglSummaryResponse, FetchError> {
        Ok(TogglSummaryResponse {
            total_grand: None,
            data: Vec::new(),
        })
    }

    async fn fetch_groups(&self) -> Result<Vec<TogglGroup>, FetchError> {
        Ok(vec![TogglGroup {
            id: 5,
            wid: 1,
            name: "Developers".to_string(),
        }])
    }

    async fn fetch_workspace_users(&self) -> Result<Vec<TogglWorkspaceUser>, FetchError> {
        Ok(vec![TogglWorkspaceUser {
            uid: 7,
            name: Some("bob".to_string()),
            email: None,
            group_ids: Some(vec![5]),
        }])
    }
}

#[derive(Default)]
struct FakeJira {
    issues: HashMap<String, Issue>,
    calls: AtomicUsize,
}

#[async_trait]
impl IssueSource for FakeJira {
    async fn fetch_issue(&self, key: &str) -> Result<Issue, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.issues
            .get(key)
            .cloned()
            .ok_or_else(|| FetchError::NotFound(key.to_string()))
    }
}

fn jira_issue(id: i64, key: &str, type_name: &str) -> Issue {
    Issue {
        id,
        key: key.to_string(),
        issue_type: IssueType {
            id: if type_name == "Epic" { 10000 } else { 10001 },
            name: type_name.to_string(),
            subtask: type_name == "Sub-task",
        },
        created: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        updated: None,
        summary: format!("Summary of {}", key),
        project: Project {
            id: 10000,
            key: "APP".to_string(),
            name: "Application".to_string(),
        },
        impact: None,
        epic_key: None,
        epic_id: None,
        parent_key: None,
        parent_id: None,
        support_request_type: None,
        is_roadmap_item: false,
        components: Vec::new(),
        drivers: Vec::new(),
        client_labels: Vec::new(),
        product_labels: Vec::new(),
        user_types: Vec::new(),
    }
}

fn toggl_entry(id: i64, description: &str, hours: i64) -> TogglEntry {
    let start = Utc.with_ymd_and_hms(2024, 3, 7, 9, 0, 0).unwrap() + Duration::hours(id);
    TogglEntry {
        id,
        pid: Some(1),
        tid: None,
        uid: 7,
        description: Some(description.to_string()),
        start,
        end: Some(start + Duration::hours(hours)),
        dur: hours * 3_600_000,
        user: "bob".to_string(),
        project: Some("Dev - App".to_string()),
    }
}

fn fixtures() -> (FakeToggl, FakeJira) {
    let toggl = FakeToggl {
        entries: vec![
            toggl_entry(1, "APP-11 wire up the form", 1),
            toggl_entry(2, "APP-11 more form work", 2),
            toggl_entry(3, "123 tidy up", 1),
            toggl_entry(4, "APP-999 typo in key", 1),
            toggl_entry(5, "standup", 1),
        ],
        timezone: Tz::UTC,
    };

    let mut epic = jira_issue(9, "APP-9", "Epic");
    epic.is_roadmap_item = true;
    let mut story = jira_issue(10, "APP-10", "Story");
    story.epic_key = Some("APP-9".to_string());
    let mut subtask = jira_issue(11, "APP-11", "Sub-task");
    subtask.parent_key = Some("APP-10".to_string());
    let loose = jira_issue(123, "APP-123", "Task");

    let jira = FakeJira {
        issues: [epic, story, subtask, loose]
            .into_iter()
            .map(|issue| (issue.key.clone(), issue))
            .collect(),
        ..FakeJira::default()
    };
    (toggl, jira)
}

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 3, 8).unwrap()
}

#[tokio::test]
async fn full_sync_links_entries_through_the_hierarchy() {
    let database = Database::open_in_memory().await.unwrap();
    let (toggl, jira) = fixtures();

    let mut job = SyncJob::new(&toggl, jira, &database, IssueKeyParser::new("APP"), None);
    job.run_sync(today()).await.unwrap();

    // APP-11, APP-123, APP-999, then APP-10 and APP-9 once each.
    assert_eq!(job.resolver().source().calls.load(Ordering::SeqCst), 5);

    let subtask = database.get_issue(11).await.unwrap().unwrap();
    assert_eq!(subtask.parent_id, Some(10));
    assert_eq!(subtask.epic_key.as_deref(), Some("APP-9"));
    assert_eq!(subtask.epic_id, Some(9));
    assert!(subtask.is_roadmap_item);

    let story = database.get_issue(10).await.unwrap().unwrap();
    assert_eq!(story.epic_id, Some(9));
    assert!(story.is_roadmap_item);

    assert!(!database.get_issue(123).await.unwrap().unwrap().is_roadmap_item);

    let entry = database.get_entry(3).await.unwrap().unwrap();
    assert_eq!(entry.issue_key.as_deref(), Some("APP-123"));
    assert_eq!(entry.issue_id, Some(123));

    let bad = database.get_entry(4).await.unwrap().unwrap();
    assert_eq!(bad.issue_id, None);
    assert_eq!(bad.error, Some(ErrorCode::BadIssueKey));

    assert_eq!(database.get_group_members(5).await.unwrap(), vec![7]);
}

#[tokio::test]
async fn a_second_sync_leaves_the_same_state() {
    let database = Database::open_in_memory().await.unwrap();
    let (toggl, jira) = fixtures();
    let mut job = SyncJob::new(&toggl, jira, &database, IssueKeyParser::new("APP"), None);

    job.run_sync(today()).await.unwrap();
    let mut first = Vec::new();
    for id in [9, 10, 11, 123] {
        first.push(database.get_issue(id).await.unwrap());
    }

    job.run_sync(today()).await.unwrap();
    let mut second = Vec::new();
    for id in [9, 10, 11, 123] {
        second.push(database.get_issue(id).await.unwrap());
    }

    assert_eq!(first, second);
    assert_eq!(
        database.get_entry(4).await.unwrap().and_then(|e| e.error),
        Some(ErrorCode::BadIssueKey)
    );
}

#[tokio::test]
async fn stored_entries_render_as_a_detailed_report() {
    let database = Database::open_in_memory().await.unwrap();
    let (toggl, jira) = fixtures();
    SyncJob::new(&toggl, jira, &database, IssueKeyParser::new("APP"), None)
        .run_sync(today())
        .await
        .unwrap();

    let range = DateRange::single(NaiveDate::from_ymd_opt(2024, 3, 7).unwrap());
    let entries = database.get_entries_between(&range, Tz::UTC, Some(5)).await.unwrap();
    let text = build_detailed(rows_from_linked(&entries), &range).to_string();

    assert!(text.starts_with("Toggl Summary 2024-03-07\n"));
    assert!(text.contains("bob: 6\n"));
    assert!(text.contains("[APP-11] Summary of APP-11 - 3 (App)"));
    assert!(text.contains("[APP-123] Summary of APP-123 - 1 (App)"));
    assert!(text.contains("* APP-999 typo in key - 1 (App)"));
    assert!(text.contains("* standup - 1 (App)"));
    assert!(!text.contains("Entries needing fixing"));
}

#[tokio::test]
async fn entry_pulls_cut_days_at_local_midnight() {
    let database = Database::open_in_memory().await.unwrap();
    let parser = IssueKeyParser::new("APP");
    // 22:00 UTC on the 7th is already the 8th in Brisbane.
    for id in [13, 30] {
        let stale = entry_from_payload(toggl_entry(id, "removed in Toggl", 1), &parser);
        database.upsert_entry(&stale).await.unwrap();
    }

    let brisbane = Tz::Australia__Brisbane;
    let toggl = FakeToggl {
        entries: vec![toggl_entry(20, "standup", 1)],
        timezone: brisbane,
    };
    let range = DateRange::single(NaiveDate::from_ymd_opt(2024, 3, 8).unwrap());
    SyncJob::new(&toggl, FakeJira::default(), &database, parser, None)
        .with_timezone(brisbane)
        .pull_time_entries(&range)
        .await
        .unwrap();

    assert!(database.get_entry(13).await.unwrap().is_none());
    assert!(database.get_entry(30).await.unwrap().is_some());
    let stored = database.get_entries_between(&range, brisbane, None).await.unwrap();
    assert_eq!(stored.iter().map(|e| e.entry.id).collect::<Vec<_>>(), vec![20]);
}
