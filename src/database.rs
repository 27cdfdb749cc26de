use crate::dates::DateRange;
use crate::models::*;
use crate::repository::{IssueRepository, TimeEntryRepository};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use rusqlite::{params, Connection, OptionalExtension, Row, Transaction};
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DatabaseError {
    #[error("Failed to create storage directory: {0}")]
    StorageCreation(#[from] std::io::Error),
    #[error("SQLite error: {0}")]
    Sqlite(String),
    #[error("Issue {0} vanished after it was written")]
    MissingIssue(i64),
}

impl From<tokio_rusqlite::Error> for DatabaseError {
    fn from(err: tokio_rusqlite::Error) -> Self {
        DatabaseError::Sqlite(err.to_string())
    }
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        DatabaseError::Sqlite(err.to_string())
    }
}

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS toggl_groups (
        id INTEGER NOT NULL PRIMARY KEY,
        wid INTEGER NOT NULL,
        name TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS toggl_users (
        id INTEGER NOT NULL PRIMARY KEY,
        name TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS toggl_group_members (
        group_id INTEGER NOT NULL REFERENCES toggl_groups(id),
        user_id INTEGER NOT NULL REFERENCES toggl_users(id),
        PRIMARY KEY (group_id, user_id)
    );
    CREATE TABLE IF NOT EXISTS jira_projects (
        id INTEGER NOT NULL PRIMARY KEY,
        key TEXT NOT NULL,
        name TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS jira_issue_types (
        id INTEGER NOT NULL PRIMARY KEY,
        name TEXT NOT NULL,
        subtask INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS jira_impacts (
        id INTEGER NOT NULL PRIMARY KEY,
        name TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS jira_support_request_types (
        id INTEGER NOT NULL PRIMARY KEY,
        name TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS jira_components (
        id INTEGER NOT NULL PRIMARY KEY,
        name TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS jira_drivers (
        id INTEGER NOT NULL PRIMARY KEY,
        name TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS jira_user_types (
        id INTEGER NOT NULL PRIMARY KEY,
        name TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS jira_client_labels (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS jira_product_labels (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        name TEXT NOT NULL UNIQUE
    );
    CREATE TABLE IF NOT EXISTS jira_issues (
        id INTEGER NOT NULL PRIMARY KEY,
        key TEXT NOT NULL UNIQUE,
        issue_type_id INTEGER NOT NULL REFERENCES jira_issue_types(id),
        created DATETIME NOT NULL,
        updated DATETIME,
        summary TEXT NOT NULL,
        project_id INTEGER NOT NULL REFERENCES jira_projects(id),
        impact_id INTEGER REFERENCES jira_impacts(id),
        epic_key TEXT,
        epic_id INTEGER REFERENCES jira_issues(id),
        epic_error TEXT,
        parent_key TEXT,
        parent_id INTEGER REFERENCES jira_issues(id),
        parent_error TEXT,
        support_request_type_id INTEGER REFERENCES jira_support_request_types(id),
        is_roadmap_item INTEGER NOT NULL DEFAULT 0,
        CHECK (epic_id IS NULL OR epic_id <> id),
        CHECK (parent_id IS NULL OR parent_id <> id)
    );
    CREATE INDEX IF NOT EXISTS idx_jira_issues_epic ON jira_issues(epic_id);
    CREATE INDEX IF NOT EXISTS idx_jira_issues_parent ON jira_issues(parent_id);
    CREATE TABLE IF NOT EXISTS jira_issue_components (
        issue_id INTEGER NOT NULL REFERENCES jira_issues(id),
        component_id INTEGER NOT NULL REFERENCES jira_components(id),
        PRIMARY KEY (issue_id, component_id)
    );
    CREATE TABLE IF NOT EXISTS jira_issue_drivers (
        issue_id INTEGER NOT NULL REFERENCES jira_issues(id),
        driver_id INTEGER NOT NULL REFERENCES jira_drivers(id),
        PRIMARY KEY (issue_id, driver_id)
    );
    CREATE TABLE IF NOT EXISTS jira_issue_user_types (
        issue_id INTEGER NOT NULL REFERENCES jira_issues(id),
        user_type_id INTEGER NOT NULL REFERENCES jira_user_types(id),
        PRIMARY KEY (issue_id, user_type_id)
    );
    CREATE TABLE IF NOT EXISTS jira_issue_client_labels (
        issue_id INTEGER NOT NULL REFERENCES jira_issues(id),
        label_id INTEGER NOT NULL REFERENCES jira_client_labels(id),
        PRIMARY KEY (issue_id, label_id)
    );
    CREATE TABLE IF NOT EXISTS jira_issue_product_labels (
        issue_id INTEGER NOT NULL REFERENCES jira_issues(id),
        label_id INTEGER NOT NULL REFERENCES jira_product_labels(id),
        PRIMARY KEY (issue_id, label_id)
    );
    CREATE TABLE IF NOT EXISTS toggl_entries (
        id INTEGER NOT NULL PRIMARY KEY,
        user_id INTEGER NOT NULL,
        user TEXT NOT NULL,
        project_id INTEGER,
        project TEXT,
        task_id INTEGER,
        description TEXT,
        started_at DATETIME NOT NULL,
        ended_at DATETIME NOT NULL,
        duration_ms INTEGER NOT NULL,
        issue_key TEXT,
        issue_id INTEGER REFERENCES jira_issues(id),
        error TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_toggl_entries_started_at ON toggl_entries(started_at);
    CREATE INDEX IF NOT EXISTS idx_toggl_entries_issue ON toggl_entries(issue_id);
";

const ISSUE_SELECT: &str = "
    SELECT
        i.id, i.key, i.created, i.updated, i.summary,
        i.epic_key, i.epic_id, i.parent_key, i.parent_id, i.is_roadmap_item,
        t.id AS type_id, t.name AS type_name, t.subtask AS type_subtask,
        p.id AS project_id, p.key AS project_key, p.name AS project_name,
        im.id AS impact_id, im.name AS impact_name,
        rt.id AS request_type_id, rt.name AS request_type_name
    FROM jira_issues i
    JOIN jira_issue_types t ON t.id = i.issue_type_id
    JOIN jira_projects p ON p.id = i.project_id
    LEFT JOIN jira_impacts im ON im.id = i.impact_id
    LEFT JOIN jira_support_request_types rt ON rt.id = i.support_request_type_id
";

const UPSERT_ISSUE: &str = "
    INSERT INTO jira_issues (
        id, key, issue_type_id, created, updated, summary, project_id, impact_id,
        epic_key, parent_key, support_request_type_id, is_roadmap_item
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
    ON CONFLICT(id) DO UPDATE SET
        key = excluded.key,
        issue_type_id = excluded.issue_type_id,
        created = excluded.created,
        updated = excluded.updated,
        summary = excluded.summary,
        project_id = excluded.project_id,
        impact_id = excluded.impact_id,
        support_request_type_id = excluded.support_request_type_id,
        is_roadmap_item = excluded.is_roadmap_item,
        epic_id = CASE WHEN jira_issues.epic_key IS excluded.epic_key THEN jira_issues.epic_id END,
        epic_error = CASE WHEN jira_issues.epic_key IS excluded.epic_key THEN jira_issues.epic_error END,
        epic_key = excluded.epic_key,
        parent_id = CASE WHEN jira_issues.parent_key IS excluded.parent_key THEN jira_issues.parent_id END,
        parent_error = CASE WHEN jira_issues.parent_key IS excluded.parent_key THEN jira_issues.parent_error END,
        parent_key = excluded.parent_key
";

const UPSERT_ENTRY: &str = "
    INSERT INTO toggl_entries (
        id, user_id, user, project_id, project, task_id, description,
        started_at, ended_at, duration_ms, issue_key
    )
    VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
    ON CONFLICT(id) DO UPDATE SET
        user_id = excluded.user_id,
        user = excluded.user,
        project_id = excluded.project_id,
        project = excluded.project,
        task_id = excluded.task_id,
        description = excluded.description,
        started_at = excluded.started_at,
        ended_at = excluded.ended_at,
        duration_ms = excluded.duration_ms,
        issue_id = CASE WHEN toggl_entries.issue_key IS excluded.issue_key THEN toggl_entries.issue_id END,
        error = CASE WHEN toggl_entries.issue_key IS excluded.issue_key THEN toggl_entries.error END,
        issue_key = excluded.issue_key
";

pub struct Database {
    connection: tokio_rusqlite::Connection,
}

impl Database {
    pub async fn new(path: &str) -> Result<Self, DatabaseError> {
        if let Some(directory) = Path::new(path).parent() {
            if !directory.as_os_str().is_empty() && !directory.exists() {
                fs::create_dir_all(directory)?;
            }
        }
        let connection = tokio_rusqlite::Connection::open(path).await?;
        let db = Database { connection };
        db._init_database().await?;
        Ok(db)
    }

    pub async fn open_in_memory() -> Result<Self, DatabaseError> {
        let connection = tokio_rusqlite::Connection::open_in_memory().await?;
        let db = Database { connection };
        db._init_database().await?;
        Ok(db)
    }

    async fn _init_database(&self) -> Result<(), DatabaseError> {
        self.connection
            .call(|conn| {
                conn.execute_batch(SCHEMA)
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(())
    }

    pub async fn upsert_group(&self, group: &TogglGroup) -> Result<(), DatabaseError> {
        let query = "
            INSERT INTO toggl_groups (id, wid, name)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(id) DO UPDATE SET
                wid = excluded.wid,
                name = excluded.name
        ";
        let (id, wid, name) = (group.id, group.wid, group.name.clone());

        self.connection
            .call(move |conn| {
                conn.execute(query, params![id, wid, name])
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(())
    }

    /// Stores the user and replaces its group memberships with `group_ids`.
    pub async fn upsert_user(&self, id: i64, name: &str, group_ids: &[i64]) -> Result<(), DatabaseError> {
        let name = name.to_string();
        let group_ids = group_ids.to_vec();

        self.connection
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO toggl_users (id, name) VALUES (?1, ?2)
                     ON CONFLICT(id) DO UPDATE SET name = excluded.name",
                    params![id, name],
                )?;
                tx.execute("DELETE FROM toggl_group_members WHERE user_id = ?1", [id])?;
                for group_id in &group_ids {
                    tx.execute(
                        "INSERT OR IGNORE INTO toggl_group_members (group_id, user_id) VALUES (?1, ?2)",
                        params![group_id, id],
                    )?;
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    pub async fn get_group_members(&self, group_id: i64) -> Result<Vec<i64>, DatabaseError> {
        let members = self
            .connection
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT user_id FROM toggl_group_members WHERE group_id = ?1 ORDER BY user_id",
                )?;
                let rows = stmt.query_map([group_id], |row| row.get::<_, i64>(0))?;
                rows.collect::<Result<Vec<_>, _>>()
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(members)
    }

    pub async fn get_issue(&self, id: i64) -> Result<Option<Issue>, DatabaseError> {
        let issue = self
            .connection
            .call(move |conn| read_issue(conn, id).map_err(tokio_rusqlite::Error::Rusqlite))
            .await?;
        Ok(issue)
    }

    pub async fn get_issue_by_key(&self, key: &str) -> Result<Option<Issue>, DatabaseError> {
        let key = key.to_string();
        let issue = self
            .connection
            .call(move |conn| {
                let tx = conn.transaction()?;
                let id = tx
                    .query_row("SELECT id FROM jira_issues WHERE key = ?1", [&key], |row| {
                        row.get::<_, i64>(0)
                    })
                    .optional()?;
                let issue = match id {
                    Some(id) => read_issue(&tx, id)?,
                    None => None,
                };
                tx.commit()?;
                Ok(issue)
            })
            .await?;
        Ok(issue)
    }

    pub async fn get_entry(&self, id: i64) -> Result<Option<TimeEntry>, DatabaseError> {
        let entry = self
            .connection
            .call(move |conn| {
                conn.query_row(
                    &format!("{} WHERE id = ?1", ENTRY_SELECT),
                    [id],
                    entry_from_row,
                )
                .optional()
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(entry)
    }

    /// Entries starting inside `range`, its days taken in `timezone`, each
    /// with its linked issue. With a
    /// group given, only entries of that group's members are returned.
    pub async fn get_entries_between(
        &self,
        range: &DateRange,
        timezone: Tz,
        group: Option<i64>,
    ) -> Result<Vec<LinkedEntry>, DatabaseError> {
        let (since, until) = (range.start_utc(timezone), range.end_utc(timezone));

        let linked = self
            .connection
            .call(move |conn| {
                let tx = conn.transaction()?;
                let entries = {
                    let mut stmt = tx.prepare_cached(&format!(
                        "{} WHERE started_at >= ?1 AND started_at < ?2
                            AND (?3 IS NULL OR user_id IN (
                                SELECT user_id FROM toggl_group_members WHERE group_id = ?3
                            ))
                         ORDER BY started_at, id",
                        ENTRY_SELECT
                    ))?;
                    let rows = stmt.query_map(params![since, until, group], entry_from_row)?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };

                let mut issues: HashMap<i64, Option<Issue>> = HashMap::new();
                let mut linked = Vec::with_capacity(entries.len());
                for entry in entries {
                    let issue = match entry.issue_id {
                        Some(issue_id) => {
                            if !issues.contains_key(&issue_id) {
                                issues.insert(issue_id, read_issue(&tx, issue_id)?);
                            }
                            issues.get(&issue_id).cloned().flatten()
                        }
                        None => None,
                    };
                    linked.push(LinkedEntry { entry, issue });
                }
                tx.commit()?;
                Ok(linked)
            })
            .await?;
        Ok(linked)
    }
}

#[async_trait]
impl IssueRepository for Database {
    async fn find_unlinked(&self, relation: Relation) -> Result<Vec<UnlinkedRow>, DatabaseError> {
        let query = format!(
            "SELECT id, {key} FROM jira_issues WHERE {key} IS NOT NULL ORDER BY id",
            key = relation.key_column(),
        );
        let rows = self
            .connection
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&query)?;
                let rows = stmt.query_map([], |row| {
                    Ok(UnlinkedRow {
                        id: row.get(0)?,
                        key: row.get(1)?,
                    })
                })?;
                rows.collect::<Result<Vec<_>, _>>()
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(rows)
    }

    async fn upsert_issue(&self, issue: &Issue) -> Result<Issue, DatabaseError> {
        let issue = issue.clone();
        let id = issue.id;

        let stored = self
            .connection
            .call(move |conn| {
                let tx = conn.transaction()?;
                write_issue(&tx, &issue)?;
                let stored = read_issue(&tx, issue.id)?;
                tx.commit()?;
                Ok(stored)
            })
            .await?;
        stored.ok_or(DatabaseError::MissingIssue(id))
    }

    async fn link_rows(&self, relation: Relation, ids: &[i64], target: i64) -> Result<(), DatabaseError> {
        let query = format!(
            "UPDATE jira_issues SET {id_column} = ?1, {error} = NULL WHERE id = ?2 AND id <> ?1",
            id_column = relation.id_column(),
            error = relation.error_column(),
        );
        self.update_each(query, ids.to_vec(), move |stmt, id| stmt.execute(params![target, id]))
            .await
    }

    async fn flag_rows(&self, relation: Relation, ids: &[i64], code: ErrorCode) -> Result<(), DatabaseError> {
        let query = format!(
            "UPDATE jira_issues SET {error} = ?1 WHERE id = ?2",
            error = relation.error_column(),
        );
        self.update_each(query, ids.to_vec(), move |stmt, id| {
            stmt.execute(params![code.as_str(), id])
        })
        .await
    }

    async fn bulk_update_flags(
        &self,
        selector: IssueSelector,
        fields: &PropagatedFields,
    ) -> Result<usize, DatabaseError> {
        let fields = fields.clone();

        let updated = self
            .connection
            .call(move |conn| {
                let tx = conn.transaction()?;
                let updated = match selector {
                    IssueSelector::EpicId(epic_id) => tx.execute(
                        "UPDATE jira_issues SET is_roadmap_item = ?1 WHERE epic_id = ?2 AND id <> ?2",
                        params![fields.is_roadmap_item, epic_id],
                    )?,
                    IssueSelector::ParentId(parent_id) => {
                        // A child with an epic of its own takes the flag from that epic.
                        let updated = tx.execute(
                            "UPDATE jira_issues SET is_roadmap_item = ?1
                             WHERE parent_id = ?2 AND id <> ?2
                                AND (epic_id IS NULL OR epic_id IS ?3)",
                            params![fields.is_roadmap_item, parent_id, fields.epic_id],
                        )?;
                        if let Some(epic_key) = &fields.epic_key {
                            tx.execute(
                                "UPDATE jira_issues SET
                                    epic_id = CASE WHEN epic_key IS ?1 THEN COALESCE(?2, epic_id) ELSE ?2 END,
                                    epic_key = ?1
                                 WHERE parent_id = ?3
                                    AND (epic_key IS NULL OR epic_key = ?1)
                                    AND id <> ?3
                                    AND (?2 IS NULL OR id <> ?2)",
                                params![epic_key, fields.epic_id, parent_id],
                            )?;
                        }
                        updated
                    }
                };
                tx.commit()?;
                Ok(updated)
            })
            .await?;
        Ok(updated)
    }

    async fn find_referenced(&self, relation: Relation) -> Result<Vec<Issue>, DatabaseError> {
        let query = format!(
            "SELECT DISTINCT {id_column} FROM jira_issues WHERE {id_column} IS NOT NULL ORDER BY {id_column}",
            id_column = relation.id_column(),
        );
        let issues = self
            .connection
            .call(move |conn| {
                let tx = conn.transaction()?;
                let ids = {
                    let mut stmt = tx.prepare_cached(&query)?;
                    let rows = stmt.query_map([], |row| row.get::<_, i64>(0))?;
                    rows.collect::<Result<Vec<_>, _>>()?
                };
                let mut issues = Vec::with_capacity(ids.len());
                for id in ids {
                    if let Some(issue) = read_issue(&tx, id)? {
                        issues.push(issue);
                    }
                }
                tx.commit()?;
                Ok(issues)
            })
            .await?;
        Ok(issues)
    }
}

#[async_trait]
impl TimeEntryRepository for Database {
    async fn delete_between(&self, since: DateTime<Utc>, until: DateTime<Utc>) -> Result<usize, DatabaseError> {
        let deleted = self
            .connection
            .call(move |conn| {
                conn.execute(
                    "DELETE FROM toggl_entries WHERE started_at >= ?1 AND started_at < ?2",
                    params![since, until],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(deleted)
    }

    async fn upsert_entry(&self, entry: &TimeEntry) -> Result<(), DatabaseError> {
        let entry = entry.clone();

        self.connection
            .call(move |conn| {
                conn.execute(
                    UPSERT_ENTRY,
                    params![
                        entry.id,
                        entry.user_id,
                        entry.user,
                        entry.project_id,
                        entry.project,
                        entry.task_id,
                        entry.description,
                        entry.start,
                        entry.end,
                        entry.duration_ms,
                        entry.issue_key,
                    ],
                )
                .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(())
    }

    async fn find_with_unlinked_issue_key(&self) -> Result<Vec<UnlinkedRow>, DatabaseError> {
        let rows = self
            .connection
            .call(|conn| {
                let mut stmt = conn.prepare_cached(
                    "SELECT id, issue_key FROM toggl_entries
                     WHERE issue_key IS NOT NULL AND issue_id IS NULL
                     ORDER BY id",
                )?;
                let rows = stmt.query_map([], |row| {
                    Ok(UnlinkedRow {
                        id: row.get(0)?,
                        key: row.get(1)?,
                    })
                })?;
                rows.collect::<Result<Vec<_>, _>>()
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await?;
        Ok(rows)
    }

    async fn link_entries(&self, ids: &[i64], issue_id: i64) -> Result<(), DatabaseError> {
        self.update_each(
            "UPDATE toggl_entries SET issue_id = ?1, error = NULL WHERE id = ?2".to_string(),
            ids.to_vec(),
            move |stmt, id| stmt.execute(params![issue_id, id]),
        )
        .await
    }

    async fn flag_entries(&self, ids: &[i64], code: ErrorCode) -> Result<(), DatabaseError> {
        self.update_each(
            "UPDATE toggl_entries SET error = ?1 WHERE id = ?2".to_string(),
            ids.to_vec(),
            move |stmt, id| stmt.execute(params![code.as_str(), id]),
        )
        .await
    }
}

impl Database {
    /// Runs `query` once per id inside a single transaction.
    async fn update_each<F>(&self, query: String, ids: Vec<i64>, execute: F) -> Result<(), DatabaseError>
    where
        F: Fn(&mut rusqlite::CachedStatement<'_>, i64) -> rusqlite::Result<usize> + Send + 'static,
    {
        if ids.is_empty() {
            return Ok(());
        }
        self.connection
            .call(move |conn| {
                let tx = conn.transaction()?;
                {
                    let mut stmt = tx.prepare_cached(&query)?;
                    for id in ids {
                        execute(&mut stmt, id)?;
                    }
                }
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }
}

const ENTRY_SELECT: &str = "
    SELECT id, user_id, user, project_id, project, task_id, description,
           started_at, ended_at, duration_ms, issue_key, issue_id, error
    FROM toggl_entries
";

fn entry_from_row(row: &Row<'_>) -> rusqlite::Result<TimeEntry> {
    Ok(TimeEntry {
        id: row.get("id")?,
        user_id: row.get("user_id")?,
        user: row.get("user")?,
        project_id: row.get("project_id")?,
        project: row.get("project")?,
        task_id: row.get("task_id")?,
        description: row.get("description")?,
        start: row.get("started_at")?,
        end: row.get("ended_at")?,
        duration_ms: row.get("duration_ms")?,
        issue_key: row.get("issue_key")?,
        issue_id: row.get("issue_id")?,
        error: row
            .get::<_, Option<String>>("error")?
            .as_deref()
            .and_then(ErrorCode::parse),
    })
}

fn write_issue(tx: &Transaction<'_>, issue: &Issue) -> rusqlite::Result<()> {
    tx.execute(
        "INSERT INTO jira_projects (id, key, name) VALUES (?1, ?2, ?3) ON CONFLICT(id) DO NOTHING",
        params![issue.project.id, issue.project.key, issue.project.name],
    )?;
    tx.execute(
        "INSERT INTO jira_issue_types (id, name, subtask) VALUES (?1, ?2, ?3) ON CONFLICT(id) DO NOTHING",
        params![issue.issue_type.id, issue.issue_type.name, issue.issue_type.subtask],
    )?;
    if let Some(impact) = &issue.impact {
        insert_named(tx, "jira_impacts", impact)?;
    }
    if let Some(request_type) = &issue.support_request_type {
        insert_named(tx, "jira_support_request_types", request_type)?;
    }

    tx.execute(
        UPSERT_ISSUE,
        params![
            issue.id,
            issue.key,
            issue.issue_type.id,
            issue.created,
            issue.updated,
            issue.summary,
            issue.project.id,
            issue.impact.as_ref().map(|impact| impact.id),
            issue.epic_key,
            issue.parent_key,
            issue.support_request_type.as_ref().map(|request_type| request_type.id),
            issue.is_roadmap_item,
        ],
    )?;

    replace_named(tx, "jira_components", "jira_issue_components", "component_id", issue.id, &issue.components)?;
    replace_named(tx, "jira_drivers", "jira_issue_drivers", "driver_id", issue.id, &issue.drivers)?;
    replace_named(tx, "jira_user_types", "jira_issue_user_types", "user_type_id", issue.id, &issue.user_types)?;
    replace_labels(tx, "jira_client_labels", "jira_issue_client_labels", issue.id, &issue.client_labels)?;
    replace_labels(tx, "jira_product_labels", "jira_issue_product_labels", issue.id, &issue.product_labels)?;
    Ok(())
}

fn insert_named(tx: &Transaction<'_>, table: &str, named: &Named) -> rusqlite::Result<()> {
    tx.execute(
        &format!("INSERT INTO {} (id, name) VALUES (?1, ?2) ON CONFLICT(id) DO NOTHING", table),
        params![named.id, named.name],
    )?;
    Ok(())
}

fn replace_named(
    tx: &Transaction<'_>,
    table: &str,
    join_table: &str,
    column: &str,
    issue_id: i64,
    values: &[Named],
) -> rusqlite::Result<()> {
    tx.execute(&format!("DELETE FROM {} WHERE issue_id = ?1", join_table), [issue_id])?;
    for named in values {
        insert_named(tx, table, named)?;
        tx.execute(
            &format!("INSERT OR IGNORE INTO {} (issue_id, {}) VALUES (?1, ?2)", join_table, column),
            params![issue_id, named.id],
        )?;
    }
    Ok(())
}

fn replace_labels(
    tx: &Transaction<'_>,
    table: &str,
    join_table: &str,
    issue_id: i64,
    labels: &[String],
) -> rusqlite::Result<()> {
    tx.execute(&format!("DELETE FROM {} WHERE issue_id = ?1", join_table), [issue_id])?;
    for label in labels {
        tx.execute(
            &format!("INSERT INTO {} (name) VALUES (?1) ON CONFLICT(name) DO NOTHING", table),
            [label],
        )?;
        let label_id: i64 = tx.query_row(
            &format!("SELECT id FROM {} WHERE name = ?1", table),
            [label],
            |row| row.get(0),
        )?;
        tx.execute(
            &format!("INSERT OR IGNORE INTO {} (issue_id, label_id) VALUES (?1, ?2)", join_table),
            params![issue_id, label_id],
        )?;
    }
    Ok(())
}

fn read_issue(conn: &Connection, id: i64) -> rusqlite::Result<Option<Issue>> {
    let issue = conn
        .query_row(&format!("{} WHERE i.id = ?1", ISSUE_SELECT), [id], |row| {
            Ok(Issue {
                id: row.get("id")?,
                key: row.get("key")?,
                issue_type: IssueType {
                    id: row.get("type_id")?,
                    name: row.get("type_name")?,
                    subtask: row.get("type_subtask")?,
                },
                created: row.get("created")?,
                updated: row.get("updated")?,
                summary: row.get("summary")?,
                project: Project {
                    id: row.get("project_id")?,
                    key: row.get("project_key")?,
                    name: row.get("project_name")?,
                },
                impact: named_columns(row, "impact_id", "impact_name")?,
                epic_key: row.get("epic_key")?,
                epic_id: row.get("epic_id")?,
                parent_key: row.get("parent_key")?,
                parent_id: row.get("parent_id")?,
                support_request_type: named_columns(row, "request_type_id", "request_type_name")?,
                is_roadmap_item: row.get("is_roadmap_item")?,
                components: Vec::new(),
                drivers: Vec::new(),
                client_labels: Vec::new(),
                product_labels: Vec::new(),
                user_types: Vec::new(),
            })
        })
        .optional()?;

    let Some(mut issue) = issue else {
        return Ok(None);
    };
    issue.components = read_named(conn, "jira_components", "jira_issue_components", "component_id", id)?;
    issue.drivers = read_named(conn, "jira_drivers", "jira_issue_drivers", "driver_id", id)?;
    issue.user_types = read_named(conn, "jira_user_types", "jira_issue_user_types", "user_type_id", id)?;
    issue.client_labels = read_labels(conn, "jira_client_labels", "jira_issue_client_labels", id)?;
    issue.product_labels = read_labels(conn, "jira_product_labels", "jira_issue_product_labels", id)?;
    Ok(Some(issue))
}

fn named_columns(row: &Row<'_>, id: &str, name: &str) -> rusqlite::Result<Option<Named>> {
    let id: Option<i64> = row.get(id)?;
    let name: Option<String> = row.get(name)?;
    Ok(id.zip(name).map(|(id, name)| Named { id, name }))
}

fn read_named(
    conn: &Connection,
    table: &str,
    join_table: &str,
    column: &str,
    issue_id: i64,
) -> rusqlite::Result<Vec<Named>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT v.id, v.name FROM {table} v
         JOIN {join_table} j ON j.{column} = v.id
         WHERE j.issue_id = ?1
         ORDER BY j.rowid",
    ))?;
    let rows = stmt.query_map([issue_id], |row| {
        Ok(Named {
            id: row.get(0)?,
            name: row.get(1)?,
        })
    })?;
    rows.collect()
}

fn read_labels(conn: &Connection, table: &str, join_table: &str, issue_id: i64) -> rusqlite::Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT v.name FROM {table} v
         JOIN {join_table} j ON j.label_id = v.id
         WHERE j.issue_id = ?1
         ORDER BY j.rowid",
    ))?;
    let rows = stmt.query_map([issue_id], |row| row.get::<_, String>(0))?;
    rows.collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{entry, epic, issue};

    async fn db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn issue_round_trips_with_associations() {
        let db = db().await;
        let mut story = issue(42, "APP-42");
        story.impact = Some(Named { id: 3, name: "High".to_string() });
        story.support_request_type = Some(Named { id: 12, name: "Bug report".to_string() });
        story.components = vec![
            Named { id: 20, name: "Frontend".to_string() },
            Named { id: 10, name: "Backend".to_string() },
        ];
        story.drivers = vec![Named { id: 4, name: "Revenue".to_string() }];
        story.user_types = vec![Named { id: 5, name: "Admin".to_string() }];
        story.client_labels = vec!["acme".to_string()];
        story.product_labels = vec!["web".to_string(), "mobile".to_string()];
        story.epic_key = Some("APP-9".to_string());

        let stored = db.upsert_issue(&story).await.unwrap();

        assert_eq!(stored, story);
        assert_eq!(db.get_issue_by_key("APP-42").await.unwrap(), Some(story));
    }

    #[tokio::test]
    async fn upsert_replaces_association_sets() {
        let db = db().await;
        let mut story = issue(42, "APP-42");
        story.components = vec![Named { id: 20, name: "Frontend".to_string() }];
        story.client_labels = vec!["acme".to_string(), "globex".to_string()];
        db.upsert_issue(&story).await.unwrap();

        story.components = vec![Named { id: 10, name: "Backend".to_string() }];
        story.client_labels = vec!["globex".to_string()];
        let stored = db.upsert_issue(&story).await.unwrap();

        assert_eq!(stored.components, story.components);
        assert_eq!(stored.client_labels, vec!["globex".to_string()]);
    }

    #[tokio::test]
    async fn resolved_links_survive_an_upsert_with_the_same_key() {
        let db = db().await;
        db.upsert_issue(&epic(9, "APP-9", true)).await.unwrap();
        let mut story = issue(42, "APP-42");
        story.epic_key = Some("APP-9".to_string());
        db.upsert_issue(&story).await.unwrap();
        db.link_rows(Relation::Epic, &[42], 9).await.unwrap();

        let stored = db.upsert_issue(&story).await.unwrap();
        assert_eq!(stored.epic_id, Some(9));

        story.epic_key = Some("APP-10".to_string());
        let stored = db.upsert_issue(&story).await.unwrap();
        assert_eq!(stored.epic_id, None);
    }

    #[tokio::test]
    async fn flagged_rows_stay_unlinked_until_linked() {
        let db = db().await;
        for (id, key) in [(1, "APP-1"), (2, "APP-2")] {
            let mut story = issue(id, key);
            story.parent_key = Some("APP-404".to_string());
            db.upsert_issue(&story).await.unwrap();
        }

        db.flag_rows(Relation::Parent, &[1], ErrorCode::BadIssueKey).await.unwrap();

        let unlinked = db.find_unlinked(Relation::Parent).await.unwrap();
        assert_eq!(unlinked.iter().map(|row| row.id).collect::<Vec<_>>(), vec![1, 2]);
        assert!(db.find_unlinked(Relation::Epic).await.unwrap().is_empty());

        db.upsert_issue(&issue(404, "APP-404")).await.unwrap();
        db.link_rows(Relation::Parent, &[1], 404).await.unwrap();
        let error: Option<String> = db
            .connection
            .call(|conn| {
                conn.query_row("SELECT parent_error FROM jira_issues WHERE id = 1", [], |row| row.get(0))
                    .map_err(tokio_rusqlite::Error::Rusqlite)
            })
            .await
            .unwrap();
        assert_eq!(error, None);
    }

    #[tokio::test]
    async fn links_never_point_an_issue_at_itself() {
        let db = db().await;
        let mut story = issue(1, "APP-1");
        story.parent_key = Some("OLD-1".to_string());
        db.upsert_issue(&story).await.unwrap();

        db.link_rows(Relation::Parent, &[1], 1).await.unwrap();

        assert_eq!(db.get_issue(1).await.unwrap().and_then(|i| i.parent_id), None);
    }

    #[tokio::test]
    async fn parent_propagation_chains_the_epic() {
        let db = db().await;
        db.upsert_issue(&epic(9, "APP-9", true)).await.unwrap();
        let mut parent = issue(10, "APP-10");
        parent.epic_key = Some("APP-9".to_string());
        db.upsert_issue(&parent).await.unwrap();
        db.link_rows(Relation::Epic, &[10], 9).await.unwrap();
        let mut subtask = issue(11, "APP-11");
        subtask.parent_key = Some("APP-10".to_string());
        db.upsert_issue(&subtask).await.unwrap();
        db.link_rows(Relation::Parent, &[11], 10).await.unwrap();

        let updated = db
            .bulk_update_flags(
                IssueSelector::ParentId(10),
                &PropagatedFields {
                    is_roadmap_item: true,
                    epic_key: Some("APP-9".to_string()),
                    epic_id: Some(9),
                },
            )
            .await
            .unwrap();

        assert_eq!(updated, 1);
        let stored = db.get_issue(11).await.unwrap().unwrap();
        assert!(stored.is_roadmap_item);
        assert_eq!(stored.epic_key.as_deref(), Some("APP-9"));
        assert_eq!(stored.epic_id, Some(9));
    }

    #[tokio::test]
    async fn parent_flags_skip_children_with_another_epic() {
        let db = db().await;
        let mut own_epic = issue(11, "APP-11");
        own_epic.parent_key = Some("APP-10".to_string());
        own_epic.epic_key = Some("APP-9".to_string());
        own_epic.is_roadmap_item = true;
        db.upsert_issue(&own_epic).await.unwrap();
        db.link_rows(Relation::Epic, &[11], 9).await.unwrap();
        let mut plain = issue(12, "APP-12");
        plain.parent_key = Some("APP-10".to_string());
        db.upsert_issue(&plain).await.unwrap();
        db.link_rows(Relation::Parent, &[11, 12], 10).await.unwrap();

        let updated = db
            .bulk_update_flags(
                IssueSelector::ParentId(10),
                &PropagatedFields {
                    is_roadmap_item: false,
                    epic_key: None,
                    epic_id: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated, 1);
        assert!(db.get_issue(11).await.unwrap().unwrap().is_roadmap_item);
        assert!(!db.get_issue(12).await.unwrap().unwrap().is_roadmap_item);
    }

    #[tokio::test]
    async fn referenced_issues_are_listed_once() {
        let db = db().await;
        db.upsert_issue(&epic(9, "APP-9", true)).await.unwrap();
        for id in [1, 2] {
            let mut story = issue(id, &format!("APP-{}", id));
            story.epic_key = Some("APP-9".to_string());
            db.upsert_issue(&story).await.unwrap();
        }
        db.link_rows(Relation::Epic, &[1, 2], 9).await.unwrap();

        let referenced = db.find_referenced(Relation::Epic).await.unwrap();
        assert_eq!(referenced.iter().map(|i| i.id).collect::<Vec<_>>(), vec![9]);
        assert!(db.find_referenced(Relation::Parent).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn entries_are_replaced_by_range() {
        let db = db().await;
        let mut first = entry(1, "bob", "APP-1 fix", 3_600_000);
        first.issue_key = Some("APP-1".to_string());
        db.upsert_entry(&first).await.unwrap();
        db.upsert_entry(&entry(2, "bob", "standup", 900_000)).await.unwrap();

        let range = DateRange::single(first.start.date_naive());
        let deleted = db.delete_between(range.start_utc(Tz::UTC), range.end_utc(Tz::UTC)).await.unwrap();
        assert_eq!(deleted, 2);
        assert!(db.get_entry(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unlinked_entries_are_linked_or_flagged() {
        let db = db().await;
        db.upsert_issue(&issue(1, "APP-1")).await.unwrap();
        for (id, key) in [(1, "APP-1"), (2, "APP-404"), (3, "APP-1")] {
            let mut e = entry(id, "bob", key, 60_000);
            e.issue_key = Some(key.to_string());
            db.upsert_entry(&e).await.unwrap();
        }

        let unlinked = db.find_with_unlinked_issue_key().await.unwrap();
        assert_eq!(unlinked.len(), 3);

        db.link_entries(&[1, 3], 1).await.unwrap();
        db.flag_entries(&[2], ErrorCode::BadIssueKey).await.unwrap();

        let unlinked = db.find_with_unlinked_issue_key().await.unwrap();
        assert_eq!(unlinked, vec![UnlinkedRow { id: 2, key: "APP-404".to_string() }]);
        assert_eq!(db.get_entry(1).await.unwrap().and_then(|e| e.issue_id), Some(1));
        assert_eq!(
            db.get_entry(2).await.unwrap().and_then(|e| e.error),
            Some(ErrorCode::BadIssueKey)
        );
    }

    #[tokio::test]
    async fn entries_between_join_issues_and_filter_by_group() {
        let db = db().await;
        db.upsert_group(&TogglGroup { id: 5, wid: 1, name: "Devs".to_string() }).await.unwrap();
        db.upsert_user(3, "bob", &[5]).await.unwrap();
        db.upsert_issue(&issue(1, "APP-1")).await.unwrap();

        let mut bob = entry(1, "bob", "APP-1 fix", 3_600_000);
        bob.user_id = 3;
        bob.issue_key = Some("APP-1".to_string());
        db.upsert_entry(&bob).await.unwrap();
        db.link_entries(&[1], 1).await.unwrap();
        let mut amy = entry(2, "amy", "standup", 900_000);
        amy.user_id = 4;
        db.upsert_entry(&amy).await.unwrap();

        let range = DateRange::single(bob.start.date_naive());
        let all = db.get_entries_between(&range, Tz::UTC, None).await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].issue.as_ref().map(|i| i.key.as_str()), Some("APP-1"));

        let devs = db.get_entries_between(&range, Tz::UTC, Some(5)).await.unwrap();
        assert_eq!(devs.len(), 1);
        assert_eq!(devs[0].entry.user, "bob");
        assert_eq!(db.get_group_members(5).await.unwrap(), vec![3]);
    }

    #[tokio::test]
    async fn user_memberships_are_replaced() {
        let db = db().await;
        for id in [5, 6] {
            db.upsert_group(&TogglGroup { id, wid: 1, name: format!("g{}", id) }).await.unwrap();
        }
        db.upsert_user(3, "bob", &[5, 6]).await.unwrap();
        db.upsert_user(3, "bob", &[6]).await.unwrap();

        assert!(db.get_group_members(5).await.unwrap().is_empty());
        assert_eq!(db.get_group_members(6).await.unwrap(), vec![3]);
    }
}
