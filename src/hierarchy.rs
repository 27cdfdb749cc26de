use crate::database::DatabaseError;
use crate::models::*;
use crate::repository::{IssueRepository, TimeEntryRepository};
use crate::resolver::IssueResolver;
use crate::source::IssueSource;
use itertools::Itertools;

/// What one linking pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkSummary {
    /// Distinct raw keys looked at.
    pub keys: usize,
    pub linked: usize,
    pub flagged: usize,
}

/// Turns the raw issue keys stored on issues and time entries into links
/// to stored issues, and pushes flags down the epic/parent hierarchy.
pub struct HierarchyLinker<'a, S, R> {
    resolver: &'a mut IssueResolver<S>,
    repository: &'a R,
}

impl<'a, S, R> HierarchyLinker<'a, S, R>
where
    S: IssueSource,
    R: IssueRepository,
{
    pub fn new(resolver: &'a mut IssueResolver<S>, repository: &'a R) -> Self {
        Self { resolver, repository }
    }

    /// Links every stored issue carrying a raw key for `relation` to the
    /// issue behind that key, storing it first. Keys that cannot be
    /// resolved get their rows flagged with [`ErrorCode::BadIssueKey`]; the
    /// flag does not stop the next pass from trying them again.
    pub async fn link_unresolved(&mut self, relation: Relation) -> Result<LinkSummary, DatabaseError> {
        let rows = self.repository.find_unlinked(relation).await?;
        let groups = group_by_key(rows);
        let resolved = self.resolver.resolve_many(groups.iter().map(|(key, _)| key.clone())).await;

        let mut summary = LinkSummary {
            keys: groups.len(),
            ..LinkSummary::default()
        };
        for (key, ids) in groups {
            match resolved.get(&key).cloned().flatten() {
                Some(issue) => {
                    let stored = self.repository.upsert_issue(&issue).await?;
                    self.repository.link_rows(relation, &ids, stored.id).await?;
                    let selector = match relation {
                        Relation::Epic => IssueSelector::EpicId(stored.id),
                        Relation::Parent => IssueSelector::ParentId(stored.id),
                    };
                    self.propagate_from_related(selector, &stored).await?;
                    summary.linked += ids.len();
                }
                None => {
                    tracing::warn!(key = %key, relation = %relation, rows = ids.len(), "flagging unresolvable key");
                    self.repository.flag_rows(relation, &ids, ErrorCode::BadIssueKey).await?;
                    summary.flagged += ids.len();
                }
            }
        }

        tracing::info!(
            relation = %relation,
            keys = summary.keys,
            linked = summary.linked,
            flagged = summary.flagged,
            "linked issues"
        );
        Ok(summary)
    }

    /// Copies the roadmap flag of `related` onto the issues below it. Below
    /// a parent, the parent's epic is chained onto children that have no
    /// epic of their own, and the flag only reaches children that share the
    /// parent's epic or have none. An issue's own epic always wins.
    pub async fn propagate_from_related(
        &self,
        selector: IssueSelector,
        related: &Issue,
    ) -> Result<usize, DatabaseError> {
        let fields = match selector {
            IssueSelector::EpicId(_) => PropagatedFields {
                is_roadmap_item: related.is_roadmap_item,
                epic_key: None,
                epic_id: None,
            },
            IssueSelector::ParentId(_) => PropagatedFields {
                is_roadmap_item: related.is_roadmap_item,
                epic_key: related.epic_key.clone(),
                epic_id: related.epic_id,
            },
        };
        self.repository.bulk_update_flags(selector, &fields).await
    }

    /// Re-propagates from every stored epic, then from every stored parent,
    /// so children of parents see flags the parents just received.
    pub async fn refresh_propagation(&self) -> Result<usize, DatabaseError> {
        let mut updated = 0;
        for epic in self.repository.find_referenced(Relation::Epic).await? {
            updated += self
                .propagate_from_related(IssueSelector::EpicId(epic.id), &epic)
                .await?;
        }
        for parent in self.repository.find_referenced(Relation::Parent).await? {
            updated += self
                .propagate_from_related(IssueSelector::ParentId(parent.id), &parent)
                .await?;
        }
        tracing::info!(updated, "propagated flags from epics and parents");
        Ok(updated)
    }
}

impl<'a, S, R> HierarchyLinker<'a, S, R>
where
    S: IssueSource,
    R: IssueRepository + TimeEntryRepository,
{
    /// Links time entries whose description named an issue to that issue.
    pub async fn link_time_entries(&mut self) -> Result<LinkSummary, DatabaseError> {
        let rows = self.repository.find_with_unlinked_issue_key().await?;
        let groups = group_by_key(rows);
        let resolved = self.resolver.resolve_many(groups.iter().map(|(key, _)| key.clone())).await;

        let mut summary = LinkSummary {
            keys: groups.len(),
            ..LinkSummary::default()
        };
        for (key, ids) in groups {
            match resolved.get(&key).cloned().flatten() {
                Some(issue) => {
                    let stored = self.repository.upsert_issue(&issue).await?;
                    self.repository.link_entries(&ids, stored.id).await?;
                    summary.linked += ids.len();
                }
                None => {
                    tracing::warn!(key = %key, entries = ids.len(), "flagging entries with unresolvable key");
                    self.repository.flag_entries(&ids, ErrorCode::BadIssueKey).await?;
                    summary.flagged += ids.len();
                }
            }
        }

        tracing::info!(
            keys = summary.keys,
            linked = summary.linked,
            flagged = summary.flagged,
            "linked time entries"
        );
        Ok(summary)
    }
}

/// Row ids per raw key, keys in the order they were first seen.
fn group_by_key(rows: Vec<UnlinkedRow>) -> Vec<(String, Vec<i64>)> {
    let order = rows.iter().map(|row| row.key.clone()).unique().collect::<Vec<_>>();
    let mut groups = rows
        .into_iter()
        .map(|row| (row.key, row.id))
        .into_group_map();
    order
        .into_iter()
        .map(|key| {
            let ids = groups.remove(&key).unwrap_or_default();
            (key, ids)
        })
        .collect()
}
