use crate::cache::IssueCache;
use crate::models::Issue;
use crate::source::IssueSource;
use futures_util::future::join_all;
use itertools::Itertools;
use std::collections::HashMap;

/// Lookups in flight at once against the issue tracker.
pub const BATCH_SIZE: usize = 10;

/// Resolves issue keys against an [`IssueSource`], remembering every issue
/// it has seen for as long as it lives.
///
/// Keys are looked up in batches: the lookups inside a batch run
/// concurrently, and the next batch only starts once the previous one has
/// settled and its results are in the cache. A failed lookup resolves to
/// `None` and never stops the other keys.
pub struct IssueResolver<S> {
    source: S,
    cache: IssueCache,
    batch_size: usize,
}

impl<S: IssueSource> IssueResolver<S> {
    pub fn new(source: S) -> Self {
        Self::with_batch_size(source, BATCH_SIZE)
    }

    pub(crate) fn with_batch_size(source: S, batch_size: usize) -> Self {
        Self {
            source,
            cache: IssueCache::new(),
            batch_size: batch_size.max(1),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn cache(&self) -> &IssueCache {
        &self.cache
    }

    pub async fn resolve(&mut self, key: &str) -> Option<Issue> {
        self.resolve_many([key]).await.remove(key).flatten()
    }

    pub async fn resolve_many<I, K>(&mut self, keys: I) -> HashMap<String, Option<Issue>>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        let keys = keys.into_iter().map(Into::into).unique().collect::<Vec<String>>();
        let mut resolved = HashMap::with_capacity(keys.len());

        for batch in keys.chunks(self.batch_size) {
            let (cached, missing): (Vec<&String>, Vec<&String>) =
                batch.iter().partition(|key| self.cache.get(key).is_some());

            for key in cached {
                tracing::debug!(key = %key, "found issue in cache");
                resolved.insert(key.clone(), self.cache.get(key).cloned());
            }

            let source = &self.source;
            let fetched = join_all(missing.into_iter().map(|key| async move {
                (key, source.fetch_issue(key).await)
            }))
            .await;

            for (key, result) in fetched {
                match result {
                    Ok(issue) => {
                        self.cache.put(issue.clone());
                        resolved.insert(key.clone(), Some(issue));
                    }
                    Err(err) => {
                        tracing::warn!(key = %key, error = %err, "could not fetch issue");
                        resolved.insert(key.clone(), None);
                    }
                }
            }
        }

        resolved
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{issue, FakeIssueSource};

    #[tokio::test]
    async fn failed_lookups_resolve_to_none() {
        let source = FakeIssueSource::with_issues([issue(1, "A-1"), issue(3, "A-3")]).failing(["A-2"]);
        let mut resolver = IssueResolver::new(source);

        let resolved = resolver.resolve_many(["A-1", "A-2", "A-3"]).await;

        assert_eq!(resolved.len(), 3);
        assert_eq!(resolved["A-1"].as_ref().map(|i| i.id), Some(1));
        assert!(resolved["A-2"].is_none());
        assert_eq!(resolved["A-3"].as_ref().map(|i| i.id), Some(3));
    }

    #[tokio::test]
    async fn unknown_keys_resolve_to_none() {
        let mut resolver = IssueResolver::new(FakeIssueSource::default());
        let resolved = resolver.resolve_many(["NOPE-1"]).await;
        assert_eq!(resolved.get("NOPE-1"), Some(&None));
    }

    #[tokio::test]
    async fn duplicate_keys_are_fetched_once() {
        let mut resolver = IssueResolver::new(FakeIssueSource::with_issues([issue(1, "A-1")]));

        let resolved = resolver.resolve_many(["A-1", "A-1", "A-1"]).await;

        assert_eq!(resolved.len(), 1);
        assert_eq!(resolver.source().calls(), 1);
    }

    #[tokio::test]
    async fn cached_issues_are_not_fetched_again() {
        let mut resolver = IssueResolver::new(FakeIssueSource::with_issues([issue(1, "A-1")]));

        assert!(resolver.resolve("A-1").await.is_some());
        assert!(resolver.resolve("A-1").await.is_some());

        assert_eq!(resolver.source().calls(), 1);
        assert!(resolver.cache().keys().contains("A-1"));
    }

    #[tokio::test]
    async fn failures_are_not_cached() {
        let mut resolver = IssueResolver::new(FakeIssueSource::default().failing(["A-2"]));

        assert!(resolver.resolve("A-2").await.is_none());
        assert!(resolver.resolve("A-2").await.is_none());

        assert_eq!(resolver.source().calls(), 2);
        assert!(resolver.cache().is_empty());
    }

    #[tokio::test]
    async fn batches_never_exceed_the_batch_size() {
        let issues = (1..=25).map(|n| issue(n, &format!("A-{}", n))).collect::<Vec<_>>();
        let mut resolver = IssueResolver::new(FakeIssueSource::with_issues(issues));

        let keys = (1..=25).map(|n| format!("A-{}", n)).collect::<Vec<_>>();
        let resolved = resolver.resolve_many(keys.clone()).await;

        assert!(resolved.values().all(Option::is_some));
        assert_eq!(resolver.source().calls(), 25);
        assert_eq!(resolver.source().max_in_flight(), BATCH_SIZE);
        // Every key of a batch starts before any key of the next one.
        assert_eq!(resolver.source().fetched(), keys);
    }

    #[tokio::test]
    async fn smaller_batches_limit_concurrency() {
        let issues = (1..=7).map(|n| issue(n, &format!("A-{}", n))).collect::<Vec<_>>();
        let mut resolver = IssueResolver::with_batch_size(FakeIssueSource::with_issues(issues), 3);

        let resolved = resolver.resolve_many((1..=7).map(|n| format!("A-{}", n))).await;

        assert_eq!(resolved.len(), 7);
        assert_eq!(resolver.source().max_in_flight(), 3);
    }
}
