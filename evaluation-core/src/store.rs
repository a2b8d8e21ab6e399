use crate::query::{PageRequest, ResultFilter};
use crate::types::EvaluationResult;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One page of stored results plus whether more rows follow.
#[derive(Debug, Clone, Default)]
pub struct ResultPage {
    pub results: Vec<EvaluationResult>,
    pub has_more: bool,
}

/// Persistence for evaluation results.
///
/// Results are append-only: there is no update or delete. `now` is passed in
/// so "valid manual" filtering is deterministic for a single request.
#[async_trait]
pub trait EvaluationStore: Send + Sync {
    async fn create(&self, result: &EvaluationResult) -> Result<()>;

    /// Matching results ordered by `(timestamp, id)`.
    async fn list(
        &self,
        filter: &ResultFilter,
        now: DateTime<Utc>,
        page: PageRequest,
    ) -> Result<ResultPage>;

    /// Newest matching result per `(catalog, control_id)`, ordered by catalog
    /// then control id. Filters apply before the partitioning.
    async fn latest_by_control_id(
        &self,
        filter: &ResultFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<EvaluationResult>>;
}

/// In-memory store, used when no database is configured.
#[derive(Default)]
pub struct MemoryStore {
    results: RwLock<Vec<EvaluationResult>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl EvaluationStore for MemoryStore {
    async fn create(&self, result: &EvaluationResult) -> Result<()> {
        let mut results = self.results.write().await;
        if results.iter().any(|r| r.id == result.id) {
            anyhow::bail!("evaluation result {} already stored", result.id);
        }
        results.push(result.clone());
        Ok(())
    }

    async fn list(
        &self,
        filter: &ResultFilter,
        now: DateTime<Utc>,
        page: PageRequest,
    ) -> Result<ResultPage> {
        let results = self.results.read().await;
        let mut matching: Vec<&EvaluationResult> =
            results.iter().filter(|r| filter.matches(r, now)).collect();
        matching.sort_by(|a, b| (a.timestamp, a.id).cmp(&(b.timestamp, b.id)));

        let offset = usize::try_from(page.offset).unwrap_or(usize::MAX);
        let limit = page.limit as usize;

        let mut window: Vec<EvaluationResult> = matching
            .into_iter()
            .skip(offset)
            .take(limit + 1)
            .cloned()
            .collect();
        let has_more = window.len() > limit;
        window.truncate(limit);

        Ok(ResultPage { results: window, has_more })
    }

    async fn latest_by_control_id(
        &self,
        filter: &ResultFilter,
        now: DateTime<Utc>,
    ) -> Result<Vec<EvaluationResult>> {
        let results = self.results.read().await;

        let mut latest: HashMap<(&str, &str), &EvaluationResult> = HashMap::new();
        for r in results.iter().filter(|r| filter.matches(r, now)) {
            let key = (r.control_catalog_id.as_str(), r.control_id.as_str());
            let newer = latest
                .get(&key)
                .map_or(true, |existing| (r.timestamp, r.id) > (existing.timestamp, existing.id));
            if newer {
                latest.insert(key, r);
            }
        }

        let mut out: Vec<EvaluationResult> = latest.into_values().cloned().collect();
        out.sort_by(|a, b| {
            (&a.control_catalog_id, &a.control_id).cmp(&(&b.control_catalog_id, &b.control_id))
        });
        Ok(out)
    }
}
