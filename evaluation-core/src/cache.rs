//! Control cache
//!
//! The `ControlCache` holds one snapshot of each catalog's control tree,
//! keyed `"{category}-{control_id}"`. Snapshots are swapped whole on refresh,
//! so concurrent evaluations never observe a half-built catalog.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{EvaluationError, Result};
use crate::orchestrator::{all_controls, Orchestrator};
use crate::types::Control;

type Snapshot = Arc<HashMap<String, Control>>;

/// Cache of control trees keyed by catalog id
#[derive(Default)]
pub struct ControlCache {
    catalogs: RwLock<HashMap<String, Snapshot>>,
}

pub fn control_key(category_name: &str, control_id: &str) -> String {
    format!("{category_name}-{control_id}")
}

impl ControlCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch every control of `catalog_id` and replace the cached snapshot.
    ///
    /// An empty listing is an error: a catalog without controls is
    /// misconfigured and must not silently evaluate to nothing.
    pub async fn refresh_catalog(
        &self,
        orchestrator: &dyn Orchestrator,
        catalog_id: &str,
    ) -> Result<usize> {
        if catalog_id.is_empty() {
            return Err(EvaluationError::IsMissing("catalog id"));
        }

        let controls = all_controls(orchestrator, catalog_id)
            .await
            .map_err(|e| e.context(format!("could not list controls for catalog '{catalog_id}'")))?;

        if controls.is_empty() {
            return Err(EvaluationError::Internal(anyhow::anyhow!(
                "no controls for catalog '{catalog_id}' available"
            )));
        }

        let snapshot: HashMap<String, Control> = controls
            .into_iter()
            .map(|c| (control_key(&c.category_name, &c.id), c))
            .collect();
        let count = snapshot.len();

        self.catalogs
            .write()
            .await
            .insert(catalog_id.to_string(), Arc::new(snapshot));

        tracing::debug!(catalog_id, controls = count, "control cache refreshed");
        Ok(count)
    }

    /// Look up one control. Never fetches; a miss is `ControlNotAvailable`.
    pub async fn lookup(
        &self,
        catalog_id: &str,
        category_name: &str,
        control_id: &str,
    ) -> Result<Control> {
        if catalog_id.is_empty() {
            return Err(EvaluationError::IsMissing("catalog id"));
        }
        if category_name.is_empty() {
            return Err(EvaluationError::IsMissing("category name"));
        }
        if control_id.is_empty() {
            return Err(EvaluationError::IsMissing("control id"));
        }

        let snapshot = self.snapshot(catalog_id).await?;
        snapshot
            .get(&control_key(category_name, control_id))
            .cloned()
            .ok_or(EvaluationError::ControlNotAvailable)
    }

    /// All cached controls of a catalog, in no particular order.
    pub async fn all_controls(&self, catalog_id: &str) -> Result<Vec<Control>> {
        if catalog_id.is_empty() {
            return Err(EvaluationError::IsMissing("catalog id"));
        }
        let snapshot = self.snapshot(catalog_id).await?;
        Ok(snapshot.values().cloned().collect())
    }

    async fn snapshot(&self, catalog_id: &str) -> Result<Snapshot> {
        self.catalogs
            .read()
            .await
            .get(catalog_id)
            .cloned()
            .ok_or(EvaluationError::ControlNotAvailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;

    async fn primed() -> (InMemoryOrchestrator, ControlCache) {
        let orch = orchestrator_with(vec![
            control("P", vec![subcontrol("S1", "P", &["M1"])]),
            control("Q", vec![]),
        ])
        .await;
        let cache = ControlCache::new();
        cache.refresh_catalog(&orch, CATALOG_ID).await.unwrap();
        (orch, cache)
    }

    #[tokio::test]
    async fn test_refresh_and_lookup() {
        let (_orch, cache) = primed().await;

        let s1 = cache.lookup(CATALOG_ID, CATEGORY, "S1").await.unwrap();
        assert_eq!(s1.metric_ids, vec!["M1".to_string()]);
        assert_eq!(s1.parent_control_id.as_deref(), Some("P"));

        assert_eq!(cache.all_controls(CATALOG_ID).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_lookup_misses() {
        let (_orch, cache) = primed().await;

        assert!(matches!(
            cache.lookup(CATALOG_ID, CATEGORY, "nope").await,
            Err(EvaluationError::ControlNotAvailable)
        ));
        assert!(matches!(
            cache.lookup(CATALOG_ID, "Other", "S1").await,
            Err(EvaluationError::ControlNotAvailable)
        ));
        assert!(matches!(
            cache.lookup("other-catalog", CATEGORY, "S1").await,
            Err(EvaluationError::ControlNotAvailable)
        ));
    }

    #[tokio::test]
    async fn test_lookup_missing_keys() {
        let cache = ControlCache::new();
        assert!(matches!(
            cache.lookup("", CATEGORY, "S1").await,
            Err(EvaluationError::IsMissing("catalog id"))
        ));
        assert!(matches!(
            cache.lookup(CATALOG_ID, "", "S1").await,
            Err(EvaluationError::IsMissing("category name"))
        ));
        assert!(matches!(
            cache.lookup(CATALOG_ID, CATEGORY, "").await,
            Err(EvaluationError::IsMissing("control id"))
        ));
    }

    #[tokio::test]
    async fn test_refresh_empty_catalog_fails() {
        let orch = orchestrator_with(vec![]).await;
        let cache = ControlCache::new();
        let err = cache.refresh_catalog(&orch, CATALOG_ID).await.unwrap_err();
        assert!(err.to_string().contains("no controls for catalog"));
        assert!(matches!(
            cache.refresh_catalog(&orch, "").await,
            Err(EvaluationError::IsMissing("catalog id"))
        ));
    }

    #[tokio::test]
    async fn test_refresh_failure_keeps_previous_snapshot() {
        let (orch, cache) = primed().await;
        orch.fail_controls(true);

        assert!(cache.refresh_catalog(&orch, CATALOG_ID).await.is_err());
        assert!(cache.lookup(CATALOG_ID, CATEGORY, "P").await.is_ok());
    }
}
