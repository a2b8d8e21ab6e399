//! Manual-override resolution.
//!
//! A currently valid manual result replaces automated evaluation of its
//! control: top-level overrides drop the control from the pass entirely,
//! sub-control overrides are folded into the parent verdict as-is.

use std::collections::{HashMap, HashSet};

use chrono::Utc;

use crate::error::Result;
use crate::query::ResultFilter;
use crate::store::EvaluationStore;
use crate::types::EvaluationResult;

#[derive(Debug, Clone, Default)]
pub struct Overrides {
    /// Top-level control ids with a valid manual result.
    pub ignored: HashSet<String>,
    /// Valid manual sub-control results, grouped by parent control id.
    pub by_parent: HashMap<String, Vec<EvaluationResult>>,
}

impl Overrides {
    pub fn for_parent(&self, parent_control_id: &str) -> Vec<EvaluationResult> {
        self.by_parent
            .get(parent_control_id)
            .cloned()
            .unwrap_or_default()
    }
}

/// Load the latest valid manual result per control for a target and catalog.
///
/// Store failures propagate so the caller skips the pass rather than
/// overwriting manual verdicts with automated ones.
pub async fn resolve_overrides(
    store: &dyn EvaluationStore,
    target_of_evaluation_id: &str,
    catalog_id: &str,
) -> Result<Overrides> {
    let filter = ResultFilter {
        target_of_evaluation_id: Some(target_of_evaluation_id.to_string()),
        catalog_id: Some(catalog_id.to_string()),
        valid_manual_only: true,
        ..Default::default()
    };

    let manual = store
        .latest_by_control_id(&filter, Utc::now())
        .await
        .map_err(|e| e.context("could not query manual evaluation results"))?;

    let mut overrides = Overrides::default();
    for result in manual {
        match result.parent_control_id.clone() {
            None => {
                overrides.ignored.insert(result.control_id.clone());
            }
            Some(parent) => overrides.by_parent.entry(parent).or_default().push(result),
        }
    }

    tracing::debug!(
        target_of_evaluation_id,
        catalog_id,
        ignored = overrides.ignored.len(),
        sub_overrides = overrides.by_parent.values().map(Vec::len).sum::<usize>(),
        "resolved manual overrides"
    );
    Ok(overrides)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::PageRequest;
    use crate::store::{MemoryStore, ResultPage};
    use crate::testing::*;
    use crate::types::EvaluationStatus;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};

    fn manual(control: &crate::types::Control, valid_for: Duration) -> EvaluationResult {
        let mut r = EvaluationResult::automated(
            &scope(),
            control,
            EvaluationStatus::CompliantManually,
            vec![],
        );
        r.valid_until = Some(Utc::now() + valid_for);
        r
    }

    #[tokio::test]
    async fn test_splits_top_level_and_sub_controls() {
        let store = MemoryStore::new();
        store.create(&manual(&control("P1", vec![]), Duration::days(1))).await.unwrap();
        store
            .create(&manual(&subcontrol("S1", "P2", &[]), Duration::days(1)))
            .await
            .unwrap();
        // Expired and automated results do not count.
        store
            .create(&manual(&subcontrol("S2", "P2", &[]), Duration::days(-1)))
            .await
            .unwrap();
        store
            .create(&EvaluationResult::automated(
                &scope(),
                &control("P3", vec![]),
                EvaluationStatus::Compliant,
                vec![],
            ))
            .await
            .unwrap();

        let overrides = resolve_overrides(&store, TOE_ID, CATALOG_ID).await.unwrap();

        assert_eq!(overrides.ignored, HashSet::from(["P1".to_string()]));
        let p2 = overrides.for_parent("P2");
        assert_eq!(p2.len(), 1);
        assert_eq!(p2[0].control_id, "S1");
        assert!(overrides.for_parent("P1").is_empty());
    }

    #[tokio::test]
    async fn test_other_targets_are_ignored() {
        let store = MemoryStore::new();
        let mut other = manual(&control("P1", vec![]), Duration::days(1));
        other.target_of_evaluation_id = "someone-else".into();
        store.create(&other).await.unwrap();

        let overrides = resolve_overrides(&store, TOE_ID, CATALOG_ID).await.unwrap();
        assert!(overrides.ignored.is_empty());
    }

    struct BrokenStore;

    #[async_trait]
    impl EvaluationStore for BrokenStore {
        async fn create(&self, _: &EvaluationResult) -> anyhow::Result<()> {
            anyhow::bail!("down")
        }
        async fn list(
            &self,
            _: &ResultFilter,
            _: DateTime<Utc>,
            _: PageRequest,
        ) -> anyhow::Result<ResultPage> {
            anyhow::bail!("down")
        }
        async fn latest_by_control_id(
            &self,
            _: &ResultFilter,
            _: DateTime<Utc>,
        ) -> anyhow::Result<Vec<EvaluationResult>> {
            anyhow::bail!("down")
        }
    }

    #[tokio::test]
    async fn test_store_failure_propagates() {
        assert!(resolve_overrides(&BrokenStore, TOE_ID, CATALOG_ID).await.is_err());
    }
}
