//! Control-tree evaluation.
//!
//! ```text
//!   evaluate_catalog ── timeout(interval / 2)
//!        │
//!        ├─ resolve_overrides ──> ignored top-level ids, manual sub-results
//!        │
//!        └─ try_join_all ──> evaluate_control (per relevant top-level control)
//!                               │
//!                               ├─ try_join_all ──> evaluate_subcontrol
//!                               │                     ├─ collect metrics (recursive, via cache)
//!                               │                     └─ latest assessment results
//!                               └─ fold statuses ──> persist parent verdict
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::{try_join_all, BoxFuture, FutureExt};
use tracing::{debug, info, warn};

use crate::cache::ControlCache;
use crate::error::{EvaluationError, Result};
use crate::orchestrator::{latest_assessment_results, AssessmentResultFilter, Orchestrator};
use crate::overrides::resolve_overrides;
use crate::scheduler::{EvaluationJob, JobRunner};
use crate::store::EvaluationStore;
use crate::types::*;

pub struct Evaluator {
    store: Arc<dyn EvaluationStore>,
    orchestrator: Arc<dyn Orchestrator>,
    cache: Arc<ControlCache>,
}

impl Evaluator {
    pub fn new(
        store: Arc<dyn EvaluationStore>,
        orchestrator: Arc<dyn Orchestrator>,
        cache: Arc<ControlCache>,
    ) -> Self {
        Self { store, orchestrator, cache }
    }

    /// Evaluate every relevant top-level control of the scope's catalog.
    ///
    /// Bounded to half the scheduling interval; on timeout all in-flight
    /// control evaluations are dropped.
    pub async fn evaluate_catalog(
        &self,
        scope: &AuditScope,
        catalog: &Catalog,
        interval: Duration,
    ) -> Result<Vec<EvaluationResult>> {
        let budget = interval / 2;
        match tokio::time::timeout(budget, self.evaluate_catalog_unbounded(scope, catalog)).await {
            Ok(result) => result,
            Err(_) => Err(EvaluationError::Timeout(budget)),
        }
    }

    async fn evaluate_catalog_unbounded(
        &self,
        scope: &AuditScope,
        catalog: &Catalog,
    ) -> Result<Vec<EvaluationResult>> {
        let overrides = resolve_overrides(
            self.store.as_ref(),
            &scope.target_of_evaluation_id,
            &catalog.id,
        )
        .await?;

        let mut controls: Vec<Control> = self
            .cache
            .all_controls(&catalog.id)
            .await?
            .into_iter()
            .filter(|c| !c.is_subcontrol())
            .filter(|c| c.is_relevant_for(scope, catalog))
            .filter(|c| !overrides.ignored.contains(&c.id))
            .collect();
        controls.sort_by(|a, b| a.id.cmp(&b.id));

        debug!(
            audit_scope_id = %scope.id,
            catalog_id = %catalog.id,
            controls = controls.len(),
            skipped_manual = overrides.ignored.len(),
            "evaluating catalog"
        );

        let results = try_join_all(controls.iter().map(|control| {
            self.evaluate_control(scope, catalog, control, overrides.for_parent(&control.id))
        }))
        .await?;

        info!(
            audit_scope_id = %scope.id,
            catalog_id = %catalog.id,
            evaluated = results.len(),
            "catalog evaluation finished"
        );
        Ok(results)
    }

    /// Evaluate a top-level control from its sub-controls and persist the verdict.
    ///
    /// Sub-controls covered by `manual_sub_results` are not re-evaluated; the
    /// manual results are folded in instead.
    pub async fn evaluate_control(
        &self,
        scope: &AuditScope,
        catalog: &Catalog,
        control: &Control,
        manual_sub_results: Vec<EvaluationResult>,
    ) -> Result<EvaluationResult> {
        let ignored: HashSet<&str> = manual_sub_results
            .iter()
            .map(|r| r.control_id.as_str())
            .collect();

        let subcontrols = control
            .controls
            .iter()
            .filter(|sub| sub.is_relevant_for(scope, catalog))
            .filter(|sub| !ignored.contains(sub.id.as_str()));

        let mut sub_results =
            try_join_all(subcontrols.map(|sub| self.evaluate_subcontrol(scope, sub))).await?;
        sub_results.extend(manual_sub_results.iter().cloned());

        let status = fold_statuses(sub_results.iter().map(|r| r.status));

        let mut seen = HashSet::new();
        let assessment_result_ids: Vec<String> = sub_results
            .iter()
            .flat_map(|r| r.assessment_result_ids.iter())
            .filter(|id| seen.insert(id.as_str()))
            .cloned()
            .collect();

        let mut result = EvaluationResult::automated(scope, control, status, assessment_result_ids);
        // Verdicts for top-level controls never carry a parent.
        result.parent_control_id = None;

        self.store
            .create(&result)
            .await
            .map_err(|e| e.context(format!("could not store result for control {}", control.id)))?;

        debug!(
            audit_scope_id = %scope.id,
            control_id = %control.id,
            status = %status,
            sub_results = sub_results.len(),
            "control evaluated"
        );
        Ok(result)
    }

    /// Evaluate one sub-control from the latest assessment results of its
    /// metrics and those of all nested sub-controls.
    pub async fn evaluate_subcontrol(
        &self,
        scope: &AuditScope,
        control: &Control,
    ) -> Result<EvaluationResult> {
        let metric_ids = self.collect_metrics(control).await?;

        let (status, assessment_result_ids) = if metric_ids.is_empty() {
            debug!(control_id = %control.id, "no metrics, evaluation pending");
            (EvaluationStatus::Pending, Vec::new())
        } else {
            let filter = AssessmentResultFilter {
                target_of_evaluation_id: scope.target_of_evaluation_id.clone(),
                metric_ids,
            };
            match latest_assessment_results(self.orchestrator.as_ref(), filter).await {
                Ok(results) => status_from_assessments(&results),
                Err(e) => {
                    warn!(
                        audit_scope_id = %scope.id,
                        control_id = %control.id,
                        error = %e,
                        "could not fetch assessment results, evaluation pending"
                    );
                    (EvaluationStatus::Pending, Vec::new())
                }
            }
        };

        let result = EvaluationResult::automated(scope, control, status, assessment_result_ids);
        self.store
            .create(&result)
            .await
            .map_err(|e| e.context(format!("could not store result for control {}", control.id)))?;

        Ok(result)
    }

    /// Metric ids of `control` and every nested sub-control, first occurrence order.
    async fn collect_metrics(&self, control: &Control) -> Result<Vec<String>> {
        let mut visited = HashSet::new();
        let mut metrics = Vec::new();
        self.collect_metrics_into(control, &mut visited, &mut metrics)
            .await?;
        Ok(metrics)
    }

    fn collect_metrics_into<'a>(
        &'a self,
        control: &'a Control,
        visited: &'a mut HashSet<String>,
        metrics: &'a mut Vec<String>,
    ) -> BoxFuture<'a, Result<()>> {
        async move {
            if !visited.insert(control.id.clone()) {
                return Ok(());
            }

            // A control missing from the cache aborts the whole pass.
            let cached = self
                .cache
                .lookup(&control.catalog_id, &control.category_name, &control.id)
                .await?;

            for metric in &cached.metric_ids {
                if !metrics.contains(metric) {
                    metrics.push(metric.clone());
                }
            }
            for child in &cached.controls {
                self.collect_metrics_into(child, visited, metrics).await?;
            }
            Ok(())
        }
        .boxed()
    }
}

#[async_trait]
impl JobRunner for Evaluator {
    async fn run(&self, job: &EvaluationJob) -> Result<()> {
        self.evaluate_catalog(&job.scope, &job.catalog, job.interval)
            .await
            .map(|_| ())
    }
}

/// COMPLIANT unless any result is non-compliant; ids of all contributing results.
fn status_from_assessments(results: &[AssessmentResult]) -> (EvaluationStatus, Vec<String>) {
    if results.is_empty() {
        return (EvaluationStatus::Pending, Vec::new());
    }
    let status = if results.iter().all(|r| r.compliant) {
        EvaluationStatus::Compliant
    } else {
        EvaluationStatus::NotCompliant
    };
    (status, results.iter().map(|r| r.id.clone()).collect())
}
