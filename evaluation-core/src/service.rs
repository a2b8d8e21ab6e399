//! EvaluationService, the composition root of the engine.
//!
//! Owns the store, the Orchestrator client, the control cache and the
//! scheduler. The gRPC layer is a thin translation over these methods.

use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use crate::cache::ControlCache;
use crate::config::ServiceConfig;
use crate::error::{EvaluationError, Result};
use crate::evaluator::Evaluator;
use crate::orchestrator::Orchestrator;
use crate::query::{PageRequest, ResultFilter};
use crate::scheduler::{EvaluationJob, Scheduler};
use crate::store::EvaluationStore;
use crate::types::EvaluationResult;

#[derive(Debug, Clone, Default)]
pub struct ListResultsRequest {
    pub filter: ResultFilter,
    pub page_size: u32,
    pub page_token: String,
    /// Return only the newest result per control. Cannot be paginated.
    pub latest_by_control_id: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ListResultsResponse {
    pub results: Vec<EvaluationResult>,
    pub next_page_token: String,
}

pub struct EvaluationService {
    store: Arc<dyn EvaluationStore>,
    orchestrator: Arc<dyn Orchestrator>,
    cache: Arc<ControlCache>,
    scheduler: Scheduler,
    config: ServiceConfig,
}

impl EvaluationService {
    pub fn new(
        store: Arc<dyn EvaluationStore>,
        orchestrator: Arc<dyn Orchestrator>,
        config: ServiceConfig,
    ) -> Self {
        let cache = Arc::new(ControlCache::new());
        let evaluator = Arc::new(Evaluator::new(
            store.clone(),
            orchestrator.clone(),
            cache.clone(),
        ));
        let scheduler = Scheduler::new(evaluator, config.dispatch_queue_capacity);

        Self {
            store,
            orchestrator,
            cache,
            scheduler,
            config,
        }
    }

    // ── Scheduling ────────────────────────────────────────────────

    /// Start recurring evaluation of an audit scope.
    pub async fn start_evaluation(
        &self,
        audit_scope_id: &str,
        interval_minutes: Option<u32>,
    ) -> Result<()> {
        if audit_scope_id.is_empty() {
            return Err(EvaluationError::InvalidArgument("audit_scope_id is missing".into()));
        }
        if self.scheduler.is_scheduled(audit_scope_id).await {
            return Err(EvaluationError::AlreadyExists(format!(
                "evaluation for audit scope '{audit_scope_id}' is already running"
            )));
        }

        let scope = self
            .orchestrator
            .get_audit_scope(audit_scope_id)
            .await
            .map_err(|e| EvaluationError::NotFound(format!("could not get audit scope: {e}")))?;

        let catalog = self
            .orchestrator
            .get_catalog(&scope.catalog_id)
            .await
            .map_err(|e| EvaluationError::Internal(e.context("could not get catalog")))?;

        self.cache
            .refresh_catalog(self.orchestrator.as_ref(), &catalog.id)
            .await
            .map_err(|e| {
                EvaluationError::Internal(anyhow::Error::new(e).context("could not cache controls"))
            })?;

        let interval = self.config.interval(interval_minutes);
        self.scheduler
            .schedule(EvaluationJob { scope, catalog, interval })
            .await?;

        info!(
            audit_scope_id,
            interval_secs = interval.as_secs(),
            "evaluation started"
        );
        Ok(())
    }

    /// Stop recurring evaluation of an audit scope.
    pub async fn stop_evaluation(&self, audit_scope_id: &str) -> Result<()> {
        if audit_scope_id.is_empty() {
            return Err(EvaluationError::InvalidArgument("audit_scope_id is missing".into()));
        }
        self.scheduler.unschedule(audit_scope_id).await
    }

    pub async fn running_evaluations(&self) -> Vec<String> {
        self.scheduler.scheduled_ids().await
    }

    // ── Results ───────────────────────────────────────────────────

    pub async fn list_evaluation_results(
        &self,
        request: ListResultsRequest,
    ) -> Result<ListResultsResponse> {
        request.filter.validate()?;
        let now = Utc::now();

        if request.latest_by_control_id {
            if !request.page_token.is_empty() {
                return Err(EvaluationError::InvalidArgument(
                    "page_token cannot be combined with latest_by_control_id".into(),
                ));
            }
            let results = self.store.latest_by_control_id(&request.filter, now).await?;
            return Ok(ListResultsResponse {
                results,
                next_page_token: String::new(),
            });
        }

        let mut page = PageRequest::resolve(
            &request.page_token,
            self.config.page_size(request.page_size),
        )?;
        page.limit = page.limit.min(self.config.max_page_size);

        let listed = self.store.list(&request.filter, now, page).await?;
        Ok(ListResultsResponse {
            next_page_token: page.next_token(listed.has_more),
            results: listed.results,
        })
    }

    /// Store a manual evaluation result.
    ///
    /// Only `*_MANUALLY` statuses are accepted, and they must expire.
    pub async fn create_evaluation_result(
        &self,
        mut result: EvaluationResult,
    ) -> Result<EvaluationResult> {
        validate_manual_result(&result)?;

        if result.id.is_nil() {
            result.id = Uuid::new_v4();
        }

        self.store.create(&result).await?;

        info!(
            evaluation_result_id = %result.id,
            control_id = %result.control_id,
            status = %result.status,
            "manual evaluation result stored"
        );
        Ok(result)
    }

    /// Stop all evaluation jobs.
    pub async fn shutdown(&self) {
        self.scheduler.shutdown().await;
    }
}

fn validate_manual_result(result: &EvaluationResult) -> Result<()> {
    let required = [
        ("target_of_evaluation_id", &result.target_of_evaluation_id),
        ("audit_scope_id", &result.audit_scope_id),
        ("control_id", &result.control_id),
        ("control_category_name", &result.control_category_name),
        ("control_catalog_id", &result.control_catalog_id),
    ];
    for (field, value) in required {
        if value.is_empty() {
            return Err(EvaluationError::InvalidArgument(format!("{field} is missing")));
        }
    }

    if !result.status.is_manual() {
        return Err(EvaluationError::InvalidArgument(
            "only manually set statuses are allowed".into(),
        ));
    }
    if result.valid_until.is_none() {
        return Err(EvaluationError::InvalidArgument("validity must be set".into()));
    }
    Ok(())
}
