//! In-memory Orchestrator and fixtures for tests.

use crate::orchestrator::*;
use crate::types::*;
use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;

/// Orchestrator backed by maps, paging with small numeric-offset tokens so
/// callers' pagination loops get exercised.
pub struct InMemoryOrchestrator {
    scopes: RwLock<HashMap<String, AuditScope>>,
    catalogs: RwLock<HashMap<String, Catalog>>,
    controls: RwLock<HashMap<String, Vec<Control>>>,
    assessment_results: RwLock<Vec<AssessmentResult>>,
    page_size: usize,
    fail_assessment_results: AtomicBool,
    fail_controls: AtomicBool,
    assessment_calls: AtomicUsize,
}

impl Default for InMemoryOrchestrator {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self {
            scopes: RwLock::new(HashMap::new()),
            catalogs: RwLock::new(HashMap::new()),
            controls: RwLock::new(HashMap::new()),
            assessment_results: RwLock::new(Vec::new()),
            page_size: 2,
            fail_assessment_results: AtomicBool::new(false),
            fail_controls: AtomicBool::new(false),
            assessment_calls: AtomicUsize::new(0),
        }
    }

    pub async fn add_scope(&self, scope: AuditScope) {
        self.scopes.write().await.insert(scope.id.clone(), scope);
    }

    pub async fn add_catalog(&self, catalog: Catalog) {
        self.catalogs.write().await.insert(catalog.id.clone(), catalog);
    }

    /// Register a control and, as separate listing entries, all of its nested
    /// sub-controls.
    pub async fn add_control_tree(&self, control: Control) {
        let mut flat = Vec::new();
        flatten(&control, &mut flat);

        let mut controls = self.controls.write().await;
        let entry = controls.entry(control.catalog_id.clone()).or_default();
        entry.extend(flat);
    }

    pub async fn add_assessment_result(&self, result: AssessmentResult) {
        self.assessment_results.write().await.push(result);
    }

    pub fn fail_assessment_results(&self, fail: bool) {
        self.fail_assessment_results.store(fail, Ordering::SeqCst);
    }

    pub fn fail_controls(&self, fail: bool) {
        self.fail_controls.store(fail, Ordering::SeqCst);
    }

    /// Number of `list_assessment_results` calls, one per page.
    pub fn assessment_calls(&self) -> usize {
        self.assessment_calls.load(Ordering::SeqCst)
    }

    fn page<T: Clone>(&self, items: &[T], token: &str) -> Result<Page<T>> {
        let start: usize = if token.is_empty() {
            0
        } else {
            token.parse().map_err(|_| anyhow!("bad page token: {token}"))?
        };
        let end = (start + self.page_size).min(items.len());
        let next_page_token = if end < items.len() { end.to_string() } else { String::new() };

        Ok(Page {
            items: items.get(start..end).unwrap_or_default().to_vec(),
            next_page_token,
        })
    }
}

fn flatten(control: &Control, out: &mut Vec<Control>) {
    out.push(control.clone());
    for child in &control.controls {
        flatten(child, out);
    }
}

#[async_trait]
impl Orchestrator for InMemoryOrchestrator {
    async fn get_audit_scope(&self, audit_scope_id: &str) -> Result<AuditScope> {
        self.scopes
            .read()
            .await
            .get(audit_scope_id)
            .cloned()
            .ok_or_else(|| anyhow!("audit scope {audit_scope_id} not found"))
    }

    async fn get_catalog(&self, catalog_id: &str) -> Result<Catalog> {
        self.catalogs
            .read()
            .await
            .get(catalog_id)
            .cloned()
            .ok_or_else(|| anyhow!("catalog {catalog_id} not found"))
    }

    async fn list_controls(&self, request: ListControlsRequest) -> Result<Page<Control>> {
        if self.fail_controls.load(Ordering::SeqCst) {
            bail!("orchestrator unavailable");
        }
        let controls = self.controls.read().await;
        let items = controls
            .get(&request.catalog_id)
            .map(Vec::as_slice)
            .unwrap_or_default();
        self.page(items, &request.page_token)
    }

    async fn list_assessment_results(
        &self,
        request: ListAssessmentResultsRequest,
    ) -> Result<Page<AssessmentResult>> {
        self.assessment_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_assessment_results.load(Ordering::SeqCst) {
            bail!("assessment results unavailable");
        }

        let all = self.assessment_results.read().await;
        let mut matching: Vec<AssessmentResult> = all
            .iter()
            .filter(|r| r.target_of_evaluation_id == request.filter.target_of_evaluation_id)
            .filter(|r| {
                request.filter.metric_ids.is_empty()
                    || request.filter.metric_ids.contains(&r.metric_id)
            })
            .cloned()
            .collect();

        if request.latest_by_resource_id {
            let mut latest: HashMap<(String, String), AssessmentResult> = HashMap::new();
            for r in matching {
                let key = (r.resource_id.clone(), r.metric_id.clone());
                let newer = latest
                    .get(&key)
                    .map_or(true, |existing| r.timestamp > existing.timestamp);
                if newer {
                    latest.insert(key, r);
                }
            }
            matching = latest.into_values().collect();
        }
        matching.sort_by(|a, b| a.id.cmp(&b.id));

        self.page(&matching, &request.page_token)
    }
}

// ── Fixtures ──

pub const TOE_ID: &str = "11111111-1111-1111-1111-111111111111";
pub const SCOPE_ID: &str = "scope-1";
pub const CATALOG_ID: &str = "catalog-1";
pub const CATEGORY: &str = "Operations";

pub fn scope() -> AuditScope {
    AuditScope {
        id: SCOPE_ID.into(),
        target_of_evaluation_id: TOE_ID.into(),
        catalog_id: CATALOG_ID.into(),
        assurance_level: None,
    }
}

pub fn catalog() -> Catalog {
    Catalog {
        id: CATALOG_ID.into(),
        name: "Test catalog".into(),
        description: String::new(),
        assurance_levels: vec!["basic".into(), "substantial".into(), "high".into()],
    }
}

/// A sub-control of `parent_id` carrying the given metrics.
pub fn subcontrol(id: &str, parent_id: &str, metric_ids: &[&str]) -> Control {
    Control {
        id: id.into(),
        category_name: CATEGORY.into(),
        catalog_id: CATALOG_ID.into(),
        name: id.into(),
        metric_ids: metric_ids.iter().map(|m| m.to_string()).collect(),
        parent_control_id: Some(parent_id.into()),
        ..Default::default()
    }
}

/// A top-level control grouping the given sub-controls.
pub fn control(id: &str, controls: Vec<Control>) -> Control {
    Control {
        id: id.into(),
        category_name: CATEGORY.into(),
        catalog_id: CATALOG_ID.into(),
        name: id.into(),
        controls,
        ..Default::default()
    }
}

pub fn assessment(id: &str, metric_id: &str, resource_id: &str, compliant: bool) -> AssessmentResult {
    AssessmentResult {
        id: id.into(),
        timestamp: chrono::Utc::now(),
        metric_id: metric_id.into(),
        resource_id: resource_id.into(),
        compliant,
        target_of_evaluation_id: TOE_ID.into(),
    }
}

/// Orchestrator preloaded with [`scope`], [`catalog`] and the given control trees.
pub async fn orchestrator_with(controls: Vec<Control>) -> InMemoryOrchestrator {
    let orchestrator = InMemoryOrchestrator::new();
    orchestrator.add_scope(scope()).await;
    orchestrator.add_catalog(catalog()).await;
    for control in controls {
        orchestrator.add_control_tree(control).await;
    }
    orchestrator
}
