use crate::types::*;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::future::Future;

/// Page size requested from upstream when walking a listing exhaustively.
pub const LIST_ALL_PAGE_SIZE: u32 = 1500;

/// One page of an upstream listing. An empty `next_page_token` marks the last page.
#[derive(Debug, Clone, Default)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub next_page_token: String,
}

#[derive(Debug, Clone, Default)]
pub struct ListControlsRequest {
    pub catalog_id: String,
    pub page_size: u32,
    pub page_token: String,
}

#[derive(Debug, Clone, Default)]
pub struct AssessmentResultFilter {
    pub target_of_evaluation_id: String,
    pub metric_ids: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ListAssessmentResultsRequest {
    pub filter: AssessmentResultFilter,
    /// Only the newest result per (resource, metric).
    pub latest_by_resource_id: bool,
    pub page_size: u32,
    pub page_token: String,
}

/// The slice of the Orchestrator's RPC surface the evaluation engine consumes.
///
/// The gRPC client lives in the server crate; an in-memory implementation is
/// available behind the `testing` feature.
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn get_audit_scope(&self, audit_scope_id: &str) -> Result<AuditScope>;
    async fn get_catalog(&self, catalog_id: &str) -> Result<Catalog>;
    async fn list_controls(&self, request: ListControlsRequest) -> Result<Page<Control>>;
    async fn list_assessment_results(
        &self,
        request: ListAssessmentResultsRequest,
    ) -> Result<Page<AssessmentResult>>;
}

/// Follow `next_page_token` until the listing is exhausted.
pub async fn list_all<T, F, Fut>(mut fetch: F) -> Result<Vec<T>>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<Page<T>>>,
{
    let mut items = Vec::new();
    let mut token = String::new();

    loop {
        let page = fetch(token.clone()).await?;
        items.extend(page.items);

        if page.next_page_token.is_empty() {
            return Ok(items);
        }
        if page.next_page_token == token {
            bail!("upstream returned the same page token twice: {token}");
        }
        token = page.next_page_token;
    }
}

/// Every control of a catalog, including nested sub-controls as their own entries.
pub async fn all_controls(orchestrator: &dyn Orchestrator, catalog_id: &str) -> Result<Vec<Control>> {
    list_all(|page_token| {
        orchestrator.list_controls(ListControlsRequest {
            catalog_id: catalog_id.to_string(),
            page_size: LIST_ALL_PAGE_SIZE,
            page_token,
        })
    })
    .await
}

/// Latest assessment result per resource for the given target and metrics.
pub async fn latest_assessment_results(
    orchestrator: &dyn Orchestrator,
    filter: AssessmentResultFilter,
) -> Result<Vec<AssessmentResult>> {
    list_all(|page_token| {
        orchestrator.list_assessment_results(ListAssessmentResultsRequest {
            filter: filter.clone(),
            latest_by_resource_id: true,
            page_size: LIST_ALL_PAGE_SIZE,
            page_token,
        })
    })
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn list_all_follows_tokens() {
        let calls = AtomicUsize::new(0);
        let items: Vec<u32> = list_all(|token| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(match token.as_str() {
                    "" => Page { items: vec![1, 2], next_page_token: "a".into() },
                    "a" => Page { items: vec![3], next_page_token: "b".into() },
                    _ => Page { items: vec![4], next_page_token: String::new() },
                })
            }
        })
        .await
        .unwrap();

        assert_eq!(items, vec![1, 2, 3, 4]);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn list_all_propagates_errors() {
        let result: Result<Vec<u32>> = list_all(|_| async { bail!("unavailable") }).await;
        assert!(result.unwrap_err().to_string().contains("unavailable"));
    }

    #[tokio::test]
    async fn list_all_stops_on_repeated_token() {
        let result: Result<Vec<u32>> = list_all(|_| async {
            Ok(Page { items: vec![1], next_page_token: "stuck".into() })
        })
        .await;
        assert!(result.is_err());
    }
}
