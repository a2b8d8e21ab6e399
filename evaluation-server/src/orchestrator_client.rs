//! gRPC adapter for the Orchestrator port.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tonic::transport::{Channel, Endpoint};

use evaluation_core::orchestrator::{
    ListAssessmentResultsRequest, ListControlsRequest, Orchestrator, Page,
};
use evaluation_core::{AssessmentResult, AuditScope, Catalog, Control};

use crate::convert::{
    assessment_result_from_proto, audit_scope_from_proto, catalog_from_proto, control_from_proto,
};
use crate::proto::orchestrator::v1 as pb;
use crate::proto::orchestrator::v1::orchestrator_client::OrchestratorClient;

pub struct GrpcOrchestrator {
    client: OrchestratorClient<Channel>,
}

impl GrpcOrchestrator {
    /// Build a client without connecting; the channel connects on first use.
    pub fn connect_lazy(address: &str, max_message_bytes: usize) -> Result<Self> {
        let channel = Endpoint::from_shared(address.to_string())
            .with_context(|| format!("invalid orchestrator address: {address}"))?
            .connect_lazy();
        let client = OrchestratorClient::new(channel)
            .max_decoding_message_size(max_message_bytes)
            .max_encoding_message_size(max_message_bytes);
        Ok(Self { client })
    }
}

#[async_trait]
impl Orchestrator for GrpcOrchestrator {
    async fn get_audit_scope(&self, audit_scope_id: &str) -> Result<AuditScope> {
        let scope = self
            .client
            .clone()
            .get_audit_scope(pb::GetAuditScopeRequest {
                audit_scope_id: audit_scope_id.to_string(),
            })
            .await
            .with_context(|| format!("GetAuditScope({audit_scope_id}) failed"))?
            .into_inner();
        Ok(audit_scope_from_proto(scope))
    }

    async fn get_catalog(&self, catalog_id: &str) -> Result<Catalog> {
        let catalog = self
            .client
            .clone()
            .get_catalog(pb::GetCatalogRequest {
                catalog_id: catalog_id.to_string(),
            })
            .await
            .with_context(|| format!("GetCatalog({catalog_id}) failed"))?
            .into_inner();
        Ok(catalog_from_proto(catalog))
    }

    async fn list_controls(&self, request: ListControlsRequest) -> Result<Page<Control>> {
        let response = self
            .client
            .clone()
            .list_controls(pb::ListControlsRequest {
                catalog_id: request.catalog_id.clone(),
                page_size: i32::try_from(request.page_size).unwrap_or(i32::MAX),
                page_token: request.page_token,
            })
            .await
            .with_context(|| format!("ListControls({}) failed", request.catalog_id))?
            .into_inner();

        Ok(Page {
            items: response.controls.into_iter().map(control_from_proto).collect(),
            next_page_token: response.next_page_token,
        })
    }

    async fn list_assessment_results(
        &self,
        request: ListAssessmentResultsRequest,
    ) -> Result<Page<AssessmentResult>> {
        let filter = pb::list_assessment_results_request::Filter {
            target_of_evaluation_id: Some(request.filter.target_of_evaluation_id),
            metric_ids: request.filter.metric_ids,
        };
        let response = self
            .client
            .clone()
            .list_assessment_results(pb::ListAssessmentResultsRequest {
                filter: Some(filter),
                latest_by_resource_id: Some(request.latest_by_resource_id),
                page_size: i32::try_from(request.page_size).unwrap_or(i32::MAX),
                page_token: request.page_token,
            })
            .await
            .context("ListAssessmentResults failed")?
            .into_inner();

        let items = response
            .results
            .into_iter()
            .map(assessment_result_from_proto)
            .collect::<Result<Vec<_>>>()?;

        Ok(Page {
            items,
            next_page_token: response.next_page_token,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_invalid_address_rejected() {
        assert!(GrpcOrchestrator::connect_lazy("not a uri", 4 * 1024 * 1024).is_err());
    }

    #[tokio::test]
    async fn test_lazy_connect_does_not_dial() {
        assert!(GrpcOrchestrator::connect_lazy("http://127.0.0.1:1", 4 * 1024 * 1024).is_ok());
    }
}
