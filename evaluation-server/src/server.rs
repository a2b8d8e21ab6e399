//! gRPC service implementation for the evaluation engine
//!
//! Translates protobuf requests into `EvaluationService` calls and domain
//! errors into gRPC status codes.

use std::sync::Arc;

use tonic::{Request, Response, Status};

use evaluation_core::{EvaluationError, EvaluationService, ListResultsRequest};

use crate::convert::{filter_from_proto, result_from_proto, result_to_proto};
use crate::proto::evaluation::v1::{
    evaluation_server::Evaluation, CreateEvaluationResultRequest, EvaluationResult,
    ListEvaluationResultsRequest, ListEvaluationResultsResponse, StartEvaluationRequest,
    StartEvaluationResponse, StopEvaluationRequest, StopEvaluationResponse,
};

/// Map a domain error to a gRPC status. Internal causes are logged and not
/// sent to the client.
pub fn to_status(err: EvaluationError) -> Status {
    match err {
        EvaluationError::IsMissing(_) | EvaluationError::InvalidArgument(_) => {
            Status::invalid_argument(err.to_string())
        }
        EvaluationError::NotFound(_) => Status::not_found(err.to_string()),
        EvaluationError::AlreadyExists(_) => Status::already_exists(err.to_string()),
        EvaluationError::FailedPrecondition(_) => Status::failed_precondition(err.to_string()),
        EvaluationError::Upstream(_) => {
            tracing::warn!(error = %err, "upstream failure");
            Status::unavailable("upstream service unavailable")
        }
        EvaluationError::Timeout(_) => Status::deadline_exceeded(err.to_string()),
        EvaluationError::ControlNotAvailable | EvaluationError::Internal(_) => {
            tracing::error!(error = ?err, "internal error");
            Status::internal("internal error")
        }
    }
}

/// gRPC service implementation
pub struct EvaluationGrpcService {
    service: Arc<EvaluationService>,
}

impl EvaluationGrpcService {
    pub fn new(service: Arc<EvaluationService>) -> Self {
        Self { service }
    }
}

#[tonic::async_trait]
impl Evaluation for EvaluationGrpcService {
    async fn start_evaluation(
        &self,
        request: Request<StartEvaluationRequest>,
    ) -> Result<Response<StartEvaluationResponse>, Status> {
        let req = request.into_inner();

        self.service
            .start_evaluation(&req.audit_scope_id, req.interval)
            .await
            .map_err(to_status)?;

        Ok(Response::new(StartEvaluationResponse { successful: true }))
    }

    async fn stop_evaluation(
        &self,
        request: Request<StopEvaluationRequest>,
    ) -> Result<Response<StopEvaluationResponse>, Status> {
        let req = request.into_inner();

        self.service
            .stop_evaluation(&req.audit_scope_id)
            .await
            .map_err(to_status)?;

        Ok(Response::new(StopEvaluationResponse {}))
    }

    async fn list_evaluation_results(
        &self,
        request: Request<ListEvaluationResultsRequest>,
    ) -> Result<Response<ListEvaluationResultsResponse>, Status> {
        let req = request.into_inner();

        let page_size = u32::try_from(req.page_size)
            .map_err(|_| Status::invalid_argument("page_size must not be negative"))?;

        let listed = self
            .service
            .list_evaluation_results(ListResultsRequest {
                filter: filter_from_proto(req.filter),
                page_size,
                page_token: req.page_token,
                latest_by_control_id: req.latest_by_control_id.unwrap_or(false),
            })
            .await
            .map_err(to_status)?;

        Ok(Response::new(ListEvaluationResultsResponse {
            results: listed.results.into_iter().map(result_to_proto).collect(),
            next_page_token: listed.next_page_token,
        }))
    }

    async fn create_evaluation_result(
        &self,
        request: Request<CreateEvaluationResultRequest>,
    ) -> Result<Response<EvaluationResult>, Status> {
        let req = request.into_inner();

        let result = req
            .result
            .ok_or_else(|| Status::invalid_argument("empty request"))?;
        let result = result_from_proto(result).map_err(to_status)?;

        let created = self
            .service
            .create_evaluation_result(result)
            .await
            .map_err(to_status)?;

        Ok(Response::new(result_to_proto(created)))
    }
}
