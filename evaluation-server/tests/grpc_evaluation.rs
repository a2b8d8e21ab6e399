//! End-to-end tests through the gRPC service trait, backed by the in-memory
//! orchestrator and result store.

use std::sync::Arc;
use std::time::Duration;

use tonic::{Code, Request};

use evaluation_core::testing::*;
use evaluation_core::{EvaluationService, MemoryStore, ServiceConfig};
use evaluation_server::proto::evaluation::v1::{
    evaluation_server::Evaluation, list_evaluation_results_request::Filter,
    CreateEvaluationResultRequest, EvaluationResult, EvaluationStatus,
    ListEvaluationResultsRequest, StartEvaluationRequest, StopEvaluationRequest,
};
use evaluation_server::EvaluationGrpcService;

async fn grpc_service() -> (Arc<InMemoryOrchestrator>, Arc<EvaluationService>, EvaluationGrpcService) {
    let orchestrator = Arc::new(
        orchestrator_with(vec![control(
            "C",
            vec![subcontrol("C1", "C", &["M1"]), subcontrol("C2", "C", &["M2"])],
        )])
        .await,
    );
    let service = Arc::new(EvaluationService::new(
        Arc::new(MemoryStore::new()),
        orchestrator.clone(),
        ServiceConfig::default(),
    ));
    let grpc = EvaluationGrpcService::new(service.clone());
    (orchestrator, service, grpc)
}

fn manual(control_id: &str, status: EvaluationStatus, valid_until_ms: Option<i64>) -> EvaluationResult {
    EvaluationResult {
        id: String::new(),
        timestamp_ms: 0,
        target_of_evaluation_id: TOE_ID.into(),
        audit_scope_id: SCOPE_ID.into(),
        control_id: control_id.into(),
        control_category_name: CATEGORY.into(),
        control_catalog_id: CATALOG_ID.into(),
        parent_control_id: Some("C".into()),
        status: status as i32,
        assessment_result_ids: vec![],
        comment: Some("reviewed".into()),
        valid_until_ms,
        data: vec![],
    }
}

fn in_a_month_ms() -> i64 {
    (chrono::Utc::now() + chrono::Duration::days(30)).timestamp_millis()
}

async fn list(
    grpc: &EvaluationGrpcService,
    filter: Option<Filter>,
    latest: bool,
) -> Vec<EvaluationResult> {
    grpc.list_evaluation_results(Request::new(ListEvaluationResultsRequest {
        filter,
        latest_by_control_id: Some(latest),
        page_size: 0,
        page_token: String::new(),
    }))
    .await
    .unwrap()
    .into_inner()
    .results
}

#[tokio::test]
async fn start_and_stop_lifecycle() {
    let (_orch, service, grpc) = grpc_service().await;

    let started = grpc
        .start_evaluation(Request::new(StartEvaluationRequest {
            audit_scope_id: SCOPE_ID.into(),
            interval: Some(5),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(started.successful);

    let again = grpc
        .start_evaluation(Request::new(StartEvaluationRequest {
            audit_scope_id: SCOPE_ID.into(),
            interval: None,
        }))
        .await;
    assert_eq!(again.unwrap_err().code(), Code::AlreadyExists);

    grpc.stop_evaluation(Request::new(StopEvaluationRequest {
        audit_scope_id: SCOPE_ID.into(),
    }))
    .await
    .unwrap();

    let stopped_again = grpc
        .stop_evaluation(Request::new(StopEvaluationRequest {
            audit_scope_id: SCOPE_ID.into(),
        }))
        .await;
    assert_eq!(stopped_again.unwrap_err().code(), Code::FailedPrecondition);

    service.shutdown().await;
}

#[tokio::test]
async fn start_unknown_scope_is_not_found() {
    let (_orch, _service, grpc) = grpc_service().await;
    let err = grpc
        .start_evaluation(Request::new(StartEvaluationRequest {
            audit_scope_id: "unknown".into(),
            interval: None,
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::NotFound);
}

#[tokio::test(start_paused = true)]
async fn scheduled_evaluation_is_listed() {
    let (orch, service, grpc) = grpc_service().await;
    orch.add_assessment_result(assessment("a1", "M1", "r1", true)).await;
    orch.add_assessment_result(assessment("a2", "M1", "r2", false)).await;

    grpc.start_evaluation(Request::new(StartEvaluationRequest {
        audit_scope_id: SCOPE_ID.into(),
        interval: Some(1),
    }))
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let parents = list(
        &grpc,
        Some(Filter {
            parents_only: Some(true),
            ..Default::default()
        }),
        true,
    )
    .await;
    assert_eq!(parents.len(), 1);
    assert_eq!(parents[0].control_id, "C");
    assert_eq!(parents[0].status, EvaluationStatus::NotCompliant as i32);
    assert_eq!(parents[0].assessment_result_ids, vec!["a1", "a2"]);
    assert_eq!(parents[0].parent_control_id, None);

    let subs = list(
        &grpc,
        Some(Filter {
            sub_controls: Some("C".into()),
            ..Default::default()
        }),
        true,
    )
    .await;
    let ids: Vec<_> = subs.iter().map(|r| r.control_id.as_str()).collect();
    assert_eq!(ids, vec!["C", "C1", "C2"]);
    // C2 has metrics but no assessment results yet.
    assert_eq!(subs[2].status, EvaluationStatus::Pending as i32);

    service.shutdown().await;
}

#[tokio::test]
async fn create_rejects_automated_status() {
    let (_orch, _service, grpc) = grpc_service().await;
    let err = grpc
        .create_evaluation_result(Request::new(CreateEvaluationResultRequest {
            result: Some(manual("C1", EvaluationStatus::Compliant, Some(in_a_month_ms()))),
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn create_requires_validity_and_payload() {
    let (_orch, _service, grpc) = grpc_service().await;

    let err = grpc
        .create_evaluation_result(Request::new(CreateEvaluationResultRequest {
            result: Some(manual("C1", EvaluationStatus::CompliantManually, None)),
        }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);

    let err = grpc
        .create_evaluation_result(Request::new(CreateEvaluationResultRequest { result: None }))
        .await
        .unwrap_err();
    assert_eq!(err.code(), Code::InvalidArgument);
}

#[tokio::test]
async fn manual_result_round_trips_with_data() {
    let (_orch, _service, grpc) = grpc_service().await;

    let data: Vec<u8> = (0..2 * 1024 * 1024).map(|i| (i * 31 % 251) as u8).collect();
    let mut request = manual("C1", EvaluationStatus::CompliantManually, Some(in_a_month_ms()));
    request.data = data.clone();

    let created = grpc
        .create_evaluation_result(Request::new(CreateEvaluationResultRequest {
            result: Some(request),
        }))
        .await
        .unwrap()
        .into_inner();
    assert!(uuid::Uuid::parse_str(&created.id).is_ok());
    assert_eq!(created.data, data);

    let valid_manual = list(
        &grpc,
        Some(Filter {
            valid_manual_only: Some(true),
            ..Default::default()
        }),
        true,
    )
    .await;
    assert_eq!(valid_manual.len(), 1);
    assert_eq!(valid_manual[0].id, created.id);
    assert_eq!(valid_manual[0].data, data);
}

#[tokio::test(start_paused = true)]
async fn manual_subcontrol_override_drives_parent() {
    let (orch, service, grpc) = grpc_service().await;
    orch.add_assessment_result(assessment("a1", "M1", "r1", true)).await;
    orch.add_assessment_result(assessment("a2", "M2", "r1", true)).await;

    grpc.create_evaluation_result(Request::new(CreateEvaluationResultRequest {
        result: Some(manual("C1", EvaluationStatus::NotCompliantManually, Some(in_a_month_ms()))),
    }))
    .await
    .unwrap();

    grpc.start_evaluation(Request::new(StartEvaluationRequest {
        audit_scope_id: SCOPE_ID.into(),
        interval: Some(1),
    }))
    .await
    .unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    let parent = list(
        &grpc,
        Some(Filter {
            control_id: Some("C".into()),
            ..Default::default()
        }),
        true,
    )
    .await;
    assert_eq!(parent[0].status, EvaluationStatus::NotCompliant as i32);

    let c1_history = list(
        &grpc,
        Some(Filter {
            control_id: Some("C1".into()),
            ..Default::default()
        }),
        false,
    )
    .await;
    assert_eq!(c1_history.len(), 1, "C1 must not be re-evaluated");
    assert_eq!(c1_history[0].status, EvaluationStatus::NotCompliantManually as i32);

    service.shutdown().await;
}

#[tokio::test]
async fn list_rejects_malformed_requests() {
    let (_orch, _service, grpc) = grpc_service().await;

    let bad_token = grpc
        .list_evaluation_results(Request::new(ListEvaluationResultsRequest {
            page_token: "definitely not a token".into(),
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert_eq!(bad_token.code(), Code::InvalidArgument);

    let negative = grpc
        .list_evaluation_results(Request::new(ListEvaluationResultsRequest {
            page_size: -1,
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert_eq!(negative.code(), Code::InvalidArgument);

    let empty_filter = grpc
        .list_evaluation_results(Request::new(ListEvaluationResultsRequest {
            filter: Some(Filter {
                catalog_id: Some(String::new()),
                ..Default::default()
            }),
            ..Default::default()
        }))
        .await
        .unwrap_err();
    assert_eq!(empty_filter.code(), Code::InvalidArgument);
}
