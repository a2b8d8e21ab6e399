//! Conversions between protobuf messages and domain types.
//!
//! Timestamps travel as milliseconds since the Unix epoch.

use anyhow::anyhow;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use evaluation_core::{
    AssessmentResult, AuditScope, Catalog, Control, EvaluationError, EvaluationResult,
    EvaluationStatus, ResultFilter,
};

use crate::proto::evaluation::v1 as pb;
use crate::proto::orchestrator::v1 as orch;

// ── Timestamps ──

pub fn to_millis(ts: DateTime<Utc>) -> i64 {
    ts.timestamp_millis()
}

pub fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(ms)
}

// ── Evaluation status ──

pub fn status_to_proto(status: EvaluationStatus) -> pb::EvaluationStatus {
    match status {
        EvaluationStatus::Pending => pb::EvaluationStatus::Pending,
        EvaluationStatus::Compliant => pb::EvaluationStatus::Compliant,
        EvaluationStatus::NotCompliant => pb::EvaluationStatus::NotCompliant,
        EvaluationStatus::CompliantManually => pb::EvaluationStatus::CompliantManually,
        EvaluationStatus::NotCompliantManually => pb::EvaluationStatus::NotCompliantManually,
    }
}

pub fn status_from_proto(value: i32) -> Result<EvaluationStatus, EvaluationError> {
    match pb::EvaluationStatus::try_from(value) {
        Ok(pb::EvaluationStatus::Pending) => Ok(EvaluationStatus::Pending),
        Ok(pb::EvaluationStatus::Compliant) => Ok(EvaluationStatus::Compliant),
        Ok(pb::EvaluationStatus::NotCompliant) => Ok(EvaluationStatus::NotCompliant),
        Ok(pb::EvaluationStatus::CompliantManually) => Ok(EvaluationStatus::CompliantManually),
        Ok(pb::EvaluationStatus::NotCompliantManually) => {
            Ok(EvaluationStatus::NotCompliantManually)
        }
        Ok(pb::EvaluationStatus::Unspecified) | Err(_) => Err(EvaluationError::InvalidArgument(
            format!("invalid evaluation status: {value}"),
        )),
    }
}

// ── Evaluation results ──

pub fn result_to_proto(result: EvaluationResult) -> pb::EvaluationResult {
    pb::EvaluationResult {
        id: result.id.to_string(),
        timestamp_ms: to_millis(result.timestamp),
        target_of_evaluation_id: result.target_of_evaluation_id,
        audit_scope_id: result.audit_scope_id,
        control_id: result.control_id,
        control_category_name: result.control_category_name,
        control_catalog_id: result.control_catalog_id,
        parent_control_id: result.parent_control_id,
        status: status_to_proto(result.status) as i32,
        assessment_result_ids: result.assessment_result_ids,
        comment: result.comment,
        valid_until_ms: result.valid_until.map(to_millis),
        data: result.data,
    }
}

/// Decode a result sent by a client. An empty id becomes the nil UUID and a
/// zero timestamp becomes "now".
pub fn result_from_proto(result: pb::EvaluationResult) -> Result<EvaluationResult, EvaluationError> {
    let id = if result.id.is_empty() {
        Uuid::nil()
    } else {
        Uuid::parse_str(&result.id)
            .map_err(|_| EvaluationError::InvalidArgument(format!("invalid id: {}", result.id)))?
    };

    let timestamp = match result.timestamp_ms {
        0 => Utc::now(),
        ms => from_millis(ms)
            .ok_or_else(|| EvaluationError::InvalidArgument("timestamp out of range".into()))?,
    };

    let valid_until = result
        .valid_until_ms
        .map(|ms| {
            from_millis(ms)
                .ok_or_else(|| EvaluationError::InvalidArgument("valid_until out of range".into()))
        })
        .transpose()?;

    Ok(EvaluationResult {
        id,
        timestamp,
        target_of_evaluation_id: result.target_of_evaluation_id,
        audit_scope_id: result.audit_scope_id,
        control_id: result.control_id,
        control_category_name: result.control_category_name,
        control_catalog_id: result.control_catalog_id,
        parent_control_id: result.parent_control_id.filter(|p| !p.is_empty()),
        status: status_from_proto(result.status)?,
        assessment_result_ids: result.assessment_result_ids,
        comment: result.comment,
        valid_until,
        data: result.data,
    })
}

pub fn filter_from_proto(filter: Option<pb::list_evaluation_results_request::Filter>) -> ResultFilter {
    let Some(filter) = filter else {
        return ResultFilter::default();
    };
    ResultFilter {
        target_of_evaluation_id: filter.target_of_evaluation_id,
        catalog_id: filter.catalog_id,
        control_id: filter.control_id,
        sub_controls: filter.sub_controls,
        parents_only: filter.parents_only.unwrap_or(false),
        valid_manual_only: filter.valid_manual_only.unwrap_or(false),
    }
}

// ── Orchestrator messages ──

pub fn audit_scope_from_proto(scope: orch::AuditScope) -> AuditScope {
    AuditScope {
        id: scope.id,
        target_of_evaluation_id: scope.target_of_evaluation_id,
        catalog_id: scope.catalog_id,
        assurance_level: scope.assurance_level.filter(|l| !l.is_empty()),
    }
}

pub fn catalog_from_proto(catalog: orch::Catalog) -> Catalog {
    Catalog {
        id: catalog.id,
        name: catalog.name,
        description: catalog.description,
        assurance_levels: catalog.assurance_levels,
    }
}

pub fn control_from_proto(control: orch::Control) -> Control {
    Control {
        id: control.id,
        category_name: control.category_name,
        catalog_id: control.category_catalog_id,
        name: control.name,
        description: control.description,
        assurance_level: control.assurance_level.filter(|l| !l.is_empty()),
        controls: control.controls.into_iter().map(control_from_proto).collect(),
        metric_ids: control.metrics.into_iter().map(|m| m.id).collect(),
        parent_control_id: control.parent_control_id.filter(|p| !p.is_empty()),
    }
}

pub fn assessment_result_from_proto(result: orch::AssessmentResult) -> anyhow::Result<AssessmentResult> {
    let timestamp = from_millis(result.timestamp_ms)
        .ok_or_else(|| anyhow!("assessment result {} has an invalid timestamp", result.id))?;
    Ok(AssessmentResult {
        id: result.id,
        timestamp,
        metric_id: result.metric_id,
        resource_id: result.resource_id,
        compliant: result.compliant,
        target_of_evaluation_id: result.target_of_evaluation_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manual_proto() -> pb::EvaluationResult {
        pb::EvaluationResult {
            id: String::new(),
            timestamp_ms: 0,
            target_of_evaluation_id: "toe".into(),
            audit_scope_id: "scope".into(),
            control_id: "OPS-01.1".into(),
            control_category_name: "Operations".into(),
            control_catalog_id: "catalog".into(),
            parent_control_id: Some("OPS-01".into()),
            status: pb::EvaluationStatus::CompliantManually as i32,
            assessment_result_ids: vec![],
            comment: Some("checked by auditor".into()),
            valid_until_ms: Some(1_900_000_000_000),
            data: vec![1, 2, 3],
        }
    }

    #[test]
    fn test_empty_id_and_timestamp_defaults() {
        let result = result_from_proto(manual_proto()).unwrap();
        assert!(result.id.is_nil());
        assert!(result.timestamp <= Utc::now());
        assert_eq!(result.valid_until.map(to_millis), Some(1_900_000_000_000));
        assert_eq!(result.parent_control_id.as_deref(), Some("OPS-01"));
    }

    #[test]
    fn test_bad_id_and_status_rejected() {
        let mut bad_id = manual_proto();
        bad_id.id = "not-a-uuid".into();
        assert!(matches!(
            result_from_proto(bad_id),
            Err(EvaluationError::InvalidArgument(_))
        ));

        let mut unspecified = manual_proto();
        unspecified.status = 0;
        assert!(matches!(
            result_from_proto(unspecified),
            Err(EvaluationError::InvalidArgument(_))
        ));

        assert!(status_from_proto(42).is_err());
    }

    #[test]
    fn test_nested_controls_convert() {
        let proto = orch::Control {
            id: "P".into(),
            category_name: "Ops".into(),
            category_catalog_id: "cat".into(),
            controls: vec![orch::Control {
                id: "S1".into(),
                category_name: "Ops".into(),
                category_catalog_id: "cat".into(),
                metrics: vec![orch::Metric { id: "M1".into() }],
                parent_control_id: Some("P".into()),
                ..Default::default()
            }],
            assurance_level: Some(String::new()),
            ..Default::default()
        };

        let control = control_from_proto(proto);
        assert_eq!(control.catalog_id, "cat");
        assert_eq!(control.assurance_level, None);
        assert_eq!(control.controls[0].metric_ids, vec!["M1".to_string()]);
        assert_eq!(control.controls[0].parent_control_id.as_deref(), Some("P"));
    }

    #[test]
    fn test_missing_filter_is_unconstrained() {
        assert_eq!(filter_from_proto(None), ResultFilter::default());
    }
}
