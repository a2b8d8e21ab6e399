use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ─── Catalog side (owned by the Orchestrator, read-only here) ─

/// A requirement node in a catalog's control tree.
///
/// Parent controls group sub-controls; sub-controls carry metrics. A control
/// with a `parent_control_id` is a leaf for evaluation purposes.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Control {
    pub id: String,
    pub category_name: String,
    pub catalog_id: String,
    pub name: String,
    pub description: String,
    pub assurance_level: Option<String>,
    /// Sub-controls, in catalog order.
    pub controls: Vec<Control>,
    pub metric_ids: Vec<String>,
    pub parent_control_id: Option<String>,
}

impl Control {
    /// Whether this control applies to the given audit scope.
    ///
    /// Only assurance levels are compared for now: a catalog without levels,
    /// or a control/scope without a level, is always relevant. Otherwise the
    /// control's level must not rank above the scope's level in the catalog's
    /// ordered list.
    pub fn is_relevant_for(&self, scope: &AuditScope, catalog: &Catalog) -> bool {
        if catalog.assurance_levels.is_empty() {
            return true;
        }

        let (Some(control_level), Some(scope_level)) =
            (&self.assurance_level, &scope.assurance_level)
        else {
            return true;
        };

        let rank = |level: &str| catalog.assurance_levels.iter().position(|l| l == level);

        // Levels missing from the catalog rank below every listed level.
        rank(control_level) <= rank(scope_level)
    }

    pub fn is_subcontrol(&self) -> bool {
        self.parent_control_id.is_some()
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Catalog {
    pub id: String,
    pub name: String,
    pub description: String,
    /// Assurance levels ordered from lowest to highest.
    pub assurance_levels: Vec<String>,
}

/// Binds a target of evaluation to a catalog.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditScope {
    pub id: String,
    pub target_of_evaluation_id: String,
    pub catalog_id: String,
    pub assurance_level: Option<String>,
}

/// Outcome of one metric against one resource, produced by the Assessment service.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssessmentResult {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub metric_id: String,
    pub resource_id: String,
    pub compliant: bool,
    pub target_of_evaluation_id: String,
}

// ─── Evaluation side (owned by this service) ──────────────────

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EvaluationStatus {
    #[default]
    Pending,
    Compliant,
    NotCompliant,
    CompliantManually,
    NotCompliantManually,
}

impl EvaluationStatus {
    pub const MANUAL: [EvaluationStatus; 2] = [Self::CompliantManually, Self::NotCompliantManually];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Compliant => "COMPLIANT",
            Self::NotCompliant => "NOT_COMPLIANT",
            Self::CompliantManually => "COMPLIANT_MANUALLY",
            Self::NotCompliantManually => "NOT_COMPLIANT_MANUALLY",
        }
    }

    pub fn is_manual(&self) -> bool {
        matches!(self, Self::CompliantManually | Self::NotCompliantManually)
    }

    /// One step of the parent-verdict state machine.
    ///
    /// `self` is the running state, `incoming` the status of the next
    /// sub-result. NOT_COMPLIANT is absorbing. The running state never carries
    /// a `_MANUALLY` variant; if one is passed in it is treated as its
    /// automated counterpart.
    pub fn aggregate(self, incoming: EvaluationStatus) -> EvaluationStatus {
        use EvaluationStatus::*;

        match (self, incoming) {
            (NotCompliant | NotCompliantManually, _) => NotCompliant,
            (_, NotCompliant | NotCompliantManually) => NotCompliant,
            (Compliant | CompliantManually, _) => Compliant,
            (Pending, Compliant | CompliantManually) => Compliant,
            (Pending, Pending) => Pending,
        }
    }
}

impl std::fmt::Display for EvaluationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EvaluationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(Self::Pending),
            "COMPLIANT" => Ok(Self::Compliant),
            "NOT_COMPLIANT" => Ok(Self::NotCompliant),
            "COMPLIANT_MANUALLY" => Ok(Self::CompliantManually),
            "NOT_COMPLIANT_MANUALLY" => Ok(Self::NotCompliantManually),
            _ => Err(format!("Unknown evaluation status: {}", s)),
        }
    }
}

/// Left-fold sub-result statuses into a parent verdict, starting at PENDING.
pub fn fold_statuses<I>(statuses: I) -> EvaluationStatus
where
    I: IntoIterator<Item = EvaluationStatus>,
{
    statuses
        .into_iter()
        .fold(EvaluationStatus::Pending, EvaluationStatus::aggregate)
}

/// The verdict for one control at one point in time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvaluationResult {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub target_of_evaluation_id: String,
    pub audit_scope_id: String,
    pub control_id: String,
    pub control_category_name: String,
    pub control_catalog_id: String,
    /// `None` for a top-level control verdict.
    pub parent_control_id: Option<String>,
    pub status: EvaluationStatus,
    pub assessment_result_ids: Vec<String>,
    pub comment: Option<String>,
    /// Required for manual results, never set on automated ones.
    pub valid_until: Option<DateTime<Utc>>,
    /// Opaque justification attachment, stored verbatim.
    pub data: Vec<u8>,
}

impl EvaluationResult {
    /// A fresh automated result for `control` within `scope`.
    pub fn automated(
        scope: &AuditScope,
        control: &Control,
        status: EvaluationStatus,
        assessment_result_ids: Vec<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            target_of_evaluation_id: scope.target_of_evaluation_id.clone(),
            audit_scope_id: scope.id.clone(),
            control_id: control.id.clone(),
            control_category_name: control.category_name.clone(),
            control_catalog_id: control.catalog_id.clone(),
            parent_control_id: control.parent_control_id.clone(),
            status,
            assessment_result_ids,
            comment: None,
            valid_until: None,
            data: Vec::new(),
        }
    }

    /// Whether this is a manual result that has not yet expired at `now`.
    pub fn is_valid_manual(&self, now: DateTime<Utc>) -> bool {
        self.status.is_manual() && self.valid_until.map_or(true, |until| until >= now)
    }
}
