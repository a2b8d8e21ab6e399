//! Result filters and page tokens shared by the store backends.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Utc};
use prost::Message;

use crate::error::{EvaluationError, Result};
use crate::types::EvaluationResult;

/// Conjunctive filter over stored evaluation results. `None`/`false` fields
/// do not constrain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResultFilter {
    pub target_of_evaluation_id: Option<String>,
    pub catalog_id: Option<String>,
    pub control_id: Option<String>,
    /// Prefix match on the control id, e.g. `OPS-01` also selects `OPS-01.1`.
    pub sub_controls: Option<String>,
    /// Only top-level verdicts.
    pub parents_only: bool,
    /// Only manual results whose `valid_until` is unset or not yet passed.
    pub valid_manual_only: bool,
}

impl ResultFilter {
    pub fn matches(&self, result: &EvaluationResult, now: DateTime<Utc>) -> bool {
        if let Some(toe) = &self.target_of_evaluation_id {
            if &result.target_of_evaluation_id != toe {
                return false;
            }
        }
        if let Some(catalog) = &self.catalog_id {
            if &result.control_catalog_id != catalog {
                return false;
            }
        }
        if let Some(control) = &self.control_id {
            if &result.control_id != control {
                return false;
            }
        }
        if let Some(prefix) = &self.sub_controls {
            if !result.control_id.starts_with(prefix.as_str()) {
                return false;
            }
        }
        if self.parents_only && result.parent_control_id.is_some() {
            return false;
        }
        if self.valid_manual_only && !result.is_valid_manual(now) {
            return false;
        }
        true
    }

    /// Reject filters that name a field but leave it empty.
    pub fn validate(&self) -> Result<()> {
        let fields = [
            ("target_of_evaluation_id", &self.target_of_evaluation_id),
            ("catalog_id", &self.catalog_id),
            ("control_id", &self.control_id),
            ("sub_controls", &self.sub_controls),
        ];
        for (name, value) in fields {
            if matches!(value, Some(v) if v.is_empty()) {
                return Err(EvaluationError::InvalidArgument(format!(
                    "filter.{name} must not be empty"
                )));
            }
        }
        Ok(())
    }
}

// ── Page tokens ──

/// Offset-based cursor, encoded as base64 protobuf on the wire.
#[derive(Clone, Copy, PartialEq, Eq, Message)]
pub struct PageToken {
    #[prost(int64, tag = "1")]
    pub start: i64,
    #[prost(int32, tag = "2")]
    pub size: i32,
}

impl PageToken {
    pub fn encode_token(&self) -> String {
        STANDARD.encode(self.encode_to_vec())
    }

    pub fn decode_token(token: &str) -> Result<Self> {
        let invalid = || EvaluationError::InvalidArgument("could not decode page token".into());

        let bytes = STANDARD.decode(token).map_err(|_| invalid())?;
        let decoded = PageToken::decode(bytes.as_slice()).map_err(|_| invalid())?;
        if decoded.start < 0 || decoded.size <= 0 {
            return Err(invalid());
        }
        Ok(decoded)
    }
}

/// A resolved window into a listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: u64,
    pub limit: u32,
}

impl PageRequest {
    /// Resolve `page_size`/`page_token` into an offset window. A token carries
    /// its own page size, which wins over the request's.
    pub fn resolve(page_token: &str, page_size: u32) -> Result<Self> {
        if page_token.is_empty() {
            return Ok(Self { offset: 0, limit: page_size });
        }
        let token = PageToken::decode_token(page_token)?;
        Ok(Self {
            offset: token.start as u64,
            limit: token.size as u32,
        })
    }

    /// Token for the page after this one, or empty when there is none.
    pub fn next_token(&self, has_more: bool) -> String {
        if !has_more {
            return String::new();
        }
        PageToken {
            start: (self.offset + u64::from(self.limit)) as i64,
            size: self.limit as i32,
        }
        .encode_token()
    }
}
