//! Evaluation Core - scheduled compliance evaluation of control catalogs
//!
//! Periodically recomputes, per audit scope, whether a target of evaluation
//! complies with each control of its catalog. Sub-controls are judged from
//! the latest automated assessment results of their metrics; parent controls
//! fold their sub-controls' verdicts. Currently valid manual results override
//! automated evaluation.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   EvaluationService                             │
//! │     start / stop evaluation, list / create results              │
//! └─────────────────────────────────────────────────────────────────┘
//!                 │                                │
//!                 ▼                                ▼
//! ┌───────────────────────────────┐  ┌──────────────────────────────┐
//! │  Scheduler                    │  │  EvaluationStore             │
//! │  ticker per audit scope       │  │  (memory / postgres)         │
//! │    -> bounded queue           │  └──────────────────────────────┘
//! │    -> dispatcher              │                 ▲
//! └───────────────────────────────┘                 │
//!                 │                                 │
//!                 ▼                                 │
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Evaluator                                                      │
//! │  overrides -> control tree fan-out -> fold -> persist           │
//! └─────────────────────────────────────────────────────────────────┘
//!                 │                                │
//!                 ▼                                ▼
//! ┌───────────────────────────────┐  ┌──────────────────────────────┐
//! │  ControlCache                 │  │  Orchestrator (port)         │
//! │  catalog -> "{cat}-{id}"      │  │  scopes, catalogs, controls, │
//! └───────────────────────────────┘  │  assessment results          │
//!                                    └──────────────────────────────┘
//! ```
//!
//! # Usage
//!
//! ```ignore
//! use evaluation_core::{EvaluationService, MemoryStore, ServiceConfig};
//!
//! let service = EvaluationService::new(
//!     Arc::new(MemoryStore::new()),
//!     orchestrator,
//!     ServiceConfig::default(),
//! );
//! service.start_evaluation("audit-scope-1", Some(5)).await?;
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod orchestrator;
pub mod overrides;
pub mod query;
pub mod scheduler;
pub mod service;
pub mod store;
#[cfg(feature = "postgres")]
pub mod store_postgres;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod types;

pub use cache::ControlCache;
pub use config::ServiceConfig;
pub use error::{EvaluationError, Result};
pub use evaluator::Evaluator;
pub use orchestrator::Orchestrator;
pub use query::{PageToken, ResultFilter};
pub use scheduler::Scheduler;
pub use service::{EvaluationService, ListResultsRequest, ListResultsResponse};
pub use store::{EvaluationStore, MemoryStore};
#[cfg(feature = "postgres")]
pub use store_postgres::PgEvaluationStore;
pub use types::*;
