//! Evaluation Server - gRPC front end for the evaluation engine
//!
//! ```text
//! ┌──────────────────────────────┐        ┌──────────────────────────────┐
//! │  gRPC clients                │        │  Orchestrator (gRPC)         │
//! └──────────────────────────────┘        └──────────────────────────────┘
//!                │                                       ▲
//!                ▼                                       │
//! ┌──────────────────────────────┐        ┌──────────────────────────────┐
//! │  EvaluationGrpcService       │        │  GrpcOrchestrator            │
//! │  proto <-> domain, Status    │        │  lazy channel                │
//! └──────────────────────────────┘        └──────────────────────────────┘
//!                │                                       ▲
//!                ▼                                       │
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │  evaluation_core::EvaluationService                                 │
//! └─────────────────────────────────────────────────────────────────────┘
//! ```

pub mod config;
pub mod convert;
pub mod orchestrator_client;
pub mod proto;
pub mod server;

pub use config::ServerConfig;
pub use orchestrator_client::GrpcOrchestrator;
pub use server::EvaluationGrpcService;
