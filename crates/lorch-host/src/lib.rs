//! Orchestration of a local ledger node for match-based game sessions:
//! node bootstrap, per-match chain/app allocation, and idempotent result
//! submission.

pub mod cli;
pub mod config;
pub mod coordinator;
pub mod deployments;
pub mod error;
pub mod extract;
pub mod factory;
pub mod gate;
pub mod graphql;
pub mod http;
pub mod model;
pub mod orchestrator;
pub mod pipeline;
pub mod process;
pub mod services;

pub use config::{OrchestratorConfig, ProvisionedConfig, ServiceConfig, TimingConfig};
pub use error::{OrchestratorError, OrchestratorResult};
pub use model::{MatchResult, Submission};
pub use orchestrator::{AllocatedMatch, Orchestrator};
