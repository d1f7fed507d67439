use thiserror::Error;

use crate::state_machine::{ApplicationId, Role, Stage};

/// Errors surfaced synchronously by the stage engine.
///
/// Policy violations never mutate state. Side-effect failures after a stage
/// write are logged by the engine and do not appear here.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Application not found: {0}")]
    NotFound(ApplicationId),

    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition { from: Stage, to: Stage },

    #[error("Role {role} may not move an application to {stage}")]
    PermissionDenied { role: Role, stage: Stage },

    #[error("Evaluation for {evaluated} applied to {target}")]
    EvaluationMismatch {
        evaluated: ApplicationId,
        target: ApplicationId,
    },

    #[error("Stale evaluation: expected stage {expected}, found {actual}")]
    StaleEvaluation { expected: Stage, actual: Stage },

    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

/// Failures reported by collaborators (application store, tallies, logs).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Classifies a job failure. Both kinds are retried with backoff.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize, Error)]
pub enum FailureKind {
    /// The remote side understood and refused the request.
    #[error("Business failure: {0}")]
    Business(String),
    /// Transport, timeout or wiring failure.
    #[error("System failure: {0}")]
    System(String),
}

/// Errors returned by operator-triggered queue actions.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("No {job_type} job queued or parked for application {application_id}")]
    NoJob {
        application_id: ApplicationId,
        job_type: crate::queue::JobType,
    },

    #[error("Job {job_id} is running right now")]
    InFlight { job_id: crate::queue::JobId },

    #[error("Manual retry failed: {0}")]
    Failed(FailureKind),
}

/// Real-time fan-out failures. Always swallowed by the engine.
#[derive(Debug, Error)]
pub enum BroadcastError {
    #[error("no subscribers for {0}")]
    NoSubscribers(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid config: {0}")]
    Invalid(String),
}
