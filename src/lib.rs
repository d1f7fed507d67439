//! Stage engine for loan applications.
//!
//! Documents drive an application through a fixed set of stages. The
//! [`engine::StageEngine`] evaluates the current document tally against the
//! [`state_machine::StagePolicy`], applies guarded transitions and hands side
//! effects to the [`queue::RetryQueue`]. Per-stage timers re-run the
//! evaluation so nothing sits in a stage unnoticed.

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod notify;
pub mod ports;
pub mod queue;
pub mod state_machine;
pub mod store;
pub mod telemetry;
pub mod timers;
pub mod ui;

pub use engine::{Evaluation, StageEngine, TransitionOutcome};
pub use error::{FailureKind, PipelineError};
pub use state_machine::{ApplicationId, DocumentTally, Role, Stage, StagePolicy};
