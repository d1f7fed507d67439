//! Stage engine: evaluates an application's documents against the policy
//! and executes guarded, audited transitions.
//!
//! Every mutating entry point takes the application's lock first, so the
//! audit trail for one application is a linear history. The stage write is
//! the authoritative fact; audit, timers, notification and broadcast run
//! after it and their failures are logged rather than returned.

mod locks;

pub use locks::{ApplicationGuard, ApplicationLocks};

use std::sync::{Arc, Weak};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::PipelineError;
use crate::notify::NotificationPayload;
use crate::ports::{
    ApplicationRecord, ApplicationStore, AuditLog, DocumentTallyProvider, StageBroadcast,
    StageEvent, StageTransition,
};
use crate::queue::{JobType, RetryQueue};
use crate::state_machine::{ApplicationId, DocumentTally, Role, Stage, StagePolicy};
use crate::timers::{TimerFire, TimerRegistry};

/// Read-only result of running the policy against current documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Evaluation {
    pub application_id: ApplicationId,
    pub current_stage: Stage,
    pub suggested_stage: Stage,
    pub reason: String,
    pub should_update: bool,
    pub tally: DocumentTally,
}

/// What a mutating call did. `updated == false` means nothing was written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub updated: bool,
    pub from_stage: Stage,
    pub to_stage: Stage,
    pub reason: String,
}

impl TransitionOutcome {
    fn unchanged(evaluation: &Evaluation) -> Self {
        Self {
            updated: false,
            from_stage: evaluation.current_stage,
            to_stage: evaluation.current_stage,
            reason: evaluation.reason.clone(),
        }
    }
}

pub struct StageEngine {
    store: Arc<dyn ApplicationStore>,
    documents: Arc<dyn DocumentTallyProvider>,
    audit: Arc<dyn AuditLog>,
    broadcast: Arc<dyn StageBroadcast>,
    queue: Arc<RetryQueue>,
    timers: Arc<TimerRegistry>,
    locks: ApplicationLocks,
}

impl StageEngine {
    pub fn new(
        store: Arc<dyn ApplicationStore>,
        documents: Arc<dyn DocumentTallyProvider>,
        audit: Arc<dyn AuditLog>,
        broadcast: Arc<dyn StageBroadcast>,
        queue: Arc<RetryQueue>,
        timers: Arc<TimerRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            documents,
            audit,
            broadcast,
            queue,
            timers,
            locks: ApplicationLocks::new(),
        })
    }

    pub fn queue(&self) -> &Arc<RetryQueue> {
        &self.queue
    }

    pub fn timers(&self) -> &Arc<TimerRegistry> {
        &self.timers
    }

    async fn load(&self, id: &ApplicationId) -> Result<ApplicationRecord, PipelineError> {
        self.store
            .load(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(id.clone()))
    }

    async fn tally(&self, id: &ApplicationId) -> Result<DocumentTally, PipelineError> {
        self.documents
            .document_tally(id)
            .await?
            .ok_or_else(|| PipelineError::NotFound(id.clone()))
    }

    /// Fetch the tally and current stage and run the policy. No side effects.
    pub async fn evaluate(&self, id: &ApplicationId) -> Result<Evaluation, PipelineError> {
        let record = self.load(id).await?;
        let tally = self.tally(id).await?;
        let current = record.stage;

        let evaluation = match StagePolicy::evaluate_auto_transition(&tally, current) {
            Some(suggestion) => Evaluation {
                application_id: id.clone(),
                current_stage: current,
                suggested_stage: suggestion.target,
                reason: suggestion.reason,
                should_update: suggestion.target != current,
                tally,
            },
            None => Evaluation {
                application_id: id.clone(),
                current_stage: current,
                suggested_stage: current,
                reason: format!("no change ({tally})"),
                should_update: false,
                tally,
            },
        };
        Ok(evaluation)
    }

    /// Apply a previously computed evaluation.
    ///
    /// Fails without writing anything if the evaluation belongs to another
    /// application, the stored stage moved since the evaluation, the move is not in the adjacency table, or `role` may not
    /// enter the target stage.
    pub async fn transition(
        &self,
        id: &ApplicationId,
        evaluation: &Evaluation,
        actor: &str,
        role: Role,
    ) -> Result<TransitionOutcome, PipelineError> {
        let _guard = self.locks.acquire(id).await;
        self.transition_locked(id, evaluation, actor, role).await
    }

    /// Evaluate and, when the policy suggests a different stage, transition.
    ///
    /// The entry point for document hooks, sweeps and timers. Calling it again
    /// without a document change is a no-op.
    pub async fn evaluate_and_transition(
        &self,
        id: &ApplicationId,
        actor: &str,
        role: Role,
    ) -> Result<TransitionOutcome, PipelineError> {
        let _guard = self.locks.acquire(id).await;
        let evaluation = self.evaluate(id).await?;
        if !evaluation.should_update {
            debug!(
                application_id = %id,
                stage = %evaluation.current_stage,
                reason = %evaluation.reason,
                "evaluation left stage unchanged"
            );
            return Ok(TransitionOutcome::unchanged(&evaluation));
        }
        self.transition_locked(id, &evaluation, actor, role).await
    }

    /// Explicit move to `target`, e.g. the hand-off to a lender or a final
    /// decision. Subject to the same adjacency and role checks.
    pub async fn advance(
        &self,
        id: &ApplicationId,
        target: Stage,
        actor: &str,
        role: Role,
        reason: &str,
    ) -> Result<TransitionOutcome, PipelineError> {
        let _guard = self.locks.acquire(id).await;
        let record = self.load(id).await?;
        let tally = self.tally(id).await?;
        let evaluation = Evaluation {
            application_id: id.clone(),
            current_stage: record.stage,
            suggested_stage: target,
            reason: reason.to_string(),
            should_update: true,
            tally,
        };
        self.transition_locked(id, &evaluation, actor, role).await
    }

    /// Audit trail for one application, oldest first.
    pub async fn history(&self, id: &ApplicationId) -> Result<Vec<StageTransition>, PipelineError> {
        Ok(self.audit.history(id).await?)
    }

    async fn transition_locked(
        &self,
        id: &ApplicationId,
        evaluation: &Evaluation,
        actor: &str,
        role: Role,
    ) -> Result<TransitionOutcome, PipelineError> {
        if evaluation.application_id != *id {
            return Err(PipelineError::EvaluationMismatch {
                evaluated: evaluation.application_id.clone(),
                target: id.clone(),
            });
        }
        if !evaluation.should_update {
            return Ok(TransitionOutcome::unchanged(evaluation));
        }

        let record = self.load(id).await?;
        if record.stage != evaluation.current_stage {
            return Err(PipelineError::StaleEvaluation {
                expected: evaluation.current_stage,
                actual: record.stage,
            });
        }

        let from = record.stage;
        let to = evaluation.suggested_stage;
        if !StagePolicy::is_transition_allowed(from, to) {
            return Err(PipelineError::InvalidTransition { from, to });
        }
        if !StagePolicy::has_permission(to, role) {
            return Err(PipelineError::PermissionDenied { role, stage: to });
        }

        self.store.set_stage(id, to).await?;
        info!(
            application_id = %id,
            %from,
            %to,
            %actor,
            %role,
            reason = %evaluation.reason,
            "stage transition"
        );

        let transition = StageTransition {
            application_id: id.clone(),
            from_stage: from,
            to_stage: to,
            reason: evaluation.reason.clone(),
            actor: actor.to_string(),
            occurred_at: Utc::now(),
        };

        if let Err(err) = self.audit.append(transition.clone()).await {
            error!(
                application_id = %id,
                %from,
                %to,
                error = %err,
                "audit append failed after stage write"
            );
        }

        self.timers.arm(id, to);
        self.notify(&record, to, &evaluation.reason, false);

        if let Err(err) = self.broadcast.emit(StageEvent::stage_changed(&transition)) {
            debug!(application_id = %id, error = %err, "stage event not delivered");
        }

        Ok(TransitionOutcome {
            updated: true,
            from_stage: from,
            to_stage: to,
            reason: evaluation.reason.clone(),
        })
    }

    /// Enqueue a stage notification when the stage has a template and the
    /// application has somewhere to send it.
    fn notify(&self, record: &ApplicationRecord, stage: Stage, reason: &str, reminder: bool) {
        let Some(destination) = record.contact.as_deref() else {
            debug!(application_id = %record.id, "no contact on file, skipping notification");
            return;
        };
        let Some(mut payload) = NotificationPayload::for_stage(destination, stage, reason) else {
            return;
        };
        if reminder {
            payload = payload.as_reminder();
        }

        match serde_json::to_value(&payload) {
            Ok(value) => {
                self.queue
                    .enqueue_job(JobType::NotificationSend, record.id.clone(), value, None);
            }
            Err(err) => {
                error!(application_id = %record.id, error = %err, "notification payload not encodable");
            }
        }
    }

    /// Drive re-evaluations from timer fires until the engine is dropped.
    pub fn spawn_timer_driver(
        self: &Arc<Self>,
        mut fires: mpsc::UnboundedReceiver<TimerFire>,
    ) -> JoinHandle<()> {
        let engine: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            while let Some(fire) = fires.recv().await {
                let Some(engine) = engine.upgrade() else {
                    break;
                };
                engine.on_timer(fire).await;
            }
            debug!("timer driver stopped");
        })
    }

    async fn on_timer(&self, fire: TimerFire) {
        let actor = format!("timer:{}", fire.label);
        let id = &fire.application_id;
        match self.evaluate_and_transition(id, &actor, Role::System).await {
            Ok(outcome) if outcome.updated => {}
            Ok(outcome) => {
                if fire.remind && outcome.to_stage == fire.stage {
                    match self.load(id).await {
                        Ok(record) => {
                            info!(application_id = %id, stage = %fire.stage, "sending reminder");
                            self.notify(&record, fire.stage, &outcome.reason, true);
                        }
                        Err(err) => warn!(application_id = %id, error = %err, "reminder skipped"),
                    }
                }
            }
            Err(err) => {
                warn!(application_id = %id, timer = %fire.label, error = %err, "timer re-evaluation failed");
            }
        }
    }
}
