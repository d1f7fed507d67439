//! Per-stage delayed and repeating timers.
//!
//! Entering a stage arms that stage's timers and cancels whatever the
//! previous stage armed. A fire is only a message on a channel: the engine's
//! timer driver turns it into a re-evaluation, so timers never write a stage.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio::time::sleep;
use tracing::debug;

use crate::state_machine::{ApplicationId, Stage};

const HOUR: u64 = 60 * 60;

/// Longest timer accepted from configuration, one year.
pub const MAX_TIMER_HOURS: u64 = 24 * 365;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerSpec {
    pub label: String,
    pub after: Duration,
    pub repeat: bool,
    /// Send a reminder notification when the fire changes nothing.
    pub remind: bool,
}

impl TimerSpec {
    pub fn once(label: impl Into<String>, after: Duration) -> Self {
        Self {
            label: label.into(),
            after,
            repeat: false,
            remind: false,
        }
    }

    pub fn every(label: impl Into<String>, after: Duration) -> Self {
        Self {
            repeat: true,
            ..Self::once(label, after)
        }
    }

    pub fn reminding(mut self) -> Self {
        self.remind = true;
        self
    }
}

/// Timer specs for each stage. Stages without an entry arm nothing.
#[derive(Debug, Clone, Default)]
pub struct TimerPlan {
    specs: HashMap<Stage, Vec<TimerSpec>>,
}

impl TimerPlan {
    pub fn empty() -> Self {
        Self::default()
    }

    /// SLA check in review, repeating document reminders, repeating lender follow-up.
    pub fn standard(
        in_review_sla: Duration,
        requires_docs_reminder: Duration,
        off_to_lender_followup: Duration,
    ) -> Self {
        Self::empty()
            .with(Stage::InReview, TimerSpec::once("review_sla", in_review_sla))
            .with(
                Stage::RequiresDocs,
                TimerSpec::every("documents_reminder", requires_docs_reminder).reminding(),
            )
            .with(
                Stage::OffToLender,
                TimerSpec::every("lender_followup", off_to_lender_followup),
            )
    }

    pub fn with(mut self, stage: Stage, spec: TimerSpec) -> Self {
        self.specs.entry(stage).or_default().push(spec);
        self
    }

    pub fn for_stage(&self, stage: Stage) -> &[TimerSpec] {
        self.specs.get(&stage).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Hour-granularity inputs for [`TimerPlan::standard`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerPlanHours {
    pub in_review_sla: u64,
    pub requires_docs_reminder: u64,
    pub off_to_lender_followup: u64,
}

impl Default for TimerPlanHours {
    fn default() -> Self {
        Self {
            in_review_sla: 48,
            requires_docs_reminder: 72,
            off_to_lender_followup: 96,
        }
    }
}

impl From<TimerPlanHours> for TimerPlan {
    fn from(hours: TimerPlanHours) -> Self {
        TimerPlan::standard(
            Duration::from_secs(hours.in_review_sla.saturating_mul(HOUR)),
            Duration::from_secs(hours.requires_docs_reminder.saturating_mul(HOUR)),
            Duration::from_secs(hours.off_to_lender_followup.saturating_mul(HOUR)),
        )
    }
}

/// Message sent when an armed timer elapses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimerFire {
    pub application_id: ApplicationId,
    /// Stage the timer was armed for.
    pub stage: Stage,
    pub label: String,
    pub remind: bool,
}

struct Armed {
    stage: Stage,
    labels: Vec<String>,
    tasks: Vec<AbortHandle>,
}

impl Armed {
    fn abort(&self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

pub struct TimerRegistry {
    plan: TimerPlan,
    armed: Mutex<HashMap<ApplicationId, Armed>>,
    fires: mpsc::UnboundedSender<TimerFire>,
}

impl TimerRegistry {
    /// Returns the registry and the receiving end of its fire channel.
    pub fn new(plan: TimerPlan) -> (Self, mpsc::UnboundedReceiver<TimerFire>) {
        let (fires, rx) = mpsc::unbounded_channel();
        let registry = Self {
            plan,
            armed: Mutex::new(HashMap::new()),
            fires,
        };
        (registry, rx)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ApplicationId, Armed>> {
        self.armed.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cancel the application's timers and arm the ones for `stage`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn arm(&self, id: &ApplicationId, stage: Stage) {
        let specs = self.plan.for_stage(stage);
        let tasks: Vec<AbortHandle> = specs
            .iter()
            .map(|spec| {
                let fire = TimerFire {
                    application_id: id.clone(),
                    stage,
                    label: spec.label.clone(),
                    remind: spec.remind,
                };
                let after = spec.after;
                let repeat = spec.repeat;
                let tx = self.fires.clone();
                tokio::spawn(async move {
                    loop {
                        sleep(after).await;
                        debug!(
                            application_id = %fire.application_id,
                            timer = %fire.label,
                            "timer fired"
                        );
                        if tx.send(fire.clone()).is_err() || !repeat {
                            break;
                        }
                    }
                })
                .abort_handle()
            })
            .collect();

        let armed = Armed {
            stage,
            labels: specs.iter().map(|spec| spec.label.clone()).collect(),
            tasks,
        };

        let previous = {
            let mut map = self.lock();
            if armed.tasks.is_empty() {
                map.remove(id)
            } else {
                map.insert(id.clone(), armed)
            }
        };
        if let Some(previous) = previous {
            previous.abort();
        }
        debug!(application_id = %id, %stage, "timers armed");
    }

    /// Cancel every timer for the application. Returns whether any were armed.
    pub fn cancel(&self, id: &ApplicationId) -> bool {
        let removed = self.lock().remove(id);
        match removed {
            Some(armed) => {
                armed.abort();
                true
            }
            None => false,
        }
    }

    /// Stage and labels currently armed for the application.
    pub fn armed(&self, id: &ApplicationId) -> Option<(Stage, Vec<String>)> {
        self.lock()
            .get(id)
            .map(|armed| (armed.stage, armed.labels.clone()))
    }
}

impl Drop for TimerRegistry {
    fn drop(&mut self) {
        for armed in self.lock().values() {
            armed.abort();
        }
    }
}
