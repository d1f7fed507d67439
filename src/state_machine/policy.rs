use serde::{Deserialize, Serialize};

use super::stage::{DocumentTally, Role, Stage};

/// A stage suggested by auto-evaluation, with a human-readable reason.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AutoTransition {
    pub target: Stage,
    pub reason: String,
}

impl AutoTransition {
    fn to(target: Stage, reason: impl Into<String>) -> Self {
        Self {
            target,
            reason: reason.into(),
        }
    }
}

/// Pure transition rules: adjacency, role permissions and auto-evaluation.
///
/// Nothing here performs I/O, so every rule can be checked in isolation.
pub struct StagePolicy;

const ELEVATED: &[Role] = &[Role::Underwriter, Role::Admin];
const OPERATIONAL: &[Role] = &[
    Role::Broker,
    Role::Processor,
    Role::Underwriter,
    Role::Admin,
    Role::System,
];
const RESET: &[Role] = &[Role::Admin];

impl StagePolicy {
    /// Stages reachable in one step from `from`. Empty for terminal stages.
    pub fn next_stages(from: Stage) -> &'static [Stage] {
        match from {
            Stage::New => &[Stage::RequiresDocs, Stage::InReview, Stage::Declined],
            Stage::RequiresDocs => &[Stage::InReview, Stage::Declined],
            Stage::InReview => &[Stage::RequiresDocs, Stage::OffToLender, Stage::Declined],
            Stage::OffToLender => &[
                Stage::RequiresDocs,
                Stage::InReview,
                Stage::Accepted,
                Stage::Declined,
            ],
            Stage::Accepted | Stage::Declined => &[],
        }
    }

    pub fn is_transition_allowed(from: Stage, to: Stage) -> bool {
        Self::next_stages(from).contains(&to)
    }

    /// Roles allowed to move an application *into* `stage`.
    pub fn allowed_roles(stage: Stage) -> &'static [Role] {
        match stage {
            Stage::New => RESET,
            Stage::RequiresDocs | Stage::InReview => OPERATIONAL,
            Stage::OffToLender | Stage::Accepted | Stage::Declined => ELEVATED,
        }
    }

    pub fn has_permission(stage: Stage, role: Role) -> bool {
        Self::allowed_roles(stage).contains(&role)
    }

    /// Suggest a stage from the document tally.
    ///
    /// Rules are checked in priority order; the two `OffToLender` repairs must
    /// run before any forward rule. Auto-evaluation never suggests
    /// `OffToLender`, and terminal stages never get a suggestion.
    ///
    /// A returned suggestion may equal `current`; callers decide whether that
    /// is an update.
    pub fn evaluate_auto_transition(
        tally: &DocumentTally,
        current: Stage,
    ) -> Option<AutoTransition> {
        if current.is_terminal() {
            return None;
        }

        if current == Stage::OffToLender {
            if tally.is_empty() {
                return Some(AutoTransition::to(
                    Stage::RequiresDocs,
                    "sent to lender with no documents on file",
                ));
            }
            if tally.rejected > 0 {
                return Some(AutoTransition::to(
                    Stage::RequiresDocs,
                    format!(
                        "sent to lender with {} rejected document(s)",
                        tally.rejected
                    ),
                ));
            }
            if tally.pending > 0 {
                return Some(AutoTransition::to(
                    Stage::InReview,
                    format!("sent to lender with {} pending document(s)", tally.pending),
                ));
            }
        }

        if tally.is_empty() {
            return Some(AutoTransition::to(
                Stage::RequiresDocs,
                "no documents uploaded",
            ));
        }

        if tally.accepted < tally.total {
            if tally.rejected > 0 {
                return Some(AutoTransition::to(
                    Stage::RequiresDocs,
                    format!("{} document(s) rejected", tally.rejected),
                ));
            }
            let outstanding = tally.total - tally.accepted;
            return Some(AutoTransition::to(
                Stage::InReview,
                format!("{outstanding} document(s) awaiting review"),
            ));
        }

        if tally.is_complete() && current != Stage::OffToLender {
            return Some(AutoTransition::to(
                Stage::InReview,
                format!("all {} document(s) accepted", tally.total),
            ));
        }

        None
    }
}
