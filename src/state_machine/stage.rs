use std::fmt;

use serde::{Deserialize, Serialize};

/// The six stages of a loan application.
///
/// Each application flows through: NEW → REQUIRES_DOCS ⇄ IN_REVIEW → OFF_TO_LENDER → ACCEPTED | DECLINED
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    New,
    RequiresDocs,
    InReview,
    OffToLender,
    Accepted,
    Declined,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::New,
        Stage::RequiresDocs,
        Stage::InReview,
        Stage::OffToLender,
        Stage::Accepted,
        Stage::Declined,
    ];

    /// `Accepted` and `Declined` have no outgoing transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, Stage::Accepted | Stage::Declined)
    }

    /// Stable snake_case key used for templates, timer labels and log fields.
    pub fn key(self) -> &'static str {
        match self {
            Stage::New => "new",
            Stage::RequiresDocs => "requires_docs",
            Stage::InReview => "in_review",
            Stage::OffToLender => "off_to_lender",
            Stage::Accepted => "accepted",
            Stage::Declined => "declined",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::New => write!(f, "NEW"),
            Stage::RequiresDocs => write!(f, "REQUIRES_DOCS"),
            Stage::InReview => write!(f, "IN_REVIEW"),
            Stage::OffToLender => write!(f, "OFF_TO_LENDER"),
            Stage::Accepted => write!(f, "ACCEPTED"),
            Stage::Declined => write!(f, "DECLINED"),
        }
    }
}

/// Who is asking for a transition. Elevated roles gate the lender hand-off
/// and the terminal outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Applicant,
    Broker,
    Processor,
    Underwriter,
    Admin,
    /// Automated callers: document hooks, sweeps and timers.
    System,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Role::Applicant => "applicant",
            Role::Broker => "broker",
            Role::Processor => "processor",
            Role::Underwriter => "underwriter",
            Role::Admin => "admin",
            Role::System => "system",
        };
        f.write_str(label)
    }
}

/// Identifier wrapper for applications.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ApplicationId(pub String);

impl ApplicationId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Counts of an application's documents by status. Recomputed on every
/// evaluation and never persisted here.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentTally {
    pub total: u32,
    pub accepted: u32,
    pub rejected: u32,
    pub pending: u32,
    pub missing_expected: u32,
}

impl DocumentTally {
    pub fn new(total: u32, accepted: u32, rejected: u32, pending: u32) -> Self {
        Self {
            total,
            accepted,
            rejected,
            pending,
            missing_expected: 0,
        }
    }

    pub fn with_missing(mut self, missing_expected: u32) -> Self {
        self.missing_expected = missing_expected;
        self
    }

    pub fn is_empty(&self) -> bool {
        self.total == 0
    }

    /// Every document is accepted and nothing is outstanding.
    pub fn is_complete(&self) -> bool {
        self.total > 0 && self.accepted == self.total && self.rejected == 0 && self.pending == 0
    }
}

impl fmt::Display for DocumentTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} total, {} accepted, {} rejected, {} pending",
            self.total, self.accepted, self.rejected, self.pending
        )?;
        if self.missing_expected > 0 {
            write!(f, ", {} missing", self.missing_expected)?;
        }
        Ok(())
    }
}
