//! Interface de terminal do stagegate: spinners e saída colorida.
//!
//! Usa as crates `indicatif` para spinners de progresso e `console` para
//! estilização com cores.

use std::time::Duration;

use console::Style;
use indicatif::{ProgressBar, ProgressStyle};

use crate::engine::TransitionOutcome;
use crate::ports::StageTransition;
use crate::queue::{JobSnapshot, QueueStatus, RetryConfig};
use crate::state_machine::{AutoTransition, DocumentTally, Stage};

/// Spinner exibido enquanto a fila de retentativas esvazia.
pub struct DrainProgress {
    pb: ProgressBar,
}

impl DrainProgress {
    pub fn start(message: &str) -> Self {
        let pb = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}") {
            pb.set_style(style);
        }
        pb.set_message(message.to_string());
        pb.enable_steady_tick(Duration::from_millis(100));
        Self { pb }
    }

    pub fn finish(self, message: &str) {
        self.pb.finish_and_clear();
        println!("  {} {message}", Style::new().green().bold().apply_to("✓"));
    }
}

/// Saída colorida para resultados do motor, da política e da fila.
pub struct Printer {
    green: Style,
    red: Style,
    yellow: Style,
    dim: Style,
}

impl Default for Printer {
    fn default() -> Self {
        Self {
            green: Style::new().green().bold(),
            red: Style::new().red().bold(),
            yellow: Style::new().yellow(),
            dim: Style::new().dim(),
        }
    }
}

impl Printer {
    pub fn section(&self, title: &str) {
        println!();
        println!("{}", self.dim.apply_to(format!("─── {title} ───")));
    }

    pub fn outcome(&self, label: &str, outcome: &TransitionOutcome) {
        if outcome.updated {
            println!(
                "  {} {label}: {} → {} ({})",
                self.green.apply_to("✓"),
                outcome.from_stage,
                outcome.to_stage,
                outcome.reason
            );
        } else {
            println!(
                "  {} {label}: stays {} ({})",
                self.dim.apply_to("·"),
                outcome.to_stage,
                outcome.reason
            );
        }
    }

    pub fn rejected(&self, label: &str, error: &dyn std::fmt::Display) {
        println!("  {} {label}: {error}", self.red.apply_to("✗"));
    }

    /// Resultado puro da política, sem efeitos.
    pub fn suggestion(&self, stage: Stage, tally: &DocumentTally, suggestion: Option<&AutoTransition>) {
        println!("  stage: {stage}");
        println!("  documents: {tally}");
        match suggestion {
            Some(s) if s.target != stage => println!(
                "  {} move to {} ({})",
                self.yellow.apply_to("→"),
                s.target,
                s.reason
            ),
            Some(s) => println!("  {} stay ({})", self.dim.apply_to("·"), s.reason),
            None => println!("  {} no change", self.dim.apply_to("·")),
        }
    }

    pub fn history(&self, transitions: &[StageTransition]) {
        for t in transitions {
            println!(
                "  {} {} → {} by {} ({})",
                self.dim.apply_to(t.occurred_at.format("%H:%M:%S")),
                t.from_stage,
                t.to_stage,
                t.actor,
                t.reason
            );
        }
    }

    pub fn queue(&self, status: &QueueStatus) {
        if status.total_jobs == 0 {
            println!("  {} queue empty", self.green.apply_to("✓"));
            return;
        }
        println!("  {} job(s) pending", status.total_jobs);
        for job in &status.jobs {
            self.job(job);
        }
    }

    pub fn job(&self, job: &JobSnapshot) {
        let state = match &job.last_error {
            Some(err) => self.yellow.apply_to(format!("last error: {err}")).to_string(),
            None => self.dim.apply_to("not yet run").to_string(),
        };
        println!(
            "  {} {} attempt {}/{} due {} {state}",
            job.job_type,
            job.application_id,
            job.attempt,
            job.max_attempts,
            job.scheduled_at.format("%H:%M:%S"),
        );
    }

    pub fn backoff(&self, retry: &RetryConfig) {
        println!(
            "  first run after {}ms, {} attempt(s) max",
            retry.backoff_base_ms, retry.max_attempts
        );
        for (i, delay) in retry.schedule().iter().enumerate() {
            println!(
                "  {} after failure {}: retry in {delay}ms",
                self.yellow.apply_to("↻"),
                i + 1
            );
        }
        println!(
            "  {} after failure {}: dropped",
            self.red.apply_to("✗"),
            retry.max_attempts
        );
    }
}
