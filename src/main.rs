use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tracing::info;

use stagegate::broadcast::StageBroadcaster;
use stagegate::cli::{Cli, Command};
use stagegate::config::PipelineConfig;
use stagegate::engine::StageEngine;
use stagegate::error::FailureKind;
use stagegate::notify::{
    HttpNotificationGateway, NotificationExecutor, NotificationGateway, NotificationPayload,
    WebhookExecutor,
};
use stagegate::ports::{ApplicationRecord, AttemptLog, AuditLog, StageTransition};
use stagegate::queue::{AttemptRecord, ExecutorRegistry, JobType, RetryConfig, RetryQueue};
use stagegate::state_machine::{ApplicationId, DocumentTally, Role, Stage, StagePolicy};
use stagegate::store::{
    InMemoryApplications, InMemoryAttemptLog, InMemoryAuditLog, InMemoryDocuments, JsonlLog,
};
use stagegate::timers::TimerRegistry;
use stagegate::ui::{DrainProgress, Printer};
use stagegate::{telemetry, PipelineError};

// Backoff base used by the demo so the queue drains in seconds.
const DEMO_BACKOFF_MS: u64 = 200;

/// Gateway used when no notification URL is configured: logs instead of sending.
struct LogGateway;

#[async_trait]
impl NotificationGateway for LogGateway {
    async fn send(&self, payload: &NotificationPayload) -> Result<(), FailureKind> {
        info!(
            destination = %payload.destination,
            template = %payload.template,
            "notification (not sent, no gateway configured)"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = PipelineConfig::load(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;

    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    telemetry::init(level)?;

    match cli.command {
        Command::Demo => run_demo(&config).await,
        Command::Evaluate {
            stage,
            total,
            accepted,
            rejected,
            pending,
        } => {
            let stage = Stage::from(stage);
            let tally = DocumentTally::new(total, accepted, rejected, pending);
            let printer = Printer::default();
            printer.section("Policy");
            let suggestion = StagePolicy::evaluate_auto_transition(&tally, stage);
            printer.suggestion(stage, &tally, suggestion.as_ref());
            let next: Vec<String> = StagePolicy::next_stages(stage)
                .iter()
                .map(ToString::to_string)
                .collect();
            println!("  reachable: [{}]", next.join(", "));
            Ok(())
        }
        Command::Backoff {
            base_ms,
            max_attempts,
        } => {
            let defaults = config.retry_config();
            let retry = RetryConfig {
                max_attempts: max_attempts.unwrap_or(defaults.max_attempts),
                backoff_base_ms: base_ms.unwrap_or(defaults.backoff_base_ms),
            };
            let printer = Printer::default();
            printer.section("Retry schedule");
            printer.backoff(&retry);
            Ok(())
        }
    }
}

fn executors(config: &PipelineConfig) -> Result<ExecutorRegistry> {
    let mut registry = match &config.gateway.notification_url {
        Some(url) => ExecutorRegistry::new().register(
            JobType::NotificationSend,
            Arc::new(NotificationExecutor::new(Arc::new(
                HttpNotificationGateway::new(url.as_str())?,
            ))),
        ),
        None => ExecutorRegistry::new().register(
            JobType::NotificationSend,
            Arc::new(NotificationExecutor::new(Arc::new(LogGateway))),
        ),
    };
    if let Some(url) = &config.gateway.sync_url {
        registry = registry.register(JobType::SyncCall, Arc::new(WebhookExecutor::new(url.as_str())?));
    }
    if let Some(url) = &config.gateway.extraction_url {
        registry = registry.register(
            JobType::ExtractionTrigger,
            Arc::new(WebhookExecutor::new(url.as_str())?),
        );
    }
    Ok(registry)
}

async fn run_demo(config: &PipelineConfig) -> Result<()> {
    let printer = Printer::default();

    let audit: Arc<dyn AuditLog> = match &config.audit_log_path {
        Some(path) => Arc::new(JsonlLog::<StageTransition>::new(path)),
        None => Arc::new(InMemoryAuditLog::default()),
    };
    let attempts: Arc<dyn AttemptLog> = match &config.attempt_log_path {
        Some(path) => Arc::new(JsonlLog::<AttemptRecord>::new(path)),
        None => Arc::new(InMemoryAttemptLog::default()),
    };

    let mut queue_config = config.queue_config();
    queue_config.default_retry.backoff_base_ms = DEMO_BACKOFF_MS;
    let queue = RetryQueue::new(executors(config)?, attempts, queue_config);

    let apps = Arc::new(InMemoryApplications::default());
    let docs = Arc::new(InMemoryDocuments::default());
    let broadcaster = StageBroadcaster::default();
    let mut events = broadcaster.subscribe();
    let (timers, fires) = TimerRegistry::new(config.timer_plan());

    let engine = StageEngine::new(
        apps.clone(),
        docs.clone(),
        audit,
        Arc::new(broadcaster),
        Arc::clone(&queue),
        Arc::new(timers),
    );
    let driver = engine.spawn_timer_driver(fires);

    let id = ApplicationId::new("demo-1");
    apps.insert(ApplicationRecord::new(id.clone(), Stage::New).with_contact("+15550100"))
        .await;
    docs.set(&id, DocumentTally::default()).await;

    printer.section("Document flow");
    let outcome = engine.evaluate_and_transition(&id, "intake", Role::System).await?;
    printer.outcome("no documents yet", &outcome);

    docs.set(&id, DocumentTally::new(3, 1, 0, 2)).await;
    let outcome = engine.evaluate_and_transition(&id, "upload-hook", Role::System).await?;
    printer.outcome("3 uploaded, 2 pending", &outcome);

    let outcome = engine.evaluate_and_transition(&id, "upload-hook", Role::System).await?;
    printer.outcome("repeat evaluation", &outcome);

    docs.set(&id, DocumentTally::new(3, 3, 0, 0)).await;
    let outcome = engine.evaluate_and_transition(&id, "review-hook", Role::Processor).await?;
    printer.outcome("all accepted", &outcome);

    printer.section("Privileged transitions");
    match engine
        .advance(&id, Stage::OffToLender, "pat", Role::Processor, "file complete")
        .await
    {
        Ok(outcome) => printer.outcome("processor hand-off", &outcome),
        Err(err @ PipelineError::PermissionDenied { .. }) => {
            printer.rejected("processor hand-off", &err)
        }
        Err(err) => return Err(err.into()),
    }
    let outcome = engine
        .advance(&id, Stage::OffToLender, "uma", Role::Underwriter, "file complete")
        .await?;
    printer.outcome("underwriter hand-off", &outcome);
    let outcome = engine
        .advance(&id, Stage::Accepted, "uma", Role::Underwriter, "lender approved")
        .await?;
    printer.outcome("lender decision", &outcome);

    let outcome = engine.evaluate_and_transition(&id, "sweep", Role::System).await?;
    printer.outcome("sweep after decision", &outcome);

    printer.section("History");
    printer.history(&engine.history(&id).await?);

    printer.section("Queue");
    printer.queue(&queue.status());
    let progress = DrainProgress::start("draining retry queue");
    queue.wait_idle().await;
    progress.finish("retry queue drained");
    for job in queue.parked() {
        printer.job(&job);
    }

    let mut delivered = 0;
    while events.try_recv().is_ok() {
        delivered += 1;
    }
    println!("  {delivered} stage event(s) broadcast");

    driver.abort();
    Ok(())
}
