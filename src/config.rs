//! Configuração do stagegate carregada a partir de `stagegate.toml`.
//!
//! A struct [`PipelineConfig`] contém todos os parâmetros configuráveis.
//! Valores não presentes no arquivo usam defaults sensíveis.
//! A variável de ambiente `STAGEGATE_NOTIFICATION_URL` tem precedência
//! sobre `gateway.notification_url`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;
use crate::queue::{MAX_ATTEMPTS_LIMIT, MAX_DELAY_MS, QueueConfig, RetryConfig};
use crate::timers::{MAX_TIMER_HOURS, TimerPlan, TimerPlanHours};

pub const DEFAULT_CONFIG_PATH: &str = "stagegate.toml";
pub const NOTIFICATION_URL_ENV: &str = "STAGEGATE_NOTIFICATION_URL";

/// Configuração de nível superior carregada de `stagegate.toml`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub retry: RetrySection,

    #[serde(default)]
    pub timers: TimerSection,

    #[serde(default)]
    pub gateway: GatewaySection,

    #[serde(default)]
    pub logging: LoggingSection,

    /// Arquivo JSON-lines para o histórico de transições. Em memória se ausente.
    #[serde(default)]
    pub audit_log_path: Option<PathBuf>,

    /// Arquivo JSON-lines para o log de tentativas da fila.
    #[serde(default)]
    pub attempt_log_path: Option<PathBuf>,
}

/// Política padrão da fila de retentativas.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Atraso base em milissegundos para backoff exponencial.
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,

    #[serde(default = "default_executor_timeout_ms")]
    pub executor_timeout_ms: u64,
}

/// Prazos dos timers por estágio, em horas.
#[derive(Debug, Clone, Deserialize)]
pub struct TimerSection {
    #[serde(default = "default_in_review_sla_hours")]
    pub in_review_sla_hours: u64,

    #[serde(default = "default_requires_docs_reminder_hours")]
    pub requires_docs_reminder_hours: u64,

    #[serde(default = "default_off_to_lender_followup_hours")]
    pub off_to_lender_followup_hours: u64,
}

/// Endpoints externos. Jobs de um tipo sem URL ficam sem executor.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewaySection {
    #[serde(default)]
    pub notification_url: Option<String>,

    #[serde(default)]
    pub sync_url: Option<String>,

    #[serde(default)]
    pub extraction_url: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingSection {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_executor_timeout_ms() -> u64 {
    10_000
}

fn default_in_review_sla_hours() -> u64 {
    48
}

fn default_requires_docs_reminder_hours() -> u64 {
    72
}

fn default_off_to_lender_followup_hours() -> u64 {
    96
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_ms: default_backoff_base_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            executor_timeout_ms: default_executor_timeout_ms(),
        }
    }
}

impl Default for TimerSection {
    fn default() -> Self {
        Self {
            in_review_sla_hours: default_in_review_sla_hours(),
            requires_docs_reminder_hours: default_requires_docs_reminder_hours(),
            off_to_lender_followup_hours: default_off_to_lender_followup_hours(),
        }
    }
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl PipelineConfig {
    /// Carrega a configuração de `path`.
    /// Usa valores padrão se o arquivo não existir.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<PipelineConfig>(&contents)?
        } else {
            Self::default()
        };

        if let Ok(url) = std::env::var(NOTIFICATION_URL_ENV)
            && !url.is_empty()
        {
            config.gateway.notification_url = Some(url);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.retry.max_attempts > MAX_ATTEMPTS_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "retry.max_attempts must be at most {MAX_ATTEMPTS_LIMIT}"
            )));
        }
        if self.retry.backoff_base_ms > MAX_DELAY_MS {
            return Err(ConfigError::Invalid(format!(
                "retry.backoff_base_ms must be at most {MAX_DELAY_MS}"
            )));
        }
        if self.retry.poll_interval_ms == 0 {
            return Err(ConfigError::Invalid(
                "retry.poll_interval_ms must be positive".into(),
            ));
        }
        let t = &self.timers;
        if t.in_review_sla_hours == 0
            || t.requires_docs_reminder_hours == 0
            || t.off_to_lender_followup_hours == 0
        {
            return Err(ConfigError::Invalid("timer hours must be positive".into()));
        }
        if t.in_review_sla_hours > MAX_TIMER_HOURS
            || t.requires_docs_reminder_hours > MAX_TIMER_HOURS
            || t.off_to_lender_followup_hours > MAX_TIMER_HOURS
        {
            return Err(ConfigError::Invalid(format!(
                "timer hours must be at most {MAX_TIMER_HOURS}"
            )));
        }
        Ok(())
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry.max_attempts,
            backoff_base_ms: self.retry.backoff_base_ms,
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            poll_interval: Duration::from_millis(self.retry.poll_interval_ms),
            executor_timeout: Duration::from_millis(self.retry.executor_timeout_ms),
            default_retry: self.retry_config(),
        }
    }

    pub fn timer_plan(&self) -> TimerPlan {
        TimerPlanHours {
            in_review_sla: self.timers.in_review_sla_hours,
            requires_docs_reminder: self.timers.requires_docs_reminder_hours,
            off_to_lender_followup: self.timers.off_to_lender_followup_hours,
        }
        .into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::Stage;
    use std::io::Write;

    #[test]
    fn default_config_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.backoff_base_ms, 30_000);
        assert_eq!(config.timers.in_review_sla_hours, 48);
        assert_eq!(config.logging.level, "info");
        assert!(config.gateway.notification_url.is_none());
        assert!(config.audit_log_path.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            audit_log_path = "/var/lib/stagegate/audit.jsonl"

            [retry]
            max_attempts = 5

            [gateway]
            sync_url = "http://crm.internal/sync"
        "#;
        let config: PipelineConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.retry.backoff_base_ms, 30_000);
        assert_eq!(config.timers.off_to_lender_followup_hours, 96);
        assert_eq!(config.gateway.sync_url.as_deref(), Some("http://crm.internal/sync"));
        assert_eq!(
            config.audit_log_path,
            Some(PathBuf::from("/var/lib/stagegate/audit.jsonl"))
        );
    }

    #[test]
    fn load_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig::load(dir.path().join("missing.toml")).unwrap();
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn load_rejects_zero_attempts() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retry]\nmax_attempts = 0").unwrap();
        let err = PipelineConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn validate_rejects_out_of_range_retry_settings() {
        let mut config = PipelineConfig::default();
        config.retry.max_attempts = MAX_ATTEMPTS_LIMIT + 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.retry.max_attempts = MAX_ATTEMPTS_LIMIT;
        config.validate().unwrap();

        config.retry.backoff_base_ms = MAX_DELAY_MS + 1;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn load_rejects_timer_hours_beyond_a_year() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[timers]\nin_review_sla_hours = 1000000").unwrap();
        let err = PipelineConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let mut config = PipelineConfig::default();
        config.timers.off_to_lender_followup_hours = MAX_TIMER_HOURS;
        config.validate().unwrap();
    }

    #[test]
    fn load_reports_malformed_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[retry\nmax_attempts = 2").unwrap();
        let err = PipelineConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn derived_queue_and_timer_settings() {
        let mut config = PipelineConfig::default();
        config.retry.poll_interval_ms = 250;
        config.timers.in_review_sla_hours = 1;

        let queue = config.queue_config();
        assert_eq!(queue.poll_interval, Duration::from_millis(250));
        assert_eq!(queue.default_retry, RetryConfig::default());

        let plan = config.timer_plan();
        assert_eq!(plan.for_stage(Stage::InReview)[0].after, Duration::from_secs(3_600));
        assert!(plan.for_stage(Stage::Accepted).is_empty());
    }
}
