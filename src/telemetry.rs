//! Inicialização do subscriber `tracing`.
//!
//! `RUST_LOG` tem precedência sobre o nível configurado em `[logging]`.

use thiserror::Error;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::ParseError;

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log level/filter '{value}'")]
    EnvFilter {
        value: String,
        #[source]
        source: ParseError,
    },

    #[error("telemetry error: {0}")]
    Subscriber(Box<dyn std::error::Error + Send + Sync>),
}

/// Instala o subscriber global. Falha se já houver um instalado.
pub fn init(level: &str) -> Result<(), TelemetryError> {
    let env_filter = filter(std::env::var(EnvFilter::DEFAULT_ENV).ok().as_deref(), level)?;

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .try_init()
        .map_err(TelemetryError::Subscriber)
}

/// Escolhe o filtro: `env` (valor de `RUST_LOG`) quando válido, senão `level`.
fn filter(env: Option<&str>, level: &str) -> Result<EnvFilter, TelemetryError> {
    if let Some(directives) = env
        && let Ok(filter) = EnvFilter::try_new(directives)
    {
        return Ok(filter);
    }
    EnvFilter::try_new(level).map_err(|source| TelemetryError::EnvFilter {
        value: level.to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_subscriber::filter::LevelFilter;

    #[test]
    fn garbage_level_is_rejected() {
        let err = filter(None, "stagegate=loud").unwrap_err();
        assert!(matches!(err, TelemetryError::EnvFilter { ref value, .. } if value == "stagegate=loud"));
    }

    #[test]
    fn configured_level_accepts_directives() {
        let filter = filter(None, "info,stagegate=debug").unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }

    #[test]
    fn environment_wins_over_configured_level() {
        let filter = filter(Some("warn"), "stagegate=loud").unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn broken_environment_falls_back_to_configured_level() {
        let filter = filter(Some("stagegate=loud"), "debug").unwrap();
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));
    }
}
