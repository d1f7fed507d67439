//! Interface de linha de comando do stagegate baseada em clap.
//!
//! Define a struct [`Cli`] com subcomandos [`Command`] (demo, evaluate, backoff)
//! e flags globais (--config, --verbose).

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::config::DEFAULT_CONFIG_PATH;
use crate::queue::{MAX_ATTEMPTS_LIMIT, MAX_DELAY_MS};
use crate::state_machine::Stage;

/// stagegate: motor de estágios para pedidos de crédito.
#[derive(Debug, Parser)]
#[command(name = "stagegate", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Caminho do arquivo de configuração.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Habilita saída detalhada (verbose).
    #[arg(long, short, global = true, default_value_t = false)]
    pub verbose: bool,
}

/// Estágio aceito pela CLI, mapeado para [`Stage`] internamente.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StageArg {
    New,
    RequiresDocs,
    InReview,
    OffToLender,
    Accepted,
    Declined,
}

impl From<StageArg> for Stage {
    fn from(arg: StageArg) -> Self {
        match arg {
            StageArg::New => Stage::New,
            StageArg::RequiresDocs => Stage::RequiresDocs,
            StageArg::InReview => Stage::InReview,
            StageArg::OffToLender => Stage::OffToLender,
            StageArg::Accepted => Stage::Accepted,
            StageArg::Declined => Stage::Declined,
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Executa a demonstração embutida com colaboradores em memória.
    Demo,

    /// Avalia a política para um estágio e uma contagem de documentos.
    Evaluate {
        #[arg(long, value_enum)]
        stage: StageArg,

        #[arg(long, default_value_t = 0)]
        total: u32,

        #[arg(long, default_value_t = 0)]
        accepted: u32,

        #[arg(long, default_value_t = 0)]
        rejected: u32,

        #[arg(long, default_value_t = 0)]
        pending: u32,
    },

    /// Mostra o cronograma de retentativas.
    Backoff {
        /// Atraso base em milissegundos. Usa o valor configurado se omitido.
        #[arg(long, value_parser = clap::value_parser!(u64).range(..=MAX_DELAY_MS))]
        base_ms: Option<u64>,

        #[arg(long, value_parser = clap::value_parser!(u32).range(1..=i64::from(MAX_ATTEMPTS_LIMIT)))]
        max_attempts: Option<u32>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_parses_evaluate_subcommand() {
        let cli = Cli::parse_from([
            "stagegate",
            "evaluate",
            "--stage",
            "requires-docs",
            "--total",
            "3",
            "--accepted",
            "2",
            "--pending",
            "1",
        ]);
        match cli.command {
            Command::Evaluate {
                stage,
                total,
                accepted,
                rejected,
                pending,
            } => {
                assert_eq!(Stage::from(stage), Stage::RequiresDocs);
                assert_eq!((total, accepted, rejected, pending), (3, 2, 0, 1));
            }
            _ => panic!("expected Evaluate command"),
        }
    }

    #[test]
    fn cli_parses_global_flags() {
        let cli = Cli::parse_from(["stagegate", "--config", "/etc/sg.toml", "--verbose", "demo"]);
        assert!(cli.verbose);
        assert_eq!(cli.config, PathBuf::from("/etc/sg.toml"));
        assert!(matches!(cli.command, Command::Demo));
    }

    #[test]
    fn cli_defaults_config_path() {
        let cli = Cli::parse_from(["stagegate", "backoff", "--base-ms", "1000"]);
        assert_eq!(cli.config, PathBuf::from(DEFAULT_CONFIG_PATH));
        match cli.command {
            Command::Backoff {
                base_ms,
                max_attempts,
            } => {
                assert_eq!(base_ms, Some(1000));
                assert!(max_attempts.is_none());
            }
            _ => panic!("expected Backoff command"),
        }
    }

    #[test]
    fn cli_rejects_out_of_range_backoff_arguments() {
        for attempts in ["0", "4000000000"] {
            let parsed = Cli::try_parse_from(["stagegate", "backoff", "--max-attempts", attempts]);
            assert!(parsed.is_err(), "max-attempts {attempts} accepted");
        }
        let too_long = (MAX_DELAY_MS + 1).to_string();
        assert!(Cli::try_parse_from(["stagegate", "backoff", "--base-ms", too_long.as_str()]).is_err());

        let cli = Cli::try_parse_from(["stagegate", "backoff", "--max-attempts", "100"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Backoff {
                max_attempts: Some(100),
                ..
            }
        ));
    }

    #[test]
    fn cli_verify() {
        Cli::command().debug_assert();
    }
}
