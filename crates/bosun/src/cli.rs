//! Command-line interface definition and dispatch

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Log format options
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogFormat {
    /// Human-readable text format
    Text,
    /// JSON structured format
    Json,
}

/// Log level options
#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    /// Error messages only
    Error,
    /// Warning and error messages
    Warn,
    /// Informational messages and above
    Info,
    /// Debug messages and above
    Debug,
    /// All messages including trace
    Trace,
}

/// Deploy orchestrator subcommands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Run a deploy of a reference to a configured stage
    Deploy {
        /// Path to the stage configuration file
        #[arg(long, short = 'c')]
        config: PathBuf,

        /// Name of the stage to deploy to
        #[arg(long)]
        stage: String,

        /// Source reference to deploy (tag, branch, or SHA)
        #[arg(long = "ref")]
        reference: String,

        /// Name of the user requesting the deploy
        #[arg(long)]
        user: String,

        /// Name of the buddy approving the deploy, when the stage requires
        /// approval
        #[arg(long)]
        approve_as: Option<String>,
    },

    /// List the stages in a configuration file
    Stages {
        /// Path to the stage configuration file
        #[arg(long, short = 'c')]
        config: PathBuf,

        /// Emit the configuration as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
}

/// Bosun: run deploys as supervised command sequences
#[derive(Debug, Parser)]
#[command(name = "bosun", version, about = "Deploy orchestrator")]
pub struct Cli {
    /// Log format (text or json)
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    /// Log level
    #[arg(long, global = true, value_enum, default_value = "info")]
    pub log_level: LogLevel,

    #[command(subcommand)]
    pub command: Commands,
}

impl Cli {
    /// Initialize logging from the global options, then execute the selected
    /// subcommand.
    pub async fn dispatch(self) -> Result<()> {
        let log_format = match self.log_format {
            Some(LogFormat::Text) => Some("text"),
            Some(LogFormat::Json) => Some("json"),
            None => None, // let the logging module consult the environment
        };

        let log_level = match self.log_level {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        };

        // An explicit filter in the environment wins over the flag
        if std::env::var_os("BOSUN_LOG").is_none() && std::env::var_os("RUST_LOG").is_none() {
            std::env::set_var(
                "RUST_LOG",
                format!("bosun={},bosun_core={}", log_level, log_level),
            );
        }
        bosun_core::logging::init(log_format)?;
        tracing::debug!("CLI initialized with log level: {}", log_level);

        match self.command {
            Commands::Deploy {
                config,
                stage,
                reference,
                user,
                approve_as,
            } => {
                let args = crate::commands::deploy::DeployArgs {
                    config,
                    stage,
                    reference,
                    user,
                    approve_as,
                };
                crate::commands::deploy::execute(args).await
            }
            Commands::Stages { config, json } => {
                crate::commands::stages::execute(&config, json)
            }
        }
    }
}
