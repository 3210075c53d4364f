//! Logging and observability
//!
//! Structured logging via `tracing`, with text or JSON output selected at
//! runtime. All log output goes to stderr so stdout stays reserved for
//! command/job output.
//!
//! ## Environment variables
//!
//! * `BOSUN_LOG_FORMAT` - output format ("json" for JSON, anything else for text)
//! * `BOSUN_LOG` - logging filter (e.g. `bosun_core=debug`)
//! * `RUST_LOG` - standard fallback filter

use anyhow::Result;
use std::{io, sync::Once};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Initialize the logging system with an optional format override.
///
/// Sets up tracing-subscriber with either JSON or text formatting. Safe to
/// call multiple times; subsequent calls are no-ops.
///
/// # Arguments
///
/// * `format` - `None` or `"text"` for human-readable output, `"json"` for
///   structured JSON. When `None`, `BOSUN_LOG_FORMAT` is consulted.
pub fn init(format: Option<&str>) -> Result<()> {
    INIT.call_once(|| {
        let filter = create_env_filter();

        let env_format = std::env::var("BOSUN_LOG_FORMAT").ok();
        let effective_format = format.or(env_format.as_deref()).unwrap_or("text");

        match effective_format {
            "json" => {
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .json()
                            .with_target(true)
                            .with_writer(io::stderr),
                    )
                    .with(filter)
                    .init();
            }
            _ => {
                tracing_subscriber::registry()
                    .with(fmt::layer().with_target(true).with_writer(io::stderr))
                    .with(filter)
                    .init();
            }
        }

        tracing::debug!("Logging initialized with format: {}", effective_format);
    });

    Ok(())
}

/// Build the env filter from `BOSUN_LOG`, falling back to `RUST_LOG`, then "info".
fn create_env_filter() -> EnvFilter {
    if let Ok(filter) = std::env::var("BOSUN_LOG") {
        EnvFilter::new(filter)
    } else if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new("info")
    }
}
