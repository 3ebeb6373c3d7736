//! ---
//! rfr_section: "01-core-functionality"
//! rfr_subsection: "module"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "Tracing subscriber setup with console and rolling file output."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
//! Tracing setup for binaries. Library crates only emit events.
//!
//! Startup is two-phase: [`bootstrap_subscriber`] covers configuration loading,
//! then [`init_tracing`] installs the global subscriber the configuration asks for.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::filter::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::util::SubscriberInitExt;

use crate::config::LoggingConfig;

/// Filter override consulted before `RUST_LOG`.
pub const LOG_ENV: &str = "RFR_LOG";

/// Lifecycle crates log at `info`; dependencies such as `reqwest` and `hyper` only warn.
pub const DEFAULT_DIRECTIVES: &str = "warn,rfr_common=info,rfr_core=info,rfr_arm=info,rfrctl=info";

/// Console layout. The rolling file is always JSON.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum LogFormat {
    #[default]
    StructuredJson,
    Pretty,
}

/// Keeps the non-blocking writers flushing. Hold it until the process exits.
#[must_use = "dropping the guard stops log delivery"]
pub struct TracingGuard {
    _console: WorkerGuard,
    _file: WorkerGuard,
}

/// Filter directives and the place they were taken from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FilterChoice {
    pub directives: String,
    pub source: &'static str,
}

/// `RFR_LOG` wins over `RUST_LOG`; blank values count as unset.
pub fn choose_directives(rfr_log: Option<String>, rust_log: Option<String>) -> FilterChoice {
    let set = |value: Option<String>| value.filter(|value| !value.trim().is_empty());
    if let Some(directives) = set(rfr_log) {
        return FilterChoice {
            directives,
            source: LOG_ENV,
        };
    }
    if let Some(directives) = set(rust_log) {
        return FilterChoice {
            directives,
            source: "RUST_LOG",
        };
    }
    FilterChoice {
        directives: DEFAULT_DIRECTIVES.to_owned(),
        source: "default",
    }
}

/// Build the filter from the environment. Invalid directives fall back to
/// [`DEFAULT_DIRECTIVES`] and come back as a message to log once tracing is up.
fn env_filter() -> (EnvFilter, Option<String>) {
    let choice = choose_directives(std::env::var(LOG_ENV).ok(), std::env::var("RUST_LOG").ok());
    match EnvFilter::try_new(&choice.directives) {
        Ok(filter) => (filter, None),
        Err(err) => (
            EnvFilter::new(DEFAULT_DIRECTIVES),
            Some(format!(
                "ignoring invalid {} directives {:?}: {}",
                choice.source, choice.directives, err
            )),
        ),
    }
}

/// Base name of the daily log file. The appender appends the date.
pub fn log_file_name(service_name: &str, config: &LoggingConfig) -> String {
    format!(
        "{}.log",
        config.file_prefix.as_deref().unwrap_or(service_name)
    )
}

/// Stderr-only subscriber for the window before configuration is loaded.
///
/// Meant for [`tracing::subscriber::with_default`], so it never becomes the global default.
pub fn bootstrap_subscriber() -> impl Subscriber + Send + Sync {
    let (filter, _) = env_filter();
    tracing_subscriber::registry().with(filter).with(
        fmt::layer()
            .with_target(true)
            .with_writer(std::io::stderr),
    )
}

/// Install the global subscriber: stderr in the configured format plus a daily JSON file.
///
/// Fails when the log directory cannot be created or a global subscriber already exists.
pub fn init_tracing(service_name: &str, config: &LoggingConfig) -> Result<TracingGuard> {
    std::fs::create_dir_all(&config.directory).with_context(|| {
        format!(
            "cannot create log directory {}",
            config.directory.display()
        )
    })?;
    let file_name = log_file_name(service_name, config);
    let (file_writer, file_guard) =
        tracing_appender::non_blocking(rolling::daily(&config.directory, &file_name));
    let (console_writer, console_guard) = tracing_appender::non_blocking(std::io::stderr());
    let (filter, rejected) = env_filter();

    let console_layer = match config.format {
        LogFormat::StructuredJson => fmt::layer()
            .with_target(false)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .json()
            .with_writer(console_writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .with_target(true)
            .with_timer(fmt::time::UtcTime::rfc_3339())
            .with_writer(console_writer)
            .boxed(),
    };
    let file_layer = fmt::layer()
        .with_target(true)
        .with_timer(fmt::time::UtcTime::rfc_3339())
        .json()
        .with_writer(file_writer)
        .boxed();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .context("a global tracing subscriber is already installed")?;

    if let Some(problem) = rejected {
        warn!("{problem}");
    }
    info!(
        service = %service_name,
        log_file = %config.directory.join(&file_name).display(),
        format = ?config.format,
        "tracing initialised"
    );
    Ok(TracingGuard {
        _console: console_guard,
        _file: file_guard,
    })
}
