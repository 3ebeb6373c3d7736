//! ---
//! rfr_section: "01-core-functionality"
//! rfr_subsection: "module"
//! rfr_type: "source"
//! rfr_scope: "code"
//! rfr_description: "Shared configuration and logging exports."
//! rfr_version: "v0.0.0-prealpha"
//! rfr_owner: "tbd"
//! ---
//! Core shared primitives for the route filter rule workspace.
//! This crate exposes configuration loading and tracing setup consumed
//! by the controller, the HTTP adapter and the CLI.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, FeatureConfig, LoadedAppConfig, LoggingConfig, MetricsConfig, PollingConfig,
    ProviderConfig, TimeoutConfig,
};
pub use logging::{bootstrap_subscriber, init_tracing, LogFormat, TracingGuard};
