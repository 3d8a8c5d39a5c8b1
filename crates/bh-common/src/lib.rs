//! ---
//! bh_section: "01-core-functionality"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Shared primitives and utilities for the pipeline services."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
//! Shared primitives for the Budget Home workspace.
//! This crate exposes configuration loading and tracing setup consumed by the
//! daemon, the control pipeline and the display tier.

pub mod config;
pub mod logging;

pub use config::{
    AppConfig, BrokerConfig, ControlConfig, DisplayConfig, ForwarderConfig, LoadedAppConfig,
    LoggingConfig, MetricsConfig, OrderingPolicy, RecorderConfig, SourceConfig,
};
pub use logging::{init_tracing, LogFormat};
