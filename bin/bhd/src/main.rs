//! ---
//! bh_section: "01-core-functionality"
//! bh_subsection: "binary"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Binary entrypoint for the Budget Home daemon."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use bh_common::config::AppConfig;
use bh_common::logging::{init_tracing, LogFormat};
use bh_core::{spawn_pipeline, ControlLoopEngine, Pipeline, SnapshotForwarder};
use bh_display::{
    spawn_display_server, spawn_persistence_task, DisplayState, DocumentStore, JsonLinesStore,
};
use bh_metrics::{new_registry, spawn_http_server, MetricsServer, PipelineMetrics, SharedRegistry, SinkMetrics};
use bh_msg::{MqttPublisher, MqttSubscriber};
use bh_persistence::HistoryRecorder;
use bh_sim::run_publisher;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const DEFAULT_CONFIG: &str = "configs/budget-home.toml";

#[derive(Debug, Parser)]
#[command(author, version, about = "Budget Home daemon", long_about = None)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "Path to configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "FORMAT", help = "Override stdout log format (json, pretty)")]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Subcommand)]
enum Commands {
    #[command(about = "Run the control pipeline and snapshot forwarder")]
    Serve,
    #[command(about = "Run the display sink")]
    Display,
    #[command(about = "Publish the telemetry scenario once")]
    Publish,
    #[command(about = "Validate and print the effective configuration")]
    CheckConfig,
}

impl Commands {
    fn service_name(self) -> &'static str {
        match self {
            Commands::Serve | Commands::CheckConfig => "bhd",
            Commands::Display => "bhd-display",
            Commands::Publish => "bhd-publish",
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Serve);
    let (mut config, source) = load_config(cli.config.as_ref())?;
    if let Some(format) = cli.log_format {
        config.logging.format = format;
    }

    if command == Commands::CheckConfig {
        let rendered = toml::to_string_pretty(&config).context("failed to render configuration")?;
        match &source {
            Some(path) => println!("# loaded from {}", path.display()),
            None => println!("# built-in defaults"),
        }
        print!("{rendered}");
        return Ok(());
    }

    init_tracing(command.service_name(), &config.logging)?;
    match &source {
        Some(path) => info!(config_path = %path.display(), "configuration loaded"),
        None => info!("no configuration file found; using built-in defaults"),
    }

    match command {
        Commands::Serve => run_serve(config).await,
        Commands::Display => run_display(config).await,
        Commands::Publish => run_publish(config).await,
        Commands::CheckConfig => Ok(()),
    }
}

/// Explicit `--config` and `BH_CONFIG` must resolve; otherwise a missing
/// default file falls back to built-in defaults.
fn load_config(explicit: Option<&PathBuf>) -> Result<(AppConfig, Option<PathBuf>)> {
    let env_override = std::env::var(AppConfig::ENV_CONFIG_PATH)
        .map(|value| !value.trim().is_empty())
        .unwrap_or(false);

    let mut candidates = Vec::new();
    if let Some(path) = explicit {
        candidates.push(path.clone());
    }
    candidates.push(PathBuf::from(DEFAULT_CONFIG));

    if explicit.is_none() && !env_override && !candidates.iter().any(|path| path.exists()) {
        let config = AppConfig::default();
        config.validate()?;
        return Ok((config, None));
    }
    let loaded = AppConfig::load_with_source(&candidates)?;
    Ok((loaded.config, Some(loaded.source)))
}

async fn start_metrics(config: &AppConfig) -> Result<(Option<SharedRegistry>, Option<MetricsServer>)> {
    if !config.metrics.enabled {
        info!("metrics exporter disabled by configuration");
        return Ok((None, None));
    }
    let registry = new_registry();
    let server = spawn_http_server(registry.clone(), config.metrics.listen).await?;
    info!(address = %server.addr(), "metrics exporter enabled");
    Ok((Some(registry), Some(server)))
}

async fn run_serve(config: AppConfig) -> Result<()> {
    let (registry, metrics_server) = start_metrics(&config).await?;
    let metrics = registry.map(PipelineMetrics::new).transpose()?;

    let engine = ControlLoopEngine::from_config(&config.control)?;
    let recorder = HistoryRecorder::create(&config.recorder.path).with_context(|| {
        format!(
            "unable to create history log {}",
            config.recorder.path.display()
        )
    })?;
    let mut pipeline = Pipeline::new(engine, recorder, config.control.ordering);
    let mut forwarder = SnapshotForwarder::from_config(&config.forwarder, &config.recorder.path)?;
    if let Some(metrics) = metrics {
        pipeline = pipeline.with_metrics(metrics.clone());
        forwarder = forwarder.with_metrics(metrics);
    }

    let (shutdown_tx, _) = broadcast::channel(4);
    let subscriber = MqttSubscriber::new(&config.broker);
    let handle = spawn_pipeline(
        subscriber,
        pipeline,
        config.broker.queue_capacity,
        shutdown_tx.subscribe(),
    );
    let forward_task = forwarder.spawn(shutdown_tx.subscribe());
    let mut pipeline_task = tokio::spawn(handle.wait());

    info!(
        topic = %config.broker.topic,
        log = %config.recorder.path.display(),
        "control pipeline running; waiting for termination signal"
    );
    let outcome = tokio::select! {
        _ = shutdown_signal() => {
            info!("termination signal received; shutting down");
            let _ = shutdown_tx.send(());
            pipeline_task.await?
        }
        joined = &mut pipeline_task => joined?,
    };

    let _ = shutdown_tx.send(());
    if let Err(err) = forward_task.await {
        warn!(error = %err, "forwarder task join error");
    }
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }

    match outcome {
        Ok(summary) => {
            info!(
                recorded = summary.recorded,
                discarded = summary.discarded,
                estimate = summary.final_estimate,
                "control pipeline stopped"
            );
            Ok(())
        }
        Err(err) => {
            error!(error = %err, "control pipeline failed");
            Err(err).context("control pipeline failed")
        }
    }
}

async fn run_display(config: AppConfig) -> Result<()> {
    let (registry, metrics_server) = start_metrics(&config).await?;
    let mut state = DisplayState::new();
    if let Some(registry) = registry {
        state = state.with_metrics(SinkMetrics::new(registry)?);
    }

    let server = spawn_display_server(state.clone(), config.display.listen).await?;
    let store: Arc<dyn DocumentStore> = Arc::new(JsonLinesStore::new(config.display.store_path.clone()));
    let (shutdown_tx, _) = broadcast::channel(1);
    let persist_task = spawn_persistence_task(
        state,
        store,
        config.display.persist_interval,
        shutdown_tx.subscribe(),
    );

    info!(address = %server.local_addr(), "display sink running; waiting for termination signal");
    shutdown_signal().await;
    info!("termination signal received; shutting down");
    let _ = shutdown_tx.send(());
    if let Err(err) = persist_task.await {
        warn!(error = %err, "persistence task join error");
    }
    server.shutdown().await?;
    if let Some(server) = metrics_server {
        server.shutdown().await?;
    }
    Ok(())
}

async fn run_publish(config: AppConfig) -> Result<()> {
    let publisher = MqttPublisher::spawn(&config.broker, &config.source.client_id);
    let result = tokio::select! {
        result = run_publisher(&publisher, &config.source) => result,
        _ = shutdown_signal() => {
            info!("termination signal received; stopping telemetry source");
            Ok(0)
        }
    };
    publisher.close().await?;
    let published = result?;
    info!(published, topic = %config.broker.topic, "telemetry source finished");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            warn!(error = %err, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(err) => {
                warn!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serve_is_the_default_command() {
        let cli = Cli::try_parse_from(["bhd"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.command.unwrap_or(Commands::Serve), Commands::Serve);
    }

    #[test]
    fn parses_global_flags_and_subcommand() {
        let cli = Cli::try_parse_from([
            "bhd",
            "--config",
            "custom.toml",
            "--log-format",
            "pretty",
            "display",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("custom.toml")));
        assert_eq!(cli.log_format, Some(LogFormat::Pretty));
        assert_eq!(cli.command, Some(Commands::Display));
    }

    #[test]
    fn rejects_unknown_log_format() {
        assert!(Cli::try_parse_from(["bhd", "--log-format", "xml"]).is_err());
    }
}
