//! ---
//! bh_section: "03-persistence-logging"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Metrics collection and export utilities."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, StatusCode};
use axum::routing::get;
use axum::response::{IntoResponse, Response};
use axum::Router;
use prometheus::{
    Encoder, Gauge, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder, TEXT_FORMAT,
};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, info};

/// Shared registry type used across services.
pub type SharedRegistry = Arc<Registry>;

/// Produce a new shared registry.
pub fn new_registry() -> SharedRegistry {
    Arc::new(Registry::new())
}

/// Spawn an HTTP server that exposes the registry at `/metrics`.
pub async fn spawn_http_server(registry: SharedRegistry, addr: SocketAddr) -> Result<MetricsServer> {
    let app = Router::new().route(
        "/metrics",
        get({
            let registry = registry.clone();
            move || metrics_handler(registry.clone())
        }),
    );

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics listener {}", addr))?;
    let local_addr = listener
        .local_addr()
        .context("failed to read metrics listener address")?;

    info!(address = %local_addr, "metrics server starting");

    let (shutdown_tx, shutdown_rx) = oneshot::channel();
    let handle: JoinHandle<Result<()>> = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.await;
            })
            .await
            .context("metrics server encountered an error")?;
        Ok(())
    });

    Ok(MetricsServer {
        addr: local_addr,
        shutdown: Some(shutdown_tx),
        task: handle,
    })
}

/// Encode every gathered family in the text exposition format.
pub fn encode_text(registry: &Registry) -> Result<String> {
    let mut buffer = Vec::new();
    TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .context("failed to encode metric families")?;
    String::from_utf8(buffer).context("metric text was not utf-8")
}

async fn metrics_handler(registry: SharedRegistry) -> Response {
    match encode_text(&registry) {
        Ok(body) => (
            [(header::CONTENT_TYPE, HeaderValue::from_static(TEXT_FORMAT))],
            body,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "metrics scrape failed");
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding error").into_response()
        }
    }
}

/// Handle to the running HTTP exporter.
#[derive(Debug)]
pub struct MetricsServer {
    addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<Result<()>>,
}

impl MetricsServer {
    /// Return the bound address for convenience.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Signal shutdown and await task completion.
    pub async fn shutdown(mut self) -> Result<()> {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        match self.task.await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(err)) => Err(err),
            Err(join_err) => Err(anyhow::Error::new(join_err)),
        }
    }
}

/// Metrics recorded by the ingestion and control pipeline.
#[derive(Clone, Debug)]
pub struct PipelineMetrics {
    measurements: IntCounterVec,
    out_of_order: IntCounter,
    estimate: Gauge,
    log_rows: IntGauge,
    forwards: IntCounterVec,
    forward_bytes: IntGauge,
}

impl PipelineMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let measurements = IntCounterVec::new(
            Opts::new(
                "bh_measurements_total",
                "Inbound measurements by outcome (recorded, discarded)",
            ),
            &["outcome"],
        )?;
        registry.register(Box::new(measurements.clone()))?;

        let out_of_order = IntCounter::with_opts(Opts::new(
            "bh_out_of_order_total",
            "Measurements whose time did not advance past the previous one",
        ))?;
        registry.register(Box::new(out_of_order.clone()))?;

        let estimate = Gauge::with_opts(Opts::new(
            "bh_estimated_value",
            "Current estimated actual value held by the control loop",
        ))?;
        registry.register(Box::new(estimate.clone()))?;

        let log_rows = IntGauge::with_opts(Opts::new(
            "bh_log_rows_total",
            "Data rows appended to the history log since start",
        ))?;
        registry.register(Box::new(log_rows.clone()))?;

        let forwards = IntCounterVec::new(
            Opts::new(
                "bh_forward_total",
                "Snapshot forwarding ticks by result (ok, failed)",
            ),
            &["result"],
        )?;
        registry.register(Box::new(forwards.clone()))?;

        let forward_bytes = IntGauge::with_opts(Opts::new(
            "bh_forward_bytes",
            "Size of the most recently forwarded snapshot",
        ))?;
        registry.register(Box::new(forward_bytes.clone()))?;

        Ok(Self {
            measurements,
            out_of_order,
            estimate,
            log_rows,
            forwards,
            forward_bytes,
        })
    }

    pub fn record_measurement(&self, outcome: &str) {
        self.measurements.with_label_values(&[outcome]).inc();
    }

    pub fn record_out_of_order(&self) {
        self.out_of_order.inc();
    }

    pub fn set_estimate(&self, value: f64) {
        self.estimate.set(value);
    }

    pub fn set_log_rows(&self, rows: u64) {
        self.log_rows.set(i64::try_from(rows).unwrap_or(i64::MAX));
    }

    pub fn record_forward(&self, ok: bool, bytes: usize) {
        let result = if ok { "ok" } else { "failed" };
        self.forwards.with_label_values(&[result]).inc();
        if ok {
            self.forward_bytes
                .set(i64::try_from(bytes).unwrap_or(i64::MAX));
        }
    }
}

/// Metrics recorded by the display sink.
#[derive(Clone, Debug)]
pub struct SinkMetrics {
    uploads: IntCounter,
    documents: IntCounterVec,
}

impl SinkMetrics {
    pub fn new(registry: SharedRegistry) -> Result<Self> {
        let uploads = IntCounter::with_opts(Opts::new(
            "bh_sink_uploads_total",
            "Snapshots received on the sink ingress endpoint",
        ))?;
        registry.register(Box::new(uploads.clone()))?;

        let documents = IntCounterVec::new(
            Opts::new(
                "bh_sink_documents_total",
                "Latest-reading documents by persistence result (ok, failed, skipped)",
            ),
            &["result"],
        )?;
        registry.register(Box::new(documents.clone()))?;

        Ok(Self { uploads, documents })
    }

    pub fn record_upload(&self) {
        self.uploads.inc();
    }

    pub fn record_document(&self, result: &str) {
        self.documents.with_label_values(&[result]).inc();
    }
}

pub use prometheus;
