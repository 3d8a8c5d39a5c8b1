//! ---
//! bh_section: "01-core-functionality"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Periodic forwarding of the history log to the display sink."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use bh_common::config::ForwarderConfig;
use bh_metrics::PipelineMetrics;
use bh_persistence::{read_snapshot, PersistenceError};
use reqwest::header::CONTENT_TYPE;
use reqwest::StatusCode;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use url::Url;

/// Errors from a single forwarding attempt. None of these stop the forwarder.
#[derive(Debug, thiserror::Error)]
pub enum ForwardError {
    #[error("failed to read history log: {0}")]
    Read(#[from] PersistenceError),
    #[error("failed to reach sink: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("sink rejected snapshot with status {0}")]
    Status(StatusCode),
}

/// Successful forwarding attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForwardReport {
    pub bytes: usize,
    pub status: StatusCode,
}

/// Posts the complete current history log to the sink every period.
#[derive(Debug, Clone)]
pub struct SnapshotForwarder {
    client: reqwest::Client,
    endpoint: Url,
    log_path: PathBuf,
    period: Duration,
    metrics: Option<PipelineMetrics>,
}

impl SnapshotForwarder {
    pub fn new(
        endpoint: Url,
        log_path: impl Into<PathBuf>,
        period: Duration,
        timeout: Duration,
    ) -> Result<Self, ForwardError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint,
            log_path: log_path.into(),
            period,
            metrics: None,
        })
    }

    pub fn from_config(config: &ForwarderConfig, log_path: &Path) -> anyhow::Result<Self> {
        let endpoint = config.endpoint_url()?;
        Self::new(endpoint, log_path, config.interval, config.timeout)
            .context("failed to build forwarder http client")
    }

    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Read the log and POST it once. The log is only ever read.
    pub async fn forward_once(&self) -> Result<ForwardReport, ForwardError> {
        let snapshot = read_snapshot(&self.log_path).await?;
        let bytes = snapshot.len();
        let response = self
            .client
            .post(self.endpoint.clone())
            .header(CONTENT_TYPE, "text/csv")
            .body(snapshot)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ForwardError::Status(status));
        }
        Ok(ForwardReport { bytes, status })
    }

    /// Run until shutdown. The first attempt happens one full period after start.
    pub fn spawn(self, mut shutdown: broadcast::Receiver<()>) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + self.period, self.period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(endpoint = %self.endpoint, period = ?self.period, "snapshot forwarder started");

            loop {
                tokio::select! {
                    _ = shutdown.recv() => break,
                    _ = ticker.tick() => {
                        tokio::select! {
                            _ = shutdown.recv() => break,
                            result = self.forward_once() => self.report(result),
                        }
                    }
                }
            }
            debug!(endpoint = %self.endpoint, "snapshot forwarder stopped");
        })
    }

    fn report(&self, result: Result<ForwardReport, ForwardError>) {
        match result {
            Ok(report) => {
                debug!(bytes = report.bytes, status = %report.status, "snapshot forwarded");
                if let Some(metrics) = &self.metrics {
                    metrics.record_forward(true, report.bytes);
                }
            }
            Err(err) => {
                warn!(endpoint = %self.endpoint, error = %err, "snapshot forwarding failed");
                if let Some(metrics) = &self.metrics {
                    metrics.record_forward(false, 0);
                }
            }
        }
    }
}
