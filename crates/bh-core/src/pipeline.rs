//! ---
//! bh_section: "01-core-functionality"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Single-writer ingestion pipeline feeding the control loop and history log."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
use bh_common::config::OrderingPolicy;
use bh_metrics::PipelineMetrics;
use bh_msg::types::{parse_measurement, Measurement, PayloadError, Record};
use bh_msg::{MessagingError, Subscriber};
use bh_persistence::{HistoryRecorder, PersistenceError};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::engine::ControlLoopEngine;

/// Fatal pipeline failures. Anything recoverable is logged and discarded instead.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("history log append failed: {0}")]
    Recorder(#[from] PersistenceError),
    #[error("telemetry subscriber failed: {0}")]
    Transport(#[from] MessagingError),
    #[error("pipeline task aborted: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Why a payload produced no record.
#[derive(Debug, Clone, PartialEq)]
pub enum Discard {
    Malformed(PayloadError),
    Stale { time: f64, last: f64 },
}

/// Result of feeding one payload through the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Recorded(Record),
    Discarded(Discard),
}

impl Outcome {
    pub fn record(&self) -> Option<&Record> {
        match self {
            Outcome::Recorded(record) => Some(record),
            Outcome::Discarded(_) => None,
        }
    }
}

/// Totals reported when the worker finishes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PipelineSummary {
    pub recorded: u64,
    pub discarded: u64,
    pub out_of_order: u64,
    pub final_estimate: f64,
}

/// Decode, order-check, simulate and record, in that order, one payload at a time.
///
/// The pipeline is the sole owner of both the engine and the recorder, so
/// records reach the log in exactly the order measurements were accepted.
#[derive(Debug)]
pub struct Pipeline {
    engine: ControlLoopEngine,
    recorder: HistoryRecorder,
    ordering: OrderingPolicy,
    last_time: Option<f64>,
    metrics: Option<PipelineMetrics>,
    recorded: u64,
    discarded: u64,
    out_of_order: u64,
}

impl Pipeline {
    pub fn new(engine: ControlLoopEngine, recorder: HistoryRecorder, ordering: OrderingPolicy) -> Self {
        Self {
            engine,
            recorder,
            ordering,
            last_time: None,
            metrics: None,
            recorded: 0,
            discarded: 0,
            out_of_order: 0,
        }
    }

    pub fn with_metrics(mut self, metrics: PipelineMetrics) -> Self {
        metrics.set_estimate(self.engine.estimate());
        self.metrics = Some(metrics);
        self
    }

    pub fn engine(&self) -> &ControlLoopEngine {
        &self.engine
    }

    pub fn recorder(&self) -> &HistoryRecorder {
        &self.recorder
    }

    pub fn summary(&self) -> PipelineSummary {
        PipelineSummary {
            recorded: self.recorded,
            discarded: self.discarded,
            out_of_order: self.out_of_order,
            final_estimate: self.engine.estimate(),
        }
    }

    /// Handle one raw payload. Only a failed log append is an error.
    pub fn handle_payload(&mut self, payload: &[u8]) -> Result<Outcome, PipelineError> {
        match parse_measurement(payload) {
            Ok(measurement) => self.handle_measurement(measurement),
            Err(err) => {
                warn!(
                    error = %err,
                    payload = %String::from_utf8_lossy(payload),
                    "discarding malformed measurement"
                );
                Ok(self.discard(Discard::Malformed(err)))
            }
        }
    }

    pub fn handle_measurement(&mut self, measurement: Measurement) -> Result<Outcome, PipelineError> {
        if let Some(last) = self.last_time {
            if measurement.time <= last {
                self.out_of_order += 1;
                if let Some(metrics) = &self.metrics {
                    metrics.record_out_of_order();
                }
                match self.ordering {
                    OrderingPolicy::Tolerate => {
                        debug!(time = measurement.time, last, "processing out-of-order measurement");
                    }
                    OrderingPolicy::Reject => {
                        warn!(time = measurement.time, last, "rejecting out-of-order measurement");
                        return Ok(self.discard(Discard::Stale {
                            time: measurement.time,
                            last,
                        }));
                    }
                }
            }
        }
        self.last_time = Some(match self.last_time {
            Some(last) => last.max(measurement.time),
            None => measurement.time,
        });

        let record = self.engine.process(&measurement);
        let rows = self.recorder.append(&record)?;
        self.recorded += 1;
        if let Some(metrics) = &self.metrics {
            metrics.record_measurement("recorded");
            metrics.set_estimate(record.estimate);
            metrics.set_log_rows(rows);
        }
        Ok(Outcome::Recorded(record))
    }

    fn discard(&mut self, reason: Discard) -> Outcome {
        self.discarded += 1;
        if let Some(metrics) = &self.metrics {
            metrics.record_measurement("discarded");
        }
        Outcome::Discarded(reason)
    }
}

/// Handle to the running pump and worker tasks.
#[derive(Debug)]
pub struct PipelineHandle {
    pump: JoinHandle<Result<(), PipelineError>>,
    worker: JoinHandle<Result<PipelineSummary, PipelineError>>,
}

impl PipelineHandle {
    /// Wait for both tasks. The worker outcome takes precedence over the pump's.
    pub async fn wait(self) -> Result<PipelineSummary, PipelineError> {
        let summary = self.worker.await?;
        if summary.is_err() {
            self.pump.abort();
            return summary;
        }
        self.pump.await??;
        summary
    }
}

/// Start the pipeline.
///
/// A pump task drains `subscriber` into a bounded queue; a dedicated blocking
/// worker owns `pipeline` and handles the queue strictly in order. The pump
/// stops on shutdown or when the source is exhausted, after which the worker
/// finishes whatever is already queued. A worker failure closes the queue so
/// the pump stops as well.
pub fn spawn_pipeline<S>(
    mut subscriber: S,
    mut pipeline: Pipeline,
    queue_capacity: usize,
    mut shutdown: broadcast::Receiver<()>,
) -> PipelineHandle
where
    S: Subscriber + 'static,
{
    let (tx, mut rx) = mpsc::channel::<Vec<u8>>(queue_capacity.max(1));
    let source = subscriber.name();

    let pump = tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!(source, "pipeline pump shutdown");
                    break;
                }
                next = subscriber.next_payload() => match next? {
                    Some(payload) => {
                        if tx.send(payload).await.is_err() {
                            debug!(source, "pipeline worker gone; pump stopping");
                            break;
                        }
                    }
                    None => {
                        info!(source, "telemetry source exhausted");
                        break;
                    }
                },
            }
        }
        Ok(())
    });

    let worker = tokio::task::spawn_blocking(move || {
        while let Some(payload) = rx.blocking_recv() {
            if let Err(err) = pipeline.handle_payload(&payload) {
                error!(error = %err, "pipeline worker stopping");
                return Err(err);
            }
        }
        let summary = pipeline.summary();
        info!(
            recorded = summary.recorded,
            discarded = summary.discarded,
            out_of_order = summary.out_of_order,
            estimate = summary.final_estimate,
            "pipeline worker finished"
        );
        Ok(summary)
    });

    PipelineHandle { pump, worker }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::ControlParams;
    use tempfile::tempdir;

    fn pipeline(dir: &std::path::Path, ordering: OrderingPolicy) -> Pipeline {
        let engine =
            ControlLoopEngine::new(ControlParams::new(1000.0, 1000.0, 0.04).unwrap(), 30.0).unwrap();
        let recorder = HistoryRecorder::create(&dir.join("log.csv")).unwrap();
        Pipeline::new(engine, recorder, ordering)
    }

    struct RefusingSink {
        header_written: bool,
    }

    impl std::io::Write for RefusingSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            if self.header_written {
                return Err(std::io::Error::other("no space left"));
            }
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            self.header_written = true;
            Ok(())
        }
    }

    impl bh_persistence::LogSink for RefusingSink {
        fn sync(&self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn failed_append_is_fatal() {
        let engine =
            ControlLoopEngine::new(ControlParams::new(1000.0, 1000.0, 0.04).unwrap(), 30.0).unwrap();
        let recorder = HistoryRecorder::with_sink(
            std::path::Path::new("log.csv"),
            RefusingSink {
                header_written: false,
            },
        )
        .unwrap();
        let mut pipeline = Pipeline::new(engine, recorder, OrderingPolicy::Tolerate);

        let err = pipeline.handle_payload(b"0.04,70,30,3").unwrap_err();
        assert!(matches!(err, PipelineError::Recorder(_)));
        assert_eq!(pipeline.summary().recorded, 0);
    }

    #[test]
    fn malformed_payload_leaves_state_and_log_alone() {
        let dir = tempdir().unwrap();
        let mut pipeline = pipeline(dir.path(), OrderingPolicy::Tolerate);

        let outcome = pipeline.handle_payload(b"abc,1,2,3").unwrap();
        assert!(matches!(outcome, Outcome::Discarded(Discard::Malformed(_))));
        assert_eq!(pipeline.engine().estimate(), 30.0);
        assert_eq!(pipeline.recorder().rows_written(), 0);
    }

    #[test]
    fn tolerated_out_of_order_measurement_is_processed() {
        let dir = tempdir().unwrap();
        let mut pipeline = pipeline(dir.path(), OrderingPolicy::Tolerate);
        pipeline.handle_payload(b"0.08,70,30,1").unwrap();
        let outcome = pipeline.handle_payload(b"0.04,70,30,1").unwrap();

        assert!(outcome.record().is_some());
        let summary = pipeline.summary();
        assert_eq!(summary.recorded, 2);
        assert_eq!(summary.out_of_order, 1);
    }

    #[test]
    fn rejected_out_of_order_measurement_is_discarded() {
        let dir = tempdir().unwrap();
        let mut pipeline = pipeline(dir.path(), OrderingPolicy::Reject);
        pipeline.handle_payload(b"0.08,70,30,1").unwrap();
        let estimate = pipeline.engine().estimate();

        let outcome = pipeline.handle_payload(b"0.08,70,30,1").unwrap();
        assert_eq!(
            outcome,
            Outcome::Discarded(Discard::Stale {
                time: 0.08,
                last: 0.08
            })
        );
        assert_eq!(pipeline.engine().estimate(), estimate);
        assert_eq!(pipeline.recorder().rows_written(), 1);
    }
}
