//! ---
//! bh_section: "01-core-functionality"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Control-loop engine, ingestion pipeline and snapshot forwarder."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
pub mod engine;
pub mod forwarder;
pub mod pipeline;

pub use engine::{ControlLoopEngine, ControlParams, ControlState, EngineError};
pub use forwarder::{ForwardError, ForwardReport, SnapshotForwarder};
pub use pipeline::{
    spawn_pipeline, Discard, Outcome, Pipeline, PipelineError, PipelineHandle, PipelineSummary,
};
