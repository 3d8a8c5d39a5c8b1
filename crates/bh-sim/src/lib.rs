//! ---
//! bh_section: "11-simulation-test-harness"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Telemetry source for room measurements."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
pub mod publisher;
pub mod scenario;

pub use publisher::{run_publisher, run_scenario};
pub use scenario::{segment_for, Scenario, Segment, SEGMENTS};
