//! ---
//! bh_section: "11-simulation-test-harness"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Publishes a scenario run onto the telemetry channel."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
use std::time::Duration;

use anyhow::{Context, Result};
use bh_common::config::SourceConfig;
use bh_msg::Publisher;
use tracing::{debug, info};

use crate::scenario::{Scenario, SEGMENTS};

/// Publish every measurement of `scenario`, pacing by `step` when requested.
///
/// Returns the number of published messages.
pub async fn run_scenario(
    publisher: &dyn Publisher,
    scenario: Scenario,
    pace: Option<Duration>,
) -> Result<u64> {
    let mut last_reference = SEGMENTS[0].reference;
    let mut published = 0u64;
    info!(
        transport = publisher.name(),
        steps = scenario.steps(),
        "telemetry source starting"
    );

    for measurement in scenario {
        publisher
            .publish(measurement.to_payload())
            .await
            .with_context(|| format!("failed to publish measurement at t={:.2}", measurement.time))?;
        published += 1;

        if measurement.reference != last_reference {
            info!(
                reference = format_args!("{:.2}", measurement.reference),
                time = format_args!("{:.2}", measurement.time),
                "reference temperature changed"
            );
            last_reference = measurement.reference;
        }
        if let Some(pace) = pace {
            tokio::time::sleep(pace).await;
        }
    }

    debug!(published, "telemetry source finished");
    Ok(published)
}

/// Run the configured scenario to completion.
pub async fn run_publisher(publisher: &dyn Publisher, config: &SourceConfig) -> Result<u64> {
    config.validate()?;
    let pace = config
        .realtime
        .then(|| Duration::from_secs_f64(config.step));
    run_scenario(publisher, Scenario::from_config(config), pace).await
}
