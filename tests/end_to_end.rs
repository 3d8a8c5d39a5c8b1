//! ---
//! bh_section: "15-testing-qa-runbook"
//! bh_subsection: "integration-tests"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Scenario run from telemetry source through to the display sink."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
use std::time::Duration;

use bh_common::config::{AppConfig, SourceConfig};
use bh_core::{spawn_pipeline, ControlLoopEngine, Pipeline, SnapshotForwarder};
use bh_display::{spawn_display_server, DisplayState, LatestReading};
use bh_msg::in_memory_channel;
use bh_persistence::{read_rows, HistoryRecorder};
use bh_sim::run_publisher;
use tempfile::tempdir;
use tokio::sync::broadcast;
use url::Url;

#[tokio::test]
async fn default_scenario_reaches_the_display() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let log = dir.path().join("temperature_data.csv");
    let config = AppConfig::default();

    let engine = ControlLoopEngine::from_config(&config.control)?;
    let pipeline = Pipeline::new(engine, HistoryRecorder::create(&log)?, config.control.ordering);
    let (publisher, subscriber) = in_memory_channel(64);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let handle = spawn_pipeline(subscriber, pipeline, config.broker.queue_capacity, shutdown_rx);

    let source = SourceConfig {
        realtime: false,
        ..config.source.clone()
    };
    let published = run_publisher(&publisher, &source).await?;
    drop(publisher);
    let summary = handle.wait().await?;
    assert_eq!(summary.recorded, published);
    assert_eq!(summary.discarded, 0);

    let rows = read_rows(&log)?;
    assert_eq!(rows.len() as u64, published);
    assert_eq!(rows[0][..7], ["0.04", "70.00", "31.60", "40.00", "40000.00", "3", "30.00"]);
    let empty_room = &rows[599..899];
    assert!(empty_room.iter().all(|row| row[7] == "No people in room"));
    assert!(empty_room.iter().all(|row| row[2] == empty_room[0][2]));

    let state = DisplayState::new();
    let server = spawn_display_server(state.clone(), "127.0.0.1:0".parse()?).await?;
    let forwarder = SnapshotForwarder::new(
        Url::parse(&format!("http://{}/upload", server.local_addr()))?,
        &log,
        Duration::from_secs(60),
        Duration::from_secs(5),
    )?;
    forwarder.forward_once().await?;

    assert_eq!(
        state.latest_reading(),
        Some(LatestReading {
            temperature: "50.00".into(),
            humidity: "50.00".into(),
            people_in_room: "2".into(),
        })
    );
    server.shutdown().await
}
