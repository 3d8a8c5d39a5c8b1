//! ---
//! bh_section: "05-networking-external-interfaces"
//! bh_subsection: "integration"
//! bh_type: "test"
//! bh_scope: "code"
//! bh_description: "HTTP behaviour of the display sink."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use bh_display::{
    spawn_display_server, spawn_persistence_task, DisplayState, LatestReading, MemoryStore,
    UPLOAD_ACK,
};
use bh_metrics::{new_registry, SinkMetrics};
use reqwest::{Client, StatusCode};
use tokio::sync::broadcast;

const LOG: &str = "Time,Reference Temperature,Actual Temperature,Error,Control Input,People In Room,Humidity,Annotation\n\
0.04,70.00,31.60,40.00,40000.00,3,30.00,\n\
0.08,70.00,31.60,0.00,0.00,0,30.00,No people in room\n";

#[tokio::test]
async fn upload_then_read_back() -> anyhow::Result<()> {
    let state = DisplayState::new().with_metrics(SinkMetrics::new(new_registry())?);
    let server = spawn_display_server(state, "127.0.0.1:0".parse()?).await?;
    let base = format!("http://{}", server.local_addr());
    let client = Client::new();

    let empty: Option<LatestReading> = client.get(format!("{base}/latest")).send().await?.json().await?;
    assert_eq!(empty, None);

    let response = client
        .post(format!("{base}/upload"))
        .header("content-type", "text/csv")
        .body(LOG)
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await?, UPLOAD_ACK);

    let latest: Option<LatestReading> = client.get(format!("{base}/latest")).send().await?.json().await?;
    assert_eq!(
        latest,
        Some(LatestReading {
            temperature: "31.60".into(),
            humidity: "30.00".into(),
            people_in_room: "0".into(),
        })
    );

    let page = client.get(format!("{base}/display")).send().await?.text().await?;
    assert!(page.contains("<strong>Latest Temperature:</strong> 31.60</p>"));
    assert!(page.contains("<strong>People In Room:</strong> 0</p>"));

    let health = client.get(format!("{base}/healthz")).send().await?.text().await?;
    assert_eq!(health, "ok");

    server.shutdown().await
}

#[tokio::test]
async fn accepts_logs_beyond_two_mebibytes() -> anyhow::Result<()> {
    let state = DisplayState::new();
    let server = spawn_display_server(state.clone(), "127.0.0.1:0".parse()?).await?;

    let mut log = String::from(LOG.lines().next().unwrap_or_default());
    log.push('\n');
    let mut step = 0u32;
    while log.len() <= 3 * 1024 * 1024 {
        step += 1;
        log.push_str(&format!(
            "{:.2},70.00,45.50,24.50,24500.00,2,41.00,\n",
            f64::from(step) * 0.04
        ));
    }
    log.push_str("9999.99,70.00,68.25,1.75,1750.00,4,47.00,\n");

    let response = Client::new()
        .post(format!("http://{}/upload", server.local_addr()))
        .header("content-type", "text/csv")
        .body(log.clone())
        .send()
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(state.snapshot().len(), log.len());
    assert_eq!(
        state.latest_reading(),
        Some(LatestReading {
            temperature: "68.25".into(),
            humidity: "47.00".into(),
            people_in_room: "4".into(),
        })
    );

    server.shutdown().await
}

#[tokio::test]
async fn upload_rejects_other_methods() -> anyhow::Result<()> {
    let server = spawn_display_server(DisplayState::new(), "127.0.0.1:0".parse()?).await?;
    let response = reqwest::get(format!("http://{}/upload", server.local_addr())).await?;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
    server.shutdown().await
}

#[tokio::test]
async fn persistence_runs_a_cycle_at_startup() {
    let state = DisplayState::new();
    state.store(LOG.to_owned());
    let store = Arc::new(MemoryStore::new());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let task = spawn_persistence_task(state, store.clone(), Duration::from_secs(3600), shutdown_rx);
    tokio::time::sleep(Duration::from_millis(100)).await;
    let _ = shutdown_tx.send(());
    task.await.unwrap();

    assert_eq!(store.documents().len(), 1);
}

#[tokio::test]
async fn persistence_task_stores_latest_reading() {
    let state = DisplayState::new();
    state.store(LOG.to_owned());
    let store = Arc::new(MemoryStore::new());
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let task = spawn_persistence_task(
        state,
        store.clone(),
        Duration::from_millis(20),
        shutdown_rx,
    );
    tokio::time::sleep(Duration::from_millis(150)).await;
    let _ = shutdown_tx.send(());
    task.await.unwrap();

    let documents = store.documents();
    assert!(!documents.is_empty());
    assert!(documents.iter().all(|doc| doc.temperature == "31.60"));
}
