//! ---
//! bh_section: "05-networking-external-interfaces"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Periodic persistence of the latest reading."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::server::DisplayState;
use crate::store::{DocumentStore, SensorDocument, StoreError};

/// Insert one document if the stored snapshot has a complete reading.
///
/// Returns `Ok(false)` when the cycle was skipped.
pub async fn persist_once(state: &DisplayState, store: &dyn DocumentStore) -> Result<bool, StoreError> {
    let Some(reading) = state.latest_reading() else {
        debug!("no complete reading; skipping persistence cycle");
        if let Some(metrics) = state.metrics() {
            metrics.record_document("skipped");
        }
        return Ok(false);
    };

    let document = SensorDocument::new(Utc::now(), reading);
    match store.insert(&document).await {
        Ok(()) => {
            debug!(store = store.name(), temperature = %document.temperature, "latest reading persisted");
            if let Some(metrics) = state.metrics() {
                metrics.record_document("ok");
            }
            Ok(true)
        }
        Err(err) => {
            if let Some(metrics) = state.metrics() {
                metrics.record_document("failed");
            }
            Err(err)
        }
    }
}

/// Run [`persist_once`] right away and then every `period` until shutdown. Failures are logged and
/// the next cycle tries again with whatever is current then.
pub fn spawn_persistence_task(
    state: DisplayState,
    store: Arc<dyn DocumentStore>,
    period: Duration,
    mut shutdown: broadcast::Receiver<()>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(store = store.name(), period = ?period, "sink persistence started");
        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    debug!("sink persistence shutdown");
                    break;
                }
                _ = ticker.tick() => {
                    if let Err(err) = persist_once(&state, store.as_ref()).await {
                        warn!(store = store.name(), error = %err, "failed to persist latest reading");
                    }
                }
            }
        }
    })
}
