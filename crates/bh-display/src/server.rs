//! ---
//! bh_section: "05-networking-external-interfaces"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "HTTP surface of the display sink."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
use std::net::SocketAddr;
use std::sync::Arc;

use askama::Template;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header, StatusCode};
use axum::response::{Html, IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use bh_metrics::SinkMetrics;
use parking_lot::RwLock;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::latest::{extract_latest, LatestReading};

/// Reply body for an accepted upload.
pub const UPLOAD_ACK: &str = "CSV data received successfully\n";

/// Latest uploaded snapshot, shared between the HTTP handlers and the
/// persistence task.
#[derive(Debug, Clone, Default)]
pub struct DisplayState {
    latest: Arc<RwLock<String>>,
    metrics: Option<SinkMetrics>,
}

impl DisplayState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: SinkMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn metrics(&self) -> Option<&SinkMetrics> {
        self.metrics.as_ref()
    }

    /// Replace the stored snapshot.
    pub fn store(&self, text: String) {
        *self.latest.write() = text;
    }

    pub fn snapshot(&self) -> String {
        self.latest.read().clone()
    }

    pub fn latest_reading(&self) -> Option<LatestReading> {
        extract_latest(&self.latest.read())
    }
}

/// Routes served by the sink.
///
/// Uploads carry the whole history log, which only grows, so the request body
/// size is not capped.
pub fn router(state: DisplayState) -> Router {
    Router::new()
        .route("/upload", post(post_upload).layer(DefaultBodyLimit::disable()))
        .route("/display", get(get_display))
        .route("/latest", get(get_latest))
        .route("/healthz", get(|| async { "ok" }))
        .with_state(state)
}

/// Bind `listen` and serve [`router`] until shut down.
pub async fn spawn_display_server(
    state: DisplayState,
    listen: SocketAddr,
) -> anyhow::Result<DisplayServer> {
    let listener = TcpListener::bind(listen).await?;
    let address = listener.local_addr()?;
    info!(address = %address, "display sink listening");

    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let server = axum::serve(listener, router(state)).with_graceful_shutdown(async move {
        let _ = shutdown_rx.changed().await;
    });
    let task = tokio::spawn(async move {
        if let Err(err) = server.await {
            warn!(error = %err, "display sink exited with error");
        }
    });

    Ok(DisplayServer {
        address,
        task,
        shutdown: shutdown_tx,
    })
}

/// Handle to a running display sink.
#[derive(Debug)]
pub struct DisplayServer {
    address: SocketAddr,
    task: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

impl DisplayServer {
    pub fn local_addr(&self) -> SocketAddr {
        self.address
    }

    /// Request graceful shutdown and wait for the server task to finish.
    pub async fn shutdown(self) -> anyhow::Result<()> {
        let _ = self.shutdown.send(true);
        match self.task.await {
            Ok(()) => Ok(()),
            Err(join) => Err(anyhow::anyhow!(join)),
        }
    }
}

async fn post_upload(State(state): State<DisplayState>, body: String) -> Response {
    debug!(bytes = body.len(), "snapshot uploaded");
    state.store(body);
    if let Some(metrics) = state.metrics() {
        metrics.record_upload();
    }
    (StatusCode::OK, UPLOAD_ACK).into_response()
}

async fn get_display(State(state): State<DisplayState>) -> Response {
    match render_page(state.latest_reading().as_ref()) {
        Ok(body) => Html(body).into_response(),
        Err(err) => {
            error!(error = %err, "failed to render display page");
            (StatusCode::INTERNAL_SERVER_ERROR, "display page unavailable").into_response()
        }
    }
}

async fn get_latest(State(state): State<DisplayState>) -> Response {
    (
        [(header::CACHE_CONTROL, "no-store")],
        Json(state.latest_reading()),
    )
        .into_response()
}

#[derive(Template)]
#[template(path = "display.html")]
struct DisplayPage<'a> {
    temperature: &'a str,
    humidity: &'a str,
    people_in_room: &'a str,
}

/// Render the display page; every field is blank when no reading exists.
pub fn render_page(reading: Option<&LatestReading>) -> Result<String, askama::Error> {
    let page = match reading {
        Some(reading) => DisplayPage {
            temperature: &reading.temperature,
            humidity: &reading.humidity,
            people_in_room: &reading.people_in_room,
        },
        None => DisplayPage {
            temperature: "",
            humidity: "",
            people_in_room: "",
        },
    };
    page.render()
}
