//! ---
//! bh_section: "05-networking-external-interfaces"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Display sink receiving forwarded history snapshots."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
pub mod latest;
pub mod persist;
pub mod server;
pub mod store;

pub use latest::{extract_latest, LatestReading};
pub use persist::{persist_once, spawn_persistence_task};
pub use server::{render_page, router, spawn_display_server, DisplayServer, DisplayState, UPLOAD_ACK};
pub use store::{DocumentStore, JsonLinesStore, MemoryStore, SensorDocument, StoreError};
