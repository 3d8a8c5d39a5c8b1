//! ---
//! bh_section: "02-messaging-ipc-data-model"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Crate root for telemetry messages and pub/sub transports."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
#![warn(missing_docs)]
//! Telemetry data model and pub/sub transports.

pub mod transport;
pub mod types;

/// Shared result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;

/// Errors raised by transports.
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// The other half of a channel has gone away.
    #[error("transport channel closed: {0}")]
    Closed(&'static str),
    /// Wrapper for MQTT client request failures.
    #[error("mqtt client error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
    /// Wrapper for IO errors encountered during messaging operations.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub use transport::{
    in_memory_channel, InMemoryPublisher, InMemorySubscriber, MqttPublisher, MqttSubscriber,
    Publisher, Subscriber,
};
pub use types::{
    parse_measurement, Measurement, PayloadError, Record, LOG_HEADER, NO_OCCUPANCY_ANNOTATION,
};
