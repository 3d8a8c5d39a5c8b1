//! ---
//! bh_section: "02-messaging-ipc-data-model"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Telemetry data model and payload codec."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

/// Annotation attached to a [`Record`] when the room was empty.
pub const NO_OCCUPANCY_ANNOTATION: &str = "No people in room";

/// Column names of the history log, in write order.
pub const LOG_HEADER: [&str; 8] = [
    "Time",
    "Reference Temperature",
    "Actual Temperature",
    "Error",
    "Control Input",
    "People In Room",
    "Humidity",
    "Annotation",
];

/// Positional fields carried by one telemetry payload.
pub const PAYLOAD_FIELDS: [&str; 4] = ["time", "reference", "humidity", "occupancy"];

/// One inbound telemetry message.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Simulation time in seconds as stamped by the source.
    pub time: f64,
    /// Reference (setpoint) value.
    pub reference: f64,
    /// Relative humidity in percent.
    pub humidity: f64,
    /// Number of people in the room.
    pub occupancy: u32,
}

impl Measurement {
    /// Build a measurement from its four wire fields.
    pub fn new(time: f64, reference: f64, humidity: f64, occupancy: u32) -> Self {
        Self {
            time,
            reference,
            humidity,
            occupancy,
        }
    }

    /// True when at least one person is present.
    pub fn is_occupied(&self) -> bool {
        self.occupancy > 0
    }

    /// Encode as the comma separated wire payload published by the source.
    pub fn to_payload(&self) -> String {
        format!(
            "{:.6},{:.6},{:.6},{}",
            self.time, self.reference, self.humidity, self.occupancy
        )
    }
}

/// Derived output row persisted once per processed [`Measurement`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Source timestamp copied from the measurement.
    pub time: f64,
    /// Reference value copied from the measurement.
    pub reference: f64,
    /// Estimated actual value after this step's update.
    pub estimate: f64,
    /// Reference minus the pre-update estimate; zero when unoccupied.
    pub error: f64,
    /// Proportional control effort; zero when unoccupied.
    pub control_input: f64,
    /// Occupancy copied from the measurement.
    pub occupancy: u32,
    /// Humidity copied from the measurement.
    pub humidity: f64,
    /// Free-text flag, set when no control update happened.
    #[serde(default)]
    pub annotation: Option<String>,
}

impl Record {
    /// Render the record in [`LOG_HEADER`] order with two-decimal floats.
    pub fn csv_fields(&self) -> [String; 8] {
        [
            format!("{:.2}", self.time),
            format!("{:.2}", self.reference),
            format!("{:.2}", self.estimate),
            format!("{:.2}", self.error),
            format!("{:.2}", self.control_input),
            self.occupancy.to_string(),
            format!("{:.2}", self.humidity),
            self.annotation.clone().unwrap_or_default(),
        ]
    }
}

/// Reasons a raw payload is refused at the ingestion boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PayloadError {
    /// Payload bytes are not UTF-8.
    #[error("payload is not valid utf-8")]
    NotUtf8,
    /// Payload did not split into exactly four fields.
    #[error("expected {expected} comma separated fields, found {found}")]
    FieldCount {
        /// Required field count.
        expected: usize,
        /// Field count actually present.
        found: usize,
    },
    /// A field failed to parse.
    #[error("field '{field}' is not a valid number: '{value}'")]
    InvalidNumber {
        /// Name of the field.
        field: &'static str,
        /// Raw text received.
        value: String,
    },
    /// A float field parsed to NaN or infinity.
    #[error("field '{field}' must be finite: '{value}'")]
    NonFinite {
        /// Name of the field.
        field: &'static str,
        /// Raw text received.
        value: String,
    },
}

/// Parse a `time,reference,humidity,occupancy` payload.
///
/// Surrounding whitespace on each field is ignored. Occupancy must be a
/// non-negative integer and every float must be finite.
pub fn parse_measurement(payload: &[u8]) -> Result<Measurement, PayloadError> {
    let text = std::str::from_utf8(payload).map_err(|_| PayloadError::NotUtf8)?;
    let fields: Vec<&str> = text.split(',').map(str::trim).collect();
    if fields.len() != PAYLOAD_FIELDS.len() {
        return Err(PayloadError::FieldCount {
            expected: PAYLOAD_FIELDS.len(),
            found: fields.len(),
        });
    }

    let time = parse_float(PAYLOAD_FIELDS[0], fields[0])?;
    let reference = parse_float(PAYLOAD_FIELDS[1], fields[1])?;
    let humidity = parse_float(PAYLOAD_FIELDS[2], fields[2])?;
    let occupancy = fields[3]
        .parse::<u32>()
        .map_err(|_| PayloadError::InvalidNumber {
            field: PAYLOAD_FIELDS[3],
            value: fields[3].to_owned(),
        })?;

    Ok(Measurement {
        time,
        reference,
        humidity,
        occupancy,
    })
}

fn parse_float(field: &'static str, raw: &str) -> Result<f64, PayloadError> {
    let value = raw
        .parse::<f64>()
        .map_err(|_| PayloadError::InvalidNumber {
            field,
            value: raw.to_owned(),
        })?;
    if !value.is_finite() {
        return Err(PayloadError::NonFinite {
            field,
            value: raw.to_owned(),
        });
    }
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_source_payload() {
        let m = parse_measurement(b"0.040000,70.000000,30.000000,3").unwrap();
        assert_eq!(m, Measurement::new(0.04, 70.0, 30.0, 3));
    }

    #[test]
    fn trims_whitespace_and_trailing_newline() {
        let m = parse_measurement(b" 1.5, 20 ,40.0,0\n").unwrap();
        assert_eq!(m.occupancy, 0);
        assert!(!m.is_occupied());
        assert_eq!(m.reference, 20.0);
    }

    #[test]
    fn rejects_wrong_field_count() {
        assert_eq!(
            parse_measurement(b"0.04,70,30"),
            Err(PayloadError::FieldCount {
                expected: 4,
                found: 3
            })
        );
        assert!(matches!(
            parse_measurement(b"0.04,70,30,3,extra"),
            Err(PayloadError::FieldCount { found: 5, .. })
        ));
    }

    #[test]
    fn names_the_offending_field() {
        match parse_measurement(b"0.04,warm,30,3") {
            Err(PayloadError::InvalidNumber { field, value }) => {
                assert_eq!(field, "reference");
                assert_eq!(value, "warm");
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn rejects_negative_occupancy_and_non_finite_values() {
        assert!(matches!(
            parse_measurement(b"0.04,70,30,-1"),
            Err(PayloadError::InvalidNumber {
                field: "occupancy",
                ..
            })
        ));
        assert!(matches!(
            parse_measurement(b"NaN,70,30,1"),
            Err(PayloadError::NonFinite { field: "time", .. })
        ));
        assert!(matches!(
            parse_measurement(b"0.04,inf,30,1"),
            Err(PayloadError::NonFinite {
                field: "reference",
                ..
            })
        ));
    }

    #[test]
    fn rejects_non_utf8() {
        assert_eq!(
            parse_measurement(&[0xff, 0xfe, b',']),
            Err(PayloadError::NotUtf8)
        );
    }

    #[test]
    fn payload_encoding_matches_source_format() {
        let m = Measurement::new(12.0, 90.0, 10.0, 0);
        assert_eq!(m.to_payload(), "12.000000,90.000000,10.000000,0");
    }

    #[test]
    fn record_fields_use_two_decimals() {
        let record = Record {
            time: 0.04,
            reference: 70.0,
            estimate: 31.6,
            error: 40.0,
            control_input: 40000.0,
            occupancy: 3,
            humidity: 30.0,
            annotation: None,
        };
        assert_eq!(
            record.csv_fields(),
            ["0.04", "70.00", "31.60", "40.00", "40000.00", "3", "30.00", ""]
        );
    }
}
