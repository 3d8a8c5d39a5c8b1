//! ---
//! bh_section: "05-networking-external-interfaces"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Extraction of the newest reading from a forwarded history snapshot."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

const HEADER_PREFIX: &str = "Time,";
const MIN_FIELDS: usize = 7;
const TEMPERATURE_FIELD: usize = 2;
const PEOPLE_FIELD: usize = 5;
const HUMIDITY_FIELD: usize = 6;

/// Newest displayable values, kept as the text the log carried.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LatestReading {
    pub temperature: String,
    pub humidity: String,
    pub people_in_room: String,
}

/// Pick the last data line of `text` and pull out temperature, humidity and
/// occupancy. Returns `None` for empty logs, header-only logs, short lines or
/// blank fields.
pub fn extract_latest(text: &str) -> Option<LatestReading> {
    let line = text
        .lines()
        .map(|line| line.trim_end_matches('\r'))
        .filter(|line| !line.trim().is_empty())
        .last()?;
    if line.starts_with(HEADER_PREFIX) {
        return None;
    }

    let fields: Vec<&str> = line.split(',').collect();
    if fields.len() < MIN_FIELDS {
        return None;
    }

    let reading = LatestReading {
        temperature: fields[TEMPERATURE_FIELD].trim().to_owned(),
        humidity: fields[HUMIDITY_FIELD].trim().to_owned(),
        people_in_room: fields[PEOPLE_FIELD].trim().to_owned(),
    };
    if reading.temperature.is_empty()
        || reading.humidity.is_empty()
        || reading.people_in_room.is_empty()
    {
        return None;
    }
    Some(reading)
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "Time,Reference Temperature,Actual Temperature,Error,Control Input,People In Room,Humidity,Annotation";

    #[test]
    fn takes_the_last_data_line() {
        let text = format!(
            "{HEADER}\n0.04,70.00,31.60,40.00,40000.00,3,30.00,\n0.08,70.00,31.60,0.00,0.00,0,30.00,No people in room\n"
        );
        assert_eq!(
            extract_latest(&text),
            Some(LatestReading {
                temperature: "31.60".into(),
                humidity: "30.00".into(),
                people_in_room: "0".into(),
            })
        );
    }

    #[test]
    fn header_only_or_empty_text_has_no_reading() {
        assert_eq!(extract_latest(""), None);
        assert_eq!(extract_latest("\n\n"), None);
        assert_eq!(extract_latest(&format!("{HEADER}\n")), None);
    }

    #[test]
    fn short_or_blank_lines_have_no_reading() {
        assert_eq!(extract_latest("1,2,3\n"), None);
        assert_eq!(extract_latest("0.04,70.00,,40.00,40000.00,3,30.00,\n"), None);
    }

    #[test]
    fn missing_trailing_newline_is_accepted() {
        let reading = extract_latest("0.04,70.00,31.60,40.00,40000.00,3,30.00,").unwrap();
        assert_eq!(reading.people_in_room, "3");
    }
}
