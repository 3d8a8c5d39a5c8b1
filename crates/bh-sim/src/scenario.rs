//! ---
//! bh_section: "11-simulation-test-harness"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Deterministic room scenario driving the telemetry source."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
use bh_common::config::SourceConfig;
use bh_msg::types::Measurement;

/// Reference, occupancy and humidity held for a run of steps.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    /// First step index no longer covered by this segment.
    pub until: u64,
    pub reference: f64,
    pub occupancy: u32,
    pub humidity: f64,
}

const fn segment(until: u64, reference: f64, occupancy: u32, humidity: f64) -> Segment {
    Segment {
        until,
        reference,
        occupancy,
        humidity,
    }
}

/// Segments in step order; the last one covers every remaining step.
pub const SEGMENTS: [Segment; 8] = [
    segment(300, 70.0, 3, 30.0),
    segment(600, 20.0, 2, 40.0),
    segment(900, 90.0, 0, 10.0),
    segment(1200, 30.0, 4, 60.0),
    segment(1500, 80.0, 1, 80.0),
    segment(1800, 10.0, 5, 90.0),
    segment(2100, 95.0, 0, 20.0),
    segment(u64::MAX, 50.0, 2, 50.0),
];

/// Segment in force at step `index`.
pub fn segment_for(index: u64) -> &'static Segment {
    let position = SEGMENTS
        .iter()
        .position(|segment| index < segment.until)
        .unwrap_or(SEGMENTS.len() - 1);
    &SEGMENTS[position]
}

/// Iterator over the measurements of one scenario run, steps `1..steps`.
#[derive(Debug, Clone)]
pub struct Scenario {
    step: f64,
    next: u64,
    steps: u64,
}

impl Scenario {
    pub fn new(duration: f64, step: f64) -> Self {
        Self {
            step,
            next: 1,
            steps: (duration / step) as u64,
        }
    }

    pub fn from_config(config: &SourceConfig) -> Self {
        Self::new(config.duration, config.step)
    }

    /// Total step count; the run emits `steps - 1` measurements.
    pub fn steps(&self) -> u64 {
        self.steps
    }
}

impl Iterator for Scenario {
    type Item = Measurement;

    fn next(&mut self) -> Option<Self::Item> {
        if self.next >= self.steps {
            return None;
        }
        let index = self.next;
        self.next += 1;
        let segment = segment_for(index);
        Some(Measurement::new(
            index as f64 * self.step,
            segment.reference,
            segment.humidity,
            segment.occupancy,
        ))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.steps.saturating_sub(self.next) as usize;
        (remaining, Some(remaining))
    }
}
