//! ---
//! bh_section: "01-core-functionality"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Proportional control-loop simulation."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
use bh_common::config::ControlConfig;
use bh_msg::types::{Measurement, Record, NO_OCCUPANCY_ANNOTATION};

/// Errors raised while building a [`ControlLoopEngine`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EngineError {
    #[error("control parameter '{name}' must be positive and finite (got {value})")]
    InvalidParameter { name: &'static str, value: f64 },
    #[error("initial estimate must be finite (got {0})")]
    InvalidBaseline(f64),
    #[error("gain * step / density = {0} is outside the stable range (0, 1)")]
    Unstable(f64),
}

/// Fixed constants of the control law.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlParams {
    /// Proportional gain `Kp`.
    pub gain: f64,
    /// Density constant dividing the control effort.
    pub density: f64,
    /// Simulation step `dt` in seconds.
    pub step: f64,
}

impl ControlParams {
    pub fn new(gain: f64, density: f64, step: f64) -> Result<Self, EngineError> {
        for (name, value) in [("gain", gain), ("density", density), ("step", step)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(EngineError::InvalidParameter { name, value });
            }
        }
        let params = Self {
            gain,
            density,
            step,
        };
        let ratio = params.gain_ratio();
        if ratio >= 1.0 {
            return Err(EngineError::Unstable(ratio));
        }
        Ok(params)
    }

    /// Fraction of the error removed by one occupied step.
    pub fn gain_ratio(&self) -> f64 {
        self.gain * self.step / self.density
    }
}

/// The single evolving physical state of the simulated room.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControlState {
    estimate: f64,
}

impl ControlState {
    pub fn new(baseline: f64) -> Self {
        Self { estimate: baseline }
    }

    pub fn estimate(&self) -> f64 {
        self.estimate
    }
}

/// Discrete-time proportional control loop.
///
/// Owns its [`ControlState`]; every occupied measurement advances the state by
/// one forward-Euler step, unoccupied measurements leave it untouched.
#[derive(Debug, Clone)]
pub struct ControlLoopEngine {
    params: ControlParams,
    state: ControlState,
}

impl ControlLoopEngine {
    pub fn new(params: ControlParams, initial_estimate: f64) -> Result<Self, EngineError> {
        if !initial_estimate.is_finite() {
            return Err(EngineError::InvalidBaseline(initial_estimate));
        }
        Ok(Self {
            params,
            state: ControlState::new(initial_estimate),
        })
    }

    pub fn from_config(config: &ControlConfig) -> Result<Self, EngineError> {
        let params = ControlParams::new(config.gain, config.density, config.step)?;
        Self::new(params, config.initial_estimate)
    }

    pub fn params(&self) -> ControlParams {
        self.params
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn estimate(&self) -> f64 {
        self.state.estimate
    }

    /// Advance the loop with one measurement and describe the step.
    pub fn process(&mut self, measurement: &Measurement) -> Record {
        let (error, control_input, annotation) = if measurement.is_occupied() {
            let error = measurement.reference - self.state.estimate;
            let control_input = self.params.gain * error;
            self.state.estimate += (control_input / self.params.density) * self.params.step;
            (error, control_input, None)
        } else {
            (0.0, 0.0, Some(NO_OCCUPANCY_ANNOTATION.to_owned()))
        };

        Record {
            time: measurement.time,
            reference: measurement.reference,
            estimate: self.state.estimate,
            error,
            control_input,
            occupancy: measurement.occupancy,
            humidity: measurement.humidity,
            annotation,
        }
    }
}
