//! ---
//! bh_section: "01-core-functionality"
//! bh_subsection: "module"
//! bh_type: "source"
//! bh_scope: "code"
//! bh_description: "Layered TOML configuration for every Budget Home service."
//! bh_version: "v0.1.0"
//! bh_owner: "tbd"
//! ---
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationSeconds};
use tracing::debug;
use url::Url;

use crate::logging::LogFormat;

fn default_initial_estimate() -> f64 {
    30.0
}

fn default_gain() -> f64 {
    1000.0
}

fn default_density() -> f64 {
    1000.0
}

fn default_step() -> f64 {
    0.04
}

fn default_broker_host() -> String {
    "localhost".to_owned()
}

fn default_broker_port() -> u16 {
    1883
}

fn default_server_client_id() -> String {
    "serverID".to_owned()
}

fn default_source_client_id() -> String {
    "clientID".to_owned()
}

fn default_topic() -> String {
    "temperature_data".to_owned()
}

fn default_keep_alive() -> Duration {
    Duration::from_secs(30)
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_log_path() -> PathBuf {
    PathBuf::from("temperature_data.csv")
}

fn default_forward_endpoint() -> String {
    "http://localhost:3000/upload".to_owned()
}

fn default_forward_interval() -> Duration {
    Duration::from_secs(13)
}

fn default_forward_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_display_listen() -> SocketAddr {
    "0.0.0.0:3000".parse().expect("valid default display address")
}

fn default_persist_interval() -> Duration {
    Duration::from_secs(5)
}

fn default_store_path() -> PathBuf {
    PathBuf::from("target/display/latest_sensor_data.jsonl")
}

fn default_source_duration() -> f64 {
    100.0
}

fn default_realtime() -> bool {
    true
}

fn default_logging_directory() -> PathBuf {
    PathBuf::from("target/logs")
}

fn default_log_format() -> LogFormat {
    LogFormat::StructuredJson
}

fn default_metrics_enabled() -> bool {
    false
}

fn default_metrics_listen() -> SocketAddr {
    "0.0.0.0:9898"
        .parse()
        .expect("valid default metrics address")
}

/// Primary configuration object shared by every Budget Home service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub control: ControlConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub recorder: RecorderConfig,
    #[serde(default)]
    pub forwarder: ForwarderConfig,
    #[serde(default)]
    pub display: DisplayConfig,
    #[serde(default)]
    pub source: SourceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Metadata describing where an [`AppConfig`] was loaded from.
#[derive(Debug, Clone)]
pub struct LoadedAppConfig {
    pub config: AppConfig,
    pub source: PathBuf,
}

impl AppConfig {
    pub const ENV_CONFIG_PATH: &str = "BH_CONFIG";

    /// Load configuration from disk, respecting the `BH_CONFIG` override.
    pub fn load<P: AsRef<Path>>(candidates: &[P]) -> Result<Self> {
        Ok(Self::load_with_source(candidates)?.config)
    }

    /// Load configuration from disk together with the effective source path.
    pub fn load_with_source<P: AsRef<Path>>(candidates: &[P]) -> Result<LoadedAppConfig> {
        if let Ok(env_path) = std::env::var(Self::ENV_CONFIG_PATH) {
            if !env_path.trim().is_empty() {
                let path = PathBuf::from(env_path);
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        for candidate in candidates {
            if candidate.as_ref().exists() {
                let path = candidate.as_ref().to_path_buf();
                let config = Self::from_path(path.clone())?;
                return Ok(LoadedAppConfig {
                    config,
                    source: path,
                });
            }
        }

        Err(anyhow!(
            "no configuration files found. inspected: {}",
            candidates
                .iter()
                .map(|p| p.as_ref().display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        ))
    }

    fn from_path(path: PathBuf) -> Result<Self> {
        debug!(config_path = %path.display(), "loading configuration");
        let contents = fs::read_to_string(&path)
            .with_context(|| format!("unable to read config file {}", path.display()))?;
        let config = toml::from_str::<AppConfig>(&contents)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("invalid config file {}", path.display()))?;
        Ok(config)
    }

    /// Validate structural invariants.
    pub fn validate(&self) -> Result<()> {
        self.control.validate()?;
        self.broker.validate()?;
        self.forwarder.validate()?;
        self.display.validate()?;
        self.source.validate()?;
        Ok(())
    }
}

impl std::str::FromStr for AppConfig {
    type Err = anyhow::Error;

    fn from_str(content: &str) -> std::result::Result<Self, Self::Err> {
        let config: AppConfig =
            toml::from_str(content).with_context(|| "failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }
}

/// How the control loop treats measurements whose `time` does not advance.
#[derive(Debug, Copy, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderingPolicy {
    /// Process in arrival order; regressions are only reported.
    #[default]
    Tolerate,
    /// Discard any measurement not strictly newer than the last accepted one.
    Reject,
}

/// Constants of the proportional control law.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    #[serde(default = "default_initial_estimate")]
    pub initial_estimate: f64,
    #[serde(default = "default_gain")]
    pub gain: f64,
    #[serde(default = "default_density")]
    pub density: f64,
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default)]
    pub ordering: OrderingPolicy,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            initial_estimate: default_initial_estimate(),
            gain: default_gain(),
            density: default_density(),
            step: default_step(),
            ordering: OrderingPolicy::default(),
        }
    }
}

impl ControlConfig {
    /// Fraction of the error removed per step; forward Euler only converges
    /// monotonically while this stays below one.
    pub fn gain_ratio(&self) -> f64 {
        self.gain * self.step / self.density
    }

    pub fn validate(&self) -> Result<()> {
        if !self.initial_estimate.is_finite() {
            return Err(anyhow!("control.initial_estimate must be finite"));
        }
        for (name, value) in [
            ("gain", self.gain),
            ("density", self.density),
            ("step", self.step),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(anyhow!(
                    "control.{} must be a positive finite number (got {})",
                    name,
                    value
                ));
            }
        }
        let ratio = self.gain_ratio();
        if ratio >= 1.0 {
            return Err(anyhow!(
                "control gain * step / density = {} must stay below 1 for a stable loop",
                ratio
            ));
        }
        Ok(())
    }
}

/// MQTT broker connection used by both the subscriber and the publisher.
#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerConfig {
    #[serde(default = "default_broker_host")]
    pub host: String,
    #[serde(default = "default_broker_port")]
    pub port: u16,
    #[serde(default = "default_server_client_id")]
    pub client_id: String,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_keep_alive")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub keep_alive: Duration,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_broker_host(),
            port: default_broker_port(),
            client_id: default_server_client_id(),
            topic: default_topic(),
            keep_alive: default_keep_alive(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(anyhow!("broker.host must not be empty"));
        }
        if self.topic.trim().is_empty() {
            return Err(anyhow!("broker.topic must not be empty"));
        }
        if self.client_id.trim().is_empty() {
            return Err(anyhow!("broker.client_id must not be empty"));
        }
        if self.queue_capacity == 0 {
            return Err(anyhow!("broker.queue_capacity must be at least 1"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecorderConfig {
    #[serde(default = "default_log_path")]
    pub path: PathBuf,
}

impl Default for RecorderConfig {
    fn default() -> Self {
        Self {
            path: default_log_path(),
        }
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderConfig {
    #[serde(default = "default_forward_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_forward_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub interval: Duration,
    #[serde(default = "default_forward_timeout")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub timeout: Duration,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            endpoint: default_forward_endpoint(),
            interval: default_forward_interval(),
            timeout: default_forward_timeout(),
        }
    }
}

impl ForwarderConfig {
    /// Parsed sink endpoint.
    pub fn endpoint_url(&self) -> Result<Url> {
        let url = Url::parse(&self.endpoint)
            .with_context(|| format!("forwarder.endpoint '{}' is not a url", self.endpoint))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(anyhow!(
                "forwarder.endpoint must use http or https (got {})",
                other
            )),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.endpoint_url()?;
        if self.interval.is_zero() {
            return Err(anyhow!("forwarder.interval must be non-zero"));
        }
        if self.timeout.is_zero() {
            return Err(anyhow!("forwarder.timeout must be non-zero"));
        }
        Ok(())
    }
}

#[serde_as]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_display_listen")]
    pub listen: SocketAddr,
    #[serde(default = "default_persist_interval")]
    #[serde_as(as = "DurationSeconds<u64>")]
    pub persist_interval: Duration,
    #[serde(default = "default_store_path")]
    pub store_path: PathBuf,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            listen: default_display_listen(),
            persist_interval: default_persist_interval(),
            store_path: default_store_path(),
        }
    }
}

impl DisplayConfig {
    pub fn validate(&self) -> Result<()> {
        if self.persist_interval.is_zero() {
            return Err(anyhow!("display.persist_interval must be non-zero"));
        }
        Ok(())
    }
}

/// Settings for the scripted telemetry publisher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_client_id")]
    pub client_id: String,
    #[serde(default = "default_source_duration")]
    pub duration: f64,
    #[serde(default = "default_step")]
    pub step: f64,
    #[serde(default = "default_realtime")]
    pub realtime: bool,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            client_id: default_source_client_id(),
            duration: default_source_duration(),
            step: default_step(),
            realtime: default_realtime(),
        }
    }
}

impl SourceConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.step.is_finite() || self.step <= 0.0 {
            return Err(anyhow!("source.step must be a positive finite number"));
        }
        if !self.duration.is_finite() || self.duration <= self.step {
            return Err(anyhow!("source.duration must exceed source.step"));
        }
        if self.client_id.trim().is_empty() {
            return Err(anyhow!("source.client_id must not be empty"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_directory")]
    pub directory: PathBuf,
    #[serde(default = "default_log_format")]
    pub format: LogFormat,
    #[serde(default)]
    pub file_prefix: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: default_logging_directory(),
            format: default_log_format(),
            file_prefix: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_listen")]
    pub listen: SocketAddr,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            listen: default_metrics_listen(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_form_a_valid_configuration() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.broker.topic, "temperature_data");
        assert_eq!(config.forwarder.interval, Duration::from_secs(13));
        assert!((config.control.gain_ratio() - 0.04).abs() < 1e-12);
    }

    #[test]
    fn unstable_gain_is_rejected() {
        let control = ControlConfig {
            gain: 50_000.0,
            ..ControlConfig::default()
        };
        let err = control.validate().unwrap_err();
        assert!(err.to_string().contains("stable"));
    }

    #[test]
    fn forwarder_requires_http_endpoint() {
        let forwarder = ForwarderConfig {
            endpoint: "ftp://example.invalid/upload".into(),
            ..ForwarderConfig::default()
        };
        assert!(forwarder.validate().is_err());
    }
}
