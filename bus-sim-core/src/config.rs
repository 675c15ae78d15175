//! Channel configuration types
//!
//! Construction-time settings for the two channel engines. Everything here is
//! fixed once a channel is built, except the send flag and period, which only
//! seed the channel's live state and can be changed at runtime afterwards.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::types::{HealthLevel, Result, SimError};

/// Receive-recency thresholds used by a health monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthThresholds {
    /// Elapsed time below this is `Good`
    pub good_within_ms: u64,
    /// Elapsed time below this (and not `Good`) is `Degraded`
    pub degraded_within_ms: u64,
}

impl HealthThresholds {
    /// CAN bus: good under 500 ms, degraded under 2 s
    pub const CAN: Self = Self {
        good_within_ms: 500,
        degraded_within_ms: 2000,
    };

    /// Serial link: good under 2 s, degraded under 5 s
    pub const SERIAL: Self = Self {
        good_within_ms: 2000,
        degraded_within_ms: 5000,
    };

    /// Classify the time since the last valid receive; `None` means never
    pub fn classify(&self, elapsed: Option<Duration>) -> HealthLevel {
        let Some(elapsed) = elapsed else {
            return HealthLevel::Lost;
        };
        let ms = elapsed.as_millis();
        if ms < self.good_within_ms as u128 {
            HealthLevel::Good
        } else if ms < self.degraded_within_ms as u128 {
            HealthLevel::Degraded
        } else {
            HealthLevel::Lost
        }
    }

    fn validate(&self) -> Result<()> {
        if self.good_within_ms == 0 || self.good_within_ms > self.degraded_within_ms {
            return Err(SimError::Config(format!(
                "health thresholds must satisfy 0 < good ({}) <= degraded ({})",
                self.good_within_ms, self.degraded_within_ms
            )));
        }
        Ok(())
    }
}

/// Configuration for the CAN channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanChannelConfig {
    /// CAN interface name (e.g., "can0", "vcan0")
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Whether the sender transmits as soon as the channel starts
    #[serde(default)]
    pub send_enabled: bool,

    /// Delay between sender sweeps
    #[serde(default = "default_send_period")]
    pub send_period_ms: u64,

    /// Upper bound on one receive wait
    #[serde(default = "default_receive_timeout")]
    pub receive_timeout_ms: u64,

    /// Health monitor tick
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_ms: u64,

    /// Health classification thresholds
    #[serde(default = "default_can_health")]
    pub health: HealthThresholds,

    /// Raw frames kept for inspection
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Fixed RNG seed for reproducible sensor values
    #[serde(default)]
    pub seed: Option<u64>,
}

/// Configuration for the serial channel
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SerialChannelConfig {
    /// Endpoint the sender writes to
    #[serde(default = "default_send_port")]
    pub send_port: String,

    /// Endpoint the receiver reads from; `None` reads back the send port
    #[serde(default)]
    pub receive_port: Option<String>,

    /// How the endpoints are opened
    #[serde(default)]
    pub port_kind: PortKind,

    /// Whether the sender transmits as soon as the channel starts
    #[serde(default)]
    pub send_enabled: bool,

    /// Delay between transmitted sentences
    #[serde(default = "default_send_period")]
    pub send_period_ms: u64,

    /// Delay between receive polls
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Health monitor tick
    #[serde(default = "default_monitor_interval")]
    pub monitor_interval_ms: u64,

    /// Health classification thresholds
    #[serde(default = "default_serial_health")]
    pub health: HealthThresholds,

    /// Raw lines kept for inspection
    #[serde(default = "default_history_capacity")]
    pub history_capacity: usize,

    /// Fixed RNG seed for reproducible sentences
    #[serde(default)]
    pub seed: Option<u64>,
}

/// How a serial endpoint is opened each cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum PortKind {
    /// Plain file or pseudo-terminal opened as a file
    #[default]
    File,
    /// Serial device opened through the platform serial API
    Tty {
        #[serde(default = "default_baud_rate")]
        baud_rate: u32,
    },
}

fn default_interface() -> String {
    "vcan0".to_string()
}

fn default_send_port() -> String {
    "/dev/pts/3".to_string()
}

fn default_send_period() -> u64 {
    2000
}

fn default_receive_timeout() -> u64 {
    500
}

fn default_poll_interval() -> u64 {
    500
}

fn default_monitor_interval() -> u64 {
    1000
}

fn default_can_health() -> HealthThresholds {
    HealthThresholds::CAN
}

fn default_serial_health() -> HealthThresholds {
    HealthThresholds::SERIAL
}

fn default_history_capacity() -> usize {
    256
}

fn default_baud_rate() -> u32 {
    9600
}

/// Whole milliseconds in `duration` for the serialized config. A positive
/// duration never rounds down to zero and huge ones saturate.
fn duration_ms(duration: Duration) -> u64 {
    if duration.is_zero() {
        return 0;
    }
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX).max(1)
}

fn check_nonzero(name: &str, value: u64) -> Result<()> {
    if value == 0 {
        return Err(SimError::Config(format!("{} must be positive", name)));
    }
    Ok(())
}

impl Default for CanChannelConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            send_enabled: false,
            send_period_ms: default_send_period(),
            receive_timeout_ms: default_receive_timeout(),
            monitor_interval_ms: default_monitor_interval(),
            health: default_can_health(),
            history_capacity: default_history_capacity(),
            seed: None,
        }
    }
}

impl CanChannelConfig {
    /// Create a CAN configuration for the given interface with default settings
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
            ..Self::default()
        }
    }

    /// Builder method: start with sending enabled or disabled
    pub fn with_send_enabled(mut self, enabled: bool) -> Self {
        self.send_enabled = enabled;
        self
    }

    /// Builder method: set the sweep period
    pub fn with_send_period(mut self, period: Duration) -> Self {
        self.send_period_ms = duration_ms(period);
        self
    }

    /// Builder method: set the receive wait bound
    pub fn with_receive_timeout(mut self, timeout: Duration) -> Self {
        self.receive_timeout_ms = duration_ms(timeout);
        self
    }

    /// Builder method: set the health monitor tick
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval_ms = duration_ms(interval);
        self
    }

    /// Builder method: fix the RNG seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Check that periods are positive and thresholds ordered
    pub fn validate(&self) -> Result<()> {
        if self.interface.is_empty() {
            return Err(SimError::Config("CAN interface name is empty".to_string()));
        }
        check_nonzero("send_period_ms", self.send_period_ms)?;
        check_nonzero("receive_timeout_ms", self.receive_timeout_ms)?;
        check_nonzero("monitor_interval_ms", self.monitor_interval_ms)?;
        self.health.validate()
    }
}

impl Default for SerialChannelConfig {
    fn default() -> Self {
        Self {
            send_port: default_send_port(),
            receive_port: None,
            port_kind: PortKind::default(),
            send_enabled: false,
            send_period_ms: default_send_period(),
            poll_interval_ms: default_poll_interval(),
            monitor_interval_ms: default_monitor_interval(),
            health: default_serial_health(),
            history_capacity: default_history_capacity(),
            seed: None,
        }
    }
}

impl SerialChannelConfig {
    /// Create a serial configuration that reads back what it sends
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            send_port: port.into(),
            ..Self::default()
        }
    }

    /// Create a serial configuration with separate send and receive endpoints
    pub fn with_ports(send_port: impl Into<String>, receive_port: impl Into<String>) -> Self {
        Self {
            send_port: send_port.into(),
            receive_port: Some(receive_port.into()),
            ..Self::default()
        }
    }

    /// Builder method: choose how endpoints are opened
    pub fn with_port_kind(mut self, kind: PortKind) -> Self {
        self.port_kind = kind;
        self
    }

    /// Builder method: start with sending enabled or disabled
    pub fn with_send_enabled(mut self, enabled: bool) -> Self {
        self.send_enabled = enabled;
        self
    }

    /// Builder method: set the send period
    pub fn with_send_period(mut self, period: Duration) -> Self {
        self.send_period_ms = duration_ms(period);
        self
    }

    /// Builder method: set the receive poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = duration_ms(interval);
        self
    }

    /// Builder method: set the health monitor tick
    pub fn with_monitor_interval(mut self, interval: Duration) -> Self {
        self.monitor_interval_ms = duration_ms(interval);
        self
    }

    /// Builder method: fix the RNG seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// The endpoint the receiver reads from
    pub fn receive_port(&self) -> &str {
        self.receive_port.as_deref().unwrap_or(&self.send_port)
    }

    /// Check that ports are named, periods positive and thresholds ordered
    pub fn validate(&self) -> Result<()> {
        if self.send_port.is_empty() || self.receive_port().is_empty() {
            return Err(SimError::Config("serial port name is empty".to_string()));
        }
        check_nonzero("send_period_ms", self.send_period_ms)?;
        check_nonzero("poll_interval_ms", self.poll_interval_ms)?;
        check_nonzero("monitor_interval_ms", self.monitor_interval_ms)?;
        self.health.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_can_thresholds_at_boundaries() {
        let t = HealthThresholds::CAN;
        assert_eq!(t.classify(Some(Duration::from_millis(0))), HealthLevel::Good);
        assert_eq!(t.classify(Some(Duration::from_millis(499))), HealthLevel::Good);
        assert_eq!(t.classify(Some(Duration::from_millis(500))), HealthLevel::Degraded);
        assert_eq!(t.classify(Some(Duration::from_millis(1999))), HealthLevel::Degraded);
        assert_eq!(t.classify(Some(Duration::from_millis(2000))), HealthLevel::Lost);
        assert_eq!(t.classify(None), HealthLevel::Lost);
    }

    #[test]
    fn test_serial_thresholds_at_boundaries() {
        let t = HealthThresholds::SERIAL;
        assert_eq!(t.classify(Some(Duration::from_millis(1999))), HealthLevel::Good);
        assert_eq!(t.classify(Some(Duration::from_millis(2000))), HealthLevel::Degraded);
        assert_eq!(t.classify(Some(Duration::from_millis(4999))), HealthLevel::Degraded);
        assert_eq!(t.classify(Some(Duration::from_secs(5))), HealthLevel::Lost);
    }

    #[test]
    fn test_can_config_builder() {
        let config = CanChannelConfig::new("can1")
            .with_send_enabled(true)
            .with_send_period(Duration::from_millis(250))
            .with_seed(7);

        assert_eq!(config.interface, "can1");
        assert!(config.send_enabled);
        assert_eq!(config.send_period_ms, 250);
        assert_eq!(config.receive_timeout_ms, 500);
        assert_eq!(config.seed, Some(7));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serial_receive_port_falls_back_to_send_port() {
        let config = SerialChannelConfig::new("/tmp/loop");
        assert_eq!(config.receive_port(), "/tmp/loop");

        let config = SerialChannelConfig::with_ports("/dev/pts/3", "/dev/pts/2");
        assert_eq!(config.receive_port(), "/dev/pts/2");
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let config = CanChannelConfig::default().with_send_period(Duration::ZERO);
        assert!(matches!(config.validate(), Err(SimError::Config(_))));

        let mut config = SerialChannelConfig::default();
        config.health = HealthThresholds {
            good_within_ms: 5000,
            degraded_within_ms: 2000,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_builder_durations_never_round_to_zero() {
        let config = CanChannelConfig::default()
            .with_send_period(Duration::from_micros(500))
            .with_receive_timeout(Duration::MAX);
        assert_eq!(config.send_period_ms, 1);
        assert_eq!(config.receive_timeout_ms, u64::MAX);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serial_config_deserialization() {
        let json = r#"{
            "send_port": "/dev/ttyUSB0",
            "port_kind": { "type": "tty", "baud_rate": 4800 },
            "send_enabled": true
        }"#;

        let config: SerialChannelConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.port_kind, PortKind::Tty { baud_rate: 4800 });
        assert!(config.send_enabled);
        assert_eq!(config.send_period_ms, 2000);
        assert_eq!(config.health, HealthThresholds::SERIAL);
    }
}
