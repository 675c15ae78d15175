//! Bus Simulator Library
//!
//! Simulates two vehicle buses so that dashboards, loggers and diagnostic
//! tools can be exercised without hardware: a CAN bus carrying periodic IMU
//! frames and an RS232-style serial link carrying NMEA sentences.
//!
//! # Architecture
//!
//! Each channel runs three workers over one shared state:
//! - A sender that transmits synthetic sensor data every send period
//! - A receiver that decodes whatever arrives, including its own traffic
//! - A monitor that classifies connection health from receive recency
//!
//! Channels are controlled through the [`Channel`] trait plus a few setters
//! (`set_send_enabled`, `set_send_period`) and report everything through an
//! event stream. The library does NOT:
//! - Render anything (GUI or terminal)
//! - Reconnect automatically; loops simply retry every cycle
//! - Share state between the CAN and serial channels
//!
//! The command-line runner lives in bus-sim-cli.
//!
//! # Example Usage
//!
//! ```no_run
//! use bus_sim_core::{CanChannel, CanChannelConfig, Channel, ChannelEvent};
//! use std::time::Duration;
//!
//! let config = CanChannelConfig::new("vcan0")
//!     .with_send_enabled(true)
//!     .with_send_period(Duration::from_millis(500));
//! let channel = CanChannel::new(config).unwrap();
//! let events = channel.subscribe();
//!
//! channel.start().unwrap();
//! for event in events.iter().take(10) {
//!     if let ChannelEvent::CanMessage { label, values, .. } = &event {
//!         println!("{}: {:?}", label, values);
//!     }
//! }
//! channel.stop();
//! ```

// Public modules
pub mod can;
pub mod config;
pub mod events;
pub mod lifecycle;
pub mod nmea;
pub mod scaling;
pub mod serial;
pub mod state;
pub mod types;

// Re-export main types for convenience
pub use can::{CanBus, CanChannel, LoopbackBus, SocketCanBus};
pub use config::{CanChannelConfig, HealthThresholds, PortKind, SerialChannelConfig};
pub use events::{ChannelEvent, EventBus};
pub use lifecycle::Channel;
pub use nmea::{NmeaField, SentenceKind};
pub use scaling::{ScalingRule, ScalingTable};
pub use serial::{FilePort, LinePort, SerialChannel, TtyPort};
pub use state::ChannelStats;
pub use types::{CanFrame, ChannelKind, HealthLevel, Result, SimError, Timestamp};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
