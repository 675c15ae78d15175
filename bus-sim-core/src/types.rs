//! Core types for the bus simulator library
//!
//! This module defines the fundamental types shared by both channel engines:
//! the error type, the raw CAN frame as it crosses the bus seam, the channel
//! identity and the tri-state health classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Timestamp type used throughout the simulator
pub type Timestamp = DateTime<Utc>;

/// Result type for simulator operations
pub type Result<T> = std::result::Result<T, SimError>;

/// Raw CAN frame as written to or read from a bus
///
/// This is the frame before any payload interpretation. The bus layer only
/// moves these around; the IMU codec in `can::frame` gives the payload meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanFrame {
    /// CAN message ID (11-bit or 29-bit, flags stripped)
    pub can_id: u32,
    /// Frame data bytes (0-8 bytes for classic CAN)
    pub data: Vec<u8>,
    /// True if this is an extended (29-bit) CAN ID
    pub is_extended: bool,
}

impl CanFrame {
    /// Create an extended-ID data frame
    pub fn extended(can_id: u32, data: &[u8]) -> Self {
        Self {
            can_id,
            data: data.to_vec(),
            is_extended: true,
        }
    }

    /// Get the data length code (DLC) - number of data bytes
    pub fn dlc(&self) -> usize {
        self.data.len()
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_extended {
            write!(f, "{:08X} [{}]", self.can_id, self.dlc())?;
        } else {
            write!(f, "{:03X} [{}]", self.can_id, self.dlc())?;
        }
        for byte in &self.data {
            write!(f, " {:02X}", byte)?;
        }
        Ok(())
    }
}

/// Errors that can occur while running a simulated channel
#[derive(Debug, thiserror::Error)]
pub enum SimError {
    #[error("Failed to set up CAN bus on {interface}: {source}")]
    BusSetup {
        interface: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed CAN frame: expected {expected} data bytes, got {actual}")]
    MalformedFrame { expected: usize, actual: usize },

    #[error("Unknown CAN ID: 0x{0:X}")]
    UnknownIdentifier(u32),

    #[error("Checksum mismatch: computed {computed:02X}, sentence carries {provided}")]
    ChecksumMismatch { computed: u8, provided: String },

    #[error("Malformed NMEA sentence: {0}")]
    MalformedSentence(String),

    #[error("Unknown NMEA sentence kind: {0}")]
    UnknownSentence(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

/// Which simulated bus a channel (or an event) belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelKind {
    /// CAN bus carrying IMU frames
    Can,
    /// RS232-style serial link carrying NMEA sentences
    Serial,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKind::Can => write!(f, "CAN"),
            ChannelKind::Serial => write!(f, "RS232"),
        }
    }
}

/// Connection health derived purely from receive recency
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum HealthLevel {
    /// No valid traffic within the degraded window (or never)
    Lost = 0,
    /// Valid traffic seen recently, but not within the good window
    Degraded = 1,
    /// Valid traffic seen within the good window
    Good = 2,
}

impl HealthLevel {
    /// Decode the level stored in an atomic; unknown values read as `Lost`
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            2 => HealthLevel::Good,
            1 => HealthLevel::Degraded,
            _ => HealthLevel::Lost,
        }
    }

    /// Encode for atomic storage
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for HealthLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthLevel::Good => write!(f, "Good"),
            HealthLevel::Degraded => write!(f, "Degraded"),
            HealthLevel::Lost => write!(f, "Lost"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_level_atomic_encoding() {
        for level in [HealthLevel::Lost, HealthLevel::Degraded, HealthLevel::Good] {
            assert_eq!(HealthLevel::from_u8(level.as_u8()), level);
        }
        assert_eq!(HealthLevel::from_u8(42), HealthLevel::Lost);
    }

    #[test]
    fn test_frame_display() {
        let frame = CanFrame::extended(0x19FF1000, &[0x01, 0xAB]);
        assert_eq!(format!("{}", frame), "19FF1000 [2] 01 AB");

        let standard = CanFrame {
            can_id: 0x123,
            data: vec![],
            is_extended: false,
        };
        assert_eq!(format!("{}", standard), "123 [0]");
    }

    #[test]
    fn test_error_display() {
        let err = SimError::UnknownIdentifier(0x1234);
        assert_eq!(format!("{}", err), "Unknown CAN ID: 0x1234");

        let err = SimError::MalformedFrame { expected: 6, actual: 4 };
        assert!(format!("{}", err).contains("expected 6"));
    }
}
