//! Events pushed out of a running channel
//!
//! Channels never call into their consumers. They publish [`ChannelEvent`]s on
//! an [`EventBus`] and any number of subscribers drain their own receiver.

use chrono::Utc;
use crossbeam_channel::{unbounded, Receiver, Sender};
use serde::Serialize;
use std::fmt;
use std::sync::Mutex;

use crate::nmea::{NmeaField, SentenceKind};
use crate::types::{ChannelKind, HealthLevel, Timestamp};

/// One observable occurrence on a channel
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ChannelEvent {
    /// A known IMU frame was received and decoded
    CanMessage {
        timestamp: Timestamp,
        can_id: u32,
        /// Classification label of the identifier
        label: &'static str,
        values: [f32; 3],
    },

    /// An NMEA sentence passed its checksum and was split into fields
    NmeaSentence {
        timestamp: Timestamp,
        kind: SentenceKind,
        fields: Vec<NmeaField>,
    },

    /// Periodic health classification (re-emitted every tick)
    HealthChanged {
        timestamp: Timestamp,
        channel: ChannelKind,
        level: HealthLevel,
        /// Milliseconds since the last valid receive, `None` if never
        since_last_receive_ms: Option<u64>,
    },

    /// The CAN sender put an IMU frame on the bus
    CanTransmitted {
        timestamp: Timestamp,
        can_id: u32,
        values: [f32; 3],
    },

    /// The serial sender wrote a line to its endpoint
    SentenceTransmitted { timestamp: Timestamp, line: String },

    /// Something arrived that could not be accepted
    ReceiveError {
        timestamp: Timestamp,
        channel: ChannelKind,
        reason: String,
    },

    /// Something could not be put on the wire
    TransmitError {
        timestamp: Timestamp,
        channel: ChannelKind,
        reason: String,
    },
}

impl ChannelEvent {
    /// Get the timestamp of this event
    pub fn timestamp(&self) -> Timestamp {
        match self {
            ChannelEvent::CanMessage { timestamp, .. }
            | ChannelEvent::NmeaSentence { timestamp, .. }
            | ChannelEvent::HealthChanged { timestamp, .. }
            | ChannelEvent::CanTransmitted { timestamp, .. }
            | ChannelEvent::SentenceTransmitted { timestamp, .. }
            | ChannelEvent::ReceiveError { timestamp, .. }
            | ChannelEvent::TransmitError { timestamp, .. } => *timestamp,
        }
    }

    /// Get the channel that produced this event
    pub fn channel(&self) -> ChannelKind {
        match self {
            ChannelEvent::CanMessage { .. } | ChannelEvent::CanTransmitted { .. } => {
                ChannelKind::Can
            }
            ChannelEvent::NmeaSentence { .. } | ChannelEvent::SentenceTransmitted { .. } => {
                ChannelKind::Serial
            }
            ChannelEvent::HealthChanged { channel, .. }
            | ChannelEvent::ReceiveError { channel, .. }
            | ChannelEvent::TransmitError { channel, .. } => *channel,
        }
    }

    /// True for the decoded-value events (CAN message or NMEA sentence)
    pub fn is_decoded_value(&self) -> bool {
        matches!(
            self,
            ChannelEvent::CanMessage { .. } | ChannelEvent::NmeaSentence { .. }
        )
    }

    pub(crate) fn health(channel: ChannelKind, level: HealthLevel, since_ms: Option<u64>) -> Self {
        ChannelEvent::HealthChanged {
            timestamp: Utc::now(),
            channel,
            level,
            since_last_receive_ms: since_ms,
        }
    }

    pub(crate) fn receive_error(channel: ChannelKind, reason: impl ToString) -> Self {
        ChannelEvent::ReceiveError {
            timestamp: Utc::now(),
            channel,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn transmit_error(channel: ChannelKind, reason: impl ToString) -> Self {
        ChannelEvent::TransmitError {
            timestamp: Utc::now(),
            channel,
            reason: reason.to_string(),
        }
    }
}

impl fmt::Display for ChannelEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelEvent::CanMessage {
                can_id,
                label,
                values,
                ..
            } => write!(
                f,
                "[CAN RX] 0x{:08X} {} | {:.3}, {:.3}, {:.3}",
                can_id, label, values[0], values[1], values[2]
            ),
            ChannelEvent::NmeaSentence { kind, fields, .. } => {
                write!(f, "[RS232 RX] {}", kind)?;
                for field in fields {
                    write!(f, " | {}", field)?;
                }
                Ok(())
            }
            ChannelEvent::HealthChanged {
                channel,
                level,
                since_last_receive_ms,
                ..
            } => match since_last_receive_ms {
                Some(ms) => write!(f, "[{} health] {} (last receive {} ms ago)", channel, level, ms),
                None => write!(f, "[{} health] {} (nothing received yet)", channel, level),
            },
            ChannelEvent::CanTransmitted { can_id, values, .. } => write!(
                f,
                "[CAN TX] 0x{:08X} | {:.3}, {:.3}, {:.3}",
                can_id, values[0], values[1], values[2]
            ),
            ChannelEvent::SentenceTransmitted { line, .. } => write!(f, "[RS232 TX] {}", line),
            ChannelEvent::ReceiveError {
                channel, reason, ..
            } => write!(f, "[{} RX error] {}", channel, reason),
            ChannelEvent::TransmitError {
                channel, reason, ..
            } => write!(f, "[{} TX error] {}", channel, reason),
        }
    }
}

/// Fan-out of channel events to every live subscriber
#[derive(Debug, Default)]
pub struct EventBus {
    subscribers: Mutex<Vec<Sender<ChannelEvent>>>,
}

impl EventBus {
    /// Create a bus with no subscribers
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber; it sees every event emitted from now on
    pub fn subscribe(&self) -> Receiver<ChannelEvent> {
        let (tx, rx) = unbounded();
        self.lock().push(tx);
        rx
    }

    /// Deliver `event` to every subscriber, dropping the ones that hung up
    pub fn emit(&self, event: ChannelEvent) {
        let mut subscribers = self.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Number of live subscribers
    pub fn subscriber_count(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Sender<ChannelEvent>>> {
        // A panicking subscriber cannot leave the sender list half-updated
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
