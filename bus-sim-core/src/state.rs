//! State shared by a channel's workers and its control surface
//!
//! Scalars live in atomics; the last-receive instant and the traffic history
//! are behind their own mutexes so no lock is ever held across I/O.

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};

use crate::types::{HealthLevel, Result, SimError};

/// Snapshot of a channel's traffic counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChannelStats {
    /// Frames or sentences put on the wire
    pub sent: u64,
    /// Frames or sentences received and decoded
    pub received: u64,
    /// Receptions rejected (short frame, unknown ID, bad checksum, ...)
    pub receive_errors: u64,
    /// Transmissions that failed
    pub transmit_errors: u64,
}

/// Live state of one channel
#[derive(Debug)]
pub struct ChannelState {
    send_enabled: AtomicBool,
    send_period_us: AtomicU64,
    health: AtomicU8,
    last_receive: Mutex<Option<Instant>>,
    history: Mutex<VecDeque<String>>,
    history_capacity: usize,
    sent: AtomicU64,
    received: AtomicU64,
    receive_errors: AtomicU64,
    transmit_errors: AtomicU64,
}

/// Whole microseconds in `period`, rounded up and saturating at `u64::MAX`
fn period_micros(period: Duration) -> u64 {
    let micros = u64::try_from(period.as_micros()).unwrap_or(u64::MAX);
    if period.subsec_nanos() % 1_000 != 0 {
        micros.saturating_add(1)
    } else {
        micros
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ChannelState {
    /// Create the state a freshly built channel starts with
    pub fn new(send_enabled: bool, send_period: Duration, history_capacity: usize) -> Self {
        Self {
            send_enabled: AtomicBool::new(send_enabled),
            send_period_us: AtomicU64::new(period_micros(send_period).max(1)),
            health: AtomicU8::new(HealthLevel::Lost.as_u8()),
            last_receive: Mutex::new(None),
            history: Mutex::new(VecDeque::with_capacity(history_capacity.min(1024))),
            history_capacity,
            sent: AtomicU64::new(0),
            received: AtomicU64::new(0),
            receive_errors: AtomicU64::new(0),
            transmit_errors: AtomicU64::new(0),
        }
    }

    pub fn send_enabled(&self) -> bool {
        self.send_enabled.load(Ordering::SeqCst)
    }

    pub fn set_send_enabled(&self, enabled: bool) {
        self.send_enabled.store(enabled, Ordering::SeqCst);
    }

    pub fn send_period(&self) -> Duration {
        Duration::from_micros(self.send_period_us.load(Ordering::SeqCst))
    }

    /// Change the send period. A sender already waiting picks it up on its
    /// next slice, so a shorter period cuts the current wait short.
    pub fn set_send_period(&self, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Err(SimError::Config("send period must be positive".to_string()));
        }
        self.send_period_us.store(period_micros(period), Ordering::SeqCst);
        Ok(())
    }

    pub fn health(&self) -> HealthLevel {
        HealthLevel::from_u8(self.health.load(Ordering::SeqCst))
    }

    /// Store a new level, returning the previous one
    pub fn set_health(&self, level: HealthLevel) -> HealthLevel {
        HealthLevel::from_u8(self.health.swap(level.as_u8(), Ordering::SeqCst))
    }

    /// Instant of the last successfully decoded receive
    pub fn last_receive(&self) -> Option<Instant> {
        *lock(&self.last_receive)
    }

    /// Record a successfully decoded receive at `now`
    pub fn mark_received(&self, now: Instant) {
        *lock(&self.last_receive) = Some(now);
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    /// Time since the last valid receive, `None` if nothing arrived yet
    pub fn since_last_receive(&self, now: Instant) -> Option<Duration> {
        self.last_receive()
            .map(|at| now.saturating_duration_since(at))
    }

    /// Append one raw line or frame to the bounded history
    pub fn record_traffic(&self, entry: impl Into<String>) {
        if self.history_capacity == 0 {
            return;
        }
        let mut history = lock(&self.history);
        if history.len() == self.history_capacity {
            history.pop_front();
        }
        history.push_back(entry.into());
    }

    /// Copy of the retained history, oldest first
    pub fn recent_traffic(&self) -> Vec<String> {
        lock(&self.history).iter().cloned().collect()
    }

    pub fn count_sent(&self) {
        self.sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_receive_error(&self) {
        self.receive_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn count_transmit_error(&self) {
        self.transmit_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stats(&self) -> ChannelStats {
        ChannelStats {
            sent: self.sent.load(Ordering::Relaxed),
            received: self.received.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            transmit_errors: self.transmit_errors.load(Ordering::Relaxed),
        }
    }
}
