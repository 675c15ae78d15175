//! Simulated CAN channel
//!
//! [`CanChannel`] owns a bus connection and runs three workers over it:
//!
//! - **sender**: every send period, sweeps the three IMU identifiers in order
//!   and transmits one frame of random in-range values for each
//! - **receiver**: waits for frames with a bounded timeout, decodes known
//!   identifiers and publishes the values
//! - **monitor**: once per tick, classifies health from the time since the
//!   last successfully decoded frame
//!
//! The bus is acquired in `start()` through a [`CanBusOpener`], so the same
//! engine runs on SocketCAN or on an in-memory [`LoopbackBus`].

pub mod bus;
pub mod frame;

pub use bus::{socketcan_opener, CanBus, CanBusOpener, LoopbackBus, SocketCanBus};
pub use frame::{ImuFrame, IMU_PAYLOAD_LEN};

use chrono::Utc;
use crossbeam_channel::Receiver;
use rand::Rng;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::CanChannelConfig;
use crate::events::{ChannelEvent, EventBus};
use crate::lifecycle::{
    run_health_monitor, worker_rng, Channel, RunFlag, Worker, Workers, MAX_SLEEP_SLICE,
};
use crate::scaling::{ScalingTable, IMU_IDS};
use crate::state::{ChannelState, ChannelStats};
use crate::types::{CanFrame, ChannelKind, HealthLevel, Result, SimError};

/// A frame whose identifier and payload were both understood
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub can_id: u32,
    pub label: &'static str,
    pub values: [f32; 3],
}

/// Decode a received frame against `table`.
///
/// Unknown identifiers and payloads that are not exactly six bytes are
/// rejected.
pub fn decode_frame(table: &ScalingTable, frame: &CanFrame) -> Result<DecodedFrame> {
    let rule = table
        .get(frame.can_id)
        .ok_or(SimError::UnknownIdentifier(frame.can_id))?;
    let imu = ImuFrame::from_can_frame(frame)?;

    Ok(DecodedFrame {
        can_id: frame.can_id,
        label: rule.label,
        values: imu.values(rule),
    })
}

/// Everything the workers share with the control surface
struct Shared {
    config: CanChannelConfig,
    table: ScalingTable,
    state: ChannelState,
    events: EventBus,
}

/// CAN bus simulator channel
pub struct CanChannel {
    shared: Arc<Shared>,
    opener: CanBusOpener,
    workers: Workers,
}

impl CanChannel {
    /// Create a channel that opens a SocketCAN interface on start
    pub fn new(config: CanChannelConfig) -> Result<Self> {
        Self::with_bus_opener(config, socketcan_opener())
    }

    /// Create a channel that acquires its bus through `opener`
    pub fn with_bus_opener(config: CanChannelConfig, opener: CanBusOpener) -> Result<Self> {
        config.validate()?;
        let state = ChannelState::new(
            config.send_enabled,
            Duration::from_millis(config.send_period_ms),
            config.history_capacity,
        );

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                table: ScalingTable::imu(),
                state,
                events: EventBus::new(),
            }),
            opener,
            workers: Workers::new("can"),
        })
    }

    pub fn config(&self) -> &CanChannelConfig {
        &self.shared.config
    }

    /// Register an event subscriber
    pub fn subscribe(&self) -> Receiver<ChannelEvent> {
        self.shared.events.subscribe()
    }

    /// Turn transmission on or off; the sender keeps running either way
    pub fn set_send_enabled(&self, enabled: bool) {
        log::info!("[CAN] sending {}", if enabled { "enabled" } else { "disabled" });
        self.shared.state.set_send_enabled(enabled);
    }

    pub fn send_enabled(&self) -> bool {
        self.shared.state.send_enabled()
    }

    /// Change the delay between sweeps; zero is rejected
    pub fn set_send_period(&self, period: Duration) -> Result<()> {
        self.shared.state.set_send_period(period)?;
        log::info!("[CAN] send period set to {:?}", period);
        Ok(())
    }

    pub fn send_period(&self) -> Duration {
        self.shared.state.send_period()
    }

    /// Last classification published by the monitor
    pub fn health(&self) -> HealthLevel {
        self.shared.state.health()
    }

    pub fn last_receive(&self) -> Option<Instant> {
        self.shared.state.last_receive()
    }

    pub fn stats(&self) -> ChannelStats {
        self.shared.state.stats()
    }

    /// Raw frames sent and received, oldest first
    pub fn recent_traffic(&self) -> Vec<String> {
        self.shared.state.recent_traffic()
    }

    /// Worker threads currently alive
    pub fn workers_live(&self) -> usize {
        self.workers.live()
    }

    /// Worker threads that have exited since construction
    pub fn workers_exited(&self) -> usize {
        self.workers.exited()
    }

    fn open_bus(&self) -> Result<Arc<dyn CanBus>> {
        let interface = &self.shared.config.interface;
        (self.opener)(interface).map_err(|source| {
            log::error!("[CAN] failed to open {}: {}", interface, source);
            SimError::BusSetup {
                interface: interface.clone(),
                source,
            }
        })
    }
}

impl Channel for CanChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Can
    }

    fn start(&self) -> Result<()> {
        self.workers.start(|| {
            let bus = self.open_bus()?;
            log::info!("[CAN] bus {} ready", self.shared.config.interface);

            let sender = {
                let (shared, bus) = (Arc::clone(&self.shared), Arc::clone(&bus));
                Worker::new("sender", move |flag| run_sender(&shared, bus.as_ref(), &flag))
            };
            let receiver = {
                let shared = Arc::clone(&self.shared);
                Worker::new("receiver", move |flag| run_receiver(&shared, bus.as_ref(), &flag))
            };
            let monitor = {
                let shared = Arc::clone(&self.shared);
                Worker::new("monitor", move |flag| {
                    run_health_monitor(
                        ChannelKind::Can,
                        shared.config.health,
                        Duration::from_millis(shared.config.monitor_interval_ms),
                        &shared.state,
                        &shared.events,
                        &flag,
                    )
                })
            };
            Ok(vec![sender, receiver, monitor])
        })
    }

    fn stop(&self) {
        self.workers.stop();
    }

    fn is_running(&self) -> bool {
        self.workers.is_running()
    }
}

impl Drop for CanChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Longest single blocking read before the receiver rechecks its flag
const MAX_READ_WAIT: Duration = Duration::from_millis(500);

fn run_sender(shared: &Shared, bus: &dyn CanBus, flag: &RunFlag) {
    let mut rng = worker_rng(shared.config.seed);

    loop {
        let state = &shared.state;
        if !state.send_enabled() {
            if !flag.sleep(MAX_SLEEP_SLICE) {
                break;
            }
            continue;
        }

        for can_id in IMU_IDS {
            if !flag.is_set() {
                return;
            }
            let Some(rule) = shared.table.get(can_id) else {
                continue;
            };

            let values = [(); 3].map(|_| rng.gen_range(rule.valid_min..=rule.valid_max));
            let frame = ImuFrame::from_values(rule, values).to_can_frame();

            match bus.write_frame(&frame) {
                Ok(()) => {
                    log::debug!("[CAN TX] {}", frame);
                    state.count_sent();
                    state.record_traffic(format!("TX {}", frame));
                    if !flag.is_set() {
                        return;
                    }
                    shared.events.emit(ChannelEvent::CanTransmitted {
                        timestamp: Utc::now(),
                        can_id,
                        values,
                    });
                }
                Err(e) => {
                    log::warn!("[CAN TX] write of 0x{:08X} failed: {}", can_id, e);
                    state.count_transmit_error();
                    if !flag.is_set() {
                        return;
                    }
                    shared
                        .events
                        .emit(ChannelEvent::transmit_error(ChannelKind::Can, e));
                }
            }
        }

        if !flag.sleep_for(Instant::now(), || state.send_period()) {
            break;
        }
    }
}

fn run_receiver(shared: &Shared, bus: &dyn CanBus, flag: &RunFlag) {
    // Longer configured waits are split so stop is seen within the bound
    let timeout = Duration::from_millis(shared.config.receive_timeout_ms).min(MAX_READ_WAIT);

    while flag.is_set() {
        match bus.read_frame(timeout) {
            Ok(Some(frame)) if flag.is_set() => handle_frame(shared, &frame),
            Ok(_) => {}
            Err(e) => {
                log::warn!("[CAN RX] read failed: {}", e);
                shared.state.count_receive_error();
                if !flag.is_set() {
                    break;
                }
                shared
                    .events
                    .emit(ChannelEvent::receive_error(ChannelKind::Can, &e));
                // Back off so a dead socket does not spin
                flag.sleep(timeout);
            }
        }
    }
}

fn handle_frame(shared: &Shared, frame: &CanFrame) {
    let state = &shared.state;
    state.record_traffic(format!("RX {}", frame));

    match decode_frame(&shared.table, frame) {
        Ok(decoded) => {
            state.mark_received(Instant::now());
            let event = ChannelEvent::CanMessage {
                timestamp: Utc::now(),
                can_id: decoded.can_id,
                label: decoded.label,
                values: decoded.values,
            };
            log::debug!("{}", event);
            shared.events.emit(event);
        }
        Err(e) => {
            log::warn!("[CAN RX] rejected {}: {}", frame, e);
            state.count_receive_error();
            shared
                .events
                .emit(ChannelEvent::receive_error(ChannelKind::Can, e));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scaling::{ACCELERATION_ID, ATTITUDE_ID};

    #[test]
    fn test_decode_known_frame() {
        let table = ScalingTable::imu();
        let rule = table.get(ATTITUDE_ID).unwrap();
        let frame = ImuFrame::from_values(rule, [10.0, -20.0, 0.5]).to_can_frame();

        let decoded = decode_frame(&table, &frame).unwrap();
        assert_eq!(decoded.can_id, ATTITUDE_ID);
        assert_eq!(decoded.label, rule.label);
        for (got, want) in decoded.values.iter().zip([10.0f32, -20.0, 0.5]) {
            assert!((got - want).abs() <= rule.scale, "{} vs {}", got, want);
        }
    }

    #[test]
    fn test_decode_rejects_unknown_identifier() {
        let frame = CanFrame::extended(0x1234, &[0; 6]);
        assert!(matches!(
            decode_frame(&ScalingTable::imu(), &frame),
            Err(SimError::UnknownIdentifier(0x1234))
        ));
    }

    #[test]
    fn test_decode_rejects_short_frame() {
        let frame = CanFrame::extended(ACCELERATION_ID, &[1, 2, 3, 4]);
        assert!(matches!(
            decode_frame(&ScalingTable::imu(), &frame),
            Err(SimError::MalformedFrame { expected: 6, actual: 4 })
        ));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let config = CanChannelConfig::new("vcan0").with_send_period(Duration::ZERO);
        let bus = LoopbackBus::new();
        assert!(CanChannel::with_bus_opener(config, bus.opener()).is_err());
    }

    #[test]
    fn test_control_calls_while_idle() {
        let bus = LoopbackBus::new();
        let channel = CanChannel::with_bus_opener(CanChannelConfig::default(), bus.opener()).unwrap();

        assert!(!channel.is_running());
        assert_eq!(channel.health(), HealthLevel::Lost);
        channel.set_send_enabled(true);
        assert!(channel.send_enabled());
        assert!(channel.set_send_period(Duration::ZERO).is_err());
        channel.set_send_period(Duration::from_millis(50)).unwrap();
        assert_eq!(channel.send_period(), Duration::from_millis(50));
    }
}
