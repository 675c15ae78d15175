//! Simulated RS232 channel carrying NMEA sentences
//!
//! Same three-worker shape as the CAN channel. The sender writes one random
//! sentence per period, prefixed with a local timestamp. The receiver polls
//! its endpoint, verifies each line's checksum and publishes the labeled
//! fields. The monitor classifies health on the serial thresholds.
//!
//! There is no persistent handle: each send and each poll opens and closes
//! its endpoint, so a missing port is a per-cycle warning, never a start
//! failure.

pub mod port;

pub use port::{open_port, FilePort, LinePort, TtyPort};

use chrono::{Local, Utc};
use crossbeam_channel::Receiver;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::config::SerialChannelConfig;
use crate::events::{ChannelEvent, EventBus};
use crate::lifecycle::{
    run_health_monitor, worker_rng, Channel, RunFlag, Worker, Workers, MAX_SLEEP_SLICE,
};
use crate::nmea::{self, generate};
use crate::state::{ChannelState, ChannelStats};
use crate::types::{ChannelKind, HealthLevel, Result};

/// Timestamp prefix written in front of every transmitted sentence
const LINE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

struct Shared {
    config: SerialChannelConfig,
    state: ChannelState,
    events: EventBus,
}

/// RS232 simulator channel
pub struct SerialChannel {
    shared: Arc<Shared>,
    send_port: Arc<dyn LinePort>,
    receive_port: Arc<dyn LinePort>,
    workers: Workers,
}

impl SerialChannel {
    /// Create a channel whose endpoints are opened as `config.port_kind`
    pub fn new(config: SerialChannelConfig) -> Result<Self> {
        let send_port = open_port(config.port_kind, &config.send_port);
        let receive_port = open_port(config.port_kind, config.receive_port());
        Self::with_line_ports(config, send_port, receive_port)
    }

    /// Create a channel over caller-supplied endpoints
    pub fn with_line_ports(
        config: SerialChannelConfig,
        send_port: Arc<dyn LinePort>,
        receive_port: Arc<dyn LinePort>,
    ) -> Result<Self> {
        config.validate()?;
        let state = ChannelState::new(
            config.send_enabled,
            Duration::from_millis(config.send_period_ms),
            config.history_capacity,
        );

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                state,
                events: EventBus::new(),
            }),
            send_port,
            receive_port,
            workers: Workers::new("rs232"),
        })
    }

    pub fn config(&self) -> &SerialChannelConfig {
        &self.shared.config
    }

    pub fn subscribe(&self) -> Receiver<ChannelEvent> {
        self.shared.events.subscribe()
    }

    /// Turn transmission on or off; the sender keeps running either way
    pub fn set_send_enabled(&self, enabled: bool) {
        log::info!("[RS232] sending {}", if enabled { "enabled" } else { "disabled" });
        self.shared.state.set_send_enabled(enabled);
    }

    pub fn send_enabled(&self) -> bool {
        self.shared.state.send_enabled()
    }

    pub fn set_send_period(&self, period: Duration) -> Result<()> {
        self.shared.state.set_send_period(period)?;
        log::info!("[RS232] send period set to {:?}", period);
        Ok(())
    }

    pub fn send_period(&self) -> Duration {
        self.shared.state.send_period()
    }

    pub fn health(&self) -> HealthLevel {
        self.shared.state.health()
    }

    pub fn last_receive(&self) -> Option<Instant> {
        self.shared.state.last_receive()
    }

    pub fn stats(&self) -> ChannelStats {
        self.shared.state.stats()
    }

    /// Raw lines sent and received, oldest first
    pub fn recent_traffic(&self) -> Vec<String> {
        self.shared.state.recent_traffic()
    }

    pub fn workers_live(&self) -> usize {
        self.workers.live()
    }

    pub fn workers_exited(&self) -> usize {
        self.workers.exited()
    }
}

impl Channel for SerialChannel {
    fn kind(&self) -> ChannelKind {
        ChannelKind::Serial
    }

    fn start(&self) -> Result<()> {
        self.workers.start(|| {
            log::info!(
                "[RS232] sending to {}, receiving from {}",
                self.send_port.name(),
                self.receive_port.name()
            );

            let sender = {
                let (shared, port) = (Arc::clone(&self.shared), Arc::clone(&self.send_port));
                Worker::new("sender", move |flag| run_sender(&shared, port.as_ref(), &flag))
            };
            let receiver = {
                let (shared, port) = (Arc::clone(&self.shared), Arc::clone(&self.receive_port));
                Worker::new("receiver", move |flag| {
                    run_receiver(&shared, port.as_ref(), &flag)
                })
            };
            let monitor = {
                let shared = Arc::clone(&self.shared);
                Worker::new("monitor", move |flag| {
                    run_health_monitor(
                        ChannelKind::Serial,
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

impl Drop for SerialChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run_sender(shared: &Shared, port: &dyn LinePort, flag: &RunFlag) {
    let mut rng = worker_rng(shared.config.seed);
    let state = &shared.state;

    loop {
        if !state.send_enabled() {
            if !flag.sleep(MAX_SLEEP_SLICE) {
                break;
            }
            continue;
        }

        let (kind, sentence) = generate::random_sentence(&mut rng);
        let line = format!("{} - {}", Local::now().format(LINE_TIMESTAMP_FORMAT), sentence);

        match port.send_line(&line) {
            Ok(()) => {
                log::debug!("[RS232 TX] {} {}", kind, line);
                state.count_sent();
                state.record_traffic(format!("TX {}", line));
                if !flag.is_set() {
                    break;
                }
                shared.events.emit(ChannelEvent::SentenceTransmitted {
                    timestamp: Utc::now(),
                    line,
                });
            }
            Err(e) => {
                log::warn!("[RS232 TX] cannot write to {}: {}", port.name(), e);
                state.count_transmit_error();
                if !flag.is_set() {
                    break;
                }
                shared
                    .events
                    .emit(ChannelEvent::transmit_error(ChannelKind::Serial, e));
            }
        }

        if !flag.sleep_for(Instant::now(), || state.send_period()) {
            break;
        }
    }
}

fn run_receiver(shared: &Shared, port: &dyn LinePort, flag: &RunFlag) {
    let poll = Duration::from_millis(shared.config.poll_interval_ms);

    while flag.is_set() {
        match port.receive_lines() {
            Ok(lines) => {
                for line in lines {
                    if !flag.is_set() {
                        return;
                    }
                    handle_line(shared, &line);
                }
            }
            Err(e) => {
                log::warn!("[RS232 RX] cannot read from {}: {}", port.name(), e);
                shared.state.count_receive_error();
                shared
                    .events
                    .emit(ChannelEvent::receive_error(ChannelKind::Serial, e));
            }
        }

        if !flag.sleep(poll) {
            break;
        }
    }
}

fn handle_line(shared: &Shared, line: &str) {
    let state = &shared.state;
    state.record_traffic(format!("RX {}", line));

    match nmea::parse(line) {
        Ok(sentence) => {
            state.mark_received(Instant::now());
            let event = ChannelEvent::NmeaSentence {
                timestamp: Utc::now(),
                kind: sentence.kind,
                fields: sentence.fields,
            };
            log::debug!("{}", event);
            shared.events.emit(event);
        }
        Err(e) => {
            log::warn!("[RS232 RX] rejected {:?}: {}", line, e);
            state.count_receive_error();
            shared
                .events
                .emit(ChannelEvent::receive_error(ChannelKind::Serial, e));
        }
    }
}
