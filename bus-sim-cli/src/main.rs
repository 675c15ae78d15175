//! Bus Simulator CLI Application
//!
//! Headless runner for the bus-sim-core library. It:
//! - Builds the CAN and serial channels from config.toml and flags
//! - Starts them with sending enabled
//! - Prints every channel event (text or JSON lines)
//! - Stops on Ctrl-C or after a fixed duration and prints statistics

use anyhow::{Context, Result};
use bus_sim_core::{
    CanChannel, Channel, ChannelEvent, PortKind, SerialChannel,
};
use clap::Parser;
use crossbeam_channel::{after, bounded, never, select, Receiver};
use std::io::{self, Write};
use std::path::PathBuf;
use std::time::Duration;

mod config;
mod report;

use config::{AppConfig, OutputFormat};
use report::ChannelSummary;

/// Bus Simulator - CAN IMU frames and RS232 NMEA sentences
#[derive(Parser, Debug)]
#[command(name = "bus-sim")]
#[command(about = "Simulate a CAN IMU bus and an RS232 NMEA link", long_about = None)]
#[command(version)]
struct Args {
    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// CAN interface to bind (e.g. vcan0)
    #[arg(long, value_name = "IF")]
    can_interface: Option<String>,

    /// Serial endpoint the sender writes to
    #[arg(long, value_name = "PATH")]
    serial_send: Option<String>,

    /// Serial endpoint the receiver reads from (default: same as send)
    #[arg(long, value_name = "PATH")]
    serial_receive: Option<String>,

    /// Open serial endpoints as devices at this baud rate instead of files
    #[arg(long, value_name = "BAUD")]
    serial_baud: Option<u32>,

    /// Do not run the CAN channel
    #[arg(long)]
    no_can: bool,

    /// Do not run the serial channel
    #[arg(long)]
    no_serial: bool,

    /// Send period for both channels, in milliseconds
    #[arg(long, value_name = "MS")]
    send_period_ms: Option<u64>,

    /// Stop after this many seconds (default: run until Ctrl-C)
    #[arg(short, long, value_name = "SECS")]
    duration: Option<u64>,

    /// Print events as JSON lines
    #[arg(long)]
    json: bool,

    /// Verbosity level (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all log output except errors
    #[arg(short, long)]
    quiet: bool,
}

impl Args {
    /// Layer command-line overrides on top of the loaded configuration
    fn apply(&self, config: &mut AppConfig) {
        if let Some(interface) = &self.can_interface {
            config.can.channel.interface = interface.clone();
        }
        if let Some(port) = &self.serial_send {
            config.serial.channel.send_port = port.clone();
        }
        if let Some(port) = &self.serial_receive {
            config.serial.channel.receive_port = Some(port.clone());
        }
        if let Some(baud_rate) = self.serial_baud {
            config.serial.channel.port_kind = PortKind::Tty { baud_rate };
        }
        if self.no_can {
            config.can.enabled = false;
        }
        if self.no_serial {
            config.serial.enabled = false;
        }
        if let Some(ms) = self.send_period_ms {
            config.can.channel.send_period_ms = ms;
            config.serial.channel.send_period_ms = ms;
        }
        if let Some(secs) = self.duration {
            config.run.duration_secs = Some(secs);
        }
        if self.json {
            config.run.format = OutputFormat::Json;
        }

        // The runner always transmits
        config.can.channel.send_enabled = true;
        config.serial.channel.send_enabled = true;
    }
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("Bus Simulator CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using simulator library v{}", bus_sim_core::VERSION);

    let mut config = match &args.config {
        Some(path) => {
            log::info!("Loading configuration from: {:?}", path);
            config::load_config(path)?
        }
        None => AppConfig::default(),
    };
    args.apply(&mut config);
    config.validate()?;

    run(config)
}

/// Start the enabled channels, print events until told to stop
fn run(config: AppConfig) -> Result<()> {
    let format = config.run.format;

    let can = if config.can.enabled {
        Some(CanChannel::new(config.can.channel.clone()).context("Failed to create CAN channel")?)
    } else {
        None
    };
    let serial = if config.serial.enabled {
        Some(
            SerialChannel::new(config.serial.channel.clone())
                .context("Failed to create serial channel")?,
        )
    } else {
        None
    };

    // Subscribe before starting so nothing is missed
    let can_rx: Receiver<ChannelEvent> = can.as_ref().map(|c| c.subscribe()).unwrap_or_else(never);
    let serial_rx: Receiver<ChannelEvent> =
        serial.as_ref().map(|c| c.subscribe()).unwrap_or_else(never);

    let mut running = 0;
    if let Some(channel) = &can {
        match channel.start() {
            Ok(()) => running += 1,
            // A missing CAN interface should not take the serial side down
            Err(e) => log::error!("CAN channel not started: {}", e),
        }
    }
    if let Some(channel) = &serial {
        channel.start().context("Failed to start serial channel")?;
        running += 1;
    }
    if running == 0 {
        anyhow::bail!("No channel could be started");
    }

    let (stop_tx, stop_rx) = bounded::<()>(1);
    ctrlc::set_handler(move || {
        let _ = stop_tx.try_send(());
    })
    .context("Failed to install Ctrl-C handler")?;

    let deadline = match config.run.duration_secs {
        Some(secs) => after(Duration::from_secs(secs)),
        None => never(),
    };

    let stdout = io::stdout();
    let mut out = stdout.lock();
    loop {
        select! {
            recv(can_rx) -> event => {
                if let Ok(event) = event {
                    report::write_event(&mut out, format, &event)?;
                }
            }
            recv(serial_rx) -> event => {
                if let Ok(event) = event {
                    report::write_event(&mut out, format, &event)?;
                }
            }
            recv(stop_rx) -> _ => {
                log::info!("Interrupted, stopping channels");
                break;
            }
            recv(deadline) -> _ => {
                log::info!("Run duration elapsed, stopping channels");
                break;
            }
        }
    }

    let mut summaries = Vec::new();
    if let Some(channel) = &can {
        channel.stop();
        summaries.push(ChannelSummary {
            channel: channel.kind(),
            health: channel.health(),
            stats: channel.stats(),
        });
    }
    if let Some(channel) = &serial {
        channel.stop();
        summaries.push(ChannelSummary {
            channel: channel.kind(),
            health: channel.health(),
            stats: channel.stats(),
        });
    }

    report::write_summary(&mut out, format, &summaries)?;
    out.flush()?;
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "bus-sim",
            "--can-interface",
            "can1",
            "--serial-send",
            "/tmp/out.nmea",
            "--serial-baud",
            "4800",
            "--send-period-ms",
            "250",
            "--no-can",
            "--json",
            "-d",
            "5",
        ]);
        let mut config = AppConfig::default();
        args.apply(&mut config);

        assert!(!config.can.enabled);
        assert!(config.serial.enabled);
        assert_eq!(config.can.channel.interface, "can1");
        assert_eq!(config.serial.channel.send_port, "/tmp/out.nmea");
        assert_eq!(config.serial.channel.receive_port(), "/tmp/out.nmea");
        assert_eq!(config.serial.channel.port_kind, PortKind::Tty { baud_rate: 4800 });
        assert_eq!(config.serial.channel.send_period_ms, 250);
        assert_eq!(config.run.duration_secs, Some(5));
        assert_eq!(config.run.format, OutputFormat::Json);
        assert!(config.serial.channel.send_enabled);
    }

    #[test]
    fn test_no_flags_keep_defaults() {
        let args = Args::parse_from(["bus-sim"]);
        let mut config = AppConfig::default();
        args.apply(&mut config);

        assert_eq!(config.can.channel.interface, "vcan0");
        assert_eq!(config.can.channel.send_period_ms, 2000);
        assert!(config.can.channel.send_enabled);
        assert_eq!(config.run.format, OutputFormat::Text);
    }
}
