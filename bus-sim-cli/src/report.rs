//! Event and summary output
//!
//! Text mode prints one readable line per event and a small table at exit.
//! JSON mode prints one object per line so the output can be piped into
//! other tools.

use anyhow::Result;
use bus_sim_core::{ChannelEvent, ChannelKind, ChannelStats, HealthLevel};
use serde::Serialize;
use std::io::Write;

use crate::config::OutputFormat;

/// Final state of one channel
#[derive(Debug, Clone, Serialize)]
pub struct ChannelSummary {
    pub channel: ChannelKind,
    pub health: HealthLevel,
    #[serde(flatten)]
    pub stats: ChannelStats,
}

/// Render one event as a single line
pub fn format_event(format: OutputFormat, event: &ChannelEvent) -> Result<String> {
    Ok(match format {
        OutputFormat::Text => format!(
            "{} {}",
            event.timestamp().format("%H:%M:%S%.3f"),
            event
        ),
        OutputFormat::Json => serde_json::to_string(event)?,
    })
}

pub fn write_event<W: Write>(out: &mut W, format: OutputFormat, event: &ChannelEvent) -> Result<()> {
    writeln!(out, "{}", format_event(format, event)?)?;
    Ok(())
}

pub fn write_summary<W: Write>(
    out: &mut W,
    format: OutputFormat,
    summaries: &[ChannelSummary],
) -> Result<()> {
    match format {
        OutputFormat::Json => {
            for summary in summaries {
                writeln!(
                    out,
                    "{}",
                    serde_json::json!({ "event": "summary", "summary": summary })
                )?;
            }
        }
        OutputFormat::Text => {
            writeln!(out)?;
            writeln!(out, "═══════════════════════════════════════════════")?;
            writeln!(out, "  Summary")?;
            writeln!(out, "═══════════════════════════════════════════════")?;
            writeln!(
                out,
                "  {:<8} {:<9} {:>8} {:>8} {:>8} {:>8}",
                "Channel", "Health", "Sent", "Recv", "RX err", "TX err"
            )?;
            for s in summaries {
                writeln!(
                    out,
                    "  {:<8} {:<9} {:>8} {:>8} {:>8} {:>8}",
                    s.channel.to_string(),
                    s.health.to_string(),
                    s.stats.sent,
                    s.stats.received,
                    s.stats.receive_errors,
                    s.stats.transmit_errors
                )?;
            }
        }
    }
    Ok(())
}
