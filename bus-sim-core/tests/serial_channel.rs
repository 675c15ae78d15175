//! End-to-end tests of the serial channel over file-backed ports

use bus_sim_core::nmea::{self, build_sentence};
use bus_sim_core::{
    Channel, ChannelEvent, HealthLevel, SentenceKind, SerialChannel, SerialChannelConfig,
};
use crossbeam_channel::Receiver;
use std::fs;
use std::path::Path;
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

const WAIT: Duration = Duration::from_secs(3);

fn fast_config(path: &Path) -> SerialChannelConfig {
    SerialChannelConfig::new(path.to_string_lossy())
        .with_send_period(Duration::from_secs(10))
        .with_poll_interval(Duration::from_millis(20))
        .with_monitor_interval(Duration::from_millis(50))
        .with_seed(5)
}

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Receive events until `pred` matches, returning everything seen
fn collect_until<F>(rx: &Receiver<ChannelEvent>, mut pred: F) -> Vec<ChannelEvent>
where
    F: FnMut(&[ChannelEvent]) -> bool,
{
    let deadline = Instant::now() + WAIT;
    let mut seen = Vec::new();
    while !pred(&seen) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        match rx.recv_timeout(remaining) {
            Ok(event) => seen.push(event),
            Err(_) => panic!("timed out; events so far: {:#?}", seen),
        }
    }
    seen
}

fn has_receive_error(seen: &[ChannelEvent]) -> bool {
    seen.iter()
        .any(|e| matches!(e, ChannelEvent::ReceiveError { .. }))
}

#[test]
fn test_sent_sentence_is_read_back() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("loop.nmea");
    let channel = SerialChannel::new(fast_config(&path).with_send_enabled(true)).unwrap();
    let rx = channel.subscribe();

    channel.start().unwrap();
    let events = collect_until(&rx, |seen| seen.iter().any(|e| e.is_decoded_value()));
    channel.stop();

    let line = events
        .iter()
        .find_map(|e| match e {
            ChannelEvent::SentenceTransmitted { line, .. } => Some(line.clone()),
            _ => None,
        })
        .unwrap();
    let (stamp, sentence) = line.split_once(" - ").unwrap();
    assert_eq!(stamp.len(), "2024-01-01 00:00:00".len());
    assert!(sentence.starts_with("$GP"));

    let expected_kind = nmea::parse(&line).unwrap().kind;
    match events.iter().find(|e| e.is_decoded_value()).unwrap() {
        ChannelEvent::NmeaSentence { kind, fields, .. } => {
            assert_eq!(*kind, expected_kind);
            assert_eq!(fields.len(), kind.labels().len());
        }
        other => panic!("unexpected event {:?}", other),
    }

    assert!(channel.last_receive().is_some());
    assert_eq!(fs::read_to_string(&path).unwrap().lines().count(), 1);
}

#[test]
fn test_bad_checksum_is_never_decoded() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("in.nmea");
    fs::write(&path, "$GPHDT,045.0,T*1A\n").unwrap();

    let channel = SerialChannel::new(fast_config(&path)).unwrap();
    let rx = channel.subscribe();
    channel.start().unwrap();

    let events = collect_until(&rx, has_receive_error);
    thread::sleep(Duration::from_millis(150));
    channel.stop();

    assert!(events.iter().all(|e| !e.is_decoded_value()));
    assert!(rx.try_iter().all(|e| !e.is_decoded_value()));
    assert!(channel.last_receive().is_none());
    assert_eq!(channel.health(), HealthLevel::Lost);
    assert_eq!(channel.stats().receive_errors, 1);
}

#[test]
fn test_lines_from_other_writer_are_decoded_in_order() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("in.nmea");
    let channel = SerialChannel::new(fast_config(&path)).unwrap();
    let rx = channel.subscribe();
    channel.start().unwrap();

    let content = format!(
        "2024-05-01 08:00:00 - {}\n2024-05-01 08:00:01 - {}\n",
        build_sentence("GPHDT,045.0,T"),
        build_sentence("GPVTG,054.7,T,034.4,M,005.5,N,010.2,K")
    );
    fs::write(&path, content).unwrap();

    let events = collect_until(&rx, |seen| {
        seen.iter().filter(|e| e.is_decoded_value()).count() >= 2
    });
    channel.stop();

    let kinds: Vec<SentenceKind> = events
        .iter()
        .filter_map(|e| match e {
            ChannelEvent::NmeaSentence { kind, .. } => Some(*kind),
            _ => None,
        })
        .collect();
    assert_eq!(kinds, vec![SentenceKind::Hdt, SentenceKind::Vtg]);
}

#[test]
fn test_unknown_talker_is_a_receive_error() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("in.nmea");
    fs::write(&path, format!("{}\n", build_sentence("GPRMC,120000,A"))).unwrap();

    let channel = SerialChannel::new(fast_config(&path)).unwrap();
    let rx = channel.subscribe();
    channel.start().unwrap();
    let events = collect_until(&rx, has_receive_error);
    channel.stop();

    assert!(events.iter().all(|e| !e.is_decoded_value()));
    assert!(channel.last_receive().is_none());
}

#[test]
fn test_unwritable_port_keeps_channel_running() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("missing-dir").join("out.nmea");
    let channel = SerialChannel::new(
        fast_config(&path)
            .with_send_enabled(true)
            .with_send_period(Duration::from_millis(50)),
    )
    .unwrap();
    let rx = channel.subscribe();
    channel.start().unwrap();

    collect_until(&rx, |seen| {
        seen.iter()
            .filter(|e| matches!(e, ChannelEvent::TransmitError { .. }))
            .count()
            >= 2
    });
    assert!(channel.is_running());
    channel.stop();
    assert!(channel.stats().transmit_errors >= 2);
    assert_eq!(channel.stats().sent, 0);
}

#[test]
fn test_health_is_good_then_lost_when_traffic_stops() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("in.nmea");
    let mut config = fast_config(&path);
    config.health.good_within_ms = 100;
    config.health.degraded_within_ms = 200;

    let channel = SerialChannel::new(config).unwrap();
    let rx = channel.subscribe();
    channel.start().unwrap();
    fs::write(&path, format!("{}\n", build_sentence("GPHDT,010.0,T"))).unwrap();

    let health_levels = |seen: &[ChannelEvent]| -> Vec<HealthLevel> {
        seen.iter()
            .filter_map(|e| match e {
                ChannelEvent::HealthChanged { level, .. } => Some(*level),
                _ => None,
            })
            .collect()
    };
    let events = collect_until(&rx, |seen| {
        let levels = health_levels(seen);
        match levels.iter().position(|l| *l == HealthLevel::Good) {
            Some(good) => levels[good..].contains(&HealthLevel::Lost),
            None => false,
        }
    });
    channel.stop();

    assert!(health_levels(&events).contains(&HealthLevel::Good));
    assert_eq!(channel.health(), HealthLevel::Lost);
}

#[test]
fn test_stop_joins_all_workers() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let channel = SerialChannel::new(
        fast_config(&dir.path().join("loop.nmea")).with_send_enabled(true),
    )
    .unwrap();

    channel.start().unwrap();
    channel.start().unwrap();
    assert_eq!(channel.workers_live(), 3);

    channel.stop();
    assert!(!channel.is_running());
    assert_eq!(channel.workers_live(), 0);
    assert_eq!(channel.workers_exited(), 3);
}

#[test]
fn test_send_period_change_applies_while_running() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("loop.nmea");
    let channel = SerialChannel::new(fast_config(&path).with_send_enabled(true)).unwrap();
    let rx = channel.subscribe();
    channel.start().unwrap();

    let sent = |seen: &[ChannelEvent]| {
        seen.iter()
            .filter(|e| matches!(e, ChannelEvent::SentenceTransmitted { .. }))
            .count()
    };
    collect_until(&rx, |seen| sent(seen) >= 1);

    channel.set_send_period(Duration::from_millis(40)).unwrap();
    assert_eq!(channel.send_period(), Duration::from_millis(40));
    collect_until(&rx, |seen| sent(seen) >= 3);
    assert!(channel.is_running());
    channel.stop();

    assert!(fs::read_to_string(&path).unwrap().lines().count() >= 4);
}
