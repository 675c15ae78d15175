//! CAN bus connections
//!
//! The channel talks to the bus through [`CanBus`]. On Linux the real
//! implementation is a raw SocketCAN socket (works with `vcan0` as well as
//! physical interfaces). [`LoopbackBus`] is an in-memory bus that echoes every
//! written frame back to its readers, for hosts without a CAN interface.
//!
//! To try the SocketCAN path locally:
//!   sudo ip link add dev vcan0 type vcan && sudo ip link set vcan0 up

use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use std::io;
use std::sync::Arc;
use std::time::Duration;

use crate::types::CanFrame;

/// A connection to one CAN bus, shared by the sender and receiver workers
pub trait CanBus: Send + Sync {
    /// Transmit one frame
    fn write_frame(&self, frame: &CanFrame) -> io::Result<()>;

    /// Wait at most `timeout` for one frame; `Ok(None)` on timeout
    fn read_frame(&self, timeout: Duration) -> io::Result<Option<CanFrame>>;
}

/// Acquires the bus for an interface name when a channel starts
pub type CanBusOpener = Box<dyn Fn(&str) -> io::Result<Arc<dyn CanBus>> + Send + Sync>;

/// Opener for the platform's raw CAN socket
pub fn socketcan_opener() -> CanBusOpener {
    Box::new(|interface: &str| {
        let bus = SocketCanBus::open(interface)?;
        Ok(Arc::new(bus) as Arc<dyn CanBus>)
    })
}

// ============================================================================
// In-memory loopback
// ============================================================================

/// In-memory bus: every written frame is queued for the next reader.
///
/// Clones share the same queue, so a test can keep one clone to inject frames
/// while the channel owns another.
#[derive(Debug, Clone)]
pub struct LoopbackBus {
    tx: Sender<CanFrame>,
    rx: Receiver<CanFrame>,
}

impl LoopbackBus {
    pub fn new() -> Self {
        let (tx, rx) = unbounded();
        Self { tx, rx }
    }

    /// Put a frame on the bus as if another node had sent it
    pub fn inject(&self, frame: CanFrame) {
        // Both ends live in self, so the queue cannot be disconnected
        let _ = self.tx.send(frame);
    }

    /// Frames written but not yet read
    pub fn pending(&self) -> usize {
        self.rx.len()
    }

    /// Opener that hands out clones of this bus for any interface name
    pub fn opener(&self) -> CanBusOpener {
        let bus = self.clone();
        Box::new(move |_interface: &str| Ok(Arc::new(bus.clone()) as Arc<dyn CanBus>))
    }
}

impl Default for LoopbackBus {
    fn default() -> Self {
        Self::new()
    }
}

impl CanBus for LoopbackBus {
    fn write_frame(&self, frame: &CanFrame) -> io::Result<()> {
        self.tx
            .send(frame.clone())
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "loopback bus closed"))
    }

    fn read_frame(&self, timeout: Duration) -> io::Result<Option<CanFrame>> {
        match self.rx.recv_timeout(timeout) {
            Ok(frame) => Ok(Some(frame)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "loopback bus closed",
            )),
        }
    }
}

// ============================================================================
// SocketCAN
// ============================================================================

#[cfg(target_os = "linux")]
mod linux_impl {
    use socketcan::{
        CanDataFrame, CanFrame as SocketFrame, CanSocket, EmbeddedFrame, ExtendedId, Frame, Id,
        Socket, SocketOptions, StandardId,
    };
    use std::io;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::time::Duration;

    use super::CanBus;
    use crate::types::CanFrame;

    /// Raw CAN socket bound to one interface
    pub struct SocketCanBus {
        socket: CanSocket,
        interface: String,
        read_timeout_ms: AtomicU64,
    }

    impl SocketCanBus {
        /// Open and bind a raw socket, with receive-own-messages enabled so
        /// the channel also decodes what it transmits
        pub fn open(interface: &str) -> io::Result<Self> {
            let socket = CanSocket::open(interface)?;

            if let Err(e) = socket.set_recv_own_msgs(true) {
                // Not fatal: the channel still sees traffic from other nodes
                log::warn!("[socketcan] {}: could not enable own-message echo: {}", interface, e);
            }

            let initial_timeout = Duration::from_millis(500);
            socket.set_read_timeout(initial_timeout)?;

            log::info!("[socketcan] Opened raw socket on {}", interface);
            Ok(Self {
                socket,
                interface: interface.to_string(),
                read_timeout_ms: AtomicU64::new(initial_timeout.as_millis() as u64),
            })
        }

        fn build_frame(frame: &CanFrame) -> io::Result<CanDataFrame> {
            let id = if frame.is_extended {
                ExtendedId::new(frame.can_id).map(Id::Extended)
            } else {
                u16::try_from(frame.can_id)
                    .ok()
                    .and_then(StandardId::new)
                    .map(Id::Standard)
            }
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("invalid CAN ID 0x{:X}", frame.can_id),
                )
            })?;

            CanDataFrame::new(id, &frame.data).ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("payload of {} bytes does not fit a CAN frame", frame.data.len()),
                )
            })
        }
    }

    impl CanBus for SocketCanBus {
        fn write_frame(&self, frame: &CanFrame) -> io::Result<()> {
            let data_frame = Self::build_frame(frame)?;
            self.socket.write_frame(&data_frame)
        }

        fn read_frame(&self, timeout: Duration) -> io::Result<Option<CanFrame>> {
            let ms = timeout.as_millis().max(1) as u64;
            if self.read_timeout_ms.swap(ms, Ordering::Relaxed) != ms {
                self.socket.set_read_timeout(Duration::from_millis(ms))?;
            }

            match self.socket.read_frame() {
                Ok(SocketFrame::Data(f)) => Ok(Some(CanFrame {
                    can_id: f.raw_id() & 0x1FFF_FFFF,
                    data: f.data().to_vec(),
                    is_extended: f.is_extended(),
                })),
                Ok(SocketFrame::Remote(_)) | Ok(SocketFrame::Error(_)) => {
                    log::trace!("[socketcan] {}: skipping non-data frame", self.interface);
                    Ok(None)
                }
                Err(ref e)
                    if e.kind() == io::ErrorKind::WouldBlock
                        || e.kind() == io::ErrorKind::TimedOut =>
                {
                    Ok(None)
                }
                Err(e) => Err(e),
            }
        }
    }
}

#[cfg(not(target_os = "linux"))]
mod linux_impl {
    use std::io;
    use std::time::Duration;

    use super::CanBus;
    use crate::types::CanFrame;

    /// SocketCAN is Linux-only; opening always fails elsewhere
    pub struct SocketCanBus;

    impl SocketCanBus {
        pub fn open(interface: &str) -> io::Result<Self> {
            Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("SocketCAN interface {} requires Linux", interface),
            ))
        }
    }

    impl CanBus for SocketCanBus {
        fn write_frame(&self, _frame: &CanFrame) -> io::Result<()> {
            Err(io::ErrorKind::Unsupported.into())
        }

        fn read_frame(&self, _timeout: Duration) -> io::Result<Option<CanFrame>> {
            Err(io::ErrorKind::Unsupported.into())
        }
    }
}

pub use linux_impl::SocketCanBus;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loopback_echoes_writes() {
        let bus = LoopbackBus::new();
        let frame = CanFrame::extended(0x19FF1001, &[1, 2, 3, 4, 5, 6]);

        bus.write_frame(&frame).unwrap();
        assert_eq!(bus.pending(), 1);
        assert_eq!(bus.read_frame(Duration::from_millis(10)).unwrap(), Some(frame));
    }

    #[test]
    fn test_loopback_read_times_out() {
        let bus = LoopbackBus::new();
        assert_eq!(bus.read_frame(Duration::from_millis(10)).unwrap(), None);
    }

    #[test]
    fn test_loopback_clones_share_queue() {
        let bus = LoopbackBus::new();
        let opened = (bus.opener())("vcan0").unwrap();

        bus.inject(CanFrame::extended(0x1234, &[0; 6]));
        let frame = opened.read_frame(Duration::from_millis(10)).unwrap().unwrap();
        assert_eq!(frame.can_id, 0x1234);
    }

    #[test]
    fn test_missing_interface_fails_to_open() {
        assert!(SocketCanBus::open("nosuchcan42").is_err());
    }
}
