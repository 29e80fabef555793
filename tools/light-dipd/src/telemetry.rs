use lightdip_control::{Clock, StatusSink, StatusSnapshot};
use lightdip_protocol::{HISTORY_PER_FRAME, StatusFrame, encode_status_frame};
use std::io;
use std::net::{SocketAddr, UdpSocket};

use crate::clock::MonotonicClock;

/// Largest UDP payload over IPv4.
pub const MAX_FRAME_LEN: usize = 65_507;

#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    #[error("encode status frame: {0:?}")]
    Encode(lightdip_protocol::Error),
    #[error("send to {target}: {source}")]
    Send {
        target: SocketAddr,
        #[source]
        source: io::Error,
    },
}

/// Pushes each report to the host as one or more binary status frames
/// sharing a `seq`.
pub struct UdpTelemetry {
    socket: UdpSocket,
    target: SocketAddr,
    clock: MonotonicClock,
    seq: u8,
    buf: Vec<u8>,
}

impl UdpTelemetry {
    pub fn connect(target: SocketAddr, clock: MonotonicClock) -> io::Result<Self> {
        let bind: SocketAddr = if target.is_ipv4() {
            ([0, 0, 0, 0], 0).into()
        } else {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(bind)?;
        socket.set_nonblocking(true)?;
        Ok(Self {
            socket,
            target,
            clock,
            seq: 0,
            buf: vec![0u8; MAX_FRAME_LEN],
        })
    }

    pub fn target(&self) -> SocketAddr {
        self.target
    }
}

impl StatusSink for UdpTelemetry {
    type Error = TelemetryError;

    fn publish(&mut self, snapshot: &StatusSnapshot) -> Result<(), TelemetryError> {
        let frame = StatusFrame::from_snapshot(self.clock.now_ms(), snapshot);
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        for part in frame.split(HISTORY_PER_FRAME) {
            let len =
                encode_status_frame(seq, &part, &mut self.buf).map_err(TelemetryError::Encode)?;
            self.socket
                .send_to(&self.buf[..len], self.target)
                .map_err(|source| TelemetryError::Send {
                    target: self.target,
                    source,
                })?;
        }
        Ok(())
    }
}
