#![no_std]

extern crate alloc;

#[cfg(test)]
extern crate std;

pub mod command;

use alloc::vec::Vec;

use lightdip_control::{PeriodStats, StatusSnapshot};
use minicbor::decode::Error as CborDecodeError;
use minicbor::encode::{
    Error as CborEncodeError,
    write::{Cursor, EndOfSlice},
};
use minicbor::{Decode, Encode};

pub use command::{
    Command, CommandSession, HELP_TEXT, MAX_DATAGRAM_LEN, STOP_REPLY, UNKNOWN_REPLY,
    history_datagrams, respond,
};

pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 6;
pub const CRC_LEN: usize = 2;

pub const MSG_STATUS: u8 = 0x10;

/// History samples per status frame. At 9 bytes per CBOR float this keeps a
/// frame well inside one UDP datagram.
pub const HISTORY_PER_FRAME: usize = 4096;

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameHeader {
    pub version: u8,
    pub flags: u8,
    pub seq: u8,
    pub msg: u8,
    pub len: u16,
}

/// Inter-sample timing of the reported window.
#[derive(Debug, Clone, Copy, Encode, Decode, Default, PartialEq)]
#[cbor(map)]
pub struct PeriodFrame {
    #[n(0)]
    pub min_ms: f64,
    #[n(1)]
    pub max_ms: f64,
    #[n(2)]
    pub avg_ms: f64,
    #[n(3)]
    pub periods: u32,
}

/// Telemetry pushed to the host once per report.
#[derive(Debug, Clone, Encode, Decode, Default, PartialEq)]
#[cbor(map)]
pub struct StatusFrame {
    #[n(0)]
    pub uptime_ms: u64,
    #[n(1)]
    pub samples: u32,
    #[n(2)]
    pub led_hz: u32,
    #[n(3)]
    pub avg_light_v: f64,
    #[n(4)]
    pub dips: u32,
    #[n(5)]
    pub period: Option<PeriodFrame>,
    #[n(6)]
    pub history: Vec<f64>,
    /// Index of this frame among the frames of one report.
    #[n(7)]
    pub part: u16,
    #[n(8)]
    pub parts: u16,
    /// Position of `history[0]` in the full window.
    #[n(9)]
    pub offset: u32,
}

impl From<PeriodStats> for PeriodFrame {
    fn from(stats: PeriodStats) -> Self {
        Self {
            min_ms: stats.min_period_ms,
            max_ms: stats.max_period_ms,
            avg_ms: stats.avg_period_ms,
            periods: stats.periods,
        }
    }
}

impl From<PeriodFrame> for PeriodStats {
    fn from(frame: PeriodFrame) -> Self {
        Self {
            min_period_ms: frame.min_ms,
            max_period_ms: frame.max_ms,
            avg_period_ms: frame.avg_ms,
            periods: frame.periods,
        }
    }
}

impl StatusFrame {
    pub fn from_snapshot(uptime_ms: u64, snapshot: &StatusSnapshot) -> Self {
        Self {
            uptime_ms,
            samples: snapshot.samples_in_window as u32,
            led_hz: snapshot.led_hz,
            avg_light_v: snapshot.avg_light,
            dips: snapshot.dips_in_window,
            period: snapshot.jitter.map(PeriodFrame::from),
            history: snapshot.history.clone(),
            part: 0,
            parts: 1,
            offset: 0,
        }
    }

    /// Split into frames carrying at most `per_frame` history samples each.
    /// Every part repeats the summary fields; an empty history yields one part.
    pub fn split(&self, per_frame: usize) -> Vec<StatusFrame> {
        let per_frame = per_frame.max(1);
        let chunks: Vec<&[f64]> = if self.history.is_empty() {
            alloc::vec![&[][..]]
        } else {
            self.history.chunks(per_frame).collect()
        };
        let parts = u16::try_from(chunks.len()).unwrap_or(u16::MAX);
        chunks
            .into_iter()
            .take(parts as usize)
            .enumerate()
            .map(|(i, chunk)| StatusFrame {
                history: chunk.to_vec(),
                part: i as u16,
                parts,
                offset: (i * per_frame) as u32,
                ..self.summary()
            })
            .collect()
    }

    fn summary(&self) -> StatusFrame {
        StatusFrame {
            uptime_ms: self.uptime_ms,
            samples: self.samples,
            led_hz: self.led_hz,
            avg_light_v: self.avg_light_v,
            dips: self.dips,
            period: self.period,
            history: Vec::new(),
            part: 0,
            parts: 1,
            offset: 0,
        }
    }

    /// Rebuild the snapshot on the receiving side.
    pub fn to_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            samples_in_window: self.samples as usize,
            led_hz: self.led_hz,
            avg_light: self.avg_light_v,
            dips_in_window: self.dips,
            jitter: self.period.map(PeriodStats::from),
            history: self.history.clone(),
        }
    }
}

/// Joins the parts of one report back together on the receiving side.
///
/// Parts must arrive in order with the same header `seq`; a gap drops the
/// report in progress.
#[derive(Debug, Default)]
pub struct StatusAssembler {
    seq: u8,
    pending: Option<StatusFrame>,
}

impl StatusAssembler {
    pub const fn new() -> Self {
        Self {
            seq: 0,
            pending: None,
        }
    }

    /// Feed one decoded frame; returns the whole report once its last part lands.
    pub fn push(&mut self, header: &FrameHeader, frame: StatusFrame) -> Option<StatusFrame> {
        if frame.part == 0 {
            self.seq = header.seq;
            self.pending = None;
            if frame.parts <= 1 {
                return Some(frame);
            }
            self.pending = Some(frame);
            return None;
        }

        let mut pending = self.pending.take()?;
        if header.seq != self.seq
            || Some(frame.part) != pending.part.checked_add(1)
            || frame.parts != pending.parts
            || frame.offset as usize != pending.history.len()
        {
            return None;
        }
        pending.history.extend_from_slice(&frame.history);
        pending.part = frame.part;
        if frame.part.checked_add(1) == Some(frame.parts) {
            pending.part = 0;
            pending.parts = 1;
            return Some(pending);
        }
        self.pending = Some(pending);
        None
    }
}

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Debug)]
pub enum Error {
    BufferTooSmall,
    PayloadTooLarge,
    InvalidVersion(u8),
    LengthMismatch,
    InvalidPayloadLength,
    UnsupportedMessage(u8),
    CborEncode,
    CborDecode,
    InvalidCrc,
    /// A formatted reply line did not fit its fixed-capacity buffer.
    LineTooLong,
}

pub fn encode_status_frame(seq: u8, status: &StatusFrame, out: &mut [u8]) -> Result<usize, Error> {
    encode_frame(MSG_STATUS, 0, seq, status, out)
}

pub fn decode_status_frame(frame: &[u8]) -> Result<(FrameHeader, StatusFrame), Error> {
    let (header, payload) = decode_frame(frame)?;
    if header.msg != MSG_STATUS {
        return Err(Error::UnsupportedMessage(header.msg));
    }
    let mut decoder = minicbor::Decoder::new(payload);
    let status: StatusFrame = decoder.decode().map_err(map_decode_err)?;
    Ok((header, status))
}

/// Header + CBOR payload + CRC into `out`. Returns the frame length.
pub fn encode_frame<T: Encode<()>>(
    msg: u8,
    flags: u8,
    seq: u8,
    payload: &T,
    out: &mut [u8],
) -> Result<usize, Error> {
    if out.len() < HEADER_LEN + CRC_LEN {
        return Err(Error::BufferTooSmall);
    }

    out[0] = PROTOCOL_VERSION;
    out[1] = flags;
    out[2] = seq;
    out[3] = msg;

    let payload_len = {
        let payload_slice = &mut out[HEADER_LEN..];
        let mut cursor = Cursor::new(payload_slice);
        let mut encoder = minicbor::Encoder::new(&mut cursor);
        encoder.encode(payload).map_err(map_encode_err)?;
        cursor.position()
    };
    if payload_len > u16::MAX as usize {
        return Err(Error::PayloadTooLarge);
    }

    let len_bytes = (payload_len as u16).to_le_bytes();
    out[4] = len_bytes[0];
    out[5] = len_bytes[1];

    let frame_len_without_crc = HEADER_LEN + payload_len;
    if out.len() < frame_len_without_crc + CRC_LEN {
        return Err(Error::BufferTooSmall);
    }
    let crc = crc16_ccitt_false(&out[..frame_len_without_crc]);
    let crc_bytes = crc.to_le_bytes();
    out[frame_len_without_crc] = crc_bytes[0];
    out[frame_len_without_crc + 1] = crc_bytes[1];
    Ok(frame_len_without_crc + CRC_LEN)
}

pub fn decode_frame(buf: &[u8]) -> Result<(FrameHeader, &[u8]), Error> {
    if buf.len() < HEADER_LEN + CRC_LEN {
        return Err(Error::LengthMismatch);
    }

    let version = buf[0];
    if version != PROTOCOL_VERSION {
        return Err(Error::InvalidVersion(version));
    }

    let flags = buf[1];
    let seq = buf[2];
    let msg = buf[3];
    let len = u16::from_le_bytes([buf[4], buf[5]]);
    let payload_len = len as usize;
    if HEADER_LEN + payload_len + CRC_LEN != buf.len() {
        return Err(Error::InvalidPayloadLength);
    }

    let payload = &buf[HEADER_LEN..HEADER_LEN + payload_len];
    let crc_frame = u16::from_le_bytes([
        buf[HEADER_LEN + payload_len],
        buf[HEADER_LEN + payload_len + 1],
    ]);
    if crc16_ccitt_false(&buf[..HEADER_LEN + payload_len]) != crc_frame {
        return Err(Error::InvalidCrc);
    }

    Ok((
        FrameHeader {
            version,
            flags,
            seq,
            msg,
            len,
        },
        payload,
    ))
}

pub fn crc16_ccitt_false(bytes: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &b in bytes {
        crc ^= (b as u16) << 8;
        for _ in 0..8 {
            if (crc & 0x8000) != 0 {
                crc = (crc << 1) ^ 0x1021;
            } else {
                crc <<= 1;
            }
        }
    }
    crc
}

fn map_encode_err(err: CborEncodeError<EndOfSlice>) -> Error {
    if err.is_write() {
        Error::BufferTooSmall
    } else {
        Error::CborEncode
    }
}

fn map_decode_err(_: CborDecodeError) -> Error {
    Error::CborDecode
}
