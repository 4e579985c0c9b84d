// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Length-prefixed, CRC-protected framing.
//!
//! ```text
//! [len:1][code:1][payload:len-1][crc16:2 LE]
//! ```
//!
//! `len` counts the code byte plus the payload. The CRC is CRC-16/XMODEM over
//! `len`, `code` and `payload`. On any decoding error the decoder drops exactly
//! one byte from the front of its buffer and rescans what is left, so it always
//! finds the next valid frame boundary.

use crate::error::ErrorKind;
use crate::protocol::{Packet, Payload, FRAME_CRC, MAX_PAYLOAD};

/// Length byte, code byte and two CRC bytes.
pub const FRAME_OVERHEAD: usize = 4;

/// Largest frame any port can carry.
pub const MAX_FRAME: usize = MAX_PAYLOAD + FRAME_OVERHEAD;

/// Encode `packet` into `out`, returning the frame length.
///
/// Fails with [`ErrorKind::Framing`] when the payload exceeds `max_payload` or
/// `out` is too small.
pub fn encode(packet: &Packet, max_payload: usize, out: &mut [u8]) -> Result<usize, ErrorKind> {
    let payload_len = packet.payload.len();
    if payload_len > max_payload.min(MAX_PAYLOAD) {
        return Err(ErrorKind::Framing);
    }
    let total = payload_len + FRAME_OVERHEAD;
    if out.len() < total {
        return Err(ErrorKind::Framing);
    }

    out[0] = (payload_len + 1) as u8;
    out[1] = packet.code;
    out[2..2 + payload_len].copy_from_slice(&packet.payload);
    let crc = FRAME_CRC.checksum(&out[..2 + payload_len]);
    out[2 + payload_len..total].copy_from_slice(&crc.to_le_bytes());
    Ok(total)
}

/// Incremental frame decoder.
///
/// Feed bytes with [`push`](Self::push) and drain events with
/// [`next_event`](Self::next_event) after every byte.
pub struct Decoder {
    buf: [u8; MAX_FRAME],
    len: usize,
    max_payload: usize,
}

impl Decoder {
    pub fn new(max_payload: usize) -> Self {
        Self {
            buf: [0u8; MAX_FRAME],
            len: 0,
            max_payload: max_payload.min(MAX_PAYLOAD),
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }

    /// Whether no partial frame is buffered.
    pub fn is_idle(&self) -> bool {
        self.len == 0
    }

    pub fn reset(&mut self) {
        self.len = 0;
    }

    /// Append one received byte.
    ///
    /// The buffer holds at most one maximal frame, and any buffered frame is
    /// resolved by `next_event` before it can grow past that.
    pub fn push(&mut self, byte: u8) {
        if self.len == self.buf.len() {
            self.discard_front();
        }
        self.buf[self.len] = byte;
        self.len += 1;
    }

    /// Decode the next event from the buffered bytes, if one is complete.
    ///
    /// Returns `Some(Err(_))` once per discarded frame start; call again until
    /// `None` to continue the rescan.
    pub fn next_event(&mut self) -> Option<Result<Packet, ErrorKind>> {
        if self.len == 0 {
            return None;
        }

        let frame_len = self.buf[0] as usize;
        if frame_len == 0 || frame_len > self.max_payload + 1 {
            self.discard_front();
            return Some(Err(ErrorKind::Framing));
        }

        let total = frame_len + 3;
        if self.len < total {
            return None;
        }

        let body_end = 1 + frame_len;
        let expected = u16::from_le_bytes([self.buf[body_end], self.buf[body_end + 1]]);
        if FRAME_CRC.checksum(&self.buf[..body_end]) != expected {
            self.discard_front();
            return Some(Err(ErrorKind::Checksum));
        }

        let code = self.buf[1];
        let payload = Payload::from_slice(&self.buf[2..body_end]);
        self.consume(total);
        match payload {
            Ok(payload) => Some(Ok(Packet { code, payload })),
            Err(_) => Some(Err(ErrorKind::Framing)),
        }
    }

    /// Give up on a partial frame after an inter-byte timeout.
    ///
    /// Drops the first buffered byte and reports a framing error; the remaining
    /// bytes are rescanned by the following `next_event` calls.
    pub fn expire(&mut self) -> Option<ErrorKind> {
        if self.len == 0 {
            return None;
        }
        self.discard_front();
        Some(ErrorKind::Framing)
    }

    fn discard_front(&mut self) {
        self.consume(1);
    }

    fn consume(&mut self, count: usize) {
        let count = count.min(self.len);
        self.buf.copy_within(count..self.len, 0);
        self.len -= count;
    }
}
