// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Byte channels the loader can receive an update through.
//!
//! A [`Stream`] is a duplex link such as a UART or USB CDC port: framed requests
//! in, framed responses out. A [`FileSource`] is a read-only volume that may hold
//! an update file; it signals the end of data instead of answering.

use core::fmt;

use crate::error::TransportError;

/// Identifies the transport a session is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransportId {
    /// A stream port, by configured channel index.
    Stream(u8),
    File,
}

impl fmt::Display for TransportId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stream(channel) => write!(f, "stream {}", channel),
            Self::File => f.write_str("file"),
        }
    }
}

pub trait Stream {
    /// Read whatever is available into `buf`, waiting at most `timeout_ms` for
    /// the first byte. Returns [`TransportError::Timeout`] if nothing arrived.
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, TransportError>;

    /// Write all of `data`. Best-effort: a failure is reported, never retried.
    fn write(&mut self, data: &[u8]) -> Result<(), TransportError>;

    /// Bytes that can be read right now without waiting.
    fn available(&mut self) -> usize;
}

impl<T: Stream + ?Sized> Stream for &mut T {
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, TransportError> {
        (**self).read(buf, timeout_ms)
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        (**self).write(data)
    }

    fn available(&mut self) -> usize {
        (**self).available()
    }
}

pub trait FileSource {
    /// Look for an update file on the volume and open it.
    /// Returns its size in bytes, or `None` when there is nothing to apply.
    fn open_update(&mut self) -> Result<Option<u32>, TransportError>;

    /// Sequential read from the open file. `Ok(0)` signals the end of data.
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;

    fn close(&mut self) {}
}

impl<T: FileSource + ?Sized> FileSource for &mut T {
    fn open_update(&mut self) -> Result<Option<u32>, TransportError> {
        (**self).open_update()
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        (**self).read(buf)
    }

    fn close(&mut self) {
        (**self).close()
    }
}

/// Read from a file source until `buf` is full or the data ends.
/// Returns the number of bytes read.
pub fn fill<S: FileSource + ?Sized>(source: &mut S, buf: &mut [u8]) -> Result<usize, TransportError> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..])? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}
