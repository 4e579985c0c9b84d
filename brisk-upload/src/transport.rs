// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Serial link to the loader speaking the framed request/response protocol.

use std::io::{ErrorKind as IoErrorKind, Read, Write};
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use serialport::SerialPort;

use brisk_core::codec::{encode, Decoder, MAX_FRAME};
use brisk_core::protocol::MAX_PAYLOAD;
use brisk_core::{ByteOrder, Command, Response};

/// Default time to wait for a response.
pub const DEFAULT_TIMEOUT_MS: u64 = 2_000;

/// Gap after which a half-received frame is dropped.
const INTER_BYTE_TIMEOUT: Duration = Duration::from_millis(100);

pub struct Transport {
    port: Box<dyn SerialPort>,
    port_name: String,
    decoder: Decoder,
    order: ByteOrder,
}

impl Transport {
    pub fn new(port_name: &str, baud: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud)
            .timeout(Duration::from_millis(20))
            .open()
            .with_context(|| format!("Failed to open {}", port_name))?;

        Ok(Self {
            port,
            port_name: port_name.to_string(),
            decoder: Decoder::new(MAX_PAYLOAD),
            order: ByteOrder::Little,
        })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }

    /// Byte order for multi-byte request fields, as reported by the loader.
    pub fn set_order(&mut self, order: ByteOrder) {
        self.order = order;
    }

    pub fn send(&mut self, command: &Command) -> Result<()> {
        let packet = command
            .to_packet(self.order)
            .map_err(|kind| anyhow!("Cannot encode {:?}: {}", command.opcode(), kind))?;
        let mut frame = [0u8; MAX_FRAME];
        let len = encode(&packet, MAX_PAYLOAD, &mut frame)
            .map_err(|kind| anyhow!("Cannot frame {:?}: {}", command.opcode(), kind))?;

        self.port.write_all(&frame[..len])?;
        self.port.flush()?;
        Ok(())
    }

    /// Wait for the next well-formed response. Garbage on the line is skipped.
    pub fn recv_timeout(&mut self, timeout_ms: u64) -> Result<Response> {
        let deadline = Instant::now() + Duration::from_millis(timeout_ms);
        let mut last_byte = Instant::now();
        let mut buf = [0u8; 256];

        loop {
            while let Some(event) = self.decoder.next_event() {
                match event {
                    Ok(packet) => {
                        return Response::from_packet(&packet)
                            .map_err(|kind| anyhow!("Malformed response: {}", kind));
                    }
                    Err(kind) => eprintln!("Discarding bad frame: {}", kind),
                }
            }

            if Instant::now() >= deadline {
                self.decoder.reset();
                bail!("Timed out waiting for response after {} ms", timeout_ms);
            }

            match self.port.read(&mut buf) {
                Ok(n) => {
                    last_byte = Instant::now();
                    for &byte in &buf[..n] {
                        self.decoder.push(byte);
                    }
                }
                Err(e) if e.kind() == IoErrorKind::TimedOut => {
                    if !self.decoder.is_idle() && last_byte.elapsed() >= INTER_BYTE_TIMEOUT {
                        self.decoder.expire();
                    }
                }
                Err(e) => return Err(e).context("Serial read failed"),
            }
        }
    }

    pub fn send_recv(&mut self, command: &Command) -> Result<Response> {
        self.send_recv_timeout(command, DEFAULT_TIMEOUT_MS)
    }

    pub fn send_recv_timeout(&mut self, command: &Command, timeout_ms: u64) -> Result<Response> {
        self.send(command)?;
        self.recv_timeout(timeout_ms)
    }
}
