// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Simulated board collaborators shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;

use brisk_core::codec::{encode, Decoder, MAX_FRAME};
use brisk_core::entry::{Backdoor, RetainedStore, RETAINED_LEN};
use brisk_core::image::{ImageHeader, ImageTrailer};
use brisk_core::protocol::{ByteOrder, IMAGE_CRC, MAX_PAYLOAD};
use brisk_core::{
    Command, ErrorKind, FileSource, Flash, Hooks, MemoryRegion, NvmDriver, RegionTable, Response,
    Stream, TransportError, Watchdog,
};

/// Application region used by most tests: 16 blocks of 0x200 bytes.
pub const APP_BASE: u32 = 0x1000;
pub const APP_SIZE: u32 = 0x2000;
pub const BLOCK: u32 = 0x200;

/// One-block region reserved for the application signature.
pub const SIG_ADDR: u32 = 0x8000;

/// Flash window covered by [`SimFlash`].
pub const FLASH_BASE: u32 = 0x1000;
pub const FLASH_END: u32 = 0x8200;

pub fn regions() -> RegionTable {
    RegionTable::new(&[
        MemoryRegion::new(APP_BASE, APP_SIZE, BLOCK),
        MemoryRegion::new(SIG_ADDR, BLOCK, BLOCK),
    ])
    .expect("valid test regions")
}

pub fn nvm() -> NvmDriver<SimFlash> {
    NvmDriver::new(SimFlash::new(), regions(), SIG_ADDR).expect("valid signature address")
}

/// NOR flash model: erase sets bytes to 0xFF, program can only clear bits.
#[derive(Debug, Clone)]
pub struct SimFlash {
    mem: Vec<u8>,
    pub erases: Vec<u32>,
    pub programs: Vec<(u32, usize)>,
    pub fail_erase_at: Option<u32>,
    pub fail_program: bool,
}

impl SimFlash {
    pub fn new() -> Self {
        Self {
            mem: vec![0xFF; (FLASH_END - FLASH_BASE) as usize],
            erases: Vec::new(),
            programs: Vec::new(),
            fail_erase_at: None,
            fail_program: false,
        }
    }

    fn span(&self, address: u32, len: usize) -> Option<std::ops::Range<usize>> {
        let start = address.checked_sub(FLASH_BASE)? as usize;
        let end = start.checked_add(len)?;
        (end <= self.mem.len()).then_some(start..end)
    }

    pub fn bytes(&self, address: u32, len: usize) -> &[u8] {
        let range = self.span(address, len).expect("inside simulated flash");
        &self.mem[range]
    }

    /// Change memory behind the driver's back.
    pub fn corrupt(&mut self, address: u32, value: u8) {
        let range = self.span(address, 1).expect("inside simulated flash");
        self.mem[range.start] = value;
    }
}

impl Flash for SimFlash {
    type Error = ();

    fn read(&mut self, address: u32, buf: &mut [u8]) -> Result<(), ()> {
        let range = self.span(address, buf.len()).ok_or(())?;
        buf.copy_from_slice(&self.mem[range]);
        Ok(())
    }

    fn erase_block(&mut self, address: u32, size: u32) -> Result<(), ()> {
        if self.fail_erase_at == Some(address) {
            return Err(());
        }
        let range = self.span(address, size as usize).ok_or(())?;
        self.mem[range].fill(0xFF);
        self.erases.push(address);
        Ok(())
    }

    fn program(&mut self, address: u32, data: &[u8]) -> Result<(), ()> {
        if self.fail_program {
            return Err(());
        }
        let range = self.span(address, data.len()).ok_or(())?;
        for (cell, byte) in self.mem[range].iter_mut().zip(data) {
            *cell &= *byte;
        }
        self.programs.push((address, data.len()));
        Ok(())
    }
}

/// One scripted read result.
#[derive(Debug, Clone)]
pub enum Step {
    Data(Vec<u8>),
    /// A read that times out.
    Silence,
    Fail(TransportError),
}

/// Stream link replaying a script; silent once the script runs out.
#[derive(Debug, Default)]
pub struct ScriptedStream {
    script: VecDeque<Step>,
    pub written: Vec<u8>,
    pub reads: usize,
    /// Timeout passed to every read, in order.
    pub timeouts: Vec<u32>,
    pub fail_writes: bool,
}

impl ScriptedStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn data(mut self, bytes: &[u8]) -> Self {
        self.script.push_back(Step::Data(bytes.to_vec()));
        self
    }

    pub fn command(self, command: Command) -> Self {
        let frame = frame(&command, ByteOrder::Little);
        self.data(&frame)
    }

    pub fn silence(mut self, reads: usize) -> Self {
        for _ in 0..reads {
            self.script.push_back(Step::Silence);
        }
        self
    }

    pub fn fail(mut self, err: TransportError) -> Self {
        self.script.push_back(Step::Fail(err));
        self
    }

    /// Responses written so far, in order.
    pub fn responses(&self) -> Vec<Response> {
        decode_responses(&self.written)
    }
}

impl Stream for ScriptedStream {
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, TransportError> {
        self.reads += 1;
        self.timeouts.push(timeout_ms);
        match self.script.pop_front() {
            None | Some(Step::Silence) => Err(TransportError::Timeout),
            Some(Step::Fail(err)) => Err(err),
            Some(Step::Data(mut bytes)) => {
                let n = bytes.len().min(buf.len());
                buf[..n].copy_from_slice(&bytes[..n]);
                if n < bytes.len() {
                    self.script.push_front(Step::Data(bytes.split_off(n)));
                }
                Ok(n)
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        if self.fail_writes {
            return Err(TransportError::Disconnected);
        }
        self.written.extend_from_slice(data);
        Ok(())
    }

    fn available(&mut self) -> usize {
        match self.script.front() {
            Some(Step::Data(bytes)) => bytes.len(),
            _ => 0,
        }
    }
}

pub fn frame(command: &Command, order: ByteOrder) -> Vec<u8> {
    let packet = command.to_packet(order).expect("command fits a payload");
    let mut out = [0u8; MAX_FRAME];
    let len = encode(&packet, MAX_PAYLOAD, &mut out).expect("frame fits");
    out[..len].to_vec()
}

pub fn decode_responses(bytes: &[u8]) -> Vec<Response> {
    let mut decoder = Decoder::new(MAX_PAYLOAD);
    let mut responses = Vec::new();
    for &byte in bytes {
        decoder.push(byte);
        while let Some(event) = decoder.next_event() {
            let packet = event.expect("loader writes valid frames");
            responses.push(Response::from_packet(&packet).expect("valid status"));
        }
    }
    responses
}

/// In-memory volume holding at most one update file.
#[derive(Debug, Default)]
pub struct MemVolume {
    file: Option<Vec<u8>>,
    pos: usize,
    /// Largest read served at once.
    pub read_size: usize,
    /// Fail reads once this many bytes were served.
    pub fail_after: Option<usize>,
    pub opened: usize,
    pub closed: usize,
}

impl MemVolume {
    pub fn empty() -> Self {
        Self {
            read_size: 7,
            ..Self::default()
        }
    }

    pub fn with_file(bytes: Vec<u8>) -> Self {
        Self {
            file: Some(bytes),
            ..Self::empty()
        }
    }
}

impl FileSource for MemVolume {
    fn open_update(&mut self) -> Result<Option<u32>, TransportError> {
        self.opened += 1;
        self.pos = 0;
        Ok(self.file.as_ref().map(|file| file.len() as u32))
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let Some(file) = &self.file else {
            return Err(TransportError::Disconnected);
        };
        if self.fail_after.is_some_and(|limit| self.pos >= limit) {
            return Err(TransportError::Io);
        }
        let n = buf.len().min(self.read_size).min(file.len() - self.pos);
        buf[..n].copy_from_slice(&file[self.pos..self.pos + n]);
        self.pos += n;
        Ok(n)
    }

    fn close(&mut self) {
        self.closed += 1;
    }
}

/// Build an update file for the file transport.
pub fn image_file(load_address: u32, image: &[u8]) -> Vec<u8> {
    let length = image.len() as u32;
    let mut out = ImageHeader { load_address, length }.to_bytes().to_vec();
    out.extend_from_slice(image);
    out.extend_from_slice(
        &ImageTrailer {
            length,
            crc32: IMAGE_CRC.checksum(image),
        }
        .to_bytes(),
    );
    out
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len).map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed)).collect()
}

#[derive(Debug, Default)]
pub struct RecordingHooks {
    pub log: Vec<String>,
    pub errors: Vec<ErrorKind>,
    pub started: usize,
    pub completed: usize,
    pub override_verdict: Option<bool>,
    pub veto_start: bool,
    pub app_start_requests: usize,
}

impl Hooks for RecordingHooks {
    fn on_log_entry(&mut self, text: &str) {
        self.log.push(text.to_string());
    }

    fn on_error(&mut self, kind: ErrorKind) {
        self.errors.push(kind);
    }

    fn on_update_started(&mut self) {
        self.started += 1;
    }

    fn on_update_completed(&mut self) {
        self.completed += 1;
    }

    fn backdoor_override(&mut self) -> Option<bool> {
        self.override_verdict
    }

    fn before_app_start(&mut self) -> bool {
        self.app_start_requests += 1;
        !self.veto_start
    }
}

#[derive(Debug, Default)]
pub struct CountingWatchdog {
    pub services: usize,
}

impl Watchdog for CountingWatchdog {
    fn service(&mut self) {
        self.services += 1;
    }
}

#[derive(Debug)]
pub struct MemRetained {
    pub record: [u8; RETAINED_LEN],
}

impl Default for MemRetained {
    fn default() -> Self {
        Self {
            record: [0u8; RETAINED_LEN],
        }
    }
}

impl RetainedStore for MemRetained {
    fn load(&mut self, record: &mut [u8; RETAINED_LEN]) {
        *record = self.record;
    }

    fn store(&mut self, record: &[u8; RETAINED_LEN]) {
        self.record = *record;
    }
}

#[derive(Debug, Default)]
pub struct FixedBackdoor {
    pub asserted: bool,
    pub windows: Vec<u32>,
}

impl Backdoor for FixedBackdoor {
    fn sample(&mut self, window_ms: u32) -> bool {
        self.windows.push(window_ms);
        self.asserted
    }
}
