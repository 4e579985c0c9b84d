// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

use super::state::{ProcessorState, Session};
use crate::config::Config;
use crate::error::ErrorKind;
use crate::hooks::{log_entry, Hooks, Watchdog};
use crate::nvm::{AppSignature, Flash, NvmDriver};
use crate::protocol::{
    encode_body, parse_semver, ByteOrder, Command, DeviceInfo, Payload, Response, LOADER_VERSION,
    PROTOCOL_VERSION,
};
use crate::transport::TransportId;

/// Device callbacks a command may need while it runs.
pub struct Context<'a, H: ?Sized, W: ?Sized> {
    pub hooks: &'a mut H,
    pub watchdog: &'a mut W,
}

impl<'a, H: Hooks + ?Sized, W: Watchdog + ?Sized> Context<'a, H, W> {
    pub fn new(hooks: &'a mut H, watchdog: &'a mut W) -> Self {
        Self { hooks, watchdog }
    }
}

/// Where a command came from and what its reply may carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Origin {
    pub transport: TransportId,
    pub max_rx_payload: u8,
    pub max_tx_payload: u8,
}

/// Effect of a command on the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// Session unchanged, or still open.
    Continue,
    /// The image was finalized and the signature written.
    Completed(AppSignature),
    /// The session was dropped.
    Aborted(ErrorKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub response: Response,
    pub outcome: Outcome,
}

impl Reply {
    fn ok() -> Self {
        Self::from(Response::ok())
    }

    fn rejected(kind: ErrorKind) -> Self {
        Self::from(Response::error(kind))
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Self {
            response,
            outcome: Outcome::Continue,
        }
    }
}

/// Executes decoded commands against the memory driver.
///
/// Holds the only update session. Commands that change memory are accepted only
/// inside a session opened by `StartUpdate`, and only from the transport that
/// opened it.
pub struct CommandProcessor<F: Flash> {
    nvm: NvmDriver<F>,
    state: ProcessorState,
    session: Option<Session>,
    verify_after_program: bool,
    byte_order: ByteOrder,
}

impl<F: Flash> CommandProcessor<F> {
    pub fn new(nvm: NvmDriver<F>, config: &Config) -> Self {
        Self {
            nvm,
            state: ProcessorState::Idle,
            session: None,
            verify_after_program: config.verify_after_program,
            byte_order: config.byte_order,
        }
    }

    pub fn state(&self) -> ProcessorState {
        self.state
    }

    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn nvm(&self) -> &NvmDriver<F> {
        &self.nvm
    }

    pub fn nvm_mut(&mut self) -> &mut NvmDriver<F> {
        &mut self.nvm
    }

    pub fn into_nvm(self) -> NvmDriver<F> {
        self.nvm
    }

    /// Dispatch a command to its handler.
    pub fn dispatch<H, W>(&mut self, ctx: &mut Context<'_, H, W>, origin: Origin, command: Command) -> Reply
    where
        H: Hooks + ?Sized,
        W: Watchdog + ?Sized,
    {
        trace!("dispatch {} from {}", command.opcode() as u8, origin.transport);
        match command {
            Command::GetInfo => self.handle_get_info(origin),
            Command::StartUpdate => self.handle_start_update(ctx, origin),
            Command::Erase { address, length } => self.handle_erase(ctx, origin, address, length),
            Command::ProgramChunk { address, data } => self.handle_program(ctx, origin, address, &data),
            Command::Verify { address, data } => self.handle_verify(ctx, origin, address, &data),
            Command::Finalize { expected_crc } => self.handle_finalize(ctx, origin, expected_crc),
            Command::Abort => self.handle_abort(ctx, origin),
            Command::Read { address, length } => self.handle_read(origin, address, length),
            Command::RegionInfo { index } => self.handle_region_info(index),
        }
    }

    /// Drop the open session, if any, reporting `kind` through the hooks.
    pub fn abort<H, W>(&mut self, ctx: &mut Context<'_, H, W>, kind: ErrorKind) -> Option<Outcome>
    where
        H: Hooks + ?Sized,
        W: Watchdog + ?Sized,
    {
        self.session.as_ref()?;
        Some(self.end_session(ctx, kind))
    }

    fn end_session<H, W>(&mut self, ctx: &mut Context<'_, H, W>, kind: ErrorKind) -> Outcome
    where
        H: Hooks + ?Sized,
        W: Watchdog + ?Sized,
    {
        self.state = ProcessorState::Aborted;
        warn!("update aborted: {}", kind);
        ctx.hooks.on_error(kind);
        log_entry(ctx.hooks, format_args!("Firmware update aborted: {}", kind));
        self.session = None;
        self.state = ProcessorState::Idle;
        Outcome::Aborted(kind)
    }

    /// Reject the request and abort the session it belonged to.
    fn fail<H, W>(&mut self, ctx: &mut Context<'_, H, W>, kind: ErrorKind) -> Reply
    where
        H: Hooks + ?Sized,
        W: Watchdog + ?Sized,
    {
        Reply {
            response: Response::error(kind),
            outcome: self.end_session(ctx, kind),
        }
    }

    /// The open session, if `origin` owns it.
    fn owned_session(&mut self, origin: Origin) -> Result<&mut Session, ErrorKind> {
        match self.session.as_mut() {
            None => Err(ErrorKind::Sequence),
            Some(session) if session.transport != origin.transport => Err(ErrorKind::SessionBusy),
            Some(session) => Ok(session),
        }
    }

    fn handle_get_info(&mut self, origin: Origin) -> Reply {
        let info = DeviceInfo {
            protocol_version: PROTOCOL_VERSION,
            loader_version: parse_semver(LOADER_VERSION).unwrap_or(0),
            max_rx_payload: origin.max_rx_payload,
            max_tx_payload: origin.max_tx_payload,
            region_count: self.nvm.regions().len() as u8,
            byte_order: self.byte_order,
            state: self.state,
        };
        match encode_body(&info) {
            Ok(body) => Reply::from(Response::ok_with(body)),
            Err(kind) => Reply::rejected(kind),
        }
    }

    fn handle_start_update<H, W>(&mut self, ctx: &mut Context<'_, H, W>, origin: Origin) -> Reply
    where
        H: Hooks + ?Sized,
        W: Watchdog + ?Sized,
    {
        if self.session.is_some() {
            debug!("StartUpdate rejected: session already open");
            return Reply::rejected(ErrorKind::SessionBusy);
        }

        // Programming needs blocks erased inside this session.
        self.nvm.forget_erased();
        self.session = Some(Session::new(origin.transport));
        self.state = ProcessorState::AwaitingCommand;

        info!("update session opened on {}", origin.transport);
        ctx.hooks.on_update_started();
        log_entry(ctx.hooks, format_args!("Firmware update started via {}", origin.transport));
        Reply::ok()
    }

    fn handle_erase<H, W>(&mut self, ctx: &mut Context<'_, H, W>, origin: Origin, address: u32, length: u32) -> Reply
    where
        H: Hooks + ?Sized,
        W: Watchdog + ?Sized,
    {
        let signature_cleared = match self.owned_session(origin) {
            Ok(session) => session.signature_cleared,
            Err(kind) => return Reply::rejected(kind),
        };
        let span = match self.nvm.block_span(address, length) {
            Ok(span) => span,
            Err(kind) => return self.fail(ctx, kind),
        };

        self.state = ProcessorState::Erasing;
        if !signature_cleared {
            ctx.watchdog.service();
            if let Err(kind) = self.nvm.invalidate_signature() {
                return self.fail(ctx, kind);
            }
            if let Some(session) = self.session.as_mut() {
                session.signature_cleared = true;
            }
        }

        for block in span.blocks() {
            ctx.watchdog.service();
            if let Err(kind) = self.nvm.erase(span.region, block) {
                return self.fail(ctx, kind);
            }
        }
        ctx.watchdog.service();

        log_entry(ctx.hooks, format_args!("Erased {} bytes at 0x{:08x}", length, address));
        self.state = ProcessorState::AwaitingCommand;
        Reply::ok()
    }

    fn handle_program<H, W>(&mut self, ctx: &mut Context<'_, H, W>, origin: Origin, address: u32, data: &[u8]) -> Reply
    where
        H: Hooks + ?Sized,
        W: Watchdog + ?Sized,
    {
        let expected = match self.owned_session(origin) {
            Ok(session) => session.write_cursor(),
            Err(kind) => return Reply::rejected(kind),
        };
        if let Some(cursor) = expected {
            if address != cursor {
                warn!("ProgramChunk: address 0x{:08x} != cursor 0x{:08x}", address, cursor);
                return self.fail(ctx, ErrorKind::Sequence);
            }
        }

        self.state = ProcessorState::Programming;
        ctx.watchdog.service();
        if let Err(kind) = self.nvm.program(address, data) {
            return self.fail(ctx, kind);
        }
        ctx.watchdog.service();

        if self.verify_after_program {
            self.state = ProcessorState::Verifying;
            if let Err(kind) = self.nvm.verify(address, data) {
                return self.fail(ctx, kind);
            }
            ctx.watchdog.service();
        }

        // `program` succeeded, so the chunk lies inside one region.
        let length = data.len() as u32;
        if let Some(session) = self.session.as_mut() {
            session.start.get_or_insert(address);
            session.cursor = address.wrapping_add(length);
            session.bytes_received += length;
            session.digest.update(data);
        }

        self.state = ProcessorState::AwaitingCommand;
        Reply::ok()
    }

    fn handle_verify<H, W>(&mut self, ctx: &mut Context<'_, H, W>, origin: Origin, address: u32, data: &[u8]) -> Reply
    where
        H: Hooks + ?Sized,
        W: Watchdog + ?Sized,
    {
        if let Err(kind) = self.owned_session(origin) {
            return Reply::rejected(kind);
        }

        self.state = ProcessorState::Verifying;
        ctx.watchdog.service();
        if let Err(kind) = self.nvm.verify(address, data) {
            return self.fail(ctx, kind);
        }
        ctx.watchdog.service();

        self.state = ProcessorState::AwaitingCommand;
        Reply::ok()
    }

    fn handle_finalize<H, W>(&mut self, ctx: &mut Context<'_, H, W>, origin: Origin, expected_crc: u32) -> Reply
    where
        H: Hooks + ?Sized,
        W: Watchdog + ?Sized,
    {
        if let Err(kind) = self.owned_session(origin) {
            return Reply::rejected(kind);
        }
        let Some(session) = self.session.take() else {
            return Reply::rejected(ErrorKind::Sequence);
        };
        let Some(start) = session.start else {
            warn!("Finalize: nothing programmed");
            return self.fail(ctx, ErrorKind::Sequence);
        };

        self.state = ProcessorState::Finalizing;
        let received_crc = session.digest.finalize();
        if received_crc != expected_crc {
            warn!(
                "Finalize: CRC mismatch: expected 0x{:08x}, got 0x{:08x}",
                expected_crc, received_crc
            );
            return self.fail(ctx, ErrorKind::Checksum);
        }

        let length = session.bytes_received;
        let stored_crc = match self.nvm.image_crc(start, length, ctx.watchdog) {
            Ok(crc) => crc,
            Err(kind) => return self.fail(ctx, kind),
        };
        if stored_crc != expected_crc {
            warn!(
                "Finalize: memory CRC mismatch: expected 0x{:08x}, got 0x{:08x}",
                expected_crc, stored_crc
            );
            return self.fail(ctx, ErrorKind::VerifyMismatch);
        }

        let signature = AppSignature {
            start,
            length,
            crc32: expected_crc,
        };
        ctx.watchdog.service();
        if let Err(kind) = self.nvm.write_signature(&signature) {
            return self.fail(ctx, kind);
        }
        ctx.watchdog.service();

        self.state = ProcessorState::Completed;
        info!("update complete: {} bytes at 0x{:08x}", length, start);
        ctx.hooks.on_update_completed();
        log_entry(ctx.hooks, format_args!("Firmware update successfully completed"));
        self.state = ProcessorState::Idle;

        Reply {
            response: Response::ok(),
            outcome: Outcome::Completed(signature),
        }
    }

    fn handle_abort<H, W>(&mut self, ctx: &mut Context<'_, H, W>, origin: Origin) -> Reply
    where
        H: Hooks + ?Sized,
        W: Watchdog + ?Sized,
    {
        if let Err(kind) = self.owned_session(origin) {
            return Reply::rejected(kind);
        }
        Reply {
            response: Response::ok(),
            outcome: self.end_session(ctx, ErrorKind::Aborted),
        }
    }

    fn handle_read(&mut self, origin: Origin, address: u32, length: u8) -> Reply {
        if length == 0 || length > origin.max_tx_payload {
            return Reply::rejected(ErrorKind::Range);
        }

        let mut buf = [0u8; u8::MAX as usize];
        let buf = &mut buf[..length as usize];
        if let Err(kind) = self.nvm.read(address, buf) {
            return Reply::rejected(kind);
        }
        match Payload::from_slice(buf) {
            Ok(body) => Reply::from(Response::ok_with(body)),
            Err(_) => Reply::rejected(ErrorKind::Range),
        }
    }

    fn handle_region_info(&mut self, index: u8) -> Reply {
        let Some(region) = self.nvm.regions().get(index as usize) else {
            return Reply::rejected(ErrorKind::Range);
        };
        match encode_body(region) {
            Ok(body) => Reply::from(Response::ok_with(body)),
            Err(kind) => Reply::rejected(kind),
        }
    }
}
