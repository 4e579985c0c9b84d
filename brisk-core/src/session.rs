// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! One end-to-end update over the enabled transports.
//!
//! [`UpdateSession`] owns the command processor and polls the transports
//! cooperatively: every [`poll`](UpdateSession::poll) services the watchdog,
//! reads one port and executes at most one decoded command.

use heapless::Vec;

use crate::codec::{encode, Decoder, MAX_FRAME};
use crate::config::{AbortPolicy, Config, MAX_PORTS};
use crate::error::{ConfigError, ErrorKind, TransportError};
use crate::hooks::{Hooks, Watchdog};
use crate::image::run_file_update;
use crate::nvm::{AppSignature, Flash, NvmDriver};
use crate::protocol::{Command, Packet, Response};
use crate::transport::{FileSource, Stream, TransportId};
use crate::update::{CommandProcessor, Context, Origin, Outcome, Reply};

/// Links supplied by the board, keyed by configured channel.
#[derive(Default)]
pub struct Transports<'a> {
    streams: Vec<(u8, &'a mut dyn Stream), MAX_PORTS>,
    file: Option<&'a mut dyn FileSource>,
}

impl<'a> Transports<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_stream(&mut self, channel: u8, link: &'a mut dyn Stream) -> Result<(), ConfigError> {
        if self.streams.iter().any(|(existing, _)| *existing == channel) {
            return Err(ConfigError::DuplicatePort);
        }
        self.streams
            .push((channel, link))
            .map_err(|_| ConfigError::TooManyPorts)
    }

    pub fn set_file(&mut self, source: &'a mut dyn FileSource) {
        self.file = Some(source);
    }
}

/// How a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionOutcome {
    /// A new image was finalized; hand off to it.
    Completed(AppSignature),
    /// Nothing happened within the idle timeout.
    TimedOut,
    /// An update failed and the abort policy hands control back.
    Aborted(ErrorKind),
}

struct Port<'a> {
    channel: u8,
    link: &'a mut dyn Stream,
    decoder: Decoder,
    max_rx_payload: u8,
    max_tx_payload: u8,
    /// Bytes read but not yet fed to the decoder.
    rx: [u8; MAX_FRAME],
    rx_start: usize,
    rx_end: usize,
    /// Silence since the last byte while a partial frame is buffered.
    stalled_ms: u32,
}

impl<'a> Port<'a> {
    fn origin(&self) -> Origin {
        Origin {
            transport: TransportId::Stream(self.channel),
            max_rx_payload: self.max_rx_payload,
            max_tx_payload: self.max_tx_payload,
        }
    }

    /// Feed buffered bytes to the decoder until it yields a packet.
    fn next_packet(&mut self) -> Option<Packet> {
        loop {
            match self.decoder.next_event() {
                Some(Ok(packet)) => return Some(packet),
                Some(Err(kind)) => {
                    debug!("port {}: dropped byte ({})", self.channel, kind);
                    continue;
                }
                None => {}
            }
            if self.rx_start == self.rx_end {
                return None;
            }
            self.decoder.push(self.rx[self.rx_start]);
            self.rx_start += 1;
        }
    }

    /// Read what the link has, waiting up to `timeout_ms` only when nothing is
    /// pending.
    fn fetch(&mut self, timeout_ms: u32) -> Result<usize, TransportError> {
        let timeout_ms = if self.link.available() > 0 { 0 } else { timeout_ms };
        let n = self.link.read(&mut self.rx, timeout_ms)?.min(self.rx.len());
        self.rx_start = 0;
        self.rx_end = n;
        if n > 0 {
            self.stalled_ms = 0;
        }
        Ok(n)
    }

    /// Account an empty read against the partial frame, if any.
    ///
    /// Past the inter-byte timeout every further empty read drops one stale
    /// byte, until the decoder is idle or new bytes arrive.
    fn stall(&mut self, waited_ms: u32, limit_ms: u32) {
        if self.decoder.is_idle() {
            self.stalled_ms = 0;
            return;
        }
        self.stalled_ms = self.stalled_ms.saturating_add(waited_ms);
        if self.stalled_ms < limit_ms {
            return;
        }
        if let Some(kind) = self.decoder.expire() {
            debug!("port {}: partial frame expired ({})", self.channel, kind);
        }
    }

    fn send(&mut self, response: &Response) -> Result<(), TransportError> {
        let mut frame = [0u8; MAX_FRAME];
        let limit = self.max_tx_payload as usize;
        let len = match encode(&response.to_packet(), limit, &mut frame) {
            Ok(len) => len,
            Err(_) => {
                // Payload above this port's transmit limit.
                let fallback = Response::error(ErrorKind::Range).to_packet();
                encode(&fallback, limit, &mut frame).map_err(|_| TransportError::Io)?
            }
        };
        self.link.write(&frame[..len])
    }
}

/// Drives the command processor from the configured transports.
pub struct UpdateSession<'a, F: Flash, H, W> {
    processor: CommandProcessor<F>,
    ports: Vec<Port<'a>, MAX_PORTS>,
    file: Option<&'a mut dyn FileSource>,
    file_tried: bool,
    /// Port owning the open session.
    bound: Option<usize>,
    next_port: usize,
    idle_ms: u32,
    idle_timeout_ms: u32,
    poll_timeout_ms: u32,
    inter_byte_timeout_ms: u32,
    file_chunk: usize,
    abort_policy: AbortPolicy,
    last_error: Option<ErrorKind>,
    hooks: H,
    watchdog: W,
}

impl<'a, F, H, W> UpdateSession<'a, F, H, W>
where
    F: Flash,
    H: Hooks,
    W: Watchdog,
{
    /// Bind the supplied links to the configured ports.
    ///
    /// Links for disabled ports are dropped. A link without a configured port,
    /// an enabled port without a link, or an enabled file transport without a
    /// source is a [`ConfigError::PortMismatch`].
    pub fn new(
        config: &Config,
        nvm: NvmDriver<F>,
        transports: Transports<'a>,
        hooks: H,
        watchdog: W,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let mut ports = Vec::new();
        for (channel, link) in transports.streams {
            let Some(port) = config.ports.iter().find(|port| port.channel == channel) else {
                return Err(ConfigError::PortMismatch);
            };
            if !port.enabled {
                debug!("port {} disabled, link dropped", channel);
                continue;
            }
            let port = Port {
                channel,
                link,
                decoder: Decoder::new(port.max_rx_payload as usize),
                max_rx_payload: port.max_rx_payload,
                max_tx_payload: port.max_tx_payload,
                rx: [0u8; MAX_FRAME],
                rx_start: 0,
                rx_end: 0,
                stalled_ms: 0,
            };
            if ports.push(port).is_err() {
                return Err(ConfigError::TooManyPorts);
            }
        }
        if config
            .enabled_ports()
            .any(|port| !ports.iter().any(|bound: &Port<'_>| bound.channel == port.channel))
        {
            return Err(ConfigError::PortMismatch);
        }

        let file = match (config.file.enabled, transports.file) {
            (true, None) => return Err(ConfigError::PortMismatch),
            (true, source) => source,
            (false, _) => None,
        };

        Ok(Self {
            processor: CommandProcessor::new(nvm, config),
            ports,
            file,
            file_tried: false,
            bound: None,
            next_port: 0,
            idle_ms: 0,
            idle_timeout_ms: config.idle_timeout_ms,
            poll_timeout_ms: config.poll_timeout_ms,
            inter_byte_timeout_ms: config.inter_byte_timeout_ms,
            file_chunk: config.file.chunk_size as usize,
            abort_policy: config.abort_policy,
            last_error: None,
            hooks,
            watchdog,
        })
    }

    pub fn processor(&self) -> &CommandProcessor<F> {
        &self.processor
    }

    pub fn hooks(&self) -> &H {
        &self.hooks
    }

    /// Why the most recent update was aborted, if one was.
    pub fn last_error(&self) -> Option<ErrorKind> {
        self.last_error
    }

    /// Transport owning the open session.
    pub fn bound_transport(&self) -> Option<TransportId> {
        self.bound
            .map(|index| TransportId::Stream(self.ports[index].channel))
    }

    pub fn into_parts(self) -> (NvmDriver<F>, H, W) {
        (self.processor.into_nvm(), self.hooks, self.watchdog)
    }

    /// Poll until the session reaches an outcome.
    pub fn run(&mut self) -> SessionOutcome {
        loop {
            if let Some(outcome) = self.poll() {
                return outcome;
            }
        }
    }

    /// One iteration of the update loop.
    pub fn poll(&mut self) -> Option<SessionOutcome> {
        self.watchdog.service();

        if let Some(outcome) = self.poll_file() {
            return self.conclude(outcome);
        }

        let Some(index) = self.select_port() else {
            return self.idle();
        };

        let poll_timeout_ms = self.poll_timeout_ms;
        let inter_byte_timeout_ms = self.inter_byte_timeout_ms;
        let port = &mut self.ports[index];
        let packet = match port.next_packet() {
            Some(packet) => packet,
            None => match port.fetch(poll_timeout_ms) {
                Ok(0) | Err(TransportError::Timeout) => {
                    port.stall(poll_timeout_ms, inter_byte_timeout_ms);
                    return self.idle();
                }
                Ok(_) => match port.next_packet() {
                    Some(packet) => packet,
                    None => {
                        self.idle_ms = 0;
                        return None;
                    }
                },
                Err(err) => return self.link_fault(index, err),
            },
        };

        self.idle_ms = 0;
        self.execute(index, packet)
    }

    fn select_port(&mut self) -> Option<usize> {
        if self.bound.is_some() {
            return self.bound;
        }
        if self.ports.is_empty() {
            return None;
        }
        let index = self.next_port % self.ports.len();
        self.next_port = (index + 1) % self.ports.len();
        Some(index)
    }

    /// Try the file transport once per run while no port owns a session.
    fn poll_file(&mut self) -> Option<Outcome> {
        if self.bound.is_some() || self.file_tried {
            return None;
        }
        let source = self.file.as_deref_mut()?;
        self.file_tried = true;

        let size = match source.open_update() {
            Ok(Some(size)) => size,
            Ok(None) => {
                debug!("no update file");
                return None;
            }
            Err(err) => {
                warn!("file transport: {}", err);
                return None;
            }
        };

        info!("update file found ({} bytes)", size);
        let mut ctx = Context::new(&mut self.hooks, &mut self.watchdog);
        let outcome = run_file_update(&mut self.processor, &mut ctx, source, size, self.file_chunk);
        source.close();
        Some(outcome)
    }

    fn execute(&mut self, index: usize, packet: Packet) -> Option<SessionOutcome> {
        let origin = self.ports[index].origin();
        let reply = match Command::from_packet(&packet, self.processor.byte_order()) {
            Ok(command) => {
                let mut ctx = Context::new(&mut self.hooks, &mut self.watchdog);
                self.processor.dispatch(&mut ctx, origin, command)
            }
            Err(kind) => {
                debug!("port {}: malformed request 0x{:02x}", self.ports[index].channel, packet.code);
                Reply::from(Response::error(kind))
            }
        };
        self.sync_binding();

        if let Err(err) = self.ports[index].send(&reply.response) {
            warn!("port {}: reply not sent ({})", self.ports[index].channel, err);
            if reply.outcome == Outcome::Continue && self.bound == Some(index) {
                return self.abort_session(ErrorKind::from(err));
            }
        }
        self.conclude(reply.outcome)
    }

    fn link_fault(&mut self, index: usize, err: TransportError) -> Option<SessionOutcome> {
        if self.bound == Some(index) {
            warn!("port {}: link failed ({})", self.ports[index].channel, err);
            return self.abort_session(ErrorKind::from(err));
        }
        self.idle()
    }

    /// Account one empty poll.
    fn idle(&mut self) -> Option<SessionOutcome> {
        self.idle_ms = self.idle_ms.saturating_add(self.poll_timeout_ms);
        if self.idle_ms < self.idle_timeout_ms {
            return None;
        }

        self.idle_ms = 0;
        if self.processor.session().is_some() {
            return self.abort_session(ErrorKind::Timeout);
        }
        info!("no update within {} ms", self.idle_timeout_ms);
        Some(SessionOutcome::TimedOut)
    }

    fn abort_session(&mut self, kind: ErrorKind) -> Option<SessionOutcome> {
        let mut ctx = Context::new(&mut self.hooks, &mut self.watchdog);
        let outcome = self
            .processor
            .abort(&mut ctx, kind)
            .unwrap_or(Outcome::Aborted(kind));
        self.conclude(outcome)
    }

    fn sync_binding(&mut self) {
        self.bound = match self.processor.session().map(|session| session.transport()) {
            Some(TransportId::Stream(channel)) => self.ports.iter().position(|port| port.channel == channel),
            _ => None,
        };
    }

    fn conclude(&mut self, outcome: Outcome) -> Option<SessionOutcome> {
        self.sync_binding();
        match outcome {
            Outcome::Continue => None,
            Outcome::Completed(signature) => {
                self.last_error = None;
                Some(SessionOutcome::Completed(signature))
            }
            Outcome::Aborted(kind) => {
                self.last_error = Some(kind);
                self.idle_ms = 0;
                match self.abort_policy {
                    AbortPolicy::Return => Some(SessionOutcome::Aborted(kind)),
                    AbortPolicy::AwaitRestart => None,
                }
            }
        }
    }
}
