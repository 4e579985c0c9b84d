// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Start-up configuration. Fixed for the lifetime of the loader.

use heapless::Vec;

use crate::error::ConfigError;
use crate::protocol::{ByteOrder, ADDRESS_LEN, MAX_PAYLOAD};

/// Maximum number of stream ports.
pub const MAX_PORTS: usize = 4;

/// One stream port (UART, USB CDC, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct PortConfig {
    pub enabled: bool,
    /// Zero-based peripheral index, also the port's [`TransportId::Stream`] id.
    ///
    /// [`TransportId::Stream`]: crate::transport::TransportId::Stream
    pub channel: u8,
    /// Line speed for the board layer; the core does not interpret it.
    pub baudrate: u32,
    pub max_rx_payload: u8,
    pub max_tx_payload: u8,
}

impl PortConfig {
    pub const fn uart(channel: u8, baudrate: u32) -> Self {
        Self {
            enabled: true,
            channel,
            baudrate,
            max_rx_payload: 64,
            max_tx_payload: 64,
        }
    }
}

/// Update from a file on a locally attached volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FileConfig {
    pub enabled: bool,
    /// Bytes programmed per chunk.
    pub chunk_size: u16,
}

/// What the session does after an aborted update.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AbortPolicy {
    /// Return to idle and wait for a fresh `StartUpdate`.
    #[default]
    AwaitRestart,
    /// Hand the abort back to the caller.
    Return,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub ports: Vec<PortConfig, MAX_PORTS>,
    pub file: FileConfig,
    /// Silence on the transports after which an open session is aborted, or an
    /// idle loader gives up waiting.
    pub idle_timeout_ms: u32,
    /// Read timeout per port and poll iteration.
    pub poll_timeout_ms: u32,
    /// Silence inside a partial frame after which its oldest byte is dropped.
    pub inter_byte_timeout_ms: u32,
    /// Read back every chunk right after programming it.
    pub verify_after_program: bool,
    /// How long the default backdoor is sampled at boot.
    pub backdoor_window_ms: u32,
    pub byte_order: ByteOrder,
    pub abort_policy: AbortPolicy,
}

impl Default for Config {
    fn default() -> Self {
        let mut ports = Vec::new();
        let _ = ports.push(PortConfig::uart(0, 57_600));

        Self {
            ports,
            file: FileConfig {
                enabled: true,
                chunk_size: 128,
            },
            idle_timeout_ms: 5_000,
            poll_timeout_ms: 10,
            inter_byte_timeout_ms: 100,
            verify_after_program: true,
            backdoor_window_ms: 500,
            byte_order: ByteOrder::Little,
            abort_policy: AbortPolicy::AwaitRestart,
        }
    }
}

impl Config {
    pub fn enabled_ports(&self) -> impl Iterator<Item = &PortConfig> {
        self.ports.iter().filter(|port| port.enabled)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.enabled_ports().next().is_none() && !self.file.enabled {
            return Err(ConfigError::NoTransport);
        }

        for (i, port) in self.enabled_ports().enumerate() {
            // A program request needs the address plus at least one data byte.
            let rx = port.max_rx_payload as usize;
            let tx = port.max_tx_payload as usize;
            if !(ADDRESS_LEN + 1..=MAX_PAYLOAD).contains(&rx) || !(1..=MAX_PAYLOAD).contains(&tx) {
                return Err(ConfigError::BadPayloadLimit);
            }
            if self.enabled_ports().skip(i + 1).any(|other| other.channel == port.channel) {
                return Err(ConfigError::DuplicatePort);
            }
        }

        if self.file.enabled && !(1..=MAX_PAYLOAD).contains(&(self.file.chunk_size as usize)) {
            return Err(ConfigError::BadPayloadLimit);
        }

        if self.idle_timeout_ms == 0 || self.poll_timeout_ms == 0 || self.poll_timeout_ms > self.idle_timeout_ms {
            return Err(ConfigError::BadTimeout);
        }
        if self.inter_byte_timeout_ms < self.poll_timeout_ms {
            return Err(ConfigError::BadTimeout);
        }

        Ok(())
    }
}
