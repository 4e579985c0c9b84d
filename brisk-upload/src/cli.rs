// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Command-line interface definitions.

use std::path::PathBuf;

use anyhow::{anyhow, bail, Result};
use clap::{Parser, Subcommand};

use crate::commands;
use crate::transport::Transport;

/// Command-line arguments.
#[derive(Parser)]
#[command(name = "brisk-upload")]
#[command(about = "Firmware upload tool for the brisk loader")]
pub struct Cli {
    /// Serial port (e.g., /dev/ttyACM0)
    #[arg(short, long)]
    pub port: Option<String>,

    /// Line speed; ignored by USB CDC links
    #[arg(short, long, default_value = "115200")]
    pub baud: u32,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
pub enum Commands {
    /// Show loader version, limits and memory regions
    Info,

    /// Program a firmware image
    Upload {
        /// Raw binary, or an update file made by `pack`
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Load address in hex for raw binaries (default: start of the first region)
        #[arg(short, long, value_parser = parse_hex_u32)]
        address: Option<u32>,
    },

    /// Abort the update session in progress
    Abort,

    /// Read back device memory
    Read {
        /// Start address in hex
        #[arg(value_parser = parse_hex_u32)]
        address: u32,

        /// Number of bytes
        #[arg(value_parser = parse_size)]
        length: u32,

        /// Write the bytes to a file instead of printing a hex dump
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Wrap a raw binary into an update file for the file transport
    Pack {
        /// Input binary file
        #[arg(value_name = "INPUT")]
        input: PathBuf,

        /// Output update file
        #[arg(value_name = "OUTPUT")]
        output: PathBuf,

        /// Load address in hex (default: 0x10010000)
        #[arg(short, long, default_value = "0x10010000", value_parser = parse_hex_u32)]
        address: u32,
    },
}

/// Parse a hex string (with or without 0x prefix) into a u32.
fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let s = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    u32::from_str_radix(s, 16).map_err(|e| format!("invalid hex value: {e}"))
}

/// Decimal, or hex with a 0x prefix.
fn parse_size(s: &str) -> Result<u32, String> {
    if s.starts_with("0x") || s.starts_with("0X") {
        parse_hex_u32(s)
    } else {
        s.parse().map_err(|e| format!("invalid size: {e}"))
    }
}

/// Execute the parsed CLI command.
pub fn run(cli: Cli) -> Result<()> {
    if let Commands::Pack {
        input,
        output,
        address,
    } = &cli.command
    {
        return commands::pack(input, output, *address);
    }

    let port = cli
        .port
        .as_deref()
        .ok_or_else(|| anyhow!("--port is required for this command"))?;
    let mut transport = Transport::new(port, cli.baud)?;

    match cli.command {
        Commands::Info => commands::info(&mut transport),
        Commands::Upload { file, address } => commands::upload(&mut transport, &file, address),
        Commands::Abort => commands::abort(&mut transport),
        Commands::Read {
            address,
            length,
            output,
        } => commands::read(&mut transport, address, length, output.as_deref()),
        Commands::Pack { .. } => bail!("unreachable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex_u32("0x10010000"), Ok(0x1001_0000));
        assert_eq!(parse_hex_u32("ff"), Ok(0xFF));
        assert!(parse_hex_u32("0xzz").is_err());
    }

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("256"), Ok(256));
        assert_eq!(parse_size("0x100"), Ok(256));
        assert!(parse_size("-1").is_err());
    }

    #[test]
    fn test_cli_shape() {
        let cli = Cli::try_parse_from(["brisk-upload", "-p", "/dev/ttyACM0", "upload", "fw.bin", "-a", "0x10010000"])
            .unwrap();
        assert_eq!(cli.port.as_deref(), Some("/dev/ttyACM0"));
        assert!(matches!(
            cli.command,
            Commands::Upload {
                address: Some(0x1001_0000),
                ..
            }
        ));
    }
}
