// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! NVM driver rules: region mapping, whole-block erases, erased-before-program
//! and the reserved signature block.

mod common;

use brisk_core::nvm::{Extended, ExtendedError, SIGNATURE_LEN};
use brisk_core::protocol::IMAGE_CRC;
use brisk_core::{AppSignature, ConfigError, ErrorKind, Flash, NoWatchdog, NvmDriver};
use common::*;

#[test]
fn test_signature_address_must_be_block_aligned_in_region() {
    assert_eq!(
        NvmDriver::new(SimFlash::new(), regions(), SIG_ADDR + 4).err(),
        Some(ConfigError::BadSignatureAddress)
    );
    assert_eq!(
        NvmDriver::new(SimFlash::new(), regions(), 0x7000).err(),
        Some(ConfigError::BadSignatureAddress)
    );
}

#[test]
fn test_block_span_checks() {
    let nvm = nvm();

    let span = nvm.block_span(0x1200, 0x400).unwrap();
    assert_eq!((span.region, span.first, span.count), (0, 1, 2));

    assert_eq!(nvm.block_span(0x1100, 0x200).unwrap_err(), ErrorKind::Alignment);
    assert_eq!(nvm.block_span(0x1200, 0x100).unwrap_err(), ErrorKind::Alignment);
    assert_eq!(nvm.block_span(0x1200, 0).unwrap_err(), ErrorKind::Alignment);
    assert_eq!(nvm.block_span(0x2E00, 0x400).unwrap_err(), ErrorKind::Range);
    assert_eq!(nvm.block_span(0x7000, 0x200).unwrap_err(), ErrorKind::Range);
    assert_eq!(nvm.block_span(SIG_ADDR, BLOCK).unwrap_err(), ErrorKind::Range);
}

#[test]
fn test_program_requires_erase() {
    let mut nvm = nvm();

    assert_eq!(nvm.program(0x1000, &[1, 2, 3]).unwrap_err(), ErrorKind::Range);
    assert!(nvm.flash().programs.is_empty());

    nvm.erase(0, 0).unwrap();
    assert!(nvm.is_erased(0, 0));
    nvm.program(0x1000, &[1, 2, 3]).unwrap();
    assert_eq!(nvm.flash().bytes(0x1000, 3), &[1, 2, 3]);
}

#[test]
fn test_program_across_unerased_block_writes_nothing() {
    let mut nvm = nvm();
    nvm.erase(0, 0).unwrap();

    let data = [0u8; 8];
    assert_eq!(nvm.program(0x11FC, &data).unwrap_err(), ErrorKind::Range);
    assert!(nvm.flash().programs.is_empty());
}

#[test]
fn test_program_outside_regions() {
    let mut nvm = nvm();
    assert_eq!(nvm.program(0x5000, &[0]).unwrap_err(), ErrorKind::Range);
    assert_eq!(nvm.program(0x2FFF, &[0, 0]).unwrap_err(), ErrorKind::Range);
}

#[test]
fn test_forget_erased_requires_new_erase() {
    let mut nvm = nvm();
    nvm.erase(0, 2).unwrap();
    nvm.forget_erased();

    assert!(!nvm.is_erased(0, 2));
    assert_eq!(nvm.program(0x1400, &[0xAA]).unwrap_err(), ErrorKind::Range);
}

#[test]
fn test_erase_fault_leaves_block_unerased() {
    let mut flash = SimFlash::new();
    flash.fail_erase_at = Some(0x1200);
    let mut nvm = NvmDriver::new(flash, regions(), SIG_ADDR).unwrap();

    assert_eq!(nvm.erase(0, 1).unwrap_err(), ErrorKind::NvmFault);
    assert!(!nvm.is_erased(0, 1));
}

#[test]
fn test_erase_rejects_signature_block() {
    let mut nvm = nvm();
    assert_eq!(nvm.erase(1, 0).unwrap_err(), ErrorKind::Range);
    assert_eq!(nvm.erase(0, 16).unwrap_err(), ErrorKind::Range);
    assert_eq!(nvm.erase(7, 0).unwrap_err(), ErrorKind::Range);
}

#[test]
fn test_verify_detects_mismatch() {
    let mut nvm = nvm();
    let data = pattern(100, 3);
    nvm.erase(0, 0).unwrap();
    nvm.program(0x1000, &data).unwrap();

    nvm.verify(0x1000, &data).unwrap();

    nvm.flash_mut().corrupt(0x1000 + 70, 0x00);
    assert_eq!(nvm.verify(0x1000, &data).unwrap_err(), ErrorKind::VerifyMismatch);
}

#[test]
fn test_image_crc_matches_and_services_watchdog() {
    let mut nvm = nvm();
    let data = pattern(0x300, 9);
    nvm.erase(0, 0).unwrap();
    nvm.erase(0, 1).unwrap();
    nvm.program(0x1000, &data).unwrap();

    let mut watchdog = CountingWatchdog::default();
    let crc = nvm.image_crc(0x1000, data.len() as u32, &mut watchdog).unwrap();

    assert_eq!(crc, IMAGE_CRC.checksum(&data));
    assert_eq!(watchdog.services, 3);
}

#[test]
fn test_signature_lifecycle() {
    let mut nvm = nvm();
    assert_eq!(nvm.read_signature(), None);

    let signature = AppSignature {
        start: 0x1000,
        length: 0x180,
        crc32: 0xCAFE_F00D,
    };
    nvm.write_signature(&signature).unwrap();
    assert_eq!(nvm.read_signature(), Some(signature));

    // Rewriting must erase first.
    let newer = AppSignature {
        length: 0x200,
        ..signature
    };
    nvm.write_signature(&newer).unwrap();
    assert_eq!(nvm.read_signature(), Some(newer));

    nvm.invalidate_signature().unwrap();
    assert_eq!(nvm.read_signature(), None);
    assert_eq!(nvm.flash().bytes(SIG_ADDR, SIGNATURE_LEN), &[0xFF; SIGNATURE_LEN]);
}

#[test]
fn test_signature_block_not_programmable() {
    let mut nvm = nvm();
    nvm.invalidate_signature().unwrap();
    assert_eq!(nvm.program(SIG_ADDR, &[0]).unwrap_err(), ErrorKind::Range);
}

#[test]
fn test_app_signature_bytes() {
    let signature = AppSignature {
        start: 0x1001_0000,
        length: 0x4000,
        crc32: 0x1234_5678,
    };
    let bytes = signature.to_bytes();

    assert_eq!(&bytes[0..4], &0xA55A_B015u32.to_le_bytes());
    assert_eq!(AppSignature::from_bytes(&bytes), Some(signature));
    assert_eq!(AppSignature::from_bytes(&[0xFF; SIGNATURE_LEN]), None);
}

#[test]
fn test_extended_routes_by_boundary() {
    let internal = SimFlash::new();
    let mut external = SimFlash::new();
    external.fail_program = true;
    let mut flash = Extended::new(internal, external, 0x2000);

    flash.erase_block(0x1000, 0x200).unwrap();
    flash.program(0x1000, &[0x11]).unwrap();
    assert_eq!(flash.program(0x2000, &[0x22]), Err(ExtendedError::External(())));
    assert_eq!(flash.program(0x1FFF, &[0, 0]), Err(ExtendedError::Straddle));

    let (internal, external) = flash.into_parts();
    assert_eq!(internal.bytes(0x1000, 1), &[0x11]);
    assert!(external.programs.is_empty());
}

#[test]
fn test_read_is_range_checked() {
    let mut nvm = nvm();
    let mut buf = [0u8; 4];
    nvm.read(0x1000, &mut buf).unwrap();
    assert_eq!(buf, [0xFF; 4]);
    assert_eq!(nvm.read(0x2FFE, &mut buf).unwrap_err(), ErrorKind::Range);

    let mut watchdog = NoWatchdog;
    assert_eq!(nvm.image_crc(0x2F00, 0x200, &mut watchdog).unwrap_err(), ErrorKind::Range);
}
