// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Framing, checksum and resynchronisation of the packet codec.

use brisk_core::codec::{encode, Decoder, FRAME_OVERHEAD, MAX_FRAME};
use brisk_core::protocol::{Packet, FRAME_CRC, MAX_PAYLOAD};
use brisk_core::ErrorKind;
use proptest::prelude::*;

fn frame(code: u8, payload: &[u8]) -> Vec<u8> {
    let packet = Packet::new(code, payload).unwrap();
    let mut out = [0u8; MAX_FRAME];
    let len = encode(&packet, MAX_PAYLOAD, &mut out).unwrap();
    out[..len].to_vec()
}

/// Whether a valid frame for a 64-byte decoder starts at `at`.
fn frame_at(bytes: &[u8], at: usize) -> bool {
    let len = bytes[at] as usize;
    if len == 0 || len > 65 || at + len + 3 > bytes.len() {
        return false;
    }
    let body = &bytes[at..at + 1 + len];
    let crc = u16::from_le_bytes([bytes[at + 1 + len], bytes[at + 2 + len]]);
    FRAME_CRC.checksum(body) == crc
}

/// Expire stalled bytes the way a port does between reads, collecting packets.
fn drain(decoder: &mut Decoder) -> Vec<Packet> {
    let mut packets = Vec::new();
    while !decoder.is_idle() {
        decoder.expire();
        while let Some(event) = decoder.next_event() {
            if let Ok(packet) = event {
                packets.push(packet);
            }
        }
    }
    packets
}

/// Push all bytes, collecting packets and errors in order.
fn feed(decoder: &mut Decoder, bytes: &[u8]) -> (Vec<Packet>, Vec<ErrorKind>) {
    let mut packets = Vec::new();
    let mut errors = Vec::new();
    for &byte in bytes {
        decoder.push(byte);
        while let Some(event) = decoder.next_event() {
            match event {
                Ok(packet) => packets.push(packet),
                Err(kind) => errors.push(kind),
            }
        }
    }
    (packets, errors)
}

#[test]
fn test_encode_layout() {
    let bytes = frame(0x04, &[0xAA, 0xBB]);

    assert_eq!(bytes.len(), 2 + FRAME_OVERHEAD);
    assert_eq!(&bytes[..4], &[3, 0x04, 0xAA, 0xBB]);
    let crc = FRAME_CRC.checksum(&bytes[..4]);
    assert_eq!(&bytes[4..], &crc.to_le_bytes());
}

#[test]
fn test_frame_crc_is_xmodem() {
    assert_eq!(FRAME_CRC.checksum(b"123456789"), 0x31C3);
}

#[test]
fn test_encode_respects_payload_limit() {
    let packet = Packet::new(0x00, &[0u8; 65]).unwrap();
    let mut out = [0u8; MAX_FRAME];

    assert_eq!(encode(&packet, 64, &mut out), Err(ErrorKind::Framing));
    assert!(encode(&packet, 65, &mut out).is_ok());

    let mut small = [0u8; 8];
    assert_eq!(encode(&packet, MAX_PAYLOAD, &mut small), Err(ErrorKind::Framing));
}

#[test]
fn test_decode_single_frame() {
    let mut decoder = Decoder::new(64);
    let (packets, errors) = feed(&mut decoder, &frame(0x01, &[]));

    assert_eq!(packets, vec![Packet::new(0x01, &[]).unwrap()]);
    assert!(errors.is_empty());
    assert!(decoder.is_idle());
}

#[test]
fn test_decode_back_to_back_frames() {
    let mut bytes = frame(0x01, &[]);
    bytes.extend(frame(0x04, &[1, 2, 3, 4, 5]));
    let mut decoder = Decoder::new(64);

    let (packets, errors) = feed(&mut decoder, &bytes);

    assert_eq!(packets.len(), 2);
    assert_eq!(packets[1].payload.as_slice(), &[1, 2, 3, 4, 5]);
    assert!(errors.is_empty());
}

#[test]
fn test_decode_zero_length_is_framing_error() {
    let mut bytes = vec![0x00];
    bytes.extend(frame(0x02, &[]));
    let mut decoder = Decoder::new(64);

    let (packets, errors) = feed(&mut decoder, &bytes);

    assert_eq!(errors, vec![ErrorKind::Framing]);
    assert_eq!(packets.len(), 1);
}

#[test]
fn test_decode_length_above_limit_is_framing_error() {
    let mut decoder = Decoder::new(8);
    let (packets, errors) = feed(&mut decoder, &[10]);

    assert!(packets.is_empty());
    assert_eq!(errors, vec![ErrorKind::Framing]);
    assert!(decoder.is_idle());
}

#[test]
fn test_decode_bad_crc_resyncs() {
    let mut corrupted = frame(0x04, &[9, 9, 9]);
    let last = corrupted.len() - 1;
    corrupted[last] ^= 0xFF;
    let mut bytes = corrupted;
    bytes.extend(frame(0x01, &[]));

    let mut decoder = Decoder::new(64);
    let (mut packets, errors) = feed(&mut decoder, &bytes);
    assert!(errors.contains(&ErrorKind::Checksum));

    // Leftovers of the bad frame are flushed by inter-byte timeouts.
    while !decoder.is_idle() {
        decoder.expire();
        while let Some(event) = decoder.next_event() {
            if let Ok(packet) = event {
                packets.push(packet);
            }
        }
    }
    assert_eq!(packets, vec![Packet::new(0x01, &[]).unwrap()]);
}

#[test]
fn test_decode_partial_frame_waits() {
    let bytes = frame(0x05, &[1, 2, 3]);
    let mut decoder = Decoder::new(64);

    let (packets, errors) = feed(&mut decoder, &bytes[..4]);
    assert!(packets.is_empty());
    assert!(errors.is_empty());
    assert!(!decoder.is_idle());

    let (packets, _) = feed(&mut decoder, &bytes[4..]);
    assert_eq!(packets.len(), 1);
}

#[test]
fn test_expire_drops_stale_partial_frame() {
    // A stray length byte swallows the start of the next frame.
    let mut bytes = vec![0x05, 0xAA, 0xBB];
    bytes.extend(frame(0x07, &[]));
    let mut decoder = Decoder::new(64);

    let (packets, errors) = feed(&mut decoder, &bytes);
    assert!(packets.is_empty());
    assert!(errors.is_empty());

    assert_eq!(decoder.expire(), Some(ErrorKind::Framing));
    let mut recovered = Vec::new();
    let mut dropped = Vec::new();
    while let Some(event) = decoder.next_event() {
        match event {
            Ok(packet) => recovered.push(packet),
            Err(kind) => dropped.push(kind),
        }
    }

    assert_eq!(recovered, vec![Packet::new(0x07, &[]).unwrap()]);
    assert_eq!(dropped, vec![ErrorKind::Framing, ErrorKind::Framing]);
    assert!(decoder.is_idle());
    assert_eq!(decoder.expire(), None);
}

#[test]
fn test_reset_discards_buffer() {
    let mut decoder = Decoder::new(64);
    feed(&mut decoder, &[0x03, 0x04]);
    decoder.reset();
    assert!(decoder.is_idle());
}

proptest! {
    /// Bytes that can never start a frame, followed by one valid frame,
    /// yield exactly that frame.
    #[test]
    fn test_garbage_then_frame_yields_one_packet(
        garbage in proptest::collection::vec(prop_oneof![Just(0u8), 66u8..=255], 0..64),
        code in any::<u8>(),
        payload in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let mut bytes = garbage.clone();
        bytes.extend(frame(code, &payload));

        let mut decoder = Decoder::new(64);
        let (packets, errors) = feed(&mut decoder, &bytes);

        prop_assert_eq!(packets, vec![Packet::new(code, &payload).unwrap()]);
        prop_assert_eq!(errors.len(), garbage.len());
        prop_assert!(decoder.is_idle());
    }

    /// Arbitrary input never wedges the decoder: after expiring whatever is
    /// left, a valid frame still decodes.
    #[test]
    fn test_decoder_recovers_from_any_input(
        noise in proptest::collection::vec(any::<u8>(), 0..300),
        payload in proptest::collection::vec(any::<u8>(), 0..32),
    ) {
        let mut decoder = Decoder::new(64);
        feed(&mut decoder, &noise);
        while !decoder.is_idle() {
            decoder.expire();
            while decoder.next_event().is_some() {}
        }

        let (packets, _) = feed(&mut decoder, &frame(0x04, &payload));
        prop_assert_eq!(packets, vec![Packet::new(0x04, &payload).unwrap()]);
    }

    /// Any garbage directly followed by a frame yields exactly that frame once
    /// stalled bytes are expired, even when a garbage length byte swallows the
    /// start of the frame.
    #[test]
    fn test_any_garbage_then_frame_recovers_one_packet(
        garbage in proptest::collection::vec(any::<u8>(), 1..64),
        code in any::<u8>(),
        payload in proptest::collection::vec(any::<u8>(), 0..64),
    ) {
        let mut bytes = garbage.clone();
        bytes.extend(frame(code, &payload));
        // A CRC match by chance is a real frame, not garbage.
        prop_assume!(!(0..garbage.len()).any(|at| frame_at(&bytes, at)));

        let mut decoder = Decoder::new(64);
        let (mut packets, _) = feed(&mut decoder, &bytes);
        packets.extend(drain(&mut decoder));

        prop_assert_eq!(packets, vec![Packet::new(code, &payload).unwrap()]);
        prop_assert!(decoder.is_idle());
    }
}
