// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! Request parsing, byte order and reply bodies.

use brisk_core::protocol::{
    decode_body, encode_body, pack_semver, parse_semver, unpack_semver, DeviceInfo, Opcode, Payload,
};
use brisk_core::{ByteOrder, Command, ErrorKind, MemoryRegion, Packet, ProcessorState, Response, Status};

#[test]
fn test_parse_erase_little_endian() {
    let packet = Packet::new(0x03, &[0x00, 0x10, 0x00, 0x00, 0x00, 0x02, 0x00, 0x00]).unwrap();
    let command = Command::from_packet(&packet, ByteOrder::Little).unwrap();

    assert_eq!(
        command,
        Command::Erase {
            address: 0x1000,
            length: 0x200
        }
    );
}

#[test]
fn test_parse_erase_big_endian() {
    let packet = Packet::new(0x03, &[0x00, 0x00, 0x10, 0x00, 0x00, 0x00, 0x02, 0x00]).unwrap();
    let command = Command::from_packet(&packet, ByteOrder::Big).unwrap();

    assert_eq!(
        command,
        Command::Erase {
            address: 0x1000,
            length: 0x200
        }
    );
}

#[test]
fn test_command_packet_roundtrip_per_order() {
    let command = Command::ProgramChunk {
        address: 0x1234_5678,
        data: Payload::from_slice(&[1, 2, 3]).unwrap(),
    };

    for order in [ByteOrder::Little, ByteOrder::Big] {
        let packet = command.to_packet(order).unwrap();
        assert_eq!(packet.code, Opcode::ProgramChunk as u8);
        assert_eq!(Command::from_packet(&packet, order).unwrap(), command);
    }
}

#[test]
fn test_parse_rejects_malformed_payloads() {
    let cases: &[(u8, &[u8])] = &[
        (0x03, &[0, 0, 0, 0]),            // erase without length
        (0x04, &[0, 0x10, 0, 0]),         // program without data
        (0x06, &[1, 2, 3, 4, 5]),         // finalize with a trailing byte
        (0x01, &[0]),                     // get-info with a payload
        (0x09, &[]),                      // region-info without index
        (0x42, &[]),                      // unknown code
    ];

    for (code, payload) in cases {
        let packet = Packet::new(*code, payload).unwrap();
        assert_eq!(
            Command::from_packet(&packet, ByteOrder::Little),
            Err(ErrorKind::Framing),
            "code 0x{:02x}",
            code
        );
    }
}

#[test]
fn test_status_codes() {
    assert_eq!(Status::Ok.code(), 0);
    assert_eq!(Status::Error(ErrorKind::SessionBusy).code(), 0x07);
    assert_eq!(Status::from_code(0x0B), Some(Status::Error(ErrorKind::TransportFault)));
    assert_eq!(Status::from_code(0x0C), None);

    for code in 0x01..=0x0B {
        let kind = ErrorKind::from_code(code).unwrap();
        assert_eq!(kind.code(), code);
    }
}

#[test]
fn test_response_packet_roundtrip() {
    let response = Response::ok_with(Payload::from_slice(&[7, 8]).unwrap());
    let packet = response.to_packet();

    assert_eq!(packet.code, 0);
    assert_eq!(Response::from_packet(&packet).unwrap(), response);
    assert_eq!(
        Response::from_packet(&Packet::new(0xEE, &[]).unwrap()),
        Err(ErrorKind::Framing)
    );
}

#[test]
fn test_device_info_body() {
    let info = DeviceInfo {
        protocol_version: 1,
        loader_version: pack_semver(0, 1, 0),
        max_rx_payload: 64,
        max_tx_payload: 64,
        region_count: 2,
        byte_order: ByteOrder::Little,
        state: ProcessorState::Idle,
    };

    let body = encode_body(&info).unwrap();
    assert_eq!(decode_body::<DeviceInfo>(&body).unwrap(), info);
}

#[test]
fn test_region_body() {
    let region = MemoryRegion::new(0x1001_0000, 0x1E_F000, 0x1000);
    let body = encode_body(&region).unwrap();
    assert_eq!(decode_body::<MemoryRegion>(&body).unwrap(), region);
}

#[test]
fn test_semver_helpers() {
    assert_eq!(parse_semver("1.2.3"), Some(pack_semver(1, 2, 3)));
    assert_eq!(parse_semver("0.4.1-rc.1"), Some(pack_semver(0, 4, 1)));
    assert_eq!(parse_semver("1.2"), None);
    assert_eq!(parse_semver("1.2.3.4"), None);
    assert_eq!(parse_semver("1.x.3"), None);
    assert_eq!(unpack_semver(pack_semver(3, 2, 1)), (3, 2, 1));
}
