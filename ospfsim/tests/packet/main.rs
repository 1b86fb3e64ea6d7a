//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::sync::LazyLock as Lazy;

use bytes::Bytes;
use const_addrs::ip4;
use maplit::btreeset;
use ospfsim::packet::error::DecodeError;
use ospfsim::packet::lsa::*;
use ospfsim::packet::*;
use ospfsim_utils::sim::SimTime;

//
// Helper functions.
//

fn test_encode_packet(bytes_expected: &[u8], packet: &Packet) {
    let bytes_actual = packet.encode();
    assert_eq!(bytes_expected, bytes_actual.as_ref());
}

fn test_decode_packet(bytes: &[u8], packet_expected: &Packet) {
    let mut buf = Bytes::copy_from_slice(bytes);
    let packet_actual = Packet::decode(&mut buf).unwrap();
    assert_eq!(*packet_expected, packet_actual);
}

fn test_encode_lsa(bytes_expected: &[u8], lsa: &Lsa) {
    assert_eq!(bytes_expected, lsa.raw.as_ref());
}

fn test_decode_lsa(bytes: &[u8], lsa_expected: &Lsa) {
    let mut bytes = Bytes::copy_from_slice(bytes);
    let lsa_actual = Lsa::decode(&mut bytes).unwrap();
    assert_eq!(*lsa_expected, lsa_actual);
}

// Builds an LSA the way it looks after being decoded: without a base time.
fn lsa(
    age: u16,
    options: Options,
    lsa_id: Ipv4Addr,
    adv_rtr: Ipv4Addr,
    seq_no: u32,
    body: LsaBody,
) -> Lsa {
    let mut lsa =
        Lsa::new(age, options, lsa_id, adv_rtr, seq_no, body, SimTime::ZERO);
    lsa.base_time = None;
    lsa
}

//
// Test packets.
//

static HELLO1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x01, 0x00, 0x30, 0x02, 0x02, 0x02, 0x02, 0x00, 0x00, 0x00,
            0x01, 0xf6, 0x9e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0xff, 0xff, 0xff, 0x00, 0x00, 0x03, 0x02, 0x01, 0x00,
            0x00, 0x00, 0x24, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x01, 0x01, 0x01, 0x01,
        ],
        Packet::Hello(Hello {
            hdr: PacketHdr::new(
                PacketType::Hello,
                ip4!("2.2.2.2"),
                ip4!("0.0.0.1"),
            ),
            network_mask: ip4!("255.255.255.0"),
            hello_interval: 3,
            options: Options::E,
            priority: 1,
            dead_interval: 36,
            dr: None,
            bdr: None,
            neighbors: btreeset![ip4!("1.1.1.1")],
        }),
    )
});

static DBDESC1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x02, 0x00, 0x48, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00,
            0x01, 0xd8, 0x9e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x05, 0xdc, 0x42, 0x00, 0x4e, 0xb8, 0x8f, 0x2e, 0x00,
            0x03, 0x02, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
            0x80, 0x00, 0x00, 0x02, 0x48, 0xd6, 0x00, 0x30, 0x00, 0x03, 0x02,
            0x05, 0xac, 0x10, 0x01, 0x00, 0x01, 0x01, 0x01, 0x01, 0x80, 0x00,
            0x00, 0x01, 0xfc, 0xff, 0x00, 0x24,
        ],
        Packet::DbDesc(DbDesc {
            hdr: PacketHdr::new(
                PacketType::DbDesc,
                ip4!("1.1.1.1"),
                ip4!("0.0.0.1"),
            ),
            mtu: 1500,
            options: Options::E | Options::O,
            dd_flags: DbDescFlags::empty(),
            dd_seq_no: 1320718126,
            lsa_hdrs: vec![
                LsaHdr {
                    age: 3,
                    options: Options::E,
                    lsa_type: LsaTypeCode::Router.into(),
                    lsa_id: ip4!("1.1.1.1"),
                    adv_rtr: ip4!("1.1.1.1"),
                    seq_no: 0x80000002,
                    cksum: 0x48d6,
                    length: 48,
                },
                LsaHdr {
                    age: 3,
                    options: Options::E,
                    lsa_type: LsaTypeCode::AsExternal.into(),
                    lsa_id: ip4!("172.16.1.0"),
                    adv_rtr: ip4!("1.1.1.1"),
                    seq_no: 0x80000001,
                    cksum: 0xfcff,
                    length: 36,
                },
            ],
        }),
    )
});

static LSREQUEST1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x03, 0x00, 0x30, 0x02, 0x02, 0x02, 0x02, 0x00, 0x00, 0x00,
            0x01, 0x46, 0xab, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x01, 0x01, 0x01, 0x01, 0x01, 0x01,
            0x01, 0x01, 0x01, 0x00, 0x00, 0x00, 0x05, 0xac, 0x10, 0x01, 0x00,
            0x01, 0x01, 0x01, 0x01,
        ],
        Packet::LsRequest(LsRequest {
            hdr: PacketHdr::new(
                PacketType::LsRequest,
                ip4!("2.2.2.2"),
                ip4!("0.0.0.1"),
            ),
            entries: vec![
                LsaKey {
                    lsa_type: LsaTypeCode::Router.into(),
                    adv_rtr: ip4!("1.1.1.1"),
                    lsa_id: ip4!("1.1.1.1"),
                },
                LsaKey {
                    lsa_type: LsaTypeCode::AsExternal.into(),
                    adv_rtr: ip4!("1.1.1.1"),
                    lsa_id: ip4!("172.16.1.0"),
                },
            ],
        }),
    )
});

static LSUPDATE1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x04, 0x00, 0x78, 0x02, 0x02, 0x02, 0x02, 0x00, 0x00, 0x00,
            0x01, 0x40, 0xa1, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x03, 0x00, 0x31, 0x02, 0x01, 0x02,
            0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x80, 0x00, 0x00, 0x02,
            0x37, 0xf4, 0x00, 0x24, 0x01, 0x00, 0x00, 0x01, 0x0a, 0x00, 0x01,
            0x00, 0xff, 0xff, 0xff, 0x00, 0x03, 0x00, 0x00, 0x0a, 0x00, 0x31,
            0x02, 0x03, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x80,
            0x00, 0x00, 0x01, 0xd2, 0x7a, 0x00, 0x1c, 0xff, 0xff, 0xff, 0xff,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x31, 0x02, 0x03, 0x0a, 0x00, 0x02,
            0x00, 0x02, 0x02, 0x02, 0x02, 0x80, 0x00, 0x00, 0x01, 0xfa, 0x44,
            0x00, 0x1c, 0xff, 0xff, 0xff, 0x00, 0x00, 0x00, 0x00, 0x0a,
        ],
        Packet::LsUpdate(LsUpdate {
            hdr: PacketHdr::new(
                PacketType::LsUpdate,
                ip4!("2.2.2.2"),
                ip4!("0.0.0.1"),
            ),
            lsas: vec![
                lsa(
                    49,
                    Options::E,
                    ip4!("2.2.2.2"),
                    ip4!("2.2.2.2"),
                    0x80000002,
                    LsaBody::Router(LsaRouter {
                        flags: LsaRouterFlags::B,
                        links: vec![LsaRouterLink {
                            link_type: LsaRouterLinkType::StubNetwork,
                            link_id: ip4!("10.0.1.0"),
                            link_data: ip4!("255.255.255.0"),
                            metric: 10,
                        }],
                    }),
                ),
                lsa(
                    49,
                    Options::E,
                    ip4!("2.2.2.2"),
                    ip4!("2.2.2.2"),
                    0x80000001,
                    LsaBody::SummaryNetwork(LsaSummary {
                        mask: ip4!("255.255.255.255"),
                        metric: 0,
                    }),
                ),
                lsa(
                    49,
                    Options::E,
                    ip4!("10.0.2.0"),
                    ip4!("2.2.2.2"),
                    0x80000001,
                    LsaBody::SummaryNetwork(LsaSummary {
                        mask: ip4!("255.255.255.0"),
                        metric: 10,
                    }),
                ),
            ],
        }),
    )
});

static LSUPDATE2: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x04, 0x00, 0x64, 0x03, 0x03, 0x03, 0x03, 0x00, 0x00, 0x00,
            0x00, 0xdb, 0xa9, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x00, 0x00, 0x02, 0x00, 0x01, 0x02, 0x02, 0x0a,
            0x00, 0x01, 0x03, 0x03, 0x03, 0x03, 0x03, 0x80, 0x00, 0x00, 0x01,
            0xd0, 0x53, 0x00, 0x24, 0xff, 0xff, 0xff, 0x00, 0x01, 0x01, 0x01,
            0x01, 0x02, 0x02, 0x02, 0x02, 0x03, 0x03, 0x03, 0x03, 0x00, 0x01,
            0x02, 0x05, 0xac, 0x10, 0x01, 0x00, 0x01, 0x01, 0x01, 0x01, 0x80,
            0x00, 0x00, 0x01, 0xfc, 0xff, 0x00, 0x24, 0xff, 0xff, 0xff, 0x00,
            0x80, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00,
        ],
        Packet::LsUpdate(LsUpdate {
            hdr: PacketHdr::new(
                PacketType::LsUpdate,
                ip4!("3.3.3.3"),
                ip4!("0.0.0.0"),
            ),
            lsas: vec![
                LSA_NETWORK1.1.clone(),
                LSA_AS_EXTERNAL1.1.clone(),
            ],
        }),
    )
});

static LSACK1: Lazy<(Vec<u8>, Packet)> = Lazy::new(|| {
    (
        vec![
            0x02, 0x05, 0x00, 0x54, 0x01, 0x01, 0x01, 0x01, 0x00, 0x00, 0x00,
            0x01, 0xa0, 0x2e, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00, 0x01, 0x02, 0x03, 0x03, 0x03, 0x03, 0x03, 0x02,
            0x02, 0x02, 0x02, 0x80, 0x00, 0x00, 0x01, 0x09, 0x36, 0x00, 0x1c,
            0x00, 0x01, 0x02, 0x03, 0x0a, 0x00, 0x03, 0x00, 0x02, 0x02, 0x02,
            0x02, 0x80, 0x00, 0x00, 0x01, 0x54, 0xdf, 0x00, 0x1c, 0x00, 0x01,
            0x02, 0x03, 0x0a, 0x00, 0x04, 0x00, 0x02, 0x02, 0x02, 0x02, 0x80,
            0x00, 0x00, 0x01, 0x49, 0xe9, 0x00, 0x1c,
        ],
        Packet::LsAck(LsAck {
            hdr: PacketHdr::new(
                PacketType::LsAck,
                ip4!("1.1.1.1"),
                ip4!("0.0.0.1"),
            ),
            lsa_hdrs: vec![
                LsaHdr {
                    age: 1,
                    options: Options::E,
                    lsa_type: LsaTypeCode::SummaryNetwork.into(),
                    lsa_id: ip4!("3.3.3.3"),
                    adv_rtr: ip4!("2.2.2.2"),
                    seq_no: 0x80000001,
                    cksum: 0x0936,
                    length: 28,
                },
                LsaHdr {
                    age: 1,
                    options: Options::E,
                    lsa_type: LsaTypeCode::SummaryNetwork.into(),
                    lsa_id: ip4!("10.0.3.0"),
                    adv_rtr: ip4!("2.2.2.2"),
                    seq_no: 0x80000001,
                    cksum: 0x54df,
                    length: 28,
                },
                LsaHdr {
                    age: 1,
                    options: Options::E,
                    lsa_type: LsaTypeCode::SummaryNetwork.into(),
                    lsa_id: ip4!("10.0.4.0"),
                    adv_rtr: ip4!("2.2.2.2"),
                    seq_no: 0x80000001,
                    cksum: 0x49e9,
                    length: 28,
                },
            ],
        }),
    )
});

//
// Test LSAs.
//

static LSA_ROUTER1: Lazy<(Vec<u8>, Lsa)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x31, 0x02, 0x01, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02, 0x02,
            0x02, 0x80, 0x00, 0x00, 0x02, 0x37, 0xf4, 0x00, 0x24, 0x01, 0x00,
            0x00, 0x01, 0x0a, 0x00, 0x01, 0x00, 0xff, 0xff, 0xff, 0x00, 0x03,
            0x00, 0x00, 0x0a,
        ],
        lsa(
            49,
            Options::E,
            ip4!("2.2.2.2"),
            ip4!("2.2.2.2"),
            0x80000002,
            LsaBody::Router(LsaRouter {
                flags: LsaRouterFlags::B,
                links: vec![LsaRouterLink {
                    link_type: LsaRouterLinkType::StubNetwork,
                    link_id: ip4!("10.0.1.0"),
                    link_data: ip4!("255.255.255.0"),
                    metric: 10,
                }],
            }),
        ),
    )
});

static LSA_NETWORK1: Lazy<(Vec<u8>, Lsa)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x01, 0x02, 0x02, 0x0a, 0x00, 0x01, 0x03, 0x03, 0x03, 0x03,
            0x03, 0x80, 0x00, 0x00, 0x01, 0xd0, 0x53, 0x00, 0x24, 0xff, 0xff,
            0xff, 0x00, 0x01, 0x01, 0x01, 0x01, 0x02, 0x02, 0x02, 0x02, 0x03,
            0x03, 0x03, 0x03,
        ],
        lsa(
            1,
            Options::E,
            ip4!("10.0.1.3"),
            ip4!("3.3.3.3"),
            0x80000001,
            LsaBody::Network(LsaNetwork {
                mask: ip4!("255.255.255.0"),
                attached_rtrs: btreeset![
                    ip4!("1.1.1.1"),
                    ip4!("2.2.2.2"),
                    ip4!("3.3.3.3"),
                ],
            }),
        ),
    )
});

static LSA_AS_EXTERNAL1: Lazy<(Vec<u8>, Lsa)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x01, 0x02, 0x05, 0xac, 0x10, 0x01, 0x00, 0x01, 0x01, 0x01,
            0x01, 0x80, 0x00, 0x00, 0x01, 0xfc, 0xff, 0x00, 0x24, 0xff, 0xff,
            0xff, 0x00, 0x80, 0x00, 0x00, 0x14, 0x00, 0x00, 0x00, 0x00, 0x00,
            0x00, 0x00, 0x00,
        ],
        lsa(
            1,
            Options::E,
            ip4!("172.16.1.0"),
            ip4!("1.1.1.1"),
            0x80000001,
            LsaBody::AsExternal(LsaAsExternal {
                mask: ip4!("255.255.255.0"),
                flags: LsaAsExternalFlags::E,
                metric: 20,
                fwd_addr: None,
                tag: 0,
            }),
        ),
    )
});

static LSA_NSSA_EXTERNAL1: Lazy<(Vec<u8>, Lsa)> = Lazy::new(|| {
    (
        vec![
            0x00, 0x01, 0x08, 0x07, 0xac, 0x10, 0x02, 0x00, 0x04, 0x04, 0x04,
            0x04, 0x80, 0x00, 0x00, 0x01, 0xeb, 0xfb, 0x00, 0x24, 0xff, 0xff,
            0xff, 0x00, 0x00, 0x00, 0x00, 0x1e, 0x0a, 0x00, 0x04, 0x04, 0x00,
            0x00, 0x00, 0x64,
        ],
        lsa(
            1,
            Options::NP,
            ip4!("172.16.2.0"),
            ip4!("4.4.4.4"),
            0x80000001,
            LsaBody::NssaExternal(LsaAsExternal {
                mask: ip4!("255.255.255.0"),
                flags: LsaAsExternalFlags::empty(),
                metric: 30,
                fwd_addr: Some(ip4!("10.0.4.4")),
                tag: 100,
            }),
        ),
    )
});

//
// Tests.
//

#[test]
fn test_encode_hello1() {
    let (ref bytes, ref hello) = *HELLO1;
    test_encode_packet(bytes, hello);
}

#[test]
fn test_decode_hello1() {
    let (ref bytes, ref hello) = *HELLO1;
    test_decode_packet(bytes, hello);
}

#[test]
fn test_encode_dbdesc1() {
    let (ref bytes, ref dbdesc) = *DBDESC1;
    test_encode_packet(bytes, dbdesc);
}

#[test]
fn test_decode_dbdesc1() {
    let (ref bytes, ref dbdesc) = *DBDESC1;
    test_decode_packet(bytes, dbdesc);
}

#[test]
fn test_encode_lsrequest1() {
    let (ref bytes, ref request) = *LSREQUEST1;
    test_encode_packet(bytes, request);
}

#[test]
fn test_decode_lsrequest1() {
    let (ref bytes, ref request) = *LSREQUEST1;
    test_decode_packet(bytes, request);
}

#[test]
fn test_encode_lsupdate1() {
    let (ref bytes, ref update) = *LSUPDATE1;
    test_encode_packet(bytes, update);
}

#[test]
fn test_decode_lsupdate1() {
    let (ref bytes, ref update) = *LSUPDATE1;
    test_decode_packet(bytes, update);
}

#[test]
fn test_encode_lsupdate2() {
    let (ref bytes, ref update) = *LSUPDATE2;
    test_encode_packet(bytes, update);
}

#[test]
fn test_decode_lsupdate2() {
    let (ref bytes, ref update) = *LSUPDATE2;
    test_decode_packet(bytes, update);
}

#[test]
fn test_encode_lsack1() {
    let (ref bytes, ref ack) = *LSACK1;
    test_encode_packet(bytes, ack);
}

#[test]
fn test_decode_lsack1() {
    let (ref bytes, ref ack) = *LSACK1;
    test_decode_packet(bytes, ack);
}

#[test]
fn test_encode_lsa_router1() {
    let (ref bytes, ref lsa) = *LSA_ROUTER1;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_lsa_router1() {
    let (ref bytes, ref lsa) = *LSA_ROUTER1;
    test_decode_lsa(bytes, lsa);
}

#[test]
fn test_encode_lsa_network1() {
    let (ref bytes, ref lsa) = *LSA_NETWORK1;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_lsa_network1() {
    let (ref bytes, ref lsa) = *LSA_NETWORK1;
    test_decode_lsa(bytes, lsa);
}

#[test]
fn test_encode_lsa_as_external1() {
    let (ref bytes, ref lsa) = *LSA_AS_EXTERNAL1;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_lsa_as_external1() {
    let (ref bytes, ref lsa) = *LSA_AS_EXTERNAL1;
    test_decode_lsa(bytes, lsa);
}

#[test]
fn test_encode_lsa_nssa_external1() {
    let (ref bytes, ref lsa) = *LSA_NSSA_EXTERNAL1;
    test_encode_lsa(bytes, lsa);
}

#[test]
fn test_decode_lsa_nssa_external1() {
    let (ref bytes, ref lsa) = *LSA_NSSA_EXTERNAL1;
    test_decode_lsa(bytes, lsa);
}

#[test]
fn test_decode_corrupted_packet() {
    let (ref bytes, _) = *HELLO1;
    let mut bytes = bytes.clone();
    bytes[44] ^= 0x01;
    let mut buf = Bytes::from(bytes);
    assert!(matches!(
        Packet::decode(&mut buf),
        Err(DecodeError::InvalidChecksum)
    ));
}

#[test]
fn test_decode_truncated_packet() {
    let (ref bytes, _) = *HELLO1;
    let mut buf = Bytes::copy_from_slice(&bytes[..20]);
    assert!(matches!(
        Packet::decode(&mut buf),
        Err(DecodeError::InvalidLength(_))
    ));
}

#[test]
fn test_decode_invalid_version() {
    let (ref bytes, _) = *HELLO1;
    let mut bytes = bytes.clone();
    bytes[0] = 3;
    bytes[12] = 0xf5;
    let mut buf = Bytes::from(bytes);
    assert!(matches!(
        Packet::decode(&mut buf),
        Err(DecodeError::InvalidVersion(3))
    ));
}

#[test]
fn test_lsa_checksum_detects_change() {
    let (ref bytes, _) = *LSA_NETWORK1;
    let mut bytes = bytes.clone();
    bytes[30] ^= 0x01;
    let mut buf = Bytes::from(bytes);
    let lsa = Lsa::decode(&mut buf).unwrap();
    assert!(lsa.validate().is_err());
}
