//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

pub mod error;
pub mod lsa;

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use internet_checksum::Checksum;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use ospfsim_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use ospfsim_utils::ip::Ipv4AddrExt;
use serde::{Deserialize, Serialize};

use crate::packet::error::{DecodeError, DecodeResult};
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey, LsaType};

// Options field, shared by Hellos, DD packets and LSA headers (RFC 2328
// appendix A.2, RFC 3101 for the NP bit).
bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct Options: u8 {
        const T = 0x01;
        const E = 0x02;
        const MC = 0x04;
        const NP = 0x08;
        const DC = 0x20;
        const O = 0x40;
    }
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct DbDescFlags: u8 {
        const MS = 0x01;
        const M = 0x02;
        const I = 0x04;
    }
}

// Type field of the common header (RFC 2328 appendix A.3.1).
#[derive(Clone, Copy, Debug, Eq, Hash, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum PacketType {
    Hello = 0x01,
    DbDesc = 0x02,
    LsRequest = 0x03,
    LsUpdate = 0x04,
    LsAck = 0x05,
}

// Only the null authentication type is accepted on input.
const AUTH_TYPE_NULL: u16 = 0;

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum Packet {
    Hello(Hello),
    DbDesc(DbDesc),
    LsRequest(LsRequest),
    LsUpdate(LsUpdate),
    LsAck(LsAck),
}

// Common 24-byte header (RFC 2328, appendix A.3.1):
//
//   version (1) | type (1) | packet length (2)
//   router ID (4)
//   area ID (4)
//   checksum (2) | auth type (2)
//   authentication (8)
//
// The length and checksum fields are computed on output.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PacketHdr {
    pub pkt_type: PacketType,
    pub router_id: Ipv4Addr,
    pub area_id: Ipv4Addr,
}

// Hello body (appendix A.3.2):
//
//   network mask (4)
//   hello interval (2) | options (1) | router priority (1)
//   router dead interval (4)
//   DR (4)
//   BDR (4)
//   one router ID per neighbor seen on the link (4 each)
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Hello {
    pub hdr: PacketHdr,
    pub network_mask: Ipv4Addr,
    pub hello_interval: u16,
    pub options: Options,
    pub priority: u8,
    pub dead_interval: u32,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub neighbors: BTreeSet<Ipv4Addr>,
}

// Database Description body (appendix A.3.3):
//
//   interface MTU (2) | options (1) | flags I/M/MS (1)
//   DD sequence number (4)
//   LSA headers (20 each)
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct DbDesc {
    pub hdr: PacketHdr,
    pub mtu: u16,
    pub options: Options,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
    pub lsa_hdrs: Vec<LsaHdr>,
}

// Link State Request body (appendix A.3.4): a list of
// (LS type (4), link state ID (4), advertising router (4)) entries.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsRequest {
    pub hdr: PacketHdr,
    pub entries: Vec<LsaKey>,
}

// Link State Update body (appendix A.3.5): LSA count (4) followed by the
// LSAs themselves.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsUpdate {
    pub hdr: PacketHdr,
    pub lsas: Vec<Lsa>,
}

// Link State Acknowledgment body (appendix A.3.6): LSA headers only.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsAck {
    pub hdr: PacketHdr,
    pub lsa_hdrs: Vec<LsaHdr>,
}

// Per-type packet body coding. The common header is handled separately.
trait PacketBody: Sized {
    // Shortest valid body.
    const MIN_LENGTH: u16;

    fn hdr(&self) -> &PacketHdr;

    fn decode_body(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self>;

    fn encode_body(&self, buf: &mut BytesMut);

    fn decode(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < Self::MIN_LENGTH as usize {
            return Err(DecodeError::InvalidLength(buf.len() as u16));
        }
        Self::decode_body(hdr, buf)
    }

    // Writes header and body into the thread-local scratch buffer, then
    // fills in the length and checksum fields.
    fn encode(&self) -> Bytes {
        TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();
            self.hdr().encode(&mut buf);
            self.encode_body(&mut buf);

            let pkt_len = buf.len() as u16;
            buf[PacketHdr::LENGTH_RANGE]
                .copy_from_slice(&pkt_len.to_be_bytes());
            let mut cksum = Checksum::new();
            cksum.add_bytes(&buf[..]);
            buf[PacketHdr::CKSUM_RANGE].copy_from_slice(&cksum.checksum());

            buf.clone().freeze()
        })
    }
}

// ===== impl Packet =====

impl Packet {
    // Decodes a packet, ignoring any trailing bytes past the length field.
    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < PacketHdr::LENGTH as usize {
            return Err(DecodeError::InvalidLength(buf.len() as u16));
        }
        let pkt_len = u16::from_be_bytes([buf[2], buf[3]]);
        if pkt_len < PacketHdr::LENGTH || pkt_len as usize > buf.len() {
            return Err(DecodeError::InvalidLength(pkt_len));
        }
        PacketHdr::verify_cksum(&buf[..pkt_len as usize])?;

        let hdr = PacketHdr::decode(buf)?;
        let mut body = buf.split_to((pkt_len - PacketHdr::LENGTH) as usize);
        let packet = match hdr.pkt_type {
            PacketType::Hello => Packet::Hello(Hello::decode(hdr, &mut body)?),
            PacketType::DbDesc => {
                Packet::DbDesc(DbDesc::decode(hdr, &mut body)?)
            }
            PacketType::LsRequest => {
                Packet::LsRequest(LsRequest::decode(hdr, &mut body)?)
            }
            PacketType::LsUpdate => {
                Packet::LsUpdate(LsUpdate::decode(hdr, &mut body)?)
            }
            PacketType::LsAck => Packet::LsAck(LsAck::decode(hdr, &mut body)?),
        };

        Ok(packet)
    }

    pub fn encode(&self) -> Bytes {
        match self {
            Packet::Hello(pkt) => pkt.encode(),
            Packet::DbDesc(pkt) => pkt.encode(),
            Packet::LsRequest(pkt) => pkt.encode(),
            Packet::LsUpdate(pkt) => pkt.encode(),
            Packet::LsAck(pkt) => pkt.encode(),
        }
    }

    pub fn hdr(&self) -> &PacketHdr {
        match self {
            Packet::Hello(pkt) => &pkt.hdr,
            Packet::DbDesc(pkt) => &pkt.hdr,
            Packet::LsRequest(pkt) => &pkt.hdr,
            Packet::LsUpdate(pkt) => &pkt.hdr,
            Packet::LsAck(pkt) => &pkt.hdr,
        }
    }
}

// ===== impl PacketHdr =====

impl PacketHdr {
    pub const VERSION: u8 = 2;
    pub const LENGTH: u16 = 24;
    const LENGTH_RANGE: std::ops::Range<usize> = 2..4;
    const CKSUM_RANGE: std::ops::Range<usize> = 12..14;
    const AUTH_RANGE: std::ops::Range<usize> = 16..24;

    pub fn new(
        pkt_type: PacketType,
        router_id: Ipv4Addr,
        area_id: Ipv4Addr,
    ) -> Self {
        PacketHdr {
            pkt_type,
            router_id,
            area_id,
        }
    }

    // Consumes the header. The length and checksum were checked by the
    // caller.
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        let version = buf.get_u8();
        if version != Self::VERSION {
            return Err(DecodeError::InvalidVersion(version));
        }
        let pkt_type = buf.get_u8();
        let pkt_type = PacketType::from_u8(pkt_type)
            .ok_or(DecodeError::UnknownPacketType(pkt_type))?;
        let _pkt_len = buf.get_u16();
        let router_id = buf.get_ipv4();
        if !router_id.is_usable() {
            return Err(DecodeError::InvalidRouterId(router_id));
        }
        let area_id = buf.get_ipv4();
        let _cksum = buf.get_u16();
        let au_type = buf.get_u16();
        if au_type != AUTH_TYPE_NULL {
            return Err(DecodeError::UnsupportedAuthType(au_type));
        }
        buf.advance(Self::AUTH_RANGE.len());

        Ok(PacketHdr::new(pkt_type, router_id, area_id))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(Self::VERSION);
        buf.put_u8(self.pkt_type as u8);
        buf.put_u16(0);
        buf.put_ipv4(&self.router_id);
        buf.put_ipv4(&self.area_id);
        buf.put_u16(0);
        buf.put_u16(AUTH_TYPE_NULL);
        buf.put_bytes(0, Self::AUTH_RANGE.len());
    }

    // The checksum covers the whole packet except the authentication field.
    fn verify_cksum(data: &[u8]) -> DecodeResult<()> {
        let mut cksum = Checksum::new();
        cksum.add_bytes(&data[..Self::AUTH_RANGE.start]);
        cksum.add_bytes(&data[Self::AUTH_RANGE.end..]);
        match cksum.checksum() {
            [0, 0] => Ok(()),
            _ => Err(DecodeError::InvalidChecksum),
        }
    }
}

// ===== impl Hello =====

impl PacketBody for Hello {
    const MIN_LENGTH: u16 = 20;

    fn hdr(&self) -> &PacketHdr {
        &self.hdr
    }

    fn decode_body(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let network_mask = buf.get_ipv4();
        let hello_interval = buf.get_u16();
        let options = Options::from_bits_truncate(buf.get_u8());
        let priority = buf.get_u8();
        let dead_interval = buf.get_u32();
        let dr = buf.get_opt_ipv4();
        let bdr = buf.get_opt_ipv4();
        let neighbors = std::iter::from_fn(|| {
            (buf.remaining() >= 4).then(|| buf.get_ipv4())
        })
        .collect();

        Ok(Hello {
            hdr,
            network_mask,
            hello_interval,
            options,
            priority,
            dead_interval,
            dr,
            bdr,
            neighbors,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.network_mask);
        buf.put_u16(self.hello_interval);
        buf.put_u8(self.options.bits());
        buf.put_u8(self.priority);
        buf.put_u32(self.dead_interval);
        buf.put_opt_ipv4(&self.dr);
        buf.put_opt_ipv4(&self.bdr);
        for nbr in &self.neighbors {
            buf.put_ipv4(nbr);
        }
    }
}

// ===== impl DbDesc =====

impl DbDesc {
    pub const BASE_LENGTH: u16 = 8;
}

impl PacketBody for DbDesc {
    const MIN_LENGTH: u16 = Self::BASE_LENGTH;

    fn hdr(&self) -> &PacketHdr {
        &self.hdr
    }

    fn decode_body(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let mtu = buf.get_u16();
        let options = Options::from_bits_truncate(buf.get_u8());
        let dd_flags = DbDescFlags::from_bits_truncate(buf.get_u8());
        let dd_seq_no = buf.get_u32();
        let lsa_hdrs = decode_lsa_hdrs(buf)?;

        Ok(DbDesc {
            hdr,
            mtu,
            options,
            dd_flags,
            dd_seq_no,
            lsa_hdrs,
        })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u16(self.mtu);
        buf.put_u8(self.options.bits());
        buf.put_u8(self.dd_flags.bits());
        buf.put_u32(self.dd_seq_no);
        for lsa_hdr in &self.lsa_hdrs {
            lsa_hdr.encode(buf);
        }
    }
}

// ===== impl LsRequest =====

impl LsRequest {
    pub const ENTRY_LENGTH: u16 = 12;
}

impl PacketBody for LsRequest {
    const MIN_LENGTH: u16 = 0;

    fn hdr(&self) -> &PacketHdr {
        &self.hdr
    }

    fn decode_body(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let count = buf.remaining() / Self::ENTRY_LENGTH as usize;
        let entries = (0..count)
            .map(|_| {
                // The LS type is carried in a 32-bit field.
                let lsa_type = LsaType(buf.get_u32() as u8);
                let lsa_id = buf.get_ipv4();
                let adv_rtr = buf.get_ipv4();
                LsaKey::new(lsa_type, adv_rtr, lsa_id)
            })
            .collect();

        Ok(LsRequest { hdr, entries })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        for entry in &self.entries {
            buf.put_u32(entry.lsa_type.0.into());
            buf.put_ipv4(&entry.lsa_id);
            buf.put_ipv4(&entry.adv_rtr);
        }
    }
}

// ===== impl LsUpdate =====

impl LsUpdate {
    pub const BASE_LENGTH: u16 = 4;
}

impl PacketBody for LsUpdate {
    const MIN_LENGTH: u16 = Self::BASE_LENGTH;

    fn hdr(&self) -> &PacketHdr {
        &self.hdr
    }

    fn decode_body(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let count = buf.get_u32();
        let lsas = (0..count)
            .map(|_| Lsa::decode(buf))
            .collect::<DecodeResult<_>>()?;

        Ok(LsUpdate { hdr, lsas })
    }

    // LSAs are copied verbatim from their original encoding.
    fn encode_body(&self, buf: &mut BytesMut) {
        buf.put_u32(self.lsas.len() as u32);
        for lsa in &self.lsas {
            buf.put_slice(&lsa.raw);
        }
    }
}

// ===== impl LsAck =====

impl PacketBody for LsAck {
    const MIN_LENGTH: u16 = 0;

    fn hdr(&self) -> &PacketHdr {
        &self.hdr
    }

    fn decode_body(hdr: PacketHdr, buf: &mut Bytes) -> DecodeResult<Self> {
        let lsa_hdrs = decode_lsa_hdrs(buf)?;
        Ok(LsAck { hdr, lsa_hdrs })
    }

    fn encode_body(&self, buf: &mut BytesMut) {
        for lsa_hdr in &self.lsa_hdrs {
            lsa_hdr.encode(buf);
        }
    }
}

// ===== helper functions =====

// Decodes as many complete LSA headers as the buffer holds.
fn decode_lsa_hdrs(buf: &mut Bytes) -> DecodeResult<Vec<LsaHdr>> {
    let count = buf.remaining() / LsaHdr::LENGTH as usize;
    (0..count).map(|_| LsaHdr::decode(buf)).collect()
}
