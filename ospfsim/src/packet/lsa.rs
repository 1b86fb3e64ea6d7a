//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeSet;
use std::iter;
use std::net::Ipv4Addr;
use std::ops::Range;

use bitflags::bitflags;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use derive_new::new;
use enum_as_inner::EnumAsInner;
use num_derive::FromPrimitive;
use num_traits::FromPrimitive;
use ospfsim_utils::bytes::{BytesExt, BytesMutExt, TLS_BUF};
use ospfsim_utils::sim::SimTime;
use serde::{Deserialize, Serialize};

use crate::lsdb::{LSA_DO_NOT_AGE, LSA_MAX_AGE, LSA_RESERVED_SEQ_NO};
use crate::packet::Options;
use crate::packet::error::{DecodeError, DecodeResult, LsaValidationError};

// A complete LSA along with its wire encoding.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Lsa {
    // Encoded LSA, age field included.
    pub raw: Bytes,
    pub hdr: LsaHdr,
    pub body: LsaBody,
    // Simulated time at which `hdr.age` was last accurate. Unset for LSAs
    // that were decoded but not yet installed.
    #[serde(skip)]
    pub base_time: Option<SimTime>,
}

// Identifies an LSA instance-independently.
//
// Field order defines the LSDB ordering, which per-type range scans rely
// on.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaKey {
    pub lsa_type: LsaType,
    pub adv_rtr: Ipv4Addr,
    pub lsa_id: Ipv4Addr,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaScope {
    Link,
    Area,
    As,
    Unknown,
}

// Raw LS type octet. Unknown values are kept so that they can be reported.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct LsaType(pub u8);

// LS types defined by the IANA "OSPFv2 Link State (LS) Type" registry.
#[derive(Clone, Copy, Debug, Eq, Ord, FromPrimitive, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum LsaTypeCode {
    Router = 1,
    Network = 2,
    SummaryNetwork = 3,
    SummaryRouter = 4,
    AsExternal = 5,
    GroupMembership = 6,
    NssaExternal = 7,
    OpaqueLink = 9,
    OpaqueArea = 10,
    OpaqueAs = 11,
}

#[derive(Clone, Debug, EnumAsInner, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaBody {
    Router(LsaRouter),
    Network(LsaNetwork),
    SummaryNetwork(LsaSummary),
    SummaryRouter(LsaSummary),
    AsExternal(LsaAsExternal),
    GroupMembership(LsaOpaque),
    NssaExternal(LsaAsExternal),
    OpaqueLink(LsaOpaque),
    OpaqueArea(LsaOpaque),
    OpaqueAs(LsaOpaque),
    Unknown(LsaUnknown),
}

// LSA header (RFC 2328, appendix A.4.1), 20 octets:
//
//   age:16 options:8 type:8 | link-state-id:32 | adv-router:32 |
//   seq-no:32 | checksum:16 length:16
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaHdr {
    // Includes the DoNotAge bit.
    pub age: u16,
    pub options: Options,
    pub lsa_type: LsaType,
    pub lsa_id: Ipv4Addr,
    pub adv_rtr: Ipv4Addr,
    pub seq_no: u32,
    pub cksum: u16,
    pub length: u16,
}

// Router-LSA body (appendix A.4.2):
//
//   flags:8 (V E B) 0:8 link-count:16, then per link:
//   link-id:32 | link-data:32 | type:8 tos-count:8 metric:16 | tos...
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouter {
    pub flags: LsaRouterFlags,
    pub links: Vec<LsaRouterLink>,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaRouterFlags: u8 {
        const B = 0x01;
        const E = 0x02;
        const V = 0x04;
        const NT = 0x10;
    }
}

#[derive(Clone, Copy, Debug, Eq, FromPrimitive, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaRouterLinkType {
    PointToPoint = 0x01,
    TransitNetwork = 0x02,
    StubNetwork = 0x03,
    VirtualLink = 0x04,
}

#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaRouterLink {
    pub link_type: LsaRouterLinkType,
    pub link_id: Ipv4Addr,
    pub link_data: Ipv4Addr,
    pub metric: u16,
}

// Network-LSA body (appendix A.4.3):
//
//   mask:32 | attached-router:32 ...
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaNetwork {
    pub mask: Ipv4Addr,
    pub attached_rtrs: BTreeSet<Ipv4Addr>,
}

// Summary-LSA body, types 3 and 4 (appendix A.4.4):
//
//   mask:32 | 0:8 metric:24 | tos...
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaSummary {
    pub mask: Ipv4Addr,
    pub metric: u32,
}

// AS-external-LSA body, shared by NSSA-LSAs (appendix A.4.5):
//
//   mask:32 | E:1 0:7 metric:24 | fwd-addr:32 | route-tag:32 | tos...
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaAsExternal {
    pub mask: Ipv4Addr,
    pub flags: LsaAsExternalFlags,
    pub metric: u32,
    pub fwd_addr: Option<Ipv4Addr>,
    pub tag: u32,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    #[serde(transparent)]
    pub struct LsaAsExternalFlags: u8 {
        const E = 0x80;
    }
}

// Body kept as opaque bytes: stored and flooded, never interpreted.
// Used for Group-Membership and Opaque LSAs.
#[derive(Clone, Debug, Eq, PartialEq, new)]
#[derive(Deserialize, Serialize)]
pub struct LsaOpaque {
    pub data: Bytes,
}

#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct LsaUnknown {}

// Wire coding shared by the typed LSA bodies.
trait LsaBodyCodec: Sized {
    // Shortest valid body.
    const MIN_LENGTH: u16;

    fn decode_fields(buf: &mut Bytes) -> DecodeResult<Self>;

    fn encode(&self, buf: &mut BytesMut);

    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < Self::MIN_LENGTH as usize {
            return Err(DecodeError::InvalidLsaLength);
        }
        Self::decode_fields(buf)
    }
}

// ===== impl Lsa =====

impl Lsa {
    pub fn new(
        age: u16,
        options: Options,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        seq_no: u32,
        body: LsaBody,
        now: SimTime,
    ) -> Self {
        let lsa_type = body.lsa_type();
        let mut lsa = Lsa {
            raw: Bytes::new(),
            hdr: LsaHdr::new(age, options, lsa_type, lsa_id, adv_rtr, seq_no),
            body,
            base_time: Some(now),
        };
        lsa.encode();
        lsa
    }

    // Current age, derived from the stored age and the time elapsed since
    // `base_time`. DoNotAge LSAs keep their stored age.
    pub(crate) fn age(&self, now: SimTime) -> u16 {
        let Some(base_time) = self.base_time else {
            return self.hdr.age;
        };
        if self.hdr.do_not_age() {
            return self.hdr.age;
        }
        let elapsed = now.saturating_duration_since(base_time).as_secs();
        let elapsed = u16::try_from(elapsed).unwrap_or(u16::MAX);
        self.hdr.age.saturating_add(elapsed).min(LSA_MAX_AGE)
    }

    // Header with the age field brought up to date.
    pub(crate) fn hdr_at(&self, now: SimTime) -> LsaHdr {
        LsaHdr {
            age: self.age(now),
            ..self.hdr
        }
    }

    pub(crate) fn is_maxage(&self, now: SimTime) -> bool {
        self.age(now) & !LSA_DO_NOT_AGE == LSA_MAX_AGE
    }

    // Rewrites the age in both the header and the encoded form, and
    // restarts aging from `now`.
    pub(crate) fn set_age(&mut self, age: u16, now: SimTime) {
        let mut raw = BytesMut::from(&self.raw[..]);
        raw[LsaHdr::AGE_RANGE].copy_from_slice(&age.to_be_bytes());
        self.raw = raw.freeze();
        self.hdr.age = age;
        self.base_time = Some(now);
    }

    pub(crate) fn set_maxage(&mut self, now: SimTime) {
        self.set_age(LSA_MAX_AGE, now);
    }

    // Decodes a single LSA, consuming exactly its length from `buf`.
    //
    // Aging starts only once the LSA is installed, so `base_time` stays
    // unset here.
    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < LsaHdr::LENGTH as usize {
            return Err(DecodeError::InvalidLength(buf.len() as u16));
        }
        let lsa_len = u16::from_be_bytes([buf[18], buf[19]]);
        if lsa_len < LsaHdr::LENGTH || lsa_len as usize > buf.remaining() {
            return Err(DecodeError::InvalidLsaLength);
        }

        let raw = buf.split_to(lsa_len as usize);
        let mut fields = raw.clone();
        let hdr = LsaHdr::decode(&mut fields)?;
        let body = LsaBody::decode(hdr.lsa_type, &mut fields)?;

        Ok(Lsa {
            raw,
            hdr,
            body,
            base_time: None,
        })
    }

    // Regenerates `raw` from the header and body, updating the header's
    // length and checksum along the way.
    pub(crate) fn encode(&mut self) {
        self.raw = TLS_BUF.with(|buf| {
            let mut buf = buf.borrow_mut();
            buf.clear();
            self.hdr.encode(&mut buf);
            self.body.encode(&mut buf);

            let lsa_len = buf.len() as u16;
            buf[LsaHdr::LENGTH_RANGE].copy_from_slice(&lsa_len.to_be_bytes());
            buf[LsaHdr::CKSUM_RANGE].fill(0);
            let cksum = Self::checksum(&buf[LsaHdr::AGE_RANGE.end..]);
            buf[LsaHdr::CKSUM_RANGE].copy_from_slice(&cksum);

            self.hdr.length = lsa_len;
            self.hdr.cksum = u16::from_be_bytes(cksum);
            buf.clone().freeze()
        });
    }

    // Checks the header fields and the body against RFC 2328, section 13
    // (steps 1 to 3).
    pub fn validate(&self) -> Result<(), LsaValidationError> {
        if self.hdr.age() > LSA_MAX_AGE {
            return Err(LsaValidationError::InvalidLsaAge);
        }
        if self.hdr.seq_no == LSA_RESERVED_SEQ_NO {
            return Err(LsaValidationError::InvalidLsaSeqNo);
        }
        if !self.is_checksum_valid() {
            return Err(LsaValidationError::InvalidChecksum);
        }
        self.body.validate(&self.hdr)
    }

    // Fletcher checkbytes (ISO 8473, annex C) for `data`, which starts at
    // the options field and has the checksum field zeroed.
    fn checksum(data: &[u8]) -> [u8; 2] {
        // 1-based position of the checksum field's first octet in `data`.
        const CKSUM_POS: i32 = 15;

        let sum = fletcher::calc_fletcher16(data);
        let c0 = i32::from(sum as u8);
        let c1 = i32::from((sum >> 8) as u8);

        let tail = data.len() as i32 - CKSUM_POS;
        let mut x = (tail * c0 - c1).rem_euclid(255);
        if x == 0 {
            x = 255;
        }
        let mut y = 510 - c0 - x;
        if y > 255 {
            y -= 255;
        }
        [x as u8, y as u8]
    }

    // A correct checksum makes the Fletcher sum over everything past the
    // age field come out as zero.
    fn is_checksum_valid(&self) -> bool {
        self.raw
            .get(LsaHdr::AGE_RANGE.end..self.hdr.length as usize)
            .is_some_and(|data| fletcher::calc_fletcher16(data) == 0)
    }
}

// ===== impl LsaType =====

impl LsaType {
    pub fn type_code(&self) -> Option<LsaTypeCode> {
        LsaTypeCode::from_u8(self.0)
    }

    pub fn scope(&self) -> LsaScope {
        use LsaTypeCode as Code;

        let Some(code) = self.type_code() else {
            return LsaScope::Unknown;
        };
        match code {
            Code::OpaqueLink => LsaScope::Link,
            Code::AsExternal | Code::OpaqueAs => LsaScope::As,
            _ => LsaScope::Area,
        }
    }

    pub(crate) fn is_opaque(&self) -> bool {
        use LsaTypeCode as Code;

        matches!(
            self.type_code(),
            Some(Code::OpaqueLink | Code::OpaqueArea | Code::OpaqueAs)
        )
    }
}

impl std::fmt::Display for LsaType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<LsaTypeCode> for LsaType {
    fn from(code: LsaTypeCode) -> LsaType {
        LsaType(code as u8)
    }
}

// ===== impl LsaKey =====

impl std::fmt::Display for LsaKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let LsaKey {
            lsa_type,
            adv_rtr,
            lsa_id,
        } = self;
        write!(f, "type {lsa_type} id {lsa_id} adv-rtr {adv_rtr}")
    }
}

// ===== impl LsaHdr =====

impl LsaHdr {
    pub const LENGTH: u16 = 20;
    const AGE_RANGE: Range<usize> = 0..2;
    const CKSUM_RANGE: Range<usize> = 16..18;
    const LENGTH_RANGE: Range<usize> = 18..20;

    // Builds a header whose checksum and length are filled in on encoding.
    pub fn new(
        age: u16,
        options: Options,
        lsa_type: LsaType,
        lsa_id: Ipv4Addr,
        adv_rtr: Ipv4Addr,
        seq_no: u32,
    ) -> Self {
        LsaHdr {
            age,
            options,
            lsa_type,
            lsa_id,
            adv_rtr,
            seq_no,
            cksum: 0,
            length: 0,
        }
    }

    pub fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < Self::LENGTH as usize {
            return Err(DecodeError::InvalidLength(buf.len() as u16));
        }

        Ok(LsaHdr {
            age: buf.get_u16(),
            options: Options::from_bits_truncate(buf.get_u8()),
            lsa_type: LsaType(buf.get_u8()),
            lsa_id: buf.get_ipv4(),
            adv_rtr: buf.get_ipv4(),
            seq_no: buf.get_u32(),
            cksum: buf.get_u16(),
            length: buf.get_u16(),
        })
    }

    pub fn encode(&self, buf: &mut BytesMut) {
        buf.put_u16(self.age);
        buf.put_u8(self.options.bits());
        buf.put_u8(self.lsa_type.0);
        buf.put_ipv4(&self.lsa_id);
        buf.put_ipv4(&self.adv_rtr);
        buf.put_u32(self.seq_no);
        buf.put_u16(self.cksum);
        buf.put_u16(self.length);
    }

    // Age in seconds, without the DoNotAge bit.
    pub fn age(&self) -> u16 {
        self.age & !LSA_DO_NOT_AGE
    }

    pub fn do_not_age(&self) -> bool {
        self.age & LSA_DO_NOT_AGE != 0
    }

    pub fn is_maxage(&self) -> bool {
        self.age() == LSA_MAX_AGE
    }

    pub fn key(&self) -> LsaKey {
        LsaKey::new(self.lsa_type, self.adv_rtr, self.lsa_id)
    }
}

// ===== impl LsaBody =====

impl LsaBody {
    fn decode(lsa_type: LsaType, buf: &mut Bytes) -> DecodeResult<Self> {
        use LsaTypeCode as Code;

        let Some(code) = lsa_type.type_code() else {
            return Ok(Self::Unknown(LsaUnknown {}));
        };
        let body = match code {
            Code::Router => Self::Router(LsaRouter::decode(buf)?),
            Code::Network => Self::Network(LsaNetwork::decode(buf)?),
            Code::SummaryNetwork => {
                Self::SummaryNetwork(LsaSummary::decode(buf)?)
            }
            Code::SummaryRouter => {
                Self::SummaryRouter(LsaSummary::decode(buf)?)
            }
            Code::AsExternal => Self::AsExternal(LsaAsExternal::decode(buf)?),
            Code::NssaExternal => {
                Self::NssaExternal(LsaAsExternal::decode(buf)?)
            }
            Code::GroupMembership => {
                Self::GroupMembership(LsaOpaque::decode(buf)?)
            }
            Code::OpaqueLink => Self::OpaqueLink(LsaOpaque::decode(buf)?),
            Code::OpaqueArea => Self::OpaqueArea(LsaOpaque::decode(buf)?),
            Code::OpaqueAs => Self::OpaqueAs(LsaOpaque::decode(buf)?),
        };
        Ok(body)
    }

    // Unknown bodies are only ever relayed in their received encoding.
    fn encode(&self, buf: &mut BytesMut) {
        match self {
            Self::Router(body) => body.encode(buf),
            Self::Network(body) => body.encode(buf),
            Self::SummaryNetwork(body) | Self::SummaryRouter(body) => {
                body.encode(buf)
            }
            Self::AsExternal(body) | Self::NssaExternal(body) => {
                body.encode(buf)
            }
            Self::GroupMembership(body)
            | Self::OpaqueLink(body)
            | Self::OpaqueArea(body)
            | Self::OpaqueAs(body) => body.encode(buf),
            Self::Unknown(_) => unreachable!(),
        }
    }

    pub fn lsa_type(&self) -> LsaType {
        use LsaTypeCode as Code;

        let code = match self {
            Self::Router(_) => Code::Router,
            Self::Network(_) => Code::Network,
            Self::SummaryNetwork(_) => Code::SummaryNetwork,
            Self::SummaryRouter(_) => Code::SummaryRouter,
            Self::AsExternal(_) => Code::AsExternal,
            Self::GroupMembership(_) => Code::GroupMembership,
            Self::NssaExternal(_) => Code::NssaExternal,
            Self::OpaqueLink(_) => Code::OpaqueLink,
            Self::OpaqueArea(_) => Code::OpaqueArea,
            Self::OpaqueAs(_) => Code::OpaqueAs,
            Self::Unknown(_) => unreachable!(),
        };
        code.into()
    }

    pub(crate) fn as_summary(&self) -> Option<&LsaSummary> {
        match self {
            Self::SummaryNetwork(body) | Self::SummaryRouter(body) => {
                Some(body)
            }
            _ => None,
        }
    }

    pub(crate) fn as_external(&self) -> Option<&LsaAsExternal> {
        match self {
            Self::AsExternal(body) | Self::NssaExternal(body) => Some(body),
            _ => None,
        }
    }

    fn validate(&self, hdr: &LsaHdr) -> Result<(), LsaValidationError> {
        // A Router-LSA's Link State ID is its originator's Router ID.
        if self.as_router().is_some() && hdr.lsa_id != hdr.adv_rtr {
            return Err(LsaValidationError::RouterLsaIdMismatch);
        }
        Ok(())
    }
}

// ===== impl LsaRouter =====

impl LsaRouter {
    const LINK_LENGTH: usize = 12;

    pub(crate) fn is_abr(&self) -> bool {
        self.flags.contains(LsaRouterFlags::B)
    }

    pub(crate) fn is_asbr(&self) -> bool {
        self.flags.contains(LsaRouterFlags::E)
    }
}

impl LsaBodyCodec for LsaRouter {
    const MIN_LENGTH: u16 = 4;

    fn decode_fields(buf: &mut Bytes) -> DecodeResult<Self> {
        let flags = LsaRouterFlags::from_bits_truncate(buf.get_u8());
        buf.advance(1);
        let links_cnt = buf.get_u16();
        let links = (0..links_cnt)
            .map(|_| LsaRouterLink::decode(buf))
            .collect::<DecodeResult<_>>()?;

        Ok(LsaRouter { flags, links })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u8(self.flags.bits());
        buf.put_u8(0);
        buf.put_u16(self.links.len() as u16);
        for link in &self.links {
            link.encode(buf);
        }
    }
}

// ===== impl LsaRouterLink =====

impl LsaRouterLink {
    fn decode(buf: &mut Bytes) -> DecodeResult<Self> {
        if buf.remaining() < LsaRouter::LINK_LENGTH {
            return Err(DecodeError::InvalidLsaLength);
        }
        let link_id = buf.get_ipv4();
        let link_data = buf.get_ipv4();
        let link_type = buf.get_u8();
        let link_type = LsaRouterLinkType::from_u8(link_type)
            .ok_or(DecodeError::UnknownRouterLinkType(link_type))?;
        let tos_len = buf.get_u8() as usize * 4;
        let metric = buf.get_u16();

        // TOS metrics are obsolete and skipped.
        if buf.remaining() < tos_len {
            return Err(DecodeError::InvalidLsaLength);
        }
        buf.advance(tos_len);

        Ok(LsaRouterLink::new(link_type, link_id, link_data, metric))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.link_id);
        buf.put_ipv4(&self.link_data);
        buf.put_u8(self.link_type as u8);
        buf.put_u8(0);
        buf.put_u16(self.metric);
    }
}

// ===== impl LsaNetwork =====

impl LsaBodyCodec for LsaNetwork {
    const MIN_LENGTH: u16 = 4;

    fn decode_fields(buf: &mut Bytes) -> DecodeResult<Self> {
        let mask = buf.get_ipv4();
        let attached_rtrs = iter::from_fn(|| {
            (buf.remaining() >= 4).then(|| buf.get_ipv4())
        })
        .collect();

        Ok(LsaNetwork {
            mask,
            attached_rtrs,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.mask);
        self.attached_rtrs.iter().for_each(|rtr| buf.put_ipv4(rtr));
    }
}

// ===== impl LsaSummary =====

impl LsaBodyCodec for LsaSummary {
    const MIN_LENGTH: u16 = 8;

    // Trailing TOS entries are ignored.
    fn decode_fields(buf: &mut Bytes) -> DecodeResult<Self> {
        let mask = buf.get_ipv4();
        let metric = buf.get_u32() & 0x00ff_ffff;
        Ok(LsaSummary::new(mask, metric))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.mask);
        buf.put_u32(self.metric & 0x00ff_ffff);
    }
}

// ===== impl LsaAsExternal =====

impl LsaAsExternal {
    // Type 2 metrics are compared on their own, ahead of the internal cost.
    pub(crate) fn is_type2(&self) -> bool {
        self.flags.contains(LsaAsExternalFlags::E)
    }
}

impl LsaBodyCodec for LsaAsExternal {
    const MIN_LENGTH: u16 = 16;

    // Trailing TOS entries are ignored.
    fn decode_fields(buf: &mut Bytes) -> DecodeResult<Self> {
        let mask = buf.get_ipv4();
        let flags = LsaAsExternalFlags::from_bits_truncate(buf.get_u8());
        let metric = buf.get_u24();
        let fwd_addr = buf.get_opt_ipv4();
        let tag = buf.get_u32();

        Ok(LsaAsExternal {
            mask,
            flags,
            metric,
            fwd_addr,
            tag,
        })
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_ipv4(&self.mask);
        buf.put_u8(self.flags.bits());
        buf.put_u24(self.metric);
        buf.put_opt_ipv4(&self.fwd_addr);
        buf.put_u32(self.tag);
    }
}

// ===== impl LsaOpaque =====

impl LsaBodyCodec for LsaOpaque {
    const MIN_LENGTH: u16 = 0;

    fn decode_fields(buf: &mut Bytes) -> DecodeResult<Self> {
        Ok(LsaOpaque::new(buf.split_off(0)))
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.data);
    }
}

// ===== unit tests =====
