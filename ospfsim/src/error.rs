//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use tracing::{error, warn, warn_span};

use crate::collections::{AreaId, InterfaceId, LsaEntryId, NeighborId};
use crate::interface::ism;
use crate::neighbor::nsm;
use crate::packet::PacketType;
use crate::packet::error::DecodeError;
use crate::packet::lsa::LsaType;
use crate::spf::VertexId;

// Runtime errors. None of them is fatal: each is logged and the offending
// input dropped.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    // A queued message outlived the object it refers to.
    #[error("area ID not found")]
    AreaIdNotFound(AreaId),
    #[error("interface ID not found")]
    InterfaceIdNotFound(InterfaceId),
    #[error("neighbor ID not found")]
    NeighborIdNotFound(NeighborId),
    #[error("LSA entry ID not found")]
    LsaEntryIdNotFound(LsaEntryId),

    #[error("packet received on unknown interface")]
    UnknownInterface(u32),
    #[error("invalid source address")]
    InvalidSrcAddr(Ipv4Addr),
    #[error("failed to decode packet")]
    PacketDecodeError(#[from] DecodeError),
    #[error("unknown neighbor")]
    UnknownNeighbor(Ipv4Addr, Ipv4Addr),
    // Interface name, packet source, packet type and the mismatch found.
    #[error("{3}")]
    InterfaceCfgError(
        String,
        Ipv4Addr,
        PacketType,
        #[source] InterfaceCfgError,
    ),
    #[error("database description packet rejected")]
    DbDescReject(Ipv4Addr, nsm::State),
    #[error("discarding LSA due to unknown type")]
    LsaUnknownType(LsaType),

    #[error("SPF root not found")]
    SpfRootNotFound(Ipv4Addr),
    #[error("failed to calculate nexthop address")]
    SpfNexthopCalcError(VertexId),

    #[error("unexpected event")]
    IsmUnexpectedEvent(ism::State, ism::Event),
    #[error("unexpected event")]
    NsmUnexpectedEvent(Ipv4Addr, nsm::State, nsm::Event),
}

// Hello and Database Description parameters that don't match the receiving
// interface's. Each variant carries what was received.
#[derive(Debug, thiserror::Error)]
pub enum InterfaceCfgError {
    #[error("area ID mismatch")]
    AreaIdMismatch(Ipv4Addr, Ipv4Addr),
    #[error("network mask mismatch")]
    HelloMaskMismatch(Ipv4Addr, Ipv4Addr),
    #[error("hello interval mismatch")]
    HelloIntervalMismatch(u16, u16),
    #[error("dead interval mismatch")]
    DeadIntervalMismatch(u32, u32),
    #[error("external routing capability mismatch")]
    ExternalRoutingCapabilityMismatch(bool),
    #[error("NSSA capability mismatch")]
    NssaCapabilityMismatch(bool),
    #[error("MTU mismatch")]
    MtuMismatch(u16),
    #[error("duplicate Router ID")]
    DuplicateRouterId(Ipv4Addr),
}

// Configuration rejected when the instance is created.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("invalid router ID")]
    InvalidRouterId,
    #[error("interface {0} references unconfigured area {1}")]
    InterfaceAreaNotConfigured(String, Ipv4Addr),
    #[error("host route {0} references unconfigured area {1}")]
    HostRouteAreaNotConfigured(Ipv4Addr, Ipv4Addr),
    #[error("area border router without backbone attachment")]
    NoBackbone,
    #[error("start delay and start delay jitter are exclusive")]
    ConflictingStartDelay,
    #[error("area {0} can't be both stub and NSSA")]
    StubAndNssa(Ipv4Addr),
    #[error("the backbone area can't be stub or NSSA")]
    BackboneNotNormal,
    #[error("duplicate interface ifindex {0}")]
    DuplicateIfindex(u32),
    #[error("duplicate interface name {0}")]
    DuplicateInterfaceName(String),
}

// ===== impl Error =====

impl Error {
    pub(crate) fn log(&self) {
        match self {
            Error::AreaIdNotFound(area_id) => warn!(?area_id, "{}", self),
            Error::InterfaceIdNotFound(iface_id) => {
                warn!(?iface_id, "{}", self)
            }
            Error::NeighborIdNotFound(nbr_id) => warn!(?nbr_id, "{}", self),
            Error::LsaEntryIdNotFound(lse_id) => warn!(?lse_id, "{}", self),
            Error::UnknownInterface(ifindex) => warn!(%ifindex, "{}", self),
            Error::InvalidSrcAddr(addr) => warn!(address = %addr, "{}", self),
            Error::PacketDecodeError(error) => warn!(%error, "{}", self),
            Error::UnknownNeighbor(source, router_id) => {
                warn!(%source, %router_id, "{}", self)
            }
            Error::InterfaceCfgError(name, source, pkt_type, error) => {
                let span = warn_span!("interface", %name, %source);
                span.in_scope(|| error.log(*pkt_type))
            }
            Error::DbDescReject(router_id, state) => {
                let span = warn_span!("neighbor", %router_id);
                span.in_scope(|| warn!(?state, "{}", self))
            }
            Error::LsaUnknownType(lsa_type) => warn!(%lsa_type, "{}", self),
            Error::SpfRootNotFound(area_id) => warn!(%area_id, "{}", self),
            Error::SpfNexthopCalcError(vertex_id) => {
                warn!(?vertex_id, "{}", self)
            }
            Error::IsmUnexpectedEvent(state, event) => {
                let span = warn_span!("fsm");
                span.in_scope(|| warn!(?state, ?event, "{}", self))
            }
            Error::NsmUnexpectedEvent(router_id, state, event) => {
                warn_span!("neighbor", %router_id).in_scope(|| {
                    warn_span!("fsm")
                        .in_scope(|| warn!(?state, ?event, "{}", self))
                })
            }
        }
    }

    // Stale references are expected when an object is deleted while
    // messages addressed to it are still queued.
    pub(crate) fn is_stale_reference(&self) -> bool {
        matches!(
            self,
            Error::AreaIdNotFound(..)
                | Error::InterfaceIdNotFound(..)
                | Error::NeighborIdNotFound(..)
                | Error::LsaEntryIdNotFound(..)
        )
    }
}

// ===== impl InterfaceCfgError =====

impl InterfaceCfgError {
    fn log(&self, pkt_type: PacketType) {
        use InterfaceCfgError::*;

        match self {
            AreaIdMismatch(received, expected)
            | HelloMaskMismatch(received, expected) => {
                warn!(?pkt_type, %received, %expected, "{}", self)
            }
            HelloIntervalMismatch(received, expected) => {
                warn!(?pkt_type, %received, %expected, "{}", self)
            }
            DeadIntervalMismatch(received, expected) => {
                warn!(?pkt_type, %received, %expected, "{}", self)
            }
            ExternalRoutingCapabilityMismatch(e_bit) => {
                warn!(?pkt_type, %e_bit, "{}", self)
            }
            NssaCapabilityMismatch(np_bit) => {
                warn!(?pkt_type, %np_bit, "{}", self)
            }
            MtuMismatch(mtu) => warn!(?pkt_type, %mtu, "{}", self),
            DuplicateRouterId(router_id) => {
                warn!(?pkt_type, %router_id, "{}", self)
            }
        }
    }
}

// ===== impl StartupError =====

impl StartupError {
    // The message already names the offending object.
    pub(crate) fn log(&self) {
        error!("{}", self);
    }
}
