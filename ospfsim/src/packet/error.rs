//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

pub type DecodeResult<T> = Result<T, DecodeError>;

// Malformed packets. Any of these discards the whole packet.
#[derive(Debug, Deserialize, Serialize, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid packet version: {0}")]
    InvalidVersion(u8),
    #[error("unknown packet type: {0}")]
    UnknownPacketType(u8),
    #[error("invalid packet length: {0}")]
    InvalidLength(u16),
    #[error("invalid checksum")]
    InvalidChecksum,
    #[error("invalid router-id: {0}")]
    InvalidRouterId(Ipv4Addr),
    #[error("unsupported authentication type: {0}")]
    UnsupportedAuthType(u16),
    #[error("invalid LSA length")]
    InvalidLsaLength,
    #[error("unknown link type: {0}")]
    UnknownRouterLinkType(u8),
}

// Problems confined to a single LSA of an LS Update. The LSA is dropped and
// the rest of the packet is still processed.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, thiserror::Error)]
pub enum LsaValidationError {
    #[error("invalid LSA checksum")]
    InvalidChecksum,
    #[error("invalid LSA age")]
    InvalidLsaAge,
    #[error("invalid LSA sequence number")]
    InvalidLsaSeqNo,
    #[error("Router-LSA's advertising router and LSA-ID are not equal")]
    RouterLsaIdMismatch,
}
