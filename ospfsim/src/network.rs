//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use bytes::Bytes;
use ospfsim_utils::sim::{PacketTransport, TxRequest};
use serde::{Deserialize, Serialize};

use crate::debug::Debug;
use crate::packet::Packet;
use crate::packet::error::DecodeResult;
use crate::tasks::messages::output::NetTxPacketMsg;

// OSPF IP protocol number.
pub const OSPF_IP_PROTO: u8 = 89;
// OSPF packets are never forwarded past the attached network.
pub const OSPF_IP_TTL: u8 = 1;
// IP precedence "internetwork control".
pub const OSPF_IP_PRIORITY: u8 = 0xc0;

// OSPF multicast addresses.
pub const ALL_SPF_RTRS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 5);
pub const ALL_DR_RTRS: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 6);

#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum MulticastAddr {
    AllSpfRtrs,
    AllDrRtrs,
}

// ===== impl MulticastAddr =====

impl MulticastAddr {
    // Returns the IP address of the multicast group.
    pub fn addr(&self) -> Ipv4Addr {
        match self {
            MulticastAddr::AllSpfRtrs => ALL_SPF_RTRS,
            MulticastAddr::AllDrRtrs => ALL_DR_RTRS,
        }
    }
}

// ===== global functions =====

// Hands the packet over to the simulator, once per destination.
//
// The packet is encoded only once regardless of the number of destinations.
pub(crate) fn send_packet(
    transport: &mut (impl PacketTransport + ?Sized),
    msg: NetTxPacketMsg,
) {
    let NetTxPacketMsg {
        packet,
        ifname: _,
        ifindex,
        src,
        dst,
        delay,
    } = msg;

    // Encode packet.
    let buf = packet.encode();

    for dst_addr in dst {
        Debug::PacketTx(ifindex, &dst_addr, &packet).log();

        let request = TxRequest::new(
            src,
            dst_addr,
            ifindex,
            OSPF_IP_PRIORITY,
            OSPF_IP_PROTO,
            OSPF_IP_TTL,
            None,
            buf.clone(),
            delay,
        );
        transport.send(request);
    }
}

// Decodes a packet handed over by the simulator.
//
// The payload starts at the OSPF header, the IP header having been consumed
// by the simulated network.
pub(crate) fn decode_packet(payload: &[u8]) -> DecodeResult<Packet> {
    let mut buf = Bytes::copy_from_slice(payload);
    Packet::decode(&mut buf)
}

// ===== unit tests =====
