//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::time::Duration;

use smallvec::{SmallVec, smallvec};

use crate::area::{self, Area, OptionsLocation};
use crate::collections::{Arena, NeighborIndex};
use crate::instance::InstanceUpView;
use crate::interface::{Interface, InterfaceType, ism};
use crate::lsdb;
use crate::neighbor::{Neighbor, nsm};
use crate::network::MulticastAddr;
use crate::packet::lsa::{Lsa, LsaHdr, LsaScope};
use crate::packet::{
    DbDesc, DbDescFlags, Hello, LsAck, LsRequest, LsUpdate, Options, Packet,
    PacketHdr, PacketType,
};
use crate::tasks::BROADCAST_JITTER;
use crate::tasks::messages::output::NetTxPacketMsg;

// Maximum number of entries carried by a single LS Request packet.
const LS_REQUEST_MAX_ENTRIES: usize = 100;

type Destination = SmallVec<[Ipv4Addr; 4]>;

// ===== Hello Packets =====

pub(crate) fn send_hello(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) {
    let packet = Packet::Hello(Hello {
        hdr: packet_hdr(PacketType::Hello, area, instance),
        network_mask: iface.config.address.mask(),
        hello_interval: iface.config.hello_interval,
        options: packet_options(iface, area, instance, PacketType::Hello),
        priority: iface.config.priority,
        dead_interval: iface.config.dead_interval,
        dr: iface.state.dr.map(|net_id| net_id.get()),
        bdr: iface.state.bdr.map(|net_id| net_id.get()),
        neighbors: iface.state.neighbors.router_ids().collect(),
    });

    // Hellos are jittered to avoid synchronized transmissions.
    let dst = smallvec![MulticastAddr::AllSpfRtrs.addr()];
    let delay = instance.tx.jitter(BROADCAST_JITTER);
    let msg = net_tx_msg(iface, packet, dst, delay);
    iface.send_packet(instance.tx, msg);
}

// ===== Database Description Packets =====

pub(crate) fn send_dbdesc(
    nbr: &mut Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) {
    let now = instance.tx.now();
    let dst = send_dest_nbr(nbr, iface);

    // Calculate maximum packet size.
    let max_size = iface
        .max_packet_size()
        .saturating_sub(PacketHdr::LENGTH + DbDesc::BASE_LENGTH);

    // Append as many LSA headers as possible while on the Exchange state.
    let mut total = 0;
    let mut lsa_hdrs = vec![];
    while total + LsaHdr::LENGTH <= max_size {
        match nbr.lists.db_summary.pop_first() {
            Some((_, lsa)) => {
                total += LsaHdr::LENGTH;

                // Update LSA age.
                lsa_hdrs.push(lsa.hdr_at(now));
            }
            None => break,
        }
    }

    // Clear the M-bit if there's no more data to send.
    if !nbr.dd_flags.contains(DbDescFlags::I) && nbr.lists.db_summary.is_empty()
    {
        nbr.dd_flags.remove(DbDescFlags::M);
    }

    // Generate Database Description packet.
    let packet = Packet::DbDesc(DbDesc {
        hdr: packet_hdr(PacketType::DbDesc, area, instance),
        mtu: iface.config.mtu,
        options: packet_options(iface, area, instance, PacketType::DbDesc),
        dd_flags: nbr.dd_flags,
        dd_seq_no: nbr.dd_seq_no,
        lsa_hdrs,
    });

    // Enqueue packet for network transmission.
    let msg = net_tx_msg(iface, packet, dst, Duration::ZERO);
    nbr.last_sent_dbdesc = Some(msg.clone());
    iface.send_packet(instance.tx, msg);

    // Start retransmission interval in two cases:
    // * The router is master
    // * When sending the initial database description packet
    if nbr.dd_flags.intersects(DbDescFlags::MS | DbDescFlags::I) {
        nbr.rxmt_dbdesc_start(iface, area, instance);
    }
}

pub(crate) fn rxmt_dbdesc(
    nbr: &Neighbor,
    iface: &Interface,
    instance: &InstanceUpView<'_>,
) {
    if let Some(msg) = &nbr.last_sent_dbdesc {
        // Enqueue packet for network transmission.
        iface.send_packet(instance.tx, msg.clone());
    }
}

// ===== LS Request Packets =====

pub(crate) fn send_lsreq(
    nbr: &mut Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) {
    // Calculate maximum packet size.
    let max_size = iface.max_packet_size().saturating_sub(PacketHdr::LENGTH);

    // Move as many LS Request Entries as fit in a single packet to the
    // pending list.
    let mut total = 0;
    let mut count = 0;
    while total + LsRequest::ENTRY_LENGTH <= max_size
        && count < LS_REQUEST_MAX_ENTRIES
    {
        match nbr.lists.ls_request.pop_oldest() {
            Some((lsa_key, lsa_hdr)) => {
                nbr.lists.ls_request_pending.insert(lsa_key, lsa_hdr);
                total += LsRequest::ENTRY_LENGTH;
                count += 1;
            }
            None => break,
        }
    }

    rxmt_lsreq(nbr, iface, area, instance);

    // Start retransmission interval.
    nbr.rxmt_lsreq_start(iface, area, instance);
}

pub(crate) fn rxmt_lsreq(
    nbr: &Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) {
    let dst = send_dest_nbr(nbr, iface);

    // Generate Link State Request packet.
    let packet = Packet::LsRequest(LsRequest {
        hdr: packet_hdr(PacketType::LsRequest, area, instance),
        entries: nbr.lists.ls_request_pending.keys().copied().collect(),
    });

    // Enqueue packet for network transmission.
    let msg = net_tx_msg(iface, packet, dst, Duration::ZERO);
    iface.send_packet(instance.tx, msg);
}

// ===== LS Update Packets =====

pub(crate) fn send_lsupd(
    nbr_idx: Option<NeighborIndex>,
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    neighbors: &mut Arena<Neighbor>,
) {
    // Flooded updates go to the whole network, direct replies to a single
    // neighbor.
    let dst = match nbr_idx {
        Some(nbr_idx) => send_dest_nbr(&neighbors[nbr_idx], iface),
        None => send_dest_iface(iface, neighbors),
    };
    if dst.is_empty() {
        iface.state.ls_update_list.clear();
        return;
    }

    // Calculate maximum packet size.
    let max_size = iface
        .max_packet_size()
        .saturating_sub(PacketHdr::LENGTH + LsUpdate::BASE_LENGTH);

    // Get list of LSAs enqueued for transmission.
    let ls_update_list = match nbr_idx {
        Some(nbr_idx) => {
            let nbr = &mut neighbors[nbr_idx];
            &mut nbr.lists.ls_update
        }
        None => &mut iface.state.ls_update_list,
    };
    let mut ls_update_list = std::mem::take(ls_update_list);

    // Flooding is jittered to spread the load on broadcast networks.
    let delay = match nbr_idx {
        Some(_) => Duration::ZERO,
        None => instance.tx.jitter(BROADCAST_JITTER),
    };

    // Send as many LS Updates as necessary.
    while !ls_update_list.is_empty() {
        // Append as many LSAs as possible in a single packet.
        let mut total = 0;
        let mut lsas = vec![];
        while let Some(o) = ls_update_list.first_entry() {
            let lsa_length = o.get().hdr.length;
            // If a single LSA is bigger than the maximum packet size, there's
            // nothing we can do other than relying on IP-level fragmentation.
            if !lsas.is_empty() && total + lsa_length > max_size {
                break;
            }
            total += lsa_length;

            // Update LSA age before transmission.
            let lsa = o.remove();
            lsas.push(lsa_tx_copy(&lsa, iface, area, instance));
        }

        // Generate Link State Update packet.
        let packet = Packet::LsUpdate(LsUpdate {
            hdr: packet_hdr(PacketType::LsUpdate, area, instance),
            lsas,
        });

        // Enqueue packet for network transmission.
        let msg = net_tx_msg(iface, packet, dst.clone(), delay);
        iface.send_packet(instance.tx, msg);
    }
}

// Retransmits the LSAs that weren't acknowledged within RxmtInterval.
//
// Returns the number of retransmitted LSAs.
pub(crate) fn rxmt_lsupd(
    nbr: &mut Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) -> usize {
    let now = instance.tx.now();
    let dst = send_dest_nbr(nbr, iface);
    let rxmt_interval =
        Duration::from_secs(iface.config.retransmit_interval.into());

    // Calculate maximum packet size.
    let max_size = iface
        .max_packet_size()
        .saturating_sub(PacketHdr::LENGTH + LsUpdate::BASE_LENGTH);

    // Append as many LSAs as possible in a single packet.
    let mut total = 0;
    let mut lsas = vec![];
    for entry in nbr.lists.ls_rxmt.values_mut().filter(|entry| {
        now.saturating_duration_since(entry.sent_time) >= rxmt_interval
    }) {
        let lsa_length = entry.lsa.hdr.length;
        if !lsas.is_empty() && total + lsa_length > max_size {
            break;
        }
        total += lsa_length;

        // Update LSA age before transmission.
        lsas.push(lsa_tx_copy(&entry.lsa, iface, area, instance));
        entry.sent_time = now;
    }
    if lsas.is_empty() {
        return 0;
    }
    let count = lsas.len();

    // Generate Link State Update packet.
    let packet = Packet::LsUpdate(LsUpdate {
        hdr: packet_hdr(PacketType::LsUpdate, area, instance),
        lsas,
    });

    // Enqueue packet for network transmission.
    let msg = net_tx_msg(iface, packet, dst, Duration::ZERO);
    iface.send_packet(instance.tx, msg);

    count
}

// ===== LS Ack Packets =====

pub(crate) fn send_lsack_direct(
    nbr: &Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_hdr: &LsaHdr,
) {
    let dst = send_dest_nbr(nbr, iface);

    // Generate Link State Ack packet.
    let packet = Packet::LsAck(LsAck {
        hdr: packet_hdr(PacketType::LsAck, area, instance),
        lsa_hdrs: vec![*lsa_hdr],
    });

    // Enqueue packet for network transmission.
    let msg = net_tx_msg(iface, packet, dst, Duration::ZERO);
    iface.send_packet(instance.tx, msg);
}

pub(crate) fn send_lsack_delayed(
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    neighbors: &Arena<Neighbor>,
) {
    let dst = send_dest_iface(iface, neighbors);
    if dst.is_empty() {
        iface.state.ls_ack_list.clear();
        return;
    }

    // Calculate maximum packet size.
    let max_size = iface.max_packet_size().saturating_sub(PacketHdr::LENGTH);

    // Send as many LS Acks as necessary.
    while !iface.state.ls_ack_list.is_empty() {
        // Append as many LSA headers as possible in a single packet.
        let mut total = 0;
        let mut lsa_hdrs = vec![];
        while total + LsaHdr::LENGTH <= max_size {
            match iface.state.ls_ack_list.pop_first() {
                Some((_, lsa_hdr)) => {
                    total += LsaHdr::LENGTH;
                    lsa_hdrs.push(lsa_hdr);
                }
                None => break,
            }
        }

        // Generate Link State Ack packet.
        let packet = Packet::LsAck(LsAck {
            hdr: packet_hdr(PacketType::LsAck, area, instance),
            lsa_hdrs,
        });

        // Enqueue packet for network transmission.
        let msg = net_tx_msg(iface, packet, dst.clone(), Duration::ZERO);
        iface.send_packet(instance.tx, msg);
    }
}

// ===== helper functions =====

fn packet_hdr(
    pkt_type: PacketType,
    area: &Area,
    instance: &InstanceUpView<'_>,
) -> PacketHdr {
    PacketHdr::new(pkt_type, instance.state.router_id, area.area_id)
}

// Returns the options advertised in Hello and Database Description packets.
fn packet_options(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    pkt_type: PacketType,
) -> Options {
    let mut options = area::area_options(
        area,
        instance.config,
        OptionsLocation::Packet(pkt_type),
    );

    // RFC 1793 - Section 3.2.1:
    // The DC-bit is used to negotiate demand circuit behavior with the
    // neighbor.
    if iface.config.demand_circuit && instance.config.demand_circuit_capable {
        options.insert(Options::DC);
    }

    options
}

fn net_tx_msg(
    iface: &Interface,
    packet: Packet,
    dst: Destination,
    delay: Duration,
) -> NetTxPacketMsg {
    NetTxPacketMsg {
        packet,
        ifname: iface.name.clone(),
        ifindex: iface.ifindex,
        src: iface.config.address.ip(),
        dst,
        delay,
    }
}

// Returns a copy of the LSA ready to be sent out the given interface.
//
// The age is incremented by InfTransDelay. Over demand circuits, the DoNotAge
// bit is set as long as every router in the flooding scope supports it.
fn lsa_tx_copy(
    lsa: &Lsa,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
) -> Lsa {
    let now = instance.tx.now();
    let mut lsa = lsa.clone();
    let hdr = lsa.hdr_at(now);
    let mut age = std::cmp::min(
        hdr.age() + iface.config.transmit_delay,
        lsdb::LSA_MAX_AGE,
    );

    let dc_capable = match lsa.hdr.lsa_type.scope() {
        LsaScope::As => instance.state.dc_capable,
        _ => area.state.dc_capable,
    };
    if hdr.do_not_age()
        || (iface.config.demand_circuit
            && instance.config.demand_circuit_capable
            && dc_capable
            && age < lsdb::LSA_MAX_AGE)
    {
        age |= lsdb::LSA_DO_NOT_AGE;
    }

    lsa.set_age(age, now);
    lsa
}

// Returns destination used to send a packet directly to the given neighbor.
fn send_dest_nbr(nbr: &Neighbor, iface: &Interface) -> Destination {
    let addr = if iface.config.if_type == InterfaceType::PointToPoint {
        MulticastAddr::AllSpfRtrs.addr()
    } else {
        nbr.src
    };
    smallvec![addr]
}

// Returns a destination used to send a packet to all adjacent neighbors
// associated with the given interface.
fn send_dest_iface(
    iface: &Interface,
    neighbors: &Arena<Neighbor>,
) -> Destination {
    match iface.config.if_type {
        InterfaceType::Broadcast => {
            let addr = if matches!(
                iface.state.ism_state,
                ism::State::Dr | ism::State::Backup
            ) {
                MulticastAddr::AllSpfRtrs
            } else {
                MulticastAddr::AllDrRtrs
            };
            smallvec![addr.addr()]
        }
        InterfaceType::PointToMultipoint => {
            // Separate LS Update and delayed LS Ack packets are sent, as
            // unicasts, to each adjacent neighbor.
            iface
                .state
                .neighbors
                .iter(neighbors)
                .filter(|nbr| nbr.state >= nsm::State::Exchange)
                .map(|nbr| nbr.src)
                .collect()
        }
        InterfaceType::PointToPoint => {
            smallvec![MulticastAddr::AllSpfRtrs.addr()]
        }
    }
}
