//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::btree_map;
use std::net::Ipv4Addr;
use std::ops::ControlFlow;
use std::sync::Arc;

use itertools::Itertools;
use ospfsim_utils::task::TimerTag;

use crate::area::{Area, AreaType};
use crate::collections::{
    AreaId, AreaIndex, Arena, InterfaceId, InterfaceIndex, LsaEntryId, Lsdb,
    LsdbId, LsdbIndex, NeighborId, NeighborIndex, lsdb_get, lsdb_get_mut,
    lsdb_index, lsdb_index_mut,
};
use crate::debug::{Debug, LsaFlushReason, SeqNoMismatchReason};
use crate::error::{Error, InterfaceCfgError};
use crate::flood::flood;
use crate::instance::{self, InstanceArenas, InstanceUpView};
use crate::interface::{Interface, InterfaceType, ism};
use crate::lsdb::{
    self, LsaEntry, LsaEntryFlags, LsaOriginateEvent, lsa_compare,
};
use crate::neighbor::{
    LastDbDesc, Neighbor, NeighborNetId, RxmtPacketType, nsm,
};
use crate::packet::lsa::{Lsa, LsaBody, LsaHdr, LsaKey, LsaScope, LsaType};
use crate::packet::{
    DbDesc, DbDescFlags, Hello, LsAck, LsRequest, LsUpdate, Options, Packet,
    PacketType,
};
use crate::tasks::messages::{TimerKind, TimerMsg};
use crate::{network, output, spf, tasks};

// ===== Interface FSM event =====

pub(crate) fn process_ism_event(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    event: ism::Event,
) -> Result<(), Error> {
    let (_, area) = arenas.areas.get_by_id(area_id)?;
    let (_, iface) = area
        .interfaces
        .get_mut_by_id(&mut arenas.interfaces, iface_id)?;

    let neighbors = &mut arenas.neighbors;
    iface.fsm(area, instance, neighbors, &arenas.lsa_entries, event);
    Ok(())
}

// ===== Neighbor FSM event =====

pub(crate) fn process_nsm_event(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: NeighborId,
    event: nsm::Event,
) -> Result<(), Error> {
    let (_, area) = arenas.areas.get_by_id(area_id)?;
    let (_, iface) = area
        .interfaces
        .get_mut_by_id(&mut arenas.interfaces, iface_id)?;
    let (nbr_idx, nbr) = iface
        .state
        .neighbors
        .get_mut_by_id(&mut arenas.neighbors, nbr_id)?;

    nbr.fsm(iface, area, instance, &arenas.lsa_entries, event);

    // Neighbors reaching Down are gone, and so is their entry in our Hellos.
    if nbr.state == nsm::State::Down {
        iface.state.neighbors.delete(&mut arenas.neighbors, nbr_idx);
        iface.sync_hello_tx(area, instance);
    }

    Ok(())
}

// ===== Network packet receipt =====

pub(crate) fn process_packet(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    ifindex: u32,
    src: Ipv4Addr,
    payload: &[u8],
) -> Result<(), Error> {
    let (area_idx, iface_idx) = arenas
        .areas
        .indexes()
        .find_map(|area_idx| {
            let area = &arenas.areas[area_idx];
            let (iface_idx, _) =
                area.interfaces.get_by_ifindex(&arenas.interfaces, ifindex)?;
            Some((area_idx, iface_idx))
        })
        .ok_or(Error::UnknownInterface(ifindex))?;
    let area = &arenas.areas[area_idx];
    let iface = &mut arenas.interfaces[iface_idx];

    if iface.is_down() || iface.is_passive() {
        return Ok(());
    }

    let packet = network::decode_packet(payload)
        .map_err(Error::from)
        .and_then(|packet| {
            validate_packet(iface, area, instance, src, &packet)?;
            Ok(packet)
        })
        .inspect_err(|_| iface.state.statistics.pkts_rejected += 1)?;
    iface.state.statistics.pkts_rcvd.incr(packet.hdr().pkt_type);
    Debug::PacketRx(iface, &src, &packet).log();

    let result = match packet {
        Packet::Hello(hello) => process_packet_hello(
            iface,
            area,
            instance,
            &mut arenas.neighbors,
            &arenas.lsa_entries,
            src,
            hello,
        ),
        packet => {
            // Everything but Hellos must come from a known neighbor.
            let router_id = packet.hdr().router_id;
            let (nbr_idx, nbr) = iface
                .get_neighbor(src, router_id, &mut arenas.neighbors)
                .ok_or(Error::UnknownNeighbor(src, router_id))?;
            let lsa_entries = &arenas.lsa_entries;

            match packet {
                Packet::DbDesc(dbdesc) => process_packet_dbdesc(
                    nbr,
                    iface,
                    area,
                    instance,
                    lsa_entries,
                    src,
                    dbdesc,
                ),
                Packet::LsRequest(ls_req) => process_packet_lsreq(
                    nbr,
                    iface,
                    area,
                    instance,
                    lsa_entries,
                    ls_req,
                ),
                Packet::LsUpdate(ls_upd) => process_packet_lsupd(
                    nbr_idx, iface_idx, area_idx, instance, arenas, ls_upd,
                ),
                Packet::LsAck(ls_ack) => {
                    process_packet_lsack(nbr, instance, ls_ack)
                }
                Packet::Hello(_) => unreachable!(),
            }
        }
    };

    // Parameter mismatches count as rejections too.
    if matches!(result, Err(Error::InterfaceCfgError(..))) {
        arenas.interfaces[iface_idx].state.statistics.pkts_rejected += 1;
    }

    result
}

// Header checks common to all packet types (RFC 2328, section 8.2).
fn validate_packet(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    src: Ipv4Addr,
    packet: &Packet,
) -> Result<(), Error> {
    let hdr = packet.hdr();
    let cfg_error = |error| {
        Error::InterfaceCfgError(iface.name.clone(), src, hdr.pkt_type, error)
    };

    iface.validate_packet_src(src)?;
    if hdr.area_id != area.area_id {
        let error =
            InterfaceCfgError::AreaIdMismatch(hdr.area_id, area.area_id);
        return Err(cfg_error(error));
    }
    if hdr.router_id == instance.state.router_id {
        let error = InterfaceCfgError::DuplicateRouterId(hdr.router_id);
        return Err(cfg_error(error));
    }

    Ok(())
}

// RFC 2328, section 10.5.
fn process_packet_hello(
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    neighbors: &mut Arena<Neighbor>,
    lsa_entries: &Arena<LsaEntry>,
    src: Ipv4Addr,
    hello: Hello,
) -> Result<(), Error> {
    process_packet_hello_sanity_checks(iface, area, &hello).map_err(
        |error| {
            let pkt_type = PacketType::Hello;
            Error::InterfaceCfgError(iface.name.clone(), src, pkt_type, error)
        },
    )?;

    let router_id = hello.hdr.router_id;
    let hello_dr = hello.dr.map(NeighborNetId::from);
    let hello_bdr = hello.bdr.map(NeighborNetId::from);
    // Point-to-multipoint links don't elect a DR (RFC 2328, errata 4022).
    let broadcast = iface.is_broadcast();

    let nbr = match iface.get_neighbor(src, router_id, neighbors) {
        Some((_, nbr)) => nbr,
        None => {
            let dd_seq_no = instance.tx.dd_seq_no();
            let (_, nbr) = iface.state.neighbors.insert(
                neighbors, router_id, src, dd_seq_no,
            );
            nbr.priority = hello.priority;
            if broadcast {
                nbr.dr = hello_dr;
                nbr.bdr = hello_bdr;
            }
            iface.sync_hello_tx(area, instance);
            nbr
        }
    };

    // Point-to-point neighbors are known by Router ID and may renumber.
    nbr.src = src;

    let two_way = hello.neighbors.contains(&instance.state.router_id);
    let event = if two_way {
        nsm::Event::TwoWayRcvd
    } else {
        nsm::Event::OneWayRcvd
    };
    nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::HelloRcvd);
    nbr.fsm(iface, area, instance, lsa_entries, event);
    if !broadcast {
        return Ok(());
    }

    // Until the neighbor sees us, its DR election inputs are only recorded.
    let tx = instance.tx;
    let nbr_net_id = nbr.network_id();
    let is_nbr = |net_id: Option<NeighborNetId>| net_id == Some(nbr_net_id);
    if two_way {
        if hello.priority != nbr.priority {
            tx.ism_event(area.id, iface.id, ism::Event::NbrChange);
        }
        let backup_seen =
            is_nbr(hello_bdr) || (is_nbr(hello_dr) && hello_bdr.is_none());
        if iface.state.ism_state == ism::State::Waiting && backup_seen {
            tx.ism_event(area.id, iface.id, ism::Event::BackupSeen);
        }
        if is_nbr(hello_dr) != is_nbr(nbr.dr)
            || is_nbr(hello_bdr) != is_nbr(nbr.bdr)
        {
            tx.ism_event(area.id, iface.id, ism::Event::NbrChange);
        }
    }
    nbr.priority = hello.priority;
    nbr.dr = hello_dr;
    nbr.bdr = hello_bdr;

    Ok(())
}

fn process_packet_hello_sanity_checks(
    iface: &Interface,
    area: &Area,
    hello: &Hello,
) -> Result<(), InterfaceCfgError> {
    iface.validate_hello(hello)?;

    let area_type = area.config.area_type();
    let e_bit = hello.options.contains(Options::E);
    let n_bit = hello.options.contains(Options::NP);
    if e_bit != (area_type == AreaType::Normal) {
        Err(InterfaceCfgError::ExternalRoutingCapabilityMismatch(e_bit))
    } else if n_bit != (area_type == AreaType::Nssa) {
        Err(InterfaceCfgError::NssaCapabilityMismatch(n_bit))
    } else {
        Ok(())
    }
}

// RFC 2328, section 10.6.
fn process_packet_dbdesc(
    nbr: &mut Neighbor,
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
    src: Ipv4Addr,
    dbdesc: DbDesc,
) -> Result<(), Error> {
    if dbdesc.mtu > iface.config.mtu {
        let error = InterfaceCfgError::MtuMismatch(dbdesc.mtu);
        let pkt_type = PacketType::DbDesc;
        let name = iface.name.clone();
        return Err(Error::InterfaceCfgError(name, src, pkt_type, error));
    }

    let accepted = match nbr.state {
        nsm::State::Down | nsm::State::Attempt | nsm::State::TwoWay => {
            return Err(Error::DbDescReject(nbr.router_id, nbr.state));
        }
        nsm::State::Init | nsm::State::ExStart => {
            dbdesc_negotiate(nbr, iface, area, instance, lsa_entries, &dbdesc)
        }
        nsm::State::Exchange | nsm::State::Loading | nsm::State::Full => {
            if nbr.dbdesc_is_dup(&dbdesc) {
                // Only the slave answers duplicates, by repeating its last
                // packet.
                if !nbr.dd_flags.contains(DbDescFlags::MS) {
                    output::rxmt_dbdesc(nbr, iface, instance);
                }
                return Ok(());
            }

            let mismatch = match nbr.state {
                nsm::State::Exchange => dbdesc_mismatch(nbr, &dbdesc),
                _ => Some(SeqNoMismatchReason::UnexpectedDbDesc),
            };
            match mismatch {
                Some(reason) => {
                    let event = nsm::Event::SeqNoMismatch(reason);
                    nbr.fsm(iface, area, instance, lsa_entries, event);
                    false
                }
                None => true,
            }
        }
    };
    if !accepted {
        return Ok(());
    }

    nbr.rxmt_dbdesc_stop();
    nbr.dbdesc_rxmt_count = 0;

    if let Err(reason) =
        dbdesc_request_lsas(nbr, iface, area, instance, lsa_entries, &dbdesc)
    {
        let event = nsm::Event::SeqNoMismatch(reason);
        nbr.fsm(iface, area, instance, lsa_entries, event);
        return Ok(());
    }
    if !nbr.lists.ls_request.is_empty()
        && nbr.lists.ls_request_pending.is_empty()
    {
        output::send_lsreq(nbr, iface, area, instance);
    }

    // The master moves on to the next sequence number, the slave echoes the
    // master's. The slave always answers, which may clear its M-bit.
    let master = nbr.dd_flags.contains(DbDescFlags::MS);
    if master {
        nbr.dd_seq_no = nbr.dd_seq_no.wrapping_add(1);
    } else {
        nbr.dd_seq_no = dbdesc.dd_seq_no;
        output::send_dbdesc(nbr, iface, area, instance);
    }
    let exchange_done = !nbr.dd_flags.contains(DbDescFlags::M)
        && !dbdesc.dd_flags.contains(DbDescFlags::M);
    if master && !exchange_done {
        output::send_dbdesc(nbr, iface, area, instance);
    }

    if exchange_done {
        nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::ExchangeDone);

        // The slave keeps its last packet for a RouterDeadInterval, in case
        // the master retransmits.
        if !master {
            let task = tasks::dbdesc_free_timer(nbr, iface, area, instance.tx);
            nbr.tasks.dbdesc_free_timer = Some(task);
        }
    }

    nbr.last_rcvd_dbdesc = Some(LastDbDesc::from(&dbdesc));

    Ok(())
}

// Settles who is master. Returns whether the packet goes on to be processed
// as part of the exchange.
fn dbdesc_negotiate(
    nbr: &mut Neighbor,
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
    dbdesc: &DbDesc,
) -> bool {
    if nbr.state == nsm::State::Init {
        nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::TwoWayRcvd);
        if nbr.state != nsm::State::ExStart {
            return false;
        }
    }

    let flags = dbdesc.dd_flags;
    let nbr_is_higher = dbdesc.hdr.router_id > instance.state.router_id;
    let slave = flags
        .contains(DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS)
        && dbdesc.lsa_hdrs.is_empty()
        && nbr_is_higher;
    let master = !flags.intersects(DbDescFlags::I | DbDescFlags::MS)
        && dbdesc.dd_seq_no == nbr.dd_seq_no
        && !nbr_is_higher;
    if slave {
        nbr.dd_flags.remove(DbDescFlags::MS);
        nbr.dd_seq_no = dbdesc.dd_seq_no;
    } else if !master {
        return false;
    }

    nbr.options = Some(dbdesc.options);
    nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::NegotiationDone);
    true
}

// Consistency of a new packet received in the Exchange state with the
// previous one.
fn dbdesc_mismatch(
    nbr: &Neighbor,
    dbdesc: &DbDesc,
) -> Option<SeqNoMismatchReason> {
    let Some(last) = &nbr.last_rcvd_dbdesc else {
        return Some(SeqNoMismatchReason::UnexpectedDbDesc);
    };
    let is_master = |flags: DbDescFlags| flags.contains(DbDescFlags::MS);

    if dbdesc.dd_flags.contains(DbDescFlags::I)
        || is_master(dbdesc.dd_flags) != is_master(last.dd_flags)
    {
        return Some(SeqNoMismatchReason::InconsistentFlags);
    }
    if dbdesc.options != last.options {
        return Some(SeqNoMismatchReason::InconsistentOptions);
    }

    let expected_seq_no = if is_master(nbr.dd_flags) {
        nbr.dd_seq_no
    } else {
        nbr.dd_seq_no.wrapping_add(1)
    };
    (dbdesc.dd_seq_no != expected_seq_no)
        .then_some(SeqNoMismatchReason::InconsistentSeqNo)
}

// Requests every described LSA we lack or hold an older instance of.
fn dbdesc_request_lsas(
    nbr: &mut Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
    dbdesc: &DbDesc,
) -> Result<(), SeqNoMismatchReason> {
    let now = instance.tx.now();
    let area_type = Some(area.config.area_type());

    for lsa_hdr in &dbdesc.lsa_hdrs {
        if !lsdb::lsa_type_is_valid(area_type, nbr.options, lsa_hdr.lsa_type) {
            return Err(SeqNoMismatchReason::InvalidLsaType);
        }
        let lsa_key = lsa_hdr.key();

        // No need to describe back what the neighbor already has (RFC 5243).
        if let btree_map::Entry::Occupied(entry) =
            nbr.lists.db_summary.entry(lsa_key)
            && lsa_compare(&entry.get().hdr_at(now), lsa_hdr)
                != Ordering::Greater
        {
            entry.remove();
        }

        let Some(lsdb) = scoped_lsdb(iface, area, instance, lsa_hdr.lsa_type)
        else {
            continue;
        };
        let up_to_date =
            lsdb.get(lsa_entries, &lsa_key).is_some_and(|(_, lse)| {
                lsa_compare(&lse.data.hdr_at(now), lsa_hdr) != Ordering::Less
            });
        if !up_to_date {
            nbr.lists.ls_request.insert(lsa_key, *lsa_hdr);
        }
    }

    Ok(())
}

// LSDB holding LSAs of the given type, as seen from an interface.
fn scoped_lsdb<'a>(
    iface: &'a Interface,
    area: &'a Area,
    instance: &'a InstanceUpView<'_>,
    lsa_type: LsaType,
) -> Option<&'a Lsdb> {
    match lsa_type.scope() {
        LsaScope::Link => Some(&iface.state.lsdb),
        LsaScope::Area => Some(&area.state.lsdb),
        LsaScope::As => Some(&instance.state.lsdb),
        LsaScope::Unknown => None,
    }
}

// LS Request, LS Update and LS Ack packets only make sense once the database
// exchange started.
fn exchange_started(nbr: &Neighbor) -> bool {
    let started = nbr.state >= nsm::State::Exchange;
    if !started {
        Debug::PacketRxIgnore(nbr.router_id, &nbr.state).log();
    }
    started
}

// RFC 2328, section 10.7.
fn process_packet_lsreq(
    nbr: &mut Neighbor,
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
    ls_req: LsRequest,
) -> Result<(), Error> {
    if !exchange_started(nbr) {
        return Ok(());
    }

    for lsa_key in &ls_req.entries {
        let Some(lsdb) = scoped_lsdb(iface, area, instance, lsa_key.lsa_type)
        else {
            continue;
        };
        let Some((_, lse)) = lsdb.get(lsa_entries, lsa_key) else {
            // We described it, so it should be there.
            nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::BadLsReq);
            return Ok(());
        };
        nbr.lists.ls_update.insert(*lsa_key, lse.data.clone());
    }

    if !nbr.lists.ls_update.is_empty() {
        instance.tx.send_lsupd(area.id, iface.id, Some(nbr.id));
    }

    Ok(())
}

// RFC 2328, section 13.
fn process_packet_lsupd(
    nbr_idx: NeighborIndex,
    iface_idx: InterfaceIndex,
    area_idx: AreaIndex,
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    ls_upd: LsUpdate,
) -> Result<(), Error> {
    if !exchange_started(&arenas.neighbors[nbr_idx]) {
        return Ok(());
    }

    // A bad LS Request aborts the rest of the packet.
    let _ = ls_upd.lsas.into_iter().try_for_each(|lsa| {
        process_packet_lsupd_lsa(
            nbr_idx, iface_idx, area_idx, instance, arenas, lsa,
        )
    });

    Ok(())
}

fn process_packet_lsupd_lsa(
    nbr_idx: NeighborIndex,
    iface_idx: InterfaceIndex,
    area_idx: AreaIndex,
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    mut lsa: Lsa,
) -> ControlFlow<()> {
    let now = instance.tx.now();
    let nbr = &arenas.neighbors[nbr_idx];
    let iface = &mut arenas.interfaces[iface_idx];
    let area = &arenas.areas[area_idx];

    // Received LSAs age from their arrival.
    lsa.base_time = Some(now);
    if lsa.hdr.do_not_age() {
        iface.state.statistics.dna_lsas_rcvd += 1;
    }

    // Steps 1 to 3. Every field is validated, not just the checksum.
    if let Err(error) = lsa.validate() {
        Debug::LsaDiscard(nbr.router_id, &lsa.hdr, &error).log();
        return ControlFlow::Continue(());
    }
    let area_type = Some(area.config.area_type());
    if !lsdb::lsa_type_is_valid(area_type, nbr.options, lsa.hdr.lsa_type) {
        // Restarts a synchronization in progress. Full adjacencies just
        // ignore the LSA.
        if !matches!(nbr.state, nsm::State::Exchange | nsm::State::Loading) {
            return ControlFlow::Continue(());
        }
        let nbr = &mut arenas.neighbors[nbr_idx];
        let event =
            nsm::Event::SeqNoMismatch(SeqNoMismatchReason::InvalidLsaType);
        nbr.fsm(iface, area, instance, &arenas.lsa_entries, event);
        return ControlFlow::Break(());
    }

    let lsdb_idx =
        lsdb::lsdb_get_by_lsa_type(iface_idx, area_idx, lsa.hdr.lsa_type);
    let lsdb = match lsdb_idx {
        LsdbIndex::Link(..) => &iface.state.lsdb,
        LsdbIndex::Area(_) => &area.state.lsdb,
        LsdbIndex::As => &instance.state.lsdb,
    };
    let lsa_key = lsa.hdr.key();
    let lse = lsdb.get(&arenas.lsa_entries, &lsa_key).map(|(_, lse)| lse);

    // Step 4: unknown MaxAge LSAs are acknowledged and dropped, unless some
    // database exchange is under way.
    let exchanging = arenas.neighbors.iter().any(|(_, nbr)| {
        matches!(nbr.state, nsm::State::Exchange | nsm::State::Loading)
    });
    if lsa.hdr.is_maxage() && lse.is_none() && !exchanging {
        output::send_lsack_direct(nbr, iface, area, instance, &lsa.hdr);
        return ControlFlow::Continue(());
    }

    let db_cmp = lse.map(|lse| lsa_compare(&lse.data.hdr_at(now), &lsa.hdr));
    if let Some(lse) = lse
        && db_cmp != Some(Ordering::Less)
    {
        let nbr = &mut arenas.neighbors[nbr_idx];
        if db_cmp == Some(Ordering::Equal) {
            lsupd_duplicate(nbr, iface, area, instance, &lsa.hdr);
            return ControlFlow::Continue(());
        }
        let lsa_entries = &arenas.lsa_entries;
        return lsupd_outdated(
            nbr,
            iface,
            area,
            instance,
            lsa_entries,
            lse,
            &lsa.hdr,
        );
    }

    // Step 5: a new instance.
    if lse.is_some_and(|lse| lsdb::lsa_min_arrival_check(lse, now)) {
        Debug::LsaMinArrivalDiscard(nbr.router_id, &lsa.hdr).log();
        return ControlFlow::Continue(());
    }
    lsupd_install(
        nbr_idx, iface_idx, area_idx, lsdb_idx, instance, arenas, lsa,
    );

    ControlFlow::Continue(())
}

// Steps 5b to 5f: floods, installs and acknowledges a new instance.
fn lsupd_install(
    nbr_idx: NeighborIndex,
    iface_idx: InterfaceIndex,
    area_idx: AreaIndex,
    lsdb_idx: LsdbIndex,
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsa: Lsa,
) {
    let lsa = Arc::new(lsa);
    let flooded_back = flood(
        instance,
        &arenas.areas,
        &mut arenas.interfaces,
        &mut arenas.neighbors,
        lsdb_idx,
        &lsa,
        Some((iface_idx, nbr_idx)),
    );

    // Installation also takes the old instance off every retransmission
    // list.
    let lse_idx = lsdb::install(instance, arenas, lsdb_idx, lsa);
    let lse = &mut arenas.lsa_entries[lse_idx];
    lse.flags.insert(LsaEntryFlags::RECEIVED);

    // Flooding back out the receiving interface acknowledges implicitly. A
    // Backup acknowledges only what the DR sent it.
    let nbr = &arenas.neighbors[nbr_idx];
    let area = &arenas.areas[area_idx];
    let iface = &mut arenas.interfaces[iface_idx];
    let from_dr = iface.state.dr == Some(nbr.network_id());
    if !flooded_back
        && (iface.state.ism_state != ism::State::Backup || from_dr)
    {
        iface.enqueue_delayed_ack(area, instance.tx, &lse.data.hdr);
    }

    if lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED) {
        Debug::LsaSelfOriginated(nbr.router_id, &lse.data.hdr).log();
        let (lsdb_id, _) = lsdb_index(
            &instance.state.lsdb,
            &arenas.areas,
            &arenas.interfaces,
            lsdb_idx,
        );
        let lse_id = lse.id;
        instance.tx.lsa_orig_event(
            LsaOriginateEvent::SelfOriginatedLsaRcvd { lsdb_id, lse_id },
        );
    }
}

// Step 7 (RFC 2328, errata 3974): the neighbor sent the instance we have.
// If we were waiting for it to acknowledge that instance, this is an implied
// acknowledgment.
fn lsupd_duplicate(
    nbr: &mut Neighbor,
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_hdr: &LsaHdr,
) {
    if nbr.lists.ls_rxmt.remove(&lsa_hdr.key()).is_none() {
        output::send_lsack_direct(nbr, iface, area, instance, lsa_hdr);
        return;
    }

    nbr.rxmt_lsupd_stop_check();
    if iface.state.ism_state == ism::State::Backup
        && iface.state.dr == Some(nbr.network_id())
    {
        iface.enqueue_delayed_ack(area, instance.tx, lsa_hdr);
    }
}

// Steps 6 and 8: our copy is more recent than the one received.
fn lsupd_outdated(
    nbr: &mut Neighbor,
    iface: &mut Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
    lse: &LsaEntry,
    lsa_hdr: &LsaHdr,
) -> ControlFlow<()> {
    let lsa_key = lsa_hdr.key();

    // The neighbor described an instance newer than what it now sends.
    if nbr.lists.ls_request.contains_key(&lsa_key)
        || nbr.lists.ls_request_pending.contains_key(&lsa_key)
    {
        nbr.fsm(iface, area, instance, lsa_entries, nsm::Event::BadLsReq);
        return ControlFlow::Break(());
    }

    // A copy at MaxAge and MaxSequenceNumber is being flushed before the
    // sequence number wraps.
    let db_hdr = &lse.data.hdr;
    if db_hdr.is_maxage() && db_hdr.seq_no == lsdb::LSA_MAX_SEQ_NO {
        return ControlFlow::Continue(());
    }

    if lsdb::lsa_min_arrival_check(lse, instance.tx.now()) {
        Debug::LsaMinArrivalDiscard(nbr.router_id, lsa_hdr).log();
    } else {
        nbr.lists.ls_update.insert(lsa_key, lse.data.clone());
        instance.tx.send_lsupd(area.id, iface.id, Some(nbr.id));
    }

    ControlFlow::Continue(())
}

// RFC 2328, section 13.7.
fn process_packet_lsack(
    nbr: &mut Neighbor,
    instance: &InstanceUpView<'_>,
    ls_ack: LsAck,
) -> Result<(), Error> {
    if !exchange_started(nbr) {
        return Ok(());
    }

    let now = instance.tx.now();
    for lsa_hdr in &ls_ack.lsa_hdrs {
        let btree_map::Entry::Occupied(entry) =
            nbr.lists.ls_rxmt.entry(lsa_hdr.key())
        else {
            continue;
        };
        if lsa_compare(&entry.get().lsa.hdr_at(now), lsa_hdr) != Ordering::Equal
        {
            Debug::QuestionableAck(nbr.router_id, lsa_hdr).log();
            continue;
        }
        entry.remove();
        nbr.rxmt_lsupd_stop_check();
    }

    Ok(())
}

// ===== Request to send LS Update =====

pub(crate) fn process_send_lsupd(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: Option<NeighborId>,
) -> Result<(), Error> {
    // Lookup area, interface and optional neighbor.
    let (_, area) = arenas.areas.get_by_id(area_id)?;
    let (_, iface) = area
        .interfaces
        .get_mut_by_id(&mut arenas.interfaces, iface_id)?;
    let nbr_idx = match nbr_id {
        Some(nbr_id) => {
            let (nbr_idx, _) = iface
                .state
                .neighbors
                .get_by_id(&arenas.neighbors, nbr_id)?;
            Some(nbr_idx)
        }
        None => None,
    };

    // Send LS Update.
    if nbr_idx.is_none() {
        iface.state.tasks.ls_update_timer = None;
    }
    output::send_lsupd(nbr_idx, iface, area, instance, &mut arenas.neighbors);

    Ok(())
}

// ===== LSA origination event =====

pub(crate) fn process_lsa_orig_event(
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
    event: LsaOriginateEvent,
) -> Result<(), Error> {
    // Check which LSAs need to be reoriginated or flushed.
    lsdb::lsa_orig_event(instance, arenas, event)
}

// ===== LSA origination check =====

pub(crate) fn process_lsa_orig_check(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_id: LsdbId,
    options: Option<Options>,
    lsa_id: Ipv4Addr,
    lsa_body: LsaBody,
) -> Result<(), Error> {
    // Lookup LSDB.
    let (lsdb_idx, _) = lsdb_get(
        &instance.state.lsdb,
        &arenas.areas,
        &arenas.interfaces,
        lsdb_id,
    )?;

    // Attempt to originate LSA.
    lsdb::originate_check(
        instance, arenas, lsdb_idx, options, lsa_id, lsa_body,
    );

    Ok(())
}

// ===== LSA flush event =====

pub(crate) fn process_lsa_flush(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
    reason: LsaFlushReason,
) -> Result<(), Error> {
    // Lookup LSA entry and its corresponding LSDB.
    let (lsdb_idx, lsdb) = lsdb_get_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        &mut arenas.interfaces,
        lsdb_id,
    )?;
    let (lse_idx, _) =
        lsdb.get_mut_by_id(&mut arenas.lsa_entries, lse_id)?;

    // Flush LSA.
    lsdb::flush(instance, arenas, lsdb_idx, lse_idx, reason);

    Ok(())
}

// ===== Timer expiration =====

// Processes the firing of a timer, ignoring it if it's no longer current.
pub(crate) fn process_timer(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    msg: TimerMsg,
) -> Result<(), Error> {
    let tag = msg.tag;
    match msg.kind {
        TimerKind::HelloInterval { area_id, iface_id } => {
            let (_, area) = arenas.areas.get_by_id(area_id)?;
            let (_, iface) = area
                .interfaces
                .get_mut_by_id(&mut arenas.interfaces, iface_id)?;
            let Some(task) = iface
                .state
                .tasks
                .hello_interval
                .as_mut()
                .filter(|task| task.is_current(tag))
            else {
                return Ok(());
            };
            let kind = TimerKind::HelloInterval { area_id, iface_id };
            instance.tx.rearm(task, kind);

            // RFC 1793 - Section 3.2.1:
            // Hellos are no longer sent over a point-to-point demand circuit
            // once its neighbor is suppressed.
            let suppressed = iface.config.if_type == InterfaceType::PointToPoint
                && iface.state.neighbors.count() > 0
                && iface
                    .state
                    .neighbors
                    .iter(&arenas.neighbors)
                    .all(|nbr| nbr.hello_suppressed);
            if !suppressed {
                output::send_hello(iface, area, instance);
            }
        }
        TimerKind::WaitTimer { area_id, iface_id } => {
            let (_, area) = arenas.areas.get_by_id(area_id)?;
            let (_, iface) = area
                .interfaces
                .get_mut_by_id(&mut arenas.interfaces, iface_id)?;
            if !iface
                .state
                .tasks
                .wait_timer
                .as_ref()
                .is_some_and(|task| task.is_current(tag))
            {
                return Ok(());
            }

            iface.fsm(
                area,
                instance,
                &mut arenas.neighbors,
                &arenas.lsa_entries,
                ism::Event::WaitTimer,
            );
        }
        TimerKind::InactivityTimer {
            area_id,
            iface_id,
            nbr_id,
        } => {
            let (_, area) = arenas.areas.get_by_id(area_id)?;
            let (_, iface) =
                area.interfaces.get_by_id(&arenas.interfaces, iface_id)?;
            let (_, nbr) =
                iface.state.neighbors.get_by_id(&arenas.neighbors, nbr_id)?;
            if !nbr
                .tasks
                .inactivity_timer
                .as_ref()
                .is_some_and(|task| task.is_current(tag))
            {
                return Ok(());
            }

            process_nsm_event(
                instance,
                arenas,
                area_id,
                iface_id,
                nbr_id,
                nsm::Event::InactivityTimer,
            )?;
        }
        TimerKind::RxmtInterval {
            area_id,
            iface_id,
            nbr_id,
            packet_type,
        } => {
            process_packet_rxmt(
                instance,
                arenas,
                tag,
                area_id,
                iface_id,
                nbr_id,
                packet_type,
            )?;
        }
        TimerKind::DbDescFree {
            area_id,
            iface_id,
            nbr_id,
        } => {
            let (_, area) = arenas.areas.get_by_id(area_id)?;
            let (_, iface) = area
                .interfaces
                .get_mut_by_id(&mut arenas.interfaces, iface_id)?;
            let (_, nbr) = iface
                .state
                .neighbors
                .get_mut_by_id(&mut arenas.neighbors, nbr_id)?;
            if !nbr
                .tasks
                .dbdesc_free_timer
                .as_ref()
                .is_some_and(|task| task.is_current(tag))
            {
                return Ok(());
            }

            // Free last sent/received Database Description packets.
            nbr.tasks.dbdesc_free_timer = None;
            nbr.last_rcvd_dbdesc = None;
            nbr.last_sent_dbdesc = None;
        }
        TimerKind::SendLsUpdate { area_id, iface_id } => {
            let (_, area) = arenas.areas.get_by_id(area_id)?;
            let (_, iface) =
                area.interfaces.get_by_id(&arenas.interfaces, iface_id)?;
            if !iface
                .state
                .tasks
                .ls_update_timer
                .as_ref()
                .is_some_and(|task| task.is_current(tag))
            {
                return Ok(());
            }

            process_send_lsupd(
                instance,
                arenas,
                area_id,
                iface_id,
                None,
            )?;
        }
        TimerKind::DelayedAck { area_id, iface_id } => {
            let (_, area) = arenas.areas.get_by_id(area_id)?;
            let (_, iface) = area
                .interfaces
                .get_mut_by_id(&mut arenas.interfaces, iface_id)?;
            if !iface
                .state
                .tasks
                .ls_delayed_ack
                .as_ref()
                .is_some_and(|task| task.is_current(tag))
            {
                return Ok(());
            }

            // Send delayed LS Ack.
            iface.state.tasks.ls_delayed_ack = None;
            let neighbors = &arenas.neighbors;
            output::send_lsack_delayed(iface, area, instance, neighbors);
        }
        TimerKind::LsaOrigDelayed { lsdb_id, lsa_key } => {
            process_lsa_orig_delayed_timer(
                instance,
                arenas,
                tag,
                lsdb_id,
                lsa_key,
            )?;
        }
        TimerKind::LsaRefresh { lsdb_id, lse_id } => {
            process_lsa_refresh(
                instance,
                arenas,
                tag,
                lsdb_id,
                lse_id,
            )?;
        }
        TimerKind::LsaExpiry { lsdb_id, lse_id } => {
            let (lsdb_idx, lsdb) = lsdb_get(
                &instance.state.lsdb,
                &arenas.areas,
                &arenas.interfaces,
                lsdb_id,
            )?;
            let (lse_idx, lse) =
                lsdb.get_by_id(&arenas.lsa_entries, lse_id)?;
            if !lse
                .expiry_timer
                .as_ref()
                .is_some_and(|task| task.is_current(tag))
            {
                return Ok(());
            }

            let reason = LsaFlushReason::Expiry;
            lsdb::flush(instance, arenas, lsdb_idx, lse_idx, reason);
        }
        TimerKind::LsdbMaxAgeSweep { lsdb_id } => {
            process_lsdb_maxage_sweep_interval(instance, arenas, tag, lsdb_id)?;
        }
        TimerKind::SpfDelay => {
            if !instance
                .state
                .spf_delay_timer
                .as_ref()
                .is_some_and(|task| task.is_current(tag))
            {
                return Ok(());
            }

            instance.state.spf_delay_timer = None;
            spf::run(instance, arenas);
        }
        TimerKind::StartDelay => {
            if !instance
                .state
                .start_delay_timer
                .as_ref()
                .is_some_and(|task| task.is_current(tag))
            {
                return Ok(());
            }

            instance.state.start_delay_timer = None;
            instance::start_interfaces(instance, arenas);
        }
    }

    Ok(())
}

// ===== Packet retransmission =====

fn process_packet_rxmt(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    tag: TimerTag,
    area_id: AreaId,
    iface_id: InterfaceId,
    nbr_id: NeighborId,
    packet_type: RxmtPacketType,
) -> Result<(), Error> {
    // Lookup area, interface and neighbor.
    let (_, area) = arenas.areas.get_by_id(area_id)?;
    let (_, iface) =
        area.interfaces.get_mut_by_id(&mut arenas.interfaces, iface_id)?;
    let (_, nbr) = iface
        .state
        .neighbors
        .get_mut_by_id(&mut arenas.neighbors, nbr_id)?;
    let Some(task) = nbr
        .rxmt_task_mut(packet_type)
        .filter(|task| task.is_current(tag))
    else {
        return Ok(());
    };
    let kind = TimerKind::RxmtInterval {
        area_id,
        iface_id,
        nbr_id,
        packet_type,
    };
    instance.tx.rearm(task, kind);

    // Retransmit packet.
    match packet_type {
        RxmtPacketType::DbDesc => {
            // Give up on neighbors that stopped responding.
            nbr.dbdesc_rxmt_count += 1;
            if let Some(max) = instance.config.max_dd_retransmissions
                && nbr.dbdesc_rxmt_count > max
            {
                instance.tx.nsm_event(
                    area.id,
                    iface.id,
                    nbr.id,
                    nsm::Event::Kill,
                );
                return Ok(());
            }

            output::rxmt_dbdesc(nbr, iface, instance);
        }
        RxmtPacketType::LsRequest => {
            output::rxmt_lsreq(nbr, iface, area, instance);
        }
        RxmtPacketType::LsUpdate => {
            let count = output::rxmt_lsupd(nbr, iface, area, instance);
            instance.state.statistics.lsa_retransmitted += count as u32;
        }
    }

    Ok(())
}

// ===== LSA delayed origination timer =====

fn process_lsa_orig_delayed_timer(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    tag: TimerTag,
    lsdb_id: LsdbId,
    lsa_key: LsaKey,
) -> Result<(), Error> {
    // Lookup LSDB.
    let (lsdb_idx, lsdb) = lsdb_get_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        &mut arenas.interfaces,
        lsdb_id,
    )?;
    if !lsdb
        .delayed_orig
        .get(&lsa_key)
        .is_some_and(|ldo| ldo.timeout.is_current(tag))
    {
        return Ok(());
    }

    // Originate LSA.
    if let Some(ldo) = lsdb.delayed_orig.remove(&lsa_key) {
        lsdb::originate(instance, arenas, lsdb_idx, ldo.data);
    }

    Ok(())
}

// ===== LSA refresh event =====

fn process_lsa_refresh(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    tag: TimerTag,
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
) -> Result<(), Error> {
    // Lookup LSA entry and its corresponding LSDB.
    let (lsdb_idx, lsdb) = lsdb_get(
        &instance.state.lsdb,
        &arenas.areas,
        &arenas.interfaces,
        lsdb_id,
    )?;
    let (_, lse) = lsdb.get_by_id(&arenas.lsa_entries, lse_id)?;
    if !lse
        .refresh_timer
        .as_ref()
        .is_some_and(|task| task.is_current(tag))
    {
        return Ok(());
    }

    // Only our own LSAs carry a refresh timer.
    debug_assert!(lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED));
    Debug::LsaRefresh(&lse.data.hdr).log();

    let seq_no = lse.data.hdr.seq_no.wrapping_add(1);
    let lsa = lsa_reissue(&lse.data, seq_no, instance);
    instance.state.statistics.lsa_refreshed += 1;
    lsdb::originate(instance, arenas, lsdb_idx, lsa);

    Ok(())
}

// Fresh instance of an LSA with the same contents.
fn lsa_reissue(lsa: &Lsa, seq_no: u32, instance: &InstanceUpView<'_>) -> Lsa {
    let hdr = &lsa.hdr;
    let body = lsa.body.clone();
    let now = instance.tx.now();
    Lsa::new(0, hdr.options, hdr.lsa_id, hdr.adv_rtr, seq_no, body, now)
}

// ===== LSDB MaxAge sweep timer =====

fn process_lsdb_maxage_sweep_interval(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    tag: TimerTag,
    lsdb_id: LsdbId,
) -> Result<(), Error> {
    // Lookup LSDB.
    let (lsdb_idx, lsdb) = lsdb_get_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        &mut arenas.interfaces,
        lsdb_id,
    )?;
    let Some(task) = lsdb
        .maxage_sweeper_mut()
        .filter(|task| task.is_current(tag))
    else {
        return Ok(());
    };
    instance
        .tx
        .rearm(task, TimerKind::LsdbMaxAgeSweep { lsdb_id });

    // MaxAge LSAs stay while a database exchange could still list them
    // (RFC 2328, section 14).
    let neighbors = &arenas.neighbors;
    if neighbors.iter().any(|(_, nbr)| {
        matches!(nbr.state, nsm::State::Exchange | nsm::State::Loading)
    }) {
        return Ok(());
    }

    // Only instances every neighbor acknowledged can go.
    let awaiting_ack = |lsa: &Arc<Lsa>| {
        neighbors.iter().any(|(_, nbr)| {
            nbr.lists
                .ls_rxmt
                .get(&lsa.hdr.key())
                .is_some_and(|entry| Arc::ptr_eq(lsa, &entry.lsa))
        })
    };
    let lse_idxs = lsdb
        .maxage_lsas
        .iter()
        .copied()
        .filter(|lse_idx| !awaiting_ack(&arenas.lsa_entries[*lse_idx].data))
        .sorted_by_key(|lse_idx| arenas.lsa_entries[*lse_idx].data.hdr.key());

    for lse_idx in lse_idxs {
        let (_, lsdb) = lsdb_index_mut(
            &mut instance.state.lsdb,
            &mut arenas.areas,
            &mut arenas.interfaces,
            lsdb_idx,
        );
        let lsa_key = arenas.lsa_entries[lse_idx].data.hdr.key();

        // A flushed LSA whose sequence number wrapped comes back at
        // InitialSequenceNumber.
        match lsdb.seqno_wrapping.remove(&lsa_key) {
            Some(lsa) => {
                let seq_no = lsdb::LSA_INIT_SEQ_NO;
                let lsa = lsa_reissue(&lsa, seq_no, instance);
                lsdb::originate(instance, arenas, lsdb_idx, lsa);
            }
            None => lsdb.delete(&mut arenas.lsa_entries, lse_idx),
        }
    }

    Ok(())
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use ospfsim_utils::sim::SimTime;

    use super::*;
    use crate::config::{AreaCfg, InstanceCfg, InterfaceCfg};
    use crate::instance::{InstanceChannelsTx, InstanceState};
    use crate::packet::PacketHdr;
    use crate::packet::lsa::{LsaRouter, LsaRouterFlags};

    const ROUTER_ID: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 1);
    const PEER_ID: Ipv4Addr = Ipv4Addr::new(2, 2, 2, 2);
    const PEER_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

    fn config() -> InstanceCfg {
        InstanceCfg {
            router_id: ROUTER_ID,
            areas: vec![AreaCfg {
                area_id: Ipv4Addr::UNSPECIFIED,
                ..Default::default()
            }],
            interfaces: vec![InterfaceCfg {
                name: "eth0".to_owned(),
                ifindex: 1,
                area_id: Ipv4Addr::UNSPECIFIED,
                address: "10.0.0.1/24".parse().unwrap(),
                if_type: InterfaceType::PointToPoint,
                ..Default::default()
            }],
            ..Default::default()
        }
    }

    // Builds the arenas of a router with the given configuration, with all
    // interfaces administratively up but not started.
    fn arenas(config: &InstanceCfg) -> InstanceArenas {
        let mut arenas = InstanceArenas::default();
        for area_cfg in &config.areas {
            let (_, area) = arenas.areas.insert(area_cfg.area_id);
            area.set_config(area_cfg);
        }
        for iface_cfg in &config.interfaces {
            let (_, area) =
                arenas.areas.get_mut_by_area_id(iface_cfg.area_id).unwrap();
            let (_, iface) = area.interfaces.insert(
                &mut arenas.interfaces,
                &iface_cfg.name,
                iface_cfg.ifindex,
            );
            iface.config = iface_cfg.clone();
            iface.system.operative = true;
        }
        arenas
    }

    fn hello(neighbors: BTreeSet<Ipv4Addr>, hello_interval: u16) -> Vec<u8> {
        Packet::Hello(Hello {
            hdr: PacketHdr::new(
                PacketType::Hello,
                PEER_ID,
                Ipv4Addr::UNSPECIFIED,
            ),
            network_mask: Ipv4Addr::new(255, 255, 255, 0),
            hello_interval,
            options: Options::E,
            priority: 1,
            dead_interval: 40,
            dr: None,
            bdr: None,
            neighbors,
        })
        .encode()
        .to_vec()
    }

    fn peer_state(
        arenas: &InstanceArenas,
    ) -> Option<nsm::State> {
        arenas
            .neighbors
            .iter()
            .find(|(_, nbr)| nbr.router_id == PEER_ID)
            .map(|(_, nbr)| nbr.state)
    }

    #[test]
    fn hello_creates_neighbor_and_forms_adjacency() {
        let config = config();
        let tx = InstanceChannelsTx::new(0);
        let mut state = InstanceState::new(ROUTER_ID);
        let mut arenas = arenas(&config);
        let mut instance = InstanceUpView {
            config: &config,
            state: &mut state,
            tx: &tx,
        };
        instance::start_interfaces(&instance, &mut arenas);

        // One-way Hello.
        let packet = hello(BTreeSet::new(), 10);
        process_packet(&mut instance, &mut arenas, 1, PEER_ADDR, &packet)
            .unwrap();
        assert_eq!(peer_state(&arenas), Some(nsm::State::Init));

        // Two-way Hello. Point-to-point neighbors always become adjacent.
        let packet = hello([ROUTER_ID].into(), 10);
        process_packet(&mut instance, &mut arenas, 1, PEER_ADDR, &packet)
            .unwrap();
        assert_eq!(peer_state(&arenas), Some(nsm::State::ExStart));

        let iface = arenas.interfaces.iter().next().unwrap().1;
        assert_eq!(iface.state.statistics.pkts_rcvd.hello, 2);
        assert_eq!(iface.state.statistics.pkts_rejected, 0);
    }

    #[test]
    fn hello_interval_mismatch_is_rejected() {
        let config = config();
        let tx = InstanceChannelsTx::new(0);
        let mut state = InstanceState::new(ROUTER_ID);
        let mut arenas = arenas(&config);
        let mut instance = InstanceUpView {
            config: &config,
            state: &mut state,
            tx: &tx,
        };
        instance::start_interfaces(&instance, &mut arenas);

        let packet = hello(BTreeSet::new(), 5);
        let result =
            process_packet(&mut instance, &mut arenas, 1, PEER_ADDR, &packet);
        assert!(matches!(
            result,
            Err(Error::InterfaceCfgError(
                _,
                _,
                PacketType::Hello,
                InterfaceCfgError::HelloIntervalMismatch(5, 10)
            ))
        ));
        assert_eq!(peer_state(&arenas), None);

        let iface = arenas.interfaces.iter().next().unwrap().1;
        assert_eq!(iface.state.statistics.pkts_rejected, 1);
    }

    #[test]
    fn corrupted_packet_is_rejected() {
        let config = config();
        let tx = InstanceChannelsTx::new(0);
        let mut state = InstanceState::new(ROUTER_ID);
        let mut arenas = arenas(&config);
        let mut instance = InstanceUpView {
            config: &config,
            state: &mut state,
            tx: &tx,
        };
        instance::start_interfaces(&instance, &mut arenas);

        let mut packet = hello(BTreeSet::new(), 10);
        let last = packet.len() - 1;
        packet[last] ^= 0xff;
        let result =
            process_packet(&mut instance, &mut arenas, 1, PEER_ADDR, &packet);
        assert!(matches!(result, Err(Error::PacketDecodeError(_))));
        assert_eq!(peer_state(&arenas), None);
    }

    #[test]
    fn stale_timer_is_ignored() {
        let config = config();
        let tx = InstanceChannelsTx::new(0);
        let mut state = InstanceState::new(ROUTER_ID);
        let mut arenas = arenas(&config);
        let mut instance = InstanceUpView {
            config: &config,
            state: &mut state,
            tx: &tx,
        };

        // Reset the SPF timer. Only the latest generation is honored.
        let mut task = tx.timeout(TimerKind::SpfDelay, Default::default());
        let stale_tag = task.tag();
        tx.reset(&mut task, TimerKind::SpfDelay);
        let current_tag = task.tag();
        instance.state.spf_delay_timer = Some(task);

        let msg = TimerMsg {
            tag: stale_tag,
            kind: TimerKind::SpfDelay,
        };
        process_timer(&mut instance, &mut arenas, msg).unwrap();
        assert!(instance.state.spf_delay_timer.is_some());
        assert_eq!(instance.state.statistics.spf_runs, 0);

        let msg = TimerMsg {
            tag: current_tag,
            kind: TimerKind::SpfDelay,
        };
        process_timer(&mut instance, &mut arenas, msg).unwrap();
        assert!(instance.state.spf_delay_timer.is_none());
        assert_eq!(instance.state.statistics.spf_runs, 1);
    }

    #[test]
    fn seqno_wrapping_flushes_before_reoriginating() {
        let config = config();
        let tx = InstanceChannelsTx::new(0);
        tx.set_now(SimTime::from_secs(100));
        let mut state = InstanceState::new(ROUTER_ID);
        let mut arenas = arenas(&config);
        let mut instance = InstanceUpView {
            config: &config,
            state: &mut state,
            tx: &tx,
        };
        let (area_idx, area) =
            arenas.areas.get_by_area_id(Ipv4Addr::UNSPECIFIED).unwrap();
        let lsdb_idx = LsdbIndex::Area(area_idx);
        let lsdb_id = LsdbId::Area(area.id);

        // Self-originated Router-LSA about to wrap its sequence number.
        let body = LsaBody::Router(LsaRouter {
            flags: LsaRouterFlags::empty(),
            links: vec![],
        });
        let lsa = Lsa::new(
            0,
            Options::E,
            ROUTER_ID,
            ROUTER_ID,
            lsdb::LSA_MAX_SEQ_NO,
            body,
            tx.now(),
        );
        let lsa_key = lsa.hdr.key();
        let lse_idx = lsdb::install(
            &mut instance,
            &mut arenas,
            lsdb_idx,
            Arc::new(lsa),
        );
        let lse = &mut arenas.lsa_entries[lse_idx];
        let task = crate::tasks::lsa_refresh_timer(lsdb_id, lse.id, &tx);
        let refresh_tag = task.tag();
        let lse_id = lse.id;
        lse.refresh_timer = Some(task);

        // Refresh: the LSA is prematurely aged instead of being originated
        // with an invalid sequence number.
        tx.set_now(SimTime::from_secs(1900));
        let msg = TimerMsg {
            tag: refresh_tag,
            kind: TimerKind::LsaRefresh { lsdb_id, lse_id },
        };
        process_timer(&mut instance, &mut arenas, msg).unwrap();
        let area = &arenas.areas[area_idx];
        let (_, lse) =
            area.state.lsdb.get(&arenas.lsa_entries, &lsa_key).unwrap();
        assert!(lse.data.hdr.is_maxage());
        assert_eq!(lse.data.hdr.seq_no, lsdb::LSA_MAX_SEQ_NO);
        assert!(area.state.lsdb.seqno_wrapping.contains_key(&lsa_key));
        assert_eq!(instance.state.statistics.lsa_flushed, 1);

        // MaxAge sweep: the flushed instance is replaced by a new one that
        // starts over from the initial sequence number.
        let area = &mut arenas.areas[area_idx];
        let sweep_tag = area.state.lsdb.maxage_sweeper_mut().unwrap().tag();
        tx.set_now(SimTime::from_secs(1902));
        let msg = TimerMsg {
            tag: sweep_tag,
            kind: TimerKind::LsdbMaxAgeSweep { lsdb_id },
        };
        process_timer(&mut instance, &mut arenas, msg).unwrap();
        let area = &arenas.areas[area_idx];
        let (_, lse) =
            area.state.lsdb.get(&arenas.lsa_entries, &lsa_key).unwrap();
        assert!(!lse.data.hdr.is_maxage());
        assert_eq!(lse.data.hdr.seq_no, lsdb::LSA_INIT_SEQ_NO);
        assert!(area.state.lsdb.seqno_wrapping.is_empty());
        assert!(
            area.state
                .lsdb
                .iter(&arenas.lsa_entries)
                .all(|(_, lse)| lse.data.hdr.seq_no
                    != lsdb::LSA_MAX_SEQ_NO.wrapping_add(1))
        );
    }

    #[test]
    fn maxage_sweep_waits_for_database_exchange() {
        let config = config();
        let tx = InstanceChannelsTx::new(0);
        let mut state = InstanceState::new(ROUTER_ID);
        let mut arenas = arenas(&config);
        let mut instance = InstanceUpView {
            config: &config,
            state: &mut state,
            tx: &tx,
        };
        let (area_idx, area) =
            arenas.areas.get_by_area_id(Ipv4Addr::UNSPECIFIED).unwrap();
        let lsdb_idx = LsdbIndex::Area(area_idx);
        let lsdb_id = LsdbId::Area(area.id);
        let iface_idx = area.interfaces.indexes().next().unwrap();

        // MaxAge LSA from another router.
        let body = LsaBody::Router(LsaRouter {
            flags: LsaRouterFlags::empty(),
            links: vec![],
        });
        let mut lsa =
            Lsa::new(0, Options::E, PEER_ID, PEER_ID, 1, body, tx.now());
        lsa.set_maxage(tx.now());
        let lsa_key = lsa.hdr.key();
        lsdb::install(&mut instance, &mut arenas, lsdb_idx, Arc::new(lsa));

        // Neighbor in the middle of a database exchange.
        let iface = &mut arenas.interfaces[iface_idx];
        let (_, nbr) = iface.state.neighbors.insert(
            &mut arenas.neighbors,
            PEER_ID,
            PEER_ADDR,
            0,
        );
        nbr.state = nsm::State::Exchange;

        let area = &mut arenas.areas[area_idx];
        let sweep_tag = area.state.lsdb.maxage_sweeper_mut().unwrap().tag();
        let msg = TimerMsg {
            tag: sweep_tag,
            kind: TimerKind::LsdbMaxAgeSweep { lsdb_id },
        };
        process_timer(&mut instance, &mut arenas, msg).unwrap();
        let area = &arenas.areas[area_idx];
        assert!(area.state.lsdb.get(&arenas.lsa_entries, &lsa_key).is_some());

        // Once the exchange is over the LSA can be removed.
        let (_, nbr) = arenas.neighbors.iter_mut().next().unwrap();
        nbr.state = nsm::State::Full;
        let area = &mut arenas.areas[area_idx];
        let sweep_tag = area.state.lsdb.maxage_sweeper_mut().unwrap().tag();
        let msg = TimerMsg {
            tag: sweep_tag,
            kind: TimerKind::LsdbMaxAgeSweep { lsdb_id },
        };
        process_timer(&mut instance, &mut arenas, msg).unwrap();
        let area = &arenas.areas[area_idx];
        assert!(area.state.lsdb.get(&arenas.lsa_entries, &lsa_key).is_none());
    }
}
