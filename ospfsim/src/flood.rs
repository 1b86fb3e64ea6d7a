//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::sync::Arc;

use ospfsim_utils::sim::SimTime;
use smallvec::SmallVec;

use crate::area::Area;
use crate::collections::{
    AreaIndex, Areas, Arena, InterfaceIndex, LsdbIndex, NeighborIndex,
};
use crate::instance::InstanceUpView;
use crate::interface::{Interface, ism};
use crate::lsdb;
use crate::neighbor::{LsaRxmtEntry, Neighbor, nsm};
use crate::packet::lsa::Lsa;

// Interface and neighbor the LSA was received from.
type FloodSource = Option<(InterfaceIndex, NeighborIndex)>;

// ===== global functions =====

// Floods an LSA throughout its flooding scope (RFC 2328, section 13.3).
//
// Returns whether the LSA went back out the interface it was received on,
// in which case no delayed acknowledgment is needed.
pub(crate) fn flood(
    instance: &InstanceUpView<'_>,
    areas: &Areas,
    interfaces: &mut Arena<Interface>,
    neighbors: &mut Arena<Neighbor>,
    lsdb_idx: LsdbIndex,
    lsa: &Arc<Lsa>,
    src: FloodSource,
) -> bool {
    let mut flooded_back = false;
    for (area_idx, iface_idx) in flood_targets(areas, lsdb_idx, lsa) {
        let area = &areas[area_idx];
        flooded_back |= flood_interface(
            iface_idx, area, instance, interfaces, neighbors, lsa, src,
        );
    }
    flooded_back
}

// ===== helper functions =====

// Interfaces covered by the LSDB's flooding scope.
//
// AS-scoped LSAs skip the areas that can't hold them (stub and NSSA).
fn flood_targets(
    areas: &Areas,
    lsdb_idx: LsdbIndex,
    lsa: &Lsa,
) -> SmallVec<[(AreaIndex, InterfaceIndex); 8]> {
    let area_ifaces = |area_idx: AreaIndex| {
        areas[area_idx]
            .interfaces
            .indexes()
            .map(move |iface_idx| (area_idx, iface_idx))
    };

    match lsdb_idx {
        LsdbIndex::Link(area_idx, iface_idx) => {
            [(area_idx, iface_idx)].into_iter().collect()
        }
        LsdbIndex::Area(area_idx) => area_ifaces(area_idx).collect(),
        LsdbIndex::As => areas
            .indexes()
            .filter(|area_idx| {
                let area_type = areas[*area_idx].config.area_type();
                lsdb::lsa_type_is_valid(
                    Some(area_type),
                    None,
                    lsa.hdr.lsa_type,
                )
            })
            .flat_map(area_ifaces)
            .collect(),
    }
}

fn flood_interface(
    iface_idx: InterfaceIndex,
    area: &Area,
    instance: &InstanceUpView<'_>,
    interfaces: &mut Arena<Interface>,
    neighbors: &mut Arena<Neighbor>,
    lsa: &Arc<Lsa>,
    src: FloodSource,
) -> bool {
    let iface = &mut interfaces[iface_idx];
    let now = instance.tx.now();

    // Step 1: queue the LSA for retransmission to every neighbor that
    // still needs it.
    let mut queued = false;
    for nbr_idx in iface.state.neighbors.indexes() {
        let nbr = &mut neighbors[nbr_idx];
        if !nbr_needs_lsa(nbr, iface, area, instance, lsa, now) {
            continue;
        }
        if src.is_some_and(|(_, src_nbr_idx)| src_nbr_idx == nbr_idx) {
            continue;
        }

        let entry = LsaRxmtEntry {
            lsa: lsa.clone(),
            sent_time: now,
        };
        nbr.lists.ls_rxmt.insert(lsa.hdr.key(), entry);
        nbr.rxmt_lsupd_start_check(iface, area, instance);
        queued = true;
    }

    // Step 2: nobody on this interface needs the LSA.
    if !queued {
        return false;
    }

    // Steps 3 and 4: the LSA arrived on this interface.
    let mut flooded_back = false;
    if let Some((src_iface_idx, src_nbr_idx)) = src
        && src_iface_idx == iface_idx
    {
        if sent_by_designated_router(iface, &neighbors[src_nbr_idx])
            || iface.state.ism_state == ism::State::Backup
        {
            return false;
        }
        flooded_back = true;
    }

    // Step 5: transmission is deferred so that several LSAs can share the
    // same LS Update.
    iface.enqueue_ls_update(area, instance.tx, lsa.hdr.key(), lsa.clone());

    flooded_back
}

// Steps 1.a and 1.b. Updates the neighbor's request list as a side effect.
fn nbr_needs_lsa(
    nbr: &mut Neighbor,
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa: &Lsa,
    now: SimTime,
) -> bool {
    if nbr.state < nsm::State::Exchange {
        return false;
    }
    if !lsdb::lsa_type_is_valid(None, nbr.options, lsa.hdr.lsa_type) {
        return false;
    }
    if nbr.state == nsm::State::Full {
        return true;
    }

    // The adjacency is still being formed: the neighbor may have requested
    // this LSA already.
    let lsa_key = lsa.hdr.key();
    let requested = nbr
        .lists
        .ls_request
        .get(&lsa_key)
        .or_else(|| nbr.lists.ls_request_pending.get(&lsa_key));
    let Some(requested) = requested else {
        return true;
    };
    let cmp = lsdb::lsa_compare(&lsa.hdr_at(now), requested);
    if cmp == Ordering::Less {
        return false;
    }

    nbr.lists.ls_request.remove(&lsa_key);
    nbr.lists.ls_request_pending.remove(&lsa_key);
    nbr.loading_done_check(iface, area, instance);

    // Same instance: the neighbor will get it through the database exchange.
    cmp == Ordering::Greater
}

// Checks whether a broadcast interface's neighbor is its DR or BDR, in which
// case the other routers on the segment already received the LSA.
fn sent_by_designated_router(iface: &Interface, nbr: &Neighbor) -> bool {
    if !iface.is_broadcast() {
        return false;
    }
    let net_id = Some(nbr.network_id());
    iface.state.dr == net_id || iface.state.bdr == net_id
}
