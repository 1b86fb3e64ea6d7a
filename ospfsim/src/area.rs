//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use ospfsim_utils::ip::{self, Ipv4NetworkExt};
use serde::{Deserialize, Serialize};

use crate::collections::{
    AreaId, AreaIndex, Areas, Arena, Interfaces, Lsdb, LsdbId,
};
use crate::config::{AreaCfg, InstanceCfg, RangeCfg};
use crate::debug::LsaFlushReason;
use crate::instance::InstanceUpView;
use crate::interface::Interface;
use crate::lsdb::{self, LSA_INFINITY, LsaEntry, LsaEntryFlags};
use crate::packet::lsa::{LsaKey, LsaType, LsaTypeCode};
use crate::packet::{Options, PacketType};
use crate::route::{Nexthop, PathType, RouteNetFlags, RouteRtr};
use crate::spf::{Vertex, VertexId};

#[derive(Debug)]
pub struct Area {
    pub id: AreaId,
    pub area_id: Ipv4Addr,
    pub config: AreaCfg,
    pub state: AreaState,
    // Configured address ranges, keyed by their masked prefix.
    pub ranges: BTreeMap<Ipv4Network, Range>,
    pub interfaces: Interfaces,
}

// OSPF area state.
#[derive(Debug)]
pub struct AreaState {
    // LSDB of area-scope LSAs.
    pub lsdb: Lsdb,
    // Indicates whether the area can carry data traffic that neither
    // originates nor terminates in the area itself.
    pub transit_capability: bool,
    // Shortest-path tree.
    pub spt: BTreeMap<VertexId, Vertex>,
    // Table of all routers in the area.
    pub routers: BTreeMap<Ipv4Addr, RouteRtr>,
    // Table of summaries originated into this area.
    pub net_summaries: BTreeMap<Ipv4Network, u32>,
    pub rtr_summaries: BTreeMap<Ipv4Addr, (Options, u32)>,
    // Whether this router is the NSSA translator of the area.
    pub nssa_translator: bool,
    // Whether every router in the area supports demand circuits.
    pub dc_capable: bool,
    // Statistics.
    pub spf_run_count: u32,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum AreaType {
    Normal,
    // No AS-external LSAs.
    Stub,
    // Stub area importing externals through Type-7 LSAs (RFC 3101).
    Nssa,
}

#[derive(Debug, Default)]
pub struct Range {
    pub config: RangeCfg,
    // Cost of the most expensive component, `None` when the range has no
    // active component.
    pub cost: Option<u32>,
}

// Represents the possible locations of the OSPF Options field.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OptionsLocation {
    Packet(PacketType),
    Lsa,
}

// ===== impl Area =====

impl Area {
    // Create new area.
    pub(crate) fn new(id: AreaId, area_id: Ipv4Addr) -> Self {
        let config = AreaCfg {
            area_id,
            ..Default::default()
        };
        Self {
            id,
            area_id,
            config,
            state: Default::default(),
            ranges: Default::default(),
            interfaces: Default::default(),
        }
    }

    // Applies the area configuration.
    pub(crate) fn set_config(&mut self, config: &AreaCfg) {
        self.config = config.clone();
        self.ranges = config
            .ranges
            .iter()
            .map(|range| {
                let prefix = range.prefix.apply_mask();
                let range = Range {
                    config: range.clone(),
                    cost: None,
                };
                (prefix, range)
            })
            .collect();
    }

    // Active areas have at least one operational interface.
    pub(crate) fn is_active(&self, interfaces: &Arena<Interface>) -> bool {
        self.interfaces.iter(interfaces).any(|iface| !iface.is_down())
    }

    pub(crate) fn is_backbone(&self) -> bool {
        self.area_id == Ipv4Addr::UNSPECIFIED
    }

    // Returns whether the area contains a router that doesn't support demand
    // circuits.
    pub(crate) fn dc_incapable_routers(
        &self,
        lsa_entries: &Arena<LsaEntry>,
    ) -> bool {
        self.state
            .lsdb
            .iter_by_type(lsa_entries, LsaTypeCode::Router.into())
            .map(|(_, lse)| &lse.data.hdr)
            .filter(|hdr| !hdr.is_maxage())
            .any(|hdr| !hdr.options.contains(Options::DC))
    }

    // RFC 1793 - Section 2.5:
    // The area supports DoNotAge LSAs when all its routers set the DC-bit in
    // their router-LSAs and no indication-LSA is present.
    pub(crate) fn update_dc_capability(
        &mut self,
        lsa_entries: &Arena<LsaEntry>,
    ) {
        let indication = self
            .state
            .lsdb
            .iter_by_type(lsa_entries, LsaTypeCode::SummaryRouter.into())
            .filter(|(_, lse)| {
                !lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED)
            })
            .any(|(_, lse)| lsdb::lsa_is_indication(&lse.data));
        self.state.dc_capable =
            !indication && !self.dc_incapable_routers(lsa_entries);
    }
}

// ===== impl AreaState =====

impl Default for AreaState {
    fn default() -> AreaState {
        // Demand circuit support is assumed until some LSA says otherwise.
        AreaState {
            dc_capable: true,
            lsdb: Lsdb::default(),
            spt: BTreeMap::new(),
            routers: BTreeMap::new(),
            net_summaries: BTreeMap::new(),
            rtr_summaries: BTreeMap::new(),
            transit_capability: false,
            nssa_translator: false,
            spf_run_count: 0,
        }
    }
}

// ===== global functions =====

// Return the options associated to the provided area.
//
// These options are used for sending OSPF Hello and Database Description
// packets, as well as for originating LSAs.
pub(crate) fn area_options(
    area: &Area,
    config: &InstanceCfg,
    location: OptionsLocation,
) -> Options {
    let mut options = Options::empty();

    match area.config.area_type() {
        AreaType::Normal => options.insert(Options::E),
        AreaType::Nssa => {
            // The N-bit is only set in Hello packets. In LSA headers the same
            // bit is the P-bit, which is set per Type-7 LSA.
            if let OptionsLocation::Packet(_) = location {
                options.insert(Options::NP);
            }
        }
        AreaType::Stub => (),
    }

    // The O-bit is not set in packets other than Database Description
    // packets.
    if location == OptionsLocation::Packet(PacketType::DbDesc) {
        options.insert(Options::O);
    }

    // RFC 1793 - Section 2.4:
    // Routers supporting demand circuits set the DC-bit in their LSAs.
    if location == OptionsLocation::Lsa && config.demand_circuit_capable {
        options.insert(Options::DC);
    }

    options
}

// Brings the Summary-LSAs of every area in line with the routing table,
// once SPF has run (RFC 2328, section 12.4.3).
pub(crate) fn update_summary_lsas(
    instance: &mut InstanceUpView<'_>,
    areas: &mut Areas,
    interfaces: &Arena<Interface>,
    lsa_entries: &Arena<LsaEntry>,
) {
    let is_abr = areas.is_abr(interfaces);

    // Ranges must be settled in every area before any summary is computed.
    instance
        .state
        .rib
        .values_mut()
        .for_each(|route| route.flags.remove(RouteNetFlags::SUMMARIZED));
    areas
        .iter_mut()
        .for_each(|area| update_net_ranges(area, is_abr, instance));

    let area_idxs = areas.indexes().collect::<Vec<_>>();
    for area_idx in area_idxs {
        update_net_summary_lsas(area_idx, is_abr, instance, areas, lsa_entries);
        update_rtr_summary_lsas(
            area_idx,
            is_abr,
            instance,
            areas,
            interfaces,
            lsa_entries,
        );
    }
}

fn update_net_ranges(
    area: &mut Area,
    is_abr: bool,
    instance: &mut InstanceUpView<'_>,
) {
    area.ranges.values_mut().for_each(|range| range.cost = None);
    if !is_abr {
        return;
    }

    // A range is active while it covers at least one reachable intra-area
    // network. Its cost is that of the most distant one.
    let area_id = Some(area.area_id);
    let intra_area_routes =
        instance.state.rib.iter_mut().filter(|(_, route)| {
            route.path_type == PathType::IntraArea
                && route.area_id == area_id
                && route.metric < LSA_INFINITY
        });
    for (prefix, route) in intra_area_routes {
        let Some(range) = area
            .ranges
            .iter_mut()
            .find_map(|(range_prefix, range)| {
                range_prefix.is_supernet_of(*prefix).then_some(range)
            })
        else {
            continue;
        };

        route.flags.insert(RouteNetFlags::SUMMARIZED);
        range.cost = range.cost.max(Some(route.metric));
    }
}

fn update_net_summary_lsas(
    area_idx: AreaIndex,
    is_abr: bool,
    instance: &InstanceUpView<'_>,
    areas: &mut Areas,
    lsa_entries: &Arena<LsaEntry>,
) {
    // Compute summary routes.
    let area = &areas[area_idx];
    let new_summaries = compute_net_summaries(is_abr, area, instance, areas);

    // Link State IDs are assigned from the whole table, so it's installed
    // before anything is originated.
    let old_summaries = std::mem::replace(
        &mut areas[area_idx].state.net_summaries,
        new_summaries,
    );
    let area = &areas[area_idx];

    // (Re)originate the required Summary-LSAs. Unchanged summaries are
    // filtered out by the origination check.
    for (prefix, metric) in &area.state.net_summaries {
        lsdb::lsa_orig_inter_area_network(area, instance, *prefix, *metric);
    }

    // Flush old summaries whose Link State ID is no longer in use.
    let new_ids = net_summary_lsa_ids(&area.state.net_summaries)
        .collect::<BTreeSet<_>>();
    let lsa_ids = net_summary_lsa_ids(&old_summaries)
        .filter(|lsa_id| !new_ids.contains(lsa_id))
        .collect::<Vec<_>>();
    let lsa_type = LsaTypeCode::SummaryNetwork.into();
    flush_summary_lsas(lsa_type, lsa_ids, area, instance, lsa_entries);
}

fn update_rtr_summary_lsas(
    area_idx: AreaIndex,
    is_abr: bool,
    instance: &InstanceUpView<'_>,
    areas: &mut Areas,
    interfaces: &Arena<Interface>,
    lsa_entries: &Arena<LsaEntry>,
) {
    let area = &areas[area_idx];
    let mut new_summaries = compute_rtr_summaries(is_abr, area, areas);

    // Add the indication-LSA, if required.
    if let Some(options) = indication_lsa_check(
        is_abr,
        area,
        instance,
        areas,
        interfaces,
        lsa_entries,
    ) {
        new_summaries
            .insert(instance.state.router_id, (options, LSA_INFINITY));
    }

    // Save the old table of summary routes.
    let area = &mut areas[area_idx];
    let old_summaries = std::mem::take(&mut area.state.rtr_summaries);

    // (Re)originate the required Summary-LSAs.
    for (router_id, (options, metric)) in &new_summaries {
        lsdb::lsa_orig_inter_area_router(
            area, instance, *router_id, *options, *metric,
        );
    }

    // Flush old summaries that are no longer valid.
    let lsa_ids = old_summaries
        .keys()
        .filter(|router_id| !new_summaries.contains_key(router_id))
        .copied()
        .collect::<Vec<_>>();
    area.state.rtr_summaries = new_summaries;
    let lsa_type = LsaTypeCode::SummaryRouter.into();
    flush_summary_lsas(lsa_type, lsa_ids, area, instance, lsa_entries);
}

fn compute_net_summaries(
    is_abr: bool,
    area: &Area,
    instance: &InstanceUpView<'_>,
    areas: &Areas,
) -> BTreeMap<Ipv4Network, u32> {
    let mut summaries = BTreeMap::new();

    // Only ABRs should originate summaries.
    if !is_abr {
        return summaries;
    }

    // Add regular summaries and ranges, except for totally stub/NSSA areas.
    let area_type = area.config.area_type();
    if area_type == AreaType::Normal || area.config.summary {
        summaries.extend(compute_net_regular_summaries(area, instance));
        summaries.extend(compute_net_range_summaries(area, areas));
    }

    // Add default route for stub/NSSA areas.
    if area_type != AreaType::Normal {
        let prefix = ip::default_route();
        summaries.insert(prefix, area.config.default_cost);
    }

    summaries
}

// Inter-area and intra-area routes of the other areas, minus those covered by
// a range (RFC 2328, section 12.4.3).
fn compute_net_regular_summaries<'a>(
    area: &'a Area,
    instance: &'a InstanceUpView<'_>,
) -> impl Iterator<Item = (Ipv4Network, u32)> + 'a {
    // Backbone ranges aren't applied towards transit areas.
    let ignore_backbone_ranges = area.state.transit_capability;

    instance
        .state
        .rib
        .iter()
        .filter(|(_, route)| route.metric < LSA_INFINITY)
        .filter(move |(_, route)| route.area_id != Some(area.area_id))
        .filter(move |(_, route)| match route.path_type {
            PathType::Type1External | PathType::Type2External => false,
            // The backbone only learns intra-area routes from other areas.
            PathType::InterArea => !area.is_backbone(),
            PathType::IntraArea => true,
        })
        // Split horizon.
        .filter(move |(_, route)| {
            !nexthop_area_check(route.nexthop.as_ref(), area)
        })
        .filter(move |(_, route)| {
            let from_backbone = route.area_id == Some(Ipv4Addr::UNSPECIFIED);
            (from_backbone && ignore_backbone_ranges)
                || !route.flags.contains(RouteNetFlags::SUMMARIZED)
        })
        .map(|(prefix, route)| (*prefix, route.metric))
}

// Active ranges of the other areas, advertised in place of the networks they
// cover.
fn compute_net_range_summaries<'a>(
    area: &'a Area,
    areas: &'a Areas,
) -> impl Iterator<Item = (Ipv4Network, u32)> + 'a {
    let ignore_backbone_ranges = area.state.transit_capability;

    areas
        .iter()
        .filter(move |src_area| {
            src_area.area_id != area.area_id
                && !(src_area.is_backbone() && ignore_backbone_ranges)
        })
        .flat_map(|src_area| &src_area.ranges)
        .filter(|(_, range)| range.config.advertise)
        // A configured cost overrides the computed one. Inactive ranges stay
        // silent either way.
        .filter_map(|(prefix, range)| {
            let cost = range.config.cost.or(range.cost);
            range.cost.and(cost).map(|cost| (*prefix, cost))
        })
}

fn compute_rtr_summaries(
    is_abr: bool,
    area: &Area,
    areas: &Areas,
) -> BTreeMap<Ipv4Addr, (Options, u32)> {
    // Stub areas and NSSAs route to ASBRs through their default route.
    if !is_abr || area.config.area_type() != AreaType::Normal {
        return BTreeMap::new();
    }

    let advertised = |route: &RouteRtr| {
        route.is_asbr()
            && route.metric < LSA_INFINITY
            && (route.path_type == PathType::IntraArea || !area.is_backbone())
            && !nexthop_area_check(route.nexthop.as_ref(), area)
    };
    areas
        .iter()
        .filter(|src_area| src_area.id != area.id)
        .flat_map(|src_area| &src_area.state.routers)
        .filter(|(_, route)| advertised(route))
        .map(|(router_id, route)| (*router_id, (route.options, route.metric)))
        .collect()
}

// RFC 1793 - Section 2.5.1:
// An ABR originates an indication-LSA into an area when another attached
// area contains routers that don't support demand circuits. The ABR refrains
// from doing so when an indication-LSA from a router with a higher Router ID
// is already present in the area.
//
// Returns the options of the indication-LSA to be originated, if any.
fn indication_lsa_check(
    is_abr: bool,
    area: &Area,
    instance: &InstanceUpView<'_>,
    areas: &Areas,
    interfaces: &Arena<Interface>,
    lsa_entries: &Arena<LsaEntry>,
) -> Option<Options> {
    if !is_abr
        || !instance.config.demand_circuit_capable
        || area.config.area_type() != AreaType::Normal
    {
        return None;
    }

    let dc_incapable = areas
        .iter()
        .filter(|other_area| other_area.id != area.id)
        .filter(|other_area| other_area.is_active(interfaces))
        .any(|other_area| other_area.dc_incapable_routers(lsa_entries));
    if !dc_incapable {
        return None;
    }

    let router_id = instance.state.router_id;
    let preempted = area
        .state
        .lsdb
        .iter_by_type(lsa_entries, LsaTypeCode::SummaryRouter.into())
        .map(|(_, lse)| &lse.data)
        .filter(|lsa| lsa.hdr.adv_rtr > router_id)
        .any(|lsa| lsdb::lsa_is_indication(lsa));
    if preempted {
        return None;
    }

    let mut options = area_options(area, instance.config, OptionsLocation::Lsa);
    options.remove(Options::DC);
    Some(options)
}

fn nexthop_area_check(nexthop: Option<&Nexthop>, area: &Area) -> bool {
    nexthop.is_some_and(|nexthop| {
        area.interfaces
            .indexes()
            .any(|iface_idx| nexthop.iface_idx == iface_idx)
    })
}

fn flush_summary_lsas(
    lsa_type: LsaType,
    lsa_ids: Vec<Ipv4Addr>,
    area: &Area,
    instance: &InstanceUpView<'_>,
    lsa_entries: &Arena<LsaEntry>,
) {
    let lsdb = &area.state.lsdb;
    let adv_rtr = instance.state.router_id;
    let net_ids = net_summary_lsa_ids(&area.state.net_summaries)
        .collect::<BTreeSet<_>>();
    let still_advertised = |lsa_id: Ipv4Addr| match lsa_type.type_code() {
        Some(LsaTypeCode::SummaryNetwork) => net_ids.contains(&lsa_id),
        _ => area.state.rtr_summaries.contains_key(&lsa_id),
    };

    // Summaries we withdrew, plus stale copies of ours that came back
    // through flooding.
    let withdrawn = lsa_ids.into_iter().filter_map(|lsa_id| {
        let lsa_key = LsaKey::new(lsa_type, adv_rtr, lsa_id);
        lsdb.get(lsa_entries, &lsa_key).map(|(_, lse)| lse)
    });
    let stale = lsdb
        .iter_by_type_advrtr(lsa_entries, lsa_type, adv_rtr)
        .map(|(_, lse)| lse)
        .filter(|lse| lse.flags.contains(LsaEntryFlags::RECEIVED))
        .filter(|lse| !still_advertised(lse.data.hdr.lsa_id));

    let reason = LsaFlushReason::PrematureAging;
    for lse in withdrawn.chain(stale) {
        if !lse.data.hdr.is_maxage() {
            instance.tx.lsa_flush(LsdbId::Area(area.id), lse.id, reason);
        }
    }
}

// Link State ID of a Type-3 Summary-LSA (RFC 2328, appendix E). A prefix
// sharing its address with a less specific one in the same table is told
// apart by setting its host bits. Host routes have none to set.
pub(crate) fn net_summary_lsa_id(
    summaries: &BTreeMap<Ipv4Network, u32>,
    prefix: &Ipv4Network,
) -> Ipv4Addr {
    let shadowed = summaries.keys().any(|other| {
        other.ip() == prefix.ip() && other.prefix() < prefix.prefix()
    });
    if shadowed {
        prefix.broadcast()
    } else {
        prefix.ip()
    }
}

fn net_summary_lsa_ids(
    summaries: &BTreeMap<Ipv4Network, u32>,
) -> impl Iterator<Item = Ipv4Addr> + '_ {
    summaries
        .keys()
        .map(|prefix| net_summary_lsa_id(summaries, prefix))
}

// ===== unit tests =====
