//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::{BTreeMap, btree_map};
use std::net::Ipv4Addr;

use bitflags::bitflags;
use derive_new::new;
use ipnetwork::Ipv4Network;
use ospfsim_utils::ip::Ipv4NetworkExt;
use serde::{Deserialize, Serialize};

use crate::area::Area;
use crate::collections::{Areas, Arena, InterfaceIndex};
use crate::debug::Debug;
use crate::instance::InstanceUpView;
use crate::interface::Interface;
use crate::lsdb::{LSA_INFINITY, LsaEntry};
use crate::packet::Options;
use crate::packet::lsa::{
    LsaAsExternal, LsaKey, LsaRouterFlags, LsaTypeCode,
};
use crate::southbound::RouteMsg;

// Network routing table entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RouteNet {
    pub area_id: Option<Ipv4Addr>,
    pub origin: Option<LsaKey>,
    pub path_type: PathType,
    pub metric: u32,
    pub type2_metric: Option<u32>,
    pub tag: Option<u32>,
    pub nexthop: Option<Nexthop>,
    pub ext_origin: Option<ExternalOrigin>,
    pub flags: RouteNetFlags,
    pub status: RouteStatus,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct RouteNetFlags: u8 {
        const CONNECTED = 0x01;
        const INSTALLED = 0x02;
        const SUMMARIZED = 0x04;
    }
}

// Router routing table entry.
#[derive(Clone, Debug, Eq, PartialEq, new)]
pub struct RouteRtr {
    pub area_id: Ipv4Addr,
    pub path_type: PathType,
    pub options: Options,
    pub flags: LsaRouterFlags,
    pub metric: u32,
    pub nexthop: Option<Nexthop>,
}

// OSPF path types in decreasing order of preference.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum PathType {
    IntraArea,
    InterArea,
    Type1External,
    Type2External,
}

// Kind of LSA an external route was learned from, in decreasing order of
// preference.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum ExternalOrigin {
    AsExternal,
    NssaWithFwd,
    NssaWithoutFwd,
}

// Routing table row status relative to the previous route computation.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RouteStatus {
    New,
    Changed,
    NoChange,
    Invalid,
}

// Route nexthop.
#[derive(Clone, Copy, Debug, Eq, new, PartialEq)]
pub struct Nexthop {
    // Nexthop interface.
    pub iface_idx: InterfaceIndex,
    // Nexthop address (`None` for connected routes).
    pub addr: Option<Ipv4Addr>,
    // Router-ID of the remote neighbor (`None` for connected routes).
    pub nbr_router_id: Option<Ipv4Addr>,
}

// ===== impl RouteNet =====

impl RouteNet {
    pub(crate) fn metric(&self) -> u32 {
        match self.path_type {
            PathType::IntraArea
            | PathType::InterArea
            | PathType::Type1External => self.metric,
            PathType::Type2External => self.type2_metric.unwrap_or(self.metric),
        }
    }

    fn same_forwarding(&self, other: &RouteNet) -> bool {
        self.path_type == other.path_type
            && self.metric() == other.metric()
            && self.tag == other.tag
            && self.nexthop == other.nexthop
    }
}

// ===== impl RouteRtr =====

impl RouteRtr {
    pub(crate) fn is_abr(&self) -> bool {
        self.flags.contains(LsaRouterFlags::B)
    }

    pub(crate) fn is_asbr(&self) -> bool {
        self.flags.contains(LsaRouterFlags::E)
    }
}

// ===== global functions =====

// Updates the entire OSPF routing table.
pub(crate) fn update_rib_full(
    instance: &mut InstanceUpView<'_>,
    areas: &mut Areas,
    interfaces: &Arena<Interface>,
    lsa_entries: &Arena<LsaEntry>,
) {
    let mut rib = BTreeMap::new();
    let mut old_rib = std::mem::take(&mut instance.state.rib);

    // Existing rows are invalid until claimed by this computation.
    for route in old_rib.values_mut() {
        route.status = RouteStatus::Invalid;
    }

    // Compute intra-area routes.
    for area in areas.iter() {
        update_rib_intra_area(&mut rib, area, interfaces);
    }

    // Compute inter-area routes.
    let active_areas = areas.active_count(interfaces);
    let router_id = instance.state.router_id;
    for area_idx in areas.indexes().collect::<Vec<_>>() {
        let area = &mut areas[area_idx];

        // If the router has active attachments to multiple areas, only backbone
        // summary-LSAs are examined.
        if active_areas > 1 && !area.is_backbone() {
            continue;
        }

        update_rib_inter_area_networks(&mut rib, area, router_id, lsa_entries);
        update_rib_inter_area_routers(area, router_id, lsa_entries);
    }

    // Examine transit areas' summary-LSAs.
    for area in areas.iter().filter(|area| area.state.transit_capability) {
        update_rib_transit_area(&mut rib, area, router_id, lsa_entries);
    }

    // Compute external routes.
    update_rib_external(&mut rib, instance, areas, lsa_entries);

    // Update OSPF routes in the global RIB.
    update_global_rib(&mut rib, old_rib, instance, interfaces);

    // Save updated RIB.
    instance.state.rib = rib;
}

// ===== helper functions =====

// Computes intra-area routes.
fn update_rib_intra_area(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    area: &Area,
    interfaces: &Arena<Interface>,
) {
    // Iterate over all stub networks and their corresponding vertices.
    for stub in crate::spf::intra_area_networks(area) {
        // Calculate stub metric.
        let metric = stub.vertex.distance.saturating_add(stub.metric.into());
        let origin = stub.vertex.lsa.origin();

        // A route to the same destination is only replaced by a strictly
        // cheaper one. Equal-cost paths are settled by the origin LSA so the
        // outcome doesn't depend on the order vertices were added to the tree.
        if let btree_map::Entry::Occupied(o) = rib.entry(stub.prefix) {
            let curr_route: &RouteNet = o.get();
            let replace = match metric.cmp(&curr_route.metric) {
                Ordering::Less => true,
                Ordering::Equal => curr_route.origin < Some(origin),
                Ordering::Greater => false,
            };
            if !replace {
                continue;
            }
            o.remove();
        }

        // Directly attached networks are reached through the interface
        // attached to them.
        let mut flags = RouteNetFlags::empty();
        let nexthop = if stub.vertex.hops == 0 {
            flags.insert(RouteNetFlags::CONNECTED);
            stub.vertex.nexthop.or_else(|| {
                area.interfaces
                    .indexes()
                    .find(|iface_idx| {
                        let iface = &interfaces[*iface_idx];
                        !iface.is_down()
                            && iface.config.address.apply_mask() == stub.prefix
                    })
                    .map(|iface_idx| Nexthop::new(iface_idx, None, None))
            })
        } else {
            stub.vertex.nexthop
        };

        // Create new intra-area route.
        let new_route = RouteNet {
            area_id: Some(area.area_id),
            origin: Some(origin),
            path_type: PathType::IntraArea,
            metric,
            type2_metric: None,
            tag: None,
            nexthop,
            ext_origin: None,
            flags,
            status: RouteStatus::New,
        };
        rib.insert(stub.prefix, new_route);
    }
}

// Computes inter-area "network" routes.
fn update_rib_inter_area_networks(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    area: &Area,
    router_id: Ipv4Addr,
    lsa_entries: &Arena<LsaEntry>,
) {
    // Examine all Type-3 Summary LSAs.
    for (adv_rtr, prefix, summary_metric) in
        inter_area_networks(area, lsa_entries)
            // Filter out unreachable LSAs.
            .filter(|(_, _, metric)| *metric < LSA_INFINITY)
            // Filter out LSAs originated by the calculating router itself.
            .filter(|(adv_rtr, _, _)| *adv_rtr != router_id)
    {
        // Look up the routing table entry for BR having Area A as its
        // associated area.
        let route_br = match area
            .state
            .routers
            .get(&adv_rtr)
            .filter(|route| route.is_abr())
        {
            Some(route_br) => route_br,
            None => {
                // If no such entry exists for router BR, do nothing with this
                // LSA and consider the next in the list.
                Debug::SpfNetworkUnreachableAbr(&prefix, adv_rtr).log();
                continue;
            }
        };

        // The inter-area path cost is the distance to BR plus the cost
        // specified in the LSA.
        let metric = route_br.metric + summary_metric;

        // Create new inter-area route.
        let new_route = RouteNet {
            area_id: Some(area.area_id),
            origin: None,
            path_type: PathType::InterArea,
            metric,
            type2_metric: None,
            tag: None,
            nexthop: route_br.nexthop,
            ext_origin: None,
            flags: RouteNetFlags::empty(),
            status: RouteStatus::New,
        };

        // Try to add or update summary route in the RIB.
        route_update(rib, prefix, new_route);
    }
}

// Computes inter-area "router" routes.
fn update_rib_inter_area_routers(
    area: &mut Area,
    router_id: Ipv4Addr,
    lsa_entries: &Arena<LsaEntry>,
) {
    let mut routers = vec![];

    // Examine all Type-4 Summary LSAs.
    for (_, lse) in area
        .state
        .lsdb
        .iter_by_type(lsa_entries, LsaTypeCode::SummaryRouter.into())
        .filter(|(_, lse)| !lse.data.hdr.is_maxage())
        // Filter out LSAs originated by the calculating router itself.
        .filter(|(_, lse)| lse.data.hdr.adv_rtr != router_id)
    {
        let lsa = &lse.data;
        let Some(summary) = lsa.body.as_summary() else {
            continue;
        };

        // Filter out unreachable LSAs. Indication-LSAs always fall here.
        if summary.metric >= LSA_INFINITY {
            continue;
        }

        let adv_rtr = lsa.hdr.adv_rtr;
        let asbr = lsa.hdr.lsa_id;

        // Intra-area routes are always preferred.
        if area
            .state
            .routers
            .get(&asbr)
            .is_some_and(|route| route.path_type == PathType::IntraArea)
        {
            continue;
        }

        // Look up the routing table entry for BR having Area A as its
        // associated area.
        let route_br = match area
            .state
            .routers
            .get(&adv_rtr)
            .filter(|route| route.is_abr())
        {
            Some(route_br) => route_br,
            None => {
                Debug::SpfRouterUnreachableAbr(&asbr, adv_rtr).log();
                continue;
            }
        };

        let new_route = RouteRtr::new(
            area.area_id,
            PathType::InterArea,
            lsa.hdr.options,
            LsaRouterFlags::E,
            route_br.metric + summary.metric,
            route_br.nexthop,
        );
        routers.push((asbr, new_route));
    }

    // Keep the cheapest path to every ASBR.
    for (asbr, new_route) in routers {
        match area.state.routers.entry(asbr) {
            btree_map::Entry::Occupied(mut o) => {
                if new_route.metric < o.get().metric {
                    o.insert(new_route);
                }
            }
            btree_map::Entry::Vacant(v) => {
                v.insert(new_route);
            }
        }
    }
}

// RFC 2328 - Section 16.3:
// Examines the summary-LSAs of a transit area, looking for better paths than
// the ones found through the backbone. No new routes are installed.
fn update_rib_transit_area(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    area: &Area,
    router_id: Ipv4Addr,
    lsa_entries: &Arena<LsaEntry>,
) {
    for (adv_rtr, prefix, summary_metric) in
        inter_area_networks(area, lsa_entries)
            .filter(|(_, _, metric)| *metric < LSA_INFINITY)
            .filter(|(adv_rtr, _, _)| *adv_rtr != router_id)
    {
        // Only backbone routes are candidates for improvement.
        let Some(route) = rib.get_mut(&prefix).filter(|route| {
            matches!(route.path_type, PathType::IntraArea | PathType::InterArea)
                && route.area_id == Some(Ipv4Addr::UNSPECIFIED)
        }) else {
            continue;
        };

        let Some(route_br) = area.state.routers.get(&adv_rtr) else {
            continue;
        };

        let metric = route_br.metric + summary_metric;
        if metric < route.metric {
            route.metric = metric;
            route.nexthop = route_br.nexthop;
        }
    }
}

// Computes AS external routes and NSSA external routes.
fn update_rib_external(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    instance: &InstanceUpView<'_>,
    areas: &Areas,
    lsa_entries: &Arena<LsaEntry>,
) {
    let router_id = instance.state.router_id;
    let mut candidates = vec![];

    // Examine all AS-external-LSAs.
    for (_, lse) in instance
        .state
        .lsdb
        .iter_by_type(lsa_entries, LsaTypeCode::AsExternal.into())
        .filter(|(_, lse)| !lse.data.hdr.is_maxage())
        .filter(|(_, lse)| lse.data.hdr.adv_rtr != router_id)
    {
        let lsa = &lse.data;
        let Some(ext) = lsa.body.as_external() else {
            continue;
        };
        let ext_origin = ExternalOrigin::AsExternal;
        candidates.push((lsa.hdr.key(), ext, ext_origin, None));
    }

    // RFC 3101 - Section 2.5:
    // Type-7 LSAs are only examined in the NSSA they were originated into.
    for area in areas.iter() {
        for (_, lse) in area
            .state
            .lsdb
            .iter_by_type(lsa_entries, LsaTypeCode::NssaExternal.into())
            .filter(|(_, lse)| !lse.data.hdr.is_maxage())
            .filter(|(_, lse)| lse.data.hdr.adv_rtr != router_id)
        {
            let lsa = &lse.data;
            let Some(ext) = lsa.body.as_external() else {
                continue;
            };
            let ext_origin = match ext.fwd_addr {
                Some(_) => ExternalOrigin::NssaWithFwd,
                None => ExternalOrigin::NssaWithoutFwd,
            };
            candidates.push((lsa.hdr.key(), ext, ext_origin, Some(area)));
        }
    }

    for (lsa_key, ext, ext_origin, nssa) in candidates {
        // Filter out unreachable LSAs.
        if ext.metric >= LSA_INFINITY {
            continue;
        }

        let Ok(prefix) = Ipv4Network::with_netmask(lsa_key.lsa_id, ext.mask)
        else {
            continue;
        };
        let prefix = prefix.apply_mask();

        // Locally configured external routes take precedence.
        if instance
            .config
            .external_routes
            .iter()
            .any(|route| route.prefix.apply_mask() == prefix)
        {
            continue;
        }

        // Look up the routing table entry for the ASBR that originated the
        // LSA.
        let Some((asbr_metric, asbr_nexthop)) =
            external_asbr_lookup(lsa_key.adv_rtr, nssa, areas)
        else {
            Debug::SpfUnreachableAsbr(&prefix, lsa_key.adv_rtr).log();
            continue;
        };

        // A non-zero forwarding address is reached through the intra-area or
        // inter-area route covering it.
        let (fwd_metric, nexthop) = match ext.fwd_addr {
            Some(fwd_addr) => match fwd_addr_lookup(rib, fwd_addr) {
                Some(route) => (route.metric, route.nexthop),
                None => continue,
            },
            None => (asbr_metric, asbr_nexthop),
        };

        // Get path type and metric.
        let (path_type, metric, type2_metric) =
            external_metric(ext, fwd_metric);

        // Create new external route.
        let new_route = RouteNet {
            area_id: nssa.map(|area| area.area_id),
            origin: Some(lsa_key),
            path_type,
            metric,
            type2_metric,
            tag: Some(ext.tag),
            nexthop,
            ext_origin: Some(ext_origin),
            flags: RouteNetFlags::empty(),
            status: RouteStatus::New,
        };

        // Try to add or update external route in the RIB.
        route_update(rib, prefix, new_route);
    }
}

// Returns the cost and nexthop of the preferred path to the given ASBR.
fn external_asbr_lookup(
    asbr: Ipv4Addr,
    nssa: Option<&Area>,
    areas: &Areas,
) -> Option<(u32, Option<Nexthop>)> {
    // Type-7 LSAs are resolved within their own NSSA.
    if let Some(area) = nssa {
        return area
            .state
            .routers
            .get(&asbr)
            .filter(|route| route.path_type == PathType::IntraArea)
            .map(|route| (route.metric, route.nexthop));
    }

    // Look up the routing table entries (potentially one per attached area)
    // for the AS boundary router (ASBR) that originated the LSA.
    let mut asbr_routes = areas
        .iter()
        .filter_map(|area| {
            area.state.routers.get(&asbr).filter(|route| route.is_asbr())
        })
        .collect::<Vec<_>>();

    // Intra-area paths using non-backbone areas are always the most
    // preferred.
    let asbr_routes_pruned = asbr_routes
        .iter()
        .copied()
        .filter(|route| {
            route.path_type == PathType::IntraArea
                && route.area_id != Ipv4Addr::UNSPECIFIED
        })
        .collect::<Vec<_>>();
    if !asbr_routes_pruned.is_empty() {
        asbr_routes = asbr_routes_pruned;
    }

    // Select the routing table entry with the least cost; when there are
    // multiple least cost routing table entries the entry whose associated
    // area has the largest OSPF Area ID is chosen.
    asbr_routes
        .into_iter()
        .reduce(|best, route| match route.metric.cmp(&best.metric) {
            Ordering::Less => route,
            Ordering::Equal if route.area_id > best.area_id => route,
            _ => best,
        })
        .map(|route| (route.metric, route.nexthop))
}

// Returns the intra-area or inter-area route to the given forwarding address
// with the longest matching prefix.
fn fwd_addr_lookup(
    rib: &BTreeMap<Ipv4Network, RouteNet>,
    fwd_addr: Ipv4Addr,
) -> Option<&RouteNet> {
    rib.iter()
        .filter(|(prefix, route)| {
            prefix.contains(fwd_addr)
                && matches!(
                    route.path_type,
                    PathType::IntraArea | PathType::InterArea
                )
                && route.metric < LSA_INFINITY
        })
        .max_by_key(|(prefix, _)| prefix.prefix())
        .map(|(_, route)| route)
}

fn external_metric(
    ext: &LsaAsExternal,
    fwd_metric: u32,
) -> (PathType, u32, Option<u32>) {
    if ext.is_type2() {
        (PathType::Type2External, fwd_metric, Some(ext.metric))
    } else {
        (PathType::Type1External, fwd_metric + ext.metric, None)
    }
}

fn inter_area_networks<'a>(
    area: &'a Area,
    lsa_entries: &'a Arena<LsaEntry>,
) -> impl Iterator<Item = (Ipv4Addr, Ipv4Network, u32)> + 'a {
    area.state
        .lsdb
        .iter_by_type(lsa_entries, LsaTypeCode::SummaryNetwork.into())
        .map(|(_, lse)| &lse.data)
        .filter(|lsa| !lsa.hdr.is_maxage())
        .filter_map(|lsa| {
            let summary = lsa.body.as_summary()?;
            let prefix =
                Ipv4Network::with_netmask(lsa.hdr.lsa_id, summary.mask).ok()?;
            Some((lsa.hdr.adv_rtr, prefix.apply_mask(), summary.metric))
        })
}

// Updates OSPF routes in the global RIB.
//
// This step should be done at the end of the routing table calculation to
// prevent transient states from affecting the forwarding plane.
fn update_global_rib(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    mut old_rib: BTreeMap<Ipv4Network, RouteNet>,
    instance: &mut InstanceUpView<'_>,
    interfaces: &Arena<Interface>,
) {
    // Install new routes or routes that have changed.
    for (prefix, route) in rib.iter_mut() {
        let mut installed = false;

        // Remove route from the old RIB if it's present.
        if let Some(old_route) = old_rib.remove(prefix) {
            installed = old_route.flags.contains(RouteNetFlags::INSTALLED);

            // Skip reinstalling the route if it hasn't changed.
            if old_route.same_forwarding(route) {
                route.status = RouteStatus::NoChange;
                if installed {
                    route.flags.insert(RouteNetFlags::INSTALLED);
                }
                continue;
            }
            route.status = RouteStatus::Changed;
        } else {
            route.status = RouteStatus::New;
        }

        // The nexthop might be missing in the case of nexthop computation
        // errors or for locally configured host routes. When that happens,
        // ensure the route is removed from the forwarding table.
        match route.nexthop {
            Some(nexthop) => {
                Debug::RouteInstall(prefix, route.path_type, route.metric())
                    .log();
                let msg = RouteMsg {
                    prefix: *prefix,
                    path_type: route.path_type,
                    metric: route.metric(),
                    nexthop: nexthop.addr,
                    ifindex: interfaces[nexthop.iface_idx].ifindex,
                };
                instance.tx.route_install(msg);
                route.flags.insert(RouteNetFlags::INSTALLED);
            }
            None if installed => {
                Debug::RouteUninstall(prefix).log();
                instance.tx.route_uninstall(*prefix);
            }
            None => (),
        }
    }

    // Uninstall routes that are no longer available.
    for (prefix, _) in old_rib
        .into_iter()
        .filter(|(_, route)| route.status == RouteStatus::Invalid)
        .filter(|(_, route)| route.flags.contains(RouteNetFlags::INSTALLED))
    {
        Debug::RouteUninstall(&prefix).log();
        instance.tx.route_uninstall(prefix);
    }
}

fn route_update(
    rib: &mut BTreeMap<Ipv4Network, RouteNet>,
    prefix: Ipv4Network,
    route: RouteNet,
) {
    match rib.entry(prefix) {
        btree_map::Entry::Occupied(mut o) => {
            // Equal-cost paths are not merged: the first path found is kept.
            if route_compare(&route, o.get()) == Ordering::Less {
                o.insert(route);
            }
        }
        btree_map::Entry::Vacant(v) => {
            v.insert(route);
        }
    }
}

fn route_compare(a: &RouteNet, b: &RouteNet) -> Ordering {
    let cmp = a.path_type.cmp(&b.path_type);
    if cmp != Ordering::Equal {
        return cmp;
    }

    let cmp = match a.path_type {
        PathType::IntraArea | PathType::InterArea => {
            return a.metric.cmp(&b.metric);
        }
        PathType::Type1External => a.metric.cmp(&b.metric),
        PathType::Type2External => a
            .type2_metric
            .cmp(&b.type2_metric)
            .then(a.metric.cmp(&b.metric)),
    };
    if cmp != Ordering::Equal {
        return cmp;
    }

    // Equal announced type and cost: prefer AS-external over NSSA, and NSSA
    // with forwarding address over NSSA without.
    a.ext_origin.cmp(&b.ext_origin)
}

// ===== unit tests =====
