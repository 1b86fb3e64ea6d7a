//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use derive_new::new;
use enum_as_inner::EnumAsInner;
use ipnetwork::Ipv4Network;
use ospfsim_utils::ip::Ipv4NetworkExt;
use serde::{Deserialize, Serialize};

use crate::area::{Area, AreaType};
use crate::collections::{Areas, Arena, Lsdb};
use crate::config::NssaRangeCfg;
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::{InstanceArenas, InstanceUpView};
use crate::interface::Interface;
use crate::lsdb::{self, LSA_INFINITY, LsaEntry, LsaOriginateEvent};
use crate::packet::Options;
use crate::packet::lsa::{
    Lsa, LsaAsExternal, LsaAsExternalFlags, LsaKey, LsaRouterFlags,
    LsaRouterLink, LsaRouterLinkType, LsaTypeCode,
};
use crate::route::{Nexthop, PathType, RouteRtr};
use crate::{area, route, tasks};

// Network vertices are ordered before router vertices, so that among
// candidates at the same distance networks are settled first.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub enum VertexId {
    Network { dr_addr: Ipv4Addr },
    Router { router_id: Ipv4Addr },
}

#[derive(Debug, EnumAsInner)]
pub enum VertexLsa {
    Network(Arc<Lsa>),
    Router(Arc<Lsa>),
}

#[derive(Debug, new)]
pub struct Vertex {
    pub id: VertexId,
    pub lsa: VertexLsa,
    pub distance: u32,
    pub hops: u16,
    #[new(default)]
    pub nexthop: Option<Nexthop>,
}

#[derive(Debug, new)]
struct SpfLink<'a> {
    parent: Option<&'a LsaRouterLink>,
    id: VertexId,
    lsa: VertexLsa,
    cost: u16,
}

#[derive(Debug)]
pub struct SpfIntraAreaNetwork<'a> {
    pub vertex: &'a Vertex,
    pub prefix: Ipv4Network,
    pub metric: u16,
}

// ===== impl VertexId =====

impl VertexId {
    fn new_root(router_id: Ipv4Addr) -> Self {
        VertexId::Router { router_id }
    }
}

// ===== impl VertexLsa =====

impl VertexLsa {
    fn router_v_bit(&self) -> bool {
        self.router_flags().contains(LsaRouterFlags::V)
    }

    pub(crate) fn router_id(&self) -> Ipv4Addr {
        let lsa = self.as_router().unwrap();
        lsa.hdr.adv_rtr
    }

    fn router_options(&self) -> Options {
        let lsa = self.as_router().unwrap();
        lsa.hdr.options
    }

    fn router_flags(&self) -> LsaRouterFlags {
        let lsa = self.as_router().unwrap();
        let lsa_body = lsa.body.as_router().unwrap();
        lsa_body.flags
    }

    // Returns the key of the LSA this vertex was built from.
    pub(crate) fn origin(&self) -> LsaKey {
        let lsa = match self {
            VertexLsa::Network(lsa) => lsa,
            VertexLsa::Router(lsa) => lsa,
        };
        lsa.hdr.key()
    }
}

// ===== global functions =====

// Schedules a route computation, unless one is already pending.
pub(crate) fn schedule(instance: &mut InstanceUpView<'_>) {
    if instance.state.spf_delay_timer.is_some() {
        return;
    }

    let task = tasks::spf_delay_timer(instance.config, instance.tx);
    Debug::SpfScheduled(task.timeout()).log();
    instance.state.spf_delay_timer = Some(task);
}

// This is the SPF main function.
pub(crate) fn run(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) {
    // Calculate shortest-path trees.
    let router_id = instance.state.router_id;
    for area in arenas.areas.iter_mut() {
        run_area(area, router_id, &arenas.interfaces, &arenas.lsa_entries);
    }

    // Update routing table.
    route::update_rib_full(
        instance,
        &mut arenas.areas,
        &arenas.interfaces,
        &arenas.lsa_entries,
    );

    // Update summary LSAs.
    area::update_summary_lsas(
        instance,
        &mut arenas.areas,
        &arenas.interfaces,
        &arenas.lsa_entries,
    );

    // Elect NSSA translators and translate Type-7 LSAs.
    nssa_translator_election(instance, &mut arenas.areas, &arenas.interfaces);
    let translated =
        nssa_translate(instance, &arenas.areas, &arenas.lsa_entries);
    if translated != instance.state.nssa_translated {
        instance.state.nssa_translated = translated;
        lsdb::lsa_orig_external(instance, arenas);
    }

    // Update statistics.
    instance.state.statistics.spf_runs += 1;
    Debug::SpfRun(arenas.areas.iter().count()).log();
}

// Returns iterator over all intra-area networks, that is, the stub links of
// the router vertices and the networks described by the network vertices.
pub(crate) fn intra_area_networks(
    area: &Area,
) -> impl Iterator<Item = SpfIntraAreaNetwork<'_>> + '_ {
    area.state.spt.values().flat_map(vertex_networks)
}

// ===== helper functions =====

// Runs SPF in the provided area.
fn run_area(
    area: &mut Area,
    router_id: Ipv4Addr,
    interfaces: &Arena<Interface>,
    lsa_entries: &Arena<LsaEntry>,
) {
    area.state.transit_capability = false;

    // Clear router's routing table.
    area.state.routers.clear();

    // Get root vertex.
    let root_vid = VertexId::new_root(router_id);
    let root_vlsa = vertex_lsa_find(root_vid, &area.state.lsdb, lsa_entries);
    let root_vlsa = match root_vlsa {
        Some(vertex) => vertex,
        None => {
            // The area has no active interfaces yet, or the Router-LSA wasn't
            // originated.
            area.state.spt.clear();
            if area.is_active(interfaces) {
                Error::SpfRootNotFound(area.area_id).log();
            }
            return;
        }
    };
    let root_v = Vertex::new(root_vid, root_vlsa, 0, 0);

    // Initialize SPT and candidate list.
    let mut spt = BTreeMap::new();
    let mut cand_list = BTreeMap::new();
    cand_list.insert((root_v.distance, root_v.id), root_v);

    // Main SPF loop.
    while let Some(((_, vertex_id), vertex)) = cand_list.pop_first() {
        // Add vertex to SPT.
        spt.insert(vertex.id, vertex);
        let vertex = &spt[&vertex_id];

        if vertex.lsa.is_router() {
            // Add "router" routing table entry. The calculating router itself
            // is left out.
            if vertex.distance > 0 {
                let route = RouteRtr::new(
                    area.area_id,
                    PathType::IntraArea,
                    vertex.lsa.router_options(),
                    vertex.lsa.router_flags(),
                    vertex.distance,
                    vertex.nexthop,
                );
                area.state.routers.insert(vertex.lsa.router_id(), route);
            }

            // Set TransitCapability.
            if vertex.lsa.router_v_bit() {
                area.state.transit_capability = true;
            }
        }

        // Iterate over all links described by the vertex's LSA.
        for link in vertex_lsa_links(&vertex.lsa, &area.state.lsdb, lsa_entries)
        {
            // Check if the LSAs are mutually linked.
            if !vertex_lsa_links(&link.lsa, &area.state.lsdb, lsa_entries)
                .any(|link| link.id == vertex.id)
            {
                continue;
            }

            // Check if the link's vertex is already on the shortest-path tree.
            if spt.contains_key(&link.id) {
                continue;
            }

            // Calculate distance to the link's vertex.
            let distance = vertex.distance.saturating_add(link.cost.into());

            // Increment number of hops to the root.
            let mut hops = vertex.hops;
            if link.lsa.is_router() {
                hops = hops.saturating_add(1);
            }

            // Check if this vertex is already present on the candidate list.
            if let Some((cand_key, cand_v)) =
                cand_list.iter().find(|(_, cand_v)| cand_v.id == link.id)
            {
                match distance.cmp(&cand_v.distance) {
                    Ordering::Less => {
                        // Remove vertex since its key has changed. It will be
                        // re-added with the correct key below.
                        let cand_key = *cand_key;
                        cand_list.remove(&cand_key);
                    }
                    // Equal-cost paths aren't merged: the path found first
                    // is kept.
                    Ordering::Equal | Ordering::Greater => continue,
                }
            }

            // Compute the vertex's nexthop.
            let mut cand_v = Vertex::new(link.id, link.lsa, distance, hops);
            match calc_nexthop(
                area,
                vertex,
                link.parent,
                link.id,
                &cand_v.lsa,
                interfaces,
            ) {
                Ok(nexthop) => cand_v.nexthop = nexthop,
                Err(error) => error.log(),
            }
            cand_list.insert((distance, link.id), cand_v);
        }
    }

    // Update area's SPT.
    area.state.spt = spt;

    // Update statistics.
    area.state.spf_run_count += 1;
}

// Computes the nexthop that should be used to reach the given destination.
fn calc_nexthop(
    area: &Area,
    parent: &Vertex,
    parent_link: Option<&LsaRouterLink>,
    dest_id: VertexId,
    dest_lsa: &VertexLsa,
    interfaces: &Arena<Interface>,
) -> Result<Option<Nexthop>, Error> {
    // If there is at least one intervening router in the current shortest
    // path between the destination and the root, the destination simply
    // inherits the nexthop from the parent.
    if parent.hops > 0 {
        return Ok(parent.nexthop);
    }

    match &parent.lsa {
        // The parent vertex is the root.
        VertexLsa::Router(parent_lsa) => {
            // The destination is either a directly connected network or
            // directly connected router. The outgoing interface in this case
            // is simply the OSPF interface connecting to the destination
            // network/router.
            let parent_link =
                parent_link.ok_or(Error::SpfNexthopCalcError(dest_id))?;
            let (iface_idx, iface) = area
                .interfaces
                .get_by_addr(interfaces, parent_link.link_data)
                .ok_or(Error::SpfNexthopCalcError(dest_id))?;

            match dest_lsa {
                VertexLsa::Router(dest_lsa) => {
                    // The nexthop address is the address the neighbor
                    // advertises for its link back to the calculating
                    // router, preferably one in the interface's subnet.
                    let root_id = parent_lsa.hdr.adv_rtr;
                    let links = dest_lsa
                        .body
                        .as_router()
                        .unwrap()
                        .links
                        .iter()
                        .filter(|link| {
                            link.link_type == LsaRouterLinkType::PointToPoint
                                && link.link_id == root_id
                        })
                        .collect::<Vec<_>>();
                    let link = links
                        .iter()
                        .find(|link| {
                            iface.config.address.contains(link.link_data)
                        })
                        .or_else(|| links.first())
                        .ok_or(Error::SpfNexthopCalcError(dest_id))?;

                    Ok(Some(Nexthop::new(
                        iface_idx,
                        Some(link.link_data),
                        Some(dest_lsa.hdr.adv_rtr),
                    )))
                }
                VertexLsa::Network(_) => {
                    Ok(Some(Nexthop::new(iface_idx, None, None)))
                }
            }
        }
        // The parent vertex is a network that directly connects the
        // calculating router to the destination router.
        VertexLsa::Network(parent_lsa) => {
            // The nexthop is determined by examining the destination's
            // router-LSA: the link that points back to the parent network
            // provides the IP address of the nexthop router.
            let lsa_body = parent_lsa.body.as_network().unwrap();
            let parent_network =
                Ipv4Network::with_netmask(parent_lsa.hdr.lsa_id, lsa_body.mask)
                    .map_err(|_| Error::SpfNexthopCalcError(dest_id))?;
            let dest_lsa = dest_lsa
                .as_router()
                .ok_or(Error::SpfNexthopCalcError(dest_id))?;
            let dest_link = dest_lsa
                .body
                .as_router()
                .unwrap()
                .links
                .iter()
                .filter(|link| {
                    link.link_type == LsaRouterLinkType::TransitNetwork
                })
                .find(|link| parent_network.contains(link.link_data))
                .ok_or(Error::SpfNexthopCalcError(dest_id))?;

            // Inherit outgoing interface from the parent network.
            let iface_idx = parent
                .nexthop
                .ok_or(Error::SpfNexthopCalcError(dest_id))?
                .iface_idx;

            Ok(Some(Nexthop::new(
                iface_idx,
                Some(dest_link.link_data),
                Some(dest_lsa.hdr.adv_rtr),
            )))
        }
    }
}

// Finds the non-MaxAge LSA of the given vertex.
fn vertex_lsa_find(
    id: VertexId,
    lsdb: &Lsdb,
    lsa_entries: &Arena<LsaEntry>,
) -> Option<VertexLsa> {
    match id {
        VertexId::Network { dr_addr } => {
            // SPF needs to find a Network-LSA knowing only its LS-ID but not
            // its advertising router.
            lsdb.iter_by_type(lsa_entries, LsaTypeCode::Network.into())
                .map(|(_, lse)| &lse.data)
                .filter(|lsa| !lsa.hdr.is_maxage())
                .find(|lsa| lsa.hdr.lsa_id == dr_addr)
                .map(|lsa| VertexLsa::Network(lsa.clone()))
        }
        VertexId::Router { router_id } => {
            let lsa_key =
                LsaKey::new(LsaTypeCode::Router.into(), router_id, router_id);
            lsdb.get(lsa_entries, &lsa_key)
                .filter(|(_, lse)| !lse.data.hdr.is_maxage())
                .map(|(_, lse)| VertexLsa::Router(lse.data.clone()))
        }
    }
}

// Returns iterator over all links of the provided SPF vertex whose remote
// vertex LSA exists.
fn vertex_lsa_links<'a>(
    vertex_lsa: &'a VertexLsa,
    lsdb: &'a Lsdb,
    lsa_entries: &'a Arena<LsaEntry>,
) -> Box<dyn Iterator<Item = SpfLink<'a>> + 'a> {
    match vertex_lsa {
        VertexLsa::Network(lsa) => {
            let lsa_body = lsa.body.as_network().unwrap();
            let iter =
                lsa_body
                    .attached_rtrs
                    .iter()
                    .filter_map(move |router_id| {
                        let link_vid = VertexId::Router {
                            router_id: *router_id,
                        };
                        vertex_lsa_find(link_vid, lsdb, lsa_entries).map(
                            |link_vlsa| {
                                SpfLink::new(None, link_vid, link_vlsa, 0)
                            },
                        )
                    });
            Box::new(iter)
        }
        VertexLsa::Router(lsa) => {
            let lsa_body = lsa.body.as_router().unwrap();
            let iter = lsa_body
                .links
                .iter()
                .filter_map(|link| match link.link_type {
                    LsaRouterLinkType::PointToPoint => {
                        let link_vid = VertexId::Router {
                            router_id: link.link_id,
                        };
                        Some((link, link_vid))
                    }
                    LsaRouterLinkType::TransitNetwork => {
                        let link_vid = VertexId::Network {
                            dr_addr: link.link_id,
                        };
                        Some((link, link_vid))
                    }
                    LsaRouterLinkType::StubNetwork
                    | LsaRouterLinkType::VirtualLink => None,
                })
                .filter_map(move |(link, link_vid)| {
                    vertex_lsa_find(link_vid, lsdb, lsa_entries).map(
                        |link_vlsa| {
                            SpfLink::new(
                                Some(link),
                                link_vid,
                                link_vlsa,
                                link.metric,
                            )
                        },
                    )
                });
            Box::new(iter)
        }
    }
}

// Returns the networks described by the given vertex: the network itself for
// network vertices and the stub links for router vertices.
fn vertex_networks(
    vertex: &Vertex,
) -> Box<dyn Iterator<Item = SpfIntraAreaNetwork<'_>> + '_> {
    match &vertex.lsa {
        VertexLsa::Network(lsa) => {
            let lsa_body = lsa.body.as_network().unwrap();
            let network =
                Ipv4Network::with_netmask(lsa.hdr.lsa_id, lsa_body.mask)
                    .ok()
                    .map(|prefix| SpfIntraAreaNetwork {
                        vertex,
                        prefix: prefix.apply_mask(),
                        metric: 0,
                    });
            Box::new(network.into_iter())
        }
        VertexLsa::Router(lsa) => {
            let lsa_body = lsa.body.as_router().unwrap();
            let iter = lsa_body
                .links
                .iter()
                .filter(|link| link.link_type == LsaRouterLinkType::StubNetwork)
                .filter_map(move |link| {
                    let prefix =
                        Ipv4Network::with_netmask(link.link_id, link.link_data)
                            .ok()?;
                    Some(SpfIntraAreaNetwork {
                        vertex,
                        prefix: prefix.apply_mask(),
                        metric: link.metric,
                    })
                });
            Box::new(iter)
        }
    }
}

// RFC 3101 - Section 3.1:
// Elects the Type-7 translator of every attached NSSA. The translator is the
// reachable NSSA border router with the highest Router ID.
fn nssa_translator_election(
    instance: &InstanceUpView<'_>,
    areas: &mut Areas,
    interfaces: &Arena<Interface>,
) {
    let is_abr = areas.is_abr(interfaces);
    let router_id = instance.state.router_id;

    for area in areas
        .iter_mut()
        .filter(|area| area.config.area_type() == AreaType::Nssa)
    {
        let translator = is_abr
            && !area
                .state
                .routers
                .iter()
                .filter(|(_, route)| route.path_type == PathType::IntraArea)
                .filter(|(_, route)| route.is_abr())
                .any(|(abr_id, _)| *abr_id > router_id);

        if translator != area.state.nssa_translator {
            Debug::NssaTranslatorChange(area.area_id, translator).log();
            area.state.nssa_translator = translator;

            // Update the Nt-bit of the Router-LSA.
            let event = LsaOriginateEvent::AreaStart { area_id: area.id };
            instance.tx.lsa_orig_event(event);
        }
    }
}

// RFC 3101 - Section 3.2:
// Returns the AS-External LSAs that the NSSA translator(s) must originate on
// behalf of the Type-7 LSAs of their NSSAs.
fn nssa_translate(
    instance: &InstanceUpView<'_>,
    areas: &Areas,
    lsa_entries: &Arena<LsaEntry>,
) -> BTreeMap<Ipv4Network, LsaAsExternal> {
    let router_id = instance.state.router_id;
    let mut translated = BTreeMap::new();

    for area in areas
        .iter()
        .filter(|area| area.config.area_type() == AreaType::Nssa)
        .filter(|area| area.state.nssa_translator)
    {
        let mut candidates = BTreeMap::new();
        for (_, lse) in area
            .state
            .lsdb
            .iter_by_type(lsa_entries, LsaTypeCode::NssaExternal.into())
            .filter(|(_, lse)| !lse.data.hdr.is_maxage())
            .filter(|(_, lse)| lse.data.hdr.adv_rtr != router_id)
            // Only Type-7 LSAs with the P-bit set are translated.
            .filter(|(_, lse)| lse.data.hdr.options.contains(Options::NP))
        {
            let lsa = &lse.data;
            let Some(ext) = lsa.body.as_external() else {
                continue;
            };
            if ext.fwd_addr.is_none() || ext.metric >= LSA_INFINITY {
                continue;
            }
            let Ok(prefix) = Ipv4Network::with_netmask(lsa.hdr.lsa_id, ext.mask)
            else {
                continue;
            };
            let prefix = prefix.apply_mask();

            // The Type-7 LSA must be the one selected for the routing table
            // entry.
            if !instance
                .state
                .rib
                .get(&prefix)
                .is_some_and(|route| route.origin == Some(lsa.hdr.key()))
            {
                continue;
            }

            candidates.insert(prefix, ext.clone());
        }

        let ranges = &area.config.nssa_ranges;
        for (prefix, ext) in nssa_apply_ranges(ranges, candidates) {
            translated.entry(prefix).or_insert(ext);
        }
    }

    translated
}

// Applies the NSSA address ranges to the Type-7 routes about to be
// translated.
//
// When at least one advertised range is configured, routes falling inside a
// range are aggregated (advertised range) or suppressed (non-advertised
// range). Otherwise, non-advertised ranges only suppress the route with the
// exact same prefix.
fn nssa_apply_ranges(
    ranges: &[NssaRangeCfg],
    candidates: BTreeMap<Ipv4Network, LsaAsExternal>,
) -> BTreeMap<Ipv4Network, LsaAsExternal> {
    let mut translated = BTreeMap::new();
    let any_advertise = ranges.iter().any(|range| range.advertise);

    for (prefix, ext) in candidates {
        if any_advertise {
            let range = ranges
                .iter()
                .find(|range| range.prefix.apply_mask().is_supernet_of(prefix));
            if let Some(range) = range {
                if range.advertise {
                    let range_prefix = range.prefix.apply_mask();
                    let aggregate = translated
                        .entry(range_prefix)
                        .or_insert_with(|| LsaAsExternal {
                            mask: range_prefix.mask(),
                            flags: LsaAsExternalFlags::empty(),
                            metric: 0,
                            fwd_addr: None,
                            tag: 0,
                        });
                    aggregate.flags.insert(ext.flags);
                    aggregate.metric = aggregate.metric.max(ext.metric);
                }
                continue;
            }
        } else if ranges
            .iter()
            .any(|range| range.prefix.apply_mask() == prefix)
        {
            continue;
        }

        translated.insert(prefix, ext);
    }

    translated
}

// ===== unit tests =====
