//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::Ipv4Addr;
use std::ops::RangeInclusive;
use std::sync::Arc;

use enum_as_inner::EnumAsInner;
use generational_arena::Index;
use ospfsim_utils::task::IntervalTask;
use serde::{Deserialize, Serialize};

use crate::area::Area;
use crate::error::Error;
use crate::instance::InstanceChannelsTx;
use crate::interface::Interface;
use crate::lsdb::{LsaDelayedOrig, LsaEntry};
use crate::neighbor::{Neighbor, NeighborNetId};
use crate::packet::lsa::{Lsa, LsaKey, LsaType};
use crate::tasks;

// Object identifiers are never reused, so timers and deferred events holding
// one can detect that their target is gone.
pub type ObjectId = u32;

pub type AreaId = ObjectId;
pub type AreaIndex = Index;
pub type InterfaceId = ObjectId;
pub type InterfaceIndex = Index;
pub type NeighborId = ObjectId;
pub type NeighborIndex = Index;
pub type LsaEntryId = ObjectId;
pub type LsaEntryIndex = Index;

#[derive(Debug)]
pub struct Arena<T>(generational_arena::Arena<T>);

// Arena objects carrying an ObjectId.
pub(crate) trait Identified {
    fn object_id(&self) -> ObjectId;
}

// Allocates object IDs and maps them to arena slots.
#[derive(Debug, Default)]
struct IdMap {
    slots: HashMap<ObjectId, Index>,
    last_id: ObjectId,
}

#[derive(Debug, Default)]
pub struct Areas {
    arena: Arena<Area>,
    ids: IdMap,
    by_area_id: BTreeMap<Ipv4Addr, AreaIndex>,
}

// Interfaces of a single area. The objects live in the instance-wide arena.
#[derive(Debug, Default)]
pub struct Interfaces {
    ids: IdMap,
    by_name: BTreeMap<String, InterfaceIndex>,
    by_ifindex: HashMap<u32, InterfaceIndex>,
}

// Neighbors of a single interface.
#[derive(Debug, Default)]
pub struct Neighbors {
    ids: IdMap,
    by_router_id: BTreeMap<Ipv4Addr, NeighborIndex>,
    by_net_id: BTreeMap<NeighborNetId, NeighborIndex>,
}

// Link-state database of a single flooding scope.
#[derive(Debug, Default)]
pub struct Lsdb {
    ids: IdMap,
    // Sorted by LSA type first, then advertising router and LSA ID.
    entries: BTreeMap<LsaKey, LsaEntryIndex>,
    // MaxAge LSAs waiting to be removed.
    pub maxage_lsas: HashSet<LsaEntryIndex>,
    maxage_sweeper: Option<IntervalTask>,
    // Originations postponed by MinLSInterval.
    pub delayed_orig: HashMap<LsaKey, LsaDelayedOrig>,
    // LSAs to reoriginate once the flushed wrapping instance is gone.
    pub seqno_wrapping: HashMap<LsaKey, Lsa>,
}

// Stable LSDB reference, used by timers and deferred events.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsdbId {
    Link(AreaId, InterfaceId),
    Area(AreaId),
    As,
}

#[derive(Clone, Copy, Debug, EnumAsInner, Eq, PartialEq)]
pub enum LsdbIndex {
    Link(AreaIndex, InterfaceIndex),
    Area(AreaIndex),
    As,
}

// ===== impl Arena =====

impl<T> Arena<T> {
    pub(crate) fn iter(&self) -> impl Iterator<Item = (Index, &T)> {
        self.0.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = (Index, &mut T)> {
        self.0.iter_mut()
    }

    fn entry(&self, idx: Index) -> (Index, &T) {
        (idx, &self.0[idx])
    }

    fn entry_mut(&mut self, idx: Index) -> (Index, &mut T) {
        (idx, &mut self.0[idx])
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Arena<T> {
        Arena(Default::default())
    }
}

impl<T> std::ops::Index<Index> for Arena<T> {
    type Output = T;

    fn index(&self, index: Index) -> &Self::Output {
        &self.0[index]
    }
}

impl<T> std::ops::IndexMut<Index> for Arena<T> {
    fn index_mut(&mut self, index: Index) -> &mut Self::Output {
        &mut self.0[index]
    }
}

// ===== impl IdMap =====

impl IdMap {
    fn allocate(&mut self) -> ObjectId {
        self.last_id += 1;
        self.last_id
    }

    fn link(&mut self, id: ObjectId, idx: Index) {
        self.slots.insert(id, idx);
    }

    fn unlink(&mut self, id: ObjectId) {
        self.slots.remove(&id);
    }

    // The slot must still hold the object the ID was allocated for.
    fn find<'a, T: Identified>(
        &self,
        arena: &'a Arena<T>,
        id: ObjectId,
    ) -> Option<(Index, &'a T)> {
        let idx = *self.slots.get(&id)?;
        arena
            .0
            .get(idx)
            .filter(|obj| obj.object_id() == id)
            .map(|obj| (idx, obj))
    }

    fn find_mut<'a, T: Identified>(
        &self,
        arena: &'a mut Arena<T>,
        id: ObjectId,
    ) -> Option<(Index, &'a mut T)> {
        let idx = *self.slots.get(&id)?;
        arena
            .0
            .get_mut(idx)
            .filter(|obj| obj.object_id() == id)
            .map(|obj| (idx, obj))
    }
}

// ===== impl Areas =====

impl Areas {
    pub(crate) fn insert(
        &mut self,
        area_id: Ipv4Addr,
    ) -> (AreaIndex, &mut Area) {
        let id = self.ids.allocate();
        let area_idx = self.arena.0.insert(Area::new(id, area_id));
        self.ids.link(id, area_idx);
        let old = self.by_area_id.insert(area_id, area_idx);
        assert!(old.is_none(), "duplicate area {area_id}");

        self.arena.entry_mut(area_idx)
    }

    pub(crate) fn get_by_id(
        &self,
        id: AreaId,
    ) -> Result<(AreaIndex, &Area), Error> {
        self.ids
            .find(&self.arena, id)
            .ok_or(Error::AreaIdNotFound(id))
    }

    pub(crate) fn get_mut_by_id(
        &mut self,
        id: AreaId,
    ) -> Result<(AreaIndex, &mut Area), Error> {
        self.ids
            .find_mut(&mut self.arena, id)
            .ok_or(Error::AreaIdNotFound(id))
    }

    pub(crate) fn get_by_area_id(
        &self,
        area_id: Ipv4Addr,
    ) -> Option<(AreaIndex, &Area)> {
        let area_idx = *self.by_area_id.get(&area_id)?;
        Some(self.arena.entry(area_idx))
    }

    pub(crate) fn get_mut_by_area_id(
        &mut self,
        area_id: Ipv4Addr,
    ) -> Option<(AreaIndex, &mut Area)> {
        let area_idx = *self.by_area_id.get(&area_id)?;
        Some(self.arena.entry_mut(area_idx))
    }

    // Visits areas in ascending area ID order.
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Area> {
        self.by_area_id.values().map(|idx| &self.arena[*idx])
    }

    // Visits areas in arbitrary order.
    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &'_ mut Area> {
        self.arena.iter_mut().map(|(_, area)| area)
    }

    // Area indexes in ascending area ID order.
    pub(crate) fn indexes(&self) -> impl Iterator<Item = AreaIndex> + '_ {
        self.by_area_id.values().copied()
    }

    // An ABR has interfaces up in more than one area.
    pub(crate) fn is_abr(&self, interfaces: &Arena<Interface>) -> bool {
        self.active_count(interfaces) > 1
    }

    pub(crate) fn active_count(&self, interfaces: &Arena<Interface>) -> usize {
        self.iter()
            .filter(|area| area.is_active(interfaces))
            .count()
    }

    pub(crate) fn backbone(&self) -> Option<(AreaIndex, &Area)> {
        self.get_by_area_id(Ipv4Addr::UNSPECIFIED)
    }
}

impl std::ops::Index<AreaIndex> for Areas {
    type Output = Area;

    fn index(&self, index: AreaIndex) -> &Self::Output {
        &self.arena[index]
    }
}

impl std::ops::IndexMut<AreaIndex> for Areas {
    fn index_mut(&mut self, index: AreaIndex) -> &mut Self::Output {
        &mut self.arena[index]
    }
}

// ===== impl Interfaces =====

impl Interfaces {
    pub(crate) fn insert<'a>(
        &mut self,
        arena: &'a mut Arena<Interface>,
        ifname: &str,
        ifindex: u32,
    ) -> (InterfaceIndex, &'a mut Interface) {
        let id = self.ids.allocate();
        let iface = Interface::new(id, ifname.to_owned(), ifindex);
        let iface_idx = arena.0.insert(iface);
        self.ids.link(id, iface_idx);
        let old = self.by_name.insert(ifname.to_owned(), iface_idx);
        assert!(old.is_none(), "duplicate interface {ifname}");
        let old = self.by_ifindex.insert(ifindex, iface_idx);
        assert!(old.is_none(), "duplicate ifindex {ifindex}");

        arena.entry_mut(iface_idx)
    }

    pub(crate) fn get_by_id<'a>(
        &self,
        arena: &'a Arena<Interface>,
        id: InterfaceId,
    ) -> Result<(InterfaceIndex, &'a Interface), Error> {
        self.ids
            .find(arena, id)
            .ok_or(Error::InterfaceIdNotFound(id))
    }

    pub(crate) fn get_mut_by_id<'a>(
        &self,
        arena: &'a mut Arena<Interface>,
        id: InterfaceId,
    ) -> Result<(InterfaceIndex, &'a mut Interface), Error> {
        self.ids
            .find_mut(arena, id)
            .ok_or(Error::InterfaceIdNotFound(id))
    }

    pub(crate) fn get_by_ifindex<'a>(
        &self,
        arena: &'a Arena<Interface>,
        ifindex: u32,
    ) -> Option<(InterfaceIndex, &'a Interface)> {
        let iface_idx = *self.by_ifindex.get(&ifindex)?;
        Some(arena.entry(iface_idx))
    }

    // Looks up an operational interface by its primary address.
    pub(crate) fn get_by_addr<'a>(
        &self,
        arena: &'a Arena<Interface>,
        addr: Ipv4Addr,
    ) -> Option<(InterfaceIndex, &'a Interface)> {
        self.by_name
            .values()
            .map(|idx| arena.entry(*idx))
            .find(|(_, iface)| {
                !iface.is_down() && iface.config.address.ip() == addr
            })
    }

    // Visits interfaces sorted by name.
    pub(crate) fn iter<'a>(
        &'a self,
        arena: &'a Arena<Interface>,
    ) -> impl Iterator<Item = &'a Interface> + 'a {
        self.by_name.values().map(|idx| &arena[*idx])
    }

    pub(crate) fn indexes(&self) -> impl Iterator<Item = InterfaceIndex> + '_ {
        self.by_name.values().copied()
    }
}

// ===== impl Neighbors =====

impl Neighbors {
    pub(crate) fn insert<'a>(
        &mut self,
        arena: &'a mut Arena<Neighbor>,
        router_id: Ipv4Addr,
        src: Ipv4Addr,
        dd_seq_no: u32,
    ) -> (NeighborIndex, &'a mut Neighbor) {
        let id = self.ids.allocate();
        let nbr = Neighbor::new(id, router_id, src, dd_seq_no);
        let net_id = nbr.network_id();
        let nbr_idx = arena.0.insert(nbr);
        self.ids.link(id, nbr_idx);
        self.by_router_id.insert(router_id, nbr_idx);
        self.by_net_id.insert(net_id, nbr_idx);

        arena.entry_mut(nbr_idx)
    }

    pub(crate) fn delete(
        &mut self,
        arena: &mut Arena<Neighbor>,
        nbr_idx: NeighborIndex,
    ) {
        let Some(nbr) = arena.0.remove(nbr_idx) else {
            return;
        };
        self.ids.unlink(nbr.id);
        self.by_router_id.remove(&nbr.router_id);
        self.by_net_id.remove(&nbr.network_id());
    }

    // Re-keys a neighbor whose Hellos now carry a different Router ID.
    pub(crate) fn update_router_id(
        &mut self,
        nbr_idx: NeighborIndex,
        nbr: &mut Neighbor,
        router_id: Ipv4Addr,
    ) {
        self.by_router_id.remove(&nbr.router_id);
        nbr.router_id = router_id;
        self.by_router_id.insert(router_id, nbr_idx);
    }

    pub(crate) fn get_by_id<'a>(
        &self,
        arena: &'a Arena<Neighbor>,
        id: NeighborId,
    ) -> Result<(NeighborIndex, &'a Neighbor), Error> {
        self.ids
            .find(arena, id)
            .ok_or(Error::NeighborIdNotFound(id))
    }

    pub(crate) fn get_mut_by_id<'a>(
        &self,
        arena: &'a mut Arena<Neighbor>,
        id: NeighborId,
    ) -> Result<(NeighborIndex, &'a mut Neighbor), Error> {
        self.ids
            .find_mut(arena, id)
            .ok_or(Error::NeighborIdNotFound(id))
    }

    pub(crate) fn get_mut_by_router_id<'a>(
        &mut self,
        arena: &'a mut Arena<Neighbor>,
        router_id: Ipv4Addr,
    ) -> Option<(NeighborIndex, &'a mut Neighbor)> {
        let nbr_idx = *self.by_router_id.get(&router_id)?;
        Some(arena.entry_mut(nbr_idx))
    }

    pub(crate) fn get_by_net_id<'a>(
        &self,
        arena: &'a Arena<Neighbor>,
        net_id: NeighborNetId,
    ) -> Option<(NeighborIndex, &'a Neighbor)> {
        let nbr_idx = *self.by_net_id.get(&net_id)?;
        Some(arena.entry(nbr_idx))
    }

    pub(crate) fn get_mut_by_net_id<'a>(
        &mut self,
        arena: &'a mut Arena<Neighbor>,
        net_id: NeighborNetId,
    ) -> Option<(NeighborIndex, &'a mut Neighbor)> {
        let nbr_idx = *self.by_net_id.get(&net_id)?;
        Some(arena.entry_mut(nbr_idx))
    }

    // Visits neighbors sorted by Router ID.
    pub(crate) fn iter<'a>(
        &'a self,
        arena: &'a Arena<Neighbor>,
    ) -> impl Iterator<Item = &'a Neighbor> + 'a {
        self.by_router_id.values().map(|idx| &arena[*idx])
    }

    pub(crate) fn router_ids(&self) -> impl Iterator<Item = Ipv4Addr> + '_ {
        self.by_router_id.keys().copied()
    }

    pub(crate) fn indexes(&self) -> impl Iterator<Item = NeighborIndex> + '_ {
        self.by_router_id.values().copied()
    }

    pub(crate) fn count(&self) -> usize {
        self.by_router_id.len()
    }
}

// ===== impl Lsdb =====

impl Lsdb {
    pub(crate) fn insert<'a>(
        &mut self,
        arena: &'a mut Arena<LsaEntry>,
        lsdb_id: LsdbId,
        lsa: Arc<Lsa>,
        tx: &InstanceChannelsTx,
    ) -> (LsaEntryIndex, &'a mut LsaEntry) {
        let key = lsa.hdr.key();
        let maxage = lsa.hdr.is_maxage();
        let id = self.ids.allocate();
        let lse_idx = arena.0.insert(LsaEntry::new(lsdb_id, id, lsa, tx));
        self.ids.link(id, lse_idx);
        let old = self.entries.insert(key, lse_idx);
        assert!(old.is_none(), "duplicate LSA {key}");

        // MaxAge LSAs are removed by the periodic sweeper.
        if maxage {
            self.maxage_lsas.insert(lse_idx);
            if self.maxage_sweeper.is_none() {
                let task = tasks::lsdb_maxage_sweep_interval(lsdb_id, tx);
                self.maxage_sweeper = Some(task);
            }
        }

        arena.entry_mut(lse_idx)
    }

    pub(crate) fn delete(
        &mut self,
        arena: &mut Arena<LsaEntry>,
        lse_idx: LsaEntryIndex,
    ) {
        let Some(lse) = arena.0.remove(lse_idx) else {
            return;
        };
        self.ids.unlink(lse.id);
        self.entries.remove(&lse.data.hdr.key());
        self.maxage_lsas.remove(&lse_idx);
        if self.maxage_lsas.is_empty() {
            self.maxage_sweeper = None;
        }
    }

    pub(crate) fn clear(&mut self, arena: &mut Arena<LsaEntry>) {
        for (_, lse_idx) in self.ids.slots.drain() {
            arena.0.remove(lse_idx);
        }
        self.entries.clear();
        self.maxage_lsas.clear();
        self.maxage_sweeper = None;
        self.delayed_orig.clear();
        self.seqno_wrapping.clear();
    }

    pub(crate) fn get_by_id<'a>(
        &self,
        arena: &'a Arena<LsaEntry>,
        id: LsaEntryId,
    ) -> Result<(LsaEntryIndex, &'a LsaEntry), Error> {
        self.ids
            .find(arena, id)
            .ok_or(Error::LsaEntryIdNotFound(id))
    }

    pub(crate) fn get_mut_by_id<'a>(
        &self,
        arena: &'a mut Arena<LsaEntry>,
        id: LsaEntryId,
    ) -> Result<(LsaEntryIndex, &'a mut LsaEntry), Error> {
        self.ids
            .find_mut(arena, id)
            .ok_or(Error::LsaEntryIdNotFound(id))
    }

    pub(crate) fn get<'a>(
        &self,
        arena: &'a Arena<LsaEntry>,
        key: &LsaKey,
    ) -> Option<(LsaEntryIndex, &'a LsaEntry)> {
        let lse_idx = *self.entries.get(key)?;
        Some(arena.entry(lse_idx))
    }

    // Visits all LSAs in key order.
    pub(crate) fn iter<'a>(
        &'a self,
        arena: &'a Arena<LsaEntry>,
    ) -> impl Iterator<Item = (LsaEntryIndex, &'a LsaEntry)> + 'a {
        self.entries.values().map(|idx| arena.entry(*idx))
    }

    pub(crate) fn iter_by_type<'a>(
        &'a self,
        arena: &'a Arena<LsaEntry>,
        lsa_type: LsaType,
    ) -> impl Iterator<Item = (LsaEntryIndex, &'a LsaEntry)> + 'a {
        let range = key_range(lsa_type, None);
        self.entries
            .range(range)
            .map(|(_, idx)| arena.entry(*idx))
    }

    pub(crate) fn iter_by_type_advrtr<'a>(
        &'a self,
        arena: &'a Arena<LsaEntry>,
        lsa_type: LsaType,
        adv_rtr: Ipv4Addr,
    ) -> impl Iterator<Item = (LsaEntryIndex, &'a LsaEntry)> + 'a {
        let range = key_range(lsa_type, Some(adv_rtr));
        self.entries
            .range(range)
            .map(|(_, idx)| arena.entry(*idx))
    }

    pub(crate) fn maxage_sweeper_mut(&mut self) -> Option<&mut IntervalTask> {
        self.maxage_sweeper.as_mut()
    }
}

// ===== impl Identified =====

impl Identified for Area {
    fn object_id(&self) -> ObjectId {
        self.id
    }
}

impl Identified for Interface {
    fn object_id(&self) -> ObjectId {
        self.id
    }
}

impl Identified for Neighbor {
    fn object_id(&self) -> ObjectId {
        self.id
    }
}

impl Identified for LsaEntry {
    fn object_id(&self) -> ObjectId {
        self.id
    }
}

// ===== helper functions =====

// Key range covering one LSA type, optionally narrowed to a single
// advertising router.
fn key_range(
    lsa_type: LsaType,
    adv_rtr: Option<Ipv4Addr>,
) -> RangeInclusive<LsaKey> {
    let (first_rtr, last_rtr) = match adv_rtr {
        Some(adv_rtr) => (adv_rtr, adv_rtr),
        None => (Ipv4Addr::UNSPECIFIED, Ipv4Addr::BROADCAST),
    };
    let first = LsaKey::new(lsa_type, first_rtr, Ipv4Addr::UNSPECIFIED);
    let last = LsaKey::new(lsa_type, last_rtr, Ipv4Addr::BROADCAST);
    first..=last
}

// ===== global functions =====

// Resolves an LSDB reference, failing if its area or interface is gone.
pub(crate) fn lsdb_get<'a>(
    instance_lsdb: &'a Lsdb,
    areas: &'a Areas,
    interfaces: &'a Arena<Interface>,
    lsdb_id: LsdbId,
) -> Result<(LsdbIndex, &'a Lsdb), Error> {
    match lsdb_id {
        LsdbId::Link(area_id, iface_id) => {
            let (area_idx, area) = areas.get_by_id(area_id)?;
            let (iface_idx, iface) =
                area.interfaces.get_by_id(interfaces, iface_id)?;
            Ok((LsdbIndex::Link(area_idx, iface_idx), &iface.state.lsdb))
        }
        LsdbId::Area(area_id) => {
            let (area_idx, area) = areas.get_by_id(area_id)?;
            Ok((LsdbIndex::Area(area_idx), &area.state.lsdb))
        }
        LsdbId::As => Ok((LsdbIndex::As, instance_lsdb)),
    }
}

pub(crate) fn lsdb_get_mut<'a>(
    instance_lsdb: &'a mut Lsdb,
    areas: &'a mut Areas,
    interfaces: &'a mut Arena<Interface>,
    lsdb_id: LsdbId,
) -> Result<(LsdbIndex, &'a mut Lsdb), Error> {
    match lsdb_id {
        LsdbId::Link(area_id, iface_id) => {
            let (area_idx, area) = areas.get_mut_by_id(area_id)?;
            let (iface_idx, iface) =
                area.interfaces.get_mut_by_id(interfaces, iface_id)?;
            let lsdb_idx = LsdbIndex::Link(area_idx, iface_idx);
            Ok((lsdb_idx, &mut iface.state.lsdb))
        }
        LsdbId::Area(area_id) => {
            let (area_idx, area) = areas.get_mut_by_id(area_id)?;
            Ok((LsdbIndex::Area(area_idx), &mut area.state.lsdb))
        }
        LsdbId::As => Ok((LsdbIndex::As, instance_lsdb)),
    }
}

pub(crate) fn lsdb_index<'a>(
    instance_lsdb: &'a Lsdb,
    areas: &'a Areas,
    interfaces: &'a Arena<Interface>,
    lsdb_idx: LsdbIndex,
) -> (LsdbId, &'a Lsdb) {
    match lsdb_idx {
        LsdbIndex::Link(area_idx, iface_idx) => {
            let iface = &interfaces[iface_idx];
            let lsdb_id = LsdbId::Link(areas[area_idx].id, iface.id);
            (lsdb_id, &iface.state.lsdb)
        }
        LsdbIndex::Area(area_idx) => {
            let area = &areas[area_idx];
            (LsdbId::Area(area.id), &area.state.lsdb)
        }
        LsdbIndex::As => (LsdbId::As, instance_lsdb),
    }
}

pub(crate) fn lsdb_index_mut<'a>(
    instance_lsdb: &'a mut Lsdb,
    areas: &'a mut Areas,
    interfaces: &'a mut Arena<Interface>,
    lsdb_idx: LsdbIndex,
) -> (LsdbId, &'a mut Lsdb) {
    match lsdb_idx {
        LsdbIndex::Link(area_idx, iface_idx) => {
            let iface = &mut interfaces[iface_idx];
            let lsdb_id = LsdbId::Link(areas[area_idx].id, iface.id);
            (lsdb_id, &mut iface.state.lsdb)
        }
        LsdbIndex::Area(area_idx) => {
            let area = &mut areas[area_idx];
            (LsdbId::Area(area.id), &mut area.state.lsdb)
        }
        LsdbIndex::As => (LsdbId::As, instance_lsdb),
    }
}
