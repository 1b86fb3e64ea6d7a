//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cmp::Ordering;
use std::collections::{BTreeMap, btree_map};
use std::iter;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use bitflags::bitflags;
use ipnetwork::Ipv4Network;
use ospfsim_utils::ip::{self, Ipv4NetworkExt};
use ospfsim_utils::sim::SimTime;
use ospfsim_utils::task::TimeoutTask;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::area::{self, Area, AreaType, OptionsLocation};
use crate::collections::{
    AreaId, AreaIndex, Arena, InterfaceId, InterfaceIndex, LsaEntryId,
    LsaEntryIndex, LsdbId, LsdbIndex, lsdb_get, lsdb_index_mut,
};
use crate::config::ExternalMetricType;
use crate::debug::{Debug, LsaFlushReason};
use crate::error::Error;
use crate::flood::flood;
use crate::instance::{InstanceArenas, InstanceChannelsTx, InstanceUpView};
use crate::interface::{Interface, InterfaceType, ism};
use crate::neighbor::nsm;
use crate::packet::Options;
use crate::packet::lsa::{
    Lsa, LsaAsExternal, LsaAsExternalFlags, LsaBody, LsaHdr, LsaKey,
    LsaNetwork, LsaRouter, LsaRouterFlags, LsaRouterLink, LsaRouterLinkType,
    LsaScope, LsaSummary, LsaType, LsaTypeCode,
};
use crate::{spf, tasks};

// Architectural Constants.
pub const LSA_REFRESH_TIME: u16 = 1800;
pub const LSA_MAX_AGE: u16 = 3600;
pub const LSA_MAX_AGE_DIFF: u16 = 900;
pub const LSA_DO_NOT_AGE: u16 = 0x8000;
pub const LSA_INFINITY: u32 = 0x00ffffff;
pub const LSA_INIT_SEQ_NO: u32 = 0x80000001;
pub const LSA_MAX_SEQ_NO: u32 = 0x7fffffff;
pub const LSA_RESERVED_SEQ_NO: u32 = 0x80000000;
pub const LSA_MIN_INTERVAL: Duration = Duration::from_secs(5);
pub const LSA_MIN_ARRIVAL: Duration = Duration::from_secs(1);

#[derive(Debug)]
pub struct LsaEntry {
    // LSA ID.
    pub id: LsaEntryId,
    // LSA data.
    pub data: Arc<Lsa>,
    // Expiry timer that triggers when the LSA age reaches MaxAge.
    pub expiry_timer: Option<TimeoutTask>,
    // Refresh timer that triggers every LSA_REFRESH_TIME seconds.
    pub refresh_timer: Option<TimeoutTask>,
    // LSA entry flags.
    pub flags: LsaEntryFlags,
}

bitflags! {
    #[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
    pub struct LsaEntryFlags: u8 {
        const RECEIVED = 0x01;
        const SELF_ORIGINATED = 0x02;
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub enum LsaOriginateEvent {
    AreaStart {
        area_id: AreaId,
    },
    InterfaceStateChange {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    InterfaceDrChange {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    NeighborToFromFull {
        area_id: AreaId,
        iface_id: InterfaceId,
    },
    SelfOriginatedLsaRcvd {
        lsdb_id: LsdbId,
        lse_id: LsaEntryId,
    },
    ExternalRoutesChange,
}

#[derive(Debug)]
pub struct LsaDelayedOrig {
    pub data: Lsa,
    pub timeout: TimeoutTask,
}

// ===== impl LsaEntry =====

impl LsaEntry {
    pub(crate) fn new(
        lsdb_id: LsdbId,
        id: LsaEntryId,
        data: Arc<Lsa>,
        tx: &InstanceChannelsTx,
    ) -> LsaEntry {
        // LSAs carrying the DoNotAge bit never expire on their own.
        let expiry_timer = (!data.hdr.is_maxage() && !data.hdr.do_not_age())
            .then(|| tasks::lsa_expiry_timer(lsdb_id, id, &data, tx));

        LsaEntry {
            id,
            data,
            expiry_timer,
            refresh_timer: None,
            flags: Default::default(),
        }
    }
}

// ===== global functions =====

// Decides which of two instances of the same LSA is more recent
// (RFC 2328, section 13.1). `Greater` means `a` is. `Equal` means both are
// considered the same instance.
//
// Ages must be current.
pub fn lsa_compare(a: &LsaHdr, b: &LsaHdr) -> Ordering {
    // Sequence numbers are signed, starting at InitialSequenceNumber.
    let seq_no = |hdr: &LsaHdr| hdr.seq_no as i32;

    seq_no(a)
        .cmp(&seq_no(b))
        .then(a.cksum.cmp(&b.cksum))
        .then(a.is_maxage().cmp(&b.is_maxage()))
        .then_with(|| {
            if a.age().abs_diff(b.age()) > LSA_MAX_AGE_DIFF {
                // Younger wins.
                b.age().cmp(&a.age())
            } else {
                Ordering::Equal
            }
        })
}

// Whether two instances differ in a way that matters for the routing table
// (RFC 2328, section 13.2). The header's age, sequence number and checksum
// don't count.
pub(crate) fn lsa_same_contents(a: &Lsa, b: &Lsa) -> bool {
    let body = LsaHdr::LENGTH as usize..;
    a.hdr.options == b.hdr.options
        && a.hdr.is_maxage() == b.hdr.is_maxage()
        && a.hdr.length == b.hdr.length
        && a.raw[body.clone()] == b.raw[body]
}

// MinLSArrival: a flooded instance arrived too recently to be replaced.
pub(crate) fn lsa_min_arrival_check(lse: &LsaEntry, now: SimTime) -> bool {
    lse.flags.contains(LsaEntryFlags::RECEIVED)
        && lsa_installed_within(lse, now, LSA_MIN_ARRIVAL)
}

// MinLSInterval: our own instance was originated too recently to be
// replaced.
fn lsa_min_orig_interval_check(lse: &LsaEntry, now: SimTime) -> bool {
    !lse.flags.contains(LsaEntryFlags::RECEIVED)
        && lsa_installed_within(lse, now, LSA_MIN_INTERVAL)
}

fn lsa_installed_within(
    lse: &LsaEntry,
    now: SimTime,
    interval: Duration,
) -> bool {
    lse.data.base_time.is_some_and(|base_time| {
        now.saturating_duration_since(base_time) < interval
    })
}

// Whether an LSA type may be stored in an area of the given type and sent
// to a neighbor with the given options. Either check is skipped when its
// argument is `None`.
pub(crate) fn lsa_type_is_valid(
    area_type: Option<AreaType>,
    nbr_options: Option<Options>,
    lsa_type: LsaType,
) -> bool {
    let Some(type_code) = lsa_type.type_code() else {
        return false;
    };

    if lsa_type.is_opaque()
        && nbr_options.is_some_and(|options| !options.contains(Options::O))
    {
        return false;
    }

    // Type-4 summaries are kept out of stub areas as well (RFC 2328,
    // errata 3746).
    match (area_type, type_code) {
        (Some(area_type), LsaTypeCode::NssaExternal) => {
            area_type == AreaType::Nssa
        }
        (
            Some(AreaType::Stub | AreaType::Nssa),
            LsaTypeCode::SummaryRouter
            | LsaTypeCode::AsExternal
            | LsaTypeCode::OpaqueAs,
        ) => false,
        _ => true,
    }
}

// An LSA is ours if we are its advertising router, or if it's a
// Network-LSA named after one of our interface addresses (left behind by an
// earlier incarnation of this router).
pub(crate) fn lsa_is_self_originated(
    lsa: &Lsa,
    router_id: Ipv4Addr,
    interfaces: &Arena<Interface>,
) -> bool {
    let hdr = &lsa.hdr;
    hdr.adv_rtr == router_id
        || hdr.lsa_type.type_code() == Some(LsaTypeCode::Network)
            && interfaces
                .iter()
                .any(|(_, iface)| iface.config.address.ip() == hdr.lsa_id)
}

// Indication-LSA (RFC 1793, section 2.5.1): a Summary-ASBR-LSA an ABR
// originates about itself, with LSInfinity metric and the DC bit clear, to
// tell the area that some router doesn't support demand circuits.
pub(crate) fn lsa_is_indication(lsa: &Lsa) -> bool {
    let hdr = &lsa.hdr;
    hdr.lsa_type.type_code() == Some(LsaTypeCode::SummaryRouter)
        && hdr.lsa_id == hdr.adv_rtr
        && !hdr.is_maxage()
        && !hdr.options.contains(Options::DC)
        && lsa
            .body
            .as_summary()
            .is_some_and(|summary| summary.metric == LSA_INFINITY)
}

// LSDB holding LSAs of the given type, as seen from an interface.
//
// Callers reject unknown types beforehand.
pub(crate) fn lsdb_get_by_lsa_type(
    iface_idx: InterfaceIndex,
    area_idx: AreaIndex,
    lsa_type: LsaType,
) -> LsdbIndex {
    match lsa_type.scope() {
        LsaScope::Link => LsdbIndex::Link(area_idx, iface_idx),
        LsaScope::Area => LsdbIndex::Area(area_idx),
        LsaScope::As => LsdbIndex::As,
        LsaScope::Unknown => unreachable!("LSA of unknown type"),
    }
}

// Replaces any previous instance of the LSA in the LSDB (RFC 2328,
// section 13.2) and schedules SPF when the contents changed.
pub(crate) fn install(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lsa: Arc<Lsa>,
) -> LsaEntryIndex {
    Debug::LsaInstall(&lsa.hdr).log();

    // The old instance is no longer waiting to be acknowledged.
    rxmt_lists_remove(arenas, lsdb_idx, &lsa, instance.tx.now());

    let (lsdb_id, lsdb) = lsdb_index_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        &mut arenas.interfaces,
        lsdb_idx,
    );
    let old_lsa = lsdb
        .get(&arenas.lsa_entries, &lsa.hdr.key())
        .map(|(old_lse_idx, old_lse)| (old_lse_idx, old_lse.data.clone()));
    if let Some((old_lse_idx, _)) = old_lsa {
        lsdb.delete(&mut arenas.lsa_entries, old_lse_idx);
    }
    let (lse_idx, lse) = lsdb.insert(
        &mut arenas.lsa_entries,
        lsdb_id,
        lsa.clone(),
        instance.tx,
    );

    let router_id = instance.state.router_id;
    let self_originated =
        lsa_is_self_originated(&lsa, router_id, &arenas.interfaces);
    if self_originated {
        lse.flags.insert(LsaEntryFlags::SELF_ORIGINATED);
    }

    // Our own summaries are outputs of the routing table, and unknown LSAs
    // don't take part in it.
    let contents_changed = old_lsa
        .as_ref()
        .is_none_or(|(_, old_lsa)| !lsa_same_contents(old_lsa, &lsa));
    let own_summary = self_originated && lsa.body.as_summary().is_some();
    let spf_needed =
        contents_changed && !own_summary && !lsa.body.is_unknown();

    lsdb_install(instance, arenas, lsdb_idx, &lsa);
    if spf_needed {
        spf::schedule(instance);
    }

    lse_idx
}

// Installs and floods a new self-originated instance.
//
// Going past MaxSequenceNumber first requires flushing the current
// instance. The new one is parked until every neighbor acknowledged the
// flush, then restarts at InitialSequenceNumber (RFC 2328, section 12.1.6).
pub(crate) fn originate(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lsa: Lsa,
) {
    let (lsdb_id, lsdb) = lsdb_index_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        &mut arenas.interfaces,
        lsdb_idx,
    );

    let lsa_key = lsa.hdr.key();
    let seq_no_wrapped = lsa.hdr.seq_no == LSA_MAX_SEQ_NO.wrapping_add(1);
    if seq_no_wrapped
        && let Some((old_lse_idx, _)) = lsdb.get(&arenas.lsa_entries, &lsa_key)
    {
        Debug::LsaSeqNoWrapping(&lsa.hdr).log();
        lsdb.seqno_wrapping.insert(lsa_key, lsa);
        let reason = LsaFlushReason::PrematureAging;
        flush(instance, arenas, lsdb_idx, old_lse_idx, reason);
        return;
    }

    Debug::LsaOriginate(&lsa.hdr).log();
    let lse_idx = install(instance, arenas, lsdb_idx, Arc::new(lsa));
    let lse = &mut arenas.lsa_entries[lse_idx];
    flood(
        instance,
        &arenas.areas,
        &mut arenas.interfaces,
        &mut arenas.neighbors,
        lsdb_idx,
        &lse.data,
        None,
    );
    instance.state.statistics.lsa_originated += 1;

    let task = tasks::lsa_refresh_timer(lsdb_id, lse.id, instance.tx);
    lse.refresh_timer = Some(task);
}

// Builds the next instance of a self-originated LSA and originates it
// unless nothing changed (RFC 2328, section 12.4). Instances requested
// within MinLSInterval of the previous one are deferred, and only the most
// recent deferred instance is kept.
pub(crate) fn originate_check(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    options: Option<Options>,
    lsa_id: Ipv4Addr,
    lsa_body: LsaBody,
) {
    let now = instance.tx.now();
    let adv_rtr = instance.state.router_id;
    let (lsdb_id, lsdb) = lsdb_index_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        &mut arenas.interfaces,
        lsdb_idx,
    );
    let lsa_key = LsaKey::new(lsa_body.lsa_type(), adv_rtr, lsa_id);
    let old_lse = lsdb.get(&arenas.lsa_entries, &lsa_key).map(|(_, lse)| lse);

    let seq_no = old_lse
        .map(|old_lse| old_lse.data.hdr.seq_no.wrapping_add(1))
        .unwrap_or(LSA_INIT_SEQ_NO);
    let options = options.unwrap_or_default();
    let lsa = Lsa::new(0, options, lsa_id, adv_rtr, seq_no, lsa_body, now);

    if let Some(old_lse) = old_lse {
        // A copy learned through flooding is replaced even when identical,
        // so that ours has the higher sequence number.
        if !old_lse.flags.contains(LsaEntryFlags::RECEIVED)
            && lsa_same_contents(&old_lse.data, &lsa)
        {
            lsdb.delayed_orig.remove(&lsa_key);
            return;
        }

        if let Some(delayed) = lsdb.delayed_orig.get_mut(&lsa_key) {
            Debug::LsaOriginateMinInterval(&lsa.hdr).log();
            delayed.data = lsa;
            return;
        }
        if lsa_min_orig_interval_check(old_lse, now) {
            Debug::LsaOriginateMinInterval(&lsa.hdr).log();
            let timeout = tasks::lsa_orig_delayed_timer(
                lsdb_id,
                lsa_key,
                old_lse.data.base_time,
                instance.tx,
            );
            let delayed = LsaDelayedOrig { data: lsa, timeout };
            lsdb.delayed_orig.insert(lsa_key, delayed);
            return;
        }
    }

    originate(instance, arenas, lsdb_idx, lsa);
}

// Withdraws an LSA by setting its age to MaxAge and reflooding it. The entry
// stays in the LSDB until the MaxAge sweeper finds it acknowledged.
pub(crate) fn flush(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lse_idx: LsaEntryIndex,
    reason: LsaFlushReason,
) {
    let lse = &mut arenas.lsa_entries[lse_idx];
    if lse.data.hdr.is_maxage() {
        return;
    }
    // Only the originator may age an LSA prematurely.
    debug_assert!(
        reason != LsaFlushReason::PrematureAging
            || lse.flags.contains(LsaEntryFlags::SELF_ORIGINATED)
    );

    Debug::LsaFlush(&lse.data.hdr, reason).log();
    lse.expiry_timer = None;
    lse.refresh_timer = None;

    let mut lsa = Lsa::clone(&lse.data);
    lsa.set_maxage(instance.tx.now());
    let lsa_key = lsa.hdr.key();
    let lse_idx = install(instance, arenas, lsdb_idx, Arc::new(lsa));
    flood(
        instance,
        &arenas.areas,
        &mut arenas.interfaces,
        &mut arenas.neighbors,
        lsdb_idx,
        &arenas.lsa_entries[lse_idx].data,
        None,
    );
    instance.state.statistics.lsa_flushed += 1;

    // A deferred origination would resurrect the LSA.
    let (_, lsdb) = lsdb_index_mut(
        &mut instance.state.lsdb,
        &mut arenas.areas,
        &mut arenas.interfaces,
        lsdb_idx,
    );
    lsdb.delayed_orig.remove(&lsa_key);
}

// Reacts to a topology change by originating or flushing every
// self-originated LSA it may affect.
pub(crate) fn lsa_orig_event(
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
    event: LsaOriginateEvent,
) -> Result<(), Error> {
    match event {
        LsaOriginateEvent::AreaStart { area_id } => {
            let (_, area) = arenas.areas.get_by_id(area_id)?;
            lsa_orig_router(area, instance, arenas);
            if area.config.area_type() == AreaType::Nssa {
                lsa_orig_nssa_external(area, instance, arenas);
            }
        }
        LsaOriginateEvent::InterfaceStateChange { .. } => {
            // The router may have become or stopped being an ABR, which
            // shows in every Router-LSA and in NSSA translation.
            arenas
                .areas
                .iter()
                .for_each(|area| lsa_orig_router(area, instance, arenas));
            lsa_orig_external(instance, arenas);
        }
        LsaOriginateEvent::InterfaceDrChange { area_id, iface_id }
        | LsaOriginateEvent::NeighborToFromFull { area_id, iface_id } => {
            let (_, area) = arenas.areas.get_by_id(area_id)?;
            let (_, iface) =
                area.interfaces.get_by_id(&arenas.interfaces, iface_id)?;
            lsa_orig_router(area, instance, arenas);

            // A Network-LSA is only meaningful while we're DR and fully
            // adjacent to at least one router.
            let full_nbr = iface
                .state
                .neighbors
                .iter(&arenas.neighbors)
                .any(|nbr| nbr.state == nsm::State::Full);
            if iface.state.ism_state == ism::State::Dr && full_nbr {
                lsa_orig_network(iface, area, instance, arenas);
            } else {
                lsa_flush_network(iface, area, instance, arenas);
            }
        }
        LsaOriginateEvent::SelfOriginatedLsaRcvd { lsdb_id, lse_id } => {
            process_self_originated_lsa(instance, arenas, lsdb_id, lse_id)?;
        }
        LsaOriginateEvent::ExternalRoutesChange => {
            lsa_orig_external(instance, arenas);
        }
    };

    Ok(())
}

// Originates Type-3 Summary LSA.
pub(crate) fn lsa_orig_inter_area_network(
    area: &Area,
    instance: &InstanceUpView<'_>,
    prefix: Ipv4Network,
    metric: u32,
) {
    let lsdb_id = LsdbId::Area(area.id);

    // LSA's header options.
    let options =
        area::area_options(area, instance.config, OptionsLocation::Lsa);

    let lsa_id = area::net_summary_lsa_id(&area.state.net_summaries, &prefix);

    // (Re)originate Type-3 Summary-LSA.
    let lsa_body =
        LsaBody::SummaryNetwork(LsaSummary::new(prefix.mask(), metric));
    instance
        .tx
        .lsa_orig_check(lsdb_id, Some(options), lsa_id, lsa_body);
}

// Originates Type-4 Summary LSA.
pub(crate) fn lsa_orig_inter_area_router(
    area: &Area,
    instance: &InstanceUpView<'_>,
    router_id: Ipv4Addr,
    options: Options,
    metric: u32,
) {
    let lsdb_id = LsdbId::Area(area.id);

    // (Re)originate Type-4 Summary-LSA.
    let lsa_body =
        LsaBody::SummaryRouter(LsaSummary::new(Ipv4Addr::BROADCAST, metric));
    instance
        .tx
        .lsa_orig_check(lsdb_id, Some(options), router_id, lsa_body);
}

// Originates the AS-External LSAs and the NSSA-External LSAs of all attached
// NSSAs, flushing the ones that are no longer advertised.
pub(crate) fn lsa_orig_external(
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    let lsdb_id = LsdbId::As;
    let router_id = instance.state.router_id;

    // AS-External LSAs are only originated when the router is attached to at
    // least one regular area.
    let mut externals = BTreeMap::new();
    let regular_area = arenas
        .areas
        .iter()
        .find(|area| area.config.area_type() == AreaType::Normal);
    if let Some(area) = regular_area {
        externals = compute_externals(instance, None);

        // Routes translated from NSSAs. Locally configured routes take
        // precedence.
        for (prefix, ext) in &instance.state.nssa_translated {
            externals.entry(*prefix).or_insert_with(|| ext.clone());
        }

        let options =
            area::area_options(area, instance.config, OptionsLocation::Lsa);
        for (prefix, ext) in &externals {
            let lsa_body = LsaBody::AsExternal(ext.clone());
            instance.tx.lsa_orig_check(
                lsdb_id,
                Some(options),
                prefix.ip(),
                lsa_body,
            );
        }
    }

    // Flush AS-External LSAs that are no longer advertised.
    let lsa_type = LsaType::from(LsaTypeCode::AsExternal);
    for (_, lse) in instance
        .state
        .lsdb
        .iter_by_type_advrtr(&arenas.lsa_entries, lsa_type, router_id)
        .filter(|(_, lse)| !lse.data.hdr.is_maxage())
        .filter(|(_, lse)| {
            !externals.keys().any(|prefix| prefix.ip() == lse.data.hdr.lsa_id)
        })
    {
        instance.tx.lsa_flush(
            lsdb_id,
            lse.id,
            LsaFlushReason::PrematureAging,
        );
    }

    // NSSA-External LSAs.
    for area in arenas
        .areas
        .iter()
        .filter(|area| area.config.area_type() == AreaType::Nssa)
    {
        lsa_orig_nssa_external(area, instance, arenas);
    }
}

// Originates the NSSA-External LSAs of the given NSSA, flushing the ones that
// are no longer advertised.
fn lsa_orig_nssa_external(
    area: &Area,
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    let lsdb_id = LsdbId::Area(area.id);
    let router_id = instance.state.router_id;
    let is_abr = arenas.areas.is_abr(&arenas.interfaces);

    // The P-bit is cleared by ABRs configured not to redistribute external
    // routes into the NSSA.
    let propagate = !(is_abr && area.config.no_redistribution);

    // Forwarding address used for propagated routes: the address of one of
    // the area's active interfaces.
    let nssa_fwd_addr = area
        .interfaces
        .iter(&arenas.interfaces)
        .find(|iface| !iface.is_down() && !iface.config.loopback)
        .map(|iface| iface.config.address.ip());

    let mut externals = compute_externals(instance, Some(is_abr));
    for ext in externals.values_mut() {
        if propagate && ext.fwd_addr.is_none() {
            ext.fwd_addr = nssa_fwd_addr;
        }
    }

    // Type-7 default route originated by NSSA ABRs.
    if is_abr && area.config.nssa_default {
        let prefix = ip::default_route();
        let ext = LsaAsExternal {
            mask: prefix.mask(),
            flags: LsaAsExternalFlags::E,
            metric: area.config.default_cost,
            fwd_addr: None,
            tag: 0,
        };
        externals.insert(prefix, ext);
    }

    let options =
        area::area_options(area, instance.config, OptionsLocation::Lsa);
    for (prefix, ext) in &externals {
        // The default route originated by an NSSA ABR is never translated.
        let mut options = options;
        if propagate && !(is_abr && prefix.is_default()) {
            options.insert(Options::NP);
        }
        let lsa_body = LsaBody::NssaExternal(ext.clone());
        instance
            .tx
            .lsa_orig_check(lsdb_id, Some(options), prefix.ip(), lsa_body);
    }

    // Flush NSSA-External LSAs that are no longer advertised.
    let lsa_type = LsaType::from(LsaTypeCode::NssaExternal);
    for (_, lse) in area
        .state
        .lsdb
        .iter_by_type_advrtr(&arenas.lsa_entries, lsa_type, router_id)
        .filter(|(_, lse)| !lse.data.hdr.is_maxage())
        .filter(|(_, lse)| {
            !externals.keys().any(|prefix| prefix.ip() == lse.data.hdr.lsa_id)
        })
    {
        instance.tx.lsa_flush(
            lsdb_id,
            lse.id,
            LsaFlushReason::PrematureAging,
        );
    }
}

// Returns the configured external routes, including the default route when
// the default-information policy calls for it.
//
// When computing the routes of an NSSA, `nssa_abr` tells whether the router is
// an ABR, in which case the default route is left to the NSSA default policy.
fn compute_externals(
    instance: &InstanceUpView<'_>,
    nssa_abr: Option<bool>,
) -> BTreeMap<Ipv4Network, LsaAsExternal> {
    let config = instance.config;
    let mut externals = BTreeMap::new();

    // Configured external routes. The default route is governed by the
    // default-information policy.
    for route in config
        .external_routes
        .iter()
        .filter(|route| !route.prefix.is_default())
    {
        let prefix = route.prefix.apply_mask();
        let ext = external_body(
            prefix,
            route.metric,
            route.metric_type,
            route.fwd_addr,
            route.tag,
        );
        externals.insert(prefix, ext);
    }

    // Default route.
    let default_info = &config.default_information;
    if default_info.originate
        && (default_info.always
            || config
                .external_routes
                .iter()
                .any(|route| route.prefix.is_default()))
        && nssa_abr != Some(true)
    {
        let prefix = ip::default_route();
        let ext = external_body(
            prefix,
            default_info.metric,
            default_info.metric_type,
            None,
            0,
        );
        externals.insert(prefix, ext);
    }

    externals
}

fn external_body(
    prefix: Ipv4Network,
    metric: u32,
    metric_type: ExternalMetricType,
    fwd_addr: Option<Ipv4Addr>,
    tag: u32,
) -> LsaAsExternal {
    let mut flags = LsaAsExternalFlags::empty();
    if metric_type == ExternalMetricType::Type2 {
        flags.insert(LsaAsExternalFlags::E);
    }
    LsaAsExternal {
        mask: prefix.mask(),
        flags,
        metric: std::cmp::min(metric, LSA_INFINITY),
        fwd_addr,
        tag,
    }
}

// ===== helper functions =====

// Drops older instances of the LSA from the retransmission lists of every
// neighbor within its flooding scope.
fn rxmt_lists_remove(
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lsa: &Lsa,
    now: SimTime,
) {
    let lsa_key = lsa.hdr.key();
    let lsa_hdr = lsa.hdr_at(now);
    let in_scope_area = |area_idx| match lsdb_idx {
        LsdbIndex::Link(scope_idx, _) | LsdbIndex::Area(scope_idx) => {
            scope_idx == area_idx
        }
        LsdbIndex::As => true,
    };
    let in_scope_iface = |iface_idx| match lsdb_idx {
        LsdbIndex::Link(_, scope_idx) => scope_idx == iface_idx,
        _ => true,
    };

    let nbr_idxs = arenas
        .areas
        .indexes()
        .filter(|area_idx| in_scope_area(*area_idx))
        .flat_map(|area_idx| arenas.areas[area_idx].interfaces.indexes())
        .filter(|iface_idx| in_scope_iface(*iface_idx))
        .flat_map(|iface_idx| {
            arenas.interfaces[iface_idx].state.neighbors.indexes()
        })
        .collect::<Vec<_>>();

    for nbr_idx in nbr_idxs {
        let nbr = &mut arenas.neighbors[nbr_idx];
        let btree_map::Entry::Occupied(entry) =
            nbr.lists.ls_rxmt.entry(lsa_key)
        else {
            continue;
        };
        let rxmt_hdr = entry.get().lsa.hdr_at(now);
        if lsa_compare(&rxmt_hdr, &lsa_hdr) == Ordering::Less {
            entry.remove();
            nbr.rxmt_lsupd_stop_check();
        }
    }
}

// Updates the state derived from particular LSA types after installation.
fn lsdb_install(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    lsdb_idx: LsdbIndex,
    lsa: &Lsa,
) {
    let Ok(area_idx) = lsdb_idx.into_area() else {
        return;
    };
    let hdr = &lsa.hdr;

    match hdr.lsa_type.type_code() {
        // Remember which Network-LSA each interface originated so that it can
        // be flushed once we stop being DR.
        Some(LsaTypeCode::Network)
            if hdr.adv_rtr == instance.state.router_id =>
        {
            let area = &arenas.areas[area_idx];
            let iface_idx = area.interfaces.indexes().find(|iface_idx| {
                arenas.interfaces[*iface_idx].config.address.ip() == hdr.lsa_id
            });
            if let Some(iface_idx) = iface_idx {
                let iface = &mut arenas.interfaces[iface_idx];
                iface.state.network_lsa_self =
                    (!hdr.is_maxage()).then(|| hdr.key());
            }
        }
        // Demand circuit support depends on Router-LSAs and
        // indication-LSAs.
        Some(LsaTypeCode::Router | LsaTypeCode::SummaryRouter) => {
            arenas.areas[area_idx].update_dc_capability(&arenas.lsa_entries);
            instance.state.dc_capable = arenas
                .areas
                .iter()
                .filter(|area| area.config.area_type() == AreaType::Normal)
                .all(|area| area.state.dc_capable);
        }
        _ => (),
    }
}

// Router-LSA links describing a single interface (RFC 2328, section
// 12.4.1).
fn router_links(
    iface: &Interface,
    arenas: &InstanceArenas,
) -> SmallVec<[LsaRouterLink; 4]> {
    use LsaRouterLinkType as LinkType;

    let addr = iface.config.address;
    let cost = iface.config.cost;
    let mut links = SmallVec::new();

    if iface.state.ism_state == ism::State::Loopback {
        let (link_type, mask) = (LinkType::StubNetwork, Ipv4Addr::BROADCAST);
        links.push(LsaRouterLink::new(link_type, addr.ip(), mask, 0));
        return links;
    }

    let mut full_nbrs = iface
        .state
        .neighbors
        .iter(&arenas.neighbors)
        .filter(|nbr| nbr.state == nsm::State::Full);
    let stub_link = match iface.config.if_type {
        InterfaceType::PointToPoint | InterfaceType::PointToMultipoint => {
            links.extend(full_nbrs.map(|nbr| {
                let link_type = LinkType::PointToPoint;
                LsaRouterLink::new(link_type, nbr.router_id, addr.ip(), cost)
            }));
            true
        }
        InterfaceType::Broadcast => {
            // The segment is a transit network once we're fully adjacent to
            // its DR, or we are the DR and fully adjacent to someone.
            let transit_dr = iface.state.dr.filter(|dr| {
                match iface.state.ism_state {
                    ism::State::Waiting => false,
                    ism::State::Dr => full_nbrs.next().is_some(),
                    _ => iface
                        .state
                        .neighbors
                        .get_by_net_id(&arenas.neighbors, *dr)
                        .is_some_and(|(_, nbr)| nbr.state == nsm::State::Full),
                }
            });
            if let Some(dr) = transit_dr {
                let link_type = LinkType::TransitNetwork;
                let link =
                    LsaRouterLink::new(link_type, dr.get(), addr.ip(), cost);
                links.push(link);
            }
            transit_dr.is_none()
        }
    };

    if stub_link {
        let prefix = addr.apply_mask();
        let (link_type, mask) = (LinkType::StubNetwork, prefix.mask());
        links.push(LsaRouterLink::new(link_type, prefix.ip(), mask, cost));
    }

    links
}

fn lsa_orig_router(
    area: &Area,
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    let options =
        area::area_options(area, instance.config, OptionsLocation::Lsa);

    let mut flags = LsaRouterFlags::empty();
    flags.set(LsaRouterFlags::B, arenas.areas.is_abr(&arenas.interfaces));
    flags.set(
        LsaRouterFlags::E,
        instance.config.is_asbr() && area.config.area_type() != AreaType::Stub,
    );
    flags.set(LsaRouterFlags::NT, area.state.nssa_translator);

    let iface_links = area
        .interfaces
        .iter(&arenas.interfaces)
        .filter(|iface| !iface.is_down())
        .flat_map(|iface| router_links(iface, arenas));
    let host_links = instance
        .config
        .host_routes
        .iter()
        .filter(|host| host.area_id == area.area_id)
        .map(|host| {
            LsaRouterLink::new(
                LsaRouterLinkType::StubNetwork,
                host.address,
                Ipv4Addr::BROADCAST,
                host.cost,
            )
        });
    let links = iface_links.chain(host_links).collect();

    let lsa_body = LsaBody::Router(LsaRouter { flags, links });
    instance.tx.lsa_orig_check(
        LsdbId::Area(area.id),
        Some(options),
        instance.state.router_id,
        lsa_body,
    );
}

// The DR's Network-LSA lists every router fully adjacent to it, itself
// included. Its LSA-ID is the DR's interface address.
fn lsa_orig_network(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    let options =
        area::area_options(area, instance.config, OptionsLocation::Lsa);
    let full_nbrs = iface
        .state
        .neighbors
        .iter(&arenas.neighbors)
        .filter(|nbr| nbr.state == nsm::State::Full)
        .map(|nbr| nbr.router_id);
    let attached_rtrs = iter::once(instance.state.router_id)
        .chain(full_nbrs)
        .collect();
    let lsa_body = LsaBody::Network(LsaNetwork {
        mask: iface.config.address.mask(),
        attached_rtrs,
    });

    instance.tx.lsa_orig_check(
        LsdbId::Area(area.id),
        Some(options),
        iface.config.address.ip(),
        lsa_body,
    );
}

fn lsa_flush_network(
    iface: &Interface,
    area: &Area,
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
) {
    let lse = iface.state.network_lsa_self.as_ref().and_then(|lsa_key| {
        area.state.lsdb.get(&arenas.lsa_entries, lsa_key)
    });
    if let Some((_, lse)) = lse {
        lsa_flush(instance, LsdbId::Area(area.id), lse.id);
    }
}

// A neighbor flooded us an instance of one of our own LSAs, left over from a
// previous incarnation or outdated by a Router ID change. Originate a fresh
// instance with a higher sequence number if we still want it advertised, or
// flush it otherwise (RFC 2328, section 13.4).
fn process_self_originated_lsa(
    instance: &InstanceUpView<'_>,
    arenas: &InstanceArenas,
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
) -> Result<(), Error> {
    let (lsdb_idx, lsdb) = lsdb_get(
        &instance.state.lsdb,
        &arenas.areas,
        &arenas.interfaces,
        lsdb_id,
    )?;
    let (_, lse) = lsdb.get_by_id(&arenas.lsa_entries, lse_id)?;
    let hdr = &lse.data.hdr;
    let area = lsdb_idx.into_area().ok().map(|idx| &arenas.areas[idx]);

    let keep = match (hdr.lsa_type.type_code(), area) {
        (Some(LsaTypeCode::Router), Some(area)) => {
            lsa_orig_router(area, instance, arenas);
            true
        }
        (Some(LsaTypeCode::Network), Some(area)) => {
            // Still the DR, and under the same Router ID.
            let iface = area
                .interfaces
                .iter(&arenas.interfaces)
                .find(|iface| iface.config.address.ip() == hdr.lsa_id)
                .filter(|iface| iface.state.ism_state == ism::State::Dr)
                .filter(|_| hdr.adv_rtr == instance.state.router_id);
            if let Some(iface) = iface {
                lsa_orig_network(iface, area, instance, arenas);
            }
            iface.is_some()
        }
        (Some(LsaTypeCode::SummaryNetwork), Some(area)) => {
            let summaries = &area.state.net_summaries;
            let summary = summaries.iter().find(|(prefix, _)| {
                area::net_summary_lsa_id(summaries, prefix) == hdr.lsa_id
            });
            if let Some((prefix, metric)) = summary {
                lsa_orig_inter_area_network(area, instance, *prefix, *metric);
            }
            summary.is_some()
        }
        (Some(LsaTypeCode::SummaryRouter), Some(area)) => {
            let summary = area.state.rtr_summaries.get(&hdr.lsa_id);
            if let Some((options, metric)) = summary {
                lsa_orig_inter_area_router(
                    area,
                    instance,
                    hdr.lsa_id,
                    *options,
                    *metric,
                );
            }
            summary.is_some()
        }
        // Flushes the externals that are no longer configured.
        (Some(LsaTypeCode::AsExternal | LsaTypeCode::NssaExternal), _) => {
            lsa_orig_external(instance, arenas);
            true
        }
        // Group membership and opaque LSAs are never originated here. LSAs
        // of unknown type don't make it this far.
        _ => false,
    };

    if !keep {
        lsa_flush(instance, lsdb_id, lse_id);
    }

    Ok(())
}

fn lsa_flush(
    instance: &InstanceUpView<'_>,
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
) {
    instance
        .tx
        .lsa_flush(lsdb_id, lse_id, LsaFlushReason::PrematureAging);
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    fn hdr(seq_no: u32, cksum: u16, age: u16) -> LsaHdr {
        LsaHdr {
            age,
            options: Options::E,
            lsa_type: LsaTypeCode::Router.into(),
            lsa_id: Ipv4Addr::new(1, 1, 1, 1),
            adv_rtr: Ipv4Addr::new(1, 1, 1, 1),
            seq_no,
            cksum,
            length: 36,
        }
    }

    #[test]
    fn compare_seq_no() {
        let a = hdr(LSA_INIT_SEQ_NO + 1, 0x1000, 100);
        let b = hdr(LSA_INIT_SEQ_NO, 0x2000, 10);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
        assert_eq!(lsa_compare(&b, &a), Ordering::Less);

        // Sequence numbers are compared as signed integers.
        let a = hdr(LSA_MAX_SEQ_NO, 0x1000, 0);
        let b = hdr(LSA_INIT_SEQ_NO, 0x1000, 0);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn compare_cksum() {
        let a = hdr(LSA_INIT_SEQ_NO, 0x2000, 100);
        let b = hdr(LSA_INIT_SEQ_NO, 0x1000, 10);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
        assert_eq!(lsa_compare(&b, &a), Ordering::Less);
    }

    #[test]
    fn compare_maxage() {
        let a = hdr(LSA_INIT_SEQ_NO, 0x1000, LSA_MAX_AGE);
        let b = hdr(LSA_INIT_SEQ_NO, 0x1000, 10);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
        assert_eq!(lsa_compare(&b, &a), Ordering::Less);

        // The DoNotAge bit doesn't hide MaxAge.
        let a = hdr(LSA_INIT_SEQ_NO, 0x1000, LSA_MAX_AGE | LSA_DO_NOT_AGE);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
    }

    #[test]
    fn compare_age_diff() {
        let a = hdr(LSA_INIT_SEQ_NO, 0x1000, 10);
        let b = hdr(LSA_INIT_SEQ_NO, 0x1000, 10 + LSA_MAX_AGE_DIFF + 1);
        assert_eq!(lsa_compare(&a, &b), Ordering::Greater);
        assert_eq!(lsa_compare(&b, &a), Ordering::Less);

        // Age differences up to MaxAgeDiff are not significant.
        let b = hdr(LSA_INIT_SEQ_NO, 0x1000, 10 + LSA_MAX_AGE_DIFF);
        assert_eq!(lsa_compare(&a, &b), Ordering::Equal);
        assert_eq!(lsa_compare(&b, &a), Ordering::Equal);
    }

    #[test]
    fn compare_total_order() {
        let hdrs = [
            hdr(LSA_INIT_SEQ_NO, 0x1000, 0),
            hdr(LSA_INIT_SEQ_NO, 0x1000, 1000),
            hdr(LSA_INIT_SEQ_NO, 0x1000, 2000),
            hdr(LSA_INIT_SEQ_NO, 0x1000, LSA_MAX_AGE),
            hdr(LSA_INIT_SEQ_NO, 0x2000, 0),
            hdr(LSA_INIT_SEQ_NO + 1, 0x0500, 3000),
            hdr(LSA_MAX_SEQ_NO, 0x0001, 0),
        ];

        for a in &hdrs {
            for b in &hdrs {
                // Antisymmetry.
                assert_eq!(lsa_compare(a, b), lsa_compare(b, a).reverse());

                // Equality only between identical sequence numbers,
                // checksums and age classes.
                if lsa_compare(a, b) == Ordering::Equal {
                    assert_eq!(a.seq_no, b.seq_no);
                    assert_eq!(a.cksum, b.cksum);
                    assert_eq!(a.is_maxage(), b.is_maxage());
                }

                // Transitivity of strict ordering.
                for c in &hdrs {
                    if lsa_compare(a, b) == Ordering::Greater
                        && lsa_compare(b, c) == Ordering::Greater
                    {
                        assert_eq!(lsa_compare(a, c), Ordering::Greater);
                    }
                }
            }
        }
    }

    #[test]
    fn type_validity() {
        let router = LsaType::from(LsaTypeCode::Router);
        let external = LsaType::from(LsaTypeCode::AsExternal);
        let nssa = LsaType::from(LsaTypeCode::NssaExternal);
        let opaque = LsaType::from(LsaTypeCode::OpaqueArea);

        assert!(!lsa_type_is_valid(None, None, LsaType(8)));
        assert!(lsa_type_is_valid(Some(AreaType::Stub), None, router));
        assert!(lsa_type_is_valid(Some(AreaType::Normal), None, external));
        assert!(!lsa_type_is_valid(Some(AreaType::Stub), None, external));
        assert!(!lsa_type_is_valid(Some(AreaType::Nssa), None, external));
        assert!(lsa_type_is_valid(Some(AreaType::Nssa), None, nssa));
        assert!(!lsa_type_is_valid(Some(AreaType::Normal), None, nssa));
        assert!(!lsa_type_is_valid(None, Some(Options::E), opaque));
        assert!(lsa_type_is_valid(None, Some(Options::O), opaque));
    }

    #[test]
    fn indication_lsa() {
        let router_id = Ipv4Addr::new(2, 2, 2, 2);
        let summary = |options, lsa_id, metric| {
            let body = LsaBody::SummaryRouter(LsaSummary::new(
                Ipv4Addr::BROADCAST,
                metric,
            ));
            Lsa::new(
                0,
                options,
                lsa_id,
                router_id,
                LSA_INIT_SEQ_NO,
                body,
                SimTime::ZERO,
            )
        };

        assert!(lsa_is_indication(&summary(
            Options::E,
            router_id,
            LSA_INFINITY
        )));
        assert!(!lsa_is_indication(&summary(
            Options::E | Options::DC,
            router_id,
            LSA_INFINITY
        )));
        assert!(!lsa_is_indication(&summary(Options::E, router_id, 10)));
        assert!(!lsa_is_indication(&summary(
            Options::E,
            Ipv4Addr::new(3, 3, 3, 3),
            LSA_INFINITY
        )));
    }
}
