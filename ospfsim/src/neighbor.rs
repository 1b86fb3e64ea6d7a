//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;

use nsm::{Event, State};
use ospfsim_utils::sim::SimTime;
use ospfsim_utils::task::{IntervalTask, TimeoutTask};
use serde::{Deserialize, Serialize};

use crate::area::Area;
use crate::collections::{Arena, NeighborId};
use crate::debug::Debug;
use crate::error::Error;
use crate::instance::InstanceUpView;
use crate::interface::{Interface, InterfaceType, ism};
use crate::lsdb::{self, LsaEntry, LsaOriginateEvent};
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey};
use crate::packet::{DbDesc, DbDescFlags, Options};
use crate::tasks::messages::TimerKind;
use crate::tasks::messages::output::NetTxPacketMsg;
use crate::{output, tasks};

// Adjacency with a router heard on one of our interfaces.
#[derive(Debug)]
pub struct Neighbor {
    pub id: NeighborId,
    pub router_id: Ipv4Addr,
    // Source address of the neighbor's Hellos.
    pub src: Ipv4Addr,
    pub dr: Option<NeighborNetId>,
    pub bdr: Option<NeighborNetId>,
    pub priority: u8,
    pub state: State,

    // Options learned during the database exchange.
    pub options: Option<Options>,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
    pub last_rcvd_dbdesc: Option<LastDbDesc>,
    pub last_sent_dbdesc: Option<NetTxPacketMsg>,
    // Consecutive unanswered Database Description retransmissions.
    pub dbdesc_rxmt_count: u32,
    // Hellos stopped flowing over a demand circuit (RFC 1793).
    pub hello_suppressed: bool,

    pub event_count: u32,
    pub lists: NeighborLsaLists,
    pub tasks: NeighborTasks,
}

// Identity of a neighbor in the DR and BDR fields of Hellos. OSPFv2 uses the
// interface address on broadcast and NBMA networks.
#[derive(Clone, Copy, Debug, Eq, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct NeighborNetId(Ipv4Addr);

// Fields used to recognize a duplicate Database Description.
#[derive(Debug, Eq, PartialEq)]
pub struct LastDbDesc {
    pub options: Options,
    pub dd_flags: DbDescFlags,
    pub dd_seq_no: u32,
}

#[derive(Debug, Default)]
pub struct NeighborLsaLists {
    // Pending flooding, sent on the next LS Update.
    pub ls_update: BTreeMap<LsaKey, Arc<Lsa>>,
    // Link state retransmission list.
    pub ls_rxmt: BTreeMap<LsaKey, LsaRxmtEntry>,
    // Database summary list.
    pub db_summary: BTreeMap<LsaKey, Arc<Lsa>>,
    // Link state request list, split between not yet requested and
    // in-flight entries.
    pub ls_request: LsRequestList,
    pub ls_request_pending: BTreeMap<LsaKey, LsaHdr>,
}

// LSAs not yet requested, sent out oldest first.
#[derive(Debug, Default)]
pub struct LsRequestList {
    entries: BTreeMap<LsaKey, (u64, LsaHdr)>,
    order: BTreeMap<u64, LsaKey>,
    next_seq: u64,
}

#[derive(Clone, Debug)]
pub struct LsaRxmtEntry {
    pub lsa: Arc<Lsa>,
    // Last transmission; `SimTime::ZERO` means never sent.
    pub sent_time: SimTime,
}

#[derive(Debug, Default)]
pub struct NeighborTasks {
    pub inactivity_timer: Option<TimeoutTask>,
    pub dbdesc_free_timer: Option<TimeoutTask>,
    pub rxmt_dbdesc: Option<IntervalTask>,
    pub rxmt_lsreq: Option<IntervalTask>,
    pub rxmt_lsupd: Option<IntervalTask>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum RxmtPacketType {
    DbDesc,
    LsRequest,
    LsUpdate,
}

// Neighbor state machine (RFC 2328, section 10).
pub mod nsm {
    use serde::{Deserialize, Serialize};

    use crate::debug::SeqNoMismatchReason;

    // Ordered by adjacency progress.
    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down,
        Attempt,
        Init,
        TwoWay,
        ExStart,
        Exchange,
        Loading,
        Full,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        HelloRcvd,
        Start,
        TwoWayRcvd,
        NegotiationDone,
        ExchangeDone,
        BadLsReq,
        LoadingDone,
        AdjOk,
        SeqNoMismatch(SeqNoMismatchReason),
        OneWayRcvd,
        Kill,
        InactivityTimer,
        LinkDown,
    }
}

// ===== impl Neighbor =====

impl Neighbor {
    pub(crate) fn new(
        id: NeighborId,
        router_id: Ipv4Addr,
        src: Ipv4Addr,
        dd_seq_no: u32,
    ) -> Neighbor {
        Debug::NeighborCreate(router_id).log();

        Neighbor {
            id,
            router_id,
            src,
            dr: None,
            bdr: None,
            priority: 0,
            state: State::Down,
            options: None,
            dd_flags: DbDescFlags::empty(),
            dd_seq_no,
            last_rcvd_dbdesc: None,
            last_sent_dbdesc: None,
            dbdesc_rxmt_count: 0,
            hello_suppressed: false,
            event_count: 0,
            lists: Default::default(),
            tasks: Default::default(),
        }
    }

    // Runs the state machine (RFC 2328, section 10.3).
    pub(crate) fn fsm(
        &mut self,
        iface: &mut Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
        lsa_entries: &Arena<LsaEntry>,
        event: Event,
    ) {
        Debug::NsmEvent(self.router_id, &self.state, &event).log();

        let new_state = match (event, self.state) {
            (Event::HelloRcvd, State::Down | State::Attempt) => {
                self.inactivity_timer_reset(iface, area, instance);
                Some(State::Init)
            }
            (Event::HelloRcvd, _) => {
                self.inactivity_timer_reset(iface, area, instance);
                None
            }
            (Event::TwoWayRcvd, State::Init)
            | (Event::AdjOk, State::TwoWay) => {
                Some(self.adjacency_start(iface, area, instance))
            }
            (Event::TwoWayRcvd, state) if state >= State::TwoWay => None,
            (Event::NegotiationDone, State::ExStart) => {
                self.db_summary_fill(iface, area, instance, lsa_entries);
                self.dd_flags.remove(DbDescFlags::I);
                Some(State::Exchange)
            }
            (Event::ExchangeDone, State::Exchange) => {
                if self.lists.requests_outstanding() {
                    Some(State::Loading)
                } else {
                    Some(State::Full)
                }
            }
            (Event::LoadingDone, State::Loading) => Some(State::Full),
            (Event::AdjOk, state) if state >= State::ExStart => {
                if iface.need_adjacency(self) {
                    None
                } else {
                    self.reset_adjacency();
                    Some(State::TwoWay)
                }
            }
            (Event::SeqNoMismatch(_) | Event::BadLsReq, state)
                if state >= State::Exchange =>
            {
                self.reset_adjacency();
                self.exstart_enter(iface, area, instance);
                Some(State::ExStart)
            }
            // Silent demand circuit: keep the adjacency.
            (Event::InactivityTimer, State::Loading | State::Full)
                if self.hello_suppressed =>
            {
                self.tasks.inactivity_timer = None;
                None
            }
            (Event::Kill | Event::LinkDown | Event::InactivityTimer, _) => {
                self.reset_adjacency();
                self.tasks.inactivity_timer = None;
                Some(State::Down)
            }
            (Event::OneWayRcvd, State::Init) => None,
            (Event::OneWayRcvd, state) if state >= State::TwoWay => {
                self.reset_adjacency();
                Some(State::Init)
            }
            _ => {
                Error::NsmUnexpectedEvent(self.router_id, self.state, event)
                    .log();
                return;
            }
        };

        if let Some(new_state) = new_state
            && new_state != self.state
        {
            self.fsm_state_change(iface, area, instance, new_state);
        }
    }

    fn fsm_state_change(
        &mut self,
        iface: &mut Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
        new_state: State,
    ) {
        let two_way = |state: State| state >= State::TwoWay;
        if two_way(new_state) != two_way(self.state) && iface.is_broadcast() {
            instance.tx.ism_event(area.id, iface.id, ism::Event::NbrChange);
        }

        // Router-LSA and Network-LSA list fully adjacent neighbors only.
        if new_state == State::Full || self.state == State::Full {
            let event = LsaOriginateEvent::NeighborToFromFull {
                area_id: area.id,
                iface_id: iface.id,
            };
            instance.tx.lsa_orig_event(event);
        }

        if new_state == State::Full
            && self.hello_suppression_agreed(iface, instance)
        {
            Debug::NeighborHelloSuppressed(self.router_id).log();
            self.hello_suppressed = true;
        } else if new_state < State::Loading {
            self.hello_suppressed = false;
        }

        Debug::NsmTransition(self.router_id, &self.state, &new_state).log();
        self.state = new_state;
        self.event_count += 1;
    }

    // Hellos may stop on a point-to-point demand circuit once both ends
    // advertised the DC option (RFC 1793, section 3.2.1).
    fn hello_suppression_agreed(
        &self,
        iface: &Interface,
        instance: &InstanceUpView<'_>,
    ) -> bool {
        iface.config.demand_circuit
            && iface.config.if_type == InterfaceType::PointToPoint
            && instance.config.demand_circuit_capable
            && self.options.is_some_and(|opts| opts.contains(Options::DC))
    }

    // Decides whether two-way communication leads to an adjacency.
    fn adjacency_start(
        &mut self,
        iface: &mut Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) -> State {
        if !iface.need_adjacency(self) {
            return State::TwoWay;
        }
        self.exstart_enter(iface, area, instance);
        State::ExStart
    }

    // Starts the master/slave negotiation with an empty DD packet.
    fn exstart_enter(
        &mut self,
        iface: &mut Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        self.dd_seq_no = self.dd_seq_no.wrapping_add(1);
        self.dd_flags
            .insert(DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS);
        self.dbdesc_rxmt_count = 0;
        output::send_dbdesc(self, iface, area, instance);
    }

    // Snapshots the link, area and AS databases into the database summary
    // list. MaxAge LSAs go straight to the retransmission list instead.
    fn db_summary_fill(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
        lsa_entries: &Arena<LsaEntry>,
    ) {
        let now = instance.tx.now();
        let area_type = area.config.area_type();
        let options = self.options;
        let lsas = iface
            .state
            .lsdb
            .iter(lsa_entries)
            .chain(area.state.lsdb.iter(lsa_entries))
            .chain(instance.state.lsdb.iter(lsa_entries))
            .map(|(_, lse)| &lse.data)
            .filter(|lsa| {
                lsdb::lsa_type_is_valid(
                    Some(area_type),
                    options,
                    lsa.hdr.lsa_type,
                )
            });

        let mut maxage_queued = false;
        for lsa in lsas {
            let lsa_key = lsa.hdr.key();
            if lsa.is_maxage(now) {
                let entry = LsaRxmtEntry {
                    lsa: lsa.clone(),
                    sent_time: SimTime::ZERO,
                };
                self.lists.ls_rxmt.insert(lsa_key, entry);
                maxage_queued = true;
            } else {
                self.lists.db_summary.insert(lsa_key, lsa.clone());
            }
        }
        if maxage_queued {
            self.rxmt_lsupd_start_check(iface, area, instance);
        }
    }

    // Moves on once every requested LSA arrived: either the next batch of
    // requests goes out or loading is complete.
    pub(crate) fn loading_done_check(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        if !self.lists.ls_request_pending.is_empty() {
            return;
        }
        self.tasks.rxmt_lsreq = None;

        if !self.lists.ls_request.is_empty() {
            output::send_lsreq(self, iface, area, instance);
        } else if self.state == State::Loading {
            let event = Event::LoadingDone;
            instance.tx.nsm_event(area.id, iface.id, self.id, event);
        }
    }

    fn reset_adjacency(&mut self) {
        self.options = None;
        self.last_rcvd_dbdesc = None;
        self.last_sent_dbdesc = None;
        self.dbdesc_rxmt_count = 0;
        self.lists = Default::default();
        let inactivity_timer = self.tasks.inactivity_timer.take();
        self.tasks = NeighborTasks {
            inactivity_timer,
            ..Default::default()
        };
    }

    pub(crate) fn dbdesc_is_dup(&self, dbdesc: &DbDesc) -> bool {
        self.last_rcvd_dbdesc.as_ref() == Some(&LastDbDesc::from(dbdesc))
    }

    pub(crate) fn network_id(&self) -> NeighborNetId {
        NeighborNetId(self.src)
    }

    pub(crate) fn inactivity_timer_start(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        let task = tasks::nsm_inactivity_timer(self, iface, area, instance.tx);
        self.tasks.inactivity_timer = Some(task);
    }

    fn inactivity_timer_reset(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        let Some(task) = self.tasks.inactivity_timer.as_mut() else {
            self.inactivity_timer_start(iface, area, instance);
            return;
        };
        let kind = TimerKind::InactivityTimer {
            area_id: area.id,
            iface_id: iface.id,
            nbr_id: self.id,
        };
        instance.tx.reset(task, kind);
    }

    fn rxmt_start(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
        packet_type: RxmtPacketType,
    ) {
        let task = tasks::packet_rxmt_interval(
            self,
            iface,
            area,
            packet_type,
            instance.tx,
        );
        *self.rxmt_task_slot(packet_type) = Some(task);
    }

    pub(crate) fn rxmt_dbdesc_start(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        self.rxmt_start(iface, area, instance, RxmtPacketType::DbDesc);
    }

    pub(crate) fn rxmt_dbdesc_stop(&mut self) {
        self.tasks.rxmt_dbdesc = None;
    }

    pub(crate) fn rxmt_lsreq_start(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        self.rxmt_start(iface, area, instance, RxmtPacketType::LsRequest);
    }

    // The LS Update retransmission timer runs while the retransmission list
    // is non-empty.
    pub(crate) fn rxmt_lsupd_start_check(
        &mut self,
        iface: &Interface,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        if !self.lists.ls_rxmt.is_empty() && self.tasks.rxmt_lsupd.is_none() {
            self.rxmt_start(iface, area, instance, RxmtPacketType::LsUpdate);
        }
    }

    pub(crate) fn rxmt_lsupd_stop_check(&mut self) {
        if self.lists.ls_rxmt.is_empty() {
            self.tasks.rxmt_lsupd = None;
        }
    }

    pub(crate) fn rxmt_task_mut(
        &mut self,
        packet_type: RxmtPacketType,
    ) -> Option<&mut IntervalTask> {
        self.rxmt_task_slot(packet_type).as_mut()
    }

    fn rxmt_task_slot(
        &mut self,
        packet_type: RxmtPacketType,
    ) -> &mut Option<IntervalTask> {
        match packet_type {
            RxmtPacketType::DbDesc => &mut self.tasks.rxmt_dbdesc,
            RxmtPacketType::LsRequest => &mut self.tasks.rxmt_lsreq,
            RxmtPacketType::LsUpdate => &mut self.tasks.rxmt_lsupd,
        }
    }
}

impl Drop for Neighbor {
    fn drop(&mut self) {
        Debug::NeighborDelete(self.router_id).log();
    }
}

// ===== impl NeighborNetId =====

impl NeighborNetId {
    pub(crate) fn get(&self) -> Ipv4Addr {
        self.0
    }
}

impl std::fmt::Display for NeighborNetId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl From<Ipv4Addr> for NeighborNetId {
    fn from(addr: Ipv4Addr) -> NeighborNetId {
        NeighborNetId(addr)
    }
}

// ===== impl LastDbDesc =====

impl From<&DbDesc> for LastDbDesc {
    fn from(dbdesc: &DbDesc) -> LastDbDesc {
        LastDbDesc {
            options: dbdesc.options,
            dd_flags: dbdesc.dd_flags,
            dd_seq_no: dbdesc.dd_seq_no,
        }
    }
}

// ===== impl NeighborLsaLists =====

impl NeighborLsaLists {
    // Whether LSAs are still expected from the neighbor.
    pub(crate) fn requests_outstanding(&self) -> bool {
        !self.ls_request.is_empty() || !self.ls_request_pending.is_empty()
    }
}

// ===== impl LsRequestList =====

impl LsRequestList {
    // A newer header for a queued LSA keeps its place in the queue.
    pub(crate) fn insert(&mut self, lsa_key: LsaKey, lsa_hdr: LsaHdr) {
        if let Some((_, hdr)) = self.entries.get_mut(&lsa_key) {
            *hdr = lsa_hdr;
            return;
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.insert(lsa_key, (seq, lsa_hdr));
        self.order.insert(seq, lsa_key);
    }

    pub(crate) fn remove(&mut self, lsa_key: &LsaKey) -> Option<LsaHdr> {
        let (seq, lsa_hdr) = self.entries.remove(lsa_key)?;
        self.order.remove(&seq);
        Some(lsa_hdr)
    }

    pub(crate) fn pop_oldest(&mut self) -> Option<(LsaKey, LsaHdr)> {
        let (_, lsa_key) = self.order.pop_first()?;
        let (_, lsa_hdr) = self.entries.remove(&lsa_key)?;
        Some((lsa_key, lsa_hdr))
    }

    pub fn get(&self, lsa_key: &LsaKey) -> Option<&LsaHdr> {
        self.entries.get(lsa_key).map(|(_, lsa_hdr)| lsa_hdr)
    }

    pub fn contains_key(&self, lsa_key: &LsaKey) -> bool {
        self.entries.contains_key(lsa_key)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
