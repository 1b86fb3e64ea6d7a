//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::collections::{BTreeMap, BTreeSet};
use std::net::Ipv4Addr;
use std::sync::Arc;

use ism::{Event, State};
use ospfsim_utils::ip::Ipv4AddrExt;
use ospfsim_utils::task::{IntervalTask, TimeoutTask};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::area::Area;
use crate::collections::{Arena, InterfaceId, Lsdb, NeighborIndex, Neighbors};
use crate::config::InterfaceCfg;
use crate::debug::{Debug, InterfaceInactiveReason};
use crate::error::{Error, InterfaceCfgError};
use crate::instance::{InstanceChannelsTx, InstanceUpView};
use crate::lsdb::{LsaEntry, LsaOriginateEvent};
use crate::neighbor::{Neighbor, NeighborNetId, nsm};
use crate::network::MulticastAddr;
use crate::packet::lsa::{Lsa, LsaHdr, LsaKey};
use crate::packet::{Hello, PacketType};
use crate::tasks::messages::output::NetTxPacketMsg;
use crate::{output, tasks};

// Size of the IPv4 header prepended to every OSPF packet.
const IPV4_HDR_SIZE: u16 = 20;

#[derive(Debug)]
pub struct Interface {
    pub id: InterfaceId,
    pub name: String,
    pub ifindex: u32,
    pub system: InterfaceSys,
    pub config: InterfaceCfg,
    pub state: InterfaceState,
}

// Interface status as reported by the simulator.
#[derive(Debug, Default)]
pub struct InterfaceSys {
    pub operative: bool,
}

#[derive(Debug, Default)]
pub struct InterfaceState {
    // ISM state.
    pub ism_state: State,
    // Joined multicast groups.
    pub mcast_groups: BTreeSet<MulticastAddr>,
    // The network DR/BDR.
    pub dr: Option<NeighborNetId>,
    pub bdr: Option<NeighborNetId>,
    // List of neighbors attached to this interface.
    pub neighbors: Neighbors,
    // List of LSAs enqueued for transmission.
    pub ls_update_list: BTreeMap<LsaKey, Arc<Lsa>>,
    // List of pending delayed Acks.
    pub ls_ack_list: BTreeMap<LsaKey, LsaHdr>,
    // Statistics.
    pub event_count: u32,
    pub statistics: InterfaceStatistics,
    // LSDB of interface-scope LSAs.
    pub lsdb: Lsdb,
    pub network_lsa_self: Option<LsaKey>,
    // Tasks.
    pub tasks: InterfaceTasks,
}

#[derive(Debug, Default)]
pub struct InterfaceTasks {
    // ISM Hello Tx interval task.
    pub hello_interval: Option<IntervalTask>,
    // ISM WaitTimer task.
    pub wait_timer: Option<TimeoutTask>,
    // LS Update timer task.
    pub ls_update_timer: Option<TimeoutTask>,
    // Delayed Ack task.
    pub ls_delayed_ack: Option<TimeoutTask>,
}

// Per-interface packet counters.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct InterfaceStatistics {
    pub pkts_sent: PacketCounters,
    pub pkts_rcvd: PacketCounters,
    // Received packets that were dropped by the sanity checks.
    pub pkts_rejected: u32,
    // Received LSAs carrying the DoNotAge bit.
    pub dna_lsas_rcvd: u32,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct PacketCounters {
    pub hello: u32,
    pub dbdesc: u32,
    pub lsreq: u32,
    pub lsupd: u32,
    pub lsack: u32,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum InterfaceType {
    #[default]
    Broadcast,
    PointToMultipoint,
    PointToPoint,
}

// A router taking part in the DR election, as seen from this interface.
#[derive(Clone, Copy, Debug)]
struct DrCandidate {
    router_id: Ipv4Addr,
    net_id: NeighborNetId,
    // DR and BDR it declares in its Hellos.
    dr: Option<NeighborNetId>,
    bdr: Option<NeighborNetId>,
    priority: u8,
}

// Interface state machine (RFC 2328, section 9).
pub mod ism {
    use serde::{Deserialize, Serialize};

    use crate::debug::InterfaceInactiveReason;

    #[derive(Clone, Copy, Debug, Default, Eq, Ord, PartialEq, PartialOrd)]
    #[derive(Deserialize, Serialize)]
    pub enum State {
        #[default]
        Down,
        Loopback,
        Waiting,
        PointToPoint,
        DrOther,
        Backup,
        Dr,
    }

    #[derive(Clone, Copy, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum Event {
        InterfaceUp,
        WaitTimer,
        BackupSeen,
        NbrChange,
        LoopInd,
        UnloopInd,
        InterfaceDown(InterfaceInactiveReason),
    }
}

// ===== impl Interface =====

impl Interface {
    pub(crate) fn new(
        id: InterfaceId,
        name: String,
        ifindex: u32,
    ) -> Interface {
        Interface {
            id,
            name,
            ifindex,
            system: InterfaceSys::default(),
            config: InterfaceCfg::default(),
            state: InterfaceState::default(),
        }
    }

    // Reconciles the ISM with the operational status and the loopback
    // setting.
    pub(crate) fn update(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &mut Arena<Neighbor>,
        lsa_entries: &Arena<LsaEntry>,
    ) {
        let looped = self.config.loopback;
        let event = match (self.is_ready(), self.state.ism_state) {
            (Err(_), State::Down) => return,
            (Err(reason), _) => Event::InterfaceDown(reason),
            (Ok(()), State::Loopback) if looped => return,
            (Ok(()), _) if looped => Event::LoopInd,
            (Ok(()), State::Loopback) => Event::UnloopInd,
            (Ok(()), State::Down) => Event::InterfaceUp,
            (Ok(()), _) => return,
        };

        self.fsm(area, instance, neighbors, lsa_entries, event);
    }

    fn is_ready(&self) -> Result<(), InterfaceInactiveReason> {
        if !self.system.operative {
            return Err(InterfaceInactiveReason::OperationalDown);
        }
        Ok(())
    }

    // InterfaceUp actions. Returns the state to move to.
    fn start(&mut self, area: &Area, instance: &InstanceUpView<'_>) -> State {
        Debug::InterfaceStart(&self.name).log();

        if !self.is_passive() {
            self.hello_interval_start(area, instance);
        }

        match self.config.if_type {
            InterfaceType::Broadcast if self.config.priority == 0 => {
                State::DrOther
            }
            InterfaceType::Broadcast => {
                let task = tasks::ism_wait_timer(self, area, instance.tx);
                self.state.tasks.wait_timer = Some(task);
                State::Waiting
            }
            InterfaceType::PointToPoint | InterfaceType::PointToMultipoint => {
                State::PointToPoint
            }
        }
    }

    // Tears down every adjacency and clears the per-interface state. The
    // link-scope LSDB survives.
    fn stop(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &mut Arena<Neighbor>,
        lsa_entries: &Arena<LsaEntry>,
        reason: InterfaceInactiveReason,
    ) {
        if self.is_down() {
            return;
        }

        Debug::InterfaceStop(&self.name, reason).log();

        let nbr_event = if reason == InterfaceInactiveReason::OperationalDown
        {
            nsm::Event::LinkDown
        } else {
            nsm::Event::Kill
        };
        let nbr_idxs = self.state.neighbors.indexes().collect::<Vec<_>>();
        for nbr_idx in nbr_idxs {
            let nbr = &mut neighbors[nbr_idx];
            nbr.fsm(self, area, instance, lsa_entries, nbr_event);
            self.state.neighbors.delete(neighbors, nbr_idx);
        }

        let state = &mut self.state;
        state.dr = None;
        state.bdr = None;
        state.neighbors = Default::default();
        state.ls_update_list.clear();
        state.ls_ack_list.clear();
        state.tasks = Default::default();
    }

    // Restarts the Hello timer so that a fresh Hello goes out now.
    pub(crate) fn sync_hello_tx(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        if !self.is_passive() && self.state.ism_state >= State::Waiting {
            self.hello_interval_start(area, instance);
        }
    }

    pub(crate) fn is_down(&self) -> bool {
        self.state.ism_state == State::Down
    }

    // Passive and loopback interfaces are advertised but run no protocol.
    pub(crate) fn is_passive(&self) -> bool {
        self.config.loopback || self.config.passive
    }

    pub(crate) fn is_dr_or_backup(&self) -> bool {
        matches!(self.state.ism_state, State::Dr | State::Backup)
    }

    pub(crate) fn is_broadcast(&self) -> bool {
        self.config.if_type == InterfaceType::Broadcast
    }

    pub(crate) fn fsm(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &mut Arena<Neighbor>,
        lsa_entries: &Arena<LsaEntry>,
        event: Event,
    ) {
        Debug::IsmEvent(&self.state.ism_state, &event).log();

        let new_state = match (event, self.state.ism_state) {
            (Event::InterfaceUp, State::Down) => self.start(area, instance),
            (Event::WaitTimer | Event::BackupSeen, State::Waiting) => {
                self.state.tasks.wait_timer = None;
                self.dr_election(area, instance, neighbors)
            }
            (Event::NbrChange, state) if state >= State::DrOther => {
                self.dr_election(area, instance, neighbors)
            }
            // Neighbors going away while the interface isn't electing a DR.
            (
                Event::NbrChange,
                State::Down | State::Loopback | State::Waiting,
            ) => return,
            (Event::InterfaceDown(reason), _) => {
                self.stop(area, instance, neighbors, lsa_entries, reason);
                State::Down
            }
            (Event::LoopInd, _) => {
                let reason = InterfaceInactiveReason::LoopedBack;
                self.stop(area, instance, neighbors, lsa_entries, reason);
                State::Loopback
            }
            (Event::UnloopInd, State::Loopback) => State::Down,
            _ => {
                Error::IsmUnexpectedEvent(self.state.ism_state, event).log();
                return;
            }
        };

        if new_state != self.state.ism_state {
            self.fsm_state_change(area, instance, new_state);
        }
    }

    fn fsm_state_change(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        new_state: State,
    ) {
        let (area_id, iface_id) = (area.id, self.id);
        instance
            .tx
            .lsa_orig_event(LsaOriginateEvent::InterfaceStateChange {
                area_id,
                iface_id,
            });
        // Leaving the DR state withdraws the Network-LSA.
        if self.state.ism_state == State::Dr {
            instance
                .tx
                .lsa_orig_event(LsaOriginateEvent::InterfaceDrChange {
                    area_id,
                    iface_id,
                });
        }

        Debug::IsmTransition(&self.state.ism_state, &new_state).log();
        self.state.ism_state = new_state;
        self.update_mcast_groups();
        self.state.event_count += 1;
    }

    // Sends a Hello right away and schedules the next ones.
    pub(crate) fn hello_interval_start(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
    ) {
        output::send_hello(self, area, instance);
        let task = tasks::hello_interval(self, area, instance.tx);
        self.state.tasks.hello_interval = Some(task);
    }

    // AllSPFRouters is joined once the interface is operational, and
    // AllDRouters only while it's the DR or BDR.
    fn update_mcast_groups(&mut self) {
        if self.is_passive() {
            return;
        }

        let memberships = [
            (
                MulticastAddr::AllSpfRtrs,
                self.state.ism_state >= State::Waiting,
            ),
            (MulticastAddr::AllDrRtrs, self.is_dr_or_backup()),
        ];
        for (group, member) in memberships {
            if member {
                self.state.mcast_groups.insert(group);
            } else {
                self.state.mcast_groups.remove(&group);
            }
        }
    }

    // Designated Router election (RFC 2328, section 9.4).
    fn dr_election(
        &mut self,
        area: &Area,
        instance: &InstanceUpView<'_>,
        neighbors: &Arena<Neighbor>,
    ) -> State {
        let net_id = NeighborNetId::from(self.config.address.ip());
        let (old_dr, old_bdr) = (self.state.dr, self.state.bdr);

        let mut candidates =
            self.dr_candidates(instance.state.router_id, net_id, neighbors);
        let (mut new_dr, mut new_bdr) = elect_dr_bdr(&candidates);

        // Step 4: when our own role changes, the election is run again with
        // our Hello declaring the new DR and BDR.
        let role_changed = |new: Option<NeighborNetId>, old| {
            new != old && (new == Some(net_id) || old == Some(net_id))
        };
        if role_changed(new_dr, old_dr) || role_changed(new_bdr, old_bdr) {
            if let Some(myself) =
                candidates.iter_mut().find(|rtr| rtr.net_id == net_id)
            {
                myself.dr = new_dr;
                myself.bdr = new_bdr;
            }
            (new_dr, new_bdr) = elect_dr_bdr(&candidates);
        }
        self.state.dr = new_dr;
        self.state.bdr = new_bdr;
        Debug::IsmDrElection(old_dr, new_dr, old_bdr, new_bdr).log();

        // Step 7: adjacencies may need to be formed or torn down.
        if new_dr != old_dr || new_bdr != old_bdr {
            for nbr in self
                .state
                .neighbors
                .iter(neighbors)
                .filter(|nbr| nbr.state >= nsm::State::TwoWay)
            {
                let event = nsm::Event::AdjOk;
                instance.tx.nsm_event(area.id, self.id, nbr.id, event);
            }
            self.sync_hello_tx(area, instance);
        }
        if new_dr != old_dr {
            instance
                .tx
                .lsa_orig_event(LsaOriginateEvent::InterfaceDrChange {
                    area_id: area.id,
                    iface_id: self.id,
                });
        }

        if new_dr == Some(net_id) {
            State::Dr
        } else if new_bdr == Some(net_id) {
            State::Backup
        } else {
            State::DrOther
        }
    }

    // Ourselves plus every bidirectional neighbor with non-zero priority.
    fn dr_candidates(
        &self,
        router_id: Ipv4Addr,
        net_id: NeighborNetId,
        neighbors: &Arena<Neighbor>,
    ) -> SmallVec<[DrCandidate; 8]> {
        let myself = DrCandidate {
            router_id,
            net_id,
            dr: self.state.dr,
            bdr: self.state.bdr,
            priority: self.config.priority,
        };
        let nbrs = self
            .state
            .neighbors
            .iter(neighbors)
            .filter(|nbr| nbr.state >= nsm::State::TwoWay)
            .map(|nbr| DrCandidate {
                router_id: nbr.router_id,
                net_id: nbr.network_id(),
                dr: nbr.dr,
                bdr: nbr.bdr,
                priority: nbr.priority,
            });

        std::iter::once(myself)
            .chain(nbrs)
            .filter(|rtr| rtr.priority != 0)
            .collect()
    }

    // Point-to-point links always form adjacencies. On broadcast networks
    // only the DR and BDR are adjacent to everyone.
    pub(crate) fn need_adjacency(&self, nbr: &Neighbor) -> bool {
        if !self.is_broadcast() {
            return true;
        }
        let nbr_net_id = Some(nbr.network_id());
        self.is_dr_or_backup()
            || self.state.dr == nbr_net_id
            || self.state.bdr == nbr_net_id
    }

    // Queues an LSA for the next LS Update sent on this interface.
    pub(crate) fn enqueue_ls_update(
        &mut self,
        area: &Area,
        tx: &InstanceChannelsTx,
        lsa_key: LsaKey,
        lsa: Arc<Lsa>,
    ) {
        self.state.ls_update_list.insert(lsa_key, lsa);
        if self.state.tasks.ls_update_timer.is_none() {
            let task = tasks::ls_update_timer(self, area, tx);
            self.state.tasks.ls_update_timer = Some(task);
        }
    }

    pub(crate) fn enqueue_delayed_ack(
        &mut self,
        area: &Area,
        tx: &InstanceChannelsTx,
        lsa_hdr: &LsaHdr,
    ) {
        self.state.ls_ack_list.insert(lsa_hdr.key(), *lsa_hdr);
        if self.state.tasks.ls_delayed_ack.is_none() {
            let task = tasks::delayed_ack_timer(self, area, tx);
            self.state.tasks.ls_delayed_ack = Some(task);
        }
    }

    // Except on point-to-point links, the sender must be on the interface's
    // subnet.
    pub(crate) fn validate_packet_src(
        &self,
        src: Ipv4Addr,
    ) -> Result<(), Error> {
        let on_link = self.config.if_type == InterfaceType::PointToPoint
            || self.config.address.contains(src);
        if !src.is_usable() || !on_link {
            return Err(Error::InvalidSrcAddr(src));
        }
        Ok(())
    }

    // Hello parameters that must match between neighbors
    // (RFC 2328, section 10.5). The mask is ignored on point-to-point links.
    pub(crate) fn validate_hello(
        &self,
        hello: &Hello,
    ) -> Result<(), InterfaceCfgError> {
        let mask = self.config.address.mask();
        if self.config.if_type != InterfaceType::PointToPoint
            && hello.network_mask != mask
        {
            let error = InterfaceCfgError::HelloMaskMismatch;
            return Err(error(hello.network_mask, mask));
        }

        let hello_interval = self.config.hello_interval;
        if hello.hello_interval != hello_interval {
            let error = InterfaceCfgError::HelloIntervalMismatch;
            return Err(error(hello.hello_interval, hello_interval));
        }

        let dead_interval = self.config.dead_interval;
        if hello.dead_interval != dead_interval {
            let error = InterfaceCfgError::DeadIntervalMismatch;
            return Err(error(hello.dead_interval, dead_interval));
        }

        Ok(())
    }

    // Largest OSPF packet that fits in the interface MTU.
    pub(crate) fn max_packet_size(&self) -> u16 {
        self.config.mtu.saturating_sub(IPV4_HDR_SIZE)
    }

    // Identifies the sender of a packet: by Router ID on point-to-point
    // links and by source address elsewhere (RFC 2328, section 10.5).
    pub(crate) fn get_neighbor<'a>(
        &mut self,
        src: Ipv4Addr,
        router_id: Ipv4Addr,
        neighbors: &'a mut Arena<Neighbor>,
    ) -> Option<(NeighborIndex, &'a mut Neighbor)> {
        let nbrs = &mut self.state.neighbors;
        if self.config.if_type == InterfaceType::PointToPoint {
            return nbrs.get_mut_by_router_id(neighbors, router_id);
        }

        // A neighbor known by its address may have changed Router ID.
        let (nbr_idx, nbr) =
            nbrs.get_mut_by_net_id(neighbors, NeighborNetId::from(src))?;
        nbrs.update_router_id(nbr_idx, nbr, router_id);
        Some((nbr_idx, nbr))
    }

    pub(crate) fn send_packet(
        &self,
        tx: &InstanceChannelsTx,
        msg: NetTxPacketMsg,
    ) {
        tx.net_tx_packet(msg);
    }
}

// ===== helper functions =====

// Steps 2 and 3 of the DR election: picks the BDR among the routers not
// claiming to be DR, then the DR among those claiming it, falling back to
// the new BDR.
fn elect_dr_bdr(
    candidates: &[DrCandidate],
) -> (Option<NeighborNetId>, Option<NeighborNetId>) {
    let rank = |rtr: &&DrCandidate| (rtr.priority, rtr.router_id);
    let claims_dr = |rtr: &&DrCandidate| rtr.dr == Some(rtr.net_id);
    let claims_bdr = |rtr: &&DrCandidate| rtr.bdr == Some(rtr.net_id);

    let bdr_eligible = candidates.iter().filter(|rtr| !claims_dr(rtr));
    let bdr = bdr_eligible
        .clone()
        .filter(claims_bdr)
        .max_by_key(rank)
        .or_else(|| bdr_eligible.max_by_key(rank))
        .map(|rtr| rtr.net_id);
    let dr = candidates
        .iter()
        .filter(claims_dr)
        .max_by_key(rank)
        .map(|rtr| rtr.net_id)
        .or(bdr);

    (dr, bdr)
}

// ===== impl PacketCounters =====

impl PacketCounters {
    pub(crate) fn incr(&mut self, pkt_type: PacketType) {
        let counter = match pkt_type {
            PacketType::Hello => &mut self.hello,
            PacketType::DbDesc => &mut self.dbdesc,
            PacketType::LsRequest => &mut self.lsreq,
            PacketType::LsUpdate => &mut self.lsupd,
            PacketType::LsAck => &mut self.lsack,
        };
        *counter = counter.wrapping_add(1);
    }

    pub(crate) fn merge(&mut self, other: &PacketCounters) {
        self.hello += other.hello;
        self.dbdesc += other.dbdesc;
        self.lsreq += other.lsreq;
        self.lsupd += other.lsupd;
        self.lsack += other.lsack;
    }
}

// ===== unit tests =====
