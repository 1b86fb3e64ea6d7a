//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};
use ipnetwork::Ipv4Network;
use ospfsim_utils::sim::SimTime;
use ospfsim_utils::task::{IntervalTask, TimeoutTask, TimerTags};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug_span;

use crate::collections::{
    AreaId, Areas, Arena, InterfaceId, LsaEntryId, Lsdb, LsdbId, NeighborId,
};
use crate::config::InstanceCfg;
use crate::debug::{Debug, InterfaceInactiveReason, LsaFlushReason};
use crate::error::{Error, StartupError};
use crate::interface::{Interface, InterfaceStatistics, ism};
use crate::lsdb::{LsaEntry, LsaOriginateEvent};
use crate::neighbor::{Neighbor, nsm};
use crate::packet::Options;
use crate::packet::lsa::{Lsa, LsaAsExternal, LsaBody, LsaHdr};
use crate::route::{RouteNet, RouteNetFlags};
use crate::southbound::{Environment, RouteMsg};
use crate::tasks::messages::input::{
    IsmEventMsg, LsaFlushMsg, LsaOrigCheckMsg, LsaOrigEventMsg, NsmEventMsg,
    SendLsUpdateMsg,
};
use crate::tasks::messages::output::{NetTxPacketMsg, TimerScheduleMsg};
use crate::tasks::messages::{
    ProtocolInputMsg, ProtocolOutputMsg, TimerKind, TimerMsg,
};
use crate::{events, network, tasks};

// OSPF instance of one simulated router.
pub struct Instance {
    // Instance configuration data.
    pub config: InstanceCfg,
    // Instance state data.
    pub state: Option<InstanceState>,
    // Instance arenas.
    pub arenas: InstanceArenas,
    // Instance Tx channels.
    pub tx: InstanceChannelsTx,
    // Instance Rx channels.
    rx: InstanceChannelsRx,
    // Simulator hosting this instance.
    env: Box<dyn Environment>,
}

#[derive(Debug)]
pub struct InstanceState {
    // Instance Router ID.
    pub router_id: Ipv4Addr,
    // LSDB of AS-scope LSAs.
    pub lsdb: Lsdb,
    // SPF data.
    pub spf_delay_timer: Option<TimeoutTask>,
    // Start stagger.
    pub start_delay_timer: Option<TimeoutTask>,
    // Routing table.
    pub rib: BTreeMap<Ipv4Network, RouteNet>,
    // AS-External LSAs originated on behalf of translated Type-7 LSAs.
    pub nssa_translated: BTreeMap<Ipv4Network, LsaAsExternal>,
    // Whether AS-scope LSAs can be flooded with the DoNotAge bit.
    pub dc_capable: bool,
    // Statistics.
    pub statistics: InstanceStatistics,
}

#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct InstanceStatistics {
    pub lsa_originated: u32,
    pub lsa_refreshed: u32,
    pub lsa_retransmitted: u32,
    pub lsa_flushed: u32,
    pub spf_runs: u32,
}

// Snapshot of all counters kept by an instance.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct Statistics {
    pub instance: InstanceStatistics,
    pub interfaces: BTreeMap<String, InterfaceStatistics>,
}

// Read-only view of an interface, for the simulator host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InterfaceInfo {
    pub name: String,
    pub ifindex: u32,
    pub area_id: Ipv4Addr,
    pub state: ism::State,
    pub dr: Option<Ipv4Addr>,
    pub bdr: Option<Ipv4Addr>,
    pub all_dr_rtrs: bool,
}

// Read-only view of a neighbor, for the simulator host.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NeighborInfo {
    pub ifname: String,
    pub router_id: Ipv4Addr,
    pub src: Ipv4Addr,
    pub state: nsm::State,
    pub hello_suppressed: bool,
}

// LSDB selector.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum LsdbScope {
    Area(Ipv4Addr),
    As,
}

#[derive(Debug, Default)]
pub struct InstanceArenas {
    pub areas: Areas,
    pub interfaces: Arena<Interface>,
    pub neighbors: Arena<Neighbor>,
    pub lsa_entries: Arena<LsaEntry>,
}

#[derive(Debug)]
pub struct InstanceChannelsTx {
    // Current simulated time.
    now: Cell<SimTime>,
    // Timer generation tags.
    tags: TimerTags,
    // Seeded source of jitter and DD sequence numbers.
    rng: RefCell<StdRng>,
    // Events processed once the current one is done.
    protocol_input: Sender<ProtocolInputMsg>,
    // Requests to the simulator.
    protocol_output: Sender<ProtocolOutputMsg>,
}

#[derive(Debug)]
pub struct InstanceChannelsRx {
    protocol_input: Receiver<ProtocolInputMsg>,
    protocol_output: Receiver<ProtocolOutputMsg>,
}

pub struct InstanceUpView<'a> {
    pub config: &'a InstanceCfg,
    pub state: &'a mut InstanceState,
    pub tx: &'a InstanceChannelsTx,
}

// ===== impl Instance =====

impl Instance {
    // Creates a new instance, validating its configuration.
    //
    // The instance stays inactive until `start()` is called.
    pub fn new(
        config: InstanceCfg,
        env: Box<dyn Environment>,
    ) -> Result<Instance, StartupError> {
        if let Err(error) = config.validate() {
            error.log();
            return Err(error);
        }

        let span =
            debug_span!("ospf-instance", router_id = %config.router_id);
        let _span_guard = span.enter();
        Debug::InstanceCreate.log();

        let mut arenas = InstanceArenas::default();
        for area_cfg in &config.areas {
            let (_, area) = arenas.areas.insert(area_cfg.area_id);
            area.set_config(area_cfg);
        }
        for iface_cfg in &config.interfaces {
            let Some((_, area)) =
                arenas.areas.get_mut_by_area_id(iface_cfg.area_id)
            else {
                continue;
            };
            let (_, iface) = area.interfaces.insert(
                &mut arenas.interfaces,
                &iface_cfg.name,
                iface_cfg.ifindex,
            );
            iface.config = iface_cfg.clone();
            iface.system.operative = true;
        }

        let (tx, rx) = channels(config.seed);
        Ok(Instance {
            config,
            state: None,
            arenas,
            tx,
            rx,
            env,
        })
    }

    // Starts the instance.
    //
    // Interfaces are brought up right away, or once the configured start
    // stagger expires.
    pub fn start(&mut self) {
        if self.is_active() {
            return;
        }

        let span =
            debug_span!("ospf-instance", router_id = %self.config.router_id);
        let _span_guard = span.enter();
        self.tx.set_now(self.env.now());

        Debug::InstanceStart.log();
        self.state = Some(InstanceState::new(self.config.router_id));

        let start_delay = match (
            self.config.start_delay,
            self.config.start_delay_jitter,
        ) {
            (Some(delay), _) => Some(Duration::from_millis(delay.into())),
            (None, Some(jitter)) => {
                let jitter = Duration::from_millis(jitter.into());
                Some(self.tx.jitter(jitter))
            }
            (None, None) => None,
        };

        if let Some((instance, arenas)) = self.as_up() {
            match start_delay {
                Some(delay) if !delay.is_zero() => {
                    Debug::InstanceStartDelay(delay).log();
                    let task = tasks::start_delay_timer(delay, instance.tx);
                    instance.state.start_delay_timer = Some(task);
                }
                _ => start_interfaces(&instance, arenas),
            }
        }

        self.process_pending();
    }

    // Stops the instance.
    //
    // Nothing is flushed: neighbors are killed, installed routes removed and
    // all protocol state dropped.
    pub fn stop(&mut self) {
        if !self.is_active() {
            return;
        }

        let span =
            debug_span!("ospf-instance", router_id = %self.config.router_id);
        let _span_guard = span.enter();
        self.tx.set_now(self.env.now());

        Debug::InstanceStop.log();

        if let Some((instance, arenas)) = self.as_up() {
            // Uninstall all routes.
            for prefix in instance
                .state
                .rib
                .iter()
                .filter(|(_, route)| {
                    route.flags.contains(RouteNetFlags::INSTALLED)
                })
                .map(|(prefix, _)| *prefix)
            {
                Debug::RouteUninstall(&prefix).log();
                instance.tx.route_uninstall(prefix);
            }

            for area in arenas.areas.iter_mut() {
                // Stop interfaces.
                for iface_idx in area.interfaces.indexes().collect::<Vec<_>>() {
                    let iface = &mut arenas.interfaces[iface_idx];
                    let reason = InterfaceInactiveReason::InstanceDown;
                    iface.fsm(
                        area,
                        &instance,
                        &mut arenas.neighbors,
                        &arenas.lsa_entries,
                        ism::Event::InterfaceDown(reason),
                    );
                    iface.state.lsdb.clear(&mut arenas.lsa_entries);
                    iface.state.network_lsa_self = None;
                }

                // Clear area's state.
                area.state.lsdb.clear(&mut arenas.lsa_entries);
                area.state = Default::default();
            }
            instance.state.lsdb.clear(&mut arenas.lsa_entries);
        }

        // Clear instance state.
        self.state = None;

        // Pending internal events refer to the state that was just dropped.
        while self.rx.protocol_input.try_recv().is_ok() {}
        self.flush_output();
    }

    // Processes a packet received from the simulated network.
    pub fn process_packet(
        &mut self,
        ifindex: u32,
        src: Ipv4Addr,
        src_identity: u32,
        payload: &[u8],
    ) {
        let span =
            debug_span!("ospf-instance", router_id = %self.config.router_id);
        let _span_guard = span.enter();
        let span = debug_span!("rx", %src_identity);
        let _span_guard = span.enter();
        self.tx.set_now(self.env.now());

        if let Some((mut instance, arenas)) = self.as_up()
            && let Err(error) = events::process_packet(
                &mut instance,
                arenas,
                ifindex,
                src,
                payload,
            )
        {
            error.log();
        }

        self.process_pending();
    }

    // Processes the firing of a timer previously scheduled by this instance.
    pub fn process_timer(&mut self, msg: TimerMsg) {
        let span =
            debug_span!("ospf-instance", router_id = %self.config.router_id);
        let _span_guard = span.enter();
        self.tx.set_now(self.env.now());

        if let Some((mut instance, arenas)) = self.as_up()
            && let Err(error) =
                events::process_timer(&mut instance, arenas, msg)
            && !error.is_stale_reference()
        {
            error.log();
        }

        self.process_pending();
    }

    // Signals that the simulator brought an interface up.
    pub fn interface_up(&mut self, ifindex: u32) {
        self.interface_update(ifindex, true);
    }

    // Signals that the simulator brought an interface down.
    pub fn interface_down(&mut self, ifindex: u32) {
        self.interface_update(ifindex, false);
    }

    fn interface_update(&mut self, ifindex: u32, operative: bool) {
        let span =
            debug_span!("ospf-instance", router_id = %self.config.router_id);
        let _span_guard = span.enter();
        self.tx.set_now(self.env.now());

        let Some(iface) = self
            .arenas
            .interfaces
            .iter_mut()
            .map(|(_, iface)| iface)
            .find(|iface| iface.ifindex == ifindex)
        else {
            Error::UnknownInterface(ifindex).log();
            return;
        };
        iface.system.operative = operative;

        if let Some((instance, arenas)) = self.as_up()
            && instance.state.start_delay_timer.is_none()
            && let Some((area, iface_idx)) =
                arenas.areas.iter().find_map(|area| {
                    area.interfaces
                        .get_by_ifindex(&arenas.interfaces, ifindex)
                        .map(|(iface_idx, _)| (area, iface_idx))
                })
        {
            let iface = &mut arenas.interfaces[iface_idx];
            iface.update(
                area,
                &instance,
                &mut arenas.neighbors,
                &arenas.lsa_entries,
            );
        }

        self.process_pending();
    }

    pub fn is_active(&self) -> bool {
        self.state.is_some()
    }

    pub fn router_id(&self) -> Ipv4Addr {
        self.config.router_id
    }

    // Returns all counters kept by the instance.
    pub fn statistics(&self) -> Statistics {
        let instance = self
            .state
            .as_ref()
            .map(|state| state.statistics.clone())
            .unwrap_or_default();
        let interfaces = self
            .arenas
            .interfaces
            .iter()
            .map(|(_, iface)| {
                (iface.name.clone(), iface.state.statistics.clone())
            })
            .collect();
        Statistics {
            instance,
            interfaces,
        }
    }

    // Returns the state of all interfaces.
    pub fn interfaces(&self) -> Vec<InterfaceInfo> {
        self.arenas
            .areas
            .iter()
            .flat_map(|area| {
                area.interfaces.iter(&self.arenas.interfaces).map(|iface| {
                    InterfaceInfo {
                        name: iface.name.clone(),
                        ifindex: iface.ifindex,
                        area_id: area.area_id,
                        state: iface.state.ism_state,
                        dr: iface.state.dr.map(|net_id| net_id.get()),
                        bdr: iface.state.bdr.map(|net_id| net_id.get()),
                        all_dr_rtrs: iface.is_dr_or_backup(),
                    }
                })
            })
            .collect()
    }

    // Returns the state of all neighbors.
    pub fn neighbors(&self) -> Vec<NeighborInfo> {
        self.arenas
            .interfaces
            .iter()
            .flat_map(|(_, iface)| {
                iface.state.neighbors.iter(&self.arenas.neighbors).map(|nbr| {
                    NeighborInfo {
                        ifname: iface.name.clone(),
                        router_id: nbr.router_id,
                        src: nbr.src,
                        state: nbr.state,
                        hello_suppressed: nbr.hello_suppressed,
                    }
                })
            })
            .collect()
    }

    // Returns the LSAs of the given LSDB, ordered by their keys.
    pub fn lsdb(&self, scope: LsdbScope) -> Vec<Arc<Lsa>> {
        let lsdb = match (&self.state, scope) {
            (Some(_), LsdbScope::Area(area_id)) => {
                match self.arenas.areas.get_by_area_id(area_id) {
                    Some((_, area)) => &area.state.lsdb,
                    None => return vec![],
                }
            }
            (Some(state), LsdbScope::As) => &state.lsdb,
            (None, _) => return vec![],
        };
        lsdb.iter(&self.arenas.lsa_entries)
            .map(|(_, lse)| lse.data.clone())
            .collect()
    }

    // Returns the headers of the given LSDB, with their ages brought up to
    // date.
    pub fn lsdb_hdrs(&self, scope: LsdbScope) -> Vec<LsaHdr> {
        let now = self.tx.now();
        self.lsdb(scope)
            .iter()
            .map(|lsa| lsa.hdr_at(now))
            .collect()
    }

    // Returns the routing table.
    pub fn rib(&self) -> Option<&BTreeMap<Ipv4Network, RouteNet>> {
        self.state.as_ref().map(|state| &state.rib)
    }

    // Returns the shortest-path distance to a router of the given area.
    pub fn router_distance(
        &self,
        area_id: Ipv4Addr,
        router_id: Ipv4Addr,
    ) -> Option<u32> {
        let (_, area) = self.arenas.areas.get_by_area_id(area_id)?;
        area.state.routers.get(&router_id).map(|route| route.metric)
    }

    pub(crate) fn as_up(
        &mut self,
    ) -> Option<(InstanceUpView<'_>, &mut InstanceArenas)> {
        if let Some(state) = &mut self.state {
            let instance = InstanceUpView {
                config: &self.config,
                state,
                tx: &self.tx,
            };
            Some((instance, &mut self.arenas))
        } else {
            None
        }
    }

    // Processes the events queued while handling the last one, then hands all
    // pending requests to the simulator.
    fn process_pending(&mut self) {
        while let Ok(msg) = self.rx.protocol_input.try_recv() {
            if let Some((mut instance, arenas)) = self.as_up()
                && let Err(error) =
                    process_protocol_msg(&mut instance, arenas, msg)
                && !error.is_stale_reference()
            {
                error.log();
            }
        }

        self.flush_output();
    }

    fn flush_output(&mut self) {
        while let Ok(msg) = self.rx.protocol_output.try_recv() {
            match msg {
                ProtocolOutputMsg::NetTxPacket(msg) => {
                    // Update statistics.
                    if let Some((_, iface)) = self
                        .arenas
                        .interfaces
                        .iter_mut()
                        .find(|(_, iface)| iface.ifindex == msg.ifindex)
                    {
                        let pkt_type = msg.packet.hdr().pkt_type;
                        iface.state.statistics.pkts_sent.incr(pkt_type);
                    }

                    network::send_packet(self.env.as_mut(), msg);
                }
                ProtocolOutputMsg::TimerSchedule(msg) => {
                    self.env.schedule_after(msg.delay, msg.msg);
                }
                ProtocolOutputMsg::RouteInstall(msg) => {
                    self.env.route_install(msg);
                }
                ProtocolOutputMsg::RouteUninstall(prefix) => {
                    self.env.route_uninstall(prefix);
                }
            }
        }
    }
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("router_id", &self.config.router_id)
            .field("state", &self.state)
            .finish()
    }
}

// ===== impl InstanceState =====

impl InstanceState {
    pub(crate) fn new(router_id: Ipv4Addr) -> InstanceState {
        InstanceState {
            router_id,
            lsdb: Default::default(),
            spf_delay_timer: None,
            start_delay_timer: None,
            rib: Default::default(),
            nssa_translated: Default::default(),
            dc_capable: true,
            statistics: Default::default(),
        }
    }
}

// ===== impl InstanceChannelsTx =====

impl InstanceChannelsTx {
    // Creates a standalone set of Tx channels whose messages are discarded.
    #[cfg(test)]
    pub(crate) fn new(seed: u64) -> InstanceChannelsTx {
        let (tx, _rx) = channels(seed);
        tx
    }

    pub(crate) fn now(&self) -> SimTime {
        self.now.get()
    }

    pub(crate) fn set_now(&self, now: SimTime) {
        self.now.set(now);
    }

    // Returns a random duration between zero and `max`.
    pub(crate) fn jitter(&self, max: Duration) -> Duration {
        let max = max.as_millis() as u64;
        let jitter = self.rng.borrow_mut().random_range(0..=max);
        Duration::from_millis(jitter)
    }

    // Returns a random initial DD sequence number.
    pub(crate) fn dd_seq_no(&self) -> u32 {
        self.rng.borrow_mut().random()
    }

    // Schedules a one-shot timer.
    pub(crate) fn timeout(
        &self,
        kind: TimerKind,
        timeout: Duration,
    ) -> TimeoutTask {
        let tag = self.tags.next();
        self.timer_schedule(timeout, TimerMsg { tag, kind });
        TimeoutTask::new(tag, self.now(), timeout)
    }

    // Schedules a periodic timer.
    pub(crate) fn interval(
        &self,
        kind: TimerKind,
        interval: Duration,
    ) -> IntervalTask {
        let tag = self.tags.next();
        self.timer_schedule(interval, TimerMsg { tag, kind });
        IntervalTask::new(tag, self.now(), interval)
    }

    // Restarts a one-shot timer, turning any pending firing stale.
    pub(crate) fn reset(&self, task: &mut TimeoutTask, kind: TimerKind) {
        let tag = self.tags.next();
        task.reset(tag, self.now(), None);
        self.timer_schedule(task.timeout(), TimerMsg { tag, kind });
    }

    // Schedules the next firing of a periodic timer.
    pub(crate) fn rearm(&self, task: &mut IntervalTask, kind: TimerKind) {
        let tag = self.tags.next();
        task.rearm(tag, self.now());
        self.timer_schedule(task.interval(), TimerMsg { tag, kind });
    }

    fn timer_schedule(&self, delay: Duration, msg: TimerMsg) {
        let msg = TimerScheduleMsg { delay, msg };
        let _ = self
            .protocol_output
            .send(ProtocolOutputMsg::TimerSchedule(msg));
    }

    pub(crate) fn ism_event(
        &self,
        area_id: AreaId,
        iface_id: InterfaceId,
        event: ism::Event,
    ) {
        let _ = self.protocol_input.send(ProtocolInputMsg::IsmEvent(
            IsmEventMsg {
                area_id,
                iface_id,
                event,
            },
        ));
    }

    pub(crate) fn nsm_event(
        &self,
        area_id: AreaId,
        iface_id: InterfaceId,
        nbr_id: NeighborId,
        event: nsm::Event,
    ) {
        let _ = self.protocol_input.send(ProtocolInputMsg::NsmEvent(
            NsmEventMsg {
                area_id,
                iface_id,
                nbr_id,
                event,
            },
        ));
    }

    pub(crate) fn send_lsupd(
        &self,
        area_id: AreaId,
        iface_id: InterfaceId,
        nbr_id: Option<NeighborId>,
    ) {
        let _ = self.protocol_input.send(ProtocolInputMsg::SendLsUpdate(
            SendLsUpdateMsg {
                area_id,
                iface_id,
                nbr_id,
            },
        ));
    }

    pub(crate) fn lsa_orig_event(&self, event: LsaOriginateEvent) {
        let _ = self
            .protocol_input
            .send(ProtocolInputMsg::LsaOrigEvent(LsaOrigEventMsg { event }));
    }

    pub(crate) fn lsa_orig_check(
        &self,
        lsdb_id: LsdbId,
        options: Option<Options>,
        lsa_id: Ipv4Addr,
        lsa_body: LsaBody,
    ) {
        let _ = self.protocol_input.send(ProtocolInputMsg::LsaOrigCheck(
            LsaOrigCheckMsg {
                lsdb_id,
                options,
                lsa_id,
                lsa_body,
            },
        ));
    }

    pub(crate) fn lsa_flush(
        &self,
        lsdb_id: LsdbId,
        lse_id: LsaEntryId,
        reason: LsaFlushReason,
    ) {
        let _ = self.protocol_input.send(ProtocolInputMsg::LsaFlush(
            LsaFlushMsg {
                lsdb_id,
                lse_id,
                reason,
            },
        ));
    }

    pub(crate) fn net_tx_packet(&self, msg: NetTxPacketMsg) {
        let _ = self
            .protocol_output
            .send(ProtocolOutputMsg::NetTxPacket(msg));
    }

    pub(crate) fn route_install(&self, msg: RouteMsg) {
        let _ = self
            .protocol_output
            .send(ProtocolOutputMsg::RouteInstall(msg));
    }

    pub(crate) fn route_uninstall(&self, prefix: Ipv4Network) {
        let _ = self
            .protocol_output
            .send(ProtocolOutputMsg::RouteUninstall(prefix));
    }
}

// ===== helper functions =====

fn channels(seed: u64) -> (InstanceChannelsTx, InstanceChannelsRx) {
    let (input_tx, input_rx) = crossbeam_channel::unbounded();
    let (output_tx, output_rx) = crossbeam_channel::unbounded();

    let tx = InstanceChannelsTx {
        now: Cell::new(SimTime::ZERO),
        tags: TimerTags::default(),
        rng: RefCell::new(StdRng::seed_from_u64(seed)),
        protocol_input: input_tx,
        protocol_output: output_tx,
    };
    let rx = InstanceChannelsRx {
        protocol_input: input_rx,
        protocol_output: output_rx,
    };
    (tx, rx)
}

// Tries to start all interfaces and originates the initial LSAs.
pub(crate) fn start_interfaces(
    instance: &InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
) {
    for area in arenas.areas.iter() {
        for iface_idx in area.interfaces.indexes().collect::<Vec<_>>() {
            let iface = &mut arenas.interfaces[iface_idx];
            iface.update(
                area,
                instance,
                &mut arenas.neighbors,
                &arenas.lsa_entries,
            );
        }

        // Originate Router-LSA.
        instance
            .tx
            .lsa_orig_event(LsaOriginateEvent::AreaStart { area_id: area.id });
    }

    // Originate AS-External LSAs.
    if instance.config.is_asbr() {
        instance.tx.lsa_orig_event(LsaOriginateEvent::ExternalRoutesChange);
    }
}

fn process_protocol_msg(
    instance: &mut InstanceUpView<'_>,
    arenas: &mut InstanceArenas,
    msg: ProtocolInputMsg,
) -> Result<(), Error> {
    match msg {
        // Interface FSM event.
        ProtocolInputMsg::IsmEvent(msg) => events::process_ism_event(
            instance,
            arenas,
            msg.area_id,
            msg.iface_id,
            msg.event,
        )?,
        // Neighbor FSM event.
        ProtocolInputMsg::NsmEvent(msg) => events::process_nsm_event(
            instance,
            arenas,
            msg.area_id,
            msg.iface_id,
            msg.nbr_id,
            msg.event,
        )?,
        // Request to send LS Update.
        ProtocolInputMsg::SendLsUpdate(msg) => events::process_send_lsupd(
            instance,
            arenas,
            msg.area_id,
            msg.iface_id,
            msg.nbr_id,
        )?,
        // LSA origination event.
        ProtocolInputMsg::LsaOrigEvent(msg) => {
            events::process_lsa_orig_event(instance, arenas, msg.event)?
        }
        // LSA origination check.
        ProtocolInputMsg::LsaOrigCheck(msg) => events::process_lsa_orig_check(
            instance,
            arenas,
            msg.lsdb_id,
            msg.options,
            msg.lsa_id,
            msg.lsa_body,
        )?,
        // LSA flush.
        ProtocolInputMsg::LsaFlush(msg) => events::process_lsa_flush(
            instance,
            arenas,
            msg.lsdb_id,
            msg.lse_id,
            msg.reason,
        )?,
    }

    Ok(())
}

// ===== unit tests =====

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timers_carry_fresh_tags() {
        let tx = InstanceChannelsTx::new(7);
        tx.set_now(SimTime::from_secs(5));

        let mut task = tx.timeout(TimerKind::SpfDelay, Duration::from_secs(1));
        let old_tag = task.tag();
        tx.reset(&mut task, TimerKind::SpfDelay);
        assert!(!task.is_current(old_tag));
        assert_eq!(task.remaining(tx.now()), Duration::from_secs(1));

        let mut task =
            tx.interval(TimerKind::StartDelay, Duration::from_secs(10));
        let old_tag = task.tag();
        tx.set_now(SimTime::from_secs(15));
        tx.rearm(&mut task, TimerKind::StartDelay);
        assert!(!task.is_current(old_tag));
        assert_eq!(task.remaining(tx.now()), Duration::from_secs(10));
    }

    #[test]
    fn seeded_randomness_is_reproducible() {
        let tx1 = InstanceChannelsTx::new(42);
        let tx2 = InstanceChannelsTx::new(42);
        let max = Duration::from_millis(40);
        for _ in 0..16 {
            let jitter = tx1.jitter(max);
            assert!(jitter <= max);
            assert_eq!(jitter, tx2.jitter(max));
        }
        assert_eq!(tx1.dd_seq_no(), tx2.dd_seq_no());
    }
}
