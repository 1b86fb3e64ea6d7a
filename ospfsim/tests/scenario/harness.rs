//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::cell::{Cell, RefCell};
use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap};
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

use bytes::Bytes;
use ipnetwork::Ipv4Network;
use ospfsim::config::InstanceCfg;
use ospfsim::instance::Instance;
use ospfsim::network::{ALL_DR_RTRS, ALL_SPF_RTRS};
use ospfsim::packet::Packet;
use ospfsim::southbound::{RouteMsg, RouteSink};
use ospfsim::tasks::messages::TimerMsg;
use ospfsim_utils::sim::{
    Clock, PacketTransport, SimTime, TimerFacility, TxRequest,
};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::prelude::*;

// Propagation delay of every simulated link.
pub const LINK_DELAY: Duration = Duration::from_millis(1);

// Simulated network of OSPF routers.
//
// Routers are attached to shared segments. Segments may also contain
// scripted peers, whose received packets are recorded instead of processed.
pub struct Network {
    now: Rc<Cell<SimTime>>,
    events: Rc<RefCell<EventQueue>>,
    routers: Vec<Router>,
    segments: Vec<Vec<Attachment>>,
    // Every packet sent by a router.
    pub sent: Vec<SentPacket>,
    // Every packet delivered to a scripted peer.
    pub scripted_rx: Vec<SentPacket>,
}

pub struct Router {
    pub instance: Instance,
    pub routes: Rc<RefCell<BTreeMap<Ipv4Network, RouteMsg>>>,
}

#[derive(Clone, Debug)]
pub struct SentPacket {
    pub time: SimTime,
    pub node: Option<usize>,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub packet: Packet,
}

#[derive(Clone, Copy, Debug)]
struct Attachment {
    // None for scripted peers.
    node: Option<usize>,
    ifindex: u32,
    addr: Ipv4Addr,
}

#[derive(Debug)]
enum Event {
    Timer {
        node: usize,
        msg: TimerMsg,
    },
    Tx {
        node: usize,
        request: TxRequest,
    },
    Rx {
        node: usize,
        ifindex: u32,
        src: Ipv4Addr,
        src_identity: u32,
        payload: Bytes,
    },
}

#[derive(Debug, Default)]
struct EventQueue {
    heap: BinaryHeap<QueuedEvent>,
    seq: u64,
}

#[derive(Debug)]
struct QueuedEvent {
    time: SimTime,
    seq: u64,
    event: Event,
}

// Environment handed over to each instance.
struct RouterEnv {
    node: usize,
    now: Rc<Cell<SimTime>>,
    events: Rc<RefCell<EventQueue>>,
    routes: Rc<RefCell<BTreeMap<Ipv4Network, RouteMsg>>>,
}

// Sends the instances' logs to the test output. Set RUST_LOG to enable.
pub fn init_tracing() {
    let env_filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::OFF.into())
        .from_env_lossy();
    let layer = tracing_subscriber::fmt::layer()
        .with_test_writer()
        .with_target(false)
        .with_filter(env_filter);
    let _ = tracing_subscriber::registry().with(layer).try_init();
}

// ===== impl Network =====

impl Network {
    pub fn new() -> Network {
        Network {
            now: Rc::new(Cell::new(SimTime::ZERO)),
            events: Default::default(),
            routers: vec![],
            segments: vec![],
            sent: vec![],
            scripted_rx: vec![],
        }
    }

    pub fn now(&self) -> SimTime {
        self.now.get()
    }

    // Adds a router, returning its node number.
    pub fn add_router(&mut self, config: InstanceCfg) -> usize {
        let node = self.routers.len();
        let routes = Rc::new(RefCell::new(BTreeMap::new()));
        let env = RouterEnv {
            node,
            now: self.now.clone(),
            events: self.events.clone(),
            routes: routes.clone(),
        };
        let instance = Instance::new(config, Box::new(env)).unwrap();
        self.routers.push(Router { instance, routes });
        node
    }

    pub fn router(&self, node: usize) -> &Router {
        &self.routers[node]
    }

    pub fn router_mut(&mut self, node: usize) -> &mut Router {
        &mut self.routers[node]
    }

    // Connects the given router interfaces (node, ifindex, address) and
    // scripted peer addresses to a new segment.
    pub fn connect(
        &mut self,
        routers: &[(usize, u32, Ipv4Addr)],
        scripted: &[Ipv4Addr],
    ) {
        let segment = routers
            .iter()
            .map(|(node, ifindex, addr)| Attachment {
                node: Some(*node),
                ifindex: *ifindex,
                addr: *addr,
            })
            .chain(scripted.iter().map(|addr| Attachment {
                node: None,
                ifindex: 0,
                addr: *addr,
            }))
            .collect();
        self.segments.push(segment);
    }

    pub fn start_all(&mut self) {
        for router in &mut self.routers {
            router.instance.start();
        }
    }

    // Injects a packet from a scripted peer into a router interface.
    pub fn inject(
        &mut self,
        node: usize,
        ifindex: u32,
        src: Ipv4Addr,
        packet: &Packet,
    ) {
        let payload = packet.encode();
        self.events.borrow_mut().push(
            self.now.get() + LINK_DELAY,
            Event::Rx {
                node,
                ifindex,
                src,
                src_identity: u32::MAX,
                payload,
            },
        );
    }

    // Processes all events scheduled up to the given time.
    pub fn run_until(&mut self, time: SimTime) {
        loop {
            let event = {
                let mut events = self.events.borrow_mut();
                match events.heap.peek() {
                    Some(queued) if queued.time <= time => events.heap.pop(),
                    _ => None,
                }
            };
            let Some(queued) = event else {
                break;
            };
            self.now.set(queued.time);
            self.process_event(queued.event);
        }
        self.now.set(time);
    }

    pub fn run_for(&mut self, duration: Duration) {
        self.run_until(self.now.get() + duration);
    }

    fn process_event(&mut self, event: Event) {
        match event {
            Event::Timer { node, msg } => {
                self.routers[node].instance.process_timer(msg);
            }
            Event::Tx { node, request } => {
                self.process_tx(node, request);
            }
            Event::Rx {
                node,
                ifindex,
                src,
                src_identity,
                payload,
            } => {
                self.routers[node].instance.process_packet(
                    ifindex,
                    src,
                    src_identity,
                    &payload,
                );
            }
        }
    }

    fn process_tx(&mut self, node: usize, request: TxRequest) {
        let now = self.now.get();
        let mut buf = request.payload.clone();
        let packet = Packet::decode(&mut buf).unwrap();
        self.sent.push(SentPacket {
            time: now,
            node: Some(node),
            src: request.src,
            dst: request.dst,
            packet: packet.clone(),
        });

        let Some(segment) = self.segments.iter().find(|segment| {
            segment.iter().any(|attachment| {
                attachment.node == Some(node)
                    && attachment.ifindex == request.ifindex
            })
        }) else {
            return;
        };

        for attachment in segment {
            if attachment.node == Some(node) {
                continue;
            }

            let accept = match request.dst {
                ALL_SPF_RTRS => true,
                ALL_DR_RTRS => match attachment.node {
                    Some(peer) => self.routers[peer]
                        .instance
                        .interfaces()
                        .iter()
                        .any(|iface| {
                            iface.ifindex == attachment.ifindex
                                && iface.all_dr_rtrs
                        }),
                    None => true,
                },
                dst => dst == attachment.addr,
            };
            if !accept {
                continue;
            }

            match attachment.node {
                Some(peer) => self.events.borrow_mut().push(
                    now + LINK_DELAY,
                    Event::Rx {
                        node: peer,
                        ifindex: attachment.ifindex,
                        src: request.src,
                        src_identity: node as u32,
                        payload: request.payload.clone(),
                    },
                ),
                None => self.scripted_rx.push(SentPacket {
                    time: now + LINK_DELAY,
                    node: Some(node),
                    src: request.src,
                    dst: attachment.addr,
                    packet: packet.clone(),
                }),
            }
        }
    }

    // Returns the packets sent by a router since the given time.
    pub fn sent_by(
        &self,
        node: usize,
        since: SimTime,
    ) -> impl Iterator<Item = &SentPacket> {
        self.sent
            .iter()
            .filter(move |sent| sent.node == Some(node) && sent.time >= since)
    }
}

// ===== impl EventQueue =====

impl EventQueue {
    fn push(&mut self, time: SimTime, event: Event) {
        self.seq += 1;
        self.heap.push(QueuedEvent {
            time,
            seq: self.seq,
            event,
        });
    }
}

// ===== impl QueuedEvent =====

// Earliest events first, in insertion order for the same instant.
impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .time
            .cmp(&self.time)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for QueuedEvent {}

// ===== impl RouterEnv =====

impl Clock for RouterEnv {
    fn now(&self) -> SimTime {
        self.now.get()
    }
}

impl TimerFacility<TimerMsg> for RouterEnv {
    fn schedule_after(&mut self, delay: Duration, msg: TimerMsg) {
        let time = self.now.get() + delay;
        let node = self.node;
        self.events
            .borrow_mut()
            .push(time, Event::Timer { node, msg });
    }
}

impl PacketTransport for RouterEnv {
    fn send(&mut self, request: TxRequest) {
        let time = self.now.get() + request.delay;
        let node = self.node;
        self.events
            .borrow_mut()
            .push(time, Event::Tx { node, request });
    }
}

impl RouteSink for RouterEnv {
    fn route_install(&mut self, msg: RouteMsg) {
        self.routes.borrow_mut().insert(msg.prefix, msg);
    }

    fn route_uninstall(&mut self, prefix: Ipv4Network) {
        self.routes.borrow_mut().remove(&prefix);
    }
}
