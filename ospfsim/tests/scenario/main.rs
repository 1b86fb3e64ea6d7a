//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

mod harness;

use std::collections::BTreeSet;
use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use const_addrs::{ip4, net4};
use maplit::btreeset;
use ospfsim::config::{
    AreaCfg, ExternalRouteCfg, InstanceCfg, InterfaceCfg, RangeCfg,
};
use ospfsim::instance::LsdbScope;
use ospfsim::interface::{InterfaceType, ism};
use ospfsim::neighbor::nsm;
use ospfsim::packet::lsa::{
    Lsa, LsaAsExternal, LsaAsExternalFlags, LsaBody, LsaHdr, LsaKey, LsaType,
    LsaTypeCode,
};
use ospfsim::packet::{
    DbDesc, DbDescFlags, Hello, LsUpdate, Options, Packet, PacketHdr,
    PacketType,
};
use ospfsim::route::PathType;
use ospfsim_utils::sim::SimTime;

use crate::harness::{Network, SentPacket};

const BACKBONE: Ipv4Addr = Ipv4Addr::UNSPECIFIED;

// Scripted peer used by the packet-level scenarios.
const PEER_RID: Ipv4Addr = Ipv4Addr::new(2, 2, 2, 2);
const PEER_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 2);
const LOCAL_RID: Ipv4Addr = Ipv4Addr::new(1, 1, 1, 1);
const PEER_DD_SEQ_NO: u32 = 1000;

//
// Helper functions.
//

fn instance_cfg(router_id: Ipv4Addr, areas: Vec<AreaCfg>) -> InstanceCfg {
    InstanceCfg {
        router_id,
        seed: u32::from(router_id).into(),
        areas,
        ..Default::default()
    }
}

fn backbone() -> AreaCfg {
    AreaCfg {
        area_id: BACKBONE,
        ..Default::default()
    }
}

fn iface_cfg(
    ifindex: u32,
    area_id: Ipv4Addr,
    address: &str,
    if_type: InterfaceType,
) -> InterfaceCfg {
    InterfaceCfg {
        name: format!("eth{ifindex}"),
        ifindex,
        area_id,
        address: address.parse().unwrap(),
        if_type,
        ..Default::default()
    }
}

fn loopback_cfg(
    ifindex: u32,
    area_id: Ipv4Addr,
    address: &str,
) -> InterfaceCfg {
    InterfaceCfg {
        name: "lo".to_owned(),
        loopback: true,
        ..iface_cfg(ifindex, area_id, address, InterfaceType::Broadcast)
    }
}

fn nbr_state(net: &Network, node: usize, router_id: Ipv4Addr) -> nsm::State {
    net.router(node)
        .instance
        .neighbors()
        .into_iter()
        .find(|nbr| nbr.router_id == router_id)
        .map(|nbr| nbr.state)
        .unwrap_or(nsm::State::Down)
}

fn lsdb_summary(
    net: &Network,
    node: usize,
    scope: LsdbScope,
) -> BTreeSet<(LsaKey, u32)> {
    net.router(node)
        .instance
        .lsdb_hdrs(scope)
        .into_iter()
        .map(|hdr| (hdr.key(), hdr.seq_no))
        .collect()
}

// Two routers connected by a point-to-point link with asymmetric costs.
//
// X (1.1.1.1) uses cost 10 and Y (2.2.2.2) uses cost 15. Y also has a
// loopback address.
fn p2p_pair() -> (Network, usize, usize) {
    let mut net = Network::new();

    let mut config = instance_cfg(ip4!("1.1.1.1"), vec![backbone()]);
    config.interfaces = vec![InterfaceCfg {
        cost: 10,
        ..iface_cfg(1, BACKBONE, "10.0.1.1/30", InterfaceType::PointToPoint)
    }];
    let x = net.add_router(config);

    let mut config = instance_cfg(ip4!("2.2.2.2"), vec![backbone()]);
    config.interfaces = vec![
        InterfaceCfg {
            cost: 15,
            ..iface_cfg(
                1,
                BACKBONE,
                "10.0.1.2/30",
                InterfaceType::PointToPoint,
            )
        },
        loopback_cfg(2, BACKBONE, "2.2.2.2/32"),
    ];
    let y = net.add_router(config);

    net.connect(
        &[(x, 1, ip4!("10.0.1.1")), (y, 1, ip4!("10.0.1.2"))],
        &[],
    );
    (net, x, y)
}

// Three routers attached to the same broadcast segment, one of them with a
// higher priority. Optionally, a fourth router hangs off the first one
// through a point-to-point link and redistributes an external route.
fn broadcast_lan(with_asbr: bool) -> (Network, Vec<usize>) {
    let mut net = Network::new();
    let mut nodes = vec![];

    for (n, priority) in [(1, 1), (2, 1), (3, 5)] {
        let router_id = Ipv4Addr::new(n, n, n, n);
        let mut config = instance_cfg(router_id, vec![backbone()]);
        config.interfaces = vec![InterfaceCfg {
            priority,
            ..iface_cfg(
                1,
                BACKBONE,
                &format!("10.0.0.{n}/24"),
                InterfaceType::Broadcast,
            )
        }];
        if n == 1 && with_asbr {
            config.interfaces.push(iface_cfg(
                2,
                BACKBONE,
                "10.0.14.1/30",
                InterfaceType::PointToPoint,
            ));
        }
        nodes.push(net.add_router(config));
    }
    net.connect(
        &[
            (nodes[0], 1, ip4!("10.0.0.1")),
            (nodes[1], 1, ip4!("10.0.0.2")),
            (nodes[2], 1, ip4!("10.0.0.3")),
        ],
        &[],
    );

    if with_asbr {
        let mut config = instance_cfg(ip4!("4.4.4.4"), vec![backbone()]);
        config.interfaces = vec![iface_cfg(
            1,
            BACKBONE,
            "10.0.14.2/30",
            InterfaceType::PointToPoint,
        )];
        config.external_routes = vec![ExternalRouteCfg {
            prefix: net4!("172.16.0.0/16"),
            metric: 20,
            ..Default::default()
        }];
        let asbr = net.add_router(config);
        net.connect(
            &[(nodes[0], 2, ip4!("10.0.14.1")), (asbr, 1, ip4!("10.0.14.2"))],
            &[],
        );
        nodes.push(asbr);
    }

    (net, nodes)
}

//
// Tests.
//

#[test]
fn p2p_adjacency_and_costs() {
    harness::init_tracing();
    let (mut net, x, y) = p2p_pair();
    net.start_all();
    net.run_until(SimTime::from_secs(60));

    assert_eq!(nbr_state(&net, x, ip4!("2.2.2.2")), nsm::State::Full);
    assert_eq!(nbr_state(&net, y, ip4!("1.1.1.1")), nsm::State::Full);

    // Each direction uses the cost of the outgoing interface.
    let x_inst = &net.router(x).instance;
    let y_inst = &net.router(y).instance;
    assert_eq!(x_inst.router_distance(BACKBONE, ip4!("2.2.2.2")), Some(10));
    assert_eq!(y_inst.router_distance(BACKBONE, ip4!("1.1.1.1")), Some(15));

    // Y's loopback is reachable from X through the p2p link.
    let routes = net.router(x).routes.borrow();
    let route = routes.get(&net4!("2.2.2.2/32")).unwrap();
    assert_eq!(route.path_type, PathType::IntraArea);
    assert_eq!(route.metric, 10);
    assert_eq!(route.nexthop, Some(ip4!("10.0.1.2")));
    assert_eq!(route.ifindex, 1);
}

#[test]
fn broadcast_dr_election() {
    harness::init_tracing();
    let (mut net, nodes) = broadcast_lan(false);
    net.start_all();
    net.run_until(SimTime::from_secs(90));

    // The highest priority router is elected DR and the highest Router ID
    // among the remaining ones becomes BDR.
    for node in &nodes {
        let ifaces = net.router(*node).instance.interfaces();
        let iface = &ifaces[0];
        assert_eq!(iface.dr, Some(ip4!("10.0.0.3")));
        assert_eq!(iface.bdr, Some(ip4!("10.0.0.2")));
    }
    let ifaces = net.router(nodes[2]).instance.interfaces();
    assert_eq!(ifaces[0].state, ism::State::Dr);

    // The DR is fully adjacent with everyone else.
    let dr = &net.router(nodes[2]).instance;
    let full = dr
        .neighbors()
        .into_iter()
        .filter(|nbr| nbr.state == nsm::State::Full)
        .map(|nbr| nbr.router_id)
        .collect::<BTreeSet<_>>();
    assert_eq!(full, btreeset![ip4!("1.1.1.1"), ip4!("2.2.2.2")]);

    // Exactly one live Network-LSA describes the segment, listing the DR and
    // its fully adjacent neighbors.
    let network_lsas = dr
        .lsdb(LsdbScope::Area(BACKBONE))
        .into_iter()
        .filter(|lsa| {
            lsa.hdr.lsa_type == LsaTypeCode::Network.into()
                && !lsa.hdr.is_maxage()
        })
        .collect::<Vec<_>>();
    assert_eq!(network_lsas.len(), 1);
    let lsa = &network_lsas[0];
    assert_eq!(lsa.hdr.lsa_id, ip4!("10.0.0.3"));
    assert_eq!(lsa.hdr.adv_rtr, ip4!("3.3.3.3"));
    let network = lsa.body.as_network().unwrap();
    let mut attached = full.clone();
    attached.insert(ip4!("3.3.3.3"));
    assert_eq!(network.attached_rtrs, attached);
}

#[test]
fn lsdb_convergence() {
    harness::init_tracing();
    let (mut net, nodes) = broadcast_lan(true);
    net.start_all();
    net.run_until(SimTime::from_secs(120));

    // All routers agree on the contents of both the area and AS LSDBs.
    for scope in [LsdbScope::Area(BACKBONE), LsdbScope::As] {
        let reference = lsdb_summary(&net, nodes[0], scope);
        assert!(!reference.is_empty());
        for node in &nodes[1..] {
            assert_eq!(lsdb_summary(&net, *node, scope), reference);
        }
    }

    // The external route is learned by a router two hops away from the ASBR.
    let routes = net.router(nodes[1]).routes.borrow();
    let route = routes.get(&net4!("172.16.0.0/16")).unwrap();
    assert_eq!(route.path_type, PathType::Type2External);
    assert_eq!(route.metric, 20);
    assert_eq!(route.nexthop, Some(ip4!("10.0.0.1")));

    // The p2p subnet behind the ASBR's neighbor is also reachable.
    let route = routes.get(&net4!("10.0.14.0/30")).unwrap();
    assert_eq!(route.path_type, PathType::IntraArea);
    assert_eq!(route.metric, 20);
}

#[test]
fn duplicate_lsa_is_acknowledged_only() {
    harness::init_tracing();
    let (mut net, x, _) = p2p_pair();
    net.start_all();
    net.run_until(SimTime::from_secs(60));

    let scope = LsdbScope::Area(BACKBONE);
    let lsdb_before = net.router(x).instance.lsdb(scope);
    let router_lsa = lsdb_before
        .iter()
        .find(|lsa| {
            lsa.hdr.lsa_type == LsaTypeCode::Router.into()
                && lsa.hdr.adv_rtr == ip4!("2.2.2.2")
        })
        .cloned()
        .unwrap();

    // Y resends the LSA X already has.
    let packet = Packet::LsUpdate(LsUpdate {
        hdr: PacketHdr::new(PacketType::LsUpdate, ip4!("2.2.2.2"), BACKBONE),
        lsas: vec![(*router_lsa).clone()],
    });
    let since = net.now();
    net.inject(x, 1, ip4!("10.0.1.2"), &packet);
    net.run_for(Duration::from_secs(1));

    // The LSDB is untouched, the LSA is acknowledged once and nothing is
    // flooded back.
    assert_eq!(net.router(x).instance.lsdb(scope), lsdb_before);
    let sent = net
        .sent_by(x, since)
        .map(|sent| sent.packet.hdr().pkt_type)
        .collect::<Vec<_>>();
    let count = |pkt_type| sent.iter().filter(|t| **t == pkt_type).count();
    assert_eq!(count(PacketType::LsAck), 1);
    assert_eq!(count(PacketType::LsUpdate), 0);
}

#[test]
fn neighbor_loss_withdraws_routes() {
    harness::init_tracing();
    let (mut net, x, y) = p2p_pair();
    net.start_all();
    net.run_until(SimTime::from_secs(60));
    assert!(
        net.router(x)
            .routes
            .borrow()
            .contains_key(&net4!("2.2.2.2/32"))
    );

    // Y goes silent. X notices once the dead interval expires.
    net.router_mut(y).instance.interface_down(1);
    net.run_for(Duration::from_secs(60));

    assert_eq!(nbr_state(&net, x, ip4!("2.2.2.2")), nsm::State::Down);
    assert!(
        !net.router(x)
            .routes
            .borrow()
            .contains_key(&net4!("2.2.2.2/32"))
    );
    let x_inst = &net.router(x).instance;
    assert_eq!(x_inst.router_distance(BACKBONE, ip4!("2.2.2.2")), None);
}

// Router 1.1.1.1 attached through a point-to-point link to a scripted peer.
fn scripted_peer(area: AreaCfg) -> (Network, usize) {
    let mut net = Network::new();
    let area_id = area.area_id;
    let mut config = instance_cfg(LOCAL_RID, vec![area]);
    config.interfaces = vec![iface_cfg(
        1,
        area_id,
        "10.0.1.1/30",
        InterfaceType::PointToPoint,
    )];
    let node = net.add_router(config);
    net.connect(&[(node, 1, ip4!("10.0.1.1"))], &[PEER_ADDR]);
    net.start_all();
    net.run_until(SimTime::from_secs(1));
    (net, node)
}

fn peer_hello(area_id: Ipv4Addr, options: Options) -> Packet {
    Packet::Hello(Hello {
        hdr: PacketHdr::new(PacketType::Hello, PEER_RID, area_id),
        network_mask: ip4!("255.255.255.252"),
        hello_interval: 10,
        options,
        priority: 1,
        dead_interval: 40,
        dr: None,
        bdr: None,
        neighbors: btreeset![LOCAL_RID],
    })
}

fn peer_dbdesc(
    area_id: Ipv4Addr,
    options: Options,
    dd_flags: DbDescFlags,
    dd_seq_no: u32,
    lsa_hdrs: Vec<LsaHdr>,
) -> Packet {
    Packet::DbDesc(DbDesc {
        hdr: PacketHdr::new(PacketType::DbDesc, PEER_RID, area_id),
        mtu: 1500,
        options,
        dd_flags,
        dd_seq_no,
        lsa_hdrs,
    })
}

fn peer_lsupd(area_id: Ipv4Addr, lsas: Vec<Lsa>) -> Packet {
    Packet::LsUpdate(LsUpdate {
        hdr: PacketHdr::new(PacketType::LsUpdate, PEER_RID, area_id),
        lsas,
    })
}

// Brings the adjacency with the scripted peer to Exchange. The peer has the
// higher Router ID, so it's the master.
fn peer_exchange(net: &mut Network, node: usize, area_id: Ipv4Addr) {
    let options = peer_options(net, node);

    // Bidirectional communication leads straight to ExStart on p2p links.
    net.inject(node, 1, PEER_ADDR, &peer_hello(area_id, options));
    net.run_for(Duration::from_millis(100));
    assert_eq!(nbr_state(net, node, PEER_RID), nsm::State::ExStart);

    let flags = DbDescFlags::I | DbDescFlags::M | DbDescFlags::MS;
    let packet = peer_dbdesc(area_id, options, flags, PEER_DD_SEQ_NO, vec![]);
    net.inject(node, 1, PEER_ADDR, &packet);
    net.run_for(Duration::from_millis(100));
    assert_eq!(nbr_state(net, node, PEER_RID), nsm::State::Exchange);
}

// Completes the database exchange with an empty description. Nothing is
// requested, so the adjacency goes straight to Full.
fn peer_full(net: &mut Network, node: usize, area_id: Ipv4Addr) {
    peer_exchange(net, node, area_id);
    let options = peer_options(net, node);
    let dd_seq_no = PEER_DD_SEQ_NO + 1;
    let packet =
        peer_dbdesc(area_id, options, DbDescFlags::MS, dd_seq_no, vec![]);
    net.inject(node, 1, PEER_ADDR, &packet);
    net.run_for(Duration::from_millis(100));
    assert_eq!(nbr_state(net, node, PEER_RID), nsm::State::Full);
}

// The peer mirrors the options of the router's own Hellos.
fn peer_options(net: &Network, node: usize) -> Options {
    net.scripted_rx
        .iter()
        .filter(|rx| rx.node == Some(node))
        .find_map(|rx| match &rx.packet {
            Packet::Hello(hello) => Some(hello.options),
            _ => None,
        })
        .unwrap()
}

// Runs the network while the scripted peer keeps sending Hellos.
fn peer_keepalive(
    net: &mut Network,
    node: usize,
    area_id: Ipv4Addr,
    duration: Duration,
) {
    let options = peer_options(net, node);
    let end = net.now() + duration;
    while net.now() < end {
        net.inject(node, 1, PEER_ADDR, &peer_hello(area_id, options));
        let step = end.saturating_duration_since(net.now());
        net.run_for(step.min(Duration::from_secs(10)));
    }
}

fn own_lsa(
    net: &Network,
    node: usize,
    area_id: Ipv4Addr,
    lsa_type: LsaTypeCode,
) -> Arc<Lsa> {
    net.router(node)
        .instance
        .lsdb(LsdbScope::Area(area_id))
        .into_iter()
        .find(|lsa| {
            lsa.hdr.lsa_type == lsa_type.into()
                && lsa.hdr.adv_rtr == net.router(node).instance.router_id()
        })
        .unwrap()
}

// Whether a packet is an LS Update carrying the given LSA instance.
fn carries_lsa(sent: &SentPacket, lsa_key: &LsaKey, seq_no: u32) -> bool {
    match &sent.packet {
        Packet::LsUpdate(ls_upd) => ls_upd
            .lsas
            .iter()
            .any(|lsa| lsa.hdr.key() == *lsa_key && lsa.hdr.seq_no == seq_no),
        _ => false,
    }
}

fn external_lsa(prefix_addr: Ipv4Addr, adv_rtr: Ipv4Addr, now: SimTime) -> Lsa {
    let body = LsaBody::AsExternal(LsaAsExternal {
        mask: ip4!("255.255.0.0"),
        flags: LsaAsExternalFlags::E,
        metric: 20,
        fwd_addr: None,
        tag: 0,
    });
    Lsa::new(1, Options::E, prefix_addr, adv_rtr, 0x80000001, body, now)
}

fn stub_area(area_id: Ipv4Addr) -> AreaCfg {
    AreaCfg {
        area_id,
        stub: true,
        ..Default::default()
    }
}

fn no_externals(net: &Network, node: usize) -> bool {
    let instance = &net.router(node).instance;
    instance.lsdb(LsdbScope::As).is_empty()
        && instance.rib().unwrap().values().all(|route| {
            !matches!(
                route.path_type,
                PathType::Type1External | PathType::Type2External
            )
        })
}

// Backbone router R1, ABR R2 and R3 inside stub area 0.0.0.1, chained by
// point-to-point links. R3 has two passive networks covered by an address
// range configured on R2.
fn two_areas() -> (Network, [usize; 3]) {
    let area1 = ip4!("0.0.0.1");
    let mut net = Network::new();

    let mut config = instance_cfg(ip4!("1.1.1.1"), vec![backbone()]);
    config.interfaces = vec![iface_cfg(
        1,
        BACKBONE,
        "10.0.12.1/30",
        InterfaceType::PointToPoint,
    )];
    let r1 = net.add_router(config);

    let area = AreaCfg {
        ranges: vec![RangeCfg {
            prefix: net4!("172.16.0.0/16"),
            ..Default::default()
        }],
        ..stub_area(area1)
    };
    let mut config = instance_cfg(ip4!("2.2.2.2"), vec![backbone(), area]);
    config.interfaces = vec![
        iface_cfg(1, BACKBONE, "10.0.12.2/30", InterfaceType::PointToPoint),
        iface_cfg(2, area1, "10.0.23.1/30", InterfaceType::PointToPoint),
    ];
    let r2 = net.add_router(config);

    let mut config = instance_cfg(ip4!("3.3.3.3"), vec![stub_area(area1)]);
    config.interfaces = vec![
        iface_cfg(1, area1, "10.0.23.2/30", InterfaceType::PointToPoint),
        InterfaceCfg {
            passive: true,
            ..iface_cfg(2, area1, "172.16.1.1/24", InterfaceType::Broadcast)
        },
        InterfaceCfg {
            passive: true,
            ..iface_cfg(3, area1, "172.16.2.1/24", InterfaceType::Broadcast)
        },
    ];
    let r3 = net.add_router(config);

    net.connect(
        &[(r1, 1, ip4!("10.0.12.1")), (r2, 1, ip4!("10.0.12.2"))],
        &[],
    );
    net.connect(
        &[(r2, 2, ip4!("10.0.23.1")), (r3, 1, ip4!("10.0.23.2"))],
        &[],
    );
    (net, [r1, r2, r3])
}

fn summary_lsa_ids(
    net: &Network,
    node: usize,
    adv_rtr: Ipv4Addr,
) -> Vec<Ipv4Addr> {
    net.router(node)
        .instance
        .lsdb_hdrs(LsdbScope::Area(BACKBONE))
        .into_iter()
        .filter(|hdr| {
            hdr.lsa_type == LsaTypeCode::SummaryNetwork.into()
                && hdr.adv_rtr == adv_rtr
        })
        .map(|hdr| hdr.lsa_id)
        .collect()
}

#[test]
fn stub_area_rejects_external_lsa_headers() {
    harness::init_tracing();
    let area_id = ip4!("0.0.0.1");
    let (mut net, node) = scripted_peer(stub_area(area_id));

    // Hellos sent into a stub area don't carry the E-bit.
    assert!(!peer_options(&net, node).contains(Options::E));

    let since = net.now();
    peer_exchange(&mut net, node, area_id);

    // The router answers as slave, echoing the master's sequence number.
    let dbdesc = net
        .scripted_rx
        .iter()
        .filter(|rx| rx.time >= since)
        .find_map(|rx| match &rx.packet {
            Packet::DbDesc(dbdesc) if dbdesc.dd_seq_no == PEER_DD_SEQ_NO => {
                Some(dbdesc.clone())
            }
            _ => None,
        })
        .unwrap();
    assert!(!dbdesc.dd_flags.contains(DbDescFlags::MS));

    // AS-external LSAs can't be described in a stub area.
    let mut ext_hdr = LsaHdr::new(
        1,
        Options::E,
        LsaType::from(LsaTypeCode::AsExternal),
        ip4!("172.16.0.0"),
        PEER_RID,
        0x80000001,
    );
    ext_hdr.cksum = 0x1234;
    ext_hdr.length = 36;
    let packet = peer_dbdesc(
        area_id,
        Options::empty(),
        DbDescFlags::MS,
        PEER_DD_SEQ_NO + 1,
        vec![ext_hdr],
    );
    net.inject(node, 1, PEER_ADDR, &packet);
    net.run_for(Duration::from_millis(100));

    // The database exchange starts over and nothing external is learned.
    assert_eq!(nbr_state(&net, node, PEER_RID), nsm::State::ExStart);
    assert!(no_externals(&net, node));
}

#[test]
fn stub_area_rejects_external_lsa_updates() {
    harness::init_tracing();
    let area_id = ip4!("0.0.0.1");
    let (mut net, node) = scripted_peer(stub_area(area_id));
    peer_exchange(&mut net, node, area_id);

    // An AS-external LSA flooded while the databases are being synchronized
    // restarts the exchange.
    let lsa = external_lsa(ip4!("172.16.0.0"), PEER_RID, net.now());
    net.inject(node, 1, PEER_ADDR, &peer_lsupd(area_id, vec![lsa]));
    net.run_for(Duration::from_millis(100));
    assert_eq!(nbr_state(&net, node, PEER_RID), nsm::State::ExStart);
    assert!(no_externals(&net, node));
}

#[test]
fn stub_area_ignores_external_lsa_updates_when_full() {
    harness::init_tracing();
    let area_id = ip4!("0.0.0.1");
    let (mut net, node) = scripted_peer(stub_area(area_id));
    peer_full(&mut net, node, area_id);

    // Once synchronized, the LSA is just dropped.
    let lsa = external_lsa(ip4!("172.16.0.0"), PEER_RID, net.now());
    net.inject(node, 1, PEER_ADDR, &peer_lsupd(area_id, vec![lsa]));
    net.run_for(Duration::from_millis(100));
    assert_eq!(nbr_state(&net, node, PEER_RID), nsm::State::Full);
    assert!(no_externals(&net, node));
}

#[test]
fn inter_area_summaries_and_ranges() {
    harness::init_tracing();
    let (mut net, [r1, r2, r3]) = two_areas();
    net.start_all();
    net.run_until(SimTime::from_secs(90));

    assert_eq!(nbr_state(&net, r1, ip4!("2.2.2.2")), nsm::State::Full);
    assert_eq!(nbr_state(&net, r3, ip4!("2.2.2.2")), nsm::State::Full);

    // The ABR summarizes R3's networks into the backbone as the configured
    // range, and advertises the uncovered transit subnet on its own.
    let ids = summary_lsa_ids(&net, r1, ip4!("2.2.2.2"));
    assert!(ids.contains(&ip4!("172.16.0.0")));
    assert!(ids.contains(&ip4!("10.0.23.0")));
    assert!(!ids.contains(&ip4!("172.16.1.0")));
    assert!(!ids.contains(&ip4!("172.16.2.0")));

    // R1 installs the range with the cost of its most distant component.
    let routes = net.router(r1).routes.borrow();
    let route = routes.get(&net4!("172.16.0.0/16")).unwrap();
    assert_eq!(route.path_type, PathType::InterArea);
    assert_eq!(route.metric, 30);
    assert_eq!(route.nexthop, Some(ip4!("10.0.12.2")));
    let route = routes.get(&net4!("10.0.23.0/30")).unwrap();
    assert_eq!(route.path_type, PathType::InterArea);
    assert_eq!(route.metric, 20);
    assert!(!routes.contains_key(&net4!("172.16.1.0/24")));
    drop(routes);

    // Inside the stub area, R3 reaches the backbone through the default
    // summary and the regular backbone summaries.
    let routes = net.router(r3).routes.borrow();
    let route = routes.get(&net4!("0.0.0.0/0")).unwrap();
    assert_eq!(route.path_type, PathType::InterArea);
    assert_eq!(route.metric, 11);
    assert_eq!(route.nexthop, Some(ip4!("10.0.23.1")));
    let route = routes.get(&net4!("10.0.12.0/30")).unwrap();
    assert_eq!(route.path_type, PathType::InterArea);
    assert_eq!(route.metric, 20);
}

#[test]
fn maxage_withdrawal_between_routers() {
    harness::init_tracing();
    let (mut net, [r1, r2, _]) = two_areas();
    net.start_all();
    net.run_until(SimTime::from_secs(90));
    assert!(
        net.router(r1)
            .routes
            .borrow()
            .contains_key(&net4!("172.16.0.0/16"))
    );

    // Without its area 0.0.0.1 interface, R2 is no longer an ABR and
    // withdraws its summaries from the backbone.
    let since = net.now();
    net.router_mut(r2).instance.interface_down(2);
    net.run_for(Duration::from_secs(30));

    let range_key = LsaKey::new(
        LsaTypeCode::SummaryNetwork.into(),
        ip4!("2.2.2.2"),
        ip4!("172.16.0.0"),
    );
    let flushed = net.sent_by(r2, since).any(|sent| match &sent.packet {
        Packet::LsUpdate(ls_upd) => ls_upd
            .lsas
            .iter()
            .any(|lsa| lsa.hdr.key() == range_key && lsa.hdr.is_maxage()),
        _ => false,
    });
    assert!(flushed);
    let acked = net.sent_by(r1, since).any(|sent| match &sent.packet {
        Packet::LsAck(ls_ack) => ls_ack
            .lsa_hdrs
            .iter()
            .any(|hdr| hdr.key() == range_key && hdr.is_maxage()),
        _ => false,
    });
    assert!(acked);

    // The route is gone and, once acknowledged, the MaxAge copies are
    // removed from both databases.
    assert!(
        !net.router(r1)
            .routes
            .borrow()
            .contains_key(&net4!("172.16.0.0/16"))
    );
    assert!(summary_lsa_ids(&net, r1, ip4!("2.2.2.2")).is_empty());
    assert!(summary_lsa_ids(&net, r2, ip4!("2.2.2.2")).is_empty());
}

#[test]
fn unacknowledged_lsa_is_retransmitted_until_implied_ack() {
    harness::init_tracing();
    let (mut net, node) = scripted_peer(backbone());
    peer_full(&mut net, node, BACKBONE);

    // The new Router-LSA, now listing the peer, is flooded. The scripted
    // peer never acknowledges it.
    let since = net.now();
    peer_keepalive(&mut net, node, BACKBONE, Duration::from_secs(20));
    let lsa = own_lsa(&net, node, BACKBONE, LsaTypeCode::Router);
    let lsa_key = lsa.hdr.key();
    let seq_no = lsa.hdr.seq_no;
    let sent = net
        .sent_by(node, since)
        .filter(|sent| carries_lsa(sent, &lsa_key, seq_no))
        .map(|sent| sent.time)
        .collect::<Vec<_>>();
    assert!(sent.len() >= 2);
    let rxmt_delay = sent[1].saturating_duration_since(sent[0]);
    assert!(rxmt_delay >= Duration::from_secs(5));
    let stats = net.router(node).instance.statistics();
    assert!(stats.instance.lsa_retransmitted > 0);

    // The peer floods the same instance back, which acknowledges it.
    let packet = peer_lsupd(BACKBONE, vec![(*lsa).clone()]);
    net.inject(node, 1, PEER_ADDR, &packet);
    net.run_for(Duration::from_secs(1));
    let since = net.now();
    peer_keepalive(&mut net, node, BACKBONE, Duration::from_secs(15));
    assert!(
        !net.sent_by(node, since)
            .any(|sent| carries_lsa(sent, &lsa_key, seq_no))
    );
    assert_eq!(nbr_state(&net, node, PEER_RID), nsm::State::Full);
}

#[test]
fn newer_self_originated_lsa_is_reoriginated() {
    harness::init_tracing();
    let (mut net, node) = scripted_peer(backbone());
    peer_full(&mut net, node, BACKBONE);
    peer_keepalive(&mut net, node, BACKBONE, Duration::from_secs(10));

    // The peer floods an instance of our Router-LSA left over from an
    // earlier incarnation, with a higher sequence number.
    let lsa = own_lsa(&net, node, BACKBONE, LsaTypeCode::Router);
    let stale_seq_no = lsa.hdr.seq_no + 5;
    let stale = Lsa::new(
        0,
        lsa.hdr.options,
        lsa.hdr.lsa_id,
        lsa.hdr.adv_rtr,
        stale_seq_no,
        lsa.body.clone(),
        net.now(),
    );
    let since = net.now();
    net.inject(node, 1, PEER_ADDR, &peer_lsupd(BACKBONE, vec![stale]));
    peer_keepalive(&mut net, node, BACKBONE, Duration::from_secs(10));

    // A fresh instance supersedes it, numbered right after the received one.
    let lsa = own_lsa(&net, node, BACKBONE, LsaTypeCode::Router);
    assert_eq!(lsa.hdr.seq_no, stale_seq_no + 1);
    assert!(!lsa.hdr.is_maxage());
    let lsa_key = lsa.hdr.key();
    assert!(
        net.sent_by(node, since)
            .any(|sent| carries_lsa(sent, &lsa_key, stale_seq_no + 1))
    );
}

#[test]
fn master_dbdesc_repeated_after_dead_interval() {
    harness::init_tracing();
    let (mut net, node) = scripted_peer(backbone());
    peer_full(&mut net, node, BACKBONE);
    let options = peer_options(&net, node);
    let last_dbdesc = peer_dbdesc(
        BACKBONE,
        options,
        DbDescFlags::MS,
        PEER_DD_SEQ_NO + 1,
        vec![],
    );

    // Shortly after the exchange, the slave answers a repeated packet with
    // its own last one.
    let since = net.now();
    net.inject(node, 1, PEER_ADDR, &last_dbdesc);
    net.run_for(Duration::from_millis(100));
    assert_eq!(nbr_state(&net, node, PEER_RID), nsm::State::Full);
    assert!(net.sent_by(node, since).any(|sent| {
        matches!(
            &sent.packet,
            Packet::DbDesc(dbdesc) if dbdesc.dd_seq_no == PEER_DD_SEQ_NO + 1
        )
    }));

    // After a RouterDeadInterval the packet is no longer remembered, and the
    // same repetition restarts the exchange.
    peer_keepalive(&mut net, node, BACKBONE, Duration::from_secs(45));
    assert_eq!(nbr_state(&net, node, PEER_RID), nsm::State::Full);
    net.inject(node, 1, PEER_ADDR, &last_dbdesc);
    net.run_for(Duration::from_millis(100));
    assert_eq!(nbr_state(&net, node, PEER_RID), nsm::State::ExStart);
}
