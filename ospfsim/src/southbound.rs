//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use ospfsim_utils::sim::{Clock, PacketTransport, TimerFacility};
use serde::{Deserialize, Serialize};

use crate::route::PathType;
use crate::tasks::messages::TimerMsg;

// Forwarding table entry handed to the simulator.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct RouteMsg {
    pub prefix: Ipv4Network,
    pub path_type: PathType,
    pub metric: u32,
    // Absent for directly attached destinations.
    pub nexthop: Option<Ipv4Addr>,
    pub ifindex: u32,
}

// Forwarding table of the simulated router.
pub trait RouteSink {
    fn route_install(&mut self, msg: RouteMsg);

    fn route_uninstall(&mut self, prefix: Ipv4Network);
}

// Everything an instance needs from the simulator hosting it.
pub trait Environment:
    Clock + TimerFacility<TimerMsg> + PacketTransport + RouteSink
{
}

impl<T> Environment for T where
    T: Clock + TimerFacility<TimerMsg> + PacketTransport + RouteSink
{
}
