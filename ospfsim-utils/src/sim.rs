//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::time::Duration;

use bytes::Bytes;
use derive_new::new;
use serde::{Deserialize, Serialize};

/// Point in simulated time, measured from the start of the simulation.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct SimTime(Duration);

/// Source of simulated time.
pub trait Clock {
    /// Returns the current simulated time.
    fn now(&self) -> SimTime;
}

/// Timer facility provided by the simulator.
///
/// Timers can't be cancelled. The payload is expected to carry the
/// generation tag that the owner compares against its current one when the
/// timer fires.
pub trait TimerFacility<T> {
    /// Schedules the delivery of `payload` after `delay`.
    fn schedule_after(&mut self, delay: Duration, payload: T);
}

/// Packet transport provided by the simulator.
pub trait PacketTransport {
    /// Sends a packet.
    fn send(&mut self, request: TxRequest);
}

/// Packet transmission request.
#[derive(Clone, Debug, Eq, PartialEq, new)]
pub struct TxRequest {
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub ifindex: u32,
    pub priority: u8,
    pub protocol: u8,
    pub ttl: u8,
    pub next_hop: Option<Ipv4Addr>,
    pub payload: Bytes,
    pub delay: Duration,
}

// ===== impl SimTime =====

impl SimTime {
    pub const ZERO: SimTime = SimTime(Duration::ZERO);

    pub const fn from_duration(elapsed: Duration) -> SimTime {
        SimTime(elapsed)
    }

    pub const fn from_secs(secs: u64) -> SimTime {
        SimTime(Duration::from_secs(secs))
    }

    pub const fn from_millis(millis: u64) -> SimTime {
        SimTime(Duration::from_millis(millis))
    }

    /// Returns the time elapsed since the start of the simulation.
    pub const fn as_duration(&self) -> Duration {
        self.0
    }

    /// Returns the amount of time elapsed from `earlier` to `self`, or zero if
    /// `earlier` is later than `self`.
    pub fn saturating_duration_since(&self, earlier: SimTime) -> Duration {
        self.0.saturating_sub(earlier.0)
    }
}

impl std::ops::Add<Duration> for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Duration) -> SimTime {
        SimTime(self.0 + rhs)
    }
}

impl std::ops::AddAssign<Duration> for SimTime {
    fn add_assign(&mut self, rhs: Duration) {
        self.0 += rhs;
    }
}

impl std::ops::Sub for SimTime {
    type Output = Duration;

    fn sub(self, rhs: SimTime) -> Duration {
        self.saturating_duration_since(rhs)
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.3}s", self.0.as_secs_f64())
    }
}
