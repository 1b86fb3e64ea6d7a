//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::time::Duration;

use ospfsim_utils::sim::SimTime;
use ospfsim_utils::task::{IntervalTask, TimeoutTask};

use crate::area::Area;
use crate::collections::{LsaEntryId, LsdbId};
use crate::config::InstanceCfg;
use crate::instance::InstanceChannelsTx;
use crate::interface::Interface;
use crate::lsdb;
use crate::neighbor::{Neighbor, RxmtPacketType};
use crate::packet::lsa::{Lsa, LsaKey};

//
// OSPF timers diagram:
//
//                                    +--------------+
//                   packets (Nx) --> |              | --> (Nx) packets
//                                    |              |
//             hello_interval (Nx) -> |              |
//             ism_wait_timer (Nx) -> |              |
//       nsm_inactivity_timer (Nx) -> |              |
//       packet_rxmt_interval (Nx) -> |              |
//          dbdesc_free_timer (Nx) -> |              |
//            ls_update_timer (Nx) -> |   instance   |
//          delayed_ack_timer (Nx) -> |              |
//                                    |              |
//           lsa_expiry_timer (Nx) -> |              |
//          lsa_refresh_timer (Nx) -> |              |
//     lsa_orig_delayed_timer (Nx) -> |              |
// lsdb_maxage_sweep_interval (Nx) -> |              |
//                                    |              |
//            spf_delay_timer (1x) -> |              | --> (Nx) routes
//          start_delay_timer (1x) -> |              |
//                                    +--------------+
//
// Every timer is scheduled through the simulator's timer facility. The
// firing carries the generation tag that was current when the timer was
// armed, and firings whose tag no longer matches the owning object's handle
// are discarded.
//

// Broadcast jitter applied to hello and flooding transmissions.
pub const BROADCAST_JITTER: Duration = Duration::from_millis(40);
// Delay used to bundle flooded LSAs into a single LS Update.
pub const LS_UPDATE_DELAY: Duration = Duration::from_millis(100);
// RFC 2328 - Section 13.5:
// "The fixed interval between a router's delayed transmissions must be short
// (less than RxmtInterval) or needless retransmissions will ensue".
pub const DELAYED_ACK_DELAY: Duration = Duration::from_secs(1);
// Interval between attempts to remove MaxAge LSAs from an LSDB.
pub const LSDB_MAXAGE_SWEEP_INTERVAL: Duration = Duration::from_secs(2);

// OSPF inter-component message types.
pub mod messages {
    use std::net::Ipv4Addr;
    use std::time::Duration;

    use ipnetwork::Ipv4Network;
    use ospfsim_utils::task::TimerTag;
    use serde::{Deserialize, Serialize};
    use smallvec::SmallVec;

    use crate::collections::{
        AreaId, InterfaceId, LsaEntryId, LsdbId, NeighborId,
    };
    use crate::debug::LsaFlushReason;
    use crate::interface::ism;
    use crate::lsdb::LsaOriginateEvent;
    use crate::neighbor::{RxmtPacketType, nsm};
    use crate::packet::lsa::{LsaBody, LsaKey};
    use crate::packet::{Options, Packet};
    use crate::southbound::RouteMsg;

    // Type aliases.
    pub type ProtocolInputMsg = input::ProtocolMsg;
    pub type ProtocolOutputMsg = output::ProtocolMsg;

    // Timer firing, delivered back to the instance by the simulator.
    #[derive(Clone, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub struct TimerMsg {
        pub tag: TimerTag,
        pub kind: TimerKind,
    }

    #[derive(Clone, Debug, Eq, PartialEq)]
    #[derive(Deserialize, Serialize)]
    pub enum TimerKind {
        HelloInterval {
            area_id: AreaId,
            iface_id: InterfaceId,
        },
        WaitTimer {
            area_id: AreaId,
            iface_id: InterfaceId,
        },
        InactivityTimer {
            area_id: AreaId,
            iface_id: InterfaceId,
            nbr_id: NeighborId,
        },
        RxmtInterval {
            area_id: AreaId,
            iface_id: InterfaceId,
            nbr_id: NeighborId,
            packet_type: RxmtPacketType,
        },
        DbDescFree {
            area_id: AreaId,
            iface_id: InterfaceId,
            nbr_id: NeighborId,
        },
        SendLsUpdate {
            area_id: AreaId,
            iface_id: InterfaceId,
        },
        DelayedAck {
            area_id: AreaId,
            iface_id: InterfaceId,
        },
        LsaOrigDelayed {
            lsdb_id: LsdbId,
            lsa_key: LsaKey,
        },
        LsaRefresh {
            lsdb_id: LsdbId,
            lse_id: LsaEntryId,
        },
        LsaExpiry {
            lsdb_id: LsdbId,
            lse_id: LsaEntryId,
        },
        LsdbMaxAgeSweep {
            lsdb_id: LsdbId,
        },
        SpfDelay,
        StartDelay,
    }

    // Input messages (engine -> engine, processed after the current event).
    pub mod input {
        use super::*;

        #[derive(Debug, Deserialize, Serialize)]
        pub enum ProtocolMsg {
            IsmEvent(IsmEventMsg),
            NsmEvent(NsmEventMsg),
            SendLsUpdate(SendLsUpdateMsg),
            LsaOrigEvent(LsaOrigEventMsg),
            LsaOrigCheck(LsaOrigCheckMsg),
            LsaFlush(LsaFlushMsg),
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct IsmEventMsg {
            pub area_id: AreaId,
            pub iface_id: InterfaceId,
            pub event: ism::Event,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct NsmEventMsg {
            pub area_id: AreaId,
            pub iface_id: InterfaceId,
            pub nbr_id: NeighborId,
            pub event: nsm::Event,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct SendLsUpdateMsg {
            pub area_id: AreaId,
            pub iface_id: InterfaceId,
            pub nbr_id: Option<NeighborId>,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct LsaOrigEventMsg {
            pub event: LsaOriginateEvent,
        }

        #[derive(Debug, Deserialize, Serialize)]
        pub struct LsaOrigCheckMsg {
            pub lsdb_id: LsdbId,
            pub options: Option<Options>,
            pub lsa_id: Ipv4Addr,
            pub lsa_body: LsaBody,
        }

        #[derive(Clone, Debug, Deserialize, Serialize)]
        pub struct LsaFlushMsg {
            pub lsdb_id: LsdbId,
            pub lse_id: LsaEntryId,
            pub reason: LsaFlushReason,
        }
    }

    // Output messages (engine -> simulator).
    pub mod output {
        use super::*;

        #[derive(Debug, Serialize)]
        pub enum ProtocolMsg {
            NetTxPacket(NetTxPacketMsg),
            TimerSchedule(TimerScheduleMsg),
            RouteInstall(RouteMsg),
            RouteUninstall(Ipv4Network),
        }

        #[derive(Clone, Debug, Serialize)]
        pub struct NetTxPacketMsg {
            pub packet: Packet,
            pub ifname: String,
            pub ifindex: u32,
            pub src: Ipv4Addr,
            pub dst: SmallVec<[Ipv4Addr; 4]>,
            pub delay: Duration,
        }

        #[derive(Clone, Debug, Serialize)]
        pub struct TimerScheduleMsg {
            pub delay: Duration,
            pub msg: TimerMsg,
        }
    }
}

use messages::TimerKind;

// ===== OSPF timers =====

// Send periodic OSPF Hello messages.
pub(crate) fn hello_interval(
    iface: &Interface,
    area: &Area,
    tx: &InstanceChannelsTx,
) -> IntervalTask {
    let interval = Duration::from_secs(iface.config.hello_interval.into());
    let kind = TimerKind::HelloInterval {
        area_id: area.id,
        iface_id: iface.id,
    };
    tx.interval(kind, interval)
}

// Interface wait timer task.
pub(crate) fn ism_wait_timer(
    iface: &Interface,
    area: &Area,
    tx: &InstanceChannelsTx,
) -> TimeoutTask {
    let timeout = Duration::from_secs(iface.config.dead_interval.into());
    let kind = TimerKind::WaitTimer {
        area_id: area.id,
        iface_id: iface.id,
    };
    tx.timeout(kind, timeout)
}

// Neighbor inactivity timer.
pub(crate) fn nsm_inactivity_timer(
    nbr: &Neighbor,
    iface: &Interface,
    area: &Area,
    tx: &InstanceChannelsTx,
) -> TimeoutTask {
    let timeout = Duration::from_secs(iface.config.dead_interval.into());
    let kind = TimerKind::InactivityTimer {
        area_id: area.id,
        iface_id: iface.id,
        nbr_id: nbr.id,
    };
    tx.timeout(kind, timeout)
}

// Send periodic packet retransmissions.
pub(crate) fn packet_rxmt_interval(
    nbr: &Neighbor,
    iface: &Interface,
    area: &Area,
    packet_type: RxmtPacketType,
    tx: &InstanceChannelsTx,
) -> IntervalTask {
    let interval =
        Duration::from_secs(iface.config.retransmit_interval.into());
    let kind = TimerKind::RxmtInterval {
        area_id: area.id,
        iface_id: iface.id,
        nbr_id: nbr.id,
        packet_type,
    };
    tx.interval(kind, interval)
}

// Timer to free the neighbor's last sent/received Database Description packets.
pub(crate) fn dbdesc_free_timer(
    nbr: &Neighbor,
    iface: &Interface,
    area: &Area,
    tx: &InstanceChannelsTx,
) -> TimeoutTask {
    let timeout = Duration::from_secs(iface.config.dead_interval.into());
    let kind = TimerKind::DbDescFree {
        area_id: area.id,
        iface_id: iface.id,
        nbr_id: nbr.id,
    };
    tx.timeout(kind, timeout)
}

// Interface LS Update timer task.
pub(crate) fn ls_update_timer(
    iface: &Interface,
    area: &Area,
    tx: &InstanceChannelsTx,
) -> TimeoutTask {
    let kind = TimerKind::SendLsUpdate {
        area_id: area.id,
        iface_id: iface.id,
    };
    tx.timeout(kind, LS_UPDATE_DELAY)
}

// Interface delayed Ack timer task.
pub(crate) fn delayed_ack_timer(
    iface: &Interface,
    area: &Area,
    tx: &InstanceChannelsTx,
) -> TimeoutTask {
    let timeout = DELAYED_ACK_DELAY - tx.jitter(BROADCAST_JITTER);
    let kind = TimerKind::DelayedAck {
        area_id: area.id,
        iface_id: iface.id,
    };
    tx.timeout(kind, timeout)
}

// LSA expiry timer task.
pub(crate) fn lsa_expiry_timer(
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
    lsa: &Lsa,
    tx: &InstanceChannelsTx,
) -> TimeoutTask {
    let age = lsa.age(tx.now());
    let timeout = lsdb::LSA_MAX_AGE.saturating_sub(age);
    let timeout = Duration::from_secs(timeout.into());
    let kind = TimerKind::LsaExpiry { lsdb_id, lse_id };
    tx.timeout(kind, timeout)
}

// LSA refresh timer task.
pub(crate) fn lsa_refresh_timer(
    lsdb_id: LsdbId,
    lse_id: LsaEntryId,
    tx: &InstanceChannelsTx,
) -> TimeoutTask {
    let timeout = Duration::from_secs(lsdb::LSA_REFRESH_TIME.into());
    let kind = TimerKind::LsaRefresh { lsdb_id, lse_id };
    tx.timeout(kind, timeout)
}

// LSA delayed origination timer task.
pub(crate) fn lsa_orig_delayed_timer(
    lsdb_id: LsdbId,
    lsa_key: LsaKey,
    lsa_base_time: Option<SimTime>,
    tx: &InstanceChannelsTx,
) -> TimeoutTask {
    let lsa_age = lsa_base_time
        .map(|base_time| tx.now().saturating_duration_since(base_time))
        .unwrap_or_default();
    let timeout = lsdb::LSA_MIN_INTERVAL.saturating_sub(lsa_age);
    let kind = TimerKind::LsaOrigDelayed { lsdb_id, lsa_key };
    tx.timeout(kind, timeout)
}

// LSDB MaxAge sweeper interval task.
pub(crate) fn lsdb_maxage_sweep_interval(
    lsdb_id: LsdbId,
    tx: &InstanceChannelsTx,
) -> IntervalTask {
    let kind = TimerKind::LsdbMaxAgeSweep { lsdb_id };
    tx.interval(kind, LSDB_MAXAGE_SWEEP_INTERVAL)
}

// SPF delay timer task.
pub(crate) fn spf_delay_timer(
    config: &InstanceCfg,
    tx: &InstanceChannelsTx,
) -> TimeoutTask {
    let timeout = Duration::from_millis(config.spf_delay.into())
        + tx.jitter(BROADCAST_JITTER);
    tx.timeout(TimerKind::SpfDelay, timeout)
}

// Instance start delay timer task.
pub(crate) fn start_delay_timer(
    timeout: Duration,
    tx: &InstanceChannelsTx,
) -> TimeoutTask {
    tx.timeout(TimerKind::StartDelay, timeout)
}
