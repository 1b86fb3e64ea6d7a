//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;
use std::time::Duration;

use ipnetwork::Ipv4Network;
use serde::{Deserialize, Serialize};
use tracing::{debug, debug_span};

use crate::interface::{Interface, ism};
use crate::neighbor::{NeighborNetId, nsm};
use crate::packet::Packet;
use crate::packet::error::LsaValidationError;
use crate::packet::lsa::LsaHdr;
use crate::route::PathType;

// Protocol events worth tracing. All of them are logged at the DEBUG level
// under the instance span.
#[derive(Debug)]
pub enum Debug<'a> {
    // Instances
    InstanceCreate,
    InstanceStart,
    InstanceStartDelay(Duration),
    InstanceStop,
    // Interfaces
    InterfaceStart(&'a str),
    InterfaceStop(&'a str, InterfaceInactiveReason),
    IsmEvent(&'a ism::State, &'a ism::Event),
    IsmTransition(&'a ism::State, &'a ism::State),
    IsmDrElection(
        Option<NeighborNetId>,
        Option<NeighborNetId>,
        Option<NeighborNetId>,
        Option<NeighborNetId>,
    ),
    // Neighbors
    NeighborCreate(Ipv4Addr),
    NeighborDelete(Ipv4Addr),
    NeighborHelloSuppressed(Ipv4Addr),
    NsmEvent(Ipv4Addr, &'a nsm::State, &'a nsm::Event),
    NsmTransition(Ipv4Addr, &'a nsm::State, &'a nsm::State),
    // Network
    PacketRx(&'a Interface, &'a Ipv4Addr, &'a Packet),
    PacketTx(u32, &'a Ipv4Addr, &'a Packet),
    PacketRxIgnore(Ipv4Addr, &'a nsm::State),
    // Flooding
    QuestionableAck(Ipv4Addr, &'a LsaHdr),
    LsaDiscard(Ipv4Addr, &'a LsaHdr, &'a LsaValidationError),
    LsaMinArrivalDiscard(Ipv4Addr, &'a LsaHdr),
    LsaSelfOriginated(Ipv4Addr, &'a LsaHdr),
    // LSDB maintenance
    LsaInstall(&'a LsaHdr),
    LsaOriginate(&'a LsaHdr),
    LsaOriginateMinInterval(&'a LsaHdr),
    LsaFlush(&'a LsaHdr, LsaFlushReason),
    LsaRefresh(&'a LsaHdr),
    LsaSeqNoWrapping(&'a LsaHdr),
    // SPF
    SpfScheduled(Duration),
    SpfRun(usize),
    SpfNetworkUnreachableAbr(&'a Ipv4Network, Ipv4Addr),
    SpfRouterUnreachableAbr(&'a Ipv4Addr, Ipv4Addr),
    SpfUnreachableAsbr(&'a Ipv4Network, Ipv4Addr),
    NssaTranslatorChange(Ipv4Addr, bool),
    // Routing table
    RouteInstall(&'a Ipv4Network, PathType, u32),
    RouteUninstall(&'a Ipv4Network),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum InterfaceInactiveReason {
    InstanceDown,
    OperationalDown,
    LoopedBack,
}

// Cause of a SeqNoMismatch neighbor event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum SeqNoMismatchReason {
    InconsistentFlags,
    InconsistentOptions,
    InconsistentSeqNo,
    UnexpectedDbDesc,
    InvalidLsaType,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub enum LsaFlushReason {
    Expiry,
    PrematureAging,
}

// ===== impl Debug =====

impl Debug<'_> {
    pub(crate) fn log(&self) {
        let msg = self.message();
        match self {
            Debug::InstanceCreate
            | Debug::InstanceStart
            | Debug::InstanceStop => debug!("{msg}"),
            Debug::InstanceStartDelay(delay) | Debug::SpfScheduled(delay) => {
                debug!(?delay, "{msg}")
            }
            Debug::InterfaceStart(name) => {
                debug_span!("interface", %name).in_scope(|| debug!("{msg}"))
            }
            Debug::InterfaceStop(name, reason) => {
                debug_span!("interface", %name)
                    .in_scope(|| debug!(%reason, "{msg}"))
            }
            Debug::IsmEvent(state, event) => {
                fsm_span(None, || debug!(?state, ?event, "{msg}"))
            }
            Debug::IsmTransition(old_state, new_state) => {
                fsm_span(None, || debug!(?old_state, ?new_state, "{msg}"))
            }
            Debug::IsmDrElection(old_dr, new_dr, old_bdr, new_bdr) => {
                fsm_span(None, || {
                    debug!(?old_dr, ?new_dr, ?old_bdr, ?new_bdr, "{msg}")
                })
            }
            Debug::NeighborCreate(router_id)
            | Debug::NeighborDelete(router_id)
            | Debug::NeighborHelloSuppressed(router_id) => {
                nbr_span(*router_id, || debug!("{msg}"))
            }
            Debug::NsmEvent(router_id, state, event) => {
                fsm_span(Some(*router_id), || {
                    debug!(?state, ?event, "{msg}")
                })
            }
            Debug::NsmTransition(router_id, old_state, new_state) => {
                fsm_span(Some(*router_id), || {
                    debug!(?old_state, ?new_state, "{msg}")
                })
            }
            Debug::PacketRx(iface, src, packet) => {
                debug_span!("network", direction = "input").in_scope(|| {
                    let data = packet_json(packet);
                    debug!(interface = %iface.name, %src, %data, "{msg}");
                })
            }
            Debug::PacketTx(ifindex, addr, packet) => {
                debug_span!("network", direction = "output").in_scope(|| {
                    let data = packet_json(packet);
                    debug!(%ifindex, %addr, %data, "{msg}");
                })
            }
            Debug::PacketRxIgnore(router_id, state) => {
                nbr_span(*router_id, || debug!(?state, "{msg}"))
            }
            Debug::QuestionableAck(router_id, lsa_hdr)
            | Debug::LsaMinArrivalDiscard(router_id, lsa_hdr)
            | Debug::LsaSelfOriginated(router_id, lsa_hdr) => {
                nbr_span(*router_id, || debug!(?lsa_hdr, "{msg}"))
            }
            Debug::LsaDiscard(router_id, lsa_hdr, error) => {
                nbr_span(*router_id, || debug!(%error, ?lsa_hdr, "{msg}"))
            }
            Debug::LsaInstall(lsa_hdr)
            | Debug::LsaOriginate(lsa_hdr)
            | Debug::LsaOriginateMinInterval(lsa_hdr)
            | Debug::LsaRefresh(lsa_hdr)
            | Debug::LsaSeqNoWrapping(lsa_hdr) => debug!(?lsa_hdr, "{msg}"),
            Debug::LsaFlush(lsa_hdr, reason) => {
                debug!(?lsa_hdr, %reason, "{msg}")
            }
            Debug::SpfRun(areas) => debug!(%areas, "{msg}"),
            Debug::SpfNetworkUnreachableAbr(destination, abr) => {
                debug!(%destination, %abr, "{msg}")
            }
            Debug::SpfRouterUnreachableAbr(router_id, abr) => {
                debug!(%router_id, %abr, "{msg}")
            }
            Debug::SpfUnreachableAsbr(destination, asbr) => {
                debug!(%destination, %asbr, "{msg}")
            }
            Debug::NssaTranslatorChange(area_id, translator) => {
                debug_span!("area", %area_id)
                    .in_scope(|| debug!(%translator, "{msg}"))
            }
            Debug::RouteInstall(destination, path_type, metric) => {
                debug!(%destination, ?path_type, %metric, "{msg}")
            }
            Debug::RouteUninstall(destination) => {
                debug!(%destination, "{msg}")
            }
        }
    }

    fn message(&self) -> &'static str {
        match self {
            Debug::InstanceCreate => "instance created",
            Debug::InstanceStart => "starting instance",
            Debug::InstanceStartDelay(..) => "delaying instance start",
            Debug::InstanceStop => "stopping instance",
            Debug::InterfaceStart(..) => "starting interface",
            Debug::InterfaceStop(..) => "stopping interface",
            Debug::IsmEvent(..) | Debug::NsmEvent(..) => "event",
            Debug::IsmTransition(..) | Debug::NsmTransition(..) => {
                "state transition"
            }
            Debug::IsmDrElection(..) => "DR election",
            Debug::NeighborCreate(..) => "neighbor created",
            Debug::NeighborDelete(..) => "neighbor deleted",
            Debug::NeighborHelloSuppressed(..) => {
                "suppressing hellos on demand circuit"
            }
            Debug::PacketRx(..) | Debug::PacketTx(..) => "packet",
            Debug::PacketRxIgnore(..) => {
                "ignoring packet from a non-adjacent neighbor"
            }
            Debug::QuestionableAck(..) => "questionable LS Ack",
            Debug::LsaDiscard(..) => "discarding LSA",
            Debug::LsaMinArrivalDiscard(..) => {
                "discarding LSA received within MinLSArrival"
            }
            Debug::LsaSelfOriginated(..) => "received self-originated LSA",
            Debug::LsaInstall(..) => "installing LSA",
            Debug::LsaOriginate(..) => "originating LSA",
            Debug::LsaOriginateMinInterval(..) => {
                "LSA origination postponed by MinLSInterval"
            }
            Debug::LsaFlush(..) => "flushing LSA",
            Debug::LsaRefresh(..) => "refreshing LSA",
            Debug::LsaSeqNoWrapping(..) => "LSA sequence number wrapping",
            Debug::SpfScheduled(..) => "SPF scheduled",
            Debug::SpfRun(..) => "running SPF",
            Debug::SpfNetworkUnreachableAbr(..)
            | Debug::SpfRouterUnreachableAbr(..) => {
                "originating ABR unreachable"
            }
            Debug::SpfUnreachableAsbr(..) => "originating ASBR unreachable",
            Debug::NssaTranslatorChange(..) => "NSSA translator role changed",
            Debug::RouteInstall(..) => "installing route",
            Debug::RouteUninstall(..) => "uninstalling route",
        }
    }
}

impl std::fmt::Display for Debug<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

// ===== impl InterfaceInactiveReason =====

impl std::fmt::Display for InterfaceInactiveReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            InterfaceInactiveReason::InstanceDown => "instance down",
            InterfaceInactiveReason::OperationalDown => "link down",
            InterfaceInactiveReason::LoopedBack => "looped back",
        })
    }
}

// ===== impl SeqNoMismatchReason =====

impl std::fmt::Display for SeqNoMismatchReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            SeqNoMismatchReason::InconsistentFlags => "inconsistent flags",
            SeqNoMismatchReason::InconsistentOptions => "inconsistent options",
            SeqNoMismatchReason::InconsistentSeqNo => {
                "inconsistent DD sequence number"
            }
            SeqNoMismatchReason::UnexpectedDbDesc => "unexpected DD packet",
            SeqNoMismatchReason::InvalidLsaType => "invalid LSA type",
        })
    }
}

// ===== impl LsaFlushReason =====

impl std::fmt::Display for LsaFlushReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LsaFlushReason::Expiry => "MaxAge reached",
            LsaFlushReason::PrematureAging => "premature aging",
        })
    }
}

// ===== helper functions =====

// Runs `f` under an "fsm" span, nested in a "neighbor" span for NSM events.
fn fsm_span(router_id: Option<Ipv4Addr>, f: impl FnOnce()) {
    match router_id {
        Some(router_id) => {
            nbr_span(router_id, || debug_span!("fsm").in_scope(f))
        }
        None => debug_span!("fsm").in_scope(f),
    }
}

fn nbr_span(router_id: Ipv4Addr, f: impl FnOnce()) {
    debug_span!("neighbor", %router_id).in_scope(f)
}

fn packet_json(packet: &Packet) -> String {
    serde_json::to_string(packet).unwrap_or_default()
}
