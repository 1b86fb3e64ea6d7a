//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

#![allow(clippy::derivable_impls)]

use std::collections::{BTreeSet, HashSet};
use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;
use ospfsim_utils::ip;
use serde::{Deserialize, Serialize};

use crate::area::AreaType;
use crate::error::StartupError;
use crate::interface::InterfaceType;

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InstanceCfg {
    pub router_id: Ipv4Addr,
    // Seed of the random number generator used for timer jitter and initial
    // DD sequence numbers.
    pub seed: u64,
    pub areas: Vec<AreaCfg>,
    pub interfaces: Vec<InterfaceCfg>,
    pub host_routes: Vec<HostRouteCfg>,
    pub external_routes: Vec<ExternalRouteCfg>,
    pub default_information: DefaultInfoCfg,
    // SPF calculation delay in milliseconds.
    pub spf_delay: u32,
    // Fixed start delay in milliseconds.
    pub start_delay: Option<u32>,
    // Maximum random start delay in milliseconds.
    pub start_delay_jitter: Option<u32>,
    pub max_dd_retransmissions: Option<u32>,
    // Whether the router supports demand circuits (DC option).
    pub demand_circuit_capable: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct AreaCfg {
    pub area_id: Ipv4Addr,
    pub stub: bool,
    pub nssa: bool,
    // Whether inter-area summaries are injected into a stub or NSSA area.
    pub summary: bool,
    // Cost of the default summary injected into a stub or NSSA area.
    pub default_cost: u32,
    pub ranges: Vec<RangeCfg>,
    // Originate a Type-7 default into the NSSA (ABRs only).
    pub nssa_default: bool,
    // Don't redistribute external routes into the NSSA (ABRs only).
    pub no_redistribution: bool,
    pub nssa_ranges: Vec<NssaRangeCfg>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct RangeCfg {
    pub prefix: Ipv4Network,
    pub advertise: bool,
    pub cost: Option<u32>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct NssaRangeCfg {
    pub prefix: Ipv4Network,
    pub advertise: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct InterfaceCfg {
    pub name: String,
    pub ifindex: u32,
    pub area_id: Ipv4Addr,
    pub address: Ipv4Network,
    pub if_type: InterfaceType,
    pub loopback: bool,
    pub cost: u16,
    pub priority: u8,
    pub hello_interval: u16,
    pub dead_interval: u32,
    pub retransmit_interval: u16,
    pub transmit_delay: u16,
    pub mtu: u16,
    pub demand_circuit: bool,
    pub passive: bool,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostRouteCfg {
    pub address: Ipv4Addr,
    pub cost: u16,
    pub area_id: Ipv4Addr,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExternalRouteCfg {
    pub prefix: Ipv4Network,
    pub metric: u32,
    pub metric_type: ExternalMetricType,
    pub fwd_addr: Option<Ipv4Addr>,
    pub tag: u32,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default, deny_unknown_fields)]
pub struct DefaultInfoCfg {
    pub originate: bool,
    pub always: bool,
    pub metric: u32,
    pub metric_type: ExternalMetricType,
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExternalMetricType {
    Type1,
    #[default]
    Type2,
}

// ===== impl InstanceCfg =====

impl InstanceCfg {
    // Parses an instance configuration from its JSON representation.
    pub fn from_json(data: &str) -> Result<InstanceCfg, serde_json::Error> {
        serde_json::from_str(data)
    }

    // Validates the configuration before the instance is created.
    pub(crate) fn validate(&self) -> Result<(), StartupError> {
        if self.router_id.is_unspecified() {
            return Err(StartupError::InvalidRouterId);
        }
        if self.start_delay.is_some() && self.start_delay_jitter.is_some() {
            return Err(StartupError::ConflictingStartDelay);
        }

        for area in &self.areas {
            if area.stub && area.nssa {
                return Err(StartupError::StubAndNssa(area.area_id));
            }
            if area.area_id.is_unspecified()
                && area.area_type() != AreaType::Normal
            {
                return Err(StartupError::BackboneNotNormal);
            }
        }

        let mut ifindexes = HashSet::new();
        let mut ifnames = HashSet::new();
        let mut iface_areas = BTreeSet::new();
        for iface in &self.interfaces {
            if self.area(iface.area_id).is_none() {
                return Err(StartupError::InterfaceAreaNotConfigured(
                    iface.name.clone(),
                    iface.area_id,
                ));
            }
            if !ifindexes.insert(iface.ifindex) {
                return Err(StartupError::DuplicateIfindex(iface.ifindex));
            }
            if !ifnames.insert(iface.name.as_str()) {
                return Err(StartupError::DuplicateInterfaceName(
                    iface.name.clone(),
                ));
            }
            iface_areas.insert(iface.area_id);
        }
        if iface_areas.len() > 1
            && !iface_areas.contains(&Ipv4Addr::UNSPECIFIED)
        {
            return Err(StartupError::NoBackbone);
        }

        for host in &self.host_routes {
            if self.area(host.area_id).is_none() {
                return Err(StartupError::HostRouteAreaNotConfigured(
                    host.address,
                    host.area_id,
                ));
            }
        }

        Ok(())
    }

    // Returns the configuration of the given area.
    pub(crate) fn area(&self, area_id: Ipv4Addr) -> Option<&AreaCfg> {
        self.areas.iter().find(|area| area.area_id == area_id)
    }

    // Returns whether the router is configured as an AS boundary router.
    pub(crate) fn is_asbr(&self) -> bool {
        !self.external_routes.is_empty() || self.default_information.originate
    }
}

impl Default for InstanceCfg {
    fn default() -> InstanceCfg {
        InstanceCfg {
            router_id: Ipv4Addr::UNSPECIFIED,
            seed: 0,
            areas: vec![],
            interfaces: vec![],
            host_routes: vec![],
            external_routes: vec![],
            default_information: Default::default(),
            spf_delay: 1000,
            start_delay: None,
            start_delay_jitter: None,
            max_dd_retransmissions: None,
            demand_circuit_capable: true,
        }
    }
}

// ===== impl AreaCfg =====

impl AreaCfg {
    pub(crate) fn area_type(&self) -> AreaType {
        if self.nssa {
            AreaType::Nssa
        } else if self.stub {
            AreaType::Stub
        } else {
            AreaType::Normal
        }
    }
}

impl Default for AreaCfg {
    fn default() -> AreaCfg {
        AreaCfg {
            area_id: Ipv4Addr::UNSPECIFIED,
            stub: false,
            nssa: false,
            summary: true,
            default_cost: 1,
            ranges: vec![],
            nssa_default: false,
            no_redistribution: false,
            nssa_ranges: vec![],
        }
    }
}

// ===== impl RangeCfg =====

impl Default for RangeCfg {
    fn default() -> RangeCfg {
        RangeCfg {
            prefix: ip::default_route(),
            advertise: true,
            cost: None,
        }
    }
}

// ===== impl NssaRangeCfg =====

impl Default for NssaRangeCfg {
    fn default() -> NssaRangeCfg {
        NssaRangeCfg {
            prefix: ip::default_route(),
            advertise: true,
        }
    }
}

// ===== impl InterfaceCfg =====

impl Default for InterfaceCfg {
    fn default() -> InterfaceCfg {
        InterfaceCfg {
            name: String::new(),
            ifindex: 0,
            area_id: Ipv4Addr::UNSPECIFIED,
            address: ip::default_route(),
            if_type: InterfaceType::Broadcast,
            loopback: false,
            cost: 10,
            priority: 1,
            hello_interval: 10,
            dead_interval: 40,
            retransmit_interval: 5,
            transmit_delay: 1,
            mtu: 1500,
            demand_circuit: false,
            passive: false,
        }
    }
}

// ===== impl HostRouteCfg =====

impl Default for HostRouteCfg {
    fn default() -> HostRouteCfg {
        HostRouteCfg {
            address: Ipv4Addr::UNSPECIFIED,
            cost: 0,
            area_id: Ipv4Addr::UNSPECIFIED,
        }
    }
}

// ===== impl ExternalRouteCfg =====

impl Default for ExternalRouteCfg {
    fn default() -> ExternalRouteCfg {
        ExternalRouteCfg {
            prefix: ip::default_route(),
            metric: 20,
            metric_type: ExternalMetricType::Type2,
            fwd_addr: None,
            tag: 0,
        }
    }
}

// ===== impl DefaultInfoCfg =====

impl Default for DefaultInfoCfg {
    fn default() -> DefaultInfoCfg {
        DefaultInfoCfg {
            originate: false,
            always: false,
            metric: 1,
            metric_type: ExternalMetricType::Type2,
        }
    }
}

// ===== unit tests =====
