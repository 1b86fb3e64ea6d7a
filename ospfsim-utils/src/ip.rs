//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

use std::net::Ipv4Addr;

use ipnetwork::Ipv4Network;

pub trait Ipv4AddrExt {
    // Whether the address may identify a router or a packet source.
    fn is_usable(&self) -> bool;
}

pub trait Ipv4NetworkExt {
    // Same prefix with the host bits cleared.
    fn apply_mask(&self) -> Ipv4Network;

    fn is_default(&self) -> bool;
}

// 0.0.0.0/0.
pub fn default_route() -> Ipv4Network {
    // A zero-length prefix is always valid.
    Ipv4Network::new(Ipv4Addr::UNSPECIFIED, 0).unwrap()
}

// ===== impl Ipv4Addr =====

impl Ipv4AddrExt for Ipv4Addr {
    fn is_usable(&self) -> bool {
        !self.is_unspecified()
            && !self.is_loopback()
            && !self.is_multicast()
            && !self.is_broadcast()
    }
}

// ===== impl Ipv4Network =====

impl Ipv4NetworkExt for Ipv4Network {
    fn apply_mask(&self) -> Ipv4Network {
        // The prefix length was already validated.
        Ipv4Network::new(self.network(), self.prefix()).unwrap_or(*self)
    }

    fn is_default(&self) -> bool {
        self.prefix() == 0
    }
}

// ===== unit tests =====
