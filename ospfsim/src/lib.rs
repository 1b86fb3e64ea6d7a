//
// Copyright (c) The Holo Core Contributors
//
// SPDX-License-Identifier: MIT
//

//! OSPFv2 routing engine for discrete-event network simulation.
//!
//! Every simulated router owns one [`instance::Instance`]. The simulator
//! feeds it received packets, fired timers and interface events, and the
//! instance answers through the [`southbound::Environment`] it was created
//! with: packets to transmit, timers to schedule and routes to install.

pub mod area;
pub mod collections;
pub mod config;
pub mod debug;
pub mod error;
pub mod events;
pub mod flood;
pub mod instance;
pub mod interface;
pub mod lsdb;
pub mod neighbor;
pub mod network;
pub mod output;
pub mod packet;
pub mod route;
pub mod southbound;
pub mod spf;
pub mod tasks;
