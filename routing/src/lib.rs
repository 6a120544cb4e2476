// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Read-only view of the virtual networks, security groups, interfaces,
//! routes and nexthops that flow policy evaluation consumes.

#![deny(clippy::all, clippy::pedantic)]
#![allow(
    clippy::similar_names,
    clippy::struct_field_names,
    clippy::missing_errors_doc
)]

mod db;
mod db_rw;
mod errors;
mod interfaces;
mod nexthop;
mod route;
mod sg;
mod vn;

// re-exports
pub use db::{OperDb, OperDbChange};
pub use db_rw::{OperDbReader, OperDbReaderFactory, OperDbWriter};
pub use errors::OperError;
pub use interfaces::iftable::IfTable;
pub use interfaces::interface::{
    IfIndex, InetInterface, Interface, InterfaceKind, VmInterface, VmiType,
};
pub use nexthop::{ComponentNh, CompositeNh, NextHop, NextHopId, NextHopKind, NhTable};
pub use route::{MacAddr, Route, RoutePath, Vrf};
pub use sg::SecurityGroup;
pub use vn::{VirtualNetwork, VnId};

// main trace target for the oper db
use tracectl::trace_target;
trace_target!("oper-db", LevelFilter::INFO, &["flow"]);
