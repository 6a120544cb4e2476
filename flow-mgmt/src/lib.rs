// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Flow management: hash-partitioned flow tables, each owned by one task,
//! kept in sync with the oper db through change notifications.

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod deps;
mod errors;
mod event;
mod mgmt;
mod params;
mod partition;

pub use deps::DependencyIndex;
pub use errors::FlowMgmtError;
pub use event::{DbChange, FlowChannelRequest, FlowRequest, FlowResponse, PartitionStats};
pub use mgmt::FlowMgmt;
pub use params::{
    DEFAULT_PARTITIONS, DEFAULT_QUEUE_DEPTH, DEFAULT_TABLE_CAPACITY, FlowMgmtParams,
    FlowMgmtParamsBuilder, FlowMgmtParamsBuilderError,
};

use tracectl::trace_target;
trace_target!("flow-mgmt", LevelFilter::INFO, &["flow"]);
