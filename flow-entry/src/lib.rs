// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Flow entries, their forward/reverse pairing and the table that owns them

#![deny(clippy::all, clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::struct_excessive_bools)]

mod display;
mod errors;
mod flags;
mod flow_entry;
mod flow_key;
mod linklocal;
mod match_policy;
mod pending;
mod reasons;
mod table;

pub use display::Heading;
pub use errors::{FlowError, LinkLocalError};
pub use flags::FlowFlags;
pub use flow_entry::{FlowData, FlowEntry, RpfState};
pub use flow_key::FlowKey;
pub use linklocal::{LinkLocalBinding, LinkLocalPorts};
pub use match_policy::{MatchPolicy, SessionPolicy};
pub use pending::{PendingAction, PendingState};
pub use reasons::{DropReason, ShortReason};
pub use table::{FlowIndex, FlowTable};

use tracectl::trace_target;
trace_target!("flow-table", LevelFilter::INFO, &["flow"]);
