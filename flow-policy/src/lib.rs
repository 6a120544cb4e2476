// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The flow decision engine: rule gathering, policy evaluation, reverse path
//! resolution and flow creation.

#![deny(clippy::all, clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    clippy::module_name_repetitions,
    clippy::too_many_lines
)]

mod builder;
mod config;
mod decision;
mod engine;
mod gather;
mod header;
mod policy;
mod rpf;
mod session;

pub use builder::{FlowBuilder, NatInfo, PacketInfo, UNKNOWN_VN};
pub use config::{DEFAULT_BGP_SERVICE_PORT, DEFAULT_SSH_PORT, EngineConfig};
pub use decision::{FlowDecision, PairDecision, RuleAudit};
pub use engine::FlowEngine;
pub use gather::get_policy_info;
pub use header::{out_packet_header, packet_header};
pub use policy::{PolicyContext, action_recompute, do_policy, update_reflexive_action};
pub use rpf::{
    rpf_check, rpf_init, rpf_update, set_ecmp_rpf_nh, set_rpf_nh, set_rpf_nh_state,
    update_ecmp_info, update_rpf,
};
pub use session::{SessionOutcome, reflect_session, session_match};

use tracectl::trace_target;
trace_target!("flow-policy", LevelFilter::INFO, &["flow"]);
