// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Evaluation of an ordered list of ACLs against a packet header

use etherparse::IpNumber;
use std::net::IpAddr;
use std::sync::Arc;
use strum_macros::{Display, EnumIter};
use uuid::Uuid;

use crate::acl::Acl;
use crate::action::{FlowAction, TrafficAction};
use crate::entry::AclEntry;
use crate::header::PacketHeader;

#[allow(unused)]
use tracing::{debug, trace};

pub const DNS_SERVER_PORT: u16 = 53;

/// Audit tags for decisions that were not taken by a real rule. Each maps to a
/// reserved UUID so that flow records can tell them apart from rule UUIDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
#[repr(u8)]
pub enum PolicyState {
    #[strum(serialize = "not-evaluated")]
    NotEvaluated = 0,
    #[strum(serialize = "implicit-allow")]
    ImplicitAllow = 1,
    #[strum(serialize = "implicit-deny")]
    ImplicitDeny = 2,
    #[strum(serialize = "default-gw-icmp-or-dns")]
    DefaultGwIcmpOrDns = 3,
    #[strum(serialize = "linklocal")]
    LinkLocal = 4,
    #[strum(serialize = "multicast")]
    Multicast = 5,
    #[strum(serialize = "non-ip")]
    NonIp = 6,
    #[strum(serialize = "bgp-router-service")]
    BgpRouterService = 7,
}

impl PolicyState {
    #[must_use]
    pub const fn uuid(self) -> Uuid {
        Uuid::from_u128(self as u128)
    }

    #[must_use]
    pub fn from_uuid(uuid: Uuid) -> Option<Self> {
        use strum::IntoEnumIterator;
        Self::iter().find(|s| s.uuid() == uuid)
    }
}

/// Policy-exempt flow categories, used to tag implicit-allow decisions.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum FlowCategory {
    #[default]
    Plain,
    LinkLocal,
    Multicast,
    BgpRouterService,
}

/// One ACL of a rule list, together with what matching it produced.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchAclParams {
    pub acl: Arc<Acl>,
    pub action_info: FlowAction,
    pub terminal_rule: bool,
    pub ace_id_list: Vec<u32>,
}

impl MatchAclParams {
    #[must_use]
    pub fn new(acl: Arc<Acl>) -> Self {
        Self {
            acl,
            action_info: FlowAction::default(),
            terminal_rule: false,
            ace_id_list: Vec::new(),
        }
    }
}

/// Evaluation order is list order
pub type MatchAclParamsList = Vec<MatchAclParams>;

/// Which rule decided, for audit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowPolicyInfo {
    pub uuid: Uuid,
    pub acl_name: String,
    pub drop: bool,
    pub terminal: bool,
    pub other: bool,
    pub src_match_vn: String,
    pub dst_match_vn: String,
}

impl Default for FlowPolicyInfo {
    fn default() -> Self {
        Self {
            uuid: PolicyState::NotEvaluated.uuid(),
            acl_name: String::new(),
            drop: false,
            terminal: false,
            other: false,
            src_match_vn: String::new(),
            dst_match_vn: String::new(),
        }
    }
}

impl FlowPolicyInfo {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn record_match(&mut self, acl: &Acl, entry: &AclEntry, hdr: &PacketHeader<'_>) {
        if entry.terminal {
            self.terminal = true;
            self.uuid = entry.uuid;
        } else {
            self.other = true;
            if !self.terminal {
                self.uuid = entry.uuid;
            }
        }
        self.acl_name.clone_from(&acl.name);
        self.drop = entry.action.action.should_drop();
        if let Some(vn) = hdr.src_policy_id.first() {
            self.src_match_vn.clone_from(vn);
        }
        if let Some(vn) = hdr.dst_policy_id.first() {
            self.dst_match_vn.clone_from(vn);
        }
    }
}

/// What the evaluator needs to know about the flow besides the header.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchAclContext<'a> {
    pub category: FlowCategory,
    /// Gateway and DNS addresses of the flow's interface
    pub gateways: &'a [IpAddr],
}

impl MatchAclContext<'_> {
    fn is_gw_packet(&self, hdr: &PacketHeader<'_>) -> bool {
        self.gateways.contains(&hdr.dst_ip) || self.gateways.contains(&hdr.src_ip)
    }
}

fn is_icmp_or_dns(hdr: &PacketHeader<'_>) -> bool {
    hdr.is_icmp()
        || (hdr.protocol == IpNumber::UDP
            && (hdr.src_port == DNS_SERVER_PORT || hdr.dst_port == DNS_SERVER_PORT))
}

/// Evaluate `acl_l` in order against `hdr`.
///
/// - An empty list with `add_implicit_allow` passes, tagged with the flow category.
/// - ICMP and DNS to or from the interface gateway always pass.
/// - Otherwise the actions of matching ACLs are merged, mirror destinations
///   accumulate, and evaluation stops at the first ACL that matched a terminal rule.
/// - If nothing matched and `add_implicit_deny` is set, the result is
///   DENY|IMPLICIT_DENY and `info.drop` is set.
///
/// With neither implicit flag, an unmatched header yields an empty action.
pub fn match_acl(
    ctx: &MatchAclContext<'_>,
    hdr: &PacketHeader<'_>,
    acl_l: &mut [MatchAclParams],
    add_implicit_deny: bool,
    add_implicit_allow: bool,
    mut info: Option<&mut FlowPolicyInfo>,
) -> FlowAction {
    if acl_l.is_empty() && add_implicit_allow {
        if let Some(info) = info {
            info.uuid = match ctx.category {
                FlowCategory::LinkLocal => PolicyState::LinkLocal.uuid(),
                FlowCategory::Multicast => PolicyState::Multicast.uuid(),
                FlowCategory::BgpRouterService => PolicyState::BgpRouterService.uuid(),
                // the same info is shared by the in and out lists; keep a real match
                FlowCategory::Plain if info.terminal || info.other => info.uuid,
                FlowCategory::Plain => PolicyState::ImplicitAllow.uuid(),
            };
        }
        return FlowAction::new(TrafficAction::PASS);
    }

    if is_icmp_or_dns(hdr) && ctx.is_gw_packet(hdr) {
        if let Some(info) = info {
            info.uuid = PolicyState::DefaultGwIcmpOrDns.uuid();
        }
        return FlowAction::new(TrafficAction::PASS);
    }

    let mut result = FlowAction::default();
    for params in acl_l.iter_mut() {
        let acl = Arc::clone(&params.acl);
        if !acl.packet_match(hdr, params, info.as_deref_mut()) {
            continue;
        }
        let matched = &params.action_info;
        result.action |= matched.action;
        if matched.action.contains(TrafficAction::MIRROR) {
            result.mirror_l.extend(matched.mirror_l.iter().cloned());
        }
        if matched.action.contains(TrafficAction::VRF_TRANSLATE) {
            result.vrf_translate = matched.vrf_translate.clone();
        }
        if result.qos_config.is_none() && matched.action.contains(TrafficAction::APPLY_QOS) {
            result.qos_config = matched.qos_config;
        }
        if params.terminal_rule {
            break;
        }
    }

    if result.action.is_empty() && add_implicit_deny {
        result.action = TrafficAction::DENY | TrafficAction::IMPLICIT_DENY;
        if let Some(info) = info {
            info.uuid = PolicyState::ImplicitDeny.uuid();
            info.drop = true;
        }
    }
    trace!("match_acl {hdr}: {}", result.action);
    result
}
