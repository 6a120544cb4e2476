// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Per-flow rule lists and the actions they evaluated to

use acl::{FlowAction, MatchAclParamsList, PolicyState, TrafficAction};
use uuid::Uuid;

/// Rule lists and results of one reflexive policy source (security groups,
/// application policy sets or FWaaS). Rebuilt from scratch on every evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionPolicy {
    pub acl_l: MatchAclParamsList,
    pub out_acl_l: MatchAclParamsList,
    pub reverse_acl_l: MatchAclParamsList,
    pub reverse_out_acl_l: MatchAclParamsList,

    pub rule_present: bool,
    pub out_rule_present: bool,
    pub reverse_rule_present: bool,
    pub reverse_out_rule_present: bool,

    pub action: TrafficAction,
    pub out_action: TrafficAction,
    pub reverse_action: TrafficAction,
    pub reverse_out_action: TrafficAction,
    pub action_summary: TrafficAction,

    pub rule_uuid: Uuid,
    pub acl_name: String,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            acl_l: Vec::new(),
            out_acl_l: Vec::new(),
            reverse_acl_l: Vec::new(),
            reverse_out_acl_l: Vec::new(),
            rule_present: false,
            out_rule_present: false,
            reverse_rule_present: false,
            reverse_out_rule_present: false,
            action: TrafficAction::empty(),
            out_action: TrafficAction::empty(),
            reverse_action: TrafficAction::empty(),
            reverse_out_action: TrafficAction::empty(),
            action_summary: TrafficAction::empty(),
            rule_uuid: PolicyState::NotEvaluated.uuid(),
            acl_name: String::new(),
        }
    }
}

impl SessionPolicy {
    /// Drop the rule lists gathered for a previous evaluation
    pub fn reset_rules(&mut self) {
        self.acl_l.clear();
        self.out_acl_l.clear();
        self.reverse_acl_l.clear();
        self.reverse_out_acl_l.clear();
        self.rule_present = false;
        self.out_rule_present = false;
        self.reverse_rule_present = false;
        self.reverse_out_rule_present = false;
    }

    /// Clear the evaluation results, keeping the rule lists
    pub fn reset_actions(&mut self) {
        self.action = TrafficAction::empty();
        self.out_action = TrafficAction::empty();
        self.reverse_action = TrafficAction::empty();
        self.reverse_out_action = TrafficAction::empty();
        self.action_summary = TrafficAction::empty();
        self.rule_uuid = PolicyState::NotEvaluated.uuid();
        self.acl_name.clear();
    }

    #[must_use]
    pub fn any_rule_present(&self) -> bool {
        self.rule_present
            || self.out_rule_present
            || self.reverse_rule_present
            || self.reverse_out_rule_present
    }

    #[must_use]
    pub fn reverse_any_rule_present(&self) -> bool {
        self.reverse_rule_present || self.reverse_out_rule_present
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.acl_l.is_empty()
            && self.out_acl_l.is_empty()
            && self.reverse_acl_l.is_empty()
            && self.reverse_out_acl_l.is_empty()
    }
}

/// Everything the policy evaluation of a flow reads and produces
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MatchPolicy {
    pub m_acl_l: MatchAclParamsList,
    pub m_out_acl_l: MatchAclParamsList,
    pub m_mirror_acl_l: MatchAclParamsList,
    pub m_out_mirror_acl_l: MatchAclParamsList,
    pub m_vrf_assign_acl_l: MatchAclParamsList,

    pub policy_action: TrafficAction,
    pub out_policy_action: TrafficAction,
    pub mirror_action: TrafficAction,
    pub out_mirror_action: TrafficAction,
    pub vrf_assign_acl_action: TrafficAction,

    pub sg_policy: SessionPolicy,
    pub aps_policy: SessionPolicy,
    pub fwaas_policy: SessionPolicy,

    /// Merged result of all sources
    pub action_info: FlowAction,
}

impl MatchPolicy {
    pub fn reset_rules(&mut self) {
        self.m_acl_l.clear();
        self.m_out_acl_l.clear();
        self.m_mirror_acl_l.clear();
        self.m_out_mirror_acl_l.clear();
        self.m_vrf_assign_acl_l.clear();
        self.sg_policy.reset_rules();
        self.aps_policy.reset_rules();
        self.fwaas_policy.reset_rules();
    }

    pub fn reset_actions(&mut self) {
        self.action_info.clear();
        self.policy_action = TrafficAction::empty();
        self.out_policy_action = TrafficAction::empty();
        self.mirror_action = TrafficAction::empty();
        self.out_mirror_action = TrafficAction::empty();
        self.vrf_assign_acl_action = TrafficAction::empty();
        self.sg_policy.reset_actions();
        self.aps_policy.reset_actions();
        self.fwaas_policy.reset_actions();
    }

    /// Ids of every ACL referenced by any rule list
    pub fn acl_ids(&self) -> impl Iterator<Item = Uuid> + '_ {
        let sessions = [&self.sg_policy, &self.aps_policy, &self.fwaas_policy];
        [
            &self.m_acl_l,
            &self.m_out_acl_l,
            &self.m_mirror_acl_l,
            &self.m_out_mirror_acl_l,
            &self.m_vrf_assign_acl_l,
        ]
        .into_iter()
        .chain(sessions.into_iter().flat_map(|s| {
            [&s.acl_l, &s.out_acl_l, &s.reverse_acl_l, &s.reverse_out_acl_l]
        }))
        .flatten()
        .map(|params| params.acl.id)
    }
}
