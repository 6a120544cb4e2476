// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Traffic actions and the per-flow action record

use bitflags::bitflags;
use std::fmt::Display;

bitflags! {
    /// Actions an ACL entry (or any other rule source) can contribute to a flow.
    /// Several rule sources are OR'ed together, so this is a set, not a choice.
    #[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TrafficAction: u32 {
        const ALERT = 1 << 0;
        const DENY = 1 << 1;
        const LOG = 1 << 2;
        const PASS = 1 << 3;
        const MIRROR = 1 << 4;
        const VRF_TRANSLATE = 1 << 5;
        const TRAP = 1 << 6;
        const IMPLICIT_DENY = 1 << 7;
        const APPLY_QOS = 1 << 8;
        const HBS = 1 << 9;
    }
}

impl TrafficAction {
    pub const DROP_FLAGS: TrafficAction = TrafficAction::DENY;
    pub const IMPLICIT_DENY_FLAGS: TrafficAction = TrafficAction::IMPLICIT_DENY;
    pub const PASS_FLAGS: TrafficAction = TrafficAction::PASS;

    /// Any explicit or implicit deny present
    #[must_use]
    pub const fn should_drop(self) -> bool {
        self.intersects(Self::DROP_FLAGS.union(Self::IMPLICIT_DENY_FLAGS))
    }

    /// Evaluated to something and nothing in it denies
    #[must_use]
    pub const fn is_pass(self) -> bool {
        !self.is_empty() && !self.should_drop()
    }
}

impl Display for TrafficAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "none");
        }
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        write!(f, "{}", names.join("|"))
    }
}

pub type QosConfigIdx = u32;

/// Side of a service-chain interface used by health-based steering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HbsSide {
    Left,
    Right,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MirrorAction {
    pub analyzer_name: String,
    pub vrf_name: String,
    pub analyzer_ip: std::net::IpAddr,
    pub analyzer_port: u16,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VrfTranslateAction {
    pub vrf_name: String,
    pub ignore_acl: bool,
}

/// An action bitmask plus the parameters some of its bits carry.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct FlowAction {
    pub action: TrafficAction,
    pub mirror_l: Vec<MirrorAction>,
    pub vrf_translate: VrfTranslateAction,
    pub qos_config: Option<QosConfigIdx>,
}

impl FlowAction {
    #[must_use]
    pub fn new(action: TrafficAction) -> Self {
        Self {
            action,
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_mirror(mut self, mirror: MirrorAction) -> Self {
        self.action |= TrafficAction::MIRROR;
        self.mirror_l.push(mirror);
        self
    }

    #[must_use]
    pub fn with_vrf_translate(mut self, vrf_name: &str, ignore_acl: bool) -> Self {
        self.action |= TrafficAction::VRF_TRANSLATE;
        self.vrf_translate = VrfTranslateAction {
            vrf_name: vrf_name.to_owned(),
            ignore_acl,
        };
        self
    }

    #[must_use]
    pub fn with_qos(mut self, qos: QosConfigIdx) -> Self {
        self.action |= TrafficAction::APPLY_QOS;
        self.qos_config = Some(qos);
        self
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_traffic_action_drop() {
        assert!(TrafficAction::DENY.should_drop());
        assert!(TrafficAction::IMPLICIT_DENY.should_drop());
        assert!((TrafficAction::PASS | TrafficAction::DENY).should_drop());
        assert!(!TrafficAction::PASS.should_drop());
        assert!(!TrafficAction::TRAP.should_drop());
        assert!(!TrafficAction::empty().should_drop());
        assert!(TrafficAction::PASS.is_pass());
        assert!(!TrafficAction::empty().is_pass());
    }

    #[test]
    fn test_traffic_action_display() {
        let action = TrafficAction::DENY | TrafficAction::MIRROR;
        assert_eq!(action.to_string(), "DENY|MIRROR");
        assert_eq!(TrafficAction::empty().to_string(), "none");
    }

    #[test]
    fn test_flow_action_builders() {
        let action = FlowAction::new(TrafficAction::PASS)
            .with_vrf_translate("svc-vrf", true)
            .with_qos(4);
        assert!(action.action.contains(TrafficAction::VRF_TRANSLATE));
        assert!(action.action.contains(TrafficAction::APPLY_QOS));
        assert_eq!(action.vrf_translate.vrf_name, "svc-vrf");
        assert!(action.vrf_translate.ignore_acl);
        assert_eq!(action.qos_config, Some(4));
    }
}
