// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Reasons why a flow is short or dropped

use std::fmt::Display;
use strum_macros::{EnumIter, IntoStaticStr};

/// Why a flow could not get a durable decision. Short flows are always dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, EnumIter, IntoStaticStr, strum_macros::Display)]
pub enum ShortReason {
    #[strum(serialize = "Short flow Interface unavailable")]
    UnavailableInterface,
    #[strum(serialize = "Short flow Ipv4 forwarding disabled")]
    Ipv4FwdDisabled,
    #[strum(serialize = "Short flow VRF unavailable")]
    UnavailableVrf,
    #[strum(serialize = "Short flow No Source route")]
    NoSrcRoute,
    #[strum(serialize = "Short flow No Destination route")]
    NoDstRoute,
    #[strum(serialize = "Short flow Audit Entry")]
    AuditEntry,
    #[strum(serialize = "Short flow VRF CHANGE")]
    VrfChange,
    #[strum(serialize = "Short flow No Reverse flow")]
    NoReverseFlow,
    #[strum(serialize = "Short flow Reverse flow change")]
    ReverseFlowChange,
    #[strum(serialize = "Short flow NAT Changed")]
    NatChange,
    #[strum(serialize = "Short flow Flow Limit Reached")]
    FlowLimit,
    #[strum(serialize = "Short flow Linklocal source NAT failed")]
    LinklocalSrcNat,
    #[strum(serialize = "Short flow vrouter install failed")]
    FailedVrouterInstall,
    #[strum(serialize = "Short flow invalid L2 flow")]
    InvalidL2Flow,
    #[strum(serialize = "Short flow on TSN")]
    FlowOnTsn,
    #[strum(serialize = "Short flow No mirror entry")]
    NoMirrorEntry,
    #[strum(serialize = "Short flow same flow and rflow key")]
    SameFlowRflowKey,
    #[strum(serialize = "Short flow port map drop")]
    PortMapDrop,
    #[strum(serialize = "Short flow No Source route for RPF NH")]
    NoSrcRouteL2Rpf,
    #[strum(serialize = "Short flow FAT flow NAT conflict")]
    FatFlowNatConflict,
}

/// The single reason recorded for a dropped flow. When several sources deny,
/// the first one in declaration order wins.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DropReason {
    Short(ShortReason),
    Policy,
    OutPolicy,
    Sg,
    OutSg,
    ReverseSg,
    ReverseOutSg,
    FirewallPolicy,
    OutFirewallPolicy,
    ReverseFirewallPolicy,
    ReverseOutFirewallPolicy,
    Fwaas,
    OutFwaas,
    ReverseFwaas,
    ReverseOutFwaas,
    Unknown,
}

impl DropReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            DropReason::Short(reason) => reason.into(),
            DropReason::Policy => "Flow drop Policy",
            DropReason::OutPolicy => "Flow drop Out Policy",
            DropReason::Sg => "Flow drop SG",
            DropReason::OutSg => "Flow drop OUT SG",
            DropReason::ReverseSg => "Flow drop REVERSE SG",
            DropReason::ReverseOutSg => "Flow drop REVERSE OUT SG",
            DropReason::FirewallPolicy => "Flow drop Firewall Policy",
            DropReason::OutFirewallPolicy => "Flow drop OUT Firewall Policy",
            DropReason::ReverseFirewallPolicy => "Flow drop REVERSE Firewall Policy",
            DropReason::ReverseOutFirewallPolicy => "Flow drop REVERSE OUT Firewall Policy",
            DropReason::Fwaas => "Flow drop FWAAS Policy",
            DropReason::OutFwaas => "Flow drop OUT FWAAS Policy",
            DropReason::ReverseFwaas => "Flow drop REVERSE FWAAS Policy",
            DropReason::ReverseOutFwaas => "Flow drop REVERSE OUT FWAAS Policy",
            DropReason::Unknown => "UNKNOWN",
        }
    }

    #[must_use]
    pub fn is_sg(&self) -> bool {
        matches!(
            self,
            DropReason::Sg | DropReason::OutSg | DropReason::ReverseSg | DropReason::ReverseOutSg
        )
    }
}

impl Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_reason_strings() {
        assert_eq!(
            DropReason::Short(ShortReason::NoSrcRoute).to_string(),
            "Short flow No Source route"
        );
        assert_eq!(DropReason::Sg.to_string(), "Flow drop SG");
        assert_eq!(DropReason::Unknown.as_str(), "UNKNOWN");
        for reason in ShortReason::iter() {
            assert!(reason.to_string().starts_with("Short flow"));
            let s: &'static str = reason.into();
            assert_eq!(s, DropReason::Short(reason).as_str());
        }
    }
}
