// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use bitflags::bitflags;
use std::fmt::Display;

bitflags! {
    /// Classification and state flags of a [`crate::FlowEntry`]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FlowFlags: u32 {
        const NAT                   = 1 << 0;
        const LOCAL                 = 1 << 1;
        const SHORT                 = 1 << 2;
        const LINKLOCAL             = 1 << 3;
        const REVERSE               = 1 << 4;
        const ECMP                  = 1 << 5;
        const INGRESS_DIR           = 1 << 6;
        /// Punt packets of this flow to the agent instead of fast-pathing them
        const TRAP                  = 1 << 7;
        const MULTICAST             = 1 << 8;
        const LINKLOCAL_BIND_PORT   = 1 << 9;
        const TCP_ACK               = 1 << 10;
        const UNKNOWN_UNICAST_FLOOD = 1 << 11;
        const BGP_ROUTER_SERVICE    = 1 << 12;
        const ALIAS_IP              = 1 << 13;
        const FABRIC_CONTROL        = 1 << 14;
        const HBS_LEFT              = 1 << 15;
        const HBS_RIGHT             = 1 << 16;
        const L2                    = 1 << 17;
        /// Trapped until the members of a newly composite source nexthop are learnt
        const RPF_TRAP              = 1 << 18;
    }
}

impl FlowFlags {
    /// Flows whose policy evaluation is skipped altogether
    pub const POLICY_EXEMPT: Self = Self::LINKLOCAL
        .union(Self::MULTICAST)
        .union(Self::BGP_ROUTER_SERVICE)
        .union(Self::FABRIC_CONTROL);

    pub const HBS: Self = Self::HBS_LEFT.union(Self::HBS_RIGHT);

    /// Either reason to punt packets of a flow
    pub const TRAPPED: Self = Self::TRAP.union(Self::RPF_TRAP);

    #[must_use]
    pub fn is_policy_exempt(self) -> bool {
        self.intersects(Self::POLICY_EXEMPT)
    }
}

impl Display for FlowFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_empty() {
            return write!(f, "-");
        }
        let names: Vec<&str> = self.iter_names().map(|(name, _)| name).collect();
        write!(f, "{}", names.join("|"))
    }
}
