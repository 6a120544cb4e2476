// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Flow key

use acl::VrfId;
use etherparse::IpNumber;
use std::net::IpAddr;

/// The 5-tuple plus routing context that identifies a flow.
/// Keys are totally ordered so tables can be walked deterministically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FlowKey {
    pub vrf: VrfId,
    pub protocol: u8,
    pub src_addr: IpAddr,
    pub dst_addr: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
}

impl FlowKey {
    #[must_use]
    pub fn new(
        vrf: VrfId,
        protocol: IpNumber,
        src_addr: IpAddr,
        dst_addr: IpAddr,
        src_port: u16,
        dst_port: u16,
    ) -> Self {
        Self {
            vrf,
            protocol: protocol.0,
            src_addr,
            dst_addr,
            src_port,
            dst_port,
        }
    }

    #[must_use]
    pub fn protocol(&self) -> IpNumber {
        IpNumber(self.protocol)
    }

    #[must_use]
    pub fn has_ports(&self) -> bool {
        let proto = self.protocol();
        proto == IpNumber::TCP || proto == IpNumber::UDP
    }

    /// The key of the return traffic in vrf `vrf`, without translation
    #[must_use]
    pub fn reversed(&self, vrf: VrfId) -> Self {
        Self {
            vrf,
            protocol: self.protocol,
            src_addr: self.dst_addr,
            dst_addr: self.src_addr,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }
}
