// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! The header ACLs are matched against

use etherparse::IpNumber;
use std::fmt::Display;
use std::net::IpAddr;

pub type VrfId = u32;
pub type SgId = u32;
pub type TagId = u32;

/// Lookup key for ACL matching. The VN, SG and tag lists are borrowed from the
/// flow the header was built from.
#[derive(Debug, Clone)]
pub struct PacketHeader<'a> {
    pub vrf: VrfId,
    pub protocol: IpNumber,
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub src_port: u16,
    pub dst_port: u16,
    pub src_policy_id: &'a [String],
    pub dst_policy_id: &'a [String],
    pub src_sg_id_l: &'a [SgId],
    pub dst_sg_id_l: &'a [SgId],
    pub src_tags: &'a [TagId],
    pub dst_tags: &'a [TagId],
}

impl<'a> PacketHeader<'a> {
    /// A header with no VN/SG/tag context. Ports are zeroed for protocols
    /// other than TCP and UDP.
    #[must_use]
    pub fn new(
        vrf: VrfId,
        protocol: IpNumber,
        src_ip: IpAddr,
        dst_ip: IpAddr,
        src_port: u16,
        dst_port: u16,
    ) -> Self {
        let (src_port, dst_port) = if protocol == IpNumber::TCP || protocol == IpNumber::UDP {
            (src_port, dst_port)
        } else {
            (0, 0)
        };
        Self {
            vrf,
            protocol,
            src_ip,
            dst_ip,
            src_port,
            dst_port,
            src_policy_id: &[],
            dst_policy_id: &[],
            src_sg_id_l: &[],
            dst_sg_id_l: &[],
            src_tags: &[],
            dst_tags: &[],
        }
    }

    #[must_use]
    pub fn with_vns(mut self, src: &'a [String], dst: &'a [String]) -> Self {
        self.src_policy_id = src;
        self.dst_policy_id = dst;
        self
    }

    #[must_use]
    pub fn with_sgs(mut self, src: &'a [SgId], dst: &'a [SgId]) -> Self {
        self.src_sg_id_l = src;
        self.dst_sg_id_l = dst;
        self
    }

    #[must_use]
    pub fn with_tags(mut self, src: &'a [TagId], dst: &'a [TagId]) -> Self {
        self.src_tags = src;
        self.dst_tags = dst;
        self
    }

    #[must_use]
    pub fn is_icmp(&self) -> bool {
        self.protocol == IpNumber::ICMP || self.protocol == IpNumber::IPV6_ICMP
    }
}

impl Display for PacketHeader<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "vrf:{} proto:{} {}:{} -> {}:{}",
            self.vrf, self.protocol.0, self.src_ip, self.src_port, self.dst_ip, self.dst_port
        )
    }
}
