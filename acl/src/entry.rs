// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! ACL entries and their match conditions

use etherparse::IpNumber;
use ipnet::IpNet;
use std::fmt::Display;
use std::net::IpAddr;
use uuid::Uuid;

use crate::action::FlowAction;
use crate::errors::AclError;
use crate::header::{PacketHeader, SgId, TagId};

/// An inclusive range of transport ports. Unlike port-forwarding ranges, port 0
/// is legal here: protocols without ports match with port 0.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PortRange {
    first: u16,
    last: u16,
}

impl Display for PortRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_any() {
            write!(f, "any")
        } else if self.is_singleton() {
            write!(f, "{}", self.first)
        } else {
            write!(f, "[{}-{}]", self.first, self.last)
        }
    }
}

impl Default for PortRange {
    fn default() -> Self {
        Self::any()
    }
}

impl PortRange {
    /// Create a `PortRange`. `last` must not be smaller than `first`.
    pub fn new(first: u16, last: u16) -> Result<Self, AclError> {
        if last < first {
            Err(AclError::InvalidPortRange(first, last))
        } else {
            Ok(Self { first, last })
        }
    }

    #[must_use]
    pub const fn single(port: u16) -> Self {
        Self {
            first: port,
            last: port,
        }
    }

    #[must_use]
    pub const fn any() -> Self {
        Self {
            first: 0,
            last: u16::MAX,
        }
    }

    #[must_use]
    pub fn is_any(self) -> bool {
        self.first == 0 && self.last == u16::MAX
    }

    #[must_use]
    pub fn is_singleton(self) -> bool {
        self.first == self.last
    }

    #[must_use]
    pub fn contains(self, port: u16) -> bool {
        port >= self.first && port <= self.last
    }
}

/// How an ACL entry selects one endpoint of a packet.
#[derive(Debug, Clone, PartialEq)]
pub enum AddressMatch {
    Any,
    Prefix(Vec<IpNet>),
    /// The endpoint's virtual network, by name
    Vn(String),
    /// The endpoint carries this security group
    Sg(SgId),
    /// The endpoint carries all of these tags
    Tags(Vec<TagId>),
}

impl AddressMatch {
    pub fn prefix(prefix: &str) -> Result<Self, AclError> {
        let net: IpNet = prefix
            .parse()
            .map_err(|_| AclError::InvalidPrefix(prefix.to_owned()))?;
        Ok(AddressMatch::Prefix(vec![net]))
    }

    fn matches(&self, addr: IpAddr, vns: &[String], sgs: &[SgId], tags: &[TagId]) -> bool {
        match self {
            AddressMatch::Any => true,
            AddressMatch::Prefix(nets) => nets.iter().any(|n| n.contains(&addr)),
            AddressMatch::Vn(vn) => vns.iter().any(|v| v == vn),
            AddressMatch::Sg(sg) => sgs.contains(sg),
            AddressMatch::Tags(wanted) => wanted.iter().all(|t| tags.contains(t)),
        }
    }
}

impl Display for AddressMatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AddressMatch::Any => write!(f, "any"),
            AddressMatch::Prefix(nets) => {
                let nets: Vec<String> = nets.iter().map(ToString::to_string).collect();
                write!(f, "{}", nets.join(","))
            }
            AddressMatch::Vn(vn) => write!(f, "vn:{vn}"),
            AddressMatch::Sg(sg) => write!(f, "sg:{sg}"),
            AddressMatch::Tags(tags) => write!(f, "tags:{tags:?}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AclMatch {
    /// `None` matches any protocol
    pub protocol: Option<IpNumber>,
    pub src: AddressMatch,
    pub dst: AddressMatch,
    pub src_ports: PortRange,
    pub dst_ports: PortRange,
}

impl Default for AclMatch {
    fn default() -> Self {
        Self {
            protocol: None,
            src: AddressMatch::Any,
            dst: AddressMatch::Any,
            src_ports: PortRange::any(),
            dst_ports: PortRange::any(),
        }
    }
}

impl AclMatch {
    #[must_use]
    pub fn protocol(mut self, protocol: IpNumber) -> Self {
        self.protocol = Some(protocol);
        self
    }
    #[must_use]
    pub fn src(mut self, src: AddressMatch) -> Self {
        self.src = src;
        self
    }
    #[must_use]
    pub fn dst(mut self, dst: AddressMatch) -> Self {
        self.dst = dst;
        self
    }
    #[must_use]
    pub fn src_ports(mut self, ports: PortRange) -> Self {
        self.src_ports = ports;
        self
    }
    #[must_use]
    pub fn dst_ports(mut self, ports: PortRange) -> Self {
        self.dst_ports = ports;
        self
    }

    #[must_use]
    pub fn matches(&self, hdr: &PacketHeader<'_>) -> bool {
        if let Some(proto) = self.protocol
            && proto != hdr.protocol
        {
            return false;
        }
        self.src_ports.contains(hdr.src_port)
            && self.dst_ports.contains(hdr.dst_port)
            && self
                .src
                .matches(hdr.src_ip, hdr.src_policy_id, hdr.src_sg_id_l, hdr.src_tags)
            && self
                .dst
                .matches(hdr.dst_ip, hdr.dst_policy_id, hdr.dst_sg_id_l, hdr.dst_tags)
    }
}

/// One rule of an ACL
#[derive(Debug, Clone, PartialEq)]
pub struct AclEntry {
    pub id: u32,
    pub uuid: Uuid,
    pub terminal: bool,
    pub matches: AclMatch,
    pub action: FlowAction,
}

impl AclEntry {
    #[must_use]
    pub fn new(id: u32, matches: AclMatch, action: FlowAction) -> Self {
        Self {
            id,
            uuid: Uuid::new_v4(),
            terminal: true,
            matches,
            action,
        }
    }

    #[must_use]
    pub fn with_uuid(mut self, uuid: Uuid) -> Self {
        self.uuid = uuid;
        self
    }

    #[must_use]
    pub fn non_terminal(mut self) -> Self {
        self.terminal = false;
        self
    }
}
