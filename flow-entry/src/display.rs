// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::flow_entry::FlowEntry;
use crate::flow_key::FlowKey;
use crate::table::FlowTable;
use etherparse::IpNumber;
use std::fmt::Display;

/// Section heading of a table dump
pub struct Heading(pub String);
const LINE_WIDTH: usize = 81;
impl Display for Heading {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let len = LINE_WIDTH.saturating_sub(self.0.len() + 2) / 2;
        write!(f, " {0:─<width$}", "─", width = len)?;
        write!(f, " {} ", self.0)?;
        writeln!(f, " {0:─<width$}", "─", width = len)
    }
}

impl Display for FlowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let protocol = match self.protocol() {
            IpNumber::TCP => "TCP".to_string(),
            IpNumber::UDP => "UDP".to_string(),
            IpNumber::ICMP => "ICMP".to_string(),
            IpNumber::IPV6_ICMP => "ICMPv6".to_string(),
            other => format!("proto {}", other.0),
        };
        if self.has_ports() {
            write!(
                f,
                "{{ vrf {} {protocol} ({}:{}, {}:{}) }}",
                self.vrf, self.src_addr, self.src_port, self.dst_addr, self.dst_port
            )
        } else {
            write!(
                f,
                "{{ vrf {} {protocol} ({}, {}) }}",
                self.vrf, self.src_addr, self.dst_addr
            )
        }
    }
}

impl Display for FlowEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mp = &self.data.match_p;
        write!(f, "{} [{}] action: {}", self.key(), self.flags, mp.action_info.action)?;
        if let Some(reason) = &self.drop_reason {
            write!(f, " drop: {reason}")?;
        }
        if let Some(vrf) = self.data.acl_assigned_vrf {
            write!(f, " vrf-assign: {vrf}")?;
        }
        match self.data.rpf.rpf_nh {
            Some(nh) => write!(f, " rpf-nh: {nh}"),
            None => write!(f, " rpf-nh: none"),
        }
    }
}

impl Display for FlowTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Heading(format!("Flow Table ({})", self.len())).fmt(f)?;
        for (idx, flow) in self.iter() {
            write!(f, " {idx} {flow}")?;
            match flow.reverse_index() {
                Some(rev) => writeln!(f, " <-> {rev}"),
                None => writeln!(f),
            }?;
        }
        Ok(())
    }
}
