// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Agent-level settings the decision path reads

use etherparse::IpNumber;
use flow_entry::FlowKey;
use std::net::IpAddr;

pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_BGP_SERVICE_PORT: u16 = 179;

#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Address of this compute node on the fabric
    pub router_id: Option<IpAddr>,
    pub control_nodes: Vec<IpAddr>,
    pub dns_servers: Vec<IpAddr>,
    pub collectors: Vec<IpAddr>,
    pub ssh_port: u16,
    pub bgp_service_port: u16,
    /// Let ICMP and DNS to the default gateway through regardless of rules
    pub auto_allow_gw: bool,
    /// Flows a single VM may own, 0 for no limit
    pub max_vm_flows: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            router_id: None,
            control_nodes: Vec::new(),
            dns_servers: Vec::new(),
            collectors: Vec::new(),
            ssh_port: DEFAULT_SSH_PORT,
            bgp_service_port: DEFAULT_BGP_SERVICE_PORT,
            auto_allow_gw: true,
            max_vm_flows: 0,
        }
    }
}

impl EngineConfig {
    #[must_use]
    pub fn with_router_id(mut self, addr: IpAddr) -> Self {
        self.router_id = Some(addr);
        self
    }

    #[must_use]
    pub fn with_control_node(mut self, addr: IpAddr) -> Self {
        self.control_nodes.push(addr);
        self
    }

    #[must_use]
    pub fn with_dns_server(mut self, addr: IpAddr) -> Self {
        self.dns_servers.push(addr);
        self
    }

    #[must_use]
    pub fn with_collector(mut self, addr: IpAddr) -> Self {
        self.collectors.push(addr);
        self
    }

    #[must_use]
    pub fn with_max_vm_flows(mut self, max: usize) -> Self {
        self.max_vm_flows = max;
        self
    }

    fn is_fabric_service(&self, addr: &IpAddr) -> bool {
        self.control_nodes.contains(addr)
            || self.dns_servers.contains(addr)
            || self.collectors.contains(addr)
    }

    /// Traffic between this node and the fabric services it depends on,
    /// or ssh/ping to the node itself. Such flows are never subject to policy.
    #[must_use]
    pub fn is_fabric_control(&self, key: &FlowKey) -> bool {
        let Some(router_id) = self.router_id else {
            return false;
        };
        let (remote, local_port) = if key.src_addr == router_id {
            (key.dst_addr, key.src_port)
        } else if key.dst_addr == router_id {
            (key.src_addr, key.dst_port)
        } else {
            return false;
        };
        if self.is_fabric_service(&remote) {
            return true;
        }
        let proto = key.protocol();
        proto == IpNumber::ICMP || (proto == IpNumber::TCP && local_port == self.ssh_port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fabric_control() {
        let me: IpAddr = "192.0.2.10".parse().unwrap();
        let ctrl: IpAddr = "192.0.2.1".parse().unwrap();
        let other: IpAddr = "192.0.2.99".parse().unwrap();
        let config = EngineConfig::default()
            .with_router_id(me)
            .with_control_node(ctrl);

        let xmpp = FlowKey::new(0, IpNumber::TCP, me, ctrl, 40000, 5269);
        assert!(config.is_fabric_control(&xmpp));
        let ssh = FlowKey::new(0, IpNumber::TCP, other, me, 50000, 22);
        assert!(config.is_fabric_control(&ssh));
        let http = FlowKey::new(0, IpNumber::TCP, other, me, 50000, 80);
        assert!(!config.is_fabric_control(&http));
        let ping = FlowKey::new(0, IpNumber::ICMP, other, me, 0, 0);
        assert!(config.is_fabric_control(&ping));
        assert!(!EngineConfig::default().is_fabric_control(&ping));
    }
}
