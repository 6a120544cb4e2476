// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Interface model

use crate::route::MacAddr;
use crate::vn::VnId;
use acl::{Acl, HbsSide, QosConfigIdx, SgId, VrfId};
use std::fmt::Display;
use std::net::IpAddr;
use std::sync::Arc;
use uuid::Uuid;

#[allow(unused)]
use tracing::{debug, error, info};

pub type IfIndex = u32;

#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum VmiType {
    #[default]
    Instance,
    /// Bare-metal server behind a ToR; its layer-3 address may be unknown
    Baremetal,
    Gateway,
}

/// Specific data for interfaces of virtual machines
#[derive(Clone, Debug, PartialEq)]
pub struct VmInterface {
    pub vn: Option<VnId>,
    pub vrf: VrfId,
    pub vm: Option<Uuid>,
    pub mac: MacAddr,
    pub ip: Option<IpAddr>,
    pub sg_list: Vec<SgId>,
    pub vrf_assign_acl: Option<Arc<Acl>>,
    /// Application policy set (firewall) ACLs attached to the port
    pub fw_acls: Vec<Arc<Acl>>,
    pub policy_enabled: bool,
    pub vmi_type: VmiType,
    /// Gateway and DNS server addresses handed to the VM
    pub gateways: Vec<IpAddr>,
    pub label: u32,
    pub hbs_side: Option<HbsSide>,
    pub qos_config: Option<QosConfigIdx>,
}

impl VmInterface {
    #[must_use]
    pub fn new(vn: VnId, vrf: VrfId, mac: MacAddr, ip: IpAddr) -> Self {
        Self {
            vn: Some(vn),
            vrf,
            vm: None,
            mac,
            ip: Some(ip),
            sg_list: Vec::new(),
            vrf_assign_acl: None,
            fw_acls: Vec::new(),
            policy_enabled: true,
            vmi_type: VmiType::Instance,
            gateways: Vec::new(),
            label: 0,
            hbs_side: None,
            qos_config: None,
        }
    }

    #[must_use]
    pub fn with_sgs(mut self, sgs: &[SgId]) -> Self {
        self.sg_list = sgs.to_vec();
        self
    }

    #[must_use]
    pub fn with_vrf_assign_acl(mut self, acl: Arc<Acl>) -> Self {
        self.vrf_assign_acl = Some(acl);
        self
    }

    #[must_use]
    pub fn with_fw_acl(mut self, acl: Arc<Acl>) -> Self {
        self.fw_acls.push(acl);
        self
    }

    #[must_use]
    pub fn with_gateway(mut self, gw: IpAddr) -> Self {
        self.gateways.push(gw);
        self
    }

    #[must_use]
    pub fn with_vm(mut self, vm: Uuid) -> Self {
        self.vm = Some(vm);
        self
    }

    #[must_use]
    pub fn with_type(mut self, vmi_type: VmiType) -> Self {
        self.vmi_type = vmi_type;
        self
    }

    #[must_use]
    pub fn with_label(mut self, label: u32) -> Self {
        self.label = label;
        self
    }

    #[must_use]
    pub fn with_hbs(mut self, side: HbsSide) -> Self {
        self.hbs_side = Some(side);
        self
    }

    #[must_use]
    pub fn with_qos(mut self, qos: QosConfigIdx) -> Self {
        self.qos_config = Some(qos);
        self
    }
}

/// Specific data for the host-side (vhost) interface
#[derive(Clone, Debug, PartialEq)]
pub struct InetInterface {
    pub vrf: VrfId,
    pub label: u32,
}

/// Type that contains data specific to the kind of interface
#[derive(Clone, Debug, PartialEq)]
pub enum InterfaceKind {
    Vm(VmInterface),
    Physical,
    Inet(InetInterface),
}

/// An object representing an interface of the vrouter
#[derive(Debug, Clone, PartialEq)]
pub struct Interface {
    pub ifindex: IfIndex,
    pub name: String,
    pub uuid: Uuid,
    pub kind: InterfaceKind,
    pub active: bool,
}

impl Interface {
    //////////////////////////////////////////////////////////////////
    /// Create an [`Interface`] of the given kind. Interfaces start active.
    //////////////////////////////////////////////////////////////////
    #[must_use]
    pub fn new(ifindex: IfIndex, name: &str, kind: InterfaceKind) -> Self {
        Self {
            ifindex,
            name: name.to_owned(),
            uuid: Uuid::from_u128(u128::from(ifindex)),
            kind,
            active: true,
        }
    }

    #[must_use]
    pub fn vm(ifindex: IfIndex, name: &str, vmi: VmInterface) -> Self {
        Self::new(ifindex, name, InterfaceKind::Vm(vmi))
    }

    //////////////////////////////////////////////////////////////////
    /// Get the VM-specific data of an [`Interface`], if it is a VM port
    //////////////////////////////////////////////////////////////////
    #[must_use]
    pub fn as_vm(&self) -> Option<&VmInterface> {
        match &self.kind {
            InterfaceKind::Vm(vmi) => Some(vmi),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_vm(&self) -> bool {
        matches!(self.kind, InterfaceKind::Vm(_))
    }

    #[must_use]
    pub fn is_baremetal(&self) -> bool {
        self.as_vm()
            .is_some_and(|vmi| vmi.vmi_type == VmiType::Baremetal)
    }

    /// The mpls label traffic to this interface is sent with
    #[must_use]
    pub fn label(&self) -> Option<u32> {
        match &self.kind {
            InterfaceKind::Vm(vmi) => Some(vmi.label),
            InterfaceKind::Inet(inet) => Some(inet.label),
            InterfaceKind::Physical => None,
        }
    }

    //////////////////////////////////////////////////////////////////
    /// Set the operational state of an [`Interface`]
    //////////////////////////////////////////////////////////////////
    pub(crate) fn set_active(&mut self, active: bool) {
        if self.active != active {
            info!(
                "Operational state of interface {} changed: {} -> {}",
                self.name, self.active, active
            );
            self.active = active;
        }
    }
}

impl Display for Interface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.kind {
            InterfaceKind::Vm(_) => "vm",
            InterfaceKind::Physical => "physical",
            InterfaceKind::Inet(_) => "inet",
        };
        write!(f, "{} ({kind}, ifindex {})", self.name, self.ifindex)
    }
}
