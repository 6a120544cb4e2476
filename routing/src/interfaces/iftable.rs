// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! A table of interfaces

use crate::errors::OperError;
use crate::interfaces::interface::{IfIndex, Interface};
use ahash::RandomState;
use std::collections::HashMap;

#[allow(unused)]
use tracing::{debug, error, info};

#[derive(Clone, Debug)]
/// A table of interface objects, keyed by `IfIndex`
pub struct IfTable {
    by_index: HashMap<IfIndex, Interface, RandomState>,
}

#[allow(clippy::new_without_default)]
impl IfTable {
    //////////////////////////////////////////////////////////////////
    /// Create an interface table. All interfaces should live here.
    //////////////////////////////////////////////////////////////////
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_index: HashMap::with_hasher(RandomState::with_seed(0)),
        }
    }
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_index.len()
    }
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_index.is_empty()
    }
    #[must_use]
    pub fn contains(&self, ifindex: IfIndex) -> bool {
        self.by_index.contains_key(&ifindex)
    }
    pub fn values(&self) -> impl Iterator<Item = &Interface> {
        self.by_index.values()
    }

    //////////////////////////////////////////////////////////////////
    /// Add an [`Interface`] to the table
    //////////////////////////////////////////////////////////////////
    pub(crate) fn add_interface(&mut self, iface: Interface) -> Result<(), OperError> {
        let ifindex = iface.ifindex;
        if self.contains(ifindex) {
            error!("Failed to add interface with ifindex {ifindex}: already exists!");
            return Err(OperError::InterfaceExists(ifindex));
        }
        debug!("Added interface {iface} to the interface table");
        self.by_index.insert(ifindex, iface);
        Ok(())
    }

    //////////////////////////////////////////////////////////////////
    /// Replace an existing [`Interface`] with a new version of it
    //////////////////////////////////////////////////////////////////
    pub(crate) fn mod_interface(&mut self, iface: Interface) -> Result<(), OperError> {
        let ifindex = iface.ifindex;
        let Some(current) = self.by_index.get_mut(&ifindex) else {
            error!("Failed to modify interface with ifindex {ifindex}: not found");
            return Err(OperError::NoSuchInterface(ifindex));
        };
        *current = iface;
        debug!("Modified interface with ifindex {ifindex}");
        Ok(())
    }

    //////////////////////////////////////////////////////////////////
    /// Remove an interface from the table
    //////////////////////////////////////////////////////////////////
    pub(crate) fn del_interface(&mut self, ifindex: IfIndex) {
        if let Some(iface) = self.by_index.remove(&ifindex) {
            debug!("Deleted interface '{}'", iface.name);
        }
    }

    //////////////////////////////////////////////////////////////////
    /// Get an immutable reference to an [`Interface`]
    //////////////////////////////////////////////////////////////////
    #[must_use]
    pub fn get_interface(&self, ifindex: IfIndex) -> Option<&Interface> {
        self.by_index.get(&ifindex)
    }

    //////////////////////////////////////////////////////////////////////
    /// Set the operational state of an [`Interface`]
    //////////////////////////////////////////////////////////////////////
    pub(crate) fn set_iface_active(&mut self, ifindex: IfIndex, active: bool) {
        if let Some(iface) = self.by_index.get_mut(&ifindex) {
            iface.set_active(active);
        }
    }
}
