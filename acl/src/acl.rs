// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! An ordered list of ACL entries

use std::collections::HashSet;
use std::fmt::Display;
use uuid::Uuid;

use crate::action::FlowAction;
use crate::entry::AclEntry;
use crate::errors::AclError;
use crate::header::PacketHeader;
use crate::matcher::{FlowPolicyInfo, MatchAclParams};

#[allow(unused)]
use tracing::{debug, trace};

pub type AclId = Uuid;

#[derive(Debug, Clone, PartialEq)]
pub struct Acl {
    pub id: AclId,
    pub name: String,
    entries: Vec<AclEntry>,
}

impl Acl {
    /// Build an ACL. Entry ids must be unique within the ACL.
    pub fn new(id: AclId, name: &str, entries: Vec<AclEntry>) -> Result<Self, AclError> {
        let mut seen = HashSet::new();
        for entry in &entries {
            if !seen.insert(entry.id) {
                return Err(AclError::DuplicateEntry(entry.id, name.to_owned()));
            }
        }
        Ok(Self {
            id,
            name: name.to_owned(),
            entries,
        })
    }

    #[must_use]
    pub fn entries(&self) -> &[AclEntry] {
        &self.entries
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Match a header against the entries of this ACL, in order.
    ///
    /// Actions of all matching entries up to and including the first terminal
    /// match are merged into `params.action_info`. Returns true if anything matched.
    pub fn packet_match(
        &self,
        hdr: &PacketHeader<'_>,
        params: &mut MatchAclParams,
        mut info: Option<&mut FlowPolicyInfo>,
    ) -> bool {
        params.action_info = FlowAction::default();
        params.terminal_rule = false;
        params.ace_id_list.clear();

        let mut matched = false;
        for entry in self.entries.iter().filter(|e| e.matches.matches(hdr)) {
            matched = true;
            params.ace_id_list.push(entry.id);
            let action = &mut params.action_info;
            action.action |= entry.action.action;
            action.mirror_l.extend(entry.action.mirror_l.iter().cloned());
            if !entry.action.vrf_translate.vrf_name.is_empty() {
                action.vrf_translate = entry.action.vrf_translate.clone();
            }
            if action.qos_config.is_none() {
                action.qos_config = entry.action.qos_config;
            }

            if let Some(info) = info.as_deref_mut() {
                info.record_match(self, entry, hdr);
            }
            if entry.terminal {
                params.terminal_rule = true;
                break;
            }
        }
        if matched {
            trace!(
                "acl {} matched {hdr}: entries {:?} action {}",
                self.name, params.ace_id_list, params.action_info.action
            );
        }
        matched
    }
}

impl Display for Acl {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "acl {} ({})", self.name, self.id)?;
        for e in &self.entries {
            writeln!(
                f,
                "  {:>4} {} proto:{} src:{} {} dst:{} {} -> {}",
                e.id,
                if e.terminal { "T" } else { " " },
                e.matches.protocol.map_or("any".to_string(), |p| p.0.to_string()),
                e.matches.src,
                e.matches.src_ports,
                e.matches.dst,
                e.matches.dst_ports,
                e.action.action
            )?;
        }
        Ok(())
    }
}
