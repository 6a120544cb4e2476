// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Coalescing of change notifications into one pending action per flow

use crate::errors::FlowError;
use std::fmt::Display;

/// Work outstanding for a flow. Variants are ordered: a higher action
/// subsumes every lower one.
#[repr(u8)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PendingAction {
    #[default]
    None = 0,
    /// Re-run policy against unchanged route data
    Revaluate = 1,
    /// Re-read route and nexthop data, then re-run policy
    RecomputeDbEntry = 2,
    /// Rebuild the flow from scratch
    Recompute = 3,
    Delete = 4,
}

impl Display for PendingAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::None => write!(f, "none"),
            Self::Revaluate => write!(f, "revaluate"),
            Self::RecomputeDbEntry => write!(f, "recompute-db-entry"),
            Self::Recompute => write!(f, "recompute"),
            Self::Delete => write!(f, "delete"),
        }
    }
}

impl TryFrom<u8> for PendingAction {
    type Error = FlowError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(PendingAction::None),
            1 => Ok(PendingAction::Revaluate),
            2 => Ok(PendingAction::RecomputeDbEntry),
            3 => Ok(PendingAction::Recompute),
            4 => Ok(PendingAction::Delete),
            v => Err(FlowError::NoSuchPendingAction(v)),
        }
    }
}

impl From<PendingAction> for u8 {
    fn from(action: PendingAction) -> Self {
        action as u8
    }
}

/// Pending action of one flow. Between notifications the value only grows;
/// it drops back when the work is actually carried out.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PendingState {
    action: PendingAction,
}

impl PendingState {
    #[must_use]
    pub fn get(&self) -> PendingAction {
        self.action
    }

    /// Record a notification. Returns true if the caller must queue work
    /// for the flow, false if equal or higher work is already queued.
    pub fn escalate(&mut self, action: PendingAction) -> bool {
        if action > self.action {
            self.action = action;
            true
        } else {
            false
        }
    }

    /// Whether dequeued work for `action` should run. Work superseded by a
    /// higher pending action is skipped; that action has its own queue entry.
    /// Work that was already carried out is skipped too.
    #[must_use]
    pub fn should_process(&self, action: PendingAction) -> bool {
        self.action != PendingAction::None && self.action <= action
    }

    /// Work for `action` was carried out: it and everything below is done
    pub fn complete(&mut self, action: PendingAction) {
        if self.action <= action {
            self.action = PendingAction::None;
        }
    }

    #[must_use]
    pub fn is_deleting(&self) -> bool {
        self.action == PendingAction::Delete
    }
}
