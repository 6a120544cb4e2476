// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use crate::flow_key::FlowKey;
use crate::table::FlowIndex;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FlowError {
    #[error("Flow table full ({0} entries)")]
    TableFull(usize),
    #[error("Stale flow handle {0}")]
    StaleHandle(FlowIndex),
    #[error("Flow {0} already exists")]
    KeyExists(FlowKey),
    #[error("Forward and reverse flow share key {0}")]
    SameKey(FlowKey),
    #[error("Flow pair invariant violated at {0}")]
    PairInvariant(FlowIndex),
    #[error("No such pending action {0}")]
    NoSuchPendingAction(u8),
}

#[derive(Debug, thiserror::Error)]
pub enum LinkLocalError {
    #[error("Linklocal flow limit {0} reached")]
    LimitReached(usize),
    #[error("Unsupported protocol {0} for linklocal port binding")]
    UnsupportedProtocol(u8),
    #[error("Socket failure: {0}")]
    Socket(#[from] std::io::Error),
    #[error("Internal failure: {0}")]
    InternalFailure(&'static str),
}
