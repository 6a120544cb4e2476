// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

use flow_entry::{FlowError, FlowKey};

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum FlowMgmtError {
    #[error("Invalid flow management parameters: {0}")]
    InvalidParams(String),
    #[error("Channel to partition {0} is closed")]
    ChannelClosed(usize),
    #[error("Partition {0} dropped the reply")]
    NoReply(usize),
    #[error("No oper db snapshot is published")]
    NoSnapshot,
    #[error("No flow {0}")]
    NoSuchFlow(FlowKey),
    #[error(transparent)]
    Flow(#[from] FlowError),
}
