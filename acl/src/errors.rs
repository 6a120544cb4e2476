// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! ACL errors

use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum AclError {
    #[error("Invalid port range {0}-{1}")]
    InvalidPortRange(u16, u16),
    #[error("Invalid prefix '{0}'")]
    InvalidPrefix(String),
    #[error("ACL entry {0} is duplicated in ACL {1}")]
    DuplicateEntry(u32, String),
}
