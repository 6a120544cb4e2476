// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Interface model and interface table

pub mod iftable;
pub mod interface;
