// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Flow management parameters

use crate::errors::FlowMgmtError;
use derive_builder::Builder;
use std::time::Duration;

pub const DEFAULT_PARTITIONS: usize = 4;
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;
pub const DEFAULT_TABLE_CAPACITY: usize = 512 * 1024;

#[derive(Builder, Clone, Debug, PartialEq)]
#[builder(build_fn(validate = "Self::check"))]
pub struct FlowMgmtParams {
    /// Number of flow partitions. Each partition runs on its own task.
    #[builder(default = "DEFAULT_PARTITIONS")]
    pub partitions: usize,

    /// Requests that may be queued to one partition
    #[builder(default = "DEFAULT_QUEUE_DEPTH")]
    pub queue_depth: usize,

    /// Flows one partition holds, forward and reverse counted separately
    #[builder(default = "DEFAULT_TABLE_CAPACITY")]
    pub table_capacity: usize,

    /// Linklocal flows allowed on the host
    #[builder(default = "1024")]
    pub linklocal_max: usize,

    /// Linklocal flows allowed per VM
    #[builder(default = "64")]
    pub linklocal_max_per_vm: usize,

    /// How long a released linklocal socket is kept before it is closed
    #[builder(default = "Duration::from_secs(5)")]
    pub linklocal_aging: Duration,

    #[builder(default = "Duration::from_secs(1)")]
    pub sweep_interval: Duration,

    #[builder(setter(into), default = "\"flow-part\".to_string()")]
    pub name_prefix: String,
}

impl FlowMgmtParamsBuilder {
    fn check(&self) -> Result<(), String> {
        let params = FlowMgmtParams {
            partitions: self.partitions.unwrap_or(DEFAULT_PARTITIONS),
            queue_depth: self.queue_depth.unwrap_or(DEFAULT_QUEUE_DEPTH),
            table_capacity: self.table_capacity.unwrap_or(DEFAULT_TABLE_CAPACITY),
            linklocal_max: self.linklocal_max.unwrap_or(1024),
            linklocal_max_per_vm: self.linklocal_max_per_vm.unwrap_or(64),
            linklocal_aging: self.linklocal_aging.unwrap_or(Duration::from_secs(5)),
            sweep_interval: self.sweep_interval.unwrap_or(Duration::from_secs(1)),
            name_prefix: String::new(),
        };
        params.validate().map_err(|e| e.to_string())
    }
}

impl Default for FlowMgmtParams {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            table_capacity: DEFAULT_TABLE_CAPACITY,
            linklocal_max: 1024,
            linklocal_max_per_vm: 64,
            linklocal_aging: Duration::from_secs(5),
            sweep_interval: Duration::from_secs(1),
            name_prefix: "flow-part".to_string(),
        }
    }
}

impl FlowMgmtParams {
    /// Reject parameter combinations the partitions cannot run with
    pub fn validate(&self) -> Result<(), FlowMgmtError> {
        let invalid = |msg: &str| Err(FlowMgmtError::InvalidParams(msg.to_string()));
        if self.partitions == 0 {
            return invalid("at least one partition is needed");
        }
        if self.queue_depth == 0 {
            return invalid("queue depth must be positive");
        }
        // a flow pair takes two entries
        if self.table_capacity < 2 {
            return invalid("table capacity must fit a flow pair");
        }
        if self.linklocal_max_per_vm > self.linklocal_max {
            return invalid("per-vm linklocal limit exceeds the host limit");
        }
        if self.sweep_interval.is_zero() {
            return invalid("sweep interval must be positive");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_params_defaults() {
        let params = FlowMgmtParamsBuilder::default().build().unwrap();
        assert_eq!(params, FlowMgmtParams::default());
        assert!(params.validate().is_ok());
    }

    #[test]
    fn test_params_rejected() {
        assert!(FlowMgmtParamsBuilder::default().partitions(0).build().is_err());
        assert!(
            FlowMgmtParamsBuilder::default()
                .linklocal_max(8)
                .linklocal_max_per_vm(16)
                .build()
                .is_err()
        );
        let params = FlowMgmtParams {
            table_capacity: 1,
            ..Default::default()
        };
        assert!(matches!(params.validate(), Err(FlowMgmtError::InvalidParams(_))));
    }

    #[test]
    fn test_params_builder() {
        let params = FlowMgmtParamsBuilder::default()
            .partitions(2)
            .name_prefix("test")
            .sweep_interval(Duration::from_millis(100))
            .build()
            .unwrap();
        assert_eq!(params.partitions, 2);
        assert_eq!(params.name_prefix, "test");
        assert_eq!(params.queue_depth, DEFAULT_QUEUE_DEPTH);
    }
}
