// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Link-time registry of trace targets.
//!
//! Every crate declares the targets it logs under with [`trace_target!`](crate::trace_target).
//! The declarations are gathered into [`TRACE_TARGETS`] by the linker, so the control
//! object can enumerate them without any runtime registration step.

use linkme::distributed_slice;
use tracing_subscriber::filter::LevelFilter;

/// A named trace target, bound to the module that declared it.
#[derive(Debug)]
pub struct TraceTarget {
    pub name: &'static str,
    pub module: &'static str,
    pub level: LevelFilter,
    pub tags: &'static [&'static str],
}

impl TraceTarget {
    #[must_use]
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(&tag)
    }
}

#[distributed_slice]
pub static TRACE_TARGETS: [TraceTarget];

/// Declare a trace target for the enclosing module.
///
/// ```ignore
/// use vrouter_tracectl::trace_target;
/// trace_target!("flow-policy", LevelFilter::INFO, &["flow"]);
/// ```
#[macro_export]
macro_rules! trace_target {
    ($name:expr, $level:expr, $tags:expr) => {
        const _: () = {
            #[allow(unused_imports)]
            use $crate::LevelFilter;
            #[$crate::linkme::distributed_slice($crate::targets::TRACE_TARGETS)]
            #[linkme(crate = $crate::linkme)]
            static TARGET: $crate::targets::TraceTarget = $crate::targets::TraceTarget {
                name: $name,
                module: module_path!(),
                level: $level,
                tags: $tags,
            };
        };
    };
}

/// Look up a registered target by name.
#[must_use]
pub fn find_target(name: &str) -> Option<&'static TraceTarget> {
    TRACE_TARGETS.iter().find(|t| t.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    crate::trace_target!("tracectl-test", LevelFilter::WARN, &["test-tag"]);

    #[test]
    fn test_trace_target_registered() {
        let target = find_target("tracectl-test").unwrap();
        assert_eq!(target.level, LevelFilter::WARN);
        assert!(target.has_tag("test-tag"));
        assert!(target.module.ends_with("targets::tests"));
    }
}
