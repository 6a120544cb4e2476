// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Human-readable dumps of the tracing configuration

use ordermap::OrderMap;
use std::fmt::Write;

use crate::control::{TraceCtlError, TracingControl};

impl TracingControl {
    /// One line per target: name, level, module and tags.
    pub fn as_string(&self) -> Result<String, TraceCtlError> {
        let state = self.lock()?;
        let mut out = String::new();
        let _ = writeln!(out, "default: {}", state.default);
        for (name, t) in &state.targets {
            let _ = writeln!(
                out,
                " {name:<24} {:<6} {:<48} [{}]",
                t.level.to_string(),
                t.target.module,
                t.target.tags.join(",")
            );
        }
        Ok(out)
    }

    /// Targets grouped under each tag.
    pub fn as_string_by_tag(&self) -> Result<String, TraceCtlError> {
        let state = self.lock()?;
        let mut by_tag: OrderMap<&str, Vec<&str>> = OrderMap::new();
        for (name, t) in &state.targets {
            for tag in t.target.tags {
                by_tag.entry(*tag).or_default().push(*name);
            }
        }
        let mut out = String::new();
        for (tag, names) in by_tag {
            let _ = writeln!(out, " {tag}: {}", names.join(" "));
        }
        Ok(out)
    }
}
