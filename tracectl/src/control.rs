// SPDX-License-Identifier: Apache-2.0
// Copyright Open Network Fabric Authors

//! Runtime control of the log level of each registered trace target

use ordermap::OrderMap;
use std::sync::{LazyLock, Mutex, MutexGuard, OnceLock};
use thiserror::Error;
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{Registry, fmt, reload};

use crate::targets::{TRACE_TARGETS, TraceTarget};

pub const DEFAULT_DEFAULT_LOGLEVEL: LevelFilter = LevelFilter::INFO;

#[derive(Debug, Error, PartialEq)]
pub enum TraceCtlError {
    #[error("Unknown trace target '{0}'")]
    UnknownTarget(String),
    #[error("Unknown trace tag '{0}'")]
    UnknownTag(String),
    #[error("Invalid log level '{0}'")]
    InvalidLevel(String),
    #[error("Malformed tracing directive '{0}'")]
    InvalidDirective(String),
    #[error("Failed to install subscriber: {0}")]
    InitFailure(String),
    #[error("Failed to reload filter: {0}")]
    ReloadFailure(String),
    #[error("Internal failure: {0}")]
    InternalFailure(&'static str),
}

#[derive(Debug)]
pub(crate) struct TargetState {
    pub(crate) target: &'static TraceTarget,
    pub(crate) level: LevelFilter,
}

#[derive(Debug)]
pub(crate) struct TraceCtlState {
    pub(crate) default: LevelFilter,
    pub(crate) targets: OrderMap<&'static str, TargetState>,
}

impl TraceCtlState {
    fn new() -> Self {
        let mut targets = OrderMap::new();
        for target in TRACE_TARGETS.iter() {
            targets.insert(
                target.name,
                TargetState {
                    target,
                    level: target.level,
                },
            );
        }
        Self {
            default: DEFAULT_DEFAULT_LOGLEVEL,
            targets,
        }
    }

    fn directives(&self) -> String {
        self.targets
            .values()
            .map(|s| format!("{}={}", s.target.module, s.level))
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// The object that owns the tracing filter of the process.
pub struct TracingControl {
    state: Mutex<TraceCtlState>,
    reload: OnceLock<reload::Handle<EnvFilter, Registry>>,
}

static TRACING_CONTROL: LazyLock<TracingControl> = LazyLock::new(TracingControl::new);

/// Get the process-wide tracing control object
#[must_use]
pub fn get_trace_ctl() -> &'static TracingControl {
    &TRACING_CONTROL
}

fn parse_level(level: &str) -> Result<LevelFilter, TraceCtlError> {
    level
        .trim()
        .parse::<LevelFilter>()
        .map_err(|_| TraceCtlError::InvalidLevel(level.to_string()))
}

impl TracingControl {
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(TraceCtlState::new()),
            reload: OnceLock::new(),
        }
    }

    pub(crate) fn lock(&self) -> Result<MutexGuard<'_, TraceCtlState>, TraceCtlError> {
        self.state
            .lock()
            .map_err(|_| TraceCtlError::InternalFailure("tracing control lock poisoned"))
    }

    fn build_filter(state: &TraceCtlState) -> Result<EnvFilter, TraceCtlError> {
        let directives = state.directives();
        EnvFilter::builder()
            .with_default_directive(state.default.into())
            .parse(&directives)
            .map_err(|e| TraceCtlError::InvalidDirective(format!("{directives}: {e}")))
    }

    fn apply(&self, state: &TraceCtlState) -> Result<(), TraceCtlError> {
        let Some(handle) = self.reload.get() else {
            return Ok(());
        };
        let filter = Self::build_filter(state)?;
        handle
            .reload(filter)
            .map_err(|e| TraceCtlError::ReloadFailure(e.to_string()))
    }

    /// Install a global subscriber whose filter is governed by this object.
    pub fn init(&self) -> Result<(), TraceCtlError> {
        let state = self.lock()?;
        let filter = Self::build_filter(&state)?;
        let (layer, handle) = reload::Layer::new(filter);
        tracing_subscriber::registry()
            .with(layer)
            .with(fmt::layer().with_target(true))
            .try_init()
            .map_err(|e| TraceCtlError::InitFailure(e.to_string()))?;
        self.reload
            .set(handle)
            .map_err(|_| TraceCtlError::InternalFailure("subscriber installed twice"))
    }

    pub fn set_default_level(&self, level: LevelFilter) -> Result<(), TraceCtlError> {
        let mut state = self.lock()?;
        state.default = level;
        self.apply(&state)
    }

    pub fn set_level(&self, name: &str, level: LevelFilter) -> Result<(), TraceCtlError> {
        let mut state = self.lock()?;
        let target = state
            .targets
            .get_mut(name)
            .ok_or_else(|| TraceCtlError::UnknownTarget(name.to_string()))?;
        target.level = level;
        self.apply(&state)
    }

    /// Set the level of every target carrying `tag`.
    pub fn set_tag_level(&self, tag: &str, level: LevelFilter) -> Result<(), TraceCtlError> {
        let mut state = self.lock()?;
        let mut found = false;
        for target in state.targets.values_mut().filter(|t| t.target.has_tag(tag)) {
            target.level = level;
            found = true;
        }
        if !found {
            return Err(TraceCtlError::UnknownTag(tag.to_string()));
        }
        self.apply(&state)
    }

    pub fn get_level(&self, name: &str) -> Result<LevelFilter, TraceCtlError> {
        let state = self.lock()?;
        state
            .targets
            .get(name)
            .map(|t| t.level)
            .ok_or_else(|| TraceCtlError::UnknownTarget(name.to_string()))
    }

    /// Configure levels from a string like `default=warn,flow-policy=debug,flow=trace`.
    /// Each key is tried as a target name first, then as a tag.
    pub fn setup_from_string(&self, input: &str) -> Result<(), TraceCtlError> {
        for item in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let Some((key, level)) = item.split_once('=') else {
                return Err(TraceCtlError::InvalidDirective(item.to_string()));
            };
            let level = parse_level(level)?;
            let key = key.trim();
            if key == "default" {
                self.set_default_level(level)?;
                continue;
            }
            match self.set_level(key, level) {
                Err(TraceCtlError::UnknownTarget(_)) => self.set_tag_level(key, level)?,
                other => other?,
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    crate::trace_target!("tracectl-ctl-test", LevelFilter::INFO, &["ctl-tag"]);

    #[test]
    fn test_tracectl_set_level() {
        let tctl = TracingControl::new();
        assert_eq!(tctl.get_level("tracectl-ctl-test"), Ok(LevelFilter::INFO));
        tctl.set_level("tracectl-ctl-test", LevelFilter::TRACE).unwrap();
        assert_eq!(tctl.get_level("tracectl-ctl-test"), Ok(LevelFilter::TRACE));
        assert_eq!(
            tctl.set_level("no-such-target", LevelFilter::TRACE),
            Err(TraceCtlError::UnknownTarget("no-such-target".to_string()))
        );
    }

    #[test]
    fn test_tracectl_setup_from_string() {
        let tctl = TracingControl::new();
        tctl.setup_from_string("default=warn, ctl-tag=debug").unwrap();
        assert_eq!(tctl.get_level("tracectl-ctl-test"), Ok(LevelFilter::DEBUG));
        assert_eq!(tctl.lock().unwrap().default, LevelFilter::WARN);

        assert!(matches!(
            tctl.setup_from_string("tracectl-ctl-test=loud"),
            Err(TraceCtlError::InvalidLevel(_))
        ));
        assert!(matches!(
            tctl.setup_from_string("justatarget"),
            Err(TraceCtlError::InvalidDirective(_))
        ));
        assert!(matches!(
            tctl.setup_from_string("nothing-named-so=info"),
            Err(TraceCtlError::UnknownTag(_))
        ));
    }

    #[test]
    fn test_tracectl_filter_builds() {
        let tctl = TracingControl::new();
        let state = tctl.lock().unwrap();
        assert!(TracingControl::build_filter(&state).is_ok());
    }
}
