//! Cached knowledge about the monitored OpenSIPS instance.
//!
//! Commands, processes and dialog profiles rarely change while OpenSIPS is
//! running, so they are discovered once and reused across passes. The whole
//! cache is dropped when the instance's uptime goes backwards.

use std::collections::{BTreeMap, BTreeSet};

use parking_lot::RwLock;
use tracing::info;

/// A worker process reported by `ps`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessInfo {
    pub id: String,
    /// Process type, trimmed.
    pub kind: String,
}

impl ProcessInfo {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
        }
    }
}

/// Consistent copy of the cache contents.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CapabilitySnapshot {
    /// MI commands the instance supports.
    pub commands: BTreeSet<String>,
    pub processes: Vec<ProcessInfo>,
    /// Dialog profile name to whether it carries values.
    pub profiles: BTreeMap<String, bool>,
    /// Uptime observed by the last pass that saw one.
    pub last_uptime: Option<f64>,
}

impl CapabilitySnapshot {
    pub fn has_command(&self, command: &str) -> bool {
        self.commands.contains(command)
    }
}

/// Capability cache shared by concurrent collection passes.
#[derive(Debug, Default)]
pub struct CapabilityCache {
    inner: RwLock<CapabilitySnapshot>,
}

impl CapabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> CapabilitySnapshot {
        self.inner.read().clone()
    }

    /// Replace every field at once.
    pub fn replace(
        &self,
        commands: BTreeSet<String>,
        processes: Vec<ProcessInfo>,
        profiles: BTreeMap<String, bool>,
        last_uptime: Option<f64>,
    ) {
        *self.inner.write() = CapabilitySnapshot {
            commands,
            processes,
            profiles,
            last_uptime,
        };
    }

    /// Forget everything.
    pub fn invalidate(&self) {
        *self.inner.write() = CapabilitySnapshot::default();
    }

    pub fn set_commands(&self, commands: BTreeSet<String>) {
        self.inner.write().commands = commands;
    }

    pub fn set_processes(&self, processes: Vec<ProcessInfo>) {
        self.inner.write().processes = processes;
    }

    pub fn set_profiles(&self, profiles: BTreeMap<String, bool>) {
        self.inner.write().profiles = profiles;
    }

    /// Record the uptime seen by a pass.
    ///
    /// Returns `true` if it is lower than the previous one, in which case the
    /// instance restarted and the cache has been cleared. The new uptime
    /// becomes the baseline either way.
    pub fn observe_uptime(&self, uptime: f64) -> bool {
        let mut inner = self.inner.write();

        let restarted = inner.last_uptime.is_some_and(|last| uptime < last);
        if restarted {
            info!(
                previous = inner.last_uptime,
                uptime, "OpenSIPS restart detected, clearing capability cache"
            );
            *inner = CapabilitySnapshot::default();
        }

        inner.last_uptime = Some(uptime);
        restarted
    }
}
