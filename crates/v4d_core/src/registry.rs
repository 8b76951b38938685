//! Process registry for handing staged processes to front ends.

use std::collections::HashMap;

use tracing::debug;

use crate::error::{CoreError, CoreResult};
use crate::process::ProcessSnapshot;
use crate::runner::StagedProcess;

/// A registry of staged processes.
///
/// The registry maps process names to their handles, so request handlers
/// receive explicitly owned state instead of reaching for globals.
#[derive(Default)]
pub struct ProcessRegistry {
    processes: HashMap<String, StagedProcess>,
}

impl ProcessRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            processes: HashMap::new(),
        }
    }

    /// Register a process under its `name()`.
    ///
    /// If a process with the same name already exists, it will be replaced.
    pub fn register(&mut self, process: StagedProcess) {
        let name = process.name().to_string();
        debug!("Registering process: {}", name);
        self.processes.insert(name, process);
    }

    /// Get a process by name.
    pub fn get(&self, name: &str) -> Option<StagedProcess> {
        self.processes.get(name).cloned()
    }

    /// Get a process by name, returning an error if not found.
    pub fn get_required(&self, name: &str) -> CoreResult<StagedProcess> {
        self.get(name)
            .ok_or_else(|| CoreError::ProcessNotFound(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        self.processes.contains_key(name)
    }

    /// Get all registered process names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.processes.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.processes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Remove a process from the registry.
    pub fn unregister(&mut self, name: &str) -> Option<StagedProcess> {
        debug!("Unregistering process: {}", name);
        self.processes.remove(name)
    }

    /// Snapshots of every process, ordered by name.
    pub fn snapshots(&self) -> Vec<ProcessSnapshot> {
        self.names()
            .into_iter()
            .filter_map(|name| self.processes.get(name))
            .map(StagedProcess::status)
            .collect()
    }

    /// Stop every running process. Returns how many were stopped.
    pub fn stop_all(&self) -> usize {
        self.processes.values().filter(|p| p.stop()).count()
    }
}

impl std::fmt::Debug for ProcessRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessRegistry")
            .field("processes", &self.names())
            .finish()
    }
}
