use std::collections::HashMap;
use std::sync::Arc;

use nix::sys::signal::Signal;
use parking_lot::RwLock;
use tracing::{info, warn};

use crate::error::SupervisorError;
use crate::events::EventBus;
use crate::process::{self, ProcessRecord, SpawnSpec};
use crate::signal::parse_signal;

/// Registry of live processes, keyed by the caller-visible process id
/// (§3 ProcessTable). One table per daemon; every `Backend` method that
/// touches a specific process goes through here.
#[derive(Clone)]
pub struct ProcessTable {
    processes: Arc<RwLock<HashMap<String, Arc<ProcessRecord>>>>,
    events: Arc<EventBus>,
}

impl ProcessTable {
    pub fn new(events: Arc<EventBus>) -> Self {
        Self {
            processes: Arc::new(RwLock::new(HashMap::new())),
            events,
        }
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    /// Spawns a new process and registers it under its assigned id. Fails if
    /// the caller supplied an id already in use (§4.2 I1: ids are unique for
    /// the lifetime of the daemon process, not just while running).
    pub async fn spawn(&self, spec: SpawnSpec) -> Result<String, SupervisorError> {
        if let Some(id) = &spec.id {
            if self.processes.read().contains_key(id) {
                return Err(SupervisorError::DuplicateId { id: id.clone() });
            }
        }

        let record = process::spawn(spec, Arc::clone(&self.events)).await?;
        let id = record.id().to_string();
        self.processes.write().insert(id.clone(), record);
        info!(id = %id, "process spawned");
        Ok(id)
    }

    pub fn kill(&self, id: &str, signal_name: &str) -> Result<(), SupervisorError> {
        let record = self.lookup(id)?;
        let sig: Signal = parse_signal(signal_name);
        record.kill(sig)
    }

    pub async fn write_stdin(&self, id: &str, data: &[u8]) -> Result<(), SupervisorError> {
        let record = self.lookup(id)?;
        record.write_stdin(data).await
    }

    pub fn is_running(&self, id: &str) -> Result<bool, SupervisorError> {
        let record = self.lookup(id)?;
        Ok(record.is_running())
    }

    /// Signals every tracked process (§4.3, used on daemon shutdown). Errors
    /// signalling one process do not stop the sweep over the rest.
    pub fn kill_all(&self, signal: Signal) {
        let ids: Vec<String> = self.processes.read().keys().cloned().collect();
        for id in ids {
            if let Ok(record) = self.lookup(&id) {
                if let Err(err) = record.kill(signal) {
                    warn!(id = %id, error = %err, "failed to signal process during shutdown sweep");
                }
            }
        }
    }

    fn lookup(&self, id: &str) -> Result<Arc<ProcessRecord>, SupervisorError> {
        self.processes
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| SupervisorError::UnknownProcess { id: id.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::path_remap::PathRemap;
    use std::collections::BTreeMap;

    fn echo_spec(id: &str, text: &str) -> SpawnSpec {
        SpawnSpec {
            id: Some(id.to_string()),
            command: "/bin/echo".to_string(),
            args: vec![text.to_string()],
            env: BTreeMap::new(),
            cwd: None,
            remap: PathRemap::new("", ""),
        }
    }

    #[tokio::test]
    async fn spawn_rejects_duplicate_id() {
        let table = ProcessTable::new(Arc::new(EventBus::new()));
        table.spawn(echo_spec("dup", "one")).await.unwrap();
        let second = table.spawn(echo_spec("dup", "two")).await;
        assert!(matches!(second, Err(SupervisorError::DuplicateId { .. })));
    }

    #[tokio::test]
    async fn unknown_id_surfaces_as_unknown_process() {
        let table = ProcessTable::new(Arc::new(EventBus::new()));
        let result = table.is_running("nope");
        assert!(matches!(result, Err(SupervisorError::UnknownProcess { .. })));
    }

    #[tokio::test]
    async fn spawned_process_is_reported_running_then_exits() {
        let table = ProcessTable::new(Arc::new(EventBus::new()));
        table.spawn(echo_spec("runner", "hi")).await.unwrap();

        // Process exits almost immediately; poll briefly instead of sleeping
        // a fixed duration the scheduler might not honor under load.
        for _ in 0..200 {
            if !table.is_running("runner").unwrap() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        panic!("echo process never reported as exited");
    }
}
