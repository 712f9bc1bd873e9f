use crate::process::Process;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::debug;

#[derive(Default)]
struct RegistryInner {
    processes: HashMap<String, Arc<dyn Process>>,
    report: Vec<String>,
}

/// Process-wide table of running units
///
/// Created once at startup and shared by `Arc` between the executor and the
/// signal listener. The lock is never held across an await.
#[derive(Default)]
pub struct ApplicationRegistry {
    inner: Mutex<RegistryInner>,
    shutting_down: AtomicBool,
}

impl ApplicationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn register(&self, process: Arc<dyn Process>) {
        let id = process.id().to_string();
        debug!(unit = %id, "Registering running process");
        self.lock().processes.insert(id, process);
    }

    pub fn deregister(&self, id: &str) {
        debug!(unit = %id, "Removing running process");
        self.lock().processes.remove(id);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.lock().processes.contains_key(id)
    }

    /// Snapshot of the processes registered right now
    pub fn running_processes(&self) -> Vec<Arc<dyn Process>> {
        self.lock().processes.values().cloned().collect()
    }

    pub fn running_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.lock().processes.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn add_report(&self, entry: impl Into<String>) {
        self.lock().report.push(entry.into());
    }

    pub fn report(&self) -> Vec<String> {
        self.lock().report.clone()
    }

    pub fn set_shutting_down(&self) {
        self.shutting_down.store(true, Ordering::SeqCst);
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }
}
