//! In-memory stores for tests and ephemeral sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::clock::{Clock, SystemClock};
use crate::error::{Error, Result};
use crate::models::{EntitySnapshot, NewOperation, Operation, OperationId, OperationPatch};

use super::{QueueStore, SnapshotStore};

fn lock<T>(mutex: &Mutex<T>) -> Result<MutexGuard<'_, T>> {
    mutex
        .lock()
        .map_err(|_| Error::Database("in-memory store lock poisoned".to_string()))
}

/// `QueueStore` backed by a `Vec`; nothing survives the process.
pub struct MemoryQueueStore {
    ops: Mutex<Vec<Operation>>,
    clock: Arc<dyn Clock>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            ops: Mutex::new(Vec::new()),
            clock,
        }
    }
}

impl Default for MemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl QueueStore for MemoryQueueStore {
    fn enqueue(&self, request: NewOperation) -> Result<Operation> {
        let op = Operation::new(request, self.clock.now_millis());
        lock(&self.ops)?.push(op.clone());
        Ok(op)
    }

    fn list(&self) -> Result<Vec<Operation>> {
        Ok(lock(&self.ops)?.clone())
    }

    fn get(&self, id: &OperationId) -> Result<Option<Operation>> {
        Ok(lock(&self.ops)?.iter().find(|op| op.id == *id).cloned())
    }

    fn update(&self, id: &OperationId, patch: OperationPatch) -> Result<()> {
        if let Some(op) = lock(&self.ops)?.iter_mut().find(|op| op.id == *id) {
            op.apply(patch);
        }
        Ok(())
    }

    fn remove(&self, id: &OperationId) -> Result<bool> {
        let mut ops = lock(&self.ops)?;
        let before = ops.len();
        ops.retain(|op| op.id != *id);
        Ok(ops.len() != before)
    }

    fn clear(&self) -> Result<()> {
        lock(&self.ops)?.clear();
        Ok(())
    }
}

/// `SnapshotStore` backed by a `HashMap`.
#[derive(Default)]
pub struct MemorySnapshotStore {
    snapshots: Mutex<HashMap<(String, String), EntitySnapshot>>,
}

impl MemorySnapshotStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SnapshotStore for MemorySnapshotStore {
    fn put(&self, snapshot: &EntitySnapshot) -> Result<()> {
        let key = (snapshot.entity_type.clone(), snapshot.id.clone());
        lock(&self.snapshots)?.insert(key, snapshot.clone());
        Ok(())
    }

    fn get(&self, entity_type: &str, id: &str) -> Result<Option<EntitySnapshot>> {
        let key = (entity_type.to_string(), id.to_string());
        Ok(lock(&self.snapshots)?.get(&key).cloned())
    }

    fn clear(&self) -> Result<()> {
        lock(&self.snapshots)?.clear();
        Ok(())
    }
}
