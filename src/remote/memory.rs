//! In-process remote store with failure injection.
//!
//! Faults are armed explicitly and consumed per operation:
//!
//! - `fail_next(n)`: the next `n` operations fail, whatever they address
//! - `fail_entity(id)`: every operation on that id fails until cleared
//! - `set_latency(d)`: every call sleeps `d` before touching documents
//!
//! Failures are decided before a document is touched, so a failed single
//! write never leaves a trace. Batches stop at the first failing operation
//! and keep what was already applied. Only calls that fully succeed are
//! broadcast to subscribers.

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use super::{merge_fields, BatchOp, RemoteSnapshot, RemoteStore, SNAPSHOT_CHANNEL_CAPACITY};
use crate::error::{Error, Result};
use crate::state::{EntityKind, EntityRef};

type Collection = BTreeMap<String, Map<String, Value>>;

#[derive(Debug, Default)]
struct Documents {
    projects: Collection,
    groups: Collection,
}

impl Documents {
    fn collection_mut(&mut self, kind: EntityKind) -> &mut Collection {
        match kind {
            EntityKind::Project => &mut self.projects,
            EntityKind::Group => &mut self.groups,
        }
    }

    fn collection(&self, kind: EntityKind) -> &Collection {
        match kind {
            EntityKind::Project => &self.projects,
            EntityKind::Group => &self.groups,
        }
    }

    fn apply(&mut self, op: BatchOp) {
        match op {
            BatchOp::Set { entity, fields } => {
                let document = self
                    .collection_mut(entity.kind)
                    .entry(entity.id.clone())
                    .or_default();
                merge_fields(document, &entity, fields);
            }
            BatchOp::Delete { entity } => {
                self.collection_mut(entity.kind).remove(&entity.id);
            }
        }
    }

    fn snapshot(&self) -> RemoteSnapshot {
        let render = |collection: &Collection| {
            collection
                .values()
                .map(|document| Value::Object(document.clone()))
                .collect()
        };
        RemoteSnapshot {
            projects: render(&self.projects),
            groups: render(&self.groups),
        }
    }
}

#[derive(Debug, Default)]
struct FaultPlan {
    fail_next: usize,
    fail_entities: HashSet<String>,
    latency: Option<Duration>,
}

impl FaultPlan {
    fn check(&mut self, entity: &EntityRef) -> Result<()> {
        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(injected(entity));
        }
        if self.fail_entities.contains(&entity.id) {
            return Err(injected(entity));
        }
        Ok(())
    }
}

fn injected(entity: &EntityRef) -> Error {
    Error::Persistence {
        entity: entity.to_string(),
        reason: "injected failure".to_string(),
    }
}

#[derive(Debug)]
struct Inner {
    documents: Mutex<Documents>,
    faults: Mutex<FaultPlan>,
    writes: AtomicUsize,
    sender: broadcast::Sender<RemoteSnapshot>,
}

/// Cloneable handle; clones share the same documents and faults.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                documents: Mutex::new(Documents::default()),
                faults: Mutex::new(FaultPlan::default()),
                writes: AtomicUsize::new(0),
                sender,
            }),
        }
    }

    fn documents(&self) -> MutexGuard<'_, Documents> {
        self.inner
            .documents
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn faults(&self) -> MutexGuard<'_, FaultPlan> {
        self.inner
            .faults
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next `count` operations fail.
    pub fn fail_next(&self, count: usize) {
        self.faults().fail_next = count;
    }

    /// Make every operation addressing `id` fail until faults are cleared.
    pub fn fail_entity(&self, id: impl Into<String>) {
        self.faults().fail_entities.insert(id.into());
    }

    pub fn clear_faults(&self) {
        let mut faults = self.faults();
        faults.fail_next = 0;
        faults.fail_entities.clear();
    }

    pub fn set_latency(&self, latency: Duration) {
        self.faults().latency = (!latency.is_zero()).then_some(latency);
    }

    /// Number of operations applied so far.
    pub fn write_count(&self) -> usize {
        self.inner.writes.load(Ordering::SeqCst)
    }

    /// Stored document for `entity`, if any.
    pub fn document(&self, entity: &EntityRef) -> Option<Map<String, Value>> {
        self.documents()
            .collection(entity.kind)
            .get(&entity.id)
            .cloned()
    }

    /// Replace a document as another session would, bypassing faults.
    ///
    /// Subscribers receive the resulting snapshot.
    pub fn put_document(&self, entity: &EntityRef, document: Map<String, Value>) {
        let snapshot = {
            let mut documents = self.documents();
            documents
                .collection_mut(entity.kind)
                .insert(entity.id.clone(), document);
            documents.snapshot()
        };
        self.publish(snapshot);
    }

    fn publish(&self, snapshot: RemoteSnapshot) {
        // No receivers is fine.
        let _ = self.inner.sender.send(snapshot);
    }

    async fn delay(&self) {
        let latency = self.faults().latency;
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    /// Apply ops in order, stopping at the first injected failure.
    ///
    /// Returns how many were applied and the failure, if any.
    fn apply_ops(&self, ops: Vec<BatchOp>) -> (usize, Option<Error>) {
        let mut applied = 0;
        let mut failure = None;
        let snapshot = {
            let mut faults = self.faults();
            let mut documents = self.documents();
            for op in ops {
                if let Err(err) = faults.check(op.entity()) {
                    failure = Some(err);
                    break;
                }
                documents.apply(op);
                applied += 1;
            }
            (applied > 0 && failure.is_none()).then(|| documents.snapshot())
        };
        self.inner.writes.fetch_add(applied, Ordering::SeqCst);
        if let Some(snapshot) = snapshot {
            self.publish(snapshot);
        }
        (applied, failure)
    }
}

#[async_trait]
impl RemoteStore for MemoryStore {
    async fn write(&self, entity: &EntityRef, fields: Map<String, Value>) -> Result<()> {
        self.delay().await;
        let op = BatchOp::Set {
            entity: entity.clone(),
            fields,
        };
        match self.apply_ops(vec![op]) {
            (_, Some(err)) => Err(err),
            _ => Ok(()),
        }
    }

    async fn delete(&self, entity: &EntityRef) -> Result<()> {
        self.delay().await;
        let op = BatchOp::Delete {
            entity: entity.clone(),
        };
        match self.apply_ops(vec![op]) {
            (_, Some(err)) => Err(err),
            _ => Ok(()),
        }
    }

    async fn batch_write(&self, ops: Vec<BatchOp>) -> Result<()> {
        self.delay().await;
        let total = ops.len();
        match self.apply_ops(ops) {
            (applied, Some(err)) => Err(Error::PartialTransaction {
                applied,
                total,
                reason: err.to_string(),
            }),
            _ => Ok(()),
        }
    }

    async fn load(&self) -> Result<RemoteSnapshot> {
        self.delay().await;
        Ok(self.documents().snapshot())
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteSnapshot> {
        self.inner.sender.subscribe()
    }
}
