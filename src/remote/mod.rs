//! Remote persistence collaborator.
//!
//! The engine never talks to a concrete backend directly; it holds an
//! implementation of [`RemoteStore`]. Two are provided:
//!
//! - [`MemoryStore`]: in-process documents with failure injection, used by
//!   tests and by embedders that persist elsewhere
//! - [`FileStore`]: one JSON document per entity under the data home
//!
//! Documents are JSON objects addressed by [`EntityRef`]. A `write` merges
//! top-level fields into the stored document (creating it if missing), so
//! sending only `tasks` replaces the task forest and nothing else.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use crate::error::Result;
use crate::state::EntityRef;

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

/// Capacity of the snapshot broadcast channel; slow receivers skip ahead.
pub(crate) const SNAPSHOT_CHANNEL_CAPACITY: usize = 16;

/// One operation inside a batch write.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp {
    Set {
        entity: EntityRef,
        fields: Map<String, Value>,
    },
    Delete {
        entity: EntityRef,
    },
}

impl BatchOp {
    pub fn entity(&self) -> &EntityRef {
        match self {
            BatchOp::Set { entity, .. } | BatchOp::Delete { entity } => entity,
        }
    }
}

/// Raw documents of every collection, as the store holds them.
///
/// Documents are untrusted; consumers sanitise them on the way in.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    pub projects: Vec<Value>,
    pub groups: Vec<Value>,
}

#[async_trait]
pub trait RemoteStore: Send + Sync + 'static {
    /// Merge `fields` into the document at `entity`, creating it if needed.
    async fn write(&self, entity: &EntityRef, fields: Map<String, Value>) -> Result<()>;

    /// Remove the document at `entity`. Deleting a missing document succeeds.
    async fn delete(&self, entity: &EntityRef) -> Result<()>;

    /// Submit several operations together.
    ///
    /// Operations are applied in order. The store does not promise atomicity:
    /// on failure some leading operations may already be applied, reported as
    /// `Error::PartialTransaction`.
    async fn batch_write(&self, ops: Vec<BatchOp>) -> Result<()>;

    /// Every document currently stored.
    async fn load(&self) -> Result<RemoteSnapshot>;

    /// Receive a fresh snapshot after every change the store accepts,
    /// including changes made by other sessions.
    fn subscribe(&self) -> broadcast::Receiver<RemoteSnapshot>;
}

/// Shallow merge used by every store: top-level keys of `fields` win.
pub(crate) fn merge_fields(document: &mut Map<String, Value>, entity: &EntityRef, fields: Map<String, Value>) {
    for (key, value) in fields {
        document.insert(key, value);
    }
    document
        .entry("id".to_string())
        .or_insert_with(|| Value::from(entity.id.clone()));
}
