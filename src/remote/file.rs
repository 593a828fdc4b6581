//! Directory-backed remote store.
//!
//! Each entity is one pretty-printed JSON document under `store/`. Every
//! change takes the store-wide `fs2` lock and writes through temp+rename, so
//! concurrent `arbor` processes see whole documents only. Filesystem work
//! runs on tokio's blocking pool.

use std::fs;
use std::path::Path;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::broadcast;

use super::{merge_fields, BatchOp, RemoteSnapshot, RemoteStore, SNAPSHOT_CHANNEL_CAPACITY};
use crate::error::{Error, Result};
use crate::lock::{FileLock, STORE_LOCK_TIMEOUT};
use crate::state::{EntityKind, EntityRef};
use crate::storage::Storage;

#[derive(Debug, Clone)]
pub struct FileStore {
    storage: Storage,
    sender: broadcast::Sender<RemoteSnapshot>,
}

impl FileStore {
    pub fn new(storage: Storage) -> Self {
        let (sender, _receiver) = broadcast::channel(SNAPSHOT_CHANNEL_CAPACITY);
        Self { storage, sender }
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Storage) -> Result<T> + Send + 'static,
    {
        let storage = self.storage.clone();
        tokio::task::spawn_blocking(move || work(&storage))
            .await
            .map_err(|err| Error::OperationFailed(format!("store task failed: {err}")))?
    }

    /// Apply ops under the store lock; publish the resulting snapshot only
    /// when every op landed.
    async fn commit(&self, ops: Vec<BatchOp>) -> Result<()> {
        let total = ops.len();
        let (applied, failure, snapshot) = self
            .blocking(move |storage| {
                let _lock = FileLock::acquire(storage.store_lock_file(), STORE_LOCK_TIMEOUT)?;
                let mut applied = 0;
                let mut failure = None;
                for op in ops {
                    if let Err(err) = apply_op(storage, op) {
                        failure = Some(err);
                        break;
                    }
                    applied += 1;
                }
                let snapshot = if applied > 0 && failure.is_none() {
                    Some(read_snapshot(storage)?)
                } else {
                    None
                };
                Ok((applied, failure, snapshot))
            })
            .await?;

        if let Some(snapshot) = snapshot {
            let _ = self.sender.send(snapshot);
        }
        match failure {
            None => Ok(()),
            Some(err) if total == 1 => Err(err),
            Some(err) => Err(Error::PartialTransaction {
                applied,
                total,
                reason: err.to_string(),
            }),
        }
    }
}

fn apply_op(storage: &Storage, op: BatchOp) -> Result<()> {
    match op {
        BatchOp::Set { entity, fields } => {
            let path = storage.document_file(entity.kind, &entity.id)?;
            let mut document = match read_document(&path) {
                Ok(Some(document)) => document,
                Ok(None) => Map::new(),
                Err(err) => {
                    tracing::warn!(%entity, error = %err, "overwriting unreadable document");
                    Map::new()
                }
            };
            merge_fields(&mut document, &entity, fields);
            storage.write_json(&path, &Value::Object(document))
        }
        BatchOp::Delete { entity } => {
            let path = storage.document_file(entity.kind, &entity.id)?;
            match fs::remove_file(&path) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(Error::Io(err)),
            }
        }
    }
}

fn read_document(path: &Path) -> Result<Option<Map<String, Value>>> {
    if !path.exists() {
        return Ok(None);
    }
    let content = fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&content)? {
        Value::Object(document) => Ok(Some(document)),
        _ => Err(Error::OperationFailed(format!(
            "{} is not a JSON object",
            path.display()
        ))),
    }
}

fn read_collection(storage: &Storage, kind: EntityKind) -> Result<Vec<Value>> {
    let dir = storage.collection_dir(kind);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut paths: Vec<_> = fs::read_dir(&dir)?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.extension().and_then(|ext| ext.to_str()) == Some("json"))
        .collect();
    paths.sort();

    let mut documents = Vec::with_capacity(paths.len());
    for path in paths {
        match read_document(&path) {
            Ok(Some(document)) => documents.push(Value::Object(document)),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "skipping corrupted document");
            }
        }
    }
    Ok(documents)
}

fn read_snapshot(storage: &Storage) -> Result<RemoteSnapshot> {
    Ok(RemoteSnapshot {
        projects: read_collection(storage, EntityKind::Project)?,
        groups: read_collection(storage, EntityKind::Group)?,
    })
}

#[async_trait]
impl RemoteStore for FileStore {
    async fn write(&self, entity: &EntityRef, fields: Map<String, Value>) -> Result<()> {
        self.commit(vec![BatchOp::Set {
            entity: entity.clone(),
            fields,
        }])
        .await
    }

    async fn delete(&self, entity: &EntityRef) -> Result<()> {
        self.commit(vec![BatchOp::Delete {
            entity: entity.clone(),
        }])
        .await
    }

    async fn batch_write(&self, ops: Vec<BatchOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }
        self.commit(ops).await
    }

    async fn load(&self) -> Result<RemoteSnapshot> {
        self.blocking(read_snapshot).await
    }

    fn subscribe(&self) -> broadcast::Receiver<RemoteSnapshot> {
        self.sender.subscribe()
    }
}
