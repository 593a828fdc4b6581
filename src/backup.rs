//! Full-data export and import.
//!
//! Import is the one path that does not go through the optimistic pipeline.
//! It is blocking and remote first: every existing remote project and group
//! is deleted, the replacement set is written in batches no larger than
//! `store.batch_limit`, and only when every batch has been accepted is local
//! state replaced. A failed batch leaves local state untouched; the remote
//! store keeps whatever batches already landed.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::events::{Event, EventKind};
use crate::pipeline::Engine;
use crate::project::{Project, ProjectGroup};
use crate::remote::{BatchOp, RemoteStore};
use crate::state::{EntityKind, EntityRef, State};
use crate::task::json_kind;

pub const BACKUP_SCHEMA_VERSION: &str = "arbor.backup.v1";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Backup {
    pub schema_version: String,
    pub exported_at: DateTime<Utc>,
    pub projects: Vec<Project>,
    pub groups: Vec<ProjectGroup>,
}

impl Backup {
    /// Parse a backup file leniently: malformed entities are repaired the
    /// same way remote documents are.
    pub fn parse(raw: &str, placeholder: &str) -> Result<Backup> {
        let value: Value = serde_json::from_str(raw)?;
        let object = value.as_object().ok_or_else(|| {
            Error::InvalidArgument(format!("backup must be a JSON object, got {}", json_kind(&value)))
        })?;

        let schema_version = object
            .get("schemaVersion")
            .and_then(Value::as_str)
            .unwrap_or(BACKUP_SCHEMA_VERSION)
            .to_string();
        if schema_version != BACKUP_SCHEMA_VERSION {
            tracing::warn!(%schema_version, "unexpected backup schema version");
        }

        let exported_at = object
            .get("exportedAt")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map(|ts| ts.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);

        let items = |key: &str| -> Vec<Value> {
            match object.get(key) {
                Some(Value::Array(items)) => items.clone(),
                None | Some(Value::Null) => Vec::new(),
                Some(other) => {
                    tracing::warn!(key, kind = json_kind(other), "backup collection is not an array");
                    Vec::new()
                }
            }
        };

        Ok(Backup {
            schema_version,
            exported_at,
            projects: items("projects")
                .iter()
                .map(|document| Project::from_document(document, placeholder))
                .collect(),
            groups: items("groups").iter().map(ProjectGroup::from_document).collect(),
        })
    }
}

/// Snapshot the current state as a backup document.
pub fn export(state: &State) -> Backup {
    Backup {
        schema_version: BACKUP_SCHEMA_VERSION.to_string(),
        exported_at: Utc::now(),
        projects: state.projects.clone(),
        groups: state.groups.clone(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub deleted: usize,
    pub written: usize,
    pub batches: usize,
}

/// Replace everything, remote first, then local.
pub async fn import<R: RemoteStore>(engine: &Engine<R>, backup: Backup) -> Result<ImportReport> {
    let remote = engine.remote();
    let existing = engine.bounded(remote.load()).await?;

    let mut ops = Vec::new();
    for (kind, documents) in [
        (EntityKind::Project, &existing.projects),
        (EntityKind::Group, &existing.groups),
    ] {
        for document in documents {
            match document_id(document) {
                Some(id) => ops.push(BatchOp::Delete {
                    entity: EntityRef { kind, id },
                }),
                None => tracing::warn!("existing document has no id; cannot delete it"),
            }
        }
    }
    let deleted = ops.len();

    ops.extend(backup.groups.iter().map(|group| BatchOp::Set {
        entity: EntityRef::group(&group.id),
        fields: group.to_fields(),
    }));
    ops.extend(backup.projects.iter().map(|project| BatchOp::Set {
        entity: EntityRef::project(&project.id),
        fields: project.to_fields(),
    }));
    let written = ops.len() - deleted;

    let batch_limit = engine.settings().batch_limit.max(1);
    let chunks: Vec<Vec<BatchOp>> = ops.chunks(batch_limit).map(<[BatchOp]>::to_vec).collect();
    let total_batches = chunks.len();

    for (index, chunk) in chunks.into_iter().enumerate() {
        if let Err(err) = engine.bounded(remote.batch_write(chunk)).await {
            tracing::warn!(batch = index + 1, total_batches, error = %err, "import batch failed");
            return Err(Error::ImportFailed {
                completed_batches: index,
                total_batches,
                reason: err.to_string(),
            });
        }
        tracing::debug!(batch = index + 1, total_batches, "import batch written");
    }

    engine
        .state()
        .replace(Arc::new(State::new(backup.projects, backup.groups)));

    let report = ImportReport {
        deleted,
        written,
        batches: total_batches,
    };
    tracing::info!(deleted, written, batches = total_batches, "backup imported");
    let event = Event::new(EventKind::BackupImported).with_data(&report)?;
    engine.emit(event);
    Ok(report)
}

fn document_id(document: &Value) -> Option<String> {
    match document.get("id") {
        Some(Value::String(id)) if !id.is_empty() => Some(id.clone()),
        Some(Value::Number(number)) => Some(number.to_string()),
        _ => None,
    }
}
