//! Task nodes for arbor.
//!
//! A task is a node in a project's tree: it owns an ordered list of child
//! tasks (`subtasks`) and is addressed by an id that is unique across the
//! whole tree of its project. Documents use camelCase field names; fields the
//! engine does not know about are kept in `extras` and written back verbatim.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

pub type TaskId = String;

const KNOWN_FIELDS: [&str; 12] = [
    "id",
    "name",
    "completed",
    "completionDate",
    "startDate",
    "endDate",
    "startTime",
    "duration",
    "imageUrl",
    "dependencies",
    "resourceIds",
    "subtasks",
];

/// Generate a fresh entity id.
pub fn new_id() -> String {
    Uuid::new_v4().to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: TaskId,
    pub name: String,
    #[serde(default)]
    pub completed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_date: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<NaiveDate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<TaskId>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resource_ids: Vec<String>,
    #[serde(default)]
    pub subtasks: Vec<Task>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl Task {
    pub fn new(id: impl Into<TaskId>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            completed: false,
            completion_date: None,
            start_date: None,
            end_date: None,
            start_time: None,
            duration: None,
            image_url: None,
            dependencies: Vec::new(),
            resource_ids: Vec::new(),
            subtasks: Vec::new(),
            extras: Map::new(),
        }
    }

    pub fn with_dates(mut self, start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        self.start_date = start;
        self.end_date = end;
        self
    }

    pub fn with_subtasks(mut self, subtasks: Vec<Task>) -> Self {
        self.subtasks = subtasks;
        self
    }

    /// True when the task carries at least one schedule date.
    pub fn is_dated(&self) -> bool {
        self.start_date.is_some() || self.end_date.is_some()
    }

    /// Copy of this subtree with `completed` forced on every node.
    ///
    /// Completing stamps every node with the same `at`; un-completing clears
    /// the completion date everywhere.
    pub fn with_completion(&self, completed: bool, at: DateTime<Utc>) -> Task {
        let mut task = self.clone();
        mark_completion(&mut task, completed, at);
        task
    }

    /// Render the task as a store document.
    pub fn to_document(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Build a task from an untrusted store document.
    ///
    /// Never fails: a corrupted document is repaired with safe defaults so a
    /// single bad node cannot take down a whole tree.
    pub fn from_document(value: &Value, placeholder: &str) -> Task {
        let Some(object) = value.as_object() else {
            tracing::warn!(kind = json_kind(value), "task document is not an object");
            return Task::new(new_id(), placeholder);
        };

        let id = match object.get("id") {
            Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
            Some(Value::Number(number)) => number.to_string(),
            _ => {
                let id = new_id();
                tracing::warn!(%id, "task document has no usable id; generated one");
                id
            }
        };

        let name = match object.get("name").and_then(Value::as_str) {
            Some(name) if !name.trim().is_empty() => name.to_string(),
            _ => {
                tracing::warn!(%id, "task has empty name; using placeholder");
                placeholder.to_string()
            }
        };

        let completed = match object.get("completed") {
            Some(Value::Bool(flag)) => *flag,
            None => false,
            Some(other) => {
                tracing::warn!(%id, kind = json_kind(other), "task completed flag is not a bool");
                false
            }
        };

        let subtasks = match object.get("subtasks") {
            Some(Value::Array(children)) => children
                .iter()
                .map(|child| Task::from_document(child, placeholder))
                .collect(),
            None | Some(Value::Null) => Vec::new(),
            Some(other) => {
                tracing::warn!(%id, kind = json_kind(other), "task subtasks is not an array");
                Vec::new()
            }
        };

        let extras = object
            .iter()
            .filter(|(key, _)| !KNOWN_FIELDS.contains(&key.as_str()))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();

        Task {
            completion_date: object.get("completionDate").and_then(parse_timestamp),
            start_date: object.get("startDate").and_then(parse_day),
            end_date: object.get("endDate").and_then(parse_day),
            start_time: string_field(object, "startTime"),
            duration: object.get("duration").and_then(Value::as_f64),
            image_url: string_field(object, "imageUrl"),
            dependencies: string_list(object, "dependencies"),
            resource_ids: string_list(object, "resourceIds"),
            id,
            name,
            completed,
            subtasks,
            extras,
        }
    }
}

fn mark_completion(task: &mut Task, completed: bool, at: DateTime<Utc>) {
    task.completed = completed;
    task.completion_date = completed.then_some(at);
    for child in &mut task.subtasks {
        mark_completion(child, completed, at);
    }
}

/// Partial field patch for a single task.
///
/// Applying a patch merges only the fields that are set and never touches
/// `subtasks`. Nested options distinguish "leave alone" (`None`) from
/// "clear" (`Some(None)`).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub completed: Option<bool>,
    pub completion_date: Option<Option<DateTime<Utc>>>,
    pub start_date: Option<Option<NaiveDate>>,
    pub end_date: Option<Option<NaiveDate>>,
    pub start_time: Option<Option<String>>,
    pub duration: Option<Option<f64>>,
    pub image_url: Option<Option<String>>,
    pub dependencies: Option<Vec<TaskId>>,
    pub resource_ids: Option<Vec<String>>,
}

impl TaskPatch {
    pub fn dates(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Self {
        Self {
            start_date: Some(start),
            end_date: Some(end),
            ..Self::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, task: &Task) -> Task {
        let mut next = task.clone();
        if let Some(name) = &self.name {
            next.name = name.clone();
        }
        if let Some(completed) = self.completed {
            next.completed = completed;
        }
        if let Some(completion_date) = self.completion_date {
            next.completion_date = completion_date;
        }
        if let Some(start_date) = self.start_date {
            next.start_date = start_date;
        }
        if let Some(end_date) = self.end_date {
            next.end_date = end_date;
        }
        if let Some(start_time) = &self.start_time {
            next.start_time = start_time.clone();
        }
        if let Some(duration) = self.duration {
            next.duration = duration;
        }
        if let Some(image_url) = &self.image_url {
            next.image_url = image_url.clone();
        }
        if let Some(dependencies) = &self.dependencies {
            next.dependencies = dependencies.clone();
        }
        if let Some(resource_ids) = &self.resource_ids {
            next.resource_ids = resource_ids.clone();
        }
        next
    }
}

/// Parse a calendar day from `YYYY-MM-DD` or a full RFC 3339 timestamp.
pub fn parse_day_str(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(day) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(day);
    }
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|ts| ts.with_timezone(&Utc).date_naive())
}

fn parse_day(value: &Value) -> Option<NaiveDate> {
    value.as_str().and_then(parse_day_str)
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    let raw = value.as_str()?.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|day| day.and_hms_opt(0, 0, 0))
        .map(|naive: NaiveDateTime| naive.and_utc())
}

fn string_field(object: &Map<String, Value>, key: &str) -> Option<String> {
    object.get(key).and_then(Value::as_str).map(str::to_string)
}

fn string_list(object: &Map<String, Value>, key: &str) -> Vec<String> {
    object
        .get(key)
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

pub(crate) fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
