//! Projects and project groups.
//!
//! A project owns one forest of tasks and is the unit of persistence: every
//! tree mutation is written back as a replacement of the project's `tasks`
//! field. Groups are ordered, coloured buckets that projects point at by id.
//! Deleting a group leaves its projects alone; a dangling `groupId` simply
//! fails to resolve.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::progress::{self, Progress};
use crate::task::{json_kind, new_id, Task};

const PROJECT_FIELDS: [&str; 8] = [
    "id",
    "name",
    "icon",
    "groupId",
    "isArchived",
    "isHidden",
    "createdAt",
    "tasks",
];
const GROUP_FIELDS: [&str; 4] = ["id", "name", "color", "order"];
const DEFAULT_GROUP_COLOR: &str = "#64748b";
const UNNAMED_PROJECT: &str = "Untitled project";
const UNNAMED_GROUP: &str = "Untitled group";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    #[serde(default)]
    pub is_archived: bool,
    #[serde(default)]
    pub is_hidden: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl Project {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            icon: None,
            group_id: None,
            is_archived: false,
            is_hidden: false,
            created_at: Some(Utc::now()),
            tasks: Vec::new(),
            extras: Map::new(),
        }
    }

    pub fn with_tasks(mut self, tasks: Vec<Task>) -> Self {
        self.tasks = tasks;
        self
    }

    pub fn progress(&self) -> Progress {
        progress::aggregate(&self.tasks)
    }

    /// Full document for a create or overwrite.
    pub fn to_fields(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    /// Partial document carrying only the task forest.
    pub fn tasks_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        fields.insert(
            "tasks".to_string(),
            Value::Array(self.tasks.iter().map(Task::to_document).collect()),
        );
        fields
    }

    /// Build a project from an untrusted store document.
    pub fn from_document(value: &Value, placeholder: &str) -> Project {
        let empty = Map::new();
        let object = value.as_object().unwrap_or_else(|| {
            tracing::warn!(kind = json_kind(value), "project document is not an object");
            &empty
        });

        let id = document_id(object);
        let tasks = match object.get("tasks") {
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| Task::from_document(item, placeholder))
                .collect(),
            None | Some(Value::Null) => Vec::new(),
            Some(other) => {
                tracing::warn!(project = %id, kind = json_kind(other), "project tasks is not an array");
                Vec::new()
            }
        };

        Project {
            name: non_empty_string(object, "name").unwrap_or_else(|| UNNAMED_PROJECT.to_string()),
            icon: non_empty_string(object, "icon"),
            group_id: non_empty_string(object, "groupId"),
            is_archived: object.get("isArchived").and_then(Value::as_bool).unwrap_or(false),
            is_hidden: object.get("isHidden").and_then(Value::as_bool).unwrap_or(false),
            created_at: object
                .get("createdAt")
                .and_then(Value::as_str)
                .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
                .map(|ts| ts.with_timezone(&Utc)),
            tasks,
            extras: extras(object, &PROJECT_FIELDS),
            id,
        }
    }
}

/// Metadata changes for a project. Tasks are never patched this way.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProjectPatch {
    pub name: Option<String>,
    pub icon: Option<Option<String>>,
    pub group_id: Option<Option<String>>,
    pub is_archived: Option<bool>,
    pub is_hidden: Option<bool>,
}

impl ProjectPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, project: &Project) -> Project {
        let mut next = project.clone();
        if let Some(name) = &self.name {
            next.name = name.clone();
        }
        if let Some(icon) = &self.icon {
            next.icon = icon.clone();
        }
        if let Some(group_id) = &self.group_id {
            next.group_id = group_id.clone();
        }
        if let Some(archived) = self.is_archived {
            next.is_archived = archived;
        }
        if let Some(hidden) = self.is_hidden {
            next.is_hidden = hidden;
        }
        next
    }

    /// The changed fields only, in document form.
    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(name) = &self.name {
            fields.insert("name".to_string(), Value::from(name.clone()));
        }
        if let Some(icon) = &self.icon {
            fields.insert("icon".to_string(), optional_string(icon));
        }
        if let Some(group_id) = &self.group_id {
            fields.insert("groupId".to_string(), optional_string(group_id));
        }
        if let Some(archived) = self.is_archived {
            fields.insert("isArchived".to_string(), Value::Bool(archived));
        }
        if let Some(hidden) = self.is_hidden {
            fields.insert("isHidden".to_string(), Value::Bool(hidden));
        }
        fields
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectGroup {
    pub id: String,
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub order: i64,
    #[serde(flatten)]
    pub extras: Map<String, Value>,
}

impl ProjectGroup {
    pub fn new(id: impl Into<String>, name: impl Into<String>, order: i64) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            color: DEFAULT_GROUP_COLOR.to_string(),
            order,
            extras: Map::new(),
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn to_fields(&self) -> Map<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        }
    }

    pub fn from_document(value: &Value) -> ProjectGroup {
        let empty = Map::new();
        let object = value.as_object().unwrap_or_else(|| {
            tracing::warn!(kind = json_kind(value), "group document is not an object");
            &empty
        });
        ProjectGroup {
            id: document_id(object),
            name: non_empty_string(object, "name").unwrap_or_else(|| UNNAMED_GROUP.to_string()),
            color: non_empty_string(object, "color")
                .unwrap_or_else(|| DEFAULT_GROUP_COLOR.to_string()),
            order: object.get("order").and_then(Value::as_i64).unwrap_or(0),
            extras: extras(object, &GROUP_FIELDS),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupPatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub order: Option<i64>,
}

impl GroupPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    pub fn apply(&self, group: &ProjectGroup) -> ProjectGroup {
        let mut next = group.clone();
        if let Some(name) = &self.name {
            next.name = name.clone();
        }
        if let Some(color) = &self.color {
            next.color = color.clone();
        }
        if let Some(order) = self.order {
            next.order = order;
        }
        next
    }

    pub fn to_fields(&self) -> Map<String, Value> {
        let mut fields = Map::new();
        if let Some(name) = &self.name {
            fields.insert("name".to_string(), Value::from(name.clone()));
        }
        if let Some(color) = &self.color {
            fields.insert("color".to_string(), Value::from(color.clone()));
        }
        if let Some(order) = self.order {
            fields.insert("order".to_string(), Value::from(order));
        }
        fields
    }
}

/// Groups in display order: by `order`, then name, then id.
pub fn sort_groups(groups: &mut [ProjectGroup]) {
    groups.sort_by(|a, b| {
        a.order
            .cmp(&b.order)
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.id.cmp(&b.id))
    });
}

fn document_id(object: &Map<String, Value>) -> String {
    match object.get("id") {
        Some(Value::String(id)) if !id.trim().is_empty() => id.clone(),
        Some(Value::Number(number)) => number.to_string(),
        _ => {
            let id = new_id();
            tracing::warn!(%id, "document has no usable id; generated one");
            id
        }
    }
}

fn non_empty_string(object: &Map<String, Value>, key: &str) -> Option<String> {
    object
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.trim().is_empty())
        .map(str::to_string)
}

fn optional_string(value: &Option<String>) -> Value {
    value.clone().map(Value::from).unwrap_or(Value::Null)
}

fn extras(object: &Map<String, Value>, known: &[&str]) -> Map<String, Value> {
    object
        .iter()
        .filter(|(key, _)| !known.contains(&key.as_str()))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn tasks_fields_only_carries_tasks() {
        let project = Project::new("p1", "Launch").with_tasks(vec![Task::new("t1", "Plan")]);
        let fields = project.tasks_fields();
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["tasks"][0]["id"], json!("t1"));
    }

    #[test]
    fn document_round_trip_keeps_metadata() {
        let doc = json!({
            "id": "p1",
            "name": "Launch",
            "groupId": "g1",
            "isArchived": true,
            "owner": "someone",
            "tasks": [{ "id": "t1", "name": "Plan" }],
        });
        let project = Project::from_document(&doc, "Untitled task");
        assert_eq!(project.group_id.as_deref(), Some("g1"));
        assert!(project.is_archived);
        assert!(!project.is_hidden);
        assert_eq!(project.extras.get("owner"), Some(&json!("someone")));

        let fields = project.to_fields();
        assert_eq!(fields["owner"], json!("someone"));
        assert_eq!(fields["tasks"][0]["name"], json!("Plan"));
    }

    #[test]
    fn corrupted_project_document_is_repaired() {
        let project = Project::from_document(&json!({ "id": "p", "tasks": 5 }), "Untitled task");
        assert_eq!(project.name, UNNAMED_PROJECT);
        assert!(project.tasks.is_empty());
    }

    #[test]
    fn patch_fields_only_include_changes() {
        let patch = ProjectPatch {
            group_id: Some(None),
            is_hidden: Some(true),
            ..ProjectPatch::default()
        };
        let fields = patch.to_fields();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["groupId"], Value::Null);

        let project = Project::new("p", "P");
        let next = patch.apply(&project);
        assert!(next.is_hidden);
        assert_eq!(next.name, "P");
    }

    #[test]
    fn groups_sort_by_order_then_name() {
        let mut groups = vec![
            ProjectGroup::new("g2", "Beta", 1),
            ProjectGroup::new("g3", "Alpha", 1),
            ProjectGroup::new("g1", "Zeta", 0),
        ];
        sort_groups(&mut groups);
        let ids: Vec<_> = groups.iter().map(|g| g.id.as_str()).collect();
        assert_eq!(ids, vec!["g1", "g3", "g2"]);

        let group = ProjectGroup::from_document(&json!({ "id": "g", "order": "x" }));
        assert_eq!(group.order, 0);
        assert_eq!(group.color, DEFAULT_GROUP_COLOR);
    }
}
