use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::ApiError;

pub const DEFAULT_PROJECT_COLOR: &str = "#F18181";
pub const DEFAULT_VIEW_MODE: &str = "list";

const TASK_STATUS_COMPLETED: i32 = 2;
const ITEM_STATUS_COMPLETED: i32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Priority {
    #[default]
    None,
    Low,
    Medium,
    High,
}

impl Priority {
    pub fn label(self) -> &'static str {
        match self {
            Self::None => "None",
            Self::Low => "Low",
            Self::Medium => "Medium",
            Self::High => "High",
        }
    }
}

impl TryFrom<i32> for Priority {
    type Error = ApiError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::Low),
            3 => Ok(Self::Medium),
            5 => Ok(Self::High),
            other => Err(ApiError::InvalidPriority(other)),
        }
    }
}

impl From<Priority> for i32 {
    fn from(priority: Priority) -> Self {
        match priority {
            Priority::None => 0,
            Priority::Low => 1,
            Priority::Medium => 3,
            Priority::High => 5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChecklistItem {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub status: i32,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ChecklistItem {
    pub fn is_completed(&self) -> bool {
        self.status == ITEM_STATUS_COMPLETED
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: String,
    pub project_id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<ChecklistItem>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

impl Task {
    pub fn is_completed(&self) -> bool {
        self.status == TASK_STATUS_COMPLETED
    }
}

/// A project together with its undone tasks and kanban columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectData {
    #[serde(default)]
    pub project: Option<Project>,
    #[serde(default)]
    pub tasks: Vec<Task>,
    #[serde(default)]
    pub columns: Vec<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewTask {
    pub title: String,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    pub priority: Priority,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
}

impl NewTask {
    pub fn new(title: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            project_id: project_id.into(),
            content: None,
            start_date: None,
            due_date: None,
            priority: Priority::None,
            parent_id: None,
        }
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_start_date(mut self, start_date: impl Into<String>) -> Self {
        self.start_date = Some(start_date.into());
        self
    }

    pub fn with_due_date(mut self, due_date: impl Into<String>) -> Self {
        self.due_date = Some(due_date.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }
}

/// Partial update; unset fields are left unchanged on the server.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskUpdate {
    pub id: String,
    pub project_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub due_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
}

impl TaskUpdate {
    pub fn new(task_id: impl Into<String>, project_id: impl Into<String>) -> Self {
        Self {
            id: task_id.into(),
            project_id: project_id.into(),
            title: None,
            content: None,
            start_date: None,
            due_date: None,
            priority: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_start_date(mut self, start_date: impl Into<String>) -> Self {
        self.start_date = Some(start_date.into());
        self
    }

    pub fn with_due_date(mut self, due_date: impl Into<String>) -> Self {
        self.due_date = Some(due_date.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NewProject {
    pub name: String,
    pub color: String,
    pub view_mode: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl NewProject {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            color: DEFAULT_PROJECT_COLOR.to_string(),
            view_mode: DEFAULT_VIEW_MODE.to_string(),
            kind: None,
        }
    }

    pub fn with_color(mut self, color: impl Into<String>) -> Self {
        self.color = color.into();
        self
    }

    pub fn with_view_mode(mut self, view_mode: impl Into<String>) -> Self {
        self.view_mode = view_mode.into();
        self
    }

    pub fn with_kind(mut self, kind: impl Into<String>) -> Self {
        self.kind = Some(kind.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_accepts_only_known_levels() {
        for (raw, expected) in [
            (0, Priority::None),
            (1, Priority::Low),
            (3, Priority::Medium),
            (5, Priority::High),
        ] {
            assert_eq!(Priority::try_from(raw).unwrap(), expected);
        }
        assert!(matches!(
            Priority::try_from(2),
            Err(ApiError::InvalidPriority(2))
        ));
    }

    #[test]
    fn task_parses_provider_payload() {
        let task: Task = serde_json::from_str(
            r#"{
                "id": "t1",
                "projectId": "p1",
                "title": "Write report",
                "priority": 5,
                "status": 2,
                "dueDate": "2024-05-01T09:00:00+0000",
                "items": [{"id": "i1", "title": "Outline", "status": 1}],
                "sortOrder": -1099511627776
            }"#,
        )
        .unwrap();

        assert_eq!(task.priority, Priority::High);
        assert!(task.is_completed());
        assert!(task.items[0].is_completed());
        assert_eq!(task.due_date.as_deref(), Some("2024-05-01T09:00:00+0000"));
        assert!(task.extra.contains_key("sortOrder"));
    }

    #[test]
    fn new_task_serializes_camel_case_and_skips_unset() {
        let body = serde_json::to_value(
            NewTask::new("Buy milk", "inbox").with_priority(Priority::Medium),
        )
        .unwrap();

        assert_eq!(
            body,
            serde_json::json!({"title": "Buy milk", "projectId": "inbox", "priority": 3})
        );
    }

    #[test]
    fn new_project_uses_defaults() {
        let body = serde_json::to_value(NewProject::new("Work")).unwrap();
        assert_eq!(
            body,
            serde_json::json!({"name": "Work", "color": "#F18181", "viewMode": "list"})
        );
    }
}
