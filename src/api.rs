//! Bearer-authenticated client for TickTick projects and tasks.

mod client;
mod types;

pub use client::{DEFAULT_BASE_URL, INBOX_PROJECT_ID, TickTickClient};
pub use types::{
    ChecklistItem, NewProject, NewTask, Priority, Project, ProjectData, Task, TaskUpdate,
};
