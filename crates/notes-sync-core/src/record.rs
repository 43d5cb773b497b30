//! Synced record types: notes and to-do lists owned by a single user.
//!
//! Field names follow the backend's column names (`user_id`, `updated_at`) so the
//! same structs can be sent over the wire and written to local storage.

use serde::{Deserialize, Serialize};
use std::fmt::{self, Display, Formatter};
use std::str::FromStr;
use thiserror::Error;

/// Current wall-clock time in milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    web_time::SystemTime::now()
        .duration_since(web_time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// The kinds of records kept in sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntityKind {
    Note,
    TodoList,
}

impl EntityKind {
    pub const ALL: [EntityKind; 2] = [EntityKind::Note, EntityKind::TodoList];

    /// Short name used in notification keys and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Note => "note",
            EntityKind::TodoList => "todo",
        }
    }

    /// Remote table holding this kind of record.
    pub fn table(&self) -> &'static str {
        match self {
            EntityKind::Note => "notes",
            EntityKind::TodoList => "todo_lists",
        }
    }

    /// Human-readable noun for notification text.
    pub fn noun(&self) -> &'static str {
        match self {
            EntityKind::Note => "note",
            EntityKind::TodoList => "to-do list",
        }
    }
}

impl Display for EntityKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum OwnerIdError {
    #[error("Owner ID cannot be empty")]
    Empty,
}

/// Authenticated user id that scopes which records a session may touch.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OwnerId(String);

impl OwnerId {
    pub fn new(id: impl Into<String>) -> Result<Self, OwnerIdError> {
        let id = id.into();
        if id.trim().is_empty() {
            return Err(OwnerIdError::Empty);
        }
        Ok(Self(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for OwnerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for OwnerId {
    type Err = OwnerIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Common view over every record kind the sync engine handles.
pub trait SyncRecord: Clone + Send + Sync + 'static {
    const KIND: EntityKind;

    /// Stable identifier, immutable once assigned.
    fn id(&self) -> &str;

    fn owner_id(&self) -> &OwnerId;

    /// Modification time in milliseconds; non-decreasing across writes.
    fn modified_at(&self) -> u64;

    /// Position in the owner's list (ascending).
    fn order(&self) -> i64;

    /// Title shown in notifications.
    fn display_title(&self) -> &str;
}

/// Next modification timestamp for a record last modified at `previous`.
fn next_modified_at(previous: u64) -> u64 {
    now_millis().max(previous.saturating_add(1))
}

/// A free-form note.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Note {
    pub id: String,
    #[serde(rename = "user_id")]
    pub owner_id: OwnerId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub order: i64,
    pub created_at: u64,
    #[serde(rename = "updated_at")]
    pub modified_at: u64,
}

impl Note {
    pub fn new(
        id: impl Into<String>,
        owner_id: OwnerId,
        title: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            owner_id,
            title: title.into(),
            content: content.into(),
            pinned: false,
            order: 0,
            created_at: now,
            modified_at: now,
        }
    }

    /// Bump the modification timestamp after an edit.
    pub fn touch(&mut self) {
        self.modified_at = next_modified_at(self.modified_at);
    }
}

impl SyncRecord for Note {
    const KIND: EntityKind = EntityKind::Note;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    fn modified_at(&self) -> u64 {
        self.modified_at
    }

    fn order(&self) -> i64 {
        self.order
    }

    fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            "Untitled note"
        } else {
            &self.title
        }
    }
}

/// A single entry in a to-do list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub completed: bool,
}

/// A titled checklist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TodoList {
    pub id: String,
    #[serde(rename = "user_id")]
    pub owner_id: OwnerId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub items: Vec<TodoItem>,
    #[serde(default)]
    pub order: i64,
    pub created_at: u64,
    #[serde(rename = "updated_at")]
    pub modified_at: u64,
}

impl TodoList {
    pub fn new(id: impl Into<String>, owner_id: OwnerId, title: impl Into<String>) -> Self {
        let now = now_millis();
        Self {
            id: id.into(),
            owner_id,
            title: title.into(),
            items: Vec::new(),
            order: 0,
            created_at: now,
            modified_at: now,
        }
    }

    /// Bump the modification timestamp after an edit.
    pub fn touch(&mut self) {
        self.modified_at = next_modified_at(self.modified_at);
    }

    /// Number of items not yet completed.
    pub fn remaining(&self) -> usize {
        self.items.iter().filter(|item| !item.completed).count()
    }
}

impl SyncRecord for TodoList {
    const KIND: EntityKind = EntityKind::TodoList;

    fn id(&self) -> &str {
        &self.id
    }

    fn owner_id(&self) -> &OwnerId {
        &self.owner_id
    }

    fn modified_at(&self) -> u64 {
        self.modified_at
    }

    fn order(&self) -> i64 {
        self.order
    }

    fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            "Untitled list"
        } else {
            &self.title
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> OwnerId {
        OwnerId::new("user-1").unwrap()
    }

    #[test]
    fn test_owner_id_rejects_blank() {
        assert_eq!(OwnerId::new(""), Err(OwnerIdError::Empty));
        assert_eq!("   ".parse::<OwnerId>(), Err(OwnerIdError::Empty));
        assert_eq!(owner().to_string(), "user-1");
    }

    #[test]
    fn test_touch_is_strictly_increasing() {
        let mut note = Note::new("n1", owner(), "Groceries", "milk");
        note.modified_at = u64::MAX / 2;
        let before = note.modified_at;
        note.touch();
        assert_eq!(note.modified_at, before + 1);

        let mut list = TodoList::new("t1", owner(), "Chores");
        let before = list.modified_at;
        list.touch();
        assert!(list.modified_at > before);
    }

    #[test]
    fn test_display_title_falls_back_when_blank() {
        let note = Note::new("n1", owner(), "  ", "");
        assert_eq!(note.display_title(), "Untitled note");

        let list = TodoList::new("t1", owner(), "");
        assert_eq!(list.display_title(), "Untitled list");

        let named = Note::new("n2", owner(), "Ideas", "");
        assert_eq!(named.display_title(), "Ideas");
    }

    #[test]
    fn test_note_uses_backend_column_names() {
        let mut note = Note::new("n1", owner(), "Title", "Body");
        note.modified_at = 100;
        let json = serde_json::to_value(&note).unwrap();
        assert_eq!(json["user_id"], "user-1");
        assert_eq!(json["updated_at"], 100);

        let parsed: Note = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, note);
    }

    #[test]
    fn test_touch_saturates_at_max_timestamp() {
        let mut note = Note::new("n1", owner(), "t", "");
        note.modified_at = u64::MAX;

        note.touch();

        assert_eq!(note.modified_at, u64::MAX);
    }

    #[test]
    fn test_todo_list_remaining() {
        let mut list = TodoList::new("t1", owner(), "Chores");
        list.items = vec![
            TodoItem {
                id: "a".into(),
                text: "dishes".into(),
                completed: true,
            },
            TodoItem {
                id: "b".into(),
                text: "laundry".into(),
                completed: false,
            },
        ];
        assert_eq!(list.remaining(), 1);
        assert_eq!(EntityKind::TodoList.as_str(), "todo");
        assert_eq!(EntityKind::TodoList.table(), "todo_lists");
    }
}
