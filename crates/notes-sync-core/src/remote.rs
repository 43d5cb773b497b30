//! Remote backend abstraction.
//!
//! Implementations:
//! - `InMemoryRemote` - For testing
//! - `HttpRemote` (in notes-sync-daemon) - PostgREST tables + WebSocket change feed

use crate::record::{EntityKind, Note, OwnerId, SyncRecord, TodoList};
use async_trait::async_trait;
use futures::StreamExt;
use futures::channel::mpsc;
use futures::stream::BoxStream;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::watch;

#[derive(Debug, Error)]
pub enum RemoteError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Server error ({status}): {message}")]
    Server { status: u16, message: String },

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Subscription failed: {0}")]
    Subscription(String),
}

pub type Result<T> = std::result::Result<T, RemoteError>;

/// Opaque "something changed" signal pushed by the backend.
///
/// The payload is deliberately not trusted; receivers refetch the full
/// collection for `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeSignal {
    pub kind: EntityKind,
}

/// Live change feed for one kind. Dropping it releases the subscription.
pub type ChangeFeed = BoxStream<'static, ChangeSignal>;

/// Remote CRUD and change subscriptions, scoped by owner.
#[async_trait]
pub trait RemoteDataService: Send + Sync {
    /// All notes of `owner`, ordered by `order` ascending.
    async fn list_notes(&self, owner: &OwnerId) -> Result<Vec<Note>>;

    /// All to-do lists of `owner`, ordered by `order` ascending.
    async fn list_todo_lists(&self, owner: &OwnerId) -> Result<Vec<TodoList>>;

    async fn upsert_note(&self, note: &Note) -> Result<()>;

    async fn delete_note(&self, owner: &OwnerId, id: &str) -> Result<()>;

    async fn upsert_todo_list(&self, list: &TodoList) -> Result<()>;

    async fn delete_todo_list(&self, owner: &OwnerId, id: &str) -> Result<()>;

    /// Open a change feed for records of `kind` owned by `owner`.
    async fn subscribe(&self, owner: &OwnerId, kind: EntityKind) -> Result<ChangeFeed>;
}

#[async_trait]
impl<T: RemoteDataService + ?Sized> RemoteDataService for Arc<T> {
    async fn list_notes(&self, owner: &OwnerId) -> Result<Vec<Note>> {
        (**self).list_notes(owner).await
    }

    async fn list_todo_lists(&self, owner: &OwnerId) -> Result<Vec<TodoList>> {
        (**self).list_todo_lists(owner).await
    }

    async fn upsert_note(&self, note: &Note) -> Result<()> {
        (**self).upsert_note(note).await
    }

    async fn delete_note(&self, owner: &OwnerId, id: &str) -> Result<()> {
        (**self).delete_note(owner, id).await
    }

    async fn upsert_todo_list(&self, list: &TodoList) -> Result<()> {
        (**self).upsert_todo_list(list).await
    }

    async fn delete_todo_list(&self, owner: &OwnerId, id: &str) -> Result<()> {
        (**self).delete_todo_list(owner, id).await
    }

    async fn subscribe(&self, owner: &OwnerId, kind: EntityKind) -> Result<ChangeFeed> {
        (**self).subscribe(owner, kind).await
    }
}

/// Subscriber registered through `InMemoryRemote::subscribe`.
struct Subscriber {
    owner: OwnerId,
    kind: EntityKind,
    tx: mpsc::UnboundedSender<ChangeSignal>,
}

/// In-memory backend for testing.
///
/// Writes through the trait push a change signal to matching subscribers, the
/// way a realtime backend would. Extra knobs simulate outages (`set_failing`)
/// and slow responses (`pause_fetches` / `resume_fetches`).
pub struct InMemoryRemote {
    notes: RwLock<Vec<Note>>,
    todos: RwLock<Vec<TodoList>>,
    subscribers: Mutex<Vec<Subscriber>>,
    note_fetches: AtomicUsize,
    todo_fetches: AtomicUsize,
    failing: AtomicBool,
    /// Kinds whose `subscribe` calls fail.
    refused: Mutex<Vec<EntityKind>>,
    /// `true` while fetches may complete.
    gate: watch::Sender<bool>,
}

impl InMemoryRemote {
    pub fn new() -> Self {
        Self {
            notes: RwLock::new(Vec::new()),
            todos: RwLock::new(Vec::new()),
            subscribers: Mutex::new(Vec::new()),
            note_fetches: AtomicUsize::new(0),
            todo_fetches: AtomicUsize::new(0),
            failing: AtomicBool::new(false),
            refused: Mutex::new(Vec::new()),
            gate: watch::Sender::new(true),
        }
    }

    /// Replace all notes without notifying subscribers.
    pub fn set_notes(&self, notes: Vec<Note>) {
        *self.notes.write().unwrap_or_else(|e| e.into_inner()) = notes;
    }

    /// Replace all to-do lists without notifying subscribers.
    pub fn set_todo_lists(&self, lists: Vec<TodoList>) {
        *self.todos.write().unwrap_or_else(|e| e.into_inner()) = lists;
    }

    /// Make every list call fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Relaxed);
    }

    /// Make `subscribe` fail for `kind`.
    pub fn refuse_subscriptions(&self, kind: EntityKind) {
        self.refused
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(kind);
    }

    /// Hold list calls pending until `resume_fetches`.
    pub fn pause_fetches(&self) {
        self.gate.send_replace(false);
    }

    pub fn resume_fetches(&self) {
        self.gate.send_replace(true);
    }

    /// Number of list calls started for `kind`.
    pub fn fetch_count(&self, kind: EntityKind) -> usize {
        match kind {
            EntityKind::Note => self.note_fetches.load(Ordering::Relaxed),
            EntityKind::TodoList => self.todo_fetches.load(Ordering::Relaxed),
        }
    }

    /// Open subscriptions (closed ones are pruned on the next push).
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|s| !s.tx.is_closed())
            .count()
    }

    /// Push a change signal to subscribers of `(owner, kind)`.
    pub fn notify_change(&self, owner: &OwnerId, kind: EntityKind) {
        let mut subscribers = self.subscribers.lock().unwrap_or_else(|e| e.into_inner());
        subscribers.retain(|s| !s.tx.is_closed());
        for subscriber in subscribers.iter() {
            if subscriber.owner == *owner && subscriber.kind == kind {
                let _ = subscriber.tx.unbounded_send(ChangeSignal { kind });
            }
        }
    }

    async fn begin_fetch(&self, kind: EntityKind) -> Result<()> {
        match kind {
            EntityKind::Note => self.note_fetches.fetch_add(1, Ordering::Relaxed),
            EntityKind::TodoList => self.todo_fetches.fetch_add(1, Ordering::Relaxed),
        };

        let mut gate = self.gate.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = gate.wait_for(|open| *open).await;

        if self.failing.load(Ordering::Relaxed) {
            return Err(RemoteError::Network("remote unavailable".into()));
        }
        Ok(())
    }

    fn owned_by<T: SyncRecord>(records: &[T], owner: &OwnerId) -> Vec<T> {
        let mut owned: Vec<T> = records
            .iter()
            .filter(|r| r.owner_id() == owner)
            .cloned()
            .collect();
        owned.sort_by_key(|r| r.order());
        owned
    }

    fn upsert<T: SyncRecord>(records: &RwLock<Vec<T>>, record: &T) {
        let mut records = records.write().unwrap_or_else(|e| e.into_inner());
        match records.iter_mut().find(|r| r.id() == record.id()) {
            Some(existing) => *existing = record.clone(),
            None => records.push(record.clone()),
        }
    }

    fn remove<T: SyncRecord>(records: &RwLock<Vec<T>>, owner: &OwnerId, id: &str) {
        records
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .retain(|r| !(r.id() == id && r.owner_id() == owner));
    }
}

impl Default for InMemoryRemote {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteDataService for InMemoryRemote {
    async fn list_notes(&self, owner: &OwnerId) -> Result<Vec<Note>> {
        self.begin_fetch(EntityKind::Note).await?;
        let notes = self.notes.read().unwrap_or_else(|e| e.into_inner());
        Ok(Self::owned_by(&notes, owner))
    }

    async fn list_todo_lists(&self, owner: &OwnerId) -> Result<Vec<TodoList>> {
        self.begin_fetch(EntityKind::TodoList).await?;
        let todos = self.todos.read().unwrap_or_else(|e| e.into_inner());
        Ok(Self::owned_by(&todos, owner))
    }

    async fn upsert_note(&self, note: &Note) -> Result<()> {
        Self::upsert(&self.notes, note);
        self.notify_change(&note.owner_id, EntityKind::Note);
        Ok(())
    }

    async fn delete_note(&self, owner: &OwnerId, id: &str) -> Result<()> {
        Self::remove(&self.notes, owner, id);
        self.notify_change(owner, EntityKind::Note);
        Ok(())
    }

    async fn upsert_todo_list(&self, list: &TodoList) -> Result<()> {
        Self::upsert(&self.todos, list);
        self.notify_change(&list.owner_id, EntityKind::TodoList);
        Ok(())
    }

    async fn delete_todo_list(&self, owner: &OwnerId, id: &str) -> Result<()> {
        Self::remove(&self.todos, owner, id);
        self.notify_change(owner, EntityKind::TodoList);
        Ok(())
    }

    async fn subscribe(&self, owner: &OwnerId, kind: EntityKind) -> Result<ChangeFeed> {
        if self
            .refused
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&kind)
        {
            return Err(RemoteError::Subscription(format!("{} feed refused", kind)));
        }

        let (tx, rx) = mpsc::unbounded();
        self.subscribers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Subscriber {
                owner: owner.clone(),
                kind,
                tx,
            });
        Ok(rx.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner(id: &str) -> OwnerId {
        OwnerId::new(id).unwrap()
    }

    fn note(id: &str, owner_id: &str, order: i64) -> Note {
        let mut note = Note::new(id, owner(owner_id), id, "");
        note.order = order;
        note
    }

    #[tokio::test]
    async fn test_list_is_scoped_and_ordered() {
        let remote = InMemoryRemote::new();
        remote.set_notes(vec![
            note("b", "alice", 2),
            note("x", "bob", 0),
            note("a", "alice", 1),
        ]);

        let notes = remote.list_notes(&owner("alice")).await.unwrap();
        let ids: Vec<_> = notes.iter().map(|n| n.id.as_str()).collect();

        assert_eq!(ids, vec!["a", "b"]);
        assert_eq!(remote.fetch_count(EntityKind::Note), 1);
    }

    #[tokio::test]
    async fn test_failing_remote_errors() {
        let remote = InMemoryRemote::new();
        remote.set_failing(true);
        assert!(remote.list_todo_lists(&owner("alice")).await.is_err());

        remote.set_failing(false);
        assert!(remote.list_todo_lists(&owner("alice")).await.is_ok());
    }

    #[tokio::test]
    async fn test_writes_signal_matching_subscribers() {
        let remote = InMemoryRemote::new();
        let mut alice_notes = remote.subscribe(&owner("alice"), EntityKind::Note).await.unwrap();
        let _bob_notes = remote.subscribe(&owner("bob"), EntityKind::Note).await.unwrap();

        remote.upsert_note(&note("n1", "alice", 0)).await.unwrap();

        let signal = alice_notes.next().await.unwrap();
        assert_eq!(signal.kind, EntityKind::Note);
        assert_eq!(remote.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_dropped_feed_is_pruned() {
        let remote = InMemoryRemote::new();
        let feed = remote.subscribe(&owner("alice"), EntityKind::Note).await.unwrap();
        drop(feed);

        remote.notify_change(&owner("alice"), EntityKind::Note);
        assert_eq!(remote.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_delete_only_touches_owner() {
        let remote = InMemoryRemote::new();
        remote.set_notes(vec![note("shared-id", "alice", 0), note("shared-id", "bob", 0)]);

        remote.delete_note(&owner("alice"), "shared-id").await.unwrap();

        assert!(remote.list_notes(&owner("alice")).await.unwrap().is_empty());
        assert_eq!(remote.list_notes(&owner("bob")).await.unwrap().len(), 1);
    }
}
