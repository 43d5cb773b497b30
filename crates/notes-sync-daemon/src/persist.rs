//! Writes fetched collections to local storage.
//!
//! Session callbacks run synchronously inside the sync pipeline, so they only
//! queue the collection; a background task applies each one to its store in
//! arrival order.

use notes_sync_core::{Note, RecordStore, SessionCallbacks, TodoList};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

/// A full collection received from the sync session.
#[derive(Debug)]
enum Fetched {
    Notes(Vec<Note>),
    Todos(Vec<TodoList>),
}

/// Build session callbacks that persist every delivered collection.
///
/// Returns the callbacks and the persister task. The task ends once the
/// callbacks are dropped and the queue is drained.
pub fn persisting_callbacks<N, D>(notes: N, todos: D) -> (SessionCallbacks, JoinHandle<()>)
where
    N: RecordStore<Note> + 'static,
    D: RecordStore<TodoList> + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let todos_tx = tx.clone();

    let callbacks = SessionCallbacks::new(
        move |fetched: &[Note]| {
            if tx.send(Fetched::Notes(fetched.to_vec())).is_err() {
                warn!("Persister stopped, dropping {} notes", fetched.len());
            }
        },
        move |fetched: &[TodoList]| {
            if todos_tx.send(Fetched::Todos(fetched.to_vec())).is_err() {
                warn!("Persister stopped, dropping {} to-do lists", fetched.len());
            }
        },
    );

    let task = tokio::spawn(run_persister(rx, notes, todos));
    (callbacks, task)
}

async fn run_persister<N, D>(mut rx: mpsc::UnboundedReceiver<Fetched>, notes: N, todos: D)
where
    N: RecordStore<Note>,
    D: RecordStore<TodoList>,
{
    while let Some(fetched) = rx.recv().await {
        match fetched {
            Fetched::Notes(records) => {
                let count = records.len();
                match notes.replace_all(records).await {
                    Ok(()) => debug!("Persisted {} notes", count),
                    Err(e) => error!("Failed to persist notes: {}", e),
                }
            }
            Fetched::Todos(records) => {
                let count = records.len();
                match todos.replace_all(records).await {
                    Ok(()) => debug!("Persisted {} to-do lists", count),
                    Err(e) => error!("Failed to persist to-do lists: {}", e),
                }
            }
        }
    }
    debug!("Persister finished");
}
