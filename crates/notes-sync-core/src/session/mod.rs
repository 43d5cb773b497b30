//! Sync session for one signed-in owner.
//!
//! A `SyncSession` drives two independent update paths against the remote:
//!
//! - **Polling**: one immediate fetch cycle, then one every `poll_interval`.
//! - **Realtime**: one change feed per record kind; bursts of signals are
//!   debounced into a single refetch of that kind.
//!
//! Both paths feed the same pipeline: compare against the previous snapshot,
//! notify about changes made elsewhere (skipping local echoes and anything
//! already notified), hand the full collection to the session callbacks and
//! replace the snapshot.
//!
//! Each running path holds a generation number. Stopping a path retires its
//! generation, and every async completion checks its generation under the
//! same lock that guards the snapshots, so results that arrive after a stop
//! are discarded.

mod polling;
mod realtime;

use crate::change::detect_changes;
use crate::config::SyncConfig;
use crate::connectivity::{AlwaysOnline, Connectivity};
use crate::local_changes::LocalChangeTracker;
use crate::notified::NotificationLog;
use crate::notifier::{LogNotifier, Notifier, notification_title};
use crate::record::{EntityKind, Note, OwnerId, SyncRecord, TodoList};
use crate::remote::{RemoteDataService, RemoteError, Result as RemoteResult};
use crate::status::{SyncStatus, SyncStatusTracker};
use crate::store::KeyValueStore;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, info};

pub type NotesCallback = Box<dyn Fn(&[Note]) + Send + Sync>;
pub type TodosCallback = Box<dyn Fn(&[TodoList]) + Send + Sync>;

/// Receivers for fresh collections.
///
/// Each callback gets the complete collection after every successful fetch of
/// its kind, whether or not anything changed. The session does not write
/// fetched records to local storage: **the receiver is responsible for
/// persisting them.**
pub struct SessionCallbacks {
    on_notes_change: NotesCallback,
    on_todos_change: TodosCallback,
}

impl SessionCallbacks {
    pub fn new(
        on_notes_change: impl Fn(&[Note]) + Send + Sync + 'static,
        on_todos_change: impl Fn(&[TodoList]) + Send + Sync + 'static,
    ) -> Self {
        Self {
            on_notes_change: Box::new(on_notes_change),
            on_todos_change: Box::new(on_todos_change),
        }
    }

    /// Callbacks that ignore every collection.
    pub fn noop() -> Self {
        Self::new(|_| {}, |_| {})
    }
}

/// Collaborators of a session.
pub struct SessionDeps<R, S> {
    pub remote: R,
    /// Durable storage for the notification de-dup set.
    pub store: S,
    pub notifier: Arc<dyn Notifier>,
    pub connectivity: Arc<dyn Connectivity>,
    pub status: Arc<SyncStatusTracker>,
}

impl<R, S> SessionDeps<R, S> {
    /// Defaults: notifications go to the log, the network is assumed
    /// reachable, and the session gets its own status tracker.
    pub fn new(remote: R, store: S) -> Self {
        Self {
            remote,
            store,
            notifier: Arc::new(LogNotifier),
            connectivity: Arc::new(AlwaysOnline),
            status: Arc::new(SyncStatusTracker::new()),
        }
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_connectivity(mut self, connectivity: Arc<dyn Connectivity>) -> Self {
        self.connectivity = connectivity;
        self
    }

    /// Share a tracker that outlives this session.
    pub fn with_status(mut self, status: Arc<SyncStatusTracker>) -> Self {
        self.status = status;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Path {
    Polling,
    Realtime,
}

/// Identity of one run of one path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Guard {
    path: Path,
    generation: u64,
}

struct PathRun {
    generation: u64,
    tasks: Vec<JoinHandle<()>>,
}

#[derive(Default)]
struct SessionState {
    notes: Vec<Note>,
    todos: Vec<TodoList>,
    next_generation: u64,
    polling: Option<PathRun>,
    realtime: Option<PathRun>,
}

impl SessionState {
    fn slot(&mut self, path: Path) -> &mut Option<PathRun> {
        match path {
            Path::Polling => &mut self.polling,
            Path::Realtime => &mut self.realtime,
        }
    }

    fn is_current(&self, guard: Guard) -> bool {
        let run = match guard.path {
            Path::Polling => &self.polling,
            Path::Realtime => &self.realtime,
        };
        run.as_ref().map(|run| run.generation) == Some(guard.generation)
    }
}

/// Ties a record type to its snapshot slot and callback.
trait Tracked: SyncRecord {
    fn snapshot(state: &mut SessionState) -> &mut Vec<Self>;

    fn deliver(callbacks: &SessionCallbacks, records: &[Self]);
}

impl Tracked for Note {
    fn snapshot(state: &mut SessionState) -> &mut Vec<Self> {
        &mut state.notes
    }

    fn deliver(callbacks: &SessionCallbacks, records: &[Self]) {
        (callbacks.on_notes_change)(records)
    }
}

impl Tracked for TodoList {
    fn snapshot(state: &mut SessionState) -> &mut Vec<Self> {
        &mut state.todos
    }

    fn deliver(callbacks: &SessionCallbacks, records: &[Self]) {
        (callbacks.on_todos_change)(records)
    }
}

struct Shared<R, S> {
    owner: OwnerId,
    config: SyncConfig,
    remote: R,
    notifier: Arc<dyn Notifier>,
    connectivity: Arc<dyn Connectivity>,
    status: Arc<SyncStatusTracker>,
    local: LocalChangeTracker,
    notified: NotificationLog<S>,
    callbacks: SessionCallbacks,
    state: Mutex<SessionState>,
}

impl<R, S> Shared<R, S>
where
    R: RemoteDataService + 'static,
    S: KeyValueStore + 'static,
{
    fn lock_state(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_current(&self, guard: Guard) -> bool {
        self.lock_state().is_current(guard)
    }

    fn is_running(&self, path: Path) -> bool {
        self.lock_state().slot(path).is_some()
    }

    /// Register a new run of `path` and return its guard.
    fn begin(&self, path: Path) -> Guard {
        let mut state = self.lock_state();
        let generation = state.next_generation;
        state.next_generation += 1;
        *state.slot(path) = Some(PathRun {
            generation,
            tasks: Vec::new(),
        });
        Guard { path, generation }
    }

    /// Attach a spawned task to its run; abort it if the run is already over.
    fn attach(&self, guard: Guard, task: JoinHandle<()>) {
        let mut state = self.lock_state();
        match state.slot(guard.path) {
            Some(run) if run.generation == guard.generation => run.tasks.push(task),
            _ => task.abort(),
        }
    }

    fn stop_path(&self, path: Path) {
        let run = {
            let mut state = self.lock_state();
            let run = state.slot(path).take();
            state.notes.clear();
            state.todos.clear();
            self.status.record(false);
            run
        };

        self.status.emit(false);

        if let Some(run) = run {
            for task in run.tasks {
                task.abort();
            }
            debug!("Stopped {:?} sync for {}", path, self.owner);
        }
    }

    /// Record a sync outcome for `guard`'s run. Returns `false`, leaving the
    /// status untouched, if the run is over.
    ///
    /// The status is written under the state lock, so it cannot land after a
    /// concurrent stop. Observers run once the lock is released.
    fn report(&self, guard: Guard, active: bool) -> bool {
        {
            let state = self.lock_state();
            if !state.is_current(guard) {
                return false;
            }
            self.status.record(active);
        }
        self.status.emit(active);
        true
    }

    /// Mark the sync as working and apply `records`, unless `guard` is stale.
    fn accept<T: Tracked>(&self, guard: Guard, records: Vec<T>) {
        if !self.report(guard, true) {
            debug!(
                "Discarding {} fetch for {}: session stopped",
                T::KIND,
                self.owner
            );
            return;
        }
        self.apply(guard, records);
    }

    /// Diff `fresh` against the snapshot, notify, hand it to the callback and
    /// keep it as the new snapshot.
    fn apply<T: Tracked>(&self, guard: Guard, fresh: Vec<T>) {
        let changes: Vec<(T, bool)> = {
            let mut state = self.lock_state();
            if !state.is_current(guard) {
                return;
            }
            let snapshot = T::snapshot(&mut state);
            let changes = detect_changes(snapshot, &fresh)
                .into_iter()
                .map(|change| (change.record.clone(), change.is_new))
                .collect();
            *snapshot = fresh.clone();
            changes
        };

        for (record, is_new) in &changes {
            self.notify(record, *is_new);
        }
        T::deliver(&self.callbacks, &fresh);
    }

    fn notify<T: SyncRecord>(&self, record: &T, is_new: bool) {
        let kind = T::KIND;
        if self.local.is_local(kind, record.id()) {
            debug!("Skipping notification for local {} {}", kind, record.id());
            return;
        }
        if self
            .notified
            .was_notified(kind, record.id(), record.modified_at())
        {
            return;
        }

        self.notified
            .mark_notified(kind, record.id(), record.modified_at());
        self.notifier.emit(
            kind,
            &notification_title(kind, is_new),
            record.display_title(),
        );
    }
}

/// Sync engine for one owner. Dropping the session stops both paths.
///
/// Starting a path spawns tokio tasks, so `start_polling`,
/// `subscribe_to_changes` and `start` must be called inside a runtime.
pub struct SyncSession<R, S>
where
    R: RemoteDataService + 'static,
    S: KeyValueStore + 'static,
{
    shared: Arc<Shared<R, S>>,
}

impl<R, S> SyncSession<R, S>
where
    R: RemoteDataService + 'static,
    S: KeyValueStore + 'static,
{
    pub fn new(
        owner: OwnerId,
        config: SyncConfig,
        deps: SessionDeps<R, S>,
        callbacks: SessionCallbacks,
    ) -> Self {
        let local = LocalChangeTracker::new(config.local_write_ttl());
        let notified = NotificationLog::new(deps.store, config.notified_capacity);

        Self {
            shared: Arc::new(Shared {
                owner,
                config,
                remote: deps.remote,
                notifier: deps.notifier,
                connectivity: deps.connectivity,
                status: deps.status,
                local,
                notified,
                callbacks,
                state: Mutex::new(SessionState::default()),
            }),
        }
    }

    pub fn owner_id(&self) -> &OwnerId {
        &self.shared.owner
    }

    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// Seed the previous snapshots and mark every record as already notified.
    ///
    /// Call once with the locally stored collections, before starting either
    /// path. Otherwise every existing record is reported as new on the first
    /// fetch.
    pub fn initialize_previous_state(&self, notes: Vec<Note>, todos: Vec<TodoList>) {
        self.shared.notified.seed_as_notified(&notes);
        self.shared.notified.seed_as_notified(&todos);

        let mut state = self.shared.lock_state();
        state.notes = notes;
        state.todos = todos;
    }

    /// Start the polling path, replacing any polling already running.
    pub fn start_polling(&self) {
        if self.is_polling() {
            self.stop_polling();
        }

        let guard = self.shared.begin(Path::Polling);
        let task = tokio::spawn(polling::run(Arc::clone(&self.shared), guard));
        self.shared.attach(guard, task);

        info!(
            "Polling started for {} every {:?}",
            self.shared.owner,
            self.shared.config.poll_interval()
        );
    }

    pub fn stop_polling(&self) {
        self.shared.stop_path(Path::Polling);
    }

    /// Open one change feed per record kind, replacing any already open.
    pub fn subscribe_to_changes(&self) {
        if self.is_subscribed() {
            self.unsubscribe_from_changes();
        }

        let guard = self.shared.begin(Path::Realtime);
        for kind in EntityKind::ALL {
            let task = tokio::spawn(realtime::watch(Arc::clone(&self.shared), guard, kind));
            self.shared.attach(guard, task);
        }

        info!("Subscribed to changes for {}", self.shared.owner);
    }

    pub fn unsubscribe_from_changes(&self) {
        self.shared.stop_path(Path::Realtime);
    }

    /// Start both paths.
    pub fn start(&self) {
        self.start_polling();
        self.subscribe_to_changes();
    }

    /// Stop both paths. Safe to call any number of times.
    pub fn stop(&self) {
        self.shared.stop_path(Path::Polling);
        self.shared.stop_path(Path::Realtime);
    }

    pub fn is_polling(&self) -> bool {
        self.shared.is_running(Path::Polling)
    }

    pub fn is_subscribed(&self) -> bool {
        self.shared.is_running(Path::Realtime)
    }

    /// Run one fetch cycle now, as a polling tick would.
    ///
    /// Returns `false` without fetching when neither path is running.
    pub async fn sync_now(&self) -> bool {
        let guard = {
            let state = self.shared.lock_state();
            [&state.polling, &state.realtime]
                .into_iter()
                .zip([Path::Polling, Path::Realtime])
                .find_map(|(run, path)| {
                    run.as_ref().map(|run| Guard {
                        path,
                        generation: run.generation,
                    })
                })
        };

        match guard {
            Some(guard) => {
                self.shared.run_cycle(guard).await;
                true
            }
            None => false,
        }
    }

    /// Remember that `id` was just written from this device, so its echo
    /// from the remote does not produce a notification.
    pub fn mark_local(&self, kind: EntityKind, id: &str) {
        self.shared.local.mark_local(kind, id);
    }

    pub async fn save_note(&self, note: &Note) -> RemoteResult<()> {
        self.check_owner(&note.owner_id)?;
        self.mark_local(EntityKind::Note, &note.id);
        self.shared.remote.upsert_note(note).await
    }

    pub async fn delete_note(&self, id: &str) -> RemoteResult<()> {
        self.mark_local(EntityKind::Note, id);
        self.shared.remote.delete_note(&self.shared.owner, id).await
    }

    pub async fn save_todo_list(&self, list: &TodoList) -> RemoteResult<()> {
        self.check_owner(&list.owner_id)?;
        self.mark_local(EntityKind::TodoList, &list.id);
        self.shared.remote.upsert_todo_list(list).await
    }

    pub async fn delete_todo_list(&self, id: &str) -> RemoteResult<()> {
        self.mark_local(EntityKind::TodoList, id);
        self.shared.remote.delete_todo_list(&self.shared.owner, id).await
    }

    pub fn status(&self) -> SyncStatus {
        self.shared.status.status()
    }

    pub fn status_tracker(&self) -> &Arc<SyncStatusTracker> {
        &self.shared.status
    }

    fn check_owner(&self, owner: &OwnerId) -> RemoteResult<()> {
        if *owner != self.shared.owner {
            return Err(RemoteError::Unauthorized(format!(
                "record belongs to {}, session is for {}",
                owner, self.shared.owner
            )));
        }
        Ok(())
    }
}

impl<R, S> Drop for SyncSession<R, S>
where
    R: RemoteDataService + 'static,
    S: KeyValueStore + 'static,
{
    fn drop(&mut self) {
        self.stop();
    }
}
