//! Polling path: a full fetch of both collections on a fixed interval.

use super::{Guard, Shared};
use crate::remote::RemoteDataService;
use crate::store::KeyValueStore;
use std::sync::Arc;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error};

/// Body of the polling task.
///
/// Cycles run one after another inside this task, so a slow fetch delays the
/// next tick instead of overlapping with it.
pub(super) async fn run<R, S>(shared: Arc<Shared<R, S>>, guard: Guard)
where
    R: RemoteDataService + 'static,
    S: KeyValueStore + 'static,
{
    shared.run_cycle(guard).await;
    if !shared.is_current(guard) {
        return;
    }

    let period = shared.config.poll_interval();
    let mut ticker = time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        if !shared.is_current(guard) {
            break;
        }
        shared.run_cycle(guard).await;
    }
}

impl<R, S> Shared<R, S>
where
    R: RemoteDataService + 'static,
    S: KeyValueStore + 'static,
{
    /// Fetch both collections and apply them. Never fails: errors are logged
    /// and mark the sync inactive.
    pub(super) async fn run_cycle(&self, guard: Guard) {
        if !self.connectivity.is_online() {
            debug!("Offline, skipping sync for {}", self.owner);
            self.report(guard, false);
            return;
        }

        let fetched = futures::try_join!(
            self.remote.list_notes(&self.owner),
            self.remote.list_todo_lists(&self.owner),
        );

        match fetched {
            Ok((notes, todos)) => {
                if !self.report(guard, true) {
                    debug!("Discarding sync result for {}: session stopped", self.owner);
                    return;
                }
                self.apply(guard, notes);
                self.apply(guard, todos);
            }
            Err(e) => {
                if self.report(guard, false) {
                    error!("Sync failed for {}: {}", self.owner, e);
                }
            }
        }
    }
}
