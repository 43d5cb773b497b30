//! Realtime path: change feeds with a trailing debounce.

use super::{Guard, Shared};
use crate::record::EntityKind;
use crate::remote::RemoteDataService;
use crate::store::KeyValueStore;
use futures::StreamExt;
use std::sync::Arc;
use tokio::time::{self, Instant};
use tracing::{debug, error, warn};

/// Body of the task watching one kind's change feed.
///
/// Every signal pushes the refetch deadline back by the debounce window, so a
/// burst collapses into one refetch that starts after the last signal.
pub(super) async fn watch<R, S>(shared: Arc<Shared<R, S>>, guard: Guard, kind: EntityKind)
where
    R: RemoteDataService + 'static,
    S: KeyValueStore + 'static,
{
    let mut feed = match shared.remote.subscribe(&shared.owner, kind).await {
        Ok(feed) => feed,
        Err(e) => {
            warn!("Failed to subscribe to {} changes for {}: {}", kind, shared.owner, e);
            return;
        }
    };

    let debounce = shared.config.debounce();

    while feed.next().await.is_some() {
        let mut deadline = Instant::now() + debounce;
        let mut closed = false;

        loop {
            match time::timeout_at(deadline, feed.next()).await {
                Ok(Some(_)) => deadline = Instant::now() + debounce,
                Ok(None) => {
                    closed = true;
                    time::sleep_until(deadline).await;
                    break;
                }
                Err(_) => break,
            }
        }

        if !shared.is_current(guard) {
            return;
        }
        shared.refetch(guard, kind).await;

        if closed {
            break;
        }
    }

    debug!("Change feed for {} of {} ended", kind, shared.owner);
}

impl<R, S> Shared<R, S>
where
    R: RemoteDataService + 'static,
    S: KeyValueStore + 'static,
{
    /// Refetch one kind after a change signal.
    async fn refetch(&self, guard: Guard, kind: EntityKind) {
        let outcome = match kind {
            EntityKind::Note => self
                .remote
                .list_notes(&self.owner)
                .await
                .map(|notes| self.accept(guard, notes)),
            EntityKind::TodoList => self
                .remote
                .list_todo_lists(&self.owner)
                .await
                .map(|todos| self.accept(guard, todos)),
        };

        if let Err(e) = outcome {
            if self.report(guard, false) {
                error!("Refetch of {} failed for {}: {}", kind, self.owner, e);
            }
        }
    }
}
