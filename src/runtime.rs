//! Runtime for processing chat events
//!
//! Every active user gets a worker task fed by a bounded channel, so events
//! of one user are handled strictly in arrival order while different users
//! interleave. Idle workers retire on their own.

mod broadcast;
mod executor;
mod sessions;
pub mod traits;

#[cfg(test)]
pub mod testing;

pub use executor::{DispatchSettings, Dispatcher};
pub use traits::*;

use crate::db::UserId;
use crate::state_machine::Inbound;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, RwLock};

/// Runtime over trait objects, as wired up by the binary
pub type SharedRuntime = RuntimeManager<dyn Directory, dyn Transport>;

/// Queued events per user; further events are dropped until it drains
const WORKER_QUEUE: usize = 32;

type WorkerMap = Arc<RwLock<HashMap<UserId, mpsc::Sender<Inbound>>>>;

/// Manager for all per-user workers
pub struct RuntimeManager<D, T>
where
    D: Directory + ?Sized + 'static,
    T: Transport + ?Sized + 'static,
{
    dispatcher: Arc<Dispatcher<D, T>>,
    workers: WorkerMap,
    idle_timeout: Duration,
}

impl<D, T> RuntimeManager<D, T>
where
    D: Directory + ?Sized + 'static,
    T: Transport + ?Sized + 'static,
{
    pub fn new(dispatcher: Dispatcher<D, T>, idle_timeout: Duration) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            workers: Arc::new(RwLock::new(HashMap::new())),
            idle_timeout,
        }
    }

    /// Queue an event for its sender's worker, starting one if needed.
    ///
    /// Never waits on a worker: when a user's queue is full the event is
    /// dropped, so a stalled user cannot hold up ingestion for everyone else.
    /// Returns whether the event was queued. Events without a sender are
    /// dropped here.
    pub async fn submit(&self, inbound: Inbound) -> bool {
        let Some(user_id) = inbound.user_id else {
            tracing::debug!("Dropping event without sender");
            return false;
        };

        let mut inbound = inbound;
        loop {
            {
                // Sends happen under the read lock; a worker retires only
                // under the write lock, so it never misses an event
                let workers = self.workers.read().await;
                if let Some(tx) = workers.get(&user_id) {
                    match tx.try_send(inbound) {
                        Ok(()) => return true,
                        Err(TrySendError::Full(_)) => {
                            tracing::warn!(
                                user_id,
                                queued = WORKER_QUEUE,
                                "Worker queue full, dropping event"
                            );
                            return false;
                        }
                        Err(TrySendError::Closed(returned)) => inbound = returned,
                    }
                }
            }
            self.spawn_worker(user_id).await;
        }
    }

    /// Start a worker unless a live one already exists
    async fn spawn_worker(&self, user_id: UserId) {
        let mut workers = self.workers.write().await;
        if workers.get(&user_id).is_some_and(|tx| !tx.is_closed()) {
            return;
        }

        let (tx, rx) = mpsc::channel(WORKER_QUEUE);
        workers.insert(user_id, tx.clone());

        tokio::spawn(run_worker(
            user_id,
            rx,
            tx.downgrade(),
            self.dispatcher.clone(),
            self.workers.clone(),
            self.idle_timeout,
        ));
    }

    pub async fn active_workers(&self) -> usize {
        self.workers.read().await.len()
    }

    pub fn dispatcher(&self) -> &Dispatcher<D, T> {
        &self.dispatcher
    }

    /// Stop accepting events; workers finish their queues and exit
    pub async fn shutdown(&self) {
        let count = {
            let mut workers = self.workers.write().await;
            let count = workers.len();
            workers.clear();
            count
        };
        tracing::info!(workers = count, "Runtime shutting down");
    }
}

async fn run_worker<D, T>(
    user_id: UserId,
    mut rx: mpsc::Receiver<Inbound>,
    // Weak, so that only the map entry keeps the channel open
    own_tx: mpsc::WeakSender<Inbound>,
    dispatcher: Arc<Dispatcher<D, T>>,
    workers: WorkerMap,
    idle_timeout: Duration,
) where
    D: Directory + ?Sized + 'static,
    T: Transport + ?Sized + 'static,
{
    tracing::debug!(user_id, "Worker started");

    loop {
        match tokio::time::timeout(idle_timeout, rx.recv()).await {
            Ok(Some(inbound)) => dispatcher.handle(inbound).await,
            Ok(None) => break,
            Err(_) => {
                let mut map = workers.write().await;
                match rx.try_recv() {
                    Ok(inbound) => {
                        drop(map);
                        dispatcher.handle(inbound).await;
                    }
                    Err(_) => {
                        let ours = own_tx.upgrade().is_some_and(|own| {
                            map.get(&user_id).is_some_and(|tx| tx.same_channel(&own))
                        });
                        if ours {
                            map.remove(&user_id);
                        }
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!(user_id, "Worker retired");
}
