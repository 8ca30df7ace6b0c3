//! Owning handle to a running feed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;

use crossbeam::channel::{self, Sender};
use tracing::info;

use crate::backing::Backing;
use crate::config::FeedConfig;
use crate::coordinator::{Coordinator, FeedRequest, ObserverId};
use crate::error::{FeedError, TerminationCause};
use crate::observer::Observer;

/// Handle to a coordinator thread.
///
/// Dropping the handle signals shutdown just like [`StateFeed::shutdown`],
/// minus the join and the cause report.
pub struct StateFeed {
    request_tx: Sender<FeedRequest>,
    shutdown_tx: Sender<()>,
    death: Arc<OnceLock<TerminationCause>>,
    next_observer_id: AtomicU64,
    join: Option<JoinHandle<()>>,
}

impl StateFeed {
    /// Spawn a coordinator thread over `backing`.
    ///
    /// The coordinator subscribes to the backing's change feed, loads the
    /// full snapshot and then starts serving observers.
    pub fn spawn<B: Backing>(backing: B, config: FeedConfig) -> StateFeed {
        let (request_tx, request_rx) = channel::unbounded();
        let (shutdown_tx, shutdown_rx) = channel::bounded(1);
        let death = Arc::new(OnceLock::new());
        let coordinator = Coordinator::new(backing, config, Arc::clone(&death));
        let join = std::thread::spawn(move || coordinator.run(request_rx, shutdown_rx));
        info!("state feed coordinator started");
        StateFeed {
            request_tx,
            shutdown_tx,
            death,
            next_observer_id: AtomicU64::new(1),
            join: Some(join),
        }
    }

    /// Create a new observer over this feed.
    ///
    /// The observer starts at revno 0 ("tell me everything that currently
    /// exists") and is registered with the coordinator on its first
    /// [`Observer::next`] call.
    pub fn observer(&self) -> Observer {
        let id = ObserverId(self.next_observer_id.fetch_add(1, Ordering::SeqCst));
        Observer::new(id, self.request_tx.clone(), Arc::clone(&self.death))
    }

    /// Signal shutdown and wait for the coordinator to exit.
    ///
    /// Every pending `next()` completes with
    /// [`FeedError::ObserverStopped`]. Returns `Ok` on an orderly shutdown;
    /// if the coordinator had already died of a backing failure, that cause
    /// is reported instead.
    pub fn shutdown(mut self) -> Result<(), FeedError> {
        let _ = self.shutdown_tx.try_send(());
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
        match self.death.get() {
            Some(TerminationCause::Backing(err)) => Err(FeedError::Terminated(
                TerminationCause::Backing(err.clone()),
            )),
            _ => Ok(()),
        }
    }
}
