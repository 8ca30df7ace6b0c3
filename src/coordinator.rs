//! The coordinator: one thread owning the store, multiplexing the backing
//! change feed, observer requests and shutdown.
//!
//! This is THE serialization point. The store and the observer bookkeeping
//! are touched from this thread only, which is what lets the store go
//! without internal locking. After every handled event the respond pass
//! serves each observer whose oldest pending request can now be satisfied.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, OnceLock};

use crossbeam::channel::{Receiver, Sender};
use tracing::{debug, error, info, warn};

use crate::backing::{Backing, BackingError};
use crate::config::{FailurePolicy, FeedConfig};
use crate::envelope::Delta;
use crate::error::TerminationCause;
use crate::store::{Revno, Store};

/// Identity of one observer, allocated by the `StateFeed` handle.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub(crate) struct ObserverId(pub(crate) u64);

/// Message from an observer handle to the coordinator.
pub(crate) enum FeedRequest {
    Next {
        observer: ObserverId,
        reply: Sender<NextReply>,
    },
    Stop {
        observer: ObserverId,
    },
}

/// Outcome of one `Next` request.
pub(crate) enum NextReply {
    Deltas(Vec<Delta>),
    Stopped,
}

/// Coordinator-side record of one observer. `stopped` is terminal.
#[derive(Default)]
struct ObserverState {
    revno: Revno,
    stopped: bool,
}

pub(crate) struct Coordinator<B: Backing> {
    backing: B,
    store: Store,
    config: FeedConfig,
    observers: HashMap<ObserverId, ObserverState>,
    /// Pending `Next` requests per observer, oldest at the front.
    waiting: HashMap<ObserverId, VecDeque<Sender<NextReply>>>,
    /// Published before any channel is released, so a client that loses its
    /// reply channel always finds the cause of death.
    death: Arc<OnceLock<TerminationCause>>,
}

impl<B: Backing> Coordinator<B> {
    pub(crate) fn new(
        backing: B,
        config: FeedConfig,
        death: Arc<OnceLock<TerminationCause>>,
    ) -> Coordinator<B> {
        Coordinator {
            backing,
            store: Store::new(),
            config,
            observers: HashMap::new(),
            waiting: HashMap::new(),
            death,
        }
    }

    /// Run to completion. Consumes the coordinator; the channels it holds
    /// are released only after the termination cause is published.
    pub(crate) fn run(mut self, requests: Receiver<FeedRequest>, shutdown: Receiver<()>) {
        let (change_tx, change_rx) =
            crossbeam::channel::bounded(self.config.change_buffer_events);
        self.backing.watch(change_tx.clone());
        let outcome = self.serve(&shutdown, &change_rx, &requests);
        self.backing.unwatch(&change_tx);
        match outcome {
            Ok(()) => {
                let _ = self.death.set(TerminationCause::Shutdown);
                self.drain_stopped();
                info!("state feed coordinator stopped");
            }
            Err(err) => {
                error!(error = %err, "state feed coordinator failed");
                let _ = self.death.set(TerminationCause::Backing(err));
                // Dropping the pending reply senders completes every blocked
                // next() with the published cause.
                self.waiting.clear();
            }
        }
    }

    fn serve(
        &mut self,
        shutdown: &Receiver<()>,
        changes: &Receiver<B::Change>,
        requests: &Receiver<FeedRequest>,
    ) -> Result<(), BackingError> {
        // Changes arriving during the snapshot sit in the change channel;
        // applying them afterwards is safe because the backing's ingest is
        // idempotent for both updates and removals.
        self.backing.get_all(&mut self.store)?;
        debug!(
            latest_revno = self.store.latest_revno(),
            "initial snapshot loaded"
        );
        loop {
            crossbeam::select! {
                recv(shutdown) -> _ => return Ok(()),
                recv(changes) -> msg => {
                    let Ok(change) = msg else { return Ok(()) };
                    if let Err(err) = self.backing.changed(&mut self.store, change) {
                        if self.config.failure_policy == FailurePolicy::SkipRetryable
                            && err.transience().is_retryable()
                        {
                            warn!(error = %err, "skipped retryable backing failure");
                        } else {
                            return Err(err);
                        }
                    }
                }
                recv(requests) -> msg => {
                    match msg {
                        Ok(request) => self.handle(request),
                        // Every handle and observer is gone; nobody is left
                        // to serve.
                        Err(_) => return Ok(()),
                    }
                }
            }
            self.respond();
        }
    }

    fn handle(&mut self, request: FeedRequest) {
        match request {
            FeedRequest::Next { observer, reply } => {
                let state = self.observers.entry(observer).or_default();
                if state.stopped {
                    let _ = reply.send(NextReply::Stopped);
                    return;
                }
                self.waiting.entry(observer).or_default().push_back(reply);
            }
            FeedRequest::Stop { observer } => {
                let state = self.observers.entry(observer).or_default();
                if state.stopped {
                    return;
                }
                state.stopped = true;
                let revno = state.revno;
                if let Some(queue) = self.waiting.remove(&observer) {
                    for reply in queue {
                        let _ = reply.send(NextReply::Stopped);
                    }
                }
                self.store.leave(revno);
                debug!(observer = observer.0, "observer stopped");
            }
        }
    }

    /// Serve the oldest pending request of every observer with unseen
    /// changes, then run the refcount accounting for what was delivered.
    fn respond(&mut self) {
        let ready: Vec<ObserverId> = self.waiting.keys().copied().collect();
        for observer in ready {
            let Some(state) = self.observers.get_mut(&observer) else {
                continue;
            };
            let changes = self.store.changes_since(state.revno);
            if changes.is_empty() {
                continue;
            }
            let Some(queue) = self.waiting.get_mut(&observer) else {
                continue;
            };
            let Some(reply) = queue.pop_front() else {
                continue;
            };
            if queue.is_empty() {
                self.waiting.remove(&observer);
            }
            let previous = state.revno;
            state.revno = self.store.latest_revno();
            let _ = reply.send(NextReply::Deltas(changes));
            self.store.seen(previous);
        }
    }

    /// Answer every still-pending request on orderly shutdown.
    fn drain_stopped(&mut self) {
        for (_, queue) in self.waiting.drain() {
            for reply in queue {
                let _ = reply.send(NextReply::Stopped);
            }
        }
    }
}
