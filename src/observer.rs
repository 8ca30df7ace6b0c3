//! Client-facing observer handle.

use std::sync::{Arc, OnceLock};

use crossbeam::channel::{self, Sender};

use crate::coordinator::{FeedRequest, NextReply, ObserverId};
use crate::envelope::Delta;
use crate::error::{FeedError, TerminationCause};

/// Polls the coordinator for deltas since its last successful `next()`.
///
/// The handle holds no store access; it is a thin shim over the request
/// channel. Share it behind `Arc` for concurrent `next()` calls; multiple
/// outstanding requests are permitted and served FIFO.
pub struct Observer {
    id: ObserverId,
    request_tx: Sender<FeedRequest>,
    death: Arc<OnceLock<TerminationCause>>,
}

impl Observer {
    pub(crate) fn new(
        id: ObserverId,
        request_tx: Sender<FeedRequest>,
        death: Arc<OnceLock<TerminationCause>>,
    ) -> Observer {
        Observer {
            id,
            request_tx,
            death,
        }
    }

    /// Block until there are changes this observer has not seen, returning
    /// them oldest first.
    ///
    /// Fails with [`FeedError::ObserverStopped`] once the observer is
    /// stopped, and with [`FeedError::Terminated`] after coordinator death;
    /// it never blocks past either.
    pub fn next(&self) -> Result<Vec<Delta>, FeedError> {
        let (reply_tx, reply_rx) = channel::bounded(1);
        let request = FeedRequest::Next {
            observer: self.id,
            reply: reply_tx,
        };
        if self.request_tx.send(request).is_err() {
            return Err(self.terminated());
        }
        match reply_rx.recv() {
            Ok(NextReply::Deltas(deltas)) => Ok(deltas),
            Ok(NextReply::Stopped) => Err(FeedError::ObserverStopped),
            Err(_) => Err(self.terminated()),
        }
    }

    /// Stop the observer.
    ///
    /// Pending and future `next()` calls fail with
    /// [`FeedError::ObserverStopped`]. Stopping twice is a no-op; stopping
    /// after coordinator death reports the terminal error.
    pub fn stop(&self) -> Result<(), FeedError> {
        let request = FeedRequest::Stop { observer: self.id };
        if self.request_tx.send(request).is_err() {
            return Err(self.terminated());
        }
        Ok(())
    }

    fn terminated(&self) -> FeedError {
        let cause = self
            .death
            .get()
            .cloned()
            .unwrap_or(TerminationCause::Shutdown);
        FeedError::Terminated(cause)
    }
}
