//! Client-facing error taxonomy.

use thiserror::Error;

use crate::backing::BackingError;

/// Why the coordinator exited.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TerminationCause {
    /// Orderly shutdown: the handle was shut down or dropped.
    #[error("shut down")]
    Shutdown,
    /// The backing failed while snapshotting or applying a change.
    #[error("backing failure: {0}")]
    Backing(BackingError),
}

/// Error surfaced by [`Observer::next`], [`Observer::stop`] and
/// [`StateFeed::shutdown`].
///
/// `ObserverStopped` is scoped to one observer; `Terminated` means the
/// whole feed is gone and carries its cause of death.
///
/// [`Observer::next`]: crate::Observer::next
/// [`Observer::stop`]: crate::Observer::stop
/// [`StateFeed::shutdown`]: crate::StateFeed::shutdown
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FeedError {
    #[error("observer was stopped")]
    ObserverStopped,
    #[error("state feed terminated: {0}")]
    Terminated(TerminationCause),
}
