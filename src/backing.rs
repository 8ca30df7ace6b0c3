//! Seam to the authoritative backing store.
//!
//! The coordinator consumes this trait; it never interprets change events
//! itself. The backing owns the translation from its own event format to
//! [`Store::update`] / [`Store::remove`], which makes applying a change
//! idempotent with respect to both updates and removals, the property the
//! startup snapshot relies on.

use crossbeam::channel::Sender;
use thiserror::Error;

use crate::store::Store;

/// Whether retrying against the backing may succeed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Transience {
    /// Retry will never help without changing inputs or state.
    Permanent,
    /// Retry may help (transient contention or outage).
    Retryable,
    /// Unknown if retry will help.
    Unknown,
}

impl Transience {
    pub fn is_retryable(self) -> bool {
        matches!(self, Transience::Retryable)
    }
}

/// Failure reported by the backing while snapshotting or applying a change.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct BackingError {
    message: String,
    transience: Transience,
}

impl BackingError {
    pub fn new(message: impl Into<String>, transience: Transience) -> BackingError {
        BackingError {
            message: message.into(),
            transience,
        }
    }

    pub fn permanent(message: impl Into<String>) -> BackingError {
        BackingError::new(message, Transience::Permanent)
    }

    pub fn retryable(message: impl Into<String>) -> BackingError {
        BackingError::new(message, Transience::Retryable)
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn transience(&self) -> Transience {
        self.transience
    }
}

/// What the coordinator needs from the backing store.
pub trait Backing: Send + 'static {
    /// One change event from the backing's feed. Opaque to the coordinator.
    type Change: Send + 'static;

    /// Populate `store` with a full snapshot of the current state.
    ///
    /// Called exactly once, before the service loop starts. Failure is
    /// fatal to the coordinator.
    fn get_all(&mut self, store: &mut Store) -> Result<(), BackingError>;

    /// Apply one change event to `store`.
    fn changed(&mut self, store: &mut Store, change: Self::Change) -> Result<(), BackingError>;

    /// Start delivering change events on `changes`.
    fn watch(&mut self, changes: Sender<Self::Change>);

    /// Stop delivering change events on `changes`. Called on every
    /// coordinator exit path.
    fn unwatch(&mut self, changes: &Sender<Self::Change>);
}
