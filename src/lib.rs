#![forbid(unsafe_code)]

//! Multi-client state-change broadcaster.
//!
//! One in-memory [`Store`] mirrors a stream of change events from an
//! authoritative backing store; a single coordinator thread delivers to any
//! number of independent [`Observer`]s the minimal ordered set of deltas
//! each has not yet seen.
//!
//! - [`StateFeed::spawn`] starts the coordinator over a [`Backing`]
//!   implementation.
//! - [`Observer::next`] blocks until there are changes past the observer's
//!   cursor and returns them oldest first.
//! - Removed entities linger as refcounted tombstones exactly until every
//!   observer that saw them alive has been told they are gone.
//!
//! The feed is memoryless across restarts: it is rebuilt from a full
//! snapshot at startup.

pub mod backing;
pub mod config;
mod coordinator;
pub mod entity;
pub mod envelope;
pub mod error;
mod feed;
mod observer;
pub mod store;

pub use backing::{Backing, BackingError, Transience};
pub use config::{FailurePolicy, FeedConfig};
pub use entity::{
    AnnotationInfo, Endpoint, EntityId, EntityInfo, EntityKind, Life, MachineInfo, Port,
    RelationInfo, ServiceInfo, UnitInfo,
};
pub use envelope::{DecodeError, Delta, decode_delta, encode_delta};
pub use error::{FeedError, TerminationCause};
pub use feed::StateFeed;
pub use observer::Observer;
pub use store::{Revno, Store};
