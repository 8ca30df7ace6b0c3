//! Coordinator tunables (normative defaults).

use serde::{Deserialize, Serialize};

/// How the coordinator treats a failure from [`Backing::changed`].
///
/// The snapshot (`get_all`) is always fatal regardless of policy.
///
/// [`Backing::changed`]: crate::backing::Backing::changed
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Any failure terminates the coordinator; the supervising process is
    /// expected to reconnect and spawn a fresh feed.
    #[default]
    Fatal,
    /// Failures classified retryable are logged and skipped; everything
    /// else terminates the coordinator.
    SkipRetryable,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Capacity of the change channel between the backing and the
    /// coordinator. Sized so the backing never blocks under expected load;
    /// it also buffers changes that arrive while the startup snapshot runs.
    pub change_buffer_events: usize,
    pub failure_policy: FailurePolicy,
}

impl Default for FeedConfig {
    fn default() -> FeedConfig {
        FeedConfig {
            change_buffer_events: 1024,
            failure_policy: FailurePolicy::default(),
        }
    }
}
