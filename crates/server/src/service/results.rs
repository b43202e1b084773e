//! Outcomes of service operations.
//!
//! Rejected preconditions are ordinary results, not errors. `ServiceError`
//! only covers requests that never got an answer from the service thread.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimResult {
    Success,
    AlreadyClaimed,
    /// The owner already holds the configured maximum in this world.
    TooMany,
    /// Unknown world.
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OwnerActionResult {
    Success,
    /// Nothing claimed there (or the world is unknown).
    Unclaimed,
    NotOwner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeResult {
    Success,
    Unclaimed,
    NotOwner,
    TargetUnclaimed,
    NotSameOwner,
    AlreadyMerged,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnmergeResult {
    Success,
    NotMerged,
    Unclaimed,
    NotOwner,
    Failed,
}

impl ClaimResult {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl OwnerActionResult {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl MergeResult {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl UnmergeResult {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("plot service is not running")]
    Stopped,
    /// A state operation was made from inside a `with_state` closure, which
    /// already holds the plot state.
    #[error("plot state is already borrowed by the running task")]
    Reentrant,
    /// The task was dropped before replying, usually because it panicked.
    #[error("plot service dropped the request")]
    Dropped,
}
