/// Lifecycle states of a frontier entry
///
/// This module defines every state a crawl item can be in while the crawl runs.
use std::fmt;

/// Represents the current state of a crawl item on the frontier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemState {
    // ===== Active States =====
    /// Item is queued and waiting for a worker
    Pending,

    /// A worker is fetching, extracting or persisting the item
    InFlight,

    // ===== Terminal States =====
    /// Item was fetched, persisted and recorded in the ledger
    Done,

    /// Item was already recorded in the ledger by an earlier run
    Skipped,

    /// Item failed; `retryable` failures are re-queued until the retry ceiling
    Failed { retryable: bool },
}

impl ItemState {
    /// Returns true if no further processing will happen for this item in this run
    pub fn is_terminal(&self) -> bool {
        !self.is_active()
    }

    /// Returns true if the item is waiting or being worked on
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Pending | Self::InFlight)
    }

    /// Returns true if this represents a successful completion
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done | Self::Skipped)
    }

    /// Returns true if moving from `self` to `next` is a legal step
    ///
    /// `Failed { retryable: true }` is only a transit state: the frontier moves it back
    /// to `Pending` in the same step, so it may also be recorded while a retry waits.
    pub fn can_transition_to(&self, next: ItemState) -> bool {
        use ItemState::*;
        matches!(
            (self, next),
            (Pending, InFlight)
                | (InFlight, Done)
                | (InFlight, Skipped)
                | (InFlight, Failed { .. })
                | (Failed { retryable: true }, Pending)
        )
    }

    /// Short lowercase label used in logs and reports
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Done => "done",
            Self::Skipped => "skipped",
            Self::Failed { retryable: true } => "failed_retryable",
            Self::Failed { retryable: false } => "failed",
        }
    }
}

impl fmt::Display for ItemState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}
