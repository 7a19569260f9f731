//! Frontier of crawl work
//!
//! This module handles:
//! - Deduplicating crawl items by canonical resource id
//! - Handing pending items to workers in discovery order
//! - Re-queueing transient failures with exponential backoff
//! - Detecting the end of the crawl (nothing pending, nothing in flight)

use crate::state::{CrawlItem, ItemState, ResourceId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Upper bound for a single retry backoff
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// Returned by [`Frontier::take`] once no more work will be handed out
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("frontier closed")]
pub struct FrontierClosed;

/// What [`Frontier::fail`] did with the item
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailOutcome {
    /// Item is pending again and becomes ready after `delay`
    Retrying { attempt: u32, delay: Duration },
    /// Item is terminally failed
    Failed,
}

/// Snapshot of how many items are in each state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrontierCounts {
    pub pending: usize,
    pub in_flight: usize,
    pub done: usize,
    pub skipped: usize,
    pub failed: usize,
}

#[derive(Debug)]
struct Entry {
    item: CrawlItem,
    state: ItemState,
    retries: u32,
    ready_at: Option<Instant>,
}

impl Entry {
    fn transition(&mut self, next: ItemState) {
        if !self.state.can_transition_to(next) {
            warn!(
                "Unexpected state change for {}: {} -> {}",
                self.item.id, self.state, next
            );
        }
        self.state = next;
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<ResourceId, Entry>,
    pending: VecDeque<ResourceId>,
    in_flight: usize,
    closed: bool,
}

impl Inner {
    fn offer(&mut self, item: CrawlItem) -> bool {
        if self.closed {
            return false;
        }

        if let Some(existing) = self.entries.get(&item.id) {
            if existing.item.rule != item.rule || existing.item.source_url != item.source_url {
                warn!(
                    "Resource id conflict for {}: already queued from {} (rule {}), ignoring {} (rule {})",
                    item.id,
                    existing.item.source_url,
                    existing.item.rule,
                    item.source_url,
                    item.rule
                );
            }
            return false;
        }

        debug!("Queued {} (rule {})", item.id, item.rule);
        self.pending.push_back(item.id.clone());
        self.entries.insert(
            item.id.clone(),
            Entry {
                item,
                state: ItemState::Pending,
                retries: 0,
                ready_at: None,
            },
        );
        true
    }

    /// Moves an in-flight item to `next` and enqueues what it led to
    fn finish(&mut self, id: &ResourceId, next: ItemState, discovered: Vec<CrawlItem>) -> usize {
        match self.entries.get_mut(id) {
            Some(entry) => {
                entry.transition(next);
                self.in_flight = self.in_flight.saturating_sub(1);
            }
            None => {
                warn!("Finished unknown item {}", id);
                return 0;
            }
        }

        discovered
            .into_iter()
            .map(|item| self.offer(item))
            .filter(|added| *added)
            .count()
    }

    /// Pops the first pending item that is ready, or reports how long to wait
    fn next_ready(&mut self, now: Instant) -> Result<CrawlItem, Option<Duration>> {
        let position = self.pending.iter().position(|id| {
            self.entries
                .get(id)
                .and_then(|e| e.ready_at)
                .map_or(true, |at| at <= now)
        });

        if let Some(position) = position {
            if let Some(id) = self.pending.remove(position) {
                if let Some(entry) = self.entries.get_mut(&id) {
                    entry.transition(ItemState::InFlight);
                    entry.ready_at = None;
                    self.in_flight += 1;
                    return Ok(entry.item.clone());
                }
            }
        }

        Err(self.calculate_minimum_wait_time(now))
    }

    /// Time until the earliest waiting retry becomes ready
    fn calculate_minimum_wait_time(&self, now: Instant) -> Option<Duration> {
        self.pending
            .iter()
            .filter_map(|id| self.entries.get(id).and_then(|e| e.ready_at))
            .map(|at| at.saturating_duration_since(now))
            .min()
    }

    fn is_drained(&self) -> bool {
        self.pending.is_empty() && self.in_flight == 0
    }
}

/// Shared queue of crawl items keyed by resource id
///
/// A single mutex guards the state map and the pending queue; workers waiting in
/// [`take`](Frontier::take) are woken whenever either changes.
#[derive(Debug)]
pub struct Frontier {
    inner: Mutex<Inner>,
    notify: Notify,
    max_retries: u32,
    retry_base_delay: Duration,
}

impl Frontier {
    /// Creates an empty frontier
    ///
    /// # Arguments
    ///
    /// * `max_retries` - How many times a transient failure is re-queued
    /// * `retry_base_delay` - Backoff before the first retry; doubled for each further one
    pub fn new(max_retries: u32, retry_base_delay: Duration) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            max_retries,
            retry_base_delay,
        }
    }

    /// Adds an item unless its id is already known
    ///
    /// Returns true if the item was queued.
    pub fn offer(&self, item: CrawlItem) -> bool {
        let added = self.lock().offer(item);
        if added {
            self.notify.notify_waiters();
        }
        added
    }

    /// Waits for the next ready item
    ///
    /// Returns [`FrontierClosed`] after [`close`](Frontier::close), or once nothing is
    /// pending and nothing is in flight.
    pub async fn take(&self) -> Result<CrawlItem, FrontierClosed> {
        loop {
            let notified = self.notify.notified();

            let wait = {
                let mut inner = self.lock();
                if inner.closed {
                    return Err(FrontierClosed);
                }

                match inner.next_ready(Instant::now()) {
                    Ok(item) => return Ok(item),
                    Err(_) if inner.is_drained() => {
                        drop(inner);
                        self.notify.notify_waiters();
                        return Err(FrontierClosed);
                    }
                    Err(wait) => wait,
                }
            };

            match wait {
                Some(wait) => {
                    tokio::select! {
                        _ = notified => {}
                        _ = tokio::time::sleep(wait) => {}
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Marks an in-flight item done and queues the items it led to
    ///
    /// Returns how many of the discovered items were new.
    pub fn complete(&self, id: &ResourceId, discovered: Vec<CrawlItem>) -> usize {
        let added = self.lock().finish(id, ItemState::Done, discovered);
        self.notify.notify_waiters();
        added
    }

    /// Marks an in-flight item skipped (already in the ledger) and queues the items it led to
    pub fn skip(&self, id: &ResourceId, discovered: Vec<CrawlItem>) -> usize {
        let added = self.lock().finish(id, ItemState::Skipped, discovered);
        self.notify.notify_waiters();
        added
    }

    /// Records a failed attempt
    ///
    /// Retryable failures go back to pending with a backoff of
    /// `retry_base_delay * 2^(attempt - 1)` (at most 60s) until `max_retries` retries
    /// have been spent.
    pub fn fail(&self, id: &ResourceId, retryable: bool) -> FailOutcome {
        let outcome = {
            let mut guard = self.lock();
            let inner = &mut *guard;

            let Some(entry) = inner.entries.get_mut(id) else {
                warn!("Failed unknown item {}", id);
                return FailOutcome::Failed;
            };

            entry.transition(ItemState::Failed { retryable });
            inner.in_flight = inner.in_flight.saturating_sub(1);

            if retryable && entry.retries < self.max_retries && !inner.closed {
                entry.retries += 1;
                let delay = self.backoff(entry.retries);
                entry.transition(ItemState::Pending);
                entry.ready_at = Some(Instant::now() + delay);
                inner.pending.push_back(id.clone());
                FailOutcome::Retrying {
                    attempt: entry.retries,
                    delay,
                }
            } else {
                entry.state = ItemState::Failed { retryable: false };
                FailOutcome::Failed
            }
        };

        self.notify.notify_waiters();
        outcome
    }

    /// Stops handing out work; pending items stay pending
    pub fn close(&self) {
        self.lock().closed = true;
        self.notify.notify_waiters();
    }

    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Counts items per state
    pub fn counts(&self) -> FrontierCounts {
        let inner = self.lock();
        let mut counts = FrontierCounts::default();
        for entry in inner.entries.values() {
            match entry.state {
                ItemState::Pending => counts.pending += 1,
                ItemState::InFlight => counts.in_flight += 1,
                ItemState::Done => counts.done += 1,
                ItemState::Skipped => counts.skipped += 1,
                ItemState::Failed { .. } => counts.failed += 1,
            }
        }
        counts
    }

    /// Current state of an item, if the id was ever offered
    pub fn state_of(&self, id: &ResourceId) -> Option<ItemState> {
        self.lock().entries.get(id).map(|e| e.state)
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.saturating_sub(1).min(16);
        self.retry_base_delay.saturating_mul(factor).min(MAX_BACKOFF)
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
