//! The pop loop: migration, optional blocking, and fair multi-queue
//! consumption (`spec.md` §4.4).

use crate::broker::{Broker, ReservedJob};
use crate::Error;
use parking_lot::Mutex;

/// A worker's view onto one or more queues.
///
/// Owns the `secondary_queue_had_job` flag that the fairness algorithm
/// carries across an entire sweep of a worker's configured queues — state
/// that a stateless `Broker` has no business holding, since one broker may
/// back several independent workers with different queue lists.
pub struct Consumer {
    broker: Broker,
    queues: Vec<String>,
    secondary_queue_had_job: Mutex<bool>,
}

impl Consumer {
    /// Build a consumer over the given queues, listed in priority order
    /// (index 0 is drained first). Falls back to the broker's configured
    /// default queue if `queues` is empty.
    pub fn new(broker: Broker, queues: Vec<String>) -> Self {
        let queues = if queues.is_empty() {
            vec![broker.config().default_queue.clone()]
        } else {
            queues
        };

        Self {
            broker,
            queues,
            secondary_queue_had_job: Mutex::new(false),
        }
    }

    /// The queues this consumer drains, in priority order.
    pub fn queues(&self) -> &[String] {
        &self.queues
    }

    /// Reserve one job from `queue` at the given priority `index`,
    /// implementing the full §4.4 algorithm for a single call:
    ///
    /// 1. Always migrate due `delayed` entries to `ready` first.
    /// 2. Migrate due `reserved` entries too, but only when a visibility
    ///    timeout is configured (`retry_after.is_some()`).
    /// 3. Attempt a reservation. Block on the notify list only for the
    ///    primary queue, and only when nothing else already had a job this
    ///    sweep.
    /// 4. Track whether a non-primary queue produced a job, so the next
    ///    sweep knows whether the primary queue's reserved set needs
    ///    another recovery pass.
    pub async fn pop(&self, queue: Option<&str>, index: usize) -> Result<Option<ReservedJob>, Error> {
        let is_primary = index == 0;

        self.broker.migrate_expired_delayed_only(queue).await?;
        if self.broker.config().retry_after.is_some() {
            self.broker.migrate_expired_reserved_only(queue).await?;
        }

        let should_block = is_primary && !*self.secondary_queue_had_job.lock();
        let mut job = self.broker.reserve_once(queue).await?;

        if job.is_none() && should_block {
            if let Some(block_for) = self.broker.config().block_for {
                if block_for > 0 {
                    self.broker.block_for_notify(queue, block_for).await?;
                    job = self.broker.reserve_once(queue).await?;
                }
            }
        }

        if is_primary {
            // Covers both step 5 (reset on success) and step 6 (reset when
            // nothing came back either) — the primary queue always clears
            // the flag, the outcome only matters for secondaries.
            *self.secondary_queue_had_job.lock() = false;
        } else if job.is_some() {
            *self.secondary_queue_had_job.lock() = true;
        }

        Ok(job)
    }

    /// Sweep all configured queues once, in priority order, returning the
    /// first job reserved. The ergonomic entry point for a worker loop that
    /// doesn't want to track indices itself.
    pub async fn poll(&self) -> Result<Option<ReservedJob>, Error> {
        for (index, queue) in self.queues.iter().enumerate() {
            if let Some(job) = self.pop(Some(queue), index).await? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }
}

