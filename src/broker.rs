//! The broker façade: push, later, bulk, pop, ack/release, clear, size.

use crate::clock::{Clock, SystemClock};
use crate::config::{BrokerConfig, QueueKeys};
use crate::payload::{Delay, Payload};
use crate::scripts::Scripts;
use crate::Error;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// A job handed back by `pop`/`Consumer::pop`.
///
/// Carries the original payload (what the worker should act on), the
/// reserved copy (the exact token needed to ack or release it — see
/// `spec.md` §4.2.5), and the queue it came from. Holds a cloned `Broker`
/// handle so `ack`/`release` can be called directly on the job.
#[derive(Clone)]
pub struct ReservedJob {
    /// The payload as originally pushed, unmodified.
    pub payload: Payload,
    /// The payload as stored in the reserved set: `attempts` incremented,
    /// `reserved_at` stamped.
    pub reserved: Payload,
    /// The queue this job was reserved from.
    pub queue: String,
    reserved_copy_raw: String,
    broker: Broker,
}

impl ReservedJob {
    /// Acknowledge the job, removing it from the reserved set. A no-op
    /// (not an error) if the reservation already expired and was recovered
    /// by migration — see `spec.md` §7.
    pub async fn ack(&self) -> Result<(), Error> {
        self.broker.delete_reserved(&self.queue, self).await
    }

    /// Release the job back to `delayed`, available again after `delay`.
    pub async fn release(self, delay: impl Into<Delay>) -> Result<(), Error> {
        let queue = self.queue.clone();
        self.broker.delete_and_release(&queue, self, delay).await
    }
}

/// One entry in a `Broker::bulk` call: a built payload plus an optional
/// delay and an optional per-item queue override. Jobs without a delay go
/// straight to ready; jobs with one go to `delayed`, exactly as `push` vs.
/// `later` would handle them individually. Items may target different
/// queues in the same call — this is exactly why `bulk` must fall back to
/// plain pipelining under `cluster_mode` rather than a transaction, per
/// `spec.md` §4.3: a `MULTI`/`EXEC` spanning differently hash-tagged queues
/// would cross slots.
pub struct BulkItem {
    /// The payload to enqueue.
    pub payload: Payload,
    /// `None` for immediate availability, `Some` for a delayed job.
    pub delay: Option<Delay>,
    /// `None` to use `Broker::bulk`'s own `queue` argument (or the
    /// configured default), `Some` to target a specific queue for this item
    /// regardless of what the rest of the batch uses.
    pub queue: Option<String>,
}

impl BulkItem {
    /// An immediately-available bulk item, enqueued on `bulk`'s own queue.
    pub fn immediate<T: Serialize>(job: &str, data: &T) -> Result<Self, Error> {
        Ok(Self {
            payload: Payload::new(job, data)?,
            delay: None,
            queue: None,
        })
    }

    /// A delayed bulk item, enqueued on `bulk`'s own queue.
    pub fn delayed<T: Serialize>(job: &str, data: &T, delay: impl Into<Delay>) -> Result<Self, Error> {
        Ok(Self {
            payload: Payload::new(job, data)?,
            delay: Some(delay.into()),
            queue: None,
        })
    }

    /// Override the queue this item targets, independent of the rest of the
    /// batch.
    pub fn on_queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }
}

/// Counts returned by a migration sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MigrationCounts {
    /// Jobs moved from `delayed` to `ready`.
    pub from_delayed: usize,
    /// Jobs moved from `reserved` to `ready` (visibility-timeout recovery).
    /// Always zero when `retry_after` is `None`.
    pub from_reserved: usize,
}

impl MigrationCounts {
    /// Total jobs moved by this sweep.
    pub fn total(&self) -> usize {
        self.from_delayed + self.from_reserved
    }
}

/// A connection to the queue broker.
///
/// Wraps a single `redis::aio::ConnectionManager` (cheaply `Clone`, and
/// auto-reconnecting); this crate does not layer a connection pool on top,
/// consistent with connection management being out of this core's scope.
#[derive(Clone)]
pub struct Broker {
    conn: ConnectionManager,
    config: Arc<BrokerConfig>,
    scripts: Arc<Scripts>,
    clock: Arc<dyn Clock>,
}

impl Broker {
    /// Open a new connection using `config.redis_url`.
    pub async fn connect(config: BrokerConfig) -> Result<Self, Error> {
        let client = redis::Client::open(config.redis_url.as_str())?;
        let conn = ConnectionManager::new(client).await?;
        Ok(Self::from_connection(conn, config))
    }

    /// Build a broker around an already-open connection manager — the
    /// injected command executor this core assumes (`spec.md` §1).
    pub fn from_connection(conn: ConnectionManager, config: BrokerConfig) -> Self {
        Self {
            conn,
            config: Arc::new(config),
            scripts: Arc::new(Scripts::default()),
            clock: Arc::new(SystemClock),
        }
    }

    /// Override the clock (for deterministic tests).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// The broker's configuration.
    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    fn keys(&self, queue: Option<&str>) -> Result<(String, QueueKeys), Error> {
        let name = self.config.resolve_queue(queue).to_string();
        let keys = self.config.keys(&name)?;
        Ok((name, keys))
    }

    /// `push(job, data, queue?) -> id`
    pub async fn push<T: Serialize>(
        &self,
        job: &str,
        data: &T,
        queue: Option<&str>,
    ) -> Result<String, Error> {
        let payload = Payload::new(job, data)?;
        self.push_raw(payload, queue).await
    }

    /// `pushRaw(payload, queue?) -> id`
    pub async fn push_raw(&self, payload: Payload, queue: Option<&str>) -> Result<String, Error> {
        let (name, keys) = self.keys(queue)?;
        let id = payload.id.clone();
        let json = payload.to_json()?;

        let mut conn = self.conn.clone();
        self.scripts.push(&mut conn, &keys, &json).await?;

        debug!(queue = %name, job_id = %id, "pushed job to ready");
        Ok(id)
    }

    /// `later(delay, job, data, queue?) -> id`
    pub async fn later<T: Serialize>(
        &self,
        delay: impl Into<Delay>,
        job: &str,
        data: &T,
        queue: Option<&str>,
    ) -> Result<String, Error> {
        let payload = Payload::new(job, data)?;
        let (name, keys) = self.keys(queue)?;
        let available_at = delay.into().resolve(self.clock.as_ref());
        let id = payload.id.clone();
        let json = payload.to_json()?;

        let mut conn = self.conn.clone();
        let _: () = conn.zadd(&keys.delayed, &json, available_at as f64).await?;

        debug!(queue = %name, job_id = %id, available_at, "pushed job to delayed");
        Ok(id)
    }

    /// `bulk(jobs, queue?)`: enqueues a batch of immediate and/or delayed
    /// jobs in a single round trip. Each item resolves its own keys — it
    /// targets `queue` unless it overrides that with `BulkItem::on_queue`,
    /// so a single call may span several queues. Uses a real transaction on
    /// a single node, or plain pipelining on a cluster (mixed-queue
    /// transactions would cross hash slots) — see `BrokerConfig::cluster_mode`.
    pub async fn bulk(&self, items: Vec<BulkItem>, queue: Option<&str>) -> Result<Vec<String>, Error> {
        let now = self.clock.now();
        let push_source = self.scripts.push_source();

        let mut ids = Vec::with_capacity(items.len());
        let mut pipe = redis::pipe();
        if !self.config.cluster_mode {
            pipe.atomic();
        }

        for item in &items {
            let (_, keys) = self.keys(item.queue.as_deref().or(queue))?;
            let json = item.payload.to_json()?;
            ids.push(item.payload.id.clone());
            match item.delay {
                None => {
                    pipe.cmd("EVAL")
                        .arg(push_source)
                        .arg(2)
                        .arg(&keys.ready)
                        .arg(&keys.notify)
                        .arg(json)
                        .ignore();
                }
                Some(delay) => {
                    let available_at = delay.resolve(self.clock.as_ref());
                    pipe.zadd(&keys.delayed, json, available_at as f64).ignore();
                }
            }
        }

        let mut conn = self.conn.clone();
        let _: () = pipe.query_async(&mut conn).await?;

        debug!(count = items.len(), now, "bulk-enqueued jobs");
        Ok(ids)
    }

    /// Move due entries from `delayed` to `ready`, and — when
    /// `retry_after` is configured — due entries from `reserved` back to
    /// `ready` as well (visibility-timeout recovery). Bounded by
    /// `migration_batch_size`.
    pub async fn migrate_expired(&self, queue: Option<&str>) -> Result<MigrationCounts, Error> {
        let from_delayed = self.migrate_expired_delayed_only(queue).await?;
        let from_reserved = if self.config.retry_after.is_some() {
            self.migrate_expired_reserved_only(queue).await?
        } else {
            0
        };
        Ok(MigrationCounts {
            from_delayed,
            from_reserved,
        })
    }

    /// Move due entries from `delayed` to `ready` only. The half of
    /// `migrate_expired` that `Consumer::pop` always runs, regardless of
    /// whether reserved-set recovery applies this call.
    pub async fn migrate_expired_delayed_only(&self, queue: Option<&str>) -> Result<usize, Error> {
        let (name, keys) = self.keys(queue)?;
        let now = self.clock.now();
        let batch = self.config.migration_batch_size;
        let mut conn = self.conn.clone();

        let moved = self
            .scripts
            .migrate(&mut conn, &keys.delayed, &keys.ready, &keys.notify, now, batch)
            .await?
            .len();

        if moved > 0 {
            debug!(queue = %name, moved, "migrated due delayed jobs");
        }
        Ok(moved)
    }

    /// Move due entries from `reserved` back to `ready` only
    /// (visibility-timeout recovery). Callers should gate this on
    /// `retry_after.is_some()` themselves — an unconditional call here
    /// would be meaningless when no visibility timeout is configured,
    /// since nothing would ever have been written to `reserved` with a due
    /// score.
    pub async fn migrate_expired_reserved_only(&self, queue: Option<&str>) -> Result<usize, Error> {
        let (name, keys) = self.keys(queue)?;
        let now = self.clock.now();
        let batch = self.config.migration_batch_size;
        let mut conn = self.conn.clone();

        let moved = self
            .scripts
            .migrate(&mut conn, &keys.reserved, &keys.ready, &keys.notify, now, batch)
            .await?
            .len();

        if moved > 0 {
            debug!(queue = %name, moved, "recovered expired reservations");
        }
        Ok(moved)
    }

    /// Atomically reserve the head of `ready`, without migrating or
    /// blocking first. The building block `Consumer::pop` composes into
    /// the full §4.4 algorithm.
    pub async fn reserve_once(&self, queue: Option<&str>) -> Result<Option<ReservedJob>, Error> {
        let (name, keys) = self.keys(queue)?;
        let now = self.clock.now();
        // With no visibility timeout configured, a reservation must never
        // look due — `i64::MAX` keeps it out of reach of `ZRANGEBYSCORE`'s
        // `now` cutoff in `migrate_expired_reserved_only`, instead of
        // `now + 0` which would make every in-flight job sweepable by the
        // very next manual recovery call.
        let visibility_expiry = match self.config.retry_after {
            Some(retry_after) => now + retry_after as i64,
            None => i64::MAX,
        };

        let mut conn = self.conn.clone();
        let result = self.scripts.pop(&mut conn, &keys, now, visibility_expiry).await?;

        match result {
            None => Ok(None),
            Some((original_json, reserved_json)) => {
                let payload = Payload::from_json(&original_json)?;
                let reserved = Payload::from_json(&reserved_json)?;
                debug!(queue = %name, job_id = %payload.id, attempts = reserved.attempts, "reserved job");
                Ok(Some(ReservedJob {
                    payload,
                    reserved,
                    queue: name,
                    reserved_copy_raw: reserved_json,
                    broker: self.clone(),
                }))
            }
        }
    }

    /// Block on the queue's notify list for up to `timeout_secs`. Returns
    /// `true` if a token arrived, `false` on timeout. Purely informational:
    /// the caller must still retry `reserve_once` since another worker may
    /// have won the reservation race.
    pub async fn block_for_notify(&self, queue: Option<&str>, timeout_secs: u64) -> Result<bool, Error> {
        let (_, keys) = self.keys(queue)?;
        let mut conn = self.conn.clone();
        let result: Option<(String, String)> = conn.blpop(&keys.notify, timeout_secs as f64).await?;
        Ok(result.is_some())
    }

    /// `deleteReserved(queue, job)` — the ack path. `ZREM`s the reserved
    /// copy. A no-op, not an error, if the reservation already expired and
    /// was recovered by migration (`ZREM` returns 0).
    pub async fn delete_reserved(&self, queue: &str, job: &ReservedJob) -> Result<(), Error> {
        let keys = self.config.keys(queue)?;
        let mut conn = self.conn.clone();
        let removed: i64 = conn.zrem(&keys.reserved, &job.reserved_copy_raw).await?;
        if removed == 0 {
            debug!(queue, job_id = %job.payload.id, "ack was a no-op: reservation already recovered");
        }
        Ok(())
    }

    /// `deleteAndRelease(queue, job, delay)`
    pub async fn delete_and_release(
        &self,
        queue: &str,
        job: ReservedJob,
        delay: impl Into<Delay>,
    ) -> Result<(), Error> {
        let keys = self.config.keys(queue)?;
        let available_at = delay.into().resolve(self.clock.as_ref());
        let mut conn = self.conn.clone();
        self.scripts
            .release(&mut conn, &keys, &job.reserved_copy_raw, available_at)
            .await?;
        Ok(())
    }

    /// `clear(queue?) -> int`
    pub async fn clear(&self, queue: Option<&str>) -> Result<i64, Error> {
        let (_, keys) = self.keys(queue)?;
        let mut conn = self.conn.clone();
        self.scripts.clear(&mut conn, &keys).await
    }

    /// `size(queue?) -> int`
    pub async fn size(&self, queue: Option<&str>) -> Result<i64, Error> {
        let (_, keys) = self.keys(queue)?;
        let mut conn = self.conn.clone();
        self.scripts.size(&mut conn, &keys).await
    }
}
