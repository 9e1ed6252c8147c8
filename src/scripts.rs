//! The atomic Lua scripts backing the broker's queue operations.
//!
//! Each Redis command sequence that touches more than one of a queue's four
//! keys is wrapped in a script so Redis serializes it — see `spec.md` §5,
//! "Shared-resource policy". Loading scripts this way (an `include_str!`'d
//! `.lua` file wrapped in a `redis::Script`) follows the pattern used by
//! `apalis-redis`'s `RedisScript` struct.

use crate::config::QueueKeys;
use crate::Error;
use redis::aio::ConnectionManager;
use redis::Script;

/// The broker's six atomic operations, each backed by a loaded Lua script
/// (except `later`, which is a bare `ZADD` issued directly — see
/// `spec.md` §4.2.3).
#[derive(Clone)]
pub(crate) struct Scripts {
    size: Script,
    push: Script,
    push_source: &'static str,
    migrate: Script,
    pop: Script,
    release: Script,
    clear: Script,
}

impl Default for Scripts {
    fn default() -> Self {
        Self {
            size: Script::new(include_str!("lua/size.lua")),
            push: Script::new(include_str!("lua/push.lua")),
            push_source: include_str!("lua/push.lua"),
            migrate: Script::new(include_str!("lua/migrate.lua")),
            pop: Script::new(include_str!("lua/pop.lua")),
            release: Script::new(include_str!("lua/release.lua")),
            clear: Script::new(include_str!("lua/clear.lua")),
        }
    }
}

impl Scripts {
    /// `size(Q, Q:delayed, Q:reserved) -> int`
    pub async fn size(&self, conn: &mut ConnectionManager, keys: &QueueKeys) -> Result<i64, Error> {
        let total: i64 = self
            .size
            .key(&keys.ready)
            .key(&keys.delayed)
            .key(&keys.reserved)
            .invoke_async(conn)
            .await?;
        Ok(total)
    }

    /// `push(Q, Q:notify, payload)`
    pub async fn push(
        &self,
        conn: &mut ConnectionManager,
        keys: &QueueKeys,
        payload_json: &str,
    ) -> Result<(), Error> {
        let _: () = self
            .push
            .key(&keys.ready)
            .key(&keys.notify)
            .arg(payload_json)
            .invoke_async(conn)
            .await?;
        Ok(())
    }

    /// `migrateExpiredJobs(from, to, to:notify, now, batchSize) -> [moved payloads]`
    pub async fn migrate(
        &self,
        conn: &mut ConnectionManager,
        from: &str,
        to: &str,
        to_notify: &str,
        now: i64,
        batch_size: i64,
    ) -> Result<Vec<String>, Error> {
        let moved: Vec<String> = self
            .migrate
            .key(from)
            .key(to)
            .key(to_notify)
            .arg(now)
            .arg(batch_size)
            .invoke_async(conn)
            .await?;
        Ok(moved)
    }

    /// `pop(Q, Q:reserved, Q:notify, visibilityExpiry) -> [job|nil, reservedCopy|nil]`
    pub async fn pop(
        &self,
        conn: &mut ConnectionManager,
        keys: &QueueKeys,
        now: i64,
        visibility_expiry: i64,
    ) -> Result<Option<(String, String)>, Error> {
        let result: Option<(String, String)> = self
            .pop
            .key(&keys.ready)
            .key(&keys.reserved)
            .key(&keys.notify)
            .arg(now)
            .arg(visibility_expiry)
            .invoke_async(conn)
            .await?;
        Ok(result)
    }

    /// `release(Q:delayed, Q:reserved, reservedCopy, availableAt)`
    pub async fn release(
        &self,
        conn: &mut ConnectionManager,
        keys: &QueueKeys,
        reserved_copy: &str,
        available_at: i64,
    ) -> Result<i64, Error> {
        let removed: i64 = self
            .release
            .key(&keys.delayed)
            .key(&keys.reserved)
            .arg(reserved_copy)
            .arg(available_at)
            .invoke_async(conn)
            .await?;
        Ok(removed)
    }

    /// `clear(Q, Q:delayed, Q:reserved, Q:notify) -> int`
    pub async fn clear(&self, conn: &mut ConnectionManager, keys: &QueueKeys) -> Result<i64, Error> {
        let total: i64 = self
            .clear
            .key(&keys.ready)
            .key(&keys.delayed)
            .key(&keys.reserved)
            .key(&keys.notify)
            .invoke_async(conn)
            .await?;
        Ok(total)
    }

    /// Raw script text, used by `bulk` to embed an `EVAL` call in a
    /// pipeline (pipelines can't share `Script`'s automatic `EVALSHA`
    /// caching, so `bulk` issues plain `EVAL`s).
    pub fn push_source(&self) -> &'static str {
        self.push_source
    }
}
