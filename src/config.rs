//! Broker configuration and Redis key layout.

use crate::Error;
use std::env;
use std::time::Duration;

/// The four Redis keys backing one logical queue.
#[derive(Debug, Clone)]
pub struct QueueKeys {
    /// `queues:{name}` — the ready list.
    pub ready: String,
    /// `queues:{name}:delayed` — the delayed sorted set.
    pub delayed: String,
    /// `queues:{name}:reserved` — the reserved sorted set.
    pub reserved: String,
    /// `queues:{name}:notify` — the notify list.
    pub notify: String,
}

/// Queue broker configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Redis connection URL, used when the broker opens its own connection.
    pub redis_url: String,
    /// Default queue name, used whenever a call omits one.
    pub default_queue: String,
    /// Prefix for queue keys in Redis (before hash-tagging).
    pub prefix: String,
    /// Seconds a reservation stays invisible before being re-migrated to
    /// ready. `None` disables reserved-set recovery migration entirely —
    /// see the "stuck forever" open question in `DESIGN.md`.
    pub retry_after: Option<u64>,
    /// Seconds to block on `BLPOP` when the ready list is empty. `None`
    /// never blocks.
    pub block_for: Option<u64>,
    /// Max elements moved per `migrateExpiredJobs` call. `-1` is unlimited.
    pub migration_batch_size: i64,
    /// Forwarded to the payload builder; not interpreted by this crate.
    pub dispatch_after_commit: bool,
    /// Whether the target Redis is a cluster. Governs whether `bulk` uses a
    /// real `MULTI`/`EXEC` transaction (`false`, single node) or plain
    /// pipelining (`true`, since a cluster transaction across differently
    /// hash-tagged queues would fail with `CROSSSLOT`).
    pub cluster_mode: bool,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            default_queue: "default".to_string(),
            prefix: "queues".to_string(),
            retry_after: Some(60),
            block_for: None,
            migration_batch_size: -1,
            dispatch_after_commit: false,
            cluster_mode: false,
        }
    }
}

impl BrokerConfig {
    /// Create a new configuration with a Redis URL.
    pub fn new(redis_url: impl Into<String>) -> Self {
        Self {
            redis_url: redis_url.into(),
            ..Default::default()
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Reads the following environment variables:
    /// - `QUEUE_DEFAULT`: default queue name (defaults to `"default"`).
    /// - `QUEUE_PREFIX`: key prefix in Redis (defaults to `"queues"`).
    /// - `QUEUE_RETRY_AFTER`: visibility timeout in seconds, or `"none"` to
    ///   disable reserved-recovery migration (defaults to 60).
    /// - `QUEUE_BLOCK_FOR`: seconds to block on an empty queue, unset or
    ///   `"none"` to never block.
    /// - `QUEUE_MIGRATION_BATCH_SIZE`: max elements per migration call
    ///   (defaults to -1, unlimited).
    /// - `QUEUE_CLUSTER`: `"true"` if the target Redis is a cluster.
    /// - `REDIS_URL`: full Redis URL (takes precedence if set).
    /// - `REDIS_HOST` / `REDIS_PORT` / `REDIS_PASSWORD` / `REDIS_DATABASE`:
    ///   used to build a URL when `REDIS_URL` is absent.
    pub fn from_env() -> Self {
        Self {
            redis_url: Self::build_redis_url(),
            default_queue: env::var("QUEUE_DEFAULT").unwrap_or_else(|_| "default".to_string()),
            prefix: env::var("QUEUE_PREFIX").unwrap_or_else(|_| "queues".to_string()),
            retry_after: env::var("QUEUE_RETRY_AFTER")
                .ok()
                .map(|v| {
                    if v.eq_ignore_ascii_case("none") {
                        None
                    } else {
                        // An unparsable non-"none" value (typo, empty
                        // string) falls back to the documented default
                        // rather than silently disabling reserved-recovery
                        // migration.
                        Some(v.parse().unwrap_or(60))
                    }
                })
                .unwrap_or(Some(60)),
            block_for: env::var("QUEUE_BLOCK_FOR").ok().and_then(|v| v.parse().ok()),
            migration_batch_size: env::var("QUEUE_MIGRATION_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(-1),
            dispatch_after_commit: env::var("QUEUE_DISPATCH_AFTER_COMMIT")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            cluster_mode: env::var("QUEUE_CLUSTER")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
        }
    }

    fn build_redis_url() -> String {
        if let Ok(url) = env::var("REDIS_URL") {
            return url;
        }

        let host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
        let password = env::var("REDIS_PASSWORD").ok().filter(|p| !p.is_empty());
        let database = env::var("REDIS_DATABASE").unwrap_or_else(|_| "0".to_string());

        match password {
            Some(pass) => format!("redis://:{}@{}:{}/{}", pass, host, port, database),
            None => format!("redis://{}:{}/{}", host, port, database),
        }
    }

    /// Set the default queue name.
    pub fn default_queue(mut self, queue: impl Into<String>) -> Self {
        self.default_queue = queue.into();
        self
    }

    /// Set the key prefix.
    pub fn prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Set the visibility timeout. `None` disables reserved-recovery
    /// migration.
    pub fn retry_after(mut self, seconds: Option<u64>) -> Self {
        self.retry_after = seconds;
        self
    }

    /// Set the `BLPOP` timeout. `None` never blocks.
    pub fn block_for(mut self, seconds: Option<u64>) -> Self {
        self.block_for = seconds;
        self
    }

    /// Set the migration batch size. `-1` is unlimited.
    pub fn migration_batch_size(mut self, size: i64) -> Self {
        self.migration_batch_size = size;
        self
    }

    /// Mark the target Redis as a cluster.
    pub fn cluster_mode(mut self, cluster: bool) -> Self {
        self.cluster_mode = cluster;
        self
    }

    /// Resolve an optional queue name against the configured default.
    pub fn resolve_queue<'a>(&'a self, queue: Option<&'a str>) -> &'a str {
        queue.unwrap_or(&self.default_queue)
    }

    /// Get the `BLPOP` timeout as a `Duration`, if blocking is enabled.
    pub fn block_for_duration(&self) -> Option<Duration> {
        self.block_for.map(Duration::from_secs)
    }

    /// Build the four Redis keys for a queue, hash-tagged for cluster
    /// co-location. Rejects names that would produce a malformed or nested
    /// hash tag.
    pub fn keys(&self, name: &str) -> Result<QueueKeys, Error> {
        if name.contains('{') || name.contains('}') {
            return Err(Error::InvalidQueueName(name.to_string()));
        }

        let base = format!("{}:{{{}}}", self.prefix, name);
        Ok(QueueKeys {
            ready: base.clone(),
            delayed: format!("{}:delayed", base),
            reserved: format!("{}:reserved", base),
            notify: format!("{}:notify", base),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = BrokerConfig::default();
        assert_eq!(config.default_queue, "default");
        assert_eq!(config.prefix, "queues");
        assert_eq!(config.retry_after, Some(60));
        assert_eq!(config.block_for, None);
        assert_eq!(config.migration_batch_size, -1);
    }

    #[test]
    fn key_layout_is_hash_tagged() {
        let config = BrokerConfig::default();
        let keys = config.keys("emails").unwrap();
        assert_eq!(keys.ready, "queues:{emails}");
        assert_eq!(keys.delayed, "queues:{emails}:delayed");
        assert_eq!(keys.reserved, "queues:{emails}:reserved");
        assert_eq!(keys.notify, "queues:{emails}:notify");
    }

    #[test]
    fn rejects_queue_names_with_braces() {
        let config = BrokerConfig::default();
        assert!(matches!(
            config.keys("a{b}c"),
            Err(Error::InvalidQueueName(_))
        ));
    }

    #[test]
    fn builder_pattern() {
        let config = BrokerConfig::new("redis://localhost:6380")
            .default_queue("high-priority")
            .prefix("myapp")
            .retry_after(None)
            .migration_batch_size(100);

        assert_eq!(config.redis_url, "redis://localhost:6380");
        assert_eq!(config.default_queue, "high-priority");
        assert_eq!(config.prefix, "myapp");
        assert_eq!(config.retry_after, None);
        assert_eq!(config.migration_batch_size, 100);
    }

    #[test]
    fn from_env_defaults() {
        for var in [
            "QUEUE_DEFAULT",
            "QUEUE_PREFIX",
            "QUEUE_RETRY_AFTER",
            "QUEUE_BLOCK_FOR",
            "QUEUE_MIGRATION_BATCH_SIZE",
            "QUEUE_CLUSTER",
            "REDIS_URL",
            "REDIS_HOST",
            "REDIS_PORT",
            "REDIS_PASSWORD",
            "REDIS_DATABASE",
        ] {
            env::remove_var(var);
        }

        let config = BrokerConfig::from_env();
        assert_eq!(config.default_queue, "default");
        assert_eq!(config.prefix, "queues");
        assert_eq!(config.redis_url, "redis://127.0.0.1:6379/0");
        assert_eq!(config.retry_after, Some(60));
    }

    #[test]
    fn from_env_retry_after_none() {
        env::set_var("QUEUE_RETRY_AFTER", "none");
        let config = BrokerConfig::from_env();
        assert_eq!(config.retry_after, None);
        env::remove_var("QUEUE_RETRY_AFTER");
    }

    #[test]
    fn from_env_retry_after_unparsable_falls_back_to_default() {
        env::set_var("QUEUE_RETRY_AFTER", "not-a-number");
        let config = BrokerConfig::from_env();
        assert_eq!(config.retry_after, Some(60));
        env::remove_var("QUEUE_RETRY_AFTER");
    }

    #[test]
    fn resolve_queue_falls_back_to_default() {
        let config = BrokerConfig::default();
        assert_eq!(config.resolve_queue(None), "default");
        assert_eq!(config.resolve_queue(Some("emails")), "emails");
    }
}
