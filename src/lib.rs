//! A durable, Redis-backed job queue broker.
//!
//! Four Redis structures make up one logical queue — a ready list, a
//! delayed sorted set, a reserved sorted set, and a notify list — and every
//! operation that touches more than one of them runs as a single Lua
//! script so Redis serializes it (see `src/lua`). The broker hands out
//! at-least-once delivery: a popped job sits in `reserved` until the caller
//! acks it or lets its visibility timeout lapse, at which point it is
//! migrated back to `ready` for another worker to pick up.
//!
//! This crate is the broker core only. It reserves jobs and hands them
//! back as opaque payloads; it does not know how to run one. Callers own
//! deserializing `data`, dispatching to a handler, and deciding whether a
//! failure should be acked, released, or dead-lettered.
//!
//! ```no_run
//! # use queue_broker::{Broker, BrokerConfig};
//! # async fn example() -> Result<(), queue_broker::Error> {
//! let broker = Broker::connect(BrokerConfig::from_env()).await?;
//! let id = broker.push("SendWelcomeEmail", &serde_json::json!({"user_id": 42}), None).await?;
//! println!("queued {id}");
//!
//! if let Some(job) = broker.reserve_once(None).await? {
//!     // ... handle job.payload ...
//!     job.ack().await?;
//! }
//! # Ok(())
//! # }
//! ```

mod broker;
mod clock;
mod config;
mod consumer;
mod error;
mod id;
mod payload;
mod scripts;

pub use broker::{Broker, BulkItem, MigrationCounts, ReservedJob};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BrokerConfig, QueueKeys};
pub use consumer::Consumer;
pub use error::Error;
pub use payload::{Delay, Payload};
