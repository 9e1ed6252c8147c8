//! End-to-end scenarios against a live Redis instance.
//!
//! Gated on `REDIS_URL` since there's no in-process Redis to fall back to.
//! Tests share a database, so each is `#[serial]` and flushes it before
//! starting — the same constraint real Redis-backed test suites hit.

use queue_broker::{Broker, BrokerConfig, Consumer, Delay, ManualClock};
use redis::aio::ConnectionManager;
use serial_test::serial;
use std::sync::Arc;
use std::time::Duration;

async fn fresh_connection() -> ConnectionManager {
    let redis_url = std::env::var("REDIS_URL").expect("No REDIS_URL is specified");
    let client = redis::Client::open(redis_url).expect("invalid REDIS_URL");
    let mut conn = ConnectionManager::new(client).await.expect("failed to connect");
    let _: String = redis::cmd("FLUSHDB")
        .query_async(&mut conn)
        .await
        .expect("failed to flushdb");
    conn
}

async fn setup() -> Broker {
    let conn = fresh_connection().await;
    Broker::from_connection(conn, BrokerConfig::default())
}

#[tokio::test]
#[serial]
async fn round_trip() {
    let broker = setup().await;

    let id = broker
        .push("SendEmail", &serde_json::json!({"to": "a@b.com"}), None)
        .await
        .unwrap();

    let job = broker.reserve_once(None).await.unwrap().expect("expected a job");
    assert_eq!(job.payload.id, id);
    assert_eq!(job.reserved.attempts, 1);

    job.ack().await.unwrap();
    assert_eq!(broker.size(None).await.unwrap(), 0);
}

#[tokio::test]
#[serial]
async fn delayed_release_is_not_visible_until_due() {
    let clock = Arc::new(ManualClock::new(1_000));
    let broker = setup().await.with_clock(clock.clone());

    broker.push("B", &1, None).await.unwrap();
    let job = broker.reserve_once(None).await.unwrap().expect("expected B");

    job.release(Delay::Seconds(2)).await.unwrap();
    assert!(broker.reserve_once(None).await.unwrap().is_none());

    clock.advance(3);
    broker.migrate_expired(None).await.unwrap();

    let job = broker.reserve_once(None).await.unwrap().expect("expected B again");
    assert_eq!(job.reserved.attempts, 2);
}

#[tokio::test]
#[serial]
async fn visibility_timeout_recovers_unacked_jobs() {
    let clock = Arc::new(ManualClock::new(1_000));
    let config = BrokerConfig::default().retry_after(Some(1));
    let broker = Broker::from_connection(fresh_connection().await, config).with_clock(clock.clone());

    broker.push("C", &1, None).await.unwrap();
    let job = broker.reserve_once(None).await.unwrap().expect("expected C");
    assert_eq!(job.reserved.attempts, 1);
    // deliberately not acked — simulate a crashed worker

    clock.advance(2);
    broker.migrate_expired(None).await.unwrap();

    let job = broker.reserve_once(None).await.unwrap().expect("expected C again");
    assert_eq!(job.reserved.attempts, 2);
}

#[tokio::test]
#[serial]
async fn blocking_pop_wakes_up_on_push() {
    let producer = setup().await;
    let blocking_broker = Broker::from_connection(
        fresh_connection().await,
        BrokerConfig::default().block_for(Some(1)),
    );

    let handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        producer.push("D", &1, None).await.unwrap();
    });

    let started = std::time::Instant::now();
    let consumer = Consumer::new(blocking_broker, vec!["default".into()]);
    let job = consumer.pop(None, 0).await.unwrap().expect("expected D to arrive");
    assert!(started.elapsed() < Duration::from_millis(900));
    assert_eq!(job.payload.job_name(), Some("D"));

    handle.await.unwrap();
}

#[tokio::test]
#[serial]
async fn multi_queue_fairness_does_not_block_primary_after_secondary_had_work() {
    // block_for must actually be configured, otherwise the no-block
    // assertion below would pass trivially even if the fairness flag were
    // never tracked at all — see spec.md §8 scenario 5.
    let broker = Broker::from_connection(
        fresh_connection().await,
        BrokerConfig::default().block_for(Some(5)),
    );
    broker.push("hi-job", &1, Some("hi")).await.unwrap();
    broker.push("lo-job", &1, Some("lo")).await.unwrap();

    let consumer = Consumer::new(broker, vec!["hi".into(), "lo".into()]);

    let hi_job = consumer.pop(Some("hi"), 0).await.unwrap().expect("expected hi job");
    assert_eq!(hi_job.payload.job_name(), Some("hi-job"));

    let lo_job = consumer.pop(Some("lo"), 1).await.unwrap().expect("expected lo job");
    assert_eq!(lo_job.payload.job_name(), Some("lo-job"));

    let started = std::time::Instant::now();
    let nothing = consumer.pop(Some("hi"), 0).await.unwrap();
    assert!(nothing.is_none());
    assert!(
        started.elapsed() < Duration::from_millis(500),
        "primary queue blocked even though the secondary queue had work last sweep"
    );
}

#[tokio::test]
#[serial]
async fn clear_counts_every_pending_job_across_all_three_states() {
    let broker = setup().await;

    broker.push("a", &1, None).await.unwrap();
    broker.push("b", &1, None).await.unwrap();
    broker.push("c", &1, None).await.unwrap();
    broker.later(Delay::Seconds(60), "d", &1, None).await.unwrap();
    broker.later(Delay::Seconds(60), "e", &1, None).await.unwrap();
    broker.reserve_once(None).await.unwrap();

    let cleared = broker.clear(None).await.unwrap();
    assert_eq!(cleared, 5);
    assert_eq!(broker.size(None).await.unwrap(), 0);
}
