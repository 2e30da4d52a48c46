//! Auto-flush driver behaviour under paused tokio time.

mod common;

use common::{init_tracing, msg, Behavior, RecordingSink};
use split_cache::{
    AutoFlushDriver, FailurePolicy, FlushConfig, Message, PartitionedMessageCache,
    QueueIdExtractor,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

fn setup(
    sink: RecordingSink,
    config: FlushConfig,
) -> (Arc<RecordingSink>, Arc<PartitionedMessageCache<Message, String>>) {
    let sink = Arc::new(sink);
    let cache = Arc::new(PartitionedMessageCache::new(
        QueueIdExtractor,
        Arc::clone(&sink),
        config,
    ).unwrap());
    (sink, cache)
}

#[tokio::test(start_paused = true)]
async fn test_size_threshold_triggers_on_300th_message() {
    let (sink, cache) = setup(RecordingSink::accepting(), FlushConfig::default());
    let driver = AutoFlushDriver::start(Arc::clone(&cache));

    for i in 0..299 {
        let queue = format!("q{}", i % 4);
        cache.enqueue(msg(&queue, i)).await.unwrap();
    }

    sleep(Duration::from_millis(250)).await;
    assert_eq!(sink.attempts(), 0, "299 messages must not trigger a flush");
    assert_eq!(cache.pending_count(), 299);

    cache.enqueue(msg("q0", 299)).await.unwrap();
    sleep(Duration::from_millis(10)).await;

    assert_eq!(sink.delivered(), 300);
    assert_eq!(cache.pending_count(), 0);
    assert_eq!(driver.stats().cycles, 1);

    driver.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_time_threshold_flushes_single_message() {
    let (sink, cache) = setup(RecordingSink::accepting(), FlushConfig::default());
    let driver = AutoFlushDriver::start(Arc::clone(&cache));

    cache.enqueue(msg("only", 1)).await.unwrap();

    sleep(Duration::from_millis(250)).await;
    assert_eq!(sink.attempts(), 0);

    sleep(Duration::from_millis(100)).await;
    assert_eq!(sink.batches(), vec![("only".to_string(), vec![1])]);

    driver.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_custom_thresholds() {
    let config = FlushConfig::default()
        .with_size_threshold(3)
        .with_time_threshold(Duration::from_secs(10));
    let (sink, cache) = setup(RecordingSink::accepting(), config);
    let driver = AutoFlushDriver::start(Arc::clone(&cache));

    cache.enqueue(msg("a", 1)).await.unwrap();
    cache.enqueue(msg("a", 2)).await.unwrap();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(sink.attempts(), 0);

    cache.enqueue(msg("b", 3)).await.unwrap();
    sleep(Duration::from_millis(1)).await;
    assert_eq!(sink.delivered(), 3);

    driver.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_driver_keeps_retrying_failing_sink() {
    init_tracing();
    let (sink, cache) = setup(RecordingSink::always_failing(), FlushConfig::default());
    let driver = AutoFlushDriver::start(Arc::clone(&cache));

    cache.enqueue(msg("a", 1)).await.unwrap();

    // Due at 300ms, then every 300ms after each failed attempt.
    sleep(Duration::from_millis(2_000)).await;

    assert!(
        sink.attempts() >= 2,
        "expected repeated attempts, got {}",
        sink.attempts()
    );
    assert!(driver.is_running());
    assert_eq!(cache.pending_count(), 1, "requeue keeps the message buffered");
    assert!(driver.stats().failed_cycles >= 2);

    driver.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_failed_batch_is_delivered_once_sink_recovers() {
    let sink = RecordingSink::scripted(vec![Behavior::Fail, Behavior::Fail], Behavior::Accept);
    let (sink, cache) = setup(sink, FlushConfig::default());
    let driver = AutoFlushDriver::start(Arc::clone(&cache));

    cache.enqueue(msg("a", 1)).await.unwrap();
    cache.enqueue(msg("a", 2)).await.unwrap();
    sleep(Duration::from_millis(500)).await;
    cache.enqueue(msg("a", 3)).await.unwrap();

    sleep(Duration::from_secs(2)).await;
    assert_eq!(sink.offsets_for("a"), vec![1, 2, 3]);
    assert_eq!(cache.pending_count(), 0);

    driver.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_drop_policy_under_driver() {
    let sink = RecordingSink::scripted(vec![Behavior::Fail], Behavior::Accept);
    let config = FlushConfig::default().with_failure_policy(FailurePolicy::Drop);
    let (sink, cache) = setup(sink, config);
    let driver = AutoFlushDriver::start(Arc::clone(&cache));

    cache.enqueue(msg("a", 1)).await.unwrap();
    sleep(Duration::from_millis(350)).await;
    assert_eq!(cache.pending_count(), 0);

    cache.enqueue(msg("a", 2)).await.unwrap();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(sink.offsets_for("a"), vec![2]);
    assert_eq!(cache.stats().dropped, 1);

    driver.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_driver_survives_panicking_callback() {
    init_tracing();
    let sink = RecordingSink::scripted(vec![Behavior::Panic], Behavior::Accept);
    let (sink, cache) = setup(sink, FlushConfig::default());
    let driver = AutoFlushDriver::start(Arc::clone(&cache));

    cache.enqueue(msg("a", 1)).await.unwrap();
    sleep(Duration::from_millis(400)).await;

    assert!(driver.is_running());
    assert_eq!(driver.stats().failed_cycles, 1);
    assert_eq!(driver.stats().loop_errors, 0);
    assert_eq!(cache.pending_count(), 1, "the panicked batch is requeued");

    cache.enqueue(msg("a", 2)).await.unwrap();
    sleep(Duration::from_secs(1)).await;

    assert_eq!(sink.offsets_for("a"), vec![1, 2]);
    assert!(driver.is_running());

    driver.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_busy_partition_does_not_spin_driver() {
    let sink = RecordingSink::accepting().with_delay(Duration::from_millis(500));
    let config = FlushConfig::default().with_size_threshold(5);
    let (sink, cache) = setup(sink, config);

    cache.enqueue(msg("A", 0)).await.unwrap();
    let manual = tokio::spawn({
        let cache = Arc::clone(&cache);
        async move { cache.flush(&"A".to_string()).await }
    });
    // Let the manual flush drain "A" and block inside the slow sink.
    sleep(Duration::from_millis(1)).await;

    for i in 1..=10 {
        cache.enqueue(msg("A", i)).await.unwrap();
    }
    let driver = AutoFlushDriver::start(Arc::clone(&cache));

    sleep(Duration::from_millis(300)).await;
    let cycles = driver.stats().cycles;
    assert!(
        cycles <= 5,
        "driver polled a busy partition {cycles} times in 300ms"
    );
    assert_eq!(sink.attempts(), 1);

    assert_eq!(manual.await.unwrap().unwrap(), 1);
    sleep(Duration::from_secs(2)).await;
    assert_eq!(sink.offsets_for("A"), (0..=10).collect::<Vec<i64>>());
    assert_eq!(cache.pending_count(), 0);

    driver.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_idle_driver_waits_between_checks() {
    let config = FlushConfig::default()
        .with_time_threshold(Duration::from_millis(1))
        .with_poll_interval(Duration::from_millis(1));
    let (sink, cache) = setup(RecordingSink::accepting(), config);
    let driver = AutoFlushDriver::start(Arc::clone(&cache));

    sleep(Duration::from_millis(100)).await;
    assert_eq!(driver.stats().cycles, 0);

    cache.enqueue(msg("a", 1)).await.unwrap();
    sleep(Duration::from_millis(10)).await;
    assert_eq!(sink.offsets_for("a"), vec![1]);

    tokio::time::timeout(Duration::from_secs(1), driver.shutdown())
        .await
        .unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_stop_prevents_further_flushes() {
    let (sink, cache) = setup(RecordingSink::accepting(), FlushConfig::default());
    let driver = AutoFlushDriver::start(Arc::clone(&cache));

    cache.enqueue(msg("a", 1)).await.unwrap();
    sleep(Duration::from_millis(350)).await;
    assert_eq!(sink.attempts(), 1);

    driver.stop();
    assert!(!driver.is_running());

    for i in 2..400 {
        cache.enqueue(msg("a", i)).await.unwrap();
    }
    sleep(Duration::from_secs(1)).await;

    assert_eq!(sink.attempts(), 1);
    assert_eq!(cache.pending_count(), 398);

    driver.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_lets_in_flight_flush_complete() {
    let sink = RecordingSink::accepting().with_delay(Duration::from_millis(200));
    let (sink, cache) = setup(sink, FlushConfig::default());
    let driver = AutoFlushDriver::start(Arc::clone(&cache));

    cache.enqueue(msg("a", 1)).await.unwrap();
    // Flush starts at 300ms and sleeps inside the callback until 500ms.
    sleep(Duration::from_millis(350)).await;
    assert_eq!(sink.attempts(), 1);
    assert_eq!(sink.delivered(), 0);

    driver.shutdown().await;

    assert_eq!(sink.batches(), vec![("a".to_string(), vec![1])]);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_driver_stops_it() {
    let (sink, cache) = setup(RecordingSink::accepting(), FlushConfig::default());
    let driver = AutoFlushDriver::start(Arc::clone(&cache));
    drop(driver);

    cache.enqueue(msg("a", 1)).await.unwrap();
    sleep(Duration::from_secs(1)).await;
    assert_eq!(sink.attempts(), 0);
}
