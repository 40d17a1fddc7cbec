use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use chrono::Utc;
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    time::{MissedTickBehavior, interval},
};

use crate::{
    adapters::runtime::{ProxyRuntime, StatsKind},
    core::error::ControlResult,
    metrics::{Metric, extract_metrics},
    utils::graceful_shutdown::ShutdownToken,
};

/// Polls proxy statistics and fans metrics out to subscribers.
///
/// Each subscriber owns a bounded buffer. A full buffer drops the metric for
/// that subscriber only; a dropped receiver unsubscribes it.
pub struct StatsStreamer {
    runtime: ProxyRuntime,
    poll_interval: Duration,
    heartbeat_interval: Duration,
    subscribers: Mutex<Vec<mpsc::Sender<Metric>>>,
    emitted: AtomicU64,
}

impl StatsStreamer {
    pub fn new(runtime: ProxyRuntime, poll_interval: Duration, heartbeat_interval: Duration) -> Self {
        Self {
            runtime,
            poll_interval,
            heartbeat_interval,
            subscribers: Mutex::new(Vec::new()),
            emitted: AtomicU64::new(0),
        }
    }

    /// Register a subscriber holding up to `buffer` undelivered metrics.
    pub fn subscribe(&self, buffer: usize) -> mpsc::Receiver<Metric> {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        self.lock_subscribers().push(tx);
        tracing::debug!("Metric subscriber registered");
        rx
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().len()
    }

    fn lock_subscribers(&self) -> std::sync::MutexGuard<'_, Vec<mpsc::Sender<Metric>>> {
        // a poisoned list is still a valid list of senders
        self.subscribers
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Deliver one metric to every subscriber without blocking.
    pub fn publish(&self, metric: &Metric) {
        let mut subscribers = self.lock_subscribers();
        subscribers.retain(|tx| match tx.try_send(metric.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!("Metric subscriber is full, dropping {}", metric.name);
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!("Metric subscriber went away");
                false
            }
        });
        self.emitted.fetch_add(1, Ordering::Relaxed);
    }

    /// Pull one stats dump and publish its metrics. Returns how many were emitted.
    pub async fn poll_once(&self) -> ControlResult<usize> {
        let rows = self.runtime.stats(StatsKind::All).await?;
        let metrics = extract_metrics(&rows, Utc::now());
        for metric in &metrics {
            self.publish(metric);
        }
        Ok(metrics.len())
    }

    /// Report and reset the number of metrics emitted since the last heartbeat.
    pub fn heartbeat(&self) -> u64 {
        let count = self.emitted.swap(0, Ordering::Relaxed);
        tracing::info!(
            "Stats heartbeat: {} metrics emitted in the last {:?} to {} subscriber(s)",
            count,
            self.heartbeat_interval,
            self.subscriber_count()
        );
        count
    }

    /// Poll until shutdown is signalled.
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownToken) {
        tracing::info!(
            "Stats streamer started, polling every {:?}",
            self.poll_interval
        );
        let mut poll = interval(self.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut heartbeat = interval(self.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        heartbeat.tick().await;

        loop {
            tokio::select! {
                reason = shutdown.wait_for_shutdown() => {
                    tracing::info!("Stats streamer stopping: {:?}", reason);
                    break;
                }
                _ = poll.tick() => {
                    if let Err(e) = self.poll_once().await {
                        tracing::error!("Stats poll failed: {}", e);
                    }
                }
                _ = heartbeat.tick() => {
                    self.heartbeat();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;
    use crate::ports::control_channel::{ControlChannel, ControlChannelResult};

    struct FixedDump;

    #[async_trait]
    impl ControlChannel for FixedDump {
        async fn execute(&self, _command: &str) -> ControlChannelResult<String> {
            Ok("# pxname,svname,scur,\nweb,FRONTEND,3,\nweb.v1,BACKEND,1,\n".to_string())
        }
    }

    fn streamer() -> StatsStreamer {
        StatsStreamer::new(
            ProxyRuntime::new(Arc::new(FixedDump)),
            Duration::from_millis(20),
            Duration::from_secs(60),
        )
    }

    fn metric(name: &str) -> Metric {
        Metric {
            timestamp: Utc::now(),
            tags: vec!["route".to_string()],
            name: name.to_string(),
            value: 1,
        }
    }

    #[tokio::test]
    async fn test_poll_once_fans_out() {
        let streamer = streamer();
        let mut a = streamer.subscribe(16);
        let mut b = streamer.subscribe(16);

        assert_eq!(streamer.poll_once().await.unwrap(), 2);
        for rx in [&mut a, &mut b] {
            assert_eq!(rx.recv().await.unwrap().tags, ["route", "routes:web"]);
            assert_eq!(rx.recv().await.unwrap().value, 1);
        }
    }

    #[tokio::test]
    async fn test_full_subscriber_does_not_block_others() {
        let streamer = streamer();
        let mut slow = streamer.subscribe(1);
        let mut fast = streamer.subscribe(8);

        for name in ["a", "b", "c"] {
            streamer.publish(&metric(name));
        }

        assert_eq!(fast.recv().await.unwrap().name, "a");
        assert_eq!(fast.recv().await.unwrap().name, "b");
        assert_eq!(fast.recv().await.unwrap().name, "c");
        assert_eq!(slow.recv().await.unwrap().name, "a");
        assert!(slow.try_recv().is_err());
        assert_eq!(streamer.subscriber_count(), 2);
    }

    #[tokio::test]
    async fn test_closed_subscriber_is_pruned() {
        let streamer = streamer();
        let rx = streamer.subscribe(4);
        drop(rx);
        streamer.publish(&metric("a"));
        assert_eq!(streamer.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_heartbeat_resets_counter() {
        let streamer = streamer();
        streamer.publish(&metric("a"));
        streamer.publish(&metric("b"));
        assert_eq!(streamer.heartbeat(), 2);
        assert_eq!(streamer.heartbeat(), 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let shutdown = crate::utils::GracefulShutdown::new();
        let streamer = Arc::new(streamer());
        let mut rx = streamer.subscribe(64);
        let task = tokio::spawn(streamer.clone().run(shutdown.shutdown_token()));

        let first = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.name, "scur");

        shutdown.trigger_shutdown(crate::utils::ShutdownReason::Requested);
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
    }
}
