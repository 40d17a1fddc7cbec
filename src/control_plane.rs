//! Wiring between the configuration store and the running proxy.
//!
//! Every mutation runs inside one write transaction. The resulting
//! configuration is rendered, persisted and reloaded from a snapshot after
//! the write lock is released, so slow disks or proxy restarts never block
//! readers. Applies are serialized in commit order.
use std::{sync::Arc, time::Duration};

use tokio::sync::{Mutex, mpsc};

use crate::{
    adapters::{
        reload::{PidFileStatus, ReloadOrchestrator},
        renderer::Renderer,
        runtime::{ProxyInfo, ProxyRuntime, StatsEntry, StatsKind, StatsMap},
    },
    core::{
        error::{ControlError, ControlResult},
        model::Config,
        store::{ConfigStore, WriteTransaction},
    },
    metrics::{Metric, StatsStreamer},
};

pub struct ControlPlane {
    store: ConfigStore,
    renderer: Renderer,
    reloader: ReloadOrchestrator,
    runtime: ProxyRuntime,
    streamer: Arc<StatsStreamer>,
    write_timeout: Duration,
    subscriber_buffer: usize,
    apply_lock: Mutex<()>,
}

impl ControlPlane {
    pub fn new(
        store: ConfigStore,
        renderer: Renderer,
        reloader: ReloadOrchestrator,
        runtime: ProxyRuntime,
        streamer: Arc<StatsStreamer>,
    ) -> Self {
        Self {
            store,
            renderer,
            reloader,
            runtime,
            streamer,
            write_timeout: Duration::from_secs(10),
            subscriber_buffer: 1024,
            apply_lock: Mutex::new(()),
        }
    }

    /// Deadline for acquiring the write transaction.
    pub fn with_write_timeout(mut self, write_timeout: Duration) -> Self {
        self.write_timeout = write_timeout;
        self
    }

    /// Buffer size of metric subscriptions.
    pub fn with_subscriber_buffer(mut self, subscriber_buffer: usize) -> Self {
        self.subscriber_buffer = subscriber_buffer;
        self
    }

    pub fn store(&self) -> &ConfigStore {
        &self.store
    }

    pub fn streamer(&self) -> &Arc<StatsStreamer> {
        &self.streamer
    }

    /// Run a query inside a read transaction.
    pub async fn read<T>(&self, query: impl FnOnce(&Config) -> ControlResult<T>) -> ControlResult<T> {
        let txn = self.store.read().await;
        query(&*txn)
    }

    /// Run `change` in a write transaction, then render, persist and reload.
    ///
    /// A failed change leaves the proxy untouched. A failure after the
    /// change is committed is reported as `RenderFailure` (config on disk
    /// is stale) or `ReloadFailure` (config current, proxy not reloaded).
    pub async fn mutate<T>(
        &self,
        change: impl FnOnce(&mut WriteTransaction<'_>) -> ControlResult<T>,
    ) -> ControlResult<T> {
        let mut txn = self.store.write_with_deadline(self.write_timeout).await?;
        let value = change(&mut txn)?;
        let snapshot = txn.snapshot();
        let _apply = self.apply_lock.lock().await;
        drop(txn);

        self.apply(&snapshot).await?;
        Ok(value)
    }

    async fn apply(&self, config: &Config) -> ControlResult<()> {
        self.renderer.render_and_persist(config).await?;
        self.reloader.reload().await
    }

    /// Render the current configuration and start or take over the proxy.
    pub async fn bootstrap(&self) -> ControlResult<PidFileStatus> {
        let snapshot = self.store.snapshot().await;
        let _apply = self.apply_lock.lock().await;
        self.renderer.render_and_persist(&snapshot).await?;
        let status = self.reloader.set_pid().await?;
        self.reloader.reload().await?;
        Ok(status)
    }

    /// Replace the whole configuration, e.g. from an external sync.
    pub async fn replace_config(&self, config: Config) -> ControlResult<()> {
        validate_config(&config)?;
        self.mutate(|txn| {
            txn.replace(config);
            Ok(())
        })
        .await
    }

    /// Change a server weight in the live proxy, then record it.
    ///
    /// The new weight is rendered and persisted but no reload is issued,
    /// the live proxy already runs with it.
    pub async fn set_weight(&self, backend: &str, server: &str, weight: u32) -> ControlResult<()> {
        {
            let txn = self.store.read().await;
            txn.server(backend, server)?;
        }
        self.runtime.set_weight(backend, server, weight).await?;

        let mut txn = self.store.write_with_deadline(self.write_timeout).await?;
        txn.set_weight(backend, server, weight)?;
        let snapshot = txn.snapshot();
        let _apply = self.apply_lock.lock().await;
        drop(txn);
        self.renderer.render_and_persist(&snapshot).await
    }

    pub async fn add_acl(&self, acl: &str, pattern: &str) -> ControlResult<()> {
        self.runtime.add_acl(acl, pattern).await
    }

    pub async fn info(&self) -> ControlResult<ProxyInfo> {
        self.runtime.info().await
    }

    pub async fn stats(&self, kind: StatsKind) -> ControlResult<Vec<StatsEntry>> {
        self.runtime.stats_entries(kind).await
    }

    pub async fn stats_map(&self, kind: StatsKind) -> ControlResult<StatsMap> {
        self.runtime.stats_map(kind).await
    }

    /// Register a metric subscriber.
    pub fn subscribe(&self) -> mpsc::Receiver<Metric> {
        self.streamer.subscribe(self.subscriber_buffer)
    }
}

/// Structural checks for a configuration arriving as a whole.
pub fn validate_config(config: &Config) -> ControlResult<()> {
    for (i, fe) in config.frontends.iter().enumerate() {
        fe.validate()?;
        if config.frontends[..i].iter().any(|f| f.name == fe.name) {
            return Err(ControlError::bad_request(format!(
                "frontend '{}' listed twice",
                fe.name
            )));
        }
    }
    for (i, be) in config.backends.iter().enumerate() {
        be.validate()?;
        if config.backends[..i].iter().any(|b| b.name == be.name) {
            return Err(ControlError::bad_request(format!(
                "backend '{}' listed twice",
                be.name
            )));
        }
    }
    let dangling = config.dangling_references();
    if !dangling.is_empty() {
        return Err(ControlError::bad_request(format!(
            "missing backend for {}",
            dangling.join(", ")
        )));
    }
    Ok(())
}
