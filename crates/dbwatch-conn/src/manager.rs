//! Connection manager: deduplicating cache of live database connections.
//!
//! One connection is kept per [`ConnectionIdentity`]. Callers share it; the
//! manager re-probes it on every retrieval, evicts it when the server has
//! killed it, and closes it once it has been unused for longer than the
//! keep-alive period.
//!
//! # Locking
//!
//! ```text
//! get_connection ──► get_lock (coarse, whole get-or-create decision)
//!                      └─► connections (fine, map lookup / insert / remove)
//! close_unused   ──────────► connections (fine, held for the sweep pass)
//! ```
//!
//! The access time is refreshed while the fine lock is held during lookup,
//! so a concurrent sweep never closes a record a getter has just selected.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::time::Instant;

use crate::backend::Connector;
use crate::classifier::KillClassifier;
use crate::config::PluginOptions;
use crate::error::{ConnError, ConnResult};
use crate::identity::ConnectionIdentity;
use crate::record::{ConnectionRecord, bounded};

/// Timing configuration for the connection manager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Idle period after which an unused connection is closed (default: 300s).
    pub keep_alive: Duration,
    /// Bound on every connect, ping, query and close (default: 3s).
    pub request_timeout: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            keep_alive: Duration::from_secs(300),
            request_timeout: Duration::from_secs(3),
        }
    }
}

impl ManagerConfig {
    pub fn from_options(options: &PluginOptions) -> Self {
        Self {
            keep_alive: options.keep_alive(),
            request_timeout: options.request_timeout(),
        }
    }
}

/// Thread-safe cache of connections keyed by identity.
pub struct ConnectionManager {
    /// Serializes the whole get-or-create decision.
    get_lock: Mutex<()>,
    /// Live records. At most one per identity.
    connections: Mutex<HashMap<ConnectionIdentity, Arc<ConnectionRecord>>>,
    config: ManagerConfig,
    connector: Arc<dyn Connector>,
    classifier: KillClassifier,
    /// Next record id (monotonically increasing).
    next_id: AtomicU64,
    /// Connections successfully established over the manager's lifetime.
    created: AtomicU64,
    /// Flipped to `true` by `shutdown()`; the idle reaper watches it.
    shutdown_tx: watch::Sender<bool>,
}

impl ConnectionManager {
    pub fn new(config: ManagerConfig, connector: Arc<dyn Connector>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            get_lock: Mutex::new(()),
            connections: Mutex::new(HashMap::new()),
            config,
            connector,
            classifier: KillClassifier::default(),
            next_id: AtomicU64::new(1),
            created: AtomicU64::new(0),
            shutdown_tx,
        }
    }

    /// Replace the kill-detection classifier.
    pub fn with_classifier(self, classifier: KillClassifier) -> Self {
        Self { classifier, ..self }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Return the cached connection for `identity`, creating it if absent.
    ///
    /// A cached connection is pinged before it is handed out. If the ping
    /// shows the server killed it, it is evicted and
    /// [`ConnError::ConnectionKilled`] is returned; the next call creates a
    /// fresh connection. Other ping failures are returned as-is and the
    /// connection stays cached.
    pub async fn get_connection(
        &self,
        identity: &ConnectionIdentity,
    ) -> ConnResult<Arc<ConnectionRecord>> {
        if self.is_shutting_down() {
            return Err(ConnError::ShuttingDown);
        }

        let _guard = self.get_lock.lock().await;
        // Queued behind `shutdown()`: the map has been drained.
        if self.is_shutting_down() {
            return Err(ConnError::ShuttingDown);
        }

        let Some(record) = self.get(identity).await else {
            return self.create(identity).await;
        };

        match record.ping().await {
            Ok(()) => {
                tracing::debug!(
                    id = record.id(),
                    fingerprint = %identity.fingerprint(),
                    address = %identity.address(),
                    "reused cached connection"
                );
                Ok(record)
            }
            Err(ConnError::Backend(err)) if self.classifier.is_killed(&err) => {
                self.evict(identity, &record).await;
                tracing::info!(
                    id = record.id(),
                    fingerprint = %identity.fingerprint(),
                    address = %identity.address(),
                    error = %err,
                    "evicted connection killed by server"
                );
                Err(ConnError::ConnectionKilled(identity.to_string()))
            }
            Err(ConnError::ConnectionNotFound(_)) => {
                // Closed underneath us; replace it.
                self.evict(identity, &record).await;
                self.create(identity).await
            }
            Err(err) => {
                tracing::debug!(
                    id = record.id(),
                    fingerprint = %identity.fingerprint(),
                    error = %err,
                    "ping failed, keeping cached connection"
                );
                Err(err)
            }
        }
    }

    /// Look up a record and refresh its access time under the map lock.
    async fn get(&self, identity: &ConnectionIdentity) -> Option<Arc<ConnectionRecord>> {
        let connections = self.connections.lock().await;
        let record = connections.get(identity)?;
        record.touch().await;
        Some(Arc::clone(record))
    }

    /// Open, probe and insert a new connection. Nothing is inserted on failure.
    async fn create(&self, identity: &ConnectionIdentity) -> ConnResult<Arc<ConnectionRecord>> {
        let timeout = self.config.request_timeout;

        let mut handle = bounded("connect", timeout, self.connector.connect(identity)).await?;

        if let Err(err) = bounded("ping", timeout, handle.ping()).await {
            if let Err(close_err) = bounded("close", timeout, handle.close()).await {
                tracing::debug!(error = %close_err, "failed to close unresponsive connection");
            }
            return Err(err);
        }

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let record = Arc::new(ConnectionRecord::new(id, identity.clone(), handle, timeout));
        self.insert(identity, Arc::clone(&record)).await;
        self.created.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(
            id = id,
            fingerprint = %identity.fingerprint(),
            address = %identity.address(),
            transport = %identity.transport(),
            "created new connection"
        );
        Ok(record)
    }

    /// Insert a record for an identity that must not be cached yet.
    ///
    /// # Panics
    ///
    /// Panics if the identity is already present, which means the coarse
    /// lock was bypassed.
    async fn insert(&self, identity: &ConnectionIdentity, record: Arc<ConnectionRecord>) {
        let mut connections = self.connections.lock().await;
        if connections.contains_key(identity) {
            panic!("connection already exists for {identity}");
        }
        connections.insert(identity.clone(), record);
    }

    /// Remove the map entry, then close the handle.
    async fn evict(&self, identity: &ConnectionIdentity, record: &ConnectionRecord) {
        self.connections.lock().await.remove(identity);
        if let Err(err) = record.close().await {
            tracing::debug!(
                id = record.id(),
                fingerprint = %identity.fingerprint(),
                error = %err,
                "error closing evicted connection"
            );
        }
    }

    /// Close every connection unused for longer than the keep-alive period.
    ///
    /// Best effort: a connection whose close fails stays cached so the next
    /// sweep retries it. Only the last close error is returned.
    pub async fn close_unused(&self) -> ConnResult<()> {
        let keep_alive = self.config.keep_alive;
        let now = Instant::now();
        let mut connections = self.connections.lock().await;

        let mut closed = Vec::new();
        let mut last_err = None;

        for (identity, record) in connections.iter() {
            if record.idle_for(now).await <= keep_alive {
                continue;
            }
            match record.close().await {
                Ok(()) => {
                    tracing::debug!(
                        id = record.id(),
                        fingerprint = %identity.fingerprint(),
                        address = %identity.address(),
                        "closed unused connection"
                    );
                    closed.push(identity.clone());
                }
                Err(err) => {
                    tracing::warn!(
                        id = record.id(),
                        fingerprint = %identity.fingerprint(),
                        error = %err,
                        "failed to close unused connection, will retry"
                    );
                    last_err = Some(err);
                }
            }
        }

        for identity in &closed {
            connections.remove(identity);
        }

        if !closed.is_empty() {
            tracing::info!(
                closed = closed.len(),
                remaining = connections.len(),
                "closed unused connections"
            );
        }

        match last_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Stop the idle reaper and close every cached connection.
    ///
    /// New `get_connection` calls are rejected afterwards. Returns the number
    /// of connections closed.
    pub async fn shutdown(&self) -> usize {
        self.shutdown_tx.send_replace(true);

        // Wait for any in-flight get-or-create to finish.
        let _guard = self.get_lock.lock().await;
        let drained: Vec<_> = self.connections.lock().await.drain().collect();

        let mut closed = 0;
        for (identity, record) in drained {
            match record.close().await {
                Ok(()) => closed += 1,
                Err(err) => tracing::warn!(
                    id = record.id(),
                    fingerprint = %identity.fingerprint(),
                    error = %err,
                    "failed to close connection during shutdown"
                ),
            }
        }

        tracing::info!(closed = closed, "connection manager shut down");
        closed
    }

    /// Receiver that observes the shutdown flag.
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Number of cached connections.
    pub async fn len(&self) -> usize {
        self.connections.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.connections.lock().await.is_empty()
    }

    pub async fn contains(&self, identity: &ConnectionIdentity) -> bool {
        self.connections.lock().await.contains_key(identity)
    }

    /// Connections established since the manager was created.
    pub fn created_total(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    /// Log every cached connection at `tracing::info` level.
    pub async fn log_stats(&self) {
        let now = Instant::now();
        let connections = self.connections.lock().await;
        for (identity, record) in connections.iter() {
            tracing::info!(
                id = record.id(),
                fingerprint = %identity.fingerprint(),
                address = %identity.address(),
                user = %identity.user(),
                idle_secs = record.idle_for(now).await.as_secs(),
                age_secs = now.saturating_duration_since(record.created_at()).as_secs(),
                "cached connection"
            );
        }
        tracing::info!(
            cached = connections.len(),
            created_total = self.created_total(),
            "connection manager statistics"
        );
    }
}

// ── Debug impl (cannot auto-derive due to dyn trait) ────────────────

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("config", &self.config)
            .field("classifier", &self.classifier)
            .field("created", &self.created_total())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}
