//! Connection record: one cached handle plus access bookkeeping.

use std::future::Future;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::backend::{Connection, QueryResult};
use crate::error::{ConnError, ConnResult};
use crate::identity::ConnectionIdentity;

/// A cached connection owned by the manager.
///
/// The handle is exclusively owned by the record. Callers borrow the record
/// through an `Arc` for the duration of a query; only the manager closes it.
#[derive(Debug)]
pub struct ConnectionRecord {
    /// Process-unique diagnostic id, increasing in creation order.
    id: u64,
    identity: ConnectionIdentity,
    created_at: Instant,
    last_access: Mutex<Instant>,
    /// `None` once closed.
    handle: Mutex<Option<Box<dyn Connection>>>,
    /// Bound applied to every network operation on the handle.
    timeout: Duration,
}

impl ConnectionRecord {
    pub(crate) fn new(
        id: u64,
        identity: ConnectionIdentity,
        handle: Box<dyn Connection>,
        timeout: Duration,
    ) -> Self {
        let now = Instant::now();
        Self {
            id,
            identity,
            created_at: now,
            last_access: Mutex::new(now),
            handle: Mutex::new(Some(handle)),
            timeout,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn identity(&self) -> &ConnectionIdentity {
        &self.identity
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub async fn last_access(&self) -> Instant {
        *self.last_access.lock().await
    }

    /// Time since the last access, as seen at `now`.
    pub async fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_access().await)
    }

    pub(crate) async fn touch(&self) {
        *self.last_access.lock().await = Instant::now();
    }

    pub async fn is_closed(&self) -> bool {
        self.handle.lock().await.is_none()
    }

    /// Liveness probe on the cached handle.
    ///
    /// Waiting for the handle counts against the timeout: a record busy
    /// with queries fails the probe with [`ConnError::Timeout`] instead of
    /// stalling the caller.
    pub async fn ping(&self) -> ConnResult<()> {
        bounded("ping", self.timeout, async {
            let mut handle = self.handle.lock().await;
            let conn = handle.as_mut().ok_or_else(|| self.not_found())?;
            Ok::<_, ConnError>(conn.ping().await?)
        })
        .await
    }

    /// Run a read-only statement on the cached handle.
    pub async fn query(&self, sql: &str, args: &[String]) -> ConnResult<QueryResult> {
        bounded("query", self.timeout, async {
            let mut handle = self.handle.lock().await;
            let conn = handle.as_mut().ok_or_else(|| self.not_found())?;
            Ok::<_, ConnError>(conn.query(sql, args).await?)
        })
        .await
    }

    /// Close the handle. On failure the handle is kept so a later close can
    /// retry; closing an already closed record succeeds.
    pub(crate) async fn close(&self) -> ConnResult<()> {
        bounded("close", self.timeout, async {
            let mut handle = self.handle.lock().await;
            let Some(conn) = handle.as_mut() else {
                return Ok::<_, ConnError>(());
            };
            conn.close().await?;
            *handle = None;
            Ok(())
        })
        .await
    }

    fn not_found(&self) -> ConnError {
        ConnError::ConnectionNotFound(format!("{} (id {})", self.identity, self.id))
    }
}

/// Run a backend operation under `timeout`, mapping both failure modes into
/// [`ConnError`].
pub(crate) async fn bounded<T, E, F>(
    operation: &'static str,
    timeout: Duration,
    future: F,
) -> ConnResult<T>
where
    F: Future<Output = Result<T, E>>,
    E: Into<ConnError>,
{
    match tokio::time::timeout(timeout, future).await {
        Ok(result) => result.map_err(Into::into),
        Err(_) => Err(ConnError::Timeout { operation, timeout }),
    }
}
