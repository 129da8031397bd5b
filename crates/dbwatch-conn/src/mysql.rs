//! MySQL connector built on `sqlx`.
//!
//! Each [`MysqlConnection`] wraps a single `sqlx::MySqlConnection` (not a
//! pool): the manager does the pooling. Queries without arguments go over the
//! text protocol like an interactive client would; queries with arguments are
//! prepared and bound.
//!
//! Every value is rendered as text, whatever its column type, because the
//! results are shaped into strings or JSON for the telemetry pipeline.

use std::io::ErrorKind;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlDatabaseError, MySqlRow};
use sqlx::{Column, ConnectOptions, Connection as _, Executor as _, Row, ValueRef};

use crate::backend::{Connection, Connector, QueryResult};
use crate::error::BackendError;
use crate::identity::{ConnectionIdentity, Transport};

impl From<sqlx::Error> for BackendError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db) => {
                let code = db
                    .try_downcast_ref::<MySqlDatabaseError>()
                    .map(MySqlDatabaseError::number);
                BackendError {
                    message: db.message().to_string(),
                    code,
                    io_kind: None,
                }
            }
            sqlx::Error::Io(io) => BackendError::io(io.kind(), err.to_string()),
            _ => BackendError::new(err.to_string()),
        }
    }
}

fn timed_out(operation: &str, after: Duration) -> BackendError {
    BackendError::io(
        ErrorKind::TimedOut,
        format!("{operation} timed out after {after:?}"),
    )
}

/// Opens MySQL connections for identities.
#[derive(Clone, Debug, Default)]
pub struct MysqlConnector;

impl MysqlConnector {
    pub fn new() -> Self {
        Self
    }

    fn connect_options(identity: &ConnectionIdentity) -> MySqlConnectOptions {
        let mut options = MySqlConnectOptions::new()
            .username(identity.user())
            .password(identity.password());

        options = match (identity.transport(), identity.host_port()) {
            (Transport::Tcp, Some((host, port))) => options.host(host).port(port),
            (Transport::Tcp, None) => options.host(identity.address()),
            (Transport::Unix, _) => options.socket(identity.address()),
        };

        if let Some(database) = identity.database() {
            options = options.database(database);
        }

        options.disable_statement_logging()
    }
}

#[async_trait]
impl Connector for MysqlConnector {
    async fn connect(
        &self,
        identity: &ConnectionIdentity,
    ) -> Result<Box<dyn Connection>, BackendError> {
        let options = Self::connect_options(identity);
        let connect_timeout = identity.connect_timeout();

        let conn = tokio::time::timeout(connect_timeout, options.connect())
            .await
            .map_err(|_| timed_out("connect", connect_timeout))??;

        tracing::debug!(
            address = %identity.address(),
            transport = %identity.transport(),
            "opened mysql connection"
        );

        Ok(Box::new(MysqlConnection {
            inner: Some(conn),
            read_timeout: identity.read_timeout(),
        }))
    }
}

/// A single MySQL session.
pub struct MysqlConnection {
    /// `None` once closed.
    inner: Option<MySqlConnection>,
    read_timeout: Duration,
}

impl std::fmt::Debug for MysqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MysqlConnection")
            .field("open", &self.inner.is_some())
            .field("read_timeout", &self.read_timeout)
            .finish()
    }
}

impl MysqlConnection {
    fn live(&mut self) -> Result<&mut MySqlConnection, BackendError> {
        self.inner
            .as_mut()
            .ok_or_else(|| BackendError::io(ErrorKind::NotConnected, "connection is closed"))
    }
}

#[async_trait]
impl Connection for MysqlConnection {
    async fn ping(&mut self) -> Result<(), BackendError> {
        let read_timeout = self.read_timeout;
        let conn = self.live()?;
        tokio::time::timeout(read_timeout, conn.ping())
            .await
            .map_err(|_| timed_out("ping", read_timeout))??;
        Ok(())
    }

    async fn query(&mut self, sql: &str, args: &[String]) -> Result<QueryResult, BackendError> {
        let read_timeout = self.read_timeout;
        let conn = self.live()?;

        let rows = if args.is_empty() {
            tokio::time::timeout(read_timeout, conn.fetch_all(sqlx::raw_sql(sql))).await
        } else {
            let mut query = sqlx::query(sql);
            for arg in args {
                query = query.bind(arg.clone());
            }
            tokio::time::timeout(read_timeout, conn.fetch_all(query)).await
        }
        .map_err(|_| timed_out("query", read_timeout))??;

        rows_to_result(&rows)
    }

    /// Send `COM_QUIT` and drop the socket.
    ///
    /// `sqlx` consumes the connection on close, so the socket is gone even
    /// when the quit handshake fails; a later close is a no-op.
    async fn close(&mut self) -> Result<(), BackendError> {
        let Some(conn) = self.inner.take() else {
            return Ok(());
        };
        let result = tokio::time::timeout(self.read_timeout, conn.close())
            .await
            .map_err(|_| timed_out("close", self.read_timeout))
            .and_then(|closed| closed.map_err(BackendError::from));

        if let Err(err) = &result {
            tracing::warn!(error = %err, "mysql connection dropped without a clean quit");
        }
        result
    }
}

fn rows_to_result(rows: &[MySqlRow]) -> Result<QueryResult, BackendError> {
    let columns = rows
        .first()
        .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
        .unwrap_or_default();

    let rows = rows
        .iter()
        .map(|row| (0..row.len()).map(|i| column_text(row, i)).collect())
        .collect::<Result<_, _>>()?;

    Ok(QueryResult { columns, rows })
}

/// Render one column as text, trying the representations MySQL columns
/// decode into.
fn column_text(row: &MySqlRow, index: usize) -> Result<Option<String>, BackendError> {
    if row.try_get_raw(index)?.is_null() {
        return Ok(None);
    }
    if let Ok(value) = row.try_get::<String, _>(index) {
        return Ok(Some(value));
    }
    if let Ok(value) = row.try_get::<i64, _>(index) {
        return Ok(Some(value.to_string()));
    }
    if let Ok(value) = row.try_get::<u64, _>(index) {
        return Ok(Some(value.to_string()));
    }
    if let Ok(value) = row.try_get::<f64, _>(index) {
        return Ok(Some(value.to_string()));
    }
    let bytes: Vec<u8> = row.try_get(index)?;
    Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
}
