//! Metric executor: resolve the target, borrow a connection, run one
//! catalog query and shape its rows.

use std::sync::Arc;

use dbwatch_conn::{
    ConnError, ConnectionIdentity, ConnectionManager, IdentityResolver, PluginOptions,
};

use crate::catalog::{self, MetricSpec, PING};
use crate::error::{MetricError, MetricResult};
use crate::format;

/// Value reported by `mysql.ping` when the server is reachable.
pub const PING_OK: &str = "1";
/// Value reported by `mysql.ping` on any connection or probe failure.
pub const PING_FAILED: &str = "0";

#[derive(Debug)]
pub struct MetricExecutor {
    manager: Arc<ConnectionManager>,
    options: Arc<PluginOptions>,
}

impl MetricExecutor {
    pub fn new(manager: Arc<ConnectionManager>, options: Arc<PluginOptions>) -> Self {
        Self { manager, options }
    }

    /// Identity for the common `[target, user, password]` parameters.
    pub fn identity(&self, params: &[String]) -> MetricResult<ConnectionIdentity> {
        let param = |i: usize| params.get(i).map(String::as_str);
        Ok(IdentityResolver::new(&self.options).resolve_with(
            param(0).unwrap_or_default(),
            param(1),
            param(2),
        )?)
    }

    pub async fn execute(&self, key: &str, params: &[String]) -> MetricResult<String> {
        let spec = catalog::lookup(key)?;
        spec.check_params(params.len())?;

        if spec.key == PING {
            return self.ping(spec, params).await.map(str::to_string);
        }
        self.run(spec, params).await
    }

    async fn run(&self, spec: &MetricSpec, params: &[String]) -> MetricResult<String> {
        let identity = self.identity(params)?;
        let record = self.manager.get_connection(&identity).await?;
        let result = record.query(spec.query, &spec.query_args(params)).await?;

        tracing::debug!(
            metric = spec.key,
            connection = record.id(),
            rows = result.rows.len(),
            "metric query completed"
        );
        format::shape(spec, &result)
    }

    /// `1` when the server answers, `0` on connection or probe failures.
    /// An unusable address is a configuration error and is returned as such.
    async fn ping(&self, spec: &MetricSpec, params: &[String]) -> MetricResult<&'static str> {
        match self.run(spec, params).await {
            Ok(value) if value == PING_OK => Ok(PING_OK),
            Ok(value) => {
                tracing::debug!(value = %value, "unexpected ping reply");
                Ok(PING_FAILED)
            }
            Err(err @ MetricError::Conn(ConnError::InvalidAddress(_))) => Err(err),
            Err(err) => {
                tracing::debug!(error = %err, "ping failed");
                Ok(PING_FAILED)
            }
        }
    }
}
