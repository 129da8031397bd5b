use dbwatch_conn::{ConfigError, ConnError};
use thiserror::Error;

pub type MetricResult<T> = Result<T, MetricError>;

#[derive(Debug, Error)]
pub enum MetricError {
    #[error("unsupported metric: {0}")]
    UnknownMetric(String),

    #[error("{key} expects {min}..={max} parameters, got {got}")]
    ParamCount {
        key: &'static str,
        min: usize,
        max: usize,
        got: usize,
    },

    #[error("{0} returned no rows")]
    EmptyResult(&'static str),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Conn(#[from] ConnError),

    #[error("failed to encode result: {0}")]
    Json(#[from] serde_json::Error),
}
