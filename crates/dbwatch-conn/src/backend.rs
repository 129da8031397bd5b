//! Database client abstraction.
//!
//! The manager never talks to a driver directly. A [`Connector`] opens
//! [`Connection`]s for an identity; the MySQL implementation lives in
//! [`crate::mysql`], tests inject mocks.

use async_trait::async_trait;

use crate::error::BackendError;
use crate::identity::ConnectionIdentity;

/// Rows returned by a read-only query, every value rendered as text.
/// `None` is SQL `NULL`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
}

impl QueryResult {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// First column of the first row.
    pub fn first_value(&self) -> Option<Option<&str>> {
        self.rows
            .first()
            .and_then(|row| row.first())
            .map(|value| value.as_deref())
    }
}

/// One live link to the database server.
#[async_trait]
pub trait Connection: Send + std::fmt::Debug {
    /// Lightweight liveness probe.
    async fn ping(&mut self) -> Result<(), BackendError>;

    /// Run a read-only statement with positional string arguments.
    async fn query(&mut self, sql: &str, args: &[String]) -> Result<QueryResult, BackendError>;

    /// Close the link. Closing an already closed link succeeds.
    async fn close(&mut self) -> Result<(), BackendError>;
}

/// Opens new connections for the manager.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        identity: &ConnectionIdentity,
    ) -> Result<Box<dyn Connection>, BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_value_of_empty_result() {
        assert_eq!(QueryResult::default().first_value(), None);
    }

    #[test]
    fn first_value_distinguishes_null() {
        let result = QueryResult {
            columns: vec!["v".to_string()],
            rows: vec![vec![None]],
        };
        assert_eq!(result.first_value(), Some(None));

        let result = QueryResult {
            columns: vec!["v".to_string()],
            rows: vec![vec![Some("8.0.36".to_string())]],
        };
        assert_eq!(result.first_value(), Some(Some("8.0.36")));
    }
}
