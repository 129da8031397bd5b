//! The fixed set of metrics the plugin answers.
//!
//! Every metric takes the common parameters `[target, user, password]`;
//! `target` is a session name or an address. Metrics needing more take them
//! after the common ones and bind them as query arguments.

use crate::error::{MetricError, MetricResult};

/// Number of leading parameters shared by every metric.
pub const COMMON_PARAMS: usize = 3;

/// How a metric's rows are turned into a value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Shape {
    /// First column of the first row, as text.
    Text,
    /// Array of row objects.
    Json,
    /// Array of row objects keyed `{#COLUMN}` for low-level discovery.
    Discovery,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MetricSpec {
    pub key: &'static str,
    pub description: &'static str,
    pub query: &'static str,
    pub min_params: usize,
    pub max_params: usize,
    pub shape: Shape,
}

impl MetricSpec {
    pub fn check_params(&self, got: usize) -> MetricResult<()> {
        if (self.min_params..=self.max_params).contains(&got) {
            Ok(())
        } else {
            Err(MetricError::ParamCount {
                key: self.key,
                min: self.min_params,
                max: self.max_params,
                got,
            })
        }
    }

    /// Parameters past the common ones, bound in order as query arguments.
    pub fn query_args(&self, params: &[String]) -> Vec<String> {
        params.iter().skip(COMMON_PARAMS).cloned().collect()
    }
}

pub const PING: &str = "mysql.ping";

pub static CATALOG: &[MetricSpec] = &[
    MetricSpec {
        key: "mysql.get_status_variables",
        description: "Values of global status variables.",
        query: "SHOW GLOBAL STATUS",
        min_params: 0,
        max_params: 3,
        shape: Shape::Json,
    },
    MetricSpec {
        key: PING,
        description: "Test if connection is alive or not.",
        query: "SELECT '1'",
        min_params: 0,
        max_params: 3,
        shape: Shape::Text,
    },
    MetricSpec {
        key: "mysql.version",
        description: "Server version.",
        query: "SELECT VERSION()",
        min_params: 0,
        max_params: 3,
        shape: Shape::Text,
    },
    MetricSpec {
        key: "mysql.db.discovery",
        description: "Databases discovery.",
        query: "SHOW DATABASES",
        min_params: 0,
        max_params: 3,
        shape: Shape::Discovery,
    },
    MetricSpec {
        key: "mysql.dbsize",
        description: "Database size in bytes.",
        query: "SELECT CAST(COALESCE(SUM(DATA_LENGTH + INDEX_LENGTH), 0) AS CHAR) \
                FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = ?",
        min_params: 4,
        max_params: 4,
        shape: Shape::Text,
    },
    MetricSpec {
        key: "mysql.replication.discovery",
        description: "Replication discovery.",
        query: "SHOW SLAVE STATUS",
        min_params: 0,
        max_params: 3,
        shape: Shape::Discovery,
    },
    MetricSpec {
        key: "mysql.slave_status",
        description: "Replication status.",
        query: "SHOW SLAVE STATUS",
        min_params: 0,
        max_params: 3,
        shape: Shape::Json,
    },
];

pub fn lookup(key: &str) -> MetricResult<&'static MetricSpec> {
    CATALOG
        .iter()
        .find(|spec| spec.key == key)
        .ok_or_else(|| MetricError::UnknownMetric(key.to_string()))
}
