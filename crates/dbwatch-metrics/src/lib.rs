//! dbwatch-metrics: the MySQL metric catalog and the plugin lifecycle.
//!
//! ```text
//! Plugin::export(key, [target, user, password, ..])
//!   → catalog::lookup + param check
//!   → IdentityResolver → ConnectionManager::get_connection
//!   → ConnectionRecord::query
//!   → format::shape (text | json | discovery)
//! ```
//!
//! `mysql.ping` never fails on connectivity: it reports `1` or `0`.

pub mod catalog;
pub mod error;
pub mod executor;
pub mod format;
pub mod plugin;

pub use catalog::{CATALOG, MetricSpec, Shape};
pub use error::{MetricError, MetricResult};
pub use executor::{MetricExecutor, PING_FAILED, PING_OK};
pub use plugin::Plugin;
