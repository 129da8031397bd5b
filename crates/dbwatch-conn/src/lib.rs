//! dbwatch-conn: connection lifecycle management for the MySQL monitor.
//!
//! Resolves metric targets into value-based connection identities and keeps
//! one live, pinged connection per identity in a concurrency-safe cache.
//!
//! # Architecture
//!
//! ```text
//! target ("primary" | "tcp(db:3306)/")
//!   → IdentityResolver → ConnectionIdentity
//!     → ConnectionManager::get_connection
//!       → cached + ping OK       → shared ConnectionRecord
//!       → cached + killed        → evict, ConnectionKilled (caller retries)
//!       → absent                 → Connector::connect + ping → insert
//!
//! IdleReaper (every 10s) → ConnectionManager::close_unused
//! ConnectionManager::shutdown → reaper exits, handles closed
//! ```

pub mod backend;
pub mod classifier;
pub mod config;
pub mod error;
pub mod identity;
pub mod manager;
pub mod mysql;
pub mod reaper;
pub mod record;

pub use backend::{Connection, Connector, QueryResult};
pub use classifier::KillClassifier;
pub use config::{ConfigError, PluginOptions, Session};
pub use error::{BackendError, ConnError, ConnResult};
pub use identity::{ConnectionIdentity, IdentityResolver, Transport, resolve};
pub use manager::{ConnectionManager, ManagerConfig};
pub use mysql::MysqlConnector;
pub use reaper::IdleReaper;
pub use record::ConnectionRecord;
