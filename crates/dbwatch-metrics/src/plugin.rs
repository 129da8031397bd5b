//! Plugin lifecycle: owns the connection manager, its reaper and the
//! executor for as long as the agent keeps the plugin running.

use std::sync::Arc;

use dbwatch_conn::{
    ConnectionManager, Connector, IdleReaper, ManagerConfig, MysqlConnector, PluginOptions,
};
use tracing::info;

use crate::error::MetricResult;
use crate::executor::MetricExecutor;

pub struct Plugin {
    manager: Arc<ConnectionManager>,
    executor: MetricExecutor,
    reaper: IdleReaper,
}

impl Plugin {
    /// Validate the options and start serving with MySQL connections.
    /// Must be called inside a Tokio runtime.
    pub fn start(options: PluginOptions) -> MetricResult<Self> {
        Self::start_with_connector(options, Arc::new(MysqlConnector::new()))
    }

    pub fn start_with_connector(
        options: PluginOptions,
        connector: Arc<dyn Connector>,
    ) -> MetricResult<Self> {
        options.validate()?;
        let classifier = options.kill_classifier()?;
        let config = ManagerConfig::from_options(&options);

        let manager =
            Arc::new(ConnectionManager::new(config, connector).with_classifier(classifier));
        let reaper = IdleReaper::spawn(manager.clone());
        let executor = MetricExecutor::new(manager.clone(), Arc::new(options));

        info!(
            keep_alive = ?config.keep_alive,
            request_timeout = ?config.request_timeout,
            "mysql plugin started"
        );

        Ok(Self {
            manager,
            executor,
            reaper,
        })
    }

    pub async fn export(&self, key: &str, params: &[String]) -> MetricResult<String> {
        self.executor.execute(key, params).await
    }

    pub fn manager(&self) -> &Arc<ConnectionManager> {
        &self.manager
    }

    /// Stop the reaper and close every cached connection.
    pub async fn stop(self) {
        let closed = self.manager.shutdown().await;
        self.reaper.join().await;
        info!(closed, "mysql plugin stopped");
    }
}

impl std::fmt::Debug for Plugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Plugin")
            .field("manager", &self.manager)
            .field("reaper_running", &!self.reaper.is_finished())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MetricError;
    use async_trait::async_trait;
    use dbwatch_conn::{
        BackendError, ConfigError, ConnError, Connection, ConnectionIdentity, QueryResult,
    };
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug)]
    struct Echo {
        open: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connection for Echo {
        async fn ping(&mut self) -> Result<(), BackendError> {
            Ok(())
        }

        async fn query(&mut self, _sql: &str, _args: &[String]) -> Result<QueryResult, BackendError> {
            Ok(QueryResult {
                columns: vec!["1".to_string()],
                rows: vec![vec![Some("1".to_string())]],
            })
        }

        async fn close(&mut self) -> Result<(), BackendError> {
            self.open.fetch_sub(1, Ordering::Relaxed);
            Ok(())
        }
    }

    struct EchoConnector {
        open: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for EchoConnector {
        async fn connect(
            &self,
            _identity: &ConnectionIdentity,
        ) -> Result<Box<dyn Connection>, BackendError> {
            self.open.fetch_add(1, Ordering::Relaxed);
            Ok(Box::new(Echo {
                open: self.open.clone(),
            }))
        }
    }

    fn start(options: PluginOptions) -> (MetricResult<Plugin>, Arc<AtomicUsize>) {
        let open = Arc::new(AtomicUsize::new(0));
        let connector = Arc::new(EchoConnector { open: open.clone() });
        (Plugin::start_with_connector(options.configure(3), connector), open)
    }

    #[tokio::test]
    async fn export_then_stop_closes_connections() {
        let (plugin, open) = start(PluginOptions::default());
        let plugin = plugin.unwrap();

        assert_eq!(plugin.export("mysql.ping", &[]).await.unwrap(), "1");
        assert_eq!(open.load(Ordering::Relaxed), 1);

        plugin.stop().await;
        assert_eq!(open.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn invalid_options_are_rejected() {
        let options = PluginOptions {
            keep_alive: 10,
            ..PluginOptions::default()
        };
        let (plugin, _) = start(options);
        assert!(matches!(
            plugin.unwrap_err(),
            MetricError::Config(ConfigError::OutOfRange { field: "keep_alive", .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn idle_connections_are_reaped_while_running() {
        let (plugin, open) = start(PluginOptions {
            keep_alive: 60,
            ..PluginOptions::default()
        });
        let plugin = plugin.unwrap();

        plugin.export("mysql.version", &[]).await.unwrap();
        assert_eq!(plugin.manager().len().await, 1);

        tokio::time::sleep(Duration::from_secs(75)).await;
        assert!(plugin.manager().is_empty().await);
        assert_eq!(open.load(Ordering::Relaxed), 0);

        plugin.stop().await;
    }

    #[tokio::test]
    async fn manager_refuses_requests_after_shutdown() {
        let (plugin, _) = start(PluginOptions::default());
        let plugin = plugin.unwrap();
        let manager = plugin.manager().clone();
        plugin.stop().await;

        let identity = dbwatch_conn::resolve("", &PluginOptions::default()).unwrap();
        assert!(matches!(
            manager.get_connection(&identity).await,
            Err(ConnError::ShuttingDown)
        ));
    }
}
