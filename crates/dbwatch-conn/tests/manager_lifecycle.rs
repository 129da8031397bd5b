//! End-to-end lifecycle tests through the public API: configuration →
//! identity resolution → manager → reaper → shutdown, against a mock
//! connector that simulates a MySQL server able to kill sessions.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dbwatch_conn::{
    BackendError, ConnError, Connection, ConnectionIdentity, ConnectionManager, Connector,
    IdentityResolver, IdleReaper, ManagerConfig, PluginOptions, QueryResult,
};

// ── Simulated server ─────────────────────────────────────────────────

/// Tracks open sessions by thread id; killing a session makes its next
/// ping fail like `KILL <id>` would.
#[derive(Debug, Default)]
struct FakeServer {
    next_thread_id: AtomicU64,
    open: Mutex<HashSet<u64>>,
    killed: Mutex<HashSet<u64>>,
    connects: AtomicU64,
}

impl FakeServer {
    fn kill_all(&self) {
        let open = self.open.lock().unwrap();
        self.killed.lock().unwrap().extend(open.iter().copied());
    }

    fn open_sessions(&self) -> usize {
        self.open.lock().unwrap().len()
    }
}

#[derive(Debug)]
struct FakeSession {
    thread_id: u64,
    server: Arc<FakeServer>,
}

#[async_trait]
impl Connection for FakeSession {
    async fn ping(&mut self) -> Result<(), BackendError> {
        if self.server.killed.lock().unwrap().contains(&self.thread_id) {
            return Err(BackendError::server(1927, "Connection was killed"));
        }
        Ok(())
    }

    async fn query(&mut self, sql: &str, _args: &[String]) -> Result<QueryResult, BackendError> {
        Ok(QueryResult {
            columns: vec!["thread".to_string(), "sql".to_string()],
            rows: vec![vec![Some(self.thread_id.to_string()), Some(sql.to_string())]],
        })
    }

    async fn close(&mut self) -> Result<(), BackendError> {
        self.server.open.lock().unwrap().remove(&self.thread_id);
        Ok(())
    }
}

struct FakeConnector {
    server: Arc<FakeServer>,
}

#[async_trait]
impl Connector for FakeConnector {
    async fn connect(
        &self,
        _identity: &ConnectionIdentity,
    ) -> Result<Box<dyn Connection>, BackendError> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        let thread_id = self.server.next_thread_id.fetch_add(1, Ordering::Relaxed);
        self.server.open.lock().unwrap().insert(thread_id);
        self.server.connects.fetch_add(1, Ordering::Relaxed);
        Ok(Box::new(FakeSession {
            thread_id,
            server: self.server.clone(),
        }))
    }
}

fn options() -> PluginOptions {
    PluginOptions::from_toml_str(
        r#"
uri = "tcp(localhost:3306)/"
user = "zbx_monitor"
password = "pw"
timeout = 5
keep_alive = 60

[sessions.primary]
uri = "tcp(primary.db:3306)/"

[sessions.replica]
uri = "tcp(replica.db:3306)/"
user = "replmon"
"#,
    )
    .unwrap()
    .configure(3)
}

fn setup() -> (Arc<ConnectionManager>, Arc<FakeServer>, PluginOptions) {
    let options = options();
    options.validate().unwrap();
    let server = Arc::new(FakeServer::default());
    let connector = Arc::new(FakeConnector {
        server: server.clone(),
    });
    let manager = ConnectionManager::new(ManagerConfig::from_options(&options), connector)
        .with_classifier(options.kill_classifier().unwrap());
    (Arc::new(manager), server, options)
}

// ── Tests ────────────────────────────────────────────────────────────

#[tokio::test]
async fn session_and_literal_address_share_a_connection() {
    let (manager, server, options) = setup();
    let resolver = IdentityResolver::new(&options);

    let by_session = resolver.resolve("primary").unwrap();
    let by_address = resolver.resolve("zbx_monitor:pw@tcp(primary.db:3306)/").unwrap();
    assert_eq!(by_session, by_address);

    let a = manager.get_connection(&by_session).await.unwrap();
    let b = manager.get_connection(&by_address).await.unwrap();
    assert_eq!(a.id(), b.id());
    assert_eq!(server.connects.load(Ordering::Relaxed), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn parallel_requests_across_targets() {
    let (manager, server, options) = setup();
    let targets = ["primary", "replica", "", "tcp(localhost:3306)/"];

    let mut tasks = Vec::new();
    for round in 0..8 {
        for target in targets {
            let manager = manager.clone();
            let identity = IdentityResolver::new(&options).resolve(target).unwrap();
            tasks.push(tokio::spawn(async move {
                let record = manager.get_connection(&identity).await.unwrap();
                let result = record.query("SELECT 1", &[]).await.unwrap();
                (round, result.rows[0][0].clone())
            }));
        }
    }
    for task in tasks {
        task.await.unwrap();
    }

    // "" and the literal default address are the same identity.
    assert_eq!(server.connects.load(Ordering::Relaxed), 3);
    assert_eq!(manager.len().await, 3);
}

#[tokio::test]
async fn kill_then_retry_gets_a_new_session() {
    let (manager, server, options) = setup();
    let identity = IdentityResolver::new(&options).resolve("replica").unwrap();

    let first = manager.get_connection(&identity).await.unwrap();
    server.kill_all();

    let err = manager.get_connection(&identity).await.unwrap_err();
    assert!(matches!(err, ConnError::ConnectionKilled(_)));
    assert_eq!(server.open_sessions(), 0);

    let second = manager.get_connection(&identity).await.unwrap();
    assert_ne!(first.id(), second.id());
    let thread = second.query("SELECT CONNECTION_ID()", &[]).await.unwrap();
    assert_eq!(thread.first_value(), Some(Some("1")));
}

#[tokio::test(start_paused = true)]
async fn reaper_reclaims_idle_sessions_and_stops() {
    let (manager, server, options) = setup();
    let resolver = IdentityResolver::new(&options);
    let busy = resolver.resolve("primary").unwrap();
    let idle = resolver.resolve("replica").unwrap();

    manager.get_connection(&busy).await.unwrap();
    manager.get_connection(&idle).await.unwrap();
    let reaper = IdleReaper::spawn(manager.clone());

    // Keep `busy` in use every 30s for two minutes.
    for _ in 0..4 {
        tokio::time::sleep(Duration::from_secs(30)).await;
        manager.get_connection(&busy).await.unwrap();
    }

    assert!(manager.contains(&busy).await);
    assert!(!manager.contains(&idle).await);
    assert_eq!(server.open_sessions(), 1);

    assert_eq!(manager.shutdown().await, 1);
    reaper.join().await;
    assert_eq!(server.open_sessions(), 0);
}

#[tokio::test]
async fn invalid_target_is_rejected_before_connecting() {
    let (manager, server, options) = setup();
    let err = IdentityResolver::new(&options).resolve("ftp(host)/").unwrap_err();
    assert!(matches!(err, ConnError::InvalidAddress(_)));
    assert!(manager.is_empty().await);
    assert_eq!(server.connects.load(Ordering::Relaxed), 0);
}
