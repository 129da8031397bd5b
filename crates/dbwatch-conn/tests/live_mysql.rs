//! Exercises the sqlx connector against a real server. Requires the
//! `integration` feature and `DBWATCH_MYSQL_URI`, e.g.
//! `root:secret@tcp(127.0.0.1:3306)/`.

#![cfg(feature = "integration")]

use std::sync::Arc;

use dbwatch_conn::{
    ConnError, ConnectionManager, ManagerConfig, MysqlConnector, PluginOptions, resolve,
};

fn options() -> Option<PluginOptions> {
    let uri = std::env::var("DBWATCH_MYSQL_URI").ok()?;
    Some(
        PluginOptions {
            uri,
            ..PluginOptions::default()
        }
        .configure(5),
    )
}

#[tokio::test]
async fn killed_session_is_evicted_and_replaced() {
    let Some(options) = options() else {
        eprintln!("DBWATCH_MYSQL_URI not set, skipping");
        return;
    };
    let identity = resolve("", &options).unwrap();
    let manager = ConnectionManager::new(
        ManagerConfig::from_options(&options),
        Arc::new(MysqlConnector::new()),
    )
    .with_classifier(options.kill_classifier().unwrap());

    let victim = manager.get_connection(&identity).await.unwrap();
    let thread_id = victim
        .query("SELECT CONNECTION_ID()", &[])
        .await
        .unwrap()
        .first_value()
        .flatten()
        .map(str::to_string)
        .unwrap();

    // Kill it from a second, independent session.
    let killer = ConnectionManager::new(
        ManagerConfig::from_options(&options),
        Arc::new(MysqlConnector::new()),
    );
    let record = killer.get_connection(&identity).await.unwrap();
    record.query(&format!("KILL {thread_id}"), &[]).await.unwrap();
    killer.shutdown().await;

    let err = manager.get_connection(&identity).await.unwrap_err();
    assert!(matches!(err, ConnError::ConnectionKilled(_)), "got {err:?}");

    let fresh = manager.get_connection(&identity).await.unwrap();
    assert_ne!(fresh.id(), victim.id());
    assert_eq!(
        fresh.query("SELECT '1'", &[]).await.unwrap().first_value(),
        Some(Some("1"))
    );
    manager.shutdown().await;
}

#[tokio::test]
async fn bound_argument_query() {
    let Some(options) = options() else {
        return;
    };
    let identity = resolve("", &options).unwrap();
    let manager = ConnectionManager::new(
        ManagerConfig::from_options(&options),
        Arc::new(MysqlConnector::new()),
    );
    let record = manager.get_connection(&identity).await.unwrap();
    let result = record
        .query("SELECT CONCAT(?, '-', ?)", &["a".to_string(), "b".to_string()])
        .await
        .unwrap();
    assert_eq!(result.first_value(), Some(Some("a-b")));
    manager.shutdown().await;
}
