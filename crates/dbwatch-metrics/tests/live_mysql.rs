//! Runs every catalog metric against a real server.
//!
//! ```text
//! DBWATCH_MYSQL_URI='root:secret@tcp(127.0.0.1:3306)/' \
//!     cargo test -p dbwatch-metrics --features integration
//! ```

#![cfg(feature = "integration")]

use dbwatch_metrics::{PING_FAILED, PING_OK, Plugin};
use dbwatch_conn::PluginOptions;

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
async fn catalog_against_live_server() {
    let Some(options) = options() else {
        eprintln!("DBWATCH_MYSQL_URI not set, skipping");
        return;
    };
    let plugin = Plugin::start(options).unwrap();

    assert_eq!(plugin.export("mysql.ping", &[]).await.unwrap(), PING_OK);

    let version = plugin.export("mysql.version", &[]).await.unwrap();
    assert!(!version.is_empty());

    let status = plugin.export("mysql.get_status_variables", &[]).await.unwrap();
    let status: serde_json::Value = serde_json::from_str(&status).unwrap();
    assert!(status.as_array().is_some_and(|rows| !rows.is_empty()));

    let dbs = plugin.export("mysql.db.discovery", &[]).await.unwrap();
    assert!(dbs.contains("{#DATABASE}"));

    let params: Vec<String> = ["", "", "", "mysql"].map(String::from).to_vec();
    let size = plugin.export("mysql.dbsize", &params).await.unwrap();
    assert!(size.parse::<u64>().is_ok());

    // Served from one cached connection.
    assert_eq!(plugin.manager().created_total(), 1);
    plugin.stop().await;
}

#[tokio::test]
async fn ping_unreachable_server_is_down() {
    if options().is_none() {
        return;
    }
    let options = PluginOptions {
        uri: "tcp(127.0.0.1:1)/".to_string(),
        timeout: Some(2),
        ..PluginOptions::default()
    };
    let plugin = Plugin::start(options).unwrap();
    assert_eq!(plugin.export("mysql.ping", &[]).await.unwrap(), PING_FAILED);
    plugin.stop().await;
}
