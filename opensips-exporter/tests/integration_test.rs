//! Integration tests for the OpenSIPS exporter.
//!
//! A fake `mi_json` server stands in for OpenSIPS; scrapes go through the
//! real HTTP client, collector and scrape server.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::Router;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use opensips_exporter::{Collector, HttpServer, SharedCollector, StatCatalog};
use opensips_mi::MiJsonClient;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio::sync::watch;

type Responses = Arc<Mutex<HashMap<String, Value>>>;

/// Helper to answer `GET /json/<command>?params=<args>` from canned responses.
async fn mi_handler(
    State(responses): State<Responses>,
    Path(command): Path<String>,
    Query(query): Query<HashMap<String, String>>,
) -> Response {
    let key = match query.get("params") {
        Some(params) => format!("{} {}", command, params),
        None => command,
    };

    match responses.lock().get(&key).cloned() {
        Some(body) => axum::Json(body).into_response(),
        None => (StatusCode::NOT_FOUND, "unknown command").into_response(),
    }
}

fn default_responses() -> HashMap<String, Value> {
    HashMap::from([
        (
            "version".to_string(),
            json!({ "Server": "OpenSIPS (2.4.2 (x86_64/linux))", "Build": "10:35:12 Jan 10 2019" }),
        ),
        (
            "which".to_string(),
            json!({ "children": [
                { "value": "get_statistics" },
                { "value": "list_all_profiles" },
                { "value": "profile_get_values" },
                { "value": "ps" },
                { "value": "version" },
                { "value": "which" },
            ]}),
        ),
        (
            "ps".to_string(),
            json!({ "Process": [
                { "attributes": { "ID": "0", "PID": "4711", "Type": "attendant" } },
                { "attributes": { "ID": "1", "PID": "4712", "Type": "SIP receiver udp:127.0.0.1:5060 " } },
            ]}),
        ),
        (
            "get_statistics all".to_string(),
            json!({
                "core:rcv_requests": "42",
                "core:timestamp": "500",
                "dialog:active_dialogs": "3",
                "load:load-proc-1": "7",
                "net:waiting_udp": "0",
                "pkmem:1-used_size": "65536",
                "sl:4xx_replies": "2",
                "tm:2xx_transactions": "9",
                "usrloc:location-users": "5",
            }),
        ),
        (
            "list_all_profiles".to_string(),
            json!({ "trunk": "1", "calls": "0" }),
        ),
        (
            "profile_get_values trunk".to_string(),
            json!({ "value": [
                { "value": "gw=carrier_a,dir=out", "attributes": { "count": "4" } },
                { "value": "carrier_b", "attributes": { "count": "1" } },
            ]}),
        ),
    ])
}

/// Start the fake OpenSIPS and return its mi_json URL.
async fn start_fake_opensips(responses: Responses) -> String {
    let router = Router::new()
        .route("/json/:command", get(mi_handler))
        .with_state(responses);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    format!("http://{}/json", addr)
}

/// Start the scrape server and return its address.
async fn start_exporter(
    collector: SharedCollector<MiJsonClient>,
    shutdown: watch::Receiver<bool>,
) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(collector, addr, "/metrics".to_string());
    tokio::spawn(async move {
        server.serve(listener, shutdown).await.unwrap();
    });
    addr
}

fn create_collector(url: &str) -> SharedCollector<MiJsonClient> {
    let client = MiJsonClient::new(url, Duration::from_secs(2)).unwrap();
    Arc::new(Collector::new(
        client,
        Arc::new(StatCatalog::builtin().unwrap()),
    ))
}

async fn scrape(addr: SocketAddr) -> String {
    let response = reqwest::get(format!("http://{}/metrics", addr))
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);
    response.text().await.unwrap()
}

#[tokio::test]
async fn test_end_to_end_scrape() {
    let responses: Responses = Arc::new(Mutex::new(default_responses()));
    let url = start_fake_opensips(responses).await;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let addr = start_exporter(create_collector(&url), shutdown_rx).await;

    let body = scrape(addr).await;

    let expected = [
        "opensips_up 1",
        "opensips_version_info{server=\"OpenSIPS\",version=\"2.4.2\",arch=\"x86_64\",os=\"linux\"} 1",
        "opensips_process_info{id=\"1\",type=\"SIP receiver udp:127.0.0.1:5060\"} 1",
        "opensips_core_received_requests_total 42",
        "opensips_core_uptime_seconds_total 500",
        "opensips_dialog_active_dialogs 3",
        "opensips_load_process_load{id=\"1\"} 7",
        "opensips_net_waiting_bytes{transport=\"udp\"} 0",
        "opensips_pkmem_used_size_bytes{id=\"1\"} 65536",
        "opensips_sl_sent_replies{code=\"4xx\"} 2",
        "opensips_tm_transactions_total{code=\"2xx\"} 9",
        "opensips_dialog_profiles_with_values_count{profile=\"trunk\",gw=\"carrier_a\",dir=\"out\"} 4",
        "opensips_dialog_profiles_with_values_count{profile=\"trunk\",value=\"carrier_b\"} 1",
        "opensips_exporter_collections_total 1",
        "opensips_exporter_stats_skipped_total 1",
    ];
    for line in expected {
        assert!(
            body.lines().any(|l| l == line),
            "missing line {:?} in:\n{}",
            line,
            body
        );
    }

    assert!(body.contains("# TYPE opensips_core_received_requests_total counter\n"));
    assert!(body.contains("# TYPE opensips_dialog_active_dialogs gauge\n"));
    assert!(!body.contains("location-users"));

    // One HELP line per metric name even with several series
    assert_eq!(
        body.matches("# HELP opensips_dialog_profiles_with_values_count ")
            .count(),
        1
    );
}

#[tokio::test]
async fn test_end_to_end_target_down() {
    let responses: Responses = Arc::new(Mutex::new(HashMap::new()));
    let url = start_fake_opensips(responses).await;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let collector = create_collector(&url);
    let addr = start_exporter(collector.clone(), shutdown_rx).await;

    let body = scrape(addr).await;

    assert!(body.lines().any(|l| l == "opensips_up 0"));
    assert!(!body.contains("opensips_version_info"));
    assert!(body.lines().any(|l| l == "opensips_exporter_collection_failures_total 1"));

    let ready = reqwest::get(format!("http://{}/ready", addr)).await.unwrap();
    assert_eq!(ready.status(), reqwest::StatusCode::SERVICE_UNAVAILABLE);
    assert!(!collector.stats().last_up);
}

#[tokio::test]
async fn test_end_to_end_restart_detection() {
    let responses: Responses = Arc::new(Mutex::new(default_responses()));
    let url = start_fake_opensips(responses.clone()).await;
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let collector = create_collector(&url);
    let addr = start_exporter(collector.clone(), shutdown_rx).await;

    scrape(addr).await;
    assert_eq!(collector.cache().snapshot().processes.len(), 2);

    // OpenSIPS restarts with a different process layout
    {
        let mut responses = responses.lock();
        responses.insert(
            "get_statistics all".to_string(),
            json!({ "core:timestamp": "10" }),
        );
        responses.insert(
            "ps".to_string(),
            json!({ "Process": [ { "attributes": { "ID": "0", "Type": "attendant" } } ] }),
        );
    }

    // The pass that detects the restart still reports the cached layout
    let body = scrape(addr).await;
    assert_eq!(
        body.lines()
            .filter(|l| l.starts_with("opensips_process_info{"))
            .count(),
        2
    );
    assert!(collector.cache().snapshot().processes.is_empty());

    let body = scrape(addr).await;
    assert_eq!(
        body.lines()
            .filter(|l| l.starts_with("opensips_process_info{"))
            .count(),
        1
    );

    let ready = reqwest::get(format!("http://{}/ready", addr)).await.unwrap();
    assert_eq!(ready.status(), reqwest::StatusCode::OK);
}

#[tokio::test]
async fn test_http_server_graceful_shutdown() {
    let url = start_fake_opensips(Arc::new(Mutex::new(HashMap::new()))).await;
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = HttpServer::new(create_collector(&url), addr, "/metrics".to_string());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(async move { server.serve(listener, shutdown_rx).await });

    let health = reqwest::get(format!("http://{}/health", addr)).await.unwrap();
    assert_eq!(health.status(), reqwest::StatusCode::OK);
    assert_eq!(health.text().await.unwrap(), "healthy\n");

    shutdown_tx.send(true).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server should stop")
        .unwrap();
    assert!(result.is_ok());
}
