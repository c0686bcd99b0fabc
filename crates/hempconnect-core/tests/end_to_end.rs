//! Bootstrap against a fake daemon over real HTTP, with real conf discovery
//! and params checking on a temp directory.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use pretty_assertions::assert_eq;
use serde_json::{Value, json};
use tempfile::TempDir;

use hempconnect_config::settings::MemorySettingsStore;
use hempconnect_config::{FileConfigResolver, conf};
use hempconnect_core::bootstrap::{Bootstrap, BootstrapError, BootstrapTimings, HttpConnector};
use hempconnect_core::params::{ParamFetcher, REQUIRED_PARAMS};
use hempconnect_core::rpc::RpcRequest;
use hempconnect_core::status::Reporter;
use hempconnect_test_utils::config::TestConfigBuilder;
use hempconnect_test_utils::fakes::RecordingStatusSink;
use hempconnect_test_utils::tracing_setup::init_test_tracing;

const AUTH: &str = "Basic dGhjOmh1bnRlcjI="; // thc:hunter2

/// Replies "warming up" to the first `warmup` calls, then succeeds.
async fn fake_daemon(
    State((calls, warmup)): State<(Arc<AtomicUsize>, usize)>,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    if headers.get("authorization").and_then(|v| v.to_str().ok()) != Some(AUTH) {
        return (StatusCode::UNAUTHORIZED, String::new());
    }
    let request: Value = serde_json::from_str(&body).unwrap_or_default();
    let n = calls.fetch_add(1, Ordering::SeqCst);
    if n < warmup {
        let reply = json!({
            "result": null,
            "error": {"code": -28, "message": "Activating best chain..."},
            "id": request["id"],
        });
        return (StatusCode::INTERNAL_SERVER_ERROR, reply.to_string());
    }
    let reply = json!({
        "result": {"version": 3000000, "blocks": 77},
        "error": null,
        "id": request["id"],
    });
    (StatusCode::OK, reply.to_string())
}

async fn start_daemon(warmup: usize) -> (u16, Arc<AtomicUsize>) {
    let calls = Arc::new(AtomicUsize::new(0));
    let router = Router::new()
        .route("/", post(fake_daemon))
        .with_state((calls.clone(), warmup));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    (port, calls)
}

fn fast_timings() -> BootstrapTimings {
    BootstrapTimings {
        poll_interval: Duration::from_millis(10),
        connected_grace: Duration::from_millis(10),
        launch_wait: Duration::from_millis(10),
        detached_wait: Duration::from_millis(10),
        last_resort_wait: Duration::from_millis(10),
        max_launch_waits: 2,
    }
}

fn bootstrap_for(tmp: &TempDir, sink: Arc<RecordingStatusSink>) -> Bootstrap {
    let app = TestConfigBuilder::new()
        .embedded(false)
        .paths_under(tmp.path())
        .build();
    let paths = app.daemon_paths();

    std::fs::create_dir_all(&paths.params_dir).unwrap();
    for name in REQUIRED_PARAMS {
        std::fs::write(paths.params_dir.join(name), b"params").unwrap();
    }

    Bootstrap::new(
        Arc::new(ParamFetcher::new(&paths.params_dir).unwrap()),
        Arc::new(FileConfigResolver::new(
            paths,
            Arc::new(MemorySettingsStore::new()),
        )),
        Arc::new(HttpConnector::new(app.rpc.timeout())),
        Arc::new(Reporter::new(sink)),
    )
    .with_daemon_name(app.daemon.name)
    .with_timings(fast_timings())
}

#[test_log::test(tokio::test)]
async fn test_discovers_conf_waits_out_warmup_and_connects() {
    let (port, calls) = start_daemon(3).await;
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("THC.conf"),
        format!("server=1\nrpcuser=thc\nrpcpassword=hunter2\nrpcport={port}\n"),
    )
    .unwrap();
    let sink = RecordingStatusSink::new();

    let established = bootstrap_for(&tmp, sink.clone()).run().await.unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 4);
    assert_eq!(established.connection.config().port, port);
    assert_eq!(
        sink.details_for("Your thcd is starting up. Please wait."),
        vec![
            "Activating best chain",
            "Activating best chain.",
            "Activating best chain..",
        ]
    );

    // The handed-off connection is live until shut down.
    let info = established
        .connection
        .call(&RpcRequest::new("1", "getinfo"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(info["blocks"], 77);
    established.connection.shutdown();
    assert!(
        established
            .connection
            .call(&RpcRequest::new("2", "getinfo"))
            .await
            .is_none()
    );
}

#[tokio::test]
async fn test_wrong_password_is_terminal() {
    init_test_tracing();
    let (port, calls) = start_daemon(0).await;
    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("THC.conf"),
        format!("rpcuser=thc\nrpcpassword=wrong\nrpcport={port}\n"),
    )
    .unwrap();
    let sink = RecordingStatusSink::new();

    let err = bootstrap_for(&tmp, sink.clone()).run().await.unwrap_err();
    assert_eq!(err, BootstrapError::AuthenticationFailed);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(sink.errors().len(), 1);
}

#[tokio::test]
async fn test_nothing_listening_external_mode() {
    init_test_tracing();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);

    let tmp = TempDir::new().unwrap();
    let mut conf_text = conf::render_conf_template("hunter2", &Default::default());
    conf_text.push_str(&format!("rpcport={port}\n"));
    std::fs::write(tmp.path().join("THC.conf"), conf_text).unwrap();

    let err = bootstrap_for(&tmp, RecordingStatusSink::new())
        .run()
        .await
        .unwrap_err();
    assert_eq!(
        err,
        BootstrapError::ConnectionRefused {
            host: "127.0.0.1".into(),
            port,
            uses_conf_file: true,
        }
    );
}

#[tokio::test]
async fn test_error_body_under_404_ends_bootstrap() {
    init_test_tracing();
    let router = Router::new().route(
        "/",
        post(|| async {
            (
                StatusCode::NOT_FOUND,
                r#"{"result":null,"error":{"code":-32601,"message":"Method not found"},"id":"someid"}"#,
            )
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    let tmp = TempDir::new().unwrap();
    std::fs::write(
        tmp.path().join("THC.conf"),
        format!("rpcuser=thc\nrpcpassword=hunter2\nrpcport={port}\n"),
    )
    .unwrap();
    let sink = RecordingStatusSink::new();

    let err = tokio::time::timeout(
        Duration::from_secs(5),
        bootstrap_for(&tmp, sink.clone()).run(),
    )
    .await
    .expect("bootstrap should not keep polling")
    .unwrap_err();

    assert!(matches!(err, BootstrapError::TransportError(_)), "got {err:?}");
    assert_eq!(sink.errors().len(), 1);
    assert!(
        sink.details_for("Your thcd is starting up. Please wait.")
            .is_empty()
    );
}
