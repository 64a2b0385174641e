//! Startup, shutdown and log handling across the manager.

use std::time::{Duration, Instant};

use serde_json::json;
use tether_lsp::{ClientState, CompletionConfig, LspManager, SHUTDOWN_BUDGET};
use tether_types::MessageType;

use crate::common::{Recorder, connect, pump_until, settle};

#[tokio::test]
async fn test_initialize_carries_client_identity() {
    let (server, mut fake) = connect("pylsp", &["python"]);
    let mut manager = LspManager::from_servers(vec![server], CompletionConfig::default());
    let mut host = Recorder::default();

    let init = fake.recv().await;
    assert_eq!(init["method"], "initialize");
    assert_eq!(init["id"], 1);
    assert!(init["params"]["processId"].is_number());
    assert!(init["params"]["capabilities"]["textDocument"].is_object());

    manager.pump(&mut host);
    assert_eq!(
        manager.server("pylsp").unwrap().state(),
        ClientState::Initializing
    );

    fake.reply(&init["id"], json!({ "capabilities": {} })).await;
    pump_until(&mut manager, &mut host, |_, h| !h.initialized.is_empty()).await;
    assert_eq!(fake.recv().await["method"], "initialized");
    assert_eq!(manager.server("pylsp").unwrap().state(), ClientState::Running);
}

#[tokio::test]
async fn test_shutdown_all_graceful() {
    let (a, mut fake_a) = connect("pylsp", &["python"]);
    let (b, mut fake_b) = connect("clangd", &["c"]);
    let mut manager = LspManager::from_servers(vec![a, b], CompletionConfig::default());
    let mut host = Recorder::default();
    tokio::join!(
        fake_a.handshake(json!({})),
        fake_b.handshake(json!({})),
        pump_until(&mut manager, &mut host, |_, h| h.initialized.len() == 2),
    );

    let started = Instant::now();
    tokio::join!(
        manager.shutdown_all(&mut host),
        fake_a.accept_shutdown(),
        fake_b.accept_shutdown(),
    );
    assert!(started.elapsed() < SHUTDOWN_BUDGET);
    assert!(!manager.has_running_servers());
    host.exited.sort();
    assert_eq!(host.exited, ["clangd", "pylsp"]);
}

#[tokio::test]
async fn test_shutdown_all_kills_unresponsive_server() {
    let (server, mut fake) = connect("stuck", &["python"]);
    let mut manager = LspManager::from_servers(vec![server], CompletionConfig::default());
    let mut host = Recorder::default();
    tokio::join!(
        fake.handshake(json!({})),
        pump_until(&mut manager, &mut host, |_, h| !h.initialized.is_empty()),
    );

    let started = Instant::now();
    let (_, shutdown) = tokio::join!(manager.shutdown_all(&mut host), fake.recv());
    assert_eq!(shutdown["method"], "shutdown");
    assert!(started.elapsed() >= SHUTDOWN_BUDGET);
    assert!(started.elapsed() < SHUTDOWN_BUDGET + Duration::from_secs(1));
    assert!(!manager.has_running_servers());
}

#[tokio::test]
async fn test_shutdown_before_handshake_is_deferred() {
    let (mut server, mut fake) = connect("pylsp", &["python"]);
    let mut host = Recorder::default();

    server.shutdown().unwrap();
    let init = fake.recv().await;
    assert_eq!(init["method"], "initialize");
    fake.reply(&init["id"], json!({ "capabilities": {} })).await;

    let mut manager = LspManager::from_servers(vec![server], CompletionConfig::default());
    pump_until(&mut manager, &mut host, |_, h| !h.initialized.is_empty()).await;
    assert_eq!(fake.recv().await["method"], "initialized");
    assert_eq!(fake.recv().await["method"], "shutdown");
}

#[tokio::test]
async fn test_repeated_log_messages_collapse() {
    let (server, mut fake) = connect("pylsp", &["python"]);
    let mut manager = LspManager::from_servers(vec![server], CompletionConfig::default());
    let mut host = Recorder::default();
    tokio::join!(
        fake.handshake(json!({})),
        pump_until(&mut manager, &mut host, |_, h| !h.initialized.is_empty()),
    );

    for message in ["indexing", "indexing", "indexing", "done"] {
        fake.notify("window/logMessage", json!({ "type": 3, "message": message }))
            .await;
    }
    fake.notify("window/logMessage", json!({ "type": 1, "message": "done" }))
        .await;
    fake.notify("$/somethingCustom", json!({})).await;
    settle(&mut manager, &mut host).await;
    pump_until(&mut manager, &mut host, |_, h| h.logs.len() >= 3).await;

    assert_eq!(
        host.logs,
        [
            (MessageType::Info, "indexing".to_string()),
            (MessageType::Info, "done".to_string()),
            (MessageType::Error, "done".to_string()),
        ]
    );
    assert!(manager.has_running_servers());
}

#[tokio::test]
async fn test_shutdown_one_server_by_name() {
    let (a, mut pylsp) = connect("pylsp", &["python"]);
    let (b, mut clangd) = connect("clangd", &["c"]);
    let mut manager = LspManager::from_servers(vec![a, b], CompletionConfig::default());
    let mut host = Recorder::default();
    let sync = json!({ "textDocumentSync": { "openClose": true, "change": 1 } });
    tokio::join!(
        pylsp.handshake(sync.clone()),
        clangd.handshake(sync.clone()),
        pump_until(&mut manager, &mut host, |_, h| h.initialized.len() == 2),
    );

    assert!(manager.open_document("file:///app.py", None, "python", "x\n", &mut host));
    assert!(manager.open_document("file:///main.c", None, "c", "int x;\n", &mut host));
    pylsp.recv().await;
    clangd.recv().await;

    assert!(!manager.shutdown_server("missing", &mut host));
    assert!(manager.shutdown_server("pylsp", &mut host));
    let doc = manager.documents().get("file:///app.py").unwrap();
    assert_eq!(doc.server(), None);

    tokio::join!(
        pylsp.accept_shutdown(),
        pump_until(&mut manager, &mut host, |m, _| m.server("pylsp").is_none()),
    );
    assert_eq!(host.exited, ["pylsp"]);
    assert_eq!(
        manager.server("clangd").unwrap().state(),
        ClientState::Running
    );
    assert_eq!(
        manager.documents().get("file:///main.c").unwrap().server(),
        Some("clangd")
    );

    // Python no longer routes anywhere.
    assert!(!manager.open_document("file:///other.py", None, "python", "y\n", &mut host));
}
