//! Capabilities registered and revoked after the handshake.

use std::time::Duration;

use serde_json::{Value, json};
use tether_lsp::{CompletionConfig, LspManager, RequestOutcome};
use tether_types::Position;

use crate::common::{FakeServer, Recorder, connect, pump_until};

async fn started() -> (LspManager, FakeServer, Recorder) {
    let (server, mut fake) = connect("pylsp", &["python"]);
    let mut manager = LspManager::from_servers(vec![server], CompletionConfig::default());
    let mut host = Recorder::default();
    tokio::join!(
        fake.handshake(json!({ "textDocumentSync": { "openClose": true, "change": 1 } })),
        pump_until(&mut manager, &mut host, |_, h| !h.initialized.is_empty()),
    );
    (manager, fake, host)
}

/// Pump for a while so replies to server requests go out.
async fn drain(manager: &mut LspManager, host: &mut Recorder) {
    for _ in 0..50 {
        manager.pump(host);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test]
async fn test_dynamic_completion_registration() {
    let (mut manager, mut fake, mut host) = started().await;
    let uri = "file:///app.py";
    manager.open_document(uri, None, "python", "pr", &mut host);
    fake.recv().await;

    let outcome = manager.completion(uri, "pr", Position::new(0, 2), "pr", &mut host);
    assert_eq!(outcome, Some(RequestOutcome::Unsupported));

    fake.send(json!({
        "jsonrpc": "2.0", "id": 7, "method": "client/registerCapability",
        "params": { "registrations": [{
            "id": "completion-1",
            "method": "textDocument/completion",
            "registerOptions": {
                "documentSelector": [{ "language": "python" }],
                "triggerCharacters": ["."]
            }
        }]}
    }))
    .await;
    let (ack, ()) = tokio::join!(fake.recv(), drain(&mut manager, &mut host));
    assert_eq!(ack["id"], 7);
    assert_eq!(ack["result"], Value::Null);

    let outcome = manager.completion(uri, "pr", Position::new(0, 2), "pr", &mut host);
    assert!(matches!(outcome, Some(RequestOutcome::Sent(_))));
    let request = fake.recv_method("textDocument/completion").await;
    fake.reply(
        &request["id"],
        json!([{ "label": "print" }, { "label": "property" }, { "label": "len" }]),
    )
    .await;
    pump_until(&mut manager, &mut host, |_, h| !h.completions.is_empty()).await;
    assert_eq!(host.completions[0], ["print", "property"]);

    // Typing further is answered from the cache without another request.
    let outcome = manager.completion(uri, "pri", Position::new(0, 3), "pri", &mut host);
    assert!(matches!(outcome, Some(RequestOutcome::Cached(ref items)) if items.len() == 1));
    assert_eq!(host.completions.len(), 2);
    assert_eq!(host.completions[1], ["print"]);
}

#[tokio::test]
async fn test_unregister_revokes_capability() {
    let (mut manager, mut fake, mut host) = started().await;
    let uri = "file:///app.py";
    manager.open_document(uri, None, "python", "x", &mut host);
    fake.recv().await;

    fake.send(json!({
        "jsonrpc": "2.0", "id": 1, "method": "client/registerCapability",
        "params": { "registrations": [{
            "id": "hover-1",
            "method": "textDocument/hover",
            "registerOptions": { "documentSelector": [{ "language": "python" }] }
        }]}
    }))
    .await;
    let (ack, ()) = tokio::join!(fake.recv(), drain(&mut manager, &mut host));
    assert_eq!(ack["id"], 1);

    let outcome = manager.hover(uri, "x", Position::new(0, 0), &mut host);
    assert!(matches!(outcome, Some(RequestOutcome::Sent(_))));
    assert_eq!(fake.recv().await["method"], "textDocument/hover");

    fake.send(json!({
        "jsonrpc": "2.0", "id": 2, "method": "client/unregisterCapability",
        "params": { "unregisterations": [{ "id": "hover-1", "method": "textDocument/hover" }] }
    }))
    .await;
    let (ack, ()) = tokio::join!(fake.recv(), drain(&mut manager, &mut host));
    assert_eq!(ack["id"], 2);

    let outcome = manager.hover(uri, "x", Position::new(0, 0), &mut host);
    assert_eq!(outcome, Some(RequestOutcome::Unsupported));
}

#[tokio::test]
async fn test_configuration_request_answered_from_settings() {
    let (mut manager, mut fake, mut host) = started().await;

    fake.send(json!({
        "jsonrpc": "2.0", "id": "cfg", "method": "workspace/configuration",
        "params": { "items": [{ "section": "fake.answer" }, { "section": "missing" }, {}] }
    }))
    .await;
    let (reply, ()) = tokio::join!(fake.recv(), drain(&mut manager, &mut host));
    assert_eq!(reply["id"], "cfg");
    assert_eq!(reply["result"], json!([42, null, { "fake": { "answer": 42 } }]));
}
