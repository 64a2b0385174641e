//! Published diagnostics, deferred for hidden documents and cleared when a
//! server goes away.

use serde_json::json;
use tether_lsp::{CompletionConfig, LspManager};
use tether_types::DiagnosticSeverity;

use crate::common::{Recorder, connect, pump_until, settle};

fn publish(uri: &str) -> serde_json::Value {
    json!({
        "uri": uri,
        "version": 1,
        "diagnostics": [
            {
                "range": { "start": { "line": 2, "character": 0 }, "end": { "line": 2, "character": 4 } },
                "severity": 2, "code": "W291", "message": "trailing whitespace"
            },
            {
                "range": { "start": { "line": 2, "character": 1 }, "end": { "line": 2, "character": 3 } },
                "severity": 1, "code": "E999", "message": "syntax error"
            },
            {
                "range": { "start": { "line": 0, "character": 0 }, "end": { "line": 0, "character": 1 } },
                "message": "unused import"
            }
        ]
    })
}

#[tokio::test]
async fn test_diagnostics_grouped_by_line() {
    let (server, mut fake) = connect("pylsp", &["python"]);
    let mut manager = LspManager::from_servers(vec![server], CompletionConfig::default());
    let mut host = Recorder::default();
    tokio::join!(
        fake.handshake(json!({ "textDocumentSync": 1 })),
        pump_until(&mut manager, &mut host, |_, h| !h.initialized.is_empty()),
    );

    fake.notify("textDocument/publishDiagnostics", publish("file:///app.py"))
        .await;
    pump_until(&mut manager, &mut host, |_, h| !h.diagnostics.is_empty()).await;

    let (uri, lines) = &host.diagnostics[0];
    assert_eq!(uri, "file:///app.py");
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[0].line, 0);
    assert_eq!(lines[0].severity, None);
    assert_eq!(lines[0].text, "unused import");
    assert_eq!(lines[1].line, 2);
    assert_eq!(lines[1].severity, Some(DiagnosticSeverity::Error));
    assert_eq!(
        lines[1].text,
        "[E:E999]: syntax error\n[W:W291]: trailing whitespace"
    );

    // An empty publish clears the document.
    fake.notify(
        "textDocument/publishDiagnostics",
        json!({ "uri": "file:///app.py", "diagnostics": [] }),
    )
    .await;
    pump_until(&mut manager, &mut host, |_, h| h.diagnostics.len() == 2).await;
    assert!(host.diagnostics[1].1.is_empty());
}

#[tokio::test]
async fn test_hidden_document_applies_when_shown() {
    let (server, mut fake) = connect("pylsp", &["python"]);
    let mut manager = LspManager::from_servers(vec![server], CompletionConfig::default());
    let mut host = Recorder {
        hidden: vec!["file:///background.py".into()],
        ..Recorder::default()
    };
    tokio::join!(
        fake.handshake(json!({ "textDocumentSync": 1 })),
        pump_until(&mut manager, &mut host, |_, h| !h.initialized.is_empty()),
    );

    fake.notify(
        "textDocument/publishDiagnostics",
        publish("file:///background.py"),
    )
    .await;
    settle(&mut manager, &mut host).await;
    assert!(host.diagnostics.is_empty());

    host.hidden.clear();
    manager.on_document_shown("file:///background.py", &mut host);
    assert_eq!(host.diagnostics.len(), 1);
    assert_eq!(host.diagnostics[0].1.len(), 2);

    // Already applied; showing it again is a no-op.
    manager.on_document_shown("file:///background.py", &mut host);
    assert_eq!(host.diagnostics.len(), 1);
}

#[tokio::test]
async fn test_server_loss_clears_diagnostics_and_detaches_documents() {
    let (server, mut fake) = connect("pylsp", &["python"]);
    let mut manager = LspManager::from_servers(vec![server], CompletionConfig::default());
    let mut host = Recorder::default();
    tokio::join!(
        fake.handshake(json!({ "textDocumentSync": { "openClose": true, "change": 1 } })),
        pump_until(&mut manager, &mut host, |_, h| !h.initialized.is_empty()),
    );

    let uri = "file:///app.py";
    manager.open_document(uri, None, "python", "import os\n", &mut host);
    fake.recv().await;
    fake.notify("textDocument/publishDiagnostics", publish(uri)).await;
    pump_until(&mut manager, &mut host, |_, h| !h.diagnostics.is_empty()).await;

    drop(fake);
    pump_until(&mut manager, &mut host, |m, _| !m.has_running_servers()).await;

    assert_eq!(host.exited, ["pylsp"]);
    let (cleared_uri, lines) = host.diagnostics.last().unwrap();
    assert_eq!(cleared_uri, uri);
    assert!(lines.is_empty());
    let doc = manager.documents().get(uri).unwrap();
    assert_eq!(doc.server(), None);
}
