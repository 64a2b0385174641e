//! Documents reach the server registered for their language.

use serde_json::json;
use tether_lsp::{CompletionConfig, LspManager, RequestOutcome};
use tether_types::Position;

use crate::common::{Recorder, connect, pump_until, settle};

fn capabilities() -> serde_json::Value {
    json!({
        "textDocumentSync": { "openClose": true, "change": 2, "save": { "includeText": true } },
        "hoverProvider": true
    })
}

#[tokio::test]
async fn test_documents_routed_by_language() {
    let (python, mut pylsp) = connect("pylsp", &["python"]);
    let (c, mut clangd) = connect("clangd", &["c", "cpp"]);
    let mut manager = LspManager::from_servers(vec![python, c], CompletionConfig::default());
    let mut host = Recorder::default();

    tokio::join!(
        pylsp.handshake(capabilities()),
        clangd.handshake(capabilities()),
        pump_until(&mut manager, &mut host, |_, h| h.initialized.len() == 2),
    );
    host.initialized.sort();
    assert_eq!(host.initialized, ["clangd", "pylsp"]);

    assert!(manager.open_document("file:///src/main.c", None, "c", "int x;\n", &mut host));
    assert!(manager.open_document("file:///app.py", None, "python", "x = 1\n", &mut host));
    assert!(!manager.open_document("file:///notes.md", None, "markdown", "# hi\n", &mut host));

    let open = clangd.recv().await;
    assert_eq!(open["method"], "textDocument/didOpen");
    assert_eq!(open["params"]["textDocument"]["uri"], "file:///src/main.c");
    assert_eq!(open["params"]["textDocument"]["languageId"], "c");

    let open = pylsp.recv().await;
    assert_eq!(open["params"]["textDocument"]["uri"], "file:///app.py");

    let docs = manager.documents();
    assert_eq!(docs.get("file:///src/main.c").unwrap().server(), Some("clangd"));
    assert_eq!(docs.get("file:///notes.md").unwrap().server(), None);
}

#[tokio::test]
async fn test_change_save_close_sequence() {
    let (server, mut fake) = connect("pylsp", &["python"]);
    let mut manager = LspManager::from_servers(vec![server], CompletionConfig::default());
    let mut host = Recorder::default();
    tokio::join!(fake.handshake(capabilities()), async {
        pump_until(&mut manager, &mut host, |_, h| !h.initialized.is_empty()).await;
    });

    let uri = "file:///app.py";
    manager.open_document(uri, None, "python", "a = 1\nb = 2\n", &mut host);
    assert_eq!(fake.recv().await["method"], "textDocument/didOpen");

    manager.change_document(uri, "a = 1\nb = 3\n", &mut host);
    let change = fake.recv().await;
    assert_eq!(change["method"], "textDocument/didChange");
    assert_eq!(change["params"]["textDocument"]["version"], 2);
    let event = &change["params"]["contentChanges"][0];
    assert_eq!(event["range"]["start"]["line"], 1);
    assert_eq!(event["text"], "b = 3\n");

    // Unsent edits are flushed before the save.
    manager.save_document(uri, "a = 2\nb = 3\n", &mut host);
    let change = fake.recv().await;
    assert_eq!(change["method"], "textDocument/didChange");
    assert_eq!(change["params"]["textDocument"]["version"], 3);
    let save = fake.recv().await;
    assert_eq!(save["method"], "textDocument/didSave");
    assert_eq!(save["params"]["text"], "a = 2\nb = 3\n");

    manager.close_document(uri, "a = 2\nb = 3\n", &mut host);
    let close = fake.recv().await;
    assert_eq!(close["method"], "textDocument/didClose");
    assert!(manager.documents().get(uri).is_none());
}

#[tokio::test]
async fn test_hover_reaches_host() {
    let (server, mut fake) = connect("pylsp", &["python"]);
    let mut manager = LspManager::from_servers(vec![server], CompletionConfig::default());
    let mut host = Recorder::default();
    tokio::join!(fake.handshake(capabilities()), async {
        pump_until(&mut manager, &mut host, |_, h| !h.initialized.is_empty()).await;
    });

    let uri = "file:///app.py";
    let text = "print(1)\n";
    manager.open_document(uri, None, "python", text, &mut host);
    fake.recv().await;

    let outcome = manager.hover(uri, text, Position::new(0, 2), &mut host);
    let Some(RequestOutcome::Sent(id)) = outcome else {
        panic!("expected a hover request, got {outcome:?}");
    };
    let request = fake.recv().await;
    assert_eq!(request["method"], "textDocument/hover");
    assert_eq!(request["id"], id);
    assert_eq!(request["params"]["position"], json!({ "line": 0, "character": 2 }));

    fake.reply(
        &request["id"],
        json!({ "contents": { "kind": "markdown", "value": "print(*values)" } }),
    )
    .await;
    pump_until(&mut manager, &mut host, |_, h| !h.hovers.is_empty()).await;
    assert_eq!(host.hovers, ["print(*values)"]);

    // No signature help provider was advertised.
    let outcome = manager.signature_help(uri, text, Position::new(0, 6), &mut host);
    assert_eq!(outcome, Some(RequestOutcome::Unsupported));
    settle(&mut manager, &mut host).await;
    assert!(
        host.statuses
            .iter()
            .any(|s| s == "Method is not supported by server: textDocument/signatureHelp")
    );
}

#[tokio::test]
async fn test_document_opened_before_initialize() {
    let (server, mut fake) = connect("pylsp", &["python"]);
    let mut manager = LspManager::from_servers(vec![server], CompletionConfig::default());
    let mut host = Recorder::default();

    let uri = "file:///early.py";
    let text = "import os\n";
    assert!(!manager.open_document(uri, None, "python", text, &mut host));
    assert_eq!(manager.documents().get(uri).unwrap().server(), None);

    // Nothing is sent for a document the server never opened.
    assert_eq!(
        manager.hover(uri, text, Position::new(0, 0), &mut host),
        Some(RequestOutcome::Unsupported)
    );

    tokio::join!(
        fake.handshake(capabilities()),
        pump_until(&mut manager, &mut host, |_, h| !h.initialized.is_empty()),
    );
    settle(&mut manager, &mut host).await;

    let open = fake.recv().await;
    assert_eq!(open["method"], "textDocument/didOpen");
    assert_eq!(open["params"]["textDocument"]["uri"], uri);
    assert_eq!(open["params"]["textDocument"]["text"], text);
    assert_eq!(manager.documents().get(uri).unwrap().server(), Some("pylsp"));

    let outcome = manager.hover(uri, text, Position::new(0, 0), &mut host);
    assert!(matches!(outcome, Some(RequestOutcome::Sent(_))));
    assert_eq!(fake.recv().await["method"], "textDocument/hover");
}
