//! Shared test utilities and fixtures
//!
//! A fake language server speaking framed JSON-RPC over in-memory pipes, and
//! a host that records everything it is told.

#![allow(dead_code)]

use std::time::Duration;

use serde_json::{Value, json};
use tether_lsp::codec::{FrameReader, FrameWriter, MissingLengthPolicy};
use tether_lsp::diagnostics::LineDiagnostics;
use tether_lsp::{
    ClientOptions, CompletionConfig, Host, LanguageServer, LspManager, RequestContext, Transport,
};
use tether_types::{CompletionItem, MessageType};
use tokio::io::DuplexStream;

/// The server side of an in-memory connection.
pub struct FakeServer {
    reader: FrameReader<DuplexStream>,
    writer: FrameWriter<DuplexStream>,
}

impl FakeServer {
    /// Next message the client sent.
    pub async fn recv(&mut self) -> Value {
        let frame = tokio::time::timeout(Duration::from_secs(5), self.reader.read_frame())
            .await
            .expect("timed out waiting for the client")
            .expect("malformed frame")
            .expect("client closed the connection");
        serde_json::from_slice(frame.body()).expect("frame body is not JSON")
    }

    /// Skip messages until one with `method` arrives.
    pub async fn recv_method(&mut self, method: &str) -> Value {
        loop {
            let message = self.recv().await;
            if message["method"] == method {
                return message;
            }
        }
    }

    pub async fn send(&mut self, value: Value) {
        self.writer
            .write_frame(value.to_string().as_bytes())
            .await
            .expect("client pipe closed");
    }

    pub async fn reply(&mut self, id: &Value, result: Value) {
        self.send(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
            .await;
    }

    pub async fn notify(&mut self, method: &str, params: Value) {
        self.send(json!({ "jsonrpc": "2.0", "method": method, "params": params }))
            .await;
    }

    /// Answer `initialize` with `capabilities` and wait for `initialized`.
    pub async fn handshake(&mut self, capabilities: Value) {
        let init = self.recv_method("initialize").await;
        self.reply(&init["id"], json!({ "capabilities": capabilities }))
            .await;
        self.recv_method("initialized").await;
    }

    /// Answer `shutdown` and wait for `exit`.
    pub async fn accept_shutdown(&mut self) {
        let shutdown = self.recv_method("shutdown").await;
        self.reply(&shutdown["id"], Value::Null).await;
        self.recv_method("exit").await;
    }
}

/// Connect a [`LanguageServer`] to a fresh [`FakeServer`].
pub fn connect(name: &str, language_ids: &[&str]) -> (LanguageServer, FakeServer) {
    let (to_server, server_in) = tokio::io::duplex(64 * 1024);
    let (to_client, client_in) = tokio::io::duplex(64 * 1024);
    let transport = Transport::from_streams(name, client_in, to_server, MissingLengthPolicy::Reject);
    let options = ClientOptions {
        language_ids: language_ids.iter().map(ToString::to_string).collect(),
        settings: json!({ "fake": { "answer": 42 } }),
        ..ClientOptions::default()
    };
    let server = LanguageServer::connect(name, transport, options, &CompletionConfig::default())
        .expect("initialize should queue");
    let fake = FakeServer {
        reader: FrameReader::new(server_in),
        writer: FrameWriter::new(to_client),
    };
    (server, fake)
}

#[derive(Debug, Default)]
pub struct Recorder {
    pub hidden: Vec<String>,
    pub statuses: Vec<String>,
    pub logs: Vec<(MessageType, String)>,
    pub initialized: Vec<String>,
    pub exited: Vec<String>,
    pub diagnostics: Vec<(String, Vec<LineDiagnostics>)>,
    pub completions: Vec<Vec<String>>,
    pub hovers: Vec<String>,
}

impl Host for Recorder {
    fn is_document_visible(&self, uri: &str) -> bool {
        !self.hidden.iter().any(|h| h == uri)
    }

    fn status(&mut self, message: &str) {
        self.statuses.push(message.to_string());
    }

    fn log_message(&mut self, _server: &str, kind: MessageType, message: &str) {
        self.logs.push((kind, message.to_string()));
    }

    fn server_initialized(&mut self, server: &str) {
        self.initialized.push(server.to_string());
    }

    fn server_exited(&mut self, server: &str) {
        self.exited.push(server.to_string());
    }

    fn diagnostics_changed(&mut self, uri: &str, lines: &[LineDiagnostics]) {
        self.diagnostics.push((uri.to_string(), lines.to_vec()));
    }

    fn completion(&mut self, _context: &RequestContext, items: &[CompletionItem]) {
        self.completions
            .push(items.iter().map(|i| i.label.clone()).collect());
    }

    fn hover(&mut self, _context: &RequestContext, text: &str) {
        self.hovers.push(text.to_string());
    }
}

/// Pump `manager` until `done` holds, failing after about a second.
pub async fn pump_until(
    manager: &mut LspManager,
    host: &mut Recorder,
    done: impl Fn(&LspManager, &Recorder) -> bool,
) {
    for _ in 0..500 {
        manager.pump(host);
        if done(manager, host) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    panic!("condition not reached; host saw {host:#?}");
}

/// Let the reader tasks deliver whatever is in flight, then pump once.
pub async fn settle(manager: &mut LspManager, host: &mut Recorder) {
    tokio::time::sleep(Duration::from_millis(20)).await;
    manager.pump(host);
}
