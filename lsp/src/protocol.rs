//! JSON-RPC message types and LSP payload helpers.
//!
//! Inbound messages are decoded into the closed [`ServerMessage`] enum so the
//! client matches every shape exhaustively.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tether_types::{
    ChangeEvent, CompletionItem, CompletionList, Diagnostic, FormattingOptions, Location,
    MessageType, Position, Range, RequestId,
};

use crate::capabilities::{RegistrationRequest, UnregistrationRequest};

pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "initialized";
    pub const SHUTDOWN: &str = "shutdown";
    pub const EXIT: &str = "exit";

    pub const DID_OPEN: &str = "textDocument/didOpen";
    pub const DID_CHANGE: &str = "textDocument/didChange";
    pub const DID_SAVE: &str = "textDocument/didSave";
    pub const DID_CLOSE: &str = "textDocument/didClose";

    pub const COMPLETION: &str = "textDocument/completion";
    pub const HOVER: &str = "textDocument/hover";
    pub const SIGNATURE_HELP: &str = "textDocument/signatureHelp";
    pub const DEFINITION: &str = "textDocument/definition";
    pub const REFERENCES: &str = "textDocument/references";
    pub const IMPLEMENTATION: &str = "textDocument/implementation";
    pub const DECLARATION: &str = "textDocument/declaration";
    pub const TYPE_DEFINITION: &str = "textDocument/typeDefinition";
    pub const DOCUMENT_SYMBOL: &str = "textDocument/documentSymbol";
    pub const FORMATTING: &str = "textDocument/formatting";
    pub const RANGE_FORMATTING: &str = "textDocument/rangeFormatting";
    pub const WORKSPACE_SYMBOL: &str = "workspace/symbol";

    pub const REGISTER_CAPABILITY: &str = "client/registerCapability";
    pub const UNREGISTER_CAPABILITY: &str = "client/unregisterCapability";
    pub const CONFIGURATION: &str = "workspace/configuration";
    pub const WORKSPACE_FOLDERS: &str = "workspace/workspaceFolders";
    pub const WORK_DONE_PROGRESS_CREATE: &str = "window/workDoneProgress/create";

    pub const PUBLISH_DIAGNOSTICS: &str = "textDocument/publishDiagnostics";
    pub const LOG_MESSAGE: &str = "window/logMessage";
    pub const SHOW_MESSAGE: &str = "window/showMessage";
    pub const PROGRESS: &str = "$/progress";
}

pub mod error_codes {
    pub const INVALID_PARAMS: i64 = -32602;
    pub const METHOD_NOT_FOUND: i64 = -32601;
}

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("not a JSON-RPC message: {0}")]
    Shape(String),
}

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: i64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> Request<'a> {
    pub fn new(id: i64, method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Option<Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

/// Error object of a JSON-RPC response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, thiserror::Error)]
#[error("{message} (code {code})")]
pub struct ResponseError {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ResponseError {
    #[must_use]
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum ReplyOutcome {
    Result(Value),
    Error(ResponseError),
}

/// The client's reply to a server-initiated request.
#[derive(Debug, Serialize)]
pub(crate) struct Reply<'a> {
    pub jsonrpc: &'static str,
    pub id: &'a RequestId,
    #[serde(flatten)]
    pub outcome: ReplyOutcome,
}

impl<'a> Reply<'a> {
    pub fn ok(id: &'a RequestId, result: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            outcome: ReplyOutcome::Result(result),
        }
    }

    pub fn err(id: &'a RequestId, error: ResponseError) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            outcome: ReplyOutcome::Error(error),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConfigurationItem {
    #[serde(default, rename = "scopeUri")]
    pub scope_uri: Option<String>,
    #[serde(default)]
    pub section: Option<String>,
}

/// A request the server sends to the client.
#[derive(Debug, Clone)]
pub enum ServerRequest {
    RegisterCapability(Vec<RegistrationRequest>),
    UnregisterCapability(Vec<UnregistrationRequest>),
    Configuration(Vec<ConfigurationItem>),
    WorkspaceFolders,
    WorkDoneProgressCreate,
    /// A known method whose params failed to decode.
    Malformed { method: String, reason: String },
    Unknown { method: String },
}

/// A notification the server sends to the client.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerNotification {
    PublishDiagnostics {
        uri: String,
        version: Option<i64>,
        diagnostics: Vec<Diagnostic>,
    },
    LogMessage {
        kind: MessageType,
        message: String,
    },
    ShowMessage {
        kind: MessageType,
        message: String,
    },
    Progress {
        token: Value,
        value: Value,
    },
    Unknown {
        method: String,
    },
}

/// Every message shape a server can send.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    Response {
        id: RequestId,
        outcome: Result<Value, ResponseError>,
    },
    Request {
        id: RequestId,
        request: ServerRequest,
    },
    Notification(ServerNotification),
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default, deserialize_with = "present")]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ResponseError>,
}

/// Keep `"result": null` distinct from a missing `result`.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

#[derive(Deserialize)]
struct RegistrationParams {
    registrations: Vec<RegistrationRequest>,
}

#[derive(Deserialize)]
struct UnregistrationParams {
    #[serde(alias = "unregistrations")]
    unregisterations: Vec<UnregistrationRequest>,
}

#[derive(Deserialize)]
struct ConfigurationParams {
    items: Vec<ConfigurationItem>,
}

#[derive(Deserialize)]
struct PublishDiagnosticsParams {
    uri: String,
    #[serde(default)]
    version: Option<i64>,
    diagnostics: Vec<Diagnostic>,
}

#[derive(Deserialize)]
struct MessageParams {
    #[serde(rename = "type")]
    kind: MessageType,
    message: String,
}

#[derive(Deserialize)]
struct ProgressParams {
    token: Value,
    #[serde(default)]
    value: Value,
}

/// Decode one frame body.
pub fn decode_message(body: &[u8]) -> Result<ServerMessage, DecodeError> {
    let raw: RawMessage = serde_json::from_slice(body)?;
    let params = raw.params.unwrap_or(Value::Null);

    match (raw.id, raw.method) {
        (Some(id), Some(method)) => {
            let request = decode_request(&method, params);
            Ok(ServerMessage::Request { id, request })
        }
        (None, Some(method)) => Ok(ServerMessage::Notification(decode_notification(
            &method, params,
        )?)),
        (Some(id), None) => {
            let outcome = match (raw.result, raw.error) {
                (_, Some(error)) => Err(error),
                (Some(result), None) => Ok(result),
                (None, None) => {
                    return Err(DecodeError::Shape(format!(
                        "response {id} has neither result nor error"
                    )));
                }
            };
            Ok(ServerMessage::Response { id, outcome })
        }
        (None, None) => Err(DecodeError::Shape(
            "message has neither id nor method".to_string(),
        )),
    }
}

fn decode_request(method: &str, params: Value) -> ServerRequest {
    fn parse<T: for<'de> Deserialize<'de>>(method: &str, params: Value) -> Result<T, ServerRequest> {
        serde_json::from_value(params).map_err(|e| ServerRequest::Malformed {
            method: method.to_string(),
            reason: e.to_string(),
        })
    }

    let decoded = match method {
        methods::REGISTER_CAPABILITY => parse::<RegistrationParams>(method, params)
            .map(|p| ServerRequest::RegisterCapability(p.registrations)),
        methods::UNREGISTER_CAPABILITY => parse::<UnregistrationParams>(method, params)
            .map(|p| ServerRequest::UnregisterCapability(p.unregisterations)),
        methods::CONFIGURATION => parse::<ConfigurationParams>(method, params)
            .map(|p| ServerRequest::Configuration(p.items)),
        methods::WORKSPACE_FOLDERS => Ok(ServerRequest::WorkspaceFolders),
        methods::WORK_DONE_PROGRESS_CREATE => Ok(ServerRequest::WorkDoneProgressCreate),
        _ => Ok(ServerRequest::Unknown {
            method: method.to_string(),
        }),
    };
    decoded.unwrap_or_else(|malformed| malformed)
}

fn decode_notification(method: &str, params: Value) -> Result<ServerNotification, DecodeError> {
    Ok(match method {
        methods::PUBLISH_DIAGNOSTICS => {
            let p: PublishDiagnosticsParams = serde_json::from_value(params)?;
            ServerNotification::PublishDiagnostics {
                uri: p.uri,
                version: p.version,
                diagnostics: p.diagnostics,
            }
        }
        methods::LOG_MESSAGE => {
            let p: MessageParams = serde_json::from_value(params)?;
            ServerNotification::LogMessage {
                kind: p.kind,
                message: p.message,
            }
        }
        methods::SHOW_MESSAGE => {
            let p: MessageParams = serde_json::from_value(params)?;
            ServerNotification::ShowMessage {
                kind: p.kind,
                message: p.message,
            }
        }
        methods::PROGRESS => {
            let p: ProgressParams = serde_json::from_value(params)?;
            ServerNotification::Progress {
                token: p.token,
                value: p.value,
            }
        }
        _ => ServerNotification::Unknown {
            method: method.to_string(),
        },
    })
}

pub(crate) fn initialize_params(
    root_uri: Option<&str>,
    initialization_options: Option<&Value>,
) -> Value {
    let mut params = serde_json::json!({
        "processId": std::process::id(),
        "clientInfo": {
            "name": "tether",
            "version": env!("CARGO_PKG_VERSION")
        },
        "rootUri": root_uri,
        "capabilities": {
            "textDocument": {
                "synchronization": {
                    "dynamicRegistration": true,
                    "willSave": false,
                    "willSaveWaitUntil": false,
                    "didSave": true
                },
                "completion": {
                    "dynamicRegistration": true,
                    "completionItem": {
                        "snippetSupport": true,
                        "insertReplaceSupport": true
                    },
                    "contextSupport": false
                },
                "hover": {
                    "dynamicRegistration": true,
                    "contentFormat": ["plaintext", "markdown"]
                },
                "signatureHelp": { "dynamicRegistration": true },
                "definition": { "dynamicRegistration": true, "linkSupport": true },
                "references": { "dynamicRegistration": true },
                "implementation": { "dynamicRegistration": true, "linkSupport": true },
                "declaration": { "dynamicRegistration": true, "linkSupport": true },
                "typeDefinition": { "dynamicRegistration": true, "linkSupport": true },
                "documentSymbol": {
                    "dynamicRegistration": true,
                    "hierarchicalDocumentSymbolSupport": true
                },
                "formatting": { "dynamicRegistration": true },
                "rangeFormatting": { "dynamicRegistration": true },
                "publishDiagnostics": {
                    "relatedInformation": false
                }
            },
            "workspace": {
                "configuration": true,
                "workspaceFolders": true,
                "symbol": { "dynamicRegistration": true }
            },
            "window": {
                "workDoneProgress": true
            }
        },
        "workspaceFolders": root_uri.map(|uri| serde_json::json!([{
            "uri": uri,
            "name": "workspace"
        }]))
    });
    if let Some(options) = initialization_options {
        params["initializationOptions"] = options.clone();
    }
    params
}

pub(crate) fn did_open_params(uri: &str, language_id: &str, version: i32, text: &str) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "languageId": language_id,
            "version": version,
            "text": text
        }
    })
}

pub(crate) fn did_change_params(uri: &str, version: i32, changes: &[ChangeEvent]) -> Value {
    serde_json::json!({
        "textDocument": {
            "uri": uri,
            "version": version
        },
        "contentChanges": changes
    })
}

pub(crate) fn did_save_params(uri: &str, text: Option<&str>) -> Value {
    let mut params = serde_json::json!({ "textDocument": { "uri": uri } });
    if let Some(text) = text {
        params["text"] = Value::from(text);
    }
    params
}

pub(crate) fn did_close_params(uri: &str) -> Value {
    serde_json::json!({ "textDocument": { "uri": uri } })
}

pub(crate) fn text_document_params(uri: &str) -> Value {
    serde_json::json!({ "textDocument": { "uri": uri } })
}

pub(crate) fn position_params(uri: &str, position: Position) -> Value {
    serde_json::json!({
        "textDocument": { "uri": uri },
        "position": position
    })
}

pub(crate) fn references_params(uri: &str, position: Position) -> Value {
    let mut params = position_params(uri, position);
    params["context"] = serde_json::json!({ "includeDeclaration": true });
    params
}

pub(crate) fn formatting_params(uri: &str, options: FormattingOptions, range: Option<Range>) -> Value {
    let mut params = serde_json::json!({
        "textDocument": { "uri": uri },
        "options": options
    });
    if let Some(range) = range {
        params["range"] = serde_json::json!(range);
    }
    params
}

pub(crate) fn workspace_symbol_params(query: &str) -> Value {
    serde_json::json!({ "query": query })
}

/// A decoded `textDocument/completion` result.
#[must_use]
pub fn completion_from_result(result: Value) -> CompletionList {
    match result {
        Value::Array(_) => CompletionList {
            is_incomplete: false,
            items: serde_json::from_value::<Vec<CompletionItem>>(result).unwrap_or_else(|e| {
                tracing::debug!("Failed to decode completion items: {e}");
                Vec::new()
            }),
        },
        Value::Object(_) => serde_json::from_value(result).unwrap_or_else(|e| {
            tracing::debug!("Failed to decode completion list: {e}");
            CompletionList::default()
        }),
        _ => CompletionList::default(),
    }
}

/// Flatten a hover result's `contents` into plain text.
#[must_use]
pub fn hover_text(result: &Value) -> Option<String> {
    fn marked(value: &Value) -> Option<String> {
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Object(obj) => obj.get("value").and_then(Value::as_str).map(str::to_string),
            _ => None,
        }
    }

    let contents = result.get("contents")?;
    let text = match contents {
        Value::Array(parts) => parts
            .iter()
            .filter_map(marked)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("\n\n"),
        other => marked(other)?,
    };
    (!text.trim().is_empty()).then_some(text)
}

/// Label of the active signature in a signature help result.
#[must_use]
pub fn signature_label(result: &Value) -> Option<String> {
    let signatures = result.get("signatures")?.as_array()?;
    let active = result
        .get("activeSignature")
        .and_then(Value::as_u64)
        .and_then(|n| usize::try_from(n).ok())
        .filter(|&n| n < signatures.len())
        .unwrap_or(0);
    signatures
        .get(active)?
        .get("label")?
        .as_str()
        .map(str::to_string)
}

/// Normalize `Location | Location[] | LocationLink[] | null`.
#[must_use]
pub fn locations_from_result(result: &Value) -> Vec<Location> {
    fn one(value: &Value) -> Option<Location> {
        if value.get("targetUri").is_some() {
            let uri = value.get("targetUri")?.as_str()?.to_string();
            let range = value
                .get("targetSelectionRange")
                .or_else(|| value.get("targetRange"))?;
            let range = serde_json::from_value(range.clone()).ok()?;
            Some(Location { uri, range })
        } else {
            serde_json::from_value(value.clone()).ok()
        }
    }

    match result {
        Value::Array(items) => items.iter().filter_map(one).collect(),
        Value::Object(_) => one(result).into_iter().collect(),
        _ => Vec::new(),
    }
}

pub fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

#[must_use]
pub fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}
