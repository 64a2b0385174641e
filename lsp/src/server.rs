//! One language server connection.
//!
//! [`LanguageServer`] owns the transport, the protocol client, the poll
//! schedule and the per-server stores. All of its state is mutated from
//! [`LanguageServer::pump`] and the document operations, which the host calls
//! from a single context; only the transport's IO tasks run elsewhere.

use std::time::Instant;

use anyhow::{Context, Result};
use serde_json::Value;
use tether_types::{
    CompletionItem, FormattingOptions, MessageType, Position, Range, RequestId, TextEdit,
};

use crate::client::{Client, ClientError, ClientEvent, ClientOptions, ClientState};
use crate::completion::{self, CompletionCache, CompletionEdit, WordChars};
use crate::config::{CompletionConfig, ValidatedServer};
use crate::diagnostics::{self, DiagnosticsStore};
use crate::document::Document;
use crate::host::{Host, RequestContext};
use crate::protocol::{self, ServerNotification, methods};
use crate::scheduler::{BackoffStrategy, PollSchedule};
use crate::sync::SyncKind;
use crate::transport::{Inbound, Transport};

/// What happened to a request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    /// Sent with this id; the answer arrives through the host.
    Sent(i64),
    /// Answered from the completion cache without a round trip.
    Cached(Vec<CompletionItem>),
    /// The server has not registered the method for this document.
    Unsupported,
}

/// The location-returning requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocationKind {
    Definition,
    References,
    Implementation,
    Declaration,
    TypeDefinition,
}

impl LocationKind {
    #[must_use]
    pub fn method(self) -> &'static str {
        match self {
            Self::Definition => methods::DEFINITION,
            Self::References => methods::REFERENCES,
            Self::Implementation => methods::IMPLEMENTATION,
            Self::Declaration => methods::DECLARATION,
            Self::TypeDefinition => methods::TYPE_DEFINITION,
        }
    }
}

pub struct LanguageServer {
    name: String,
    language_ids: Vec<String>,
    transport: Transport,
    client: Client<RequestContext>,
    schedule: PollSchedule,
    diagnostics: DiagnosticsStore,
    completion_cache: Option<CompletionCache>,
    word_chars: WordChars,
    add_call_parens: bool,
    last_log: Option<(MessageType, String)>,
    capabilities_changed: bool,
    torn_down: bool,
}

impl LanguageServer {
    /// Connect to a validated server and send `initialize`.
    pub async fn start(server: &ValidatedServer, completion: &CompletionConfig) -> Result<Self> {
        let transport = Transport::open(&server.name, &server.connect, server.missing_length)
            .await
            .with_context(|| format!("starting language server '{}'", server.name))?;
        Self::connect(&server.name, transport, server.client.clone(), completion)
            .with_context(|| format!("initializing language server '{}'", server.name))
    }

    /// Drive an already open transport, starting with `initialize`.
    pub fn connect(
        name: &str,
        transport: Transport,
        options: ClientOptions,
        completion: &CompletionConfig,
    ) -> Result<Self, ClientError> {
        let language_ids = options.language_ids.clone();
        let mut server = Self {
            name: name.to_string(),
            language_ids,
            transport,
            client: Client::new(options),
            schedule: PollSchedule::new(BackoffStrategy::default()),
            diagnostics: DiagnosticsStore::new(),
            completion_cache: None,
            word_chars: completion.word_chars(),
            add_call_parens: completion.add_call_parens,
            last_log: None,
            capabilities_changed: false,
            torn_down: false,
        };
        server.client.initialize()?;
        server.flush();
        Ok(server)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn language_ids(&self) -> &[String] {
        &self.language_ids
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        self.client.state()
    }

    #[must_use]
    pub fn client(&self) -> &Client<RequestContext> {
        &self.client
    }

    /// Whether the connection has been torn down.
    #[must_use]
    pub fn is_exited(&self) -> bool {
        self.torn_down
    }

    #[must_use]
    pub fn diagnostics(&self) -> &DiagnosticsStore {
        &self.diagnostics
    }

    #[must_use]
    pub fn completion_cache(&self) -> Option<&CompletionCache> {
        self.completion_cache.as_ref()
    }

    #[must_use]
    pub fn schedule(&self) -> &PollSchedule {
        &self.schedule
    }

    #[must_use]
    pub fn is_due(&self, now: Instant) -> bool {
        self.schedule.is_due(now)
    }

    /// Whether the handshake or a registration change happened since the
    /// last call. Documents waiting for a server should be offered again.
    pub fn take_capabilities_changed(&mut self) -> bool {
        std::mem::take(&mut self.capabilities_changed)
    }

    /// Whether `doc` would be opened with this server.
    #[must_use]
    pub fn handles(&self, doc: &Document) -> bool {
        self.client.is_running()
            && self
                .client
                .registry()
                .supports(methods::DID_OPEN, doc.language_id(), doc.path())
    }

    /// Process everything already queued by the transport and flush output.
    ///
    /// Never blocks. Returns the number of inbound frames handled.
    pub fn pump<H: Host + ?Sized>(&mut self, host: &mut H) -> usize {
        if self.torn_down {
            return 0;
        }

        let mut handled = 0;
        while let Some(inbound) = self.transport.try_recv() {
            match inbound {
                Inbound::Frame(frame) => {
                    handled += 1;
                    for event in self.client.recv(frame.body()) {
                        self.handle_event(event, host);
                    }
                }
                Inbound::Closed => {
                    if self.client.state() != ClientState::Exited {
                        tracing::warn!(server = %self.name, "Connection closed before exit");
                        self.client.exit();
                    }
                    break;
                }
            }
        }

        while let Some(line) = self.transport.try_recv_stderr() {
            tracing::debug!(target: "tether_lsp::stderr", server = %self.name, "{line}");
            host.server_stderr(&self.name, &line);
        }

        let wrote = self.flush();
        if self.client.state() == ClientState::Exited {
            self.teardown(host);
        } else if !wrote {
            self.schedule.fired(Instant::now());
        }
        handled
    }

    /// Send `didOpen` once for a document the server has registered for.
    ///
    /// Returns `false` when nothing was sent.
    pub fn did_open(&mut self, doc: &mut Document) -> Result<bool, ClientError> {
        if doc.is_open()
            || !self
                .client
                .registry()
                .supports(methods::DID_OPEN, doc.language_id(), doc.path())
        {
            return Ok(false);
        }
        let params =
            protocol::did_open_params(doc.uri(), doc.language_id(), doc.version(), doc.text());
        self.client.send_notification(methods::DID_OPEN, Some(params))?;
        doc.set_server(Some(self.name.clone()));
        tracing::debug!(server = %self.name, uri = %doc.uri(), "Document opened");
        self.flush();
        Ok(true)
    }

    /// Bring the server's view of `doc` up to `text` under the registered
    /// sync kind.
    pub fn did_change(&mut self, doc: &mut Document, text: &str) -> Result<bool, ClientError> {
        if doc.server() != Some(self.name.as_str()) {
            return Ok(false);
        }
        let Some(kind) = self
            .client
            .registry()
            .method_options(methods::DID_CHANGE, doc.language_id(), doc.path())
            .map(SyncKind::from_options)
        else {
            return Ok(false);
        };
        let Some(batch) = doc.sync_to(kind, text) else {
            return Ok(false);
        };
        let params = protocol::did_change_params(doc.uri(), batch.version, &batch.events);
        self.client.send_notification(methods::DID_CHANGE, Some(params))?;
        self.flush();
        Ok(true)
    }

    /// Flush changes, then send `didSave` with the text when the
    /// registration asks for it.
    pub fn did_save(&mut self, doc: &mut Document, text: &str) -> Result<bool, ClientError> {
        if doc.server() != Some(self.name.as_str()) {
            return Ok(false);
        }
        let Some(include_text) = self
            .client
            .registry()
            .method_options(methods::DID_SAVE, doc.language_id(), doc.path())
            .map(|o| o.get("includeText").and_then(Value::as_bool).unwrap_or(false))
        else {
            return Ok(false);
        };
        self.did_change(doc, text)?;
        let params = protocol::did_save_params(doc.uri(), include_text.then(|| doc.text()));
        self.client.send_notification(methods::DID_SAVE, Some(params))?;
        self.flush();
        Ok(true)
    }

    /// Flush changes, send `didClose` and drop the association.
    pub fn did_close(&mut self, doc: &mut Document, text: &str) -> Result<bool, ClientError> {
        if doc.server() != Some(self.name.as_str()) {
            return Ok(false);
        }
        self.did_change(doc, text)?;
        if self
            .client
            .registry()
            .supports(methods::DID_CLOSE, doc.language_id(), doc.path())
        {
            let params = protocol::did_close_params(doc.uri());
            self.client.send_notification(methods::DID_CLOSE, Some(params))?;
        }
        doc.set_server(None);
        if self
            .completion_cache
            .as_ref()
            .is_some_and(|c| c.uri() == doc.uri())
        {
            self.completion_cache = None;
        }
        self.flush();
        Ok(true)
    }

    /// Request completions at `position`, answering from the cache when the
    /// typing since the last response allows it.
    pub fn completion(
        &mut self,
        doc: &mut Document,
        text: &str,
        position: Position,
        line_prefix: &str,
    ) -> Result<RequestOutcome, ClientError> {
        if let Some(cache) = &self.completion_cache
            && cache.can_reuse(doc.uri(), position, line_prefix, &self.word_chars)
        {
            tracing::trace!(server = %self.name, "Completion answered from cache");
            return Ok(RequestOutcome::Cached(
                cache.refilter(line_prefix, &self.word_chars),
            ));
        }
        let params = protocol::position_params(doc.uri(), position);
        let context = RequestContext::new(doc.uri(), position, line_prefix);
        self.document_request(methods::COMPLETION, doc, text, params, context)
    }

    pub fn hover(
        &mut self,
        doc: &mut Document,
        text: &str,
        position: Position,
    ) -> Result<RequestOutcome, ClientError> {
        let params = protocol::position_params(doc.uri(), position);
        let context = RequestContext::new(doc.uri(), position, "");
        self.document_request(methods::HOVER, doc, text, params, context)
    }

    pub fn signature_help(
        &mut self,
        doc: &mut Document,
        text: &str,
        position: Position,
    ) -> Result<RequestOutcome, ClientError> {
        let params = protocol::position_params(doc.uri(), position);
        let context = RequestContext::new(doc.uri(), position, "");
        self.document_request(methods::SIGNATURE_HELP, doc, text, params, context)
    }

    pub fn goto(
        &mut self,
        kind: LocationKind,
        doc: &mut Document,
        text: &str,
        position: Position,
    ) -> Result<RequestOutcome, ClientError> {
        let params = if kind == LocationKind::References {
            protocol::references_params(doc.uri(), position)
        } else {
            protocol::position_params(doc.uri(), position)
        };
        let context = RequestContext::new(doc.uri(), position, "");
        self.document_request(kind.method(), doc, text, params, context)
    }

    pub fn document_symbols(
        &mut self,
        doc: &mut Document,
        text: &str,
    ) -> Result<RequestOutcome, ClientError> {
        let params = protocol::text_document_params(doc.uri());
        let context = RequestContext::new(doc.uri(), Position::default(), "");
        self.document_request(methods::DOCUMENT_SYMBOL, doc, text, params, context)
    }

    /// Format the whole document, or `range` of it.
    pub fn format(
        &mut self,
        doc: &mut Document,
        text: &str,
        options: FormattingOptions,
        range: Option<Range>,
    ) -> Result<RequestOutcome, ClientError> {
        let method = if range.is_some() {
            methods::RANGE_FORMATTING
        } else {
            methods::FORMATTING
        };
        let params = protocol::formatting_params(doc.uri(), options, range);
        let position = range.map(|r| r.start).unwrap_or_default();
        let context = RequestContext::new(doc.uri(), position, "");
        self.document_request(method, doc, text, params, context)
    }

    pub fn workspace_symbols(&mut self, query: &str) -> Result<RequestOutcome, ClientError> {
        let language_id = self.language_ids.first().map_or("", String::as_str);
        if !self
            .client
            .registry()
            .supports(methods::WORKSPACE_SYMBOL, language_id, None)
        {
            return Ok(RequestOutcome::Unsupported);
        }
        let id = self.client.send_request(
            methods::WORKSPACE_SYMBOL,
            Some(protocol::workspace_symbol_params(query)),
            None,
        )?;
        self.flush();
        Ok(RequestOutcome::Sent(id))
    }

    /// The edit for inserting `item` at `caret` on `line`.
    #[must_use]
    pub fn completion_edit(
        &self,
        item: &CompletionItem,
        line: &str,
        caret: Position,
    ) -> Option<CompletionEdit> {
        completion::apply_item(item, line, caret, &self.word_chars, self.add_call_parens)
    }

    /// The host started showing `uri`; hand over diagnostics held back while
    /// it was hidden.
    pub fn on_document_shown<H: Host + ?Sized>(&mut self, uri: &str, host: &mut H) {
        if let Some(pending) = self.diagnostics.on_document_shown(uri) {
            let lines = diagnostics::group_by_line(pending);
            host.diagnostics_changed(uri, &lines);
        }
    }

    /// Begin the shutdown handshake. Teardown follows in a later pump.
    pub fn shutdown(&mut self) -> Result<(), ClientError> {
        self.client.shutdown()?;
        self.flush();
        Ok(())
    }

    /// Send `exit` without a handshake and terminate the connection.
    pub fn kill(&mut self) {
        if self.torn_down {
            return;
        }
        self.client.exit();
        self.flush();
        self.transport.kill();
        self.schedule.stop();
        self.completion_cache = None;
        self.torn_down = true;
        tracing::info!(server = %self.name, "Language server killed");
    }

    fn document_request(
        &mut self,
        method: &'static str,
        doc: &mut Document,
        text: &str,
        params: Value,
        context: RequestContext,
    ) -> Result<RequestOutcome, ClientError> {
        if !self
            .client
            .registry()
            .supports(method, doc.language_id(), doc.path())
        {
            return Ok(RequestOutcome::Unsupported);
        }
        if doc.server() != Some(self.name.as_str()) && !self.did_open(doc)? {
            tracing::debug!(server = %self.name, uri = %doc.uri(), %method, "Document not open with server");
            return Ok(RequestOutcome::Unsupported);
        }
        self.did_change(doc, text)?;
        let id = self.client.send_request(method, Some(params), Some(context))?;
        self.flush();
        Ok(RequestOutcome::Sent(id))
    }

    fn handle_event<H: Host + ?Sized>(&mut self, event: ClientEvent<RequestContext>, host: &mut H) {
        match event {
            ClientEvent::Initialized { .. } => {
                tracing::info!(server = %self.name, "Language server initialized");
                self.capabilities_changed = true;
                host.server_initialized(&self.name);
            }
            ClientEvent::Response {
                id,
                method,
                result,
                context,
            } => self.handle_response(id, &method, result, context, host),
            ClientEvent::Error { id, method, error } => {
                tracing::warn!(server = %self.name, id, %method, "Request failed: {error}");
                host.request_failed(&self.name, &method, &error);
            }
            ClientEvent::Notification(note) => self.handle_notification(note, host),
            ClientEvent::CapabilitiesChanged => {
                self.capabilities_changed = true;
                tracing::debug!(
                    server = %self.name,
                    registrations = self.client.registry().registrations().len(),
                    "Capabilities changed"
                );
            }
            ClientEvent::Exited => {
                tracing::info!(server = %self.name, "Shutdown handshake complete");
            }
        }
    }

    fn handle_response<H: Host + ?Sized>(
        &mut self,
        id: i64,
        method: &str,
        result: Value,
        context: Option<RequestContext>,
        host: &mut H,
    ) {
        let Some(context) = context else {
            host.response(method, None, &result);
            return;
        };
        match method {
            methods::COMPLETION => {
                let list = protocol::completion_from_result(result);
                let cache = CompletionCache::new(
                    RequestId::from(id),
                    context.uri.clone(),
                    context.position,
                    context.line_prefix.clone(),
                    list,
                    &self.word_chars,
                );
                host.completion(&context, cache.filtered_items());
                self.completion_cache = Some(cache);
            }
            methods::HOVER => {
                if let Some(text) = protocol::hover_text(&result) {
                    host.hover(&context, &text);
                }
            }
            methods::SIGNATURE_HELP => {
                if let Some(label) = protocol::signature_label(&result) {
                    host.signature_help(&context, &label);
                }
            }
            methods::DEFINITION
            | methods::REFERENCES
            | methods::IMPLEMENTATION
            | methods::DECLARATION
            | methods::TYPE_DEFINITION => {
                host.locations(method, &context, &protocol::locations_from_result(&result));
            }
            methods::FORMATTING | methods::RANGE_FORMATTING => {
                let edits: Vec<TextEdit> = if result.is_null() {
                    Vec::new()
                } else {
                    serde_json::from_value(result).unwrap_or_else(|e| {
                        tracing::debug!(server = %self.name, "Failed to decode text edits: {e}");
                        Vec::new()
                    })
                };
                host.text_edits(&context, &edits);
            }
            _ => host.response(method, Some(&context), &result),
        }
    }

    fn handle_notification<H: Host + ?Sized>(&mut self, note: ServerNotification, host: &mut H) {
        match note {
            ServerNotification::PublishDiagnostics {
                uri, diagnostics, ..
            } => {
                let visible = host.is_document_visible(&uri);
                tracing::debug!(server = %self.name, %uri, count = diagnostics.len(), "Diagnostics published");
                if self.diagnostics.publish(&uri, diagnostics, visible) {
                    host.diagnostics_changed(&uri, &self.diagnostics.by_line(&uri));
                }
            }
            ServerNotification::LogMessage { kind, message } => {
                if self
                    .last_log
                    .as_ref()
                    .is_some_and(|(k, m)| *k == kind && *m == message)
                {
                    return;
                }
                tracing::debug!(server = %self.name, kind = kind.label(), "{message}");
                host.log_message(&self.name, kind, &message);
                self.last_log = Some((kind, message));
            }
            ServerNotification::ShowMessage { kind, message } => {
                host.show_message(&self.name, kind, &message);
            }
            ServerNotification::Progress { token, value } => {
                host.progress(&self.name, &token, &value);
            }
            ServerNotification::Unknown { method } => {
                tracing::trace!(server = %self.name, %method, "Ignoring notification");
            }
        }
    }

    /// Hand queued frames to the transport. Returns whether any were queued.
    fn flush(&mut self) -> bool {
        let frames = self.client.take_outbound();
        if frames.is_empty() {
            return false;
        }
        for frame in frames {
            if !self.transport.send(frame) {
                tracing::debug!(server = %self.name, "Dropping frame for stopped transport");
            }
        }
        if !self.torn_down {
            self.schedule.restart(Instant::now());
        }
        true
    }

    fn teardown<H: Host + ?Sized>(&mut self, host: &mut H) {
        self.flush();
        self.transport.close();
        self.schedule.stop();
        self.completion_cache = None;
        self.torn_down = true;
        match self.transport.try_wait() {
            Some(status) => tracing::info!(server = %self.name, %status, "Language server stopped"),
            None => tracing::info!(server = %self.name, "Language server stopped"),
        }
        host.server_exited(&self.name);
    }
}
