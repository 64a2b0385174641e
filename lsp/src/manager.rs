//! `LspManager` facade: the host's single entry point.
//!
//! Routes documents to servers by language id, owns the uri → document map,
//! turns unsupported methods and client errors into status messages, and
//! drives the global exit path.

use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::{Duration, Instant};

use tether_types::{FormattingOptions, Position, Range};

use crate::client::ClientError;
use crate::config::{CompletionConfig, LspConfig};
use crate::document::{Document, DocumentStore};
use crate::host::{Host, RequestContext};
use crate::protocol::methods;
use crate::server::{LanguageServer, LocationKind, RequestOutcome};

/// Wall-clock budget for every server to finish the shutdown handshake.
pub const SHUTDOWN_BUDGET: Duration = Duration::from_secs(2);

/// Pump interval while waiting for servers to exit.
pub const SHUTDOWN_POLL: Duration = Duration::from_millis(100);

/// Build language id → server name map. The first server by name wins.
fn build_language_routes<'a>(
    servers: impl IntoIterator<Item = (&'a String, &'a [String])>,
) -> HashMap<String, String> {
    let mut routes: HashMap<String, String> = HashMap::new();
    for (name, language_ids) in servers {
        for id in language_ids {
            if let Some(existing) = routes.get(id) {
                tracing::warn!(
                    "Multiple language servers configured for '{id}': '{existing}' and '{name}'. Using '{existing}'."
                );
                continue;
            }
            routes.insert(id.clone(), name.clone());
        }
    }
    routes
}

pub struct LspManager {
    servers: BTreeMap<String, LanguageServer>,
    routes: HashMap<String, String>,
    documents: DocumentStore,
    completion: CompletionConfig,
}

impl LspManager {
    /// Validate and start every configured server.
    ///
    /// Servers that fail validation or startup are logged and skipped.
    pub async fn start(config: &LspConfig) -> Self {
        let mut servers = Vec::new();
        for (name, server_config) in &config.servers {
            let validated = match server_config.validate(name) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!("Invalid configuration for language server '{name}': {e}");
                    continue;
                }
            };
            tracing::info!("Starting language server '{name}'...");
            match LanguageServer::start(&validated, &config.completion).await {
                Ok(server) => servers.push(server),
                Err(e) => tracing::warn!("Failed to start language server '{name}': {e:#}"),
            }
        }
        Self::from_servers(servers, config.completion.clone())
    }

    /// Manage already connected servers.
    #[must_use]
    pub fn from_servers(servers: Vec<LanguageServer>, completion: CompletionConfig) -> Self {
        let servers: BTreeMap<String, LanguageServer> = servers
            .into_iter()
            .map(|s| (s.name().to_string(), s))
            .collect();
        let routes = build_language_routes(
            servers
                .iter()
                .map(|(name, s)| (name, s.language_ids())),
        );
        Self {
            servers,
            routes,
            documents: DocumentStore::new(),
            completion,
        }
    }

    #[must_use]
    pub fn server(&self, name: &str) -> Option<&LanguageServer> {
        self.servers.get(name)
    }

    /// Whether at least one server is still connected.
    #[must_use]
    pub fn has_running_servers(&self) -> bool {
        !self.servers.is_empty()
    }

    #[must_use]
    pub fn documents(&self) -> &DocumentStore {
        &self.documents
    }

    #[must_use]
    pub fn completion_config(&self) -> &CompletionConfig {
        &self.completion
    }

    /// Pump every server and drop those that have exited.
    pub fn pump<H: Host + ?Sized>(&mut self, host: &mut H) -> usize {
        let handled: usize = self.servers.values_mut().map(|s| s.pump(host)).sum();
        self.reap(host);
        self.open_pending(host);
        handled
    }

    /// Pump only the servers whose poll schedule is due at `now`.
    pub fn pump_due<H: Host + ?Sized>(&mut self, now: Instant, host: &mut H) -> usize {
        let handled: usize = self
            .servers
            .values_mut()
            .filter(|s| s.is_due(now))
            .map(|s| s.pump(host))
            .sum();
        self.reap(host);
        self.open_pending(host);
        handled
    }

    /// Earliest instant any server wants to be pumped.
    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        self.servers
            .values()
            .filter_map(|s| s.schedule().next_due())
            .min()
    }

    /// Start tracking a document and open it with its server.
    ///
    /// Returns `true` if `didOpen` was sent.
    pub fn open_document<H: Host + ?Sized>(
        &mut self,
        uri: &str,
        path: Option<PathBuf>,
        language_id: &str,
        text: &str,
        host: &mut H,
    ) -> bool {
        let doc = self
            .documents
            .insert(Document::new(uri, path, language_id, text));
        let Some(name) = self.routes.get(doc.language_id()) else {
            return false;
        };
        let Some(server) = self.servers.get_mut(name) else {
            return false;
        };
        report(server.did_open(doc), name, host).unwrap_or(false)
    }

    pub fn change_document<H: Host + ?Sized>(&mut self, uri: &str, text: &str, host: &mut H) {
        self.with_open_document(uri, host, |server, doc| server.did_change(doc, text));
    }

    pub fn save_document<H: Host + ?Sized>(&mut self, uri: &str, text: &str, host: &mut H) {
        self.with_open_document(uri, host, |server, doc| server.did_save(doc, text));
    }

    /// Close a document and stop tracking it.
    pub fn close_document<H: Host + ?Sized>(&mut self, uri: &str, text: &str, host: &mut H) {
        self.with_open_document(uri, host, |server, doc| server.did_close(doc, text));
        self.documents.remove(uri);
    }

    /// The host started showing `uri`.
    pub fn on_document_shown<H: Host + ?Sized>(&mut self, uri: &str, host: &mut H) {
        for server in self.servers.values_mut() {
            server.on_document_shown(uri, host);
        }
    }

    pub fn completion<H: Host + ?Sized>(
        &mut self,
        uri: &str,
        text: &str,
        position: Position,
        line_prefix: &str,
        host: &mut H,
    ) -> Option<RequestOutcome> {
        let outcome = self.request(uri, methods::COMPLETION, host, |server, doc| {
            server.completion(doc, text, position, line_prefix)
        })?;
        if let (RequestOutcome::Cached(items), Some(doc)) = (&outcome, self.documents.get(uri)) {
            let context = RequestContext::new(doc.uri(), position, line_prefix);
            host.completion(&context, items);
        }
        Some(outcome)
    }

    pub fn hover<H: Host + ?Sized>(
        &mut self,
        uri: &str,
        text: &str,
        position: Position,
        host: &mut H,
    ) -> Option<RequestOutcome> {
        self.request(uri, methods::HOVER, host, |server, doc| {
            server.hover(doc, text, position)
        })
    }

    pub fn signature_help<H: Host + ?Sized>(
        &mut self,
        uri: &str,
        text: &str,
        position: Position,
        host: &mut H,
    ) -> Option<RequestOutcome> {
        self.request(uri, methods::SIGNATURE_HELP, host, |server, doc| {
            server.signature_help(doc, text, position)
        })
    }

    pub fn goto<H: Host + ?Sized>(
        &mut self,
        kind: LocationKind,
        uri: &str,
        text: &str,
        position: Position,
        host: &mut H,
    ) -> Option<RequestOutcome> {
        self.request(uri, kind.method(), host, |server, doc| {
            server.goto(kind, doc, text, position)
        })
    }

    pub fn document_symbols<H: Host + ?Sized>(
        &mut self,
        uri: &str,
        text: &str,
        host: &mut H,
    ) -> Option<RequestOutcome> {
        self.request(uri, methods::DOCUMENT_SYMBOL, host, |server, doc| {
            server.document_symbols(doc, text)
        })
    }

    pub fn format<H: Host + ?Sized>(
        &mut self,
        uri: &str,
        text: &str,
        options: FormattingOptions,
        range: Option<Range>,
        host: &mut H,
    ) -> Option<RequestOutcome> {
        let method = if range.is_some() {
            methods::RANGE_FORMATTING
        } else {
            methods::FORMATTING
        };
        self.request(uri, method, host, |server, doc| {
            server.format(doc, text, options, range)
        })
    }

    /// Query `workspace/symbol` on the server routed for `language_id`.
    pub fn workspace_symbols<H: Host + ?Sized>(
        &mut self,
        language_id: &str,
        query: &str,
        host: &mut H,
    ) -> Option<RequestOutcome> {
        let name = self.routes.get(language_id)?;
        let server = self.servers.get_mut(name)?;
        let outcome = report(server.workspace_symbols(query), name, host)?;
        if outcome == RequestOutcome::Unsupported {
            host.status(&format!(
                "Method is not supported by server: {}",
                methods::WORKSPACE_SYMBOL
            ));
        }
        Some(outcome)
    }

    /// Begin shutting down one server.
    ///
    /// Its languages stop routing right away and its documents are detached.
    /// The server itself is dropped by a later pump once it exits. Returns
    /// `false` if no server has that name.
    pub fn shutdown_server<H: Host + ?Sized>(&mut self, name: &str, host: &mut H) -> bool {
        let Some(server) = self.servers.get_mut(name) else {
            return false;
        };
        tracing::info!("Shutting down language server '{name}'...");
        report(server.shutdown(), name, host);
        self.routes.retain(|_, routed| routed != name);
        self.detach_documents(name);
        true
    }

    /// Send shutdown to every server, pump until all have exited or
    /// [`SHUTDOWN_BUDGET`] passes, then kill the rest.
    pub async fn shutdown_all<H: Host + ?Sized>(&mut self, host: &mut H) {
        for (name, server) in &mut self.servers {
            tracing::info!("Shutting down language server '{name}'...");
            if let Err(e) = server.shutdown() {
                tracing::warn!("Shutdown of '{name}' failed: {e}");
            }
        }

        let deadline = Instant::now() + SHUTDOWN_BUDGET;
        loop {
            self.pump(host);
            if self.servers.is_empty() || Instant::now() >= deadline {
                break;
            }
            tokio::time::sleep(SHUTDOWN_POLL).await;
        }

        for (name, mut server) in std::mem::take(&mut self.servers) {
            tracing::warn!("Language server '{name}' did not exit in time, killing");
            server.kill();
            self.forget_server(&name, &server, host);
        }
    }

    fn request<H, F>(&mut self, uri: &str, method: &str, host: &mut H, f: F) -> Option<RequestOutcome>
    where
        H: Host + ?Sized,
        F: FnOnce(&mut LanguageServer, &mut Document) -> Result<RequestOutcome, ClientError>,
    {
        let doc = self.documents.get_mut(uri)?;
        let name = match doc.server() {
            Some(name) => name.to_string(),
            None => self.routes.get(doc.language_id())?.clone(),
        };
        let server = self.servers.get_mut(&name)?;
        let outcome = report(f(server, doc), &name, host)?;
        if outcome == RequestOutcome::Unsupported {
            host.status(&format!("Method is not supported by server: {method}"));
        }
        Some(outcome)
    }

    fn with_open_document<H, F>(&mut self, uri: &str, host: &mut H, f: F)
    where
        H: Host + ?Sized,
        F: FnOnce(&mut LanguageServer, &mut Document) -> Result<bool, ClientError>,
    {
        let Some(doc) = self.documents.get_mut(uri) else {
            return;
        };
        let Some(name) = doc.server().map(str::to_string) else {
            return;
        };
        if let Some(server) = self.servers.get_mut(&name) {
            report(f(server, doc), &name, host);
        }
    }

    /// Offer unopened documents to servers whose capabilities just changed.
    fn open_pending<H: Host + ?Sized>(&mut self, host: &mut H) {
        for (name, server) in &mut self.servers {
            if !server.take_capabilities_changed() {
                continue;
            }
            let pending: Vec<String> = self
                .documents
                .iter()
                .filter(|doc| {
                    !doc.is_open() && self.routes.get(doc.language_id()) == Some(name)
                })
                .map(|doc| doc.uri().to_string())
                .collect();
            for uri in pending {
                if let Some(doc) = self.documents.get_mut(&uri)
                    && report(server.did_open(doc), name, host) == Some(true)
                {
                    tracing::debug!(server = %name, %uri, "Opened document deferred until capabilities arrived");
                }
            }
        }
    }

    fn reap<H: Host + ?Sized>(&mut self, host: &mut H) {
        let exited: Vec<String> = self
            .servers
            .iter()
            .filter(|(_, s)| s.is_exited())
            .map(|(name, _)| name.clone())
            .collect();
        for name in exited {
            if let Some(server) = self.servers.remove(&name) {
                self.forget_server(&name, &server, host);
            }
        }
    }

    /// Detach documents from a removed server and clear its diagnostics.
    fn forget_server<H: Host + ?Sized>(&mut self, name: &str, server: &LanguageServer, host: &mut H) {
        self.detach_documents(name);
        for uri in server.diagnostics().uris() {
            host.diagnostics_changed(uri, &[]);
        }
        tracing::info!(server = %name, "Language server removed");
    }

    fn detach_documents(&mut self, name: &str) {
        for uri in self.documents.opened_with(name) {
            if let Some(doc) = self.documents.get_mut(&uri) {
                doc.set_server(None);
            }
        }
    }
}

/// Turn a client error into a status message.
fn report<T, H: Host + ?Sized>(result: Result<T, ClientError>, server: &str, host: &mut H) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::warn!(%server, "Language server request failed: {e}");
            host.status(&format!("{server}: {e}"));
            None
        }
    }
}
