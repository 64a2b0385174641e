//! Protocol client state machine.
//!
//! [`Client`] performs no IO. Requests and notifications are serialized and
//! framed into an outbound buffer drained with [`Client::take_outbound`];
//! inbound frame bodies are fed to [`Client::recv`], which correlates
//! responses with pending requests, answers server-initiated requests, and
//! returns what the caller needs to act on.

use std::collections::HashMap;
use std::time::Instant;

use serde::Serialize;
use serde_json::Value;
use tether_types::RequestId;

use crate::capabilities::CapabilityRegistry;
use crate::codec::encode_frame;
use crate::protocol::{
    self, ConfigurationItem, Notification, Reply, Request, ResponseError, ServerMessage,
    ServerNotification, ServerRequest, error_codes, methods,
};

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Uninitialized,
    Initializing,
    Running,
    ShuttingDown,
    Exited,
}

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("cannot {action} while {state:?}")]
    InvalidState {
        action: &'static str,
        state: ClientState,
    },
    #[error("serializing {method}: {source}")]
    Serialize {
        method: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A sent request awaiting its response.
#[derive(Debug)]
pub struct PendingRequest<C> {
    pub id: i64,
    pub method: String,
    pub submitted_at: Instant,
    pub context: Option<C>,
}

/// What [`Client::recv`] reports to its caller.
#[derive(Debug)]
pub enum ClientEvent<C> {
    /// The initialize handshake completed and the client is running.
    Initialized { capabilities: Value },
    Response {
        id: i64,
        method: String,
        result: Value,
        context: Option<C>,
    },
    /// The server answered a request with an error; its context is dropped.
    Error {
        id: i64,
        method: String,
        error: ResponseError,
    },
    Notification(ServerNotification),
    /// The registration list changed.
    CapabilitiesChanged,
    /// Shutdown completed and `exit` was sent.
    Exited,
}

/// Static inputs of a client.
#[derive(Debug, Clone, Default)]
pub struct ClientOptions {
    /// Language ids used as the default document selector.
    pub language_ids: Vec<String>,
    pub root_uri: Option<String>,
    pub initialization_options: Option<Value>,
    /// Answers to `workspace/configuration`, looked up by dotted section.
    pub settings: Value,
}

pub struct Client<C> {
    options: ClientOptions,
    state: ClientState,
    next_id: i64,
    pending: HashMap<i64, PendingRequest<C>>,
    registry: CapabilityRegistry,
    capabilities: Value,
    deferred_shutdown: bool,
    outbound: Vec<Vec<u8>>,
}

impl<C> Client<C> {
    #[must_use]
    pub fn new(options: ClientOptions) -> Self {
        Self {
            options,
            state: ClientState::Uninitialized,
            next_id: 1,
            pending: HashMap::new(),
            registry: CapabilityRegistry::new(),
            capabilities: Value::Null,
            deferred_shutdown: false,
            outbound: Vec::new(),
        }
    }

    #[must_use]
    pub fn state(&self) -> ClientState {
        self.state
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == ClientState::Running
    }

    #[must_use]
    pub fn registry(&self) -> &CapabilityRegistry {
        &self.registry
    }

    /// The raw `capabilities` object from the initialize response.
    #[must_use]
    pub fn server_capabilities(&self) -> &Value {
        &self.capabilities
    }

    #[must_use]
    pub fn pending(&self, id: i64) -> Option<&PendingRequest<C>> {
        self.pending.get(&id)
    }

    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    #[must_use]
    pub fn shutdown_deferred(&self) -> bool {
        self.deferred_shutdown
    }

    /// Send `initialize` and move to `Initializing`.
    pub fn initialize(&mut self) -> Result<i64, ClientError> {
        self.expect_state(ClientState::Uninitialized, "initialize")?;
        let params = protocol::initialize_params(
            self.options.root_uri.as_deref(),
            self.options.initialization_options.as_ref(),
        );
        let id = self.enqueue_request(methods::INITIALIZE, Some(params), None)?;
        self.state = ClientState::Initializing;
        Ok(id)
    }

    /// Send a request and record it as pending. Only valid while running.
    pub fn send_request(
        &mut self,
        method: &str,
        params: Option<Value>,
        context: Option<C>,
    ) -> Result<i64, ClientError> {
        self.expect_state(ClientState::Running, "send a request")?;
        self.enqueue_request(method, params, context)
    }

    /// Send a notification. Only valid while running.
    pub fn send_notification(
        &mut self,
        method: &str,
        params: Option<Value>,
    ) -> Result<(), ClientError> {
        self.expect_state(ClientState::Running, "send a notification")?;
        self.enqueue(method, &Notification::new(method, params))
    }

    /// Begin the shutdown handshake.
    ///
    /// Before `Running` the request is deferred and replayed once the
    /// handshake completes. Repeated calls are no-ops.
    pub fn shutdown(&mut self) -> Result<(), ClientError> {
        match self.state {
            ClientState::Uninitialized | ClientState::Initializing => {
                tracing::debug!("Deferring shutdown until initialized");
                self.deferred_shutdown = true;
                Ok(())
            }
            ClientState::Running => {
                self.enqueue_request(methods::SHUTDOWN, None, None)?;
                self.state = ClientState::ShuttingDown;
                Ok(())
            }
            ClientState::ShuttingDown | ClientState::Exited => Ok(()),
        }
    }

    /// Send `exit` without waiting for a shutdown response and drop every
    /// pending request.
    pub fn exit(&mut self) {
        if self.state == ClientState::Exited {
            return;
        }
        if let Err(e) = self.enqueue(methods::EXIT, &Notification::new(methods::EXIT, None)) {
            tracing::warn!("Failed to queue exit: {e}");
        }
        self.enter_exited();
    }

    /// Drain the encoded frames queued since the last call.
    pub fn take_outbound(&mut self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.outbound)
    }

    #[must_use]
    pub fn has_outbound(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Process one inbound frame body.
    pub fn recv(&mut self, body: &[u8]) -> Vec<ClientEvent<C>> {
        let message = match protocol::decode_message(body) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!("Ignoring undecodable message: {e}");
                return Vec::new();
            }
        };

        let mut events = Vec::new();
        match message {
            ServerMessage::Response { id, outcome } => self.on_response(&id, outcome, &mut events),
            ServerMessage::Request { id, request } => self.on_server_request(&id, request, &mut events),
            ServerMessage::Notification(ServerNotification::Unknown { method }) => {
                tracing::trace!(%method, "Ignoring unknown notification");
            }
            ServerMessage::Notification(note) => events.push(ClientEvent::Notification(note)),
        }
        events
    }

    fn on_response(
        &mut self,
        id: &RequestId,
        outcome: Result<Value, ResponseError>,
        events: &mut Vec<ClientEvent<C>>,
    ) {
        let Some(pending) = id.as_number().and_then(|n| self.pending.remove(&n)) else {
            tracing::warn!(%id, "Dropping response with no matching request");
            return;
        };
        tracing::debug!(
            id = pending.id,
            method = %pending.method,
            elapsed_ms = u64::try_from(pending.submitted_at.elapsed().as_millis()).unwrap_or(u64::MAX),
            "Response received"
        );

        match pending.method.as_str() {
            methods::INITIALIZE => match outcome {
                Ok(result) => {
                    self.capabilities = result.get("capabilities").cloned().unwrap_or(Value::Null);
                    self.registry = CapabilityRegistry::from_initialize(
                        &self.capabilities,
                        &self.options.language_ids,
                    );
                    if let Err(e) = self.enqueue(
                        methods::INITIALIZED,
                        &Notification::new(methods::INITIALIZED, Some(serde_json::json!({}))),
                    ) {
                        tracing::warn!("Failed to queue initialized: {e}");
                    }
                    self.state = ClientState::Running;
                    events.push(ClientEvent::Initialized {
                        capabilities: self.capabilities.clone(),
                    });
                    if std::mem::take(&mut self.deferred_shutdown)
                        && let Err(e) = self.shutdown()
                    {
                        tracing::warn!("Deferred shutdown failed: {e}");
                    }
                }
                Err(error) => {
                    tracing::warn!("Initialize failed: {error}");
                    events.push(ClientEvent::Error {
                        id: pending.id,
                        method: pending.method,
                        error,
                    });
                    self.exit();
                    events.push(ClientEvent::Exited);
                }
            },
            methods::SHUTDOWN => {
                if let Err(error) = outcome {
                    tracing::warn!("Shutdown returned an error, exiting anyway: {error}");
                }
                self.exit();
                events.push(ClientEvent::Exited);
            }
            _ => events.push(match outcome {
                Ok(result) => ClientEvent::Response {
                    id: pending.id,
                    method: pending.method,
                    result,
                    context: pending.context,
                },
                Err(error) => ClientEvent::Error {
                    id: pending.id,
                    method: pending.method,
                    error,
                },
            }),
        }
    }

    fn on_server_request(
        &mut self,
        id: &RequestId,
        request: ServerRequest,
        events: &mut Vec<ClientEvent<C>>,
    ) {
        let outcome = match request {
            ServerRequest::RegisterCapability(registrations) => {
                self.registry.register(registrations);
                events.push(ClientEvent::CapabilitiesChanged);
                Ok(Value::Null)
            }
            ServerRequest::UnregisterCapability(unregistrations) => {
                let removed = self.registry.unregister(&unregistrations);
                tracing::debug!(removed, "Capabilities unregistered");
                events.push(ClientEvent::CapabilitiesChanged);
                Ok(Value::Null)
            }
            ServerRequest::Configuration(items) => Ok(Value::Array(
                items
                    .iter()
                    .map(|item| configuration_value(&self.options.settings, item))
                    .collect(),
            )),
            ServerRequest::WorkspaceFolders => Ok(self.options.root_uri.as_ref().map_or(
                Value::Null,
                |uri| serde_json::json!([{ "uri": uri, "name": "workspace" }]),
            )),
            ServerRequest::WorkDoneProgressCreate => Ok(Value::Null),
            ServerRequest::Malformed { method, reason } => {
                tracing::warn!(%method, "Malformed server request: {reason}");
                Err(ResponseError::new(
                    error_codes::INVALID_PARAMS,
                    format!("Invalid params for {method}: {reason}"),
                ))
            }
            ServerRequest::Unknown { method } => {
                tracing::debug!(%method, "Replying method not found");
                Err(ResponseError::new(
                    error_codes::METHOD_NOT_FOUND,
                    format!("Method not found: {method}"),
                ))
            }
        };

        if self.state == ClientState::Exited {
            return;
        }
        let reply = match outcome {
            Ok(result) => Reply::ok(id, result),
            Err(error) => Reply::err(id, error),
        };
        if let Err(e) = self.enqueue("reply", &reply) {
            tracing::warn!("Failed to queue reply: {e}");
        }
    }

    fn enqueue_request(
        &mut self,
        method: &str,
        params: Option<Value>,
        context: Option<C>,
    ) -> Result<i64, ClientError> {
        let id = self.next_id;
        self.enqueue(method, &Request::new(id, method, params))?;
        self.next_id += 1;
        self.pending.insert(
            id,
            PendingRequest {
                id,
                method: method.to_string(),
                submitted_at: Instant::now(),
                context,
            },
        );
        Ok(id)
    }

    fn enqueue<T: Serialize>(&mut self, method: &str, message: &T) -> Result<(), ClientError> {
        let body = serde_json::to_vec(message).map_err(|source| ClientError::Serialize {
            method: method.to_string(),
            source,
        })?;
        self.outbound.push(encode_frame(&body));
        Ok(())
    }

    fn expect_state(&self, want: ClientState, action: &'static str) -> Result<(), ClientError> {
        if self.state == want {
            Ok(())
        } else {
            Err(ClientError::InvalidState {
                action,
                state: self.state,
            })
        }
    }

    fn enter_exited(&mut self) {
        self.state = ClientState::Exited;
        self.deferred_shutdown = false;
        if !self.pending.is_empty() {
            tracing::debug!(count = self.pending.len(), "Discarding pending requests");
            self.pending.clear();
        }
    }
}

/// Value of a `workspace/configuration` item: the dotted `section` looked up
/// in `settings`, the whole settings object without a section, or `null`.
fn configuration_value(settings: &Value, item: &ConfigurationItem) -> Value {
    let Some(section) = item.section.as_deref().filter(|s| !s.is_empty()) else {
        return settings.clone();
    };
    section
        .split('.')
        .try_fold(settings, |value, key| value.get(key))
        .cloned()
        .unwrap_or(Value::Null)
}
