//! Language server client core.
//!
//! Talks to out-of-process language servers over stdio or TCP: frames and
//! correlates JSON-RPC messages, tracks server capabilities, keeps documents
//! in sync and caches completion results. The host drives everything through
//! [`LspManager`] and receives results through the [`Host`] trait.

#![allow(clippy::missing_errors_doc)]

pub mod capabilities;
pub mod client;
pub mod codec;
pub mod completion;
pub mod config;
pub mod diagnostics;
pub mod document;
pub mod host;
pub mod protocol;
pub mod scheduler;
pub mod server;
pub mod sync;
pub mod transport;

mod manager;

pub use client::{Client, ClientError, ClientEvent, ClientOptions, ClientState};
pub use config::{CompletionConfig, ConfigError, LspConfig, ServerCommand, ServerConfig, ValidatedServer};
pub use document::{Document, DocumentStore};
pub use host::{Host, RequestContext};
pub use manager::{LspManager, SHUTDOWN_BUDGET, SHUTDOWN_POLL};
pub use server::{LanguageServer, LocationKind, RequestOutcome};
pub use transport::{Endpoint, Transport};
