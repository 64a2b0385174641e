//! Server configuration and its validation.
//!
//! [`ServerConfig::validate`] runs before any connection attempt and turns a
//! deserialized entry into a [`ValidatedServer`] ready to start.

use std::collections::BTreeMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use serde_json::Value;

use crate::client::ClientOptions;
use crate::codec::MissingLengthPolicy;
use crate::completion::{DEFAULT_NONWORD_CHARS, WordChars};
use crate::protocol;
use crate::transport::Endpoint;

const DEFAULT_TCP_HOST: &str = "127.0.0.1";

/// Configuration for the client subsystem.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LspConfig {
    /// Server configurations keyed by name.
    pub servers: BTreeMap<String, ServerConfig>,
    pub completion: CompletionConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompletionConfig {
    /// Characters ending a word, besides space and tab.
    pub nonword_chars: String,
    /// Append `()` when inserting a function or method item.
    pub add_call_parens: bool,
}

impl Default for CompletionConfig {
    fn default() -> Self {
        Self {
            nonword_chars: DEFAULT_NONWORD_CHARS.to_string(),
            add_call_parens: true,
        }
    }
}

impl CompletionConfig {
    #[must_use]
    pub fn word_chars(&self) -> WordChars {
        WordChars::new(self.nonword_chars.clone())
    }
}

/// Start command, either one argv for every platform or one per OS family.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ServerCommand {
    Argv(Vec<String>),
    PerOs {
        #[serde(default)]
        windows: Option<Vec<String>>,
        #[serde(default)]
        macos: Option<Vec<String>>,
        #[serde(default)]
        unix: Option<Vec<String>>,
    },
}

impl ServerCommand {
    /// The argv for `os` (a `std::env::consts::OS` value). macOS falls back
    /// to the `unix` entry.
    #[must_use]
    pub fn for_os(&self, os: &str) -> Option<&[String]> {
        let argv = match self {
            Self::Argv(argv) => Some(argv),
            Self::PerOs {
                windows,
                macos,
                unix,
            } => match os {
                "windows" => windows.as_ref(),
                "macos" => macos.as_ref().or(unix.as_ref()),
                _ => unix.as_ref(),
            },
        };
        argv.map(Vec::as_slice).filter(|a| !a.is_empty())
    }
}

/// Configuration for a single language server.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Language ids routed to this server (e.g. `["python"]`).
    pub language_ids: Vec<String>,
    #[serde(default)]
    pub command: Option<ServerCommand>,
    /// Connect over TCP instead of spawning `command`.
    #[serde(default)]
    pub tcp_port: Option<u16>,
    #[serde(default)]
    pub tcp_host: Option<String>,
    /// Working directory of the server and the workspace root.
    #[serde(default)]
    pub work_dir: Option<PathBuf>,
    /// Paths appended to path-list environment variables (e.g. `PYTHONPATH`).
    #[serde(default)]
    pub env_paths: BTreeMap<String, Vec<PathBuf>>,
    #[serde(default)]
    pub log_stderr: bool,
    /// Accept frames without `Content-Length`. Only for servers known to
    /// omit it.
    #[serde(default)]
    pub lenient_content_length: bool,
    /// Answers to `workspace/configuration`.
    #[serde(default)]
    pub settings: Value,
    #[serde(default)]
    pub initialization_options: Option<Value>,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("no start command for {os}")]
    MissingCommand { os: String },
    #[error("language_ids is empty")]
    EmptyLanguageIds,
    #[error("invalid env_paths entry for {var}: {reason}")]
    InvalidEnvPath { var: String, reason: String },
    #[error("env_paths has an empty variable name")]
    EmptyEnvVarName,
}

/// A server entry that passed validation.
#[derive(Debug, Clone)]
pub struct ValidatedServer {
    pub name: String,
    pub connect: Endpoint,
    pub missing_length: MissingLengthPolicy,
    pub client: ClientOptions,
}

impl ServerConfig {
    /// Validate for the running platform.
    pub fn validate(&self, name: &str) -> Result<ValidatedServer, ConfigError> {
        self.validate_for(name, std::env::consts::OS, |var| std::env::var_os(var))
    }

    /// Validate for `os`, reading existing path-list variables through
    /// `current_env`.
    pub fn validate_for(
        &self,
        name: &str,
        os: &str,
        current_env: impl Fn(&str) -> Option<OsString>,
    ) -> Result<ValidatedServer, ConfigError> {
        if self.language_ids.is_empty() {
            return Err(ConfigError::EmptyLanguageIds);
        }

        let work_dir = self.work_dir.as_deref().map(expand_home_path);
        let connect = if let Some(port) = self.tcp_port {
            Endpoint::Socket {
                host: self
                    .tcp_host
                    .clone()
                    .unwrap_or_else(|| DEFAULT_TCP_HOST.to_string()),
                port,
            }
        } else {
            let argv = self
                .command
                .as_ref()
                .and_then(|c| c.for_os(os))
                .ok_or_else(|| ConfigError::MissingCommand { os: os.to_string() })?;
            let mut argv = argv.iter().map(|a| expand_home(a));
            let program = argv
                .next()
                .map(PathBuf::from)
                .ok_or_else(|| ConfigError::MissingCommand { os: os.to_string() })?;
            Endpoint::Process {
                program,
                args: argv.collect(),
                cwd: work_dir.clone(),
                env: self.merged_env(&current_env)?,
                capture_stderr: self.log_stderr,
            }
        };

        let root_uri = work_dir
            .as_deref()
            .and_then(|dir| protocol::path_to_file_uri(dir).ok())
            .map(String::from);

        Ok(ValidatedServer {
            name: name.to_string(),
            connect,
            missing_length: if self.lenient_content_length {
                MissingLengthPolicy::ReadAvailable
            } else {
                MissingLengthPolicy::Reject
            },
            client: ClientOptions {
                language_ids: self.language_ids.clone(),
                root_uri,
                initialization_options: self.initialization_options.clone(),
                settings: self.settings.clone(),
            },
        })
    }

    fn merged_env(
        &self,
        current_env: &impl Fn(&str) -> Option<OsString>,
    ) -> Result<Vec<(String, OsString)>, ConfigError> {
        let mut env = Vec::with_capacity(self.env_paths.len());
        for (var, extra) in &self.env_paths {
            if var.is_empty() {
                return Err(ConfigError::EmptyEnvVarName);
            }
            let mut paths: Vec<PathBuf> = current_env(var)
                .map(|existing| std::env::split_paths(&existing).collect())
                .unwrap_or_default();
            paths.extend(extra.iter().map(|p| PathBuf::from(expand_home(&p.to_string_lossy()))));
            let joined =
                std::env::join_paths(paths).map_err(|e| ConfigError::InvalidEnvPath {
                    var: var.clone(),
                    reason: e.to_string(),
                })?;
            env.push((var.clone(), joined));
        }
        Ok(env)
    }
}

fn expand_home(arg: &str) -> String {
    match arg.strip_prefix("~/") {
        Some(rest) => dirs::home_dir().map_or_else(
            || arg.to_string(),
            |home| home.join(rest).to_string_lossy().into_owned(),
        ),
        None => arg.to_string(),
    }
}

fn expand_home_path(path: &Path) -> PathBuf {
    PathBuf::from(expand_home(&path.to_string_lossy()))
}
