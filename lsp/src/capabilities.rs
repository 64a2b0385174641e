//! Capability registry.
//!
//! Static capabilities from the initialize response and dynamic
//! `client/registerCapability` grants are normalized into one ordered list of
//! [`Registration`]s, queried with [`CapabilityRegistry::method_options`].

use std::path::Path;

use globset::{GlobBuilder, GlobMatcher};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::protocol::methods;

/// Provider flags in `ServerCapabilities` and the method each one enables.
const PROVIDERS: [(&str, &str); 12] = [
    (methods::COMPLETION, "completionProvider"),
    (methods::HOVER, "hoverProvider"),
    (methods::SIGNATURE_HELP, "signatureHelpProvider"),
    (methods::DEFINITION, "definitionProvider"),
    (methods::REFERENCES, "referencesProvider"),
    (methods::IMPLEMENTATION, "implementationProvider"),
    (methods::DECLARATION, "declarationProvider"),
    (methods::TYPE_DEFINITION, "typeDefinitionProvider"),
    (methods::DOCUMENT_SYMBOL, "documentSymbolProvider"),
    (methods::FORMATTING, "documentFormattingProvider"),
    (methods::RANGE_FORMATTING, "documentRangeFormattingProvider"),
    (methods::WORKSPACE_SYMBOL, "workspaceSymbolProvider"),
];

/// Id given to registrations synthesized from the initialize response.
pub const STATIC_REGISTRATION_ID: &str = "0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistrationSource {
    Initialize,
    Dynamic,
}

/// One entry of a document selector.
#[derive(Debug, Clone)]
pub struct DocumentFilter {
    language: Option<String>,
    pattern: Option<String>,
    matcher: Option<GlobMatcher>,
}

impl DocumentFilter {
    #[must_use]
    pub fn new(language: Option<String>, pattern: Option<String>) -> Self {
        let matcher = pattern.as_deref().and_then(|p| {
            GlobBuilder::new(p)
                .literal_separator(true)
                .build()
                .map(|glob| glob.compile_matcher())
                .inspect_err(|e| tracing::warn!(pattern = p, "Ignoring invalid selector glob: {e}"))
                .ok()
        });
        Self {
            language,
            pattern,
            matcher,
        }
    }

    #[must_use]
    pub fn language(&self) -> Option<&str> {
        self.language.as_deref()
    }

    #[must_use]
    pub fn pattern(&self) -> Option<&str> {
        self.pattern.as_deref()
    }

    /// Every present field must hold; a filter with neither field never
    /// matches. `scheme` is not consulted.
    #[must_use]
    pub fn matches(&self, language_id: &str, path: Option<&Path>) -> bool {
        if self.language.is_none() && self.pattern.is_none() {
            return false;
        }
        if let Some(language) = &self.language
            && language != language_id
        {
            return false;
        }
        if self.pattern.is_some() {
            let Some(matcher) = &self.matcher else {
                return false;
            };
            if !matcher.is_match(path.unwrap_or_else(|| Path::new(""))) {
                return false;
            }
        }
        true
    }

    fn from_value(value: &Value) -> Self {
        let field = |name: &str| value.get(name).and_then(Value::as_str).map(str::to_string);
        Self::new(field("language"), field("pattern"))
    }
}

/// A capability grant.
#[derive(Debug, Clone)]
pub struct Registration {
    pub id: String,
    pub method: String,
    pub selector: Vec<DocumentFilter>,
    pub options: Value,
    pub source: RegistrationSource,
}

impl Registration {
    fn new(id: String, method: String, options: Value, source: RegistrationSource) -> Self {
        let selector = options
            .get("documentSelector")
            .and_then(Value::as_array)
            .map(|filters| filters.iter().map(DocumentFilter::from_value).collect())
            .unwrap_or_default();
        Self {
            id,
            method,
            selector,
            options,
            source,
        }
    }

    /// Whether this registration covers a document.
    ///
    /// An empty selector only covers workspace-scoped methods.
    #[must_use]
    pub fn matches(&self, language_id: &str, path: Option<&Path>) -> bool {
        if self.selector.is_empty() {
            return self.method.starts_with("workspace/");
        }
        self.selector.iter().any(|f| f.matches(language_id, path))
    }
}

/// Wire shape of one `client/registerCapability` entry.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationRequest {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub register_options: Option<Value>,
}

/// Wire shape of one `client/unregisterCapability` entry.
#[derive(Debug, Clone, Deserialize)]
pub struct UnregistrationRequest {
    pub id: String,
    pub method: String,
}

#[derive(Debug, Clone, Default)]
pub struct CapabilityRegistry {
    registrations: Vec<Registration>,
}

impl CapabilityRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Synthesize registrations from an initialize response's
    /// `capabilities` object.
    ///
    /// Each registration's selector defaults to one `{language}` filter per
    /// configured language id; object-valued provider flags are merged into
    /// its options.
    #[must_use]
    pub fn from_initialize(capabilities: &Value, language_ids: &[String]) -> Self {
        let default_selector: Vec<Value> = language_ids
            .iter()
            .map(|id| serde_json::json!({ "language": id }))
            .collect();
        let base = || {
            let mut opts = Map::new();
            opts.insert(
                "documentSelector".to_string(),
                Value::Array(default_selector.clone()),
            );
            opts
        };

        let mut registry = Self::new();
        let mut push = |method: &str, opts: Map<String, Value>| {
            registry.registrations.push(Registration::new(
                STATIC_REGISTRATION_ID.to_string(),
                method.to_string(),
                Value::Object(opts),
                RegistrationSource::Initialize,
            ));
        };

        let sync = normalize_text_document_sync(capabilities.get("textDocumentSync"));
        if sync.get("openClose").is_some_and(is_enabled) {
            push(methods::DID_OPEN, base());
            push(methods::DID_CLOSE, base());
        }
        if let Some(save) = sync.get("save").filter(|v| is_enabled(v)) {
            let mut opts = base();
            merge_object(&mut opts, save);
            push(methods::DID_SAVE, opts);
        }
        if let Some(change) = sync.get("change") {
            let mut opts = base();
            opts.insert(
                "syncKind".to_string(),
                Value::from(change.as_u64().unwrap_or(0)),
            );
            push(methods::DID_CHANGE, opts);
        }

        for (method, provider) in PROVIDERS {
            let Some(value) = capabilities.get(provider).filter(|v| is_enabled(v)) else {
                continue;
            };
            let mut opts = if method.starts_with("workspace/") {
                Map::new()
            } else {
                base()
            };
            merge_object(&mut opts, value);
            push(method, opts);
        }

        registry
    }

    /// Append dynamic registrations.
    pub fn register(&mut self, requests: Vec<RegistrationRequest>) {
        for req in requests {
            tracing::debug!(id = %req.id, method = %req.method, "Capability registered");
            let options = match req.register_options {
                Some(Value::Null) | None => Value::Object(Map::new()),
                Some(v) => v,
            };
            self.registrations.push(Registration::new(
                req.id,
                req.method,
                options,
                RegistrationSource::Dynamic,
            ));
        }
    }

    /// Remove dynamic registrations matching `id` and `method`.
    ///
    /// Registrations from the initialize response are never removed.
    /// Returns the number removed.
    pub fn unregister(&mut self, requests: &[UnregistrationRequest]) -> usize {
        let before = self.registrations.len();
        self.registrations.retain(|r| {
            r.source == RegistrationSource::Initialize
                || !requests
                    .iter()
                    .any(|req| req.id == r.id && req.method == r.method)
        });
        before - self.registrations.len()
    }

    /// Options of the first registration for `method` that covers the
    /// document, or `None` if the method is not available for it.
    #[must_use]
    pub fn method_options(
        &self,
        method: &str,
        language_id: &str,
        path: Option<&Path>,
    ) -> Option<&Value> {
        let found = self
            .registrations
            .iter()
            .filter(|r| r.method == method)
            .find(|r| r.matches(language_id, path))
            .map(|r| &r.options);
        if found.is_none() && method != methods::DID_OPEN {
            tracing::debug!(%method, %language_id, "Method not supported for document");
        }
        found
    }

    #[must_use]
    pub fn supports(&self, method: &str, language_id: &str, path: Option<&Path>) -> bool {
        self.method_options(method, language_id, path).is_some()
    }

    #[must_use]
    pub fn registrations(&self) -> &[Registration] {
        &self.registrations
    }
}

/// `textDocumentSync` may be a bare sync kind; the object form is canonical.
fn normalize_text_document_sync(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Number(kind)) => {
            let mut map = Map::new();
            map.insert("openClose".to_string(), Value::Bool(true));
            map.insert("change".to_string(), Value::Number(kind.clone()));
            map
        }
        _ => Map::new(),
    }
}

fn is_enabled(value: &Value) -> bool {
    !matches!(value, Value::Bool(false) | Value::Null)
}

fn merge_object(into: &mut Map<String, Value>, value: &Value) {
    if let Value::Object(extra) = value {
        for (k, v) in extra {
            into.insert(k.clone(), v.clone());
        }
    }
}
