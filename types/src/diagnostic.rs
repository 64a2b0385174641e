use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::position::Range;

/// Severity level for a diagnostic.
///
/// Serialized as the protocol's numeric code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from LSP numeric severity (1=Error, 2=Warning, 3=Info, 4=Hint).
    ///
    /// Returns `None` for values outside the LSP-defined range.
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }

    /// One-letter tag used in gutter messages.
    #[must_use]
    pub fn short_name(self) -> &'static str {
        match self {
            Self::Error => "E",
            Self::Warning => "W",
            Self::Information => "I",
            Self::Hint => "H",
        }
    }
}

impl Serialize for DiagnosticSeverity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(*self as u64)
    }
}

impl<'de> Deserialize<'de> for DiagnosticSeverity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u64::deserialize(deserializer)?;
        Self::from_lsp(value)
            .ok_or_else(|| de::Error::custom(format!("unknown diagnostic severity: {value}")))
    }
}

/// A diagnostic code, which servers send as either a number or a string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DiagnosticCode {
    Number(i64),
    String(String),
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => f.write_str(s),
        }
    }
}

/// A single diagnostic published by a language server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diagnostic {
    pub range: Range,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<DiagnosticSeverity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<DiagnosticCode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub message: String,
}

impl Diagnostic {
    /// 0-indexed line the diagnostic is anchored to.
    #[must_use]
    pub fn line(&self) -> u32 {
        self.range.start.line
    }

    /// Format as `[severity:code]: message`.
    ///
    /// The bracketed prefix is omitted when neither severity nor code is set,
    /// and the colon separator only appears when both are.
    #[must_use]
    pub fn gutter_text(&self) -> String {
        let severity = self.severity.map(DiagnosticSeverity::short_name);
        let code = self.code.as_ref().map(ToString::to_string);
        let mut out = String::new();
        if severity.is_some() || code.is_some() {
            out.push('[');
            out.push_str(severity.unwrap_or(""));
            if severity.is_some() && code.is_some() {
                out.push(':');
            }
            out.push_str(code.as_deref().unwrap_or(""));
            out.push_str("]: ");
        }
        out.push_str(&self.message);
        out
    }
}
