//! Loading `~/.tether/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};

use tether_lsp::LspConfig;

#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[must_use]
pub fn config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".tether").join("config.toml"))
}

/// Load the default config file. A missing file is not an error.
pub fn load() -> Result<Option<LspConfig>, LoadError> {
    match config_path() {
        Some(path) if path.exists() => load_from(&path).map(Some),
        _ => Ok(None),
    }
}

pub fn load_from(path: &Path) -> Result<LspConfig, LoadError> {
    let content = fs::read_to_string(path).map_err(|source| {
        tracing::warn!("Failed to read config at {}: {source}", path.display());
        LoadError::Read {
            path: path.to_path_buf(),
            source,
        }
    })?;
    toml::from_str(&content).map_err(|source| {
        tracing::warn!("Failed to parse config at {}: {source}", path.display());
        LoadError::Parse {
            path: path.to_path_buf(),
            source,
        }
    })
}
