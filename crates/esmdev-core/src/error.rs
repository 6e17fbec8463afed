use crate::plugin::PluginError;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Core error type for esmdev operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Failed to read config at {path}: {source}")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config at {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Plugin(#[from] PluginError),

    #[error("Cannot prebundle: {message}")]
    Prebundle {
        message: String,
        #[source]
        source: Option<Arc<Error>>,
    },

    #[error("Bundle for '{specifier}' was not generated in prebundling phase")]
    BundleMissing { specifier: String },

    #[error("External bundler failed: {0}")]
    Bundler(String),

    #[error("{what} timed out after {secs}s")]
    Timeout { what: &'static str, secs: u64 },

    #[error("{0}")]
    Other(String),
}

impl Error {
    #[must_use]
    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Wrap an error as a prebundle failure, keeping it as the source.
    #[must_use]
    pub fn prebundle(source: Error) -> Self {
        Self::prebundle_shared(Arc::new(source))
    }

    /// Like [`Error::prebundle`], for a failure observed by several callers.
    #[must_use]
    pub fn prebundle_shared(source: Arc<Error>) -> Self {
        Self::Prebundle {
            message: source.to_string(),
            source: Some(source),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prebundle_wraps_message() {
        let err = Error::prebundle(Error::Bundler("esbuild exited with 1".into()));
        assert_eq!(
            err.to_string(),
            "Cannot prebundle: External bundler failed: esbuild exited with 1"
        );
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_plugin_error_is_transparent() {
        let err: Error = PluginError::new("alias", "resolve", "bad alias").into();
        assert_eq!(err.to_string(), "[alias] resolve: bad alias");
    }
}
