use std::path::PathBuf;

use thiserror::Error;

/// Whatever a session hook fails with.
pub type HookError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session setup failed: {0}")]
    Hook(#[source] HookError),
    #[error("evaluation panicked: {0}")]
    Panicked(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid configuration: {0}")]
    Parse(#[from] toml::de::Error),
}
