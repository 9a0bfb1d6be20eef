//! Server settings, read from a TOML file.
//!
//! ```toml
//! bind = "127.0.0.1:2020"
//! prompt_mode = "simple"
//! rc_file = "/etc/wirbrc"
//! ```

use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use wirb::PromptMode;

use crate::error::ConfigError;
use crate::input::DEFAULT_CHUNK;
use crate::session::SessionOptions;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to listen on.
    pub bind: String,
    /// Most bytes taken from a connection per read.
    pub read_chunk: usize,
    pub prompt_mode: PromptMode,
    /// Name shown in prompts and error reports.
    pub irb_name: String,
    /// Script evaluated at the start of every session.
    pub rc_file: Option<PathBuf>,
    /// Used when `RUST_LOG` is not set.
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            bind: String::from("127.0.0.1:2020"),
            read_chunk: DEFAULT_CHUNK,
            prompt_mode: PromptMode::Default,
            irb_name: String::from("wirb"),
            rc_file: None,
            log_level: String::from("info"),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Config, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Config::parse(&text)
    }

    pub fn parse(text: &str) -> Result<Config, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            irb_name: self.irb_name.clone(),
            prompt_mode: self.prompt_mode,
            read_chunk: self.read_chunk,
        }
    }
}
