//! A TCP server giving every connection its own wirb REPL.

pub mod capture;
pub mod config;
pub mod error;
pub mod hooks;
pub mod input;
pub mod line_buffer;
pub mod output;
pub mod server;
pub mod session;

pub use crate::config::Config;
pub use crate::error::{ConfigError, HookError, SessionError};
pub use crate::hooks::{CurrentSession, NoHooks, RcHooks, SessionHooks, SessionInfo, SessionSetup};
pub use crate::server::Server;
pub use crate::session::{Session, SessionOptions};
