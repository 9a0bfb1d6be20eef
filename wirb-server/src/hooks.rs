use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;
use wirb::env::SandboxEnv;
use wirb::{Context, Evaluator};

use crate::error::HookError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionInfo {
    pub id: u64,
    pub peer: Option<SocketAddr>,
}

/// What a [`SessionHooks::configure`] call may adjust.
pub struct SessionSetup<'a> {
    pub info: &'a SessionInfo,
    pub evaluator: &'a mut Evaluator<SandboxEnv>,
    pub context: &'a mut Context,
}

/// Callbacks around the life of sessions.
pub trait SessionHooks: Send + Sync + 'static {
    /// Called once when a session starts, before its first prompt. Output it
    /// produces goes to the new client. An error aborts that session only.
    fn configure(&self, _setup: &mut SessionSetup<'_>) -> Result<(), HookError> {
        Ok(())
    }

    /// Called exactly once per session, however it ended.
    fn session_ended(&self, _info: &SessionInfo) {}

    /// Called once when the server shuts down.
    fn at_exit(&self) {}
}

pub struct NoHooks;

impl SessionHooks for NoHooks {}

/// Evaluates an init script at the start of every session.
#[derive(Debug, Default)]
pub struct RcHooks {
    rc: Option<(PathBuf, String)>,
}

impl RcHooks {
    pub fn new(path: &Path, source: String) -> RcHooks {
        RcHooks {
            rc: Some((path.to_path_buf(), source)),
        }
    }

    /// Reads the script once, up front.
    pub fn load(path: Option<&Path>) -> io::Result<RcHooks> {
        match path {
            Some(path) => Ok(RcHooks::new(path, fs::read_to_string(path)?)),
            None => Ok(RcHooks::default()),
        }
    }
}

impl SessionHooks for RcHooks {
    fn configure(&self, setup: &mut SessionSetup<'_>) -> Result<(), HookError> {
        if let Some((path, source)) = &self.rc {
            debug!(rc = %path.display(), "running init script");
            setup
                .evaluator
                .eval_str(source)
                .map_err(|err| format!("{}: {} ({})", path.display(), err, err.class_name()))?;
        }
        Ok(())
    }
}

/// The most recently started session. Last write wins.
#[derive(Debug, Clone, Default)]
pub struct CurrentSession(Arc<Mutex<Option<SessionInfo>>>);

impl CurrentSession {
    pub fn set(&self, info: SessionInfo) {
        *self.0.lock() = Some(info);
    }

    pub fn get(&self) -> Option<SessionInfo> {
        self.0.lock().clone()
    }
}

/// Fires [`SessionHooks::session_ended`] when dropped.
pub(crate) struct EndGuard {
    pub hooks: Arc<dyn SessionHooks>,
    pub info: SessionInfo,
}

impl Drop for EndGuard {
    fn drop(&mut self) {
        self.hooks.session_ended(&self.info);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use wirb::kernel::Main;
    use wirb::Value;

    use super::*;

    #[derive(Default)]
    struct Counting(AtomicUsize);

    impl SessionHooks for Counting {
        fn session_ended(&self, _info: &SessionInfo) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn info(id: u64) -> SessionInfo {
        SessionInfo { id, peer: None }
    }

    #[test]
    fn end_guard_fires_once() {
        let hooks = Arc::new(Counting::default());
        {
            let _guard = EndGuard {
                hooks: hooks.clone(),
                info: info(1),
            };
        }
        assert_eq!(hooks.0.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn current_session_is_last_write_wins() {
        let current = CurrentSession::default();
        assert_eq!(current.get(), None);
        current.set(info(1));
        current.clone().set(info(2));
        assert_eq!(current.get().map(|s| s.id), Some(2));
    }

    #[test]
    fn rc_script_runs_in_the_session_evaluator() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "greeting = \"hi\"\ndef twice(x) x * 2 end").unwrap();
        let hooks = RcHooks::load(Some(file.path())).unwrap();

        let mut evaluator = Evaluator::new(SandboxEnv::default(), Box::new(Main));
        let mut context = Context::default();
        let info = info(7);
        hooks
            .configure(&mut SessionSetup {
                info: &info,
                evaluator: &mut evaluator,
                context: &mut context,
            })
            .unwrap();
        assert_eq!(evaluator.eval_str("twice(21)").unwrap(), Value::Int(42));
        assert_eq!(evaluator.eval_str("greeting").unwrap(), Value::str("hi"));
    }

    #[test]
    fn failing_rc_script_is_a_hook_error() {
        let hooks = RcHooks::new(Path::new("bad.rb"), "1 / 0".to_string());
        let mut evaluator = Evaluator::new(SandboxEnv::default(), Box::new(Main));
        let mut context = Context::default();
        let info = info(1);
        let err = hooks
            .configure(&mut SessionSetup {
                info: &info,
                evaluator: &mut evaluator,
                context: &mut context,
            })
            .unwrap_err();
        assert_eq!(err.to_string(), "bad.rb: divided by 0 (ZeroDivisionError)");
    }

    #[test]
    fn missing_rc_file_is_reported() {
        assert!(RcHooks::load(Some(Path::new("/nonexistent/wirbrc"))).is_err());
        assert!(RcHooks::load(None).unwrap().rc.is_none());
    }
}
