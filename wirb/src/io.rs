//! The default output channel and its redirection scopes.
//!
//! Code under evaluation writes through [`stdout()`]. Outside any scope that
//! goes to the process stdout; inside [`capture`] or [`redirect`] it goes to
//! the innermost scope's target. Scopes form a stack: leaving one (normally or
//! by panic) restores the target that was active when it was entered.
//!
//! The stack is thread-local. A scope wraps a synchronous call and can never
//! be held across an await point, so two tasks sharing a worker thread cannot
//! interleave inside each other's scopes.

use std::cell::RefCell;
use std::io::{self, Write};
use std::panic::{self, AssertUnwindSafe};
use std::thread;

enum Target {
    Buffer(Vec<u8>),
    Sink(Box<dyn Write>),
}

thread_local! {
    static TARGETS: RefCell<Vec<Target>> = const { RefCell::new(Vec::new()) };
}

/// Handle on the default output channel.
pub struct Stdout;

pub fn stdout() -> Stdout {
    Stdout
}

impl Write for Stdout {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let redirected = TARGETS.with(|targets| match targets.borrow_mut().last_mut() {
            Some(Target::Buffer(bytes)) => Some(bytes.write(buf)),
            Some(Target::Sink(sink)) => Some(sink.write(buf)),
            None => None,
        });
        match redirected {
            Some(res) => res,
            None => io::stdout().write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        let redirected = TARGETS.with(|targets| match targets.borrow_mut().last_mut() {
            Some(Target::Buffer(_)) => Some(Ok(())),
            Some(Target::Sink(sink)) => Some(sink.flush()),
            None => None,
        });
        redirected.unwrap_or_else(|| io::stdout().flush())
    }
}

/// Returns true while some capture or redirect scope is active on this thread.
pub fn is_redirected() -> bool {
    TARGETS.with(|targets| !targets.borrow().is_empty())
}

// Pops exactly the scope it pushed, even when the action unwinds.
struct ScopeGuard {
    depth: usize,
}

impl ScopeGuard {
    fn enter(target: Target) -> Self {
        let depth = TARGETS.with(|targets| {
            let mut targets = targets.borrow_mut();
            targets.push(target);
            targets.len()
        });
        ScopeGuard { depth }
    }

    fn leave(self) -> Option<Target> {
        let target = pop_to(self.depth);
        std::mem::forget(self);
        target
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        pop_to(self.depth);
    }
}

fn pop_to(depth: usize) -> Option<Target> {
    TARGETS.with(|targets| {
        let mut targets = targets.borrow_mut();
        // Scopes an action leaked without leaving are dropped with it.
        targets.truncate(depth);
        if targets.len() == depth {
            targets.pop()
        } else {
            None
        }
    })
}

/// Runs `action` with the default output redirected into a private buffer.
/// Returns the action's outcome (panics are caught) and the captured bytes.
pub fn capture<R>(action: impl FnOnce() -> R) -> (thread::Result<R>, Vec<u8>) {
    let guard = ScopeGuard::enter(Target::Buffer(Vec::new()));
    let res = panic::catch_unwind(AssertUnwindSafe(action));
    let bytes = match guard.leave() {
        Some(Target::Buffer(bytes)) => bytes,
        _ => Vec::new(),
    };
    (res, bytes)
}

/// Runs `action` with the default output written straight into `sink`.
pub fn redirect<R>(sink: Box<dyn Write>, action: impl FnOnce() -> R) -> thread::Result<R> {
    let guard = ScopeGuard::enter(Target::Sink(sink));
    let res = panic::catch_unwind(AssertUnwindSafe(action));
    if let Some(Target::Sink(mut sink)) = guard.leave() {
        let _ = sink.flush();
    }
    res
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Shared(Arc<Mutex<Vec<u8>>>);

    impl Write for Shared {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn capture_collects_writes() {
        let (res, bytes) = capture(|| {
            write!(stdout(), "hello").unwrap();
            42
        });
        assert_eq!(res.unwrap(), 42);
        assert_eq!(bytes, b"hello");
        assert!(!is_redirected());
    }

    #[test]
    fn nested_capture_restores_prior_target() {
        let (_, outer) = capture(|| {
            write!(stdout(), "a").unwrap();
            let (_, inner) = capture(|| write!(stdout(), "b").unwrap());
            assert_eq!(inner, b"b");
            write!(stdout(), "c").unwrap();
        });
        assert_eq!(outer, b"ac");
    }

    #[test]
    fn capture_restores_after_panic() {
        let (_, outer) = capture(|| {
            let (res, inner) = capture(|| {
                write!(stdout(), "partial").unwrap();
                panic!("boom");
            });
            assert_eq!(panic_message(&*res.unwrap_err()), "boom");
            assert_eq!(inner, b"partial");
            write!(stdout(), "after").unwrap();
        });
        assert_eq!(outer, b"after");
        assert!(!is_redirected());
    }

    #[test]
    fn redirect_writes_into_sink() {
        let sink = Shared::default();
        let res = redirect(Box::new(sink.clone()), || {
            write!(stdout(), "x").unwrap();
            let (_, inner) = capture(|| write!(stdout(), "y").unwrap());
            assert_eq!(inner, b"y");
            write!(stdout(), "z").unwrap();
        });
        assert!(res.is_ok());
        assert_eq!(*sink.0.lock().unwrap(), b"xz");
    }
}
