//! Routes what evaluated code prints to the session's client.

use std::io::Write;
use std::panic;

use wirb::io;
use wirb::kernel::{self, Kernel};
use wirb::{Result, Value};

use crate::error::SessionError;
use crate::output::Outbox;

type PrintFn = fn(&mut dyn Write, &[Value]) -> Result<Value>;

/// The `main` object of a session's evaluator.
///
/// Each print-like call runs under its own capture scope; whatever it wrote
/// is forwarded to the session, also when the call panics.
pub struct Workspace {
    outbox: Outbox,
}

impl Workspace {
    pub fn new(outbox: Outbox) -> Workspace {
        Workspace { outbox }
    }

    fn wrap(&mut self, print: PrintFn, args: &[Value]) -> Result<Value> {
        let (res, bytes) = io::capture(|| print(&mut io::stdout(), args));
        self.outbox.push(&bytes);
        match res {
            Ok(val) => val,
            Err(payload) => panic::resume_unwind(payload),
        }
    }
}

impl Kernel for Workspace {
    fn p(&mut self, args: &[Value]) -> Result<Value> {
        self.wrap(kernel::p_to, args)
    }

    fn pp(&mut self, args: &[Value]) -> Result<Value> {
        self.wrap(kernel::p_to, args)
    }

    fn print(&mut self, args: &[Value]) -> Result<Value> {
        self.wrap(kernel::print_to, args)
    }

    fn printf(&mut self, args: &[Value]) -> Result<Value> {
        self.wrap(kernel::printf_to, args)
    }

    fn putc(&mut self, args: &[Value]) -> Result<Value> {
        self.wrap(kernel::putc_to, args)
    }

    fn puts(&mut self, args: &[Value]) -> Result<Value> {
        self.wrap(kernel::puts_to, args)
    }

    fn to_s(&self) -> String {
        String::from("main")
    }

    fn inspect(&self) -> String {
        String::from("main:Object")
    }
}

/// Runs `action` with the default output channel pointed at `outbox`.
/// The previous target is back in place when this returns, panic or not.
pub fn captured<R>(outbox: &Outbox, action: impl FnOnce() -> R) -> std::result::Result<R, SessionError> {
    io::redirect(Box::new(outbox.clone()), action)
        .map_err(|payload| SessionError::Panicked(io::panic_message(&*payload)))
}
