#[warn(clippy::pedantic)]
#[allow(clippy::missing_errors_doc)]
pub mod ast;
pub mod context;
pub mod env;
pub mod eval;
pub mod io;
pub mod kernel;
pub mod printer;
pub mod reader;
pub mod wirb;

pub use crate::context::{Context, OutputMethod, PromptMode};
pub use crate::eval::Evaluator;
pub use crate::wirb::*;
