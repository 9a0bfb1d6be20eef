use std::io::Write;

use crate::ast::{BinOp, FnDef, Node, Statement, UnOp};
use crate::env::{Callable, Env};
use crate::io;
use crate::kernel::{self, Kernel, KernelFn};
use crate::reader::{ReadState, Reader};
use crate::wirb::{arity_error, no_method_error, syntax_error, IoHandle, Result, Value, WirbErr};

/// Deepest chain of user method calls before `SystemStackError`.
pub const MAX_CALL_DEPTH: usize = 64;

/// Names that end the session instead of calling anything.
const EXIT_NAMES: [&str; 3] = ["exit", "quit", "irb_exit"];

pub struct Evaluator<E: Env> {
    env: E,
    main: Box<dyn Kernel>,
}

impl<E: Env> Evaluator<E> {
    pub fn new(env: E, main: Box<dyn Kernel>) -> Evaluator<E> {
        Evaluator { env, main }
    }

    pub fn main(&self) -> &dyn Kernel {
        self.main.as_ref()
    }

    /// Evaluates a statement and returns the value of its last expression.
    pub fn eval(&mut self, stmt: &Statement) -> Result<Value> {
        self.eval_body(&stmt.nodes)
    }

    /// Reads and evaluates a whole program, line by line.
    pub fn eval_str(&mut self, src: &str) -> Result<Value> {
        let mut reader = Reader::new();
        let mut last = Value::Nil;

        for (n, line) in src.split_inclusive('\n').enumerate() {
            if let Some(stmt) = reader.push_line(line, n + 1)? {
                last = self.eval(&stmt)?;
            }
        }

        if reader.state() != ReadState::Start {
            return Err(syntax_error("unexpected end-of-input"));
        }
        Ok(last)
    }

    fn eval_body(&mut self, nodes: &[Node]) -> Result<Value> {
        let mut last = Value::Nil;
        for node in nodes {
            last = self.eval_node(node)?;
        }
        Ok(last)
    }

    fn eval_args(&mut self, args: &[Node]) -> Result<Vec<Value>> {
        args.iter().map(|arg| self.eval_node(arg)).collect()
    }

    fn eval_node(&mut self, node: &Node) -> Result<Value> {
        match node {
            Node::Lit(val) => Ok(val.clone()),
            Node::Ident(name) => match self.env.get(name) {
                Some(val) => Ok(val),
                None => self.call_fn(name, &[], true),
            },
            Node::Global(name) => Ok(self.env.get_global(name).unwrap_or_default()),
            Node::Array(items) => self.eval_args(items).map(Value::new_list),
            Node::Assign(name, value) => {
                let val = self.eval_node(value)?;
                self.env.set(name, val.clone());
                Ok(val)
            }
            Node::GlobalAssign(name, value) => {
                let val = self.eval_node(value)?;
                self.env.set_global(name, val.clone());
                Ok(val)
            }
            Node::Unary(UnOp::Not, operand) => Ok(Value::Bool(!self.eval_node(operand)?.is_truthy())),
            Node::Unary(UnOp::Neg, operand) => match self.eval_node(operand)? {
                Value::Int(i) => i
                    .checked_neg()
                    .map(Value::Int)
                    .ok_or_else(|| WirbErr::Range("integer overflow".to_string())),
                Value::Float(f) => Ok(Value::Float(-f)),
                other => Err(no_method_error("-@", &other)),
            },
            Node::Binary(BinOp::And, lhs, rhs) => {
                let left = self.eval_node(lhs)?;
                if left.is_truthy() {
                    self.eval_node(rhs)
                } else {
                    Ok(left)
                }
            }
            Node::Binary(BinOp::Or, lhs, rhs) => {
                let left = self.eval_node(lhs)?;
                if left.is_truthy() {
                    Ok(left)
                } else {
                    self.eval_node(rhs)
                }
            }
            Node::Binary(op, lhs, rhs) => {
                let left = self.eval_node(lhs)?;
                let right = self.eval_node(rhs)?;
                binary(*op, &left, &right)
            }
            Node::Call { recv: None, name, args } => {
                let args = self.eval_args(args)?;
                self.call_fn(name, &args, false)
            }
            Node::Call {
                recv: Some(recv),
                name,
                args,
            } => {
                let recv = self.eval_node(recv)?;
                let args = self.eval_args(args)?;
                self.call_method(&recv, name, &args)
            }
            Node::Index(target, index) => {
                let target = self.eval_node(target)?;
                let index = self.eval_node(index)?;
                index_into(&target, &index)
            }
            Node::If {
                cond,
                then_branch,
                else_branch,
            } => {
                if self.eval_node(cond)?.is_truthy() {
                    self.eval_body(then_branch)
                } else {
                    self.eval_body(else_branch)
                }
            }
            Node::While { cond, body } => {
                while self.eval_node(cond)?.is_truthy() {
                    self.eval_body(body)?;
                }
                Ok(Value::Nil)
            }
            Node::Def(def) => {
                self.env.def_fn(def.clone());
                Ok(Value::Sym(def.name.as_str().into()))
            }
            Node::Seq(nodes) => self.eval_body(nodes),
        }
    }

    /// Calls a method on `main`. `bare` is set when the name appeared
    /// without arguments or parentheses and could have been a variable.
    fn call_fn(&mut self, name: &str, args: &[Value], bare: bool) -> Result<Value> {
        if EXIT_NAMES.contains(&name) {
            return Err(WirbErr::Exit);
        }
        if let Some(f) = KernelFn::from_name(name) {
            return f.call(self.main.as_mut(), args);
        }

        match self.env.get_fn(name) {
            Some(Callable::User(def)) => self.call_user(&def, args),
            Some(Callable::Native(f)) => (f.func)(args),
            None if bare => Err(WirbErr::Name(format!(
                "undefined local variable or method '{}' for {}",
                name,
                self.main.inspect()
            ))),
            None => Err(WirbErr::NoMethod(format!(
                "undefined method '{}' for {}",
                name,
                self.main.inspect()
            ))),
        }
    }

    fn call_user(&mut self, def: &FnDef, args: &[Value]) -> Result<Value> {
        if args.len() != def.params.len() {
            return Err(arity_error(args.len(), &def.params.len().to_string()));
        }
        if self.env.depth() >= MAX_CALL_DEPTH {
            return Err(WirbErr::StackTooDeep);
        }

        self.env.push();
        for (param, arg) in def.params.iter().zip(args) {
            self.env.set(param, arg.clone());
        }
        let res = self.eval_body(&def.body);
        self.env.pop();
        res
    }

    fn call_method(&mut self, recv: &Value, name: &str, args: &[Value]) -> Result<Value> {
        if let Value::Io(IoHandle::Stdout) = recv {
            if let Some(res) = stdout_method(recv, name, args) {
                return res;
            }
        }

        match (name, args) {
            ("to_s", []) => Ok(Value::str(&recv.to_s())),
            ("inspect", []) => Ok(Value::str(&recv.inspect())),
            ("nil?", []) => Ok(Value::Bool(matches!(recv, Value::Nil))),
            ("eql?", [other]) => Ok(Value::Bool(recv.equals(other))),
            _ => match self.env.get_method(recv.kind(), name) {
                Some(method) => {
                    let mut full = Vec::with_capacity(args.len() + 1);
                    full.push(recv.clone());
                    full.extend_from_slice(args);
                    (method.func)(&full)
                }
                None => Err(no_method_error(name, recv)),
            },
        }
    }
}

// Methods of `$stdout`. They go through the default output channel, so
// whatever redirection is active also receives them.
fn stdout_method(recv: &Value, name: &str, args: &[Value]) -> Option<Result<Value>> {
    let mut out = io::stdout();
    let res = match name {
        "puts" => kernel::puts_to(&mut out, args),
        "print" => kernel::print_to(&mut out, args),
        "printf" => kernel::printf_to(&mut out, args),
        "putc" => kernel::putc_to(&mut out, args),
        "p" => kernel::p_to(&mut out, args),
        "write" => {
            let mut written = 0;
            for arg in args {
                let s = arg.to_s();
                written += s.len();
                let _ = out.write_all(s.as_bytes());
            }
            Ok(Value::Int(written as i64))
        }
        "flush" => {
            let _ = out.flush();
            Ok(recv.clone())
        }
        "sync" => Ok(Value::Bool(true)),
        _ => return None,
    };
    Some(res)
}

fn binary(op: BinOp, left: &Value, right: &Value) -> Result<Value> {
    match op {
        BinOp::Add => left + right,
        BinOp::Sub => left - right,
        BinOp::Mul => left * right,
        BinOp::Div => left / right,
        BinOp::Rem => left % right,
        BinOp::Pow => left.pow(right),
        BinOp::Eq => Ok(Value::Bool(left.equals(right))),
        BinOp::NotEq => Ok(Value::Bool(!left.equals(right))),
        BinOp::Lt => Ok(Value::Bool(left.compare(right)?.is_lt())),
        BinOp::LtEq => Ok(Value::Bool(left.compare(right)?.is_le())),
        BinOp::Gt => Ok(Value::Bool(left.compare(right)?.is_gt())),
        BinOp::GtEq => Ok(Value::Bool(left.compare(right)?.is_ge())),
        // Short-circuiting operators never reach here.
        BinOp::And | BinOp::Or => Ok(Value::Nil),
    }
}

fn position(len: usize, index: i64) -> Option<usize> {
    if index < 0 {
        len.checked_sub(index.unsigned_abs() as usize)
    } else {
        let index = index as usize;
        (index < len).then_some(index)
    }
}

fn index_into(target: &Value, index: &Value) -> Result<Value> {
    match (target, index) {
        (Value::Array(list), Value::Int(i)) => {
            Ok(position(list.len(), *i).map_or(Value::Nil, |at| list[at].clone()))
        }
        (Value::Str(s), Value::Int(i)) => {
            let chars: Vec<char> = s.chars().collect();
            Ok(position(chars.len(), *i).map_or(Value::Nil, |at| Value::str(&chars[at].to_string())))
        }
        (Value::Array(_) | Value::Str(_), other) => Err(WirbErr::Type(format!(
            "no implicit conversion of {} into Integer",
            other.kind().name()
        ))),
        (other, _) => Err(no_method_error("[]", other)),
    }
}
