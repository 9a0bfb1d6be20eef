//! The print-like calls of the top-level object.
//!
//! Evaluated code reaches them through the `main` object the evaluator is
//! built with. The default implementations write to the default output
//! channel ([`crate::io::stdout`]); an embedder overrides them to wrap each
//! call (see the server's `Workspace`).

use std::io::Write;
use std::iter::Peekable;
use std::str::Chars;

use crate::io;
use crate::wirb::{arity_error, too_big, Result, Value, WirbErr, MAX_STR_LEN};

pub trait Kernel: Send {
    fn p(&mut self, args: &[Value]) -> Result<Value> {
        p_to(&mut io::stdout(), args)
    }

    fn pp(&mut self, args: &[Value]) -> Result<Value> {
        p_to(&mut io::stdout(), args)
    }

    fn print(&mut self, args: &[Value]) -> Result<Value> {
        print_to(&mut io::stdout(), args)
    }

    fn printf(&mut self, args: &[Value]) -> Result<Value> {
        printf_to(&mut io::stdout(), args)
    }

    fn putc(&mut self, args: &[Value]) -> Result<Value> {
        putc_to(&mut io::stdout(), args)
    }

    fn puts(&mut self, args: &[Value]) -> Result<Value> {
        puts_to(&mut io::stdout(), args)
    }

    /// Name shown in the prompt.
    fn to_s(&self) -> String {
        String::from("main")
    }

    fn inspect(&self) -> String {
        String::from("main")
    }
}

/// A `main` object that keeps every default.
#[derive(Default)]
pub struct Main;

impl Kernel for Main {}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum KernelFn {
    P,
    Pp,
    Print,
    Printf,
    Putc,
    Puts,
}

impl KernelFn {
    pub const ALL: [KernelFn; 6] = [
        KernelFn::P,
        KernelFn::Pp,
        KernelFn::Print,
        KernelFn::Printf,
        KernelFn::Putc,
        KernelFn::Puts,
    ];

    pub fn name(self) -> &'static str {
        match self {
            KernelFn::P => "p",
            KernelFn::Pp => "pp",
            KernelFn::Print => "print",
            KernelFn::Printf => "printf",
            KernelFn::Putc => "putc",
            KernelFn::Puts => "puts",
        }
    }

    pub fn from_name(name: &str) -> Option<KernelFn> {
        KernelFn::ALL.into_iter().find(|f| f.name() == name)
    }

    pub fn call(self, main: &mut dyn Kernel, args: &[Value]) -> Result<Value> {
        match self {
            KernelFn::P => main.p(args),
            KernelFn::Pp => main.pp(args),
            KernelFn::Print => main.print(args),
            KernelFn::Printf => main.printf(args),
            KernelFn::Putc => main.putc(args),
            KernelFn::Puts => main.puts(args),
        }
    }
}

// A reader that went away is not the evaluated code's problem.
fn emit(out: &mut dyn Write, bytes: &[u8]) {
    let _ = out.write_all(bytes);
}

// Writes at most about `budget` bytes, so a huge array cannot flood the output.
fn puts_value(out: &mut dyn Write, val: &Value, budget: &mut usize) {
    if *budget == 0 {
        return;
    }
    match val {
        Value::Array(list) if list.is_empty() => emit(out, b"\n"),
        Value::Array(list) => list.iter().for_each(|v| puts_value(out, v, budget)),
        v => {
            let mut s = v.to_s();
            if !s.ends_with('\n') {
                s.push('\n');
            }
            *budget = budget.saturating_sub(s.len());
            emit(out, s.as_bytes());
        }
    }
}

pub fn puts_to(out: &mut dyn Write, args: &[Value]) -> Result<Value> {
    if args.is_empty() {
        emit(out, b"\n");
    }
    let mut budget = MAX_STR_LEN;
    for arg in args {
        puts_value(out, arg, &mut budget);
    }
    Ok(Value::Nil)
}

pub fn print_to(out: &mut dyn Write, args: &[Value]) -> Result<Value> {
    for arg in args {
        emit(out, arg.to_s().as_bytes());
    }
    Ok(Value::Nil)
}

pub fn p_to(out: &mut dyn Write, args: &[Value]) -> Result<Value> {
    for arg in args {
        emit(out, arg.inspect().as_bytes());
        emit(out, b"\n");
    }
    Ok(match args {
        [] => Value::Nil,
        [one] => one.clone(),
        many => Value::new_list(many.to_vec()),
    })
}

pub fn putc_to(out: &mut dyn Write, args: &[Value]) -> Result<Value> {
    match args {
        [Value::Int(i)] => emit(out, &[(*i & 0xff) as u8]),
        [Value::Str(s)] => {
            if let Some(ch) = s.chars().next() {
                let mut buf = [0; 4];
                emit(out, ch.encode_utf8(&mut buf).as_bytes());
            }
        }
        [other] => {
            return Err(WirbErr::Type(format!(
                "no implicit conversion of {} into Integer",
                other.kind().name()
            )))
        }
        _ => return Err(arity_error(args.len(), "1")),
    }
    Ok(args[0].clone())
}

pub fn printf_to(out: &mut dyn Write, args: &[Value]) -> Result<Value> {
    match args.split_first() {
        None => Ok(Value::Nil),
        Some((Value::Str(fmt), rest)) => {
            emit(out, format(fmt, rest)?.as_bytes());
            Ok(Value::Nil)
        }
        Some((other, _)) => Err(WirbErr::Type(format!(
            "no implicit conversion of {} into String",
            other.kind().name()
        ))),
    }
}

#[derive(Default)]
struct Spec {
    left: bool,
    zero: bool,
    plus: bool,
    width: usize,
    precision: Option<usize>,
}

impl Spec {
    fn pad(&self, body: String, numeric: bool) -> String {
        let len = body.chars().count();
        if len >= self.width {
            return body;
        }
        let fill = self.width - len;
        if self.left {
            format!("{}{}", body, " ".repeat(fill))
        } else if self.zero && numeric {
            let (sign, digits) = match body.strip_prefix(['-', '+']) {
                Some(digits) => (&body[..1], digits),
                None => ("", body.as_str()),
            };
            format!("{}{}{}", sign, "0".repeat(fill), digits)
        } else {
            format!("{}{}", " ".repeat(fill), body)
        }
    }

    fn signed(&self, body: String) -> String {
        if self.plus && !body.starts_with('-') {
            format!("+{}", body)
        } else {
            body
        }
    }
}

fn to_int(val: &Value) -> Result<i64> {
    match val {
        Value::Int(i) => Ok(*i),
        Value::Float(f) if f.is_finite() => Ok(f.floor() as i64),
        Value::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| WirbErr::Argument(format!("invalid value for Integer(): {}", val.inspect()))),
        other => Err(WirbErr::Type(format!(
            "can't convert {} into Integer",
            other.kind().name()
        ))),
    }
}

fn to_float(val: &Value) -> Result<f64> {
    match val {
        Value::Str(s) => s
            .trim()
            .parse()
            .map_err(|_| WirbErr::Argument(format!("invalid value for Float(): {}", val.inspect()))),
        other => other.as_f64().ok_or_else(|| {
            WirbErr::Type(format!("can't convert {} into Float", other.kind().name()))
        }),
    }
}

/// `format` / `printf` directives: `%s %p %d %i %f %x %o %b %%` with the
/// `- 0 +` flags, a width and a precision.
pub fn format(fmt: &str, args: &[Value]) -> Result<String> {
    let mut out = String::with_capacity(fmt.len());
    let mut args = args.iter();
    let mut chars = fmt.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }

        let mut spec = Spec::default();
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => spec.left = true,
                '0' => spec.zero = true,
                '+' => spec.plus = true,
                _ => break,
            }
            chars.next();
        }
        spec.width = read_count(&mut chars)?;
        if chars.peek() == Some(&'.') {
            chars.next();
            spec.precision = Some(read_count(&mut chars)?);
        }

        let conv = chars
            .next()
            .ok_or_else(|| WirbErr::Argument("incomplete format specifier".to_string()))?;
        if conv == '%' {
            out.push('%');
            continue;
        }

        let arg = args
            .next()
            .ok_or_else(|| WirbErr::Argument("too few arguments".to_string()))?;

        let piece = match conv {
            's' | 'p' => {
                let mut s = if conv == 's' { arg.to_s() } else { arg.inspect() };
                if let Some(p) = spec.precision {
                    s = s.chars().take(p).collect();
                }
                spec.pad(s, false)
            }
            'd' | 'i' => spec.pad(spec.signed(to_int(arg)?.to_string()), true),
            'f' => {
                let body = format!("{:.*}", spec.precision.unwrap_or(6), to_float(arg)?);
                spec.pad(spec.signed(body), true)
            }
            'x' => spec.pad(format!("{:x}", to_int(arg)?), true),
            'o' => spec.pad(format!("{:o}", to_int(arg)?), true),
            'b' => spec.pad(format!("{:b}", to_int(arg)?), true),
            other => {
                return Err(WirbErr::Argument(format!(
                    "malformed format string - %{}",
                    other
                )))
            }
        };
        if out.len() + piece.len() > MAX_STR_LEN {
            return Err(too_big());
        }
        out.push_str(&piece);
    }

    Ok(out)
}

// A width or precision. Anything past the string ceiling could never be built.
fn read_count(chars: &mut Peekable<Chars>) -> Result<usize> {
    let mut n: usize = 0;
    while let Some(d) = chars.peek().and_then(|c| c.to_digit(10)) {
        n = n
            .checked_mul(10)
            .and_then(|n| n.checked_add(d as usize))
            .filter(|&n| n <= MAX_STR_LEN)
            .ok_or_else(too_big)?;
        chars.next();
    }
    Ok(n)
}
