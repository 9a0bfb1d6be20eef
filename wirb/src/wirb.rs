use std::cmp::Ordering;
use std::sync::Arc;

pub use smartstring::alias::String as SmartString;
use thiserror::Error;

pub type WirbList = Arc<Vec<Value>>;

/// Longest string, in bytes, that evaluation may build.
pub const MAX_STR_LEN: usize = 1 << 24;

/// Longest array evaluation may build.
pub const MAX_LIST_LEN: usize = 1 << 20;
pub type Result<T> = std::result::Result<T, WirbErr>;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum IoHandle {
    Stdout,
}

#[derive(Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(SmartString),
    Sym(SmartString),
    Array(WirbList),
    Io(IoHandle),
}

/// The class of a value, used to look up native methods.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Kind {
    Nil,
    True,
    False,
    Integer,
    Float,
    String,
    Symbol,
    Array,
    Io,
}

impl Kind {
    pub fn name(self) -> &'static str {
        match self {
            Kind::Nil => "NilClass",
            Kind::True => "TrueClass",
            Kind::False => "FalseClass",
            Kind::Integer => "Integer",
            Kind::Float => "Float",
            Kind::String => "String",
            Kind::Symbol => "Symbol",
            Kind::Array => "Array",
            Kind::Io => "IO",
        }
    }
}

impl Value {
    pub fn str(s: &str) -> Value {
        Value::Str(SmartString::from(s))
    }

    pub fn new_list(list: Vec<Value>) -> Value {
        Value::Array(Arc::new(list))
    }

    #[inline(always)]
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    pub fn kind(&self) -> Kind {
        match self {
            Value::Nil => Kind::Nil,
            Value::Bool(true) => Kind::True,
            Value::Bool(false) => Kind::False,
            Value::Int(_) => Kind::Integer,
            Value::Float(_) => Kind::Float,
            Value::Str(_) => Kind::String,
            Value::Sym(_) => Kind::Symbol,
            Value::Array(_) => Kind::Array,
            Value::Io(_) => Kind::Io,
        }
    }

    /// Ruby `==`: numbers compare across Integer and Float.
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => *a as f64 == *b,
            (Value::Array(a), Value::Array(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (a, b) => a == b,
        }
    }

    pub fn compare(&self, other: &Value) -> Result<Ordering> {
        let ord = match (self, other) {
            (Value::Int(a), Value::Int(b)) => Some(a.cmp(b)),
            (Value::Int(a), Value::Float(b)) => (*a as f64).partial_cmp(b),
            (Value::Float(a), Value::Int(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float(a), Value::Float(b)) => a.partial_cmp(b),
            (Value::Str(a), Value::Str(b)) => Some(a.cmp(b)),
            _ => None,
        };
        ord.ok_or_else(|| {
            WirbErr::Argument(format!(
                "comparison of {} with {} failed",
                self.kind().name(),
                other.inspect()
            ))
        })
    }

    pub fn pow(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) if *b >= 0 => u32::try_from(*b)
                .ok()
                .and_then(|exp| a.checked_pow(exp))
                .map(Value::Int)
                .ok_or_else(overflow),
            (Value::Int(a), Value::Int(b)) => Ok(Value::Float((*a as f64).powf(*b as f64))),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => Ok(Value::Float(x.powf(y))),
                _ => Err(no_coercion(b, a)),
            },
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }
}

fn overflow() -> WirbErr {
    WirbErr::Range("integer overflow".to_string())
}

fn no_coercion(from: &Value, into: &Value) -> WirbErr {
    match into {
        Value::Str(_) => WirbErr::Type(format!(
            "no implicit conversion of {} into String",
            from.kind().name()
        )),
        Value::Int(_) | Value::Float(_) => WirbErr::Type(format!(
            "{} can't be coerced into {}",
            from.kind().name(),
            into.kind().name()
        )),
        _ => no_method_error("+", into),
    }
}

pub fn no_method_error(name: &str, recv: &Value) -> WirbErr {
    WirbErr::NoMethod(format!(
        "undefined method '{}' for {}",
        name,
        match recv {
            Value::Nil | Value::Bool(_) => recv.inspect(),
            other => format!("an instance of {}", other.kind().name()),
        }
    ))
}

fn numeric(a: &Value, b: &Value, op: &str) -> Result<(f64, f64)> {
    match (a.as_f64(), b.as_f64()) {
        (Some(x), Some(y)) => Ok((x, y)),
        (Some(_), None) => Err(no_coercion(b, a)),
        _ => Err(no_method_error(op, a)),
    }
}

impl core::ops::Add for &Value {
    type Output = Result<Value>;

    #[inline(always)]
    fn add(self, other: Self) -> Self::Output {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.checked_add(*b).map(Value::Int).ok_or_else(overflow),
            (Value::Str(a), Value::Str(b)) => {
                checked_len(a.len(), b.len(), MAX_STR_LEN)?;
                let mut s = a.clone();
                s.push_str(b);
                Ok(Value::Str(s))
            }
            (Value::Str(_), b) => Err(no_coercion(b, self)),
            (Value::Array(a), Value::Array(b)) => {
                let mut list = Vec::with_capacity(checked_len(a.len(), b.len(), MAX_LIST_LEN)?);
                list.extend(a.iter().cloned());
                list.extend(b.iter().cloned());
                Ok(Value::new_list(list))
            }
            (a, b) => numeric(a, b, "+").map(|(x, y)| Value::Float(x + y)),
        }
    }
}

impl core::ops::Sub for &Value {
    type Output = Result<Value>;

    #[inline(always)]
    fn sub(self, other: Self) -> Self::Output {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.checked_sub(*b).map(Value::Int).ok_or_else(overflow),
            (a, b) => numeric(a, b, "-").map(|(x, y)| Value::Float(x - y)),
        }
    }
}

impl core::ops::Mul for &Value {
    type Output = Result<Value>;

    #[inline(always)]
    fn mul(self, other: Self) -> Self::Output {
        match (self, other) {
            (Value::Int(a), Value::Int(b)) => a.checked_mul(*b).map(Value::Int).ok_or_else(overflow),
            (Value::Str(s), Value::Int(n)) => {
                let n = usize::try_from(*n)
                    .map_err(|_| WirbErr::Argument("negative argument".to_string()))?;
                s.len()
                    .checked_mul(n)
                    .filter(|&len| len <= MAX_STR_LEN)
                    .ok_or_else(too_big)?;
                Ok(Value::str(&s.repeat(n)))
            }
            (Value::Str(_), b) => Err(no_coercion(b, &Value::Int(0))),
            (a, b) => numeric(a, b, "*").map(|(x, y)| Value::Float(x * y)),
        }
    }
}

impl core::ops::Div for &Value {
    type Output = Result<Value>;

    // Integer division floors, like Ruby.
    fn div(self, other: Self) -> Self::Output {
        match (self, other) {
            (Value::Int(_), Value::Int(0)) => Err(WirbErr::ZeroDivision),
            (Value::Int(a), Value::Int(b)) => {
                let q = a.checked_div(*b).ok_or_else(overflow)?;
                if a % b != 0 && ((*a < 0) != (*b < 0)) {
                    Ok(Value::Int(q - 1))
                } else {
                    Ok(Value::Int(q))
                }
            }
            (a, b) => numeric(a, b, "/").map(|(x, y)| Value::Float(x / y)),
        }
    }
}

impl core::ops::Rem for &Value {
    type Output = Result<Value>;

    // The result takes the sign of the divisor, like Ruby.
    fn rem(self, other: Self) -> Self::Output {
        match (self, other) {
            (Value::Int(_), Value::Int(0)) => Err(WirbErr::ZeroDivision),
            (Value::Int(a), Value::Int(b)) => {
                let r = a.checked_rem(*b).ok_or_else(overflow)?;
                if r != 0 && ((r < 0) != (*b < 0)) {
                    Ok(Value::Int(r + b))
                } else {
                    Ok(Value::Int(r))
                }
            }
            (a, b) => numeric(a, b, "%").map(|(x, y)| Value::Float(x - y * (x / y).floor())),
        }
    }
}

impl std::fmt::Debug for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inspect())
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum WirbErr {
    #[error("{0}")]
    Syntax(String),
    #[error("{0}")]
    Name(String),
    #[error("{0}")]
    NoMethod(String),
    #[error("{0}")]
    Type(String),
    #[error("{0}")]
    Argument(String),
    #[error("divided by 0")]
    ZeroDivision,
    #[error("{0}")]
    Range(String),
    #[error("stack level too deep")]
    StackTooDeep,
    /// Raised by `exit`; ends the session rather than being reported.
    #[error("exit")]
    Exit,
}

impl WirbErr {
    pub fn class_name(&self) -> &'static str {
        match self {
            WirbErr::Syntax(_) => "SyntaxError",
            WirbErr::Name(_) => "NameError",
            WirbErr::NoMethod(_) => "NoMethodError",
            WirbErr::Type(_) => "TypeError",
            WirbErr::Argument(_) => "ArgumentError",
            WirbErr::ZeroDivision => "ZeroDivisionError",
            WirbErr::Range(_) => "RangeError",
            WirbErr::StackTooDeep => "SystemStackError",
            WirbErr::Exit => "SystemExit",
        }
    }
}

pub fn syntax_error(msg: &str) -> WirbErr {
    WirbErr::Syntax(msg.to_string())
}

pub fn too_big() -> WirbErr {
    WirbErr::Argument("argument too big".to_string())
}

fn checked_len(a: usize, b: usize, max: usize) -> Result<usize> {
    a.checked_add(b).filter(|&len| len <= max).ok_or_else(too_big)
}

pub fn arity_error(given: usize, expected: &str) -> WirbErr {
    WirbErr::Argument(format!(
        "wrong number of arguments (given {}, expected {})",
        given, expected
    ))
}

// Native functions

pub type NativeFn = fn(&[Value]) -> Result<Value>;

#[derive(Clone)]
pub struct WirbFnNative {
    pub name: SmartString,
    pub func: NativeFn,
}

impl WirbFnNative {
    pub fn new(name: &str, func: NativeFn) -> Arc<WirbFnNative> {
        Arc::new(WirbFnNative {
            name: SmartString::from(name),
            func,
        })
    }
}

impl std::fmt::Debug for WirbFnNative {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Native func<{}>", self.name)
    }
}
