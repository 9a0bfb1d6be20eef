use crate::wirb::{IoHandle, Value, MAX_STR_LEN};

fn escape_str(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            '\x1b' => out.push_str("\\e"),
            _ => out.push(ch),
        }
    }
    out
}

fn float_str(f: f64) -> String {
    if f.is_nan() {
        "NaN".to_string()
    } else if f.is_infinite() {
        if f > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

impl Value {
    /// What `p` and the REPL result line show.
    pub fn inspect(&self) -> String {
        match self {
            Value::Str(s) => format!("\"{}\"", escape_str(s)),
            Value::Sym(s) => format!(":{}", s),
            Value::Nil => String::from("nil"),
            Value::Array(_) => {
                let mut out = String::new();
                self.inspect_into(&mut out);
                out
            }
            x => x.to_s(),
        }
    }

    // Arrays render up to the string ceiling, then end in "...".
    fn inspect_into(&self, out: &mut String) {
        match self {
            Value::Array(l) => {
                out.push('[');
                for (i, x) in l.iter().enumerate() {
                    if out.len() > MAX_STR_LEN {
                        out.push_str("...");
                        break;
                    }
                    if i > 0 {
                        out.push_str(", ");
                    }
                    x.inspect_into(out);
                }
                out.push(']');
            }
            x => out.push_str(&x.inspect()),
        }
    }

    /// What `puts` and `print` show.
    pub fn to_s(&self) -> String {
        match self {
            Value::Nil => String::new(),
            Value::Bool(true) => String::from("true"),
            Value::Bool(false) => String::from("false"),
            Value::Int(i) => i.to_string(),
            Value::Float(f) => float_str(*f),
            Value::Str(s) | Value::Sym(s) => s.to_string(),
            Value::Array(_) => self.inspect(),
            Value::Io(IoHandle::Stdout) => String::from("#<IO:<STDOUT>>"),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_s())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inspect_nests() {
        let list = Value::new_list(vec![Value::Int(1), Value::new_list(vec![Value::str("a\n"), Value::Nil])]);
        assert_eq!(list.inspect(), "[1, [\"a\\n\", nil]]");
        assert_eq!(list.to_s(), list.inspect());
    }

    #[test]
    fn huge_arrays_render_truncated() {
        let chunk = Value::str(&"x".repeat(1 << 20));
        let list = Value::new_list(vec![chunk; 64]);
        let shown = list.inspect();
        assert!(shown.len() < MAX_STR_LEN + (2 << 20));
        assert!(shown.ends_with("...]"));
    }
}
