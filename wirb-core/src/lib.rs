use std::cmp::Ordering;

use wirb::env::Env;
use wirb::kernel;
use wirb::{arity_error, too_big, Kind, Result, Value, WirbErr, MAX_STR_LEN};

fn expect_args(args: &[Value], n: usize) -> Result<()> {
    if args.len() != n {
        return Err(arity_error(args.len(), &n.to_string()));
    }
    Ok(())
}

fn type_error(val: &Value, into: &str) -> WirbErr {
    WirbErr::Type(format!(
        "no implicit conversion of {} into {}",
        val.kind().name(),
        into
    ))
}

// Conversion functions

fn integer(args: &[Value]) -> Result<Value> {
    expect_args(args, 1)?;
    match &args[0] {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Float(f) if f.is_finite() => Ok(Value::Int(f.trunc() as i64)),
        Value::Float(f) => Err(WirbErr::Range(Value::Float(*f).to_s())),
        Value::Str(s) => s.trim().replace('_', "").parse().map(Value::Int).map_err(|_| {
            WirbErr::Argument(format!("invalid value for Integer(): {}", args[0].inspect()))
        }),
        Value::Nil => Err(WirbErr::Type("can't convert nil into Integer".to_string())),
        other => Err(type_error(other, "Integer")),
    }
}

fn float(args: &[Value]) -> Result<Value> {
    expect_args(args, 1)?;
    match &args[0] {
        Value::Str(s) => s.trim().replace('_', "").parse().map(Value::Float).map_err(|_| {
            WirbErr::Argument(format!("invalid value for Float(): {}", args[0].inspect()))
        }),
        Value::Nil => Err(WirbErr::Type("can't convert nil into Float".to_string())),
        other => other.as_f64().map(Value::Float).ok_or_else(|| type_error(other, "Float")),
    }
}

fn string(args: &[Value]) -> Result<Value> {
    expect_args(args, 1)?;
    Ok(Value::str(&args[0].to_s()))
}

fn format(args: &[Value]) -> Result<Value> {
    match args.split_first() {
        Some((Value::Str(fmt), rest)) => kernel::format(fmt, rest).map(|s| Value::str(&s)),
        Some((other, _)) => Err(type_error(other, "String")),
        None => Err(arity_error(0, "1+")),
    }
}

fn extreme(args: &[Value], pick: Ordering) -> Result<Value> {
    let mut best: Option<&Value> = None;
    for val in args {
        best = match best {
            Some(b) if val.compare(b)? != pick => Some(b),
            _ => Some(val),
        };
    }
    Ok(best.cloned().unwrap_or_default())
}

// Integer and Float

fn int_of(args: &[Value]) -> i64 {
    match args.first() {
        Some(Value::Int(i)) => *i,
        _ => 0,
    }
}

fn float_of(args: &[Value]) -> f64 {
    args.first().and_then(Value::as_f64).unwrap_or_default()
}

fn int_to_f(args: &[Value]) -> Result<Value> {
    Ok(Value::Float(int_of(args) as f64))
}

fn int_abs(args: &[Value]) -> Result<Value> {
    int_of(args)
        .checked_abs()
        .map(Value::Int)
        .ok_or_else(|| WirbErr::Range("integer overflow".to_string()))
}

fn int_even(args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(int_of(args) % 2 == 0))
}

fn int_odd(args: &[Value]) -> Result<Value> {
    Ok(Value::Bool(int_of(args) % 2 != 0))
}

fn int_chr(args: &[Value]) -> Result<Value> {
    let i = int_of(args);
    u8::try_from(i)
        .map(|b| Value::str(&char::from(b).to_string()))
        .map_err(|_| WirbErr::Range(format!("{} out of char range", i)))
}

fn float_to_i(args: &[Value]) -> Result<Value> {
    integer(&[Value::Float(float_of(args))])
}

fn float_round(args: &[Value]) -> Result<Value> {
    let f = float_of(args);
    match args.get(1) {
        None => integer(&[Value::Float(f.round())]),
        Some(Value::Int(digits)) => {
            let scale = 10f64.powi(i32::try_from(*digits).unwrap_or(if *digits < 0 { i32::MIN } else { i32::MAX }));
            let scaled = f * scale;
            if !scaled.is_finite() {
                // More digits than an f64 holds.
                Ok(Value::Float(f))
            } else if scale == 0.0 {
                Ok(Value::Float(0.0))
            } else {
                Ok(Value::Float(scaled.round() / scale))
            }
        }
        Some(other) => Err(type_error(other, "Integer")),
    }
}

fn float_floor(args: &[Value]) -> Result<Value> {
    integer(&[Value::Float(float_of(args).floor())])
}

fn float_ceil(args: &[Value]) -> Result<Value> {
    integer(&[Value::Float(float_of(args).ceil())])
}

fn float_abs(args: &[Value]) -> Result<Value> {
    Ok(Value::Float(float_of(args).abs()))
}

// String

fn str_of(args: &[Value]) -> &str {
    match args.first() {
        Some(Value::Str(s)) => s.as_str(),
        _ => "",
    }
}

fn str_length(args: &[Value]) -> Result<Value> {
    Ok(Value::Int(str_of(args).chars().count() as i64))
}

fn str_upcase(args: &[Value]) -> Result<Value> {
    Ok(Value::str(&str_of(args).to_uppercase()))
}

fn str_downcase(args: &[Value]) -> Result<Value> {
    Ok(Value::str(&str_of(args).to_lowercase()))
}

fn str_reverse(args: &[Value]) -> Result<Value> {
    Ok(Value::str(&str_of(args).chars().rev().collect::<String>()))
}

fn str_strip(args: &[Value]) -> Result<Value> {
    Ok(Value::str(str_of(args).trim()))
}

fn str_chomp(args: &[Value]) -> Result<Value> {
    let s = str_of(args);
    let s = s.strip_suffix('\n').unwrap_or(s);
    Ok(Value::str(s.strip_suffix('\r').unwrap_or(s)))
}

// Leading digits only, like Ruby; anything unparseable is 0.
fn str_to_i(args: &[Value]) -> Result<Value> {
    let s = str_of(args).trim_start();
    let end = s
        .char_indices()
        .find(|&(i, c)| !(c.is_ascii_digit() || (i == 0 && (c == '-' || c == '+'))))
        .map_or(s.len(), |(i, _)| i);
    Ok(Value::Int(s[..end].parse().unwrap_or_default()))
}

fn str_to_f(args: &[Value]) -> Result<Value> {
    let s = str_of(args).trim();
    let numeric = s
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E' | '-' | '+')))
        .map_or(s, |end| &s[..end]);
    let parsed = (1..=numeric.len())
        .rev()
        .find_map(|i| numeric[..i].parse::<f64>().ok());
    Ok(Value::Float(parsed.unwrap_or_default()))
}

fn str_include(args: &[Value]) -> Result<Value> {
    expect_args(args, 2)?;
    match &args[1] {
        Value::Str(needle) => Ok(Value::Bool(str_of(args).contains(needle.as_str()))),
        other => Err(type_error(other, "String")),
    }
}

fn str_split(args: &[Value]) -> Result<Value> {
    let s = str_of(args);
    let parts: Vec<Value> = match args.get(1) {
        None => s.split_whitespace().map(Value::str).collect(),
        Some(Value::Str(sep)) if sep.is_empty() => s.chars().map(|c| Value::str(&c.to_string())).collect(),
        Some(Value::Str(sep)) => {
            let mut parts: Vec<&str> = s.split(sep.as_str()).collect();
            while parts.last() == Some(&"") {
                parts.pop();
            }
            parts.into_iter().map(Value::str).collect()
        }
        Some(other) => return Err(type_error(other, "String")),
    };
    Ok(Value::new_list(parts))
}

fn str_chars(args: &[Value]) -> Result<Value> {
    str_split(&[args.first().cloned().unwrap_or_default(), Value::str("")])
}

fn str_to_sym(args: &[Value]) -> Result<Value> {
    Ok(Value::Sym(str_of(args).into()))
}

// Array

fn list_of(args: &[Value]) -> &[Value] {
    match args.first() {
        Some(Value::Array(list)) => list.as_slice(),
        _ => &[],
    }
}

fn list_length(args: &[Value]) -> Result<Value> {
    Ok(Value::Int(list_of(args).len() as i64))
}

fn list_first(args: &[Value]) -> Result<Value> {
    Ok(list_of(args).first().cloned().unwrap_or_default())
}

fn list_last(args: &[Value]) -> Result<Value> {
    Ok(list_of(args).last().cloned().unwrap_or_default())
}

fn list_reverse(args: &[Value]) -> Result<Value> {
    Ok(Value::new_list(list_of(args).iter().rev().cloned().collect()))
}

fn list_join(args: &[Value]) -> Result<Value> {
    let sep = match args.get(1) {
        None | Some(Value::Nil) => "",
        Some(Value::Str(s)) => s.as_str(),
        Some(other) => return Err(type_error(other, "String")),
    };
    let mut joined = String::new();
    for (i, val) in list_of(args).iter().enumerate() {
        if i > 0 {
            joined.push_str(sep);
        }
        joined.push_str(&val.to_s());
        if joined.len() > MAX_STR_LEN {
            return Err(too_big());
        }
    }
    Ok(Value::str(&joined))
}

fn list_sum(args: &[Value]) -> Result<Value> {
    list_of(args)
        .iter()
        .try_fold(Value::Int(0), |acc, val| &acc + val)
}

fn list_include(args: &[Value]) -> Result<Value> {
    expect_args(args, 2)?;
    Ok(Value::Bool(list_of(args).iter().any(|v| v.equals(&args[1]))))
}

fn list_sort(args: &[Value]) -> Result<Value> {
    let mut list = list_of(args).to_vec();
    let mut failed = None;
    list.sort_by(|a, b| match a.compare(b) {
        Ok(ord) => ord,
        Err(err) => {
            if failed.is_none() {
                failed = Some(err);
            }
            Ordering::Equal
        }
    });
    match failed {
        Some(err) => Err(err),
        None => Ok(Value::new_list(list)),
    }
}

fn list_max(args: &[Value]) -> Result<Value> {
    extreme(list_of(args), Ordering::Greater)
}

fn list_min(args: &[Value]) -> Result<Value> {
    extreme(list_of(args), Ordering::Less)
}

fn max(args: &[Value]) -> Result<Value> {
    extreme(args, Ordering::Greater)
}

fn min(args: &[Value]) -> Result<Value> {
    extreme(args, Ordering::Less)
}

pub fn load<E: Env>(env: &mut E) {
    env.reg_fn("Integer", integer);
    env.reg_fn("Float", float);
    env.reg_fn("String", string);
    env.reg_fn("format", format);
    env.reg_fn("sprintf", format);
    env.reg_fn("max", max);
    env.reg_fn("min", min);

    env.reg_method(Kind::Integer, "to_f", int_to_f);
    env.reg_method(Kind::Integer, "abs", int_abs);
    env.reg_method(Kind::Integer, "even?", int_even);
    env.reg_method(Kind::Integer, "odd?", int_odd);
    env.reg_method(Kind::Integer, "chr", int_chr);

    env.reg_method(Kind::Float, "to_i", float_to_i);
    env.reg_method(Kind::Float, "round", float_round);
    env.reg_method(Kind::Float, "floor", float_floor);
    env.reg_method(Kind::Float, "ceil", float_ceil);
    env.reg_method(Kind::Float, "abs", float_abs);

    env.reg_method(Kind::String, "length", str_length);
    env.reg_method(Kind::String, "size", str_length);
    env.reg_method(Kind::String, "upcase", str_upcase);
    env.reg_method(Kind::String, "downcase", str_downcase);
    env.reg_method(Kind::String, "reverse", str_reverse);
    env.reg_method(Kind::String, "strip", str_strip);
    env.reg_method(Kind::String, "chomp", str_chomp);
    env.reg_method(Kind::String, "to_i", str_to_i);
    env.reg_method(Kind::String, "to_f", str_to_f);
    env.reg_method(Kind::String, "to_sym", str_to_sym);
    env.reg_method(Kind::String, "include?", str_include);
    env.reg_method(Kind::String, "split", str_split);
    env.reg_method(Kind::String, "chars", str_chars);

    env.reg_method(Kind::Array, "length", list_length);
    env.reg_method(Kind::Array, "size", list_length);
    env.reg_method(Kind::Array, "first", list_first);
    env.reg_method(Kind::Array, "last", list_last);
    env.reg_method(Kind::Array, "reverse", list_reverse);
    env.reg_method(Kind::Array, "join", list_join);
    env.reg_method(Kind::Array, "sum", list_sum);
    env.reg_method(Kind::Array, "include?", list_include);
    env.reg_method(Kind::Array, "sort", list_sort);
    env.reg_method(Kind::Array, "max", list_max);
    env.reg_method(Kind::Array, "min", list_min);
}

#[cfg(test)]
mod tests {
    use wirb::env::SandboxEnv;
    use wirb::kernel::Main;
    use wirb::Evaluator;

    use super::*;

    fn run(src: &str) -> Result<String> {
        let mut env = SandboxEnv::default();
        load(&mut env);
        Evaluator::new(env, Box::new(Main))
            .eval_str(src)
            .map(|val| val.inspect())
    }

    fn test_exp(src: &str, expected: &str) {
        assert_eq!(run(src).unwrap(), expected);
    }

    #[test]
    fn conversions() {
        test_exp("Integer(\"42\")", "42");
        test_exp("Integer(3.9)", "3");
        test_exp("Float(2)", "2.0");
        test_exp("String(:a)", "\"a\"");
        assert_eq!(
            run("Integer(\"x\")"),
            Err(WirbErr::Argument("invalid value for Integer(): \"x\"".to_string()))
        );
    }

    #[test]
    fn format_and_extremes() {
        test_exp("format(\"%05.1f|%s\", 3.14159, nil)", "\"003.1|\"");
        test_exp("max(3, 7, 5)", "7");
        test_exp("min(3, 7, 5)", "3");
        test_exp("max()", "nil");
    }

    #[test]
    fn number_methods() {
        test_exp("(-5).abs", "5");
        test_exp("4.even?", "true");
        test_exp("65.chr", "\"A\"");
        test_exp("2.5.round", "3");
        test_exp("3.14159.round(2)", "3.14");
        test_exp("(-1.5).floor", "-2");
        test_exp("7.to_f / 2", "3.5");
    }

    #[test]
    fn oversized_results_are_argument_errors() {
        let big = Err(WirbErr::Argument("argument too big".to_string()));
        assert_eq!(run("format(\"%.99999999999f\", 1.0)"), big);
        assert_eq!(run("format(\"%100000000000000d\", 1)"), big);
        assert_eq!(run("s = \"x\" * 8000000\n[s, s, s].join"), big);
        test_exp("[1, :a, nil].join(\"-\")", "\"1-a-\"");
    }

    #[test]
    fn round_with_extreme_digits() {
        test_exp("1.5.round(400)", "1.5");
        test_exp("1.5.round(-400)", "0.0");
        test_exp("1.25.round(1)", "1.3");
    }

    #[test]
    fn string_methods() {
        test_exp("\"Hello\".upcase", "\"HELLO\"");
        test_exp("\"héllo\".length", "5");
        test_exp("\"  pad \".strip", "\"pad\"");
        test_exp("\"line\\n\".chomp", "\"line\"");
        test_exp("\"12abc\".to_i", "12");
        test_exp("\"1.5kg\".to_f", "1.5");
        test_exp("\"a b  c\".split", "[\"a\", \"b\", \"c\"]");
        test_exp("\"a,b,,\".split(\",\")", "[\"a\", \"b\"]");
        test_exp("\"abc\".chars.reverse.join(\"-\")", "\"c-b-a\"");
        test_exp("\"wirb\".include?(\"ir\")", "true");
    }

    #[test]
    fn array_methods() {
        test_exp("[3, 1, 2].sort", "[1, 2, 3]");
        test_exp("[1, 2, 3].sum", "6");
        test_exp("[1, 2.5].sum", "3.5");
        test_exp("[].first", "nil");
        test_exp("[4, 9, 2].max", "9");
        test_exp("[1, 2].include?(2.0)", "true");
        test_exp("[1, [2, 3]].length", "2");
        assert!(matches!(run("[1, \"a\"].sort"), Err(WirbErr::Argument(_))));
    }

    #[test]
    fn unknown_methods_are_reported() {
        assert_eq!(
            run("5.upcase"),
            Err(WirbErr::NoMethod("undefined method 'upcase' for an instance of Integer".to_string()))
        );
    }
}
