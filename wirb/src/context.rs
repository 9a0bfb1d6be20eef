//! Prompt and result formatting for an interactive session.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::reader::ReadState;
use crate::wirb::{Value, WirbErr};

/// Where the session writes prompts, results and error reports.
pub trait OutputMethod {
    fn print(&mut self, text: &str);
}

impl OutputMethod for String {
    fn print(&mut self, text: &str) {
        self.push_str(text);
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PromptMode {
    #[default]
    Default,
    Simple,
    Null,
}

struct Prompts {
    start: &'static str,
    string: &'static str,
    cont: &'static str,
    ret: &'static str,
}

impl PromptMode {
    fn prompts(self) -> Prompts {
        match self {
            PromptMode::Default => Prompts {
                start: "%N(%m):%03n:%i> ",
                string: "%N(%m):%03n:%i%l ",
                cont: "%N(%m):%03n:%i* ",
                ret: "=> %s\n",
            },
            PromptMode::Simple => Prompts {
                start: ">> ",
                string: "%l> ",
                cont: "?> ",
                ret: "=> %s\n",
            },
            PromptMode::Null => Prompts {
                start: "",
                string: "",
                cont: "",
                ret: "%s\n",
            },
        }
    }
}

impl FromStr for PromptMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "default" => Ok(PromptMode::Default),
            "simple" => Ok(PromptMode::Simple),
            "null" => Ok(PromptMode::Null),
            other => Err(format!("unknown prompt mode '{}'", other)),
        }
    }
}

impl fmt::Display for PromptMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PromptMode::Default => "default",
            PromptMode::Simple => "simple",
            PromptMode::Null => "null",
        })
    }
}

#[derive(Clone, Debug)]
pub struct Context {
    pub irb_name: String,
    /// How the top-level object prints itself.
    pub main: String,
    pub prompt_mode: PromptMode,
}

impl Default for Context {
    fn default() -> Self {
        Context {
            irb_name: String::from("wirb"),
            main: String::from("main"),
            prompt_mode: PromptMode::Default,
        }
    }
}

impl Context {
    pub fn new(irb_name: &str, prompt_mode: PromptMode) -> Context {
        Context {
            irb_name: irb_name.to_string(),
            prompt_mode,
            ..Context::default()
        }
    }

    /// Prompt for line `line_no` given what the reader is waiting for.
    pub fn prompt(&self, state: ReadState, line_no: usize, indent: usize) -> String {
        let prompts = self.prompt_mode.prompts();
        let (template, ltype) = match state {
            ReadState::Start => (prompts.start, '>'),
            ReadState::Continue => (prompts.cont, '*'),
            ReadState::InString(quote) => (prompts.string, quote),
        };
        self.expand(template, line_no, indent, ltype)
    }

    fn expand(&self, template: &str, line_no: usize, indent: usize, ltype: char) -> String {
        let mut out = String::with_capacity(template.len() + 16);
        let mut chars = template.chars().peekable();

        while let Some(ch) = chars.next() {
            if ch != '%' {
                out.push(ch);
                continue;
            }

            let mut width = String::new();
            while let Some(d) = chars.next_if(|c| c.is_ascii_digit()) {
                width.push(d);
            }
            let pad = |n: usize| match width.parse::<usize>() {
                Ok(w) if width.starts_with('0') => format!("{:0w$}", n, w = w),
                Ok(w) => format!("{:w$}", n, w = w),
                Err(_) => n.to_string(),
            };

            match chars.next() {
                Some('N') => out.push_str(&self.irb_name),
                Some('m') | Some('M') => out.push_str(&self.main),
                Some('n') => out.push_str(&pad(line_no)),
                Some('i') => out.push_str(&pad(indent)),
                Some('l') => out.push(ltype),
                Some('%') => out.push('%'),
                Some(other) => {
                    out.push('%');
                    out.push(other);
                }
                None => out.push('%'),
            }
        }

        out
    }

    pub fn format_return(&self, val: &Value) -> String {
        self.prompt_mode.prompts().ret.replace("%s", &val.inspect())
    }

    /// Echoes the value of an evaluated statement.
    pub fn echo(&self, out: &mut dyn OutputMethod, val: &Value) {
        out.print(&self.format_return(val));
    }

    /// Reports an error raised by the statement at `line`, followed by the
    /// offending source line when it is known.
    pub fn report(&self, out: &mut dyn OutputMethod, err: &WirbErr, line: usize, source: Option<&str>) {
        out.print(&format!(
            "({}):{}:in '<main>': {} ({})\n",
            self.irb_name,
            line,
            err,
            err.class_name()
        ));
        if let Some(src) = source.map(str::trim_end).filter(|s| !s.is_empty()) {
            out.print(&format!("\t{:>4}| {}\n", line, src));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_prompt() {
        let ctx = Context::default();
        assert_eq!(ctx.prompt(ReadState::Start, 1, 0), "wirb(main):001:0> ");
        assert_eq!(ctx.prompt(ReadState::Continue, 12, 1), "wirb(main):012:1* ");
        assert_eq!(ctx.prompt(ReadState::InString('"'), 3, 0), "wirb(main):003:0\" ");
    }

    #[test]
    fn simple_and_null_prompts() {
        let simple = Context::new("wirb", PromptMode::Simple);
        assert_eq!(simple.prompt(ReadState::Start, 5, 0), ">> ");
        assert_eq!(simple.prompt(ReadState::Continue, 5, 2), "?> ");

        let null = Context::new("wirb", PromptMode::Null);
        assert_eq!(null.prompt(ReadState::Start, 1, 0), "");
        assert_eq!(null.format_return(&Value::Int(3)), "3\n");
    }

    #[test]
    fn echo_uses_inspect() {
        let ctx = Context::default();
        let mut out = String::new();
        ctx.echo(&mut out, &Value::str("hi"));
        ctx.echo(&mut out, &Value::Nil);
        assert_eq!(out, "=> \"hi\"\n=> nil\n");
    }

    #[test]
    fn report_names_the_error_class() {
        let ctx = Context::default();
        let mut out = String::new();
        ctx.report(&mut out, &WirbErr::ZeroDivision, 4, Some("1 / 0\n"));
        assert_eq!(
            out,
            "(wirb):4:in '<main>': divided by 0 (ZeroDivisionError)\n\t   4| 1 / 0\n"
        );
    }

    #[test]
    fn prompt_mode_parses() {
        assert_eq!("SIMPLE".parse::<PromptMode>(), Ok(PromptMode::Simple));
        assert!("fancy".parse::<PromptMode>().is_err());
        assert_eq!(PromptMode::Null.to_string(), "null");
    }
}
