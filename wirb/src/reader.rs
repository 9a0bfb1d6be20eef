use std::iter::Peekable;
use std::str::Chars;
use std::sync::Arc;

use crate::ast::{BinOp, FnDef, Node, Statement, UnOp};
use crate::wirb::{syntax_error, Result, SmartString, Value, WirbErr};

const MAX_NESTING: usize = 64;

/* Tokenizer */

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Op {
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Pow,
    EqEq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    AndAnd,
    OrOr,
    Bang,
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Op::Plus => "+",
            Op::Minus => "-",
            Op::Star => "*",
            Op::Slash => "/",
            Op::Percent => "%",
            Op::Pow => "**",
            Op::EqEq => "==",
            Op::NotEq => "!=",
            Op::Lt => "<",
            Op::LtEq => "<=",
            Op::Gt => ">",
            Op::GtEq => ">=",
            Op::AndAnd => "&&",
            Op::OrOr => "||",
            Op::Bang => "!",
            Op::Assign => "=",
            Op::PlusAssign => "+=",
            Op::MinusAssign => "-=",
            Op::StarAssign => "*=",
        }
    }

    fn compound(self) -> Option<BinOp> {
        match self {
            Op::PlusAssign => Some(BinOp::Add),
            Op::MinusAssign => Some(BinOp::Sub),
            Op::StarAssign => Some(BinOp::Mul),
            _ => None,
        }
    }

    fn is_assign(self) -> bool {
        self == Op::Assign || self.compound().is_some()
    }
}

#[derive(Clone, Debug, PartialEq)]
enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Sym(String),
    Ident(String),
    Global(String),
    Op(Op),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Newline,
    Semi,
}

impl std::fmt::Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Token::Int(i) => write!(f, "integer literal {}", i),
            Token::Float(x) => write!(f, "float literal {}", x),
            Token::Str(_) => write!(f, "string literal"),
            Token::Sym(s) => write!(f, "symbol literal :{}", s),
            Token::Ident(s) if is_keyword(s) => write!(f, "'{}'", s),
            Token::Ident(s) => write!(f, "local variable or method {}", s),
            Token::Global(s) => write!(f, "global variable ${}", s),
            Token::Op(op) => write!(f, "'{}'", op.as_str()),
            Token::LParen => write!(f, "'('"),
            Token::RParen => write!(f, "')'"),
            Token::LBracket => write!(f, "'['"),
            Token::RBracket => write!(f, "']'"),
            Token::Comma => write!(f, "','"),
            Token::Dot => write!(f, "'.'"),
            Token::Newline => write!(f, "end-of-line"),
            Token::Semi => write!(f, "';'"),
        }
    }
}

struct Lexeme {
    token: Token,
    // Whitespace before the token: `f (x)` and `a [0]` are command arguments,
    // `f(x)` and `a[0]` are not.
    spaced: bool,
}

const KEYWORDS: [&str; 15] = [
    "if", "unless", "while", "then", "do", "else", "elsif", "end", "def", "and", "or", "not",
    "nil", "true", "false",
];

fn is_keyword(s: &str) -> bool {
    KEYWORDS.contains(&s)
}

// Keywords that may not begin an expression.
fn is_clause_keyword(s: &str) -> bool {
    is_keyword(s) && !matches!(s, "nil" | "true" | "false")
}

/// What the reader is waiting for; drives the prompt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadState {
    /// Nothing pending: the next line starts a statement.
    Start,
    /// Inside an unfinished statement.
    Continue,
    /// Inside a string literal opened with the given quote.
    InString(char),
}

struct PendingStr {
    quote: char,
    buf: String,
    escaped: bool,
    spaced: bool,
}

/// Assembles input lines into complete statements.
///
/// Lines are tokenized as they arrive; a statement is handed out once no
/// bracket, block or string literal is left open and the last line did not
/// end on an operator.
pub struct Reader {
    tokens: Vec<Lexeme>,
    string: Option<PendingStr>,
    depth: usize,
    blocks: usize,
    source: String,
    first_line: usize,
}

impl Default for Reader {
    fn default() -> Self {
        Self::new()
    }
}

impl Reader {
    pub fn new() -> Reader {
        Reader {
            tokens: Vec::with_capacity(64),
            string: None,
            depth: 0,
            blocks: 0,
            source: String::new(),
            first_line: 1,
        }
    }

    pub fn reset(&mut self) {
        self.tokens.clear();
        self.string = None;
        self.depth = 0;
        self.blocks = 0;
        self.source.clear();
    }

    pub fn state(&self) -> ReadState {
        match &self.string {
            Some(pending) => ReadState::InString(pending.quote),
            None if self.tokens.is_empty() => ReadState::Start,
            None => ReadState::Continue,
        }
    }

    /// Nesting level of open brackets and blocks.
    pub fn indent(&self) -> usize {
        self.depth + self.blocks
    }

    /// Feeds one line of input. Returns the statement it completes, if any.
    /// On a syntax error the pending input is discarded.
    pub fn push_line(&mut self, line: &str, line_no: usize) -> Result<Option<Statement>> {
        if self.source.is_empty() {
            self.first_line = line_no;
        }
        self.source.push_str(line);

        if let Err(err) = self.tokenize(line) {
            self.reset();
            return Err(err);
        }

        if !self.is_complete() {
            return Ok(None);
        }

        let tokens = std::mem::take(&mut self.tokens);
        let source = std::mem::take(&mut self.source);
        self.reset();

        if tokens
            .iter()
            .all(|l| matches!(l.token, Token::Newline | Token::Semi))
        {
            return Ok(None);
        }

        let nodes = Parser::new(tokens).parse_program()?;
        Ok(Some(Statement {
            line: self.first_line,
            source,
            nodes,
        }))
    }

    fn is_complete(&self) -> bool {
        if self.string.is_some() || self.depth > 0 || self.blocks > 0 {
            return false;
        }
        let last = self
            .tokens
            .iter()
            .rev()
            .find(|l| l.token != Token::Newline)
            .map(|l| &l.token);
        !matches!(last, Some(Token::Op(_) | Token::Comma | Token::Dot))
    }

    fn ends_value(&self) -> bool {
        match self.tokens.last().map(|l| &l.token) {
            Some(Token::Ident(s)) => !is_clause_keyword(s) || s == "end",
            Some(
                Token::Int(_)
                | Token::Float(_)
                | Token::Str(_)
                | Token::Sym(_)
                | Token::Global(_)
                | Token::RParen
                | Token::RBracket,
            ) => true,
            _ => false,
        }
    }

    fn after_dot(&self) -> bool {
        matches!(self.tokens.last().map(|l| &l.token), Some(Token::Dot))
    }

    fn push(&mut self, token: Token, spaced: bool) {
        match &token {
            Token::LParen | Token::LBracket => self.depth += 1,
            Token::RParen | Token::RBracket => self.depth = self.depth.saturating_sub(1),
            Token::Ident(s) if !self.after_dot() => match s.as_str() {
                "def" | "while" => self.blocks += 1,
                // `x if y` is a modifier, not a block.
                "if" | "unless" if !self.ends_value() => self.blocks += 1,
                "end" => self.blocks = self.blocks.saturating_sub(1),
                _ => {}
            },
            _ => {}
        }
        self.tokens.push(Lexeme { token, spaced });
    }

    fn scan_string(&mut self, chars: &mut Peekable<Chars>) {
        let Some(mut pending) = self.string.take() else {
            return;
        };

        #[allow(clippy::while_let_on_iterator)]
        while let Some(ch) = chars.next() {
            if pending.escaped {
                pending.escaped = false;
                if pending.quote == '"' {
                    match ch {
                        'n' => pending.buf.push('\n'),
                        't' => pending.buf.push('\t'),
                        'r' => pending.buf.push('\r'),
                        '0' => pending.buf.push('\0'),
                        'e' => pending.buf.push('\x1b'),
                        's' => pending.buf.push(' '),
                        _ => pending.buf.push(ch),
                    }
                } else {
                    if ch != '\'' && ch != '\\' {
                        pending.buf.push('\\');
                    }
                    pending.buf.push(ch);
                }
            } else if ch == '\\' {
                pending.escaped = true;
            } else if ch == pending.quote {
                self.push(Token::Str(pending.buf), pending.spaced);
                return;
            } else {
                pending.buf.push(ch);
            }
        }

        // The literal continues on the next line.
        self.string = Some(pending);
    }

    fn tokenize(&mut self, src: &str) -> Result<()> {
        let mut chars = src.chars().peekable();
        let mut spaced = true;

        if self.string.is_some() {
            self.scan_string(&mut chars);
            spaced = false;
        }

        while let Some(ch) = chars.next() {
            match ch {
                ' ' | '\t' | '\r' => {
                    spaced = true;
                    continue;
                }
                '\n' => self.push(Token::Newline, spaced),
                '#' => {
                    while chars.next_if(|c| *c != '\n').is_some() {}
                    continue;
                }
                ';' => self.push(Token::Semi, spaced),
                '(' => self.push(Token::LParen, spaced),
                ')' => self.push(Token::RParen, spaced),
                '[' => self.push(Token::LBracket, spaced),
                ']' => self.push(Token::RBracket, spaced),
                ',' => self.push(Token::Comma, spaced),
                '.' => self.push(Token::Dot, spaced),
                '"' | '\'' => {
                    self.string = Some(PendingStr {
                        quote: ch,
                        buf: String::new(),
                        escaped: false,
                        spaced,
                    });
                    self.scan_string(&mut chars);
                    if self.string.is_some() {
                        return Ok(());
                    }
                }
                '0'..='9' => {
                    let token = read_number(ch, &mut chars)?;
                    self.push(token, spaced);
                }
                '$' => {
                    let name = read_name(None, &mut chars);
                    if name.is_empty() {
                        return Err(syntax_error("'$' without identifiers is not allowed as a global variable name"));
                    }
                    self.push(Token::Global(name), spaced);
                }
                ':' => match chars.peek() {
                    Some(c) if c.is_alphabetic() || *c == '_' => {
                        let name = read_name(None, &mut chars);
                        self.push(Token::Sym(name), spaced);
                    }
                    _ => return Err(syntax_error("syntax error, unexpected ':'")),
                },
                c if c.is_alphabetic() || c == '_' => {
                    let name = read_name(Some(c), &mut chars);
                    self.push(Token::Ident(name), spaced);
                }
                _ => {
                    let op = read_op(ch, &mut chars)?;
                    self.push(Token::Op(op), spaced);
                }
            }
            spaced = false;
        }

        Ok(())
    }
}

fn read_name(first: Option<char>, chars: &mut Peekable<Chars>) -> String {
    let mut name = String::new();
    name.extend(first);
    while let Some(c) = chars.next_if(|c| c.is_alphanumeric() || *c == '_') {
        name.push(c);
    }
    // Predicate and bang names, but not `x!=y`.
    if let Some(&c) = chars.peek() {
        if (c == '?' || c == '!') && !name.is_empty() {
            let mut ahead = chars.clone();
            ahead.next();
            if ahead.peek() != Some(&'=') {
                chars.next();
                name.push(c);
            }
        }
    }
    name
}

fn read_number(first: char, chars: &mut Peekable<Chars>) -> Result<Token> {
    let mut digits = String::new();
    digits.push(first);
    while let Some(c) = chars.next_if(|c| c.is_ascii_digit() || *c == '_') {
        if c != '_' {
            digits.push(c);
        }
    }

    let mut ahead = chars.clone();
    if ahead.next() == Some('.') && ahead.peek().is_some_and(|c| c.is_ascii_digit()) {
        chars.next();
        digits.push('.');
        while let Some(c) = chars.next_if(|c| c.is_ascii_digit() || *c == '_') {
            if c != '_' {
                digits.push(c);
            }
        }
        return digits
            .parse()
            .map(Token::Float)
            .map_err(|_| syntax_error("invalid float literal"));
    }

    digits
        .parse()
        .map(Token::Int)
        .map_err(|_| WirbErr::Range(format!("integer literal {} too big", digits)))
}

fn read_op(ch: char, chars: &mut Peekable<Chars>) -> Result<Op> {
    let op = match ch {
        '+' if chars.next_if_eq(&'=').is_some() => Op::PlusAssign,
        '+' => Op::Plus,
        '-' if chars.next_if_eq(&'=').is_some() => Op::MinusAssign,
        '-' => Op::Minus,
        '*' if chars.next_if_eq(&'*').is_some() => Op::Pow,
        '*' if chars.next_if_eq(&'=').is_some() => Op::StarAssign,
        '*' => Op::Star,
        '/' => Op::Slash,
        '%' => Op::Percent,
        '=' if chars.next_if_eq(&'=').is_some() => Op::EqEq,
        '=' => Op::Assign,
        '!' if chars.next_if_eq(&'=').is_some() => Op::NotEq,
        '!' => Op::Bang,
        '<' if chars.next_if_eq(&'=').is_some() => Op::LtEq,
        '<' => Op::Lt,
        '>' if chars.next_if_eq(&'=').is_some() => Op::GtEq,
        '>' => Op::Gt,
        '&' if chars.next_if_eq(&'&').is_some() => Op::AndAnd,
        '|' if chars.next_if_eq(&'|').is_some() => Op::OrOr,
        other => {
            return Err(WirbErr::Syntax(format!(
                "Invalid char '{}' in expression",
                other.escape_default()
            )))
        }
    };
    Ok(op)
}

/* Parser */

struct Parser {
    tokens: Vec<Lexeme>,
    pos: usize,
    nesting: usize,
}

impl Parser {
    fn new(tokens: Vec<Lexeme>) -> Parser {
        Parser {
            tokens,
            pos: 0,
            nesting: 0,
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|l| &l.token)
    }

    fn peek_at(&self, n: usize) -> Option<&Token> {
        self.tokens.get(self.pos + n).map(|l| &l.token)
    }

    fn spaced(&self) -> bool {
        self.tokens.get(self.pos).is_some_and(|l| l.spaced)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|l| l.token.clone());
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, ops: &[Op]) -> Option<Op> {
        match self.peek() {
            Some(Token::Op(op)) if ops.contains(op) => {
                let op = *op;
                self.pos += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Token::Ident(s)) if s == kw)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: Token) -> Result<()> {
        if self.eat(&token) {
            Ok(())
        } else {
            Err(self.unexpected_expecting(&token.to_string()))
        }
    }

    fn expect_keyword(&mut self, kw: &str) -> Result<()> {
        if self.eat_keyword(kw) {
            Ok(())
        } else {
            Err(self.unexpected_expecting(&format!("'{}'", kw)))
        }
    }

    fn skip_newlines(&mut self) {
        while self.eat(&Token::Newline) {}
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(Token::Newline | Token::Semi)) {
            self.pos += 1;
        }
    }

    fn unexpected(&self) -> WirbErr {
        match self.peek() {
            Some(token) => WirbErr::Syntax(format!("syntax error, unexpected {}", token)),
            None => syntax_error("syntax error, unexpected end-of-input"),
        }
    }

    fn unexpected_expecting(&self, what: &str) -> WirbErr {
        match self.unexpected() {
            WirbErr::Syntax(msg) => WirbErr::Syntax(format!("{}, expecting {}", msg, what)),
            other => other,
        }
    }

    fn parse_program(mut self) -> Result<Vec<Node>> {
        self.parse_stmts(&[], false)
    }

    fn at_body_end(&self, ends: &[&str], paren: bool) -> bool {
        match self.peek() {
            Some(Token::Ident(s)) => ends.contains(&s.as_str()),
            Some(Token::RParen) => paren,
            _ => false,
        }
    }

    fn parse_stmts(&mut self, ends: &[&str], paren: bool) -> Result<Vec<Node>> {
        let mut nodes = Vec::new();
        loop {
            self.skip_separators();
            if self.peek().is_none() {
                if ends.is_empty() && !paren {
                    return Ok(nodes);
                }
                return Err(self.unexpected_expecting(if paren { "')'" } else { "'end'" }));
            }
            if self.at_body_end(ends, paren) {
                return Ok(nodes);
            }

            nodes.push(self.parse_stmt()?);

            match self.peek() {
                None | Some(Token::Newline | Token::Semi) => {}
                _ if self.at_body_end(ends, paren) => {}
                _ => return Err(self.unexpected()),
            }
        }
    }

    fn parse_stmt(&mut self) -> Result<Node> {
        self.chain(Parser::parse_modifiers)
    }

    fn parse_modifiers(&mut self) -> Result<Node> {
        let mut node = self.parse_logic()?;
        loop {
            if matches!(self.peek(), Some(Token::Ident(kw)) if kw == "if" || kw == "unless") {
                self.deeper()?;
            }
            if self.eat_keyword("if") {
                let cond = self.parse_expr()?;
                node = Node::If {
                    cond: Box::new(cond),
                    then_branch: vec![node],
                    else_branch: Vec::new(),
                };
            } else if self.eat_keyword("unless") {
                let cond = self.parse_expr()?;
                node = Node::If {
                    cond: Box::new(cond),
                    then_branch: Vec::new(),
                    else_branch: vec![node],
                };
            } else {
                return Ok(node);
            }
        }
    }

    // `and`, `or` and `not` bind looser than anything but the modifiers.
    fn parse_logic(&mut self) -> Result<Node> {
        self.chain(Parser::parse_logic_chain)
    }

    fn parse_logic_chain(&mut self) -> Result<Node> {
        let mut lhs = self.parse_not()?;
        loop {
            if matches!(self.peek(), Some(Token::Ident(kw)) if kw == "and" || kw == "or") {
                self.deeper()?;
            }
            let op = if self.eat_keyword("and") {
                BinOp::And
            } else if self.eat_keyword("or") {
                BinOp::Or
            } else {
                return Ok(lhs);
            };
            self.skip_newlines();
            let rhs = self.parse_not()?;
            lhs = Node::Binary(op, Box::new(lhs), Box::new(rhs));
        }
    }

    fn parse_not(&mut self) -> Result<Node> {
        if self.eat_keyword("not") {
            let operand = self.nested(Parser::parse_not)?;
            return Ok(Node::Unary(UnOp::Not, Box::new(operand)));
        }
        self.parse_expr()
    }

    // Each link of a left-leaning chain (`a + b + c`, `a.b.c`) is one level
    // deeper; `chain` gives the levels back once the chain is built.
    fn chain(&mut self, parse: impl FnOnce(&mut Parser) -> Result<Node>) -> Result<Node> {
        let base = self.nesting;
        let node = parse(self);
        self.nesting = base;
        node
    }

    fn deeper(&mut self) -> Result<()> {
        if self.nesting >= MAX_NESTING {
            return Err(syntax_error("expression nested too deeply"));
        }
        self.nesting += 1;
        Ok(())
    }

    fn nested(&mut self, parse: fn(&mut Parser) -> Result<Node>) -> Result<Node> {
        if self.nesting >= MAX_NESTING {
            return Err(syntax_error("expression nested too deeply"));
        }
        self.nesting += 1;
        let node = parse(self);
        self.nesting -= 1;
        node
    }

    fn parse_expr(&mut self) -> Result<Node> {
        self.nested(Parser::parse_assignment)
    }

    fn parse_assignment(&mut self) -> Result<Node> {
        let target = match (self.peek(), self.peek_at(1)) {
            (Some(Token::Ident(name)), Some(Token::Op(op))) if op.is_assign() && !is_keyword(name) => {
                Some((Node::Ident(name.clone()), *op))
            }
            (Some(Token::Global(name)), Some(Token::Op(op))) if op.is_assign() => {
                Some((Node::Global(name.clone()), *op))
            }
            _ => None,
        };

        let Some((target, op)) = target else {
            return self.parse_or();
        };
        self.pos += 2;
        self.skip_newlines();

        let mut value = self.parse_expr()?;
        if let Some(bin) = op.compound() {
            value = Node::Binary(bin, Box::new(target.clone()), Box::new(value));
        }

        Ok(match target {
            Node::Global(name) => Node::GlobalAssign(name, Box::new(value)),
            Node::Ident(name) => Node::Assign(name, Box::new(value)),
            _ => unreachable!("assignment targets are names"),
        })
    }

    fn parse_binary(
        &mut self,
        ops: &[(Op, BinOp)],
        next: fn(&mut Parser) -> Result<Node>,
    ) -> Result<Node> {
        self.chain(|p| {
            let mut lhs = next(p)?;
            let tokens: Vec<Op> = ops.iter().map(|(op, _)| *op).collect();
            while let Some(op) = p.eat_op(&tokens) {
                p.deeper()?;
                p.skip_newlines();
                let rhs = next(p)?;
                let bin = ops
                    .iter()
                    .find(|(o, _)| *o == op)
                    .map(|(_, b)| *b)
                    .ok_or_else(|| p.unexpected())?;
                lhs = Node::Binary(bin, Box::new(lhs), Box::new(rhs));
            }
            Ok(lhs)
        })
    }

    fn parse_or(&mut self) -> Result<Node> {
        self.parse_binary(&[(Op::OrOr, BinOp::Or)], Parser::parse_and)
    }

    fn parse_and(&mut self) -> Result<Node> {
        self.parse_binary(&[(Op::AndAnd, BinOp::And)], Parser::parse_equality)
    }

    fn parse_equality(&mut self) -> Result<Node> {
        self.parse_binary(
            &[(Op::EqEq, BinOp::Eq), (Op::NotEq, BinOp::NotEq)],
            Parser::parse_comparison,
        )
    }

    fn parse_comparison(&mut self) -> Result<Node> {
        self.parse_binary(
            &[
                (Op::Lt, BinOp::Lt),
                (Op::LtEq, BinOp::LtEq),
                (Op::Gt, BinOp::Gt),
                (Op::GtEq, BinOp::GtEq),
            ],
            Parser::parse_additive,
        )
    }

    fn parse_additive(&mut self) -> Result<Node> {
        self.parse_binary(
            &[(Op::Plus, BinOp::Add), (Op::Minus, BinOp::Sub)],
            Parser::parse_term,
        )
    }

    fn parse_term(&mut self) -> Result<Node> {
        self.parse_binary(
            &[
                (Op::Star, BinOp::Mul),
                (Op::Slash, BinOp::Div),
                (Op::Percent, BinOp::Rem),
            ],
            Parser::parse_unary,
        )
    }

    fn parse_unary(&mut self) -> Result<Node> {
        match self.eat_op(&[Op::Minus, Op::Bang, Op::Plus]) {
            Some(Op::Minus) => Ok(Node::Unary(UnOp::Neg, Box::new(self.parse_nested_unary()?))),
            Some(Op::Bang) => Ok(Node::Unary(UnOp::Not, Box::new(self.parse_nested_unary()?))),
            Some(_) => self.parse_nested_unary(),
            None => self.parse_power(),
        }
    }

    fn parse_nested_unary(&mut self) -> Result<Node> {
        self.nested(Parser::parse_unary)
    }

    // `**` is right associative and binds tighter than unary minus.
    fn parse_power(&mut self) -> Result<Node> {
        let base = self.parse_postfix()?;
        if self.eat_op(&[Op::Pow]).is_some() {
            self.skip_newlines();
            let exp = self.parse_nested_unary()?;
            return Ok(Node::Binary(BinOp::Pow, Box::new(base), Box::new(exp)));
        }
        Ok(base)
    }

    fn parse_postfix(&mut self) -> Result<Node> {
        self.chain(Parser::parse_postfix_chain)
    }

    fn parse_postfix_chain(&mut self) -> Result<Node> {
        let mut node = self.parse_primary()?;
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.deeper()?;
                    self.pos += 1;
                    self.skip_newlines();
                    let name = match self.peek() {
                        Some(Token::Ident(name)) => name.clone(),
                        _ => return Err(self.unexpected_expecting("method name")),
                    };
                    self.pos += 1;
                    let args = self.parse_call_args()?.unwrap_or_default();
                    node = Node::Call {
                        recv: Some(Box::new(node)),
                        name,
                        args,
                    };
                }
                Some(Token::LBracket) if !self.spaced() => {
                    self.deeper()?;
                    self.pos += 1;
                    self.skip_newlines();
                    let idx = self.parse_expr()?;
                    self.skip_newlines();
                    self.expect(Token::RBracket)?;
                    node = Node::Index(Box::new(node), Box::new(idx));
                }
                _ => return Ok(node),
            }
        }
    }

    fn starts_command_arg(&self) -> bool {
        match self.peek() {
            Some(
                Token::Int(_) | Token::Float(_) | Token::Str(_) | Token::Sym(_) | Token::Global(_),
            ) => true,
            Some(Token::Ident(s)) => !is_clause_keyword(s),
            Some(Token::LParen | Token::LBracket) => self.spaced(),
            Some(Token::Op(Op::Bang)) => true,
            _ => false,
        }
    }

    fn parse_list(&mut self, close: Token) -> Result<Vec<Node>> {
        let mut items = Vec::new();
        loop {
            self.skip_newlines();
            if self.eat(&close) {
                return Ok(items);
            }
            items.push(self.parse_expr()?);
            self.skip_newlines();
            if !self.eat(&Token::Comma) {
                self.expect(close)?;
                return Ok(items);
            }
        }
    }

    // `f(a, b)`, `f a, b`, or no arguments at all.
    fn parse_call_args(&mut self) -> Result<Option<Vec<Node>>> {
        if self.peek() == Some(&Token::LParen) && !self.spaced() {
            self.pos += 1;
            return self.parse_list(Token::RParen).map(Some);
        }
        if !self.starts_command_arg() {
            return Ok(None);
        }
        let mut args = vec![self.parse_expr()?];
        while self.eat(&Token::Comma) {
            self.skip_newlines();
            args.push(self.parse_expr()?);
        }
        Ok(Some(args))
    }

    fn parse_primary(&mut self) -> Result<Node> {
        let token = match self.advance() {
            Some(token) => token,
            None => return Err(self.unexpected()),
        };

        match token {
            Token::Int(i) => Ok(Node::Lit(Value::Int(i))),
            Token::Float(f) => Ok(Node::Lit(Value::Float(f))),
            Token::Str(s) => Ok(Node::Lit(Value::Str(SmartString::from(s)))),
            Token::Sym(s) => Ok(Node::Lit(Value::Sym(SmartString::from(s)))),
            Token::Global(name) => Ok(Node::Global(name)),
            Token::LParen => {
                let mut body = self.parse_stmts(&[], true)?;
                self.expect(Token::RParen)?;
                Ok(match body.len() {
                    0 => Node::Lit(Value::Nil),
                    1 => body.remove(0),
                    _ => Node::Seq(body),
                })
            }
            Token::LBracket => self.parse_list(Token::RBracket).map(Node::Array),
            Token::Ident(name) => match name.as_str() {
                "nil" => Ok(Node::Lit(Value::Nil)),
                "true" => Ok(Node::Lit(Value::Bool(true))),
                "false" => Ok(Node::Lit(Value::Bool(false))),
                "if" => self.parse_if(),
                "unless" => self.parse_unless(),
                "while" => self.parse_while(),
                "def" => self.parse_def(),
                kw if is_keyword(kw) => {
                    self.pos -= 1;
                    Err(self.unexpected())
                }
                _ => Ok(match self.parse_call_args()? {
                    Some(args) => Node::Call {
                        recv: None,
                        name,
                        args,
                    },
                    None => Node::Ident(name),
                }),
            },
            _ => {
                self.pos -= 1;
                Err(self.unexpected())
            }
        }
    }

    fn parse_if(&mut self) -> Result<Node> {
        let cond = self.parse_expr()?;
        self.eat_keyword("then");
        let then_branch = self.parse_stmts(&["elsif", "else", "end"], false)?;
        let else_branch = if self.eat_keyword("elsif") {
            vec![self.nested(Parser::parse_if)?]
        } else if self.eat_keyword("else") {
            let body = self.parse_stmts(&["end"], false)?;
            self.expect_keyword("end")?;
            body
        } else {
            self.expect_keyword("end")?;
            Vec::new()
        };
        Ok(Node::If {
            cond: Box::new(cond),
            then_branch,
            else_branch,
        })
    }

    fn parse_unless(&mut self) -> Result<Node> {
        let cond = self.parse_expr()?;
        self.eat_keyword("then");
        let body = self.parse_stmts(&["else", "end"], false)?;
        let else_body = if self.eat_keyword("else") {
            self.parse_stmts(&["end"], false)?
        } else {
            Vec::new()
        };
        self.expect_keyword("end")?;
        Ok(Node::If {
            cond: Box::new(cond),
            then_branch: else_body,
            else_branch: body,
        })
    }

    fn parse_while(&mut self) -> Result<Node> {
        let cond = self.parse_expr()?;
        self.eat_keyword("do");
        let body = self.parse_stmts(&["end"], false)?;
        self.expect_keyword("end")?;
        Ok(Node::While {
            cond: Box::new(cond),
            body,
        })
    }

    fn parse_def(&mut self) -> Result<Node> {
        let name = match self.peek() {
            Some(Token::Ident(name)) if !is_keyword(name) => name.clone(),
            _ => return Err(self.unexpected_expecting("method name")),
        };
        self.pos += 1;

        let mut params = Vec::new();
        let parens = self.eat(&Token::LParen);
        if parens || matches!(self.peek(), Some(Token::Ident(_))) {
            loop {
                self.skip_newlines_if(parens);
                match self.peek() {
                    Some(Token::Ident(p)) if !is_keyword(p) => {
                        params.push(p.clone());
                        self.pos += 1;
                    }
                    Some(Token::RParen) if parens && params.is_empty() => {}
                    _ => return Err(self.unexpected_expecting("parameter name")),
                }
                self.skip_newlines_if(parens);
                if !self.eat(&Token::Comma) {
                    break;
                }
            }
            if parens {
                self.expect(Token::RParen)?;
            }
        }

        let body = self.parse_stmts(&["end"], false)?;
        self.expect_keyword("end")?;
        Ok(Node::Def(Arc::new(FnDef { name, params, body })))
    }

    fn skip_newlines_if(&mut self, cond: bool) {
        if cond {
            self.skip_newlines();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read_all(src: &str) -> Result<Option<Statement>> {
        let mut reader = Reader::new();
        let mut last = Ok(None);
        for (i, line) in src.split_inclusive('\n').enumerate() {
            last = reader.push_line(line, i + 1);
        }
        last
    }

    fn parse(src: &str) -> Vec<Node> {
        read_all(src).unwrap().unwrap().nodes
    }

    fn call(name: &str, args: Vec<Node>) -> Node {
        Node::Call {
            recv: None,
            name: name.to_string(),
            args,
        }
    }

    fn int(i: i64) -> Node {
        Node::Lit(Value::Int(i))
    }

    #[test]
    fn command_call_without_parens() {
        assert_eq!(
            parse("puts 1+1\n"),
            vec![call(
                "puts",
                vec![Node::Binary(BinOp::Add, Box::new(int(1)), Box::new(int(1)))]
            )]
        );
    }

    #[test]
    fn paren_call_and_index_need_adjacency() {
        assert_eq!(parse("f(1, 2)\n"), vec![call("f", vec![int(1), int(2)])]);
        assert_eq!(
            parse("a[0]\n"),
            vec![Node::Index(Box::new(Node::Ident("a".into())), Box::new(int(0)))]
        );
        assert_eq!(
            parse("p [0]\n"),
            vec![call("p", vec![Node::Array(vec![int(0)])])]
        );
    }

    #[test]
    fn power_binds_tighter_than_negation() {
        assert_eq!(
            parse("-2 ** 2\n"),
            vec![Node::Unary(
                UnOp::Neg,
                Box::new(Node::Binary(BinOp::Pow, Box::new(int(2)), Box::new(int(2))))
            )]
        );
    }

    #[test]
    fn modifier_if_does_not_open_a_block() {
        let mut reader = Reader::new();
        let stmt = reader.push_line("x = 1 if true\n", 1).unwrap();
        assert!(stmt.is_some());
        assert_eq!(reader.state(), ReadState::Start);
    }

    #[test]
    fn def_spans_lines() {
        let mut reader = Reader::new();
        assert_eq!(reader.push_line("def add(a, b)\n", 1), Ok(None));
        assert_eq!(reader.state(), ReadState::Continue);
        assert_eq!(reader.indent(), 1);
        assert_eq!(reader.push_line("  a + b\n", 2), Ok(None));
        let stmt = reader.push_line("end\n", 3).unwrap().unwrap();
        assert_eq!(stmt.line, 1);
        assert_eq!(stmt.source, "def add(a, b)\n  a + b\nend\n");
        match &stmt.nodes[0] {
            Node::Def(def) => {
                assert_eq!(def.name, "add");
                assert_eq!(def.params, vec!["a".to_string(), "b".to_string()]);
            }
            other => panic!("expected def, got {:?}", other),
        }
        assert_eq!(reader.indent(), 0);
    }

    #[test]
    fn trailing_operator_continues() {
        let mut reader = Reader::new();
        assert_eq!(reader.push_line("1 +\n", 1), Ok(None));
        assert_eq!(reader.state(), ReadState::Continue);
        let stmt = reader.push_line("2\n", 2).unwrap().unwrap();
        assert_eq!(
            stmt.nodes,
            vec![Node::Binary(BinOp::Add, Box::new(int(1)), Box::new(int(2)))]
        );
    }

    #[test]
    fn string_literal_spans_lines() {
        let mut reader = Reader::new();
        assert_eq!(reader.push_line("s = \"a\n", 1), Ok(None));
        assert_eq!(reader.state(), ReadState::InString('"'));
        let stmt = reader.push_line("b\"\n", 2).unwrap().unwrap();
        assert_eq!(
            stmt.nodes,
            vec![Node::Assign(
                "s".into(),
                Box::new(Node::Lit(Value::str("a\nb")))
            )]
        );
    }

    #[test]
    fn escapes_follow_quote_style() {
        assert_eq!(
            parse("\"a\\tb\"\n"),
            vec![Node::Lit(Value::str("a\tb"))]
        );
        assert_eq!(
            parse("'a\\tb\\''\n"),
            vec![Node::Lit(Value::str("a\\tb'"))]
        );
    }

    #[test]
    fn blank_and_comment_lines_are_not_statements() {
        let mut reader = Reader::new();
        assert_eq!(reader.push_line("\n", 1), Ok(None));
        assert_eq!(reader.push_line("# just a comment\n", 2), Ok(None));
        assert_eq!(reader.state(), ReadState::Start);
    }

    #[test]
    fn syntax_error_resets_reader() {
        let mut reader = Reader::new();
        assert!(reader.push_line("(1 + 2\n", 1).unwrap().is_none());
        assert!(matches!(reader.push_line("))\n", 2), Err(WirbErr::Syntax(_))));
        assert_eq!(reader.state(), ReadState::Start);
        assert!(reader.push_line("1\n", 3).unwrap().is_some());
    }

    #[test]
    fn invalid_character_is_reported() {
        assert_eq!(
            read_all("1 @ 2\n"),
            Err(WirbErr::Syntax("Invalid char '@' in expression".to_string()))
        );
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let src = format!("{}1{}\n", "(".repeat(300), ")".repeat(300));
        assert!(matches!(read_all(&src), Err(WirbErr::Syntax(_))));
    }

    #[test]
    fn long_chains_count_as_nesting() {
        let too_deep = Err(WirbErr::Syntax("expression nested too deeply".to_string()));
        for src in [
            format!("1{}\n", "+1".repeat(200_000)),
            format!("1{}\n", " * 2 - 1".repeat(100)),
            format!("x{}\n", ".abs".repeat(100)),
            format!("a{}\n", "[0]".repeat(100)),
            format!("x{}\n", " and y".repeat(100)),
            format!("x{}\n", " if y".repeat(100)),
        ] {
            assert_eq!(read_all(&src), too_deep);
        }
    }

    #[test]
    fn chains_release_their_depth() {
        // Many short chains side by side are fine.
        let sum = vec!["(1 + 2 + 3)"; 40].join(" + ");
        assert!(read_all(&format!("{}\n", sum)).is_ok());
        assert!(read_all(&format!("[{}]\n", vec!["a.b.c"; 100].join(", "))).is_ok());
    }

    #[test]
    fn if_elsif_else_chain() {
        let nodes = parse("if x then 1 elsif y then 2 else 3 end\n");
        match &nodes[0] {
            Node::If { else_branch, .. } => match &else_branch[0] {
                Node::If { else_branch, .. } => assert_eq!(else_branch, &vec![int(3)]),
                other => panic!("expected elsif, got {:?}", other),
            },
            other => panic!("expected if, got {:?}", other),
        }
    }
}
