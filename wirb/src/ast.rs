use std::sync::Arc;

use crate::wirb::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    Lit(Value),
    /// A bare name: a local variable, or a call without arguments.
    Ident(String),
    Global(String),
    Array(Vec<Node>),
    Assign(String, Box<Node>),
    GlobalAssign(String, Box<Node>),
    Unary(UnOp, Box<Node>),
    Binary(BinOp, Box<Node>, Box<Node>),
    Call {
        recv: Option<Box<Node>>,
        name: String,
        args: Vec<Node>,
    },
    Index(Box<Node>, Box<Node>),
    If {
        cond: Box<Node>,
        then_branch: Vec<Node>,
        else_branch: Vec<Node>,
    },
    While {
        cond: Box<Node>,
        body: Vec<Node>,
    },
    Def(Arc<FnDef>),
    Seq(Vec<Node>),
}

#[derive(Debug, PartialEq)]
pub struct FnDef {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Node>,
}

/// One complete unit of input, ready for evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    /// Line number the statement started on.
    pub line: usize,
    pub source: String,
    pub nodes: Vec<Node>,
}
