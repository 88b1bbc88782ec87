use crate::frontend::position::Position;
use crate::frontend::token::{StringKind, TokenType};

/// A parsed source file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub statements: Vec<Statement>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchKind {
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Expr {
        expr: Expression,
    },
    IncDec {
        lhs: Expression,
        increment: bool,
        pos: Position,
    },
    Assign {
        lhs: Vec<Expression>,
        rhs: Vec<Expression>,
        op: TokenType,
        pos: Position,
    },
    If {
        init: Option<Box<Statement>>,
        cond: Expression,
        body: Box<Statement>,
        alt: Option<Box<Statement>>,
        pos: Position,
    },
    For {
        init: Option<Box<Statement>>,
        cond: Option<Expression>,
        post: Option<Box<Statement>>,
        body: Box<Statement>,
        pos: Position,
    },
    ForIn {
        key: Option<String>,
        value: Option<String>,
        iterable: Expression,
        body: Box<Statement>,
        pos: Position,
    },
    Branch {
        kind: BranchKind,
        label: Option<String>,
        pos: Position,
    },
    Labeled {
        label: String,
        stmt: Box<Statement>,
        pos: Position,
    },
    Block {
        statements: Vec<Statement>,
        pos: Position,
    },
    /// Body of a `fn(...) => expr` literal; evaluates and returns the
    /// expression.
    ShortFuncBody {
        expr: Expression,
    },
    Return {
        results: Vec<Expression>,
        pos: Position,
    },
    Defer {
        call: Expression,
        pos: Position,
    },
    Throw {
        values: Vec<Expression>,
        pos: Position,
    },
    Export {
        result: Expression,
        pos: Position,
    },
}

impl Statement {
    pub fn pos(&self) -> Position {
        match self {
            Statement::Expr { expr } => expr.pos(),
            Statement::IncDec { pos, .. }
            | Statement::Assign { pos, .. }
            | Statement::If { pos, .. }
            | Statement::For { pos, .. }
            | Statement::ForIn { pos, .. }
            | Statement::Branch { pos, .. }
            | Statement::Labeled { pos, .. }
            | Statement::Block { pos, .. }
            | Statement::Return { pos, .. }
            | Statement::Defer { pos, .. }
            | Statement::Throw { pos, .. }
            | Statement::Export { pos, .. } => *pos,
            Statement::ShortFuncBody { expr } => expr.pos(),
        }
    }
}

/// One compiled piece of an interpolated string literal.
#[derive(Debug, Clone, PartialEq)]
pub enum StringPart {
    Text(String),
    Interp(Expression),
}

#[derive(Debug, Clone, PartialEq)]
pub struct FuncParams {
    /// Declared parameter names, in order; the varargs collector is last.
    pub names: Vec<String>,
    /// Count of trailing optional parameters (marked with `?`).
    pub num_optionals: usize,
    pub var_args: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Ident {
        name: String,
        pos: Position,
    },
    IntLit {
        value: i64,
        pos: Position,
    },
    FloatLit {
        value: f64,
        pos: Position,
    },
    BoolLit {
        value: bool,
        pos: Position,
    },
    CharLit {
        value: char,
        pos: Position,
    },
    NilLit {
        pos: Position,
    },
    StringLit {
        parts: Vec<StringPart>,
        kind: StringKind,
        pos: Position,
    },
    Paren {
        expr: Box<Expression>,
        pos: Position,
    },
    Unary {
        op: TokenType,
        operand: Box<Expression>,
        pos: Position,
    },
    Binary {
        op: TokenType,
        lhs: Box<Expression>,
        rhs: Box<Expression>,
        pos: Position,
    },
    Cond {
        cond: Box<Expression>,
        then: Box<Expression>,
        alt: Box<Expression>,
        pos: Position,
    },
    ArrayLit {
        elements: Vec<Expression>,
        pos: Position,
    },
    TableLit {
        entries: Vec<(Expression, Expression)>,
        pos: Position,
    },
    TupleLit {
        elements: Vec<Expression>,
        pos: Position,
    },
    Selector {
        expr: Box<Expression>,
        field: String,
        pos: Position,
    },
    Index {
        expr: Box<Expression>,
        index: Box<Expression>,
        pos: Position,
    },
    Slice {
        expr: Box<Expression>,
        low: Option<Box<Expression>>,
        high: Option<Box<Expression>>,
        pos: Position,
    },
    FuncLit {
        params: FuncParams,
        body: Box<Statement>,
        pos: Position,
    },
    Call {
        func: Box<Expression>,
        args: Vec<Expression>,
        pos: Position,
    },
    Splat {
        expr: Box<Expression>,
        pos: Position,
    },
    Import {
        module: String,
        pos: Position,
    },
    Try {
        call: Box<Expression>,
        pos: Position,
    },
}

impl Expression {
    pub fn pos(&self) -> Position {
        match self {
            Expression::Ident { pos, .. }
            | Expression::IntLit { pos, .. }
            | Expression::FloatLit { pos, .. }
            | Expression::BoolLit { pos, .. }
            | Expression::CharLit { pos, .. }
            | Expression::NilLit { pos }
            | Expression::StringLit { pos, .. }
            | Expression::Paren { pos, .. }
            | Expression::Unary { pos, .. }
            | Expression::Binary { pos, .. }
            | Expression::Cond { pos, .. }
            | Expression::ArrayLit { pos, .. }
            | Expression::TableLit { pos, .. }
            | Expression::TupleLit { pos, .. }
            | Expression::Selector { pos, .. }
            | Expression::Index { pos, .. }
            | Expression::Slice { pos, .. }
            | Expression::FuncLit { pos, .. }
            | Expression::Call { pos, .. }
            | Expression::Splat { pos, .. }
            | Expression::Import { pos, .. }
            | Expression::Try { pos, .. } => *pos,
        }
    }

    /// Unwraps grouping parentheses.
    pub fn unparenthesized(&self) -> &Expression {
        match self {
            Expression::Paren { expr, .. } => expr.unparenthesized(),
            other => other,
        }
    }
}
