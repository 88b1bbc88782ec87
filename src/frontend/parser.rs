use std::fmt;

use crate::frontend::ast::{
    BranchKind, Expression, FuncParams, Program, Statement, StringPart,
};
use crate::frontend::lexer::Lexer;
use crate::frontend::position::Position;
use crate::frontend::token::{RawStringPart, Token, TokenType};

#[derive(Debug, Clone, PartialEq)]
pub struct ParseError {
    pub message: String,
    pub pos: Position,
}

impl ParseError {
    fn new(message: impl Into<String>, pos: Position) -> Self {
        Self {
            message: message.into(),
            pos,
        }
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} at {}", self.message, self.pos)
    }
}

type PResult<T> = Result<T, ParseError>;

// Binding powers, loosest first.
const PREC_LOWEST: u8 = 0;
const PREC_TERNARY: u8 = 1;
const PREC_NULLISH: u8 = 2;
const PREC_OR: u8 = 3;
const PREC_AND: u8 = 4;
const PREC_COMPARE: u8 = 5;
const PREC_SUM: u8 = 6;
const PREC_PRODUCT: u8 = 7;
const PREC_UNARY: u8 = 8;
const PREC_POSTFIX: u8 = 9;

fn precedence(kind: TokenType) -> u8 {
    match kind {
        TokenType::Question => PREC_TERNARY,
        TokenType::Nullish => PREC_NULLISH,
        TokenType::OrOr => PREC_OR,
        TokenType::AndAnd => PREC_AND,
        TokenType::Eq
        | TokenType::NotEq
        | TokenType::Lt
        | TokenType::LtEq
        | TokenType::Gt
        | TokenType::GtEq => PREC_COMPARE,
        TokenType::Plus | TokenType::Minus | TokenType::Pipe | TokenType::Caret => PREC_SUM,
        TokenType::Star
        | TokenType::Slash
        | TokenType::Percent
        | TokenType::Shl
        | TokenType::Shr
        | TokenType::Amp
        | TokenType::AmpCaret => PREC_PRODUCT,
        TokenType::LParen | TokenType::LBracket | TokenType::Dot => PREC_POSTFIX,
        _ => PREC_LOWEST,
    }
}

/// Recursive-descent parser with Pratt expression parsing over the full
/// token vector (arbitrary lookahead).
pub struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    pub fn parse(input: impl AsRef<str>) -> Result<Program, ParseError> {
        let mut parser = Parser {
            tokens: Lexer::tokenize(input),
            pos: 0,
        };
        parser.parse_program()
    }

    /// Parses a single expression out of raw source; used for string
    /// interpolation bodies. Errors are re-anchored at `at`.
    pub(crate) fn parse_expression_source(source: &str, at: Position) -> PResult<Expression> {
        let mut parser = Parser {
            tokens: Lexer::tokenize(source),
            pos: 0,
        };
        let expr = parser
            .parse_expression(PREC_LOWEST)
            .map_err(|err| ParseError::new(err.message, at))?;
        if parser.cur_kind() != TokenType::Eof {
            return Err(ParseError::new("unexpected tokens in interpolation", at));
        }
        Ok(expr)
    }

    fn cur(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn cur_kind(&self) -> TokenType {
        self.cur().kind
    }

    fn cur_pos(&self) -> Position {
        self.cur().pos
    }

    fn kind_at(&self, offset: usize) -> TokenType {
        self.tokens
            .get(self.pos + offset)
            .map(|t| t.kind)
            .unwrap_or(TokenType::Eof)
    }

    fn advance(&mut self) -> Token {
        let token = self.cur().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, kind: TokenType) -> bool {
        if self.cur_kind() == kind {
            self.advance();
            return true;
        }
        false
    }

    fn expect(&mut self, kind: TokenType) -> PResult<Token> {
        if self.cur_kind() == kind {
            return Ok(self.advance());
        }
        Err(self.unexpected(&format!("expected {:?}", kind.to_string())))
    }

    fn unexpected(&self, context: &str) -> ParseError {
        let cur = self.cur();
        if cur.kind == TokenType::Illegal {
            return ParseError::new(cur.literal.clone(), cur.pos);
        }
        ParseError::new(
            format!("{}, found {:?}", context, cur.kind.to_string()),
            cur.pos,
        )
    }

    fn skip_semicolons(&mut self) {
        while self.cur_kind() == TokenType::Semicolon {
            self.advance();
        }
    }

    fn parse_program(&mut self) -> PResult<Program> {
        let mut statements = Vec::new();
        self.skip_semicolons();
        while self.cur_kind() != TokenType::Eof {
            statements.push(self.parse_statement()?);
            self.skip_semicolons();
        }
        Ok(Program { statements })
    }

    // ---------------------------------------------------------------
    // Statements
    // ---------------------------------------------------------------

    fn parse_statement(&mut self) -> PResult<Statement> {
        match self.cur_kind() {
            TokenType::If => self.parse_if(),
            TokenType::For => self.parse_for(),
            TokenType::LBrace => self.parse_block(),
            TokenType::Return => self.parse_return(),
            TokenType::Break | TokenType::Continue => self.parse_branch(),
            TokenType::Defer => self.parse_defer(),
            TokenType::Throw => self.parse_throw(),
            TokenType::Export => self.parse_export(),
            TokenType::Ident if self.kind_at(1) == TokenType::Colon => self.parse_labeled(),
            _ => self.parse_simple_statement(),
        }
    }

    /// Expression statements, assignments and `++`/`--`; also used for the
    /// init and post clauses of `if` and `for`.
    fn parse_simple_statement(&mut self) -> PResult<Statement> {
        let pos = self.cur_pos();
        let lhs = self.parse_expression_list()?;

        let kind = self.cur_kind();
        if kind.is_assign_op() {
            let op = self.advance().kind;
            let rhs = self.parse_expression_list()?;
            return Ok(Statement::Assign { lhs, rhs, op, pos });
        }
        if matches!(kind, TokenType::Inc | TokenType::Dec) {
            self.advance();
            if lhs.len() != 1 {
                return Err(ParseError::new("expected a single operand", pos));
            }
            let lhs = lhs.into_iter().next().unwrap();
            return Ok(Statement::IncDec {
                lhs,
                increment: kind == TokenType::Inc,
                pos,
            });
        }
        if lhs.len() != 1 {
            return Err(ParseError::new("unexpected expression list", pos));
        }
        Ok(Statement::Expr {
            expr: lhs.into_iter().next().unwrap(),
        })
    }

    fn parse_block(&mut self) -> PResult<Statement> {
        let pos = self.expect(TokenType::LBrace)?.pos;
        let mut statements = Vec::new();
        self.skip_semicolons();
        while !matches!(self.cur_kind(), TokenType::RBrace | TokenType::Eof) {
            statements.push(self.parse_statement()?);
            self.skip_semicolons();
        }
        self.expect(TokenType::RBrace)?;
        Ok(Statement::Block { statements, pos })
    }

    fn parse_if(&mut self) -> PResult<Statement> {
        let pos = self.expect(TokenType::If)?.pos;
        let first = self.parse_simple_statement()?;

        let (init, cond) = if self.eat(TokenType::Semicolon) {
            let cond_stmt = self.parse_simple_statement()?;
            (Some(Box::new(first)), Self::expect_condition(cond_stmt)?)
        } else {
            (None, Self::expect_condition(first)?)
        };

        let body = Box::new(self.parse_block()?);
        let alt = if self.eat(TokenType::Else) {
            let stmt = if self.cur_kind() == TokenType::If {
                self.parse_if()?
            } else {
                self.parse_block()?
            };
            Some(Box::new(stmt))
        } else {
            None
        };
        Ok(Statement::If {
            init,
            cond,
            body,
            alt,
            pos,
        })
    }

    fn expect_condition(stmt: Statement) -> PResult<Expression> {
        match stmt {
            Statement::Expr { expr } => Ok(expr),
            other => Err(ParseError::new("expected a condition", other.pos())),
        }
    }

    fn parse_for(&mut self) -> PResult<Statement> {
        let pos = self.expect(TokenType::For)?.pos;

        if self.cur_kind() == TokenType::LBrace {
            let body = Box::new(self.parse_block()?);
            return Ok(Statement::For {
                init: None,
                cond: None,
                post: None,
                body,
                pos,
            });
        }

        if self.is_for_in() {
            return self.parse_for_in(pos);
        }

        let first = self.parse_simple_statement()?;
        if self.eat(TokenType::Semicolon) {
            let cond = if self.cur_kind() == TokenType::Semicolon {
                None
            } else {
                Some(Self::expect_condition(self.parse_simple_statement()?)?)
            };
            self.expect(TokenType::Semicolon)?;
            let post = if self.cur_kind() == TokenType::LBrace {
                None
            } else {
                Some(Box::new(self.parse_simple_statement()?))
            };
            let body = Box::new(self.parse_block()?);
            return Ok(Statement::For {
                init: Some(Box::new(first)),
                cond,
                post,
                body,
                pos,
            });
        }

        let cond = Self::expect_condition(first)?;
        let body = Box::new(self.parse_block()?);
        Ok(Statement::For {
            init: None,
            cond: Some(cond),
            post: None,
            body,
            pos,
        })
    }

    fn is_for_in(&self) -> bool {
        if self.cur_kind() != TokenType::Ident {
            return false;
        }
        match self.kind_at(1) {
            TokenType::In => true,
            TokenType::Comma => {
                self.kind_at(2) == TokenType::Ident && self.kind_at(3) == TokenType::In
            }
            _ => false,
        }
    }

    fn parse_for_in(&mut self, pos: Position) -> PResult<Statement> {
        let first = self.expect(TokenType::Ident)?.literal;
        let second = if self.eat(TokenType::Comma) {
            Some(self.expect(TokenType::Ident)?.literal)
        } else {
            None
        };
        self.expect(TokenType::In)?;
        let iterable = self.parse_expression(PREC_LOWEST)?;
        let body = Box::new(self.parse_block()?);

        let discard = |name: String| if name == "_" { None } else { Some(name) };
        // One name binds the key (index); two bind key and value.
        let (key, value) = match second {
            Some(second) => (discard(first), discard(second)),
            None => (discard(first), None),
        };
        Ok(Statement::ForIn {
            key,
            value,
            iterable,
            body,
            pos,
        })
    }

    fn parse_return(&mut self) -> PResult<Statement> {
        let pos = self.expect(TokenType::Return)?.pos;
        let results = if matches!(
            self.cur_kind(),
            TokenType::Semicolon | TokenType::RBrace | TokenType::Eof
        ) {
            Vec::new()
        } else {
            self.parse_expression_list()?
        };
        Ok(Statement::Return { results, pos })
    }

    fn parse_branch(&mut self) -> PResult<Statement> {
        let token = self.advance();
        let kind = if token.kind == TokenType::Break {
            BranchKind::Break
        } else {
            BranchKind::Continue
        };
        let label = if self.cur_kind() == TokenType::Ident {
            Some(self.advance().literal)
        } else {
            None
        };
        Ok(Statement::Branch {
            kind,
            label,
            pos: token.pos,
        })
    }

    fn parse_defer(&mut self) -> PResult<Statement> {
        let pos = self.expect(TokenType::Defer)?.pos;
        let call = self.parse_expression(PREC_LOWEST)?;
        if !matches!(call.unparenthesized(), Expression::Call { .. }) {
            return Err(ParseError::new("defer requires a function call", pos));
        }
        Ok(Statement::Defer { call, pos })
    }

    fn parse_throw(&mut self) -> PResult<Statement> {
        let pos = self.expect(TokenType::Throw)?.pos;
        let values = if matches!(
            self.cur_kind(),
            TokenType::Semicolon | TokenType::RBrace | TokenType::Eof
        ) {
            Vec::new()
        } else {
            self.parse_expression_list()?
        };
        Ok(Statement::Throw { values, pos })
    }

    fn parse_export(&mut self) -> PResult<Statement> {
        let pos = self.expect(TokenType::Export)?.pos;
        let result = self.parse_expression(PREC_LOWEST)?;
        Ok(Statement::Export { result, pos })
    }

    fn parse_labeled(&mut self) -> PResult<Statement> {
        let label_token = self.expect(TokenType::Ident)?;
        self.expect(TokenType::Colon)?;
        let stmt = self.parse_statement()?;
        Ok(Statement::Labeled {
            label: label_token.literal,
            stmt: Box::new(stmt),
            pos: label_token.pos,
        })
    }

    // ---------------------------------------------------------------
    // Expressions
    // ---------------------------------------------------------------

    fn parse_expression_list(&mut self) -> PResult<Vec<Expression>> {
        let mut list = vec![self.parse_expression(PREC_LOWEST)?];
        while self.eat(TokenType::Comma) {
            list.push(self.parse_expression(PREC_LOWEST)?);
        }
        Ok(list)
    }

    fn parse_expression(&mut self, min_prec: u8) -> PResult<Expression> {
        let mut expr = self.parse_prefix()?;
        loop {
            let prec = precedence(self.cur_kind());
            if prec <= min_prec {
                break;
            }
            expr = self.parse_infix(expr, prec)?;
        }
        Ok(expr)
    }

    fn parse_prefix(&mut self) -> PResult<Expression> {
        let pos = self.cur_pos();
        match self.cur_kind() {
            TokenType::Ident => {
                let name = self.advance().literal;
                Ok(Expression::Ident { name, pos })
            }
            TokenType::Int => {
                let literal = self.advance().literal;
                let value = if let Some(hex) = literal
                    .strip_prefix("0x")
                    .or_else(|| literal.strip_prefix("0X"))
                {
                    i64::from_str_radix(hex, 16)
                } else {
                    literal.parse::<i64>()
                };
                match value {
                    Ok(value) => Ok(Expression::IntLit { value, pos }),
                    Err(_) => Err(ParseError::new(
                        format!("invalid integer literal {:?}", literal),
                        pos,
                    )),
                }
            }
            TokenType::Float => {
                let literal = self.advance().literal;
                match literal.parse::<f64>() {
                    Ok(value) => Ok(Expression::FloatLit { value, pos }),
                    Err(_) => Err(ParseError::new(
                        format!("invalid float literal {:?}", literal),
                        pos,
                    )),
                }
            }
            TokenType::Char => {
                let literal = self.advance().literal;
                let value = literal.chars().next().unwrap_or('\0');
                Ok(Expression::CharLit { value, pos })
            }
            TokenType::String => self.parse_string_literal(),
            TokenType::True | TokenType::False => {
                let value = self.advance().kind == TokenType::True;
                Ok(Expression::BoolLit { value, pos })
            }
            TokenType::Nil => {
                self.advance();
                Ok(Expression::NilLit { pos })
            }
            TokenType::Minus | TokenType::Bang | TokenType::Plus | TokenType::Caret => {
                let op = self.advance().kind;
                let operand = self.parse_expression(PREC_UNARY)?;
                Ok(Expression::Unary {
                    op,
                    operand: Box::new(operand),
                    pos,
                })
            }
            TokenType::Ellipsis => {
                self.advance();
                let expr = self.parse_expression(PREC_UNARY)?;
                Ok(Expression::Splat {
                    expr: Box::new(expr),
                    pos,
                })
            }
            TokenType::LParen => self.parse_paren_or_tuple(),
            TokenType::LBracket => self.parse_array_literal(),
            TokenType::LBrace => self.parse_table_literal(),
            TokenType::Fn => self.parse_func_literal(),
            TokenType::Import => self.parse_import(),
            TokenType::Try => self.parse_try(),
            _ => Err(self.unexpected("expected an expression")),
        }
    }

    fn parse_infix(&mut self, lhs: Expression, prec: u8) -> PResult<Expression> {
        let pos = self.cur_pos();
        match self.cur_kind() {
            TokenType::LParen => self.parse_call(lhs),
            TokenType::LBracket => self.parse_index_or_slice(lhs),
            TokenType::Dot => {
                self.advance();
                let field = self.expect(TokenType::Ident)?.literal;
                Ok(Expression::Selector {
                    expr: Box::new(lhs),
                    field,
                    pos,
                })
            }
            TokenType::Question => {
                self.advance();
                let then = self.parse_expression(PREC_LOWEST)?;
                self.expect(TokenType::Colon)?;
                let alt = self.parse_expression(PREC_LOWEST)?;
                Ok(Expression::Cond {
                    cond: Box::new(lhs),
                    then: Box::new(then),
                    alt: Box::new(alt),
                    pos,
                })
            }
            kind => {
                self.advance();
                let rhs = self.parse_expression(prec)?;
                Ok(Expression::Binary {
                    op: kind,
                    lhs: Box::new(lhs),
                    rhs: Box::new(rhs),
                    pos,
                })
            }
        }
    }

    fn parse_string_literal(&mut self) -> PResult<Expression> {
        let token = self.advance();
        let string = token
            .string
            .clone()
            .expect("string token without string payload");
        let mut parts = Vec::with_capacity(string.parts.len());
        for part in string.parts {
            match part {
                RawStringPart::Text(text) => parts.push(StringPart::Text(text)),
                RawStringPart::Interp { source, pos } => {
                    parts.push(StringPart::Interp(Self::parse_expression_source(
                        &source, pos,
                    )?));
                }
            }
        }
        Ok(Expression::StringLit {
            parts,
            kind: string.kind,
            pos: token.pos,
        })
    }

    fn parse_paren_or_tuple(&mut self) -> PResult<Expression> {
        let pos = self.expect(TokenType::LParen)?.pos;
        if self.eat(TokenType::RParen) {
            return Ok(Expression::TupleLit {
                elements: Vec::new(),
                pos,
            });
        }
        let first = self.parse_expression(PREC_LOWEST)?;
        if self.cur_kind() == TokenType::Comma {
            let mut elements = vec![first];
            while self.eat(TokenType::Comma) {
                if self.cur_kind() == TokenType::RParen {
                    break;
                }
                elements.push(self.parse_expression(PREC_LOWEST)?);
            }
            self.expect(TokenType::RParen)?;
            return Ok(Expression::TupleLit { elements, pos });
        }
        self.expect(TokenType::RParen)?;
        Ok(Expression::Paren {
            expr: Box::new(first),
            pos,
        })
    }

    fn parse_array_literal(&mut self) -> PResult<Expression> {
        let pos = self.expect(TokenType::LBracket)?.pos;
        let mut elements = Vec::new();
        while !matches!(self.cur_kind(), TokenType::RBracket | TokenType::Eof) {
            elements.push(self.parse_expression(PREC_LOWEST)?);
            if !self.eat(TokenType::Comma) {
                break;
            }
        }
        self.expect(TokenType::RBracket)?;
        Ok(Expression::ArrayLit { elements, pos })
    }

    fn parse_table_literal(&mut self) -> PResult<Expression> {
        let pos = self.expect(TokenType::LBrace)?.pos;
        let mut entries = Vec::new();
        while !matches!(self.cur_kind(), TokenType::RBrace | TokenType::Eof) {
            let key_pos = self.cur_pos();
            let key = match self.cur_kind() {
                // Bare identifiers are string keys.
                TokenType::Ident => {
                    let name = self.advance().literal;
                    Expression::StringLit {
                        parts: vec![StringPart::Text(name)],
                        kind: crate::frontend::token::StringKind::DoubleQuote,
                        pos: key_pos,
                    }
                }
                TokenType::String | TokenType::Int | TokenType::Char => self.parse_prefix()?,
                _ => return Err(self.unexpected("expected a table key")),
            };
            self.expect(TokenType::Colon)?;
            let value = self.parse_expression(PREC_LOWEST)?;
            entries.push((key, value));
            if !self.eat(TokenType::Comma) {
                break;
            }
        }
        self.expect(TokenType::RBrace)?;
        Ok(Expression::TableLit { entries, pos })
    }

    fn parse_func_literal(&mut self) -> PResult<Expression> {
        let pos = self.expect(TokenType::Fn)?.pos;
        self.expect(TokenType::LParen)?;

        let mut names = Vec::new();
        let mut num_optionals = 0usize;
        let mut var_args = false;
        while !matches!(self.cur_kind(), TokenType::RParen | TokenType::Eof) {
            if var_args {
                return Err(ParseError::new(
                    "varargs parameter must be last",
                    self.cur_pos(),
                ));
            }
            if self.eat(TokenType::Ellipsis) {
                var_args = true;
            }
            let name = self.expect(TokenType::Ident)?;
            if self.eat(TokenType::Question) {
                if var_args {
                    return Err(ParseError::new(
                        "varargs parameter cannot be optional",
                        name.pos,
                    ));
                }
                num_optionals += 1;
            } else if num_optionals > 0 && !var_args {
                return Err(ParseError::new(
                    "optional parameters must be trailing",
                    name.pos,
                ));
            }
            names.push(name.literal);
            if !self.eat(TokenType::Comma) {
                break;
            }
        }
        self.expect(TokenType::RParen)?;

        let body = if self.eat(TokenType::Arrow) {
            let expr = self.parse_expression(PREC_LOWEST)?;
            Statement::ShortFuncBody { expr }
        } else {
            self.parse_block()?
        };

        Ok(Expression::FuncLit {
            params: FuncParams {
                names,
                num_optionals,
                var_args,
            },
            body: Box::new(body),
            pos,
        })
    }

    fn parse_call(&mut self, func: Expression) -> PResult<Expression> {
        let pos = self.expect(TokenType::LParen)?.pos;
        let mut args = Vec::new();
        while !matches!(self.cur_kind(), TokenType::RParen | TokenType::Eof) {
            args.push(self.parse_expression(PREC_LOWEST)?);
            if !self.eat(TokenType::Comma) {
                break;
            }
        }
        self.expect(TokenType::RParen)?;
        Ok(Expression::Call {
            func: Box::new(func),
            args,
            pos,
        })
    }

    fn parse_index_or_slice(&mut self, expr: Expression) -> PResult<Expression> {
        let pos = self.expect(TokenType::LBracket)?.pos;

        if self.eat(TokenType::Colon) {
            let high = if self.cur_kind() == TokenType::RBracket {
                None
            } else {
                Some(Box::new(self.parse_expression(PREC_LOWEST)?))
            };
            self.expect(TokenType::RBracket)?;
            return Ok(Expression::Slice {
                expr: Box::new(expr),
                low: None,
                high,
                pos,
            });
        }

        let first = self.parse_expression(PREC_LOWEST)?;
        if self.eat(TokenType::Colon) {
            let high = if self.cur_kind() == TokenType::RBracket {
                None
            } else {
                Some(Box::new(self.parse_expression(PREC_LOWEST)?))
            };
            self.expect(TokenType::RBracket)?;
            return Ok(Expression::Slice {
                expr: Box::new(expr),
                low: Some(Box::new(first)),
                high,
                pos,
            });
        }

        self.expect(TokenType::RBracket)?;
        Ok(Expression::Index {
            expr: Box::new(expr),
            index: Box::new(first),
            pos,
        })
    }

    fn parse_import(&mut self) -> PResult<Expression> {
        let pos = self.expect(TokenType::Import)?.pos;
        self.expect(TokenType::LParen)?;
        let name_token = self.expect(TokenType::String)?;
        let module = match &name_token.string {
            Some(string) if string.parts.len() == 1 => match &string.parts[0] {
                RawStringPart::Text(text) => text.clone(),
                RawStringPart::Interp { .. } => {
                    return Err(ParseError::new(
                        "module name must be a plain string",
                        name_token.pos,
                    ));
                }
            },
            _ => {
                return Err(ParseError::new(
                    "module name must be a plain string",
                    name_token.pos,
                ));
            }
        };
        self.expect(TokenType::RParen)?;
        Ok(Expression::Import { module, pos })
    }

    /// `try(f(x))` shields the call; `try(f)` shields a zero-argument
    /// invocation of the callable.
    fn parse_try(&mut self) -> PResult<Expression> {
        let pos = self.expect(TokenType::Try)?.pos;
        self.expect(TokenType::LParen)?;
        let call = self.parse_expression(PREC_LOWEST)?;
        self.expect(TokenType::RParen)?;
        Ok(Expression::Try {
            call: Box::new(call),
            pos,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Program {
        Parser::parse(input).unwrap_or_else(|err| panic!("parse failed: {}", err))
    }

    #[test]
    fn test_assignment_forms() {
        let program = parse("a := 1; a += 2; a, b = b, a");
        assert_eq!(program.statements.len(), 3);
        match &program.statements[2] {
            Statement::Assign { lhs, rhs, op, .. } => {
                assert_eq!(lhs.len(), 2);
                assert_eq!(rhs.len(), 2);
                assert_eq!(*op, TokenType::Assign);
            }
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_precedence() {
        let program = parse("x = 1 + 2 * 3");
        match &program.statements[0] {
            Statement::Assign { rhs, .. } => match &rhs[0] {
                Expression::Binary { op, rhs, .. } => {
                    assert_eq!(*op, TokenType::Plus);
                    assert!(matches!(
                        rhs.as_ref(),
                        Expression::Binary {
                            op: TokenType::Star,
                            ..
                        }
                    ));
                }
                other => panic!("expected binary, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_ternary_and_nullish() {
        parse("x = a ? b : c ? d : e");
        parse("x = a ?? b ?? c");
    }

    #[test]
    fn test_for_in_forms() {
        let program = parse("for k, v in t { }\nfor i in [1, 2] { }\nfor _, v in t { }");
        match &program.statements[0] {
            Statement::ForIn { key, value, .. } => {
                assert_eq!(key.as_deref(), Some("k"));
                assert_eq!(value.as_deref(), Some("v"));
            }
            other => panic!("expected for-in, got {:?}", other),
        }
        match &program.statements[2] {
            Statement::ForIn { key, value, .. } => {
                assert!(key.is_none());
                assert_eq!(value.as_deref(), Some("v"));
            }
            other => panic!("expected for-in, got {:?}", other),
        }
    }

    #[test]
    fn test_three_clause_for() {
        let program = parse("for i := 0; i < 10; i++ { }");
        match &program.statements[0] {
            Statement::For {
                init, cond, post, ..
            } => {
                assert!(init.is_some());
                assert!(cond.is_some());
                assert!(post.is_some());
            }
            other => panic!("expected for, got {:?}", other),
        }
    }

    #[test]
    fn test_labeled_loop() {
        let program = parse("outer: for { break outer }");
        match &program.statements[0] {
            Statement::Labeled { label, stmt, .. } => {
                assert_eq!(label, "outer");
                assert!(matches!(stmt.as_ref(), Statement::For { .. }));
            }
            other => panic!("expected labeled statement, got {:?}", other),
        }
    }

    #[test]
    fn test_func_literal_params() {
        let program = parse("f := fn(a, b?, ...rest) { return a }");
        match &program.statements[0] {
            Statement::Assign { rhs, .. } => match &rhs[0] {
                Expression::FuncLit { params, .. } => {
                    assert_eq!(params.names, vec!["a", "b", "rest"]);
                    assert_eq!(params.num_optionals, 1);
                    assert!(params.var_args);
                }
                other => panic!("expected func literal, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_short_func_body() {
        let program = parse("double := fn(x) => x * 2");
        match &program.statements[0] {
            Statement::Assign { rhs, .. } => match &rhs[0] {
                Expression::FuncLit { body, .. } => {
                    assert!(matches!(body.as_ref(), Statement::ShortFuncBody { .. }));
                }
                other => panic!("expected func literal, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_defer_requires_call() {
        assert!(Parser::parse("defer 1 + 2").is_err());
        assert!(Parser::parse("defer f(1)").is_ok());
    }

    #[test]
    fn test_import_and_try() {
        parse(r#"m := import("math")"#);
        parse("err := try(f(1, 2))");
        parse("err := try(fn() { throw 1 })");
    }

    #[test]
    fn test_slice_forms() {
        parse("x = a[1:2]; y = a[:2]; z = a[1:]; w = a[:]");
    }

    #[test]
    fn test_splat_in_call_and_array() {
        parse("f(...args); x = [1, ...rest]");
    }

    #[test]
    fn test_table_literal_keys() {
        let program = parse("t := {a: 1, \"b c\": 2, 3: 'x'}");
        match &program.statements[0] {
            Statement::Assign { rhs, .. } => match &rhs[0] {
                Expression::TableLit { entries, .. } => assert_eq!(entries.len(), 3),
                other => panic!("expected table literal, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }

    #[test]
    fn test_string_interpolation_parses_expression() {
        let program = parse(r#"s := "n=${1 + 2}""#);
        match &program.statements[0] {
            Statement::Assign { rhs, .. } => match &rhs[0] {
                Expression::StringLit { parts, .. } => {
                    assert!(matches!(parts[1], StringPart::Interp(_)));
                }
                other => panic!("expected string literal, got {:?}", other),
            },
            other => panic!("expected assignment, got {:?}", other),
        }
    }
}
