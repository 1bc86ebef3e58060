//! Recursive-descent parser producing the owned syntax tree.

use crate::ast::{Block, Chunk, Expr, FuncBody, FuncName, Stat, TableField, UNARY_PRIORITY};
use crate::lexer::{LexError, Lexer};
use crate::token::Token;
use thiserror::Error;

/// Parse error. The first error aborts the parse.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{line}: {message}")]
pub struct ParseError {
    pub message: String,
    pub line: u32,
}

impl From<LexError> for ParseError {
    fn from(e: LexError) -> Self {
        ParseError {
            message: e.message,
            line: e.line,
        }
    }
}

/// Parse a whole source file.
pub fn parse(source: &[u8]) -> Result<Chunk, ParseError> {
    let mut parser = Parser::new(source);
    let block = parser.block()?;
    if !parser.check(&Token::Eof) {
        let found = parser.found();
        return Err(parser.error(format!("expected '<eof>', got '{found}'")));
    }
    Ok(Chunk { block })
}

struct Parser<'a> {
    lexer: Lexer<'a>,
    /// Whether each enclosing function accepts `...`; the main chunk does.
    vararg_stack: Vec<bool>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a [u8]) -> Self {
        Parser {
            lexer: Lexer::new(source),
            vararg_stack: vec![true],
        }
    }

    /// Line of the current token.
    fn line(&self) -> u32 {
        match self.lexer.current() {
            Ok(tok) => tok.span.line,
            Err(e) => e.line,
        }
    }

    fn error(&self, msg: impl Into<String>) -> ParseError {
        ParseError {
            message: msg.into(),
            line: self.line(),
        }
    }

    // token plumbing

    fn current_token(&self) -> Result<&Token, ParseError> {
        self.lexer
            .current()
            .map(|st| &st.token)
            .map_err(|e| ParseError::from(e.clone()))
    }

    fn found(&self) -> String {
        self.current_token()
            .map(|t| t.to_string())
            .unwrap_or_else(|_| "error".into())
    }

    fn check(&self, expected: &Token) -> bool {
        self.current_token().map(|t| t == expected).unwrap_or(false)
    }

    fn advance(&mut self) -> Result<Token, ParseError> {
        let st = self.lexer.advance()?;
        Ok(st.token)
    }

    fn expect(&mut self, expected: &Token) -> Result<(), ParseError> {
        if self.check(expected) {
            self.advance()?;
            Ok(())
        } else {
            // Surface a pending lexer error instead of a misleading mismatch.
            self.current_token()?;
            let found = self.found();
            Err(self.error(format!("expected '{expected}', got '{found}'")))
        }
    }

    /// Like `expect`, but names the opening token when it is on another line.
    fn expect_match(&mut self, what: &Token, who: &Token, line: u32) -> Result<(), ParseError> {
        if self.check(what) {
            self.advance()?;
            return Ok(());
        }
        self.current_token()?;
        let found = self.found();
        if line == self.line() {
            Err(self.error(format!("expected '{what}', got '{found}'")))
        } else {
            Err(self.error(format!(
                "expected '{what}' (to close '{who}' at line {line}), got '{found}'"
            )))
        }
    }

    fn expect_name(&mut self) -> Result<String, ParseError> {
        match self.current_token()?.clone() {
            Token::Name(name) => {
                self.advance()?;
                Ok(name)
            }
            other => Err(self.error(format!("expected name, got '{other}'"))),
        }
    }

    fn test_next(&mut self, expected: &Token) -> Result<bool, ParseError> {
        if self.check(expected) {
            self.advance()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    // ---- Blocks and statements ----

    fn block(&mut self) -> Result<Block, ParseError> {
        let mut stats = Vec::new();
        loop {
            let token = self.current_token()?;
            if token.is_block_end() {
                break;
            }
            if *token == Token::Return {
                stats.push(self.stat_return()?);
                if !self.current_token()?.is_block_end() {
                    let found = self.found();
                    return Err(self.error(format!(
                        "'return' must be the last statement, got '{found}'"
                    )));
                }
                break;
            }
            if let Some(stat) = self.statement()? {
                stats.push(stat);
            }
        }
        Ok(Block { stats })
    }

    /// Parse one statement; a lone `;` yields nothing.
    fn statement(&mut self) -> Result<Option<Stat>, ParseError> {
        let line = self.line();
        let stat = match self.current_token()?.clone() {
            Token::Semi => {
                self.advance()?;
                return Ok(None);
            }
            Token::Local => self.stat_local(line)?,
            Token::If => self.stat_if(line)?,
            Token::While => {
                self.advance()?;
                let cond = self.expression()?;
                self.expect(&Token::Do)?;
                let body = self.block()?;
                self.expect_match(&Token::End, &Token::While, line)?;
                Stat::While { cond, body, line }
            }
            Token::Do => {
                self.advance()?;
                let body = self.block()?;
                self.expect_match(&Token::End, &Token::Do, line)?;
                Stat::Do { body, line }
            }
            Token::For => self.stat_for(line)?,
            Token::Repeat => {
                self.advance()?;
                let body = self.block()?;
                self.expect_match(&Token::Until, &Token::Repeat, line)?;
                let cond = self.expression()?;
                Stat::Repeat { body, cond, line }
            }
            Token::Function => self.stat_function(line)?,
            Token::Break => {
                self.advance()?;
                Stat::Break { line }
            }
            _ => self.stat_expr_or_assign(line)?,
        };
        Ok(Some(stat))
    }

    /// `local name {, name} ['=' explist]` or `local function name funcbody`
    fn stat_local(&mut self, line: u32) -> Result<Stat, ParseError> {
        self.advance()?; // consume 'local'
        if self.test_next(&Token::Function)? {
            let name = self.expect_name()?;
            let func = self.function_body(false, line)?;
            return Ok(Stat::LocalFunction { name, func, line });
        }

        let mut names = vec![self.expect_name()?];
        while self.test_next(&Token::Comma)? {
            names.push(self.expect_name()?);
        }
        let values = if self.test_next(&Token::Assign)? {
            self.expression_list()?
        } else {
            Vec::new()
        };
        Ok(Stat::Local {
            names,
            values,
            line,
        })
    }

    fn stat_if(&mut self, line: u32) -> Result<Stat, ParseError> {
        self.advance()?; // consume 'if'
        let mut clauses = Vec::new();
        let cond = self.expression()?;
        self.expect(&Token::Then)?;
        clauses.push((cond, self.block()?));

        let mut else_block = None;
        loop {
            match self.current_token()? {
                Token::ElseIf => {
                    self.advance()?;
                    let cond = self.expression()?;
                    self.expect(&Token::Then)?;
                    clauses.push((cond, self.block()?));
                }
                Token::Else => {
                    self.advance()?;
                    else_block = Some(self.block()?);
                    self.expect_match(&Token::End, &Token::If, line)?;
                    break;
                }
                _ => {
                    self.expect_match(&Token::End, &Token::If, line)?;
                    break;
                }
            }
        }
        Ok(Stat::If {
            clauses,
            else_block,
            line,
        })
    }

    fn stat_for(&mut self, line: u32) -> Result<Stat, ParseError> {
        self.advance()?; // consume 'for'
        let first = self.expect_name()?;

        if self.test_next(&Token::Assign)? {
            let start = self.expression()?;
            self.expect(&Token::Comma)?;
            let limit = self.expression()?;
            let step = if self.test_next(&Token::Comma)? {
                Some(self.expression()?)
            } else {
                None
            };
            self.expect(&Token::Do)?;
            let body = self.block()?;
            self.expect_match(&Token::End, &Token::For, line)?;
            return Ok(Stat::NumericFor {
                var: first,
                start,
                limit,
                step,
                body,
                line,
            });
        }

        if !self.check(&Token::Comma) && !self.check(&Token::In) {
            self.current_token()?;
            let found = self.found();
            return Err(self.error(format!("expected '=' or 'in', got '{found}'")));
        }
        let mut names = vec![first];
        while self.test_next(&Token::Comma)? {
            names.push(self.expect_name()?);
        }
        self.expect(&Token::In)?;
        let iterators = self.expression_list()?;
        self.expect(&Token::Do)?;
        let body = self.block()?;
        self.expect_match(&Token::End, &Token::For, line)?;
        Ok(Stat::GenericFor {
            names,
            iterators,
            body,
            line,
        })
    }

    /// `function a.b.c:m funcbody`
    fn stat_function(&mut self, line: u32) -> Result<Stat, ParseError> {
        self.advance()?; // consume 'function'
        let mut path = vec![self.expect_name()?];
        while self.test_next(&Token::Dot)? {
            path.push(self.expect_name()?);
        }
        let method = if self.test_next(&Token::Colon)? {
            Some(self.expect_name()?)
        } else {
            None
        };
        let func = self.function_body(method.is_some(), line)?;
        Ok(Stat::Function {
            name: FuncName { path, method },
            func,
            line,
        })
    }

    fn stat_return(&mut self) -> Result<Stat, ParseError> {
        let line = self.line();
        self.advance()?; // consume 'return'
        let token = self.current_token()?;
        let values = if token.is_block_end() || *token == Token::Semi {
            Vec::new()
        } else {
            self.expression_list()?
        };
        self.test_next(&Token::Semi)?;
        Ok(Stat::Return { values, line })
    }

    fn stat_expr_or_assign(&mut self, line: u32) -> Result<Stat, ParseError> {
        let expr = self.suffixed_expression()?;

        if self.check(&Token::Assign) || self.check(&Token::Comma) {
            let mut targets = vec![expr];
            while self.test_next(&Token::Comma)? {
                targets.push(self.suffixed_expression()?);
            }
            if targets.iter().any(|t| !t.is_assignable()) {
                return Err(self.error("syntax error: cannot assign to this expression"));
            }
            self.expect(&Token::Assign)?;
            let values = self.expression_list()?;
            return Ok(Stat::Assign {
                targets,
                values,
                line,
            });
        }

        if !expr.is_call() {
            return Err(self.error("syntax error: expression is not a statement"));
        }
        Ok(Stat::Call { call: expr, line })
    }

    // ---- Functions ----

    /// `'(' [parlist] ')' block 'end'`
    fn function_body(&mut self, is_method: bool, line: u32) -> Result<FuncBody, ParseError> {
        let mut params = Vec::new();
        if is_method {
            params.push("self".to_string());
        }
        let mut is_vararg = false;

        self.expect(&Token::LParen)?;
        if !self.check(&Token::RParen) {
            loop {
                match self.current_token()?.clone() {
                    Token::Name(name) => {
                        self.advance()?;
                        params.push(name);
                    }
                    Token::DotDotDot => {
                        self.advance()?;
                        is_vararg = true;
                        break;
                    }
                    other => {
                        return Err(self.error(format!("expected parameter name, got '{other}'")))
                    }
                }
                if !self.test_next(&Token::Comma)? {
                    break;
                }
            }
        }
        self.expect(&Token::RParen)?;

        self.vararg_stack.push(is_vararg);
        let body = self.block();
        self.vararg_stack.pop();
        let body = body?;
        self.expect_match(&Token::End, &Token::Function, line)?;

        Ok(FuncBody {
            params,
            is_vararg,
            body,
            line,
        })
    }

    // ---- Expressions ----

    fn expression_list(&mut self) -> Result<Vec<Expr>, ParseError> {
        let mut list = vec![self.expression()?];
        while self.test_next(&Token::Comma)? {
            list.push(self.expression()?);
        }
        Ok(list)
    }

    pub(crate) fn expression(&mut self) -> Result<Expr, ParseError> {
        self.sub_expression(0)
    }

    /// Binary operators by precedence climbing; `min_prec` is the binding power to beat.
    fn sub_expression(&mut self, min_prec: u8) -> Result<Expr, ParseError> {
        let mut expr = if let Some(op) = self.current_token()?.unary_op() {
            self.advance()?;
            let operand = self.sub_expression(UNARY_PRIORITY)?;
            Expr::UnOp {
                op,
                operand: Box::new(operand),
            }
        } else {
            self.simple_expression()?
        };

        while let Some(op) = self.current_token()?.binary_op() {
            let (left_prec, right_prec) = op.priority();
            if left_prec <= min_prec {
                break;
            }
            self.advance()?;
            let rhs = self.sub_expression(right_prec)?;
            expr = Expr::BinOp {
                op,
                lhs: Box::new(expr),
                rhs: Box::new(rhs),
            };
        }

        Ok(expr)
    }

    fn simple_expression(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        let expr = match self.current_token()?.clone() {
            Token::Number(n) => Expr::Number(n),
            Token::String(s) => Expr::Str(s),
            Token::Nil => Expr::Nil,
            Token::True => Expr::True,
            Token::False => Expr::False,
            Token::DotDotDot => {
                if !self.vararg_stack.last().copied().unwrap_or(false) {
                    return Err(self.error("cannot use '...' outside a vararg function"));
                }
                Expr::Vararg
            }
            Token::LBrace => return self.table_constructor(),
            Token::Function => {
                self.advance()?;
                let body = self.function_body(false, line)?;
                return Ok(Expr::Function(Box::new(body)));
            }
            _ => return self.suffixed_expression(),
        };
        self.advance()?;
        Ok(expr)
    }

    /// Name or parenthesized expression.
    fn primary_expression(&mut self) -> Result<Expr, ParseError> {
        match self.current_token()?.clone() {
            Token::Name(name) => {
                self.advance()?;
                Ok(Expr::Name(name))
            }
            Token::LParen => {
                let line = self.line();
                self.advance()?;
                let inner = self.expression()?;
                self.expect_match(&Token::RParen, &Token::LParen, line)?;
                Ok(Expr::Paren(Box::new(inner)))
            }
            other => Err(self.error(format!("unexpected symbol near '{other}'"))),
        }
    }

    /// Postfix chain after a primary expression: fields, indexes, calls and method calls.
    fn suffixed_expression(&mut self) -> Result<Expr, ParseError> {
        let mut expr = self.primary_expression()?;
        loop {
            match self.current_token()?.clone() {
                Token::Dot => {
                    self.advance()?;
                    let name = self.expect_name()?;
                    expr = Expr::Field {
                        obj: Box::new(expr),
                        name,
                    };
                }
                Token::LBracket => {
                    self.advance()?;
                    let key = self.expression()?;
                    self.expect(&Token::RBracket)?;
                    expr = Expr::Index {
                        obj: Box::new(expr),
                        key: Box::new(key),
                    };
                }
                Token::Colon => {
                    self.advance()?;
                    let method = self.expect_name()?;
                    let args = self.call_args()?;
                    expr = Expr::MethodCall {
                        obj: Box::new(expr),
                        method,
                        args,
                    };
                }
                Token::LParen | Token::LBrace | Token::String(_) => {
                    let args = self.call_args()?;
                    expr = Expr::Call {
                        func: Box::new(expr),
                        args,
                    };
                }
                _ => return Ok(expr),
            }
        }
    }

    /// `'(' [explist] ')'`, a table constructor, or a string literal.
    fn call_args(&mut self) -> Result<Vec<Expr>, ParseError> {
        let line = self.line();
        match self.current_token()?.clone() {
            Token::String(s) => {
                self.advance()?;
                Ok(vec![Expr::Str(s)])
            }
            Token::LBrace => Ok(vec![self.table_constructor()?]),
            Token::LParen => {
                self.advance()?;
                if self.test_next(&Token::RParen)? {
                    return Ok(Vec::new());
                }
                let args = self.expression_list()?;
                self.expect_match(&Token::RParen, &Token::LParen, line)?;
                Ok(args)
            }
            other => Err(self.error(format!("function arguments expected, got '{other}'"))),
        }
    }

    /// `'{' [field {sep field} [sep]] '}'`
    fn table_constructor(&mut self) -> Result<Expr, ParseError> {
        let line = self.line();
        self.expect(&Token::LBrace)?;
        let mut fields = Vec::new();

        while !self.check(&Token::RBrace) {
            let field = match self.current_token()?.clone() {
                Token::LBracket => {
                    self.advance()?;
                    let key = self.expression()?;
                    self.expect(&Token::RBracket)?;
                    self.expect(&Token::Assign)?;
                    let value = self.expression()?;
                    TableField::Keyed { key, value }
                }
                Token::Name(name) if self.lexer.peek_token()? == Token::Assign => {
                    self.advance()?; // name
                    self.advance()?; // =
                    let value = self.expression()?;
                    TableField::Named { name, value }
                }
                _ => TableField::Positional(self.expression()?),
            };
            fields.push(field);

            if !self.test_next(&Token::Comma)? && !self.test_next(&Token::Semi)? {
                break;
            }
        }
        self.expect_match(&Token::RBrace, &Token::LBrace, line)?;
        Ok(Expr::Table(fields))
    }
}
