use crate::ast::Number;
use crate::token::{Span, SpannedToken, Token};
use thiserror::Error;

/// Lexer error.
#[derive(Clone, Debug, PartialEq, Error)]
#[error("{line}:{column}: {message}")]
pub struct LexError {
    pub message: String,
    pub line: u32,
    pub column: u32,
}

/// Pull-based lexer over the Lua 5.1 token set.
pub struct Lexer<'a> {
    source: &'a [u8],
    pos: usize,
    line: u32,
    column: u32,
    current: Result<SpannedToken, LexError>,
    /// Line number of the last consumed token.
    pub lastline: u32,
}

impl<'a> Lexer<'a> {
    /// Lexer positioned before the first token of `source`.
    pub fn new(source: &'a [u8]) -> Self {
        let mut lexer = Lexer {
            source,
            pos: 0,
            line: 1,
            column: 1,
            current: Ok(SpannedToken {
                token: Token::Eof,
                span: Span { line: 1, column: 1 },
            }),
            lastline: 1,
        };
        // Prime the first token
        lexer.current = lexer.scan_token();
        lexer
    }

    /// The lookahead token, or the error that ended scanning.
    pub fn current(&self) -> Result<&SpannedToken, &LexError> {
        self.current.as_ref()
    }

    /// Take the lookahead token and scan the next.
    pub fn advance(&mut self) -> Result<SpannedToken, LexError> {
        if let Ok(tok) = &self.current {
            self.lastline = tok.span.line;
        }
        let next = self.scan_token();
        std::mem::replace(&mut self.current, next)
    }

    /// Look at the token after the current one without consuming anything.
    pub fn peek_token(&mut self) -> Result<Token, LexError> {
        let saved = (self.pos, self.line, self.column);
        let result = self.scan_token().map(|t| t.token);
        (self.pos, self.line, self.column) = saved;
        result
    }

    /// Line under the scan cursor.
    pub fn line(&self) -> u32 {
        self.line
    }

    fn peek(&self) -> Option<u8> {
        self.source.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.source.get(self.pos + offset).copied()
    }

    fn advance_char(&mut self) -> Option<u8> {
        let ch = self.source.get(self.pos).copied()?;
        self.pos += 1;
        if ch == b'\n' {
            // \n\r counts as one newline
            if self.peek() == Some(b'\r') {
                self.pos += 1;
            }
            self.line += 1;
            self.column = 1;
        } else if ch == b'\r' {
            if self.peek() == Some(b'\n') {
                self.pos += 1;
            }
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn error(&self, message: impl Into<String>, span: Span) -> LexError {
        LexError {
            message: message.into(),
            line: span.line,
            column: span.column,
        }
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            while let Some(ch) = self.peek() {
                if is_space(ch) {
                    self.advance_char();
                } else {
                    break;
                }
            }

            if self.peek() == Some(b'-') && self.peek_at(1) == Some(b'-') {
                self.advance_char();
                self.advance_char();
                if let Some(level) = self.check_long_bracket() {
                    self.skip_long_bracket_open(level);
                    self.scan_long_string_content(level, "unfinished long comment")?;
                    continue;
                }
                while let Some(ch) = self.peek() {
                    if ch == b'\n' || ch == b'\r' {
                        break;
                    }
                    self.advance_char();
                }
                continue;
            }

            return Ok(());
        }
    }

    /// Level of the `[==[` opener at the cursor, if there is one.
    fn check_long_bracket(&self) -> Option<usize> {
        if self.peek() != Some(b'[') {
            return None;
        }
        let mut level = 0;
        let mut offset = 1;
        while self.peek_at(offset) == Some(b'=') {
            level += 1;
            offset += 1;
        }
        if self.peek_at(offset) == Some(b'[') {
            Some(level)
        } else {
            None
        }
    }

    fn skip_long_bracket_open(&mut self, level: usize) {
        self.advance_char(); // [
        for _ in 0..level {
            self.advance_char(); // =
        }
        self.advance_char(); // [
    }

    fn scan_token(&mut self) -> Result<SpannedToken, LexError> {
        self.skip_whitespace_and_comments()?;

        let span = Span {
            line: self.line,
            column: self.column,
        };
        let Some(ch) = self.peek() else {
            return Ok(SpannedToken {
                token: Token::Eof,
                span,
            });
        };

        let token = match ch {
            b'+' => self.single(Token::Plus),
            b'-' => self.single(Token::Minus),
            b'*' => self.single(Token::Star),
            b'/' => self.single(Token::Slash),
            b'%' => self.single(Token::Percent),
            b'^' => self.single(Token::Caret),
            b'#' => self.single(Token::Hash),
            b'(' => self.single(Token::LParen),
            b')' => self.single(Token::RParen),
            b'{' => self.single(Token::LBrace),
            b'}' => self.single(Token::RBrace),
            b']' => self.single(Token::RBracket),
            b';' => self.single(Token::Semi),
            b':' => self.single(Token::Colon),
            b',' => self.single(Token::Comma),
            b'<' => self.with_eq(Token::Less, Token::LessEq),
            b'>' => self.with_eq(Token::Greater, Token::GreaterEq),
            b'=' => self.with_eq(Token::Assign, Token::Equal),
            b'~' => {
                self.advance_char();
                if self.peek() != Some(b'=') {
                    return Err(self.error("unexpected symbol near '~'", span));
                }
                self.advance_char();
                Token::NotEqual
            }
            b'.' => {
                if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
                    return self.scan_number(span);
                }
                self.advance_char();
                if self.peek() == Some(b'.') {
                    self.advance_char();
                    if self.peek() == Some(b'.') {
                        self.advance_char();
                        Token::DotDotDot
                    } else {
                        Token::DotDot
                    }
                } else {
                    Token::Dot
                }
            }
            b'[' => {
                if let Some(level) = self.check_long_bracket() {
                    self.skip_long_bracket_open(level);
                    let content = self.scan_long_string_content(level, "unfinished long string")?;
                    Token::String(content)
                } else {
                    self.single(Token::LBracket)
                }
            }
            b'"' | b'\'' => return self.scan_short_string(span),
            b'0'..=b'9' => return self.scan_number(span),
            _ if is_ident_start(ch) => self.scan_name(),
            _ => {
                self.advance_char();
                let near = if ch.is_ascii_graphic() {
                    format!("'{}'", ch as char)
                } else {
                    format!("'<\\{ch}>'")
                };
                return Err(self.error(format!("unexpected symbol near {near}"), span));
            }
        };
        Ok(SpannedToken { token, span })
    }

    fn single(&mut self, token: Token) -> Token {
        self.advance_char();
        token
    }

    /// `c` or `c=`.
    fn with_eq(&mut self, plain: Token, with_eq: Token) -> Token {
        self.advance_char();
        if self.peek() == Some(b'=') {
            self.advance_char();
            with_eq
        } else {
            plain
        }
    }

    fn scan_name(&mut self) -> Token {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if is_ident_continue(ch) {
                self.advance_char();
            } else {
                break;
            }
        }
        // Identifier bytes are ASCII by construction.
        let name = String::from_utf8_lossy(&self.source[start..self.pos]).into_owned();
        Token::keyword_from_str(&name).unwrap_or(Token::Name(name))
    }

    fn skip_digits(&mut self, hex: bool) -> usize {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if (hex && ch.is_ascii_hexdigit()) || ch.is_ascii_digit() {
                self.advance_char();
            } else {
                break;
            }
        }
        self.pos - start
    }

    fn scan_number(&mut self, span: Span) -> Result<SpannedToken, LexError> {
        let start = self.pos;
        let hex =
            self.peek() == Some(b'0') && self.peek_at(1).is_some_and(|c| c == b'x' || c == b'X');
        if hex {
            self.advance_char(); // 0
            self.advance_char(); // x/X
        }

        let mut digits = self.skip_digits(hex);
        let mut integral = true;
        if self.peek() == Some(b'.') {
            self.advance_char();
            digits += self.skip_digits(hex);
            integral = false;
        }
        if digits == 0 {
            return Err(self.malformed(start, span));
        }

        let exp_marker: &[u8] = if hex { b"pP" } else { b"eE" };
        if self.peek().is_some_and(|c| exp_marker.contains(&c)) {
            integral = false;
            self.advance_char();
            if matches!(self.peek(), Some(b'+') | Some(b'-')) {
                self.advance_char();
            }
            if self.skip_digits(false) == 0 {
                return Err(self.malformed(start, span));
            }
        }

        // A number running straight into a name is malformed.
        if self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_' || c == b'.')
        {
            return Err(self.malformed(start, span));
        }

        let text = String::from_utf8_lossy(&self.source[start..self.pos]).into_owned();
        // Integer text out of i64 range falls back to a float, as in Lua 5.3.
        let int = match (integral, hex) {
            (false, _) => None,
            (true, true) => i64::from_str_radix(&text[2..], 16).ok(),
            (true, false) => text.parse::<i64>().ok(),
        };
        let value = match int {
            Some(i) => Some(Number::Int(i)),
            None if hex => parse_hex_number(&text[2..]).map(Number::Float),
            None => text.parse::<f64>().ok().map(Number::Float),
        };
        match value {
            Some(n) => Ok(SpannedToken {
                token: Token::Number(n),
                span,
            }),
            None => Err(self.error(format!("malformed number near '{text}'"), span)),
        }
    }

    fn malformed(&mut self, start: usize, span: Span) -> LexError {
        // Consume the rest of the word for a useful message.
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == b'_' || ch == b'.' {
                self.advance_char();
            } else {
                break;
            }
        }
        let text = String::from_utf8_lossy(&self.source[start..self.pos]);
        self.error(format!("malformed number near '{text}'"), span)
    }

    /// Build the "near" text for string errors from `start_pos` to the cursor.
    fn string_near_token(&self, start_pos: usize) -> String {
        let end = (self.pos + 1).min(self.source.len());
        let raw = &self.source[start_pos..end];
        let truncated = if raw.len() > 50 { &raw[..50] } else { raw };
        format!("'{}'", String::from_utf8_lossy(truncated))
    }

    fn scan_short_string(&mut self, span: Span) -> Result<SpannedToken, LexError> {
        let string_start = self.pos;
        let quote = self.source[self.pos];
        self.advance_char();
        let mut buf = Vec::new();

        loop {
            match self.peek() {
                None => return Err(self.error("unfinished string near <eof>", span)),
                Some(b'\n') | Some(b'\r') => {
                    let near = self.string_near_token(string_start);
                    return Err(self.error(format!("unfinished string near {near}"), span));
                }
                Some(ch) if ch == quote => {
                    self.advance_char();
                    break;
                }
                Some(b'\\') => {
                    self.advance_char();
                    self.scan_escape(string_start, span, &mut buf)?;
                }
                Some(ch) => {
                    self.advance_char();
                    buf.push(ch);
                }
            }
        }

        Ok(SpannedToken {
            token: Token::String(buf),
            span,
        })
    }

    fn scan_escape(
        &mut self,
        string_start: usize,
        span: Span,
        buf: &mut Vec<u8>,
    ) -> Result<(), LexError> {
        let invalid = |lexer: &Self| {
            let near = lexer.string_near_token(string_start);
            lexer.error(format!("invalid escape sequence near {near}"), span)
        };
        let Some(ch) = self.peek() else {
            return Err(self.error("unfinished string near <eof>", span));
        };
        let simple = match ch {
            b'a' => Some(0x07),
            b'b' => Some(0x08),
            b'f' => Some(0x0C),
            b'n' => Some(b'\n'),
            b'r' => Some(b'\r'),
            b't' => Some(b'\t'),
            b'v' => Some(0x0B),
            b'\\' | b'"' | b'\'' => Some(ch),
            // advance_char folds \r\n into one newline
            b'\n' | b'\r' => Some(b'\n'),
            _ => None,
        };
        if let Some(byte) = simple {
            self.advance_char();
            buf.push(byte);
            return Ok(());
        }

        match ch {
            b'x' => {
                self.advance_char();
                let mut value = 0u8;
                for _ in 0..2 {
                    match self.peek() {
                        Some(h) if h.is_ascii_hexdigit() => {
                            self.advance_char();
                            value = (value << 4) | hex_value(h);
                        }
                        _ => return Err(invalid(self)),
                    }
                }
                buf.push(value);
            }
            b'z' => {
                self.advance_char();
                while self.peek().is_some_and(is_space) {
                    self.advance_char();
                }
            }
            b'0'..=b'9' => {
                let mut value: u16 = 0;
                for _ in 0..3 {
                    match self.peek() {
                        Some(d) if d.is_ascii_digit() => {
                            self.advance_char();
                            value = value * 10 + u16::from(d - b'0');
                        }
                        _ => break,
                    }
                }
                let byte = u8::try_from(value).map_err(|_| {
                    let near = self.string_near_token(string_start);
                    self.error(format!("decimal escape too large near {near}"), span)
                })?;
                buf.push(byte);
            }
            _ => return Err(invalid(self)),
        }
        Ok(())
    }

    /// Read up to the matching `]=*]`; the opening bracket is already consumed.
    fn scan_long_string_content(
        &mut self,
        level: usize,
        unfinished: &str,
    ) -> Result<Vec<u8>, LexError> {
        let mut buf = Vec::new();
        let mut at_start = true;

        loop {
            match self.peek() {
                None => {
                    let span = Span {
                        line: self.line,
                        column: self.column,
                    };
                    return Err(self.error(format!("{unfinished} near <eof>"), span));
                }
                Some(b']') if self.check_closing_long_bracket(level) => {
                    self.advance_char(); // ]
                    for _ in 0..level {
                        self.advance_char(); // =
                    }
                    self.advance_char(); // ]
                    return Ok(buf);
                }
                Some(b'\n') | Some(b'\r') => {
                    self.advance_char();
                    // First newline right after the opener is dropped.
                    if !at_start {
                        buf.push(b'\n');
                    }
                }
                Some(ch) => {
                    self.advance_char();
                    buf.push(ch);
                }
            }
            at_start = false;
        }
    }

    fn check_closing_long_bracket(&self, level: usize) -> bool {
        if self.peek() != Some(b']') {
            return false;
        }
        let mut offset = 1;
        for _ in 0..level {
            if self.peek_at(offset) != Some(b'=') {
                return false;
            }
            offset += 1;
        }
        self.peek_at(offset) == Some(b']')
    }
}

fn is_space(ch: u8) -> bool {
    matches!(ch, b' ' | b'\t' | b'\n' | b'\r' | b'\x0C' | b'\x0B')
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    ch.is_ascii_alphanumeric() || ch == b'_'
}

fn hex_value(ch: u8) -> u8 {
    match ch {
        b'0'..=b'9' => ch - b'0',
        b'a'..=b'f' => ch - b'a' + 10,
        b'A'..=b'F' => ch - b'A' + 10,
        _ => 0,
    }
}

/// Parse the body of a hex literal (after `0x`), e.g. `ff`, `1.8`, `1p10`.
fn parse_hex_number(text: &str) -> Option<f64> {
    let (mantissa_str, exp_str) = match text.find(['p', 'P']) {
        Some(p) => (&text[..p], Some(&text[p + 1..])),
        None => (text, None),
    };
    let (int_part, frac_part) = match mantissa_str.find('.') {
        Some(dot) => (&mantissa_str[..dot], &mantissa_str[dot + 1..]),
        None => (mantissa_str, ""),
    };

    let mut mantissa: f64 = 0.0;
    for ch in int_part.bytes() {
        mantissa = mantissa * 16.0 + f64::from(hex_value(ch));
    }
    let mut place = 1.0 / 16.0;
    for ch in frac_part.bytes() {
        mantissa += f64::from(hex_value(ch)) * place;
        place /= 16.0;
    }

    let exponent: i32 = match exp_str {
        Some(s) => s.parse().ok()?,
        None => 0,
    };
    Some(mantissa * 2.0f64.powi(exponent))
}
