use crate::ast::{BinOp, Number, UnOp};
use std::fmt;

/// Source location span.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Span {
    pub line: u32,
    pub column: u32,
}

/// A token with its source location.
#[derive(Clone, Debug, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub span: Span,
}

/// Tokens of the accepted Lua subset.
#[derive(Clone, Debug, PartialEq)]
pub enum Token {
    // Reserved words
    And,
    Break,
    Do,
    Else,
    ElseIf,
    End,
    False,
    For,
    Function,
    If,
    In,
    Local,
    Nil,
    Not,
    Or,
    Repeat,
    Return,
    Then,
    True,
    Until,
    While,

    // Literals
    Number(Number),
    String(Vec<u8>),
    Name(String),

    // Punctuation
    Plus,     // +
    Minus,    // -
    Star,     // *
    Slash,    // /
    Percent,  // %
    Caret,    // ^
    Hash,     // #
    Less,     // <
    Greater,  // >
    Assign,   // =
    LParen,   // (
    RParen,   // )
    LBrace,   // {
    RBrace,   // }
    LBracket, // [
    RBracket, // ]
    Semi,     // ;
    Colon,    // :
    Comma,    // ,
    Dot,      // .

    Equal,     // ==
    NotEqual,  // ~=
    LessEq,    // <=
    GreaterEq, // >=
    DotDot,    // ..
    DotDotDot, // ...

    Eof,
}

/// Reserved words and fixed-spelling punctuation, in one table so the
/// lexer and diagnostics agree on spelling.
const SPELLINGS: &[(&str, Token)] = &[
    ("and", Token::And),
    ("break", Token::Break),
    ("do", Token::Do),
    ("else", Token::Else),
    ("elseif", Token::ElseIf),
    ("end", Token::End),
    ("false", Token::False),
    ("for", Token::For),
    ("function", Token::Function),
    ("if", Token::If),
    ("in", Token::In),
    ("local", Token::Local),
    ("nil", Token::Nil),
    ("not", Token::Not),
    ("or", Token::Or),
    ("repeat", Token::Repeat),
    ("return", Token::Return),
    ("then", Token::Then),
    ("true", Token::True),
    ("until", Token::Until),
    ("while", Token::While),
    ("+", Token::Plus),
    ("-", Token::Minus),
    ("*", Token::Star),
    ("/", Token::Slash),
    ("%", Token::Percent),
    ("^", Token::Caret),
    ("#", Token::Hash),
    ("<", Token::Less),
    (">", Token::Greater),
    ("=", Token::Assign),
    ("(", Token::LParen),
    (")", Token::RParen),
    ("{", Token::LBrace),
    ("}", Token::RBrace),
    ("[", Token::LBracket),
    ("]", Token::RBracket),
    (";", Token::Semi),
    (":", Token::Colon),
    (",", Token::Comma),
    (".", Token::Dot),
    ("==", Token::Equal),
    ("~=", Token::NotEqual),
    ("<=", Token::LessEq),
    (">=", Token::GreaterEq),
    ("..", Token::DotDot),
    ("...", Token::DotDotDot),
    ("<eof>", Token::Eof),
];

const KEYWORD_COUNT: usize = 21;

impl Token {
    /// Reserved word spelled `s`, if it is one.
    pub fn keyword_from_str(s: &str) -> Option<Token> {
        SPELLINGS[..KEYWORD_COUNT]
            .iter()
            .find(|(text, _)| *text == s)
            .map(|(_, tok)| tok.clone())
    }

    fn spelling(&self) -> Option<&'static str> {
        SPELLINGS
            .iter()
            .find(|(_, tok)| tok == self)
            .map(|(text, _)| *text)
    }

    pub fn binary_op(&self) -> Option<BinOp> {
        Some(match self {
            Token::Plus => BinOp::Add,
            Token::Minus => BinOp::Sub,
            Token::Star => BinOp::Mul,
            Token::Slash => BinOp::Div,
            Token::Percent => BinOp::Mod,
            Token::Caret => BinOp::Pow,
            Token::DotDot => BinOp::Concat,
            Token::Equal => BinOp::Eq,
            Token::NotEqual => BinOp::Ne,
            Token::Less => BinOp::Lt,
            Token::LessEq => BinOp::Le,
            Token::Greater => BinOp::Gt,
            Token::GreaterEq => BinOp::Ge,
            Token::And => BinOp::And,
            Token::Or => BinOp::Or,
            _ => return None,
        })
    }

    pub fn unary_op(&self) -> Option<UnOp> {
        Some(match self {
            Token::Minus => UnOp::Neg,
            Token::Not => UnOp::Not,
            Token::Hash => UnOp::Len,
            _ => return None,
        })
    }

    /// Tokens that terminate a statement list.
    pub fn is_block_end(&self) -> bool {
        matches!(
            self,
            Token::Else | Token::ElseIf | Token::End | Token::Until | Token::Eof
        )
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "{n}"),
            Token::String(bytes) => f.write_str(&String::from_utf8_lossy(bytes)),
            Token::Name(name) => f.write_str(name),
            other => f.write_str(other.spelling().unwrap_or("?")),
        }
    }
}
