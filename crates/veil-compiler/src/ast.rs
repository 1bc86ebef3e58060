//! Owned syntax tree produced by the parser and consumed once by the compiler.
use std::fmt;

/// Binary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

/// Unary operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum UnOp {
    Neg,
    Not,
    Len,
}

/// Binding power of unary operators.
pub const UNARY_PRIORITY: u8 = 7;

impl BinOp {
    /// Operator precedence (higher = binds tighter).
    /// Returns (left priority, right priority); right < left marks right associativity.
    pub fn priority(self) -> (u8, u8) {
        match self {
            BinOp::Or => (1, 1),
            BinOp::And => (2, 2),
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => (3, 3),
            BinOp::Concat => (4, 3),
            BinOp::Add | BinOp::Sub => (5, 5),
            BinOp::Mul | BinOp::Div | BinOp::Mod => (6, 6),
            BinOp::Pow => (8, 7),
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            BinOp::Eq | BinOp::Ne | BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge
        )
    }

    pub fn is_arithmetic(self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod | BinOp::Pow
        )
    }

    /// Lua spelling of the operator.
    pub fn symbol(self) -> &'static str {
        match self {
            BinOp::Add => "+",
            BinOp::Sub => "-",
            BinOp::Mul => "*",
            BinOp::Div => "/",
            BinOp::Mod => "%",
            BinOp::Pow => "^",
            BinOp::Concat => "..",
            BinOp::Eq => "==",
            BinOp::Ne => "~=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
            BinOp::And => "and",
            BinOp::Or => "or",
        }
    }
}

impl UnOp {
    pub fn symbol(self) -> &'static str {
        match self {
            UnOp::Neg => "-",
            UnOp::Not => "not ",
            UnOp::Len => "#",
        }
    }
}

/// Numeric literal. Integers stay apart from floats so runtimes with an
/// integer subtype (5.3 and later) read them back unchanged.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    pub fn to_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }

    /// Source text that `tonumber` reads back with the same value and subtype.
    pub fn text(self) -> String {
        match self {
            Number::Int(i) => i.to_string(),
            Number::Float(f) => float_text(f),
        }
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text())
    }
}

/// Shortest round-trip text of a float, always spelled with a `.` or an
/// exponent so no runtime takes it for an integer.
pub fn float_text(n: f64) -> String {
    if n == f64::INFINITY {
        "1e9999".to_string()
    } else if n == f64::NEG_INFINITY {
        "-1e9999".to_string()
    } else {
        format!("{n:?}")
    }
}

/// Root of a parsed source file.
#[derive(Clone, Debug, PartialEq)]
pub struct Chunk {
    pub block: Block,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Block {
    pub stats: Vec<Stat>,
}

/// Name path of a `function a.b:c()` statement.
#[derive(Clone, Debug, PartialEq)]
pub struct FuncName {
    /// Root name followed by dotted fields.
    pub path: Vec<String>,
    pub method: Option<String>,
}

impl FuncName {
    /// Flattened spelling, e.g. `a.b:c`.
    pub fn encoded(&self) -> String {
        let mut out = self.path.join(".");
        if let Some(m) = &self.method {
            out.push(':');
            out.push_str(m);
        }
        out
    }
}

/// Parameters and body of a function literal.
#[derive(Clone, Debug, PartialEq)]
pub struct FuncBody {
    /// Includes the implicit `self` of method definitions.
    pub params: Vec<String>,
    pub is_vararg: bool,
    pub body: Block,
    pub line: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Stat {
    Local {
        names: Vec<String>,
        values: Vec<Expr>,
        line: u32,
    },
    Assign {
        targets: Vec<Expr>,
        values: Vec<Expr>,
        line: u32,
    },
    /// Call or method-call statement.
    Call { call: Expr, line: u32 },
    Do { body: Block, line: u32 },
    If {
        /// `if` clause followed by every `elseif`.
        clauses: Vec<(Expr, Block)>,
        else_block: Option<Block>,
        line: u32,
    },
    While { cond: Expr, body: Block, line: u32 },
    NumericFor {
        var: String,
        start: Expr,
        limit: Expr,
        step: Option<Expr>,
        body: Block,
        line: u32,
    },
    GenericFor {
        names: Vec<String>,
        iterators: Vec<Expr>,
        body: Block,
        line: u32,
    },
    Repeat { body: Block, cond: Expr, line: u32 },
    Function {
        name: FuncName,
        func: FuncBody,
        line: u32,
    },
    LocalFunction {
        name: String,
        func: FuncBody,
        line: u32,
    },
    Return { values: Vec<Expr>, line: u32 },
    Break { line: u32 },
}

impl Stat {
    pub fn line(&self) -> u32 {
        match self {
            Stat::Local { line, .. }
            | Stat::Assign { line, .. }
            | Stat::Call { line, .. }
            | Stat::Do { line, .. }
            | Stat::If { line, .. }
            | Stat::While { line, .. }
            | Stat::NumericFor { line, .. }
            | Stat::GenericFor { line, .. }
            | Stat::Repeat { line, .. }
            | Stat::Function { line, .. }
            | Stat::LocalFunction { line, .. }
            | Stat::Return { line, .. }
            | Stat::Break { line } => *line,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum TableField {
    Positional(Expr),
    /// `[key] = value`
    Keyed { key: Expr, value: Expr },
    /// `name = value`
    Named { name: String, value: Expr },
}

#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    Nil,
    True,
    False,
    Number(Number),
    Str(Vec<u8>),
    Vararg,
    Function(Box<FuncBody>),
    Table(Vec<TableField>),
    Name(String),
    Index { obj: Box<Expr>, key: Box<Expr> },
    /// Dot access `obj.name`.
    Field { obj: Box<Expr>, name: String },
    Call { func: Box<Expr>, args: Vec<Expr> },
    MethodCall {
        obj: Box<Expr>,
        method: String,
        args: Vec<Expr>,
    },
    BinOp {
        op: BinOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
    UnOp { op: UnOp, operand: Box<Expr> },
    /// Parenthesized expression; truncates multiple results to one.
    Paren(Box<Expr>),
}

impl Expr {
    /// Calls and `...` can produce any number of values.
    pub fn is_multi(&self) -> bool {
        matches!(self, Expr::Call { .. } | Expr::MethodCall { .. } | Expr::Vararg)
    }

    pub fn is_call(&self) -> bool {
        matches!(self, Expr::Call { .. } | Expr::MethodCall { .. })
    }

    /// Names, indexing and fields can appear on the left of `=`.
    pub fn is_assignable(&self) -> bool {
        matches!(self, Expr::Name(_) | Expr::Index { .. } | Expr::Field { .. })
    }
}
