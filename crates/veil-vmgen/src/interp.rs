//! Reference interpreter for compiled chunks.
//!
//! Mirrors the generated Lua handlers instruction for instruction, so tests
//! can check program behavior without a Lua runtime. Rendered closures are
//! Lua source and cannot run here; calling one is [`RuntimeError::Unsupported`].
use indexmap::IndexMap;
use log::trace;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;
use veil_compiler::chunk::{BytecodeChunk, Constant};
use veil_compiler::opcode::{OpCode, RK_BIAS};

pub const DEFAULT_STEP_LIMIT: u64 = 10_000_000;

/// Key under which a captured local's cell holds its value.
const CELL_SLOT: Value = Value::Number(1.0);

#[derive(Clone, Debug, PartialEq, Error)]
pub enum RuntimeError {
    #[error("attempt to {action} a {kind} value")]
    Type {
        action: &'static str,
        kind: &'static str,
    },

    #[error("attempt to compare {0} with {1}")]
    Compare(&'static str, &'static str),

    #[error("table index is {0}")]
    BadKey(&'static str),

    #[error("'for' {0} must be a number")]
    ForValue(&'static str),

    #[error("bad argument #{arg} to '{name}' ({message})")]
    BadArgument {
        arg: usize,
        name: &'static str,
        message: String,
    },

    #[error("rendered functions cannot run in the reference interpreter")]
    Unsupported,

    #[error("step limit of {0} instructions exceeded")]
    StepLimit(u64),

    #[error("malformed instruction at pc {0}")]
    BadInstruction(usize),
}

type RuntimeResult<T> = Result<T, RuntimeError>;

/// Native functions available as globals.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Builtin {
    Print,
    ToString,
    Type,
    Ipairs,
    /// Iterator returned by `ipairs`.
    IpairsStep,
    Pairs,
    Next,
}

impl Builtin {
    pub const GLOBALS: [Builtin; 6] = [
        Builtin::Print,
        Builtin::ToString,
        Builtin::Type,
        Builtin::Ipairs,
        Builtin::Pairs,
        Builtin::Next,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Builtin::Print => "print",
            Builtin::ToString => "tostring",
            Builtin::Type => "type",
            Builtin::Ipairs => "ipairs",
            Builtin::IpairsStep => "ipairs_iterator",
            Builtin::Pairs => "pairs",
            Builtin::Next => "next",
        }
    }
}

pub type TableRef = Rc<RefCell<Table>>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Number(f64),
    Str(Rc<[u8]>),
    Table(TableRef),
    Builtin(Builtin),
    /// A closure factory's Lua source.
    Function(Rc<str>),
}

impl Value {
    pub fn str(s: impl AsRef<[u8]>) -> Self {
        Value::Str(Rc::from(s.as_ref()))
    }

    pub fn new_table() -> Self {
        Value::Table(Rc::new(RefCell::new(Table::default())))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Nil => "nil",
            Value::Bool(_) => "boolean",
            Value::Number(_) => "number",
            Value::Str(_) => "string",
            Value::Table(_) => "table",
            Value::Builtin(_) | Value::Function(_) => "function",
        }
    }

    pub fn truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false))
    }

    /// Numeric value, converting numeric strings the way arithmetic does.
    pub fn to_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Str(s) => parse_number(s),
            _ => None,
        }
    }

    /// Text `tostring` produces.
    pub fn to_display(&self) -> String {
        match self {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => number_to_string(*n),
            Value::Str(s) => String::from_utf8_lossy(s).into_owned(),
            Value::Table(t) => format!("table: {:p}", Rc::as_ptr(t)),
            Value::Builtin(b) => format!("function: builtin: {}", b.name()),
            Value::Function(f) => format!("function: {:p}", Rc::as_ptr(f) as *const u8),
        }
    }
}

/// Raw equality: by value for scalars and strings, by identity otherwise.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Number(a), Value::Number(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::Table(a), Value::Table(b)) => Rc::ptr_eq(a, b),
            (Value::Builtin(a), Value::Builtin(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{:?}", String::from_utf8_lossy(s)),
            other => f.write_str(&other.to_display()),
        }
    }
}

/// Parse a numeric string: decimal with optional exponent, or `0x` hex.
fn parse_number(bytes: &[u8]) -> Option<f64> {
    let text = std::str::from_utf8(bytes).ok()?.trim();
    let (negative, unsigned) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text.strip_prefix('+').unwrap_or(text)),
    };
    let hex = unsigned
        .strip_prefix("0x")
        .or_else(|| unsigned.strip_prefix("0X"));
    let value = match hex {
        Some(digits) => u64::from_str_radix(digits, 16).ok()? as f64,
        None if unsigned.starts_with(|c: char| c.is_ascii_digit() || c == '.') => {
            unsigned.parse::<f64>().ok()?
        }
        None => return None,
    };
    Some(if negative { -value } else { value })
}

/// Format a number the way `%.14g` does.
pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        return if n.is_sign_negative() { "-nan" } else { "nan" }.to_string();
    }
    if n.is_infinite() {
        return if n > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if n == 0.0 {
        return if n.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    if n.fract() == 0.0 && n.abs() < 1e14 {
        return format!("{}", n as i64);
    }

    let sci = format!("{n:.13e}");
    let (mantissa, exp) = match sci.split_once('e') {
        Some((m, e)) => (m, e.parse::<i32>().unwrap_or(0)),
        None => return sci,
    };
    if !(-4..14).contains(&exp) {
        let mantissa = trim_fraction(mantissa);
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{mantissa}e{sign}{:02}", exp.abs())
    } else {
        let decimals = (13 - exp).max(0) as usize;
        trim_fraction(&format!("{n:.decimals$}")).to_string()
    }
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

/// Hashable identity of a table key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum Key {
    Bool(bool),
    Number(u64),
    Str(Rc<[u8]>),
    Ref(usize),
    Builtin(Builtin),
}

impl Key {
    fn of(value: &Value) -> RuntimeResult<Key> {
        Ok(match value {
            Value::Nil => return Err(RuntimeError::BadKey("nil")),
            Value::Number(n) if n.is_nan() => return Err(RuntimeError::BadKey("NaN")),
            // 0 and -0 are the same key.
            Value::Number(n) => Key::Number((n + 0.0).to_bits()),
            Value::Bool(b) => Key::Bool(*b),
            Value::Str(s) => Key::Str(s.clone()),
            Value::Table(t) => Key::Ref(Rc::as_ptr(t) as usize),
            Value::Function(f) => Key::Ref(Rc::as_ptr(f) as *const u8 as usize),
            Value::Builtin(b) => Key::Builtin(*b),
        })
    }
}

/// Insertion-ordered table. Entries assigned nil stay in place so `next`
/// keeps working while a traversal clears fields.
#[derive(Debug, Default)]
pub struct Table {
    entries: IndexMap<Key, (Value, Value)>,
}

impl Table {
    pub fn get(&self, key: &Value) -> Value {
        Key::of(key)
            .ok()
            .and_then(|k| self.entries.get(&k))
            .map(|(_, v)| v.clone())
            .unwrap_or(Value::Nil)
    }

    pub fn set(&mut self, key: Value, value: Value) -> RuntimeResult<()> {
        let k = Key::of(&key)?;
        match self.entries.get_mut(&k) {
            Some(slot) => slot.1 = value,
            None if matches!(value, Value::Nil) => {}
            None => {
                self.entries.insert(k, (key, value));
            }
        }
        Ok(())
    }

    /// Border: the count of consecutive non-nil integer keys from 1.
    pub fn len(&self) -> usize {
        let mut n = 0;
        while !matches!(self.get(&Value::Number((n + 1) as f64)), Value::Nil) {
            n += 1;
        }
        n
    }

    pub fn is_empty(&self) -> bool {
        self.entries.values().all(|(_, v)| matches!(v, Value::Nil))
    }

    /// The entry after `key` in traversal order (`nil` starts the traversal).
    pub fn next(&self, key: &Value) -> RuntimeResult<Option<(Value, Value)>> {
        let start = match key {
            Value::Nil => 0,
            key => {
                let k = Key::of(key)?;
                let index = self.entries.get_index_of(&k).ok_or(RuntimeError::BadArgument {
                    arg: 2,
                    name: "next",
                    message: "invalid key to 'next'".to_string(),
                })?;
                index + 1
            }
        };
        Ok(self
            .entries
            .values()
            .skip(start)
            .find(|(_, v)| !matches!(v, Value::Nil))
            .cloned())
    }
}

/// Execution counters.
#[derive(Clone, Debug)]
pub struct Stats {
    executed: [u64; OpCode::COUNT],
    /// Back edges taken by FORLOOP and TFORLOOP.
    pub loop_iterations: u64,
    pub steps: u64,
}

impl Default for Stats {
    fn default() -> Self {
        Stats {
            executed: [0; OpCode::COUNT],
            loop_iterations: 0,
            steps: 0,
        }
    }
}

impl Stats {
    /// How many times `op` executed.
    pub fn count(&self, op: OpCode) -> u64 {
        self.executed[op as usize]
    }
}

/// Register file and operand access for one chunk.
struct Frame {
    constants: Vec<Value>,
    regs: Vec<Value>,
    varargs: Vec<Value>,
    top: usize,
}

impl Frame {
    fn reg(&self, r: usize) -> Value {
        self.regs.get(r).cloned().unwrap_or(Value::Nil)
    }

    fn set(&mut self, r: usize, value: Value) {
        if r >= self.regs.len() {
            self.regs.resize(r + 1, Value::Nil);
        }
        self.regs[r] = value;
    }

    fn constant(&self, index: usize, pc: usize) -> RuntimeResult<Value> {
        self.constants
            .get(index)
            .cloned()
            .ok_or(RuntimeError::BadInstruction(pc))
    }

    fn rk(&self, operand: u16, pc: usize) -> RuntimeResult<Value> {
        if operand >= RK_BIAS {
            self.constant(usize::from(operand - RK_BIAS), pc)
        } else {
            Ok(self.reg(usize::from(operand)))
        }
    }

    fn range(&self, first: usize, count: usize) -> Vec<Value> {
        (first..first + count).map(|r| self.reg(r)).collect()
    }
}

fn constant_value(k: &Constant) -> Value {
    match k {
        Constant::Number(text) => match text.parse::<f64>() {
            Ok(n) => Value::Number(n),
            Err(_) => Value::str(text),
        },
        Constant::Str(bytes) => Value::str(bytes),
        Constant::Function(source) => Value::Function(Rc::from(source.as_str())),
    }
}

fn jump(pc: usize, offset: i32, at: usize) -> RuntimeResult<usize> {
    usize::try_from(pc as i64 + i64::from(offset)).map_err(|_| RuntimeError::BadInstruction(at))
}

fn arith(op: OpCode, lhs: &Value, rhs: &Value) -> RuntimeResult<Value> {
    let operand = |v: &Value| {
        v.to_number().ok_or(RuntimeError::Type {
            action: "perform arithmetic on",
            kind: v.type_name(),
        })
    };
    let a = operand(lhs)?;
    let b = operand(rhs)?;
    let n = match op {
        OpCode::Add => a + b,
        OpCode::Sub => a - b,
        OpCode::Mul => a * b,
        OpCode::Div => a / b,
        OpCode::Mod => a - (a / b).floor() * b,
        _ => a.powf(b),
    };
    Ok(Value::Number(n))
}

fn less_than(lhs: &Value, rhs: &Value, or_equal: bool) -> RuntimeResult<bool> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => Ok(if or_equal { a <= b } else { a < b }),
        (Value::Str(a), Value::Str(b)) => Ok(if or_equal { a <= b } else { a < b }),
        _ => Err(RuntimeError::Compare(lhs.type_name(), rhs.type_name())),
    }
}

fn index(obj: &Value, key: &Value) -> RuntimeResult<Value> {
    match obj {
        Value::Table(t) => Ok(t.borrow().get(key)),
        other => Err(RuntimeError::Type {
            action: "index",
            kind: other.type_name(),
        }),
    }
}

fn set_index(obj: &Value, key: Value, value: Value) -> RuntimeResult<()> {
    match obj {
        Value::Table(t) => t.borrow_mut().set(key, value),
        other => Err(RuntimeError::Type {
            action: "index",
            kind: other.type_name(),
        }),
    }
}

fn length(v: &Value) -> RuntimeResult<Value> {
    match v {
        Value::Str(s) => Ok(Value::Number(s.len() as f64)),
        Value::Table(t) => Ok(Value::Number(t.borrow().len() as f64)),
        other => Err(RuntimeError::Type {
            action: "get length of",
            kind: other.type_name(),
        }),
    }
}

fn append_concat(out: &mut Vec<u8>, v: &Value) -> RuntimeResult<()> {
    match v {
        Value::Str(s) => out.extend_from_slice(s),
        Value::Number(n) => out.extend_from_slice(number_to_string(*n).as_bytes()),
        other => {
            return Err(RuntimeError::Type {
                action: "concatenate",
                kind: other.type_name(),
            })
        }
    }
    Ok(())
}

fn for_number(v: &Value, what: &'static str) -> RuntimeResult<f64> {
    v.to_number().ok_or(RuntimeError::ForValue(what))
}

pub struct Interpreter {
    globals: TableRef,
    output: Vec<String>,
    stats: Stats,
    step_limit: u64,
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpreter {
    pub fn new() -> Self {
        let mut globals = Table::default();
        for builtin in Builtin::GLOBALS {
            // Names are strings and values non-nil, so this cannot fail.
            let _ = globals.set(Value::str(builtin.name()), Value::Builtin(builtin));
        }
        Interpreter {
            globals: Rc::new(RefCell::new(globals)),
            output: Vec::new(),
            stats: Stats::default(),
            step_limit: DEFAULT_STEP_LIMIT,
        }
    }

    pub fn with_step_limit(mut self, limit: u64) -> Self {
        self.step_limit = limit;
        self
    }

    /// Lines written by `print`.
    pub fn output(&self) -> &[String] {
        &self.output
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    pub fn global(&self, name: &str) -> Value {
        self.globals.borrow().get(&Value::str(name))
    }

    pub fn set_global(&mut self, name: &str, value: Value) {
        let _ = self.globals.borrow_mut().set(Value::str(name), value);
    }

    /// Execute a chunk with `args` as its varargs, returning its results.
    pub fn run(&mut self, chunk: &BytecodeChunk, args: &[Value]) -> RuntimeResult<Vec<Value>> {
        let mut frame = Frame {
            constants: chunk.constants.iter().map(constant_value).collect(),
            regs: vec![Value::Nil; usize::from(chunk.max_stack) + 1],
            varargs: args.to_vec(),
            top: 0,
        };

        let mut pc = 0usize;
        while let Some(inst) = chunk.code.get(pc).copied() {
            let at = pc;
            pc += 1;
            self.stats.steps += 1;
            if self.stats.steps > self.step_limit {
                return Err(RuntimeError::StepLimit(self.step_limit));
            }
            let op = inst.opcode();
            self.stats.executed[op as usize] += 1;

            let a = usize::from(inst.a());
            let b = inst.b();
            let c = inst.c();
            match op {
                OpCode::Move => frame.set(a, frame.reg(usize::from(b))),
                OpCode::LoadK => {
                    let k = frame.constant(usize::from(b), at)?;
                    frame.set(a, k);
                }
                OpCode::LoadBool => {
                    frame.set(a, Value::Bool(b != 0));
                    if c != 0 {
                        pc += 1;
                    }
                }
                OpCode::LoadNil => {
                    for r in a..=usize::from(b) {
                        frame.set(r, Value::Nil);
                    }
                }
                OpCode::GetUpval => {
                    let v = index(&frame.reg(usize::from(b)), &CELL_SLOT)?;
                    frame.set(a, v);
                }
                OpCode::GetGlobal => {
                    let key = frame.constant(usize::from(b), at)?;
                    let v = self.globals.borrow().get(&key);
                    frame.set(a, v);
                }
                OpCode::GetTable => {
                    let key = frame.rk(c, at)?;
                    let v = index(&frame.reg(usize::from(b)), &key)?;
                    frame.set(a, v);
                }
                OpCode::SetGlobal => {
                    let key = frame.constant(usize::from(b), at)?;
                    self.globals.borrow_mut().set(key, frame.reg(a))?;
                }
                OpCode::SetUpval => {
                    set_index(&frame.reg(usize::from(b)), CELL_SLOT, frame.reg(a))?;
                }
                OpCode::SetTable => {
                    let key = frame.rk(b, at)?;
                    let value = frame.rk(c, at)?;
                    set_index(&frame.reg(a), key, value)?;
                }
                OpCode::NewTable => frame.set(a, Value::new_table()),
                OpCode::Self_ => {
                    let obj = frame.reg(usize::from(b));
                    let method = index(&obj, &frame.rk(c, at)?)?;
                    frame.set(a + 1, obj);
                    frame.set(a, method);
                }
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Mod | OpCode::Pow => {
                    let v = arith(op, &frame.rk(b, at)?, &frame.rk(c, at)?)?;
                    frame.set(a, v);
                }
                OpCode::Unm => {
                    let v = frame.reg(usize::from(b));
                    let n = v.to_number().ok_or(RuntimeError::Type {
                        action: "perform arithmetic on",
                        kind: v.type_name(),
                    })?;
                    frame.set(a, Value::Number(-n));
                }
                OpCode::Not => {
                    let v = !frame.reg(usize::from(b)).truthy();
                    frame.set(a, Value::Bool(v));
                }
                OpCode::Len => {
                    let v = length(&frame.reg(usize::from(b)))?;
                    frame.set(a, v);
                }
                OpCode::Concat => {
                    let mut out = Vec::new();
                    for r in usize::from(b)..=usize::from(c) {
                        append_concat(&mut out, &frame.reg(r))?;
                    }
                    frame.set(a, Value::str(out));
                }
                OpCode::Jmp => pc = jump(pc, inst.sbx(), at)?,
                OpCode::Eq | OpCode::Lt | OpCode::Le => {
                    let lhs = frame.rk(b, at)?;
                    let rhs = frame.rk(c, at)?;
                    let result = match op {
                        OpCode::Eq => lhs == rhs,
                        OpCode::Lt => less_than(&lhs, &rhs, false)?,
                        _ => less_than(&lhs, &rhs, true)?,
                    };
                    if result != (a != 0) {
                        pc += 1;
                    }
                }
                OpCode::Test => {
                    if frame.reg(a).truthy() != (c != 0) {
                        pc += 1;
                    }
                }
                OpCode::TestSet => {
                    let v = frame.reg(usize::from(b));
                    if v.truthy() == (c != 0) {
                        frame.set(a, v);
                    } else {
                        pc += 1;
                    }
                }
                OpCode::Call => {
                    let nargs = if b == 0 {
                        frame.top.saturating_sub(a + 1)
                    } else {
                        usize::from(b) - 1
                    };
                    let results = self.call(&frame.reg(a), frame.range(a + 1, nargs))?;
                    if c == 0 {
                        frame.top = a + results.len();
                        for (i, v) in results.into_iter().enumerate() {
                            frame.set(a + i, v);
                        }
                    } else {
                        let mut results = results.into_iter();
                        for i in 0..usize::from(c) - 1 {
                            frame.set(a + i, results.next().unwrap_or_default());
                        }
                    }
                }
                OpCode::TailCall => {
                    let nargs = if b == 0 {
                        frame.top.saturating_sub(a + 1)
                    } else {
                        usize::from(b) - 1
                    };
                    return self.call(&frame.reg(a), frame.range(a + 1, nargs));
                }
                OpCode::Return => {
                    let n = if b == 0 {
                        frame.top.saturating_sub(a)
                    } else {
                        usize::from(b) - 1
                    };
                    return Ok(frame.range(a, n));
                }
                OpCode::ForLoop => {
                    let step = for_number(&frame.reg(a + 2), "step")?;
                    let limit = for_number(&frame.reg(a + 1), "limit")?;
                    let i = for_number(&frame.reg(a), "initial value")? + step;
                    frame.set(a, Value::Number(i));
                    if (step > 0.0 && i <= limit) || (step <= 0.0 && i >= limit) {
                        pc = jump(pc, inst.sbx(), at)?;
                        frame.set(a + 3, Value::Number(i));
                        self.stats.loop_iterations += 1;
                    }
                }
                OpCode::ForPrep => {
                    let init = for_number(&frame.reg(a), "initial value")?;
                    for_number(&frame.reg(a + 1), "limit")?;
                    let step = for_number(&frame.reg(a + 2), "step")?;
                    frame.set(a, Value::Number(init - step));
                    pc = jump(pc, inst.sbx(), at)?;
                }
                OpCode::TForLoop => {
                    let results =
                        self.call(&frame.reg(a), vec![frame.reg(a + 1), frame.reg(a + 2)])?;
                    let first = results.first().cloned().unwrap_or_default();
                    let mut results = results.into_iter();
                    for i in 1..=usize::from(c) {
                        frame.set(a + 2 + i, results.next().unwrap_or_default());
                    }
                    if matches!(first, Value::Nil) {
                        pc += 1;
                    } else {
                        frame.set(a + 2, first);
                        self.stats.loop_iterations += 1;
                    }
                }
                OpCode::SetList => {
                    let n = if b == 0 {
                        frame.top.saturating_sub(a + 1)
                    } else {
                        usize::from(b)
                    };
                    let table = frame.reg(a);
                    for i in 1..=n {
                        let key = Value::Number((usize::from(c) + i - 1) as f64);
                        set_index(&table, key, frame.reg(a + i))?;
                    }
                }
                OpCode::Close => {
                    let cell = Value::new_table();
                    set_index(&cell, CELL_SLOT, frame.reg(a))?;
                    frame.set(a, cell);
                }
                OpCode::Closure => {
                    let factory = frame.constant(usize::from(b), at)?;
                    frame.set(a, factory);
                }
                OpCode::VarArg => {
                    let n = if b == 0 {
                        frame.top = a + frame.varargs.len();
                        frame.varargs.len()
                    } else {
                        usize::from(b) - 1
                    };
                    for i in 0..n {
                        let v = frame.varargs.get(i).cloned().unwrap_or_default();
                        frame.set(a + i, v);
                    }
                }
            }
        }
        Ok(Vec::new())
    }

    fn call(&mut self, func: &Value, args: Vec<Value>) -> RuntimeResult<Vec<Value>> {
        match func {
            Value::Builtin(builtin) => self.call_builtin(*builtin, args),
            Value::Function(_) => Err(RuntimeError::Unsupported),
            other => Err(RuntimeError::Type {
                action: "call",
                kind: other.type_name(),
            }),
        }
    }

    fn call_builtin(&mut self, builtin: Builtin, args: Vec<Value>) -> RuntimeResult<Vec<Value>> {
        let arg = |i: usize| args.get(i).cloned().unwrap_or_default();
        let table_arg = |i: usize| match args.get(i) {
            Some(Value::Table(t)) => Ok(t.clone()),
            other => Err(RuntimeError::BadArgument {
                arg: i + 1,
                name: builtin.name(),
                message: format!(
                    "table expected, got {}",
                    other.map_or("no value", Value::type_name)
                ),
            }),
        };

        match builtin {
            Builtin::Print => {
                let line = args
                    .iter()
                    .map(Value::to_display)
                    .collect::<Vec<_>>()
                    .join("\t");
                trace!("print: {line}");
                self.output.push(line);
                Ok(Vec::new())
            }
            Builtin::ToString => Ok(vec![Value::str(arg(0).to_display())]),
            Builtin::Type => match args.first() {
                Some(v) => Ok(vec![Value::str(v.type_name())]),
                None => Err(RuntimeError::BadArgument {
                    arg: 1,
                    name: "type",
                    message: "value expected".to_string(),
                }),
            },
            Builtin::Ipairs => {
                let t = table_arg(0)?;
                Ok(vec![
                    Value::Builtin(Builtin::IpairsStep),
                    Value::Table(t),
                    Value::Number(0.0),
                ])
            }
            Builtin::IpairsStep => {
                let t = table_arg(0)?;
                let i = arg(1).to_number().unwrap_or(0.0) + 1.0;
                let v = t.borrow().get(&Value::Number(i));
                if matches!(v, Value::Nil) {
                    Ok(vec![Value::Nil])
                } else {
                    Ok(vec![Value::Number(i), v])
                }
            }
            Builtin::Pairs => {
                let t = table_arg(0)?;
                Ok(vec![Value::Builtin(Builtin::Next), Value::Table(t), Value::Nil])
            }
            Builtin::Next => {
                let t = table_arg(0)?;
                let entry = t.borrow().next(&arg(1))?;
                Ok(match entry {
                    Some((k, v)) => vec![k, v],
                    None => vec![Value::Nil],
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use veil_compiler::compile_source;

    fn run(source: &str) -> Interpreter {
        let chunk = compile_source(source.as_bytes()).unwrap();
        let mut vm = Interpreter::new();
        vm.run(&chunk, &[]).unwrap();
        vm
    }

    fn run_err(source: &str) -> RuntimeError {
        let chunk = compile_source(source.as_bytes()).unwrap();
        Interpreter::new().run(&chunk, &[]).unwrap_err()
    }

    #[test]
    fn test_print_arithmetic() {
        let vm = run("local a, b = 2, 3 print(a + b * 4, a ^ 10, 7 % a, b / a)");
        assert_eq!(vm.output(), ["14\t1024\t1\t1.5"]);
    }

    #[test]
    fn test_globals_and_tables() {
        let vm = run("t = {1, 2, x = 'y'} t[3] = t.x print(#t, t[3])");
        assert_eq!(vm.output(), ["3\ty"]);
        assert!(matches!(vm.global("t"), Value::Table(_)));
    }

    #[test]
    fn test_string_comparison_and_concat() {
        let vm = run("local a, b = 'abc', 'abd' print(a < b, a .. 1 .. b)");
        assert_eq!(vm.output(), ["true\tabc1abd"]);
    }

    #[test]
    fn test_numeric_for_counts_iterations() {
        let vm = run("local s = 0 for i = 1, 10, 3 do s = s + i end print(s)");
        assert_eq!(vm.output(), ["22"]);
        assert_eq!(vm.stats().loop_iterations, 4);
        assert_eq!(vm.stats().count(OpCode::ForPrep), 1);
    }

    #[test]
    fn test_pairs_and_next() {
        let vm = run("local t = {a = 1, b = 2} local n = 0 for k, v in pairs(t) do n = n + v end print(n, next({}))");
        assert_eq!(vm.output(), ["3\tnil"]);
    }

    #[test]
    fn test_varargs_and_results() {
        let chunk = compile_source(b"local a, b = ... return b, a, select").unwrap();
        let results = Interpreter::new()
            .run(&chunk, &[Value::Number(1.0), Value::str("two")])
            .unwrap();
        assert_eq!(results, vec![Value::str("two"), Value::Number(1.0), Value::Nil]);
    }

    #[test]
    fn test_runtime_errors() {
        assert_eq!(
            run_err("local x x()"),
            RuntimeError::Type { action: "call", kind: "nil" }
        );
        assert_eq!(run_err("local t = {} t[nil] = 1"), RuntimeError::BadKey("nil"));
        assert_eq!(run_err("local a = {} print(a < 1)"), RuntimeError::Compare("table", "number"));
        assert_eq!(run_err("local f = function() end f()"), RuntimeError::Unsupported);
        assert_eq!(run_err("for i = 'x', 2 do end"), RuntimeError::ForValue("initial value"));
    }

    #[test]
    fn test_captured_locals_live_in_cells() {
        let vm = run("local x = 5 local f = function() return x end local y = x x = 7 print(y, x)");
        assert_eq!(vm.output(), ["5\t7"]);
        assert_eq!(vm.stats().count(OpCode::Close), 1);
        assert_eq!(vm.stats().count(OpCode::GetUpval), 2);
        assert_eq!(vm.stats().count(OpCode::SetUpval), 1);
    }

    #[test]
    fn test_captured_loop_variable_boxed_per_iteration() {
        let vm = run(
            "local s = 0 for i = 1, 3 do local g = function() return i end s = s + i end print(s)",
        );
        assert_eq!(vm.output(), ["6"]);
        assert_eq!(vm.stats().count(OpCode::Close), 3);
    }

    #[test]
    fn test_step_limit() {
        let chunk = compile_source(b"while true do end").unwrap();
        let err = Interpreter::new().with_step_limit(100).run(&chunk, &[]).unwrap_err();
        assert_eq!(err, RuntimeError::StepLimit(100));
    }

    #[test]
    fn test_table_nil_assignment_keeps_traversal() {
        let mut t = Table::default();
        t.set(Value::str("a"), Value::Number(1.0)).unwrap();
        t.set(Value::str("b"), Value::Number(2.0)).unwrap();
        t.set(Value::str("a"), Value::Nil).unwrap();
        let (k, _) = t.next(&Value::Nil).unwrap().unwrap();
        assert_eq!(k, Value::str("b"));
        assert_eq!(t.next(&Value::str("a")).unwrap().map(|e| e.0), Some(Value::str("b")));
        assert_eq!(t.next(&Value::str("b")).unwrap(), None);
    }

    #[test]
    fn test_number_to_string() {
        assert_eq!(number_to_string(3.0), "3");
        assert_eq!(number_to_string(0.1), "0.1");
        assert_eq!(number_to_string(1.0 / 3.0), "0.33333333333333");
        assert_eq!(number_to_string(1e100), "1e+100");
        assert_eq!(number_to_string(1.5e-7), "1.5e-07");
        assert_eq!(number_to_string(f64::INFINITY), "inf");
        assert_eq!(number_to_string(-0.0), "-0");
    }

    #[test]
    fn test_parse_number() {
        assert_eq!(parse_number(b" 10 "), Some(10.0));
        assert_eq!(parse_number(b"0x1F"), Some(31.0));
        assert_eq!(parse_number(b"-2.5e1"), Some(-25.0));
        assert_eq!(parse_number(b"abc"), None);
        assert_eq!(parse_number(b"inf"), None);
    }
}
