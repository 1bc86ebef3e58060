//! Pretty-printer turning function literals back into source text.
//!
//! A function body is wrapped in a factory
//! `function(R) local R3 = R[3] return function(...) ... end end`.
//! Free names that refer to a chunk local are rewritten to `R3[1]`: the
//! local's register holds a one-slot cell, and the factory binds the cell
//! when the VM instantiates the closure. `R` is the register table the VM
//! passes in; it is renamed while any name in the body starts with it.

use crate::ast::{Block, Expr, FuncBody, Stat, TableField};
use std::cell::RefCell;
use std::collections::{BTreeSet, HashSet};
use std::fmt::Write;

/// Stands in for the register table name until every used name is known.
const REGISTER_TABLE: char = '\u{1}';

/// Render `body` as a closure factory. `resolve` maps a free name to the
/// register of the captured chunk local it refers to.
pub fn render_factory(body: &FuncBody, resolve: &dyn Fn(&str) -> Option<u8>) -> String {
    let mut renderer = Renderer {
        out: String::new(),
        resolve,
        scopes: Vec::new(),
        used: HashSet::new(),
        cells: BTreeSet::new(),
    };
    renderer.function(body);

    let mut out = String::from("function(");
    out.push(REGISTER_TABLE);
    out.push_str(") ");
    if !renderer.cells.is_empty() {
        let names: Vec<String> = renderer
            .cells
            .iter()
            .map(|reg| format!("{REGISTER_TABLE}{reg}"))
            .collect();
        let loads: Vec<String> = renderer
            .cells
            .iter()
            .map(|reg| format!("{REGISTER_TABLE}[{reg}]"))
            .collect();
        let _ = write!(out, "local {} = {} ", names.join(", "), loads.join(", "));
    }
    out.push_str("return ");
    out.push_str(&renderer.out);
    out.push_str(" end");

    let mut name = String::from("R");
    while renderer.used.iter().any(|used| used.starts_with(&name)) {
        name.push('_');
    }
    out.replace(REGISTER_TABLE, &name)
}

/// Names a function literal reads or assigns without binding them itself.
pub fn free_names(body: &FuncBody) -> BTreeSet<String> {
    let free = RefCell::new(BTreeSet::new());
    render_factory(body, &|name: &str| {
        free.borrow_mut().insert(name.to_string());
        None
    });
    free.into_inner()
}

/// Quote a byte string as a double-quoted literal with decimal escapes.
pub fn quote(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() + 2);
    out.push('"');
    for &b in bytes {
        match b {
            b'"' | b'\\' => {
                out.push('\\');
                out.push(b as char);
            }
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{b:03}");
            }
        }
    }
    out.push('"');
    out
}

struct Renderer<'a> {
    out: String,
    resolve: &'a dyn Fn(&str) -> Option<u8>,
    /// Names bound inside the rendered function, innermost scope last.
    scopes: Vec<Vec<String>>,
    /// Every name spelled in the body.
    used: HashSet<String>,
    /// Registers of the captured locals the body refers to.
    cells: BTreeSet<u8>,
}

impl Renderer<'_> {
    fn bind(&mut self, name: &str) {
        self.used.insert(name.to_string());
        if let Some(scope) = self.scopes.last_mut() {
            scope.push(name.to_string());
        }
    }

    fn is_bound(&self, name: &str) -> bool {
        self.scopes.iter().any(|s| s.iter().any(|n| n == name))
    }

    fn name(&mut self, name: &str) {
        self.used.insert(name.to_string());
        if !self.is_bound(name) {
            if let Some(reg) = (self.resolve)(name) {
                self.cells.insert(reg);
                self.out.push(REGISTER_TABLE);
                let _ = write!(self.out, "{reg}[1]");
                return;
            }
        }
        self.out.push_str(name);
    }

    /// `function(params) body end`, rendered in a fresh scope.
    fn function(&mut self, func: &FuncBody) {
        self.scopes.push(Vec::new());
        let mut params: Vec<&str> = func.params.iter().map(String::as_str).collect();
        for p in &params {
            self.bind(p);
        }
        if func.is_vararg {
            params.push("...");
        }
        let _ = write!(self.out, "function({}) ", params.join(", "));
        self.statements(&func.body);
        self.out.push_str("end");
        self.scopes.pop();
    }

    fn block(&mut self, block: &Block) {
        self.scopes.push(Vec::new());
        self.statements(block);
        self.scopes.pop();
    }

    fn statements(&mut self, block: &Block) {
        for stat in &block.stats {
            self.statement(stat);
            self.out.push(' ');
        }
    }

    fn statement(&mut self, stat: &Stat) {
        match stat {
            Stat::Local { names, values, .. } => {
                // Values are evaluated before the names come into scope.
                let mut rhs = String::new();
                if !values.is_empty() {
                    rhs = self.capture(|r| {
                        r.out.push_str(" = ");
                        r.expr_list(values);
                    });
                }
                for name in names {
                    self.bind(name);
                }
                let _ = write!(self.out, "local {}{rhs};", names.join(", "));
            }
            Stat::Assign {
                targets, values, ..
            } => {
                self.expr_list(targets);
                self.out.push_str(" = ");
                self.expr_list(values);
                self.out.push(';');
            }
            Stat::Call { call, .. } => {
                self.expr(call);
                self.out.push(';');
            }
            Stat::Do { body, .. } => {
                self.out.push_str("do ");
                self.block(body);
                self.out.push_str("end;");
            }
            Stat::If {
                clauses,
                else_block,
                ..
            } => {
                for (i, (cond, body)) in clauses.iter().enumerate() {
                    self.out.push_str(if i == 0 { "if " } else { "elseif " });
                    self.expr(cond);
                    self.out.push_str(" then ");
                    self.block(body);
                }
                if let Some(body) = else_block {
                    self.out.push_str("else ");
                    self.block(body);
                }
                self.out.push_str("end;");
            }
            Stat::While { cond, body, .. } => {
                self.out.push_str("while ");
                self.expr(cond);
                self.out.push_str(" do ");
                self.block(body);
                self.out.push_str("end;");
            }
            Stat::NumericFor {
                var,
                start,
                limit,
                step,
                body,
                ..
            } => {
                let _ = write!(self.out, "for {var} = ");
                self.expr(start);
                self.out.push_str(", ");
                self.expr(limit);
                if let Some(step) = step {
                    self.out.push_str(", ");
                    self.expr(step);
                }
                self.out.push_str(" do ");
                self.scopes.push(Vec::new());
                self.bind(var);
                self.statements(body);
                self.scopes.pop();
                self.out.push_str("end;");
            }
            Stat::GenericFor {
                names,
                iterators,
                body,
                ..
            } => {
                let _ = write!(self.out, "for {} in ", names.join(", "));
                self.expr_list(iterators);
                self.out.push_str(" do ");
                self.scopes.push(Vec::new());
                for name in names {
                    self.bind(name);
                }
                self.statements(body);
                self.scopes.pop();
                self.out.push_str("end;");
            }
            Stat::Repeat { body, cond, .. } => {
                self.out.push_str("repeat ");
                self.scopes.push(Vec::new());
                self.statements(body);
                self.out.push_str("until ");
                self.expr(cond);
                self.scopes.pop();
                self.out.push(';');
            }
            Stat::Function { name, func, .. } => {
                let mut path = name.path.iter().chain(name.method.iter());
                if let Some(root) = path.next() {
                    self.name(root);
                }
                for field in path {
                    let _ = write!(self.out, ".{field}");
                }
                self.out.push_str(" = ");
                self.function(func);
                self.out.push(';');
            }
            Stat::LocalFunction { name, func, .. } => {
                self.bind(name);
                let _ = write!(self.out, "local {name}; {name} = ");
                self.function(func);
                self.out.push(';');
            }
            Stat::Return { values, .. } => {
                self.out.push_str("return");
                if !values.is_empty() {
                    self.out.push(' ');
                    self.expr_list(values);
                }
                self.out.push(';');
            }
            Stat::Break { .. } => self.out.push_str("do break end;"),
        }
    }

    /// Run `f` against an empty output buffer and return what it wrote.
    fn capture(&mut self, f: impl FnOnce(&mut Self)) -> String {
        let saved = std::mem::take(&mut self.out);
        f(self);
        std::mem::replace(&mut self.out, saved)
    }

    fn expr_list(&mut self, exprs: &[Expr]) {
        for (i, e) in exprs.iter().enumerate() {
            if i > 0 {
                self.out.push_str(", ");
            }
            self.expr(e);
        }
    }

    /// Render an expression in prefix position (before `(`, `[`, `.` or `:`).
    fn prefix(&mut self, e: &Expr) {
        match e {
            Expr::Name(_)
            | Expr::Index { .. }
            | Expr::Field { .. }
            | Expr::Call { .. }
            | Expr::MethodCall { .. }
            | Expr::Paren(_) => self.expr(e),
            _ => {
                self.out.push('(');
                self.expr(e);
                self.out.push(')');
            }
        }
    }

    fn expr(&mut self, e: &Expr) {
        match e {
            Expr::Nil => self.out.push_str("nil"),
            Expr::True => self.out.push_str("true"),
            Expr::False => self.out.push_str("false"),
            Expr::Number(n) => {
                let text = n.text();
                if text.starts_with('-') {
                    let _ = write!(self.out, "({text})");
                } else {
                    self.out.push_str(&text);
                }
            }
            Expr::Str(s) => self.out.push_str(&quote(s)),
            Expr::Vararg => self.out.push_str("..."),
            Expr::Function(func) => self.function(func),
            Expr::Table(fields) => {
                self.out.push('{');
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        self.out.push_str(", ");
                    }
                    match field {
                        TableField::Positional(value) => self.expr(value),
                        TableField::Keyed { key, value } => {
                            self.out.push('[');
                            self.expr(key);
                            self.out.push_str("] = ");
                            self.expr(value);
                        }
                        TableField::Named { name, value } => {
                            let _ = write!(self.out, "{name} = ");
                            self.expr(value);
                        }
                    }
                }
                self.out.push('}');
            }
            Expr::Name(name) => self.name(name),
            Expr::Index { obj, key } => {
                self.prefix(obj);
                self.out.push('[');
                self.expr(key);
                self.out.push(']');
            }
            Expr::Field { obj, name } => {
                self.prefix(obj);
                let _ = write!(self.out, ".{name}");
            }
            Expr::Call { func, args } => {
                self.prefix(func);
                self.out.push('(');
                self.expr_list(args);
                self.out.push(')');
            }
            Expr::MethodCall { obj, method, args } => {
                self.prefix(obj);
                let _ = write!(self.out, ":{method}(");
                self.expr_list(args);
                self.out.push(')');
            }
            Expr::BinOp { op, lhs, rhs } => {
                self.out.push('(');
                self.expr(lhs);
                let _ = write!(self.out, " {} ", op.symbol());
                self.expr(rhs);
                self.out.push(')');
            }
            Expr::UnOp { op, operand } => {
                let _ = write!(self.out, "({}", op.symbol());
                self.expr(operand);
                self.out.push(')');
            }
            Expr::Paren(inner) => {
                self.out.push('(');
                self.expr(inner);
                self.out.push(')');
            }
        }
    }
}
