//! Finds the chunk locals that function literals refer to.
//!
//! Named locals are numbered in the order the compiler declares them, so it
//! can ask about each declaration as it reaches it. Hidden loop-control
//! locals are never numbered.
use crate::ast::{Block, Expr, FuncBody, Stat, TableField};
use crate::render::free_names;
use std::collections::HashSet;

/// Declaration numbers of the captured locals of one chunk.
#[derive(Debug, Default)]
pub struct Captures {
    captured: HashSet<usize>,
}

impl Captures {
    pub fn analyze(block: &Block) -> Self {
        let mut walker = Walker::default();
        walker.block(block);
        Captures {
            captured: walker.captured,
        }
    }

    pub fn contains(&self, decl: usize) -> bool {
        self.captured.contains(&decl)
    }

    /// Number of captured locals.
    pub fn count(&self) -> usize {
        self.captured.len()
    }
}

#[derive(Default)]
struct Walker {
    /// Locals in scope, innermost last, with their declaration numbers.
    visible: Vec<(String, usize)>,
    declared: usize,
    captured: HashSet<usize>,
}

impl Walker {
    fn declare(&mut self, name: &str) {
        self.visible.push((name.to_string(), self.declared));
        self.declared += 1;
    }

    fn scoped(&mut self, f: impl FnOnce(&mut Self)) {
        let mark = self.visible.len();
        f(self);
        self.visible.truncate(mark);
    }

    fn block(&mut self, block: &Block) {
        for stat in &block.stats {
            self.statement(stat);
        }
    }

    fn statement(&mut self, stat: &Stat) {
        match stat {
            Stat::Local { names, values, .. } => {
                self.exprs(values);
                for name in names {
                    self.declare(name);
                }
            }
            Stat::Assign {
                targets, values, ..
            } => {
                self.exprs(targets);
                self.exprs(values);
            }
            Stat::Call { call, .. } => self.expr(call),
            Stat::Do { body, .. } => self.scoped(|w| w.block(body)),
            Stat::If {
                clauses,
                else_block,
                ..
            } => {
                for (cond, body) in clauses {
                    self.expr(cond);
                    self.scoped(|w| w.block(body));
                }
                if let Some(body) = else_block {
                    self.scoped(|w| w.block(body));
                }
            }
            Stat::While { cond, body, .. } => {
                self.expr(cond);
                self.scoped(|w| w.block(body));
            }
            Stat::Repeat { body, cond, .. } => self.scoped(|w| {
                w.block(body);
                w.expr(cond);
            }),
            Stat::NumericFor {
                var,
                start,
                limit,
                step,
                body,
                ..
            } => {
                self.expr(start);
                self.expr(limit);
                if let Some(step) = step {
                    self.expr(step);
                }
                self.scoped(|w| {
                    w.declare(var);
                    w.block(body);
                });
            }
            Stat::GenericFor {
                names,
                iterators,
                body,
                ..
            } => {
                self.exprs(iterators);
                self.scoped(|w| {
                    for name in names {
                        w.declare(name);
                    }
                    w.block(body);
                });
            }
            Stat::Function { func, .. } => self.function(func),
            Stat::LocalFunction { name, func, .. } => {
                self.declare(name);
                self.function(func);
            }
            Stat::Return { values, .. } => self.exprs(values),
            Stat::Break { .. } => {}
        }
    }

    fn exprs(&mut self, exprs: &[Expr]) {
        for e in exprs {
            self.expr(e);
        }
    }

    fn expr(&mut self, e: &Expr) {
        match e {
            Expr::Nil
            | Expr::True
            | Expr::False
            | Expr::Number(_)
            | Expr::Str(_)
            | Expr::Vararg
            | Expr::Name(_) => {}
            Expr::Function(func) => self.function(func),
            Expr::Table(fields) => {
                for field in fields {
                    match field {
                        TableField::Positional(value) | TableField::Named { value, .. } => {
                            self.expr(value)
                        }
                        TableField::Keyed { key, value } => {
                            self.expr(key);
                            self.expr(value);
                        }
                    }
                }
            }
            Expr::Index { obj, key } => {
                self.expr(obj);
                self.expr(key);
            }
            Expr::Field { obj, .. } => self.expr(obj),
            Expr::Call { func, args } => {
                self.expr(func);
                self.exprs(args);
            }
            Expr::MethodCall { obj, args, .. } => {
                self.expr(obj);
                self.exprs(args);
            }
            Expr::BinOp { lhs, rhs, .. } => {
                self.expr(lhs);
                self.expr(rhs);
            }
            Expr::UnOp { operand, .. } => self.expr(operand),
            Expr::Paren(inner) => self.expr(inner),
        }
    }

    /// Every free name of the literal that names a visible local captures
    /// the innermost such local.
    fn function(&mut self, func: &FuncBody) {
        for name in free_names(func) {
            if let Some((_, decl)) = self.visible.iter().rfind(|(n, _)| *n == name) {
                self.captured.insert(*decl);
            }
        }
    }
}
