/// Expression compilation.
use super::{CompileError, Compiler};
use crate::ast::{BinOp, Expr, FuncBody, Number, TableField, UnOp};
use crate::chunk::Constant;
use crate::opcode::{OpCode, RK_BIAS};
use crate::render;

/// Positional table items buffered in registers before a SETLIST flush.
pub const FIELDS_PER_FLUSH: usize = 50;

/// Value of a numeric literal expression, folding arithmetic on literals.
/// Division or modulo by zero, NaN results and integer overflow are left to
/// the runtime.
pub fn fold_number(e: &Expr) -> Option<Number> {
    match e {
        Expr::Number(n) => Some(*n),
        Expr::Paren(inner) => fold_number(inner),
        Expr::UnOp {
            op: UnOp::Neg,
            operand,
        } => match fold_number(operand)? {
            Number::Int(i) => i.checked_neg().map(Number::Int),
            Number::Float(f) => Some(Number::Float(-f)),
        },
        Expr::BinOp { op, lhs, rhs } if op.is_arithmetic() => {
            fold_arith(*op, fold_number(lhs)?, fold_number(rhs)?)
        }
        _ => None,
    }
}

/// Integer operands keep the integer subtype for `+ - * %`; `/` and `^`
/// always produce floats.
fn fold_arith(op: BinOp, a: Number, b: Number) -> Option<Number> {
    if let (Number::Int(x), Number::Int(y)) = (a, b) {
        match op {
            BinOp::Add => return x.checked_add(y).map(Number::Int),
            BinOp::Sub => return x.checked_sub(y).map(Number::Int),
            BinOp::Mul => return x.checked_mul(y).map(Number::Int),
            BinOp::Mod => {
                // Floored: the result takes the sign of the divisor.
                let m = x.checked_rem(y)?;
                let m = if m != 0 && (m ^ y) < 0 { m + y } else { m };
                return Some(Number::Int(m));
            }
            _ => {}
        }
    }
    let (a, b) = (a.to_f64(), b.to_f64());
    let v = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div if b != 0.0 => a / b,
        BinOp::Mod if b != 0.0 => a - (a / b).floor() * b,
        BinOp::Pow => a.powf(b),
        _ => return None,
    };
    (!v.is_nan()).then_some(Number::Float(v))
}

/// Constant-pool value of a literal, if the expression is one.
fn literal_constant(e: &Expr) -> Option<Constant> {
    match e {
        Expr::Str(s) => Some(Constant::Str(s.clone())),
        _ => fold_number(e).map(Constant::from),
    }
}

/// Operands of a comparison after normalization onto EQ/LT/LE.
struct Comparison {
    op: OpCode,
    /// Outcome that makes the source expression true.
    expect: bool,
    b: u16,
    c: u16,
}

impl Compiler {
    /// Compile an expression into a freshly allocated register.
    pub(super) fn expr_to_next_reg(&mut self, e: &Expr, line: u32) -> Result<u8, CompileError> {
        let reg = self.alloc_reg(line)?;
        self.expr_to_reg(e, reg, line)?;
        Ok(reg)
    }

    /// Compile an expression into any register. Locals are used in place,
    /// except captured ones, whose register holds a cell.
    pub(super) fn expr_to_any_reg(&mut self, e: &Expr, line: u32) -> Result<u8, CompileError> {
        if let Expr::Name(name) = e {
            if let Some(local) = self.scope.resolve_local(name).filter(|l| !l.captured) {
                return Ok(local.reg);
            }
        }
        self.expr_to_next_reg(e, line)
    }

    /// Compile an expression to an RK operand: literals become constant references.
    pub(super) fn expr_to_rk(&mut self, e: &Expr, line: u32) -> Result<u16, CompileError> {
        if let Some(k) = literal_constant(e) {
            let idx = self.add_constant(k, line)?;
            return Ok(RK_BIAS + idx);
        }
        Ok(u16::from(self.expr_to_any_reg(e, line)?))
    }

    /// Compile an expression into `dest`.
    ///
    /// `dest` must be a temporary or a local that is not active yet. Any
    /// temporaries allocated on the way are released before returning.
    pub(super) fn expr_to_reg(&mut self, e: &Expr, dest: u8, line: u32) -> Result<(), CompileError> {
        let saved = self.scope.free_reg;

        if let Some(n) = fold_number(e) {
            return self.load_constant(n.into(), dest, line);
        }

        match e {
            Expr::Number(n) => self.load_constant((*n).into(), dest, line)?,
            Expr::Str(s) => self.load_constant(Constant::Str(s.clone()), dest, line)?,
            Expr::Nil => {
                self.emit_abc(OpCode::LoadNil, dest, u16::from(dest), 0, line);
            }
            Expr::True => {
                self.emit_abc(OpCode::LoadBool, dest, 1, 0, line);
            }
            Expr::False => {
                self.emit_abc(OpCode::LoadBool, dest, 0, 0, line);
            }
            Expr::Vararg => {
                self.emit_abc(OpCode::VarArg, dest, 2, 0, line);
            }
            Expr::Function(body) => self.closure(body, dest, line)?,
            Expr::Table(fields) => {
                if usize::from(dest) + 1 == usize::from(self.scope.free_reg) {
                    self.table_constructor(fields, dest, line)?;
                } else {
                    let tmp = self.alloc_reg(line)?;
                    self.table_constructor(fields, tmp, line)?;
                    self.emit_abc(OpCode::Move, dest, u16::from(tmp), 0, line);
                }
            }
            Expr::Name(name) => match self.scope.resolve_local(name).map(|l| (l.reg, l.captured)) {
                Some((cell, true)) => {
                    self.emit_abc(OpCode::GetUpval, dest, u16::from(cell), 0, line);
                }
                Some((reg, false)) => {
                    if reg != dest {
                        self.emit_abc(OpCode::Move, dest, u16::from(reg), 0, line);
                    }
                }
                None => {
                    let k = self.string_constant(name, line)?;
                    self.emit_abx(OpCode::GetGlobal, dest, k, line);
                }
            },
            Expr::Index { obj, key } => {
                let table = self.expr_to_any_reg(obj, line)?;
                let key = self.expr_to_rk(key, line)?;
                self.emit_abc(OpCode::GetTable, dest, u16::from(table), key, line);
            }
            Expr::Field { obj, name } => {
                let table = self.expr_to_any_reg(obj, line)?;
                let key = RK_BIAS + self.string_constant(name, line)?;
                self.emit_abc(OpCode::GetTable, dest, u16::from(table), key, line);
            }
            Expr::Call { .. } | Expr::MethodCall { .. } => {
                if usize::from(dest) + 1 == usize::from(self.scope.free_reg) {
                    self.compile_call(e, dest, Some(1), line)?;
                } else {
                    let base = self.alloc_reg(line)?;
                    self.compile_call(e, base, Some(1), line)?;
                    self.emit_abc(OpCode::Move, dest, u16::from(base), 0, line);
                }
            }
            Expr::BinOp { op, lhs, rhs } => self.binop_to_reg(*op, lhs, rhs, dest, line)?,
            Expr::UnOp { op, operand } => {
                let src = self.expr_to_any_reg(operand, line)?;
                let opcode = match op {
                    UnOp::Neg => OpCode::Unm,
                    UnOp::Not => OpCode::Not,
                    UnOp::Len => OpCode::Len,
                };
                self.emit_abc(opcode, dest, u16::from(src), 0, line);
            }
            Expr::Paren(inner) => self.expr_to_reg(inner, dest, line)?,
        }

        self.scope.free_reg_to(saved);
        Ok(())
    }

    fn load_constant(&mut self, k: Constant, dest: u8, line: u32) -> Result<(), CompileError> {
        let idx = self.add_constant(k, line)?;
        self.emit_abx(OpCode::LoadK, dest, idx, line);
        Ok(())
    }

    fn binop_to_reg(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        dest: u8,
        line: u32,
    ) -> Result<(), CompileError> {
        match op {
            BinOp::And | BinOp::Or => {
                self.expr_to_reg(lhs, dest, line)?;
                let c = u16::from(op == BinOp::Or);
                self.emit_abc(OpCode::Test, dest, 0, c, line);
                let end = self.emit_jump(line);
                self.expr_to_reg(rhs, dest, line)?;
                self.patch_jump(end);
            }
            BinOp::Concat => {
                // a .. b .. c is right-nested; evaluate the whole chain into
                // consecutive registers and concatenate once.
                let mut operands = vec![lhs];
                let mut rest = rhs;
                while let Expr::BinOp {
                    op: BinOp::Concat,
                    lhs,
                    rhs,
                } = rest
                {
                    operands.push(lhs);
                    rest = rhs;
                }
                operands.push(rest);

                let first = self.scope.free_reg;
                let mut last = first;
                for operand in operands {
                    last = self.expr_to_next_reg(operand, line)?;
                }
                self.emit_abc(OpCode::Concat, dest, u16::from(first), u16::from(last), line);
            }
            _ if op.is_comparison() => {
                let cmp = self.comparison(op, lhs, rhs, line)?;
                self.emit_abc(cmp.op, u8::from(cmp.expect), cmp.b, cmp.c, line);
                self.emit_asbx(OpCode::Jmp, 0, 1, line);
                self.emit_abc(OpCode::LoadBool, dest, 0, 1, line);
                self.emit_abc(OpCode::LoadBool, dest, 1, 0, line);
            }
            _ => {
                let b = self.expr_to_rk(lhs, line)?;
                let c = self.expr_to_rk(rhs, line)?;
                let opcode = match op {
                    BinOp::Add => OpCode::Add,
                    BinOp::Sub => OpCode::Sub,
                    BinOp::Mul => OpCode::Mul,
                    BinOp::Div => OpCode::Div,
                    BinOp::Mod => OpCode::Mod,
                    _ => OpCode::Pow,
                };
                self.emit_abc(opcode, dest, b, c, line);
            }
        }
        Ok(())
    }

    /// Evaluate comparison operands left to right, then map `>`/`>=` onto
    /// LT/LE with swapped operands and `~=` onto EQ expecting false.
    fn comparison(
        &mut self,
        op: BinOp,
        lhs: &Expr,
        rhs: &Expr,
        line: u32,
    ) -> Result<Comparison, CompileError> {
        let l = self.expr_to_rk(lhs, line)?;
        let r = self.expr_to_rk(rhs, line)?;
        let (op, expect, b, c) = match op {
            BinOp::Eq => (OpCode::Eq, true, l, r),
            BinOp::Ne => (OpCode::Eq, false, l, r),
            BinOp::Lt => (OpCode::Lt, true, l, r),
            BinOp::Le => (OpCode::Le, true, l, r),
            BinOp::Gt => (OpCode::Lt, true, r, l),
            _ => (OpCode::Le, true, r, l),
        };
        Ok(Comparison { op, expect, b, c })
    }

    /// Emit a jump taken when the truthiness of `e` equals `jump_if`.
    ///
    /// Returns the JMP to patch, or `None` when the condition is a constant
    /// that never takes the jump.
    pub(super) fn cond_jump(
        &mut self,
        e: &Expr,
        jump_if: bool,
        line: u32,
    ) -> Result<Option<usize>, CompileError> {
        match e {
            Expr::Nil | Expr::False => {
                Ok((!jump_if).then(|| self.emit_jump(line)))
            }
            Expr::True | Expr::Number(_) | Expr::Str(_) => {
                Ok(jump_if.then(|| self.emit_jump(line)))
            }
            Expr::Paren(inner) => self.cond_jump(inner, jump_if, line),
            Expr::UnOp {
                op: UnOp::Not,
                operand,
            } => self.cond_jump(operand, !jump_if, line),
            Expr::BinOp { op, lhs, rhs } if op.is_comparison() => {
                let saved = self.scope.free_reg;
                let cmp = self.comparison(*op, lhs, rhs, line)?;
                self.emit_abc(cmp.op, u8::from(cmp.expect == jump_if), cmp.b, cmp.c, line);
                self.scope.free_reg_to(saved);
                Ok(Some(self.emit_jump(line)))
            }
            _ => {
                let saved = self.scope.free_reg;
                let reg = self.expr_to_any_reg(e, line)?;
                self.emit_abc(OpCode::Test, reg, 0, u16::from(jump_if), line);
                self.scope.free_reg_to(saved);
                Ok(Some(self.emit_jump(line)))
            }
        }
    }

    /// Compile a call with the function in `base` and arguments above it.
    ///
    /// `base` must be the topmost allocated register. `nresults` of `None`
    /// leaves the results open (up to the VM's top). Afterwards the results
    /// occupy `base..base + nresults`. Returns the pc of the CALL.
    pub(super) fn compile_call(
        &mut self,
        e: &Expr,
        base: u8,
        nresults: Option<u8>,
        line: u32,
    ) -> Result<usize, CompileError> {
        let (args, mut nargs) = match e {
            Expr::Call { func, args } => {
                self.expr_to_reg(func, base, line)?;
                (args, 0usize)
            }
            Expr::MethodCall { obj, method, args } => {
                let obj = self.expr_to_any_reg(obj, line)?;
                let key = RK_BIAS + self.string_constant(method, line)?;
                self.emit_abc(OpCode::Self_, base, u16::from(obj), key, line);
                self.scope.free_reg_to(base + 1);
                self.reserve_to(usize::from(base) + 2, line)?;
                (args, 1)
            }
            _ => return Err(self.error_at(line, "expression is not a call")),
        };

        let mut open = false;
        for (i, arg) in args.iter().enumerate() {
            if i + 1 == args.len() && arg.is_multi() {
                self.expr_multi(arg, None, line)?;
                open = true;
            } else {
                self.expr_to_next_reg(arg, line)?;
                nargs += 1;
            }
        }

        let b = if open { 0 } else { nargs as u16 + 1 };
        let c = nresults.map_or(0, |n| u16::from(n) + 1);
        let pc = self.emit_abc(OpCode::Call, base, b, c, line);

        self.scope.free_reg_to(base);
        self.reserve_to(usize::from(base) + usize::from(nresults.unwrap_or(0)), line)?;
        Ok(pc)
    }

    /// Compile a call or `...` at the stack top, producing `want` values
    /// (`None` for all of them). Returns the pc of the emitted CALL or VARARG.
    pub(super) fn expr_multi(
        &mut self,
        e: &Expr,
        want: Option<u8>,
        line: u32,
    ) -> Result<usize, CompileError> {
        let base = self.scope.free_reg;
        if e.is_call() {
            self.alloc_reg(line)?;
            return self.compile_call(e, base, want, line);
        }
        let b = want.map_or(0, |n| u16::from(n) + 1);
        let pc = self.emit_abc(OpCode::VarArg, base, b, 0, line);
        self.reserve_to(usize::from(base) + usize::from(want.unwrap_or(0)), line)?;
        Ok(pc)
    }

    /// Evaluate an expression list into consecutive registers starting at the
    /// stack top. With `want`, the list is adjusted to exactly that many values:
    /// a trailing call or `...` expands, extra values are evaluated and
    /// dropped, missing ones are filled with nil. Returns the first register.
    pub(super) fn explist_to_regs(
        &mut self,
        values: &[Expr],
        want: Option<usize>,
        line: u32,
    ) -> Result<u8, CompileError> {
        let base = self.scope.free_reg;
        let mut filled = 0usize;

        for (i, value) in values.iter().enumerate() {
            let last = i + 1 == values.len();
            if last && value.is_multi() {
                match want {
                    None => {
                        self.expr_multi(value, None, line)?;
                    }
                    Some(want) => {
                        let missing = want.saturating_sub(filled);
                        let n = u8::try_from(missing)
                            .map_err(|_| self.error_at(line, "too many values"))?;
                        self.expr_multi(value, Some(n), line)?;
                        filled += missing;
                    }
                }
            } else if want.map_or(true, |w| filled < w) {
                self.expr_to_next_reg(value, line)?;
                filled += 1;
            } else {
                let saved = self.scope.free_reg;
                self.expr_to_next_reg(value, line)?;
                self.scope.free_reg_to(saved);
            }
        }

        if let Some(want) = want {
            if filled < want {
                let first = usize::from(base) + filled;
                let last = usize::from(base) + want - 1;
                self.reserve_to(last + 1, line)?;
                self.emit_abc(OpCode::LoadNil, first as u8, last as u16, 0, line);
            }
            self.scope.free_reg_to(base);
            self.reserve_to(usize::from(base) + want, line)?;
        }
        Ok(base)
    }

    /// Build a table into `dest`, which must be the topmost allocated register.
    fn table_constructor(
        &mut self,
        fields: &[TableField],
        dest: u8,
        line: u32,
    ) -> Result<(), CompileError> {
        let narr = fields
            .iter()
            .filter(|f| matches!(f, TableField::Positional(_)))
            .count();
        let nhash = fields.len() - narr;
        self.emit_abc(
            OpCode::NewTable,
            dest,
            narr.min(usize::from(u16::MAX)) as u16,
            nhash.min(usize::from(u16::MAX)) as u16,
            line,
        );

        let mut pending = 0usize;
        let mut flushed = 0usize;
        for (i, field) in fields.iter().enumerate() {
            match field {
                TableField::Positional(value) => {
                    if i + 1 == fields.len() && value.is_multi() {
                        self.expr_multi(value, None, line)?;
                        let start = self.list_start(flushed, line)?;
                        self.emit_abc(OpCode::SetList, dest, 0, start, line);
                        self.scope.free_reg_to(dest + 1);
                        return Ok(());
                    }
                    self.expr_to_next_reg(value, line)?;
                    pending += 1;
                    if pending == FIELDS_PER_FLUSH {
                        let start = self.list_start(flushed, line)?;
                        self.emit_abc(OpCode::SetList, dest, pending as u16, start, line);
                        flushed += pending;
                        pending = 0;
                        self.scope.free_reg_to(dest + 1);
                    }
                }
                TableField::Keyed { key, value } => {
                    let saved = self.scope.free_reg;
                    let k = self.expr_to_rk(key, line)?;
                    let v = self.expr_to_rk(value, line)?;
                    self.emit_abc(OpCode::SetTable, dest, k, v, line);
                    self.scope.free_reg_to(saved);
                }
                TableField::Named { name, value } => {
                    let saved = self.scope.free_reg;
                    let k = RK_BIAS + self.string_constant(name, line)?;
                    let v = self.expr_to_rk(value, line)?;
                    self.emit_abc(OpCode::SetTable, dest, k, v, line);
                    self.scope.free_reg_to(saved);
                }
            }
        }

        if pending > 0 {
            let start = self.list_start(flushed, line)?;
            self.emit_abc(OpCode::SetList, dest, pending as u16, start, line);
            self.scope.free_reg_to(dest + 1);
        }
        Ok(())
    }

    fn list_start(&self, flushed: usize, line: u32) -> Result<u16, CompileError> {
        u16::try_from(flushed + 1).map_err(|_| self.error_at(line, "table constructor too large"))
    }

    /// Render a function literal into a closure factory and instantiate it in `dest`.
    /// The factory binds the cells of the captured locals it refers to.
    pub(super) fn closure(&mut self, body: &FuncBody, dest: u8, line: u32) -> Result<(), CompileError> {
        let source = {
            let scope = &self.scope;
            render::render_factory(body, &|name: &str| {
                scope
                    .resolve_local(name)
                    .filter(|l| l.captured)
                    .map(|l| l.reg)
            })
        };
        let k = self.add_constant(Constant::Function(source), line)?;
        self.emit_abx(OpCode::Closure, dest, k, line);
        Ok(())
    }
}
