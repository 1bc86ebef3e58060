/// Statement compilation.
use super::{CompileError, Compiler};
use crate::ast::{Block, Expr, FuncBody, FuncName, Stat};
use crate::chunk::Constant;
use crate::opcode::{is_constant, Instruction, OpCode, RK_BIAS};
use log::trace;

/// Where an assignment stores its value.
#[derive(Clone, Copy, Debug)]
enum Target {
    Local(u8),
    /// Captured local; the register holds its cell.
    Cell(u8),
    Global(u16),
    Indexed { table: u8, key: u16 },
}

impl Compiler {
    pub(super) fn block(&mut self, block: &Block) -> Result<(), CompileError> {
        for stat in &block.stats {
            self.statement(stat)?;
        }
        Ok(())
    }

    /// Compile a block in its own scope.
    fn scoped_block(&mut self, block: &Block) -> Result<(), CompileError> {
        self.scope.enter_block(false);
        self.block(block)?;
        self.scope.leave_block();
        Ok(())
    }

    /// Close the innermost loop block and point its breaks at the current pc.
    fn leave_loop(&mut self) {
        if let Some(block) = self.scope.leave_block() {
            for jump in block.breaks {
                self.patch_jump(jump);
            }
        }
    }

    fn statement(&mut self, stat: &Stat) -> Result<(), CompileError> {
        self.last_line = stat.line();
        match stat {
            Stat::Local {
                names,
                values,
                line,
            } => self.stat_local(names, values, *line),
            Stat::Assign {
                targets,
                values,
                line,
            } => self.stat_assign(targets, values, *line),
            Stat::Call { call, line } => {
                let saved = self.scope.free_reg;
                let base = self.alloc_reg(*line)?;
                self.compile_call(call, base, Some(0), *line)?;
                self.scope.free_reg_to(saved);
                Ok(())
            }
            Stat::Do { body, .. } => self.scoped_block(body),
            Stat::If {
                clauses,
                else_block,
                line,
            } => self.stat_if(clauses, else_block.as_ref(), *line),
            Stat::While { cond, body, line } => self.stat_while(cond, body, *line),
            Stat::Repeat { body, cond, line } => self.stat_repeat(body, cond, *line),
            Stat::NumericFor {
                var,
                start,
                limit,
                step,
                body,
                line,
            } => self.stat_numeric_for(var, start, limit, step.as_ref(), body, *line),
            Stat::GenericFor {
                names,
                iterators,
                body,
                line,
            } => self.stat_generic_for(names, iterators, body, *line),
            Stat::Function { name, func, line } => self.stat_function(name, func, *line),
            Stat::LocalFunction { name, func, line } => self.stat_local_function(name, func, *line),
            Stat::Return { values, line } => self.stat_return(values, *line),
            Stat::Break { line } => {
                let jump = self.emit_jump(*line);
                match self.scope.find_loop_block() {
                    Some(block) => {
                        block.breaks.push(jump);
                        Ok(())
                    }
                    None => Err(self.error_at(*line, "'break' outside loop")),
                }
            }
        }
    }

    fn stat_local(&mut self, names: &[String], values: &[Expr], line: u32) -> Result<(), CompileError> {
        let base = self.explist_to_regs(values, Some(names.len()), line)?;
        // The values already sit in the registers the new locals will take.
        self.scope.free_reg_to(base);
        for name in names {
            self.declare_local(name, line)?;
        }
        Ok(())
    }

    /// The name is in scope inside its own body, so a recursive function
    /// captures itself: its cell exists before the closure is stored in it.
    fn stat_local_function(&mut self, name: &str, func: &FuncBody, line: u32) -> Result<(), CompileError> {
        let reg = self.declare_local(name, line)?;
        if !self.scope.resolve_local(name).is_some_and(|l| l.captured) {
            return self.closure(func, reg, line);
        }
        let tmp = self.alloc_reg(line)?;
        self.closure(func, tmp, line)?;
        self.emit_abc(OpCode::SetUpval, tmp, u16::from(reg), 0, line);
        self.scope.free_reg_to(tmp);
        Ok(())
    }

    // ---- Assignment ----

    /// Resolve an assignment target. With `pin_locals`, locals used as table
    /// or key are copied so later stores of the same statement can't change them.
    fn target(&mut self, e: &Expr, pin_locals: bool, line: u32) -> Result<Target, CompileError> {
        match e {
            Expr::Name(name) => match self.scope.resolve_local(name).map(|l| (l.reg, l.captured)) {
                Some((cell, true)) => Ok(Target::Cell(cell)),
                Some((reg, false)) => Ok(Target::Local(reg)),
                None => Ok(Target::Global(self.string_constant(name, line)?)),
            },
            Expr::Index { obj, key } => {
                let table = self.expr_to_any_reg(obj, line)?;
                let table = self.pin(table, pin_locals, line)?;
                let key = self.expr_to_rk(key, line)?;
                let key = if is_constant(key) {
                    key
                } else {
                    u16::from(self.pin(key as u8, pin_locals, line)?)
                };
                Ok(Target::Indexed { table, key })
            }
            Expr::Field { obj, name } => {
                let table = self.expr_to_any_reg(obj, line)?;
                let table = self.pin(table, pin_locals, line)?;
                let key = RK_BIAS + self.string_constant(name, line)?;
                Ok(Target::Indexed { table, key })
            }
            _ => Err(self.error_at(line, "syntax error: cannot assign to this expression")),
        }
    }

    fn pin(&mut self, reg: u8, pin_locals: bool, line: u32) -> Result<u8, CompileError> {
        if !pin_locals || !self.scope.locals.iter().any(|l| l.reg == reg) {
            return Ok(reg);
        }
        let copy = self.alloc_reg(line)?;
        self.emit_abc(OpCode::Move, copy, u16::from(reg), 0, line);
        Ok(copy)
    }

    fn store(&mut self, target: Target, src: u8, line: u32) {
        match target {
            Target::Local(reg) => {
                if reg != src {
                    self.emit_abc(OpCode::Move, reg, u16::from(src), 0, line);
                }
            }
            Target::Cell(cell) => {
                self.emit_abc(OpCode::SetUpval, src, u16::from(cell), 0, line);
            }
            Target::Global(k) => {
                self.emit_abx(OpCode::SetGlobal, src, k, line);
            }
            Target::Indexed { table, key } => {
                self.emit_abc(OpCode::SetTable, table, key, u16::from(src), line);
            }
        }
    }

    fn stat_assign(&mut self, targets: &[Expr], values: &[Expr], line: u32) -> Result<(), CompileError> {
        let saved = self.scope.free_reg;

        if let ([target], [value]) = (targets, values) {
            match self.target(target, false, line)? {
                Target::Indexed { table, key } => {
                    let v = self.expr_to_rk(value, line)?;
                    self.emit_abc(OpCode::SetTable, table, key, v, line);
                }
                other => {
                    let src = self.expr_to_any_reg(value, line)?;
                    self.store(other, src, line);
                }
            }
            self.scope.free_reg_to(saved);
            return Ok(());
        }

        let mut resolved = Vec::with_capacity(targets.len());
        for target in targets {
            resolved.push(self.target(target, true, line)?);
        }
        let base = self.explist_to_regs(values, Some(resolved.len()), line)?;
        for (i, target) in resolved.into_iter().enumerate().rev() {
            self.store(target, base + i as u8, line);
        }
        self.scope.free_reg_to(saved);
        Ok(())
    }

    // ---- Control flow ----

    fn stat_if(
        &mut self,
        clauses: &[(Expr, Block)],
        else_block: Option<&Block>,
        line: u32,
    ) -> Result<(), CompileError> {
        let mut escapes = Vec::new();
        for (i, (cond, body)) in clauses.iter().enumerate() {
            let has_more = i + 1 < clauses.len() || else_block.is_some();
            let skip = self.cond_jump(cond, false, line)?;
            self.scoped_block(body)?;
            if has_more {
                escapes.push(self.emit_jump(line));
            }
            if let Some(skip) = skip {
                self.patch_jump(skip);
            }
        }
        if let Some(body) = else_block {
            self.scoped_block(body)?;
        }
        for jump in escapes {
            self.patch_jump(jump);
        }
        Ok(())
    }

    fn stat_while(&mut self, cond: &Expr, body: &Block, line: u32) -> Result<(), CompileError> {
        let entry = self.current_pc();
        let exit = self.cond_jump(cond, false, line)?;

        self.scope.enter_block(true);
        self.block(body)?;
        let back = self.emit_jump(line);
        self.patch_jump_to(back, entry);
        if let Some(exit) = exit {
            self.patch_jump(exit);
        }
        self.leave_loop();
        Ok(())
    }

    fn stat_repeat(&mut self, body: &Block, cond: &Expr, line: u32) -> Result<(), CompileError> {
        let entry = self.current_pc();

        // The condition can see the body's locals.
        self.scope.enter_block(true);
        self.block(body)?;
        if let Some(back) = self.cond_jump(cond, false, line)? {
            self.patch_jump_to(back, entry);
        }
        self.leave_loop();
        Ok(())
    }

    fn stat_numeric_for(
        &mut self,
        var: &str,
        start: &Expr,
        limit: &Expr,
        step: Option<&Expr>,
        body: &Block,
        line: u32,
    ) -> Result<(), CompileError> {
        self.scope.enter_block(true);

        let base = self.scope.free_reg;
        self.expr_to_next_reg(start, line)?;
        self.expr_to_next_reg(limit, line)?;
        match step {
            Some(step) => {
                self.expr_to_next_reg(step, line)?;
            }
            None => {
                let reg = self.alloc_reg(line)?;
                let k = self.add_constant(Constant::integer(1), line)?;
                self.emit_abx(OpCode::LoadK, reg, k, line);
            }
        }
        self.scope.free_reg_to(base);
        self.add_local("(for index)", line)?;
        self.add_local("(for limit)", line)?;
        self.add_local("(for step)", line)?;

        let prep = self.emit_asbx(OpCode::ForPrep, base, 0, line);
        let body_start = self.current_pc();

        self.scope.enter_block(false);
        self.declare_local(var, line)?;
        self.block(body)?;
        self.scope.leave_block();

        let forloop = self.emit_asbx(OpCode::ForLoop, base, 0, line);
        self.patch_jump_to(forloop, body_start);
        self.patch_jump_to(prep, forloop);
        self.leave_loop();
        Ok(())
    }

    fn stat_generic_for(
        &mut self,
        names: &[String],
        iterators: &[Expr],
        body: &Block,
        line: u32,
    ) -> Result<(), CompileError> {
        self.scope.enter_block(true);

        let base = self.explist_to_regs(iterators, Some(3), line)?;
        self.scope.free_reg_to(base);
        self.add_local("(for generator)", line)?;
        self.add_local("(for state)", line)?;
        self.add_local("(for control)", line)?;

        let enter = self.emit_jump(line);
        let body_start = self.current_pc();

        self.scope.enter_block(false);
        for name in names {
            self.declare_local(name, line)?;
        }
        self.block(body)?;
        self.scope.leave_block();

        self.patch_jump(enter);
        self.emit_abc(OpCode::TForLoop, base, 0, names.len() as u16, line);
        let back = self.emit_jump(line);
        self.patch_jump_to(back, body_start);
        self.leave_loop();
        Ok(())
    }

    // ---- Functions ----

    fn stat_function(&mut self, name: &FuncName, func: &FuncBody, line: u32) -> Result<(), CompileError> {
        trace!("function {} at line {line}", name.encoded());
        let mut path = name.path.iter();
        let root = path.next().cloned().unwrap_or_default();
        let mut target = Expr::Name(root);
        for field in path.chain(name.method.iter()) {
            target = Expr::Field {
                obj: Box::new(target),
                name: field.clone(),
            };
        }

        let saved = self.scope.free_reg;
        let target = self.target(&target, false, line)?;
        let reg = self.alloc_reg(line)?;
        self.closure(func, reg, line)?;
        self.store(target, reg, line);
        self.scope.free_reg_to(saved);
        Ok(())
    }

    fn stat_return(&mut self, values: &[Expr], line: u32) -> Result<(), CompileError> {
        let saved = self.scope.free_reg;

        match values {
            [] => {
                self.emit_abc(OpCode::Return, 0, 1, 0, line);
            }
            [call] if call.is_call() => {
                let base = self.alloc_reg(line)?;
                let pc = self.compile_call(call, base, None, line)?;
                if let Some(inst) = self.chunk.get_mut(pc) {
                    *inst = Instruction::abc(OpCode::TailCall, inst.a(), inst.b(), 0);
                }
                self.emit_abc(OpCode::Return, base, 0, 0, line);
            }
            [Expr::Name(name)] if self.scope.resolve_local(name).is_some() => {
                let reg = self.expr_to_any_reg(&values[0], line)?;
                self.emit_abc(OpCode::Return, reg, 2, 0, line);
            }
            _ => {
                let base = self.explist_to_regs(values, None, line)?;
                let open = values.last().is_some_and(Expr::is_multi);
                let b = if open { 0 } else { values.len() as u16 + 1 };
                self.emit_abc(OpCode::Return, base, b, 0, line);
            }
        }

        self.scope.free_reg_to(saved);
        Ok(())
    }
}
