//! Statement lowering

use tarn_ast::{DelegationKind, Expression, Statement, StmtKind, SwitchCase};
use tarn_bytecode::{ExceptionEntry, Opcode};

use super::{ClassGenerator, FinallyEntry, LoopContext, LoopKind};
use crate::error::{CompileError, Result};

impl<'a> ClassGenerator<'a> {
    pub(crate) fn lower_stmt(&mut self, stmt: &Statement) -> Result<()> {
        // Don't emit code after a terminator
        if !self.reachable {
            return Ok(());
        }

        match &stmt.kind {
            StmtKind::Block(stmts) => {
                self.scopes.push_scope();
                for s in stmts {
                    self.lower_stmt(s)?;
                }
                self.scopes.pop_scope();
            }
            StmtKind::Expr(e) => self.lower_expr_discard(e)?,
            StmtKind::VarDecl { name, init, .. } => self.lower_var_decl(name, init.as_ref())?,
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => self.lower_if(cond, then_branch, else_branch.as_deref())?,
            StmtKind::While { cond, body } => self.lower_while(None, cond, body)?,
            StmtKind::DoWhile { body, cond } => self.lower_do_while(None, body, cond)?,
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => self.lower_for(None, init.as_deref(), cond.as_ref(), update.as_ref(), body)?,
            StmtKind::ForEach {
                var_name,
                iterable,
                body,
                ..
            } => self.lower_for_each(None, var_name, iterable, body)?,
            StmtKind::Switch {
                subject,
                cases,
                default,
            } => self.lower_switch(None, subject, cases, default.as_deref())?,
            StmtKind::Labeled { label, body } => self.lower_labeled(label, body)?,
            StmtKind::Break(label) => self.lower_break(label.as_deref())?,
            StmtKind::Continue(label) => self.lower_continue(label.as_deref())?,
            StmtKind::Return(value) => self.lower_return(value.as_ref())?,
            StmtKind::Throw(e) => {
                let kind = self.lower_expr(e)?;
                self.ensure_object(kind);
                self.code.emit(Opcode::Throw);
                self.reachable = false;
            }
            StmtKind::Try {
                body,
                catches,
                finally,
            } => self.lower_try(body, catches, finally.as_deref())?,
            StmtKind::Synchronized { monitor, body } => self.lower_synchronized(monitor, body)?,
            StmtKind::ThisCtorCall(args) => self.lower_delegation(DelegationKind::This, args)?,
            StmtKind::SuperCtorCall(args) => self.lower_delegation(DelegationKind::Super, args)?,
            StmtKind::Empty => {}
        }
        Ok(())
    }

    fn lower_var_decl(&mut self, name: &str, init: Option<&Expression>) -> Result<()> {
        match init {
            Some(e) => {
                let kind = self.lower_expr(e)?;
                self.ensure_object(kind);
            }
            None => self.code.emit(Opcode::ConstNull),
        }
        if self.cell_vars.contains(name) {
            self.code.emit(Opcode::NewCell);
        }
        let slot = self.scopes.declare(name);
        self.emit_u16_op(Opcode::StoreLocal, slot);
        Ok(())
    }

    fn lower_if(
        &mut self,
        cond: &Expression,
        then_branch: &Statement,
        else_branch: Option<&Statement>,
    ) -> Result<()> {
        self.lower_condition(cond)?;
        let skip_then = self.jump(Opcode::JumpIfFalse);
        self.lower_stmt(then_branch)?;

        match else_branch {
            Some(else_stmt) => {
                let skip_else = if self.reachable {
                    Some(self.jump(Opcode::Jump))
                } else {
                    None
                };
                self.patch(skip_then)?;
                self.reachable = true;
                self.lower_stmt(else_stmt)?;
                if let Some(at) = skip_else {
                    self.patch(at)?;
                    self.reachable = true;
                }
            }
            None => {
                self.patch(skip_then)?;
                self.reachable = true;
            }
        }
        Ok(())
    }

    fn lower_while(
        &mut self,
        label: Option<&str>,
        cond: &Expression,
        body: &Statement,
    ) -> Result<()> {
        let start = self.code.offset();
        self.lower_condition(cond)?;
        let exit = self.jump(Opcode::JumpIfFalse);

        self.push_loop(label, LoopKind::Loop, Some(start));
        self.lower_stmt(body)?;
        let ctx = self.pop_loop();

        if self.reachable {
            self.jump_back(Opcode::Jump, start)?;
        }
        self.patch(exit)?;
        self.reachable = true;
        for at in ctx.break_patches {
            self.patch(at)?;
        }
        Ok(())
    }

    fn lower_do_while(
        &mut self,
        label: Option<&str>,
        body: &Statement,
        cond: &Expression,
    ) -> Result<()> {
        let start = self.code.offset();
        self.push_loop(label, LoopKind::Loop, None);
        self.lower_stmt(body)?;
        let ctx = self.pop_loop();

        // `continue` lands on the condition check
        for at in ctx.continue_patches {
            self.patch(at)?;
        }
        self.reachable = true;
        self.lower_condition(cond)?;
        self.jump_back(Opcode::JumpIfTrue, start)?;
        for at in ctx.break_patches {
            self.patch(at)?;
        }
        Ok(())
    }

    fn lower_for(
        &mut self,
        label: Option<&str>,
        init: Option<&Statement>,
        cond: Option<&Expression>,
        update: Option<&Expression>,
        body: &Statement,
    ) -> Result<()> {
        self.scopes.push_scope();
        if let Some(init) = init {
            self.lower_stmt(init)?;
        }
        let start = self.code.offset();
        let exit = match cond {
            Some(c) => {
                self.lower_condition(c)?;
                Some(self.jump(Opcode::JumpIfFalse))
            }
            None => None,
        };

        self.push_loop(label, LoopKind::Loop, None);
        self.lower_stmt(body)?;
        let ctx = self.pop_loop();

        // `continue` lands on the update expression
        let resume = self.reachable || !ctx.continue_patches.is_empty();
        for at in ctx.continue_patches {
            self.patch(at)?;
        }
        if resume {
            self.reachable = true;
            if let Some(update) = update {
                self.lower_expr_discard(update)?;
            }
            self.jump_back(Opcode::Jump, start)?;
        }

        self.reachable = exit.is_some() || !ctx.break_patches.is_empty();
        if let Some(at) = exit {
            self.patch(at)?;
        }
        for at in ctx.break_patches {
            self.patch(at)?;
        }
        self.scopes.pop_scope();
        Ok(())
    }

    /// Desugars to the iterator protocol. The iterator stays in a temp
    /// slot; `IterHasNext`/`IterNext` keep it on the stack, so the loop
    /// pops it once per iteration and once on exit.
    fn lower_for_each(
        &mut self,
        label: Option<&str>,
        var_name: &str,
        iterable: &Expression,
        body: &Statement,
    ) -> Result<()> {
        let kind = self.lower_expr(iterable)?;
        self.ensure_object(kind);
        self.code.emit(Opcode::IterNew);
        let iter_slot = self.scopes.acquire_temp();
        self.emit_u16_op(Opcode::StoreLocal, iter_slot);

        let start = self.code.offset();
        self.emit_u16_op(Opcode::LoadLocal, iter_slot);
        self.code.emit(Opcode::IterHasNext);
        let exit = self.jump(Opcode::JumpIfFalse);
        self.code.emit(Opcode::IterNext);

        self.scopes.push_scope();
        if self.cell_vars.contains(var_name) {
            self.code.emit(Opcode::NewCell);
        }
        let var_slot = self.scopes.declare(var_name);
        self.emit_u16_op(Opcode::StoreLocal, var_slot);
        self.code.emit(Opcode::Pop);

        self.push_loop(label, LoopKind::Loop, Some(start));
        self.lower_stmt(body)?;
        let ctx = self.pop_loop();
        self.scopes.pop_scope();

        if self.reachable {
            self.jump_back(Opcode::Jump, start)?;
        }
        // Exit path still holds the iterator
        self.patch(exit)?;
        self.reachable = true;
        self.code.emit(Opcode::Pop);
        for at in ctx.break_patches {
            self.patch(at)?;
        }
        self.scopes.release_temp(iter_slot);
        Ok(())
    }

    /// Sequential equality-comparison chain; case bodies fall through by
    /// default
    fn lower_switch(
        &mut self,
        label: Option<&str>,
        subject: &Expression,
        cases: &[SwitchCase],
        default: Option<&[Statement]>,
    ) -> Result<()> {
        let kind = self.lower_expr(subject)?;
        self.ensure_object(kind);
        let subject_slot = self.scopes.acquire_temp();
        self.emit_u16_op(Opcode::StoreLocal, subject_slot);

        let mut case_entries = Vec::with_capacity(cases.len());
        for case in cases {
            self.emit_u16_op(Opcode::LoadLocal, subject_slot);
            let kind = self.lower_expr(&case.value)?;
            self.ensure_object(kind);
            self.code.emit(Opcode::CmpEq);
            case_entries.push(self.jump(Opcode::JumpIfTrue));
        }
        let no_match = self.jump(Opcode::Jump);

        self.push_loop(label, LoopKind::Switch, None);
        for (case, entry) in cases.iter().zip(case_entries) {
            self.patch(entry)?;
            self.reachable = true;
            for s in &case.body {
                self.lower_stmt(s)?;
            }
        }
        self.patch(no_match)?;
        self.reachable = true;
        if let Some(stmts) = default {
            for s in stmts {
                self.lower_stmt(s)?;
            }
        }
        let ctx = self.pop_loop();
        for at in ctx.break_patches {
            self.patch(at)?;
        }
        self.reachable = true;
        self.scopes.release_temp(subject_slot);
        Ok(())
    }

    fn lower_labeled(&mut self, label: &str, body: &Statement) -> Result<()> {
        match &body.kind {
            StmtKind::While { cond, body } => self.lower_while(Some(label), cond, body),
            StmtKind::DoWhile { body, cond } => self.lower_do_while(Some(label), body, cond),
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => self.lower_for(
                Some(label),
                init.as_deref(),
                cond.as_ref(),
                update.as_ref(),
                body,
            ),
            StmtKind::ForEach {
                var_name,
                iterable,
                body,
                ..
            } => self.lower_for_each(Some(label), var_name, iterable, body),
            StmtKind::Switch {
                subject,
                cases,
                default,
            } => self.lower_switch(Some(label), subject, cases, default.as_deref()),
            _ => {
                // Labeled non-loop statement: break-only target
                self.push_loop(Some(label), LoopKind::Block, None);
                self.lower_stmt(body)?;
                let ctx = self.pop_loop();
                let had_breaks = !ctx.break_patches.is_empty();
                for at in ctx.break_patches {
                    self.patch(at)?;
                }
                if had_breaks {
                    self.reachable = true;
                }
                Ok(())
            }
        }
    }

    fn lower_break(&mut self, label: Option<&str>) -> Result<()> {
        let idx = self
            .loops
            .iter()
            .rposition(|c| match label {
                Some(l) => c.label.as_deref() == Some(l),
                None => c.kind != LoopKind::Block,
            })
            .ok_or_else(|| match label {
                Some(l) => CompileError::user(format!("undefined label '{l}'")),
                None => CompileError::user("break outside of a loop or switch"),
            })?;
        let depth = self.loops[idx].finally_depth;
        self.replay_finallies(depth)?;
        let at = self.jump(Opcode::Jump);
        self.loops[idx].break_patches.push(at);
        self.reachable = false;
        Ok(())
    }

    fn lower_continue(&mut self, label: Option<&str>) -> Result<()> {
        let idx = self
            .loops
            .iter()
            .rposition(|c| {
                c.kind == LoopKind::Loop
                    && match label {
                        Some(l) => c.label.as_deref() == Some(l),
                        None => true,
                    }
            })
            .ok_or_else(|| match label {
                Some(l) => CompileError::user(format!("undefined loop label '{l}'")),
                None => CompileError::user("continue outside of a loop"),
            })?;
        let depth = self.loops[idx].finally_depth;
        self.replay_finallies(depth)?;
        match self.loops[idx].continue_target {
            Some(target) => self.jump_back(Opcode::Jump, target)?,
            None => {
                let at = self.jump(Opcode::Jump);
                self.loops[idx].continue_patches.push(at);
            }
        }
        self.reachable = false;
        Ok(())
    }

    fn lower_return(&mut self, value: Option<&Expression>) -> Result<()> {
        match value {
            Some(e) => {
                let kind = self.lower_expr(e)?;
                self.ensure_object(kind);
                if self.finallies.is_empty() {
                    self.code.emit(Opcode::ReturnValue);
                } else {
                    // Park the value so finally code can't disturb it
                    let temp = self.scopes.acquire_temp();
                    self.emit_u16_op(Opcode::StoreLocal, temp);
                    self.replay_finallies(0)?;
                    self.emit_u16_op(Opcode::LoadLocal, temp);
                    self.scopes.release_temp(temp);
                    self.code.emit(Opcode::ReturnValue);
                }
            }
            None => {
                self.replay_finallies(0)?;
                self.code.emit(Opcode::Return);
            }
        }
        self.reachable = false;
        Ok(())
    }

    fn lower_try(
        &mut self,
        body: &Statement,
        catches: &[tarn_ast::CatchClause],
        finally: Option<&Statement>,
    ) -> Result<()> {
        let try_start = self.code.offset();
        if let Some(f) = finally {
            self.finallies.push(FinallyEntry::Block(f.clone()));
        }
        self.lower_stmt(body)?;
        if finally.is_some() {
            self.finallies.pop();
        }
        let try_end = self.code.offset();

        let mut end_patches = Vec::new();
        let mut covered = Vec::new();
        if try_end > try_start {
            covered.push((try_start, try_end));
        }

        if self.reachable {
            if let Some(f) = finally {
                self.lower_stmt(f)?;
            }
            if self.reachable {
                end_patches.push(self.jump(Opcode::Jump));
            }
        }

        for catch in catches {
            let handler = self.code.offset();
            self.reachable = true;
            if try_end > try_start {
                self.exceptions.push(ExceptionEntry {
                    start: try_start as u32,
                    end: try_end as u32,
                    handler: handler as u32,
                    catch_type: Some(catch.param_type.name.clone()),
                });
            }
            // The thrown value arrives on the stack
            self.scopes.push_scope();
            let slot = self.scopes.declare(&catch.param_name);
            self.emit_u16_op(Opcode::StoreLocal, slot);

            let catch_start = self.code.offset();
            if let Some(f) = finally {
                self.finallies.push(FinallyEntry::Block(f.clone()));
            }
            self.lower_stmt(&catch.body)?;
            if finally.is_some() {
                self.finallies.pop();
            }
            let catch_end = self.code.offset();
            if finally.is_some() && catch_end > catch_start {
                covered.push((catch_start, catch_end));
            }

            if self.reachable {
                if let Some(f) = finally {
                    self.lower_stmt(f)?;
                }
                if self.reachable {
                    end_patches.push(self.jump(Opcode::Jump));
                }
            }
            self.scopes.pop_scope();
        }

        // Catch-all: run the finally, then rethrow
        if let Some(f) = finally {
            let handler = self.code.offset();
            self.reachable = true;
            for &(start, end) in &covered {
                self.exceptions.push(ExceptionEntry {
                    start: start as u32,
                    end: end as u32,
                    handler: handler as u32,
                    catch_type: None,
                });
            }
            let temp = self.scopes.acquire_temp();
            self.emit_u16_op(Opcode::StoreLocal, temp);
            self.lower_stmt(f)?;
            if self.reachable {
                self.emit_u16_op(Opcode::LoadLocal, temp);
                self.code.emit(Opcode::Throw);
            }
            self.scopes.release_temp(temp);
            self.reachable = false;
        }

        for at in end_patches {
            self.patch(at)?;
            self.reachable = true;
        }
        Ok(())
    }

    /// Pairs `MonitorEnter` with `MonitorExit` on normal and exceptional
    /// exits; break/continue/return inside replay the exit through the
    /// finally stack
    fn lower_synchronized(&mut self, monitor: &Expression, body: &Statement) -> Result<()> {
        let kind = self.lower_expr(monitor)?;
        self.ensure_object(kind);
        self.code.emit(Opcode::Dup);
        let slot = self.scopes.acquire_temp();
        self.emit_u16_op(Opcode::StoreLocal, slot);
        self.code.emit(Opcode::MonitorEnter);

        let start = self.code.offset();
        self.finallies.push(FinallyEntry::Monitor(slot));
        self.lower_stmt(body)?;
        self.finallies.pop();
        let end = self.code.offset();

        if self.reachable {
            self.emit_u16_op(Opcode::LoadLocal, slot);
            self.code.emit(Opcode::MonitorExit);
        }

        if end > start {
            let skip = if self.reachable {
                Some(self.jump(Opcode::Jump))
            } else {
                None
            };
            let handler = self.code.offset();
            self.exceptions.push(ExceptionEntry {
                start: start as u32,
                end: end as u32,
                handler: handler as u32,
                catch_type: None,
            });
            let exc = self.scopes.acquire_temp();
            self.emit_u16_op(Opcode::StoreLocal, exc);
            self.emit_u16_op(Opcode::LoadLocal, slot);
            self.code.emit(Opcode::MonitorExit);
            self.emit_u16_op(Opcode::LoadLocal, exc);
            self.code.emit(Opcode::Throw);
            self.scopes.release_temp(exc);
            match skip {
                Some(at) => {
                    self.patch(at)?;
                    self.reachable = true;
                }
                None => self.reachable = false,
            }
        }
        self.scopes.release_temp(slot);
        Ok(())
    }

    fn lower_delegation(&mut self, kind: DelegationKind, args: &[Expression]) -> Result<()> {
        let target = self.delegation_target(kind, args.len())?;
        self.emit_u16_op(Opcode::LoadLocal, 0);
        for arg in args {
            let k = self.lower_expr(arg)?;
            self.ensure_object(k);
        }
        let owner = self.intern(&target);
        self.code.emit(Opcode::CallCtor);
        self.code.emit_u16(owner);
        let argc = self.call_argc(args.len())?;
        self.code.emit_u8(argc);
        Ok(())
    }

    // ===== Small helpers =====

    pub(crate) fn lower_condition(&mut self, cond: &Expression) -> Result<()> {
        let kind = self.lower_expr(cond)?;
        self.ensure_boolean(kind);
        Ok(())
    }

    fn push_loop(&mut self, label: Option<&str>, kind: LoopKind, continue_target: Option<usize>) {
        self.loops.push(LoopContext {
            label: label.map(str::to_string),
            kind,
            break_patches: Vec::new(),
            continue_target,
            continue_patches: Vec::new(),
            finally_depth: self.finallies.len(),
        });
    }

    fn pop_loop(&mut self) -> LoopContext {
        self.loops.pop().unwrap_or_else(|| LoopContext {
            label: None,
            kind: LoopKind::Loop,
            break_patches: Vec::new(),
            continue_target: None,
            continue_patches: Vec::new(),
            finally_depth: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::tests::generate;
    use tarn_ast::{ClassNode, CompileUnit, MethodNode, Parameter, TypeRef};

    fn method_class(method: MethodNode) -> (CompileUnit, tarn_ast::ClassId) {
        let mut unit = CompileUnit::new();
        let mut class = ClassNode::new("demo.Flow");
        class.add_method(method).unwrap();
        let id = unit.add_class(class);
        (unit, id)
    }

    fn pool_index(file: &tarn_bytecode::ClassFile, s: &str) -> u16 {
        (0..file.pool.len() as u16)
            .find(|&i| file.pool.get(i) == Some(s))
            .unwrap()
    }

    fn count_const_str(code: &[u8], idx: u16) -> usize {
        let bytes = idx.to_le_bytes();
        code.windows(3)
            .filter(|w| w[0] == Opcode::ConstStr as u8 && w[1] == bytes[0] && w[2] == bytes[1])
            .count()
    }

    fn marker() -> Statement {
        Statement::expr(Expression::StringLit("FIN".to_string()))
    }

    #[test]
    fn test_while_emits_conditional_loop() {
        let body = Statement::new(StmtKind::While {
            cond: Expression::BoolLit(true),
            body: Box::new(Statement::expr(Expression::IntLit(1))),
        });
        let method = MethodNode::new("run", TypeRef::void()).with_body(Statement::block(vec![body]));
        let (mut unit, id) = method_class(method);
        let generated = generate(&mut unit, id);
        let code = &generated.file.get_method("run").unwrap().code;
        assert!(code.contains(&(Opcode::JumpIfFalse as u8)));
        assert!(code.contains(&(Opcode::Jump as u8)));
    }

    #[test]
    fn test_finally_copied_to_every_exit_path() {
        // Exit paths: early return, normal fall-through, exceptional
        let body = Statement::new(StmtKind::Try {
            body: Box::new(Statement::block(vec![Statement::new(StmtKind::If {
                cond: Expression::Var("c".to_string()),
                then_branch: Box::new(Statement::ret(Some(Expression::IntLit(1)))),
                else_branch: None,
            })])),
            catches: Vec::new(),
            finally: Some(Box::new(marker())),
        });
        let method = MethodNode::new("run", TypeRef::object())
            .with_params(vec![Parameter::new("c", TypeRef::object())])
            .with_body(Statement::block(vec![body]));
        let (mut unit, id) = method_class(method);
        let generated = generate(&mut unit, id);
        let def = generated.file.get_method("run").unwrap();
        let idx = pool_index(&generated.file, "FIN");
        assert_eq!(count_const_str(&def.code, idx), 3);
        // The exceptional copy rethrows under a catch-all entry
        assert!(def.exceptions.iter().any(|e| e.catch_type.is_none()));
    }

    #[test]
    fn test_break_replays_finally() {
        let inner = Statement::new(StmtKind::Try {
            body: Box::new(Statement::new(StmtKind::Break(None))),
            catches: Vec::new(),
            finally: Some(Box::new(marker())),
        });
        let body = Statement::new(StmtKind::While {
            cond: Expression::BoolLit(true),
            body: Box::new(Statement::block(vec![inner])),
        });
        let method = MethodNode::new("run", TypeRef::void()).with_body(Statement::block(vec![body]));
        let (mut unit, id) = method_class(method);
        let generated = generate(&mut unit, id);
        let def = generated.file.get_method("run").unwrap();
        let idx = pool_index(&generated.file, "FIN");
        // Once on the break path, once in the exceptional copy
        assert_eq!(count_const_str(&def.code, idx), 2);
    }

    #[test]
    fn test_catch_registers_typed_handler() {
        let body = Statement::new(StmtKind::Try {
            body: Box::new(Statement::expr(Expression::IntLit(1))),
            catches: vec![tarn_ast::CatchClause {
                param_name: "e".to_string(),
                param_type: TypeRef::new("tarn.lang.Exception"),
                body: Statement::expr(Expression::IntLit(2)),
            }],
            finally: None,
        });
        let method = MethodNode::new("run", TypeRef::void()).with_body(Statement::block(vec![body]));
        let (mut unit, id) = method_class(method);
        let generated = generate(&mut unit, id);
        let def = generated.file.get_method("run").unwrap();
        assert_eq!(def.exceptions.len(), 1);
        assert_eq!(
            def.exceptions[0].catch_type.as_deref(),
            Some("tarn.lang.Exception")
        );
        assert!(def.exceptions[0].handler >= def.exceptions[0].end);
    }

    #[test]
    fn test_synchronized_releases_monitor_on_both_paths() {
        let body = Statement::new(StmtKind::Synchronized {
            monitor: Expression::This,
            body: Box::new(Statement::expr(Expression::IntLit(1))),
        });
        let method = MethodNode::new("run", TypeRef::void()).with_body(Statement::block(vec![body]));
        let (mut unit, id) = method_class(method);
        let generated = generate(&mut unit, id);
        let code = &generated.file.get_method("run").unwrap().code;
        let enters = code.iter().filter(|&&b| b == Opcode::MonitorEnter as u8).count();
        let exits = code.iter().filter(|&&b| b == Opcode::MonitorExit as u8).count();
        assert_eq!(enters, 1);
        assert_eq!(exits, 2);
    }

    #[test]
    fn test_foreach_desugars_to_iterator_protocol() {
        let body = Statement::new(StmtKind::ForEach {
            var_name: "item".to_string(),
            var_type: TypeRef::object(),
            iterable: Expression::ListLit(vec![Expression::IntLit(1)]),
            body: Box::new(Statement::expr(Expression::Var("item".to_string()))),
        });
        let method = MethodNode::new("run", TypeRef::void()).with_body(Statement::block(vec![body]));
        let (mut unit, id) = method_class(method);
        let generated = generate(&mut unit, id);
        let code = &generated.file.get_method("run").unwrap().code;
        assert!(code.contains(&(Opcode::IterNew as u8)));
        assert!(code.contains(&(Opcode::IterHasNext as u8)));
        assert!(code.contains(&(Opcode::IterNext as u8)));
    }

    #[test]
    fn test_switch_compares_each_case() {
        let body = Statement::new(StmtKind::Switch {
            subject: Expression::Var("v".to_string()),
            cases: vec![
                tarn_ast::SwitchCase {
                    value: Expression::IntLit(1),
                    body: vec![Statement::new(StmtKind::Break(None))],
                },
                tarn_ast::SwitchCase {
                    value: Expression::IntLit(2),
                    body: vec![Statement::new(StmtKind::Break(None))],
                },
            ],
            default: Some(vec![Statement::expr(Expression::IntLit(3))]),
        });
        let method = MethodNode::new("run", TypeRef::void())
            .with_params(vec![Parameter::new("v", TypeRef::object())])
            .with_body(Statement::block(vec![body]));
        let (mut unit, id) = method_class(method);
        let generated = generate(&mut unit, id);
        let code = &generated.file.get_method("run").unwrap().code;
        let cmps = code.iter().filter(|&&b| b == Opcode::CmpEq as u8).count();
        assert_eq!(cmps, 2);
    }

    #[test]
    fn test_labeled_break_targets_outer_loop() {
        let inner = Statement::new(StmtKind::While {
            cond: Expression::BoolLit(true),
            body: Box::new(Statement::new(StmtKind::Break(Some("outer".to_string())))),
        });
        let outer = Statement::new(StmtKind::Labeled {
            label: "outer".to_string(),
            body: Box::new(Statement::new(StmtKind::While {
                cond: Expression::BoolLit(true),
                body: Box::new(Statement::block(vec![inner])),
            })),
        });
        let method =
            MethodNode::new("run", TypeRef::void()).with_body(Statement::block(vec![outer]));
        let (mut unit, id) = method_class(method);
        // The verifier in generate() checks every branch lands in bounds
        generate(&mut unit, id);
    }

    #[test]
    fn test_break_outside_loop_is_rejected() {
        let method = MethodNode::new("run", TypeRef::void())
            .with_body(Statement::block(vec![Statement::new(StmtKind::Break(None))]));
        let (mut unit, id) = method_class(method);
        let cp = crate::classpath::BootClasspath::new();
        let mut collector = crate::diagnostics::ErrorCollector::new();
        crate::completion::CompletionVisitor::complete(&mut unit, id, &cp, &mut collector).unwrap();
        let result = crate::codegen::ClassGenerator::new(&unit, &cp, id).generate();
        assert!(matches!(result, Err(CompileError::User(_))));
    }
}
