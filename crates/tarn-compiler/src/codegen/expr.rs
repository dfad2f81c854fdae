//! Expression lowering
//!
//! Every lowering leaves exactly one value on the operand stack and
//! reports whether it is a boxed object or a bare boolean, so callers
//! can insert `Box`/`Unbox` only where the shapes disagree.

use tarn_ast::{BinaryOp, Expression, UnaryOp};
use tarn_bytecode::Opcode;

use super::{ClassGenerator, ValueKind};
use crate::error::{CompileError, Result};

/// Where a bare name resolved to, after locals
enum FieldTarget {
    /// Instance field declared on the generated class itself
    Own { is_cell: bool },
    OwnStatic,
    /// Instance field of an in-unit ancestor; goes through the property
    /// protocol
    Inherited,
    InheritedStatic { owner: String },
}

/// Result of the inherited-method lookup used by super and private
/// dispatch
struct AncestorMethod {
    hops: u32,
    owner: String,
    is_void: bool,
    is_public: bool,
}

impl<'a> ClassGenerator<'a> {
    pub(crate) fn lower_expr(&mut self, expr: &Expression) -> Result<ValueKind> {
        match expr {
            Expression::IntLit(v) => {
                self.code.emit(Opcode::ConstI64);
                self.code.emit_i64(*v);
                Ok(ValueKind::Object)
            }
            Expression::FloatLit(v) => {
                self.code.emit(Opcode::ConstF64);
                self.code.emit_f64(*v);
                Ok(ValueKind::Object)
            }
            Expression::StringLit(s) => {
                let idx = self.intern(s);
                self.emit_u16_op(Opcode::ConstStr, idx);
                Ok(ValueKind::Object)
            }
            Expression::BoolLit(v) => {
                self.code.emit(if *v {
                    Opcode::ConstTrue
                } else {
                    Opcode::ConstFalse
                });
                Ok(ValueKind::Boolean)
            }
            Expression::NullLit => {
                self.code.emit(Opcode::ConstNull);
                Ok(ValueKind::Object)
            }
            Expression::This => {
                self.emit_this()?;
                Ok(ValueKind::Object)
            }
            Expression::Var(name) => self.lower_var_read(name),
            Expression::FieldAccess {
                receiver,
                name,
                is_super,
            } => self.lower_field_read(receiver, name, *is_super),
            Expression::StaticField { class_name, name } => {
                let owner = self.intern(class_name);
                let field = self.intern(name);
                self.code.emit(Opcode::GetStatic);
                self.code.emit_u16(owner);
                self.code.emit_u16(field);
                Ok(ValueKind::Object)
            }
            Expression::Index { target, index } => {
                let k = self.lower_expr(target)?;
                self.ensure_object(k);
                let k = self.lower_expr(index)?;
                self.ensure_object(k);
                self.code.emit(Opcode::IndexGet);
                Ok(ValueKind::Object)
            }
            Expression::Binary { op, left, right } => self.lower_binary(*op, left, right),
            Expression::Unary { op, operand } => self.lower_unary(*op, operand),
            Expression::Assign { target, value } => {
                self.lower_assign(target, value, true)?;
                Ok(ValueKind::Object)
            }
            Expression::CompoundAssign { op, target, value } => {
                self.lower_compound(*op, target, value, true)?;
                Ok(ValueKind::Object)
            }
            Expression::Ternary {
                cond,
                then_value,
                else_value,
            } => {
                self.lower_condition(cond)?;
                let take_else = self.jump(Opcode::JumpIfFalse);
                let k = self.lower_expr(then_value)?;
                self.ensure_object(k);
                let done = self.jump(Opcode::Jump);
                self.patch(take_else)?;
                let k = self.lower_expr(else_value)?;
                self.ensure_object(k);
                self.patch(done)?;
                Ok(ValueKind::Object)
            }
            Expression::MethodCall {
                receiver,
                name,
                args,
                is_super,
            } => self.lower_method_call(receiver, name, args, *is_super),
            Expression::StaticCall {
                class_name,
                name,
                args,
            } => {
                for arg in args {
                    let k = self.lower_expr(arg)?;
                    self.ensure_object(k);
                }
                let owner = self.intern(class_name);
                let method = self.intern(name);
                self.code.emit(Opcode::CallStatic);
                self.code.emit_u16(owner);
                self.code.emit_u16(method);
                let argc = self.call_argc(args.len())?;
                self.code.emit_u8(argc);
                Ok(ValueKind::Object)
            }
            Expression::ConstructorCall { class_name, args } => {
                self.check_ctor_target(
                    class_name,
                    args.len(),
                    &format!("body in {}", self.class_node().name),
                )?;
                let owner = self.intern(class_name);
                self.emit_u16_op(Opcode::New, owner);
                self.code.emit(Opcode::Dup);
                for arg in args {
                    let k = self.lower_expr(arg)?;
                    self.ensure_object(k);
                }
                self.code.emit(Opcode::CallCtor);
                self.code.emit_u16(owner);
                let argc = self.call_argc(args.len())?;
                self.code.emit_u8(argc);
                Ok(ValueKind::Object)
            }
            Expression::Closure { params, body } => self.lower_closure(params, body),
            Expression::ClassLiteral(name) => self.lower_class_literal(name),
            Expression::Cast {
                target_type,
                operand,
            } => {
                let kind = self.lower_expr(operand)?;
                if target_type.is_boolean() {
                    self.ensure_boolean(kind);
                    Ok(ValueKind::Boolean)
                } else if target_type.is_primitive() {
                    // Numeric casts are coercions the runtime applies on use
                    self.ensure_object(kind);
                    Ok(ValueKind::Object)
                } else {
                    self.ensure_object(kind);
                    let idx = self.intern(&target_type.name);
                    self.emit_u16_op(Opcode::CheckCast, idx);
                    Ok(ValueKind::Object)
                }
            }
            Expression::ListLit(elems) => {
                for elem in elems {
                    let k = self.lower_expr(elem)?;
                    self.ensure_object(k);
                }
                self.emit_u16_op(Opcode::NewList, elems.len() as u16);
                Ok(ValueKind::Object)
            }
            Expression::MapLit(pairs) => {
                for (key, value) in pairs {
                    let k = self.lower_expr(key)?;
                    self.ensure_object(k);
                    let k = self.lower_expr(value)?;
                    self.ensure_object(k);
                }
                self.emit_u16_op(Opcode::NewMap, pairs.len() as u16);
                Ok(ValueKind::Object)
            }
        }
    }

    /// Lower an expression evaluated only for its effect
    pub(crate) fn lower_expr_discard(&mut self, expr: &Expression) -> Result<()> {
        match expr {
            Expression::Assign { target, value } => self.lower_assign(target, value, false),
            Expression::CompoundAssign { op, target, value } => {
                self.lower_compound(*op, target, value, false)
            }
            _ => {
                self.lower_expr(expr)?;
                self.code.emit(Opcode::Pop);
                Ok(())
            }
        }
    }

    fn emit_this(&mut self) -> Result<()> {
        if self.in_static {
            return Err(CompileError::user(format!(
                "cannot use 'this' in a static context in {}",
                self.class_node().name
            )));
        }
        self.emit_u16_op(Opcode::LoadLocal, 0);
        Ok(())
    }

    // ===== Name resolution =====

    /// Resolve a bare name that is not a local
    fn resolve_field(&self, name: &str) -> Option<FieldTarget> {
        if let Some(field) = self.class_node().get_field(name) {
            return Some(if field.is_static() {
                FieldTarget::OwnStatic
            } else {
                FieldTarget::Own {
                    is_cell: field.ty.is_cell(),
                }
            });
        }
        let id = self.unit().find_class(&self.class_node().name)?;
        for ancestor_id in self.unit().ancestor_chain(id) {
            let ancestor = self.unit().class(ancestor_id);
            if let Some(field) = ancestor.get_field(name) {
                return Some(if field.is_static() {
                    FieldTarget::InheritedStatic {
                        owner: ancestor.name.clone(),
                    }
                } else {
                    FieldTarget::Inherited
                });
            }
        }
        None
    }

    fn lower_var_read(&mut self, name: &str) -> Result<ValueKind> {
        if let Some(slot) = self.scopes.lookup(name) {
            self.emit_u16_op(Opcode::LoadLocal, slot);
            if self.cell_vars.contains(name) {
                self.code.emit(Opcode::CellGet);
            }
            return Ok(ValueKind::Object);
        }
        match self.resolve_field(name) {
            Some(FieldTarget::Own { is_cell }) => {
                self.emit_this()?;
                let idx = self.intern(name);
                self.emit_u16_op(Opcode::GetField, idx);
                if is_cell {
                    self.code.emit(Opcode::CellGet);
                }
                Ok(ValueKind::Object)
            }
            Some(FieldTarget::OwnStatic) => {
                let owner = self.intern(&self.class_node().name.clone());
                let idx = self.intern(name);
                self.code.emit(Opcode::GetStatic);
                self.code.emit_u16(owner);
                self.code.emit_u16(idx);
                Ok(ValueKind::Object)
            }
            Some(FieldTarget::Inherited) => {
                self.emit_this()?;
                let idx = self.intern(name);
                self.emit_u16_op(Opcode::GetProp, idx);
                Ok(ValueKind::Object)
            }
            Some(FieldTarget::InheritedStatic { owner }) => {
                let owner = self.intern(&owner);
                let idx = self.intern(name);
                self.code.emit(Opcode::GetStatic);
                self.code.emit_u16(owner);
                self.code.emit_u16(idx);
                Ok(ValueKind::Object)
            }
            None => Err(CompileError::user(format!(
                "unknown variable '{name}' in {}",
                self.class_node().name
            ))),
        }
    }

    fn lower_field_read(
        &mut self,
        receiver: &Expression,
        name: &str,
        is_super: bool,
    ) -> Result<ValueKind> {
        if is_super {
            let k = self.lower_expr(receiver)?;
            self.ensure_object(k);
            let idx = self.intern(name);
            self.emit_u16_op(Opcode::GetField, idx);
            return Ok(ValueKind::Object);
        }
        if matches!(receiver, Expression::This) {
            if let Some(field) = self.class_node().get_field(name) {
                if !field.is_static() {
                    let is_cell = field.ty.is_cell();
                    self.emit_this()?;
                    let idx = self.intern(name);
                    self.emit_u16_op(Opcode::GetField, idx);
                    if is_cell {
                        self.code.emit(Opcode::CellGet);
                    }
                    return Ok(ValueKind::Object);
                }
            }
        }
        let k = self.lower_expr(receiver)?;
        self.ensure_object(k);
        let idx = self.intern(name);
        self.emit_u16_op(Opcode::GetProp, idx);
        Ok(ValueKind::Object)
    }

    // ===== Operators =====

    fn lower_binary(
        &mut self,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
    ) -> Result<ValueKind> {
        match op {
            // Short-circuit forms never evaluate the right side eagerly
            BinaryOp::And => {
                self.lower_condition(left)?;
                let short = self.jump(Opcode::JumpIfFalse);
                self.lower_condition(right)?;
                let done = self.jump(Opcode::Jump);
                self.patch(short)?;
                self.code.emit(Opcode::ConstFalse);
                self.patch(done)?;
                Ok(ValueKind::Boolean)
            }
            BinaryOp::Or => {
                self.lower_condition(left)?;
                let short = self.jump(Opcode::JumpIfTrue);
                self.lower_condition(right)?;
                let done = self.jump(Opcode::Jump);
                self.patch(short)?;
                self.code.emit(Opcode::ConstTrue);
                self.patch(done)?;
                Ok(ValueKind::Boolean)
            }
            _ => {
                let k = self.lower_expr(left)?;
                self.ensure_object(k);
                let k = self.lower_expr(right)?;
                self.ensure_object(k);
                match op {
                    BinaryOp::Eq => self.code.emit(Opcode::CmpEq),
                    BinaryOp::Ne => self.code.emit(Opcode::CmpNe),
                    BinaryOp::Lt => self.code.emit(Opcode::CmpLt),
                    BinaryOp::Le => self.code.emit(Opcode::CmpLe),
                    BinaryOp::Gt => self.code.emit(Opcode::CmpGt),
                    BinaryOp::Ge => self.code.emit(Opcode::CmpGe),
                    BinaryOp::Identical => self.code.emit(Opcode::CmpIdentical),
                    BinaryOp::NotIdentical => self.code.emit(Opcode::CmpNotIdentical),
                    _ => {
                        // Arithmetic and bitwise go through operator dispatch
                        let name = op.operator_name().ok_or_else(|| {
                            CompileError::internal(format!("no operator lowering for {op:?}"))
                        })?;
                        let idx = self.intern(name);
                        self.emit_u16_op(Opcode::OpInvoke, idx);
                        return Ok(ValueKind::Object);
                    }
                }
                Ok(ValueKind::Boolean)
            }
        }
    }

    fn lower_unary(&mut self, op: UnaryOp, operand: &Expression) -> Result<ValueKind> {
        match op {
            UnaryOp::Not => {
                self.lower_condition(operand)?;
                self.code.emit(Opcode::Not);
                Ok(ValueKind::Boolean)
            }
            UnaryOp::Neg | UnaryOp::BitNot => {
                let k = self.lower_expr(operand)?;
                self.ensure_object(k);
                let name = op.operator_name().ok_or_else(|| {
                    CompileError::internal(format!("no operator lowering for {op:?}"))
                })?;
                let idx = self.intern(name);
                self.code.emit(Opcode::CallDynamic);
                self.code.emit_u16(idx);
                self.code.emit_u8(0);
                Ok(ValueKind::Object)
            }
        }
    }

    // ===== Assignment =====

    pub(crate) fn lower_assign(
        &mut self,
        target: &Expression,
        value: &Expression,
        want_value: bool,
    ) -> Result<()> {
        match target {
            Expression::Var(name) => {
                if let Some(slot) = self.scopes.lookup(name) {
                    if self.cell_vars.contains(name) {
                        self.emit_u16_op(Opcode::LoadLocal, slot);
                        let k = self.lower_expr(value)?;
                        self.ensure_object(k);
                        self.finish_cell_set(want_value);
                    } else {
                        let k = self.lower_expr(value)?;
                        self.ensure_object(k);
                        if want_value {
                            self.code.emit(Opcode::Dup);
                        }
                        self.emit_u16_op(Opcode::StoreLocal, slot);
                    }
                    return Ok(());
                }
                match self.resolve_field(name) {
                    Some(FieldTarget::Own { is_cell }) => {
                        self.store_own_field(name, is_cell, value, want_value)
                    }
                    Some(FieldTarget::OwnStatic) => {
                        let owner = self.class_node().name.clone();
                        self.store_static(&owner, name, value, want_value)
                    }
                    Some(FieldTarget::Inherited) => {
                        self.emit_this()?;
                        self.store_prop(name, value, want_value)
                    }
                    Some(FieldTarget::InheritedStatic { owner }) => {
                        self.store_static(&owner, name, value, want_value)
                    }
                    None => Err(CompileError::user(format!(
                        "unknown variable '{name}' in {}",
                        self.class_node().name
                    ))),
                }
            }
            Expression::FieldAccess {
                receiver,
                name,
                is_super,
            } => {
                if !is_super && matches!(receiver.as_ref(), Expression::This) {
                    if let Some(field) = self.class_node().get_field(name) {
                        if !field.is_static() {
                            let is_cell = field.ty.is_cell();
                            return self.store_own_field(name, is_cell, value, want_value);
                        }
                    }
                }
                if *is_super {
                    // super.x writes the field directly
                    let k = self.lower_expr(receiver)?;
                    self.ensure_object(k);
                    let k = self.lower_expr(value)?;
                    self.ensure_object(k);
                    let idx = self.intern(name);
                    if want_value {
                        let temp = self.scopes.acquire_temp();
                        self.emit_u16_op(Opcode::StoreLocal, temp);
                        self.emit_u16_op(Opcode::LoadLocal, temp);
                        self.emit_u16_op(Opcode::PutField, idx);
                        self.emit_u16_op(Opcode::LoadLocal, temp);
                        self.scopes.release_temp(temp);
                    } else {
                        self.emit_u16_op(Opcode::PutField, idx);
                    }
                    return Ok(());
                }
                let k = self.lower_expr(receiver)?;
                self.ensure_object(k);
                self.store_prop(name, value, want_value)
            }
            Expression::StaticField { class_name, name } => {
                self.store_static(class_name, name, value, want_value)
            }
            Expression::Index {
                target: indexed,
                index,
            } => {
                let k = self.lower_expr(indexed)?;
                self.ensure_object(k);
                let k = self.lower_expr(index)?;
                self.ensure_object(k);
                let k = self.lower_expr(value)?;
                self.ensure_object(k);
                if want_value {
                    let temp = self.scopes.acquire_temp();
                    self.emit_u16_op(Opcode::StoreLocal, temp);
                    self.emit_u16_op(Opcode::LoadLocal, temp);
                    self.code.emit(Opcode::IndexSet);
                    self.emit_u16_op(Opcode::LoadLocal, temp);
                    self.scopes.release_temp(temp);
                } else {
                    self.code.emit(Opcode::IndexSet);
                }
                Ok(())
            }
            _ => Err(CompileError::user("invalid assignment target")),
        }
    }

    /// Stack on entry: cell, value. Emits the CellSet and restores the
    /// value when requested.
    fn finish_cell_set(&mut self, want_value: bool) {
        if want_value {
            let temp = self.scopes.acquire_temp();
            self.emit_u16_op(Opcode::StoreLocal, temp);
            self.emit_u16_op(Opcode::LoadLocal, temp);
            self.code.emit(Opcode::CellSet);
            self.emit_u16_op(Opcode::LoadLocal, temp);
            self.scopes.release_temp(temp);
        } else {
            self.code.emit(Opcode::CellSet);
        }
    }

    fn store_own_field(
        &mut self,
        name: &str,
        is_cell: bool,
        value: &Expression,
        want_value: bool,
    ) -> Result<()> {
        if is_cell && !self.in_ctor {
            // Captured field: write through the cell, never replace it
            self.emit_this()?;
            let idx = self.intern(name);
            self.emit_u16_op(Opcode::GetField, idx);
            let k = self.lower_expr(value)?;
            self.ensure_object(k);
            self.finish_cell_set(want_value);
            return Ok(());
        }
        self.emit_this()?;
        let k = self.lower_expr(value)?;
        self.ensure_object(k);
        let idx = self.intern(name);
        if want_value {
            let temp = self.scopes.acquire_temp();
            self.emit_u16_op(Opcode::StoreLocal, temp);
            self.emit_u16_op(Opcode::LoadLocal, temp);
            self.emit_u16_op(Opcode::PutField, idx);
            self.emit_u16_op(Opcode::LoadLocal, temp);
            self.scopes.release_temp(temp);
        } else {
            self.emit_u16_op(Opcode::PutField, idx);
        }
        Ok(())
    }

    /// Stack on entry: receiver
    fn store_prop(&mut self, name: &str, value: &Expression, want_value: bool) -> Result<()> {
        let k = self.lower_expr(value)?;
        self.ensure_object(k);
        let idx = self.intern(name);
        if want_value {
            let temp = self.scopes.acquire_temp();
            self.emit_u16_op(Opcode::StoreLocal, temp);
            self.emit_u16_op(Opcode::LoadLocal, temp);
            self.emit_u16_op(Opcode::SetProp, idx);
            self.emit_u16_op(Opcode::LoadLocal, temp);
            self.scopes.release_temp(temp);
        } else {
            self.emit_u16_op(Opcode::SetProp, idx);
        }
        Ok(())
    }

    fn store_static(
        &mut self,
        class_name: &str,
        name: &str,
        value: &Expression,
        want_value: bool,
    ) -> Result<()> {
        let k = self.lower_expr(value)?;
        self.ensure_object(k);
        if want_value {
            self.code.emit(Opcode::Dup);
        }
        let owner = self.intern(class_name);
        let idx = self.intern(name);
        self.code.emit(Opcode::PutStatic);
        self.code.emit_u16(owner);
        self.code.emit_u16(idx);
        Ok(())
    }

    pub(crate) fn lower_compound(
        &mut self,
        op: BinaryOp,
        target: &Expression,
        value: &Expression,
        want_value: bool,
    ) -> Result<()> {
        let op_name = op.operator_name().ok_or_else(|| {
            CompileError::user(format!("operator {op:?} cannot be used in compound assignment"))
        })?;
        let op_idx = self.intern(op_name);

        match target {
            Expression::Var(name) => {
                if let Some(slot) = self.scopes.lookup(name) {
                    if self.cell_vars.contains(name) {
                        self.emit_u16_op(Opcode::LoadLocal, slot);
                        self.code.emit(Opcode::Dup);
                        self.code.emit(Opcode::CellGet);
                        let k = self.lower_expr(value)?;
                        self.ensure_object(k);
                        self.emit_u16_op(Opcode::OpInvoke, op_idx);
                        self.finish_cell_set(want_value);
                    } else {
                        self.emit_u16_op(Opcode::LoadLocal, slot);
                        let k = self.lower_expr(value)?;
                        self.ensure_object(k);
                        self.emit_u16_op(Opcode::OpInvoke, op_idx);
                        if want_value {
                            self.code.emit(Opcode::Dup);
                        }
                        self.emit_u16_op(Opcode::StoreLocal, slot);
                    }
                    return Ok(());
                }
                match self.resolve_field(name) {
                    Some(FieldTarget::Own { is_cell }) => {
                        self.compound_own_field(name, is_cell, op_idx, value, want_value)
                    }
                    Some(FieldTarget::OwnStatic) => {
                        let owner = self.class_node().name.clone();
                        self.compound_static(&owner, name, op_idx, value, want_value)
                    }
                    Some(FieldTarget::Inherited) => {
                        self.emit_this()?;
                        self.compound_prop(name, op_idx, value, want_value)
                    }
                    Some(FieldTarget::InheritedStatic { owner }) => {
                        self.compound_static(&owner, name, op_idx, value, want_value)
                    }
                    None => Err(CompileError::user(format!(
                        "unknown variable '{name}' in {}",
                        self.class_node().name
                    ))),
                }
            }
            Expression::FieldAccess {
                receiver,
                name,
                is_super: false,
            } => {
                if matches!(receiver.as_ref(), Expression::This) {
                    if let Some(field) = self.class_node().get_field(name) {
                        if !field.is_static() {
                            let is_cell = field.ty.is_cell();
                            return self
                                .compound_own_field(name, is_cell, op_idx, value, want_value);
                        }
                    }
                }
                let k = self.lower_expr(receiver)?;
                self.ensure_object(k);
                self.compound_prop(name, op_idx, value, want_value)
            }
            Expression::StaticField { class_name, name } => {
                self.compound_static(class_name, name, op_idx, value, want_value)
            }
            Expression::Index {
                target: indexed,
                index,
            } => {
                let target_temp = self.scopes.acquire_temp();
                let k = self.lower_expr(indexed)?;
                self.ensure_object(k);
                self.emit_u16_op(Opcode::StoreLocal, target_temp);
                let index_temp = self.scopes.acquire_temp();
                let k = self.lower_expr(index)?;
                self.ensure_object(k);
                self.emit_u16_op(Opcode::StoreLocal, index_temp);

                self.emit_u16_op(Opcode::LoadLocal, target_temp);
                self.emit_u16_op(Opcode::LoadLocal, index_temp);
                self.code.emit(Opcode::IndexGet);
                let k = self.lower_expr(value)?;
                self.ensure_object(k);
                self.emit_u16_op(Opcode::OpInvoke, op_idx);

                let value_temp = self.scopes.acquire_temp();
                self.emit_u16_op(Opcode::StoreLocal, value_temp);
                self.emit_u16_op(Opcode::LoadLocal, target_temp);
                self.emit_u16_op(Opcode::LoadLocal, index_temp);
                self.emit_u16_op(Opcode::LoadLocal, value_temp);
                self.code.emit(Opcode::IndexSet);
                if want_value {
                    self.emit_u16_op(Opcode::LoadLocal, value_temp);
                }
                self.scopes.release_temp(value_temp);
                self.scopes.release_temp(index_temp);
                self.scopes.release_temp(target_temp);
                Ok(())
            }
            _ => Err(CompileError::user("invalid compound assignment target")),
        }
    }

    fn compound_own_field(
        &mut self,
        name: &str,
        is_cell: bool,
        op_idx: u16,
        value: &Expression,
        want_value: bool,
    ) -> Result<()> {
        let idx = self.intern(name);
        if is_cell {
            self.emit_this()?;
            self.emit_u16_op(Opcode::GetField, idx);
            self.code.emit(Opcode::Dup);
            self.code.emit(Opcode::CellGet);
            let k = self.lower_expr(value)?;
            self.ensure_object(k);
            self.emit_u16_op(Opcode::OpInvoke, op_idx);
            self.finish_cell_set(want_value);
            return Ok(());
        }
        self.emit_this()?;
        self.code.emit(Opcode::Dup);
        self.emit_u16_op(Opcode::GetField, idx);
        let k = self.lower_expr(value)?;
        self.ensure_object(k);
        self.emit_u16_op(Opcode::OpInvoke, op_idx);
        if want_value {
            let temp = self.scopes.acquire_temp();
            self.emit_u16_op(Opcode::StoreLocal, temp);
            self.emit_u16_op(Opcode::LoadLocal, temp);
            self.emit_u16_op(Opcode::PutField, idx);
            self.emit_u16_op(Opcode::LoadLocal, temp);
            self.scopes.release_temp(temp);
        } else {
            self.emit_u16_op(Opcode::PutField, idx);
        }
        Ok(())
    }

    /// Stack on entry: receiver
    fn compound_prop(
        &mut self,
        name: &str,
        op_idx: u16,
        value: &Expression,
        want_value: bool,
    ) -> Result<()> {
        let idx = self.intern(name);
        self.code.emit(Opcode::Dup);
        self.emit_u16_op(Opcode::GetProp, idx);
        let k = self.lower_expr(value)?;
        self.ensure_object(k);
        self.emit_u16_op(Opcode::OpInvoke, op_idx);
        if want_value {
            let temp = self.scopes.acquire_temp();
            self.emit_u16_op(Opcode::StoreLocal, temp);
            self.emit_u16_op(Opcode::LoadLocal, temp);
            self.emit_u16_op(Opcode::SetProp, idx);
            self.emit_u16_op(Opcode::LoadLocal, temp);
            self.scopes.release_temp(temp);
        } else {
            self.emit_u16_op(Opcode::SetProp, idx);
        }
        Ok(())
    }

    fn compound_static(
        &mut self,
        class_name: &str,
        name: &str,
        op_idx: u16,
        value: &Expression,
        want_value: bool,
    ) -> Result<()> {
        let owner = self.intern(class_name);
        let idx = self.intern(name);
        self.code.emit(Opcode::GetStatic);
        self.code.emit_u16(owner);
        self.code.emit_u16(idx);
        let k = self.lower_expr(value)?;
        self.ensure_object(k);
        self.emit_u16_op(Opcode::OpInvoke, op_idx);
        if want_value {
            self.code.emit(Opcode::Dup);
        }
        self.code.emit(Opcode::PutStatic);
        self.code.emit_u16(owner);
        self.code.emit_u16(idx);
        Ok(())
    }

    // ===== Calls =====

    fn lower_method_call(
        &mut self,
        receiver: &Expression,
        name: &str,
        args: &[Expression],
        is_super: bool,
    ) -> Result<ValueKind> {
        if is_super {
            let (hops, owner, is_void) = self.resolve_super_method(name, args.len())?;
            let argc = self.call_argc(args.len())?;
            let tramp = self.trampoline_for("super", hops, &owner, name, argc, is_void);
            return self.emit_special_call(&tramp, args);
        }

        // Non-public inherited methods are not dynamically dispatchable;
        // route them through a synthetic trampoline on this class
        if matches!(receiver, Expression::This)
            && !self.class_node().declares_method(name, args.len())
        {
            if let Some(found) = self.find_ancestor_method(name, args.len()) {
                if !found.is_public {
                    let tramp = self.trampoline_for(
                        "this",
                        found.hops,
                        &found.owner,
                        name,
                        self.call_argc(args.len())?,
                        found.is_void,
                    );
                    return self.emit_special_call(&tramp, args);
                }
            }
        }

        let k = self.lower_expr(receiver)?;
        self.ensure_object(k);
        for arg in args {
            let k = self.lower_expr(arg)?;
            self.ensure_object(k);
        }
        let idx = self.intern(name);
        self.code.emit(Opcode::CallDynamic);
        self.code.emit_u16(idx);
        let argc = self.call_argc(args.len())?;
        self.code.emit_u8(argc);
        Ok(ValueKind::Object)
    }

    /// Emit a this-receiver exact call to a synthetic trampoline
    fn emit_special_call(&mut self, method: &str, args: &[Expression]) -> Result<ValueKind> {
        self.emit_this()?;
        for arg in args {
            let k = self.lower_expr(arg)?;
            self.ensure_object(k);
        }
        let owner = self.intern(&self.class_node().name.clone());
        let method = self.intern(method);
        self.code.emit(Opcode::CallSpecial);
        self.code.emit_u16(owner);
        self.code.emit_u16(method);
        let argc = self.call_argc(args.len())?;
        self.code.emit_u8(argc);
        Ok(ValueKind::Object)
    }

    /// Nearest in-unit ancestor declaring (name, arity); hop count starts
    /// at the direct superclass
    fn find_ancestor_method(&self, name: &str, argc: usize) -> Option<AncestorMethod> {
        let id = self.unit().find_class(&self.class_node().name)?;
        let mut hops = 0;
        for ancestor_id in self.unit().ancestor_chain(id) {
            hops += 1;
            let ancestor = self.unit().class(ancestor_id);
            if let Some(m) = ancestor
                .get_methods(name)
                .into_iter()
                .find(|m| m.arity() == argc)
            {
                return Some(AncestorMethod {
                    hops,
                    owner: ancestor.name.clone(),
                    is_void: m.is_void(),
                    is_public: m.is_public(),
                });
            }
        }
        None
    }

    fn resolve_super_method(&mut self, name: &str, argc: usize) -> Result<(u32, String, bool)> {
        if let Some(found) = self.find_ancestor_method(name, argc) {
            return Ok((found.hops, found.owner, found.is_void));
        }
        // External superclass: shape is opaque, defer to the loader
        let super_name = self.class_node().super_class_name().to_string();
        if self.classpath().contains(&super_name) {
            return Ok((1, super_name, false));
        }
        Err(CompileError::user(format!(
            "no accessible super method '{name}' with {argc} argument(s) in {}",
            self.class_node().name
        )))
    }

    // ===== Class literals =====

    /// Class-literal reads memoize the loaded class in a per-literal
    /// static cache field
    fn lower_class_literal(&mut self, name: &str) -> Result<ValueKind> {
        let field = self.literal_cache_field(name);
        let owner = self.intern(&self.class_node().name.clone());
        let field_idx = self.intern(&field);
        let name_idx = self.intern(name);

        self.code.emit(Opcode::GetStatic);
        self.code.emit_u16(owner);
        self.code.emit_u16(field_idx);
        self.code.emit(Opcode::Dup);
        self.code.emit(Opcode::ConstNull);
        self.code.emit(Opcode::CmpIdentical);
        let cached = self.jump(Opcode::JumpIfFalse);
        self.code.emit(Opcode::Pop);
        self.emit_u16_op(Opcode::LoadClass, name_idx);
        self.code.emit(Opcode::Dup);
        self.code.emit(Opcode::PutStatic);
        self.code.emit_u16(owner);
        self.code.emit_u16(field_idx);
        self.patch(cached)?;
        Ok(ValueKind::Object)
    }
}
