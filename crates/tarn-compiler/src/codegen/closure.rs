//! Closure capture analysis and synthetic closure classes
//!
//! Each closure literal becomes a nested class holding the enclosing
//! instance in an `$owner` field and one field per captured local.
//! Locals that are both captured and mutated are promoted to heap cells
//! so the closure and the enclosing body observe each other's writes.

use rustc_hash::{FxHashMap, FxHashSet};
use tarn_ast::{
    modifiers, ClassNode, ConstructorNode, Expression, FieldNode, MethodNode, Parameter,
    Statement, StmtKind, TypeRef,
};
use tarn_bytecode::Opcode;

use super::{ClassGenerator, ValueKind};
use crate::error::Result;

/// Field of every closure class holding the enclosing instance (null for
/// closures formed in static contexts)
pub(crate) const OWNER_FIELD: &str = "$owner";

/// Locals of the enclosing body that some closure captures and that are
/// assigned anywhere (inside or outside the closure)
pub(crate) fn collect_cell_vars(body: &Statement, params: &[Parameter]) -> FxHashSet<String> {
    let mut declared: FxHashSet<String> = params.iter().map(|p| p.name.clone()).collect();
    collect_declared(body, &mut declared);

    let mut captured = FxHashSet::default();
    let mut assigned = FxHashSet::default();
    crate::validate::walk_stmt(body, &mut |s| {
        crate::validate::for_each_expr_in_stmt(s, &mut |_, e| match e {
            Expression::Assign { target, .. } | Expression::CompoundAssign { target, .. } => {
                if let Expression::Var(name) = target.as_ref() {
                    assigned.insert(name.clone());
                }
            }
            Expression::Closure { params, body } => {
                captured.extend(free_vars(params, body));
            }
            _ => {}
        });
    });

    captured
        .intersection(&assigned)
        .filter(|name| declared.contains(*name))
        .cloned()
        .collect()
}

/// Names introduced by statements of this body, closure interiors
/// excluded
fn collect_declared(body: &Statement, out: &mut FxHashSet<String>) {
    crate::validate::walk_stmt(body, &mut |s| match &s.kind {
        StmtKind::VarDecl { name, .. } => {
            out.insert(name.clone());
        }
        StmtKind::ForEach { var_name, .. } => {
            out.insert(var_name.clone());
        }
        StmtKind::Try { catches, .. } => {
            for catch in catches {
                out.insert(catch.param_name.clone());
            }
        }
        _ => {}
    });
}

/// Variables a closure body references without declaring
fn free_vars(params: &[Parameter], body: &Statement) -> FxHashSet<String> {
    let mut declared: FxHashSet<String> = params.iter().map(|p| p.name.clone()).collect();
    collect_declared(body, &mut declared);

    let mut refs = FxHashSet::default();
    collect_refs_stmt(body, &mut refs);
    refs.retain(|name| !declared.contains(name));
    refs
}

fn collect_refs_stmt(stmt: &Statement, refs: &mut FxHashSet<String>) {
    crate::validate::walk_stmt(stmt, &mut |s| {
        crate::validate::for_each_expr_in_stmt(s, &mut |_, e| match e {
            Expression::Var(name) => {
                refs.insert(name.clone());
            }
            // A nested closure contributes only what is free in it
            Expression::Closure { params, body } => {
                refs.extend(free_vars(params, body));
            }
            _ => {}
        });
    });
}

// The shared walkers recurse into closure bodies, so plain Var visits
// inside a nested closure are double-counted above: harmless for the
// capture analysis, since an extra name either fails the declared filter
// or was free anyway.

impl<'a> ClassGenerator<'a> {
    /// Lower a closure literal: synthesize its class, queue it for the
    /// driver, and instantiate it at the current point
    pub(crate) fn lower_closure(
        &mut self,
        params: &[Parameter],
        body: &Statement,
    ) -> Result<ValueKind> {
        let free = free_vars(params, body);
        let mut captures: Vec<(String, bool)> = free
            .iter()
            .filter(|name| self.scopes.lookup(name).is_some())
            .map(|name| (name.clone(), self.cell_vars.contains(name)))
            .collect();
        captures.sort();

        let class_name = self.next_closure_name();
        let class = self.build_closure_class(&class_name, params, body, &captures);
        self.add_inner_class(class);

        // Instantiate: owner first, then captures in field order. Cell
        // captures pass the cell itself, never its contents.
        let owner_idx = self.intern(&class_name);
        self.emit_u16_op(Opcode::New, owner_idx);
        self.code.emit(Opcode::Dup);
        if self.in_static {
            self.code.emit(Opcode::ConstNull);
        } else {
            self.emit_u16_op(Opcode::LoadLocal, 0);
        }
        let slots: Vec<u16> = captures
            .iter()
            .filter_map(|(name, _)| self.scopes.lookup(name))
            .collect();
        for slot in slots {
            self.emit_u16_op(Opcode::LoadLocal, slot);
        }
        let argc = self.call_argc(1 + captures.len())?;
        self.code.emit(Opcode::CallCtor);
        self.code.emit_u16(owner_idx);
        self.code.emit_u8(argc);
        Ok(ValueKind::Object)
    }

    fn build_closure_class(
        &self,
        class_name: &str,
        params: &[Parameter],
        body: &Statement,
        captures: &[(String, bool)],
    ) -> ClassNode {
        let mut class = ClassNode::new(class_name)
            .with_modifiers(modifiers::PUBLIC | modifiers::FINAL | modifiers::SYNTHETIC);

        class.push_field_unchecked(
            FieldNode::new(OWNER_FIELD, TypeRef::object())
                .with_modifiers(modifiers::PRIVATE | modifiers::FINAL)
                .synthetic(),
        );
        let mut ctor_params = vec![Parameter::new(OWNER_FIELD, TypeRef::object())];
        for (name, is_cell) in captures {
            let ty = if *is_cell {
                TypeRef::cell()
            } else {
                TypeRef::object()
            };
            class.push_field_unchecked(
                FieldNode::new(name.clone(), ty.clone())
                    .with_modifiers(modifiers::PRIVATE | modifiers::FINAL)
                    .synthetic(),
            );
            ctor_params.push(Parameter::new(name.clone(), ty));
        }

        let mut ctor_stmts = vec![Statement::new(StmtKind::SuperCtorCall(Vec::new()))];
        for param in &ctor_params {
            ctor_stmts.push(Statement::expr(Expression::Assign {
                target: Expression::FieldAccess {
                    receiver: Expression::This.boxed(),
                    name: param.name.clone(),
                    is_super: false,
                }
                .boxed(),
                value: Expression::Var(param.name.clone()).boxed(),
            }));
        }
        class
            .constructors
            .push(ConstructorNode::new(ctor_params, Statement::block(ctor_stmts)).synthetic());

        // doCall carries the rewritten user body; call is the uniform
        // object-typed entry point the runtime invokes
        let mut rewriter = Rewriter {
            captures: captures.iter().map(|(n, _)| n.clone()).collect(),
            owner_fields: self.owner_field_map(),
            owner_class: self.class_node().name.clone(),
            scopes: vec![params.iter().map(|p| p.name.clone()).collect()],
        };
        let mut do_call_body = body.clone();
        rewriter.rewrite_stmt(&mut do_call_body);
        class.methods.push(
            MethodNode::new("doCall", TypeRef::object())
                .with_params(params.to_vec())
                .with_body(do_call_body),
        );

        let bridge_params: Vec<Parameter> = (0..params.len())
            .map(|i| Parameter::new(format!("p{i}"), TypeRef::object()))
            .collect();
        let args: Vec<Expression> = params
            .iter()
            .enumerate()
            .map(|(i, param)| {
                let var = Expression::Var(format!("p{i}"));
                if param.ty.is_object_class() {
                    var
                } else {
                    Expression::Cast {
                        target_type: param.ty.clone(),
                        operand: var.boxed(),
                    }
                }
            })
            .collect();
        class.methods.push(
            MethodNode::new("call", TypeRef::object())
                .with_params(bridge_params)
                .with_body(Statement::ret(Some(Expression::MethodCall {
                    receiver: Expression::This.boxed(),
                    name: "doCall".to_string(),
                    args,
                    is_super: false,
                })))
                .synthetic(),
        );

        class
    }

    /// Fields of the enclosing class and its in-unit ancestors, with
    /// their staticness
    fn owner_field_map(&self) -> FxHashMap<String, bool> {
        let mut fields = FxHashMap::default();
        if let Some(id) = self.unit().find_class(&self.class_node().name) {
            for ancestor_id in self.unit().ancestor_chain(id) {
                for field in &self.unit().class(ancestor_id).fields {
                    fields
                        .entry(field.name.clone())
                        .or_insert(field.is_static());
                }
            }
        }
        for field in &self.class_node().fields {
            fields.insert(field.name.clone(), field.is_static());
        }
        fields
    }
}

/// Rewrites a closure body for its new home: captured locals become
/// field reads, the enclosing `this` becomes the `$owner` field, and
/// enclosing-class fields are routed through the owner
struct Rewriter {
    captures: FxHashSet<String>,
    owner_fields: FxHashMap<String, bool>,
    owner_class: String,
    scopes: Vec<FxHashSet<String>>,
}

impl Rewriter {
    fn declared(&self, name: &str) -> bool {
        self.scopes.iter().any(|scope| scope.contains(name))
    }

    fn declare(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string());
        }
    }

    fn owner_access(&self) -> Expression {
        Expression::FieldAccess {
            receiver: Expression::This.boxed(),
            name: OWNER_FIELD.to_string(),
            is_super: false,
        }
    }

    fn rewrite_stmt(&mut self, stmt: &mut Statement) {
        match &mut stmt.kind {
            StmtKind::Block(stmts) => {
                self.scopes.push(FxHashSet::default());
                for s in stmts {
                    self.rewrite_stmt(s);
                }
                self.scopes.pop();
            }
            StmtKind::Expr(e) | StmtKind::Throw(e) => self.rewrite_expr(e),
            StmtKind::VarDecl { name, init, .. } => {
                if let Some(init) = init {
                    self.rewrite_expr(init);
                }
                let name = name.clone();
                self.declare(&name);
            }
            StmtKind::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.rewrite_expr(cond);
                self.rewrite_stmt(then_branch);
                if let Some(e) = else_branch {
                    self.rewrite_stmt(e);
                }
            }
            StmtKind::While { cond, body } => {
                self.rewrite_expr(cond);
                self.rewrite_stmt(body);
            }
            StmtKind::DoWhile { body, cond } => {
                self.rewrite_stmt(body);
                self.rewrite_expr(cond);
            }
            StmtKind::For {
                init,
                cond,
                update,
                body,
            } => {
                self.scopes.push(FxHashSet::default());
                if let Some(init) = init {
                    self.rewrite_stmt(init);
                }
                if let Some(cond) = cond {
                    self.rewrite_expr(cond);
                }
                if let Some(update) = update {
                    self.rewrite_expr(update);
                }
                self.rewrite_stmt(body);
                self.scopes.pop();
            }
            StmtKind::ForEach {
                var_name,
                iterable,
                body,
                ..
            } => {
                self.rewrite_expr(iterable);
                self.scopes.push(FxHashSet::default());
                let var_name = var_name.clone();
                self.declare(&var_name);
                self.rewrite_stmt(body);
                self.scopes.pop();
            }
            StmtKind::Switch {
                subject,
                cases,
                default,
            } => {
                self.rewrite_expr(subject);
                for case in cases {
                    self.rewrite_expr(&mut case.value);
                    for s in &mut case.body {
                        self.rewrite_stmt(s);
                    }
                }
                if let Some(default) = default {
                    for s in default {
                        self.rewrite_stmt(s);
                    }
                }
            }
            StmtKind::Labeled { body, .. } => self.rewrite_stmt(body),
            StmtKind::Return(Some(e)) => self.rewrite_expr(e),
            StmtKind::Try {
                body,
                catches,
                finally,
            } => {
                self.rewrite_stmt(body);
                for catch in catches {
                    self.scopes.push(FxHashSet::default());
                    let name = catch.param_name.clone();
                    self.declare(&name);
                    self.rewrite_stmt(&mut catch.body);
                    self.scopes.pop();
                }
                if let Some(fin) = finally {
                    self.rewrite_stmt(fin);
                }
            }
            StmtKind::Synchronized { monitor, body } => {
                self.rewrite_expr(monitor);
                self.rewrite_stmt(body);
            }
            StmtKind::ThisCtorCall(args) | StmtKind::SuperCtorCall(args) => {
                for a in args {
                    self.rewrite_expr(a);
                }
            }
            _ => {}
        }
    }

    fn rewrite_expr(&mut self, expr: &mut Expression) {
        match expr {
            Expression::Var(name) => {
                if self.declared(name) {
                    return;
                }
                if self.captures.contains(name.as_str()) {
                    *expr = Expression::FieldAccess {
                        receiver: Expression::This.boxed(),
                        name: name.clone(),
                        is_super: false,
                    };
                } else if let Some(&is_static) = self.owner_fields.get(name.as_str()) {
                    *expr = if is_static {
                        Expression::StaticField {
                            class_name: self.owner_class.clone(),
                            name: name.clone(),
                        }
                    } else {
                        Expression::FieldAccess {
                            receiver: self.owner_access().boxed(),
                            name: name.clone(),
                            is_super: false,
                        }
                    };
                }
            }
            Expression::This => *expr = self.owner_access(),
            Expression::FieldAccess { receiver, .. } => self.rewrite_expr(receiver),
            Expression::Index { target, index } => {
                self.rewrite_expr(target);
                self.rewrite_expr(index);
            }
            Expression::Binary { left, right, .. } => {
                self.rewrite_expr(left);
                self.rewrite_expr(right);
            }
            Expression::Unary { operand, .. } | Expression::Cast { operand, .. } => {
                self.rewrite_expr(operand)
            }
            Expression::Assign { target, value }
            | Expression::CompoundAssign { target, value, .. } => {
                self.rewrite_expr(target);
                self.rewrite_expr(value);
            }
            Expression::Ternary {
                cond,
                then_value,
                else_value,
            } => {
                self.rewrite_expr(cond);
                self.rewrite_expr(then_value);
                self.rewrite_expr(else_value);
            }
            Expression::MethodCall { receiver, args, .. } => {
                self.rewrite_expr(receiver);
                for a in args {
                    self.rewrite_expr(a);
                }
            }
            Expression::StaticCall { args, .. } | Expression::ConstructorCall { args, .. } => {
                for a in args {
                    self.rewrite_expr(a);
                }
            }
            Expression::Closure { params, body } => {
                // A nested closure resolves against the rewritten outer
                // body when its own class is generated
                let declared = params.iter().map(|p| p.name.clone()).collect();
                self.scopes.push(declared);
                self.rewrite_stmt(body);
                self.scopes.pop();
            }
            Expression::ListLit(items) => {
                for i in items {
                    self.rewrite_expr(i);
                }
            }
            Expression::MapLit(pairs) => {
                for (k, v) in pairs {
                    self.rewrite_expr(k);
                    self.rewrite_expr(v);
                }
            }
            _ => {}
        }
    }
}
