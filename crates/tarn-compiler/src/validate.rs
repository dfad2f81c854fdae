//! Structural validation
//!
//! Read-only pass over a completed class. Every violated rule becomes a
//! diagnostic; the pass always runs to the end so one compile reports as
//! much as it can.

use rustc_hash::FxHashSet;
use tarn_ast::{
    modifiers, ClassId, ClassNode, CompileUnit, Expression, Span, Statement, StmtKind,
    THROWABLE_CLASS,
};

use crate::classpath::{ClassPath, TypeResolver};
use crate::diagnostics::ErrorCollector;

pub struct StructuralValidator;

impl StructuralValidator {
    pub fn validate(
        unit: &CompileUnit,
        class_id: ClassId,
        classpath: &dyn ClassPath,
        collector: &mut ErrorCollector,
    ) {
        let class = unit.class(class_id);
        let resolver = TypeResolver::new(unit, classpath);

        check_class_modifiers(class, collector);
        check_hierarchy(class, &resolver, collector);
        check_inheritance_cycle(class, &resolver, collector);
        if class.is_interface() {
            check_interface_members(class, collector);
        }
        check_duplicate_fields(class, collector);
        check_duplicate_signatures(class, collector);
        check_final_overrides(unit, class_id, collector);
        check_bodies(class, &resolver, collector);
    }
}

fn check_class_modifiers(class: &ClassNode, collector: &mut ErrorCollector) {
    if class.is_abstract() && class.is_final() {
        collector.error(
            Span::synthetic(),
            format!("class {} cannot be both abstract and final", class.name),
        );
    }
    if class.modifiers & (modifiers::TRANSIENT | modifiers::VOLATILE) != 0 {
        collector.error(
            Span::synthetic(),
            format!(
                "class {} carries a field-only modifier (transient/volatile)",
                class.name
            ),
        );
    }
}

fn check_hierarchy(class: &ClassNode, resolver: &TypeResolver, collector: &mut ErrorCollector) {
    if let Some(super_name) = &class.super_name {
        if !resolver.is_known(super_name) {
            collector.error(
                Span::synthetic(),
                format!("class {}: unknown superclass {}", class.name, super_name),
            );
        } else if resolver.is_interface(super_name) {
            collector.error(
                Span::synthetic(),
                format!(
                    "class {} extends interface {}; use implements",
                    class.name, super_name
                ),
            );
        } else if resolver.is_final(super_name) {
            collector.error(
                Span::synthetic(),
                format!("class {} extends final class {}", class.name, super_name),
            );
        }
    }
    for interface in &class.interfaces {
        if !resolver.is_known(interface) {
            collector.error(
                Span::synthetic(),
                format!("class {}: unknown interface {}", class.name, interface),
            );
        } else if !resolver.is_interface(interface) {
            collector.error(
                Span::synthetic(),
                format!(
                    "class {} implements {}, which is not an interface",
                    class.name, interface
                ),
            );
        }
    }
}

fn check_inheritance_cycle(
    class: &ClassNode,
    resolver: &TypeResolver,
    collector: &mut ErrorCollector,
) {
    let mut seen = FxHashSet::default();
    seen.insert(class.name.clone());
    let mut current = class.super_name.clone();
    while let Some(name) = current {
        if !seen.insert(name.clone()) {
            collector.error(
                Span::synthetic(),
                format!("class {}: cyclic inheritance through {}", class.name, name),
            );
            return;
        }
        current = resolver.super_name_of(&name);
    }
}

fn check_interface_members(class: &ClassNode, collector: &mut ErrorCollector) {
    for method in &class.methods {
        if method.is_final() {
            collector.error(
                Span::synthetic(),
                format!(
                    "interface {}: method {} cannot be final",
                    class.name,
                    method.describe()
                ),
            );
        }
        if method.is_static() {
            collector.error(
                Span::synthetic(),
                format!(
                    "interface {}: method {} cannot be static",
                    class.name,
                    method.describe()
                ),
            );
        }
    }
    for field in &class.fields {
        if !(field.is_public() && field.is_static() && field.is_final()) {
            collector.error(
                Span::synthetic(),
                format!(
                    "interface {}: field {} must be public static final",
                    class.name, field.name
                ),
            );
        }
    }
    if !class.constructors.is_empty() {
        collector.error(
            Span::synthetic(),
            format!("interface {} cannot declare constructors", class.name),
        );
    }
}

fn check_duplicate_fields(class: &ClassNode, collector: &mut ErrorCollector) {
    let mut seen = FxHashSet::default();
    for field in &class.fields {
        if !seen.insert(field.name.as_str()) {
            collector.error(
                Span::synthetic(),
                format!("class {}: duplicate field '{}'", class.name, field.name),
            );
        }
    }
}

/// A duplicate shares name, parameter types and return type; covariant
/// bridges share only the first two and are legal
fn check_duplicate_signatures(class: &ClassNode, collector: &mut ErrorCollector) {
    for (i, a) in class.methods.iter().enumerate() {
        if class.methods[..i].iter().any(|b| b.same_signature(a)) {
            collector.error(
                Span::synthetic(),
                format!("class {}: duplicate method {}", class.name, a.describe()),
            );
        }
    }
    for (i, a) in class.constructors.iter().enumerate() {
        let types_a: Vec<&str> = a.params.iter().map(|p| p.ty.name.as_str()).collect();
        let dup = class.constructors[..i].iter().any(|b| {
            let types_b: Vec<&str> = b.params.iter().map(|p| p.ty.name.as_str()).collect();
            types_a == types_b
        });
        if dup {
            collector.error(
                Span::synthetic(),
                format!("class {}: duplicate constructor {}", class.name, a.describe()),
            );
        }
    }
}

/// Overriding a final method anywhere up the in-unit chain, matched on
/// exact parameter types
fn check_final_overrides(unit: &CompileUnit, class_id: ClassId, collector: &mut ErrorCollector) {
    let class = unit.class(class_id);
    for ancestor_id in unit.ancestor_chain(class_id) {
        let ancestor = unit.class(ancestor_id);
        for method in &class.methods {
            if method.synthetic {
                continue;
            }
            let hides_final = ancestor
                .methods
                .iter()
                .any(|a| a.is_final() && a.matches_erased(method));
            if hides_final {
                collector.error(
                    Span::synthetic(),
                    format!(
                        "class {}: {} overrides a final method of {}",
                        class.name,
                        method.describe(),
                        ancestor.name
                    ),
                );
            }
        }
    }
}

/// Body-level checks: catch types, abstract instantiation, map-literal
/// indexing
fn check_bodies(class: &ClassNode, resolver: &TypeResolver, collector: &mut ErrorCollector) {
    let mut bodies: Vec<&Statement> = Vec::new();
    bodies.extend(class.methods.iter().filter_map(|m| m.body.as_ref()));
    bodies.extend(class.constructors.iter().map(|c| &c.body));

    for body in bodies {
        walk_stmt(body, &mut |stmt| {
            if let StmtKind::Try { catches, .. } = &stmt.kind {
                for catch in catches {
                    let name = &catch.param_type.name;
                    if !resolver.derives_from(name, THROWABLE_CLASS) {
                        collector.error(
                            stmt.span,
                            format!(
                                "class {}: catch type {} does not derive from {}",
                                class.name, name, THROWABLE_CLASS
                            ),
                        );
                    }
                }
            }
            for_each_expr_in_stmt(stmt, &mut |span, expr| match expr {
                Expression::ConstructorCall { class_name, .. } => {
                    if resolver.is_abstract(class_name) || resolver.is_interface(class_name) {
                        collector.error(
                            span,
                            format!(
                                "class {}: cannot instantiate abstract type {}",
                                class.name, class_name
                            ),
                        );
                    }
                }
                Expression::Index { index, .. } => {
                    if index.is_map_literal() {
                        collector.error(
                            span,
                            format!(
                                "class {}: a map literal cannot be used as an index argument",
                                class.name
                            ),
                        );
                    }
                }
                _ => {}
            });
        });
    }
}

/// Depth-first walk over a statement tree, including closure bodies
pub fn walk_stmt(stmt: &Statement, f: &mut impl FnMut(&Statement)) {
    f(stmt);
    match &stmt.kind {
        StmtKind::Block(stmts) => {
            for s in stmts {
                walk_stmt(s, f);
            }
        }
        StmtKind::If {
            then_branch,
            else_branch,
            ..
        } => {
            walk_stmt(then_branch, f);
            if let Some(e) = else_branch {
                walk_stmt(e, f);
            }
        }
        StmtKind::While { body, .. }
        | StmtKind::DoWhile { body, .. }
        | StmtKind::ForEach { body, .. }
        | StmtKind::Labeled { body, .. }
        | StmtKind::Synchronized { body, .. } => walk_stmt(body, f),
        StmtKind::For { init, body, .. } => {
            if let Some(init) = init {
                walk_stmt(init, f);
            }
            walk_stmt(body, f);
        }
        StmtKind::Switch { cases, default, .. } => {
            for case in cases {
                for s in &case.body {
                    walk_stmt(s, f);
                }
            }
            if let Some(default) = default {
                for s in default {
                    walk_stmt(s, f);
                }
            }
        }
        StmtKind::Try {
            body,
            catches,
            finally,
        } => {
            walk_stmt(body, f);
            for catch in catches {
                walk_stmt(&catch.body, f);
            }
            if let Some(fin) = finally {
                walk_stmt(fin, f);
            }
        }
        _ => {}
    }
}

/// Visit every expression directly held by one statement (not recursing
/// into nested statements, which `walk_stmt` already covers), including
/// expressions inside closure literals
pub fn for_each_expr_in_stmt(stmt: &Statement, f: &mut impl FnMut(Span, &Expression)) {
    let span = stmt.span;
    match &stmt.kind {
        StmtKind::Expr(e) | StmtKind::Throw(e) => walk_expr(span, e, f),
        StmtKind::VarDecl { init: Some(e), .. } => walk_expr(span, e, f),
        StmtKind::If { cond, .. } | StmtKind::While { cond, .. } | StmtKind::DoWhile { cond, .. } => {
            walk_expr(span, cond, f)
        }
        StmtKind::For { cond, update, .. } => {
            if let Some(c) = cond {
                walk_expr(span, c, f);
            }
            if let Some(u) = update {
                walk_expr(span, u, f);
            }
        }
        StmtKind::ForEach { iterable, .. } => walk_expr(span, iterable, f),
        StmtKind::Switch { subject, cases, .. } => {
            walk_expr(span, subject, f);
            for case in cases {
                walk_expr(span, &case.value, f);
            }
        }
        StmtKind::Return(Some(e)) => walk_expr(span, e, f),
        StmtKind::Synchronized { monitor, .. } => walk_expr(span, monitor, f),
        StmtKind::ThisCtorCall(args) | StmtKind::SuperCtorCall(args) => {
            for a in args {
                walk_expr(span, a, f);
            }
        }
        _ => {}
    }
}

fn walk_expr(span: Span, expr: &Expression, f: &mut impl FnMut(Span, &Expression)) {
    f(span, expr);
    match expr {
        Expression::FieldAccess { receiver, .. } => walk_expr(span, receiver, f),
        Expression::Index { target, index } => {
            walk_expr(span, target, f);
            walk_expr(span, index, f);
        }
        Expression::Binary { left, right, .. } => {
            walk_expr(span, left, f);
            walk_expr(span, right, f);
        }
        Expression::Unary { operand, .. } | Expression::Cast { operand, .. } => {
            walk_expr(span, operand, f)
        }
        Expression::Assign { target, value }
        | Expression::CompoundAssign { target, value, .. } => {
            walk_expr(span, target, f);
            walk_expr(span, value, f);
        }
        Expression::Ternary {
            cond,
            then_value,
            else_value,
        } => {
            walk_expr(span, cond, f);
            walk_expr(span, then_value, f);
            walk_expr(span, else_value, f);
        }
        Expression::MethodCall { receiver, args, .. } => {
            walk_expr(span, receiver, f);
            for a in args {
                walk_expr(span, a, f);
            }
        }
        Expression::StaticCall { args, .. } | Expression::ConstructorCall { args, .. } => {
            for a in args {
                walk_expr(span, a, f);
            }
        }
        Expression::Closure { body, .. } => {
            walk_stmt(body, &mut |s| for_each_expr_in_stmt(s, f));
        }
        Expression::ListLit(items) => {
            for i in items {
                walk_expr(span, i, f);
            }
        }
        Expression::MapLit(pairs) => {
            for (k, v) in pairs {
                walk_expr(span, k, f);
                walk_expr(span, v, f);
            }
        }
        _ => {}
    }
}
