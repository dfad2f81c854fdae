//! Semantic completion
//!
//! Fills in everything the language promises implicitly before a class is
//! validated and generated: default constructors, the dynamic-object
//! protocol, property accessors, field-initializer injection, return
//! normalization, default-argument overloads and covariant bridges.
//!
//! Mutation is two-phase: cross-class reads against the immutable unit
//! first, then in-place mutation of the one class being completed.

mod bridges;
mod defaults;

use tarn_ast::{
    ClassId, ClassNode, CompileUnit, ConstructorNode, DelegationKind, Expression, FieldNode,
    MethodNode, Statement, StmtKind, TypeRef, DISPATCH_HELPER_CLASS, DYNAMIC_OBJECT_INTERFACE,
    META_HANDLE_CLASS,
};

use crate::classpath::ClassPath;
use crate::diagnostics::ErrorCollector;
use crate::error::Result;

/// Synthetic field carrying the per-instance metadata handle
pub const META_FIELD: &str = "$meta";
/// Synthetic static initializer method
pub const CLINIT_METHOD: &str = "<clinit>";

pub struct CompletionVisitor;

impl CompletionVisitor {
    /// Complete one class in place
    pub fn complete(
        unit: &mut CompileUnit,
        class_id: ClassId,
        classpath: &dyn ClassPath,
        collector: &mut ErrorCollector,
    ) -> Result<()> {
        let is_interface = unit.class(class_id).is_interface();

        if is_interface {
            // Interfaces only get their default-method bodies normalized
            let class = unit.class_mut(class_id);
            normalize_returns(class);
            return Ok(());
        }

        // Read phase against the immutable unit
        let needs_protocol = !unit.implements_interface(class_id, DYNAMIC_OBJECT_INTERFACE)
            && !has_classpath_protocol(unit, class_id, classpath);
        let bridges = bridges::compute(unit, class_id, classpath, collector);

        // Mutation phase
        let class = unit.class_mut(class_id);

        if class.constructors.is_empty() {
            class.add_constructor(
                ConstructorNode::new(Vec::new(), Statement::block(Vec::new())).synthetic(),
            )?;
        }

        defaults::synthesize_accessors(class, collector)?;

        if needs_protocol {
            add_protocol_members(class)?;
        }

        defaults::expand_default_arguments(class, collector)?;

        inject_field_initializers(class)?;

        for bridge in bridges {
            class.add_method(bridge)?;
        }

        normalize_returns(class);

        check_constructor_rules(class, collector);

        Ok(())
    }
}

/// True when an ancestor outside the unit already carries the protocol.
/// Walks from the last in-unit ancestor onto the classpath.
fn has_classpath_protocol(unit: &CompileUnit, class_id: ClassId, classpath: &dyn ClassPath) -> bool {
    let outermost = unit
        .ancestor_chain(class_id)
        .last()
        .copied()
        .unwrap_or(class_id);
    let mut current = Some(unit.class(outermost).super_class_name().to_string());
    while let Some(name) = current {
        match classpath.lookup(&name) {
            Some(ext) if ext.name == DYNAMIC_OBJECT_INTERFACE => return true,
            Some(ext) => current = ext.super_name.clone(),
            None => return false,
        }
    }
    false
}

/// Add the dynamic-object protocol: the marker interface, the `$meta`
/// handle field and trampolines delegating to the runtime dispatch helper
fn add_protocol_members(class: &mut ClassNode) -> Result<()> {
    class
        .interfaces
        .push(DYNAMIC_OBJECT_INTERFACE.to_string());

    if class.get_field(META_FIELD).is_none() {
        class.add_field(
            FieldNode::new(META_FIELD, TypeRef::new(META_HANDLE_CLASS)).synthetic(),
        )?;
    }

    let trampolines = [
        ("invokeMethod", vec!["name", "args"], TypeRef::object()),
        ("getProperty", vec!["name"], TypeRef::object()),
        ("setProperty", vec!["name", "value"], TypeRef::void()),
        ("getMetaHandle", vec![], TypeRef::new(META_HANDLE_CLASS)),
    ];

    for (name, param_names, return_type) in trampolines {
        if class.declares_method(name, param_names.len()) {
            continue;
        }
        let params: Vec<tarn_ast::Parameter> = param_names
            .iter()
            .map(|p| tarn_ast::Parameter::new(*p, TypeRef::object()))
            .collect();
        let mut args = vec![Expression::This];
        args.extend(param_names.iter().map(|p| Expression::Var(p.to_string())));
        let call = Expression::StaticCall {
            class_name: DISPATCH_HELPER_CLASS.to_string(),
            name: name.to_string(),
            args,
        };
        let body = if return_type.is_void() {
            Statement::block(vec![Statement::expr(call), Statement::ret(None)])
        } else {
            Statement::block(vec![Statement::ret(Some(call))])
        };
        class.add_method(
            MethodNode::new(name, return_type)
                .with_params(params)
                .with_body(body)
                .synthetic(),
        )?;
    }
    Ok(())
}

/// Splice instance-field initializers into every non-delegating
/// constructor and collect static initializers into `<clinit>`
fn inject_field_initializers(class: &mut ClassNode) -> Result<()> {
    let instance_inits: Vec<Statement> = class
        .fields
        .iter()
        .filter(|f| !f.is_static() && f.initializer.is_some())
        .map(|f| {
            Statement::expr(Expression::Assign {
                target: Expression::FieldAccess {
                    receiver: Expression::This.boxed(),
                    name: f.name.clone(),
                    is_super: false,
                }
                .boxed(),
                value: f.initializer.clone().unwrap_or(Expression::NullLit).boxed(),
            })
        })
        .collect();

    if !instance_inits.is_empty() {
        for ctor in &mut class.constructors {
            if ctor.delegation() == Some(DelegationKind::This) {
                // The delegation target runs the initializers
                continue;
            }
            if let StmtKind::Block(stmts) = &mut ctor.body.kind {
                let at = match stmts.first() {
                    Some(s) if s.is_ctor_delegation() => 1,
                    _ => 0,
                };
                stmts.splice(at..at, instance_inits.iter().cloned());
            }
        }
    }

    let static_inits: Vec<Statement> = class
        .fields
        .iter()
        .filter(|f| f.is_static() && f.initializer.is_some())
        .map(|f| {
            Statement::expr(Expression::Assign {
                target: Expression::StaticField {
                    class_name: class.name.clone(),
                    name: f.name.clone(),
                }
                .boxed(),
                value: f.initializer.clone().unwrap_or(Expression::NullLit).boxed(),
            })
        })
        .collect();

    if !static_inits.is_empty() && !class.declares_method(CLINIT_METHOD, 0) {
        let mut body = static_inits;
        body.push(Statement::ret(None));
        class.add_method(
            MethodNode::new(CLINIT_METHOD, TypeRef::void())
                .with_modifiers(tarn_ast::modifiers::PUBLIC | tarn_ast::modifiers::STATIC)
                .with_body(Statement::block(body))
                .synthetic(),
        )?;
    }

    Ok(())
}

/// Guarantee an explicit return on every fall-through path
fn normalize_returns(class: &mut ClassNode) {
    for method in &mut class.methods {
        let Some(body) = method.body.as_mut() else {
            continue;
        };
        if !matches!(body.kind, StmtKind::Block(_)) {
            let inner = std::mem::replace(body, Statement::empty());
            *body = Statement::block(vec![inner]);
        }
        if body.always_exits() {
            continue;
        }
        let StmtKind::Block(stmts) = &mut body.kind else {
            continue;
        };
        if method.return_type.is_void() {
            stmts.push(Statement::ret(None));
        } else if matches!(stmts.last().map(|s| &s.kind), Some(StmtKind::Expr(_))) {
            // Trailing expression statement becomes the return value
            let last = stmts.pop();
            if let Some(Statement {
                span,
                kind: StmtKind::Expr(e),
            }) = last
            {
                stmts.push(Statement::ret(Some(e)).at(span));
            }
        } else {
            stmts.push(Statement::ret(Some(default_value(&method.return_type))));
        }
    }
}

fn default_value(ty: &TypeRef) -> Expression {
    if ty.is_int() {
        Expression::IntLit(0)
    } else if ty.is_float() {
        Expression::FloatLit(0.0)
    } else if ty.is_boolean() {
        Expression::BoolLit(false)
    } else {
        Expression::NullLit
    }
}

/// Hard errors around constructor delegation: delegation anywhere but
/// first, and `this` leaking into the delegation arguments
fn check_constructor_rules(class: &ClassNode, collector: &mut ErrorCollector) {
    for ctor in &class.constructors {
        let StmtKind::Block(stmts) = &ctor.body.kind else {
            continue;
        };
        for (i, stmt) in stmts.iter().enumerate() {
            if stmt.is_ctor_delegation() && i != 0 {
                collector.error(
                    stmt.span,
                    format!(
                        "{}: constructor delegation must be the first statement",
                        ctor.describe()
                    ),
                );
            }
            if i == 0 {
                let args = match &stmt.kind {
                    StmtKind::ThisCtorCall(args) | StmtKind::SuperCtorCall(args) => args,
                    _ => continue,
                };
                if args.iter().any(expr_uses_this) {
                    collector.error(
                        stmt.span,
                        format!(
                            "{}: 'this' may not be used before the delegated constructor completes",
                            ctor.describe()
                        ),
                    );
                }
            }
        }
    }
}

fn expr_uses_this(expr: &Expression) -> bool {
    match expr {
        Expression::This => true,
        Expression::FieldAccess { receiver, .. } => expr_uses_this(receiver),
        Expression::Index { target, index } => expr_uses_this(target) || expr_uses_this(index),
        Expression::Binary { left, right, .. } => expr_uses_this(left) || expr_uses_this(right),
        Expression::Unary { operand, .. } => expr_uses_this(operand),
        Expression::Assign { target, value } => expr_uses_this(target) || expr_uses_this(value),
        Expression::CompoundAssign { target, value, .. } => {
            expr_uses_this(target) || expr_uses_this(value)
        }
        Expression::Ternary {
            cond,
            then_value,
            else_value,
        } => expr_uses_this(cond) || expr_uses_this(then_value) || expr_uses_this(else_value),
        Expression::MethodCall { receiver, args, .. } => {
            expr_uses_this(receiver) || args.iter().any(expr_uses_this)
        }
        Expression::StaticCall { args, .. } | Expression::ConstructorCall { args, .. } => {
            args.iter().any(expr_uses_this)
        }
        Expression::Cast { operand, .. } => expr_uses_this(operand),
        Expression::ListLit(items) => items.iter().any(expr_uses_this),
        Expression::MapLit(pairs) => pairs
            .iter()
            .any(|(k, v)| expr_uses_this(k) || expr_uses_this(v)),
        // A closure capturing `this` is only entered after construction
        Expression::Closure { .. } => false,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classpath::BootClasspath;
    use tarn_ast::modifiers;

    fn complete_one(mut unit: CompileUnit, id: ClassId) -> (CompileUnit, ErrorCollector) {
        let cp = BootClasspath::new();
        let mut collector = ErrorCollector::new();
        collector.set_unit("test");
        CompletionVisitor::complete(&mut unit, id, &cp, &mut collector).unwrap();
        (unit, collector)
    }

    #[test]
    fn test_default_constructor_added() {
        let mut unit = CompileUnit::new();
        let id = unit.add_class(ClassNode::new("demo.A"));
        let (unit, _) = complete_one(unit, id);
        let class = unit.class(id);
        assert_eq!(class.constructors.len(), 1);
        assert!(class.constructors[0].synthetic);
        assert_eq!(class.constructors[0].arity(), 0);
    }

    #[test]
    fn test_dynamic_protocol_added_once() {
        let mut unit = CompileUnit::new();
        let a = unit.add_class(ClassNode::new("demo.A"));
        let (mut unit, _) = complete_one(unit, a);
        let b = unit.add_class(ClassNode::new("demo.B").with_super("demo.A"));
        let (unit, _) = complete_one(unit, b);

        let class_a = unit.class(a);
        assert!(class_a.implements_directly(DYNAMIC_OBJECT_INTERFACE));
        assert!(class_a.get_field(META_FIELD).is_some());
        assert!(class_a.declares_method("invokeMethod", 2));
        assert!(class_a.declares_method("getMetaHandle", 0));

        // B inherits the protocol from A and must not re-add it
        let class_b = unit.class(b);
        assert!(!class_b.implements_directly(DYNAMIC_OBJECT_INTERFACE));
        assert!(!class_b.declares_method("invokeMethod", 2));
    }

    #[test]
    fn test_interface_skipped() {
        let mut unit = CompileUnit::new();
        let id = unit.add_class(
            ClassNode::new("demo.I").with_modifiers(modifiers::PUBLIC | modifiers::INTERFACE),
        );
        let (unit, _) = complete_one(unit, id);
        let class = unit.class(id);
        assert!(class.constructors.is_empty());
        assert!(!class.implements_directly(DYNAMIC_OBJECT_INTERFACE));
    }

    #[test]
    fn test_field_initializers_injected_after_super_call() {
        let mut unit = CompileUnit::new();
        let mut class = ClassNode::new("demo.A");
        class
            .add_field(FieldNode::new("x", TypeRef::int()).with_initializer(Expression::IntLit(7)))
            .unwrap();
        class
            .add_constructor(ConstructorNode::new(
                Vec::new(),
                Statement::block(vec![
                    Statement::new(StmtKind::SuperCtorCall(Vec::new())),
                    Statement::expr(Expression::NullLit),
                ]),
            ))
            .unwrap();
        let id = unit.add_class(class);
        let (unit, _) = complete_one(unit, id);

        let ctor = &unit.class(id).constructors[0];
        let StmtKind::Block(stmts) = &ctor.body.kind else {
            panic!("expected block");
        };
        assert!(matches!(stmts[0].kind, StmtKind::SuperCtorCall(_)));
        // Initializer assignment spliced right after the super call
        assert!(matches!(stmts[1].kind, StmtKind::Expr(Expression::Assign { .. })));
    }

    #[test]
    fn test_static_initializers_become_clinit() {
        let mut unit = CompileUnit::new();
        let mut class = ClassNode::new("demo.A");
        class
            .add_field(
                FieldNode::new("count", TypeRef::int())
                    .with_modifiers(modifiers::PRIVATE | modifiers::STATIC)
                    .with_initializer(Expression::IntLit(1)),
            )
            .unwrap();
        let id = unit.add_class(class);
        let (unit, _) = complete_one(unit, id);
        assert!(unit.class(id).declares_method(CLINIT_METHOD, 0));
    }

    #[test]
    fn test_return_normalization() {
        let mut unit = CompileUnit::new();
        let mut class = ClassNode::new("demo.A");
        class
            .add_method(
                MethodNode::new("answer", TypeRef::int())
                    .with_body(Statement::block(vec![Statement::expr(Expression::IntLit(42))])),
            )
            .unwrap();
        class
            .add_method(
                MethodNode::new("noop", TypeRef::void())
                    .with_body(Statement::block(Vec::new())),
            )
            .unwrap();
        class
            .add_method(
                MethodNode::new("label", TypeRef::object())
                    .with_body(Statement::block(vec![Statement::new(StmtKind::VarDecl {
                        name: "t".to_string(),
                        ty: TypeRef::object(),
                        init: None,
                    })])),
            )
            .unwrap();
        let id = unit.add_class(class);
        let (unit, _) = complete_one(unit, id);
        let class = unit.class(id);

        // Trailing expression wrapped into a return
        let answer = &class.get_methods("answer")[0];
        let StmtKind::Block(stmts) = &answer.body.as_ref().unwrap().kind else {
            panic!("expected block");
        };
        assert!(matches!(
            stmts.last().unwrap().kind,
            StmtKind::Return(Some(Expression::IntLit(42)))
        ));

        // Void method gets a bare return
        let noop = &class.get_methods("noop")[0];
        let StmtKind::Block(stmts) = &noop.body.as_ref().unwrap().kind else {
            panic!("expected block");
        };
        assert!(matches!(stmts.last().unwrap().kind, StmtKind::Return(None)));

        // Object method gets return null
        let label = &class.get_methods("label")[0];
        let StmtKind::Block(stmts) = &label.body.as_ref().unwrap().kind else {
            panic!("expected block");
        };
        assert!(matches!(
            stmts.last().unwrap().kind,
            StmtKind::Return(Some(Expression::NullLit))
        ));
    }

    #[test]
    fn test_delegation_not_first_is_error() {
        let mut unit = CompileUnit::new();
        let mut class = ClassNode::new("demo.A");
        class
            .add_constructor(ConstructorNode::new(
                Vec::new(),
                Statement::block(vec![
                    Statement::expr(Expression::NullLit),
                    Statement::new(StmtKind::SuperCtorCall(Vec::new())),
                ]),
            ))
            .unwrap();
        let id = unit.add_class(class);
        let (_, collector) = complete_one(unit, id);
        assert!(collector.has_errors());
    }

    #[test]
    fn test_this_in_delegation_args_is_error() {
        let mut unit = CompileUnit::new();
        let mut class = ClassNode::new("demo.A");
        class
            .add_constructor(ConstructorNode::new(
                Vec::new(),
                Statement::block(vec![Statement::new(StmtKind::SuperCtorCall(vec![
                    Expression::FieldAccess {
                        receiver: Expression::This.boxed(),
                        name: "x".to_string(),
                        is_super: false,
                    },
                ]))]),
            ))
            .unwrap();
        let id = unit.add_class(class);
        let (_, collector) = complete_one(unit, id);
        assert!(collector.has_errors());
    }
}
