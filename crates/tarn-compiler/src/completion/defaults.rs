//! Property accessors and default-argument overload expansion

use tarn_ast::{
    modifiers, ClassNode, ConstructorNode, Expression, MethodNode, Parameter, Statement, StmtKind,
    TypeRef,
};

use crate::diagnostics::ErrorCollector;
use crate::error::Result;

/// Synthesize `getX`/`setX` (and `isX` for booleans) for every property
/// without explicit accessor bodies
pub(super) fn synthesize_accessors(
    class: &mut ClassNode,
    collector: &mut ErrorCollector,
) -> Result<()> {
    let mut new_methods = Vec::new();

    for prop in &class.properties {
        let field = &prop.field;
        let cap = prop.capitalized();
        let is_static = field.is_static();
        let access_modifiers = if is_static {
            modifiers::PUBLIC | modifiers::STATIC
        } else {
            modifiers::PUBLIC
        };

        let read = || -> Expression {
            if is_static {
                Expression::StaticField {
                    class_name: class.name.clone(),
                    name: field.name.clone(),
                }
            } else {
                Expression::FieldAccess {
                    receiver: Expression::This.boxed(),
                    name: field.name.clone(),
                    is_super: false,
                }
            }
        };

        let getter_name = format!("get{cap}");
        if !class.declares_method(&getter_name, 0) {
            let body = prop
                .getter_body
                .clone()
                .unwrap_or_else(|| Statement::block(vec![Statement::ret(Some(read()))]));
            new_methods.push(
                MethodNode::new(getter_name, field.ty.clone())
                    .with_modifiers(access_modifiers)
                    .with_body(body)
                    .synthetic(),
            );
        }

        if field.ty.is_boolean() {
            let alias_name = format!("is{cap}");
            if !class.declares_method(&alias_name, 0) {
                let body = prop
                    .getter_body
                    .clone()
                    .unwrap_or_else(|| Statement::block(vec![Statement::ret(Some(read()))]));
                new_methods.push(
                    MethodNode::new(alias_name, field.ty.clone())
                        .with_modifiers(access_modifiers)
                        .with_body(body)
                        .synthetic(),
                );
            }
        }

        if !field.is_final() {
            let setter_name = format!("set{cap}");
            if !class.declares_method(&setter_name, 1) {
                let body = prop.setter_body.clone().unwrap_or_else(|| {
                    Statement::block(vec![
                        Statement::expr(Expression::Assign {
                            target: read().boxed(),
                            value: Expression::Var("value".to_string()).boxed(),
                        }),
                        Statement::ret(None),
                    ])
                });
                new_methods.push(
                    MethodNode::new(setter_name, TypeRef::void())
                        .with_params(vec![Parameter::new("value", field.ty.clone())])
                        .with_modifiers(access_modifiers)
                        .with_body(body)
                        .synthetic(),
                );
            }
        }
    }

    // Ensure every property has its backing field
    let backing: Vec<_> = class
        .properties
        .iter()
        .filter(|p| class.get_field(p.name()).is_none())
        .map(|p| p.field.clone())
        .collect();
    for field in backing {
        if let Err(e) = class.add_field(field) {
            collector.error(tarn_ast::Span::synthetic(), e.to_string());
        }
    }

    for method in new_methods {
        class.add_method(method)?;
    }
    Ok(())
}

/// Expand a member with k trailing defaulted parameters into exactly k
/// forwarding overloads, each dropping one more trailing parameter and
/// splicing the dropped defaults back into the forwarded call
pub(super) fn expand_default_arguments(
    class: &mut ClassNode,
    collector: &mut ErrorCollector,
) -> Result<()> {
    let class_name = class.name.clone();

    // Methods
    let sources: Vec<MethodNode> = class
        .methods
        .iter()
        .filter(|m| m.params.iter().any(Parameter::has_default))
        .cloned()
        .collect();

    let mut new_methods: Vec<MethodNode> = Vec::new();
    for method in &sources {
        let Some(k) = trailing_default_count(&method.params, collector) else {
            continue;
        };
        for i in 1..=k {
            let arity = method.params.len() - i;
            let collides = class.declares_method(&method.name, arity)
                || new_methods
                    .iter()
                    .any(|m| m.name == method.name && m.arity() == arity);
            if collides {
                collector.error(
                    tarn_ast::Span::synthetic(),
                    format!(
                        "{}: default-argument overload with {} parameter(s) collides with an existing method",
                        method.describe(),
                        arity
                    ),
                );
                continue;
            }

            let params: Vec<Parameter> = method.params[..arity]
                .iter()
                .map(|p| Parameter::new(p.name.clone(), p.ty.clone()))
                .collect();
            let args = forwarded_args(&method.params, arity);
            let call = if method.is_static() {
                Expression::StaticCall {
                    class_name: class_name.clone(),
                    name: method.name.clone(),
                    args,
                }
            } else {
                Expression::MethodCall {
                    receiver: Expression::This.boxed(),
                    name: method.name.clone(),
                    args,
                    is_super: false,
                }
            };
            let body = if method.return_type.is_void() {
                Statement::block(vec![Statement::expr(call), Statement::ret(None)])
            } else {
                Statement::block(vec![Statement::ret(Some(call))])
            };
            new_methods.push(
                MethodNode::new(method.name.clone(), method.return_type.clone())
                    .with_modifiers(method.modifiers)
                    .with_params(params)
                    .with_body(body)
                    .synthetic(),
            );
        }
    }
    for method in new_methods {
        class.add_method(method)?;
    }

    // Constructors: the overload delegates with `this(...)`
    let ctor_sources: Vec<ConstructorNode> = class
        .constructors
        .iter()
        .filter(|c| c.params.iter().any(Parameter::has_default))
        .cloned()
        .collect();

    let mut new_ctors: Vec<ConstructorNode> = Vec::new();
    for ctor in &ctor_sources {
        let Some(k) = trailing_default_count(&ctor.params, collector) else {
            continue;
        };
        for i in 1..=k {
            let arity = ctor.params.len() - i;
            let collides = class.declares_constructor(arity)
                || new_ctors.iter().any(|c| c.arity() == arity);
            if collides {
                collector.error(
                    tarn_ast::Span::synthetic(),
                    format!(
                        "{}: default-argument overload with {} parameter(s) collides with an existing constructor",
                        ctor.describe(),
                        arity
                    ),
                );
                continue;
            }
            let params: Vec<Parameter> = ctor.params[..arity]
                .iter()
                .map(|p| Parameter::new(p.name.clone(), p.ty.clone()))
                .collect();
            let args = forwarded_args(&ctor.params, arity);
            let body = Statement::block(vec![Statement::new(StmtKind::ThisCtorCall(args))]);
            let mut overload = ConstructorNode::new(params, body).synthetic();
            overload.modifiers = ctor.modifiers;
            new_ctors.push(overload);
        }
    }
    for ctor in new_ctors {
        class.add_constructor(ctor)?;
    }

    Ok(())
}

/// Count trailing defaulted parameters; None (with a diagnostic) when a
/// defaulted parameter is followed by a non-defaulted one
fn trailing_default_count(params: &[Parameter], collector: &mut ErrorCollector) -> Option<usize> {
    let k = params
        .iter()
        .rev()
        .take_while(|p| p.has_default())
        .count();
    let misplaced = params[..params.len() - k]
        .iter()
        .any(Parameter::has_default);
    if misplaced {
        collector.error(
            tarn_ast::Span::synthetic(),
            "defaulted parameters must be trailing",
        );
        return None;
    }
    Some(k)
}

/// Arguments forwarded by an overload of the given arity: the kept
/// parameters by name, then the dropped parameters' default expressions
fn forwarded_args(params: &[Parameter], arity: usize) -> Vec<Expression> {
    let mut args: Vec<Expression> = params[..arity]
        .iter()
        .map(|p| Expression::Var(p.name.clone()))
        .collect();
    args.extend(
        params[arity..]
            .iter()
            .map(|p| p.default_value.clone().unwrap_or(Expression::NullLit)),
    );
    args
}
