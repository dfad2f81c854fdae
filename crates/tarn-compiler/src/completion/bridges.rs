//! Covariant bridge synthesis
//!
//! When an override narrows the return type, callers holding the ancestor
//! signature still need a method with the ancestor's return type. The
//! bridge carries the ancestor signature and forwards to the override.

use tarn_ast::{ClassId, CompileUnit, Expression, MethodNode, Parameter, Span, Statement};

use crate::classpath::{ClassPath, TypeResolver};
use crate::diagnostics::ErrorCollector;

/// Compute the bridges a class needs, reporting fatal override defects
/// along the way. Read-only against the unit; the caller adds the
/// returned methods.
pub(super) fn compute(
    unit: &CompileUnit,
    class_id: ClassId,
    classpath: &dyn ClassPath,
    collector: &mut ErrorCollector,
) -> Vec<MethodNode> {
    let class = unit.class(class_id);
    let resolver = TypeResolver::new(unit, classpath);
    let mut bridges: Vec<MethodNode> = Vec::new();

    let mut ancestors = unit.ancestor_chain(class_id);
    for interface in &class.interfaces {
        if let Some(id) = unit.find_class(interface) {
            ancestors.push(id);
            ancestors.extend(unit.ancestor_chain(id));
        }
    }

    for ancestor_id in ancestors {
        let ancestor = unit.class(ancestor_id);
        for ancestor_method in &ancestor.methods {
            if ancestor_method.synthetic {
                continue;
            }
            let Some(override_method) = class
                .methods
                .iter()
                .find(|m| !m.synthetic && m.matches_erased(ancestor_method))
            else {
                continue;
            };
            if override_method.return_type == ancestor_method.return_type {
                // Plain override, no bridge needed
                continue;
            }

            if ancestor_method.is_static() != override_method.is_static() {
                collector.error(
                    Span::synthetic(),
                    format!(
                        "{}: cannot override {} of {}: static mismatch",
                        override_method.describe(),
                        ancestor_method.describe(),
                        ancestor.name
                    ),
                );
                continue;
            }
            if ancestor_method.is_final() {
                collector.error(
                    Span::synthetic(),
                    format!(
                        "{}: cannot override final {} of {}",
                        override_method.describe(),
                        ancestor_method.describe(),
                        ancestor.name
                    ),
                );
                continue;
            }
            let covariant = !override_method.return_type.is_primitive()
                && !override_method.return_type.is_void()
                && !ancestor_method.return_type.is_primitive()
                && !ancestor_method.return_type.is_void()
                && resolver.is_assignable(
                    &override_method.return_type.name,
                    &ancestor_method.return_type.name,
                );
            if !covariant {
                collector.error(
                    Span::synthetic(),
                    format!(
                        "{}: return type is not assignable to inherited {} of {}",
                        override_method.describe(),
                        ancestor_method.describe(),
                        ancestor.name
                    ),
                );
                continue;
            }

            let already_bridged = class
                .methods
                .iter()
                .chain(bridges.iter())
                .any(|m| m.same_signature(ancestor_method));
            if already_bridged {
                continue;
            }

            let params: Vec<Parameter> = ancestor_method
                .params
                .iter()
                .map(|p| Parameter::new(p.name.clone(), p.ty.clone()))
                .collect();
            let args: Vec<Expression> = params
                .iter()
                .map(|p| Expression::Var(p.name.clone()))
                .collect();
            let call = Expression::MethodCall {
                receiver: Expression::This.boxed(),
                name: override_method.name.clone(),
                args,
                is_super: false,
            };
            bridges.push(
                MethodNode::new(
                    ancestor_method.name.clone(),
                    ancestor_method.return_type.clone(),
                )
                .with_modifiers(override_method.modifiers | tarn_ast::modifiers::SYNTHETIC)
                .with_params(params)
                .with_body(Statement::block(vec![Statement::ret(Some(call))]))
                .synthetic(),
            );
        }
    }

    bridges
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classpath::BootClasspath;
    use tarn_ast::{modifiers, ClassNode, TypeRef};

    fn method(name: &str, ret: TypeRef) -> MethodNode {
        MethodNode::new(name, ret).with_body(Statement::block(vec![Statement::ret(Some(
            Expression::NullLit,
        ))]))
    }

    #[test]
    fn test_covariant_override_gets_bridge() {
        let mut unit = CompileUnit::new();
        let mut base = ClassNode::new("demo.Base");
        base.add_method(method("copy", TypeRef::object())).unwrap();
        unit.add_class(base);

        let mut derived = ClassNode::new("demo.Derived").with_super("demo.Base");
        derived
            .add_method(method("copy", TypeRef::new("demo.Derived")))
            .unwrap();
        let derived_id = unit.add_class(derived);

        let cp = BootClasspath::new();
        let mut collector = ErrorCollector::new();
        let bridges = compute(&unit, derived_id, &cp, &mut collector);

        assert!(!collector.has_errors());
        assert_eq!(bridges.len(), 1);
        assert_eq!(bridges[0].name, "copy");
        assert_eq!(bridges[0].return_type, TypeRef::object());
        assert!(bridges[0].synthetic);
    }

    #[test]
    fn test_incompatible_return_is_fatal() {
        let mut unit = CompileUnit::new();
        let mut base = ClassNode::new("demo.Base");
        base.add_method(method("value", TypeRef::new("demo.Unrelated")))
            .unwrap();
        unit.add_class(base);
        unit.add_class(ClassNode::new("demo.Unrelated"));

        let mut derived = ClassNode::new("demo.Derived").with_super("demo.Base");
        derived
            .add_method(method("value", TypeRef::new("demo.Derived")))
            .unwrap();
        let derived_id = unit.add_class(derived);

        let cp = BootClasspath::new();
        let mut collector = ErrorCollector::new();
        let bridges = compute(&unit, derived_id, &cp, &mut collector);

        assert!(collector.has_errors());
        assert!(bridges.is_empty());
    }

    #[test]
    fn test_covariant_override_of_final_is_fatal() {
        let mut unit = CompileUnit::new();
        let mut base = ClassNode::new("demo.Base");
        base.add_method(
            method("copy", TypeRef::object()).with_modifiers(modifiers::PUBLIC | modifiers::FINAL),
        )
        .unwrap();
        unit.add_class(base);

        let mut derived = ClassNode::new("demo.Derived").with_super("demo.Base");
        derived
            .add_method(method("copy", TypeRef::new("demo.Derived")))
            .unwrap();
        let derived_id = unit.add_class(derived);

        let cp = BootClasspath::new();
        let mut collector = ErrorCollector::new();
        let bridges = compute(&unit, derived_id, &cp, &mut collector);
        assert!(collector.has_errors());
        assert!(bridges.is_empty());
    }

    #[test]
    fn test_identical_return_needs_no_bridge() {
        let mut unit = CompileUnit::new();
        let mut base = ClassNode::new("demo.Base");
        base.add_method(method("run", TypeRef::object())).unwrap();
        unit.add_class(base);

        let mut derived = ClassNode::new("demo.Derived").with_super("demo.Base");
        derived.add_method(method("run", TypeRef::object())).unwrap();
        let derived_id = unit.add_class(derived);

        let cp = BootClasspath::new();
        let mut collector = ErrorCollector::new();
        let bridges = compute(&unit, derived_id, &cp, &mut collector);
        assert!(bridges.is_empty());
        assert!(!collector.has_errors());
    }
}
