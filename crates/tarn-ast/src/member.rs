//! Member nodes: methods, constructors, fields, properties

use crate::class::modifiers;
use crate::expr::Expression;
use crate::stmt::{Statement, StmtKind};
use crate::types::TypeRef;

/// A method or constructor parameter
#[derive(Debug, Clone)]
pub struct Parameter {
    pub name: String,
    pub ty: TypeRef,
    /// Default-value expression; input to the default-argument overload
    /// expansion in the completion pass
    pub default_value: Option<Expression>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        Parameter {
            name: name.into(),
            ty,
            default_value: None,
        }
    }

    pub fn with_default(mut self, value: Expression) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn has_default(&self) -> bool {
        self.default_value.is_some()
    }
}

/// A declared or synthesized method
#[derive(Debug, Clone)]
pub struct MethodNode {
    pub name: String,
    pub modifiers: u32,
    pub return_type: TypeRef,
    pub params: Vec<Parameter>,
    /// None for abstract/interface methods
    pub body: Option<Statement>,
    pub synthetic: bool,
}

impl MethodNode {
    pub fn new(name: impl Into<String>, return_type: TypeRef) -> Self {
        MethodNode {
            name: name.into(),
            modifiers: modifiers::PUBLIC,
            return_type,
            params: Vec::new(),
            body: None,
            synthetic: false,
        }
    }

    pub fn with_modifiers(mut self, m: u32) -> Self {
        self.modifiers = m;
        self
    }

    pub fn with_params(mut self, params: Vec<Parameter>) -> Self {
        self.params = params;
        self
    }

    pub fn with_body(mut self, body: Statement) -> Self {
        self.body = Some(body);
        self
    }

    pub fn synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn is_static(&self) -> bool {
        self.modifiers & modifiers::STATIC != 0
    }

    pub fn is_final(&self) -> bool {
        self.modifiers & modifiers::FINAL != 0
    }

    pub fn is_abstract(&self) -> bool {
        self.modifiers & modifiers::ABSTRACT != 0
    }

    pub fn is_public(&self) -> bool {
        self.modifiers & modifiers::PUBLIC != 0
    }

    pub fn is_void(&self) -> bool {
        self.return_type.is_void()
    }

    pub fn param_type_names(&self) -> Vec<&str> {
        self.params.iter().map(|p| p.ty.name.as_str()).collect()
    }

    /// Same name and exact parameter types (return type ignored)
    pub fn matches_erased(&self, other: &MethodNode) -> bool {
        self.name == other.name && self.param_type_names() == other.param_type_names()
    }

    /// Same name, parameter types and return type
    pub fn same_signature(&self, other: &MethodNode) -> bool {
        self.matches_erased(other) && self.return_type == other.return_type
    }

    /// Human-readable signature for diagnostics
    pub fn describe(&self) -> String {
        let params = self
            .param_type_names()
            .join(", ");
        format!("{} {}({})", self.return_type, self.name, params)
    }
}

/// Delegation target of a constructor's first statement
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DelegationKind {
    This,
    Super,
}

/// A declared or synthesized constructor
#[derive(Debug, Clone)]
pub struct ConstructorNode {
    pub modifiers: u32,
    pub params: Vec<Parameter>,
    pub body: Statement,
    pub synthetic: bool,
}

impl ConstructorNode {
    pub fn new(params: Vec<Parameter>, body: Statement) -> Self {
        ConstructorNode {
            modifiers: modifiers::PUBLIC,
            params,
            body,
            synthetic: false,
        }
    }

    pub fn synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }

    pub fn arity(&self) -> usize {
        self.params.len()
    }

    /// Inspect the first body statement for explicit delegation
    pub fn delegation(&self) -> Option<DelegationKind> {
        let first = match &self.body.kind {
            StmtKind::Block(stmts) => stmts.first()?,
            _ => return None,
        };
        match first.kind {
            StmtKind::ThisCtorCall(_) => Some(DelegationKind::This),
            StmtKind::SuperCtorCall(_) => Some(DelegationKind::Super),
            _ => None,
        }
    }

    pub fn describe(&self) -> String {
        let params: Vec<&str> = self.params.iter().map(|p| p.ty.name.as_str()).collect();
        format!("<init>({})", params.join(", "))
    }
}

/// A declared or synthesized field
#[derive(Debug, Clone)]
pub struct FieldNode {
    pub name: String,
    pub modifiers: u32,
    pub ty: TypeRef,
    pub initializer: Option<Expression>,
    pub synthetic: bool,
}

impl FieldNode {
    pub fn new(name: impl Into<String>, ty: TypeRef) -> Self {
        FieldNode {
            name: name.into(),
            modifiers: modifiers::PRIVATE,
            ty,
            initializer: None,
            synthetic: false,
        }
    }

    pub fn with_modifiers(mut self, m: u32) -> Self {
        self.modifiers = m;
        self
    }

    pub fn with_initializer(mut self, init: Expression) -> Self {
        self.initializer = Some(init);
        self
    }

    pub fn synthetic(mut self) -> Self {
        self.synthetic = true;
        self
    }

    pub fn is_static(&self) -> bool {
        self.modifiers & modifiers::STATIC != 0
    }

    pub fn is_final(&self) -> bool {
        self.modifiers & modifiers::FINAL != 0
    }

    pub fn is_public(&self) -> bool {
        self.modifiers & modifiers::PUBLIC != 0
    }
}

/// A property: a backing field plus optional explicit accessor bodies.
/// Accessors left as None are synthesized by the completion pass.
#[derive(Debug, Clone)]
pub struct PropertyNode {
    pub field: FieldNode,
    pub getter_body: Option<Statement>,
    pub setter_body: Option<Statement>,
}

impl PropertyNode {
    pub fn new(field: FieldNode) -> Self {
        PropertyNode {
            field,
            getter_body: None,
            setter_body: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.field.name
    }

    /// Capitalized property name for accessor naming
    pub fn capitalized(&self) -> String {
        let mut chars = self.field.name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        }
    }
}

/// An annotation applied to a class
#[derive(Debug, Clone)]
pub struct AnnotationNode {
    pub name: String,
    /// Runtime-visible annotations force the newer output-format version
    pub runtime_visible: bool,
}
