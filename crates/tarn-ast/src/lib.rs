//! Tarn AST - the mutable class-node graph
//!
//! This crate defines the in-memory model the compiler backend operates on:
//! classes and their members, statements and expressions, and the
//! compile-unit arena that owns everything for one compilation.
//!
//! Classes reference each other by name through the arena, never by
//! pointer, so forward references are cheap and no cycle-aware collection
//! is needed.

pub mod class;
pub mod expr;
pub mod member;
pub mod span;
pub mod stmt;
pub mod types;
pub mod unit;

pub use class::{modifiers, ClassNode};
pub use expr::{BinaryOp, Expression, UnaryOp};
pub use member::{
    AnnotationNode, ConstructorNode, DelegationKind, FieldNode, MethodNode, Parameter,
    PropertyNode,
};
pub use span::Span;
pub use stmt::{CatchClause, Statement, StmtKind, SwitchCase};
pub use types::{
    TypeRef, CELL_CLASS, CLASS_CLASS, DISPATCH_HELPER_CLASS, DYNAMIC_OBJECT_INTERFACE,
    META_HANDLE_CLASS, OBJECT_CLASS, THROWABLE_CLASS,
};
pub use unit::{ClassId, CompileUnit, ModuleNode};

use thiserror::Error;

/// Errors raised by the AST model itself
#[derive(Debug, Error)]
pub enum AstError {
    /// A named class could not be resolved in the compile unit
    #[error("missing class: {name} (referenced by {referenced_by})")]
    MissingClass { name: String, referenced_by: String },

    /// A field with the same name is already declared
    #[error("duplicate field '{field}' in class {class}")]
    DuplicateField { class: String, field: String },

    /// Mutation attempted after the class was emitted
    #[error("class {0} is frozen; members cannot be added after generation")]
    Frozen(String),
}
