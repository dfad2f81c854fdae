//! ClassNode: a declared class or interface

use std::cell::Cell;

use rustc_hash::FxHashMap;

use crate::member::{AnnotationNode, ConstructorNode, FieldNode, MethodNode, PropertyNode};
use crate::types::OBJECT_CLASS;
use crate::unit::{ClassId, CompileUnit};
use crate::AstError;

/// Member modifier bits
pub mod modifiers {
    pub const PUBLIC: u32 = 0x0001;
    pub const PRIVATE: u32 = 0x0002;
    pub const PROTECTED: u32 = 0x0004;
    pub const STATIC: u32 = 0x0008;
    pub const FINAL: u32 = 0x0010;
    pub const VOLATILE: u32 = 0x0040;
    pub const TRANSIENT: u32 = 0x0080;
    pub const INTERFACE: u32 = 0x0200;
    pub const ABSTRACT: u32 = 0x0400;
    pub const SYNTHETIC: u32 = 0x1000;
}

/// A declared class or interface.
///
/// Created during AST construction, mutated by the completion pass (which
/// adds synthetic members) and by the generator (which adds per-closure
/// inner classes, trampolines and literal-cache fields), then frozen once
/// its binary form has been emitted.
#[derive(Debug, Clone)]
pub struct ClassNode {
    /// Fully qualified name
    pub name: String,
    pub modifiers: u32,
    /// Superclass by name; None means the root object class
    pub super_name: Option<String>,
    /// Cached superclass resolution (lazily filled)
    resolved_super: Cell<Option<ClassId>>,
    pub interfaces: Vec<String>,
    pub fields: Vec<FieldNode>,
    field_index: FxHashMap<String, usize>,
    pub methods: Vec<MethodNode>,
    pub constructors: Vec<ConstructorNode>,
    pub properties: Vec<PropertyNode>,
    /// Index of the owning module in the compile unit
    pub module: Option<usize>,
    pub is_script: bool,
    pub is_static_nested: bool,
    pub generic_signature: Option<String>,
    pub annotations: Vec<AnnotationNode>,
    /// Synthetic inner classes spawned for this class, by arena id
    pub inner_classes: Vec<ClassId>,
    frozen: bool,
}

impl ClassNode {
    pub fn new(name: impl Into<String>) -> Self {
        ClassNode {
            name: name.into(),
            modifiers: modifiers::PUBLIC,
            super_name: None,
            resolved_super: Cell::new(None),
            interfaces: Vec::new(),
            fields: Vec::new(),
            field_index: FxHashMap::default(),
            methods: Vec::new(),
            constructors: Vec::new(),
            properties: Vec::new(),
            module: None,
            is_script: false,
            is_static_nested: false,
            generic_signature: None,
            annotations: Vec::new(),
            inner_classes: Vec::new(),
            frozen: false,
        }
    }

    pub fn with_modifiers(mut self, m: u32) -> Self {
        self.modifiers = m;
        self
    }

    pub fn with_super(mut self, super_name: impl Into<String>) -> Self {
        self.super_name = Some(super_name.into());
        self
    }

    pub fn is_interface(&self) -> bool {
        self.modifiers & modifiers::INTERFACE != 0
    }

    pub fn is_abstract(&self) -> bool {
        self.modifiers & modifiers::ABSTRACT != 0
    }

    pub fn is_final(&self) -> bool {
        self.modifiers & modifiers::FINAL != 0
    }

    pub fn is_synthetic(&self) -> bool {
        self.modifiers & modifiers::SYNTHETIC != 0
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    /// Mark the class immutable; called after its binary form is emitted
    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    /// Package portion of the qualified name ("" for the default package)
    pub fn package_name(&self) -> &str {
        match self.name.rfind('.') {
            Some(idx) => &self.name[..idx],
            None => "",
        }
    }

    /// Unqualified class name
    pub fn simple_name(&self) -> &str {
        match self.name.rfind('.') {
            Some(idx) => &self.name[idx + 1..],
            None => &self.name,
        }
    }

    /// Effective superclass name (the root object class when unset)
    pub fn super_class_name(&self) -> &str {
        self.super_name.as_deref().unwrap_or(OBJECT_CLASS)
    }

    /// Add a field, enforcing name uniqueness via the field index
    pub fn add_field(&mut self, field: FieldNode) -> Result<(), AstError> {
        if self.frozen {
            return Err(AstError::Frozen(self.name.clone()));
        }
        if self.field_index.contains_key(&field.name) {
            return Err(AstError::DuplicateField {
                class: self.name.clone(),
                field: field.name,
            });
        }
        self.field_index.insert(field.name.clone(), self.fields.len());
        self.fields.push(field);
        Ok(())
    }

    /// Add a field without uniqueness enforcement. Used when loading a
    /// parsed model verbatim so the validator can report the duplicate.
    pub fn push_field_unchecked(&mut self, field: FieldNode) {
        self.field_index
            .entry(field.name.clone())
            .or_insert(self.fields.len());
        self.fields.push(field);
    }

    pub fn get_field(&self, name: &str) -> Option<&FieldNode> {
        self.field_index.get(name).map(|&i| &self.fields[i])
    }

    pub fn add_method(&mut self, method: MethodNode) -> Result<(), AstError> {
        if self.frozen {
            return Err(AstError::Frozen(self.name.clone()));
        }
        self.methods.push(method);
        Ok(())
    }

    pub fn add_constructor(&mut self, ctor: ConstructorNode) -> Result<(), AstError> {
        if self.frozen {
            return Err(AstError::Frozen(self.name.clone()));
        }
        self.constructors.push(ctor);
        Ok(())
    }

    pub fn add_property(&mut self, property: PropertyNode) -> Result<(), AstError> {
        if self.frozen {
            return Err(AstError::Frozen(self.name.clone()));
        }
        self.properties.push(property);
        Ok(())
    }

    pub fn get_methods(&self, name: &str) -> Vec<&MethodNode> {
        self.methods.iter().filter(|m| m.name == name).collect()
    }

    /// True if a method with this name and arity is declared here
    pub fn declares_method(&self, name: &str, arity: usize) -> bool {
        self.methods
            .iter()
            .any(|m| m.name == name && m.arity() == arity)
    }

    pub fn has_method_with_signature(&self, other: &MethodNode) -> bool {
        self.methods.iter().any(|m| m.matches_erased(other))
    }

    pub fn declares_constructor(&self, arity: usize) -> bool {
        self.constructors.iter().any(|c| c.arity() == arity)
    }

    /// Resolve the superclass through the compile unit, caching the result.
    ///
    /// Returns Ok(None) when the superclass lives outside the unit (e.g.
    /// the root object class on the boot classpath). A name that resolves
    /// nowhere is a missing-class condition handled by the caller through
    /// the classpath abstraction.
    pub fn resolve_superclass(&self, unit: &CompileUnit) -> Option<ClassId> {
        if let Some(cached) = self.resolved_super.get() {
            return Some(cached);
        }
        let name = self.super_name.as_deref()?;
        let id = unit.find_class(name)?;
        self.resolved_super.set(Some(id));
        Some(id)
    }

    pub fn implements_directly(&self, interface: &str) -> bool {
        self.interfaces.iter().any(|i| i == interface)
    }
}
