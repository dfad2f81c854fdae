//! Name-based type references
//!
//! Types are referenced by qualified name and resolved on demand through
//! the compile unit or classpath; the AST never holds a direct link to
//! another class.

/// Root object class of the Tarn object model
pub const OBJECT_CLASS: &str = "tarn.lang.Object";
/// Root of all throwable types
pub const THROWABLE_CLASS: &str = "tarn.lang.Throwable";
/// Marker interface of the dynamic-object protocol
pub const DYNAMIC_OBJECT_INTERFACE: &str = "tarn.lang.DynamicObject";
/// Runtime dispatch helper that trampoline methods delegate to
pub const DISPATCH_HELPER_CLASS: &str = "tarn.runtime.Dispatch";
/// Metadata handle type returned by `getMetaHandle`
pub const META_HANDLE_CLASS: &str = "tarn.runtime.MetaHandle";
/// Shared mutable reference cell used for closure capture
pub const CELL_CLASS: &str = "tarn.runtime.Cell";
/// Runtime class value type (class literals)
pub const CLASS_CLASS: &str = "tarn.lang.Class";

/// A reference to a type by name
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TypeRef {
    pub name: String,
}

impl TypeRef {
    pub fn new(name: impl Into<String>) -> Self {
        TypeRef { name: name.into() }
    }

    pub fn object() -> Self {
        TypeRef::new(OBJECT_CLASS)
    }

    pub fn void() -> Self {
        TypeRef::new("void")
    }

    pub fn int() -> Self {
        TypeRef::new("int")
    }

    pub fn float() -> Self {
        TypeRef::new("float")
    }

    pub fn boolean() -> Self {
        TypeRef::new("boolean")
    }

    pub fn string() -> Self {
        TypeRef::new("tarn.lang.String")
    }

    pub fn class_type() -> Self {
        TypeRef::new(CLASS_CLASS)
    }

    pub fn cell() -> Self {
        TypeRef::new(CELL_CLASS)
    }

    pub fn is_void(&self) -> bool {
        self.name == "void"
    }

    pub fn is_boolean(&self) -> bool {
        self.name == "boolean"
    }

    pub fn is_int(&self) -> bool {
        self.name == "int"
    }

    pub fn is_float(&self) -> bool {
        self.name == "float"
    }

    pub fn is_primitive(&self) -> bool {
        matches!(self.name.as_str(), "int" | "float" | "boolean")
    }

    pub fn is_object_class(&self) -> bool {
        self.name == OBJECT_CLASS
    }

    pub fn is_cell(&self) -> bool {
        self.name == CELL_CLASS
    }
}

impl std::fmt::Display for TypeRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.name)
    }
}
