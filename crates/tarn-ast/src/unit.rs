//! Compile-unit arena
//!
//! One `CompileUnit` owns every module and class node of a compilation.
//! Cross-class references go through name lookup on the arena, which
//! tolerates forward references and keeps the graph acyclic in memory.

use rustc_hash::FxHashMap;

use crate::class::ClassNode;
use crate::stmt::Statement;

/// Arena id of a class node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClassId(pub u32);

impl ClassId {
    pub fn new(id: u32) -> Self {
        ClassId(id)
    }

    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

/// One source unit's declarations: classes, script body, import aliases
#[derive(Debug, Clone, Default)]
pub struct ModuleNode {
    /// Package declared by the source unit ("" for the default package)
    pub package: String,
    /// Source-unit name (file name or synthetic label)
    pub unit_name: String,
    /// Classes declared in this module, by arena id
    pub classes: Vec<ClassId>,
    /// Top-level statements (the script body)
    pub script_body: Vec<Statement>,
    /// Import aliases: local alias to fully qualified name
    pub imports: FxHashMap<String, String>,
}

impl ModuleNode {
    pub fn new(package: impl Into<String>, unit_name: impl Into<String>) -> Self {
        ModuleNode {
            package: package.into(),
            unit_name: unit_name.into(),
            ..Default::default()
        }
    }

    pub fn add_import(&mut self, alias: impl Into<String>, target: impl Into<String>) {
        self.imports.insert(alias.into(), target.into());
    }

    /// Resolve a possibly aliased name to a fully qualified one
    pub fn qualify(&self, name: &str) -> String {
        if let Some(target) = self.imports.get(name) {
            return target.clone();
        }
        if name.contains('.') || self.package.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.package, name)
        }
    }
}

/// The root arena owning all modules and classes for one compilation
#[derive(Debug, Default)]
pub struct CompileUnit {
    classes: Vec<ClassNode>,
    by_name: FxHashMap<String, ClassId>,
    pub modules: Vec<ModuleNode>,
}

impl CompileUnit {
    pub fn new() -> Self {
        CompileUnit::default()
    }

    pub fn add_module(&mut self, module: ModuleNode) -> usize {
        self.modules.push(module);
        self.modules.len() - 1
    }

    /// Append a class to the arena and index it by qualified name.
    /// The arena is append-only; classes are never removed.
    pub fn add_class(&mut self, class: ClassNode) -> ClassId {
        let id = ClassId::new(self.classes.len() as u32);
        self.by_name.insert(class.name.clone(), id);
        self.classes.push(class);
        id
    }

    /// Append a class and record it in its owning module
    pub fn add_class_to_module(&mut self, mut class: ClassNode, module: usize) -> ClassId {
        class.module = Some(module);
        let id = self.add_class(class);
        self.modules[module].classes.push(id);
        id
    }

    pub fn class(&self, id: ClassId) -> &ClassNode {
        &self.classes[id.index()]
    }

    pub fn class_mut(&mut self, id: ClassId) -> &mut ClassNode {
        &mut self.classes[id.index()]
    }

    pub fn find_class(&self, name: &str) -> Option<ClassId> {
        self.by_name.get(name).copied()
    }

    pub fn class_count(&self) -> usize {
        self.classes.len()
    }

    pub fn class_ids(&self) -> impl Iterator<Item = ClassId> {
        (0..self.classes.len() as u32).map(ClassId::new)
    }

    pub fn classes(&self) -> impl Iterator<Item = &ClassNode> {
        self.classes.iter()
    }

    /// Superclass chain of a class, nearest ancestor first, restricted to
    /// classes inside this unit. Cycle-safe: resolution stops when an id
    /// repeats (the validator reports the cycle as a user error).
    pub fn ancestor_chain(&self, id: ClassId) -> Vec<ClassId> {
        let mut chain = Vec::new();
        let mut seen = rustc_hash::FxHashSet::default();
        seen.insert(id);
        let mut current = id;
        while let Some(super_id) = self.class(current).resolve_superclass(self) {
            if !seen.insert(super_id) {
                break;
            }
            chain.push(super_id);
            current = super_id;
        }
        chain
    }

    /// True if `class_id` is `ancestor_name` or derives from it within
    /// this unit
    pub fn derives_from(&self, class_id: ClassId, ancestor_name: &str) -> bool {
        if self.class(class_id).name == ancestor_name {
            return true;
        }
        self.ancestor_chain(class_id)
            .iter()
            .any(|&id| self.class(id).name == ancestor_name)
    }

    /// True if the class or any in-unit ancestor lists the interface
    pub fn implements_interface(&self, class_id: ClassId, interface: &str) -> bool {
        if self.class(class_id).implements_directly(interface) {
            return true;
        }
        self.ancestor_chain(class_id)
            .iter()
            .any(|&id| self.class(id).implements_directly(interface))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_name_lookup() {
        let mut unit = CompileUnit::new();
        let id = unit.add_class(ClassNode::new("demo.A"));
        assert_eq!(unit.find_class("demo.A"), Some(id));
        assert_eq!(unit.find_class("demo.B"), None);
    }

    #[test]
    fn test_ancestor_chain() {
        let mut unit = CompileUnit::new();
        let a = unit.add_class(ClassNode::new("A"));
        let b = unit.add_class(ClassNode::new("B").with_super("A"));
        let c = unit.add_class(ClassNode::new("C").with_super("B"));
        assert_eq!(unit.ancestor_chain(c), vec![b, a]);
        assert!(unit.derives_from(c, "A"));
        assert!(!unit.derives_from(a, "C"));
    }

    #[test]
    fn test_cyclic_supers_terminate() {
        let mut unit = CompileUnit::new();
        let _a = unit.add_class(ClassNode::new("A").with_super("B"));
        let b = unit.add_class(ClassNode::new("B").with_super("A"));
        // Must not loop forever
        let chain = unit.ancestor_chain(b);
        assert_eq!(chain.len(), 1);
    }

    #[test]
    fn test_module_qualify() {
        let mut module = ModuleNode::new("demo", "point.tn");
        module.add_import("P", "demo.geo.Point");
        assert_eq!(module.qualify("P"), "demo.geo.Point");
        assert_eq!(module.qualify("Line"), "demo.Line");
        assert_eq!(module.qualify("other.Thing"), "other.Thing");
    }
}
