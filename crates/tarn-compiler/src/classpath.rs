//! Classpath lookup for classes outside the compile unit
//!
//! The compile unit holds the classes being compiled; everything else a
//! program references (the boot library, previously compiled code) is
//! answered through the [`ClassPath`] trait. [`TypeResolver`] layers the
//! two so the validator and generator ask one place.

use rustc_hash::FxHashMap;
use tarn_ast::{
    CompileUnit, CELL_CLASS, CLASS_CLASS, DISPATCH_HELPER_CLASS, DYNAMIC_OBJECT_INTERFACE,
    META_HANDLE_CLASS, OBJECT_CLASS, THROWABLE_CLASS,
};

/// Shape of a class known only by name
#[derive(Debug, Clone)]
pub struct ExternalClass {
    pub name: String,
    pub super_name: Option<String>,
    pub is_interface: bool,
    pub is_final: bool,
    pub is_abstract: bool,
}

impl ExternalClass {
    fn class(name: &str, super_name: Option<&str>) -> Self {
        ExternalClass {
            name: name.to_string(),
            super_name: super_name.map(str::to_string),
            is_interface: false,
            is_final: false,
            is_abstract: false,
        }
    }

    fn interface(name: &str) -> Self {
        ExternalClass {
            name: name.to_string(),
            super_name: None,
            is_interface: true,
            is_final: false,
            is_abstract: true,
        }
    }

    fn final_class(name: &str, super_name: Option<&str>) -> Self {
        ExternalClass {
            is_final: true,
            ..Self::class(name, super_name)
        }
    }
}

/// Lookup of classes outside the compile unit
pub trait ClassPath {
    fn lookup(&self, name: &str) -> Option<&ExternalClass>;

    fn contains(&self, name: &str) -> bool {
        self.lookup(name).is_some()
    }
}

/// The boot classpath: the runtime library types every program can see
#[derive(Debug)]
pub struct BootClasspath {
    classes: FxHashMap<String, ExternalClass>,
}

impl BootClasspath {
    pub fn new() -> Self {
        let mut cp = BootClasspath {
            classes: FxHashMap::default(),
        };
        cp.add(ExternalClass::class(OBJECT_CLASS, None));
        cp.add(ExternalClass::class(THROWABLE_CLASS, Some(OBJECT_CLASS)));
        cp.add(ExternalClass::class(
            "tarn.lang.Exception",
            Some(THROWABLE_CLASS),
        ));
        cp.add(ExternalClass::class(
            "tarn.lang.Error",
            Some(THROWABLE_CLASS),
        ));
        cp.add(ExternalClass::final_class(
            "tarn.lang.String",
            Some(OBJECT_CLASS),
        ));
        cp.add(ExternalClass::final_class(CLASS_CLASS, Some(OBJECT_CLASS)));
        cp.add(ExternalClass::interface(DYNAMIC_OBJECT_INTERFACE));
        cp.add(ExternalClass::interface("tarn.lang.Iterable"));
        cp.add(ExternalClass::class("tarn.lang.List", Some(OBJECT_CLASS)));
        cp.add(ExternalClass::class("tarn.lang.Map", Some(OBJECT_CLASS)));
        cp.add(ExternalClass::final_class(
            DISPATCH_HELPER_CLASS,
            Some(OBJECT_CLASS),
        ));
        cp.add(ExternalClass::final_class(
            META_HANDLE_CLASS,
            Some(OBJECT_CLASS),
        ));
        cp.add(ExternalClass::final_class(CELL_CLASS, Some(OBJECT_CLASS)));
        cp
    }

    pub fn add(&mut self, class: ExternalClass) {
        self.classes.insert(class.name.clone(), class);
    }
}

impl Default for BootClasspath {
    fn default() -> Self {
        BootClasspath::new()
    }
}

impl ClassPath for BootClasspath {
    fn lookup(&self, name: &str) -> Option<&ExternalClass> {
        self.classes.get(name)
    }
}

/// Answers type questions across the unit and the classpath
pub struct TypeResolver<'a> {
    pub unit: &'a CompileUnit,
    pub classpath: &'a dyn ClassPath,
}

impl<'a> TypeResolver<'a> {
    pub fn new(unit: &'a CompileUnit, classpath: &'a dyn ClassPath) -> Self {
        TypeResolver { unit, classpath }
    }

    pub fn is_known(&self, name: &str) -> bool {
        self.unit.find_class(name).is_some() || self.classpath.contains(name)
    }

    pub fn is_interface(&self, name: &str) -> bool {
        if let Some(id) = self.unit.find_class(name) {
            return self.unit.class(id).is_interface();
        }
        self.classpath
            .lookup(name)
            .is_some_and(|c| c.is_interface)
    }

    pub fn is_final(&self, name: &str) -> bool {
        if let Some(id) = self.unit.find_class(name) {
            return self.unit.class(id).is_final();
        }
        self.classpath.lookup(name).is_some_and(|c| c.is_final)
    }

    pub fn is_abstract(&self, name: &str) -> bool {
        if let Some(id) = self.unit.find_class(name) {
            return self.unit.class(id).is_abstract();
        }
        self.classpath.lookup(name).is_some_and(|c| c.is_abstract)
    }

    /// True if `name` is `ancestor` or derives from it, chasing the
    /// superclass chain through the unit and onto the classpath
    pub fn derives_from(&self, name: &str, ancestor: &str) -> bool {
        let mut current = Some(name.to_string());
        let mut hops = 0;
        while let Some(class_name) = current {
            if class_name == ancestor {
                return true;
            }
            // Cycles are a validator-reported user error; bail out here
            hops += 1;
            if hops > 256 {
                return false;
            }
            current = self.super_name_of(&class_name);
        }
        false
    }

    /// Assignability between object types: everything is assignable to
    /// the root object class, otherwise the source must derive from the
    /// target
    pub fn is_assignable(&self, source: &str, target: &str) -> bool {
        target == OBJECT_CLASS || self.derives_from(source, target)
    }

    pub fn super_name_of(&self, name: &str) -> Option<String> {
        if let Some(id) = self.unit.find_class(name) {
            let class = self.unit.class(id);
            if class.name == OBJECT_CLASS {
                return None;
            }
            return Some(class.super_class_name().to_string());
        }
        self.classpath.lookup(name)?.super_name.clone()
    }

    /// Superclass hop distance from `name` down to `ancestor`
    pub fn hop_distance(&self, name: &str, ancestor: &str) -> Option<u32> {
        let mut current = name.to_string();
        let mut hops = 0;
        loop {
            if current == ancestor {
                return Some(hops);
            }
            current = self.super_name_of(&current)?;
            hops += 1;
            if hops > 256 {
                return None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tarn_ast::ClassNode;

    #[test]
    fn test_boot_classpath_contents() {
        let cp = BootClasspath::new();
        assert!(cp.contains(OBJECT_CLASS));
        assert!(cp.lookup(DYNAMIC_OBJECT_INTERFACE).unwrap().is_interface);
        assert!(cp.lookup("tarn.lang.String").unwrap().is_final);
        assert!(!cp.contains("demo.Missing"));
    }

    #[test]
    fn test_derives_from_crosses_into_classpath() {
        let mut unit = CompileUnit::new();
        unit.add_class(ClassNode::new("demo.MyError").with_super("tarn.lang.Exception"));
        let cp = BootClasspath::new();
        let resolver = TypeResolver::new(&unit, &cp);

        assert!(resolver.derives_from("demo.MyError", THROWABLE_CLASS));
        assert!(resolver.derives_from("demo.MyError", OBJECT_CLASS));
        assert!(!resolver.derives_from("demo.MyError", "tarn.lang.Error"));
    }

    #[test]
    fn test_hop_distance() {
        let mut unit = CompileUnit::new();
        unit.add_class(ClassNode::new("A"));
        unit.add_class(ClassNode::new("B").with_super("A"));
        unit.add_class(ClassNode::new("C").with_super("B"));
        let cp = BootClasspath::new();
        let resolver = TypeResolver::new(&unit, &cp);

        assert_eq!(resolver.hop_distance("C", "C"), Some(0));
        assert_eq!(resolver.hop_distance("C", "A"), Some(2));
        assert_eq!(resolver.hop_distance("C", OBJECT_CLASS), Some(3));
        assert_eq!(resolver.hop_distance("A", "C"), None);
    }
}
