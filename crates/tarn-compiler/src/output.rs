//! Class-file output
//!
//! Generated classes land under a target root mirroring the package
//! tree, one `.tclass` file per class. Callers that want the binary
//! definitions without touching disk register a
//! [`GeneratedUnitCallback`] with the driver instead.

use std::fs;
use std::path::PathBuf;

use tarn_ast::ClassNode;
use tarn_bytecode::ClassFile;

use crate::error::Result;

pub const CLASS_FILE_EXTENSION: &str = "tclass";

/// Observer invoked once per generated class definition
pub trait GeneratedUnitCallback {
    fn generated(&mut self, class: &ClassNode, file: &ClassFile);
}

/// Writes binary class definitions under a target root
pub struct ClassFileWriter {
    root: PathBuf,
}

impl ClassFileWriter {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        ClassFileWriter { root: root.into() }
    }

    /// Where a class lands: `<root>/<package path>/<Simple>.tclass`
    pub fn path_for(&self, class: &ClassNode) -> PathBuf {
        let mut path = self.root.clone();
        for part in class.package_name().split('.').filter(|p| !p.is_empty()) {
            path.push(part);
        }
        path.push(format!("{}.{CLASS_FILE_EXTENSION}", class.simple_name()));
        path
    }

    pub fn write(&self, class: &ClassNode, file: &ClassFile) -> Result<PathBuf> {
        let path = self.path_for(class);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, file.encode())?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_path_mirrors_package_tree() {
        let writer = ClassFileWriter::new("/out");
        let class = ClassNode::new("demo.util.Helper");
        assert_eq!(
            writer.path_for(&class),
            PathBuf::from("/out/demo/util/Helper.tclass")
        );
    }

    #[test]
    fn test_default_package_lands_at_root() {
        let writer = ClassFileWriter::new("/out");
        let class = ClassNode::new("Loose");
        assert_eq!(writer.path_for(&class), PathBuf::from("/out/Loose.tclass"));
    }

    #[test]
    fn test_written_file_decodes() {
        let dir = tempfile::tempdir().unwrap();
        let writer = ClassFileWriter::new(dir.path());
        let class = ClassNode::new("demo.A");
        let file = ClassFile::new("demo.A");
        let path = writer.write(&class, &file).unwrap();
        assert!(path.ends_with("demo/A.tclass"));
        let bytes = fs::read(&path).unwrap();
        let decoded = ClassFile::decode(&bytes).unwrap();
        assert_eq!(decoded.name, "demo.A");
    }
}
