//! Binary class-definition format
//!
//! One `ClassFile` per generated class, independently loadable. The
//! format version is chosen per class: the legacy baseline unless the
//! class carries parametric-generics metadata or runtime annotations.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::encoder::{BytecodeReader, BytecodeWriter, DecodeError};

/// Magic number of Tarn class files
pub const MAGIC: [u8; 4] = *b"TARN";

/// Legacy baseline format version
pub const VERSION_LEGACY: u16 = 1;

/// Format version carrying generics metadata and runtime annotations
pub const VERSION_META: u16 = 2;

/// Class and member access bits, mirroring the AST modifier bits
pub mod access {
    pub const PUBLIC: u32 = 0x0001;
    pub const PRIVATE: u32 = 0x0002;
    pub const PROTECTED: u32 = 0x0004;
    pub const STATIC: u32 = 0x0008;
    pub const FINAL: u32 = 0x0010;
    pub const INTERFACE: u32 = 0x0200;
    pub const ABSTRACT: u32 = 0x0400;
    pub const SYNTHETIC: u32 = 0x1000;
}

/// Encoding/decoding errors
#[derive(Debug, Error)]
pub enum ClassFileError {
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    #[error("invalid magic number: expected TARN, got {0:?}")]
    InvalidMagic([u8; 4]),

    #[error("unsupported class-file version: {0}")]
    UnsupportedVersion(u16),

    #[error("checksum mismatch: expected {expected:#010x}, got {actual:#010x}")]
    ChecksumMismatch { expected: u32, actual: u32 },
}

/// Deduplicated string constants referenced by code operands
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConstantPool {
    pub strings: Vec<String>,
    #[serde(skip)]
    index: HashMap<String, u16>,
}

impl ConstantPool {
    pub fn new() -> Self {
        ConstantPool::default()
    }

    /// Intern a string, returning its pool index
    pub fn add(&mut self, s: impl Into<String>) -> u16 {
        let s = s.into();
        if let Some(&idx) = self.index.get(&s) {
            return idx;
        }
        let idx = self.strings.len() as u16;
        self.index.insert(s.clone(), idx);
        self.strings.push(s);
        idx
    }

    pub fn get(&self, idx: u16) -> Option<&str> {
        self.strings.get(idx as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.strings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strings.is_empty()
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.strings.len() as u32);
        for s in &self.strings {
            writer.emit_string(s);
        }
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        let count = reader.read_u32()? as usize;
        let mut pool = ConstantPool::new();
        for _ in 0..count {
            let s = reader.read_string()?;
            pool.add(s);
        }
        Ok(pool)
    }
}

/// A field definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub type_name: String,
    pub access: u32,
}

impl FieldDef {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        writer.emit_string(&self.type_name);
        writer.emit_u32(self.access);
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        Ok(Self {
            name: reader.read_string()?,
            type_name: reader.read_string()?,
            access: reader.read_u32()?,
        })
    }
}

/// One exception-table entry: the covered code range and its handler.
/// `catch_type` None marks a catch-all handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionEntry {
    pub start: u32,
    pub end: u32,
    pub handler: u32,
    pub catch_type: Option<String>,
}

impl ExceptionEntry {
    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_u32(self.start);
        writer.emit_u32(self.end);
        writer.emit_u32(self.handler);
        match &self.catch_type {
            Some(name) => {
                writer.emit_u8(1);
                writer.emit_string(name);
            }
            None => writer.emit_u8(0),
        }
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        let start = reader.read_u32()?;
        let end = reader.read_u32()?;
        let handler = reader.read_u32()?;
        let catch_type = if reader.read_u8()? != 0 {
            Some(reader.read_string()?)
        } else {
            None
        };
        Ok(Self {
            start,
            end,
            handler,
            catch_type,
        })
    }
}

/// A method definition with its code and exception table
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MethodDef {
    pub name: String,
    /// Textual descriptor: "(T1,T2)Ret"
    pub descriptor: String,
    pub access: u32,
    /// Local-variable slot count; stack depth is computed by the external
    /// assembler component
    pub max_locals: u16,
    pub code: Vec<u8>,
    pub exceptions: Vec<ExceptionEntry>,
}

impl MethodDef {
    pub fn is_abstract(&self) -> bool {
        self.access & access::ABSTRACT != 0
    }

    fn encode(&self, writer: &mut BytecodeWriter) {
        writer.emit_string(&self.name);
        writer.emit_string(&self.descriptor);
        writer.emit_u32(self.access);
        writer.emit_u16(self.max_locals);
        writer.emit_u32(self.code.len() as u32);
        writer.emit_bytes(&self.code);
        writer.emit_u32(self.exceptions.len() as u32);
        for entry in &self.exceptions {
            entry.encode(writer);
        }
    }

    fn decode(reader: &mut BytecodeReader) -> Result<Self, DecodeError> {
        let name = reader.read_string()?;
        let descriptor = reader.read_string()?;
        let access = reader.read_u32()?;
        let max_locals = reader.read_u16()?;
        let code_len = reader.read_u32()? as usize;
        let code = reader.read_bytes(code_len)?;
        let exc_count = reader.read_u32()? as usize;
        let mut exceptions = Vec::with_capacity(exc_count);
        for _ in 0..exc_count {
            exceptions.push(ExceptionEntry::decode(reader)?);
        }
        Ok(Self {
            name,
            descriptor,
            access,
            max_locals,
            code,
            exceptions,
        })
    }
}

/// A complete binary class definition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassFile {
    pub version: u16,
    pub access: u32,
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
    pub pool: ConstantPool,
    pub fields: Vec<FieldDef>,
    pub methods: Vec<MethodDef>,
    pub generic_signature: Option<String>,
    /// Runtime-visible annotation names
    pub annotations: Vec<String>,
}

impl ClassFile {
    pub fn new(name: impl Into<String>) -> Self {
        ClassFile {
            version: VERSION_LEGACY,
            access: access::PUBLIC,
            name: name.into(),
            super_name: None,
            interfaces: Vec::new(),
            pool: ConstantPool::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            generic_signature: None,
            annotations: Vec::new(),
        }
    }

    /// Per-class format-version policy: legacy baseline unless the class
    /// uses generics metadata or declares runtime annotations
    pub fn select_version(&mut self) {
        self.version = if self.generic_signature.is_some() || !self.annotations.is_empty() {
            VERSION_META
        } else {
            VERSION_LEGACY
        };
    }

    pub fn get_method(&self, name: &str) -> Option<&MethodDef> {
        self.methods.iter().find(|m| m.name == name)
    }

    pub fn methods_named(&self, name: &str) -> Vec<&MethodDef> {
        self.methods.iter().filter(|m| m.name == name).collect()
    }

    /// Encode to the binary format:
    /// header (magic, version, access, checksum) then payload.
    /// The checksum is a CRC32 over the payload.
    pub fn encode(&self) -> Vec<u8> {
        let mut writer = BytecodeWriter::new();

        writer.emit_bytes(&MAGIC);
        writer.emit_u16(self.version);
        writer.emit_u32(self.access);
        let checksum_at = writer.offset();
        writer.emit_u32(0);
        let payload_start = writer.offset();

        writer.emit_string(&self.name);
        match &self.super_name {
            Some(s) => {
                writer.emit_u8(1);
                writer.emit_string(s);
            }
            None => writer.emit_u8(0),
        }
        writer.emit_u32(self.interfaces.len() as u32);
        for i in &self.interfaces {
            writer.emit_string(i);
        }

        self.pool.encode(&mut writer);

        writer.emit_u32(self.fields.len() as u32);
        for f in &self.fields {
            f.encode(&mut writer);
        }

        writer.emit_u32(self.methods.len() as u32);
        for m in &self.methods {
            m.encode(&mut writer);
        }

        match &self.generic_signature {
            Some(sig) => {
                writer.emit_u8(1);
                writer.emit_string(sig);
            }
            None => writer.emit_u8(0),
        }
        writer.emit_u32(self.annotations.len() as u32);
        for a in &self.annotations {
            writer.emit_string(a);
        }

        let checksum = crc32fast::hash(&writer.buffer()[payload_start..]);
        writer.patch_u32(checksum_at, checksum);
        writer.into_bytes()
    }

    /// Decode from the binary format, validating magic, version and checksum
    pub fn decode(data: &[u8]) -> Result<Self, ClassFileError> {
        let mut reader = BytecodeReader::new(data);

        let magic_bytes = reader.read_bytes(4)?;
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&magic_bytes);
        if magic != MAGIC {
            return Err(ClassFileError::InvalidMagic(magic));
        }

        let version = reader.read_u16()?;
        if version != VERSION_LEGACY && version != VERSION_META {
            return Err(ClassFileError::UnsupportedVersion(version));
        }

        let class_access = reader.read_u32()?;
        let stored_checksum = reader.read_u32()?;
        let payload_start = reader.offset();
        let actual = crc32fast::hash(&data[payload_start..]);
        if stored_checksum != actual {
            return Err(ClassFileError::ChecksumMismatch {
                expected: stored_checksum,
                actual,
            });
        }

        let name = reader.read_string()?;
        let super_name = if reader.read_u8()? != 0 {
            Some(reader.read_string()?)
        } else {
            None
        };

        let iface_count = reader.read_u32()? as usize;
        let mut interfaces = Vec::with_capacity(iface_count);
        for _ in 0..iface_count {
            interfaces.push(reader.read_string()?);
        }

        let pool = ConstantPool::decode(&mut reader)?;

        let field_count = reader.read_u32()? as usize;
        let mut fields = Vec::with_capacity(field_count);
        for _ in 0..field_count {
            fields.push(FieldDef::decode(&mut reader)?);
        }

        let method_count = reader.read_u32()? as usize;
        let mut methods = Vec::with_capacity(method_count);
        for _ in 0..method_count {
            methods.push(MethodDef::decode(&mut reader)?);
        }

        let generic_signature = if reader.read_u8()? != 0 {
            Some(reader.read_string()?)
        } else {
            None
        };
        let ann_count = reader.read_u32()? as usize;
        let mut annotations = Vec::with_capacity(ann_count);
        for _ in 0..ann_count {
            annotations.push(reader.read_string()?);
        }

        Ok(Self {
            version,
            access: class_access,
            name,
            super_name,
            interfaces,
            pool,
            fields,
            methods,
            generic_signature,
            annotations,
        })
    }

    /// JSON dump for debugging and tooling
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opcode::Opcode;

    fn sample_class() -> ClassFile {
        let mut class = ClassFile::new("demo.Point");
        class.super_name = Some("tarn.lang.Object".to_string());
        class.fields.push(FieldDef {
            name: "x".to_string(),
            type_name: "int".to_string(),
            access: access::PRIVATE,
        });

        let mut writer = BytecodeWriter::new();
        writer.emit(Opcode::ConstI64);
        writer.emit_i64(0);
        writer.emit(Opcode::ReturnValue);
        class.methods.push(MethodDef {
            name: "getX".to_string(),
            descriptor: "()int".to_string(),
            access: access::PUBLIC,
            max_locals: 1,
            code: writer.into_bytes(),
            exceptions: vec![],
        });
        class
    }

    #[test]
    fn test_encode_decode_roundtrip() {
        let class = sample_class();
        let bytes = class.encode();
        let decoded = ClassFile::decode(&bytes).unwrap();
        assert_eq!(decoded.name, "demo.Point");
        assert_eq!(decoded.super_name.as_deref(), Some("tarn.lang.Object"));
        assert_eq!(decoded.fields.len(), 1);
        assert_eq!(decoded.methods.len(), 1);
        assert_eq!(decoded.methods[0].name, "getX");
        assert_eq!(decoded.version, VERSION_LEGACY);
    }

    #[test]
    fn test_version_policy() {
        let mut class = sample_class();
        class.select_version();
        assert_eq!(class.version, VERSION_LEGACY);

        class.annotations.push("demo.Marker".to_string());
        class.select_version();
        assert_eq!(class.version, VERSION_META);

        class.annotations.clear();
        class.generic_signature = Some("<T>".to_string());
        class.select_version();
        assert_eq!(class.version, VERSION_META);
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let mut bytes = sample_class().encode();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        assert!(matches!(
            ClassFile::decode(&bytes),
            Err(ClassFileError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = sample_class().encode();
        bytes[0] = b'X';
        assert!(matches!(
            ClassFile::decode(&bytes),
            Err(ClassFileError::InvalidMagic(_))
        ));
    }

    #[test]
    fn test_exception_entry_roundtrip() {
        let mut class = sample_class();
        class.methods[0].exceptions.push(ExceptionEntry {
            start: 0,
            end: 9,
            handler: 9,
            catch_type: Some("tarn.lang.Exception".to_string()),
        });
        class.methods[0].exceptions.push(ExceptionEntry {
            start: 0,
            end: 9,
            handler: 12,
            catch_type: None,
        });
        let decoded = ClassFile::decode(&class.encode()).unwrap();
        assert_eq!(decoded.methods[0].exceptions.len(), 2);
        assert_eq!(decoded.methods[0].exceptions[1].catch_type, None);
    }

    #[test]
    fn test_pool_dedup() {
        let mut pool = ConstantPool::new();
        let a = pool.add("x");
        let b = pool.add("y");
        let c = pool.add("x");
        assert_eq!(a, c);
        assert_ne!(a, b);
        assert_eq!(pool.len(), 2);
    }
}
