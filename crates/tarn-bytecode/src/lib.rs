//! Tarn bytecode - binary class definitions and encoding
//!
//! Defines the instruction set of the Tarn stack machine, the binary
//! class-file format the compiler emits, and a verifier enforcing the
//! output contract (terminated control paths, valid jump targets,
//! exception-table coverage).

pub mod classfile;
pub mod encoder;
pub mod opcode;
pub mod verify;

pub use classfile::{
    access, ClassFile, ClassFileError, ConstantPool, ExceptionEntry, FieldDef, MethodDef, MAGIC,
    VERSION_LEGACY, VERSION_META,
};
pub use encoder::{BytecodeReader, BytecodeWriter, DecodeError};
pub use opcode::Opcode;
pub use verify::{verify_class, VerifyError};
