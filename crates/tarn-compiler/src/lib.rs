//! Tarn compiler backend
//!
//! Takes a [`tarn_ast::CompileUnit`] produced by the front end and turns
//! every class in it into a binary class definition:
//!
//! 1. **Completion** fills in what the language promises implicitly
//!    (default constructors, dynamic-dispatch protocol, property
//!    accessors, field initializers, covariant bridges).
//! 2. **Validation** checks structural rules without mutating anything.
//! 3. **Generation** lowers each class to stack-machine bytecode,
//!    spawning synthetic inner classes for closures along the way.
//! 4. The **driver** sequences the phases across source units and the
//!    **output** layer writes `.tclass` files mirroring the package tree.

pub mod classpath;
pub mod codegen;
pub mod completion;
pub mod diagnostics;
pub mod driver;
pub mod error;
pub mod output;
pub mod validate;

pub use classpath::{BootClasspath, ClassPath, ExternalClass, TypeResolver};
pub use codegen::{ClassGenerator, GeneratedClass};
pub use completion::CompletionVisitor;
pub use diagnostics::{Diagnostic, ErrorCollector, Severity};
pub use driver::{CompilationDriver, ParsedUnit, Phase, SourceProvider, SourceUnit};
pub use error::{CompileError, Result};
pub use output::{ClassFileWriter, GeneratedUnitCallback};
pub use validate::StructuralValidator;
