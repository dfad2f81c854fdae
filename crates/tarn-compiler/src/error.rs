//! Compiler error taxonomy
//!
//! User errors are defects in the compiled program and surface as
//! diagnostics; internal errors are defects in an earlier phase and are
//! never down-ranked to user errors.

use thiserror::Error;

/// Errors produced by the compiler backend
#[derive(Debug, Error)]
pub enum CompileError {
    /// A defect in the compiled program
    #[error("{0}")]
    User(String),

    /// A referenced class exists neither in the compile unit nor on the
    /// classpath
    #[error("unknown class '{name}' referenced by '{referenced_by}'")]
    MissingClass { name: String, referenced_by: String },

    /// A defect in the compiler itself or in an earlier phase's output
    #[error("internal error: {0}")]
    Internal(String),

    /// Compilation finished with accumulated diagnostics
    #[error("compilation failed with {errors} error(s)")]
    Failed { errors: usize },

    #[error(transparent)]
    Ast(#[from] tarn_ast::AstError),

    #[error(transparent)]
    Verify(#[from] tarn_bytecode::VerifyError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CompileError {
    pub fn user(message: impl Into<String>) -> Self {
        CompileError::User(message.into())
    }

    pub fn internal(message: impl Into<String>) -> Self {
        CompileError::Internal(message.into())
    }

    /// True for errors that indicate a compiler defect rather than a
    /// defect in the compiled program
    pub fn is_internal(&self) -> bool {
        matches!(
            self,
            CompileError::Internal(_) | CompileError::Verify(_) | CompileError::Ast(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CompileError>;
