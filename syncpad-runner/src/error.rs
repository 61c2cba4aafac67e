use std::any::Any;

use thiserror::Error;

use crate::javascript::lexer::line_col;

/// Failure while turning source text into a runnable artifact.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    /// Malformed source, positioned as `line:column` (column is 0-based)
    #[error("{message} ({line}:{column})")]
    Syntax {
        message: String,
        line: usize,
        column: usize,
    },

    /// Well-formed but rejected source (read-only binding, redeclaration, ...)
    #[error("{0}")]
    Invalid(String),

    #[error("Transform aborted: {0}")]
    Panicked(String),
}

impl TransformError {
    /// Build a syntax error at a byte offset into `source`.
    pub fn syntax(source: &str, offset: usize, message: impl Into<String>) -> Self {
        let (line, column) = line_col(source, offset);
        Self::Syntax {
            message: message.into(),
            line,
            column,
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid(message.into())
    }
}

/// Failure while running a transformed artifact.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExecutionError {
    /// Fault raised by the language runtime (`x is not defined`, ...)
    #[error("{0}")]
    Runtime(String),

    /// Value raised by user code with `throw`, already stringified
    #[error("{0}")]
    Thrown(String),

    #[error("Execution step limit of {0} exceeded")]
    StepLimit(u64),

    #[error("Execution timed out after {0}ms")]
    Timeout(u128),

    #[error("Maximum call stack size exceeded")]
    StackOverflow,

    #[error("Out of memory: heap limit of {0} slots exceeded")]
    HeapLimit(usize),

    #[error("Invalid artifact: {0}")]
    InvalidArtifact(String),

    #[error("Execution aborted: {0}")]
    Panicked(String),
}

impl ExecutionError {
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime(message.into())
    }
}

/// Best-effort text of a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_syntax_error_position() {
        let err = TransformError::syntax("1 +", 3, "Unexpected token");
        assert_eq!(err.to_string(), "Unexpected token (1:3)");
    }

    #[test]
    fn test_syntax_error_multiline() {
        let err = TransformError::syntax("let a = 1;\nlet b = ;", 19, "Unexpected token");
        assert_eq!(err.to_string(), "Unexpected token (2:8)");
    }

    #[test]
    fn test_execution_error_messages() {
        assert_eq!(
            ExecutionError::runtime("x is not defined").to_string(),
            "x is not defined"
        );
        assert_eq!(
            ExecutionError::StepLimit(10).to_string(),
            "Execution step limit of 10 exceeded"
        );
        assert_eq!(
            ExecutionError::Timeout(250).to_string(),
            "Execution timed out after 250ms"
        );
        assert_eq!(
            ExecutionError::StackOverflow.to_string(),
            "Maximum call stack size exceeded"
        );
        assert_eq!(
            ExecutionError::HeapLimit(64).to_string(),
            "Out of memory: heap limit of 64 slots exceeded"
        );
    }

    #[test]
    fn test_panic_message() {
        let payload = std::panic::catch_unwind(|| panic!("boom {}", 1)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "boom 1");
    }
}
