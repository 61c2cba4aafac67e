//! JavaScript backend.
//!
//! Transform: [`lexer`] → [`parser`] → [`lower`] (ES2015 → ES5) → [`emit`].
//! Execute: the emitted text is parsed again and run by the [`interpreter`]
//! on a dedicated thread, so deep recursion cannot exhaust the caller's stack.

pub mod ast;
pub mod emit;
pub mod interpreter;
pub mod lexer;
pub mod lower;
pub mod parser;
pub mod value;

use std::thread;

use crate::error::{panic_message, ExecutionError, TransformError};
use crate::limits::ExecutionLimits;
use crate::registry::{Artifact, Execute, Transform};

#[derive(Debug, Clone, Copy, Default)]
pub struct JavaScriptBackend;

impl Transform for JavaScriptBackend {
    fn transform(&self, source: &str) -> Result<Artifact, TransformError> {
        let program = parser::parse(source)?;
        let lowered = lower::lower(&program)?;
        Ok(Artifact::new(emit::emit_program(&lowered)))
    }
}

impl Execute for JavaScriptBackend {
    fn execute(&self, artifact: &Artifact, limits: &ExecutionLimits) -> Result<String, ExecutionError> {
        let source = artifact.as_str().to_owned();
        let limits = *limits;

        let worker = thread::Builder::new()
            .name("js-interpreter".to_string())
            .stack_size(limits.stack_size)
            .spawn(move || interpreter::run_source(&source, limits))
            .map_err(|e| ExecutionError::runtime(format!("failed to start interpreter: {e}")))?;

        worker
            .join()
            .map_err(|payload| ExecutionError::Panicked(panic_message(payload.as_ref())))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transform(source: &str) -> String {
        JavaScriptBackend.transform(source).unwrap().into_string()
    }

    #[test]
    fn test_transform_expression() {
        assert_eq!(transform("1 + 1"), "\"use strict\";\n\n1 + 1;");
    }

    #[test]
    fn test_transform_empty_source() {
        assert_eq!(transform(""), "\"use strict\";");
    }

    #[test]
    fn test_transform_es2015() {
        let source = "const double = (x) => x * 2;\nlet total = 0;\n{\n  let total = double(21);\n}\ntotal;";
        let expected = "\"use strict\";\n\n\
            var double = function double(x) {\n  return x * 2;\n};\n\
            var total = 0;\n\
            {\n  var _total = double(21);\n}\n\
            total;";
        assert_eq!(transform(source), expected);
    }

    #[test]
    fn test_transform_errors() {
        assert_eq!(
            JavaScriptBackend.transform("1 +").unwrap_err().to_string(),
            "Unexpected token (1:3)"
        );
        assert_eq!(
            JavaScriptBackend
                .transform("const a = 1;\na = 2;")
                .unwrap_err()
                .to_string(),
            "\"a\" is read-only"
        );
    }

    #[test]
    fn test_execute_transformed_artifact() {
        let artifact = JavaScriptBackend
            .transform("const xs = [1, 2, 3];\nlet sum = 0;\nfor (let i = 0; i < xs.length; i++) sum += xs[i];\nsum")
            .unwrap();
        let output = JavaScriptBackend
            .execute(&artifact, &ExecutionLimits::default())
            .unwrap();
        assert_eq!(output, "6");
    }

    #[test]
    fn test_deep_recursion_within_limits() {
        let artifact = JavaScriptBackend
            .transform("function depth(n) { return n === 0 ? 0 : 1 + depth(n - 1); }\ndepth(250)")
            .unwrap();
        let output = JavaScriptBackend
            .execute(&artifact, &ExecutionLimits::default())
            .unwrap();
        assert_eq!(output, "250");
    }
}
