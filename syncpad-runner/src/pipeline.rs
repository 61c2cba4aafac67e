//! Compile-and-run orchestration.
//!
//! Every invocation ends in a report string; transform failures, runtime
//! failures, missing backends and backend panics are all rendered as text.

use std::panic::{self, AssertUnwindSafe};

use crate::error::{panic_message, ExecutionError, TransformError};
use crate::language::Language;
use crate::limits::ExecutionLimits;
use crate::registry::{Artifact, LanguageRegistry};

/// Progress of a single compile-and-run invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Start,
    Transforming,
    TransformFailed,
    Transformed,
    Executing,
    ExecuteFailed,
    ExecuteSucceeded,
    Reported,
}

#[derive(Debug, Clone)]
pub struct CompileRunPipeline {
    registry: LanguageRegistry,
    limits: ExecutionLimits,
}

impl Default for CompileRunPipeline {
    fn default() -> Self {
        Self::new(LanguageRegistry::with_defaults())
    }
}

impl CompileRunPipeline {
    pub fn new(registry: LanguageRegistry) -> Self {
        Self {
            registry,
            limits: ExecutionLimits::default(),
        }
    }

    pub fn with_limits(mut self, limits: ExecutionLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn registry(&self) -> &LanguageRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut LanguageRegistry {
        &mut self.registry
    }

    pub fn limits(&self) -> &ExecutionLimits {
        &self.limits
    }

    /// Transform `source` for `language`, run the artifact and describe the outcome.
    pub fn compile_and_run(&self, source: &str, language: Language) -> String {
        let report = self.report(source, language);
        trace_stage(language, Stage::Reported);
        report
    }

    /// Like [`compile_and_run`](Self::compile_and_run), keyed by a language tag.
    /// Unrecognised tags are reported the same way as unregistered languages.
    pub fn compile_and_run_tag(&self, source: &str, tag: &str) -> String {
        match tag.parse::<Language>() {
            Ok(language) => self.compile_and_run(source, language),
            Err(e) => {
                log::debug!("{e}");
                no_compiler(tag)
            }
        }
    }

    fn report(&self, source: &str, language: Language) -> String {
        trace_stage(language, Stage::Start);

        let Some(backend) = self.registry.get(language) else {
            log::debug!("no backend registered for {language}");
            return no_compiler(language.tag());
        };
        let Some(transform) = backend.transform.as_ref() else {
            log::debug!("{language} has no transform capability");
            return no_compiler(language.tag());
        };

        trace_stage(language, Stage::Transforming);
        let transformed = panic::catch_unwind(AssertUnwindSafe(|| transform.transform(source)))
            .unwrap_or_else(|payload| Err(TransformError::Panicked(panic_message(payload.as_ref()))));
        let artifact = match transformed {
            Ok(artifact) => artifact,
            Err(e) => {
                trace_stage(language, Stage::TransformFailed);
                log::debug!("{language} transform failed: {e}");
                return format!("Compilation error: {e}");
            }
        };
        trace_stage(language, Stage::Transformed);

        let Some(execute) = backend.execute.as_ref() else {
            log::debug!("{language} has no runtime; skipping execution");
            return format!("{artifact}\nSkipped: no runtime registered for {language}");
        };

        trace_stage(language, Stage::Executing);
        let executed = panic::catch_unwind(AssertUnwindSafe(|| execute.execute(&artifact, &self.limits)))
            .unwrap_or_else(|payload| Err(ExecutionError::Panicked(panic_message(payload.as_ref()))));
        render(&artifact, language, executed)
    }
}

fn render(artifact: &Artifact, language: Language, executed: Result<String, ExecutionError>) -> String {
    match executed {
        Ok(output) => {
            trace_stage(language, Stage::ExecuteSucceeded);
            format!("{artifact}\nOutput: {output}")
        }
        Err(e) => {
            trace_stage(language, Stage::ExecuteFailed);
            log::debug!("{language} execution failed: {e}");
            format!("{artifact}\nError: {e}")
        }
    }
}

fn no_compiler(tag: &str) -> String {
    format!("No compiler registered for {tag}")
}

fn trace_stage(language: Language, stage: Stage) {
    log::trace!("[{language}] {stage:?}");
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::registry::{Backend, Execute, Transform};

    struct Echo;

    impl Transform for Echo {
        fn transform(&self, source: &str) -> Result<Artifact, TransformError> {
            Ok(Artifact::new(format!("echo {source}")))
        }
    }

    struct Exploding;

    impl Transform for Exploding {
        fn transform(&self, _source: &str) -> Result<Artifact, TransformError> {
            panic!("transform blew up")
        }
    }

    impl Execute for Exploding {
        fn execute(&self, _artifact: &Artifact, _limits: &ExecutionLimits) -> Result<String, ExecutionError> {
            panic!("runtime blew up")
        }
    }

    #[test]
    fn test_placeholder_language() {
        let pipeline = CompileRunPipeline::default();
        assert_eq!(
            pipeline.compile_and_run("print(1)", Language::Python),
            "No compiler registered for python"
        );
        assert_eq!(
            pipeline.compile_and_run("int main() {}", Language::Cpp),
            "No compiler registered for c++"
        );
    }

    #[test]
    fn test_unknown_tag() {
        let pipeline = CompileRunPipeline::default();
        assert_eq!(
            pipeline.compile_and_run_tag("x", "cobol"),
            "No compiler registered for cobol"
        );
        assert_eq!(
            pipeline.compile_and_run_tag("1 + 1", "js"),
            "\"use strict\";\n\n1 + 1;\nOutput: 2"
        );
    }

    #[test]
    fn test_unregistered_language() {
        let pipeline = CompileRunPipeline::new(LanguageRegistry::new());
        assert_eq!(
            pipeline.compile_and_run("1", Language::JavaScript),
            "No compiler registered for javascript"
        );
    }

    #[test]
    fn test_transform_without_runtime() {
        let mut pipeline = CompileRunPipeline::default();
        pipeline
            .registry_mut()
            .register(Language::Java, Backend::transform_only(Arc::new(Echo)));
        assert_eq!(
            pipeline.compile_and_run("hi", Language::Java),
            "echo hi\nSkipped: no runtime registered for java"
        );
    }

    #[test]
    fn test_backend_panics_become_reports() {
        let mut registry = LanguageRegistry::new();
        registry.register(Language::Python, Backend::new(Arc::new(Exploding), Arc::new(Exploding)));
        registry.register(Language::Java, Backend::new(Arc::new(Echo), Arc::new(Exploding)));
        let pipeline = CompileRunPipeline::new(registry);

        assert_eq!(
            pipeline.compile_and_run("x", Language::Python),
            "Compilation error: Transform aborted: transform blew up"
        );
        assert_eq!(
            pipeline.compile_and_run("x", Language::Java),
            "echo x\nError: Execution aborted: runtime blew up"
        );
    }

    #[test]
    fn test_limits_are_forwarded() {
        let pipeline = CompileRunPipeline::default().with_limits(ExecutionLimits::default().with_max_steps(500));
        assert_eq!(pipeline.limits().max_steps, 500);
        let report = pipeline.compile_and_run("while (true) {}", Language::JavaScript);
        assert!(report.ends_with("\nError: Execution step limit of 500 exceeded"), "{report}");
    }
}
