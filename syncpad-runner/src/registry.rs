//! Language → backend capability table.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{ExecutionError, TransformError};
use crate::javascript::JavaScriptBackend;
use crate::language::Language;
use crate::limits::ExecutionLimits;

/// Output of a transform: the text that gets executed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Artifact {
    text: String,
}

impl Artifact {
    pub fn new(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn into_string(self) -> String {
        self.text
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Source-to-executable conversion for one language.
pub trait Transform: Send + Sync {
    fn transform(&self, source: &str) -> Result<Artifact, TransformError>;
}

/// Runs an artifact and stringifies its result.
pub trait Execute: Send + Sync {
    fn execute(&self, artifact: &Artifact, limits: &ExecutionLimits) -> Result<String, ExecutionError>;
}

/// Capabilities wired for a language. Either half may be missing.
#[derive(Clone, Default)]
pub struct Backend {
    pub transform: Option<Arc<dyn Transform>>,
    pub execute: Option<Arc<dyn Execute>>,
}

impl Backend {
    /// A registered language with nothing wired yet.
    pub fn placeholder() -> Self {
        Self::default()
    }

    pub fn transform_only(transform: Arc<dyn Transform>) -> Self {
        Self {
            transform: Some(transform),
            execute: None,
        }
    }

    pub fn new(transform: Arc<dyn Transform>, execute: Arc<dyn Execute>) -> Self {
        Self {
            transform: Some(transform),
            execute: Some(execute),
        }
    }
}

impl fmt::Debug for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Backend")
            .field("transform", &self.transform.is_some())
            .field("execute", &self.execute.is_some())
            .finish()
    }
}

#[derive(Debug, Clone, Default)]
pub struct LanguageRegistry {
    backends: HashMap<Language, Backend>,
}

impl LanguageRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// JavaScript fully wired; Python, Java and C++ registered as placeholders.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        let javascript = Arc::new(JavaScriptBackend);
        registry.register(
            Language::JavaScript,
            Backend::new(javascript.clone(), javascript),
        );
        for language in [Language::Python, Language::Java, Language::Cpp] {
            registry.register(language, Backend::placeholder());
        }
        registry
    }

    /// Register (or replace) the backend for a language.
    pub fn register(&mut self, language: Language, backend: Backend) -> Option<Backend> {
        log::debug!("registering backend for {language}: {backend:?}");
        self.backends.insert(language, backend)
    }

    pub fn get(&self, language: Language) -> Option<&Backend> {
        self.backends.get(&language)
    }

    /// Registered languages in tag order.
    pub fn languages(&self) -> Vec<Language> {
        let mut languages: Vec<Language> = self.backends.keys().copied().collect();
        languages.sort();
        languages
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Upper;

    impl Transform for Upper {
        fn transform(&self, source: &str) -> Result<Artifact, TransformError> {
            Ok(Artifact::new(source.to_uppercase()))
        }
    }

    #[test]
    fn test_defaults() {
        let registry = LanguageRegistry::with_defaults();
        assert_eq!(registry.languages(), Language::ALL.to_vec());

        let js = registry.get(Language::JavaScript).unwrap();
        assert!(js.transform.is_some() && js.execute.is_some());

        let python = registry.get(Language::Python).unwrap();
        assert!(python.transform.is_none() && python.execute.is_none());
    }

    #[test]
    fn test_register_replaces() {
        let mut registry = LanguageRegistry::with_defaults();
        let previous = registry.register(Language::Python, Backend::transform_only(Arc::new(Upper)));
        assert!(previous.is_some());

        let python = registry.get(Language::Python).unwrap();
        let artifact = python.transform.as_ref().unwrap().transform("print").unwrap();
        assert_eq!(artifact.as_str(), "PRINT");
        assert!(python.execute.is_none());
    }

    #[test]
    fn test_empty_registry() {
        let registry = LanguageRegistry::new();
        assert!(registry.get(Language::JavaScript).is_none());
        assert!(registry.languages().is_empty());
    }
}
