//! # syncpad-runner: Per-language compile-and-run pipeline
//!
//! ```text
//! source ──► Transform ──► Artifact ──► Execute ──► value
//!               │                          │
//!               └──── error ───┐   ┌─ error┘
//!                              ▼   ▼
//!                        report (String)
//! ```
//!
//! A [`LanguageRegistry`] maps each [`Language`] to a [`Backend`] whose
//! transform and execute halves are both optional. [`CompileRunPipeline`]
//! drives one backend and always returns a report.
//!
//! ## Modules
//!
//! - [`language`]: Language tags
//! - [`registry`]: `Transform`/`Execute` traits and the backend table
//! - [`pipeline`]: Report-producing orchestration with panic isolation
//! - [`javascript`]: ES2015 → ES5 transform and a sandboxed interpreter
//! - [`limits`]: Step, depth and wall-clock budgets
//! - [`error`]: Transform and execution error types

pub mod error;
pub mod javascript;
pub mod language;
pub mod limits;
pub mod pipeline;
pub mod registry;

pub use error::{ExecutionError, TransformError};
pub use javascript::JavaScriptBackend;
pub use language::{Language, UnknownLanguage};
pub use limits::ExecutionLimits;
pub use pipeline::{CompileRunPipeline, Stage};
pub use registry::{Artifact, Backend, Execute, LanguageRegistry, Transform};
