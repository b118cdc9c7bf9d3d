pub use crate::diagnostics::{to_error_source, ErrorContext, ErrorType, KestrelError};
pub use crate::engine::{Engine, EngineConfig, Registries};

pub mod ast;
pub mod diagnostics;
pub mod dispatch;
pub mod engine;
pub mod macros;
pub mod operators;
pub mod patterns;
pub mod quotation;
pub mod registry;
pub mod runtime;
pub mod sink;
pub mod syntax;
