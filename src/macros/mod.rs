//! # Kestrel Macro Expansion System
//!
//! Macros rewrite syntax before anything is compiled. A rule pairs a
//! pattern over AST nodes with a producer; rules are grouped by the shape
//! of the node they apply to (its variant, plus the name for call-like
//! nodes) and kept in precision order, so the most specific rule wins.
//!
//! ## Layout
//!
//! - [`types`]: producers, the expansion trace and the producer context.
//! - [`salt`]: the hygiene counter and its per-unit bookkeeping.
//! - [`registry`]: rule storage and rule construction from example nodes.
//! - [`expander`]: the fixed-point rewriting pass.
//!
//! ## Example
//!
//! ```rust
//! use kestrel::ast::builder::{call, int, quasi, run, unquote, word};
//! use kestrel::macros::Producer;
//! use kestrel::Engine;
//!
//! let mut engine = Engine::default();
//! engine
//!     .define_macro(
//!         &call("double", vec![unquote(word("x", 1), 1)], 1),
//!         Producer::template(quasi(
//!             run(unquote(word("x", 1), 1), vec![("+", unquote(word("x", 1), 1))], 1),
//!             1,
//!         )),
//!     )
//!     .unwrap();
//! let out = engine.expand(&call("double", vec![int(5, 1)], 1)).unwrap();
//! assert_eq!(out.pretty(), "5.+(5)");
//! ```

pub mod expander;
pub mod registry;
pub mod salt;
pub mod types;

pub use expander::{instantiate_template, Expander};
pub use registry::{define, macro_pattern, rule, MacroRegistry};
pub use salt::{CompiledUnit, Phase, Salt, SaltCheckpoint};
pub use types::{
    ExpansionContext, MacroExpansionStep, NativeProducer, Producer, MAX_MACRO_RECURSION_DEPTH,
};
