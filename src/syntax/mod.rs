//! Syntax module for the Kestrel language
//!
//! A small reader for building ASTs from text. It knows nothing about
//! operator precedence or macros; see [`crate::operators`] and
//! [`crate::macros`] for what happens to its output.

pub mod parser;

pub use parser::{parse, parse_expr};
