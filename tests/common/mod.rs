//! Shared helpers for the integration tests.

#![allow(dead_code)]

use kestrel::ast::value::Value;
use kestrel::ast::AstNode;
use kestrel::runtime::{body, MethodBody};
use kestrel::syntax::parse_expr;
use kestrel::{Engine, KestrelError};

/// Opt-in log output: `RUST_LOG=kestrel=debug cargo test`.
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Parses one expression, panicking with the diagnostic on failure.
pub fn read(text: &str) -> AstNode {
    match parse_expr(text) {
        Ok(node) => node,
        Err(e) => panic!("failed to parse {:?}: {}", text, e),
    }
}

/// Parses and expands one expression.
pub fn expand_text(engine: &mut Engine, text: &str) -> Result<AstNode, KestrelError> {
    engine.expand(&read(text))
}

/// A body that returns a fixed string.
pub fn returns(label: &'static str) -> MethodBody {
    body(move |_| Ok(Value::Str(label.to_string())))
}

pub fn string(s: &str) -> Value {
    Value::Str(s.to_string())
}
