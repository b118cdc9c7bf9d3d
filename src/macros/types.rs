//! Core macro types: producers, the expansion trace and the context native
//! producers run in.
//!
//! This module depends only on the AST, patterns and the salt counter, so
//! the expander and the registry can both build on it.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::ast::value::Value;
use crate::ast::{AstNode, Expr};
use crate::macros::salt::Salt;
use crate::operators::{OperatorDef, OperatorTable};
use crate::patterns::Bindings;
use crate::registry::Shared;
use crate::KestrelError;

/// Maximum length of one rewrite chain before expansion gives up.
pub const MAX_MACRO_RECURSION_DEPTH: usize = 128;

/// A native expansion function. It receives the pattern's bindings and
/// returns the replacement, as a node or as any value that converts to one.
pub type NativeProducer =
    Arc<dyn Fn(&Bindings, &mut ExpansionContext<'_>) -> Result<Value, KestrelError> + Send + Sync>;

/// What a macro rule runs once its pattern matched.
#[derive(Clone)]
pub enum Producer {
    Native(NativeProducer),
    /// A template node. A top-level quasi-quote is instantiated with the
    /// bindings filling its holes; any other node has its bound words
    /// replaced.
    Template(AstNode),
}

impl Producer {
    pub fn native<F>(f: F) -> Self
    where
        F: Fn(&Bindings, &mut ExpansionContext<'_>) -> Result<Value, KestrelError>
            + Send
            + Sync
            + 'static,
    {
        Producer::Native(Arc::new(f))
    }

    pub fn template(node: AstNode) -> Self {
        Producer::Template(node)
    }

    pub fn is_template(&self) -> bool {
        matches!(self, Producer::Template(_))
    }
}

impl fmt::Debug for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Producer::Native(_) => write!(f, "<native>"),
            Producer::Template(node) => write!(f, "{}", node.pretty()),
        }
    }
}

/// One rule application, for inspection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MacroExpansionStep {
    /// Shape key and pattern of the rule that fired.
    pub rule: String,
    pub input: AstNode,
    pub output: AstNode,
}

/// What a native producer may touch while it runs.
pub struct ExpansionContext<'a> {
    pub(crate) salt: &'a mut Salt,
    pub(crate) separator: &'a str,
    pub(crate) operators: &'a Shared<OperatorTable>,
    /// The node being expanded.
    pub node: &'a AstNode,
}

impl<'a> ExpansionContext<'a> {
    pub fn line(&self) -> usize {
        self.node.line
    }

    /// A name no other expansion in this session has produced.
    pub fn fresh_name(&mut self, base: &str) -> String {
        self.salt.fresh_name(base, self.separator)
    }

    /// A word node carrying a fresh name, placed at the current line.
    pub fn fresh_word(&mut self, base: &str) -> AstNode {
        let name = self.fresh_name(base);
        AstNode::new(Expr::Word(name), self.line())
    }

    /// Declares an operator; runs later in the same unit resolve with it.
    pub fn declare_operator(&self, def: OperatorDef) {
        self.operators.update(|t| t.declare(def));
    }
}
