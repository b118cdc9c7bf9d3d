//! AST module for the Kestrel language
//!
//! This module provides the closed syntax tree every stage of the core
//! consumes: the operator resolver produces it, the macro engine rewrites it
//! and the dispatch compiler receives bodies built from it.

// ============================================================================
// IMPORTS
// ============================================================================

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::ast::value::Value;

// ============================================================================
// CORE DATA STRUCTURES
// ============================================================================

/// Wrapper carrying the 1-based source line of any value.
///
/// Equality ignores the line: two nodes are equal when their trees are.
///
/// # Examples
///
/// ```rust
/// use kestrel::ast::builder::word;
/// assert_eq!(word("x", 1), word("x", 9));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithLine<T> {
    pub value: T,
    pub line: usize,
}

impl<T: PartialEq> PartialEq for WithLine<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

/// Canonical AST node type. Children are shared, never mutated in place.
pub type AstNode = WithLine<Arc<Expr>>;

/// Atoms with no payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Primitive {
    SelfRef,
    Nil,
    True,
    False,
}

/// One `operator operand` link of an unresolved operator run.
///
/// An absent operand means the operator sat directly next to the following
/// operator (`a + - b`) or ended the run (`a !`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunLink {
    pub operator: String,
    pub operand: Option<AstNode>,
}

/// A flat `head op operand op operand ...` sequence the parser collected
/// without knowing precedences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperatorRun {
    pub head: Option<AstNode>,
    pub links: Vec<RunLink>,
}

/// The core AST node for Kestrel expressions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    Word(String),
    Integer(i64),
    Float(f64),
    String(String),
    Symbol(String),
    Primitive(Primitive),
    List(Vec<AstNode>),
    Block {
        params: Vec<AstNode>,
        body: Vec<AstNode>,
    },
    /// Operator run awaiting resolution against the live operator table.
    Operators(OperatorRun),
    Prefix {
        operator: String,
        operand: AstNode,
    },
    Postfix {
        operator: String,
        operand: AstNode,
    },
    /// Resolved binary operator application.
    Infix {
        operator: String,
        left: AstNode,
        right: AstNode,
        private: bool,
    },
    /// Call site `name(args)` before elaboration.
    Call {
        name: String,
        args: Vec<AstNode>,
        block: Option<AstNode>,
    },
    /// Generic message send; `receiver: None` addresses the ambient self.
    Send {
        receiver: Option<AstNode>,
        name: String,
        args: Vec<AstNode>,
        block: Option<AstNode>,
    },
    Quote(AstNode),
    QuasiQuote(AstNode),
    Unquote(AstNode),
    Splat(AstNode),
    /// Juxtaposition `left right`.
    Compose {
        left: AstNode,
        right: AstNode,
    },
}

/// Variant tag of an [`Expr`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum NodeKind {
    Word,
    Integer,
    Float,
    String,
    Symbol,
    Primitive,
    List,
    Block,
    Operators,
    Prefix,
    Postfix,
    Infix,
    Call,
    Send,
    Quote,
    QuasiQuote,
    Unquote,
    Splat,
    Compose,
}

impl NodeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeKind::Word => "word",
            NodeKind::Integer => "integer",
            NodeKind::Float => "float",
            NodeKind::String => "string",
            NodeKind::Symbol => "symbol",
            NodeKind::Primitive => "primitive",
            NodeKind::List => "list",
            NodeKind::Block => "block",
            NodeKind::Operators => "operators",
            NodeKind::Prefix => "prefix",
            NodeKind::Postfix => "postfix",
            NodeKind::Infix => "infix",
            NodeKind::Call => "call",
            NodeKind::Send => "send",
            NodeKind::Quote => "quote",
            NodeKind::QuasiQuote => "quasi-quote",
            NodeKind::Unquote => "unquote",
            NodeKind::Splat => "splat",
            NodeKind::Compose => "compose",
        }
    }
}

/// Key under which macro rules for a syntactic shape are registered:
/// the variant, plus the operator or message name for call-like nodes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ShapeKey {
    pub kind: NodeKind,
    pub name: Option<String>,
}

impl ShapeKey {
    pub fn of_kind(kind: NodeKind) -> Self {
        Self { kind, name: None }
    }

    pub fn named(kind: NodeKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: Some(name.into()),
        }
    }
}

impl fmt::Display for ShapeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}:{}", self.kind.as_str(), name),
            None => write!(f, "{}", self.kind.as_str()),
        }
    }
}

// ============================================================================
// PUBLIC API IMPLEMENTATION
// ============================================================================

impl WithLine<Arc<Expr>> {
    pub fn new(expr: Expr, line: usize) -> Self {
        WithLine {
            value: Arc::new(expr),
            line,
        }
    }

    pub fn expr(&self) -> &Expr {
        &self.value
    }

    pub fn kind(&self) -> NodeKind {
        self.value.kind()
    }

    pub fn shape_key(&self) -> ShapeKey {
        self.value.shape_key()
    }

    pub fn pretty(&self) -> String {
        self.value.pretty()
    }

    /// Same tree, different line.
    pub fn relocated(&self, line: usize) -> Self {
        WithLine {
            value: Arc::clone(&self.value),
            line,
        }
    }

    /// Rebuilds this node with `f` applied to every direct child.
    pub fn map_children<E, F>(&self, f: F) -> Result<AstNode, E>
    where
        F: FnMut(&AstNode) -> Result<AstNode, E>,
    {
        Ok(AstNode::new(self.value.map_children(f)?, self.line))
    }
}

impl Expr {
    pub fn kind(&self) -> NodeKind {
        match self {
            Expr::Word(_) => NodeKind::Word,
            Expr::Integer(_) => NodeKind::Integer,
            Expr::Float(_) => NodeKind::Float,
            Expr::String(_) => NodeKind::String,
            Expr::Symbol(_) => NodeKind::Symbol,
            Expr::Primitive(_) => NodeKind::Primitive,
            Expr::List(_) => NodeKind::List,
            Expr::Block { .. } => NodeKind::Block,
            Expr::Operators(_) => NodeKind::Operators,
            Expr::Prefix { .. } => NodeKind::Prefix,
            Expr::Postfix { .. } => NodeKind::Postfix,
            Expr::Infix { .. } => NodeKind::Infix,
            Expr::Call { .. } => NodeKind::Call,
            Expr::Send { .. } => NodeKind::Send,
            Expr::Quote(_) => NodeKind::Quote,
            Expr::QuasiQuote(_) => NodeKind::QuasiQuote,
            Expr::Unquote(_) => NodeKind::Unquote,
            Expr::Splat(_) => NodeKind::Splat,
            Expr::Compose { .. } => NodeKind::Compose,
        }
    }

    pub fn shape_key(&self) -> ShapeKey {
        match self {
            Expr::Prefix { operator, .. }
            | Expr::Postfix { operator, .. }
            | Expr::Infix { operator, .. } => ShapeKey::named(self.kind(), operator.clone()),
            Expr::Call { name, .. } | Expr::Send { name, .. } => {
                ShapeKey::named(self.kind(), name.clone())
            }
            _ => ShapeKey::of_kind(self.kind()),
        }
    }

    /// Literal nodes evaluate to themselves; this is their value.
    pub fn literal_value(&self) -> Option<Value> {
        match self {
            Expr::Integer(n) => Some(Value::Int(*n)),
            Expr::Float(n) => Some(Value::Float(*n)),
            Expr::String(s) => Some(Value::Str(s.clone())),
            Expr::Symbol(s) => Some(Value::Symbol(s.clone())),
            Expr::Primitive(Primitive::Nil) => Some(Value::Nil),
            Expr::Primitive(Primitive::True) => Some(Value::Bool(true)),
            Expr::Primitive(Primitive::False) => Some(Value::Bool(false)),
            _ => None,
        }
    }

    /// Direct children, in source order.
    pub fn children(&self) -> Vec<&AstNode> {
        match self {
            Expr::Word(_)
            | Expr::Integer(_)
            | Expr::Float(_)
            | Expr::String(_)
            | Expr::Symbol(_)
            | Expr::Primitive(_) => vec![],
            Expr::List(items) => items.iter().collect(),
            Expr::Block { params, body } => params.iter().chain(body.iter()).collect(),
            Expr::Operators(run) => run
                .head
                .iter()
                .chain(run.links.iter().filter_map(|l| l.operand.as_ref()))
                .collect(),
            Expr::Prefix { operand, .. } | Expr::Postfix { operand, .. } => vec![operand],
            Expr::Infix { left, right, .. } => vec![left, right],
            Expr::Call { args, block, .. } => args.iter().chain(block.iter()).collect(),
            Expr::Send {
                receiver,
                args,
                block,
                ..
            } => receiver
                .iter()
                .chain(args.iter())
                .chain(block.iter())
                .collect(),
            Expr::Quote(inner)
            | Expr::QuasiQuote(inner)
            | Expr::Unquote(inner)
            | Expr::Splat(inner) => vec![inner],
            Expr::Compose { left, right } => vec![left, right],
        }
    }

    /// True when the node has no children.
    pub fn is_leaf(&self) -> bool {
        self.children().is_empty()
    }

    /// Rebuilds the expression with `f` applied to every direct child.
    pub fn map_children<E, F>(&self, mut f: F) -> Result<Expr, E>
    where
        F: FnMut(&AstNode) -> Result<AstNode, E>,
    {
        let mut each = |nodes: &[AstNode]| nodes.iter().map(&mut f).collect::<Result<Vec<_>, E>>();
        Ok(match self {
            Expr::Word(_)
            | Expr::Integer(_)
            | Expr::Float(_)
            | Expr::String(_)
            | Expr::Symbol(_)
            | Expr::Primitive(_) => self.clone(),
            Expr::List(items) => Expr::List(each(items)?),
            Expr::Block { params, body } => Expr::Block {
                params: each(params)?,
                body: each(body)?,
            },
            Expr::Operators(run) => {
                let head = match &run.head {
                    Some(h) => Some(each(std::slice::from_ref(h))?.remove(0)),
                    None => None,
                };
                let mut links = Vec::with_capacity(run.links.len());
                for link in &run.links {
                    let operand = match &link.operand {
                        Some(o) => Some(each(std::slice::from_ref(o))?.remove(0)),
                        None => None,
                    };
                    links.push(RunLink {
                        operator: link.operator.clone(),
                        operand,
                    });
                }
                Expr::Operators(OperatorRun { head, links })
            }
            Expr::Prefix { operator, operand } => Expr::Prefix {
                operator: operator.clone(),
                operand: each(std::slice::from_ref(operand))?.remove(0),
            },
            Expr::Postfix { operator, operand } => Expr::Postfix {
                operator: operator.clone(),
                operand: each(std::slice::from_ref(operand))?.remove(0),
            },
            Expr::Infix {
                operator,
                left,
                right,
                private,
            } => {
                let mut both = each(&[left.clone(), right.clone()])?;
                let right = both.remove(1);
                let left = both.remove(0);
                Expr::Infix {
                    operator: operator.clone(),
                    left,
                    right,
                    private: *private,
                }
            }
            Expr::Call { name, args, block } => Expr::Call {
                name: name.clone(),
                args: each(args)?,
                block: match block {
                    Some(b) => Some(each(std::slice::from_ref(b))?.remove(0)),
                    None => None,
                },
            },
            Expr::Send {
                receiver,
                name,
                args,
                block,
            } => Expr::Send {
                receiver: match receiver {
                    Some(r) => Some(each(std::slice::from_ref(r))?.remove(0)),
                    None => None,
                },
                name: name.clone(),
                args: each(args)?,
                block: match block {
                    Some(b) => Some(each(std::slice::from_ref(b))?.remove(0)),
                    None => None,
                },
            },
            Expr::Quote(inner) => Expr::Quote(each(std::slice::from_ref(inner))?.remove(0)),
            Expr::QuasiQuote(inner) => {
                Expr::QuasiQuote(each(std::slice::from_ref(inner))?.remove(0))
            }
            Expr::Unquote(inner) => Expr::Unquote(each(std::slice::from_ref(inner))?.remove(0)),
            Expr::Splat(inner) => Expr::Splat(each(std::slice::from_ref(inner))?.remove(0)),
            Expr::Compose { left, right } => {
                let mut both = each(&[left.clone(), right.clone()])?;
                let right = both.remove(1);
                let left = both.remove(0);
                Expr::Compose { left, right }
            }
        })
    }

    /// True when both expressions are the same variant with the same
    /// non-child attributes and the same child layout.
    pub fn same_head(&self, other: &Expr) -> bool {
        match (self, other) {
            (Expr::Word(a), Expr::Word(b)) => a == b,
            (Expr::Integer(a), Expr::Integer(b)) => a == b,
            (Expr::Float(a), Expr::Float(b)) => a == b,
            (Expr::String(a), Expr::String(b)) => a == b,
            (Expr::Symbol(a), Expr::Symbol(b)) => a == b,
            (Expr::Primitive(a), Expr::Primitive(b)) => a == b,
            (Expr::List(a), Expr::List(b)) => a.len() == b.len(),
            (
                Expr::Block { params: pa, body: ba },
                Expr::Block { params: pb, body: bb },
            ) => pa.len() == pb.len() && ba.len() == bb.len(),
            (Expr::Operators(a), Expr::Operators(b)) => {
                a.head.is_some() == b.head.is_some()
                    && a.links.len() == b.links.len()
                    && a.links.iter().zip(&b.links).all(|(x, y)| {
                        x.operator == y.operator && x.operand.is_some() == y.operand.is_some()
                    })
            }
            (
                Expr::Prefix { operator: a, .. },
                Expr::Prefix { operator: b, .. },
            )
            | (
                Expr::Postfix { operator: a, .. },
                Expr::Postfix { operator: b, .. },
            ) => a == b,
            (
                Expr::Infix {
                    operator: a,
                    private: pa,
                    ..
                },
                Expr::Infix {
                    operator: b,
                    private: pb,
                    ..
                },
            ) => a == b && pa == pb,
            (
                Expr::Call {
                    name: a,
                    args: aa,
                    block: ab,
                },
                Expr::Call {
                    name: b,
                    args: ba,
                    block: bb,
                },
            ) => a == b && aa.len() == ba.len() && ab.is_some() == bb.is_some(),
            (
                Expr::Send {
                    receiver: ar,
                    name: a,
                    args: aa,
                    block: ab,
                },
                Expr::Send {
                    receiver: br,
                    name: b,
                    args: ba,
                    block: bb,
                },
            ) => {
                a == b
                    && ar.is_some() == br.is_some()
                    && aa.len() == ba.len()
                    && ab.is_some() == bb.is_some()
            }
            (Expr::Quote(_), Expr::Quote(_))
            | (Expr::QuasiQuote(_), Expr::QuasiQuote(_))
            | (Expr::Unquote(_), Expr::Unquote(_))
            | (Expr::Splat(_), Expr::Splat(_))
            | (Expr::Compose { .. }, Expr::Compose { .. }) => true,
            _ => false,
        }
    }

    /// Pretty-prints the expression in surface syntax.
    ///
    /// Resolved infix applications are parenthesized so grouping is visible.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use kestrel::ast::builder::{infix, int, word};
    /// let sum = infix("+", int(1, 1), word("x", 1), 1);
    /// assert_eq!(sum.pretty(), "(1 + x)");
    /// ```
    pub fn pretty(&self) -> String {
        match self {
            Expr::Word(w) => w.clone(),
            Expr::Integer(n) => n.to_string(),
            Expr::Float(n) => format!("{:?}", n),
            Expr::String(s) => format!("{:?}", s),
            Expr::Symbol(s) => format!(":{}", s),
            Expr::Primitive(p) => match p {
                Primitive::SelfRef => "self".to_string(),
                Primitive::Nil => "nil".to_string(),
                Primitive::True => "true".to_string(),
                Primitive::False => "false".to_string(),
            },
            Expr::List(items) => format!("[{}]", Self::pretty_joined(items, ", ")),
            Expr::Block { params, body } => Self::pretty_block(params, body),
            Expr::Operators(run) => Self::pretty_run(run),
            Expr::Prefix { operator, operand } => format!("{}{}", operator, operand.pretty()),
            Expr::Postfix { operator, operand } => format!("{}{}", operand.pretty(), operator),
            Expr::Infix {
                operator,
                left,
                right,
                private,
            } => {
                if *private {
                    format!("({} {})", operator, right.pretty())
                } else {
                    format!("({} {} {})", left.pretty(), operator, right.pretty())
                }
            }
            Expr::Call { name, args, block } => {
                let mut s = format!("{}({})", name, Self::pretty_joined(args, ", "));
                if let Some(b) = block {
                    s.push(' ');
                    s.push_str(&b.pretty());
                }
                s
            }
            Expr::Send {
                receiver,
                name,
                args,
                block,
            } => {
                let mut s = match receiver {
                    Some(r) => format!("{}.{}", r.pretty(), name),
                    None => name.clone(),
                };
                if !args.is_empty() || receiver.is_none() {
                    s.push_str(&format!("({})", Self::pretty_joined(args, ", ")));
                }
                if let Some(b) = block {
                    s.push(' ');
                    s.push_str(&b.pretty());
                }
                s
            }
            Expr::Quote(inner) => format!("'{}", inner.pretty()),
            Expr::QuasiQuote(inner) => format!("`{}", inner.pretty()),
            Expr::Unquote(inner) => format!("~{}", inner.pretty()),
            Expr::Splat(inner) => format!("*{}", inner.pretty()),
            Expr::Compose { left, right } => format!("{} {}", left.pretty(), right.pretty()),
        }
    }

    // ------------------------------------------------------------------------
    // Pretty-printing helpers
    // ------------------------------------------------------------------------

    fn pretty_joined(nodes: &[AstNode], separator: &str) -> String {
        nodes
            .iter()
            .map(|n| n.pretty())
            .collect::<Vec<_>>()
            .join(separator)
    }

    fn pretty_block(params: &[AstNode], body: &[AstNode]) -> String {
        let contents = Self::pretty_joined(body, "; ");
        if params.is_empty() {
            format!("{{ {} }}", contents)
        } else {
            format!("{{ |{}| {} }}", Self::pretty_joined(params, ", "), contents)
        }
    }

    fn pretty_run(run: &OperatorRun) -> String {
        let mut parts = Vec::new();
        if let Some(head) = &run.head {
            parts.push(head.pretty());
        }
        for link in &run.links {
            parts.push(link.operator.clone());
            if let Some(operand) = &link.operand {
                parts.push(operand.pretty());
            }
        }
        parts.join(" ")
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.pretty())
    }
}

// ============================================================================
// MODULE EXPORTS
// ============================================================================

pub mod builder;
pub mod value;
