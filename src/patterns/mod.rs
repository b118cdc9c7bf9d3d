//! Patterns: the common substrate of dispatch and macro selection.
//!
//! A [`Pattern`] tests a [`Value`], extracts named bindings when it matches,
//! and ranks itself against other patterns by precision. Branch argument
//! lists, macro rule shapes and plain destructuring all use the same type.
//!
//! Patterns are usually written as syntax and converted with
//! [`Pattern::from_node`]:
//!
//! | syntax          | pattern                                  |
//! |-----------------|------------------------------------------|
//! | `_`             | wildcard                                 |
//! | `x`             | wildcard binding `x`                     |
//! | `Integer`       | class test                               |
//! | `0`, `"a"`, `:s`| equality                                 |
//! | `[a, *rest]`    | list with optional trailing splat        |
//! | `'node`         | structural equality with a quoted node   |
//! | `` `f(~x) ``    | quasi-quote template with holes          |
//! | `a & b`, `a \| b`, `!a` | combinators                      |
//! | `n: p`          | bind the whole value to `n` if `p` holds |
//! | `obj.slot`      | attribute write, always matches          |
//! | `@x`            | instance variable write, always matches  |

// ============================================================================
// IMPORTS
// ============================================================================

use std::fmt;
use std::sync::Arc;

use crate::ast::builder::self_ref;
use crate::ast::value::Value;
use crate::ast::{AstNode, Expr, Primitive};
use crate::{err_ctx, KestrelError};

pub mod matching;
pub mod precision;

pub use matching::{Bindings, SlotWrite};

// ============================================================================
// CORE DATA STRUCTURES
// ============================================================================

/// A closed set of pattern variants.
#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    /// Matches anything; binds the value when named.
    Wildcard(Option<String>),
    /// Binds the whole value to the name once the inner pattern matches.
    Named(String, Box<Pattern>),
    /// Matches values equal to the literal.
    Equality(Value),
    /// Matches values whose class chain contains the class.
    Kind(String),
    /// Matches a list of at least `elements.len()` values; without a splat
    /// the length must be exact.
    List {
        elements: Vec<Pattern>,
        splat: Option<Box<Pattern>>,
    },
    /// Variadic capture: the inner pattern sees the collected list.
    Splat(Box<Pattern>),
    /// Matches a node structurally equal to the quoted one.
    Quote(AstNode),
    /// Matches a node against a template; depth-1 unquotes are holes.
    QuasiQuote(Template),
    /// Always matches and records a slot write for the host.
    Attribute {
        receiver: AstNode,
        name: String,
        arguments: Vec<AstNode>,
    },
    /// Always matches and records a write of the receiver's instance
    /// variable `@name`.
    Instance { receiver: AstNode, name: String },
    And(Box<Pattern>, Box<Pattern>),
    Or(Box<Pattern>, Box<Pattern>),
    Not(Box<Pattern>),
}

/// A quasi-quoted shape plus the patterns compiled from its holes, in the
/// pre-order in which the holes appear in the template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    pub node: AstNode,
    pub holes: Arc<Vec<Pattern>>,
}

// ============================================================================
// CONSTRUCTION
// ============================================================================

impl Pattern {
    pub fn wildcard() -> Self {
        Pattern::Wildcard(None)
    }

    pub fn binding(name: &str) -> Self {
        Pattern::Wildcard(Some(name.to_string()))
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Pattern::Equality(value.into())
    }

    pub fn kind(class: &str) -> Self {
        Pattern::Kind(class.to_string())
    }

    pub fn list(elements: Vec<Pattern>, splat: Option<Pattern>) -> Self {
        Pattern::List {
            elements,
            splat: splat.map(Box::new),
        }
    }

    pub fn named(name: &str, inner: Pattern) -> Self {
        Pattern::Named(name.to_string(), Box::new(inner))
    }

    pub fn splat(inner: Pattern) -> Self {
        Pattern::Splat(Box::new(inner))
    }

    /// `@name`, written from a pattern on `line`.
    pub fn instance(name: &str, line: usize) -> Self {
        Pattern::Instance {
            receiver: self_ref(line),
            name: name.to_string(),
        }
    }

    /// Builds a template pattern from the body of a quasi-quote, compiling
    /// each depth-1 hole.
    pub fn quasi(template: AstNode) -> Result<Self, KestrelError> {
        let mut holes = Vec::new();
        collect_holes(&template, 1, &mut holes)?;
        Ok(Pattern::QuasiQuote(Template {
            node: template,
            holes: Arc::new(holes),
        }))
    }

    /// Converts pattern syntax into a pattern.
    pub fn from_node(node: &AstNode) -> Result<Self, KestrelError> {
        match node.expr() {
            Expr::Word(name) if name == "_" => Ok(Pattern::wildcard()),
            Expr::Word(name) if starts_uppercase(name) => Ok(Pattern::kind(name)),
            Expr::Word(name) => Ok(Pattern::binding(name)),
            Expr::Integer(_)
            | Expr::Float(_)
            | Expr::String(_)
            | Expr::Symbol(_)
            | Expr::Primitive(Primitive::Nil | Primitive::True | Primitive::False) => {
                Ok(Pattern::Equality(Value::from_node(node)))
            }
            Expr::List(items) => list_from_nodes(items, node.line),
            Expr::Splat(inner) => Ok(Pattern::splat(Pattern::from_node(inner)?)),
            Expr::Quote(inner) => Ok(Pattern::Quote(inner.clone())),
            Expr::QuasiQuote(inner) => Pattern::quasi(inner.clone()),
            Expr::Infix {
                operator,
                left,
                right,
                private: false,
            } => match operator.as_str() {
                "&" => Ok(Pattern::And(
                    Box::new(Pattern::from_node(left)?),
                    Box::new(Pattern::from_node(right)?),
                )),
                "|" => Ok(Pattern::Or(
                    Box::new(Pattern::from_node(left)?),
                    Box::new(Pattern::from_node(right)?),
                )),
                ":" => match left.expr() {
                    Expr::Word(name) => Ok(Pattern::named(name, Pattern::from_node(right)?)),
                    _ => Err(err_ctx!(
                        InvalidPattern,
                        format!("`{}` cannot name a pattern", left.pretty()),
                        node.line
                    )),
                },
                other => Err(unsupported(node, &format!("operator `{}`", other))),
            },
            Expr::Prefix { operator, operand } if operator == "@" => match operand.expr() {
                Expr::Word(name) => Ok(Pattern::instance(name, node.line)),
                _ => Err(unsupported(node, "instance variable")),
            },
            Expr::Prefix { operator, operand } if operator == "!" => {
                Ok(Pattern::Not(Box::new(Pattern::from_node(operand)?)))
            }
            Expr::Send {
                receiver: Some(receiver),
                name,
                args,
                block: None,
            } => Ok(Pattern::Attribute {
                receiver: receiver.clone(),
                name: name.clone(),
                arguments: args.clone(),
            }),
            Expr::Operators(_) => Err(err_ctx!(
                InvalidPattern,
                format!("unresolved operators in pattern `{}`", node.pretty()),
                node.line,
                "resolve operator runs before converting them to patterns"
            )),
            _ => Err(unsupported(node, node.kind().as_str())),
        }
    }
}

fn starts_uppercase(name: &str) -> bool {
    name.chars().next().is_some_and(char::is_uppercase)
}

fn unsupported(node: &AstNode, what: &str) -> KestrelError {
    err_ctx!(
        InvalidPattern,
        format!("cannot use {} `{}` as a pattern", what, node.pretty()),
        node.line
    )
}

fn list_from_nodes(items: &[AstNode], line: usize) -> Result<Pattern, KestrelError> {
    let mut elements = Vec::with_capacity(items.len());
    let mut splat = None;
    for (i, item) in items.iter().enumerate() {
        match item.expr() {
            Expr::Splat(inner) if i + 1 == items.len() => {
                splat = Some(Pattern::from_node(inner)?);
            }
            Expr::Splat(_) => {
                return Err(err_ctx!(
                    InvalidPattern,
                    "a splat may only end a list pattern",
                    line
                ))
            }
            _ => elements.push(Pattern::from_node(item)?),
        }
    }
    Ok(Pattern::list(elements, splat))
}

/// Walks a template in child order, compiling every depth-1 hole.
fn collect_holes(
    node: &AstNode,
    depth: usize,
    holes: &mut Vec<Pattern>,
) -> Result<(), KestrelError> {
    match node.expr() {
        Expr::Unquote(inner) if depth == 1 => {
            holes.push(Pattern::from_node(inner)?);
            Ok(())
        }
        Expr::Unquote(inner) => collect_holes(inner, depth - 1, holes),
        Expr::QuasiQuote(inner) => collect_holes(inner, depth + 1, holes),
        expr => expr
            .children()
            .into_iter()
            .try_for_each(|child| collect_holes(child, depth, holes)),
    }
}

// ============================================================================
// QUERIES
// ============================================================================

impl Pattern {
    /// True when the pattern matches unconditionally.
    pub fn is_wildcard(&self) -> bool {
        match self {
            Pattern::Wildcard(_) | Pattern::Attribute { .. } | Pattern::Instance { .. } => true,
            Pattern::Named(_, inner) => inner.is_wildcard(),
            Pattern::And(a, b) => a.is_wildcard() && b.is_wildcard(),
            Pattern::Or(a, b) => a.is_wildcard() || b.is_wildcard(),
            _ => false,
        }
    }

    /// True when the pattern matches every list a variadic tail can hold.
    /// A splat still needs a list anywhere else.
    pub fn is_wildcard_tail(&self) -> bool {
        match self {
            Pattern::Splat(inner) => inner.is_wildcard(),
            Pattern::Named(_, inner) => inner.is_wildcard_tail(),
            other => other.is_wildcard(),
        }
    }

    /// True when matching requests slot writes.
    pub fn has_writes(&self) -> bool {
        match self {
            Pattern::Attribute { .. } | Pattern::Instance { .. } => true,
            Pattern::Named(_, inner) | Pattern::Splat(inner) => inner.has_writes(),
            Pattern::List { elements, splat } => {
                elements.iter().any(Pattern::has_writes)
                    || splat.as_ref().is_some_and(|s| s.has_writes())
            }
            Pattern::QuasiQuote(t) => t.holes.iter().any(Pattern::has_writes),
            Pattern::And(a, b) | Pattern::Or(a, b) => a.has_writes() || b.has_writes(),
            _ => false,
        }
    }

    /// Number of names a successful match binds.
    pub fn binding_count(&self) -> usize {
        self.names().len()
    }

    /// Bound names in the order they are bound.
    pub fn names(&self) -> Vec<String> {
        let mut out = Vec::new();
        self.collect_names(&mut out);
        out
    }

    fn collect_names(&self, out: &mut Vec<String>) {
        match self {
            Pattern::Wildcard(Some(name)) => push_unique(out, name),
            Pattern::Named(name, inner) => {
                inner.collect_names(out);
                push_unique(out, name);
            }
            Pattern::List { elements, splat } => {
                elements.iter().for_each(|e| e.collect_names(out));
                if let Some(s) = splat {
                    s.collect_names(out);
                }
            }
            Pattern::Splat(inner) => inner.collect_names(out),
            Pattern::QuasiQuote(t) => t.holes.iter().for_each(|h| h.collect_names(out)),
            Pattern::And(a, b) | Pattern::Or(a, b) => {
                a.collect_names(out);
                b.collect_names(out);
            }
            Pattern::Wildcard(None)
            | Pattern::Equality(_)
            | Pattern::Kind(_)
            | Pattern::Quote(_)
            | Pattern::Attribute { .. }
            | Pattern::Instance { .. }
            | Pattern::Not(_) => {}
        }
    }
}

fn push_unique(out: &mut Vec<String>, name: &str) {
    if !out.iter().any(|n| n == name) {
        out.push(name.to_string());
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pattern::Wildcard(None) => write!(f, "_"),
            Pattern::Wildcard(Some(name)) => write!(f, "{}", name),
            Pattern::Named(name, inner) => write!(f, "{}: {}", name, inner),
            Pattern::Equality(v) => write!(f, "{}", v),
            Pattern::Kind(class) => write!(f, "{}", class),
            Pattern::List { elements, splat } => {
                let mut parts: Vec<String> = elements.iter().map(|e| e.to_string()).collect();
                if let Some(s) = splat {
                    parts.push(format!("*{}", s));
                }
                write!(f, "[{}]", parts.join(", "))
            }
            Pattern::Splat(inner) => write!(f, "*{}", inner),
            Pattern::Quote(node) => write!(f, "'{}", node.pretty()),
            Pattern::QuasiQuote(t) => write!(f, "`{}", t.node.pretty()),
            Pattern::Attribute { receiver, name, .. } => {
                write!(f, "{}.{}", receiver.pretty(), name)
            }
            Pattern::Instance { name, .. } => write!(f, "@{}", name),
            Pattern::And(a, b) => write!(f, "({} & {})", a, b),
            Pattern::Or(a, b) => write!(f, "({} | {})", a, b),
            Pattern::Not(inner) => write!(f, "!{}", inner),
        }
    }
}
