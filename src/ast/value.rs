use im::HashMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ast::{AstNode, Expr, Primitive};
use crate::{err_msg, KestrelError};

/// A host object: an ordered class chain (most specific first) and slots.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Object {
    pub classes: Vec<String>,
    pub slots: HashMap<String, Value>,
}

impl Object {
    pub fn new<I, S>(classes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            classes: classes.into_iter().map(Into::into).collect(),
            slots: HashMap::new(),
        }
    }

    pub fn with_slot(mut self, name: &str, value: Value) -> Self {
        self.slots.insert(name.to_string(), value);
        self
    }
}

/// A value as the host environment sees it.
///
/// Macro rules see AST nodes as `Value::Node`; dispatch routines see
/// whatever the host passes in.
///
/// # Examples
///
/// ```rust
/// use kestrel::ast::value::Value;
/// assert_eq!(Value::Int(3).class_name(), "Integer");
/// assert!(Value::default().is_nil());
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub enum Value {
    #[default]
    Nil,
    /// An optional argument the caller did not supply.
    Undefined,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    Symbol(String),
    List(Vec<Value>),
    Node(AstNode),
    Object(Object),
}

impl Value {
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Value::Undefined)
    }

    /// Everything except `nil`, `false` and `undefined` counts as true.
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Nil | Value::Bool(false) | Value::Undefined)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_node(&self) -> Option<&AstNode> {
        match self {
            Value::Node(n) => Some(n),
            _ => None,
        }
    }

    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Value::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn class_name(&self) -> String {
        self.class_chain()
            .into_iter()
            .next()
            .unwrap_or_else(|| "Object".to_string())
    }

    /// Class names from most to least specific; every chain ends in `Object`.
    pub fn class_chain(&self) -> Vec<String> {
        let own = match self {
            Value::Nil => "Nil",
            Value::Undefined => "Undefined",
            Value::Bool(_) => "Boolean",
            Value::Int(_) => "Integer",
            Value::Float(_) => "Float",
            Value::Str(_) => "String",
            Value::Symbol(_) => "Symbol",
            Value::List(_) => "List",
            Value::Node(_) => "Node",
            Value::Object(obj) => {
                let mut chain = obj.classes.clone();
                if chain.last().map(String::as_str) != Some("Object") {
                    chain.push("Object".to_string());
                }
                return chain;
            }
        };
        ancestors(own)
    }

    pub fn is_a(&self, class: &str) -> bool {
        self.class_chain().iter().any(|c| c == class)
    }

    /// Reads literal nodes back as plain values; other nodes stay nodes.
    pub fn from_node(node: &AstNode) -> Value {
        node.expr()
            .literal_value()
            .unwrap_or_else(|| Value::Node(node.clone()))
    }

    /// Converts a value back into syntax placed at `line`.
    pub fn to_node(&self, line: usize) -> Result<AstNode, KestrelError> {
        let expr = match self {
            Value::Nil => Expr::Primitive(Primitive::Nil),
            Value::Bool(true) => Expr::Primitive(Primitive::True),
            Value::Bool(false) => Expr::Primitive(Primitive::False),
            Value::Int(n) => Expr::Integer(*n),
            Value::Float(n) => Expr::Float(*n),
            Value::Str(s) => Expr::String(s.clone()),
            Value::Symbol(s) => Expr::Symbol(s.clone()),
            Value::List(items) => Expr::List(
                items
                    .iter()
                    .map(|v| v.to_node(line))
                    .collect::<Result<Vec<_>, _>>()?,
            ),
            Value::Node(node) => return Ok(node.clone()),
            Value::Undefined | Value::Object(_) => {
                return Err(err_msg!(ExpansionFailure, "not a node: {}", self))
            }
        };
        Ok(AstNode::new(expr, line))
    }

    // ------------------------------------------------------------------------
    // Display formatting helpers
    // ------------------------------------------------------------------------

    fn fmt_list(f: &mut fmt::Formatter<'_>, items: &[Value]) -> fmt::Result {
        write!(f, "[")?;
        for (i, item) in items.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}", item)?;
        }
        write!(f, "]")
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Undefined => write!(f, "undefined"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(n) => write!(f, "{:?}", n),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::Symbol(s) => write!(f, ":{}", s),
            Value::List(items) => Value::fmt_list(f, items),
            Value::Node(node) => write!(f, "'{}", node.pretty()),
            Value::Object(obj) => {
                write!(f, "#<{}>", obj.classes.first().map_or("Object", |c| c.as_str()))
            }
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(i64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<AstNode> for Value {
    fn from(node: AstNode) -> Self {
        Value::Node(node)
    }
}

// ============================================================================
// CLASS HIERARCHY
// ============================================================================

/// Superclass links for the classes kind patterns name. Built-in classes are
/// seeded here; hosts add theirs with [`declare_class`].
static SUPERCLASSES: Lazy<RwLock<HashMap<String, String>>> = Lazy::new(|| {
    let builtin = [
        ("Nil", "Object"),
        ("Undefined", "Object"),
        ("Boolean", "Object"),
        ("Numeric", "Object"),
        ("Integer", "Numeric"),
        ("Float", "Numeric"),
        ("String", "Object"),
        ("Symbol", "Object"),
        ("List", "Object"),
        ("Node", "Object"),
    ];
    RwLock::new(
        builtin
            .iter()
            .map(|(class, parent)| (class.to_string(), parent.to_string()))
            .collect(),
    )
});

/// Records `superclass` as the parent of `class`. Declare classes before
/// defining branches whose kind patterns name them; existing dispatch sets
/// keep the order they were built with.
pub fn declare_class(class: &str, superclass: &str) {
    log::trace!("class `{}` < `{}`", class, superclass);
    SUPERCLASSES
        .write()
        .insert(class.to_string(), superclass.to_string());
}

/// `class` and its superclasses, most specific first, ending in `Object`.
/// An undeclared class sits directly below `Object`.
pub fn ancestors(class: &str) -> Vec<String> {
    let table = SUPERCLASSES.read();
    let mut chain = vec![class.to_string()];
    let mut current = class.to_string();
    while current != "Object" {
        let parent = table.get(&current).cloned().unwrap_or_else(|| "Object".to_string());
        if chain.contains(&parent) {
            break;
        }
        chain.push(parent.clone());
        current = parent;
    }
    chain
}

/// Number of classes from `class` up to `Object`, inclusive. A subclass is
/// always deeper than its superclass.
pub fn class_depth(class: &str) -> usize {
    ancestors(class).len()
}
