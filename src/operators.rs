//! Operator table and run resolution.
//!
//! The reader cannot know operator precedences: they are declared while the
//! program compiles. It hands over flat runs (`a + b * c`) which this module
//! turns into [`Expr::Infix`], [`Expr::Prefix`] and [`Expr::Postfix`] trees
//! against the table's state at the time of resolution.
//!
//! Resolution happens in two passes. The first validates every operator and
//! folds operand-less operators into prefix/postfix applications, producing
//! `operand (binop operand)*`. The second is precedence climbing over an
//! operand stack and an operator stack.

use std::sync::Arc;

use im::HashMap;
use log::trace;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::ast::builder::self_ref;
use crate::ast::{AstNode, Expr, OperatorRun, RunLink};
use crate::{err_ctx, KestrelError};

// ============================================================================
// OPERATOR DEFINITIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Fixity {
    #[default]
    Infix,
    Prefix,
    Postfix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Associativity {
    #[default]
    Left,
    Right,
    /// Treated as left when two meet at equal precedence.
    None,
}

/// One operator table entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperatorDef {
    pub name: String,
    #[serde(default)]
    pub fixity: Fixity,
    #[serde(default)]
    pub precedence: i32,
    #[serde(default, rename = "associativity")]
    pub assoc: Associativity,
    /// A leading occurrence with no left operand targets the ambient self.
    #[serde(default)]
    pub private: bool,
}

impl OperatorDef {
    pub fn infix(name: &str, precedence: i32, assoc: Associativity) -> Self {
        Self {
            name: name.to_string(),
            fixity: Fixity::Infix,
            precedence,
            assoc,
            private: false,
        }
    }

    pub fn prefix(name: &str) -> Self {
        Self {
            name: name.to_string(),
            fixity: Fixity::Prefix,
            precedence: 0,
            assoc: Associativity::None,
            private: false,
        }
    }

    pub fn postfix(name: &str) -> Self {
        Self {
            fixity: Fixity::Postfix,
            ..Self::prefix(name)
        }
    }

    pub fn private(mut self) -> Self {
        self.private = true;
        self
    }
}

// ============================================================================
// OPERATOR TABLE
// ============================================================================

/// Operator name and fixity to definition. Cloning is O(1); declarations
/// replace whole entries.
#[derive(Debug, Clone, Default)]
pub struct OperatorTable {
    entries: HashMap<(String, Fixity), Arc<OperatorDef>>,
}

static STANDARD: Lazy<OperatorTable> = Lazy::new(|| {
    use Associativity::{Left, Right};
    let mut table = OperatorTable::new();
    for (names, precedence, assoc) in [
        (&["->"][..], 5, Right),
        (&["="][..], 10, Right),
        (&[":"][..], 15, Right),
        (&["||"][..], 20, Left),
        (&["|"][..], 25, Left),
        (&["&&"][..], 30, Left),
        (&["&"][..], 35, Left),
        (&["==", "!=", "<", ">", "<=", ">="][..], 40, Associativity::None),
        (&["+", "-"][..], 60, Left),
        (&["*", "/", "%"][..], 70, Left),
        (&["**"][..], 80, Right),
    ] {
        for name in names {
            table.declare(OperatorDef::infix(name, precedence, assoc));
        }
    }
    table.declare(OperatorDef::prefix("-"));
    table.declare(OperatorDef::prefix("!"));
    table.declare(OperatorDef::prefix("@"));
    table
});

impl OperatorTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arithmetic, comparison, logic and pattern combinator operators.
    pub fn standard() -> Self {
        STANDARD.clone()
    }

    /// Reads a JSON array of operator definitions.
    ///
    /// ```rust
    /// use kestrel::operators::{Fixity, OperatorTable};
    /// let table = OperatorTable::from_json(
    ///     r#"[{"name": "<>", "precedence": 50, "associativity": "right"}]"#,
    /// ).unwrap();
    /// assert_eq!(table.get("<>", Fixity::Infix).unwrap().precedence, 50);
    /// ```
    pub fn from_json(text: &str) -> Result<Self, KestrelError> {
        let defs: Vec<OperatorDef> = serde_json::from_str(text).map_err(|e| {
            KestrelError::Config {
                message: format!("invalid operator table: {}", e),
                ctx: crate::ErrorContext::none(),
                source: Some(Box::new(e)),
            }
        })?;
        let mut table = Self::new();
        for def in defs {
            table.declare(def);
        }
        Ok(table)
    }

    /// Adds or replaces the entry for the definition's name and fixity.
    pub fn declare(&mut self, def: OperatorDef) {
        trace!(
            "declare {:?} operator `{}` ({}, {:?})",
            def.fixity,
            def.name,
            def.precedence,
            def.assoc
        );
        self.entries
            .insert((def.name.clone(), def.fixity), Arc::new(def));
    }

    pub fn get(&self, name: &str, fixity: Fixity) -> Option<&Arc<OperatorDef>> {
        self.entries.get(&(name.to_string(), fixity))
    }

    pub fn is_declared(&self, name: &str) -> bool {
        [Fixity::Infix, Fixity::Prefix, Fixity::Postfix]
            .into_iter()
            .any(|f| self.get(name, f).is_some())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn definitions(&self) -> impl Iterator<Item = &Arc<OperatorDef>> {
        self.entries.values()
    }
}

// ============================================================================
// RESOLUTION
// ============================================================================

/// A binary operator waiting on the operator stack.
struct Pending {
    def: Arc<OperatorDef>,
    private: bool,
    line: usize,
}

/// Resolves `head link*` into a single tree.
///
/// An empty run returns the head unchanged. Operands are taken as given;
/// use [`resolve_all`] to resolve nested runs too.
///
/// # Examples
///
/// ```rust
/// use kestrel::ast::builder::int;
/// use kestrel::ast::RunLink;
/// use kestrel::operators::{resolve, Associativity, OperatorDef, OperatorTable};
///
/// let mut table = OperatorTable::new();
/// table.declare(OperatorDef::infix("+", 10, Associativity::Left));
/// table.declare(OperatorDef::infix("*", 20, Associativity::Left));
/// let links = vec![
///     RunLink { operator: "*".into(), operand: Some(int(3, 1)) },
///     RunLink { operator: "+".into(), operand: Some(int(4, 1)) },
/// ];
/// let tree = resolve(&table, Some(int(2, 1)), &links, 1).unwrap();
/// assert_eq!(tree.pretty(), "((2 * 3) + 4)");
/// ```
pub fn resolve(
    table: &OperatorTable,
    head: Option<AstNode>,
    links: &[RunLink],
    line: usize,
) -> Result<AstNode, KestrelError> {
    for link in links {
        if !table.is_declared(&link.operator) {
            return Err(KestrelError::unknown_operator(
                &link.operator,
                link.operand.as_ref().map_or(line, |o| o.line),
            ));
        }
    }
    let (first, rest) = fold(table, head, links, line)?;
    Ok(climb(first, rest))
}

/// Resolves a node if it is an operator run.
pub fn resolve_node(table: &OperatorTable, node: &AstNode) -> Result<AstNode, KestrelError> {
    match node.expr() {
        Expr::Operators(OperatorRun { head, links }) => {
            resolve(table, head.clone(), links, node.line)
        }
        _ => Ok(node.clone()),
    }
}

/// Resolves every run in the tree, innermost first. Quoted trees are left
/// alone.
pub fn resolve_all(table: &OperatorTable, node: &AstNode) -> Result<AstNode, KestrelError> {
    match node.expr() {
        Expr::Quote(_) => Ok(node.clone()),
        _ => {
            let inner = node.map_children(|c| resolve_all(table, c))?;
            resolve_node(table, &inner)
        }
    }
}

/// Folds operand-less operators so what remains alternates strictly between
/// operands and binary operators.
fn fold(
    table: &OperatorTable,
    head: Option<AstNode>,
    links: &[RunLink],
    line: usize,
) -> Result<(AstNode, Vec<(Pending, AstNode)>), KestrelError> {
    let mut links = links.iter().peekable();
    let mut current = head;
    let mut leading_private = false;

    if current.is_none() {
        if let Some(def) = links
            .peek()
            .and_then(|l| table.get(&l.operator, Fixity::Infix))
            .filter(|d| d.private)
        {
            trace!("private operator `{}` targets self", def.name);
            current = Some(self_ref(line));
            leading_private = true;
        }
    }

    let mut prefixes: Vec<String> = Vec::new();
    let mut binop: Option<Pending> = None;
    let mut out: Vec<(Pending, AstNode)> = Vec::new();
    let mut first: Option<AstNode> = None;

    for link in links {
        let op = &link.operator;
        let expecting_operator = current.is_some();

        if expecting_operator {
            let operand_line = current.as_ref().map_or(line, |c| c.line);
            if link.operand.is_none() && table.get(op, Fixity::Postfix).is_some() {
                current = current.map(|c| {
                    let at = c.line;
                    AstNode::new(
                        Expr::Postfix {
                            operator: op.clone(),
                            operand: c,
                        },
                        at,
                    )
                });
                continue;
            }
            let def = table.get(op, Fixity::Infix).ok_or_else(|| {
                KestrelError::unknown_operator(op.as_str(), operand_line)
            })?;
            let private = leading_private && first.is_none() && binop.is_none();
            let left = current.take();
            match binop.take() {
                None => first = left,
                Some(prev) => {
                    if let Some(l) = left {
                        out.push((prev, l));
                    }
                }
            }
            binop = Some(Pending {
                def: Arc::clone(def),
                private,
                line: operand_line,
            });
        } else if table.get(op, Fixity::Prefix).is_some() {
            prefixes.push(op.clone());
        } else {
            return Err(KestrelError::unknown_operator(
                op.as_str(),
                link.operand.as_ref().map_or(line, |o| o.line),
            ));
        }

        if let Some(operand) = &link.operand {
            let mut node = operand.clone();
            while let Some(prefix) = prefixes.pop() {
                let at = node.line;
                node = AstNode::new(
                    Expr::Prefix {
                        operator: prefix,
                        operand: node,
                    },
                    at,
                );
            }
            current = Some(node);
        }
    }

    if let Some(dangling) = prefixes.last() {
        return Err(err_ctx!(
            Parse,
            format!("operator `{}` is missing its operand", dangling),
            line
        ));
    }
    let last = current.ok_or_else(|| {
        err_ctx!(
            Parse,
            match &binop {
                Some(p) => format!("operator `{}` is missing its right operand", p.def.name),
                None => "empty operator run".to_string(),
            },
            line
        )
    })?;
    match binop {
        None => Ok((first.unwrap_or(last), out)),
        Some(prev) => {
            out.push((prev, last));
            match first {
                Some(f) => Ok((f, out)),
                None => Err(err_ctx!(Internal, "operator run lost its head", line)),
            }
        }
    }
}

/// Precedence climbing over the folded run.
fn climb(first: AstNode, rest: Vec<(Pending, AstNode)>) -> AstNode {
    let mut operands: Vec<AstNode> = vec![first];
    let mut operators: Vec<Pending> = Vec::new();

    for (op, operand) in rest {
        while let Some(top) = operators.last() {
            let outranks = top.def.precedence > op.def.precedence
                || (top.def.precedence == op.def.precedence
                    && op.def.assoc != Associativity::Right);
            if !outranks {
                break;
            }
            reduce(&mut operands, &mut operators);
        }
        operators.push(op);
        operands.push(operand);
    }
    while !operators.is_empty() {
        reduce(&mut operands, &mut operators);
    }
    // Each reduction pops two operands and pushes one, so exactly one remains.
    operands.remove(0)
}

fn reduce(operands: &mut Vec<AstNode>, operators: &mut Vec<Pending>) {
    let (Some(op), Some(right), Some(left)) = (operators.pop(), operands.pop(), operands.pop())
    else {
        return;
    };
    trace!("reduce `{}` at line {}", op.def.name, op.line);
    let line = left.line;
    operands.push(AstNode::new(
        Expr::Infix {
            operator: op.def.name.clone(),
            left,
            right,
            private: op.private,
        },
        line,
    ));
}
