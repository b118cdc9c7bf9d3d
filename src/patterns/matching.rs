//! Structural tests and binding extraction.

use indexmap::IndexMap;

use crate::ast::value::Value;
use crate::ast::{AstNode, Expr};
use crate::patterns::{Pattern, Template};
use crate::{err_ctx, KestrelError};

/// A slot write requested by an attribute pattern. The host performs it
/// after the whole match succeeds.
#[derive(Debug, Clone, PartialEq)]
pub struct SlotWrite {
    pub receiver: AstNode,
    /// Setter name, e.g. `x=`, or `@x` for an instance variable.
    pub setter: String,
    pub arguments: Vec<AstNode>,
    pub value: Value,
}

/// Names bound by a successful match, in binding order, plus pending writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Bindings {
    names: IndexMap<String, Value>,
    writes: Vec<SlotWrite>,
}

impl Bindings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.names.get(name)
    }

    pub fn insert(&mut self, name: &str, value: Value) {
        self.names.insert(name.to_string(), value);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.names.iter()
    }

    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn writes(&self) -> &[SlotWrite] {
        &self.writes
    }

    pub fn extend(&mut self, other: Bindings) {
        self.names.extend(other.names);
        self.writes.extend(other.writes);
    }
}

impl Pattern {
    /// Pure structural test.
    pub fn matches(&self, value: &Value) -> bool {
        self.bind(value).is_some()
    }

    /// Tests the value and returns the bindings on success.
    pub fn bind(&self, value: &Value) -> Option<Bindings> {
        let mut out = Bindings::new();
        self.match_into(value, &mut out).then_some(out)
    }

    /// Like [`Pattern::bind`], but a failed match is a catchable
    /// `PatternMismatch` pointing at `line`.
    pub fn bind_or_raise(&self, value: &Value, line: usize) -> Result<Bindings, KestrelError> {
        self.bind(value).ok_or_else(|| {
            err_ctx!(
                PatternMismatch,
                format!("`{}` does not match {}", self, value),
                line
            )
        })
    }

    /// Matches into `out`. On failure `out` may hold partial bindings; callers
    /// discard it.
    pub(crate) fn match_into(&self, value: &Value, out: &mut Bindings) -> bool {
        match self {
            Pattern::Wildcard(None) => true,
            Pattern::Wildcard(Some(name)) => {
                out.insert(name, value.clone());
                true
            }
            Pattern::Named(name, inner) => {
                if !inner.match_into(value, out) {
                    return false;
                }
                out.insert(name, value.clone());
                true
            }
            Pattern::Equality(expected) => equals_literal(expected, value),
            Pattern::Kind(class) => value.is_a(class),
            Pattern::List { elements, splat } => {
                let Some(items) = value.as_list() else {
                    return false;
                };
                match_sequence(elements, splat.as_deref(), items, out)
            }
            Pattern::Splat(inner) => match value {
                Value::List(_) => inner.match_into(value, out),
                _ => false,
            },
            Pattern::Quote(expected) => as_node(value).is_some_and(|n| n == *expected),
            Pattern::QuasiQuote(template) => match as_node(value) {
                Some(node) => template.match_node(&node, out),
                None => false,
            },
            Pattern::Attribute {
                receiver,
                name,
                arguments,
            } => {
                out.writes.push(SlotWrite {
                    receiver: receiver.clone(),
                    setter: format!("{}=", name),
                    arguments: arguments.clone(),
                    value: value.clone(),
                });
                true
            }
            Pattern::Instance { receiver, name } => {
                out.writes.push(SlotWrite {
                    receiver: receiver.clone(),
                    setter: format!("@{}", name),
                    arguments: Vec::new(),
                    value: value.clone(),
                });
                true
            }
            Pattern::And(a, b) => a.match_into(value, out) && b.match_into(value, out),
            Pattern::Or(a, b) => {
                let mut left = Bindings::new();
                if a.match_into(value, &mut left) {
                    out.extend(left);
                    return true;
                }
                b.match_into(value, out)
            }
            Pattern::Not(inner) => !inner.matches(value),
        }
    }
}

fn equals_literal(expected: &Value, value: &Value) -> bool {
    match value {
        Value::Node(node) => node
            .expr()
            .literal_value()
            .is_some_and(|v| v == *expected),
        other => other == expected,
    }
}

fn as_node(value: &Value) -> Option<AstNode> {
    match value {
        Value::Node(node) => Some(node.clone()),
        other => other.to_node(0).ok(),
    }
}

fn match_sequence(
    elements: &[Pattern],
    splat: Option<&Pattern>,
    items: &[Value],
    out: &mut Bindings,
) -> bool {
    let fixed = elements.len();
    let length_ok = match splat {
        Some(_) => items.len() >= fixed,
        None => items.len() == fixed,
    };
    if !length_ok {
        return false;
    }
    if !elements
        .iter()
        .zip(items)
        .all(|(p, v)| p.match_into(v, out))
    {
        return false;
    }
    match splat {
        Some(rest) => rest.match_into(&Value::List(items[fixed..].to_vec()), out),
        None => true,
    }
}

// ============================================================================
// TEMPLATE MATCHING
// ============================================================================

impl Template {
    pub(crate) fn match_node(&self, node: &AstNode, out: &mut Bindings) -> bool {
        let mut holes = self.holes.iter();
        match_template(&self.node, node, 1, &mut holes, out)
    }
}

type Holes<'a> = std::slice::Iter<'a, Pattern>;

/// A trailing `~*xs` in a sequence, at depth 1.
fn trailing_splat_hole(seq: &[AstNode], depth: usize) -> bool {
    depth == 1
        && seq.last().is_some_and(|last| match last.expr() {
            Expr::Unquote(inner) => matches!(inner.expr(), Expr::Splat(_)),
            _ => false,
        })
}

fn match_hole(holes: &mut Holes<'_>, value: Value, out: &mut Bindings) -> bool {
    holes.next().is_some_and(|hole| hole.match_into(&value, out))
}

fn match_template(
    tpl: &AstNode,
    node: &AstNode,
    depth: usize,
    holes: &mut Holes<'_>,
    out: &mut Bindings,
) -> bool {
    match (tpl.expr(), node.expr()) {
        (Expr::Unquote(_), _) if depth == 1 => match_hole(holes, Value::from_node(node), out),
        (Expr::Unquote(t), Expr::Unquote(n)) => match_template(t, n, depth - 1, holes, out),
        (Expr::QuasiQuote(t), Expr::QuasiQuote(n)) => {
            match_template(t, n, depth + 1, holes, out)
        }
        (Expr::List(ts), Expr::List(ns)) => match_seq(ts, ns, depth, holes, out),
        (
            Expr::Block {
                params: tp,
                body: tb,
            },
            Expr::Block {
                params: np,
                body: nb,
            },
        ) => match_seq(tp, np, depth, holes, out) && match_seq(tb, nb, depth, holes, out),
        (
            Expr::Call {
                name: tn,
                args: ta,
                block: tb,
            },
            Expr::Call {
                name: nn,
                args: na,
                block: nb,
            },
        ) => {
            tn == nn
                && tb.is_some() == nb.is_some()
                && match_seq(ta, na, depth, holes, out)
                && match_opt(tb, nb, depth, holes, out)
        }
        (
            Expr::Send {
                receiver: tr,
                name: tn,
                args: ta,
                block: tb,
            },
            Expr::Send {
                receiver: nr,
                name: nn,
                args: na,
                block: nb,
            },
        ) => {
            tn == nn
                && tr.is_some() == nr.is_some()
                && tb.is_some() == nb.is_some()
                && match_opt(tr, nr, depth, holes, out)
                && match_seq(ta, na, depth, holes, out)
                && match_opt(tb, nb, depth, holes, out)
        }
        (t, n) => {
            t.same_head(n)
                && t
                    .children()
                    .into_iter()
                    .zip(n.children())
                    .all(|(tc, nc)| match_template(tc, nc, depth, holes, out))
        }
    }
}

fn match_opt(
    tpl: &Option<AstNode>,
    node: &Option<AstNode>,
    depth: usize,
    holes: &mut Holes<'_>,
    out: &mut Bindings,
) -> bool {
    match (tpl, node) {
        (Some(t), Some(n)) => match_template(t, n, depth, holes, out),
        (None, None) => true,
        _ => false,
    }
}

fn match_seq(
    tpls: &[AstNode],
    nodes: &[AstNode],
    depth: usize,
    holes: &mut Holes<'_>,
    out: &mut Bindings,
) -> bool {
    if !trailing_splat_hole(tpls, depth) {
        return tpls.len() == nodes.len()
            && tpls
                .iter()
                .zip(nodes)
                .all(|(t, n)| match_template(t, n, depth, holes, out));
    }
    let fixed = tpls.len() - 1;
    if nodes.len() < fixed {
        return false;
    }
    if !tpls[..fixed]
        .iter()
        .zip(nodes)
        .all(|(t, n)| match_template(t, n, depth, holes, out))
    {
        return false;
    }
    let rest = nodes[fixed..].iter().map(Value::from_node).collect();
    match_hole(holes, Value::List(rest), out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::*;
    use crate::ast::value::Object;

    fn node(n: AstNode) -> Value {
        Value::Node(n)
    }

    #[test]
    fn equality_accepts_literal_nodes() {
        let zero = Pattern::literal(0);
        assert!(zero.matches(&Value::Int(0)));
        assert!(zero.matches(&node(int(0, 1))));
        assert!(!zero.matches(&Value::Int(5)));
        assert!(!zero.matches(&Value::Str("0".into())));
    }

    #[test]
    fn list_patterns_bind_rest() {
        let pat = Pattern::list(vec![Pattern::binding("a")], Some(Pattern::binding("rest")));
        let b = pat
            .bind(&Value::List(vec![1.into(), 2.into(), 3.into()]))
            .unwrap();
        assert_eq!(b.get("a"), Some(&Value::Int(1)));
        assert_eq!(b.get("rest"), Some(&Value::List(vec![2.into(), 3.into()])));
        assert!(!pat.matches(&Value::List(vec![])));
    }

    #[test]
    fn combinators() {
        let int_not_zero = Pattern::And(
            Box::new(Pattern::kind("Integer")),
            Box::new(Pattern::Not(Box::new(Pattern::literal(0)))),
        );
        assert!(int_not_zero.matches(&Value::Int(3)));
        assert!(!int_not_zero.matches(&Value::Int(0)));
        let either = Pattern::Or(
            Box::new(Pattern::named("n", Pattern::kind("Integer"))),
            Box::new(Pattern::named("n", Pattern::kind("String"))),
        );
        assert_eq!(either.bind(&"hi".into()).unwrap().get("n"), Some(&"hi".into()));
    }

    #[test]
    fn kind_follows_object_classes() {
        let p = Value::Object(Object::new(["Point"]));
        assert!(Pattern::kind("Point").matches(&p));
        assert!(Pattern::kind("Object").matches(&p));
        assert!(!Pattern::kind("Integer").matches(&p));
    }

    #[test]
    fn attribute_records_a_write() {
        let pat = Pattern::Attribute {
            receiver: word("p", 1),
            name: "x".into(),
            arguments: vec![],
        };
        let b = pat.bind(&Value::Int(4)).unwrap();
        assert!(b.is_empty());
        assert_eq!(b.writes()[0].setter, "x=");
        assert_eq!(b.writes()[0].value, Value::Int(4));
    }

    #[test]
    fn instance_patterns_write_the_receiver() {
        let pat = Pattern::instance("count", 2);
        let b = pat.bind(&Value::Int(7)).unwrap();
        assert!(b.is_empty());
        assert_eq!(b.writes()[0].setter, "@count");
        assert_eq!(b.writes()[0].receiver.pretty(), "self");
        assert_eq!(b.writes()[0].value, Value::Int(7));
        assert!(pat.is_wildcard());
        assert_eq!(pat.to_string(), "@count");
    }

    #[test]
    fn template_holes_bind_subtrees() {
        let pat = Pattern::quasi(call("double", vec![unquote(word("x", 1), 1)], 1)).unwrap();
        let b = pat.bind(&node(call("double", vec![int(5, 2)], 2))).unwrap();
        assert_eq!(b.get("x"), Some(&Value::Int(5)));
        let arg = infix("+", int(1, 2), int(2, 2), 2);
        let b = pat.bind(&node(call("double", vec![arg.clone()], 2))).unwrap();
        assert_eq!(b.get("x"), Some(&Value::Node(arg)));
        assert!(!pat.matches(&node(call("triple", vec![int(5, 2)], 2))));
        assert!(!pat.matches(&node(call("double", vec![], 2))));
    }

    #[test]
    fn template_splat_hole_takes_remaining_arguments() {
        let tpl = call(
            "f",
            vec![unquote(word("a", 1), 1), unquote(splat(word("rest", 1), 1), 1)],
            1,
        );
        let pat = Pattern::quasi(tpl).unwrap();
        let b = pat
            .bind(&node(call("f", vec![int(1, 1), int(2, 1), int(3, 1)], 1)))
            .unwrap();
        assert_eq!(b.get("a"), Some(&Value::Int(1)));
        assert_eq!(b.get("rest"), Some(&Value::List(vec![2.into(), 3.into()])));
        let b = pat.bind(&node(call("f", vec![int(1, 1)], 1))).unwrap();
        assert_eq!(b.get("rest"), Some(&Value::List(vec![])));
    }

    #[test]
    fn bind_or_raise_is_a_pattern_mismatch() {
        let err = Pattern::literal(1).bind_or_raise(&Value::Int(2), 7).unwrap_err();
        assert!(matches!(err, KestrelError::PatternMismatch { .. }));
        assert!(err.error_type().is_catchable());
    }
}
