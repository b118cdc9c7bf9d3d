//! Precision ranking and shape equivalence.
//!
//! Precision is a total preorder. Patterns fall into tiers (wildcards, class
//! tests and negative tests, structural patterns, exact values); within a
//! tier variants have a fixed rank, and two patterns of the same variant
//! compare structurally. Class tests rank by depth in the class hierarchy. Every step is lexicographic, so the order is
//! transitive.

use std::cmp::Ordering;

use crate::ast::value::class_depth;
use crate::ast::{AstNode, Expr};
use crate::patterns::{Pattern, Template};

impl Pattern {
    /// `Greater` means `self` is more specific than `other`.
    pub fn precision_cmp(&self, other: &Pattern) -> Ordering {
        let a = self.unnamed();
        let b = other.unnamed();
        a.rank()
            .cmp(&b.rank())
            .then_with(|| a.same_variant_cmp(b))
    }

    /// Structural identity ignoring the names patterns bind.
    pub fn shape_equivalent(&self, other: &Pattern) -> bool {
        match (self.unnamed(), other.unnamed()) {
            (Pattern::Wildcard(_), Pattern::Wildcard(_)) => true,
            (Pattern::Equality(a), Pattern::Equality(b)) => a == b,
            (Pattern::Kind(a), Pattern::Kind(b)) => a == b,
            (
                Pattern::List {
                    elements: ea,
                    splat: sa,
                },
                Pattern::List {
                    elements: eb,
                    splat: sb,
                },
            ) => {
                all_equivalent(ea, eb)
                    && match (sa, sb) {
                        (Some(a), Some(b)) => a.shape_equivalent(b),
                        (None, None) => true,
                        _ => false,
                    }
            }
            (Pattern::Splat(a), Pattern::Splat(b)) | (Pattern::Not(a), Pattern::Not(b)) => {
                a.shape_equivalent(b)
            }
            (Pattern::Quote(a), Pattern::Quote(b)) => a == b,
            (Pattern::QuasiQuote(a), Pattern::QuasiQuote(b)) => {
                same_skeleton(&a.node, &b.node, 1) && all_equivalent(&a.holes, &b.holes)
            }
            (
                Pattern::Attribute {
                    receiver: ra,
                    name: na,
                    arguments: aa,
                },
                Pattern::Attribute {
                    receiver: rb,
                    name: nb,
                    arguments: ab,
                },
            ) => ra == rb && na == nb && aa == ab,
            (Pattern::Instance { name: a, .. }, Pattern::Instance { name: b, .. }) => a == b,
            (Pattern::And(a1, a2), Pattern::And(b1, b2))
            | (Pattern::Or(a1, a2), Pattern::Or(b1, b2)) => {
                a1.shape_equivalent(b1) && a2.shape_equivalent(b2)
            }
            _ => false,
        }
    }

    fn unnamed(&self) -> &Pattern {
        match self {
            Pattern::Named(_, inner) => inner.unnamed(),
            other => other,
        }
    }

    /// (tier, rank within tier).
    fn rank(&self) -> (u8, u8) {
        match self {
            Pattern::Wildcard(_) | Pattern::Attribute { .. } | Pattern::Instance { .. } => (0, 0),
            Pattern::Named(_, inner) => inner.rank(),
            Pattern::Splat(inner) => inner.rank(),
            Pattern::Not(_) => (1, 0),
            Pattern::Or(_, _) => (1, 1),
            Pattern::Kind(_) => (1, 2),
            Pattern::And(_, _) => (2, 0),
            Pattern::List { .. } => (2, 1),
            Pattern::QuasiQuote(_) => (2, 2),
            Pattern::Quote(_) => (3, 0),
            Pattern::Equality(_) => (3, 1),
        }
    }

    fn same_variant_cmp(&self, other: &Pattern) -> Ordering {
        match (self, other) {
            (Pattern::Splat(a), Pattern::Splat(b)) => a.precision_cmp(b),
            (Pattern::Splat(a), b) => a.precision_cmp(b),
            (a, Pattern::Splat(b)) => a.precision_cmp(b),
            (
                Pattern::List {
                    elements: ea,
                    splat: sa,
                },
                Pattern::List {
                    elements: eb,
                    splat: sb,
                },
            ) => ea
                .len()
                .cmp(&eb.len())
                .then_with(|| sb.is_some().cmp(&sa.is_some()))
                .then_with(|| pairwise_cmp(ea, eb))
                .then_with(|| match (sa, sb) {
                    (Some(a), Some(b)) => a.precision_cmp(b),
                    _ => Ordering::Equal,
                }),
            (Pattern::QuasiQuote(a), Pattern::QuasiQuote(b)) => template_cmp(a, b),
            (Pattern::And(a1, a2), Pattern::And(b1, b2)) => {
                a1.precision_cmp(b1).then_with(|| a2.precision_cmp(b2))
            }
            (Pattern::Or(a1, a2), Pattern::Or(b1, b2)) => {
                a1.precision_cmp(b1).then_with(|| a2.precision_cmp(b2))
            }
            (Pattern::Not(a), Pattern::Not(b)) => b.precision_cmp(a),
            // Subclasses before superclasses; unrelated classes of equal
            // depth by name, so the order never depends on insertion.
            (Pattern::Kind(a), Pattern::Kind(b)) => class_depth(a)
                .cmp(&class_depth(b))
                .then_with(|| b.cmp(a)),
            _ => Ordering::Equal,
        }
    }
}

/// Lexicographic comparison of two pattern sequences, shorter prefix first.
pub fn pairwise_cmp(a: &[Pattern], b: &[Pattern]) -> Ordering {
    a.iter()
        .zip(b)
        .map(|(x, y)| x.precision_cmp(y))
        .find(|o| o.is_ne())
        .unwrap_or(Ordering::Equal)
}

fn all_equivalent(a: &[Pattern], b: &[Pattern]) -> bool {
    a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.shape_equivalent(y))
}

/// More concrete template nodes is more specific; then holes compare.
fn template_cmp(a: &Template, b: &Template) -> Ordering {
    concrete_size(&a.node, 1)
        .cmp(&concrete_size(&b.node, 1))
        .then_with(|| pairwise_cmp(&a.holes, &b.holes))
}

fn concrete_size(node: &AstNode, depth: usize) -> usize {
    match node.expr() {
        Expr::Unquote(_) if depth == 1 => 0,
        Expr::Unquote(inner) => 1 + concrete_size(inner, depth - 1),
        Expr::QuasiQuote(inner) => 1 + concrete_size(inner, depth + 1),
        expr => {
            1 + expr
                .children()
                .into_iter()
                .map(|c| concrete_size(c, depth))
                .sum::<usize>()
        }
    }
}

/// Same tree, treating every depth-1 hole as equal to every other.
fn same_skeleton(a: &AstNode, b: &AstNode, depth: usize) -> bool {
    match (a.expr(), b.expr()) {
        (Expr::Unquote(_), Expr::Unquote(_)) if depth == 1 => true,
        (Expr::Unquote(x), Expr::Unquote(y)) => same_skeleton(x, y, depth - 1),
        (Expr::QuasiQuote(x), Expr::QuasiQuote(y)) => same_skeleton(x, y, depth + 1),
        (x, y) => {
            x.same_head(y)
                && x
                    .children()
                    .into_iter()
                    .zip(y.children())
                    .all(|(cx, cy)| same_skeleton(cx, cy, depth))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::*;

    fn ordered(patterns: &[Pattern]) {
        for pair in patterns.windows(2) {
            assert_eq!(
                pair[0].precision_cmp(&pair[1]),
                Ordering::Less,
                "{} should rank below {}",
                pair[0],
                pair[1]
            );
            assert_eq!(pair[1].precision_cmp(&pair[0]), Ordering::Greater);
        }
    }

    #[test]
    fn tiers_rank_wildcards_lowest_and_values_highest() {
        ordered(&[
            Pattern::wildcard(),
            Pattern::kind("Integer"),
            Pattern::list(vec![Pattern::wildcard()], None),
            Pattern::literal(0),
        ]);
    }

    #[test]
    fn subclasses_rank_above_superclasses() {
        ordered(&[
            Pattern::kind("Object"),
            Pattern::kind("Numeric"),
            Pattern::kind("Integer"),
        ]);
        let a = Pattern::kind("String");
        let b = Pattern::kind("Symbol");
        assert_ne!(a.precision_cmp(&b), Ordering::Equal);
        assert_eq!(a.precision_cmp(&b), b.precision_cmp(&a).reverse());
    }

    #[test]
    fn names_do_not_affect_precision() {
        let a = Pattern::named("n", Pattern::kind("Integer"));
        assert_eq!(a.precision_cmp(&Pattern::kind("Integer")), Ordering::Equal);
        assert!(a.shape_equivalent(&Pattern::kind("Integer")));
        assert!(Pattern::binding("x").shape_equivalent(&Pattern::binding("y")));
        assert!(!Pattern::literal(0).shape_equivalent(&Pattern::literal(1)));
    }

    #[test]
    fn longer_lists_and_fixed_lists_rank_higher() {
        ordered(&[
            Pattern::list(vec![Pattern::wildcard()], Some(Pattern::wildcard())),
            Pattern::list(vec![Pattern::wildcard()], None),
            Pattern::list(vec![Pattern::wildcard(), Pattern::wildcard()], None),
            Pattern::list(vec![Pattern::literal(1), Pattern::wildcard()], None),
        ]);
    }

    #[test]
    fn concrete_templates_rank_higher() {
        let loose = Pattern::quasi(call("f", vec![unquote(word("x", 1), 1)], 1)).unwrap();
        let tight = Pattern::quasi(call("f", vec![int(0, 1)], 1)).unwrap();
        ordered(&[loose.clone(), tight]);
        let renamed = Pattern::quasi(call("f", vec![unquote(word("y", 1), 1)], 1)).unwrap();
        assert!(loose.shape_equivalent(&renamed));
    }
}
