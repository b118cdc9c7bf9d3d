//! Macro rule storage.
//!
//! Rules for one syntactic shape form a dispatch set whose receiver
//! patterns are matched against the node being expanded. Inserting a rule
//! with a precision-equal, shape-equivalent pattern replaces the old rule,
//! so re-running a macro definition updates it in place.

use crate::ast::{AstNode, Expr, ShapeKey};
use crate::dispatch::{Branch, Insertion};
use crate::macros::types::Producer;
use crate::patterns::Pattern;
use crate::registry::SetRegistry;
use crate::{err_ctx, KestrelError};

/// Rule sets by node shape.
pub type MacroRegistry = SetRegistry<ShapeKey, Producer>;

/// A rule as a dispatch branch: the pattern tests the node itself.
pub fn rule(pattern: Pattern, producer: Producer) -> Branch<Producer> {
    Branch::new(producer).receiver(pattern)
}

/// Derives the key and template pattern of a rule written as an example
/// node, e.g. `unless(~cond) ~body`. Holes become bindings.
///
/// The example may itself be a quasi-quote. Operator runs must already be
/// resolved, since the key depends on the operator.
pub fn macro_pattern(shape: &AstNode) -> Result<(ShapeKey, Pattern), KestrelError> {
    let shape = match shape.expr() {
        Expr::QuasiQuote(inner) => inner,
        _ => shape,
    };
    match shape.expr() {
        Expr::Operators(_) => Err(err_ctx!(
            InvalidPattern,
            format!("macro shape `{}` has unresolved operators", shape.pretty()),
            shape.line,
            "resolve the shape against the operator table first"
        )),
        Expr::Unquote(_) => Err(err_ctx!(
            InvalidPattern,
            format!("macro shape `{}` has no fixed head", shape.pretty()),
            shape.line
        )),
        _ => Ok((shape.shape_key(), Pattern::quasi(shape.clone())?)),
    }
}

/// Registers a rule from an example node.
pub fn define(
    registry: &mut MacroRegistry,
    shape: &AstNode,
    producer: Producer,
) -> Result<Insertion, KestrelError> {
    let (key, pattern) = macro_pattern(shape)?;
    Ok(registry.insert(key, rule(pattern, producer)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::*;
    use crate::ast::value::Value;
    use crate::ast::NodeKind;

    #[test]
    fn shape_key_comes_from_the_example() {
        let (key, pattern) = macro_pattern(&call("double", vec![unquote(word("x", 1), 1)], 1)).unwrap();
        assert_eq!(key, ShapeKey::named(NodeKind::Call, "double"));
        assert_eq!(pattern.names(), vec!["x".to_string()]);
    }

    #[test]
    fn redefinition_replaces_the_rule() {
        let mut registry = MacroRegistry::new();
        let shape = call("f", vec![unquote(word("x", 1), 1)], 1);
        let first = define(&mut registry, &shape, Producer::template(word("one", 1))).unwrap();
        let second = define(&mut registry, &shape, Producer::template(word("two", 1))).unwrap();
        assert_eq!(first, Insertion::Inserted(0));
        assert_eq!(second, Insertion::Replaced(0));

        let set = registry.get(&ShapeKey::named(NodeKind::Call, "f")).unwrap();
        assert_eq!(set.len(), 1);
        let subject = Value::Node(call("f", vec![int(1, 1)], 1));
        let selected = set.select(&subject, &[]).unwrap().unwrap();
        assert!(matches!(&selected.branch.body, Producer::Template(n) if n.pretty() == "two"));
    }

    #[test]
    fn more_specific_rules_are_tried_first() {
        let mut registry = MacroRegistry::new();
        let general = call("f", vec![unquote(word("x", 1), 1)], 1);
        let zero = call("f", vec![unquote(int(0, 1), 1)], 1);
        define(&mut registry, &general, Producer::template(word("general", 1))).unwrap();
        define(&mut registry, &zero, Producer::template(word("zero", 1))).unwrap();

        let set = registry.get(&ShapeKey::named(NodeKind::Call, "f")).unwrap();
        let pick = |arg: i64| {
            let subject = Value::Node(call("f", vec![int(arg, 1)], 1));
            match &set.select(&subject, &[]).unwrap().unwrap().branch.body {
                Producer::Template(n) => n.pretty(),
                Producer::Native(_) => String::new(),
            }
        };
        assert_eq!(pick(0), "zero");
        assert_eq!(pick(3), "general");
    }

    #[test]
    fn unresolved_shape_is_rejected() {
        let shape = run(word("a", 1), vec![("+", word("b", 1))], 1);
        assert!(matches!(
            macro_pattern(&shape),
            Err(KestrelError::InvalidPattern { .. })
        ));
    }
}
