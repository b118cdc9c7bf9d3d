//! Quote, quasi-quote and unquote.
//!
//! A quoted node is an opaque literal: expansion never looks inside it. A
//! quasi-quoted node is a template. Instantiating it walks the template
//! starting at depth 1; nested quasi-quotes raise the depth, unquotes lower
//! it, and an unquote reached at depth 1 is a hole whose contents are handed
//! to the caller's `fill` function. The depth is passed by value, so sibling
//! sub-trees never observe each other's bookkeeping.
//!
//! Inside a sequence (list items, call and send arguments, block params and
//! body) a hole of the form `~*expr` splices: when `fill` returns a list
//! node, its items replace the hole.

use crate::ast::{AstNode, Expr};
use crate::KestrelError;

/// The opaque literal wrapping `node`.
pub fn quote(node: AstNode) -> AstNode {
    let line = node.line;
    AstNode::new(Expr::Quote(node), line)
}

/// The template wrapping `node`.
pub fn quasi_quote(node: AstNode) -> AstNode {
    let line = node.line;
    AstNode::new(Expr::QuasiQuote(node), line)
}

/// The contents of a quote, if `node` is one.
pub fn unquoted_literal(node: &AstNode) -> Option<&AstNode> {
    match node.expr() {
        Expr::Quote(inner) => Some(inner),
        _ => None,
    }
}

/// Instantiates the body of a quasi-quote.
///
/// `template` is the node *inside* the quasi-quote. Holes are replaced by
/// `fill(hole_contents)`; everything else is rebuilt around them.
///
/// # Examples
///
/// ```rust
/// use kestrel::ast::builder::{call, int, unquote, word};
/// use kestrel::quotation::instantiate;
///
/// let tpl = call("f", vec![unquote(word("x", 1), 1)], 1);
/// let out = instantiate(&tpl, &mut |_hole| Ok(int(7, 1))).unwrap();
/// assert_eq!(out.pretty(), "f(7)");
/// ```
pub fn instantiate<F>(template: &AstNode, fill: &mut F) -> Result<AstNode, KestrelError>
where
    F: FnMut(&AstNode) -> Result<AstNode, KestrelError>,
{
    walk(template, 1, fill)
}

fn walk<F>(node: &AstNode, depth: usize, fill: &mut F) -> Result<AstNode, KestrelError>
where
    F: FnMut(&AstNode) -> Result<AstNode, KestrelError>,
{
    match node.expr() {
        Expr::Unquote(inner) if depth == 1 => match inner.expr() {
            Expr::Splat(spliced) => fill(spliced),
            _ => fill(inner),
        },
        Expr::Unquote(inner) => Ok(AstNode::new(
            Expr::Unquote(walk(inner, depth - 1, fill)?),
            node.line,
        )),
        Expr::QuasiQuote(inner) => Ok(AstNode::new(
            Expr::QuasiQuote(walk(inner, depth + 1, fill)?),
            node.line,
        )),
        Expr::List(items) => Ok(AstNode::new(
            Expr::List(walk_seq(items, depth, fill)?),
            node.line,
        )),
        Expr::Block { params, body } => Ok(AstNode::new(
            Expr::Block {
                params: walk_seq(params, depth, fill)?,
                body: walk_seq(body, depth, fill)?,
            },
            node.line,
        )),
        Expr::Call { name, args, block } => Ok(AstNode::new(
            Expr::Call {
                name: name.clone(),
                args: walk_seq(args, depth, fill)?,
                block: walk_opt(block, depth, fill)?,
            },
            node.line,
        )),
        Expr::Send {
            receiver,
            name,
            args,
            block,
        } => Ok(AstNode::new(
            Expr::Send {
                receiver: walk_opt(receiver, depth, fill)?,
                name: name.clone(),
                args: walk_seq(args, depth, fill)?,
                block: walk_opt(block, depth, fill)?,
            },
            node.line,
        )),
        _ => node.map_children(|child| walk(child, depth, fill)),
    }
}

fn walk_opt<F>(
    node: &Option<AstNode>,
    depth: usize,
    fill: &mut F,
) -> Result<Option<AstNode>, KestrelError>
where
    F: FnMut(&AstNode) -> Result<AstNode, KestrelError>,
{
    node.as_ref().map(|n| walk(n, depth, fill)).transpose()
}

fn walk_seq<F>(items: &[AstNode], depth: usize, fill: &mut F) -> Result<Vec<AstNode>, KestrelError>
where
    F: FnMut(&AstNode) -> Result<AstNode, KestrelError>,
{
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        match splice_target(item, depth) {
            Some(spliced) => {
                let filled = fill(spliced)?;
                match filled.expr() {
                    Expr::List(parts) => out.extend(parts.iter().cloned()),
                    _ => out.push(filled),
                }
            }
            None => out.push(walk(item, depth, fill)?),
        }
    }
    Ok(out)
}

/// `~*expr` at depth 1 yields `expr`.
fn splice_target(node: &AstNode, depth: usize) -> Option<&AstNode> {
    if depth != 1 {
        return None;
    }
    match node.expr() {
        Expr::Unquote(inner) => match inner.expr() {
            Expr::Splat(spliced) => Some(spliced),
            _ => None,
        },
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::*;

    fn fill_with_seven(_: &AstNode) -> Result<AstNode, KestrelError> {
        Ok(int(7, 1))
    }

    #[test]
    fn depth_one_holes_are_filled() {
        let tpl = infix("+", unquote(word("x", 1), 1), unquote(word("x", 1), 1), 1);
        let out = instantiate(&tpl, &mut fill_with_seven).unwrap();
        assert_eq!(out, infix("+", int(7, 1), int(7, 1), 1));
    }

    #[test]
    fn nested_quasi_quote_keeps_inner_unquote_inert() {
        let tpl = call("f", vec![quasi(unquote(word("x", 1), 1), 1)], 1);
        let out = instantiate(&tpl, &mut fill_with_seven).unwrap();
        assert_eq!(out, tpl);
    }

    #[test]
    fn double_unquote_escapes_nested_template() {
        // f(`~~x): the second unquote brings the hole back to depth 1
        let tpl = call("f", vec![quasi(unquote(unquote(word("x", 1), 1), 1), 1)], 1);
        let out = instantiate(&tpl, &mut fill_with_seven).unwrap();
        assert_eq!(out, call("f", vec![quasi(unquote(int(7, 1), 1), 1)], 1));
    }

    #[test]
    fn sibling_subtrees_keep_their_own_depth() {
        let tpl = list(
            vec![quasi(unquote(word("a", 1), 1), 1), unquote(word("b", 1), 1)],
            1,
        );
        let out = instantiate(&tpl, &mut fill_with_seven).unwrap();
        assert_eq!(
            out,
            list(vec![quasi(unquote(word("a", 1), 1), 1), int(7, 1)], 1)
        );
    }

    #[test]
    fn splat_holes_splice_lists() {
        let tpl = call(
            "f",
            vec![int(0, 1), unquote(splat(word("xs", 1), 1), 1)],
            1,
        );
        let mut fill = |_: &AstNode| -> Result<AstNode, KestrelError> {
            Ok(list(vec![int(1, 1), int(2, 1)], 1))
        };
        let out = instantiate(&tpl, &mut fill).unwrap();
        assert_eq!(out.pretty(), "f(0, 1, 2)");
    }

    #[test]
    fn fill_errors_propagate() {
        let tpl = unquote(word("x", 1), 1);
        let mut fill = |_: &AstNode| -> Result<AstNode, KestrelError> {
            Err(crate::err_msg!(Internal, "boom"))
        };
        assert!(instantiate(&tpl, &mut fill).is_err());
    }
}
