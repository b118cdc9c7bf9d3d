//! Shorthand constructors for AST nodes.
//!
//! Used by the reader, by macro producers written in Rust, and heavily by
//! tests. Every constructor takes the 1-based source line last.

use crate::ast::{AstNode, Expr, OperatorRun, Primitive, RunLink};

pub fn word(name: &str, line: usize) -> AstNode {
    AstNode::new(Expr::Word(name.to_string()), line)
}

pub fn int(value: i64, line: usize) -> AstNode {
    AstNode::new(Expr::Integer(value), line)
}

pub fn float(value: f64, line: usize) -> AstNode {
    AstNode::new(Expr::Float(value), line)
}

pub fn string(value: &str, line: usize) -> AstNode {
    AstNode::new(Expr::String(value.to_string()), line)
}

pub fn symbol(name: &str, line: usize) -> AstNode {
    AstNode::new(Expr::Symbol(name.to_string()), line)
}

pub fn primitive(p: Primitive, line: usize) -> AstNode {
    AstNode::new(Expr::Primitive(p), line)
}

pub fn self_ref(line: usize) -> AstNode {
    primitive(Primitive::SelfRef, line)
}

pub fn list(items: Vec<AstNode>, line: usize) -> AstNode {
    AstNode::new(Expr::List(items), line)
}

pub fn block(params: Vec<AstNode>, body: Vec<AstNode>, line: usize) -> AstNode {
    AstNode::new(Expr::Block { params, body }, line)
}

pub fn call(name: &str, args: Vec<AstNode>, line: usize) -> AstNode {
    AstNode::new(
        Expr::Call {
            name: name.to_string(),
            args,
            block: None,
        },
        line,
    )
}

pub fn send(
    receiver: Option<AstNode>,
    name: &str,
    args: Vec<AstNode>,
    block: Option<AstNode>,
    line: usize,
) -> AstNode {
    AstNode::new(
        Expr::Send {
            receiver,
            name: name.to_string(),
            args,
            block,
        },
        line,
    )
}

pub fn infix(operator: &str, left: AstNode, right: AstNode, line: usize) -> AstNode {
    AstNode::new(
        Expr::Infix {
            operator: operator.to_string(),
            left,
            right,
            private: false,
        },
        line,
    )
}

pub fn prefix(operator: &str, operand: AstNode, line: usize) -> AstNode {
    AstNode::new(
        Expr::Prefix {
            operator: operator.to_string(),
            operand,
        },
        line,
    )
}

pub fn postfix(operator: &str, operand: AstNode, line: usize) -> AstNode {
    AstNode::new(
        Expr::Postfix {
            operator: operator.to_string(),
            operand,
        },
        line,
    )
}

/// An unresolved run `head op1 x1 op2 x2 ...` where every operator has an operand.
pub fn run(head: AstNode, links: Vec<(&str, AstNode)>, line: usize) -> AstNode {
    AstNode::new(
        Expr::Operators(OperatorRun {
            head: Some(head),
            links: links
                .into_iter()
                .map(|(operator, operand)| RunLink {
                    operator: operator.to_string(),
                    operand: Some(operand),
                })
                .collect(),
        }),
        line,
    )
}

pub fn quote(inner: AstNode, line: usize) -> AstNode {
    AstNode::new(Expr::Quote(inner), line)
}

pub fn quasi(inner: AstNode, line: usize) -> AstNode {
    AstNode::new(Expr::QuasiQuote(inner), line)
}

pub fn unquote(inner: AstNode, line: usize) -> AstNode {
    AstNode::new(Expr::Unquote(inner), line)
}

pub fn splat(inner: AstNode, line: usize) -> AstNode {
    AstNode::new(Expr::Splat(inner), line)
}

pub fn compose(left: AstNode, right: AstNode, line: usize) -> AstNode {
    AstNode::new(Expr::Compose { left, right }, line)
}
