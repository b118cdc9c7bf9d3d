//! Kestrel Parser
//!
//! Converts source text into AST nodes carrying 1-based source lines. The
//! parser is purely syntactic: operator runs come out flat, as
//! [`Expr::Operators`], for the resolver to group.

use pest::error::{Error, LineColLocation};
use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;

use crate::ast::{AstNode, Expr, OperatorRun, Primitive, RunLink};
use crate::{err_ctx, err_msg, KestrelError};

#[derive(Parser)]
#[grammar = "syntax/grammar.pest"]
struct KestrelParser;

// ============================================================================
// PUBLIC API
// ============================================================================

/// Parses a program into its top-level statements.
pub fn parse(source_text: &str) -> Result<Vec<AstNode>, KestrelError> {
    if source_text.trim().is_empty() {
        return Ok(vec![]);
    }
    let mut pairs = KestrelParser::parse(Rule::program, source_text).map_err(convert_parse_error)?;
    let program = next_pair(&mut pairs, "program")?;
    program
        .into_inner()
        .filter(|p| p.as_rule() != Rule::EOI)
        .map(build_run)
        .collect()
}

/// Parses text holding exactly one statement.
pub fn parse_expr(source_text: &str) -> Result<AstNode, KestrelError> {
    let mut nodes = parse(source_text)?;
    match nodes.len() {
        1 => Ok(nodes.remove(0)),
        n => Err(err_ctx!(
            Parse,
            format!("expected one expression, found {}", n),
            nodes.get(1).map_or(1, |node| node.line)
        )),
    }
}

// ============================================================================
// AST BUILDERS
// ============================================================================

fn build_run(pair: Pair<Rule>) -> Result<AstNode, KestrelError> {
    let line = line_of(&pair);
    let mut head = None;
    let mut links = Vec::new();
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::operand => head = Some(build_operand(part)?),
            Rule::link => links.push(build_link(part)?),
            rule => return Err(unexpected(rule, line)),
        }
    }
    match (head, links.is_empty()) {
        (Some(node), true) => Ok(node),
        (head, _) => Ok(AstNode::new(Expr::Operators(OperatorRun { head, links }), line)),
    }
}

fn build_link(pair: Pair<Rule>) -> Result<RunLink, KestrelError> {
    let mut inner = pair.into_inner();
    let operator = next_pair(&mut inner, "operator")?.as_str().to_string();
    let operand = inner.next().map(build_operand).transpose()?;
    Ok(RunLink { operator, operand })
}

fn build_operand(pair: Pair<Rule>) -> Result<AstNode, KestrelError> {
    let line = line_of(&pair);
    let mut parts = pair.into_inner();
    let mut node = build_lead(next_pair(&mut parts, "operand")?)?;
    for follower in parts {
        let right = build_lead(follower)?;
        node = AstNode::new(Expr::Compose { left: node, right }, line);
    }
    Ok(node)
}

fn build_lead(pair: Pair<Rule>) -> Result<AstNode, KestrelError> {
    let line = line_of(&pair);
    let rule = pair.as_rule();
    let wrap = |f: fn(AstNode) -> Expr, pair: Pair<Rule>| -> Result<AstNode, KestrelError> {
        let mut inner = pair.into_inner();
        let operand = build_lead(next_pair(&mut inner, "operand")?)?;
        Ok(AstNode::new(f(operand), line))
    };
    match rule {
        Rule::splat => wrap(Expr::Splat, pair),
        Rule::unquote => wrap(Expr::Unquote, pair),
        Rule::quote => wrap(Expr::Quote, pair),
        Rule::quasi => wrap(Expr::QuasiQuote, pair),
        Rule::primary => build_primary(pair),
        rule => Err(unexpected(rule, line)),
    }
}

fn build_primary(pair: Pair<Rule>) -> Result<AstNode, KestrelError> {
    let mut parts = pair.into_inner();
    let mut node = build_atom(next_pair(&mut parts, "atom")?)?;
    for suffix in parts {
        let line = line_of(&suffix);
        let mut inner = suffix.into_inner();
        let name = next_pair(&mut inner, "message name")?.as_str().to_string();
        let (args, block) = build_call_tail(inner)?;
        node = AstNode::new(
            Expr::Send {
                receiver: Some(node),
                name,
                args,
                block,
            },
            line,
        );
    }
    Ok(node)
}

fn build_atom(pair: Pair<Rule>) -> Result<AstNode, KestrelError> {
    let line = line_of(&pair);
    let text = pair.as_str();
    let expr = match pair.as_rule() {
        Rule::integer => Expr::Integer(text.parse::<i64>().map_err(|e| {
            err_ctx!(Parse, format!("integer `{}` out of range: {}", text, e), line)
        })?),
        Rule::float => Expr::Float(text.parse::<f64>().map_err(|e| {
            err_ctx!(Parse, format!("invalid float `{}`: {}", text, e), line)
        })?),
        Rule::string => Expr::String(unescape_string(text, line)?),
        Rule::symbol => Expr::Symbol(text.trim_start_matches(':').to_string()),
        Rule::word => match text {
            "self" => Expr::Primitive(Primitive::SelfRef),
            "nil" => Expr::Primitive(Primitive::Nil),
            "true" => Expr::Primitive(Primitive::True),
            "false" => Expr::Primitive(Primitive::False),
            _ => Expr::Word(text.to_string()),
        },
        Rule::list => Expr::List(pair.into_inner().map(build_run).collect::<Result<_, _>>()?),
        Rule::paren => {
            let mut inner = pair.into_inner();
            return build_run(next_pair(&mut inner, "expression")?);
        }
        Rule::block => build_block(pair)?,
        Rule::call => {
            let mut inner = pair.into_inner();
            let name = next_pair(&mut inner, "call name")?.as_str().to_string();
            let (args, block) = build_call_tail(inner)?;
            Expr::Call { name, args, block }
        }
        rule => return Err(unexpected(rule, line)),
    };
    Ok(AstNode::new(expr, line))
}

fn build_block(pair: Pair<Rule>) -> Result<Expr, KestrelError> {
    let mut params = Vec::new();
    let mut body = Vec::new();
    for part in pair.into_inner() {
        match part.as_rule() {
            Rule::params => {
                params = part
                    .into_inner()
                    .map(build_operand)
                    .collect::<Result<_, _>>()?
            }
            Rule::run => body.push(build_run(part)?),
            rule => return Err(unexpected(rule, line_of(&part))),
        }
    }
    Ok(Expr::Block { params, body })
}

/// Arguments and optional block after a call name.
fn build_call_tail(
    parts: Pairs<Rule>,
) -> Result<(Vec<AstNode>, Option<AstNode>), KestrelError> {
    let mut args = Vec::new();
    let mut block = None;
    for part in parts {
        match part.as_rule() {
            Rule::args => {
                args = part.into_inner().map(build_run).collect::<Result<_, _>>()?;
            }
            Rule::block => {
                let line = line_of(&part);
                block = Some(AstNode::new(build_block(part)?, line));
            }
            rule => return Err(unexpected(rule, line_of(&part))),
        }
    }
    Ok((args, block))
}

// ============================================================================
// HELPERS
// ============================================================================

fn line_of(pair: &Pair<Rule>) -> usize {
    pair.as_span().start_pos().line_col().0
}

fn next_pair<'i>(pairs: &mut Pairs<'i, Rule>, what: &str) -> Result<Pair<'i, Rule>, KestrelError> {
    pairs
        .next()
        .ok_or_else(|| err_msg!(Internal, "parser produced no {}", what))
}

fn unexpected(rule: Rule, line: usize) -> KestrelError {
    err_ctx!(Internal, format!("unexpected parse rule {:?}", rule), line)
}

fn unescape_string(text: &str, line: usize) -> Result<String, KestrelError> {
    let body = &text[1..text.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some('r') => out.push('\r'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                return Err(err_ctx!(
                    Parse,
                    format!("unknown escape `\\{}`", other),
                    line
                ))
            }
            None => return Err(err_ctx!(Parse, "string ends with a lone backslash", line)),
        }
    }
    Ok(out)
}

fn convert_parse_error(error: Error<Rule>) -> KestrelError {
    let line = match error.line_col {
        LineColLocation::Pos((line, _)) | LineColLocation::Span((line, _), _) => line,
    };
    KestrelError::Parse {
        message: error.variant.message().to_string(),
        ctx: crate::ErrorContext::at_line(line),
        source: Some(Box::new(error)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn one(text: &str) -> AstNode {
        parse_expr(text).unwrap()
    }

    #[test]
    fn operator_runs_stay_flat() {
        let node = one("2 * 3 + 4");
        match node.expr() {
            Expr::Operators(run) => {
                assert_eq!(run.head.as_ref().map(|h| h.pretty()), Some("2".to_string()));
                let ops: Vec<_> = run.links.iter().map(|l| l.operator.as_str()).collect();
                assert_eq!(ops, vec!["*", "+"]);
            }
            other => panic!("expected an operator run, got {:?}", other),
        }
    }

    #[test]
    fn dangling_operators_have_no_operand() {
        let node = one("a + - b");
        let Expr::Operators(run) = node.expr() else {
            panic!("expected an operator run");
        };
        assert!(run.links[0].operand.is_none());
        assert_eq!(run.links[1].operator, "-");
    }

    #[test]
    fn calls_sends_and_blocks() {
        assert_eq!(one("f(1, x)").pretty(), "f(1, x)");
        assert_eq!(one("a.b(c)").pretty(), "a.b(c)");
        assert_eq!(one("a.size").pretty(), "a.size");
        assert_eq!(one("each(xs) { |x| x }").pretty(), "each(xs) { |x| x }");
    }

    #[test]
    fn quotation_sigils() {
        assert_eq!(one("'f(x)").kind(), crate::ast::NodeKind::Quote);
        let quasi = one("`double(~x)");
        assert_eq!(quasi.pretty(), "`double(~x)");
        assert_eq!(one("[a, *rest]").pretty(), "[a, *rest]");
    }

    #[test]
    fn literals_and_primitives() {
        assert_eq!(one("42").expr(), &Expr::Integer(42));
        assert_eq!(one("1.5").expr(), &Expr::Float(1.5));
        assert_eq!(one(r#""a\nb""#).expr(), &Expr::String("a\nb".into()));
        assert_eq!(one(":ok").expr(), &Expr::Symbol("ok".into()));
        assert_eq!(one("self").expr(), &Expr::Primitive(Primitive::SelfRef));
    }

    #[test]
    fn juxtaposition_composes() {
        let node = one("x foo");
        assert!(matches!(node.expr(), Expr::Compose { .. }));
    }

    #[test]
    fn statements_carry_lines() {
        let nodes = parse("a\n\nb; c\n").unwrap();
        let lines: Vec<_> = nodes.iter().map(|n| n.line).collect();
        assert_eq!(lines, vec![1, 3, 3]);
    }

    #[test]
    fn syntax_errors_report_the_line() {
        let err = parse("a\nf(1,\n").unwrap_err();
        assert!(matches!(err, KestrelError::Parse { .. }));
        assert_eq!(err.line(), Some(2));
    }
}
