//! The macro expander.
//!
//! Expansion rewrites one node at a time. Operator runs are resolved first
//! against the live table. A node whose shape has registered rules is
//! matched against them in precision order, with the runs below it resolved
//! so rules see grouped operator applications. The first match produces a
//! replacement, which is rewritten again until no rule applies. A node no
//! rule matches gets its built-in elaboration (call sites and operator
//! applications become generic sends) and then its children are expanded,
//! left to right.
//!
//! The configured depth bounds the chain of successive rewrites of one
//! node; the output may nest arbitrarily deep. Children are walked with an
//! explicit work stack rather than native recursion. A producer that fails
//! aborts the whole expansion with an `ExpansionFailure` pointing at the
//! node it was given.

use log::{debug, warn};

use crate::ast::value::Value;
use crate::ast::{AstNode, Expr};
use crate::engine::EngineConfig;
use crate::macros::salt::Salt;
use crate::macros::types::{ExpansionContext, MacroExpansionStep, Producer};
use crate::macros::MacroRegistry;
use crate::operators::{resolve_all, resolve_node, OperatorTable};
use crate::patterns::Bindings;
use crate::quotation::{instantiate, quote};
use crate::registry::Shared;
use crate::{err_ctx, err_msg, KestrelError};

/// One expansion pass over borrowed session state.
pub struct Expander<'a> {
    operators: &'a Shared<OperatorTable>,
    macros: &'a Shared<MacroRegistry>,
    salt: &'a mut Salt,
    config: &'a EngineConfig,
    trace: &'a mut Vec<MacroExpansionStep>,
}

/// Pending work in [`Expander::expand`].
enum Task {
    Visit(AstNode),
    /// Rebuild `shell` from the last `arity` finished children.
    Rebuild { shell: AstNode, arity: usize },
}

/// What rewriting a single node left to do.
enum Rewritten {
    Finished(AstNode),
    /// The node keeps its shape; its children still need expanding.
    Descend(AstNode),
}

impl<'a> Expander<'a> {
    pub fn new(
        operators: &'a Shared<OperatorTable>,
        macros: &'a Shared<MacroRegistry>,
        salt: &'a mut Salt,
        config: &'a EngineConfig,
        trace: &'a mut Vec<MacroExpansionStep>,
    ) -> Self {
        Self {
            operators,
            macros,
            salt,
            config,
            trace,
        }
    }

    /// Expands `node` to its fixed point.
    pub fn expand(&mut self, node: &AstNode) -> Result<AstNode, KestrelError> {
        let mut tasks = vec![Task::Visit(node.clone())];
        let mut finished: Vec<AstNode> = Vec::new();

        while let Some(task) = tasks.pop() {
            match task {
                Task::Visit(node) => match self.rewrite(&node)? {
                    Rewritten::Finished(out) => finished.push(out),
                    Rewritten::Descend(shell) => {
                        let children: Vec<AstNode> = shell.expr().children().into_iter().cloned().collect();
                        tasks.push(Task::Rebuild {
                            arity: children.len(),
                            shell,
                        });
                        tasks.extend(children.into_iter().rev().map(Task::Visit));
                    }
                },
                Task::Rebuild { shell, arity } => {
                    let split = finished.len().saturating_sub(arity);
                    let mut done = finished.split_off(split).into_iter();
                    let rebuilt = shell.map_children(|_| {
                        done.next()
                            .ok_or_else(|| err_msg!(Internal, "expansion lost a child of `{}`", shell.pretty()))
                    })?;
                    finished.push(rebuilt);
                }
            }
        }

        finished
            .pop()
            .ok_or_else(|| err_msg!(Internal, "expansion produced no node"))
    }

    /// Rewrites one node until no rule applies to it.
    fn rewrite(&mut self, node: &AstNode) -> Result<Rewritten, KestrelError> {
        let mut current = node.clone();
        let mut steps = 0;
        loop {
            match current.expr() {
                Expr::Operators(_) => {
                    current = self.operators.read(|table| resolve_node(table, &current))?;
                    continue;
                }
                Expr::Quote(_) => return Ok(Rewritten::Finished(current)),
                Expr::QuasiQuote(template) => return self.expand_quasi(template).map(Rewritten::Finished),
                Expr::Unquote(_) => {
                    warn!(
                        "line {}: unquote `{}` outside any quasi-quote is left as is",
                        current.line,
                        current.pretty()
                    );
                    return Ok(Rewritten::Descend(current));
                }
                _ => {}
            }

            if let Some(replacement) = self.apply_rule(&current)? {
                steps += 1;
                if steps > self.config.max_expansion_depth {
                    return Err(self.recursion_limit(&current));
                }
                current = replacement;
                continue;
            }
            match elaborate(&current) {
                Some(elaborated) => current = elaborated,
                None => return Ok(Rewritten::Descend(current)),
            }
        }
    }

    fn recursion_limit(&self, node: &AstNode) -> KestrelError {
        err_ctx!(
            RecursionLimit,
            format!(
                "`{}` is still being rewritten after {} steps",
                node.pretty(),
                self.config.max_expansion_depth
            ),
            node.line,
            "a rule probably rewrites to a form it matches again"
        )
    }

    /// Holes are expanded in the ambient context. A template that is one
    /// hole yields the hole's expansion; any other template yields a quoted
    /// tree, which later passes leave alone.
    fn expand_quasi(&mut self, template: &AstNode) -> Result<AstNode, KestrelError> {
        let instantiated = instantiate(template, &mut |hole: &AstNode| -> Result<AstNode, KestrelError> {
            self.expand(hole)
        })?;
        match template.expr() {
            Expr::Unquote(_) => Ok(instantiated),
            _ => Ok(quote(instantiated)),
        }
    }

    fn apply_rule(&mut self, node: &AstNode) -> Result<Option<AstNode>, KestrelError> {
        let key = node.shape_key();
        let Some(rules) = self.macros.read(|r| r.get(&key)) else {
            return Ok(None);
        };
        // Rules are defined over resolved shapes.
        let resolved = self.operators.read(|table| resolve_all(table, node))?;
        let subject = Value::Node(resolved.clone());
        let Some(selected) = rules.select(&subject, &[])? else {
            return Ok(None);
        };

        let output = self
            .produce(&selected.branch.body, &selected.bindings, &resolved)
            .map_err(|e| KestrelError::expansion_failure(&node.pretty(), node.line, e))?;
        let rule = format!("{} {}", key, selected.branch.receiver);
        debug!("{}: `{}` => `{}`", rule, node.pretty(), output.pretty());
        if self.config.record_trace {
            self.trace.push(MacroExpansionStep {
                rule,
                input: resolved,
                output: output.clone(),
            });
        }
        Ok(Some(output))
    }

    fn produce(
        &mut self,
        producer: &Producer,
        bindings: &Bindings,
        node: &AstNode,
    ) -> Result<AstNode, KestrelError> {
        match producer {
            Producer::Native(f) => {
                let mut ctx = ExpansionContext {
                    salt: &mut *self.salt,
                    separator: &self.config.salt_separator,
                    operators: self.operators,
                    node,
                };
                f(bindings, &mut ctx)?.to_node(node.line)
            }
            Producer::Template(template) => instantiate_template(template, bindings),
        }
    }
}

/// Built-in elaboration of a node no rule matched, or `None` when the node
/// keeps its shape.
fn elaborate(node: &AstNode) -> Option<AstNode> {
    let send = |receiver: Option<AstNode>, name: &str, args: Vec<AstNode>, block: Option<AstNode>| {
        AstNode::new(
            Expr::Send {
                receiver,
                name: name.to_string(),
                args,
                block,
            },
            node.line,
        )
    };
    match node.expr() {
        Expr::Call { name, args, block } => Some(send(None, name, args.clone(), block.clone())),
        Expr::Infix {
            operator,
            left,
            right,
            private,
        } => {
            let receiver = (!private).then(|| left.clone());
            Some(send(receiver, operator, vec![right.clone()], None))
        }
        Expr::Prefix { operator, operand } => {
            Some(send(Some(operand.clone()), &format!("{}@", operator), vec![], None))
        }
        Expr::Postfix { operator, operand } => {
            Some(send(Some(operand.clone()), operator, vec![], None))
        }
        Expr::Compose { left, right } => match right.expr() {
            Expr::Word(name) => Some(send(Some(left.clone()), name, vec![], None)),
            Expr::Call { name, args, block } => {
                Some(send(Some(left.clone()), name, args.clone(), block.clone()))
            }
            _ => None,
        },
        _ => None,
    }
}

/// Evaluates a template producer.
///
/// A quasi-quote has its holes filled from `bindings`; each hole must name
/// a bound variable. Any other node has its bound words replaced, except
/// inside quotes.
pub fn instantiate_template(template: &AstNode, bindings: &Bindings) -> Result<AstNode, KestrelError> {
    match template.expr() {
        Expr::QuasiQuote(body) => instantiate(body, &mut |hole: &AstNode| bound_node(hole, bindings)),
        _ => substitute(template, bindings),
    }
}

fn bound_node(hole: &AstNode, bindings: &Bindings) -> Result<AstNode, KestrelError> {
    match hole.expr() {
        Expr::Word(name) => match bindings.get(name) {
            Some(value) => value.to_node(hole.line),
            None => Err(err_ctx!(
                ExpansionFailure,
                format!("`{}` is not bound by the rule's pattern", name),
                hole.line
            )),
        },
        _ => Err(err_ctx!(
            ExpansionFailure,
            format!("template hole `{}` must name a binding", hole.pretty()),
            hole.line
        )),
    }
}

fn substitute(node: &AstNode, bindings: &Bindings) -> Result<AstNode, KestrelError> {
    match node.expr() {
        Expr::Word(name) => match bindings.get(name) {
            Some(value) => value.to_node(node.line),
            None => Ok(node.clone()),
        },
        Expr::Quote(_) => Ok(node.clone()),
        _ => node.map_children(|c| substitute(c, bindings)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::{call, int, list, quasi, run, splat, unquote, word};
    use crate::dispatch::Branch;
    use crate::patterns::Pattern;

    struct Session {
        operators: Shared<OperatorTable>,
        macros: Shared<MacroRegistry>,
        salt: Salt,
        config: EngineConfig,
        trace: Vec<MacroExpansionStep>,
    }

    impl Session {
        fn new() -> Self {
            Self {
                operators: Shared::new(OperatorTable::standard()),
                macros: Shared::default(),
                salt: Salt::default(),
                config: EngineConfig::default(),
                trace: Vec::new(),
            }
        }

        fn rule(&self, shape: AstNode, producer: Producer) {
            let key = shape.shape_key();
            let pattern = Pattern::quasi(shape).unwrap();
            self.macros
                .update(|r| r.insert(key, Branch::new(producer).receiver(pattern)));
        }

        fn expand(&mut self, node: &AstNode) -> Result<AstNode, KestrelError> {
            Expander::new(
                &self.operators,
                &self.macros,
                &mut self.salt,
                &self.config,
                &mut self.trace,
            )
            .expand(node)
        }
    }

    #[test]
    fn call_without_rule_becomes_send() {
        let mut s = Session::new();
        let out = s.expand(&call("f", vec![int(1, 1)], 1)).unwrap();
        assert_eq!(out.pretty(), "f(1)");
        assert!(matches!(out.expr(), Expr::Send { receiver: None, .. }));
    }

    #[test]
    fn template_rule_fires_and_is_traced() {
        let mut s = Session::new();
        s.rule(
            call("twice", vec![unquote(word("x", 1), 1)], 1),
            Producer::template(quasi(
                list(vec![unquote(word("x", 1), 1), unquote(word("x", 1), 1)], 1),
                1,
            )),
        );
        let out = s.expand(&call("twice", vec![int(4, 2)], 2)).unwrap();
        assert_eq!(out.pretty(), "[4, 4]");
        assert_eq!(s.trace.len(), 1);
        assert!(s.trace[0].rule.starts_with("call:twice"));
    }

    #[test]
    fn native_producer_mints_fresh_names() {
        let mut s = Session::new();
        s.rule(
            call("gensym", vec![], 1),
            Producer::native(|_, ctx| Ok(Value::Node(ctx.fresh_word("tmp")))),
        );
        let a = s.expand(&call("gensym", vec![], 1)).unwrap();
        let b = s.expand(&call("gensym", vec![], 1)).unwrap();
        assert_eq!(a.pretty(), "tmp:0");
        assert_eq!(b.pretty(), "tmp:1");
    }

    #[test]
    fn producer_failure_reports_the_input_line() {
        let mut s = Session::new();
        s.rule(
            call("broken", vec![], 1),
            Producer::native(|_, _| Err(crate::err_msg!(Internal, "boom"))),
        );
        let err = s.expand(&call("broken", vec![], 7)).unwrap_err();
        assert!(matches!(err, KestrelError::ExpansionFailure { .. }));
        assert_eq!(err.line(), Some(7));
    }

    #[test]
    fn self_rewriting_rule_hits_the_limit() {
        let mut s = Session::new();
        s.config.max_expansion_depth = 8;
        s.rule(
            call("loop", vec![], 1),
            Producer::template(call("loop", vec![], 1)),
        );
        let err = s.expand(&call("loop", vec![], 3)).unwrap_err();
        assert!(matches!(err, KestrelError::RecursionLimit { .. }));
    }

    #[test]
    fn limit_bounds_rewrites_of_one_node_not_output_depth() {
        let mut s = Session::new();
        s.config.max_expansion_depth = 4;
        let hole = |name: &str| unquote(word(name, 1), 1);
        let rest = || unquote(splat(word("rest", 1), 1), 1);
        s.rule(call("chain", vec![], 1), Producer::template(word("done", 1)));
        s.rule(
            call("chain", vec![hole("x"), rest()], 1),
            Producer::template(quasi(
                call("link", vec![hole("x"), call("chain", vec![rest()], 1)], 1),
                1,
            )),
        );
        let items = (0..20).map(|i| int(i, 1)).collect();
        let out = s.expand(&call("chain", items, 1)).unwrap();
        assert!(out.pretty().starts_with("link(0, link(1, "));
        assert!(out.pretty().ends_with("done))))"));
        assert_eq!(s.trace.len(), 21);
    }

    #[test]
    fn quote_is_opaque() {
        let mut s = Session::new();
        let quoted = quote(call("f", vec![], 1));
        assert_eq!(s.expand(&quoted).unwrap(), quoted);
    }

    #[test]
    fn producers_can_declare_operators_for_later_runs() {
        let mut s = Session::new();
        s.rule(
            call("declare_arrow", vec![], 1),
            Producer::native(|_, ctx| {
                ctx.declare_operator(crate::operators::OperatorDef::infix(
                    "<~>",
                    5,
                    crate::operators::Associativity::Right,
                ));
                Ok(Value::Nil)
            }),
        );
        let arrow = run(word("a", 2), vec![("<~>", word("b", 2))], 2);
        assert!(s.expand(&arrow).is_err());
        s.expand(&call("declare_arrow", vec![], 1)).unwrap();
        assert_eq!(s.expand(&arrow).unwrap().pretty(), "a.<~>(b)");
    }
}
