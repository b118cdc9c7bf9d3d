//! End to end: read, declare, expand, define and dispatch.

mod common;

use common::{init_logging, string};
use kestrel::ast::value::Value;
use kestrel::ast::Expr;
use kestrel::dispatch::Branch;
use kestrel::macros::Producer;
use kestrel::operators::{Associativity, OperatorDef};
use kestrel::patterns::Pattern;
use kestrel::runtime::{body, Machine};
use kestrel::syntax::parse;
use kestrel::{Engine, EngineConfig, Registries};

#[test]
fn program_expands_statement_by_statement() {
    init_logging();
    let program = "\
double(~x) # rule shape
2 * 3 + 4
f(double(1))
";
    let nodes = parse(program).unwrap();
    assert_eq!(nodes.len(), 3);

    let mut engine = Engine::default();
    engine
        .define_macro(&nodes[0], Producer::template(kestrel::syntax::parse_expr("`(~x + ~x)").unwrap()))
        .unwrap();
    let expanded = engine.expand_all(&nodes[1..]).unwrap();
    assert_eq!(expanded[0].pretty(), "2.*(3).+(4)");
    assert_eq!(expanded[1].pretty(), "f(1.+(1))");
    assert_eq!(expanded[1].line, 3);
}

#[test]
fn grouping_before_elaboration() {
    let nodes = parse("2 * 3 + 4").unwrap();
    let engine = Engine::default();
    assert_eq!(engine.resolve_all(&nodes[0]).unwrap().pretty(), "((2 * 3) + 4)");
}

#[test]
fn operator_declared_by_a_macro_applies_to_later_statements() {
    let nodes = parse("use_pipe()\nxs |> f").unwrap();
    let mut engine = Engine::default();
    engine
        .define_macro(
            &kestrel::syntax::parse_expr("use_pipe()").unwrap(),
            Producer::native(|_, ctx| {
                ctx.declare_operator(OperatorDef::infix("|>", 2, Associativity::Left));
                Ok(Value::Nil)
            }),
        )
        .unwrap();
    let out = engine.expand_all(&nodes).unwrap();
    assert_eq!(out[0].pretty(), "nil");
    assert!(matches!(out[1].expr(), Expr::Send { name, .. } if name == "|>"));
}

#[test]
fn macros_and_methods_share_one_registry_set() {
    let registries = Registries::standard();
    let loader = Engine::with_registries(EngineConfig::default(), registries.clone());
    loader
        .define_macro(
            &kestrel::syntax::parse_expr("square(~x)").unwrap(),
            Producer::template(kestrel::syntax::parse_expr("`(~x * ~x)").unwrap()),
        )
        .unwrap();
    loader.register_branch(
        "*",
        Branch::new(body(|f| {
            let a = f.receiver.as_int().unwrap_or(0);
            let b = f.get("b")?.as_int().unwrap_or(0);
            Ok(Value::Int(a * b))
        }))
        .receiver(Pattern::kind("Integer"))
        .argument(Pattern::binding("b")),
    );

    let mut runner = Engine::with_registries(EngineConfig::default(), registries);
    let node = runner
        .expand(&kestrel::syntax::parse_expr("square(7)").unwrap())
        .unwrap();
    let (receiver, name, args) = match node.expr() {
        Expr::Send {
            receiver: Some(r),
            name,
            args,
            ..
        } => (Value::from_node(r), name.clone(), args.iter().map(Value::from_node).collect::<Vec<_>>()),
        other => panic!("expected a send, got {:?}", other),
    };

    let mut machine = Machine::new();
    machine.install("Integer", runner.compile_defined(&name).unwrap());
    assert_eq!(machine.call(receiver, &name, args, None).unwrap(), Value::Int(49));
    assert!(machine.call(string("x"), &name, vec![Value::Int(1)], None).is_err());
}
