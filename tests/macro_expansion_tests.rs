//! Macro expansion through the engine: rules, quotation and hygiene.

mod common;

use common::{expand_text, init_logging, read};
use kestrel::ast::builder::{call, int, quasi, quote, unquote};
use kestrel::ast::value::Value;
use kestrel::ast::{Expr, NodeKind, ShapeKey};
use kestrel::dispatch::Insertion;
use kestrel::macros::{Phase, Producer};
use kestrel::patterns::Pattern;
use kestrel::{Engine, EngineConfig, KestrelError, Registries};

fn with_double() -> Engine {
    let engine = Engine::default();
    engine
        .define_macro(&read("double(~x)"), Producer::template(read("`(~x + ~x)")))
        .unwrap();
    engine
}

#[test]
fn double_expands_like_its_written_out_form() {
    init_logging();
    let mut engine = with_double();
    let expanded = expand_text(&mut engine, "double(5)").unwrap();
    let direct = expand_text(&mut engine, "5 + 5").unwrap();
    assert_eq!(expanded, direct);
    assert_eq!(expanded.pretty(), "5.+(5)");
}

#[test]
fn expansion_is_idempotent() {
    let mut engine = with_double();
    for text in [
        "double(5)",
        "double(double(2)) * 3",
        "f(a, b) { |x| x + 1 }",
        "'quoted(~x)",
        "`[1, ~double(1)]",
    ] {
        let once = expand_text(&mut engine, text).unwrap();
        let twice = engine.expand(&once).unwrap();
        assert_eq!(once, twice, "expanding {:?} twice changed it", text);
    }
}

#[test]
fn unquote_inside_quasi_round_trips() {
    let mut engine = with_double();
    for text in ["double(3)", "a + b * c", "f(x)", "42"] {
        let direct = expand_text(&mut engine, text).unwrap();
        let wrapped = quasi(unquote(read(text), 1), 1);
        assert_eq!(engine.expand(&wrapped).unwrap(), direct, "round trip of {:?}", text);
    }
}

#[test]
fn nested_quasi_keeps_inner_unquote_inert() {
    let mut engine = Engine::default();
    let g = call("g", vec![], 1);
    let nested = quasi(quasi(unquote(g.clone(), 1), 1), 1);
    let out = engine.expand(&nested).unwrap();
    assert_eq!(out, quote(quasi(unquote(g, 1), 1), 1));
}

#[test]
fn holes_are_expanded_in_place() {
    let mut engine = with_double();
    let out = expand_text(&mut engine, "`[1, ~double(2)]").unwrap();
    match out.expr() {
        Expr::Quote(inner) => assert_eq!(inner.pretty(), "[1, 2.+(2)]"),
        other => panic!("expected a quoted list, got {:?}", other),
    }
}

#[test]
fn quote_suppresses_expansion() {
    let mut engine = with_double();
    let quoted = read("'double(5)");
    assert_eq!(engine.expand(&quoted).unwrap(), quoted);
}

#[test]
fn redefinition_replaces_the_rule() {
    let mut engine = with_double();
    let again = engine
        .define_macro(&read("double(~y)"), Producer::template(read("`(~y * 2)")))
        .unwrap();
    assert!(matches!(again, Insertion::Replaced(_)));
    assert_eq!(
        expand_text(&mut engine, "double(5)").unwrap().pretty(),
        "5.*(2)"
    );
}

#[test]
fn more_precise_rule_wins_regardless_of_order() {
    let mut engine = Engine::default();
    engine
        .define_macro(&read("pick(~x)"), Producer::template(read("'general")))
        .unwrap();
    engine
        .define_macro(&read("pick(0)"), Producer::template(read("'zero")))
        .unwrap();
    assert_eq!(expand_text(&mut engine, "pick(0)").unwrap().pretty(), "'zero");
    assert_eq!(expand_text(&mut engine, "pick(1)").unwrap().pretty(), "'general");
}

#[test]
fn register_macro_with_an_explicit_pattern() {
    let mut engine = Engine::default();
    engine.register_macro(
        ShapeKey::named(NodeKind::Call, "answer"),
        Pattern::wildcard(),
        Producer::native(|_, _| Ok(Value::Int(42))),
    );
    assert_eq!(expand_text(&mut engine, "answer(1, 2)").unwrap().pretty(), "42");
}

#[test]
fn native_producers_see_bindings() {
    let mut engine = Engine::default();
    engine
        .define_macro(
            &read("count(~items)"),
            Producer::native(|bindings, _| {
                let n = match bindings.get("items").and_then(|v| v.as_node()) {
                    Some(node) => match node.expr() {
                        Expr::List(items) => items.len() as i64,
                        _ => 1,
                    },
                    None => 1,
                };
                Ok(Value::Int(n))
            }),
        )
        .unwrap();
    assert_eq!(expand_text(&mut engine, "count([a, b, c])").unwrap().pretty(), "3");
}

#[test]
fn generated_names_are_unique_per_session() {
    let mut engine = Engine::default();
    engine
        .define_macro(
            &read("gensym()"),
            Producer::native(|_, ctx| Ok(Value::Node(ctx.fresh_word("g")))),
        )
        .unwrap();
    let names: Vec<String> = (0..3)
        .map(|_| expand_text(&mut engine, "gensym()").unwrap().pretty())
        .collect();
    assert_eq!(names, vec!["g:0", "g:1", "g:2"]);
}

#[test]
fn precompiled_units_advance_the_salt() {
    let mut engine = Engine::default();
    engine
        .define_macro(
            &read("gensym()"),
            Producer::native(|_, ctx| Ok(Value::Node(ctx.fresh_word("g")))),
        )
        .unwrap();
    let start = engine.begin_unit();
    expand_text(&mut engine, "[gensym(), gensym()]").unwrap();
    let unit = engine.finish_unit(start, Phase::Load);
    assert_eq!(unit.salt_delta, 2);

    let mut fresh = Engine::with_registries(EngineConfig::default(), engine.registries().clone());
    fresh.enter_unit(&unit, true);
    assert_eq!(expand_text(&mut fresh, "gensym()").unwrap().pretty(), "g:2");

    let mut recompiling = Engine::with_registries(EngineConfig::default(), Registries::standard());
    recompiling.enter_unit(&unit, false);
    assert_eq!(recompiling.salt().value(), 0);
}

#[test]
fn trace_records_each_rule_application() {
    let mut engine = with_double();
    expand_text(&mut engine, "double(double(1))").unwrap();
    let trace = engine.take_trace();
    // The outer call, then both copies of the inner one.
    assert_eq!(trace.len(), 3);
    assert!(trace.iter().all(|step| step.rule.starts_with("call:double")));
    assert!(engine.trace().is_empty());
}

#[test]
fn trace_can_be_disabled() {
    let config = EngineConfig {
        record_trace: false,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(config);
    engine
        .define_macro(&read("double(~x)"), Producer::template(read("`(~x + ~x)")))
        .unwrap();
    expand_text(&mut engine, "double(1)").unwrap();
    assert!(engine.trace().is_empty());
}

#[test]
fn runaway_rules_hit_the_configured_limit() {
    let config = EngineConfig {
        max_expansion_depth: 16,
        ..EngineConfig::default()
    };
    let mut engine = Engine::new(config);
    engine
        .define_macro(&read("grow(~x)"), Producer::template(read("`grow([~x])")))
        .unwrap();
    let err = expand_text(&mut engine, "grow(1)").unwrap_err();
    assert!(matches!(err, KestrelError::RecursionLimit { .. }));
}

#[test]
fn rule_shapes_with_operators_match_their_own_syntax() {
    let mut engine = Engine::default();
    engine
        .define_macro(&read("f(~a + ~b)"), Producer::template(read("'matched")))
        .unwrap();
    assert_eq!(expand_text(&mut engine, "f(1 + 2)").unwrap().pretty(), "'matched");
    assert_eq!(expand_text(&mut engine, "f(1 * 2)").unwrap().pretty(), "f(1.*(2))");

    engine
        .define_macro(
            &read("swap(~a - ~b)"),
            Producer::template(read("`(~b - ~a)")),
        )
        .unwrap();
    assert_eq!(
        expand_text(&mut engine, "swap(x * 2 - y)").unwrap().pretty(),
        "y.-(x.*(2))"
    );
}

#[test]
fn long_narrowing_chains_expand_on_a_normal_stack() {
    let mut engine = Engine::default();
    engine
        .define_macro(&read("mlist()"), Producer::template(read("nil")))
        .unwrap();
    engine
        .define_macro(
            &read("mlist(~x, ~*rest)"),
            Producer::template(read("`cons(~x, mlist(~*rest))")),
        )
        .unwrap();
    let items = (1..=300).map(|i| int(i, 1)).collect();
    let out = engine.expand(&call("mlist", items, 1)).unwrap();

    // Walk the spine: cons(1, cons(2, ... nil)).
    let mut seen = Vec::new();
    let mut cursor = out;
    loop {
        let next = match cursor.expr() {
            Expr::Send { name, args, .. } if name == "cons" => {
                seen.push(args[0].pretty());
                args[1].clone()
            }
            _ => break,
        };
        cursor = next;
    }
    assert_eq!(seen.len(), 300);
    assert_eq!(seen[299], "300");
    assert_eq!(cursor.pretty(), "nil");
}

#[test]
fn failing_producer_wraps_the_cause() {
    let mut engine = Engine::default();
    engine
        .define_macro(
            &read("explode(~x)"),
            Producer::native(|_, _| Err(kestrel::err_msg!(Internal, "producer gave up"))),
        )
        .unwrap();
    let err = engine
        .expand(&call("explode", vec![int(1, 9)], 9))
        .unwrap_err();
    assert!(matches!(err, KestrelError::ExpansionFailure { .. }));
    assert_eq!(err.line(), Some(9));
    let cause = std::error::Error::source(&err).map(|c| c.to_string());
    assert_eq!(cause.as_deref(), Some("internal error: producer gave up"));
}

#[test]
fn unknown_operator_inside_expansion_is_reported() {
    let mut engine = Engine::default();
    let err = expand_text(&mut engine, "f(a <=> b)").unwrap_err();
    assert!(matches!(err, KestrelError::UnknownOperator { .. }));
}

#[test]
fn unbound_template_hole_is_an_expansion_failure() {
    let mut engine = Engine::default();
    engine
        .define_macro(&read("oops(~x)"), Producer::template(read("`(~y + 1)")))
        .unwrap();
    let err = expand_text(&mut engine, "oops(1)").unwrap_err();
    assert!(matches!(err, KestrelError::ExpansionFailure { .. }));
}
