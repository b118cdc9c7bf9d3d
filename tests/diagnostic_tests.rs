//! Error rendering through miette.

mod common;

use common::{expand_text, read};
use kestrel::ast::value::Value;
use kestrel::macros::Producer;
use kestrel::syntax::parse;
use kestrel::{to_error_source, Engine, EngineConfig, ErrorType, KestrelError};
use miette::{Diagnostic, Report};

fn render(err: KestrelError) -> String {
    format!("{:?}", Report::new(err))
}

#[test]
fn unknown_operator_report_labels_the_line() {
    let text = "x = 1\ny = x <=> 2\n";
    let nodes = parse(text).unwrap();
    let mut engine = Engine::default();
    let err = engine
        .expand_all(&nodes)
        .unwrap_err()
        .with_source(to_error_source("sample.ks", text));
    assert_eq!(err.line(), Some(2));
    assert_eq!(err.error_type(), ErrorType::UnknownOperator);
    let output = render(err);
    assert!(output.contains("kestrel::UnknownOperator"));
    assert!(output.contains("sample.ks"));
    assert!(output.contains("`<=>` is not in the operator table"));
    assert!(output.contains("declare the operator"));
}

#[test]
fn expansion_failure_keeps_its_cause_chain() {
    let mut engine = Engine::default();
    engine
        .define_macro(
            &read("strict(~x)"),
            Producer::native(|bindings, _| match bindings.get("x") {
                Some(Value::Int(n)) if *n >= 0 => Ok(Value::Int(*n)),
                _ => Err(kestrel::err_msg!(PatternMismatch, "strict wants a natural number")),
            }),
        )
        .unwrap();
    let err = expand_text(&mut engine, "strict(a)").unwrap_err();
    assert_eq!(err.error_type(), ErrorType::ExpansionFailure);
    assert!(err.to_string().contains("strict(a)"));
    let output = render(err);
    assert!(output.contains("strict wants a natural number"));
}

#[test]
fn recursion_limit_carries_help() {
    let mut engine = Engine::new(EngineConfig {
        max_expansion_depth: 4,
        ..EngineConfig::default()
    });
    engine
        .define_macro(&read("again()"), Producer::template(read("`again()")))
        .unwrap();
    let err = expand_text(&mut engine, "again()").unwrap_err();
    let help = err.help().map(|h| h.to_string());
    assert!(help.unwrap_or_default().contains("rewrites to a form it matches again"));
}

#[test]
fn dispatch_mismatch_names_the_arguments() {
    let err = KestrelError::dispatch_mismatch("add", Value::Nil, vec![Value::Int(1), "two".into()]);
    assert_eq!(err.to_string(), "no branch of `add` matched (1, \"two\")");
    assert!(err.error_type().is_catchable());
}

#[test]
fn parse_errors_point_at_the_offending_line() {
    let text = "ok(1)\nbroken(\n";
    let err = parse(text).unwrap_err();
    assert_eq!(err.error_type(), ErrorType::Parse);
    let line = err.line();
    let output = render(err.with_source(to_error_source("broken.ks", text)));
    assert!(line.is_some());
    assert!(output.contains("broken.ks"));
}

#[test]
fn reports_without_source_still_render() {
    let output = render(KestrelError::unknown_operator("%%", 3));
    assert!(output.contains("unknown operator `%%`"));
}
