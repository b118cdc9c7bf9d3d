//! Compiles a dispatch set into one routine.
//!
//! The emitted routine tries branches in precision order. Each branch tests
//! its receiver, its argument count when the set is variadic, then every
//! argument pattern, jumping to the next branch on the first failure. A
//! full match binds the pattern names into locals and invokes the body.
//! When nothing matches the routine defers to the superclass definition if
//! the host has one, and otherwise raises a dispatch mismatch.
//!
//! The host provides the helper calls named in [`calls`].

use std::sync::Arc;

use log::debug;

use crate::ast::value::Value;
use crate::dispatch::{ArgumentForm, Branch, DispatchSet};
use crate::patterns::Pattern;
use crate::sink::{Arity, CodeSink, Label, Literal, RaiseKind};
use crate::KestrelError;

/// Helper calls a host must understand.
pub mod calls {
    /// `(pattern, value) -> bool`
    pub const MATCHES: &str = "matches?";
    /// `(pattern, value) -> list` of bound values in `Pattern::names` order;
    /// applies the pattern's slot writes.
    pub const BIND: &str = "bind";
    /// `(list, index) -> value`
    pub const AT: &str = "at";
    /// `(list) -> integer`
    pub const SIZE: &str = "size";
    /// `(list, n) -> list` without its first `n` items.
    pub const DROP: &str = "drop";
    pub const EQUAL: &str = "==";
    pub const AT_LEAST: &str = ">=";
    /// `(value) -> bool`
    pub const IS_UNDEFINED: &str = "undefined?";
    /// `(body) -> value`, run against the current frame.
    pub const INVOKE: &str = "invoke-body";
    /// `() -> bool`
    pub const SUPER_CALLABLE: &str = "super-callable?";
    /// `() -> value`, the same call against the superclass definition.
    pub const SUPER: &str = "super";
}

/// Local slot names. Internal slots contain `:` so they never collide with
/// pattern binders.
pub mod locals {
    pub const SELF: &str = "self";
    pub const SPLAT: &str = "arg:splat";
    pub const BLOCK: &str = "arg:block";
    pub const REST: &str = "arg:rest";
    pub const BOUND: &str = "tmp:bound";

    pub fn required(i: usize) -> String {
        format!("arg:{}", i)
    }

    pub fn optional(i: usize) -> String {
        format!("arg:opt:{}", i)
    }

    pub fn post(i: usize) -> String {
        format!("arg:post:{}", i)
    }

    pub fn default_slot(branch: usize, i: usize) -> String {
        format!("default:{}:{}", branch, i)
    }
}

/// Routines named this never defer to the superclass.
pub const CONSTRUCTOR: &str = "initialize";

/// Compiles `set` into `sink`.
pub fn compile<B, S>(set: &DispatchSet<B>, mut sink: S) -> Result<S::Output, KestrelError>
where
    B: Clone,
    S: CodeSink<B>,
{
    let form = set.argument_form()?;
    debug!(
        "compile `{}`: {} branches, {}",
        set.name,
        set.len(),
        if form.variadic { "variadic" } else { "uniform" }
    );
    sink.set_arity(Arity {
        required: form.required,
        optional: form.optional,
        splat: form.splat,
        post: form.post,
        block: form.block,
    });
    sink.declare_local(locals::SELF);

    for (index, branch) in set.branches().enumerate() {
        let next = sink.new_label();
        emit_branch(&mut sink, branch, index, &form, next);
        sink.emit_label(next);
    }

    if set.branches().any(|b| b.is_total(form.variadic)) {
        debug!("`{}` is total; no failure path", set.name);
    } else {
        if set.name != CONSTRUCTOR {
            let fail = sink.new_label();
            sink.emit_call(calls::SUPER_CALLABLE, 0);
            sink.emit_branch_unless(fail);
            sink.emit_call(calls::SUPER, 0);
            sink.emit_return();
            sink.emit_label(fail);
        }
        sink.emit_raise(RaiseKind::DispatchMismatch {
            name: set.name.clone(),
        });
    }
    sink.finish(&set.name)
}

/// A pattern together with the local it is tested against.
struct Slot {
    pattern: Arc<Pattern>,
    local: String,
    /// The variadic tail, which always holds a list.
    tail: bool,
}

fn emit_branch<B, S>(sink: &mut S, branch: &Branch<B>, index: usize, form: &ArgumentForm, next: Label)
where
    B: Clone,
    S: CodeSink<B>,
{
    let mut slots: Vec<Slot> = Vec::new();
    let receiver = Slot {
        pattern: Arc::new(branch.receiver.clone()),
        local: locals::SELF.to_string(),
        tail: false,
    };
    if !branch.always_matches {
        emit_test::<B, S>(sink, &receiver, next);
    }
    slots.push(receiver);

    if form.variadic {
        emit_count_test(sink, branch, next);
    }

    for (i, pattern) in branch.arguments.iter().enumerate() {
        let slot = Slot {
            pattern: Arc::new(pattern.clone()),
            local: locals::required(i),
            tail: false,
        };
        emit_test::<B, S>(sink, &slot, next);
        slots.push(slot);
    }

    for (i, (pattern, producer)) in branch.defaults.iter().enumerate() {
        let local = locals::default_slot(index, i);
        let supplied = sink.new_label();
        sink.emit_local_get(&locals::optional(i));
        sink.emit_local_set(&local);
        sink.emit_local_get(&local);
        sink.emit_call(calls::IS_UNDEFINED, 1);
        sink.emit_branch_unless(supplied);
        sink.emit_literal(Literal::Body(producer.clone()));
        sink.emit_call(calls::INVOKE, 1);
        sink.emit_local_set(&local);
        sink.emit_label(supplied);
        let slot = Slot {
            pattern: Arc::new(pattern.clone()),
            local,
            tail: false,
        };
        emit_test::<B, S>(sink, &slot, next);
        slots.push(slot);
    }

    if let Some(pattern) = &branch.splat {
        let slot = Slot {
            pattern: Arc::new(pattern.clone()),
            local: if form.variadic { locals::REST } else { locals::SPLAT }.to_string(),
            tail: true,
        };
        emit_test::<B, S>(sink, &slot, next);
        slots.push(slot);
    }

    for (i, pattern) in branch.post.iter().enumerate() {
        let slot = Slot {
            pattern: Arc::new(pattern.clone()),
            local: locals::post(i),
            tail: false,
        };
        emit_test::<B, S>(sink, &slot, next);
        slots.push(slot);
    }

    if let Some(pattern) = &branch.block {
        let slot = Slot {
            pattern: Arc::new(pattern.clone()),
            local: locals::BLOCK.to_string(),
            tail: false,
        };
        emit_test::<B, S>(sink, &slot, next);
        slots.push(slot);
    }

    for slot in &slots {
        emit_bind::<B, S>(sink, slot);
    }
    sink.emit_literal(Literal::Body(branch.body.clone()));
    sink.emit_call(calls::INVOKE, 1);
    sink.emit_return();
}

/// `size(arg:splat) == n` (or `>= n` with a splat), then unpacks the
/// positional arguments and the rest.
fn emit_count_test<B, S>(sink: &mut S, branch: &Branch<B>, next: Label)
where
    S: CodeSink<B>,
{
    let count = branch.arguments.len();
    sink.emit_local_get(locals::SPLAT);
    sink.emit_call(calls::SIZE, 1);
    sink.emit_literal(Literal::Value(Value::Int(count as i64)));
    let comparison = if branch.splat.is_some() {
        calls::AT_LEAST
    } else {
        calls::EQUAL
    };
    sink.emit_call(comparison, 2);
    sink.emit_branch_unless(next);

    for i in 0..count {
        sink.emit_local_get(locals::SPLAT);
        sink.emit_literal(Literal::Value(Value::Int(i as i64)));
        sink.emit_call(calls::AT, 2);
        sink.emit_local_set(&locals::required(i));
    }
    if branch.splat.is_some() {
        sink.emit_local_get(locals::SPLAT);
        sink.emit_literal(Literal::Value(Value::Int(count as i64)));
        sink.emit_call(calls::DROP, 2);
        sink.emit_local_set(locals::REST);
    }
}

fn emit_test<B, S>(sink: &mut S, slot: &Slot, next: Label)
where
    S: CodeSink<B>,
{
    let total = if slot.tail {
        slot.pattern.is_wildcard_tail()
    } else {
        slot.pattern.is_wildcard()
    };
    if total {
        return;
    }
    sink.emit_literal(Literal::Pattern(Arc::clone(&slot.pattern)));
    sink.emit_local_get(&slot.local);
    sink.emit_call(calls::MATCHES, 2);
    sink.emit_branch_unless(next);
}

fn emit_bind<B, S>(sink: &mut S, slot: &Slot)
where
    S: CodeSink<B>,
{
    let names = slot.pattern.names();
    if names.is_empty() && !slot.pattern.has_writes() {
        return;
    }
    sink.emit_literal(Literal::Pattern(Arc::clone(&slot.pattern)));
    sink.emit_local_get(&slot.local);
    sink.emit_call(calls::BIND, 2);
    sink.emit_local_set(locals::BOUND);
    for (i, name) in names.iter().enumerate() {
        sink.declare_local(name);
        sink.emit_local_get(locals::BOUND);
        sink.emit_literal(Literal::Value(Value::Int(i as i64)));
        sink.emit_call(calls::AT, 2);
        sink.emit_local_set(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::{Assembler, Instr, Routine};

    fn assemble(set: &DispatchSet<u8>) -> Routine<u8> {
        compile(set, Assembler::new()).unwrap()
    }

    #[test]
    fn empty_set_compiles_to_immediate_fallback() {
        let routine = assemble(&DispatchSet::new("f"));
        assert_eq!(routine.calls_to(calls::SUPER), 1);
        assert!(matches!(routine.code.last(), Some(Instr::Raise(_))));
    }

    #[test]
    fn initialize_never_calls_super() {
        let mut set = DispatchSet::new(CONSTRUCTOR);
        set.insert(Branch::new(1).argument(Pattern::literal(0)));
        let routine = assemble(&set);
        assert_eq!(routine.calls_to(calls::SUPER), 0);
        assert!(routine.raises());
    }

    #[test]
    fn total_set_omits_failure_path() {
        let mut set = DispatchSet::new("f");
        set.insert(Branch::new(1).argument(Pattern::literal(0)));
        set.insert(Branch::new(2).argument(Pattern::binding("x")));
        let routine = assemble(&set);
        assert!(!routine.raises());
        assert_eq!(routine.calls_to(calls::SUPER), 0);
    }

    #[test]
    fn receiver_test_skipped_when_always_matching() {
        let mut set = DispatchSet::new("f");
        set.insert(Branch::new(1).argument(Pattern::literal(0)));
        assert_eq!(assemble(&set).calls_to(calls::MATCHES), 1);

        let mut typed = DispatchSet::new("f");
        typed.insert(
            Branch::new(1)
                .receiver(Pattern::kind("Integer"))
                .argument(Pattern::literal(0)),
        );
        assert_eq!(assemble(&typed).calls_to(calls::MATCHES), 2);
    }

    #[test]
    fn variadic_sets_test_counts() {
        let mut set = DispatchSet::new("f");
        set.insert(Branch::new(1).argument(Pattern::binding("a")));
        set.insert(
            Branch::new(2)
                .argument(Pattern::binding("a"))
                .argument(Pattern::binding("b")),
        );
        let routine = assemble(&set);
        assert!(routine.arity.splat);
        assert_eq!(routine.arity.required, 0);
        assert_eq!(routine.calls_to(calls::SIZE), 2);
        assert_eq!(routine.calls_to(calls::EQUAL), 2);
    }

    #[test]
    fn positional_splat_is_tested_for_a_list() {
        let mut set = DispatchSet::new("f");
        set.insert(Branch::new(1).argument(Pattern::splat(Pattern::wildcard())));
        let routine = assemble(&set);
        assert_eq!(routine.calls_to(calls::MATCHES), 1);
        assert!(routine.raises());

        let mut tail = DispatchSet::new("g");
        tail.insert(Branch::new(1).splat(Pattern::splat(Pattern::wildcard())));
        let routine = assemble(&tail);
        assert_eq!(routine.calls_to(calls::MATCHES), 0);
        assert!(!routine.raises());
    }

    #[test]
    fn inconsistent_forms_fail_at_compile_time() {
        let mut set = DispatchSet::new("f");
        set.insert(Branch::new(1).argument(Pattern::wildcard()));
        set.insert(Branch::new(2).post(Pattern::wildcard()).splat(Pattern::wildcard()));
        let err = compile(&set, Assembler::new()).unwrap_err();
        assert!(matches!(err, KestrelError::InconsistentArgumentForms { .. }));
    }
}
