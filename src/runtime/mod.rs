//! Reference host for compiled dispatch routines.
//!
//! [`Machine`] installs routines per (class, name), finds the definition
//! for a receiver by walking its class chain, materializes arguments per
//! the routine's arity and interprets the instructions, including the
//! helper calls the dispatch compiler relies on. It is deliberately small:
//! a harness for the code sink contract, not a virtual machine.

use std::collections::HashMap;
use std::sync::Arc;

use log::{debug, trace};

use crate::ast::value::Value;
use crate::dispatch::compiler::{calls, locals, CONSTRUCTOR};
use crate::patterns::Pattern;
use crate::sink::{Arity, Instr, Literal, RaiseKind, Routine};
use crate::{err_msg, KestrelError};

pub mod context;

pub use context::{body, Frame, MethodBody};

/// A compiled routine as the machine stores it.
pub type MethodRoutine = Routine<MethodBody>;

/// Stack operands.
enum Operand {
    Value(Value),
    Pattern(Arc<Pattern>),
    Body(MethodBody),
}

#[derive(Default)]
pub struct Machine {
    routines: HashMap<(String, String), Arc<MethodRoutine>>,
}

impl Machine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs or replaces the definition of `routine.name` on `owner`.
    pub fn install(&mut self, owner: &str, routine: MethodRoutine) {
        debug!("install `{}` on {}", routine.name, owner);
        self.routines
            .insert((owner.to_string(), routine.name.clone()), Arc::new(routine));
    }

    pub fn is_defined(&self, owner: &str, name: &str) -> bool {
        self.routines
            .contains_key(&(owner.to_string(), name.to_string()))
    }

    /// Calls `name` on `receiver`, starting the lookup at its most specific
    /// class.
    pub fn call(
        &self,
        receiver: Value,
        name: &str,
        arguments: Vec<Value>,
        block: Option<Value>,
    ) -> Result<Value, KestrelError> {
        let chain = receiver.class_chain();
        match self.lookup(&chain, 0, name) {
            Some((owner, routine)) => self.run(owner, routine, receiver, arguments, block),
            None => Err(KestrelError::dispatch_mismatch(name, receiver, arguments)),
        }
    }

    fn lookup(
        &self,
        chain: &[String],
        from: usize,
        name: &str,
    ) -> Option<(String, Arc<MethodRoutine>)> {
        chain.iter().skip(from).find_map(|class| {
            self.routines
                .get(&(class.clone(), name.to_string()))
                .map(|r| (class.clone(), Arc::clone(r)))
        })
    }

    /// The definition `super` would reach from `frame`.
    fn super_of(&self, frame: &Frame<'_>) -> Option<(String, Arc<MethodRoutine>)> {
        self.super_from(&frame.receiver, &frame.owner, &frame.name)
    }

    fn super_from(
        &self,
        receiver: &Value,
        owner: &str,
        name: &str,
    ) -> Option<(String, Arc<MethodRoutine>)> {
        let chain = receiver.class_chain();
        let position = chain.iter().position(|c| c == owner)?;
        self.lookup(&chain, position + 1, name)
    }

    fn run(
        &self,
        owner: String,
        routine: Arc<MethodRoutine>,
        receiver: Value,
        arguments: Vec<Value>,
        block: Option<Value>,
    ) -> Result<Value, KestrelError> {
        trace!("enter {}#{}", owner, routine.name);
        if !routine.arity.accepts(arguments.len()) {
            // Same fallback as a failed pattern test.
            if routine.name != CONSTRUCTOR {
                if let Some((parent, inherited)) = self.super_from(&receiver, &owner, &routine.name) {
                    trace!(
                        "{}#{} takes no {} arguments; trying {}",
                        owner,
                        routine.name,
                        arguments.len(),
                        parent
                    );
                    return self.run(parent, inherited, receiver, arguments, block);
                }
            }
            return Err(KestrelError::dispatch_mismatch(
                &routine.name,
                receiver,
                arguments,
            ));
        }
        let mut frame = Frame {
            machine: self,
            owner,
            name: routine.name.clone(),
            locals: materialize(&routine.arity, &receiver, &arguments, block.as_ref()),
            receiver,
            arguments,
            block,
            writes: Vec::new(),
        };
        self.execute(&routine, &mut frame)
    }

    fn execute(&self, routine: &MethodRoutine, frame: &mut Frame<'_>) -> Result<Value, KestrelError> {
        let mut stack: Vec<Operand> = Vec::new();
        let mut pc = 0;
        while let Some(instr) = routine.code.get(pc) {
            pc += 1;
            match instr {
                Instr::Literal(Literal::Value(v)) => stack.push(Operand::Value(v.clone())),
                Instr::Literal(Literal::Pattern(p)) => stack.push(Operand::Pattern(Arc::clone(p))),
                Instr::Literal(Literal::Body(b)) => stack.push(Operand::Body(Arc::clone(b))),
                Instr::LocalGet(name) => {
                    let value = frame.local(name).cloned().unwrap_or(Value::Nil);
                    stack.push(Operand::Value(value));
                }
                Instr::LocalSet(name) => {
                    let value = pop_value(&mut stack)?;
                    frame.set(name, value);
                }
                Instr::Pop => {
                    stack.pop();
                }
                Instr::Call { name, argc } => {
                    let at = stack.len().checked_sub(*argc).ok_or_else(|| {
                        err_msg!(Internal, "stack underflow calling `{}`", name)
                    })?;
                    let operands = stack.split_off(at);
                    let result = self.host_call(frame, name, operands)?;
                    stack.push(Operand::Value(result));
                }
                Instr::BranchIf(target) => {
                    if pop_value(&mut stack)?.is_truthy() {
                        pc = *target;
                    }
                }
                Instr::BranchUnless(target) => {
                    if !pop_value(&mut stack)?.is_truthy() {
                        pc = *target;
                    }
                }
                Instr::Goto(target) => pc = *target,
                Instr::Return => return pop_value(&mut stack),
                Instr::Raise(RaiseKind::DispatchMismatch { name }) => {
                    return Err(KestrelError::dispatch_mismatch(
                        name,
                        frame.receiver.clone(),
                        frame.arguments.clone(),
                    ));
                }
            }
        }
        Err(err_msg!(Internal, "`{}` ran off the end of its code", routine.name))
    }

    fn host_call(
        &self,
        frame: &mut Frame<'_>,
        name: &str,
        operands: Vec<Operand>,
    ) -> Result<Value, KestrelError> {
        let mut operands = operands.into_iter();
        let mut next = || {
            operands
                .next()
                .ok_or_else(|| err_msg!(Internal, "missing operand for `{}`", name))
        };
        match name {
            calls::MATCHES => {
                let pattern = expect_pattern(next()?)?;
                let value = expect_value(next()?)?;
                Ok(Value::Bool(pattern.matches(&value)))
            }
            calls::BIND => {
                let pattern = expect_pattern(next()?)?;
                let value = expect_value(next()?)?;
                let bindings = pattern.bind_or_raise(&value, 0)?;
                frame.writes.extend(bindings.writes().iter().cloned());
                Ok(Value::List(
                    pattern
                        .names()
                        .iter()
                        .map(|n| bindings.get(n).cloned().unwrap_or(Value::Nil))
                        .collect(),
                ))
            }
            calls::AT => {
                let list = expect_list(next()?)?;
                let index = expect_index(next()?)?;
                Ok(list.get(index).cloned().unwrap_or(Value::Nil))
            }
            calls::SIZE => Ok(Value::Int(expect_list(next()?)?.len() as i64)),
            calls::DROP => {
                let list = expect_list(next()?)?;
                let n = expect_index(next()?)?.min(list.len());
                Ok(Value::List(list[n..].to_vec()))
            }
            calls::EQUAL => {
                let a = expect_value(next()?)?;
                let b = expect_value(next()?)?;
                Ok(Value::Bool(a == b))
            }
            calls::AT_LEAST => {
                let a = expect_index(next()?)?;
                let b = expect_index(next()?)?;
                Ok(Value::Bool(a >= b))
            }
            calls::IS_UNDEFINED => Ok(Value::Bool(expect_value(next()?)?.is_undefined())),
            calls::INVOKE => match next()? {
                Operand::Body(b) => b(frame),
                _ => Err(err_msg!(Internal, "`{}` expects a body", calls::INVOKE)),
            },
            calls::SUPER_CALLABLE => Ok(Value::Bool(self.super_of(frame).is_some())),
            calls::SUPER => match self.super_of(frame) {
                Some((owner, routine)) => self.run(
                    owner,
                    routine,
                    frame.receiver.clone(),
                    frame.arguments.clone(),
                    frame.block.clone(),
                ),
                None => Err(KestrelError::dispatch_mismatch(
                    &frame.name,
                    frame.receiver.clone(),
                    frame.arguments.clone(),
                )),
            },
            other => Err(err_msg!(Internal, "unknown host call `{}`", other)),
        }
    }
}

/// Lays out arguments in the slots the routine's arity promises.
fn materialize(
    arity: &Arity,
    receiver: &Value,
    arguments: &[Value],
    block: Option<&Value>,
) -> HashMap<String, Value> {
    let mut slots = HashMap::new();
    slots.insert(locals::SELF.to_string(), receiver.clone());
    let required = arity.required.min(arguments.len());
    for (i, v) in arguments[..required].iter().enumerate() {
        slots.insert(locals::required(i), v.clone());
    }
    let post_start = arguments.len().saturating_sub(arity.post).max(required);
    let middle = &arguments[required..post_start];
    let supplied = arity.optional.min(middle.len());
    for i in 0..arity.optional {
        let value = middle.get(i).filter(|_| i < supplied).cloned();
        slots.insert(locals::optional(i), value.unwrap_or(Value::Undefined));
    }
    if arity.splat {
        slots.insert(locals::SPLAT.to_string(), Value::List(middle[supplied..].to_vec()));
    }
    for (i, v) in arguments[post_start..].iter().enumerate() {
        slots.insert(locals::post(i), v.clone());
    }
    slots.insert(
        locals::BLOCK.to_string(),
        block.cloned().unwrap_or(Value::Nil),
    );
    slots
}

fn pop_value(stack: &mut Vec<Operand>) -> Result<Value, KestrelError> {
    match stack.pop() {
        Some(operand) => expect_value(operand),
        None => Err(err_msg!(Internal, "stack underflow")),
    }
}

fn expect_value(operand: Operand) -> Result<Value, KestrelError> {
    match operand {
        Operand::Value(v) => Ok(v),
        _ => Err(err_msg!(Internal, "expected a value operand")),
    }
}

fn expect_pattern(operand: Operand) -> Result<Arc<Pattern>, KestrelError> {
    match operand {
        Operand::Pattern(p) => Ok(p),
        _ => Err(err_msg!(Internal, "expected a pattern operand")),
    }
}

fn expect_list(operand: Operand) -> Result<Vec<Value>, KestrelError> {
    match expect_value(operand)? {
        Value::List(items) => Ok(items),
        other => Err(err_msg!(Internal, "expected a list, got {}", other)),
    }
}

fn expect_index(operand: Operand) -> Result<usize, KestrelError> {
    match expect_value(operand)? {
        Value::Int(n) if n >= 0 => Ok(n as usize),
        other => Err(err_msg!(Internal, "expected an index, got {}", other)),
    }
}
