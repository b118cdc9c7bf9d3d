//! The abstract code sink the dispatch compiler emits into.
//!
//! A host backend implements [`CodeSink`] to receive one routine at a time.
//! The crate ships [`Assembler`], which records the emitted instructions
//! into a [`Routine`] with labels resolved to instruction offsets; the
//! reference host in [`crate::runtime`] executes those.
//!
//! The instruction model is a value stack. `emit_call(name, argc)` pops
//! `argc` operands (pushed left to right) and pushes one result;
//! `emit_local_set` and the conditional branches pop their operand.

use std::fmt;
use std::sync::Arc;

use log::trace;

use crate::ast::value::Value;
use crate::patterns::Pattern;
use crate::{err_msg, KestrelError};

/// A label handed out by [`CodeSink::new_label`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Label(pub usize);

/// Literal operands. `B` is the body type of the dispatch set.
#[derive(Clone)]
pub enum Literal<B> {
    Value(Value),
    Pattern(Arc<Pattern>),
    Body(B),
}

impl<B> fmt::Debug for Literal<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Value(v) => write!(f, "Value({})", v),
            Literal::Pattern(p) => write!(f, "Pattern({})", p),
            Literal::Body(_) => write!(f, "Body(..)"),
        }
    }
}

/// Conditions a routine can raise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RaiseKind {
    /// No branch matched; the host attaches the argument snapshot.
    DispatchMismatch { name: String },
}

/// How the host must materialize arguments before entry.
///
/// Required arguments land in `arg:0..`, optional ones in `arg:opt:0..`
/// (`Value::Undefined` when not supplied), the splat in `arg:splat`, post
/// arguments in `arg:post:0..` and the block in `arg:block`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Arity {
    pub required: usize,
    pub optional: usize,
    pub splat: bool,
    pub post: usize,
    pub block: bool,
}

impl Arity {
    pub fn accepts(&self, count: usize) -> bool {
        let min = self.required + self.post;
        count >= min && (self.splat || count <= min + self.optional)
    }
}

/// The capability the dispatch compiler needs from a backend.
pub trait CodeSink<B> {
    type Output;

    fn set_arity(&mut self, arity: Arity);
    fn declare_local(&mut self, name: &str);
    fn emit_literal(&mut self, literal: Literal<B>);
    fn emit_local_get(&mut self, name: &str);
    fn emit_local_set(&mut self, name: &str);
    fn emit_call(&mut self, name: &str, argc: usize);
    fn emit_pop(&mut self);
    fn new_label(&mut self) -> Label;
    fn emit_label(&mut self, label: Label);
    fn emit_branch_if(&mut self, label: Label);
    fn emit_branch_unless(&mut self, label: Label);
    fn emit_goto(&mut self, label: Label);
    fn emit_return(&mut self);
    fn emit_raise(&mut self, kind: RaiseKind);
    fn finish(self, name: &str) -> Result<Self::Output, KestrelError>;
}

// ============================================================================
// ASSEMBLER
// ============================================================================

/// One resolved instruction. Jump targets are instruction offsets.
#[derive(Clone)]
pub enum Instr<B> {
    Literal(Literal<B>),
    LocalGet(String),
    LocalSet(String),
    Call { name: String, argc: usize },
    Pop,
    BranchIf(usize),
    BranchUnless(usize),
    Goto(usize),
    Return,
    Raise(RaiseKind),
}

impl<B> fmt::Debug for Instr<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Instr::Literal(l) => write!(f, "literal {:?}", l),
            Instr::LocalGet(n) => write!(f, "get {}", n),
            Instr::LocalSet(n) => write!(f, "set {}", n),
            Instr::Call { name, argc } => write!(f, "call {}/{}", name, argc),
            Instr::Pop => write!(f, "pop"),
            Instr::BranchIf(t) => write!(f, "branch-if {}", t),
            Instr::BranchUnless(t) => write!(f, "branch-unless {}", t),
            Instr::Goto(t) => write!(f, "goto {}", t),
            Instr::Return => write!(f, "return"),
            Instr::Raise(k) => write!(f, "raise {:?}", k),
        }
    }
}

/// A finished routine.
#[derive(Clone)]
pub struct Routine<B> {
    pub name: String,
    pub arity: Arity,
    pub locals: Vec<String>,
    pub code: Vec<Instr<B>>,
}

impl<B> fmt::Debug for Routine<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "routine {} {:?}", self.name, self.arity)?;
        for (offset, instr) in self.code.iter().enumerate() {
            writeln!(f, "{:4} {:?}", offset, instr)?;
        }
        Ok(())
    }
}

impl<B> Routine<B> {
    /// Count of `call` instructions with this name; handy in tests.
    pub fn calls_to(&self, name: &str) -> usize {
        self.code
            .iter()
            .filter(|i| matches!(i, Instr::Call { name: n, .. } if n == name))
            .count()
    }

    pub fn raises(&self) -> bool {
        self.code.iter().any(|i| matches!(i, Instr::Raise(_)))
    }
}

enum Pending<B> {
    Ready(Instr<B>),
    BranchIf(Label),
    BranchUnless(Label),
    Goto(Label),
}

/// A [`CodeSink`] that builds a [`Routine`].
pub struct Assembler<B> {
    arity: Arity,
    locals: Vec<String>,
    code: Vec<Pending<B>>,
    labels: Vec<Option<usize>>,
}

impl<B> Default for Assembler<B> {
    fn default() -> Self {
        Self {
            arity: Arity::default(),
            locals: Vec::new(),
            code: Vec::new(),
            labels: Vec::new(),
        }
    }
}

impl<B> Assembler<B> {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, instr: Instr<B>) {
        self.code.push(Pending::Ready(instr));
    }

    fn target(&self, label: Label) -> Result<usize, KestrelError> {
        self.labels
            .get(label.0)
            .copied()
            .flatten()
            .ok_or_else(|| err_msg!(Internal, "label {} was never placed", label.0))
    }
}

impl<B> CodeSink<B> for Assembler<B> {
    type Output = Routine<B>;

    fn set_arity(&mut self, arity: Arity) {
        self.arity = arity;
    }

    fn declare_local(&mut self, name: &str) {
        if !self.locals.iter().any(|l| l == name) {
            self.locals.push(name.to_string());
        }
    }

    fn emit_literal(&mut self, literal: Literal<B>) {
        self.push(Instr::Literal(literal));
    }

    fn emit_local_get(&mut self, name: &str) {
        self.push(Instr::LocalGet(name.to_string()));
    }

    fn emit_local_set(&mut self, name: &str) {
        self.declare_local(name);
        self.push(Instr::LocalSet(name.to_string()));
    }

    fn emit_call(&mut self, name: &str, argc: usize) {
        self.push(Instr::Call {
            name: name.to_string(),
            argc,
        });
    }

    fn emit_pop(&mut self) {
        self.push(Instr::Pop);
    }

    fn new_label(&mut self) -> Label {
        self.labels.push(None);
        Label(self.labels.len() - 1)
    }

    fn emit_label(&mut self, label: Label) {
        if let Some(slot) = self.labels.get_mut(label.0) {
            *slot = Some(self.code.len());
        }
    }

    fn emit_branch_if(&mut self, label: Label) {
        self.code.push(Pending::BranchIf(label));
    }

    fn emit_branch_unless(&mut self, label: Label) {
        self.code.push(Pending::BranchUnless(label));
    }

    fn emit_goto(&mut self, label: Label) {
        self.code.push(Pending::Goto(label));
    }

    fn emit_return(&mut self) {
        self.push(Instr::Return);
    }

    fn emit_raise(&mut self, kind: RaiseKind) {
        self.push(Instr::Raise(kind));
    }

    fn finish(mut self, name: &str) -> Result<Routine<B>, KestrelError> {
        let pending = std::mem::take(&mut self.code);
        let mut code = Vec::with_capacity(pending.len());
        for p in pending {
            code.push(match p {
                Pending::Ready(instr) => instr,
                Pending::BranchIf(l) => Instr::BranchIf(self.target(l)?),
                Pending::BranchUnless(l) => Instr::BranchUnless(self.target(l)?),
                Pending::Goto(l) => Instr::Goto(self.target(l)?),
            });
        }
        trace!("assembled `{}`: {} instructions", name, code.len());
        Ok(Routine {
            name: name.to_string(),
            arity: self.arity,
            locals: self.locals,
            code,
        })
    }
}
