//! # Kestrel Engine
//!
//! One compilation session. The engine owns its hygiene counter and
//! expansion trace, and holds handles to the process-wide registries
//! (operators, macro rules, dispatch sets), which other sessions may share.
//!
//! This is the surface a module loader drives: `resolve`, `expand`,
//! `register_macro`, `register_branch` and `compile_dispatch_set`.

use std::sync::Arc;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::ast::{AstNode, RunLink, ShapeKey};
use crate::dispatch::{compile, Branch, DispatchSet, Insertion};
use crate::macros::{
    self, CompiledUnit, Expander, MacroExpansionStep, MacroRegistry, Phase, Producer, Salt,
    SaltCheckpoint, MAX_MACRO_RECURSION_DEPTH,
};
use crate::operators::{self, OperatorDef, OperatorTable};
use crate::patterns::Pattern;
use crate::registry::{MethodRegistry, Shared};
use crate::runtime::{MethodBody, MethodRoutine};
use crate::sink::{Assembler, CodeSink};
use crate::{err_msg, KestrelError};

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Session settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Longest rewrite chain before `RecursionLimit`.
    pub max_expansion_depth: usize,
    /// Record every rule application.
    pub record_trace: bool,
    /// Placed between a base name and its salt tick.
    pub salt_separator: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_expansion_depth: MAX_MACRO_RECURSION_DEPTH,
            record_trace: true,
            salt_separator: ":".to_string(),
        }
    }
}

impl EngineConfig {
    /// Reads settings from JSON; absent fields keep their defaults.
    pub fn from_json(text: &str) -> Result<Self, KestrelError> {
        serde_json::from_str(text).map_err(|e| {
            KestrelError::Config {
                message: format!("invalid engine configuration: {}", e),
                ctx: crate::ErrorContext::at_line(e.line()),
                source: Some(Box::new(e)),
            }
        })
    }
}

// ============================================================================
// REGISTRIES
// ============================================================================

/// Handles to the process-wide registries. Clones share state.
#[derive(Clone, Default)]
pub struct Registries {
    pub operators: Shared<OperatorTable>,
    pub macros: Shared<MacroRegistry>,
    pub methods: Shared<MethodRegistry>,
}

impl Registries {
    /// Fresh registries with the standard operator prelude.
    pub fn standard() -> Self {
        Self {
            operators: Shared::new(OperatorTable::standard()),
            ..Self::default()
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

pub struct Engine {
    config: EngineConfig,
    registries: Registries,
    salt: Salt,
    trace: Vec<MacroExpansionStep>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    /// A session over fresh registries seeded with the standard operators.
    pub fn new(config: EngineConfig) -> Self {
        Self::with_registries(config, Registries::standard())
    }

    /// A session over registries shared with other sessions.
    pub fn with_registries(config: EngineConfig, registries: Registries) -> Self {
        Self {
            config,
            registries,
            salt: Salt::default(),
            trace: Vec::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    // ------------------------------------------------------------------------
    // Operators
    // ------------------------------------------------------------------------

    pub fn declare_operator(&self, def: OperatorDef) {
        self.registries.operators.update(|t| t.declare(def));
    }

    /// Resolves one operator run against the current table.
    pub fn resolve(
        &self,
        head: Option<AstNode>,
        links: &[RunLink],
        line: usize,
    ) -> Result<AstNode, KestrelError> {
        self.registries
            .operators
            .read(|t| operators::resolve(t, head, links, line))
    }

    /// Resolves every run inside `node`.
    pub fn resolve_all(&self, node: &AstNode) -> Result<AstNode, KestrelError> {
        self.registries
            .operators
            .read(|t| operators::resolve_all(t, node))
    }

    // ------------------------------------------------------------------------
    // Macros
    // ------------------------------------------------------------------------

    /// Expands `node` to its fixed point.
    pub fn expand(&mut self, node: &AstNode) -> Result<AstNode, KestrelError> {
        Expander::new(
            &self.registries.operators,
            &self.registries.macros,
            &mut self.salt,
            &self.config,
            &mut self.trace,
        )
        .expand(node)
    }

    /// Expands statements in order, so a statement's expansion may affect
    /// the ones after it.
    pub fn expand_all(&mut self, nodes: &[AstNode]) -> Result<Vec<AstNode>, KestrelError> {
        nodes.iter().map(|n| self.expand(n)).collect()
    }

    pub fn register_macro(&self, key: ShapeKey, pattern: Pattern, producer: Producer) -> Insertion {
        debug!("register macro {} {}", key, pattern);
        self.registries
            .macros
            .update(|r| r.insert(key, macros::rule(pattern, producer)))
    }

    /// Registers a rule written as an example node; operator runs in the
    /// example are resolved first.
    pub fn define_macro(&self, shape: &AstNode, producer: Producer) -> Result<Insertion, KestrelError> {
        let shape = self.resolve_all(shape)?;
        let (key, pattern) = macros::macro_pattern(&shape)?;
        Ok(self.register_macro(key, pattern, producer))
    }

    pub fn trace(&self) -> &[MacroExpansionStep] {
        &self.trace
    }

    pub fn take_trace(&mut self) -> Vec<MacroExpansionStep> {
        std::mem::take(&mut self.trace)
    }

    // ------------------------------------------------------------------------
    // Hygiene epochs
    // ------------------------------------------------------------------------

    pub fn salt(&self) -> Salt {
        self.salt
    }

    /// Marks the start of a compilation unit.
    pub fn begin_unit(&self) -> SaltCheckpoint {
        self.salt.checkpoint()
    }

    /// Closes a unit, recording the ticks its expansions consumed.
    pub fn finish_unit(&self, start: SaltCheckpoint, phase: Phase) -> CompiledUnit {
        let unit = CompiledUnit::record(&self.salt, start, phase);
        debug!("unit finished in {:?} phase, salt delta {}", phase, unit.salt_delta);
        unit
    }

    /// Enters a unit; see [`CompiledUnit::enter`].
    pub fn enter_unit(&mut self, unit: &CompiledUnit, precompiled: bool) {
        unit.enter(&mut self.salt, precompiled);
    }

    // ------------------------------------------------------------------------
    // Dispatch
    // ------------------------------------------------------------------------

    pub fn register_branch(&self, name: &str, branch: Branch<MethodBody>) -> Insertion {
        self.registries
            .methods
            .update(|r| r.insert(name.to_string(), branch))
    }

    /// The current set for `name`; an unknown name has no branches.
    pub fn dispatch_set(&self, name: &str) -> Arc<DispatchSet<MethodBody>> {
        self.registries
            .methods
            .read(|r| r.get(&name.to_string()))
            .unwrap_or_else(|| Arc::new(DispatchSet::new(name)))
    }

    /// Compiles the set for `name` into a routine for the reference host.
    pub fn compile_dispatch_set(&self, name: &str) -> Result<MethodRoutine, KestrelError> {
        self.compile_dispatch_set_into(name, Assembler::new())
    }

    /// Compiles the set for `name` through any code sink.
    pub fn compile_dispatch_set_into<S>(&self, name: &str, sink: S) -> Result<S::Output, KestrelError>
    where
        S: CodeSink<MethodBody>,
    {
        let set = self.dispatch_set(name);
        compile(&set, sink)
    }

    /// Like [`Engine::compile_dispatch_set`], but an unknown name is an error.
    pub fn compile_defined(&self, name: &str) -> Result<MethodRoutine, KestrelError> {
        if !self.registries.methods.read(|r| r.contains(&name.to_string())) {
            return Err(err_msg!(Internal, "no dispatch set named `{}`", name));
        }
        self.compile_dispatch_set(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::builder::*;
    use crate::ast::value::Value;
    use crate::runtime::{body, Machine};

    #[test]
    fn config_reads_partial_json() {
        let config = EngineConfig::from_json(r#"{ "max_expansion_depth": 4 }"#).unwrap();
        assert_eq!(config.max_expansion_depth, 4);
        assert!(config.record_trace);
        assert_eq!(config.salt_separator, ":");
    }

    #[test]
    fn bad_config_is_a_config_error() {
        let err = EngineConfig::from_json("{ nope").unwrap_err();
        assert!(matches!(err, KestrelError::Config { .. }));
    }

    #[test]
    fn sessions_share_registries_but_not_salt() {
        let registries = Registries::standard();
        let mut a = Engine::with_registries(EngineConfig::default(), registries.clone());
        let mut b = Engine::with_registries(EngineConfig::default(), registries);
        a.define_macro(
            &call("tmp", vec![], 1),
            Producer::native(|_, ctx| Ok(Value::Node(ctx.fresh_word("t")))),
        )
        .unwrap();
        assert_eq!(a.expand(&call("tmp", vec![], 1)).unwrap().pretty(), "t:0");
        assert_eq!(b.expand(&call("tmp", vec![], 1)).unwrap().pretty(), "t:0");
        assert_eq!(a.salt().value(), 1);
    }

    #[test]
    fn unknown_set_compiles_to_fallback() {
        let engine = Engine::default();
        let routine = engine.compile_dispatch_set("missing").unwrap();
        assert!(routine.raises());
        assert!(engine.compile_defined("missing").is_err());
    }

    #[test]
    fn compiled_sets_run_on_the_machine() {
        let engine = Engine::default();
        engine.register_branch(
            "greet",
            Branch::new(body(|f| Ok(Value::Str(format!("hi {}", f.get("who")?)))))
                .argument(Pattern::binding("who")),
        );
        let mut machine = Machine::new();
        machine.install("Object", engine.compile_dispatch_set("greet").unwrap());
        let out = machine
            .call(Value::Nil, "greet", vec![Value::Str("kim".into())], None)
            .unwrap();
        assert_eq!(out, Value::Str("hi \"kim\"".into()));
    }
}
