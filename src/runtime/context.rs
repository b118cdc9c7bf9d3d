use std::collections::HashMap;
use std::sync::Arc;

use crate::ast::value::Value;
use crate::patterns::SlotWrite;
use crate::runtime::Machine;
use crate::{err_msg, KestrelError};

/// A host-side routine body. Bodies read their bound names from the frame.
pub type MethodBody = Arc<dyn for<'m> Fn(&mut Frame<'m>) -> Result<Value, KestrelError> + Send + Sync>;

/// Wraps a closure as a [`MethodBody`].
pub fn body<F>(f: F) -> MethodBody
where
    F: for<'m> Fn(&mut Frame<'m>) -> Result<Value, KestrelError> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Everything a running routine sees: receiver, call arguments, locals
/// and the machine for onward calls.
pub struct Frame<'m> {
    pub(crate) machine: &'m Machine,
    /// Class whose definition is running; super calls start after it.
    pub(crate) owner: String,
    pub name: String,
    pub receiver: Value,
    pub arguments: Vec<Value>,
    pub block: Option<Value>,
    pub(crate) locals: HashMap<String, Value>,
    pub(crate) writes: Vec<SlotWrite>,
}

impl<'m> Frame<'m> {
    pub fn local(&self, name: &str) -> Option<&Value> {
        self.locals.get(name)
    }

    /// A bound name, or an internal error if the routine never bound it.
    pub fn get(&self, name: &str) -> Result<&Value, KestrelError> {
        self.local(name)
            .ok_or_else(|| err_msg!(Internal, "`{}` is not bound in `{}`", name, self.name))
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.locals.insert(name.to_string(), value);
    }

    /// Slot writes requested by attribute patterns, in match order.
    pub fn writes(&self) -> &[SlotWrite] {
        &self.writes
    }

    /// Calls another routine through the same machine.
    pub fn send(
        &self,
        receiver: Value,
        name: &str,
        arguments: Vec<Value>,
    ) -> Result<Value, KestrelError> {
        self.machine.call(receiver, name, arguments, None)
    }
}
