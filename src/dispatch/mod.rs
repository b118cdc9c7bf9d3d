//! Branches, dispatch sets and their precision order.
//!
//! A [`DispatchSet`] holds every [`Branch`] of one name, sorted most
//! specific first. The same structure backs ordinary multi-branch routines
//! (bodies are host callables) and macro rule lists (bodies are expansion
//! producers). [`compiler`] turns a set into one routine through a
//! [`crate::sink::CodeSink`]; [`DispatchSet::select`] interprets the same
//! semantics in-process.

use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

use log::trace;

use crate::ast::value::Value;
use crate::patterns::precision::pairwise_cmp;
use crate::patterns::{Bindings, Pattern};
use crate::KestrelError;

pub mod compiler;

pub use compiler::compile;

// ============================================================================
// BRANCHES
// ============================================================================

/// One pattern-guarded clause.
#[derive(Clone)]
pub struct Branch<B> {
    pub receiver: Pattern,
    pub arguments: Vec<Pattern>,
    /// Optional arguments and the producers of their default values.
    pub defaults: Vec<(Pattern, B)>,
    pub splat: Option<Pattern>,
    pub post: Vec<Pattern>,
    pub block: Option<Pattern>,
    pub body: B,
    /// Skip the receiver test entirely.
    pub always_matches: bool,
}

impl<B> Branch<B> {
    /// A branch with a wildcard receiver and no arguments.
    pub fn new(body: B) -> Self {
        Self {
            receiver: Pattern::wildcard(),
            arguments: Vec::new(),
            defaults: Vec::new(),
            splat: None,
            post: Vec::new(),
            block: None,
            body,
            always_matches: true,
        }
    }

    pub fn receiver(mut self, pattern: Pattern) -> Self {
        self.always_matches = pattern.is_wildcard();
        self.receiver = pattern;
        self
    }

    pub fn argument(mut self, pattern: Pattern) -> Self {
        self.arguments.push(pattern);
        self
    }

    pub fn arguments(mut self, patterns: Vec<Pattern>) -> Self {
        self.arguments.extend(patterns);
        self
    }

    pub fn default_arg(mut self, pattern: Pattern, producer: B) -> Self {
        self.defaults.push((pattern, producer));
        self
    }

    pub fn splat(mut self, pattern: Pattern) -> Self {
        self.splat = Some(pattern);
        self
    }

    pub fn post(mut self, pattern: Pattern) -> Self {
        self.post.push(pattern);
        self
    }

    pub fn block(mut self, pattern: Pattern) -> Self {
        self.block = Some(pattern);
        self
    }

    /// Number of fixed argument positions.
    pub fn positional_count(&self) -> usize {
        self.arguments.len() + self.defaults.len() + self.post.len()
    }

    fn default_patterns(&self) -> Vec<Pattern> {
        self.defaults.iter().map(|(p, _)| p.clone()).collect()
    }

    /// True when the branch matches every call it can be handed.
    pub fn is_total(&self, variadic: bool) -> bool {
        let positions_total = self
            .arguments
            .iter()
            .chain(self.defaults.iter().map(|(p, _)| p))
            .chain(self.post.iter())
            .all(Pattern::is_wildcard);
        let splat_total = self.splat.as_ref().map_or(true, Pattern::is_wildcard_tail);
        let block_total = self.block.as_ref().map_or(true, Pattern::is_wildcard);
        let count_total = !variadic || (self.arguments.is_empty() && self.splat.is_some());
        (self.always_matches || self.receiver.is_wildcard())
            && positions_total
            && splat_total
            && block_total
            && count_total
    }
}

impl<B> fmt::Debug for Branch<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl<B> fmt::Display for Branch<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self.arguments.iter().map(|p| p.to_string()).collect();
        parts.extend(self.defaults.iter().map(|(p, _)| format!("{} = ..", p)));
        if let Some(s) = &self.splat {
            parts.push(format!("*{}", s));
        }
        parts.extend(self.post.iter().map(|p| p.to_string()));
        write!(f, "{}.({})", self.receiver, parts.join(", "))?;
        if let Some(b) = &self.block {
            write!(f, " &{}", b)?;
        }
        Ok(())
    }
}

// ============================================================================
// PRECISION ORDER
// ============================================================================

/// Entries of a [`PrecisionList`].
pub trait Ranked {
    /// `Greater` means `self` should be tried first.
    fn precision_cmp(&self, other: &Self) -> Ordering;
    /// Same patterns up to binder names.
    fn shape_equivalent(&self, other: &Self) -> bool;
}

impl<B> Ranked for Branch<B> {
    /// Lexicographic: fixed-arity before splatted, then positional count,
    /// receiver, required arguments pairwise, defaults, splat, post
    /// arguments, block.
    fn precision_cmp(&self, other: &Self) -> Ordering {
        self.splat
            .is_none()
            .cmp(&other.splat.is_none())
            .then_with(|| self.positional_count().cmp(&other.positional_count()))
            .then_with(|| self.receiver.precision_cmp(&other.receiver))
            .then_with(|| pairwise_cmp(&self.arguments, &other.arguments))
            .then_with(|| pairwise_cmp(&self.default_patterns(), &other.default_patterns()))
            .then_with(|| match (&self.splat, &other.splat) {
                (Some(a), Some(b)) => a.precision_cmp(b),
                _ => Ordering::Equal,
            })
            .then_with(|| pairwise_cmp(&self.post, &other.post))
            .then_with(|| match (&self.block, &other.block) {
                (Some(a), Some(b)) => a.precision_cmp(b),
                (Some(_), None) => Ordering::Greater,
                (None, Some(_)) => Ordering::Less,
                (None, None) => Ordering::Equal,
            })
    }

    fn shape_equivalent(&self, other: &Self) -> bool {
        fn all(a: &[Pattern], b: &[Pattern]) -> bool {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| x.shape_equivalent(y))
        }
        fn opt(a: &Option<Pattern>, b: &Option<Pattern>) -> bool {
            match (a, b) {
                (Some(x), Some(y)) => x.shape_equivalent(y),
                (None, None) => true,
                _ => false,
            }
        }
        self.receiver.shape_equivalent(&other.receiver)
            && all(&self.arguments, &other.arguments)
            && all(&self.default_patterns(), &other.default_patterns())
            && opt(&self.splat, &other.splat)
            && all(&self.post, &other.post)
            && opt(&self.block, &other.block)
    }
}

/// Outcome of [`PrecisionList::insert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Insertion {
    Inserted(usize),
    Replaced(usize),
}

/// A list kept sorted by descending precision without a sort pass.
///
/// Entries are shared `Arc`s; cloning the list is cheap and an insertion
/// never mutates an entry another clone can see.
#[derive(Debug)]
pub struct PrecisionList<T> {
    entries: Vec<Arc<T>>,
}

impl<T> Clone for PrecisionList<T> {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl<T> Default for PrecisionList<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T: Ranked> PrecisionList<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts before the first entry the new one strictly outranks,
    /// replaces a precision-equal shape-equivalent entry, or appends.
    pub fn insert(&mut self, entry: T) -> Insertion {
        for (i, existing) in self.entries.iter().enumerate() {
            match entry.precision_cmp(existing) {
                Ordering::Greater => {
                    self.entries.insert(i, Arc::new(entry));
                    return Insertion::Inserted(i);
                }
                Ordering::Equal if entry.shape_equivalent(existing) => {
                    self.entries[i] = Arc::new(entry);
                    return Insertion::Replaced(i);
                }
                _ => {}
            }
        }
        self.entries.push(Arc::new(entry));
        Insertion::Inserted(self.entries.len() - 1)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<T>> {
        self.entries.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Arc<T>> {
        self.entries.get(index)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ============================================================================
// DISPATCH SETS
// ============================================================================

/// The argument layout every branch of a set agrees on, or the variadic
/// layout used when branches differ only in required count or splat.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArgumentForm {
    pub required: usize,
    pub optional: usize,
    pub splat: bool,
    pub post: usize,
    pub block: bool,
    /// Branches disagree on positional count; each tests the count itself.
    pub variadic: bool,
}

/// All branches sharing one externally visible name.
pub struct DispatchSet<B> {
    pub name: String,
    branches: PrecisionList<Branch<B>>,
}

impl<B> Clone for DispatchSet<B> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            branches: self.branches.clone(),
        }
    }
}

impl<B> fmt::Debug for DispatchSet<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchSet")
            .field("name", &self.name)
            .field("branches", &self.branches.len())
            .finish()
    }
}

/// A successful in-process selection.
#[derive(Debug)]
pub struct Selected<'a, B> {
    pub index: usize,
    pub branch: &'a Branch<B>,
    pub bindings: Bindings,
}

impl<B> DispatchSet<B> {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            branches: PrecisionList::default(),
        }
    }

    pub fn insert(&mut self, branch: Branch<B>) -> Insertion {
        trace!("insert `{}` branch {}", self.name, branch);
        self.branches.insert(branch)
    }

    /// Copy-on-write insertion: the receiver is untouched.
    pub fn with_branch(&self, branch: Branch<B>) -> (Self, Insertion) {
        let mut next = self.clone();
        let outcome = next.insert(branch);
        (next, outcome)
    }

    pub fn branches(&self) -> impl Iterator<Item = &Branch<B>> {
        self.branches.iter().map(|b| b.as_ref())
    }

    pub fn len(&self) -> usize {
        self.branches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.branches.is_empty()
    }

    /// Checks that the branches agree on an argument layout.
    pub fn argument_form(&self) -> Result<ArgumentForm, KestrelError> {
        let mut branches = self.branches();
        let Some(first) = branches.next() else {
            return Ok(ArgumentForm {
                required: 0,
                optional: 0,
                splat: false,
                post: 0,
                block: false,
                variadic: false,
            });
        };
        let mut form = ArgumentForm {
            required: first.arguments.len(),
            optional: first.defaults.len(),
            splat: first.splat.is_some(),
            post: first.post.len(),
            block: first.block.is_some(),
            variadic: false,
        };
        for branch in branches {
            form.block |= branch.block.is_some();
            if branch.arguments.len() != form.required || branch.splat.is_some() != form.splat {
                form.variadic = true;
            }
            if branch.defaults.len() != form.optional || branch.post.len() != form.post {
                return Err(self.inconsistent(branch));
            }
        }
        if form.variadic {
            if form.optional > 0 || form.post > 0 {
                return Err(self.inconsistent(first));
            }
            form.required = 0;
            form.splat = true;
        }
        Ok(form)
    }

    fn inconsistent(&self, branch: &Branch<B>) -> KestrelError {
        crate::err_msg!(
            InconsistentArgumentForms,
            "branch {} of `{}` disagrees with its siblings on optional or post arguments",
            branch,
            self.name
        )
    }

    /// Finds the first branch matching the call.
    ///
    /// Missing optional arguments are passed as `Value::Undefined`;
    /// `default_of` produces their values.
    pub fn select_with<F>(
        &self,
        receiver: &Value,
        arguments: &[Value],
        block: Option<&Value>,
        mut default_of: F,
    ) -> Result<Option<Selected<'_, B>>, KestrelError>
    where
        F: FnMut(&B) -> Result<Value, KestrelError>,
    {
        for (index, branch) in self.branches().enumerate() {
            if let Some(bindings) = try_branch(branch, receiver, arguments, block, &mut default_of)? {
                return Ok(Some(Selected {
                    index,
                    branch,
                    bindings,
                }));
            }
        }
        Ok(None)
    }

    /// [`DispatchSet::select_with`] for sets without default arguments.
    pub fn select(
        &self,
        receiver: &Value,
        arguments: &[Value],
    ) -> Result<Option<Selected<'_, B>>, KestrelError> {
        self.select_with(receiver, arguments, None, |_| Ok(Value::Undefined))
    }
}

fn try_branch<B, F>(
    branch: &Branch<B>,
    receiver: &Value,
    arguments: &[Value],
    block: Option<&Value>,
    default_of: &mut F,
) -> Result<Option<Bindings>, KestrelError>
where
    F: FnMut(&B) -> Result<Value, KestrelError>,
{
    let mut out = Bindings::new();
    if !branch.always_matches && !branch.receiver.match_into(receiver, &mut out) {
        return Ok(None);
    }
    let required = branch.arguments.len();
    let post = branch.post.len();
    let fixed = required + post;
    let max = fixed + branch.defaults.len();
    if arguments.len() < fixed || (branch.splat.is_none() && arguments.len() > max) {
        return Ok(None);
    }
    let (head, rest) = arguments.split_at(required);
    if !branch
        .arguments
        .iter()
        .zip(head)
        .all(|(p, v)| p.match_into(v, &mut out))
    {
        return Ok(None);
    }
    let available = rest.len() - post;
    let supplied = available.min(branch.defaults.len());
    for (i, (pattern, producer)) in branch.defaults.iter().enumerate() {
        let value = match rest.get(i).filter(|_| i < supplied) {
            Some(v) if !v.is_undefined() => v.clone(),
            _ => default_of(producer)?,
        };
        if !pattern.match_into(&value, &mut out) {
            return Ok(None);
        }
    }
    let splat_end = rest.len() - post;
    if let Some(splat) = &branch.splat {
        let collected = Value::List(rest[supplied..splat_end].to_vec());
        if !splat.match_into(&collected, &mut out) {
            return Ok(None);
        }
    }
    if !branch
        .post
        .iter()
        .zip(&rest[splat_end..])
        .all(|(p, v)| p.match_into(v, &mut out))
    {
        return Ok(None);
    }
    if let Some(pattern) = &branch.block {
        if !pattern.match_into(block.unwrap_or(&Value::Nil), &mut out) {
            return Ok(None);
        }
    }
    Ok(Some(out))
}
