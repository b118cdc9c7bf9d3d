//! Unified, `miette`-based diagnostics for the Kestrel core.
//!
//! Every failure produced by operator resolution, macro expansion, pattern
//! matching or dispatch compilation is a [`KestrelError`]. Errors are built
//! with the `err_msg!` and `err_ctx!` macros, which fill in the
//! [`ErrorContext`] so call sites never assemble it by hand.
//!
//! - `err_msg!(Internal, "label {} was never placed", id)`
//! - `err_ctx!(InvalidPattern, "cannot use a block as a pattern", node.line)`
//! - `err_ctx!(Parse, msg, line, help)`
//!
//! Compile-time members of the taxonomy abort the current compilation unit
//! only. Runtime members (`DispatchMismatch`, `PatternMismatch`) travel
//! through the host's ordinary error channel and are expected to be caught.

use std::sync::Arc;

use miette::{Diagnostic, LabeledSpan, NamedSource, SourceCode};
use thiserror::Error;

use crate::ast::value::Value;

pub type SourceArc = Arc<NamedSource<String>>;
pub type BoxedCause = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Type-safe classification of a [`KestrelError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorType {
    UnknownOperator,
    ExpansionFailure,
    RecursionLimit,
    InconsistentArgumentForms,
    DispatchMismatch,
    PatternMismatch,
    InvalidPattern,
    Parse,
    Config,
    Internal,
}

impl ErrorType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorType::UnknownOperator => "UnknownOperator",
            ErrorType::ExpansionFailure => "ExpansionFailure",
            ErrorType::RecursionLimit => "RecursionLimit",
            ErrorType::InconsistentArgumentForms => "InconsistentArgumentForms",
            ErrorType::DispatchMismatch => "DispatchMismatch",
            ErrorType::PatternMismatch => "PatternMismatch",
            ErrorType::InvalidPattern => "InvalidPattern",
            ErrorType::Parse => "Parse",
            ErrorType::Config => "Config",
            ErrorType::Internal => "Internal",
        }
    }

    /// Runtime conditions user code is expected to catch.
    pub fn is_catchable(&self) -> bool {
        matches!(
            self,
            ErrorType::DispatchMismatch | ErrorType::PatternMismatch
        )
    }

    /// Failures that abort compilation of the current unit.
    pub fn is_compile_time(&self) -> bool {
        !self.is_catchable()
    }
}

impl std::fmt::Display for ErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An additional source line worth pointing at.
#[derive(Debug, Clone)]
pub struct RelatedLine {
    pub line: usize,
    pub label: String,
}

/// Minimal, composable error context.
#[derive(Debug, Default)]
pub struct ErrorContext {
    /// Source text the line numbers refer to, when the host has it.
    pub source: Option<SourceArc>,
    /// 1-based source line of the offending node.
    pub line: Option<usize>,
    pub help: Option<String>,
    pub related: Vec<RelatedLine>,
}

impl ErrorContext {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn at_line(line: usize) -> Self {
        Self {
            line: Some(line),
            ..Self::default()
        }
    }

    pub fn with_help(line: usize, help: impl Into<String>) -> Self {
        Self {
            line: Some(line),
            help: Some(help.into()),
            ..Self::default()
        }
    }
}

/// Unified error type for every Kestrel failure mode.
#[derive(Debug, Error)]
pub enum KestrelError {
    #[error("unknown operator `{operator}`")]
    UnknownOperator {
        operator: String,
        ctx: ErrorContext,
        #[source]
        source: Option<BoxedCause>,
    },
    #[error("expansion failed: {message}")]
    ExpansionFailure {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<BoxedCause>,
    },
    #[error("expansion recursion limit: {message}")]
    RecursionLimit {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<BoxedCause>,
    },
    #[error("inconsistent argument forms: {message}")]
    InconsistentArgumentForms {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<BoxedCause>,
    },
    #[error("no branch of `{name}` matched {}", render_arguments(.arguments))]
    DispatchMismatch {
        name: String,
        receiver: Value,
        arguments: Vec<Value>,
        ctx: ErrorContext,
        #[source]
        source: Option<BoxedCause>,
    },
    #[error("pattern mismatch: {message}")]
    PatternMismatch {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<BoxedCause>,
    },
    #[error("invalid pattern: {message}")]
    InvalidPattern {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<BoxedCause>,
    },
    #[error("parse error: {message}")]
    Parse {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<BoxedCause>,
    },
    #[error("configuration error: {message}")]
    Config {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<BoxedCause>,
    },
    #[error("internal error: {message}")]
    Internal {
        message: String,
        ctx: ErrorContext,
        #[source]
        source: Option<BoxedCause>,
    },
}

fn render_arguments(arguments: &[Value]) -> String {
    let inner = arguments
        .iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    format!("({})", inner)
}

impl KestrelError {
    fn get_ctx(&self) -> &ErrorContext {
        match self {
            KestrelError::UnknownOperator { ctx, .. } => ctx,
            KestrelError::ExpansionFailure { ctx, .. } => ctx,
            KestrelError::RecursionLimit { ctx, .. } => ctx,
            KestrelError::InconsistentArgumentForms { ctx, .. } => ctx,
            KestrelError::DispatchMismatch { ctx, .. } => ctx,
            KestrelError::PatternMismatch { ctx, .. } => ctx,
            KestrelError::InvalidPattern { ctx, .. } => ctx,
            KestrelError::Parse { ctx, .. } => ctx,
            KestrelError::Config { ctx, .. } => ctx,
            KestrelError::Internal { ctx, .. } => ctx,
        }
    }

    fn get_ctx_mut(&mut self) -> &mut ErrorContext {
        match self {
            KestrelError::UnknownOperator { ctx, .. } => ctx,
            KestrelError::ExpansionFailure { ctx, .. } => ctx,
            KestrelError::RecursionLimit { ctx, .. } => ctx,
            KestrelError::InconsistentArgumentForms { ctx, .. } => ctx,
            KestrelError::DispatchMismatch { ctx, .. } => ctx,
            KestrelError::PatternMismatch { ctx, .. } => ctx,
            KestrelError::InvalidPattern { ctx, .. } => ctx,
            KestrelError::Parse { ctx, .. } => ctx,
            KestrelError::Config { ctx, .. } => ctx,
            KestrelError::Internal { ctx, .. } => ctx,
        }
    }

    pub fn error_type(&self) -> ErrorType {
        match self {
            KestrelError::UnknownOperator { .. } => ErrorType::UnknownOperator,
            KestrelError::ExpansionFailure { .. } => ErrorType::ExpansionFailure,
            KestrelError::RecursionLimit { .. } => ErrorType::RecursionLimit,
            KestrelError::InconsistentArgumentForms { .. } => {
                ErrorType::InconsistentArgumentForms
            }
            KestrelError::DispatchMismatch { .. } => ErrorType::DispatchMismatch,
            KestrelError::PatternMismatch { .. } => ErrorType::PatternMismatch,
            KestrelError::InvalidPattern { .. } => ErrorType::InvalidPattern,
            KestrelError::Parse { .. } => ErrorType::Parse,
            KestrelError::Config { .. } => ErrorType::Config,
            KestrelError::Internal { .. } => ErrorType::Internal,
        }
    }

    /// The source line this error points at, if known.
    pub fn line(&self) -> Option<usize> {
        self.get_ctx().line
    }

    /// Attaches source text so rendered reports can label the offending line.
    pub fn with_source(mut self, source: SourceArc) -> Self {
        self.get_ctx_mut().source = Some(source);
        self
    }

    pub fn unknown_operator(operator: impl Into<String>, line: usize) -> Self {
        KestrelError::UnknownOperator {
            operator: operator.into(),
            ctx: ErrorContext::with_help(
                line,
                "declare the operator before the expression that uses it",
            ),
            source: None,
        }
    }

    pub fn dispatch_mismatch(
        name: impl Into<String>,
        receiver: Value,
        arguments: Vec<Value>,
    ) -> Self {
        KestrelError::DispatchMismatch {
            name: name.into(),
            receiver,
            arguments,
            ctx: ErrorContext::none(),
            source: None,
        }
    }

    /// Wraps a producer failure, pointing at the unexpanded node.
    pub fn expansion_failure(
        rendered_node: &str,
        line: usize,
        cause: KestrelError,
    ) -> Self {
        KestrelError::ExpansionFailure {
            message: format!("while expanding `{}`", rendered_node),
            ctx: ErrorContext::at_line(line),
            source: Some(Box::new(cause)),
        }
    }

    fn label_text(&self) -> String {
        match self {
            KestrelError::UnknownOperator { operator, .. } => {
                format!("`{}` is not in the operator table", operator)
            }
            KestrelError::DispatchMismatch { name, .. } => {
                format!("call to `{}` matched no branch", name)
            }
            KestrelError::ExpansionFailure { message, .. }
            | KestrelError::RecursionLimit { message, .. }
            | KestrelError::InconsistentArgumentForms { message, .. }
            | KestrelError::PatternMismatch { message, .. }
            | KestrelError::InvalidPattern { message, .. }
            | KestrelError::Parse { message, .. }
            | KestrelError::Config { message, .. }
            | KestrelError::Internal { message, .. } => message.clone(),
        }
    }
}

/// Byte offset and length of a 1-based line within `text`.
pub fn line_extent(text: &str, line: usize) -> Option<(usize, usize)> {
    let mut offset = 0;
    for (index, content) in text.split('\n').enumerate() {
        if index + 1 == line {
            return Some((offset, content.len().max(1)));
        }
        offset += content.len() + 1;
    }
    None
}

impl Diagnostic for KestrelError {
    fn code<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        Some(Box::new(format!("kestrel::{}", self.error_type())))
    }

    fn help<'a>(&'a self) -> Option<Box<dyn std::fmt::Display + 'a>> {
        self.get_ctx()
            .help
            .as_ref()
            .map(|h| Box::new(h) as Box<dyn std::fmt::Display + 'a>)
    }

    fn source_code(&self) -> Option<&dyn SourceCode> {
        self.get_ctx()
            .source
            .as_ref()
            .map(|s| s.as_ref() as &dyn SourceCode)
    }

    fn labels(&self) -> Option<Box<dyn Iterator<Item = LabeledSpan> + '_>> {
        let ctx = self.get_ctx();
        let text = ctx.source.as_ref()?.inner();
        let mut labels = Vec::new();
        if let Some((start, len)) = ctx.line.and_then(|l| line_extent(text, l)) {
            labels.push(LabeledSpan::new(Some(self.label_text()), start, len));
        }
        for rel in &ctx.related {
            if let Some((start, len)) = line_extent(text, rel.line) {
                labels.push(LabeledSpan::new(Some(rel.label.clone()), start, len));
            }
        }
        if labels.is_empty() {
            None
        } else {
            Some(Box::new(labels.into_iter()))
        }
    }
}

/// Converts a source string into a named source for error contexts.
pub fn to_error_source<S: AsRef<str>>(name: &str, source: S) -> SourceArc {
    Arc::new(NamedSource::new(name, source.as_ref().to_string()))
}

/// Constructs a message-only `KestrelError` variant.
#[macro_export]
macro_rules! err_msg {
    ($variant:ident, $msg:literal $(, $arg:expr)* $(,)?) => {
        $crate::KestrelError::$variant {
            message: format!($msg $(, $arg)*),
            ctx: $crate::ErrorContext::none(),
            source: None,
        }
    };
}

/// Constructs a `KestrelError` variant pointing at a source line, with optional help.
#[macro_export]
macro_rules! err_ctx {
    ($variant:ident, $msg:expr, $line:expr, $help:expr) => {
        $crate::KestrelError::$variant {
            message: $msg.to_string(),
            ctx: $crate::ErrorContext::with_help($line, $help),
            source: None,
        }
    };
    ($variant:ident, $msg:expr, $line:expr) => {
        $crate::KestrelError::$variant {
            message: $msg.to_string(),
            ctx: $crate::ErrorContext::at_line($line),
            source: None,
        }
    };
}
