use thiserror::Error;

use crate::sourcemap::Span;

#[derive(Debug, Error)]
pub enum Error {
    #[error("syntax error: {message}")]
    Syntax { message: String, span: Option<Span> },

    #[error("'{name}' has no value")]
    UnboundVariable { name: String, span: Option<Span> },

    #[error("I don't know how to '{name}'")]
    UnboundProcedure { name: String, span: Option<Span> },

    #[error("type error: expected {expected}, got {got}")]
    Type {
        expected: String,
        got: String,
        span: Option<Span>,
    },

    #[error("execution was interrupted")]
    BreakRequested,

    #[error("this interpreter is already running a program")]
    AlreadyRunning,

    #[error("host error: {0}")]
    Host(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    pub fn syntax(message: impl Into<String>, span: Option<Span>) -> Error {
        Error::Syntax {
            message: message.into(),
            span,
        }
    }

    pub fn unbound_variable(name: impl Into<String>, span: Option<Span>) -> Error {
        Error::UnboundVariable {
            name: name.into(),
            span,
        }
    }

    pub fn unbound_procedure(name: impl Into<String>, span: Option<Span>) -> Error {
        Error::UnboundProcedure {
            name: name.into(),
            span,
        }
    }

    pub fn type_error(
        expected: impl Into<String>,
        got: impl Into<String>,
        span: Option<Span>,
    ) -> Error {
        Error::Type {
            expected: expected.into(),
            got: got.into(),
            span,
        }
    }

    pub fn host(err: impl std::error::Error + Send + Sync + 'static) -> Error {
        Error::Host(Box::new(err))
    }

    /// The span this error should be underlined at, if any. `BreakRequested`
    /// and `AlreadyRunning` are control-surface outcomes, not parse/eval
    /// failures pinned to a location in source.
    pub fn span(&self) -> Option<Span> {
        match self {
            Error::Syntax { span, .. } => *span,
            Error::UnboundVariable { span, .. } => *span,
            Error::UnboundProcedure { span, .. } => *span,
            Error::Type { span, .. } => *span,
            Error::BreakRequested | Error::AlreadyRunning | Error::Host(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
