// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License in the LICENSE-APACHE file or at:
//     https://www.apache.org/licenses/LICENSE-2.0

//! Error types

use std::fmt;
use thiserror::Error;

/// Maximum number of error sources carried by a [`Failure`]
///
/// Failures cross the worker boundary; their payload is kept bounded.
pub const MAX_SOURCES: usize = 3;

/// Controller and host-side errors
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// A worker reported a failure while [`ErrorMode::Fatal`] is active
    ///
    /// [`ErrorMode::Fatal`]: crate::config::ErrorMode::Fatal
    #[error("background work failed: {0}")]
    Task(Failure),

    /// Config load/save error
    #[error("config load/save error")]
    Config(#[from] crate::config::Error),

    /// The worker or bridge thread could not be spawned
    #[error("failed to spawn thread")]
    Spawn(#[from] std::io::Error),
}

/// A `Result` type representing `T` or [`enum@Error`]
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned to (and from) work closures
///
/// Work closures return `Result<(), TaskError>`. [`TaskError::Stopped`] and
/// [`TaskError::Closed`] unwind the work without being treated as failure;
/// they are normally produced by [`TaskContext`](crate::TaskContext) methods
/// and propagated with `?`.
#[derive(Error, Debug)]
pub enum TaskError {
    /// The controller requested [`stop`](crate::BackgroundWork::stop)
    #[error("stop requested")]
    Stopped,

    /// The controller closed the channels
    #[error("channel closed")]
    Closed,

    /// The work failed
    #[error("{error}")]
    Failed {
        /// The reported error
        error: Box<dyn std::error::Error + Send + Sync + 'static>,
        /// Type name of `error`, when known
        class: Option<&'static str>,
    },
}

impl TaskError {
    /// Construct [`TaskError::Failed`] from any error, recording its type
    pub fn failed<E: std::error::Error + Send + Sync + 'static>(error: E) -> Self {
        TaskError::Failed {
            error: Box::new(error),
            class: Some(std::any::type_name::<E>()),
        }
    }

    /// True if this is a cancellation rather than a failure
    #[inline]
    pub fn is_cancellation(&self) -> bool {
        matches!(self, TaskError::Stopped | TaskError::Closed)
    }
}

impl From<Box<dyn std::error::Error + Send + Sync + 'static>> for TaskError {
    fn from(error: Box<dyn std::error::Error + Send + Sync + 'static>) -> Self {
        TaskError::Failed { error, class: None }
    }
}

impl From<String> for TaskError {
    fn from(msg: String) -> Self {
        TaskError::from(Box::<dyn std::error::Error + Send + Sync>::from(msg))
    }
}

impl From<&str> for TaskError {
    fn from(msg: &str) -> Self {
        TaskError::from(Box::<dyn std::error::Error + Send + Sync>::from(msg))
    }
}

/// Classification of a [`Failure`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The work closure returned [`TaskError::Failed`]
    Application,
    /// The work closure panicked
    Panic,
    /// The worker thread terminated without reporting completion
    RemoteCrash,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            FailureKind::Application => "application error",
            FailureKind::Panic => "panic",
            FailureKind::RemoteCrash => "worker crashed",
        })
    }
}

/// Description of a failure, sent across the worker boundary
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Failure {
    /// Failure class
    pub kind: FailureKind,
    /// Type name of the reported error, if known
    pub class: Option<String>,
    /// Top-level message
    pub message: String,
    /// Up to [`MAX_SOURCES`] messages from the error's source chain
    pub sources: Vec<String>,
}

impl Failure {
    /// Construct with no sources
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Failure {
            kind,
            class: None,
            message: message.into(),
            sources: vec![],
        }
    }

    /// Set the error type name
    pub fn with_class(mut self, class: Option<&str>) -> Self {
        self.class = class.map(str::to_string);
        self
    }

    /// Describe an error and (a bounded part of) its source chain
    pub fn from_error(error: &(dyn std::error::Error + 'static)) -> Self {
        let mut sources = Vec::new();
        let mut source = error.source();
        while let Some(inner) = source {
            if sources.len() == MAX_SOURCES {
                break;
            }
            sources.push(inner.to_string());
            source = inner.source();
        }

        Failure {
            kind: FailureKind::Application,
            class: None,
            message: error.to_string(),
            sources,
        }
    }

    /// Describe a panic payload
    pub fn from_panic(payload: &(dyn std::any::Any + Send)) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "(non-string panic payload)".to_string()
        };
        Failure::new(FailureKind::Panic, message)
    }
}

impl fmt::Display for Failure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind)?;
        if let Some(class) = &self.class {
            write!(f, " ({class})")?;
        }
        write!(f, ": {}", self.message)?;
        for source in &self.sources {
            write!(f, "\n  caused by: {source}")?;
        }
        Ok(())
    }
}
