//! Error types for pseudo console operations
//!
//! Every failure is fatal. Errors carry the context message shown to the user
//! and, when one was pending, the OS error that caused them.

use std::fmt;
use std::io;

use thiserror::Error;

/// Which part of the launch sequence failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Host terminal state (geometry, console mode) could not be read
    EnvironmentQuery,
    /// Pipe allocation failed
    ResourceCreation,
    /// Pseudo console creation failed
    PtyCreation,
    /// Attribute list sizing, allocation or initialization failed
    AttributeList,
    /// Child process creation failed
    ProcessSpawn,
    /// Waiting on the child process failed
    ProcessWait,
    /// The relay worker could not be started
    ThreadCreation,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::EnvironmentQuery => "environment query",
            ErrorKind::ResourceCreation => "resource creation",
            ErrorKind::PtyCreation => "pseudo console creation",
            ErrorKind::AttributeList => "attribute list",
            ErrorKind::ProcessSpawn => "process spawn",
            ErrorKind::ProcessWait => "process wait",
            ErrorKind::ThreadCreation => "thread creation",
        };
        f.write_str(name)
    }
}

/// Raft error type
#[derive(Error, Debug)]
pub enum Error {
    /// Nothing to run
    #[error("No arguments supplied")]
    NoArguments,

    /// Command line rejected by the argument parser
    #[error("Invalid arguments: {0}")]
    Usage(String),

    /// Invalid option value
    #[error("Invalid configuration for '{field}': {message}")]
    Config { field: &'static str, message: String },

    /// A session step was invoked before the step it depends on
    #[error("{step} requires {requires}")]
    OutOfOrder {
        step: &'static str,
        requires: &'static str,
    },

    /// An OS call failed
    #[error("{context}")]
    Os {
        kind: ErrorKind,
        context: String,
        #[source]
        source: Option<io::Error>,
    },
}

impl Error {
    /// Build an error from the calling thread's last OS error.
    ///
    /// An error code of zero means nothing was pending; the error then carries
    /// only its context message.
    pub fn last_os(kind: ErrorKind, context: impl Into<String>) -> Self {
        let source = io::Error::last_os_error();
        Self::with_source(kind, context, source)
    }

    /// Build an error from an explicit OS error
    pub fn with_source(kind: ErrorKind, context: impl Into<String>, source: io::Error) -> Self {
        let source = match source.raw_os_error() {
            Some(0) => None,
            _ => Some(source),
        };
        Error::Os {
            kind,
            context: context.into(),
            source,
        }
    }

    /// Build an error that has no OS error behind it
    pub fn bare(kind: ErrorKind, context: impl Into<String>) -> Self {
        Error::Os {
            kind,
            context: context.into(),
            source: None,
        }
    }

    /// The failing step, for OS errors
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Error::Os { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// The OS error behind this error, if one was pending
    pub fn os_error(&self) -> Option<&io::Error> {
        match self {
            Error::Os { source, .. } => source.as_ref(),
            _ => None,
        }
    }

    /// The single diagnostic line printed before a fatal exit
    pub fn diagnostic(&self) -> String {
        match self.os_error() {
            Some(source) => format!("[ERROR] {}: {}", self, system_message(source)),
            None => format!("[ERROR] {}", self),
        }
    }
}

/// Human-readable text for an OS error, without trailing line breaks
pub fn system_message(err: &io::Error) -> String {
    #[cfg(windows)]
    {
        if let Some(text) = err
            .raw_os_error()
            .and_then(crate::pty::windows::format_system_message)
        {
            return text;
        }
    }

    err.to_string().trim_end().to_string()
}

/// Result type for raft operations
pub type Result<T> = std::result::Result<T, Error>;
