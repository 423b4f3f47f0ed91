use std::fmt;

use crate::{value::ObjectType, vm::VmError};

/// One step of a handle path: a named field or an integer index.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Key {
    Field(String),
    Index(i64),
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Field(name) => f.write_str(name),
            Self::Index(i) => write!(f, "{i}"),
        }
    }
}

impl From<&str> for Key {
    fn from(name: &str) -> Self {
        Self::Field(name.to_owned())
    }
}

impl From<String> for Key {
    fn from(name: String) -> Self {
        Self::Field(name)
    }
}

impl From<&String> for Key {
    fn from(name: &String) -> Self {
        Self::Field(name.clone())
    }
}

impl From<i64> for Key {
    fn from(index: i64) -> Self {
        Self::Index(index)
    }
}

impl From<i32> for Key {
    fn from(index: i32) -> Self {
        Self::Index(i64::from(index))
    }
}

impl From<usize> for Key {
    fn from(index: usize) -> Self {
        Self::Index(i64::try_from(index).unwrap_or(i64::MAX))
    }
}

/// Errors surfaced to the host by sessions and handles.
///
/// Every variant is raised only after the VM stack has been restored to the
/// height it had before the failing operation started.
#[derive(Debug)]
pub enum Error {
    /// A path step did not resolve. `parent` is the display name of the
    /// immediate container (`"root"` for globals, `"stack"` for stack slots).
    MissingKey { parent: String, key: Key },
    /// A typed read or container operation found the wrong type tag.
    TypeMismatch {
        name: String,
        expected: &'static str,
        found: ObjectType,
    },
    /// A script failed to load, compile or run.
    ScriptFailure { path: String, source: VmError },
    /// A native call used an unsupported argument or return pattern.
    BadCall { function: String, message: String },
    /// A call made through a handle raised an error inside the VM.
    Runtime { name: String, source: VmError },
}

impl Error {
    /// Classifies a VM error raised while calling `name`.
    pub(crate) fn from_call(name: impl Into<String>, error: VmError) -> Self {
        match error {
            VmError::BadCall { function, message } => Self::BadCall { function, message },
            source => Self::Runtime {
                name: name.into(),
                source,
            },
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingKey { parent, key } => write!(f, "{parent}[{key}] does not exist"),
            Self::TypeMismatch { name, expected, .. } => write!(f, "{name} is not a {expected}"),
            Self::ScriptFailure { path, source } => write!(f, "script '{path}' failed: {source}"),
            Self::BadCall { function, message } => write!(f, "bad call to {function}: {message}"),
            Self::Runtime { name, source } => write!(f, "call to {name} failed: {source}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ScriptFailure { source, .. } | Self::Runtime { source, .. } => Some(source),
            _ => None,
        }
    }
}

/// Result type alias for session and handle operations.
pub type Result<T, E = Error> = std::result::Result<T, E>;
