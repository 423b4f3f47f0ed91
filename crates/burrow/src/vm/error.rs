use std::{fmt, io, path::PathBuf};

/// Result type alias for VM primitives and native functions.
pub type VmResult<T> = Result<T, VmError>;

/// File name reported for frames that belong to host functions.
pub const NATIVE_FILE: &str = "NATIVE";

/// One entry of a runtime error's call stack, innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
    pub function: String,
    pub file: String,
    /// Source line, when the code was compiled with debug info.
    pub line: Option<u32>,
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.line {
            Some(line) => write!(f, "{}() {}:{line}", self.function, self.file),
            None => write!(f, "{}() {}", self.function, self.file),
        }
    }
}

/// Errors raised by the VM itself, by scripts, or by native functions.
#[derive(Debug)]
pub enum VmError {
    /// A script raised an error or an operation failed at runtime.
    Runtime {
        message: String,
        /// Filled in while the error unwinds through script and native frames.
        traceback: Vec<StackFrame>,
    },
    /// The source failed to compile.
    Compile {
        file: String,
        line: u32,
        column: u32,
        message: String,
    },
    /// A script file could not be read.
    Io { path: PathBuf, source: io::Error },
    /// A native function was called with the wrong argument count, or returned
    /// an unsupported number of values.
    BadCall { function: String, message: String },
}

impl VmError {
    /// Creates a runtime error with an empty traceback.
    ///
    /// This is what native functions return to raise a script-visible error.
    #[must_use]
    pub fn runtime(message: impl Into<String>) -> Self {
        Self::Runtime {
            message: message.into(),
            traceback: Vec::new(),
        }
    }

    #[must_use]
    pub fn bad_call(function: impl Into<String>, message: impl Into<String>) -> Self {
        Self::BadCall {
            function: function.into(),
            message: message.into(),
        }
    }

    /// The bare message, without file positions or frames.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Runtime { message, .. } | Self::Compile { message, .. } | Self::BadCall { message, .. } => {
                message.clone()
            }
            Self::Io { source, .. } => source.to_string(),
        }
    }

    /// Frames collected while a runtime error unwound; empty for other variants.
    #[must_use]
    pub fn traceback(&self) -> &[StackFrame] {
        match self {
            Self::Runtime { traceback, .. } => traceback,
            _ => &[],
        }
    }

    pub(crate) fn push_frame(&mut self, frame: impl FnOnce() -> StackFrame) {
        if let Self::Runtime { traceback, .. } = self {
            traceback.push(frame());
        }
    }
}

impl fmt::Display for VmError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Runtime { message, traceback } => {
                write!(f, "{message}")?;
                if let Some(frame) = traceback.first() {
                    write!(f, " (in {frame})")?;
                }
                Ok(())
            }
            Self::Compile {
                file,
                line,
                column,
                message,
            } => write!(f, "{file} line = ({line}) column = ({column}) : error {message}"),
            Self::Io { path, source } => write!(f, "cannot read '{}': {source}", path.display()),
            Self::BadCall { function, message } => write!(f, "{function}: {message}"),
        }
    }
}

impl std::error::Error for VmError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io { source, .. } => Some(source),
            _ => None,
        }
    }
}
