use std::{
    cell::RefCell,
    io::{self, Write as _},
    rc::Rc,
};

/// Trait for handling text the VM emits: `print()` output and error reports.
///
/// Implement this trait to capture or redirect script output. The default
/// implementation [`StdPrint`] writes to stdout/stderr with a fixed tag.
pub trait PrintWriter {
    /// Called for each chunk written by the `print()` builtin.
    ///
    /// The text already carries its trailing newline.
    fn print(&mut self, output: &str);

    /// Called for each chunk written by `error()` and by the default error handlers.
    fn error(&mut self, output: &str);
}

/// Default `PrintWriter`: every chunk goes to stdout (or stderr for errors)
/// prefixed with a tag such as `[burrow]: `.
#[derive(Debug, Clone)]
pub struct StdPrint {
    tag: String,
}

impl StdPrint {
    #[must_use]
    pub fn new(tag: impl Into<String>) -> Self {
        Self { tag: tag.into() }
    }

    #[must_use]
    pub fn tag(&self) -> &str {
        &self.tag
    }
}

impl PrintWriter for StdPrint {
    fn print(&mut self, output: &str) {
        let mut stdout = io::stdout().lock();
        let _ = write!(stdout, "{}{output}", self.tag);
        let _ = stdout.flush();
    }

    fn error(&mut self, output: &str) {
        let _ = write!(io::stderr().lock(), "{}{output}", self.tag);
    }
}

/// A `PrintWriter` that collects all output into strings.
///
/// Clones share the same buffers, so a test can keep one copy while the VM
/// owns the other.
///
/// ```
/// use burrow::{CollectStringPrint, PrintWriter};
///
/// let sink = CollectStringPrint::new();
/// let mut writer = sink.clone();
/// writer.print("hello\n");
/// assert_eq!(sink.output(), "hello\n");
/// ```
#[derive(Debug, Clone, Default)]
pub struct CollectStringPrint {
    output: Rc<RefCell<String>>,
    errors: Rc<RefCell<String>>,
}

impl CollectStringPrint {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns everything printed so far.
    ///
    /// # Panics
    /// Panics if called while the VM is writing to the buffer.
    #[must_use]
    pub fn output(&self) -> String {
        self.output.borrow().clone()
    }

    /// Returns everything written to the error stream so far.
    #[must_use]
    pub fn errors(&self) -> String {
        self.errors.borrow().clone()
    }

    /// Empties both buffers.
    pub fn clear(&self) {
        self.output.borrow_mut().clear();
        self.errors.borrow_mut().clear();
    }
}

impl PrintWriter for CollectStringPrint {
    fn print(&mut self, output: &str) {
        self.output.borrow_mut().push_str(output);
    }

    fn error(&mut self, output: &str) {
        self.errors.borrow_mut().push_str(output);
    }
}

/// `PrintWriter` that ignores all output.
///
/// Useful for suppressing print output during testing or benchmarking.
#[derive(Debug, Default)]
pub struct NoPrint;

impl PrintWriter for NoPrint {
    fn print(&mut self, _output: &str) {}

    fn error(&mut self, _output: &str) {}
}
