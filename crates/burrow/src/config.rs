//! Session configuration.

use std::fmt;

use crate::{
    io::{PrintWriter, StdPrint},
    stdlib::StdLib,
    tracer::VmTracer,
    vm::{DEFAULT_MAX_CALL_DEPTH, Vm},
};

/// Initial value stack capacity used by [`crate::Session::default`].
pub const DEFAULT_STACK_SIZE: usize = 1024;

/// Prefix written before every line of the default print and error sinks.
pub const DEFAULT_TAG: &str = "[burrow]: ";

/// How [`crate::Session::open_with`] sets up its VM.
///
/// The defaults match [`crate::Session::open`]: every standard library,
/// tag-prefixed stdout/stderr sinks, the default error handlers and
/// source-position debug info.
///
/// # Example
/// ```
/// use burrow::{CollectStringPrint, Session, SessionConfig, StdLib};
///
/// let output = CollectStringPrint::new();
/// let config = SessionConfig::new()
///     .stack_size(256)
///     .libraries([StdLib::Math, StdLib::String])
///     .print_writer(Box::new(output.clone()));
///
/// let mut session = Session::new();
/// session.open_with(config);
/// session.run_source("hello", "print(upper('hi'))").unwrap();
/// assert_eq!(output.output(), "HI\n");
/// ```
pub struct SessionConfig {
    stack_size: usize,
    libraries: Vec<StdLib>,
    debug_info: bool,
    error_handlers: bool,
    tag: String,
    max_call_depth: usize,
    rng_seed: Option<u64>,
    print_writer: Option<Box<dyn PrintWriter>>,
    tracer: Option<Box<dyn VmTracer>>,
}

impl fmt::Debug for SessionConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionConfig")
            .field("stack_size", &self.stack_size)
            .field("libraries", &self.libraries)
            .field("debug_info", &self.debug_info)
            .field("error_handlers", &self.error_handlers)
            .field("tag", &self.tag)
            .field("max_call_depth", &self.max_call_depth)
            .field("rng_seed", &self.rng_seed)
            .field("custom_print_writer", &self.print_writer.is_some())
            .field("tracer", &self.tracer)
            .finish()
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stack_size: DEFAULT_STACK_SIZE,
            libraries: StdLib::all().collect(),
            debug_info: true,
            error_handlers: true,
            tag: DEFAULT_TAG.to_owned(),
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            rng_seed: None,
            print_writer: None,
            tracer: None,
        }
    }
}

impl SessionConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn stack_size(mut self, size: usize) -> Self {
        self.stack_size = size;
        self
    }

    /// Replaces the set of optional libraries. The base library is always installed.
    #[must_use]
    pub fn libraries(mut self, libraries: impl IntoIterator<Item = StdLib>) -> Self {
        self.libraries = libraries.into_iter().collect();
        self
    }

    #[must_use]
    pub fn debug_info(mut self, enabled: bool) -> Self {
        self.debug_info = enabled;
        self
    }

    /// Whether runtime and compile errors are reported to the error sink.
    #[must_use]
    pub fn error_handlers(mut self, enabled: bool) -> Self {
        self.error_handlers = enabled;
        self
    }

    /// Tag for the default stdout/stderr sinks. Ignored when a custom print writer is set.
    #[must_use]
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = tag.into();
        self
    }

    #[must_use]
    pub fn max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    /// Seeds the math library's generator so `rand()` is reproducible.
    #[must_use]
    pub fn rng_seed(mut self, seed: u64) -> Self {
        self.rng_seed = Some(seed);
        self
    }

    #[must_use]
    pub fn print_writer(mut self, writer: Box<dyn PrintWriter>) -> Self {
        self.print_writer = Some(writer);
        self
    }

    #[must_use]
    pub fn tracer(mut self, tracer: Box<dyn VmTracer>) -> Self {
        self.tracer = Some(tracer);
        self
    }

    /// Configured initial stack capacity.
    #[must_use]
    pub fn get_stack_size(&self) -> usize {
        self.stack_size
    }

    pub(crate) fn build_vm(self) -> Vm {
        let mut vm = Vm::new(self.stack_size);
        for lib in self.libraries {
            vm.register_lib(lib);
        }
        let writer = self
            .print_writer
            .unwrap_or_else(|| Box::new(StdPrint::new(self.tag)));
        vm.set_print_writer(writer);
        if let Some(tracer) = self.tracer {
            vm.set_tracer(tracer);
        }
        if let Some(seed) = self.rng_seed {
            vm.seed_rng(seed);
        }
        vm.set_error_handlers(self.error_handlers);
        vm.enable_debug_info(self.debug_info);
        vm.set_max_call_depth(self.max_call_depth);
        vm
    }
}
