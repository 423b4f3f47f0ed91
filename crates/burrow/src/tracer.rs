//! VM execution tracing infrastructure.
//!
//! The [`VmTracer`] trait defines hook points at key execution events: instruction
//! dispatch, calls and returns, raised errors, and reference acquire/release on
//! behalf of host handles. Concrete implementations collect different kinds of data:
//!
//! | Tracer | Purpose |
//! |--------|---------|
//! | [`NoopTracer`] | No-op (default) |
//! | [`StderrTracer`] | Human-readable execution log to stderr |
//! | [`RecordingTracer`] | Full event recording for post-mortem or assertions in tests |
//!
//! # Usage
//!
//! The tracer is chosen when a session is opened:
//!
//! ```ignore
//! let config = SessionConfig::new().tracer(Box::new(StderrTracer::with_limit(500)));
//! session.open_with(config);
//! ```

use std::{cell::RefCell, rc::Rc};

/// Trace event emitted during VM execution.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TraceEvent {
    /// An instruction was dispatched.
    Instruction {
        /// Index of the instruction in its code object.
        ip: usize,
        /// Instruction name, e.g. `"LoadGlobal"`.
        instr: &'static str,
        /// Stack height at dispatch, relative to the frame base.
        stack_depth: usize,
    },
    /// A function call pushed a new frame.
    Call {
        func_name: String,
        /// Call depth after the push.
        depth: usize,
    },
    /// A function returned.
    Return {
        /// Call depth after the pop.
        depth: usize,
    },
    /// A runtime error was raised.
    Error { message: String },
    /// The host acquired a reference to a heap object.
    AddRef { object: usize, ref_count: usize },
    /// The host released a reference to a heap object.
    Release { object: usize, ref_count: usize },
}

/// Trait for VM execution tracing.
///
/// All methods have default no-op implementations; implementations only
/// override the hooks they care about.
pub trait VmTracer: std::fmt::Debug {
    /// Called before each instruction dispatch in the main execution loop.
    ///
    /// This is the hottest hook. Implementations should be as lightweight as possible.
    #[inline(always)]
    fn on_instruction(&mut self, _ip: usize, _instr: &'static str, _stack_depth: usize) {}

    /// Called when a script or native function is entered.
    #[inline(always)]
    fn on_call(&mut self, _func_name: &str, _depth: usize) {}

    /// Called when a call frame is popped.
    #[inline(always)]
    fn on_return(&mut self, _depth: usize) {}

    /// Called when a runtime error is raised, before any handler runs.
    #[inline(always)]
    fn on_error(&mut self, _message: &str) {}

    /// Called after a host-side acquire; `ref_count` is the new count.
    #[inline(always)]
    fn on_add_ref(&mut self, _object: usize, _ref_count: usize) {}

    /// Called after a host-side release; `ref_count` is the remaining count (0 once freed).
    #[inline(always)]
    fn on_release(&mut self, _object: usize, _ref_count: usize) {}
}

/// A tracer that does nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopTracer;

impl VmTracer for NoopTracer {}

/// Tracer that prints a human-readable execution log to stderr.
///
/// Output format:
/// ```text
/// [    0] LoadGlobal       stack=0
/// [    1] Call             stack=3
///   >>> CALL add                  depth=2
///   <<< RETURN                    depth=1
/// ```
#[derive(Debug, Default)]
pub struct StderrTracer {
    /// Maximum number of instructions to trace. None = unlimited.
    limit: Option<usize>,
    count: usize,
    stopped: bool,
}

impl StderrTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tracer that stops logging after `limit` instructions.
    #[must_use]
    pub fn with_limit(limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::default()
        }
    }
}

impl VmTracer for StderrTracer {
    #[inline]
    fn on_instruction(&mut self, ip: usize, instr: &'static str, stack_depth: usize) {
        if self.stopped {
            return;
        }
        eprintln!("[{ip:>5}] {instr:<16} stack={stack_depth}");
        self.count += 1;
        if let Some(limit) = self.limit
            && self.count >= limit
        {
            eprintln!("--- trace limit reached ({limit} instructions) ---");
            self.stopped = true;
        }
    }

    fn on_call(&mut self, func_name: &str, depth: usize) {
        if !self.stopped {
            eprintln!("  >>> CALL {func_name:<20} depth={depth}");
        }
    }

    fn on_return(&mut self, depth: usize) {
        if !self.stopped {
            eprintln!("  <<< RETURN                    depth={depth}");
        }
    }

    fn on_error(&mut self, message: &str) {
        eprintln!("  !!! ERROR {message}");
    }
}

/// Tracer that records every event into a shared buffer.
///
/// Clones share the buffer, so a test can hand one copy to the session and
/// inspect the other afterwards. Instruction events are only recorded when
/// enabled with [`RecordingTracer::with_instructions`].
#[derive(Debug, Clone, Default)]
pub struct RecordingTracer {
    events: Rc<RefCell<Vec<TraceEvent>>>,
    instructions: bool,
}

impl RecordingTracer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Also records one event per dispatched instruction.
    #[must_use]
    pub fn with_instructions() -> Self {
        Self {
            instructions: true,
            ..Self::default()
        }
    }

    /// Returns a copy of everything recorded so far.
    #[must_use]
    pub fn events(&self) -> Vec<TraceEvent> {
        self.events.borrow().clone()
    }

    pub fn clear(&self) {
        self.events.borrow_mut().clear();
    }

    fn record(&self, event: TraceEvent) {
        self.events.borrow_mut().push(event);
    }
}

impl VmTracer for RecordingTracer {
    fn on_instruction(&mut self, ip: usize, instr: &'static str, stack_depth: usize) {
        if self.instructions {
            self.record(TraceEvent::Instruction {
                ip,
                instr,
                stack_depth,
            });
        }
    }

    fn on_call(&mut self, func_name: &str, depth: usize) {
        self.record(TraceEvent::Call {
            func_name: func_name.to_owned(),
            depth,
        });
    }

    fn on_return(&mut self, depth: usize) {
        self.record(TraceEvent::Return { depth });
    }

    fn on_error(&mut self, message: &str) {
        self.record(TraceEvent::Error {
            message: message.to_owned(),
        });
    }

    fn on_add_ref(&mut self, object: usize, ref_count: usize) {
        self.record(TraceEvent::AddRef { object, ref_count });
    }

    fn on_release(&mut self, object: usize, ref_count: usize) {
        self.record(TraceEvent::Release { object, ref_count });
    }
}
