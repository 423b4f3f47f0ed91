//! Session lifecycle, script execution, table creation and native registration.

use std::fs;

use burrow::{
    CollectStringPrint, Error, ObjectType, Session, SessionConfig, StdLib, Vm, VmError, VmResult,
};
use pretty_assertions::assert_eq;

fn add(vm: &mut Vm) -> VmResult<usize> {
    let sum = vm.get_integer(1)? + vm.get_integer(2)?;
    vm.push_integer(sum);
    Ok(1)
}

fn two_results(vm: &mut Vm) -> VmResult<usize> {
    vm.push_integer(1);
    vm.push_integer(2);
    Ok(2)
}

fn fail(vm: &mut Vm) -> VmResult<usize> {
    let reason = vm.get_string(1)?.to_owned();
    Err(VmError::runtime(reason))
}

fn open_collecting() -> (Session, CollectStringPrint) {
    let output = CollectStringPrint::new();
    let mut session = Session::new();
    session.open_with(SessionConfig::new().print_writer(Box::new(output.clone())));
    (session, output)
}

// =============================================================================
// 1. Lifecycle
// =============================================================================

/// A session is usable between `open` and `close`, and reopening starts fresh.
#[test]
fn open_close_reopen() {
    let mut session = Session::new();
    assert!(!session.is_open());

    session.open(256);
    assert!(session.is_open());
    assert_eq!(session.stack_size(), 256);
    session.run_source("a.py", "x = 1").unwrap();
    assert!(session.get("x").is_ok());

    session.open(512);
    assert_eq!(session.stack_size(), 512);
    assert!(session.get("x").is_err(), "reopening replaces the VM");

    session.close();
    assert!(!session.is_open());
    session.close();
}

/// Using a closed session is a caller error.
#[test]
#[should_panic(expected = "session is not open")]
fn closed_session_panics() {
    let session = Session::new();
    let _ = session.get("x");
}

/// Only the configured libraries are installed; the base library always is.
#[test]
fn configured_libraries() {
    let mut session = Session::new();
    session.open_with(SessionConfig::new().libraries([StdLib::Math]));
    session.run_source("a.py", "root = sqrt(16.0)\nn = len('abc')").unwrap();
    assert_eq!(session.get("root").unwrap().extract::<f64>().unwrap(), 4.0);
    assert_eq!(session.get("n").unwrap().extract::<i64>().unwrap(), 3);

    let err = session.run_source("b.py", "s = upper('x')").unwrap_err();
    assert!(matches!(err, Error::ScriptFailure { .. }), "{err:?}");
}

// =============================================================================
// 2. Tables and natives
// =============================================================================

/// `new_table` binds an empty table, replacing whatever the global held.
#[test]
fn new_table_binds_empty_table() {
    let mut session = Session::new();
    session.open(1024);
    session.run_source("a.py", "config = 5").unwrap();

    let config = session.new_table("config").unwrap();
    assert_eq!(config.object_type(), ObjectType::Table);
    assert_eq!(config.len().unwrap(), 0);

    let again = session.get("config").unwrap();
    assert_eq!(again.object_type(), ObjectType::Table);
    assert!(again.keys().unwrap().is_empty());
    assert_eq!(session.stack_top(), 0);
}

/// A registered native is callable from scripts.
#[test]
fn registered_function_is_callable() {
    let mut session = Session::new();
    session.open(1024);
    session.register_function(None, "add", add).unwrap();
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("calc.py");
    fs::write(&script, "result = add(2, 3)\n").unwrap();
    session.run_script(&script).unwrap();
    assert_eq!(session.get("result").unwrap().extract::<i64>().unwrap(), 5);

    let add_handle = session.get("add").unwrap();
    assert_eq!(add_handle.object_type(), ObjectType::NativeClosure);
    assert_eq!(add_handle.call::<i64>(&[&40, &2]).unwrap(), 42);
}

/// Natives can be registered into an existing global table.
#[test]
fn register_into_sub_table() {
    let mut session = Session::new();
    session.open(1024);
    session.new_table("host").unwrap();
    session.register_function(Some("host"), "add", add).unwrap();
    session.run_source("calc.py", "result = host.add(20, 22)").unwrap();
    assert_eq!(session.get("result").unwrap().extract::<i64>().unwrap(), 42);
    assert!(session.get("add").is_err(), "not bound globally");

    let err = session.register_function(Some("nope"), "add", add).unwrap_err();
    assert_eq!(err.to_string(), "root[nope] does not exist");

    session.run_source("x.py", "scalar = 1").unwrap();
    let err = session.register_function(Some("scalar"), "add", add).unwrap_err();
    assert!(
        matches!(err, Error::TypeMismatch { expected: "table", found: ObjectType::Integer, .. }),
        "{err:?}"
    );
    assert_eq!(session.stack_top(), 0);
}

/// Natives returning more than one value are rejected as bad calls.
#[test]
fn multiple_returns_are_bad_calls() {
    let mut session = Session::new();
    session.open(1024);
    session.register_function(None, "two", two_results).unwrap();

    let err = session.run_source("calc.py", "two()").unwrap_err();
    match err {
        Error::ScriptFailure {
            source: VmError::BadCall { function, .. },
            ..
        } => assert_eq!(function, "two"),
        other => panic!("expected a bad call, got {other:?}"),
    }

    let err = session.get("two").unwrap().call::<()>(&[]).unwrap_err();
    assert!(matches!(&err, Error::BadCall { function, .. } if function == "two"), "{err:?}");
    assert_eq!(session.stack_top(), 0);
}

/// Builtins with a fixed arity reject other argument counts.
#[test]
fn wrong_arity_is_bad_call() {
    let mut session = Session::new();
    session.open(1024);
    let err = session.run_source("calc.py", "n = len('a', 'b')").unwrap_err();
    assert!(
        matches!(&err, Error::ScriptFailure { source: VmError::BadCall { function, .. }, .. } if function == "len"),
        "{err:?}"
    );
}

// =============================================================================
// 3. Script failures
// =============================================================================

/// A syntax error names the file, and the session keeps working afterwards.
#[test]
fn syntax_error_then_recovery() {
    let (session, output) = open_collecting();
    let dir = tempfile::tempdir().unwrap();
    let broken = dir.path().join("broken.py");
    fs::write(&broken, "x = (\n").unwrap();

    let err = session.run_script(&broken).unwrap_err();
    match &err {
        Error::ScriptFailure { path, source } => {
            assert_eq!(path, &broken.display().to_string());
            assert!(matches!(source, VmError::Compile { .. }), "{source:?}");
        }
        other => panic!("expected ScriptFailure, got {other:?}"),
    }
    assert!(output.errors().contains(" : error "), "compile errors are reported: {}", output.errors());
    assert_eq!(session.stack_top(), 0);

    let fixed = dir.path().join("fixed.py");
    fs::write(&fixed, "x = 10\n").unwrap();
    session.run_script(&fixed).unwrap();
    assert_eq!(session.get("x").unwrap().extract::<i64>().unwrap(), 10);
}

/// Runtime errors carry a call stack with source lines and are reported to the error sink.
#[test]
fn runtime_error_traceback() {
    let (session, output) = open_collecting();
    let source = "def inner():\n    return missing_name\n\ninner()\n";
    let err = session.run_source("calc.py", source).unwrap_err();

    let Error::ScriptFailure { path, source } = &err else {
        panic!("expected ScriptFailure, got {err:?}");
    };
    assert_eq!(path, "calc.py");
    assert_eq!(source.message(), "the index 'missing_name' does not exist");
    let frames: Vec<_> = source
        .traceback()
        .iter()
        .map(|frame| (frame.function.as_str(), frame.line))
        .collect();
    assert_eq!(frames, vec![("inner", Some(2)), ("main", Some(4))]);

    let errors = output.errors();
    assert!(errors.contains("AN ERROR HAS OCCURRED [the index 'missing_name' does not exist]"), "{errors}");
    assert!(errors.contains("*FUNCTION [inner()] calc.py line [2]"), "{errors}");
    assert_eq!(session.stack_top(), 0);
}

/// Errors raised by natives unwind through a `NATIVE` frame.
#[test]
fn native_error_frame() {
    let (session, _output) = open_collecting();
    session.register_function(None, "fail", fail).unwrap();
    let err = session.run_source("calc.py", "fail('nope')").unwrap_err();
    let Error::ScriptFailure { source, .. } = &err else {
        panic!("expected ScriptFailure, got {err:?}");
    };
    assert_eq!(source.message(), "nope");
    let first = &source.traceback()[0];
    assert_eq!(first.function, "fail");
    assert_eq!(first.file, burrow::NATIVE_FILE);
}

/// A missing script file is a script failure carrying the I/O error.
#[test]
fn missing_script_file() {
    let mut session = Session::new();
    session.open(1024);
    let err = session.run_script("/definitely/not/here.py").unwrap_err();
    assert!(
        matches!(&err, Error::ScriptFailure { source: VmError::Io { .. }, path } if path == "/definitely/not/here.py"),
        "{err:?}"
    );
}

/// With error handlers off nothing is written to the error sink.
#[test]
fn error_handlers_can_be_disabled() {
    let output = CollectStringPrint::new();
    let mut session = Session::new();
    session.open_with(
        SessionConfig::new()
            .error_handlers(false)
            .print_writer(Box::new(output.clone())),
    );
    assert!(session.run_source("calc.py", "x = 1 // 0").is_err());
    assert!(session.run_source("calc.py", "x = (").is_err());
    assert_eq!(output.errors(), "");
}

/// Without debug info frames have no line numbers.
#[test]
fn debug_info_can_be_disabled() {
    let mut session = Session::new();
    session.open_with(SessionConfig::new().debug_info(false).error_handlers(false));
    let err = session.run_source("calc.py", "x = 1 // 0").unwrap_err();
    let Error::ScriptFailure { source, .. } = &err else {
        panic!("expected ScriptFailure, got {err:?}");
    };
    assert_eq!(source.traceback()[0].line, None);
}

/// Runaway recursion stops at the configured call depth.
#[test]
fn call_depth_limit() {
    let mut session = Session::new();
    session.open_with(SessionConfig::new().max_call_depth(20).error_handlers(false));
    let err = session
        .run_source("calc.py", "def down(n):\n    return down(n + 1)\ndown(0)\n")
        .unwrap_err();
    let Error::ScriptFailure { source, .. } = &err else {
        panic!("expected ScriptFailure, got {err:?}");
    };
    assert_eq!(source.message(), "stack overflow");
    assert_eq!(session.stack_top(), 0);
}

// =============================================================================
// 4. Diagnostics
// =============================================================================

/// Heap stats count live objects by type.
#[test]
fn heap_stats_by_type() {
    let mut session = Session::new();
    session.open(1024);
    let before = session.heap_stats();
    session.run_source("a.py", "items = [1, 2, 3]").unwrap();
    let after = session.heap_stats();
    assert_eq!(after.live_objects, before.live_objects + 1);
    assert_eq!(after.objects_by_type.get("Array"), Some(&1));
}

/// Print output goes to the configured writer with a trailing newline per call.
#[test]
fn print_goes_to_writer() {
    let (session, output) = open_collecting();
    session
        .run_source("a.py", "print('hello', 42)\nerror('bad', 1.0)")
        .unwrap();
    assert_eq!(output.output(), "hello 42\n");
    assert_eq!(output.errors(), "bad 1.0\n");
}

/// Raw primitives are reachable through `with_vm`, relative to the host frame.
#[test]
fn raw_primitives() {
    let mut session = Session::new();
    session.open(1024);
    session.run_source("a.py", "t = {'a': 1, 'b': 2}").unwrap();

    let top = session.with_vm(|vm| {
        vm.push_root_table();
        vm.push_string("t");
        vm.get().unwrap();
        vm.push_copy(-1).unwrap();
        vm.push_string("a");
        vm.delete_slot().unwrap();
        vm.set_top(3);
        assert_eq!(vm.get_type(-1).unwrap(), ObjectType::Null);
        vm.get_top()
    });
    assert_eq!(top, 3);
    assert_eq!(session.get("t").unwrap().len().unwrap(), 1);

    session.with_vm(|vm| vm.set_top(0));
    assert_eq!(session.stack_top(), 0);
}
