use std::{collections::BTreeMap, error::Error, fs, path::Path};

use burrow::{CollectStringPrint, Error as BurrowError, Session, SessionConfig, VmError};

/// Represents the expected outcome of a test fixture
#[derive(Debug, Clone)]
enum Expectation {
    /// Expect a runtime error with exactly this message
    Raise(String),
    /// Expect a compile error whose message contains this text
    CompileError(String),
    /// Expect success, then compare `tostring(result)`
    Result(String),
    /// Expect success, then compare everything the script printed (`\n` separated)
    Output(String),
    /// Expect success, then check the counts of named globals, excluding the
    /// runner's own handle
    RefCounts(BTreeMap<String, usize>),
    /// Expect success without checking anything else; fixtures rely on `assert`
    NoException,
}

/// Parse a fixture file into code and the expected outcome.
///
/// The expectation comment, when present, is the LAST line:
/// - `# Raise=message` - runtime error message
/// - `# CompileError=fragment` - compile error containing the fragment
/// - `# Result=value` - `tostring(result)` after the run
/// - `# Output=line1\nline2` - printed output, with `\n` written literally
/// - `# ref-counts={'var': count, ...}` - reference counts of named globals
fn parse_fixture(content: &str) -> (String, Expectation) {
    let lines: Vec<&str> = content.lines().collect();
    assert!(!lines.is_empty(), "Empty fixture file");

    let last_line = lines[lines.len() - 1];
    let body = || lines[..lines.len() - 1].join("\n");
    let (code, expectation) = if let Some(expected) = last_line.strip_prefix("# Raise=") {
        (body(), Expectation::Raise(expected.to_owned()))
    } else if let Some(expected) = last_line.strip_prefix("# CompileError=") {
        (body(), Expectation::CompileError(expected.to_owned()))
    } else if let Some(expected) = last_line.strip_prefix("# Result=") {
        (body(), Expectation::Result(expected.to_owned()))
    } else if let Some(expected) = last_line.strip_prefix("# Output=") {
        (body(), Expectation::Output(expected.replace("\\n", "\n")))
    } else if let Some(expected) = last_line.strip_prefix("# ref-counts=") {
        (body(), Expectation::RefCounts(parse_ref_counts(expected)))
    } else {
        (lines.join("\n"), Expectation::NoException)
    };
    (code, expectation)
}

/// Parses `{'var': count, 'var2': count2}`.
fn parse_ref_counts(s: &str) -> BTreeMap<String, usize> {
    let trimmed = s.trim().trim_start_matches('{').trim_end_matches('}');
    trimmed
        .split(',')
        .map(str::trim)
        .filter(|pair| !pair.is_empty())
        .map(|pair| {
            let (name, count) = pair
                .split_once(':')
                .unwrap_or_else(|| panic!("Invalid ref-counts pair format: {pair}. Expected 'name': count"));
            let name = name.trim().trim_matches('\'').trim_matches('"').to_owned();
            let count = count
                .trim()
                .parse()
                .unwrap_or_else(|_| panic!("Invalid ref count value: {count}"));
            (name, count)
        })
        .collect()
}

fn run_test(path: &Path, code: &str, expectation: &Expectation) {
    let test_name = path.display().to_string();
    let output = CollectStringPrint::new();
    let mut session = Session::new();
    session.open_with(
        SessionConfig::new()
            .error_handlers(false)
            .print_writer(Box::new(output.clone())),
    );

    let result = session.run_source(&test_name, code);
    match (expectation, result) {
        (Expectation::Raise(expected), Err(BurrowError::ScriptFailure { source, .. })) => {
            assert!(
                matches!(source, VmError::Runtime { .. }),
                "[{test_name}] expected a runtime error, got {source:?}"
            );
            assert_eq!(&source.message(), expected, "[{test_name}] error message mismatch");
        }
        (Expectation::CompileError(fragment), Err(BurrowError::ScriptFailure { source, .. })) => {
            assert!(
                matches!(source, VmError::Compile { .. }),
                "[{test_name}] expected a compile error, got {source:?}"
            );
            assert!(
                source.message().contains(fragment.as_str()),
                "[{test_name}] compile error {:?} does not mention {fragment:?}",
                source.message()
            );
        }
        (Expectation::Raise(_) | Expectation::CompileError(_), Ok(())) => {
            panic!("[{test_name}] expected an error but the script completed");
        }
        (_, Err(err)) => panic!("[{test_name}] unexpected error: {err}"),
        (Expectation::Result(expected), Ok(())) => {
            session
                .run_source("result", "__result = tostring(result)")
                .unwrap_or_else(|err| panic!("[{test_name}] fixture did not set `result`: {err}"));
            let actual: String = session.get("__result").unwrap().extract().unwrap();
            assert_eq!(&actual, expected, "[{test_name}] result mismatch");
        }
        (Expectation::Output(expected), Ok(())) => {
            assert_eq!(&output.output(), expected, "[{test_name}] output mismatch");
        }
        (Expectation::RefCounts(expected), Ok(())) => {
            let actual: BTreeMap<String, usize> = expected
                .keys()
                .map(|name| {
                    let handle = session.get(name.as_str()).unwrap();
                    let count = handle
                        .ref_count()
                        .unwrap_or_else(|| panic!("[{test_name}] {name} is not a heap value"));
                    (name.clone(), count - 1)
                })
                .collect();
            assert_eq!(&actual, expected, "[{test_name}] ref-count mismatch");
        }
        (Expectation::NoException, Ok(())) => {}
    }
    assert_eq!(session.stack_top(), 0, "[{test_name}] stack not balanced");
}

/// Test function that runs each fixture through a fresh session
fn run_test_cases(path: &Path) -> Result<(), Box<dyn Error>> {
    let content = fs::read_to_string(path)?;
    let (code, expectation) = parse_fixture(&content);
    run_test(path, &code, &expectation);
    Ok(())
}

datatest_stable::harness!(run_test_cases, "test_cases", r"^.*\.py$");
