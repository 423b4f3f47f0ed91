//! Native library behaviour as seen from scripts.

use std::fs;

use burrow::{Key, Session, SessionConfig};
use pretty_assertions::assert_eq;

fn run(source: &str) -> Session {
    let mut session = Session::new();
    session.open(1024);
    session.run_source("lib.py", source).unwrap();
    session
}

fn int(session: &Session, name: &str) -> i64 {
    session.get(name).unwrap().extract().unwrap()
}

fn string(session: &Session, name: &str) -> String {
    session.get(name).unwrap().extract().unwrap()
}

#[test]
fn format_directives() {
    let session = run("
a = format('%d-%05.2f-%s', 7, 3.14159, 'x')
b = format('%-4d|%4s|%x|%%', 12, 'ab', 255)
c = format('%+d %.3e %g', 5, 1234.0, 0.5)
");
    assert_eq!(string(&session, "a"), "7-03.14-x");
    assert_eq!(string(&session, "b"), "12  |  ab|ff|%");
    assert_eq!(string(&session, "c"), "+5 1.234e+03 0.5");
}

#[test]
fn format_needs_enough_arguments() {
    let mut session = Session::new();
    session.open_with(SessionConfig::new().error_handlers(false));
    let err = session.run_source("lib.py", "s = format('%d %d', 1)").unwrap_err();
    assert!(err.to_string().contains("not enough parameters"), "{err}");
}

/// Width and precision are limited to three digits; longer ones fail the script.
#[test]
fn format_rejects_oversized_directives() {
    let mut session = Session::new();
    session.open_with(SessionConfig::new().error_handlers(false));
    for source in [
        "s = format('%99999999999999999999d', 1)",
        "s = format('%1000000000d', 1)",
        "s = format('%.999999999f', 1.0)",
    ] {
        let err = session.run_source("lib.py", source).unwrap_err();
        assert!(err.to_string().contains("format too long"), "{err}");
        assert_eq!(session.stack_top(), 0);
    }

    session.run_source("lib.py", "s = format('%999d|%.3f', 1, 0.5)").unwrap();
    let s = string(&session, "s");
    assert_eq!(s.len(), 999 + 1 + 5);
    assert!(s.ends_with("1|0.500"), "{s}");
}

#[test]
fn split_and_strip() {
    let session = run("
parts = split('a,,b;c', ',;')
count = len(parts)
trimmed = strip('  hi  ')
left = lstrip('  hi  ')
right = rstrip('  hi  ')
");
    assert_eq!(int(&session, "count"), 3);
    let parts = session.get("parts").unwrap();
    let collected: Vec<String> = (0..3)
        .map(|i| parts.get(i).unwrap().extract().unwrap())
        .collect();
    assert_eq!(collected, vec!["a", "b", "c"]);
    assert_eq!(string(&session, "trimmed"), "hi");
    assert_eq!(string(&session, "left"), "hi  ");
    assert_eq!(string(&session, "right"), "  hi");
}

#[test]
fn case_and_affixes() {
    let session = run("
up = upper('MiXed')
down = lower('MiXed')
starts = startswith('burrow', 'bur')
ends = endswith('burrow', 'bur')
escaped = escape('a\\nb')
");
    assert_eq!(string(&session, "up"), "MIXED");
    assert_eq!(string(&session, "down"), "mixed");
    assert!(session.get("starts").unwrap().extract::<bool>().unwrap());
    assert!(!session.get("ends").unwrap().extract::<bool>().unwrap());
    assert_eq!(string(&session, "escaped"), "a\\nb");
}

#[test]
fn regular_expressions() {
    let session = run("
whole = regexp_match('a+b', 'aaab')
partial = regexp_match('a+', 'aaab')
found = regexp_search('b+', 'abbbc')
later = regexp_search('c', 'cabc', 1)
missing = regexp_search('z', 'abc')
");
    assert!(session.get("whole").unwrap().extract::<bool>().unwrap());
    assert!(!session.get("partial").unwrap().extract::<bool>().unwrap());

    let found = session.get("found").unwrap();
    assert_eq!(found.get("begin").unwrap().extract::<i64>().unwrap(), 1);
    assert_eq!(found.get("end").unwrap().extract::<i64>().unwrap(), 4);
    assert_eq!(session.get("later").unwrap().get("begin").unwrap().extract::<i64>().unwrap(), 3);
    assert!(session.get("missing").unwrap().is_null());
}

#[test]
fn math_functions() {
    let session = run("
root = sqrt(2.0)
power = pow(2, 10)
down = floor(-1.5)
up = ceil(1.2)
magnitude = abs(-7)
angle = atan2(1.0, 1.0)
");
    let root: f64 = session.get("root").unwrap().extract().unwrap();
    assert!((root - std::f64::consts::SQRT_2).abs() < 1e-12);
    assert_eq!(session.get("power").unwrap().extract::<f64>().unwrap(), 1024.0);
    assert_eq!(session.get("down").unwrap().extract::<f64>().unwrap(), -2.0);
    assert_eq!(session.get("up").unwrap().extract::<f64>().unwrap(), 2.0);
    assert_eq!(int(&session, "magnitude"), 7);
    let angle: f64 = session.get("angle").unwrap().extract().unwrap();
    assert!((angle - std::f64::consts::FRAC_PI_4).abs() < 1e-12);
    let pi: f64 = session.get("PI").unwrap().extract().unwrap();
    assert_eq!(pi, std::f64::consts::PI);
}

/// The same seed yields the same sequence, both from config and from `srand`.
#[test]
fn seeded_rand_is_deterministic() {
    const DRAW: &str = "draws = [rand(), rand(), rand()]";
    let sequence = |seed: u64| -> Vec<i64> {
        let mut session = Session::new();
        session.open_with(SessionConfig::new().rng_seed(seed));
        session.run_source("rand.py", DRAW).unwrap();
        let draws = session.get("draws").unwrap();
        (0..3).map(|i| draws.get(i).unwrap().extract().unwrap()).collect()
    };
    assert_eq!(sequence(42), sequence(42));
    assert_ne!(sequence(42), sequence(43));

    let session = run("srand(9)\na = rand()\nsrand(9)\nb = rand()\nin_range = a >= 0 and a <= RAND_MAX");
    assert_eq!(int(&session, "a"), int(&session, "b"));
    assert!(session.get("in_range").unwrap().extract::<bool>().unwrap());
}

#[test]
fn blob_helpers() {
    let session = run("
swapped2 = swap2(258)
swapped4 = swap4(1)
bits = castf2i(1.0)
back = casti2f(1065353216)
buffer = blob(16)
size = len(buffer)
");
    assert_eq!(int(&session, "swapped2"), 513);
    assert_eq!(int(&session, "swapped4"), 16_777_216);
    assert_eq!(int(&session, "bits"), 1_065_353_216);
    assert_eq!(session.get("back").unwrap().extract::<f64>().unwrap(), 1.0);
    assert_eq!(int(&session, "size"), 16);
}

#[test]
fn file_io() {
    let dir = tempfile::tempdir().unwrap();
    let data = dir.path().join("data.txt");
    let script = dir.path().join("child.py");
    fs::write(&script, "loaded = 'from child'\n").unwrap();

    let mut session = Session::new();
    session.open(1024);
    let source = format!(
        "writefile({data:?}, 'hello file')\ncontent = readfile({data:?})\ndofile({script:?})\nloader = loadfile({script:?})\n",
        data = data.display().to_string(),
        script = script.display().to_string(),
    );
    session.run_source("io.py", &source).unwrap();

    assert_eq!(fs::read_to_string(&data).unwrap(), "hello file");
    assert_eq!(string(&session, "content"), "hello file");
    assert_eq!(string(&session, "loaded"), "from child");
    assert_eq!(
        session.get("loader").unwrap().object_type(),
        burrow::ObjectType::Closure
    );

    let err = session
        .run_source("io.py", "x = readfile('/definitely/not/here.txt')")
        .unwrap_err();
    assert!(err.to_string().contains("cannot open the file"), "{err}");
}

#[test]
fn system_functions() {
    let session = run("
unset = getenv('BURROW_TEST_SURELY_UNSET_VARIABLE')
epoch = date(0, 'u')
now = time()
elapsed = clock()
");
    assert!(session.get("unset").unwrap().is_null());
    let epoch = session.get("epoch").unwrap();
    let field = |name: &str| -> i64 { epoch.get(name).unwrap().extract().unwrap() };
    assert_eq!(field("year"), 1970);
    assert_eq!(field("month"), 0);
    assert_eq!(field("day"), 1);
    assert_eq!(field("wday"), 4);
    assert_eq!(field("yday"), 0);
    assert_eq!(field("hour"), 0);
    assert!(int(&session, "now") > 0);
    assert!(session.get("elapsed").unwrap().extract::<f64>().unwrap() >= 0.0);
}

#[test]
fn base_conversions() {
    let session = run("
kind = type([])
text = tostring(1.5)
whole = tointeger('42')
truncated = tointeger(3.9)
real = tofloat('2.5')
names = keys({'b': 1, 'a': 2})
count = 0
for i in range(2, 10, 3):
    count += i
filled = array(3, 'x')
append(filled, 'y')
");
    assert_eq!(string(&session, "kind"), "array");
    assert_eq!(string(&session, "text"), "1.5");
    assert_eq!(int(&session, "whole"), 42);
    assert_eq!(int(&session, "truncated"), 3);
    assert_eq!(session.get("real").unwrap().extract::<f64>().unwrap(), 2.5);
    let names = session.get("names").unwrap();
    assert_eq!(names.get(0).unwrap().extract::<String>().unwrap(), "b");
    assert_eq!(names.get(1).unwrap().extract::<String>().unwrap(), "a");
    assert_eq!(int(&session, "count"), 2 + 5 + 8);

    let filled = session.get("filled").unwrap();
    assert_eq!(filled.len().unwrap(), 4);
    assert_eq!(filled.get(Key::Index(3)).unwrap().extract::<String>().unwrap(), "y");
}
