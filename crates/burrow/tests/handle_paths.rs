//! Path resolution, typed extraction and field writes through `Handle`.

use burrow::{Error, Key, ObjectType, Origin, Session};
use pretty_assertions::assert_eq;

const CONFIG: &str = "
config = {
    'window': {'title': 'demo', 'size': [640, 480], 'scale': 1.5, 'visible': True},
    'name': 'app',
}
def area(w, h):
    return w * h
shapes = {'area': area}
def first(items):
    return items[0]
def boom():
    return 1 // 0
nothing = None
";

fn open_session() -> Session {
    let mut session = Session::new();
    session.open(1024);
    session.run_source("config.py", CONFIG).unwrap();
    session
}

// =============================================================================
// 1. Resolution
// =============================================================================

/// Each step of a valid path resolves to the right type and leaves the stack as it was.
#[test]
fn valid_path_resolves_with_balanced_stack() {
    let session = open_session();
    let before = session.stack_top();

    let window = session.get("config").unwrap().get("window").unwrap();
    assert_eq!(window.object_type(), ObjectType::Table);
    assert_eq!(window.get("title").unwrap().extract::<String>().unwrap(), "demo");
    assert_eq!(window.get("size").unwrap().get(1).unwrap().extract::<i64>().unwrap(), 480);
    assert_eq!(window.get("scale").unwrap().extract::<f64>().unwrap(), 1.5);
    assert!(window.get("visible").unwrap().extract::<bool>().unwrap());

    assert_eq!(session.stack_top(), before);
}

/// Handles remember their key, their parent's name and the full path.
#[test]
fn handles_record_their_path() {
    let session = open_session();
    let config = session.get("config").unwrap();
    assert_eq!(config.path(), "config");
    assert_eq!(config.parent_name(), "root");
    assert_eq!(config.origin(), Origin::RootTable);

    let width = config.get("window").unwrap().get("size").unwrap().get(0).unwrap();
    assert_eq!(width.path(), "config.window.size[0]");
    assert_eq!(width.key(), &Key::Index(0));
    assert_eq!(width.name(), "0");
    assert_eq!(width.parent_name(), "size");
    assert_eq!(width.origin(), Origin::RootTable);
}

/// A missing step names the key and its immediate parent, not the grandparent.
#[test]
fn missing_key_names_immediate_parent() {
    let session = open_session();
    let window = session.get("config").unwrap().get("window").unwrap();
    let before = session.stack_top();

    let err = window.get("missing").unwrap_err();
    match &err {
        Error::MissingKey { parent, key } => {
            assert_eq!(parent, "window");
            assert_eq!(key, &Key::from("missing"));
        }
        other => panic!("expected MissingKey, got {other:?}"),
    }
    assert_eq!(err.to_string(), "window[missing] does not exist");
    assert_eq!(session.stack_top(), before);
}

/// Unknown globals are reported against the root table.
#[test]
fn missing_global_names_root() {
    let session = open_session();
    let err = session.get("nope").unwrap_err();
    assert_eq!(err.to_string(), "root[nope] does not exist");
}

/// Out-of-range array indices are missing keys of the array.
#[test]
fn out_of_range_index_is_missing() {
    let session = open_session();
    let size = session.get("config").unwrap().get("window").unwrap().get("size").unwrap();
    let err = size.get(5).unwrap_err();
    assert!(
        matches!(&err, Error::MissingKey { parent, key: Key::Index(5) } if parent == "size"),
        "unexpected error: {err:?}"
    );
    assert!(size.get(-1).is_err());
}

/// Indexing into a value that is not a container fails as a missing key.
#[test]
fn indexing_a_scalar_is_missing() {
    let session = open_session();
    let name = session.get("config").unwrap().get("name").unwrap();
    let err = name.get("length").unwrap_err();
    assert_eq!(err.to_string(), "name[length] does not exist");
}

// =============================================================================
// 2. Typed extraction
// =============================================================================

/// Extraction never coerces between type tags, and a failed read changes nothing.
#[test]
fn mismatched_extraction_is_rejected() {
    let session = open_session();
    let width = session.get("config").unwrap().get("window").unwrap().get("size").unwrap().get(0).unwrap();
    let before = session.stack_top();

    let err = width.extract::<String>().unwrap_err();
    match &err {
        Error::TypeMismatch { name, expected, found } => {
            assert_eq!(name, "0");
            assert_eq!(*expected, "string");
            assert_eq!(*found, ObjectType::Integer);
        }
        other => panic!("expected TypeMismatch, got {other:?}"),
    }
    assert_eq!(err.to_string(), "0 is not a string");
    assert!(width.extract::<f64>().is_err(), "integers are not read as floats");

    assert_eq!(session.stack_top(), before);
    assert_eq!(width.extract::<i64>().unwrap(), 640);
}

/// `Option<T>` reads null as `None` and still checks other tags.
#[test]
fn optional_extraction() {
    let session = open_session();
    let nothing = session.get("nothing").unwrap();
    assert!(nothing.is_null());
    assert_eq!(nothing.extract::<Option<i64>>().unwrap(), None);

    let name = session.get("config").unwrap().get("name").unwrap();
    assert_eq!(name.extract::<Option<String>>().unwrap().as_deref(), Some("app"));
    assert!(name.extract::<Option<i64>>().is_err());
}

/// Single-precision reads narrow the stored float.
#[test]
fn f32_extraction() {
    let session = open_session();
    let scale = session.get("config").unwrap().get("window").unwrap().get("scale").unwrap();
    assert_eq!(scale.extract::<f32>().unwrap(), 1.5_f32);
}

// =============================================================================
// 3. Writes
// =============================================================================

/// `set_field` creates missing slots and overwrites existing ones.
#[test]
fn set_field_creates_and_overwrites() {
    let session = open_session();
    let window = session.get("config").unwrap().get("window").unwrap();

    window.set_field("title", "renamed").unwrap();
    window.set_field("depth", 32).unwrap();
    window.set_field("ratio", 0.75).unwrap();

    assert_eq!(window.get("title").unwrap().extract::<String>().unwrap(), "renamed");
    assert_eq!(window.get("depth").unwrap().extract::<i64>().unwrap(), 32);
    assert_eq!(window.get("ratio").unwrap().extract::<f64>().unwrap(), 0.75);

    session
        .run_source("check.py", "depth = config['window']['depth'] * 2")
        .unwrap();
    assert_eq!(session.get("depth").unwrap().extract::<i64>().unwrap(), 64);
    assert_eq!(session.stack_top(), 0);
}

/// Array slots can be overwritten but not created past the end.
#[test]
fn array_slots() {
    let session = open_session();
    let size = session.get("config").unwrap().get("window").unwrap().get("size").unwrap();
    size.set_field(0, 800).unwrap();
    assert_eq!(size.get(0).unwrap().extract::<i64>().unwrap(), 800);

    let err = size.set_field(2, 1).unwrap_err();
    assert!(matches!(err, Error::MissingKey { key: Key::Index(2), .. }), "{err:?}");
}

/// `update_field` only overwrites slots that already exist.
#[test]
fn update_field_requires_existing_slot() {
    let session = open_session();
    let window = session.get("config").unwrap().get("window").unwrap();
    window.update_field("scale", 2.0).unwrap();
    assert_eq!(window.get("scale").unwrap().extract::<f64>().unwrap(), 2.0);

    let err = window.update_field("missing", 1).unwrap_err();
    assert_eq!(err.to_string(), "window[missing] does not exist");
    assert!(window.get("missing").is_err(), "failed update must not create the slot");
}

/// Writing into a scalar is a type mismatch.
#[test]
fn set_field_on_scalar_is_type_mismatch() {
    let session = open_session();
    let name = session.get("config").unwrap().get("name").unwrap();
    let err = name.set_field("x", 1).unwrap_err();
    assert!(
        matches!(err, Error::TypeMismatch { expected: "table", found: ObjectType::String, .. }),
        "{err:?}"
    );
}

/// One handle's value can be stored through another handle.
#[test]
fn handle_as_field_value() {
    let session = open_session();
    let window = session.get("config").unwrap().get("window").unwrap();
    let alias = session.new_table("alias").unwrap();
    alias.set_field("window", &window).unwrap();
    session
        .run_source("check.py", "same = alias['window'] is config['window']")
        .unwrap();
    assert!(session.get("same").unwrap().extract::<bool>().unwrap());
}

// =============================================================================
// 4. Lifetime and inspection
// =============================================================================

/// A handle keeps its value alive after scripts drop every other reference.
#[test]
fn handle_outlives_container() {
    let session = open_session();
    let size = session.get("config").unwrap().get("window").unwrap().get("size").unwrap();
    session.run_source("clear.py", "config = None").unwrap();

    assert_eq!(size.get(1).unwrap().extract::<i64>().unwrap(), 480);
    assert_eq!(size.ref_count(), Some(1));
    assert!(session.get("config").unwrap().is_null());
}

/// `len` and `keys` report container contents in insertion order.
#[test]
fn len_and_keys() {
    let session = open_session();
    let window = session.get("config").unwrap().get("window").unwrap();
    assert_eq!(window.len().unwrap(), 4);
    assert_eq!(
        window.keys().unwrap(),
        vec![
            Key::from("title"),
            Key::from("size"),
            Key::from("scale"),
            Key::from("visible"),
        ]
    );

    let size = window.get("size").unwrap();
    assert_eq!(size.keys().unwrap(), vec![Key::Index(0), Key::Index(1)]);
    assert_eq!(window.get("title").unwrap().len().unwrap(), 4);

    let scale = window.get("scale").unwrap();
    assert!(matches!(scale.len(), Err(Error::TypeMismatch { expected: "container", .. })));
    assert!(scale.keys().is_err());
}

/// Stack-slot handles index from the bottom with positive and from the top with negative indices.
#[test]
fn stack_slot_handles() {
    let session = open_session();
    session.with_vm(|vm| {
        vm.push_integer(7);
        vm.push_string("top");
    });

    let bottom = session.stack_slot(1).unwrap();
    assert_eq!(bottom.extract::<i64>().unwrap(), 7);
    assert_eq!(bottom.origin(), Origin::StackSlot);
    assert_eq!(bottom.parent_name(), "stack");

    let top = session.stack_slot(-1).unwrap();
    assert_eq!(top.extract::<String>().unwrap(), "top");
    assert_eq!(top.path(), "stack[-1]");

    let err = session.stack_slot(3).unwrap_err();
    assert_eq!(err.to_string(), "stack[3] does not exist");
    assert!(session.stack_slot(0).is_err());

    session.with_vm(|vm| vm.pop(2));
    assert_eq!(top.extract::<String>().unwrap(), "top", "handle keeps its own reference");
}

// =============================================================================
// 5. Calls
// =============================================================================

/// Script functions are callable with host arguments.
#[test]
fn call_script_function() {
    let session = open_session();
    let area = session.get("area").unwrap();
    assert_eq!(area.call::<i64>(&[&3, &4]).unwrap(), 12);
    assert_eq!(area.call::<f64>(&[&1.5, &2]).unwrap(), 3.0);

    let size = session.get("config").unwrap().get("window").unwrap().get("size").unwrap();
    let first = session.get("first").unwrap();
    assert_eq!(first.call::<i64>(&[&size]).unwrap(), 640);
    assert_eq!(session.stack_top(), 0);
}

/// Call failures are classified and leave the stack balanced.
#[test]
fn call_failures() {
    let session = open_session();

    let name = session.get("config").unwrap().get("name").unwrap();
    assert!(matches!(
        name.call::<()>(&[]),
        Err(Error::TypeMismatch { expected: "closure", .. })
    ));

    let err = session.get("boom").unwrap().call::<()>(&[]).unwrap_err();
    match &err {
        Error::Runtime { name, source } => {
            assert_eq!(name, "boom");
            assert_eq!(source.message(), "division by zero");
        }
        other => panic!("expected Runtime, got {other:?}"),
    }

    let area = session.get("area").unwrap();
    assert!(area.call::<i64>(&[&1]).is_err(), "wrong parameter count");
    let err = area.call::<String>(&[&2, &2]).unwrap_err();
    assert_eq!(err.to_string(), "area() is not a string");

    let nested = session.get("shapes").unwrap().get("area").unwrap();
    assert_eq!(nested.path(), "shapes.area");
    let err = nested.call::<String>(&[&2, &2]).unwrap_err();
    assert!(
        matches!(&err, Error::TypeMismatch { name, found: ObjectType::Integer, .. } if name == "area()"),
        "{err:?}"
    );

    assert_eq!(session.stack_top(), 0);
}
