use burrow::{RecordingTracer, Session, SessionConfig, TraceEvent};
use pretty_assertions::assert_eq;

fn traced(tracer: &RecordingTracer) -> Session {
    let mut session = Session::new();
    session.open_with(
        SessionConfig::new()
            .error_handlers(false)
            .tracer(Box::new(tracer.clone())),
    );
    session
}

#[test]
fn calls_and_returns_nest() {
    let tracer = RecordingTracer::new();
    let session = traced(&tracer);
    session.run_source("t.py", "len('abc')").unwrap();

    assert_eq!(
        tracer.events(),
        vec![
            TraceEvent::Call {
                func_name: "main".to_owned(),
                depth: 1,
            },
            TraceEvent::Call {
                func_name: "len".to_owned(),
                depth: 2,
            },
            TraceEvent::Return { depth: 1 },
            TraceEvent::Return { depth: 0 },
        ]
    );
}

#[test]
fn handles_report_acquire_and_release() {
    let tracer = RecordingTracer::new();
    let session = traced(&tracer);
    session.run_source("t.py", "items = [1, 2]").unwrap();
    tracer.clear();

    let items = session.get("items").unwrap();
    let copy = items.clone();
    drop(copy);
    drop(items);

    let events = tracer.events();
    let object = match events.first() {
        Some(TraceEvent::AddRef { object, .. }) => *object,
        other => panic!("expected an AddRef first, got {other:?}"),
    };
    // the first acquire happens while the resolved value is still on the stack
    assert_eq!(
        events[1..].to_vec(),
        vec![
            TraceEvent::AddRef { object, ref_count: 3 },
            TraceEvent::Release { object, ref_count: 2 },
            TraceEvent::Release { object, ref_count: 1 },
        ]
    );
}

#[test]
fn errors_are_traced_once() {
    let tracer = RecordingTracer::new();
    let session = traced(&tracer);
    assert!(session.run_source("t.py", "def f():\n    return 1 // 0\nf()").is_err());

    let errors: Vec<_> = tracer
        .events()
        .into_iter()
        .filter(|event| matches!(event, TraceEvent::Error { .. }))
        .collect();
    assert_eq!(
        errors,
        vec![TraceEvent::Error {
            message: "division by zero".to_owned(),
        }]
    );
    assert_eq!(tracer.events().last(), errors.last());
}

#[test]
fn instructions_are_opt_in() {
    let quiet = RecordingTracer::new();
    traced(&quiet).run_source("t.py", "x = 1").unwrap();
    assert!(
        !quiet
            .events()
            .iter()
            .any(|event| matches!(event, TraceEvent::Instruction { .. }))
    );

    let verbose = RecordingTracer::with_instructions();
    traced(&verbose).run_source("t.py", "x = 1").unwrap();
    let first = verbose
        .events()
        .into_iter()
        .find(|event| matches!(event, TraceEvent::Instruction { .. }));
    assert_eq!(
        first,
        Some(TraceEvent::Instruction {
            ip: 0,
            instr: "LoadInt",
            stack_depth: 0,
        })
    );
}

#[test]
fn events_serialize_with_a_tag() {
    let event = TraceEvent::Call {
        func_name: "main".to_owned(),
        depth: 1,
    };
    assert_eq!(
        serde_json::to_value(&event).unwrap(),
        serde_json::json!({"event": "call", "func_name": "main", "depth": 1})
    );
    let event = TraceEvent::AddRef { object: 3, ref_count: 2 };
    assert_eq!(
        serde_json::to_value(&event).unwrap(),
        serde_json::json!({"event": "add_ref", "object": 3, "ref_count": 2})
    );
}
