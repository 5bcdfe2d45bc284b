use embed_host::{execute, Config, OutputMode, Report, ScriptError};

fn capture() -> Config {
    Config {
        output: OutputMode::Capture,
        ..Config::default()
    }
}

fn run(source: &str) -> Report {
    execute(&capture(), source.as_bytes())
}

fn assert_released(report: &Report) {
    assert!(report.memory.allocations > 0, "interpreter never allocated");
    assert_eq!(report.memory.live_blocks, 0, "{:?}", report.memory);
    assert_eq!(report.memory.live_bytes, 0, "{:?}", report.memory);
}

#[test]
fn prints_division_result() {
    let report = run("print(1/978)");
    assert!(report.is_success(), "{:?}", report.outcome);
    assert_eq!(report.output, "0.0010224948875256\n");
    assert_released(&report);
}

#[test]
fn print_formats_like_lua() {
    let report = run("print('a', 1, 2.5, true, nil) print()");
    assert!(report.is_success(), "{:?}", report.outcome);
    assert_eq!(report.output, "a\t1\t2.5\ttrue\tnil\n\n");
}

#[test]
fn syntax_error_is_a_compile_error_and_releases_state() {
    let report = run("1 +");
    match &report.outcome {
        Err(ScriptError::Compile(msg)) => assert!(!msg.is_empty()),
        other => panic!("expected compile error, got {other:?}"),
    }
    assert_eq!(report.error().unwrap().tag(), "parser error");
    assert!(report.output.is_empty());
    assert_released(&report);
}

#[test]
fn unbalanced_block_is_a_compile_error() {
    let report = run("if true then print('never')");
    assert!(matches!(report.outcome, Err(ScriptError::Compile(_))));
    assert!(report.output.is_empty());
    assert_released(&report);
}

#[test]
fn calling_missing_global_is_a_runtime_error() {
    let report = run("nosuchfn()");
    match &report.outcome {
        Err(ScriptError::Runtime(msg)) => assert!(msg.contains("nosuchfn"), "{msg}"),
        other => panic!("expected runtime error, got {other:?}"),
    }
    assert_eq!(report.error().unwrap().tag(), "runtime error");
    assert_released(&report);
}

#[test]
fn output_before_a_runtime_error_is_kept() {
    let report = run("print('before') error('stop')");
    assert!(matches!(report.outcome, Err(ScriptError::Runtime(_))));
    assert_eq!(report.output, "before\n");
}

#[test]
fn non_string_error_objects_are_described() {
    let report = run("error({})");
    assert_eq!(
        report.outcome,
        Err(ScriptError::Runtime("(error object is a table value)".into()))
    );

    let report = run("error(42)");
    assert_eq!(report.outcome, Err(ScriptError::Runtime("42".into())));
}

#[test]
fn chunk_name_shows_up_in_diagnostics() {
    let cfg = Config {
        chunk_name: Some("=demo".into()),
        ..capture()
    };
    let report = execute(&cfg, b"error('boom')");
    assert_eq!(
        report.outcome,
        Err(ScriptError::Runtime("demo:1: boom".into()))
    );
}

#[test]
fn failing_first_allocation_prevents_creation() {
    let cfg = Config {
        alloc_fail_after: Some(0),
        ..capture()
    };
    let report = execute(&cfg, b"print('unreachable')");
    assert_eq!(report.outcome, Err(ScriptError::StateCreation));
    assert!(report.output.is_empty());
    assert_eq!(report.memory.allocations, 0);
    assert_eq!(report.memory.refused, 1);
}

#[test]
fn allocation_faults_are_fatal_and_never_leak() {
    let mut succeeded = false;
    for n in 0..5000 {
        let cfg = Config {
            alloc_fail_after: Some(n),
            ..capture()
        };
        let report = execute(&cfg, b"print(1/978)");
        assert_eq!(report.memory.live_blocks, 0, "fault after {n}: {:?}", report.memory);
        match report.outcome {
            Ok(()) => {
                assert_eq!(report.output, "0.0010224948875256\n");
                succeeded = true;
                break;
            }
            Err(ScriptError::StateCreation) | Err(ScriptError::Panic(_)) => {}
            Err(other) => panic!("fault after {n} classified as {other:?}"),
        }
    }
    assert!(succeeded, "script never ran to completion");
}

#[test]
fn returned_values_are_forwarded_to_print() {
    let report = run("return 1, 'two', nil");
    assert!(report.is_success(), "{:?}", report.outcome);
    assert_eq!(report.output, "1\ttwo\tnil\n");
}

#[test]
fn hundreds_of_returned_values_are_printed() {
    let report = run(
        "local t = {} for i = 1, 250 do t[i] = i end return table.unpack(t)",
    );
    assert!(report.is_success(), "{:?}", report.outcome);
    let expected: Vec<String> = (1..=250).map(|i| i.to_string()).collect();
    assert_eq!(report.output, format!("{}\n", expected.join("\t")));
    assert_released(&report);
}

#[test]
fn returned_values_go_through_native_print_in_stdout_mode() {
    let report = execute(&Config::default(), b"return 1");
    assert!(report.is_success(), "{:?}", report.outcome);
    assert!(report.output.is_empty());
    assert_released(&report);
}

#[test]
fn captured_output_replaces_invalid_utf8() {
    let report = run(r"print('\255')");
    assert!(report.is_success(), "{:?}", report.outcome);
    assert_eq!(report.output, "\u{FFFD}\n");
}

#[test]
fn script_without_results_prints_nothing() {
    let report = run("local x = 1 + 1");
    assert!(report.is_success());
    assert!(report.output.is_empty());
}

#[test]
fn forwarding_to_a_removed_print_is_a_runtime_error() {
    let report = run("print = nil return 1");
    assert!(matches!(report.outcome, Err(ScriptError::Runtime(_))));
}

#[test]
fn allowed_libraries_are_loaded() {
    let report = run(
        "print(type(coroutine.wrap), type(table.concat), string.upper('ok'), math.max(1, 3))",
    );
    assert!(report.is_success(), "{:?}", report.outcome);
    assert_eq!(report.output, "function\tfunction\tOK\t3\n");
}

#[test]
fn host_libraries_are_unreachable() {
    let report = run("print(io, os, require, package, debug, utf8)");
    assert!(report.is_success(), "{:?}", report.outcome);
    assert_eq!(report.output, "nil\tnil\tnil\tnil\tnil\tnil\n");
}

#[test]
fn coroutines_work() {
    let report = run(
        r#"
        local co = coroutine.wrap(function(a)
            local b = coroutine.yield(a + 1)
            return b * 2
        end)
        print(co(1), co(10))
        "#,
    );
    assert!(report.is_success(), "{:?}", report.outcome);
    assert_eq!(report.output, "2\t20\n");
}

#[test]
fn binary_chunks_are_rejected() {
    let report = execute(&capture(), b"\x1bLua\x54\x00");
    match &report.outcome {
        Err(ScriptError::Compile(msg)) => assert!(msg.contains("binary"), "{msg}"),
        other => panic!("expected compile error, got {other:?}"),
    }
    assert_released(&report);
}

#[test]
fn stdout_mode_captures_nothing() {
    let report = execute(&Config::default(), b"local s = 'quiet'");
    assert!(report.is_success());
    assert!(report.output.is_empty());
}

#[test]
fn executions_on_separate_threads_do_not_interfere() {
    let handles: Vec<_> = (0..4)
        .map(|i| {
            std::thread::spawn(move || {
                let src = if i % 2 == 0 {
                    format!("print({i})")
                } else {
                    "nosuchfn()".to_string()
                };
                (i, run(&src))
            })
        })
        .collect();

    for handle in handles {
        let (i, report) = handle.join().unwrap();
        if i % 2 == 0 {
            assert_eq!(report.output, format!("{i}\n"));
        } else {
            assert!(matches!(report.outcome, Err(ScriptError::Runtime(_))));
        }
        assert_eq!(report.memory.live_blocks, 0);
    }
}
