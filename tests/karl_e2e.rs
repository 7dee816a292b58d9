use std::sync::Arc;

use madara::{EvalSettings, ExternalFunction, KnowledgeBase, KnowledgeRecord, Logger, MemorySink, PrintVisitor, RecordType};

fn run(kb: &KnowledgeBase, source: &str) -> KnowledgeRecord {
    kb.evaluate_str(source, &EvalSettings::default()).unwrap()
}

#[test]
fn arithmetic_and_precedence() {
    let kb = KnowledgeBase::new();
    assert_eq!(run(&kb, "1 + 2 * 3 - 4 / 2").to_integer(), 5);
    assert_eq!(run(&kb, "(1 + 2) * 3 % 4").to_integer(), 1);
    assert_eq!(run(&kb, "-3 + !0").to_integer(), -2);
    assert!(run(&kb, "1 / 0").to_double().is_infinite());
    assert!((run(&kb, "7 / 2.0").to_double() - 3.5).abs() < f64::EPSILON);
}

#[test]
fn strings_concatenate_and_compare() {
    let kb = KnowledgeBase::new();
    run(&kb, "greeting = 'hello' + ' ' + \"world\"");
    assert_eq!(kb.get("greeting").unwrap().to_string(), "hello world");
    assert!(run(&kb, "greeting == 'hello world'").is_true());
    assert!(run(&kb, "'abc' < 'abd'").is_true());
    assert_eq!(run(&kb, "'count: ' + 3").to_string(), "count: 3");
}

#[test]
fn statement_operators_pick_their_results() {
    let kb = KnowledgeBase::new();
    assert_eq!(run(&kb, "a = 3; b = 9; c = 1").to_integer(), 9);
    assert_eq!(run(&kb, "a = 3 ;> c = 1").to_integer(), 1);
    assert_eq!(run(&kb, "a = 4, b = 2").to_integer(), 2);
    assert_eq!(run(&kb, "a > 2 => b = 10").to_integer(), 10);
    assert_eq!(run(&kb, "a > 20 => (b = 11)").to_integer(), 0);
    assert_eq!(kb.get("b").unwrap().to_integer(), 10);
}

#[test]
fn logical_operators_short_circuit() {
    let kb = KnowledgeBase::new();
    run(&kb, "0 && (hit = 1); 1 || (hit = 2)");
    assert!(!kb.exists("hit").unwrap());
    run(&kb, "1 && (hit = 3)");
    assert_eq!(kb.get("hit").unwrap().to_integer(), 3);
}

#[test]
fn compound_assignment_and_steps() {
    let kb = KnowledgeBase::new();
    run(&kb, "x = 10; x += 5; x -= 3; x *= 2; x /= 4");
    assert_eq!(kb.get("x").unwrap().to_integer(), 6);
    assert_eq!(run(&kb, "x++").to_integer(), 6);
    assert_eq!(run(&kb, "++x").to_integer(), 8);
    assert_eq!(run(&kb, "--x").to_integer(), 7);
}

#[test]
fn arrays_index_and_grow() {
    let kb = KnowledgeBase::new();
    run(&kb, "v = [1, 2, 3]; v[5] = 9; v[0] += 10");
    assert_eq!(kb.get("v").unwrap().to_integers(), vec![11, 2, 3, 0, 0, 9]);
    assert_eq!(run(&kb, "v[1] + v[2]").to_integer(), 5);
    assert_eq!(run(&kb, "#size(v)").to_integer(), 6);

    let err = kb.evaluate_str("v[-1]", &EvalSettings::default()).unwrap_err();
    assert!(err.is_runtime_error());
}

#[test]
fn interpolated_names_follow_their_index_variables() {
    let kb = KnowledgeBase::new();
    let mut expression = kb.compile("agent.{.i}.moves += 1").unwrap();
    for i in 0..3 {
        kb.set(".i", i).unwrap();
        kb.evaluate(&mut expression, &EvalSettings::default()).unwrap();
        kb.evaluate(&mut expression, &EvalSettings::default()).unwrap();
    }
    for i in 0..3 {
        assert_eq!(kb.get(&format!("agent.{i}.moves")).unwrap().to_integer(), 2);
    }
}

#[test]
fn compile_errors_are_reported() {
    let kb = KnowledgeBase::new();
    for source in ["1 +", "(1", "3 = x", "#no_such_call()", "#sqrt()", "x[nan]", "a ] b"] {
        let err = kb.compile(source).unwrap_err();
        assert!(err.is_compile_error(), "{source} gave {err}");
    }
}

#[test]
fn compilation_folds_constants_but_not_system_calls() {
    let kb = KnowledgeBase::new();
    let expression = kb.compile("y = 2 * 3 + z; w = #rand_int(1, 1)").unwrap();
    let mut printer = PrintVisitor::default();
    expression.accept(&mut printer);
    assert_eq!(printer.as_str(), "((y = (6 + z)) ; (w = #rand_int(1, 1)))");
}

#[test]
fn math_and_conversion_calls() {
    let kb = KnowledgeBase::new();
    assert!((run(&kb, "#sqrt(16)").to_double() - 4.0).abs() < f64::EPSILON);
    assert!((run(&kb, "#pow(2, 10)").to_double() - 1024.0).abs() < f64::EPSILON);
    assert!(run(&kb, "#isinf(1 / 0.0)").is_true());
    assert_eq!(run(&kb, "#to_integer('42')").to_integer(), 42);
    assert_eq!(run(&kb, "#to_string([1, 2], '|')").to_string(), "1|2");
    assert_eq!(run(&kb, "#type('abc')").to_integer(), i64::from(RecordType::String.code()));
    assert_eq!(run(&kb, "#fragment('knowledge', 0, 3)").to_string(), "know");
    assert_eq!(run(&kb, "#rand_int(5, 5)").to_integer(), 5);
}

#[test]
fn eval_and_expand_run_nested_programs() {
    let kb = KnowledgeBase::new();
    kb.set("target", "score").unwrap();
    run(&kb, "#eval('{target} = 12')");
    assert_eq!(kb.get("score").unwrap().to_integer(), 12);
    assert_eq!(run(&kb, "#expand_statement('{target}={score}')").to_string(), "score=12");
}

#[test]
fn clear_and_delete_calls() {
    let kb = KnowledgeBase::new();
    run(&kb, "a = 1; b = 2");
    assert!(run(&kb, "#clear_var('a')").is_true());
    assert!(!kb.exists("a").unwrap());
    assert!(run(&kb, "#delete_variable('b')").is_true());
    assert!(!run(&kb, "#delete_variable('b')").is_true());
}

#[test]
fn clock_calls_read_and_write_lamport_clocks() {
    let kb = KnowledgeBase::new();
    run(&kb, "x = 1; x = 2");
    assert_eq!(run(&kb, "#get_clock(x)").to_integer(), 2);
    run(&kb, "#set_clock(100)");
    assert!(run(&kb, "#get_clock()").to_integer() >= 100);
}

#[test]
fn print_goes_through_the_logger() {
    let sink = Arc::new(MemorySink::new());
    let logger = Arc::new(Logger::with_sink(madara::LogLevel::ALWAYS, sink.clone()));
    let kb = KnowledgeBase::with_logger(logger);
    kb.set("x", 5).unwrap();
    run(&kb, "#print('x is {x}')");
    assert_eq!(sink.contents(), "x is 5");
}

#[test]
fn file_calls_write_and_read_back() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    let kb = KnowledgeBase::new();
    kb.set(".path", path.to_string_lossy().as_ref()).unwrap();

    assert_eq!(run(&kb, "#write_file(.path, 'hello karl')").to_integer(), 10);
    let read = run(&kb, "contents = #read_file(.path)");
    assert_eq!(read.record_type(), RecordType::TextFile);
    assert_eq!(kb.get("contents").unwrap().to_string(), "hello karl");

    let missing = dir.path().join("missing.bin");
    kb.set(".path", missing.to_string_lossy().as_ref()).unwrap();
    assert!(run(&kb, "#read_file(.path)").is_uncreated());
}

#[test]
fn external_functions_receive_arguments_and_variables() {
    let kb = KnowledgeBase::new();
    let distance: ExternalFunction = Arc::new(|args, vars| {
        let dx = args[0].to_double() - args[2].to_double();
        let dy = args[1].to_double() - args[3].to_double();
        vars.inc("distance.calls");
        KnowledgeRecord::from((dx * dx + dy * dy).sqrt())
    });
    kb.define_function("distance", distance).unwrap();

    let result = run(&kb, "d = distance(0, 0, 3, 4)");
    assert!((result.to_double() - 5.0).abs() < f64::EPSILON);
    assert_eq!(kb.get("distance.calls").unwrap().to_integer(), 1);

    let err = kb.evaluate_str("unknown(1)", &EvalSettings::default()).unwrap_err();
    assert!(err.is_runtime_error());
}

#[test]
fn interpolated_name_reads_the_expanded_variable() {
    let kb = KnowledgeBase::new();
    kb.set(".id", 7).unwrap();
    let mut expression = kb.compile("y{.id}").unwrap();
    kb.set("y7", 42).unwrap();
    assert_eq!(kb.evaluate(&mut expression, &EvalSettings::default()).unwrap().to_integer(), 42);
}

#[test]
fn arity_errors_name_the_call() {
    let kb = KnowledgeBase::new();
    let err = kb.compile("#delete_variable()").unwrap_err();
    assert!(err.is_compile_error());
    let message = err.to_string();
    assert!(message.contains("KARL COMPILE ERROR"), "{message}");
    assert!(message.contains("requires 1 argument"), "{message}");

    for source in ["bad{name", "bad}name{", "a{b{c}"] {
        assert!(kb.compile(source).unwrap_err().is_compile_error(), "{source}");
    }
}

#[test]
fn unbounded_random_ranges_are_runtime_errors() {
    let kb = KnowledgeBase::new();
    for source in ["#rand_double(0, inf)", "#rand_double(-1e308, 1e308)", "#rand_double(nan, 1)"] {
        let err = kb.evaluate_str(source, &EvalSettings::default()).unwrap_err();
        assert!(err.is_runtime_error(), "{source} gave {err}");
        assert!(err.to_string().contains("#rand_double"), "{err}");
    }

    let value = run(&kb, "#rand_double(-1e300, 1e300)").to_double();
    assert!(value.is_finite());
    assert!((run(&kb, "#rand_double(3, 3)").to_double() - 3.0).abs() < f64::EPSILON);
    kb.set("after", 1).unwrap();
    assert_eq!(kb.get("after").unwrap().to_integer(), 1);
}

#[test]
fn unpruned_calls_check_arity_at_runtime() {
    let kb = KnowledgeBase::new();
    let context = kb.context();
    let settings = EvalSettings::default();

    let mut expression = context.parse("#delete_variable()").unwrap();
    let err = context.evaluate(&mut expression, &settings.update).unwrap_err();
    assert!(err.is_runtime_error(), "{err}");
    let message = err.to_string();
    assert!(message.contains("KARL RUNTIME ERROR"), "{message}");
    assert!(message.contains("requires 1 argument"), "{message}");

    let mut expression = context.parse("#to_string(a, b, c)").unwrap();
    let err = context.evaluate(&mut expression, &settings.update).unwrap_err();
    assert!(err.is_runtime_error(), "{err}");
    assert!(err.to_string().contains("requires 1 to 2 arguments"), "{err}");
}
