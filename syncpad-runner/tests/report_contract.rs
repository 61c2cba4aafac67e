use std::time::Duration;

use syncpad_runner::{CompileRunPipeline, ExecutionLimits, Language};

fn js(source: &str) -> String {
    CompileRunPipeline::default().compile_and_run(source, Language::JavaScript)
}

#[test]
fn test_expression_reports_artifact_and_output() {
    assert_eq!(js("1 + 1"), "\"use strict\";\n\n1 + 1;\nOutput: 2");
}

#[test]
fn test_syntax_error_reports_only_the_message() {
    let report = js("1 +");
    assert_eq!(report, "Compilation error: Unexpected token (1:3)");
    assert!(!report.contains("Output:"));
    assert!(!report.contains("Error: "));
}

#[test]
fn test_exponent_of_unary_operand_is_rejected() {
    assert_eq!(
        js("-2 ** 2"),
        "Compilation error: Illegal expression. Wrap left hand side or entire exponentiation in parentheses. (1:0)"
    );
    assert_eq!(js("(-2) ** 2"), "\"use strict\";\n\n(-2) ** 2;\nOutput: 4");
    assert!(js("-(2 ** 2)").ends_with("\nOutput: -4"));
}

#[test]
fn test_placeholder_language_is_deterministic() {
    let pipeline = CompileRunPipeline::default();
    let first = pipeline.compile_and_run("anything", Language::Python);
    let second = pipeline.compile_and_run("anything", Language::Python);
    assert_eq!(first, second);
    assert_eq!(first, "No compiler registered for python");
}

#[test]
fn test_every_language_produces_a_report() {
    let pipeline = CompileRunPipeline::default();
    let sources = ["", "1 +", "1 + 1", "throw 'x'", "}{", "\u{0}", "let a = 1; let a = 2;"];
    for language in Language::ALL {
        for source in sources {
            let report = pipeline.compile_and_run(source, language);
            assert!(!report.is_empty(), "{language} {source:?}");
            assert!(!report.contains("panicked"), "{report}");
        }
    }
}

#[test]
fn test_empty_source_runs_to_undefined() {
    assert_eq!(js(""), "\"use strict\";\nOutput: undefined");
}

#[test]
fn test_runtime_error_keeps_artifact() {
    assert_eq!(
        js("missing + 1"),
        "\"use strict\";\n\nmissing + 1;\nError: missing is not defined"
    );
    assert_eq!(
        js("throw { message: 'bad input' };"),
        "\"use strict\";\n\nthrow {\n  message: \"bad input\"\n};\nError: bad input"
    );
}

#[test]
fn test_const_reassignment_is_a_compilation_error() {
    assert_eq!(
        js("const limit = 3;\nlimit = 4;"),
        "Compilation error: \"limit\" is read-only"
    );
}

#[test]
fn test_block_scoped_bindings_are_renamed() {
    assert_eq!(
        js("let x = 1; { let x = 2; x; } x;"),
        "\"use strict\";\n\nvar x = 1;\n{\n  var _x = 2;\n  _x;\n}\nx;\nOutput: 1"
    );
}

#[test]
fn test_runaway_programs_are_stopped() {
    let limits = ExecutionLimits::default()
        .with_max_steps(10_000)
        .with_timeout(Duration::from_secs(5));
    let pipeline = CompileRunPipeline::default().with_limits(limits);

    let report = pipeline.compile_and_run("while (true) {}", Language::JavaScript);
    assert!(
        report.ends_with("\nError: Execution step limit of 10000 exceeded"),
        "{report}"
    );

    let report = pipeline.compile_and_run(
        "function down(n) { return down(n + 1); }\ndown(0);",
        Language::JavaScript,
    );
    assert!(
        report.ends_with("\nError: Maximum call stack size exceeded"),
        "{report}"
    );
}

#[test]
fn test_timeout_is_reported() {
    let limits = ExecutionLimits::default()
        .with_max_steps(u64::MAX)
        .with_timeout(Duration::from_millis(30));
    let report = CompileRunPipeline::default()
        .with_limits(limits)
        .compile_and_run("for (;;) {}", Language::JavaScript);
    assert!(report.ends_with("\nError: Execution timed out after 30ms"), "{report}");
}

#[test]
fn test_deeply_nested_array_is_reported() {
    let nest = "var a = []; for (var i = 0; i < 20000; i++) a = [[[[[[[[[[a]]]]]]]]]];";

    let report = js(&format!("{nest}\na"));
    assert!(
        report.ends_with("\nError: Maximum call stack size exceeded"),
        "{report}"
    );

    let report = js(&format!("{nest}\n'' + a"));
    assert!(
        report.ends_with("\nError: Maximum call stack size exceeded"),
        "{report}"
    );

    assert!(js("var a = [1]; for (var i = 0; i < 50; i++) a = [a]; a").ends_with("\nOutput: 1"));
}

#[test]
fn test_allocation_budget_is_reported() {
    let report = js("for (;;) { var a = []; a.length = 4194304; }");
    assert!(
        report.ends_with("\nError: Out of memory: heap limit of 2097152 slots exceeded"),
        "{report}"
    );

    let limits = ExecutionLimits::default().with_max_heap_slots(10_000);
    let report = CompileRunPipeline::default()
        .with_limits(limits)
        .compile_and_run("var keep = [];\nfor (;;) keep.push([1, 2, 3, 4]);", Language::JavaScript);
    assert!(
        report.ends_with("\nError: Out of memory: heap limit of 10000 slots exceeded"),
        "{report}"
    );

    let report = js("var a = []; a.length = 4194305;");
    assert!(report.ends_with("\nError: Invalid array length"), "{report}");
}

#[test]
fn test_program_with_closures() {
    let source = "\
const makeCounter = () => {
  let count = 0;
  return () => ++count;
};
const next = makeCounter();
next();
next();
`${0}`";
    // template literals are not part of the accepted language
    assert!(js(source).starts_with("Compilation error: "));

    let source = "\
const makeCounter = () => {
  let count = 0;
  return () => ++count;
};
const next = makeCounter();
next();
next();";
    assert!(js(source).ends_with("\nOutput: 2"));
}
