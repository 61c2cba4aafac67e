use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use std::hint::black_box;
use syncpad_runner::{Artifact, CompileRunPipeline, Execute, ExecutionLimits, JavaScriptBackend, Language, Transform};

fn program(functions: usize) -> String {
    let mut source = String::new();
    for i in 0..functions {
        source.push_str(&format!(
            "const f{i} = (a, b) => {{\n  let total = a;\n  {{\n    let total = b * {i};\n    a += total;\n  }}\n  return a + total;\n}};\n"
        ));
    }
    source.push_str("f0(1, 2);\n");
    source
}

fn bench_transform(c: &mut Criterion) {
    let mut group = c.benchmark_group("JavaScript transform");

    for functions in [1usize, 10, 100] {
        let source = program(functions);
        group.bench_with_input(BenchmarkId::from_parameter(functions), &source, |b, source| {
            b.iter(|| black_box(JavaScriptBackend.transform(black_box(source))))
        });
    }

    group.finish();
}

fn bench_execute(c: &mut Criterion) {
    let artifact: Artifact = JavaScriptBackend
        .transform("function fib(n) { return n < 2 ? n : fib(n - 1) + fib(n - 2); }\nfib(16);")
        .expect("benchmark program transforms");
    let limits = ExecutionLimits::default();

    c.bench_function("execute_fib_16", |b| {
        b.iter(|| black_box(JavaScriptBackend.execute(black_box(&artifact), &limits)))
    });
}

fn bench_compile_and_run(c: &mut Criterion) {
    let pipeline = CompileRunPipeline::default();
    let source = program(10);

    c.bench_function("compile_and_run_10_functions", |b| {
        b.iter(|| black_box(pipeline.compile_and_run(black_box(&source), Language::JavaScript)))
    });
    c.bench_function("compile_and_run_placeholder", |b| {
        b.iter(|| black_box(pipeline.compile_and_run(black_box("print(1)"), Language::Python)))
    });
}

criterion_group!(benches, bench_transform, bench_execute, bench_compile_and_run);
criterion_main!(benches);
