use criterion::{Criterion, black_box, criterion_group, criterion_main};

use toy::Script;

fn bench_loop_sum(c: &mut Criterion) {
    let compiled = Script::new("out = 0; for i := 0; i < 10000; i++ { out += i }")
        .compile()
        .expect("compiles");
    c.bench_function("vm_loop_sum_10k", |b| {
        b.iter(|| {
            let mut instance = compiled.clone();
            instance.run().expect("runs");
            black_box(instance.get("out"))
        });
    });
}

fn bench_fib(c: &mut Criterion) {
    let compiled = Script::new(
        "fib := fn(n) { if n < 2 { return n }; return fib(n - 1) + fib(n - 2) }\nout = fib(18)",
    )
    .compile()
    .expect("compiles");
    c.bench_function("vm_fib_18", |b| {
        b.iter(|| {
            let mut instance = compiled.clone();
            instance.run().expect("runs");
            black_box(instance.get("out"))
        });
    });
}

fn bench_tail_call(c: &mut Criterion) {
    let compiled = Script::new(
        "iter := fn(n, m) { if n == m { return n }; return iter(n + 1, m) }\nout = iter(0, 50000)",
    )
    .compile()
    .expect("compiles");
    c.bench_function("vm_tail_call_50k", |b| {
        b.iter(|| {
            let mut instance = compiled.clone();
            instance.run().expect("runs");
            black_box(instance.get("out"))
        });
    });
}

fn bench_closure_counter(c: &mut Criterion) {
    let compiled = Script::new(
        "make := fn() { x := 0; return fn() { x++; return x } }\n\
         counter := make()\n\
         out = 0\n\
         for i := 0; i < 10000; i++ { out = counter() }",
    )
    .compile()
    .expect("compiles");
    c.bench_function("vm_closure_counter_10k", |b| {
        b.iter(|| {
            let mut instance = compiled.clone();
            instance.run().expect("runs");
            black_box(instance.get("out"))
        });
    });
}

criterion_group!(
    benches,
    bench_loop_sum,
    bench_fib,
    bench_tail_call,
    bench_closure_counter
);
criterion_main!(benches);
