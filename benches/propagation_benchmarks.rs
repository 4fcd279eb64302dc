//! Benchmarks for the context binder.
//!
//! Measures a full binder run over synthetic programs:
//! - Call chains: one moved static read at the bottom of a chain of static
//!   calls, forcing one binding transition per batch
//! - Fan-in: many independent callers of one bound helper
//! - Contexts: many holders, each with its own reader
//!
//! ## Profiling with Puffin
//!
//! ```bash
//! cargo bench --features profile-with-puffin -- --profile-time 5
//! ```

use std::hint::black_box;

use contextify::{BinderConfig, ContextBinder, ContextDescriptor, ContextPlan, Program};
use contextify_core::{BodyBuilder, FieldFlags, MethodFlags, MethodId, OpCode, TypeFlags, TypeRef};
use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

#[cfg(feature = "profile-with-puffin")]
fn setup_profiler() {
    puffin::set_scopes_on(true);
}

#[cfg(not(feature = "profile-with-puffin"))]
fn setup_profiler() {}

#[cfg(feature = "profile-with-puffin")]
fn end_profiling_frame() {
    puffin::GlobalProfiler::lock().new_frame();
}

#[cfg(not(feature = "profile-with-puffin"))]
fn end_profiling_frame() {}

// =============================================================================
// Synthetic programs
// =============================================================================

struct Synthetic {
    program: Program,
    plan: ContextPlan,
}

/// Root plus `holders` converted holders, each with one static `int x`.
///
/// Returns the program, the plan and each holder's static field.
fn skeleton(holders: usize) -> (Synthetic, Vec<contextify::FieldId>) {
    let mut p = Program::new();
    let root = p.add_type("Bench", "Root", None, TypeFlags::empty()).unwrap();
    let root_ctor = p
        .add_method(root, ".ctor", vec![], TypeRef::Void, MethodFlags::CONSTRUCTOR)
        .unwrap();
    let mut b = BodyBuilder::new();
    b.emit(OpCode::Ret);
    p.set_body(root_ctor, b.build().unwrap()).unwrap();

    let mut plan = ContextPlan::new(root, root_ctor);
    let mut statics = Vec::with_capacity(holders);
    for i in 0..holders {
        let holder = p.add_type("Bench", &format!("H{i}"), None, TypeFlags::STATIC).unwrap();
        let generated = p
            .add_type("Bench", &format!("H{i}_Context"), None, TypeFlags::empty())
            .unwrap();
        let ctor = p
            .add_method(generated, ".ctor", vec![], TypeRef::Void, MethodFlags::CONSTRUCTOR)
            .unwrap();
        let slot = p
            .add_field(root, &format!("H{i}_field"), TypeRef::Named(generated), FieldFlags::empty())
            .unwrap();
        let x = p.add_field(holder, "x", TypeRef::Int32, FieldFlags::STATIC).unwrap();
        let x_i = p.add_field(generated, "x", TypeRef::Int32, FieldFlags::empty()).unwrap();
        plan.add_context(
            ContextDescriptor::new(format!("H{i}"), holder, generated, ctor)
                .with_chain(vec![slot])
                .move_field(x, x_i),
        );
        statics.push(x);
    }
    (Synthetic { program: p, plan }, statics)
}

fn util_method(p: &mut Program, index: usize, build: impl FnOnce(&mut BodyBuilder)) -> MethodId {
    let util = match p.find_type("Bench.Util") {
        Some(util) => util,
        None => p.add_type("Bench", "Util", None, TypeFlags::STATIC).unwrap(),
    };
    let method = p
        .add_method(util, &format!("M{index}"), vec![], TypeRef::Void, MethodFlags::STATIC)
        .unwrap();
    let mut b = BodyBuilder::new();
    build(&mut b);
    p.set_body(method, b.build().unwrap()).unwrap();
    method
}

fn call_chain(depth: usize) -> Synthetic {
    let (mut s, statics) = skeleton(1);
    let x = statics[0];
    let mut next = util_method(&mut s.program, depth, |b| {
        b.emit_field(OpCode::LdSFld, x);
        b.emit(OpCode::Pop);
        b.emit(OpCode::Ret);
    });
    for i in (0..depth).rev() {
        let callee = next;
        next = util_method(&mut s.program, i, |b| {
            b.emit_method(OpCode::Call, callee);
            b.emit(OpCode::Ret);
        });
    }
    s
}

fn fan_in(callers: usize) -> Synthetic {
    let (mut s, statics) = skeleton(1);
    let x = statics[0];
    let helper = util_method(&mut s.program, callers, |b| {
        b.emit_field(OpCode::LdSFld, x);
        b.emit(OpCode::Pop);
        b.emit(OpCode::Ret);
    });
    for i in 0..callers {
        util_method(&mut s.program, i, |b| {
            b.emit_i4(1);
            b.emit(OpCode::Pop);
            b.emit_method(OpCode::Call, helper);
            b.emit(OpCode::Ret);
        });
    }
    s
}

fn many_contexts(contexts: usize) -> Synthetic {
    let (mut s, statics) = skeleton(contexts);
    for (i, x) in statics.into_iter().enumerate() {
        util_method(&mut s.program, i, |b| {
            b.emit_i4(i as i32);
            b.emit_field(OpCode::StSFld, x);
            b.emit(OpCode::Ret);
        });
    }
    s
}

fn bind(s: &Synthetic) {
    let mut program = s.program.clone();
    let mut plan = s.plan.clone();
    let report = ContextBinder::new(BinderConfig::default())
        .run(&mut program, &mut plan)
        .unwrap();
    black_box(report);
    end_profiling_frame();
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_call_chain(c: &mut Criterion) {
    setup_profiler();
    let mut group = c.benchmark_group("call_chain");
    for depth in [8, 64, 256] {
        let s = call_chain(depth);
        group.throughput(Throughput::Elements(depth as u64));
        group.bench_with_input(BenchmarkId::from_parameter(depth), &s, |b, s| b.iter(|| bind(s)));
    }
    group.finish();
}

fn bench_fan_in(c: &mut Criterion) {
    let mut group = c.benchmark_group("fan_in");
    for callers in [16, 256, 1024] {
        let s = fan_in(callers);
        group.throughput(Throughput::Elements(callers as u64));
        group.bench_with_input(BenchmarkId::from_parameter(callers), &s, |b, s| b.iter(|| bind(s)));
    }
    group.finish();
}

fn bench_many_contexts(c: &mut Criterion) {
    let mut group = c.benchmark_group("contexts");
    for contexts in [4, 64, 256] {
        let s = many_contexts(contexts);
        group.throughput(Throughput::Elements(contexts as u64));
        group.bench_with_input(BenchmarkId::from_parameter(contexts), &s, |b, s| b.iter(|| bind(s)));
    }
    group.finish();
}

criterion_group!(benches, bench_call_chain, bench_fan_in, bench_many_contexts);
criterion_main!(benches);
