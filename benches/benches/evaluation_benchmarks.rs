//! Evaluation Benchmarks
//!
//! Whole evaluations through the invoker: keyword encoding, the call, and
//! result decoding, against a scripted quadratic model.

use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pyface_bridge::scripted::Object;
use pyface_bridge::{
    initialize_runtime, ActiveSet, EvalRequest, EvaluationInvoker, RepresentationMode, Response, ScriptError,
    ScriptedRuntime, Variables, ASV_GRADIENT, ASV_VALUE,
};

fn quadratic(rt: &ScriptedRuntime, kwargs: &Object) -> Result<Object, ScriptError> {
    let x = kwargs
        .kwarg("cv")?
        .to_f64_vec()
        .ok_or_else(|| ScriptError::type_error("cv"))?;
    let value: f64 = x.iter().map(|v| v * v).sum();
    let grad: Vec<f64> = x.iter().map(|v| 2.0 * v).collect();
    Ok(rt.dict(vec![
        ("fns", rt.list_f64(&[value])),
        ("fnGrads", rt.nested_f64(&[grad])),
    ]))
}

fn bench_evaluate(c: &mut Criterion) {
    let mut group = c.benchmark_group("evaluate");
    if initialize_runtime().is_err() {
        return;
    }
    let rt = Arc::new(ScriptedRuntime::new());
    rt.define("model:quadratic", quadratic);

    for vars in [2usize, 50, 500] {
        let labels: Vec<String> = (1..=vars).map(|i| format!("x{}", i)).collect();
        let values: Vec<f64> = (0..vars).map(|i| i as f64).collect();
        let req = EvalRequest::new(
            1,
            Variables::continuous(values, labels),
            ActiveSet::uniform(1, vars, ASV_VALUE | ASV_GRADIENT),
        );

        for mode in [RepresentationMode::Generic, RepresentationMode::Dense] {
            let invoker = EvaluationInvoker::new(Arc::clone(&rt), "model:quadratic", mode);
            group.bench_with_input(BenchmarkId::new(mode.to_string(), vars), &req, |b, req| {
                let mut resp = Response::for_active_set(&req.active_set);
                b.iter(|| black_box(invoker.evaluate(black_box(req), &mut resp).is_ok()))
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_evaluate);
criterion_main!(benches);
