//! Integration tests for the evaluation bridge.
//!
//! These run encoders, decoders and whole evaluations against the
//! scripted runtime in both representations.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use pretty_assertions::assert_eq;
use pyface_bridge::scripted::{Object, Value};
use pyface_bridge::{
    initialize_runtime, ActiveSet, BridgeError, Decoder, Encoder, EvalRequest, EvaluationInvoker, InterfaceConfig,
    InterfaceRegistry, RealMatrix, RealSymMatrix, RepresentationMode, Response, ScriptError, ScriptedRuntime,
    Triangle, Variables, ASV_GRADIENT, ASV_HESSIAN, ASV_VALUE,
};

const MODES: [RepresentationMode; 2] = [RepresentationMode::Generic, RepresentationMode::Dense];

fn matrix(rows: &[Vec<f64>]) -> RealMatrix {
    RealMatrix::from_rows(rows).unwrap()
}

/// f(x) = sum(x_i^2), with gradient and Hessian over the requested dvv
fn quadratic(rt: &ScriptedRuntime, kwargs: &Object) -> Result<Object, ScriptError> {
    let x = kwargs
        .kwarg("av")?
        .to_f64_vec()
        .ok_or_else(|| ScriptError::type_error("av must be numeric"))?;
    let dvv: Vec<usize> = kwargs
        .kwarg("dvv")?
        .to_f64_vec()
        .ok_or_else(|| ScriptError::type_error("dvv must be numeric"))?
        .into_iter()
        .map(|id| id as usize)
        .collect();

    let value: f64 = x.iter().map(|v| v * v).sum();
    let grad: Vec<f64> = dvv.iter().map(|&id| 2.0 * x[id - 1]).collect();
    let hess: Vec<Vec<f64>> = (0..dvv.len())
        .map(|i| (0..dvv.len()).map(|j| if i == j { 2.0 } else { 0.0 }).collect())
        .collect();

    Ok(rt.dict(vec![
        ("fns", rt.list_f64(&[value])),
        ("fnGrads", rt.nested_f64(&[grad])),
        ("fnHessians", rt.object(Value::List(vec![rt.nested_f64(&hess)]))),
    ]))
}

fn scripted() -> Arc<ScriptedRuntime> {
    initialize_runtime().unwrap();
    let rt = Arc::new(ScriptedRuntime::new());
    rt.define("model:quadratic", quadratic);
    rt
}

// ============================================================================
// Round trips
// ============================================================================

mod round_trips {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_vector_round_trip() {
        let rt = ScriptedRuntime::new();
        let v = vec![0.0, -1.5, 3.25, 1e-300, f64::MAX];
        for mode in MODES {
            let obj = Encoder::new(&rt, mode).encode_vector(&v).unwrap();
            let back = Decoder::new(&rt).decode_vector(&obj, v.len()).unwrap();
            assert_eq!(back, v, "mode {}", mode);
        }
    }

    #[test]
    fn test_empty_vector_round_trip() {
        let rt = ScriptedRuntime::new();
        let v: Vec<f64> = Vec::new();
        for mode in MODES {
            let obj = Encoder::new(&rt, mode).encode_vector(&v).unwrap();
            assert!(Decoder::new(&rt).decode_vector(&obj, 0).unwrap().is_empty());
        }
    }

    #[test]
    fn test_non_square_matrix_round_trip() {
        let rt = ScriptedRuntime::new();
        let m = matrix(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]);
        for mode in MODES {
            let obj = Encoder::new(&rt, mode).encode_matrix(&m).unwrap();
            assert_eq!(Decoder::new(&rt).decode_matrix(&obj).unwrap(), m, "mode {}", mode);
        }

        let tall = matrix(&[vec![1.0], vec![2.0], vec![3.0]]);
        for mode in MODES {
            let obj = Encoder::new(&rt, mode).encode_matrix(&tall).unwrap();
            assert_eq!(Decoder::new(&rt).decode_matrix(&obj).unwrap(), tall);
        }
    }

    #[test]
    fn test_symmetric_expansion_is_symmetric() {
        let rt = ScriptedRuntime::new();
        let mut s = RealSymMatrix::zeros(3);
        let mut k = 1.0;
        for i in 0..3 {
            for j in 0..=i {
                s.set(i, j, k).unwrap();
                k += 1.0;
            }
        }

        for mode in MODES {
            let obj = Encoder::new(&rt, mode).encode_symmetric(&s).unwrap();
            let full = Decoder::new(&rt).decode_matrix(&obj).unwrap();
            assert!(full.is_symmetric(), "mode {}", mode);
            assert_eq!(full, s.to_full());

            let back = Decoder::new(&rt).decode_sym_matrix(&obj, 3, Triangle::Upper).unwrap();
            assert_eq!(back, s);
        }
    }

    #[test]
    fn test_tensor_round_trip() {
        let rt = ScriptedRuntime::new();
        let mut a = RealSymMatrix::zeros(2);
        a.set(1, 0, 3.0).unwrap();
        let mut b = RealSymMatrix::zeros(2);
        b.set(1, 1, 7.0).unwrap();
        let tensor = vec![a, b];

        for mode in MODES {
            let obj = Encoder::new(&rt, mode).encode_tensor(&tensor).unwrap();
            let back = Decoder::new(&rt)
                .decode_sym_matrix_array(&obj, 2, 2, Triangle::Lower)
                .unwrap();
            assert_eq!(back, tensor, "mode {}", mode);
        }
    }

    #[test]
    fn test_mixed_vector_order() {
        let rt = ScriptedRuntime::new();
        for mode in MODES {
            let obj = Encoder::new(&rt, mode)
                .encode_mixed(&[1.0, 2.0], &[3i64], &[4.5])
                .unwrap();
            let back = Decoder::new(&rt).decode_vector(&obj, 4).unwrap();
            assert_eq!(back, vec![1.0, 2.0, 3.0, 4.5], "mode {}", mode);
        }
    }

    #[test]
    fn test_label_grouping() {
        let rt = ScriptedRuntime::new();
        let vars = Variables::continuous(vec![0.0], ["x1"])
            .with_discrete_int(vec![1], ["d1"])
            .with_discrete_real(vec![2.0], ["y1"]);
        for mode in MODES {
            let obj = Encoder::new(&rt, mode).encode_variable_labels(&vars).unwrap();
            assert_eq!(obj.to_string_vec().unwrap(), vec!["x1", "d1", "y1"], "mode {}", mode);
        }
    }
}

// ============================================================================
// Malformed foreign results
// ============================================================================

mod malformed {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_short_vector_never_padded() {
        let rt = ScriptedRuntime::new();
        for mode in MODES {
            let obj = Encoder::new(&rt, mode).encode_vector(&[1.0, 2.0, 3.0]).unwrap();
            let err = Decoder::new(&rt).decode_vector(&obj, 4).unwrap_err();
            assert!(
                matches!(err, BridgeError::DimensionMismatch { expected: 4, actual: 3, .. }),
                "mode {}: {:?}",
                mode,
                err
            );
        }
    }

    #[test]
    fn test_jagged_rows_fail_without_partial_result() {
        let rt = ScriptedRuntime::new();
        let obj = rt.nested_f64(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0], vec![7.0, 8.0]]);
        let result = Decoder::new(&rt).decode_matrix(&obj);
        assert_eq!(
            result,
            Err(BridgeError::ShapeMismatch {
                row: 2,
                expected: 3,
                actual: 2
            })
        );
    }

    #[test]
    fn test_hessian_count_mismatch_same_kind_in_both_modes() {
        let rt = ScriptedRuntime::new();
        let mut h = RealSymMatrix::zeros(2);
        h.set(1, 0, 3.0).unwrap();
        let hessians = vec![h.clone(), h];
        for mode in MODES {
            let obj = Encoder::new(&rt, mode).encode_tensor(&hessians).unwrap();
            let err = Decoder::new(&rt)
                .at("fnHessians")
                .decode_sym_matrix_array(&obj, 3, 2, Triangle::Lower)
                .unwrap_err();
            assert_eq!(err, BridgeError::dimension_mismatch("fnHessians", 3, 2), "mode {}", mode);
        }
    }

    #[test]
    fn test_mapping_is_not_a_vector() {
        let rt = ScriptedRuntime::new();
        let obj = rt.dict(vec![("fns", rt.list_f64(&[1.0]))]);
        assert!(Decoder::new(&rt).decode_vector(&obj, 1).unwrap_err().is_type_error());
    }
}

// ============================================================================
// Evaluations
// ============================================================================

mod evaluations {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(bits: u8) -> EvalRequest {
        let vars = Variables::continuous(vec![1.0, 2.0], ["x1", "x2"]).with_discrete_int(vec![3], ["n"]);
        EvalRequest::new(11, vars, ActiveSet::new(vec![bits], vec![1, 2]))
            .with_analysis_components(["case-a"])
    }

    #[test]
    fn test_full_evaluation_both_modes() {
        let rt = scripted();
        for mode in MODES {
            let invoker = EvaluationInvoker::new(Arc::clone(&rt), "model:quadratic", mode);
            let req = request(ASV_VALUE | ASV_GRADIENT | ASV_HESSIAN);
            let mut resp = Response::for_active_set(&req.active_set);

            invoker.evaluate(&req, &mut resp).unwrap();

            assert_eq!(resp.function_values, vec![14.0], "mode {}", mode);
            assert_eq!(resp.gradients.row(0), &[2.0, 4.0]);
            assert_eq!(resp.hessians[0].get(0, 0), Some(2.0));
            assert_eq!(resp.hessians[0].get(1, 0), Some(0.0));
        }
    }

    #[test]
    fn test_keyword_arguments() {
        let rt = scripted();
        let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
        let record = Arc::clone(&seen);
        rt.define("model:inspect", move |rt, kwargs| {
            let mut seen = record.lock();
            for key in ["functions", "variables", "currEvalId"] {
                seen.push(format!("{}={}", key, kwargs.kwarg(key)?));
            }
            for key in ["av_labels", "analysis_components"] {
                seen.push(format!("{}={}", key, kwargs.kwarg(key)?));
            }
            seen.push(format!("div={}", kwargs.kwarg("div")?.type_name()));
            Ok(rt.list_f64(&[0.0]))
        });

        let invoker = EvaluationInvoker::new(Arc::clone(&rt), "model:inspect", RepresentationMode::Dense);
        let req = request(ASV_VALUE);
        let mut resp = Response::for_active_set(&req.active_set);
        invoker.evaluate(&req, &mut resp).unwrap();

        assert_eq!(
            *seen.lock(),
            vec![
                "functions=1".to_string(),
                "variables=3".to_string(),
                "currEvalId=11".to_string(),
                "av_labels=['x1', 'x2', 'n']".to_string(),
                "analysis_components=['case-a']".to_string(),
                "div=ndarray".to_string(),
            ]
        );
    }

    #[test]
    fn test_unknown_callable_leaves_response_untouched() {
        let rt = scripted();
        let invoker = EvaluationInvoker::new(rt, "model:quadratic", RepresentationMode::Generic);
        let req = request(ASV_VALUE | ASV_GRADIENT);
        let mut resp = Response::for_active_set(&req.active_set);
        resp.function_values[0] = 42.0;
        let before = resp.clone();

        let err = invoker.evaluate_as("model:absent", &req, &mut resp).unwrap_err();
        assert!(matches!(err, BridgeError::NameResolutionFailure { .. }));
        assert_eq!(resp, before);
    }

    #[test]
    fn test_bad_result_leaves_response_untouched() {
        let rt = scripted();
        rt.define("model:short", |rt, _kwargs| {
            Ok(rt.dict(vec![
                ("fns", rt.list_f64(&[1.0])),
                ("fnGrads", rt.nested_f64(&[vec![1.0]])),
            ]))
        });

        let invoker = EvaluationInvoker::new(rt, "model:short", RepresentationMode::Generic);
        let req = request(ASV_VALUE | ASV_GRADIENT);
        let mut resp = Response::for_active_set(&req.active_set);
        let before = resp.clone();

        let err = invoker.evaluate(&req, &mut resp).unwrap_err();
        assert_eq!(err, BridgeError::dimension_mismatch("fnGrads[0]", 2, 1));
        assert_eq!(resp, before);
    }

    #[test]
    fn test_no_objects_leak() {
        let rt = scripted();
        rt.define("model:fail", |_rt, _kwargs| Err(ScriptError::new("RuntimeError", "no")));
        let baseline = rt.live_objects();

        for mode in MODES {
            let invoker = EvaluationInvoker::new(Arc::clone(&rt), "model:quadratic", mode);
            let req = request(ASV_VALUE | ASV_GRADIENT | ASV_HESSIAN);
            let mut resp = Response::for_active_set(&req.active_set);

            invoker.evaluate(&req, &mut resp).unwrap();
            assert_eq!(rt.live_objects(), baseline);

            assert!(invoker.evaluate_as("model:fail", &req, &mut resp).is_err());
            assert_eq!(rt.live_objects(), baseline);

            assert!(invoker.evaluate_as("model:absent", &req, &mut resp).is_err());
            assert_eq!(rt.live_objects(), baseline);
        }
    }

    #[test]
    fn test_allocation_failure_mid_encoding() {
        let rt = scripted();
        let baseline = rt.live_objects();
        let invoker = EvaluationInvoker::new(Arc::clone(&rt), "model:quadratic", RepresentationMode::Generic);
        let req = request(ASV_VALUE);
        let mut resp = Response::for_active_set(&req.active_set);
        let before = resp.clone();

        for successes in [0, 3, 10] {
            rt.fail_allocations_after(successes);
            let err = invoker.evaluate(&req, &mut resp).unwrap_err();
            assert!(matches!(err, BridgeError::AllocationFailure { .. }));
            assert_eq!(rt.live_objects(), baseline);
            assert_eq!(resp, before);
        }
        rt.clear_allocation_failure();
        invoker.evaluate(&req, &mut resp).unwrap();
    }

    #[test]
    fn test_concurrent_evaluations_serialize() {
        let rt = scripted();
        let in_flight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));
        {
            let in_flight = Arc::clone(&in_flight);
            let max_seen = Arc::clone(&max_seen);
            rt.define("model:slow", move |rt, _kwargs| {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                max_seen.fetch_max(now, Ordering::SeqCst);
                thread::yield_now();
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(rt.list_f64(&[1.0]))
            });
        }

        let invoker = Arc::new(EvaluationInvoker::new(rt, "model:slow", RepresentationMode::Generic));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let invoker = Arc::clone(&invoker);
                thread::spawn(move || {
                    for _ in 0..25 {
                        let req = request(ASV_VALUE);
                        let mut resp = Response::for_active_set(&req.active_set);
                        invoker.evaluate(&req, &mut resp).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}

// ============================================================================
// Configuration and registry
// ============================================================================

mod registration {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_dispatch_configured_interface() {
        let rt = scripted();
        let registry = InterfaceRegistry::new();
        let config = InterfaceConfig::from_toml_str(
            r#"
id = "opt"
analysis_drivers = ["model:quadratic"]
numpy = true
"#,
        )
        .unwrap();
        config.register(&registry, rt, None).unwrap();

        let vars = Variables::continuous(vec![3.0], ["x"]);
        let req = EvalRequest::new(1, vars, ActiveSet::uniform(1, 1, ASV_VALUE));
        let mut resp = Response::for_active_set(&req.active_set);
        registry.dispatch("opt", None, &req, &mut resp).unwrap();
        assert_eq!(resp.function_values, vec![9.0]);

        let err = registry
            .dispatch("opt", Some("model:absent"), &req, &mut resp)
            .unwrap_err();
        assert!(err.is_foreign_error());
    }

    #[test]
    fn test_configured_components_reach_callable() {
        let rt = scripted();
        rt.define("model:by_component", |rt, kwargs| {
            let components = kwargs
                .kwarg("analysis_components")?
                .to_string_vec()
                .ok_or_else(|| ScriptError::type_error("analysis_components must be strings"))?;
            match components.first().map(String::as_str) {
                Some("case-a") => Ok(rt.list_f64(&[1.0])),
                other => Err(ScriptError::key_error(&format!("{:?}", other))),
            }
        });
        let registry = InterfaceRegistry::new();
        let config = InterfaceConfig::from_toml_str(
            r#"
id = "opt"
analysis_drivers = ["model:by_component"]
analysis_components = ["case-a"]
"#,
        )
        .unwrap();
        config.register(&registry, rt, None).unwrap();

        let req = EvalRequest::new(1, Variables::continuous(vec![3.0], ["x"]), ActiveSet::uniform(1, 1, ASV_VALUE));
        let mut resp = Response::for_active_set(&req.active_set);
        registry.dispatch("opt", None, &req, &mut resp).unwrap();
        assert_eq!(resp.function_values, vec![1.0]);
    }
}
