//! Evaluation Invoker
//!
//! Runs one analysis call end to end: encode the request, call the named
//! foreign callable with it as keyword arguments, decode what comes back.
//!
//! ```text
//! Idle -> Encoding -> Invoking -> Decoding -> Done
//!            \           |           /
//!             `------> Error <------'
//! ```
//!
//! The whole span runs under the global execution lock. Decoded values go
//! into temporaries first and are copied into the driver's response only
//! once everything succeeded, so a failed evaluation leaves the response
//! untouched. Nothing is retried.

use std::fmt;
use std::sync::Arc;

use smol_str::SmolStr;
use tracing::{debug, info, warn};

use crate::containers::{RealMatrix, RealSymMatrixArray, RealVector, Triangle};
use crate::decode::Decoder;
use crate::encode::Encoder;
use crate::error::{BridgeError, BridgeResult};
use crate::evaluation::{ActiveSet, EvalRequest, Response, ASV_GRADIENT, ASV_HESSIAN, ASV_VALUE};
use crate::gil::GilGuard;
use crate::runtime::{ForeignRuntime, ForeignShape, RepresentationMode};

/// Result mapping key for function values
pub const KEY_FNS: &str = "fns";
/// Result mapping key for gradients
pub const KEY_FN_GRADS: &str = "fnGrads";
/// Result mapping key for Hessians
pub const KEY_FN_HESSIANS: &str = "fnHessians";

// ============================================================================
// Invocation state
// ============================================================================

/// Where an invocation is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    /// Not started
    Idle,
    /// Building keyword arguments
    Encoding,
    /// Inside the foreign callable
    Invoking,
    /// Reading the result
    Decoding,
    /// Finished successfully
    Done,
    /// Failed; absorbing
    Error,
}

impl InvocationState {
    /// Check whether `self -> next` is a legal transition
    pub fn can_transition_to(self, next: InvocationState) -> bool {
        use InvocationState::*;
        matches!(
            (self, next),
            (Idle, Encoding)
                | (Encoding, Invoking)
                | (Invoking, Decoding)
                | (Decoding, Done)
                | (Encoding | Invoking | Decoding, Error)
        )
    }

    /// Check for a final state
    pub fn is_terminal(self) -> bool {
        matches!(self, InvocationState::Done | InvocationState::Error)
    }
}

impl fmt::Display for InvocationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InvocationState::Idle => "Idle",
            InvocationState::Encoding => "Encoding",
            InvocationState::Invoking => "Invoking",
            InvocationState::Decoding => "Decoding",
            InvocationState::Done => "Done",
            InvocationState::Error => "Error",
        };
        write!(f, "{}", name)
    }
}

/// Tracks one invocation through its states
#[derive(Debug)]
pub struct Invocation {
    state: InvocationState,
    callable: SmolStr,
    eval_id: u64,
    history: Vec<InvocationState>,
}

impl Invocation {
    /// Start tracking an invocation of `callable`
    pub fn new(callable: impl Into<SmolStr>, eval_id: u64) -> Self {
        Self {
            state: InvocationState::Idle,
            callable: callable.into(),
            eval_id,
            history: vec![InvocationState::Idle],
        }
    }

    /// Current state
    pub fn state(&self) -> InvocationState {
        self.state
    }

    /// States visited so far, in order
    pub fn history(&self) -> &[InvocationState] {
        &self.history
    }

    /// Move to `next`, rejecting illegal transitions
    pub fn advance(&mut self, next: InvocationState) -> BridgeResult<()> {
        if !self.state.can_transition_to(next) {
            return Err(BridgeError::InvalidState {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!(
            callable = %self.callable,
            eval_id = self.eval_id,
            from = %self.state,
            to = %next,
            "invocation transition"
        );
        self.state = next;
        self.history.push(next);
        Ok(())
    }

    /// Record `err` and move to `Error` if not already terminal
    pub fn fail(&mut self, err: &BridgeError) {
        warn!(
            callable = %self.callable,
            eval_id = self.eval_id,
            state = %self.state,
            kind = err.kind(),
            "evaluation failed: {}",
            err
        );
        if self.state.can_transition_to(InvocationState::Error) {
            self.state = InvocationState::Error;
            self.history.push(InvocationState::Error);
        }
    }
}

// ============================================================================
// Decoded results
// ============================================================================

/// Everything read back from one call, before it is committed
#[derive(Debug, Default)]
struct Decoded {
    fns: Option<RealVector>,
    grads: Option<RealMatrix>,
    hessians: Option<RealSymMatrixArray>,
}

impl Decoded {
    /// Copy requested components into `response`
    fn commit(self, set: &ActiveSet, response: &mut Response) {
        for i in 0..set.num_functions() {
            if let Some(fns) = &self.fns {
                if set.requests(i, ASV_VALUE) {
                    response.function_values[i] = fns[i];
                }
            }
            if let Some(grads) = &self.grads {
                if set.requests(i, ASV_GRADIENT) {
                    response.gradients.row_mut(i).copy_from_slice(grads.row(i));
                }
            }
            if let Some(hessians) = &self.hessians {
                if set.requests(i, ASV_HESSIAN) {
                    response.hessians[i] = hessians[i].clone();
                }
            }
        }
    }
}

// ============================================================================
// EvaluationInvoker
// ============================================================================

/// Calls one foreign analysis driver per evaluation.
///
/// The representation mode and symmetric triangle are fixed at
/// construction; `evaluate` takes `&self` and never changes them.
pub struct EvaluationInvoker<R: ForeignRuntime> {
    runtime: Arc<R>,
    driver: SmolStr,
    mode: RepresentationMode,
    triangle: Triangle,
    analysis_components: Vec<SmolStr>,
}

impl<R: ForeignRuntime> EvaluationInvoker<R> {
    /// Create an invoker for the `module:function` callable `driver`
    pub fn new(runtime: Arc<R>, driver: impl Into<SmolStr>, mode: RepresentationMode) -> Self {
        Self {
            runtime,
            driver: driver.into(),
            mode,
            triangle: Triangle::default(),
            analysis_components: Vec::new(),
        }
    }

    /// Take Hessians from the upper triangle of returned matrices
    pub fn with_triangle(mut self, triangle: Triangle) -> Self {
        self.triangle = triangle;
        self
    }

    /// Components passed to the callable when a request names none
    pub fn with_analysis_components<S: Into<SmolStr>>(mut self, components: impl IntoIterator<Item = S>) -> Self {
        self.analysis_components = components.into_iter().map(Into::into).collect();
        self
    }

    /// Configured analysis components
    pub fn analysis_components(&self) -> &[SmolStr] {
        &self.analysis_components
    }

    /// Default callable name
    pub fn driver(&self) -> &str {
        &self.driver
    }

    /// Representation mode
    pub fn mode(&self) -> RepresentationMode {
        self.mode
    }

    /// Triangle used when decoding Hessians
    pub fn triangle(&self) -> Triangle {
        self.triangle
    }

    /// The runtime this invoker calls into
    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// Evaluate with the default callable
    pub fn evaluate(&self, request: &EvalRequest, response: &mut Response) -> BridgeResult<()> {
        self.evaluate_as(&self.driver, request, response)
    }

    /// Evaluate with the callable `name` instead of the default.
    pub fn evaluate_as(&self, name: &str, request: &EvalRequest, response: &mut Response) -> BridgeResult<()> {
        let mut invocation = Invocation::new(name, request.eval_id);
        self.run_tracked(&mut invocation, request, response)
    }

    /// Evaluate, recording the states the invocation went through
    pub fn run_tracked(
        &self,
        invocation: &mut Invocation,
        request: &EvalRequest,
        response: &mut Response,
    ) -> BridgeResult<()> {
        request.validate()?;
        response.check_shape(&request.active_set)?;

        info!(
            callable = %invocation.callable,
            eval_id = request.eval_id,
            mode = %self.mode,
            runtime = self.runtime.name(),
            "evaluation started"
        );

        let _lock = GilGuard::acquire()?;
        let decoded = self.runtime.scoped(|| {
            let result = self.call(invocation, request);
            if let Err(err) = &result {
                invocation.fail(err);
            }
            result
        })?;

        decoded.commit(&request.active_set, response);
        invocation.advance(InvocationState::Done)?;
        info!(callable = %invocation.callable, eval_id = request.eval_id, "evaluation finished");
        Ok(())
    }

    /// Encode, invoke, decode. Every foreign object built here is dropped
    /// before this returns.
    fn call(&self, invocation: &mut Invocation, request: &EvalRequest) -> BridgeResult<Decoded> {
        let name = invocation.callable.clone();

        invocation.advance(InvocationState::Encoding)?;
        let kwargs = self.encode_kwargs(request)?;

        invocation.advance(InvocationState::Invoking)?;
        let callable = self.runtime.resolve_callable(&name)?;
        let result = self
            .runtime
            .invoke(&callable, &kwargs)
            .map_err(|e| e.with_callable(&name))?;
        drop(kwargs);

        invocation.advance(InvocationState::Decoding)?;
        self.decode_result(&result, &request.active_set)
    }

    /// Build the keyword mapping handed to the callable
    fn encode_kwargs(&self, request: &EvalRequest) -> BridgeResult<R::Object> {
        let rt = &*self.runtime;
        let enc = Encoder::new(rt, self.mode);
        let vars = &request.variables;
        let set = &request.active_set;

        let components = if request.analysis_components.is_empty() {
            &self.analysis_components
        } else {
            &request.analysis_components
        };

        let entries = vec![
            ("functions", rt.int(to_int("functions", set.num_functions())?)?),
            ("variables", rt.int(to_int("variables", vars.total())?)?),
            ("cv", enc.encode_vector(&vars.continuous)?),
            ("div", enc.encode_int_array(&vars.discrete_int)?),
            ("drv", enc.encode_vector(&vars.discrete_real)?),
            ("av", enc.encode_variables(vars)?),
            ("cv_labels", enc.encode_labels(&vars.continuous_labels)?),
            ("div_labels", enc.encode_labels(&vars.discrete_int_labels)?),
            ("drv_labels", enc.encode_labels(&vars.discrete_real_labels)?),
            ("av_labels", enc.encode_variable_labels(vars)?),
            ("asv", enc.encode_int_array(set.asv())?),
            ("dvv", enc.encode_int_array(set.dvv())?),
            ("currEvalId", rt.int(to_int("currEvalId", request.eval_id)?)?),
            ("analysis_components", enc.encode_labels(components)?),
        ];
        rt.mapping(entries)
    }

    /// Read the requested components out of a result mapping, or treat a
    /// bare sequence as the function values.
    fn decode_result(&self, result: &R::Object, set: &ActiveSet) -> BridgeResult<Decoded> {
        let rt = &*self.runtime;
        let dec = Decoder::new(rt);
        let num_fns = set.num_functions();
        let num_derivs = set.num_derivatives();
        let mut decoded = Decoded::default();

        match rt.describe_shape(result)? {
            ForeignShape::Mapping => {
                if set.any(ASV_VALUE) {
                    let fns = required(rt.lookup(result, KEY_FNS)?, KEY_FNS)?;
                    decoded.fns = Some(dec.at(KEY_FNS).decode_vector(&fns, num_fns)?);
                }
                if set.any(ASV_GRADIENT) {
                    let grads = required(rt.lookup(result, KEY_FN_GRADS)?, KEY_FN_GRADS)?;
                    decoded.grads = Some(dec.at(KEY_FN_GRADS).decode_rows(&grads, num_fns, num_derivs)?);
                }
                if set.any(ASV_HESSIAN) {
                    let hessians = required(rt.lookup(result, KEY_FN_HESSIANS)?, KEY_FN_HESSIANS)?;
                    decoded.hessians = Some(dec.at(KEY_FN_HESSIANS).decode_sym_matrix_array(
                        &hessians,
                        num_fns,
                        num_derivs,
                        self.triangle,
                    )?);
                }
            }
            ForeignShape::Sequence { .. } | ForeignShape::Dense { .. } => {
                if set.any(ASV_GRADIENT) {
                    return Err(BridgeError::missing_result(KEY_FN_GRADS));
                }
                if set.any(ASV_HESSIAN) {
                    return Err(BridgeError::missing_result(KEY_FN_HESSIANS));
                }
                decoded.fns = Some(dec.at(KEY_FNS).decode_vector(result, num_fns)?);
            }
            other => {
                return Err(BridgeError::type_mismatch(
                    "mapping or sequence of function values",
                    other.describe(),
                ));
            }
        }
        Ok(decoded)
    }
}

impl<R: ForeignRuntime> fmt::Debug for EvaluationInvoker<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationInvoker")
            .field("runtime", &self.runtime.name())
            .field("driver", &self.driver)
            .field("mode", &self.mode)
            .field("triangle", &self.triangle)
            .field("analysis_components", &self.analysis_components)
            .finish()
    }
}

/// Foreign integers are signed 64-bit
fn to_int<T>(key: &str, value: T) -> BridgeResult<i64>
where
    T: TryInto<i64> + Copy + fmt::Display,
{
    value
        .try_into()
        .map_err(|_| BridgeError::type_mismatch(format!("{} within i64 range", key), value.to_string()))
}

fn required<T>(value: Option<T>, key: &str) -> BridgeResult<T> {
    value.ok_or_else(|| BridgeError::missing_result(key))
}
