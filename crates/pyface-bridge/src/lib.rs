//! # Pyface Bridge
//!
//! Marshalling bridge between an analysis driver's native numeric
//! containers and analysis functions living in a dynamically typed
//! runtime.
//!
//! ## Overview
//!
//! - Native containers: real/integer vectors, row-major matrices, packed
//!   symmetric matrices and arrays of them, labels, mixed variables
//! - A capability trait, [`ForeignRuntime`], that is everything the bridge
//!   needs from the dynamic runtime
//! - Encoders and a decoder that speak either generic sequences or dense
//!   arrays, chosen once per interface
//! - An evaluation invoker that calls a `module:function` callable with
//!   keyword arguments and fills the driver's response
//! - A registry the host dispatches evaluations through by name
//! - Process-wide runtime lifecycle and a global execution lock
//!
//! ## Calling Convention
//!
//! ```text
//! def evaluate(**kwargs):
//!     x = kwargs["cv"]
//!     return {"fns": [f(x)], "fnGrads": [grad_f(x)]}
//! ```
//!
//! ## Module Structure
//!
//! - [`containers`]: native numeric containers
//! - [`array`]: dense array layout and strided access
//! - [`runtime`]: foreign runtime capability trait
//! - [`encode`] / [`decode`]: conversions in each direction
//! - [`evaluation`]: requests, active sets, responses
//! - [`invoke`]: the evaluation invoker and its state machine
//! - [`registry`]: interface registration and dispatch
//! - [`config`]: TOML interface configuration
//! - [`gil`]: runtime lifecycle and execution lock
//! - [`scripted`]: in-process runtime of Rust closures
//! - [`error`]: error types

pub mod array;
pub mod config;
pub mod containers;
pub mod decode;
pub mod encode;
pub mod error;
pub mod evaluation;
pub mod gil;
pub mod invoke;
pub mod registry;
pub mod runtime;
pub mod scripted;

// Re-export main types for convenience
pub use array::{ArrayLayout, ArrayOrder, DType, DenseArray, DenseBuffer};
pub use config::InterfaceConfig;
pub use containers::{
    ElementSource, IntVector, IntoScalar, RealMatrix, RealSymMatrix, RealSymMatrixArray, RealVector, Scalar,
    StringArray, Triangle, Variables,
};
pub use decode::Decoder;
pub use encode::Encoder;
pub use error::{BridgeDiagnostic, BridgeError, BridgeResult, EvalLocation};
pub use evaluation::{ActiveSet, EvalRequest, Response, ASV_GRADIENT, ASV_HESSIAN, ASV_VALUE};
pub use gil::{
    finalize_runtime, gil_stats, initialize_runtime, initialize_runtime_with, is_runtime_initialized, runtime_state,
    GilGuard, GilState, GilStats, LifecycleState, RuntimeLifecycle,
};
pub use invoke::{EvaluationInvoker, Invocation, InvocationState};
pub use registry::{DirectInterface, EvalContext, InterfaceRegistry, UserData};
pub use runtime::{split_callable_name, ForeignRuntime, ForeignShape, RepresentationMode, MAIN_MODULE};
pub use scripted::{ScriptError, ScriptedRuntime};
