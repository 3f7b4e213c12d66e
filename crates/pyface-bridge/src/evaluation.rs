//! Evaluation Requests and Responses
//!
//! What the driver asks for in one evaluation and where the answers go.

use smol_str::SmolStr;

use crate::containers::{RealMatrix, RealSymMatrix, RealSymMatrixArray, RealVector, Variables};
use crate::error::{BridgeError, BridgeResult};

/// Active set vector bit requesting the function value
pub const ASV_VALUE: u8 = 1;
/// Active set vector bit requesting the gradient
pub const ASV_GRADIENT: u8 = 2;
/// Active set vector bit requesting the Hessian
pub const ASV_HESSIAN: u8 = 4;

/// Which response components to compute, per function, and with respect
/// to which variables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSet {
    asv: Vec<u8>,
    dvv: Vec<usize>,
}

impl ActiveSet {
    /// Build from a request vector and 1-based derivative variable ids
    pub fn new(asv: Vec<u8>, dvv: Vec<usize>) -> Self {
        Self { asv, dvv }
    }

    /// Same request bits for every function; derivatives with respect to
    /// all `num_vars` variables
    pub fn uniform(num_fns: usize, num_vars: usize, bits: u8) -> Self {
        Self {
            asv: vec![bits; num_fns],
            dvv: (1..=num_vars).collect(),
        }
    }

    /// Request bits per function
    pub fn asv(&self) -> &[u8] {
        &self.asv
    }

    /// Derivative variable ids, 1-based
    pub fn dvv(&self) -> &[usize] {
        &self.dvv
    }

    /// Number of response functions
    pub fn num_functions(&self) -> usize {
        self.asv.len()
    }

    /// Number of derivative variables
    pub fn num_derivatives(&self) -> usize {
        self.dvv.len()
    }

    /// Check if function `index` has `bit` requested
    pub fn requests(&self, index: usize, bit: u8) -> bool {
        self.asv.get(index).is_some_and(|b| b & bit != 0)
    }

    /// Check if any function has `bit` requested
    pub fn any(&self, bit: u8) -> bool {
        self.asv.iter().any(|b| b & bit != 0)
    }
}

/// One evaluation request from the driver
#[derive(Debug, Clone)]
pub struct EvalRequest {
    /// Evaluation id, passed through as `currEvalId`
    pub eval_id: u64,
    /// Variable values and labels
    pub variables: Variables,
    /// Requested components
    pub active_set: ActiveSet,
    /// Strings from the driver configuration, passed through verbatim
    pub analysis_components: Vec<SmolStr>,
}

impl EvalRequest {
    /// Create a request without analysis components
    pub fn new(eval_id: u64, variables: Variables, active_set: ActiveSet) -> Self {
        Self {
            eval_id,
            variables,
            active_set,
            analysis_components: Vec::new(),
        }
    }

    /// Set the analysis components
    pub fn with_analysis_components<S: Into<SmolStr>>(mut self, components: impl IntoIterator<Item = S>) -> Self {
        self.analysis_components = components.into_iter().map(Into::into).collect();
        self
    }

    /// Check internal consistency: labels per segment and derivative ids
    /// within the variable count
    pub fn validate(&self) -> BridgeResult<()> {
        self.variables.validate()?;
        let total = self.variables.total();
        if let Some(&bad) = self.active_set.dvv().iter().find(|&&id| id == 0 || id > total) {
            return Err(BridgeError::dimension_mismatch("dvv id", total, bad));
        }
        Ok(())
    }
}

/// Response containers filled by an evaluation.
///
/// Only components the active set requested are written; everything else
/// keeps its previous value.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    /// One value per function
    pub function_values: RealVector,
    /// `num_functions x num_derivatives`
    pub gradients: RealMatrix,
    /// One `num_derivatives` square matrix per function
    pub hessians: RealSymMatrixArray,
}

impl Response {
    /// Zeroed response sized for `active_set`
    pub fn for_active_set(active_set: &ActiveSet) -> Self {
        let fns = active_set.num_functions();
        let derivs = active_set.num_derivatives();
        Self {
            function_values: vec![0.0; fns],
            gradients: RealMatrix::zeros(fns, derivs),
            hessians: vec![RealSymMatrix::zeros(derivs); fns],
        }
    }

    /// Number of functions
    pub fn num_functions(&self) -> usize {
        self.function_values.len()
    }

    /// Fail unless every buffer matches the shape `active_set` implies
    pub fn check_shape(&self, active_set: &ActiveSet) -> BridgeResult<()> {
        let fns = active_set.num_functions();
        let derivs = active_set.num_derivatives();
        if self.num_functions() != fns {
            return Err(BridgeError::dimension_mismatch("response functions", fns, self.num_functions()));
        }
        let (rows, cols) = self.gradients.shape();
        if rows != fns {
            return Err(BridgeError::dimension_mismatch("response gradient rows", fns, rows));
        }
        if cols != derivs {
            return Err(BridgeError::dimension_mismatch("response gradient columns", derivs, cols));
        }
        if self.hessians.len() != fns {
            return Err(BridgeError::dimension_mismatch("response hessians", fns, self.hessians.len()));
        }
        for (i, hessian) in self.hessians.iter().enumerate() {
            if hessian.dim() != derivs {
                return Err(BridgeError::dimension_mismatch(
                    format!("response hessians[{}]", i),
                    derivs,
                    hessian.dim(),
                ));
            }
        }
        Ok(())
    }
}
