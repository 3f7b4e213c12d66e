//! Native to Foreign Encoding
//!
//! Every encoder branches on the [`RepresentationMode`] once and hands off
//! to a generic-sequence or dense-array helper. Labels ignore the mode and
//! are always sequences of strings.
//!
//! Partially built objects are owned by local vectors, so an allocation
//! failure part way through releases everything built so far before the
//! error propagates.

use smol_str::SmolStr;

use crate::array::DenseBuffer;
use crate::containers::{ElementSource, IntoScalar, RealMatrix, RealSymMatrix, Scalar, Variables};
use crate::error::{BridgeError, BridgeResult};
use crate::runtime::{ForeignRuntime, RepresentationMode};

/// Encoder bound to one runtime and one representation
pub struct Encoder<'r, R: ForeignRuntime> {
    rt: &'r R,
    mode: RepresentationMode,
}

impl<'r, R: ForeignRuntime> Encoder<'r, R> {
    /// Create an encoder
    pub fn new(rt: &'r R, mode: RepresentationMode) -> Self {
        Self { rt, mode }
    }

    /// Representation this encoder produces
    pub fn mode(&self) -> RepresentationMode {
        self.mode
    }

    // ========================================================================
    // Vectors
    // ========================================================================

    /// Encode a real vector, preserving element order.
    pub fn encode_vector<S>(&self, values: &S) -> BridgeResult<R::Object>
    where
        S: ElementSource + ?Sized,
    {
        match self.mode {
            RepresentationMode::Dense => {
                let data = (0..values.len())
                    .map(|i| values.value_at(i).into_scalar().as_f64())
                    .collect();
                self.rt.dense(DenseBuffer::Real(data), &[values.len()])
            }
            RepresentationMode::Generic => {
                let mut items = Vec::with_capacity(values.len());
                for i in 0..values.len() {
                    items.push(self.rt.float(values.value_at(i).into_scalar().as_f64())?);
                }
                self.rt.sequence(items)
            }
        }
    }

    /// Encode an integer or boolean vector.
    ///
    /// Generic mode boxes each element with its own kind; dense mode builds
    /// an `int64` array.
    pub fn encode_int_array<S>(&self, values: &S) -> BridgeResult<R::Object>
    where
        S: ElementSource + ?Sized,
    {
        match self.mode {
            RepresentationMode::Dense => {
                let data = (0..values.len())
                    .map(|i| values.value_at(i).into_scalar().as_i64())
                    .collect();
                self.rt.dense(DenseBuffer::Int(data), &[values.len()])
            }
            RepresentationMode::Generic => {
                let mut items = Vec::with_capacity(values.len());
                for i in 0..values.len() {
                    items.push(self.boxed(values.value_at(i).into_scalar())?);
                }
                self.rt.sequence(items)
            }
        }
    }

    /// Concatenate continuous, discrete integer and discrete real segments,
    /// in that order, into one vector.
    pub fn encode_mixed<C, I, D>(&self, continuous: &C, discrete_int: &I, discrete_real: &D) -> BridgeResult<R::Object>
    where
        C: ElementSource + ?Sized,
        I: ElementSource + ?Sized,
        D: ElementSource + ?Sized,
    {
        let total = continuous.len() + discrete_int.len() + discrete_real.len();
        match self.mode {
            RepresentationMode::Dense => {
                let mut data = Vec::with_capacity(total);
                extend_f64(&mut data, continuous);
                extend_f64(&mut data, discrete_int);
                extend_f64(&mut data, discrete_real);
                self.rt.dense(DenseBuffer::Real(data), &[total])
            }
            RepresentationMode::Generic => {
                let mut items = Vec::with_capacity(total);
                for i in 0..continuous.len() {
                    items.push(self.rt.float(continuous.value_at(i).into_scalar().as_f64())?);
                }
                for i in 0..discrete_int.len() {
                    items.push(self.rt.int(discrete_int.value_at(i).into_scalar().as_i64())?);
                }
                for i in 0..discrete_real.len() {
                    items.push(self.rt.float(discrete_real.value_at(i).into_scalar().as_f64())?);
                }
                self.rt.sequence(items)
            }
        }
    }

    /// Encode all segments of `vars` in mixed order
    pub fn encode_variables(&self, vars: &Variables) -> BridgeResult<R::Object> {
        self.encode_mixed(&vars.continuous, &vars.discrete_int, &vars.discrete_real)
    }

    fn boxed(&self, scalar: Scalar) -> BridgeResult<R::Object> {
        match scalar {
            Scalar::Real(v) => self.rt.float(v),
            Scalar::Int(v) => self.rt.int(v),
            Scalar::Bool(v) => self.rt.boolean(v),
        }
    }

    // ========================================================================
    // Matrices and tensors
    // ========================================================================

    /// Encode a matrix: a `(rows, cols)` array or a sequence of row
    /// sequences.
    pub fn encode_matrix(&self, matrix: &RealMatrix) -> BridgeResult<R::Object> {
        match self.mode {
            RepresentationMode::Dense => self
                .rt
                .dense(DenseBuffer::Real(matrix.as_slice().to_vec()), &[matrix.rows(), matrix.cols()]),
            RepresentationMode::Generic => self.generic_rows(matrix),
        }
    }

    /// Encode a symmetric matrix as a full square matrix with both
    /// triangles populated.
    pub fn encode_symmetric(&self, matrix: &RealSymMatrix) -> BridgeResult<R::Object> {
        self.encode_matrix(&matrix.to_full())
    }

    /// Encode one symmetric matrix per response function.
    ///
    /// Dense mode needs every matrix to have the same order, since the
    /// result is a single `(n, d, d)` array.
    pub fn encode_tensor(&self, matrices: &[RealSymMatrix]) -> BridgeResult<R::Object> {
        match self.mode {
            RepresentationMode::Dense => {
                let dim = matrices.first().map_or(0, RealSymMatrix::dim);
                let mut data = Vec::with_capacity(matrices.len() * dim * dim);
                for (k, m) in matrices.iter().enumerate() {
                    if m.dim() != dim {
                        return Err(BridgeError::dimension_mismatch(
                            format!("hessian[{}] order", k),
                            dim,
                            m.dim(),
                        ));
                    }
                    data.extend_from_slice(m.to_full().as_slice());
                }
                self.rt
                    .dense(DenseBuffer::Real(data), &[matrices.len(), dim, dim])
            }
            RepresentationMode::Generic => {
                let mut items = Vec::with_capacity(matrices.len());
                for m in matrices {
                    items.push(self.generic_rows(&m.to_full())?);
                }
                self.rt.sequence(items)
            }
        }
    }

    fn generic_rows(&self, matrix: &RealMatrix) -> BridgeResult<R::Object> {
        let mut rows = Vec::with_capacity(matrix.rows());
        for r in 0..matrix.rows() {
            let mut items = Vec::with_capacity(matrix.cols());
            for &v in matrix.row(r) {
                items.push(self.rt.float(v)?);
            }
            rows.push(self.rt.sequence(items)?);
        }
        self.rt.sequence(rows)
    }

    // ========================================================================
    // Labels
    // ========================================================================

    /// Encode labels as a sequence of strings
    pub fn encode_labels(&self, labels: &[SmolStr]) -> BridgeResult<R::Object> {
        self.encode_label_groups(&[labels])
    }

    /// Concatenate label groups, in the given order, into one sequence of
    /// strings.
    pub fn encode_label_groups(&self, groups: &[&[SmolStr]]) -> BridgeResult<R::Object> {
        let total = groups.iter().map(|g| g.len()).sum();
        let mut items = Vec::with_capacity(total);
        for label in groups.iter().flat_map(|g| g.iter()) {
            items.push(self.rt.string(label)?);
        }
        self.rt.sequence(items)
    }

    /// All labels of `vars` in mixed order
    pub fn encode_variable_labels(&self, vars: &Variables) -> BridgeResult<R::Object> {
        self.encode_label_groups(&[
            &vars.continuous_labels,
            &vars.discrete_int_labels,
            &vars.discrete_real_labels,
        ])
    }
}

fn extend_f64<S: ElementSource + ?Sized>(out: &mut Vec<f64>, source: &S) {
    out.extend((0..source.len()).map(|i| source.value_at(i).into_scalar().as_f64()));
}
