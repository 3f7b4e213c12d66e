//! Foreign to Native Decoding
//!
//! The decoder accepts both representations without being told which one
//! it is looking at: objects exposing the dense-array protocol are read
//! through their strides, anything else must be a generic sequence.
//! Lengths are checked against what the caller expects and never padded
//! or truncated.

use crate::containers::{RealMatrix, RealSymMatrix, RealSymMatrixArray, RealVector, Triangle};
use crate::error::{BridgeError, BridgeResult};
use crate::runtime::{ForeignRuntime, ForeignShape};

/// Decoder bound to one runtime.
///
/// The context string names what is being decoded ("fns", "fnGrads[1]")
/// and ends up in dimension errors.
pub struct Decoder<'r, R: ForeignRuntime> {
    rt: &'r R,
    context: String,
}

impl<'r, R: ForeignRuntime> Decoder<'r, R> {
    /// Create a decoder
    pub fn new(rt: &'r R) -> Self {
        Self {
            rt,
            context: "value".to_string(),
        }
    }

    /// Same runtime, different context label
    pub fn at(&self, context: impl Into<String>) -> Self {
        Self {
            rt: self.rt,
            context: context.into(),
        }
    }

    /// Current context label
    pub fn context(&self) -> &str {
        &self.context
    }

    // ========================================================================
    // Vectors
    // ========================================================================

    /// Decode a flat vector of exactly `expected` reals.
    pub fn decode_vector(&self, obj: &R::Object, expected: usize) -> BridgeResult<RealVector> {
        let shape = self.rt.describe_shape(obj)?;
        let len = flat_len(&shape)?;
        if len != expected {
            return Err(BridgeError::dimension_mismatch(&self.context, expected, len));
        }
        self.read_flat(obj, &shape)
    }

    /// Decode a flat vector into caller-owned storage.
    ///
    /// `out.len()` is the expected length. On error `out` is left as it
    /// was.
    pub fn decode_into(&self, obj: &R::Object, out: &mut [f64]) -> BridgeResult<()> {
        let values = self.decode_vector(obj, out.len())?;
        out.copy_from_slice(&values);
        Ok(())
    }

    fn read_flat(&self, obj: &R::Object, shape: &ForeignShape) -> BridgeResult<RealVector> {
        match shape {
            ForeignShape::Dense { .. } => self.rt.dense_values(obj),
            ForeignShape::Sequence { len } => {
                let mut values = Vec::with_capacity(*len);
                for i in 0..*len {
                    let item = self.rt.item(obj, i)?;
                    values.push(self.scalar(&item)?);
                }
                Ok(values)
            }
            other => Err(BridgeError::type_mismatch("sequence or dense array", other.describe())),
        }
    }

    fn scalar(&self, obj: &R::Object) -> BridgeResult<f64> {
        match self.rt.describe_shape(obj)? {
            ForeignShape::Scalar => self.rt.to_f64(obj),
            other => Err(BridgeError::type_mismatch(
                format!("number in {}", self.context),
                other.describe(),
            )),
        }
    }

    // ========================================================================
    // Matrices
    // ========================================================================

    /// Decode a matrix of any shape.
    ///
    /// For a sequence of rows, every row length is checked before any
    /// element is read, so a jagged sequence produces no partial matrix.
    pub fn decode_matrix(&self, obj: &R::Object) -> BridgeResult<RealMatrix> {
        match self.rt.describe_shape(obj)? {
            ForeignShape::Dense { shape } => {
                if shape.len() != 2 {
                    return Err(BridgeError::type_mismatch(
                        format!("2-D array in {}", self.context),
                        format!("{}-D array", shape.len()),
                    ));
                }
                RealMatrix::from_row_major(shape[0], shape[1], self.rt.dense_values(obj)?)
            }
            ForeignShape::Sequence { len } => {
                let mut rows = Vec::with_capacity(len);
                let mut cols = None;
                for r in 0..len {
                    let row = self.rt.item(obj, r)?;
                    let shape = self.rt.describe_shape(&row)?;
                    let row_len = flat_len(&shape)?;
                    match cols {
                        None => cols = Some(row_len),
                        Some(expected) if expected != row_len => {
                            return Err(BridgeError::ShapeMismatch {
                                row: r,
                                expected,
                                actual: row_len,
                            });
                        }
                        Some(_) => {}
                    }
                    rows.push((row, shape));
                }

                let cols = cols.unwrap_or(0);
                let mut data = Vec::with_capacity(len * cols);
                for (row, shape) in &rows {
                    data.extend(self.read_flat(row, shape)?);
                }
                RealMatrix::from_row_major(len, cols, data)
            }
            other => Err(BridgeError::type_mismatch("sequence of rows or 2-D array", other.describe())),
        }
    }

    /// Decode a matrix that must be exactly `rows x cols`, one row at a
    /// time through [`decode_into`](Self::decode_into).
    pub fn decode_rows(&self, obj: &R::Object, rows: usize, cols: usize) -> BridgeResult<RealMatrix> {
        let mut matrix = RealMatrix::zeros(rows, cols);
        match self.rt.describe_shape(obj)? {
            ForeignShape::Dense { shape } => {
                if shape.len() != 2 {
                    return Err(BridgeError::type_mismatch(
                        format!("2-D array in {}", self.context),
                        format!("{}-D array", shape.len()),
                    ));
                }
                if shape[0] != rows {
                    return Err(BridgeError::dimension_mismatch(&self.context, rows, shape[0]));
                }
                if shape[1] != cols {
                    return Err(BridgeError::dimension_mismatch(
                        format!("{} columns", self.context),
                        cols,
                        shape[1],
                    ));
                }
                let values = self.rt.dense_values(obj)?;
                for r in 0..rows {
                    matrix.row_mut(r).copy_from_slice(&values[r * cols..(r + 1) * cols]);
                }
            }
            ForeignShape::Sequence { len } => {
                if len != rows {
                    return Err(BridgeError::dimension_mismatch(&self.context, rows, len));
                }
                for r in 0..rows {
                    let row = self.rt.item(obj, r)?;
                    self.at(format!("{}[{}]", self.context, r))
                        .decode_into(&row, matrix.row_mut(r))?;
                }
            }
            other => {
                return Err(BridgeError::type_mismatch("sequence of rows or 2-D array", other.describe()));
            }
        }
        Ok(matrix)
    }

    // ========================================================================
    // Symmetric matrices
    // ========================================================================

    /// Decode a full square matrix of order `dim` into a symmetric one,
    /// taking the `source` triangle.
    pub fn decode_sym_matrix(&self, obj: &R::Object, dim: usize, source: Triangle) -> BridgeResult<RealSymMatrix> {
        let full = self.decode_matrix(obj)?;
        if full.rows() != dim {
            return Err(BridgeError::dimension_mismatch(format!("{} rows", self.context), dim, full.rows()));
        }
        if full.cols() != dim {
            return Err(BridgeError::dimension_mismatch(
                format!("{} columns", self.context),
                dim,
                full.cols(),
            ));
        }
        RealSymMatrix::from_full(&full, source)
    }

    /// Decode `count` symmetric matrices of order `dim`: a sequence of
    /// matrices or one `(count, dim, dim)` array.
    pub fn decode_sym_matrix_array(
        &self,
        obj: &R::Object,
        count: usize,
        dim: usize,
        source: Triangle,
    ) -> BridgeResult<RealSymMatrixArray> {
        match self.rt.describe_shape(obj)? {
            ForeignShape::Dense { shape } => {
                if shape.len() != 3 {
                    return Err(BridgeError::type_mismatch(
                        format!("3-D array in {}", self.context),
                        format!("{}-D array", shape.len()),
                    ));
                }
                if shape[0] != count {
                    return Err(BridgeError::dimension_mismatch(&self.context, count, shape[0]));
                }
                if shape[1] != dim {
                    return Err(BridgeError::dimension_mismatch(format!("{} rows", self.context), dim, shape[1]));
                }
                if shape[2] != dim {
                    return Err(BridgeError::dimension_mismatch(
                        format!("{} columns", self.context),
                        dim,
                        shape[2],
                    ));
                }
                let values = self.rt.dense_values(obj)?;
                let block = dim * dim;
                if values.len() != count * block {
                    return Err(BridgeError::dimension_mismatch(&self.context, count * block, values.len()));
                }
                let mut out = Vec::with_capacity(count);
                for k in 0..count {
                    let full = RealMatrix::from_row_major(dim, dim, values[k * block..(k + 1) * block].to_vec())?;
                    out.push(RealSymMatrix::from_full(&full, source)?);
                }
                Ok(out)
            }
            ForeignShape::Sequence { len } => {
                if len != count {
                    return Err(BridgeError::dimension_mismatch(&self.context, count, len));
                }
                let mut out = Vec::with_capacity(count);
                for k in 0..count {
                    let item = self.rt.item(obj, k)?;
                    out.push(self.at(format!("{}[{}]", self.context, k)).decode_sym_matrix(&item, dim, source)?);
                }
                Ok(out)
            }
            other => Err(BridgeError::type_mismatch("sequence of matrices or 3-D array", other.describe())),
        }
    }
}

/// Element count of something decodable as a flat vector
fn flat_len(shape: &ForeignShape) -> BridgeResult<usize> {
    match shape {
        ForeignShape::Sequence { len } => Ok(*len),
        ForeignShape::Dense { shape } if shape.len() == 1 => Ok(shape[0]),
        ForeignShape::Dense { shape } => Err(BridgeError::type_mismatch(
            "1-D array",
            format!("{}-D array", shape.len()),
        )),
        other => Err(BridgeError::type_mismatch("sequence or dense array", other.describe())),
    }
}
