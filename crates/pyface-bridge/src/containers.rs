//! Native Numeric Containers
//!
//! Strongly typed containers the driver hands to, and receives from, the
//! bridge. Matrices are row-major. Symmetric matrices store their lower
//! triangle packed row by row, so there is no off-triangle storage that
//! could leak uninitialised values.

use std::fmt;

use smol_str::SmolStr;

use crate::error::{BridgeError, BridgeResult};

/// Ordered sequence of reals
pub type RealVector = Vec<f64>;

/// Ordered sequence of integers
pub type IntVector = Vec<i64>;

/// Ordered sequence of labels
pub type StringArray = Vec<SmolStr>;

// ============================================================================
// Element access capability
// ============================================================================

/// Scalar element kinds the encoders know how to box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scalar {
    /// Real value
    Real(f64),
    /// Integer value
    Int(i64),
    /// Boolean-like value
    Bool(bool),
}

impl Scalar {
    /// Widen to a real, the representation used by dense real buffers
    pub fn as_f64(self) -> f64 {
        match self {
            Scalar::Real(v) => v,
            Scalar::Int(v) => v as f64,
            Scalar::Bool(v) => {
                if v {
                    1.0
                } else {
                    0.0
                }
            }
        }
    }

    /// Narrow to an integer; reals are truncated toward zero
    pub fn as_i64(self) -> i64 {
        match self {
            Scalar::Real(v) => v as i64,
            Scalar::Int(v) => v,
            Scalar::Bool(v) => i64::from(v),
        }
    }
}

/// Conversion of one native element into a [`Scalar`].
pub trait IntoScalar: Copy {
    /// Convert this element
    fn into_scalar(self) -> Scalar;
}

impl IntoScalar for f64 {
    fn into_scalar(self) -> Scalar {
        Scalar::Real(self)
    }
}

impl IntoScalar for f32 {
    fn into_scalar(self) -> Scalar {
        Scalar::Real(f64::from(self))
    }
}

impl IntoScalar for i64 {
    fn into_scalar(self) -> Scalar {
        Scalar::Int(self)
    }
}

impl IntoScalar for i32 {
    fn into_scalar(self) -> Scalar {
        Scalar::Int(i64::from(self))
    }
}

impl IntoScalar for i16 {
    fn into_scalar(self) -> Scalar {
        Scalar::Int(i64::from(self))
    }
}

impl IntoScalar for u32 {
    fn into_scalar(self) -> Scalar {
        Scalar::Int(i64::from(self))
    }
}

impl IntoScalar for u8 {
    fn into_scalar(self) -> Scalar {
        Scalar::Int(i64::from(self))
    }
}

impl IntoScalar for usize {
    fn into_scalar(self) -> Scalar {
        // Container sizes and variable ids never approach i64::MAX
        Scalar::Int(self as i64)
    }
}

impl IntoScalar for bool {
    fn into_scalar(self) -> Scalar {
        Scalar::Bool(self)
    }
}

/// Index-based read access to a native sequence.
///
/// Any sequence-like native type implements this once and every encoder
/// accepts it, whatever its element type or length.
pub trait ElementSource {
    /// Element type
    type Elem: IntoScalar;

    /// Number of elements
    fn len(&self) -> usize;

    /// Element at `index`; callers stay within `0..len()`
    fn value_at(&self, index: usize) -> Self::Elem;

    /// Check if the sequence is empty
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: IntoScalar> ElementSource for [T] {
    type Elem = T;

    fn len(&self) -> usize {
        <[T]>::len(self)
    }

    fn value_at(&self, index: usize) -> T {
        self[index]
    }
}

impl<T: IntoScalar> ElementSource for Vec<T> {
    type Elem = T;

    fn len(&self) -> usize {
        Vec::len(self)
    }

    fn value_at(&self, index: usize) -> T {
        self[index]
    }
}

impl<T: IntoScalar, const N: usize> ElementSource for [T; N] {
    type Elem = T;

    fn len(&self) -> usize {
        N
    }

    fn value_at(&self, index: usize) -> T {
        self[index]
    }
}

impl<S: ElementSource + ?Sized> ElementSource for &S {
    type Elem = S::Elem;

    fn len(&self) -> usize {
        (**self).len()
    }

    fn value_at(&self, index: usize) -> Self::Elem {
        (**self).value_at(index)
    }
}

// ============================================================================
// RealMatrix
// ============================================================================

/// Dense row-major matrix of reals
#[derive(Debug, Clone, PartialEq)]
pub struct RealMatrix {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl RealMatrix {
    /// Zero matrix of the given shape
    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            rows,
            cols,
            data: vec![0.0; rows * cols],
        }
    }

    /// Build from row-major data
    pub fn from_row_major(rows: usize, cols: usize, data: Vec<f64>) -> BridgeResult<Self> {
        if data.len() != rows * cols {
            return Err(BridgeError::dimension_mismatch(
                "matrix data",
                rows * cols,
                data.len(),
            ));
        }
        Ok(Self { rows, cols, data })
    }

    /// Build from rows; every row must have the same length
    pub fn from_rows(rows: &[Vec<f64>]) -> BridgeResult<Self> {
        let cols = rows.first().map_or(0, Vec::len);
        let mut data = Vec::with_capacity(rows.len() * cols);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != cols {
                return Err(BridgeError::ShapeMismatch {
                    row: i,
                    expected: cols,
                    actual: row.len(),
                });
            }
            data.extend_from_slice(row);
        }
        Ok(Self {
            rows: rows.len(),
            cols,
            data,
        })
    }

    /// Number of rows
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Shape as `(rows, cols)`
    pub fn shape(&self) -> (usize, usize) {
        (self.rows, self.cols)
    }

    /// Element at `(row, col)`
    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        if row < self.rows && col < self.cols {
            Some(self.data[row * self.cols + col])
        } else {
            None
        }
    }

    /// Set the element at `(row, col)`
    pub fn set(&mut self, row: usize, col: usize, value: f64) -> BridgeResult<()> {
        if row >= self.rows || col >= self.cols {
            return Err(BridgeError::dimension_mismatch(
                "matrix index",
                self.rows * self.cols,
                row * self.cols + col,
            ));
        }
        self.data[row * self.cols + col] = value;
        Ok(())
    }

    /// Borrow one row
    pub fn row(&self, row: usize) -> &[f64] {
        &self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Mutably borrow one row
    pub fn row_mut(&mut self, row: usize) -> &mut [f64] {
        &mut self.data[row * self.cols..(row + 1) * self.cols]
    }

    /// Row-major element slice
    pub fn as_slice(&self) -> &[f64] {
        &self.data
    }

    /// Copy out as nested rows
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        (0..self.rows).map(|r| self.row(r).to_vec()).collect()
    }

    /// Check exact symmetry (square and `m[i][j] == m[j][i]`)
    pub fn is_symmetric(&self) -> bool {
        self.rows == self.cols
            && (0..self.rows).all(|i| (0..i).all(|j| self.data[i * self.cols + j] == self.data[j * self.cols + i]))
    }
}

impl fmt::Display for RealMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for r in 0..self.rows {
            if r > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{:?}", self.row(r))?;
        }
        write!(f, "]")
    }
}

// ============================================================================
// RealSymMatrix
// ============================================================================

/// Which triangle of a full matrix is authoritative when it is folded
/// into a symmetric one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Triangle {
    /// Entries with `row >= col`
    #[default]
    Lower,
    /// Entries with `row <= col`
    Upper,
}

/// Symmetric matrix storing the packed lower triangle, row by row
#[derive(Debug, Clone, PartialEq)]
pub struct RealSymMatrix {
    dim: usize,
    packed: Vec<f64>,
}

impl RealSymMatrix {
    /// Zero matrix of order `dim`
    pub fn zeros(dim: usize) -> Self {
        Self {
            dim,
            packed: vec![0.0; dim * (dim + 1) / 2],
        }
    }

    /// Build from a full matrix, taking the `source` triangle
    pub fn from_full(full: &RealMatrix, source: Triangle) -> BridgeResult<Self> {
        if full.rows() != full.cols() {
            return Err(BridgeError::dimension_mismatch(
                "symmetric matrix columns",
                full.rows(),
                full.cols(),
            ));
        }
        let mut sym = Self::zeros(full.rows());
        for i in 0..full.rows() {
            for j in 0..=i {
                let (r, c) = match source {
                    Triangle::Lower => (i, j),
                    Triangle::Upper => (j, i),
                };
                sym.packed[Self::packed_index(i, j)] = full.row(r)[c];
            }
        }
        Ok(sym)
    }

    fn packed_index(i: usize, j: usize) -> usize {
        let (hi, lo) = if i >= j { (i, j) } else { (j, i) };
        hi * (hi + 1) / 2 + lo
    }

    /// Order of the matrix
    pub fn dim(&self) -> usize {
        self.dim
    }

    /// Element at `(i, j)`; `(j, i)` reads the same storage
    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        if i < self.dim && j < self.dim {
            Some(self.packed[Self::packed_index(i, j)])
        } else {
            None
        }
    }

    /// Set `(i, j)` and, implicitly, `(j, i)`
    pub fn set(&mut self, i: usize, j: usize, value: f64) -> BridgeResult<()> {
        if i >= self.dim || j >= self.dim {
            return Err(BridgeError::dimension_mismatch(
                "symmetric matrix index",
                self.dim,
                i.max(j),
            ));
        }
        self.packed[Self::packed_index(i, j)] = value;
        Ok(())
    }

    /// Expand to a full row-major matrix with both triangles populated
    pub fn to_full(&self) -> RealMatrix {
        let mut data = Vec::with_capacity(self.dim * self.dim);
        for i in 0..self.dim {
            for j in 0..self.dim {
                data.push(self.packed[Self::packed_index(i, j)]);
            }
        }
        RealMatrix {
            rows: self.dim,
            cols: self.dim,
            data,
        }
    }
}

/// Ordered sequence of symmetric matrices, one per response function
pub type RealSymMatrixArray = Vec<RealSymMatrix>;

// ============================================================================
// Variables
// ============================================================================

/// Mixed continuous/discrete variable vector with its labels.
///
/// Segment order is a fixed contract with the foreign callable:
/// continuous, then discrete integer, then discrete real.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Variables {
    /// Continuous values
    pub continuous: RealVector,
    /// Discrete integer values
    pub discrete_int: IntVector,
    /// Discrete real values
    pub discrete_real: RealVector,
    /// Continuous labels
    pub continuous_labels: StringArray,
    /// Discrete integer labels
    pub discrete_int_labels: StringArray,
    /// Discrete real labels
    pub discrete_real_labels: StringArray,
}

impl Variables {
    /// Continuous-only variables with labels
    pub fn continuous<L: Into<SmolStr>>(
        values: impl Into<RealVector>,
        labels: impl IntoIterator<Item = L>,
    ) -> Self {
        Self {
            continuous: values.into(),
            continuous_labels: labels.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    /// Set the discrete integer segment
    pub fn with_discrete_int<L: Into<SmolStr>>(
        mut self,
        values: impl Into<IntVector>,
        labels: impl IntoIterator<Item = L>,
    ) -> Self {
        self.discrete_int = values.into();
        self.discrete_int_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Set the discrete real segment
    pub fn with_discrete_real<L: Into<SmolStr>>(
        mut self,
        values: impl Into<RealVector>,
        labels: impl IntoIterator<Item = L>,
    ) -> Self {
        self.discrete_real = values.into();
        self.discrete_real_labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Total number of variables across all segments
    pub fn total(&self) -> usize {
        self.continuous.len() + self.discrete_int.len() + self.discrete_real.len()
    }

    /// Check that every segment has one label per value
    pub fn validate(&self) -> BridgeResult<()> {
        let segments = [
            ("continuous labels", self.continuous.len(), self.continuous_labels.len()),
            ("discrete integer labels", self.discrete_int.len(), self.discrete_int_labels.len()),
            ("discrete real labels", self.discrete_real.len(), self.discrete_real_labels.len()),
        ];
        for (context, values, labels) in segments {
            if values != labels {
                return Err(BridgeError::dimension_mismatch(context, values, labels));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_matrix_from_rows() {
        let m = RealMatrix::from_rows(&[vec![1.0, 2.0, 3.0], vec![4.0, 5.0, 6.0]]).unwrap();
        assert_eq!(m.shape(), (2, 3));
        assert_eq!(m.row(1), &[4.0, 5.0, 6.0]);
        assert_eq!(m.get(0, 2), Some(3.0));
        assert_eq!(m.get(2, 0), None);
    }

    #[test]
    fn test_matrix_from_jagged_rows() {
        let err = RealMatrix::from_rows(&[vec![1.0, 2.0], vec![3.0]]).unwrap_err();
        assert_eq!(
            err,
            BridgeError::ShapeMismatch {
                row: 1,
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_sym_matrix_mirrors() {
        let mut s = RealSymMatrix::zeros(3);
        s.set(2, 0, 7.0).unwrap();
        s.set(1, 1, 2.0).unwrap();
        assert_eq!(s.get(0, 2), Some(7.0));

        let full = s.to_full();
        assert!(full.is_symmetric());
        assert_eq!(full.row(0), &[0.0, 0.0, 7.0]);
        assert_eq!(full.row(2), &[7.0, 0.0, 0.0]);
    }

    #[test]
    fn test_sym_from_full_triangle() {
        let full = RealMatrix::from_rows(&[vec![1.0, 9.0], vec![2.0, 3.0]]).unwrap();

        let lower = RealSymMatrix::from_full(&full, Triangle::Lower).unwrap();
        assert_eq!(lower.get(0, 1), Some(2.0));

        let upper = RealSymMatrix::from_full(&full, Triangle::Upper).unwrap();
        assert_eq!(upper.get(1, 0), Some(9.0));
        assert_eq!(upper.get(1, 1), Some(3.0));
    }

    #[test]
    fn test_element_source_generic() {
        fn total<S: ElementSource + ?Sized>(s: &S) -> f64 {
            (0..s.len()).map(|i| s.value_at(i).into_scalar().as_f64()).sum()
        }
        assert_eq!(total(&[1i32, 2, 3]), 6.0);
        assert_eq!(total(&vec![true, false, true]), 2.0);
        assert_eq!(total(&[0.5f64, 0.25][..]), 0.75);
    }

    #[test]
    fn test_variables_validate() {
        let vars = Variables::continuous(vec![1.0, 2.0], ["x1", "x2"])
            .with_discrete_int(vec![3], ["d1"]);
        assert_eq!(vars.total(), 3);
        assert!(vars.validate().is_ok());

        let bad = Variables::continuous(vec![1.0], ["x1", "x2"]);
        assert!(bad.validate().unwrap_err().is_dimension_error());
    }
}
