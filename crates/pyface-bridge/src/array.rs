//! Dense Numeric Arrays
//!
//! The dense-array side of the representation switch: a flat typed
//! buffer plus a strided layout, the same shape/strides/dtype triple a
//! NumPy array exposes through its array interface.
//!
//! ## Memory Layout
//!
//! Arrays built by the encoders are C-contiguous (row-major). Arrays
//! returned by a foreign callable may be in any order, so the decoder
//! always reads through [`ArrayLayout::flat_index`] rather than assuming
//! contiguity.

use std::fmt;

use crate::error::{BridgeError, BridgeResult};

// ============================================================================
// DType
// ============================================================================

/// Element types a dense buffer can hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 64-bit signed integer (numpy.int64)
    Int64,
    /// 64-bit floating point (numpy.float64)
    Float64,
}

impl DType {
    /// Size in bytes of one element
    pub fn size(&self) -> usize {
        8
    }

    /// NumPy dtype name
    pub fn name(&self) -> &'static str {
        match self {
            DType::Int64 => "int64",
            DType::Float64 => "float64",
        }
    }

    /// Parse a NumPy dtype name or type character
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "int64" | "i8" | "l" | "int" => Some(DType::Int64),
            "float64" | "f8" | "d" | "float" => Some(DType::Float64),
            _ => None,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// DenseBuffer
// ============================================================================

/// Flat typed element storage, in the order the layout describes
#[derive(Debug, Clone, PartialEq)]
pub enum DenseBuffer {
    /// Real elements
    Real(Vec<f64>),
    /// Integer elements
    Int(Vec<i64>),
}

impl DenseBuffer {
    /// Element type
    pub fn dtype(&self) -> DType {
        match self {
            DenseBuffer::Real(_) => DType::Float64,
            DenseBuffer::Int(_) => DType::Int64,
        }
    }

    /// Number of elements
    pub fn len(&self) -> usize {
        match self {
            DenseBuffer::Real(v) => v.len(),
            DenseBuffer::Int(v) => v.len(),
        }
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Elements as native-endian bytes, for zero-parse array construction
    pub fn to_ne_bytes(&self) -> Vec<u8> {
        match self {
            DenseBuffer::Real(v) => v.iter().flat_map(|x| x.to_ne_bytes()).collect(),
            DenseBuffer::Int(v) => v.iter().flat_map(|x| x.to_ne_bytes()).collect(),
        }
    }

    /// Element at flat `index`, widened to a real
    pub fn get_f64(&self, index: usize) -> Option<f64> {
        match self {
            DenseBuffer::Real(v) => v.get(index).copied(),
            DenseBuffer::Int(v) => v.get(index).map(|&x| x as f64),
        }
    }

    fn gather(&self, indices: &[usize]) -> Self {
        match self {
            DenseBuffer::Real(v) => DenseBuffer::Real(indices.iter().map(|&i| v[i]).collect()),
            DenseBuffer::Int(v) => DenseBuffer::Int(indices.iter().map(|&i| v[i]).collect()),
        }
    }
}

// ============================================================================
// ArrayLayout
// ============================================================================

/// Memory layout order for multi-dimensional arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArrayOrder {
    /// C-contiguous (row-major): last dimension varies fastest
    C,
    /// Fortran-contiguous (column-major): first dimension varies fastest
    Fortran,
}

/// Shape, byte strides and element type of a dense array.
#[derive(Debug, Clone, PartialEq)]
pub struct ArrayLayout {
    /// Shape of the array (dimensions)
    pub shape: Vec<usize>,
    /// Strides in bytes for each dimension
    pub strides: Vec<isize>,
    /// Data type
    pub dtype: DType,
    /// Memory order
    pub order: ArrayOrder,
}

impl ArrayLayout {
    /// Create a new C-contiguous layout for the given shape and dtype
    pub fn c_contiguous(shape: Vec<usize>, dtype: DType) -> Self {
        let mut strides = Vec::with_capacity(shape.len());
        let mut stride = dtype.size() as isize;

        for &dim in shape.iter().rev() {
            strides.push(stride);
            stride *= dim as isize;
        }
        strides.reverse();

        Self {
            shape,
            strides,
            dtype,
            order: ArrayOrder::C,
        }
    }

    /// Create a new Fortran-contiguous layout for the given shape and dtype
    pub fn fortran_contiguous(shape: Vec<usize>, dtype: DType) -> Self {
        let mut strides = Vec::with_capacity(shape.len());
        let mut stride = dtype.size() as isize;

        for &dim in shape.iter() {
            strides.push(stride);
            stride *= dim as isize;
        }

        Self {
            shape,
            strides,
            dtype,
            order: ArrayOrder::Fortran,
        }
    }

    /// Get the number of dimensions
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Get the total number of elements
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Calculate the flat buffer index from multi-dimensional indices
    pub fn flat_index(&self, indices: &[usize]) -> Option<usize> {
        if indices.len() != self.shape.len() {
            return None;
        }

        for (idx, dim) in indices.iter().zip(self.shape.iter()) {
            if *idx >= *dim {
                return None;
            }
        }

        let byte_offset: isize = indices
            .iter()
            .zip(self.strides.iter())
            .map(|(&idx, &stride)| (idx as isize) * stride)
            .sum();

        Some(byte_offset as usize / self.dtype.size())
    }

    /// Transpose the array (reverse dimensions and strides)
    pub fn transpose(&self) -> Self {
        let mut shape = self.shape.clone();
        let mut strides = self.strides.clone();
        shape.reverse();
        strides.reverse();

        let order = match self.order {
            ArrayOrder::C => ArrayOrder::Fortran,
            ArrayOrder::Fortran => ArrayOrder::C,
        };

        Self {
            shape,
            strides,
            dtype: self.dtype,
            order,
        }
    }
}

/// Odometer over every multi-index of `shape` in row-major order
fn row_major_indices(shape: &[usize]) -> impl Iterator<Item = Vec<usize>> + '_ {
    let total: usize = shape.iter().product();
    let mut current = vec![0usize; shape.len()];
    (0..total).map(move |step| {
        if step > 0 {
            for axis in (0..shape.len()).rev() {
                current[axis] += 1;
                if current[axis] < shape[axis] {
                    break;
                }
                current[axis] = 0;
            }
        }
        current.clone()
    })
}

// ============================================================================
// DenseArray
// ============================================================================

/// A dense n-dimensional array: typed buffer plus layout.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseArray {
    layout: ArrayLayout,
    buffer: DenseBuffer,
}

impl DenseArray {
    /// Wrap a row-major buffer; the element count must match the shape
    pub fn from_buffer(buffer: DenseBuffer, shape: Vec<usize>) -> BridgeResult<Self> {
        let layout = ArrayLayout::c_contiguous(shape, buffer.dtype());
        if buffer.len() != layout.size() {
            return Err(BridgeError::dimension_mismatch(
                format!("dense buffer for shape {:?}", layout.shape),
                layout.size(),
                buffer.len(),
            ));
        }
        Ok(Self { layout, buffer })
    }

    /// Same logical array re-laid out in column-major order
    pub fn to_fortran(&self) -> Self {
        let layout = ArrayLayout::fortran_contiguous(self.layout.shape.clone(), self.layout.dtype);
        // Position `p` of the new buffer holds the element whose Fortran
        // offset is `p`; walk the logical indices in Fortran order.
        let c_layout = ArrayLayout::c_contiguous(self.layout.shape.clone(), self.layout.dtype);
        let transposed = c_layout.transpose();
        let mut reversed_shape = self.layout.shape.clone();
        reversed_shape.reverse();
        let gather: Vec<usize> = row_major_indices(&reversed_shape)
            .filter_map(|idx| transposed.flat_index(&idx))
            .collect();
        Self {
            layout,
            buffer: self.buffer.gather(&gather),
        }
    }

    /// Layout
    pub fn layout(&self) -> &ArrayLayout {
        &self.layout
    }

    /// Shape
    pub fn shape(&self) -> &[usize] {
        &self.layout.shape
    }

    /// Number of dimensions
    pub fn ndim(&self) -> usize {
        self.layout.ndim()
    }

    /// Total number of elements
    pub fn size(&self) -> usize {
        self.layout.size()
    }

    /// Element type
    pub fn dtype(&self) -> DType {
        self.layout.dtype
    }

    /// Element at a multi-index, widened to a real
    pub fn get(&self, indices: &[usize]) -> Option<f64> {
        self.layout
            .flat_index(indices)
            .and_then(|flat| self.buffer.get_f64(flat))
    }

    /// All elements in logical row-major order, read through the strides
    pub fn to_row_major_f64(&self) -> Vec<f64> {
        row_major_indices(&self.layout.shape)
            .filter_map(|idx| self.get(&idx))
            .collect()
    }
}

impl fmt::Display for DenseArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<ndarray shape={:?} dtype={}>", self.layout.shape, self.layout.dtype)
    }
}
