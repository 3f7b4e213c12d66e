//! Foreign Runtime Capability
//!
//! Everything the bridge needs from the dynamic runtime, and nothing
//! more. Encoders, decoders and the invoker are written against
//! [`ForeignRuntime`] only; a backend implements it once for the real
//! interpreter and the scripted runtime implements it for tests.
//!
//! ## Ownership
//!
//! `Object` is a scoped handle. Every method returning one hands the
//! caller a new reference; dropping the handle releases it. Arguments
//! are borrowed for the duration of the call.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::array::DenseBuffer;
use crate::error::BridgeResult;

/// How an object presents itself to the decoder
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForeignShape {
    /// Exposes the dense-array protocol
    Dense {
        /// Array shape
        shape: Vec<usize>,
    },
    /// Generic indexable sequence
    Sequence {
        /// Number of items
        len: usize,
    },
    /// Key/value mapping
    Mapping,
    /// Single number (including booleans)
    Scalar,
    /// Anything else
    Other {
        /// Foreign type name
        type_name: String,
    },
}

impl ForeignShape {
    /// Short description used in type mismatch errors
    pub fn describe(&self) -> String {
        match self {
            ForeignShape::Dense { shape } => format!("dense array of shape {:?}", shape),
            ForeignShape::Sequence { len } => format!("sequence of length {}", len),
            ForeignShape::Mapping => "mapping".to_string(),
            ForeignShape::Scalar => "scalar".to_string(),
            ForeignShape::Other { type_name } => type_name.clone(),
        }
    }
}

/// Numeric representation handed to the foreign callable.
///
/// Fixed when an interface is constructed; labels are always generic
/// sequences regardless of the mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepresentationMode {
    /// Sequences of individually boxed numbers
    #[default]
    Generic,
    /// Flat dense numeric arrays
    Dense,
}

impl RepresentationMode {
    /// Map the driver's `numpy` keyword onto a mode
    pub fn from_numpy_flag(numpy: bool) -> Self {
        if numpy {
            RepresentationMode::Dense
        } else {
            RepresentationMode::Generic
        }
    }

    /// Check for the dense fast path
    pub fn is_dense(&self) -> bool {
        matches!(self, RepresentationMode::Dense)
    }
}

impl fmt::Display for RepresentationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepresentationMode::Generic => write!(f, "generic"),
            RepresentationMode::Dense => write!(f, "dense"),
        }
    }
}

/// Module that bare callable names resolve against
pub const MAIN_MODULE: &str = "__main__";

/// Split `module:function`; a bare name belongs to the main module
pub fn split_callable_name(name: &str) -> (&str, &str) {
    match name.split_once(':') {
        Some((module, function)) => (module, function),
        None => (MAIN_MODULE, name),
    }
}

/// Capability interface to a dynamically typed runtime.
pub trait ForeignRuntime {
    /// Scoped handle to a foreign object
    type Object;

    /// Run `f` inside whatever scope the backend needs for a batch of
    /// calls (e.g. holding its interpreter lock). Defaults to running `f`.
    fn scoped<T, F>(&self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        f()
    }

    /// Runtime name for logs
    fn name(&self) -> &str;

    /// The runtime's null object
    fn none(&self) -> BridgeResult<Self::Object>;

    /// Box a real
    fn float(&self, value: f64) -> BridgeResult<Self::Object>;

    /// Box an integer
    fn int(&self, value: i64) -> BridgeResult<Self::Object>;

    /// Box a boolean
    fn boolean(&self, value: bool) -> BridgeResult<Self::Object>;

    /// Box a string
    fn string(&self, value: &str) -> BridgeResult<Self::Object>;

    /// Build a generic sequence, taking ownership of `items`
    fn sequence(&self, items: Vec<Self::Object>) -> BridgeResult<Self::Object>;

    /// Build a dense array from a row-major buffer
    fn dense(&self, buffer: DenseBuffer, shape: &[usize]) -> BridgeResult<Self::Object>;

    /// Build a string-keyed mapping, taking ownership of the values
    fn mapping(&self, entries: Vec<(&str, Self::Object)>) -> BridgeResult<Self::Object>;

    /// Look a callable up by name
    fn resolve_callable(&self, name: &str) -> BridgeResult<Self::Object>;

    /// Call `callable` with `kwargs` as keyword arguments.
    ///
    /// Blocks until the callable returns or raises; there is no
    /// cancellation.
    fn invoke(&self, callable: &Self::Object, kwargs: &Self::Object) -> BridgeResult<Self::Object>;

    /// Inspect an object's runtime type
    fn describe_shape(&self, obj: &Self::Object) -> BridgeResult<ForeignShape>;

    /// Item `index` of a generic sequence
    fn item(&self, obj: &Self::Object, index: usize) -> BridgeResult<Self::Object>;

    /// Value for `key` in a mapping, `None` when absent
    fn lookup(&self, obj: &Self::Object, key: &str) -> BridgeResult<Option<Self::Object>>;

    /// Read a number
    fn to_f64(&self, obj: &Self::Object) -> BridgeResult<f64>;

    /// All elements of a dense array in logical row-major order
    fn dense_values(&self, obj: &Self::Object) -> BridgeResult<Vec<f64>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_from_flag() {
        assert_eq!(RepresentationMode::from_numpy_flag(true), RepresentationMode::Dense);
        assert_eq!(RepresentationMode::from_numpy_flag(false), RepresentationMode::Generic);
        assert!(RepresentationMode::Dense.is_dense());
        assert_eq!(RepresentationMode::default().to_string(), "generic");
    }

    #[test]
    fn test_split_callable_name() {
        assert_eq!(split_callable_name("model:run"), ("model", "run"));
        assert_eq!(split_callable_name("run"), ("__main__", "run"));
    }

    #[test]
    fn test_shape_describe() {
        assert_eq!(
            ForeignShape::Dense { shape: vec![2, 3] }.describe(),
            "dense array of shape [2, 3]"
        );
        assert_eq!(ForeignShape::Sequence { len: 4 }.describe(), "sequence of length 4");
        assert_eq!(
            ForeignShape::Other {
                type_name: "str".to_string()
            }
            .describe(),
            "str"
        );
    }
}
