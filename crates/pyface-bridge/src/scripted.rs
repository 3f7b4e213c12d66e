//! Scripted Runtime
//!
//! An in-process dynamically typed object model implementing
//! [`ForeignRuntime`]. Callables are Rust closures registered under
//! `module:function` names, which makes it the test double for the
//! bridge and a host for native analysis functions.
//!
//! ## Type Hierarchy
//!
//! - `Value`: none, bool, int, float, str, list, tuple, dict, dense
//!   array, callable
//! - `Object`: reference-counted handle to a `Value`
//!
//! The runtime counts live objects, so a test can assert that an
//! evaluation released everything it built, and can be told to fail
//! allocations after a number of successes.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use smol_str::SmolStr;

use crate::array::{DenseArray, DenseBuffer};
use crate::error::{BridgeError, BridgeResult};
use crate::runtime::{split_callable_name, ForeignRuntime, ForeignShape};

/// Signature of a scripted callable: runtime plus keyword mapping in,
/// result object or raised error out.
pub type ScriptedFn =
    Arc<dyn Fn(&ScriptedRuntime, &Object) -> Result<Object, ScriptError> + Send + Sync>;

// ============================================================================
// ScriptError
// ============================================================================

/// Error raised by a scripted callable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptError {
    /// Exception type name
    pub exception_type: String,
    /// Exception message
    pub message: String,
}

impl ScriptError {
    /// Create an error of the given type
    pub fn new(exception_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            exception_type: exception_type.into(),
            message: message.into(),
        }
    }

    /// `KeyError` for a missing keyword
    pub fn key_error(key: &str) -> Self {
        Self::new("KeyError", format!("'{}'", key))
    }

    /// `TypeError` with a message
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new("TypeError", message)
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.exception_type, self.message)
    }
}

// ============================================================================
// Value
// ============================================================================

/// A value in the scripted object model.
pub enum Value {
    /// `None`
    None,
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Real
    Float(f64),
    /// String
    Str(SmolStr),
    /// Mutable sequence
    List(Vec<Object>),
    /// Immutable sequence
    Tuple(Vec<Object>),
    /// String-keyed mapping, insertion ordered
    Dict(IndexMap<SmolStr, Object>),
    /// Dense numeric array
    Array(DenseArray),
    /// Native callable
    Callable(ScriptedFn),
}

impl Value {
    /// Runtime type name
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::List(_) => "list",
            Value::Tuple(_) => "tuple",
            Value::Dict(_) => "dict",
            Value::Array(_) => "ndarray",
            Value::Callable(_) => "function",
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::None => write!(f, "None"),
            Value::Bool(b) => write!(f, "{}", if *b { "True" } else { "False" }),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "'{}'", s),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                write!(f, "]")
            }
            Value::Tuple(items) => {
                write!(f, "(")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", item)?;
                }
                if items.len() == 1 {
                    write!(f, ",")?;
                }
                write!(f, ")")
            }
            Value::Dict(map) => {
                write!(f, "{{")?;
                for (i, (k, v)) in map.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "'{}': {}", k, v)?;
                }
                write!(f, "}}")
            }
            Value::Array(arr) => write!(f, "{}", arr),
            Value::Callable(_) => write!(f, "<function>"),
        }
    }
}

// ============================================================================
// Object
// ============================================================================

struct ObjectCell {
    value: Value,
    live: Arc<AtomicUsize>,
}

impl Drop for ObjectCell {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Reference-counted handle to a scripted value.
///
/// Cloning takes a new reference; dropping releases one. The value is
/// freed, and the runtime's live count decremented, with the last one.
#[derive(Clone)]
pub struct Object {
    cell: Arc<ObjectCell>,
}

impl Object {
    /// The wrapped value
    pub fn value(&self) -> &Value {
        &self.cell.value
    }

    /// Runtime type name
    pub fn type_name(&self) -> &'static str {
        self.cell.value.type_name()
    }

    /// Current reference count
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.cell)
    }

    /// Check if this is `None`
    pub fn is_none(&self) -> bool {
        matches!(self.value(), Value::None)
    }

    /// Read a number as a real
    pub fn as_f64(&self) -> Option<f64> {
        match self.value() {
            Value::Float(x) => Some(*x),
            Value::Int(n) => Some(*n as f64),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    /// Read an integer
    pub fn as_i64(&self) -> Option<i64> {
        match self.value() {
            Value::Int(n) => Some(*n),
            Value::Bool(b) => Some(i64::from(*b)),
            Value::Float(x) if x.fract() == 0.0 => Some(*x as i64),
            _ => None,
        }
    }

    /// Read a string
    pub fn as_str(&self) -> Option<&str> {
        match self.value() {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Items of a list or tuple
    pub fn items(&self) -> Option<&[Object]> {
        match self.value() {
            Value::List(items) | Value::Tuple(items) => Some(items),
            _ => None,
        }
    }

    /// Value for `key` in a dict
    pub fn get(&self, key: &str) -> Option<&Object> {
        match self.value() {
            Value::Dict(map) => map.get(key),
            _ => None,
        }
    }

    /// Dense array payload
    pub fn as_array(&self) -> Option<&DenseArray> {
        match self.value() {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }

    /// Numbers of a flat sequence or any dense array, row-major
    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match self.value() {
            Value::Array(arr) => Some(arr.to_row_major_f64()),
            Value::List(items) | Value::Tuple(items) => items.iter().map(Object::as_f64).collect(),
            _ => None,
        }
    }

    /// Strings of a flat sequence
    pub fn to_string_vec(&self) -> Option<Vec<String>> {
        self.items()?
            .iter()
            .map(|item| item.as_str().map(str::to_string))
            .collect()
    }

    /// Keyword lookup for scripted callables: missing keys raise `KeyError`
    pub fn kwarg(&self, key: &str) -> Result<&Object, ScriptError> {
        self.get(key).ok_or_else(|| ScriptError::key_error(key))
    }
}

impl fmt::Debug for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cell.value)
    }
}

impl fmt::Display for Object {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.cell.value)
    }
}

// ============================================================================
// ScriptedRuntime
// ============================================================================

/// In-process runtime over the scripted object model.
pub struct ScriptedRuntime {
    live: Arc<AtomicUsize>,
    allocations: AtomicUsize,
    fail_at: Mutex<Option<usize>>,
    modules: RwLock<IndexMap<SmolStr, IndexMap<SmolStr, Object>>>,
}

impl ScriptedRuntime {
    /// Create an empty runtime
    pub fn new() -> Self {
        Self {
            live: Arc::new(AtomicUsize::new(0)),
            allocations: AtomicUsize::new(0),
            fail_at: Mutex::new(None),
            modules: RwLock::new(IndexMap::new()),
        }
    }

    /// Wrap a value in a new object. Not subject to allocation failure
    /// injection; scripted callables build their results with this.
    pub fn object(&self, value: Value) -> Object {
        self.live.fetch_add(1, Ordering::SeqCst);
        Object {
            cell: Arc::new(ObjectCell {
                value,
                live: Arc::clone(&self.live),
            }),
        }
    }

    fn alloc(&self, what: &str, value: Value) -> BridgeResult<Object> {
        let count = self.allocations.fetch_add(1, Ordering::SeqCst);
        if let Some(limit) = *self.fail_at.lock() {
            if count >= limit {
                return Err(BridgeError::allocation(what));
            }
        }
        Ok(self.object(value))
    }

    /// Make every bridge-side allocation after the next `successes` fail
    pub fn fail_allocations_after(&self, successes: usize) {
        let now = self.allocations.load(Ordering::SeqCst);
        *self.fail_at.lock() = Some(now + successes);
    }

    /// Stop injecting allocation failures
    pub fn clear_allocation_failure(&self) {
        *self.fail_at.lock() = None;
    }

    /// Number of objects currently alive
    pub fn live_objects(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    /// Register a callable under `module:function`, or under a bare name
    /// in the main module.
    pub fn define<F>(&self, name: &str, f: F)
    where
        F: Fn(&ScriptedRuntime, &Object) -> Result<Object, ScriptError> + Send + Sync + 'static,
    {
        let (module, function) = split_callable_name(name);
        let callable = self.object(Value::Callable(Arc::new(f)));
        self.modules
            .write()
            .entry(SmolStr::new(module))
            .or_default()
            .insert(SmolStr::new(function), callable);
    }

    /// Register a non-callable attribute, for resolution tests
    pub fn define_value(&self, name: &str, value: Value) {
        let (module, attr) = split_callable_name(name);
        let obj = self.object(value);
        self.modules
            .write()
            .entry(SmolStr::new(module))
            .or_default()
            .insert(SmolStr::new(attr), obj);
    }

    /// A list of reals
    pub fn list_f64(&self, values: &[f64]) -> Object {
        let items = values.iter().map(|&v| self.object(Value::Float(v))).collect();
        self.object(Value::List(items))
    }

    /// A list of lists of reals
    pub fn nested_f64(&self, rows: &[Vec<f64>]) -> Object {
        let items = rows.iter().map(|row| self.list_f64(row)).collect();
        self.object(Value::List(items))
    }

    /// A dense real array from a row-major buffer
    pub fn array_f64(&self, values: Vec<f64>, shape: Vec<usize>) -> Result<Object, ScriptError> {
        DenseArray::from_buffer(DenseBuffer::Real(values), shape)
            .map(|arr| self.object(Value::Array(arr)))
            .map_err(|e| ScriptError::new("ValueError", e.to_string()))
    }

    /// A dict from key/object pairs
    pub fn dict(&self, entries: Vec<(&str, Object)>) -> Object {
        let map = entries
            .into_iter()
            .map(|(k, v)| (SmolStr::new(k), v))
            .collect();
        self.object(Value::Dict(map))
    }
}

impl Default for ScriptedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ScriptedRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptedRuntime")
            .field("live", &self.live_objects())
            .field("modules", &self.modules.read().keys().collect::<Vec<_>>())
            .finish()
    }
}

impl ForeignRuntime for ScriptedRuntime {
    type Object = Object;

    fn name(&self) -> &str {
        "scripted"
    }

    fn none(&self) -> BridgeResult<Object> {
        self.alloc("None", Value::None)
    }

    fn float(&self, value: f64) -> BridgeResult<Object> {
        self.alloc("float", Value::Float(value))
    }

    fn int(&self, value: i64) -> BridgeResult<Object> {
        self.alloc("int", Value::Int(value))
    }

    fn boolean(&self, value: bool) -> BridgeResult<Object> {
        self.alloc("bool", Value::Bool(value))
    }

    fn string(&self, value: &str) -> BridgeResult<Object> {
        self.alloc("str", Value::Str(SmolStr::new(value)))
    }

    fn sequence(&self, items: Vec<Object>) -> BridgeResult<Object> {
        self.alloc("list", Value::List(items))
    }

    fn dense(&self, buffer: DenseBuffer, shape: &[usize]) -> BridgeResult<Object> {
        let array = DenseArray::from_buffer(buffer, shape.to_vec())?;
        self.alloc("ndarray", Value::Array(array))
    }

    fn mapping(&self, entries: Vec<(&str, Object)>) -> BridgeResult<Object> {
        let map = entries
            .into_iter()
            .map(|(k, v)| (SmolStr::new(k), v))
            .collect();
        self.alloc("dict", Value::Dict(map))
    }

    fn resolve_callable(&self, name: &str) -> BridgeResult<Object> {
        let (module, function) = split_callable_name(name);
        let modules = self.modules.read();
        let namespace = modules
            .get(module)
            .ok_or_else(|| BridgeError::name_resolution(name, format!("no module named '{}'", module)))?;
        let obj = namespace.get(function).ok_or_else(|| {
            BridgeError::name_resolution(
                name,
                format!("module '{}' has no attribute '{}'", module, function),
            )
        })?;
        match obj.value() {
            Value::Callable(_) => Ok(obj.clone()),
            other => Err(BridgeError::name_resolution(
                name,
                format!("'{}' object is not callable", other.type_name()),
            )),
        }
    }

    fn invoke(&self, callable: &Object, kwargs: &Object) -> BridgeResult<Object> {
        match callable.value() {
            Value::Callable(f) => f(self, kwargs).map_err(|e| {
                BridgeError::foreign_call(
                    "<scripted>",
                    e.exception_type,
                    e.message,
                    Some("raised by scripted callable".to_string()),
                )
            }),
            other => Err(BridgeError::type_mismatch("callable", other.type_name())),
        }
    }

    fn describe_shape(&self, obj: &Object) -> BridgeResult<ForeignShape> {
        Ok(match obj.value() {
            Value::List(items) | Value::Tuple(items) => ForeignShape::Sequence { len: items.len() },
            Value::Array(arr) => ForeignShape::Dense {
                shape: arr.shape().to_vec(),
            },
            Value::Dict(_) => ForeignShape::Mapping,
            Value::Bool(_) | Value::Int(_) | Value::Float(_) => ForeignShape::Scalar,
            other => ForeignShape::Other {
                type_name: other.type_name().to_string(),
            },
        })
    }

    fn item(&self, obj: &Object, index: usize) -> BridgeResult<Object> {
        let items = obj
            .items()
            .ok_or_else(|| BridgeError::type_mismatch("sequence", obj.type_name()))?;
        items
            .get(index)
            .cloned()
            .ok_or_else(|| BridgeError::dimension_mismatch("sequence index", items.len(), index + 1))
    }

    fn lookup(&self, obj: &Object, key: &str) -> BridgeResult<Option<Object>> {
        match obj.value() {
            Value::Dict(map) => Ok(map.get(key).cloned()),
            other => Err(BridgeError::type_mismatch("dict", other.type_name())),
        }
    }

    fn to_f64(&self, obj: &Object) -> BridgeResult<f64> {
        obj.as_f64()
            .ok_or_else(|| BridgeError::type_mismatch("number", obj.type_name()))
    }

    fn dense_values(&self, obj: &Object) -> BridgeResult<Vec<f64>> {
        obj.as_array()
            .map(DenseArray::to_row_major_f64)
            .ok_or_else(|| BridgeError::type_mismatch("ndarray", obj.type_name()))
    }
}
