//! CPython backend for the evaluation bridge.
//!
//! Implements [`ForeignRuntime`] over an embedded interpreter:
//! - Objects are `Py<PyAny>` handles; dropping one releases the reference
//! - Every call attaches to the interpreter, and [`ForeignRuntime::scoped`]
//!   keeps it attached across a whole evaluation
//! - Dense arrays are `numpy.ndarray` built from raw native bytes with
//!   `numpy.frombuffer`, and read back through the buffer protocol
//! - Raised exceptions carry their type, message and formatted traceback

use std::ffi::CString;
use std::path::Path;

use pyo3::buffer::PyBuffer;
use pyo3::exceptions::PyKeyError;
use pyo3::prelude::*;
use pyo3::types::{PyBool, PyBytes, PyDict, PyFloat, PyInt, PyList, PyMapping, PySequence, PyString, PyTuple};
use smol_str::SmolStr;
use tracing::{debug, info};

use pyface_bridge::{
    initialize_runtime_with, split_callable_name, BridgeError, BridgeResult, DenseBuffer, ForeignRuntime, ForeignShape,
};

/// Convert a raised Python exception into a call failure
fn call_failure(py: Python<'_>, callable: &str, err: PyErr) -> BridgeError {
    let exception_type = err
        .get_type(py)
        .name()
        .map(|n| n.to_string())
        .unwrap_or_else(|_| "Exception".to_string());
    let message = err.value(py).to_string();
    let traceback = err.traceback(py).and_then(|tb| tb.format().ok());
    BridgeError::foreign_call(callable, exception_type, message, traceback)
}

fn type_name(obj: &Bound<'_, PyAny>) -> String {
    obj.get_type()
        .name()
        .map(|n| n.to_string())
        .unwrap_or_else(|_| "object".to_string())
}

/// The embedded CPython interpreter.
#[derive(Debug)]
pub struct PythonRuntime {
    name: SmolStr,
}

impl PythonRuntime {
    /// Start the interpreter (once per process) and mark the process-wide
    /// runtime initialised.
    pub fn initialize() -> BridgeResult<Self> {
        let started = initialize_runtime_with(|| {
            Python::initialize();
            Ok(())
        })?;
        if started {
            let version = Python::attach(|py| py.version().to_string());
            info!(%version, "python interpreter started");
        }
        Ok(Self {
            name: SmolStr::new("cpython"),
        })
    }

    /// Prepend `dir` to `sys.path` so driver modules there resolve
    pub fn add_search_path(&self, dir: &Path) -> BridgeResult<()> {
        Python::attach(|py| {
            let sys = py.import("sys").map_err(|e| call_failure(py, "sys", e))?;
            let path = sys.getattr("path").map_err(|e| call_failure(py, "sys.path", e))?;
            path.call_method1("insert", (0, dir.to_string_lossy().as_ref()))
                .map_err(|e| call_failure(py, "sys.path.insert", e))?;
            debug!(dir = %dir.display(), "added python search path");
            Ok(())
        })
    }

    /// Create module `name` from source and make it importable
    pub fn define_module(&self, name: &str, source: &str) -> BridgeResult<()> {
        let code = CString::new(source).map_err(|e| BridgeError::config(e.to_string()))?;
        let module = CString::new(name).map_err(|e| BridgeError::config(e.to_string()))?;
        let file = CString::new(format!("{}.py", name)).map_err(|e| BridgeError::config(e.to_string()))?;
        Python::attach(|py| {
            PyModule::from_code(py, &code, &file, &module)
                .map(|_| ())
                .map_err(|e| call_failure(py, name, e))
        })
    }

    /// Check whether `numpy` can be imported
    pub fn numpy_available(&self) -> bool {
        Python::attach(|py| py.import("numpy").is_ok())
    }

    fn dense_values_bound(obj: &Bound<'_, PyAny>) -> BridgeResult<Vec<f64>> {
        let py = obj.py();
        if let Ok(buffer) = PyBuffer::<f64>::get(obj) {
            return buffer.to_vec(py).map_err(|e| call_failure(py, "buffer", e));
        }
        if let Ok(buffer) = PyBuffer::<i64>::get(obj) {
            let ints = buffer.to_vec(py).map_err(|e| call_failure(py, "buffer", e))?;
            return Ok(ints.into_iter().map(|v| v as f64).collect());
        }
        // Other dtypes: let numpy do the widening, then read the copy.
        let converted = obj
            .call_method1("astype", ("float64",))
            .map_err(|_| BridgeError::type_mismatch("numeric array", type_name(obj)))?;
        let buffer =
            PyBuffer::<f64>::get(&converted).map_err(|_| BridgeError::type_mismatch("numeric array", type_name(obj)))?;
        buffer.to_vec(py).map_err(|e| call_failure(py, "buffer", e))
    }
}

impl ForeignRuntime for PythonRuntime {
    type Object = Py<PyAny>;

    fn scoped<T, F>(&self, f: F) -> T
    where
        F: FnOnce() -> T,
    {
        Python::attach(|_py| f())
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn none(&self) -> BridgeResult<Py<PyAny>> {
        Ok(Python::attach(|py| py.None()))
    }

    fn float(&self, value: f64) -> BridgeResult<Py<PyAny>> {
        Ok(Python::attach(|py| PyFloat::new(py, value).into_any().unbind()))
    }

    fn int(&self, value: i64) -> BridgeResult<Py<PyAny>> {
        Python::attach(|py| {
            value
                .into_pyobject(py)
                .map(|v| v.into_any().unbind())
                .map_err(|_| BridgeError::allocation("int"))
        })
    }

    fn boolean(&self, value: bool) -> BridgeResult<Py<PyAny>> {
        Ok(Python::attach(|py| PyBool::new(py, value).to_owned().into_any().unbind()))
    }

    fn string(&self, value: &str) -> BridgeResult<Py<PyAny>> {
        Ok(Python::attach(|py| PyString::new(py, value).into_any().unbind()))
    }

    fn sequence(&self, items: Vec<Py<PyAny>>) -> BridgeResult<Py<PyAny>> {
        Python::attach(|py| {
            PyList::new(py, items)
                .map(|list| list.into_any().unbind())
                .map_err(|_| BridgeError::allocation("list"))
        })
    }

    fn dense(&self, buffer: DenseBuffer, shape: &[usize]) -> BridgeResult<Py<PyAny>> {
        if buffer.len() != shape.iter().product::<usize>() {
            return Err(BridgeError::dimension_mismatch(
                format!("dense buffer for shape {:?}", shape),
                shape.iter().product(),
                buffer.len(),
            ));
        }
        Python::attach(|py| {
            let numpy = py
                .import("numpy")
                .map_err(|e| BridgeError::allocation(format!("ndarray ({})", e)))?;
            let dtype = buffer.dtype().name();
            let bytes = PyBytes::new(py, &buffer.to_ne_bytes());
            let dims = PyTuple::new(py, shape.iter().copied()).map_err(|_| BridgeError::allocation("tuple"))?;

            let kwargs = PyDict::new(py);
            kwargs
                .set_item("dtype", dtype)
                .map_err(|_| BridgeError::allocation("dict"))?;
            // frombuffer views the immutable bytes; copy so callables may write
            numpy
                .call_method("frombuffer", (bytes,), Some(&kwargs))
                .and_then(|arr| arr.call_method1("reshape", (dims,)))
                .and_then(|arr| arr.call_method0("copy"))
                .map(|arr| arr.unbind())
                .map_err(|e| BridgeError::allocation(format!("ndarray ({})", e)))
        })
    }

    fn mapping(&self, entries: Vec<(&str, Py<PyAny>)>) -> BridgeResult<Py<PyAny>> {
        Python::attach(|py| {
            let dict = PyDict::new(py);
            for (key, value) in entries {
                dict.set_item(key, value)
                    .map_err(|_| BridgeError::allocation("dict"))?;
            }
            Ok(dict.into_any().unbind())
        })
    }

    fn resolve_callable(&self, name: &str) -> BridgeResult<Py<PyAny>> {
        let (module, function) = split_callable_name(name);
        Python::attach(|py| {
            let module = py
                .import(module)
                .map_err(|e| BridgeError::name_resolution(name, e.value(py).to_string()))?;
            let callable = module
                .getattr(function)
                .map_err(|e| BridgeError::name_resolution(name, e.value(py).to_string()))?;
            if !callable.is_callable() {
                return Err(BridgeError::name_resolution(
                    name,
                    format!("'{}' object is not callable", type_name(&callable)),
                ));
            }
            Ok(callable.unbind())
        })
    }

    fn invoke(&self, callable: &Py<PyAny>, kwargs: &Py<PyAny>) -> BridgeResult<Py<PyAny>> {
        Python::attach(|py| {
            let callable = callable.bind(py);
            let kwargs = kwargs
                .bind(py)
                .cast::<PyDict>()
                .map_err(|_| BridgeError::type_mismatch("dict", type_name(kwargs.bind(py))))?;
            let qualname = callable
                .getattr("__qualname__")
                .map(|n| n.to_string())
                .unwrap_or_else(|_| type_name(callable));
            callable
                .call((), Some(kwargs))
                .map(|result| result.unbind())
                .map_err(|e| call_failure(py, &qualname, e))
        })
    }

    fn describe_shape(&self, obj: &Py<PyAny>) -> BridgeResult<ForeignShape> {
        Python::attach(|py| {
            let obj = obj.bind(py);
            if obj.cast::<PyString>().is_ok() {
                return Ok(ForeignShape::Other {
                    type_name: type_name(obj),
                });
            }
            if obj.cast::<PyBool>().is_ok() || obj.cast::<PyInt>().is_ok() || obj.cast::<PyFloat>().is_ok() {
                return Ok(ForeignShape::Scalar);
            }
            if obj.hasattr("__array_interface__").unwrap_or(false) {
                let shape: Vec<usize> = obj
                    .getattr("shape")
                    .and_then(|s| s.extract())
                    .map_err(|_| BridgeError::type_mismatch("array shape", type_name(obj)))?;
                // numpy scalars expose the array protocol with an empty shape
                return Ok(if shape.is_empty() {
                    ForeignShape::Scalar
                } else {
                    ForeignShape::Dense { shape }
                });
            }
            if obj.cast::<PyDict>().is_ok() || obj.cast::<PyMapping>().is_ok() {
                return Ok(ForeignShape::Mapping);
            }
            if let Ok(list) = obj.cast::<PyList>() {
                return Ok(ForeignShape::Sequence { len: list.len() });
            }
            if let Ok(tuple) = obj.cast::<PyTuple>() {
                return Ok(ForeignShape::Sequence { len: tuple.len() });
            }
            if let Ok(seq) = obj.cast::<PySequence>() {
                let len = seq
                    .len()
                    .map_err(|_| BridgeError::type_mismatch("sized sequence", type_name(obj)))?;
                return Ok(ForeignShape::Sequence { len });
            }
            Ok(ForeignShape::Other {
                type_name: type_name(obj),
            })
        })
    }

    fn item(&self, obj: &Py<PyAny>, index: usize) -> BridgeResult<Py<PyAny>> {
        Python::attach(|py| {
            let obj = obj.bind(py);
            obj.get_item(index)
                .map(|item| item.unbind())
                .map_err(|_| BridgeError::type_mismatch(format!("item {}", index), type_name(obj)))
        })
    }

    fn lookup(&self, obj: &Py<PyAny>, key: &str) -> BridgeResult<Option<Py<PyAny>>> {
        Python::attach(|py| {
            let obj = obj.bind(py);
            if let Ok(dict) = obj.cast::<PyDict>() {
                return dict
                    .get_item(key)
                    .map(|item| item.map(Bound::unbind))
                    .map_err(|e| call_failure(py, "__getitem__", e));
            }
            match obj.get_item(key) {
                Ok(item) => Ok(Some(item.unbind())),
                Err(e) if e.is_instance_of::<PyKeyError>(py) => Ok(None),
                Err(_) => Err(BridgeError::type_mismatch("mapping", type_name(obj))),
            }
        })
    }

    fn to_f64(&self, obj: &Py<PyAny>) -> BridgeResult<f64> {
        Python::attach(|py| {
            let obj = obj.bind(py);
            obj.extract::<f64>()
                .map_err(|_| BridgeError::type_mismatch("number", type_name(obj)))
        })
    }

    fn dense_values(&self, obj: &Py<PyAny>) -> BridgeResult<Vec<f64>> {
        Python::attach(|py| Self::dense_values_bound(obj.bind(py)))
    }
}
