//! Error Types for the Evaluation Bridge
//!
//! Every failure aborts the current evaluation and is surfaced to the
//! driver as-is. Nothing in the bridge retries.
//!
//! ## Error Categories
//!
//! - Dimension and shape mismatches in foreign results
//! - Type mismatches (non-numeric elements, unrecognised containers)
//! - Callable resolution and foreign call failures
//! - Foreign object allocation failures
//! - Runtime lifecycle and interface registration misuse

use std::fmt;
use thiserror::Error;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Bridge error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum BridgeError {
    /// Foreign result length or shape differs from what the driver expects
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// What was being decoded (e.g. "fns", "fnGrads[2]")
        context: String,
        /// Expected element count
        expected: usize,
        /// Actual element count
        actual: usize,
    },

    /// A row of a nested sequence has a different length than the first row
    #[error("shape mismatch: row {row} has {actual} columns, expected {expected}")]
    ShapeMismatch {
        /// Zero-based row index
        row: usize,
        /// Length of the first row
        expected: usize,
        /// Length of the offending row
        actual: usize,
    },

    /// Foreign object is not of a usable type
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch {
        /// Expected type
        expected: String,
        /// Actual type received
        actual: String,
    },

    /// Named callable could not be found in the foreign runtime
    #[error("cannot resolve callable '{name}': {reason}")]
    NameResolutionFailure {
        /// Callable name as configured
        name: String,
        /// Why resolution failed
        reason: String,
    },

    /// The foreign callable raised an error
    #[error("call to '{callable}' failed: {exception_type}: {message}")]
    ForeignCallFailure {
        /// Callable name
        callable: String,
        /// Foreign exception type (e.g. "ValueError")
        exception_type: String,
        /// Exception message
        message: String,
        /// Formatted foreign traceback, if the runtime provides one
        traceback: Option<String>,
    },

    /// Foreign object construction failed
    #[error("failed to allocate foreign {what}")]
    AllocationFailure {
        /// What was being built
        what: String,
    },

    /// A requested response component is absent from a mapping result
    #[error("foreign result is missing requested component '{key}'")]
    MissingResult {
        /// Mapping key
        key: String,
    },

    /// Foreign runtime used before initialisation
    #[error("foreign runtime not initialized")]
    RuntimeNotInitialized,

    /// Foreign runtime used after teardown
    #[error("foreign runtime already finalized")]
    RuntimeFinalized,

    /// Dispatch to a name nobody registered
    #[error("no interface registered for analysis driver '{name}'")]
    InterfaceNotRegistered {
        /// Analysis driver name
        name: String,
    },

    /// Second registration under the same name
    #[error("an interface is already registered for analysis driver '{name}'")]
    DuplicateInterface {
        /// Analysis driver name
        name: String,
    },

    /// Illegal invocation state transition
    #[error("invalid invocation transition {from} -> {to}")]
    InvalidState {
        /// State before the transition
        from: String,
        /// Requested state
        to: String,
    },

    /// Interface configuration is malformed
    #[error("configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },
}

impl BridgeError {
    /// Create a dimension mismatch error
    pub fn dimension_mismatch(context: impl Into<String>, expected: usize, actual: usize) -> Self {
        BridgeError::DimensionMismatch {
            context: context.into(),
            expected,
            actual,
        }
    }

    /// Create a type mismatch error
    pub fn type_mismatch(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        BridgeError::TypeMismatch {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create a name resolution error
    pub fn name_resolution(name: impl Into<String>, reason: impl Into<String>) -> Self {
        BridgeError::NameResolutionFailure {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create a foreign call failure
    pub fn foreign_call(
        callable: impl Into<String>,
        exception_type: impl Into<String>,
        message: impl Into<String>,
        traceback: Option<String>,
    ) -> Self {
        BridgeError::ForeignCallFailure {
            callable: callable.into(),
            exception_type: exception_type.into(),
            message: message.into(),
            traceback,
        }
    }

    /// Create an allocation failure
    pub fn allocation(what: impl Into<String>) -> Self {
        BridgeError::AllocationFailure { what: what.into() }
    }

    /// Create a missing result error
    pub fn missing_result(key: impl Into<String>) -> Self {
        BridgeError::MissingResult { key: key.into() }
    }

    /// Create a configuration error
    pub fn config(message: impl Into<String>) -> Self {
        BridgeError::Config {
            message: message.into(),
        }
    }

    /// Attribute a foreign call failure to `name`; other errors pass through
    pub fn with_callable(self, name: &str) -> Self {
        match self {
            BridgeError::ForeignCallFailure {
                exception_type,
                message,
                traceback,
                ..
            } => BridgeError::ForeignCallFailure {
                callable: name.to_string(),
                exception_type,
                message,
                traceback,
            },
            other => other,
        }
    }

    /// Check if this is a dimension or shape error
    pub fn is_dimension_error(&self) -> bool {
        matches!(
            self,
            BridgeError::DimensionMismatch { .. } | BridgeError::ShapeMismatch { .. }
        )
    }

    /// Check if this is a type-related error
    pub fn is_type_error(&self) -> bool {
        matches!(self, BridgeError::TypeMismatch { .. })
    }

    /// Check if the error originated on the foreign side
    pub fn is_foreign_error(&self) -> bool {
        matches!(
            self,
            BridgeError::NameResolutionFailure { .. }
                | BridgeError::ForeignCallFailure { .. }
                | BridgeError::AllocationFailure { .. }
        )
    }

    /// Short machine-readable kind, used as a structured log field
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeError::DimensionMismatch { .. } => "dimension_mismatch",
            BridgeError::ShapeMismatch { .. } => "shape_mismatch",
            BridgeError::TypeMismatch { .. } => "type_mismatch",
            BridgeError::NameResolutionFailure { .. } => "name_resolution_failure",
            BridgeError::ForeignCallFailure { .. } => "foreign_call_failure",
            BridgeError::AllocationFailure { .. } => "allocation_failure",
            BridgeError::MissingResult { .. } => "missing_result",
            BridgeError::RuntimeNotInitialized => "runtime_not_initialized",
            BridgeError::RuntimeFinalized => "runtime_finalized",
            BridgeError::InterfaceNotRegistered { .. } => "interface_not_registered",
            BridgeError::DuplicateInterface { .. } => "duplicate_interface",
            BridgeError::InvalidState { .. } => "invalid_state",
            BridgeError::Config { .. } => "config",
        }
    }
}

/// Where in an evaluation an error happened
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvalLocation {
    /// Analysis driver name
    pub driver: Option<String>,
    /// Evaluation id
    pub eval_id: Option<u64>,
}

impl EvalLocation {
    /// Create an empty location
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the analysis driver
    pub fn with_driver(mut self, driver: impl Into<String>) -> Self {
        self.driver = Some(driver.into());
        self
    }

    /// Set the evaluation id
    pub fn with_eval_id(mut self, eval_id: u64) -> Self {
        self.eval_id = Some(eval_id);
        self
    }
}

impl fmt::Display for EvalLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.driver, self.eval_id) {
            (Some(driver), Some(id)) => write!(f, "{} (evaluation {})", driver, id),
            (Some(driver), None) => write!(f, "{}", driver),
            (None, Some(id)) => write!(f, "evaluation {}", id),
            (None, None) => write!(f, "<unknown location>"),
        }
    }
}

/// Bridge diagnostic with full context, rendered for the driver's log
#[derive(Debug, Clone)]
pub struct BridgeDiagnostic {
    /// The error
    pub error: BridgeError,
    /// Evaluation location
    pub location: EvalLocation,
    /// Additional notes
    pub notes: Vec<String>,
    /// Help suggestion
    pub help: Option<String>,
}

impl BridgeDiagnostic {
    /// Create a new diagnostic
    pub fn new(error: BridgeError) -> Self {
        let help = match &error {
            BridgeError::NameResolutionFailure { .. } => {
                Some("analysis drivers are named 'module:function'".to_string())
            }
            BridgeError::MissingResult { key } => Some(format!(
                "return a mapping with a '{}' entry when it is requested",
                key
            )),
            _ => None,
        };
        let mut notes = Vec::new();
        if let BridgeError::ForeignCallFailure {
            traceback: Some(tb),
            ..
        } = &error
        {
            notes.push(tb.clone());
        }
        Self {
            error,
            location: EvalLocation::new(),
            notes,
            help,
        }
    }

    /// Add location information
    pub fn with_location(mut self, location: EvalLocation) -> Self {
        self.location = location;
        self
    }

    /// Add a note
    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.notes.push(note.into());
        self
    }

    /// Replace the help text
    pub fn with_help(mut self, help: impl Into<String>) -> Self {
        self.help = Some(help.into());
        self
    }
}

impl fmt::Display for BridgeDiagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "error: {}", self.error)?;

        if self.location.driver.is_some() || self.location.eval_id.is_some() {
            writeln!(f, "  --> {}", self.location)?;
        }

        for note in &self.notes {
            writeln!(f, "note: {}", note)?;
        }

        if let Some(ref help) = self.help {
            writeln!(f, "help: {}", help)?;
        }

        Ok(())
    }
}
