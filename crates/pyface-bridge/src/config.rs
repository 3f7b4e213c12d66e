//! Interface configuration, read from TOML.
//!
//! ```toml
//! id = "opt"
//! analysis_drivers = ["rosenbrock:evaluate"]
//! numpy = true
//! analysis_components = ["case-a"]
//! symmetric_triangle = "lower"
//! ```

use std::fs;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smol_str::SmolStr;

use crate::containers::Triangle;
use crate::error::{BridgeError, BridgeResult};
use crate::invoke::EvaluationInvoker;
use crate::registry::{InterfaceRegistry, UserData};
use crate::runtime::{ForeignRuntime, RepresentationMode};

/// Name an interface is registered under when the configuration has no id
pub const DEFAULT_INTERFACE_ID: &str = "NO_ID";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Registry name
    #[serde(default)]
    pub id: Option<String>,
    /// `module:function` callables; the first is the default
    pub analysis_drivers: Vec<String>,
    /// Hand numbers to the callable as dense arrays
    #[serde(default)]
    pub numpy: bool,
    /// Passed through to the callable verbatim
    #[serde(default)]
    pub analysis_components: Vec<String>,
    /// Authoritative triangle of returned Hessians
    #[serde(default)]
    pub symmetric_triangle: Triangle,
}

impl InterfaceConfig {
    /// Configuration for a single driver with defaults elsewhere
    pub fn new(driver: impl Into<String>) -> Self {
        Self {
            id: None,
            analysis_drivers: vec![driver.into()],
            numpy: false,
            analysis_components: Vec::new(),
            symmetric_triangle: Triangle::default(),
        }
    }

    pub fn from_toml_str(content: &str) -> BridgeResult<Self> {
        let config: Self = toml::from_str(content).map_err(|e| BridgeError::config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> BridgeResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| BridgeError::config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> BridgeResult<String> {
        toml::to_string_pretty(self).map_err(|e| BridgeError::config(e.to_string()))
    }

    pub fn validate(&self) -> BridgeResult<()> {
        if self.analysis_drivers.is_empty() {
            return Err(BridgeError::config("at least one analysis driver is required"));
        }
        if let Some(i) = self.analysis_drivers.iter().position(|d| d.trim().is_empty()) {
            return Err(BridgeError::config(format!("analysis driver {} has an empty name", i)));
        }
        for driver in &self.analysis_drivers {
            if let Some((module, function)) = driver.split_once(':') {
                if module.is_empty() || function.is_empty() {
                    return Err(BridgeError::config(format!(
                        "analysis driver '{}' must be 'module:function'",
                        driver
                    )));
                }
            }
        }
        Ok(())
    }

    pub fn mode(&self) -> RepresentationMode {
        RepresentationMode::from_numpy_flag(self.numpy)
    }

    pub fn interface_id(&self) -> &str {
        self.id.as_deref().unwrap_or(DEFAULT_INTERFACE_ID)
    }

    /// First analysis driver
    pub fn default_driver(&self) -> BridgeResult<&str> {
        self.analysis_drivers
            .first()
            .map(String::as_str)
            .ok_or_else(|| BridgeError::config("at least one analysis driver is required"))
    }

    pub fn components(&self) -> Vec<SmolStr> {
        self.analysis_components.iter().map(SmolStr::new).collect()
    }

    /// Build an invoker for the default driver
    pub fn build_invoker<R: ForeignRuntime>(&self, runtime: Arc<R>) -> BridgeResult<EvaluationInvoker<R>> {
        self.validate()?;
        Ok(EvaluationInvoker::new(runtime, self.default_driver()?, self.mode())
            .with_triangle(self.symmetric_triangle)
            .with_analysis_components(self.components()))
    }

    /// Build an invoker and register it under this configuration's id
    pub fn register<R>(&self, registry: &InterfaceRegistry, runtime: Arc<R>, user_data: UserData) -> BridgeResult<()>
    where
        R: ForeignRuntime + Send + Sync + 'static,
    {
        let invoker = self.build_invoker(runtime)?;
        registry.register(self.interface_id(), Arc::new(invoker), user_data)
    }
}
