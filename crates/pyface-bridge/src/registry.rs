//! Interface Registration
//!
//! The host looks interfaces up by the name declared in its problem
//! configuration and calls them through [`DirectInterface`], without
//! knowing what sits behind the name.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use smol_str::SmolStr;
use tracing::debug;

use crate::error::{BridgeError, BridgeResult};
use crate::evaluation::{EvalRequest, Response};
use crate::invoke::EvaluationInvoker;
use crate::runtime::ForeignRuntime;

/// Opaque caller-owned context, forwarded to every evaluation as given.
///
/// The bridge never looks inside it.
pub type UserData = Option<Arc<dyn Any + Send + Sync>>;

/// Per-evaluation context handed to an interface by the registry
pub struct EvalContext<'a> {
    /// Name the interface is registered under
    pub interface: &'a str,
    /// Analysis driver to run
    pub driver: &'a str,
    /// User data given at registration
    pub user_data: &'a UserData,
}

impl fmt::Debug for EvalContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvalContext")
            .field("interface", &self.interface)
            .field("driver", &self.driver)
            .field("user_data", &self.user_data.is_some())
            .finish()
    }
}

/// Evaluation entry point the host dispatches to.
pub trait DirectInterface: Send + Sync {
    /// Run the analysis driver named in `ctx` for `request`
    fn derived_map(&self, ctx: &EvalContext<'_>, request: &EvalRequest, response: &mut Response) -> BridgeResult<()>;

    /// Analysis drivers this interface runs when none is named
    fn default_driver(&self) -> &str;
}

impl<R> DirectInterface for EvaluationInvoker<R>
where
    R: ForeignRuntime + Send + Sync,
{
    fn derived_map(&self, ctx: &EvalContext<'_>, request: &EvalRequest, response: &mut Response) -> BridgeResult<()> {
        self.evaluate_as(ctx.driver, request, response)
    }

    fn default_driver(&self) -> &str {
        self.driver()
    }
}

struct Registration {
    interface: Arc<dyn DirectInterface>,
    user_data: UserData,
}

/// Name to interface table.
#[derive(Default)]
pub struct InterfaceRegistry {
    entries: RwLock<IndexMap<SmolStr, Registration>>,
}

impl InterfaceRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `interface` under `name`.
    ///
    /// `user_data` is passed back, unmodified, with every evaluation.
    pub fn register(
        &self,
        name: impl Into<SmolStr>,
        interface: Arc<dyn DirectInterface>,
        user_data: UserData,
    ) -> BridgeResult<()> {
        let name = name.into();
        let mut entries = self.entries.write();
        if entries.contains_key(&name) {
            return Err(BridgeError::DuplicateInterface { name: name.to_string() });
        }
        debug!(interface = %name, has_user_data = user_data.is_some(), "interface registered");
        entries.insert(name, Registration { interface, user_data });
        Ok(())
    }

    /// Remove the interface under `name`, returning whether one existed
    pub fn unregister(&self, name: &str) -> bool {
        self.entries.write().shift_remove(name).is_some()
    }

    /// Check if `name` is registered
    pub fn contains(&self, name: &str) -> bool {
        self.entries.read().contains_key(name)
    }

    /// Registered names, in registration order
    pub fn names(&self) -> Vec<SmolStr> {
        self.entries.read().keys().cloned().collect()
    }

    /// Number of registered interfaces
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Check if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Evaluate through the interface `name`, running `driver`, or the
    /// interface's default driver when `driver` is `None`.
    pub fn dispatch(
        &self,
        name: &str,
        driver: Option<&str>,
        request: &EvalRequest,
        response: &mut Response,
    ) -> BridgeResult<()> {
        // Clone out of the table so the read lock is not held across the
        // evaluation, which may register further interfaces.
        let (interface, user_data) = {
            let entries = self.entries.read();
            let entry = entries.get(name).ok_or_else(|| BridgeError::InterfaceNotRegistered {
                name: name.to_string(),
            })?;
            (Arc::clone(&entry.interface), entry.user_data.clone())
        };

        let driver = driver.unwrap_or_else(|| interface.default_driver());
        debug!(interface = name, driver, eval_id = request.eval_id, "dispatching evaluation");
        let ctx = EvalContext {
            interface: name,
            driver,
            user_data: &user_data,
        };
        interface.derived_map(&ctx, request, response)
    }
}

impl fmt::Debug for InterfaceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InterfaceRegistry")
            .field("names", &self.names())
            .finish()
    }
}
