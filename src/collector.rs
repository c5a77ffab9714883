//! Per-endpoint registry of function definitions.
//!
//! A collector owns a context value handed to every setup factory, a map of
//! definitions keyed by name, and a list of change listeners fired whenever a
//! definition is registered or replaced. Its [`FunctionCaller`] view is what
//! gets handed to a bridge as "the local functions".
//!
//! # Deadlock Prevention
//!
//! Change listeners are invoked after the registry lock is released, so a
//! listener may re-enter the collector (register more functions, look others
//! up) without deadlocking.

// Rust guideline compliant 2026-03

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{CallError, RegistryError};
use crate::function::{FunctionDef, FunctionKind, Handler};

/// Listener fired with the name of a registered or updated definition.
pub type ChangeListener = Arc<dyn Fn(&str) + Send + Sync>;

/// The explicit call interface over a set of named functions.
///
/// Both live collectors and replay clients implement this, so a bridge (or
/// any consumer) can dispatch by name without knowing which kind of backing
/// store answers the call.
#[async_trait]
pub trait FunctionCaller: Send + Sync {
    /// Invoke a function by name with positional arguments.
    async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, CallError>;

    /// Whether a function with this name can be called.
    fn has(&self, name: &str) -> bool;

    /// Names of all callable functions.
    fn names(&self) -> Vec<String>;
}

struct CollectorInner<Ctx> {
    context: Ctx,
    functions: Mutex<HashMap<String, Arc<FunctionDef<Ctx>>>>,
    listeners: Mutex<Vec<ChangeListener>>,
}

/// Registry of [`FunctionDef`]s sharing one context value.
pub struct Collector<Ctx> {
    inner: Arc<CollectorInner<Ctx>>,
}

impl<Ctx> Clone for Collector<Ctx> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<Ctx> std::fmt::Debug for Collector<Ctx> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.inner.functions.lock().map(|m| m.len()).unwrap_or(0);
        f.debug_struct("Collector")
            .field("functions", &count)
            .finish_non_exhaustive()
    }
}

impl<Ctx: Clone + Send + Sync + 'static> Collector<Ctx> {
    /// Create a collector owning the given context.
    pub fn new(context: Ctx) -> Self {
        Self {
            inner: Arc::new(CollectorInner {
                context,
                functions: Mutex::new(HashMap::new()),
                listeners: Mutex::new(Vec::new()),
            }),
        }
    }

    /// The context value handed to setup factories and dump factories.
    pub fn context(&self) -> &Ctx {
        &self.inner.context
    }

    /// Register a new definition.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::AlreadyRegistered` when the name exists and
    /// `force` is false. With `force`, the existing definition is replaced.
    pub fn register(&self, def: FunctionDef<Ctx>, force: bool) -> Result<(), RegistryError> {
        let name = def.name().to_string();
        {
            let mut functions = self.inner.functions.lock().expect("function map poisoned");
            if !force && functions.contains_key(&name) {
                return Err(RegistryError::AlreadyRegistered(name));
            }
            functions.insert(name.clone(), Arc::new(def));
        }
        self.notify(&name);
        Ok(())
    }

    /// Replace an existing definition.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::NotRegistered` when the name is absent and
    /// `force` is false. With `force`, the definition is inserted.
    pub fn update(&self, def: FunctionDef<Ctx>, force: bool) -> Result<(), RegistryError> {
        let name = def.name().to_string();
        {
            let mut functions = self.inner.functions.lock().expect("function map poisoned");
            if !force && !functions.contains_key(&name) {
                return Err(RegistryError::NotRegistered(name));
            }
            functions.insert(name.clone(), Arc::new(def));
        }
        self.notify(&name);
        Ok(())
    }

    /// Whether a definition with this name exists.
    pub fn has(&self, name: &str) -> bool {
        self.inner
            .functions
            .lock()
            .expect("function map poisoned")
            .contains_key(name)
    }

    /// Look up a definition by name.
    pub fn get(&self, name: &str) -> Option<Arc<FunctionDef<Ctx>>> {
        self.inner
            .functions
            .lock()
            .expect("function map poisoned")
            .get(name)
            .cloned()
    }

    /// Names of all registered definitions.
    pub fn list(&self) -> Vec<String> {
        self.inner
            .functions
            .lock()
            .expect("function map poisoned")
            .keys()
            .cloned()
            .collect()
    }

    /// All registered definitions.
    pub fn definitions(&self) -> Vec<Arc<FunctionDef<Ctx>>> {
        self.inner
            .functions
            .lock()
            .expect("function map poisoned")
            .values()
            .cloned()
            .collect()
    }

    /// The invocation kind of a registered definition.
    pub fn kind_of(&self, name: &str) -> Option<FunctionKind> {
        self.get(name).map(|def| def.kind())
    }

    /// Subscribe to registration/update notifications.
    pub fn on_change(&self, listener: impl Fn(&str) + Send + Sync + 'static) {
        self.inner
            .listeners
            .lock()
            .expect("listener list poisoned")
            .push(Arc::new(listener));
    }

    /// Resolve the handler for a name, running its setup at most once.
    ///
    /// # Errors
    ///
    /// Returns `CallError::FunctionNotFound` for unknown names and
    /// `CallError::Setup` when resolution fails.
    pub async fn get_handler(&self, name: &str) -> Result<Handler, CallError> {
        let def = self
            .get(name)
            .ok_or_else(|| CallError::FunctionNotFound(name.to_string()))?;
        def.get_handler(&self.inner.context).await
    }

    /// A shareable [`FunctionCaller`] view of this collector.
    pub fn caller(&self) -> Arc<dyn FunctionCaller> {
        Arc::new(self.clone())
    }

    // Listeners run outside the registry lock; a panicking listener is the
    // caller's bug, not the collector's state corruption.
    fn notify(&self, name: &str) {
        let listeners: Vec<ChangeListener> = self
            .inner
            .listeners
            .lock()
            .expect("listener list poisoned")
            .clone();
        for listener in listeners {
            listener(name);
        }
    }
}

#[async_trait]
impl<Ctx: Clone + Send + Sync + 'static> FunctionCaller for Collector<Ctx> {
    async fn call(&self, name: &str, args: Vec<Value>) -> Result<Value, CallError> {
        let def = self
            .get(name)
            .ok_or_else(|| CallError::FunctionNotFound(name.to_string()))?;
        def.invoke(&self.inner.context, args).await
    }

    fn has(&self, name: &str) -> bool {
        Collector::has(self, name)
    }

    fn names(&self) -> Vec<String> {
        self.list()
    }
}
