//! Handler registry
//!
//! Builds and owns the name -> operation map by collecting declared
//! operations from a fixed set of handler classes, and resolves at
//! most one instance per class, lazily, on the first call that needs
//! it. Construction failures are startup configuration errors; they
//! never surface as per-request conditions.

use crate::descriptor::{Operation, OperationDescriptor};
use anyhow::anyhow;
use std::any::{Any, TypeId};
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors detected while building the registry; all are fatal at
/// startup
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("An RPC with the name {name} is already known (declared by {first} and {second})")]
    DuplicateOperation {
        name: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("Parameter {parameter} of {operation} declares more than one requirement kind")]
    ConflictingRequirement {
        operation: String,
        parameter: &'static str,
    },

    #[error("Parameter {parameter} of {operation} has an unusable default: {message}")]
    InvalidDefault {
        operation: String,
        parameter: &'static str,
        message: String,
    },

    #[error("Operation {operation} declares no body")]
    MissingBody { operation: String },
}

/// An independently authored object exposing named operations
///
/// Instances are created at most once per class, on the first call
/// that needs them, and shut down exactly once at server teardown if
/// they were constructed at all.
pub trait Handler: Send + Sync + 'static {
    /// Teardown hook; failures are logged and isolated from other
    /// handlers
    fn shutdown(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// The registration contract a handler class fulfils
///
/// `operations` is callable without an instance so the registry can be
/// built, and its name collisions detected, before anything is
/// constructed. `construct` receives the registry to enable
/// cross-handler calls later on (store a [`std::sync::Weak`] if the
/// instance needs it).
pub trait HandlerFactory: Handler + Sized {
    fn operations() -> Vec<OperationDescriptor>;

    fn construct(registry: &Arc<HandlerRegistry>) -> anyhow::Result<Self>;
}

/// A handler class as supplied to [`HandlerRegistry::build`]
pub struct HandlerClass {
    name: &'static str,
    type_id: TypeId,
    operations: fn() -> Vec<OperationDescriptor>,
    construct: fn(&Arc<HandlerRegistry>) -> anyhow::Result<HandlerInstance>,
}

impl HandlerClass {
    pub fn of<H: HandlerFactory>() -> Self {
        Self {
            name: std::any::type_name::<H>(),
            type_id: TypeId::of::<H>(),
            operations: H::operations,
            construct: |registry| {
                let handler = Arc::new(H::construct(registry)?);
                Ok(HandlerInstance::new(handler))
            },
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// A constructed handler, shared between the instance cache and any
/// in-flight invocations
#[derive(Clone)]
pub struct HandlerInstance {
    handler: Arc<dyn Handler>,
    concrete: Arc<dyn Any + Send + Sync>,
}

impl HandlerInstance {
    fn new<H: Handler>(handler: Arc<H>) -> Self {
        Self {
            handler: handler.clone(),
            concrete: handler,
        }
    }

    pub(crate) fn downcast_ref<H: Handler>(&self) -> Option<&H> {
        self.concrete.downcast_ref::<H>()
    }
}

/// One entry of the name -> operation map
pub struct RegisteredOperation {
    class: usize,
    operation: Operation,
}

impl RegisteredOperation {
    pub fn operation(&self) -> &Operation {
        &self.operation
    }
}

/// Owns the operation map and the per-class instance cache
pub struct HandlerRegistry {
    classes: Vec<HandlerClass>,
    by_type: HashMap<TypeId, usize>,
    operations: HashMap<String, RegisteredOperation>,
    instances: Mutex<HashMap<usize, HandlerInstance>>,
    shut_down: AtomicBool,
}

impl HandlerRegistry {
    /// Build the registry from a fixed collection of handler classes
    ///
    /// Fails fast on any configuration error; in particular no two
    /// discovered operations may share a name.
    pub fn build(classes: Vec<HandlerClass>) -> Result<Self, ConfigError> {
        let mut operations: HashMap<String, RegisteredOperation> = HashMap::new();
        let mut by_type = HashMap::new();

        for (index, class) in classes.iter().enumerate() {
            by_type.insert(class.type_id, index);
            for descriptor in (class.operations)() {
                let operation = descriptor.finalize()?;
                match operations.entry(operation.name().to_string()) {
                    Entry::Occupied(existing) => {
                        return Err(ConfigError::DuplicateOperation {
                            name: operation.name().to_string(),
                            first: classes[existing.get().class].name,
                            second: class.name,
                        });
                    }
                    Entry::Vacant(slot) => {
                        slot.insert(RegisteredOperation {
                            class: index,
                            operation,
                        });
                    }
                }
            }
        }

        debug!(
            "Registry built: {} operations across {} handler classes",
            operations.len(),
            classes.len()
        );

        Ok(Self {
            classes,
            by_type,
            operations,
            instances: Mutex::new(HashMap::new()),
            shut_down: AtomicBool::new(false),
        })
    }

    /// Look up an operation by name
    pub fn operation(&self, name: &str) -> Option<&RegisteredOperation> {
        self.operations.get(name)
    }

    /// All registered operations, in no particular order
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.operations.values().map(|entry| &entry.operation)
    }

    /// Resolve the handler instance an operation dispatches to,
    /// constructing and caching it on first use
    pub(crate) fn resolve_for(
        self: &Arc<Self>,
        entry: &RegisteredOperation,
    ) -> anyhow::Result<HandlerInstance> {
        self.resolve_class(entry.class)
    }

    /// Resolve a handler by its concrete type, for cross-handler calls
    pub fn resolve<H: HandlerFactory>(self: &Arc<Self>) -> anyhow::Result<Arc<H>> {
        let index = self
            .by_type
            .get(&TypeId::of::<H>())
            .copied()
            .ok_or_else(|| {
                anyhow!(
                    "handler {} is not registered",
                    std::any::type_name::<H>()
                )
            })?;
        let instance = self.resolve_class(index)?;
        instance
            .concrete
            .clone()
            .downcast::<H>()
            .map_err(|_| anyhow!("handler {} has an unexpected type", self.classes[index].name))
    }

    // Check-then-create is one atomic region: two racing first calls
    // observe a single construction. Cached hits pay only the lock.
    fn resolve_class(self: &Arc<Self>, index: usize) -> anyhow::Result<HandlerInstance> {
        let mut instances = self.lock_instances();
        if let Some(instance) = instances.get(&index) {
            return Ok(instance.clone());
        }

        let class = &self.classes[index];
        debug!("Constructing handler instance: {}", class.name);
        let instance = (class.construct)(self)?;
        instances.insert(index, instance.clone());
        Ok(instance)
    }

    /// Notify every constructed handler exactly once; never forces
    /// construction, and one handler's failure does not block the rest
    pub fn shutdown_all(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }

        let constructed: Vec<(usize, HandlerInstance)> =
            self.lock_instances().drain().collect();
        for (index, instance) in constructed {
            if let Err(e) = instance.handler.shutdown() {
                warn!(
                    "Handler {} failed to shut down: {}",
                    self.classes[index].name, e
                );
            }
        }
    }

    fn lock_instances(&self) -> MutexGuard<'_, HashMap<usize, HandlerInstance>> {
        self.instances.lock().unwrap_or_else(|e| e.into_inner())
    }
}
