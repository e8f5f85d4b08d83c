//! Capability registry mapping `resource#action` paths to callables.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{SchedError, SchedResult};
use crate::job::{JobError, JobPath};

/// A registered action: positional JSON arguments in, JSON value out.
pub type Action = Arc<dyn Fn(&[Value]) -> Result<Value, ActionError> + Send + Sync>;

/// Failure raised by an action. Recorded on the job as its error class and message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionError {
    pub class: String,
    pub message: String,
}

impl ActionError {
    pub fn new(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: class.into(),
            message: message.into(),
        }
    }

    /// Bad or missing arguments.
    pub fn argument(message: impl Into<String>) -> Self {
        Self::new("ArgumentError", message)
    }
}

impl std::fmt::Display for ActionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.class, self.message)
    }
}

impl std::error::Error for ActionError {}

impl From<ActionError> for JobError {
    fn from(e: ActionError) -> Self {
        JobError::new(e.class, e.message)
    }
}

/// Decode positional argument `idx`.
pub fn arg<T: DeserializeOwned>(args: &[Value], idx: usize) -> Result<T, ActionError> {
    let value = args
        .get(idx)
        .ok_or_else(|| ActionError::argument(format!("missing argument {idx}")))?;
    serde_json::from_value(value.clone())
        .map_err(|e| ActionError::argument(format!("argument {idx}: {e}")))
}

/// Named actions exposed by one resource.
#[derive(Clone, Default)]
pub struct Resource {
    actions: FxHashMap<String, Action>,
}

impl Resource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an action.
    pub fn action<F>(mut self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, ActionError> + Send + Sync + 'static,
    {
        self.actions.insert(name.into(), Arc::new(f));
        self
    }

    /// List action names.
    pub fn actions(&self) -> Vec<String> {
        let mut names: Vec<_> = self.actions.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Registry of resources, built once at startup.
#[derive(Clone, Default)]
pub struct Registry {
    resources: FxHashMap<String, Resource>,
}

impl Registry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource, replacing any previous one with the same name.
    pub fn register(&mut self, name: impl Into<String>, resource: Resource) {
        self.resources.insert(name.into(), resource);
    }

    /// Builder form of [`Registry::register`].
    pub fn with_resource(mut self, name: impl Into<String>, resource: Resource) -> Self {
        self.register(name, resource);
        self
    }

    /// Look up the action for a parsed path.
    pub fn resolve(&self, path: &JobPath) -> SchedResult<Action> {
        let resource = self
            .resources
            .get(&path.resource)
            .ok_or_else(|| SchedError::InvalidPath(format!("unknown resource {}", path.resource)))?;

        resource
            .actions
            .get(&path.action)
            .cloned()
            .ok_or_else(|| SchedError::InvalidAction {
                resource: path.resource.clone(),
                action: path.action.clone(),
            })
    }

    /// Parse and resolve a raw path string.
    pub fn resolve_path(&self, path: &str) -> SchedResult<Action> {
        self.resolve(&JobPath::parse(path)?)
    }

    /// Check if a path resolves.
    pub fn contains(&self, path: &str) -> bool {
        self.resolve_path(path).is_ok()
    }

    /// Every registered path, sorted.
    pub fn paths(&self) -> Vec<String> {
        let mut paths: Vec<_> = self
            .resources
            .iter()
            .flat_map(|(name, resource)| {
                resource
                    .actions
                    .keys()
                    .map(move |action| format!("{name}#{action}"))
            })
            .collect();
        paths.sort();
        paths
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("paths", &self.paths())
            .finish()
    }
}
