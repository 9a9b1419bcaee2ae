//! Resource entity and lifecycle states
//!
//! A [`Resource`] is a uniquely-named node in the managed tree. The registry
//! owns the authoritative map of resources; handlers and the bus share
//! resources through [`ResourceRef`] handles and mutate only the runtime
//! fields (state, children, dynamic state) behind their locks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock, Weak};
use std::time::{Duration, Instant};

use crate::event::{EventName, Payload};

/// Shared handle to a resource
pub type ResourceRef = Arc<Resource>;

/// Lifecycle state of a resource.
///
/// The declaration order carries the "activation progress" total order used
/// by [`Resource::is_at_least`]:
/// `Failed < Invalid < Added < Registered < PendingActivation < Activated`.
/// `Invalid` only exists before a resource is submitted to the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceState {
    /// Terminal failure at any lifecycle stage
    Failed,
    /// Constructed but not yet submitted to the registry
    Invalid,
    /// Accepted by the registry, registration side effects pending
    Added,
    /// Registration side effects succeeded
    Registered,
    /// Asynchronous activation work is outstanding
    PendingActivation,
    /// Fully operational
    Activated,
}

impl ResourceState {
    /// Canonical lowercase name
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Failed => "failed",
            Self::Invalid => "invalid",
            Self::Added => "added",
            Self::Registered => "registered",
            Self::PendingActivation => "pending_activation",
            Self::Activated => "activated",
        }
    }

    /// The notification event published when this state is reached
    pub fn event_name(&self) -> EventName {
        match self {
            Self::Failed => EventName::Failed,
            Self::Invalid => EventName::Invalid,
            Self::Added => EventName::Added,
            Self::Registered => EventName::Registered,
            Self::PendingActivation => EventName::PendingActivation,
            Self::Activated => EventName::Activated,
        }
    }
}

impl fmt::Display for ResourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Reference to a resource's parent.
///
/// A parent named by string is resolved once at attach time and cached as a
/// weak link (children never keep their parents alive).
#[derive(Debug, Clone, Default)]
pub enum ParentRef {
    /// No parent (the root sentinel)
    #[default]
    None,
    /// Parent named by registry key, resolved lazily at attach time
    ByName(String),
    /// Resolved parent link
    Resolved(Weak<Resource>),
}

/// Handler specification carried on a resource's `behavior` attribute.
///
/// The `name` selects a factory registered with the dispatch engine; the
/// factory receives `config` verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BehaviorSpec {
    /// Factory name
    pub name: String,
    /// Opaque factory configuration
    #[serde(default)]
    pub config: Payload,
}

impl BehaviorSpec {
    /// Spec with no configuration
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Payload::Null,
        }
    }
}

/// A declared, uniquely-named node in the managed tree
pub struct Resource {
    name: String,
    resource_type: String,
    alt_name: Option<String>,
    description: Payload,
    behavior: Vec<BehaviorSpec>,
    parent: RwLock<ParentRef>,
    children: RwLock<Vec<ResourceRef>>,
    state: RwLock<ResourceState>,
    state_changed_at: RwLock<DateTime<Utc>>,
    dynamic_state: RwLock<serde_json::Map<String, Payload>>,
}

impl Resource {
    /// Create a resource in state `Invalid` with no parent
    pub fn new(name: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            resource_type: resource_type.into(),
            alt_name: None,
            description: Payload::Null,
            behavior: Vec::new(),
            parent: RwLock::new(ParentRef::None),
            children: RwLock::new(Vec::new()),
            state: RwLock::new(ResourceState::Invalid),
            state_changed_at: RwLock::new(Utc::now()),
            dynamic_state: RwLock::new(serde_json::Map::new()),
        }
    }

    /// Set the parent by registry name, to be resolved at attach time
    pub fn with_parent_name(self, parent: impl Into<String>) -> Self {
        *self.parent.write().expect("parent lock poisoned") = ParentRef::ByName(parent.into());
        self
    }

    /// Set the parent directly to an already-known resource
    pub fn with_parent(self, parent: &ResourceRef) -> Self {
        *self.parent.write().expect("parent lock poisoned") =
            ParentRef::Resolved(Arc::downgrade(parent));
        self
    }

    /// Set the secondary unique key
    pub fn with_alt_name(mut self, alt_name: impl Into<String>) -> Self {
        self.alt_name = Some(alt_name.into());
        self
    }

    /// Set the type-specific description consumed by handlers
    pub fn with_description(mut self, description: Payload) -> Self {
        self.description = description;
        self
    }

    /// Add a handler specification to auto-register on add
    pub fn with_behavior(mut self, spec: BehaviorSpec) -> Self {
        self.behavior.push(spec);
        self
    }

    /// Finish construction, producing a shareable handle
    pub fn into_ref(self) -> ResourceRef {
        Arc::new(self)
    }

    /// Globally unique registry key
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Domain category ("ec2instance", "sqs", a file extension, ...)
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Secondary unique key, if any
    pub fn alt_name(&self) -> Option<&str> {
        self.alt_name.as_deref()
    }

    /// Opaque type-specific configuration
    pub fn description(&self) -> &Payload {
        &self.description
    }

    /// Handler specifications declared on the resource
    pub fn behavior(&self) -> &[BehaviorSpec] {
        &self.behavior
    }

    /// Current lifecycle state
    pub fn state(&self) -> ResourceState {
        *self.state.read().expect("state lock poisoned")
    }

    /// When the current state was entered
    pub fn state_changed_at(&self) -> DateTime<Utc> {
        *self.state_changed_at.read().expect("state lock poisoned")
    }

    /// Whether the resource has progressed at least as far as `state`
    pub fn is_at_least(&self, state: ResourceState) -> bool {
        self.state() >= state
    }

    /// Set the state and stamp the transition time.
    ///
    /// Registry-internal: callers outside the registry go through
    /// `Registry::transition` so the state notification event is published.
    pub(crate) fn set_state(&self, state: ResourceState) {
        *self.state.write().expect("state lock poisoned") = state;
        *self.state_changed_at.write().expect("state lock poisoned") = Utc::now();
    }

    /// The parent reference as currently known
    pub fn parent_ref(&self) -> ParentRef {
        self.parent.read().expect("parent lock poisoned").clone()
    }

    /// The resolved parent, if attached and still alive
    pub fn parent_resource(&self) -> Option<ResourceRef> {
        match &*self.parent.read().expect("parent lock poisoned") {
            ParentRef::Resolved(weak) => weak.upgrade(),
            _ => None,
        }
    }

    /// Cache a resolved parent link
    pub(crate) fn set_parent(&self, parent: &ResourceRef) {
        *self.parent.write().expect("parent lock poisoned") =
            ParentRef::Resolved(Arc::downgrade(parent));
    }

    /// Snapshot of the ordered children
    pub fn children(&self) -> Vec<ResourceRef> {
        self.children.read().expect("children lock poisoned").clone()
    }

    /// Append a successfully attached child
    pub(crate) fn add_child(&self, child: ResourceRef) {
        self.children.write().expect("children lock poisoned").push(child);
    }

    /// Read a runtime-observed fact
    pub fn dynamic(&self, key: &str) -> Option<Payload> {
        self.dynamic_state
            .read()
            .expect("dynamic state lock poisoned")
            .get(key)
            .cloned()
    }

    /// Record a runtime-observed fact (mutated only by handlers)
    pub fn set_dynamic(&self, key: impl Into<String>, value: Payload) {
        self.dynamic_state
            .write()
            .expect("dynamic state lock poisoned")
            .insert(key.into(), value);
    }

    /// Bounded sleep-and-recheck poll until the resource is at least as
    /// active as `state`. Observability helper for callers and tests; not
    /// part of the reconciliation path.
    pub fn wait_for_state(&self, state: ResourceState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        loop {
            if self.is_at_least(state) {
                return true;
            }
            if Instant::now() >= deadline {
                return false;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

impl fmt::Debug for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resource")
            .field("name", &self.name)
            .field("type", &self.resource_type)
            .field("state", &self.state())
            .finish()
    }
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.resource_type)
    }
}
