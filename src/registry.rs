//! Resource registry
//!
//! Owns the authoritative resource tree, enforces name uniqueness, and
//! drives the lifecycle state machine by publishing bus events and reacting
//! to their aggregated outcomes. Activation propagates down the tree
//! through the cascade listener installed by [`Registry::start`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock, Weak};
use std::time::Duration;
use tracing::{info, warn};

use crate::bus::{EventBus, SubscriptionId};
use crate::condition::Condition;
use crate::errors::{EngineError, EngineResult};
use crate::event::EventName;
use crate::outcome::Outcome;
use crate::resource::{ParentRef, Resource, ResourceRef, ResourceState};

/// Name of the root sentinel resource
pub const ROOT_NAME: &str = "root";

/// Callback registering a resource's declared `behavior` handlers with the
/// dispatch engine. Installed at engine wiring time.
pub type BehaviorBinder = Arc<dyn Fn(&ResourceRef) + Send + Sync>;

/// The authoritative resource tree and lifecycle driver
pub struct Registry {
    bus: Arc<EventBus>,
    resources: RwLock<HashMap<String, ResourceRef>>,
    alt_names: RwLock<HashMap<String, String>>,
    root: ResourceRef,
    cascade: Mutex<Option<SubscriptionId>>,
    behavior_binder: RwLock<Option<BehaviorBinder>>,
}

impl Registry {
    /// Create a registry bound to `bus` and install the bus's condition
    /// resolver so `PublishTarget::Matching` expands against this registry.
    pub fn new(bus: Arc<EventBus>) -> Arc<Self> {
        let registry = Arc::new(Self {
            bus,
            resources: RwLock::new(HashMap::new()),
            alt_names: RwLock::new(HashMap::new()),
            root: Resource::new(ROOT_NAME, "root").into_ref(),
            cascade: Mutex::new(None),
            behavior_binder: RwLock::new(None),
        });

        let weak: Weak<Registry> = Arc::downgrade(&registry);
        registry.bus.set_resolver(Arc::new(move |condition: &dyn Condition| {
            match weak.upgrade() {
                Some(registry) => registry.get_matching_resources(condition),
                None => Vec::new(),
            }
        }));

        info!("registry created");
        registry
    }

    /// The bus this registry publishes lifecycle events on
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The root sentinel seeding the activation cascade
    pub fn root(&self) -> &ResourceRef {
        &self.root
    }

    /// Install the dispatcher-side callback that registers a resource's
    /// declared `behavior` handlers.
    pub fn set_behavior_binder(&self, binder: BehaviorBinder) {
        *self.behavior_binder.write().expect("binder lock poisoned") = Some(binder);
    }

    /// Install the activation cascade, then register and force-activate the
    /// root resource, seeding cascade activation for the rest of the tree.
    pub fn start(self: &Arc<Self>) {
        self.install_cascade();
        self.add_resource(self.root.clone());
        self.transition(&self.root, ResourceState::Activated);
        info!("registry started");
    }

    /// Drop all resources. Called on engine stop; a stopped registry can be
    /// discarded, not restarted.
    pub fn clear(&self) {
        self.resources.write().expect("resource lock poisoned").clear();
        self.alt_names.write().expect("alt name lock poisoned").clear();
    }

    /// Add a resource to the tree and begin driving it through the
    /// lifecycle.
    ///
    /// Failures never propagate to the caller: a duplicate name is logged
    /// and ignored, and attachment or registration failures surface as the
    /// resource's `Failed` state.
    pub fn add_resource(self: &Arc<Self>, resource: ResourceRef) {
        info!(resource = %resource, "addResource");

        if let Err(err) = self.insert(&resource) {
            warn!(resource = %resource, error = %err, "add rejected");
            return;
        }

        if let Err(err) = self.attach(&resource) {
            warn!(resource = %resource, error = %err, "attachment failed");
            self.transition(&resource, ResourceState::Failed);
            return;
        }

        self.transition(&resource, ResourceState::Added);

        if !resource.behavior().is_empty() {
            match &*self.behavior_binder.read().expect("binder lock poisoned") {
                Some(binder) => binder(&resource),
                None => warn!(resource = %resource, "behavior declared but no dispatch engine wired"),
            }
        }

        let registry = self.clone();
        let failed = resource.clone();
        let registered = resource.clone();
        self.bus
            .publish(EventName::Register, &resource, None)
            .on_success(move || registry.complete_registration(registered))
            .on_failure({
                let registry = self.clone();
                move || {
                    registry.transition(&failed, ResourceState::Failed);
                }
            });
    }

    /// Look up a resource by name or alternate name
    pub fn get_resource(&self, name: &str) -> Option<ResourceRef> {
        let resources = self.resources.read().expect("resource lock poisoned");
        if let Some(resource) = resources.get(name) {
            return Some(resource.clone());
        }
        let alt_names = self.alt_names.read().expect("alt name lock poisoned");
        alt_names.get(name).and_then(|primary| resources.get(primary).cloned())
    }

    /// Linear scan of all resources against a condition
    pub fn get_matching_resources(&self, condition: &dyn Condition) -> Vec<ResourceRef> {
        self.resources
            .read()
            .expect("resource lock poisoned")
            .values()
            .filter(|resource| condition.matches(resource))
            .cloned()
            .collect()
    }

    /// Transition a resource to `state` and publish the state's lowercase
    /// event name so other components (notably the cascade) can react.
    pub fn transition(self: &Arc<Self>, resource: &ResourceRef, state: ResourceState) -> Outcome {
        info!(resource = %resource, from = %resource.state(), to = %state, "transition");
        resource.set_state(state);
        self.bus
            .publish(state.event_name(), resource, None)
    }

    /// Fail every resource stuck in `PendingActivation` longer than
    /// `timeout`. Returns the number of resources failed.
    pub fn fail_stalled(self: &Arc<Self>, timeout: Duration) -> usize {
        let Ok(timeout) = chrono::Duration::from_std(timeout) else {
            return 0;
        };
        let Some(cutoff) = chrono::Utc::now().checked_sub_signed(timeout) else {
            return 0;
        };
        let stalled: Vec<ResourceRef> = self
            .resources
            .read()
            .expect("resource lock poisoned")
            .values()
            .filter(|resource| {
                resource.state() == ResourceState::PendingActivation
                    && resource.state_changed_at() < cutoff
            })
            .cloned()
            .collect();

        for resource in &stalled {
            warn!(resource = %resource, "activation stalled past timeout, failing");
            self.transition(resource, ResourceState::Failed);
        }
        stalled.len()
    }

    /// Log the current tree with states
    pub fn dump(&self) {
        for resource in self.resources.read().expect("resource lock poisoned").values() {
            info!(resource = %resource, state = %resource.state(), "dump");
        }
    }

    fn insert(&self, resource: &ResourceRef) -> EngineResult<()> {
        let mut resources = self.resources.write().expect("resource lock poisoned");
        let mut alt_names = self.alt_names.write().expect("alt name lock poisoned");

        if resources.contains_key(resource.name()) || alt_names.contains_key(resource.name()) {
            return Err(EngineError::DuplicateResource(resource.name().to_string()));
        }
        if let Some(alt) = resource.alt_name() {
            if resources.contains_key(alt) || alt_names.contains_key(alt) {
                return Err(EngineError::DuplicateResource(alt.to_string()));
            }
            alt_names.insert(alt.to_string(), resource.name().to_string());
        }
        resources.insert(resource.name().to_string(), resource.clone());
        Ok(())
    }

    fn attach(&self, resource: &ResourceRef) -> EngineResult<()> {
        match resource.parent_ref() {
            ParentRef::None => Ok(()),
            ParentRef::ByName(name) => {
                let parent = self
                    .get_resource(&name)
                    .ok_or(EngineError::UnknownParent(name))?;
                resource.set_parent(&parent);
                parent.add_child(resource.clone());
                Ok(())
            }
            ParentRef::Resolved(weak) => {
                let parent = weak
                    .upgrade()
                    .ok_or_else(|| EngineError::UnknownParent(resource.name().to_string()))?;
                parent.add_child(resource.clone());
                Ok(())
            }
        }
    }

    /// Registration side effects succeeded: mark `Registered`, then if the
    /// parent is already at least activated, drive activation immediately
    /// (otherwise the cascade will pick the resource up later).
    fn complete_registration(self: Arc<Self>, resource: ResourceRef) {
        self.transition(&resource, ResourceState::Registered);

        let Some(parent) = resource.parent_resource() else {
            return;
        };
        if parent.is_at_least(ResourceState::Activated) {
            self.activate(&resource);
        }
    }

    /// Publish `activate` and tie the resource's next state to the result
    fn activate(self: &Arc<Self>, resource: &ResourceRef) {
        let activated = resource.clone();
        let failed = resource.clone();
        let on_ok = self.clone();
        let on_err = self.clone();
        self.bus
            .publish(EventName::Activate, resource, None)
            .on_success(move || {
                // A handler may have moved the resource to
                // PendingActivation to finish asynchronously; in that case
                // the watcher publishes `activated` itself later.
                if activated.state() < ResourceState::PendingActivation {
                    on_ok.transition(&activated, ResourceState::Activated);
                }
            })
            .on_failure(move || {
                on_err.transition(&failed, ResourceState::Failed);
            });
    }

    fn install_cascade(self: &Arc<Self>) {
        let mut cascade = self.cascade.lock().expect("cascade lock poisoned");
        if cascade.is_some() {
            return;
        }

        let weak: Weak<Registry> = Arc::downgrade(self);
        let id = self.bus.subscribe(
            Arc::new(|event, _, _| *event == EventName::Activated),
            Arc::new(move |_, resource, _| {
                if let Some(registry) = weak.upgrade() {
                    // A bare `activated` publish is how a handler completes
                    // activation it deferred with `PendingActivation`; commit
                    // the state before cascading to children.
                    if resource.state() == ResourceState::PendingActivation {
                        info!(resource = %resource, "deferred activation completed");
                        resource.set_state(ResourceState::Activated);
                    }
                    for child in resource.children() {
                        if child.state() == ResourceState::Registered {
                            registry.activate(&child);
                        }
                    }
                }
                Ok(true)
            }),
        );
        *cascade = Some(id);
    }
}
