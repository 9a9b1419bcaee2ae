//! Condition model
//!
//! Pure predicates over (event, resource) pairs. Conditions carry no state
//! beyond their construction parameters; unspecified fields are "don't
//! care".

use std::fmt;
use std::sync::Arc;

use crate::event::EventName;
use crate::resource::ResourceRef;

/// Predicate selecting which (event, resource) pairs a subscriber cares about
pub trait Condition: Send + Sync {
    /// Does this resource match, regardless of event?
    fn matches(&self, resource: &ResourceRef) -> bool;

    /// Does this (event, resource) pair match? Defaults to ignoring the
    /// event name.
    fn matches_event(&self, _event: &EventName, resource: &ResourceRef) -> bool {
        self.matches(resource)
    }

    /// Human-readable description for logs
    fn describe(&self) -> String;
}

/// Matches resources by type, optionally narrowed by exact name, direct
/// parent type, or the presence of an ancestor of a given type.
#[derive(Debug, Clone, Default)]
pub struct ResourceCondition {
    /// Required resource type, if any
    pub resource_type: Option<String>,
    /// Required exact resource name, if any
    pub resource_name: Option<String>,
    /// Required type of the direct parent, if any
    pub parent_type: Option<String>,
    /// Required type of some ancestor on the parent chain, if any
    pub ancestor_type: Option<String>,
}

impl ResourceCondition {
    /// Match any resource of the given type
    pub fn of_type(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: Some(resource_type.into()),
            ..Self::default()
        }
    }

    /// Additionally require an exact name
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.resource_name = Some(name.into());
        self
    }

    /// Additionally require the direct parent's type
    pub fn with_parent_type(mut self, parent_type: impl Into<String>) -> Self {
        self.parent_type = Some(parent_type.into());
        self
    }

    /// Additionally require an ancestor of the given type on the parent chain
    pub fn with_ancestor_type(mut self, ancestor_type: impl Into<String>) -> Self {
        self.ancestor_type = Some(ancestor_type.into());
        self
    }

    fn has_ancestor_of_type(resource: &ResourceRef, ancestor_type: &str) -> bool {
        let mut current = resource.parent_resource();
        while let Some(ancestor) = current {
            if ancestor.resource_type() == ancestor_type {
                return true;
            }
            current = ancestor.parent_resource();
        }
        false
    }
}

impl Condition for ResourceCondition {
    fn matches(&self, resource: &ResourceRef) -> bool {
        if let Some(resource_type) = &self.resource_type {
            if resource.resource_type() != resource_type {
                return false;
            }
        }
        if let Some(name) = &self.resource_name {
            if resource.name() != name {
                return false;
            }
        }
        if let Some(parent_type) = &self.parent_type {
            match resource.parent_resource() {
                Some(parent) if parent.resource_type() == parent_type => {}
                _ => return false,
            }
        }
        if let Some(ancestor_type) = &self.ancestor_type {
            if !Self::has_ancestor_of_type(resource, ancestor_type) {
                return false;
            }
        }
        true
    }

    fn describe(&self) -> String {
        format!(
            "ResourceCondition(type={:?}, name={:?})",
            self.resource_type, self.resource_name
        )
    }
}

/// A [`ResourceCondition`] additionally scoped to one event name
#[derive(Debug, Clone)]
pub struct EventCondition {
    /// The one event this condition fires on
    pub event: EventName,
    /// Resource narrowing
    pub resource: ResourceCondition,
}

impl EventCondition {
    /// Condition on an event for any resource
    pub fn on(event: EventName) -> Self {
        Self {
            event,
            resource: ResourceCondition::default(),
        }
    }

    /// Condition on an event for resources matching `resource`
    pub fn new(event: EventName, resource: ResourceCondition) -> Self {
        Self { event, resource }
    }
}

impl Condition for EventCondition {
    fn matches(&self, resource: &ResourceRef) -> bool {
        self.resource.matches(resource)
    }

    fn matches_event(&self, event: &EventName, resource: &ResourceRef) -> bool {
        *event == self.event && self.matches(resource)
    }

    fn describe(&self) -> String {
        format!("EventCondition(event={}, {})", self.event, self.resource.describe())
    }
}

/// A fixed event name wrapping an arbitrary resource predicate.
///
/// Converts a handler's generic resource interest ("any sqs resource") into
/// a subscription on one internal event.
#[derive(Clone)]
pub struct DelegatedEventCondition {
    event: EventName,
    delegate: Arc<dyn Condition>,
}

impl DelegatedEventCondition {
    /// Scope `delegate` to fire only on `event`
    pub fn new(event: EventName, delegate: Arc<dyn Condition>) -> Self {
        Self { event, delegate }
    }
}

impl Condition for DelegatedEventCondition {
    fn matches(&self, resource: &ResourceRef) -> bool {
        self.delegate.matches(resource)
    }

    fn matches_event(&self, event: &EventName, resource: &ResourceRef) -> bool {
        *event == self.event && self.delegate.matches(resource)
    }

    fn describe(&self) -> String {
        format!(
            "DelegatedEventCondition(event={}, {})",
            self.event,
            self.delegate.describe()
        )
    }
}

impl fmt::Debug for DelegatedEventCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::Resource;

    #[test]
    fn test_type_matches_any_name() {
        let condition = ResourceCondition::of_type("sqs");
        let q1 = Resource::new("q1", "sqs").into_ref();
        let q2 = Resource::new("q2", "sqs").into_ref();
        let i1 = Resource::new("i1", "ec2instance").into_ref();

        assert!(condition.matches(&q1));
        assert!(condition.matches(&q2));
        assert!(!condition.matches(&i1));
    }

    #[test]
    fn test_name_narrows_match() {
        let condition = ResourceCondition::of_type("sqs").named("q1");
        let q1 = Resource::new("q1", "sqs").into_ref();
        let q2 = Resource::new("q2", "sqs").into_ref();

        assert!(condition.matches(&q1));
        assert!(!condition.matches(&q2));
    }

    #[test]
    fn test_parent_type() {
        let vpc = Resource::new("vpc1", "vpc").into_ref();
        let subnet = Resource::new("subnet1", "subnet").into_ref();
        subnet.set_parent(&vpc);
        let orphan = Resource::new("subnet2", "subnet").into_ref();

        let condition = ResourceCondition::of_type("subnet").with_parent_type("vpc");
        assert!(condition.matches(&subnet));
        assert!(!condition.matches(&orphan));
    }

    #[test]
    fn test_ancestor_walks_to_root() {
        let vpc = Resource::new("vpc1", "vpc").into_ref();
        let subnet = Resource::new("subnet1", "subnet").into_ref();
        subnet.set_parent(&vpc);
        let instance = Resource::new("i1", "ec2instance").into_ref();
        instance.set_parent(&subnet);

        let condition = ResourceCondition::default().with_ancestor_type("vpc");
        assert!(condition.matches(&instance));
        assert!(condition.matches(&subnet));
        // The vpc itself has no vpc ancestor
        assert!(!condition.matches(&vpc));
    }

    #[test]
    fn test_event_condition_scopes_event() {
        let q1 = Resource::new("q1", "sqs").into_ref();
        let condition = EventCondition::new(EventName::Register, ResourceCondition::of_type("sqs"));

        assert!(condition.matches_event(&EventName::Register, &q1));
        assert!(!condition.matches_event(&EventName::Activate, &q1));
    }

    #[test]
    fn test_delegated_condition() {
        let q1 = Resource::new("q1", "sqs").into_ref();
        let delegated = DelegatedEventCondition::new(
            EventName::Subscribe,
            Arc::new(ResourceCondition::of_type("sqs")),
        );

        assert!(delegated.matches_event(&EventName::Subscribe, &q1));
        assert!(!delegated.matches_event(&EventName::Register, &q1));
        assert!(delegated.matches(&q1));
    }
}
