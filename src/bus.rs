//! Event bus
//!
//! Routes named events carrying a resource and optional payload to every
//! subscribed listener whose condition matches, and combines listener
//! results into a single [`Outcome`]. Supports suspend/resume batching so a
//! bulk loader can register a whole tree before any cascade begins.
//!
//! The bus holds no lock while listener callbacks run: callbacks routinely
//! re-enter the bus (transitions publish further events).

use std::sync::{Arc, Mutex, RwLock};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::condition::Condition;
use crate::errors::EngineResult;
use crate::event::{EventName, Payload};
use crate::outcome::Outcome;
use crate::resource::ResourceRef;

/// Predicate deciding whether a listener sees a publish
pub type ListenerCondition =
    Arc<dyn Fn(&EventName, &ResourceRef, Option<&Payload>) -> bool + Send + Sync>;

/// Listener callback; `Err` is logged and counted as a `false` result
pub type ListenerCallback =
    Arc<dyn Fn(&EventName, &ResourceRef, Option<&Payload>) -> EngineResult<bool> + Send + Sync>;

/// Expands a condition to the currently-registered matching resources.
/// Installed by the registry at engine wiring time.
pub type ConditionResolver = Arc<dyn Fn(&dyn Condition) -> Vec<ResourceRef> + Send + Sync>;

/// Opaque handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

#[derive(Clone)]
struct Listener {
    id: SubscriptionId,
    condition: ListenerCondition,
    callback: ListenerCallback,
}

/// What a publish is addressed to
#[derive(Clone)]
pub enum PublishTarget {
    /// One resource
    Resource(ResourceRef),
    /// A collection; the event is published once per element in order
    Many(Vec<ResourceRef>),
    /// All currently-registered resources matching a condition
    Matching(Arc<dyn Condition>),
}

impl From<ResourceRef> for PublishTarget {
    fn from(resource: ResourceRef) -> Self {
        Self::Resource(resource)
    }
}

impl From<&ResourceRef> for PublishTarget {
    fn from(resource: &ResourceRef) -> Self {
        Self::Resource(resource.clone())
    }
}

impl From<Vec<ResourceRef>> for PublishTarget {
    fn from(resources: Vec<ResourceRef>) -> Self {
        Self::Many(resources)
    }
}

struct QueuedPublish {
    event: EventName,
    target: PublishTarget,
    payload: Option<Payload>,
    placeholder: Outcome,
}

#[derive(Default)]
struct SuspendState {
    suspended: bool,
    queued: Vec<QueuedPublish>,
}

/// Condition-gated publish/subscribe bus with suspend/resume batching
pub struct EventBus {
    listeners: RwLock<Vec<Listener>>,
    suspend: Mutex<SuspendState>,
    resolver: RwLock<Option<ConditionResolver>>,
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(Vec::new()),
            suspend: Mutex::new(SuspendState::default()),
            resolver: RwLock::new(None),
        }
    }

    /// Install the resolver used to expand [`PublishTarget::Matching`]
    pub fn set_resolver(&self, resolver: ConditionResolver) {
        *self.resolver.write().expect("resolver lock poisoned") = Some(resolver);
    }

    /// Subscribe a listener; listeners are invoked in subscription order
    pub fn subscribe(
        &self,
        condition: ListenerCondition,
        callback: ListenerCallback,
    ) -> SubscriptionId {
        let id = SubscriptionId(Uuid::now_v7());
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .push(Listener {
                id,
                condition,
                callback,
            });
        debug!(?id, "subscribed listener");
        id
    }

    /// Remove a listener. Takes effect for subsequent publishes only; an
    /// in-flight publish works from a snapshot.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.listeners
            .write()
            .expect("listener lock poisoned")
            .retain(|listener| listener.id != id);
    }

    /// Queue publishes instead of delivering them
    pub fn suspend_events(&self) {
        self.suspend.lock().expect("suspend lock poisoned").suspended = true;
        info!("events suspended");
    }

    /// Replay every queued publish against the now-unsuspended bus.
    ///
    /// Replays run latest-first (reverse enqueue order) and the queue is
    /// drained to empty before this returns. Each queued placeholder
    /// resolves as its replay completes.
    pub fn resume_events(&self) {
        {
            self.suspend.lock().expect("suspend lock poisoned").suspended = false;
        }
        info!("events resumed, replaying queued publishes");
        loop {
            let next = self.suspend.lock().expect("suspend lock poisoned").queued.pop();
            let Some(queued) = next else { break };
            let outcome = self.deliver(&queued.event, queued.target, queued.payload.as_ref());
            let placeholder = queued.placeholder;
            outcome.when_resolved(move |ok| placeholder.resolve(ok));
        }
    }

    /// Publish an event.
    ///
    /// While suspended the call is recorded verbatim and an unresolved
    /// [`Outcome`] is returned; it resolves when the recorded call is
    /// replayed by [`EventBus::resume_events`].
    pub fn publish(
        &self,
        event: EventName,
        target: impl Into<PublishTarget>,
        payload: Option<Payload>,
    ) -> Outcome {
        let target = target.into();
        {
            let mut suspend = self.suspend.lock().expect("suspend lock poisoned");
            if suspend.suspended {
                debug!(event = %event, "publish queued while suspended");
                let placeholder = Outcome::pending();
                suspend.queued.push(QueuedPublish {
                    event,
                    target,
                    payload,
                    placeholder: placeholder.clone(),
                });
                return placeholder;
            }
        }
        self.deliver(&event, target, payload.as_ref())
    }

    fn deliver(&self, event: &EventName, target: PublishTarget, payload: Option<&Payload>) -> Outcome {
        match target {
            PublishTarget::Matching(condition) => {
                let resolver = self
                    .resolver
                    .read()
                    .expect("resolver lock poisoned")
                    .clone();
                let resources = match resolver {
                    Some(resolve) => resolve(condition.as_ref()),
                    None => {
                        warn!(event = %event, "no condition resolver installed, publish matches nothing");
                        Vec::new()
                    }
                };
                self.deliver(event, PublishTarget::Many(resources), payload)
            }
            PublishTarget::Many(resources) => resources
                .into_iter()
                .map(|resource| self.deliver(event, PublishTarget::Resource(resource), payload))
                .fold(Outcome::resolved(true), |combined, next| combined.and(&next)),
            PublishTarget::Resource(resource) => {
                debug!(event = %event, resource = %resource, "publish");
                // Snapshot: subscriptions made by a callback apply to
                // subsequent publishes only.
                let listeners: Vec<Listener> = self
                    .listeners
                    .read()
                    .expect("listener lock poisoned")
                    .clone();
                let mut result = true;
                for listener in listeners {
                    if !(listener.condition)(event, &resource, payload) {
                        continue;
                    }
                    match (listener.callback)(event, &resource, payload) {
                        Ok(ok) => result &= ok,
                        Err(err) => {
                            error!(event = %event, resource = %resource, error = %err,
                                   "listener failed, counting as false");
                            result = false;
                        }
                    }
                }
                Outcome::resolved(result)
            }
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::EngineError;
    use crate::resource::Resource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn any_event() -> ListenerCondition {
        Arc::new(|_, _, _| true)
    }

    fn counting(hits: Arc<AtomicUsize>, result: bool) -> ListenerCallback {
        Arc::new(move |_, _, _| {
            hits.fetch_add(1, Ordering::SeqCst);
            Ok(result)
        })
    }

    #[test]
    fn test_publish_invokes_matching_listeners() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(any_event(), counting(hits.clone(), true));
        bus.subscribe(
            Arc::new(|event, _, _| *event == EventName::Activate),
            counting(hits.clone(), true),
        );

        let resource = Resource::new("q1", "sqs").into_ref();
        let outcome = bus.publish(EventName::Register, &resource, None);

        assert_eq!(outcome.result(), Some(true));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_no_listeners_is_success() {
        let bus = EventBus::new();
        let resource = Resource::new("q1", "sqs").into_ref();
        let outcome = bus.publish(EventName::Register, &resource, None);
        assert_eq!(outcome.result(), Some(true));
    }

    #[test]
    fn test_listener_error_counts_as_false() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(
            any_event(),
            Arc::new(|_, _, _| {
                Err(EngineError::HandlerFailed {
                    event: "register".into(),
                    reason: "boom".into(),
                })
            }),
        );
        bus.subscribe(any_event(), counting(hits.clone(), true));

        let resource = Resource::new("q1", "sqs").into_ref();
        let outcome = bus.publish(EventName::Register, &resource, None);

        assert_eq!(outcome.result(), Some(false));
        // The error did not abort the sibling listener
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_list_target_publishes_per_element() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(any_event(), counting(hits.clone(), true));

        let resources = vec![
            Resource::new("a", "t").into_ref(),
            Resource::new("b", "t").into_ref(),
        ];
        let outcome = bus.publish(EventName::Register, resources, None);

        assert_eq!(outcome.result(), Some(true));
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_suspend_queues_and_resume_replays() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        bus.subscribe(any_event(), counting(hits.clone(), true));

        bus.suspend_events();
        let a = bus.publish(EventName::Register, Resource::new("a", "t").into_ref(), None);
        let b = bus.publish(EventName::Register, Resource::new("b", "t").into_ref(), None);

        // Nothing delivered, placeholders unresolved
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(a.result(), None);
        assert_eq!(b.result(), None);

        bus.resume_events();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
        assert_eq!(a.result(), Some(true));
        assert_eq!(b.result(), Some(true));
    }

    #[test]
    fn test_resume_replays_latest_first() {
        let bus = EventBus::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let seen = order.clone();
        bus.subscribe(
            any_event(),
            Arc::new(move |_, resource, _| {
                seen.lock().unwrap().push(resource.name().to_string());
                Ok(true)
            }),
        );

        bus.suspend_events();
        bus.publish(EventName::Register, Resource::new("first", "t").into_ref(), None);
        bus.publish(EventName::Register, Resource::new("second", "t").into_ref(), None);
        bus.resume_events();

        assert_eq!(*order.lock().unwrap(), vec!["second".to_string(), "first".to_string()]);
    }

    #[test]
    fn test_unsubscribe_applies_to_subsequent_publishes() {
        let bus = EventBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let id = bus.subscribe(any_event(), counting(hits.clone(), true));

        let resource = Resource::new("q1", "sqs").into_ref();
        bus.publish(EventName::Register, &resource, None);
        bus.unsubscribe(id);
        bus.publish(EventName::Register, &resource, None);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_reentrant_publish_from_callback() {
        let bus = Arc::new(EventBus::new());
        let inner_bus = bus.clone();
        let hits = Arc::new(AtomicUsize::new(0));
        let inner_hits = hits.clone();
        bus.subscribe(
            Arc::new(|event, _, _| *event == EventName::Register),
            Arc::new(move |_, resource, _| {
                inner_hits.fetch_add(1, Ordering::SeqCst);
                inner_bus.publish(EventName::Activate, resource, None);
                Ok(true)
            }),
        );

        let resource = Resource::new("q1", "sqs").into_ref();
        let outcome = bus.publish(EventName::Register, &resource, None);
        assert_eq!(outcome.result(), Some(true));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
