//! Handler-dispatch engine
//!
//! Binds handlers to the events they declare interest in and fans every bus
//! event out to the matching subset, conjoining their results. The
//! dispatcher registers itself on the bus as a universal listener, making
//! it the single point through which every publish flows before any handler
//! sees it.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};
use tracing::{debug, error, info, warn};

use crate::bus::{EventBus, PublishTarget};
use crate::condition::{Condition, DelegatedEventCondition};
use crate::errors::EngineResult;
use crate::event::{EventName, Payload};
use crate::resource::ResourceRef;

/// Capability implemented by anything that reacts to events.
///
/// Returning `Ok(false)` or `Err` signals failure for that event to the
/// dispatch engine's conjunction.
pub trait Handler: Send + Sync {
    /// The event names this handler cares about
    fn event_names(&self) -> Vec<EventName>;

    /// The condition selecting applicable resources for `event`
    fn event_condition(&self, event: &EventName) -> Option<Arc<dyn Condition>>;

    /// React to an event
    fn handle_event(
        &self,
        event: &EventName,
        resource: &ResourceRef,
        payload: Option<&Payload>,
    ) -> EngineResult<bool>;
}

/// Lifts a bare function into the [`Handler`] capability for one event
pub struct FnHandler<F> {
    event: EventName,
    condition: Arc<dyn Condition>,
    func: F,
}

impl<F> FnHandler<F>
where
    F: Fn(&EventName, &ResourceRef, Option<&Payload>) -> EngineResult<bool> + Send + Sync,
{
    /// Wrap `func` to run on `event` for resources matching `condition`
    pub fn new(event: EventName, condition: Arc<dyn Condition>, func: F) -> Self {
        Self {
            event,
            condition,
            func,
        }
    }
}

impl<F> Handler for FnHandler<F>
where
    F: Fn(&EventName, &ResourceRef, Option<&Payload>) -> EngineResult<bool> + Send + Sync,
{
    fn event_names(&self) -> Vec<EventName> {
        vec![self.event.clone()]
    }

    fn event_condition(&self, event: &EventName) -> Option<Arc<dyn Condition>> {
        (*event == self.event).then(|| self.condition.clone())
    }

    fn handle_event(
        &self,
        event: &EventName,
        resource: &ResourceRef,
        payload: Option<&Payload>,
    ) -> EngineResult<bool> {
        (self.func)(event, resource, payload)
    }
}

/// Builds a handler from a resource's `behavior` specification
pub type BehaviorFactory =
    Arc<dyn Fn(&ResourceRef, &Payload) -> EngineResult<Arc<dyn Handler>> + Send + Sync>;

struct Bundle {
    condition: Arc<dyn Condition>,
    handler: Arc<dyn Handler>,
}

/// Routes bus events to registered handlers
pub struct Dispatcher {
    bus: Arc<EventBus>,
    handlers: RwLock<HashMap<EventName, Vec<Bundle>>>,
    behaviors: RwLock<HashMap<String, BehaviorFactory>>,
}

impl Dispatcher {
    /// Create a dispatcher and install it as the bus's universal listener
    pub fn install(bus: Arc<EventBus>) -> Arc<Self> {
        let dispatcher = Arc::new(Self {
            bus,
            handlers: RwLock::new(HashMap::new()),
            behaviors: RwLock::new(HashMap::new()),
        });

        let weak: Weak<Dispatcher> = Arc::downgrade(&dispatcher);
        dispatcher.bus.subscribe(
            Arc::new(|_, _, _| true),
            Arc::new(move |event, resource, payload| match weak.upgrade() {
                Some(dispatcher) => dispatcher.handle_event(event, resource, payload),
                None => Ok(true),
            }),
        );

        info!("dispatch engine installed");
        dispatcher
    }

    /// Register a handler under every event it declares interest in.
    ///
    /// Lifecycle interests (`subscribe`, `register`, `activate`) are stored
    /// behind a [`DelegatedEventCondition`] so the handler's resource
    /// interest is scoped to the bus's internal event. A non-action event
    /// additionally triggers an immediate `subscribe` publish against
    /// currently-matching resources, so handlers registered after resources
    /// already exist are still notified once for the backlog.
    pub fn register_handler(&self, handler: Arc<dyn Handler>) {
        for event in handler.event_names() {
            let Some(condition) = handler.event_condition(&event) else {
                warn!(event = %event, "handler declared interest but returned no condition");
                continue;
            };
            info!(event = %event, condition = %condition.describe(), "registerHandler");

            match event {
                EventName::Subscribe | EventName::Register | EventName::Activate => {
                    let delegated =
                        Arc::new(DelegatedEventCondition::new(event.clone(), condition));
                    self.add_bundle(event, delegated, handler.clone());
                }
                event if event.is_reserved_action() => {
                    // run/update/delete: covered by the general path, no
                    // backlog notification
                    self.add_bundle(event, condition, handler.clone());
                }
                event => {
                    self.add_bundle(event.clone(), condition.clone(), handler.clone());
                    self.bus.publish(
                        EventName::Subscribe,
                        PublishTarget::Matching(condition),
                        Some(serde_json::json!({ "eventName": event.as_str() })),
                    );
                }
            }
        }
    }

    /// Register a factory for `behavior` specs naming `name`
    pub fn register_behavior(&self, name: impl Into<String>, factory: BehaviorFactory) {
        self.behaviors
            .write()
            .expect("behavior lock poisoned")
            .insert(name.into(), factory);
    }

    /// Instantiate and register the handlers a resource declares in its
    /// `behavior` attribute. Unknown factory names are logged and skipped.
    pub fn bind_behaviors(&self, resource: &ResourceRef) {
        for spec in resource.behavior() {
            let factory = self
                .behaviors
                .read()
                .expect("behavior lock poisoned")
                .get(&spec.name)
                .cloned();
            match factory {
                Some(factory) => match factory(resource, &spec.config) {
                    Ok(handler) => self.register_handler(handler),
                    Err(err) => {
                        warn!(resource = %resource, behavior = %spec.name, error = %err,
                              "behavior factory failed")
                    }
                },
                None => {
                    warn!(resource = %resource, behavior = %spec.name, "unknown behavior factory")
                }
            }
        }
    }

    /// Fan an event out to every matching handler and conjoin the results.
    ///
    /// No matching handlers is trivial success. A handler error is logged
    /// and counted as `false`; it does not abort sibling handlers.
    pub fn handle_event(
        &self,
        event: &EventName,
        resource: &ResourceRef,
        payload: Option<&Payload>,
    ) -> EngineResult<bool> {
        let matching: Vec<Arc<dyn Handler>> = {
            let handlers = self.handlers.read().expect("handler lock poisoned");
            match handlers.get(event) {
                Some(bundles) => bundles
                    .iter()
                    .filter(|bundle| bundle.condition.matches_event(event, resource))
                    .map(|bundle| bundle.handler.clone())
                    .collect(),
                None => Vec::new(),
            }
        };

        if matching.is_empty() {
            debug!(event = %event, resource = %resource, "no handlers for event");
            return Ok(true);
        }

        let mut result = true;
        for handler in matching {
            match handler.handle_event(event, resource, payload) {
                Ok(ok) => result &= ok,
                Err(err) => {
                    error!(event = %event, resource = %resource, error = %err,
                           "handler raised, counting as false");
                    result = false;
                }
            }
        }
        Ok(result)
    }

    /// Drop all handler and behavior registrations. Called on engine stop.
    pub fn clear(&self) {
        self.handlers.write().expect("handler lock poisoned").clear();
        self.behaviors.write().expect("behavior lock poisoned").clear();
    }

    fn add_bundle(&self, event: EventName, condition: Arc<dyn Condition>, handler: Arc<dyn Handler>) {
        self.handlers
            .write()
            .expect("handler lock poisoned")
            .entry(event)
            .or_default()
            .push(Bundle { condition, handler });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ResourceCondition;
    use crate::errors::EngineError;
    use crate::registry::Registry;
    use crate::resource::Resource;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_handler(
        event: EventName,
        resource_type: &str,
        hits: Arc<AtomicUsize>,
        result: bool,
    ) -> Arc<dyn Handler> {
        Arc::new(FnHandler::new(
            event,
            Arc::new(ResourceCondition::of_type(resource_type)),
            move |_, _, _| {
                hits.fetch_add(1, Ordering::SeqCst);
                Ok(result)
            },
        ))
    }

    #[test]
    fn test_register_bucket_uses_delegated_condition() {
        let bus = Arc::new(EventBus::new());
        let dispatcher = Dispatcher::install(bus.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        dispatcher.register_handler(counting_handler(
            EventName::Register,
            "widget",
            hits.clone(),
            true,
        ));

        let widget = Resource::new("w1", "widget").into_ref();
        let other = Resource::new("x1", "gadget").into_ref();

        assert_eq!(bus.publish(EventName::Register, &widget, None).result(), Some(true));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Wrong type: no match, still trivially successful
        assert_eq!(bus.publish(EventName::Register, &other, None).result(), Some(true));
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Wrong event: the delegated condition gates on the event name
        bus.publish(EventName::Activate, &widget, None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_conjunction_with_erroring_handler() {
        let bus = Arc::new(EventBus::new());
        let dispatcher = Dispatcher::install(bus.clone());
        let hits = Arc::new(AtomicUsize::new(0));
        dispatcher.register_handler(counting_handler(
            EventName::Register,
            "widget",
            hits.clone(),
            true,
        ));
        dispatcher.register_handler(Arc::new(FnHandler::new(
            EventName::Register,
            Arc::new(ResourceCondition::of_type("widget")),
            |_, _, _| {
                Err(EngineError::HandlerFailed {
                    event: "register".into(),
                    reason: "boom".into(),
                })
            },
        )));

        let widget = Resource::new("w1", "widget").into_ref();
        let outcome = bus.publish(EventName::Register, &widget, None);
        assert_eq!(outcome.result(), Some(false));
        // The sibling handler still ran
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_late_handler_gets_subscribe_backlog() {
        let bus = Arc::new(EventBus::new());
        let registry = Registry::new(bus.clone());
        let dispatcher = Dispatcher::install(bus.clone());

        registry.add_resource(Resource::new("q1", "sqs").into_ref());
        registry.add_resource(Resource::new("q2", "sqs").into_ref());
        registry.add_resource(Resource::new("i1", "ec2instance").into_ref());

        // A handler for a domain event arrives after the resources exist;
        // its registration triggers one `subscribe` per matching resource.
        let seen = Arc::new(AtomicUsize::new(0));
        let subscribe_hits = seen.clone();
        dispatcher.register_handler(Arc::new(FnHandler::new(
            EventName::Subscribe,
            Arc::new(ResourceCondition::of_type("sqs")),
            move |_, _, payload| {
                assert_eq!(
                    payload.and_then(|p| p.get("eventName")).and_then(|v| v.as_str()),
                    Some("received"),
                );
                subscribe_hits.fetch_add(1, Ordering::SeqCst);
                Ok(true)
            },
        )));
        dispatcher.register_handler(Arc::new(FnHandler::new(
            EventName::Custom("received".into()),
            Arc::new(ResourceCondition::of_type("sqs")),
            |_, _, _| Ok(true),
        )));

        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_behavior_factory_binding() {
        let bus = Arc::new(EventBus::new());
        let dispatcher = Dispatcher::install(bus.clone());
        let hits = Arc::new(AtomicUsize::new(0));

        let factory_hits = hits.clone();
        dispatcher.register_behavior(
            "poller",
            Arc::new(move |_resource, _config| {
                let hits = factory_hits.clone();
                Ok(Arc::new(FnHandler::new(
                    EventName::Register,
                    Arc::new(ResourceCondition::of_type("sqs")),
                    move |_, _, _| {
                        hits.fetch_add(1, Ordering::SeqCst);
                        Ok(true)
                    },
                )) as Arc<dyn Handler>)
            }),
        );

        let resource = Resource::new("q1", "sqs")
            .with_behavior(crate::resource::BehaviorSpec::named("poller"))
            .into_ref();
        dispatcher.bind_behaviors(&resource);

        bus.publish(EventName::Register, &resource, None);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }
}
