//! Engine assembly
//!
//! [`Engine`] owns the bus, registry, dispatch engine, and scheduler, and
//! wires them together: the registry resolves `Matching` publish targets,
//! the dispatcher binds declared behaviors as resources are added, and a
//! watchdog job fails resources stuck in `PendingActivation`.

use std::sync::{Arc, Mutex, Weak};
use tracing::{info, warn};

use crate::bus::EventBus;
use crate::config::EngineConfig;
use crate::dispatch::Dispatcher;
use crate::errors::EngineResult;
use crate::registry::Registry;
use crate::repository::RepositoryScanner;
use crate::scheduler::{JobHandle, Scheduler, TokioScheduler};

/// The assembled orchestration engine
pub struct Engine {
    config: EngineConfig,
    bus: Arc<EventBus>,
    registry: Arc<Registry>,
    dispatcher: Arc<Dispatcher>,
    scheduler: Arc<TokioScheduler>,
    watchdog: Mutex<Option<JobHandle>>,
}

impl Engine {
    /// Assemble an engine from its parts
    pub fn new(config: EngineConfig) -> Arc<Self> {
        let bus = Arc::new(EventBus::new());
        let registry = Registry::new(bus.clone());
        let dispatcher = Dispatcher::install(bus.clone());

        let weak: Weak<Dispatcher> = Arc::downgrade(&dispatcher);
        registry.set_behavior_binder(Arc::new(move |resource| {
            if let Some(dispatcher) = weak.upgrade() {
                dispatcher.bind_behaviors(resource);
            }
        }));

        Arc::new(Self {
            config,
            bus,
            registry,
            dispatcher,
            scheduler: Arc::new(TokioScheduler::new()),
            watchdog: Mutex::new(None),
        })
    }

    /// Assemble an engine with default configuration
    pub fn with_defaults() -> Arc<Self> {
        Self::new(EngineConfig::default())
    }

    /// Start the engine: activates the root resource (seeding the cascade)
    /// and schedules the pending-activation watchdog. Without a tokio
    /// runtime the watchdog is skipped with a warning; everything else is
    /// synchronous and unaffected.
    pub fn start(&self) {
        info!("engine starting");
        self.registry.start();

        let timeout = self.config.pending_activation_timeout;
        let weak: Weak<Registry> = Arc::downgrade(&self.registry);
        match self.scheduler.schedule(
            "pending-activation watchdog",
            Arc::new(move || {
                if let Some(registry) = weak.upgrade() {
                    registry.fail_stalled(timeout);
                }
            }),
            self.config.watchdog_period,
        ) {
            Ok(handle) => {
                *self.watchdog.lock().expect("watchdog lock poisoned") = Some(handle);
            }
            Err(err) => warn!(error = %err, "watchdog not scheduled"),
        }
        info!("engine started");
    }

    /// Stop background jobs and drop all resources and handlers
    pub fn stop(&self) {
        info!("engine stopping");
        if let Some(handle) = self.watchdog.lock().expect("watchdog lock poisoned").take() {
            self.scheduler.unschedule(&handle);
        }
        self.scheduler.stop_all();
        self.registry.clear();
        self.dispatcher.clear();
        info!("engine stopped");
    }

    /// Bulk-load a repository directory of resources and handlers
    pub fn scan_repository(&self, path: impl AsRef<std::path::Path>) -> EngineResult<()> {
        RepositoryScanner::new(
            self.bus.clone(),
            self.registry.clone(),
            self.dispatcher.clone(),
        )
        .scan(path)
    }

    /// The engine's configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The event bus all components publish on
    pub fn bus(&self) -> &Arc<EventBus> {
        &self.bus
    }

    /// The resource registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// The handler-dispatch engine
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// The background-job scheduler
    pub fn scheduler(&self) -> &Arc<TokioScheduler> {
        &self.scheduler
    }
}
