//! Lightweight resource-orchestration engine
//!
//! Resources form a named tree driven through a lifecycle state machine
//! (`Added` to `Activated`, with `Failed`/`Invalid` terminal states). Every
//! lifecycle step is an event on a shared bus; handlers subscribe by
//! condition and their conjoined boolean results decide each transition.
//! A directory scanner bulk-loads resource descriptors and script handlers
//! from a file tree.
//!
//! # Example
//!
//! ```rust
//! use gears::{Engine, EngineConfig, EventName, FnHandler, Resource, ResourceCondition};
//! use std::sync::Arc;
//!
//! let engine = Engine::new(EngineConfig::default());
//! engine.dispatcher().register_handler(Arc::new(FnHandler::new(
//!     EventName::Register,
//!     Arc::new(ResourceCondition::of_type("sqs")),
//!     |_, resource, _| {
//!         println!("registering {resource}");
//!         Ok(true)
//!     },
//! )));
//! engine.start();
//! engine.registry().add_resource(
//!     Resource::new("q1", "sqs")
//!         .with_parent(engine.registry().root())
//!         .into_ref(),
//! );
//! engine.stop();
//! ```

pub mod bus;
pub mod condition;
pub mod config;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod event;
pub mod handlers;
pub mod outcome;
pub mod registry;
pub mod repository;
pub mod resource;
pub mod scheduler;

pub use bus::{EventBus, PublishTarget, SubscriptionId};
pub use condition::{Condition, DelegatedEventCondition, EventCondition, ResourceCondition};
pub use config::EngineConfig;
pub use dispatch::{BehaviorFactory, Dispatcher, FnHandler, Handler};
pub use engine::Engine;
pub use errors::{EngineError, EngineResult};
pub use event::{EventName, Payload};
pub use handlers::ScriptHandler;
pub use outcome::Outcome;
pub use registry::{Registry, ROOT_NAME};
pub use repository::RepositoryScanner;
pub use resource::{BehaviorSpec, Resource, ResourceRef, ResourceState};
pub use scheduler::{JobCallback, JobHandle, Scheduler, TokioScheduler};
