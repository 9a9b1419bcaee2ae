//! Built-in handler implementations
//!
//! Concrete domain drivers (cloud instances, message queues) live outside
//! the engine; what ships here is the file/script-based handler the
//! directory scanner discovers. Closure-backed handlers are lifted through
//! [`FnHandler`](crate::dispatch::FnHandler).

mod script;

pub use script::ScriptHandler;
