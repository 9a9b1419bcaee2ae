//! Deferred boolean outcomes
//!
//! An [`Outcome`] is a single-assignment deferred boolean: many handlers may
//! answer a published event asynchronously, and the registry needs to attach
//! lifecycle transitions to the combined result. Continuations registered
//! before resolution are stored; continuations registered after resolution
//! run immediately.

use std::sync::{Arc, Mutex};
use tracing::debug;

type Continuation = Box<dyn FnOnce(bool) + Send>;

struct OutcomeInner {
    result: Option<bool>,
    waiters: Vec<Continuation>,
}

/// A single-assignment deferred boolean outcome.
///
/// Cheap to clone; all clones share the same resolution. The first call to
/// [`Outcome::resolve`] wins, later calls are ignored.
#[derive(Clone)]
pub struct Outcome {
    inner: Arc<Mutex<OutcomeInner>>,
}

impl Outcome {
    /// Create an unresolved outcome
    pub fn pending() -> Self {
        Self {
            inner: Arc::new(Mutex::new(OutcomeInner {
                result: None,
                waiters: Vec::new(),
            })),
        }
    }

    /// Create an already-resolved outcome
    pub fn resolved(result: bool) -> Self {
        Self {
            inner: Arc::new(Mutex::new(OutcomeInner {
                result: Some(result),
                waiters: Vec::new(),
            })),
        }
    }

    /// The resolved value, if any
    pub fn result(&self) -> Option<bool> {
        self.inner.lock().expect("outcome lock poisoned").result
    }

    /// Resolve the outcome. Single-assignment: the first resolution wins.
    pub fn resolve(&self, result: bool) {
        let waiters = {
            let mut inner = self.inner.lock().expect("outcome lock poisoned");
            if inner.result.is_some() {
                debug!(result, "ignoring repeated outcome resolution");
                return;
            }
            inner.result = Some(result);
            std::mem::take(&mut inner.waiters)
        };
        // Continuations run outside the lock: they may publish further
        // events or resolve other outcomes.
        for waiter in waiters {
            waiter(result);
        }
    }

    /// Run `callback` with the resolved value, now or on resolution
    pub(crate) fn when_resolved<F>(&self, callback: F)
    where
        F: FnOnce(bool) + Send + 'static,
    {
        let resolved = {
            let mut inner = self.inner.lock().expect("outcome lock poisoned");
            match inner.result {
                Some(result) => Some(result),
                None => {
                    inner.waiters.push(Box::new(callback));
                    return;
                }
            }
        };
        if let Some(result) = resolved {
            callback(result);
        }
    }

    /// Attach a success continuation; returns the outcome for chaining
    pub fn on_success<F>(self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.when_resolved(|ok| {
            if ok {
                callback();
            }
        });
        self
    }

    /// Attach a failure continuation; returns the outcome for chaining
    pub fn on_failure<F>(self, callback: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        self.when_resolved(|ok| {
            if !ok {
                callback();
            }
        });
        self
    }

    /// Conjoin with another outcome.
    ///
    /// The combined outcome resolves `true` once both sides resolve `true`,
    /// and resolves `false` as soon as either side resolves `false`.
    pub fn and(&self, other: &Outcome) -> Outcome {
        let combined = Outcome::pending();

        let attach = |side: &Outcome, peer: Outcome, combined: Outcome| {
            side.when_resolved(move |ok| {
                if !ok {
                    combined.resolve(false);
                } else if peer.result() == Some(true) {
                    combined.resolve(true);
                }
            });
        };

        attach(self, other.clone(), combined.clone());
        attach(other, self.clone(), combined.clone());
        combined
    }
}

impl std::fmt::Debug for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Outcome").field("result", &self.result()).finish()
    }
}
