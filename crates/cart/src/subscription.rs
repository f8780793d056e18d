//! Observer registry for cart state changes.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use crate::state::CartState;

type Callback = Arc<dyn Fn(&CartState) + Send + Sync>;

#[derive(Default)]
struct Registry {
    next_id: u64,
    callbacks: Vec<(u64, Callback)>,
}

/// Set of callbacks invoked after every published change.
#[derive(Clone, Default)]
pub(crate) struct Subscribers {
    registry: Arc<Mutex<Registry>>,
}

impl Subscribers {
    pub(crate) fn subscribe<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&CartState) + Send + Sync + 'static,
    {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.callbacks.push((id, Arc::new(callback)));

        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Bump the revision and notify every subscriber.
    pub(crate) fn publish(&self, state: &mut CartState) {
        state.revision += 1;
        tracing::debug!(
            revision = state.revision,
            lines = state.lines.len(),
            loading = state.is_loading,
            "Cart state published"
        );
        self.notify(state);
    }

    /// Invoke every callback. Callbacks run outside the lock so they may
    /// subscribe or unsubscribe.
    pub(crate) fn notify(&self, state: &CartState) {
        let callbacks: Vec<Callback> = {
            let registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
            registry
                .callbacks
                .iter()
                .map(|(_, cb)| Arc::clone(cb))
                .collect()
        };
        for callback in callbacks {
            callback(state);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .callbacks
            .len()
    }
}

impl std::fmt::Debug for Subscribers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscribers")
            .field("count", &self.len())
            .finish()
    }
}

/// Handle returned by `CartEngine::subscribe`.
///
/// Dropping the handle detaches the callback.
#[derive(Debug)]
#[must_use = "dropping the subscription detaches the callback immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Detach the callback now.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .callbacks
                .retain(|(id, _)| *id != self.id);
        }
    }
}
