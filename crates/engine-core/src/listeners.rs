//! Lifecycle listener registry

use std::sync::{Arc, Mutex};

use cubescript_protocol::StateTransition;
use cubescript_script_host::MutexExt;
use uuid::Uuid;

/// Handle returned by [`ListenerRegistry::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub Uuid);

impl ListenerId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}

type Listener = Arc<dyn Fn(&StateTransition) + Send + Sync>;

/// Listeners notified on every run state transition
///
/// Listeners run synchronously on the thread performing the transition. They
/// may subscribe or unsubscribe from inside a callback; the change applies
/// from the next transition on.
#[derive(Default)]
pub struct ListenerRegistry {
    listeners: Mutex<Vec<(ListenerId, Listener)>>,
}

impl ListenerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&StateTransition) + Send + Sync + 'static,
    {
        let id = ListenerId::new();
        self.listeners.lock_or_recover().push((id, Arc::new(listener)));
        id
    }

    /// Returns whether the listener was registered
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.lock_or_recover();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.lock_or_recover().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn emit(&self, transition: &StateTransition) {
        let snapshot: Vec<Listener> = self
            .listeners
            .lock_or_recover()
            .iter()
            .map(|(_, listener)| listener.clone())
            .collect();
        for listener in snapshot {
            listener(transition);
        }
    }
}
