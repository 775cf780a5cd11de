//! Keep-alive store for running operations.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

use crate::operation::Operation;

/// Maps operation names to the operations they keep alive.
///
/// An operation is inserted while it is being constructed and removed by
/// its own finisher step, after its workflow has returned. Names embed a
/// unique id, so concurrent operations never share a key.
#[derive(Debug, Default)]
pub struct Registry {
    operations: Mutex<HashMap<String, Arc<Operation>>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an operation, replacing any previous entry under `name`.
    pub fn insert(&self, name: impl Into<String>, operation: Arc<Operation>) {
        let name = name.into();
        trace!(operation = %name, "registered");
        let replaced = self.operations.lock().insert(name, operation);
        drop(replaced);
    }

    /// Drop the entry for `name`. Absent names are ignored.
    pub fn remove(&self, name: &str) {
        let removed = self.operations.lock().remove(name);
        if removed.is_some() {
            trace!(operation = %name, "unregistered");
        }
        // Released outside the lock: this may be the last reference.
        drop(removed);
    }

    /// Whether an entry exists for `name`.
    pub fn contains(&self, name: &str) -> bool {
        self.operations.lock().contains_key(name)
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.operations.lock().len()
    }

    /// Whether no operation is registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatcher::{Dispatcher, DispatcherConfig};
    use crate::main_context;
    use crossbeam_channel::bounded;
    use std::time::Duration;

    #[test]
    fn test_insert_remove_contains() {
        let (main, _main_loop) = main_context::channel();
        let dispatcher = Dispatcher::with_main(DispatcherConfig::default(), main);
        let (release_tx, release_rx) = bounded::<()>(1);
        let operation = dispatcher
            .launch(move |_| {
                let _ = release_rx.recv_timeout(Duration::from_secs(5));
            })
            .unwrap();

        let registry = Registry::new();
        assert!(registry.is_empty());

        registry.insert("alias", Arc::clone(&operation));
        registry.insert("alias", Arc::clone(&operation));
        assert!(registry.contains("alias"));
        assert_eq!(registry.len(), 1);

        registry.remove("alias");
        registry.remove("alias");
        registry.remove("never-added");
        assert!(!registry.contains("alias"));
        assert!(registry.is_empty());

        release_tx.send(()).unwrap();
    }
}
