//! Observer notifications about identity moving between hierarchies.

use crate::crosspath::CrossPath;
use parking_lot::RwLock;
use std::sync::{Arc, Weak};

/// Receives engine notifications about subtrees appearing, disappearing,
/// or becoming invalid. All methods default to no-ops so observers
/// implement only what they care about.
pub trait BridgeObserver: Send + Sync {
    /// A subtree now exists at `path`.
    fn object_added(&self, _path: &CrossPath) {}

    /// The subtree at `path` is about to disappear (its identity moves to
    /// the other hierarchy).
    fn object_pre_delete(&self, _path: &CrossPath) {}

    /// The subtree at `path` changed wholesale and must be re-read.
    fn subtree_invalidated(&self, _path: &CrossPath) {}
}

/// Fans notifications out to weakly-held observers.
#[derive(Default)]
pub struct Notifier {
    observers: RwLock<Vec<Weak<dyn BridgeObserver>>>,
}

impl Notifier {
    /// Creates a notifier with no observers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes an observer.
    pub fn subscribe(&self, observer: Weak<dyn BridgeObserver>) {
        self.observers.write().push(observer);
    }

    fn alive(&self) -> Vec<Arc<dyn BridgeObserver>> {
        let mut list = self.observers.write();
        list.retain(|w| w.strong_count() > 0);
        list.iter().filter_map(Weak::upgrade).collect()
    }

    /// Reports a subtree addition.
    pub fn object_added(&self, path: &CrossPath) {
        for observer in self.alive() {
            observer.object_added(path);
        }
    }

    /// Reports an upcoming subtree removal.
    pub fn object_pre_delete(&self, path: &CrossPath) {
        for observer in self.alive() {
            observer.object_pre_delete(path);
        }
    }

    /// Reports a subtree invalidation.
    pub fn subtree_invalidated(&self, path: &CrossPath) {
        for observer in self.alive() {
            observer.subtree_invalidated(path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recording {
        events: Mutex<Vec<String>>,
    }

    impl BridgeObserver for Recording {
        fn object_added(&self, path: &CrossPath) {
            self.events.lock().push(format!("add {path}"));
        }

        fn object_pre_delete(&self, path: &CrossPath) {
            self.events.lock().push(format!("pre-delete {path}"));
        }
    }

    #[test]
    fn notifications_reach_live_observers_only() {
        let notifier = Notifier::new();
        let observer = Arc::new(Recording::default());
        notifier.subscribe(Arc::downgrade(&observer) as Weak<dyn BridgeObserver>);

        let path = CrossPath::parse("/World/Box").unwrap();
        notifier.object_added(&path);
        notifier.object_pre_delete(&path);
        assert_eq!(
            *observer.events.lock(),
            vec!["add /World/Box", "pre-delete /World/Box"]
        );

        drop(observer);
        // A dead observer is pruned, not upgraded.
        notifier.subtree_invalidated(&path);
        assert!(notifier.observers.read().is_empty());
    }
}
