use crate::types::LookupItem;
use std::collections::HashMap;

/// Which stage a waiter is parked in. The same numeric id means different
/// things in each namespace.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Namespace {
    Mapping,
    Existence,
}

impl Namespace {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Namespace::Mapping => "mapping",
            Namespace::Existence => "existence",
        }
    }
}

/// Items waiting on the result for a key, in registration order.
#[derive(Default, Debug)]
pub struct WaiterRegistry {
    entries: HashMap<(Namespace, u64), Vec<LookupItem>>,
}

impl WaiterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks `item` under the key. Returns true when the key had no waiters,
    /// meaning the caller has to schedule the lookup. Otherwise the item rides
    /// along with the request that is already queued or in flight.
    pub fn register(&mut self, namespace: Namespace, id: u64, item: LookupItem) -> bool {
        let waiters = self.entries.entry((namespace, id)).or_default();
        waiters.push(item);
        waiters.len() == 1
    }

    /// Removes and returns every waiter for the key.
    pub fn drain_all(&mut self, namespace: Namespace, id: u64) -> Vec<LookupItem> {
        self.entries.remove(&(namespace, id)).unwrap_or_default()
    }

    pub fn waiting(&self, namespace: Namespace, id: u64) -> usize {
        self.entries.get(&(namespace, id)).map_or(0, Vec::len)
    }

    /// Number of keys with at least one waiter.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(primary_id: u64, title: &str) -> LookupItem {
        LookupItem::new(primary_id, title, |_| {})
    }

    #[test]
    fn test_first_registration() {
        let mut registry = WaiterRegistry::new();
        assert!(registry.register(Namespace::Mapping, 30, item(30, "a")));
        assert!(!registry.register(Namespace::Mapping, 30, item(30, "b")));
        // Same id in the other namespace is a different key
        assert!(registry.register(Namespace::Existence, 30, item(30, "c")));

        assert_eq!(registry.waiting(Namespace::Mapping, 30), 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_drain_all_in_order() {
        let mut registry = WaiterRegistry::new();
        registry.register(Namespace::Existence, 500, item(30, "first"));
        registry.register(Namespace::Existence, 500, item(31, "second"));

        let drained = registry.drain_all(Namespace::Existence, 500);
        let titles: Vec<_> = drained.iter().map(|i| i.display_title.as_str()).collect();
        assert_eq!(titles, ["first", "second"]);

        assert!(registry.drain_all(Namespace::Existence, 500).is_empty());
        assert!(registry.is_empty());

        // A fresh registration after a drain starts a new request
        assert!(registry.register(Namespace::Existence, 500, item(30, "third")));
    }
}
