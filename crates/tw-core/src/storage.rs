//! Quota-free `Storage`
//!
//! Replacement for `localStorage`/`sessionStorage`. Items live in memory in
//! insertion order and every mutation produces a [`StorageEvent`] that is
//! delivered to the registered listeners.

use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

/// Which global the storage replaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StorageArea {
    Local,
    Session,
}

/// Synthetic `StorageEvent`. `key == None` means `clear()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageEvent {
    pub key: Option<String>,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
    /// Original URL of the page that made the change.
    pub url: String,
    pub storage_area: StorageArea,
}

type Listener = Box<dyn FnMut(&StorageEvent)>;

/// Listener handle for [`ReplayStorage::remove_listener`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ListenerId(usize);

/// In-memory `Storage` with no capacity limit.
pub struct ReplayStorage {
    area: StorageArea,
    url: String,
    /// Insertion order, for `key(i)`
    items: Vec<(String, String)>,
    /// Key to position in `items`
    index: HashMap<String, usize>,
    listeners: Vec<(usize, Listener)>,
    next_listener: usize,
}

impl fmt::Debug for ReplayStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplayStorage")
            .field("area", &self.area)
            .field("items", &self.items.len())
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

impl ReplayStorage {
    pub fn new(area: StorageArea, url: impl Into<String>) -> Self {
        Self {
            area,
            url: url.into(),
            items: Vec::new(),
            index: HashMap::new(),
            listeners: Vec::new(),
            next_listener: 0,
        }
    }

    pub fn area(&self) -> StorageArea {
        self.area
    }

    /// Update the URL reported in events after a same-document navigation.
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    #[inline]
    fn position(&self, key: &str) -> Option<usize> {
        self.index.get(key).copied()
    }

    pub fn get_item(&self, key: &str) -> Option<&str> {
        self.position(key).map(|i| self.items[i].1.as_str())
    }

    pub fn set_item(&mut self, key: &str, value: &str) {
        let old_value = match self.position(key) {
            Some(i) => Some(std::mem::replace(&mut self.items[i].1, value.to_string())),
            None => {
                self.index.insert(key.to_string(), self.items.len());
                self.items.push((key.to_string(), value.to_string()));
                None
            }
        };
        self.fire(Some(key.to_string()), old_value, Some(value.to_string()));
    }

    pub fn remove_item(&mut self, key: &str) {
        let old_value = self.index.remove(key).map(|i| {
            let (_, value) = self.items.remove(i);
            for (pos, (k, _)) in self.items.iter().enumerate().skip(i) {
                if let Some(slot) = self.index.get_mut(k) {
                    *slot = pos;
                }
            }
            value
        });
        self.fire(Some(key.to_string()), old_value, None);
    }

    pub fn clear(&mut self) {
        self.items.clear();
        self.index.clear();
        self.fire(None, None, None);
    }

    /// Key at `index` in insertion order.
    pub fn key(&self, index: usize) -> Option<&str> {
        self.items.get(index).map(|(k, _)| k.as_str())
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    // =========================================================================
    // Events
    // =========================================================================

    pub fn add_listener<F>(&mut self, listener: F) -> ListenerId
    where
        F: FnMut(&StorageEvent) + 'static,
    {
        let id = self.next_listener;
        self.next_listener += 1;
        self.listeners.push((id, Box::new(listener)));
        ListenerId(id)
    }

    pub fn remove_listener(&mut self, id: ListenerId) {
        self.listeners.retain(|(i, _)| *i != id.0);
    }

    fn fire(&mut self, key: Option<String>, old_value: Option<String>, new_value: Option<String>) {
        let event = StorageEvent {
            key,
            old_value,
            new_value,
            url: self.url.clone(),
            storage_area: self.area,
        };
        for (_, listener) in self.listeners.iter_mut() {
            listener(&event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn recorded() -> (ReplayStorage, Rc<RefCell<Vec<StorageEvent>>>) {
        let mut storage = ReplayStorage::new(StorageArea::Local, "https://tests.wombat.io/");
        let events = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&events);
        storage.add_listener(move |e| sink.borrow_mut().push(e.clone()));
        (storage, events)
    }

    #[test]
    fn test_storage_interface() {
        let mut s = ReplayStorage::new(StorageArea::Session, "u");
        assert!(s.is_empty());
        s.set_item("a", "1");
        s.set_item("b", "2");
        s.set_item("a", "3");
        assert_eq!(s.len(), 2);
        assert_eq!(s.get_item("a"), Some("3"));
        assert_eq!(s.key(0), Some("a"));
        assert_eq!(s.key(1), Some("b"));
        assert_eq!(s.key(2), None);
        s.remove_item("a");
        assert_eq!(s.get_item("a"), None);
        assert_eq!(s.key(0), Some("b"));
        s.clear();
        assert_eq!(s.len(), 0);
    }

    #[test]
    fn test_key_order_survives_removal() {
        let mut s = ReplayStorage::new(StorageArea::Local, "u");
        for k in ["a", "b", "c", "d"] {
            s.set_item(k, k);
        }
        s.remove_item("b");
        assert_eq!((0..3).map(|i| s.key(i)).collect::<Vec<_>>(), vec![Some("a"), Some("c"), Some("d")]);
        assert_eq!(s.get_item("d"), Some("d"));
        s.set_item("c", "updated");
        assert_eq!(s.get_item("c"), Some("updated"));
        assert_eq!(s.key(1), Some("c"));
        s.set_item("b", "again");
        assert_eq!(s.key(3), Some("b"));
        s.remove_item("missing");
        assert_eq!(s.len(), 4);
    }

    #[test]
    fn test_no_quota() {
        let mut s = ReplayStorage::new(StorageArea::Local, "u");
        let big = "x".repeat(1 << 20);
        for i in 0..12 {
            s.set_item(&format!("k{i}"), &big);
        }
        assert_eq!(s.len(), 12);
    }

    #[test]
    fn test_events_on_every_mutation() {
        let (mut s, events) = recorded();
        s.set_item("k", "v1");
        s.set_item("k", "v2");
        s.remove_item("k");
        s.clear();

        let events = events.borrow();
        assert_eq!(events.len(), 4);
        assert_eq!(events[1].old_value.as_deref(), Some("v1"));
        assert_eq!(events[1].new_value.as_deref(), Some("v2"));
        assert_eq!(events[2].new_value, None);
        assert_eq!(events[3].key, None);
        assert!(events.iter().all(|e| e.storage_area == StorageArea::Local));
        assert!(events.iter().all(|e| e.url == "https://tests.wombat.io/"));
    }

    #[test]
    fn test_remove_listener() {
        let mut s = ReplayStorage::new(StorageArea::Local, "u");
        let count = Rc::new(RefCell::new(0));
        let c = Rc::clone(&count);
        let id = s.add_listener(move |_| *c.borrow_mut() += 1);
        s.set_item("a", "1");
        s.remove_listener(id);
        s.set_item("a", "2");
        assert_eq!(*count.borrow(), 1);
    }
}
