//! Realm registry and proxy bridge
//!
//! Windows are stored in an arena and referred to by [`WindowId`]; parent
//! links are ids, never owning references. The registry answers "is this
//! window initialized", computes the replay top and archive top, and issues
//! the small integer ids used to name `postMessage` sources across realms.
//!
//! [`ProxyBridge`] is the wrapper standing in for the page-visible `window`
//! and `document`: `top`/`parent` follow the replay hierarchy, `location`
//! resolves to the synthetic location, functions come back bound and cached,
//! and windows reached through properties come back wrapped.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use serde_json::Value;

use crate::messaging::Envelope;

// =============================================================================
// Registry
// =============================================================================

/// Arena index of a window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WindowId(u32);

impl WindowId {
    pub fn index(self) -> u32 {
        self.0
    }
}

#[derive(Debug, Clone)]
struct WindowRecord {
    parent: Option<WindowId>,
    /// Carries the replay marker (served from this archive).
    is_replay: bool,
    initialized: bool,
    src_id: Option<u32>,
}

/// Process-wide window table.
#[derive(Debug, Default)]
pub struct RealmRegistry {
    windows: Vec<WindowRecord>,
    sources: HashMap<u32, WindowId>,
    next_src_id: u32,
}

impl RealmRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a window. `parent` must already be registered.
    pub fn register(&mut self, parent: Option<WindowId>, is_replay: bool) -> WindowId {
        let id = WindowId(self.windows.len() as u32);
        self.windows.push(WindowRecord {
            parent,
            is_replay,
            initialized: false,
            src_id: None,
        });
        id
    }

    fn record(&self, id: WindowId) -> Option<&WindowRecord> {
        self.windows.get(id.0 as usize)
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Claim initialization of `id`. Returns `false` if it was already
    /// initialized, in which case the caller must not patch it again.
    pub fn mark_initialized(&mut self, id: WindowId) -> bool {
        match self.windows.get_mut(id.0 as usize) {
            Some(rec) if !rec.initialized => {
                rec.initialized = true;
                true
            }
            _ => false,
        }
    }

    pub fn is_initialized(&self, id: WindowId) -> bool {
        self.record(id).map_or(false, |r| r.initialized)
    }

    pub fn is_replay(&self, id: WindowId) -> bool {
        self.record(id).map_or(false, |r| r.is_replay)
    }

    pub fn parent(&self, id: WindowId) -> Option<WindowId> {
        self.record(id).and_then(|r| r.parent)
    }

    /// Outermost ancestor reachable through replay windows only.
    pub fn replay_top(&self, id: WindowId) -> WindowId {
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            if !self.is_replay(parent) {
                break;
            }
            current = parent;
        }
        current
    }

    /// `window.parent` as page code sees it: the replay top is its own parent.
    pub fn replay_parent(&self, id: WindowId) -> WindowId {
        match self.parent(id) {
            Some(parent) if self.is_replay(parent) => parent,
            _ => id,
        }
    }

    /// The real outer page hosting the replay, used for control messages.
    pub fn archive_top(&self, id: WindowId, framed: bool) -> Option<WindowId> {
        if !framed {
            return None;
        }
        let mut current = id;
        while let Some(parent) = self.parent(current) {
            current = parent;
        }
        (!self.is_replay(current)).then_some(current)
    }

    /// Small integer naming `id` as a message source, assigned on first use.
    pub fn source_id(&mut self, id: WindowId) -> u32 {
        if let Some(existing) = self.record(id).and_then(|r| r.src_id) {
            return existing;
        }
        self.next_src_id += 1;
        let src_id = self.next_src_id;
        if let Some(rec) = self.windows.get_mut(id.0 as usize) {
            rec.src_id = Some(src_id);
        }
        self.sources.insert(src_id, id);
        src_id
    }

    /// Resolve an id issued by this registry.
    pub fn resolve_source(&self, src_id: u32) -> Option<WindowId> {
        self.sources.get(&src_id).copied()
    }

    /// Window a `postMessage` call came from. A caller in another frame marks
    /// itself on the target first; unmarked calls come from `fallback`.
    pub fn message_sender(&self, marked: Option<WindowId>, fallback: WindowId) -> WindowId {
        marked.filter(|id| self.record(*id).is_some()).unwrap_or(fallback)
    }

    /// Wrap an outgoing `postMessage` from `sender`, whose original origin is
    /// `from_origin`. `None` when `target_origin` is not a valid target.
    pub fn wrap_message(
        &mut self,
        sender: WindowId,
        message: Value,
        from_origin: &str,
        target_origin: &str,
    ) -> Option<Envelope> {
        let from_top = self.replay_top(sender) == sender;
        let mut envelope = Envelope::wrap(message, from_origin, target_origin, None, from_top)?;
        envelope.src_id = Some(self.source_id(sender));
        Some(envelope)
    }

    /// Initialized replay windows that receive a storage event from `origin_window`.
    pub fn storage_targets(&self, origin_window: WindowId) -> Vec<WindowId> {
        self.windows
            .iter()
            .enumerate()
            .filter(|(_, r)| r.is_replay && r.initialized)
            .map(|(i, _)| WindowId(i as u32))
            .filter(|id| *id != origin_window)
            .collect()
    }
}

// =============================================================================
// Proxy Bridge
// =============================================================================

/// What a wrapper stands in for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Window(WindowId),
    Document(WindowId),
}

impl Target {
    pub fn window(self) -> WindowId {
        match self {
            Self::Window(id) | Self::Document(id) => id,
        }
    }
}

/// Raw property read result from the host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue<V> {
    Missing,
    Value(V),
    Function(V),
    Window(WindowId),
}

/// Object access on the real window/document.
pub trait RealmHost {
    type Value: Clone;

    fn read(&self, target: Target, name: &str) -> HostValue<Self::Value>;
    fn write(&self, target: Target, name: &str, value: Self::Value);
    /// `func.bind(target)`.
    fn bind(&self, target: Target, func: &Self::Value) -> Self::Value;
    fn as_string(&self, value: &Self::Value) -> Option<String>;
}

/// Page-visible wrapper around a window or document.
pub struct Wrapped<V> {
    target: Target,
    bound: RefCell<HashMap<String, V>>,
}

impl<V> fmt::Debug for Wrapped<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wrapped")
            .field("target", &self.target)
            .field("bound", &self.bound.borrow().len())
            .finish()
    }
}

impl<V> Wrapped<V> {
    /// The underlying object.
    pub fn target(&self) -> Target {
        self.target
    }
}

/// Result of reading through a wrapper.
pub enum ProxyValue<V> {
    Value(V),
    Wrapped(Rc<Wrapped<V>>),
    /// The synthetic location of this window.
    Location(WindowId),
}

impl<V: fmt::Debug> fmt::Debug for ProxyValue<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Value(v) => f.debug_tuple("Value").field(v).finish(),
            Self::Wrapped(w) => f.debug_tuple("Wrapped").field(&w.target).finish(),
            Self::Location(id) => f.debug_tuple("Location").field(id).finish(),
        }
    }
}

/// Outcome of writing through a wrapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SetOutcome {
    Stored,
    /// `location = url` on a window or document: navigate instead.
    Navigate { window: WindowId, url: String },
}

/// Names that resolve to the window itself.
const SELF_NAMES: &[&str] = &["window", "self", "frames", "globalThis"];

/// Wrapper factory and property semantics for all windows of one registry.
pub struct ProxyBridge<H: RealmHost> {
    host: H,
    registry: Rc<RefCell<RealmRegistry>>,
    wrappers: RefCell<HashMap<Target, Rc<Wrapped<H::Value>>>>,
}

impl<H: RealmHost> ProxyBridge<H> {
    pub fn new(host: H, registry: Rc<RefCell<RealmRegistry>>) -> Self {
        Self {
            host,
            registry,
            wrappers: RefCell::new(HashMap::new()),
        }
    }

    pub fn host(&self) -> &H {
        &self.host
    }

    /// Stable wrapper for `target`.
    pub fn wrap(&self, target: Target) -> Rc<Wrapped<H::Value>> {
        let mut wrappers = self.wrappers.borrow_mut();
        Rc::clone(wrappers.entry(target).or_insert_with(|| {
            Rc::new(Wrapped {
                target,
                bound: RefCell::new(HashMap::new()),
            })
        }))
    }

    pub fn is_wrapped(&self, target: Target) -> bool {
        self.wrappers.borrow().contains_key(&target)
    }

    /// Property read through `proxy`.
    pub fn get(&self, proxy: &Wrapped<H::Value>, name: &str) -> Option<ProxyValue<H::Value>> {
        let target = proxy.target;
        let window = target.window();

        if let Target::Window(id) = target {
            let registry = self.registry.borrow();
            match name {
                "top" => return Some(ProxyValue::Wrapped(self.wrap(Target::Window(registry.replay_top(id))))),
                "parent" => return Some(ProxyValue::Wrapped(self.wrap(Target::Window(registry.replay_parent(id))))),
                "document" => return Some(ProxyValue::Wrapped(self.wrap(Target::Document(id)))),
                n if SELF_NAMES.contains(&n) => return Some(ProxyValue::Wrapped(self.wrap(target))),
                _ => {}
            }
        }
        if matches!(name, "location" | "WB_wombat_location") {
            return Some(ProxyValue::Location(window));
        }

        match self.host.read(target, name) {
            HostValue::Missing => None,
            HostValue::Value(v) => Some(ProxyValue::Value(v)),
            HostValue::Window(id) => Some(ProxyValue::Wrapped(self.wrap(Target::Window(id)))),
            HostValue::Function(func) => {
                let mut bound = proxy.bound.borrow_mut();
                let value = bound
                    .entry(name.to_string())
                    .or_insert_with(|| self.host.bind(target, &func))
                    .clone();
                Some(ProxyValue::Value(value))
            }
        }
    }

    /// Property write through `proxy`.
    pub fn set(&self, proxy: &Wrapped<H::Value>, name: &str, value: H::Value) -> SetOutcome {
        let target = proxy.target;
        if matches!(name, "location" | "WB_wombat_location") {
            if let Some(url) = self.host.as_string(&value) {
                return SetOutcome::Navigate { window: target.window(), url };
            }
        }
        // A reassigned function must not keep returning the old binding
        proxy.bound.borrow_mut().remove(name);
        self.host.write(target, name, value);
        SetOutcome::Stored
    }
}

// =============================================================================
// Fallback: location reassignment polling
// =============================================================================

/// Poll interval for runtimes without transparent proxies.
pub const LOCATION_POLL_INTERVAL_MS: u32 = 100;

/// Detects `location = "..."` on runtimes where the assignment cannot be
/// intercepted. The binding reads the global slot every
/// [`LOCATION_POLL_INTERVAL_MS`] and passes the assigned string, or `None`
/// while the slot still holds the synthetic location.
#[derive(Debug, Default)]
pub struct LocationReassignWatcher {
    last: Option<String>,
}

impl LocationReassignWatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// URL to navigate to, once per distinct assignment.
    pub fn poll(&mut self, assigned: Option<&str>) -> Option<String> {
        match assigned {
            None => {
                self.last = None;
                None
            }
            Some(url) if self.last.as_deref() == Some(url) => None,
            Some(url) => {
                log::debug!("location reassigned to {}", url);
                self.last = Some(url.to_string());
                Some(url.to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::Cell;

    /// archive UI -> replay top -> nested iframe, plus a foreign iframe.
    fn hierarchy() -> (RealmRegistry, WindowId, WindowId, WindowId, WindowId) {
        let mut reg = RealmRegistry::new();
        let ui = reg.register(None, false);
        let top = reg.register(Some(ui), true);
        let child = reg.register(Some(top), true);
        let foreign = reg.register(Some(top), false);
        (reg, ui, top, child, foreign)
    }

    #[test]
    fn test_replay_top_and_archive_top() {
        let (reg, ui, top, child, foreign) = hierarchy();
        assert_eq!(reg.replay_top(child), top);
        assert_eq!(reg.replay_top(top), top);
        assert_eq!(reg.replay_parent(child), top);
        assert_eq!(reg.replay_parent(top), top);
        assert_eq!(reg.archive_top(child, true), Some(ui));
        assert_eq!(reg.archive_top(child, false), None);
        assert_eq!(reg.replay_top(foreign), top);
    }

    #[test]
    fn test_unframed_replay_has_no_archive_top() {
        let mut reg = RealmRegistry::new();
        let top = reg.register(None, true);
        assert_eq!(reg.archive_top(top, true), None);
    }

    #[test]
    fn test_initialize_once() {
        let (mut reg, _, top, _, _) = hierarchy();
        assert!(!reg.is_initialized(top));
        assert!(reg.mark_initialized(top));
        assert!(!reg.mark_initialized(top));
        assert!(reg.is_initialized(top));
    }

    #[test]
    fn test_source_ids_are_stable() {
        let (mut reg, _, top, child, _) = hierarchy();
        let a = reg.source_id(child);
        let b = reg.source_id(top);
        assert_ne!(a, b);
        assert_eq!(reg.source_id(child), a);
        assert_eq!(reg.resolve_source(a), Some(child));
        assert_eq!(reg.resolve_source(999), None);
    }

    #[test]
    fn test_wrap_message() {
        let (mut reg, _, top, child, _) = hierarchy();
        let env = reg.wrap_message(child, json!(1), "https://tests.wombat.io", "*").expect("wrapped");
        assert!(!env.from_top);
        assert_eq!(env.src_id.and_then(|id| reg.resolve_source(id)), Some(child));
        assert!(reg.wrap_message(top, json!(1), "o", "*").expect("wrapped").from_top);
        assert!(reg.wrap_message(top, json!(1), "o", "::").is_none());
    }

    #[test]
    fn test_message_sender_is_calling_frame() {
        // child calls parent.postMessage: the patched function belongs to top
        let (mut reg, _, top, child, _) = hierarchy();
        let sender = reg.message_sender(Some(child), top);
        assert_eq!(sender, child);
        let env = reg.wrap_message(sender, json!("hi"), "https://other.example", "*").expect("wrapped");
        assert_eq!(env.from, "https://other.example");
        assert!(!env.from_top);
        assert_eq!(env.src_id.and_then(|id| reg.resolve_source(id)), Some(child));

        assert_eq!(reg.message_sender(None, top), top);
        assert_eq!(reg.message_sender(Some(WindowId(99)), top), top);
    }

    #[test]
    fn test_storage_targets() {
        let (mut reg, _, top, child, foreign) = hierarchy();
        reg.mark_initialized(top);
        reg.mark_initialized(child);
        reg.mark_initialized(foreign);
        assert_eq!(reg.storage_targets(child), vec![top]);
    }

    struct MockHost {
        binds: Cell<u32>,
        writes: RefCell<Vec<(Target, String, String)>>,
        child: WindowId,
    }

    impl RealmHost for MockHost {
        type Value = String;

        fn read(&self, _target: Target, name: &str) -> HostValue<String> {
            match name {
                "fetch" | "setTimeout" => HostValue::Function(format!("fn:{name}")),
                "innerWidth" => HostValue::Value("1024".into()),
                "0" => HostValue::Window(self.child),
                _ => HostValue::Missing,
            }
        }

        fn write(&self, target: Target, name: &str, value: String) {
            self.writes.borrow_mut().push((target, name.to_string(), value));
        }

        fn bind(&self, target: Target, func: &String) -> String {
            self.binds.set(self.binds.get() + 1);
            format!("{func}@{:?}", target)
        }

        fn as_string(&self, value: &String) -> Option<String> {
            Some(value.clone())
        }
    }

    fn bridge() -> (ProxyBridge<MockHost>, WindowId, WindowId) {
        let (reg, _, top, child, _) = hierarchy();
        let host = MockHost {
            binds: Cell::new(0),
            writes: RefCell::new(Vec::new()),
            child,
        };
        (ProxyBridge::new(host, Rc::new(RefCell::new(reg))), top, child)
    }

    fn wrapped_target(v: Option<ProxyValue<String>>) -> Target {
        match v {
            Some(ProxyValue::Wrapped(w)) => w.target(),
            other => panic!("expected wrapper, got {other:?}"),
        }
    }

    #[test]
    fn test_top_and_parent_redirected() {
        let (bridge, top, child) = bridge();
        let proxy = bridge.wrap(Target::Window(child));
        assert_eq!(wrapped_target(bridge.get(&proxy, "top")), Target::Window(top));
        assert_eq!(wrapped_target(bridge.get(&proxy, "parent")), Target::Window(top));
        assert_eq!(wrapped_target(bridge.get(&proxy, "self")), Target::Window(child));
        assert_eq!(wrapped_target(bridge.get(&proxy, "document")), Target::Document(child));
    }

    #[test]
    fn test_bound_functions_are_cached() {
        let (bridge, top, _) = bridge();
        let proxy = bridge.wrap(Target::Window(top));
        let a = bridge.get(&proxy, "fetch");
        let b = bridge.get(&proxy, "fetch");
        match (a, b) {
            (Some(ProxyValue::Value(a)), Some(ProxyValue::Value(b))) => assert_eq!(a, b),
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(bridge.host().binds.get(), 1);

        bridge.set(&proxy, "fetch", "fn:patched".into());
        bridge.get(&proxy, "fetch");
        assert_eq!(bridge.host().binds.get(), 2);
    }

    #[test]
    fn test_nested_windows_wrapped_and_stable() {
        let (bridge, top, child) = bridge();
        let proxy = bridge.wrap(Target::Window(top));
        let first = match bridge.get(&proxy, "0") {
            Some(ProxyValue::Wrapped(w)) => w,
            other => panic!("unexpected {other:?}"),
        };
        let second = bridge.wrap(Target::Window(child));
        assert!(Rc::ptr_eq(&first, &second));
        assert!(bridge.is_wrapped(Target::Window(child)));
    }

    #[test]
    fn test_location_read_and_write() {
        let (bridge, top, _) = bridge();
        let proxy = bridge.wrap(Target::Document(top));
        assert!(matches!(bridge.get(&proxy, "location"), Some(ProxyValue::Location(w)) if w == top));
        assert_eq!(
            bridge.set(&proxy, "location", "/next".into()),
            SetOutcome::Navigate { window: top, url: "/next".into() }
        );
        assert_eq!(bridge.set(&proxy, "title", "x".into()), SetOutcome::Stored);
        assert_eq!(bridge.host().writes.borrow().len(), 1);
        assert!(bridge.get(&proxy, "nothing").is_none());
    }

    #[test]
    fn test_reassign_watcher() {
        let mut watcher = LocationReassignWatcher::new();
        assert_eq!(watcher.poll(None), None);
        assert_eq!(watcher.poll(Some("/a")), Some("/a".into()));
        assert_eq!(watcher.poll(Some("/a")), None);
        assert_eq!(watcher.poll(None), None);
        assert_eq!(watcher.poll(Some("/a")), Some("/a".into()));
    }
}
