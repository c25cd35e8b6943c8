//! Window hierarchy and page-visible proxies
//!
//! The registry and [`ProxyBridge`] live outside the engine cell: proxy
//! traps read real host properties, and those reads may land in accessors
//! that need the engine themselves.

use std::cell::{OnceCell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use js_sys::{Function, Object, Proxy, Reflect};
use tw_core::messaging::Envelope;
use tw_core::realm::{HostValue, ProxyValue, SetOutcome, Target};
use tw_core::{ProxyBridge, RealmHost, RealmRegistry, WindowId};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::Window;

/// Property marking a window as initialized by this engine.
pub(crate) const REPLAY_MARKER: &str = "_wb_wombat";

/// Set on a target window by the frame about to call its `postMessage`.
const SOURCE_MARK: &str = "__WB_source";

/// Answered by page-visible proxies with the object behind them.
const REAL_OBJECT: &str = "__WBProxyRealObj__";

fn is_replay_window(window: &Window) -> bool {
    // Cross-origin ancestors throw on access
    Reflect::get(window, &JsValue::from_str(REPLAY_MARKER)).map_or(false, |v| v.is_truthy())
}

fn same_object(a: &JsValue, b: &JsValue) -> bool {
    Object::is(a, b)
}

/// `value` as a window, seeing through proxies. Windows of other frames fail
/// `instanceof`, so this checks `w.window === w` instead.
fn as_window(value: &JsValue) -> Option<Window> {
    let real = Reflect::get(value, &JsValue::from_str(REAL_OBJECT))
        .ok()
        .filter(|v| v.is_object())
        .unwrap_or_else(|| value.clone());
    let own = Reflect::get(&real, &JsValue::from_str("window")).ok()?;
    same_object(&own, &real).then(|| real.unchecked_into())
}

/// Read and clear the sender mark left on `target`, the window whose
/// `postMessage` is running.
pub(crate) fn take_sender(target: &JsValue) -> Option<Window> {
    if !target.is_object() {
        return None;
    }
    let target: &Object = target.unchecked_ref();
    let key = JsValue::from_str(SOURCE_MARK);
    let marked = Reflect::get(target, &key).ok().filter(|v| v.is_object())?;
    let _ = Reflect::delete_property(target, &key);
    as_window(&marked)
}

// =============================================================================
// Host
// =============================================================================

/// Real windows known to this realm's registry.
pub(crate) struct JsRealmHost {
    windows: RefCell<Vec<(WindowId, Window)>>,
    registry: Rc<RefCell<RealmRegistry>>,
}

impl JsRealmHost {
    pub(crate) fn window(&self, id: WindowId) -> Option<Window> {
        self.windows.borrow().iter().find(|(w, _)| *w == id).map(|(_, window)| window.clone())
    }

    fn object(&self, target: Target) -> Option<JsValue> {
        let window = self.window(target.window())?;
        match target {
            Target::Window(_) => Some(window.into()),
            Target::Document(_) => window.document().map(Into::into),
        }
    }

    fn id_of(&self, window: &Window) -> Option<WindowId> {
        self.windows
            .borrow()
            .iter()
            .find(|(_, w)| same_object(w.as_ref(), window.as_ref()))
            .map(|(id, _)| *id)
    }

    /// Register a window reached through a property (an iframe's
    /// `contentWindow`, `opener`).
    fn adopt(&self, window: Window) -> WindowId {
        if let Some(id) = self.id_of(&window) {
            return id;
        }
        let parent = window
            .parent()
            .ok()
            .flatten()
            .filter(|p| !same_object(p.as_ref(), window.as_ref()))
            .and_then(|p| self.id_of(&p));
        let id = register(&mut self.registry.borrow_mut(), parent, &window);
        self.windows.borrow_mut().push((id, window));
        id
    }
}

/// Windows already carrying the marker were initialized by their own engine.
fn register(registry: &mut RealmRegistry, parent: Option<WindowId>, window: &Window) -> WindowId {
    let replay = is_replay_window(window);
    let id = registry.register(parent, replay);
    if replay {
        registry.mark_initialized(id);
    }
    id
}

impl RealmHost for JsRealmHost {
    type Value = JsValue;

    fn read(&self, target: Target, name: &str) -> HostValue<JsValue> {
        let Some(obj) = self.object(target) else {
            return HostValue::Missing;
        };
        let value = match Reflect::get(&obj, &JsValue::from_str(name)) {
            Ok(v) if !v.is_undefined() => v,
            _ => return HostValue::Missing,
        };
        if value.is_function() {
            return HostValue::Function(value);
        }
        match value.dyn_into::<Window>() {
            Ok(window) => HostValue::Window(self.adopt(window)),
            Err(value) => HostValue::Value(value),
        }
    }

    fn write(&self, target: Target, name: &str, value: JsValue) {
        if let Some(obj) = self.object(target) {
            if let Err(e) = Reflect::set(&obj, &JsValue::from_str(name), &value) {
                log::debug!("proxy write of {} failed: {:?}", name, e);
            }
        }
    }

    fn bind(&self, target: Target, func: &JsValue) -> JsValue {
        match (func.dyn_ref::<Function>(), self.object(target)) {
            (Some(f), Some(obj)) => f.bind(&obj).into(),
            _ => func.clone(),
        }
    }

    fn as_string(&self, value: &JsValue) -> Option<String> {
        value.as_string().or_else(|| {
            // URL objects assigned to location
            value
                .is_object()
                .then(|| Reflect::get(value, &JsValue::from_str("href")).ok())
                .flatten()
                .and_then(|h| h.as_string())
        })
    }
}

// =============================================================================
// Realm State
// =============================================================================

pub(crate) struct RealmState {
    registry: Rc<RefCell<RealmRegistry>>,
    bridge: ProxyBridge<JsRealmHost>,
    current: WindowId,
    proxies: RefCell<HashMap<Target, JsValue>>,
    /// Sender-marking `postMessage` of other replay windows, per target
    senders: RefCell<HashMap<WindowId, JsValue>>,
    location: RefCell<Option<JsValue>>,
}

thread_local! {
    static REALM: OnceCell<Rc<RealmState>> = const { OnceCell::new() };
}

/// Realm state, once [`attach`] ran.
pub(crate) fn current() -> Option<Rc<RealmState>> {
    REALM.with(|cell| cell.get().cloned())
}

/// Build the hierarchy for `window` on first use.
pub(crate) fn attach(window: &Window) -> Rc<RealmState> {
    REALM.with(|cell| Rc::clone(cell.get_or_init(|| Rc::new(RealmState::discover(window)))))
}

impl RealmState {
    fn discover(window: &Window) -> Self {
        // Ancestors, nearest first
        let mut chain = Vec::new();
        let mut cursor = window.clone();
        while let Some(parent) = cursor.parent().ok().flatten() {
            if same_object(parent.as_ref(), cursor.as_ref()) {
                break;
            }
            chain.push(parent.clone());
            cursor = parent;
        }

        let registry = Rc::new(RefCell::new(RealmRegistry::new()));
        let mut windows = Vec::with_capacity(chain.len() + 1);
        let mut parent = None;
        {
            let mut reg = registry.borrow_mut();
            for ancestor in chain.into_iter().rev() {
                let id = register(&mut reg, parent, &ancestor);
                windows.push((id, ancestor));
                parent = Some(id);
            }
        }
        let current = registry.borrow_mut().register(parent, true);
        windows.push((current, window.clone()));
        log::debug!("realm hierarchy depth {}", windows.len());

        let host = JsRealmHost {
            windows: RefCell::new(windows),
            registry: Rc::clone(&registry),
        };
        Self {
            bridge: ProxyBridge::new(host, Rc::clone(&registry)),
            registry,
            current,
            proxies: RefCell::new(HashMap::new()),
            senders: RefCell::new(HashMap::new()),
            location: RefCell::new(None),
        }
    }

    pub(crate) fn current_id(&self) -> WindowId {
        self.current
    }

    pub(crate) fn registry(&self) -> &RefCell<RealmRegistry> {
        &self.registry
    }

    pub(crate) fn window(&self, id: WindowId) -> Option<Window> {
        self.bridge.host().window(id)
    }

    pub(crate) fn set_location(&self, location: JsValue) {
        *self.location.borrow_mut() = Some(location);
    }

    /// Page-visible location of `id`: the synthetic one for this window,
    /// whatever the other realm installed otherwise.
    fn location_of(&self, id: WindowId) -> JsValue {
        if id == self.current {
            if let Some(loc) = self.location.borrow().as_ref() {
                return loc.clone();
            }
        }
        let Some(window) = self.window(id) else {
            return JsValue::UNDEFINED;
        };
        Reflect::get(&window, &JsValue::from_str("WB_wombat_location"))
            .ok()
            .filter(|v| v.is_object())
            .unwrap_or_else(|| window.location().into())
    }

    fn to_js(self: &Rc<Self>, value: Option<ProxyValue<JsValue>>) -> JsValue {
        match value {
            None => JsValue::UNDEFINED,
            Some(ProxyValue::Value(v)) => v,
            Some(ProxyValue::Wrapped(w)) => self.proxy_for(w.target()),
            Some(ProxyValue::Location(id)) => self.location_of(id),
        }
    }

    /// Stable JS proxy for `target`.
    pub(crate) fn proxy_for(self: &Rc<Self>, target: Target) -> JsValue {
        if let Some(existing) = self.proxies.borrow().get(&target) {
            return existing.clone();
        }
        let proxy = self.build_proxy(target);
        self.proxies.borrow_mut().insert(target, proxy.clone());
        proxy
    }

    fn build_proxy(self: &Rc<Self>, target: Target) -> JsValue {
        let handler = Object::new();

        let state = Rc::clone(self);
        let get = Closure::<dyn Fn(JsValue, JsValue) -> JsValue>::new(move |_shadow: JsValue, prop: JsValue| {
            let Some(real) = state.bridge.host().object(target) else {
                return JsValue::UNDEFINED;
            };
            match prop.as_string() {
                Some(name) if name == REAL_OBJECT => real,
                Some(name) => {
                    if let (Target::Window(id), "postMessage") = (target, name.as_str()) {
                        if let Some(marked) = state.marked_post_message(id) {
                            return marked;
                        }
                    }
                    let wrapper = state.bridge.wrap(target);
                    let value = state.bridge.get(&wrapper, &name);
                    state.to_js(value)
                }
                // Symbols
                None => Reflect::get(&real, &prop).unwrap_or(JsValue::UNDEFINED),
            }
        });

        let state = Rc::clone(self);
        let set = Closure::<dyn Fn(JsValue, JsValue, JsValue) -> bool>::new(
            move |_shadow: JsValue, prop: JsValue, value: JsValue| {
                let Some(name) = prop.as_string() else {
                    return state
                        .bridge
                        .host()
                        .object(target)
                        .map_or(false, |real| Reflect::set(&real, &prop, &value).unwrap_or(false));
                };
                let wrapper = state.bridge.wrap(target);
                match state.bridge.set(&wrapper, &name, value) {
                    SetOutcome::Stored => true,
                    SetOutcome::Navigate { window, url } => {
                        state.navigate(window, &url);
                        true
                    }
                }
            },
        );

        let state = Rc::clone(self);
        let has = Closure::<dyn Fn(JsValue, JsValue) -> bool>::new(move |_shadow: JsValue, prop: JsValue| {
            state
                .bridge
                .host()
                .object(target)
                .map_or(false, |real| Reflect::has(&real, &prop).unwrap_or(false))
        });

        let _ = Reflect::set(&handler, &JsValue::from_str("get"), get.as_ref());
        let _ = Reflect::set(&handler, &JsValue::from_str("set"), set.as_ref());
        let _ = Reflect::set(&handler, &JsValue::from_str("has"), has.as_ref());
        get.forget();
        set.forget();
        has.forget();

        Proxy::new(&Object::new(), &handler).into()
    }

    /// `location = url` assigned through a proxy.
    fn navigate(&self, id: WindowId, url: &str) {
        let location = self.location_of(id);
        let assign = Reflect::get(&location, &JsValue::from_str("assign"))
            .ok()
            .and_then(|f| f.dyn_into::<Function>().ok());
        match assign {
            Some(assign) => {
                if let Err(e) = assign.call1(&location, &JsValue::from_str(url)) {
                    log::warn!("navigation to {} failed: {:?}", url, e);
                }
            }
            None => log::debug!("no location to navigate for window {}", id.index()),
        }
    }

    /// `_wb_wombat.local_init(name)`: the replay object a wrapped script sees
    /// for a scoped global.
    pub(crate) fn local_init(self: &Rc<Self>, name: &str) -> JsValue {
        let wrapper = self.bridge.wrap(Target::Window(self.current));
        let value = self.bridge.get(&wrapper, name);
        self.to_js(value)
    }

    /// `postMessage` of another replay window `id` that first marks this
    /// window as the sender. `None` for this window and for windows no
    /// engine patched.
    fn marked_post_message(&self, id: WindowId) -> Option<JsValue> {
        if id == self.current {
            return None;
        }
        if let Some(existing) = self.senders.borrow().get(&id) {
            return Some(existing.clone());
        }
        let registry = self.registry.borrow();
        if !(registry.is_replay(id) && registry.is_initialized(id)) {
            return None;
        }
        drop(registry);
        let target = self.window(id)?;
        let source = self.window(self.current)?;
        let func = crate::dom::factory(
            "target, src, mark",
            "return function() {
                target[mark] = src;
                return target.postMessage.apply(target, arguments);
            };",
            &[&target.into(), &source.into(), &JsValue::from_str(SOURCE_MARK)],
        )
        .map_err(|e| log::debug!("postMessage wrapper not built: {:?}", e))
        .ok()?;
        self.senders.borrow_mut().insert(id, func.clone());
        Some(func)
    }

    /// Wrap an outgoing `postMessage` sent by `sender`, or by this window when
    /// no frame marked itself.
    pub(crate) fn wrap_message(
        &self,
        sender: Option<&Window>,
        message: serde_json::Value,
        from_origin: &str,
        target_origin: &str,
    ) -> Option<Envelope> {
        let marked = sender.map(|w| self.bridge.host().adopt(w.clone()));
        let mut registry = self.registry.borrow_mut();
        let sender = registry.message_sender(marked, self.current);
        registry.wrap_message(sender, message, from_origin, target_origin)
    }

    /// Window that sent an envelope carrying `src_id`, as a page-visible
    /// proxy.
    pub(crate) fn resolve_source(self: &Rc<Self>, src_id: u32) -> Option<JsValue> {
        let id = self.registry.borrow().resolve_source(src_id)?;
        Some(self.proxy_for(Target::Window(id)))
    }

    /// Initialized replay windows, other than this one, that see storage
    /// events from it.
    pub(crate) fn storage_peers(&self) -> Vec<Window> {
        let targets = self.registry.borrow().storage_targets(self.current);
        targets.into_iter().filter_map(|id| self.window(id)).collect()
    }
}
