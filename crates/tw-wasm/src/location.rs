//! `WB_wombat_location` and native history access

use std::cell::OnceCell;
use std::rc::Rc;

use js_sys::Function;
use tw_core::{LocationProp, NativeHistory, NativeLocation, SyntheticLocation};
use wasm_bindgen::prelude::*;

use crate::with_rewriter;

/// The realm's real `Location`.
pub(crate) struct JsLocation(pub(crate) web_sys::Location);

impl NativeLocation for JsLocation {
    fn href(&self) -> String {
        self.0.href().unwrap_or_default()
    }

    fn assign(&self, url: &str) {
        if let Err(e) = self.0.assign(url) {
            log::warn!("location.assign({}) failed: {:?}", url, e);
        }
    }

    fn replace(&self, url: &str) {
        if let Err(e) = self.0.replace(url) {
            log::warn!("location.replace({}) failed: {:?}", url, e);
        }
    }

    fn reload(&self) {
        let _ = self.0.reload();
    }

    fn set_hash(&self, hash: &str) {
        let _ = self.0.set_hash(hash);
    }
}

/// Native `pushState`/`replaceState`, saved before they are patched.
pub(crate) struct JsHistory {
    pub(crate) history: web_sys::History,
    pub(crate) push: Function,
    pub(crate) replace: Function,
}

impl JsHistory {
    fn call(&self, func: &Function, state: JsValue, title: &str, url: Option<&str>) {
        let url = url.map_or(JsValue::UNDEFINED, JsValue::from_str);
        if let Err(e) = func.call3(&self.history, &state, &JsValue::from_str(title), &url) {
            log::warn!("history update failed: {:?}", e);
        }
    }
}

impl NativeHistory for JsHistory {
    type State = JsValue;

    fn push_state(&self, state: JsValue, title: &str, url: Option<&str>) {
        self.call(&self.push, state, title, url);
    }

    fn replace_state(&self, state: JsValue, title: &str, url: Option<&str>) {
        self.call(&self.replace, state, title, url);
    }
}

thread_local! {
    static SYNTHETIC: OnceCell<Rc<SyntheticLocation<JsLocation>>> = const { OnceCell::new() };
}

/// This realm's synthetic location.
pub(crate) fn synthetic(window: &web_sys::Window) -> Rc<SyntheticLocation<JsLocation>> {
    SYNTHETIC.with(|cell| Rc::clone(cell.get_or_init(|| Rc::new(SyntheticLocation::new(JsLocation(window.location()))))))
}

// =============================================================================
// ReplayLocation
// =============================================================================

/// Page-visible location reporting original URLs.
#[wasm_bindgen]
pub struct ReplayLocation {
    inner: Rc<SyntheticLocation<JsLocation>>,
}

impl ReplayLocation {
    pub(crate) fn new(inner: Rc<SyntheticLocation<JsLocation>>) -> Self {
        Self { inner }
    }

    fn read(&self, prop: LocationProp) -> String {
        with_rewriter(|rw| self.inner.get(rw, prop)).unwrap_or_else(|_| self.inner.native().href())
    }

    fn write(&self, prop: LocationProp, value: &str) {
        if let Err(e) = with_rewriter(|rw| self.inner.set(rw, prop, value)) {
            log::warn!("location.{} not set: {:?}", prop.name(), e);
        }
    }
}

#[wasm_bindgen]
impl ReplayLocation {
    #[wasm_bindgen(getter)]
    pub fn href(&self) -> String {
        self.read(LocationProp::Href)
    }

    #[wasm_bindgen(setter)]
    pub fn set_href(&self, value: String) {
        self.write(LocationProp::Href, &value);
    }

    #[wasm_bindgen(getter)]
    pub fn hash(&self) -> String {
        self.read(LocationProp::Hash)
    }

    #[wasm_bindgen(setter)]
    pub fn set_hash(&self, value: String) {
        self.write(LocationProp::Hash, &value);
    }

    #[wasm_bindgen(getter)]
    pub fn pathname(&self) -> String {
        self.read(LocationProp::Pathname)
    }

    #[wasm_bindgen(setter)]
    pub fn set_pathname(&self, value: String) {
        self.write(LocationProp::Pathname, &value);
    }

    #[wasm_bindgen(getter)]
    pub fn host(&self) -> String {
        self.read(LocationProp::Host)
    }

    #[wasm_bindgen(setter)]
    pub fn set_host(&self, value: String) {
        self.write(LocationProp::Host, &value);
    }

    #[wasm_bindgen(getter)]
    pub fn hostname(&self) -> String {
        self.read(LocationProp::Hostname)
    }

    #[wasm_bindgen(setter)]
    pub fn set_hostname(&self, value: String) {
        self.write(LocationProp::Hostname, &value);
    }

    #[wasm_bindgen(getter)]
    pub fn origin(&self) -> String {
        self.read(LocationProp::Origin)
    }

    #[wasm_bindgen(setter)]
    pub fn set_origin(&self, value: String) {
        self.write(LocationProp::Origin, &value);
    }

    #[wasm_bindgen(getter)]
    pub fn port(&self) -> String {
        self.read(LocationProp::Port)
    }

    #[wasm_bindgen(setter)]
    pub fn set_port(&self, value: String) {
        self.write(LocationProp::Port, &value);
    }

    #[wasm_bindgen(getter)]
    pub fn protocol(&self) -> String {
        self.read(LocationProp::Protocol)
    }

    #[wasm_bindgen(setter)]
    pub fn set_protocol(&self, value: String) {
        self.write(LocationProp::Protocol, &value);
    }

    #[wasm_bindgen(getter)]
    pub fn search(&self) -> String {
        self.read(LocationProp::Search)
    }

    #[wasm_bindgen(setter)]
    pub fn set_search(&self, value: String) {
        self.write(LocationProp::Search, &value);
    }

    pub fn assign(&self, url: &str) -> Result<bool, JsValue> {
        with_rewriter(|rw| self.inner.assign(rw, url))
    }

    pub fn replace(&self, url: &str) -> Result<bool, JsValue> {
        with_rewriter(|rw| self.inner.replace(rw, url))
    }

    pub fn reload(&self) {
        self.inner.reload();
    }

    #[wasm_bindgen(js_name = toString)]
    pub fn to_js_string(&self) -> String {
        self.href()
    }

    #[wasm_bindgen(js_name = valueOf)]
    pub fn value_of(&self) -> String {
        self.href()
    }
}
