//! `localStorage` / `sessionStorage` replacement
//!
//! Mutations queue their events; they are dispatched once the mutation
//! returned so page listeners may read the storage again.

use std::cell::{OnceCell, RefCell};
use std::rc::Rc;

use js_sys::{Object, Reflect};
use tw_core::{ReplayStorage, StorageArea, StorageEvent};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::Window;

struct Shared {
    storage: RefCell<ReplayStorage>,
    pending: Rc<RefCell<Vec<StorageEvent>>>,
    /// Page-visible object, reported as `event.storageArea`.
    handle: OnceCell<JsValue>,
}

/// Quota-free `Storage`.
#[wasm_bindgen(js_name = ReplayStorage)]
pub struct ReplayStorageJs {
    shared: Rc<Shared>,
}

/// Create the page-visible storage object for `area`.
pub(crate) fn create(area: StorageArea, url: String) -> JsValue {
    let pending = Rc::new(RefCell::new(Vec::new()));
    let mut storage = ReplayStorage::new(area, url);
    let queue = Rc::clone(&pending);
    storage.add_listener(move |event| queue.borrow_mut().push(event.clone()));

    let shared = Rc::new(Shared {
        storage: RefCell::new(storage),
        pending,
        handle: OnceCell::new(),
    });
    let handle: JsValue = ReplayStorageJs { shared: Rc::clone(&shared) }.into();
    let _ = shared.handle.set(handle.clone());
    handle
}

impl ReplayStorageJs {
    fn mutate(&self, f: impl FnOnce(&mut ReplayStorage)) {
        {
            let mut storage = self.shared.storage.borrow_mut();
            if let Some(url) = current_url() {
                storage.set_url(url);
            }
            f(&mut storage);
        }
        let events = std::mem::take(&mut *self.shared.pending.borrow_mut());
        let handle = self.shared.handle.get().cloned().unwrap_or(JsValue::NULL);
        for event in &events {
            dispatch(event, &handle);
        }
    }
}

#[wasm_bindgen(js_class = ReplayStorage)]
impl ReplayStorageJs {
    #[wasm_bindgen(js_name = getItem)]
    pub fn get_item(&self, key: &str) -> Option<String> {
        self.shared.storage.borrow().get_item(key).map(String::from)
    }

    #[wasm_bindgen(js_name = setItem)]
    pub fn set_item(&self, key: &str, value: &str) {
        self.mutate(|s| s.set_item(key, value));
    }

    #[wasm_bindgen(js_name = removeItem)]
    pub fn remove_item(&self, key: &str) {
        self.mutate(|s| s.remove_item(key));
    }

    pub fn clear(&self) {
        self.mutate(ReplayStorage::clear);
    }

    pub fn key(&self, index: u32) -> Option<String> {
        self.shared.storage.borrow().key(index as usize).map(String::from)
    }

    #[wasm_bindgen(getter)]
    pub fn length(&self) -> u32 {
        self.shared.storage.borrow().len() as u32
    }
}

fn current_url() -> Option<String> {
    let href = web_sys::window()?.location().href().ok()?;
    crate::with_rewriter(|rw| rw.extract_original(&href)).ok()
}

/// Fire `storage` on this window and on every other replay window of the
/// same realm tree.
fn dispatch(event: &StorageEvent, handle: &JsValue) {
    let Some(window) = web_sys::window() else {
        return;
    };
    let mut targets = vec![window];
    if let Some(realm) = crate::realm::current() {
        targets.extend(realm.storage_peers());
    }
    for target in &targets {
        match build_event(target, event, handle) {
            Ok(js_event) => {
                if let Err(e) = target.dispatch_event(&js_event) {
                    log::debug!("storage event not dispatched: {:?}", e);
                }
            }
            Err(e) => log::debug!("storage event not created: {:?}", e),
        }
    }
}

fn build_event(target: &Window, event: &StorageEvent, handle: &JsValue) -> Result<web_sys::Event, JsValue> {
    let ctor = Reflect::get(target, &JsValue::from_str("StorageEvent"))?.dyn_into::<js_sys::Function>()?;
    let init = Object::new();
    let opt = |v: &Option<String>| v.as_deref().map_or(JsValue::NULL, JsValue::from_str);
    Reflect::set(&init, &JsValue::from_str("key"), &opt(&event.key))?;
    Reflect::set(&init, &JsValue::from_str("oldValue"), &opt(&event.old_value))?;
    Reflect::set(&init, &JsValue::from_str("newValue"), &opt(&event.new_value))?;
    Reflect::set(&init, &JsValue::from_str("url"), &JsValue::from_str(&event.url))?;

    let args = js_sys::Array::of2(&JsValue::from_str("storage"), &init);
    let js_event = Reflect::construct(&ctor, &args)?;

    let desc = Object::new();
    Reflect::set(&desc, &JsValue::from_str("value"), handle)?;
    Reflect::set(&desc, &JsValue::from_str("writable"), &JsValue::FALSE)?;
    Reflect::define_property(js_event.unchecked_ref::<Object>(), &JsValue::from_str("storageArea"), &desc)?;
    Ok(js_event.unchecked_into())
}
