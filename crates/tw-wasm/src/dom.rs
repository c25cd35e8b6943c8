//! DOM glue: element views and function wrappers
//!
//! Overrides are installed by small JS factories built once per realm. They
//! wrap a native function or accessor and call back into a Rust hook for the
//! argument or value that needs rewriting; the native is always what finally
//! runs.

use std::borrow::Cow;

use js_sys::{Array, Function, Object, Reflect};
use tw_core::{ElementView, InstallError};
use wasm_bindgen::closure::WasmClosure;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

// =============================================================================
// Element View
// =============================================================================

pub(crate) struct DomElement<'a> {
    el: &'a web_sys::Element,
}

impl<'a> DomElement<'a> {
    pub(crate) fn new(el: &'a web_sys::Element) -> Self {
        Self { el }
    }
}

impl ElementView for DomElement<'_> {
    fn tag_name(&self) -> Cow<'_, str> {
        Cow::Owned(self.el.tag_name())
    }

    fn attr(&self, name: &str) -> Option<Cow<'_, str>> {
        self.el.get_attribute(name).map(Cow::Owned)
    }

    fn document_base(&self) -> Option<Cow<'_, str>> {
        let node: &web_sys::Node = self.el.as_ref();
        node.base_uri().ok().flatten().map(Cow::Owned)
    }

    fn no_rewrite(&self) -> bool {
        Reflect::get(self.el, &JsValue::from_str("_no_rewrite")).map_or(false, |v| v.is_truthy())
    }
}

// =============================================================================
// Factories
// =============================================================================

struct Factories {
    wrap_args: Function,
    wrap_call: Function,
    wrap_result: Function,
    wrap_ctor: Function,
    define_accessor: Function,
    constant: Function,
}

impl Factories {
    fn new() -> Self {
        Self {
            wrap_args: Function::new_with_args(
                "orig, idx, hook",
                "return function() {
                    var a = Array.prototype.slice.call(arguments);
                    if (a.length > idx) a[idx] = hook(a[idx], this);
                    return orig.apply(this, a);
                };",
            ),
            wrap_call: Function::new_with_args(
                "orig, hook",
                "return function() {
                    return orig.apply(this, hook(Array.prototype.slice.call(arguments), this));
                };",
            ),
            wrap_result: Function::new_with_args(
                "orig, hook",
                "return function() {
                    return hook(orig.apply(this, arguments), this, arguments[0]);
                };",
            ),
            constant: Function::new_with_args("v", "return function() { return v; };"),
            wrap_ctor: Function::new_with_args(
                "orig, idx, hook",
                "var W = function() {
                    var a = Array.prototype.slice.call(arguments);
                    if (a.length > idx) a[idx] = hook(a[idx], a);
                    return Reflect.construct(orig, a, new.target || W);
                };
                W.prototype = orig.prototype;
                Object.setPrototypeOf(W, orig);
                return W;",
            ),
            define_accessor: Function::new_with_args(
                "proto, prop, getHook, setHook",
                "var d = Object.getOwnPropertyDescriptor(proto, prop);
                if (!d || !d.configurable || !d.get) return false;
                Object.defineProperty(proto, prop, {
                    configurable: true,
                    enumerable: d.enumerable,
                    get: function() {
                        var v = d.get.call(this);
                        return getHook ? getHook(v, this) : v;
                    },
                    set: function(v) {
                        if (d.set) d.set.call(this, setHook ? setHook(v, this) : v);
                    }
                });
                return true;",
            ),
        }
    }
}

thread_local! {
    static FACTORIES: Factories = Factories::new();
}

pub(crate) fn host_error(e: JsValue) -> InstallError {
    InstallError::Host(e.as_string().unwrap_or_else(|| format!("{:?}", e)))
}

/// Hand `closure` to JS for the lifetime of the realm.
pub(crate) fn js_fn<T: ?Sized + WasmClosure>(closure: Closure<T>) -> Function {
    let func: Function = closure.as_ref().unchecked_ref::<Function>().clone();
    closure.forget();
    func
}

/// A `(value, this) -> value` hook callable from JS.
pub(crate) fn hook(f: impl Fn(JsValue, JsValue) -> JsValue + 'static) -> Function {
    js_fn(Closure::<dyn Fn(JsValue, JsValue) -> JsValue>::new(f))
}

/// `(value, this, extra) -> value`, for result filters.
pub(crate) fn hook3(f: impl Fn(JsValue, JsValue, JsValue) -> JsValue + 'static) -> Function {
    js_fn(Closure::<dyn Fn(JsValue, JsValue, JsValue) -> JsValue>::new(f))
}

/// Run a one-off JS factory `function(args) { body }` with `params`.
pub(crate) fn factory(args: &str, body: &str, params: &[&JsValue]) -> Result<JsValue, InstallError> {
    let params: Array = params.iter().collect();
    Function::new_with_args(args, body)
        .apply(&JsValue::NULL, &params)
        .map_err(host_error)
}

/// A function always returning `value`.
pub(crate) fn constant(value: &JsValue) -> Function {
    FACTORIES
        .with(|f| f.constant.call1(&JsValue::NULL, value))
        .map(|v| v.unchecked_into())
        .unwrap_or_else(|_| Function::new_no_args("return undefined;"))
}

/// Native `(get, set)` of accessor `prop` on `proto`.
pub(crate) fn native_accessor(proto: &JsValue, prop: &'static str) -> Result<(Function, Option<Function>), InstallError> {
    let proto = proto.dyn_ref::<Object>().ok_or(InstallError::Unsupported(prop))?;
    let desc = Object::get_own_property_descriptor(proto, &JsValue::from_str(prop));
    let field = |name: &str| {
        Reflect::get(&desc, &JsValue::from_str(name))
            .ok()
            .and_then(|f| f.dyn_into::<Function>().ok())
    };
    let get = field("get").ok_or(InstallError::Unsupported(prop))?;
    Ok((get, field("set")))
}

/// `global[name]` if it is a function.
pub(crate) fn lookup_function(target: &JsValue, name: &'static str) -> Result<Function, InstallError> {
    Reflect::get(target, &JsValue::from_str(name))
        .ok()
        .and_then(|v| v.dyn_into::<Function>().ok())
        .ok_or(InstallError::Unsupported(name))
}

/// `global[iface].prototype`.
pub(crate) fn prototype_of(global: &JsValue, iface: &'static str) -> Result<JsValue, InstallError> {
    let ctor = lookup_function(global, iface)?;
    Reflect::get(&ctor, &JsValue::from_str("prototype"))
        .ok()
        .filter(|p| p.is_object())
        .ok_or(InstallError::Unsupported(iface))
}

pub(crate) fn assign(target: &JsValue, name: &str, value: &JsValue) -> Result<(), InstallError> {
    match Reflect::set(target, &JsValue::from_str(name), value) {
        Ok(true) => Ok(()),
        Ok(false) => Err(InstallError::NotConfigurable(name.to_string())),
        Err(e) => Err(host_error(e)),
    }
}

/// Replace `target[name]` with a wrapper passing argument `idx` through
/// `hook` before calling the native.
pub(crate) fn wrap_method(target: &JsValue, name: &'static str, idx: u32, hook: &Function) -> Result<(), InstallError> {
    let orig = lookup_function(target, name)?;
    let wrapped = FACTORIES
        .with(|f| f.wrap_args.call3(&JsValue::NULL, &orig, &JsValue::from(idx), hook))
        .map_err(host_error)?;
    assign(target, name, &wrapped)
}

/// Replace `target[name]` with a wrapper passing the whole argument list
/// through `hook(args, this) -> args`.
pub(crate) fn wrap_call(target: &JsValue, name: &'static str, hook: &Function) -> Result<(), InstallError> {
    let orig = lookup_function(target, name)?;
    let wrapped = FACTORIES
        .with(|f| f.wrap_call.call2(&JsValue::NULL, &orig, hook))
        .map_err(host_error)?;
    assign(target, name, &wrapped)
}

/// Replace `target[name]` with a wrapper filtering the native result through
/// `hook(result, this, firstArg)`.
pub(crate) fn wrap_result(target: &JsValue, name: &'static str, hook: &Function) -> Result<(), InstallError> {
    let orig = lookup_function(target, name)?;
    let wrapped = FACTORIES
        .with(|f| f.wrap_result.call2(&JsValue::NULL, &orig, hook))
        .map_err(host_error)?;
    assign(target, name, &wrapped)
}

/// Replace the constructor `global[name]`. `instanceof` and statics keep
/// working through the prototype chain.
pub(crate) fn wrap_constructor(global: &JsValue, name: &'static str, idx: u32, hook: &Function) -> Result<(), InstallError> {
    let orig = lookup_function(global, name)?;
    let wrapped = FACTORIES
        .with(|f| f.wrap_ctor.call3(&JsValue::NULL, &orig, &JsValue::from(idx), hook))
        .map_err(host_error)?;
    assign(global, name, &wrapped)
}

/// Redefine accessor `prop` on `proto`, filtering reads through `get` and
/// writes through `set`.
pub(crate) fn define_accessor(
    proto: &JsValue,
    prop: &'static str,
    get: Option<&Function>,
    set: Option<&Function>,
) -> Result<(), InstallError> {
    let none = JsValue::UNDEFINED;
    let args = Array::of4(
        proto,
        &JsValue::from_str(prop),
        get.map_or(&none, |f| f.as_ref()),
        set.map_or(&none, |f| f.as_ref()),
    );
    let installed = FACTORIES
        .with(|f| f.define_accessor.apply(&JsValue::NULL, &args))
        .map_err(host_error)?;
    if installed.is_truthy() {
        Ok(())
    } else {
        Err(InstallError::NotConfigurable(prop.to_string()))
    }
}

/// Define a plain getter (and optional setter) on `target`.
pub(crate) fn define_property(
    target: &JsValue,
    prop: &str,
    get: &Function,
    set: Option<&Function>,
) -> Result<(), InstallError> {
    let desc = Object::new();
    let _ = Reflect::set(&desc, &JsValue::from_str("configurable"), &JsValue::TRUE);
    let _ = Reflect::set(&desc, &JsValue::from_str("get"), get);
    if let Some(set) = set {
        let _ = Reflect::set(&desc, &JsValue::from_str("set"), set);
    }
    let target = target
        .dyn_ref::<Object>()
        .ok_or_else(|| InstallError::Host(format!("{} target is not an object", prop)))?;
    Reflect::define_property(target, &JsValue::from_str(prop), &desc)
        .map_err(host_error)
        .and_then(|ok| if ok { Ok(()) } else { Err(InstallError::NotConfigurable(prop.to_string())) })
}

/// `href` of URL-like objects (`URL`, `Location`, anchors), or the string
/// itself.
pub(crate) fn url_like(value: &JsValue) -> tw_core::UrlLike {
    if let Some(s) = value.as_string() {
        return tw_core::UrlLike::Str(s);
    }
    if value.is_object() {
        if let Some(href) = Reflect::get(value, &JsValue::from_str("href")).ok().and_then(|h| h.as_string()) {
            return tw_core::UrlLike::Object { href };
        }
    }
    tw_core::UrlLike::Opaque
}
