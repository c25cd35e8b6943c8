//! Browser overrides
//!
//! Every override is an [`Override`] entry: a capability bit, a name for the
//! logs and an install function taking the realm's `Window`. Hooks that run
//! while the engine is already borrowed (a native call made from inside a
//! rewrite) pass their value through untouched.

use std::cell::RefCell;
use std::rc::Rc;

use js_sys::{Array, Function, Object, Reflect, Uint8Array};
use serde_json::Value;
use tw_core::history::{is_icon_rel, StateMethod};
use tw_core::interceptors::{rewrite_fragment, rewrite_style_text, wrap_script_text};
use tw_core::messaging::{unwrap_incoming, Envelope};
use tw_core::network::{NetworkApi, NetworkShim, REQUESTED_WITH_HEADER, REQUESTED_WITH_VALUE};
use tw_core::realm::{LocationReassignWatcher, Target, LOCATION_POLL_INTERVAL_MS};
use tw_core::{
    rewrite_attr, unrewrite_attr, AppliedOverrides, CapabilityInstaller, ControlChannel, ControlMessage,
    DocumentShim, HistoryError, HistoryShim, HtmlOptions, InstallError, InstallerRegistry, LocationProp, Rewriter,
    StorageArea, UrlLike,
};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Element, Window};

use crate::dom::{
    assign, constant, define_accessor, define_property, factory, hook, hook3, host_error, js_fn, lookup_function,
    native_accessor, prototype_of, url_like, wrap_call, wrap_constructor, wrap_method, wrap_result, DomElement,
};
use crate::location::{synthetic, JsHistory, ReplayLocation};
use crate::realm::{self, RealmState, REPLAY_MARKER};
use crate::{storage, to_js, with_engine, with_rewriter, with_sink};

// =============================================================================
// Entry Point
// =============================================================================

/// Patch the current realm once. A second call, or a call in a window
/// another engine already initialized, applies nothing.
pub(crate) fn install() -> Result<AppliedOverrides, JsValue> {
    let window = web_sys::window().ok_or_else(|| JsValue::from_str("install_overrides needs a window"))?;
    let info = with_rewriter(|rw| rw.info().clone())?;
    let realm = realm::attach(&window);

    if !realm.registry().borrow_mut().mark_initialized(realm.current_id()) {
        log::debug!("overrides already installed");
        return Ok(AppliedOverrides::empty());
    }

    let marker = Object::new();
    Reflect::set(&marker, &JsValue::from_str("actual"), &JsValue::TRUE)?;
    Reflect::set(&window, &JsValue::from_str(REPLAY_MARKER), &marker)?;

    let applied = overrides().install_all(&window, AppliedOverrides::enabled_for(&info), AppliedOverrides::empty());
    log::info!("overrides installed: {:?}", applied);
    Ok(applied)
}

/// Name accepted by `rewrite_for`.
pub(crate) fn network_api(name: &str) -> Option<NetworkApi> {
    let api = match name.to_ascii_lowercase().as_str() {
        "fetch" => NetworkApi::Fetch,
        "xhr" => NetworkApi::XhrOpen,
        "request" => NetworkApi::Request,
        "eventsource" => NetworkApi::EventSource,
        "websocket" => NetworkApi::WebSocket,
        "beacon" => NetworkApi::SendBeacon,
        "open" => NetworkApi::WindowOpen,
        "redirect" => NetworkApi::ResponseRedirect,
        "worker" => NetworkApi::Worker,
        "sharedworker" => NetworkApi::SharedWorker,
        "serviceworker" => NetworkApi::ServiceWorkerRegister,
        "scope" => NetworkApi::ServiceWorkerScope,
        "worklet" => NetworkApi::WorkletAddModule,
        "importscripts" => NetworkApi::ImportScripts,
        _ => return None,
    };
    Some(api)
}

struct Override {
    capability: AppliedOverrides,
    name: &'static str,
    install: fn(&Window) -> Result<(), InstallError>,
}

impl CapabilityInstaller<Window> for Override {
    fn capability(&self) -> AppliedOverrides {
        self.capability
    }

    fn name(&self) -> &'static str {
        self.name
    }

    fn install(&self, window: &Window) -> Result<(), InstallError> {
        (self.install)(window)
    }
}

/// Registration order matters: history listens for control messages with
/// the native `addEventListener` before postMessage filtering patches it.
fn overrides() -> InstallerRegistry<Window> {
    let table: [(AppliedOverrides, &'static str, fn(&Window) -> Result<(), InstallError>); 21] = [
        (AppliedOverrides::HISTORY, "history", install_history),
        (AppliedOverrides::LOCATION, "location", install_location),
        (AppliedOverrides::PROXY, "proxy", install_proxy),
        (AppliedOverrides::ELEMENT_ATTRS, "element-attrs", install_element_attrs),
        (AppliedOverrides::HTML_INSERTION, "html-insertion", install_html_insertion),
        (AppliedOverrides::DOCUMENT_WRITE, "document-write", install_document_write),
        (AppliedOverrides::STYLE, "style", install_style),
        (AppliedOverrides::FETCH, "fetch", install_fetch),
        (AppliedOverrides::XHR, "xhr", install_xhr),
        (AppliedOverrides::WEBSOCKET, "websocket", install_websocket),
        (AppliedOverrides::EVENT_SOURCE, "event-source", install_event_source),
        (AppliedOverrides::WORKERS, "workers", install_workers),
        (AppliedOverrides::BEACON, "beacon", install_beacon),
        (AppliedOverrides::WINDOW_OPEN, "window-open", install_window_open),
        (AppliedOverrides::DATE, "date", install_date),
        (AppliedOverrides::RANDOM, "random", install_random),
        (AppliedOverrides::CRYPTO, "crypto", install_crypto),
        (AppliedOverrides::COOKIE, "cookie", install_cookie),
        (AppliedOverrides::STORAGE, "storage", install_storage),
        (AppliedOverrides::AUTO_FETCH, "auto-fetch", install_auto_fetch),
        (AppliedOverrides::POST_MESSAGE, "post-message", install_post_message),
    ];
    let mut registry = InstallerRegistry::new();
    for (capability, name, install) in table {
        registry.register(Box::new(Override {
            capability,
            name,
            install,
        }));
    }
    registry
}

// =============================================================================
// Hooks
// =============================================================================

fn document(window: &Window) -> Result<web_sys::Document, InstallError> {
    window.document().ok_or(InstallError::Unsupported("document"))
}

fn document_title(window: &Window) -> String {
    window.document().map(|d| d.title()).unwrap_or_default()
}

/// Log and continue: one missing property must not drop its whole override.
fn optional(what: &str, result: Result<(), InstallError>) {
    if let Err(e) = result {
        log::debug!("{} not patched: {}", what, e);
    }
}

/// Rewrite string values with `f`; everything else passes through.
fn string_hook(f: impl Fn(&Rewriter, &str, &JsValue) -> String + 'static) -> Function {
    hook(move |value, this| {
        let Some(s) = value.as_string() else {
            return value;
        };
        with_rewriter(|rw| f(rw, &s, &this)).map_or(value, |out| JsValue::from_str(&out))
    })
}

/// Element-bound rewrite feeding the auto-fetch sink.
fn element_hook(
    f: impl Fn(&Rewriter, &mut dyn tw_core::PreserveSink, &Element, &str) -> String + 'static,
) -> Function {
    hook(move |value, this| {
        let (Some(s), Some(el)) = (value.as_string(), this.dyn_ref::<Element>()) else {
            return value;
        };
        with_sink(|rw, sink| f(rw, sink, el, &s)).map_or(value, |out| JsValue::from_str(&out))
    })
}

fn network_hook(api: NetworkApi) -> Function {
    hook(move |value, _this| {
        let like = url_like(&value);
        if matches!(like, UrlLike::Opaque) {
            return value;
        }
        match with_rewriter(|rw| NetworkShim::new(rw).rewrite(api, like)) {
            Ok(UrlLike::Str(url)) | Ok(UrlLike::Object { href: url }) => JsValue::from_str(&url),
            _ => value,
        }
    })
}

fn security_error(e: HistoryError) -> JsValue {
    let err = js_sys::Error::new(&e.to_string());
    err.set_name("SecurityError");
    err.into()
}

fn listen(target: &web_sys::EventTarget, event: &str, f: Function) -> Result<(), InstallError> {
    target.add_event_listener_with_callback(event, &f).map_err(host_error)
}

// =============================================================================
// Navigation
// =============================================================================

fn install_history(window: &Window) -> Result<(), InstallError> {
    let history = window.history().map_err(host_error)?;
    let native = Rc::new(JsHistory {
        push: lookup_function(&history, "pushState")?,
        replace: lookup_function(&history, "replaceState")?,
        history: history.clone(),
    });
    let location = synthetic(window);

    for method in [StateMethod::Push, StateMethod::Replace] {
        let native = Rc::clone(&native);
        let location = Rc::clone(&location);
        let window = window.clone();
        let patched = js_fn(Closure::<dyn Fn(JsValue, JsValue, JsValue) -> Result<(), JsValue>>::new(
            move |state: JsValue, title: JsValue, url: JsValue| {
                let title = title.as_string().unwrap_or_default();
                let url = url_like(&url).as_str().map(str::to_string);
                let doc_title = document_title(&window);
                let raw_state = state.clone();
                let result = with_engine(|engine| {
                    let shim = HistoryShim::new(&engine.rw, &engine.channel);
                    match method {
                        StateMethod::Push => {
                            shim.push_state(&*location, &*native, state, &title, url.as_deref(), &doc_title)
                        }
                        StateMethod::Replace => {
                            shim.replace_state(&*location, &*native, state, &title, url.as_deref(), &doc_title)
                        }
                    }
                });
                match result {
                    Ok(outcome) => outcome.map_err(security_error),
                    Err(_) => {
                        let native_fn = match method {
                            StateMethod::Push => &native.push,
                            StateMethod::Replace => &native.replace,
                        };
                        let url = url.map_or(JsValue::UNDEFINED, |u| JsValue::from_str(&u));
                        native_fn.call3(&native.history, &raw_state, &JsValue::from_str(&title), &url)?;
                        Ok(())
                    }
                }
            },
        ));
        let name = match method {
            StateMethod::Push => "pushState",
            StateMethod::Replace => "replaceState",
        };
        assign(&history, name, &patched)?;
    }

    let target: &web_sys::EventTarget = window.as_ref();
    {
        let location = Rc::clone(&location);
        let window = window.clone();
        listen(
            target,
            "popstate",
            js_fn(Closure::<dyn Fn()>::new(move || {
                let doc_title = document_title(&window);
                let _ = with_engine(|e| HistoryShim::new(&e.rw, &e.channel).on_popstate(&*location, &doc_title));
            })),
        )?;
    }
    {
        let location = Rc::clone(&location);
        listen(
            target,
            "hashchange",
            js_fn(Closure::<dyn Fn()>::new(move || {
                let _ = with_engine(|e| {
                    let msg = location.hashchange_message(&e.rw);
                    e.channel.send(msg);
                });
            })),
        )?;
    }
    {
        // outer_hashchange from the archive UI
        let location = Rc::clone(&location);
        listen(
            target,
            "message",
            js_fn(Closure::<dyn Fn(web_sys::MessageEvent)>::new(move |event: web_sys::MessageEvent| {
                let Ok(data) = serde_wasm_bindgen::from_value::<Value>(event.data()) else {
                    return;
                };
                if let Some(msg @ ControlMessage::OuterHashChange { .. }) = ControlMessage::from_json(&data) {
                    let _ = with_rewriter(|rw| location.handle_control(rw, &msg));
                }
            })),
        )?;
    }
    {
        let location = Rc::clone(&location);
        let window = window.clone();
        listen(
            target,
            "load",
            js_fn(Closure::<dyn Fn()>::new(move || {
                let Some(doc) = window.document() else {
                    return;
                };
                let icons = favicons(&doc);
                let title = doc.title();
                let ready_state = doc.ready_state();
                let _ = with_engine(|e| {
                    HistoryShim::new(&e.rw, &e.channel).page_loaded(&*location, &title, &icons, &ready_state)
                });
            })),
        )?;
    }

    let doc_proto = prototype_of(window, "Document")?;
    let title_hook = hook(move |value, _this| {
        if let Some(title) = value.as_string() {
            let _ = with_engine(|e| HistoryShim::new(&e.rw, &e.channel).title_changed(&*location, &title));
        }
        value
    });
    optional("document.title", define_accessor(&doc_proto, "title", None, Some(&title_hook)));
    Ok(())
}

/// Raw `(href, rel)` of `<link rel~=icon>` elements.
fn favicons(doc: &web_sys::Document) -> Vec<(String, String)> {
    let Ok(links) = doc.query_selector_all("link[rel*='icon' i]") else {
        return Vec::new();
    };
    (0..links.length())
        .filter_map(|i| links.get(i)?.dyn_into::<Element>().ok())
        .filter_map(|el| {
            let rel = el.get_attribute("rel")?;
            let href = el.get_attribute("href")?;
            is_icon_rel(&rel).then_some((href, rel))
        })
        .collect()
}

fn install_location(window: &Window) -> Result<(), InstallError> {
    let location = synthetic(window);
    let replay: JsValue = ReplayLocation::new(Rc::clone(&location)).into();
    let realm = realm::attach(window);
    realm.set_location(replay.clone());

    let getter = constant(&replay);
    let setter = {
        let location = Rc::clone(&location);
        js_fn(Closure::<dyn Fn(JsValue)>::new(move |value: JsValue| {
            if let Some(url) = url_like(&value).as_str() {
                let _ = with_rewriter(|rw| location.assign(rw, url));
            }
        }))
    };

    let doc = document(window)?;
    let defined = define_property(window, "WB_wombat_location", &getter, Some(&setter))
        .and_then(|()| define_property(&doc, "WB_wombat_location", &getter, Some(&setter)));
    if let Err(e) = defined {
        log::debug!("WB_wombat_location accessor unavailable ({}), polling instead", e);
        poll_location(window, &replay, location)?;
    }

    let doc_proto = prototype_of(window, "Document")?;
    let url_hook = string_hook(|rw, raw, _| DocumentShim::new(rw).url(raw));
    optional("document.URL", define_accessor(&doc_proto, "URL", Some(&url_hook), None));
    optional("document.documentURI", define_accessor(&doc_proto, "documentURI", Some(&url_hook), None));
    let referrer_hook = string_hook(|rw, raw, _| DocumentShim::new(rw).referrer(raw));
    optional("document.referrer", define_accessor(&doc_proto, "referrer", Some(&referrer_hook), None));
    let domain_hook = string_hook(|rw, _, _| DocumentShim::new(rw).domain());
    optional("document.domain", define_accessor(&doc_proto, "domain", Some(&domain_hook), None));
    Ok(())
}

/// Plain slot plus a timer catching `WB_wombat_location = "..."`.
fn poll_location(
    window: &Window,
    replay: &JsValue,
    location: Rc<tw_core::SyntheticLocation<crate::location::JsLocation>>,
) -> Result<(), InstallError> {
    let slot = JsValue::from_str("WB_wombat_location");
    Reflect::set(window, &slot, replay).map_err(host_error)?;

    let watcher = RefCell::new(LocationReassignWatcher::new());
    let owner = window.clone();
    let replay = replay.clone();
    let tick = js_fn(Closure::<dyn Fn()>::new(move || {
        let current = Reflect::get(&owner, &slot).unwrap_or(JsValue::UNDEFINED);
        let assigned = if Object::is(&current, &replay) { None } else { url_like(&current).as_str().map(str::to_string) };
        if let Some(url) = watcher.borrow_mut().poll(assigned.as_deref()) {
            let _ = Reflect::set(&owner, &slot, &replay);
            let _ = with_rewriter(|rw| location.assign(rw, &url));
        }
    }));
    window
        .set_interval_with_callback_and_timeout_and_arguments_0(&tick, LOCATION_POLL_INTERVAL_MS as i32)
        .map(|_| ())
        .map_err(host_error)
}

fn install_proxy(window: &Window) -> Result<(), InstallError> {
    lookup_function(&js_sys::global(), "Proxy")?;
    let realm = realm::attach(window);
    let marker = Reflect::get(window, &JsValue::from_str(REPLAY_MARKER)).map_err(host_error)?;

    let state = Rc::clone(&realm);
    let local_init = js_fn(Closure::<dyn Fn(JsValue) -> JsValue>::new(move |name: JsValue| match name.as_string() {
        Some(name) => state.local_init(&name),
        None => JsValue::UNDEFINED,
    }));
    assign(&marker, "local_init", &local_init)?;

    let top = realm.registry().borrow().replay_top(realm.current_id());
    let top_proxy = realm.proxy_for(Target::Window(top));
    assign(window, "__WB_replay_top", &top_proxy)
}

// =============================================================================
// DOM
// =============================================================================

/// URL-bearing element properties, by interface.
const URL_PROPERTIES: &[(&'static str, &[&'static str])] = &[
    ("HTMLImageElement", &["src", "srcset"]),
    ("HTMLScriptElement", &["src"]),
    ("HTMLLinkElement", &["href"]),
    ("HTMLIFrameElement", &["src"]),
    ("HTMLFrameElement", &["src"]),
    ("HTMLMediaElement", &["src"]),
    ("HTMLSourceElement", &["src", "srcset"]),
    ("HTMLVideoElement", &["poster"]),
    ("HTMLFormElement", &["action"]),
    ("HTMLInputElement", &["src"]),
    ("HTMLEmbedElement", &["src"]),
    ("HTMLObjectElement", &["data"]),
    ("HTMLTrackElement", &["src"]),
    ("HTMLBaseElement", &["href"]),
    ("HTMLAreaElement", &["href"]),
    ("HTMLAnchorElement", &["href"]),
];

fn install_element_attrs(window: &Window) -> Result<(), InstallError> {
    let element = prototype_of(window, "Element")?;

    let set_hook = hook(|args, this| {
        let (Some(el), Ok(args)) = (this.dyn_ref::<Element>(), args.dyn_into::<Array>()) else {
            return JsValue::UNDEFINED;
        };
        if let (Some(name), Some(value)) = (args.get(0).as_string(), args.get(1).as_string()) {
            let view = DomElement::new(el);
            if let Ok(out) = with_sink(|rw, sink| rewrite_attr(rw, &view, &name, &value, sink).into_owned()) {
                args.set(1, JsValue::from_str(&out));
            }
        }
        args.into()
    });
    wrap_call(&element, "setAttribute", &set_hook)?;

    let get_hook = hook3(|result, this, name| {
        let (Some(stored), Some(el), Some(name)) = (result.as_string(), this.dyn_ref::<Element>(), name.as_string())
        else {
            return result;
        };
        let view = DomElement::new(el);
        with_rewriter(|rw| unrewrite_attr(rw, &view, &name, &stored)).map_or(result, |out| JsValue::from_str(&out))
    });
    wrap_result(&element, "getAttribute", &get_hook)?;

    for &(iface, props) in URL_PROPERTIES {
        let Ok(proto) = prototype_of(window, iface) else {
            continue;
        };
        for prop in props.iter().copied() {
            let getter = hook(move |value, this| {
                let (Some(stored), Some(el)) = (value.as_string(), this.dyn_ref::<Element>()) else {
                    return value;
                };
                let view = DomElement::new(el);
                with_rewriter(|rw| unrewrite_attr(rw, &view, prop, &stored)).map_or(value, |out| JsValue::from_str(&out))
            });
            let setter = element_hook(move |rw, sink, el, value| {
                rewrite_attr(rw, &DomElement::new(el), prop, value, sink).into_owned()
            });
            optional(prop, define_accessor(&proto, prop, Some(&getter), Some(&setter)));
        }
    }
    Ok(())
}

fn install_html_insertion(window: &Window) -> Result<(), InstallError> {
    let element = prototype_of(window, "Element")?;

    let inner = element_hook(|rw, sink, el, html| {
        let tag = el.tag_name();
        let ty = el.get_attribute("type");
        let base = el.base_uri().ok().flatten();
        rewrite_fragment(rw, &tag, ty.as_deref(), html, base.as_deref(), sink)
    });
    define_accessor(&element, "innerHTML", None, Some(&inner))?;

    let outer = element_hook(|rw, sink, el, html| {
        let base = el.base_uri().ok().flatten();
        rewrite_fragment(rw, "div", None, html, base.as_deref(), sink)
    });
    optional("outerHTML", define_accessor(&element, "outerHTML", None, Some(&outer)));
    optional("insertAdjacentHTML", wrap_method(&element, "insertAdjacentHTML", 1, &outer));

    if let Ok(iframe) = prototype_of(window, "HTMLIFrameElement") {
        let srcdoc = element_hook(|rw, sink, _el, html| tw_core::rewrite_html(rw, html, &HtmlOptions::default(), sink));
        optional("srcdoc", define_accessor(&iframe, "srcdoc", None, Some(&srcdoc)));
    }
    if let Ok(script) = prototype_of(window, "HTMLScriptElement") {
        let text = element_hook(|_rw, _sink, el, text| {
            wrap_script_text(text, el.get_attribute("type").as_deref()).into_owned()
        });
        optional("script.text", define_accessor(&script, "text", None, Some(&text)));
    }
    Ok(())
}

fn install_document_write(window: &Window) -> Result<(), InstallError> {
    let doc_proto = prototype_of(window, "Document")?;
    let native_write = lookup_function(&doc_proto, "write")?;

    let write_hook = hook(|args, _this| {
        let Ok(args) = args.dyn_into::<Array>() else {
            return JsValue::UNDEFINED;
        };
        let html: String = args.iter().filter_map(|a| a.as_string()).collect();
        match crate::document_write(&html) {
            Ok(Some(out)) => Array::of1(&JsValue::from_str(&out)).into(),
            // Incomplete markup stays buffered
            Ok(None) => Array::new().into(),
            Err(_) => args.into(),
        }
    });
    wrap_call(&doc_proto, "write", &write_hook)?;

    // The newline joins the buffer too, so writeln goes out through native write
    let writeln_hook = js_fn(Closure::<dyn Fn(JsValue) -> JsValue>::new(|args: JsValue| {
        let html: String = Array::from(&args).iter().filter_map(|a| a.as_string()).collect();
        match crate::document_writeln(&html) {
            Ok(Some(out)) => JsValue::from_str(&out),
            Ok(None) => JsValue::UNDEFINED,
            Err(_) => JsValue::from_str(&format!("{}\n", html)),
        }
    }));
    let writeln = factory(
        "write, hook",
        "return function() {
            var out = hook(Array.prototype.slice.call(arguments));
            if (out !== undefined) write.call(this, out);
        };",
        &[&native_write.clone().into(), &writeln_hook.into()],
    )?;
    assign(&doc_proto, "writeln", &writeln)?;

    let close_hook = hook(move |args, this| {
        if let Ok(Some(rest)) = crate::document_close() {
            if let Err(e) = native_write.call1(&this, &JsValue::from_str(&rest)) {
                log::debug!("buffered document.write lost: {:?}", e);
            }
        }
        args
    });
    wrap_call(&doc_proto, "close", &close_hook)
}

/// Style properties that may carry `url(...)`.
const STYLE_URL_PROPERTIES: &[&str] = &[
    "background",
    "backgroundImage",
    "cursor",
    "listStyle",
    "listStyleImage",
    "border",
    "borderImage",
    "borderImageSource",
    "maskImage",
];

fn css_hook() -> Function {
    hook(|value, _this| {
        let Some(css) = value.as_string() else {
            return value;
        };
        with_sink(|rw, sink| rewrite_style_text(rw, &css, None, sink).into_owned())
            .map_or(value, |out| JsValue::from_str(&out))
    })
}

fn install_style(window: &Window) -> Result<(), InstallError> {
    let decl = prototype_of(window, "CSSStyleDeclaration")?;
    let rewrite = css_hook();

    optional("cssText", define_accessor(&decl, "cssText", None, Some(&rewrite)));
    wrap_method(&decl, "setProperty", 1, &rewrite)?;
    for prop in STYLE_URL_PROPERTIES.iter().copied() {
        optional(prop, define_accessor(&decl, prop, None, Some(&rewrite)));
    }

    if let Ok(sheet) = prototype_of(window, "CSSStyleSheet") {
        optional("insertRule", wrap_method(&sheet, "insertRule", 0, &rewrite));
        optional("replaceSync", wrap_method(&sheet, "replaceSync", 0, &rewrite));
        optional("replace", wrap_method(&sheet, "replace", 0, &rewrite));
    }
    Ok(())
}

// =============================================================================
// Network
// =============================================================================

fn install_fetch(window: &Window) -> Result<(), InstallError> {
    let native_fetch = lookup_function(window, "fetch")?;
    let native_request = lookup_function(window, "Request").map(JsValue::from).unwrap_or(JsValue::UNDEFINED);

    let plan = hook(|input, _this| {
        let like = url_like(&input);
        if matches!(like, UrlLike::Opaque) {
            return JsValue::UNDEFINED;
        }
        with_rewriter(|rw| NetworkShim::new(rw).fetch(like))
            .ok()
            .and_then(|plan| crate::plan_to_js(&plan))
            .unwrap_or(JsValue::UNDEFINED)
    });
    let patched = factory(
        "orig, plan, Req",
        "return function(input, init) {
            var p = plan(input, this);
            if (p) {
                var isReq = Req && input instanceof Req;
                var opts = Object.assign({}, init || {});
                if (p.credentials) opts.credentials = p.credentials;
                var h = new Headers(opts.headers || (isReq ? input.headers : undefined));
                for (var k in p.headers) h.set(k, p.headers[k]);
                opts.headers = h;
                input = isReq ? new Req(p.url, input) : p.url;
                init = opts;
            }
            return orig.call(this, input, init);
        };",
        &[&native_fetch.into(), &plan.into(), &native_request],
    )?;
    assign(window, "fetch", &patched)?;

    optional("Request", wrap_constructor(window, "Request", 0, &network_hook(NetworkApi::Request)));
    if let Ok(response) = lookup_function(window, "Response") {
        optional(
            "Response.redirect",
            wrap_method(&response, "redirect", 0, &network_hook(NetworkApi::ResponseRedirect)),
        );
    }
    Ok(())
}

fn install_xhr(window: &Window) -> Result<(), InstallError> {
    let proto = prototype_of(window, "XMLHttpRequest")?;
    let open = lookup_function(&proto, "open")?;
    let set_header = lookup_function(&proto, "setRequestHeader")?;

    let patched = factory(
        "orig, rewrite, setHeader, name, value",
        "return function(method, url) {
            var a = Array.prototype.slice.call(arguments);
            if (a.length > 1) a[1] = rewrite(a[1], this);
            var r = orig.apply(this, a);
            try {
                this.withCredentials = true;
                setHeader.call(this, name, value);
            } catch (e) {}
            return r;
        };",
        &[
            &open.into(),
            &network_hook(NetworkApi::XhrOpen).into(),
            &set_header.into(),
            &JsValue::from_str(REQUESTED_WITH_HEADER),
            &JsValue::from_str(REQUESTED_WITH_VALUE),
        ],
    )?;
    assign(&proto, "open", &patched)
}

fn install_websocket(window: &Window) -> Result<(), InstallError> {
    wrap_constructor(window, "WebSocket", 0, &network_hook(NetworkApi::WebSocket))
}

fn install_event_source(window: &Window) -> Result<(), InstallError> {
    wrap_constructor(window, "EventSource", 0, &network_hook(NetworkApi::EventSource))
}

fn install_beacon(window: &Window) -> Result<(), InstallError> {
    let navigator = prototype_of(window, "Navigator")?;
    wrap_method(&navigator, "sendBeacon", 0, &network_hook(NetworkApi::SendBeacon))
}

fn install_window_open(window: &Window) -> Result<(), InstallError> {
    wrap_method(window, "open", 0, &network_hook(NetworkApi::WindowOpen))
}

/// Worker script hook: blob URLs get the bootstrap prepended, everything
/// else is rewritten like any other worker script.
fn worker_hook(api: NetworkApi) -> Function {
    let rewrite = network_hook(api);
    hook(move |value, this| match value.as_string() {
        Some(url) if url.starts_with("blob:") => bootstrap_blob(&url).unwrap_or_else(|e| {
            log::debug!("blob worker left unpatched: {:?}", e);
            value
        }),
        _ => rewrite.call2(&JsValue::NULL, &value, &this).unwrap_or(value),
    })
}

fn bootstrap_blob(url: &str) -> Result<JsValue, JsValue> {
    let xhr = web_sys::XmlHttpRequest::new()?;
    xhr.open_with_async("GET", url, false)?;
    xhr.send()?;
    let source = xhr.response_text()?.unwrap_or_default();
    let patched = with_rewriter(|rw| NetworkShim::new(rw).worker_bootstrap(&source))?;

    let global = js_sys::global();
    let blob_ctor: Function = Reflect::get(&global, &JsValue::from_str("Blob"))?.dyn_into()?;
    let opts = Object::new();
    Reflect::set(&opts, &JsValue::from_str("type"), &JsValue::from_str("application/javascript"))?;
    let parts = Array::of1(&JsValue::from_str(&patched));
    let blob = Reflect::construct(&blob_ctor, &Array::of2(&parts, &opts))?;

    let url_ctor = Reflect::get(&global, &JsValue::from_str("URL"))?;
    let create: Function = Reflect::get(&url_ctor, &JsValue::from_str("createObjectURL"))?.dyn_into()?;
    create.call1(&url_ctor, &blob)
}

fn install_workers(window: &Window) -> Result<(), InstallError> {
    wrap_constructor(window, "Worker", 0, &worker_hook(NetworkApi::Worker))?;
    optional(
        "SharedWorker",
        wrap_constructor(window, "SharedWorker", 0, &worker_hook(NetworkApi::SharedWorker)),
    );

    if let Ok(container) = prototype_of(window, "ServiceWorkerContainer") {
        let register = hook(|args, _this| {
            let Ok(args) = args.dyn_into::<Array>() else {
                return JsValue::UNDEFINED;
            };
            let Some(script) = url_like(&args.get(0)).as_str().map(str::to_string) else {
                return args.into();
            };
            let options = args.get(1);
            let scope = Reflect::get(&options, &JsValue::from_str("scope"))
                .ok()
                .and_then(|s| url_like(&s).as_str().map(str::to_string));
            let Ok(reg) = with_rewriter(|rw| NetworkShim::new(rw).service_worker_register(&script, scope.as_deref()))
            else {
                return args.into();
            };
            args.set(0, JsValue::from_str(&reg.script));
            if let Some(scope) = reg.scope {
                let copy = Object::assign(&Object::new(), options.unchecked_ref());
                let _ = Reflect::set(&copy, &JsValue::from_str("scope"), &JsValue::from_str(&scope));
                args.set(1, copy.into());
            }
            args.into()
        });
        optional("serviceWorker.register", wrap_call(&container, "register", &register));
    }

    if let Ok(worklet) = prototype_of(window, "Worklet") {
        optional(
            "Worklet.addModule",
            wrap_method(&worklet, "addModule", 0, &network_hook(NetworkApi::WorkletAddModule)),
        );
    }
    Ok(())
}

// =============================================================================
// Time and Randomness
// =============================================================================

fn install_date(window: &Window) -> Result<(), InstallError> {
    lookup_function(window, "Date")?;
    // Date.now reads made while the engine is borrowed get `undefined` back
    // and fall through to the native clock; ReplayClock::now relies on that.
    let stamp = js_fn(Closure::<dyn Fn(u32, f64) -> JsValue>::new(|argc: u32, wall: f64| {
        with_engine(|e| e.clock.construct(argc as usize, wall as i64))
            .ok()
            .flatten()
            .map_or(JsValue::UNDEFINED, |t| JsValue::from_f64(t as f64))
    }));
    factory(
        "win, stamp",
        "var O = win.Date, now = O.now;
        function D() {
            if (!new.target) return new D().toString();
            var a = Array.prototype.slice.call(arguments);
            var t = stamp(a.length, now.call(O));
            return Reflect.construct(O, t === undefined ? a : [t], new.target);
        }
        D.prototype = O.prototype;
        Object.setPrototypeOf(D, O);
        D.now = function() {
            var t = stamp(0, now.call(O));
            return t === undefined ? now.call(O) : t;
        };
        win.Date = D;",
        &[&window.clone().into(), &stamp.into()],
    )
    .map(|_| ())
}

fn install_random(window: &Window) -> Result<(), InstallError> {
    let math = Reflect::get(window, &JsValue::from_str("Math")).map_err(host_error)?;
    let native = lookup_function(&math, "random")?;
    let native_this = math.clone();
    let random = js_fn(Closure::<dyn Fn() -> f64>::new(move || {
        crate::replay_random().unwrap_or_else(|_| {
            native
                .call0(&native_this)
                .ok()
                .and_then(|v| v.as_f64())
                .unwrap_or_default()
        })
    }));
    assign(&math, "random", &random)
}

fn install_crypto(window: &Window) -> Result<(), InstallError> {
    let crypto = Reflect::get(window, &JsValue::from_str("crypto"))
        .ok()
        .filter(|c| c.is_object())
        .ok_or(InstallError::Unsupported("crypto"))?;
    let native = lookup_function(&crypto, "getRandomValues")?;
    let native_this = crypto.clone();

    let patched = js_fn(Closure::<dyn Fn(JsValue) -> Result<JsValue, JsValue>>::new(move |array: JsValue| {
        let field = |name: &str| Reflect::get(&array, &JsValue::from_str(name));
        let buffer = field("buffer")?;
        let offset = field("byteOffset")?.as_f64().unwrap_or_default() as u32;
        let len = field("byteLength")?.as_f64().unwrap_or_default() as u32;
        let mut bytes = vec![0u8; len as usize];
        if with_engine(|e| e.random.fill_bytes(&mut bytes)).is_err() {
            return native.call1(&native_this, &array);
        }
        Uint8Array::new_with_byte_offset_and_length(&buffer, offset, len).copy_from(&bytes);
        Ok(array)
    }));
    assign(&crypto, "getRandomValues", &patched)
}

// =============================================================================
// Cookies and Storage
// =============================================================================

fn install_cookie(window: &Window) -> Result<(), InstallError> {
    let doc_proto = prototype_of(window, "Document")?;
    let (_, native_set) = native_accessor(&doc_proto, "cookie")?;
    let native_set = native_set.ok_or(InstallError::Unsupported("document.cookie setter"))?;

    // The accessor factory hands the returned cookie to the native setter;
    // every other cookie of a multi-cookie write is set here.
    let set_hook = hook(move |value, this| {
        let Some(raw) = value.as_string() else {
            return value;
        };
        let Ok(cookies) = crate::set_cookie(&raw) else {
            return value;
        };
        let last = cookies.pop();
        for cookie in cookies.iter() {
            if let Err(e) = native_set.call1(&this, &cookie) {
                log::debug!("cookie not set: {:?}", e);
            }
        }
        if last.is_undefined() {
            JsValue::from_str("")
        } else {
            last
        }
    });
    define_accessor(&doc_proto, "cookie", None, Some(&set_hook))
}

fn install_storage(window: &Window) -> Result<(), InstallError> {
    let href = window.location().href().map_err(host_error)?;
    let url = with_rewriter(|rw| rw.extract_original(&href)).map_err(host_error)?;

    for (name, area) in [("localStorage", StorageArea::Local), ("sessionStorage", StorageArea::Session)] {
        let replay = storage::create(area, url.clone());
        define_property(window, name, &constant(&replay), None)?;
    }
    Ok(())
}

// =============================================================================
// Auto-fetch
// =============================================================================

const SCANNED_SELECTOR: &str = "img, source, video, audio, [data-src], [data-srcset]";

fn install_auto_fetch(window: &Window) -> Result<(), InstallError> {
    let doc = document(window)?;
    let owner = doc.clone();
    listen(
        doc.as_ref(),
        "DOMContentLoaded",
        js_fn(Closure::<dyn Fn()>::new(move || scan_document(&owner))),
    )
}

/// Eager pass over what the parser produced; later insertions reach the
/// coordinator through the interceptors.
fn scan_document(doc: &web_sys::Document) {
    let elements: Vec<Element> = doc
        .query_selector_all(SCANNED_SELECTOR)
        .map(|list| (0..list.length()).filter_map(|i| list.get(i)?.dyn_into().ok()).collect())
        .unwrap_or_default();
    let styles: Vec<String> = doc
        .query_selector_all("style")
        .map(|list| (0..list.length()).filter_map(|i| list.get(i)?.text_content()).collect())
        .unwrap_or_default();

    let result = with_engine(|engine| {
        let Some(coordinator) = engine.coordinator.as_mut() else {
            return;
        };
        for el in &elements {
            coordinator.scan_element(&engine.rw, &DomElement::new(el));
        }
        for css in &styles {
            coordinator.scan_css(css);
        }
        coordinator.flush();
    });
    if let Err(e) = result {
        log::debug!("auto-fetch scan skipped: {:?}", e);
    }
}

// =============================================================================
// postMessage
// =============================================================================

fn install_post_message(window: &Window) -> Result<(), InstallError> {
    let realm = realm::attach(window);

    let owner = window.clone();
    let state = Rc::clone(&realm);
    let outgoing = hook(move |args, this| {
        let sender = realm::take_sender(&this);
        let Ok(args) = args.dyn_into::<Array>() else {
            return JsValue::UNDEFINED;
        };
        // Transferables and other non-JSON payloads go out as-is
        let Ok(message) = serde_wasm_bindgen::from_value::<Value>(args.get(0)) else {
            return args.into();
        };
        let target_origin = args.get(1).as_string().unwrap_or_else(|| String::from("*"));
        let Ok(from) = with_rewriter(|rw| sender_origin(rw, &owner, sender.as_ref())) else {
            return args.into();
        };
        // An unresolvable target origin is left for the native call to reject
        let Some(envelope) = state.wrap_message(sender.as_ref(), message, &from, &target_origin) else {
            return args.into();
        };
        args.set(0, to_js(&envelope.to_json()));
        args.set(1, JsValue::from_str("*"));
        args.into()
    });
    wrap_call(window, "postMessage", &outgoing)?;

    let owner = window.clone();
    let filter = js_fn(Closure::<dyn Fn(JsValue) -> JsValue>::new(move |event: JsValue| {
        filter_message(&realm, &owner, event)
    }));
    factory(
        "win, filter",
        "var wrapped = new WeakMap();
        function wrap(fn) {
            if (!fn || (typeof fn !== 'function' && typeof fn.handleEvent !== 'function')) return fn;
            var w = wrapped.get(fn);
            if (!w) {
                w = function(ev) {
                    var out = filter(ev);
                    if (!out) return;
                    return typeof fn === 'function' ? fn.call(this, out) : fn.handleEvent(out);
                };
                wrapped.set(fn, w);
            }
            return w;
        }
        var add = win.addEventListener, remove = win.removeEventListener;
        win.addEventListener = function(type, fn, opts) {
            return add.call(this, type, type === 'message' ? wrap(fn) : fn, opts);
        };
        win.removeEventListener = function(type, fn, opts) {
            var w = type === 'message' && fn && wrapped.get(fn);
            return remove.call(this, type, w || fn, opts);
        };
        var d = Object.getOwnPropertyDescriptor(win, 'onmessage') ||
            Object.getOwnPropertyDescriptor(Object.getPrototypeOf(win), 'onmessage');
        if (d && d.set) {
            var current = null;
            Object.defineProperty(win, 'onmessage', {
                configurable: true,
                get: function() { return current; },
                set: function(fn) { current = fn; d.set.call(win, wrap(fn)); }
            });
        }",
        &[&window.clone().into(), &filter.into()],
    )
    .map(|_| ())
}

/// Original origin of the window sending a message: the marked sender when
/// another frame made the call, else `owner`.
fn sender_origin(rw: &Rewriter, owner: &Window, sender: Option<&Window>) -> String {
    let own = || synthetic(owner).get(rw, LocationProp::Origin);
    let Some(sender) = sender.filter(|s| !Object::is(s, owner)) else {
        return own();
    };
    Reflect::get(sender, &JsValue::from_str("WB_wombat_location"))
        .ok()
        .filter(|loc| loc.is_object())
        .and_then(|loc| Reflect::get(&loc, &JsValue::from_str("origin")).ok())
        .and_then(|origin| origin.as_string())
        .or_else(|| {
            let original = rw.extract_original(&sender.location().href().ok()?);
            tw_core::url::extract_origin(&original).map(str::to_string)
        })
        .unwrap_or_else(own)
}

/// Page-visible form of an incoming `message` event, or `null` to drop it.
fn filter_message(realm: &Rc<RealmState>, window: &Window, event: JsValue) -> JsValue {
    let (raw, raw_origin) = match event.dyn_ref::<web_sys::MessageEvent>() {
        Some(m) => (m.data(), m.origin()),
        None => return event,
    };
    let Ok(data) = serde_wasm_bindgen::from_value::<Value>(raw) else {
        return event;
    };
    let Ok(receiver) = with_rewriter(|rw| synthetic(window).get(rw, LocationProp::Origin)) else {
        return event;
    };
    let Some(incoming) = unwrap_incoming(&data, &raw_origin, &receiver) else {
        return JsValue::NULL;
    };

    if let Some(control) = ControlMessage::from_json(&incoming.data) {
        if let ControlMessage::AutoFetch { msg } = control {
            let forwarded = with_engine(|e| e.coordinator.as_ref().map_or(false, |c| c.forward_from_frame(&msg)));
            if !matches!(forwarded, Ok(true)) {
                log::debug!("aaworker message not forwarded");
            }
        }
        return JsValue::NULL;
    }
    if Envelope::from_json(&data).is_none() {
        return event;
    }

    let source = incoming
        .source_id
        .and_then(|id| realm.resolve_source(id))
        .or_else(|| Reflect::get(&event, &JsValue::from_str("source")).ok())
        .unwrap_or(JsValue::NULL);
    rebuild_message(window, &event, &incoming.data, &incoming.origin, &source).unwrap_or_else(|e| {
        log::debug!("message event not rebuilt: {:?}", e);
        event
    })
}

fn rebuild_message(
    window: &Window,
    event: &JsValue,
    data: &Value,
    origin: &str,
    source: &JsValue,
) -> Result<JsValue, JsValue> {
    let ctor: Function = Reflect::get(window, &JsValue::from_str("MessageEvent"))?.dyn_into()?;
    let init = Object::new();
    Reflect::set(&init, &JsValue::from_str("data"), &to_js(data))?;
    Reflect::set(&init, &JsValue::from_str("origin"), &JsValue::from_str(origin))?;
    Reflect::set(&init, &JsValue::from_str("ports"), &Reflect::get(event, &JsValue::from_str("ports"))?)?;
    let rebuilt = Reflect::construct(&ctor, &Array::of2(&JsValue::from_str("message"), &init))?;

    // The constructor rejects proxies as `source`
    let desc = Object::new();
    Reflect::set(&desc, &JsValue::from_str("value"), source)?;
    Reflect::define_property(rebuilt.unchecked_ref::<Object>(), &JsValue::from_str("source"), &desc)?;
    Ok(rebuilt)
}
