//! WebAssembly bindings for Timewarp
//!
//! The hosting page calls [`init`] with its `wb_info` object before any page
//! script runs, then [`install_overrides`] to patch the realm. The exported
//! rewrite functions are also usable on their own (server-side tooling,
//! tests).

mod autofetch;
mod channel;
mod dom;
mod installers;
mod location;
mod logger;
mod realm;
mod storage;

use std::cell::RefCell;

use serde::Serialize;
use tw_autofetch::Coordinator;
use tw_core::clock::wall_clock_millis;
use tw_core::interceptors::{rewrite_fragment, rewrite_style_text, wrap_script_text, PreserveSink};
use tw_core::network::NetworkShim;
use tw_core::{
    rewrite_cookie, unrewrite_attr as core_unrewrite_attr, ArchiveInfo, ConfigError, HtmlOptions, Modifier,
    ReplayClock, RequestPlan, Rewriter, SeededRandom, UrlLike, WriteBuffer,
};
use wasm_bindgen::prelude::*;

pub use autofetch::start_autofetch_worker;
pub use location::ReplayLocation;
pub use storage::ReplayStorageJs;

use channel::TopChannel;
use dom::DomElement;

// =============================================================================
// Engine State
// =============================================================================

pub(crate) struct Engine {
    pub(crate) rw: Rewriter,
    pub(crate) clock: ReplayClock,
    pub(crate) random: SeededRandom,
    pub(crate) channel: TopChannel,
    pub(crate) coordinator: Option<Coordinator>,
}

impl Engine {
    fn new(info: ArchiveInfo) -> Result<Self, ConfigError> {
        let rw = Rewriter::new(info.clone())?;
        let capture = info.capture_millis().unwrap_or_else(|e| {
            log::warn!("{}; clock starts at wall time", e);
            wall_clock_millis()
        });
        let window = web_sys::window();
        let channel = TopChannel::for_window(window.as_ref(), info.is_framed);
        let coordinator = autofetch::coordinator_for(&info, window.as_ref());
        Ok(Self {
            rw,
            clock: ReplayClock::start(capture),
            random: SeededRandom::from_capture_millis(capture),
            channel,
            coordinator,
        })
    }
}

thread_local! {
    static ENGINE: RefCell<Option<Engine>> = const { RefCell::new(None) };
    static WRITE_BUFFER: RefCell<WriteBuffer> = RefCell::new(WriteBuffer::new());
}

/// Run `f` against the engine. Fails when not initialized, or when called
/// re-entrantly from inside another engine call.
pub(crate) fn with_engine<R>(f: impl FnOnce(&mut Engine) -> R) -> Result<R, JsValue> {
    ENGINE.with(|cell| {
        let mut slot = cell
            .try_borrow_mut()
            .map_err(|_| JsValue::from_str("Engine is busy"))?;
        slot.as_mut()
            .map(f)
            .ok_or_else(|| JsValue::from_str("Not initialized. Call init() first."))
    })
}

pub(crate) fn with_rewriter<R>(f: impl FnOnce(&Rewriter) -> R) -> Result<R, JsValue> {
    with_engine(|engine| f(&engine.rw))
}

/// Run `f` with the preservation sink, then schedule a coordinator flush on
/// the next microtask if it received anything.
pub(crate) fn with_sink<R>(f: impl FnOnce(&Rewriter, &mut dyn PreserveSink) -> R) -> Result<R, JsValue> {
    let (result, flush) = with_engine(|engine| {
        let mut discard = ();
        let result = match engine.coordinator.as_mut() {
            Some(coordinator) => f(&engine.rw, coordinator),
            None => f(&engine.rw, &mut discard),
        };
        let flush = engine.coordinator.as_mut().map_or(false, Coordinator::take_flush_request);
        (result, flush)
    })?;
    if flush {
        wasm_bindgen_futures::spawn_local(async {
            let _ = with_engine(|engine| {
                if let Some(coordinator) = engine.coordinator.as_mut() {
                    coordinator.flush();
                }
            });
        });
    }
    Ok(result)
}

fn parse_modifier(modifier: Option<String>) -> Option<Modifier> {
    modifier.and_then(|m| Modifier::try_from(m.as_str()).ok())
}

pub(crate) fn to_js<T: Serialize>(value: &T) -> JsValue {
    value
        .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
        .unwrap_or(JsValue::NULL)
}

// =============================================================================
// Lifecycle
// =============================================================================

#[wasm_bindgen]
pub fn init(wb_info: JsValue) -> Result<(), JsValue> {
    if is_initialized() {
        return Err(JsValue::from_str("Already initialized. Reload the page to reinitialize."));
    }
    let info: ArchiveInfo = serde_wasm_bindgen::from_value(wb_info)
        .map_err(|e| JsValue::from_str(&format!("Invalid wb_info: {}", e)))?;
    logger::init(info.debug);

    let engine = Engine::new(info).map_err(|e| JsValue::from_str(&format!("Failed to initialize: {}", e)))?;
    log::info!("replaying {} at {}", engine.rw.info().url, engine.rw.info().timestamp);
    ENGINE.with(|cell| *cell.borrow_mut() = Some(engine));
    Ok(())
}

#[wasm_bindgen]
pub fn is_initialized() -> bool {
    ENGINE.with(|cell| cell.try_borrow().map_or(true, |slot| slot.is_some()))
}

/// Re-derive paths after this window navigated to another capture.
#[wasm_bindgen]
pub fn init_paths(wb_info: JsValue) -> Result<(), JsValue> {
    let info: ArchiveInfo = serde_wasm_bindgen::from_value(wb_info)
        .map_err(|e| JsValue::from_str(&format!("Invalid wb_info: {}", e)))?;
    with_engine(|engine| engine.rw.init_paths(info))?
        .map_err(|e| JsValue::from_str(&format!("Failed to update paths: {}", e)))
}

/// Patch the current realm. Returns the applied override bits.
#[wasm_bindgen]
pub fn install_overrides() -> Result<u32, JsValue> {
    installers::install().map(|applied| applied.bits())
}

// =============================================================================
// Rewriting
// =============================================================================

#[wasm_bindgen]
pub fn rewrite_url(url: &str, modifier: Option<String>) -> Result<String, JsValue> {
    let modifier = parse_modifier(modifier);
    with_rewriter(|rw| match modifier {
        Some(m) => rw.rewrite_with(url, m).into_owned(),
        None => rw.rewrite_url(url).into_owned(),
    })
}

#[wasm_bindgen]
pub fn extract_original(url: &str) -> Result<String, JsValue> {
    with_rewriter(|rw| rw.extract_original(url))
}

#[wasm_bindgen]
pub fn rewrite_ws_url(url: &str) -> Result<String, JsValue> {
    with_rewriter(|rw| rw.rewrite_ws_url(url))
}

#[wasm_bindgen]
pub fn rewrite_srcset(value: &str, modifier: Option<String>, base: Option<String>) -> Result<String, JsValue> {
    let modifier = parse_modifier(modifier).unwrap_or(Modifier::Image);
    with_rewriter(|rw| tw_core::rewrite_srcset(rw, value, modifier, base.as_deref()))
}

#[wasm_bindgen]
pub fn rewrite_css(css: &str, base: Option<String>) -> Result<String, JsValue> {
    with_sink(|rw, sink| rewrite_style_text(rw, css, base.as_deref(), sink).into_owned())
}

/// `innerHTML`-style insertion into an element with tag `context_tag`.
#[wasm_bindgen]
pub fn rewrite_html(html: &str, context_tag: Option<String>, base: Option<String>) -> Result<String, JsValue> {
    let tag = context_tag.unwrap_or_else(|| String::from("div"));
    with_sink(|rw, sink| rewrite_fragment(rw, &tag, None, html, base.as_deref(), sink))
}

/// `document.write`. Returns `undefined` while incomplete markup is being
/// buffered.
#[wasm_bindgen]
pub fn document_write(html: &str) -> Result<Option<String>, JsValue> {
    WRITE_BUFFER.with(|buffer| {
        with_sink(|rw, sink| buffer.borrow_mut().write(rw, html, &HtmlOptions::default(), sink))
    })
}

/// `document.writeln`: the chunk and its newline go through the same buffer.
#[wasm_bindgen]
pub fn document_writeln(html: &str) -> Result<Option<String>, JsValue> {
    document_write(&format!("{}\n", html))
}

/// `document.close`: flush whatever was buffered.
#[wasm_bindgen]
pub fn document_close() -> Result<Option<String>, JsValue> {
    WRITE_BUFFER.with(|buffer| with_sink(|rw, sink| buffer.borrow_mut().close(rw, &HtmlOptions::default(), sink)))
}

#[wasm_bindgen]
pub fn rewrite_attr(element: &web_sys::Element, attr: &str, value: &str) -> Result<String, JsValue> {
    let view = DomElement::new(element);
    with_sink(|rw, sink| tw_core::rewrite_attr(rw, &view, attr, value, sink).into_owned())
}

#[wasm_bindgen]
pub fn unrewrite_attr(element: &web_sys::Element, attr: &str, stored: &str) -> Result<String, JsValue> {
    let view = DomElement::new(element);
    with_rewriter(|rw| core_unrewrite_attr(rw, &view, attr, stored))
}

#[wasm_bindgen]
pub fn wrap_script(text: &str, script_type: Option<String>) -> String {
    wrap_script_text(text, script_type.as_deref()).into_owned()
}

/// Rewrite the URL argument of a network API (`fetch`, `xhr`, `websocket`,
/// `worker`, ...).
#[wasm_bindgen]
pub fn rewrite_for(api: &str, url: &str) -> Result<String, JsValue> {
    let api = installers::network_api(api).ok_or_else(|| JsValue::from_str(&format!("Unknown API: {}", api)))?;
    with_rewriter(|rw| NetworkShim::new(rw).rewrite_str(api, url))
}

/// Source for a blob-URL worker with the in-worker bootstrap prepended.
#[wasm_bindgen]
pub fn worker_bootstrap(source: &str) -> Result<String, JsValue> {
    with_rewriter(|rw| NetworkShim::new(rw).worker_bootstrap(source))
}

/// `document.cookie = value`. Returns the cookies to assign natively.
#[wasm_bindgen]
pub fn set_cookie(value: &str) -> Result<js_sys::Array, JsValue> {
    with_engine(|engine| {
        let write = rewrite_cookie(&engine.rw, &engine.clock, value);
        for notice in write.notices {
            tw_core::ControlChannel::send(&engine.channel, notice);
        }
        write.cookies.iter().map(|c| JsValue::from_str(c)).collect()
    })
}

/// `Date.now()` on the replay timeline.
#[wasm_bindgen]
pub fn replay_now() -> Result<f64, JsValue> {
    with_engine(|engine| engine.clock.now() as f64)
}

#[wasm_bindgen]
pub fn replay_random() -> Result<f64, JsValue> {
    with_engine(|engine| engine.random.next_f64())
}

/// Rewrite a `fetch` input and report the forced request options.
#[wasm_bindgen]
pub fn fetch_plan(url: &str) -> Result<JsValue, JsValue> {
    let plan = with_rewriter(|rw| NetworkShim::new(rw).fetch(UrlLike::from(url)))?;
    Ok(plan_to_js(&plan).unwrap_or_else(|| JsValue::from_str(url)))
}

/// `{url, credentials, headers}`, or `None` when the input had no usable URL.
pub(crate) fn plan_to_js(plan: &RequestPlan) -> Option<JsValue> {
    let url = plan.url.as_str()?;
    let result = js_sys::Object::new();
    let _ = js_sys::Reflect::set(&result, &"url".into(), &JsValue::from_str(url));
    if let Some(credentials) = plan.credentials {
        let _ = js_sys::Reflect::set(&result, &"credentials".into(), &JsValue::from_str(credentials.as_str()));
    }
    let headers = js_sys::Object::new();
    for (name, value) in &plan.headers {
        let _ = js_sys::Reflect::set(&headers, &JsValue::from_str(name), &JsValue::from_str(value));
    }
    let _ = js_sys::Reflect::set(&result, &"headers".into(), &headers);
    Some(result.into())
}
