//! Auto-fetch plumbing: worker entry point and document-side ports

use std::rc::Rc;
use std::time::Duration;

use futures::future::{FutureExt, LocalBoxFuture};
use tw_autofetch::{
    AutoFetchConfig, AutoFetchWorker, Coordinator, FetchError, Fetcher, ForwardToTop, Timer, WorkerInit, WorkerMessage,
    WorkerPort,
};
use tw_core::{ArchiveInfo, ControlChannel, ControlMessage};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use wasm_bindgen_futures::JsFuture;

use crate::to_js;

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(js_name = setTimeout)]
    fn set_timeout(closure: &Closure<dyn FnMut()>, millis: u32) -> i32;
}

// =============================================================================
// Worker Side
// =============================================================================

struct JsFetcher {
    scope: web_sys::WorkerGlobalScope,
}

impl Fetcher for JsFetcher {
    fn fetch(&self, url: String) -> LocalBoxFuture<'static, Result<(), FetchError>> {
        let promise = self.scope.fetch_with_str(&url);
        async move {
            let resp = JsFuture::from(promise)
                .await
                .map_err(|e| FetchError::Network(format!("{:?}", e)))?;
            let resp: web_sys::Response = resp
                .dyn_into()
                .map_err(|_| FetchError::Network(String::from("not a Response")))?;
            if resp.ok() {
                Ok(())
            } else {
                Err(FetchError::Status(resp.status()))
            }
        }
        .boxed_local()
    }
}

struct JsTimer;

impl Timer for JsTimer {
    fn sleep(&self, duration: Duration) -> LocalBoxFuture<'static, ()> {
        let ms = duration.as_millis().min(u32::MAX as u128) as u32;
        async move {
            let (tx, rx) = futures::channel::oneshot::channel::<()>();
            let closure = Closure::once(move || {
                let _ = tx.send(());
            });
            set_timeout(&closure, ms);
            let _ = rx.await;
        }
        .boxed_local()
    }
}

/// Entry point of the auto-fetch worker script. `init` is the decoded
/// `?init=` query of the worker URL.
#[wasm_bindgen]
pub fn start_autofetch_worker(init: JsValue) -> Result<(), JsValue> {
    let init: WorkerInit =
        serde_wasm_bindgen::from_value(init).map_err(|e| JsValue::from_str(&format!("Invalid worker init: {}", e)))?;
    let scope: web_sys::DedicatedWorkerGlobalScope = js_sys::global()
        .dyn_into()
        .map_err(|_| JsValue::from_str("start_autofetch_worker must run in a dedicated worker"))?;
    crate::logger::init(false);

    let fetcher = JsFetcher {
        scope: scope.clone().unchecked_into(),
    };
    let worker = Rc::new(AutoFetchWorker::new(&init, AutoFetchConfig::default(), fetcher, JsTimer));
    log::debug!("auto-fetch worker ready for {}", init.prefix);

    let onmessage = Closure::<dyn FnMut(web_sys::MessageEvent)>::new(move |event: web_sys::MessageEvent| {
        let data: serde_json::Value = match serde_wasm_bindgen::from_value(event.data()) {
            Ok(data) => data,
            Err(e) => {
                log::debug!("auto-fetch ignoring message: {}", e);
                return;
            }
        };
        let Some(msg) = WorkerMessage::from_json(&data) else {
            return;
        };
        let worker = Rc::clone(&worker);
        wasm_bindgen_futures::spawn_local(async move {
            let (image, media) = worker.handle(msg).await;
            log::debug!("auto-fetch drained image {:?} media {:?}", image.batches, media.batches);
        });
    });
    scope.set_onmessage(Some(onmessage.as_ref().unchecked_ref()));
    onmessage.forget();
    Ok(())
}

// =============================================================================
// Document Side
// =============================================================================

/// Dedicated worker owned by the replay top.
struct JsWorkerPort {
    worker: web_sys::Worker,
}

impl WorkerPort for JsWorkerPort {
    fn post(&self, msg: &WorkerMessage) {
        if let Err(e) = self.worker.post_message(&to_js(&msg.to_json())) {
            log::debug!("auto-fetch post failed: {:?}", e);
        }
    }

    fn terminate(&self) {
        self.worker.terminate();
    }
}

/// Posts `aaworker` messages to the replay top window.
struct ReplayTopChannel {
    top: web_sys::Window,
}

impl ControlChannel for ReplayTopChannel {
    fn send(&self, msg: ControlMessage) {
        let origin = self.top.location().origin().unwrap_or_else(|_| String::from("*"));
        if let Err(e) = self.top.post_message(&to_js(&msg.to_json()), &origin) {
            log::debug!("aaworker forward failed: {:?}", e);
        }
    }
}

/// `{worker_url}?init={json}`.
fn worker_url(info: &ArchiveInfo) -> Option<String> {
    if info.auto_fetch_worker_url.is_empty() {
        return None;
    }
    let timestamp = if info.is_live_replay() { "" } else { info.url_timestamp() };
    let prefix = format!("{}{}", info.prefix, timestamp);
    let init = WorkerInit {
        prefix,
        modifier: info.default_modifier().as_str().to_string(),
    };
    let json = serde_json::to_string(&init).ok()?;
    let encoded = String::from(js_sys::encode_uri_component(&json));
    let sep = if info.auto_fetch_worker_url.contains('?') { '&' } else { '?' };
    Some(format!("{}{}init={}", info.auto_fetch_worker_url, sep, encoded))
}

/// Coordinator for this realm, or `None` when auto-fetch is off. The replay
/// top owns the worker; nested frames forward to it.
pub(crate) fn coordinator_for(info: &ArchiveInfo, window: Option<&web_sys::Window>) -> Option<Coordinator> {
    if !info.enable_auto_fetch {
        return None;
    }
    let window = window?;
    let realm = crate::realm::attach(window);
    let current = realm.current_id();
    let top = realm.registry().borrow().replay_top(current);
    let proxy_mode = info.is_proxy();

    if top != current {
        let top = realm.window(top)?;
        log::debug!("auto-fetch forwarding to replay top");
        return Some(Coordinator::new(Box::new(ForwardToTop(ReplayTopChannel { top })), proxy_mode));
    }

    let url = worker_url(info)?;
    match web_sys::Worker::new(&url) {
        Ok(worker) => Some(Coordinator::new(Box::new(JsWorkerPort { worker }), proxy_mode)),
        Err(e) => {
            log::warn!("auto-fetch worker not started: {:?}", e);
            None
        }
    }
}
