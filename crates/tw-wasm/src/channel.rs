//! Control channel to the archive UI frame

use tw_core::{ControlChannel, ControlMessage};
use wasm_bindgen::JsValue;
use web_sys::Window;

/// Posts control messages to `window.top`. Inert when the replay is not
/// framed.
pub(crate) struct TopChannel {
    top: Option<Window>,
}

impl TopChannel {
    pub(crate) fn for_window(window: Option<&Window>, framed: bool) -> Self {
        let top = match window {
            Some(w) if framed => w.top().ok().flatten().filter(|top| {
                let (top, own): (&JsValue, &JsValue) = (top.as_ref(), w.as_ref());
                top != own
            }),
            _ => None,
        };
        Self { top }
    }

    pub(crate) fn post(&self, message: &JsValue) {
        if let Some(top) = &self.top {
            if let Err(e) = top.post_message(message, "*") {
                log::debug!("control message not delivered: {:?}", e);
            }
        }
    }
}

impl ControlChannel for TopChannel {
    fn send(&self, msg: ControlMessage) {
        self.post(&crate::to_js(&msg.to_json()));
    }
}
