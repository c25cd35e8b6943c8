//! Document-side coordinator
//!
//! Collects preservation notices from the interceptors, batches them, and
//! posts one `values` message per flush. The binding schedules the flush on
//! the next microtask when [`Coordinator::take_flush_request`] says so.
//! Frames other than the replay top have no worker of their own and forward
//! through the archive UI channel instead.

use tw_core::css::{extract_css_urls, extract_media_blocks};
use tw_core::interceptors::{preserve_item, ElementView, Preserve, PreserveSink};
use tw_core::modifiers::preserve_kind;
use tw_core::srcset::split_srcset;
use tw_core::{ControlChannel, ControlMessage, Rewriter};

use crate::protocol::{SrcEntry, SrcsetEntry, Values, WorkerMessage};

/// Where flushed messages go.
pub trait WorkerPort {
    fn post(&self, msg: &WorkerMessage);

    fn terminate(&self) {}
}

/// Port for non-top frames: wraps messages in an `aaworker` control message.
#[derive(Debug)]
pub struct ForwardToTop<C: ControlChannel>(pub C);

impl<C: ControlChannel> WorkerPort for ForwardToTop<C> {
    fn post(&self, msg: &WorkerMessage) {
        self.0.send(ControlMessage::AutoFetch { msg: msg.to_json() });
    }
}

/// Attributes inspected when scanning an existing element.
const SCANNED_ATTRS: &[&str] = &["src", "srcset", "data-src", "data-srcset", "poster"];

pub struct Coordinator {
    port: Box<dyn WorkerPort>,
    pending: Values,
    /// Proxy mode: URLs are sent as-is in `fetch-all`.
    pending_raw: Vec<String>,
    proxy_mode: bool,
    flush_requested: bool,
    terminated: bool,
}

impl Coordinator {
    pub fn new(port: Box<dyn WorkerPort>, proxy_mode: bool) -> Self {
        Self {
            port,
            pending: Values::default(),
            pending_raw: Vec::new(),
            proxy_mode,
            flush_requested: false,
            terminated: false,
        }
    }

    fn is_pending(&self) -> bool {
        !self.pending.is_empty() || !self.pending_raw.is_empty()
    }

    /// Record one notice.
    pub fn push(&mut self, item: Preserve) {
        if self.terminated {
            return;
        }
        let was_pending = self.is_pending();
        if self.proxy_mode {
            self.push_raw(item);
        } else {
            match item {
                Preserve::Src { value, modifier } => self.pending.src.push(SrcEntry {
                    value,
                    modifier: modifier.as_str().to_string(),
                }),
                Preserve::Srcset {
                    value,
                    modifier,
                    tag_src,
                    doc_base,
                } => self.pending.srcset.push(SrcsetEntry {
                    value,
                    modifier: modifier.as_str().to_string(),
                    tag_src,
                    doc_base_uri: doc_base,
                }),
                Preserve::Media(css) => {
                    let blocks = extract_media_blocks(&css);
                    self.pending.media.extend(blocks.into_iter().map(str::to_string));
                }
            }
        }
        if !was_pending && self.is_pending() {
            self.flush_requested = true;
        }
    }

    fn push_raw(&mut self, item: Preserve) {
        match item {
            Preserve::Src { value, .. } => self.pending_raw.push(value),
            Preserve::Srcset { value, .. } => {
                self.pending_raw.extend(split_srcset(&value).into_iter().map(|c| c.url.to_string()));
            }
            Preserve::Media(css) => {
                for block in extract_media_blocks(&css) {
                    self.pending_raw.extend(extract_css_urls(block).into_iter().map(str::to_string));
                }
            }
        }
    }

    /// `true` once per batch: the caller should queue a microtask that calls
    /// [`Coordinator::flush`].
    pub fn take_flush_request(&mut self) -> bool {
        std::mem::take(&mut self.flush_requested)
    }

    /// Send everything collected since the last flush.
    pub fn flush(&mut self) {
        self.flush_requested = false;
        if !self.pending_raw.is_empty() {
            let values = std::mem::take(&mut self.pending_raw);
            self.port.post(&WorkerMessage::FetchAll { values });
        }
        if !self.pending.is_empty() {
            let values = std::mem::take(&mut self.pending);
            self.port.post(&WorkerMessage::Values(values));
        }
    }

    /// Eager extraction from an element already in the document.
    pub fn scan_element(&mut self, rw: &Rewriter, el: &dyn ElementView) {
        let tag = el.tag_name().to_ascii_lowercase();
        for attr in SCANNED_ATTRS {
            let Some(kind) = preserve_kind(&tag, attr) else {
                continue;
            };
            if let Some(value) = el.attr(attr).filter(|v| !v.is_empty()) {
                let item = preserve_item(rw, el, kind, attr, &value);
                self.push(item);
            }
        }
    }

    /// Eager extraction from a stylesheet's text.
    pub fn scan_css(&mut self, css: &str) {
        if !extract_media_blocks(css).is_empty() {
            self.push(Preserve::Media(css.to_string()));
        }
    }

    /// Top frame: a child frame forwarded a worker message (`aaworker`).
    pub fn forward_from_frame(&self, msg: &serde_json::Value) -> bool {
        match WorkerMessage::from_json(msg) {
            Some(msg) if !self.terminated => {
                self.port.post(&msg);
                true
            }
            _ => false,
        }
    }

    pub fn terminate(&mut self) {
        self.terminated = true;
        self.pending = Values::default();
        self.pending_raw.clear();
        self.port.terminate();
    }
}

impl PreserveSink for Coordinator {
    fn preserve(&mut self, item: Preserve) {
        self.push(item);
    }
}
