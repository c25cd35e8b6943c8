//! Cross-frame messages
//!
//! Two kinds of traffic leave a replayed realm: control messages for the
//! archive UI (discriminated by `wb_type`) and page-level `postMessage`
//! calls, which travel inside an envelope recording the sender's original
//! origin and an integer source id.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A `<link rel~=icon>` entry in the `load` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Favicon {
    pub href: String,
    pub rel: String,
}

/// Messages sent to (and received from) the archive UI frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "wb_type")]
pub enum ControlMessage {
    #[serde(rename = "load")]
    Load {
        url: String,
        ts: String,
        request_ts: String,
        is_live: bool,
        title: String,
        icons: Vec<Favicon>,
        #[serde(rename = "readyState")]
        ready_state: String,
    },
    #[serde(rename = "replace-url")]
    ReplaceUrl {
        url: String,
        ts: String,
        request_ts: String,
        is_live: bool,
        title: String,
    },
    #[serde(rename = "title")]
    Title {
        url: String,
        ts: String,
        request_ts: String,
        is_live: bool,
        title: String,
    },
    #[serde(rename = "cookie")]
    Cookie { domain: String, cookie: String },
    #[serde(rename = "hashchange")]
    HashChange { hash: String },
    #[serde(rename = "outer_hashchange")]
    OuterHashChange { hash: String },
    /// Opaque auto-fetch payload forwarded to the top frame.
    #[serde(rename = "aaworker")]
    AutoFetch { msg: Value },
}

impl ControlMessage {
    /// Wire form.
    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Parse an incoming message. Anything without a known `wb_type` is not
    /// a control message.
    pub fn from_json(value: &Value) -> Option<Self> {
        value.get("wb_type")?;
        Self::deserialize(value).ok()
    }
}

/// Outbound path to the archive UI frame.
pub trait ControlChannel {
    fn send(&self, msg: ControlMessage);
}

/// Used where there is no archive UI (not framed).
impl ControlChannel for () {
    fn send(&self, _msg: ControlMessage) {}
}

/// Collects messages for a later drain.
impl ControlChannel for std::cell::RefCell<Vec<ControlMessage>> {
    fn send(&self, msg: ControlMessage) {
        self.borrow_mut().push(msg);
    }
}

impl<C: ControlChannel + ?Sized> ControlChannel for &C {
    fn send(&self, msg: ControlMessage) {
        (**self).send(msg);
    }
}

// =============================================================================
// postMessage Envelope
// =============================================================================

/// `postMessage` payload as it travels between replayed realms.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Original origin of the sender.
    pub from: String,
    /// Origin the sender addressed (serialized), or `*`.
    pub to_origin: String,
    /// Sender's id in the issuing realm registry.
    pub src_id: Option<u32>,
    pub message: Value,
    /// Sent by the replay top window.
    pub from_top: bool,
}

/// An incoming message after envelope removal.
#[derive(Debug, Clone, PartialEq)]
pub struct Incoming {
    pub data: Value,
    /// Origin reported to page listeners.
    pub origin: String,
    pub source_id: Option<u32>,
    pub from_top: bool,
}

/// Serialized origin a `targetOrigin` argument names: `*` as is, `/` for the
/// sender's own origin, otherwise the origin of the parsed URL. `None` when
/// the argument is not a URL.
pub fn resolve_target_origin(target_origin: &str, from: &str) -> Option<String> {
    match target_origin {
        "*" => Some(String::from("*")),
        "/" => Some(from.to_string()),
        other => {
            let origin = url::Url::parse(other).ok()?.origin();
            origin.is_tuple().then(|| origin.ascii_serialization())
        }
    }
}

impl Envelope {
    /// `None` when `target_origin` cannot be resolved; the platform rejects
    /// such calls too.
    pub fn wrap(message: Value, from: &str, target_origin: &str, src_id: Option<u32>, from_top: bool) -> Option<Self> {
        Some(Self {
            from: from.to_string(),
            to_origin: resolve_target_origin(target_origin, from)?,
            src_id,
            message,
            from_top,
        })
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }

    /// Recognize an envelope; anything else came from outside the replay.
    pub fn from_json(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        if !(obj.contains_key("from") && obj.contains_key("to_origin") && obj.contains_key("message")) {
            return None;
        }
        Self::deserialize(value).ok()
    }

    /// Should a realm whose original origin is `receiver_origin` see this?
    pub fn accepts(&self, receiver_origin: &str) -> bool {
        if self.to_origin == "*" {
            return true;
        }
        match url::Url::parse(receiver_origin) {
            Ok(receiver) => self.to_origin == receiver.origin().ascii_serialization(),
            Err(_) => self.to_origin.eq_ignore_ascii_case(receiver_origin),
        }
    }
}

/// Unwrap a raw `message` event payload.
///
/// Envelopes addressed elsewhere yield `None`. Plain payloads (from the
/// archive UI or a non-replayed frame) pass through with `raw_origin`.
pub fn unwrap_incoming(data: &Value, raw_origin: &str, receiver_origin: &str) -> Option<Incoming> {
    match Envelope::from_json(data) {
        Some(env) => {
            if !env.accepts(receiver_origin) {
                log::debug!("dropping message for {} at {}", env.to_origin, receiver_origin);
                return None;
            }
            Some(Incoming {
                data: env.message,
                origin: env.from,
                source_id: env.src_id,
                from_top: env.from_top,
            })
        }
        None => Some(Incoming {
            data: data.clone(),
            origin: raw_origin.to_string(),
            source_id: None,
            from_top: false,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_control_message_wire_form() {
        let msg = ControlMessage::ReplaceUrl {
            url: "https://tests.wombat.io/it3".into(),
            ts: "20180803160549".into(),
            request_ts: String::new(),
            is_live: false,
            title: "t".into(),
        };
        let wire = msg.to_json();
        assert_eq!(wire["wb_type"], "replace-url");
        assert_eq!(wire["url"], "https://tests.wombat.io/it3");
        assert_eq!(ControlMessage::from_json(&wire), Some(msg));
    }

    #[test]
    fn test_load_uses_ready_state_key() {
        let msg = ControlMessage::Load {
            url: "u".into(),
            ts: "t".into(),
            request_ts: String::new(),
            is_live: true,
            title: String::new(),
            icons: vec![Favicon { href: "https://a/f.ico".into(), rel: "icon".into() }],
            ready_state: "complete".into(),
        };
        let wire = msg.to_json();
        assert_eq!(wire["readyState"], "complete");
        assert_eq!(wire["icons"][0]["rel"], "icon");
    }

    #[test]
    fn test_unknown_control_message() {
        assert_eq!(ControlMessage::from_json(&json!({"wb_type": "nope"})), None);
        assert_eq!(ControlMessage::from_json(&json!({"hash": "#a"})), None);
        assert_eq!(
            ControlMessage::from_json(&json!({"wb_type": "outer_hashchange", "hash": "#a"})),
            Some(ControlMessage::OuterHashChange { hash: "#a".into() })
        );
    }

    #[test]
    fn test_envelope_round_trip() {
        let env = Envelope::wrap(json!({"k": 1}), "https://tests.wombat.io", "*", Some(3), false).expect("wrapped");
        let incoming = unwrap_incoming(&env.to_json(), "http://localhost:8080", "https://other.example").expect("delivered");
        assert_eq!(incoming.data, json!({"k": 1}));
        assert_eq!(incoming.origin, "https://tests.wombat.io");
        assert_eq!(incoming.source_id, Some(3));
    }

    #[test]
    fn test_envelope_target_origin_filter() {
        let env = Envelope::wrap(json!("hi"), "https://a.example", "https://b.example", None, true).expect("wrapped");
        assert!(unwrap_incoming(&env.to_json(), "x", "https://c.example").is_none());
        assert!(unwrap_incoming(&env.to_json(), "x", "https://B.example").is_some());
    }

    #[test]
    fn test_target_origin_url_form_matches_origin() {
        let env = Envelope::wrap(
            json!("hi"),
            "https://other.example",
            "https://tests.wombat.io/page.html?x=1",
            None,
            false,
        )
        .expect("wrapped");
        assert_eq!(env.to_origin, "https://tests.wombat.io");
        assert!(env.accepts("https://tests.wombat.io"));
        assert!(!env.accepts("https://tests.wombat.io:8443"));
        // Default ports are dropped on both sides
        let env = Envelope::wrap(json!(1), "o", "https://tests.wombat.io:443/", None, false).expect("wrapped");
        assert!(env.accepts("https://tests.wombat.io"));
    }

    #[test]
    fn test_target_origin_slash_means_sender() {
        let env = Envelope::wrap(json!(1), "https://tests.wombat.io", "/", Some(1), false).expect("wrapped");
        assert_eq!(env.to_origin, "https://tests.wombat.io");
        assert!(env.accepts("https://tests.wombat.io"));
        assert!(!env.accepts("https://other.example"));
    }

    #[test]
    fn test_target_origin_unparseable_is_rejected() {
        assert!(Envelope::wrap(json!(1), "https://tests.wombat.io", "not a url", None, false).is_none());
        assert!(Envelope::wrap(json!(1), "https://tests.wombat.io", "", None, false).is_none());
        assert_eq!(resolve_target_origin("*", "https://a.example").as_deref(), Some("*"));
    }

    #[test]
    fn test_plain_message_passes_through() {
        let incoming = unwrap_incoming(&json!("raw"), "http://localhost:8080", "https://a.example").expect("delivered");
        assert_eq!(incoming.origin, "http://localhost:8080");
        assert_eq!(incoming.source_id, None);
    }
}
