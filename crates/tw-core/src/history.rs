//! History shim and navigation notices
//!
//! `pushState`/`replaceState` resolve their URL against the synthetic
//! location, enforce same-origin against the original origin, hand the
//! rewritten URL to the native history and notify the archive UI. The same
//! notice is sent on `popstate`, title changes and page load.

use ::url::Url;

use crate::location::{LocationProp, NativeLocation, SyntheticLocation};
use crate::messaging::{ControlChannel, ControlMessage, Favicon};
use crate::rewriter::Rewriter;

/// Error type for history operations.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum HistoryError {
    #[error(
        "Failed to execute '{method}' on 'History': A history state object with URL '{url}' \
         cannot be created in a document with origin '{origin}'"
    )]
    CrossOrigin {
        method: &'static str,
        url: String,
        origin: String,
    },
}

/// The realm's real `History`.
pub trait NativeHistory {
    type State;

    fn push_state(&self, state: Self::State, title: &str, url: Option<&str>);
    fn replace_state(&self, state: Self::State, title: &str, url: Option<&str>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateMethod {
    Push,
    Replace,
}

impl StateMethod {
    fn name(self) -> &'static str {
        match self {
            Self::Push => "pushState",
            Self::Replace => "replaceState",
        }
    }
}

/// History overrides and navigation notices for one realm.
pub struct HistoryShim<'a> {
    rw: &'a Rewriter,
    channel: &'a dyn ControlChannel,
}

impl<'a> HistoryShim<'a> {
    pub fn new(rw: &'a Rewriter, channel: &'a dyn ControlChannel) -> Self {
        Self { rw, channel }
    }

    /// Resolve and validate a state URL. Returns the rewritten URL for the
    /// native call.
    pub fn rewrite_state_url<N: NativeLocation>(
        &self,
        location: &SyntheticLocation<N>,
        method: StateMethod,
        url: &str,
    ) -> Result<String, HistoryError> {
        let current = location.href(self.rw);
        let resolved = match Url::parse(&current).and_then(|base| base.join(url)) {
            Ok(resolved) => resolved,
            // Unparsable: let the native call produce its own error
            Err(_) => return Ok(self.rw.rewrite_url(url).into_owned()),
        };

        let origin = location.get(self.rw, LocationProp::Origin);
        if resolved.origin().ascii_serialization() != origin {
            log::warn!("{} rejected: {} is not same-origin with {}", method.name(), resolved, origin);
            return Err(HistoryError::CrossOrigin {
                method: method.name(),
                url: url.to_string(),
                origin,
            });
        }
        Ok(self.rw.rewrite_url(resolved.as_str()).into_owned())
    }

    fn change_state<N, H>(
        &self,
        method: StateMethod,
        location: &SyntheticLocation<N>,
        history: &H,
        state: H::State,
        title: &str,
        url: Option<&str>,
        doc_title: &str,
    ) -> Result<(), HistoryError>
    where
        N: NativeLocation,
        H: NativeHistory,
    {
        let rewritten = match url {
            Some(url) => Some(self.rewrite_state_url(location, method, url)?),
            None => None,
        };
        match method {
            StateMethod::Push => history.push_state(state, title, rewritten.as_deref()),
            StateMethod::Replace => history.replace_state(state, title, rewritten.as_deref()),
        }
        self.notify_replace_url(location, doc_title);
        Ok(())
    }

    /// `history.pushState(state, title, url)`.
    pub fn push_state<N: NativeLocation, H: NativeHistory>(
        &self,
        location: &SyntheticLocation<N>,
        history: &H,
        state: H::State,
        title: &str,
        url: Option<&str>,
        doc_title: &str,
    ) -> Result<(), HistoryError> {
        self.change_state(StateMethod::Push, location, history, state, title, url, doc_title)
    }

    /// `history.replaceState(state, title, url)`.
    pub fn replace_state<N: NativeLocation, H: NativeHistory>(
        &self,
        location: &SyntheticLocation<N>,
        history: &H,
        state: H::State,
        title: &str,
        url: Option<&str>,
        doc_title: &str,
    ) -> Result<(), HistoryError> {
        self.change_state(StateMethod::Replace, location, history, state, title, url, doc_title)
    }

    /// `popstate` listener body.
    pub fn on_popstate<N: NativeLocation>(&self, location: &SyntheticLocation<N>, doc_title: &str) {
        self.notify_replace_url(location, doc_title);
    }

    fn notify_replace_url<N: NativeLocation>(&self, location: &SyntheticLocation<N>, doc_title: &str) {
        let info = self.rw.info();
        self.channel.send(ControlMessage::ReplaceUrl {
            url: location.href(self.rw),
            ts: info.timestamp.clone(),
            request_ts: info.request_ts.clone(),
            is_live: info.is_live,
            title: doc_title.to_string(),
        });
    }

    /// `document.title = ...`.
    pub fn title_changed<N: NativeLocation>(&self, location: &SyntheticLocation<N>, title: &str) {
        let info = self.rw.info();
        self.channel.send(ControlMessage::Title {
            url: location.href(self.rw),
            ts: info.timestamp.clone(),
            request_ts: info.request_ts.clone(),
            is_live: info.is_live,
            title: title.to_string(),
        });
    }

    /// Page finished loading. `icons` are raw `(href, rel)` pairs from
    /// `<link rel~=icon>` elements.
    pub fn page_loaded<N: NativeLocation>(
        &self,
        location: &SyntheticLocation<N>,
        title: &str,
        icons: &[(String, String)],
        ready_state: &str,
    ) {
        let info = self.rw.info();
        let icons = icons
            .iter()
            .map(|(href, rel)| Favicon {
                href: self.rw.extract_original(href),
                rel: rel.clone(),
            })
            .collect();
        self.channel.send(ControlMessage::Load {
            url: location.href(self.rw),
            ts: info.timestamp.clone(),
            request_ts: info.request_ts.clone(),
            is_live: info.is_live,
            title: title.to_string(),
            icons,
            ready_state: ready_state.to_string(),
        });
    }
}

/// Icons worth reporting: `rel` contains the `icon` token.
pub fn is_icon_rel(rel: &str) -> bool {
    rel.split_ascii_whitespace().any(|t| t.eq_ignore_ascii_case("icon"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::location::tests::MockLocation;
    use crate::test_support::{rewriter, PREFIX};
    use std::cell::RefCell;

    impl NativeHistory for MockLocation {
        type State = ();

        fn push_state(&self, _state: (), _title: &str, url: Option<&str>) {
            if let Some(url) = url {
                *self.href.borrow_mut() = url.to_string();
            }
        }

        fn replace_state(&self, state: (), title: &str, url: Option<&str>) {
            self.push_state(state, title, url);
        }
    }

    fn location() -> SyntheticLocation<MockLocation> {
        SyntheticLocation::new(MockLocation::at(&format!("{PREFIX}mp_/https://tests.wombat.io/")))
    }

    #[test]
    fn test_push_state_round_trip() {
        let rw = rewriter();
        let channel: RefCell<Vec<ControlMessage>> = RefCell::new(Vec::new());
        let shim = HistoryShim::new(&rw, &channel);
        let loc = location();

        shim.push_state(&loc, loc.native(), (), "", Some("/it3"), "Title").expect("same origin");

        assert_eq!(loc.native().href(), format!("{PREFIX}mp_/https://tests.wombat.io/it3"));
        assert_eq!(loc.href(&rw), "https://tests.wombat.io/it3");
        let sent = channel.borrow();
        assert_eq!(sent.len(), 1);
        assert_eq!(
            sent[0],
            ControlMessage::ReplaceUrl {
                url: "https://tests.wombat.io/it3".into(),
                ts: "20180803160549".into(),
                request_ts: String::new(),
                is_live: false,
                title: "Title".into(),
            }
        );
    }

    #[test]
    fn test_cross_origin_rejected() {
        let rw = rewriter();
        let channel: RefCell<Vec<ControlMessage>> = RefCell::new(Vec::new());
        let shim = HistoryShim::new(&rw, &channel);
        let loc = location();

        let err = shim
            .replace_state(&loc, loc.native(), (), "", Some("https://evil.example/x"), "")
            .expect_err("cross origin");
        assert!(matches!(err, HistoryError::CrossOrigin { method: "replaceState", .. }));
        assert!(channel.borrow().is_empty());
        assert_eq!(loc.href(&rw), "https://tests.wombat.io/");
    }

    #[test]
    fn test_state_without_url_still_notifies() {
        let rw = rewriter();
        let channel: RefCell<Vec<ControlMessage>> = RefCell::new(Vec::new());
        let shim = HistoryShim::new(&rw, &channel);
        let loc = location();
        shim.replace_state(&loc, loc.native(), (), "", None, "").expect("no url");
        assert_eq!(channel.borrow().len(), 1);
        shim.on_popstate(&loc, "");
        assert_eq!(channel.borrow().len(), 2);
    }

    #[test]
    fn test_title_and_load_messages() {
        let rw = rewriter();
        let channel: RefCell<Vec<ControlMessage>> = RefCell::new(Vec::new());
        let shim = HistoryShim::new(&rw, &channel);
        let loc = location();

        shim.title_changed(&loc, "New");
        let icons = vec![(format!("{PREFIX}im_/https://tests.wombat.io/favicon.ico"), "icon".to_string())];
        shim.page_loaded(&loc, "New", &icons, "complete");

        let sent = channel.borrow();
        assert!(matches!(&sent[0], ControlMessage::Title { title, .. } if title == "New"));
        match &sent[1] {
            ControlMessage::Load { icons, ready_state, .. } => {
                assert_eq!(icons[0].href, "https://tests.wombat.io/favicon.ico");
                assert_eq!(ready_state, "complete");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_icon_rel() {
        assert!(is_icon_rel("shortcut icon"));
        assert!(is_icon_rel("ICON"));
        assert!(!is_icon_rel("apple-touch-icon-precomposed"));
    }
}
