//! Synthetic `Location`
//!
//! Page code sees the original URL through every location property while the
//! real location of the realm holds the archive URL. Reads are memoized on the
//! raw native href; writes resolve against the original URL, are rewritten and
//! then applied to the native location.

use std::cell::RefCell;
use std::fmt;

use ::url::Url;

use crate::messaging::ControlMessage;
use crate::rewriter::Rewriter;

/// The realm's real location object.
pub trait NativeLocation {
    fn href(&self) -> String;
    /// Navigate (`location.href = ...`).
    fn assign(&self, url: &str);
    fn replace(&self, url: &str);
    fn reload(&self);
    /// Same-document hash navigation.
    fn set_hash(&self, hash: &str);
}

/// The nine mirrored properties.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocationProp {
    Href,
    Hash,
    Pathname,
    Host,
    Hostname,
    Origin,
    Port,
    Protocol,
    Search,
}

impl LocationProp {
    pub const ALL: [LocationProp; 9] = [
        Self::Href,
        Self::Hash,
        Self::Pathname,
        Self::Host,
        Self::Hostname,
        Self::Origin,
        Self::Port,
        Self::Protocol,
        Self::Search,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Href => "href",
            Self::Hash => "hash",
            Self::Pathname => "pathname",
            Self::Host => "host",
            Self::Hostname => "hostname",
            Self::Origin => "origin",
            Self::Port => "port",
            Self::Protocol => "protocol",
            Self::Search => "search",
        }
    }
}

impl TryFrom<&str> for LocationProp {
    type Error = ();

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::ALL.into_iter().find(|p| p.name() == value).ok_or(())
    }
}

/// Anchor-style decomposition of a URL.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocationParts {
    pub href: String,
    pub protocol: String,
    pub host: String,
    pub hostname: String,
    pub port: String,
    pub origin: String,
    pub pathname: String,
    pub search: String,
    pub hash: String,
}

impl LocationParts {
    pub fn parse(href: &str) -> Self {
        match Url::parse(href) {
            Ok(url) => Self::from_url(&url),
            Err(_) => Self { href: href.to_string(), ..Self::default() },
        }
    }

    pub fn from_url(url: &Url) -> Self {
        let hostname = url.host_str().unwrap_or_default().to_string();
        let port = url.port().map(|p| p.to_string()).unwrap_or_default();
        let host = if port.is_empty() { hostname.clone() } else { format!("{hostname}:{port}") };
        Self {
            href: url.to_string(),
            protocol: format!("{}:", url.scheme()),
            host,
            hostname,
            port,
            origin: url.origin().ascii_serialization(),
            pathname: url.path().to_string(),
            search: url.query().map(|q| format!("?{q}")).unwrap_or_default(),
            hash: url.fragment().map(|f| format!("#{f}")).unwrap_or_default(),
        }
    }

    pub fn get(&self, prop: LocationProp) -> &str {
        match prop {
            LocationProp::Href => &self.href,
            LocationProp::Hash => &self.hash,
            LocationProp::Pathname => &self.pathname,
            LocationProp::Host => &self.host,
            LocationProp::Hostname => &self.hostname,
            LocationProp::Origin => &self.origin,
            LocationProp::Port => &self.port,
            LocationProp::Protocol => &self.protocol,
            LocationProp::Search => &self.search,
        }
    }
}

// =============================================================================
// Synthetic Location
// =============================================================================

/// `WB_wombat_location` for one realm.
pub struct SyntheticLocation<N: NativeLocation> {
    native: N,
    /// (raw native href, derived parts)
    cache: RefCell<Option<(String, LocationParts)>>,
}

impl<N: NativeLocation> fmt::Debug for SyntheticLocation<N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyntheticLocation").field("cache", &self.cache).finish()
    }
}

impl<N: NativeLocation> SyntheticLocation<N> {
    pub fn new(native: N) -> Self {
        Self {
            native,
            cache: RefCell::new(None),
        }
    }

    pub fn native(&self) -> &N {
        &self.native
    }

    /// Current parts, re-derived only when the native href changed.
    pub fn parts(&self, rw: &Rewriter) -> LocationParts {
        let raw = self.native.href();
        if let Some((seen, parts)) = self.cache.borrow().as_ref() {
            if *seen == raw {
                return parts.clone();
            }
        }
        let parts = LocationParts::parse(&rw.extract_original(&raw));
        *self.cache.borrow_mut() = Some((raw, parts.clone()));
        parts
    }

    pub fn get(&self, rw: &Rewriter, prop: LocationProp) -> String {
        self.parts(rw).get(prop).to_string()
    }

    pub fn href(&self, rw: &Rewriter) -> String {
        self.get(rw, LocationProp::Href)
    }

    /// `toString()`/`valueOf()`.
    pub fn to_string(&self, rw: &Rewriter) -> String {
        self.href(rw)
    }

    /// Resolve `value` against the original URL.
    fn resolve(&self, rw: &Rewriter, value: &str) -> Option<Url> {
        let current = self.href(rw);
        match Url::parse(&current) {
            Ok(base) => base.join(value).ok(),
            Err(_) => Url::parse(value).ok(),
        }
    }

    /// Assign one property. `hash` goes straight to the native location;
    /// everything else navigates to the rewritten result.
    pub fn set(&self, rw: &Rewriter, prop: LocationProp, value: &str) {
        if prop == LocationProp::Hash {
            self.native.set_hash(value);
            return;
        }

        let target = if prop == LocationProp::Href {
            match self.resolve(rw, value) {
                Some(url) => url.to_string(),
                // Leave unparsable targets to the rewriter's pass-through rule
                None => value.to_string(),
            }
        } else {
            let Some(mut url) = Url::parse(&self.href(rw)).ok() else {
                log::debug!("location.{} set on unparsable href", prop.name());
                return;
            };
            if let Err(()) = apply_component(&mut url, prop, value) {
                log::debug!("ignoring location.{} = {:?}", prop.name(), value);
                return;
            }
            url.to_string()
        };

        let rewritten = rw.rewrite_url(&target);
        log::debug!("location.{} -> {}", prop.name(), rewritten);
        self.native.assign(&rewritten);
    }

    /// Target for `assign`/`replace`, or `None` when it is the current page.
    fn navigation_target(&self, rw: &Rewriter, url: &str) -> Option<String> {
        let resolved = self.resolve(rw, url).map(String::from).unwrap_or_else(|| url.to_string());
        let rewritten = rw.rewrite_url(&resolved).into_owned();
        if rw.extract_original(&rewritten) == self.href(rw) {
            log::debug!("navigation to current location skipped: {}", url);
            return None;
        }
        Some(rewritten)
    }

    /// `location.assign(url)`. Returns whether navigation happened.
    pub fn assign(&self, rw: &Rewriter, url: &str) -> bool {
        match self.navigation_target(rw, url) {
            Some(target) => {
                self.native.assign(&target);
                true
            }
            None => false,
        }
    }

    /// `location.replace(url)`. Returns whether navigation happened.
    pub fn replace(&self, rw: &Rewriter, url: &str) -> bool {
        match self.navigation_target(rw, url) {
            Some(target) => {
                self.native.replace(&target);
                true
            }
            None => false,
        }
    }

    pub fn reload(&self) {
        self.native.reload();
    }

    /// `hashchange` notification for the archive UI.
    pub fn hashchange_message(&self, rw: &Rewriter) -> ControlMessage {
        ControlMessage::HashChange { hash: self.get(rw, LocationProp::Hash) }
    }

    /// Apply an `outer_hashchange` from the archive UI. Other messages are
    /// ignored.
    pub fn handle_control(&self, rw: &Rewriter, msg: &ControlMessage) -> bool {
        match msg {
            ControlMessage::OuterHashChange { hash } if *hash != self.get(rw, LocationProp::Hash) => {
                self.native.set_hash(hash);
                true
            }
            _ => false,
        }
    }
}

/// Anchor-parser semantics for the component setters.
fn apply_component(url: &mut Url, prop: LocationProp, value: &str) -> Result<(), ()> {
    match prop {
        LocationProp::Pathname => {
            url.set_path(value);
            Ok(())
        }
        LocationProp::Search => {
            let query = value.strip_prefix('?').unwrap_or(value);
            url.set_query((!query.is_empty()).then_some(query));
            Ok(())
        }
        LocationProp::Hostname => url.set_host(Some(value)).map_err(|_| ()),
        LocationProp::Host => {
            let (host, port) = match value.rsplit_once(':') {
                Some((h, p)) if p.bytes().all(|b| b.is_ascii_digit()) => (h, Some(p)),
                _ => (value, None),
            };
            url.set_host(Some(host)).map_err(|_| ())?;
            match port {
                Some(p) => url.set_port(p.parse().ok()),
                None => Ok(()),
            }
        }
        LocationProp::Port => url.set_port(value.parse().ok()),
        LocationProp::Protocol => url.set_scheme(value.trim_end_matches(':')),
        LocationProp::Origin => {
            let origin = Url::parse(value).map_err(|_| ())?;
            url.set_scheme(origin.scheme())?;
            url.set_host(origin.host_str()).map_err(|_| ())?;
            url.set_port(origin.port())
        }
        LocationProp::Href | LocationProp::Hash => Err(()),
    }
}

// =============================================================================
// Document Shim
// =============================================================================

/// Original-URL views of `document.URL`, `documentURI`, `referrer`, `domain`.
#[derive(Debug, Clone, Copy)]
pub struct DocumentShim<'a> {
    rw: &'a Rewriter,
}

impl<'a> DocumentShim<'a> {
    pub fn new(rw: &'a Rewriter) -> Self {
        Self { rw }
    }

    /// `document.URL` and `document.documentURI`.
    pub fn url(&self, raw: &str) -> String {
        self.rw.extract_original(raw)
    }

    /// `document.referrer`. Empty stays empty.
    pub fn referrer(&self, raw: &str) -> String {
        if raw.is_empty() {
            return String::new();
        }
        self.rw.extract_original(raw)
    }

    /// `document.domain`: the original host without port.
    pub fn domain(&self) -> String {
        let host = &self.rw.paths().orig_host;
        host.split(':').next().unwrap_or(host).to_string()
    }
}
