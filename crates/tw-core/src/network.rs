//! Network interceptors
//!
//! Every URL-taking network API maps to one fixed modifier. Fetch-style
//! requests are additionally forced to send credentials and carry a tagging
//! header so the archive can tell script fetches from navigations.

use crate::rewriter::{Rewriter, INTERNAL_MARKER};
use crate::types::{Modifier, RewriteContext, UrlLike};

/// Header added to script-initiated requests.
pub const REQUESTED_WITH_HEADER: &str = "X-Pywb-Requested-With";
pub const REQUESTED_WITH_VALUE: &str = "XMLHttpRequest";

/// URL-taking network entry points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkApi {
    Fetch,
    XhrOpen,
    Request,
    EventSource,
    WebSocket,
    SendBeacon,
    WindowOpen,
    ResponseRedirect,
    Worker,
    SharedWorker,
    ServiceWorkerRegister,
    ServiceWorkerScope,
    WorkletAddModule,
    ImportScripts,
}

impl NetworkApi {
    pub const ALL: [Self; 14] = [
        Self::Fetch,
        Self::XhrOpen,
        Self::Request,
        Self::EventSource,
        Self::WebSocket,
        Self::SendBeacon,
        Self::WindowOpen,
        Self::ResponseRedirect,
        Self::Worker,
        Self::SharedWorker,
        Self::ServiceWorkerRegister,
        Self::ServiceWorkerScope,
        Self::WorkletAddModule,
        Self::ImportScripts,
    ];

    pub const fn modifier(self) -> Modifier {
        match self {
            Self::Fetch
            | Self::XhrOpen
            | Self::Request
            | Self::EventSource
            | Self::SendBeacon
            | Self::WindowOpen
            | Self::ResponseRedirect
            | Self::ServiceWorkerScope => Modifier::Navigation,
            Self::WebSocket => Modifier::WebSocket,
            Self::Worker | Self::SharedWorker => Modifier::Worker,
            Self::ServiceWorkerRegister => Modifier::ServiceWorker,
            Self::WorkletAddModule | Self::ImportScripts => Modifier::Script,
        }
    }

    /// Requests made through this API are tagged and sent with credentials.
    pub const fn is_tagged(self) -> bool {
        matches!(self, Self::Fetch | Self::XhrOpen)
    }
}

/// `RequestInit.credentials`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Credentials {
    Omit,
    SameOrigin,
    Include,
}

impl Credentials {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Omit => "omit",
            Self::SameOrigin => "same-origin",
            Self::Include => "include",
        }
    }
}

/// What the binding must do to a request before forwarding it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestPlan {
    pub url: UrlLike,
    /// `None` leaves the page's choice alone.
    pub credentials: Option<Credentials>,
    pub headers: Vec<(&'static str, &'static str)>,
}

/// `navigator.serviceWorker.register(script, {scope})` arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceWorkerRegistration {
    pub script: String,
    pub scope: Option<String>,
}

// =============================================================================
// Network Shim
// =============================================================================

pub struct NetworkShim<'a> {
    rw: &'a Rewriter,
}

impl<'a> NetworkShim<'a> {
    pub fn new(rw: &'a Rewriter) -> Self {
        Self { rw }
    }

    /// Rewrite the URL argument of `api`.
    pub fn rewrite(&self, api: NetworkApi, value: UrlLike) -> UrlLike {
        if api == NetworkApi::WebSocket {
            return value.map(|url| self.rw.rewrite_ws_url(url));
        }
        let ctx = RewriteContext::new().with_modifier(api.modifier());
        self.rw.rewrite_like(value, &ctx)
    }

    /// String shorthand for [`NetworkShim::rewrite`].
    pub fn rewrite_str(&self, api: NetworkApi, url: &str) -> String {
        match self.rewrite(api, UrlLike::from(url)) {
            UrlLike::Str(s) | UrlLike::Object { href: s } => s,
            UrlLike::Opaque => url.to_string(),
        }
    }

    /// Full request plan for `api`.
    pub fn plan(&self, api: NetworkApi, input: UrlLike) -> RequestPlan {
        let url = self.rewrite(api, input);
        if !api.is_tagged() {
            return RequestPlan {
                url,
                credentials: None,
                headers: Vec::new(),
            };
        }
        RequestPlan {
            url,
            credentials: Some(Credentials::Include),
            headers: vec![(REQUESTED_WITH_HEADER, REQUESTED_WITH_VALUE)],
        }
    }

    /// `fetch(input, init)`.
    pub fn fetch(&self, input: UrlLike) -> RequestPlan {
        self.plan(NetworkApi::Fetch, input)
    }

    /// `XMLHttpRequest.prototype.open(method, url)`.
    pub fn xhr_open(&self, url: &str) -> RequestPlan {
        self.plan(NetworkApi::XhrOpen, UrlLike::from(url))
    }

    pub fn service_worker_register(&self, script: &str, scope: Option<&str>) -> ServiceWorkerRegistration {
        ServiceWorkerRegistration {
            script: self.rewrite_str(NetworkApi::ServiceWorkerRegister, script),
            scope: scope.map(|s| self.rewrite_str(NetworkApi::ServiceWorkerScope, s)),
        }
    }

    // =========================================================================
    // Blob workers
    // =========================================================================

    /// Source for a blob-URL worker: internal markers removed, prefixed with a
    /// bootstrap that patches the worker's own network entry points.
    pub fn worker_bootstrap(&self, source: &str) -> String {
        let body = source.replace(INTERNAL_MARKER, "");
        let prelude = self.worker_prelude();
        let mut out = String::with_capacity(prelude.len() + body.len() + 1);
        out.push_str(&prelude);
        out.push('\n');
        out.push_str(&body);
        out
    }

    /// Minimal in-worker rewriter. Workers have no DOM and do not inherit the
    /// page's patched globals, so only fetch, XHR and importScripts are
    /// covered.
    pub fn worker_prelude(&self) -> String {
        let rw = self.rw;
        let paths = rw.paths();
        let timestamp = if rw.info().is_live_replay() { "" } else { rw.info().url_timestamp() };
        let base = format!("{}{}", paths.abs_prefix, timestamp);
        let quote = |s: &str| serde_json::to_string(s).unwrap_or_else(|_| String::from("\"\""));

        format!(
            r#"(function(base, origin, scheme) {{
  function rw(url, mod) {{
    if (typeof url !== "string" || !url) return url;
    if (/^(data:|blob:|about:|javascript:|mailto:)/.test(url) || url.indexOf(base) === 0) return url;
    if (url.indexOf("//") === 0) url = scheme + url;
    else if (url.charAt(0) === "/") url = origin + url;
    else if (!/^https?:\/\//i.test(url)) return url;
    return base + mod + "/" + url;
  }}
  var f = self.fetch;
  if (f) self.fetch = function(input, init) {{
    return f.call(this, typeof input === "string" ? rw(input, "{fetch}") : input, init);
  }};
  var imp = self.importScripts;
  if (imp) self.importScripts = function() {{
    return imp.apply(this, Array.prototype.map.call(arguments, function(u) {{ return rw(u, "{script}"); }}));
  }};
  var open = self.XMLHttpRequest && self.XMLHttpRequest.prototype.open;
  if (open) self.XMLHttpRequest.prototype.open = function(method, url) {{
    arguments[1] = rw(url, "{fetch}");
    return open.apply(this, arguments);
  }};
}})({base}, {origin}, {scheme});"#,
            fetch = NetworkApi::Fetch.modifier().as_str(),
            script = NetworkApi::ImportScripts.modifier().as_str(),
            base = quote(&base),
            origin = quote(&paths.orig_origin),
            scheme = quote(paths.orig_scheme.prefix().trim_end_matches("//")),
        )
    }
}
