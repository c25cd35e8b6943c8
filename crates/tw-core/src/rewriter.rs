//! URL Classifier and Rewriter
//!
//! Every other component funnels URL decisions through here. Rewriting maps
//! an original URL into the archive scheme
//! `{prefix}{timestamp}{modifier}/{original-absolute-url}`; extraction maps a
//! rewritten URL back to the original.
//!
//! Classification order is fixed: ignored schemes, already-prefixed,
//! server-relative, dot-relative, absolute/protocol-relative, bad-prefix
//! artifacts, bare host names. Anything else is returned untouched so that
//! non-URL strings are never corrupted.

use std::borrow::Cow;

use crate::config::{ArchiveInfo, ConfigError, ReplayPaths};
use crate::types::{Modifier, RewriteContext, UrlLike};
use crate::url::{extract_scheme, is_host_url, starts_with_ignore_case, starts_with_one_of, Scheme};

/// Values starting with these are never rewritten.
pub const IGNORE_PREFIXES: &[&str] = &["#", "about:", "data:", "blob:", "mailto:", "javascript:", "{", "*"];

/// Prefixes of absolute and protocol-relative URLs.
pub const VALID_PREFIXES: &[&str] = &["http://", "https://", "//"];

/// Token the server-side rewriter injects into markup and scripts.
pub const INTERNAL_MARKER: &str = "WB_wombat_";

// =============================================================================
// Rewriter
// =============================================================================

/// URL rewriter bound to one archive configuration.
#[derive(Debug, Clone)]
pub struct Rewriter {
    info: ArchiveInfo,
    paths: ReplayPaths,
    default_modifier: Modifier,
    bad_prefixes: [String; 4],
}

impl Rewriter {
    pub fn new(info: ArchiveInfo) -> Result<Self, ConfigError> {
        let paths = ReplayPaths::from_info(&info)?;
        let default_modifier = info.default_modifier();
        let bad_prefixes = bad_prefixes(&paths.rel_prefix);
        log::debug!(
            "rewriter ready: prefix={} orig={} proxy={}",
            paths.abs_prefix,
            paths.orig_origin,
            info.is_proxy()
        );
        Ok(Self {
            info,
            paths,
            default_modifier,
            bad_prefixes,
        })
    }

    /// Re-derive paths after the window navigated to a new capture.
    pub fn init_paths(&mut self, info: ArchiveInfo) -> Result<(), ConfigError> {
        *self = Self::new(info)?;
        Ok(())
    }

    pub fn info(&self) -> &ArchiveInfo {
        &self.info
    }

    pub fn paths(&self) -> &ReplayPaths {
        &self.paths
    }

    pub fn default_modifier(&self) -> Modifier {
        self.default_modifier
    }

    /// Is `url` already in rewritten (absolute or relative prefix) form?
    pub fn is_rewritten(&self, url: &str) -> bool {
        if self.info.is_proxy() {
            return false;
        }
        url.starts_with(&self.paths.abs_prefix) || url.starts_with(&self.paths.rel_prefix)
    }

    // =========================================================================
    // Rewrite
    // =========================================================================

    /// Rewrite with the default modifier and absolute prefix.
    pub fn rewrite_url<'a>(&self, url: &'a str) -> Cow<'a, str> {
        self.rewrite(url, &RewriteContext::new())
    }

    /// Rewrite with an explicit modifier.
    pub fn rewrite_with<'a>(&self, url: &'a str, modifier: Modifier) -> Cow<'a, str> {
        self.rewrite(url, &RewriteContext::new().with_modifier(modifier))
    }

    /// Rewrite a value of any intercepted shape. Opaque values pass through.
    pub fn rewrite_like(&self, value: UrlLike, ctx: &RewriteContext<'_>) -> UrlLike {
        value.map(|s| self.rewrite(s, ctx).into_owned())
    }

    /// Rewrite `url` for the archive. Never fails: anything that cannot be
    /// classified comes back unchanged.
    pub fn rewrite<'a>(&self, url: &'a str, ctx: &RewriteContext<'_>) -> Cow<'a, str> {
        if url.is_empty() {
            return Cow::Borrowed(url);
        }
        if self.info.is_proxy() {
            return self.rewrite_proxy_scheme(url);
        }

        let modifier = ctx.modifier.unwrap_or(self.default_modifier);
        if modifier == Modifier::NoRewrite {
            return Cow::Borrowed(url);
        }

        let cleaned: Cow<'a, str> = if url.contains(INTERNAL_MARKER) {
            Cow::Owned(url.replace(INTERNAL_MARKER, ""))
        } else {
            Cow::Borrowed(url)
        };

        match self.classify(&cleaned, ctx, modifier) {
            Some(rewritten) => {
                log::trace!("rewrite {} -> {}", url, rewritten);
                Cow::Owned(rewritten)
            }
            None => cleaned,
        }
    }

    /// Core classification. `None` means "leave unchanged".
    fn classify(&self, url: &str, ctx: &RewriteContext<'_>, modifier: Modifier) -> Option<String> {
        let paths = &self.paths;

        if starts_with_one_of(url, IGNORE_PREFIXES).is_some() {
            return None;
        }
        if self.info.no_rewrite_prefixes.iter().any(|p| url.starts_with(p.as_str())) {
            return None;
        }

        // Already rewritten, absolute form (scheme-relative checked with the archive scheme)
        if url.starts_with(&paths.abs_prefix) {
            return None;
        }
        if let Some(rest) = url.strip_prefix("//") {
            let archive_rel = &paths.abs_prefix[paths.archive_scheme.prefix().len()..];
            if rest.starts_with(archive_rel) {
                return None;
            }
        }

        // Archive host with the port dropped
        if paths.archive_host != paths.archive_hostname {
            let dropped = format!("{}{}/", paths.archive_scheme.prefix(), paths.archive_hostname);
            if let Some(rest) = url.strip_prefix(&dropped) {
                return Some(format!("{}{}/{}", paths.archive_scheme.prefix(), paths.archive_host, rest));
            }
        }

        // Server-relative
        if url.starts_with('/') && !url.starts_with("//") {
            if url.starts_with(&paths.rel_prefix) {
                return repair_collapsed_scheme(url);
            }
            if !paths.static_prefix.is_empty() && url.starts_with(&paths.static_prefix) {
                return None;
            }
            let absolute = format!("{}{}", paths.orig_origin, url);
            return Some(self.final_url(ctx.use_relative, modifier, &absolute));
        }

        // Dot-relative, resolved against the originating document
        let resolved;
        let url = if url.starts_with('.') {
            resolved = self.resolve_relative(url, ctx)?;
            resolved.as_str()
        } else {
            url
        };

        if let Some(prefix) = starts_with_one_of(url, VALID_PREFIXES) {
            return Some(self.rewrite_absolute(url, prefix, ctx, modifier));
        }

        if self.bad_prefixes.iter().any(|p| url.starts_with(p.as_str())) {
            let original = self.extract_original(url);
            return Some(self.final_url(ctx.use_relative, modifier, &original));
        }

        if is_host_url(url) && !url.starts_with(&format!("{}/", paths.archive_host)) {
            let absolute = format!("{}{}", paths.orig_scheme.prefix(), url);
            return Some(self.final_url(ctx.use_relative, modifier, &absolute));
        }

        None
    }

    /// `http://`, `https://` and `//` URLs.
    fn rewrite_absolute(&self, url: &str, prefix: &str, ctx: &RewriteContext<'_>, modifier: Modifier) -> String {
        let paths = &self.paths;
        let prefix_host = format!("{}{}/", prefix, paths.archive_host);

        if starts_with_ignore_case(url, &prefix_host) {
            // Points at the archive server itself; keep the leading '/'
            let path = &url[prefix_host.len() - 1..];
            let archive_path = path.starts_with(&paths.rel_prefix)
                || (!paths.static_prefix.is_empty() && path.starts_with(&paths.static_prefix));
            if archive_path {
                // Already archived, only the scheme may need repair
                return if ctx.use_relative {
                    path.to_string()
                } else {
                    format!("{}{}{}", paths.archive_scheme.prefix(), paths.archive_host, path)
                };
            }
            // An original-site path that was resolved against the archive host
            let absolute = format!("{}{}", paths.orig_origin, path);
            return self.final_url(ctx.use_relative, modifier, &absolute);
        }

        if prefix == "//" {
            let absolute = format!("{}{}", paths.orig_scheme.prefix(), &url[2..]);
            return self.final_url(ctx.use_relative, modifier, &absolute);
        }

        self.final_url(ctx.use_relative, modifier, url)
    }

    /// Resolve `./x` / `../x` against the document base (original form).
    fn resolve_relative(&self, url: &str, ctx: &RewriteContext<'_>) -> Option<String> {
        let base = match ctx.base() {
            Some(base) => self.extract_original(base),
            None => self.info.url.clone(),
        };
        let base = ::url::Url::parse(&base).ok()?;
        base.join(url).ok().map(String::from)
    }

    /// Build `{prefix}{timestamp}{modifier}/{url}`.
    pub fn final_url(&self, use_relative: bool, modifier: Modifier, url: &str) -> String {
        let prefix = if use_relative { &self.paths.rel_prefix } else { &self.paths.abs_prefix };
        let timestamp = if self.info.is_live_replay() { "" } else { self.info.url_timestamp() };

        let mut out = String::with_capacity(prefix.len() + timestamp.len() + 5 + url.len());
        out.push_str(prefix);
        out.push_str(timestamp);
        out.push_str(modifier.as_str());
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(url);
        out
    }

    /// Proxy mode: only correct an http/https mismatch with the page scheme.
    fn rewrite_proxy_scheme<'a>(&self, url: &'a str) -> Cow<'a, str> {
        match (self.paths.orig_scheme, extract_scheme(url)) {
            (Scheme::Http, Some(Scheme::Https)) => Cow::Owned(format!("http://{}", &url[8..])),
            (Scheme::Https, Some(Scheme::Http)) => Cow::Owned(format!("https://{}", &url[7..])),
            _ => Cow::Borrowed(url),
        }
    }

    // =========================================================================
    // WebSocket
    // =========================================================================

    /// Rewrite a websocket URL. The ws(s) scheme is swapped to http(s) around
    /// the rewrite and the result uses the scheme matching the archive.
    pub fn rewrite_ws_url(&self, url: &str) -> String {
        let paths = &self.paths;
        let ws_prefix = if paths.archive_scheme.is_secure() { "wss://" } else { "ws://" };

        if self.info.is_proxy() {
            return match extract_scheme(url) {
                Some(Scheme::Ws | Scheme::Wss) => {
                    let rest = &url[url.find("://").map(|i| i + 3).unwrap_or(0)..];
                    let scheme = if paths.orig_scheme.is_secure() { "wss://" } else { "ws://" };
                    format!("{scheme}{rest}")
                }
                _ => url.to_string(),
            };
        }

        let http_form = match extract_scheme(url) {
            Some(Scheme::Ws) => format!("http://{}", &url[5..]),
            Some(Scheme::Wss) => format!("https://{}", &url[6..]),
            _ => url.to_string(),
        };
        let rewritten = self.rewrite_with(&http_form, Modifier::WebSocket).into_owned();
        match extract_scheme(&rewritten) {
            Some(Scheme::Http) => format!("{ws_prefix}{}", &rewritten[7..]),
            Some(Scheme::Https) => format!("{ws_prefix}{}", &rewritten[8..]),
            _ if rewritten.starts_with('/') && !rewritten.starts_with("//") => {
                format!("{ws_prefix}{}{rewritten}", paths.archive_host)
            }
            _ => rewritten,
        }
    }

    // =========================================================================
    // Extraction
    // =========================================================================

    /// Recover the original absolute URL from a rewritten one. URLs that are
    /// not in archive form come back unchanged (scheme-relative ones get the
    /// original scheme).
    pub fn extract_original(&self, url: &str) -> String {
        if url.is_empty() || self.info.is_proxy() {
            return url.to_string();
        }
        if starts_with_one_of(url, IGNORE_PREFIXES).is_some() {
            return url.to_string();
        }
        let paths = &self.paths;

        let path = match self.archive_path(url) {
            Some(path) => path,
            None => return self.absolutize_scheme_relative(url),
        };

        if !paths.static_prefix.is_empty() && path.starts_with(&paths.static_prefix) {
            return url.to_string();
        }

        let rest = match path.strip_prefix(&paths.rel_prefix) {
            Some(rest) => rest,
            // Archive host but outside the collection: an original-site path
            None => return format!("{}{}", paths.orig_origin, path),
        };

        let candidate: Cow<'_, str> = if starts_with_one_of(rest, VALID_PREFIXES).is_some() {
            Cow::Borrowed(rest)
        } else if let Some(after) = strip_timestamp_modifier(rest) {
            if after.is_empty() || starts_with_one_of(after, VALID_PREFIXES).is_some() || after.starts_with("blob:") {
                Cow::Borrowed(after)
            } else {
                Cow::Owned(format!("{}{}", paths.orig_scheme.prefix(), after))
            }
        } else {
            match find_embedded_url(rest) {
                Some(idx) => Cow::Borrowed(&rest[idx + 1..]),
                None => Cow::Borrowed(rest),
            }
        };

        self.absolutize_scheme_relative(&candidate)
    }

    /// Path part of `url` if it addresses the archive server.
    fn archive_path<'u>(&self, url: &'u str) -> Option<&'u str> {
        let paths = &self.paths;
        for prefix in VALID_PREFIXES {
            if starts_with_ignore_case(url, prefix) {
                let host_start = prefix.len();
                let after = &url[host_start..];
                if starts_with_ignore_case(after, &paths.archive_host)
                    && after[paths.archive_host.len()..].starts_with('/')
                {
                    return Some(&after[paths.archive_host.len()..]);
                }
                return None;
            }
        }
        if url.starts_with('/') {
            return Some(url);
        }
        for bad in ["https:", "http:"] {
            if let Some(rest) = url.strip_prefix(bad) {
                if rest.starts_with(&paths.rel_prefix) {
                    return Some(rest);
                }
            }
        }
        None
    }

    fn absolutize_scheme_relative(&self, url: &str) -> String {
        if url.starts_with("//") {
            let scheme = self.paths.orig_scheme.prefix();
            format!("{}{}", &scheme[..scheme.len() - 2], url)
        } else {
            url.to_string()
        }
    }
}

/// `http:/coll/`-style concatenation artifacts.
fn bad_prefixes(rel_prefix: &str) -> [String; 4] {
    [
        format!("http:{rel_prefix}"),
        format!("https:{rel_prefix}"),
        format!("http:/{rel_prefix}"),
        format!("https:/{rel_prefix}"),
    ]
}

/// `/coll/2018mp_/http:/x` -> `/coll/2018mp_/http://x`
fn repair_collapsed_scheme(url: &str) -> Option<String> {
    if url.find("http").map_or(true, |i| i <= 1) {
        return None;
    }
    let sep = url.find(":/")?;
    if url.as_bytes().get(sep + 2) == Some(&b'/') {
        return None;
    }
    Some(format!("{}/{}", &url[..sep + 2], &url[sep + 2..]))
}

/// Strip `{digits}{xx_}/` from the start of the part after the collection
/// prefix. Returns the remainder when the first segment has that shape.
fn strip_timestamp_modifier(rest: &str) -> Option<&str> {
    let slash = rest.find('/')?;
    let segment = rest[..slash].as_bytes();
    let digits = segment.iter().take_while(|b| b.is_ascii_digit()).count();
    let tail = &segment[digits..];
    let valid = match tail.len() {
        0 => digits > 0,
        1 => tail == b"-",
        3 | 4 => tail[tail.len() - 1] == b'_' && tail[..tail.len() - 1].iter().all(u8::is_ascii_lowercase),
        _ => false,
    };
    valid.then(|| &rest[slash + 1..])
}

/// Locate the `/http`, `///`, `/blob:` or `/about:blank` marker.
fn find_embedded_url(rest: &str) -> Option<usize> {
    ["/http", "///", "/blob:", "/about:blank"].iter().find_map(|m| rest.find(m))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{sample_info, PREFIX};
    use proptest::prelude::*;

    fn rw() -> Rewriter {
        Rewriter::new(sample_info()).expect("valid config")
    }

    #[test]
    fn test_ignored_values_unchanged() {
        let rw = rw();
        for url in ["", "#top", "about:blank", "data:image/png;base64,AA", "mailto:a@b.c", "javascript:void(0)", "{x}", "*", "blob:https://a/b"] {
            assert_eq!(rw.rewrite_url(url), url);
        }
    }

    #[test]
    fn test_absolute_url() {
        assert_eq!(
            rw().rewrite_url("http://example.com/a.js"),
            format!("{PREFIX}mp_/http://example.com/a.js")
        );
        assert_eq!(
            rw().rewrite_with("https://example.com/i.png", Modifier::Image),
            format!("{PREFIX}im_/https://example.com/i.png")
        );
    }

    #[test]
    fn test_server_relative() {
        assert_eq!(rw().rewrite_url("/it"), format!("{PREFIX}mp_/https://tests.wombat.io/it"));
        assert_eq!(
            rw().rewrite("/it", &RewriteContext::new().relative()),
            "/live/20180803160549mp_/https://tests.wombat.io/it"
        );
    }

    #[test]
    fn test_protocol_relative_inherits_scheme() {
        assert_eq!(
            rw().rewrite_url("//cdn.example.com/x.css"),
            format!("{PREFIX}mp_/https://cdn.example.com/x.css")
        );
    }

    #[test]
    fn test_dot_relative_uses_document_base() {
        let rw = rw();
        let base = format!("{PREFIX}mp_/https://tests.wombat.io/a/b/page.html");
        let ctx = RewriteContext::new().with_document_base(&base);
        assert_eq!(
            rw.rewrite("../c.png", &ctx),
            format!("{PREFIX}mp_/https://tests.wombat.io/a/c.png")
        );
        assert_eq!(
            rw.rewrite("./d.png", &RewriteContext::new()),
            format!("{PREFIX}mp_/https://tests.wombat.io/d.png")
        );
    }

    #[test]
    fn test_host_like_strings() {
        assert_eq!(rw().rewrite_url("www.example.com/x"), format!("{PREFIX}mp_/https://www.example.com/x"));
        assert_eq!(rw().rewrite_url("example.com:8000/"), format!("{PREFIX}mp_/https://example.com:8000/"));
        assert_eq!(rw().rewrite_url("not a url"), "not a url");
        assert_eq!(rw().rewrite_url("relative/path.html"), "relative/path.html");
    }

    #[test]
    fn test_already_rewritten_is_stable() {
        let rw = rw();
        let once = rw.rewrite_url("https://example.com/").into_owned();
        assert_eq!(rw.rewrite_url(&once), once);
        assert_eq!(rw.rewrite_url("/live/2018mp_/https://example.com/"), "/live/2018mp_/https://example.com/");
        assert_eq!(rw.rewrite_url("//localhost:8080/live/2018mp_/https://a.com/"), "//localhost:8080/live/2018mp_/https://a.com/");
    }

    #[test]
    fn test_scheme_mismatch_repaired() {
        assert_eq!(
            rw().rewrite_url("https://localhost:8080/live/20180803160549mp_/https://a.com/"),
            format!("{PREFIX}mp_/https://a.com/")
        );
    }

    #[test]
    fn test_archive_host_path_becomes_original_path() {
        assert_eq!(
            rw().rewrite_url("http://localhost:8080/some/page"),
            format!("{PREFIX}mp_/https://tests.wombat.io/some/page")
        );
    }

    #[test]
    fn test_bad_prefix_rewritten_cleanly() {
        assert_eq!(
            rw().rewrite_url("http:/live/20180803160549mp_/https://a.com/x"),
            format!("{PREFIX}mp_/https://a.com/x")
        );
    }

    #[test]
    fn test_collapsed_scheme_repaired() {
        assert_eq!(
            rw().rewrite_url("/live/2018mp_/http:/a.com/x"),
            "/live/2018mp_/http://a.com/x"
        );
    }

    #[test]
    fn test_marker_and_no_rewrite() {
        let rw = rw();
        assert_eq!(rw.rewrite_url("WB_wombat_/x"), format!("{PREFIX}mp_/https://tests.wombat.io/x"));
        assert_eq!(rw.rewrite_with("http://a.com/", Modifier::NoRewrite), "http://a.com/");
    }

    #[test]
    fn test_dropped_port_restored() {
        assert_eq!(rw().rewrite_url("http://localhost/live/x"), "http://localhost:8080/live/x");
    }

    #[test]
    fn test_static_prefix_untouched() {
        let rw = rw();
        assert_eq!(rw.rewrite_url("/static/wombat.js"), "/static/wombat.js");
        assert_eq!(rw.extract_original("http://localhost:8080/static/x.js"), "http://localhost:8080/static/x.js");
    }

    #[test]
    fn test_live_mode_has_no_timestamp() {
        let info = ArchiveInfo { is_live: true, ..sample_info() };
        let rw = Rewriter::new(info).expect("valid config");
        assert_eq!(rw.rewrite_url("http://a.com/"), "http://localhost:8080/live/mp_/http://a.com/");
        assert_eq!(rw.extract_original("http://localhost:8080/live/mp_/http://a.com/"), "http://a.com/");
    }

    #[test]
    fn test_proxy_mode_swaps_scheme_only() {
        let info = ArchiveInfo { proxy_magic: "pywb.proxy".into(), ..sample_info() };
        let rw = Rewriter::new(info).expect("valid config");
        assert_eq!(rw.rewrite_url("http://a.com/x"), "https://a.com/x");
        assert_eq!(rw.rewrite_url("/x"), "/x");
        assert_eq!(rw.extract_original("https://a.com/x"), "https://a.com/x");
        assert_eq!(rw.rewrite_ws_url("ws://a.com/s"), "wss://a.com/s");
    }

    #[test]
    fn test_ws_url() {
        let rw = rw();
        assert_eq!(
            rw.rewrite_ws_url("wss://chat.example.com/s"),
            "ws://localhost:8080/live/20180803160549ws_/https://chat.example.com/s"
        );
        assert_eq!(
            rw.rewrite_ws_url("/socket"),
            "ws://localhost:8080/live/20180803160549ws_/https://tests.wombat.io/socket"
        );
    }

    #[test]
    fn test_extract_variants() {
        let rw = rw();
        assert_eq!(rw.extract_original(&format!("{PREFIX}im_/https://a.com/i.png")), "https://a.com/i.png");
        assert_eq!(rw.extract_original("/live/20180803160549/https://a.com/"), "https://a.com/");
        assert_eq!(rw.extract_original("/live/20180803160549mp_/a.com/x"), "https://a.com/x");
        assert_eq!(rw.extract_original("/live/20180803160549mp_///a.com/x"), "https://a.com/x");
        assert_eq!(rw.extract_original("/live/2018wkr_/http://a.com/w.js"), "http://a.com/w.js");
        assert_eq!(rw.extract_original("https://already.example/x"), "https://already.example/x");
        assert_eq!(rw.extract_original("//cdn.example/x"), "https://cdn.example/x");
        assert_eq!(rw.extract_original("#hash"), "#hash");
    }

    #[test]
    fn test_extract_ignores_http_inside_original_path() {
        let rw = rw();
        let rewritten = rw.rewrite_url("https://a.com/httpdocs/x").into_owned();
        assert_eq!(rw.extract_original(&rewritten), "https://a.com/httpdocs/x");
    }

    #[test]
    fn test_url_like_shapes() {
        let rw = rw();
        let ctx = RewriteContext::new().with_modifier(Modifier::Image);
        let obj = rw.rewrite_like(UrlLike::Object { href: "/i.png".into() }, &ctx);
        assert_eq!(obj, UrlLike::Object { href: format!("{PREFIX}im_/https://tests.wombat.io/i.png") });
        assert_eq!(rw.rewrite_like(UrlLike::Opaque, &ctx), UrlLike::Opaque);
    }

    #[test]
    fn test_init_paths_switches_capture() {
        let mut rw = rw();
        let info = ArchiveInfo { timestamp: "2020".into(), url: "http://b.example/".into(), ..sample_info() };
        rw.init_paths(info).expect("valid config");
        assert_eq!(rw.rewrite_url("/p"), "http://localhost:8080/live/2020mp_/http://b.example/p");
    }

    fn absolute_url() -> impl Strategy<Value = String> {
        (
            prop_oneof![Just("http"), Just("https")],
            "[a-z]{1,10}\\.(com|org|io)",
            "(/[a-zA-Z0-9_.-]{1,8}){0,4}/?",
            "(\\?[a-z]=[0-9]{1,3})?",
        )
            .prop_map(|(scheme, host, path, query)| format!("{scheme}://{host}{path}{query}"))
    }

    proptest! {
        #[test]
        fn prop_extract_inverts_rewrite(url in absolute_url()) {
            let rw = rw();
            let rewritten = rw.rewrite_url(&url).into_owned();
            prop_assert_eq!(rw.extract_original(&rewritten), url);
        }

        #[test]
        fn prop_rewrite_is_idempotent(url in absolute_url()) {
            let rw = rw();
            let once = rw.rewrite_url(&url).into_owned();
            prop_assert_eq!(rw.rewrite_url(&once).into_owned(), once);
        }

        #[test]
        fn prop_server_relative_round_trip(path in "/p[a-z0-9]{0,6}(/[a-zA-Z0-9_.-]{1,8}){0,3}") {
            let rw = rw();
            let rewritten = rw.rewrite_url(&path).into_owned();
            prop_assert_eq!(rw.extract_original(&rewritten), format!("https://tests.wombat.io{}", path));
        }
    }
}
