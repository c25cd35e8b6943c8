//! Attribute, style and script interceptors
//!
//! Host-agnostic rules behind every DOM override: attribute setters and
//! getters, inline style and CSSOM values, `<meta http-equiv=refresh>`, inline
//! script scoping and HTML fragments. The binding layer supplies an
//! [`ElementView`] and forwards whatever these functions return.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::Regex;

use crate::css::{extract_media_blocks, rewrite_css};
use crate::html::{rewrite_html, HtmlOptions};
use crate::modifiers::{is_srcset_attr, is_url_attr, link_modifier, modifier_for, preserve_kind, PreserveKind, LAZY_ATTRS};
use crate::rewriter::Rewriter;
use crate::srcset::{extract_srcset, rewrite_srcset};
use crate::types::{Modifier, RewriteContext};

// =============================================================================
// Element Access
// =============================================================================

/// Read-only view of an element, as much as the rules need.
pub trait ElementView {
    /// Tag name in any case.
    fn tag_name(&self) -> Cow<'_, str>;

    /// Current raw value of another attribute (`rel`, `as`, `http-equiv`, `type`).
    fn attr(&self, name: &str) -> Option<Cow<'_, str>>;

    /// Base URI of the owning document, rewritten or original form.
    fn document_base(&self) -> Option<Cow<'_, str>> {
        None
    }

    /// Element was created internally from already-rewritten markup.
    fn no_rewrite(&self) -> bool {
        false
    }
}

// =============================================================================
// Preservation
// =============================================================================

/// A value forwarded to auto-fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preserve {
    /// A single URL, in the form it will be requested.
    Src { value: String, modifier: Modifier },
    /// A raw srcset, resolved later against `tag_src` or the document base.
    Srcset {
        value: String,
        modifier: Modifier,
        tag_src: Option<String>,
        doc_base: Option<String>,
    },
    /// Raw CSS holding `@media` rules.
    Media(String),
}

/// Receiver of preservation notifications. Never blocks the caller.
pub trait PreserveSink {
    fn preserve(&mut self, item: Preserve);
}

/// Discards everything; used when auto-fetch is disabled.
impl PreserveSink for () {
    fn preserve(&mut self, _item: Preserve) {}
}

impl PreserveSink for Vec<Preserve> {
    fn preserve(&mut self, item: Preserve) {
        self.push(item);
    }
}

// =============================================================================
// Attribute Set / Get
// =============================================================================

fn tag_lower(el: &dyn ElementView) -> String {
    el.tag_name().to_ascii_lowercase()
}

/// Modifier for a URL attribute, consulting `rel`/`as` on `<link>`.
pub fn attr_modifier(rw: &Rewriter, el: &dyn ElementView, attr: &str) -> Modifier {
    let tag = tag_lower(el);
    if tag == "link" && attr.eq_ignore_ascii_case("href") {
        let rel = el.attr("rel").unwrap_or_default();
        let as_hint = el.attr("as");
        return link_modifier(&rel, as_hint.as_deref());
    }
    let default = if is_srcset_attr(attr) { Modifier::Image } else { rw.default_modifier() };
    modifier_for(&tag, attr, default)
}

/// Value to store when page code sets `attr` to `value` on `el`.
///
/// `sink` receives preservable media values.
pub fn rewrite_attr<'v>(
    rw: &Rewriter,
    el: &dyn ElementView,
    attr: &str,
    value: &'v str,
    sink: &mut dyn PreserveSink,
) -> Cow<'v, str> {
    if el.no_rewrite() || value.is_empty() {
        return Cow::Borrowed(value);
    }
    let tag = tag_lower(el);
    let attr_lower = attr.to_ascii_lowercase();
    let base = el.document_base();
    let base = base.as_deref();

    if attr_lower == "style" {
        return rewrite_css(rw, value, base);
    }

    if LAZY_ATTRS.contains(&attr_lower.as_str()) {
        if let Some(kind) = preserve_kind(&tag, &attr_lower) {
            sink.preserve(preserve_item(rw, el, kind, &attr_lower, value));
        }
        return Cow::Borrowed(value);
    }

    if tag == "meta" && attr_lower == "content" {
        let refresh = el
            .attr("http-equiv")
            .map_or(false, |v| v.trim().eq_ignore_ascii_case("refresh"));
        return if refresh { rewrite_meta_refresh(rw, value) } else { Cow::Borrowed(value) };
    }

    let modifier = attr_modifier(rw, el, &attr_lower);
    let rewritten: Cow<'v, str> = if is_srcset_attr(&attr_lower) {
        Cow::Owned(rewrite_srcset(rw, value, modifier, base))
    } else if is_url_attr(&tag, &attr_lower) || (tag == "link" && attr_lower == "href") {
        let mut ctx = RewriteContext::new().with_modifier(modifier);
        ctx.document_base = base;
        rw.rewrite(value, &ctx)
    } else {
        return Cow::Borrowed(value);
    };

    if let Some(kind) = preserve_kind(&tag, &attr_lower) {
        // Raw srcset keeps its candidates resolvable; src is sent as requested
        let sent = if kind == PreserveKind::Srcset { value } else { rewritten.as_ref() };
        sink.preserve(preserve_item(rw, el, kind, &attr_lower, sent));
    }

    rewritten
}

/// Preservation notice for `attr` on `el` carrying `value`.
pub fn preserve_item(rw: &Rewriter, el: &dyn ElementView, kind: PreserveKind, attr: &str, value: &str) -> Preserve {
    let tag = tag_lower(el);
    let modifier = match (tag.as_str(), kind) {
        ("video" | "audio", _) | ("source", PreserveKind::Src) => Modifier::OtherEmbed,
        _ => Modifier::Image,
    };
    match kind {
        PreserveKind::Src => Preserve::Src {
            value: if attr == "data-src" {
                rw.rewrite_with(value, modifier).into_owned()
            } else {
                value.to_string()
            },
            modifier,
        },
        PreserveKind::Srcset => Preserve::Srcset {
            value: value.to_string(),
            modifier,
            tag_src: el.attr("src").map(|s| rw.extract_original(&s)),
            doc_base: el.document_base().map(|b| rw.extract_original(&b)),
        },
    }
}

/// Value reported to page code reading `attr` whose stored value is `stored`.
pub fn unrewrite_attr(rw: &Rewriter, el: &dyn ElementView, attr: &str, stored: &str) -> String {
    if el.no_rewrite() || stored.is_empty() {
        return stored.to_string();
    }
    let tag = tag_lower(el);
    let attr_lower = attr.to_ascii_lowercase();
    if is_srcset_attr(&attr_lower) {
        return extract_srcset(rw, stored);
    }
    if is_url_attr(&tag, &attr_lower) || (tag == "link" && attr_lower == "href") {
        return rw.extract_original(stored);
    }
    stored.to_string()
}

// =============================================================================
// Meta Refresh
// =============================================================================

/// Rewrite the URL part of `N; url=...`.
pub fn rewrite_meta_refresh<'a>(rw: &Rewriter, content: &'a str) -> Cow<'a, str> {
    let lower = content.to_ascii_lowercase();
    let Some(pos) = lower.find("url=") else {
        return Cow::Borrowed(content);
    };
    let after = &content[pos + 4..];
    let raw_start = pos + 4 + (after.len() - after.trim_start().len());
    let raw = &content[raw_start..];
    let (start, end) = match raw.chars().next() {
        Some(q @ ('\'' | '"')) => {
            let body = raw_start + 1;
            (body, content[body..].find(q).map_or(content.len(), |i| body + i))
        }
        _ => (raw_start, raw_start + raw.trim_end().len()),
    };
    let target = &content[start..end];
    let rewritten = rw.rewrite_url(target);
    if rewritten == target {
        return Cow::Borrowed(content);
    }
    Cow::Owned(format!("{}{}{}", &content[..start], rewritten, &content[end..]))
}

// =============================================================================
// Inline Scripts
// =============================================================================

/// Scope function the binding layer defines before wrapped scripts run.
pub const SCOPE_FUNCTION: &str = "_____WB$wombat$assign$function_____";

/// Names shadowed inside wrapped inline scripts.
pub const SCOPED_GLOBALS: &[&str] = &["window", "globalThis", "self", "document", "location", "top", "parent", "frames", "opener"];

fn globals_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\b(window|globalThis|self|document|location|top|parent|frames|opener)\b").expect("static regex")
    })
}

/// `<script type>` values executed as classic JavaScript.
pub fn is_js_type(script_type: Option<&str>) -> bool {
    let ty = match script_type {
        None => return true,
        Some(ty) => ty.trim().to_ascii_lowercase(),
    };
    ty.is_empty()
        || matches!(
            ty.as_str(),
            "text/javascript"
                | "application/javascript"
                | "application/x-javascript"
                | "text/x-javascript"
                | "text/ecmascript"
                | "application/ecmascript"
                | "text/jscript"
                | "text/livescript"
        )
}

/// Wrap inline script text so the scoped globals resolve to replay objects.
/// Non-JS types, module scripts and already-wrapped text are untouched.
pub fn wrap_script_text<'a>(text: &'a str, script_type: Option<&str>) -> Cow<'a, str> {
    if !is_js_type(script_type) || text.trim().is_empty() || text.contains(SCOPE_FUNCTION) {
        return Cow::Borrowed(text);
    }
    if !globals_regex().is_match(text) {
        return Cow::Borrowed(text);
    }

    let mut out = String::with_capacity(text.len() + 640);
    out.push_str("var ");
    out.push_str(SCOPE_FUNCTION);
    out.push_str(
        " = function(name) {return (self._wb_wombat && self._wb_wombat.local_init && \
         self._wb_wombat.local_init(name)) || self[name]; };\n\
         if (!self.__WB_pmw) { self.__WB_pmw = function(obj) { this.__WB_source = obj; return this; } }\n{\n",
    );
    for name in SCOPED_GLOBALS {
        out.push_str("let ");
        out.push_str(name);
        out.push_str(" = ");
        out.push_str(SCOPE_FUNCTION);
        out.push_str("(\"");
        out.push_str(name);
        out.push_str("\");\n");
    }
    out.push_str(text);
    out.push_str("\n\n}");
    Cow::Owned(out)
}

// =============================================================================
// Style / CSSOM / Fragments
// =============================================================================

/// `style.setProperty`, `style.cssText`, `insertRule`, `replaceSync`.
/// Media rules are forwarded for preservation.
pub fn rewrite_style_text<'a>(
    rw: &Rewriter,
    css: &'a str,
    base: Option<&str>,
    sink: &mut dyn PreserveSink,
) -> Cow<'a, str> {
    if !extract_media_blocks(css).is_empty() {
        sink.preserve(Preserve::Media(css.to_string()));
    }
    rewrite_css(rw, css, base)
}

/// `innerHTML`/`outerHTML`/`insertAdjacentHTML`/`setHTMLUnsafe` on an element
/// with tag `context_tag`.
pub fn rewrite_fragment(
    rw: &Rewriter,
    context_tag: &str,
    context_type: Option<&str>,
    html: &str,
    base: Option<&str>,
    sink: &mut dyn PreserveSink,
) -> String {
    if context_tag.eq_ignore_ascii_case("style") {
        return rewrite_style_text(rw, html, base, sink).into_owned();
    }
    if context_tag.eq_ignore_ascii_case("script") {
        return wrap_script_text(html, context_type).into_owned();
    }
    let opts = HtmlOptions { document_base: base, ..HtmlOptions::default() };
    rewrite_html(rw, html, &opts, sink)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::test_support::{rewriter, PREFIX};

    #[derive(Default)]
    pub(crate) struct MockElement {
        pub tag: &'static str,
        pub attrs: Vec<(&'static str, &'static str)>,
        pub no_rewrite: bool,
    }

    impl MockElement {
        pub fn new(tag: &'static str) -> Self {
            Self { tag, ..Default::default() }
        }

        pub fn with(mut self, name: &'static str, value: &'static str) -> Self {
            self.attrs.push((name, value));
            self
        }
    }

    impl ElementView for MockElement {
        fn tag_name(&self) -> Cow<'_, str> {
            Cow::Borrowed(self.tag)
        }

        fn attr(&self, name: &str) -> Option<Cow<'_, str>> {
            self.attrs
                .iter()
                .find(|(n, _)| n.eq_ignore_ascii_case(name))
                .map(|(_, v)| Cow::Borrowed(*v))
        }

        fn no_rewrite(&self) -> bool {
            self.no_rewrite
        }
    }

    #[test]
    fn test_table_modifier_applied_on_set() {
        let rw = rewriter();
        let cases = [
            ("img", "src", "im_"),
            ("iframe", "src", "if_"),
            ("frame", "src", "fr_"),
            ("script", "src", "js_"),
            ("video", "poster", "im_"),
            ("embed", "src", "oe_"),
            ("a", "href", "mp_"),
            ("form", "action", "mp_"),
        ];
        for (tag, attr, code) in cases {
            let el = MockElement::new(tag);
            let out = rewrite_attr(&rw, &el, attr, "/x", &mut ());
            assert_eq!(out, format!("{PREFIX}{code}/https://tests.wombat.io/x"), "{tag} {attr}");
        }
    }

    #[test]
    fn test_link_rel_and_as() {
        let rw = rewriter();
        let css = MockElement::new("link").with("rel", "stylesheet");
        assert!(rewrite_attr(&rw, &css, "href", "/a.css", &mut ()).contains("cs_/"));
        let preload = MockElement::new("LINK").with("rel", "preload").with("as", "script");
        assert!(rewrite_attr(&rw, &preload, "href", "/a.js", &mut ()).contains("js_/"));
    }

    #[test]
    fn test_no_rewrite_flag() {
        let rw = rewriter();
        let el = MockElement { no_rewrite: true, ..MockElement::new("img") };
        assert_eq!(rewrite_attr(&rw, &el, "src", "/x.png", &mut ()), "/x.png");
    }

    #[test]
    fn test_non_url_attr_untouched() {
        let rw = rewriter();
        let el = MockElement::new("div");
        assert_eq!(rewrite_attr(&rw, &el, "class", "www.example.com", &mut ()), "www.example.com");
    }

    #[test]
    fn test_getter_returns_original() {
        let rw = rewriter();
        let el = MockElement::new("img");
        let stored = rewrite_attr(&rw, &el, "src", "https://a.com/i.png", &mut ()).into_owned();
        assert_eq!(unrewrite_attr(&rw, &el, "src", &stored), "https://a.com/i.png");
        assert_eq!(unrewrite_attr(&rw, &el, "alt", "text"), "text");
    }

    #[test]
    fn test_style_attr() {
        let rw = rewriter();
        let el = MockElement::new("div");
        let out = rewrite_attr(&rw, &el, "style", "background: url(/bg.png)", &mut ());
        assert_eq!(out, format!("background: url({PREFIX}mp_/https://tests.wombat.io/bg.png)"));
    }

    #[test]
    fn test_srcset_and_preservation() {
        let rw = rewriter();
        let el = MockElement::new("img").with("src", "/a.png");
        let mut sink: Vec<Preserve> = Vec::new();
        let out = rewrite_attr(&rw, &el, "srcset", "/a.png 1x, /b.png 2x", &mut sink);
        assert_eq!(out.matches("im_/").count(), 2);
        assert_eq!(
            sink,
            vec![Preserve::Srcset {
                value: "/a.png 1x, /b.png 2x".into(),
                modifier: Modifier::Image,
                tag_src: Some("https://tests.wombat.io/a.png".into()),
                doc_base: None,
            }]
        );
    }

    #[test]
    fn test_data_src_preserved_not_rewritten() {
        let rw = rewriter();
        let el = MockElement::new("img");
        let mut sink: Vec<Preserve> = Vec::new();
        let out = rewrite_attr(&rw, &el, "data-src", "/lazy.png", &mut sink);
        assert_eq!(out, "/lazy.png");
        assert_eq!(
            sink,
            vec![Preserve::Src {
                value: format!("{PREFIX}im_/https://tests.wombat.io/lazy.png"),
                modifier: Modifier::Image,
            }]
        );
    }

    #[test]
    fn test_video_src_preserved_as_media() {
        let rw = rewriter();
        let el = MockElement::new("video");
        let mut sink: Vec<Preserve> = Vec::new();
        rewrite_attr(&rw, &el, "src", "/v.mp4", &mut sink);
        assert!(matches!(&sink[0], Preserve::Src { modifier: Modifier::OtherEmbed, .. }));
    }

    #[test]
    fn test_meta_refresh() {
        let rw = rewriter();
        let el = MockElement::new("meta").with("http-equiv", "Refresh");
        let out = rewrite_attr(&rw, &el, "content", "5; URL=/next", &mut ());
        assert_eq!(out, format!("5; URL={PREFIX}mp_/https://tests.wombat.io/next"));
        let plain = MockElement::new("meta").with("name", "description");
        assert_eq!(rewrite_attr(&rw, &plain, "content", "/not-a-link", &mut ()), "/not-a-link");
    }

    #[test]
    fn test_meta_refresh_keeps_quotes_and_tail() {
        let rw = rewriter();
        assert_eq!(
            rewrite_meta_refresh(&rw, "0; url='/next?a=1' "),
            format!("0; url='{PREFIX}mp_/https://tests.wombat.io/next?a=1' ")
        );
        assert_eq!(
            rewrite_meta_refresh(&rw, "0;url=\"https://a.com/\""),
            format!("0;url=\"{PREFIX}mp_/https://a.com/\"")
        );
        assert_eq!(
            rewrite_meta_refresh(&rw, "3; url=/x  "),
            format!("3; url={PREFIX}mp_/https://tests.wombat.io/x  ")
        );
    }

    #[test]
    fn test_wrap_script_text() {
        let wrapped = wrap_script_text("window.foo = 1;", None);
        assert!(wrapped.starts_with("var _____WB$wombat$assign$function_____"));
        assert!(wrapped.contains("let location = _____WB$wombat$assign$function_____(\"location\");"));
        assert!(wrapped.ends_with("window.foo = 1;\n\n}"));
        // Idempotent
        assert_eq!(wrap_script_text(&wrapped, None), wrapped);
    }

    #[test]
    fn test_wrap_skips_non_js() {
        assert_eq!(wrap_script_text(r#"{"window": 1}"#, Some("application/json")), r#"{"window": 1}"#);
        assert_eq!(wrap_script_text("var x = 1;", None), "var x = 1;");
        assert!(!is_js_type(Some("module")));
        assert!(is_js_type(Some(" Text/JavaScript ")));
    }

    #[test]
    fn test_fragment_context() {
        let rw = rewriter();
        let css = rewrite_fragment(&rw, "STYLE", None, "a{background:url(/x.png)}", None, &mut ());
        assert!(css.contains("mp_/https://tests.wombat.io/x.png"));
        let html = rewrite_fragment(&rw, "div", None, "<img src=\"/x.png\">", None, &mut ());
        assert_eq!(html, format!("<img src=\"{PREFIX}im_/https://tests.wombat.io/x.png\">"));
    }

    #[test]
    fn test_style_text_forwards_media() {
        let rw = rewriter();
        let mut sink: Vec<Preserve> = Vec::new();
        let css = "@media print { a { background: url(/p.png) } }";
        rewrite_style_text(&rw, css, None, &mut sink);
        assert_eq!(sink, vec![Preserve::Media(css.to_string())]);
    }
}
