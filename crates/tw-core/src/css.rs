//! CSS rewriting
//!
//! Two passes over style text: `url(...)` references and `@import` targets,
//! both routed through the rewriter, followed by removal of the internal
//! marker token.

use std::borrow::Cow;
use std::sync::OnceLock;

use regex::{Captures, Regex};

use crate::rewriter::{Rewriter, INTERNAL_MARKER};
use crate::types::RewriteContext;

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(url\s*\(\s*[\\"']*)([^)'"]+)([\\"']*\s*\))"#).expect("static regex")
    })
}

fn import_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"(?i)(@import\s*[\\"']*)([^)'";]+)([\\"']*\s*;?)"#).expect("static regex")
    })
}

/// Rewrite all URL references in a stylesheet or inline style value.
///
/// Relative references resolve against `base` (the stylesheet or document
/// URL) when given.
pub fn rewrite_css<'a>(rw: &Rewriter, css: &'a str, base: Option<&str>) -> Cow<'a, str> {
    if css.is_empty() {
        return Cow::Borrowed(css);
    }
    let mut ctx = RewriteContext::new();
    ctx.base_override = base;

    let replace = |caps: &Captures<'_>| {
        let target = caps[2].trim();
        format!("{}{}{}", &caps[1], rw.rewrite(target, &ctx), &caps[3])
    };

    let pass = url_regex().replace_all(css, &replace);
    let pass = match import_regex().replace_all(&pass, &replace) {
        Cow::Borrowed(_) => pass,
        Cow::Owned(s) => Cow::Owned(s),
    };

    if pass.contains(INTERNAL_MARKER) {
        Cow::Owned(pass.replace(INTERNAL_MARKER, ""))
    } else {
        pass
    }
}

/// Every `url(...)` target in `css`, raw (as written).
pub fn extract_css_urls(css: &str) -> Vec<&str> {
    url_regex()
        .captures_iter(css)
        .filter_map(|c| c.get(2))
        .map(|m| m.as_str().trim())
        .filter(|u| !u.is_empty())
        .collect()
}

/// Text of every `@media` block, in document order.
///
/// These are handed to auto-fetch: their backgrounds only load when the media
/// query matches, so the page itself may never request them.
pub fn extract_media_blocks(css: &str) -> Vec<&str> {
    let bytes = css.as_bytes();
    let lower = css.to_ascii_lowercase();
    let mut out = Vec::new();
    let mut search = 0;

    while let Some(rel) = lower[search..].find("@media") {
        let start = search + rel;
        let open = match css[start..].find('{') {
            Some(pos) => start + pos,
            None => break,
        };
        let mut depth = 0usize;
        let mut end = None;
        for (i, &b) in bytes[open..].iter().enumerate() {
            match b {
                b'{' => depth += 1,
                b'}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = Some(open + i + 1);
                        break;
                    }
                }
                _ => {}
            }
        }
        match end {
            Some(end) => {
                out.push(&css[start..end]);
                search = end;
            }
            // Unterminated block: take the rest
            None => {
                out.push(&css[start..]);
                break;
            }
        }
    }

    out
}
