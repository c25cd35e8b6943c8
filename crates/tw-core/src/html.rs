//! HTML string rewriting
//!
//! Byte-level tokenizer over markup handed to `document.write`, `innerHTML`,
//! `outerHTML` and friends. Start tags have their attribute values spliced in
//! place (quoting and case of everything else is preserved), `<script>` and
//! `<style>` bodies go through the script and CSS rules, and comments,
//! doctypes and processing instructions are copied verbatim.

use std::borrow::Cow;

use crate::interceptors::{rewrite_attr, rewrite_style_text, wrap_script_text, ElementView, Preserve, PreserveSink};
use crate::rewriter::Rewriter;

/// Options for one HTML rewrite.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HtmlOptions<'a> {
    /// Base URI of the document the markup lands in.
    pub document_base: Option<&'a str>,
    /// Wrap inline classic scripts in the scope prelude.
    pub wrap_scripts: bool,
}

impl Default for HtmlOptions<'_> {
    fn default() -> Self {
        Self {
            document_base: None,
            wrap_scripts: true,
        }
    }
}

/// Markup ended inside a tag, comment, declaration or `<script>`/`<style>`
/// body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Incomplete;

/// Rewrite an HTML string. Trailing partial markup is copied unchanged.
pub fn rewrite_html(rw: &Rewriter, html: &str, opts: &HtmlOptions<'_>, sink: &mut dyn PreserveSink) -> String {
    match scan(rw, html, opts, sink, false) {
        Ok(out) => out,
        // Lenient scan never reports incomplete input
        Err(Incomplete) => html.to_string(),
    }
}

/// Rewrite only if the markup is structurally complete.
pub fn rewrite_html_complete(
    rw: &Rewriter,
    html: &str,
    opts: &HtmlOptions<'_>,
    sink: &mut dyn PreserveSink,
) -> Result<String, Incomplete> {
    let mut pending: Vec<Preserve> = Vec::new();
    let out = scan(rw, html, opts, &mut pending, true)?;
    for item in pending {
        sink.preserve(item);
    }
    Ok(out)
}

// =============================================================================
// document.write Buffering
// =============================================================================

/// Buffer state for `document.write`/`writeln`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum WriteState {
    #[default]
    Empty,
    /// Holds a prefix that ended mid-tag or inside a raw-text body.
    Buffering(String),
}

/// Joins `document.write` chunks that split a tag across calls.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    state: WriteState,
}

impl WriteBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &WriteState {
        &self.state
    }

    /// Feed one chunk. `Some` is the markup to write now; `None` means the
    /// chunk was buffered and nothing is written.
    pub fn write(
        &mut self,
        rw: &Rewriter,
        chunk: &str,
        opts: &HtmlOptions<'_>,
        sink: &mut dyn PreserveSink,
    ) -> Option<String> {
        let input: Cow<'_, str> = match std::mem::take(&mut self.state) {
            WriteState::Empty => Cow::Borrowed(chunk),
            WriteState::Buffering(mut prefix) => {
                prefix.push_str(chunk);
                Cow::Owned(prefix)
            }
        };
        match rewrite_html_complete(rw, &input, opts, sink) {
            Ok(out) => Some(out),
            Err(Incomplete) => {
                log::trace!("document.write buffering {} bytes", input.len());
                self.state = WriteState::Buffering(input.into_owned());
                None
            }
        }
    }

    /// `document.close`: emit whatever is still buffered.
    pub fn close(&mut self, rw: &Rewriter, opts: &HtmlOptions<'_>, sink: &mut dyn PreserveSink) -> Option<String> {
        match std::mem::take(&mut self.state) {
            WriteState::Empty => None,
            WriteState::Buffering(rest) => Some(rewrite_html(rw, &rest, opts, sink)),
        }
    }
}

// =============================================================================
// Scanner
// =============================================================================

fn scan(
    rw: &Rewriter,
    html: &str,
    opts: &HtmlOptions<'_>,
    sink: &mut dyn PreserveSink,
    strict: bool,
) -> Result<String, Incomplete> {
    let bytes = html.as_bytes();
    let mut out = String::with_capacity(html.len() + html.len() / 4);
    let mut base: Option<String> = opts.document_base.map(str::to_string);
    let mut idx = 0;

    while idx < bytes.len() {
        if bytes[idx] != b'<' {
            let next = find_byte(bytes, idx, b'<').unwrap_or(bytes.len());
            out.push_str(&html[idx..next]);
            idx = next;
            continue;
        }

        let declaration_end = if starts_with(bytes, idx, b"<!--") {
            Some(find_subslice(bytes, idx + 4, b"-->").map(|end| end + 3))
        } else if starts_with(bytes, idx, b"<!") || starts_with(bytes, idx, b"<?") {
            Some(find_byte(bytes, idx + 2, b'>').map(|end| end + 1))
        } else {
            None
        };
        if let Some(end) = declaration_end {
            match end {
                Some(end) => {
                    out.push_str(&html[idx..end]);
                    idx = end;
                }
                None if strict => return Err(Incomplete),
                None => {
                    out.push_str(&html[idx..]);
                    idx = bytes.len();
                }
            }
            continue;
        }

        if !looks_like_tag(bytes, idx) {
            if strict && idx + 1 == bytes.len() {
                return Err(Incomplete);
            }
            out.push('<');
            idx += 1;
            continue;
        }

        let Some(tag) = parse_tag(bytes, idx) else {
            if strict {
                return Err(Incomplete);
            }
            out.push_str(&html[idx..]);
            break;
        };

        if tag.is_end {
            out.push_str(&html[idx..tag.end]);
            idx = tag.end;
            continue;
        }

        let new_base = emit_start_tag(rw, html, idx, &tag, base.as_deref(), sink, &mut out);
        if new_base.is_some() {
            base = new_base;
        }
        idx = tag.end;

        if tag.self_closing || !matches!(tag.name.as_str(), "script" | "style") {
            continue;
        }

        let (body_end, after) = match find_end_tag(bytes, idx, &tag.name) {
            Some(found) => found,
            None if strict => return Err(Incomplete),
            None => (bytes.len(), bytes.len()),
        };
        let body = &html[idx..body_end];
        if tag.name == "style" {
            out.push_str(&rewrite_style_text(rw, body, base.as_deref(), sink));
        } else if opts.wrap_scripts && tag.attr_value(html, "src").is_none() {
            out.push_str(&wrap_script_text(body, tag.attr_value(html, "type")));
        } else {
            out.push_str(body);
        }
        out.push_str(&html[body_end..after]);
        idx = after;
    }

    Ok(out)
}

/// Copy a start tag into `out` with rewritten attribute values. Returns the
/// new document base when the tag is `<base href>`.
fn emit_start_tag(
    rw: &Rewriter,
    html: &str,
    start: usize,
    tag: &ParsedTag,
    base: Option<&str>,
    sink: &mut dyn PreserveSink,
    out: &mut String,
) -> Option<String> {
    let view = TagView { html, tag, base };
    let mut cursor = start;
    let mut new_base = None;

    for attr in &tag.attrs {
        let Some(span) = attr.value else { continue };
        let value = &html[span.start..span.end];
        let rewritten = rewrite_attr(rw, &view, &attr.name, value, sink);

        if tag.name == "base" && attr.name == "href" {
            new_base = Some(rw.extract_original(&rewritten));
        }
        if rewritten == value {
            continue;
        }

        out.push_str(&html[cursor..span.start]);
        let needs_quotes = span.quote.is_none()
            && rewritten.bytes().any(|b| b.is_ascii_whitespace() || matches!(b, b'"' | b'\'' | b'>' | b'='));
        if needs_quotes {
            out.push('"');
            out.push_str(&rewritten.replace('"', "&quot;"));
            out.push('"');
        } else {
            out.push_str(&rewritten);
        }
        cursor = span.end;
    }

    out.push_str(&html[cursor..tag.end]);
    new_base
}

struct TagView<'a> {
    html: &'a str,
    tag: &'a ParsedTag,
    base: Option<&'a str>,
}

impl ElementView for TagView<'_> {
    fn tag_name(&self) -> Cow<'_, str> {
        Cow::Borrowed(&self.tag.name)
    }

    fn attr(&self, name: &str) -> Option<Cow<'_, str>> {
        self.tag.attr_value(self.html, name).map(Cow::Borrowed)
    }

    fn document_base(&self) -> Option<Cow<'_, str>> {
        self.base.map(Cow::Borrowed)
    }
}

// =============================================================================
// Tag Parsing
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Span {
    start: usize,
    end: usize,
    quote: Option<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Attr {
    name: String,
    value: Option<Span>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ParsedTag {
    name: String,
    is_end: bool,
    self_closing: bool,
    attrs: Vec<Attr>,
    /// Index just past `>`
    end: usize,
}

impl ParsedTag {
    fn attr_value<'h>(&self, html: &'h str, name: &str) -> Option<&'h str> {
        self.attrs
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .map(|a| a.value.map_or("", |span| &html[span.start..span.end]))
    }
}

/// `<` starts markup rather than text.
fn looks_like_tag(bytes: &[u8], idx: usize) -> bool {
    match bytes.get(idx + 1).copied() {
        Some(b'/') => bytes.get(idx + 2).map_or(true, |b| b.is_ascii_alphabetic()),
        Some(b) => b.is_ascii_alphabetic(),
        None => false,
    }
}

/// Parse a start or end tag at `start`. `None` when the input ends first.
fn parse_tag(bytes: &[u8], start: usize) -> Option<ParsedTag> {
    let mut idx = start + 1;
    let mut is_end = false;
    if bytes.get(idx).copied() == Some(b'/') {
        is_end = true;
        idx += 1;
    }

    let name_start = idx;
    while idx < bytes.len() && is_tag_name_char(bytes[idx]) {
        idx += 1;
    }
    if idx == name_start {
        return None;
    }
    let name = String::from_utf8_lossy(&bytes[name_start..idx]).to_ascii_lowercase();
    let mut attrs = Vec::new();

    loop {
        idx = skip_spaces(bytes, idx);
        let byte = *bytes.get(idx)?;

        if byte == b'>' {
            let mut lookback = idx;
            while lookback > start && bytes[lookback - 1].is_ascii_whitespace() {
                lookback -= 1;
            }
            let self_closing = bytes[lookback - 1] == b'/';
            return Some(ParsedTag {
                name,
                is_end,
                self_closing,
                attrs,
                end: idx + 1,
            });
        }
        if byte == b'/' {
            idx += 1;
            continue;
        }

        let attr_start = idx;
        while idx < bytes.len() {
            let b = bytes[idx];
            if b.is_ascii_whitespace() || b == b'=' || b == b'>' || (b == b'/' && bytes.get(idx + 1) == Some(&b'>')) {
                break;
            }
            idx += 1;
        }
        if idx == attr_start {
            // Stray '='
            idx += 1;
            continue;
        }
        let attr_name = String::from_utf8_lossy(&bytes[attr_start..idx]).to_ascii_lowercase();

        let after_name = skip_spaces(bytes, idx);
        if bytes.get(after_name).copied() != Some(b'=') {
            attrs.push(Attr { name: attr_name, value: None });
            continue;
        }

        idx = skip_spaces(bytes, after_name + 1);
        let first = *bytes.get(idx)?;
        let span = if first == b'"' || first == b'\'' {
            let close = find_byte(bytes, idx + 1, first)?;
            let span = Span { start: idx + 1, end: close, quote: Some(first) };
            idx = close + 1;
            span
        } else {
            let value_start = idx;
            while idx < bytes.len() && !bytes[idx].is_ascii_whitespace() && bytes[idx] != b'>' {
                idx += 1;
            }
            Span { start: value_start, end: idx, quote: None }
        };
        attrs.push(Attr { name: attr_name, value: Some(span) });
    }
}

/// Locate `</name ...>` from `from`. Returns (start of end tag, index after it).
fn find_end_tag(bytes: &[u8], from: usize, name: &str) -> Option<(usize, usize)> {
    let name = name.as_bytes();
    let mut idx = from;
    while let Some(lt) = find_byte(bytes, idx, b'<') {
        if bytes.get(lt + 1) == Some(&b'/')
            && starts_with_ignore_ascii_case(bytes, lt + 2, name)
            && tag_name_boundary(bytes, lt + 2 + name.len())
        {
            if let Some(tag) = parse_tag(bytes, lt) {
                return Some((lt, tag.end));
            }
        }
        idx = lt + 1;
    }
    None
}

#[inline]
fn tag_name_boundary(bytes: &[u8], idx: usize) -> bool {
    match bytes.get(idx).copied() {
        None => true,
        Some(byte) => byte.is_ascii_whitespace() || byte == b'>' || byte == b'/',
    }
}

#[inline]
fn skip_spaces(bytes: &[u8], mut idx: usize) -> usize {
    while idx < bytes.len() && bytes[idx].is_ascii_whitespace() {
        idx += 1;
    }
    idx
}

#[inline]
fn is_tag_name_char(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'_' | b':')
}

#[inline]
fn starts_with(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    bytes.get(idx..idx + pattern.len()) == Some(pattern)
}

fn starts_with_ignore_ascii_case(bytes: &[u8], idx: usize, pattern: &[u8]) -> bool {
    bytes
        .get(idx..idx + pattern.len())
        .map_or(false, |window| window.eq_ignore_ascii_case(pattern))
}

fn find_subslice(bytes: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    bytes
        .get(from..)?
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|offset| from + offset)
}

fn find_byte(bytes: &[u8], from: usize, byte: u8) -> Option<usize> {
    bytes
        .get(from..)?
        .iter()
        .position(|candidate| *candidate == byte)
        .map(|offset| from + offset)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{rewriter, PREFIX};

    fn rewrite(html: &str) -> String {
        rewrite_html(&rewriter(), html, &HtmlOptions::default(), &mut ())
    }

    #[test]
    fn test_attribute_quoting_preserved() {
        let out = rewrite(r#"<a href='/x' class=nav>go</a><IMG SRC=/i.png alt="hi">"#);
        assert_eq!(
            out,
            format!(r#"<a href='{PREFIX}mp_/https://tests.wombat.io/x' class=nav>go</a><IMG SRC={PREFIX}im_/https://tests.wombat.io/i.png alt="hi">"#)
        );
    }

    #[test]
    fn test_modifier_fidelity_through_markup() {
        let cases = [
            ("<img src=\"/x\">", "im_"),
            ("<iframe src=\"/x\"></iframe>", "if_"),
            ("<frame src=\"/x\">", "fr_"),
            ("<script src=\"/x\"></script>", "js_"),
            ("<link rel=\"stylesheet\" href=\"/x\">", "cs_"),
            ("<video poster=\"/x\"></video>", "im_"),
            ("<object data=\"/x\"></object>", "oe_"),
            ("<form action=\"/x\"></form>", "mp_"),
        ];
        for (html, code) in cases {
            let out = rewrite(html);
            assert!(out.contains(&format!("{PREFIX}{code}/https://tests.wombat.io/x")), "{html} -> {out}");
        }
    }

    #[test]
    fn test_doctype_and_comments_verbatim() {
        let html = "<!DOCTYPE html><!-- <img src=\"/x\"> --><p>text < more</p>";
        assert_eq!(rewrite(html), html);
    }

    #[test]
    fn test_inline_script_wrapped() {
        let out = rewrite("<script>location.href = '/a';</script><p>");
        assert!(out.starts_with("<script>var _____WB$wombat$assign$function_____"));
        assert!(out.ends_with("location.href = '/a';\n\n}</script><p>"));
    }

    #[test]
    fn test_json_script_untouched() {
        let html = r#"<script type="application/json">{"window": "/x"}</script>"#;
        assert_eq!(rewrite(html), html);
    }

    #[test]
    fn test_style_block_rewritten() {
        let out = rewrite("<style>body{background:url(/bg.png)}</style>");
        assert_eq!(out, format!("<style>body{{background:url({PREFIX}mp_/https://tests.wombat.io/bg.png)}}</style>"));
    }

    #[test]
    fn test_base_href_changes_resolution() {
        let out = rewrite(r#"<base href="https://other.example/dir/"><img src="./a.png">"#);
        assert!(out.contains(&format!(r#"<img src="{PREFIX}im_/https://other.example/dir/a.png">"#)));
    }

    #[test]
    fn test_preservation_from_markup() {
        let mut sink: Vec<Preserve> = Vec::new();
        rewrite_html(&rewriter(), r#"<img data-src="/lazy.png">"#, &HtmlOptions::default(), &mut sink);
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_incomplete_detection() {
        let rw = rewriter();
        let opts = HtmlOptions::default();
        assert_eq!(rewrite_html_complete(&rw, "<div", &opts, &mut ()), Err(Incomplete));
        assert_eq!(rewrite_html_complete(&rw, "<img src=\"/x", &opts, &mut ()), Err(Incomplete));
        assert_eq!(rewrite_html_complete(&rw, "<!-- open", &opts, &mut ()), Err(Incomplete));
        assert!(rewrite_html_complete(&rw, "plain text", &opts, &mut ()).is_ok());
        assert!(rewrite_html_complete(&rw, "a < b", &opts, &mut ()).is_ok());
    }

    #[test]
    fn test_write_buffer_joins_split_tag() {
        let rw = rewriter();
        let opts = HtmlOptions::default();
        let mut buf = WriteBuffer::new();

        assert_eq!(buf.write(&rw, "<img", &opts, &mut ()), None);
        assert_eq!(buf.state(), &WriteState::Buffering("<img".into()));

        let out = buf.write(&rw, " src=\"/x.png\">", &opts, &mut ()).expect("complete");
        assert_eq!(out, format!("<img src=\"{PREFIX}im_/https://tests.wombat.io/x.png\">"));
        assert_eq!(buf.state(), &WriteState::Empty);
    }

    #[test]
    fn test_write_buffer_joins_split_script() {
        let rw = rewriter();
        let opts = HtmlOptions::default();
        let mut buf = WriteBuffer::new();

        assert_eq!(buf.write(&rw, "<script>if (window.a) {", &opts, &mut ()), None);
        assert_eq!(buf.write(&rw, "a(); }", &opts, &mut ()), None);

        let out = buf.write(&rw, "</script><p>", &opts, &mut ()).expect("complete");
        let expected = format!(
            "<script>{}</script><p>",
            wrap_script_text("if (window.a) {a(); }", None)
        );
        assert_eq!(out, expected);
        assert_eq!(buf.state(), &WriteState::Empty);
    }

    #[test]
    fn test_write_buffer_joins_split_style() {
        let rw = rewriter();
        let opts = HtmlOptions::default();
        let mut buf = WriteBuffer::new();

        assert_eq!(buf.write(&rw, "<style>body { background: url(/bg", &opts, &mut ()), None);
        let out = buf.write(&rw, ".png) }</style>", &opts, &mut ()).expect("complete");
        assert!(out.contains(&format!("url({PREFIX}mp_/https://tests.wombat.io/bg.png)")), "{out}");
    }

    #[test]
    fn test_unterminated_script_is_incomplete() {
        let rw = rewriter();
        let opts = HtmlOptions::default();
        assert_eq!(rewrite_html_complete(&rw, "<script>var a = 1;", &opts, &mut ()), Err(Incomplete));
        // Lenient mode still rewrites to the end
        assert!(rewrite_html(&rw, "<script>var a = window;", &opts, &mut ()).contains("local_init"));
    }

    #[test]
    fn test_write_buffer_close_flushes() {
        let rw = rewriter();
        let opts = HtmlOptions::default();
        let mut buf = WriteBuffer::new();
        assert_eq!(buf.write(&rw, "<p class='x'", &opts, &mut ()), None);
        assert_eq!(buf.close(&rw, &opts, &mut ()), Some("<p class='x'".into()));
        assert_eq!(buf.close(&rw, &opts, &mut ()), None);
    }

    #[test]
    fn test_preservation_deferred_until_complete() {
        let rw = rewriter();
        let opts = HtmlOptions::default();
        let mut sink: Vec<Preserve> = Vec::new();
        let mut buf = WriteBuffer::new();
        assert_eq!(buf.write(&rw, "<img data-src=\"/a.png\"><img", &opts, &mut sink), None);
        assert!(sink.is_empty());
        assert!(buf.write(&rw, ">", &opts, &mut sink).is_some());
        assert_eq!(sink.len(), 1);
    }
}
