//! `srcset` candidate lists
//!
//! Splits on the HTML image-candidate grammar (URL run, optional width or
//! density descriptor, comma separator) so that commas inside URLs and
//! descriptors such as `calc(...)` survive, then rewrites each URL on its own.

use crate::rewriter::Rewriter;
use crate::types::{Modifier, RewriteContext};

/// One image candidate. Both fields borrow from the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SrcsetCandidate<'a> {
    pub url: &'a str,
    /// Width/density token, verbatim. Empty when absent.
    pub descriptor: &'a str,
}

/// Split a srcset value into candidates.
pub fn split_srcset(value: &str) -> Vec<SrcsetCandidate<'_>> {
    let bytes = value.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        // Separators
        while i < bytes.len() && (bytes[i].is_ascii_whitespace() || bytes[i] == b',') {
            i += 1;
        }
        if i >= bytes.len() {
            break;
        }

        let url_start = i;
        while i < bytes.len() && !bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let mut url_end = i;
        let mut trailing_comma = false;
        while url_end > url_start && bytes[url_end - 1] == b',' {
            url_end -= 1;
            trailing_comma = true;
        }
        let url = &value[url_start..url_end];
        if trailing_comma {
            if !url.is_empty() {
                out.push(SrcsetCandidate { url, descriptor: "" });
            }
            continue;
        }

        while i < bytes.len() && bytes[i].is_ascii_whitespace() {
            i += 1;
        }
        let desc_start = i;
        let mut depth = 0usize;
        while i < bytes.len() {
            match bytes[i] {
                b'(' => depth += 1,
                b')' => depth = depth.saturating_sub(1),
                b',' if depth == 0 => break,
                _ => {}
            }
            i += 1;
        }
        let descriptor = value[desc_start..i].trim_end();
        out.push(SrcsetCandidate { url, descriptor });
    }

    out
}

fn join_candidates<I>(candidates: I) -> String
where
    I: IntoIterator<Item = (String, String)>,
{
    let mut out = String::new();
    for (idx, (url, descriptor)) in candidates.into_iter().enumerate() {
        if idx > 0 {
            out.push_str(", ");
        }
        out.push_str(&url);
        if !descriptor.is_empty() {
            out.push(' ');
            out.push_str(&descriptor);
        }
    }
    out
}

/// Rewrite every URL in a srcset value, keeping descriptors verbatim.
pub fn rewrite_srcset(rw: &Rewriter, value: &str, modifier: Modifier, document_base: Option<&str>) -> String {
    if value.is_empty() {
        return String::new();
    }
    let mut ctx = RewriteContext::new().with_modifier(modifier);
    ctx.document_base = document_base;
    join_candidates(
        split_srcset(value)
            .into_iter()
            .map(|c| (rw.rewrite(c.url, &ctx).into_owned(), c.descriptor.to_string())),
    )
}

/// Inverse of [`rewrite_srcset`], used by attribute getters.
pub fn extract_srcset(rw: &Rewriter, value: &str) -> String {
    join_candidates(
        split_srcset(value)
            .into_iter()
            .map(|c| (rw.extract_original(c.url), c.descriptor.to_string())),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{rewriter, PREFIX};

    #[test]
    fn test_split_with_descriptors() {
        let parts = split_srcset("a.jpg 1x, b.jpg 2x,c.jpg 300w");
        assert_eq!(
            parts,
            vec![
                SrcsetCandidate { url: "a.jpg", descriptor: "1x" },
                SrcsetCandidate { url: "b.jpg", descriptor: "2x" },
                SrcsetCandidate { url: "c.jpg", descriptor: "300w" },
            ]
        );
    }

    #[test]
    fn test_split_without_descriptors() {
        let parts = split_srcset("a.jpg, b.jpg");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0], SrcsetCandidate { url: "a.jpg", descriptor: "" });
    }

    #[test]
    fn test_split_keeps_commas_in_urls() {
        let parts = split_srcset("https://a.com/i,w_100.jpg 100w, https://a.com/i,w_200.jpg 200w");
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].url, "https://a.com/i,w_200.jpg");
        assert_eq!(parts[1].descriptor, "200w");
    }

    #[test]
    fn test_rewrite_preserves_count_and_descriptors() {
        let rw = rewriter();
        let input = "/a.jpg 1x, https://cdn.example.com/b.jpg 2.5x, //cdn.example.com/c.jpg 640w";
        let out = rewrite_srcset(&rw, input, Modifier::Image, None);
        let parts: Vec<&str> = out.split(',').collect();
        assert_eq!(parts.len(), 3);
        assert_eq!(parts[0].trim(), format!("{PREFIX}im_/https://tests.wombat.io/a.jpg 1x"));
        assert!(parts[1].trim().ends_with("/b.jpg 2.5x"));
        assert!(parts[2].trim().ends_with(" 640w"));
        for part in parts {
            assert!(part.contains("im_/"));
        }
    }

    #[test]
    fn test_extract_inverts_rewrite() {
        let rw = rewriter();
        let input = "https://a.com/x.jpg 1x, https://a.com/y.jpg 2x";
        let rewritten = rewrite_srcset(&rw, input, Modifier::Image, None);
        assert_eq!(extract_srcset(&rw, &rewritten), input);
    }
}
