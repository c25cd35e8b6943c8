//! Candidate URL fix-up
//!
//! Candidates arrive in whatever form the page used. Each is turned into an
//! absolute archive URL, trying in order: already archived, relative or
//! scheme-relative archive path, resolution against the tag's own `src`,
//! resolution against the document base, and finally the raw value appended
//! to the archive prefix.

use ::url::Url;

use crate::protocol::WorkerInit;

/// Turns candidate values into fetchable archive URLs.
#[derive(Debug, Clone)]
pub struct Resolver {
    /// `http://localhost:8080/live/20180803160549`
    prefix: String,
    /// `http://localhost:8080`
    origin: String,
    /// `http:`
    scheme: String,
    /// `/live/20180803160549`
    rel_prefix: String,
    default_mod: String,
}

impl Resolver {
    pub fn new(init: &WorkerInit) -> Self {
        let (origin, scheme, rel_prefix) = match Url::parse(&init.prefix) {
            Ok(url) => (
                url.origin().ascii_serialization(),
                format!("{}:", url.scheme()),
                url.path().to_string(),
            ),
            Err(e) => {
                log::warn!("auto-fetch prefix {:?} is not absolute: {}", init.prefix, e);
                (String::new(), String::from("https:"), init.prefix.clone())
            }
        };
        Self {
            prefix: init.prefix.clone(),
            origin,
            scheme,
            rel_prefix,
            default_mod: init.modifier.clone(),
        }
    }

    pub fn default_mod(&self) -> &str {
        &self.default_mod
    }

    /// `{prefix}{mod}/{url}`.
    fn archive_url(&self, modifier: &str, url: &str) -> String {
        let mut out = String::with_capacity(self.prefix.len() + modifier.len() + 1 + url.len());
        out.push_str(&self.prefix);
        out.push_str(modifier);
        if !out.ends_with('/') {
            out.push('/');
        }
        out.push_str(url);
        out
    }

    /// Fix up one candidate. `None` for values that are never fetched.
    pub fn resolve(&self, url: &str, modifier: &str, tag_src: Option<&str>, doc_base: Option<&str>) -> Option<String> {
        let url = url.trim();
        if url.is_empty() || url.starts_with("data:") {
            return None;
        }
        let modifier = if modifier.is_empty() { self.default_mod.as_str() } else { modifier };

        // Already archived
        if url.starts_with(&self.prefix) {
            return Some(url.to_string());
        }

        // Archive path without origin or scheme
        if !self.rel_prefix.is_empty() && self.rel_prefix != "/" && url.starts_with(&self.rel_prefix) {
            return Some(format!("{}{}", self.origin, url));
        }
        if let Some(rest) = url.strip_prefix("//") {
            let host_path = self.origin.split_once("//").map_or("", |(_, host)| host);
            if !host_path.is_empty() && rest.starts_with(host_path) {
                return Some(format!("{}{}", self.scheme, url));
            }
        }

        if url.starts_with("http://") || url.starts_with("https://") {
            return Some(self.archive_url(modifier, url));
        }

        for base in [tag_src, doc_base].into_iter().flatten() {
            if let Some(resolved) = Url::parse(base).ok().and_then(|b| b.join(url).ok()) {
                return Some(self.archive_url(modifier, resolved.as_str()));
            }
        }

        Some(self.archive_url(modifier, url))
    }
}
