//! `document.cookie` setter rewriting
//!
//! A cookie string written by page code is split into individual cookies
//! (commas inside `Expires=` dates are not separators), then each cookie has
//! its `Domain=`, `Path=`, `Expires=` and `Secure` attributes adjusted for the
//! archive host and the replay timeline.

use std::sync::OnceLock;

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::{Captures, Regex};

use crate::clock::ReplayClock;
use crate::messaging::ControlMessage;
use crate::rewriter::Rewriter;
use crate::url::Scheme;

/// Expiry written when the original date cannot be parsed.
const EPOCH_EXPIRES: &str = "Thu, 01 Jan 1970 00:00:00 GMT";

const HTTP_DATE_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";

fn domain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s*;?\s*Domain=([^;]+)").expect("static regex"))
}

fn path_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"(?i)Path='?"?([^;'"\s]+)['"]?"#).expect("static regex"))
}

fn expires_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)Expires=\s*([^;]+)").expect("static regex"))
}

fn secure_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\s*;\s*Secure\b").expect("static regex"))
}

/// Result of one cookie assignment.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CookieWrite {
    /// Cookies to assign to the real `document.cookie`, one at a time.
    pub cookies: Vec<String>,
    /// `cookie` control messages for domain-scoped cookies.
    pub notices: Vec<ControlMessage>,
}

/// Split a `Set-Cookie`-style string holding several cookies.
pub fn split_cookies(value: &str) -> Vec<&str> {
    let bytes = value.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    let mut attr_start = 0;

    for (i, &b) in bytes.iter().enumerate() {
        match b {
            b';' => attr_start = i + 1,
            b',' if !inside_expires(&value[attr_start..i]) => {
                let part = value[start..i].trim();
                if !part.is_empty() {
                    out.push(part);
                }
                start = i + 1;
                attr_start = i + 1;
            }
            _ => {}
        }
    }
    let last = value[start..].trim();
    if !last.is_empty() {
        out.push(last);
    }
    out
}

/// `Expires=Wed` before the comma of an HTTP date.
fn inside_expires(attr: &str) -> bool {
    let attr = attr.trim_start();
    match attr.get(..8) {
        Some(name) if name.eq_ignore_ascii_case("expires=") => attr[8..].trim().bytes().all(|b| b.is_ascii_alphabetic()),
        _ => false,
    }
}

/// Parse a cookie date (IMF-fixdate, RFC 2822 or the legacy dashed form).
pub fn parse_cookie_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Ok(dt) = DateTime::parse_from_rfc2822(text) {
        return Some(dt.with_timezone(&Utc));
    }
    ["%a, %d %b %Y %H:%M:%S GMT", "%a, %d-%b-%Y %H:%M:%S GMT", "%A, %d-%b-%y %H:%M:%S GMT"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
        .map(|naive| naive.and_utc())
}

/// Rewrite a cookie assignment made by page code.
pub fn rewrite_cookie(rw: &Rewriter, clock: &ReplayClock, value: &str) -> CookieWrite {
    let paths = rw.paths();
    let mut write = CookieWrite::default();

    let stripped = value.replace(&paths.abs_prefix, "").replace(&paths.rel_prefix, "");
    let keep_domain = paths.archive_hostname.contains('.') && !rw.info().cookie_ignore_domain;
    let strip_secure = paths.archive_scheme != Scheme::Https;

    for cookie in split_cookies(&stripped) {
        let cookie = domain_regex().replace_all(cookie, |caps: &Captures<'_>| {
            write.notices.push(ControlMessage::Cookie {
                domain: caps[1].trim().to_string(),
                cookie: cookie.to_string(),
            });
            if keep_domain {
                format!("; Domain=.{}", paths.archive_hostname)
            } else {
                String::new()
            }
        });

        let cookie = path_regex().replace_all(&cookie, |caps: &Captures<'_>| {
            let rewritten = rw.rewrite_url(&caps[1]);
            let path = rewritten.strip_prefix(paths.archive_origin.as_str()).unwrap_or(&rewritten);
            format!("Path={path}")
        });

        let cookie = expires_regex().replace_all(&cookie, |caps: &Captures<'_>| match parse_cookie_date(&caps[1]) {
            Some(date) => {
                let shifted = DateTime::from_timestamp_millis(clock.to_wall(date.timestamp_millis()))
                    .unwrap_or(date);
                format!("Expires={}", shifted.format(HTTP_DATE_FORMAT))
            }
            None => {
                log::debug!("unparsable cookie expiry: {}", &caps[1]);
                format!("Expires={EPOCH_EXPIRES}")
            }
        });

        let cookie = if strip_secure {
            secure_regex().replace_all(&cookie, "").into_owned()
        } else {
            cookie.into_owned()
        };
        write.cookies.push(cookie);
    }

    write
}
