//! Archive info (`wb_info`) and the paths derived from it
//!
//! The hosting page supplies one configuration object at injection time. It
//! is passed by value into every realm the engine initializes and only
//! re-derived when a window navigates to a new path.

use serde::{Deserialize, Serialize};

use crate::types::Modifier;
use crate::url::{extract_host, extract_host_with_port, extract_origin, extract_scheme, Scheme};

/// Error type for configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Archive prefix must be an absolute http(s) URL: {0}")]
    InvalidPrefix(String),
    #[error("Original URL is not absolute: {0}")]
    InvalidOriginalUrl(String),
    #[error("Invalid capture timestamp: {0}")]
    InvalidTimestamp(String),
    #[error("Malformed configuration: {0}")]
    Malformed(String),
}

/// Engine construction input, deserialized from the host page's `wb_info`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveInfo {
    /// Absolute archive prefix, e.g. `http://localhost:8080/live/`
    pub prefix: String,
    /// Original URL of the replayed page
    pub url: String,
    /// Capture timestamp (`YYYYMMDDhhmmss`), empty when live
    pub timestamp: String,
    /// Timestamp the page was requested at
    pub request_ts: String,
    /// Timestamp embedded in rewritten URLs (defaults to `timestamp`)
    pub wombat_ts: String,
    /// Capture time in seconds since the epoch, also the PRNG seed
    pub wombat_sec: String,
    /// Original scheme (`http`/`https`), overrides the scheme of `url`
    pub wombat_scheme: String,
    /// Original host, overrides the host of `url`
    pub wombat_host: String,
    /// Default modifier code
    #[serde(rename = "mod")]
    pub modifier: String,
    pub coll: String,
    /// Prefix the archive serves its own static assets from
    pub static_prefix: String,
    pub is_live: bool,
    /// Replay runs inside an archive UI frame
    pub is_framed: bool,
    /// Non-empty selects proxy mode (scheme swap only)
    pub proxy_magic: String,
    pub enable_auto_fetch: bool,
    pub auto_fetch_worker_url: String,
    pub no_rewrite_prefixes: Vec<String>,
    pub skip_dom: bool,
    pub skip_postmessage: bool,
    pub embedded: bool,
    pub cookie_ignore_domain: bool,
    pub debug: bool,
}

impl ArchiveInfo {
    /// Parse from the JSON form the hosting page embeds.
    pub fn from_json(text: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(text).map_err(|e| ConfigError::Malformed(e.to_string()))
    }

    pub fn is_proxy(&self) -> bool {
        !self.proxy_magic.is_empty()
    }

    /// No timestamp segment is emitted in rewritten URLs.
    pub fn is_live_replay(&self) -> bool {
        self.is_live || self.url_timestamp().is_empty()
    }

    /// Timestamp written into rewritten URLs.
    pub fn url_timestamp(&self) -> &str {
        if self.wombat_ts.is_empty() {
            &self.timestamp
        } else {
            &self.wombat_ts
        }
    }

    /// Default modifier; unknown codes fall back to navigation.
    pub fn default_modifier(&self) -> Modifier {
        Modifier::try_from(self.modifier.as_str()).unwrap_or_else(|_| {
            log::debug!("unknown default modifier {:?}, using mp_", self.modifier);
            Modifier::Navigation
        })
    }

    /// Capture time in milliseconds since the epoch.
    pub fn capture_millis(&self) -> Result<i64, ConfigError> {
        if let Ok(secs) = self.wombat_sec.trim().parse::<i64>() {
            return Ok(secs * 1000);
        }
        let ts = if self.timestamp.is_empty() { &self.request_ts } else { &self.timestamp };
        crate::clock::parse_timestamp(ts)
    }
}

// =============================================================================
// Derived Paths
// =============================================================================

/// Everything the rewriter needs that is computed once from [`ArchiveInfo`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayPaths {
    /// `http://localhost:8080/live/`
    pub abs_prefix: String,
    /// `/live/`
    pub rel_prefix: String,
    /// `http://localhost:8080`
    pub archive_origin: String,
    /// `localhost:8080`
    pub archive_host: String,
    /// `localhost`
    pub archive_hostname: String,
    pub archive_scheme: Scheme,
    /// `https://tests.wombat.io`
    pub orig_origin: String,
    /// `tests.wombat.io`
    pub orig_host: String,
    pub orig_scheme: Scheme,
    /// Path part of the static prefix, e.g. `/static/`
    pub static_prefix: String,
}

impl ReplayPaths {
    pub fn from_info(info: &ArchiveInfo) -> Result<Self, ConfigError> {
        let orig_url = info.url.as_str();
        let url_scheme = extract_scheme(orig_url);
        let orig_scheme = match info.wombat_scheme.as_str() {
            "https" => Scheme::Https,
            "http" => Scheme::Http,
            _ => url_scheme.ok_or_else(|| ConfigError::InvalidOriginalUrl(info.url.clone()))?,
        };
        let orig_host = if info.wombat_host.is_empty() {
            extract_host_with_port(orig_url)
                .filter(|h| !h.is_empty())
                .ok_or_else(|| ConfigError::InvalidOriginalUrl(info.url.clone()))?
                .to_string()
        } else {
            info.wombat_host.clone()
        };
        let orig_origin = format!("{}{}", orig_scheme.prefix(), orig_host);

        if info.is_proxy() {
            return Ok(Self {
                abs_prefix: String::new(),
                rel_prefix: String::new(),
                archive_origin: orig_origin.clone(),
                archive_host: orig_host.clone(),
                archive_hostname: orig_host.split(':').next().unwrap_or_default().to_string(),
                archive_scheme: orig_scheme,
                orig_origin,
                orig_host,
                orig_scheme,
                static_prefix: info.static_prefix.clone(),
            });
        }

        let prefix = info.prefix.as_str();
        let archive_scheme = match extract_scheme(prefix) {
            Some(scheme @ (Scheme::Http | Scheme::Https)) => scheme,
            _ => return Err(ConfigError::InvalidPrefix(info.prefix.clone())),
        };
        let archive_origin = extract_origin(prefix)
            .ok_or_else(|| ConfigError::InvalidPrefix(info.prefix.clone()))?
            .to_string();
        let archive_host = extract_host_with_port(prefix).unwrap_or_default().to_string();
        let archive_hostname = extract_host(prefix).unwrap_or_default().to_string();

        let mut abs_prefix = prefix.to_string();
        if !abs_prefix.ends_with('/') {
            abs_prefix.push('/');
        }
        let rel_prefix = abs_prefix[archive_origin.len()..].to_string();

        let static_prefix = match extract_origin(&info.static_prefix) {
            Some(origin) => info.static_prefix[origin.len()..].to_string(),
            None => info.static_prefix.clone(),
        };

        Ok(Self {
            abs_prefix,
            rel_prefix,
            archive_origin,
            archive_host,
            archive_hostname,
            archive_scheme,
            orig_origin,
            orig_host,
            orig_scheme,
            static_prefix,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_info() -> ArchiveInfo {
        ArchiveInfo {
            prefix: "http://localhost:8080/live/".into(),
            url: "https://tests.wombat.io/".into(),
            timestamp: "20180803160549".into(),
            modifier: "mp_".into(),
            static_prefix: "http://localhost:8080/static/".into(),
            ..Default::default()
        }
    }

    #[test]
    fn test_paths_from_info() {
        let paths = ReplayPaths::from_info(&sample_info()).expect("valid config");
        assert_eq!(paths.abs_prefix, "http://localhost:8080/live/");
        assert_eq!(paths.rel_prefix, "/live/");
        assert_eq!(paths.archive_origin, "http://localhost:8080");
        assert_eq!(paths.archive_host, "localhost:8080");
        assert_eq!(paths.archive_hostname, "localhost");
        assert_eq!(paths.orig_origin, "https://tests.wombat.io");
        assert_eq!(paths.orig_scheme, Scheme::Https);
        assert_eq!(paths.static_prefix, "/static/");
    }

    #[test]
    fn test_relative_prefix_is_rejected() {
        let info = ArchiveInfo { prefix: "/live/".into(), ..sample_info() };
        assert_eq!(
            ReplayPaths::from_info(&info),
            Err(ConfigError::InvalidPrefix("/live/".into()))
        );
    }

    #[test]
    fn test_scheme_and_host_overrides() {
        let info = ArchiveInfo {
            wombat_scheme: "http".into(),
            wombat_host: "other.example:81".into(),
            ..sample_info()
        };
        let paths = ReplayPaths::from_info(&info).expect("valid config");
        assert_eq!(paths.orig_origin, "http://other.example:81");
    }

    #[test]
    fn test_from_json_uses_defaults() {
        let info = ArchiveInfo::from_json(
            r#"{"prefix":"http://localhost:8080/live/","url":"https://a.example/","mod":"if_","timestamp":"2018"}"#,
        )
        .expect("parses");
        assert_eq!(info.default_modifier(), Modifier::Iframe);
        assert!(!info.enable_auto_fetch);
        assert!(!info.is_live_replay());
    }

    #[test]
    fn test_capture_millis_prefers_seconds() {
        let info = ArchiveInfo { wombat_sec: "1533312349".into(), ..sample_info() };
        assert_eq!(info.capture_millis(), Ok(1_533_312_349_000));
    }
}
