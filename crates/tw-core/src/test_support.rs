//! Shared fixtures for unit tests.

use crate::config::ArchiveInfo;
use crate::rewriter::Rewriter;

/// Absolute prefix plus capture timestamp of [`sample_info`].
pub const PREFIX: &str = "http://localhost:8080/live/20180803160549";

pub fn sample_info() -> ArchiveInfo {
    ArchiveInfo {
        prefix: "http://localhost:8080/live/".into(),
        url: "https://tests.wombat.io/".into(),
        timestamp: "20180803160549".into(),
        wombat_sec: "1533312349".into(),
        modifier: "mp_".into(),
        static_prefix: "http://localhost:8080/static/".into(),
        ..Default::default()
    }
}

pub fn rewriter() -> Rewriter {
    Rewriter::new(sample_info()).expect("valid config")
}
