//! Deterministic time and randomness
//!
//! Scripts that branch on "now" or on random numbers must replay the same way
//! on every viewing. The replay clock runs at wall-clock speed but starts at
//! the capture time; the generator is seeded from capture metadata.

use chrono::NaiveDate;
use web_time::{SystemTime, UNIX_EPOCH};

use crate::config::ConfigError;

// =============================================================================
// Timestamps
// =============================================================================

const TIMESTAMP_PAD: &str = "00000101000000";

/// Parse a `YYYY[MM[DD[hh[mm[ss]]]]]` capture timestamp into epoch millis.
///
/// Missing trailing fields default to the start of the period.
pub fn parse_timestamp(ts: &str) -> Result<i64, ConfigError> {
    let ts = ts.trim();
    if ts.len() < 4 || ts.len() > TIMESTAMP_PAD.len() || !ts.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConfigError::InvalidTimestamp(ts.to_string()));
    }
    let full = format!("{}{}", ts, &TIMESTAMP_PAD[ts.len()..]);
    let field = |range: std::ops::Range<usize>| full[range].parse::<u32>().unwrap_or(0);

    let year = field(0..4) as i32;
    NaiveDate::from_ymd_opt(year, field(4..6).max(1), field(6..8).max(1))
        .and_then(|date| date.and_hms_opt(field(8..10), field(10..12), field(12..14)))
        .map(|dt| dt.and_utc().timestamp_millis())
        .ok_or_else(|| ConfigError::InvalidTimestamp(ts.to_string()))
}

/// Current wall-clock time in epoch millis.
pub fn wall_clock_millis() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or_default()
}

// =============================================================================
// Replay Clock
// =============================================================================

/// `Date.now()` replacement: capture time plus elapsed wall time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplayClock {
    capture_ms: i64,
    init_wall_ms: i64,
}

impl ReplayClock {
    pub fn new(capture_ms: i64, init_wall_ms: i64) -> Self {
        Self { capture_ms, init_wall_ms }
    }

    /// Clock anchored at the current wall time.
    pub fn start(capture_ms: i64) -> Self {
        Self::new(capture_ms, wall_clock_millis())
    }

    pub fn capture_millis(&self) -> i64 {
        self.capture_ms
    }

    /// Wall time minus replay time. Fixed for the lifetime of the realm.
    #[inline]
    pub fn time_diff(&self) -> i64 {
        self.init_wall_ms - self.capture_ms
    }

    /// Replay time corresponding to a wall-clock reading.
    #[inline]
    pub fn now_at(&self, wall_ms: i64) -> i64 {
        wall_ms - self.time_diff()
    }

    pub fn now(&self) -> i64 {
        self.now_at(wall_clock_millis())
    }

    /// Convert a replay-timeline instant to the real clock (cookie expiry).
    #[inline]
    pub fn to_wall(&self, replay_ms: i64) -> i64 {
        replay_ms + self.time_diff()
    }

    /// `new Date(...)`: only the zero-argument form is redirected.
    pub fn construct(&self, argc: usize, wall_ms: i64) -> Option<i64> {
        (argc == 0).then(|| self.now_at(wall_ms))
    }
}

// =============================================================================
// Seeded Random
// =============================================================================

const LCG_MULTIPLIER: u64 = 6_364_136_223_846_793_005;
const LCG_INCREMENT: u64 = 1_442_695_040_888_963_407;

/// Linear-congruential generator backing `Math.random` and
/// `crypto.getRandomValues`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeededRandom {
    state: u64,
}

impl SeededRandom {
    pub fn new(seed: u64) -> Self {
        let mut rng = Self { state: seed };
        // Decorrelate nearby seeds (consecutive capture seconds)
        rng.step();
        rng
    }

    /// Seed derived from capture time in seconds.
    pub fn from_capture_millis(capture_ms: i64) -> Self {
        Self::new((capture_ms / 1000) as u64)
    }

    #[inline]
    fn step(&mut self) -> u64 {
        self.state = self.state.wrapping_mul(LCG_MULTIPLIER).wrapping_add(LCG_INCREMENT);
        self.state
    }

    /// Uniform in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        (self.step() >> 11) as f64 / (1u64 << 53) as f64
    }

    pub fn next_u32(&mut self) -> u32 {
        (self.step() >> 32) as u32
    }

    /// Fill a typed-array backing buffer.
    pub fn fill_bytes(&mut self, buf: &mut [u8]) {
        for chunk in buf.chunks_mut(4) {
            let bytes = self.next_u32().to_le_bytes();
            chunk.copy_from_slice(&bytes[..chunk.len()]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_full_timestamp() {
        assert_eq!(parse_timestamp("20180803160549"), Ok(1_533_312_349_000));
    }

    #[test]
    fn test_parse_partial_timestamp() {
        assert_eq!(parse_timestamp("2018"), parse_timestamp("20180101000000"));
        assert!(parse_timestamp("201").is_err());
        assert!(parse_timestamp("2018ab").is_err());
        assert!(parse_timestamp("20181340").is_err());
    }

    #[test]
    fn test_clock_advances_with_wall_time() {
        let capture = 1_533_312_349_000;
        let clock = ReplayClock::new(capture, 1_700_000_000_000);
        let first = clock.now_at(1_700_000_000_000);
        let second = clock.now_at(1_700_000_001_000);
        assert_eq!(first, capture);
        assert_eq!(second - first, 1000);
        assert_eq!(first - capture, second - capture - 1000);
    }

    #[test]
    fn test_date_constructor_forms() {
        let clock = ReplayClock::new(1000, 5000);
        assert_eq!(clock.construct(0, 6000), Some(2000));
        assert_eq!(clock.construct(3, 6000), None);
    }

    #[test]
    fn test_to_wall_inverts_now() {
        let clock = ReplayClock::new(1_000_000, 9_000_000);
        assert_eq!(clock.to_wall(clock.now_at(9_500_000)), 9_500_000);
    }

    #[test]
    fn test_seeded_random_is_deterministic() {
        let mut a = SeededRandom::new(1_533_312_349);
        let mut b = SeededRandom::new(1_533_312_349);
        for _ in 0..100 {
            let x = a.next_f64();
            assert_eq!(x, b.next_f64());
            assert!((0.0..1.0).contains(&x));
        }
    }

    #[test]
    fn test_fill_bytes_matches_sequence() {
        let mut a = SeededRandom::new(7);
        let mut b = SeededRandom::new(7);
        let mut buf = [0u8; 6];
        a.fill_bytes(&mut buf);
        let first = b.next_u32().to_le_bytes();
        let second = b.next_u32().to_le_bytes();
        assert_eq!(&buf[..4], &first);
        assert_eq!(&buf[4..], &second[..2]);
    }
}
