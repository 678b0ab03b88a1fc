//! Randomized timing: backoff between cycles and human-paced delays
//!
//! Both windows are inclusive on both ends and validated at construction, so
//! a sampled value is always inside `[min, max]`.

use crate::error::{AutopostError, ConfigError, Result};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Uniform backoff window between cycles, in whole seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffWindow {
    min_secs: u64,
    max_secs: u64,
}

impl BackoffWindow {
    pub fn new(min_secs: u64, max_secs: u64) -> Result<Self> {
        if max_secs < min_secs {
            return Err(ConfigError::OutOfRange {
                field: "bot.interval_max".to_string(),
                reason: format!(
                    "must be >= interval_min ({} < {})",
                    max_secs, min_secs
                ),
            }
            .into());
        }
        Ok(Self { min_secs, max_secs })
    }

    /// Parse a "MIN-MAX" window with human-readable bounds, e.g. "5m-15m"
    pub fn parse(input: &str) -> Result<Self> {
        let (min_str, max_str) = parse_range(input)?;
        let min = parse_duration(min_str)?;
        let max = parse_duration(max_str)?;
        Self::new(min.as_secs(), max.as_secs())
    }

    pub fn min_secs(&self) -> u64 {
        self.min_secs
    }

    pub fn max_secs(&self) -> u64 {
        self.max_secs
    }

    /// Draw a wait length in seconds
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> u64 {
        rng.gen_range(self.min_secs..=self.max_secs)
    }
}

impl Default for BackoffWindow {
    fn default() -> Self {
        Self {
            min_secs: 5,
            max_secs: 15,
        }
    }
}

/// Inclusive millisecond range used for keystroke, line and anti-spam pauses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "[u64; 2]", into = "[u64; 2]")]
pub struct DelayRange {
    min_ms: u64,
    max_ms: u64,
}

impl DelayRange {
    /// Per-character typing delay
    pub const KEYSTROKE: Self = Self { min_ms: 30, max_ms: 90 };
    /// Pause after each typed line
    pub const LINE_PAUSE: Self = Self { min_ms: 100, max_ms: 500 };
    /// Wait before submitting
    pub const ANTI_SPAM: Self = Self { min_ms: 2000, max_ms: 8000 };

    pub fn new(min_ms: u64, max_ms: u64) -> Result<Self> {
        if max_ms < min_ms {
            return Err(ConfigError::OutOfRange {
                field: "pacing".to_string(),
                reason: format!("range [{}, {}] has max below min", min_ms, max_ms),
            }
            .into());
        }
        Ok(Self { min_ms, max_ms })
    }

    pub const fn zero() -> Self {
        Self { min_ms: 0, max_ms: 0 }
    }

    pub fn min_ms(&self) -> u64 {
        self.min_ms
    }

    pub fn max_ms(&self) -> u64 {
        self.max_ms
    }

    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Duration {
        Duration::from_millis(rng.gen_range(self.min_ms..=self.max_ms))
    }
}

impl TryFrom<[u64; 2]> for DelayRange {
    type Error = AutopostError;

    fn try_from(bounds: [u64; 2]) -> Result<Self> {
        Self::new(bounds[0], bounds[1])
    }
}

impl From<DelayRange> for [u64; 2] {
    fn from(range: DelayRange) -> Self {
        [range.min_ms, range.max_ms]
    }
}

/// Render a countdown for logs ("4m 10s")
pub fn format_wait(secs: u64) -> String {
    humantime::format_duration(Duration::from_secs(secs)).to_string()
}

/// Split "MIN-MAX" into (MIN, MAX)
fn parse_range(range: &str) -> Result<(&str, &str)> {
    let parts: Vec<&str> = range.split('-').map(str::trim).collect();
    match parts.as_slice() {
        [min, max] if !min.is_empty() && !max.is_empty() => Ok((min, max)),
        _ => Err(AutopostError::InvalidInput(format!(
            "Interval must be MIN-MAX, got '{}'",
            range
        ))),
    }
}

/// Accept bare integers as seconds, otherwise humantime syntax
fn parse_duration(input: &str) -> Result<Duration> {
    if let Ok(secs) = input.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(input).map_err(|e| {
        AutopostError::InvalidInput(format!("Could not parse duration '{}': {}", input, e))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn test_backoff_samples_stay_in_window() {
        let window = BackoffWindow::new(5, 15).unwrap();
        let mut rng = StdRng::seed_from_u64(7);

        let mut seen_min = false;
        let mut seen_max = false;
        for _ in 0..1000 {
            let secs = window.sample(&mut rng);
            assert!((5..=15).contains(&secs), "sample {} out of range", secs);
            seen_min |= secs == 5;
            seen_max |= secs == 15;
        }
        // Both bounds are inclusive
        assert!(seen_min && seen_max);
    }

    #[test]
    fn test_backoff_rejects_inverted_window() {
        let result = BackoffWindow::new(15, 5);
        assert!(matches!(result, Err(AutopostError::Config(_))));
    }

    #[test]
    fn test_backoff_degenerate_window() {
        let window = BackoffWindow::new(0, 0).unwrap();
        let mut rng = StdRng::seed_from_u64(1);
        assert_eq!(window.sample(&mut rng), 0);
    }

    #[test]
    fn test_backoff_parse_human_units() {
        let window = BackoffWindow::parse("5m-15m").unwrap();
        assert_eq!(window.min_secs(), 300);
        assert_eq!(window.max_secs(), 900);

        let window = BackoffWindow::parse("30-90").unwrap();
        assert_eq!(window.min_secs(), 30);
        assert_eq!(window.max_secs(), 90);
    }

    #[test]
    fn test_backoff_parse_errors() {
        assert!(BackoffWindow::parse("5m").is_err());
        assert!(BackoffWindow::parse("5m-").is_err());
        assert!(BackoffWindow::parse("soon-later").is_err());
        assert!(BackoffWindow::parse("15m-5m").is_err());
    }

    #[test]
    fn test_delay_range_sample_in_bounds() {
        let range = DelayRange::new(30, 90).unwrap();
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..500 {
            let d = range.sample(&mut rng);
            assert!(d >= Duration::from_millis(30) && d <= Duration::from_millis(90));
        }
    }

    #[test]
    fn test_delay_range_deserialize_validates() {
        #[derive(Deserialize)]
        struct Wrapper {
            range: DelayRange,
        }

        let ok: Wrapper = toml::from_str("range = [100, 500]").unwrap();
        assert_eq!(ok.range.min_ms(), 100);
        assert_eq!(ok.range.max_ms(), 500);

        assert!(toml::from_str::<Wrapper>("range = [500, 100]").is_err());
    }

    #[test]
    fn test_format_wait() {
        assert_eq!(format_wait(250), "4m 10s");
    }
}
