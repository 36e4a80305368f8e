use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::TryRngCore;

use crate::config::RefreshConfig;

/// Used when the OS random source is unavailable: shorten by the band's
/// lower bound, which keeps the result inside the jitter range.
const FALLBACK_SAMPLE: u64 = 0;

/// Exponential backoff driven by a feed's unchanged streak, with jitter.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    base: Duration,
    ceiling: Duration,
    jitter_min: f64,
    jitter_max: f64,
}

impl BackoffPolicy {
    pub fn new(base: Duration, ceiling: Duration, jitter_min: f64, jitter_max: f64) -> Self {
        let jitter_min = jitter_min.clamp(0.0, 0.99);
        let jitter_max = jitter_max.clamp(jitter_min, 0.99);
        Self {
            base,
            ceiling: ceiling.max(base),
            jitter_min,
            jitter_max,
        }
    }

    pub fn base(&self) -> Duration {
        self.base
    }

    pub fn ceiling(&self) -> Duration {
        self.ceiling
    }

    pub fn max_jitter(&self) -> f64 {
        self.jitter_max
    }

    /// `min(base * 2^max(count, 0), ceiling)`.
    pub fn interval(&self, unchanged_count: i64) -> Duration {
        let doublings = unchanged_count.clamp(0, 32) as u32;
        2u32.checked_pow(doublings)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.ceiling, |interval| interval.min(self.ceiling))
    }

    pub fn apply_jitter(&self, interval: Duration) -> Duration {
        let sample = OsRng.try_next_u64().unwrap_or_else(|e| {
            tracing::warn!("random source failed, using fixed jitter: {}", e);
            FALLBACK_SAMPLE
        });
        self.jitter_with(interval, sample)
    }

    /// Deterministic half of [`apply_jitter`](Self::apply_jitter): the low
    /// bit picks the sign, the high 53 bits pick `r` within the band.
    pub fn jitter_with(&self, interval: Duration, sample: u64) -> Duration {
        let unit = (sample >> 11) as f64 / (1u64 << 53) as f64;
        let r = self.jitter_min + unit * (self.jitter_max - self.jitter_min);
        let factor = if sample & 1 == 1 { 1.0 + r } else { 1.0 - r };
        interval.mul_f64(factor).min(self.ceiling)
    }

    pub fn next_refresh_at(
        &self,
        checked_at: DateTime<Utc>,
        unchanged_count: i64,
    ) -> DateTime<Utc> {
        let delay = self.apply_jitter(self.interval(unchanged_count)).min(self.ceiling);
        let delay = chrono::Duration::from_std(delay)
            .unwrap_or_else(|_| chrono::Duration::seconds(self.ceiling.as_secs() as i64));
        checked_at
            .checked_add_signed(delay)
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }
}

impl From<&RefreshConfig> for BackoffPolicy {
    fn from(config: &RefreshConfig) -> Self {
        Self::new(
            config.base_interval(),
            config.max_interval(),
            f64::from(config.jitter_min_percent) / 100.0,
            f64::from(config.jitter_max_percent) / 100.0,
        )
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from(&RefreshConfig::default())
    }
}
