use chrono::{DateTime, Timelike, Utc};
use chrono_tz::Tz;

use cadence_core::config::OffPeakConfig;

/// Hours during which off-peak-only schedules are preferred.
///
/// Inside the window when the local hour is strictly greater than
/// `start_hour` or strictly less than `end_hour` (defaults 22 and 6).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OffPeakWindow {
    pub start_hour: u32,
    pub end_hour: u32,
    pub timezone: Tz,
}

impl Default for OffPeakWindow {
    fn default() -> Self {
        Self {
            start_hour: cadence_core::config::DEFAULT_OFF_PEAK_START_HOUR,
            end_hour: cadence_core::config::DEFAULT_OFF_PEAK_END_HOUR,
            timezone: Tz::UTC,
        }
    }
}

impl OffPeakWindow {
    pub fn from_config(config: &OffPeakConfig) -> cadence_core::Result<Self> {
        Ok(Self {
            start_hour: config.start_hour,
            end_hour: config.end_hour,
            timezone: cadence_core::tz::parse_timezone(&config.timezone)?,
        })
    }

    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let hour = now.with_timezone(&self.timezone).hour();
        hour > self.start_hour || hour < self.end_hour
    }
}
