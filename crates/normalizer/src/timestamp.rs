use chrono::{DateTime, FixedOffset, Local, Offset, Utc};

/// `11/14/2023, 10:13:20 PM`
const DISPLAY_FORMAT: &str = "%-m/%-d/%Y, %-I:%M:%S %p";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayZone {
    Local,
    Fixed(FixedOffset),
}

impl DisplayZone {
    pub fn utc() -> Self {
        DisplayZone::Fixed(Utc.fix())
    }

    /// `None` when the offset is outside +/- 24h.
    pub fn from_offset_minutes(minutes: i32) -> Option<Self> {
        minutes
            .checked_mul(60)
            .and_then(FixedOffset::east_opt)
            .map(DisplayZone::Fixed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimestampFormatter {
    zone: DisplayZone,
}

impl TimestampFormatter {
    pub fn new(zone: DisplayZone) -> Self {
        Self { zone }
    }

    pub fn zone(&self) -> DisplayZone {
        self.zone
    }

    pub fn format_epoch_seconds(&self, secs: i64) -> Option<String> {
        DateTime::from_timestamp(secs, 0).map(|at| self.format(at))
    }

    pub fn format(&self, at: DateTime<Utc>) -> String {
        match self.zone {
            DisplayZone::Local => at.with_timezone(&Local).format(DISPLAY_FORMAT).to_string(),
            DisplayZone::Fixed(offset) => at.with_timezone(&offset).format(DISPLAY_FORMAT).to_string(),
        }
    }
}
