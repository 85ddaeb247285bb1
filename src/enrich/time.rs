use chrono::{Local, NaiveDateTime};

use super::Enricher;

const PHRASES: &[&str] = &[
    "time", "date", "now", "soon", "latest", "current", "clock", "calendar",
    "today", "tomorrow", "yesterday", "weekend", "week", "month", "year",
    "january", "february", "march", "april", "may", "june", "july", "august",
    "september", "october", "november", "december",
    "monday", "tuesday", "wednesday", "thursday", "friday", "saturday", "sunday",
    "mon", "tue", "wed", "thu", "fri", "sat", "sun",
];

/// Appends the current date, time and timezone.
pub struct TimeEnricher {
    timezone: String,
    clock: fn() -> NaiveDateTime,
}

fn local_now() -> NaiveDateTime {
    Local::now().naive_local()
}

impl TimeEnricher {
    pub fn new(timezone: String) -> Self {
        Self { timezone, clock: local_now }
    }

    pub fn with_clock(timezone: String, clock: fn() -> NaiveDateTime) -> Self {
        Self { timezone, clock }
    }
}

impl Enricher for TimeEnricher {
    fn name(&self) -> &'static str {
        "time"
    }

    fn description(&self) -> &'static str {
        "Adds time context to the question."
    }

    fn phrases(&self) -> &[&'static str] {
        PHRASES
    }

    fn transform(&self, text: &str) -> Option<String> {
        let now = (self.clock)();
        Some(format!(
            "{text}\n- Today:\n-- Date: {}\n-- Time: {}\n-- Timezone: {}",
            now.format("%Y-%m-%d"),
            now.format("%H:%M:%S"),
            self.timezone
        ))
    }
}
