//! Daily run times from `[scheduler] times`.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, NaiveTime, Utc};

/// Parse "HH:MM" entries, sorted and deduplicated.
pub fn parse_times(raw: &[String]) -> Result<Vec<NaiveTime>> {
    let mut times = raw
        .iter()
        .map(|t| {
            NaiveTime::parse_from_str(t.trim(), "%H:%M")
                .with_context(|| format!("invalid scheduler time '{}', expected HH:MM", t))
        })
        .collect::<Result<Vec<_>>>()?;
    times.sort();
    times.dedup();
    Ok(times)
}

/// First configured time strictly after `now`, today or tomorrow (UTC).
pub fn next_run(now: DateTime<Utc>, times: &[NaiveTime]) -> Option<DateTime<Utc>> {
    let today = now.date_naive();
    let later_today = times
        .iter()
        .map(|t| today.and_time(*t).and_utc())
        .find(|at| *at > now);

    later_today.or_else(|| {
        let tomorrow = today + Duration::days(1);
        times.first().map(|t| tomorrow.and_time(*t).and_utc())
    })
}
