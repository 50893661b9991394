use anyhow::{bail, Context, Result};
use chrono::{DateTime, DurationRound, TimeDelta, Utc};

pub const DEFAULT_CADENCE_MINUTES: u32 = 5;

/// Next wall-clock slot after `now`: truncate to the minute, add `cadence`,
/// then truncate to a multiple of `cadence` counted from the Unix epoch.
///
/// With whole-minute cadences the result is always strictly after `now`,
/// and slots missed while a cycle overran are skipped rather than queued.
pub fn next_run_after(now: DateTime<Utc>, cadence: TimeDelta) -> Result<DateTime<Utc>> {
    if cadence < TimeDelta::minutes(1) || cadence.num_seconds() % 60 != 0 {
        bail!("cadence must be a positive whole number of minutes, got {cadence}");
    }
    let minute = now
        .duration_trunc(TimeDelta::minutes(1))
        .context("failed to truncate current time to the minute")?;
    let shifted = minute
        .checked_add_signed(cadence)
        .context("next run overflows the calendar")?;
    shifted
        .duration_trunc(cadence)
        .context("failed to align next run to the cadence")
}
