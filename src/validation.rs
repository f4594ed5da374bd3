use chrono::Weekday;

use crate::error::{TimerError, TimerResult};

pub const MIN_PRIORITY: i64 = 1;
pub const MAX_PRIORITY: i64 = 5;

/// Maximum phase duration in seconds (24 hours)
pub const MAX_PHASE_SECS: u64 = 24 * 60 * 60;

pub const MAX_TITLE_LEN: usize = 200;
pub const MAX_CATEGORY_NAME_LEN: usize = 100;

/// Validate a task title, returning it trimmed.
pub fn validate_title(title: &str) -> TimerResult<&str> {
    let title = title.trim();
    if title.is_empty() {
        return Err(TimerError::validation("title", "cannot be empty"));
    }
    if title.chars().count() > MAX_TITLE_LEN {
        return Err(TimerError::validation(
            "title",
            format!("cannot exceed {} characters", MAX_TITLE_LEN),
        ));
    }
    Ok(title)
}

pub fn validate_priority(priority: i64) -> TimerResult<()> {
    if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&priority) {
        return Err(TimerError::validation(
            "priority",
            format!("must be {}-{}, got {}", MIN_PRIORITY, MAX_PRIORITY, priority),
        ));
    }
    Ok(())
}

/// Validate category name.
pub fn validate_category_name(name: &str) -> TimerResult<&str> {
    let name = name.trim();
    if name.is_empty() {
        return Err(TimerError::validation("name", "cannot be empty"));
    }
    if name.chars().count() > MAX_CATEGORY_NAME_LEN {
        return Err(TimerError::validation(
            "name",
            format!("cannot exceed {} characters", MAX_CATEGORY_NAME_LEN),
        ));
    }
    Ok(name)
}

/// Validate a work or break phase length in seconds.
pub fn validate_phase_secs(field: &'static str, secs: u64) -> TimerResult<u64> {
    if secs == 0 {
        return Err(TimerError::validation(field, "must be positive"));
    }
    if secs > MAX_PHASE_SECS {
        return Err(TimerError::validation(field, "cannot exceed 24 hours"));
    }
    Ok(secs)
}

/// Parse a comma-separated weekday list such as `Mon,Wed` or `monday, friday`.
pub fn parse_days_of_week(days: &str) -> TimerResult<Vec<Weekday>> {
    let mut parsed = Vec::new();
    for part in days.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let day: Weekday = part.parse().map_err(|_| {
            TimerError::validation("days_of_week", format!("invalid day: '{}'", part))
        })?;
        if !parsed.contains(&day) {
            parsed.push(day);
        }
    }
    Ok(parsed)
}
