// SPDX-FileCopyrightText: 2026 Postbox Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Job name and cron expression validation.
//!
//! Expressions are checked field by field first so the operator gets a
//! message naming the offending field, then handed to `croner` to compute
//! the next run.

use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use croner::Cron;
use postbox_core::PostboxError;
use regex::Regex;

const MAX_JOB_NAME_LEN: usize = 50;

static JOB_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z0-9][a-z0-9-]*[a-z0-9]$|^[a-z0-9]$").expect("static job name pattern")
});

const FIELDS: [(&str, u32, u32); 5] = [
    ("minute", 0, 59),
    ("hour", 0, 23),
    ("day", 1, 31),
    ("month", 1, 12),
    ("weekday", 0, 7),
];

const WEEKDAYS: [&str; 8] = ["Sun", "Mon", "Tue", "Wed", "Thu", "Fri", "Sat", "Sun"];

/// Lowercase alphanumerics and inner hyphens, at most 50 characters.
pub fn validate_job_name(name: &str) -> Result<(), PostboxError> {
    if name.is_empty() {
        return Err(PostboxError::InvalidInput("job name cannot be empty".into()));
    }
    if name.len() > MAX_JOB_NAME_LEN {
        return Err(PostboxError::InvalidInput(format!(
            "job name must be {MAX_JOB_NAME_LEN} characters or less"
        )));
    }
    if !JOB_NAME.is_match(name) {
        return Err(PostboxError::InvalidInput(format!(
            "job name `{name}` must be lowercase alphanumeric with hyphens, not starting or ending with one"
        )));
    }
    Ok(())
}

/// Check a 5-field cron expression and return the parsed schedule.
pub fn validate_cron_schedule(expr: &str) -> Result<Cron, PostboxError> {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    if parts.len() != FIELDS.len() {
        return Err(PostboxError::InvalidInput(format!(
            "cron schedule must have 5 fields (minute hour day month weekday), got {}",
            parts.len()
        )));
    }
    for (part, (field, min, max)) in parts.iter().zip(FIELDS) {
        validate_field(part, field, min, max)?;
    }
    parts
        .join(" ")
        .parse::<Cron>()
        .map_err(|e| PostboxError::InvalidInput(format!("invalid cron schedule `{expr}`: {e}")))
}

fn validate_field(part: &str, field: &str, min: u32, max: u32) -> Result<(), PostboxError> {
    let invalid = |what: &str| {
        PostboxError::InvalidInput(format!("{what} in {field}: `{part}` (allowed {min}-{max})"))
    };
    let number = |s: &str| s.parse::<u32>().map_err(|_| invalid("invalid value"));

    for item in part.split(',') {
        let (base, step) = match item.split_once('/') {
            Some((base, step)) => (base, Some(number(step)?)),
            None => (item, None),
        };
        if step == Some(0) {
            return Err(invalid("step must be at least 1"));
        }
        if base == "*" {
            continue;
        }
        match base.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (number(start)?, number(end)?);
                if !(min..=max).contains(&start) || !(min..=max).contains(&end) {
                    return Err(invalid("range out of bounds"));
                }
                if start > end {
                    return Err(invalid("range start after end"));
                }
            }
            None => {
                let value = number(base)?;
                if !(min..=max).contains(&value) {
                    return Err(invalid("value out of range"));
                }
                if step.is_some() {
                    return Err(invalid("step needs `*` or a range"));
                }
            }
        }
    }
    Ok(())
}

/// Next time `expr` fires strictly after `after`.
pub fn next_run(expr: &str, after: DateTime<Utc>) -> Result<DateTime<Utc>, PostboxError> {
    validate_cron_schedule(expr)?
        .find_next_occurrence(&after, false)
        .map_err(|e| PostboxError::InvalidInput(format!("no next run for `{expr}`: {e}")))
}

/// Describe common schedules in words; anything else is returned as written.
pub fn cron_to_human(expr: &str) -> String {
    let parts: Vec<&str> = expr.split_whitespace().collect();
    let [minute, hour, day, month, weekday] = parts[..] else {
        return expr.to_string();
    };
    let every_day = day == "*" && month == "*";
    let fixed = |s: &str| s.parse::<u32>().ok();

    if parts.iter().all(|p| *p == "*") {
        return "every minute".into();
    }
    if let Some(n) = minute.strip_prefix("*/")
        && hour == "*"
        && every_day
        && weekday == "*"
    {
        return format!("every {n} minutes");
    }
    if let Some(n) = hour.strip_prefix("*/")
        && minute == "0"
        && every_day
        && weekday == "*"
    {
        return format!("every {n} hours");
    }
    match (fixed(minute), fixed(hour)) {
        (Some(m), None) if hour == "*" && every_day && weekday == "*" => {
            format!("hourly at :{m:02}")
        }
        (Some(m), Some(h)) if every_day && weekday == "*" => format!("daily at {h:02}:{m:02}"),
        (Some(m), Some(h)) if every_day => match fixed(weekday).and_then(|d| WEEKDAYS.get(d as usize)) {
            Some(name) => format!("weekly on {name} at {h:02}:{m:02}"),
            None => expr.to_string(),
        },
        _ => expr.to_string(),
    }
}
