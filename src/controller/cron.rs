use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use cron::Schedule;
use std::str::FromStr;

/// Parses a 5-field crontab (or 6/7-field seconds-first) expression.
pub fn parse_schedule(expression: &str) -> Result<Schedule> {
    let normalized = normalize_expression(expression)?;
    Schedule::from_str(&normalized)
        .with_context(|| format!("Invalid cron expression: {expression}"))
}

/// First fire time strictly after `from`.
pub fn next_run_for(expression: &str, from: DateTime<Utc>) -> Result<DateTime<Utc>> {
    parse_schedule(expression)?
        .after(&from)
        .next()
        .ok_or_else(|| anyhow::anyhow!("No future occurrence for expression: {expression}"))
}

/// The next `count` fire times after `from`.
pub fn upcoming(expression: &str, from: DateTime<Utc>, count: usize) -> Result<Vec<DateTime<Utc>>> {
    Ok(parse_schedule(expression)?.after(&from).take(count).collect())
}

fn normalize_expression(expression: &str) -> Result<String> {
    let expression = expression.trim();
    let field_count = expression.split_whitespace().count();

    match field_count {
        // minute hour day month weekday
        5 => Ok(format!("0 {expression}")),
        6 | 7 => Ok(expression.to_string()),
        _ => anyhow::bail!(
            "Invalid cron expression: {expression} (expected 5, 6, or 7 fields, got {field_count})"
        ),
    }
}
