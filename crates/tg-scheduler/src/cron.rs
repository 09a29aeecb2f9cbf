//! Minimal cron expression matching.
//!
//! Accepts both 5-field (`min hour dom month dow`) and 6-field
//! (`sec min hour dom month dow`) expressions. Each field supports `*`,
//! lists, ranges, and steps (`*/5`, `1-5`, `1,3,5`, `10-50/10`). The
//! scheduler ticks once per minute, so the seconds field is parsed for
//! compatibility but does not add sub-minute resolution.

use chrono::{DateTime, Datelike, TimeZone, Timelike};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("bad cron expression: {0}")]
pub struct CronParseError(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
struct Field {
    /// Sorted allowed values; `None` means any.
    allowed: Option<Vec<u32>>,
}

impl Field {
    fn any() -> Self {
        Self { allowed: None }
    }

    fn contains(&self, v: u32) -> bool {
        match &self.allowed {
            None => true,
            Some(values) => values.binary_search(&v).is_ok(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CronExpr {
    minute: Field,
    hour: Field,
    day_of_month: Field,
    month: Field,
    day_of_week: Field,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self, CronParseError> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        let tail: &[&str] = match fields.len() {
            // 6-field: leading seconds field is validated then ignored.
            6 => {
                parse_field(fields[0], 0, 59)?;
                &fields[1..]
            }
            5 => &fields[..],
            n => {
                return Err(CronParseError(format!(
                    "expected 5 or 6 fields, got {n}: {expr:?}"
                )))
            }
        };

        Ok(Self {
            minute: parse_field(tail[0], 0, 59)?,
            hour: parse_field(tail[1], 0, 23)?,
            day_of_month: parse_field(tail[2], 1, 31)?,
            month: parse_field(tail[3], 1, 12)?,
            day_of_week: parse_field(tail[4], 0, 7).map(normalize_dow)?,
        })
    }

    /// Whether the expression fires in the minute containing `t`.
    pub fn matches<Tz: TimeZone>(&self, t: &DateTime<Tz>) -> bool {
        self.minute.contains(t.minute())
            && self.hour.contains(t.hour())
            && self.day_of_month.contains(t.day())
            && self.month.contains(t.month())
            && self
                .day_of_week
                .contains(t.weekday().num_days_from_sunday())
    }
}

/// Map 7 to 0 so both Sunday spellings work.
fn normalize_dow(f: Field) -> Field {
    match f.allowed {
        None => Field::any(),
        Some(values) => {
            let mut mapped: Vec<u32> = values
                .into_iter()
                .map(|v| if v == 7 { 0 } else { v })
                .collect();
            mapped.sort_unstable();
            mapped.dedup();
            Field { allowed: Some(mapped) }
        }
    }
}

fn parse_field(spec: &str, min: u32, max: u32) -> Result<Field, CronParseError> {
    if spec == "*" {
        return Ok(Field::any());
    }

    let mut allowed = Vec::new();
    for part in spec.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step: u32 = step
                    .parse()
                    .map_err(|_| CronParseError(format!("bad step in {part:?}")))?;
                if step == 0 {
                    return Err(CronParseError(format!("zero step in {part:?}")));
                }
                (range, step)
            }
            None => (part, 1),
        };

        let (lo, hi) = if range == "*" {
            (min, max)
        } else if let Some((a, b)) = range.split_once('-') {
            let lo = parse_value(a, min, max)?;
            let hi = parse_value(b, min, max)?;
            if lo > hi {
                return Err(CronParseError(format!("inverted range {range:?}")));
            }
            (lo, hi)
        } else {
            let v = parse_value(range, min, max)?;
            (v, v)
        };

        let mut v = lo;
        while v <= hi {
            allowed.push(v);
            v += step;
        }
    }

    allowed.sort_unstable();
    allowed.dedup();
    Ok(Field {
        allowed: Some(allowed),
    })
}

fn parse_value(s: &str, min: u32, max: u32) -> Result<u32, CronParseError> {
    let v: u32 = s
        .parse()
        .map_err(|_| CronParseError(format!("bad value {s:?}")))?;
    if v < min || v > max {
        return Err(CronParseError(format!(
            "value {v} outside {min}..={max}"
        )));
    }
    Ok(v)
}
