//! 5-field cron dialect (minute hour day-of-month month day-of-week)
//!
//! Accepted tokens: `*`, numbers, `,` lists, `-` ranges, `/` steps. No
//! seconds field, no named months/days, no L/W/# extensions. Day-of-week
//! runs 0-6 with 0 = Sunday. Evaluation is a pure function of the
//! expression and a reference time; nothing here reads the wall clock.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use cron::Schedule;

use qualscan_core::{QualscanError, Result};

#[derive(Debug, Clone)]
pub struct CronExpr {
    text: String,
    schedule: Schedule,
}

impl CronExpr {
    pub fn parse(expr: &str) -> Result<Self> {
        let fields: Vec<&str> = expr.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(QualscanError::Config(format!(
                "cron expression needs 5 fields, got {}: {:?}",
                fields.len(),
                expr
            )));
        }
        for field in &fields {
            if !field.chars().all(|c| c.is_ascii_digit() || "*,-/".contains(c)) {
                return Err(QualscanError::Config(format!(
                    "invalid cron token {:?} (names and extensions are not supported)",
                    field
                )));
            }
        }
        let dow = map_day_of_week(fields[4])?;
        // the schedule crate takes a seconds field and numbers Sunday as 1
        let with_seconds = format!(
            "0 {} {} {} {} {}",
            fields[0], fields[1], fields[2], fields[3], dow
        );
        let schedule = Schedule::from_str(&with_seconds)
            .map_err(|e| QualscanError::Config(format!("invalid cron {:?}: {}", expr, e)))?;
        Ok(Self {
            text: expr.to_string(),
            schedule,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Earliest fire time strictly after `after`
    pub fn next_after(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.schedule.after(&after).next()
    }

    /// Whether the schedule fires at exactly this time (minute precision)
    pub fn fires_at(&self, at: DateTime<Utc>) -> bool {
        self.schedule.includes(at)
    }
}

/// Rewrite a 0-6 (0 = Sunday) day-of-week field into the crate's 1-7
/// numbering
fn map_day_of_week(field: &str) -> Result<String> {
    if field == "*" {
        return Ok(field.to_string());
    }
    let mut out_tokens = Vec::new();
    for token in field.split(',') {
        let (range, step) = match token.split_once('/') {
            Some((r, s)) => (r, Some(s)),
            None => (token, None),
        };
        let mapped_range = if range == "*" {
            "*".to_string()
        } else {
            let map_one = |n: &str| -> Result<u8> {
                let v: u8 = n.parse().map_err(|_| {
                    QualscanError::Config(format!("invalid day-of-week {:?}", token))
                })?;
                if v > 6 {
                    return Err(QualscanError::Config(format!(
                        "day-of-week {} outside 0-6",
                        v
                    )));
                }
                Ok(v + 1)
            };
            match range.split_once('-') {
                Some((a, b)) => {
                    let (a, b) = (map_one(a)?, map_one(b)?);
                    if a > b {
                        return Err(QualscanError::Config(format!(
                            "day-of-week range {:?} is reversed",
                            token
                        )));
                    }
                    format!("{}-{}", a, b)
                }
                None => map_one(range)?.to_string(),
            }
        };
        out_tokens.push(match step {
            Some(s) => format!("{}/{}", mapped_range, s),
            None => mapped_range,
        });
    }
    Ok(out_tokens.join(","))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn test_every_five_minutes() {
        let cron = CronExpr::parse("*/5 * * * *").unwrap();
        let next = cron.next_after(at(2024, 5, 1, 12, 2, 30)).unwrap();
        assert_eq!(next, at(2024, 5, 1, 12, 5, 0));
        let after_next = cron.next_after(next).unwrap();
        assert_eq!(after_next, at(2024, 5, 1, 12, 10, 0));
    }

    #[test]
    fn test_next_is_strictly_after() {
        for expr in ["*/5 * * * *", "30 2 * * *", "0 */6 * * *", "15 10 1 * *"] {
            let cron = CronExpr::parse(expr).unwrap();
            let start = at(2024, 5, 1, 12, 2, 30);
            let next = cron.next_after(start).unwrap();
            assert!(next > start, "{}: {} !> {}", expr, next, start);
        }
    }

    #[test]
    fn test_next_matches_minute_simulation() {
        for expr in ["*/5 * * * *", "30 2 * * *", "0 */6 * * 1-5", "15 10 1 * *"] {
            let cron = CronExpr::parse(expr).unwrap();
            let start = at(2024, 4, 30, 23, 59, 11);
            let next = cron.next_after(start).unwrap();

            // walk forward one minute at a time; the first minute the
            // schedule includes must be the reported next fire
            let mut t = at(2024, 4, 30, 23, 59, 0) + chrono::Duration::minutes(1);
            let mut simulated = None;
            for _ in 0..(60 * 24 * 40) {
                if cron.fires_at(t) {
                    simulated = Some(t);
                    break;
                }
                t += chrono::Duration::minutes(1);
            }
            assert_eq!(simulated, Some(next), "{}", expr);
        }
    }

    #[test]
    fn test_day_of_week_zero_is_sunday() {
        let cron = CronExpr::parse("0 0 * * 0").unwrap();
        // 2024-05-04 is a Saturday; the next fire is Sunday midnight
        let next = cron.next_after(at(2024, 5, 4, 10, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 5, 5, 0, 0, 0));
    }

    #[test]
    fn test_weekday_range_maps() {
        let cron = CronExpr::parse("0 9 * * 1-5").unwrap();
        // Friday 2024-05-03 10:00 -> Monday 2024-05-06 09:00
        let next = cron.next_after(at(2024, 5, 3, 10, 0, 0)).unwrap();
        assert_eq!(next, at(2024, 5, 6, 9, 0, 0));
    }

    #[test]
    fn test_rejections() {
        assert!(CronExpr::parse("* * * *").is_err(), "too few fields");
        assert!(CronExpr::parse("0 0 * * * *").is_err(), "seconds field");
        assert!(CronExpr::parse("0 0 * JAN *").is_err(), "named month");
        assert!(CronExpr::parse("0 0 * * MON").is_err(), "named day");
        assert!(CronExpr::parse("0 0 L * *").is_err(), "L extension");
        assert!(CronExpr::parse("0 0 * * 7").is_err(), "day-of-week above 6");
        assert!(CronExpr::parse("61 * * * *").is_err(), "minute out of range");
    }
}
