// silt-core/src/domain/schedule.rs
//
// Five-field cron expressions: minute hour dom month dow.
// Supported atoms per field: `*`, `*/n`, `a`, `a-b`, and comma-joined
// combinations of those.

use crate::domain::error::DomainError;
use chrono::{Datelike, Timelike};

#[derive(Debug, Clone, PartialEq)]
enum CronAtom {
    Any,
    Step(u32),
    Value(u32),
    Range(u32, u32),
}

#[derive(Debug, Clone, PartialEq)]
pub struct CronField {
    atoms: Vec<CronAtom>,
}

impl CronField {
    fn parse(raw: &str, min: u32, max: u32) -> Result<Self, String> {
        let mut atoms = Vec::new();
        for part in raw.split(',') {
            let part = part.trim();
            if part.is_empty() {
                return Err("empty field element".into());
            }
            if part == "*" {
                atoms.push(CronAtom::Any);
            } else if let Some(step) = part.strip_prefix("*/") {
                let n: u32 = step
                    .parse()
                    .map_err(|_| format!("bad step '{part}'"))?;
                if n == 0 {
                    return Err(format!("zero step '{part}'"));
                }
                atoms.push(CronAtom::Step(n));
            } else if let Some((lo, hi)) = part.split_once('-') {
                let lo: u32 = lo.parse().map_err(|_| format!("bad range '{part}'"))?;
                let hi: u32 = hi.parse().map_err(|_| format!("bad range '{part}'"))?;
                if lo > hi || lo < min || hi > max {
                    return Err(format!("range '{part}' out of bounds {min}-{max}"));
                }
                atoms.push(CronAtom::Range(lo, hi));
            } else {
                let v: u32 = part.parse().map_err(|_| format!("bad value '{part}'"))?;
                if v < min || v > max {
                    return Err(format!("value '{part}' out of bounds {min}-{max}"));
                }
                atoms.push(CronAtom::Value(v));
            }
        }
        Ok(CronField { atoms })
    }

    fn matches(&self, value: u32) -> bool {
        self.atoms.iter().any(|atom| match atom {
            CronAtom::Any => true,
            CronAtom::Step(n) => value % n == 0,
            CronAtom::Value(v) => *v == value,
            CronAtom::Range(lo, hi) => value >= *lo && value <= *hi,
        })
    }
}

/// A parsed 5-field cron expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CronExpr {
    minute: CronField,
    hour: CronField,
    dom: CronField,
    month: CronField,
    dow: CronField,
}

impl CronExpr {
    pub fn parse(raw: &str) -> Result<Self, DomainError> {
        let fields: Vec<&str> = raw.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(DomainError::Schedule(
                raw.to_string(),
                format!("expected 5 fields, found {}", fields.len()),
            ));
        }
        let mk = |raw_expr: &str, idx: usize, min: u32, max: u32| {
            CronField::parse(fields[idx], min, max)
                .map_err(|e| DomainError::Schedule(raw_expr.to_string(), e))
        };
        Ok(CronExpr {
            minute: mk(raw, 0, 0, 59)?,
            hour: mk(raw, 1, 0, 23)?,
            dom: mk(raw, 2, 1, 31)?,
            month: mk(raw, 3, 1, 12)?,
            dow: mk(raw, 4, 0, 6)?,
        })
    }

    /// Whether the expression fires at the given local timestamp's minute.
    /// Sunday is day-of-week 0.
    pub fn matches<Tz: chrono::TimeZone>(&self, at: &chrono::DateTime<Tz>) -> bool {
        self.minute.matches(at.minute())
            && self.hour.matches(at.hour())
            && self.dom.matches(at.day())
            && self.month.matches(at.month())
            && self.dow.matches(at.weekday().num_days_from_sunday())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn at(h: u32, m: u32) -> chrono::DateTime<Utc> {
        // 2024-01-01 is a Monday (dow=1)
        Utc.with_ymd_and_hms(2024, 1, 1, h, m, 0).unwrap()
    }

    #[test]
    fn test_daily_at_six() {
        let cron = CronExpr::parse("0 6 * * *").unwrap();
        assert!(cron.matches(&at(6, 0)));
        assert!(!cron.matches(&at(6, 1)));
        assert!(!cron.matches(&at(7, 0)));
    }

    #[test]
    fn test_every_fifteen_minutes() {
        let cron = CronExpr::parse("*/15 * * * *").unwrap();
        assert!(cron.matches(&at(3, 0)));
        assert!(cron.matches(&at(3, 45)));
        assert!(!cron.matches(&at(3, 20)));
    }

    #[test]
    fn test_lists_and_ranges() {
        let cron = CronExpr::parse("0 9-17 * * 1-5").unwrap();
        assert!(cron.matches(&at(9, 0)));
        assert!(cron.matches(&at(17, 0)));
        assert!(!cron.matches(&at(18, 0)));

        let cron = CronExpr::parse("0,30 6,18 * * *").unwrap();
        assert!(cron.matches(&at(6, 30)));
        assert!(cron.matches(&at(18, 0)));
        assert!(!cron.matches(&at(12, 0)));
    }

    #[test]
    fn test_day_of_week() {
        // 2024-01-07 is a Sunday
        let sunday = Utc.with_ymd_and_hms(2024, 1, 7, 6, 0, 0).unwrap();
        let cron = CronExpr::parse("0 6 * * 0").unwrap();
        assert!(cron.matches(&sunday));
        assert!(!cron.matches(&at(6, 0))); // Monday
    }

    #[test]
    fn test_invalid_expressions() {
        assert!(CronExpr::parse("bad").is_err());
        assert!(CronExpr::parse("0 6 * *").is_err());
        assert!(CronExpr::parse("61 * * * *").is_err());
        assert!(CronExpr::parse("* 25 * * *").is_err());
        assert!(CronExpr::parse("*/0 * * * *").is_err());
        assert!(CronExpr::parse("10-5 * * * *").is_err());
    }
}
