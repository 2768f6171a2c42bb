use chrono::{DateTime, NaiveDateTime, Utc, Weekday};
use rrule::RRuleSet;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use thiserror::Error;

use crate::error::CoreError;
use crate::models::SeriesChanges;

/// Upper bound on occurrences examined per expansion. Guards against
/// runaway iteration on unbounded rules; real windows stay far below this.
const EXPANSION_LIMIT: usize = 10_000;

/// Instant format used inside rule strings (RFC 5545 UTC form).
const INSTANT_FORMAT: &str = "%Y%m%dT%H%M%SZ";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Frequency {
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl std::fmt::Display for Frequency {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Frequency::Daily => write!(f, "DAILY"),
            Frequency::Weekly => write!(f, "WEEKLY"),
            Frequency::Monthly => write!(f, "MONTHLY"),
            Frequency::Yearly => write!(f, "YEARLY"),
        }
    }
}

impl FromStr for Frequency {
    type Err = ParseFrequencyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "DAILY" => Ok(Frequency::Daily),
            "WEEKLY" => Ok(Frequency::Weekly),
            "MONTHLY" => Ok(Frequency::Monthly),
            "YEARLY" => Ok(Frequency::Yearly),
            _ => Err(ParseFrequencyError(s.to_string())),
        }
    }
}

#[derive(Error, Debug, PartialEq)]
#[error("Invalid frequency: {0}")]
pub struct ParseFrequencyError(String);

/// Value-object view of a recurrence rule. The rest of the engine works
/// against this type; the stored string form never leaves this module.
///
/// `until` and `count` are mutually exclusive; neither set = unbounded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleSpec {
    pub dtstart: DateTime<Utc>,
    pub freq: Frequency,
    pub interval: u16,
    pub until: Option<DateTime<Utc>>,
    pub count: Option<u32>,
    pub weekdays: Vec<Weekday>,
}

impl RuleSpec {
    /// Parses the canonical stored form (`DTSTART:...\nRRULE:...`).
    /// Rejects anything outside the grammar this module itself emits.
    pub fn parse(rule: &str) -> Result<Self, CoreError> {
        let (dtstart_line, rrule_line) = rule
            .split_once('\n')
            .ok_or_else(|| CoreError::InvalidRule(format!("missing RRULE line: {rule}")))?;

        let raw_start = dtstart_line
            .strip_prefix("DTSTART:")
            .ok_or_else(|| CoreError::InvalidRule(format!("missing DTSTART: {rule}")))?;
        let dtstart = parse_instant(raw_start)?;

        let body = rrule_line
            .strip_prefix("RRULE:")
            .ok_or_else(|| CoreError::InvalidRule(format!("missing RRULE prefix: {rule}")))?;

        let mut freq = None;
        let mut interval: u16 = 1;
        let mut until = None;
        let mut count = None;
        let mut weekdays = Vec::new();

        for part in body.split(';') {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| CoreError::InvalidRule(format!("malformed rule part: {part}")))?;
            match key {
                "FREQ" => {
                    freq = Some(
                        value
                            .parse::<Frequency>()
                            .map_err(|e| CoreError::InvalidRule(e.to_string()))?,
                    );
                }
                "INTERVAL" => {
                    interval = value
                        .parse()
                        .map_err(|_| CoreError::InvalidRule(format!("bad INTERVAL: {value}")))?;
                }
                "COUNT" => {
                    count = Some(
                        value
                            .parse()
                            .map_err(|_| CoreError::InvalidRule(format!("bad COUNT: {value}")))?,
                    );
                }
                "UNTIL" => until = Some(parse_instant(value)?),
                "BYDAY" => {
                    weekdays = value
                        .split(',')
                        .map(|code| {
                            weekday_from_code(code).ok_or_else(|| {
                                CoreError::InvalidRule(format!("bad BYDAY code: {code}"))
                            })
                        })
                        .collect::<Result<Vec<_>, _>>()?;
                }
                other => {
                    return Err(CoreError::InvalidRule(format!(
                        "unsupported rule part: {other}"
                    )));
                }
            }
        }

        let spec = Self {
            dtstart,
            freq: freq.ok_or_else(|| CoreError::InvalidRule("FREQ is required".to_string()))?,
            interval,
            until,
            count,
            weekdays,
        };
        spec.validate()?;
        Ok(spec)
    }

    /// Parses a rule persisted on a series row. A stored rule that no
    /// longer parses is an invariant violation, not caller error.
    pub fn parse_stored(rule: &str) -> Result<Self, CoreError> {
        Self::parse(rule).map_err(|e| CoreError::InvariantViolation(format!("stored rule: {e}")))
    }

    /// Canonical stored form: `DTSTART:<utc>\nRRULE:FREQ=..;INTERVAL=..`
    /// plus COUNT/UNTIL/BYDAY when present.
    pub fn to_rule_string(&self) -> String {
        let mut rule = format!("FREQ={};INTERVAL={}", self.freq, self.interval);
        if let Some(count) = self.count {
            rule.push_str(&format!(";COUNT={count}"));
        }
        if let Some(until) = self.until {
            rule.push_str(&format!(";UNTIL={}", until.format(INSTANT_FORMAT)));
        }
        if !self.weekdays.is_empty() {
            let days: Vec<&str> = self.weekdays.iter().map(|d| weekday_code(*d)).collect();
            rule.push_str(&format!(";BYDAY={}", days.join(",")));
        }
        format!(
            "DTSTART:{}\nRRULE:{}",
            self.dtstart.format(INSTANT_FORMAT),
            rule
        )
    }

    pub fn validate(&self) -> Result<(), CoreError> {
        if self.interval == 0 {
            return Err(CoreError::InvalidRule("INTERVAL must be >= 1".to_string()));
        }
        if self.count == Some(0) {
            return Err(CoreError::InvalidRule("COUNT must be >= 1".to_string()));
        }
        if self.count.is_some() && self.until.is_some() {
            return Err(CoreError::InvalidRule(
                "COUNT and UNTIL are mutually exclusive".to_string(),
            ));
        }
        if let Some(until) = self.until {
            if until < self.dtstart {
                return Err(CoreError::InvalidRule(
                    "UNTIL precedes DTSTART".to_string(),
                ));
            }
        }
        // Final authority on the grammar is the rrule parser itself.
        self.rrule_set().map(|_| ())
    }

    pub fn is_unbounded(&self) -> bool {
        self.until.is_none() && self.count.is_none()
    }

    /// All occurrence instants inside the closed window `[start, end]`,
    /// ascending.
    pub fn occurrences_between(
        &self,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<DateTime<Utc>>, CoreError> {
        if end < start {
            return Err(CoreError::InvalidInput(
                "window end precedes window start".to_string(),
            ));
        }
        Ok(self
            .iter_capped()?
            .take_while(|dt| *dt <= end)
            .filter(|dt| *dt >= start)
            .collect())
    }

    /// Whether the rule produces an occurrence exactly at `at`.
    pub fn occurs_on(&self, at: DateTime<Utc>) -> Result<bool, CoreError> {
        Ok(self
            .iter_capped()?
            .take_while(|dt| *dt <= at)
            .any(|dt| dt == at))
    }

    /// Latest occurrence strictly before `at`: the pivot for series splits.
    pub fn last_before(&self, at: DateTime<Utc>) -> Result<Option<DateTime<Utc>>, CoreError> {
        Ok(self.iter_capped()?.take_while(|dt| *dt < at).last())
    }

    pub fn first_occurrence(&self) -> Result<Option<DateTime<Utc>>, CoreError> {
        Ok(self.iter_capped()?.next())
    }

    /// Final occurrence of a bounded rule; None when unbounded.
    pub fn last_occurrence(&self) -> Result<Option<DateTime<Utc>>, CoreError> {
        if self.is_unbounded() {
            return Ok(None);
        }
        Ok(self.iter_capped()?.last())
    }

    /// Field-wise rebuild for scoped edits: every field not supplied in
    /// `changes` is inherited from the current rule.
    pub fn apply(&self, changes: &SeriesChanges) -> Self {
        let mut next = self.clone();
        if let Some(starts_at) = changes.starts_at {
            next.dtstart = starts_at;
        }
        if let Some(freq) = changes.freq {
            next.freq = freq;
        }
        if let Some(interval) = changes.interval {
            next.interval = interval;
        }
        if let Some(weekdays) = &changes.weekdays {
            next.weekdays = weekdays.clone();
        }
        if let Some(count) = changes.count {
            next.count = count;
            if count.is_some() {
                next.until = None;
            }
        }
        if let Some(ends_at) = changes.ends_at {
            // An explicit end (or explicit unbounding) supersedes COUNT.
            next.until = ends_at;
            next.count = None;
        }
        next
    }

    /// The truncated head of a split series: bounded at `until`, COUNT
    /// replaced by the explicit end.
    pub fn truncated_at(&self, until: DateTime<Utc>) -> Self {
        let mut next = self.clone();
        next.count = None;
        next.until = Some(until);
        next
    }

    fn rrule_set(&self) -> Result<RRuleSet, CoreError> {
        self.to_rule_string()
            .parse::<RRuleSet>()
            .map_err(|e| CoreError::InvalidRule(e.to_string()))
    }

    fn iter_capped(&self) -> Result<impl Iterator<Item = DateTime<Utc>>, CoreError> {
        let set = self.rrule_set()?;
        let dates: Vec<DateTime<Utc>> = set
            .into_iter()
            .take(EXPANSION_LIMIT)
            .map(|dt| dt.with_timezone(&Utc))
            .collect();
        Ok(dates.into_iter())
    }
}

fn parse_instant(raw: &str) -> Result<DateTime<Utc>, CoreError> {
    NaiveDateTime::parse_from_str(raw, INSTANT_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|_| CoreError::InvalidRule(format!("bad instant: {raw}")))
}

fn weekday_code(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "MO",
        Weekday::Tue => "TU",
        Weekday::Wed => "WE",
        Weekday::Thu => "TH",
        Weekday::Fri => "FR",
        Weekday::Sat => "SA",
        Weekday::Sun => "SU",
    }
}

fn weekday_from_code(code: &str) -> Option<Weekday> {
    match code {
        "MO" => Some(Weekday::Mon),
        "TU" => Some(Weekday::Tue),
        "WE" => Some(Weekday::Wed),
        "TH" => Some(Weekday::Thu),
        "FR" => Some(Weekday::Fri),
        "SA" => Some(Weekday::Sat),
        "SU" => Some(Weekday::Sun),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn instant(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 9, 0, 0).unwrap()
    }

    fn weekly_from_jan_first() -> RuleSpec {
        RuleSpec {
            dtstart: instant(2024, 1, 1),
            freq: Frequency::Weekly,
            interval: 1,
            until: None,
            count: None,
            weekdays: vec![],
        }
    }

    #[test]
    fn test_round_trip_preserves_fields() {
        let spec = RuleSpec {
            dtstart: instant(2024, 1, 1),
            freq: Frequency::Weekly,
            interval: 2,
            until: Some(instant(2024, 6, 3)),
            count: None,
            weekdays: vec![Weekday::Mon, Weekday::Wed],
        };
        let parsed = RuleSpec::parse(&spec.to_rule_string()).unwrap();
        assert_eq!(parsed, spec);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            RuleSpec::parse("not a rule"),
            Err(CoreError::InvalidRule(_))
        ));
        assert!(matches!(
            RuleSpec::parse("DTSTART:20240101T090000Z\nRRULE:INTERVAL=1"),
            Err(CoreError::InvalidRule(_))
        ));
        assert!(matches!(
            RuleSpec::parse("DTSTART:20240101T090000Z\nRRULE:FREQ=WEEKLY;BYDAY=XX"),
            Err(CoreError::InvalidRule(_))
        ));
    }

    #[test]
    fn test_parse_stored_maps_to_invariant_violation() {
        assert!(matches!(
            RuleSpec::parse_stored("corrupted"),
            Err(CoreError::InvariantViolation(_))
        ));
    }

    #[test]
    fn test_weekly_expansion_in_window() {
        // 2024-01-01 is a Monday.
        let spec = weekly_from_jan_first();
        let got = spec
            .occurrences_between(instant(2024, 1, 1), instant(2024, 1, 31))
            .unwrap();
        assert_eq!(
            got,
            vec![
                instant(2024, 1, 1),
                instant(2024, 1, 8),
                instant(2024, 1, 15),
                instant(2024, 1, 22),
                instant(2024, 1, 29),
            ]
        );
    }

    #[rstest]
    #[case(vec![Weekday::Mon, Weekday::Wed], vec![1, 3, 8, 10])]
    #[case(vec![Weekday::Fri], vec![5, 12])]
    fn test_byday_expansion(#[case] weekdays: Vec<Weekday>, #[case] expected_days: Vec<u32>) {
        let spec = RuleSpec {
            weekdays,
            ..weekly_from_jan_first()
        };
        let got = spec
            .occurrences_between(instant(2024, 1, 1), instant(2024, 1, 14))
            .unwrap();
        let expected: Vec<_> = expected_days.into_iter().map(|d| instant(2024, 1, d)).collect();
        assert_eq!(got, expected);
    }

    #[rstest]
    #[case(instant(2024, 1, 15), Some(instant(2024, 1, 8)))]
    #[case(instant(2024, 1, 16), Some(instant(2024, 1, 15)))]
    #[case(instant(2024, 1, 1), None)]
    fn test_last_before(#[case] at: DateTime<Utc>, #[case] expected: Option<DateTime<Utc>>) {
        let spec = weekly_from_jan_first();
        assert_eq!(spec.last_before(at).unwrap(), expected);
    }

    #[test]
    fn test_occurs_on() {
        let spec = weekly_from_jan_first();
        assert!(spec.occurs_on(instant(2024, 1, 15)).unwrap());
        assert!(!spec.occurs_on(instant(2024, 1, 16)).unwrap());
    }

    #[test]
    fn test_count_bounds_expansion() {
        let spec = RuleSpec {
            count: Some(3),
            ..weekly_from_jan_first()
        };
        let got = spec
            .occurrences_between(instant(2024, 1, 1), instant(2024, 12, 31))
            .unwrap();
        assert_eq!(got.len(), 3);
        assert_eq!(spec.last_occurrence().unwrap(), Some(instant(2024, 1, 15)));
    }

    #[test]
    fn test_unbounded_has_no_last_occurrence() {
        let spec = weekly_from_jan_first();
        assert_eq!(spec.last_occurrence().unwrap(), None);
    }

    #[test]
    fn test_truncated_at_replaces_count_with_until() {
        let spec = RuleSpec {
            count: Some(10),
            ..weekly_from_jan_first()
        };
        let truncated = spec.truncated_at(instant(2024, 1, 15));
        assert_eq!(truncated.count, None);
        assert_eq!(truncated.until, Some(instant(2024, 1, 15)));
        assert_eq!(
            truncated.last_occurrence().unwrap(),
            Some(instant(2024, 1, 15))
        );
    }

    #[test]
    fn test_apply_inherits_unsupplied_fields() {
        let spec = RuleSpec {
            interval: 2,
            weekdays: vec![Weekday::Mon],
            ..weekly_from_jan_first()
        };
        let changes = SeriesChanges {
            freq: Some(Frequency::Daily),
            weekdays: Some(vec![]),
            ..Default::default()
        };
        let next = spec.apply(&changes);
        assert_eq!(next.freq, Frequency::Daily);
        assert_eq!(next.interval, 2);
        assert!(next.weekdays.is_empty());
        assert_eq!(next.dtstart, spec.dtstart);
    }

    #[test]
    fn test_apply_count_and_until_stay_exclusive() {
        let bounded = RuleSpec {
            until: Some(instant(2024, 6, 3)),
            ..weekly_from_jan_first()
        };
        let counted = bounded.apply(&SeriesChanges {
            count: Some(Some(5)),
            ..Default::default()
        });
        assert_eq!(counted.count, Some(5));
        assert_eq!(counted.until, None);

        let reopened = counted.apply(&SeriesChanges {
            ends_at: Some(None),
            ..Default::default()
        });
        assert_eq!(reopened.until, None);
        assert_eq!(reopened.count, None);
        assert!(reopened.is_unbounded());
    }
}
