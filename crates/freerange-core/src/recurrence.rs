//! Recurrence rules.
//!
//! Rules are fixed intervals written as `<integer><unit>` with unit one of
//! `s`, `m`, `h`, `d`: `"30s"`, `"5m"`, `"2h"`, `"1d"`. The rule field on a
//! notification stays a plain string so richer grammars can be introduced
//! without a document migration.

use chrono::{DateTime, Duration, Utc};

use crate::error::NotifyError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecurrenceRule {
    seconds: u64,
}

impl RecurrenceRule {
    pub fn parse(rule: &str) -> Result<Self, NotifyError> {
        let rule = rule.trim();
        if rule.len() < 2 {
            return Err(NotifyError::validation(format!(
                "invalid recurrence rule: {:?}",
                rule
            )));
        }
        let (number, unit) = rule.split_at(rule.len() - 1);
        let value: u64 = number.parse().map_err(|_| {
            NotifyError::validation(format!("invalid recurrence interval: {:?}", rule))
        })?;
        if value == 0 {
            return Err(NotifyError::validation("recurrence interval must be positive"));
        }
        let seconds = match unit {
            "s" => value,
            "m" => value * 60,
            "h" => value * 3600,
            "d" => value * 86_400,
            _ => {
                return Err(NotifyError::validation(format!(
                    "unknown recurrence unit in {:?} (expected s, m, h, or d)",
                    rule
                )))
            }
        };
        Ok(Self { seconds })
    }

    pub fn interval(&self) -> Duration {
        Duration::seconds(self.seconds as i64)
    }

    /// The next run, strictly after `after`.
    pub fn next_run(&self, after: DateTime<Utc>) -> DateTime<Utc> {
        after + self.interval()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_all_units() {
        assert_eq!(RecurrenceRule::parse("30s").unwrap().seconds, 30);
        assert_eq!(RecurrenceRule::parse("5m").unwrap().seconds, 300);
        assert_eq!(RecurrenceRule::parse("2h").unwrap().seconds, 7200);
        assert_eq!(RecurrenceRule::parse("1d").unwrap().seconds, 86_400);
    }

    #[test]
    fn rejects_garbage() {
        for bad in ["", "s", "5", "5w", "-5s", "0m", "5 m"] {
            assert!(RecurrenceRule::parse(bad).is_err(), "accepted {:?}", bad);
        }
    }

    #[test]
    fn next_run_is_strictly_after() {
        let rule = RecurrenceRule::parse("5s").unwrap();
        let now = Utc::now();
        assert_eq!(rule.next_run(now), now + Duration::seconds(5));
    }
}
