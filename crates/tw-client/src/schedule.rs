//! Polling schedules: numeric intervals and calendar specifications.
//!
//! A schedule is a list whose entries are either a positive interval in
//! seconds or a calendar spec whose fields are `*` or comma-separated
//! lists of integers and hyphenated ranges within the field's domain.

use serde::{Deserialize, Serialize};

use crate::error::{TwError, TwResult};

/// One schedule entry: a plain interval or a calendar specification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScheduleEntry {
    Interval(u64),
    Calendar(CalendarSpec),
}

/// A cron-style calendar spec. Omitted fields default to `*`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalendarSpec {
    #[serde(default = "star")]
    pub minutes: String,
    #[serde(default = "star")]
    pub hours: String,
    #[serde(default = "star")]
    pub days: String,
    #[serde(default = "star")]
    pub months: String,
    #[serde(default = "star")]
    pub weekdays: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timezone: Option<String>,
}

fn star() -> String {
    "*".to_string()
}

impl Default for CalendarSpec {
    fn default() -> Self {
        Self {
            minutes: star(),
            hours: star(),
            days: star(),
            months: star(),
            weekdays: star(),
            timezone: None,
        }
    }
}

impl CalendarSpec {
    fn validate(&self) -> TwResult<()> {
        validate_field("minutes", &self.minutes, 0, 59)?;
        validate_field("hours", &self.hours, 0, 23)?;
        validate_field("days", &self.days, 1, 31)?;
        validate_field("months", &self.months, 1, 12)?;
        validate_field("weekdays", &self.weekdays, 0, 6)?;
        if let Some(timezone) = &self.timezone {
            validate_timezone(timezone)?;
        }
        Ok(())
    }
}

/// The polling schedule attached to a polled query.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Schedule {
    pub entries: Vec<ScheduleEntry>,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    /// A schedule with a single interval entry.
    pub fn every_seconds(seconds: u64) -> Self {
        Self {
            entries: vec![ScheduleEntry::Interval(seconds)],
        }
    }

    pub fn push_interval(mut self, seconds: u64) -> Self {
        self.entries.push(ScheduleEntry::Interval(seconds));
        self
    }

    pub fn push_calendar(mut self, spec: CalendarSpec) -> Self {
        self.entries.push(ScheduleEntry::Calendar(spec));
        self
    }

    /// Check every entry against its domain.
    pub fn validate(&self) -> TwResult<()> {
        for entry in &self.entries {
            match entry {
                ScheduleEntry::Interval(0) => {
                    return Err(TwError::Schedule("interval must be positive".into()))
                }
                ScheduleEntry::Interval(_) => {}
                ScheduleEntry::Calendar(spec) => spec.validate()?,
            }
        }
        Ok(())
    }
}

/// A field is `*`, or a comma-separated list of integers and
/// hyphen-separated ranges, all within `[min, max]`.
fn validate_field(name: &str, field: &str, min: u32, max: u32) -> TwResult<()> {
    if field == "*" {
        return Ok(());
    }
    if field.is_empty() {
        return Err(TwError::Schedule(format!("{name} must not be empty")));
    }
    for item in field.split(',') {
        match item.split_once('-') {
            Some((low, high)) => {
                let low = parse_bounded(name, low, min, max)?;
                let high = parse_bounded(name, high, min, max)?;
                if low > high {
                    return Err(TwError::Schedule(format!(
                        "{name}: range {low}-{high} is inverted"
                    )));
                }
            }
            None => {
                parse_bounded(name, item, min, max)?;
            }
        }
    }
    Ok(())
}

fn parse_bounded(name: &str, item: &str, min: u32, max: u32) -> TwResult<u32> {
    let value: u32 = item
        .trim()
        .parse()
        .map_err(|_| TwError::Schedule(format!("{name}: '{item}' is not an integer")))?;
    if value < min || value > max {
        return Err(TwError::Schedule(format!(
            "{name}: {value} is outside {min}..{max}"
        )));
    }
    Ok(value)
}

/// A tz-database name: slash-separated segments of underscore-joined
/// alphabetic words, e.g. `America/New_York`.
fn validate_timezone(timezone: &str) -> TwResult<()> {
    let well_formed = !timezone.is_empty()
        && timezone.split('/').all(|segment| {
            !segment.is_empty()
                && segment.split('_').all(|word| {
                    !word.is_empty() && word.bytes().all(|b| b.is_ascii_alphabetic())
                })
        });
    if well_formed {
        Ok(())
    } else {
        Err(TwError::Schedule(format!(
            "'{timezone}' is not a valid timezone name"
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn interval_serializes_as_a_bare_number() {
        let schedule = Schedule::every_seconds(30);
        assert_eq!(serde_json::to_value(&schedule).unwrap(), json!([30]));
    }

    #[test]
    fn calendar_serializes_as_an_object() {
        let schedule = Schedule::new().push_calendar(CalendarSpec {
            minutes: "0,30".into(),
            hours: "9-17".into(),
            weekdays: "1-5".into(),
            timezone: Some("America/New_York".into()),
            ..CalendarSpec::default()
        });
        let value = serde_json::to_value(&schedule).unwrap();
        assert_eq!(value[0]["minutes"], "0,30");
        assert_eq!(value[0]["timezone"], "America/New_York");
        schedule.validate().unwrap();
    }

    #[test]
    fn mixed_entries_round_trip() {
        let schedule = Schedule::new()
            .push_interval(60)
            .push_calendar(CalendarSpec::default());
        let json = serde_json::to_string(&schedule).unwrap();
        let parsed: Schedule = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, schedule);
    }

    #[test]
    fn zero_interval_is_rejected() {
        let schedule = Schedule::every_seconds(0);
        assert!(matches!(schedule.validate(), Err(TwError::Schedule(_))));
    }

    #[test]
    fn out_of_domain_values_are_rejected() {
        for (field, value) in [
            ("minutes", "60"),
            ("hours", "24"),
            ("days", "0"),
            ("months", "13"),
            ("weekdays", "7"),
        ] {
            let mut spec = CalendarSpec::default();
            match field {
                "minutes" => spec.minutes = value.into(),
                "hours" => spec.hours = value.into(),
                "days" => spec.days = value.into(),
                "months" => spec.months = value.into(),
                _ => spec.weekdays = value.into(),
            }
            let schedule = Schedule::new().push_calendar(spec);
            assert!(
                matches!(schedule.validate(), Err(TwError::Schedule(_))),
                "{field}={value} should be rejected"
            );
        }
    }

    #[test]
    fn inverted_ranges_and_garbage_are_rejected() {
        let mut spec = CalendarSpec::default();
        spec.hours = "17-9".into();
        assert!(Schedule::new().push_calendar(spec).validate().is_err());

        let mut spec = CalendarSpec::default();
        spec.minutes = "1,foo".into();
        assert!(Schedule::new().push_calendar(spec).validate().is_err());
    }

    #[test]
    fn timezone_names() {
        for ok in ["UTC", "America/New_York", "America/Argentina/Buenos_Aires"] {
            let spec = CalendarSpec {
                timezone: Some(ok.into()),
                ..CalendarSpec::default()
            };
            assert!(Schedule::new().push_calendar(spec).validate().is_ok(), "{ok}");
        }
        for bad in ["", "America/", "/UTC", "UTC+1", "New York", "a__b"] {
            let spec = CalendarSpec {
                timezone: Some(bad.into()),
                ..CalendarSpec::default()
            };
            assert!(Schedule::new().push_calendar(spec).validate().is_err(), "{bad}");
        }
    }
}
