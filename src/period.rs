use std::collections::HashSet;

use chrono::{Datelike, NaiveDateTime};

use crate::error::ConfigError;
use crate::models::Period;

pub const UNCLASSIFIED: &str = "unclassified";
pub const PRE_CRISIS: &str = "pre-crisis";
pub const CRISIS: &str = "crisis";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodLabel<'a> {
    Within(&'a str),
    Unclassified,
}

impl<'a> PeriodLabel<'a> {
    pub fn as_str(&self) -> &'a str {
        match self {
            PeriodLabel::Within(name) => *name,
            PeriodLabel::Unclassified => UNCLASSIFIED,
        }
    }

    pub fn is(&self, period_name: &str) -> bool {
        matches!(self, PeriodLabel::Within(name) if *name == period_name)
    }
}

/// First period containing the timestamp's (year, month), in the order given.
pub fn classify<'a>(timestamp: Option<NaiveDateTime>, periods: &'a [Period]) -> PeriodLabel<'a> {
    let Some(timestamp) = timestamp else {
        return PeriodLabel::Unclassified;
    };

    periods
        .iter()
        .find(|period| period.contains(timestamp.year(), timestamp.month()))
        .map(|period| PeriodLabel::Within(period.name.as_str()))
        .unwrap_or(PeriodLabel::Unclassified)
}

pub fn validate_periods(periods: &[Period]) -> Result<(), ConfigError> {
    let mut names = HashSet::new();

    for period in periods {
        if period.name.is_empty() || period.name == UNCLASSIFIED {
            return Err(ConfigError::ReservedPeriodName(period.name.clone()));
        }
        if !names.insert(period.name.as_str()) {
            return Err(ConfigError::DuplicatePeriod(period.name.clone()));
        }
        if !(1..=12).contains(&period.month_start)
            || !(1..=12).contains(&period.month_end)
            || period.month_start > period.month_end
        {
            return Err(ConfigError::InvalidMonthRange {
                name: period.name.clone(),
                start: period.month_start,
                end: period.month_end,
            });
        }
    }

    for (index, first) in periods.iter().enumerate() {
        for second in &periods[index + 1..] {
            let overlaps = first.year == second.year
                && first.month_start <= second.month_end
                && second.month_start <= first.month_end;
            if overlaps {
                return Err(ConfigError::OverlappingPeriods {
                    first: first.name.clone(),
                    second: second.name.clone(),
                });
            }
        }
    }

    Ok(())
}

/// Parses `YEAR:START-END` (or `YEAR:MONTH`) into a named period.
pub fn parse_window(name: &str, window: &str) -> Result<Period, ConfigError> {
    let invalid = || ConfigError::InvalidWindow(window.to_string());

    let (year, months) = window.trim().split_once(':').ok_or_else(invalid)?;
    let year: i32 = year.trim().parse().map_err(|_| invalid())?;
    let (start, end) = match months.split_once('-') {
        Some((start, end)) => (start, end),
        None => (months, months),
    };
    let start: u32 = start.trim().parse().map_err(|_| invalid())?;
    let end: u32 = end.trim().parse().map_err(|_| invalid())?;

    Ok(Period::new(name, year, start, end))
}

/// The baseline and crisis windows, validated as a disjoint pair.
#[derive(Debug, Clone, PartialEq)]
pub struct PeriodPair {
    periods: [Period; 2],
}

impl PeriodPair {
    pub fn new(pre: Period, crisis: Period) -> Result<Self, ConfigError> {
        let periods = [pre, crisis];
        validate_periods(&periods)?;
        Ok(Self { periods })
    }

    pub fn pre(&self) -> &Period {
        &self.periods[0]
    }

    pub fn crisis(&self) -> &Period {
        &self.periods[1]
    }

    pub fn all(&self) -> &[Period] {
        &self.periods
    }
}

impl Default for PeriodPair {
    fn default() -> Self {
        Self {
            periods: [
                Period::new(PRE_CRISIS, 2025, 1, 5),
                Period::new(CRISIS, 2025, 6, 9),
            ],
        }
    }
}
