//! Trailing time windows such as `7D`, `1M` or `2Y`.
//!
//! Filtering fails open: an expression that cannot be applied leaves the series
//! untouched and the outcome says why.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset, Months, TimeDelta};
use thiserror::Error;
use tracing::{info, warn};

use crate::series::TimeSeries;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WindowParseError {
    #[error("empty time filter")]
    Empty,
    #[error("unknown unit '{0}', expected D, M or Y")]
    UnknownUnit(char),
    #[error("'{0}' is not a non-negative integer")]
    InvalidAmount(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowUnit {
    Days,
    Months,
    Years,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeWindow {
    pub amount: u32,
    pub unit: WindowUnit,
}

impl FromStr for TimeWindow {
    type Err = WindowParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let suffix = s.chars().last().ok_or(WindowParseError::Empty)?;
        let unit = match suffix.to_ascii_uppercase() {
            'D' => WindowUnit::Days,
            'M' => WindowUnit::Months,
            'Y' => WindowUnit::Years,
            other => return Err(WindowParseError::UnknownUnit(other)),
        };

        let amount_text = s[..s.len() - suffix.len_utf8()].trim();
        let amount = amount_text
            .parse::<u32>()
            .map_err(|_| WindowParseError::InvalidAmount(amount_text.to_string()))?;

        Ok(Self { amount, unit })
    }
}

impl fmt::Display for TimeWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let unit = match self.unit {
            WindowUnit::Days => 'D',
            WindowUnit::Months => 'M',
            WindowUnit::Years => 'Y',
        };
        write!(f, "{}{}", self.amount, unit)
    }
}

impl TimeWindow {
    /// Start of the window ending at `end`. Days are fixed 24h spans; months and
    /// years are calendar steps with the day clamped to the target month.
    pub fn start_for(&self, end: DateTime<FixedOffset>) -> Option<DateTime<FixedOffset>> {
        match self.unit {
            WindowUnit::Days => end.checked_sub_signed(TimeDelta::try_days(i64::from(self.amount))?),
            WindowUnit::Months => end.checked_sub_months(Months::new(self.amount)),
            WindowUnit::Years => end.checked_sub_months(Months::new(self.amount.checked_mul(12)?)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WindowOutcome {
    Filtered {
        series: TimeSeries,
        window: TimeWindow,
        /// `None` when the input series was empty.
        start: Option<DateTime<FixedOffset>>,
        end: Option<DateTime<FixedOffset>>,
    },
    Ignored {
        series: TimeSeries,
        reason: String,
    },
}

impl WindowOutcome {
    pub fn series(&self) -> &TimeSeries {
        match self {
            WindowOutcome::Filtered { series, .. } | WindowOutcome::Ignored { series, .. } => series,
        }
    }

    pub fn into_series(self) -> TimeSeries {
        match self {
            WindowOutcome::Filtered { series, .. } | WindowOutcome::Ignored { series, .. } => series,
        }
    }

    pub fn is_filtered(&self) -> bool {
        matches!(self, WindowOutcome::Filtered { .. })
    }
}

pub fn apply_time_filter(series: TimeSeries, expression: &str) -> WindowOutcome {
    let window = match expression.parse::<TimeWindow>() {
        Ok(window) => window,
        Err(err) => {
            let reason = format!("invalid time filter format '{}': {}", expression, err);
            warn!(%reason, "using all data");
            return WindowOutcome::Ignored { series, reason };
        }
    };

    let Some(end) = series.max_timestamp() else {
        return WindowOutcome::Filtered {
            series,
            window,
            start: None,
            end: None,
        };
    };

    let Some(start) = window.start_for(end) else {
        let reason = format!("time filter '{}' reaches outside the supported date range", window);
        warn!(%reason, "using all data");
        return WindowOutcome::Ignored { series, reason };
    };

    let filtered = series.since(start);
    info!(
        %window,
        start = %start,
        end = %end,
        kept = filtered.len(),
        dropped = series.len() - filtered.len(),
        "data filtered"
    );

    WindowOutcome::Filtered {
        series: filtered,
        window,
        start: Some(start),
        end: Some(end),
    }
}
