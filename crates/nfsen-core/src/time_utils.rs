use chrono::{Local, Months, NaiveDate};

// ── Day arithmetic ─────────────────────────────────────────────────────────────

/// The current calendar day in local time, which is how the capture tool names
/// its day directories.
pub fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Start of an import that looks back `years` from `today`.
///
/// February 29th clamps to February 28th in non-leap target years.
pub fn lookback_start(today: NaiveDate, years: u32) -> NaiveDate {
    today
        .checked_sub_months(Months::new(years.saturating_mul(12)))
        .unwrap_or(NaiveDate::MIN)
}

/// Later of the requested start and the day after the checkpoint.
pub fn resume_start(requested: NaiveDate, checkpoint: Option<NaiveDate>) -> NaiveDate {
    match checkpoint.and_then(|c| c.succ_opt()) {
        Some(next) if next > requested => next,
        _ => requested,
    }
}

// ── DayRange ───────────────────────────────────────────────────────────────────

/// Inclusive, ascending range of calendar days.
///
/// Empty when `start > end`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayRange {
    next: Option<NaiveDate>,
    end: NaiveDate,
}

impl DayRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            next: (start <= end).then_some(start),
            end,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.next.is_none()
    }
}

impl Iterator for DayRange {
    type Item = NaiveDate;

    fn next(&mut self) -> Option<NaiveDate> {
        let current = self.next?;
        self.next = current.succ_opt().filter(|d| *d <= self.end);
        Some(current)
    }
}
