use time::{error::ComponentRange, util, Date, Duration, Month};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodKind {
    /// ISO week, Monday to Sunday.
    Week,
    Month,
    Year,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeriodOffset {
    /// From the start of the period containing today up to today.
    Current,
    /// The whole period before the current one.
    Previous,
    /// `Current`, one year earlier.
    CurrentLastYear,
    /// `Previous`, one year earlier.
    PreviousLastYear,
}

impl PeriodOffset {
    fn year_shifted(self) -> bool {
        matches!(self, Self::CurrentLastYear | Self::PreviousLastYear)
    }
}

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateSpan {
    pub first: Date,
    pub last: Date,
}

pub fn period_span(kind: PeriodKind, offset: PeriodOffset, today: Date) -> Result<DateSpan, ComponentRange> {
    let start = period_start(kind, today)?;
    let span = match offset {
        PeriodOffset::Current | PeriodOffset::CurrentLastYear => DateSpan { first: start, last: today },
        PeriodOffset::Previous | PeriodOffset::PreviousLastYear => {
            let last = start.saturating_sub(Duration::days(1));
            DateSpan {
                first: period_start(kind, last)?,
                last,
            }
        }
    };

    if !offset.year_shifted() {
        return Ok(span);
    }
    Ok(DateSpan {
        first: shift_back_one_year(kind, span.first)?,
        last: shift_back_one_year(kind, span.last)?,
    })
}

fn period_start(kind: PeriodKind, day: Date) -> Result<Date, ComponentRange> {
    match kind {
        PeriodKind::Week => Ok(day.saturating_sub(Duration::days(i64::from(
            day.weekday().number_days_from_monday(),
        )))),
        PeriodKind::Month => day.replace_day(1),
        PeriodKind::Year => Date::from_calendar_date(day.year(), Month::January, 1),
    }
}

/// Same position one year earlier. Weeks keep their ISO week number and
/// weekday; months and years keep month and day, clamped to the month length.
pub fn shift_back_one_year(kind: PeriodKind, day: Date) -> Result<Date, ComponentRange> {
    match kind {
        PeriodKind::Week => {
            let (year, week, weekday) = day.to_iso_week_date();
            let week = week.min(util::weeks_in_year(year - 1));
            Date::from_iso_week_date(year - 1, week, weekday)
        }
        PeriodKind::Month | PeriodKind::Year => {
            let year = day.year() - 1;
            let max_day = day.month().length(year);
            Date::from_calendar_date(year, day.month(), day.day().min(max_day))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn current_week_starts_on_monday() {
        // 2024-03-14 is a Thursday.
        let span = period_span(PeriodKind::Week, PeriodOffset::Current, date!(2024 - 03 - 14)).unwrap();
        assert_eq!(span, DateSpan { first: date!(2024 - 03 - 11), last: date!(2024 - 03 - 14) });
    }

    #[test]
    fn previous_week_is_monday_to_sunday() {
        let span = period_span(PeriodKind::Week, PeriodOffset::Previous, date!(2024 - 03 - 11)).unwrap();
        assert_eq!(span, DateSpan { first: date!(2024 - 03 - 04), last: date!(2024 - 03 - 10) });
    }

    #[test]
    fn previous_month_covers_a_leap_february() {
        let span = period_span(PeriodKind::Month, PeriodOffset::Previous, date!(2024 - 03 - 14)).unwrap();
        assert_eq!(span, DateSpan { first: date!(2024 - 02 - 01), last: date!(2024 - 02 - 29) });
    }

    #[test]
    fn previous_month_crosses_year_boundary() {
        let span = period_span(PeriodKind::Month, PeriodOffset::Previous, date!(2024 - 01 - 05)).unwrap();
        assert_eq!(span, DateSpan { first: date!(2023 - 12 - 01), last: date!(2023 - 12 - 31) });
    }

    #[test]
    fn year_shift_clamps_leap_day() {
        let span = period_span(PeriodKind::Month, PeriodOffset::CurrentLastYear, date!(2024 - 02 - 29)).unwrap();
        assert_eq!(span, DateSpan { first: date!(2023 - 02 - 01), last: date!(2023 - 02 - 28) });
    }

    #[test]
    fn previous_year_last_year_is_two_years_back() {
        let span = period_span(PeriodKind::Year, PeriodOffset::PreviousLastYear, date!(2024 - 06 - 01)).unwrap();
        assert_eq!(span, DateSpan { first: date!(2022 - 01 - 01), last: date!(2022 - 12 - 31) });
    }

    #[test]
    fn week_last_year_keeps_iso_week_and_weekday() {
        // Thursday of ISO week 11 of 2024 -> Thursday of ISO week 11 of 2023.
        let span = period_span(PeriodKind::Week, PeriodOffset::CurrentLastYear, date!(2024 - 03 - 14)).unwrap();
        assert_eq!(span, DateSpan { first: date!(2023 - 03 - 13), last: date!(2023 - 03 - 16) });
    }

    #[test]
    fn week_53_falls_back_to_week_52() {
        // 2020-12-31 is in ISO week 53 of 2020; 2019 only has 52 weeks.
        let shifted = shift_back_one_year(PeriodKind::Week, date!(2020 - 12 - 31)).unwrap();
        assert_eq!(shifted, date!(2019 - 12 - 26));
    }
}
