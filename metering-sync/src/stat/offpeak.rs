use time::{PrimitiveDateTime, Time};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid off-peak range {0:?}, expected HH:MM-HH:MM")]
pub struct OffpeakParseError(pub String);

/// Off-peak ("heures creuses") ranges per weekday, Monday first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OffpeakSchedule {
    days: [Vec<(Time, Time)>; 7],
}

impl OffpeakSchedule {
    /// Parse one optional `"22:00-06:00;12:00-14:00"` string per weekday.
    pub fn parse(days: &[Option<String>; 7]) -> Result<Self, OffpeakParseError> {
        let mut schedule = Self::default();
        for (slot, raw) in schedule.days.iter_mut().zip(days) {
            if let Some(raw) = raw {
                *slot = parse_day(raw)?;
            }
        }
        Ok(schedule)
    }

    /// Whether an interval starting at `ts` is off-peak. Ranges are
    /// `[from, to)` and may wrap past midnight; `from == to` is the whole day.
    pub fn is_offpeak(&self, ts: PrimitiveDateTime) -> bool {
        let t = ts.time();
        self.days[usize::from(ts.weekday().number_days_from_monday())]
            .iter()
            .any(|&(from, to)| {
                if from < to {
                    from <= t && t < to
                } else if to < from {
                    t >= from || t < to
                } else {
                    true
                }
            })
    }
}

fn parse_day(raw: &str) -> Result<Vec<(Time, Time)>, OffpeakParseError> {
    raw.split([';', ','])
        .map(str::trim)
        .filter(|range| !range.is_empty())
        .map(|range| {
            let (from, to) = range
                .split_once('-')
                .ok_or_else(|| OffpeakParseError(range.to_string()))?;
            Ok((parse_time(from, range)?, parse_time(to, range)?))
        })
        .collect()
}

fn parse_time(raw: &str, range: &str) -> Result<Time, OffpeakParseError> {
    let err = || OffpeakParseError(range.to_string());
    let (hour, minute) = raw.trim().split_once([':', 'h', 'H']).ok_or_else(err)?;
    let hour: u8 = hour.trim().parse().map_err(|_| err())?;
    let minute: u8 = if minute.trim().is_empty() { 0 } else { minute.trim().parse().map_err(|_| err())? };
    if hour == 24 && minute == 0 {
        return Ok(Time::MIDNIGHT);
    }
    Time::from_hms(hour, minute, 0).map_err(|_| err())
}
