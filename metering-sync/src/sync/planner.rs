use time::{Date, Duration};

/// How far back a series may be fetched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncBounds {
    /// Oldest day the operator allows to be requested or stored.
    pub retention_limit: Date,
    /// Oldest day the upstream guarantees data for, when known.
    pub activation_date: Option<Date>,
}

impl SyncBounds {
    pub fn new(today: Date, max_history_days: i64, activation_date: Option<Date>) -> Self {
        Self {
            retention_limit: today.saturating_sub(Duration::days(max_history_days.max(0))),
            activation_date,
        }
    }

    pub fn lower_bound(&self) -> Date {
        match self.activation_date {
            Some(activation) => self.retention_limit.max(activation),
            None => self.retention_limit,
        }
    }
}

/// A `[begin, end)` fetch window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub begin: Date,
    pub end: Date,
    /// No window follows this one.
    pub is_final: bool,
}

impl Window {
    pub fn days(&self) -> i64 {
        (self.end - self.begin).whole_days()
    }
}

/// Walks backward from `today + 2 days` in fixed chunks until the window
/// reaching the retention limit or activation date has been produced.
#[derive(Debug, Clone)]
pub struct TimeWindowPlanner {
    bounds: SyncBounds,
    chunk: Duration,
    next: Option<(Date, Date)>,
}

impl TimeWindowPlanner {
    pub fn new(today: Date, chunk_days: i64, bounds: SyncBounds) -> Self {
        let chunk = Duration::days(chunk_days.max(1));
        let end = today.saturating_add(Duration::days(2));
        let begin = end.saturating_sub(chunk);
        Self {
            bounds,
            chunk,
            next: Some((begin, end)),
        }
    }
}

impl TimeWindowPlanner {
    /// The bound a window starting at `begin` has to be clamped to, if any.
    fn clamp(&self, begin: Date) -> Option<Date> {
        if self.bounds.retention_limit > begin {
            Some(self.bounds.retention_limit)
        } else {
            self.bounds.activation_date.filter(|activation| *activation > begin)
        }
    }
}

impl Iterator for TimeWindowPlanner {
    type Item = Window;

    fn next(&mut self) -> Option<Window> {
        let (begin, end) = self.next.take()?;

        match self.clamp(begin) {
            // Only reachable for a first window lying entirely past the bound.
            Some(bound) if bound >= end => None,
            Some(bound) => Some(Window {
                begin: bound,
                end,
                is_final: true,
            }),
            None => {
                let next = (begin.saturating_sub(self.chunk), end.saturating_sub(self.chunk));
                // A bound sitting exactly on `begin` leaves nothing to fetch
                // before this window.
                let is_final = matches!(self.clamp(next.0), Some(bound) if bound >= next.1);
                if !is_final {
                    self.next = Some(next);
                }
                Some(Window { begin, end, is_final })
            }
        }
    }
}
