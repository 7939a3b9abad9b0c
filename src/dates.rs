use chrono::{Datelike, Duration, Local, NaiveDate};

/// Layouts the portal has been observed to use for due/completed dates.
const DATE_FORMATS: [&str; 2] = ["%Y-%m-%d", "%m/%d/%Y"];

/// Where "overdue" starts for work that is already due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverduePolicy {
    /// Due strictly before today.
    #[default]
    BeforeToday,
    /// Due strictly before seven days ago.
    WeekLate,
}

impl OverduePolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BeforeToday => "beforeToday",
            Self::WeekLate => "weekLate",
        }
    }
}

/// Calendar arithmetic anchored on one local day. Time of day is ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Calendar {
    today: NaiveDate,
    overdue: OverduePolicy,
}

impl Calendar {
    pub fn local() -> Self {
        Self::on(Local::now().date_naive())
    }

    pub fn on(today: NaiveDate) -> Self {
        Self {
            today,
            overdue: OverduePolicy::default(),
        }
    }

    pub fn with_overdue_policy(mut self, policy: OverduePolicy) -> Self {
        self.overdue = policy;
        self
    }

    pub fn overdue_policy(&self) -> OverduePolicy {
        self.overdue
    }

    pub fn today(&self) -> NaiveDate {
        self.today
    }

    pub fn tomorrow(&self) -> NaiveDate {
        self.in_days(1)
    }

    pub fn yesterday(&self) -> NaiveDate {
        self.ago(1)
    }

    pub fn ago(&self, days: i64) -> NaiveDate {
        self.in_days(-days)
    }

    pub fn in_days(&self, days: i64) -> NaiveDate {
        self.today + Duration::days(days)
    }

    /// Monday on or before today.
    pub fn this_week(&self) -> NaiveDate {
        // Sunday-based numbering: Monday is 1, so Sunday yields +1 and has to
        // wrap back to the previous Monday.
        let weekday = self.today.weekday().num_days_from_sunday() as i64;
        let mut offset = 1 - weekday;
        if offset > 0 {
            offset = -6;
        }
        self.in_days(offset)
    }

    pub fn next_week(&self) -> NaiveDate {
        self.this_week() + Duration::days(7)
    }

    pub fn overdue_boundary(&self) -> NaiveDate {
        match self.overdue {
            OverduePolicy::BeforeToday => self.today(),
            OverduePolicy::WeekLate => self.ago(7),
        }
    }
}

/// Parse a portal date. Anything that matches neither layout is absent.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(s, fmt).ok())
}

/// `date < bound`, where an absent date sits before every day.
pub fn is_before(date: Option<NaiveDate>, bound: NaiveDate) -> bool {
    match date {
        Some(d) => d < bound,
        None => true,
    }
}

/// `date > bound`, where an absent date is never after anything.
pub fn is_after(date: Option<NaiveDate>, bound: NaiveDate) -> bool {
    match date {
        Some(d) => d > bound,
        None => false,
    }
}

/// `start <= date < end`.
pub fn is_within(date: Option<NaiveDate>, start: NaiveDate, end: NaiveDate) -> bool {
    match date {
        Some(d) => start <= d && d < end,
        None => false,
    }
}
