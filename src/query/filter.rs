use std::path::{Path, PathBuf};

use chrono::{DateTime, Local, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::event::ChangeEvent;

/// Inclusive range of calendar days in the local time zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Open ends reach back to the Unix epoch or forward to the year 9999.
    pub fn from_bounds(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Option<Self> {
        if start.is_none() && end.is_none() {
            return None;
        }
        let earliest = NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(NaiveDate::MIN);
        let latest = NaiveDate::from_ymd_opt(9999, 12, 31).unwrap_or(NaiveDate::MAX);
        Some(Self::new(start.unwrap_or(earliest), end.unwrap_or(latest)))
    }

    /// Local 00:00:00.000 of `start` through local 23:59:59.999 of `end`, as UTC instants.
    pub fn instants(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        let from = self.start.and_hms_milli_opt(0, 0, 0, 0);
        let to = self.end.and_hms_milli_opt(23, 59, 59, 999);
        (
            from.map(|naive| local_to_utc(naive, false))
                .unwrap_or(DateTime::<Utc>::MIN_UTC),
            to.map(|naive| local_to_utc(naive, true))
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        )
    }
}

/// Resolve a local wall-clock time, taking the wider side of DST folds.
/// Times that do not exist locally are read as UTC.
fn local_to_utc(naive: NaiveDateTime, latest: bool) -> DateTime<Utc> {
    let local = Local.from_local_datetime(&naive);
    let picked = if latest {
        local.latest()
    } else {
        local.earliest()
    };
    picked
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|| naive.and_utc())
}

/// Criteria for selecting events. Every set criterion must match.
#[derive(Debug, Clone, Default)]
pub struct QueryFilter {
    pub date_range: Option<DateRange>,
    /// A file or directory, absolute or relative to the project root.
    /// The project root itself, or an absolute path outside it, means
    /// "no path restriction".
    pub focused_path: Option<PathBuf>,
    /// Case-insensitive substring of the path or user.
    pub search_term: Option<String>,
}

/// A `QueryFilter` prepared for one project: instants computed, path made
/// relative, search term lowercased.
#[derive(Debug)]
pub(crate) struct EventMatcher {
    window: Option<(DateTime<Utc>, DateTime<Utc>)>,
    prefix: Option<PathBuf>,
    term: Option<String>,
}

impl EventMatcher {
    pub(crate) fn new(filter: &QueryFilter, project_path: &Path) -> Self {
        let prefix = filter.focused_path.as_deref().and_then(|focused| {
            let relative = if focused.is_absolute() {
                focused.strip_prefix(project_path).ok()?
            } else {
                focused
            };
            (!relative.as_os_str().is_empty()).then(|| relative.to_path_buf())
        });
        let term = filter
            .search_term
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        Self {
            window: filter.date_range.as_ref().map(DateRange::instants),
            prefix,
            term,
        }
    }

    pub(crate) fn matches(&self, event: &ChangeEvent) -> bool {
        if let Some((from, to)) = self.window
            && (event.timestamp < from || event.timestamp > to)
        {
            return false;
        }
        if let Some(prefix) = &self.prefix
            && !Path::new(&event.path).starts_with(prefix)
        {
            return false;
        }
        if let Some(term) = &self.term
            && !event.path.to_lowercase().contains(term)
            && !event.user.to_lowercase().contains(term)
        {
            return false;
        }
        true
    }
}
