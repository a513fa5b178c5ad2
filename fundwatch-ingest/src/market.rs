//! B3 market calendar.
//!
//! Pure predicates over UTC instants, evaluated in São Paulo local time.
//! Exchange holidays are not modelled; on a holiday the gated categories simply
//! collect unchanged data.

use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::America::Sao_Paulo;
use chrono_tz::Tz;

/// Trading session start (local).
const SESSION_OPEN: (u32, u32) = (10, 0);
/// Trading session end (local), exclusive.
const SESSION_CLOSE: (u32, u32) = (18, 0);
/// End-of-day snapshot window start (local).
const EOD_START: (u32, u32) = (18, 30);
/// End-of-day snapshot window end (local), exclusive.
const EOD_END: (u32, u32) = (20, 0);

fn local(now: DateTime<Utc>) -> DateTime<Tz> {
    now.with_timezone(&Sao_Paulo)
}

fn is_weekday(day: Weekday) -> bool {
    !matches!(day, Weekday::Sat | Weekday::Sun)
}

fn hm(hour_minute: (u32, u32)) -> NaiveTime {
    NaiveTime::from_hms_opt(hour_minute.0, hour_minute.1, 0).unwrap_or(NaiveTime::MIN)
}

fn within(now: DateTime<Utc>, start: (u32, u32), end: (u32, u32)) -> bool {
    let local = local(now);
    if !is_weekday(local.weekday()) {
        return false;
    }
    let time = local.time();
    time >= hm(start) && time < hm(end)
}

/// Whether the exchange is in its regular session.
pub fn business_hours(now: DateTime<Utc>) -> bool {
    within(now, SESSION_OPEN, SESSION_CLOSE)
}

/// Whether the end-of-day snapshot may run.
pub fn eod_window(now: DateTime<Utc>) -> bool {
    within(now, EOD_START, EOD_END)
}

/// Always-open gate, used when gating is forced off.
pub fn always(_now: DateTime<Utc>) -> bool {
    true
}

/// Trading date an instant belongs to (São Paulo calendar date).
pub fn trade_date(now: DateTime<Utc>) -> NaiveDate {
    local(now).date_naive()
}
