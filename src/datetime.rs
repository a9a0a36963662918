// Date and time handling functions
// Epoch seconds and "broken down time" arrays, both in UTC
//
// A broken down time is `[year, month (0-11), day of month, hours, minutes,
// seconds (with fraction), day of week (0 = Sunday), day of year (0-365)]`.

use std::fmt::Write;

use chrono::{DateTime, Datelike, NaiveDate, NaiveDateTime, NaiveTime, Timelike, Utc};

use crate::error::{EvalError, EvalResult};
use crate::value::Json;

const ISO8601: &str = "%Y-%m-%dT%H:%M:%SZ";

fn date_error(message: String, value: &Json) -> EvalError {
    EvalError::type_error(message, vec![value.clone()])
}

fn broken_down(dt: &NaiveDateTime, fraction: f64) -> Json {
    Json::array(vec![
        Json::from(dt.year() as i64),
        Json::from(dt.month0() as i64),
        Json::from(dt.day() as i64),
        Json::from(dt.hour() as i64),
        Json::from(dt.minute() as i64),
        Json::from(dt.second() as f64 + fraction),
        Json::from(dt.weekday().num_days_from_sunday() as i64),
        Json::from(dt.ordinal0() as i64),
    ])
}

fn from_epoch(input: &Json, name: &str) -> EvalResult<(NaiveDateTime, f64)> {
    let seconds = match input {
        Json::Number(n) if n.is_finite() => *n,
        other => {
            return Err(date_error(
                format!("{} requires parsed datetime inputs, not {}.", name, other.json_type()),
                other,
            ))
        }
    };
    let whole = seconds.floor();
    DateTime::from_timestamp(whole as i64, 0)
        .map(|dt| (dt.naive_utc(), seconds - whole))
        .ok_or_else(|| date_error(format!("{} is out of range for a date.", input), input))
}

fn from_broken_down(input: &Json, name: &str) -> EvalResult<NaiveDateTime> {
    let invalid = || date_error(format!("{} requires an array of 6 numbers.", name), input);
    let items = match input {
        Json::Array(items) if items.len() >= 6 => items,
        _ => return Err(invalid()),
    };
    let fields = items
        .iter()
        .take(6)
        .map(|item| item.as_f64().ok_or_else(invalid))
        .collect::<EvalResult<Vec<f64>>>()?;
    NaiveDate::from_ymd_opt(fields[0] as i32, fields[1] as u32 + 1, fields[2] as u32)
        .and_then(|date| date.and_hms_opt(fields[3] as u32, fields[4] as u32, fields[5] as u32))
        .ok_or_else(|| date_error(format!("{} is not a valid broken down time.", input), input))
}

/// Either form of time accepted by the formatting functions.
fn to_datetime(input: &Json, name: &str) -> EvalResult<NaiveDateTime> {
    match input {
        Json::Number(_) => from_epoch(input, name).map(|(dt, _)| dt),
        _ => from_broken_down(input, name),
    }
}

/// `now`
pub(crate) fn now(_input: Json) -> EvalResult<Json> {
    Ok(Json::from(Utc::now().timestamp_micros() as f64 / 1e6))
}

/// `mktime`: broken down time to whole epoch seconds.
pub(crate) fn mktime(input: Json) -> EvalResult<Json> {
    let dt = from_broken_down(&input, "mktime")?;
    Ok(Json::from(dt.and_utc().timestamp()))
}

/// `gmtime`: epoch seconds to broken down time.
pub(crate) fn gmtime(input: Json) -> EvalResult<Json> {
    let (dt, fraction) = from_epoch(&input, "gmtime")?;
    Ok(broken_down(&dt, fraction))
}

/// `strftime(fmt)`
pub(crate) fn strftime(input: Json, format: Json) -> EvalResult<Json> {
    let format = match &format {
        Json::String(f) => f.clone(),
        other => return Err(date_error("strftime/1 requires a string format.".to_string(), other)),
    };
    let dt = to_datetime(&input, "strftime/1")?;
    let mut out = String::new();
    write!(out, "{}", dt.format(&format))
        .map_err(|_| date_error(format!("{} is not a valid time format.", Json::String(format.clone())), &input))?;
    Ok(Json::from(out))
}

/// `strptime(fmt)`: parse a string into broken down time.
pub(crate) fn strptime(input: Json, format: Json) -> EvalResult<Json> {
    let (text, format) = match (&input, &format) {
        (Json::String(t), Json::String(f)) => (t, f),
        _ => {
            return Err(date_error(
                format!("strptime/1 requires string inputs and arguments, not {}.", input.json_type()),
                &input,
            ))
        }
    };
    let parsed = NaiveDateTime::parse_from_str(text, format).or_else(|_| {
        NaiveDate::parse_from_str(text, format).map(|date| date.and_time(NaiveTime::default()))
    });
    match parsed {
        Ok(dt) => Ok(broken_down(&dt, 0.0)),
        Err(_) => Err(date_error(
            format!("date \"{}\" does not match format \"{}\"", text, format),
            &input,
        )),
    }
}

/// `todateiso8601`
pub(crate) fn todateiso8601(input: Json) -> EvalResult<Json> {
    strftime(input, Json::from(ISO8601))
}

/// `fromdateiso8601`
pub(crate) fn fromdateiso8601(input: Json) -> EvalResult<Json> {
    strptime(input, Json::from(ISO8601)).and_then(mktime)
}
