// This file is part of the product NoPressure.
// SPDX-FileCopyrightText: 2025-2026 Zivatar Limited
// SPDX-License-Identifier: AGPL-3.0-or-later
// The code and documentation in this repository is licensed under the GNU Affero General Public License v3.0 or later (AGPL-3.0-or-later). See LICENSE.

use super::{TemplateFn, arg, arg_f64, arg_str, arg_str_or, function_table, require};
use crate::util::duration::parse_duration;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde_json::{Value, json};

pub const FUNCTIONS: &[(&str, TemplateFn)] = function_table![
    "time" => time,
    "now" => now,
    "addTime" => add_time,
    "ago" => ago,
    "since" => since,
    "duration" => duration,
    "isBefore" => is_before,
    "isAfter" => is_after,
    "isBetweenTimes" => is_between_times,
    "isOlderThan" => is_older_than,
    "isNewerThan" => is_newer_than,
    "sunrise" => sunrise,
    "sunset" => sunset,
];

pub(crate) fn parse_time(value: &Value) -> Result<DateTime<Utc>, String> {
    match value {
        Value::Null => Ok(Utc::now()),
        Value::Number(n) => {
            let n = n.as_f64().unwrap_or(0.0);
            from_epoch(n)
        }
        Value::String(s) => parse_time_str(s.trim()),
        other => Err(format!("cannot interpret {} as a time", other)),
    }
}

fn from_epoch(n: f64) -> Result<DateTime<Utc>, String> {
    let millis = if n.abs() >= 1e12 { n } else { n * 1000.0 };
    Utc.timestamp_millis_opt(millis as i64)
        .single()
        .ok_or_else(|| format!("timestamp {} out of range", n))
}

fn parse_time_str(s: &str) -> Result<DateTime<Utc>, String> {
    if s.is_empty() || s == "now" {
        return Ok(Utc::now());
    }
    if let Ok(n) = s.parse::<f64>() {
        return from_epoch(n);
    }
    if let Ok(t) = DateTime::parse_from_rfc3339(s) {
        return Ok(t.with_timezone(&Utc));
    }
    if let Ok(t) = DateTime::parse_from_rfc2822(s) {
        return Ok(t.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M"] {
        if let Ok(t) = NaiveDateTime::parse_from_str(s, layout) {
            return Ok(t.and_utc());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d")
        && let Some(t) = d.and_hms_opt(0, 0, 0)
    {
        return Ok(t.and_utc());
    }
    Err(format!("unrecognized time {:?}", s))
}

pub(crate) fn format_time(t: &DateTime<Utc>, format: &str) -> Value {
    match format {
        "" | "rfc3339" | "RFC3339" => json!(t.to_rfc3339_opts(SecondsFormat::Secs, true)),
        "rfc3339nano" => json!(t.to_rfc3339_opts(SecondsFormat::Nanos, true)),
        "rfc822" | "rfc2822" | "RFC822" => json!(t.to_rfc2822()),
        "epoch" | "unix" => json!(t.timestamp()),
        "epoch-ms" | "epoch_ms" => json!(t.timestamp_millis()),
        "kitchen" => json!(t.format("%-I:%M%p").to_string()),
        "ansic" => json!(t.format("%a %b %e %H:%M:%S %Y").to_string()),
        "date" => json!(t.format("%Y-%m-%d").to_string()),
        "http" => json!(t.format("%a, %d %b %Y %H:%M:%S GMT").to_string()),
        layout => json!(t.format(layout).to_string()),
    }
}

/// Durations with an optional leading `-`.
fn parse_signed_duration(input: &str) -> Result<ChronoDuration, String> {
    let input = input.trim();
    let (negative, rest) = match input.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, input),
    };
    let parsed = ChronoDuration::from_std(parse_duration(rest)?).map_err(|e| e.to_string())?;
    Ok(if negative { -parsed } else { parsed })
}

pub(crate) fn humanize(delta: ChronoDuration) -> String {
    let negative = delta < ChronoDuration::zero();
    let mut seconds = delta.num_seconds().unsigned_abs();
    if seconds == 0 {
        let millis = delta.num_milliseconds().unsigned_abs();
        return format!("{}{}ms", if negative { "-" } else { "" }, millis);
    }

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    for (unit, size) in [("d", 86_400), ("h", 3_600), ("m", 60)] {
        if seconds >= size {
            out.push_str(&format!("{}{}", seconds / size, unit));
            seconds %= size;
        }
    }
    if seconds > 0 || out.is_empty() || out == "-" {
        out.push_str(&format!("{}s", seconds));
    }
    out
}

fn time(args: &[Value]) -> Result<Value, String> {
    let t = parse_time(arg(args, 0))?;
    Ok(format_time(&t, &arg_str(args, 1)))
}

fn now(args: &[Value]) -> Result<Value, String> {
    Ok(format_time(&Utc::now(), &arg_str(args, 0)))
}

fn add_time(args: &[Value]) -> Result<Value, String> {
    require(args, 1)?;
    let delta = parse_signed_duration(&arg_str(args, 0))?;
    let from = parse_time(arg(args, 1))?;
    Ok(format_time(&(from + delta), &arg_str(args, 2)))
}

fn ago(args: &[Value]) -> Result<Value, String> {
    require(args, 1)?;
    let delta = parse_signed_duration(&arg_str(args, 0))?;
    let from = parse_time(arg(args, 1))?;
    Ok(format_time(&(from - delta), &arg_str(args, 2)))
}

fn since(args: &[Value]) -> Result<Value, String> {
    require(args, 1)?;
    let then = parse_time(arg(args, 0))?;
    let reference = parse_time(arg(args, 1))?;
    Ok(json!(humanize(reference - then)))
}

fn duration(args: &[Value]) -> Result<Value, String> {
    let amount = arg_f64(args, 0)?;
    let unit = arg_str_or(args, 1, "s");
    let seconds = amount
        * match unit.as_str() {
            "ns" => 1e-9,
            "us" => 1e-6,
            "ms" => 1e-3,
            "s" | "sec" => 1.0,
            "m" | "min" => 60.0,
            "h" | "hr" => 3600.0,
            "d" | "day" => 86400.0,
            other => return Err(format!("unknown unit {:?}", other)),
        };
    let delta = ChronoDuration::milliseconds((seconds * 1000.0).round() as i64);
    Ok(match arg_str(args, 2).as_str() {
        "seconds" => crate::util::value::number(seconds),
        _ => json!(humanize(delta)),
    })
}

fn is_before(args: &[Value]) -> Result<Value, String> {
    require(args, 1)?;
    Ok(json!(parse_time(arg(args, 0))? < parse_time(arg(args, 1))?))
}

fn is_after(args: &[Value]) -> Result<Value, String> {
    require(args, 1)?;
    Ok(json!(parse_time(arg(args, 0))? > parse_time(arg(args, 1))?))
}

fn is_between_times(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    let start = parse_time(arg(args, 0))?;
    let end = parse_time(arg(args, 1))?;
    let t = parse_time(arg(args, 2))?;
    Ok(json!(t >= start && t <= end))
}

fn is_older_than(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    let t = parse_time(arg(args, 0))?;
    let age = parse_signed_duration(&arg_str(args, 1))?;
    Ok(json!(Utc::now() - t > age))
}

fn is_newer_than(args: &[Value]) -> Result<Value, String> {
    require(args, 2)?;
    let t = parse_time(arg(args, 0))?;
    let age = parse_signed_duration(&arg_str(args, 1))?;
    Ok(json!(Utc::now() - t < age))
}

/// Sunrise or sunset in UTC for the given day, or `None` when the sun never crosses the horizon.
pub(crate) fn solar_event(date: NaiveDate, latitude: f64, longitude: f64, rising: bool) -> Option<DateTime<Utc>> {
    const ZENITH: f64 = 90.833;
    let day = date.ordinal() as f64;
    let lng_hour = longitude / 15.0;
    let t = day + ((if rising { 6.0 } else { 18.0 }) - lng_hour) / 24.0;

    let mean_anomaly = 0.9856 * t - 3.289;
    let true_longitude = (mean_anomaly
        + 1.916 * mean_anomaly.to_radians().sin()
        + 0.020 * (2.0 * mean_anomaly).to_radians().sin()
        + 282.634)
        .rem_euclid(360.0);

    let mut right_ascension = (0.91764 * true_longitude.to_radians().tan())
        .atan()
        .to_degrees()
        .rem_euclid(360.0);
    right_ascension += (true_longitude / 90.0).floor() * 90.0 - (right_ascension / 90.0).floor() * 90.0;
    right_ascension /= 15.0;

    let sin_dec = 0.39782 * true_longitude.to_radians().sin();
    let cos_dec = sin_dec.asin().cos();
    let cos_h = (ZENITH.to_radians().cos() - sin_dec * latitude.to_radians().sin())
        / (cos_dec * latitude.to_radians().cos());
    if !(-1.0..=1.0).contains(&cos_h) {
        return None;
    }

    let hour_angle = (if rising {
        360.0 - cos_h.acos().to_degrees()
    } else {
        cos_h.acos().to_degrees()
    }) / 15.0;

    let local_mean = hour_angle + right_ascension - 0.06571 * t - 6.622;
    let universal = (local_mean - lng_hour).rem_euclid(24.0);

    let midnight = date.and_hms_opt(0, 0, 0)?.and_utc();
    Some(midnight + ChronoDuration::milliseconds((universal * 3_600_000.0) as i64))
}

fn celestial(args: &[Value], rising: bool) -> Result<Value, String> {
    require(args, 2)?;
    let latitude = arg_f64(args, 0)?;
    let longitude = arg_f64(args, 1)?;
    let date = parse_time(arg(args, 2))?.date_naive();
    match solar_event(date, latitude, longitude, rising) {
        Some(t) => Ok(format_time(&t, &arg_str(args, 3))),
        None => Ok(Value::Null),
    }
}

fn sunrise(args: &[Value]) -> Result<Value, String> {
    celestial(args, true)
}

fn sunset(args: &[Value]) -> Result<Value, String> {
    celestial(args, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    #[test]
    fn parses_common_time_shapes() {
        let expected = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(parse_time(&json!("2024-03-01T12:00:00Z")).unwrap(), expected);
        assert_eq!(parse_time(&json!("2024-03-01 12:00:00")).unwrap(), expected);
        assert_eq!(parse_time(&json!(expected.timestamp())).unwrap(), expected);
        assert_eq!(parse_time(&json!(expected.timestamp_millis())).unwrap(), expected);
        assert!(parse_time(&json!("yesterday-ish")).is_err());
    }

    #[test]
    fn formats_named_layouts() {
        let t = Utc.with_ymd_and_hms(2024, 3, 1, 15, 4, 5).unwrap();
        assert_eq!(format_time(&t, ""), json!("2024-03-01T15:04:05Z"));
        assert_eq!(format_time(&t, "epoch"), json!(t.timestamp()));
        assert_eq!(format_time(&t, "kitchen"), json!("3:04PM"));
        assert_eq!(format_time(&t, "%d/%m"), json!("01/03"));
    }

    #[test]
    fn adds_and_subtracts_durations() {
        let out = add_time(&[json!("1h30m"), json!("2024-01-01T00:00:00Z")]).unwrap();
        assert_eq!(out, json!("2024-01-01T01:30:00Z"));
        let out = ago(&[json!("1d"), json!("2024-01-02T00:00:00Z")]).unwrap();
        assert_eq!(out, json!("2024-01-01T00:00:00Z"));
        let out = add_time(&[json!("-10m"), json!("2024-01-01T00:10:00Z")]).unwrap();
        assert_eq!(out, json!("2024-01-01T00:00:00Z"));
    }

    #[test]
    fn humanizes_spans() {
        assert_eq!(humanize(ChronoDuration::seconds(3725)), "1h2m5s");
        assert_eq!(humanize(ChronoDuration::seconds(-60)), "-1m");
        assert_eq!(humanize(ChronoDuration::milliseconds(250)), "250ms");
        assert_eq!(duration(&[json!(90), json!("m")]).unwrap(), json!("1h30m"));
    }

    #[test]
    fn compares_times() {
        assert_eq!(is_before(&[json!("2000-01-01")]).unwrap(), json!(true));
        assert_eq!(
            is_between_times(&[json!("2024-01-01"), json!("2024-12-31"), json!("2024-06-01")]).unwrap(),
            json!(true)
        );
        assert_eq!(is_older_than(&[json!("2000-01-01"), json!("24h")]).unwrap(), json!(true));
        assert_eq!(is_newer_than(&[json!("2000-01-01"), json!("24h")]).unwrap(), json!(false));
    }

    #[test]
    fn sun_rises_before_it_sets() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        // Greenwich at midsummer: roughly 03:43 and 20:21 UTC
        let rise = solar_event(date, 51.4769, 0.0, true).expect("sunrise");
        let set = solar_event(date, 51.4769, 0.0, false).expect("sunset");
        assert!(rise < set);
        assert!((3..=4).contains(&rise.hour()));
        assert!((20..=21).contains(&set.hour()));
        assert!(solar_event(date, 89.0, 0.0, true).is_none());
    }
}
