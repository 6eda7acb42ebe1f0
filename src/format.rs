//! Text rendering of values for the ASCII formats.
//!
//! Files written by the flat-table and sectioned-ASCII back-ends are read by existing
//! analysis tools that expect numbers printed the way a Python program prints them:
//! `0.0` rather than `0`, `1e-05` rather than `0.00001`, and `nan` for missing values.

/// Renders a float like Python's `str(float)`.
pub fn python_float(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    let abs = value.abs();
    if abs != 0.0 && !(1e-4..1e16).contains(&abs) {
        return python_exponent(value);
    }
    let text = format!("{value}");
    if text.contains('.') {
        text
    } else {
        format!("{text}.0")
    }
}

/// Scientific notation with a signed, at least two-digit exponent (`1.5e-05`).
fn python_exponent(value: f64) -> String {
    let text = format!("{value:e}");
    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            let (sign, digits) = match exponent.strip_prefix('-') {
                Some(rest) => ('-', rest),
                None => ('+', exponent),
            };
            format!("{mantissa}e{sign}{digits:0>2}")
        }
        None => text,
    }
}

/// Renders a float like C's `%g`: six significant digits, trailing zeros dropped.
pub fn c_general(value: f64) -> String {
    if !value.is_finite() {
        return python_float(value);
    }
    if value == 0.0 {
        return "0".to_string();
    }
    let scientific = format!("{value:.5e}");
    let exponent: i32 = scientific
        .split_once('e')
        .and_then(|(_, e)| e.parse().ok())
        .unwrap_or(0);
    if !(-4..6).contains(&exponent) {
        let (mantissa, _) = scientific.split_once('e').unwrap_or((&scientific, ""));
        let sign = if exponent < 0 { '-' } else { '+' };
        format!(
            "{}e{sign}{:02}",
            trim_fraction(mantissa),
            exponent.unsigned_abs()
        )
    } else {
        let decimals = usize::try_from(5 - exponent).unwrap_or(0);
        trim_fraction(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_fraction(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

/// Renders epoch seconds with sub-second precision dropped when it is zero, the way
/// the `#D` line of the flat-table header expects.
pub fn epoch_seconds(time: &chrono::DateTime<chrono::FixedOffset>) -> String {
    let seconds = time.timestamp() as f64 + f64::from(time.timestamp_subsec_micros()) / 1e6;
    python_float(seconds)
}

/// C `ctime()` style timestamp, e.g. `Mon Oct  5 14:03:09 2026`.
pub fn ctime(time: &chrono::DateTime<chrono::FixedOffset>) -> String {
    time.format("%a %b %e %H:%M:%S %Y").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, TimeZone};

    #[test]
    fn integral_floats_keep_a_decimal_point() {
        assert_eq!(python_float(0.0), "0.0");
        assert_eq!(python_float(1.0), "1.0");
        assert_eq!(python_float(-3.0), "-3.0");
    }

    #[test]
    fn fractional_floats_use_shortest_repr() {
        assert_eq!(python_float(10.5), "10.5");
        assert_eq!(python_float(11.2), "11.2");
        assert_eq!(python_float(0.1 + 0.2), "0.30000000000000004");
    }

    #[test]
    fn small_and_large_values_use_exponent() {
        assert_eq!(python_float(0.00001), "1e-05");
        assert_eq!(python_float(1.5e-7), "1.5e-07");
        assert_eq!(python_float(2e16), "2e+16");
        assert_eq!(python_float(0.0001), "0.0001");
    }

    #[test]
    fn c_general_matches_printf() {
        assert_eq!(c_general(0.0), "0");
        assert_eq!(c_general(1.5), "1.5");
        assert_eq!(c_general(0.1), "0.1");
        assert_eq!(c_general(123456.0), "123456");
        assert_eq!(c_general(1234567.0), "1.23457e+06");
        assert_eq!(c_general(0.00001234), "1.234e-05");
        assert_eq!(c_general(-2.0), "-2");
        assert_eq!(c_general(999999.5), "1e+06");
    }

    #[test]
    fn non_finite_values() {
        assert_eq!(python_float(f64::NAN), "nan");
        assert_eq!(python_float(f64::INFINITY), "inf");
        assert_eq!(python_float(f64::NEG_INFINITY), "-inf");
    }

    #[test]
    fn ctime_pads_day_with_space() {
        let tz = FixedOffset::east_opt(3600).unwrap();
        let t = tz.with_ymd_and_hms(2026, 10, 5, 14, 3, 9).unwrap();
        assert_eq!(ctime(&t), "Mon Oct  5 14:03:09 2026");
        assert_eq!(epoch_seconds(&t), python_float(t.timestamp() as f64));
    }
}
