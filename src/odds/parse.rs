//! Best-effort parsing of odds values and market selection strings.
//!
//! Nothing here fails: unparseable input yields `None` and the caller skips
//! that single value.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use super::market::{HcpSide, OuSide};

const NUM: &str = r"[0-9]+(?:\.[0-9]+)?";
const SIGNED_NUM: &str = r"[+-]?[0-9]+(?:\.[0-9]+)?";

fn cached(cell: &'static OnceLock<Option<Regex>>, pattern: impl FnOnce() -> String) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(&pattern()).ok()).as_ref()
}

fn ou_side_first() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, || format!(r"(?i)^(over|under)\s+({NUM})$"))
}

fn ou_line_first() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, || format!(r"(?i)^({NUM})\s+(over|under)$"))
}

fn hcp_side_first() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, || format!(r"(?i)^(home|away)\s+({SIGNED_NUM})$"))
}

fn hcp_line_first() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, || format!(r"(?i)^({SIGNED_NUM})\s+(home|away)$"))
}

fn bare_line() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    cached(&RE, || format!(r"^{SIGNED_NUM}$"))
}

/// Decimal odd from a raw string. Rejects non-numeric, non-finite and
/// non-positive values. Percent signs are not accepted here.
pub fn parse_odd(raw: &str) -> Option<f64> {
    let v: f64 = raw.trim().parse().ok()?;
    (v.is_finite() && v > 0.0).then_some(v)
}

/// [`parse_odd`] over a JSON value holding either a string or a number.
pub fn parse_odd_value(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite() && *v > 0.0),
        Value::String(s) => parse_odd(s),
        _ => None,
    }
}

/// Numeric statistic that may carry a trailing `%` (e.g. `"58%"`).
pub fn parse_percent(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64().filter(|v| v.is_finite()),
        Value::String(s) => {
            let t = s.trim();
            let t = t.strip_suffix('%').unwrap_or(t).trim();
            t.parse::<f64>().ok().filter(|v| v.is_finite())
        }
        _ => None,
    }
}

/// `1 / odd` for a positive odd.
pub fn implied_probability(odd: f64) -> Option<f64> {
    (odd.is_finite() && odd > 0.0).then(|| 1.0 / odd)
}

/// `"Over 2.5"` / `"2.5 under"` into side and line. The line is kept as the
/// source wrote it.
pub fn parse_ou_value(raw: &str) -> Option<(OuSide, String)> {
    let s = raw.trim();
    let (side, line) = if let Some(c) = ou_side_first()?.captures(s) {
        (c.get(1)?.as_str(), c.get(2)?.as_str())
    } else {
        let c = ou_line_first()?.captures(s)?;
        (c.get(2)?.as_str(), c.get(1)?.as_str())
    };
    Some((OuSide::parse(side)?, line.to_string()))
}

/// `"Home -1"` / `"+0.25 Away"` into side and signed line. A bare signed
/// number is a line with no known side.
pub fn parse_hcp_value(raw: &str) -> Option<(Option<HcpSide>, String)> {
    let s = raw.trim();
    if let Some(c) = hcp_side_first()?.captures(s) {
        return Some((HcpSide::parse(c.get(1)?.as_str()), c.get(2)?.as_str().to_string()));
    }
    if let Some(c) = hcp_line_first()?.captures(s) {
        return Some((HcpSide::parse(c.get(2)?.as_str()), c.get(1)?.as_str().to_string()));
    }
    bare_line()?.is_match(s).then(|| (None, s.to_string()))
}

/// Numeric value of a line key such as `"2.5"` or `"-0.25"`.
pub fn line_value(line: &str) -> Option<f64> {
    line.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}

/// Render a numeric line the way the odds feeds print them (`2.5`, `-1`).
pub fn format_line(v: f64) -> String {
    if v == v.trunc() && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// Render a decimal price as an odds string (`1.9`, `2`).
pub fn format_odd(v: f64) -> String {
    let rounded = (v * 1000.0).round() / 1000.0;
    format_line(rounded)
}
