//! Start/end time expressions for fetch requests.
//!
//! Accepted forms follow rrdtool's `AT-STYLE` subset:
//!
//! | Expression            | Meaning                                 |
//! |-----------------------|-----------------------------------------|
//! | `now`                 | current time                            |
//! | `now-1h`, `now+30min` | offset from now                         |
//! | `-1h`                 | same as `now-1h`                        |
//! | `end-1h`, `e-1h`      | offset from the resolved end            |
//! | `start+1d`, `s+1d`    | offset from the resolved start          |
//! | `1700000000`          | absolute Unix seconds                   |
//!
//! Offsets can be chained (`now-1d-12h`). Months are 30 days and years 365.

use std::fmt;
use std::str::FromStr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::QueryError;

/// What an expression is relative to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeBase {
    /// The current time.
    Now,
    /// The other end of the range being resolved: the start.
    Start,
    /// The other end of the range being resolved: the end.
    End,
    /// A fixed Unix timestamp in seconds.
    Epoch(u64),
}

/// A parsed time expression: a base plus a signed offset in seconds.
///
/// # Examples
///
/// ```rust
/// use hwtrend::timespec::{resolve_range, TimeSpec};
///
/// let start: TimeSpec = "end-1h".parse().unwrap();
/// let end: TimeSpec = "now".parse().unwrap();
/// assert_eq!(resolve_range(&start, &end, 10_000).unwrap(), (6_400, 10_000));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeSpec {
    /// Reference point.
    pub base: TimeBase,
    /// Offset from the reference point in seconds.
    pub offset: i64,
}

impl TimeSpec {
    /// The current time.
    pub const NOW: Self = Self {
        base: TimeBase::Now,
        offset: 0,
    };

    /// A fixed Unix timestamp.
    pub fn at(timestamp: u64) -> Self {
        Self {
            base: TimeBase::Epoch(timestamp),
            offset: 0,
        }
    }

    /// `offset` seconds relative to the resolved end.
    pub fn end_relative(offset: i64) -> Self {
        Self {
            base: TimeBase::End,
            offset,
        }
    }

    /// Default start of a fetch: one hour before the end.
    pub fn default_start() -> Self {
        Self::end_relative(-3600)
    }

    fn resolve(&self, now: u64, start: Option<u64>, end: Option<u64>, raw: &str) -> Result<u64, QueryError> {
        let base = match self.base {
            TimeBase::Now => now,
            TimeBase::Epoch(ts) => ts,
            TimeBase::Start => start.ok_or_else(|| invalid(raw, "start cannot be relative to itself"))?,
            TimeBase::End => end.ok_or_else(|| invalid(raw, "end cannot be relative to itself"))?,
        };

        base.checked_add_signed(self.offset)
            .ok_or_else(|| invalid(raw, "resolves outside the representable time range"))
    }
}

impl Default for TimeSpec {
    fn default() -> Self {
        Self::NOW
    }
}

impl fmt::Display for TimeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.base {
            TimeBase::Now => f.write_str("now")?,
            TimeBase::Start => f.write_str("start")?,
            TimeBase::End => f.write_str("end")?,
            TimeBase::Epoch(ts) => write!(f, "{ts}")?,
        }
        if self.offset != 0 {
            write!(f, "{:+}s", self.offset)?;
        }
        Ok(())
    }
}

fn invalid(spec: &str, reason: impl Into<String>) -> QueryError {
    QueryError::InvalidTimeSpec {
        spec: spec.to_string(),
        reason: reason.into(),
    }
}

/// Seconds per unit, or `None` for an unknown unit.
fn unit_seconds(unit: &str) -> Option<i64> {
    Some(match unit {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => 1,
        "m" | "min" | "mins" | "minute" | "minutes" => 60,
        "h" | "hr" | "hour" | "hours" => 3_600,
        "d" | "day" | "days" => 86_400,
        "w" | "week" | "weeks" => 604_800,
        "mon" | "month" | "months" => 2_592_000,
        "y" | "year" | "years" => 31_536_000,
        _ => return None,
    })
}

/// Parses a chain of `[+-]<number><unit>` terms into seconds.
fn parse_offsets(spec: &str, mut rest: &str) -> Result<i64, QueryError> {
    let mut total: i64 = 0;

    while !rest.is_empty() {
        let sign = match rest.as_bytes()[0] {
            b'+' => 1,
            b'-' => -1,
            _ => return Err(invalid(spec, format!("expected '+' or '-' before '{rest}'"))),
        };
        rest = rest[1..].trim_start();

        let digits = rest.bytes().take_while(u8::is_ascii_digit).count();
        if digits == 0 {
            return Err(invalid(spec, "missing number after sign"));
        }
        let amount: i64 = rest[..digits]
            .parse()
            .map_err(|_| invalid(spec, "number out of range"))?;
        rest = &rest[digits..];

        let letters = rest.bytes().take_while(u8::is_ascii_alphabetic).count();
        let unit = &rest[..letters];
        let seconds = unit_seconds(unit).ok_or_else(|| invalid(spec, format!("unknown unit '{unit}'")))?;
        rest = rest[letters..].trim_start();

        total = amount
            .checked_mul(seconds)
            .and_then(|v| v.checked_mul(sign))
            .and_then(|v| total.checked_add(v))
            .ok_or_else(|| invalid(spec, "offset out of range"))?;
    }

    Ok(total)
}

impl FromStr for TimeSpec {
    type Err = QueryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_ascii_lowercase();
        if lowered.is_empty() {
            return Err(invalid(s, "empty expression"));
        }

        let (base, rest) = if let Some(rest) = lowered.strip_prefix("now") {
            (TimeBase::Now, rest)
        } else if let Some(rest) = lowered.strip_prefix("end").or_else(|| lowered.strip_prefix('e')) {
            (TimeBase::End, rest)
        } else if let Some(rest) = lowered.strip_prefix("start").or_else(|| lowered.strip_prefix('s')) {
            (TimeBase::Start, rest)
        } else if lowered.starts_with(['+', '-']) {
            (TimeBase::Now, lowered.as_str())
        } else {
            let digits = lowered.bytes().take_while(u8::is_ascii_digit).count();
            if digits == 0 {
                return Err(invalid(s, "unrecognized time reference"));
            }
            let ts = lowered[..digits]
                .parse()
                .map_err(|_| invalid(s, "timestamp out of range"))?;
            (TimeBase::Epoch(ts), &lowered[digits..])
        };

        let offset = parse_offsets(s, rest.trim_start())?;
        Ok(Self { base, offset })
    }
}

/// Resolves a start/end pair against `now` (Unix seconds).
///
/// # Errors
///
/// Returns [`QueryError::InvalidTimeSpec`] if the expressions reference each
/// other or overflow, and [`QueryError::InvalidTimeRange`] if the resolved
/// start is not before the resolved end.
pub fn resolve_range(start: &TimeSpec, end: &TimeSpec, now: u64) -> Result<(u64, u64), QueryError> {
    let start_raw = start.to_string();
    let end_raw = end.to_string();

    let (start_ts, end_ts) = match (start.base, end.base) {
        (TimeBase::End, TimeBase::Start) => {
            return Err(invalid(
                &format!("{start_raw} / {end_raw}"),
                "start and end cannot reference each other",
            ));
        }
        (_, TimeBase::Start) => {
            let start_ts = start.resolve(now, None, None, &start_raw)?;
            let end_ts = end.resolve(now, Some(start_ts), None, &end_raw)?;
            (start_ts, end_ts)
        }
        _ => {
            let end_ts = end.resolve(now, None, None, &end_raw)?;
            let start_ts = start.resolve(now, None, Some(end_ts), &start_raw)?;
            (start_ts, end_ts)
        }
    };

    if start_ts >= end_ts {
        return Err(QueryError::InvalidTimeRange {
            start: start_ts,
            end: end_ts,
        });
    }

    Ok((start_ts, end_ts))
}

/// Parses a positive duration such as `300`, `5m` or `1h30m`.
///
/// # Errors
///
/// Returns [`QueryError::InvalidTimeSpec`] for unknown units, signs or a
/// zero duration.
pub fn parse_duration(s: &str) -> Result<Duration, QueryError> {
    let lowered = s.trim().to_ascii_lowercase();
    if lowered.is_empty() || lowered.starts_with(['+', '-']) {
        return Err(invalid(s, "expected a positive duration"));
    }

    // Every term is additive: reuse the offset parser by prefixing signs.
    let mut signed = String::with_capacity(lowered.len() * 2);
    let mut previous_alpha = false;
    for c in lowered.chars().filter(|c| !c.is_whitespace()) {
        if c.is_ascii_digit() && (signed.is_empty() || previous_alpha) {
            signed.push('+');
        }
        previous_alpha = c.is_ascii_alphabetic();
        signed.push(c);
    }

    let seconds = parse_offsets(s, &signed)?;
    u64::try_from(seconds)
        .ok()
        .filter(|&secs| secs > 0)
        .map(Duration::from_secs)
        .ok_or_else(|| invalid(s, "duration must be positive"))
}

/// Current Unix time in whole seconds.
pub fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_secs())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(s: &str) -> TimeSpec {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse_forms() {
        assert_eq!(parse("now"), TimeSpec::NOW);
        assert_eq!(parse("now-1h").offset, -3600);
        assert_eq!(parse("now+30min").offset, 1800);
        assert_eq!(parse("-1h"), TimeSpec { base: TimeBase::Now, offset: -3600 });
        assert_eq!(parse("end-1h"), TimeSpec::default_start());
        assert_eq!(parse("e-1h"), TimeSpec::default_start());
        assert_eq!(parse("start+1d"), TimeSpec { base: TimeBase::Start, offset: 86_400 });
        assert_eq!(parse("s+1d"), TimeSpec { base: TimeBase::Start, offset: 86_400 });
        assert_eq!(parse("1700000000"), TimeSpec::at(1_700_000_000));
        assert_eq!(parse(" NOW "), TimeSpec::NOW);
    }

    #[test]
    fn test_units_and_chains() {
        assert_eq!(parse("now-90").offset, -90);
        assert_eq!(parse("now-2minutes").offset, -120);
        assert_eq!(parse("now-1w").offset, -604_800);
        assert_eq!(parse("now-1mon").offset, -2_592_000);
        assert_eq!(parse("now-1month").offset, -2_592_000);
        assert_eq!(parse("now-1y").offset, -31_536_000);
        assert_eq!(parse("now-1d-12h").offset, -129_600);
        assert_eq!(parse("1700000000+1h").offset, 3600);
    }

    #[test]
    fn test_parse_errors() {
        for bad in ["", "yesterday", "now-", "now-1fortnight", "now*2", "end-h"] {
            assert!(bad.parse::<TimeSpec>().is_err(), "{bad:?} should not parse");
        }
    }

    #[test]
    fn test_resolve_defaults() {
        let (start, end) = resolve_range(&TimeSpec::default_start(), &TimeSpec::NOW, 100_000).unwrap();
        assert_eq!((start, end), (96_400, 100_000));
    }

    #[test]
    fn test_resolve_relative_to_start() {
        let (start, end) = resolve_range(&TimeSpec::at(1_000), &parse("start+1h"), 0).unwrap();
        assert_eq!((start, end), (1_000, 4_600));
    }

    #[test]
    fn test_resolve_errors() {
        // Mutual reference
        assert!(resolve_range(&parse("end-1h"), &parse("start+1h"), 10_000).is_err());
        // Self reference
        assert!(resolve_range(&parse("start-1h"), &TimeSpec::NOW, 10_000).is_err());
        // Inverted and empty ranges
        assert!(matches!(
            resolve_range(&TimeSpec::NOW, &parse("now-1h"), 10_000),
            Err(QueryError::InvalidTimeRange { .. })
        ));
        assert!(resolve_range(&TimeSpec::NOW, &TimeSpec::NOW, 10_000).is_err());
        // Before the epoch
        assert!(resolve_range(&parse("now-1y"), &TimeSpec::NOW, 10).is_err());
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("300").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h30m").unwrap(), Duration::from_secs(5400));
        assert_eq!(parse_duration("2 days").unwrap(), Duration::from_secs(172_800));

        for bad in ["", "0", "-5m", "5 parsecs", "m"] {
            assert!(parse_duration(bad).is_err(), "{bad:?} should not parse");
        }
    }
}
