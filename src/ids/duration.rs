use std::{fmt, str::FromStr};

use thiserror::Error;

use super::impl_serde_via_str;

impl_serde_via_str!(Duration);

/// A systemd-style duration: an integer followed by `s`, `m`, `h`, or `ms`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Duration {
    value: u64,
    unit: Unit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Unit {
    Milliseconds,
    Seconds,
    Minutes,
    Hours,
}

impl Duration {
    #[must_use]
    pub fn new_literal(s: &'static str) -> Self {
        s.parse().expect("literal duration must be valid")
    }

    /// This duration expressed as whole seconds, rounding down.
    #[must_use]
    pub fn as_secs(self) -> u64 {
        match self.unit {
            Unit::Milliseconds => self.value / 1000,
            Unit::Seconds => self.value,
            Unit::Minutes => self.value * 60,
            Unit::Hours => self.value * 3600,
        }
    }
}

impl FromStr for Duration {
    type Err = DurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (digits, unit) = if let Some(digits) = s.strip_suffix("ms") {
            (digits, Unit::Milliseconds)
        } else if let Some(digits) = s.strip_suffix('s') {
            (digits, Unit::Seconds)
        } else if let Some(digits) = s.strip_suffix('m') {
            (digits, Unit::Minutes)
        } else if let Some(digits) = s.strip_suffix('h') {
            (digits, Unit::Hours)
        } else {
            return Err(DurationError(s.to_owned()));
        };

        let value = digits
            .parse()
            .map_err(|_| DurationError(s.to_owned()))?;

        Ok(Self { value, unit })
    }
}

impl fmt::Display for Duration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let unit = match self.unit {
            Unit::Milliseconds => "ms",
            Unit::Seconds => "s",
            Unit::Minutes => "m",
            Unit::Hours => "h",
        };
        write!(f, "{}{unit}", self.value)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("`{0}` is not a valid systemd duration, expected an integer followed by s/m/h/ms")]
pub struct DurationError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_each_unit() {
        assert_eq!("30s".parse::<Duration>().unwrap().as_secs(), 30);
        assert_eq!("2m".parse::<Duration>().unwrap().as_secs(), 120);
        assert_eq!("1h".parse::<Duration>().unwrap().as_secs(), 3600);
        assert_eq!("1500ms".parse::<Duration>().unwrap().as_secs(), 1);
    }

    #[test]
    fn round_trips_display() {
        let d: Duration = "45s".parse().unwrap();
        assert_eq!(d.to_string(), "45s");
    }

    #[test]
    fn rejects_missing_unit() {
        assert!("30".parse::<Duration>().is_err());
    }
}
