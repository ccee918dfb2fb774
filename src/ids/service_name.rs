use std::{fmt, str::FromStr};

use thiserror::Error;

use super::{impl_serde_via_str, matches_charset};

impl_serde_via_str!(ServiceName);

/// A validated service name: `[a-z][a-z0-9-]*`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceName(String);

impl ServiceName {
    #[must_use]
    pub fn new_literal(s: &'static str) -> Self {
        s.parse().expect("literal service name must be valid")
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ServiceName {
    type Err = ServiceNameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if matches_charset(
            s,
            |c| c.is_ascii_lowercase(),
            |c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-',
        ) {
            Ok(Self(s.to_owned()))
        } else {
            Err(ServiceNameError(s.to_owned()))
        }
    }
}

impl fmt::Display for ServiceName {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ServiceName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("`{0}` is not a valid service name: must match [a-z][a-z0-9-]*")]
pub struct ServiceNameError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid() {
        assert!("immich".parse::<ServiceName>().is_ok());
        assert!("freshrss".parse::<ServiceName>().is_ok());
    }

    #[test]
    fn rejects_leading_digit_and_underscore() {
        assert!("1immich".parse::<ServiceName>().is_err());
        assert!("im_mich".parse::<ServiceName>().is_err());
    }
}
