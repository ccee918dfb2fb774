use std::{fmt, str::FromStr};

use thiserror::Error;

use super::{impl_serde_via_str, matches_charset};

impl_serde_via_str!(Username);

/// A validated POSIX username: `[a-z_][a-z0-9_-]*`, 1-32 characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Username(String);

impl Username {
    /// Construct a [`Username`] from a string literal known to be valid.
    ///
    /// # Panics
    ///
    /// Panics if `s` does not satisfy the username grammar. Only use with literals.
    #[must_use]
    pub fn new_literal(s: &'static str) -> Self {
        s.parse().expect("literal username must be valid")
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Username {
    type Err = UsernameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s.len() > 32 {
            return Err(UsernameError::Length(s.len()));
        }
        if !matches_charset(
            s,
            |c| c.is_ascii_lowercase() || c == '_',
            |c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-',
        ) {
            return Err(UsernameError::Charset(s.to_owned()));
        }
        Ok(Self(s.to_owned()))
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UsernameError {
    #[error("username must be 1-32 characters, got {0}")]
    Length(usize),
    #[error("`{0}` is not a valid username: must match [a-z_][a-z0-9_-]*")]
    Charset(String),
}
