use std::{
    fmt,
    path::{Path, PathBuf},
    str::FromStr,
};

use thiserror::Error;

use super::impl_serde_via_str;

impl_serde_via_str!(AbsolutePath);

/// A path that is guaranteed to start with `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AbsolutePath(PathBuf);

impl AbsolutePath {
    #[must_use]
    pub fn new_literal(s: &'static str) -> Self {
        s.parse().expect("literal path must be absolute")
    }

    #[must_use]
    pub fn as_path(&self) -> &Path {
        &self.0
    }

    #[must_use]
    pub fn join(&self, segment: impl AsRef<Path>) -> PathBuf {
        self.0.join(segment)
    }
}

impl FromStr for AbsolutePath {
    type Err = PathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('/') {
            Ok(Self(PathBuf::from(s)))
        } else {
            Err(PathError(s.to_owned()))
        }
    }
}

impl TryFrom<PathBuf> for AbsolutePath {
    type Error = PathError;

    fn try_from(value: PathBuf) -> Result<Self, Self::Error> {
        if value.is_absolute() {
            Ok(Self(value))
        } else {
            Err(PathError(value.display().to_string()))
        }
    }
}

impl fmt::Display for AbsolutePath {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl AsRef<Path> for AbsolutePath {
    fn as_ref(&self) -> &Path {
        &self.0
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("`{0}` is not an absolute path")]
pub struct PathError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_absolute() {
        assert!("/srv/immich".parse::<AbsolutePath>().is_ok());
    }

    #[test]
    fn rejects_relative() {
        assert!("srv/immich".parse::<AbsolutePath>().is_err());
        assert!("".parse::<AbsolutePath>().is_err());
    }
}
