use std::{fmt, str::FromStr};

use thiserror::Error;

use super::impl_serde_via_str;

/// `MAJOR.MINOR.PATCH`, each a non-negative integer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SemVer {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl SemVer {
    #[must_use]
    pub fn new_literal(s: &'static str) -> Self {
        s.parse().expect("literal semver must be valid")
    }
}

impl FromStr for SemVer {
    type Err = SemVerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut parts = s.split('.');
        let (Some(major), Some(minor), Some(patch), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(SemVerError(s.to_owned()));
        };

        let parse = |part: &str| part.parse().map_err(|_| SemVerError(s.to_owned()));

        Ok(Self {
            major: parse(major)?,
            minor: parse(minor)?,
            patch: parse(patch)?,
        })
    }
}

impl fmt::Display for SemVer {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("`{0}` is not a valid MAJOR.MINOR.PATCH version")]
pub struct SemVerError(String);

/// Three further brands layered on [`SemVer`], one per distinct versioning concern. Kept as
/// separate types (rather than three `type` aliases to the same `SemVer`) so a backup schema
/// version can never be compared against, or accidentally substituted for, a config schema
/// version at a call site.
macro_rules! semver_brand {
    ($ty:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
        pub struct $ty(pub SemVer);

        impl $ty {
            #[must_use]
            pub fn new_literal(s: &'static str) -> Self {
                Self(SemVer::new_literal(s))
            }
        }

        impl FromStr for $ty {
            type Err = SemVerError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                s.parse().map(Self)
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl_serde_via_str!($ty);
    };
}

semver_brand!(BackupSchemaVersion);
semver_brand!(ProducerVersion);
semver_brand!(ConfigSchemaVersion);

/// The schema version this build writes into every archive it creates.
pub const CURRENT_BACKUP_SCHEMA_VERSION: BackupSchemaVersion =
    BackupSchemaVersion(SemVer { major: 1, minor: 0, patch: 0 });

/// Schema versions this build can restore. Per the metadata-schema-evolution open question,
/// this is an exact-match list, not a semver range: a 1.1.0 backup from a future build is
/// rejected by a 1.0.0-only reader until a compatibility policy is written down.
pub const SUPPORTED_BACKUP_SCHEMA_VERSIONS: &[BackupSchemaVersion] =
    &[CURRENT_BACKUP_SCHEMA_VERSION];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses() {
        let v: SemVer = "1.2.3".parse().unwrap();
        assert_eq!(v, SemVer { major: 1, minor: 2, patch: 3 });
        assert_eq!(v.to_string(), "1.2.3");
    }

    #[test]
    fn rejects_malformed() {
        assert!("1.2".parse::<SemVer>().is_err());
        assert!("1.2.3.4".parse::<SemVer>().is_err());
        assert!("a.b.c".parse::<SemVer>().is_err());
    }

    #[test]
    fn current_schema_is_supported() {
        assert!(SUPPORTED_BACKUP_SCHEMA_VERSIONS.contains(&CURRENT_BACKUP_SCHEMA_VERSION));
    }
}
