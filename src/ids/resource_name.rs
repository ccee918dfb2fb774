use std::{fmt, str::FromStr};

use thiserror::Error;

use super::{impl_serde_via_str, matches_charset};

/// Shared grammar for container/network/volume names: `[A-Za-z0-9][A-Za-z0-9_.-]*`.
fn is_valid(s: &str) -> bool {
    matches_charset(
        s,
        |c| c.is_ascii_alphanumeric(),
        |c| c.is_ascii_alphanumeric() || c == '_' || c == '.' || c == '-',
    )
}

macro_rules! resource_name {
    ($ty:ident, $kind:literal) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $ty(String);

        impl $ty {
            #[must_use]
            pub fn new_literal(s: &'static str) -> Self {
                s.parse().expect(concat!("literal ", $kind, " name must be valid"))
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $ty {
            type Err = ResourceNameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                if is_valid(s) {
                    Ok(Self(s.to_owned()))
                } else {
                    Err(ResourceNameError {
                        kind: $kind,
                        value: s.to_owned(),
                    })
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl_serde_via_str!($ty);
    };
}

resource_name!(ContainerName, "container");
resource_name!(NetworkName, "network");
resource_name!(VolumeName, "volume");

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("`{value}` is not a valid {kind} name: must match [A-Za-z0-9][A-Za-z0-9_.-]*")]
pub struct ResourceNameError {
    kind: &'static str,
    value: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn valid_names() {
        assert!("immich-redis".parse::<ContainerName>().is_ok());
        assert!("immich_data.01".parse::<VolumeName>().is_ok());
    }

    #[test]
    fn rejects_leading_punctuation() {
        assert!("-immich".parse::<ContainerName>().is_err());
        assert!(".hidden".parse::<NetworkName>().is_err());
    }
}
