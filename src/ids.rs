//! Branded identifier types.
//!
//! Each type wraps a validated `String` (or integer) behind a private field, so the only way
//! to produce one is through its `FromStr`/`TryFrom` parser (fallible, for arbitrary input) or
//! its `new_literal` constructor (infallible, for string literals the caller controls). Neither
//! path allows a caller to smuggle an unvalidated value past the type.

mod duration;
mod image;
mod path;
mod resource_name;
mod semver;
mod service_name;
mod uid;
mod username;

pub use self::{
    duration::{Duration, DurationError},
    image::{ContainerImage, ImageError},
    path::{AbsolutePath, PathError},
    resource_name::{ContainerName, NetworkName, ResourceNameError, VolumeName},
    semver::{
        BackupSchemaVersion, ConfigSchemaVersion, ProducerVersion, SemVer, SemVerError,
        CURRENT_BACKUP_SCHEMA_VERSION, SUPPORTED_BACKUP_SCHEMA_VERSIONS,
    },
    service_name::{ServiceName, ServiceNameError},
    uid::{GroupId, SubordinateId, UidError, UserId},
    username::{Username, UsernameError},
};

/// Shared validation helper: does `s` match `first` for the first byte and `rest` for every
/// following byte?
fn matches_charset(s: &str, first: impl Fn(char) -> bool, rest: impl Fn(char) -> bool) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if first(c) => chars.all(rest),
        _ => false,
    }
}

/// Implements `serde::{Serialize, Deserialize}` for a branded string type via its `Display`
/// and `FromStr` impls, so TOML config decoding (§4.13) runs every identifier through its C1
/// parser instead of accepting a bare, unvalidated `String`.
macro_rules! impl_serde_via_str {
    ($ty:ty) => {
        impl serde::Serialize for $ty {
            fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.collect_str(self)
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                s.parse().map_err(serde::de::Error::custom)
            }
        }
    };
}

pub(crate) use impl_serde_via_str;
