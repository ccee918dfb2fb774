use std::{fmt, str::FromStr};

use thiserror::Error;

use super::{impl_serde_via_str, matches_charset};

impl_serde_via_str!(ContainerImage);

/// A container image reference: `name[:tag][@sha256:hex]`.
///
/// The name, tag, and digest are validated and kept decomposed so callers can
/// inspect them without re-parsing.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerImage {
    raw: String,
    name: String,
    tag: Option<String>,
    digest: Option<String>,
}

impl ContainerImage {
    #[must_use]
    pub fn new_literal(s: &'static str) -> Self {
        s.parse().expect("literal image reference must be valid")
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    #[must_use]
    pub fn digest(&self) -> Option<&str> {
        self.digest.as_deref()
    }
}

fn is_valid_name(s: &str) -> bool {
    !s.is_empty()
        && matches_charset(
            s,
            |c| c.is_ascii_alphanumeric(),
            |c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-'),
        )
}

fn is_valid_tag(s: &str) -> bool {
    !s.is_empty()
        && matches_charset(
            s,
            |c| c.is_ascii_alphanumeric(),
            |c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'),
        )
}

fn is_valid_digest(s: &str) -> bool {
    let Some(hex) = s.strip_prefix("sha256:") else {
        return false;
    };
    hex.len() == 64 && hex.bytes().all(|b| b.is_ascii_digit() || matches!(b, b'a'..=b'f'))
}

impl FromStr for ContainerImage {
    type Err = ImageError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ImageError::Empty);
        }

        let (rest, digest) = match s.split_once('@') {
            Some((rest, digest)) => {
                if !is_valid_digest(digest) {
                    return Err(ImageError::Digest(digest.to_owned()));
                }
                (rest, Some(digest.to_owned()))
            }
            None => (s, None),
        };

        // A tag separator is a `:` after the last `/`, so registry ports
        // (`host:5000/name`) are not mistaken for a tag.
        let name_and_tag_split = rest.rfind('/').map_or(0, |i| i + 1);
        let (name, tag) = match rest[name_and_tag_split..].find(':') {
            Some(i) => {
                let split_at = name_and_tag_split + i;
                (&rest[..split_at], Some(&rest[split_at + 1..]))
            }
            None => (rest, None),
        };

        if !is_valid_name(name) {
            return Err(ImageError::Name(name.to_owned()));
        }
        if let Some(tag) = tag {
            if !is_valid_tag(tag) {
                return Err(ImageError::Tag(tag.to_owned()));
            }
        }

        Ok(Self {
            raw: s.to_owned(),
            name: name.to_owned(),
            tag: tag.map(str::to_owned),
            digest,
        })
    }
}

impl fmt::Display for ContainerImage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl AsRef<str> for ContainerImage {
    fn as_ref(&self) -> &str {
        &self.raw
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ImageError {
    #[error("image reference must not be empty")]
    Empty,
    #[error("`{0}` is not a valid image name: must match [A-Za-z0-9_./-]+")]
    Name(String),
    #[error("`{0}` is not a valid image tag: must match [A-Za-z0-9_.-]+")]
    Tag(String),
    #[error("`{0}` is not a valid digest: expected sha256:<64 lowercase hex chars>")]
    Digest(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_name_only() {
        let img: ContainerImage = "alpine".parse().unwrap();
        assert_eq!(img.name(), "alpine");
        assert_eq!(img.tag(), None);
        assert_eq!(img.digest(), None);
    }

    #[test]
    fn parses_name_and_tag() {
        let img: ContainerImage = "ghcr.io/immich-app/immich-server:v1.100.0"
            .parse()
            .unwrap();
        assert_eq!(img.name(), "ghcr.io/immich-app/immich-server");
        assert_eq!(img.tag(), Some("v1.100.0"));
        assert_eq!(img.digest(), None);
    }

    #[test]
    fn parses_registry_port_without_mistaking_it_for_a_tag() {
        let img: ContainerImage = "localhost:5000/immich-server".parse().unwrap();
        assert_eq!(img.name(), "localhost:5000/immich-server");
        assert_eq!(img.tag(), None);
    }

    #[test]
    fn parses_digest_pinned_reference() {
        let digest = "a".repeat(64);
        let raw = format!("alpine@sha256:{digest}");
        let img: ContainerImage = raw.parse().unwrap();
        assert_eq!(img.name(), "alpine");
        assert_eq!(img.digest(), Some(format!("sha256:{digest}").as_str()));
    }

    #[test]
    fn parses_name_tag_and_digest_together() {
        let digest = "b".repeat(64);
        let raw = format!("alpine:3.19@sha256:{digest}");
        let img: ContainerImage = raw.parse().unwrap();
        assert_eq!(img.name(), "alpine");
        assert_eq!(img.tag(), Some("3.19"));
        assert!(img.digest().is_some());
    }

    #[test]
    fn rejects_uppercase_digest_hex() {
        let digest = "A".repeat(64);
        assert!(format!("alpine@sha256:{digest}")
            .parse::<ContainerImage>()
            .is_err());
    }

    #[test]
    fn rejects_malformed_tag_and_empty_reference() {
        assert!("alpine:".parse::<ContainerImage>().is_err());
        assert!("".parse::<ContainerImage>().is_err());
    }
}
