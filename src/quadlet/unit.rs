use std::fmt::{self, Display, Formatter};

/// The `[Unit]` section common to every generated quadlet file.
///
/// Unlike [`super::Container`] this is rendered with a hand-written
/// [`Display`] impl rather than the INI [`serde::Serializer`]: the
/// dependency lists are space-joined onto a single line rather than
/// repeated per entry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Unit {
    pub description: Option<String>,
    pub wants: Vec<String>,
    pub requires: Vec<String>,
    pub before: Vec<String>,
    pub after: Vec<String>,
}

impl Unit {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

impl Display for Unit {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        writeln!(f, "[Unit]")?;

        if let Some(description) = &self.description {
            writeln!(f, "Description={description}")?;
        }

        if !self.wants.is_empty() {
            writeln!(f, "Wants={}", self.wants.join(" "))?;
        }

        if !self.requires.is_empty() {
            writeln!(f, "Requires={}", self.requires.join(" "))?;
        }

        if !self.before.is_empty() {
            writeln!(f, "Before={}", self.before.join(" "))?;
        }

        if !self.after.is_empty() {
            writeln!(f, "After={}", self.after.join(" "))?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_dependency_lines() {
        let unit = Unit {
            description: Some("immich server".to_owned()),
            requires: vec![
                "immich-network.service".to_owned(),
                "immich-redis.service".to_owned(),
                "immich-postgres.service".to_owned(),
            ],
            wants: vec!["immich-machine-learning.service".to_owned()],
            ..Unit::default()
        };
        assert_eq!(
            unit.to_string(),
            "[Unit]\n\
            Description=immich server\n\
            Wants=immich-machine-learning.service\n\
            Requires=immich-network.service immich-redis.service immich-postgres.service\n"
        );
    }

    #[test]
    fn empty_unit_is_empty() {
        assert!(Unit::default().is_empty());
    }
}
