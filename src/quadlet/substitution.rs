//! Placeholder substitution for the closed set of variables the quadlet
//! generator resolves before emitting a unit (§4.3): `${DATA_DIR}`,
//! `${UPLOAD_LOCATION}`, `${DB_DATA_LOCATION}`, `${DB_USERNAME}`,
//! `${DB_DATABASE_NAME}`. Substitution is a literal string replace with no
//! shell expansion, matching the invariant that every `AbsolutePath` in a
//! generated quadlet is written verbatim.

/// The values available for substitution in a single container/stack's
/// generated text. Fields left `None` leave their placeholder untouched.
#[derive(Debug, Clone, Default)]
pub struct SubstitutionContext {
    pub data_dir: Option<String>,
    pub upload_location: Option<String>,
    pub db_data_location: Option<String>,
    pub db_username: Option<String>,
    pub db_database_name: Option<String>,
}

impl SubstitutionContext {
    fn pairs(&self) -> [(&'static str, Option<&str>); 5] {
        [
            ("${DATA_DIR}", self.data_dir.as_deref()),
            ("${UPLOAD_LOCATION}", self.upload_location.as_deref()),
            ("${DB_DATA_LOCATION}", self.db_data_location.as_deref()),
            ("${DB_USERNAME}", self.db_username.as_deref()),
            ("${DB_DATABASE_NAME}", self.db_database_name.as_deref()),
        ]
    }

    /// Replace every placeholder present in `s` with its configured value.
    #[must_use]
    pub fn substitute(&self, s: &str) -> String {
        let mut out = s.to_owned();
        for (placeholder, value) in self.pairs() {
            if let Some(value) = value {
                out = out.replace(placeholder, value);
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_db_username_and_database_name() {
        let ctx = SubstitutionContext {
            db_username: Some("immich".to_owned()),
            db_database_name: Some("immich".to_owned()),
            ..SubstitutionContext::default()
        };
        assert_eq!(
            ctx.substitute("pg_isready -U ${DB_USERNAME} -d ${DB_DATABASE_NAME}"),
            "pg_isready -U immich -d immich"
        );
    }

    #[test]
    fn leaves_unconfigured_placeholders_untouched() {
        let ctx = SubstitutionContext::default();
        assert_eq!(ctx.substitute("${DATA_DIR}/upload"), "${DATA_DIR}/upload");
    }

    #[test]
    fn substitutes_data_dir_in_volume_source() {
        let ctx = SubstitutionContext {
            data_dir: Some("/srv/immich".to_owned()),
            ..SubstitutionContext::default()
        };
        assert_eq!(ctx.substitute("${DATA_DIR}/upload"), "/srv/immich/upload");
    }
}
