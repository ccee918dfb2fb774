use std::fmt::{self, Display, Formatter};

use serde::Serialize;

/// The `[Volume]` section of a generated `.volume` quadlet file.
#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Volume {
    pub volume_name: String,
    pub description: Option<String>,
}

impl Display for Volume {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let volume = crate::serde::quadlet::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&volume)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_named_volume() {
        let volume = Volume {
            volume_name: "immich_pgdata".to_owned(),
            description: Some("immich postgres data".to_owned()),
        };
        assert_eq!(
            volume.to_string(),
            "[Volume]\n\
            VolumeName=immich_pgdata\n\
            Description=immich postgres data\n"
        );
    }
}
