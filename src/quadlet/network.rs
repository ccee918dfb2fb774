use std::fmt::{self, Display, Formatter};

use serde::Serialize;

/// The `[Network]` section of a generated `.network` quadlet file.
#[derive(Serialize, Debug, Default, Clone, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct Network {
    pub network_name: String,

    pub driver: Option<String>,

    #[serde(skip_serializing_if = "is_false")]
    pub internal: bool,
}

fn is_false(b: &bool) -> bool {
    !b
}

impl Display for Network {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let network = crate::serde::quadlet::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&network)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_internal_bridge_network() {
        let network = Network {
            network_name: "immich.network".to_owned(),
            driver: Some("bridge".to_owned()),
            internal: true,
        };
        assert_eq!(
            network.to_string(),
            "[Network]\n\
            NetworkName=immich.network\n\
            Driver=bridge\n\
            Internal=true\n"
        );
    }

    #[test]
    fn non_internal_network_omits_internal_key() {
        let network = Network {
            network_name: "caddy.network".to_owned(),
            driver: None,
            internal: false,
        };
        assert_eq!(network.to_string(), "[Network]\nNetworkName=caddy.network\n");
    }
}
