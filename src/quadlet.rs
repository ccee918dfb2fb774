mod container;
pub mod hardware;
mod network;
pub mod service;
pub mod substitution;
mod unit;
mod volume;

use std::fmt::{self, Display, Formatter};

pub use self::{
    container::Container, network::Network, service::Service, unit::Unit, volume::Volume,
};

/// A complete generated quadlet file: an optional `[Unit]` section, the
/// resource-specific section, and an optional `[Service]` section.
///
/// `Install` sections are intentionally absent: every unit managed by this
/// crate is started directly by the orchestrator rather than through systemd
/// target dependencies, so there is nothing to install.
#[derive(Debug, Clone, PartialEq)]
pub struct File {
    pub unit: Option<Unit>,
    pub resource: Resource,
    pub service: Option<Service>,
}

impl Display for File {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        if let Some(unit) = &self.unit {
            writeln!(f, "{unit}")?;
        }

        write!(f, "{}", self.resource)?;

        if let Some(service) = &self.service {
            write!(f, "\n{service}")?;
        }

        Ok(())
    }
}

impl From<Resource> for File {
    fn from(value: Resource) -> Self {
        Self {
            unit: None,
            resource: value,
            service: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    Container(Box<Container>),
    Network(Network),
    Volume(Volume),
}

impl Display for Resource {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        match self {
            Self::Container(container) => write!(f, "{container}"),
            Self::Network(network) => write!(f, "{network}"),
            Self::Volume(volume) => write!(f, "{volume}"),
        }
    }
}

impl Display for Container {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        let rendered = crate::serde::quadlet::to_string(self).map_err(|_| fmt::Error)?;
        f.write_str(&rendered)
    }
}

impl From<Container> for Resource {
    fn from(value: Container) -> Self {
        Self::Container(Box::new(value))
    }
}

impl From<Box<Container>> for Resource {
    fn from(value: Box<Container>) -> Self {
        Self::Container(value)
    }
}

impl From<Network> for Resource {
    fn from(value: Network) -> Self {
        Self::Network(value)
    }
}

impl From<Volume> for Resource {
    fn from(value: Volume) -> Self {
        Self::Volume(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_without_unit_or_service_renders_only_resource() {
        let file = File::from(Resource::Network(Network {
            network_name: "immich.network".to_owned(),
            driver: Some("bridge".to_owned()),
            internal: true,
        }));
        assert_eq!(
            file.to_string(),
            "[Network]\nNetworkName=immich.network\nDriver=bridge\nInternal=true\n"
        );
    }
}
