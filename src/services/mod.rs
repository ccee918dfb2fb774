//! The service registry (A5): a compile-time table mapping [`ServiceName`]
//! to a constructor for its [`Service`] trait object, plus the fixed
//! cross-service ordering `all` operations use.

mod actual;
mod caddy;
mod freshrss;
mod immich;

use crate::{
    ids::ServiceName,
    service::{Service, ServiceRuntime},
};

/// One row of the registry: a name and how to build its boxed [`Service`].
struct Registration {
    name: &'static str,
    build: fn() -> Box<dyn Service>,
}

/// The managed services, in the fixed start order described in the design
/// notes (`caddy, actual, freshrss, immich`); `stop_order_names` reverses it.
const REGISTRY: &[Registration] = &[
    Registration {
        name: "caddy",
        build: || Box::new(ServiceRuntime::new(caddy::Caddy)),
    },
    Registration {
        name: "actual",
        build: || Box::new(ServiceRuntime::new(actual::Actual)),
    },
    Registration {
        name: "freshrss",
        build: || Box::new(ServiceRuntime::new(freshrss::FreshRss)),
    },
    Registration {
        name: "immich",
        build: || Box::new(ServiceRuntime::new(immich::Immich)),
    },
];

/// Looks up and constructs the service named by `name`.
///
/// # Errors
///
/// Returns [`crate::error::ServiceError::UnknownService`] if no row matches.
pub fn lookup(name: &ServiceName) -> Result<Box<dyn Service>, crate::error::DivbanError> {
    REGISTRY
        .iter()
        .find(|row| row.name == name.as_str())
        .map(|row| (row.build)())
        .ok_or_else(|| crate::error::ServiceError::UnknownService(name.to_string()).into())
}

/// Every registered service, constructed in the fixed start order.
#[must_use]
pub fn all_in_start_order() -> Vec<Box<dyn Service>> {
    REGISTRY.iter().map(|row| (row.build)()).collect()
}

/// Every registered service, constructed in the reverse (stop) order.
#[must_use]
pub fn all_in_stop_order() -> Vec<Box<dyn Service>> {
    let mut services = all_in_start_order();
    services.reverse();
    services
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_registered_name_is_unique() {
        let mut names: Vec<&str> = REGISTRY.iter().map(|row| row.name).collect();
        let original_len = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), original_len);
    }

    #[test]
    fn lookup_resolves_every_registered_name() {
        for row in REGISTRY {
            let service = lookup(&ServiceName::new_literal(row.name)).unwrap();
            assert_eq!(service.name().as_str(), row.name);
        }
    }

    #[test]
    fn unknown_service_name_is_rejected() {
        let result = lookup(&ServiceName::new_literal("not-a-real-service"));
        assert!(result.is_err());
    }

    #[test]
    fn start_and_stop_orders_are_exact_reverses() {
        let start: Vec<String> = all_in_start_order().iter().map(|s| s.name().to_string()).collect();
        let mut stop: Vec<String> = all_in_stop_order().iter().map(|s| s.name().to_string()).collect();
        stop.reverse();
        assert_eq!(start, stop);
        assert_eq!(start, vec!["caddy", "actual", "freshrss", "immich"]);
    }
}
