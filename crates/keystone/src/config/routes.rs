//! Route registration.
//!
//! Routes are thin here: the core's interest in a route is (a) the
//! route-prefix concatenation performed by nested includes, (b) the
//! per-route request-type tag that lets views constrain themselves to one
//! route's requests, and (c) conflict detection on route names. URL pattern
//! matching itself belongs to the surrounding router.

use crate::config::actions::{ConfigEnv, Discriminator};
use crate::config::error::ConfigError;
use crate::config::Configurator;
use keystone_registry::{ComponentRegistry, TypeTag};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Utility tag the routes mapper is registered under.
pub const ROUTES_MAPPER: TypeTag = TypeTag("keystone.routes-mapper");

/// Name prefix of per-route request-type tags.
pub const ROUTE_REQUEST_PREFIX: &str = "keystone.route-request.";

/// One registered route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    /// Unique route name.
    pub name: String,
    /// URL pattern, with any include route-prefix already applied.
    pub pattern: String,
}

/// Ordered collection of registered routes.
#[derive(Debug, Clone, Default)]
pub struct RoutesMapper {
    routes: Vec<RouteSpec>,
}

impl RoutesMapper {
    /// The routes in registration order.
    pub fn routes(&self) -> &[RouteSpec] {
        &self.routes
    }

    /// Finds a route by name.
    pub fn get(&self, name: &str) -> Option<&RouteSpec> {
        self.routes.iter().find(|route| route.name == name)
    }

    fn insert(&mut self, spec: RouteSpec) {
        match self.routes.iter_mut().find(|route| route.name == spec.name) {
            Some(existing) => *existing = spec,
            None => self.routes.push(spec),
        }
    }
}

/// The request-type tag carried by requests matched to the named route.
///
/// Tags compare by name, so repeated calls for the same route agree.
pub fn route_request_tag(name: &str) -> TypeTag {
    TypeTag(Box::leak(
        format!("{ROUTE_REQUEST_PREFIX}{name}").into_boxed_str(),
    ))
}

/// True when a tag is a route-request tag.
pub fn is_route_request_tag(tag: TypeTag) -> bool {
    tag.name().starts_with(ROUTE_REQUEST_PREFIX)
}

/// The route-request tag for a route that must already be registered.
pub(crate) fn route_request_tag_checked(
    registry: &ComponentRegistry,
    name: &str,
) -> Result<TypeTag, ConfigError> {
    let mapper = registry
        .utility::<RoutesMapper>(ROUTES_MAPPER, "")
        .ok_or_else(|| ConfigError::NoSuchRoute(name.to_string()))?;
    if mapper.get(name).is_none() {
        return Err(ConfigError::NoSuchRoute(name.to_string()));
    }
    Ok(route_request_tag(name))
}

impl Configurator {
    /// Registers a named route. The configurator's accumulated route prefix
    /// is prepended to the pattern; two routes with the same name conflict.
    pub fn add_route(&mut self, name: &str, pattern: &str) -> Result<(), ConfigError> {
        let pattern = match self.route_prefix() {
            Some(prefix) => format!(
                "{}/{}",
                prefix.trim_end_matches('/'),
                pattern.trim_start_matches('/')
            ),
            None => pattern.to_string(),
        };
        let discriminator = Discriminator::new("route", [name.to_string()]);
        let args = vec![format!("name={name:?}"), format!("pattern={pattern:?}")];
        let spec = RouteSpec {
            name: name.to_string(),
            pattern,
        };
        self.action(
            Some(discriminator),
            Some(Box::new(move |env: &ConfigEnv| {
                let mut guard = env.registry.write().expect("registry lock poisoned");
                let mut mapper = guard
                    .utility::<RoutesMapper>(ROUTES_MAPPER, "")
                    .map(|current| (*current).clone())
                    .unwrap_or_default();
                mapper.insert(spec);
                guard.register_utility(ROUTES_MAPPER, "", Arc::new(mapper));
                Ok(())
            })),
            args,
            0,
        )
    }
}
