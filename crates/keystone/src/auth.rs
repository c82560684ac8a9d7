//! Security policy contracts and the authorization debug logger.
//!
//! The core never implements security policy. It consumes exactly two
//! contracts: an authentication policy that names the principals behind a
//! request, and an authorization policy that decides whether those
//! principals hold a permission on a context. If only one of the two is
//! configured, authorization is skipped entirely and every call is allowed —
//! the debug log then reads "no authorization policy in use".

use crate::config::ConfigError;
use keystone_dispatch::{Request, Resource};
use keystone_registry::{ComponentRegistry, TypeTag};
use std::sync::Arc;

/// Utility tag for the authentication policy.
pub const AUTHENTICATION_POLICY: TypeTag = TypeTag("keystone.authentication-policy");

/// Utility tag for the authorization policy.
pub const AUTHORIZATION_POLICY: TypeTag = TypeTag("keystone.authorization-policy");

/// Utility tag for the process default permission.
pub const DEFAULT_PERMISSION: TypeTag = TypeTag("keystone.default-permission");

/// Utility tag for the debug logger.
pub const DEBUG_LOGGER: TypeTag = TypeTag("keystone.debug-logger");

/// Marker permission that explicitly exempts a view from the default
/// permission.
pub const NO_PERMISSION_REQUIRED: &str = "__no_permission_required__";

/// Names the principals behind a request.
pub trait AuthenticationPolicy: Send + Sync {
    /// The principal identifiers effective for this request.
    fn effective_principals(&self, request: &Request) -> Vec<String>;
}

/// Decides whether principals hold a permission on a context.
pub trait AuthorizationPolicy: Send + Sync {
    /// True when access is granted.
    fn permits(
        &self,
        context: Option<&dyn Resource>,
        principals: &[String],
        permission: &str,
    ) -> bool;
}

/// Sink for authorization debug messages.
///
/// The default sink forwards to `tracing`; tests register a capturing
/// implementation to assert on the exact wording.
pub trait DebugLogger: Send + Sync {
    /// Records one message.
    fn log(&self, message: &str);
}

/// The default debug logger: `tracing::debug!` under the
/// `keystone::authorization` target.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingDebugLogger;

impl DebugLogger for TracingDebugLogger {
    fn log(&self, message: &str) {
        tracing::debug!(target: "keystone::authorization", "{message}");
    }
}

// Trait objects can't round-trip through `Arc<dyn Any>`, so policies are
// registered behind concrete holder types.
pub(crate) struct AuthnUtility(pub Arc<dyn AuthenticationPolicy>);
pub(crate) struct AuthzUtility(pub Arc<dyn AuthorizationPolicy>);
pub(crate) struct LoggerUtility(pub Arc<dyn DebugLogger>);
pub(crate) struct DefaultPermissionUtility(pub String);

pub(crate) fn authentication_policy(
    registry: &ComponentRegistry,
) -> Option<Arc<dyn AuthenticationPolicy>> {
    registry
        .utility::<AuthnUtility>(AUTHENTICATION_POLICY, "")
        .map(|holder| holder.0.clone())
}

pub(crate) fn authorization_policy(
    registry: &ComponentRegistry,
) -> Option<Arc<dyn AuthorizationPolicy>> {
    registry
        .utility::<AuthzUtility>(AUTHORIZATION_POLICY, "")
        .map(|holder| holder.0.clone())
}

pub(crate) fn debug_logger(registry: &ComponentRegistry) -> Arc<dyn DebugLogger> {
    registry
        .utility::<LoggerUtility>(DEBUG_LOGGER, "")
        .map(|holder| holder.0.clone())
        .unwrap_or_else(|| Arc::new(TracingDebugLogger))
}

pub(crate) fn default_permission(registry: &ComponentRegistry) -> Option<String> {
    registry
        .utility::<DefaultPermissionUtility>(DEFAULT_PERMISSION, "")
        .map(|holder| holder.0.clone())
}

/// Guard used while registering an authorization policy: an authorization
/// policy without an authentication policy can never be consulted, so the
/// registration is refused.
pub(crate) fn require_authentication(registry: &ComponentRegistry) -> Result<(), ConfigError> {
    if authentication_policy(registry).is_none() {
        return Err(ConfigError::AuthorizationRequiresAuthentication);
    }
    Ok(())
}
