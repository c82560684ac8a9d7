//! The configurator façade.
//!
//! All registration flows through a [`Configurator`]: it owns a handle to
//! the registry being configured, appends deferred actions to a shared
//! ledger, and resolves and executes them in one batch at [`commit`]. Under
//! autocommit each action executes immediately instead — no deferral, no
//! conflict detection.
//!
//! Derived configurators (`with_package`, the child handed to an included
//! extension) share the ledger, registry, and directive table by reference
//! and copy the scalar context — package, info, include path, route prefix,
//! autocommit — by value. The include path is what conflict resolution uses
//! for override precedence: an action registered directly beats the same
//! registration made inside an include.
//!
//! [`commit`]: Configurator::commit

pub mod actions;
pub mod error;
pub mod routes;
pub mod static_views;
pub mod views;

pub use actions::{resolve_conflicts, Action, ActionFn, ActionState, ConfigEnv, Discriminator};
pub use error::{ConfigError, ConflictError, ConflictGroup};
pub use views::ViewConfig;

use crate::auth::{
    require_authentication, AuthenticationPolicy, AuthnUtility, AuthorizationPolicy,
    AuthzUtility, DebugLogger, DefaultPermissionUtility, LoggerUtility, TracingDebugLogger,
    AUTHENTICATION_POLICY, AUTHORIZATION_POLICY, DEBUG_LOGGER, DEFAULT_PERMISSION,
};
use crate::deriver::{
    resolve_renderer, DeriveOptions, RendererFactoryUtility, ViewDeriver, RENDERER_FACTORY,
    VIEW_MAPPER,
};
use crate::deriver::MapperUtility;
use crate::settings::{Settings, SETTINGS};
use crate::{Application, SharedRegistry};
use actions::execute_actions;
use keystone_dispatch::{
    JsonRendererFactory, RawView, RendererFactory, StringRendererFactory, ViewHandle, ViewMapper,
};
use keystone_registry::ComponentRegistry;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::{Arc, RwLock};

/// Execution phase for authorization-policy actions: after authentication
/// policies, before view registrations.
pub(crate) const PHASE_AUTHZ: i64 = 1;

/// Execution phase for view registrations: after all policy actions.
pub(crate) const PHASE_VIEW: i64 = 2;

/// Built-in configurator method names a directive may not shadow.
const RESERVED_NAMES: &[&str] = &[
    "action",
    "add_directive",
    "add_renderer",
    "add_route",
    "add_settings",
    "add_static_view",
    "add_view",
    "build",
    "commit",
    "derive_view",
    "directive",
    "include",
    "include_with_prefix",
    "registry",
    "set_authentication_policy",
    "set_authorization_policy",
    "set_debug_logger",
    "set_default_permission",
    "set_view_mapper",
    "with_package",
];

/// A directive body: receives the configurator it was invoked on and the
/// caller's arguments.
pub type DirectiveFn = Rc<dyn Fn(&mut Configurator, Value) -> Result<(), ConfigError>>;

/// An includable configuration unit.
///
/// The spec identifies the unit for de-duplication: including the same spec
/// twice applies it once.
pub trait ConfigExtension {
    /// Stable identity of this unit.
    fn spec(&self) -> String;

    /// Applies the unit's registrations to a derived configurator.
    fn apply(&self, config: &mut Configurator) -> Result<(), ConfigError>;
}

/// Adapts a closure into a [`ConfigExtension`] with an explicit spec.
pub fn extension<F>(spec: &str, body: F) -> impl ConfigExtension
where
    F: Fn(&mut Configurator) -> Result<(), ConfigError>,
{
    struct FnExtension<F> {
        spec: String,
        body: F,
    }

    impl<F> ConfigExtension for FnExtension<F>
    where
        F: Fn(&mut Configurator) -> Result<(), ConfigError>,
    {
        fn spec(&self) -> String {
            self.spec.clone()
        }

        fn apply(&self, config: &mut Configurator) -> Result<(), ConfigError> {
            (self.body)(config)
        }
    }

    FnExtension {
        spec: spec.to_string(),
        body,
    }
}

/// The registration façade.
pub struct Configurator {
    state: Rc<RefCell<ActionState>>,
    env: ConfigEnv,
    directives: Rc<RefCell<HashMap<String, DirectiveFn>>>,
    package: String,
    info: String,
    include_path: Vec<String>,
    route_prefix: Option<String>,
    autocommit: bool,
}

impl Default for Configurator {
    fn default() -> Self {
        Self::new()
    }
}

impl Configurator {
    /// A configurator over a fresh registry, with deferred (batch) commit.
    ///
    /// The fresh registry comes pre-populated the way every keystone
    /// application starts: default settings, the `json` and `string`
    /// renderer factories, and the tracing-backed debug logger.
    pub fn new() -> Self {
        let registry: SharedRegistry = Arc::new(RwLock::new(ComponentRegistry::new()));
        {
            let mut guard = registry.write().expect("registry lock poisoned");
            guard.register_utility(SETTINGS, "", Arc::new(Settings::new()));
            guard.register_utility(
                RENDERER_FACTORY,
                "json",
                Arc::new(RendererFactoryUtility(Arc::new(JsonRendererFactory))),
            );
            guard.register_utility(
                RENDERER_FACTORY,
                "string",
                Arc::new(RendererFactoryUtility(Arc::new(StringRendererFactory))),
            );
            guard.register_utility(
                DEBUG_LOGGER,
                "",
                Arc::new(LoggerUtility(Arc::new(TracingDebugLogger))),
            );
        }
        Configurator {
            state: Rc::new(RefCell::new(ActionState::new())),
            env: ConfigEnv { registry },
            directives: Rc::new(RefCell::new(HashMap::new())),
            package: "app".to_string(),
            info: String::new(),
            include_path: Vec::new(),
            route_prefix: None,
            autocommit: false,
        }
    }

    /// A configurator that executes every action immediately.
    pub fn autocommit() -> Self {
        let mut config = Configurator::new();
        config.autocommit = true;
        config
    }

    /// The configured registry handle.
    pub fn registry(&self) -> SharedRegistry {
        self.env.registry.clone()
    }

    /// The current package, used for relative resolution and as the default
    /// provenance string.
    pub fn package(&self) -> &str {
        &self.package
    }

    /// Sets the current package.
    pub fn set_package(&mut self, package: &str) {
        self.package = package.to_string();
    }

    /// The current provenance string.
    pub fn info(&self) -> &str {
        &self.info
    }

    /// Sets the provenance string attached to subsequent actions.
    pub fn set_info(&mut self, info: &str) {
        self.info = info.to_string();
    }

    /// The current include path.
    pub fn include_path(&self) -> &[String] {
        &self.include_path
    }

    /// The accumulated route prefix.
    pub fn route_prefix(&self) -> Option<&str> {
        self.route_prefix.as_deref()
    }

    /// True when actions execute immediately.
    pub fn is_autocommit(&self) -> bool {
        self.autocommit
    }

    /// Submits one action: appends it to the shared ledger, or executes it
    /// immediately under autocommit (in which case failures propagate raw,
    /// unwrapped).
    pub fn action(
        &mut self,
        discriminator: Option<Discriminator>,
        callable: Option<ActionFn>,
        args: Vec<String>,
        order: i64,
    ) -> Result<(), ConfigError> {
        if self.autocommit {
            if let Some(callable) = callable {
                callable(&self.env)?;
            }
            return Ok(());
        }
        let info = if self.info.is_empty() {
            self.package.clone()
        } else {
            self.info.clone()
        };
        self.state.borrow_mut().action(
            discriminator,
            callable,
            args,
            self.include_path.clone(),
            info,
            order,
        );
        Ok(())
    }

    /// Resolves conflicts across the whole ledger and executes the winners.
    pub fn commit(&mut self) -> Result<(), ConfigError> {
        let pending = self.state.borrow_mut().take_actions();
        tracing::debug!(
            target: "keystone::config",
            actions = pending.len(),
            "committing configuration"
        );
        let resolved = resolve_conflicts(pending)?;
        execute_actions(resolved, &self.env)
    }

    /// Commits and assembles the application. The registry is pushed onto
    /// the process-global registry list and is read-only from here on.
    pub fn build(mut self) -> Result<Application, ConfigError> {
        self.commit()?;
        Ok(Application::new(self.env.registry.clone()))
    }

    /// Includes a configuration unit.
    ///
    /// The unit's registrations land on a derived configurator whose include
    /// path is one element deeper, so anything the caller registers directly
    /// overrides the included registrations. A spec already included (per
    /// the ledger's first-seen set) is skipped.
    pub fn include<E: ConfigExtension>(&mut self, extension: E) -> Result<(), ConfigError> {
        self.include_inner(&extension, None)
    }

    /// Like [`include`](Configurator::include), concatenating a route prefix
    /// onto the current one for the duration of the include.
    pub fn include_with_prefix<E: ConfigExtension>(
        &mut self,
        extension: E,
        route_prefix: &str,
    ) -> Result<(), ConfigError> {
        self.include_inner(&extension, Some(route_prefix))
    }

    fn include_inner(
        &mut self,
        extension: &dyn ConfigExtension,
        route_prefix: Option<&str>,
    ) -> Result<(), ConfigError> {
        let spec = extension.spec();
        if !self.state.borrow_mut().process_spec(&spec) {
            return Ok(());
        }
        let mut include_path = self.include_path.clone();
        include_path.push(spec.clone());
        let mut child = Configurator {
            state: self.state.clone(),
            env: self.env.clone(),
            directives: self.directives.clone(),
            package: spec.clone(),
            info: spec,
            include_path,
            route_prefix: join_route_prefix(self.route_prefix.as_deref(), route_prefix),
            autocommit: self.autocommit,
        };
        extension.apply(&mut child)
    }

    /// A derived configurator for another package: same registry, ledger,
    /// and directives, scalar context copied.
    pub fn with_package(&self, package: &str) -> Configurator {
        Configurator {
            state: self.state.clone(),
            env: self.env.clone(),
            directives: self.directives.clone(),
            package: package.to_string(),
            info: self.info.clone(),
            include_path: self.include_path.clone(),
            route_prefix: self.route_prefix.clone(),
            autocommit: self.autocommit,
        }
    }

    /// Registers an extension method invocable through
    /// [`directive`](Configurator::directive). Directives persist across
    /// configurator derivations; re-adding a name replaces the previous
    /// body, but shadowing a built-in method is refused.
    pub fn add_directive<F>(&mut self, name: &str, body: F) -> Result<(), ConfigError>
    where
        F: Fn(&mut Configurator, Value) -> Result<(), ConfigError> + 'static,
    {
        if RESERVED_NAMES.contains(&name) {
            return Err(ConfigError::DirectiveCollision(name.to_string()));
        }
        self.directives
            .borrow_mut()
            .insert(name.to_string(), Rc::new(body));
        Ok(())
    }

    /// Invokes a registered directive.
    pub fn directive(&mut self, name: &str, args: Value) -> Result<(), ConfigError> {
        let body = self
            .directives
            .borrow()
            .get(name)
            .cloned()
            .ok_or_else(|| ConfigError::UnknownDirective(name.to_string()))?;
        body(self, args)
    }

    /// Registers the authentication policy.
    pub fn set_authentication_policy(
        &mut self,
        policy: Arc<dyn AuthenticationPolicy>,
    ) -> Result<(), ConfigError> {
        let discriminator = Discriminator::new("authentication-policy", []);
        self.action(
            Some(discriminator),
            Some(Box::new(move |env: &ConfigEnv| {
                env.registry
                    .write()
                    .expect("registry lock poisoned")
                    .register_utility(AUTHENTICATION_POLICY, "", Arc::new(AuthnUtility(policy)));
                Ok(())
            })),
            Vec::new(),
            0,
        )
    }

    /// Registers the authorization policy. The registration executes after
    /// authentication-policy actions and refuses to apply without one.
    pub fn set_authorization_policy(
        &mut self,
        policy: Arc<dyn AuthorizationPolicy>,
    ) -> Result<(), ConfigError> {
        let discriminator = Discriminator::new("authorization-policy", []);
        self.action(
            Some(discriminator),
            Some(Box::new(move |env: &ConfigEnv| {
                let mut guard = env.registry.write().expect("registry lock poisoned");
                require_authentication(&guard)?;
                guard.register_utility(AUTHORIZATION_POLICY, "", Arc::new(AuthzUtility(policy)));
                Ok(())
            })),
            Vec::new(),
            PHASE_AUTHZ,
        )
    }

    /// Registers the default permission applied to views with no explicit
    /// permission and no explicit exemption.
    pub fn set_default_permission(&mut self, permission: &str) -> Result<(), ConfigError> {
        let discriminator = Discriminator::new("default-permission", []);
        let permission = permission.to_string();
        self.action(
            Some(discriminator),
            Some(Box::new(move |env: &ConfigEnv| {
                env.registry
                    .write()
                    .expect("registry lock poisoned")
                    .register_utility(
                        DEFAULT_PERMISSION,
                        "",
                        Arc::new(DefaultPermissionUtility(permission)),
                    );
                Ok(())
            })),
            Vec::new(),
            0,
        )
    }

    /// Registers the process-wide default view mapper.
    pub fn set_view_mapper(&mut self, mapper: Arc<dyn ViewMapper>) -> Result<(), ConfigError> {
        let discriminator = Discriminator::new("view-mapper", []);
        self.action(
            Some(discriminator),
            Some(Box::new(move |env: &ConfigEnv| {
                env.registry
                    .write()
                    .expect("registry lock poisoned")
                    .register_utility(VIEW_MAPPER, "", Arc::new(MapperUtility(mapper)));
                Ok(())
            })),
            Vec::new(),
            0,
        )
    }

    /// Registers a named renderer factory. The empty name is the process
    /// default renderer.
    pub fn add_renderer(
        &mut self,
        name: &str,
        factory: Arc<dyn RendererFactory>,
    ) -> Result<(), ConfigError> {
        let discriminator = Discriminator::new("renderer", [name.to_string()]);
        let name = name.to_string();
        self.action(
            Some(discriminator),
            Some(Box::new(move |env: &ConfigEnv| {
                env.registry
                    .write()
                    .expect("registry lock poisoned")
                    .register_utility(
                        RENDERER_FACTORY,
                        &name,
                        Arc::new(RendererFactoryUtility(factory)),
                    );
                Ok(())
            })),
            Vec::new(),
            0,
        )
    }

    /// Replaces the debug logger (tests use a capturing one).
    pub fn set_debug_logger(&mut self, logger: Arc<dyn DebugLogger>) {
        self.env
            .registry
            .write()
            .expect("registry lock poisoned")
            .register_utility(DEBUG_LOGGER, "", Arc::new(LoggerUtility(logger)));
    }

    /// Merges settings into the registered settings map, immediately.
    pub fn add_settings(&mut self, settings: Settings) {
        let registry = self.env.registry.clone();
        let mut guard = registry.write().expect("registry lock poisoned");
        let mut merged = guard
            .utility::<Settings>(SETTINGS, "")
            .map(|current| (*current).clone())
            .unwrap_or_default();
        merged.merge(&settings);
        guard.register_utility(SETTINGS, "", Arc::new(merged));
    }

    /// Derives a wrapped view outside of registration, using the registry's
    /// current policies and (optionally) a named renderer.
    pub fn derive_view(
        &self,
        raw: RawView,
        renderer: Option<&str>,
    ) -> Result<ViewHandle, ConfigError> {
        let renderer = match renderer {
            Some(name) => {
                let guard = self.env.registry.read().expect("registry lock poisoned");
                Some(resolve_renderer(&guard, name, &self.package)?)
            }
            None => None,
        };
        let deriver = ViewDeriver::from_registry(&self.env.registry);
        deriver.derive(
            raw,
            DeriveOptions {
                renderer,
                package: self.package.clone(),
                ..Default::default()
            },
        )
    }
}

fn join_route_prefix(parent: Option<&str>, new: Option<&str>) -> Option<String> {
    match (parent, new) {
        (None, None) => None,
        (Some(parent), None) => Some(parent.to_string()),
        (None, Some(new)) => Some(new.trim_matches('/').to_string()),
        (Some(parent), Some(new)) => Some(format!(
            "{}/{}",
            parent.trim_end_matches('/'),
            new.trim_matches('/')
        )),
    }
}
