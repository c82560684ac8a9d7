//! Declarative configuration and view dispatch for resource-oriented
//! applications.
//!
//! keystone lets independently-authored pieces of code register intents
//! against a shared registry — "add this view for this context and request
//! shape", "add this route", "include this sub-configuration" — resolves
//! conflicts between competing registrations deterministically, and at
//! commit time materializes those intents into an efficient runtime
//! view-lookup structure keyed by request attributes.
//!
//! # The two phases
//!
//! **Configuration** happens on one thread through a [`Configurator`]:
//! registration calls append deferred actions to a shared ledger. Nothing
//! takes effect until [`Configurator::commit`] (or
//! [`Configurator::build`]), which groups actions by discriminator, applies
//! the include-depth override rule, raises a [`ConflictError`] when two
//! registrations at the same depth contest one slot, and executes the
//! winners. A configurator created with [`Configurator::autocommit`] skips
//! deferral entirely — each action runs on the spot, with no conflict
//! detection.
//!
//! **Dispatch** happens after commit, read-only and concurrently: the
//! registry is queried most-specific-first for a view matching the request's
//! and context's type tags, and the registered view — a single wrapped
//! callable, or a multi-view arbitrating several predicate-scored
//! candidates — is invoked.
//!
//! # Quick tour
//!
//! ```
//! use keystone::{Configurator, Request, ViewConfig};
//! use keystone::testing::text_view;
//!
//! let mut config = Configurator::new();
//! config.add_view(ViewConfig::new().view(text_view("hello", "hello world")))?;
//! let app = config.build()?;
//!
//! let output = app.invoke_view(None, &Request::new("GET", "/"), "")?;
//! assert_eq!(output.as_response().unwrap().body_text(), "hello world");
//! # keystone::global_registries::remove(&app.registry());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod app;
pub mod auth;
pub mod config;
pub mod deriver;
pub mod settings;
pub mod testing;

use keystone_registry::ComponentRegistry;
use std::sync::{Arc, RwLock};

pub use app::Application;
pub use auth::{
    AuthenticationPolicy, AuthorizationPolicy, DebugLogger, TracingDebugLogger,
    NO_PERMISSION_REQUIRED,
};
pub use config::{
    extension, resolve_conflicts, Action, ActionFn, ActionState, ConfigEnv, ConfigError,
    ConfigExtension, Configurator, ConflictError, ConflictGroup, Discriminator, ViewConfig,
};
pub use config::routes::{route_request_tag, RouteSpec, RoutesMapper};
pub use deriver::{
    httpdate, CachePolicy, DecoratorFn, DefaultViewMapper, DeriveOptions, ViewDeriver,
    WrappedState,
};
pub use settings::Settings;

// The runtime dispatch layer, re-exported so applications depend on one
// crate.
pub use keystone_dispatch::{
    classify_callable, context_repr, context_tags, Accept, CallingConvention, ClassView,
    ClassViewInstance, CustomPredicate, DispatchError, Extensions, MapperOptions, MultiView,
    ParamSpec, Phash, PredicateSet, RawView, RegisteredView, Renderer, RendererFactory,
    RendererInfo, Request, Resource, Response, ViewHandle, ViewMapper, ViewMeta, ViewOutput,
    ViewPredicate, ANY_CONTEXT, REQUEST,
};
pub use keystone_registry::TypeTag;

/// The registry handle shared between configuration and dispatch: written
/// only during the single-threaded configuration phase, then read
/// concurrently.
pub type SharedRegistry = Arc<RwLock<ComponentRegistry>>;

/// The process-global registry list.
///
/// Every [`Configurator::build`] appends its registry here, most recent
/// last. The list exists for tooling and test harnesses that need "the
/// registry of the application created last" without threading a handle
/// through; its lifecycle is explicit — appended on application creation,
/// removable and clearable by whoever manages process state.
pub mod global_registries {
    use super::SharedRegistry;
    use std::sync::Mutex;

    static REGISTRIES: Mutex<Vec<SharedRegistry>> = Mutex::new(Vec::new());

    /// Appends a registry.
    pub fn push(registry: &SharedRegistry) {
        REGISTRIES
            .lock()
            .expect("global registry list poisoned")
            .push(registry.clone());
    }

    /// The registry of the most recently built application.
    pub fn last() -> Option<SharedRegistry> {
        REGISTRIES
            .lock()
            .expect("global registry list poisoned")
            .last()
            .cloned()
    }

    /// All registries, oldest first.
    pub fn all() -> Vec<SharedRegistry> {
        REGISTRIES
            .lock()
            .expect("global registry list poisoned")
            .clone()
    }

    /// Removes a specific registry; true if it was present.
    pub fn remove(registry: &SharedRegistry) -> bool {
        let mut registries = REGISTRIES
            .lock()
            .expect("global registry list poisoned");
        match registries
            .iter()
            .position(|candidate| std::sync::Arc::ptr_eq(candidate, registry))
        {
            Some(index) => {
                registries.remove(index);
                true
            }
            None => false,
        }
    }

    /// Empties the list.
    pub fn clear() {
        REGISTRIES
            .lock()
            .expect("global registry list poisoned")
            .clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keystone_registry::ComponentRegistry;
    use serial_test::serial;
    use std::sync::{Arc, RwLock};

    fn registry() -> SharedRegistry {
        Arc::new(RwLock::new(ComponentRegistry::new()))
    }

    #[test]
    #[serial]
    fn test_global_registries_lifecycle() {
        global_registries::clear();
        assert!(global_registries::last().is_none());
        assert!(global_registries::all().is_empty());

        let first = registry();
        let second = registry();
        global_registries::push(&first);
        global_registries::push(&second);

        assert!(Arc::ptr_eq(&global_registries::last().unwrap(), &second));
        assert_eq!(global_registries::all().len(), 2);

        assert!(global_registries::remove(&second));
        assert!(!global_registries::remove(&second));
        assert!(Arc::ptr_eq(&global_registries::last().unwrap(), &first));

        global_registries::clear();
        assert!(global_registries::last().is_none());
    }
}
