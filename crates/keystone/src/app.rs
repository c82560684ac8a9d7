//! Application assembly and request-time entry points.
//!
//! An [`Application`] is what a successful [`Configurator::build`] returns:
//! a handle over the committed, effectively read-only registry. From here on
//! the registry is only read — concurrently, from as many request threads as
//! the surrounding server runs.
//!
//! [`Configurator::build`]: crate::Configurator::build

use crate::settings::{Settings, SETTINGS};
use crate::{global_registries, SharedRegistry};
use keystone_dispatch::{
    context_tags, DispatchError, RegisteredView, Request, Resource, ViewOutput,
    EXCEPTION_VIEW_CLASSIFIER, PROVIDED_VIEW, VIEW_CLASSIFIER,
};
use keystone_registry::TypeTag;
use std::sync::Arc;

/// A committed, dispatchable application.
pub struct Application {
    registry: SharedRegistry,
}

impl Application {
    /// Wraps a committed registry and records it on the process-global
    /// registry list.
    pub(crate) fn new(registry: SharedRegistry) -> Self {
        global_registries::push(&registry);
        tracing::debug!(target: "keystone::app", "application created");
        Application { registry }
    }

    /// The application's registry.
    pub fn registry(&self) -> SharedRegistry {
        self.registry.clone()
    }

    /// The committed settings.
    pub fn settings(&self) -> Arc<Settings> {
        self.registry
            .read()
            .expect("registry lock poisoned")
            .utility::<Settings>(SETTINGS, "")
            .unwrap_or_else(|| Arc::new(Settings::new()))
    }

    fn lookup(
        &self,
        classifier: TypeTag,
        context: Option<&dyn Resource>,
        request: &Request,
        name: &str,
    ) -> Option<Arc<RegisteredView>> {
        let guard = self.registry.read().expect("registry lock poisoned");
        guard
            .lookup(
                classifier,
                &request.request_tags(),
                &context_tags(context),
                PROVIDED_VIEW,
                name,
            )
            .and_then(|value| value.downcast::<RegisteredView>().ok())
    }

    /// Dispatches to the best-matching ordinary view.
    pub fn invoke_view(
        &self,
        context: Option<&dyn Resource>,
        request: &Request,
        name: &str,
    ) -> Result<ViewOutput, DispatchError> {
        match self.lookup(VIEW_CLASSIFIER, context, request, name) {
            Some(registered) => registered.invoke(context, request),
            None => Err(DispatchError::not_found(format!("no view named {name:?}"))),
        }
    }

    /// Dispatches to the best-matching exception view.
    pub fn invoke_exception_view(
        &self,
        context: Option<&dyn Resource>,
        request: &Request,
        name: &str,
    ) -> Result<ViewOutput, DispatchError> {
        match self.lookup(EXCEPTION_VIEW_CLASSIFIER, context, request, name) {
            Some(registered) => registered.invoke(context, request),
            None => Err(DispatchError::not_found(format!(
                "no exception view named {name:?}"
            ))),
        }
    }

    /// Authorization pre-check against the best-matching view, without
    /// invoking it.
    pub fn view_permitted(
        &self,
        context: Option<&dyn Resource>,
        request: &Request,
        name: &str,
    ) -> Result<bool, DispatchError> {
        match self.lookup(VIEW_CLASSIFIER, context, request, name) {
            Some(registered) => registered.permitted(context, request),
            None => Err(DispatchError::not_found(format!("no view named {name:?}"))),
        }
    }
}

impl std::fmt::Debug for Application {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Application").finish_non_exhaustive()
    }
}
