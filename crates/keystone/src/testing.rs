//! Test support.
//!
//! Canned resources, policies, a capturing debug logger, and raw-view
//! constructors used throughout the crate's own suites — and usable by
//! applications testing their configuration the same way.

use crate::auth::{AuthenticationPolicy, AuthorizationPolicy, DebugLogger};
use crate::SharedRegistry;
use keystone_dispatch::{
    context_tags, RawView, RegisteredView, Request, Resource, Response, ViewMeta, ViewOutput,
    PROVIDED_VIEW, VIEW_CLASSIFIER,
};
use keystone_registry::TypeTag;
use serde_json::Value;
use std::sync::{Arc, Mutex};

/// A raw function view returning a fixed text response.
pub fn text_view(name: &str, body: &str) -> RawView {
    let body = body.to_string();
    RawView::function(ViewMeta::new(name).with_module(module_path!()), move |_context, _request| {
        Ok(ViewOutput::Response(Response::text(body.clone())))
    })
}

/// A raw function view returning a fixed bare value (for renderer tests).
pub fn value_view(name: &str, value: Value) -> RawView {
    RawView::function(ViewMeta::new(name).with_module(module_path!()), move |_context, _request| {
        Ok(ViewOutput::Value(value.clone()))
    })
}

/// A resource with explicit type tags and an optional parent chain.
#[derive(Default)]
pub struct DummyResource {
    tags: Vec<TypeTag>,
    parent: Option<Box<DummyResource>>,
}

impl DummyResource {
    /// A resource carrying these tags (most specific first).
    pub fn with_tags<I>(tags: I) -> Self
    where
        I: IntoIterator<Item = TypeTag>,
    {
        DummyResource {
            tags: tags.into_iter().collect(),
            parent: None,
        }
    }

    /// Attaches a parent, for containment tests.
    pub fn inside(mut self, parent: DummyResource) -> Self {
        self.parent = Some(Box::new(parent));
        self
    }
}

impl Resource for DummyResource {
    fn type_tags(&self) -> Vec<TypeTag> {
        self.tags.clone()
    }

    fn parent(&self) -> Option<&dyn Resource> {
        self.parent.as_deref().map(|parent| parent as &dyn Resource)
    }
}

/// Authentication policy returning a fixed principal list.
pub struct StaticAuthentication(pub Vec<String>);

impl AuthenticationPolicy for StaticAuthentication {
    fn effective_principals(&self, _request: &Request) -> Vec<String> {
        self.0.clone()
    }
}

/// Authorization policy with a fixed verdict.
pub struct StaticAuthorization(pub bool);

impl AuthorizationPolicy for StaticAuthorization {
    fn permits(
        &self,
        _context: Option<&dyn Resource>,
        _principals: &[String],
        _permission: &str,
    ) -> bool {
        self.0
    }
}

/// Debug logger that records messages for assertions.
#[derive(Default)]
pub struct CapturingLogger {
    messages: Mutex<Vec<String>>,
}

impl CapturingLogger {
    /// The messages logged so far.
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().expect("logger mutex poisoned").clone()
    }
}

impl DebugLogger for CapturingLogger {
    fn log(&self, message: &str) {
        self.messages
            .lock()
            .expect("logger mutex poisoned")
            .push(message.to_string());
    }
}

/// Fetches the view registered at the default slot coordinates, the way the
/// router would for an anonymous request.
pub fn lookup_view(registry: &SharedRegistry, name: &str) -> Option<Arc<RegisteredView>> {
    lookup_view_for(registry, &Request::new("GET", "/"), None, name)
}

/// Fetches the best-matching registered view for a request/context pair.
pub fn lookup_view_for(
    registry: &SharedRegistry,
    request: &Request,
    context: Option<&dyn Resource>,
    name: &str,
) -> Option<Arc<RegisteredView>> {
    let guard = registry.read().expect("registry lock poisoned");
    guard
        .lookup(
            VIEW_CLASSIFIER,
            &request.request_tags(),
            &context_tags(context),
            PROVIDED_VIEW,
            name,
        )
        .and_then(|value| value.downcast::<RegisteredView>().ok())
}
