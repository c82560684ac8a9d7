//! Renderer contract.
//!
//! Dispatch doesn't know about template engines. It only knows that a view
//! may return a bare value, and that for such views there is a thing that
//! turns the value into a transport response: a [`Renderer`]. Renderers are
//! created by named [`RendererFactory`] registrations; the factory receives a
//! [`RendererInfo`] describing the registration site.
//!
//! Two renderers ship built in: [`JsonRenderer`] and [`StringRenderer`].

use crate::error::DispatchError;
use crate::request::Request;
use crate::resource::Resource;
use crate::response::Response;
use crate::view::ViewMeta;
use serde_json::Value;
use std::sync::Arc;

/// Turns a view's bare return value into a transport response.
pub trait Renderer: Send + Sync {
    /// Renders `value` for the given request/view/context.
    fn render_view(
        &self,
        request: &Request,
        value: &Value,
        view: &ViewMeta,
        context: Option<&dyn Resource>,
    ) -> Result<Response, DispatchError>;
}

/// Information about the registration a renderer is being created for.
#[derive(Debug, Clone, Default)]
pub struct RendererInfo {
    /// The name the factory was looked up under.
    pub name: String,
    /// The registering package, for relative resolution.
    pub package: String,
}

/// Creates renderers for view registrations.
pub trait RendererFactory: Send + Sync {
    /// Builds a renderer for one registration.
    fn create(&self, info: &RendererInfo) -> Result<Arc<dyn Renderer>, DispatchError>;
}

/// Renders the value as `application/json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRenderer;

impl Renderer for JsonRenderer {
    fn render_view(
        &self,
        _request: &Request,
        value: &Value,
        _view: &ViewMeta,
        _context: Option<&dyn Resource>,
    ) -> Result<Response, DispatchError> {
        let body = serde_json::to_string(value)
            .map_err(|error| DispatchError::Render(error.to_string()))?;
        let mut response = Response::ok();
        response.body = body.into_bytes();
        response.set_header("Content-Type", "application/json; charset=utf-8");
        Ok(response)
    }
}

/// Renders the value as plain text. String values render unquoted; anything
/// else renders as its JSON representation.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringRenderer;

impl Renderer for StringRenderer {
    fn render_view(
        &self,
        _request: &Request,
        value: &Value,
        _view: &ViewMeta,
        _context: Option<&dyn Resource>,
    ) -> Result<Response, DispatchError> {
        let body = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        Ok(Response::text(body))
    }
}

/// Factory producing [`JsonRenderer`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonRendererFactory;

impl RendererFactory for JsonRendererFactory {
    fn create(&self, _info: &RendererInfo) -> Result<Arc<dyn Renderer>, DispatchError> {
        Ok(Arc::new(JsonRenderer))
    }
}

/// Factory producing [`StringRenderer`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct StringRendererFactory;

impl RendererFactory for StringRendererFactory {
    fn create(&self, _info: &RendererInfo) -> Result<Arc<dyn Renderer>, DispatchError> {
        Ok(Arc::new(StringRenderer))
    }
}

/// Adapts a closure into a [`Renderer`].
pub fn renderer_from_fn<F>(f: F) -> Arc<dyn Renderer>
where
    F: Fn(&Request, &Value, &ViewMeta, Option<&dyn Resource>) -> Result<Response, DispatchError>
        + Send
        + Sync
        + 'static,
{
    struct FnRenderer<F>(F);

    impl<F> Renderer for FnRenderer<F>
    where
        F: Fn(
                &Request,
                &Value,
                &ViewMeta,
                Option<&dyn Resource>,
            ) -> Result<Response, DispatchError>
            + Send
            + Sync,
    {
        fn render_view(
            &self,
            request: &Request,
            value: &Value,
            view: &ViewMeta,
            context: Option<&dyn Resource>,
        ) -> Result<Response, DispatchError> {
            (self.0)(request, value, view, context)
        }
    }

    Arc::new(FnRenderer(f))
}
