//! The built-in view mapper.
//!
//! Mapper precedence when deriving a view: registration-supplied mapper,
//! then a mapper attached to the view itself, then the process-wide default
//! (registered with `set_view_mapper`), then [`DefaultViewMapper`].

use keystone_dispatch::{MapperOptions, RawView, ViewFn, ViewMapper, ViewTarget};
use keystone_registry::{ComponentRegistry, TypeTag};
use std::sync::Arc;

/// Utility tag for the process-wide default view mapper.
pub const VIEW_MAPPER: TypeTag = TypeTag("keystone.view-mapper");

pub(crate) struct MapperUtility(pub Arc<dyn ViewMapper>);

pub(crate) fn default_mapper(registry: &ComponentRegistry) -> Option<Arc<dyn ViewMapper>> {
    registry
        .utility::<MapperUtility>(VIEW_MAPPER, "")
        .map(|holder| holder.0.clone())
}

/// Normalizes the three raw target shapes into the uniform
/// `(context, request)` callable:
///
/// - function targets pass through,
/// - request-only targets drop the context argument,
/// - class targets are instantiated per request, then invoked (through the
///   registration's `attr` when one is configured).
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultViewMapper;

impl ViewMapper for DefaultViewMapper {
    fn map(&self, raw: &RawView, options: &MapperOptions) -> ViewFn {
        match raw.target() {
            ViewTarget::Function(call) => call.clone(),
            ViewTarget::RequestOnly(call) => {
                let call = call.clone();
                Arc::new(move |_context, request| call(request))
            }
            ViewTarget::Class(factory) => {
                let factory = factory.clone();
                let attr = options.attr.clone();
                Arc::new(move |context, request| {
                    let instance = factory.instantiate(context, request)?;
                    instance.invoke(attr.as_deref())
                })
            }
        }
    }
}
