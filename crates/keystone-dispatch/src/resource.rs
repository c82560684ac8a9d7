//! Resource (context) abstraction.
//!
//! A resource is the "context" half of the `(context, request)` pair a view
//! is called with. Dispatch never inspects a resource's concrete type —
//! it only asks for the resource's *type tags* (an ordered,
//! most-specific-first lineage of [`TypeTag`]s, standing in for an interface
//! hierarchy) and, for containment predicates, its parent chain.

use keystone_registry::TypeTag;
use std::any::Any;

/// The least-specific context tag. Every context lineage ends here, so a view
/// registered against [`ANY_CONTEXT`] matches any resource (and a missing
/// resource).
pub const ANY_CONTEXT: TypeTag = TypeTag("keystone.context.any");

/// A dispatchable context object.
///
/// # Example
///
/// ```
/// use keystone_dispatch::resource::{Resource, ANY_CONTEXT};
/// use keystone_registry::TypeTag;
///
/// const FOLDER: TypeTag = TypeTag("myapp.folder");
///
/// struct Folder;
///
/// impl Resource for Folder {
///     fn type_tags(&self) -> Vec<TypeTag> {
///         vec![FOLDER, ANY_CONTEXT]
///     }
/// }
///
/// let folder = Folder;
/// assert_eq!(folder.type_tags()[0], FOLDER);
/// ```
pub trait Resource: Any + Send + Sync {
    /// Ordered most-specific-first tag lineage for this resource.
    ///
    /// Implementations should end the lineage with [`ANY_CONTEXT`] so that
    /// catch-all registrations apply; [`context_tags`] appends it defensively
    /// either way.
    fn type_tags(&self) -> Vec<TypeTag> {
        vec![ANY_CONTEXT]
    }

    /// The containing resource, if any. Used by containment predicates.
    fn parent(&self) -> Option<&dyn Resource> {
        None
    }
}

/// The full lookup lineage for an optional context: the resource's tags with
/// [`ANY_CONTEXT`] guaranteed last, or just [`ANY_CONTEXT`] for no context.
pub fn context_tags(context: Option<&dyn Resource>) -> Vec<TypeTag> {
    let mut tags = match context {
        Some(resource) => resource.type_tags(),
        None => Vec::new(),
    };
    if !tags.contains(&ANY_CONTEXT) {
        tags.push(ANY_CONTEXT);
    }
    tags
}

/// Walks the containment chain (the resource itself, then its parents),
/// returning true if any element carries `tag`.
pub fn lineage_contains(context: Option<&dyn Resource>, tag: TypeTag) -> bool {
    let mut current = context;
    while let Some(resource) = current {
        if resource.type_tags().contains(&tag) {
            return true;
        }
        current = resource.parent();
    }
    false
}

/// A short display form for a context, used in diagnostics and debug logging:
/// the most specific tag name, or `"None"` when there is no context.
pub fn context_repr(context: Option<&dyn Resource>) -> String {
    match context {
        Some(resource) => resource
            .type_tags()
            .first()
            .map(|tag| tag.name().to_string())
            .unwrap_or_else(|| ANY_CONTEXT.name().to_string()),
        None => "None".to_string(),
    }
}
