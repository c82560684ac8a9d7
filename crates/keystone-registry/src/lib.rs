//! Type-indexed component registry.
//!
//! `keystone-registry` is the lookup substrate the rest of keystone registers
//! into and dispatches out of. It knows nothing about views, requests, or
//! configuration — it stores opaque values under structured keys and answers
//! two questions:
//!
//! - **Adapters**: "what value is registered for this
//!   (classifier, request, context) triple, under this provided marker and
//!   name?" Lookup walks caller-supplied tag lineages most-specific-first, so
//!   specificity resolution stays with the caller while the registry stays a
//!   plain map.
//! - **Utilities**: "what single value is registered under this marker and
//!   name?" Used for settings, policies, factories, and similar singletons.
//!
//! Values are stored as `Arc<dyn Any + Send + Sync>`. Callers downcast on the
//! way out; the typed [`ComponentRegistry::utility`] helper does this for the
//! common case.
//!
//! The registry is write-many during the configuration phase and read-only
//! afterwards. It takes no locks itself — callers that share it across
//! threads wrap it (keystone uses `Arc<RwLock<_>>` and stops writing once
//! configuration is committed).

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// An interned marker standing in for an interface or type in registry keys.
///
/// Tags compare by name, so two tags constructed from the same string are the
/// same key. Resources and requests expose ordered, most-specific-first tag
/// lineages; lookup walks those lineages in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TypeTag(pub &'static str);

impl TypeTag {
    /// The tag's name.
    pub fn name(&self) -> &'static str {
        self.0
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// Opaque registered value.
pub type AnyValue = Arc<dyn Any + Send + Sync>;

/// Full adapter key: required triple + provided marker + name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct AdapterKey {
    classifier: TypeTag,
    request: TypeTag,
    context: TypeTag,
    provided: TypeTag,
    name: String,
}

/// The component registry.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use keystone_registry::{ComponentRegistry, TypeTag};
///
/// const CLASSIFIER: TypeTag = TypeTag("classifier");
/// const REQUEST: TypeTag = TypeTag("request");
/// const FOLDER: TypeTag = TypeTag("folder");
/// const ANY: TypeTag = TypeTag("any");
/// const PROVIDED: TypeTag = TypeTag("provided");
///
/// let mut registry = ComponentRegistry::new();
/// registry.register_adapter(
///     (CLASSIFIER, REQUEST, ANY),
///     PROVIDED,
///     "",
///     Arc::new("fallback".to_string()),
/// );
///
/// // A folder context falls back to the ANY registration.
/// let found = registry
///     .lookup(CLASSIFIER, &[REQUEST], &[FOLDER, ANY], PROVIDED, "")
///     .unwrap();
/// assert_eq!(*found.downcast::<String>().unwrap(), "fallback");
/// ```
#[derive(Default)]
pub struct ComponentRegistry {
    adapters: HashMap<AdapterKey, AnyValue>,
    utilities: HashMap<(TypeTag, String), AnyValue>,
}

impl ComponentRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `value` for the required triple under `provided` and `name`.
    ///
    /// An existing registration at the same coordinates is replaced and
    /// returned.
    pub fn register_adapter(
        &mut self,
        required: (TypeTag, TypeTag, TypeTag),
        provided: TypeTag,
        name: &str,
        value: AnyValue,
    ) -> Option<AnyValue> {
        let (classifier, request, context) = required;
        self.adapters.insert(
            AdapterKey {
                classifier,
                request,
                context,
                provided,
                name: name.to_string(),
            },
            value,
        )
    }

    /// Removes the registration at exactly these coordinates.
    pub fn unregister_adapter(
        &mut self,
        required: (TypeTag, TypeTag, TypeTag),
        provided: TypeTag,
        name: &str,
    ) -> Option<AnyValue> {
        let (classifier, request, context) = required;
        self.adapters.remove(&AdapterKey {
            classifier,
            request,
            context,
            provided,
            name: name.to_string(),
        })
    }

    /// Exact-coordinate fetch, no lineage walking.
    pub fn adapter(
        &self,
        required: (TypeTag, TypeTag, TypeTag),
        provided: TypeTag,
        name: &str,
    ) -> Option<AnyValue> {
        let (classifier, request, context) = required;
        self.adapters
            .get(&AdapterKey {
                classifier,
                request,
                context,
                provided,
                name: name.to_string(),
            })
            .cloned()
    }

    /// Most-specific-match lookup.
    ///
    /// `request_tags` and `context_tags` are ordered most-specific-first.
    /// Every request tag is tried against the full context lineage before the
    /// next request tag is considered, so a registration for a specific
    /// request type beats one for a specific context type.
    pub fn lookup(
        &self,
        classifier: TypeTag,
        request_tags: &[TypeTag],
        context_tags: &[TypeTag],
        provided: TypeTag,
        name: &str,
    ) -> Option<AnyValue> {
        for request in request_tags {
            for context in context_tags {
                if let Some(found) =
                    self.adapter((classifier, *request, *context), provided, name)
                {
                    return Some(found);
                }
            }
        }
        None
    }

    /// Registers a singleton utility under `provided` and `name`.
    pub fn register_utility(
        &mut self,
        provided: TypeTag,
        name: &str,
        value: AnyValue,
    ) -> Option<AnyValue> {
        self.utilities.insert((provided, name.to_string()), value)
    }

    /// Removes a utility registration.
    pub fn unregister_utility(&mut self, provided: TypeTag, name: &str) -> Option<AnyValue> {
        self.utilities.remove(&(provided, name.to_string()))
    }

    /// Fetches a utility as its concrete type.
    ///
    /// Returns `None` when nothing is registered or the registered value has
    /// a different type.
    pub fn utility<T: Send + Sync + 'static>(
        &self,
        provided: TypeTag,
        name: &str,
    ) -> Option<Arc<T>> {
        self.utilities
            .get(&(provided, name.to_string()))
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Fetches a utility untyped.
    pub fn utility_raw(&self, provided: TypeTag, name: &str) -> Option<AnyValue> {
        self.utilities.get(&(provided, name.to_string())).cloned()
    }

    /// Number of adapter registrations.
    pub fn adapter_count(&self) -> usize {
        self.adapters.len()
    }

    /// Number of utility registrations.
    pub fn utility_count(&self) -> usize {
        self.utilities.len()
    }
}

impl fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("adapters", &self.adapters.len())
            .field("utilities", &self.utilities.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CLASSIFIER: TypeTag = TypeTag("classifier");
    const OTHER_CLASSIFIER: TypeTag = TypeTag("other-classifier");
    const REQUEST: TypeTag = TypeTag("request");
    const ROUTE_REQUEST: TypeTag = TypeTag("route-request");
    const FOLDER: TypeTag = TypeTag("folder");
    const ITEM: TypeTag = TypeTag("item");
    const ANY: TypeTag = TypeTag("any");
    const PROVIDED: TypeTag = TypeTag("provided");
    const SECURED: TypeTag = TypeTag("secured");

    fn value(s: &str) -> AnyValue {
        Arc::new(s.to_string())
    }

    fn as_str(v: AnyValue) -> String {
        (*v.downcast::<String>().unwrap()).clone()
    }

    #[test]
    fn test_register_and_exact_fetch() {
        let mut registry = ComponentRegistry::new();
        registry.register_adapter((CLASSIFIER, REQUEST, FOLDER), PROVIDED, "", value("a"));

        let found = registry
            .adapter((CLASSIFIER, REQUEST, FOLDER), PROVIDED, "")
            .unwrap();
        assert_eq!(as_str(found), "a");
        assert!(registry
            .adapter((CLASSIFIER, REQUEST, ITEM), PROVIDED, "")
            .is_none());
    }

    #[test]
    fn test_register_replaces_and_returns_previous() {
        let mut registry = ComponentRegistry::new();
        let key = (CLASSIFIER, REQUEST, FOLDER);
        assert!(registry
            .register_adapter(key, PROVIDED, "", value("old"))
            .is_none());
        let previous = registry
            .register_adapter(key, PROVIDED, "", value("new"))
            .unwrap();
        assert_eq!(as_str(previous), "old");
        assert_eq!(as_str(registry.adapter(key, PROVIDED, "").unwrap()), "new");
        assert_eq!(registry.adapter_count(), 1);
    }

    #[test]
    fn test_name_distinguishes_registrations() {
        let mut registry = ComponentRegistry::new();
        let key = (CLASSIFIER, REQUEST, FOLDER);
        registry.register_adapter(key, PROVIDED, "", value("unnamed"));
        registry.register_adapter(key, PROVIDED, "edit", value("named"));

        assert_eq!(as_str(registry.adapter(key, PROVIDED, "").unwrap()), "unnamed");
        assert_eq!(
            as_str(registry.adapter(key, PROVIDED, "edit").unwrap()),
            "named"
        );
    }

    #[test]
    fn test_provided_marker_distinguishes_registrations() {
        let mut registry = ComponentRegistry::new();
        let key = (CLASSIFIER, REQUEST, FOLDER);
        registry.register_adapter(key, PROVIDED, "", value("plain"));
        registry.register_adapter(key, SECURED, "", value("secured"));

        assert_eq!(as_str(registry.adapter(key, PROVIDED, "").unwrap()), "plain");
        assert_eq!(as_str(registry.adapter(key, SECURED, "").unwrap()), "secured");
    }

    #[test]
    fn test_classifier_distinguishes_registrations() {
        let mut registry = ComponentRegistry::new();
        registry.register_adapter((CLASSIFIER, REQUEST, FOLDER), PROVIDED, "", value("a"));

        assert!(registry
            .adapter((OTHER_CLASSIFIER, REQUEST, FOLDER), PROVIDED, "")
            .is_none());
    }

    #[test]
    fn test_lookup_prefers_most_specific_context() {
        let mut registry = ComponentRegistry::new();
        registry.register_adapter((CLASSIFIER, REQUEST, ANY), PROVIDED, "", value("any"));
        registry.register_adapter((CLASSIFIER, REQUEST, FOLDER), PROVIDED, "", value("folder"));

        let found = registry
            .lookup(CLASSIFIER, &[REQUEST], &[FOLDER, ANY], PROVIDED, "")
            .unwrap();
        assert_eq!(as_str(found), "folder");
    }

    #[test]
    fn test_lookup_falls_back_through_context_lineage() {
        let mut registry = ComponentRegistry::new();
        registry.register_adapter((CLASSIFIER, REQUEST, ANY), PROVIDED, "", value("any"));

        let found = registry
            .lookup(CLASSIFIER, &[REQUEST], &[ITEM, FOLDER, ANY], PROVIDED, "")
            .unwrap();
        assert_eq!(as_str(found), "any");
    }

    #[test]
    fn test_lookup_request_lineage_outranks_context_lineage() {
        let mut registry = ComponentRegistry::new();
        registry.register_adapter((CLASSIFIER, REQUEST, FOLDER), PROVIDED, "", value("generic"));
        registry.register_adapter((CLASSIFIER, ROUTE_REQUEST, ANY), PROVIDED, "", value("route"));

        // The route request tag is more specific, so its registration wins
        // even though its context tag is less specific.
        let found = registry
            .lookup(
                CLASSIFIER,
                &[ROUTE_REQUEST, REQUEST],
                &[FOLDER, ANY],
                PROVIDED,
                "",
            )
            .unwrap();
        assert_eq!(as_str(found), "route");
    }

    #[test]
    fn test_lookup_misses_return_none() {
        let registry = ComponentRegistry::new();
        assert!(registry
            .lookup(CLASSIFIER, &[REQUEST], &[FOLDER, ANY], PROVIDED, "")
            .is_none());
    }

    #[test]
    fn test_unregister_adapter() {
        let mut registry = ComponentRegistry::new();
        let key = (CLASSIFIER, REQUEST, FOLDER);
        registry.register_adapter(key, PROVIDED, "", value("a"));

        let removed = registry.unregister_adapter(key, PROVIDED, "").unwrap();
        assert_eq!(as_str(removed), "a");
        assert!(registry.adapter(key, PROVIDED, "").is_none());
        assert!(registry.unregister_adapter(key, PROVIDED, "").is_none());
    }

    #[test]
    fn test_utility_roundtrip_typed() {
        #[derive(Debug, PartialEq)]
        struct Settings {
            debug: bool,
        }

        let mut registry = ComponentRegistry::new();
        registry.register_utility(PROVIDED, "", Arc::new(Settings { debug: true }));

        let settings = registry.utility::<Settings>(PROVIDED, "").unwrap();
        assert!(settings.debug);
    }

    #[test]
    fn test_utility_wrong_type_is_none() {
        let mut registry = ComponentRegistry::new();
        registry.register_utility(PROVIDED, "", value("not a number"));
        assert!(registry.utility::<u64>(PROVIDED, "").is_none());
    }

    #[test]
    fn test_utility_named() {
        let mut registry = ComponentRegistry::new();
        registry.register_utility(PROVIDED, "json", value("json-factory"));
        registry.register_utility(PROVIDED, "string", value("string-factory"));

        assert_eq!(
            as_str(registry.utility_raw(PROVIDED, "json").unwrap()),
            "json-factory"
        );
        assert_eq!(
            as_str(registry.utility_raw(PROVIDED, "string").unwrap()),
            "string-factory"
        );
        assert!(registry.utility_raw(PROVIDED, "yaml").is_none());
        assert_eq!(registry.utility_count(), 2);
    }

    #[test]
    fn test_unregister_utility() {
        let mut registry = ComponentRegistry::new();
        registry.register_utility(PROVIDED, "", value("a"));
        assert!(registry.unregister_utility(PROVIDED, "").is_some());
        assert!(registry.utility_raw(PROVIDED, "").is_none());
    }

    #[test]
    fn test_type_tag_identity_by_name() {
        let a = TypeTag("same");
        let b = TypeTag("same");
        assert_eq!(a, b);
        assert_eq!(a.name(), "same");
        assert_eq!(a.to_string(), "same");
    }
}
