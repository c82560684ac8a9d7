//! The request model.
//!
//! Dispatch is specified only at the interface a request presents: method,
//! URL pieces, params, headers, an XHR flag, content negotiation, and an
//! ordered request-type tag lineage. Transport concerns (sockets, bodies,
//! encodings) live outside this crate.
//!
//! # Request-scoped state
//!
//! [`Extensions`] is a type-keyed container for per-request state. Wrapping
//! stages deposit values here (e.g. the wrapper stage's inner-response
//! snapshot) and outer views retrieve them, which keeps the `Request` itself
//! immutable from the borrow checker's point of view: insertion goes through
//! interior mutability, so a shared `&Request` is enough.

use crate::render::Renderer;
use keystone_registry::TypeTag;
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};

/// The base request tag. Every request-type lineage ends here.
pub const REQUEST: TypeTag = TypeTag("keystone.request");

/// Type-keyed container for request-scoped state.
///
/// Values are stored as `Arc<dyn Any + Send + Sync>` behind a mutex, so
/// insertion and retrieval work through a shared reference. Each type can be
/// stored once; inserting again replaces and returns the previous value.
#[derive(Default)]
pub struct Extensions {
    map: Mutex<HashMap<TypeId, Arc<dyn Any + Send + Sync>>>,
}

impl Extensions {
    /// Creates an empty container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a value, returning the previously stored value of the same
    /// type if there was one.
    pub fn insert<T: Send + Sync + 'static>(&self, value: T) -> Option<Arc<T>> {
        self.map
            .lock()
            .expect("extensions mutex poisoned")
            .insert(TypeId::of::<T>(), Arc::new(value))
            .and_then(|previous| previous.downcast::<T>().ok())
    }

    /// Fetches the stored value of type `T`.
    pub fn get<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.map
            .lock()
            .expect("extensions mutex poisoned")
            .get(&TypeId::of::<T>())
            .cloned()
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Removes and returns the stored value of type `T`.
    pub fn remove<T: Send + Sync + 'static>(&self) -> Option<Arc<T>> {
        self.map
            .lock()
            .expect("extensions mutex poisoned")
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Returns true if a value of type `T` is stored.
    pub fn contains<T: Send + Sync + 'static>(&self) -> bool {
        self.map
            .lock()
            .expect("extensions mutex poisoned")
            .contains_key(&TypeId::of::<T>())
    }

    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.map.lock().expect("extensions mutex poisoned").len()
    }

    /// Returns true if nothing is stored.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for Extensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Extensions")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// A parsed `Accept` header: media ranges with their quality values, in
/// header order.
#[derive(Debug, Clone, PartialEq)]
pub struct Accept {
    items: Vec<(String, f32)>,
}

impl Accept {
    /// Parses an Accept header value. Unparseable segments are skipped;
    /// missing `q` defaults to 1.0.
    pub fn parse(header: &str) -> Self {
        let mut items = Vec::new();
        for segment in header.split(',') {
            let mut parts = segment.split(';');
            let media = match parts.next() {
                Some(media) => media.trim().to_ascii_lowercase(),
                None => continue,
            };
            if media.is_empty() {
                continue;
            }
            let mut quality = 1.0f32;
            for param in parts {
                let param = param.trim();
                if let Some(value) = param.strip_prefix("q=") {
                    quality = value.parse().unwrap_or(0.0);
                }
            }
            items.push((media, quality));
        }
        Accept { items }
    }

    /// The quality this header assigns to an offered media type, honoring
    /// `type/*` and `*/*` ranges. Zero means "not acceptable".
    pub fn quality(&self, offer: &str) -> f32 {
        let offer = offer.to_ascii_lowercase();
        let offer_type = offer.split('/').next().unwrap_or("");
        let mut best = 0.0f32;
        for (media, quality) in &self.items {
            let matched = media == &offer
                || media == "*/*"
                || media
                    .strip_suffix("/*")
                    .is_some_and(|prefix| prefix == offer_type);
            if matched && *quality > best {
                best = *quality;
            }
        }
        best
    }

    /// Returns true if the offer is acceptable at any quality.
    pub fn accepts(&self, offer: &str) -> bool {
        self.quality(offer) > 0.0
    }

    /// The best of the offered media types, or `None` when none are
    /// acceptable. Offers are tried in the given order and ties on quality go
    /// to the earlier offer, so callers can use list order as a preference
    /// order.
    pub fn best_match(&self, offers: &[String]) -> Option<String> {
        let mut best: Option<(&str, f32)> = None;
        for offer in offers {
            let quality = self.quality(offer);
            if quality <= 0.0 {
                continue;
            }
            match best {
                Some((_, best_quality)) if best_quality >= quality => {}
                _ => best = Some((offer, quality)),
            }
        }
        best.map(|(offer, _)| offer.to_string())
    }
}

/// A dispatchable request.
///
/// Fields are plain data; construct with [`Request::new`] and the `with_*`
/// builders. Header names are normalized to lowercase on insertion.
///
/// # Example
///
/// ```
/// use keystone_dispatch::request::Request;
///
/// let request = Request::new("POST", "http://example.com/docs")
///     .with_param("page", "2")
///     .with_header("Accept", "text/html");
/// assert_eq!(request.method, "POST");
/// assert!(request.accepts_media("text/html"));
/// ```
pub struct Request {
    /// HTTP method, uppercase.
    pub method: String,
    /// Full request URL, for diagnostics.
    pub url: String,
    /// The path portion matched against path-info predicates.
    pub path_info: String,
    /// The view name the router resolved for this request.
    pub view_name: String,
    /// Remaining path segments past the resolved view (static views serve
    /// from these).
    pub subpath: Vec<String>,
    /// Query/body parameters.
    pub params: HashMap<String, String>,
    /// Headers, lowercase names.
    pub headers: HashMap<String, String>,
    /// True for XMLHttpRequest-style requests.
    pub is_xhr: bool,
    /// Ordered most-specific-first request-type lineage.
    pub type_tags: Vec<TypeTag>,
    /// Request-supplied renderer, overriding the registered one.
    pub renderer_override: Option<Arc<dyn Renderer>>,
    /// Request-scoped state.
    pub extensions: Extensions,
}

impl Request {
    /// Creates a request with the given method and URL. The path info
    /// defaults to the URL's path portion.
    pub fn new(method: &str, url: &str) -> Self {
        let path_info = url
            .split_once("://")
            .and_then(|(_, rest)| rest.split_once('/'))
            .map(|(_, path)| format!("/{path}"))
            .unwrap_or_else(|| url.to_string());
        Request {
            method: method.to_ascii_uppercase(),
            url: url.to_string(),
            path_info,
            view_name: String::new(),
            subpath: Vec::new(),
            params: HashMap::new(),
            headers: HashMap::new(),
            is_xhr: false,
            type_tags: vec![REQUEST],
            renderer_override: None,
            extensions: Extensions::new(),
        }
    }

    /// Sets a parameter.
    pub fn with_param(mut self, name: &str, value: &str) -> Self {
        self.params.insert(name.to_string(), value.to_string());
        self
    }

    /// Sets a header (name lowercased).
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Sets the XHR flag.
    pub fn with_xhr(mut self, is_xhr: bool) -> Self {
        self.is_xhr = is_xhr;
        self
    }

    /// Overrides the path info.
    pub fn with_path_info(mut self, path_info: &str) -> Self {
        self.path_info = path_info.to_string();
        self
    }

    /// Sets the resolved view name.
    pub fn with_view_name(mut self, name: &str) -> Self {
        self.view_name = name.to_string();
        self
    }

    /// Prepends a request-type tag, making it the most specific.
    pub fn with_type_tag(mut self, tag: TypeTag) -> Self {
        self.type_tags.insert(0, tag);
        self
    }

    /// Fetches a header by name, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    /// The parsed Accept header, if one was sent.
    pub fn accept(&self) -> Option<Accept> {
        self.header("accept").map(Accept::parse)
    }

    /// Returns true if the request's Accept header admits the media type.
    /// A request without an Accept header accepts everything.
    pub fn accepts_media(&self, media: &str) -> bool {
        match self.accept() {
            Some(accept) => accept.accepts(media),
            None => true,
        }
    }

    /// The request-type lookup lineage, with [`REQUEST`] guaranteed last.
    pub fn request_tags(&self) -> Vec<TypeTag> {
        let mut tags = self.type_tags.clone();
        if !tags.contains(&REQUEST) {
            tags.push(REQUEST);
        }
        tags
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("view_name", &self.view_name)
            .field("is_xhr", &self.is_xhr)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extensions_insert_get_remove() {
        struct Marker(u32);

        let ext = Extensions::new();
        assert!(ext.is_empty());
        assert!(ext.insert(Marker(1)).is_none());
        assert!(ext.contains::<Marker>());
        assert_eq!(ext.get::<Marker>().unwrap().0, 1);

        let previous = ext.insert(Marker(2)).unwrap();
        assert_eq!(previous.0, 1);
        assert_eq!(ext.len(), 1);

        let removed = ext.remove::<Marker>().unwrap();
        assert_eq!(removed.0, 2);
        assert!(ext.get::<Marker>().is_none());
    }

    #[test]
    fn test_extensions_insert_through_shared_ref() {
        struct Marker;

        let ext = Extensions::new();
        let shared: &Extensions = &ext;
        shared.insert(Marker);
        assert!(shared.contains::<Marker>());
    }

    #[test]
    fn test_accept_parse_and_quality() {
        let accept = Accept::parse("text/html, application/json;q=0.5, text/*;q=0.2");
        assert_eq!(accept.quality("text/html"), 1.0);
        assert_eq!(accept.quality("application/json"), 0.5);
        assert_eq!(accept.quality("text/plain"), 0.2);
        assert_eq!(accept.quality("image/png"), 0.0);
        assert!(accept.accepts("text/plain"));
        assert!(!accept.accepts("image/png"));
    }

    #[test]
    fn test_accept_wildcard_any() {
        let accept = Accept::parse("*/*");
        assert!(accept.accepts("application/octet-stream"));
    }

    #[test]
    fn test_accept_best_match_prefers_quality() {
        let accept = Accept::parse("text/html;q=0.4, application/json");
        let offers = vec!["text/html".to_string(), "application/json".to_string()];
        assert_eq!(accept.best_match(&offers), Some("application/json".into()));
    }

    #[test]
    fn test_accept_best_match_tie_goes_to_earlier_offer() {
        let accept = Accept::parse("text/html, application/json");
        let offers = vec!["application/json".to_string(), "text/html".to_string()];
        // Both carry q=1.0; the first offer in registration order wins.
        assert_eq!(accept.best_match(&offers), Some("application/json".into()));
    }

    #[test]
    fn test_accept_best_match_none_acceptable() {
        let accept = Accept::parse("image/png");
        let offers = vec!["text/html".to_string()];
        assert_eq!(accept.best_match(&offers), None);
    }

    #[test]
    fn test_request_construction() {
        let request = Request::new("get", "http://example.com/a/b");
        assert_eq!(request.method, "GET");
        assert_eq!(request.path_info, "/a/b");
        assert_eq!(request.request_tags(), vec![REQUEST]);
    }

    #[test]
    fn test_request_header_case_insensitive() {
        let request = Request::new("GET", "/").with_header("X-Custom", "yes");
        assert_eq!(request.header("x-custom"), Some("yes"));
        assert_eq!(request.header("X-CUSTOM"), Some("yes"));
        assert_eq!(request.header("missing"), None);
    }

    #[test]
    fn test_request_accepts_media_without_header() {
        let request = Request::new("GET", "/");
        assert!(request.accepts_media("text/html"));
    }

    #[test]
    fn test_request_type_tag_lineage() {
        const ROUTE: TypeTag = TypeTag("test.route-request");
        let request = Request::new("GET", "/").with_type_tag(ROUTE);
        assert_eq!(request.request_tags(), vec![ROUTE, REQUEST]);
    }
}
