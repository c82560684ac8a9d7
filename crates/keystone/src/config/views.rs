//! View registration.
//!
//! [`ViewConfig`] collects everything one registration can say — target,
//! slot coordinates (context, request type or route, name), predicates,
//! permission, renderer, decoration, caching, wrapping — and
//! [`Configurator::add_view`] turns it into a deferred action. Validation of
//! malformed input (missing callable, bad predicate regexes, unknown request
//! type markers) happens synchronously in `add_view`; the deferred callable
//! derives the wrapped view against the registry's state at execution time
//! and merges it into the slot:
//!
//! - empty slot: registered as a single view
//! - occupied by the same phash: replaced in place (re-registration)
//! - occupied by a different phash: merged into a multi-view
//!
//! Permission-checked results are additionally registered under the
//! secured-view marker.

use crate::config::actions::{ConfigEnv, Discriminator};
use crate::config::error::ConfigError;
use crate::config::routes;
use crate::config::{Configurator, PHASE_VIEW};
use crate::deriver::{
    resolve_renderer, CachePolicy, DecoratorFn, DeriveOptions, ViewDeriver,
};
use keystone_dispatch::{
    CustomPredicate, Phash, PredicateSet, RawView, RegisteredView, RegistrationAttrs, MultiView,
    ViewMapper, ViewMeta, ViewOutput, ViewPredicate, EXCEPTION_VIEW_CLASSIFIER,
    PROVIDED_SECURED_VIEW, PROVIDED_VIEW, REQUEST, SPECIFICITY_CEILING, VIEW_CLASSIFIER,
};
use keystone_registry::TypeTag;
use std::sync::Arc;

/// Declarative description of one view registration.
#[derive(Default)]
pub struct ViewConfig {
    view: Option<RawView>,
    name: String,
    context: Option<TypeTag>,
    for_: Option<TypeTag>,
    request_type: Option<TypeTag>,
    route_name: Option<String>,
    permission: Option<String>,
    renderer: Option<String>,
    attr: Option<String>,
    decorator: Option<DecoratorFn>,
    mapper: Option<Arc<dyn ViewMapper>>,
    http_cache: Option<CachePolicy>,
    wrapper: Option<String>,
    exception_view: bool,
    xhr: Option<bool>,
    request_methods: Vec<String>,
    request_params: Vec<(String, Option<String>)>,
    headers: Vec<(String, Option<String>)>,
    accept: Option<String>,
    path_info: Option<String>,
    containment: Option<TypeTag>,
    custom_predicates: Vec<CustomPredicate>,
}

impl ViewConfig {
    /// An empty registration.
    pub fn new() -> Self {
        Self::default()
    }

    /// The view callable. Optional when a renderer is configured: the
    /// renderer then renders a null value (template-driven views).
    pub fn view(mut self, view: RawView) -> Self {
        self.view = Some(view);
        self
    }

    /// The view name (the slot's name coordinate).
    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    /// The context type the registration applies to.
    pub fn context(mut self, context: TypeTag) -> Self {
        self.context = Some(context);
        self
    }

    /// Alias for [`context`](ViewConfig::context); an explicit `context`
    /// takes precedence when both are given.
    pub fn for_context(mut self, context: TypeTag) -> Self {
        self.for_ = Some(context);
        self
    }

    /// Constrains the registration to a request type marker.
    pub fn request_type(mut self, request_type: TypeTag) -> Self {
        self.request_type = Some(request_type);
        self
    }

    /// Constrains the registration to a named route's requests.
    pub fn route_name(mut self, route_name: &str) -> Self {
        self.route_name = Some(route_name.to_string());
        self
    }

    /// Requires a permission.
    pub fn permission(mut self, permission: &str) -> Self {
        self.permission = Some(permission.to_string());
        self
    }

    /// Exempts the view from the default permission.
    pub fn no_permission_required(mut self) -> Self {
        self.permission = Some(crate::auth::NO_PERMISSION_REQUIRED.to_string());
        self
    }

    /// Renders bare return values with the named renderer.
    pub fn renderer(mut self, renderer: &str) -> Self {
        self.renderer = Some(renderer.to_string());
        self
    }

    /// Invokes a named method on class-style targets.
    pub fn attr(mut self, attr: &str) -> Self {
        self.attr = Some(attr.to_string());
        self
    }

    /// Wraps the derived view with a user decorator.
    pub fn decorator(mut self, decorator: DecoratorFn) -> Self {
        self.decorator = Some(decorator);
        self
    }

    /// Uses a custom mapper for this registration.
    pub fn mapper(mut self, mapper: Arc<dyn ViewMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// Stamps cache headers on successful responses.
    pub fn http_cache(mut self, policy: CachePolicy) -> Self {
        self.http_cache = Some(policy);
        self
    }

    /// Composes the response through a named outer wrapper view.
    pub fn wrapper(mut self, wrapper: &str) -> Self {
        self.wrapper = Some(wrapper.to_string());
        self
    }

    /// Registers under the exception-view classifier.
    pub fn exception_view(mut self) -> Self {
        self.exception_view = true;
        self
    }

    /// Requires (or forbids) XHR requests.
    pub fn xhr(mut self, xhr: bool) -> Self {
        self.xhr = Some(xhr);
        self
    }

    /// Requires one of these request methods.
    pub fn request_method(mut self, method: &str) -> Self {
        self.request_methods.push(method.to_string());
        self
    }

    /// Requires a request parameter to be present.
    pub fn request_param(mut self, name: &str) -> Self {
        self.request_params.push((name.to_string(), None));
        self
    }

    /// Requires a request parameter with an exact value.
    pub fn request_param_value(mut self, name: &str, value: &str) -> Self {
        self.request_params
            .push((name.to_string(), Some(value.to_string())));
        self
    }

    /// Requires a header to be present.
    pub fn header(mut self, name: &str) -> Self {
        self.headers.push((name.to_string(), None));
        self
    }

    /// Requires a header value matching a regex.
    pub fn header_value(mut self, name: &str, pattern: &str) -> Self {
        self.headers
            .push((name.to_string(), Some(pattern.to_string())));
        self
    }

    /// Requires the request to accept a media type; also keys the
    /// registration into the slot's content-negotiation lists.
    pub fn accept(mut self, media: &str) -> Self {
        self.accept = Some(media.to_ascii_lowercase());
        self
    }

    /// Requires the path info to match a regex.
    pub fn path_info(mut self, pattern: &str) -> Self {
        self.path_info = Some(pattern.to_string());
        self
    }

    /// Requires the context lineage to contain a type tag.
    pub fn containment(mut self, tag: TypeTag) -> Self {
        self.containment = Some(tag);
        self
    }

    /// Adds a named custom predicate.
    pub fn custom_predicate(mut self, predicate: CustomPredicate) -> Self {
        self.custom_predicates.push(predicate);
        self
    }

    fn build_predicates(&self) -> Result<PredicateSet, ConfigError> {
        let mut predicates = PredicateSet::new();
        if let Some(xhr) = self.xhr {
            predicates.push(ViewPredicate::Xhr(xhr));
        }
        if !self.request_methods.is_empty() {
            predicates.push(ViewPredicate::request_methods(&self.request_methods));
        }
        if let Some(pattern) = &self.path_info {
            predicates.push(ViewPredicate::path_info(pattern).map_err(|source| {
                ConfigError::BadRegex {
                    kind: "path_info",
                    pattern: pattern.clone(),
                    source,
                }
            })?);
        }
        for (name, value) in &self.request_params {
            predicates.push(match value {
                Some(value) => ViewPredicate::request_param_value(name, value),
                None => ViewPredicate::request_param(name),
            });
        }
        for (name, pattern) in &self.headers {
            predicates.push(
                ViewPredicate::header(name, pattern.as_deref()).map_err(|source| {
                    ConfigError::BadRegex {
                        kind: "header",
                        pattern: pattern.clone().unwrap_or_default(),
                        source,
                    }
                })?,
            );
        }
        if let Some(media) = &self.accept {
            predicates.push(ViewPredicate::accept(media));
        }
        if let Some(tag) = self.containment {
            predicates.push(ViewPredicate::Containment(tag));
        }
        for custom in &self.custom_predicates {
            predicates.push(ViewPredicate::Custom(custom.clone()));
        }
        Ok(predicates)
    }
}

impl Configurator {
    /// Registers a view.
    ///
    /// Malformed input fails here, synchronously. The registration itself is
    /// an action: under deferred commit it competes by discriminator with
    /// other registrations of the same slot, and its callable runs at commit
    /// time against the registry's then-current policies.
    pub fn add_view(&mut self, config: ViewConfig) -> Result<(), ConfigError> {
        if config.view.is_none() && config.renderer.is_none() {
            return Err(ConfigError::MissingView);
        }
        if let Some(tag) = config.request_type {
            if tag != REQUEST && !routes::is_route_request_tag(tag) {
                return Err(ConfigError::UnsupportedRequestType(tag.name().to_string()));
            }
        }

        let predicates = config.build_predicates()?;
        let phash = predicates.phash();
        let rank = predicates.rank();

        let name = config.name.clone();
        let context_tag = config
            .context
            .or(config.for_)
            .unwrap_or(keystone_dispatch::ANY_CONTEXT);
        let classifier = if config.exception_view {
            EXCEPTION_VIEW_CLASSIFIER
        } else {
            VIEW_CLASSIFIER
        };
        let request_marker = match (&config.route_name, config.request_type) {
            (Some(route), _) => format!("route:{route}"),
            (None, Some(tag)) => tag.name().to_string(),
            (None, None) => REQUEST.name().to_string(),
        };

        let kind = if config.exception_view {
            "exception-view"
        } else {
            "view"
        };
        let discriminator = Discriminator::new(
            kind,
            [
                format!("context={context_tag}"),
                format!("name={name}"),
                format!("request={request_marker}"),
                format!("phash={phash}"),
            ],
        );
        let args = vec![
            format!("name={name:?}"),
            format!("context={context_tag}"),
            format!("request={request_marker}"),
        ];

        let package = self.package().to_string();
        let raw = config.view;
        let renderer_name = config.renderer;
        let route_name = config.route_name;
        let request_type = config.request_type;
        let permission = config.permission;
        let attr = config.attr;
        let decorator = config.decorator;
        let mapper = config.mapper;
        let http_cache = config.http_cache;
        let wrapper = config.wrapper;
        let accept = config.accept;
        let view_name = name.clone();
        let registration_phash = phash.clone();

        let callable = Box::new(move |env: &ConfigEnv| -> Result<(), ConfigError> {
            let request_tag = match &route_name {
                Some(route) => {
                    let guard = env.registry.read().expect("registry lock poisoned");
                    routes::route_request_tag_checked(&guard, route)?
                }
                None => request_type.unwrap_or(REQUEST),
            };

            let renderer = match &renderer_name {
                Some(renderer_name) => {
                    let guard = env.registry.read().expect("registry lock poisoned");
                    Some(resolve_renderer(&guard, renderer_name, &package)?)
                }
                None => None,
            };

            let raw = raw.unwrap_or_else(|| {
                // Renderer-only registration: the renderer renders null.
                RawView::function(
                    ViewMeta::new(renderer_name.clone().unwrap_or_default()),
                    |_context, _request| Ok(ViewOutput::Value(serde_json::Value::Null)),
                )
            });

            let deriver = ViewDeriver::from_registry(&env.registry);
            let derived = deriver
                .derive(
                    raw,
                    DeriveOptions {
                        permission,
                        predicates,
                        renderer,
                        decorator,
                        mapper,
                        attr,
                        http_cache,
                        wrapper_name: wrapper,
                        package,
                    },
                )?
                .with_registration_attrs(RegistrationAttrs {
                    rank,
                    phash: registration_phash.clone(),
                    accept: accept.clone(),
                });

            let mut guard = env.registry.write().expect("registry lock poisoned");
            let key = (classifier, request_tag, context_tag);
            let existing = guard
                .adapter(key, PROVIDED_VIEW, &view_name)
                .and_then(|value| value.downcast::<RegisteredView>().ok());

            let entry = match existing.as_deref() {
                None => RegisteredView::Single(derived),
                Some(RegisteredView::Single(old)) => {
                    let old_phash = old.registration_attrs().map(|attrs| &attrs.phash);
                    if old_phash == Some(&registration_phash) {
                        RegisteredView::Single(derived)
                    } else {
                        let mut multi = MultiView::new(&view_name);
                        let (old_rank, old_phash, old_accept) = match old.registration_attrs() {
                            Some(attrs) => (
                                attrs.rank,
                                Some(attrs.phash.clone()),
                                attrs.accept.clone(),
                            ),
                            None => (SPECIFICITY_CEILING, None, None),
                        };
                        multi.add(old.clone(), old_rank, old_accept.as_deref(), old_phash);
                        multi.add(
                            derived,
                            rank,
                            accept.as_deref(),
                            Some(registration_phash.clone()),
                        );
                        RegisteredView::Multi(multi)
                    }
                }
                Some(RegisteredView::Multi(old)) => {
                    let mut multi = old.clone();
                    multi.add(
                        derived,
                        rank,
                        accept.as_deref(),
                        Some(registration_phash.clone()),
                    );
                    RegisteredView::Multi(multi)
                }
            };

            let secured = match &entry {
                RegisteredView::Single(view) => view.has_permitted_channel(),
                RegisteredView::Multi(_) => true,
            };
            let value: Arc<RegisteredView> = Arc::new(entry);
            guard.register_adapter(key, PROVIDED_VIEW, &view_name, value.clone());
            if secured {
                guard.register_adapter(key, PROVIDED_SECURED_VIEW, &view_name, value);
            }
            tracing::debug!(
                target: "keystone::config",
                view = %view_name,
                context = %context_tag,
                request = %request_tag,
                "registered view"
            );
            Ok(())
        });

        self.action(Some(discriminator), Some(callable), args, PHASE_VIEW)
    }
}

/// Well-known phash of the empty predicate set.
pub fn default_phash() -> Phash {
    Phash::default_phash()
}
