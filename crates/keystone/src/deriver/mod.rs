//! The view deriver pipeline.
//!
//! Turns a raw view target into the uniform, fully-wrapped [`ViewHandle`]
//! that gets registered. Stages wrap innermost-first, and a stage that does
//! not apply adds nothing — a view with no permission, no predicates, and no
//! cache policy differs from its raw target only by mapper normalization
//! (and rendering, when a renderer is configured):
//!
//! 1. **Mapper** — normalize the calling convention.
//! 2. **Renderer** — turn bare return values into responses; a
//!    request-supplied renderer override wins at call time.
//! 3. **Decorator** — user wrapping, with identity metadata re-applied and
//!    the pre-decoration handle kept reachable.
//! 4. **Predicates** — raise the predicate-mismatch signal on failure and
//!    expose the standalone `predicated` channel.
//! 5. **Authorization** — consult the security policies, expose the
//!    `permitted` and `call_permissive` channels; with debug-authorization
//!    enabled, log every decision including the no-policy case.
//! 6. **HTTP cache** — stamp Cache-Control/Expires on successful responses.
//! 7. **Wrapper** — render the inner response, expose it to an outer view
//!    through request extensions, return the outer view's result.

mod cache;
mod mapper;

pub use cache::{httpdate, CachePolicy};
pub use mapper::{DefaultViewMapper, VIEW_MAPPER};

pub(crate) use mapper::{default_mapper, MapperUtility};

use crate::auth::{
    authentication_policy, authorization_policy, debug_logger, default_permission,
    AuthenticationPolicy, AuthorizationPolicy, DebugLogger, NO_PERMISSION_REQUIRED,
};
use crate::config::ConfigError;
use crate::settings::{Settings, SETTINGS};
use crate::SharedRegistry;
use chrono::Utc;
use keystone_dispatch::{
    context_repr, context_tags, CheckFn, DispatchError, MapperOptions, PermitFn, PredicateSet,
    RawView, RegisteredView, Renderer, RendererFactory, RendererInfo, Response, ViewFn,
    ViewHandle, ViewMapper, ViewOutput, PROVIDED_VIEW, VIEW_CLASSIFIER,
};
use keystone_registry::{ComponentRegistry, TypeTag};
use std::sync::Arc;

/// Utility tag renderer factories are registered under (by name; the empty
/// name is the process default renderer).
pub const RENDERER_FACTORY: TypeTag = TypeTag("keystone.renderer-factory");

pub(crate) struct RendererFactoryUtility(pub Arc<dyn RendererFactory>);

/// Resolves a named renderer factory into a renderer.
pub(crate) fn resolve_renderer(
    registry: &ComponentRegistry,
    name: &str,
    package: &str,
) -> Result<Arc<dyn Renderer>, ConfigError> {
    let factory = registry
        .utility::<RendererFactoryUtility>(RENDERER_FACTORY, name)
        .ok_or_else(|| ConfigError::NoSuchRenderer(name.to_string()))?;
    let info = RendererInfo {
        name: name.to_string(),
        package: package.to_string(),
    };
    factory
        .0
        .create(&info)
        .map_err(|error| ConfigError::Other(anyhow::Error::new(error)))
}

/// The process default renderer (empty factory name), when one is registered.
pub(crate) fn resolve_default_renderer(
    registry: &ComponentRegistry,
    package: &str,
) -> Result<Option<Arc<dyn Renderer>>, ConfigError> {
    if registry
        .utility::<RendererFactoryUtility>(RENDERER_FACTORY, "")
        .is_none()
    {
        return Ok(None);
    }
    resolve_renderer(registry, "", package).map(Some)
}

/// User decorator applied at stage 3.
pub type DecoratorFn = Arc<dyn Fn(ViewHandle) -> ViewHandle + Send + Sync>;

/// Inner-view snapshot the wrapper stage deposits into request extensions
/// for the outer view to pick up.
pub struct WrappedState {
    /// The inner response body, decoded as text.
    pub body: String,
    /// The inner response.
    pub response: Response,
    /// The inner view (pre-decoration handle when a decorator was applied).
    pub view: Arc<ViewHandle>,
}

/// Per-registration options consumed by [`ViewDeriver::derive`].
#[derive(Default)]
pub struct DeriveOptions {
    /// Permission to require; the process default permission applies when
    /// unset, and [`NO_PERMISSION_REQUIRED`] suppresses both.
    pub permission: Option<String>,
    /// Predicates to check before invoking.
    pub predicates: PredicateSet,
    /// Renderer for bare return values.
    pub renderer: Option<Arc<dyn Renderer>>,
    /// User decorator.
    pub decorator: Option<DecoratorFn>,
    /// Registration-supplied mapper (highest precedence).
    pub mapper: Option<Arc<dyn ViewMapper>>,
    /// Named method for class-style targets.
    pub attr: Option<String>,
    /// Cache-header policy.
    pub http_cache: Option<CachePolicy>,
    /// Name of an outer wrapper view.
    pub wrapper_name: Option<String>,
    /// Registering package, for renderer resolution.
    pub package: String,
}

/// Derives wrapped views against one registry state.
///
/// Policies, settings, the default permission, and the default mapper are
/// read from the registry when the deriver is built — at action execution
/// time, so registrations made earlier in the same commit batch are visible.
pub struct ViewDeriver {
    registry: SharedRegistry,
    settings: Arc<Settings>,
    authn: Option<Arc<dyn AuthenticationPolicy>>,
    authz: Option<Arc<dyn AuthorizationPolicy>>,
    logger: Arc<dyn DebugLogger>,
    default_permission: Option<String>,
    default_mapper: Option<Arc<dyn ViewMapper>>,
}

impl ViewDeriver {
    /// Builds a deriver from the registry's current utilities.
    pub fn from_registry(registry: &SharedRegistry) -> Self {
        let guard = registry.read().expect("registry lock poisoned");
        ViewDeriver {
            registry: registry.clone(),
            settings: guard
                .utility::<Settings>(SETTINGS, "")
                .unwrap_or_else(|| Arc::new(Settings::new())),
            authn: authentication_policy(&guard),
            authz: authorization_policy(&guard),
            logger: debug_logger(&guard),
            default_permission: default_permission(&guard),
            default_mapper: default_mapper(&guard),
        }
    }

    /// Runs the full pipeline.
    pub fn derive(&self, raw: RawView, options: DeriveOptions) -> Result<ViewHandle, ConfigError> {
        let meta = raw.meta().clone();

        // Stage 1: mapper normalization.
        let mapper = options
            .mapper
            .clone()
            .or_else(|| raw.attached_mapper())
            .or_else(|| self.default_mapper.clone())
            .unwrap_or_else(|| Arc::new(DefaultViewMapper));
        let mapper_options = MapperOptions {
            attr: options.attr.clone(),
        };
        let mut handle = ViewHandle::new(meta.clone(), mapper.map(&raw, &mapper_options));

        // Stage 2: rendering.
        let renderer = match &options.renderer {
            Some(renderer) => Some(renderer.clone()),
            None => {
                let guard = self.registry.read().expect("registry lock poisoned");
                resolve_default_renderer(&guard, &options.package)?
            }
        };
        if let Some(renderer) = renderer {
            let prev = handle.clone();
            let render_meta = meta.clone();
            let call: ViewFn = Arc::new(move |context, request| {
                match prev.call(context, request)? {
                    ViewOutput::Response(response) => Ok(ViewOutput::Response(response)),
                    ViewOutput::Value(value) => {
                        let chosen = request
                            .renderer_override
                            .as_ref()
                            .unwrap_or(&renderer);
                        let response =
                            chosen.render_view(request, &value, &render_meta, context)?;
                        Ok(ViewOutput::Response(response))
                    }
                }
            });
            handle = handle.wrap_call(call);
        }

        // Stage 3: decoration, with identity re-applied afterwards.
        if let Some(decorator) = &options.decorator {
            let original = Arc::new(handle.clone());
            handle = decorator(handle)
                .with_meta(meta.clone())
                .with_original(original);
        }

        // Stage 4: predicate checking.
        if !options.predicates.is_empty() {
            let predicates = options.predicates.clone();
            let checker: CheckFn = {
                let predicates = predicates.clone();
                Arc::new(move |context, request| predicates.check(context, request))
            };
            let prev = handle.clone();
            let view_name = meta.name.clone();
            let call: ViewFn = Arc::new(move |context, request| {
                if !predicates.check(context, request) {
                    return Err(DispatchError::predicate_mismatch(view_name.clone()));
                }
                prev.call(context, request)
            });
            handle = handle.wrap_call(call).with_predicated(checker);
        }

        // Stage 5: authorization.
        let permission = options
            .permission
            .clone()
            .or_else(|| self.default_permission.clone());
        let exempt = permission.as_deref() == Some(NO_PERMISSION_REQUIRED);
        if let (Some(authn), Some(authz), Some(permission), false) = (
            self.authn.clone(),
            self.authz.clone(),
            permission.clone(),
            exempt,
        ) {
            let permissive_handle = handle.clone();
            let permissive: ViewFn =
                Arc::new(move |context, request| permissive_handle.call(context, request));

            let permitted: PermitFn = {
                let authn = authn.clone();
                let authz = authz.clone();
                let permission = permission.clone();
                Arc::new(move |context, request| {
                    let principals = authn.effective_principals(request);
                    Ok(authz.permits(context, &principals, &permission))
                })
            };

            let prev = handle.clone();
            let view_name = meta.name.clone();
            let call: ViewFn = Arc::new(move |context, request| {
                let principals = authn.effective_principals(request);
                if authz.permits(context, &principals, &permission) {
                    prev.call(context, request)
                } else {
                    Err(DispatchError::Forbidden {
                        view: view_name.clone(),
                        permission: permission.clone(),
                    })
                }
            });
            handle = handle
                .wrap_call(call)
                .with_permission_channels(permissive, permitted);
        }

        // Stage 5b: authorization debug logging wraps every decision,
        // independent of outcome, when the setting is on.
        if self.settings.debug_authorization() {
            let prev = handle.clone();
            let logger = self.logger.clone();
            let authn = self.authn.clone();
            let authz = self.authz.clone();
            let call: ViewFn = Arc::new(move |context, request| {
                let message = match (&authn, &authz) {
                    (Some(authn), Some(authz)) => match &permission {
                        Some(permission) => {
                            let principals = authn.effective_principals(request);
                            authz.permits(context, &principals, permission).to_string()
                        }
                        None => "Allowed (no permission registered)".to_string(),
                    },
                    _ => "Allowed (no authorization policy in use)".to_string(),
                };
                logger.log(&format!(
                    "debug_authorization of url {} (view name {:?} against context {}): {}",
                    request.url,
                    request.view_name,
                    context_repr(context),
                    message,
                ));
                prev.call(context, request)
            });
            handle = handle.wrap_call(call);
        }

        // Stage 6: HTTP caching.
        if let Some(policy) = &options.http_cache {
            if !self.settings.prevent_http_cache() {
                let policy = policy.clone();
                let prev = handle.clone();
                let call: ViewFn = Arc::new(move |context, request| {
                    match prev.call(context, request)? {
                        ViewOutput::Response(mut response) => {
                            if !response.prevent_auto_cache {
                                policy.apply(&mut response, Utc::now());
                            }
                            Ok(ViewOutput::Response(response))
                        }
                        other => Ok(other),
                    }
                });
                handle = handle.wrap_call(call);
            }
        }

        // Stage 7: wrapper-view composition.
        if let Some(wrapper_name) = &options.wrapper_name {
            let wrapper_name = wrapper_name.clone();
            let registry = self.registry.clone();
            let prev = handle.clone();
            let inner = Arc::new(handle.clone());
            let call: ViewFn = Arc::new(move |context, request| {
                let response = match prev.call(context, request)? {
                    ViewOutput::Response(response) => response,
                    ViewOutput::Value(_) => {
                        return Err(DispatchError::Render(
                            "wrapped view did not produce a response; configure a renderer"
                                .to_string(),
                        ))
                    }
                };
                let inner_view = match inner.original() {
                    Some(original) => Arc::new(original.clone()),
                    None => inner.clone(),
                };
                request.extensions.insert(WrappedState {
                    body: response.body_text(),
                    response,
                    view: inner_view,
                });

                let registered = {
                    let guard = registry.read().expect("registry lock poisoned");
                    guard
                        .lookup(
                            VIEW_CLASSIFIER,
                            &request.request_tags(),
                            &context_tags(context),
                            PROVIDED_VIEW,
                            &wrapper_name,
                        )
                        .and_then(|value| value.downcast::<RegisteredView>().ok())
                };
                match registered {
                    Some(outer) => outer.invoke(context, request),
                    None => Err(DispatchError::WrapperLookup(wrapper_name.clone())),
                }
            });
            handle = handle.wrap_call(call);
        }

        Ok(handle)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::{LoggerUtility, DEBUG_LOGGER};
    use crate::testing::{
        text_view, value_view, CapturingLogger, StaticAuthentication, StaticAuthorization,
    };
    use keystone_dispatch::{Request, StringRenderer, ViewMeta, ViewPredicate};
    use keystone_registry::ComponentRegistry;
    use serde_json::json;
    use std::sync::RwLock;

    struct Harness {
        registry: SharedRegistry,
    }

    impl Harness {
        fn new() -> Self {
            Harness {
                registry: Arc::new(RwLock::new(ComponentRegistry::new())),
            }
        }

        fn with_settings(self, settings: Settings) -> Self {
            self.registry
                .write()
                .unwrap()
                .register_utility(SETTINGS, "", Arc::new(settings));
            self
        }

        fn with_policies(self, permits: bool) -> Self {
            {
                let mut guard = self.registry.write().unwrap();
                guard.register_utility(
                    crate::auth::AUTHENTICATION_POLICY,
                    "",
                    Arc::new(crate::auth::AuthnUtility(Arc::new(StaticAuthentication(
                        vec!["abc".to_string()],
                    )))),
                );
                guard.register_utility(
                    crate::auth::AUTHORIZATION_POLICY,
                    "",
                    Arc::new(crate::auth::AuthzUtility(Arc::new(StaticAuthorization(
                        permits,
                    )))),
                );
            }
            self
        }

        fn with_authentication_only(self) -> Self {
            self.registry.write().unwrap().register_utility(
                crate::auth::AUTHENTICATION_POLICY,
                "",
                Arc::new(crate::auth::AuthnUtility(Arc::new(StaticAuthentication(
                    vec!["abc".to_string()],
                )))),
            );
            self
        }

        fn with_logger(self) -> (Self, Arc<CapturingLogger>) {
            let logger = Arc::new(CapturingLogger::default());
            self.registry.write().unwrap().register_utility(
                DEBUG_LOGGER,
                "",
                Arc::new(LoggerUtility(logger.clone())),
            );
            (self, logger)
        }

        fn deriver(&self) -> ViewDeriver {
            ViewDeriver::from_registry(&self.registry)
        }
    }

    fn debug_settings() -> Settings {
        let mut settings = Settings::new();
        settings.set("debug_authorization", true);
        settings
    }

    fn request() -> Request {
        Request::new("GET", "url").with_view_name("view_name")
    }

    fn body(handle: &ViewHandle, request: &Request) -> String {
        handle
            .call(None, request)
            .unwrap()
            .as_response()
            .unwrap()
            .body_text()
    }

    #[test]
    fn test_bare_view_round_trips() {
        let harness = Harness::new();
        let derived = harness
            .deriver()
            .derive(text_view("plain", "OK"), DeriveOptions::default())
            .unwrap();
        assert!(!derived.has_permitted_channel());
        assert!(!derived.has_predicated_channel());
        assert_eq!(body(&derived, &request()), "OK");
    }

    #[test]
    fn test_identity_metadata_preserved() {
        let harness = Harness::new();
        let raw = RawView::function(
            ViewMeta::new("myview")
                .with_module("myapp::views")
                .with_doc("Renders things."),
            |_c, _r| Ok(ViewOutput::Response(Response::text("OK"))),
        );
        let options = DeriveOptions {
            permission: Some("view".to_string()),
            predicates: [ViewPredicate::request_method("GET")].into_iter().collect(),
            ..Default::default()
        };
        let derived = harness.with_policies(true).deriver().derive(raw, options).unwrap();
        assert_eq!(derived.meta().name, "myview");
        assert_eq!(derived.meta().module, "myapp::views");
        assert_eq!(derived.meta().doc.as_deref(), Some("Renders things."));
    }

    #[test]
    fn test_renderer_stage_renders_values() {
        let harness = Harness::new();
        let options = DeriveOptions {
            renderer: Some(Arc::new(StringRenderer)),
            ..Default::default()
        };
        let derived = harness
            .deriver()
            .derive(value_view("valued", json!("rendered")), options)
            .unwrap();
        assert_eq!(body(&derived, &request()), "rendered");
    }

    #[test]
    fn test_renderer_stage_passes_responses_through() {
        let harness = Harness::new();
        let options = DeriveOptions {
            renderer: Some(Arc::new(StringRenderer)),
            ..Default::default()
        };
        let derived = harness
            .deriver()
            .derive(text_view("resp", "untouched"), options)
            .unwrap();
        assert_eq!(body(&derived, &request()), "untouched");
    }

    #[test]
    fn test_request_renderer_override_wins() {
        let harness = Harness::new();
        let options = DeriveOptions {
            renderer: Some(Arc::new(StringRenderer)),
            ..Default::default()
        };
        let derived = harness
            .deriver()
            .derive(value_view("valued", json!({"a": 1})), options)
            .unwrap();

        let mut overriding = request();
        overriding.renderer_override = Some(Arc::new(keystone_dispatch::JsonRenderer));
        assert_eq!(body(&derived, &overriding), r#"{"a":1}"#);
    }

    #[test]
    fn test_default_renderer_used_when_none_explicit() {
        let harness = Harness::new();
        harness.registry.write().unwrap().register_utility(
            RENDERER_FACTORY,
            "",
            Arc::new(RendererFactoryUtility(Arc::new(
                keystone_dispatch::StringRendererFactory,
            ))),
        );
        let derived = harness
            .deriver()
            .derive(value_view("valued", json!("via-default")), DeriveOptions::default())
            .unwrap();
        assert_eq!(body(&derived, &request()), "via-default");
    }

    #[test]
    fn test_decorator_wraps_and_identity_reapplied() {
        let harness = Harness::new();
        let decorator: DecoratorFn = Arc::new(|inner| {
            let prev = inner.clone();
            let call: ViewFn = Arc::new(move |context, request| {
                let output = prev.call(context, request)?;
                let inner_body = output.as_response().unwrap().body_text();
                Ok(ViewOutput::Response(Response::text(format!(
                    "decorated {inner_body}"
                ))))
            });
            inner.wrap_call(call).with_meta(ViewMeta::new("decorator"))
        });
        let options = DeriveOptions {
            decorator: Some(decorator),
            ..Default::default()
        };
        let derived = harness
            .deriver()
            .derive(text_view("inner_view", "OK"), options)
            .unwrap();
        assert_eq!(body(&derived, &request()), "decorated OK");
        // The decorator renamed the view; the deriver restores identity.
        assert_eq!(derived.meta().name, "inner_view");
        assert_eq!(derived.original().unwrap().meta().name, "inner_view");
    }

    #[test]
    fn test_predicates_all_pass() {
        let harness = Harness::new();
        let options = DeriveOptions {
            predicates: [
                ViewPredicate::request_method("GET"),
                ViewPredicate::request_param("ok"),
            ]
            .into_iter()
            .collect(),
            ..Default::default()
        };
        let derived = harness
            .deriver()
            .derive(text_view("pred", "OK"), options)
            .unwrap();
        let matching = request().with_param("ok", "1");
        assert_eq!(body(&derived, &matching), "OK");
        assert!(derived.predicated(None, &matching));
    }

    #[test]
    fn test_predicate_mismatch_names_view() {
        let harness = Harness::new();
        let options = DeriveOptions {
            predicates: [ViewPredicate::request_method("POST")].into_iter().collect(),
            ..Default::default()
        };
        let derived = harness
            .deriver()
            .derive(text_view("myview", "OK"), options)
            .unwrap();
        let error = derived.call(None, &request()).unwrap_err();
        assert_eq!(error.to_string(), "predicate mismatch for view myview");
        assert!(!derived.predicated(None, &request()));
    }

    #[test]
    fn test_secured_view_allows_and_denies() {
        let allowed = Harness::new()
            .with_policies(true)
            .deriver()
            .derive(
                text_view("secured", "OK"),
                DeriveOptions {
                    permission: Some("view".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(body(&allowed, &request()), "OK");
        assert!(allowed.permitted(None, &request()).unwrap());

        let denied = Harness::new()
            .with_policies(false)
            .deriver()
            .derive(
                text_view("myview", "OK"),
                DeriveOptions {
                    permission: Some("edit".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        let error = denied.call(None, &request()).unwrap_err();
        assert_eq!(
            error.to_string(),
            "Unauthorized: myview failed permission check"
        );
        // The pre-check reports denial without raising; the permissive call
        // bypasses the check entirely.
        assert!(!denied.permitted(None, &request()).unwrap());
        assert_eq!(
            denied
                .call_permissive(None, &request())
                .unwrap()
                .as_response()
                .unwrap()
                .body_text(),
            "OK"
        );
    }

    #[test]
    fn test_one_policy_only_skips_authorization() {
        let derived = Harness::new()
            .with_authentication_only()
            .deriver()
            .derive(
                text_view("half", "OK"),
                DeriveOptions {
                    permission: Some("view".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!derived.has_permitted_channel());
        assert_eq!(body(&derived, &request()), "OK");
    }

    #[test]
    fn test_no_permission_required_suppresses_security() {
        let derived = Harness::new()
            .with_policies(false)
            .deriver()
            .derive(
                text_view("open", "OK"),
                DeriveOptions {
                    permission: Some(NO_PERMISSION_REQUIRED.to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!derived.has_permitted_channel());
        assert_eq!(body(&derived, &request()), "OK");
    }

    #[test]
    fn test_debug_authorization_no_policy_wording() {
        let (harness, logger) = Harness::new().with_settings(debug_settings()).with_logger();
        let derived = harness
            .deriver()
            .derive(
                text_view("v", "OK"),
                DeriveOptions {
                    permission: Some("view".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(!derived.has_permitted_channel());
        assert_eq!(body(&derived, &request()), "OK");
        assert_eq!(
            logger.messages(),
            vec![
                "debug_authorization of url url (view name \"view_name\" against context None): \
                 Allowed (no authorization policy in use)"
            ]
        );
    }

    #[test]
    fn test_debug_authorization_one_policy_wording() {
        let (harness, logger) = Harness::new()
            .with_settings(debug_settings())
            .with_logger();
        let derived = harness
            .with_authentication_only()
            .deriver()
            .derive(
                text_view("v", "OK"),
                DeriveOptions {
                    permission: Some("view".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(body(&derived, &request()), "OK");
        let messages = logger.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].ends_with("Allowed (no authorization policy in use)"));
    }

    #[test]
    fn test_debug_authorization_no_permission_wording() {
        let (harness, logger) = Harness::new().with_settings(debug_settings()).with_logger();
        let derived = harness
            .with_policies(true)
            .deriver()
            .derive(text_view("v", "OK"), DeriveOptions::default())
            .unwrap();
        assert_eq!(body(&derived, &request()), "OK");
        let messages = logger.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].ends_with("Allowed (no permission registered)"));
    }

    #[test]
    fn test_debug_authorization_logs_decision() {
        let (harness, logger) = Harness::new().with_settings(debug_settings()).with_logger();
        let derived = harness
            .with_policies(true)
            .deriver()
            .derive(
                text_view("v", "OK"),
                DeriveOptions {
                    permission: Some("view".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(body(&derived, &request()), "OK");
        let messages = logger.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].ends_with("): true"), "got {:?}", messages[0]);
    }

    #[test]
    fn test_debug_authorization_logs_denial() {
        let (harness, logger) = Harness::new().with_settings(debug_settings()).with_logger();
        let derived = harness
            .with_policies(false)
            .deriver()
            .derive(
                text_view("v", "OK"),
                DeriveOptions {
                    permission: Some("view".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(derived.call(None, &request()).is_err());
        let messages = logger.messages();
        assert_eq!(messages.len(), 1);
        assert!(messages[0].ends_with("): false"), "got {:?}", messages[0]);
    }

    #[test]
    fn test_http_cache_stamps_headers() {
        let harness = Harness::new();
        let options = DeriveOptions {
            http_cache: Some(CachePolicy::seconds(3600)),
            ..Default::default()
        };
        let derived = harness
            .deriver()
            .derive(text_view("cached", "OK"), options)
            .unwrap();
        let output = derived.call(None, &request()).unwrap();
        let response = output.as_response().unwrap();
        assert_eq!(response.header("Cache-Control"), Some("max-age=3600"));
        assert!(response.header("Expires").is_some());
    }

    #[test]
    fn test_http_cache_options_only_no_expires() {
        let harness = Harness::new();
        let options = DeriveOptions {
            http_cache: Some(CachePolicy::with_options(None, ["public"])),
            ..Default::default()
        };
        let derived = harness
            .deriver()
            .derive(text_view("cached", "OK"), options)
            .unwrap();
        let output = derived.call(None, &request()).unwrap();
        let response = output.as_response().unwrap();
        assert_eq!(response.header("Cache-Control"), Some("public"));
        assert!(response.header("Expires").is_none());
    }

    #[test]
    fn test_http_cache_respects_response_opt_out() {
        let harness = Harness::new();
        let raw = RawView::function(ViewMeta::new("optout"), |_c, _r| {
            let mut response = Response::text("OK");
            response.prevent_auto_cache = true;
            Ok(ViewOutput::Response(response))
        });
        let options = DeriveOptions {
            http_cache: Some(CachePolicy::seconds(3600)),
            ..Default::default()
        };
        let derived = harness.deriver().derive(raw, options).unwrap();
        let output = derived.call(None, &request()).unwrap();
        let response = output.as_response().unwrap();
        assert!(response.header("Cache-Control").is_none());
        assert!(response.header("Expires").is_none());
    }

    #[test]
    fn test_http_cache_disabled_by_settings() {
        let mut settings = Settings::new();
        settings.set("prevent_http_cache", true);
        let harness = Harness::new().with_settings(settings);
        let options = DeriveOptions {
            http_cache: Some(CachePolicy::seconds(3600)),
            ..Default::default()
        };
        let derived = harness
            .deriver()
            .derive(text_view("cached", "OK"), options)
            .unwrap();
        let output = derived.call(None, &request()).unwrap();
        let response = output.as_response().unwrap();
        assert!(response.header("Cache-Control").is_none());
        assert!(response.header("Expires").is_none());
    }

    #[test]
    fn test_wrapper_stage_composes_outer_view() {
        let harness = Harness::new();

        // Register the outer view directly in the registry the way a
        // committed add_view would.
        let outer = RawView::function(ViewMeta::new("owrap"), |_context, request| {
            let wrapped = request
                .extensions
                .get::<WrappedState>()
                .expect("wrapper state missing");
            assert_eq!(wrapped.response.body_text(), wrapped.body);
            assert_eq!(wrapped.view.meta().name, "inner_view");
            Ok(ViewOutput::Response(Response::text(format!(
                "outer {}",
                wrapped.body
            ))))
        });
        let outer_handle = Harness::new()
            .deriver()
            .derive(outer, DeriveOptions::default())
            .unwrap();
        harness.registry.write().unwrap().register_adapter(
            (
                VIEW_CLASSIFIER,
                keystone_dispatch::REQUEST,
                keystone_dispatch::ANY_CONTEXT,
            ),
            PROVIDED_VIEW,
            "owrap",
            Arc::new(RegisteredView::Single(outer_handle)),
        );

        let options = DeriveOptions {
            wrapper_name: Some("owrap".to_string()),
            ..Default::default()
        };
        let derived = harness
            .deriver()
            .derive(text_view("inner_view", "OK"), options)
            .unwrap();
        assert_eq!(body(&derived, &request()), "outer OK");
    }

    #[test]
    fn test_wrapper_missing_is_lookup_error() {
        let harness = Harness::new();
        let options = DeriveOptions {
            wrapper_name: Some("owrap".to_string()),
            ..Default::default()
        };
        let derived = harness
            .deriver()
            .derive(text_view("inner_view", "OK"), options)
            .unwrap();
        let error = derived.call(None, &request()).unwrap_err();
        assert_eq!(error.to_string(), "no wrapper view named owrap found");
    }

    #[test]
    fn test_registration_mapper_outranks_view_attached() {
        struct FixedMapper(&'static str);

        impl ViewMapper for FixedMapper {
            fn map(&self, _raw: &RawView, _options: &MapperOptions) -> ViewFn {
                let label = self.0;
                Arc::new(move |_context, _request| {
                    Ok(ViewOutput::Response(Response::text(label)))
                })
            }
        }

        let harness = Harness::new();
        let raw = RawView::function(ViewMeta::new("v"), |_c, _r| {
            Ok(ViewOutput::Response(Response::text("raw")))
        })
        .with_mapper(Arc::new(FixedMapper("view-attached")));

        // View-attached mapper applies when the registration has none.
        let derived = harness
            .deriver()
            .derive(raw, DeriveOptions::default())
            .unwrap();
        assert_eq!(body(&derived, &request()), "view-attached");

        // A registration-supplied mapper wins over the view-attached one.
        let raw = RawView::function(ViewMeta::new("v"), |_c, _r| {
            Ok(ViewOutput::Response(Response::text("raw")))
        })
        .with_mapper(Arc::new(FixedMapper("view-attached")));
        let options = DeriveOptions {
            mapper: Some(Arc::new(FixedMapper("registration"))),
            ..Default::default()
        };
        let derived = harness.deriver().derive(raw, options).unwrap();
        assert_eq!(body(&derived, &request()), "registration");
    }

    #[test]
    fn test_process_default_mapper_used_last() {
        struct FixedMapper;

        impl ViewMapper for FixedMapper {
            fn map(&self, _raw: &RawView, _options: &MapperOptions) -> ViewFn {
                Arc::new(|_context, _request| {
                    Ok(ViewOutput::Response(Response::text("process-default")))
                })
            }
        }

        let harness = Harness::new();
        harness.registry.write().unwrap().register_utility(
            VIEW_MAPPER,
            "",
            Arc::new(MapperUtility(Arc::new(FixedMapper))),
        );
        let derived = harness
            .deriver()
            .derive(text_view("v", "raw"), DeriveOptions::default())
            .unwrap();
        assert_eq!(body(&derived, &request()), "process-default");
    }
}
