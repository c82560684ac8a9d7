//! View handles, raw view targets, and calling-convention normalization.
//!
//! A [`ViewHandle`] is the uniform shape every registered view ends up in: a
//! `(context, request) -> output` callable carrying the original target's
//! identity metadata plus optional side channels added by wrapping stages:
//!
//! - `permitted` — authorization pre-check without invoking the view
//! - `call_permissive` — invoke bypassing authorization (introspection)
//! - `predicated` — predicate check without invoking
//! - `original` — the pre-decoration handle
//!
//! Stages that do not apply never wrap, so an unadorned view differs from its
//! raw target only by mapper normalization. Identity metadata ([`ViewMeta`])
//! is carried explicitly in the handle rather than copied attribute-by-
//! attribute: to introspection the wrapped callable looks like the original.

use crate::error::DispatchError;
use crate::predicates::Phash;
use crate::request::Request;
use crate::resource::Resource;
use crate::response::ViewOutput;
use keystone_registry::TypeTag;
use std::fmt;
use std::sync::Arc;

/// Classifier tag for ordinary view registrations.
pub const VIEW_CLASSIFIER: TypeTag = TypeTag("keystone.view-classifier");

/// Classifier tag for exception-view registrations.
pub const EXCEPTION_VIEW_CLASSIFIER: TypeTag = TypeTag("keystone.exception-view-classifier");

/// Provided marker for registered views.
pub const PROVIDED_VIEW: TypeTag = TypeTag("keystone.view");

/// Provided marker under which permission-checked views are additionally
/// visible.
pub const PROVIDED_SECURED_VIEW: TypeTag = TypeTag("keystone.secured-view");

/// The uniform view callable.
pub type ViewFn = Arc<
    dyn Fn(Option<&dyn Resource>, &Request) -> Result<ViewOutput, DispatchError> + Send + Sync,
>;

/// A request-only callable, pre-normalization.
pub type RequestOnlyFn =
    Arc<dyn Fn(&Request) -> Result<ViewOutput, DispatchError> + Send + Sync>;

/// Boolean predicate side channel.
pub type CheckFn = Arc<dyn Fn(Option<&dyn Resource>, &Request) -> bool + Send + Sync>;

/// Permission pre-check side channel.
pub type PermitFn = Arc<
    dyn Fn(Option<&dyn Resource>, &Request) -> Result<bool, DispatchError> + Send + Sync,
>;

/// Identity metadata preserved across every wrapping stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ViewMeta {
    /// The target's name (function or type name).
    pub name: String,
    /// The module path the target was defined in.
    pub module: String,
    /// Doc text, when the target carries one.
    pub doc: Option<String>,
}

impl ViewMeta {
    /// Metadata with just a name.
    pub fn new(name: impl Into<String>) -> Self {
        ViewMeta {
            name: name.into(),
            module: String::new(),
            doc: None,
        }
    }

    /// Sets the module path (`module_path!()` at the definition site).
    pub fn with_module(mut self, module: impl Into<String>) -> Self {
        self.module = module.into();
        self
    }

    /// Sets the doc text.
    pub fn with_doc(mut self, doc: impl Into<String>) -> Self {
        self.doc = Some(doc.into());
        self
    }
}

impl fmt::Display for ViewMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Registration attributes stamped onto a derived view by `add_view`, so a
/// later registration landing on the same slot can merge this one into a
/// multi-view without re-deriving it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationAttrs {
    /// Dispatch ordering key of the registration's predicate set.
    pub rank: u32,
    /// Predicate hash of the registration.
    pub phash: Phash,
    /// Media type the registration was constrained to, if any.
    pub accept: Option<String>,
}

/// The uniform wrapped view.
#[derive(Clone)]
pub struct ViewHandle {
    meta: ViewMeta,
    call: ViewFn,
    permissive: Option<ViewFn>,
    permitted: Option<PermitFn>,
    predicated: Option<CheckFn>,
    original: Option<Arc<ViewHandle>>,
    attrs: Option<RegistrationAttrs>,
}

impl ViewHandle {
    /// Creates a handle with no side channels.
    pub fn new(meta: ViewMeta, call: ViewFn) -> Self {
        ViewHandle {
            meta,
            call,
            permissive: None,
            permitted: None,
            predicated: None,
            original: None,
            attrs: None,
        }
    }

    /// The preserved identity metadata.
    pub fn meta(&self) -> &ViewMeta {
        &self.meta
    }

    /// Invokes the view through every wrapping stage.
    pub fn call(
        &self,
        context: Option<&dyn Resource>,
        request: &Request,
    ) -> Result<ViewOutput, DispatchError> {
        (self.call)(context, request)
    }

    /// Invokes the view bypassing authorization. Falls back to the normal
    /// call when no authorization stage was applied.
    pub fn call_permissive(
        &self,
        context: Option<&dyn Resource>,
        request: &Request,
    ) -> Result<ViewOutput, DispatchError> {
        match &self.permissive {
            Some(permissive) => permissive(context, request),
            None => (self.call)(context, request),
        }
    }

    /// Authorization pre-check. A view without an authorization stage is
    /// always permitted.
    pub fn permitted(
        &self,
        context: Option<&dyn Resource>,
        request: &Request,
    ) -> Result<bool, DispatchError> {
        match &self.permitted {
            Some(permitted) => permitted(context, request),
            None => Ok(true),
        }
    }

    /// Predicate check without invoking. A view without a predicate stage
    /// always matches.
    pub fn predicated(&self, context: Option<&dyn Resource>, request: &Request) -> bool {
        match &self.predicated {
            Some(predicated) => predicated(context, request),
            None => true,
        }
    }

    /// True if an authorization stage attached a permission pre-check.
    pub fn has_permitted_channel(&self) -> bool {
        self.permitted.is_some()
    }

    /// True if an authorization stage attached a permissive call.
    pub fn has_permissive_channel(&self) -> bool {
        self.permissive.is_some()
    }

    /// True if a predicate stage attached a check.
    pub fn has_predicated_channel(&self) -> bool {
        self.predicated.is_some()
    }

    /// The pre-decoration handle, when a decorator was applied.
    pub fn original(&self) -> Option<&ViewHandle> {
        self.original.as_deref()
    }

    /// Replaces the callable, keeping metadata and side channels. This is
    /// how outer stages wrap inner ones.
    pub fn wrap_call(self, call: ViewFn) -> Self {
        ViewHandle { call, ..self }
    }

    /// Attaches the authorization side channels.
    pub fn with_permission_channels(mut self, permissive: ViewFn, permitted: PermitFn) -> Self {
        self.permissive = Some(permissive);
        self.permitted = Some(permitted);
        self
    }

    /// Attaches the predicate side channel.
    pub fn with_predicated(mut self, predicated: CheckFn) -> Self {
        self.predicated = Some(predicated);
        self
    }

    /// Records the pre-decoration handle.
    pub fn with_original(mut self, original: Arc<ViewHandle>) -> Self {
        self.original = Some(original);
        self
    }

    /// Replaces the metadata (used to re-apply identity after decoration).
    pub fn with_meta(mut self, meta: ViewMeta) -> Self {
        self.meta = meta;
        self
    }

    /// Stamps registration attributes onto the handle.
    pub fn with_registration_attrs(mut self, attrs: RegistrationAttrs) -> Self {
        self.attrs = Some(attrs);
        self
    }

    /// The registration attributes, when this handle went through `add_view`.
    pub fn registration_attrs(&self) -> Option<&RegistrationAttrs> {
        self.attrs.as_ref()
    }
}

impl fmt::Debug for ViewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewHandle")
            .field("meta", &self.meta)
            .field("permissive", &self.permissive.is_some())
            .field("permitted", &self.permitted.is_some())
            .field("predicated", &self.predicated.is_some())
            .finish()
    }
}

/// A per-request view instance constructed by a [`ClassView`].
pub trait ClassViewInstance {
    /// Invokes the instance. `attr` selects a named method; `None` means the
    /// default call.
    fn invoke(&self, attr: Option<&str>) -> Result<ViewOutput, DispatchError>;
}

/// A class-style view target: constructed per request, then invoked.
pub trait ClassView: Send + Sync {
    /// Builds an instance for this context/request pair.
    fn instantiate<'a>(
        &self,
        context: Option<&'a dyn Resource>,
        request: &'a Request,
    ) -> Result<Box<dyn ClassViewInstance + 'a>, DispatchError>;
}

/// The shapes a raw view target can take before mapper normalization.
pub enum ViewTarget {
    /// Plain `(context, request)` function.
    Function(ViewFn),
    /// Request-only function.
    RequestOnly(RequestOnlyFn),
    /// Class-style target (per-request instance, optional named method).
    Class(Arc<dyn ClassView>),
}

/// A raw view target plus its identity metadata and an optionally attached
/// mapper.
pub struct RawView {
    meta: ViewMeta,
    target: ViewTarget,
    mapper: Option<Arc<dyn ViewMapper>>,
}

impl RawView {
    /// A `(context, request)` function target.
    pub fn function<F>(meta: ViewMeta, f: F) -> Self
    where
        F: Fn(Option<&dyn Resource>, &Request) -> Result<ViewOutput, DispatchError>
            + Send
            + Sync
            + 'static,
    {
        RawView {
            meta,
            target: ViewTarget::Function(Arc::new(f)),
            mapper: None,
        }
    }

    /// A request-only function target.
    pub fn request_only<F>(meta: ViewMeta, f: F) -> Self
    where
        F: Fn(&Request) -> Result<ViewOutput, DispatchError> + Send + Sync + 'static,
    {
        RawView {
            meta,
            target: ViewTarget::RequestOnly(Arc::new(f)),
            mapper: None,
        }
    }

    /// A class-style target.
    pub fn class(meta: ViewMeta, factory: Arc<dyn ClassView>) -> Self {
        RawView {
            meta,
            target: ViewTarget::Class(factory),
            mapper: None,
        }
    }

    /// Attaches a mapper to the view itself (second in mapper precedence,
    /// after a registration-supplied mapper).
    pub fn with_mapper(mut self, mapper: Arc<dyn ViewMapper>) -> Self {
        self.mapper = Some(mapper);
        self
    }

    /// The target's identity metadata.
    pub fn meta(&self) -> &ViewMeta {
        &self.meta
    }

    /// The raw target shape.
    pub fn target(&self) -> &ViewTarget {
        &self.target
    }

    /// The view-attached mapper, if any.
    pub fn attached_mapper(&self) -> Option<Arc<dyn ViewMapper>> {
        self.mapper.clone()
    }
}

impl fmt::Debug for RawView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = match self.target {
            ViewTarget::Function(_) => "function",
            ViewTarget::RequestOnly(_) => "request-only",
            ViewTarget::Class(_) => "class",
        };
        f.debug_struct("RawView")
            .field("meta", &self.meta)
            .field("target", &target)
            .finish()
    }
}

/// Options passed to a mapper.
#[derive(Debug, Clone, Default)]
pub struct MapperOptions {
    /// Named method to invoke on class-style targets instead of the default
    /// call.
    pub attr: Option<String>,
}

/// Normalizes a raw target into the uniform `(context, request)` callable.
///
/// Precedence when deriving a view: registration-supplied mapper, then the
/// view-attached mapper, then a process-wide default, then the built-in
/// default mapper.
pub trait ViewMapper: Send + Sync {
    /// Produces the uniform callable for a raw target.
    fn map(&self, raw: &RawView, options: &MapperOptions) -> ViewFn;
}

/// One parameter of a dynamically-described callable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamSpec {
    /// Parameter name (implicit receivers like `self` excluded).
    pub name: &'static str,
    /// True when the parameter has a default and is therefore not required.
    pub has_default: bool,
}

impl ParamSpec {
    /// A required parameter.
    pub fn required(name: &'static str) -> Self {
        ParamSpec {
            name,
            has_default: false,
        }
    }

    /// A defaulted parameter.
    pub fn defaulted(name: &'static str) -> Self {
        ParamSpec {
            name,
            has_default: true,
        }
    }
}

/// How a callable expects to be invoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallingConvention {
    /// `(request)` only.
    RequestOnly,
    /// `(context, request)`.
    ContextRequest,
}

/// Classifies a callable from its normalized parameter list.
///
/// Rules, in order:
/// - no inspectable parameters: context + request
/// - exactly one parameter, any name: request only
/// - first parameter literally named `request` with every subsequent
///   parameter defaulted: request only
/// - otherwise (two or more required positional parameters): context + request
pub fn classify_callable(params: &[ParamSpec]) -> CallingConvention {
    match params {
        [] => CallingConvention::ContextRequest,
        [_] => CallingConvention::RequestOnly,
        [first, rest @ ..] => {
            if first.name == "request" && rest.iter().all(|param| param.has_default) {
                CallingConvention::RequestOnly
            } else {
                CallingConvention::ContextRequest
            }
        }
    }
}
