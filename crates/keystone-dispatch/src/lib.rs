//! Runtime view dispatch for keystone.
//!
//! `keystone-dispatch` owns everything a committed configuration needs at
//! request time: the request/response model, the uniform view handle with
//! its introspection side channels, the predicate system that scores and
//! identifies registrations, the multi-view dispatcher that arbitrates
//! between competing registrations, and the renderer contract.
//!
//! It deliberately knows nothing about *how* registrations come to exist —
//! the action ledger, conflict resolution, and the view-deriver pipeline live
//! in the `keystone` façade crate, which assembles the pieces defined here.
//!
//! # Dispatch flow
//!
//! ```text
//! router lookup (keystone-registry, most-specific tags first)
//!   → RegisteredView
//!       Single(ViewHandle)   — invoke directly
//!       Multi(MultiView)     — candidates by rank, media sublists first;
//!                              PredicateMismatch falls through,
//!                              NotFound propagates
//! ```
//!
//! # Side channels
//!
//! A [`ViewHandle`] can carry three optional channels next to its normal
//! callable: `predicated` (predicate check without invoking), `permitted`
//! (authorization pre-check), and `call_permissive` (invoke bypassing
//! authorization). Stages that don't apply never attach a channel, so an
//! unadorned view stays indistinguishable from its raw target.

pub mod error;
pub mod multiview;
pub mod predicates;
pub mod render;
pub mod request;
pub mod resource;
pub mod response;
pub mod view;

pub use error::DispatchError;

pub use multiview::{MultiView, RegisteredView, ViewCandidate};

pub use predicates::{
    CustomPredicate, Phash, PredicateSet, ViewPredicate, SPECIFICITY_CEILING,
};

pub use render::{
    renderer_from_fn, JsonRenderer, JsonRendererFactory, Renderer, RendererFactory, RendererInfo,
    StringRenderer, StringRendererFactory,
};

pub use request::{Accept, Extensions, Request, REQUEST};

pub use resource::{context_repr, context_tags, lineage_contains, Resource, ANY_CONTEXT};

pub use response::{Response, ViewOutput};

pub use view::{
    classify_callable, CallingConvention, CheckFn, ClassView, ClassViewInstance, MapperOptions,
    ParamSpec, PermitFn, RawView, RegistrationAttrs, RequestOnlyFn, ViewFn, ViewHandle,
    ViewMapper, ViewMeta, ViewTarget, EXCEPTION_VIEW_CLASSIFIER, PROVIDED_SECURED_VIEW,
    PROVIDED_VIEW, VIEW_CLASSIFIER,
};
