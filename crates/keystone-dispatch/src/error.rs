//! Dispatch-time error taxonomy.
//!
//! Every error here unwinds synchronously; nothing is retried. The only
//! recovery behavior in the crate is [`MultiView`]'s mismatch-to-next-candidate
//! fallthrough, which catches exactly [`DispatchError::PredicateMismatch`] and
//! nothing else. A `NotFound` raised *by* a view propagates through the
//! dispatch loop untouched — the two must never be conflated.
//!
//! [`MultiView`]: crate::multiview::MultiView

use thiserror::Error;

/// Errors produced while dispatching a request to a view.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Internal control signal: a wrapped view's predicates did not match.
    ///
    /// Caught only by the multi-view dispatch loop to fall through to the
    /// next candidate. If it escapes to the caller, no candidate matched and
    /// it should be treated as not-found.
    #[error("predicate mismatch for view {view}")]
    PredicateMismatch {
        /// Display name of the view whose predicates failed.
        view: String,
    },

    /// No view matched the request. Terminal; the surrounding router turns
    /// this into a user-facing response.
    #[error("not found: {detail}")]
    NotFound {
        /// Human-readable description of what was looked up.
        detail: String,
    },

    /// The authorization policy denied the request.
    #[error("Unauthorized: {view} failed permission check")]
    Forbidden {
        /// Display name of the denied view.
        view: String,
        /// The permission that was checked.
        permission: String,
    },

    /// A wrapper view name did not resolve to a registered view.
    #[error("no wrapper view named {0} found")]
    WrapperLookup(String),

    /// A renderer failed, or a view returned a bare value with no renderer
    /// configured to turn it into a response.
    #[error("render error: {0}")]
    Render(String),

    /// An error raised by the view callable itself.
    #[error(transparent)]
    Handler(#[from] anyhow::Error),
}

impl DispatchError {
    /// Creates a not-found error.
    pub fn not_found(detail: impl Into<String>) -> Self {
        DispatchError::NotFound {
            detail: detail.into(),
        }
    }

    /// Creates a predicate-mismatch signal for the named view.
    pub fn predicate_mismatch(view: impl Into<String>) -> Self {
        DispatchError::PredicateMismatch { view: view.into() }
    }

    /// Returns true if this is the internal predicate-mismatch signal.
    pub fn is_predicate_mismatch(&self) -> bool {
        matches!(self, DispatchError::PredicateMismatch { .. })
    }

    /// Returns true if this is a terminal not-found.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DispatchError::NotFound { .. })
    }

    /// Returns true if this is an authorization denial.
    pub fn is_forbidden(&self) -> bool {
        matches!(self, DispatchError::Forbidden { .. })
    }
}
