//! The multi-view dispatcher.
//!
//! When a second view registration lands on an occupied
//! (classifier, request, context, name) slot with a *different* predicate
//! hash, the two are merged into a [`MultiView`] instead of one overwriting
//! the other. At request time the multi-view re-dispatches internally:
//! candidates are tried most-specific-first and a predicate mismatch falls
//! through to the next candidate.
//!
//! Candidates live in three places:
//!
//! - `views`: the global, rank-ordered list
//! - `media_views`: one rank-ordered sublist per concrete media type
//! - `accepts`: the registered media types in registration order, which is
//!   also the preference order for Accept-header ties
//!
//! Wildcard media types (`text/*`) are not negotiable offers and fold into
//! the global list.

use crate::error::DispatchError;
use crate::predicates::Phash;
use crate::request::Request;
use crate::resource::Resource;
use crate::response::ViewOutput;
use crate::view::ViewHandle;
use std::collections::HashMap;
use std::fmt;

/// One candidate in a multi-view list.
#[derive(Clone)]
pub struct ViewCandidate {
    /// Dispatch ordering key (lower = more specific).
    pub rank: u32,
    /// The wrapped view.
    pub view: ViewHandle,
    /// Predicate hash of the registration, when known.
    pub phash: Option<Phash>,
}

impl fmt::Debug for ViewCandidate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ViewCandidate")
            .field("rank", &self.rank)
            .field("view", &self.view.meta().name)
            .field("phash", &self.phash)
            .finish()
    }
}

/// An ordered collection of competing views occupying one lookup slot.
#[derive(Clone)]
pub struct MultiView {
    name: String,
    views: Vec<ViewCandidate>,
    media_views: HashMap<String, Vec<ViewCandidate>>,
    accepts: Vec<String>,
}

impl MultiView {
    /// An empty multi-view for the named slot.
    pub fn new(name: impl Into<String>) -> Self {
        MultiView {
            name: name.into(),
            views: Vec::new(),
            media_views: HashMap::new(),
            accepts: Vec::new(),
        }
    }

    /// The slot name (used in not-found diagnostics).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The global candidate list, ascending by rank.
    pub fn views(&self) -> &[ViewCandidate] {
        &self.views
    }

    /// The media-type sublists.
    pub fn media_views(&self) -> &HashMap<String, Vec<ViewCandidate>> {
        &self.media_views
    }

    /// Registered media types, in registration order.
    pub fn accepts(&self) -> &[String] {
        &self.accepts
    }

    /// Inserts a candidate, maintaining ascending rank order in the relevant
    /// list.
    ///
    /// A candidate sharing the phash of an existing entry replaces it in
    /// place — that is "the same logical view, re-registered". Otherwise the
    /// candidate is inserted *before* any entries of equal rank, so among
    /// equally specific registrations the most recent is tried first.
    pub fn add(
        &mut self,
        view: ViewHandle,
        rank: u32,
        media_type: Option<&str>,
        phash: Option<Phash>,
    ) {
        let candidate = ViewCandidate { rank, view, phash };

        let list = match media_type {
            // Wildcard media types are not negotiable offers.
            Some(media) if !media.contains('*') => {
                let media = media.to_ascii_lowercase();
                if !self.accepts.contains(&media) {
                    self.accepts.push(media.clone());
                }
                self.media_views.entry(media).or_default()
            }
            _ => &mut self.views,
        };

        if let Some(phash) = &candidate.phash {
            if let Some(existing) = list
                .iter_mut()
                .find(|entry| entry.phash.as_ref() == Some(phash))
            {
                *existing = candidate;
                return;
            }
        }

        let position = list
            .iter()
            .position(|entry| entry.rank >= candidate.rank)
            .unwrap_or(list.len());
        list.insert(position, candidate);
    }

    /// The candidate sequence to try for this request.
    ///
    /// Without content negotiation (no Accept header, or no registered media
    /// types) this is the global list. Otherwise the best-matching media
    /// type's sublist is tried before the global list; no match falls back to
    /// the global list alone.
    pub fn get_views(&self, request: &Request) -> Vec<&ViewCandidate> {
        let accept = match request.accept() {
            Some(accept) if !self.accepts.is_empty() => accept,
            _ => return self.views.iter().collect(),
        };

        match accept.best_match(&self.accepts) {
            Some(media) => {
                let sublist = self
                    .media_views
                    .get(&media)
                    .map(Vec::as_slice)
                    .unwrap_or_default();
                sublist.iter().chain(self.views.iter()).collect()
            }
            None => self.views.iter().collect(),
        }
    }

    /// The first candidate whose predicate side channel passes. A candidate
    /// without the channel always matches.
    pub fn match_view(
        &self,
        context: Option<&dyn Resource>,
        request: &Request,
    ) -> Result<&ViewHandle, DispatchError> {
        for candidate in self.get_views(request) {
            if candidate.view.predicated(context, request) {
                return Ok(&candidate.view);
            }
        }
        Err(DispatchError::not_found(self.name.clone()))
    }

    /// Ordered dispatch: invoke candidates until one does not signal a
    /// predicate mismatch.
    ///
    /// A `NotFound` raised *by* a candidate view propagates directly — only
    /// the mismatch signal falls through to the next candidate.
    pub fn call(
        &self,
        context: Option<&dyn Resource>,
        request: &Request,
    ) -> Result<ViewOutput, DispatchError> {
        for candidate in self.get_views(request) {
            match candidate.view.call(context, request) {
                Err(error) if error.is_predicate_mismatch() => continue,
                other => return other,
            }
        }
        Err(DispatchError::not_found(self.name.clone()))
    }

    /// Authorization pre-check of the matching candidate.
    pub fn permitted(
        &self,
        context: Option<&dyn Resource>,
        request: &Request,
    ) -> Result<bool, DispatchError> {
        let view = self.match_view(context, request)?;
        view.permitted(context, request)
    }

    /// Invokes the matching candidate through its permissive channel.
    pub fn call_permissive(
        &self,
        context: Option<&dyn Resource>,
        request: &Request,
    ) -> Result<ViewOutput, DispatchError> {
        let view = self.match_view(context, request)?;
        view.call_permissive(context, request)
    }
}

impl fmt::Debug for MultiView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MultiView")
            .field("name", &self.name)
            .field("views", &self.views.len())
            .field("accepts", &self.accepts)
            .finish()
    }
}

/// What occupies a view slot in the registry: a single view, or a merged
/// multi-view.
#[derive(Clone)]
pub enum RegisteredView {
    /// One registration owns the slot.
    Single(ViewHandle),
    /// Competing registrations, dispatched by predicate.
    Multi(MultiView),
}

impl RegisteredView {
    /// Invokes the registration for this context/request pair.
    pub fn invoke(
        &self,
        context: Option<&dyn Resource>,
        request: &Request,
    ) -> Result<ViewOutput, DispatchError> {
        match self {
            RegisteredView::Single(view) => view.call(context, request),
            RegisteredView::Multi(multi) => multi.call(context, request),
        }
    }

    /// Authorization pre-check.
    pub fn permitted(
        &self,
        context: Option<&dyn Resource>,
        request: &Request,
    ) -> Result<bool, DispatchError> {
        match self {
            RegisteredView::Single(view) => view.permitted(context, request),
            RegisteredView::Multi(multi) => multi.permitted(context, request),
        }
    }

    /// Invokes bypassing authorization.
    pub fn call_permissive(
        &self,
        context: Option<&dyn Resource>,
        request: &Request,
    ) -> Result<ViewOutput, DispatchError> {
        match self {
            RegisteredView::Single(view) => view.call_permissive(context, request),
            RegisteredView::Multi(multi) => multi.call_permissive(context, request),
        }
    }

    /// The single view, if this slot holds one.
    pub fn as_single(&self) -> Option<&ViewHandle> {
        match self {
            RegisteredView::Single(view) => Some(view),
            RegisteredView::Multi(_) => None,
        }
    }

    /// The multi-view, if this slot holds one.
    pub fn as_multi(&self) -> Option<&MultiView> {
        match self {
            RegisteredView::Multi(multi) => Some(multi),
            RegisteredView::Single(_) => None,
        }
    }
}

impl fmt::Debug for RegisteredView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegisteredView::Single(view) => f.debug_tuple("Single").field(view.meta()).finish(),
            RegisteredView::Multi(multi) => f.debug_tuple("Multi").field(&multi.name()).finish(),
        }
    }
}
