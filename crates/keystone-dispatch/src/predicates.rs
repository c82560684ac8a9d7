//! View predicates: composable boolean tests over `(context, request)`.
//!
//! Each predicate contributes three things:
//!
//! - a **match test** evaluated at dispatch time,
//! - a **weight** feeding the specificity score — registrations with more
//!   (or more specific) predicates outrank ones with fewer, and
//! - a canonical **token** feeding the predicate hash.
//!
//! The predicate hash ([`Phash`]) identifies a view's predicate *set*
//! independent of declaration order: two registrations of the same view with
//! identical predicates supplied in any order hash identically, which is how
//! re-registration is told apart from competition.
//!
//! # Specificity
//!
//! Each predicate type owns a fixed bit weight (see [`ViewPredicate::weight`]).
//! A set's score is the sum; its dispatch rank is
//! `SPECIFICITY_CEILING - score`, so a higher score sorts *first* in the
//! multi-view candidate list (ascending rank).

use crate::request::Request;
use crate::resource::{lineage_contains, Resource};
use regex::Regex;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fmt::Write as _;
use std::sync::Arc;

/// Upper bound for specificity ranks. `rank = SPECIFICITY_CEILING - score`.
pub const SPECIFICITY_CEILING: u32 = 1_000_000;

/// Custom predicate: a named boolean function. The name is part of the
/// predicate's canonical token, so it must be stable across registrations
/// that mean "the same test".
#[derive(Clone)]
pub struct CustomPredicate {
    name: String,
    test: Arc<dyn Fn(Option<&dyn Resource>, &Request) -> bool + Send + Sync>,
}

impl CustomPredicate {
    /// Creates a named custom predicate.
    pub fn new<F>(name: impl Into<String>, test: F) -> Self
    where
        F: Fn(Option<&dyn Resource>, &Request) -> bool + Send + Sync + 'static,
    {
        CustomPredicate {
            name: name.into(),
            test: Arc::new(test),
        }
    }

    /// The stable name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl fmt::Debug for CustomPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CustomPredicate")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// One view predicate.
#[derive(Debug, Clone)]
pub enum ViewPredicate {
    /// Request must (or must not) be an XHR request.
    Xhr(bool),
    /// Request method must be one of these (uppercase).
    RequestMethod(Vec<String>),
    /// Path info must match this regex (search semantics).
    PathInfo { pattern: String, regex: Regex },
    /// Parameter must be present, optionally with this exact value.
    RequestParam { name: String, value: Option<String> },
    /// Header must be present, optionally matching this regex.
    Header {
        name: String,
        pattern: Option<String>,
        regex: Option<Regex>,
    },
    /// Request must accept this media type.
    Accept(String),
    /// Context lineage must contain this type tag.
    Containment(keystone_registry::TypeTag),
    /// A named custom test.
    Custom(CustomPredicate),
}

impl ViewPredicate {
    /// Single-method predicate.
    pub fn request_method(method: &str) -> Self {
        ViewPredicate::RequestMethod(vec![method.to_ascii_uppercase()])
    }

    /// Multi-method predicate. Methods are uppercased and sorted so the
    /// canonical token is order-independent.
    pub fn request_methods<I, S>(methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut methods: Vec<String> = methods
            .into_iter()
            .map(|method| method.as_ref().to_ascii_uppercase())
            .collect();
        methods.sort();
        methods.dedup();
        ViewPredicate::RequestMethod(methods)
    }

    /// Path-info regex predicate. Fails on an invalid pattern.
    pub fn path_info(pattern: &str) -> Result<Self, regex::Error> {
        Ok(ViewPredicate::PathInfo {
            pattern: pattern.to_string(),
            regex: Regex::new(pattern)?,
        })
    }

    /// Parameter-presence predicate.
    pub fn request_param(name: &str) -> Self {
        ViewPredicate::RequestParam {
            name: name.to_string(),
            value: None,
        }
    }

    /// Parameter-value predicate.
    pub fn request_param_value(name: &str, value: &str) -> Self {
        ViewPredicate::RequestParam {
            name: name.to_string(),
            value: Some(value.to_string()),
        }
    }

    /// Header-presence predicate, or header-value when `pattern` is given.
    /// Fails on an invalid pattern.
    pub fn header(name: &str, pattern: Option<&str>) -> Result<Self, regex::Error> {
        let regex = pattern.map(Regex::new).transpose()?;
        Ok(ViewPredicate::Header {
            name: name.to_ascii_lowercase(),
            pattern: pattern.map(str::to_string),
            regex,
        })
    }

    /// Accept-media predicate.
    pub fn accept(media: &str) -> Self {
        ViewPredicate::Accept(media.to_ascii_lowercase())
    }

    /// Evaluates the predicate.
    pub fn matches(&self, context: Option<&dyn Resource>, request: &Request) -> bool {
        match self {
            ViewPredicate::Xhr(wanted) => request.is_xhr == *wanted,
            ViewPredicate::RequestMethod(methods) => methods.contains(&request.method),
            ViewPredicate::PathInfo { regex, .. } => regex.is_match(&request.path_info),
            ViewPredicate::RequestParam { name, value } => match value {
                Some(value) => request.params.get(name) == Some(value),
                None => request.params.contains_key(name),
            },
            ViewPredicate::Header { name, regex, .. } => match (request.header(name), regex) {
                (Some(found), Some(regex)) => regex.is_match(found),
                (Some(_), None) => true,
                (None, _) => false,
            },
            ViewPredicate::Accept(media) => request.accepts_media(media),
            ViewPredicate::Containment(tag) => lineage_contains(context, *tag),
            ViewPredicate::Custom(custom) => (custom.test)(context, request),
        }
    }

    /// The predicate type's specificity weight.
    pub fn weight(&self) -> u32 {
        match self {
            ViewPredicate::Xhr(_) => 1,
            ViewPredicate::RequestMethod(_) => 2,
            ViewPredicate::PathInfo { .. } => 4,
            ViewPredicate::RequestParam { .. } => 8,
            ViewPredicate::Header { .. } => 16,
            ViewPredicate::Accept(_) => 32,
            ViewPredicate::Containment(_) => 64,
            ViewPredicate::Custom(_) => 128,
        }
    }

    /// The canonical text token contributing to the phash and to stable
    /// ordering keys.
    pub fn token(&self) -> String {
        match self {
            ViewPredicate::Xhr(wanted) => format!("xhr:{wanted}"),
            ViewPredicate::RequestMethod(methods) => {
                format!("request_method:{}", methods.join(","))
            }
            ViewPredicate::PathInfo { pattern, .. } => format!("path_info:{pattern}"),
            ViewPredicate::RequestParam { name, value } => match value {
                Some(value) => format!("request_param:{name}={value}"),
                None => format!("request_param:{name}"),
            },
            ViewPredicate::Header { name, pattern, .. } => match pattern {
                Some(pattern) => format!("header:{name}:{pattern}"),
                None => format!("header:{name}"),
            },
            ViewPredicate::Accept(media) => format!("accept:{media}"),
            ViewPredicate::Containment(tag) => format!("containment:{tag}"),
            ViewPredicate::Custom(custom) => format!("custom:{}", custom.name),
        }
    }
}

/// Stable hash of a predicate set, independent of declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Phash(String);

impl Phash {
    /// The phash of an empty predicate set.
    pub fn default_phash() -> Self {
        PredicateSet::new().phash()
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Phash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An ordered collection of predicates belonging to one view registration.
#[derive(Debug, Clone, Default)]
pub struct PredicateSet {
    predicates: Vec<ViewPredicate>,
}

impl PredicateSet {
    /// An empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a predicate.
    pub fn push(&mut self, predicate: ViewPredicate) {
        self.predicates.push(predicate);
    }

    /// Number of predicates.
    pub fn len(&self) -> usize {
        self.predicates.len()
    }

    /// True when no predicates are configured.
    pub fn is_empty(&self) -> bool {
        self.predicates.is_empty()
    }

    /// The predicates in declaration order.
    pub fn predicates(&self) -> &[ViewPredicate] {
        &self.predicates
    }

    /// Evaluates every predicate; true only if all match. Evaluation order
    /// is declaration order and every predicate runs (no short-circuit), so
    /// custom predicates with observable effects behave predictably.
    pub fn check(&self, context: Option<&dyn Resource>, request: &Request) -> bool {
        let mut all = true;
        for predicate in &self.predicates {
            if !predicate.matches(context, request) {
                all = false;
            }
        }
        all
    }

    /// Total specificity score.
    pub fn score(&self) -> u32 {
        self.predicates.iter().map(ViewPredicate::weight).sum()
    }

    /// Dispatch ordering key: lower rank = more predicated = tried first.
    pub fn rank(&self) -> u32 {
        SPECIFICITY_CEILING - self.score()
    }

    /// Canonical tokens, sorted.
    pub fn tokens(&self) -> Vec<String> {
        let mut tokens: Vec<String> = self.predicates.iter().map(ViewPredicate::token).collect();
        tokens.sort();
        tokens
    }

    /// The predicate hash: SHA-256 over the sorted canonical tokens.
    pub fn phash(&self) -> Phash {
        let mut hasher = Sha256::new();
        for token in self.tokens() {
            hasher.update(token.as_bytes());
            hasher.update(b"\n");
        }
        let digest = hasher.finalize();
        let mut hex = String::with_capacity(digest.len() * 2);
        for byte in digest {
            let _ = write!(hex, "{byte:02x}");
        }
        Phash(hex)
    }
}

impl FromIterator<ViewPredicate> for PredicateSet {
    fn from_iter<I: IntoIterator<Item = ViewPredicate>>(iter: I) -> Self {
        PredicateSet {
            predicates: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::ANY_CONTEXT;
    use keystone_registry::TypeTag;
    use proptest::prelude::*;

    const DUMMY: TypeTag = TypeTag("test.dummy");

    struct Tagged;

    impl Resource for Tagged {
        fn type_tags(&self) -> Vec<TypeTag> {
            vec![DUMMY, ANY_CONTEXT]
        }
    }

    fn get() -> Request {
        Request::new("GET", "/")
    }

    #[test]
    fn test_xhr_predicate() {
        let predicate = ViewPredicate::Xhr(true);
        assert!(!predicate.matches(None, &get()));
        assert!(predicate.matches(None, &get().with_xhr(true)));
    }

    #[test]
    fn test_request_method_predicate() {
        let predicate = ViewPredicate::request_method("post");
        assert!(!predicate.matches(None, &get()));
        assert!(predicate.matches(None, &Request::new("POST", "/")));
    }

    #[test]
    fn test_request_method_sequence() {
        let predicate = ViewPredicate::request_methods(["GET", "POST"]);
        assert!(predicate.matches(None, &get()));
        assert!(predicate.matches(None, &Request::new("POST", "/")));
        assert!(!predicate.matches(None, &Request::new("HEAD", "/")));
    }

    #[test]
    fn test_path_info_predicate() {
        let predicate = ViewPredicate::path_info(r"/docs/\d+").unwrap();
        assert!(predicate.matches(None, &get().with_path_info("/docs/42")));
        assert!(!predicate.matches(None, &get().with_path_info("/docs/latest")));
    }

    #[test]
    fn test_path_info_bad_regex_errors() {
        assert!(ViewPredicate::path_info("(unclosed").is_err());
    }

    #[test]
    fn test_request_param_presence_and_value() {
        let presence = ViewPredicate::request_param("abc");
        assert!(!presence.matches(None, &get()));
        assert!(presence.matches(None, &get().with_param("abc", "")));

        let value = ViewPredicate::request_param_value("abc", "123");
        assert!(!value.matches(None, &get().with_param("abc", "456")));
        assert!(value.matches(None, &get().with_param("abc", "123")));
    }

    #[test]
    fn test_header_presence_and_regex() {
        let presence = ViewPredicate::header("X-Thing", None).unwrap();
        assert!(!presence.matches(None, &get()));
        assert!(presence.matches(None, &get().with_header("X-Thing", "anything")));

        let valued = ViewPredicate::header("X-Thing", Some(r"\d+")).unwrap();
        assert!(valued.matches(None, &get().with_header("X-Thing", "v123")));
        assert!(!valued.matches(None, &get().with_header("X-Thing", "nope")));
        assert!(!valued.matches(None, &get()));
    }

    #[test]
    fn test_header_bad_regex_errors() {
        assert!(ViewPredicate::header("X-Thing", Some("(unclosed")).is_err());
    }

    #[test]
    fn test_accept_predicate() {
        let predicate = ViewPredicate::accept("text/html");
        assert!(predicate.matches(None, &get().with_header("Accept", "text/html")));
        assert!(!predicate.matches(None, &get().with_header("Accept", "image/png")));
        // No accept header accepts everything.
        assert!(predicate.matches(None, &get()));
    }

    #[test]
    fn test_containment_predicate() {
        let predicate = ViewPredicate::Containment(DUMMY);
        assert!(!predicate.matches(None, &get()));
        assert!(predicate.matches(Some(&Tagged), &get()));
    }

    #[test]
    fn test_custom_predicate() {
        let predicate = ViewPredicate::Custom(CustomPredicate::new("is_post", |_, request| {
            request.method == "POST"
        }));
        assert!(!predicate.matches(None, &get()));
        assert!(predicate.matches(None, &Request::new("POST", "/")));
        assert_eq!(predicate.token(), "custom:is_post");
    }

    #[test]
    fn test_set_check_requires_all() {
        let set: PredicateSet = [
            ViewPredicate::request_method("POST"),
            ViewPredicate::request_param("abc"),
        ]
        .into_iter()
        .collect();

        assert!(set.check(None, &Request::new("POST", "/").with_param("abc", "1")));
        assert!(!set.check(None, &Request::new("POST", "/")));
        assert!(!set.check(None, &get().with_param("abc", "1")));
    }

    #[test]
    fn test_empty_set_always_matches() {
        assert!(PredicateSet::new().check(None, &get()));
        assert_eq!(PredicateSet::new().score(), 0);
        assert_eq!(PredicateSet::new().rank(), SPECIFICITY_CEILING);
    }

    #[test]
    fn test_more_predicates_rank_first() {
        let one: PredicateSet = [ViewPredicate::request_method("GET")].into_iter().collect();
        let two: PredicateSet = [
            ViewPredicate::request_method("GET"),
            ViewPredicate::Xhr(true),
        ]
        .into_iter()
        .collect();
        assert!(two.rank() < one.rank());
    }

    #[test]
    fn test_custom_outweighs_standard() {
        let custom: PredicateSet = [ViewPredicate::Custom(CustomPredicate::new(
            "always",
            |_, _| true,
        ))]
        .into_iter()
        .collect();
        let standard: PredicateSet =
            [ViewPredicate::request_method("GET")].into_iter().collect();
        assert!(custom.rank() < standard.rank());
    }

    #[test]
    fn test_phash_is_order_independent() {
        let forward: PredicateSet = [
            ViewPredicate::request_method("POST"),
            ViewPredicate::request_param_value("abc", "1"),
        ]
        .into_iter()
        .collect();
        let reversed: PredicateSet = [
            ViewPredicate::request_param_value("abc", "1"),
            ViewPredicate::request_method("POST"),
        ]
        .into_iter()
        .collect();
        assert_eq!(forward.phash(), reversed.phash());
    }

    #[test]
    fn test_phash_differs_on_value_change() {
        let one: PredicateSet = [ViewPredicate::request_param_value("abc", "1")]
            .into_iter()
            .collect();
        let two: PredicateSet = [ViewPredicate::request_param_value("abc", "2")]
            .into_iter()
            .collect();
        assert_ne!(one.phash(), two.phash());
    }

    #[test]
    fn test_default_phash_is_empty_set_phash() {
        assert_eq!(Phash::default_phash(), PredicateSet::new().phash());
        assert_ne!(
            Phash::default_phash(),
            PredicateSet::from_iter([ViewPredicate::Xhr(true)]).phash()
        );
    }

    #[test]
    fn test_method_sequence_token_is_canonical() {
        let forward = ViewPredicate::request_methods(["POST", "GET"]);
        let reversed = ViewPredicate::request_methods(["GET", "POST"]);
        assert_eq!(forward.token(), reversed.token());
        assert_eq!(forward.token(), "request_method:GET,POST");
    }

    proptest! {
        // Shuffling a predicate set never changes its phash.
        #[test]
        fn prop_phash_invariant_under_permutation(
            methods in proptest::collection::vec("[A-Z]{3,6}", 1..3),
            params in proptest::collection::vec(("[a-z]{1,8}", "[a-z0-9]{0,4}"), 0..4),
            seed in any::<u64>(),
        ) {
            let mut predicates: Vec<ViewPredicate> = Vec::new();
            predicates.push(ViewPredicate::request_methods(methods));
            for (name, value) in &params {
                predicates.push(ViewPredicate::request_param_value(name, value));
            }

            let original: PredicateSet = predicates.iter().cloned().collect();

            // Deterministic shuffle driven by the seed.
            let mut shuffled = predicates;
            let mut state = seed;
            for i in (1..shuffled.len()).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state % (i as u64 + 1)) as usize;
                shuffled.swap(i, j);
            }
            let shuffled: PredicateSet = shuffled.into_iter().collect();

            prop_assert_eq!(original.phash(), shuffled.phash());
        }

        // Rank is monotone: adding a predicate never raises the rank.
        #[test]
        fn prop_rank_monotone_in_predicates(count in 0usize..6) {
            let mut set = PredicateSet::new();
            let mut previous = set.rank();
            for i in 0..count {
                set.push(ViewPredicate::request_param(&format!("p{i}")));
                let rank = set.rank();
                prop_assert!(rank < previous);
                previous = rank;
            }
        }
    }
}
