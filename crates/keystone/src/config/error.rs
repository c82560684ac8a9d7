//! Configuration error taxonomy.
//!
//! Three families:
//!
//! - [`ConflictError`] — commit-time conflict resolution failed; carries the
//!   full grouped provenance so every competing registration can be reported.
//!   Never raised under autocommit (there is no deferred resolution to fail).
//! - [`ConfigError::Execution`] — a winning action's callable failed while
//!   executing. Wraps the original error and the action's provenance string.
//!   Execution halts; effects already applied stay applied.
//! - The remaining [`ConfigError`] variants — raised synchronously by the
//!   registration calls themselves for malformed input.

use crate::config::actions::Discriminator;
use std::fmt;
use thiserror::Error;

/// One unresolved discriminator group.
#[derive(Debug, Clone)]
pub struct ConflictGroup {
    /// The contested discriminator.
    pub discriminator: Discriminator,
    /// Provenance (`info`) of every competing registration, in declaration
    /// order.
    pub registrations: Vec<String>,
}

/// Commit-time conflict failure carrying every unresolved group.
#[derive(Debug, Clone)]
pub struct ConflictError {
    /// Unresolved groups, in first-seen discriminator order.
    pub conflicts: Vec<ConflictGroup>,
}

impl std::error::Error for ConflictError {}

impl fmt::Display for ConflictError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Conflicting configuration actions")?;
        for group in &self.conflicts {
            writeln!(f, "  For: {}", group.discriminator)?;
            for registration in &group.registrations {
                writeln!(f, "    {registration}")?;
            }
        }
        Ok(())
    }
}

/// Errors raised while configuring.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Conflict resolution failed at commit time.
    #[error(transparent)]
    Conflict(#[from] ConflictError),

    /// A winning action's callable failed during execution. No rollback:
    /// effects applied by earlier actions remain in place.
    #[error("error executing configuration action ({info}): {source}")]
    Execution {
        /// Provenance of the failing action.
        info: String,
        /// The original failure.
        #[source]
        source: Box<ConfigError>,
    },

    /// `add_view` needs a view callable or at least a renderer.
    #[error("a view callable or a renderer is required")]
    MissingView,

    /// A header or path-info predicate pattern did not compile.
    #[error("invalid {kind} pattern {pattern:?}: {source}")]
    BadRegex {
        /// Which predicate the pattern belonged to.
        kind: &'static str,
        /// The offending pattern.
        pattern: String,
        /// The regex compiler's complaint.
        #[source]
        source: regex::Error,
    },

    /// An http_cache value had the wrong shape.
    #[error("malformed http_cache value: {0}")]
    MalformedHttpCache(String),

    /// A request-type marker was neither the base request tag nor a
    /// route-request tag.
    #[error("unsupported request type marker {0:?}")]
    UnsupportedRequestType(String),

    /// A view referenced a route that was never added.
    #[error("no route named {0:?} found")]
    NoSuchRoute(String),

    /// A view referenced a renderer factory that was never registered.
    #[error("no renderer factory named {0:?}")]
    NoSuchRenderer(String),

    /// A directive name collides with a built-in configurator method.
    #[error("directive name {0:?} collides with a built-in configurator method")]
    DirectiveCollision(String),

    /// A directive was invoked that was never added.
    #[error("no directive named {0:?}")]
    UnknownDirective(String),

    /// An authorization policy was configured without an authentication
    /// policy.
    #[error("cannot configure an authorization policy without an authentication policy")]
    AuthorizationRequiresAuthentication,

    /// A settings source failed to parse.
    #[error("settings error: {0}")]
    Settings(String),

    /// Anything else raised by user-supplied configuration code.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl ConfigError {
    /// Wraps an error as an execution failure tagged with the action's
    /// provenance.
    pub fn execution(info: impl Into<String>, source: ConfigError) -> Self {
        ConfigError::Execution {
            info: info.into(),
            source: Box::new(source),
        }
    }

    /// Returns true for commit-time conflicts.
    pub fn is_conflict(&self) -> bool {
        matches!(self, ConfigError::Conflict(_))
    }

    /// Returns true for action execution failures.
    pub fn is_execution(&self) -> bool {
        matches!(self, ConfigError::Execution { .. })
    }

    /// The conflict payload, when this is a conflict.
    pub fn conflicts(&self) -> Option<&ConflictError> {
        match self {
            ConfigError::Conflict(conflicts) => Some(conflicts),
            _ => None,
        }
    }
}
