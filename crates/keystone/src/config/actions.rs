//! The action ledger and the conflict resolver.
//!
//! Every configuration call turns into a pending *action*: a discriminator
//! identifying the slot being contested, a thunk that performs the actual
//! registration, and provenance for diagnostics. Under autocommit the thunk
//! runs immediately; otherwise actions accumulate in an [`ActionState`]
//! ledger and are resolved and executed in one batch at commit time.
//!
//! Conflict resolution encodes the include-depth override rule: within a
//! discriminator group, a registration wins if its include path is a strict
//! prefix of every competitor's — a registration made directly (or in a
//! shallower include) overrides one made deeper. Groups with no such winner
//! are reported together as a [`ConflictError`].

use crate::config::error::{ConfigError, ConflictError, ConflictGroup};
use crate::SharedRegistry;
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Identity of the effect an action registers. Two actions with equal
/// discriminators compete for the same slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Discriminator {
    kind: &'static str,
    parts: Vec<String>,
}

impl Discriminator {
    /// A discriminator of the given kind with identifying parts.
    pub fn new<I>(kind: &'static str, parts: I) -> Self
    where
        I: IntoIterator<Item = String>,
    {
        Discriminator {
            kind,
            parts: parts.into_iter().collect(),
        }
    }

    /// The discriminator kind (`"view"`, `"route"`, ...).
    pub fn kind(&self) -> &'static str {
        self.kind
    }

    /// The identifying parts.
    pub fn parts(&self) -> &[String] {
        &self.parts
    }
}

impl fmt::Display for Discriminator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind, self.parts.join(", "))
    }
}

/// Environment handed to action callables at execution time.
#[derive(Clone)]
pub struct ConfigEnv {
    /// The registry all effects apply to.
    pub registry: SharedRegistry,
}

/// The deferred effect of an action.
pub type ActionFn = Box<dyn FnOnce(&ConfigEnv) -> Result<(), ConfigError>>;

/// One pending configuration action.
pub struct Action {
    /// Slot identity, or `None` for unconflictable actions.
    pub discriminator: Option<Discriminator>,
    /// The effect to run. `None` records intent only (still participates in
    /// conflict detection).
    pub callable: Option<ActionFn>,
    /// Informational argument summary, for error reporting only.
    pub args: Vec<String>,
    /// Chain of nested includes that produced this action; drives override
    /// precedence.
    pub include_path: Vec<String>,
    /// Human-readable provenance for conflict diagnostics.
    pub info: String,
    /// Execution-order tie-breaker: all zero-order actions run first, in
    /// declaration order; non-zero orders run afterwards, ascending.
    pub order: i64,
    pub(crate) seq: usize,
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("discriminator", &self.discriminator)
            .field("include_path", &self.include_path)
            .field("info", &self.info)
            .field("order", &self.order)
            .finish_non_exhaustive()
    }
}

/// The append-only action ledger.
#[derive(Default)]
pub struct ActionState {
    actions: Vec<Action>,
    seen_specs: HashSet<String>,
    next_seq: usize,
}

impl ActionState {
    /// An empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one action.
    #[allow(clippy::too_many_arguments)]
    pub fn action(
        &mut self,
        discriminator: Option<Discriminator>,
        callable: Option<ActionFn>,
        args: Vec<String>,
        include_path: Vec<String>,
        info: String,
        order: i64,
    ) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.actions.push(Action {
            discriminator,
            callable,
            args,
            include_path,
            info,
            order,
            seq,
        });
    }

    /// The pending actions.
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Returns true the first time a spec is seen; false on repeats. Used by
    /// `include` to skip re-processing an already-included configuration
    /// unit. The seen-set lives as long as the ledger.
    pub fn process_spec(&mut self, spec: &str) -> bool {
        self.seen_specs.insert(spec.to_string())
    }

    /// Consumes the ledger, leaving it empty.
    pub fn take_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.actions)
    }
}

impl fmt::Debug for ActionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionState")
            .field("actions", &self.actions.len())
            .field("seen_specs", &self.seen_specs.len())
            .finish()
    }
}

/// Execution-order key: zero-order actions first in declaration order, then
/// non-zero orders ascending.
fn execution_key(action: &Action) -> (bool, i64, usize) {
    (action.order != 0, action.order, action.seq)
}

/// Resolves competing actions down to one survivor per discriminator group.
///
/// Survivors keep their original relative order, with the winner of each
/// group emitted at the group's first-seen position; actions with a non-zero
/// `order` are then moved to execute after all zero-order actions. Grouping
/// happens before that reordering. `None`-discriminator actions always
/// survive.
pub fn resolve_conflicts(actions: Vec<Action>) -> Result<Vec<Action>, ConflictError> {
    enum Slot {
        Passthrough(Action),
        Group(usize),
    }

    let mut slots: Vec<Slot> = Vec::new();
    let mut groups: Vec<Vec<Action>> = Vec::new();
    let mut group_index: HashMap<Discriminator, usize> = HashMap::new();

    for action in actions {
        match &action.discriminator {
            None => slots.push(Slot::Passthrough(action)),
            Some(discriminator) => match group_index.get(discriminator) {
                Some(&index) => groups[index].push(action),
                None => {
                    let index = groups.len();
                    group_index.insert(discriminator.clone(), index);
                    groups.push(vec![action]);
                    slots.push(Slot::Group(index));
                }
            },
        }
    }

    let mut winners: Vec<Option<Action>> = Vec::with_capacity(groups.len());
    let mut conflicts: Vec<ConflictGroup> = Vec::new();

    for mut members in groups {
        if members.len() == 1 {
            winners.push(members.pop());
            continue;
        }

        // Shortest include path sorts first; declaration order breaks ties.
        members.sort_by(|a, b| {
            a.include_path
                .cmp(&b.include_path)
                .then(a.seq.cmp(&b.seq))
        });

        let winner_path = members[0].include_path.clone();
        let overridden = members[1..].iter().all(|member| {
            member.include_path.len() > winner_path.len()
                && member.include_path[..winner_path.len()] == winner_path[..]
        });

        if overridden {
            let mut members = members.into_iter();
            winners.push(members.next());
        } else {
            let discriminator = members[0]
                .discriminator
                .clone()
                .expect("grouped actions carry a discriminator");
            let mut registrations: Vec<&Action> = members.iter().collect();
            registrations.sort_by_key(|member| member.seq);
            conflicts.push(ConflictGroup {
                discriminator,
                registrations: registrations
                    .iter()
                    .map(|member| member.info.clone())
                    .collect(),
            });
            winners.push(None);
        }
    }

    if !conflicts.is_empty() {
        return Err(ConflictError { conflicts });
    }

    let mut resolved: Vec<Action> = Vec::new();
    for slot in slots {
        match slot {
            Slot::Passthrough(action) => resolved.push(action),
            Slot::Group(index) => {
                if let Some(winner) = winners[index].take() {
                    resolved.push(winner);
                }
            }
        }
    }

    resolved.sort_by_key(execution_key);
    Ok(resolved)
}

/// Executes actions in order, wrapping any failure with the action's
/// provenance. Actions executed before the failure stay in effect; the rest
/// are abandoned.
pub fn execute_actions(actions: Vec<Action>, env: &ConfigEnv) -> Result<(), ConfigError> {
    let mut actions = actions;
    actions.sort_by_key(execution_key);
    for action in actions {
        if let Some(callable) = action.callable {
            callable(env).map_err(|error| ConfigError::execution(action.info.clone(), error))?;
        }
    }
    Ok(())
}
