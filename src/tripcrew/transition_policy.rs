//! The directed graph of permitted speaker transitions.
//!
//! A [`TransitionPolicy`] says, for each role, which roles may speak immediately after it. It
//! also designates the initiator (who receives the triggering message and speaks first), the
//! aggregator (whose last reply is the session result) and the round budget. Successor lists are
//! kept in the order they were declared; that order is what
//! [`DeclaredOrder`](crate::selector::DeclaredOrder) uses as its tie-break.
//!
//! Policies are validated against a [`RoleRegistry`] when built and are immutable afterwards, so
//! an illegal sequence of speakers cannot be produced at runtime. The initiator and every role
//! that can be handed the turn must have a successor, except the aggregator: a plain pipeline
//! `A -> B -> C` with aggregator `C` is valid, and the session ends once `C` has spoken.
//!
//! # Example
//!
//! ```
//! use tripcrew::role::{Role, RoleRegistry};
//! use tripcrew::transition_policy::TransitionPolicy;
//!
//! let mut registry = RoleRegistry::new();
//! for name in ["A", "B"] {
//!     registry.register(Role::from_fn(name, "", |_| Ok("ok".into()))).unwrap();
//! }
//!
//! let policy = TransitionPolicy::builder()
//!     .allow("A", ["B"])
//!     .allow("B", ["A"])
//!     .initiator("A")
//!     .aggregator("B")
//!     .max_rounds(4)
//!     .build(&registry)
//!     .unwrap();
//!
//! assert!(policy.is_allowed("A", "B"));
//! assert!(!policy.is_allowed("A", "A"));
//! assert_eq!(policy.allowed_next("B"), ["A".to_string()]);
//! ```

use crate::error::ConfigurationError;
use crate::role::RoleRegistry;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, Default)]
struct Successors {
    ordered: Vec<String>,
    set: HashSet<String>,
}

/// Validated, immutable transition graph plus session bounds.
#[derive(Debug, Clone)]
pub struct TransitionPolicy {
    edges: HashMap<String, Successors>,
    initiator: String,
    aggregator: String,
    max_rounds: usize,
}

impl TransitionPolicy {
    pub fn builder() -> TransitionPolicyBuilder {
        TransitionPolicyBuilder::default()
    }

    /// Roles permitted to speak right after `current`, in declared order.
    pub fn allowed_next(&self, current: &str) -> &[String] {
        self.edges
            .get(current)
            .map(|s| s.ordered.as_slice())
            .unwrap_or(&[])
    }

    pub fn is_allowed(&self, from: &str, to: &str) -> bool {
        self.edges
            .get(from)
            .map(|s| s.set.contains(to))
            .unwrap_or(false)
    }

    pub fn initiator(&self) -> &str {
        &self.initiator
    }

    pub fn aggregator(&self) -> &str {
        &self.aggregator
    }

    pub fn max_rounds(&self) -> usize {
        self.max_rounds
    }

    /// Every role name the policy refers to, sorted and without duplicates.
    pub fn roles(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .edges
            .iter()
            .flat_map(|(from, s)| std::iter::once(from.as_str()).chain(s.ordered.iter().map(String::as_str)))
            .chain([self.initiator.as_str(), self.aggregator.as_str()])
            .collect();
        names.sort_unstable();
        names.dedup();
        names
    }

    /// Whether `speakers` starts at the initiator and only takes permitted transitions.
    /// An empty sequence is trivially valid.
    pub fn is_valid_walk<S: AsRef<str>>(&self, speakers: &[S]) -> bool {
        match speakers.first() {
            None => true,
            Some(first) if first.as_ref() != self.initiator => false,
            Some(_) => speakers
                .windows(2)
                .all(|pair| self.is_allowed(pair[0].as_ref(), pair[1].as_ref())),
        }
    }
}

/// Builder for [`TransitionPolicy`]. Nothing is checked until [`build`](Self::build).
#[derive(Debug, Clone, Default)]
pub struct TransitionPolicyBuilder {
    edges: Vec<(String, Vec<String>)>,
    initiator: Option<String>,
    aggregator: Option<String>,
    max_rounds: usize,
}

impl TransitionPolicyBuilder {
    /// Permit each role in `successors` to speak right after `from`. Repeated calls for the same
    /// source append to its list; duplicates are ignored.
    pub fn allow<I, S>(mut self, from: impl Into<String>, successors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let from = from.into();
        let position = match self.edges.iter().position(|(src, _)| *src == from) {
            Some(position) => position,
            None => {
                self.edges.push((from, Vec::new()));
                self.edges.len() - 1
            }
        };
        let targets = &mut self.edges[position].1;
        for successor in successors {
            let successor = successor.into();
            if !targets.contains(&successor) {
                targets.push(successor);
            }
        }
        self
    }

    pub fn initiator(mut self, name: impl Into<String>) -> Self {
        self.initiator = Some(name.into());
        self
    }

    pub fn aggregator(mut self, name: impl Into<String>) -> Self {
        self.aggregator = Some(name.into());
        self
    }

    pub fn max_rounds(mut self, rounds: usize) -> Self {
        self.max_rounds = rounds;
        self
    }

    /// Validate against `registry` and freeze the policy.
    pub fn build(self, registry: &RoleRegistry) -> Result<TransitionPolicy, ConfigurationError> {
        if registry.is_empty() {
            return Err(ConfigurationError::EmptyRegistry);
        }
        let initiator = self.initiator.ok_or(ConfigurationError::MissingInitiator)?;
        let aggregator = self.aggregator.ok_or(ConfigurationError::MissingAggregator)?;
        if self.max_rounds == 0 {
            return Err(ConfigurationError::InvalidRoundLimit(0));
        }

        let require = |name: &str, context: String| {
            if registry.contains(name) {
                Ok(())
            } else {
                Err(ConfigurationError::UnknownRole {
                    context,
                    name: name.to_string(),
                })
            }
        };
        require(initiator.as_str(), "initiator".to_string())?;
        require(aggregator.as_str(), "aggregator".to_string())?;
        for (from, targets) in &self.edges {
            require(from.as_str(), "transition source".to_string())?;
            for to in targets {
                require(to.as_str(), format!("successor of {}", from))?;
            }
        }

        let edges: HashMap<String, Successors> = self
            .edges
            .into_iter()
            .map(|(from, ordered)| {
                let set = ordered.iter().cloned().collect();
                (from, Successors { ordered, set })
            })
            .collect();

        // The initiator and every edge target can become the current speaker, so each of them
        // needs somewhere to go next. The aggregator may be a sink: the conversation ends there.
        let has_exit = |name: &str| edges.get(name).map_or(false, |s| !s.ordered.is_empty());
        if !has_exit(initiator.as_str()) {
            return Err(ConfigurationError::DeadEnd(initiator));
        }
        let mut targets: Vec<&String> = edges
            .values()
            .flat_map(|s| s.ordered.iter())
            .filter(|t| **t != aggregator)
            .collect();
        targets.sort();
        if let Some(dead) = targets.into_iter().find(|t| !has_exit(t.as_str())) {
            return Err(ConfigurationError::DeadEnd(dead.clone()));
        }

        Ok(TransitionPolicy {
            edges,
            initiator,
            aggregator,
            max_rounds: self.max_rounds,
        })
    }
}
