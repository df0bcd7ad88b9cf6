//! Crew configuration loaded from JSON.
//!
//! A [`CrewConfig`] describes the role registry and the transition policy of a crew. It carries
//! no backend handles: [`CrewConfig::build`] takes a factory that turns each [`RoleConfig`] into
//! a [`Capability`], so the same file can run against OpenAI in production and against scripted
//! capabilities in tests. Every check happens in `build`, before a session can be constructed.
//!
//! ```json
//! {
//!   "roles": [
//!     {"name": "A", "instructions": "Ask for a plan."},
//!     {"name": "B", "instructions": "Write the plan.", "model": "gpt-4o"}
//!   ],
//!   "transitions": {"A": ["B"], "B": ["A"]},
//!   "initiator": "A",
//!   "aggregator": "B",
//!   "max_rounds": 4,
//!   "retry": {"max_attempts": 2, "turn_timeout_secs": 30}
//! }
//! ```
//!
//! Optional keys:
//! - `retry`: each field defaults to [`RetryPolicy::default`].
//! - `selector`: `"declared"`, `"priority"` or `"llm"`. Absent means `"priority"` when a
//!   `priority` list is given and `"declared"` otherwise. `"llm"` needs a backend client, passed
//!   to [`CrewConfig::build_with_selector_client`].
//! - `priority`: the ranking used by the [`FixedPriority`] tie-break.
//! - `stop_marker`: ends the session when a reply contains the marker, instead of when the
//!   aggregator speaks.

use crate::client_wrapper::ClientWrapper;
use crate::error::ConfigurationError;
use crate::role::{Capability, Role, RoleRegistry};
use crate::scheduler::RetryPolicy;
use crate::selector::{FixedPriority, LlmSelector};
use crate::session::SessionDriver;
use crate::stop_condition::KeywordStop;
use crate::transition_policy::TransitionPolicy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// One entry of the role registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleConfig {
    pub name: String,
    pub instructions: String,
    /// Backend model override for this role.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Per-turn retry settings. Missing fields take the [`RetryPolicy`] defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub turn_timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig::from(&RetryPolicy::default())
    }
}

impl From<&RetryPolicy> for RetryConfig {
    fn from(policy: &RetryPolicy) -> Self {
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            turn_timeout_secs: policy.turn_timeout.as_secs(),
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
            turn_timeout: Duration::from_secs(config.turn_timeout_secs),
        }
    }
}

/// Which tie-break chooses among several permitted speakers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    Declared,
    Priority,
    Llm,
}

impl FromStr for SelectorKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "declared" => Ok(SelectorKind::Declared),
            "priority" => Ok(SelectorKind::Priority),
            "llm" => Ok(SelectorKind::Llm),
            other => Err(ConfigurationError::InvalidSelector(format!(
                "unknown selector '{}', expected declared, priority or llm",
                other
            ))),
        }
    }
}

/// A complete crew definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrewConfig {
    pub roles: Vec<RoleConfig>,
    /// Source role → permitted successors, in tie-break order.
    pub transitions: BTreeMap<String, Vec<String>>,
    pub initiator: Option<String>,
    pub aggregator: Option<String>,
    pub max_rounds: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry: Option<RetryConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selector: Option<SelectorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_marker: Option<String>,
}

impl CrewConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        serde_json::from_str(json).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigurationError::Io(format!("{}: {}", path.display(), e)))?;
        Self::from_json_str(&contents)
    }

    pub fn to_json_pretty(&self) -> Result<String, ConfigurationError> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigurationError::Parse(e.to_string()))
    }

    fn retry_policy(&self) -> RetryPolicy {
        self.retry
            .as_ref()
            .map(RetryPolicy::from)
            .unwrap_or_default()
    }

    /// Validate the definition and produce the registry and policy.
    pub fn build_parts<F>(
        &self,
        backend: F,
    ) -> Result<(RoleRegistry, TransitionPolicy), ConfigurationError>
    where
        F: Fn(&RoleConfig) -> Arc<dyn Capability>,
    {
        let mut registry = RoleRegistry::new();
        for role in &self.roles {
            registry.register(Role::new(
                role.name.clone(),
                role.instructions.clone(),
                backend(role),
            ))?;
        }

        if self.max_rounds <= 0 {
            return Err(ConfigurationError::InvalidRoundLimit(self.max_rounds));
        }

        let mut builder = TransitionPolicy::builder().max_rounds(self.max_rounds as usize);
        if let Some(initiator) = &self.initiator {
            builder = builder.initiator(initiator.clone());
        }
        if let Some(aggregator) = &self.aggregator {
            builder = builder.aggregator(aggregator.clone());
        }
        for (from, successors) in &self.transitions {
            builder = builder.allow(from.clone(), successors.iter().cloned());
        }
        let policy = builder.build(&registry)?;
        Ok((registry, policy))
    }

    /// The selector in effect once the `priority` shorthand is taken into account.
    pub fn selector_kind(&self) -> SelectorKind {
        match (self.selector, &self.priority) {
            (Some(kind), _) => kind,
            (None, Some(_)) => SelectorKind::Priority,
            (None, None) => SelectorKind::Declared,
        }
    }

    /// Validate the definition and produce a ready-to-run driver.
    ///
    /// Fails with [`ConfigurationError::InvalidSelector`] when the definition asks for the
    /// `"llm"` selector; use [`build_with_selector_client`](Self::build_with_selector_client).
    pub fn build<F>(&self, backend: F) -> Result<SessionDriver, ConfigurationError>
    where
        F: Fn(&RoleConfig) -> Arc<dyn Capability>,
    {
        self.build_with_selector_client(backend, None)
    }

    /// Like [`build`](Self::build), with `selector_client` backing the `"llm"` selector.
    /// The client is ignored by the other selectors.
    pub fn build_with_selector_client<F>(
        &self,
        backend: F,
        selector_client: Option<Arc<dyn ClientWrapper>>,
    ) -> Result<SessionDriver, ConfigurationError>
    where
        F: Fn(&RoleConfig) -> Arc<dyn Capability>,
    {
        let (registry, policy) = self.build_parts(backend)?;
        let mut driver =
            SessionDriver::new(registry, policy)?.with_retry_policy(self.retry_policy());
        match (self.selector_kind(), &self.priority) {
            (SelectorKind::Priority, Some(priority)) => {
                driver =
                    driver.with_selector(Arc::new(FixedPriority::new(priority.iter().cloned())))?;
            }
            (SelectorKind::Priority, None) => {
                return Err(ConfigurationError::InvalidSelector(
                    "the priority selector needs a `priority` ranking".to_string(),
                ));
            }
            (kind, Some(_)) => {
                return Err(ConfigurationError::InvalidSelector(format!(
                    "`priority` has no effect with the {:?} selector",
                    kind
                )));
            }
            (SelectorKind::Llm, None) => {
                let client = selector_client.ok_or_else(|| {
                    ConfigurationError::InvalidSelector(
                        "the llm selector needs a backend client".to_string(),
                    )
                })?;
                driver = driver.with_selector(Arc::new(LlmSelector::new(client)))?;
            }
            (SelectorKind::Declared, None) => {}
        }
        if let Some(marker) = &self.stop_marker {
            driver = driver.with_stop_condition(Arc::new(KeywordStop::new(marker.clone())));
        }
        Ok(driver)
    }
}
