//! Tie-break policies for choosing among several permitted speakers.
//!
//! When the transition policy allows exactly one successor the scheduler takes it without
//! consulting a selector. Otherwise the configured [`SelectorPolicy`] decides, and the scheduler
//! rejects any answer outside the candidate set.
//!
//! - [`DeclaredOrder`] (default): the first candidate as declared in the policy.
//! - [`FixedPriority`]: an explicit ranking of role names.
//! - [`LlmSelector`]: asks a backend to name the next speaker, falling back to declared order.

use crate::client_wrapper::{ClientWrapper, Message, MessageRole};
use crate::error::{ConfigurationError, SpeakerInvocationError};
use crate::role::{Role, RoleRegistry};
use crate::transcript::Transcript;
use async_trait::async_trait;
use std::sync::Arc;

/// Chooses the next speaker from a non-empty candidate list.
///
/// `candidates` is ordered as declared in the transition policy.
#[async_trait]
pub trait SelectorPolicy: Send + Sync {
    async fn select(
        &self,
        candidates: &[Arc<Role>],
        transcript: &Transcript,
    ) -> Result<Arc<Role>, SpeakerInvocationError>;

    /// Short label used in logs and events.
    fn name(&self) -> &str;

    /// Check any role names the selector refers to. Called once when a driver is built.
    fn validate(&self, _registry: &RoleRegistry) -> Result<(), ConfigurationError> {
        Ok(())
    }
}

fn first_candidate(candidates: &[Arc<Role>]) -> Result<Arc<Role>, SpeakerInvocationError> {
    candidates
        .first()
        .cloned()
        .ok_or_else(|| SpeakerInvocationError::Selection("no candidate speakers".to_string()))
}

/// Pick the first permitted successor in declaration order.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclaredOrder;

#[async_trait]
impl SelectorPolicy for DeclaredOrder {
    async fn select(
        &self,
        candidates: &[Arc<Role>],
        _transcript: &Transcript,
    ) -> Result<Arc<Role>, SpeakerInvocationError> {
        first_candidate(candidates)
    }

    fn name(&self) -> &str {
        "DeclaredOrder"
    }
}

/// Pick the candidate ranked highest in an explicit priority list.
///
/// Candidates missing from the list rank below every listed one and keep their declared order.
///
/// ```
/// use tripcrew::selector::FixedPriority;
///
/// let priority = FixedPriority::new(["Report_Writer_Agent", "User_Proxy_Agent"]);
/// assert_eq!(priority.ranking().len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct FixedPriority {
    ranking: Vec<String>,
}

impl FixedPriority {
    pub fn new<I, S>(ranking: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ranking: ranking.into_iter().map(Into::into).collect(),
        }
    }

    pub fn ranking(&self) -> &[String] {
        &self.ranking
    }

    fn rank_of(&self, name: &str) -> usize {
        self.ranking
            .iter()
            .position(|r| r == name)
            .unwrap_or(self.ranking.len())
    }
}

#[async_trait]
impl SelectorPolicy for FixedPriority {
    async fn select(
        &self,
        candidates: &[Arc<Role>],
        _transcript: &Transcript,
    ) -> Result<Arc<Role>, SpeakerInvocationError> {
        // min_by_key keeps the first of equal keys, preserving declared order among ties.
        candidates
            .iter()
            .min_by_key(|role| self.rank_of(role.name()))
            .cloned()
            .ok_or_else(|| SpeakerInvocationError::Selection("no candidate speakers".to_string()))
    }

    fn name(&self) -> &str {
        "FixedPriority"
    }

    fn validate(&self, registry: &RoleRegistry) -> Result<(), ConfigurationError> {
        match self.ranking.iter().find(|name| !registry.contains(name.as_str())) {
            Some(name) => Err(ConfigurationError::UnknownRole {
                context: "selector priority".to_string(),
                name: name.clone(),
            }),
            None => Ok(()),
        }
    }
}

/// Let a model decide who speaks next, constrained to the permitted candidates.
///
/// The backend sees the recent transcript and the candidate names and is asked for a single
/// name. The reply is matched exactly first, then by case-insensitive containment (longest name
/// wins). A reply naming no candidate, or a failing backend, falls back to declared order, so
/// the result is always a permitted speaker.
pub struct LlmSelector {
    client: Arc<dyn ClientWrapper>,
    context_window: usize,
}

impl LlmSelector {
    pub fn new(client: Arc<dyn ClientWrapper>) -> Self {
        Self {
            client,
            context_window: 8,
        }
    }

    /// Number of most recent transcript entries shown to the model (default 8).
    pub fn with_context_window(mut self, entries: usize) -> Self {
        self.context_window = entries;
        self
    }

    fn build_prompt(&self, candidates: &[Arc<Role>], transcript: &Transcript) -> Vec<Message> {
        let names = candidates
            .iter()
            .map(|r| r.name())
            .collect::<Vec<_>>()
            .join(", ");
        let mut conversation = String::new();
        let skip = transcript.len().saturating_sub(self.context_window);
        for entry in transcript.iter().skip(skip) {
            conversation.push_str(&format!("[{}]: {}\n", entry.speaker(), entry.content()));
        }
        vec![
            Message::new(
                MessageRole::System,
                "You coordinate a group conversation. Choose which participant should speak next.",
            ),
            Message::new(
                MessageRole::User,
                format!(
                    "{}\nAvailable participants: {}\n\nRespond with ONLY the participant name.",
                    conversation, names
                ),
            ),
        ]
    }

    /// Resolve a free-text reply to one of the candidates.
    pub fn match_reply(reply: &str, candidates: &[Arc<Role>]) -> Option<Arc<Role>> {
        let trimmed = reply.trim();
        if let Some(exact) = candidates.iter().find(|r| r.name() == trimmed) {
            return Some(Arc::clone(exact));
        }
        let lowered = trimmed.to_lowercase();
        candidates
            .iter()
            .filter(|r| lowered.contains(&r.name().to_lowercase()))
            .max_by_key(|r| r.name().len())
            .cloned()
    }
}

#[async_trait]
impl SelectorPolicy for LlmSelector {
    async fn select(
        &self,
        candidates: &[Arc<Role>],
        transcript: &Transcript,
    ) -> Result<Arc<Role>, SpeakerInvocationError> {
        let messages = self.build_prompt(candidates, transcript);
        match self.client.send_message(&messages).await {
            Ok(reply) => match Self::match_reply(&reply.content, candidates) {
                Some(role) => Ok(role),
                None => {
                    log::warn!(
                        "LlmSelector: reply {:?} names no candidate, using declared order",
                        reply.content
                    );
                    first_candidate(candidates)
                }
            },
            Err(e) => {
                log::warn!("LlmSelector: backend failed ({}), using declared order", e);
                first_candidate(candidates)
            }
        }
    }

    fn name(&self) -> &str {
        "LlmSelector"
    }
}
