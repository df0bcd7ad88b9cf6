//! Roles: the named participants of a crew.
//!
//! A [`Role`] couples a unique name and its instructions with a [`Capability`], the thing that
//! actually produces a reply. Roles hold no orchestration logic and no per-session state: every
//! turn receives the full transcript, and nothing survives between invocations except what was
//! appended to it. Roles are immutable after construction and are shared read-only (through
//! `Arc`) by every session that runs over a [`RoleRegistry`].
//!
//! # Example
//!
//! ```
//! use tripcrew::role::{Role, RoleRegistry};
//!
//! let mut registry = RoleRegistry::new();
//! registry
//!     .register(Role::from_fn("echo", "Repeat the last message.", |history| {
//!         Ok(history.last().map(|e| e.content().to_string()).unwrap_or_default())
//!     }))
//!     .unwrap();
//!
//! assert!(registry.contains("echo"));
//! assert!(registry.register(Role::from_fn("echo", "", |_| Ok(String::new()))).is_err());
//! ```

use crate::client_wrapper::{ClientWrapper, Message, MessageRole};
use crate::error::{ConfigurationError, SpeakerInvocationError};
use crate::transcript::TranscriptEntry;
use async_trait::async_trait;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::sync::Arc;

/// Reply generation for a role.
///
/// Implementations must not mutate shared state; they may fail, in which case the scheduler's
/// retry policy decides what happens next.
#[async_trait]
pub trait Capability: Send + Sync {
    /// Produce the reply of the role named `role_name` given the conversation so far.
    async fn respond(
        &self,
        role_name: &str,
        instructions: &str,
        history: &[TranscriptEntry],
    ) -> Result<String, Box<dyn Error + Send + Sync>>;
}

/// A named participant with a reply-generation capability.
pub struct Role {
    name: String,
    instructions: String,
    capability: Arc<dyn Capability>,
}

impl Role {
    pub fn new(
        name: impl Into<String>,
        instructions: impl Into<String>,
        capability: Arc<dyn Capability>,
    ) -> Self {
        Self {
            name: name.into(),
            instructions: instructions.into(),
            capability,
        }
    }

    /// A role backed by an LLM through the given client.
    pub fn llm(
        name: impl Into<String>,
        instructions: impl Into<String>,
        client: Arc<dyn ClientWrapper>,
    ) -> Self {
        Self::new(name, instructions, Arc::new(LlmCapability::new(client)))
    }

    /// A role whose replies are computed by a plain closure over the history.
    pub fn from_fn<F>(name: impl Into<String>, instructions: impl Into<String>, f: F) -> Self
    where
        F: Fn(&[TranscriptEntry]) -> Result<String, Box<dyn Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        Self::new(name, instructions, Arc::new(FnCapability::new(f)))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Ask the capability for a reply. Blank replies count as malformed output.
    pub async fn respond(
        &self,
        history: &[TranscriptEntry],
    ) -> Result<String, SpeakerInvocationError> {
        let reply = self
            .capability
            .respond(&self.name, &self.instructions, history)
            .await
            .map_err(|e| SpeakerInvocationError::backend(&self.name, e))?;

        if reply.trim().is_empty() {
            return Err(SpeakerInvocationError::EmptyReply {
                role: self.name.clone(),
            });
        }
        Ok(reply)
    }
}

impl fmt::Debug for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Role")
            .field("name", &self.name)
            .field("instructions_len", &self.instructions.len())
            .finish()
    }
}

/// Capability that forwards the transcript to a [`ClientWrapper`].
///
/// The role's instructions become the system message. The role's own earlier turns are sent as
/// `assistant` messages and every other turn as a `user` message prefixed with `[speaker]: `.
pub struct LlmCapability {
    client: Arc<dyn ClientWrapper>,
}

impl LlmCapability {
    pub fn new(client: Arc<dyn ClientWrapper>) -> Self {
        Self { client }
    }

    /// Build the message array sent to the backend for `role_name`'s turn.
    pub fn build_messages(
        role_name: &str,
        instructions: &str,
        history: &[TranscriptEntry],
    ) -> Vec<Message> {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(Message::new(MessageRole::System, instructions));
        for entry in history {
            if entry.speaker() == role_name {
                messages.push(Message::new(MessageRole::Assistant, entry.content()));
            } else {
                messages.push(Message::new(
                    MessageRole::User,
                    format!("[{}]: {}", entry.speaker(), entry.content()),
                ));
            }
        }
        messages
    }
}

#[async_trait]
impl Capability for LlmCapability {
    async fn respond(
        &self,
        role_name: &str,
        instructions: &str,
        history: &[TranscriptEntry],
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        let messages = Self::build_messages(role_name, instructions, history);
        log::debug!(
            "LlmCapability::respond: {} -> {} ({} messages)",
            role_name,
            self.client.model_name(),
            messages.len()
        );
        let reply = self.client.send_message(&messages).await?;
        Ok(reply.content.to_string())
    }
}

type ReplyFn =
    dyn Fn(&[TranscriptEntry]) -> Result<String, Box<dyn Error + Send + Sync>> + Send + Sync;

/// Capability backed by a synchronous closure, for scripted or rule-based roles.
pub struct FnCapability {
    f: Box<ReplyFn>,
}

impl FnCapability {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&[TranscriptEntry]) -> Result<String, Box<dyn Error + Send + Sync>>
            + Send
            + Sync
            + 'static,
    {
        Self { f: Box::new(f) }
    }
}

#[async_trait]
impl Capability for FnCapability {
    async fn respond(
        &self,
        _role_name: &str,
        _instructions: &str,
        history: &[TranscriptEntry],
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        (self.f)(history)
    }
}

/// The set of roles available to a crew, in registration order.
#[derive(Debug, Default)]
pub struct RoleRegistry {
    roles: Vec<Arc<Role>>,
    index: HashMap<String, usize>,
}

impl RoleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a role. Names must be unique.
    pub fn register(&mut self, role: Role) -> Result<(), ConfigurationError> {
        if self.index.contains_key(role.name()) {
            return Err(ConfigurationError::DuplicateRole(role.name().to_string()));
        }
        self.index.insert(role.name().to_string(), self.roles.len());
        self.roles.push(Arc::new(role));
        Ok(())
    }

    /// Builder-style [`register`](RoleRegistry::register).
    pub fn with_role(mut self, role: Role) -> Result<Self, ConfigurationError> {
        self.register(role)?;
        Ok(self)
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Role>> {
        self.index.get(name).map(|&i| &self.roles[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    /// Role names in registration order.
    pub fn names(&self) -> Vec<&str> {
        self.roles.iter().map(|r| r.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.roles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<Role>> {
        self.roles.iter()
    }
}
