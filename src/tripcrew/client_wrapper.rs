//! The generative backend contract.
//!
//! A [`ClientWrapper`] is a thin wrapper around a remote chat-completion service. It does not
//! keep track of any conversation: every call receives the full message array it should reason
//! over. Conversation state lives in the [`Transcript`](crate::transcript::Transcript) owned by a
//! session, and [`LlmCapability`](crate::role::LlmCapability) turns that transcript into the
//! message array for each turn.

use async_trait::async_trait;
use std::error::Error;
use std::sync::{Arc, Mutex};

/// Represents the possible chat roles for a message sent to a backend.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageRole {
    // set by the developer to steer the model's responses
    System,
    // content the model should answer to
    User,
    // content previously generated by the model itself
    Assistant,
}

impl MessageRole {
    /// Wire name used by OpenAI compatible chat APIs.
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

/// How many tokens were spent on prompt vs. completion.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
    pub total_tokens: usize,
}

/// Represents a generic message to be sent to an LLM.
#[derive(Clone, Debug)]
pub struct Message {
    /// The role associated with the message.
    pub role: MessageRole,
    /// The actual content of the message. Stored as `Arc<str>` so cloning is cheap.
    pub content: Arc<str>,
}

impl Message {
    pub fn new(role: MessageRole, content: impl AsRef<str>) -> Self {
        Self {
            role,
            content: Arc::from(content.as_ref()),
        }
    }
}

/// Trait defining the interface to interact with various LLM services.
#[async_trait]
pub trait ClientWrapper: Send + Sync {
    /// Send the messages to the LLM and get the assistant reply.
    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>>;

    /// Identifier of the model behind this client, used for logging.
    fn model_name(&self) -> &str;

    /// Hook to retrieve usage from the *last* `send_message()` call.
    /// Default impl reads [`usage_slot`](ClientWrapper::usage_slot).
    fn get_last_usage(&self) -> Option<TokenUsage> {
        self.usage_slot()
            .and_then(|slot| slot.lock().ok().and_then(|u| u.clone()))
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        // Clients supporting TokenUsage tracking override this to expose their slot.
        None
    }
}
