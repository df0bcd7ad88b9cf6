//! The `OpenAIClient` struct implements `ClientWrapper` for OpenAI's Chat API,
//! capturing both the assistant response and detailed token usage (input vs output).
//!
//! # Example
//!
//! ```rust,no_run
//! use tripcrew::clients::openai::{OpenAIClient, Model};
//! use tripcrew::client_wrapper::{ClientWrapper, Message, MessageRole};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
//!     let secret_key = std::env::var("OPENAI_API_KEY")?;
//!     let client = OpenAIClient::new_with_model_enum(&secret_key, Model::GPT4oMini);
//!
//!     let resp = client
//!         .send_message(&[
//!             Message::new(MessageRole::System, "You are an assistant."),
//!             Message::new(MessageRole::User, "Hello!"),
//!         ])
//!         .await?;
//!     println!("Assistant: {}", resp.content);
//!
//!     if let Some(usage) = client.get_last_usage() {
//!         println!("Tokens: input: {}, output: {}", usage.input_tokens, usage.output_tokens);
//!     }
//!     Ok(())
//! }
//! ```

use std::error::Error;
use std::sync::Mutex;

use async_trait::async_trait;
use openai_rust::chat;
use openai_rust2 as openai_rust;

use crate::client_wrapper::{ClientWrapper, Message, MessageRole, TokenUsage};
use crate::clients::common::{get_shared_http_client, send_and_track};

/// Chat models the travel crew is typically run with.
pub enum Model {
    /// `gpt-4o` – Omni model with text + image inputs.
    GPT4o,
    /// `gpt-4o-mini` – cost effective GPT-4o derivative, the crew's default.
    GPT4oMini,
    /// `gpt-4.1` – general availability GPT-4.1.
    GPT41,
    /// `gpt-4.1-mini` – reduced cost GPT-4.1 tier.
    GPT41Mini,
    /// `gpt-4.1-nano` – ultra low cost GPT-4.1 derivative.
    GPT41Nano,
}

/// Convert a [`Model`] variant into the string identifier expected by the REST API.
pub fn model_to_string(model: Model) -> String {
    match model {
        Model::GPT4o => "gpt-4o".to_string(),
        Model::GPT4oMini => "gpt-4o-mini".to_string(),
        Model::GPT41 => "gpt-4.1".to_string(),
        Model::GPT41Mini => "gpt-4.1-mini".to_string(),
        Model::GPT41Nano => "gpt-4.1-nano".to_string(),
    }
}

/// Client wrapper for OpenAI's Chat Completions API.
///
/// Holds the selected model identifier plus an internal [`TokenUsage`] slot so callers can
/// inspect how many tokens the last request consumed. `OpenAIClient` is `Send + Sync` and is
/// meant to be shared by every role and every concurrent session through an `Arc`.
pub struct OpenAIClient {
    client: openai_rust::Client,
    model: String,
    token_usage: Mutex<Option<TokenUsage>>,
}

impl OpenAIClient {
    /// Construct a new client using the provided API key and [`Model`] variant.
    pub fn new_with_model_enum(secret_key: &str, model: Model) -> Self {
        Self::new_with_model_string(secret_key, &model_to_string(model))
    }

    /// Construct a new client using the provided API key and explicit model name.
    pub fn new_with_model_string(secret_key: &str, model_name: &str) -> Self {
        OpenAIClient {
            client: openai_rust::Client::new_with_client(
                secret_key,
                get_shared_http_client().clone(),
            ),
            model: model_name.to_string(),
            token_usage: Mutex::new(None),
        }
    }
}

#[async_trait]
impl ClientWrapper for OpenAIClient {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let formatted_messages = messages
            .iter()
            .map(|msg| chat::Message {
                role: msg.role.as_str().to_owned(),
                content: msg.content.to_string(),
            })
            .collect::<Vec<_>>();

        let content = send_and_track(
            &self.client,
            &self.model,
            formatted_messages,
            Some("/v1/chat/completions".to_string()),
            &self.token_usage,
        )
        .await
        .map_err(|err| {
            if log::log_enabled!(log::Level::Error) {
                log::error!(
                    "OpenAIClient::send_message(...): model {} failed: {}",
                    self.model,
                    err
                );
            }
            err
        })?;

        Ok(Message::new(MessageRole::Assistant, content))
    }

    fn usage_slot(&self) -> Option<&Mutex<Option<TokenUsage>>> {
        Some(&self.token_usage)
    }
}
