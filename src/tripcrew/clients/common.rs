use crate::client_wrapper::TokenUsage;
use lazy_static::lazy_static;
use openai_rust::chat;
use openai_rust2 as openai_rust;
use std::error::Error;
use std::sync::Mutex;
use std::time::Duration;

lazy_static! {
    /// One pooled HTTP client shared by every backend so concurrent sessions reuse
    /// connections instead of paying DNS/TLS setup per turn.
    static ref SHARED_HTTP_CLIENT: reqwest::Client = reqwest::ClientBuilder::new()
        .pool_max_idle_per_host(32)
        .pool_idle_timeout(Some(Duration::from_secs(90)))
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .expect("Failed to build HTTP client");
}

/// Borrow the process-wide pooled `reqwest::Client`.
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}

/// Send a chat request, record its usage, and return the assistant's content.
pub async fn send_and_track(
    api: &openai_rust::Client,
    model: &str,
    formatted_msgs: Vec<chat::Message>,
    url_path: Option<String>,
    usage_slot: &Mutex<Option<TokenUsage>>,
) -> Result<String, Box<dyn Error + Send + Sync>> {
    let chat_arguments = chat::ChatArguments::new(model, formatted_msgs);

    let response = match api.create_chat(chat_arguments, url_path).await {
        Ok(response) => response,
        Err(err) => {
            log::error!(
                "tripcrew::clients::common::send_and_track(...): OpenAI API Error: {}",
                err
            );
            return Err(err.into());
        }
    };

    let usage = TokenUsage {
        input_tokens: response.usage.prompt_tokens as usize,
        output_tokens: response.usage.completion_tokens as usize,
        total_tokens: response.usage.total_tokens as usize,
    };
    if let Ok(mut slot) = usage_slot.lock() {
        *slot = Some(usage);
    }

    match response.choices.first() {
        Some(choice) => Ok(choice.message.content.clone()),
        None => Err("OpenAI API returned no choices".into()),
    }
}
