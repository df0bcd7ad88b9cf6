//! # tripcrew
//!
//! tripcrew coordinates a fixed crew of conversational roles that take turns over a shared
//! transcript to produce one composite document, out of the box a travel report.
//!
//! The crate provides layered abstractions for:
//!
//! * **Roles**: [`role::Role`] couples a unique name and instructions with a
//!   [`role::Capability`]; [`role::LlmCapability`] answers through any [`ClientWrapper`].
//! * **Transition policies**: [`transition_policy::TransitionPolicy`] is a validated, immutable
//!   allow-list of who may speak after whom, plus the initiator, the aggregator and the round
//!   budget.
//! * **Turn scheduling**: [`scheduler::TurnScheduler`] selects the next speaker, invokes it under
//!   a timeout with retries, appends the reply and decides when to stop.
//! * **Sessions**: [`SessionDriver`] seeds the transcript, drives the scheduler and extracts the
//!   aggregator's last reply as the result.
//! * **Providers**: [`clients::openai::OpenAIClient`] implements [`ClientWrapper`] over a shared
//!   pooled HTTP client.
//!
//! ## A crew in a few lines
//!
//! ```rust
//! use tripcrew::role::{Role, RoleRegistry};
//! use tripcrew::transition_policy::TransitionPolicy;
//! use tripcrew::scheduler::TerminationReason;
//! use tripcrew::SessionDriver;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut registry = RoleRegistry::new();
//! for name in ["A", "B", "C", "D"] {
//!     let reply = format!("{} was here", name);
//!     registry.register(Role::from_fn(name, "", move |_| Ok(reply.clone())))?;
//! }
//!
//! let policy = TransitionPolicy::builder()
//!     .allow("A", ["B"])
//!     .allow("B", ["C"])
//!     .allow("C", ["D"])
//!     .allow("D", ["A"])
//!     .initiator("A")
//!     .aggregator("D")
//!     .max_rounds(4)
//!     .build(&registry)?;
//!
//! let result = SessionDriver::new(registry, policy)?.run("plan a trip").await?;
//! assert_eq!(result.transcript.speakers(), ["A", "B", "C", "D"]);
//! assert_eq!(result.report, "D was here");
//! assert_eq!(result.termination_reason, TerminationReason::NaturalEnd);
//! # Ok(())
//! # }
//! ```
//!
//! ## The travel planner
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tripcrew::clients::openai::{Model, OpenAIClient};
//! use tripcrew::travel::travel_crew;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     tripcrew::init_logger();
//!
//!     let key = std::env::var("OPENAI_API_KEY")?;
//!     let crew = travel_crew(Arc::new(OpenAIClient::new_with_model_enum(&key, Model::GPT4oMini)))?;
//!     let result = crew.run("A week of hiking somewhere warm in March").await?;
//!     println!("{}", result.report);
//!     Ok(())
//! }
//! ```

use std::sync::Once;

static INIT_LOGGER: Once = Once::new();

/// Initialise the global [`env_logger`] subscriber exactly once.
///
/// Applications embedding tripcrew can opt-in to `RUST_LOG` driven diagnostics without choosing
/// a logging backend upfront.
///
/// ```rust
/// tripcrew::init_logger();
/// log::info!("Logger is ready");
/// ```
pub fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::init();
    });
}

// Import the top-level `tripcrew` module.
pub mod tripcrew;

// Re-exporting key items for easier external access.
pub use tripcrew::client_wrapper;
pub use tripcrew::client_wrapper::{ClientWrapper, Message, MessageRole, TokenUsage};
pub use tripcrew::clients;
pub use tripcrew::config;
pub use tripcrew::config::CrewConfig;
pub use tripcrew::console;
pub use tripcrew::error;
pub use tripcrew::error::{ConfigurationError, SessionError, SpeakerInvocationError};
pub use tripcrew::event;
pub use tripcrew::event::{EventHandler, SessionEvent};
pub use tripcrew::role;
pub use tripcrew::scheduler;
pub use tripcrew::selector;
pub use tripcrew::session;
pub use tripcrew::session::{RunSummary, SessionDriver, SessionResult};
pub use tripcrew::stop_condition;
pub use tripcrew::transcript;
pub use tripcrew::transition_policy;
pub use tripcrew::travel;
