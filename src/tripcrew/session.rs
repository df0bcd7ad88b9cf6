//! The session driver: one conversation from triggering message to extracted result.
//!
//! A [`SessionDriver`] owns the role registry and transition policy by dependency injection and
//! shares them read-only with every session it runs. Each call to [`run`](SessionDriver::run)
//! builds a fresh [`SessionState`], seeds the transcript with the initiating message attributed
//! to the initiator, drives the [`TurnScheduler`] to termination and then extracts the
//! aggregator's most recent reply as the result.
//!
//! # Example
//!
//! ```rust,no_run
//! use tripcrew::role::{Role, RoleRegistry};
//! use tripcrew::session::{RunSummary, SessionDriver};
//! use tripcrew::transition_policy::TransitionPolicy;
//!
//! # async {
//! let mut registry = RoleRegistry::new();
//! registry.register(Role::from_fn("asker", "", |_| Ok("more please".into()))).unwrap();
//! registry.register(Role::from_fn("writer", "", |_| Ok("the report".into()))).unwrap();
//!
//! let policy = TransitionPolicy::builder()
//!     .allow("asker", ["writer"])
//!     .allow("writer", ["asker"])
//!     .initiator("asker")
//!     .aggregator("writer")
//!     .max_rounds(4)
//!     .build(&registry)
//!     .unwrap();
//!
//! let driver = SessionDriver::new(registry, policy).unwrap();
//! let outcome = driver.run("plan a trip").await;
//! let summary = RunSummary::from(&outcome);
//! assert!(summary.success);
//! assert_eq!(summary.result.as_deref(), Some("the report"));
//! # };
//! ```

use crate::error::{ConfigurationError, SessionError, SpeakerInvocationError};
use crate::event::{EventHandler, SessionEvent};
use crate::role::RoleRegistry;
use crate::scheduler::{CancelToken, RetryPolicy, SessionState, TerminationReason, TurnScheduler};
use crate::selector::{DeclaredOrder, SelectorPolicy};
use crate::stop_condition::{AggregatorSpoke, StopCondition};
use crate::transcript::Transcript;
use crate::transition_policy::TransitionPolicy;
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

/// The aggregator's most recent reply in `transcript`, if it ever spoke.
///
/// Pure: the transcript is only read, so repeated calls on the same transcript agree.
pub fn extract_aggregator_output<'a>(transcript: &'a Transcript, aggregator: &str) -> Option<&'a str> {
    transcript.last_from(aggregator).map(|entry| entry.content())
}

/// A successful session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionResult {
    pub session_id: String,
    /// The aggregator's final reply.
    pub report: String,
    /// `NaturalEnd` or `RoundLimit`.
    pub termination_reason: TerminationReason,
    /// Completed turns, including the seed.
    pub rounds: usize,
    pub transcript: Transcript,
}

/// Flat outcome of a run: `{success, result, termination_reason}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub success: bool,
    pub result: Option<String>,
    pub termination_reason: TerminationReason,
}

impl From<&Result<SessionResult, SessionError>> for RunSummary {
    fn from(outcome: &Result<SessionResult, SessionError>) -> Self {
        match outcome {
            Ok(result) => RunSummary {
                success: true,
                result: Some(result.report.clone()),
                termination_reason: result.termination_reason,
            },
            Err(error) => RunSummary {
                success: false,
                result: None,
                termination_reason: error.termination_reason(),
            },
        }
    }
}

/// Runs sessions over a fixed crew.
///
/// Cloning is cheap and every clone shares the same registry and policy, so one driver can
/// serve concurrent sessions (e.g. one per user).
#[derive(Clone)]
pub struct SessionDriver {
    registry: Arc<RoleRegistry>,
    policy: Arc<TransitionPolicy>,
    selector: Arc<dyn SelectorPolicy>,
    stop_condition: Arc<dyn StopCondition>,
    retry: RetryPolicy,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl SessionDriver {
    /// Default setup: declared-order tie-break, natural end once the aggregator has spoken and
    /// [`RetryPolicy::default`].
    ///
    /// Fails if `policy` mentions a role that is not in `registry`.
    pub fn new(registry: RoleRegistry, policy: TransitionPolicy) -> Result<Self, ConfigurationError> {
        if registry.is_empty() {
            return Err(ConfigurationError::EmptyRegistry);
        }
        if let Some(missing) = policy.roles().into_iter().find(|name| !registry.contains(name)) {
            return Err(ConfigurationError::UnknownRole {
                context: "transition policy".to_string(),
                name: missing.to_string(),
            });
        }
        Ok(Self {
            registry: Arc::new(registry),
            policy: Arc::new(policy),
            selector: Arc::new(DeclaredOrder),
            stop_condition: Arc::new(AggregatorSpoke),
            retry: RetryPolicy::default(),
            event_handler: None,
        })
    }

    /// Replace the tie-break policy. The selector is validated against the registry.
    pub fn with_selector(mut self, selector: Arc<dyn SelectorPolicy>) -> Result<Self, ConfigurationError> {
        selector.validate(&self.registry)?;
        self.selector = selector;
        Ok(self)
    }

    pub fn with_stop_condition(mut self, stop_condition: Arc<dyn StopCondition>) -> Self {
        self.stop_condition = stop_condition;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn registry(&self) -> &RoleRegistry {
        &self.registry
    }

    pub fn policy(&self) -> &TransitionPolicy {
        &self.policy
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn selector_name(&self) -> &str {
        self.selector.name()
    }

    fn scheduler(&self) -> TurnScheduler {
        let scheduler = TurnScheduler::new(
            Arc::clone(&self.registry),
            Arc::clone(&self.policy),
            Arc::clone(&self.selector),
            Arc::clone(&self.stop_condition),
            self.retry.clone(),
        );
        match &self.event_handler {
            Some(handler) => scheduler.with_event_handler(Arc::clone(handler)),
            None => scheduler,
        }
    }

    async fn emit(&self, event: SessionEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_session_event(&event).await;
        }
    }

    /// Run one session to completion.
    pub async fn run(&self, initial_message: &str) -> Result<SessionResult, SessionError> {
        self.run_with_cancel(initial_message, CancelToken::new()).await
    }

    /// Run one session that stops early once `cancel` fires.
    pub async fn run_with_cancel(
        &self,
        initial_message: &str,
        cancel: CancelToken,
    ) -> Result<SessionResult, SessionError> {
        let session_id = Uuid::new_v4().to_string();
        let mut state = SessionState::new(session_id.clone(), &self.policy);
        state.seed(initial_message);

        log::info!(
            "session {}: started by {} (max_rounds={}, selector={})",
            session_id,
            self.policy.initiator(),
            self.policy.max_rounds(),
            self.selector.name()
        );
        self.emit(SessionEvent::SessionStarted {
            session_id: session_id.clone(),
            initiator: self.policy.initiator().to_string(),
            max_rounds: self.policy.max_rounds(),
        })
        .await;

        let reason = self.scheduler().run(&mut state, &cancel).await;
        let rounds = state.round_count();

        log::info!(
            "session {}: terminated with {} after {} round(s)",
            session_id,
            reason,
            rounds
        );
        self.emit(SessionEvent::SessionTerminated {
            session_id: session_id.clone(),
            reason,
            rounds,
        })
        .await;

        self.finish(state, reason)
    }

    fn finish(
        &self,
        state: SessionState,
        reason: TerminationReason,
    ) -> Result<SessionResult, SessionError> {
        match reason {
            TerminationReason::Cancelled => Err(SessionError::Cancelled {
                transcript: state.into_transcript(),
            }),
            TerminationReason::SpeakerFailure => {
                let (role, attempts, source) = match state.failure() {
                    Some(failure) => (failure.role.clone(), failure.attempts, failure.error.clone()),
                    None => (
                        state.current_speaker().to_string(),
                        0,
                        SpeakerInvocationError::Selection("turn failed".to_string()),
                    ),
                };
                Err(SessionError::SpeakerFailure {
                    role,
                    attempts,
                    source,
                    transcript: state.into_transcript(),
                })
            }
            TerminationReason::NaturalEnd | TerminationReason::RoundLimit => {
                let session_id = state.session_id().to_string();
                let rounds = state.round_count();
                let aggregator = self.policy.aggregator();
                let report = extract_aggregator_output(state.transcript(), aggregator)
                    .map(str::to_string);
                let transcript = state.into_transcript();
                match report {
                    Some(report) => Ok(SessionResult {
                        session_id,
                        report,
                        termination_reason: reason,
                        rounds,
                        transcript,
                    }),
                    None => {
                        log::warn!(
                            "session {}: {} never spoke before {}",
                            session_id,
                            aggregator,
                            reason
                        );
                        Err(SessionError::NoAggregatorOutput {
                            aggregator: aggregator.to_string(),
                            reason,
                            transcript,
                        })
                    }
                }
            }
        }
    }
}
