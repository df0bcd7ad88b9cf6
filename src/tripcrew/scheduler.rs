//! The turn scheduler: a small state machine that drives one session turn by turn.
//!
//! ```text
//!                 select + invoke                 reply appended
//! AWAITING_SPEAKER ─────────────────▶ SPEAKER_ACTIVE ─────────────▶ AWAITING_SPEAKER
//!        │                                   │
//!        │ cancelled / round budget spent    │ retries exhausted / cancelled / natural end
//!        ▼                                   ▼
//!   TERMINATED(reason) ◀──────────────────────
//! ```
//!
//! Each [`step`](TurnScheduler::step) performs at most one turn:
//!
//! 1. The candidates are `allowed_next(current speaker)`. A single candidate is taken as is;
//!    otherwise the [`SelectorPolicy`] picks one, and anything outside the candidate set is a
//!    selection failure.
//! 2. The selected role's `respond` is called with the full transcript under the turn timeout.
//!    Failed attempts are retried with exponential backoff up to [`RetryPolicy::max_attempts`].
//! 3. On success the reply is appended, `round_count` grows by one and the selected role becomes
//!    the current speaker. The [`StopCondition`] is checked first, then the round budget.
//!
//! A turn is atomic: a cancelled or failed turn appends nothing.

use crate::error::SpeakerInvocationError;
use crate::event::{EventHandler, SessionEvent};
use crate::role::{Role, RoleRegistry};
use crate::selector::SelectorPolicy;
use crate::stop_condition::StopCondition;
use crate::transcript::Transcript;
use crate::transition_policy::TransitionPolicy;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Why a session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminationReason {
    /// The stop condition fired (by default: the aggregator has just spoken).
    NaturalEnd,
    /// `max_rounds` turns were completed first.
    RoundLimit,
    /// A turn kept failing after every retry.
    SpeakerFailure,
    /// The caller cancelled the session.
    Cancelled,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            TerminationReason::NaturalEnd => "NATURAL_END",
            TerminationReason::RoundLimit => "ROUND_LIMIT",
            TerminationReason::SpeakerFailure => "SPEAKER_FAILURE",
            TerminationReason::Cancelled => "CANCELLED",
        };
        f.write_str(label)
    }
}

/// Scheduler states. No transition leaves `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerPhase {
    AwaitingSpeaker,
    SpeakerActive,
    Terminated(TerminationReason),
}

/// Per-turn retry and timeout policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts per turn, including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles after each further failure.
    pub initial_backoff: Duration,
    /// Upper bound on the delay between attempts.
    pub max_backoff: Duration,
    /// Deadline for a single `respond` call (and for a selector decision).
    pub turn_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(4),
            turn_timeout: Duration::from_secs(120),
        }
    }
}

impl RetryPolicy {
    /// Delay to wait after failed attempt number `attempt` (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.initial_backoff
            .saturating_mul(1u32 << exponent)
            .min(self.max_backoff)
    }

    fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// External cancellation for a running session. Clones share the same signal.
///
/// Cancelling takes effect at the next turn boundary at the latest; an in-flight `respond` call
/// or backoff sleep is abandoned immediately.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`cancel`](CancelToken::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// A turn that could not be completed.
#[derive(Debug, Clone)]
pub struct TurnFailure {
    pub role: String,
    pub attempts: u32,
    pub error: SpeakerInvocationError,
}

/// Mutable state of one session. Only the scheduler mutates it.
#[derive(Debug, Clone)]
pub struct SessionState {
    session_id: String,
    transcript: Transcript,
    current_speaker: String,
    round_count: usize,
    phase: SchedulerPhase,
    failure: Option<TurnFailure>,
}

impl SessionState {
    /// Fresh state with an empty transcript and the initiator as current speaker.
    pub fn new(session_id: impl Into<String>, policy: &TransitionPolicy) -> Self {
        Self {
            session_id: session_id.into(),
            transcript: Transcript::new(),
            current_speaker: policy.initiator().to_string(),
            round_count: 0,
            phase: SchedulerPhase::AwaitingSpeaker,
            failure: None,
        }
    }

    /// Record the initiating message as the initiator's turn. The seed counts as round 1.
    pub(crate) fn seed(&mut self, initial_message: &str) {
        let initiator = self.current_speaker.clone();
        self.transcript.append(&initiator, initial_message);
        self.round_count = 1;
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn current_speaker(&self) -> &str {
        &self.current_speaker
    }

    pub fn round_count(&self) -> usize {
        self.round_count
    }

    pub fn phase(&self) -> SchedulerPhase {
        self.phase
    }

    pub fn is_terminated(&self) -> bool {
        matches!(self.phase, SchedulerPhase::Terminated(_))
    }

    pub fn termination_reason(&self) -> Option<TerminationReason> {
        match self.phase {
            SchedulerPhase::Terminated(reason) => Some(reason),
            _ => None,
        }
    }

    /// The failed turn, when the session ended with `SPEAKER_FAILURE`.
    pub fn failure(&self) -> Option<&TurnFailure> {
        self.failure.as_ref()
    }

    pub(crate) fn into_transcript(self) -> Transcript {
        self.transcript
    }

    fn terminate(&mut self, reason: TerminationReason) -> SchedulerPhase {
        self.phase = SchedulerPhase::Terminated(reason);
        self.phase
    }
}

/// Drives [`SessionState`] through the turn-taking state machine.
///
/// Holds only shared read-only pieces, so one scheduler can drive any number of concurrent
/// sessions.
#[derive(Clone)]
pub struct TurnScheduler {
    registry: Arc<RoleRegistry>,
    policy: Arc<TransitionPolicy>,
    selector: Arc<dyn SelectorPolicy>,
    stop_condition: Arc<dyn StopCondition>,
    retry: RetryPolicy,
    event_handler: Option<Arc<dyn EventHandler>>,
}

impl TurnScheduler {
    pub fn new(
        registry: Arc<RoleRegistry>,
        policy: Arc<TransitionPolicy>,
        selector: Arc<dyn SelectorPolicy>,
        stop_condition: Arc<dyn StopCondition>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            registry,
            policy,
            selector,
            stop_condition,
            retry,
            event_handler: None,
        }
    }

    pub fn with_event_handler(mut self, handler: Arc<dyn EventHandler>) -> Self {
        self.event_handler = Some(handler);
        self
    }

    pub fn policy(&self) -> &TransitionPolicy {
        &self.policy
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    async fn emit(&self, event: SessionEvent) {
        if let Some(handler) = &self.event_handler {
            handler.on_session_event(&event).await;
        }
    }

    /// Step until the session is terminated and return the reason.
    pub async fn run(&self, state: &mut SessionState, cancel: &CancelToken) -> TerminationReason {
        loop {
            if let SchedulerPhase::Terminated(reason) = self.step(state, cancel).await {
                return reason;
            }
        }
    }

    /// Perform at most one turn and return the resulting phase.
    pub async fn step(&self, state: &mut SessionState, cancel: &CancelToken) -> SchedulerPhase {
        if let SchedulerPhase::Terminated(_) = state.phase {
            return state.phase;
        }
        if cancel.is_cancelled() {
            return state.terminate(TerminationReason::Cancelled);
        }
        if state.round_count >= self.policy.max_rounds() {
            return state.terminate(TerminationReason::RoundLimit);
        }

        let round = state.round_count + 1;
        let role = match self.select_speaker(state, round, cancel).await {
            Ok(Some(role)) => role,
            Ok(None) => {
                log::info!(
                    "session {}: cancelled while choosing the speaker for round {}",
                    state.session_id,
                    round
                );
                return state.terminate(TerminationReason::Cancelled);
            }
            Err(error) => {
                log::error!(
                    "session {}: no speaker for round {}: {}",
                    state.session_id,
                    round,
                    error
                );
                state.failure = Some(TurnFailure {
                    role: state.current_speaker.clone(),
                    attempts: 0,
                    error,
                });
                return state.terminate(TerminationReason::SpeakerFailure);
            }
        };

        state.phase = SchedulerPhase::SpeakerActive;
        let reply = match self.invoke_with_retry(state, &role, round, cancel).await {
            Ok(reply) => reply,
            Err(phase) => return phase,
        };

        let entry = state.transcript.append(role.name(), &reply).clone();
        state.round_count = round;
        state.current_speaker = role.name().to_string();
        state.phase = SchedulerPhase::AwaitingSpeaker;
        log::info!(
            "session {}: round {}/{} {} replied ({} chars)",
            state.session_id,
            round,
            self.policy.max_rounds(),
            role.name(),
            reply.len()
        );
        self.emit(SessionEvent::TurnCompleted {
            session_id: state.session_id.clone(),
            round,
            role: role.name().to_string(),
            response_length: reply.len(),
        })
        .await;

        // Only the aggregator may be a sink; with nowhere to go the conversation is over.
        let sink = self.policy.allowed_next(role.name()).is_empty();
        if sink || self.stop_condition.is_natural_end(&entry, &self.policy) {
            return state.terminate(TerminationReason::NaturalEnd);
        }
        if state.round_count >= self.policy.max_rounds() {
            return state.terminate(TerminationReason::RoundLimit);
        }
        state.phase
    }

    /// `Ok(None)` means the session was cancelled before a speaker was chosen.
    async fn select_speaker(
        &self,
        state: &SessionState,
        round: usize,
        cancel: &CancelToken,
    ) -> Result<Option<Arc<Role>>, SpeakerInvocationError> {
        let current = state.current_speaker.as_str();
        let names = self.policy.allowed_next(current);
        let candidates = names
            .iter()
            .map(|name| {
                self.registry.get(name).cloned().ok_or_else(|| {
                    SpeakerInvocationError::Selection(format!("role '{}' is not registered", name))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        let (role, reason) = if candidates.len() == 1 {
            (Arc::clone(&candidates[0]), "single candidate".to_string())
        } else {
            let decision = tokio::select! {
                decision = tokio::time::timeout(
                    self.retry.turn_timeout,
                    self.selector.select(&candidates, &state.transcript),
                ) => decision,
                _ = cancel.cancelled() => return Ok(None),
            };
            let role = match decision {
                Ok(result) => result?,
                Err(_) => {
                    log::warn!(
                        "session {}: {} did not decide within {:?}, using declared order",
                        state.session_id,
                        self.selector.name(),
                        self.retry.turn_timeout
                    );
                    candidates.first().cloned().ok_or_else(|| {
                        SpeakerInvocationError::Selection(format!(
                            "role '{}' has no permitted successor",
                            current
                        ))
                    })?
                }
            };
            if !self.policy.is_allowed(current, role.name()) {
                return Err(SpeakerInvocationError::Selection(format!(
                    "{} chose '{}', which may not follow '{}'",
                    self.selector.name(),
                    role.name(),
                    current
                )));
            }
            (role, self.selector.name().to_string())
        };

        log::debug!(
            "session {}: round {} -> {} ({}; candidates {:?})",
            state.session_id,
            round,
            role.name(),
            reason,
            names
        );
        self.emit(SessionEvent::SpeakerSelected {
            session_id: state.session_id.clone(),
            round,
            role: role.name().to_string(),
            candidates: names.to_vec(),
            reason,
        })
        .await;
        Ok(Some(role))
    }

    /// Call `role` until it replies, retries run out, or the session is cancelled.
    /// On the error path the state has already been moved to `Terminated`.
    async fn invoke_with_retry(
        &self,
        state: &mut SessionState,
        role: &Role,
        round: usize,
        cancel: &CancelToken,
    ) -> Result<String, SchedulerPhase> {
        let attempts = self.retry.attempts();
        let timeout = self.retry.turn_timeout;

        for attempt in 1..=attempts {
            let outcome = tokio::select! {
                result = tokio::time::timeout(timeout, role.respond(state.transcript.entries())) => {
                    Some(result.unwrap_or_else(|_| {
                        Err(SpeakerInvocationError::Timeout {
                            role: role.name().to_string(),
                            after: timeout,
                        })
                    }))
                }
                _ = cancel.cancelled() => None,
            };

            let error = match outcome {
                Some(Ok(reply)) => return Ok(reply),
                Some(Err(error)) => error,
                None => {
                    log::info!(
                        "session {}: cancelled while {} was speaking",
                        state.session_id,
                        role.name()
                    );
                    return Err(state.terminate(TerminationReason::Cancelled));
                }
            };

            if attempt == attempts {
                log::error!(
                    "session {}: {} failed {} time(s), giving up: {}",
                    state.session_id,
                    role.name(),
                    attempts,
                    error
                );
                state.failure = Some(TurnFailure {
                    role: role.name().to_string(),
                    attempts,
                    error,
                });
                return Err(state.terminate(TerminationReason::SpeakerFailure));
            }

            let delay = self.retry.backoff_for(attempt);
            log::warn!(
                "session {}: {} attempt {}/{} failed: {}; retrying in {:?}",
                state.session_id,
                role.name(),
                attempt,
                attempts,
                error,
                delay
            );
            self.emit(SessionEvent::TurnRetrying {
                session_id: state.session_id.clone(),
                round,
                role: role.name().to_string(),
                attempt,
                error: error.to_string(),
            })
            .await;

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => {
                    return Err(state.terminate(TerminationReason::Cancelled));
                }
            }
        }

        // attempts() is at least 1, so the loop always returns.
        Err(state.terminate(TerminationReason::SpeakerFailure))
    }
}
