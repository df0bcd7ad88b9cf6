use async_trait::async_trait;
use std::collections::HashSet;
use std::error::Error;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tripcrew::client_wrapper::{ClientWrapper, Message, MessageRole};
use tripcrew::error::{ConfigurationError, SessionError, SpeakerInvocationError};
use tripcrew::event::{EventHandler, SessionEvent};
use tripcrew::role::{Capability, Role, RoleRegistry};
use tripcrew::scheduler::{CancelToken, RetryPolicy, TerminationReason};
use tripcrew::selector::{FixedPriority, LlmSelector, SelectorPolicy};
use tripcrew::session::{extract_aggregator_output, RunSummary, SessionDriver};
use tripcrew::stop_condition::KeywordStop;
use tripcrew::transcript::{Transcript, TranscriptEntry};
use tripcrew::transition_policy::TransitionPolicy;

fn scripted(name: &str) -> Role {
    let reply = format!("{} reply", name);
    Role::from_fn(name, format!("You are {}.", name), move |_| Ok(reply.clone()))
}

fn registry_of(roles: Vec<Role>) -> RoleRegistry {
    let mut registry = RoleRegistry::new();
    for role in roles {
        registry.register(role).unwrap();
    }
    registry
}

fn ring_policy(registry: &RoleRegistry, max_rounds: usize) -> TransitionPolicy {
    TransitionPolicy::builder()
        .allow("A", ["B"])
        .allow("B", ["C"])
        .allow("C", ["D"])
        .allow("D", ["A"])
        .initiator("A")
        .aggregator("D")
        .max_rounds(max_rounds)
        .build(registry)
        .unwrap()
}

fn ring_driver(roles: Vec<Role>, max_rounds: usize) -> SessionDriver {
    let registry = registry_of(roles);
    let policy = ring_policy(&registry, max_rounds);
    SessionDriver::new(registry, policy)
        .unwrap()
        .with_retry_policy(fast_retry())
}

fn abcd() -> Vec<Role> {
    ["A", "B", "C", "D"].iter().map(|n| scripted(n)).collect()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 3,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(5),
        turn_timeout: Duration::from_secs(5),
    }
}

struct Sleepy {
    delay: Duration,
}

#[async_trait]
impl Capability for Sleepy {
    async fn respond(
        &self,
        _role_name: &str,
        _instructions: &str,
        _history: &[TranscriptEntry],
    ) -> Result<String, Box<dyn Error + Send + Sync>> {
        tokio::time::sleep(self.delay).await;
        Ok("finally awake".to_string())
    }
}

#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<SessionEvent>>,
}

#[async_trait]
impl EventHandler for Recorder {
    async fn on_session_event(&self, event: &SessionEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

struct MockClient {
    reply: Option<String>,
}

#[async_trait]
impl ClientWrapper for MockClient {
    async fn send_message(
        &self,
        _messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        match &self.reply {
            Some(reply) => Ok(Message::new(MessageRole::Assistant, reply)),
            None => Err("backend offline".into()),
        }
    }

    fn model_name(&self) -> &str {
        "mock"
    }
}

#[tokio::test]
async fn test_ring_walk_ends_when_aggregator_speaks() {
    let driver = ring_driver(abcd(), 4);

    let result = driver.run("plan a trip").await.unwrap();

    assert_eq!(result.transcript.speakers(), vec!["A", "B", "C", "D"]);
    assert_eq!(result.transcript.entries()[0].content(), "plan a trip");
    assert_eq!(result.report, "D reply");
    assert_eq!(result.termination_reason, TerminationReason::NaturalEnd);
    assert_eq!(result.rounds, 4);
    assert!(driver.policy().is_valid_walk(&result.transcript.speakers()));
}

#[tokio::test]
async fn test_round_limit_before_aggregator_is_no_aggregator_output() {
    let driver = ring_driver(abcd(), 2);

    let outcome = driver.run("plan a trip").await;
    let summary = RunSummary::from(&outcome);
    assert!(!summary.success);
    assert_eq!(summary.result, None);
    assert_eq!(summary.termination_reason, TerminationReason::RoundLimit);

    match outcome {
        Err(err @ SessionError::NoAggregatorOutput { .. }) => {
            assert_eq!(err.transcript().speakers(), vec!["A", "B"]);
            assert_eq!(
                err.to_string(),
                "trip report could not be completed within the allotted turns (ROUND_LIMIT)"
            );
        }
        other => panic!("expected NoAggregatorOutput, got {:?}", other),
    }
}

#[tokio::test]
async fn test_seed_alone_can_exhaust_the_budget() {
    let driver = ring_driver(abcd(), 1);
    let err = driver.run("plan a trip").await.unwrap_err();
    assert_eq!(err.termination_reason(), TerminationReason::RoundLimit);
    assert_eq!(err.transcript().speakers(), vec!["A"]);
}

#[tokio::test]
async fn test_round_count_never_exceeds_budget() {
    // With the priority list always favouring the proxy, the aggregator is never reached.
    for max_rounds in 1..=6 {
        let registry = registry_of(vec![scripted("P"), scripted("X"), scripted("Y")]);
        let policy = TransitionPolicy::builder()
            .allow("P", ["X", "P"])
            .allow("X", ["Y", "P"])
            .allow("Y", ["P"])
            .initiator("P")
            .aggregator("Y")
            .max_rounds(max_rounds)
            .build(&registry)
            .unwrap();
        let driver = SessionDriver::new(registry, policy)
            .unwrap()
            .with_selector(Arc::new(FixedPriority::new(["P"])))
            .unwrap();

        let err = driver.run("go").await.unwrap_err();
        let speakers = err.transcript().speakers();
        assert_eq!(speakers.len(), max_rounds);
        assert!(speakers.iter().all(|s| *s == "P"));
        assert!(driver.policy().is_valid_walk(&speakers));
        assert_eq!(err.termination_reason(), TerminationReason::RoundLimit);
    }
}

#[tokio::test]
async fn test_declared_order_resolves_multiple_candidates() {
    let registry = registry_of(vec![scripted("P"), scripted("X"), scripted("Y")]);
    let policy = TransitionPolicy::builder()
        .allow("P", ["X", "P"])
        .allow("X", ["Y", "P"])
        .allow("Y", ["P"])
        .initiator("P")
        .aggregator("Y")
        .max_rounds(6)
        .build(&registry)
        .unwrap();
    let driver = SessionDriver::new(registry, policy).unwrap();
    assert_eq!(driver.selector_name(), "DeclaredOrder");

    let result = driver.run("go").await.unwrap();
    assert_eq!(result.transcript.speakers(), vec!["P", "X", "Y"]);
    assert_eq!(result.report, "Y reply");
}

#[tokio::test]
async fn test_always_failing_role_leaves_transcript_untouched() {
    let roles = vec![
        scripted("A"),
        scripted("B"),
        Role::from_fn("C", "", |_| Err("service unavailable".into())),
        scripted("D"),
    ];
    let recorder = Arc::new(Recorder::default());
    let driver = ring_driver(roles, 4).with_event_handler(recorder.clone());

    match driver.run("plan a trip").await {
        Err(SessionError::SpeakerFailure {
            role,
            attempts,
            source,
            transcript,
        }) => {
            assert_eq!(role, "C");
            assert_eq!(attempts, 3);
            assert_eq!(
                source,
                SpeakerInvocationError::Backend {
                    role: "C".to_string(),
                    message: "service unavailable".to_string(),
                }
            );
            assert_eq!(transcript.speakers(), vec!["A", "B"]);
        }
        other => panic!("expected SpeakerFailure, got {:?}", other),
    }

    let events = recorder.events.lock().unwrap();
    let retries = events
        .iter()
        .filter(|e| matches!(e, SessionEvent::TurnRetrying { .. }))
        .count();
    assert_eq!(retries, 2);
    assert!(matches!(
        events.last(),
        Some(SessionEvent::SessionTerminated {
            reason: TerminationReason::SpeakerFailure,
            rounds: 2,
            ..
        })
    ));
}

#[tokio::test]
async fn test_transient_failure_is_retried() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let flaky = Role::from_fn("C", "", move |_| {
        if counter.fetch_add(1, Ordering::SeqCst) == 0 {
            Err("connection reset".into())
        } else {
            Ok("C recovered".to_string())
        }
    });
    let roles = vec![scripted("A"), scripted("B"), flaky, scripted("D")];
    let recorder = Arc::new(Recorder::default());
    let driver = ring_driver(roles, 4).with_event_handler(recorder.clone());

    let result = driver.run("plan a trip").await.unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 2);
    assert_eq!(result.transcript.entries()[2].content(), "C recovered");
    assert_eq!(result.termination_reason, TerminationReason::NaturalEnd);

    let events = recorder.events.lock().unwrap();
    assert!(events.iter().any(|e| matches!(
        e,
        SessionEvent::TurnRetrying { round: 3, attempt: 1, role, .. } if role == "C"
    )));
}

#[tokio::test]
async fn test_blank_reply_counts_as_failure() {
    let roles = vec![
        scripted("A"),
        Role::from_fn("B", "", |_| Ok("  ".to_string())),
        scripted("C"),
        scripted("D"),
    ];
    let driver = ring_driver(roles, 4);
    match driver.run("plan a trip").await {
        Err(SessionError::SpeakerFailure { source, transcript, .. }) => {
            assert_eq!(
                source,
                SpeakerInvocationError::EmptyReply {
                    role: "B".to_string()
                }
            );
            assert_eq!(transcript.len(), 1);
        }
        other => panic!("expected SpeakerFailure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_slow_role_times_out() {
    let roles = vec![
        scripted("A"),
        scripted("B"),
        Role::new(
            "C",
            "",
            Arc::new(Sleepy {
                delay: Duration::from_secs(5),
            }),
        ),
        scripted("D"),
    ];
    let retry = RetryPolicy {
        max_attempts: 2,
        initial_backoff: Duration::from_millis(1),
        max_backoff: Duration::from_millis(1),
        turn_timeout: Duration::from_millis(30),
    };
    let driver = ring_driver(roles, 4).with_retry_policy(retry);

    match driver.run("plan a trip").await {
        Err(SessionError::SpeakerFailure {
            attempts, source, ..
        }) => {
            assert_eq!(attempts, 2);
            assert_eq!(
                source,
                SpeakerInvocationError::Timeout {
                    role: "C".to_string(),
                    after: Duration::from_millis(30),
                }
            );
        }
        other => panic!("expected SpeakerFailure, got {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_abandons_in_flight_turn() {
    let roles = vec![
        scripted("A"),
        Role::new(
            "B",
            "",
            Arc::new(Sleepy {
                delay: Duration::from_secs(30),
            }),
        ),
        scripted("C"),
        scripted("D"),
    ];
    let driver = ring_driver(roles, 4).with_retry_policy(RetryPolicy {
        turn_timeout: Duration::from_secs(60),
        ..fast_retry()
    });

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    match driver.run_with_cancel("plan a trip", cancel).await {
        Err(SessionError::Cancelled { transcript }) => {
            assert_eq!(transcript.speakers(), vec!["A"]);
        }
        other => panic!("expected Cancelled, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(10));
}

#[tokio::test]
async fn test_cancel_before_run() {
    let driver = ring_driver(abcd(), 4);
    let cancel = CancelToken::new();
    cancel.cancel();

    let outcome = driver.run_with_cancel("plan a trip", cancel).await;
    assert_eq!(
        RunSummary::from(&outcome).termination_reason,
        TerminationReason::Cancelled
    );
    assert_eq!(outcome.unwrap_err().transcript().len(), 1);
}

#[tokio::test]
async fn test_concurrent_sessions_do_not_share_state() {
    let roles = vec![
        scripted("A"),
        scripted("B"),
        scripted("C"),
        Role::from_fn("D", "", |history| {
            Ok(format!("report for {}", history[0].content()))
        }),
    ];
    let driver = ring_driver(roles, 4);

    let mut handles = Vec::new();
    for i in 0..8 {
        let driver = driver.clone();
        handles.push(tokio::spawn(async move {
            driver.run(&format!("trip {}", i)).await
        }));
    }

    let mut ids = HashSet::new();
    for (i, handle) in handles.into_iter().enumerate() {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.report, format!("report for trip {}", i));
        assert_eq!(result.transcript.len(), 4);
        ids.insert(result.session_id);
    }
    assert_eq!(ids.len(), 8);
}

#[tokio::test]
async fn test_events_follow_the_session() {
    let recorder = Arc::new(Recorder::default());
    let driver = ring_driver(abcd(), 4).with_event_handler(recorder.clone());
    let result = driver.run("plan a trip").await.unwrap();

    let events = recorder.events.lock().unwrap();
    assert_eq!(events.len(), 8);
    assert!(matches!(
        &events[0],
        SessionEvent::SessionStarted { initiator, max_rounds: 4, .. } if initiator == "A"
    ));
    assert!(matches!(
        &events[1],
        SessionEvent::SpeakerSelected { round: 2, role, reason, .. }
            if role == "B" && reason == "single candidate"
    ));
    assert!(matches!(
        &events[7],
        SessionEvent::SessionTerminated { session_id, reason: TerminationReason::NaturalEnd, rounds: 4 }
            if *session_id == result.session_id
    ));
}

#[tokio::test]
async fn test_keyword_stop_and_latest_aggregator_reply() {
    let roles = vec![
        scripted("A"),
        scripted("B"),
        scripted("C"),
        Role::from_fn("D", "", |history| {
            if history.len() > 4 {
                Ok("final DONE".to_string())
            } else {
                Ok("draft".to_string())
            }
        }),
    ];
    let driver = ring_driver(roles, 12).with_stop_condition(Arc::new(KeywordStop::new("DONE")));

    let result = driver.run("plan a trip").await.unwrap();
    assert_eq!(result.rounds, 8);
    assert_eq!(result.report, "final DONE");
    assert_eq!(result.termination_reason, TerminationReason::NaturalEnd);

    let first = extract_aggregator_output(&result.transcript, "D");
    let second = extract_aggregator_output(&result.transcript, "D");
    assert_eq!(first, second);
    assert_eq!(first, Some("final DONE"));
}

fn writers_room() -> (RoleRegistry, TransitionPolicy) {
    let registry = registry_of(vec![scripted("Planner"), scripted("Critic"), scripted("Writer")]);
    let policy = TransitionPolicy::builder()
        .allow("Planner", ["Critic", "Writer"])
        .allow("Critic", ["Planner"])
        .allow("Writer", ["Planner"])
        .initiator("Planner")
        .aggregator("Writer")
        .max_rounds(3)
        .build(&registry)
        .unwrap();
    (registry, policy)
}

#[tokio::test]
async fn test_llm_selector_picks_named_candidate() {
    let (registry, policy) = writers_room();
    let client = Arc::new(MockClient {
        reply: Some("Writer, definitely.".to_string()),
    });
    let driver = SessionDriver::new(registry, policy)
        .unwrap()
        .with_selector(Arc::new(LlmSelector::new(client)))
        .unwrap();

    let result = driver.run("draft a trip").await.unwrap();
    assert_eq!(result.transcript.speakers(), vec!["Planner", "Writer"]);
    assert_eq!(result.report, "Writer reply");
}

#[tokio::test]
async fn test_llm_selector_falls_back_to_declared_order() {
    let (registry, policy) = writers_room();
    let client = Arc::new(MockClient { reply: None });
    let driver = SessionDriver::new(registry, policy)
        .unwrap()
        .with_selector(Arc::new(LlmSelector::new(client)))
        .unwrap();

    let err = driver.run("draft a trip").await.unwrap_err();
    assert_eq!(err.transcript().speakers(), vec!["Planner", "Critic", "Planner"]);
    assert_eq!(err.termination_reason(), TerminationReason::RoundLimit);
}

struct Rogue {
    outsider: Arc<Role>,
}

#[async_trait]
impl SelectorPolicy for Rogue {
    async fn select(
        &self,
        _candidates: &[Arc<Role>],
        _transcript: &Transcript,
    ) -> Result<Arc<Role>, SpeakerInvocationError> {
        Ok(Arc::clone(&self.outsider))
    }

    fn name(&self) -> &str {
        "Rogue"
    }
}

#[tokio::test]
async fn test_selector_outside_candidates_is_rejected() {
    let (registry, policy) = writers_room();
    let outsider = Arc::clone(registry.get("Planner").unwrap());
    let driver = SessionDriver::new(registry, policy)
        .unwrap()
        .with_selector(Arc::new(Rogue { outsider }))
        .unwrap();

    match driver.run("draft a trip").await {
        Err(SessionError::SpeakerFailure {
            source: SpeakerInvocationError::Selection(_),
            transcript,
            ..
        }) => assert_eq!(transcript.len(), 1),
        other => panic!("expected a selection failure, got {:?}", other),
    }
}

/// Deliberates for `delay` before settling on the first candidate.
struct Indecisive {
    delay: Duration,
}

#[async_trait]
impl SelectorPolicy for Indecisive {
    async fn select(
        &self,
        candidates: &[Arc<Role>],
        _transcript: &Transcript,
    ) -> Result<Arc<Role>, SpeakerInvocationError> {
        tokio::time::sleep(self.delay).await;
        Ok(Arc::clone(&candidates[0]))
    }

    fn name(&self) -> &str {
        "Indecisive"
    }
}

#[tokio::test]
async fn test_cancel_interrupts_a_slow_selector() {
    let registry = registry_of(vec![scripted("P"), scripted("X")]);
    let policy = TransitionPolicy::builder()
        .allow("P", ["X", "P"])
        .allow("X", ["P"])
        .initiator("P")
        .aggregator("X")
        .max_rounds(4)
        .build(&registry)
        .unwrap();
    let driver = SessionDriver::new(registry, policy)
        .unwrap()
        .with_retry_policy(RetryPolicy {
            turn_timeout: Duration::from_secs(60),
            ..fast_retry()
        })
        .with_selector(Arc::new(Indecisive {
            delay: Duration::from_secs(3),
        }))
        .unwrap();

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let started = std::time::Instant::now();
    match driver.run_with_cancel("plan a trip", cancel).await {
        Err(SessionError::Cancelled { transcript }) => {
            assert_eq!(transcript.speakers(), vec!["P"]);
        }
        other => panic!("expected Cancelled, got {:?}", other),
    }
    assert!(started.elapsed() < Duration::from_secs(1));
}

fn pipeline_driver() -> SessionDriver {
    let registry = registry_of(vec![scripted("A"), scripted("B"), scripted("C")]);
    let policy = TransitionPolicy::builder()
        .allow("A", ["B"])
        .allow("B", ["C"])
        .initiator("A")
        .aggregator("C")
        .max_rounds(10)
        .build(&registry)
        .unwrap();
    SessionDriver::new(registry, policy)
        .unwrap()
        .with_retry_policy(fast_retry())
}

#[tokio::test]
async fn test_pipeline_ending_at_the_aggregator() {
    let result = pipeline_driver().run("plan a trip").await.unwrap();
    assert_eq!(result.transcript.speakers(), vec!["A", "B", "C"]);
    assert_eq!(result.report, "C reply");
    assert_eq!(result.termination_reason, TerminationReason::NaturalEnd);

    // A stop condition that never fires still cannot walk past a sink.
    let unmatched = pipeline_driver().with_stop_condition(Arc::new(KeywordStop::new("NEVER")));
    let result = unmatched.run("plan a trip").await.unwrap();
    assert_eq!(result.transcript.speakers(), vec!["A", "B", "C"]);
    assert_eq!(result.rounds, 3);
    assert_eq!(result.termination_reason, TerminationReason::NaturalEnd);

    // Reaching the sink on the last permitted round is still a natural end.
    let registry = registry_of(vec![scripted("A"), scripted("B"), scripted("C")]);
    let policy = TransitionPolicy::builder()
        .allow("A", ["B"])
        .allow("B", ["C"])
        .initiator("A")
        .aggregator("C")
        .max_rounds(3)
        .build(&registry)
        .unwrap();
    let tight = SessionDriver::new(registry, policy)
        .unwrap()
        .with_stop_condition(Arc::new(KeywordStop::new("NEVER")));
    let result = tight.run("plan a trip").await.unwrap();
    assert_eq!(result.termination_reason, TerminationReason::NaturalEnd);
}

#[test]
fn test_unregistered_role_fails_before_any_session() {
    let registry = registry_of(abcd());
    let err = TransitionPolicy::builder()
        .allow("A", ["B"])
        .allow("B", ["Ghost"])
        .initiator("A")
        .aggregator("B")
        .max_rounds(4)
        .build(&registry)
        .unwrap_err();
    assert!(matches!(err, ConfigurationError::UnknownRole { ref name, .. } if name == "Ghost"));

    // A policy validated against one registry cannot be paired with a smaller one.
    let policy = ring_policy(&registry, 4);
    let smaller = registry_of(vec![scripted("A"), scripted("B")]);
    let err = SessionDriver::new(smaller, policy).err();
    assert_eq!(
        err,
        Some(ConfigurationError::UnknownRole {
            context: "transition policy".to_string(),
            name: "C".to_string(),
        })
    );
}

#[test]
fn test_selector_priority_is_validated() {
    let registry = registry_of(abcd());
    let policy = ring_policy(&registry, 4);
    let err = SessionDriver::new(registry, policy)
        .unwrap()
        .with_selector(Arc::new(FixedPriority::new(["A", "Nobody"])))
        .err();
    assert!(matches!(err, Some(ConfigurationError::UnknownRole { ref context, .. }) if context == "selector priority"));
}
