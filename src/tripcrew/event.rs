//! Session event system.
//!
//! Implement [`EventHandler`] and attach it with
//! [`SessionDriver::with_event_handler`](crate::session::SessionDriver::with_event_handler) to
//! observe sessions as they run: speaker selection, completed turns, retries, and termination.
//! The handler is shared across every session the driver runs, so events carry the
//! `session_id` of the session that produced them.
//!
//! # Event Flow (travel crew, happy path)
//!
//! ```text
//! SessionStarted { initiator: "User_Proxy_Agent", max_rounds: 6 }
//!   ├─ SpeakerSelected { round: 2, role: "Destination_Expert_Agent", reason: "DeclaredOrder" }
//!   ├─ TurnCompleted   { round: 2, role: "Destination_Expert_Agent" }
//!   ├─ SpeakerSelected { round: 3, role: "Itinerary_Creator_Agent", reason: "DeclaredOrder" }
//!   ├─ TurnRetrying    { round: 3, attempt: 1, error: "timed out" }
//!   ├─ TurnCompleted   { round: 3, role: "Itinerary_Creator_Agent" }
//!   └─ ...
//! SessionTerminated { reason: NaturalEnd, rounds: 5 }
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use tripcrew::event::{EventHandler, SessionEvent};
//! use async_trait::async_trait;
//!
//! struct Progress;
//!
//! #[async_trait]
//! impl EventHandler for Progress {
//!     async fn on_session_event(&self, event: &SessionEvent) {
//!         if let SessionEvent::TurnCompleted { round, role, .. } = event {
//!             println!("round {}: {} finished", round, role);
//!         }
//!     }
//! }
//! ```

use crate::scheduler::TerminationReason;
use async_trait::async_trait;

/// Events emitted by a [`SessionDriver`](crate::session::SessionDriver) during `run()`.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The transcript was seeded with the initiating message.
    SessionStarted {
        session_id: String,
        initiator: String,
        max_rounds: usize,
    },

    /// A speaker was chosen for the upcoming round.
    SpeakerSelected {
        session_id: String,
        /// 1-based round the selected speaker will fill.
        round: usize,
        role: String,
        /// The permitted candidates, in declared order.
        candidates: Vec<String>,
        /// `"single candidate"` or the selector's name.
        reason: String,
    },

    /// A turn was appended to the transcript.
    TurnCompleted {
        session_id: String,
        round: usize,
        role: String,
        response_length: usize,
    },

    /// An attempt failed and the turn will be retried.
    TurnRetrying {
        session_id: String,
        round: usize,
        role: String,
        /// 1-based attempt that just failed.
        attempt: u32,
        error: String,
    },

    /// The session reached `TERMINATED`.
    SessionTerminated {
        session_id: String,
        reason: TerminationReason,
        rounds: usize,
    },
}

/// Receives [`SessionEvent`]s. The default implementation is a no-op.
///
/// The `Send + Sync` bound allows one handler to be shared by concurrent sessions via
/// `Arc<dyn EventHandler>`; keep internal state behind appropriate synchronization.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn on_session_event(&self, _event: &SessionEvent) {}
}
