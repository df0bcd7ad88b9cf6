//! Natural-end detection.
//!
//! After every appended turn the scheduler asks its [`StopCondition`] whether the conversation
//! has reached its natural end. The round budget is checked separately and only after this.

use crate::transcript::TranscriptEntry;
use crate::transition_policy::TransitionPolicy;

pub trait StopCondition: Send + Sync {
    /// `entry` is the turn that was just appended.
    fn is_natural_end(&self, entry: &TranscriptEntry, policy: &TransitionPolicy) -> bool;

    fn name(&self) -> &str;
}

/// The conversation is over as soon as the aggregator has spoken.
#[derive(Debug, Clone, Copy, Default)]
pub struct AggregatorSpoke;

impl StopCondition for AggregatorSpoke {
    fn is_natural_end(&self, entry: &TranscriptEntry, policy: &TransitionPolicy) -> bool {
        entry.speaker() == policy.aggregator()
    }

    fn name(&self) -> &str {
        "AggregatorSpoke"
    }
}

/// The conversation is over when a turn contains a marker such as `TERMINATE`.
///
/// Matching is case-sensitive and ignores surrounding whitespace of the marker itself. The seed
/// message is never checked, only turns produced by the scheduler.
#[derive(Debug, Clone)]
pub struct KeywordStop {
    marker: String,
    only_from: Option<String>,
}

impl KeywordStop {
    pub fn new(marker: impl Into<String>) -> Self {
        Self {
            marker: marker.into().trim().to_string(),
            only_from: None,
        }
    }

    /// Only honour the marker when it comes from the named role.
    pub fn only_from(mut self, role: impl Into<String>) -> Self {
        self.only_from = Some(role.into());
        self
    }
}

impl StopCondition for KeywordStop {
    fn is_natural_end(&self, entry: &TranscriptEntry, _policy: &TransitionPolicy) -> bool {
        if let Some(role) = &self.only_from {
            if entry.speaker() != role {
                return false;
            }
        }
        !self.marker.is_empty() && entry.content().contains(&self.marker)
    }

    fn name(&self) -> &str {
        "KeywordStop"
    }
}
