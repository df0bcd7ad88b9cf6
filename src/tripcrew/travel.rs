//! The travel-planner crew.
//!
//! Five roles cooperate to turn a free-text trip request into a report:
//!
//! ```text
//! User_Proxy_Agent ──▶ Destination_Expert_Agent ──▶ Itinerary_Creator_Agent
//!        ▲  ◀──────────────────┘  ◀───────────────────────┘        │
//!        │                                                          ▼
//!        └──────── Report_Writer_Agent ◀──────────── Budget_Analyst_Agent
//! ```
//!
//! Every specialist may hand back to the proxy; the proxy may also re-enter itself. With the
//! default declared-order tie-break the walk is proxy, destination, itinerary, budget, report,
//! and the session ends naturally once the report writer has spoken.

use crate::client_wrapper::ClientWrapper;
use crate::config::{CrewConfig, RoleConfig};
use crate::error::ConfigurationError;
use crate::role::{Capability, LlmCapability};
use crate::session::SessionDriver;
use std::collections::BTreeMap;
use std::sync::Arc;

pub const USER_PROXY: &str = "User_Proxy_Agent";
pub const DESTINATION_EXPERT: &str = "Destination_Expert_Agent";
pub const ITINERARY_CREATOR: &str = "Itinerary_Creator_Agent";
pub const BUDGET_ANALYST: &str = "Budget_Analyst_Agent";
pub const REPORT_WRITER: &str = "Report_Writer_Agent";

/// Round budget of the preset, seed included.
pub const MAX_ROUNDS: i64 = 6;

const USER_PROXY_INSTRUCTIONS: &str = "You relay the traveller's request to the planning team.";

const DESTINATION_EXPERT_INSTRUCTIONS: &str = "\
You are a destination specialist with broad knowledge of travel destinations worldwide.
- Work out what the traveller wants (climate, activities, culture, pace).
- Recommend exactly one destination and explain why it fits.
- Cover main attractions, the best time to visit and local customs.
- Take seasons, upcoming events and travel advisories into account.
- Do not write an itinerary; another team member does that.
Start your answer with the header DESTINATION SUMMARY.";

const ITINERARY_CREATOR_INSTRUCTIONS: &str = "\
You plan detailed travel itineraries for the destination chosen by the destination specialist.
- Lay out a schedule for every day of the trip.
- Follow the traveller's preferences for activities, pace and must-see sights.
- Mix well-known attractions with local experiences.
- Account for travel times, opening hours and meals.
- Keep the plan within the traveller's budget.
Start your answer with the header ITINERARY, followed by one section per day.";

const BUDGET_ANALYST_INSTRUCTIONS: &str = "\
You are responsible for the money side of the trip.
- Check the traveller's overall budget against the proposed itinerary.
- Estimate costs for transport, lodging, food and activities.
- Point out where the traveller can save without losing the highlights.
- Give a complete cost breakdown for the trip.
- Add practical advice on payment methods and travel insurance.
Start your answer with the header BUDGET.";

const REPORT_WRITER_INSTRUCTIONS: &str = "\
You compile the final travel report from the team's contributions: the destination \
recommendation, the day-by-day itinerary and the budget analysis. Collect them, keep the key \
points (unique experiences, money-saving tips) and present one clear document with these sections:
Introduction: a short welcome and overview of the trip.
Destination Summary: the chosen destination and why it was recommended.
Cultural Tips: local customs, etiquette and norms.
Itinerary: the daily plan including accommodation.
Transportation: how to get around at the destination and what it costs.
Budget Breakdown: the cost estimates and financial advice.
Packing List: essential and optional items to bring.
Conclusion: a closing summary with final recommendations.";

fn role(name: &str, instructions: &str) -> RoleConfig {
    RoleConfig {
        name: name.to_string(),
        instructions: instructions.to_string(),
        model: None,
    }
}

fn edge(successors: &[&str]) -> Vec<String> {
    successors.iter().map(|s| s.to_string()).collect()
}

/// The preset as a plain configuration, e.g. to save and edit it as JSON.
pub fn travel_config() -> CrewConfig {
    let mut transitions = BTreeMap::new();
    transitions.insert(USER_PROXY.to_string(), edge(&[DESTINATION_EXPERT, USER_PROXY]));
    transitions.insert(DESTINATION_EXPERT.to_string(), edge(&[ITINERARY_CREATOR, USER_PROXY]));
    transitions.insert(ITINERARY_CREATOR.to_string(), edge(&[BUDGET_ANALYST, USER_PROXY]));
    transitions.insert(BUDGET_ANALYST.to_string(), edge(&[REPORT_WRITER, USER_PROXY]));
    transitions.insert(REPORT_WRITER.to_string(), edge(&[USER_PROXY]));

    CrewConfig {
        roles: vec![
            role(USER_PROXY, USER_PROXY_INSTRUCTIONS),
            role(DESTINATION_EXPERT, DESTINATION_EXPERT_INSTRUCTIONS),
            role(ITINERARY_CREATOR, ITINERARY_CREATOR_INSTRUCTIONS),
            role(BUDGET_ANALYST, BUDGET_ANALYST_INSTRUCTIONS),
            role(REPORT_WRITER, REPORT_WRITER_INSTRUCTIONS),
        ],
        transitions,
        initiator: Some(USER_PROXY.to_string()),
        aggregator: Some(REPORT_WRITER.to_string()),
        max_rounds: MAX_ROUNDS,
        retry: None,
        selector: None,
        priority: None,
        stop_marker: None,
    }
}

/// The travel crew with every role answered by `client`.
pub fn travel_crew(client: Arc<dyn ClientWrapper>) -> Result<SessionDriver, ConfigurationError> {
    travel_config().build(|_| -> Arc<dyn Capability> {
        Arc::new(LlmCapability::new(Arc::clone(&client)))
    })
}
