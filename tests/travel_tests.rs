use async_trait::async_trait;
use std::error::Error;
use std::sync::{Arc, Mutex};
use tripcrew::client_wrapper::{ClientWrapper, Message, MessageRole};
use tripcrew::scheduler::TerminationReason;
use tripcrew::travel::{
    travel_config, travel_crew, BUDGET_ANALYST, DESTINATION_EXPERT, ITINERARY_CREATOR,
    REPORT_WRITER, USER_PROXY,
};

/// Answers every call with a numbered reply and keeps the requests it received.
#[derive(Default)]
struct RecordingClient {
    requests: Mutex<Vec<Vec<Message>>>,
}

#[async_trait]
impl ClientWrapper for RecordingClient {
    async fn send_message(
        &self,
        messages: &[Message],
    ) -> Result<Message, Box<dyn Error + Send + Sync>> {
        let mut requests = self.requests.lock().unwrap();
        requests.push(messages.to_vec());
        Ok(Message::new(
            MessageRole::Assistant,
            format!("reply #{}", requests.len()),
        ))
    }

    fn model_name(&self) -> &str {
        "recording-mock"
    }
}

#[tokio::test]
async fn test_travel_crew_walks_the_pipeline() {
    let client = Arc::new(RecordingClient::default());
    let crew = travel_crew(client.clone()).unwrap();

    let result = crew
        .run("Ten days in Japan in April, mid-range budget, love food and temples")
        .await
        .unwrap();

    assert_eq!(
        result.transcript.speakers(),
        vec![
            USER_PROXY,
            DESTINATION_EXPERT,
            ITINERARY_CREATOR,
            BUDGET_ANALYST,
            REPORT_WRITER
        ]
    );
    assert_eq!(result.termination_reason, TerminationReason::NaturalEnd);
    assert_eq!(result.rounds, 5);
    assert_eq!(result.report, "reply #4");
}

#[tokio::test]
async fn test_report_writer_sees_the_whole_conversation() {
    let client = Arc::new(RecordingClient::default());
    let crew = travel_crew(client.clone()).unwrap();
    crew.run("A weekend in Lisbon").await.unwrap();

    let requests = client.requests.lock().unwrap();
    assert_eq!(requests.len(), 4);

    let last = &requests[3];
    assert_eq!(last.len(), 5);
    assert_eq!(last[0].role, MessageRole::System);
    assert!(last[0].content.contains("Packing List"));
    assert_eq!(
        &*last[1].content,
        "[User_Proxy_Agent]: A weekend in Lisbon"
    );
    assert_eq!(&*last[4].content, "[Budget_Analyst_Agent]: reply #3");
    assert!(last[1..].iter().all(|m| m.role == MessageRole::User));
}

#[test]
fn test_preset_graph_and_budget() {
    let config = travel_config();
    assert_eq!(config.max_rounds, 6);
    assert_eq!(config.roles.len(), 5);
    assert_eq!(
        config.transitions[USER_PROXY],
        vec![DESTINATION_EXPERT.to_string(), USER_PROXY.to_string()]
    );
    assert_eq!(config.transitions[REPORT_WRITER], vec![USER_PROXY.to_string()]);

    let crew = travel_crew(Arc::new(RecordingClient::default())).unwrap();
    let policy = crew.policy();
    assert_eq!(policy.initiator(), USER_PROXY);
    assert_eq!(policy.aggregator(), REPORT_WRITER);
    assert!(policy.is_allowed(BUDGET_ANALYST, REPORT_WRITER));
    assert!(!policy.is_allowed(DESTINATION_EXPERT, BUDGET_ANALYST));
}
