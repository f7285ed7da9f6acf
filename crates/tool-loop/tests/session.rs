use std::time::Duration;

use serde_json::Value;
use tool_loop::SessionBuilder;
use tool_loop::core::{CancellationToken, DispatchError, RetryPolicy};
use tool_loop_model::{ModelMessage, ToolCallResult};
use tool_loop_test_model::{PresetEvent, PresetResponse, TestModelProvider};

fn tool_results(messages: &[ModelMessage]) -> Vec<&ToolCallResult> {
    messages
        .iter()
        .filter_map(|msg| match msg {
            ModelMessage::Tool(result) => Some(result),
            _ => None,
        })
        .collect()
}

/// Ids of tool requests still unanswered when a user message follows.
fn dangling_call_ids(messages: &[ModelMessage]) -> Vec<String> {
    let mut pending: Vec<String> = Vec::new();
    for msg in messages {
        match msg {
            ModelMessage::Assistant(turn) => {
                pending.extend(turn.tool_calls.iter().map(|req| req.id.clone()));
            }
            ModelMessage::Tool(result) => pending.retain(|id| *id != result.id),
            ModelMessage::User(_) if !pending.is_empty() => return pending,
            _ => {}
        }
    }
    Vec::new()
}

fn fast_retry() -> RetryPolicy {
    RetryPolicy {
        max_attempts: 2,
        initial_interval: Duration::from_millis(1),
        max_interval: Duration::from_millis(2),
        multiplier: 2.0,
        max_elapsed_time: Duration::from_secs(1),
    }
}

#[tokio::test]
async fn test_registers_all_tools() {
    let session = SessionBuilder::with_model_provider(TestModelProvider::default())
        .build()
        .unwrap();
    let names: Vec<_> = session
        .registry()
        .declarations()
        .iter()
        .map(|tool| tool.name.as_str())
        .collect();
    assert_eq!(
        names,
        [
            "get_random_numbers",
            "get_temperature",
            "get_historical_temperature",
            "get_current_time",
            "calculator",
            "get_stock_market_data",
            "calculate_difference",
        ]
    );
}

#[tokio::test]
async fn test_calculator_round_trip() {
    let mut provider = TestModelProvider::default();
    provider.add_assistant_turn(PresetResponse::with_events([PresetEvent::tool_call(
        "call_1",
        "calculator",
        r#"{"num1": 2, "num2": 3, "operator": "+"}"#,
    )]));
    provider.add_assistant_turn(PresetResponse::text("2 + 3 is 5."));

    let mut session = SessionBuilder::with_model_provider(provider.clone())
        .with_system_prompt("Use tools.")
        .build()
        .unwrap();
    let answer = session.ask("What is 2 + 3?").await.unwrap();
    assert_eq!(answer.text, "2 + 3 is 5.");
    assert_eq!(answer.iterations, 2);
    assert_eq!(answer.tool_calls, 1);

    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[0].tools.len(), 7);
    let results = tool_results(&requests[1].messages);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "call_1");
    assert_eq!(results[0].content, "5");
}

#[tokio::test]
async fn test_tool_errors_are_observations() {
    let mut provider = TestModelProvider::default();
    provider.add_assistant_turn(PresetResponse::with_events([
        PresetEvent::tool_call(
            "call_1",
            "get_stock_market_data",
            r#"{"index": "NotAnIndex"}"#,
        ),
        PresetEvent::tool_call(
            "call_2",
            "calculator",
            r#"{"num1": 5, "num2": 0, "operator": "/"}"#,
        ),
    ]));
    provider.add_assistant_turn(PresetResponse::text("Neither worked."));

    let mut session = SessionBuilder::with_model_provider(provider.clone())
        .with_stock_data_path("/nonexistent/stocks.csv")
        .build()
        .unwrap();
    let answer = session.ask("Try both").await.unwrap();
    assert_eq!(answer.text, "Neither worked.");

    let requests = provider.requests();
    let results = tool_results(&requests[1].messages);
    let errors: Vec<String> = results
        .iter()
        .map(|r| {
            let value: Value = serde_json::from_str(&r.content).unwrap();
            value["error"].as_str().unwrap().to_owned()
        })
        .collect();
    assert_eq!(errors, ["UnknownIndex", "DivisionByZero"]);
}

#[tokio::test]
async fn test_conversation_carries_over() {
    let mut provider = TestModelProvider::default();
    provider.add_assistant_turn(PresetResponse::text("Hello!"));
    provider.add_assistant_turn(PresetResponse::text("You said hi."));

    let mut session = SessionBuilder::with_model_provider(provider.clone())
        .with_system_prompt("Be brief.")
        .build()
        .unwrap();
    session.ask("Hi").await.unwrap();
    let answer = session.ask("What did I say?").await.unwrap();
    assert_eq!(answer.text, "You said hi.");

    let requests = provider.requests();
    let second = &requests[1].messages;
    assert_eq!(second.len(), 4);
    assert_eq!(second[0], ModelMessage::System("Be brief.".to_owned()));
    assert_eq!(second[1], ModelMessage::User("Hi".to_owned()));
    assert_eq!(second[3], ModelMessage::User("What did I say?".to_owned()));
    assert_eq!(session.conversation().len(), 5);
}

#[tokio::test]
async fn test_iteration_limit() {
    let mut provider = TestModelProvider::default();
    provider.add_assistant_turn(PresetResponse::with_events([PresetEvent::tool_call(
        "call_1",
        "get_random_numbers",
        r#"{"min": 1, "max": 1, "count": 5}"#,
    )]));

    let mut session = SessionBuilder::with_model_provider(provider)
        .with_max_iterations(1)
        .build()
        .unwrap();
    let err = session.ask("Roll").await.unwrap_err();
    assert!(matches!(err, DispatchError::IterationLimitExceeded { limit: 1 }));
}

#[tokio::test]
async fn test_iteration_limit_answers_pending_calls() {
    let mut provider = TestModelProvider::default();
    provider.add_assistant_turn(PresetResponse::with_events([PresetEvent::tool_call(
        "call_9",
        "get_random_numbers",
        r#"{"min": 1, "max": 1, "count": 5}"#,
    )]));
    provider.add_assistant_turn(PresetResponse::text("Giving up."));

    let mut session = SessionBuilder::with_model_provider(provider.clone())
        .with_max_iterations(1)
        .build()
        .unwrap();
    session.ask("Roll").await.unwrap_err();
    assert_eq!(session.conversation().unanswered_calls().len(), 1);

    assert_eq!(session.ask("Stop").await.unwrap().text, "Giving up.");
    let requests = provider.requests();
    assert!(dangling_call_ids(&requests[1].messages).is_empty());
    let results = tool_results(&requests[1].messages);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "call_9");
    let observation: Value = serde_json::from_str(&results[0].content).unwrap();
    assert_eq!(observation["error"], "NotExecuted");
}

#[tokio::test]
async fn test_unknown_tool_keeps_session_usable() {
    let mut provider = TestModelProvider::default();
    provider.add_assistant_turn(PresetResponse::with_events([PresetEvent::tool_call(
        "call_1",
        "launch_rocket",
        "{}",
    )]));
    provider.add_assistant_turn(PresetResponse::text("Sorry."));

    let mut session = SessionBuilder::with_model_provider(provider.clone())
        .with_retry_policy(fast_retry())
        .build()
        .unwrap();
    let err = session.ask("Launch").await.unwrap_err();
    assert!(matches!(err, DispatchError::UnknownTool { ref name } if name == "launch_rocket"));
    // System, user and the assistant turn that asked for the tool.
    assert_eq!(session.conversation().len(), 3);

    let answer = session.ask("Never mind").await.unwrap();
    assert_eq!(answer.text, "Sorry.");

    // Every request is answered before the next user message.
    let requests = provider.requests();
    assert_eq!(requests.len(), 2);
    assert!(dangling_call_ids(&requests[1].messages).is_empty());
    let results = tool_results(&requests[1].messages);
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].id, "call_1");
    assert_eq!(results[0].name, "launch_rocket");
    assert!(matches!(
        requests[1].messages.last(),
        Some(ModelMessage::User(text)) if text == "Never mind"
    ));
}

#[tokio::test]
async fn test_cancelled_session() {
    let mut provider = TestModelProvider::default();
    provider.add_assistant_turn(PresetResponse::text("Too late."));

    let token = CancellationToken::new();
    token.cancel();
    let mut session = SessionBuilder::with_model_provider(provider.clone())
        .with_cancellation(token)
        .build()
        .unwrap();
    let err = session.ask("Hi").await.unwrap_err();
    assert!(matches!(err, DispatchError::Cancelled));
    assert!(provider.requests().is_empty());

    session.set_cancellation(CancellationToken::new());
    assert_eq!(session.ask("Hi again").await.unwrap().text, "Too late.");
}
