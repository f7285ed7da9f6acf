//! A local fake model for testing purpose.

mod preset;

use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt::{self, Debug, Display, Formatter};
use std::future::ready;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, ready};
use std::time::Duration;

use tokio::time::{Sleep, sleep};
use tool_loop_model::{
    ErrorKind, ModelMessage, ModelProvider, ModelProviderError, ModelRequest,
    ModelResponse, ModelResponseEvent, OpaqueMessage,
};

pub use preset::*;

/// Error returned by [`TestModelProvider`].
#[derive(Debug)]
pub struct Error {
    message: &'static str,
    kind: ErrorKind,
}

impl Error {
    #[inline]
    pub fn message(&self) -> &str {
        self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Debug::fmt(self, f)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }

    fn retry_after(&self) -> Option<Duration> {
        // Keep scripted rate limits cheap to wait out.
        (self.kind == ErrorKind::RateLimitExceeded)
            .then(|| Duration::from_millis(1))
    }
}

pub struct TestModelResponse {
    preset: PresetResponse,
    turn: usize,
    opaque: bool,
    delay: Duration,
    event_idx: usize,
    sleep: Option<Pin<Box<Sleep>>>,
}

impl ModelResponse for TestModelResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.get_mut();
        let delay = this.delay;
        let sleep = this.sleep.get_or_insert_with(|| Box::pin(sleep(delay)));
        ready!(sleep.as_mut().poll(cx));
        this.sleep = None;

        let events = &this.preset.events;
        let event = if this.event_idx < events.len() {
            Some(match &events[this.event_idx] {
                PresetEvent::MessageDelta(msg) => {
                    ModelResponseEvent::MessageDelta(msg.clone())
                }
                PresetEvent::ToolCall(req) => {
                    ModelResponseEvent::ToolCall(req.clone())
                }
            })
        } else if this.event_idx == events.len() {
            Some(ModelResponseEvent::Completed(this.preset.finish_reason()))
        } else {
            // In case this method is called after completion.
            None
        };
        this.event_idx += 1;
        Poll::Ready(Ok(event))
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        if !self.opaque {
            return None;
        }
        let id = format!("turn:{}", self.turn);
        Some(OpaqueMessage::new(id.clone(), id))
    }
}

#[derive(Default)]
struct SharedState {
    attempts: HashMap<usize, u64>,
    requests: Vec<ModelRequest>,
}

/// A local fake model for testing purpose.
///
/// Before sending requests, you need to setup the script, which is how the
/// model should respond to each of its turns. The turn is selected by
/// counting the assistant messages already present in the request, so the
/// first request gets the first response, the resubmission after a tool
/// call gets the second one, and so on. If there are no enough turns in the
/// script, an error will be returned, unless the last turn is set to repeat.
///
/// Every request is recorded and can be inspected with
/// [`TestModelProvider::requests`].
///
/// # Note
///
/// This type is not optimized for production use, there are heavy memory
/// copies involved. You should only use it for testing.
#[derive(Clone, Default)]
pub struct TestModelProvider {
    script: Vec<PresetResponse>,
    repeat_last: bool,
    opaque: bool,
    delay: Option<Duration>,
    shared: Arc<Mutex<SharedState>>,
}

impl TestModelProvider {
    /// Appends a response for the next assistant turn.
    #[inline]
    pub fn add_assistant_turn(&mut self, preset: PresetResponse) {
        self.script.push(preset);
    }

    /// Keeps answering with the last scripted turn once the script is
    /// exhausted.
    #[inline]
    pub fn repeat_last_turn(&mut self) {
        self.repeat_last = true;
    }

    /// Makes responses carry opaque messages.
    #[inline]
    pub fn use_opaque_messages(&mut self) {
        self.opaque = true;
    }

    /// Sets the pause before each scripted event is delivered.
    #[inline]
    pub fn set_delay(&mut self, duration: Duration) {
        self.delay = Some(duration);
    }

    /// Returns all requests received so far, in order.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.shared
            .lock()
            .map(|shared| shared.requests.clone())
            .unwrap_or_default()
    }

    fn respond(&self, req: &ModelRequest) -> Result<TestModelResponse, Error> {
        let Ok(mut shared) = self.shared.lock() else {
            return Err(Error {
                message: "state poisoned",
                kind: ErrorKind::Other,
            });
        };
        shared.requests.push(req.clone());

        let turn = req
            .messages
            .iter()
            .filter(|msg| {
                matches!(msg, ModelMessage::Assistant(_) | ModelMessage::Opaque(_))
            })
            .count();
        let step_idx = if turn >= self.script.len() && self.repeat_last {
            self.script.len().saturating_sub(1)
        } else {
            turn
        };
        let Some(preset) = self.script.get(step_idx) else {
            return Err(Error {
                message: "no enough turns",
                kind: ErrorKind::Other,
            });
        };

        if let Some(failures) = preset.failures {
            let attempts = shared.attempts.entry(step_idx).or_default();
            *attempts += 1;
            if failures == 0 || *attempts <= failures {
                return Err(Error {
                    message: "scripted failure",
                    kind: preset.failure_kind.unwrap_or(ErrorKind::Transient),
                });
            }
        }

        Ok(TestModelResponse {
            preset: preset.clone(),
            turn,
            opaque: self.opaque,
            delay: self.delay.unwrap_or(Duration::from_millis(1)),
            event_idx: 0,
            sleep: None,
        })
    }
}

impl ModelProvider for TestModelProvider {
    type Error = crate::Error;
    type Response = TestModelResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        ready(self.respond(req))
    }
}

#[cfg(test)]
mod tests {
    use std::future::poll_fn;
    use std::pin::pin;

    use serde_json::json;
    use tool_loop_model::{
        AssistantMessage, ModelFinishReason, ModelTool, ToolCallRequest,
    };

    use super::*;

    async fn collect_response(
        resp: TestModelResponse,
    ) -> (String, Vec<ToolCallRequest>, Option<ModelFinishReason>) {
        let mut resp = pin!(resp);
        let mut msg = String::new();
        let mut tool_calls = vec![];
        let mut finish_reason = None;
        while let Some(event) =
            poll_fn(|cx| resp.as_mut().poll_next_event(cx)).await.unwrap()
        {
            match event {
                ModelResponseEvent::Completed(reason) => {
                    finish_reason = Some(reason)
                }
                ModelResponseEvent::MessageDelta(delta) => {
                    msg.push_str(&delta);
                }
                ModelResponseEvent::ToolCall(req) => tool_calls.push(req),
            }
        }
        (msg, tool_calls, finish_reason)
    }

    fn weather_tool() -> ModelTool {
        ModelTool {
            name: "get_temperature".to_owned(),
            description: "Gives the temperature for a given location"
                .to_owned(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "latitude": { "type": "number" },
                    "longitude": { "type": "number" }
                },
                "required": ["latitude", "longitude"]
            }),
        }
    }

    #[tokio::test]
    async fn test_turns_follow_assistant_messages() {
        let mut provider = TestModelProvider::default();
        provider.add_assistant_turn(PresetResponse::with_events([
            PresetEvent::MessageDelta("Let me check. ".to_owned()),
            PresetEvent::tool_call(
                "call_1",
                "get_temperature",
                r#"{"latitude":-75.0,"longitude":0.0}"#,
            ),
        ]));
        provider.add_assistant_turn(PresetResponse::text("It is freezing."));

        let mut req = ModelRequest {
            messages: vec![
                ModelMessage::System("You help with weather.".to_owned()),
                ModelMessage::User("BBQ in Antarctica?".to_owned()),
            ],
            tools: vec![weather_tool()],
            ..Default::default()
        };
        let resp = provider.send_request(&req).await.unwrap();
        let (msg, tool_calls, reason) = collect_response(resp).await;
        assert_eq!(msg, "Let me check. ");
        assert_eq!(reason, Some(ModelFinishReason::ToolCalls));
        assert_eq!(tool_calls[0].name, "get_temperature");

        req.messages.push(ModelMessage::Assistant(AssistantMessage {
            content: msg,
            tool_calls,
        }));
        let resp = provider.send_request(&req).await.unwrap();
        let (msg, tool_calls, reason) = collect_response(resp).await;
        assert_eq!(msg, "It is freezing.");
        assert!(tool_calls.is_empty());
        assert_eq!(reason, Some(ModelFinishReason::Stop));

        assert_eq!(provider.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_finish_reason_override() {
        let mut provider = TestModelProvider::default();
        provider.add_assistant_turn(
            PresetResponse::text("It was a dark and")
                .with_finish_reason(ModelFinishReason::Length),
        );
        let req = ModelRequest {
            messages: vec![ModelMessage::User("Tell a story".to_owned())],
            ..Default::default()
        };
        let resp = provider.send_request(&req).await.unwrap();
        let (_, _, reason) = collect_response(resp).await;
        assert_eq!(reason, Some(ModelFinishReason::Length));
    }

    #[tokio::test]
    async fn test_script_exhausted() {
        let mut provider = TestModelProvider::default();
        provider.add_assistant_turn(PresetResponse::text("only once"));
        let req = ModelRequest {
            messages: vec![ModelMessage::assistant_text("only once")],
            ..Default::default()
        };
        let err = provider.send_request(&req).await.err().unwrap();
        assert_eq!(err.kind(), ErrorKind::Other);

        provider.repeat_last_turn();
        assert!(provider.send_request(&req).await.is_ok());
    }

    #[tokio::test]
    async fn test_scripted_failures() {
        let mut provider = TestModelProvider::default();
        provider.add_assistant_turn(
            PresetResponse::text("finally").with_failures(2),
        );
        let req = ModelRequest::default();
        for _ in 0..2 {
            let err = provider.send_request(&req).await.err().unwrap();
            assert_eq!(err.kind(), ErrorKind::Transient);
        }
        let resp = provider.send_request(&req).await.unwrap();
        assert_eq!(collect_response(resp).await.0, "finally");
    }

    #[tokio::test]
    async fn test_opaque_messages() {
        let mut provider = TestModelProvider::default();
        provider.use_opaque_messages();
        provider.add_assistant_turn(PresetResponse::text("hello"));
        let resp = provider.send_request(&ModelRequest::default()).await.unwrap();
        let opaque = resp.make_opaque_message().unwrap();
        assert_eq!(opaque.id(), "turn:0");
    }
}
