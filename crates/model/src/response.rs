use std::pin::Pin;
use std::task::{self, Poll};

use serde::{Deserialize, Serialize};

use crate::OpaqueMessage;
use crate::provider::ModelProviderError;

/// A response being received from a provider.
///
/// Events are pulled one by one with [`poll_next_event`], in the order the
/// model produced them. A response is driven by a single task.
///
/// [`poll_next_event`]: ModelResponse::poll_next_event
pub trait ModelResponse: Sized + Send + 'static {
    /// The error type of the provider.
    type Error: ModelProviderError;

    /// Polls for the next event.
    ///
    /// Returns `Ready(Ok(Some(_)))` for each event, `Ready(Ok(None))` once
    /// the response is exhausted, and `Ready(Err(_))` if receiving fails.
    /// `Pending` registers the task for a wakeup when more data arrives.
    /// Calling it again after `None` returns `None`.
    ///
    /// [`ModelResponseEvent::ToolCall`] events carry complete requests.
    /// Providers that receive tool calls in fragments reassemble them
    /// before emitting anything.
    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut task::Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>>;

    /// Returns the assistant turn of this response in the provider's own
    /// format, to be replayed verbatim on the next request.
    ///
    /// Only meaningful after all events were received. Providers without a
    /// native format return `None`, and the turn is then replayed as a
    /// [`ModelMessage::Assistant`](crate::ModelMessage::Assistant).
    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        None
    }
}

/// The reason why a model response has finished.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFinishReason {
    /// The turn requests tools.
    ToolCalls,
    /// The turn is a final answer.
    Stop,
    /// The output hit the token limit.
    Length,
}

/// Describes a tool call request from the model.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolCallRequest {
    /// The unique identifier for the tool call request.
    pub id: String,
    /// The name of the tool to call.
    pub name: String,
    /// The argument payload exactly as the model produced it.
    ///
    /// This is expected to be a JSON object, but nothing guarantees it.
    pub arguments: String,
}

/// One event of a model response.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelResponseEvent {
    /// The model stopped generating, always the last event.
    Completed(ModelFinishReason),
    /// A piece of assistant text.
    MessageDelta(String),
    /// A complete tool request.
    ToolCall(ToolCallRequest),
}
