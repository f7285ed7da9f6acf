use std::collections::VecDeque;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use pin_project_lite::pin_project;
use tool_loop_model::{
    ErrorKind, ModelFinishReason, ModelResponse, ModelResponseEvent,
    OpaqueMessage,
};

use crate::Error;
use crate::io::{Sse, SseError};
use crate::proto::{ChatCompletion, ChatCompletionChunk, Message, ToolCall};

struct PartialState {
    sse: Sse,
    id: Option<String>,
    content: String,
    reasoning_content: Option<String>,
    // Fragments are merged by their `index`, the order of arrival does not
    // matter.
    tool_calls: Vec<ToolCall>,
    // Filled once the choice finishes, drained one event per poll.
    pending_events: VecDeque<ModelResponseEvent>,
    finished: bool,
}

impl PartialState {
    #[inline]
    fn finish(self) -> Option<(String, Message)> {
        Some((
            self.id?,
            Message::assistant(
                self.content,
                self.tool_calls,
                self.reasoning_content,
            ),
        ))
    }

    fn merge_tool_call(&mut self, tool_call: ToolCall) {
        let Some(partial_tool_call) = self
            .tool_calls
            .iter_mut()
            .find(|t| t.index == tool_call.index)
        else {
            self.tool_calls.push(tool_call);
            return;
        };
        if let Some(id) = tool_call.id {
            partial_tool_call.id.get_or_insert_default().push_str(&id);
        }
        if let Some(ty) = tool_call.r#type {
            // The type is repeated in every fragment by some servers.
            partial_tool_call.r#type = Some(ty);
        }
        let Some(function) = tool_call.function else {
            return;
        };
        match partial_tool_call.function {
            Some(ref mut partial_func) => {
                if let Some(name) = function.name {
                    partial_func.name.get_or_insert_default().push_str(&name);
                }
                if let Some(arguments) = function.arguments {
                    partial_func
                        .arguments
                        .get_or_insert_default()
                        .push_str(&arguments);
                }
            }
            None => partial_tool_call.function = Some(function),
        }
    }

    fn finish_choice(&mut self, finish_reason: &str) {
        self.tool_calls.sort_by_key(|t| t.index);
        self.pending_events.extend(
            self.tool_calls
                .iter()
                .map(|t| ModelResponseEvent::ToolCall(t.to_request())),
        );
        self.pending_events
            .push_back(ModelResponseEvent::Completed(map_finish_reason(
                finish_reason,
                !self.tool_calls.is_empty(),
            )));
        self.finished = true;
    }
}

fn map_finish_reason(
    finish_reason: &str,
    has_tool_calls: bool,
) -> ModelFinishReason {
    match finish_reason {
        "tool_calls" | "function_call" => ModelFinishReason::ToolCalls,
        "length" => ModelFinishReason::Length,
        // Some servers report `stop` next to tool calls.
        _ if has_tool_calls => ModelFinishReason::ToolCalls,
        _ => ModelFinishReason::Stop,
    }
}

type PinnedFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;
type NextEvent = Result<(Option<ModelResponseEvent>, PartialState), Error>;

pin_project! {
    /// A completion from [`OpenAIProvider`](crate::OpenAIProvider),
    /// either streamed or read in one piece.
    pub struct OpenAIResponse {
        next_event_fut: Option<PinnedFuture<NextEvent>>,
        buffered: VecDeque<ModelResponseEvent>,
        full_msg: Option<(String, Message)>,
    }
}

impl OpenAIResponse {
    #[inline]
    pub(crate) fn from_sse(sse: Sse) -> Self {
        let partial_state = PartialState {
            sse,
            id: None,
            content: Default::default(),
            reasoning_content: Default::default(),
            tool_calls: Default::default(),
            pending_events: Default::default(),
            finished: false,
        };
        let next_event_fut = async move { next_event(partial_state).await };
        Self {
            next_event_fut: Some(Box::pin(next_event_fut)),
            buffered: VecDeque::new(),
            full_msg: None,
        }
    }

    pub(crate) fn from_completion(
        mut completion: ChatCompletion,
    ) -> Result<Self, Error> {
        let Some(choice) = completion.choices.pop() else {
            return Err(Error::new("completion has no choices", ErrorKind::Other));
        };
        let message = choice.message;
        let mut tool_calls = message.tool_calls.unwrap_or_default();
        tool_calls.sort_by_key(|t| t.index);

        let mut buffered = VecDeque::new();
        let content = message.content.unwrap_or_default();
        if !content.is_empty() {
            buffered.push_back(ModelResponseEvent::MessageDelta(content.clone()));
        }
        buffered.extend(
            tool_calls
                .iter()
                .map(|t| ModelResponseEvent::ToolCall(t.to_request())),
        );
        buffered.push_back(ModelResponseEvent::Completed(map_finish_reason(
            choice.finish_reason.as_deref().unwrap_or("stop"),
            !tool_calls.is_empty(),
        )));

        Ok(Self {
            next_event_fut: None,
            buffered,
            full_msg: Some((
                completion.id,
                Message::assistant(
                    content,
                    tool_calls,
                    message.reasoning_content,
                ),
            )),
        })
    }
}

impl ModelResponse for OpenAIResponse {
    type Error = crate::Error;

    fn poll_next_event(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Result<Option<ModelResponseEvent>, Self::Error>> {
        let this = self.project();
        if let Some(event) = this.buffered.pop_front() {
            return Poll::Ready(Ok(Some(event)));
        }
        let Some(next_event_fut) = this.next_event_fut else {
            return Poll::Ready(Ok(None));
        };
        let (event, partial_state) =
            match ready!(next_event_fut.as_mut().poll(cx)) {
                Ok((Some(event), partial_state)) => (event, partial_state),
                Ok((None, partial_state)) => {
                    *this.next_event_fut = None;
                    *this.full_msg = partial_state.finish();
                    return Poll::Ready(Ok(None));
                }
                Err(err) => {
                    *this.next_event_fut = None;
                    return Poll::Ready(Err(err));
                }
            };

        // The stream may still have more data to pull, create a new future for
        // the next event.
        let next_event_fut = async move { next_event(partial_state).await };
        *this.next_event_fut = Some(Box::pin(next_event_fut));

        Poll::Ready(Ok(Some(event)))
    }

    fn make_opaque_message(&self) -> Option<OpaqueMessage> {
        self.full_msg
            .as_ref()
            .map(|(id, msg)| OpaqueMessage::new(id, msg.clone()))
    }
}

async fn next_event(
    mut partial_state: PartialState,
) -> Result<(Option<ModelResponseEvent>, PartialState), Error> {
    loop {
        if let Some(event) = partial_state.pending_events.pop_front() {
            return Ok((Some(event), partial_state));
        }
        if partial_state.finished {
            return Ok((None, partial_state));
        }

        let sse_event = match partial_state.sse.next_event().await {
            Ok(Some(event)) => event,
            Ok(None) => break,
            Err(SseError::Chunks(err)) => return Err(err),
            Err(SseError::InvalidPayload) => {
                return Err(Error::new("malformed event stream", ErrorKind::Other));
            }
        };
        trace!("got sse event: {sse_event}");
        if sse_event == "[DONE]" {
            break;
        }

        let mut chunk = serde_json::from_str::<ChatCompletionChunk>(&sse_event)
            .map_err(|err| Error::new(format!("{err}"), ErrorKind::Other))?;
        // Some servers send an initial chunk without id or choices.
        if !chunk.id.is_empty()
            && partial_state.id.get_or_insert_with(|| chunk.id.clone())
                != &chunk.id
        {
            return Err(Error::new("chunk id mismatch", ErrorKind::Other));
        }
        let Some(choice) = chunk.choices.pop() else {
            continue;
        };

        if let Some(reasoning_content) = &choice.delta.reasoning_content {
            partial_state
                .reasoning_content
                .get_or_insert_default()
                .push_str(reasoning_content);
        }
        for tool_call in choice.delta.tool_calls.unwrap_or_default() {
            partial_state.merge_tool_call(tool_call);
        }
        if let Some(finish_reason) = &choice.finish_reason {
            partial_state.finish_choice(finish_reason);
        }
        // The message delta goes before anything queued by the finish.
        match choice.delta.content {
            Some(content) if !content.is_empty() => {
                partial_state.content.push_str(&content);
                return Ok((
                    Some(ModelResponseEvent::MessageDelta(content)),
                    partial_state,
                ));
            }
            _ => {}
        }
    }

    // The stream ended without a finish reason.
    if !partial_state.tool_calls.is_empty() || partial_state.id.is_some() {
        partial_state.finish_choice("stop");
        if let Some(event) = partial_state.pending_events.pop_front() {
            return Ok((Some(event), partial_state));
        }
    }
    Ok((None, partial_state))
}
