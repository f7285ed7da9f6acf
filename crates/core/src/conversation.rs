//! Conversation-related types.

use tool_loop_model::{
    AssistantMessage, ModelMessage, ToolCallRequest, ToolCallResult,
};

/// Represents a conversation.
///
/// The first message is always the system instructions. Messages are only
/// ever appended, a conversation is never reordered or truncated.
#[derive(Clone, Debug)]
pub struct Conversation {
    pub(crate) items: Vec<Item>,
    /// Requests of the last assistant turn that have no result yet.
    unanswered: Vec<ToolCallRequest>,
}

/// An item in the conversation.
#[derive(Clone, Debug)]
pub struct Item {
    pub(crate) msg: ModelMessage,
    pub(crate) transcript: String,
}

impl Item {
    /// Returns the message of this item.
    #[inline]
    pub fn message(&self) -> &ModelMessage {
        &self.msg
    }

    /// Returns the transcript of this item.
    ///
    /// The transcript is a string representation of the message item,
    /// which can be exported later. But transcript alone is not enough
    /// to reconstruct the message item.
    #[inline]
    pub fn transcript(&self) -> &str {
        &self.transcript
    }
}

impl Conversation {
    /// Creates a conversation that starts with the given system prompt.
    pub fn new<S: Into<String>>(system_prompt: S) -> Self {
        let system_prompt = system_prompt.into();
        Self {
            items: vec![Item {
                transcript: system_prompt.clone(),
                msg: ModelMessage::System(system_prompt),
            }],
            unanswered: Vec::new(),
        }
    }

    /// Appends a user message.
    pub fn push_user<S: Into<String>>(&mut self, text: S) {
        let text = text.into();
        self.items.push(Item {
            transcript: text.clone(),
            msg: ModelMessage::User(text),
        });
    }

    pub(crate) fn push_assistant(
        &mut self,
        msg: AssistantMessage,
        opaque: Option<ModelMessage>,
    ) {
        let transcript = msg.content.clone();
        self.unanswered = msg.tool_calls.clone();
        let msg = opaque.unwrap_or(ModelMessage::Assistant(msg));
        self.items.push(Item { msg, transcript });
    }

    pub(crate) fn push_tool_result(&mut self, result: ToolCallResult) {
        self.unanswered.retain(|req| req.id != result.id);
        self.items.push(Item {
            transcript: result.content.clone(),
            msg: ModelMessage::Tool(result),
        });
    }

    /// Returns the tool requests of the last assistant turn that have no
    /// result message yet.
    ///
    /// This is only non-empty after a run stopped before executing a turn.
    #[inline]
    pub fn unanswered_calls(&self) -> &[ToolCallRequest] {
        &self.unanswered
    }

    /// Appends a result for every unanswered tool request.
    ///
    /// Chat endpoints reject a history where a tool request has no result,
    /// so this must happen before the next user message.
    pub fn answer_unanswered<F>(&mut self, mut observation: F)
    where
        F: FnMut(&ToolCallRequest) -> String,
    {
        for req in std::mem::take(&mut self.unanswered) {
            let content = observation(&req);
            self.push_tool_result(ToolCallResult {
                id: req.id,
                name: req.name,
                content,
            });
        }
    }

    /// Returns the items of this conversation in order.
    #[inline]
    pub fn items(&self) -> &[Item] {
        &self.items
    }

    /// Returns the messages of this conversation in order.
    #[inline]
    pub fn messages(&self) -> impl ExactSizeIterator<Item = &ModelMessage> {
        self.items.iter().map(|item| &item.msg)
    }

    /// Returns the last message.
    #[inline]
    pub fn last(&self) -> Option<&ModelMessage> {
        self.items.last().map(|item| &item.msg)
    }

    /// Returns the number of messages, including the system prompt.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns `true` if the conversation has no message.
    ///
    /// This never holds for a conversation made with [`Conversation::new`].
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}
