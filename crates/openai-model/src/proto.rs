use serde::{Deserialize, Serialize};
use serde_json::Value;
use tool_loop_model::{
    AssistantMessage, ModelMessage, ModelRequest, ModelTool, ToolCallRequest,
    ToolChoice,
};

use crate::OpenAIConfig;

// ------------------------------
// Types received from the server
// ------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionToolCall {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolCall {
    #[serde(skip_serializing)]
    pub index: Option<u32>,
    pub id: Option<String>,
    pub r#type: Option<String>,
    pub function: Option<FunctionToolCall>,
}

impl ToolCall {
    pub fn to_request(&self) -> ToolCallRequest {
        let function = self.function.as_ref();
        ToolCallRequest {
            id: self.id.clone().unwrap_or_default(),
            name: function.and_then(|f| f.name.clone()).unwrap_or_default(),
            arguments: function
                .and_then(|f| f.arguments.clone())
                .unwrap_or_default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ChatCompletionChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ChunkChoice {
    #[serde(default)]
    pub delta: Delta,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
pub struct Delta {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub reasoning_content: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ChatCompletion {
    pub id: String,
    pub choices: Vec<CompletionChoice>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct CompletionChoice {
    pub message: CompletionMessage,
    pub finish_reason: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct CompletionMessage {
    pub content: Option<String>,
    pub tool_calls: Option<Vec<ToolCall>>,
    pub reasoning_content: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ApiErrorBody {
    pub error: ApiError,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Deserialize)]
pub struct ApiError {
    pub message: String,
    pub code: Option<String>,
}

// ------------------------
// Types sent to the server
// ------------------------

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
struct FunctionTool {
    name: String,
    description: String,
    parameters: Value,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
struct Tool {
    r#type: &'static str,
    function: FunctionTool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
struct FunctionName {
    name: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(untagged)]
enum ToolChoiceParam {
    Mode(&'static str),
    Function {
        r#type: &'static str,
        function: FunctionName,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "role", rename_all = "lowercase")]
pub enum Message {
    System {
        content: String,
    },
    User {
        content: String,
    },
    Assistant {
        content: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        tool_calls: Option<Vec<ToolCall>>,
        #[serde(skip_serializing_if = "Option::is_none")]
        reasoning_content: Option<String>,
    },
    Tool {
        tool_call_id: String,
        content: String,
    },
}

impl Message {
    pub fn assistant(
        content: String,
        mut tool_calls: Vec<ToolCall>,
        reasoning_content: Option<String>,
    ) -> Self {
        tool_calls.sort_by_key(|t| t.index);
        Message::Assistant {
            // Some servers reject an empty string next to tool calls.
            content: if content.is_empty() && !tool_calls.is_empty() {
                None
            } else {
                Some(content)
            },
            tool_calls: if tool_calls.is_empty() {
                None
            } else {
                Some(tool_calls)
            },
            reasoning_content,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ChatCompletionRequest {
    model: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<ToolChoiceParam>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream_options: Option<StreamOptions>,
    stream: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
struct StreamOptions {
    include_usage: bool,
}

// -----------
// Conversions
// -----------

#[inline]
pub fn create_request(
    req: &ModelRequest,
    config: &OpenAIConfig,
) -> ChatCompletionRequest {
    let tools: Vec<_> = req.tools.iter().map(create_tool).collect();
    let tool_choice = if tools.is_empty() {
        None
    } else {
        Some(create_tool_choice(&req.tool_choice))
    };
    ChatCompletionRequest {
        model: config.model.clone(),
        messages: req.messages.iter().map(create_message).collect(),
        tools,
        tool_choice,
        temperature: config.temperature,
        stream_options: config.streaming.then_some(StreamOptions {
            include_usage: true,
        }),
        stream: config.streaming,
    }
}

fn create_tool_choice(choice: &ToolChoice) -> ToolChoiceParam {
    match choice {
        ToolChoice::Auto => ToolChoiceParam::Mode("auto"),
        ToolChoice::None => ToolChoiceParam::Mode("none"),
        ToolChoice::Required => ToolChoiceParam::Mode("required"),
        ToolChoice::Function(name) => ToolChoiceParam::Function {
            r#type: "function",
            function: FunctionName { name: name.clone() },
        },
    }
}

#[inline]
fn create_message(msg: &ModelMessage) -> Message {
    match msg {
        ModelMessage::System(content) => Message::System {
            content: content.clone(),
        },
        ModelMessage::User(content) => Message::User {
            content: content.clone(),
        },
        ModelMessage::Assistant(assistant) => create_assistant(assistant),
        ModelMessage::Tool(result) => Message::Tool {
            tool_call_id: result.id.clone(),
            content: result.content.clone(),
        },
        ModelMessage::Opaque(opaque_message) => {
            // Opaque messages from this provider always have `Message` type.
            let Some(msg) = opaque_message.to_raw::<Message>() else {
                return Message::Assistant {
                    content: None,
                    tool_calls: None,
                    reasoning_content: None,
                };
            };
            msg.clone()
        }
    }
}

fn create_assistant(assistant: &AssistantMessage) -> Message {
    let tool_calls = assistant
        .tool_calls
        .iter()
        .map(|req| ToolCall {
            index: None,
            id: Some(req.id.clone()),
            r#type: Some("function".to_owned()),
            function: Some(FunctionToolCall {
                name: Some(req.name.clone()),
                arguments: Some(req.arguments.clone()),
            }),
        })
        .collect();
    Message::assistant(assistant.content.clone(), tool_calls, None)
}

#[inline]
fn create_tool(tool: &ModelTool) -> Tool {
    Tool {
        r#type: "function",
        function: FunctionTool {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: tool.parameters.clone(),
        },
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tool_loop_model::ToolCallResult;

    use super::*;
    use crate::OpenAIConfigBuilder;

    fn calculator_tool() -> ModelTool {
        ModelTool {
            name: "calculator".to_owned(),
            description: "Performs basic arithmetic.".to_owned(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "num1": { "type": "number" },
                    "num2": { "type": "number" },
                    "operator": { "type": "string" }
                },
                "required": ["num1", "num2", "operator"]
            }),
        }
    }

    #[test]
    fn test_create_request() {
        let request = ModelRequest {
            messages: vec![
                ModelMessage::System("You are a helpful assistant.".to_owned()),
                ModelMessage::User("What is 2 + 3?".to_owned()),
            ],
            tools: vec![calculator_tool()],
            tool_choice: ToolChoice::Auto,
        };
        let config = OpenAIConfigBuilder::with_api_key("xxx")
            .with_model("custom")
            .build();
        let body = serde_json::to_value(create_request(&request, &config))
            .unwrap();
        assert_eq!(
            body,
            json!({
                "model": "custom",
                "messages": [
                    { "role": "system", "content": "You are a helpful assistant." },
                    { "role": "user", "content": "What is 2 + 3?" }
                ],
                "tools": [{
                    "type": "function",
                    "function": {
                        "name": "calculator",
                        "description": "Performs basic arithmetic.",
                        "parameters": calculator_tool().parameters
                    }
                }],
                "tool_choice": "auto",
                "stream_options": { "include_usage": true },
                "stream": true
            })
        );
    }

    #[test]
    fn test_no_tool_choice_without_tools() {
        let request = ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            tool_choice: ToolChoice::Required,
            ..Default::default()
        };
        let config = OpenAIConfigBuilder::with_api_key("xxx")
            .with_streaming(false)
            .with_temperature(0.5)
            .build();
        let body = serde_json::to_value(create_request(&request, &config))
            .unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert!(body.get("stream_options").is_none());
        assert_eq!(body["stream"], false);
        assert_eq!(body["temperature"], 0.5);
    }

    #[test]
    fn test_function_tool_choice() {
        let value = serde_json::to_value(create_tool_choice(
            &ToolChoice::Function("calculator".to_owned()),
        ))
        .unwrap();
        assert_eq!(
            value,
            json!({ "type": "function", "function": { "name": "calculator" } })
        );
    }

    #[test]
    fn test_assistant_turn_with_tool_calls() {
        let messages = [
            ModelMessage::Assistant(AssistantMessage {
                content: String::new(),
                tool_calls: vec![ToolCallRequest {
                    id: "call_abc".to_owned(),
                    name: "calculator".to_owned(),
                    arguments: r#"{"num1":2,"num2":3,"operator":"+"}"#
                        .to_owned(),
                }],
            }),
            ModelMessage::Tool(ToolCallResult {
                id: "call_abc".to_owned(),
                name: "calculator".to_owned(),
                content: "5".to_owned(),
            }),
        ];
        let values: Vec<_> = messages
            .iter()
            .map(|msg| serde_json::to_value(create_message(msg)).unwrap())
            .collect();
        assert_eq!(
            values[0],
            json!({
                "role": "assistant",
                "content": null,
                "tool_calls": [{
                    "id": "call_abc",
                    "type": "function",
                    "function": {
                        "name": "calculator",
                        "arguments": r#"{"num1":2,"num2":3,"operator":"+"}"#
                    }
                }]
            })
        );
        assert_eq!(
            values[1],
            json!({ "role": "tool", "tool_call_id": "call_abc", "content": "5" })
        );
    }
}
