use std::error::Error as StdError;
use std::fmt::{self, Debug, Display};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tool_loop_model::{
    AssistantMessage, ModelMessage, ModelProviderError, ModelRequest,
    ToolCallResult, ToolChoice,
};
use tracing::Instrument;

use crate::conversation::Conversation;
use crate::model_client::{ModelClient, RetryPolicy, TranscriptFn};
use crate::observer::{DispatchObserver, TracingObserver};
use crate::tool::ToolRegistry;


/// Tunables of the dispatch loop.
#[derive(Clone, Debug, PartialEq)]
pub struct DispatchConfig {
    /// Maximum number of model submissions in one run.
    pub max_iterations: usize,
    /// The tool choice sent with every submission.
    pub tool_choice: ToolChoice,
    /// How failed submissions are retried.
    pub retry: RetryPolicy,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_iterations: 10,
            tool_choice: ToolChoice::Auto,
            retry: RetryPolicy::default(),
        }
    }
}

/// The outcome of a successful run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FinalAnswer {
    /// The text of the last assistant message.
    pub text: String,
    /// Number of model submissions made in the run.
    pub iterations: usize,
    /// Number of tool calls executed in the run.
    pub tool_calls: usize,
}

/// Errors that end a run.
///
/// When a run ends with one of these, the conversation still holds every
/// message appended before the failure.
pub enum DispatchError {
    /// The model requested a tool that is not registered.
    UnknownTool {
        /// Name requested by the model.
        name: String,
    },
    /// The argument payload of a tool request is not a JSON object.
    InvalidArguments {
        /// Name of the tool.
        tool: String,
        /// What is wrong with the payload.
        reason: String,
    },
    /// Required parameters are missing or undeclared ones are present.
    ArityMismatch {
        /// Name of the tool.
        tool: String,
        /// Required parameters that were not given.
        missing: Vec<String>,
        /// Given parameters that are not declared.
        unexpected: Vec<String>,
    },
    /// The model still requested tools on the last allowed submission.
    IterationLimitExceeded {
        /// The configured limit.
        limit: usize,
    },
    /// The provider rejected the credentials.
    Unauthorized(Box<dyn ModelProviderError>),
    /// The provider failed and retries did not help.
    Model(Box<dyn ModelProviderError>),
    /// The run was cancelled before the next submission.
    Cancelled,
}

impl Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::UnknownTool { name } => {
                write!(f, "model requested an unknown tool `{name}`")
            }
            DispatchError::InvalidArguments { tool, reason } => {
                write!(f, "invalid arguments for `{tool}`: {reason}")
            }
            DispatchError::ArityMismatch {
                tool,
                missing,
                unexpected,
            } => {
                write!(f, "arguments of `{tool}` do not match its parameters")?;
                if !missing.is_empty() {
                    write!(f, ", missing: {}", missing.join(", "))?;
                }
                if !unexpected.is_empty() {
                    write!(f, ", unexpected: {}", unexpected.join(", "))?;
                }
                Ok(())
            }
            DispatchError::IterationLimitExceeded { limit } => {
                write!(f, "no final answer after {limit} iterations")
            }
            DispatchError::Unauthorized(err) => {
                write!(f, "unauthorized: {err}")
            }
            DispatchError::Model(err) => write!(f, "model request failed: {err}"),
            DispatchError::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl Debug for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DispatchError({self})")
    }
}

impl StdError for DispatchError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            DispatchError::Unauthorized(err) | DispatchError::Model(err) => {
                Some(err.as_ref())
            }
            _ => None,
        }
    }
}

/// Runs the tool-calling loop over a conversation.
///
/// Each iteration submits the whole conversation with the tool
/// declarations, appends the assistant turn, and either returns its text
/// as the final answer or runs the requested tools and goes around again.
#[derive(Clone)]
pub struct Dispatcher {
    client: ModelClient,
    registry: Arc<ToolRegistry>,
    config: DispatchConfig,
    cancellation: Option<CancellationToken>,
    observer: Arc<dyn DispatchObserver>,
    on_transcript: Option<TranscriptFn>,
}

impl Dispatcher {
    /// Creates a dispatcher with the default [`TracingObserver`].
    pub fn new(
        client: ModelClient,
        registry: Arc<ToolRegistry>,
        config: DispatchConfig,
    ) -> Self {
        Self {
            client,
            registry,
            config,
            cancellation: None,
            observer: Arc::new(TracingObserver),
            on_transcript: None,
        }
    }

    /// Stops runs once the token is cancelled.
    #[inline]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Replaces the observer.
    #[inline]
    pub fn with_observer<O: DispatchObserver + 'static>(
        mut self,
        observer: O,
    ) -> Self {
        self.observer = Arc::new(observer);
        self
    }

    /// Attaches a callback receiving assistant text as it streams in.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(String) + Send + Sync + 'static,
    ) -> Self {
        self.on_transcript = Some(Arc::new(on_transcript));
        self
    }

    /// Returns the tool registry.
    #[inline]
    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Returns the configuration.
    #[inline]
    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Runs the loop until the model answers without requesting tools.
    ///
    /// The conversation must already end with the user's input. It is only
    /// appended to: the assistant turn of every iteration, then one tool
    /// result per executed request. If a turn requests a tool that fails
    /// resolution, the run stops after appending that turn and no tool of
    /// the turn is executed.
    pub async fn run(
        &self,
        conversation: &mut Conversation,
    ) -> Result<FinalAnswer, DispatchError> {
        let span = debug_span!("dispatch", max_iterations = self.config.max_iterations);
        self.run_inner(conversation).instrument(span).await
    }

    async fn run_inner(
        &self,
        conversation: &mut Conversation,
    ) -> Result<FinalAnswer, DispatchError> {
        let limit = self.config.max_iterations;
        let mut executed = 0;

        for iteration in 1..=limit {
            if self.is_cancelled() {
                return Err(DispatchError::Cancelled);
            }
            self.observer.on_iteration_start(iteration);

            let req = ModelRequest {
                messages: conversation.messages().cloned().collect(),
                tools: self.registry.declarations().to_vec(),
                tool_choice: self.config.tool_choice.clone(),
            };
            let on_retry = |err: &dyn ModelProviderError, delay: Duration| {
                self.observer.on_model_retry(iteration, err, delay);
            };
            let submission = self.client.send_with_retry(
                &req,
                &self.config.retry,
                self.on_transcript.clone(),
                &on_retry,
            );
            let resp = match &self.cancellation {
                Some(token) => tokio::select! {
                    resp = submission => resp?,
                    _ = token.cancelled() => return Err(DispatchError::Cancelled),
                },
                None => submission.await?,
            };
            self.observer.on_model_response(
                iteration,
                &resp.transcript,
                &resp.tool_calls,
                resp.finish_reason,
            );

            let text = resp.transcript.clone();
            let tool_calls = resp.tool_calls.clone();
            conversation.push_assistant(
                AssistantMessage {
                    content: resp.transcript,
                    tool_calls: resp.tool_calls,
                },
                resp.opaque_msg.map(ModelMessage::Opaque),
            );

            if tool_calls.is_empty() {
                return Ok(FinalAnswer {
                    text,
                    iterations: iteration,
                    tool_calls: executed,
                });
            }
            if iteration == limit {
                return Err(DispatchError::IterationLimitExceeded { limit });
            }

            // Resolve the whole turn first, so a bad request leaves no
            // partial results behind.
            let calls = tool_calls
                .iter()
                .map(|req| self.registry.resolve(req))
                .collect::<Result<Vec<_>, _>>()?;

            for call in calls {
                self.observer.on_tool_start(&call);
                let started_at = Instant::now();
                let result = call.execute().await;
                self.observer
                    .on_tool_finish(&call, &result, started_at.elapsed());

                let content = match result {
                    Ok(content) => content,
                    Err(err) => err.to_observation(),
                };
                conversation.push_tool_result(ToolCallResult {
                    id: call.id().to_owned(),
                    name: call.name().to_owned(),
                    content,
                });
                executed += 1;
            }
        }

        // Only reachable with a limit of zero.
        Err(DispatchError::IterationLimitExceeded { limit })
    }

    fn is_cancelled(&self) -> bool {
        self.cancellation
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
    }
}
