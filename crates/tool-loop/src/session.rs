use std::path::PathBuf;
use std::sync::Arc;

use reqwest::Client;
use serde_json::json;
use tool_loop_core::observer::DispatchObserver;
use tool_loop_core::tool::{RegistryError, ToolRegistry};
use tool_loop_core::{
    CancellationToken, Conversation, DispatchConfig, DispatchError, Dispatcher,
    FinalAnswer, ModelClient, RetryPolicy,
};
use tool_loop_model::{ModelProvider, ToolCallRequest};

use crate::tools::*;

const DEFAULT_SYSTEM_PROMPT: &str = "Assistant is a helpful assistant that \
    helps users get answers to questions. Assistant has access to several \
    tools and sometimes you may need to call multiple tools in sequence to \
    get answers for your users.";
const DEFAULT_STOCK_DATA_PATH: &str = "data/Stock Market Dataset.csv";

type TranscriptFn = Arc<dyn Fn(String) + Send + Sync>;

/// A session builder.
///
/// See [`Session`].
pub struct SessionBuilder {
    client: ModelClient,
    system_prompt: String,
    config: DispatchConfig,
    stock_data_path: PathBuf,
    weather: WeatherEndpoints,
    on_transcript: Option<TranscriptFn>,
    observer: Option<Arc<dyn DispatchObserver>>,
    cancellation: Option<CancellationToken>,
}

impl SessionBuilder {
    /// Creates a session builder with a specified model provider.
    pub fn with_model_provider<M: ModelProvider + 'static>(provider: M) -> Self {
        Self {
            client: ModelClient::new(provider),
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_owned(),
            config: DispatchConfig::default(),
            stock_data_path: PathBuf::from(DEFAULT_STOCK_DATA_PATH),
            weather: WeatherEndpoints::default(),
            on_transcript: None,
            observer: None,
            cancellation: None,
        }
    }

    /// Sets the system prompt that starts the conversation.
    #[inline]
    pub fn with_system_prompt<S: Into<String>>(mut self, prompt: S) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    /// Sets the maximum number of model submissions per question.
    #[inline]
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.config.max_iterations = max_iterations;
        self
    }

    /// Sets how failed model requests are retried.
    #[inline]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    /// Sets the path of the stock market CSV dataset.
    #[inline]
    pub fn with_stock_data_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.stock_data_path = path.into();
        self
    }

    /// Points the weather tools at another Open-Meteo compatible host.
    #[inline]
    pub fn with_weather_base_url(mut self, base_url: &str) -> Self {
        self.weather = WeatherEndpoints::from_base_url(base_url);
        self
    }

    /// Attaches a callback receiving assistant text as it is generated.
    #[inline]
    pub fn on_transcript(
        mut self,
        on_transcript: impl Fn(String) + Send + Sync + 'static,
    ) -> Self {
        self.on_transcript = Some(Arc::new(on_transcript));
        self
    }

    /// Replaces the default logging observer.
    #[inline]
    pub fn with_observer<O: DispatchObserver + 'static>(mut self, observer: O) -> Self {
        self.observer = Some(Arc::new(observer));
        self
    }

    /// Stops the current question once the token is cancelled.
    ///
    /// See also [`Session::set_cancellation`].
    #[inline]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = Some(token);
        self
    }

    /// Builds a new session with all built-in tools registered.
    pub fn build(self) -> Result<Session, RegistryError> {
        let http = Client::new();
        let registry = ToolRegistry::builder()
            .with_tool(RandomNumbersTool::new())
            .with_tool(TemperatureTool::new(http.clone(), &self.weather))
            .with_tool(HistoricalTemperatureTool::new(http, &self.weather))
            .with_tool(CurrentTimeTool::new())
            .with_tool(CalculatorTool::new())
            .with_tool(StockMarketDataTool::new(self.stock_data_path.clone()))
            .with_tool(CalculateDifferenceTool::new(self.stock_data_path))
            .build()?;
        debug!("registered {} tools", registry.len());

        let mut dispatcher =
            Dispatcher::new(self.client, Arc::new(registry), self.config);
        if let Some(observer) = self.observer {
            dispatcher = dispatcher.with_observer(observer);
        }
        if let Some(on_transcript) = self.on_transcript {
            dispatcher = dispatcher.on_transcript(move |delta| on_transcript(delta));
        }
        if let Some(token) = self.cancellation {
            dispatcher = dispatcher.with_cancellation(token);
        }

        Ok(Session {
            dispatcher,
            conversation: Conversation::new(self.system_prompt),
        })
    }
}

fn not_executed(req: &ToolCallRequest) -> String {
    json!({
        "error": "NotExecuted",
        "reason": format!("`{}` was not run because the previous turn was rejected", req.name),
    })
    .to_string()
}

/// A chat session with the built-in tools.
///
/// The conversation carries over from one question to the next, so later
/// questions can refer to earlier answers.
pub struct Session {
    dispatcher: Dispatcher,
    conversation: Conversation,
}

impl Session {
    /// Asks a question and waits for the final answer.
    ///
    /// On error the conversation keeps everything appended before the
    /// failure, and the session can still be used.
    pub async fn ask(&mut self, question: &str) -> Result<FinalAnswer, DispatchError> {
        // A run that failed resolution leaves the requests of its last turn
        // without results, which chat endpoints refuse to accept.
        if !self.conversation.unanswered_calls().is_empty() {
            debug!(
                count = self.conversation.unanswered_calls().len(),
                "closing unanswered tool requests"
            );
            self.conversation.answer_unanswered(not_executed);
        }
        self.conversation.push_user(question);
        self.dispatcher.run(&mut self.conversation).await
    }

    /// Replaces the cancellation token used by later questions.
    ///
    /// A cancelled token stays cancelled, so use a fresh one per question
    /// when cancellation should only stop the current one.
    pub fn set_cancellation(&mut self, token: CancellationToken) {
        self.dispatcher = self.dispatcher.clone().with_cancellation(token);
    }

    /// Returns the conversation so far.
    #[inline]
    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    /// Returns the tool registry of this session.
    #[inline]
    pub fn registry(&self) -> &ToolRegistry {
        self.dispatcher.registry()
    }
}
