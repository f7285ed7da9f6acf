//! A terminal front end that answers questions read from stdin.

#[macro_use]
extern crate tracing;

use std::io::Write as _;
use std::process::ExitCode;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use owo_colors::OwoColorize;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::select;
use tokio::signal::ctrl_c;
use tokio::sync::mpsc;
use tool_loop::core::observer::DispatchObserver;
use tool_loop::core::tool::{ResolvedCall, ToolResult};
use tool_loop::core::{CancellationToken, DispatchError, FinalAnswer};
use tool_loop::{Config, SessionBuilder};
use tool_loop_model::ModelProviderError;
use tool_loop_openai_model::OpenAIProvider;

enum UiEvent {
    Delta(String),
    ToolStart(String),
    ToolFailed(String, String),
    /// The model request is retried, any streamed text will come again.
    Retry(Duration),
}

/// Forwards tool activity to the terminal.
struct UiObserver(mpsc::UnboundedSender<UiEvent>);

impl DispatchObserver for UiObserver {
    fn on_model_retry(
        &self,
        _iteration: usize,
        _error: &dyn ModelProviderError,
        delay: Duration,
    ) {
        self.0.send(UiEvent::Retry(delay)).ok();
    }

    fn on_tool_start(&self, call: &ResolvedCall) {
        debug!(tool = call.name(), "calling tool");
        self.0.send(UiEvent::ToolStart(call.name().to_owned())).ok();
    }

    fn on_tool_finish(
        &self,
        call: &ResolvedCall,
        result: &ToolResult,
        elapsed: Duration,
    ) {
        debug!(tool = call.name(), ?elapsed, "tool finished");
        if let Err(err) = result {
            self.0
                .send(UiEvent::ToolFailed(call.name().to_owned(), err.to_string()))
                .ok();
        }
    }
}

const BAR_CHAR: &str = "▎";

/// Terminal state of one question.
struct Screen {
    style: ProgressStyle,
    spinner: Option<ProgressBar>,
    streaming: bool,
}

impl Screen {
    fn new() -> Self {
        let style = ProgressStyle::with_template("{spinner} {wide_msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏");
        Self {
            style,
            spinner: None,
            streaming: false,
        }
    }

    fn spin(&mut self, message: impl Into<String>) {
        let message = message.into();
        let spinner = self.spinner.get_or_insert_with(|| {
            let spinner = ProgressBar::new_spinner();
            spinner.set_style(self.style.clone());
            spinner.enable_steady_tick(Duration::from_millis(100));
            spinner
        });
        spinner.set_message(message);
    }

    /// Clears the spinner and ends any streamed line.
    fn clear(&mut self) {
        if let Some(spinner) = self.spinner.take() {
            spinner.finish_and_clear();
        }
        if self.streaming {
            println!();
            self.streaming = false;
        }
    }

    fn handle(&mut self, event: UiEvent) {
        match event {
            UiEvent::Delta(delta) => {
                if let Some(spinner) = self.spinner.take() {
                    spinner.finish_and_clear();
                }
                if !self.streaming {
                    print!("{}🤖 ", BAR_CHAR.bright_cyan());
                    self.streaming = true;
                }
                print!("{}", delta.bright_white());
                std::io::stdout().flush().ok();
            }
            UiEvent::ToolStart(name) => {
                self.clear();
                println!("{}🔧 {}", BAR_CHAR.bright_yellow(), name.dimmed());
                self.spin(format!("Running {name}..."));
            }
            UiEvent::Retry(delay) => {
                let restarted = self.streaming;
                self.clear();
                if restarted {
                    println!("{}", "(connection lost, starting over)".dimmed());
                }
                self.spin(format!("Retrying in {delay:?}..."));
            }
            UiEvent::ToolFailed(name, reason) => {
                self.clear();
                println!(
                    "{}⚠️  {} failed: {}",
                    BAR_CHAR.bright_yellow(),
                    name,
                    reason.dimmed()
                );
                self.spin("🤔 Thinking...");
            }
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    };
    info!("using model {}", config.openai.model());

    let (event_tx, mut event_rx) = mpsc::unbounded_channel();
    let mut builder =
        SessionBuilder::with_model_provider(OpenAIProvider::new(config.openai))
            .with_system_prompt(include_str!("./system_prompt.md"))
            .with_observer(UiObserver(event_tx.clone()))
            .on_transcript(move |delta| {
                event_tx.send(UiEvent::Delta(delta)).ok();
            });
    if let Some(max_iterations) = config.max_iterations {
        builder = builder.with_max_iterations(max_iterations);
    }
    if let Some(path) = config.stock_data_path {
        builder = builder.with_stock_data_path(path);
    }
    let mut session = match builder.build() {
        Ok(session) => session,
        Err(err) => {
            eprintln!("failed to set up tools: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut lines = BufReader::new(io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush().ok();

        let line = select! {
            line = lines.next_line() => line,
            _ = ctrl_c() => {
                println!();
                break;
            }
        };
        let line = match line {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                error!("error reading input: {err}");
                break;
            }
        };
        let question = line.trim();
        if question.is_empty() {
            continue;
        }

        // A fresh token per question, so Ctrl-C only stops this one.
        let token = CancellationToken::new();
        session.set_cancellation(token.clone());

        let mut screen = Screen::new();
        screen.spin("🤔 Thinking...");

        let result = {
            let ask = session.ask(question);
            tokio::pin!(ask);
            loop {
                select! {
                    result = &mut ask => break result,
                    Some(event) = event_rx.recv() => screen.handle(event),
                    _ = ctrl_c(), if !token.is_cancelled() => {
                        token.cancel();
                        screen.spin("Cancelling...");
                    }
                }
            }
        };
        while let Ok(event) = event_rx.try_recv() {
            screen.handle(event);
        }
        let streamed = screen.streaming;
        screen.clear();

        match result {
            Ok(FinalAnswer {
                text, iterations, tool_calls, ..
            }) => {
                if !streamed {
                    println!("{}🤖 {}", BAR_CHAR.bright_cyan(), text.bright_white());
                }
                debug!(iterations, tool_calls, "answered");
            }
            Err(DispatchError::Cancelled) => {
                println!("{}", "Cancelled.".yellow());
            }
            Err(err @ DispatchError::Unauthorized(_)) => {
                eprintln!("{} {err}", "error:".red().bold());
                return ExitCode::FAILURE;
            }
            Err(err) => {
                eprintln!("{} {err}", "error:".red().bold());
            }
        }
    }

    ExitCode::SUCCESS
}
