//! A model provider for OpenAI-compatible APIs.
//!
//! Both streamed (server-sent events) and one-piece completions are
//! supported, see [`OpenAIConfigBuilder::with_streaming`].

#[macro_use]
extern crate tracing;

mod config;
mod io;
mod proto;
mod response;

use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;
use std::time::Duration;

use mime::Mime;
use reqwest::{Client, Response, StatusCode, header};
use tool_loop_model::{
    ErrorKind, ModelProvider, ModelProviderError, ModelRequest,
};

pub use config::{OpenAIConfig, OpenAIConfigBuilder};
use io::{Chunks, Sse};
use proto::{ApiErrorBody, ChatCompletion};
pub use response::OpenAIResponse;

/// Error type for [`OpenAIProvider`].
#[derive(Debug)]
pub struct Error {
    message: String,
    kind: ErrorKind,
    retry_after: Option<Duration>,
}

impl Error {
    fn new(message: impl Into<String>, kind: ErrorKind) -> Self {
        Self {
            message: message.into(),
            kind,
            retry_after: None,
        }
    }

    fn from_reqwest(err: reqwest::Error) -> Self {
        let kind = if err.is_timeout() || err.is_connect() {
            ErrorKind::Transient
        } else if let Some(status) = err.status() {
            classify_status(status)
        } else {
            ErrorKind::Other
        };
        Self::new(format!("{err}"), kind)
    }

    /// Returns the error message.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl StdError for Error {}

impl ModelProviderError for Error {
    #[inline]
    fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[inline]
    fn retry_after(&self) -> Option<Duration> {
        self.retry_after
    }
}

fn classify_status(status: StatusCode) -> ErrorKind {
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            ErrorKind::Unauthorized
        }
        StatusCode::TOO_MANY_REQUESTS => ErrorKind::RateLimitExceeded,
        StatusCode::REQUEST_TIMEOUT => ErrorKind::Transient,
        status if status.is_server_error() => ErrorKind::Transient,
        _ => ErrorKind::Other,
    }
}

/// Turns a non-success response into an [`Error`], keeping the server's
/// own message when the body has one.
async fn error_from_response(resp: Response) -> Error {
    let status = resp.status();
    let retry_after = resp
        .headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs);
    let body = resp.text().await.unwrap_or_default();

    let mut kind = classify_status(status);
    let message = match serde_json::from_str::<ApiErrorBody>(&body) {
        Ok(ApiErrorBody { error }) => {
            if error.code.as_deref() == Some("content_filter") {
                kind = ErrorKind::Moderated;
            }
            format!("{status}: {}", error.message)
        }
        Err(_) => format!("{status}: {body}"),
    };
    Error {
        message,
        kind,
        retry_after,
    }
}

fn has_content_type(resp: &Response, expected: &Mime) -> bool {
    resp.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<Mime>().ok())
        .is_some_and(|m| m.essence_str() == expected.essence_str())
}

/// OpenAI-compatible model provider.
#[derive(Clone, Debug)]
pub struct OpenAIProvider {
    client: Client,
    config: Arc<OpenAIConfig>,
}

impl OpenAIProvider {
    /// Creates a new `OpenAIProvider` with the given configuration.
    #[inline]
    pub fn new(config: OpenAIConfig) -> Self {
        Self {
            client: Client::new(),
            config: Arc::new(config),
        }
    }

    /// Returns the configuration of this provider.
    #[inline]
    pub fn config(&self) -> &OpenAIConfig {
        &self.config
    }
}

impl ModelProvider for OpenAIProvider {
    type Error = Error;
    type Response = OpenAIResponse;

    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static
    {
        let streaming = self.config.streaming;
        let openai_req = proto::create_request(req, &self.config);
        let accept = if streaming {
            mime::TEXT_EVENT_STREAM
        } else {
            mime::APPLICATION_JSON
        };
        let (auth_name, auth_value) = self.config.auth_header();
        let resp_fut = self
            .client
            .post(self.config.endpoint("/chat/completions"))
            .header(auth_name, auth_value)
            .header(header::ACCEPT, accept.as_ref())
            .timeout(self.config.timeout)
            .json(&openai_req)
            .send();

        async move {
            let resp = resp_fut.await.map_err(Error::from_reqwest)?;
            if !resp.status().is_success() {
                let err = error_from_response(resp).await;
                debug!("completion request failed: {err}");
                return Err(err);
            }

            if !has_content_type(&resp, &accept) {
                let content_type = resp.headers().get(header::CONTENT_TYPE);
                return Err(Error::new(
                    format!("Unexpected content type: {content_type:?}"),
                    ErrorKind::Other,
                ));
            }

            // Here we got a successful response.
            if streaming {
                let chunks = Chunks::from_response(resp);
                let sse = Sse::new(chunks);
                Ok(OpenAIResponse::from_sse(sse))
            } else {
                let completion = resp
                    .json::<ChatCompletion>()
                    .await
                    .map_err(Error::from_reqwest)?;
                OpenAIResponse::from_completion(completion)
            }
        }
    }
}
