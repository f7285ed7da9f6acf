use std::future::poll_fn;
use std::pin::{Pin, pin};
use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use tool_loop_model::{
    ErrorKind, ModelFinishReason, ModelProvider, ModelProviderError,
    ModelRequest, ModelResponse, ModelResponseEvent, OpaqueMessage,
    ToolCallRequest,
};
use tracing::Instrument;

use crate::DispatchError;

type SendRequestResult =
    Result<ModelClientResponse, Box<dyn ModelProviderError>>;
type BoxedSendRequestFuture =
    Pin<Box<dyn Future<Output = SendRequestResult> + Send>>;
pub(crate) type TranscriptFn = Arc<dyn Fn(String) + Send + Sync>;
pub(crate) type RetryFn<'a> =
    &'a (dyn Fn(&dyn ModelProviderError, Duration) + Send + Sync);
#[rustfmt::skip]
type HandlerFn = Arc<
    dyn Fn(ModelRequest, Option<TranscriptFn>)
        -> BoxedSendRequestFuture + Send + Sync
>;

/// How failed model requests are retried.
///
/// Only transient failures and rate limiting are retried. The delay grows
/// exponentially from `initial_interval` up to `max_interval`, and a
/// `Retry-After` hint from the provider takes precedence.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_interval: Duration,
    /// Upper bound of a single delay.
    pub max_interval: Duration,
    /// Factor applied to the delay after each retry.
    pub multiplier: f64,
    /// Stops retrying once this much time has passed since the first
    /// attempt.
    pub max_elapsed_time: Duration,
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_interval: Duration::from_millis(500),
            max_interval: Duration::from_secs(30),
            multiplier: 2.0,
            max_elapsed_time: Duration::from_secs(120),
        }
    }
}

/// A wrapper around a model provider that maintains an execution
/// environment for the provider and provides a type-erased interface
/// for the other modules.
#[derive(Clone)]
pub struct ModelClient {
    handler_fn: HandlerFn,
}

impl ModelClient {
    /// Wraps a model provider.
    #[inline]
    pub fn new<P: ModelProvider + 'static>(provider: P) -> Self {
        // We have to erase the type `P`, since `ModelClient` doesn't have a
        // generic parameter and we don't want it either.
        let handler_fn: HandlerFn = Arc::new(move |req, on_transcript| {
            let fut = provider.send_request(&req);
            Box::pin(
                async move {
                    trace!("got a request: {:?}", req);
                    let resp_or_err = fut.await;
                    handle_response::<P>(resp_or_err, on_transcript).await
                }
                .instrument(trace_span!("model client req")),
            )
        });
        Self { handler_fn }
    }

    /// Sends a request once and returns the response.
    ///
    /// # Cancel safety
    ///
    /// This method is cancel safe. The response stops streaming further
    /// events when this operation is cancelled.
    #[inline]
    pub(crate) async fn send_request(
        &self,
        req: ModelRequest,
        on_transcript: Option<TranscriptFn>,
    ) -> SendRequestResult {
        (self.handler_fn)(req, on_transcript).await
    }

    /// Sends a request, retrying it according to `policy`.
    ///
    /// Unauthorized requests fail right away. Any other error that is not
    /// retried, or the last one when retries run out, is returned as
    /// [`DispatchError::Model`].
    ///
    /// `on_retry` is called before each retry. Deltas of the failed attempt
    /// have already gone to `on_transcript`, and the next attempt streams
    /// its text from the start.
    pub(crate) async fn send_with_retry(
        &self,
        req: &ModelRequest,
        policy: &RetryPolicy,
        on_transcript: Option<TranscriptFn>,
        on_retry: RetryFn<'_>,
    ) -> Result<ModelClientResponse, DispatchError> {
        let backoff = ExponentialBackoffBuilder::new()
            .with_initial_interval(policy.initial_interval)
            .with_max_interval(policy.max_interval)
            .with_multiplier(policy.multiplier)
            .with_max_elapsed_time(Some(policy.max_elapsed_time))
            .build();
        let max_attempts = policy.max_attempts.max(1);
        let mut attempt = 0;

        let operation = || {
            attempt += 1;
            let is_last = attempt >= max_attempts;
            let fut = self.send_request(req.clone(), on_transcript.clone());
            async move {
                fut.await.map_err(|err| {
                    if is_last || !err.kind().is_retryable() {
                        return backoff::Error::permanent(err);
                    }
                    match err.retry_after() {
                        Some(delay) => backoff::Error::retry_after(err, delay),
                        None => backoff::Error::transient(err),
                    }
                })
            }
        };
        let notify = |err: Box<dyn ModelProviderError>, delay: Duration| {
            warn!("model request failed ({err}), retrying in {delay:?}");
            on_retry(err.as_ref(), delay);
        };

        backoff::future::retry_notify(backoff, operation, notify)
            .await
            .map_err(|err| match err.kind() {
                ErrorKind::Unauthorized => DispatchError::Unauthorized(err),
                _ => DispatchError::Model(err),
            })
    }
}

/// A completely received response from the model client.
#[derive(Clone, Debug)]
pub(crate) struct ModelClientResponse {
    pub transcript: String,
    pub opaque_msg: Option<OpaqueMessage>,
    /// Tool calls requested by the model.
    pub tool_calls: Vec<ToolCallRequest>,
    /// The reason the model finished generating.
    pub finish_reason: Option<ModelFinishReason>,
}

async fn handle_response<P: ModelProvider + 'static>(
    resp_or_err: Result<P::Response, P::Error>,
    on_transcript: Option<TranscriptFn>,
) -> SendRequestResult {
    let resp = match resp_or_err {
        Ok(resp) => resp,
        Err(err) => {
            debug!("got an error: {err:?}");
            return Err(Box::new(err));
        }
    };

    let mut transcript = String::new();
    let opaque_msg;
    let mut tool_calls = Vec::new();
    let mut finish_reason = None;

    trace!("start receiving events");

    let mut pinned_resp = pin!(resp);
    loop {
        let event_or_err =
            poll_fn(|cx| pinned_resp.as_mut().poll_next_event(cx)).await;
        let event = match event_or_err {
            Ok(event) => event,
            Err(err) => {
                debug!("got an error: {err:?}");
                return Err(Box::new(err));
            }
        };

        let Some(event) = event else {
            // The request has been handled gracefully without errors,
            // now try getting the opaque message for this response.
            opaque_msg = pinned_resp.make_opaque_message();
            break;
        };
        trace!("got an event: {event:?}");

        match event {
            ModelResponseEvent::MessageDelta(msg) => {
                transcript.push_str(&msg);
                if let Some(on_transcript) = &on_transcript {
                    on_transcript(msg);
                }
            }
            ModelResponseEvent::ToolCall(req) => {
                tool_calls.push(req);
            }
            ModelResponseEvent::Completed(reason) => {
                finish_reason = Some(reason);
            }
        }
    }

    trace!("finished a request");

    Ok(ModelClientResponse {
        transcript,
        opaque_msg,
        tool_calls,
        finish_reason,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tool_loop_model::ModelMessage;
    use tool_loop_test_model::{
        PresetEvent, PresetResponse, TestModelProvider,
    };

    use super::*;

    fn fast_retry(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_interval: Duration::from_millis(1),
            max_interval: Duration::from_millis(5),
            multiplier: 2.0,
            max_elapsed_time: Duration::from_secs(5),
        }
    }

    fn hello_request() -> ModelRequest {
        ModelRequest {
            messages: vec![ModelMessage::User("Hi".to_owned())],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_send_request() {
        let mut model_provider = TestModelProvider::default();
        model_provider.use_opaque_messages();
        model_provider.add_assistant_turn(PresetResponse::with_events([
            PresetEvent::MessageDelta("How ".to_owned()),
            PresetEvent::MessageDelta("are ".to_owned()),
            PresetEvent::MessageDelta("you?".to_owned()),
        ]));

        let model_client = ModelClient::new(model_provider);

        for _ in 0..3 {
            let deltas = Arc::new(Mutex::new(vec![]));
            let on_transcript: TranscriptFn = {
                let deltas = Arc::clone(&deltas);
                Arc::new(move |delta| deltas.lock().unwrap().push(delta))
            };
            let resp = model_client
                .send_request(hello_request(), Some(on_transcript))
                .await
                .unwrap();
            assert_eq!(resp.transcript, "How are you?");
            assert_eq!(resp.finish_reason, Some(ModelFinishReason::Stop));
            assert!(resp.opaque_msg.is_some());
            assert_eq!(deltas.lock().unwrap().len(), 3);
        }
    }

    #[tokio::test]
    async fn test_error_handling() {
        let model_provider = TestModelProvider::default();
        let model_client = ModelClient::new(model_provider);
        let resp_or_err =
            model_client.send_request(hello_request(), None).await;
        assert!(resp_or_err.is_err());
    }

    #[tokio::test]
    async fn test_retry_transient_failures() {
        let mut model_provider = TestModelProvider::default();
        model_provider
            .add_assistant_turn(PresetResponse::text("Recovered.").with_failures(2));
        let model_client = ModelClient::new(model_provider.clone());

        let retries = Mutex::new(Vec::new());
        let on_retry = |err: &dyn ModelProviderError, _delay: Duration| {
            retries.lock().unwrap().push(err.kind());
        };
        let resp = model_client
            .send_with_retry(&hello_request(), &fast_retry(3), None, &on_retry)
            .await
            .unwrap();
        assert_eq!(resp.transcript, "Recovered.");
        assert_eq!(model_provider.requests().len(), 3);
        assert_eq!(
            *retries.lock().unwrap(),
            [ErrorKind::Transient, ErrorKind::Transient]
        );
    }

    #[tokio::test]
    async fn test_retry_rate_limit() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_assistant_turn(
            PresetResponse::text("Fine.")
                .with_failures(1)
                .with_failure_kind(ErrorKind::RateLimitExceeded),
        );
        let model_client = ModelClient::new(model_provider.clone());

        let resp = model_client
            .send_with_retry(&hello_request(), &fast_retry(2), None, &|_, _| {})
            .await
            .unwrap();
        assert_eq!(resp.transcript, "Fine.");
    }

    #[tokio::test]
    async fn test_retry_exhausted() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_assistant_turn(PresetResponse::text("").with_failures(0));
        let model_client = ModelClient::new(model_provider.clone());

        let err = model_client
            .send_with_retry(&hello_request(), &fast_retry(4), None, &|_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Model(_)));
        assert_eq!(model_provider.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_unauthorized_is_not_retried() {
        let mut model_provider = TestModelProvider::default();
        model_provider.add_assistant_turn(
            PresetResponse::text("")
                .with_failures(0)
                .with_failure_kind(ErrorKind::Unauthorized),
        );
        let model_client = ModelClient::new(model_provider.clone());

        let err = model_client
            .send_with_retry(&hello_request(), &fast_retry(5), None, &|_, _| {})
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Unauthorized(_)));
        assert_eq!(model_provider.requests().len(), 1);
    }
}
