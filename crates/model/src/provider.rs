use std::error::Error;
use std::time::Duration;

use crate::error::ErrorKind;
use crate::request::ModelRequest;
use crate::response::ModelResponse;

/// The error type for a model provider.
pub trait ModelProviderError: Error + Send + Sync + 'static {
    /// Returns the kind of this error.
    fn kind(&self) -> ErrorKind;

    /// Returns how long the provider asked the caller to wait before
    /// sending the request again, if it said so.
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

/// A chat-completion backend.
///
/// A provider turns a [`ModelRequest`] into a streaming [`ModelResponse`].
/// It is shared between runs, so it must not keep per-request state.
pub trait ModelProvider: Send + Sync {
    /// The error type that may be returned by the provider.
    type Error: ModelProviderError;

    /// The response type for this provider.
    type Response: ModelResponse<Error = Self::Error>;

    /// Submits a request.
    ///
    /// The returned future must not borrow `self` or `req`, so it can be
    /// moved to another task.
    fn send_request(
        &self,
        req: &ModelRequest,
    ) -> impl Future<Output = Result<Self::Response, Self::Error>> + Send + 'static;
}
