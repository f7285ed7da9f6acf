use std::fmt::Debug;
use std::time::Duration;

use reqwest::header::{self, HeaderName};
use url::Url;

const DEFAULT_MODEL: &str = "gpt-4o-mini";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);

/// How the endpoint expects to be addressed and authenticated.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Flavor {
    /// `Authorization: Bearer` and a plain `/chat/completions` path.
    OpenAI,
    /// `api-key` header and an `api-version` query parameter. The
    /// deployment is part of the base URL.
    Azure { api_version: String },
}

/// Builder for [`OpenAIConfig`].
#[derive(Clone, PartialEq)]
pub struct OpenAIConfigBuilder {
    api_key: String,
    model: Option<String>,
    base_url: Option<String>,
    streaming: bool,
    temperature: Option<f32>,
    timeout: Option<Duration>,
    flavor: Flavor,
}

impl OpenAIConfigBuilder {
    /// Creates a builder with the given API key.
    #[inline]
    pub fn with_api_key<S: Into<String>>(api_key: S) -> Self {
        Self {
            api_key: api_key.into(),
            model: None,
            base_url: None,
            streaming: true,
            temperature: None,
            timeout: None,
            flavor: Flavor::OpenAI,
        }
    }

    /// Sets the model to use.
    #[inline]
    pub fn with_model<S: Into<String>>(mut self, model: S) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Sets a custom base URL.
    #[inline]
    pub fn with_base_url<S: Into<String>>(mut self, base_url: S) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    /// Targets an Azure OpenAI deployment.
    ///
    /// `endpoint` is the resource URL such as
    /// `https://my-resource.openai.azure.com`. Requests go to the
    /// deployment's `chat/completions` path with the given API version, and
    /// the deployment name is sent as the model.
    pub fn with_azure(
        mut self,
        endpoint: &str,
        deployment: &str,
        api_version: &str,
    ) -> Self {
        self.base_url = Some(format!(
            "{}/openai/deployments/{deployment}",
            endpoint.trim_end_matches('/')
        ));
        self.model = Some(deployment.to_owned());
        self.flavor = Flavor::Azure {
            api_version: api_version.to_owned(),
        };
        self
    }

    /// Selects between server-sent events (the default) and a single
    /// JSON body per completion.
    #[inline]
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Sets the sampling temperature. The server default is used if unset.
    #[inline]
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Sets the timeout of a whole request, including reading the body.
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Builds the configuration.
    #[inline]
    pub fn build(self) -> OpenAIConfig {
        let base_url = self
            .base_url
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        OpenAIConfig {
            api_key: self.api_key,
            model: self.model.unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            base_url: base_url.trim_end_matches('/').to_owned(),
            streaming: self.streaming,
            temperature: self.temperature,
            timeout: self.timeout.unwrap_or(DEFAULT_TIMEOUT),
            flavor: self.flavor,
        }
    }
}

impl Debug for OpenAIConfigBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIConfigBuilder")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("streaming", &self.streaming)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("flavor", &self.flavor)
            .finish()
    }
}

/// Configuration for the OpenAI-compatible provider.
#[derive(Clone, PartialEq)]
pub struct OpenAIConfig {
    pub(crate) api_key: String,
    pub(crate) model: String,
    pub(crate) base_url: String,
    pub(crate) streaming: bool,
    pub(crate) temperature: Option<f32>,
    pub(crate) timeout: Duration,
    pub(crate) flavor: Flavor,
}

impl OpenAIConfig {
    /// Returns the model name sent with every request.
    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Returns whether completions are streamed.
    #[inline]
    pub fn is_streaming(&self) -> bool {
        self.streaming
    }

    /// Returns whether this targets an Azure OpenAI deployment.
    #[inline]
    pub fn is_azure(&self) -> bool {
        matches!(self.flavor, Flavor::Azure { .. })
    }

    pub(crate) fn endpoint(&self, path: &str) -> String {
        let endpoint = format!("{}{path}", self.base_url);
        match &self.flavor {
            Flavor::OpenAI => endpoint,
            Flavor::Azure { api_version } => {
                // An unparsable base URL is left for the HTTP client to
                // report when the request is sent.
                match Url::parse_with_params(&endpoint, [("api-version", api_version)]) {
                    Ok(url) => url.into(),
                    Err(_) => endpoint,
                }
            }
        }
    }

    /// Returns the name and value of the authentication header.
    pub(crate) fn auth_header(&self) -> (HeaderName, String) {
        match self.flavor {
            Flavor::OpenAI => {
                (header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            }
            Flavor::Azure { .. } => {
                (HeaderName::from_static("api-key"), self.api_key.clone())
            }
        }
    }
}

impl Debug for OpenAIConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OpenAIConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("streaming", &self.streaming)
            .field("temperature", &self.temperature)
            .field("timeout", &self.timeout)
            .field("flavor", &self.flavor)
            .finish()
    }
}
