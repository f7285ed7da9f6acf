use std::fmt::{self, Debug};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header};
use serde::{Deserialize, Serialize};

use crate::{Error, ErrorKind};

/// Turns text into embeddings.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embeds each input, returning one embedding per input in order.
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, Error>;
}

/// An [`Embedder`] backed by an OpenAI-compatible `/embeddings` endpoint.
#[derive(Clone)]
pub struct OpenAIEmbedder {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    timeout: Duration,
}

impl Debug for OpenAIEmbedder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAIEmbedder")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl OpenAIEmbedder {
    /// Creates an embedder using `text-embedding-ada-002` on the public API.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: "https://api.openai.com/v1".to_owned(),
            model: "text-embedding-ada-002".to_owned(),
            timeout: Duration::from_secs(60),
        }
    }

    /// Sets the API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.base_url = base_url.trim_end_matches('/').to_owned();
        self
    }

    /// Sets the embedding model.
    #[inline]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Returns the embedding model.
    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, Error> {
        if inputs.is_empty() {
            return Ok(vec![]);
        }
        let body = EmbeddingRequest {
            model: &self.model,
            input: inputs,
        };
        let resp = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header(header::AUTHORIZATION, format!("Bearer {}", self.api_key))
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(Error::from_reqwest)?;
        if !resp.status().is_success() {
            return Err(Error::from_response(resp).await);
        }

        let mut data = resp
            .json::<EmbeddingResponse>()
            .await
            .map_err(Error::from_reqwest)?
            .data;
        if data.len() != inputs.len() {
            return Err(Error::new(
                ErrorKind::Other,
                format!(
                    "expected {} embeddings, got {}",
                    inputs.len(),
                    data.len()
                ),
            ));
        }
        data.sort_by_key(|d| d.index);
        trace!(count = data.len(), "received embeddings");
        Ok(data.into_iter().map(|d| d.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use mockito::Matcher;
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn test_embed_keeps_input_order() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/embeddings")
            .match_header("authorization", "Bearer sk-test")
            .match_body(Matcher::Json(json!({
                "model": "text-embedding-ada-002",
                "input": ["first", "second"],
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"data":[
                    {"index":1,"embedding":[0.0,1.0]},
                    {"index":0,"embedding":[1.0,0.0]}
                ]}"#,
            )
            .create_async()
            .await;

        let embedder = OpenAIEmbedder::new("sk-test").with_base_url(server.url());
        let embeddings = embedder
            .embed(&["first".to_owned(), "second".to_owned()])
            .await
            .unwrap();
        assert_eq!(embeddings, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_embed_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/embeddings")
            .with_status(500)
            .create_async()
            .await;

        let embedder = OpenAIEmbedder::new("sk-test").with_base_url(server.url());
        let err = embedder.embed(&["x".to_owned()]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Transient);
    }
}
