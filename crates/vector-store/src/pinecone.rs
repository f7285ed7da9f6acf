use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{
    Error, ErrorKind, IdPage, NamespaceSummary, ScoredVector, Vector,
    VectorStore,
};

const API_VERSION: &str = "2024-07";
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// A client for the data plane of a Pinecone index.
#[derive(Clone)]
pub struct PineconeStore {
    client: Client,
    base: Url,
    api_key: String,
    timeout: Duration,
}

impl Debug for PineconeStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PineconeStore")
            .field("base", &self.base.as_str())
            .field("api_key", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

impl PineconeStore {
    /// Creates a client for the index served at `host`.
    ///
    /// `host` is the index host shown in the Pinecone console. The scheme
    /// defaults to `https` when it is left out.
    pub fn new(host: &str, api_key: impl Into<String>) -> Result<Self, Error> {
        let mut host = if host.contains("://") {
            host.to_owned()
        } else {
            format!("https://{host}")
        };
        // `Url::join` replaces the last segment unless the base ends
        // with a slash.
        if !host.ends_with('/') {
            host.push('/');
        }
        let base = Url::parse(&host).map_err(|err| {
            Error::new(ErrorKind::InvalidInput, format!("invalid host `{host}`: {err}"))
        })?;
        Ok(Self {
            client: Client::new(),
            base,
            api_key: api_key.into(),
            timeout: DEFAULT_TIMEOUT,
        })
    }

    /// Sets the per-request timeout.
    #[inline]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn endpoint(&self, path: &str) -> Result<Url, Error> {
        self.base.join(path).map_err(|err| {
            Error::new(ErrorKind::InvalidInput, format!("invalid path `{path}`: {err}"))
        })
    }

    async fn send<T: DeserializeOwned>(
        &self,
        req: RequestBuilder,
    ) -> Result<T, Error> {
        let resp = req
            .header("Api-Key", &self.api_key)
            .header("X-Pinecone-API-Version", API_VERSION)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(Error::from_reqwest)?;
        if !resp.status().is_success() {
            let err = Error::from_response(resp).await;
            debug!("pinecone request failed: {err}");
            return Err(err);
        }
        resp.json::<T>().await.map_err(Error::from_reqwest)
    }
}

#[derive(Serialize)]
struct UpsertRequest<'a> {
    vectors: &'a [Vector],
    namespace: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpsertResponse {
    upserted_count: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest<'a> {
    namespace: &'a str,
    vector: &'a [f32],
    top_k: usize,
    include_metadata: bool,
    include_values: bool,
}

#[derive(Deserialize)]
struct QueryResponse {
    #[serde(default)]
    matches: Vec<ScoredVector>,
}

#[derive(Serialize)]
struct DeleteRequest<'a> {
    ids: &'a [String],
    namespace: &'a str,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    vectors: Vec<ListItem>,
    pagination: Option<Pagination>,
}

#[derive(Deserialize)]
struct ListItem {
    id: String,
}

#[derive(Deserialize)]
struct Pagination {
    next: Option<String>,
}

#[derive(Deserialize)]
struct StatsResponse {
    #[serde(default)]
    namespaces: HashMap<String, NamespaceStats>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NamespaceStats {
    #[serde(default)]
    vector_count: u64,
}

#[async_trait]
impl VectorStore for PineconeStore {
    async fn upsert(
        &self,
        namespace: &str,
        vectors: &[Vector],
    ) -> Result<usize, Error> {
        let body = UpsertRequest { vectors, namespace };
        let req = self.client.post(self.endpoint("vectors/upsert")?).json(&body);
        let resp: UpsertResponse = self.send(req).await?;
        trace!(namespace, count = resp.upserted_count, "upserted vectors");
        Ok(resp.upserted_count)
    }

    async fn query(
        &self,
        namespace: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredVector>, Error> {
        let body = QueryRequest {
            namespace,
            vector: embedding,
            top_k,
            include_metadata: true,
            include_values: false,
        };
        let req = self.client.post(self.endpoint("query")?).json(&body);
        let resp: QueryResponse = self.send(req).await?;
        Ok(resp.matches)
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<(), Error> {
        let body = DeleteRequest { ids, namespace };
        let req = self.client.post(self.endpoint("vectors/delete")?).json(&body);
        let _: IgnoredAny = self.send(req).await?;
        Ok(())
    }

    async fn list_ids(
        &self,
        namespace: &str,
        prefix: Option<&str>,
        limit: usize,
        pagination_token: Option<&str>,
    ) -> Result<IdPage, Error> {
        let mut url = self.endpoint("vectors/list")?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("namespace", namespace);
            query.append_pair("limit", &limit.max(1).to_string());
            if let Some(prefix) = prefix {
                query.append_pair("prefix", prefix);
            }
            if let Some(token) = pagination_token {
                query.append_pair("paginationToken", token);
            }
        }
        let resp: ListResponse = self.send(self.client.get(url)).await?;
        Ok(IdPage {
            ids: resp.vectors.into_iter().map(|v| v.id).collect(),
            next_token: resp.pagination.and_then(|p| p.next),
        })
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceSummary>, Error> {
        let req = self.client.get(self.endpoint("describe_index_stats")?);
        let resp: StatsResponse = self.send(req).await?;
        let mut summaries = resp
            .namespaces
            .into_iter()
            .map(|(name, stats)| NamespaceSummary {
                name,
                vector_count: stats.vector_count,
            })
            .collect::<Vec<_>>();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }
}
