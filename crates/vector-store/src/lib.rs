//! Vector storage for embedded documents.
//!
//! A [`VectorStore`] keeps vectors in named namespaces. Two stores are
//! provided: [`MemoryVectorStore`] for local use and tests, and
//! [`PineconeStore`] for a hosted Pinecone index. Large uploads go through
//! [`upsert_batched`], and [`Indexer`] ties chunking, embedding and
//! uploading together.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod batch;
mod embed;
mod error;
mod indexer;
mod memory;
mod pinecone;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use batch::{BatchOptions, BatchReport, BatchRetry, BatchUpsertError, upsert_batched};
pub use embed::{Embedder, OpenAIEmbedder};
pub use error::{Error, ErrorKind};
pub use indexer::{IndexError, Indexer, chunk_text};
pub use memory::MemoryVectorStore;
pub use pinecone::PineconeStore;

/// Arbitrary JSON metadata attached to a vector.
pub type Metadata = Map<String, Value>;

/// A vector with its id and metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vector {
    /// Unique id within the namespace.
    pub id: String,
    /// The embedding.
    pub values: Vec<f32>,
    /// Metadata stored alongside the embedding.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Metadata,
}

/// A query match.
#[derive(Clone, Debug, PartialEq, Deserialize)]
pub struct ScoredVector {
    /// Id of the matched vector.
    pub id: String,
    /// Similarity to the query, higher is closer.
    pub score: f32,
    /// Metadata of the matched vector.
    #[serde(default)]
    pub metadata: Metadata,
}

impl ScoredVector {
    /// Returns the `content` metadata field, if it is a string.
    ///
    /// [`Indexer`] stores the chunk text there.
    pub fn content(&self) -> Option<&str> {
        self.metadata.get("content").and_then(Value::as_str)
    }
}

/// One page of vector ids.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IdPage {
    /// Ids in this page.
    pub ids: Vec<String>,
    /// Token for the next page, `None` on the last page.
    pub next_token: Option<String>,
}

/// Summary of one namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NamespaceSummary {
    /// Namespace name. The default namespace is the empty string.
    pub name: String,
    /// Number of vectors stored in it.
    pub vector_count: u64,
}

/// A store of vectors partitioned into namespaces.
#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Inserts or replaces vectors, returning how many were written.
    async fn upsert(
        &self,
        namespace: &str,
        vectors: &[Vector],
    ) -> Result<usize, Error>;

    /// Returns the `top_k` vectors closest to `embedding`, best first.
    async fn query(
        &self,
        namespace: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredVector>, Error>;

    /// Deletes vectors by id. Unknown ids are ignored.
    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<(), Error>;

    /// Lists ids starting with `prefix`, one page at a time.
    ///
    /// Pass the `next_token` of the previous page to continue.
    async fn list_ids(
        &self,
        namespace: &str,
        prefix: Option<&str>,
        limit: usize,
        pagination_token: Option<&str>,
    ) -> Result<IdPage, Error>;

    /// Lists the namespaces that hold vectors.
    async fn list_namespaces(&self) -> Result<Vec<NamespaceSummary>, Error>;
}
