use std::error::Error as StdError;
use std::fmt::{self, Display};
use std::sync::Arc;

use serde_json::Value;

use crate::{
    BatchOptions, BatchReport, BatchUpsertError, Embedder, Error, Metadata,
    ScoredVector, Vector, VectorStore, upsert_batched,
};

/// Splits `text` into chunks of at most `max_chars` characters.
///
/// A chunk ends at the last whitespace inside its window when there is one,
/// so words are only cut when a single word is longer than the window.
/// Concatenating the chunks gives back `text`.
pub fn chunk_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = vec![];
    let mut rest = text;
    while !rest.is_empty() {
        let Some((window_end, _)) = rest.char_indices().nth(max_chars) else {
            chunks.push(rest.to_owned());
            break;
        };
        let window = &rest[..window_end];
        let cut = match window.rfind(char::is_whitespace) {
            Some(pos) if pos > 0 => {
                // Keep the whitespace with the chunk it ends.
                let ws_len = window[pos..].chars().next().map_or(1, char::len_utf8);
                pos + ws_len
            }
            _ => window_end,
        };
        chunks.push(rest[..cut].to_owned());
        rest = &rest[cut..];
    }
    chunks
}

/// Returned by [`Indexer::index`].
#[derive(Debug)]
pub enum IndexError {
    /// Embedding the chunks failed, nothing was written.
    Embedding(Error),
    /// Some batches could not be written.
    Upsert(BatchUpsertError),
}

impl Display for IndexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexError::Embedding(err) => write!(f, "embedding failed: {err}"),
            IndexError::Upsert(err) => write!(f, "upsert failed: {err}"),
        }
    }
}

impl StdError for IndexError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            IndexError::Embedding(err) => Some(err),
            IndexError::Upsert(err) => Some(err),
        }
    }
}

/// Pinecone rejects delete requests naming more ids than this.
const MAX_DELETE_IDS: usize = 1000;

/// Chunks, embeds and stores documents, and answers text queries.
#[derive(Clone)]
pub struct Indexer {
    embedder: Arc<dyn Embedder>,
    store: Arc<dyn VectorStore>,
    chunk_size: usize,
    embed_batch_size: usize,
    batch_options: BatchOptions,
}

impl Indexer {
    /// Creates an indexer with chunks of up to 8000 characters.
    pub fn new(embedder: Arc<dyn Embedder>, store: Arc<dyn VectorStore>) -> Self {
        Self {
            embedder,
            store,
            chunk_size: 8000,
            embed_batch_size: 16,
            batch_options: BatchOptions::default(),
        }
    }

    /// Sets the maximum chunk length in characters.
    #[inline]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Sets how many chunks are sent in one embedding request.
    #[inline]
    pub fn with_embed_batch_size(mut self, embed_batch_size: usize) -> Self {
        self.embed_batch_size = embed_batch_size;
        self
    }

    /// Sets the options used to upsert the chunks.
    #[inline]
    pub fn with_batch_options(mut self, batch_options: BatchOptions) -> Self {
        self.batch_options = batch_options;
        self
    }

    /// Indexes a document under `id`.
    ///
    /// Chunk `n` is stored as `{id}_chunk_{n}` with the chunk text in the
    /// `content` field, then the caller's `metadata`, then `chunk_id`.
    pub async fn index(
        &self,
        namespace: &str,
        id: &str,
        text: &str,
        metadata: &Metadata,
    ) -> Result<BatchReport, IndexError> {
        let chunks = chunk_text(text, self.chunk_size);
        debug!(id, chunks = chunks.len(), "indexing document");

        let mut vectors = Vec::with_capacity(chunks.len());
        for group in chunks.chunks(self.embed_batch_size.max(1)) {
            let embeddings = self
                .embedder
                .embed(group)
                .await
                .map_err(IndexError::Embedding)?;
            for (chunk, values) in group.iter().zip(embeddings) {
                let n = vectors.len();
                let mut chunk_metadata = Metadata::new();
                chunk_metadata.insert("content".to_owned(), Value::from(chunk.as_str()));
                chunk_metadata.extend(metadata.clone());
                chunk_metadata.insert("chunk_id".to_owned(), Value::from(n));
                vectors.push(Vector {
                    id: format!("{id}_chunk_{n}"),
                    values,
                    metadata: chunk_metadata,
                });
            }
        }

        upsert_batched(self.store.as_ref(), namespace, vectors, &self.batch_options)
            .await
            .map_err(IndexError::Upsert)
    }

    /// Returns the `top_k` chunks closest to `query`.
    pub async fn query(
        &self,
        namespace: &str,
        query: &str,
        top_k: usize,
    ) -> Result<Vec<ScoredVector>, Error> {
        let mut embeddings = self.embedder.embed(&[query.to_owned()]).await?;
        let Some(embedding) = embeddings.pop() else {
            return Ok(vec![]);
        };
        self.store.query(namespace, &embedding, top_k).await
    }

    /// Deletes every chunk of a document, returning how many were removed.
    pub async fn delete_document(
        &self,
        namespace: &str,
        id: &str,
    ) -> Result<usize, Error> {
        let prefix = format!("{id}_chunk_");
        let mut ids = vec![];
        let mut token = None;
        loop {
            let page = self
                .store
                .list_ids(namespace, Some(&prefix), 100, token.as_deref())
                .await?;
            ids.extend(page.ids);
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        for batch in ids.chunks(MAX_DELETE_IDS) {
            self.store.delete(namespace, batch).await?;
        }
        Ok(ids.len())
    }
}
