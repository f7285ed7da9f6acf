use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::{
    Error, ErrorKind, IdPage, NamespaceSummary, ScoredVector, Vector,
    VectorStore,
};

/// An in-process store ranking by cosine similarity.
///
/// Ids are kept sorted, so listing pages are stable between calls.
#[derive(Debug, Default)]
pub struct MemoryVectorStore {
    namespaces: RwLock<HashMap<String, BTreeMap<String, Vector>>>,
}

impl MemoryVectorStore {
    /// Creates an empty store.
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0;
    let mut norm_a = 0.0;
    let mut norm_b = 0.0;
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a.sqrt() * norm_b.sqrt())
}

fn dimension_mismatch(expected: usize, got: usize) -> Error {
    Error::new(
        ErrorKind::InvalidInput,
        format!("vector dimension {got} does not match the namespace dimension {expected}"),
    )
}

#[async_trait]
impl VectorStore for MemoryVectorStore {
    async fn upsert(
        &self,
        namespace: &str,
        vectors: &[Vector],
    ) -> Result<usize, Error> {
        let mut namespaces = self.namespaces.write().await;
        let expected = namespaces
            .get(namespace)
            .and_then(|entries| entries.values().next())
            .map(|v| v.values.len())
            .or_else(|| vectors.first().map(|v| v.values.len()));

        // Validate everything before writing anything.
        for vector in vectors {
            if vector.values.is_empty() {
                return Err(Error::new(
                    ErrorKind::InvalidInput,
                    format!("vector `{}` has no values", vector.id),
                ));
            }
            if let Some(expected) = expected {
                if vector.values.len() != expected {
                    return Err(dimension_mismatch(expected, vector.values.len()));
                }
            }
        }

        let entries = namespaces.entry(namespace.to_owned()).or_default();
        for vector in vectors {
            entries.insert(vector.id.clone(), vector.clone());
        }
        Ok(vectors.len())
    }

    async fn query(
        &self,
        namespace: &str,
        embedding: &[f32],
        top_k: usize,
    ) -> Result<Vec<ScoredVector>, Error> {
        let namespaces = self.namespaces.read().await;
        let Some(entries) = namespaces.get(namespace) else {
            return Ok(vec![]);
        };

        let mut matches = Vec::with_capacity(entries.len());
        for vector in entries.values() {
            if vector.values.len() != embedding.len() {
                return Err(dimension_mismatch(vector.values.len(), embedding.len()));
            }
            matches.push(ScoredVector {
                id: vector.id.clone(),
                score: cosine_similarity(&vector.values, embedding),
                metadata: vector.metadata.clone(),
            });
        }
        // Entries come out in id order and the sort is stable, so ties
        // keep the lower id first.
        matches.sort_by(|a, b| b.score.total_cmp(&a.score));
        matches.truncate(top_k);
        Ok(matches)
    }

    async fn delete(&self, namespace: &str, ids: &[String]) -> Result<(), Error> {
        let mut namespaces = self.namespaces.write().await;
        if let Some(entries) = namespaces.get_mut(namespace) {
            for id in ids {
                entries.remove(id);
            }
            if entries.is_empty() {
                namespaces.remove(namespace);
            }
        }
        Ok(())
    }

    async fn list_ids(
        &self,
        namespace: &str,
        prefix: Option<&str>,
        limit: usize,
        pagination_token: Option<&str>,
    ) -> Result<IdPage, Error> {
        let namespaces = self.namespaces.read().await;
        let Some(entries) = namespaces.get(namespace) else {
            return Ok(IdPage::default());
        };
        let prefix = prefix.unwrap_or_default();
        let limit = limit.max(1);

        let mut ids = entries
            .keys()
            .filter(|id| pagination_token.is_none_or(|token| id.as_str() > token))
            .filter(|id| id.starts_with(prefix))
            .take(limit + 1)
            .cloned()
            .collect::<Vec<_>>();
        let next_token = if ids.len() > limit {
            ids.truncate(limit);
            ids.last().cloned()
        } else {
            None
        };
        Ok(IdPage { ids, next_token })
    }

    async fn list_namespaces(&self) -> Result<Vec<NamespaceSummary>, Error> {
        let namespaces = self.namespaces.read().await;
        let mut summaries = namespaces
            .iter()
            .map(|(name, entries)| NamespaceSummary {
                name: name.clone(),
                vector_count: entries.len() as u64,
            })
            .collect::<Vec<_>>();
        summaries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(summaries)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn vector(id: &str, values: &[f32]) -> Vector {
        Vector {
            id: id.to_owned(),
            values: values.to_vec(),
            metadata: Default::default(),
        }
    }

    #[tokio::test]
    async fn test_query_ranks_by_similarity() {
        let store = MemoryVectorStore::new();
        let mut north = vector("north", &[0.0, 1.0]);
        north.metadata.insert("content".to_owned(), json!("up"));
        store
            .upsert(
                "docs",
                &[north, vector("east", &[1.0, 0.0]), vector("ne", &[1.0, 1.0])],
            )
            .await
            .unwrap();

        let matches = store.query("docs", &[0.1, 1.0], 2).await.unwrap();
        let ids: Vec<_> = matches.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["north", "ne"]);
        assert!(matches[0].score > matches[1].score);
        assert_eq!(matches[0].content(), Some("up"));

        assert!(store.query("other", &[1.0, 0.0], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_replaces_and_checks_dimensions() {
        let store = MemoryVectorStore::new();
        store.upsert("", &[vector("a", &[1.0, 0.0])]).await.unwrap();
        store.upsert("", &[vector("a", &[0.0, 1.0])]).await.unwrap();

        let matches = store.query("", &[0.0, 1.0], 1).await.unwrap();
        assert_eq!(matches.len(), 1);
        assert!((matches[0].score - 1.0).abs() < 1e-6);

        let err = store
            .upsert("", &[vector("b", &[1.0, 0.0]), vector("c", &[1.0])])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        // Nothing from the rejected call was written.
        let page = store.list_ids("", None, 10, None).await.unwrap();
        assert_eq!(page.ids, ["a"]);
    }

    #[tokio::test]
    async fn test_list_ids_pages() {
        let store = MemoryVectorStore::new();
        let vectors: Vec<_> = ["doc_chunk_0", "doc_chunk_1", "doc_chunk_2", "misc"]
            .into_iter()
            .map(|id| vector(id, &[1.0]))
            .collect();
        store.upsert("ns", &vectors).await.unwrap();

        let first = store.list_ids("ns", Some("doc_"), 2, None).await.unwrap();
        assert_eq!(first.ids, ["doc_chunk_0", "doc_chunk_1"]);
        let token = first.next_token.unwrap();

        let second = store
            .list_ids("ns", Some("doc_"), 2, Some(&token))
            .await
            .unwrap();
        assert_eq!(second.ids, ["doc_chunk_2"]);
        assert_eq!(second.next_token, None);
    }

    #[tokio::test]
    async fn test_delete_and_namespaces() {
        let store = MemoryVectorStore::new();
        store
            .upsert("a", &[vector("x", &[1.0]), vector("y", &[1.0])])
            .await
            .unwrap();
        store.upsert("b", &[vector("z", &[1.0])]).await.unwrap();

        store.delete("b", &["z".to_owned()]).await.unwrap();
        store
            .delete("a", &["x".to_owned(), "missing".to_owned()])
            .await
            .unwrap();

        let namespaces = store.list_namespaces().await.unwrap();
        assert_eq!(
            namespaces,
            [NamespaceSummary {
                name: "a".to_owned(),
                vector_count: 1,
            }]
        );
    }
}
