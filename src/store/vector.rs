// src/store/vector.rs
// Typed wrapper over the vector index (documents + QA cache collections)

use anyhow::Context;
use async_trait::async_trait;
use qdrant_client::Qdrant;
use qdrant_client::qdrant::{
    Condition, CreateCollectionBuilder, DeletePointsBuilder, Distance, Filter, ListValue,
    PointStruct, ScrollPointsBuilder, SearchPointsBuilder, Struct, UpsertPointsBuilder,
    Value as QdrantValue, VectorParamsBuilder, value::Kind,
};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Result, TrellisError};

/// A single search hit. `score` is cosine similarity on unit-norm vectors;
/// `distance` is the complementary `1 - score`.
#[derive(Debug, Clone)]
pub struct Hit {
    pub id: String,
    pub score: f32,
    pub distance: f32,
    pub text: String,
    pub metadata: Value,
}

impl Hit {
    /// Metadata field lookup, tolerant of missing objects.
    pub fn meta_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(|v| v.as_str())
    }

    pub fn meta_i64(&self, key: &str) -> Option<i64> {
        self.metadata.get(key).and_then(|v| v.as_i64())
    }
}

/// Storage seam for the vector index. All retrieval and cache logic goes
/// through this trait; no component calls the index client directly.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Idempotently create a cosine collection of the given dimension.
    async fn create_collection(&self, name: &str, dim: u64) -> Result<()>;

    /// Insert rows; all slices must be the same length. The write is flushed
    /// before returning so subsequent searches see the rows. Returns the
    /// assigned ids.
    async fn insert(
        &self,
        name: &str,
        embeddings: &[Vec<f32>],
        texts: &[String],
        metadatas: &[Value],
    ) -> Result<Vec<String>>;

    /// Nearest-neighbour search over unit-norm vectors.
    async fn search(&self, name: &str, query: &[f32], k: u64) -> Result<Vec<Hit>>;

    /// Metadata-predicate query (no vector), e.g. all chunks of a document.
    async fn query_by_metadata(
        &self,
        name: &str,
        field: &str,
        value: &str,
        limit: u32,
    ) -> Result<Vec<Hit>>;

    /// Delete every row whose metadata field equals the value. Used for
    /// cascading document deletion and QA cache eviction.
    async fn delete_by_metadata(&self, name: &str, field: &str, value: &str) -> Result<()>;

    /// Count rows matching a metadata predicate.
    async fn count_by_metadata(&self, name: &str, field: &str, value: &str) -> Result<usize>;
}

/// Production implementation over Qdrant.
pub struct QdrantStore {
    client: Qdrant,
}

impl QdrantStore {
    /// Connect to Qdrant. The store may be unavailable at startup; callers
    /// that need it (the ingestion worker) retry with backoff.
    pub fn connect(url: &str) -> Result<Self> {
        let client = Qdrant::from_url(url)
            .skip_compatibility_check()
            .build()
            .context("failed to connect to vector index")?;
        Ok(Self { client })
    }

    fn metadata_filter(field: &str, value: &str) -> Filter {
        Filter::must([Condition::matches(
            format!("metadata.{field}"),
            value.to_string(),
        )])
    }

    fn point_to_hit(point: qdrant_client::qdrant::ScoredPoint) -> Option<Hit> {
        let id = point.id.as_ref().and_then(point_id_string)?;
        let mut payload = point.payload;
        let text = payload
            .remove("text")
            .and_then(|v| match v.kind {
                Some(Kind::StringValue(s)) => Some(s),
                _ => None,
            })
            .unwrap_or_default();
        let metadata = payload
            .remove("metadata")
            .map(|v| qdrant_to_json(&v))
            .unwrap_or(Value::Null);
        Some(Hit {
            id,
            score: point.score,
            distance: 1.0 - point.score,
            text,
            metadata,
        })
    }

    fn retrieved_to_hit(point: qdrant_client::qdrant::RetrievedPoint) -> Option<Hit> {
        let id = point.id.as_ref().and_then(point_id_string)?;
        let mut payload = point.payload;
        let text = payload
            .remove("text")
            .and_then(|v| match v.kind {
                Some(Kind::StringValue(s)) => Some(s),
                _ => None,
            })
            .unwrap_or_default();
        let metadata = payload
            .remove("metadata")
            .map(|v| qdrant_to_json(&v))
            .unwrap_or(Value::Null);
        Some(Hit {
            id,
            score: 0.0,
            distance: 0.0,
            text,
            metadata,
        })
    }
}

#[async_trait]
impl VectorIndex for QdrantStore {
    async fn create_collection(&self, name: &str, dim: u64) -> Result<()> {
        let exists = self
            .client
            .collection_exists(name)
            .await
            .map_err(|e| TrellisError::Store(e.to_string()))?;
        if exists {
            return Ok(());
        }

        info!(collection = name, dim, "creating vector collection");
        match self
            .client
            .create_collection(
                CreateCollectionBuilder::new(name)
                    .vectors_config(VectorParamsBuilder::new(dim, Distance::Cosine)),
            )
            .await
        {
            Ok(_) => Ok(()),
            Err(e) => {
                // Another process may have created it between the exists
                // check and the create call.
                if e.to_string().contains("already exists") {
                    debug!(collection = name, "collection created concurrently");
                    Ok(())
                } else {
                    Err(TrellisError::Store(format!(
                        "failed to create collection {name}: {e}"
                    )))
                }
            }
        }
    }

    async fn insert(
        &self,
        name: &str,
        embeddings: &[Vec<f32>],
        texts: &[String],
        metadatas: &[Value],
    ) -> Result<Vec<String>> {
        if embeddings.len() != texts.len() || texts.len() != metadatas.len() {
            return Err(TrellisError::Input(format!(
                "insert slices disagree: {} embeddings, {} texts, {} metadatas",
                embeddings.len(),
                texts.len(),
                metadatas.len()
            )));
        }

        let mut ids = Vec::with_capacity(embeddings.len());
        let mut points = Vec::with_capacity(embeddings.len());
        for ((embedding, text), metadata) in embeddings.iter().zip(texts).zip(metadatas) {
            let id = Uuid::new_v4().to_string();
            let mut payload: HashMap<String, QdrantValue> = HashMap::new();
            payload.insert("text".to_string(), text.clone().into());
            payload.insert("metadata".to_string(), json_to_qdrant(metadata));
            points.push(PointStruct::new(id.clone(), embedding.clone(), payload));
            ids.push(id);
        }

        // wait(true) blocks until the write is visible to searches.
        self.client
            .upsert_points(UpsertPointsBuilder::new(name, points).wait(true))
            .await
            .map_err(|e| TrellisError::Store(format!("upsert into {name} failed: {e}")))?;

        debug!(collection = name, rows = ids.len(), "inserted vectors");
        Ok(ids)
    }

    async fn search(&self, name: &str, query: &[f32], k: u64) -> Result<Vec<Hit>> {
        let results = self
            .client
            .search_points(
                SearchPointsBuilder::new(name, query.to_vec(), k).with_payload(true),
            )
            .await
            .map_err(|e| TrellisError::Store(format!("search in {name} failed: {e}")))?;

        Ok(results
            .result
            .into_iter()
            .filter_map(Self::point_to_hit)
            .collect())
    }

    async fn query_by_metadata(
        &self,
        name: &str,
        field: &str,
        value: &str,
        limit: u32,
    ) -> Result<Vec<Hit>> {
        let response = self
            .client
            .scroll(
                ScrollPointsBuilder::new(name)
                    .filter(Self::metadata_filter(field, value))
                    .limit(limit)
                    .with_payload(true),
            )
            .await
            .map_err(|e| TrellisError::Store(format!("query in {name} failed: {e}")))?;

        Ok(response
            .result
            .into_iter()
            .filter_map(Self::retrieved_to_hit)
            .collect())
    }

    async fn delete_by_metadata(&self, name: &str, field: &str, value: &str) -> Result<()> {
        self.client
            .delete_points(
                DeletePointsBuilder::new(name)
                    .points(Self::metadata_filter(field, value))
                    .wait(true),
            )
            .await
            .map_err(|e| TrellisError::Store(format!("delete from {name} failed: {e}")))?;
        debug!(collection = name, field, value, "deleted vectors by metadata");
        Ok(())
    }

    async fn count_by_metadata(&self, name: &str, field: &str, value: &str) -> Result<usize> {
        let mut total = 0usize;
        let mut offset: Option<qdrant_client::qdrant::PointId> = None;
        let page = 256u32;

        loop {
            let mut builder = ScrollPointsBuilder::new(name)
                .filter(Self::metadata_filter(field, value))
                .limit(page)
                .with_payload(false)
                .with_vectors(false);
            if let Some(off) = offset.take() {
                builder = builder.offset(off);
            }

            let response = self
                .client
                .scroll(builder)
                .await
                .map_err(|e| TrellisError::Store(format!("count in {name} failed: {e}")))?;

            if response.result.is_empty() {
                break;
            }
            total += response.result.len();
            if response.result.len() < page as usize {
                break;
            }
            offset = response.result.last().and_then(|p| p.id.clone());
        }

        Ok(total)
    }
}

fn point_id_string(id: &qdrant_client::qdrant::PointId) -> Option<String> {
    use qdrant_client::qdrant::point_id::PointIdOptions;
    match &id.point_id_options {
        Some(PointIdOptions::Num(n)) => Some(n.to_string()),
        Some(PointIdOptions::Uuid(u)) => Some(u.clone()),
        None => None,
    }
}

/// Convert a JSON value into the index's payload value type.
fn json_to_qdrant(value: &Value) -> QdrantValue {
    let kind = match value {
        Value::Null => Kind::NullValue(0),
        Value::Bool(b) => Kind::BoolValue(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Kind::IntegerValue(i)
            } else {
                Kind::DoubleValue(n.as_f64().unwrap_or(0.0))
            }
        }
        Value::String(s) => Kind::StringValue(s.clone()),
        Value::Array(items) => Kind::ListValue(ListValue {
            values: items.iter().map(json_to_qdrant).collect(),
        }),
        Value::Object(map) => Kind::StructValue(Struct {
            fields: map
                .iter()
                .map(|(k, v)| (k.clone(), json_to_qdrant(v)))
                .collect(),
        }),
    };
    QdrantValue { kind: Some(kind) }
}

fn qdrant_to_json(value: &QdrantValue) -> Value {
    match &value.kind {
        Some(Kind::NullValue(_)) | None => Value::Null,
        Some(Kind::BoolValue(b)) => Value::Bool(*b),
        Some(Kind::IntegerValue(i)) => Value::from(*i),
        Some(Kind::DoubleValue(d)) => {
            serde_json::Number::from_f64(*d).map(Value::Number).unwrap_or(Value::Null)
        }
        Some(Kind::StringValue(s)) => Value::String(s.clone()),
        Some(Kind::ListValue(list)) => {
            Value::Array(list.values.iter().map(qdrant_to_json).collect())
        }
        Some(Kind::StructValue(fields)) => Value::Object(
            fields
                .fields
                .iter()
                .map(|(k, v)| (k.clone(), qdrant_to_json(v)))
                .collect(),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn json_roundtrips_through_payload_values() {
        let original = json!({
            "document_uuid": "d-1",
            "chunk_index": 3,
            "permission": 0,
            "tags": ["a", "b"],
            "nested": {"score": 0.5, "ok": true}
        });
        let roundtripped = qdrant_to_json(&json_to_qdrant(&original));
        assert_eq!(original, roundtripped);
    }

    #[test]
    fn hit_metadata_accessors_tolerate_missing_fields() {
        let hit = Hit {
            id: "1".into(),
            score: 0.9,
            distance: 0.1,
            text: "t".into(),
            metadata: json!({"document_uuid": "d-1", "chunk_index": 2}),
        };
        assert_eq!(hit.meta_str("document_uuid"), Some("d-1"));
        assert_eq!(hit.meta_i64("chunk_index"), Some(2));
        assert_eq!(hit.meta_str("missing"), None);

        let null_hit = Hit {
            id: "2".into(),
            score: 0.0,
            distance: 1.0,
            text: String::new(),
            metadata: Value::Null,
        };
        assert_eq!(null_hit.meta_str("anything"), None);
    }
}
