//! Domain Value Objects

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Shard identifier in `[0, shard_count)`
pub type ShardId = usize;

/// Free-form metadata attached to an entity
pub type Metadata = serde_json::Map<String, Value>;

// =============================================================================
// Entity Record
// =============================================================================

/// A searchable entity: identifier, embedding and metadata.
///
/// The owning shard is not stored here; it is always derived from
/// `entity_id` by the router.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub entity_id: String,
    pub vector: Vec<f32>,
    #[serde(default)]
    pub metadata: Metadata,
}

impl EntityRecord {
    /// Create a record without metadata
    pub fn new(entity_id: impl Into<String>, vector: Vec<f32>) -> Self {
        Self {
            entity_id: entity_id.into(),
            vector,
            metadata: Metadata::new(),
        }
    }

    /// Attach a metadata field
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }
}

// =============================================================================
// Backend Wire Shapes
// =============================================================================

/// Unit of an upsert sent to a search backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: String,
    pub vector: Vec<f32>,
    pub payload: Metadata,
}

/// Search request sent to one backend collection
#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub collection: String,
    pub vector: Vec<f32>,
    pub limit: usize,
    pub score_threshold: f32,
}

impl SearchRequest {
    pub fn new(
        collection: impl Into<String>,
        vector: Vec<f32>,
        limit: usize,
        score_threshold: f32,
    ) -> Self {
        Self {
            collection: collection.into(),
            vector,
            limit,
            score_threshold,
        }
    }
}

/// A ranked point returned by a backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredPoint {
    pub id: String,
    pub score: f32,
    pub payload: Metadata,
}

// =============================================================================
// Merged Result
// =============================================================================

/// One entry of a merged, ranked search answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub entity_id: String,
    pub score: f32,
    #[serde(default)]
    pub metadata: Metadata,
    pub shard: ShardId,
}

impl SearchHit {
    /// Convert a backend point, reading `entity_id` and `metadata` from its payload.
    pub fn from_point(point: ScoredPoint, shard: ShardId) -> Self {
        let ScoredPoint {
            id,
            score,
            mut payload,
        } = point;

        let entity_id = match payload.remove("entity_id") {
            Some(Value::String(s)) => s,
            _ => id,
        };
        let metadata = match payload.remove("metadata") {
            Some(Value::Object(map)) => map,
            _ => Metadata::new(),
        };

        Self {
            entity_id,
            score,
            metadata,
            shard,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_record_builder() {
        let record = EntityRecord::new("img_1", vec![1.0, 0.0]).with_field("label", "cat");
        assert_eq!(record.entity_id, "img_1");
        assert_eq!(record.metadata["label"], json!("cat"));
    }

    #[test]
    fn test_hit_from_point_payload() {
        let mut payload = Metadata::new();
        payload.insert("entity_id".into(), json!("img_9"));
        payload.insert("metadata".into(), json!({"w": 640}));
        payload.insert("shard".into(), json!(3));

        let hit = SearchHit::from_point(
            ScoredPoint {
                id: "internal".into(),
                score: 0.75,
                payload,
            },
            3,
        );
        assert_eq!(hit.entity_id, "img_9");
        assert_eq!(hit.metadata["w"], json!(640));
        assert_eq!(hit.shard, 3);
    }

    #[test]
    fn test_hit_from_point_without_payload() {
        let hit = SearchHit::from_point(
            ScoredPoint {
                id: "raw".into(),
                score: 0.1,
                payload: Metadata::new(),
            },
            0,
        );
        assert_eq!(hit.entity_id, "raw");
        assert!(hit.metadata.is_empty());
    }
}
