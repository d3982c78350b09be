// Durable Record Model
//
// Items are stored as JSON text tagged with the Rust type they were encoded from.

use crate::error::{AppError, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::marker::PhantomData;

/// Bound for anything a queue can carry
pub trait QueueItem: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

impl<T> QueueItem for T where T: Serialize + DeserializeOwned + Clone + Send + Sync + 'static {}

/// Record as read back from a durable store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredRecord {
    /// FIFO position; strictly increasing in append order
    pub seq: i64,
    pub type_tag: String,
    pub payload: String,
    pub enqueued_at: i64, // epoch ms
}

/// Record about to be written to a durable store
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    pub type_tag: String,
    pub payload: String,
    pub enqueued_at: i64, // epoch ms
}

/// Encodes and decodes items of one registered type
pub struct ItemCodec<T> {
    type_tag: &'static str,
    _item: PhantomData<fn() -> T>,
}

impl<T> Clone for ItemCodec<T> {
    fn clone(&self) -> Self {
        Self {
            type_tag: self.type_tag,
            _item: PhantomData,
        }
    }
}

impl<T> std::fmt::Debug for ItemCodec<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ItemCodec")
            .field("type_tag", &self.type_tag)
            .finish()
    }
}

impl<T: QueueItem> Default for ItemCodec<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: QueueItem> ItemCodec<T> {
    pub fn new() -> Self {
        Self {
            type_tag: std::any::type_name::<T>(),
            _item: PhantomData,
        }
    }

    pub fn type_tag(&self) -> &'static str {
        self.type_tag
    }

    pub fn encode(&self, item: &T, enqueued_at: i64) -> Result<NewRecord> {
        Ok(NewRecord {
            type_tag: self.type_tag.to_string(),
            payload: serde_json::to_string(item)?,
            enqueued_at,
        })
    }

    /// Decode a stored record back into an item
    ///
    /// A record written under another tag is still accepted when its payload fits `T`
    /// (type paths change across refactors); one that does not fit is a type mismatch.
    pub fn decode(&self, record: &StoredRecord) -> Result<T> {
        serde_json::from_str(&record.payload).map_err(|e| {
            let reason = if record.type_tag != self.type_tag {
                format!(
                    "record {} was written as {}: {}",
                    record.seq, record.type_tag, e
                )
            } else {
                format!("record {}: {}", record.seq, e)
            };
            AppError::TypeMismatch {
                expected: self.type_tag.to_string(),
                reason,
            }
        })
    }

    /// Convert a dynamically typed value, rejecting anything that is not a `T`
    pub fn from_value(&self, value: serde_json::Value) -> Result<T> {
        serde_json::from_value(value).map_err(|e| AppError::TypeMismatch {
            expected: self.type_tag.to_string(),
            reason: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;
    use serde_json::json;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct TestData {
        test_string: String,
        test_int: i64,
    }

    #[test]
    fn test_encode_tags_with_type_name() {
        let codec = ItemCodec::<TestData>::new();
        let record = codec
            .encode(
                &TestData {
                    test_string: "A".to_string(),
                    test_int: 1,
                },
                1000,
            )
            .unwrap();

        assert!(record.type_tag.ends_with("TestData"));
        assert_eq!(record.enqueued_at, 1000);
        assert!(record.payload.contains("\"test_string\":\"A\""));
    }

    #[test]
    fn test_decode_foreign_payload_is_type_mismatch() {
        let codec = ItemCodec::<TestData>::new();
        let record = StoredRecord {
            seq: 7,
            type_tag: "other::Thing".to_string(),
            payload: r#"{"unrelated": true}"#.to_string(),
            enqueued_at: 0,
        };

        match codec.decode(&record) {
            Err(AppError::TypeMismatch { reason, .. }) => {
                assert!(reason.contains("other::Thing"));
                assert!(reason.contains("record 7"));
            }
            other => panic!("expected type mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_renamed_type_with_compatible_payload() {
        let codec = ItemCodec::<TestData>::new();
        let record = StoredRecord {
            seq: 1,
            type_tag: "old_crate::TestData".to_string(),
            payload: r#"{"test_string":"B","test_int":2}"#.to_string(),
            enqueued_at: 0,
        };

        let item = codec.decode(&record).unwrap();
        assert_eq!(item.test_string, "B");
    }

    #[test]
    fn test_from_value_rejects_wrong_shape() {
        let codec = ItemCodec::<TestData>::new();
        assert!(codec
            .from_value(json!({"test_string": "A", "test_int": 1}))
            .is_ok());
        assert!(matches!(
            codec.from_value(json!("just a string")),
            Err(AppError::TypeMismatch { .. })
        ));
    }
}
