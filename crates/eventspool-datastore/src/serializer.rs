//! Value serialization for datastore records.

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::DataStoreResult;

/// Turns a value into the bytes of a `Data` block.
pub trait DataSerializer<T>: Send + Sync {
    /// Serializes `value`.
    fn serialize(&self, value: &T) -> DataStoreResult<Vec<u8>>;
}

/// Turns the bytes of a `Data` block back into a value.
pub trait DataDeserializer<T>: Send + Sync {
    /// Deserializes `bytes`.
    fn deserialize(&self, bytes: &[u8]) -> DataStoreResult<T>;
}

/// JSON through `serde_json`, for any serde type.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerde;

impl<T: Serialize> DataSerializer<T> for JsonSerde {
    fn serialize(&self, value: &T) -> DataStoreResult<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }
}

impl<T: DeserializeOwned> DataDeserializer<T> for JsonSerde {
    fn deserialize(&self, bytes: &[u8]) -> DataStoreResult<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Session {
        id: String,
        views: u32,
    }

    #[test]
    fn test_json_round_trip() {
        let value = Session {
            id: "abc".to_string(),
            views: 3,
        };
        let bytes = DataSerializer::serialize(&JsonSerde, &value).unwrap();
        assert_eq!(bytes, br#"{"id":"abc","views":3}"#);
        let back: Session = DataDeserializer::deserialize(&JsonSerde, &bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn test_json_rejects_garbage() {
        let result: DataStoreResult<Session> = DataDeserializer::deserialize(&JsonSerde, b"{");
        assert!(result.is_err());
    }
}
