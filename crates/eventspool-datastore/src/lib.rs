#![warn(missing_docs)]

//! eventspool datastore: small versioned key-value records next to the batch files
//!
//! Record layout: `[LAST_UPDATE_DATE][VERSION_CODE][DATA]` as TLV blocks, one file per key,
//! optionally encrypted with the feature's provider.

pub mod datastore;
pub mod error;
pub mod handle;
pub mod serializer;
pub mod tlv;

pub use datastore::{
    DataStoreContent, DataStoreFileHandler, DataStoreRead, ANY_VERSION, DATASTORE_EXPIRY_MS,
    DATASTORE_FORMAT_VERSION,
};
pub use error::{DataStoreError, DataStoreResult};
pub use handle::DataStoreHandle;
pub use serializer::{DataDeserializer, DataSerializer, JsonSerde};
pub use tlv::{decode_blocks, encode_blocks, validate_record, TlvBlock, TlvBlockType};
