//! Type-length-value block format of datastore records.
//!
//! Each block is `[type:u8][length:u32 BE][value]`. A record is exactly three
//! blocks in the order `LastUpdateDate`, `VersionCode`, `Data`.

use std::fmt;

use tracing::error;

use crate::error::{DataStoreError, DataStoreResult};

/// Size of the `[type][length]` block header.
pub const TLV_HEADER_SIZE: usize = 5;

/// Kind of a TLV block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TlvBlockType {
    /// Write time of the record, `u64` milliseconds.
    LastUpdateDate = 0x00,
    /// Version the value was written with, `u32`.
    VersionCode = 0x01,
    /// Serialized value.
    Data = 0x02,
}

impl TlvBlockType {
    /// Block order of a valid record.
    pub const RECORD_ORDER: [TlvBlockType; 3] = [
        TlvBlockType::LastUpdateDate,
        TlvBlockType::VersionCode,
        TlvBlockType::Data,
    ];

    /// Parses a raw type byte.
    pub fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            0x00 => Some(TlvBlockType::LastUpdateDate),
            0x01 => Some(TlvBlockType::VersionCode),
            0x02 => Some(TlvBlockType::Data),
            _ => None,
        }
    }
}

impl fmt::Display for TlvBlockType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlvBlockType::LastUpdateDate => write!(f, "LAST_UPDATE_DATE"),
            TlvBlockType::VersionCode => write!(f, "VERSION_CODE"),
            TlvBlockType::Data => write!(f, "DATA"),
        }
    }
}

/// One TLV block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlvBlock {
    /// Block kind.
    pub block_type: TlvBlockType,
    /// Block value.
    pub data: Vec<u8>,
}

impl TlvBlock {
    /// Block of `block_type` holding `data`.
    pub fn new(block_type: TlvBlockType, data: Vec<u8>) -> Self {
        Self { block_type, data }
    }

    /// Appends the encoded block to `out`.
    pub fn encode_into(&self, out: &mut Vec<u8>) -> DataStoreResult<()> {
        let len = u32::try_from(self.data.len()).map_err(|_| DataStoreError::CorruptData {
            reason: format!("{} block of {} bytes does not fit", self.block_type, self.data.len()),
        })?;
        out.reserve(TLV_HEADER_SIZE + self.data.len());
        out.push(self.block_type as u8);
        out.extend_from_slice(&len.to_be_bytes());
        out.extend_from_slice(&self.data);
        Ok(())
    }
}

/// Encodes blocks back to back.
pub fn encode_blocks(blocks: &[TlvBlock]) -> DataStoreResult<Vec<u8>> {
    let mut out = Vec::new();
    for block in blocks {
        block.encode_into(&mut out)?;
    }
    Ok(out)
}

/// Decodes blocks until the input ends or a block cannot be read.
///
/// An unknown type or a truncated block stops decoding; the blocks read so
/// far are returned and the problem is logged.
pub fn decode_blocks(bytes: &[u8]) -> Vec<TlvBlock> {
    let mut blocks = Vec::new();
    let mut offset = 0;
    while offset < bytes.len() {
        if bytes.len() - offset < TLV_HEADER_SIZE {
            error!(offset, remaining = bytes.len() - offset, "truncated TLV block header");
            break;
        }
        let raw_type = bytes[offset];
        let Some(block_type) = TlvBlockType::from_u8(raw_type) else {
            error!(offset, raw_type, "unknown TLV block type");
            break;
        };
        let mut len_bytes = [0u8; 4];
        len_bytes.copy_from_slice(&bytes[offset + 1..offset + TLV_HEADER_SIZE]);
        let len = u32::from_be_bytes(len_bytes) as usize;
        let start = offset + TLV_HEADER_SIZE;
        if bytes.len() - start < len {
            error!(offset, %block_type, len, "truncated TLV block value");
            break;
        }
        blocks.push(TlvBlock::new(block_type, bytes[start..start + len].to_vec()));
        offset = start + len;
    }
    blocks
}

/// Checks that `blocks` form a complete record: three blocks, no repeated
/// type, in record order.
pub fn validate_record(blocks: &[TlvBlock]) -> DataStoreResult<()> {
    let expected = TlvBlockType::RECORD_ORDER;
    if blocks.len() != expected.len() {
        return Err(DataStoreError::CorruptData {
            reason: format!("expected {} blocks, found {}", expected.len(), blocks.len()),
        });
    }
    for (i, block) in blocks.iter().enumerate() {
        if blocks[..i].iter().any(|b| b.block_type == block.block_type) {
            return Err(DataStoreError::CorruptData {
                reason: format!("block {} appears twice", block.block_type),
            });
        }
    }
    if blocks[0].block_type != expected[0]
        || blocks[1].block_type != expected[1]
        || blocks[2].block_type != expected[2]
    {
        return Err(DataStoreError::CorruptData {
            reason: "blocks out of order".to_string(),
        });
    }
    Ok(())
}
