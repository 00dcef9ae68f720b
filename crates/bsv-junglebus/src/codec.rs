//! Publication decoding.
//!
//! JungleBus publishes the same logical records in two encodings: protobuf
//! (binary fields as raw bytes) and JSON (binary fields as base64 strings).
//! Both decode into [`TransactionRecord`] or [`ControlMessage`], with binary
//! fields rendered as lower-case hex. A missing field decodes to its empty
//! value; only structurally malformed input is an error.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::Deserialize;

use crate::error::JungleBusError;
use crate::types::Protocol;

/// Status codes carried by control messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCode {
    /// Server is waiting for the next block.
    Waiting,
    /// Server-side error; the message text explains it.
    Error,
    /// All transactions of `block` have been published.
    BlockDone,
    /// A chain reorganisation was detected.
    Reorg,
    /// Synthesized locally when the data stream is paused for backpressure.
    Paused,
    /// Any code this client does not know about.
    Other(u32),
}

impl StatusCode {
    /// Code used for the locally synthesized paused status.
    pub const PAUSED_CODE: u32 = 999;

    /// Map a wire code to a status.
    pub fn from_code(code: u32) -> Self {
        match code {
            100 => Self::Waiting,
            101 => Self::Error,
            200 => Self::BlockDone,
            300 => Self::Reorg,
            Self::PAUSED_CODE => Self::Paused,
            other => Self::Other(other),
        }
    }

    /// Returns the integer status code.
    pub fn as_code(&self) -> u32 {
        match self {
            Self::Waiting => 100,
            Self::Error => 101,
            Self::BlockDone => 200,
            Self::Reorg => 300,
            Self::Paused => Self::PAUSED_CODE,
            Self::Other(code) => *code,
        }
    }
}

/// A transaction delivered on the data or mempool channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransactionRecord {
    /// Transaction ID.
    pub id: String,
    /// Hash of the containing block (empty for mempool entries).
    pub block_hash: String,
    /// Height of the containing block.
    pub block_height: u32,
    /// Index of the transaction within the block.
    pub block_index: u64,
    /// Block timestamp.
    pub block_time: u32,
    /// Raw transaction, hex-encoded. Empty when the body was not inlined.
    pub transaction: String,
    /// Merkle proof, hex-encoded. Empty for mempool entries.
    pub merkle_proof: String,
}

/// A message delivered on the control channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlMessage {
    /// Status code.
    pub status_code: StatusCode,
    /// Short status text.
    pub status: String,
    /// Free-form message.
    pub message: String,
    /// Block height the message refers to.
    pub block: u32,
    /// Number of transactions published for `block`.
    pub transactions: u64,
}

impl ControlMessage {
    /// The status reported to the consumer when the data stream is paused.
    pub fn paused() -> Self {
        Self {
            status_code: StatusCode::Paused,
            status: "paused subscription".to_string(),
            message: "paused subscription to catch up".to_string(),
            block: 0,
            transactions: 0,
        }
    }
}

/// Protobuf schema of a published transaction.
#[derive(Clone, PartialEq, prost::Message)]
pub struct TransactionMessage {
    /// Transaction ID.
    #[prost(string, tag = "1")]
    pub id: String,
    /// Hash of the containing block.
    #[prost(string, tag = "2")]
    pub block_hash: String,
    /// Height of the containing block.
    #[prost(uint32, tag = "3")]
    pub block_height: u32,
    /// Index of the transaction within the block.
    #[prost(uint64, tag = "4")]
    pub block_index: u64,
    /// Block timestamp.
    #[prost(uint32, tag = "5")]
    pub block_time: u32,
    /// Raw transaction bytes.
    #[prost(bytes = "vec", tag = "6")]
    pub transaction: Vec<u8>,
    /// Merkle proof bytes.
    #[prost(bytes = "vec", tag = "7")]
    pub merkle_proof: Vec<u8>,
}

/// Protobuf schema of a control message.
#[derive(Clone, PartialEq, prost::Message)]
pub struct ControlResponse {
    /// Status code.
    #[prost(uint32, tag = "1")]
    pub status_code: u32,
    /// Short status text.
    #[prost(string, tag = "2")]
    pub status: String,
    /// Free-form message.
    #[prost(string, tag = "3")]
    pub message: String,
    /// Block height.
    #[prost(uint32, tag = "4")]
    pub block: u32,
    /// Transaction count.
    #[prost(uint64, tag = "5")]
    pub transactions: u64,
}

#[derive(Debug, Default, Deserialize)]
struct JsonTransaction {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    block_hash: Option<String>,
    #[serde(default)]
    block_height: Option<u32>,
    #[serde(default)]
    block_index: Option<u64>,
    #[serde(default)]
    block_time: Option<u32>,
    #[serde(default)]
    transaction: Option<String>,
    #[serde(default)]
    merkle_proof: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct JsonControl {
    #[serde(default, rename = "statusCode")]
    status_code: Option<u32>,
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    block: Option<u32>,
    #[serde(default)]
    transactions: Option<u64>,
}

/// Render bytes as lower-case hex, two characters per byte.
pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// Transcode a base64 string to lower-case hex. Empty input yields `""`.
pub fn base64_to_hex(encoded: &str) -> Result<String, JungleBusError> {
    if encoded.is_empty() {
        return Ok(String::new());
    }
    let bytes = BASE64.decode(encoded)?;
    Ok(encode_hex(&bytes))
}

/// Decode a transaction publication from the data or mempool channel.
pub fn decode_transaction(
    protocol: Protocol,
    payload: &[u8],
) -> Result<TransactionRecord, JungleBusError> {
    match protocol {
        Protocol::Protobuf => {
            let msg = <TransactionMessage as prost::Message>::decode(payload)?;
            Ok(TransactionRecord {
                id: msg.id,
                block_hash: msg.block_hash,
                block_height: msg.block_height,
                block_index: msg.block_index,
                block_time: msg.block_time,
                transaction: encode_hex(&msg.transaction),
                merkle_proof: encode_hex(&msg.merkle_proof),
            })
        }
        Protocol::Json => {
            let msg: JsonTransaction = serde_json::from_slice(payload)?;
            Ok(TransactionRecord {
                id: msg.id.unwrap_or_default(),
                block_hash: msg.block_hash.unwrap_or_default(),
                block_height: msg.block_height.unwrap_or_default(),
                block_index: msg.block_index.unwrap_or_default(),
                block_time: msg.block_time.unwrap_or_default(),
                transaction: base64_to_hex(msg.transaction.as_deref().unwrap_or_default())?,
                merkle_proof: base64_to_hex(msg.merkle_proof.as_deref().unwrap_or_default())?,
            })
        }
    }
}

/// Decode a control channel publication.
pub fn decode_control(
    protocol: Protocol,
    payload: &[u8],
) -> Result<ControlMessage, JungleBusError> {
    match protocol {
        Protocol::Protobuf => {
            let msg = <ControlResponse as prost::Message>::decode(payload)?;
            Ok(ControlMessage {
                status_code: StatusCode::from_code(msg.status_code),
                status: msg.status,
                message: msg.message,
                block: msg.block,
                transactions: msg.transactions,
            })
        }
        Protocol::Json => {
            let msg: JsonControl = serde_json::from_slice(payload)?;
            Ok(ControlMessage {
                status_code: StatusCode::from_code(msg.status_code.unwrap_or_default()),
                status: msg.status.unwrap_or_default(),
                message: msg.message.unwrap_or_default(),
                block: msg.block.unwrap_or_default(),
                transactions: msg.transactions.unwrap_or_default(),
            })
        }
    }
}
