//! JungleBus data types: configuration, wire protocol selection, and the REST
//! transaction, block header, and address models.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default soft limit on the data delivery queue before the stream is paused.
pub const DEFAULT_MAX_QUEUE_SIZE: usize = 20_000;

/// Default interval between checks of a paused stream's queue depth.
pub const DEFAULT_PAUSE_RECHECK_INTERVAL: Duration = Duration::from_secs(2);

/// Encoding used for publications on the subscription transport.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// Protobuf binary messages.
    Protobuf,
    /// JSON messages with base64 binary fields.
    #[default]
    Json,
}

/// Configuration for a [`JungleBusClient`](crate::JungleBusClient) and the
/// [`JungleBus`](crate::JungleBus) facade.
#[derive(Debug, Clone)]
pub struct JungleBusConfig {
    /// Base URL for the JungleBus API (e.g. `https://junglebus.gorillapool.io`).
    pub server_url: String,
    /// Optional authentication token sent via `token` header.
    pub token: Option<String>,
    /// API version prefix (e.g. `v1`).
    pub api_version: String,
    /// Publication encoding requested from the server.
    pub protocol: Protocol,
    /// Force TLS on or off. When `None` it is inferred from `server_url`.
    pub use_ssl: Option<bool>,
    /// Data queue depth above which the stream is paused.
    pub max_queue_size: usize,
    /// How often a paused stream re-checks its queue depth.
    pub pause_recheck_interval: Duration,
    /// Deliver transactions as published, without fetching missing bodies.
    pub lite_mode: bool,
}

impl Default for JungleBusConfig {
    fn default() -> Self {
        Self {
            server_url: "https://junglebus.gorillapool.io".to_string(),
            token: None,
            api_version: "v1".to_string(),
            protocol: Protocol::Json,
            use_ssl: None,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
            pause_recheck_interval: DEFAULT_PAUSE_RECHECK_INTERVAL,
            lite_mode: false,
        }
    }
}

impl JungleBusConfig {
    /// Whether connections use TLS. Plain `http://` and `ws://` URLs do not.
    pub fn use_ssl(&self) -> bool {
        self.use_ssl.unwrap_or_else(|| {
            !(self.server_url.starts_with("http:") || self.server_url.starts_with("ws:"))
        })
    }

    /// Server host (and port), without scheme or trailing slash.
    pub fn host(&self) -> &str {
        let url = self.server_url.as_str();
        let url = ["https://", "http://", "wss://", "ws://"]
            .iter()
            .find_map(|scheme| url.strip_prefix(scheme))
            .unwrap_or(url);
        url.trim_end_matches('/')
    }

    /// Base URL for REST calls, including the API version.
    pub fn api_base_url(&self) -> String {
        let scheme = if self.use_ssl() { "https" } else { "http" };
        format!("{}://{}/{}", scheme, self.host(), self.api_version)
    }

    /// Endpoint the subscription transport connects to.
    pub fn websocket_url(&self) -> String {
        let scheme = if self.use_ssl() { "wss" } else { "ws" };
        let format = match self.protocol {
            Protocol::Protobuf => "?format=protobuf",
            Protocol::Json => "",
        };
        format!("{}://{}/connection/websocket{}", scheme, self.host(), format)
    }
}

/// A transaction returned by the JungleBus API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Transaction ID.
    #[serde(default)]
    pub id: String,
    /// Raw transaction data (hex-encoded).
    #[serde(default)]
    pub transaction: Option<String>,
    /// Block hash containing this transaction.
    #[serde(default)]
    pub block_hash: Option<String>,
    /// Block height containing this transaction.
    #[serde(default)]
    pub block_height: Option<u32>,
    /// Block timestamp.
    #[serde(default)]
    pub block_time: Option<u32>,
    /// Index of the transaction within the block.
    #[serde(default)]
    pub block_index: Option<u64>,
    /// Addresses involved in this transaction.
    #[serde(default)]
    pub addresses: Vec<String>,
    /// Input scripts/addresses.
    #[serde(default)]
    pub inputs: Vec<String>,
    /// Output scripts/addresses.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Input script types.
    #[serde(default)]
    pub input_types: Vec<String>,
    /// Output script types.
    #[serde(default)]
    pub output_types: Vec<String>,
    /// Context labels.
    #[serde(default)]
    pub contexts: Vec<String>,
    /// Sub-context labels.
    #[serde(default)]
    pub sub_contexts: Vec<String>,
    /// Additional data fields.
    #[serde(default)]
    pub data: Vec<String>,
    /// Merkle proof data (hex-encoded).
    #[serde(default)]
    pub merkle_proof: Option<String>,
}

/// A block header returned by the JungleBus API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockHeader {
    /// Block hash.
    #[serde(default)]
    pub hash: String,
    /// Coin type identifier.
    #[serde(default)]
    pub coin: Option<u32>,
    /// Block height.
    #[serde(default)]
    pub height: u32,
    /// Block timestamp.
    #[serde(default)]
    pub time: u32,
    /// Block nonce.
    #[serde(default)]
    pub nonce: Option<u32>,
    /// Block version.
    #[serde(default)]
    pub version: Option<u32>,
    /// Merkle root hash.
    #[serde(default, alias = "merkleroot")]
    pub merkle_root: Option<String>,
    /// Difficulty target bits.
    #[serde(default)]
    pub bits: Option<String>,
    /// Sync status timestamp.
    #[serde(default)]
    pub synced: Option<u64>,
}

/// Address information returned by the JungleBus API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressInfo {
    /// The address.
    #[serde(default)]
    pub address: String,
    /// Number of transactions associated with this address.
    #[serde(default)]
    pub transaction_count: Option<u64>,
    /// Total value received (in satoshis).
    #[serde(default)]
    pub total_received: Option<u64>,
    /// Total value sent (in satoshis).
    #[serde(default)]
    pub total_sent: Option<u64>,
}

/// Body of the login request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct LoginRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Body of the anonymous subscription token request.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct SubscriptionTokenRequest<'a> {
    pub id: &'a str,
}

/// Token returned by the login, subscription-token, and refresh endpoints.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TokenResponse {
    pub token: String,
}
