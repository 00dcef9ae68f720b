//! Channel naming for the three streams of a subscription.

use std::fmt;

/// The three logical streams of one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelKind {
    /// Mined transactions, starting at a block height cursor.
    Data,
    /// Block sync status messages.
    Control,
    /// Unconfirmed transactions.
    Mempool,
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Data => "data",
            Self::Control => "control",
            Self::Mempool => "mempool",
        };
        write!(f, "{s}")
    }
}

/// `query:<id>:<block>`
pub fn data_channel(subscription_id: &str, block: u64) -> String {
    format!("query:{}:{}", subscription_id, block)
}

/// `query:<id>:control`
pub fn control_channel(subscription_id: &str) -> String {
    format!("query:{}:control", subscription_id)
}

/// `query:<id>:mempool`
pub fn mempool_channel(subscription_id: &str) -> String {
    format!("query:{}:mempool", subscription_id)
}

/// Extract the block cursor from a data channel name.
///
/// Returns `None` when the third segment is missing or not all digits, so
/// control and mempool channel names never parse.
pub fn parse_block_cursor(channel: &str) -> Option<u64> {
    let segment = channel.split(':').nth(2)?;
    if segment.is_empty() || !segment.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    segment.parse().ok()
}
