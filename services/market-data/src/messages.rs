//! Fabric and subscriber message types
//!
//! `Level2Change` is the internal unit of depth change; the subscriber
//! feed turns runs of changes into `l2update` messages and snapshots into
//! `snapshot` messages. Prices and sizes are carried as strings: they are
//! already formatted for the wire and compare exactly.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// `(price, size, order_count)`: one level in a snapshot message.
pub type LevelTuple = (String, String, u64);

/// `(side, price, size)`: one delta in an `l2update` message.
pub type ChangeTuple = (String, String, String);

/// One change to an aggregated price level, sequenced densely per
/// instrument by the projector. `seq == 0` is the resend sentinel: it
/// carries no data and forces the feed to send a fresh snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level2Change {
    pub product_id: String,
    pub seq: u64,
    pub side: String,
    pub price: String,
    pub size: String,
}

impl Level2Change {
    /// The resend sentinel for `product_id`.
    pub fn sentinel(product_id: &str) -> Self {
        Self {
            product_id: product_id.to_string(),
            seq: 0,
            side: String::new(),
            price: String::new(),
            size: String::new(),
        }
    }
}

/// Outbound message to a subscriber transport.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum PushMessage {
    Snapshot {
        #[serde(rename = "productId")]
        product_id: String,
        bids: Vec<LevelTuple>,
        asks: Vec<LevelTuple>,
    },
    L2update {
        #[serde(rename = "productId")]
        product_id: String,
        changes: Vec<ChangeTuple>,
    },
}

/// Message delivered through the subscription fabric.
///
/// Level-2 changes are routed into the per-client feed state machine;
/// anything else goes straight to the client's outbound queue.
#[derive(Debug, Clone)]
pub enum ChannelMessage {
    Level2(Level2Change),
    Push(Arc<PushMessage>),
}

/// Channel naming: the fabric addresses streams by opaque strings.
pub mod channel {
    pub fn level2(product_id: &str) -> String {
        format!("level2:{}", product_id)
    }

    pub fn matches(product_id: &str) -> String {
        format!("match:{}", product_id)
    }

    pub fn ticker(product_id: &str) -> String {
        format!("ticker:{}", product_id)
    }

    pub fn order(product_id: &str, user_id: u64) -> String {
        format!("order:{}:{}", product_id, user_id)
    }

    pub fn funds(user_id: u64) -> String {
        format!("funds:{}", user_id)
    }
}
