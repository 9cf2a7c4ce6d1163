//! Per-subscriber feed
//!
//! Each connected client owns two small tasks: a router that takes fabric
//! messages off the client's inbox, and a level-2 writer running the
//! snapshot-then-deltas state machine per instrument:
//!
//! - first contact (or the `seq == 0` sentinel) sends a full level-2
//!   snapshot from the shared depth cache,
//! - in-order changes are buffered and flushed as one `l2update` when
//!   the inbox drains or ten deltas accumulate,
//! - stale changes are dropped, and a sequence gap falls back to a fresh
//!   snapshot, the only way the client can rebuild a coherent book.
//!
//! The transport (socket writes, pings, auth) is a collaborator; it
//! drains the outbound receiver returned by [`Client::new`].

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::messages::{channel, ChannelMessage, ChangeTuple, Level2Change, PushMessage};
use crate::stream::DepthCache;
use crate::subscription::{ClientId, Subscription};

/// Flush the delta buffer at this many changes even if more are queued.
const MAX_BUFFERED_CHANGES: usize = 10;

/// Per-instrument feed state.
struct ProductState {
    resend_snapshot: bool,
    last_seq: u64,
    changes: Vec<Level2Change>,
}

impl ProductState {
    fn new() -> Self {
        Self {
            resend_snapshot: true,
            last_seq: 0,
            changes: Vec::new(),
        }
    }
}

/// One connected subscriber.
pub struct Client {
    id: ClientId,
    sub: Arc<Subscription>,
    inbox_tx: mpsc::Sender<ChannelMessage>,
    channels: Mutex<HashSet<String>>,
}

impl Client {
    /// Create a client and spawn its feed tasks. The returned receiver
    /// carries the outbound messages a transport should deliver.
    pub fn new(
        id: ClientId,
        sub: Arc<Subscription>,
        cache: Arc<DepthCache>,
    ) -> (Arc<Self>, mpsc::Receiver<PushMessage>, Vec<JoinHandle<()>>) {
        let (inbox_tx, inbox_rx) = mpsc::channel(256);
        let (l2_tx, l2_rx) = mpsc::channel(512);
        let (write_tx, write_rx) = mpsc::channel(256);

        let client = Arc::new(Self {
            id,
            sub,
            inbox_tx,
            channels: Mutex::new(HashSet::new()),
        });

        let tasks = vec![
            tokio::spawn(run_router(inbox_rx, l2_tx.clone(), write_tx.clone())),
            tokio::spawn(run_l2_writer(l2_rx, l2_tx, write_tx, cache)),
        ];

        (client, write_rx, tasks)
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    /// Subscribe to an instrument's level-2 stream. A sentinel change is
    /// queued so the feed sends a snapshot without waiting for book
    /// activity.
    pub fn subscribe_level2(&self, product_id: &str) {
        if self.subscribe(&channel::level2(product_id)) {
            let _ = self
                .inbox_tx
                .try_send(ChannelMessage::Level2(Level2Change::sentinel(product_id)));
        }
    }

    pub fn unsubscribe_level2(&self, product_id: &str) {
        self.unsubscribe(&channel::level2(product_id));
    }

    /// Subscribe to any channel by name. Returns false if already
    /// subscribed.
    pub fn subscribe(&self, channel: &str) -> bool {
        let mut channels = self.channels.lock().unwrap();
        if channels.contains(channel) {
            return false;
        }
        if self.sub.subscribe(channel, self.id, self.inbox_tx.clone()) {
            channels.insert(channel.to_string());
            return true;
        }
        false
    }

    pub fn unsubscribe(&self, channel: &str) {
        let mut channels = self.channels.lock().unwrap();
        if self.sub.unsubscribe(channel, self.id) {
            channels.remove(channel);
        }
    }

    /// Drop all subscriptions; called when the transport disconnects.
    pub fn close(&self) {
        let mut channels = self.channels.lock().unwrap();
        for channel in channels.drain() {
            self.sub.unsubscribe(&channel, self.id);
        }
    }
}

/// Route inbox messages: level-2 changes feed the state machine, other
/// messages pass straight through to the transport.
async fn run_router(
    mut inbox_rx: mpsc::Receiver<ChannelMessage>,
    l2_tx: mpsc::Sender<Level2Change>,
    write_tx: mpsc::Sender<PushMessage>,
) {
    while let Some(msg) = inbox_rx.recv().await {
        match msg {
            ChannelMessage::Level2(change) => {
                if l2_tx.send(change).await.is_err() {
                    return;
                }
            }
            ChannelMessage::Push(push) => {
                if write_tx.send((*push).clone()).await.is_err() {
                    return;
                }
            }
        }
    }
}

fn to_change_tuple(change: &Level2Change) -> ChangeTuple {
    (
        change.side.clone(),
        change.price.clone(),
        change.size.clone(),
    )
}

/// The snapshot-then-deltas state machine.
async fn run_l2_writer(
    mut l2_rx: mpsc::Receiver<Level2Change>,
    l2_tx: mpsc::Sender<Level2Change>,
    write_tx: mpsc::Sender<PushMessage>,
    cache: Arc<DepthCache>,
) {
    let mut states: HashMap<String, ProductState> = HashMap::new();

    while let Some(change) = l2_rx.recv().await {
        let state = states
            .entry(change.product_id.clone())
            .or_insert_with(ProductState::new);

        if state.resend_snapshot || change.seq == 0 {
            let Some(snapshot) = cache.get(&change.product_id) else {
                tracing::warn!(product_id = %change.product_id, "no depth snapshot available yet");
                continue;
            };

            // The cached snapshot predates what this client has already
            // seen; wait for the projector to refresh it.
            if state.last_seq > snapshot.seq {
                tracing::warn!(
                    product_id = %change.product_id,
                    client_seq = state.last_seq,
                    snapshot_seq = snapshot.seq,
                    "depth snapshot too old, retrying on next change"
                );
                continue;
            }

            state.last_seq = snapshot.seq;
            state.resend_snapshot = false;
            state.changes.clear();

            let msg = PushMessage::Snapshot {
                product_id: snapshot.product_id,
                bids: snapshot.bids,
                asks: snapshot.asks,
            };
            if write_tx.send(msg).await.is_err() {
                return;
            }
            continue;
        }

        if change.seq <= state.last_seq {
            tracing::debug!(
                seq = change.seq,
                last_seq = state.last_seq,
                "discarding stale level2 change"
            );
            continue;
        }

        if change.seq != state.last_seq + 1 {
            tracing::info!(
                product_id = %change.product_id,
                expected = state.last_seq + 1,
                got = change.seq,
                "level2 change lost, resending snapshot"
            );
            state.resend_snapshot = true;
            state.changes.clear();
            state.last_seq = change.seq;
            // Re-arm with a sentinel so the snapshot goes out even if no
            // further changes arrive.
            if l2_rx.is_empty() {
                let _ = l2_tx.try_send(Level2Change::sentinel(&change.product_id));
            }
            continue;
        }

        state.last_seq = change.seq;
        state.changes.push(change.clone());

        // Keep batching while more changes are queued, up to the cap.
        if !l2_rx.is_empty() && state.changes.len() < MAX_BUFFERED_CHANGES {
            continue;
        }

        let msg = PushMessage::L2update {
            product_id: change.product_id.clone(),
            changes: state.changes.iter().map(to_change_tuple).collect(),
        };
        state.changes.clear();
        if write_tx.send(msg).await.is_err() {
            return;
        }
    }
}
