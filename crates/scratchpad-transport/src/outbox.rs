//! Broadcast + history outbox for panel responses.
//!
//! Every subscriber first receives the retained history, up to
//! [`HISTORY_LEN`] envelopes, then live traffic. A view opened late
//! therefore replays earlier responses in order, starting with the
//! unsolicited `configLoaded`. Views should render each envelope as the
//! latest state for its command rather than as a fresh event.

use std::{
    collections::VecDeque,
    sync::{PoisonError, RwLock},
};

use futures::{StreamExt, future, stream::BoxStream};
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::protocol::OutboundMessage;

/// Default number of envelopes kept for late subscribers.
pub const HISTORY_LEN: usize = 256;

/// One item delivered to subscribers.
#[derive(Debug, Clone, PartialEq)]
pub enum OutboxItem {
    Envelope(OutboundMessage),
    /// The panel was disposed. Nothing follows.
    Closed,
}

struct Inner {
    history: VecDeque<OutboundMessage>,
    closed: bool,
}

/// Response outbox with broadcast and history support.
///
/// A view attaching after startup still sees the unsolicited
/// `configLoaded` and anything sent before it subscribed.
pub struct Outbox {
    inner: RwLock<Inner>,
    sender: broadcast::Sender<OutboxItem>,
    capacity: usize,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Outbox {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_LEN)
    }

    /// Create an outbox keeping at most `capacity` envelopes of history.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(1024);
        Self {
            inner: RwLock::new(Inner {
                history: VecDeque::with_capacity(capacity.min(32)),
                closed: false,
            }),
            sender,
            capacity: capacity.max(1),
        }
    }

    /// Push an envelope to live listeners and history.
    ///
    /// Returns `false` once the outbox is closed.
    pub fn push(&self, msg: OutboundMessage) -> bool {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            return false;
        }
        while inner.history.len() >= self.capacity {
            inner.history.pop_front();
        }
        inner.history.push_back(msg.clone());
        let _ = self.sender.send(OutboxItem::Envelope(msg));
        true
    }

    /// Close the outbox. Idempotent.
    pub fn close(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        if inner.closed {
            return;
        }
        inner.closed = true;
        let _ = self.sender.send(OutboxItem::Closed);
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .closed
    }

    /// Get a receiver for live updates.
    #[must_use]
    pub fn get_receiver(&self) -> broadcast::Receiver<OutboxItem> {
        self.sender.subscribe()
    }

    /// Get a snapshot of the history.
    #[must_use]
    pub fn get_history(&self) -> Vec<OutboundMessage> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .history
            .iter()
            .cloned()
            .collect()
    }

    /// Stream that yields history first, then live updates, ending at close.
    #[must_use]
    pub fn history_plus_stream(&self) -> BoxStream<'static, OutboundMessage> {
        // Snapshot and subscribe under one lock so nothing falls in between.
        let (history, rx, closed) = {
            let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
            (
                inner.history.iter().cloned().collect::<Vec<_>>(),
                self.sender.subscribe(),
                inner.closed,
            )
        };

        let hist = futures::stream::iter(history);
        if closed {
            return hist.boxed();
        }

        let live = BroadcastStream::new(rx)
            .filter_map(|res| async move {
                match res {
                    Ok(item) => Some(item),
                    Err(e) => {
                        tracing::warn!(error = %e, "outbox subscriber lagged");
                        None
                    }
                }
            })
            .take_while(|item| future::ready(!matches!(item, OutboxItem::Closed)))
            .filter_map(|item| async move {
                match item {
                    OutboxItem::Envelope(msg) => Some(msg),
                    OutboxItem::Closed => None,
                }
            });

        hist.chain(live).boxed()
    }
}
