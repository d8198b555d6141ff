//! Transport layer between a UI surface and the scratchpad core.
//!
//! Provides:
//! - Envelope protocol (JSON, tagged by `command`)
//! - `MessageRouter` - one response per inbound envelope
//! - `Outbox` - outbound envelopes with history for late views
//! - Panel lifecycle (single live panel per host)
//! - WebSocket transport (feature: websocket)

pub mod outbox;
pub mod panel;
pub mod protocol;
pub mod router;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use outbox::{Outbox, OutboxItem};
pub use panel::{
    OpenOutcome, PanelCommand, PanelError, PanelHandle, PanelHost, PanelRegistry, PanelRequests,
    ViewGuard, registry,
};
pub use protocol::{CommandKind, DecodeError, InboundMessage, OutboundMessage};
pub use router::{MessageRouter, RouterError, RouterState};
