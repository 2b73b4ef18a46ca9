//! Realtime session protocol: transport, wire codec, session state,
//! reconnection and the public client.

pub mod client;
pub mod codec;
pub mod events;
pub mod reconnect;
pub mod session;
pub mod transport;

pub use client::RealtimeClient;
pub use events::{
    ClientEvent, DisconnectReason, ErrorEvent, ErrorSource, EventBus, EventKind, MessageRole,
    RealtimeMessage, Speaker, SubscriptionId,
};
pub use reconnect::{ReconnectDecision, ReconnectPolicy, ReconnectState};
pub use session::{ConnectionState, SessionPhase};
pub use transport::{
    CloseCause, Connector, Endpoint, Inbound, Link, Outbound, TransportState, WebSocketConnector,
};
