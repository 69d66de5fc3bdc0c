//! WebSocket fan-out: the connection registry, session multiplexer, and the
//! relay from the price bus into the registry.

pub mod message_types;
pub mod registry;
pub mod relay;
pub mod session;

pub use message_types::{ControlAction, ControlFrame, OutboundFrame};
pub use registry::{ConnectionRegistry, DeliveryReport, SessionId, SessionSender};
pub use relay::run_price_relay;
pub use session::{
    close_code, run_session, CloseCause, InboundFrame, SessionContext, SessionOutcome,
    SessionTransport, StreamFlavor, TransportClosed, TransportError,
};
