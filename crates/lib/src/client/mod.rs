//! saged protocol client.
//!
//! One `Session` per endpoint. Commands go out as `{cmd, args}` JSON text frames; events
//! come back in the same shape and are dispatched to a `SessionHandler`.

mod forward;
mod protocol;
mod session;
mod transport;

pub use forward::{EventForwarder, SessionEvent};
pub use protocol::{
    Command, Envelope, Event, GroupAddress, Level, LightStates, ProtocolError, SourceAddress,
};
pub use session::{LoggingHandler, Session, SessionError, SessionHandler, SessionState};
pub use transport::{
    CloseInfo, FrameSink, FrameStream, LinkEvent, Transport, TransportError, WebSocketTransport,
    CLOSE_ABNORMAL, CLOSE_NORMAL, CLOSE_NO_STATUS,
};
