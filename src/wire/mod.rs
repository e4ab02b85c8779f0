//! The duplex message channel: frame types, the session handler and the
//! stdio / WebSocket transports.

pub mod handler;
pub mod protocol;
pub mod stdio;
pub mod ws;

pub use handler::{FrameTransport, run_session};
pub use protocol::{ClientFrame, ServerFrame, decode_client_frame, encode_server_frame};
