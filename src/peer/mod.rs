//! Peer wire protocol: handshake, message framing, and the session state
//! machine built on top of them.
pub mod handshake;
pub mod message;
pub mod session;

pub use handshake::Handshake;
pub use message::{Bitfield, Message};
pub use session::{PeerSession, SessionState};
