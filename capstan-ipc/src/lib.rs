//! Inter-process message protocol for capstan
//!
//! This crate defines the typed messages exchanged between the master and
//! worker processes, their wire encoding, and the mailbox that moves them
//! over a rank-addressed transport.
//!
//! The transport itself is an external collaborator behind the
//! [`RankTransport`] trait; it is assumed reliable and ordered per peer
//! pair. An in-memory [`LoopbackHub`] implementation ships with the crate
//! for single-host runs and tests.

pub mod error;
pub mod mailbox;
pub mod protocol;
pub mod transport;
mod wire;

// Re-export commonly used types
pub use error::IpcError;
pub use mailbox::{Mailbox, MailboxMetrics, FRAME_ENVELOPE_LEN, NO_MESSAGE_POLL};
pub use protocol::{Envelope, Message, MessageType, Rank};
pub use transport::{Delivery, LoopbackEndpoint, LoopbackHub, RankTransport};
