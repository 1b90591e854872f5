//! Protocol and mailbox error types

use thiserror::Error;

/// Errors surfaced by the codec and the mailbox.
#[derive(Debug, Error)]
pub enum IpcError {
    /// Decoding would read past the frame, or left unread bytes behind.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Discriminator outside the wire contract.
    #[error("Unknown message type: {0}")]
    UnknownType(u32),

    /// The transport rejected a send, receive, or probe.
    #[error("Transport failure: {0}")]
    TransportFailure(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_carries_context() {
        let err = IpcError::MalformedFrame("task id needs 4 bytes".to_string());
        assert_eq!(err.to_string(), "Malformed frame: task id needs 4 bytes");

        let err = IpcError::UnknownType(99);
        assert_eq!(err.to_string(), "Unknown message type: 99");
    }
}
