//! Error types for the protocol layer.

/// Errors that can occur while interpreting client lines.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// The authentication line matched none of `LOGIN u p`,
    /// `REGISTER u p`, or `RECONNECT token`.
    #[error("invalid authentication format")]
    InvalidAuthFormat,
}
