use parley_common::AuthError;
use thiserror::Error;

/// Errors that end a connection's lifecycle.
///
/// Malformed signaling messages are deliberately absent: they are discarded
/// inside the message loop and never terminate a connection.
#[derive(Error, Debug)]
pub enum RelayError {
    /// The upgrade request did not target `/ws/{init_data}`.
    #[error("no credential in request path")]
    MissingCredential,
    /// The credential failed verification.
    #[error("authentication failed: {0}")]
    Auth(#[from] AuthError),
    /// WebSocket transport error.
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    /// Underlying I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// The server is at its connection limit.
    #[error("connection limit reached")]
    AtCapacity,
}
