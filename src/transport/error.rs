use std::{io, net::SocketAddr};

use thiserror::Error;

use crate::codec::CodecError;

/// Failure classification for the transport layer.
///
/// [`TransportError::Closed`] marks a deliberate close by either peer; it is
/// reported through connection-state listeners but is not an application
/// fault. Every other variant is an unexpected failure.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no candidate address reachable, attempted {attempted:?}: {last}")]
    NoCandidateReachable {
        attempted: Vec<SocketAddr>,
        last: io::Error,
    },
    #[error("failed to bind {addr}: {source}")]
    Bind { addr: SocketAddr, source: io::Error },
    #[error("transport IO error: {0}")]
    Io(#[from] io::Error),
    #[error("connection closed")]
    Closed,
    #[error("malformed inbound message: {0}")]
    Decode(CodecError),
    #[error("invalid endpoint descriptor: {0}")]
    InvalidEndpoint(String),
    #[error("writer unusable after an earlier flush failure")]
    WriterBroken,
    #[error("no candidate addresses configured")]
    NotConfigured,
    #[error("process is not running")]
    NotRunning,
}

impl From<CodecError> for TransportError {
    fn from(error: CodecError) -> Self {
        match error {
            CodecError::Closed => TransportError::Closed,
            CodecError::Io(e) => TransportError::Io(e),
            other => TransportError::Decode(other),
        }
    }
}

impl TransportError {
    /// Whether this error marks an intentional close rather than a fault.
    pub fn is_graceful(&self) -> bool {
        matches!(self, TransportError::Closed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codec_closed_maps_to_graceful_close() {
        let err: TransportError = CodecError::Closed.into();
        assert!(err.is_graceful());
    }

    #[test]
    fn codec_decode_failure_is_not_graceful() {
        let err: TransportError = CodecError::TrailingBytes(3).into();
        assert!(!err.is_graceful());
        assert!(matches!(err, TransportError::Decode(_)));
    }
}
