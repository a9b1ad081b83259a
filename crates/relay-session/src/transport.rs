//! Transport seam: the bridge's view of the physical connection.
//!
//! The session never touches a socket type directly. A [`Connector`] opens
//! one full-duplex message connection and hands back its two halves: the
//! sink half is shared by every outbound writer behind a mutex (the
//! single-writer discipline), the stream half is owned exclusively by the
//! read loop. Tests substitute scripted implementations.

use async_trait::async_trait;

use relay_core::errors::TransportError;

/// One received frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportMessage {
    /// A text frame.
    Text(String),
    /// A binary frame.
    Binary(Vec<u8>),
}

/// Write half of a connection.
#[async_trait]
pub trait TransportSink: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a binary frame.
    async fn send_binary(&mut self, bytes: Vec<u8>) -> Result<(), TransportError>;

    /// Close the connection. Errors are ignored; the peer may already be
    /// gone.
    async fn close(&mut self);
}

/// Read half of a connection.
#[async_trait]
pub trait TransportStream: Send {
    /// Block for the next frame. [`TransportError::Closed`] signals a clean
    /// or unclean end of the connection.
    async fn recv(&mut self) -> Result<TransportMessage, TransportError>;
}

/// Opens connections to the remote instance.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open one connection and split it.
    async fn connect(
        &self,
    ) -> Result<(Box<dyn TransportSink>, Box<dyn TransportStream>), TransportError>;
}
