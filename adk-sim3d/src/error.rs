//! Error types for the `adk-sim3d` crate.

use thiserror::Error;

/// Errors surfaced by the simulation client.
///
/// None of these are fatal to the process. Channel handlers log them and degrade to a
/// user-facing notice; only the outer surfaces (runtime handle, fallback, startup) return them.
#[derive(Debug, Error)]
pub enum SimError {
    /// The channel transport rejected an outbound event.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The channel transport is not connected.
    #[error("Channel transport is disconnected")]
    Disconnected,

    /// The request/response chat fallback failed.
    #[error("Chat fallback error: {0}")]
    Fallback(String),

    /// An HTTP error from the chat fallback.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// A payload could not be decoded.
    #[error(transparent)]
    Decode(#[from] serde_json::Error),

    /// A configuration validation error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The render target needed by a subsystem was missing at startup.
    #[error("Render target unavailable: {0}")]
    RenderTarget(String),

    /// The client runtime task has stopped.
    #[error("Client runtime is no longer running")]
    RuntimeClosed,
}

/// A convenience result type for client operations.
pub type Result<T> = std::result::Result<T, SimError>;
