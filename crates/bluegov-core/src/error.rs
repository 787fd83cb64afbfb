// ── Core error types ──
//
// Caller-facing errors from bluegov-core. Transport hiccups inside the
// background scan/refresh tasks never surface here -- they are absorbed
// into governor state. Only contract violations and explicit transport
// operations invoked by a caller (read, write) reach the caller.

use thiserror::Error;

use crate::model::UrlKind;
use crate::transport::TransportError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Addressing errors ────────────────────────────────────────────
    #[error("Invalid bluetooth URL '{input}': {reason}")]
    InvalidUrl { input: String, reason: String },

    #[error("Expected {expected} URL, got {url}")]
    UnexpectedUrlKind { url: String, expected: UrlKind },

    // ── State errors ─────────────────────────────────────────────────
    #[error("Governor {url} has been disposed")]
    GovernorDisposed { url: String },

    #[error("Device for {url} is not connected")]
    NotConnected { url: String },

    #[error("Bluetooth manager has been disposed")]
    ManagerDisposed,

    // ── Transport errors (explicit caller operations only) ───────────
    #[error("Transport error on {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: TransportError,
    },

    // ── Configuration errors ─────────────────────────────────────────
    #[error("Configuration error: {message}")]
    Config { message: String },

    // ── Internal errors ──────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub(crate) fn invalid_url(input: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidUrl {
            input: input.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn transport(url: &crate::model::BluetoothUrl, source: TransportError) -> Self {
        Self::Transport {
            url: url.to_string(),
            source,
        }
    }

    /// Whether the error came from a malformed or mismatched address.
    pub fn is_addressing(&self) -> bool {
        matches!(self, Self::InvalidUrl { .. } | Self::UnexpectedUrlKind { .. })
    }

    /// Whether the error reflects the lifecycle state of a governor or the manager.
    pub fn is_state(&self) -> bool {
        matches!(
            self,
            Self::GovernorDisposed { .. } | Self::NotConnected { .. } | Self::ManagerDisposed
        )
    }
}
