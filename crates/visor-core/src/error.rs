//! Unified error types for the visor core library.
//!
//! Nothing in this core is fatal to the host process: malformed frames are
//! dropped and logged, a missing location always degrades to the
//! placeholder, and transport failures surface as status without tearing
//! down an in-progress crash session.

use std::path::PathBuf;
use thiserror::Error;

/// The unified error type for all visor core operations.
#[derive(Debug, Error)]
pub enum VisorError {
    // =========================================================================
    // PROTOCOL ERRORS
    // =========================================================================
    /// An inbound frame could not be decoded as UTF-8 text.
    ///
    /// Malformed frames are dropped and logged; they never abort the
    /// processing loop.
    #[error("malformed frame: {reason}")]
    MalformedFrame {
        /// Why the frame was rejected.
        reason: String,
    },

    // =========================================================================
    // TRANSPORT ERRORS
    // =========================================================================
    /// A transport write or lifecycle operation failed.
    ///
    /// Surfaced as connection status; never tears down a crash session.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The engine's command queue is closed (the engine task has exited).
    #[error("engine is no longer running")]
    EngineClosed,

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration file was not found at the expected path.
    #[error("configuration file not found at: {}", .0.display())]
    ConfigNotFound(PathBuf),

    /// The configuration file exists but could not be parsed.
    #[error("failed to parse configuration: {0}")]
    ConfigParse(String),

    /// The configuration was parsed but contains invalid values.
    #[error("configuration validation failed: {field}: {message}")]
    ConfigValidation {
        /// The offending field.
        field: &'static str,
        /// What is wrong with it.
        message: String,
    },

    // =========================================================================
    // PERSISTENCE & I/O ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading data.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A low-level I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for visor operations.
pub type Result<T> = std::result::Result<T, VisorError>;

impl VisorError {
    /// Returns `true` for errors raised by the frame decoder.
    #[inline]
    #[must_use]
    pub const fn is_protocol_error(&self) -> bool {
        matches!(self, Self::MalformedFrame { .. })
    }

    /// Returns `true` for transport-level failures.
    #[inline]
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(self, Self::Transport(_) | Self::EngineClosed)
    }

    /// Returns `true` for configuration problems.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound(_) | Self::ConfigParse(_) | Self::ConfigValidation { .. }
        )
    }

    /// Returns `true` when the failure degrades to a logged no-op rather
    /// than requiring intervention.
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::MalformedFrame { .. } | Self::Transport(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_protocol_error_classification() {
        let err = VisorError::MalformedFrame {
            reason: "invalid UTF-8".into(),
        };
        assert!(err.is_protocol_error());
        assert!(err.is_recoverable());
        assert!(!err.is_transport_error());
    }

    #[test]
    fn test_transport_error_classification() {
        assert!(VisorError::Transport("write failed".into()).is_transport_error());
        assert!(VisorError::EngineClosed.is_transport_error());
        assert!(!VisorError::EngineClosed.is_recoverable());
    }

    #[test]
    fn test_config_error_classification() {
        assert!(VisorError::ConfigNotFound(PathBuf::from("/etc/visor")).is_config_error());
        assert!(VisorError::ConfigParse("bad toml".into()).is_config_error());
        assert!(VisorError::ConfigValidation {
            field: "countdown_ticks",
            message: "must be at least 1".into()
        }
        .is_config_error());
    }

    #[test]
    fn test_error_display_messages() {
        let err = VisorError::MalformedFrame {
            reason: "invalid UTF-8".into(),
        };
        assert!(format!("{err}").contains("malformed frame"));

        let err = VisorError::Transport("peer reset".into());
        assert!(format!("{err}").contains("peer reset"));
    }

    #[test]
    fn test_error_is_send_and_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<VisorError>();
        assert_sync::<VisorError>();
    }
}
