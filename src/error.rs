//! Error handling for daqflow
//!
//! This module defines the error type and a Result alias used throughout
//! the crate. Conditions a reader reports during normal operation
//! (events, disconnects, timeouts, invalid data) are not errors; they are
//! returned as [`crate::reader::ReadStatus`] values instead.

use thiserror::Error;

/// Main error type for daqflow operations
#[derive(Error, Debug)]
pub enum DaqError {
    /// An allocator could not provide the requested memory
    #[error("Out of memory: requested {bytes} bytes (align {align})")]
    OutOfMemory { bytes: usize, align: usize },

    /// A descriptor cannot be decoded as the requested sample kind
    #[error("Invalid type: {0}")]
    InvalidType(String),

    /// Packet contents do not match what the descriptor promises
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// A caller-supplied argument is out of range or inconsistent
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Allocation bookkeeping was violated (e.g. external memory handed out twice)
    #[error("Packet memory allocation error: {0}")]
    PacketMemoryAllocation(String),

    /// Free bookkeeping was violated (double free, address mismatch)
    #[error("Packet memory deallocation error at 0x{address:016X}: {message}")]
    PacketMemoryDeallocation { address: usize, message: String },

    /// The input port refused the signal
    #[error("Signal '{signal}' not accepted by input port '{port}'")]
    SignalNotAccepted { signal: String, port: String },

    /// The input port is already attached to a signal
    #[error("Input port '{0}' is already connected")]
    AlreadyConnected(String),

    /// The operation needs a connected input port
    #[error("Input port '{0}' is not connected")]
    NotConnected(String),

    /// The component was removed and can no longer be used
    #[error("Component '{0}' has been removed")]
    Removed(String),

    /// Errors related to configuration loading/saving
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Generic errors with context
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<DaqError>,
    },
}

impl DaqError {
    /// Add context to an error
    pub fn with_context(self, context: impl Into<String>) -> Self {
        DaqError::WithContext {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// The innermost error, with all context layers removed
    pub fn root(&self) -> &DaqError {
        match self {
            DaqError::WithContext { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result type alias for daqflow operations
pub type Result<T> = std::result::Result<T, DaqError>;

/// Extension trait for adding context to Results
pub trait ResultExt<T> {
    /// Add context to an error result
    fn context(self, context: impl Into<String>) -> Result<T>;

    /// Add context lazily to an error result
    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String;
}

impl<T> ResultExt<T> for Result<T> {
    fn context(self, context: impl Into<String>) -> Result<T> {
        self.map_err(|e| e.with_context(context))
    }

    fn with_context<F>(self, f: F) -> Result<T>
    where
        F: FnOnce() -> String,
    {
        self.map_err(|e| e.with_context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DaqError::InvalidType("struct descriptor".to_string());
        assert_eq!(err.to_string(), "Invalid type: struct descriptor");
    }

    #[test]
    fn test_error_with_context() {
        let err = DaqError::InvalidData("short buffer".to_string());
        let with_ctx = err.with_context("Failed to decode packet");
        assert!(with_ctx.to_string().contains("Failed to decode packet"));
        assert!(matches!(with_ctx.root(), DaqError::InvalidData(_)));
    }

    #[test]
    fn test_deallocation_error_formats_address() {
        let err = DaqError::PacketMemoryDeallocation {
            address: 0x2000_0000,
            message: "double free".to_string(),
        };
        assert!(err.to_string().contains("0x0000000020000000"));
        assert!(err.to_string().contains("double free"));
    }

    #[test]
    fn test_result_ext_context() {
        let res: Result<()> = Err(DaqError::OutOfMemory { bytes: 64, align: 8 });
        let err = res.context("allocating packet").unwrap_err();
        assert!(err.to_string().starts_with("allocating packet"));
    }
}
