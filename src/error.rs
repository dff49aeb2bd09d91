//! # Modbus RTU Master Error Handling
//!
//! This module provides the error taxonomy for the RTU master: transport failures
//! on the byte stream, framing and checksum failures while delimiting a reply,
//! slave exception responses, and precondition failures of a transaction.
//!
//! ## Error Categories
//!
//! ### Transport Errors (retried by the transaction engine)
//! - **I/O Errors**: stream read/write failures, wrapped connect failures
//! - **Connection Errors**: socket or serial port cannot be opened or is closed
//! - **Timeout Errors**: the read deadline fired before a full frame arrived
//!
//! ### Framing Errors (retried by the transaction engine)
//! - **CRC Errors**: a complete frame arrived but its checksum is wrong
//! - **Malformed Frames**: unknown function code or impossible frame length
//!
//! ### Final Errors (never retried)
//! - **Slave Exceptions**: the slave answered with an exception response
//! - **Not Executable**: a transaction without request or connection
//! - **Lock Interrupted**: the transaction lock could not be acquired
//! - **Validation Failures**: the response did not pass the validity check
//!
//! ## Retry Logic
//!
//! ```rust
//! use modbus_rtu_tunnel::{ModbusError, ModbusResult};
//!
//! fn should_retry(result: &ModbusResult<()>) -> bool {
//!     match result {
//!         Ok(_) => false,
//!         Err(error) => error.is_recoverable(),
//!     }
//! }
//!
//! assert!(should_retry(&Err(ModbusError::crc_mismatch(0x1234, 0x4321, "01 03"))));
//! assert!(!should_retry(&Err(ModbusError::slave_exception(0x03, 0x02))));
//! ```

use thiserror::Error;

use crate::protocol::ModbusException;

/// Result type alias for Modbus operations
pub type ModbusResult<T> = Result<T, ModbusError>;

/// Modbus RTU master error types
///
/// Every variant carries owned, cloneable context so the transaction engine can
/// keep the last attempt's failure while it retries.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModbusError {
    /// I/O related errors (network, serial)
    ///
    /// Raised for stream read/write failures and, wrapped by the transaction
    /// engine, for failed connection attempts and exhausted retries.
    #[error("I/O error: {message}")]
    Io { message: String },

    /// Connection errors
    ///
    /// Opening a socket or serial port failed, or the transport was used after
    /// it had been closed.
    #[error("Connection error: {message}")]
    Connection { message: String },

    /// Timeout errors
    ///
    /// The read deadline fired before a complete frame was received.
    #[error("Timeout after {timeout_ms}ms: {operation}")]
    Timeout { operation: String, timeout_ms: u64 },

    /// CRC validation failure
    ///
    /// The frame was received in full but the trailing checksum does not match
    /// the one computed over the rest of the frame. `frame` holds the raw bytes
    /// as hex for diagnostics.
    #[error("CRC validation failed: expected={expected:04X}, actual={actual:04X}, frame=[{frame}]")]
    CrcMismatch { expected: u16, actual: u16, frame: String },

    /// Malformed frame
    ///
    /// The function code is not in the length table, or the computed frame
    /// length cannot be a valid RTU frame.
    #[error("Malformed frame (function code 0x{function_code:02X}): {message}")]
    MalformedFrame { function_code: u8, message: String },

    /// Invalid function code
    ///
    /// The code is not a supported Modbus function.
    #[error("Invalid function code: 0x{code:02X}")]
    InvalidFunction { code: u8 },

    /// Invalid data value
    ///
    /// Request validation and response payload parsing failures.
    #[error("Invalid data: {message}")]
    InvalidData { message: String },

    /// Modbus slave exception response
    ///
    /// # Standard Exception Codes
    /// - 0x01: Illegal Function
    /// - 0x02: Illegal Data Address
    /// - 0x03: Illegal Data Value
    /// - 0x04: Slave Device Failure
    /// - 0x05: Acknowledge
    /// - 0x06: Slave Device Busy
    /// - 0x08: Memory Parity Error
    /// - 0x0A: Gateway Path Unavailable
    /// - 0x0B: Gateway Target Device Failed to Respond
    #[error("Slave exception: function={function:02X}, code={code:02X} ({message})")]
    SlaveException { function: u8, code: u8, message: String },

    /// The transaction has no request or no connection bound
    #[error("Transaction not executable: {message}")]
    NotExecutable { message: String },

    /// The transaction lock could not be acquired
    #[error("Transaction lock interrupted: {message}")]
    LockInterrupted { message: String },

    /// The response failed the transaction's validity check
    #[error("Validation failed: {message}")]
    ValidationFailure { message: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Configuration { message: String },
}

impl ModbusError {
    /// Create a new I/O error
    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io { message: message.into() }
    }

    /// Create a new connection error
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection { message: message.into() }
    }

    /// Create a new timeout error
    ///
    /// # Arguments
    ///
    /// * `operation` - Description of the operation that timed out
    /// * `timeout_ms` - Timeout duration in milliseconds
    pub fn timeout<S: Into<String>>(operation: S, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms
        }
    }

    /// Create a CRC mismatch error
    ///
    /// # Arguments
    ///
    /// * `expected` - CRC computed over the received frame
    /// * `actual` - CRC carried by the frame
    /// * `frame` - Raw frame bytes rendered as hex
    pub fn crc_mismatch<S: Into<String>>(expected: u16, actual: u16, frame: S) -> Self {
        Self::CrcMismatch { expected, actual, frame: frame.into() }
    }

    /// Create a malformed frame error
    pub fn malformed_frame<S: Into<String>>(function_code: u8, message: S) -> Self {
        Self::MalformedFrame { function_code, message: message.into() }
    }

    /// Create an invalid function error
    pub fn invalid_function(code: u8) -> Self {
        Self::InvalidFunction { code }
    }

    /// Create an invalid data error
    pub fn invalid_data<S: Into<String>>(message: S) -> Self {
        Self::InvalidData { message: message.into() }
    }

    /// Create a slave exception error
    ///
    /// Automatically maps standard exception codes to human-readable messages.
    ///
    /// # Arguments
    ///
    /// * `function` - Function code of the request the slave rejected
    /// * `code` - Modbus exception code reported by the slave
    pub fn slave_exception(function: u8, code: u8) -> Self {
        let message = ModbusException::from_u8(code)
            .map_or("Unknown Exception", ModbusException::name)
            .to_string();

        Self::SlaveException { function, code, message }
    }

    /// Create a not executable error
    pub fn not_executable<S: Into<String>>(message: S) -> Self {
        Self::NotExecutable { message: message.into() }
    }

    /// Create a lock interrupted error
    pub fn lock_interrupted<S: Into<String>>(message: S) -> Self {
        Self::LockInterrupted { message: message.into() }
    }

    /// Create a validation failure error
    pub fn validation_failure<S: Into<String>>(message: S) -> Self {
        Self::ValidationFailure { message: message.into() }
    }

    /// Create a configuration error
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Check if the error is recoverable (can retry)
    ///
    /// Every failure of the transport path is retried by the transaction
    /// engine: stream errors, read timeouts, checksum failures and malformed
    /// frames. A slave exception is a complete, valid reply and is final.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use modbus_rtu_tunnel::ModbusError;
    ///
    /// let timeout_error = ModbusError::timeout("read frame header", 5000);
    /// assert!(timeout_error.is_recoverable());
    ///
    /// let exception = ModbusError::slave_exception(0x03, 0x02);
    /// assert!(!exception.is_recoverable());
    /// ```
    pub fn is_recoverable(&self) -> bool {
        matches!(self,
            Self::Io { .. } |
            Self::Connection { .. } |
            Self::Timeout { .. } |
            Self::CrcMismatch { .. } |
            Self::MalformedFrame { .. }
        )
    }

    /// Check if the error is a network/transport issue
    pub fn is_transport_error(&self) -> bool {
        matches!(self,
            Self::Io { .. } |
            Self::Connection { .. } |
            Self::Timeout { .. }
        )
    }

    /// Check if the error is a protocol issue
    ///
    /// Framing failures and slave exceptions are protocol-level problems; the
    /// bytes arrived but do not form an acceptable reply.
    pub fn is_protocol_error(&self) -> bool {
        matches!(self,
            Self::CrcMismatch { .. } |
            Self::MalformedFrame { .. } |
            Self::InvalidFunction { .. } |
            Self::SlaveException { .. }
        )
    }
}

/// Convert from std::io::Error
///
/// Stream errors keep their original message; an unexpected EOF means the
/// peer closed the tunnel mid-frame.
impl From<std::io::Error> for ModbusError {
    fn from(err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::UnexpectedEof {
            return Self::io(format!("connection closed by peer: {}", err));
        }
        Self::io(err.to_string())
    }
}

/// Convert from tokio timeout errors
///
/// The specific timeout duration should be provided when creating timeout
/// errors manually; this conversion only knows that a deadline elapsed.
impl From<tokio::time::error::Elapsed> for ModbusError {
    fn from(_: tokio::time::error::Elapsed) -> Self {
        Self::timeout("Operation timeout", 0)
    }
}

/// Convert from serde JSON errors (configuration loading)
impl From<serde_json::Error> for ModbusError {
    fn from(err: serde_json::Error) -> Self {
        Self::configuration(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let err = ModbusError::timeout("read frame header", 5000);
        assert!(err.is_recoverable());
        assert!(err.is_transport_error());

        let err = ModbusError::crc_mismatch(0x1234, 0x5678, "01 03");
        assert!(err.is_recoverable());
        assert!(err.is_protocol_error());
        assert!(!err.is_transport_error());

        let err = ModbusError::malformed_frame(0x42, "unsupported function code");
        assert!(err.is_recoverable());

        let err = ModbusError::slave_exception(0x03, 0x02);
        assert!(!err.is_recoverable());
        assert!(err.is_protocol_error());

        assert!(!ModbusError::not_executable("no request").is_recoverable());
        assert!(!ModbusError::lock_interrupted("timed out").is_recoverable());
        assert!(!ModbusError::validation_failure("unit id").is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let err = ModbusError::crc_mismatch(0x1234, 0x5678, "01 03 02 00 01 FF FF");
        let msg = format!("{}", err);
        assert!(msg.contains("CRC validation failed"));
        assert!(msg.contains("1234"));
        assert!(msg.contains("5678"));
        assert!(msg.contains("01 03 02 00 01 FF FF"));

        let err = ModbusError::slave_exception(0x03, 0x02);
        assert_eq!(
            err.to_string(),
            "Slave exception: function=03, code=02 (Illegal Data Address)"
        );

        match ModbusError::slave_exception(0x42, 0x0B) {
            ModbusError::SlaveException { message, .. } => {
                assert_eq!(message, "Gateway Target Device Failed to Respond");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        match ModbusError::slave_exception(0x03, 0x07) {
            ModbusError::SlaveException { message, .. } => assert_eq!(message, "Unknown Exception"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let eof = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "early eof");
        match ModbusError::from(eof) {
            ModbusError::Io { message } => assert!(message.contains("closed by peer")),
            other => panic!("unexpected error: {:?}", other),
        }
    }
}
