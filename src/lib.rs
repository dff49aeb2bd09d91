//! # Modbus RTU Tunnel - Modbus RTU master over byte streams
//!
//! An async Modbus RTU master for serial lines and for RTU frames tunnelled
//! through TCP (serial-to-Ethernet gateways in transparent mode).
//!
//! ## Features
//!
//! - **Stream framing**: replies are delimited by function code and length
//!   field, not by line silence, so they survive TCP segmentation
//! - **CRC-16 checking** on every reply
//! - **Transactions** with retries, transaction ids and a per-engine lock
//! - **TCP and serial** master connections behind one trait
//!
//! ## Reply Lengths
//!
//! | Code | Rule |
//! |------|------|
//! | 0x01-0x04, 0x0C, 0x11, 0x14, 0x15, 0x17 | byte count N, total N + 5 |
//! | 0x05, 0x06, 0x0B, 0x0F, 0x10, 0x16 | 8 bytes |
//! | 0x07, 0x08 | 3 bytes |
//! | 0x18 | word count N, total N + 6 |
//! | high bit set (exception) | 5 bytes |
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use modbus_rtu_tunnel::{ModbusClient, ModbusRtuMaster, ModbusResult};
//! use std::net::{IpAddr, Ipv4Addr};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> ModbusResult<()> {
//!     let address = IpAddr::V4(Ipv4Addr::new(192, 168, 1, 50));
//!     let mut client = ModbusRtuMaster::tcp(address, 4001, Duration::from_secs(5));
//!
//!     let values = client.read_03(1, 0, 10).await?;
//!     println!("Read registers: {:?}", values);
//!
//!     client.write_06(1, 100, 0x1234).await?;
//!     client.close().await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────┐
//! │  ModbusRtuMaster    │  typed read/write calls
//! └─────────────────────┘
//!           │
//! ┌─────────────────────┐
//! │  ModbusTransaction  │  lock, connect, retries, ids
//! └─────────────────────┘
//!           │
//! ┌─────────────────────┐
//! │  MasterConnection   │  TCP tunnel / serial port
//! └─────────────────────┘
//!           │
//! ┌─────────────────────┐
//! │  FrameTransport     │  CRC, length classification
//! └─────────────────────┘
//! ```

/// Core error types and result handling
pub mod error;

/// CRC-16 and reply length classification
pub mod frame;

/// Modbus protocol definitions and message handling
pub mod protocol;

/// Frame transport over tokio byte streams
pub mod transport;

/// TCP tunnel and serial master connections
pub mod connection;

/// Transaction engine
pub mod transaction;

/// High-level client
pub mod client;

/// Formatting, timing and logging helpers
pub mod utils;

// Re-export main types for convenience
pub use error::{ModbusError, ModbusResult};
pub use protocol::{ModbusFunction, ModbusMessage, ModbusRequest, ModbusResponse};
pub use transport::{FrameTransport, RtuTransport, TransportConfig, TransportStats};
pub use connection::{MasterConnection, RtuTcpMasterConnection, SerialParameters};
#[cfg(feature = "serial")]
pub use connection::SerialMasterConnection;
pub use transaction::{ModbusTransaction, TransactionConfig, TransactionIdCounter, ValidityCheck};
pub use client::{ModbusClient, ModbusRtuMaster};
pub use utils::OperationTimer;

/// Default read and connect timeout (5 seconds)
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Default attempts per transaction
pub const DEFAULT_RETRIES: u32 = 3;

/// Maximum number of coils that can be read/written in a single request
pub const MAX_COILS_PER_REQUEST: u16 = 2000;

/// Maximum number of registers that can be read/written in a single request
pub const MAX_REGISTERS_PER_REQUEST: u16 = 125;

/// Maximum Modbus RTU frame size
pub const MAX_RTU_FRAME_SIZE: usize = 256;

/// Modbus TCP default port
pub const DEFAULT_TCP_PORT: u16 = 502;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library information
pub fn info() -> String {
    format!("Modbus RTU Tunnel v{} - async Modbus RTU master for TCP tunnels and serial lines", VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_info() {
        let info = info();
        assert!(info.contains("Modbus RTU Tunnel"));
        assert!(info.contains(VERSION));
    }

    #[test]
    fn test_constants() {
        assert_eq!(DEFAULT_TIMEOUT_MS, 5000);
        assert_eq!(DEFAULT_RETRIES, 3);
        assert_eq!(MAX_RTU_FRAME_SIZE, 256);
        assert_eq!(DEFAULT_TCP_PORT, 502);
    }
}
