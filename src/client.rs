/// High-level Modbus client on top of the transaction engine
///
/// The client turns the standard function codes into typed calls. Every call
/// builds a request, runs it through a [`ModbusTransaction`] (retries, id
/// allocation, locking) and parses the reply.
///
/// Responses are checked with [`HeaderMatchCheck`], so a reply from the wrong
/// unit or for the wrong function is rejected rather than parsed.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::connection::{MasterConnection, RtuTcpMasterConnection};
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusFunction, ModbusRequest, ModbusResponse, SlaveId};
use crate::transaction::{HeaderMatchCheck, ModbusTransaction, TransactionConfig};

/// Trait defining the interface for Modbus client operations
///
/// This trait provides async methods for the standard Modbus data access
/// functions, with the function code in each method name.
#[async_trait]
pub trait ModbusClient: Send + Sync {
    /// Read coils (function code 0x01)
    async fn read_01(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>>;

    /// Read discrete inputs (function code 0x02)
    async fn read_02(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>>;

    /// Read holding registers (function code 0x03)
    async fn read_03(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>>;

    /// Read input registers (function code 0x04)
    async fn read_04(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>>;

    /// Write single coil (function code 0x05)
    async fn write_05(&mut self, slave_id: SlaveId, address: u16, value: bool) -> ModbusResult<()>;

    /// Write single register (function code 0x06)
    async fn write_06(&mut self, slave_id: SlaveId, address: u16, value: u16) -> ModbusResult<()>;

    /// Write multiple coils (function code 0x0F)
    async fn write_0f(&mut self, slave_id: SlaveId, address: u16, values: &[bool]) -> ModbusResult<()>;

    /// Write multiple registers (function code 0x10)
    async fn write_10(&mut self, slave_id: SlaveId, address: u16, values: &[u16]) -> ModbusResult<()>;

    /// Check if client is connected
    async fn is_connected(&self) -> bool;

    /// Close the client connection
    async fn close(&mut self) -> ModbusResult<()>;
}

/// RTU master client over any master connection
///
/// # Examples
///
/// ```rust,no_run
/// use modbus_rtu_tunnel::client::{ModbusClient, ModbusRtuMaster};
/// use std::time::Duration;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut client = ModbusRtuMaster::tcp("192.168.1.50".parse()?, 4001, Duration::from_secs(2));
/// let values = client.read_03(1, 0, 10).await?;
/// client.write_06(1, 100, 0x1234).await?;
/// client.close().await?;
/// # Ok(())
/// # }
/// ```
pub struct ModbusRtuMaster<C> {
    connection: Arc<Mutex<C>>,
    transaction: ModbusTransaction<C>,
}

impl ModbusRtuMaster<RtuTcpMasterConnection> {
    /// Client for an RTU tunnel at `address:port`; connects on first use
    pub fn tcp(address: IpAddr, port: u16, timeout: Duration) -> Self {
        let mut connection = RtuTcpMasterConnection::new(address, port);
        connection.set_timeout(timeout);
        Self::new(connection)
    }
}

#[cfg(feature = "serial")]
impl ModbusRtuMaster<crate::connection::SerialMasterConnection> {
    /// Client for a local serial line; opens the port on first use
    pub fn serial(parameters: crate::connection::SerialParameters) -> Self {
        Self::new(crate::connection::SerialMasterConnection::new(parameters))
    }
}

impl<C: MasterConnection> ModbusRtuMaster<C> {
    /// Create a client owning `connection`
    pub fn new(connection: C) -> Self {
        Self::from_shared(Arc::new(Mutex::new(connection)))
    }

    /// Create a client on a connection shared with other engines
    pub fn from_shared(connection: Arc<Mutex<C>>) -> Self {
        let mut transaction = ModbusTransaction::with_connection(connection.clone());
        transaction.set_validity_check(Arc::new(HeaderMatchCheck));
        Self { connection, transaction }
    }

    /// Apply transaction settings (retries, delays, reconnecting)
    pub fn with_config(mut self, config: TransactionConfig) -> Self {
        self.transaction.set_config(config);
        self
    }

    pub fn connection(&self) -> &Arc<Mutex<C>> {
        &self.connection
    }

    pub fn transaction(&self) -> &ModbusTransaction<C> {
        &self.transaction
    }

    pub fn transaction_mut(&mut self) -> &mut ModbusTransaction<C> {
        &mut self.transaction
    }

    /// Execute a raw request
    pub async fn execute_request(&self, request: ModbusRequest) -> ModbusResult<ModbusResponse> {
        self.transaction.execute_request(request).await
    }

    async fn read_bits(&self, slave_id: SlaveId, function: ModbusFunction, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        let request = ModbusRequest::new_read(slave_id, function, address, quantity);
        let response = self.execute_request(request).await?;
        let mut bits = response.parse_bits()?;
        if bits.len() < quantity as usize {
            return Err(ModbusError::invalid_data(format!(
                "expected {} bits, got {}", quantity, bits.len()
            )));
        }
        bits.truncate(quantity as usize);
        Ok(bits)
    }

    async fn read_registers(&self, slave_id: SlaveId, function: ModbusFunction, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        let request = ModbusRequest::new_read(slave_id, function, address, quantity);
        let response = self.execute_request(request).await?;
        let registers = response.parse_registers()?;
        if registers.len() != quantity as usize {
            return Err(ModbusError::invalid_data(format!(
                "expected {} registers, got {}", quantity, registers.len()
            )));
        }
        Ok(registers)
    }
}

#[async_trait]
impl<C: MasterConnection + 'static> ModbusClient for ModbusRtuMaster<C> {
    async fn read_01(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(slave_id, ModbusFunction::ReadCoils, address, quantity).await
    }

    async fn read_02(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<bool>> {
        self.read_bits(slave_id, ModbusFunction::ReadDiscreteInputs, address, quantity).await
    }

    async fn read_03(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_registers(slave_id, ModbusFunction::ReadHoldingRegisters, address, quantity).await
    }

    async fn read_04(&mut self, slave_id: SlaveId, address: u16, quantity: u16) -> ModbusResult<Vec<u16>> {
        self.read_registers(slave_id, ModbusFunction::ReadInputRegisters, address, quantity).await
    }

    async fn write_05(&mut self, slave_id: SlaveId, address: u16, value: bool) -> ModbusResult<()> {
        let request = ModbusRequest::new_write_single_coil(slave_id, address, value);
        self.execute_request(request).await?;
        Ok(())
    }

    async fn write_06(&mut self, slave_id: SlaveId, address: u16, value: u16) -> ModbusResult<()> {
        let request = ModbusRequest::new_write_single_register(slave_id, address, value);
        self.execute_request(request).await?;
        Ok(())
    }

    async fn write_0f(&mut self, slave_id: SlaveId, address: u16, values: &[bool]) -> ModbusResult<()> {
        if values.is_empty() || values.len() > 1968 {
            return Err(ModbusError::invalid_data(format!("Invalid coil count: {}", values.len())));
        }

        let request = ModbusRequest::new_write_multiple_coils(slave_id, address, values);
        self.execute_request(request).await?;
        Ok(())
    }

    async fn write_10(&mut self, slave_id: SlaveId, address: u16, values: &[u16]) -> ModbusResult<()> {
        if values.is_empty() || values.len() > 123 {
            return Err(ModbusError::invalid_data(format!("Invalid register count: {}", values.len())));
        }

        let request = ModbusRequest::new_write_multiple_registers(slave_id, address, values);
        self.execute_request(request).await?;
        Ok(())
    }

    async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_connected()
    }

    async fn close(&mut self) -> ModbusResult<()> {
        self.connection.lock().await.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn unreachable_client() -> ModbusRtuMaster<RtuTcpMasterConnection> {
        ModbusRtuMaster::tcp(IpAddr::V4(Ipv4Addr::LOCALHOST), 1, Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_quantity_limits_checked_before_connecting() {
        let mut client = unreachable_client();

        assert!(matches!(client.read_03(1, 0, 0).await, Err(ModbusError::InvalidData { .. })));
        assert!(matches!(client.read_04(1, 0, 126).await, Err(ModbusError::InvalidData { .. })));
        assert!(matches!(client.read_01(1, 0, 2001).await, Err(ModbusError::InvalidData { .. })));
        assert!(matches!(client.write_0f(1, 0, &[]).await, Err(ModbusError::InvalidData { .. })));
        assert!(matches!(client.write_10(1, 0, &[0u16; 124]).await, Err(ModbusError::InvalidData { .. })));

        assert!(!client.is_connected().await);
        assert_eq!(client.transaction().transaction_id(), 0);
    }

    #[tokio::test]
    async fn test_connect_failure_surfaces_as_io() {
        let mut client = unreachable_client();
        match client.read_03(1, 0, 1).await {
            Err(ModbusError::Io { message }) => assert!(message.starts_with("Connecting failed")),
            other => panic!("unexpected: {:?}", other),
        }
        assert!(client.close().await.is_ok());
    }

    #[test]
    fn test_with_config() {
        let client = unreachable_client().with_config(TransactionConfig {
            retries: 7,
            ..TransactionConfig::default()
        });
        assert_eq!(client.transaction().retries(), 7);
        assert!(client.transaction().is_checking_validity());
    }
}
