//! # Master Connections
//!
//! A master connection owns the byte stream to the field bus and the
//! [`FrameTransport`] bound to it. Both implementations follow the same state
//! machine:
//!
//! ```text
//! Disconnected --connect--> Connected --close--> Disconnected
//! ```
//!
//! `connect` on a connected master and `close` on a disconnected one are no-ops.
//! A reconnect rebinds the existing transport to the new stream, so transport
//! statistics survive reconnects.
//!
//! - [`RtuTcpMasterConnection`]: RTU frames tunnelled through a TCP socket
//!   (serial-to-Ethernet gateways in transparent mode)
//! - `SerialMasterConnection`: RTU frames on a local serial port (`serial` feature)

use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tracing::{debug, info, warn};

use crate::error::{ModbusError, ModbusResult};
use crate::transport::{FrameTransport, RtuTransport, TransportConfig};

/// Connection to a Modbus slave (or a gateway in front of several)
#[async_trait]
pub trait MasterConnection: Send {
    /// Open the connection using the configured timeout
    async fn connect(&mut self) -> ModbusResult<()>;

    /// Open the connection, giving up after `timeout`
    async fn connect_with_timeout(&mut self, timeout: Duration) -> ModbusResult<()>;

    /// Whether the connection is open
    fn is_connected(&self) -> bool;

    /// Close the connection
    ///
    /// Errors while closing are logged and swallowed; afterwards the connection
    /// is always disconnected.
    async fn close(&mut self);

    /// Transport bound to the open connection
    fn transport(&mut self) -> ModbusResult<&mut dyn RtuTransport>;
}

/// RTU master tunnelled through TCP
///
/// # Examples
///
/// ```rust,no_run
/// use modbus_rtu_tunnel::connection::{MasterConnection, RtuTcpMasterConnection};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let mut connection = RtuTcpMasterConnection::new("192.168.1.50".parse()?, 4001);
/// connection.connect().await?;
/// assert!(connection.is_connected());
/// connection.close().await;
/// # Ok(())
/// # }
/// ```
pub struct RtuTcpMasterConnection {
    address: IpAddr,
    port: u16,
    timeout: Duration,
    connected: bool,
    transport: Option<FrameTransport<TcpStream>>,
    transport_config: TransportConfig,
}

impl RtuTcpMasterConnection {
    /// Create a disconnected master for `address:port`
    pub fn new(address: IpAddr, port: u16) -> Self {
        Self::with_config(address, port, TransportConfig::default())
    }

    /// Create a disconnected master with custom transport settings
    ///
    /// The connect timeout starts out equal to the transport's read timeout.
    pub fn with_config(address: IpAddr, port: u16, transport_config: TransportConfig) -> Self {
        Self {
            address,
            port,
            timeout: transport_config.read_timeout(),
            connected: false,
            transport: None,
            transport_config,
        }
    }

    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// Takes effect on the next connect
    pub fn set_address(&mut self, address: IpAddr) {
        self.address = address;
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Takes effect on the next connect
    pub fn set_port(&mut self, port: u16) {
        self.port = port;
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Set the connect timeout and the transport's read timeout
    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
        self.transport_config.read_timeout_ms = timeout.as_millis() as u64;
        if let Some(transport) = self.transport.as_mut() {
            transport.set_config(self.transport_config.clone());
        }
    }

    pub fn transport_config(&self) -> &TransportConfig {
        &self.transport_config
    }

    /// Replace the transport settings, including on an already bound transport
    pub fn set_transport_config(&mut self, config: TransportConfig) {
        if let Some(transport) = self.transport.as_mut() {
            transport.set_config(config.clone());
        }
        self.transport_config = config;
    }

    async fn open_stream(&self, timeout: Duration) -> ModbusResult<TcpStream> {
        let address = self.socket_addr();
        let stream = tokio::time::timeout(timeout, TcpStream::connect(address)).await
            .map_err(|_| ModbusError::timeout(format!("connect to {}", address), timeout.as_millis() as u64))?
            .map_err(|e| ModbusError::connection(format!("Failed to connect to {}: {}", address, e)))?;

        stream.set_nodelay(true)
            .map_err(|e| ModbusError::connection(format!("Failed to set TCP_NODELAY on {}: {}", address, e)))?;
        Ok(stream)
    }
}

#[async_trait]
impl MasterConnection for RtuTcpMasterConnection {
    async fn connect(&mut self) -> ModbusResult<()> {
        let timeout = self.timeout;
        self.connect_with_timeout(timeout).await
    }

    async fn connect_with_timeout(&mut self, timeout: Duration) -> ModbusResult<()> {
        if self.connected {
            return Ok(());
        }

        let address = self.socket_addr();
        let stream = self.open_stream(timeout).await?;
        match self.transport.as_mut() {
            Some(transport) => {
                debug!("Rebinding transport to {}", address);
                transport.set_stream(stream).await;
            }
            None => {
                self.transport = Some(FrameTransport::new(stream, self.transport_config.clone()));
            }
        }

        self.connected = true;
        info!("Connected to RTU tunnel at {}", address);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected
    }

    async fn close(&mut self) {
        if !self.connected {
            return;
        }
        if let Some(transport) = self.transport.as_mut() {
            if let Err(e) = transport.close().await {
                warn!("Error while closing connection to {}: {}", self.socket_addr(), e);
            }
        }
        self.connected = false;
        debug!("Closed connection to {}", self.socket_addr());
    }

    fn transport(&mut self) -> ModbusResult<&mut dyn RtuTransport> {
        if !self.connected {
            return Err(ModbusError::connection(format!("not connected to {}", self.socket_addr())));
        }
        match self.transport.as_mut() {
            Some(transport) => Ok(transport as &mut dyn RtuTransport),
            None => Err(ModbusError::connection("no transport bound")),
        }
    }
}

/// Parity setting of a serial line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parity {
    None,
    Odd,
    Even,
}

/// Serial line settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialParameters {
    /// Device path, e.g. `/dev/ttyUSB0` or `COM3`
    pub port_name: String,
    pub baud_rate: u32,
    /// 5 to 8
    #[serde(default = "default_data_bits")]
    pub data_bits: u8,
    /// 1 or 2
    #[serde(default = "default_stop_bits")]
    pub stop_bits: u8,
    #[serde(default = "default_parity")]
    pub parity: Parity,
}

fn default_data_bits() -> u8 {
    8
}

fn default_stop_bits() -> u8 {
    1
}

fn default_parity() -> Parity {
    Parity::None
}

impl SerialParameters {
    /// 8 data bits, 1 stop bit, no parity
    pub fn new(port_name: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port_name: port_name.into(),
            baud_rate,
            data_bits: default_data_bits(),
            stop_bits: default_stop_bits(),
            parity: default_parity(),
        }
    }

    /// Check the settings without touching the device
    pub fn validate(&self) -> ModbusResult<()> {
        if self.port_name.is_empty() {
            return Err(ModbusError::configuration("serial port name is empty"));
        }
        if self.baud_rate == 0 {
            return Err(ModbusError::configuration("baud rate must be positive"));
        }
        if !(5..=8).contains(&self.data_bits) {
            return Err(ModbusError::configuration(format!("unsupported data bits: {}", self.data_bits)));
        }
        if !(1..=2).contains(&self.stop_bits) {
            return Err(ModbusError::configuration(format!("unsupported stop bits: {}", self.stop_bits)));
        }
        Ok(())
    }
}

#[cfg(feature = "serial")]
pub use self::serial::SerialMasterConnection;

#[cfg(feature = "serial")]
mod serial {
    use super::*;
    use tokio_serial::SerialStream;

    impl SerialParameters {
        fn data_bits_setting(&self) -> ModbusResult<tokio_serial::DataBits> {
            match self.data_bits {
                5 => Ok(tokio_serial::DataBits::Five),
                6 => Ok(tokio_serial::DataBits::Six),
                7 => Ok(tokio_serial::DataBits::Seven),
                8 => Ok(tokio_serial::DataBits::Eight),
                other => Err(ModbusError::configuration(format!("unsupported data bits: {}", other))),
            }
        }

        fn stop_bits_setting(&self) -> ModbusResult<tokio_serial::StopBits> {
            match self.stop_bits {
                1 => Ok(tokio_serial::StopBits::One),
                2 => Ok(tokio_serial::StopBits::Two),
                other => Err(ModbusError::configuration(format!("unsupported stop bits: {}", other))),
            }
        }

        fn parity_setting(&self) -> tokio_serial::Parity {
            match self.parity {
                Parity::None => tokio_serial::Parity::None,
                Parity::Odd => tokio_serial::Parity::Odd,
                Parity::Even => tokio_serial::Parity::Even,
            }
        }
    }

    /// RTU master on a local serial port
    ///
    /// Write pacing and the inter-frame gap are derived from the baud rate.
    pub struct SerialMasterConnection {
        parameters: SerialParameters,
        timeout: Duration,
        connected: bool,
        transport: Option<FrameTransport<SerialStream>>,
        transport_config: TransportConfig,
    }

    impl SerialMasterConnection {
        pub fn new(parameters: SerialParameters) -> Self {
            let transport_config = TransportConfig::for_baud_rate(parameters.baud_rate);
            Self {
                timeout: transport_config.read_timeout(),
                parameters,
                connected: false,
                transport: None,
                transport_config,
            }
        }

        pub fn parameters(&self) -> &SerialParameters {
            &self.parameters
        }

        /// Takes effect on the next connect
        pub fn set_parameters(&mut self, parameters: SerialParameters) {
            let read_timeout_ms = self.transport_config.read_timeout_ms;
            self.transport_config = TransportConfig {
                read_timeout_ms,
                ..TransportConfig::for_baud_rate(parameters.baud_rate)
            };
            self.parameters = parameters;
        }

        pub fn timeout(&self) -> Duration {
            self.timeout
        }

        pub fn set_timeout(&mut self, timeout: Duration) {
            self.timeout = timeout;
            self.transport_config.read_timeout_ms = timeout.as_millis() as u64;
            if let Some(transport) = self.transport.as_mut() {
                transport.set_config(self.transport_config.clone());
            }
        }

        fn open_port(&self, timeout: Duration) -> ModbusResult<SerialStream> {
            self.parameters.validate()?;
            let builder = tokio_serial::new(&self.parameters.port_name, self.parameters.baud_rate)
                .data_bits(self.parameters.data_bits_setting()?)
                .stop_bits(self.parameters.stop_bits_setting()?)
                .parity(self.parameters.parity_setting())
                .timeout(timeout);

            SerialStream::open(&builder)
                .map_err(|e| ModbusError::connection(format!(
                    "Failed to open serial port {}: {}", self.parameters.port_name, e
                )))
        }
    }

    #[async_trait]
    impl MasterConnection for SerialMasterConnection {
        async fn connect(&mut self) -> ModbusResult<()> {
            let timeout = self.timeout;
            self.connect_with_timeout(timeout).await
        }

        async fn connect_with_timeout(&mut self, timeout: Duration) -> ModbusResult<()> {
            if self.connected {
                return Ok(());
            }

            let port = self.open_port(timeout)?;
            match self.transport.as_mut() {
                Some(transport) => transport.set_stream(port).await,
                None => self.transport = Some(FrameTransport::new(port, self.transport_config.clone())),
            }

            self.connected = true;
            info!("Opened serial port {} at {} baud", self.parameters.port_name, self.parameters.baud_rate);
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn close(&mut self) {
            if !self.connected {
                return;
            }
            if let Some(transport) = self.transport.as_mut() {
                if let Err(e) = transport.close().await {
                    warn!("Error while closing serial port {}: {}", self.parameters.port_name, e);
                }
            }
            self.connected = false;
        }

        fn transport(&mut self) -> ModbusResult<&mut dyn RtuTransport> {
            if !self.connected {
                return Err(ModbusError::connection(format!(
                    "serial port {} not open", self.parameters.port_name
                )));
            }
            match self.transport.as_mut() {
                Some(transport) => Ok(transport as &mut dyn RtuTransport),
                None => Err(ModbusError::connection("no transport bound")),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

    #[tokio::test]
    async fn test_connect_and_close() {
        let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut connection = RtuTcpMasterConnection::new(LOCALHOST, port);
        assert!(!connection.is_connected());
        assert!(connection.transport().is_err());

        connection.connect().await.unwrap();
        assert!(connection.is_connected());
        assert!(connection.transport().unwrap().is_open());

        // second connect is a no-op
        connection.connect().await.unwrap();
        let (_peer, _) = listener.accept().await.unwrap();

        connection.close().await;
        assert!(!connection.is_connected());
        assert!(connection.transport().is_err());

        // closing twice is harmless
        connection.close().await;
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let mut connection = RtuTcpMasterConnection::new(LOCALHOST, port);
        let result = connection.connect_with_timeout(Duration::from_secs(2)).await;
        assert!(matches!(result, Err(ModbusError::Connection { .. }) | Err(ModbusError::Timeout { .. })));
        assert!(!connection.is_connected());
    }

    #[tokio::test]
    async fn test_reconnect_rebinds_transport() {
        let listener = TcpListener::bind((LOCALHOST, 0)).await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let mut connection = RtuTcpMasterConnection::new(LOCALHOST, port);
        connection.connect().await.unwrap();
        let _first = listener.accept().await.unwrap();

        // the transport fails to close once it has been closed underneath
        connection.transport().unwrap().close().await.unwrap();
        connection.close().await;
        assert!(!connection.is_connected());

        connection.connect().await.unwrap();
        let _second = listener.accept().await.unwrap();
        assert!(connection.transport().unwrap().is_open());
    }

    #[test]
    fn test_accessors() {
        let mut connection = RtuTcpMasterConnection::new(LOCALHOST, 4001);
        assert_eq!(connection.port(), 4001);
        assert_eq!(connection.timeout(), Duration::from_millis(5000));

        connection.set_port(crate::DEFAULT_TCP_PORT);
        connection.set_address(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 7)));
        connection.set_timeout(Duration::from_millis(1500));

        assert_eq!(connection.socket_addr().to_string(), "10.0.0.7:502");
        assert_eq!(connection.transport_config().read_timeout_ms, 1500);
    }

    #[test]
    fn test_serial_parameters() {
        let parameters: SerialParameters =
            serde_json::from_str(r#"{"port_name": "/dev/ttyUSB0", "baud_rate": 19200, "parity": "even"}"#).unwrap();
        assert_eq!(parameters.data_bits, 8);
        assert_eq!(parameters.stop_bits, 1);
        assert_eq!(parameters.parity, Parity::Even);
        assert!(parameters.validate().is_ok());

        let mut invalid = SerialParameters::new("/dev/ttyS0", 9600);
        invalid.data_bits = 9;
        assert!(matches!(invalid.validate(), Err(ModbusError::Configuration { .. })));

        assert!(SerialParameters::new("", 9600).validate().is_err());
    }

    #[cfg(feature = "serial")]
    #[tokio::test]
    async fn test_serial_open_missing_port() {
        let mut connection = SerialMasterConnection::new(SerialParameters::new("/dev/does-not-exist-rtu", 9600));
        assert_eq!(connection.timeout(), Duration::from_millis(5000));
        assert!(connection.connect().await.is_err());
        assert!(!connection.is_connected());
    }
}
