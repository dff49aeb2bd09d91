//! # Modbus Transactions
//!
//! A transaction binds a request to a master connection and runs one complete
//! exchange: lock, connect on demand, write and read with retries, then the
//! post-processing steps (slave exceptions, optional reconnect, validity check).
//!
//! ## Retry Policy
//!
//! Every attempt draws a fresh transaction id. Transport failures, timeouts,
//! checksum failures and malformed frames are retried up to `retries` times; a
//! slave exception is a valid reply and is returned at once.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::Mutex;
//! use modbus_rtu_tunnel::connection::RtuTcpMasterConnection;
//! use modbus_rtu_tunnel::protocol::{ModbusFunction, ModbusRequest};
//! use modbus_rtu_tunnel::transaction::ModbusTransaction;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let connection = RtuTcpMasterConnection::new("192.168.1.50".parse()?, 4001);
//! let mut transaction = ModbusTransaction::with_connection(Arc::new(Mutex::new(connection)));
//! transaction.set_retries(5);
//! transaction.set_request(ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 0, 4));
//!
//! let response = transaction.execute().await?;
//! println!("registers: {:?}", response.parse_registers()?);
//! # Ok(())
//! # }
//! ```

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, warn};

use crate::connection::MasterConnection;
use crate::error::{ModbusError, ModbusResult};
use crate::protocol::{ModbusMessage, ModbusRequest, ModbusResponse};
use crate::utils::OperationTimer;

/// Source of transaction ids
///
/// Wraps from 0xFFFF to 0. Share one counter between engines with
/// [`ModbusTransaction::with_transaction_ids`] to keep their ids disjoint.
#[derive(Debug, Default)]
pub struct TransactionIdCounter {
    value: AtomicU16,
}

impl TransactionIdCounter {
    /// Counter whose first issued id is `start + 1`
    pub fn new(start: u16) -> Self {
        Self { value: AtomicU16::new(start) }
    }

    /// Issue the next id
    pub fn increment(&self) -> u16 {
        self.value.fetch_add(1, Ordering::SeqCst).wrapping_add(1)
    }

    /// Last id issued
    pub fn current(&self) -> u16 {
        self.value.load(Ordering::SeqCst)
    }
}

/// Transaction settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionConfig {
    /// Attempts per execution; values below 1 mean one attempt
    pub retries: u32,
    /// Close the connection after every successful exchange
    pub reconnecting: bool,
    /// Run the validity check on every response
    pub checking_validity: bool,
    /// Pause between attempts
    pub trans_delay_ms: u64,
    /// Give up acquiring the transaction lock after this long
    pub lock_timeout_ms: Option<u64>,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            retries: crate::DEFAULT_RETRIES,
            reconnecting: false,
            checking_validity: true,
            trans_delay_ms: 0,
            lock_timeout_ms: None,
        }
    }
}

impl TransactionConfig {
    /// Load settings from JSON; missing fields keep their defaults
    ///
    /// ```rust
    /// use modbus_rtu_tunnel::transaction::TransactionConfig;
    ///
    /// let config = TransactionConfig::from_json(r#"{"retries": 5, "trans_delay_ms": 20}"#).unwrap();
    /// assert_eq!(config.retries, 5);
    /// assert!(config.checking_validity);
    /// ```
    pub fn from_json(json: &str) -> ModbusResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn attempts(&self) -> u32 {
        self.retries.max(1)
    }

    pub fn trans_delay(&self) -> Duration {
        Duration::from_millis(self.trans_delay_ms)
    }

    pub fn lock_timeout(&self) -> Option<Duration> {
        self.lock_timeout_ms.map(Duration::from_millis)
    }
}

/// Hook run on every response when validity checking is enabled
pub trait ValidityCheck: Send + Sync {
    /// Fail with `ModbusError::ValidationFailure` to reject the response
    fn check(&self, request: &ModbusRequest, response: &ModbusResponse) -> ModbusResult<()>;
}

/// Accepts every response
#[derive(Debug, Clone, Copy, Default)]
pub struct NoValidityCheck;

impl ValidityCheck for NoValidityCheck {
    fn check(&self, _request: &ModbusRequest, _response: &ModbusResponse) -> ModbusResult<()> {
        Ok(())
    }
}

/// Requires the response to echo the request's unit id and function code
#[derive(Debug, Clone, Copy, Default)]
pub struct HeaderMatchCheck;

impl ValidityCheck for HeaderMatchCheck {
    fn check(&self, request: &ModbusRequest, response: &ModbusResponse) -> ModbusResult<()> {
        if response.slave_id() != request.slave_id {
            return Err(ModbusError::validation_failure(format!(
                "unit id mismatch: expected {}, got {}",
                request.slave_id,
                response.slave_id()
            )));
        }
        if response.function_code() != request.function_code() {
            return Err(ModbusError::validation_failure(format!(
                "function code mismatch: expected 0x{:02X}, got 0x{:02X}",
                request.function_code(),
                response.function_code()
            )));
        }
        Ok(())
    }
}

/// What the last execution put on the wire and got back
#[derive(Debug, Default)]
struct LastExchange {
    request: Option<ModbusRequest>,
    response: Option<ModbusResponse>,
}

/// One request/response exchange with retries
///
/// `execute` takes `&self`; share the engine as `Arc<ModbusTransaction<C>>`
/// and concurrent executions are serialized by the transaction lock. The lock
/// makes no fairness guarantee.
pub struct ModbusTransaction<C> {
    connection: Option<Arc<Mutex<C>>>,
    request: Option<ModbusRequest>,
    config: TransactionConfig,
    validator: Arc<dyn ValidityCheck>,
    transaction_ids: Arc<TransactionIdCounter>,
    /// The transaction lock; guards the last exchange
    last: Mutex<LastExchange>,
}

impl<C: MasterConnection> Default for ModbusTransaction<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: MasterConnection> ModbusTransaction<C> {
    /// Transaction without connection or request
    pub fn new() -> Self {
        Self {
            connection: None,
            request: None,
            config: TransactionConfig::default(),
            validator: Arc::new(NoValidityCheck),
            transaction_ids: Arc::new(TransactionIdCounter::default()),
            last: Mutex::new(LastExchange::default()),
        }
    }

    /// Transaction bound to `connection`
    pub fn with_connection(connection: Arc<Mutex<C>>) -> Self {
        let mut transaction = Self::new();
        transaction.connection = Some(connection);
        transaction
    }

    /// Draw ids from a counter shared with other engines
    pub fn with_transaction_ids(mut self, counter: Arc<TransactionIdCounter>) -> Self {
        self.transaction_ids = counter;
        self
    }

    pub fn set_connection(&mut self, connection: Arc<Mutex<C>>) {
        self.connection = Some(connection);
    }

    pub fn connection(&self) -> Option<&Arc<Mutex<C>>> {
        self.connection.as_ref()
    }

    pub fn set_request(&mut self, request: ModbusRequest) {
        self.request = Some(request);
    }

    /// The bound request as given to `set_request`
    ///
    /// Executions work on a copy; see [`last_request`](Self::last_request) for
    /// the request as sent, with its transaction id.
    pub fn request(&self) -> Option<&ModbusRequest> {
        self.request.as_ref()
    }

    /// Request of the last attempt, stamped with its transaction id
    pub async fn last_request(&self) -> Option<ModbusRequest> {
        self.last.lock().await.request.clone()
    }

    /// Last response received, slave exceptions included
    pub async fn response(&self) -> Option<ModbusResponse> {
        self.last.lock().await.response.clone()
    }

    pub fn config(&self) -> &TransactionConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: TransactionConfig) {
        self.config = config;
    }

    pub fn retries(&self) -> u32 {
        self.config.retries
    }

    pub fn set_retries(&mut self, retries: u32) {
        self.config.retries = retries;
    }

    pub fn is_reconnecting(&self) -> bool {
        self.config.reconnecting
    }

    pub fn set_reconnecting(&mut self, reconnecting: bool) {
        self.config.reconnecting = reconnecting;
    }

    pub fn is_checking_validity(&self) -> bool {
        self.config.checking_validity
    }

    pub fn set_checking_validity(&mut self, checking: bool) {
        self.config.checking_validity = checking;
    }

    pub fn trans_delay_ms(&self) -> u64 {
        self.config.trans_delay_ms
    }

    pub fn set_trans_delay_ms(&mut self, delay_ms: u64) {
        self.config.trans_delay_ms = delay_ms;
    }

    pub fn set_lock_timeout(&mut self, timeout: Option<Duration>) {
        self.config.lock_timeout_ms = timeout.map(|t| t.as_millis() as u64);
    }

    pub fn set_validity_check(&mut self, check: Arc<dyn ValidityCheck>) {
        self.validator = check;
    }

    /// Last transaction id issued by this engine's counter
    pub fn transaction_id(&self) -> u16 {
        self.transaction_ids.current()
    }

    /// Execute the bound request
    ///
    /// # Errors
    ///
    /// - `ModbusError::NotExecutable` - no request or no connection bound
    /// - `ModbusError::InvalidData` - the request failed validation
    /// - `ModbusError::LockInterrupted` - the lock timeout expired
    /// - `ModbusError::Io` - connecting failed, or every attempt failed
    /// - `ModbusError::SlaveException` - the slave answered with an exception
    /// - `ModbusError::ValidationFailure` - the validity check rejected the response
    pub async fn execute(&self) -> ModbusResult<ModbusResponse> {
        let request = self.request.clone()
            .ok_or_else(|| ModbusError::not_executable("no request bound"))?;
        self.run(request).await
    }

    /// Execute `request` instead of the bound one
    pub async fn execute_request(&self, request: ModbusRequest) -> ModbusResult<ModbusResponse> {
        self.run(request).await
    }

    async fn lock_transaction(&self) -> ModbusResult<MutexGuard<'_, LastExchange>> {
        match self.config.lock_timeout() {
            Some(window) => tokio::time::timeout(window, self.last.lock()).await
                .map_err(|_| ModbusError::lock_interrupted(format!(
                    "transaction lock not acquired within {}ms",
                    window.as_millis()
                ))),
            None => Ok(self.last.lock().await),
        }
    }

    async fn run(&self, mut request: ModbusRequest) -> ModbusResult<ModbusResponse> {
        let connection = self.connection.as_ref()
            .ok_or_else(|| ModbusError::not_executable("no connection bound"))?;
        request.validate()?;

        let mut last = self.lock_transaction().await?;
        let mut connection = connection.lock().await;

        if !connection.is_connected() {
            connection.connect().await
                .map_err(|e| ModbusError::io(format!("Connecting failed: {}", e)))?;
        }

        let attempts = self.config.attempts();
        let timer = OperationTimer::start(&format!("{} slave {}", request.function, request.slave_id));
        let mut attempt = 0;
        let response = loop {
            attempt += 1;
            let transaction_id = self.transaction_ids.increment();
            request.set_transaction_id(transaction_id);

            let outcome = exchange(&mut *connection, &mut request).await;
            last.request = Some(request.clone());
            match outcome {
                Ok(mut response) => {
                    response.set_transaction_id(transaction_id);
                    break response;
                }
                Err(error) if error.is_recoverable() => {
                    if attempt >= attempts {
                        timer.stop_and_log(false);
                        return Err(ModbusError::io(format!(
                            "Executing transaction failed (tried {} times): {}",
                            attempts, error
                        )));
                    }
                    warn!("Attempt {}/{} (id {}) failed: {}", attempt, attempts, transaction_id, error);
                    let delay = self.config.trans_delay();
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
                Err(error) => return Err(error),
            }
        };
        timer.stop();

        last.response = Some(response.clone());

        if let Some(exception) = response.get_exception() {
            debug!("Slave {} answered with an exception", response.slave_id());
            return Err(exception);
        }

        if self.config.reconnecting {
            connection.close().await;
        }

        if self.config.checking_validity {
            self.validator.check(&request, &response)?;
        }

        Ok(response)
    }
}

/// One write/read round on the connection's transport
async fn exchange<C: MasterConnection>(
    connection: &mut C,
    request: &mut ModbusRequest,
) -> ModbusResult<ModbusResponse> {
    let transport = connection.transport()?;
    transport.write_message(request).await?;
    transport.read_response().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ModbusFunction;
    use crate::transport::{RtuTransport, TransportStats};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;

    /// Transport replaying canned outcomes
    struct ScriptedTransport {
        replies: VecDeque<ModbusResult<ModbusResponse>>,
        fallback: Option<ModbusResponse>,
        written_ids: Vec<u16>,
        read_delay: Duration,
        in_flight: Arc<AtomicBool>,
        open: bool,
    }

    #[async_trait]
    impl RtuTransport for ScriptedTransport {
        async fn write_message(&mut self, message: &mut (dyn ModbusMessage + Send)) -> ModbusResult<()> {
            assert!(!self.in_flight.swap(true, Ordering::SeqCst), "exchanges overlap");
            message.set_headless();
            self.written_ids.push(message.transaction_id());
            Ok(())
        }

        async fn read_response(&mut self) -> ModbusResult<ModbusResponse> {
            tokio::time::sleep(self.read_delay).await;
            tokio::task::yield_now().await;
            self.in_flight.store(false, Ordering::SeqCst);
            match self.replies.pop_front() {
                Some(reply) => reply,
                None => self.fallback.clone()
                    .ok_or_else(|| ModbusError::timeout("read frame header", 5000)),
            }
        }

        async fn close(&mut self) -> ModbusResult<()> {
            self.open = false;
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open
        }

        fn stats(&self) -> TransportStats {
            TransportStats::default()
        }

        fn last_request(&self) -> Option<&[u8]> {
            None
        }
    }

    struct MockConnection {
        connected: bool,
        fail_connect: bool,
        connects: usize,
        closes: usize,
        transport: ScriptedTransport,
    }

    impl MockConnection {
        fn new(replies: Vec<ModbusResult<ModbusResponse>>) -> Self {
            Self {
                connected: false,
                fail_connect: false,
                connects: 0,
                closes: 0,
                transport: ScriptedTransport {
                    replies: replies.into(),
                    fallback: None,
                    written_ids: Vec::new(),
                    read_delay: Duration::ZERO,
                    in_flight: Arc::new(AtomicBool::new(false)),
                    open: true,
                },
            }
        }
    }

    #[async_trait]
    impl MasterConnection for MockConnection {
        async fn connect(&mut self) -> ModbusResult<()> {
            self.connect_with_timeout(Duration::from_secs(1)).await
        }

        async fn connect_with_timeout(&mut self, _timeout: Duration) -> ModbusResult<()> {
            if self.fail_connect {
                return Err(ModbusError::connection("refused"));
            }
            self.connects += 1;
            self.connected = true;
            Ok(())
        }

        fn is_connected(&self) -> bool {
            self.connected
        }

        async fn close(&mut self) {
            self.closes += 1;
            self.connected = false;
        }

        fn transport(&mut self) -> ModbusResult<&mut dyn RtuTransport> {
            Ok(&mut self.transport as &mut dyn RtuTransport)
        }
    }

    fn read_request() -> ModbusRequest {
        ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 0, 2)
    }

    fn registers_reply() -> ModbusResponse {
        ModbusResponse::new_success(1, ModbusFunction::ReadHoldingRegisters, vec![4, 0x00, 0x01, 0x00, 0x02])
    }

    fn engine(connection: MockConnection) -> (ModbusTransaction<MockConnection>, Arc<Mutex<MockConnection>>) {
        let connection = Arc::new(Mutex::new(connection));
        let mut transaction = ModbusTransaction::with_connection(connection.clone());
        transaction.set_request(read_request());
        (transaction, connection)
    }

    #[test]
    fn test_counter_wraps() {
        let counter = TransactionIdCounter::new(0xFFFE);
        assert_eq!(counter.increment(), 0xFFFF);
        assert_eq!(counter.increment(), 0x0000);
        assert_eq!(counter.increment(), 0x0001);
        assert_eq!(counter.current(), 0x0001);

        assert_eq!(TransactionIdCounter::default().increment(), 1);
    }

    #[test]
    fn test_config_from_json() {
        let config = TransactionConfig::from_json(r#"{"retries": 0, "reconnecting": true, "lock_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.attempts(), 1);
        assert!(config.reconnecting);
        assert!(config.checking_validity);
        assert_eq!(config.lock_timeout(), Some(Duration::from_millis(250)));

        assert!(matches!(TransactionConfig::from_json("{"), Err(ModbusError::Configuration { .. })));
        assert_eq!(TransactionConfig::default().retries, 3);
    }

    #[tokio::test]
    async fn test_not_executable() {
        let transaction = ModbusTransaction::<MockConnection>::new();
        assert!(matches!(transaction.execute().await, Err(ModbusError::NotExecutable { .. })));

        let (mut transaction, _) = engine(MockConnection::new(vec![]));
        transaction.request = None;
        assert!(matches!(transaction.execute().await, Err(ModbusError::NotExecutable { .. })));
    }

    #[tokio::test]
    async fn test_successful_execute() {
        let (transaction, connection) = engine(MockConnection::new(vec![Ok(registers_reply())]));

        let response = transaction.execute().await.unwrap();
        assert_eq!(response.transaction_id(), 1);
        assert_eq!(response.parse_registers().unwrap(), vec![1, 2]);
        assert_eq!(transaction.transaction_id(), 1);
        assert_eq!(transaction.response().await, Some(response));

        let connection = connection.lock().await;
        assert_eq!(connection.connects, 1);
        assert_eq!(connection.transport.written_ids, vec![1]);
    }

    #[tokio::test]
    async fn test_last_request_carries_attempt_id() {
        let (transaction, _) = engine(MockConnection::new(vec![Ok(registers_reply())]));
        assert!(transaction.last_request().await.is_none());

        transaction.execute().await.unwrap();

        let bound = transaction.request().unwrap();
        assert_eq!(bound.transaction_id(), 0);
        assert!(!bound.is_headless());

        let sent = transaction.last_request().await.unwrap();
        assert_eq!(sent.transaction_id(), 1);
        assert!(sent.is_headless());
        assert_eq!(sent.function, bound.function);
    }

    #[tokio::test]
    async fn test_retry_exhaustion_advances_ids_by_retries() {
        let (mut transaction, connection) = engine(MockConnection::new(vec![]));
        transaction.set_retries(4);

        match transaction.execute().await {
            Err(ModbusError::Io { message }) => {
                assert!(message.starts_with("Executing transaction failed (tried 4 times)"), "{}", message);
                assert!(message.contains("read frame header"));
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(transaction.transaction_id(), 4);
        assert_eq!(connection.lock().await.transport.written_ids, vec![1, 2, 3, 4]);
        assert_eq!(transaction.last_request().await.map(|r| r.transaction_id()), Some(4));
    }

    #[tokio::test]
    async fn test_zero_retries_means_one_attempt() {
        let (mut transaction, _) = engine(MockConnection::new(vec![]));
        transaction.set_retries(0);

        assert!(matches!(transaction.execute().await, Err(ModbusError::Io { .. })));
        assert_eq!(transaction.transaction_id(), 1);
    }

    #[tokio::test]
    async fn test_crc_mismatch_is_retried() {
        let replies = vec![
            Err(ModbusError::crc_mismatch(0x1111, 0x2222, "01 03")),
            Err(ModbusError::malformed_frame(0x42, "unsupported function code")),
            Ok(registers_reply()),
        ];
        let (mut transaction, _) = engine(MockConnection::new(replies));
        transaction.set_trans_delay_ms(1);

        let response = transaction.execute().await.unwrap();
        assert_eq!(response.transaction_id(), 3);
        assert_eq!(transaction.transaction_id(), 3);
    }

    #[tokio::test]
    async fn test_slave_exception_is_not_retried() {
        let exception = ModbusResponse::new_exception(1, 0x83, 0x02);
        let (transaction, _) = engine(MockConnection::new(vec![Ok(exception), Ok(registers_reply())]));

        match transaction.execute().await {
            Err(ModbusError::SlaveException { function, code, .. }) => {
                assert_eq!(function, 0x03);
                assert_eq!(code, 0x02);
            }
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(transaction.transaction_id(), 1);
        assert!(transaction.response().await.map_or(false, |r| r.is_exception()));
    }

    #[tokio::test]
    async fn test_connect_failure() {
        let mut mock = MockConnection::new(vec![Ok(registers_reply())]);
        mock.fail_connect = true;
        let (transaction, _) = engine(mock);

        match transaction.execute().await {
            Err(ModbusError::Io { message }) => assert!(message.starts_with("Connecting failed")),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(transaction.transaction_id(), 0);
    }

    #[tokio::test]
    async fn test_invalid_request_is_rejected_before_exchange() {
        let (transaction, connection) = engine(MockConnection::new(vec![]));
        let request = ModbusRequest::new_read(0, ModbusFunction::ReadHoldingRegisters, 0, 1);

        assert!(matches!(transaction.execute_request(request).await, Err(ModbusError::InvalidData { .. })));
        assert_eq!(transaction.transaction_id(), 0);
        assert_eq!(connection.lock().await.connects, 0);
    }

    #[tokio::test]
    async fn test_reconnecting_closes_connection() {
        let (mut transaction, connection) = engine(MockConnection::new(vec![Ok(registers_reply()), Ok(registers_reply())]));
        transaction.set_reconnecting(true);

        transaction.execute().await.unwrap();
        assert!(!connection.lock().await.is_connected());

        transaction.execute().await.unwrap();
        let connection = connection.lock().await;
        assert_eq!(connection.connects, 2);
        assert_eq!(connection.closes, 2);
    }

    #[tokio::test]
    async fn test_header_match_check() {
        let foreign = ModbusResponse::new_success(9, ModbusFunction::ReadHoldingRegisters, vec![2, 0, 1]);
        let (mut transaction, _) = engine(MockConnection::new(vec![Ok(foreign.clone()), Ok(foreign)]));
        transaction.set_validity_check(Arc::new(HeaderMatchCheck));

        assert!(matches!(transaction.execute().await, Err(ModbusError::ValidationFailure { .. })));

        transaction.set_checking_validity(false);
        assert!(transaction.execute().await.is_ok());
    }

    #[tokio::test]
    async fn test_lock_timeout() {
        let mut mock = MockConnection::new(vec![]);
        mock.transport.fallback = Some(registers_reply());
        mock.transport.read_delay = Duration::from_millis(200);
        let (mut transaction, _) = engine(mock);
        transaction.set_lock_timeout(Some(Duration::from_millis(20)));
        let transaction = Arc::new(transaction);

        let busy = {
            let transaction = transaction.clone();
            tokio::spawn(async move { transaction.execute().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(matches!(transaction.execute().await, Err(ModbusError::LockInterrupted { .. })));
        assert!(busy.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_executes_are_serialized() {
        let mut mock = MockConnection::new(vec![]);
        mock.transport.fallback = Some(registers_reply());
        mock.transport.read_delay = Duration::from_millis(2);
        let (transaction, connection) = engine(mock);
        let transaction = Arc::new(transaction);

        let tasks = (0..8).map(|_| {
            let transaction = transaction.clone();
            tokio::spawn(async move { transaction.execute().await })
        });
        let results = futures::future::join_all(tasks).await;

        let mut ids: Vec<u16> = results
            .into_iter()
            .map(|joined| joined.unwrap().unwrap().transaction_id())
            .collect();
        ids.sort_unstable();
        assert_eq!(ids, (1..=8).collect::<Vec<u16>>());

        // ids hit the wire in increasing order
        let written = connection.lock().await.transport.written_ids.clone();
        assert!(written.windows(2).all(|pair| pair[0] < pair[1]));
    }

    #[tokio::test]
    async fn test_shared_counter_across_engines() {
        let counter = Arc::new(TransactionIdCounter::default());
        let (first, _) = engine(MockConnection::new(vec![Ok(registers_reply())]));
        let (second, _) = engine(MockConnection::new(vec![Ok(registers_reply())]));
        let first = first.with_transaction_ids(counter.clone());
        let second = second.with_transaction_ids(counter.clone());

        assert_eq!(first.execute().await.unwrap().transaction_id(), 1);
        assert_eq!(second.execute().await.unwrap().transaction_id(), 2);
        assert_eq!(counter.current(), 2);
    }
}
