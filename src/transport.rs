//! # RTU Frame Transport
//!
//! This module moves RTU frames over any tokio byte stream: a TCP socket to a
//! serial-to-Ethernet gateway, a serial port, or an in-memory pipe in tests.
//!
//! ## Frame Delimiting
//!
//! A tunnelled byte stream has no inter-character silence, so a reply is cut out
//! of the stream by its function code:
//!
//! 1. read the unit id and function code (2 bytes)
//! 2. read the one or two length bytes the function code calls for
//! 3. classify the frame with [`crate::frame::classify`]
//! 4. read the remainder and check the trailing CRC
//!
//! Every wait of one read shares a single [`ReadDeadline`]. When any step fails,
//! whatever is still readable is drained so the next exchange starts on a frame
//! boundary.
//!
//! ## Usage Example
//!
//! ```rust
//! use modbus_rtu_tunnel::transport::{FrameTransport, RtuTransport, TransportConfig};
//! use modbus_rtu_tunnel::protocol::{ModbusFunction, ModbusRequest};
//! use tokio::io::{AsyncReadExt, AsyncWriteExt};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (master, mut slave) = tokio::io::duplex(256);
//!     let mut transport = FrameTransport::new(master, TransportConfig::default());
//!
//!     let mut request = ModbusRequest::new_read(1, ModbusFunction::ReadHoldingRegisters, 0, 1);
//!     transport.write_message(&mut request).await?;
//!
//!     let mut frame = [0u8; 8];
//!     slave.read_exact(&mut frame).await?;
//!     slave.write_all(&[0x01, 0x03, 0x02, 0x00, 0x2A, 0x39, 0x9B]).await?;
//!
//!     let response = transport.read_response().await?;
//!     assert_eq!(response.parse_registers()?, vec![42]);
//!     Ok(())
//! }
//! ```

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use crate::error::{ModbusError, ModbusResult};
use crate::frame::{self, FrameRule, CRC_SIZE, HEADER_SIZE};
use crate::protocol::{ModbusMessage, ModbusResponse};
use crate::utils::format::bytes_to_hex;

/// Longest length field that follows a function code (0x18 word count)
const MAX_LENGTH_FIELD: usize = 2;

/// How long the drain waits for more stale bytes before giving up
const DRAIN_IDLE: Duration = Duration::from_millis(10);

/// Upper bound on reads per drain
const DRAIN_MAX_READS: usize = 64;

/// Stand-in deadline for windows too large to add to the current instant
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Log packet with direction
fn log_packet(direction: &str, data: &[u8]) {
    match data.first() {
        Some(id) => info!("[MODBUS-RTU] {} slave:{} {}", direction, id, bytes_to_hex(data)),
        None => info!("[MODBUS-RTU] {} {}", direction, bytes_to_hex(data)),
    }
}

/// Transport settings
///
/// Durations are kept in integer units so the struct reads naturally from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Window of one `read_response` call
    pub read_timeout_ms: u64,
    /// Pause after a write, per byte written (lets the gateway drain to the line)
    pub pacing_per_byte_us: u64,
    /// Silence observed before each write (3.5 characters on a serial line)
    pub frame_gap_us: u64,
    /// Discard stale input before each write
    pub clear_input_before_write: bool,
    /// Hex-dump every frame at `info`
    pub packet_logging: bool,
    /// Largest frame accepted by the reader
    pub max_frame_length: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            read_timeout_ms: crate::DEFAULT_TIMEOUT_MS,
            pacing_per_byte_us: 1_000,
            frame_gap_us: 0,
            clear_input_before_write: true,
            packet_logging: false,
            max_frame_length: crate::MAX_RTU_FRAME_SIZE,
        }
    }
}

impl TransportConfig {
    /// Settings for a serial line at `baud_rate`
    ///
    /// One character is 11 bits on the wire (start, 8 data, parity or second
    /// stop, stop); writes are paced by one character time per byte and preceded
    /// by a 3.5 character gap.
    pub fn for_baud_rate(baud_rate: u32) -> Self {
        let char_time_us = 11_000_000 / baud_rate.max(1) as u64;
        Self {
            pacing_per_byte_us: char_time_us,
            frame_gap_us: char_time_us * 35 / 10,
            ..Self::default()
        }
    }

    pub fn read_timeout(&self) -> Duration {
        Duration::from_millis(self.read_timeout_ms)
    }

    pub fn pacing_per_byte(&self) -> Duration {
        Duration::from_micros(self.pacing_per_byte_us)
    }

    pub fn frame_gap(&self) -> Duration {
        Duration::from_micros(self.frame_gap_us)
    }

    /// Pause after writing a frame of `frame_len` bytes
    pub fn pacing_for(&self, frame_len: usize) -> Duration {
        let bytes = u32::try_from(frame_len).unwrap_or(u32::MAX);
        self.pacing_per_byte().saturating_mul(bytes)
    }
}

/// Transport layer statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransportStats {
    pub requests_sent: u64,
    pub responses_received: u64,
    pub errors: u64,
    pub timeouts: u64,
    pub crc_errors: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl TransportStats {
    fn record_failure(&mut self, error: &ModbusError) {
        self.errors += 1;
        match error {
            ModbusError::Timeout { .. } => self.timeouts += 1,
            ModbusError::CrcMismatch { .. } => self.crc_errors += 1,
            _ => {}
        }
    }
}

/// Absolute deadline shared by every wait of one read.
///
/// The deadline is a plain value: nothing is scheduled, so nothing can fire
/// after the read that armed it has returned.
#[derive(Debug, Clone, Copy)]
pub struct ReadDeadline {
    expires_at: Instant,
    window: Duration,
}

impl ReadDeadline {
    /// Arm a deadline `window` from now
    pub fn arm(window: Duration) -> Self {
        let now = Instant::now();
        Self {
            expires_at: now.checked_add(window).unwrap_or(now + FAR_FUTURE),
            window,
        }
    }

    pub fn expires_at(&self) -> Instant {
        self.expires_at
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    /// Run one I/O step, failing with `Timeout` once the deadline passes
    pub async fn guard<F, T>(&self, operation: &str, io: F) -> ModbusResult<T>
    where
        F: Future<Output = std::io::Result<T>>,
    {
        match timeout_at(self.expires_at, io).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ModbusError::timeout(operation, self.window.as_millis() as u64)),
        }
    }
}

/// Frame-level transport used by master connections
///
/// Implementations own their stream exclusively; callers serialize access
/// through the connection that owns the transport.
#[async_trait]
pub trait RtuTransport: Send {
    /// Serialize `message` headless, append the CRC and send it
    ///
    /// # Errors
    ///
    /// - `ModbusError::Io` - the transport is not open or the write failed
    /// - `ModbusError::Timeout` - the stream did not accept the frame in time
    async fn write_message(&mut self, message: &mut (dyn ModbusMessage + Send)) -> ModbusResult<()>;

    /// Read exactly one reply frame and turn it into a response
    ///
    /// # Errors
    ///
    /// - `ModbusError::Timeout` - the read deadline passed
    /// - `ModbusError::MalformedFrame` - unknown function code or impossible length
    /// - `ModbusError::CrcMismatch` - the frame arrived but its checksum is wrong
    /// - `ModbusError::Io` - the stream failed or was closed by the peer
    async fn read_response(&mut self) -> ModbusResult<ModbusResponse>;

    /// Shut the stream down and release it
    async fn close(&mut self) -> ModbusResult<()>;

    /// Whether a stream is bound
    fn is_open(&self) -> bool;

    /// Get transport statistics
    fn stats(&self) -> TransportStats;

    /// Raw bytes of the last frame written, CRC included
    fn last_request(&self) -> Option<&[u8]>;
}

/// RTU framing over any tokio byte stream
pub struct FrameTransport<S> {
    stream: Option<S>,
    config: TransportConfig,
    out_buf: Vec<u8>,
    in_buf: Vec<u8>,
    last_request: Option<Vec<u8>>,
    stats: TransportStats,
}

impl<S> FrameTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Bind a transport to an open stream
    pub fn new(stream: S, config: TransportConfig) -> Self {
        Self {
            stream: Some(stream),
            out_buf: Vec::with_capacity(config.max_frame_length),
            in_buf: Vec::with_capacity(config.max_frame_length),
            config,
            last_request: None,
            stats: TransportStats::default(),
        }
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: TransportConfig) {
        self.config = config;
    }

    /// Enable or disable packet logging
    pub fn set_packet_logging(&mut self, enabled: bool) {
        self.config.packet_logging = enabled;
    }

    /// Rebind the transport to a new stream
    ///
    /// The previous stream, if any, is shut down first; failing to do so is only
    /// logged. Scratch buffers are reset.
    pub async fn set_stream(&mut self, stream: S) {
        if let Some(mut previous) = self.stream.take() {
            if let Err(e) = previous.shutdown().await {
                debug!("Ignoring error while shutting down previous stream: {}", e);
            }
        }
        self.stream = Some(stream);
        self.out_buf.clear();
        self.in_buf.clear();
    }

    /// Discard whatever is readable right now, waiting at most `idle` for each
    /// further chunk.
    async fn drain(&mut self, idle: Duration) {
        let Some(stream) = self.stream.as_mut() else {
            return;
        };

        let mut scratch = [0u8; 64];
        let mut discarded = 0usize;
        for _ in 0..DRAIN_MAX_READS {
            match timeout(idle, stream.read(&mut scratch)).await {
                Ok(Ok(0)) => break,
                Ok(Ok(n)) => discarded += n,
                Ok(Err(e)) => {
                    warn!("Failed to drain input: {}", e);
                    break;
                }
                Err(_) => break,
            }
        }

        if discarded > 0 {
            debug!("Discarded {} stale bytes", discarded);
        }
    }

    async fn read_frame(&mut self) -> ModbusResult<ModbusResponse> {
        let deadline = ReadDeadline::arm(self.config.read_timeout());
        let max_frame_length = self.config.max_frame_length;

        let stream = self.stream.as_mut()
            .ok_or_else(|| ModbusError::io("transport not open"))?;
        let buf = &mut self.in_buf;
        buf.clear();
        buf.resize(max_frame_length.max(HEADER_SIZE + MAX_LENGTH_FIELD), 0);

        deadline.guard("read frame header", stream.read_exact(&mut buf[..HEADER_SIZE])).await?;
        let function_code = buf[1];

        let field_size = FrameRule::for_function_code(function_code).length_field_size();
        if field_size > 0 {
            let field = &mut buf[HEADER_SIZE..HEADER_SIZE + field_size];
            deadline.guard("read length field", stream.read_exact(field)).await?;
        }

        let length = frame::classify(function_code, &mut &buf[HEADER_SIZE..HEADER_SIZE + field_size])?;
        frame::check_length(function_code, &length, max_frame_length)?;

        let consumed = length.consumed();
        if length.total > consumed {
            let body = &mut buf[consumed..length.total];
            deadline.guard("read frame body", stream.read_exact(body)).await?;
        }

        let frame = &buf[..length.total];
        self.stats.bytes_received += frame.len() as u64;
        if self.config.packet_logging {
            log_packet("receive", frame);
        }

        if let Err((computed, received)) = frame::verify_crc(frame) {
            return Err(ModbusError::crc_mismatch(computed, received, bytes_to_hex(frame)));
        }

        ModbusResponse::decode(&frame[..length.total - CRC_SIZE], true)
    }
}

#[async_trait]
impl<S> RtuTransport for FrameTransport<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn write_message(&mut self, message: &mut (dyn ModbusMessage + Send)) -> ModbusResult<()> {
        if self.stream.is_none() {
            return Err(ModbusError::io("transport not open"));
        }

        if self.config.clear_input_before_write {
            self.drain(Duration::ZERO).await;
        }

        let gap = self.config.frame_gap();
        if !gap.is_zero() {
            tokio::time::sleep(gap).await;
        }

        message.set_headless();
        self.out_buf.clear();
        message.write_to(&mut self.out_buf);
        frame::append_crc(&mut self.out_buf);

        let write_timeout = self.config.read_timeout();
        let out = &self.out_buf;
        let stream = self.stream.as_mut()
            .ok_or_else(|| ModbusError::io("transport not open"))?;
        let send = async {
            stream.write_all(out).await?;
            stream.flush().await
        };

        match timeout(write_timeout, send).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                self.stats.errors += 1;
                return Err(ModbusError::io(format!("Failed to write frame: {}", e)));
            }
            Err(_) => {
                self.stats.errors += 1;
                self.stats.timeouts += 1;
                return Err(ModbusError::timeout("write frame", write_timeout.as_millis() as u64));
            }
        }

        let frame_len = self.out_buf.len();
        self.stats.requests_sent += 1;
        self.stats.bytes_sent += frame_len as u64;
        if self.config.packet_logging {
            log_packet("send", &self.out_buf);
        }
        self.last_request = Some(self.out_buf.clone());

        let pacing = self.config.pacing_for(frame_len);
        if !pacing.is_zero() {
            tokio::time::sleep(pacing).await;
        }

        Ok(())
    }

    async fn read_response(&mut self) -> ModbusResult<ModbusResponse> {
        match self.read_frame().await {
            Ok(response) => {
                self.stats.responses_received += 1;
                Ok(response)
            }
            Err(error) => {
                self.stats.record_failure(&error);
                debug!("Read failed, draining input: {}", error);
                self.drain(DRAIN_IDLE).await;
                Err(error)
            }
        }
    }

    async fn close(&mut self) -> ModbusResult<()> {
        let mut stream = self.stream.take()
            .ok_or_else(|| ModbusError::connection("transport already closed"))?;
        stream.shutdown().await
            .map_err(|e| ModbusError::io(format!("Failed to close stream: {}", e)))
    }

    fn is_open(&self) -> bool {
        self.stream.is_some()
    }

    fn stats(&self) -> TransportStats {
        self.stats.clone()
    }

    fn last_request(&self) -> Option<&[u8]> {
        self.last_request.as_deref()
    }
}
