/// Modbus protocol definitions and message handling
///
/// This module contains the function code table shared by the frame classifier
/// and the response factory, and the request/response messages the transport
/// serializes. Messages are written either headless (RTU framing: unit id,
/// function code, payload) or with the MBAP-style header used by socket-native
/// Modbus/TCP.

use serde::{Deserialize, Serialize};
use std::fmt;
use crate::error::{ModbusError, ModbusResult};
use crate::frame::FrameRule;

/// Modbus address type (0-65535)
pub type ModbusAddress = u16;

/// Modbus slave/unit identifier (1-247)
pub type SlaveId = u8;

/// MBAP header size (transaction id + protocol id + length)
pub const MBAP_HEADER_SIZE: usize = 6;

/// Modbus function codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ModbusFunction {
    /// Read Coils (0x01)
    ReadCoils = 0x01,
    /// Read Discrete Inputs (0x02)
    ReadDiscreteInputs = 0x02,
    /// Read Holding Registers (0x03)
    ReadHoldingRegisters = 0x03,
    /// Read Input Registers (0x04)
    ReadInputRegisters = 0x04,
    /// Write Single Coil (0x05)
    WriteSingleCoil = 0x05,
    /// Write Single Register (0x06)
    WriteSingleRegister = 0x06,
    /// Read Exception Status (0x07, serial line only)
    ReadExceptionStatus = 0x07,
    /// Diagnostics (0x08, serial line only)
    Diagnostics = 0x08,
    /// Get Comm Event Counter (0x0B)
    GetCommEventCounter = 0x0B,
    /// Get Comm Event Log (0x0C)
    GetCommEventLog = 0x0C,
    /// Write Multiple Coils (0x0F)
    WriteMultipleCoils = 0x0F,
    /// Write Multiple Registers (0x10)
    WriteMultipleRegisters = 0x10,
    /// Report Server ID (0x11)
    ReportServerId = 0x11,
    /// Read File Record (0x14)
    ReadFileRecord = 0x14,
    /// Write File Record (0x15)
    WriteFileRecord = 0x15,
    /// Mask Write Register (0x16)
    MaskWriteRegister = 0x16,
    /// Read/Write Multiple Registers (0x17)
    ReadWriteMultipleRegisters = 0x17,
    /// Read FIFO Queue (0x18)
    ReadFifoQueue = 0x18,
}

impl ModbusFunction {
    /// Convert from u8 to ModbusFunction
    pub fn from_u8(value: u8) -> ModbusResult<Self> {
        match value {
            0x01 => Ok(ModbusFunction::ReadCoils),
            0x02 => Ok(ModbusFunction::ReadDiscreteInputs),
            0x03 => Ok(ModbusFunction::ReadHoldingRegisters),
            0x04 => Ok(ModbusFunction::ReadInputRegisters),
            0x05 => Ok(ModbusFunction::WriteSingleCoil),
            0x06 => Ok(ModbusFunction::WriteSingleRegister),
            0x07 => Ok(ModbusFunction::ReadExceptionStatus),
            0x08 => Ok(ModbusFunction::Diagnostics),
            0x0B => Ok(ModbusFunction::GetCommEventCounter),
            0x0C => Ok(ModbusFunction::GetCommEventLog),
            0x0F => Ok(ModbusFunction::WriteMultipleCoils),
            0x10 => Ok(ModbusFunction::WriteMultipleRegisters),
            0x11 => Ok(ModbusFunction::ReportServerId),
            0x14 => Ok(ModbusFunction::ReadFileRecord),
            0x15 => Ok(ModbusFunction::WriteFileRecord),
            0x16 => Ok(ModbusFunction::MaskWriteRegister),
            0x17 => Ok(ModbusFunction::ReadWriteMultipleRegisters),
            0x18 => Ok(ModbusFunction::ReadFifoQueue),
            _ => Err(ModbusError::invalid_function(value)),
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// How the length of this function's RTU reply is determined.
    ///
    /// This is the one table both the frame classifier and the response
    /// factory read.
    pub fn response_rule(self) -> FrameRule {
        match self {
            ModbusFunction::ReadCoils |
            ModbusFunction::ReadDiscreteInputs |
            ModbusFunction::ReadHoldingRegisters |
            ModbusFunction::ReadInputRegisters |
            ModbusFunction::GetCommEventLog |
            ModbusFunction::ReportServerId |
            ModbusFunction::ReadFileRecord |
            ModbusFunction::WriteFileRecord |
            ModbusFunction::ReadWriteMultipleRegisters => FrameRule::ByteCount,

            ModbusFunction::WriteSingleCoil |
            ModbusFunction::WriteSingleRegister |
            ModbusFunction::GetCommEventCounter |
            ModbusFunction::WriteMultipleCoils |
            ModbusFunction::WriteMultipleRegisters |
            ModbusFunction::MaskWriteRegister => FrameRule::Fixed(8),

            ModbusFunction::ReadExceptionStatus |
            ModbusFunction::Diagnostics => FrameRule::Fixed(3),

            ModbusFunction::ReadFifoQueue => FrameRule::WordCount,
        }
    }

    /// Check if this is a read function
    pub fn is_read_function(self) -> bool {
        matches!(self,
            ModbusFunction::ReadCoils |
            ModbusFunction::ReadDiscreteInputs |
            ModbusFunction::ReadHoldingRegisters |
            ModbusFunction::ReadInputRegisters
        )
    }
}

impl fmt::Display for ModbusFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModbusFunction::ReadCoils => "Read Coils",
            ModbusFunction::ReadDiscreteInputs => "Read Discrete Inputs",
            ModbusFunction::ReadHoldingRegisters => "Read Holding Registers",
            ModbusFunction::ReadInputRegisters => "Read Input Registers",
            ModbusFunction::WriteSingleCoil => "Write Single Coil",
            ModbusFunction::WriteSingleRegister => "Write Single Register",
            ModbusFunction::ReadExceptionStatus => "Read Exception Status",
            ModbusFunction::Diagnostics => "Diagnostics",
            ModbusFunction::GetCommEventCounter => "Get Comm Event Counter",
            ModbusFunction::GetCommEventLog => "Get Comm Event Log",
            ModbusFunction::WriteMultipleCoils => "Write Multiple Coils",
            ModbusFunction::WriteMultipleRegisters => "Write Multiple Registers",
            ModbusFunction::ReportServerId => "Report Server ID",
            ModbusFunction::ReadFileRecord => "Read File Record",
            ModbusFunction::WriteFileRecord => "Write File Record",
            ModbusFunction::MaskWriteRegister => "Mask Write Register",
            ModbusFunction::ReadWriteMultipleRegisters => "Read/Write Multiple Registers",
            ModbusFunction::ReadFifoQueue => "Read FIFO Queue",
        };
        write!(f, "{} (0x{:02X})", name, *self as u8)
    }
}

/// Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ModbusException {
    IllegalFunction = 0x01,
    IllegalDataAddress = 0x02,
    IllegalDataValue = 0x03,
    ServerDeviceFailure = 0x04,
    Acknowledge = 0x05,
    ServerDeviceBusy = 0x06,
    MemoryParityError = 0x08,
    GatewayPathUnavailable = 0x0A,
    GatewayTargetDeviceFailedToRespond = 0x0B,
}

impl ModbusException {
    /// Convert from u8 to ModbusException
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(ModbusException::IllegalFunction),
            0x02 => Some(ModbusException::IllegalDataAddress),
            0x03 => Some(ModbusException::IllegalDataValue),
            0x04 => Some(ModbusException::ServerDeviceFailure),
            0x05 => Some(ModbusException::Acknowledge),
            0x06 => Some(ModbusException::ServerDeviceBusy),
            0x08 => Some(ModbusException::MemoryParityError),
            0x0A => Some(ModbusException::GatewayPathUnavailable),
            0x0B => Some(ModbusException::GatewayTargetDeviceFailedToRespond),
            _ => None,
        }
    }

    /// Convert to u8
    pub fn to_u8(self) -> u8 {
        self as u8
    }

    /// Human-readable name of the exception code
    pub fn name(self) -> &'static str {
        match self {
            ModbusException::IllegalFunction => "Illegal Function",
            ModbusException::IllegalDataAddress => "Illegal Data Address",
            ModbusException::IllegalDataValue => "Illegal Data Value",
            ModbusException::ServerDeviceFailure => "Slave Device Failure",
            ModbusException::Acknowledge => "Acknowledge",
            ModbusException::ServerDeviceBusy => "Slave Device Busy",
            ModbusException::MemoryParityError => "Memory Parity Error",
            ModbusException::GatewayPathUnavailable => "Gateway Path Unavailable",
            ModbusException::GatewayTargetDeviceFailedToRespond => "Gateway Target Device Failed to Respond",
        }
    }
}

impl fmt::Display for ModbusException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.name(), *self as u8)
    }
}

/// Common surface of everything the transport serializes.
///
/// The transport only looks at the function code and the headless flag; the
/// transaction engine owns the transaction id.
pub trait ModbusMessage {
    /// Function code on the wire
    fn function_code(&self) -> u8;

    /// Transaction id of the attempt that carries this message
    fn transaction_id(&self) -> u16;

    /// Assign the transaction id
    fn set_transaction_id(&mut self, id: u16);

    /// Switch to headless mode: no header beyond what RTU framing requires
    fn set_headless(&mut self);

    /// Whether the message is written without the MBAP-style header
    fn is_headless(&self) -> bool;

    /// Append the serialized message (without CRC) to `out`
    fn write_to(&self, out: &mut Vec<u8>);
}

/// Write the MBAP-style header used in headed mode.
fn write_mbap_header(out: &mut Vec<u8>, transaction_id: u16, pdu_len: usize) {
    out.extend_from_slice(&transaction_id.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes()); // Always 0 for Modbus
    out.extend_from_slice(&((pdu_len + 1) as u16).to_be_bytes()); // unit id + PDU
}

/// Modbus request structure
///
/// `data` is the payload following the function code, already in wire order.
#[derive(Debug, Clone, PartialEq)]
pub struct ModbusRequest {
    pub transaction_id: u16,
    pub slave_id: SlaveId,
    pub function: ModbusFunction,
    pub data: Vec<u8>,
    headless: bool,
}

impl ModbusRequest {
    /// Create a request from a raw payload
    pub fn new(slave_id: SlaveId, function: ModbusFunction, data: Vec<u8>) -> Self {
        Self {
            transaction_id: 0,
            slave_id,
            function,
            data,
            headless: false,
        }
    }

    /// Create a new read request (0x01-0x04)
    pub fn new_read(
        slave_id: SlaveId,
        function: ModbusFunction,
        address: ModbusAddress,
        quantity: u16,
    ) -> Self {
        let mut data = Vec::with_capacity(4);
        data.extend_from_slice(&address.to_be_bytes());
        data.extend_from_slice(&quantity.to_be_bytes());
        Self::new(slave_id, function, data)
    }

    /// Create a write single coil request (0x05)
    pub fn new_write_single_coil(slave_id: SlaveId, address: ModbusAddress, value: bool) -> Self {
        let value: u16 = if value { 0xFF00 } else { 0x0000 };
        let mut data = Vec::with_capacity(4);
        data.extend_from_slice(&address.to_be_bytes());
        data.extend_from_slice(&value.to_be_bytes());
        Self::new(slave_id, ModbusFunction::WriteSingleCoil, data)
    }

    /// Create a write single register request (0x06)
    pub fn new_write_single_register(slave_id: SlaveId, address: ModbusAddress, value: u16) -> Self {
        let mut data = Vec::with_capacity(4);
        data.extend_from_slice(&address.to_be_bytes());
        data.extend_from_slice(&value.to_be_bytes());
        Self::new(slave_id, ModbusFunction::WriteSingleRegister, data)
    }

    /// Create a write multiple coils request (0x0F)
    pub fn new_write_multiple_coils(slave_id: SlaveId, address: ModbusAddress, values: &[bool]) -> Self {
        let packed = data_utils::pack_bits(values);
        let mut data = Vec::with_capacity(5 + packed.len());
        data.extend_from_slice(&address.to_be_bytes());
        data.extend_from_slice(&(values.len() as u16).to_be_bytes());
        data.push(packed.len() as u8);
        data.extend_from_slice(&packed);
        Self::new(slave_id, ModbusFunction::WriteMultipleCoils, data)
    }

    /// Create a write multiple registers request (0x10)
    pub fn new_write_multiple_registers(slave_id: SlaveId, address: ModbusAddress, values: &[u16]) -> Self {
        let bytes = data_utils::registers_to_bytes(values);
        let mut data = Vec::with_capacity(5 + bytes.len());
        data.extend_from_slice(&address.to_be_bytes());
        data.extend_from_slice(&(values.len() as u16).to_be_bytes());
        data.push(bytes.len() as u8);
        data.extend_from_slice(&bytes);
        Self::new(slave_id, ModbusFunction::WriteMultipleRegisters, data)
    }

    /// Starting address of address/quantity style requests
    pub fn address(&self) -> Option<ModbusAddress> {
        (self.data.len() >= 2).then(|| u16::from_be_bytes([self.data[0], self.data[1]]))
    }

    /// Quantity of read and multiple-write requests
    pub fn quantity(&self) -> Option<u16> {
        let has_quantity = self.function.is_read_function() || matches!(
            self.function,
            ModbusFunction::WriteMultipleCoils | ModbusFunction::WriteMultipleRegisters
        );
        (has_quantity && self.data.len() >= 4).then(|| u16::from_be_bytes([self.data[2], self.data[3]]))
    }

    /// Validate the request
    pub fn validate(&self) -> ModbusResult<()> {
        // Validate slave ID; broadcasts get no reply, so 0 is rejected as well
        if self.slave_id == 0 || self.slave_id > 247 {
            return Err(ModbusError::invalid_data(
                format!("Invalid slave ID: {}", self.slave_id)
            ));
        }

        if self.data.len() > crate::MAX_RTU_FRAME_SIZE - 4 {
            return Err(ModbusError::invalid_data(
                format!("Request payload too large: {} bytes", self.data.len())
            ));
        }

        // Validate quantity for read operations
        if self.function.is_read_function() {
            let quantity = self.quantity().ok_or_else(|| {
                ModbusError::invalid_data("Read request needs address and quantity")
            })?;
            if quantity == 0 {
                return Err(ModbusError::invalid_data("Quantity cannot be zero"));
            }

            match self.function {
                ModbusFunction::ReadCoils | ModbusFunction::ReadDiscreteInputs => {
                    if quantity > crate::MAX_COILS_PER_REQUEST {
                        return Err(ModbusError::invalid_data(
                            format!("Too many coils requested: {}", quantity)
                        ));
                    }
                },
                ModbusFunction::ReadHoldingRegisters | ModbusFunction::ReadInputRegisters => {
                    if quantity > crate::MAX_REGISTERS_PER_REQUEST {
                        return Err(ModbusError::invalid_data(
                            format!("Too many registers requested: {}", quantity)
                        ));
                    }
                },
                _ => {}
            }
        }

        Ok(())
    }
}

impl ModbusMessage for ModbusRequest {
    fn function_code(&self) -> u8 {
        self.function.to_u8()
    }

    fn transaction_id(&self) -> u16 {
        self.transaction_id
    }

    fn set_transaction_id(&mut self, id: u16) {
        self.transaction_id = id;
    }

    fn set_headless(&mut self) {
        self.headless = true;
    }

    fn is_headless(&self) -> bool {
        self.headless
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        if !self.headless {
            write_mbap_header(out, self.transaction_id, 1 + self.data.len());
        }
        out.push(self.slave_id);
        out.push(self.function.to_u8());
        out.extend_from_slice(&self.data);
    }
}

/// Modbus response
///
/// The variant is chosen by the function code of the received frame, through
/// the same table that decides the frame's length.
#[derive(Debug, Clone, PartialEq)]
pub enum ModbusResponse {
    /// Regular reply; `data` is the payload after the function code
    Normal {
        transaction_id: u16,
        slave_id: SlaveId,
        function: ModbusFunction,
        data: Vec<u8>,
        headless: bool,
    },
    /// Exception reply; `function` is the rejected function code (high bit cleared)
    Exception {
        transaction_id: u16,
        slave_id: SlaveId,
        function: u8,
        code: u8,
        headless: bool,
    },
}

impl ModbusResponse {
    /// Create a successful response
    pub fn new_success(slave_id: SlaveId, function: ModbusFunction, data: Vec<u8>) -> Self {
        ModbusResponse::Normal {
            transaction_id: 0,
            slave_id,
            function,
            data,
            headless: true,
        }
    }

    /// Create an exception response
    pub fn new_exception(slave_id: SlaveId, function: u8, code: u8) -> Self {
        ModbusResponse::Exception {
            transaction_id: 0,
            slave_id,
            function: function & 0x7F,
            code,
            headless: true,
        }
    }

    /// Deserialize a response from a frame without its CRC.
    ///
    /// Headless frames start at the unit id; headed frames start with the
    /// MBAP-style header whose transaction id is taken over.
    pub fn decode(frame: &[u8], headless: bool) -> ModbusResult<Self> {
        let (transaction_id, body) = if headless {
            (0, frame)
        } else {
            if frame.len() < MBAP_HEADER_SIZE {
                return Err(ModbusError::malformed_frame(0, "frame shorter than MBAP header"));
            }
            let transaction_id = u16::from_be_bytes([frame[0], frame[1]]);
            let length = u16::from_be_bytes([frame[4], frame[5]]) as usize;
            let body = &frame[MBAP_HEADER_SIZE..];
            if body.len() < length {
                return Err(ModbusError::malformed_frame(0, "incomplete frame"));
            }
            (transaction_id, &body[..length])
        };

        if body.len() < 2 {
            return Err(ModbusError::malformed_frame(0, "frame too short"));
        }
        let slave_id = body[0];
        let function_code = body[1];

        let mut response = match FrameRule::for_function_code(function_code) {
            FrameRule::Exception => {
                let code = *body.get(2).ok_or_else(|| {
                    ModbusError::malformed_frame(function_code, "exception response without code")
                })?;
                ModbusResponse::new_exception(slave_id, function_code, code)
            }
            FrameRule::Unsupported => {
                return Err(ModbusError::malformed_frame(function_code, "unsupported function code"));
            }
            FrameRule::Fixed(_) | FrameRule::ByteCount | FrameRule::WordCount => {
                let function = ModbusFunction::from_u8(function_code)?;
                ModbusResponse::new_success(slave_id, function, body[2..].to_vec())
            }
        };

        response.set_transaction_id(transaction_id);
        if !headless {
            response.set_headed();
        }
        Ok(response)
    }

    fn set_headed(&mut self) {
        match self {
            ModbusResponse::Normal { headless, .. } | ModbusResponse::Exception { headless, .. } => {
                *headless = false
            }
        }
    }

    /// Unit id of the replying slave
    pub fn slave_id(&self) -> SlaveId {
        match self {
            ModbusResponse::Normal { slave_id, .. } | ModbusResponse::Exception { slave_id, .. } => *slave_id,
        }
    }

    /// Check if this is an exception response
    pub fn is_exception(&self) -> bool {
        matches!(self, ModbusResponse::Exception { .. })
    }

    /// Exception code reported by the slave, if any
    pub fn exception_code(&self) -> Option<u8> {
        match self {
            ModbusResponse::Exception { code, .. } => Some(*code),
            ModbusResponse::Normal { .. } => None,
        }
    }

    /// Get exception error if present
    pub fn get_exception(&self) -> Option<ModbusError> {
        match self {
            ModbusResponse::Exception { function, code, .. } => {
                Some(ModbusError::slave_exception(*function, *code))
            }
            ModbusResponse::Normal { .. } => None,
        }
    }

    /// Payload after the function code (empty for exceptions)
    pub fn data(&self) -> &[u8] {
        match self {
            ModbusResponse::Normal { data, .. } => data,
            ModbusResponse::Exception { .. } => &[],
        }
    }

    /// Parse response data as registers (u16 values)
    pub fn parse_registers(&self) -> ModbusResult<Vec<u16>> {
        if let Some(error) = self.get_exception() {
            return Err(error);
        }
        let data = self.data();

        if data.is_empty() {
            return Err(ModbusError::invalid_data("Empty response data"));
        }

        let byte_count = data[0] as usize;
        if data.len() < 1 + byte_count {
            return Err(ModbusError::invalid_data("Incomplete register data"));
        }

        if byte_count % 2 != 0 {
            return Err(ModbusError::invalid_data("Invalid register data length"));
        }

        data_utils::bytes_to_registers(&data[1..1 + byte_count])
    }

    /// Parse response data as bits (bool values, LSB first)
    pub fn parse_bits(&self) -> ModbusResult<Vec<bool>> {
        if let Some(error) = self.get_exception() {
            return Err(error);
        }
        let data = self.data();

        if data.is_empty() {
            return Err(ModbusError::invalid_data("Empty response data"));
        }

        let byte_count = data[0] as usize;
        if data.len() < 1 + byte_count {
            return Err(ModbusError::invalid_data("Incomplete bit data"));
        }

        Ok(data_utils::unpack_bits(&data[1..1 + byte_count], byte_count * 8))
    }
}

impl ModbusMessage for ModbusResponse {
    fn function_code(&self) -> u8 {
        match self {
            ModbusResponse::Normal { function, .. } => function.to_u8(),
            ModbusResponse::Exception { function, .. } => function | 0x80,
        }
    }

    fn transaction_id(&self) -> u16 {
        match self {
            ModbusResponse::Normal { transaction_id, .. } |
            ModbusResponse::Exception { transaction_id, .. } => *transaction_id,
        }
    }

    fn set_transaction_id(&mut self, id: u16) {
        match self {
            ModbusResponse::Normal { transaction_id, .. } |
            ModbusResponse::Exception { transaction_id, .. } => *transaction_id = id,
        }
    }

    fn set_headless(&mut self) {
        match self {
            ModbusResponse::Normal { headless, .. } | ModbusResponse::Exception { headless, .. } => {
                *headless = true
            }
        }
    }

    fn is_headless(&self) -> bool {
        match self {
            ModbusResponse::Normal { headless, .. } | ModbusResponse::Exception { headless, .. } => *headless,
        }
    }

    fn write_to(&self, out: &mut Vec<u8>) {
        let payload: &[u8] = match self {
            ModbusResponse::Normal { data, .. } => data,
            ModbusResponse::Exception { code, .. } => std::slice::from_ref(code),
        };
        if !self.is_headless() {
            write_mbap_header(out, self.transaction_id(), 1 + payload.len());
        }
        out.push(self.slave_id());
        out.push(self.function_code());
        out.extend_from_slice(payload);
    }
}

/// Data conversion utilities
pub mod data_utils {
    use super::*;

    /// Convert register values to bytes (big-endian)
    pub fn registers_to_bytes(registers: &[u16]) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(registers.len() * 2);
        for &register in registers {
            bytes.extend_from_slice(&register.to_be_bytes());
        }
        bytes
    }

    /// Convert bytes to register values (big-endian)
    pub fn bytes_to_registers(bytes: &[u8]) -> ModbusResult<Vec<u16>> {
        if bytes.len() % 2 != 0 {
            return Err(ModbusError::invalid_data("Byte array length must be even"));
        }

        Ok(bytes
            .chunks(2)
            .map(|chunk| u16::from_be_bytes([chunk[0], chunk[1]]))
            .collect())
    }

    /// Pack boolean values into bytes
    pub fn pack_bits(bits: &[bool]) -> Vec<u8> {
        let byte_count = (bits.len() + 7) / 8;
        let mut bytes = vec![0u8; byte_count];

        for (i, &bit) in bits.iter().enumerate() {
            if bit {
                bytes[i / 8] |= 1 << (i % 8);
            }
        }

        bytes
    }

    /// Unpack bytes into boolean values
    pub fn unpack_bits(bytes: &[u8], bit_count: usize) -> Vec<bool> {
        (0..bit_count)
            .map(|i| bytes.get(i / 8).map_or(false, |byte| byte & (1 << (i % 8)) != 0))
            .collect()
    }
}
