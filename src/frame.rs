//! RTU frame codec: CRC16 and reply length classification.
//!
//! RTU frames carry no delimiter. Over a tunnelled byte stream the inter-character
//! silence a serial line would use is gone, so the number of bytes belonging to a
//! reply is derived from its function code and, for variable-length replies, from
//! the length field that follows it:
//!
//! ```text
//! [unit-id:1][function-code:1][payload:N][crc-lo:1][crc-hi:1]
//! ```

use std::io::Read;

use crc::{Crc, CRC_16_MODBUS};

use crate::error::{ModbusError, ModbusResult};
use crate::protocol::ModbusFunction;

/// CRC calculator for RTU (reflected 0xA001, seed 0xFFFF)
const CRC_MODBUS: Crc<u16> = Crc::<u16>::new(&CRC_16_MODBUS);

/// Unit id and function code
pub const HEADER_SIZE: usize = 2;

/// Trailing checksum
pub const CRC_SIZE: usize = 2;

/// Total length of an exception reply: unit + fc + exception code + crc
pub const EXCEPTION_FRAME_LENGTH: usize = 5;

/// Compute the Modbus CRC16 of `data` as a word.
pub fn checksum(data: &[u8]) -> u16 {
    CRC_MODBUS.checksum(data)
}

/// Compute the Modbus CRC16 of `data` as `[low, high]`, the order in which the
/// two bytes are transmitted.
pub fn crc16(data: &[u8]) -> [u8; 2] {
    checksum(data).to_le_bytes()
}

/// Append the CRC of everything currently in `frame`.
pub fn append_crc(frame: &mut Vec<u8>) {
    let crc = crc16(frame);
    frame.extend_from_slice(&crc);
}

/// Check the trailing CRC of a complete frame.
///
/// Returns `(computed, received)` on mismatch.
pub fn verify_crc(frame: &[u8]) -> Result<(), (u16, u16)> {
    if frame.len() < CRC_SIZE {
        return Err((checksum(&[]), 0));
    }
    let split = frame.len() - CRC_SIZE;
    let computed = checksum(&frame[..split]);
    let received = u16::from_le_bytes([frame[split], frame[split + 1]]);
    if computed == received {
        Ok(())
    } else {
        Err((computed, received))
    }
}

/// How the length of a reply is determined from its function code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameRule {
    /// The whole frame has this many bytes
    Fixed(usize),
    /// One byte count N follows the function code; total = N + 5
    ByteCount,
    /// A big-endian byte count word N follows the function code; total = N + 6
    WordCount,
    /// Exception reply (function code with the high bit set)
    Exception,
    /// Function code not in the table
    Unsupported,
}

impl FrameRule {
    /// Look up the rule for a received function code.
    pub fn for_function_code(function_code: u8) -> Self {
        if function_code & 0x80 != 0 {
            return FrameRule::Exception;
        }
        match ModbusFunction::from_u8(function_code) {
            Ok(function) => function.response_rule(),
            Err(_) => FrameRule::Unsupported,
        }
    }

    /// Number of header bytes after the function code that have to be read
    /// before the total length is known.
    pub fn length_field_size(self) -> usize {
        match self {
            FrameRule::ByteCount => 1,
            FrameRule::WordCount => 2,
            FrameRule::Fixed(_) | FrameRule::Exception | FrameRule::Unsupported => 0,
        }
    }
}

/// Result of classifying a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLength {
    /// Total frame length including unit id, function code and CRC; 0 for an
    /// unsupported function code
    pub total: usize,
    /// Length bytes consumed from `peek` to determine `total`
    pub header_bytes_consumed: usize,
}

impl FrameLength {
    /// Whether the function code was unknown.
    pub fn is_unsupported(&self) -> bool {
        self.total == 0
    }

    /// Bytes already read once the header and length field are consumed.
    pub fn consumed(&self) -> usize {
        HEADER_SIZE + self.header_bytes_consumed
    }

    /// Bytes still to be read to complete the frame.
    pub fn remaining(&self) -> usize {
        self.total.saturating_sub(self.consumed())
    }
}

/// Classify a reply by its function code.
///
/// `peek` supplies the header bytes that follow the function code; exactly
/// [`FrameRule::length_field_size`] bytes are taken from it. A peek that runs
/// dry is an I/O failure.
///
/// ```rust
/// use modbus_rtu_tunnel::frame::classify;
///
/// let length = classify(0x03, &mut &[0x04][..]).unwrap();
/// assert_eq!((length.total, length.header_bytes_consumed), (9, 1));
/// ```
pub fn classify<R: Read + ?Sized>(function_code: u8, peek: &mut R) -> ModbusResult<FrameLength> {
    let length = match FrameRule::for_function_code(function_code) {
        FrameRule::ByteCount => {
            let mut count = [0u8; 1];
            peek.read_exact(&mut count)?;
            FrameLength { total: count[0] as usize + 5, header_bytes_consumed: 1 }
        }
        FrameRule::WordCount => {
            let mut count = [0u8; 2];
            peek.read_exact(&mut count)?;
            FrameLength { total: u16::from_be_bytes(count) as usize + 6, header_bytes_consumed: 2 }
        }
        FrameRule::Fixed(total) => FrameLength { total, header_bytes_consumed: 0 },
        FrameRule::Exception => FrameLength { total: EXCEPTION_FRAME_LENGTH, header_bytes_consumed: 0 },
        FrameRule::Unsupported => FrameLength { total: 0, header_bytes_consumed: 0 },
    };
    Ok(length)
}

/// Reject lengths no RTU frame can have.
pub(crate) fn check_length(function_code: u8, length: &FrameLength, max_frame_length: usize) -> ModbusResult<()> {
    if length.is_unsupported() {
        return Err(ModbusError::malformed_frame(function_code, "unsupported function code"));
    }
    if length.total > max_frame_length {
        return Err(ModbusError::malformed_frame(
            function_code,
            format!("frame length {} exceeds maximum {}", length.total, max_frame_length),
        ));
    }
    if length.total < HEADER_SIZE + 1 {
        return Err(ModbusError::malformed_frame(
            function_code,
            format!("frame length {} is too short", length.total),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc_reference_vectors() {
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), [0xC5, 0xCD]);
        assert_eq!(crc16(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x02]), [0xC4, 0x0B]);
        assert_eq!(checksum(&[0x01, 0x03, 0x00, 0x00, 0x00, 0x0A]), 0xCDC5);
        // empty input leaves the seed untouched
        assert_eq!(checksum(&[]), 0xFFFF);
    }

    #[test]
    fn test_crc_matches_shift_register() {
        fn reference(data: &[u8]) -> u16 {
            let mut crc: u16 = 0xFFFF;
            for &byte in data {
                crc ^= byte as u16;
                for _ in 0..8 {
                    if crc & 0x0001 != 0 {
                        crc = (crc >> 1) ^ 0xA001;
                    } else {
                        crc >>= 1;
                    }
                }
            }
            crc
        }

        let frames: [&[u8]; 4] = [
            &[0x11, 0x03, 0x00, 0x6B, 0x00, 0x03],
            &[0x01, 0x10, 0x00, 0x01, 0x00, 0x02, 0x04, 0x00, 0x0A, 0x01, 0x02],
            &[0xFF; 32],
            &[0x00],
        ];
        for frame in frames {
            assert_eq!(checksum(frame), reference(frame));
        }
    }

    #[test]
    fn test_verify_crc() {
        let mut frame = vec![0x01, 0x03, 0x02, 0x00, 0x2A];
        append_crc(&mut frame);
        assert!(verify_crc(&frame).is_ok());

        let last = frame.len() - 1;
        frame[last] ^= 0xFF;
        assert!(verify_crc(&frame).is_err());
    }

    #[test]
    fn test_classify_byte_count_codes() {
        for code in [0x01, 0x02, 0x03, 0x04, 0x0C, 0x11, 0x14, 0x15, 0x17] {
            let length = classify(code, &mut &[0x06][..]).unwrap();
            assert_eq!(length, FrameLength { total: 11, header_bytes_consumed: 1 }, "code {:02X}", code);
        }
    }

    #[test]
    fn test_classify_fixed_codes() {
        for code in [0x05, 0x06, 0x0B, 0x0F, 0x10, 0x16] {
            let length = classify(code, &mut &[][..]).unwrap();
            assert_eq!(length, FrameLength { total: 8, header_bytes_consumed: 0 }, "code {:02X}", code);
        }
        for code in [0x07, 0x08] {
            let length = classify(code, &mut &[][..]).unwrap();
            assert_eq!(length, FrameLength { total: 3, header_bytes_consumed: 0 }, "code {:02X}", code);
        }
    }

    #[test]
    fn test_classify_word_count() {
        let length = classify(0x18, &mut &[0x01, 0x02][..]).unwrap();
        assert_eq!(length, FrameLength { total: 0x0102 + 6, header_bytes_consumed: 2 });
        assert_eq!(length.consumed(), 4);
        assert_eq!(length.remaining(), 0x0102 + 2);
    }

    #[test]
    fn test_classify_exceptions() {
        for code in [0x81, 0x83, 0x90, 0xFF] {
            let length = classify(code, &mut &[][..]).unwrap();
            assert_eq!(length, FrameLength { total: 5, header_bytes_consumed: 0 });
        }
    }

    #[test]
    fn test_classify_unknown_code() {
        for code in [0x00, 0x09, 0x0A, 0x0D, 0x12, 0x19, 0x2B, 0x7F] {
            let length = classify(code, &mut &[0x10, 0x10][..]).unwrap();
            assert!(length.is_unsupported(), "code {:02X}", code);
            assert_eq!(length.header_bytes_consumed, 0);
        }
    }

    #[test]
    fn test_classify_short_peek() {
        assert!(matches!(classify(0x03, &mut &[][..]), Err(ModbusError::Io { .. })));
        assert!(matches!(classify(0x18, &mut &[0x00][..]), Err(ModbusError::Io { .. })));
    }

    #[test]
    fn test_check_length() {
        let unknown = FrameLength { total: 0, header_bytes_consumed: 0 };
        assert!(matches!(check_length(0x42, &unknown, 256), Err(ModbusError::MalformedFrame { .. })));

        let oversized = FrameLength { total: 0x1000, header_bytes_consumed: 2 };
        assert!(matches!(check_length(0x18, &oversized, 256), Err(ModbusError::MalformedFrame { .. })));

        let fixed = FrameLength { total: 3, header_bytes_consumed: 0 };
        assert!(check_length(0x07, &fixed, 256).is_ok());
    }
}
