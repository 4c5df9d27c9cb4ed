//! Raw Modbus TCP ADU encoding and decoding
//!
//! Frame layout:
//!
//! ```text
//! | transaction id | protocol id | length | unit id | function code | data ... |
//! |     u16 BE     |  u16 BE (0) | u16 BE |   u8    |      u8       |          |
//! ```
//!
//! `length` counts the unit id and the PDU, not the six bytes before it.

use bytes::{BufMut, Bytes, BytesMut};

use super::tables;

pub const MBAP_HEADER_LEN: usize = 7;
pub const PROTOCOL_ID: u16 = 0;
/// Header plus function code plus at least one byte of payload
pub const MIN_RESPONSE_LEN: usize = 9;
pub const EXCEPTION_FLAG: u8 = 0x80;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("Truncated frame: {0} bytes, need at least 9")]
    Truncated(usize),
    #[error("Transaction id mismatch: sent {expected}, received {received}")]
    TransactionMismatch { expected: u16, received: u16 },
    #[error("Unexpected function code {received:#04x} in response to {expected:#04x}")]
    UnexpectedFunction { expected: u8, received: u8 },
    #[error("Unexpected sub-function {received:#06x} in response to {expected:#06x}")]
    UnexpectedSubFunction { expected: u16, received: u16 },
    #[error("Short payload for function {function_code:#04x}: {len} bytes")]
    ShortPayload { function_code: u8, len: usize },
}

/// Build a read-style ADU: function code, starting address, quantity
pub fn encode(
    transaction_id: u16,
    unit_id: u8,
    function_code: u8,
    starting_address: u16,
    quantity: u16,
) -> Bytes {
    let mut pdu = BytesMut::with_capacity(5);
    pdu.put_u8(function_code);
    pdu.put_u16(starting_address);
    pdu.put_u16(quantity);
    encode_pdu(transaction_id, unit_id, &pdu)
}

/// Wrap an arbitrary PDU in an MBAP header
pub fn encode_pdu(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Bytes {
    let mut adu = BytesMut::with_capacity(MBAP_HEADER_LEN + pdu.len());
    adu.put_u16(transaction_id);
    adu.put_u16(PROTOCOL_ID);
    adu.put_u16((pdu.len() + 1) as u16);
    adu.put_u8(unit_id);
    adu.put_slice(pdu);
    adu.freeze()
}

/// Device-reported Modbus exception
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExceptionResponse {
    /// Echoed function code with the high bit set
    pub function_code: u8,
    pub exception_code: u8,
}

impl ExceptionResponse {
    pub fn description(&self) -> Option<&'static str> {
        tables::exception_description(self.exception_code)
    }

    pub fn is_illegal_function(&self) -> bool {
        self.exception_code == tables::ILLEGAL_FUNCTION
    }
}

impl std::fmt::Display for ExceptionResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.description() {
            Some(text) => write!(f, "{} (code {})", text, self.exception_code),
            None => write!(f, "unknown exception (code {})", self.exception_code),
        }
    }
}

/// A decoded response frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedResponse {
    pub transaction_id: u16,
    pub protocol_id: u16,
    pub length: u16,
    pub unit_id: u8,
    /// Raw echoed function code, exception bit included
    pub function_code: u8,
    /// PDU bytes after the function code
    pub data: Bytes,
}

impl ParsedResponse {
    pub fn exception(&self) -> Option<ExceptionResponse> {
        if self.function_code & EXCEPTION_FLAG == 0 {
            return None;
        }
        Some(ExceptionResponse {
            function_code: self.function_code,
            exception_code: self.data[0],
        })
    }

    pub fn check_transaction(&self, expected: u16) -> Result<(), FrameError> {
        if self.transaction_id == expected {
            Ok(())
        } else {
            Err(FrameError::TransactionMismatch {
                expected,
                received: self.transaction_id,
            })
        }
    }

    /// Payload of a normal response to `function_code`
    pub fn payload_for(&self, function_code: u8) -> Result<&[u8], FrameError> {
        if self.function_code != function_code {
            return Err(FrameError::UnexpectedFunction {
                expected: function_code,
                received: self.function_code,
            });
        }
        Ok(&self.data)
    }
}

/// Decode a response frame
///
/// Byte 7 is the echoed function code. When its high bit is set byte 8 holds
/// the exception code.
pub fn decode(raw: &[u8]) -> Result<ParsedResponse, FrameError> {
    if raw.len() < MIN_RESPONSE_LEN {
        return Err(FrameError::Truncated(raw.len()));
    }

    Ok(ParsedResponse {
        transaction_id: u16::from_be_bytes([raw[0], raw[1]]),
        protocol_id: u16::from_be_bytes([raw[2], raw[3]]),
        length: u16::from_be_bytes([raw[4], raw[5]]),
        unit_id: raw[6],
        function_code: raw[7],
        data: Bytes::copy_from_slice(&raw[8..]),
    })
}

/// Total frame size announced by the MBAP header, once six bytes are known
pub fn expected_frame_len(header: &[u8]) -> Option<usize> {
    if header.len() < 6 {
        return None;
    }
    Some(6 + usize::from(u16::from_be_bytes([header[4], header[5]])))
}
