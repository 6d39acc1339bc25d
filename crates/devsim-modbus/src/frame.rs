//! Modbus TCP framing (MBAP header + PDU)

use crate::error::{ExceptionCode, ModbusError};

/// MBAP header plus function code
pub const HEADER_LEN: usize = 8;

/// Smallest legal value of the length field (unit id + function code)
pub const MIN_LENGTH: u16 = 2;

/// Largest legal value of the length field
pub const MAX_LENGTH: u16 = 254;

/// One Modbus TCP frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModbusTcpFrame {
    /// Echoed back in the response
    pub transaction_id: u16,
    /// Always 0 for Modbus
    pub protocol_id: u16,
    /// Unit identifier
    pub unit_id: u8,
    /// Function code
    pub function_code: u8,
    /// PDU data after the function code
    pub data: Vec<u8>,
}

impl ModbusTcpFrame {
    /// Take the next complete frame from the front of `buffer`
    ///
    /// Returns `Ok(None)` and consumes nothing while the frame is incomplete.
    pub fn decode(buffer: &mut Vec<u8>) -> Result<Option<Self>, ModbusError> {
        if buffer.len() < HEADER_LEN {
            return Ok(None);
        }
        let transaction_id = u16::from_be_bytes([buffer[0], buffer[1]]);
        let protocol_id = u16::from_be_bytes([buffer[2], buffer[3]]);
        let length = u16::from_be_bytes([buffer[4], buffer[5]]);
        if protocol_id != 0 || !(MIN_LENGTH..=MAX_LENGTH).contains(&length) {
            return Err(ModbusError::InvalidHeader {
                protocol_id,
                length,
            });
        }

        let total = HEADER_LEN + usize::from(length) - usize::from(MIN_LENGTH);
        if buffer.len() < total {
            return Ok(None);
        }
        let frame = Self {
            transaction_id,
            protocol_id,
            unit_id: buffer[6],
            function_code: buffer[7],
            data: buffer[HEADER_LEN..total].to_vec(),
        };
        buffer.drain(..total);
        Ok(Some(frame))
    }

    /// Wire representation
    pub fn encode(&self) -> Vec<u8> {
        let length = (self.data.len() + usize::from(MIN_LENGTH)) as u16;
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len());
        bytes.extend_from_slice(&self.transaction_id.to_be_bytes());
        bytes.extend_from_slice(&self.protocol_id.to_be_bytes());
        bytes.extend_from_slice(&length.to_be_bytes());
        bytes.push(self.unit_id);
        bytes.push(self.function_code);
        bytes.extend_from_slice(&self.data);
        bytes
    }

    /// Response with the same header and new data
    pub fn response(&self, data: Vec<u8>) -> Self {
        Self {
            data,
            ..self.clone()
        }
    }

    /// Exception response: function code with the high bit set plus the code
    pub fn exception(&self, code: ExceptionCode) -> Self {
        Self {
            function_code: self.function_code | 0x80,
            data: vec![code.code()],
            ..self.clone()
        }
    }

    /// Exception code if this is an exception response
    pub fn exception_code(&self) -> Option<ExceptionCode> {
        if self.function_code & 0x80 == 0 {
            return None;
        }
        self.data.first().copied().and_then(ExceptionCode::from_code)
    }
}
