//! Function code execution
//!
//! [`ModbusProtocol`] buffers the bytes of one connection and extracts frames;
//! [`execute`] runs one request frame against a [`ModbusLayout`]. Requests are
//! validated in a fixed order: function code, then payload and quantity, then
//! the address range in the bank.

use tracing::{debug, warn};

use crate::bank::{DataBank, ModbusLayout};
use crate::error::ExceptionCode;
use crate::frame::ModbusTcpFrame;

/// Read coils
pub const READ_COILS: u8 = 0x01;
/// Read discrete inputs
pub const READ_DISCRETE_INPUTS: u8 = 0x02;
/// Read holding registers
pub const READ_HOLDING_REGISTERS: u8 = 0x03;
/// Read input registers
pub const READ_INPUT_REGISTERS: u8 = 0x04;
/// Write single coil
pub const WRITE_SINGLE_COIL: u8 = 0x05;
/// Write single register
pub const WRITE_SINGLE_REGISTER: u8 = 0x06;
/// Write multiple coils
pub const WRITE_MULTIPLE_COILS: u8 = 0x0F;
/// Write multiple registers
pub const WRITE_MULTIPLE_REGISTERS: u8 = 0x10;

const MAX_READ_BITS: u16 = 2000;
const MAX_READ_REGISTERS: u16 = 125;
const MAX_WRITE_COILS: u16 = 1968;
const MAX_WRITE_REGISTERS: u16 = 123;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;

/// Per-connection frame buffer
#[derive(Debug, Default)]
pub struct ModbusProtocol {
    buffer: Vec<u8>,
}

impl ModbusProtocol {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Append bytes and take every complete frame
    ///
    /// A header that can not start a frame leaves no way to find the next
    /// one, so the whole buffer is dropped.
    pub fn push_bytes(&mut self, data: &[u8]) -> Vec<ModbusTcpFrame> {
        self.buffer.extend_from_slice(data);
        let mut frames = Vec::new();
        loop {
            match ModbusTcpFrame::decode(&mut self.buffer) {
                Ok(Some(frame)) => frames.push(frame),
                Ok(None) => break,
                Err(e) => {
                    warn!("Dropping {} buffered bytes: {}", self.buffer.len(), e);
                    self.buffer.clear();
                    break;
                }
            }
        }
        frames
    }

    /// Append bytes and answer every complete frame
    pub fn process(&mut self, data: &[u8], layout: &ModbusLayout) -> Vec<Vec<u8>> {
        self.push_bytes(data)
            .iter()
            .map(|frame| execute(layout, frame).encode())
            .collect()
    }

    /// Number of buffered bytes
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }
}

/// Execute one request frame and build its response
pub fn execute(layout: &ModbusLayout, request: &ModbusTcpFrame) -> ModbusTcpFrame {
    let result = match request.function_code {
        READ_COILS => read_bits(&layout.co, &request.data),
        READ_DISCRETE_INPUTS => read_bits(&layout.di, &request.data),
        READ_HOLDING_REGISTERS => read_registers(&layout.hr, &request.data),
        READ_INPUT_REGISTERS => read_registers(&layout.ir, &request.data),
        WRITE_SINGLE_COIL => write_single_coil(&layout.co, &request.data),
        WRITE_SINGLE_REGISTER => write_single_register(&layout.hr, &request.data),
        WRITE_MULTIPLE_COILS => write_multiple_coils(&layout.co, &request.data),
        WRITE_MULTIPLE_REGISTERS => write_multiple_registers(&layout.hr, &request.data),
        other => {
            debug!("Unsupported function code 0x{:02X}", other);
            Err(ExceptionCode::IllegalFunction)
        }
    };
    match result {
        Ok(data) => request.response(data),
        Err(code) => {
            debug!(
                "Function 0x{:02X} (transaction {}) failed: {}",
                request.function_code, request.transaction_id, code
            );
            request.exception(code)
        }
    }
}

fn word(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

/// Address and quantity of a 4 byte request body
fn address_and_quantity(data: &[u8]) -> Result<(u16, u16), ExceptionCode> {
    if data.len() != 4 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok((word(data, 0), word(data, 2)))
}

fn check_quantity(quantity: u16, max: u16) -> Result<usize, ExceptionCode> {
    if (1..=max).contains(&quantity) {
        Ok(usize::from(quantity))
    } else {
        Err(ExceptionCode::IllegalDataValue)
    }
}

fn read_bits(bank: &DataBank, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    let (address, quantity) = address_and_quantity(data)?;
    let count = check_quantity(quantity, MAX_READ_BITS)?;
    let bits = bank
        .get_bits(address, count)
        .ok_or(ExceptionCode::IllegalDataAddress)?;

    let packed = pack_bits(&bits);
    let mut response = Vec::with_capacity(packed.len() + 1);
    response.push(packed.len() as u8);
    response.extend_from_slice(&packed);
    Ok(response)
}

fn read_registers(bank: &DataBank, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    let (address, quantity) = address_and_quantity(data)?;
    let count = check_quantity(quantity, MAX_READ_REGISTERS)?;
    let words = bank
        .get(address, count)
        .ok_or(ExceptionCode::IllegalDataAddress)?;

    let mut response = Vec::with_capacity(count * 2 + 1);
    response.push((count * 2) as u8);
    for w in words {
        response.extend_from_slice(&w.to_be_bytes());
    }
    Ok(response)
}

fn write_single_coil(bank: &DataBank, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    let (address, value) = address_and_quantity(data)?;
    let on = match value {
        COIL_ON => true,
        COIL_OFF => false,
        _ => return Err(ExceptionCode::IllegalDataValue),
    };
    if !bank.set_bits(address, &[on]) {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(data.to_vec())
}

fn write_single_register(bank: &DataBank, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    let (address, value) = address_and_quantity(data)?;
    if !bank.set_word(address, value) {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(data.to_vec())
}

/// Address, quantity and payload of a multiple write request
fn multiple_write(data: &[u8], max: u16, bytes_for: fn(usize) -> usize) -> Result<(u16, usize, &[u8]), ExceptionCode> {
    if data.len() < 5 {
        return Err(ExceptionCode::IllegalDataValue);
    }
    let address = word(data, 0);
    let count = check_quantity(word(data, 2), max)?;
    let byte_count = usize::from(data[4]);
    let payload = &data[5..];
    if byte_count != bytes_for(count) || payload.len() != byte_count {
        return Err(ExceptionCode::IllegalDataValue);
    }
    Ok((address, count, payload))
}

fn write_multiple_coils(bank: &DataBank, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    let (address, count, payload) = multiple_write(data, MAX_WRITE_COILS, |n| n.div_ceil(8))?;
    let bits = unpack_bits(payload, count);
    if !bank.set_bits(address, &bits) {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(data[..4].to_vec())
}

fn write_multiple_registers(bank: &DataBank, data: &[u8]) -> Result<Vec<u8>, ExceptionCode> {
    let (address, _, payload) = multiple_write(data, MAX_WRITE_REGISTERS, |n| n * 2)?;
    let words: Vec<u16> = payload
        .chunks_exact(2)
        .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
        .collect();
    if !bank.set(address, &words) {
        return Err(ExceptionCode::IllegalDataAddress);
    }
    Ok(data[..4].to_vec())
}

/// LSB first within each byte, first byte first
fn pack_bits(bits: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0u8; bits.len().div_ceil(8)];
    for (i, &bit) in bits.iter().enumerate() {
        if bit {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}

fn unpack_bits(bytes: &[u8], count: usize) -> Vec<bool> {
    (0..count).map(|i| bytes[i / 8] & (1 << (i % 8)) != 0).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(function_code: u8, data: &[u8]) -> ModbusTcpFrame {
        ModbusTcpFrame {
            transaction_id: 42,
            protocol_id: 0,
            unit_id: 1,
            function_code,
            data: data.to_vec(),
        }
    }

    fn small_layout() -> ModbusLayout {
        ModbusLayout::overlaid(
            DataBank::new(0, 99, 0).unwrap(),
            DataBank::new(1000, 1099, 0).unwrap(),
        )
    }

    #[test]
    fn test_read_holding_registers() {
        let layout = small_layout();
        layout.hr.set(1000, &[0x0102, 0x0304]);
        let response = execute(&layout, &request(READ_HOLDING_REGISTERS, &[0x03, 0xE8, 0x00, 0x02]));
        assert_eq!(response.function_code, READ_HOLDING_REGISTERS);
        assert_eq!(response.data, vec![4, 0x01, 0x02, 0x03, 0x04]);
        // Input registers overlay holding registers
        let response = execute(&layout, &request(READ_INPUT_REGISTERS, &[0x03, 0xE8, 0x00, 0x01]));
        assert_eq!(response.data, vec![2, 0x01, 0x02]);
    }

    #[test]
    fn test_read_coils_packs_lsb_first() {
        let layout = small_layout();
        layout.co.set_bits(0, &[true, false, true, true, false, false, false, false, true]);
        let response = execute(&layout, &request(READ_COILS, &[0, 0, 0, 9]));
        assert_eq!(response.data, vec![2, 0b0000_1101, 0b0000_0001]);
    }

    #[test]
    fn test_write_single_coil() {
        let layout = small_layout();
        let response = execute(&layout, &request(WRITE_SINGLE_COIL, &[0, 5, 0xFF, 0x00]));
        assert_eq!(response.data, vec![0, 5, 0xFF, 0x00]);
        assert_eq!(layout.co.word(5), Some(1));

        let response = execute(&layout, &request(WRITE_SINGLE_COIL, &[0, 5, 0x12, 0x34]));
        assert_eq!(response.exception_code(), Some(ExceptionCode::IllegalDataValue));
        assert_eq!(layout.co.word(5), Some(1));
    }

    #[test]
    fn test_write_multiple_coils() {
        let layout = small_layout();
        let response = execute(
            &layout,
            &request(WRITE_MULTIPLE_COILS, &[0, 10, 0, 10, 2, 0b1100_0101, 0b0000_0010]),
        );
        assert_eq!(response.data, vec![0, 10, 0, 10]);
        assert_eq!(
            layout.co.get(10, 10),
            Some(vec![1, 0, 1, 0, 0, 0, 1, 1, 0, 1])
        );

        // Byte count must match the quantity
        let response = execute(&layout, &request(WRITE_MULTIPLE_COILS, &[0, 10, 0, 10, 1, 0xFF]));
        assert_eq!(response.exception_code(), Some(ExceptionCode::IllegalDataValue));
    }

    #[test]
    fn test_write_multiple_registers() {
        let layout = small_layout();
        let response = execute(
            &layout,
            &request(WRITE_MULTIPLE_REGISTERS, &[0x03, 0xE9, 0, 2, 4, 0xAB, 0xCD, 0x00, 0x01]),
        );
        assert_eq!(response.data, vec![0x03, 0xE9, 0, 2]);
        assert_eq!(layout.hr.get(1001, 2), Some(vec![0xABCD, 0x0001]));
    }

    #[test]
    fn test_unknown_function() {
        let response = execute(&small_layout(), &request(0x2B, &[0x0E, 0x01, 0x00]));
        assert_eq!(response.function_code, 0xAB);
        assert_eq!(response.data, vec![0x01]);
    }

    #[test]
    fn test_quantity_checked_before_address() {
        let layout = small_layout();
        // Quantity 0 at an unmapped address is a value error
        let response = execute(&layout, &request(READ_HOLDING_REGISTERS, &[0, 0, 0, 0]));
        assert_eq!(response.exception_code(), Some(ExceptionCode::IllegalDataValue));
        let response = execute(&layout, &request(READ_HOLDING_REGISTERS, &[0, 0, 0, 126]));
        assert_eq!(response.exception_code(), Some(ExceptionCode::IllegalDataValue));
        let response = execute(&layout, &request(READ_HOLDING_REGISTERS, &[0, 0, 0, 1]));
        assert_eq!(response.exception_code(), Some(ExceptionCode::IllegalDataAddress));
        let response = execute(&layout, &request(READ_COILS, &[0, 99, 0, 2]));
        assert_eq!(response.exception_code(), Some(ExceptionCode::IllegalDataAddress));
        let response = execute(&layout, &request(READ_COILS, &[0, 0, 0x07, 0xD1]));
        assert_eq!(response.exception_code(), Some(ExceptionCode::IllegalDataValue));
    }

    #[test]
    fn test_truncated_body() {
        let response = execute(&small_layout(), &request(READ_COILS, &[0, 0, 0]));
        assert_eq!(response.exception_code(), Some(ExceptionCode::IllegalDataValue));
    }

    #[test]
    fn test_process_merged_and_split_frames() {
        let layout = small_layout();
        layout.hr.set_word(1000, 7);
        let frame = request(READ_HOLDING_REGISTERS, &[0x03, 0xE8, 0x00, 0x01]).encode();
        let mut twice = frame.clone();
        twice.extend_from_slice(&frame);

        let mut protocol = ModbusProtocol::new();
        let responses = protocol.process(&twice[..20], &layout);
        assert_eq!(responses.len(), 1);
        assert_eq!(protocol.buffered(), 8);
        let responses = protocol.process(&twice[20..], &layout);
        assert_eq!(responses.len(), 1);
        assert_eq!(&responses[0][7..], &[0x03u8, 2, 0x00, 0x07]);
    }

    #[test]
    fn test_bad_header_drops_buffer() {
        let mut protocol = ModbusProtocol::new();
        let responses = protocol.process(&[0, 1, 0, 5, 0, 6, 1, 3, 0, 0, 0, 1], &small_layout());
        assert!(responses.is_empty());
        assert_eq!(protocol.buffered(), 0);
    }
}
