//! Modbus error types

use std::fmt;

use thiserror::Error;

/// Standard Modbus exception codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ExceptionCode {
    /// Function code not supported
    IllegalFunction = 0x01,
    /// Address range outside the mapped bank
    IllegalDataAddress = 0x02,
    /// Malformed payload, quantity or value
    IllegalDataValue = 0x03,
    /// Unrecoverable error while executing the request
    SlaveDeviceFailure = 0x04,
    /// Request accepted, processing takes longer
    Acknowledge = 0x05,
    /// Device busy with a long running request
    SlaveDeviceBusy = 0x06,
    /// Parity error in extended memory
    MemoryParityError = 0x08,
    /// Gateway has no path to the target
    GatewayPathUnavailable = 0x0A,
    /// Gateway target did not answer
    GatewayTargetFailedToRespond = 0x0B,
}

impl ExceptionCode {
    /// Wire value
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Decode a wire value
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::IllegalFunction),
            0x02 => Some(Self::IllegalDataAddress),
            0x03 => Some(Self::IllegalDataValue),
            0x04 => Some(Self::SlaveDeviceFailure),
            0x05 => Some(Self::Acknowledge),
            0x06 => Some(Self::SlaveDeviceBusy),
            0x08 => Some(Self::MemoryParityError),
            0x0A => Some(Self::GatewayPathUnavailable),
            0x0B => Some(Self::GatewayTargetFailedToRespond),
            _ => None,
        }
    }
}

impl fmt::Display for ExceptionCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::IllegalFunction => "illegal function",
            Self::IllegalDataAddress => "illegal data address",
            Self::IllegalDataValue => "illegal data value",
            Self::SlaveDeviceFailure => "slave device failure",
            Self::Acknowledge => "acknowledge",
            Self::SlaveDeviceBusy => "slave device busy",
            Self::MemoryParityError => "memory parity error",
            Self::GatewayPathUnavailable => "gateway path unavailable",
            Self::GatewayTargetFailedToRespond => "gateway target failed to respond",
        };
        write!(f, "{} (0x{:02X})", name, self.code())
    }
}

/// Errors raised by the Modbus front end
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModbusError {
    /// The MBAP header can not start a valid frame
    #[error("invalid MBAP header: protocol id {protocol_id}, length {length}")]
    InvalidHeader {
        /// Protocol identifier, must be 0
        protocol_id: u16,
        /// Length field, must be 2..=254
        length: u16,
    },

    /// Bank bounds are reversed
    #[error("invalid bank range 0x{start:04X}..=0x{end:04X}")]
    InvalidBank {
        /// First address
        start: u16,
        /// Last address
        end: u16,
    },
}
