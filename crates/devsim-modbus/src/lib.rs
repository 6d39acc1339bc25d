//! Modbus TCP front end
//!
//! Devices expose memory rather than members over Modbus. A [`ModbusLayout`]
//! assigns a [`DataBank`] to each of the four Modbus areas; the device keeps
//! clones of the banks it reads and updates during its cycles, and the
//! [`ModbusAdapter`] answers requests from the same storage.
//!
//! Assigning one bank to several areas overlays them:
//!
//! ```rust
//! use devsim_modbus::{DataBank, ModbusLayout, ModbusProtocol};
//!
//! let layout = ModbusLayout::overlaid(DataBank::full(0), DataBank::full(0));
//! layout.ir.set_word(0x10, 1234);
//!
//! // Read holding register 0x10, transaction 1, unit 1
//! let request = [0, 1, 0, 0, 0, 6, 1, 0x03, 0x00, 0x10, 0x00, 0x01];
//! let responses = ModbusProtocol::new().process(&request, &layout);
//! assert_eq!(&responses[0][7..], &[0x03u8, 2, 0x04, 0xD2]);
//! ```

pub mod adapter;
pub mod bank;
pub mod error;
pub mod frame;
pub mod protocol;

pub use adapter::{ModbusAdapter, ModbusOptions, PROTOCOL};
pub use bank::{DataBank, ModbusLayout};
pub use error::{ExceptionCode, ModbusError};
pub use frame::ModbusTcpFrame;
pub use protocol::{execute, ModbusProtocol};
