//! Memory banks
//!
//! A [`DataBank`] is a contiguous range of 16-bit cells. Clones share their
//! storage, which is how function code areas overlay each other and how a
//! device keeps a live view of the memory the adapter serves.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::ModbusError;

/// Shared range of 16-bit cells addressed `start..=end`
#[derive(Debug, Clone)]
pub struct DataBank {
    start: u16,
    end: u16,
    cells: Arc<Mutex<Vec<u16>>>,
}

impl DataBank {
    /// Bank covering `start..=end`, every cell set to `initial`
    pub fn new(start: u16, end: u16, initial: u16) -> Result<Self, ModbusError> {
        if start > end {
            return Err(ModbusError::InvalidBank { start, end });
        }
        let len = usize::from(end - start) + 1;
        Ok(Self {
            start,
            end,
            cells: Arc::new(Mutex::new(vec![initial; len])),
        })
    }

    /// Bank covering the full address space
    pub fn full(initial: u16) -> Self {
        Self {
            start: 0,
            end: u16::MAX,
            cells: Arc::new(Mutex::new(vec![initial; 0x10000])),
        }
    }

    /// First address
    pub fn start(&self) -> u16 {
        self.start
    }

    /// Last address
    pub fn end(&self) -> u16 {
        self.end
    }

    /// Number of cells
    pub fn len(&self) -> usize {
        usize::from(self.end - self.start) + 1
    }

    /// Banks are never empty
    pub fn is_empty(&self) -> bool {
        false
    }

    /// Whether `count` cells from `address` lie inside the bank
    pub fn contains(&self, address: u16, count: usize) -> bool {
        count > 0
            && address >= self.start
            && usize::from(address) + count - 1 <= usize::from(self.end)
    }

    /// Whether both banks use the same storage
    pub fn shares_storage_with(&self, other: &DataBank) -> bool {
        Arc::ptr_eq(&self.cells, &other.cells)
    }

    fn offset(&self, address: u16) -> usize {
        usize::from(address - self.start)
    }

    /// Read `count` cells; `None` outside the bank
    pub fn get(&self, address: u16, count: usize) -> Option<Vec<u16>> {
        if !self.contains(address, count) {
            return None;
        }
        let offset = self.offset(address);
        Some(self.cells.lock()[offset..offset + count].to_vec())
    }

    /// Write cells from `address`; returns false and writes nothing outside the bank
    pub fn set(&self, address: u16, values: &[u16]) -> bool {
        if !self.contains(address, values.len()) {
            return false;
        }
        let offset = self.offset(address);
        self.cells.lock()[offset..offset + values.len()].copy_from_slice(values);
        true
    }

    /// Read cells as bits (non-zero is set)
    pub fn get_bits(&self, address: u16, count: usize) -> Option<Vec<bool>> {
        self.get(address, count)
            .map(|cells| cells.into_iter().map(|c| c != 0).collect())
    }

    /// Write bits as 1/0 cells
    pub fn set_bits(&self, address: u16, bits: &[bool]) -> bool {
        let cells: Vec<u16> = bits.iter().map(|&b| u16::from(b)).collect();
        self.set(address, &cells)
    }

    /// Single cell
    pub fn word(&self, address: u16) -> Option<u16> {
        self.get(address, 1).and_then(|cells| cells.first().copied())
    }

    /// Write a single cell
    pub fn set_word(&self, address: u16, value: u16) -> bool {
        self.set(address, &[value])
    }
}

/// The four areas served by the Modbus adapter
#[derive(Debug, Clone)]
pub struct ModbusLayout {
    /// Discrete inputs (0x02)
    pub di: DataBank,
    /// Coils (0x01, 0x05, 0x0F)
    pub co: DataBank,
    /// Input registers (0x04)
    pub ir: DataBank,
    /// Holding registers (0x03, 0x06, 0x10)
    pub hr: DataBank,
}

impl ModbusLayout {
    /// Separate bank per area
    pub fn new(di: DataBank, co: DataBank, ir: DataBank, hr: DataBank) -> Self {
        Self { di, co, ir, hr }
    }

    /// Discrete inputs overlay coils, input registers overlay holding registers
    pub fn overlaid(bits: DataBank, words: DataBank) -> Self {
        Self {
            di: bits.clone(),
            co: bits,
            ir: words.clone(),
            hr: words,
        }
    }
}

impl Default for ModbusLayout {
    fn default() -> Self {
        Self::overlaid(DataBank::full(0), DataBank::full(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds() {
        let bank = DataBank::new(100, 109, 0).unwrap();
        assert_eq!(bank.len(), 10);
        assert!(bank.contains(100, 10));
        assert!(!bank.contains(100, 11));
        assert!(!bank.contains(99, 1));
        assert!(!bank.contains(100, 0));
        assert_eq!(bank.get(108, 3), None);
        assert!(!bank.set(109, &[1, 2]));
        assert_eq!(bank.get(109, 1), Some(vec![0]));
    }

    #[test]
    fn test_end_of_address_space() {
        let bank = DataBank::full(7);
        assert!(bank.contains(u16::MAX, 1));
        assert!(!bank.contains(u16::MAX, 2));
        assert_eq!(bank.word(u16::MAX), Some(7));
    }

    #[test]
    fn test_reversed_range() {
        assert_eq!(
            DataBank::new(10, 9, 0).unwrap_err(),
            ModbusError::InvalidBank { start: 10, end: 9 }
        );
    }

    #[test]
    fn test_clones_share_storage() {
        let layout = ModbusLayout::overlaid(DataBank::full(0), DataBank::full(0));
        assert!(layout.hr.shares_storage_with(&layout.ir));
        assert!(!layout.hr.shares_storage_with(&layout.co));
        layout.hr.set_word(5, 0xBEEF);
        assert_eq!(layout.ir.word(5), Some(0xBEEF));

        layout.co.set_bits(0, &[true, false, true]);
        assert_eq!(layout.di.get(0, 3), Some(vec![1, 0, 1]));
    }

    #[test]
    fn test_bits_read_nonzero() {
        let bank = DataBank::new(0, 3, 0).unwrap();
        bank.set(0, &[0, 2, 0xFFFF, 0]);
        assert_eq!(bank.get_bits(0, 4), Some(vec![false, true, true, false]));
    }
}
