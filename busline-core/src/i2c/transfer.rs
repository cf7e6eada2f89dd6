//! I2C transfer descriptor

use busline_hal::i2c::MAX_ADDRESS;
use heapless::Vec;

use crate::error::I2cError;

/// Maximum number of bytes in each direction of one transfer
pub const MAX_TRANSFER_LEN: usize = 32;

/// Outcome of a transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TransferStatus {
    /// Queued or in flight
    #[default]
    Pending,
    /// Every byte moved and the slave acknowledged as expected
    Complete,
    /// Slave NAKed its address or a written byte
    Rejected,
    /// Bus error, arbitration loss or unexpected controller status
    BusError,
}

impl TransferStatus {
    /// Whether the transfer has finished
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransferStatus::Pending)
    }

    /// Map a terminal status to a driver result
    pub fn into_result(self) -> Result<(), I2cError> {
        match self {
            TransferStatus::Complete => Ok(()),
            TransferStatus::Rejected => Err(I2cError::Nak),
            TransferStatus::BusError => Err(I2cError::Bus),
            TransferStatus::Pending => Err(I2cError::Busy),
        }
    }
}

/// One I2C transaction: optional write phase, then optional read phase
///
/// When both phases are present they are joined with a repeated START.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Transfer {
    address: u8,
    tx: Vec<u8, MAX_TRANSFER_LEN>,
    tx_sent: usize,
    rx: Vec<u8, MAX_TRANSFER_LEN>,
    rx_len: usize,
    status: TransferStatus,
}

impl Transfer {
    /// Create a transfer writing `tx` then reading `rx_len` bytes
    pub fn new(address: u8, tx: &[u8], rx_len: usize) -> Result<Self, I2cError> {
        if address > MAX_ADDRESS {
            return Err(I2cError::InvalidAddress);
        }
        if rx_len > MAX_TRANSFER_LEN {
            return Err(I2cError::TooLong);
        }
        let tx = Vec::from_slice(tx).map_err(|_| I2cError::TooLong)?;

        Ok(Self {
            address,
            tx,
            tx_sent: 0,
            rx: Vec::new(),
            rx_len,
            status: TransferStatus::Pending,
        })
    }

    /// Write-only transfer
    pub fn write(address: u8, data: &[u8]) -> Result<Self, I2cError> {
        Self::new(address, data, 0)
    }

    /// Read-only transfer
    pub fn read(address: u8, len: usize) -> Result<Self, I2cError> {
        Self::new(address, &[], len)
    }

    /// Write then read with a repeated START in between
    pub fn write_read(address: u8, data: &[u8], len: usize) -> Result<Self, I2cError> {
        Self::new(address, data, len)
    }

    /// 7-bit slave address
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Current status
    pub fn status(&self) -> TransferStatus {
        self.status
    }

    /// Bytes to write
    pub fn outbound(&self) -> &[u8] {
        &self.tx
    }

    /// Number of outbound bytes handed to the controller
    pub fn sent(&self) -> usize {
        self.tx_sent
    }

    /// Requested number of inbound bytes
    pub fn requested(&self) -> usize {
        self.rx_len
    }

    /// Bytes received so far
    pub fn received(&self) -> &[u8] {
        &self.rx
    }

    /// Rewind progress before the transfer is (re)submitted
    pub(crate) fn rewind(&mut self) {
        self.tx_sent = 0;
        self.rx.clear();
        self.status = TransferStatus::Pending;
    }

    pub(crate) fn set_status(&mut self, status: TransferStatus) {
        self.status = status;
    }

    pub(crate) fn has_outbound(&self) -> bool {
        self.tx_sent < self.tx.len()
    }

    /// Next outbound byte, advancing the cursor
    pub(crate) fn next_outbound(&mut self) -> Option<u8> {
        let byte = self.tx.get(self.tx_sent).copied()?;
        self.tx_sent += 1;
        Some(byte)
    }

    /// Inbound bytes still expected
    pub(crate) fn remaining(&self) -> usize {
        self.rx_len - self.rx.len()
    }

    pub(crate) fn store(&mut self, byte: u8) {
        if self.remaining() > 0 {
            // Capacity is checked at construction
            let _ = self.rx.push(byte);
        }
    }
}
