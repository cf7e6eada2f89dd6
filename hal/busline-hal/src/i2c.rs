//! I2C controller abstractions
//!
//! Models a byte-oriented I2C master controller of the kind found on most
//! Cortex-M parts: software sets START/STOP/ACK control bits and writes the
//! data register, the controller performs one bus action and raises an
//! interrupt with a status code describing what happened.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Status codes reported by the controller after each bus action
///
/// These are the standard master-mode codes of the byte-oriented I2C
/// controller (the same table is used by NXP, Atmel TWI and 8051 derived
/// parts).
pub mod status {
    /// Illegal START or STOP detected
    pub const BUS_ERROR: u8 = 0x00;
    /// START condition transmitted
    pub const START: u8 = 0x08;
    /// Repeated START condition transmitted
    pub const REPEATED_START: u8 = 0x10;
    /// SLA+W transmitted, ACK received
    pub const ADDR_W_ACK: u8 = 0x18;
    /// SLA+W transmitted, NAK received
    pub const ADDR_W_NAK: u8 = 0x20;
    /// Data byte transmitted, ACK received
    pub const DATA_W_ACK: u8 = 0x28;
    /// Data byte transmitted, NAK received
    pub const DATA_W_NAK: u8 = 0x30;
    /// Arbitration lost in SLA+R/W or data
    pub const ARBITRATION_LOST: u8 = 0x38;
    /// SLA+R transmitted, ACK received
    pub const ADDR_R_ACK: u8 = 0x40;
    /// SLA+R transmitted, NAK received
    pub const ADDR_R_NAK: u8 = 0x48;
    /// Data byte received, ACK returned
    pub const DATA_R_ACK: u8 = 0x50;
    /// Data byte received, NAK returned
    pub const DATA_R_NAK: u8 = 0x58;
    /// No relevant state information available
    pub const NO_INFO: u8 = 0xF8;
}

/// Highest valid 7-bit slave address
pub const MAX_ADDRESS: u8 = 0x7F;

/// Byte-oriented I2C master controller
///
/// All methods take `&self`: implementations wrap memory-mapped registers
/// and are called both from task context (inside a critical section) and
/// from the interrupt handler.
pub trait I2cHardware: Sync {
    /// Power up the peripheral and program the clock divider
    fn init(&self, config: &I2cConfig);

    /// Disable the peripheral and its interrupt
    fn deinit(&self);

    /// Unmask the peripheral interrupt line
    fn enable_irq(&self);

    /// Mask the peripheral interrupt line
    fn disable_irq(&self);

    /// Whether the controller has an unacknowledged event (SI flag)
    fn irq_pending(&self) -> bool;

    /// Current status code, see [`status`]
    fn status(&self) -> u8;

    /// Acknowledge the current event; the controller then performs the
    /// action programmed since the event was raised
    fn clear_irq(&self);

    /// Request a START (or repeated START when the bus is owned)
    fn send_start(&self);

    /// Clear a pending START request
    fn clear_start(&self);

    /// Request a STOP condition
    fn send_stop(&self);

    /// Load the data register (address byte or payload byte)
    fn write_byte(&self, byte: u8);

    /// Read the data register
    fn read_byte(&self) -> u8;

    /// Select whether the next received byte is acknowledged
    fn set_ack(&self, ack: bool);
}

/// I2C configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct I2cConfig {
    /// Clock frequency in Hz
    pub frequency: u32,
}

impl Default for I2cConfig {
    fn default() -> Self {
        Self::STANDARD
    }
}

impl I2cConfig {
    /// Standard mode (100 kHz)
    pub const STANDARD: Self = Self { frequency: 100_000 };

    /// Fast mode (400 kHz)
    pub const FAST: Self = Self { frequency: 400_000 };

    /// Fast mode plus (1 MHz)
    pub const FAST_PLUS: Self = Self {
        frequency: 1_000_000,
    };

    /// Create a configuration for the given clock rate
    pub const fn with_frequency(frequency: u32) -> Self {
        Self { frequency }
    }

    /// Check the clock rate is something a controller can generate
    pub fn is_valid(&self) -> bool {
        self.frequency > 0 && self.frequency <= Self::FAST_PLUS.frequency
    }
}

/// Address byte for a write phase (R/W bit clear)
pub const fn address_write(address: u8) -> u8 {
    address << 1
}

/// Address byte for a read phase (R/W bit set)
pub const fn address_read(address: u8) -> u8 {
    (address << 1) | 1
}
