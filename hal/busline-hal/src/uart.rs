//! UART serial communication abstractions
//!
//! Models a 16550-style UART: a transmit holding FIFO with an "empty"
//! interrupt, a receive FIFO with a "data ready" interrupt, and a single
//! interrupt line shared by both.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// UART peripheral with transmit and receive FIFOs
///
/// Methods take `&self` because the same handle is used from task context
/// (inside a critical section) and from the interrupt handler.
pub trait UartHardware: Sync {
    /// Power up the peripheral, program framing and the baud divider
    fn init(&self, config: &UartConfig);

    /// Disable all UART interrupts, the transmitter and the peripheral
    fn deinit(&self);

    /// Unmask the peripheral interrupt line
    fn enable_irq(&self);

    /// Mask the peripheral interrupt line
    fn disable_irq(&self);

    /// Enable the transmit-holding-register-empty interrupt
    fn enable_tx_irq(&self);

    /// Disable the transmit-holding-register-empty interrupt
    fn disable_tx_irq(&self);

    /// Whether the transmit interrupt is currently enabled
    fn tx_irq_enabled(&self) -> bool;

    /// Enable the receive-data-available interrupt
    fn enable_rx_irq(&self);

    /// Disable the receive-data-available interrupt
    fn disable_rx_irq(&self);

    /// Whether the transmit FIFO can accept another byte
    fn tx_ready(&self) -> bool;

    /// Push a byte into the transmit FIFO
    ///
    /// Only valid when [`tx_ready`](Self::tx_ready) returned true.
    fn write_byte(&self, byte: u8);

    /// Pop a byte from the receive FIFO, if one is available
    fn read_byte(&self) -> Option<u8>;
}

/// UART configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UartConfig {
    /// Baud rate in bits per second
    pub baudrate: u32,
    /// Number of data bits (typically 8)
    pub data_bits: DataBits,
    /// Parity mode
    pub parity: Parity,
    /// Number of stop bits
    pub stop_bits: StopBits,
}

impl Default for UartConfig {
    fn default() -> Self {
        Self {
            baudrate: 115200,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }
}

impl UartConfig {
    /// 8N1 framing at the given baud rate
    pub const fn with_baudrate(baudrate: u32) -> Self {
        Self {
            baudrate,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
        }
    }

    /// Check the configuration can be programmed
    ///
    /// Nine-bit frames are refused: bytes move through the driver as `u8`,
    /// so the ninth bit would be lost.
    pub fn is_valid(&self) -> bool {
        self.baudrate > 0 && self.data_bits != DataBits::Nine
    }
}

/// Number of data bits per frame
///
/// `Nine` exists for completeness of the framing description; no
/// configuration using it passes [`UartConfig::is_valid`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum DataBits {
    Seven,
    #[default]
    Eight,
    Nine,
}

/// Parity mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Parity {
    #[default]
    None,
    Even,
    Odd,
}

/// Number of stop bits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum StopBits {
    #[default]
    One,
    Two,
}
