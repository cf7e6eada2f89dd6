//! Driver error types

use core::fmt;

use embedded_hal_async::i2c::{ErrorKind as I2cErrorKind, NoAcknowledgeSource};
use embedded_io_async::ErrorKind as IoErrorKind;

/// I2C driver errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum I2cError {
    /// No peripheral registered under this id
    InvalidId,
    /// Peripheral has not been initialized
    NotInitialized,
    /// Peripheral is already initialized
    AlreadyInitialized,
    /// Clock rate outside 1 Hz..=1 MHz
    InvalidConfig,
    /// Slave address does not fit in 7 bits
    InvalidAddress,
    /// Payload longer than a transfer can hold
    TooLong,
    /// A transfer is in flight or queued
    Busy,
    /// No transfer slot became free before the timeout
    QueueFull,
    /// Slave did not acknowledge its address or a data byte
    Nak,
    /// Bus error, arbitration loss or unexpected controller state
    Bus,
    /// Operation sequence cannot be expressed as one transfer
    Unsupported,
}

impl fmt::Display for I2cError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            I2cError::InvalidId => write!(f, "unknown I2C peripheral"),
            I2cError::NotInitialized => write!(f, "I2C peripheral not initialized"),
            I2cError::AlreadyInitialized => write!(f, "I2C peripheral already initialized"),
            I2cError::InvalidConfig => write!(f, "invalid I2C clock rate"),
            I2cError::InvalidAddress => write!(f, "invalid 7-bit address"),
            I2cError::TooLong => write!(f, "transfer too long"),
            I2cError::Busy => write!(f, "I2C peripheral busy"),
            I2cError::QueueFull => write!(f, "I2C transfer queue full"),
            I2cError::Nak => write!(f, "not acknowledged"),
            I2cError::Bus => write!(f, "I2C bus error"),
            I2cError::Unsupported => write!(f, "unsupported operation sequence"),
        }
    }
}

impl embedded_hal_async::i2c::Error for I2cError {
    fn kind(&self) -> I2cErrorKind {
        match self {
            I2cError::Nak => I2cErrorKind::NoAcknowledge(NoAcknowledgeSource::Unknown),
            I2cError::Bus => I2cErrorKind::Bus,
            _ => I2cErrorKind::Other,
        }
    }
}

/// UART driver errors
///
/// Running out of queue space or time is not an error: operations return
/// the number of bytes actually moved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum UartError {
    /// No peripheral registered under this id
    InvalidId,
    /// Peripheral has not been initialized
    NotInitialized,
    /// Peripheral is already initialized
    AlreadyInitialized,
    /// Baud rate of zero
    InvalidConfig,
}

impl fmt::Display for UartError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UartError::InvalidId => write!(f, "unknown UART peripheral"),
            UartError::NotInitialized => write!(f, "UART peripheral not initialized"),
            UartError::AlreadyInitialized => write!(f, "UART peripheral already initialized"),
            UartError::InvalidConfig => write!(f, "invalid UART configuration"),
        }
    }
}

impl embedded_io_async::Error for UartError {
    fn kind(&self) -> IoErrorKind {
        match self {
            UartError::InvalidId => IoErrorKind::NotFound,
            UartError::NotInitialized => IoErrorKind::NotConnected,
            UartError::AlreadyInitialized => IoErrorKind::AlreadyExists,
            UartError::InvalidConfig => IoErrorKind::InvalidInput,
        }
    }
}

/// Board configuration errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConfigError {
    /// The same peripheral id is listed twice
    DuplicateId,
    /// An I2C entry was rejected
    I2c(I2cError),
    /// A UART entry was rejected
    Uart(UartError),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::DuplicateId => write!(f, "duplicate peripheral id"),
            ConfigError::I2c(e) => write!(f, "i2c: {}", e),
            ConfigError::Uart(e) => write!(f, "uart: {}", e),
        }
    }
}

impl From<I2cError> for ConfigError {
    fn from(e: I2cError) -> Self {
        ConfigError::I2c(e)
    }
}

impl From<UartError> for ConfigError {
    fn from(e: UartError) -> Self {
        ConfigError::Uart(e)
    }
}
