//! Board bus configuration
//!
//! Describes which peripherals a board brings up and how. With the `serde`
//! feature enabled the types deserialize from the board's configuration
//! file (TOML in practice):
//!
//! ```toml
//! [[i2c]]
//! id = 0
//! frequency = 400000
//!
//! [[uart]]
//! id = 0
//! baudrate = 115200
//! ```

use busline_hal::uart::{DataBits, Parity, StopBits};
use busline_hal::{I2cConfig, UartConfig};
use heapless::Vec;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, I2cError, UartError};
use crate::i2c::I2cDriver;
use crate::registry::PeripheralId;
use crate::uart::UartDriver;

/// Maximum peripherals of each kind in one configuration
pub const MAX_PORTS: usize = 4;

/// One I2C peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct I2cPortConfig {
    /// Peripheral index
    pub id: PeripheralId,
    /// Bus clock in Hz
    #[cfg_attr(feature = "serde", serde(default = "default_i2c_frequency"))]
    pub frequency: u32,
}

#[cfg(feature = "serde")]
fn default_i2c_frequency() -> u32 {
    I2cConfig::STANDARD.frequency
}

impl I2cPortConfig {
    /// Hardware configuration for this entry
    pub fn hardware(&self) -> I2cConfig {
        I2cConfig::with_frequency(self.frequency)
    }
}

/// One UART peripheral
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct UartPortConfig {
    /// Peripheral index
    pub id: PeripheralId,
    /// Baud rate
    pub baudrate: u32,
    #[cfg_attr(feature = "serde", serde(default))]
    pub data_bits: DataBits,
    #[cfg_attr(feature = "serde", serde(default))]
    pub parity: Parity,
    #[cfg_attr(feature = "serde", serde(default))]
    pub stop_bits: StopBits,
}

impl UartPortConfig {
    /// Hardware configuration for this entry
    pub fn hardware(&self) -> UartConfig {
        UartConfig {
            baudrate: self.baudrate,
            data_bits: self.data_bits,
            parity: self.parity,
            stop_bits: self.stop_bits,
        }
    }
}

/// Every bus a board brings up at boot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BusConfig {
    #[cfg_attr(feature = "serde", serde(default))]
    pub i2c: Vec<I2cPortConfig, MAX_PORTS>,
    #[cfg_attr(feature = "serde", serde(default))]
    pub uart: Vec<UartPortConfig, MAX_PORTS>,
}

impl BusConfig {
    /// Check ids are unique per bus kind and every rate is usable
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (i, port) in self.i2c.iter().enumerate() {
            if self.i2c[..i].iter().any(|p| p.id == port.id) {
                return Err(ConfigError::DuplicateId);
            }
            if !port.hardware().is_valid() {
                return Err(ConfigError::I2c(I2cError::InvalidConfig));
            }
        }

        for (i, port) in self.uart.iter().enumerate() {
            if self.uart[..i].iter().any(|p| p.id == port.id) {
                return Err(ConfigError::DuplicateId);
            }
            if !port.hardware().is_valid() {
                return Err(ConfigError::Uart(UartError::InvalidConfig));
            }
        }

        Ok(())
    }

    /// Initialize every listed peripheral
    ///
    /// The whole configuration is validated first; nothing is touched if
    /// it is rejected. If a peripheral then fails to come up, the ones this
    /// call already initialized are shut down again before the error is
    /// returned.
    pub fn apply<const I: usize, const U: usize>(
        &self,
        i2c: &I2cDriver<'_, I>,
        uart: &UartDriver<'_, U>,
    ) -> Result<(), ConfigError> {
        self.validate()?;

        for (n, port) in self.i2c.iter().enumerate() {
            if let Err(e) = i2c.initialize_with(port.id, &port.hardware()) {
                self.roll_back(i2c, uart, n, 0);
                return Err(e.into());
            }
        }
        for (n, port) in self.uart.iter().enumerate() {
            if let Err(e) = uart.initialize_with(port.id, &port.hardware()) {
                self.roll_back(i2c, uart, self.i2c.len(), n);
                return Err(e.into());
            }
        }

        info!(
            "bus config applied: {} i2c, {} uart",
            self.i2c.len(),
            self.uart.len()
        );
        Ok(())
    }

    /// Shut down the first `i2c_up` I2C and `uart_up` UART entries
    fn roll_back<const I: usize, const U: usize>(
        &self,
        i2c: &I2cDriver<'_, I>,
        uart: &UartDriver<'_, U>,
        i2c_up: usize,
        uart_up: usize,
    ) {
        warn!("bus config failed, rolling back {} i2c, {} uart", i2c_up, uart_up);
        for port in &self.i2c[..i2c_up] {
            let _ = i2c.deinitialize(port.id);
        }
        for port in &self.uart[..uart_up] {
            let _ = uart.deinitialize(port.id);
        }
    }
}
