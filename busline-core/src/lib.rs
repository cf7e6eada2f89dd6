//! Interrupt-driven serial bus drivers
//!
//! This crate contains the chip-independent half of the bus stack:
//!
//! - Peripheral registry and interrupt dispatch
//! - I2C master protocol state machine (runs in interrupt context)
//! - I2C transfer queue with per-transfer completion signals
//! - UART byte-stream driver with bounded transmit/receive queues
//! - Board configuration types
//! - `embedded-hal-async` and `embedded-io-async` adapters
//!
//! Register access lives behind the traits in `busline-hal`.
//!
//! # Wiring
//!
//! Drivers are usually `static`s. Each peripheral interrupt vector calls
//! the driver's `on_interrupt` with the peripheral's id; tasks call the
//! async operations.
//!
//! ```ignore
//! static I2C: I2cDriver<'static, 2> =
//!     I2cDriver::new(PeripheralTable::new([Some(&I2C0), Some(&I2C1)]));
//!
//! #[interrupt]
//! fn I2C0() {
//!     I2C.on_interrupt(PeripheralId(0));
//! }
//! ```

#![cfg_attr(not(test), no_std)]
#![deny(unsafe_code)]

// This mod MUST go first, so that the others see its macros.
pub(crate) mod fmt;

pub mod config;
pub mod error;
pub mod i2c;
pub mod registry;
pub mod uart;

pub use config::BusConfig;
pub use error::{ConfigError, I2cError, UartError};
pub use i2c::{I2cDriver, Transfer, TransferStatus};
pub use registry::{PeripheralId, PeripheralTable};
pub use uart::UartDriver;
