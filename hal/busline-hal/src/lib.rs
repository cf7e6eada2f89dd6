//! Busline Hardware Abstraction Layer
//!
//! This crate defines the register-level operations the busline drivers
//! need from a chip. A chip port implements these traits on top of its
//! peripheral access crate; the drivers in `busline-core` never touch
//! registers directly.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │  Application tasks                      │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  busline-core (queues, state machines)  │
//! └─────────────────────────────────────────┘
//!                     │
//!                     ▼
//! ┌─────────────────────────────────────────┐
//! │  busline-hal (this crate - traits)      │
//! └─────────────────────────────────────────┘
//!                     │
//!         ┌───────────┴───────────┐
//!         ▼                       ▼
//! ┌───────────────┐       ┌───────────────┐
//! │  chip port    │       │  mock (host)  │
//! └───────────────┘       └───────────────┘
//! ```
//!
//! # Traits
//!
//! - [`i2c::I2cHardware`] - Byte-oriented I2C master controller
//! - [`uart::UartHardware`] - UART with transmit/receive FIFOs

#![cfg_attr(not(any(test, feature = "mock")), no_std)]
#![deny(unsafe_code)]

pub mod i2c;
pub mod uart;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

// Re-export key traits at crate root for convenience
pub use i2c::{I2cConfig, I2cHardware};
pub use uart::{UartConfig, UartHardware};
