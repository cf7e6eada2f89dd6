//! Simulated hardware for host testing
//!
//! [`SimI2c`] and [`SimUart`] implement the register-level traits on top of
//! an in-memory model of the peripheral, so the drivers can be exercised
//! byte by byte without a board. Tests play the role of the interrupt
//! controller: whenever `irq_pending()` is true they call the driver's
//! interrupt entry point.

mod i2c;
mod uart;

pub use i2c::{SimDevice, SimI2c, WireEvent};
pub use uart::{SimUart, FIFO_DEPTH};

use std::sync::{Mutex, MutexGuard};

/// Lock a simulator state, ignoring poisoning from a panicked test thread
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}
