//! Peripheral registry
//!
//! Maps small integer ids to hardware handles. The same table is the
//! interrupt dispatch table: a vector handler only needs the id of the
//! peripheral that fired.

use core::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Index of a peripheral instance (I2C0, I2C1, UART0, ...)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(transparent))]
pub struct PeripheralId(pub u8);

impl PeripheralId {
    /// Position of this peripheral in a driver's tables
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for PeripheralId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Fixed table of hardware handles indexed by [`PeripheralId`]
///
/// `H` is normally a trait object (`dyn I2cHardware`) so one driver can
/// serve peripherals backed by different register blocks.
pub struct PeripheralTable<'d, H: ?Sized, const N: usize> {
    entries: [Option<&'d H>; N],
}

impl<'d, H: ?Sized, const N: usize> PeripheralTable<'d, H, N> {
    /// Create a table; `None` marks an id with no peripheral behind it
    pub const fn new(entries: [Option<&'d H>; N]) -> Self {
        Self { entries }
    }

    /// Resolve an id to its hardware handle
    pub fn get(&self, id: PeripheralId) -> Option<&'d H> {
        self.entries.get(id.index()).copied().flatten()
    }

    /// Whether `id` names a populated entry
    pub fn contains(&self, id: PeripheralId) -> bool {
        self.get(id).is_some()
    }

    /// Number of ids the table can hold
    pub const fn capacity(&self) -> usize {
        N
    }
}
