//! `embedded-hal-async` adapter
//!
//! Lets generic sensor and memory drivers talk through the shared queue.
//! A transaction is a run of writes followed by a run of reads, which maps
//! onto one [`Transfer`] (write phase, repeated START, read phase).

use embedded_hal_async::i2c::{ErrorType, I2c, Operation, SevenBitAddress};
use heapless::Vec;

use super::transfer::{Transfer, MAX_TRANSFER_LEN};
use super::I2cDriver;
use crate::error::I2cError;
use crate::registry::PeripheralId;

/// One I2C peripheral seen as an `embedded_hal_async::i2c::I2c` bus
pub struct I2cDevice<'a, 'd, const N: usize> {
    driver: &'a I2cDriver<'d, N>,
    id: PeripheralId,
}

impl<'a, 'd, const N: usize> I2cDevice<'a, 'd, N> {
    pub(crate) fn new(driver: &'a I2cDriver<'d, N>, id: PeripheralId) -> Self {
        Self { driver, id }
    }

    /// Peripheral this device submits to
    pub fn id(&self) -> PeripheralId {
        self.id
    }
}

impl<const N: usize> ErrorType for I2cDevice<'_, '_, N> {
    type Error = I2cError;
}

impl<const N: usize> I2c<SevenBitAddress> for I2cDevice<'_, '_, N> {
    async fn transaction(
        &mut self,
        address: SevenBitAddress,
        operations: &mut [Operation<'_>],
    ) -> Result<(), Self::Error> {
        let mut outbound: Vec<u8, MAX_TRANSFER_LEN> = Vec::new();
        let mut inbound = 0;

        for op in operations.iter() {
            match op {
                Operation::Write(bytes) => {
                    if inbound > 0 {
                        return Err(I2cError::Unsupported);
                    }
                    outbound
                        .extend_from_slice(bytes)
                        .map_err(|_| I2cError::TooLong)?;
                }
                Operation::Read(buf) => inbound += buf.len(),
            }
        }

        let transfer = Transfer::new(address, &outbound, inbound)?;
        let transfer = self.driver.submit(self.id, transfer).await?;
        transfer.status().into_result()?;

        let mut received = transfer.received();
        for op in operations.iter_mut() {
            if let Operation::Read(buf) = op {
                let n = buf.len().min(received.len());
                buf[..n].copy_from_slice(&received[..n]);
                received = &received[n..];
            }
        }
        Ok(())
    }
}
