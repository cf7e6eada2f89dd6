//! `embedded-io-async` adapter

use embedded_io_async::{ErrorType, Read, Write};

use super::UartDriver;
use crate::error::UartError;
use crate::registry::PeripheralId;

/// One UART peripheral as an async byte stream
///
/// Reads wait for the first byte and then return whatever else has already
/// arrived. Writes block until every byte is queued.
pub struct UartPort<'a, 'd, const N: usize> {
    driver: &'a UartDriver<'d, N>,
    id: PeripheralId,
}

impl<'a, 'd, const N: usize> UartPort<'a, 'd, N> {
    pub(crate) fn new(driver: &'a UartDriver<'d, N>, id: PeripheralId) -> Self {
        Self { driver, id }
    }
}

impl<const N: usize> ErrorType for UartPort<'_, '_, N> {
    type Error = UartError;
}

impl<const N: usize> Read for UartPort<'_, '_, N> {
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        if buf.is_empty() {
            return Ok(0);
        }
        let first = self.driver.read(self.id, &mut buf[..1], None).await?;
        let rest = self.driver.read_available(self.id, &mut buf[first..])?;
        Ok(first + rest)
    }
}

impl<const N: usize> Write for UartPort<'_, '_, N> {
    async fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        self.driver.write(self.id, buf, None).await
    }

    async fn flush(&mut self) -> Result<(), Self::Error> {
        self.driver.flush(self.id).await
    }
}
