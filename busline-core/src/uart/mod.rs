//! UART byte-stream driver
//!
//! Each peripheral owns a bounded transmit queue drained by the interrupt
//! handler and a bounded receive queue filled by it. Task-side reads and
//! writes move one byte at a time through the queues, each step bounded by
//! an optional timeout. Running out of time or space shortens the returned
//! count; it is never an error.

mod port;

use core::cell::RefCell;
use core::future::Future;

use busline_hal::{UartConfig, UartHardware};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};

pub use port::UartPort;

use crate::error::UartError;
use crate::registry::{PeripheralId, PeripheralTable};

/// Capacity of each transmit queue in bytes
pub const TX_QUEUE_CAPACITY: usize = 128;

/// Capacity of each receive queue in bytes
pub const RX_QUEUE_CAPACITY: usize = 128;

/// Transmit side outcome of one interrupt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TxState {
    /// Transmit interrupt was off, nothing to do
    Idle,
    /// Bytes remain queued, transmit interrupt stays on
    Draining,
    /// Queue emptied, transmit interrupt switched off
    Drained,
}

#[derive(Debug, Default)]
struct LineState {
    initialized: bool,
    dropped: u32,
}

/// Per-peripheral queues
struct Line {
    state: Mutex<CriticalSectionRawMutex, RefCell<LineState>>,
    tx: Channel<CriticalSectionRawMutex, u8, TX_QUEUE_CAPACITY>,
    rx: Channel<CriticalSectionRawMutex, u8, RX_QUEUE_CAPACITY>,
    drained: Signal<CriticalSectionRawMutex, ()>,
}

impl Line {
    const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(LineState {
                initialized: false,
                dropped: 0,
            })),
            tx: Channel::new(),
            rx: Channel::new(),
            drained: Signal::new(),
        }
    }

    fn is_initialized(&self) -> bool {
        self.state.lock(|cell| cell.borrow().initialized)
    }

    /// Move queued bytes into the hardware FIFO while it has room
    fn fill_fifo(&self, hw: &dyn UartHardware) {
        while hw.tx_ready() {
            match self.tx.try_receive() {
                Ok(byte) => hw.write_byte(byte),
                Err(_) => break,
            }
        }
    }

    /// Push queued bytes to the hardware from task context
    ///
    /// The transmit interrupt is masked while the FIFO is filled and only
    /// unmasked again if bytes are left over.
    fn kick(&self, hw: &dyn UartHardware) {
        critical_section::with(|_| {
            hw.disable_tx_irq();
            self.fill_fifo(hw);
            if self.tx.is_empty() {
                self.drained.signal(());
            } else {
                hw.enable_tx_irq();
            }
        });
    }
}

/// Wait for `fut`, bounded by `timeout` when one is given
async fn bounded<F: Future>(timeout: Option<Duration>, fut: F) -> Option<F::Output> {
    match timeout {
        Some(timeout) => with_timeout(timeout, fut).await.ok(),
        None => Some(fut.await),
    }
}

/// Interrupt-driven UART driver for up to `N` peripherals
///
/// Each peripheral supports one writer and one reader at a time.
pub struct UartDriver<'d, const N: usize> {
    hardware: PeripheralTable<'d, dyn UartHardware, N>,
    lines: [Line; N],
}

impl<'d, const N: usize> UartDriver<'d, N> {
    pub const fn new(hardware: PeripheralTable<'d, dyn UartHardware, N>) -> Self {
        Self {
            hardware,
            lines: [const { Line::new() }; N],
        }
    }

    fn lookup(&self, id: PeripheralId) -> Result<(&'d dyn UartHardware, &Line), UartError> {
        let hw = self.hardware.get(id).ok_or(UartError::InvalidId)?;
        let line = self.lines.get(id.index()).ok_or(UartError::InvalidId)?;
        Ok((hw, line))
    }

    fn lookup_ready(&self, id: PeripheralId) -> Result<(&'d dyn UartHardware, &Line), UartError> {
        let (hw, line) = self.lookup(id)?;
        if !line.is_initialized() {
            return Err(UartError::NotInitialized);
        }
        Ok((hw, line))
    }

    /// Initialize a peripheral at `baudrate`, 8N1
    pub fn initialize(&self, id: PeripheralId, baudrate: u32) -> Result<(), UartError> {
        self.initialize_with(id, &UartConfig::with_baudrate(baudrate))
    }

    /// Initialize a peripheral with explicit framing
    pub fn initialize_with(&self, id: PeripheralId, config: &UartConfig) -> Result<(), UartError> {
        let (hw, line) = self.lookup(id)?;
        if !config.is_valid() {
            return Err(UartError::InvalidConfig);
        }

        line.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            if state.initialized {
                return Err(UartError::AlreadyInitialized);
            }
            line.tx.clear();
            line.rx.clear();
            line.drained.reset();
            state.dropped = 0;

            hw.init(config);
            hw.disable_tx_irq();
            hw.enable_rx_irq();
            hw.enable_irq();
            state.initialized = true;
            Ok(())
        })?;

        info!("uart{}: initialized at {} baud", id, config.baudrate);
        Ok(())
    }

    /// Shut a peripheral down, discarding anything still queued
    pub fn deinitialize(&self, id: PeripheralId) -> Result<(), UartError> {
        let (hw, line) = self.lookup(id)?;

        line.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            if !state.initialized {
                return Err(UartError::NotInitialized);
            }
            hw.disable_irq();
            hw.disable_tx_irq();
            hw.disable_rx_irq();
            hw.deinit();
            line.tx.clear();
            line.rx.clear();
            state.initialized = false;
            Ok(())
        })?;

        info!("uart{}: deinitialized", id);
        Ok(())
    }

    /// Queue `data` for transmission
    ///
    /// Each byte waits at most `timeout` for queue space (`None` waits
    /// forever). Stops at the first byte that times out and returns how many
    /// bytes were queued.
    pub async fn write(
        &self,
        id: PeripheralId,
        data: &[u8],
        timeout: Option<Duration>,
    ) -> Result<usize, UartError> {
        let (hw, line) = self.lookup_ready(id)?;

        let mut queued = 0;
        for &byte in data {
            if line.tx.try_send(byte).is_err() {
                // Queue full: get the transmitter going before waiting on it
                line.kick(hw);
                if bounded(timeout, line.tx.send(byte)).await.is_none() {
                    break;
                }
            }
            queued += 1;
        }

        line.kick(hw);
        if queued < data.len() {
            debug!("uart{}: write timed out after {} bytes", id, queued);
        }
        Ok(queued)
    }

    /// Queue a string, stopping at the first NUL byte
    pub async fn print(
        &self,
        id: PeripheralId,
        text: &str,
        timeout: Option<Duration>,
    ) -> Result<usize, UartError> {
        let bytes = text.as_bytes();
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        self.write(id, &bytes[..end], timeout).await
    }

    /// Read up to `buf.len()` bytes
    ///
    /// Each byte waits at most `timeout`; returns the count actually read.
    pub async fn read(
        &self,
        id: PeripheralId,
        buf: &mut [u8],
        timeout: Option<Duration>,
    ) -> Result<usize, UartError> {
        let (_, line) = self.lookup_ready(id)?;

        let mut count = 0;
        for slot in buf.iter_mut() {
            match bounded(timeout, line.rx.receive()).await {
                Some(byte) => *slot = byte,
                None => break,
            }
            count += 1;
        }
        Ok(count)
    }

    /// Read whatever is already received, without waiting
    pub fn read_available(&self, id: PeripheralId, buf: &mut [u8]) -> Result<usize, UartError> {
        let (_, line) = self.lookup_ready(id)?;

        let mut count = 0;
        for slot in buf.iter_mut() {
            match line.rx.try_receive() {
                Ok(byte) => *slot = byte,
                Err(_) => break,
            }
            count += 1;
        }
        Ok(count)
    }

    /// Read until `separator`, a full buffer or a timeout
    ///
    /// Stores at most `buf.len() - 1` bytes (separator included) and writes
    /// a NUL right after the last stored byte. Returns the stored count,
    /// 0 for an empty buffer.
    pub async fn read_until(
        &self,
        id: PeripheralId,
        buf: &mut [u8],
        separator: u8,
        timeout: Option<Duration>,
    ) -> Result<usize, UartError> {
        let (_, line) = self.lookup_ready(id)?;
        let Some(limit) = buf.len().checked_sub(1) else {
            return Ok(0);
        };

        let mut count = 0;
        while count < limit {
            let Some(byte) = bounded(timeout, line.rx.receive()).await else {
                break;
            };
            buf[count] = byte;
            count += 1;
            if byte == separator {
                break;
            }
        }
        buf[count] = 0;
        Ok(count)
    }

    /// Wait until the transmit queue has been handed to the hardware
    pub async fn flush(&self, id: PeripheralId) -> Result<(), UartError> {
        let (hw, line) = self.lookup_ready(id)?;

        loop {
            line.drained.reset();
            if line.tx.is_empty() {
                return Ok(());
            }
            line.kick(hw);
            line.drained.wait().await;
        }
    }

    /// Received bytes discarded because the receive queue was full
    pub fn dropped(&self, id: PeripheralId) -> u32 {
        self.lookup(id)
            .map(|(_, line)| line.state.lock(|cell| cell.borrow().dropped))
            .unwrap_or(0)
    }

    /// Whether the peripheral has been initialized
    pub fn is_initialized(&self, id: PeripheralId) -> bool {
        self.lookup(id)
            .map(|(_, line)| line.is_initialized())
            .unwrap_or(false)
    }

    /// `embedded-io-async` view of one peripheral
    pub fn port(&self, id: PeripheralId) -> UartPort<'_, 'd, N> {
        UartPort::new(self, id)
    }

    /// Interrupt entry point for peripheral `id`
    ///
    /// Services the transmitter if its interrupt is enabled, then moves
    /// every received byte into the receive queue.
    pub fn on_interrupt(&self, id: PeripheralId) -> TxState {
        let Ok((hw, line)) = self.lookup(id) else {
            return TxState::Idle;
        };

        critical_section::with(|_| {
            let tx = if hw.tx_irq_enabled() {
                line.fill_fifo(hw);
                if line.tx.is_empty() {
                    hw.disable_tx_irq();
                    line.drained.signal(());
                    TxState::Drained
                } else {
                    TxState::Draining
                }
            } else {
                TxState::Idle
            };

            let mut lost = 0u32;
            while let Some(byte) = hw.read_byte() {
                if line.rx.try_send(byte).is_err() {
                    lost += 1;
                }
            }
            if lost > 0 {
                line.state.lock(|cell| {
                    let mut state = cell.borrow_mut();
                    state.dropped = state.dropped.saturating_add(lost);
                });
                warn!("uart{}: receive queue full, dropped {} bytes", id, lost);
            }

            tx
        })
    }
}
