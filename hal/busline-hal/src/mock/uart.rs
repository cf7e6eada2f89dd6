//! Simulated UART with hardware FIFOs

use std::collections::VecDeque;
use std::sync::Mutex;

use super::lock;
use crate::uart::{UartConfig, UartHardware};

/// Depth of the simulated transmit and receive FIFOs
pub const FIFO_DEPTH: usize = 16;

#[derive(Debug, Default)]
struct SimUartState {
    config: Option<UartConfig>,
    irq_enabled: bool,
    tx_irq_enabled: bool,
    rx_irq_enabled: bool,
    tx_fifo: VecDeque<u8>,
    rx_fifo: VecDeque<u8>,
    wire: Vec<u8>,
    loopback: bool,
    overruns: usize,
}

impl SimUartState {
    fn receive(&mut self, byte: u8) -> bool {
        if self.rx_fifo.len() < FIFO_DEPTH {
            self.rx_fifo.push_back(byte);
            true
        } else {
            self.overruns += 1;
            false
        }
    }
}

/// Simulated 16550-style UART
///
/// Bytes written by the driver sit in the transmit FIFO until the test
/// calls [`shift`](Self::shift), which moves one character onto the wire.
/// With loopback enabled transmitted bytes are fed back into the receive
/// FIFO.
#[derive(Debug, Default)]
pub struct SimUart {
    state: Mutex<SimUartState>,
}

impl SimUart {
    /// Create a UART with its transmitter wired to nothing
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a UART with its transmitter wired to its own receiver
    pub fn loopback() -> Self {
        let uart = Self::default();
        lock(&uart.state).loopback = true;
        uart
    }

    /// Transmit one character from the FIFO onto the wire
    ///
    /// Returns false when the transmit FIFO was empty.
    pub fn shift(&self) -> bool {
        let mut state = lock(&self.state);
        let Some(byte) = state.tx_fifo.pop_front() else {
            return false;
        };
        state.wire.push(byte);
        if state.loopback {
            state.receive(byte);
        }
        true
    }

    /// Deliver bytes to the receive FIFO, returns how many fit
    pub fn inject(&self, data: &[u8]) -> usize {
        let mut state = lock(&self.state);
        data.iter().filter(|&&b| state.receive(b)).count()
    }

    /// Whether the interrupt line would fire now
    pub fn irq_pending(&self) -> bool {
        let state = lock(&self.state);
        state.irq_enabled
            && ((state.tx_irq_enabled && state.tx_fifo.is_empty())
                || (state.rx_irq_enabled && !state.rx_fifo.is_empty()))
    }

    /// Bytes that have left the transmitter
    pub fn transmitted(&self) -> Vec<u8> {
        lock(&self.state).wire.clone()
    }

    /// Bytes still waiting in the transmit FIFO
    pub fn tx_fifo_len(&self) -> usize {
        lock(&self.state).tx_fifo.len()
    }

    /// Bytes lost because the receive FIFO was full
    pub fn overruns(&self) -> usize {
        lock(&self.state).overruns
    }

    /// Configuration programmed by `init`, `None` when powered down
    pub fn config(&self) -> Option<UartConfig> {
        lock(&self.state).config
    }

    /// Whether the receive interrupt is enabled
    pub fn rx_irq_enabled(&self) -> bool {
        lock(&self.state).rx_irq_enabled
    }
}

impl UartHardware for SimUart {
    fn init(&self, config: &UartConfig) {
        let mut state = lock(&self.state);
        state.config = Some(*config);
        state.tx_fifo.clear();
        state.rx_fifo.clear();
    }

    fn deinit(&self) {
        let mut state = lock(&self.state);
        state.config = None;
        state.irq_enabled = false;
        state.tx_irq_enabled = false;
        state.rx_irq_enabled = false;
    }

    fn enable_irq(&self) {
        lock(&self.state).irq_enabled = true;
    }

    fn disable_irq(&self) {
        lock(&self.state).irq_enabled = false;
    }

    fn enable_tx_irq(&self) {
        lock(&self.state).tx_irq_enabled = true;
    }

    fn disable_tx_irq(&self) {
        lock(&self.state).tx_irq_enabled = false;
    }

    fn tx_irq_enabled(&self) -> bool {
        lock(&self.state).tx_irq_enabled
    }

    fn enable_rx_irq(&self) {
        lock(&self.state).rx_irq_enabled = true;
    }

    fn disable_rx_irq(&self) {
        lock(&self.state).rx_irq_enabled = false;
    }

    fn tx_ready(&self) -> bool {
        lock(&self.state).tx_fifo.len() < FIFO_DEPTH
    }

    fn write_byte(&self, byte: u8) {
        let mut state = lock(&self.state);
        assert!(
            state.tx_fifo.len() < FIFO_DEPTH,
            "write to a full transmit FIFO"
        );
        state.tx_fifo.push_back(byte);
    }

    fn read_byte(&self) -> Option<u8> {
        lock(&self.state).rx_fifo.pop_front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fifo_fills_and_shifts() {
        let uart = SimUart::new();
        uart.init(&UartConfig::default());

        for i in 0..FIFO_DEPTH as u8 {
            assert!(uart.tx_ready());
            uart.write_byte(i);
        }
        assert!(!uart.tx_ready());

        assert!(uart.shift());
        assert!(uart.tx_ready());
        assert_eq!(uart.transmitted(), vec![0]);
    }

    #[test]
    fn test_loopback_receives() {
        let uart = SimUart::loopback();
        uart.init(&UartConfig::default());
        uart.write_byte(b'x');
        uart.shift();
        assert_eq!(uart.read_byte(), Some(b'x'));
        assert_eq!(uart.read_byte(), None);
    }

    #[test]
    fn test_inject_overruns() {
        let uart = SimUart::new();
        let data = [0u8; FIFO_DEPTH + 4];
        assert_eq!(uart.inject(&data), FIFO_DEPTH);
        assert_eq!(uart.overruns(), 4);
    }

    #[test]
    fn test_irq_pending_sources() {
        let uart = SimUart::new();
        uart.init(&UartConfig::default());
        uart.enable_irq();
        assert!(!uart.irq_pending());

        uart.enable_tx_irq();
        assert!(uart.irq_pending());
        uart.disable_tx_irq();

        uart.enable_rx_irq();
        uart.inject(b"a");
        assert!(uart.irq_pending());
    }
}
