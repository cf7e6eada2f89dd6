//! Simulated I2C controller and bus

use std::sync::Mutex;

use super::lock;
use crate::i2c::{status, I2cConfig, I2cHardware};

/// Bus-level event observed on the simulated wire
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireEvent {
    /// START condition
    Start,
    /// Repeated START condition
    Restart,
    /// SLA+W byte and whether a device acknowledged it
    AddrWrite { address: u8, ack: bool },
    /// Payload byte written by the master
    DataWrite { byte: u8, ack: bool },
    /// SLA+R byte and whether a device acknowledged it
    AddrRead { address: u8, ack: bool },
    /// Payload byte read by the master, `ack` is the master's response
    DataRead { byte: u8, ack: bool },
    /// STOP condition
    Stop,
}

/// Memory-style slave device (EEPROM/FeRAM-like)
///
/// The first byte of a write phase sets the register pointer; further
/// bytes are stored at the pointer, which auto-increments and wraps.
/// Reads return bytes from the pointer onwards.
#[derive(Debug, Clone)]
pub struct SimDevice {
    address: u8,
    memory: Vec<u8>,
    pointer: usize,
    pointer_set: bool,
    accepted: usize,
    nak_after: Option<usize>,
}

impl SimDevice {
    /// Create a device with zeroed memory of `size` bytes
    pub fn new(address: u8, size: usize) -> Self {
        Self::with_memory(address, &vec![0; size.max(1)])
    }

    /// Create a device with the given initial memory contents
    pub fn with_memory(address: u8, memory: &[u8]) -> Self {
        let mut memory = memory.to_vec();
        if memory.is_empty() {
            memory.push(0);
        }
        Self {
            address,
            memory,
            pointer: 0,
            pointer_set: false,
            accepted: 0,
            nak_after: None,
        }
    }

    /// NAK every data byte after the first `count` of a write phase
    pub fn nak_after(mut self, count: usize) -> Self {
        self.nak_after = Some(count);
        self
    }

    /// Device address
    pub fn address(&self) -> u8 {
        self.address
    }

    /// Device memory contents
    pub fn memory(&self) -> &[u8] {
        &self.memory
    }

    fn begin_write(&mut self) {
        self.pointer_set = false;
        self.accepted = 0;
    }

    fn accept(&mut self, byte: u8) -> bool {
        if let Some(limit) = self.nak_after {
            if self.accepted >= limit {
                return false;
            }
        }
        self.accepted += 1;

        if !self.pointer_set {
            self.pointer = byte as usize % self.memory.len();
            self.pointer_set = true;
        } else {
            self.memory[self.pointer] = byte;
            self.pointer = (self.pointer + 1) % self.memory.len();
        }
        true
    }

    fn next_read(&mut self) -> u8 {
        let byte = self.memory[self.pointer];
        self.pointer = (self.pointer + 1) % self.memory.len();
        byte
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    /// Bus free
    Idle,
    /// START sent, expecting an address byte
    Address,
    /// Write phase to the device at this index
    Write(usize),
    /// Read phase from the device at this index
    Read(usize),
    /// Transfer refused, master must STOP
    Hold,
}

#[derive(Debug)]
struct SimI2cState {
    config: Option<I2cConfig>,
    irq_enabled: bool,
    phase: Phase,
    si: bool,
    sta: bool,
    sto: bool,
    aa: bool,
    status: u8,
    tx_data: Option<u8>,
    rx_data: u8,
    fault: Option<u8>,
    devices: Vec<SimDevice>,
    events: Vec<WireEvent>,
}

impl SimI2cState {
    fn raise(&mut self, code: u8) {
        self.status = self.fault.take().unwrap_or(code);
        self.si = true;
    }

    fn find(&self, address: u8) -> Option<usize> {
        self.devices.iter().position(|d| d.address == address)
    }

    /// Perform the bus action programmed while the event was pending
    fn advance(&mut self) {
        if self.sto {
            self.sto = false;
            self.sta = false;
            self.events.push(WireEvent::Stop);
            self.phase = Phase::Idle;
            return;
        }

        if self.sta {
            self.events.push(WireEvent::Restart);
            self.phase = Phase::Address;
            self.raise(status::REPEATED_START);
            return;
        }

        match self.phase {
            Phase::Address => {
                let Some(byte) = self.tx_data.take() else {
                    self.raise(status::BUS_ERROR);
                    return;
                };
                let address = byte >> 1;
                let reading = byte & 1 == 1;
                let device = self.find(address);
                let ack = device.is_some();

                if reading {
                    self.events.push(WireEvent::AddrRead { address, ack });
                } else {
                    self.events.push(WireEvent::AddrWrite { address, ack });
                }

                match (device, reading) {
                    (Some(index), true) => {
                        self.phase = Phase::Read(index);
                        self.raise(status::ADDR_R_ACK);
                    }
                    (Some(index), false) => {
                        self.devices[index].begin_write();
                        self.phase = Phase::Write(index);
                        self.raise(status::ADDR_W_ACK);
                    }
                    (None, true) => {
                        self.phase = Phase::Hold;
                        self.raise(status::ADDR_R_NAK);
                    }
                    (None, false) => {
                        self.phase = Phase::Hold;
                        self.raise(status::ADDR_W_NAK);
                    }
                }
            }
            Phase::Write(index) => {
                let Some(byte) = self.tx_data.take() else {
                    self.raise(status::BUS_ERROR);
                    return;
                };
                let ack = self.devices[index].accept(byte);
                self.events.push(WireEvent::DataWrite { byte, ack });
                if ack {
                    self.raise(status::DATA_W_ACK);
                } else {
                    self.phase = Phase::Hold;
                    self.raise(status::DATA_W_NAK);
                }
            }
            Phase::Read(index) => {
                let byte = self.devices[index].next_read();
                let ack = self.aa;
                self.rx_data = byte;
                self.events.push(WireEvent::DataRead { byte, ack });
                if ack {
                    self.raise(status::DATA_R_ACK);
                } else {
                    self.phase = Phase::Hold;
                    self.raise(status::DATA_R_NAK);
                }
            }
            Phase::Hold => self.raise(status::BUS_ERROR),
            Phase::Idle => {}
        }
    }
}

/// Simulated byte-oriented I2C controller with attached slave devices
///
/// Records every bus condition in a [`WireEvent`] log. Issuing a START
/// while another transaction is still open panics, which makes the
/// one-transaction-per-bus rule observable in tests.
#[derive(Debug)]
pub struct SimI2c {
    state: Mutex<SimI2cState>,
}

impl Default for SimI2c {
    fn default() -> Self {
        Self::new()
    }
}

impl SimI2c {
    /// Create a bus with no devices attached
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimI2cState {
                config: None,
                irq_enabled: false,
                phase: Phase::Idle,
                si: false,
                sta: false,
                sto: false,
                aa: false,
                status: status::NO_INFO,
                tx_data: None,
                rx_data: 0,
                fault: None,
                devices: Vec::new(),
                events: Vec::new(),
            }),
        }
    }

    /// Attach a device (builder style)
    pub fn with_device(self, device: SimDevice) -> Self {
        self.attach(device);
        self
    }

    /// Attach a device
    pub fn attach(&self, device: SimDevice) {
        lock(&self.state).devices.push(device);
    }

    /// Report `code` instead of the real status on the next bus event
    pub fn inject_fault(&self, code: u8) {
        lock(&self.state).fault = Some(code);
    }

    /// Wire events recorded so far
    pub fn events(&self) -> Vec<WireEvent> {
        lock(&self.state).events.clone()
    }

    /// Clear the wire event log
    pub fn clear_events(&self) {
        lock(&self.state).events.clear();
    }

    /// Memory contents of the device at `address`
    pub fn memory(&self, address: u8) -> Option<Vec<u8>> {
        let state = lock(&self.state);
        state
            .devices
            .iter()
            .find(|d| d.address == address)
            .map(|d| d.memory.clone())
    }

    /// Configuration programmed by `init`, `None` when powered down
    pub fn config(&self) -> Option<I2cConfig> {
        lock(&self.state).config
    }

    /// Whether the interrupt line is unmasked
    pub fn irq_enabled(&self) -> bool {
        lock(&self.state).irq_enabled
    }

    /// Whether the bus is free (no transaction open)
    pub fn is_idle(&self) -> bool {
        lock(&self.state).phase == Phase::Idle
    }
}

impl I2cHardware for SimI2c {
    fn init(&self, config: &I2cConfig) {
        let mut state = lock(&self.state);
        state.config = Some(*config);
        state.phase = Phase::Idle;
        state.si = false;
        state.sta = false;
        state.sto = false;
    }

    fn deinit(&self) {
        let mut state = lock(&self.state);
        state.config = None;
        state.irq_enabled = false;
    }

    fn enable_irq(&self) {
        lock(&self.state).irq_enabled = true;
    }

    fn disable_irq(&self) {
        lock(&self.state).irq_enabled = false;
    }

    fn irq_pending(&self) -> bool {
        let state = lock(&self.state);
        state.si && state.irq_enabled
    }

    fn status(&self) -> u8 {
        lock(&self.state).status
    }

    fn clear_irq(&self) {
        let mut state = lock(&self.state);
        if state.si {
            state.si = false;
            state.advance();
        }
    }

    fn send_start(&self) {
        let mut state = lock(&self.state);
        state.sta = true;

        if state.si {
            // Repeated START, performed when the current event is cleared
            return;
        }

        assert!(
            state.phase == Phase::Idle,
            "START issued while a transaction is in progress"
        );
        state.events.push(WireEvent::Start);
        state.phase = Phase::Address;
        state.raise(status::START);
    }

    fn clear_start(&self) {
        lock(&self.state).sta = false;
    }

    fn send_stop(&self) {
        lock(&self.state).sto = true;
    }

    fn write_byte(&self, byte: u8) {
        lock(&self.state).tx_data = Some(byte);
    }

    fn read_byte(&self) -> u8 {
        lock(&self.state).rx_data
    }

    fn set_ack(&self, ack: bool) {
        lock(&self.state).aa = ack;
    }
}
