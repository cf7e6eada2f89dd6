//! I2C master protocol state machine
//!
//! Drives one transfer through the byte-oriented controller. The driver is
//! stepped once per controller interrupt: it decodes the status code,
//! programs the next bus action and acknowledges the interrupt. Nothing in
//! here blocks, so it is safe to call from interrupt context.
//!
//! ```text
//! Idle -> SendingStart -+-> SendingAddrWrite -> WritingData -+-> SendingStop
//!                       |                                    |
//!                       |          SendingRestart <----------+
//!                       |               |
//!                       +-> SendingAddrRead -> ReadingData ----> SendingStop
//! ```

use busline_hal::i2c::{address_read, address_write, status};
use busline_hal::I2cHardware;

use super::transfer::{Transfer, TransferStatus};

/// Protocol states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolState {
    /// No transaction on the bus
    #[default]
    Idle,
    /// START requested
    SendingStart,
    /// SLA+W loaded
    SendingAddrWrite,
    /// Outbound data byte loaded
    WritingData,
    /// Repeated START requested
    SendingRestart,
    /// SLA+R loaded
    SendingAddrRead,
    /// Receiving inbound bytes
    ReadingData,
    /// STOP requested, waiting for the queue to start the next transfer
    SendingStop,
}

/// Controller status decoded into a bus event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum BusEvent {
    BusError,
    Start,
    RepeatedStart,
    AddrWriteAck,
    AddrWriteNak,
    DataWriteAck,
    DataWriteNak,
    ArbitrationLost,
    AddrReadAck,
    AddrReadNak,
    DataReadAck,
    DataReadNak,
    /// Status code with no master-mode meaning
    Unknown(u8),
}

impl BusEvent {
    /// Decode a controller status code
    pub fn decode(code: u8) -> Self {
        match code {
            status::BUS_ERROR => BusEvent::BusError,
            status::START => BusEvent::Start,
            status::REPEATED_START => BusEvent::RepeatedStart,
            status::ADDR_W_ACK => BusEvent::AddrWriteAck,
            status::ADDR_W_NAK => BusEvent::AddrWriteNak,
            status::DATA_W_ACK => BusEvent::DataWriteAck,
            status::DATA_W_NAK => BusEvent::DataWriteNak,
            status::ARBITRATION_LOST => BusEvent::ArbitrationLost,
            status::ADDR_R_ACK => BusEvent::AddrReadAck,
            status::ADDR_R_NAK => BusEvent::AddrReadNak,
            status::DATA_R_ACK => BusEvent::DataReadAck,
            status::DATA_R_NAK => BusEvent::DataReadNak,
            other => BusEvent::Unknown(other),
        }
    }
}

/// Per-peripheral protocol driver
#[derive(Debug, Default)]
pub struct ProtocolDriver {
    state: ProtocolState,
}

impl ProtocolDriver {
    pub const fn new() -> Self {
        Self {
            state: ProtocolState::Idle,
        }
    }

    /// Current state
    pub fn state(&self) -> ProtocolState {
        self.state
    }

    /// Request a START for `transfer`
    ///
    /// Only called from `Idle`, or from `SendingStop` when the queue hands
    /// over the next transfer.
    pub fn start(&mut self, hw: &dyn I2cHardware, transfer: &mut Transfer) {
        transfer.rewind();
        self.state = ProtocolState::SendingStart;
        hw.send_start();
    }

    /// Return to `Idle` after the final STOP
    pub fn release(&mut self) {
        self.state = ProtocolState::Idle;
    }

    /// Advance on a controller interrupt
    ///
    /// Returns the terminal status once the transfer has finished and a
    /// STOP has been issued.
    pub fn on_interrupt(
        &mut self,
        hw: &dyn I2cHardware,
        transfer: &mut Transfer,
    ) -> Option<TransferStatus> {
        let event = BusEvent::decode(hw.status());
        let outcome = self.step(hw, transfer, event);
        // The next bus action is programmed; let the controller run it
        hw.clear_irq();
        outcome
    }

    fn step(
        &mut self,
        hw: &dyn I2cHardware,
        transfer: &mut Transfer,
        event: BusEvent,
    ) -> Option<TransferStatus> {
        use BusEvent::*;
        use ProtocolState::*;

        match (self.state, event) {
            (SendingStart, Start) => {
                hw.clear_start();
                if transfer.has_outbound() {
                    hw.write_byte(address_write(transfer.address()));
                    self.state = SendingAddrWrite;
                    None
                } else if transfer.remaining() > 0 {
                    hw.write_byte(address_read(transfer.address()));
                    self.state = SendingAddrRead;
                    None
                } else {
                    self.stop(hw, TransferStatus::Complete)
                }
            }

            (SendingAddrWrite, AddrWriteAck) | (WritingData, DataWriteAck) => {
                if let Some(byte) = transfer.next_outbound() {
                    hw.write_byte(byte);
                    self.state = WritingData;
                    None
                } else if transfer.remaining() > 0 {
                    hw.send_start();
                    self.state = SendingRestart;
                    None
                } else {
                    self.stop(hw, TransferStatus::Complete)
                }
            }

            (SendingAddrWrite, AddrWriteNak)
            | (WritingData, DataWriteNak)
            | (SendingAddrRead, AddrReadNak) => self.stop(hw, TransferStatus::Rejected),

            (SendingRestart, RepeatedStart) => {
                hw.clear_start();
                hw.write_byte(address_read(transfer.address()));
                self.state = SendingAddrRead;
                None
            }

            (SendingAddrRead, AddrReadAck) => {
                hw.set_ack(transfer.remaining() > 1);
                self.state = ReadingData;
                None
            }

            (ReadingData, DataReadAck) | (ReadingData, DataReadNak) => {
                transfer.store(hw.read_byte());
                match transfer.remaining() {
                    0 => self.stop(hw, TransferStatus::Complete),
                    // We returned NAK, the slave has stopped driving the bus
                    _ if event == DataReadNak => self.stop(hw, TransferStatus::BusError),
                    1 => {
                        hw.set_ack(false);
                        None
                    }
                    _ => None,
                }
            }

            // No transfer to drive: release the bus so the controller
            // cannot keep it with a latched START
            (Idle, _) | (SendingStop, _) => {
                hw.clear_start();
                hw.send_stop();
                None
            }

            (state, event) => {
                warn!("i2c: unexpected {} in {}", event, state);
                self.stop(hw, TransferStatus::BusError)
            }
        }
    }

    fn stop(&mut self, hw: &dyn I2cHardware, status: TransferStatus) -> Option<TransferStatus> {
        hw.send_stop();
        self.state = ProtocolState::SendingStop;
        Some(status)
    }
}
