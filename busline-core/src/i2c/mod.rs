//! I2C master driver
//!
//! Many tasks may submit transfers to the same peripheral; the driver runs
//! one hardware transaction at a time and queues the rest in FIFO order.
//!
//! Each outstanding transfer holds a [`Ticket`], an index into the
//! peripheral's arena of transfer slots and completion signals. The
//! interrupt handler only ever deals in tickets: it moves the finished
//! transfer back into its slot, signals the ticket and starts the next
//! queued transfer before returning.
//!
//! A submitter that is dropped mid-transfer gives its ticket up: a queued
//! transfer is skipped, an active one runs out and its result is discarded.

mod device;
pub mod protocol;
mod transfer;

use core::cell::RefCell;

use busline_hal::{I2cConfig, I2cHardware};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_sync::channel::Channel;
use embassy_sync::signal::Signal;
use embassy_time::{with_timeout, Duration};
use heapless::Deque;

pub use device::I2cDevice;
pub use protocol::{BusEvent, ProtocolDriver, ProtocolState};
pub use transfer::{Transfer, TransferStatus, MAX_TRANSFER_LEN};

use crate::error::I2cError;
use crate::registry::{PeripheralId, PeripheralTable};

/// Transfers that may wait behind the active one on each peripheral
pub const PENDING_QUEUE_DEPTH: usize = 32;

/// Transfer slots per peripheral: every pending transfer plus the active one
const SLOTS: usize = PENDING_QUEUE_DEPTH + 1;

/// Handle to a transfer slot and its completion signal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Ticket(u8);

impl Ticket {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// Transfer owned by the interrupt side
struct InFlight {
    ticket: Ticket,
    transfer: Transfer,
}

/// State shared between tasks and the interrupt handler
struct BusState {
    initialized: bool,
    protocol: ProtocolDriver,
    active: Option<InFlight>,
    pending: Deque<Ticket, PENDING_QUEUE_DEPTH>,
    slots: [Option<Transfer>; SLOTS],
    /// Tickets whose submitter stopped waiting
    abandoned: [bool; SLOTS],
}

impl BusState {
    const fn new() -> Self {
        Self {
            initialized: false,
            protocol: ProtocolDriver::new(),
            active: None,
            pending: Deque::new(),
            slots: [const { None }; SLOTS],
            abandoned: [false; SLOTS],
        }
    }

    fn reset(&mut self) {
        self.protocol.release();
        self.active = None;
        self.pending.clear();
        for slot in self.slots.iter_mut() {
            *slot = None;
        }
        self.abandoned = [false; SLOTS];
    }

    fn is_active(&self, ticket: Ticket) -> bool {
        self.active.as_ref().is_some_and(|a| a.ticket == ticket)
    }

    fn is_queued(&self, ticket: Ticket) -> bool {
        self.pending.iter().any(|t| *t == ticket)
    }
}

/// Per-peripheral bookkeeping
struct I2cBus {
    state: Mutex<CriticalSectionRawMutex, RefCell<BusState>>,
    tickets: Channel<CriticalSectionRawMutex, Ticket, SLOTS>,
    done: [Signal<CriticalSectionRawMutex, ()>; SLOTS],
}

impl I2cBus {
    const fn new() -> Self {
        Self {
            state: Mutex::new(RefCell::new(BusState::new())),
            tickets: Channel::new(),
            done: [const { Signal::new() }; SLOTS],
        }
    }

    fn is_initialized(&self) -> bool {
        self.state.lock(|cell| cell.borrow().initialized)
    }

    fn refill_tickets(&self) {
        self.tickets.clear();
        for index in 0..SLOTS {
            let _ = self.tickets.try_send(Ticket(index as u8));
        }
        for done in self.done.iter() {
            done.reset();
        }
    }

    fn release(&self, ticket: Ticket) {
        // Fails only if the pool was refilled by a re-initialize meanwhile
        let _ = self.tickets.try_send(ticket);
    }

    /// Return a finished transfer to its submitter
    fn complete(&self, state: &mut BusState, ticket: Ticket, transfer: Transfer) {
        if core::mem::take(&mut state.abandoned[ticket.index()]) {
            trace!("i2c: result for abandoned ticket {} discarded", ticket);
            self.release(ticket);
        } else {
            state.slots[ticket.index()] = Some(transfer);
            self.done[ticket.index()].signal(());
        }
    }

    /// Hand the bus to the oldest queued transfer, or go idle
    fn start_next(&self, state: &mut BusState, hw: &dyn I2cHardware) {
        while let Some(ticket) = state.pending.pop_front() {
            let Some(mut transfer) = state.slots[ticket.index()].take() else {
                continue;
            };
            if core::mem::take(&mut state.abandoned[ticket.index()]) {
                self.release(ticket);
                continue;
            }
            state.protocol.start(hw, &mut transfer);
            state.active = Some(InFlight { ticket, transfer });
            return;
        }
        state.protocol.release();
    }

    /// Give up on a ticket whose submitter is gone
    fn abandon(&self, ticket: Ticket) {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            if state.is_active(ticket) || state.is_queued(ticket) {
                state.abandoned[ticket.index()] = true;
            } else if state.slots[ticket.index()].take().is_some() {
                // Finished but never collected
                self.release(ticket);
            }
        });
    }
}

/// Ticket held by a waiting submitter; abandoned if dropped before
/// [`Claim::collect`]
struct Claim<'a> {
    bus: &'a I2cBus,
    ticket: Ticket,
}

impl Claim<'_> {
    /// Take the finished transfer and free the ticket
    fn collect(self) -> Option<Transfer> {
        let (bus, ticket) = (self.bus, self.ticket);
        core::mem::forget(self);
        let finished = bus
            .state
            .lock(|cell| cell.borrow_mut().slots[ticket.index()].take());
        bus.release(ticket);
        finished
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        self.bus.abandon(self.ticket);
    }
}

/// Interrupt-driven I2C master for up to `N` peripherals
pub struct I2cDriver<'d, const N: usize> {
    hardware: PeripheralTable<'d, dyn I2cHardware, N>,
    buses: [I2cBus; N],
}

impl<'d, const N: usize> I2cDriver<'d, N> {
    /// Create a driver over the given peripherals; nothing is touched
    /// until [`initialize`](Self::initialize)
    pub const fn new(hardware: PeripheralTable<'d, dyn I2cHardware, N>) -> Self {
        Self {
            hardware,
            buses: [const { I2cBus::new() }; N],
        }
    }

    fn lookup(&self, id: PeripheralId) -> Result<(&'d dyn I2cHardware, &I2cBus), I2cError> {
        let hw = self.hardware.get(id).ok_or(I2cError::InvalidId)?;
        let bus = self.buses.get(id.index()).ok_or(I2cError::InvalidId)?;
        Ok((hw, bus))
    }

    /// Initialize a peripheral at `clock_hz`
    pub fn initialize(&self, id: PeripheralId, clock_hz: u32) -> Result<(), I2cError> {
        self.initialize_with(id, &I2cConfig::with_frequency(clock_hz))
    }

    /// Initialize a peripheral with an explicit configuration
    pub fn initialize_with(&self, id: PeripheralId, config: &I2cConfig) -> Result<(), I2cError> {
        let (hw, bus) = self.lookup(id)?;
        if !config.is_valid() {
            return Err(I2cError::InvalidConfig);
        }

        bus.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            if state.initialized {
                return Err(I2cError::AlreadyInitialized);
            }
            state.reset();
            bus.refill_tickets();
            hw.init(config);
            hw.enable_irq();
            state.initialized = true;
            Ok(())
        })?;

        info!("i2c{}: initialized at {} Hz", id, config.frequency);
        Ok(())
    }

    /// Shut a peripheral down
    ///
    /// Refused with [`I2cError::Busy`] while a transfer is active or queued.
    pub fn deinitialize(&self, id: PeripheralId) -> Result<(), I2cError> {
        let (hw, bus) = self.lookup(id)?;

        bus.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            if !state.initialized {
                return Err(I2cError::NotInitialized);
            }
            if state.active.is_some() || !state.pending.is_empty() {
                return Err(I2cError::Busy);
            }
            hw.disable_irq();
            hw.deinit();
            state.reset();
            state.initialized = false;
            bus.tickets.clear();
            Ok(())
        })?;

        info!("i2c{}: deinitialized", id);
        Ok(())
    }

    /// Run a transfer and wait for it to finish
    ///
    /// Waits for a free transfer slot if every slot is taken. The transfer
    /// comes back with a terminal [`TransferStatus`]; protocol failures are
    /// reported there, not as an `Err`.
    pub async fn submit(&self, id: PeripheralId, transfer: Transfer) -> Result<Transfer, I2cError> {
        self.submit_inner(id, transfer, None).await
    }

    /// Like [`submit`](Self::submit), but give up with
    /// [`I2cError::QueueFull`] if no slot frees up within `timeout`
    ///
    /// The timeout only covers queueing. Once accepted the transfer runs to
    /// completion.
    pub async fn submit_with_timeout(
        &self,
        id: PeripheralId,
        transfer: Transfer,
        timeout: Duration,
    ) -> Result<Transfer, I2cError> {
        self.submit_inner(id, transfer, Some(timeout)).await
    }

    async fn submit_inner(
        &self,
        id: PeripheralId,
        mut transfer: Transfer,
        timeout: Option<Duration>,
    ) -> Result<Transfer, I2cError> {
        let (hw, bus) = self.lookup(id)?;
        if !bus.is_initialized() {
            return Err(I2cError::NotInitialized);
        }

        let ticket = match timeout {
            Some(timeout) => with_timeout(timeout, bus.tickets.receive())
                .await
                .map_err(|_| I2cError::QueueFull)?,
            None => bus.tickets.receive().await,
        };

        transfer.rewind();
        bus.done[ticket.index()].reset();

        // Start-or-enqueue is decided with the interrupt handler locked out
        let queued = bus.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            if !state.initialized {
                return Err(I2cError::NotInitialized);
            }
            if state.active.is_none() {
                trace!("i2c{}: start {=u8:#x}", id, transfer.address());
                let mut inflight = InFlight { ticket, transfer };
                state.protocol.start(hw, &mut inflight.transfer);
                state.active = Some(inflight);
            } else {
                state
                    .pending
                    .push_back(ticket)
                    .map_err(|_| I2cError::QueueFull)?;
                state.slots[ticket.index()] = Some(transfer);
            }
            Ok(())
        });
        if let Err(e) = queued {
            bus.release(ticket);
            return Err(e);
        }

        let claim = Claim { bus, ticket };
        bus.done[ticket.index()].wait().await;

        // Empty only if the peripheral was re-initialized under us
        claim.collect().ok_or(I2cError::NotInitialized)
    }

    /// Write `data` to the device at `address`
    pub async fn write(&self, id: PeripheralId, address: u8, data: &[u8]) -> Result<(), I2cError> {
        let transfer = self.submit(id, Transfer::write(address, data)?).await?;
        transfer.status().into_result()
    }

    /// Fill `buf` from the device at `address`
    pub async fn read(&self, id: PeripheralId, address: u8, buf: &mut [u8]) -> Result<(), I2cError> {
        let transfer = self.submit(id, Transfer::read(address, buf.len())?).await?;
        transfer.status().into_result()?;
        copy_received(&transfer, buf);
        Ok(())
    }

    /// Write `data` then fill `buf`, joined by a repeated START
    pub async fn write_read(
        &self,
        id: PeripheralId,
        address: u8,
        data: &[u8],
        buf: &mut [u8],
    ) -> Result<(), I2cError> {
        let transfer = self
            .submit(id, Transfer::write_read(address, data, buf.len())?)
            .await?;
        transfer.status().into_result()?;
        copy_received(&transfer, buf);
        Ok(())
    }

    /// `embedded-hal-async` view of one peripheral
    pub fn device(&self, id: PeripheralId) -> I2cDevice<'_, 'd, N> {
        I2cDevice::new(self, id)
    }

    /// Interrupt entry point for peripheral `id`
    ///
    /// Call from the peripheral's interrupt vector. Unknown ids and
    /// interrupts that are not pending are ignored.
    pub fn on_interrupt(&self, id: PeripheralId) {
        let Ok((hw, bus)) = self.lookup(id) else {
            return;
        };

        bus.state.lock(|cell| {
            let mut guard = cell.borrow_mut();
            let state = &mut *guard;
            if !hw.irq_pending() {
                return;
            }

            let Some(inflight) = state.active.as_mut() else {
                warn!("i2c{}: spurious interrupt, status {=u8:#x}", id, hw.status());
                hw.clear_start();
                hw.send_stop();
                hw.clear_irq();
                return;
            };

            let Some(status) = state.protocol.on_interrupt(hw, &mut inflight.transfer) else {
                return;
            };

            if let Some(InFlight {
                ticket,
                mut transfer,
            }) = state.active.take()
            {
                debug!(
                    "i2c{}: {=u8:#x} finished {}",
                    id,
                    transfer.address(),
                    status
                );
                transfer.set_status(status);
                bus.complete(state, ticket, transfer);
            }

            bus.start_next(state, hw);
        });
    }

    /// Whether the peripheral has been initialized
    pub fn is_initialized(&self, id: PeripheralId) -> bool {
        self.lookup(id)
            .map(|(_, bus)| bus.is_initialized())
            .unwrap_or(false)
    }

    /// Whether a transfer is on the bus
    pub fn is_busy(&self, id: PeripheralId) -> bool {
        self.lookup(id)
            .map(|(_, bus)| bus.state.lock(|cell| cell.borrow().active.is_some()))
            .unwrap_or(false)
    }

    /// Protocol state of the peripheral
    pub fn state(&self, id: PeripheralId) -> Option<ProtocolState> {
        let (_, bus) = self.lookup(id).ok()?;
        Some(bus.state.lock(|cell| cell.borrow().protocol.state()))
    }

    /// Transfers queued behind the active one
    pub fn pending(&self, id: PeripheralId) -> usize {
        self.lookup(id)
            .map(|(_, bus)| bus.state.lock(|cell| cell.borrow().pending.len()))
            .unwrap_or(0)
    }
}

fn copy_received(transfer: &Transfer, buf: &mut [u8]) {
    for (dst, src) in buf.iter_mut().zip(transfer.received()) {
        *dst = *src;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use busline_hal::i2c::status;
    use core::pin::pin;
    use busline_hal::mock::{SimDevice, SimI2c, WireEvent};
    use embassy_futures::block_on;
    use embassy_futures::join::{join, join3};
    use embassy_futures::select::{select, Either};
    use embassy_futures::yield_now;
    use std::vec::Vec;

    const BUS0: PeripheralId = PeripheralId(0);
    const BUS1: PeripheralId = PeripheralId(1);

    fn eeprom() -> SimDevice {
        SimDevice::with_memory(0x50, &[0xDE, 0xAD, 0xBE, 0xEF, 0x00, 0x11, 0x22, 0x33])
    }

    /// Act as the interrupt controller until `fut` completes
    fn run<F: core::future::Future>(driver: &I2cDriver<'_, 2>, sims: &[&SimI2c], fut: F) -> F::Output {
        block_on(async {
            let pump = async {
                loop {
                    for (i, sim) in sims.iter().enumerate() {
                        if sim.irq_pending() {
                            driver.on_interrupt(PeripheralId(i as u8));
                        }
                    }
                    yield_now().await;
                }
            };
            match select(fut, pump).await {
                Either::First(out) => out,
                Either::Second(_) => unreachable!(),
            }
        })
    }

    #[test]
    fn test_invalid_ids() {
        let sim = SimI2c::new();
        let driver: I2cDriver<'_, 2> = I2cDriver::new(PeripheralTable::new([Some(&sim), None]));

        assert_eq!(driver.initialize(BUS1, 100_000), Err(I2cError::InvalidId));
        assert_eq!(driver.initialize(PeripheralId(7), 100_000), Err(I2cError::InvalidId));
        assert_eq!(driver.deinitialize(BUS1), Err(I2cError::InvalidId));
        let t = Transfer::write(0x50, &[0]).unwrap();
        assert_eq!(block_on(driver.submit(BUS1, t)), Err(I2cError::InvalidId));
        assert!(!driver.is_initialized(BUS1));
        assert_eq!(driver.state(BUS1), None);
    }

    #[test]
    fn test_lifecycle() {
        let sim = SimI2c::new();
        let driver: I2cDriver<'_, 2> = I2cDriver::new(PeripheralTable::new([Some(&sim), None]));

        let t = Transfer::write(0x50, &[0]).unwrap();
        assert_eq!(block_on(driver.submit(BUS0, t)), Err(I2cError::NotInitialized));
        assert_eq!(driver.initialize(BUS0, 0), Err(I2cError::InvalidConfig));
        assert_eq!(driver.initialize(BUS0, 2_000_000), Err(I2cError::InvalidConfig));
        assert_eq!(driver.deinitialize(BUS0), Err(I2cError::NotInitialized));

        driver.initialize(BUS0, 400_000).unwrap();
        assert_eq!(sim.config(), Some(I2cConfig::FAST));
        assert!(sim.irq_enabled());
        assert_eq!(driver.initialize(BUS0, 400_000), Err(I2cError::AlreadyInitialized));
        assert_eq!(driver.state(BUS0), Some(ProtocolState::Idle));

        driver.deinitialize(BUS0).unwrap();
        assert!(!driver.is_initialized(BUS0));
        assert_eq!(sim.config(), None);

        driver.initialize(BUS0, 100_000).unwrap();
        assert!(driver.is_initialized(BUS0));
    }

    #[test]
    fn test_write_read_completes() {
        let sim = SimI2c::new().with_device(eeprom());
        let driver: I2cDriver<'_, 2> = I2cDriver::new(PeripheralTable::new([Some(&sim), None]));
        driver.initialize(BUS0, 100_000).unwrap();

        let t = Transfer::write_read(0x50, &[0x01], 2).unwrap();
        let done = run(&driver, &[&sim], driver.submit(BUS0, t)).unwrap();

        assert_eq!(done.status(), TransferStatus::Complete);
        assert_eq!(done.received(), &[0xAD, 0xBE]);
        assert_eq!(
            sim.events(),
            vec![
                WireEvent::Start,
                WireEvent::AddrWrite { address: 0x50, ack: true },
                WireEvent::DataWrite { byte: 0x01, ack: true },
                WireEvent::Restart,
                WireEvent::AddrRead { address: 0x50, ack: true },
                WireEvent::DataRead { byte: 0xAD, ack: true },
                WireEvent::DataRead { byte: 0xBE, ack: false },
                WireEvent::Stop,
            ]
        );
        assert!(!driver.is_busy(BUS0));
        assert_eq!(driver.state(BUS0), Some(ProtocolState::Idle));
    }

    #[test]
    fn test_rejected_address() {
        let sim = SimI2c::new().with_device(eeprom());
        let driver: I2cDriver<'_, 2> = I2cDriver::new(PeripheralTable::new([Some(&sim), None]));
        driver.initialize(BUS0, 100_000).unwrap();

        let t = Transfer::write(0x51, &[1, 2]).unwrap();
        let done = run(&driver, &[&sim], driver.submit(BUS0, t)).unwrap();
        assert_eq!(done.status(), TransferStatus::Rejected);
        assert_eq!(done.sent(), 0);
        assert!(!sim
            .events()
            .iter()
            .any(|e| matches!(e, WireEvent::DataWrite { .. })));

        let result = run(&driver, &[&sim], driver.write(BUS0, 0x51, &[1]));
        assert_eq!(result, Err(I2cError::Nak));
    }

    #[test]
    fn test_zero_length_transfer() {
        let sim = SimI2c::new();
        let driver: I2cDriver<'_, 2> = I2cDriver::new(PeripheralTable::new([Some(&sim), None]));
        driver.initialize(BUS0, 100_000).unwrap();

        let t = Transfer::new(0x10, &[], 0).unwrap();
        let done = run(&driver, &[&sim], driver.submit(BUS0, t)).unwrap();
        assert_eq!(done.status(), TransferStatus::Complete);
        assert_eq!(sim.events(), vec![WireEvent::Start, WireEvent::Stop]);
    }

    #[test]
    fn test_bus_error_is_reported() {
        let sim = SimI2c::new().with_device(eeprom());
        let driver: I2cDriver<'_, 2> = I2cDriver::new(PeripheralTable::new([Some(&sim), None]));
        driver.initialize(BUS0, 100_000).unwrap();

        sim.inject_fault(status::ARBITRATION_LOST);
        let mut buf = [0u8; 2];
        let result = run(&driver, &[&sim], driver.read(BUS0, 0x50, &mut buf));
        assert_eq!(result, Err(I2cError::Bus));

        // Next transfer is unaffected
        let result = run(&driver, &[&sim], driver.read(BUS0, 0x50, &mut buf));
        assert_eq!(result, Ok(()));
        assert_eq!(buf, [0xDE, 0xAD]);
    }

    #[test]
    fn test_fifo_order() {
        let sim = SimI2c::new().with_device(SimDevice::new(0x50, 8));
        let driver: I2cDriver<'_, 2> = I2cDriver::new(PeripheralTable::new([Some(&sim), None]));
        driver.initialize(BUS0, 100_000).unwrap();

        let a = Transfer::write(0x50, &[0, 0xA]).unwrap();
        let b = Transfer::write(0x50, &[0, 0xB]).unwrap();
        let c = Transfer::write(0x50, &[0, 0xC]).unwrap();

        let (ra, rb, rc) = run(
            &driver,
            &[&sim],
            join3(driver.submit(BUS0, a), driver.submit(BUS0, b), driver.submit(BUS0, c)),
        );
        for r in [&ra, &rb, &rc] {
            assert_eq!(r.as_ref().map(|t| t.status()), Ok(TransferStatus::Complete));
        }

        let written: Vec<u8> = sim
            .events()
            .iter()
            .filter_map(|e| match e {
                WireEvent::DataWrite { byte, .. } if *byte != 0 => Some(*byte),
                _ => None,
            })
            .collect();
        assert_eq!(written, vec![0xA, 0xB, 0xC]);
        assert_eq!(sim.memory(0x50).unwrap()[0], 0xC);
        assert_eq!(driver.pending(BUS0), 0);
    }

    #[test]
    fn test_queue_while_busy() {
        let sim = SimI2c::new().with_device(eeprom());
        let driver: I2cDriver<'_, 2> = I2cDriver::new(PeripheralTable::new([Some(&sim), None]));
        driver.initialize(BUS0, 100_000).unwrap();

        // Submit without pumping: the first transfer occupies the bus
        block_on(async {
            let first = driver.submit(BUS0, Transfer::read(0x50, 1).unwrap());
            let second = driver.submit(BUS0, Transfer::read(0x50, 1).unwrap());
            let observe = async {
                yield_now().await;
                assert!(driver.is_busy(BUS0));
                assert_eq!(driver.pending(BUS0), 1);
                assert_eq!(driver.deinitialize(BUS0), Err(I2cError::Busy));
                while driver.is_busy(BUS0) {
                    if sim.irq_pending() {
                        driver.on_interrupt(BUS0);
                    }
                    yield_now().await;
                }
            };
            let (a, b, ()) = join3(first, second, observe).await;
            // Reads continue from the device's auto-incremented pointer
            assert_eq!(a.unwrap().received(), &[0xDE]);
            assert_eq!(b.unwrap().received(), &[0xAD]);
        });

        driver.deinitialize(BUS0).unwrap();
    }

    #[test]
    fn test_many_submitters_one_transaction() {
        // SimI2c panics if a START overlaps an open transaction
        let sim = SimI2c::new().with_device(SimDevice::new(0x50, 64));
        let driver: I2cDriver<'_, 2> = I2cDriver::new(PeripheralTable::new([Some(&sim), None]));
        driver.initialize(BUS0, 100_000).unwrap();

        let task = |n: u8| {
            let driver = &driver;
            async move {
                for i in 0..4u8 {
                    let reg = n * 8 + i;
                    driver.write(BUS0, 0x50, &[reg, n]).await.unwrap();
                    let mut out = [0u8; 1];
                    driver.write_read(BUS0, 0x50, &[reg], &mut out).await.unwrap();
                    assert_eq!(out[0], n);
                }
            }
        };

        run(&driver, &[&sim], join(join(task(1), task(2)), join(task(3), task(4))));
        assert!(sim.is_idle());
    }

    #[test]
    fn test_peripherals_are_independent() {
        let sim0 = SimI2c::new().with_device(eeprom());
        let sim1 = SimI2c::new();
        let driver: I2cDriver<'_, 2> =
            I2cDriver::new(PeripheralTable::new([Some(&sim0), Some(&sim1)]));
        driver.initialize(BUS0, 100_000).unwrap();
        driver.initialize(BUS1, 400_000).unwrap();

        let mut buf = [0u8; 4];
        let (r0, r1) = run(
            &driver,
            &[&sim0, &sim1],
            join(
                driver.read(BUS0, 0x50, &mut buf),
                driver.write(BUS1, 0x50, &[1]),
            ),
        );
        assert_eq!(r0, Ok(()));
        assert_eq!(buf, [0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(r1, Err(I2cError::Nak));
    }

    #[test]
    fn test_spurious_interrupt_is_cleared() {
        let sim = SimI2c::new();
        let driver: I2cDriver<'_, 2> = I2cDriver::new(PeripheralTable::new([Some(&sim), None]));
        driver.initialize(BUS0, 100_000).unwrap();

        // Not pending: nothing happens
        driver.on_interrupt(BUS0);
        driver.on_interrupt(PeripheralId(9));
        assert!(sim.events().is_empty());

        // Pending with no transfer in flight: the bus is released
        sim.send_start();
        assert!(sim.irq_pending());
        driver.on_interrupt(BUS0);
        assert_eq!(driver.state(BUS0), Some(ProtocolState::Idle));
        assert!(!driver.is_busy(BUS0));
        assert!(!sim.irq_pending());
        assert!(sim.is_idle());
        assert_eq!(sim.events(), vec![WireEvent::Start, WireEvent::Stop]);

        // The bus is usable afterwards
        let done = run(&driver, &[&sim], driver.submit(BUS0, Transfer::new(0x10, &[], 0).unwrap()));
        assert_eq!(done.map(|t| t.status()), Ok(TransferStatus::Complete));
    }

    #[test]
    fn test_failed_transfer_does_not_stall_queue() {
        let sim = SimI2c::new().with_device(SimDevice::new(0x50, 8));
        let driver: I2cDriver<'_, 2> = I2cDriver::new(PeripheralTable::new([Some(&sim), None]));
        driver.initialize(BUS0, 100_000).unwrap();

        let a = Transfer::write(0x51, &[0, 0xA]).unwrap();
        let b = Transfer::write(0x50, &[0, 0xB]).unwrap();
        let c = Transfer::write(0x50, &[1, 0xC]).unwrap();

        let (ra, rb, rc) = run(
            &driver,
            &[&sim],
            join3(driver.submit(BUS0, a), driver.submit(BUS0, b), driver.submit(BUS0, c)),
        );
        assert_eq!(ra.map(|t| t.status()), Ok(TransferStatus::Rejected));
        assert_eq!(rb.map(|t| t.status()), Ok(TransferStatus::Complete));
        assert_eq!(rc.map(|t| t.status()), Ok(TransferStatus::Complete));
        assert_eq!(&sim.memory(0x50).unwrap()[..2], &[0xB, 0xC]);

        // Same after a bus error in the middle of the queue
        sim.clear_events();
        let d = Transfer::write(0x50, &[2, 0xD]).unwrap();
        let e = Transfer::write(0x50, &[3, 0xE]).unwrap();
        let (rd, re) = run(&driver, &[&sim], async {
            sim.inject_fault(status::BUS_ERROR);
            join(driver.submit(BUS0, d), driver.submit(BUS0, e)).await
        });
        assert_eq!(rd.map(|t| t.status()), Ok(TransferStatus::BusError));
        assert_eq!(re.map(|t| t.status()), Ok(TransferStatus::Complete));
        assert_eq!(sim.memory(0x50).unwrap()[3], 0xE);
        assert_eq!(driver.pending(BUS0), 0);
        assert!(sim.is_idle());
    }

    #[test]
    fn test_dropped_submit_frees_its_slot() {
        let sim = SimI2c::new().with_device(SimDevice::new(0x50, 8));
        let driver: I2cDriver<'_, 2> = I2cDriver::new(PeripheralTable::new([Some(&sim), None]));
        driver.initialize(BUS0, 100_000).unwrap();

        // More cancelled submits than there are slots
        for _ in 0..SLOTS + 2 {
            let t = Transfer::write(0x50, &[0, 0x55]).unwrap();
            let outcome = block_on(select(driver.submit(BUS0, t), yield_now()));
            assert!(matches!(outcome, Either::Second(())));
            assert!(driver.is_busy(BUS0));

            while sim.irq_pending() {
                driver.on_interrupt(BUS0);
            }
            assert!(!driver.is_busy(BUS0));
        }
        assert_eq!(driver.buses[0].tickets.len(), SLOTS);

        let t = Transfer::write(0x50, &[0]).unwrap();
        let done = run(
            &driver,
            &[&sim],
            driver.submit_with_timeout(BUS0, t, Duration::from_millis(20)),
        );
        assert_eq!(done.map(|t| t.status()), Ok(TransferStatus::Complete));
    }

    #[test]
    fn test_dropped_queued_submit_is_skipped() {
        let sim = SimI2c::new().with_device(SimDevice::new(0x50, 8));
        let driver: I2cDriver<'_, 2> = I2cDriver::new(PeripheralTable::new([Some(&sim), None]));
        driver.initialize(BUS0, 100_000).unwrap();

        let first = block_on(async {
            let mut first = pin!(driver.submit(BUS0, Transfer::write(0x50, &[0, 0x11]).unwrap()));
            let _ = select(first.as_mut(), yield_now()).await;
            assert!(driver.is_busy(BUS0));

            // Queued behind `first`, then cancelled
            let t = Transfer::write(0x50, &[1, 0x77]).unwrap();
            let _ = select(driver.submit(BUS0, t), yield_now()).await;
            assert_eq!(driver.pending(BUS0), 1);

            let pump = async {
                loop {
                    if sim.irq_pending() {
                        driver.on_interrupt(BUS0);
                    }
                    yield_now().await;
                }
            };
            match select(first, pump).await {
                Either::First(out) => out,
                Either::Second(_) => unreachable!(),
            }
        });

        assert_eq!(first.map(|t| t.status()), Ok(TransferStatus::Complete));
        assert!(!driver.is_busy(BUS0));
        assert_eq!(driver.pending(BUS0), 0);
        assert!(!sim
            .events()
            .iter()
            .any(|e| matches!(e, WireEvent::DataWrite { byte: 0x77, .. })));
        assert_eq!(driver.buses[0].tickets.len(), SLOTS);
    }

    #[test]
    fn test_uncollected_result_frees_its_slot() {
        let sim = SimI2c::new().with_device(SimDevice::new(0x50, 8));
        let driver: I2cDriver<'_, 2> = I2cDriver::new(PeripheralTable::new([Some(&sim), None]));
        driver.initialize(BUS0, 100_000).unwrap();

        block_on(async {
            let mut fut = pin!(driver.submit(BUS0, Transfer::write(0x50, &[0]).unwrap()));
            let _ = select(fut.as_mut(), yield_now()).await;
            // Finishes on the interrupt side, but the submitter never looks
            while sim.irq_pending() {
                driver.on_interrupt(BUS0);
            }
        });

        assert!(!driver.is_busy(BUS0));
        assert_eq!(driver.buses[0].tickets.len(), SLOTS);
    }

    #[test]
    fn test_submit_timeout_when_slots_exhausted() {
        let sim = SimI2c::new().with_device(eeprom());
        let driver: I2cDriver<'_, 2> = I2cDriver::new(PeripheralTable::new([Some(&sim), None]));
        driver.initialize(BUS0, 100_000).unwrap();

        block_on(async {
            // Hold every ticket so no slot is available
            let mut held = Vec::new();
            let bus = &driver.buses[0];
            while let Ok(ticket) = bus.tickets.try_receive() {
                held.push(ticket);
            }
            assert_eq!(held.len(), SLOTS);

            let t = Transfer::write(0x50, &[0]).unwrap();
            let result = driver
                .submit_with_timeout(BUS0, t, Duration::from_millis(5))
                .await;
            assert_eq!(result, Err(I2cError::QueueFull));

            for ticket in held {
                bus.release(ticket);
            }
        });

        let t = Transfer::write(0x50, &[0]).unwrap();
        let done = run(
            &driver,
            &[&sim],
            driver.submit_with_timeout(BUS0, t, Duration::from_millis(5)),
        );
        assert_eq!(done.map(|t| t.status()), Ok(TransferStatus::Complete));
    }
}
