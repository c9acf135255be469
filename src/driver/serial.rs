//! IRQ-driven 16550 UART driver.
//!
//! Grounded on the reference kernel's `src/driver/serial.rs`: same
//! init sequence (disable interrupts, set divisor via DLAB, 8N1, enable
//! FIFO, loopback self-test, return to normal mode) and the same
//! [`LineStatus`] bitflags register. The reference kernel hands bytes off
//! to an async worker task woken by the IRQ; this kernel has no async
//! executor, so the IRQ handler drains the hardware FIFOs directly into
//! fixed-capacity ring buffers that `read_byte_nonblock`/`write_byte`
//! drive synchronously, suspending via `schedule()` when a ring is empty
//! or full (see the "Suspension points" design note).

use alloc::collections::VecDeque;
use bitflags::bitflags;

use crate::prelude::*;
use khal::io::{inb, outb};

const COM1_BASE: u16 = 0x3F8;
const COM1_IRQ: u8 = 4;
const COM2_BASE: u16 = 0x2F8;
const COM2_IRQ: u8 = 3;

const REG_DATA: u16 = 0;
const REG_INT_ENABLE: u16 = 1;
const REG_FIFO_CTRL: u16 = 2;
const REG_LINE_CTRL: u16 = 3;
const REG_MODEM_CTRL: u16 = 4;
const REG_LINE_STATUS: u16 = 5;

const TX_RING_CAPACITY: usize = 256;
const RX_RING_CAPACITY: usize = 1024;

bitflags! {
    struct LineStatus: u8 {
        const RX_READY = 0x01;
        const OVERRUN = 0x02;
        const TX_READY = 0x20;
    }
}

pub struct Serial {
    base: u16,
    tx_ring: Mutex<VecDeque<u8>>,
    rx_ring: Mutex<VecDeque<u8>>,
}

impl Serial {
    fn reg(&self, offset: u16) -> u16 {
        self.base + offset
    }

    fn line_status(&self) -> LineStatus {
        LineStatus::from_bits_truncate(inb(self.reg(REG_LINE_STATUS)))
    }

    /// Bring up the UART and run the standard loopback self-test.
    fn new(base: u16) -> KResult<Self> {
        outb(base + REG_INT_ENABLE, 0x00);
        outb(base + REG_LINE_CTRL, 0x80); // enable DLAB
        outb(base + REG_DATA, 0x01); // divisor lo: 115200 baud
        outb(base + REG_INT_ENABLE, 0x00); // divisor hi
        outb(base + REG_LINE_CTRL, 0x03); // 8N1, DLAB off
        outb(base + REG_FIFO_CTRL, 0xC7); // enable+clear FIFOs, 14-byte threshold
        outb(base + REG_MODEM_CTRL, 0x1E); // loopback mode

        outb(base + REG_DATA, 0xAE);
        if inb(base + REG_DATA) != 0xAE {
            return Err(Error::Io { sector: 0 });
        }

        outb(base + REG_MODEM_CTRL, 0x0B); // normal operation, IRQs enabled, RTS/DSR
        outb(base + REG_INT_ENABLE, 0x01); // enable "data available" interrupt

        Ok(Self {
            base,
            tx_ring: Mutex::new(VecDeque::with_capacity(TX_RING_CAPACITY)),
            rx_ring: Mutex::new(VecDeque::with_capacity(RX_RING_CAPACITY)),
        })
    }

    fn kick_tx(&self) {
        let mut tx = self.tx_ring.lock();
        while self.line_status().contains(LineStatus::TX_READY) {
            match tx.pop_front() {
                Some(byte) => outb(self.reg(REG_DATA), byte),
                None => break,
            }
        }
    }

    /// Run from the IRQ handler: drain the RX FIFO into the ring, then
    /// refill the TX FIFO from whatever is queued.
    pub fn irq_handler(&self) {
        while self.line_status().contains(LineStatus::RX_READY) {
            let byte = inb(self.reg(REG_DATA));
            let mut rx = self.rx_ring.lock();
            if rx.len() < RX_RING_CAPACITY {
                rx.push_back(byte);
            }
            // else: ring full, byte dropped — no backpressure mechanism
            // exists below the kernel boundary on real UART hardware.
        }
        self.kick_tx();
    }

    /// Enqueue `byte` for transmission, suspending the caller if the TX
    /// ring is full and the scheduler is running (per the spec's
    /// suspension-point list).
    pub fn write_byte(&self, byte: u8) {
        loop {
            {
                let mut tx = self.tx_ring.lock();
                if tx.len() < TX_RING_CAPACITY {
                    tx.push_back(byte);
                    drop(tx);
                    self.kick_tx();
                    return;
                }
            }
            if crate::kernel::task::scheduler::is_running() {
                crate::kernel::task::scheduler::task_yield();
            } else {
                self.kick_tx();
            }
        }
    }

    pub fn read_byte_nonblock(&self) -> Option<u8> {
        self.rx_ring.lock().pop_front()
    }

    pub fn bytes_available(&self) -> usize {
        self.rx_ring.lock().len()
    }

    pub fn clear_rx(&self) {
        self.rx_ring.lock().clear();
    }
}

lazy_static::lazy_static! {
    pub static ref COM1: Serial = Serial::new(COM1_BASE).expect("COM1 self-test failed");
    pub static ref COM2: Serial = Serial::new(COM2_BASE).expect("COM2 self-test failed");
}

struct SerialConsole;

impl klog::ConsoleWrite for SerialConsole {
    fn write(&self, s: &str) {
        for &b in s.as_bytes() {
            COM1.write_byte(b);
        }
    }
}

/// Bring up both UARTs, register their IRQ handlers and wire COM1 as the
/// kernel's debug console sink (COM2 is available as `/dev/ttyS1` wiring
/// for a future chardev, but carries no console duty per the spec's
/// "byte-oriented debug sink" external-collaborator contract, which names
/// only one sink).
pub fn init() -> KResult<()> {
    lazy_static::initialize(&COM1);
    lazy_static::initialize(&COM2);
    klog::set_console(alloc::sync::Arc::new(SerialConsole));
    crate::kernel::irq::register_irq_handler(COM1_IRQ, || COM1.irq_handler());
    crate::kernel::irq::register_irq_handler(COM2_IRQ, || COM2.irq_handler());
    Ok(())
}
