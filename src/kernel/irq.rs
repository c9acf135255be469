//! IRQ dispatch table.
//!
//! Grounded on the reference kernel's `src/kernel/interrupt.rs`: a fixed
//! array of per-line handler lists, each line registered independently by
//! whichever driver owns it (serial, IDE, timer). The actual IDT and PIC
//! remapping live outside this crate's scope (the boot stub's job per the
//! spec's Out-of-scope list); this module only owns the dispatch table the
//! boot stub's trap entry calls into.

use alloc::boxed::Box;
use alloc::vec::Vec;

use crate::prelude::*;

const NUM_IRQS: usize = 16;
pub const IRQ_TIMER: u8 = 0;

static HANDLERS: Mutex<[Vec<Box<dyn Fn() + Send>>; NUM_IRQS]> =
    Mutex::new([const { Vec::new() }; NUM_IRQS]);

pub fn register_irq_handler<F>(irq: u8, handler: F)
where
    F: Fn() + Send + 'static,
{
    assert!((irq as usize) < NUM_IRQS, "irq line out of range");
    HANDLERS.lock()[irq as usize].push(Box::new(handler));
}

/// Entry point for the boot stub's trap dispatcher. Runs every registered
/// handler for `irq`, then sends PIC EOI.
#[no_mangle]
pub extern "C" fn khal_irq_dispatch(irq: u8) {
    if irq as usize >= NUM_IRQS {
        return;
    }

    if irq == IRQ_TIMER {
        let tick = khal::timer::tick();
        crate::kernel::task::scheduler::on_timer_tick(tick);
    }

    for handler in HANDLERS.lock()[irq as usize].iter() {
        handler();
    }

    khal::irq::pic_eoi(irq);
}
