//! Cooperative/preemptive round-robin scheduler over a fixed TCB pool.
//!
//! Grounded on the reference kernel's `kernel/task/scheduler.rs`: a global
//! `Spin`-guarded scheduler object, explicit `ThreadState` transitions
//! enforced by assertion, and an idle task the CPU parks in when nothing is
//! ready (`Scheduler::schedule` / the `idle_task` loop). The differences are
//! the spec's: a fixed-size TCB arena instead of `Arc<Thread>`, per-priority
//! ready queues instead of one FIFO, and a timer-IRQ preemption entry point
//! gated on the IRQ-nesting counter in `crate::prelude` rather than a
//! percpu preempt count.

use alloc::collections::VecDeque;
use core::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use lazy_static::lazy_static;

use super::message::Message;
use super::tcb::{Priority, State, TaskId, Tcb, WaitObject, MAX_TASKS};
use crate::prelude::*;

struct Pool {
    tasks: [Option<Tcb>; MAX_TASKS],
    ready: [VecDeque<TaskId>; Priority::COUNT],
    sleeping: VecDeque<TaskId>,
}

impl Pool {
    const fn new() -> Self {
        Self {
            tasks: [const { None }; MAX_TASKS],
            ready: [
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
                VecDeque::new(),
            ],
            sleeping: VecDeque::new(),
        }
    }

    fn slot(&self, id: TaskId) -> Option<&Tcb> {
        self.tasks.get(id.0 as usize)?.as_ref()
    }

    fn slot_mut(&mut self, id: TaskId) -> Option<&mut Tcb> {
        self.tasks.get_mut(id.0 as usize)?.as_mut()
    }

    fn enqueue_ready(&mut self, id: TaskId) {
        let prio = self.slot(id).expect("enqueue: unknown task").priority;
        self.ready[prio.index()].push_back(id);
    }

    fn pop_ready(&mut self) -> Option<TaskId> {
        for queue in self.ready.iter_mut().rev() {
            if let Some(id) = queue.pop_front() {
                return Some(id);
            }
        }
        None
    }
}

lazy_static! {
    static ref POOL: Mutex<Pool> = Mutex::new(Pool::new());
}

static CURRENT: AtomicU32 = AtomicU32::new(0);
static IDLE_TASK: AtomicU32 = AtomicU32::new(0);
static SCHEDULER_ENABLED: AtomicBool = AtomicBool::new(false);
static TICKS_PER_QUANTUM: AtomicU32 = AtomicU32::new(0);
static QUANTUM_REMAINING: AtomicU32 = AtomicU32::new(0);

pub fn current_id() -> TaskId {
    TaskId(CURRENT.load(Ordering::Acquire))
}

/// Alias for [`current_id`] matching the spec's `task_current()` naming.
pub fn task_current() -> TaskId {
    current_id()
}

/// Snapshot of a TCB's queryable fields, since the TCB itself lives
/// behind the pool mutex and can't be handed out by reference.
#[derive(Debug, Clone, Copy)]
pub struct TaskInfo {
    pub name: &'static str,
    pub state: State,
    pub priority: Priority,
}

pub fn task_by_id(id: TaskId) -> Option<TaskInfo> {
    with_task(id, |tcb| TaskInfo { name: tcb.name, state: tcb.state, priority: tcb.priority })
}

pub fn is_running() -> bool {
    SCHEDULER_ENABLED.load(Ordering::Acquire)
}

/// Run `f` with shared access to task `id`'s TCB, disabling preemption for
/// the duration. Returns `None` if `id` is not a live task.
pub fn with_task<R>(id: TaskId, f: impl FnOnce(&mut Tcb) -> R) -> Option<R> {
    let mut pool = POOL.lock();
    pool.slot_mut(id).map(f)
}

extern "C" fn idle_entry(_arg: usize) {
    loop {
        khal::task::halt();
    }
}

/// Create the idle task and the scheduler's bookkeeping. Must run once
/// before the first real task is spawned.
pub fn init() {
    TICKS_PER_QUANTUM.store(crate::config::CONFIG.default_quantum_ticks, Ordering::Relaxed);

    let idle = task_create("idle", idle_entry, 0, Priority::Low).expect("idle task creation");
    IDLE_TASK.store(idle.0, Ordering::Relaxed);
    CURRENT.store(idle.0, Ordering::Relaxed);

    // The idle task is never enqueued: it is only ever reached when every
    // ready queue is empty, per the reference kernel's idle_task loop.
    let mut pool = POOL.lock();
    for queue in pool.ready.iter_mut() {
        queue.retain(|&id| id != idle);
    }
    if let Some(tcb) = pool.slot_mut(idle) {
        tcb.state = State::Running;
    }
}

pub fn task_create(
    name: &'static str,
    entry: extern "C" fn(usize),
    arg: usize,
    priority: Priority,
) -> KResult<TaskId> {
    let mut pool = POOL.lock();

    let slot_index = pool.tasks.iter().position(Option::is_none).ok_or(Error::NoSpace)?;
    let id = TaskId(slot_index as u32);

    let tcb = Tcb::new(id, name, entry, arg, priority);
    pool.tasks[slot_index] = Some(tcb);

    pool.enqueue_ready(id);
    Ok(id)
}

/// Preemption entry point, called from the timer IRQ handler
/// (`kernel::irq::khal_irq_dispatch`) with preemption *not* yet disabled by
/// the caller; this function disables it itself for the duration of the
/// scheduling decision.
pub fn on_timer_tick(_tick: u32) {
    wake_sleepers();

    if !SCHEDULER_ENABLED.load(Ordering::Acquire) {
        return;
    }
    if preempt_count() != 0 {
        return;
    }

    let remaining = QUANTUM_REMAINING.fetch_update(Ordering::AcqRel, Ordering::Acquire, |r| {
        Some(r.saturating_sub(1))
    });
    if remaining != Ok(1) && remaining != Ok(0) {
        return;
    }

    QUANTUM_REMAINING.store(TICKS_PER_QUANTUM.load(Ordering::Relaxed), Ordering::Relaxed);
    task_yield();
}

fn wake_sleepers() {
    let now = khal::timer::ticks_now();
    let mut pool = POOL.lock();

    let mut still_sleeping = VecDeque::new();
    while let Some(id) = pool.sleeping.pop_front() {
        let due = pool.slot(id).map(|t| t.wakeup_tick <= now).unwrap_or(false);
        if due {
            if let Some(tcb) = pool.slot_mut(id) {
                tcb.state = State::Ready;
            }
            pool.enqueue_ready(id);
        } else {
            still_sleeping.push_back(id);
        }
    }
    pool.sleeping = still_sleeping;
}

/// Switch away from the currently running task into whichever task the
/// pool picks next (the idle task if nothing is ready). `current`'s state
/// must already reflect why it stopped running (Ready/Sleeping/Blocked/
/// Zombie) before calling this.
fn switch_to_next() {
    let (from_sp, to_sp, to_id) = {
        let mut pool = POOL.lock();
        let from_id = current_id();
        let idle_id = TaskId(IDLE_TASK.load(Ordering::Relaxed));

        let next_id = pool.pop_ready().unwrap_or(idle_id);
        if let Some(tcb) = pool.slot_mut(next_id) {
            tcb.state = State::Running;
            tcb.last_scheduled_tick = khal::timer::ticks_now();
        }

        let from_sp = pool.slot_mut(from_id).map(|t| &mut t.saved_sp as *mut *mut u32);
        let to_sp = pool.slot(next_id).expect("next task vanished").saved_sp;

        (from_sp, to_sp, next_id)
    };

    CURRENT.store(to_id.0, Ordering::Release);

    if let Some(from_sp) = from_sp {
        let mut to_sp = to_sp;
        khal::task::context_switch(from_sp as *mut u32, &mut to_sp as *mut *mut u32 as *mut u32);
    }
}

/// Voluntarily give up the CPU; the caller returns to `Ready` and is
/// re-enqueued at the back of its priority's queue.
pub fn task_yield() {
    let _preempt = PreemptGuard::new();
    let id = current_id();
    {
        let mut pool = POOL.lock();
        if let Some(tcb) = pool.slot_mut(id) {
            tcb.state = State::Ready;
        }
        pool.enqueue_ready(id);
    }
    switch_to_next();
}

/// Sleep for `ms` milliseconds, resuming at tick >= `now + ceil(ms *
/// tick_hz / 1000)` (see the spec's sleep-monotonicity property).
pub fn task_sleep(ms: u32) {
    let _preempt = PreemptGuard::new();
    let id = current_id();
    let tick_hz = crate::config::CONFIG.tick_hz;
    let delta_ticks = (ms as u64 * tick_hz as u64).div_ceil(1000) as u32;
    let wakeup = khal::timer::ticks_now().wrapping_add(delta_ticks.max(1));

    {
        let mut pool = POOL.lock();
        if let Some(tcb) = pool.slot_mut(id) {
            tcb.state = State::Sleeping;
            tcb.wakeup_tick = wakeup;
        }
        pool.sleeping.push_back(id);
    }
    switch_to_next();
}

pub fn block_current(wait_object: WaitObject) {
    let _preempt = PreemptGuard::new();
    let id = current_id();
    {
        let mut pool = POOL.lock();
        if let Some(tcb) = pool.slot_mut(id) {
            tcb.state = State::Blocked;
            tcb.wait_object = wait_object;
        }
    }
    switch_to_next();
}

pub fn unblock(id: TaskId) {
    let mut pool = POOL.lock();
    if let Some(tcb) = pool.slot_mut(id) {
        if tcb.state == State::Blocked {
            tcb.state = State::Ready;
            tcb.wait_object = WaitObject::None;
            pool.enqueue_ready(id);
        }
    }
}

pub fn task_exit(code: i32) -> ! {
    preempt_disable();
    let id = current_id();
    {
        let mut pool = POOL.lock();
        if let Some(tcb) = pool.slot_mut(id) {
            tcb.state = State::Zombie;
            tcb.exit_code = code;
        }
    }
    switch_to_next();
    unreachable!("task_exit: resumed a zombie task")
}

/// Free the TCB slots of every zombie task. Run periodically (e.g. from
/// the idle task or a reaper) rather than synchronously on every exit, so
/// exiting tasks never have to wait on allocator work.
pub fn cleanup_zombies() -> usize {
    let zombies: alloc::vec::Vec<TaskId> = {
        let pool = POOL.lock();
        pool.tasks
            .iter()
            .filter_map(|slot| slot.as_ref())
            .filter(|tcb| tcb.state == State::Zombie)
            .map(|tcb| tcb.id)
            .collect()
    };
    zombies.iter().filter(|&&id| task_destroy(id).is_ok()).count()
}

/// Remove task `id` from the pool and free its stack. Disallowed on the
/// currently running task, per §4.6's `task_destroy` contract.
pub fn task_destroy(id: TaskId) -> KResult<()> {
    let mut pool = POOL.lock();
    let tcb = pool.slot(id).ok_or(Error::NotFound)?;
    if tcb.state == State::Running {
        return Err(Error::Busy);
    }
    for queue in pool.ready.iter_mut() {
        queue.retain(|&queued| queued != id);
    }
    pool.sleeping.retain(|&queued| queued != id);
    pool.tasks[id.0 as usize] = None;
    Ok(())
}

/// Per-`State` task counts across the whole pool.
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskCounts {
    pub ready: usize,
    pub running: usize,
    pub blocked: usize,
    pub sleeping: usize,
    pub zombie: usize,
}

pub fn task_monitor_health() -> TaskCounts {
    let pool = POOL.lock();
    let mut counts = TaskCounts::default();
    for tcb in pool.tasks.iter().flatten() {
        match tcb.state {
            State::Ready => counts.ready += 1,
            State::Running => counts.running += 1,
            State::Blocked => counts.blocked += 1,
            State::Sleeping => counts.sleeping += 1,
            State::Zombie => counts.zombie += 1,
            State::Finished => {}
        }
    }
    counts
}

pub fn message_send(target: TaskId, msg_type: u32, data: &[u8]) -> KResult<()> {
    let msg = Message::new(current_id(), msg_type, data)?;
    let mut pool = POOL.lock();
    let tcb = pool.slot_mut(target).ok_or(Error::NotFound)?;
    tcb.messages.push(msg)?;
    let was_blocked_on_messages = tcb.state == State::Blocked && tcb.wait_object == WaitObject::MessageQueue;
    drop(pool);
    if was_blocked_on_messages {
        unblock(target);
    }
    Ok(())
}

pub fn message_receive(blocking: bool) -> KResult<Message> {
    loop {
        let id = current_id();
        let popped = {
            let mut pool = POOL.lock();
            pool.slot_mut(id).and_then(|tcb| tcb.messages.pop())
        };
        match popped {
            Some(msg) => return Ok(msg),
            None if blocking => block_current(WaitObject::MessageQueue),
            None => return Err(Error::NotFound),
        }
    }
}

/// Enable preemption and enter the scheduling loop. Called once from
/// `main` after the initial task has been spawned; never returns.
pub fn run() -> ! {
    QUANTUM_REMAINING.store(TICKS_PER_QUANTUM.load(Ordering::Relaxed), Ordering::Relaxed);
    SCHEDULER_ENABLED.store(true, Ordering::Release);
    khal::irq::enable();

    loop {
        task_yield();
    }
}
